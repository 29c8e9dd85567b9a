//! In-memory settings model
//!
//! A [`Snapshot`] is the unit that is loaded from and saved to every backend.
//! It serializes to the same document everywhere:
//!
//! ```json
//! {
//!   "globalSettings": { "autoread": true },
//!   "groupSettings": { "123@g.us": { "welcome": { "text": "hi" } } },
//!   "updateTimes": { "global": { "autoread": "2026-01-01T00:00:00Z" } }
//! }
//! ```

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::LazyLock;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

/// Scope token used for global keys in `updateTimes`.
pub const GLOBAL_SCOPE: &str = "global";

/// Legacy group ids predate the `@g.us` suffix: `<creator>-<created_at>`.
static LEGACY_GROUP_ID: LazyLock<regex::Regex> =
    LazyLock::new(|| regex::Regex::new(r"^[0-9]+-[0-9]+$").expect("static regex is valid"));

/// Settings of a single scope, keyed by plugin/setting name.
pub type ScopeSettings = BTreeMap<String, Value>;

/// Full serializable settings state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Snapshot {
    pub global_settings: ScopeSettings,

    /// Null group entries found in older documents are dropped on load.
    #[serde(deserialize_with = "non_null_groups")]
    pub group_settings: BTreeMap<String, ScopeSettings>,

    #[serde(deserialize_with = "non_null_groups")]
    pub update_times: BTreeMap<String, BTreeMap<String, String>>,
}

fn non_null_groups<'de, D, T>(deserializer: D) -> Result<BTreeMap<String, T>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    let raw: BTreeMap<String, Option<T>> = BTreeMap::deserialize(deserializer)?;
    Ok(raw
        .into_iter()
        .filter_map(|(scope, entry)| entry.map(|entry| (scope, entry)))
        .collect())
}

/// Where a setting lives.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Scope {
    Global,
    Group(String),
}

impl Scope {
    /// Map an optional scope argument onto a [`Scope`].
    ///
    /// `None` and the literal `"global"` both address global settings.
    pub fn from_option(scope: Option<&str>) -> Self {
        match scope {
            None | Some(GLOBAL_SCOPE) => Scope::Global,
            Some(id) => Scope::Group(id.to_string()),
        }
    }

    /// Token used as the outer key of `updateTimes`.
    pub fn token(&self) -> &str {
        match self {
            Scope::Global => GLOBAL_SCOPE,
            Scope::Group(id) => id,
        }
    }

    /// Heuristic check for "this string is a group/chat id, not a setting key".
    ///
    /// Accepts any whitespace-free string containing `@` (`123@g.us`,
    /// `456@s.whatsapp.net`) and legacy ids such as `1234567-1600000000`.
    /// This is a pattern match only; it does not validate the id.
    pub fn looks_like_group(candidate: &str) -> bool {
        if candidate.is_empty() || candidate.chars().any(char::is_whitespace) {
            return false;
        }
        candidate.contains('@') || LEGACY_GROUP_ID.is_match(candidate)
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

impl Snapshot {
    /// Look up a single value.
    pub fn get(&self, scope: &Scope, key: &str) -> Option<&Value> {
        match scope {
            Scope::Global => self.global_settings.get(key),
            Scope::Group(id) => self.group_settings.get(id)?.get(key),
        }
    }

    /// Settings map of a scope, if it exists.
    pub fn scope(&self, scope: &Scope) -> Option<&ScopeSettings> {
        match scope {
            Scope::Global => Some(&self.global_settings),
            Scope::Group(id) => self.group_settings.get(id),
        }
    }

    /// Write a value and its update time together. Returns the previous value.
    pub fn insert(&mut self, scope: &Scope, key: &str, value: Value, stamp: &str) -> Option<Value> {
        let settings = match scope {
            Scope::Global => &mut self.global_settings,
            Scope::Group(id) => self.group_settings.entry(id.clone()).or_default(),
        };
        let previous = settings.insert(key.to_string(), value);
        self.stamp(scope, key, stamp);
        previous
    }

    /// Remove a value, recording the removal time. Returns the removed value.
    pub fn remove(&mut self, scope: &Scope, key: &str, stamp: &str) -> Option<Value> {
        let removed = match scope {
            Scope::Global => self.global_settings.remove(key),
            Scope::Group(id) => self.group_settings.get_mut(id)?.remove(key),
        };
        if removed.is_some() {
            self.stamp(scope, key, stamp);
        }
        removed
    }

    /// Drop a group and all of its update times.
    pub fn remove_group(&mut self, id: &str) -> bool {
        let existed = self.group_settings.remove(id).is_some();
        let had_times = self.update_times.remove(id).is_some();
        existed || had_times
    }

    pub fn group_ids(&self) -> Vec<String> {
        self.group_settings.keys().cloned().collect()
    }

    pub fn update_time(&self, scope: &Scope, key: &str) -> Option<&str> {
        self.update_times
            .get(scope.token())
            .and_then(|times| times.get(key))
            .map(String::as_str)
    }

    fn stamp(&mut self, scope: &Scope, key: &str, stamp: &str) {
        self.update_times
            .entry(scope.token().to_string())
            .or_default()
            .insert(key.to_string(), stamp.to_string());
    }
}

/// Current UTC time as an RFC 3339 (ISO-8601) string.
pub(crate) fn now_stamp() -> String {
    let now = OffsetDateTime::now_utc();
    now.format(&Rfc3339)
        .unwrap_or_else(|_| now.unix_timestamp().to_string())
}

pub(crate) fn parse_stamp(stamp: &str) -> Option<OffsetDateTime> {
    OffsetDateTime::parse(stamp, &Rfc3339).ok()
}

/// Boolean reading of an arbitrary setting value.
///
/// | value | result |
/// |---|---|
/// | `true` / `false` | itself |
/// | string | `true` only for `"true"`, `"1"`, `"yes"`, `"on"` (any case) |
/// | number | non-zero |
/// | `null` | `false` |
/// | array / object | `true` |
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::String(s) => {
            let s = s.trim();
            ["true", "1", "yes", "on"]
                .iter()
                .any(|accepted| s.eq_ignore_ascii_case(accepted))
        }
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::Null => false,
        Value::Array(_) | Value::Object(_) => true,
    }
}

pub(crate) fn to_object(settings: &ScopeSettings) -> Map<String, Value> {
    settings
        .iter()
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_group_id_heuristic() {
        assert!(Scope::looks_like_group("123@g.us"));
        assert!(Scope::looks_like_group("120363025246125486@g.us"));
        assert!(Scope::looks_like_group("5511999999999@s.whatsapp.net"));
        assert!(Scope::looks_like_group("5511999999-1600000000"));
        assert!(Scope::looks_like_group("@"));

        assert!(!Scope::looks_like_group(""));
        assert!(!Scope::looks_like_group("autoread"));
        assert!(!Scope::looks_like_group("welcome.text"));
        assert!(!Scope::looks_like_group("123"));
        assert!(!Scope::looks_like_group("anti-link"));
        assert!(!Scope::looks_like_group("12-ab"));
        assert!(!Scope::looks_like_group("a b@g.us"));
    }

    #[test]
    fn test_truthy_table() {
        for yes in ["true", "TRUE", "1", "yes", "Yes", "on", "ON", " on "] {
            assert!(truthy(&json!(yes)), "{yes:?} should be true");
        }
        for no in ["false", "0", "no", "off", "", "enabled"] {
            assert!(!truthy(&json!(no)), "{no:?} should be false");
        }
        assert!(truthy(&json!(1)));
        assert!(truthy(&json!(-0.5)));
        assert!(!truthy(&json!(0)));
        assert!(!truthy(&json!(0.0)));
        assert!(!truthy(&Value::Null));
        assert!(truthy(&json!([])));
        assert!(truthy(&json!({})));
    }

    #[test]
    fn test_insert_stamps_update_time() {
        let mut snap = Snapshot::default();
        let group = Scope::Group("123@g.us".into());

        assert!(snap.insert(&group, "welcome", json!("hi"), "2026-01-01T00:00:00Z").is_none());
        assert_eq!(snap.get(&group, "welcome"), Some(&json!("hi")));
        assert_eq!(
            snap.update_time(&group, "welcome"),
            Some("2026-01-01T00:00:00Z")
        );

        snap.insert(&Scope::Global, "autoread", json!(true), "2026-01-02T00:00:00Z");
        assert_eq!(
            snap.update_times["global"]["autoread"],
            "2026-01-02T00:00:00Z"
        );
    }

    #[test]
    fn test_remove_group_clears_times() {
        let mut snap = Snapshot::default();
        let group = Scope::Group("1@g.us".into());
        snap.insert(&group, "a", json!(1), "t");

        assert!(snap.remove_group("1@g.us"));
        assert!(snap.group_settings.is_empty());
        assert!(!snap.update_times.contains_key("1@g.us"));
        assert!(!snap.remove_group("1@g.us"));
    }

    #[test]
    fn test_document_shape() {
        let mut snap = Snapshot::default();
        snap.insert(&Scope::Global, "autoread", json!(true), "t");
        let doc = serde_json::to_value(&snap).unwrap();

        assert_eq!(doc["globalSettings"]["autoread"], json!(true));
        assert_eq!(doc["groupSettings"], json!({}));
        assert_eq!(doc["updateTimes"]["global"]["autoread"], json!("t"));
    }

    #[test]
    fn test_missing_sections_and_null_groups() {
        let snap: Snapshot = serde_json::from_value(json!({
            "groupSettings": { "1@g.us": null, "2@g.us": { "x": 1 } }
        }))
        .unwrap();

        assert!(snap.global_settings.is_empty());
        assert_eq!(snap.group_ids(), vec!["2@g.us".to_string()]);
        assert!(snap.update_times.is_empty());
    }

    #[test]
    fn test_stamp_roundtrips_through_parser() {
        let stamp = now_stamp();
        assert!(parse_stamp(&stamp).is_some());
        assert!(parse_stamp("yesterday").is_none());
    }
}
