//! Read and write operations of the store facade
//!
//! Every mutation follows the same order: change the snapshot and its update
//! time under the state lock, mark the store dirty, release the lock, emit
//! the event, then schedule a save unless the caller deferred it. Concurrent
//! writers may therefore emit in a different order than they changed the
//! snapshot; see [`EventManager::emit`](crate::EventManager::emit).

use super::{ConfigStore, Persist};
use crate::error::{Error, Result};
use crate::events::StoreEvent;
use crate::snapshot::{Scope, now_stamp, parse_stamp, to_object, truthy};
use crate::sync::RwLockExt;
use log::debug;
use serde_json::{Map, Value};
use time::OffsetDateTime;

fn require(name: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        Err(Error::InvalidArgument(format!("{name} must not be empty")))
    } else {
        Ok(())
    }
}

/// `None` for global, the group id otherwise, as carried by [`StoreEvent::Update`].
fn event_scope(scope: &Scope) -> Option<String> {
    match scope {
        Scope::Global => None,
        Scope::Group(id) => Some(id.clone()),
    }
}

impl ConfigStore {
    // =========================================================================
    // Reads
    // =========================================================================

    /// Read one value. `scope` of `None` (or `"global"`) reads global settings.
    ///
    /// Group reads do not fall back to the global value; use
    /// [`get_multiple`](Self::get_multiple) for that.
    pub fn get(&self, scope: Option<&str>, key: &str) -> Option<Value> {
        let scope = Scope::from_option(scope);
        self.inner
            .state
            .read_recovered()
            .snapshot
            .get(&scope, key)
            .cloned()
    }

    /// Resolve several keys at once: group value, else global value, else
    /// `defaults[key]`. Keys that resolve to nothing are left out.
    ///
    /// When the default for a key is a boolean the result is always a
    /// boolean, read through [`truthy`](crate::truthy), so `"on"` or `1`
    /// come back as `true`.
    pub fn get_multiple(
        &self,
        scope: Option<&str>,
        keys: &[&str],
        defaults: &Map<String, Value>,
    ) -> Map<String, Value> {
        let scope = Scope::from_option(scope);
        let state = self.inner.state.read_recovered();
        let snapshot = &state.snapshot;

        let mut resolved = Map::new();
        for &key in keys {
            let default = defaults.get(key);
            let found = match &scope {
                Scope::Group(_) => snapshot.get(&scope, key),
                Scope::Global => None,
            }
            .or_else(|| snapshot.get(&Scope::Global, key))
            .or(default);

            let Some(value) = found else { continue };
            let value = match default {
                Some(Value::Bool(_)) => Value::Bool(truthy(value)),
                _ => value.clone(),
            };
            resolved.insert(key.to_string(), value);
        }
        resolved
    }

    /// Shallow copy of a scope's settings; unknown groups give an empty map.
    ///
    /// With `merge_global_defaults`, global keys the group does not set are
    /// filled in.
    pub fn get_data(&self, scope: Option<&str>, merge_global_defaults: bool) -> Map<String, Value> {
        let scope = Scope::from_option(scope);
        let state = self.inner.state.read_recovered();
        let snapshot = &state.snapshot;

        let mut data = snapshot.scope(&scope).map(to_object).unwrap_or_default();
        if merge_global_defaults && scope != Scope::Global {
            for (key, value) in &snapshot.global_settings {
                if !data.contains_key(key) {
                    data.insert(key.clone(), value.clone());
                }
            }
        }
        data
    }

    /// Ids of every group that has settings.
    pub fn list_groups(&self) -> Vec<String> {
        self.inner.state.read_recovered().snapshot.group_ids()
    }

    /// When a key was last written. Unparseable stored stamps read as `None`.
    pub fn get_update_time(&self, scope: Option<&str>, key: &str) -> Option<OffsetDateTime> {
        let scope = Scope::from_option(scope);
        self.inner
            .state
            .read_recovered()
            .snapshot
            .update_time(&scope, key)
            .and_then(parse_stamp)
    }

    // =========================================================================
    // Writes
    // =========================================================================

    /// Dispatching write.
    ///
    /// `set("autoread", None, v)` writes a global key;
    /// `set("123@g.us", Some("welcome"), v)` writes a group key. Whether
    /// `target` is a group is decided by [`Scope::looks_like_group`].
    ///
    /// # Errors
    ///
    /// [`Error::InvalidArgument`] when the shape is ambiguous: a group id
    /// without a key, or a plain key followed by another key.
    pub fn set(&self, target: &str, key: Option<&str>, value: Value) -> Result<()> {
        self.set_with(target, key, value, Persist::Immediate)
    }

    pub fn set_with(
        &self,
        target: &str,
        key: Option<&str>,
        value: Value,
        persist: Persist,
    ) -> Result<()> {
        require("key", target)?;
        match (Scope::looks_like_group(target), key) {
            (true, Some(key)) => self.set_group_plugin_with(target, key, value, persist),
            (false, None) => self.set_global_with(target, value, persist),
            (true, None) => Err(Error::InvalidArgument(format!(
                "'{target}' looks like a group id but no setting key was given"
            ))),
            (false, Some(key)) => Err(Error::InvalidArgument(format!(
                "'{target}' is not a group id; cannot set '{key}' under it"
            ))),
        }
    }

    /// Write a global setting.
    pub fn set_global(&self, key: &str, value: Value) -> Result<()> {
        self.set_global_with(key, value, Persist::Immediate)
    }

    pub fn set_global_with(&self, key: &str, value: Value, persist: Persist) -> Result<()> {
        require("key", key)?;
        self.write_value(Scope::Global, key, value, persist);
        Ok(())
    }

    /// Write a setting of one group, creating the group if needed.
    pub fn set_group_plugin(&self, scope: &str, key: &str, value: Value) -> Result<()> {
        self.set_group_plugin_with(scope, key, value, Persist::Immediate)
    }

    pub fn set_group_plugin_with(
        &self,
        scope: &str,
        key: &str,
        value: Value,
        persist: Persist,
    ) -> Result<()> {
        require("scope", scope)?;
        require("key", key)?;
        self.write_value(Scope::from_option(Some(scope)), key, value, persist);
        Ok(())
    }

    /// Shallow-merge `partial` into an object-valued group setting and return
    /// the merged object.
    ///
    /// # Errors
    ///
    /// [`Error::InvalidArgument`] if `partial` is not a JSON object, or if the
    /// stored value exists and is not an object.
    pub fn set_group_plugin_config(&self, scope: &str, key: &str, partial: Value) -> Result<Value> {
        self.set_group_plugin_config_with(scope, key, partial, Persist::Immediate)
    }

    pub fn set_group_plugin_config_with(
        &self,
        scope: &str,
        key: &str,
        partial: Value,
        persist: Persist,
    ) -> Result<Value> {
        require("scope", scope)?;
        require("key", key)?;
        let Value::Object(partial) = partial else {
            return Err(Error::InvalidArgument(format!(
                "config for '{key}' must be a JSON object"
            )));
        };

        self.update_value(Scope::from_option(Some(scope)), key, persist, |current| {
            let mut merged = match current {
                None | Some(Value::Null) => Map::new(),
                Some(Value::Object(existing)) => existing.clone(),
                Some(_) => {
                    return Err(Error::InvalidArgument(format!(
                        "'{key}' in '{scope}' holds a non-object value"
                    )));
                }
            };
            merged.extend(partial);
            Ok(Value::Object(merged))
        })
    }

    /// Flip a global flag and return its new value.
    pub fn toggle_global(&self, key: &str) -> Result<bool> {
        self.toggle_global_with(key, Persist::Immediate)
    }

    pub fn toggle_global_with(&self, key: &str, persist: Persist) -> Result<bool> {
        require("key", key)?;
        self.toggle(Scope::Global, key, persist)
    }

    /// Flip a group flag and return its new value.
    pub fn toggle_group_plugin(&self, scope: &str, key: &str) -> Result<bool> {
        self.toggle_group_plugin_with(scope, key, Persist::Immediate)
    }

    pub fn toggle_group_plugin_with(&self, scope: &str, key: &str, persist: Persist) -> Result<bool> {
        require("scope", scope)?;
        require("key", key)?;
        self.toggle(Scope::from_option(Some(scope)), key, persist)
    }

    /// Remove a group and its update times. Returns whether it existed.
    pub fn delete_group(&self, scope: &str) -> bool {
        self.delete_group_with(scope, Persist::Immediate)
    }

    pub fn delete_group_with(&self, scope: &str, persist: Persist) -> bool {
        let existed = {
            let mut state = self.inner.state.write_recovered();
            let existed = state.snapshot.remove_group(scope);
            if existed {
                state.touch();
            }
            existed
        };
        if !existed {
            debug!("delete_group: no settings for '{scope}'");
            return false;
        }

        self.inner.events.emit(&StoreEvent::DeleteGroup {
            scope: scope.to_string(),
        });
        self.after_mutation(persist);
        true
    }

    /// Remove one global key. Emits an update with a `null` value.
    pub fn remove_global(&self, key: &str) -> bool {
        self.remove_value(Scope::Global, key, Persist::Immediate)
    }

    /// Remove one key of a group. Emits an update with a `null` value.
    pub fn remove_group_plugin(&self, scope: &str, key: &str) -> bool {
        self.remove_value(Scope::from_option(Some(scope)), key, Persist::Immediate)
    }

    pub fn remove_with(&self, scope: Option<&str>, key: &str, persist: Persist) -> bool {
        self.remove_value(Scope::from_option(scope), key, persist)
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn write_value(&self, scope: Scope, key: &str, value: Value, persist: Persist) {
        let stamp = now_stamp();
        {
            let mut state = self.inner.state.write_recovered();
            state.snapshot.insert(&scope, key, value.clone(), &stamp);
            state.touch();
        }
        self.inner.events.emit(&StoreEvent::Update {
            scope: event_scope(&scope),
            key: key.to_string(),
            value,
        });
        self.after_mutation(persist);
    }

    /// Read-modify-write of one key under a single lock.
    fn update_value<F>(&self, scope: Scope, key: &str, persist: Persist, f: F) -> Result<Value>
    where
        F: FnOnce(Option<&Value>) -> Result<Value>,
    {
        let stamp = now_stamp();
        let value = {
            let mut state = self.inner.state.write_recovered();
            let value = f(state.snapshot.get(&scope, key))?;
            state.snapshot.insert(&scope, key, value.clone(), &stamp);
            state.touch();
            value
        };
        self.inner.events.emit(&StoreEvent::Update {
            scope: event_scope(&scope),
            key: key.to_string(),
            value: value.clone(),
        });
        self.after_mutation(persist);
        Ok(value)
    }

    fn toggle(&self, scope: Scope, key: &str, persist: Persist) -> Result<bool> {
        let value = self.update_value(scope, key, persist, |current| {
            Ok(Value::Bool(!current.is_some_and(truthy)))
        })?;
        Ok(truthy(&value))
    }

    fn remove_value(&self, scope: Scope, key: &str, persist: Persist) -> bool {
        let stamp = now_stamp();
        let removed = {
            let mut state = self.inner.state.write_recovered();
            let removed = state.snapshot.remove(&scope, key, &stamp).is_some();
            if removed {
                state.touch();
            }
            removed
        };
        if !removed {
            return false;
        }

        self.inner.events.emit(&StoreEvent::Update {
            scope: event_scope(&scope),
            key: key.to_string(),
            value: Value::Null,
        });
        self.after_mutation(persist);
        true
    }

    fn after_mutation(&self, persist: Persist) {
        match persist {
            Persist::Immediate => self.inner.schedule_save(),
            Persist::Deferred => debug!("Save deferred; store left dirty"),
        }
    }
}
