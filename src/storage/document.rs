//! Document store backend: the whole snapshot as one MongoDB document

use super::StorageDriver;
use crate::error::{Error, Result};
use crate::snapshot::Snapshot;
use log::{debug, info};
use mongodb::bson::{self, DateTime, Document, doc};
use mongodb::{Client, Collection, IndexModel};
use tokio::sync::OnceCell;

/// Database used when the URL does not name one.
pub const DEFAULT_DATABASE: &str = "gcman";
pub const COLLECTION: &str = "settings";
/// Fixed `_id` of the settings document.
pub const DOCUMENT_ID: &str = "settings";

const BACKEND: &str = "mongodb";

struct Connection {
    client: Client,
    collection: Collection<Document>,
}

/// MongoDB driver; the client and index are set up on first use.
pub struct DocumentDriver {
    url: String,
    connection: OnceCell<Connection>,
}

impl DocumentDriver {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            connection: OnceCell::new(),
        }
    }

    async fn connection(&self) -> Result<&Connection> {
        self.connection.get_or_try_init(|| self.connect()).await
    }

    async fn connect(&self) -> Result<Connection> {
        let client = Client::with_uri_str(&self.url)
            .await
            .map_err(|e| Error::backend(BACKEND, e))?;
        let database = client
            .default_database()
            .unwrap_or_else(|| client.database(DEFAULT_DATABASE));
        let collection = database.collection::<Document>(COLLECTION);

        collection
            .create_index(IndexModel::builder().keys(doc! { "updatedAt": 1 }).build())
            .await
            .map_err(|e| Error::backend(BACKEND, e))?;

        info!(
            "Connected to MongoDB collection '{}.{COLLECTION}'",
            database.name()
        );
        Ok(Connection { client, collection })
    }
}

/// Strip the bookkeeping fields and decode the rest as a snapshot.
fn decode(mut document: Document) -> Result<Snapshot> {
    let raw = document.to_string();
    document.remove("_id");
    document.remove("updatedAt");
    bson::from_document(document).map_err(|e| Error::MalformedDocument {
        backend: BACKEND,
        raw,
        reason: e.to_string(),
    })
}

fn encode(snapshot: &Snapshot) -> Result<Document> {
    let mut document = bson::to_document(snapshot).map_err(|e| Error::backend(BACKEND, e))?;
    document.insert("_id", DOCUMENT_ID);
    document.insert("updatedAt", DateTime::now());
    Ok(document)
}

impl StorageDriver for DocumentDriver {
    fn name(&self) -> &'static str {
        BACKEND
    }

    async fn initialize(&self) -> Result<()> {
        self.connection().await.map(|_| ())
    }

    async fn load(&self) -> Result<Option<Snapshot>> {
        let found = self
            .connection()
            .await?
            .collection
            .find_one(doc! { "_id": DOCUMENT_ID })
            .await
            .map_err(|e| Error::backend(BACKEND, e))?;

        match found {
            Some(document) => decode(document).map(Some),
            None => {
                debug!("No settings document in MongoDB");
                Ok(None)
            }
        }
    }

    async fn save(&self, snapshot: &Snapshot) -> Result<()> {
        let document = encode(snapshot)?;
        self.connection()
            .await?
            .collection
            .replace_one(doc! { "_id": DOCUMENT_ID }, document)
            .upsert(true)
            .await
            .map_err(|e| Error::backend(BACKEND, e))?;
        debug!("Upserted settings document in MongoDB");
        Ok(())
    }

    async fn close(&self) {
        if let Some(connection) = self.connection.get() {
            connection.client.clone().shutdown().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::Scope;
    use serde_json::json;

    #[test]
    fn test_document_roundtrip_drops_bookkeeping() {
        let mut snap = Snapshot::default();
        snap.insert(&Scope::Global, "prefix", json!("!"), "2026-01-01T00:00:00Z");
        snap.insert(
            &Scope::Group("1@g.us".into()),
            "antilink",
            json!({"enabled": true, "action": "kick"}),
            "2026-01-01T00:00:00Z",
        );

        let document = encode(&snap).unwrap();
        assert_eq!(document.get_str("_id").unwrap(), DOCUMENT_ID);
        assert!(document.contains_key("updatedAt"));

        assert_eq!(decode(document).unwrap(), snap);
    }

    #[test]
    fn test_malformed_document_keeps_raw_text() {
        let document = doc! {
            "_id": DOCUMENT_ID,
            "globalSettings": { "prefix": "!" },
            "groupSettings": "oops",
        };

        match decode(document) {
            Err(Error::MalformedDocument { backend, raw, .. }) => {
                assert_eq!(backend, BACKEND);
                assert!(raw.contains("oops"));
            }
            other => panic!("expected MalformedDocument, got {other:?}"),
        }
    }
}
