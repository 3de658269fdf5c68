use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};
use uuid::Uuid;
use super::errors::{Result, UploadError};
use super::types::UploadEvent;

/// Store key the pending terminal events live under
pub const PENDING_EVENTS_KEY: &str = "pending_events";

/// Durable string-keyed storage of JSON blobs
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Value>>;

    async fn set(&self, key: &str, value: Value) -> Result<()>;

    async fn delete(&self, key: &str) -> Result<()>;
}

/// Process-local store, lost on exit
#[derive(Debug, Default)]
pub struct MemoryKeyValueStore {
    entries: RwLock<HashMap<String, Value>>,
}

impl MemoryKeyValueStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStore for MemoryKeyValueStore {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: Value) -> Result<()> {
        self.entries.write().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.entries.write().await.remove(key);
        Ok(())
    }
}

/// Single JSON object file.
///
/// Writes go to a sibling `.tmp` file that is renamed over the original.
#[derive(Debug)]
pub struct FileKeyValueStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileKeyValueStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> Result<Map<String, Value>> {
        let data = match tokio::fs::read_to_string(&self.path).await {
            Ok(data) => data,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Map::new()),
            Err(err) => return Err(UploadError::store(format!("{}: {}", self.path.display(), err))),
        };

        if data.trim().is_empty() {
            return Ok(Map::new());
        }

        match serde_json::from_str::<Value>(&data)? {
            Value::Object(map) => Ok(map),
            _ => Err(UploadError::store(format!("{}: not a JSON object", self.path.display()))),
        }
    }

    async fn save(&self, map: Map<String, Value>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let data = serde_json::to_string_pretty(&Value::Object(map))?;
        let tmp_path = self.path.with_extension("tmp");
        tokio::fs::write(&tmp_path, data).await?;
        tokio::fs::rename(&tmp_path, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl KeyValueStore for FileKeyValueStore {
    async fn get(&self, key: &str) -> Result<Option<Value>> {
        let _guard = self.lock.lock().await;
        Ok(self.load().await?.remove(key))
    }

    async fn set(&self, key: &str, value: Value) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut map = self.load().await?;
        map.insert(key.to_string(), value);
        self.save(map).await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut map = self.load().await?;
        if map.remove(key).is_some() {
            self.save(map).await?;
        }
        Ok(())
    }
}

/// Terminal events waiting for acknowledgement, keyed by event id
#[derive(Clone)]
pub struct PendingEventStore {
    store: Arc<dyn KeyValueStore>,
}

impl PendingEventStore {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    async fn entries(&self) -> Result<Map<String, Value>> {
        match self.store.get(PENDING_EVENTS_KEY).await? {
            Some(Value::Object(map)) => Ok(map),
            Some(_) => {
                warn!("pending event collection is not an object, resetting");
                Ok(Map::new())
            }
            None => Ok(Map::new()),
        }
    }

    /// Stores the event and stamps its event id. An event that already
    /// carries an id is stored under that id again, never under a new one.
    pub async fn persist(&self, event: &mut UploadEvent) -> Result<String> {
        let event_id = event
            .event_id
            .get_or_insert_with(|| Uuid::new_v4().to_string())
            .clone();

        let mut entries = self.entries().await?;
        entries.insert(event_id.clone(), serde_json::to_value(&*event)?);
        self.store.set(PENDING_EVENTS_KEY, Value::Object(entries)).await?;

        debug!(event_id = %event_id, upload_id = %event.id, name = event.name(), "persisted event");
        Ok(event_id)
    }

    /// Every stored event, in no particular order
    pub async fn replay_all(&self) -> Result<Vec<UploadEvent>> {
        let entries = self.entries().await?;
        let mut events = Vec::with_capacity(entries.len());

        for (event_id, value) in entries {
            match serde_json::from_value::<UploadEvent>(value) {
                Ok(mut event) => {
                    event.event_id = Some(event_id);
                    events.push(event);
                }
                Err(err) => warn!(event_id = %event_id, "skipping malformed pending event: {}", err),
            }
        }

        Ok(events)
    }

    /// Deleting an unknown id is not an error
    pub async fn acknowledge(&self, event_id: &str) -> Result<()> {
        let mut entries = self.entries().await?;
        if entries.remove(event_id).is_none() {
            return Ok(());
        }

        if entries.is_empty() {
            self.store.delete(PENDING_EVENTS_KEY).await
        } else {
            self.store.set(PENDING_EVENTS_KEY, Value::Object(entries)).await
        }
    }
}
