//! Narrow interfaces to the managed backend, bundled into one explicitly
//! constructed [`Backend`] service object.

use std::sync::Arc;

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tracing::info;

use crate::config::BackendConfig;
use crate::error::{FeedError, FeedResult};
use crate::memory::MemoryBackend;
use crate::model::User;
use crate::query::{Query, DOCUMENT_ID};
use crate::rest::{RestBackend, RestConfig};

#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: String,
    pub data: Value,
}

impl Document {
    /// Object data also gets the id under `__name__` so id constraints are
    /// evaluated like any other field.
    pub fn new(id: impl Into<String>, mut data: Value) -> Self {
        let id = id.into();
        if let Value::Object(map) = &mut data {
            map.insert(DOCUMENT_ID.to_string(), Value::String(id.clone()));
        }
        Self { id, data }
    }

    /// Looks up a dotted field path.
    pub fn field(&self, path: &str) -> Option<&Value> {
        if path == DOCUMENT_ID {
            return self.data.get(DOCUMENT_ID);
        }
        path.split('.')
            .try_fold(&self.data, |value, segment| value.get(segment))
    }

    /// Decodes the document, filling a missing `ID` field from the document id.
    pub fn decode<T: DeserializeOwned>(&self) -> FeedResult<T> {
        let mut data = self.data.clone();
        if let Value::Object(map) = &mut data {
            map.remove(DOCUMENT_ID);
            map.entry("ID")
                .or_insert_with(|| Value::String(self.id.clone()));
        }
        serde_json::from_value(data).map_err(|err| {
            FeedError::Backend(format!("decode document {}: {err}", self.id))
        })
    }

    pub fn into_data(mut self) -> Value {
        if let Value::Object(map) = &mut self.data {
            map.remove(DOCUMENT_ID);
        }
        self.data
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    Set {
        collection: String,
        id: String,
        data: Value,
        merge: bool,
    },
    Update {
        collection: String,
        id: String,
        fields: Value,
    },
    Delete {
        collection: String,
        id: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerHandle(pub u64);

pub type SnapshotCallback = Arc<dyn Fn(FeedResult<Vec<Document>>) + Send + Sync>;
pub type AuthCallback = Arc<dyn Fn(Option<User>) + Send + Sync>;

pub trait DocumentStore: Send + Sync {
    fn get_document(&self, collection: &str, id: &str) -> FeedResult<Option<Document>>;
    fn get_collection(&self, query: &Query) -> FeedResult<Vec<Document>>;
    fn add_snapshot_listener(
        &self,
        query: Query,
        callback: SnapshotCallback,
    ) -> FeedResult<ListenerHandle>;
    fn remove_snapshot_listener(&self, handle: ListenerHandle);
    fn add_document(&self, collection: &str, data: Value) -> FeedResult<String>;
    fn set_document(&self, collection: &str, id: &str, data: Value, merge: bool)
        -> FeedResult<()>;
    fn update_document(&self, collection: &str, id: &str, fields: Value) -> FeedResult<()>;
    fn delete_document(&self, collection: &str, id: &str) -> FeedResult<()>;
    fn write_batch(&self, ops: Vec<WriteOp>) -> FeedResult<()>;

    /// Stops listeners and background workers.
    fn shutdown(&self) {}
}

pub trait BlobStore: Send + Sync {
    fn download_url(&self, path: &str) -> FeedResult<String>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignInProvider {
    Google,
    Apple,
    Password { email: String, password: String },
    Guest,
}

pub trait AuthProvider: Send + Sync {
    fn add_listener(&self, callback: AuthCallback) -> ListenerHandle;
    fn remove_listener(&self, handle: ListenerHandle);
    fn sign_in(&self, provider: SignInProvider) -> FeedResult<User>;
    fn sign_out(&self) -> FeedResult<()>;
    fn current_user(&self) -> Option<User>;
}

/// Shallow-merges `patch` into `target`. `null` values delete the field.
pub fn merge_fields(target: &mut Value, patch: Value) {
    let Value::Object(patch) = patch else {
        *target = patch;
        return;
    };
    if !target.is_object() {
        *target = Value::Object(Map::new());
    }
    if let Value::Object(map) = target {
        for (key, value) in patch {
            if value.is_null() {
                map.remove(&key);
            } else {
                map.insert(key, value);
            }
        }
    }
}

#[derive(Clone)]
pub struct Backend {
    pub documents: Arc<dyn DocumentStore>,
    pub blobs: Arc<dyn BlobStore>,
    pub auth: Arc<dyn AuthProvider>,
    kind: &'static str,
}

impl std::fmt::Debug for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Backend").field("kind", &self.kind).finish()
    }
}

impl Backend {
    pub fn new(
        documents: Arc<dyn DocumentStore>,
        blobs: Arc<dyn BlobStore>,
        auth: Arc<dyn AuthProvider>,
    ) -> Self {
        Self {
            documents,
            blobs,
            auth,
            kind: "custom",
        }
    }

    pub fn in_memory(memory: Arc<MemoryBackend>) -> Self {
        Self {
            documents: memory.clone(),
            blobs: memory.clone(),
            auth: memory,
            kind: "memory",
        }
    }

    /// Builds the REST backend when a base URL is configured, otherwise an
    /// empty in-process store.
    pub fn connect(config: &BackendConfig) -> Result<Self> {
        if config.base_url.trim().is_empty() {
            info!("no backend url configured, using in-memory store");
            return Ok(Self::in_memory(Arc::new(MemoryBackend::new())));
        }
        let rest = RestBackend::new(RestConfig::from(config)).context("connect rest backend")?;
        let rest = Arc::new(rest);
        info!(base_url = %config.base_url, "connected rest backend");
        Ok(Self {
            documents: rest.clone(),
            blobs: rest.clone(),
            auth: rest,
            kind: "rest",
        })
    }

    pub fn kind(&self) -> &'static str {
        self.kind
    }

    pub fn shutdown(&self) {
        self.documents.shutdown();
        info!(kind = self.kind, "backend shut down");
    }
}
