//! In-process backend. Used when no remote is configured and as the
//! collaborator double in tests.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use parking_lot::{Mutex, RwLock};
use rand::{distributions::Alphanumeric, Rng};
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::backend::{
    merge_fields, AuthCallback, AuthProvider, BlobStore, Document, DocumentStore, ListenerHandle,
    SignInProvider, SnapshotCallback, WriteOp,
};
use crate::error::{FeedError, FeedResult};
use crate::model::User;
use crate::query::Query;

type Collections = BTreeMap<String, BTreeMap<String, Value>>;

#[derive(Default)]
pub struct MemoryBackend {
    collections: RwLock<Collections>,
    blobs: RwLock<HashMap<String, String>>,
    failing: RwLock<HashSet<String>>,
    listeners: Mutex<BTreeMap<u64, (Query, SnapshotCallback)>>,
    auth_listeners: Mutex<BTreeMap<u64, AuthCallback>>,
    accounts: RwLock<HashMap<String, (String, User)>>,
    federated_user: RwLock<Option<User>>,
    current_user: RwLock<Option<User>>,
    next_handle: AtomicU64,
    reads: AtomicUsize,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, collection: &str, id: &str, data: impl Serialize) -> FeedResult<()> {
        let value = serde_json::to_value(data)?;
        self.collections
            .write()
            .entry(collection.to_string())
            .or_default()
            .insert(id.to_string(), value);
        self.notify(collection);
        Ok(())
    }

    pub fn insert_blob(&self, path: &str, url: &str) {
        self.blobs.write().insert(path.to_string(), url.to_string());
    }

    /// Makes every read of `collection` (or download of a blob path) fail.
    pub fn fail_on(&self, key: &str) {
        self.failing.write().insert(key.to_string());
    }

    pub fn clear_failures(&self) {
        self.failing.write().clear();
    }

    pub fn documents(&self, collection: &str) -> Vec<Document> {
        self.collections
            .read()
            .get(collection)
            .map(|docs| {
                docs.iter()
                    .map(|(id, data)| Document::new(id.clone(), data.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Number of document and collection reads served so far.
    pub fn read_count(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn register_account(&self, email: &str, password: &str, user: User) {
        self.accounts
            .write()
            .insert(email.to_ascii_lowercase(), (password.to_string(), user));
    }

    /// User returned by Google/Apple sign-in.
    pub fn set_federated_user(&self, user: User) {
        *self.federated_user.write() = Some(user);
    }

    fn next_handle(&self) -> ListenerHandle {
        ListenerHandle(self.next_handle.fetch_add(1, Ordering::SeqCst) + 1)
    }

    fn check_failing(&self, key: &str) -> FeedResult<()> {
        if self.failing.read().contains(key) {
            return Err(FeedError::Backend(format!("{key} unavailable")));
        }
        Ok(())
    }

    fn run_query(&self, query: &Query) -> Vec<Document> {
        query.apply(self.documents(&query.collection))
    }

    fn notify(&self, collection: &str) {
        let targets: Vec<(Query, SnapshotCallback)> = self
            .listeners
            .lock()
            .values()
            .filter(|(query, _)| query.collection == collection)
            .cloned()
            .collect();
        for (query, callback) in targets {
            let snapshot = match self.check_failing(collection) {
                Ok(()) => Ok(self.run_query(&query)),
                Err(err) => Err(err),
            };
            callback(snapshot);
        }
    }

    fn set_user(&self, user: Option<User>) {
        *self.current_user.write() = user.clone();
        let callbacks: Vec<AuthCallback> = self.auth_listeners.lock().values().cloned().collect();
        for callback in callbacks {
            callback(user.clone());
        }
    }

    fn apply_write(collections: &mut Collections, op: WriteOp) -> FeedResult<String> {
        match op {
            WriteOp::Set {
                collection,
                id,
                data,
                merge,
            } => {
                let docs = collections.entry(collection.clone()).or_default();
                match docs.get_mut(&id) {
                    Some(existing) if merge => merge_fields(existing, data),
                    _ => {
                        docs.insert(id, data);
                    }
                }
                Ok(collection)
            }
            WriteOp::Update {
                collection,
                id,
                fields,
            } => {
                let existing = collections
                    .get_mut(&collection)
                    .and_then(|docs| docs.get_mut(&id))
                    .ok_or_else(|| FeedError::NotFound(format!("{collection}/{id}")))?;
                merge_fields(existing, fields);
                Ok(collection)
            }
            WriteOp::Delete { collection, id } => {
                if let Some(docs) = collections.get_mut(&collection) {
                    docs.remove(&id);
                }
                Ok(collection)
            }
        }
    }
}

impl DocumentStore for MemoryBackend {
    fn get_document(&self, collection: &str, id: &str) -> FeedResult<Option<Document>> {
        self.check_failing(collection)?;
        self.reads.fetch_add(1, Ordering::SeqCst);
        Ok(self
            .collections
            .read()
            .get(collection)
            .and_then(|docs| docs.get(id))
            .map(|data| Document::new(id, data.clone())))
    }

    fn get_collection(&self, query: &Query) -> FeedResult<Vec<Document>> {
        query.validate()?;
        self.check_failing(&query.collection)?;
        self.reads.fetch_add(1, Ordering::SeqCst);
        Ok(self.run_query(query))
    }

    fn add_snapshot_listener(
        &self,
        query: Query,
        callback: SnapshotCallback,
    ) -> FeedResult<ListenerHandle> {
        query.validate()?;
        let handle = self.next_handle();
        let initial = match self.check_failing(&query.collection) {
            Ok(()) => Ok(self.run_query(&query)),
            Err(err) => Err(err),
        };
        self.listeners
            .lock()
            .insert(handle.0, (query, callback.clone()));
        callback(initial);
        Ok(handle)
    }

    fn remove_snapshot_listener(&self, handle: ListenerHandle) {
        self.listeners.lock().remove(&handle.0);
    }

    fn add_document(&self, collection: &str, data: Value) -> FeedResult<String> {
        let id: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(20)
            .map(char::from)
            .collect();
        self.set_document(collection, &id, data, false)?;
        Ok(id)
    }

    fn set_document(
        &self,
        collection: &str,
        id: &str,
        data: Value,
        merge: bool,
    ) -> FeedResult<()> {
        self.write_batch(vec![WriteOp::Set {
            collection: collection.to_string(),
            id: id.to_string(),
            data,
            merge,
        }])
    }

    fn update_document(&self, collection: &str, id: &str, fields: Value) -> FeedResult<()> {
        self.write_batch(vec![WriteOp::Update {
            collection: collection.to_string(),
            id: id.to_string(),
            fields,
        }])
    }

    fn delete_document(&self, collection: &str, id: &str) -> FeedResult<()> {
        self.write_batch(vec![WriteOp::Delete {
            collection: collection.to_string(),
            id: id.to_string(),
        }])
    }

    /// All-or-nothing: ops are applied to a copy that replaces the store only
    /// when every op succeeded.
    fn write_batch(&self, ops: Vec<WriteOp>) -> FeedResult<()> {
        for op in &ops {
            let collection = match op {
                WriteOp::Set { collection, .. }
                | WriteOp::Update { collection, .. }
                | WriteOp::Delete { collection, .. } => collection,
            };
            self.check_failing(collection)?;
        }
        let touched = {
            let mut guard = self.collections.write();
            let mut staged = guard.clone();
            let mut touched = Vec::new();
            for op in ops {
                touched.push(Self::apply_write(&mut staged, op)?);
            }
            *guard = staged;
            touched
        };
        let unique: HashSet<String> = touched.into_iter().collect();
        for collection in unique {
            debug!(%collection, "memory write committed");
            self.notify(&collection);
        }
        Ok(())
    }
}

impl BlobStore for MemoryBackend {
    fn download_url(&self, path: &str) -> FeedResult<String> {
        self.check_failing(path)?;
        self.blobs
            .read()
            .get(path)
            .cloned()
            .ok_or_else(|| FeedError::NotFound(path.to_string()))
    }
}

impl AuthProvider for MemoryBackend {
    fn add_listener(&self, callback: AuthCallback) -> ListenerHandle {
        let handle = self.next_handle();
        self.auth_listeners.lock().insert(handle.0, callback.clone());
        callback(self.current_user());
        handle
    }

    fn remove_listener(&self, handle: ListenerHandle) {
        self.auth_listeners.lock().remove(&handle.0);
    }

    fn sign_in(&self, provider: SignInProvider) -> FeedResult<User> {
        let user = match provider {
            SignInProvider::Guest => User::guest(),
            SignInProvider::Password { email, password } => {
                let accounts = self.accounts.read();
                match accounts.get(&email.to_ascii_lowercase()) {
                    Some((expected, user)) if *expected == password => user.clone(),
                    _ => {
                        return Err(FeedError::PermissionDenied(
                            "invalid email or password".into(),
                        ))
                    }
                }
            }
            SignInProvider::Google | SignInProvider::Apple => self
                .federated_user
                .read()
                .clone()
                .ok_or_else(|| FeedError::PermissionDenied("sign-in cancelled".into()))?,
        };
        self.set_user(Some(user.clone()));
        Ok(user)
    }

    fn sign_out(&self) -> FeedResult<()> {
        self.set_user(None);
        Ok(())
    }

    fn current_user(&self) -> Option<User> {
        self.current_user.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::DOCUMENT_ID;
    use serde_json::json;
    use std::sync::Arc;

    #[test]
    fn queries_run_against_seeded_documents() {
        let backend = MemoryBackend::new();
        backend.insert("posts", "p1", json!({ "rank": 1 })).unwrap();
        backend.insert("posts", "p2", json!({ "rank": 2 })).unwrap();
        let docs = backend
            .get_collection(&Query::collection("posts").where_in(DOCUMENT_ID, ["p2"]))
            .unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].id, "p2");
        assert_eq!(backend.read_count(), 1);
    }

    #[test]
    fn failed_batch_leaves_store_untouched() {
        let backend = MemoryBackend::new();
        backend.insert("users", "u1", json!({ "blacklist": [] })).unwrap();
        let result = backend.write_batch(vec![
            WriteOp::Set {
                collection: "users".into(),
                id: "u2".into(),
                data: json!({}),
                merge: false,
            },
            WriteOp::Update {
                collection: "users".into(),
                id: "missing".into(),
                fields: json!({ "a": 1 }),
            },
        ]);
        assert!(matches!(result, Err(FeedError::NotFound(_))));
        assert_eq!(backend.documents("users").len(), 1);
    }

    #[test]
    fn listeners_see_initial_and_later_snapshots() {
        let backend = MemoryBackend::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let handle = backend
            .add_snapshot_listener(
                Query::collection("tags"),
                Arc::new(move |snapshot| {
                    sink.lock().push(snapshot.map(|docs| docs.len()).unwrap_or(usize::MAX))
                }),
            )
            .unwrap();
        backend.insert("tags", "t1", json!({ "name": "pasta" })).unwrap();
        backend.remove_snapshot_listener(handle);
        backend.insert("tags", "t2", json!({ "name": "tacos" })).unwrap();
        assert_eq!(*seen.lock(), vec![0, 1]);
    }

    #[test]
    fn password_sign_in_checks_credentials() {
        let backend = MemoryBackend::new();
        let user = User {
            id: "u1".into(),
            ..User::default()
        };
        backend.register_account("a@b.c", "pw", user.clone());
        assert!(backend
            .sign_in(SignInProvider::Password {
                email: "a@b.c".into(),
                password: "nope".into()
            })
            .is_err());
        let signed = backend
            .sign_in(SignInProvider::Password {
                email: "A@B.C".into(),
                password: "pw".into(),
            })
            .unwrap();
        assert_eq!(signed, user);
        assert_eq!(backend.current_user(), Some(user));
    }
}
