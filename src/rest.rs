use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use crossbeam_channel::{after, bounded, select, Sender};
use parking_lot::{Mutex, RwLock};
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use reqwest::blocking::{Client as HttpClient, RequestBuilder, Response};
use reqwest::header::USER_AGENT;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::{debug, warn};
use url::Url;

use crate::backend::{
    AuthCallback, AuthProvider, BlobStore, Document, DocumentStore, ListenerHandle,
    SignInProvider, SnapshotCallback, WriteOp,
};
use crate::config::BackendConfig;
use crate::error::{FeedError, FeedResult};
use crate::model::User;
use crate::query::{Constraint, Query, RangeOp, DOCUMENT_ID};

pub const STORAGE_API_BASE: &str = "https://firebasestorage.googleapis.com/v0";
pub const IDENTITY_API_BASE: &str = "https://identitytoolkit.googleapis.com/v1";

#[derive(Debug, Clone, Default)]
pub struct RestConfig {
    pub base_url: String,
    pub storage_bucket: String,
    pub api_key: String,
    pub auth_token: String,
    pub user_agent: String,
    pub request_timeout: Duration,
    pub poll_interval: Duration,
    pub http_client: Option<HttpClient>,
}

impl From<&BackendConfig> for RestConfig {
    fn from(config: &BackendConfig) -> Self {
        Self {
            base_url: config.base_url.clone(),
            storage_bucket: config.storage_bucket.clone(),
            api_key: config.api_key.clone(),
            auth_token: config.auth_token.clone(),
            user_agent: format!("reelfeed/{}", crate::VERSION),
            request_timeout: config.request_timeout,
            poll_interval: config.poll_interval,
            http_client: None,
        }
    }
}

struct Inner {
    http: HttpClient,
    user_agent: String,
    base_url: String,
    storage_bucket: String,
    api_key: String,
    auth_token: RwLock<String>,
}

/// Firebase-style REST backend: documents live at
/// `{base}/{collection}/{id}.json`, blobs in a storage bucket.
pub struct RestBackend {
    inner: Arc<Inner>,
    poll_interval: Duration,
    listeners: Mutex<HashMap<u64, Sender<()>>>,
    auth_listeners: Mutex<BTreeMap<u64, AuthCallback>>,
    current_user: RwLock<Option<User>>,
    next_handle: AtomicU64,
}

impl RestBackend {
    pub fn new(config: RestConfig) -> Result<Self> {
        if config.base_url.trim().is_empty() {
            bail!("rest backend base url required");
        }
        if config.user_agent.trim().is_empty() {
            bail!("rest backend user agent required");
        }
        let base = Url::parse(config.base_url.trim())
            .with_context(|| format!("rest backend base url {}", config.base_url))?;
        if !matches!(base.scheme(), "http" | "https") {
            bail!("rest backend base url must be http or https, got {}", base.scheme());
        }

        let timeout = if config.request_timeout.is_zero() {
            Duration::from_secs(20)
        } else {
            config.request_timeout
        };
        let http = match config.http_client {
            Some(client) => client,
            None => HttpClient::builder().timeout(timeout).build()?,
        };

        Ok(Self {
            inner: Arc::new(Inner {
                http,
                user_agent: config.user_agent,
                base_url: config.base_url.trim_end_matches('/').to_string(),
                storage_bucket: config.storage_bucket,
                api_key: config.api_key,
                auth_token: RwLock::new(config.auth_token),
            }),
            poll_interval: if config.poll_interval.is_zero() {
                Duration::from_secs(15)
            } else {
                config.poll_interval
            },
            listeners: Mutex::new(HashMap::new()),
            auth_listeners: Mutex::new(BTreeMap::new()),
            current_user: RwLock::new(None),
            next_handle: AtomicU64::new(1),
        })
    }

    fn next_handle(&self) -> ListenerHandle {
        ListenerHandle(self.next_handle.fetch_add(1, Ordering::SeqCst))
    }

    fn set_user(&self, user: Option<User>) {
        *self.current_user.write() = user.clone();
        let callbacks: Vec<AuthCallback> = self.auth_listeners.lock().values().cloned().collect();
        for callback in callbacks {
            callback(user.clone());
        }
    }
}

impl Inner {
    fn document_url(&self, path: &str) -> String {
        format!("{}/{}.json", self.base_url, path.trim_matches('/'))
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        let request = request.header(USER_AGENT, &self.user_agent);
        let token = self.auth_token.read();
        if token.is_empty() {
            request
        } else {
            request.query(&[("auth", token.as_str())])
        }
    }

    fn get_json(&self, path: &str, params: &[(String, String)]) -> FeedResult<Value> {
        let request = self.authorized(self.http.get(self.document_url(path))).query(params);
        let value: Value = check_status(request.send()?)?.json()?;
        Ok(value)
    }

    fn get_document(&self, collection: &str, id: &str) -> FeedResult<Option<Document>> {
        let value = self.get_json(&format!("{collection}/{id}"), &[])?;
        if value.is_null() {
            return Ok(None);
        }
        Ok(Some(Document::new(id, value)))
    }

    fn get_collection(&self, query: &Query) -> FeedResult<Vec<Document>> {
        query.validate()?;
        if let Some(ids) = id_filter(query) {
            let mut docs = Vec::with_capacity(ids.len());
            for id in ids {
                if let Some(doc) = self.get_document(&query.collection, &id)? {
                    docs.push(doc);
                }
            }
            return Ok(query.apply(docs));
        }

        let value = self.get_json(&query.collection, &server_params(query))?;
        let docs = match value {
            Value::Object(map) => map
                .into_iter()
                .map(|(id, data)| Document::new(id, data))
                .collect(),
            Value::Null => Vec::new(),
            other => {
                return Err(FeedError::Backend(format!(
                    "unexpected collection payload for {}: {other}",
                    query.collection
                )))
            }
        };
        Ok(query.apply(docs))
    }

    fn send_write(&self, request: RequestBuilder) -> FeedResult<Value> {
        let response = check_status(self.authorized(request).send()?)?;
        let value: Value = response.json().unwrap_or(Value::Null);
        Ok(value)
    }
}

/// Ids named by an `in` or equality filter on the document id. Those are
/// fetched one by one instead of scanning the collection.
fn id_filter(query: &Query) -> Option<Vec<String>> {
    query.constraints.iter().find_map(|constraint| match constraint {
        Constraint::In { field, values } if field == DOCUMENT_ID => Some(
            values
                .iter()
                .filter_map(|value| value.as_str().map(str::to_string))
                .collect(),
        ),
        Constraint::Equals { field, value } if field == DOCUMENT_ID => {
            value.as_str().map(|id| vec![id.to_string()])
        }
        _ => None,
    })
}

/// Pushes the constraints the server can evaluate for a single ordered
/// field. Everything is re-checked locally by `Query::apply`.
fn server_params(query: &Query) -> Vec<(String, String)> {
    let ordered_field = query.constraints.iter().find_map(|constraint| match constraint {
        Constraint::Range { field, .. } | Constraint::OrderBy { field, .. } => Some(field.clone()),
        _ => None,
    });
    let Some(field) = ordered_field else {
        return Vec::new();
    };

    let mut params = vec![("orderBy".to_string(), json!(field).to_string())];
    for constraint in &query.constraints {
        if let Constraint::Range {
            field: range_field,
            op,
            value,
        } = constraint
        {
            if *range_field != field {
                continue;
            }
            let key = match op {
                RangeOp::Ge | RangeOp::Gt => "startAt",
                RangeOp::Le | RangeOp::Lt => "endAt",
            };
            params.push((key.to_string(), value.to_string()));
        }
    }
    params
}

fn check_status(response: Response) -> FeedResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let url = response.url().path().to_string();
    match status {
        StatusCode::NOT_FOUND => Err(FeedError::NotFound(url)),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            Err(FeedError::PermissionDenied(format!("{status} for {url}")))
        }
        _ => Err(FeedError::Backend(format!("{status} for {url}"))),
    }
}

impl DocumentStore for RestBackend {
    fn get_document(&self, collection: &str, id: &str) -> FeedResult<Option<Document>> {
        self.inner.get_document(collection, id)
    }

    fn get_collection(&self, query: &Query) -> FeedResult<Vec<Document>> {
        self.inner.get_collection(query)
    }

    /// Polls the query on a worker thread and reports a snapshot whenever
    /// the result changes.
    fn add_snapshot_listener(
        &self,
        query: Query,
        callback: SnapshotCallback,
    ) -> FeedResult<ListenerHandle> {
        query.validate()?;
        let handle = self.next_handle();
        let (stop_tx, stop_rx) = bounded::<()>(1);
        self.listeners.lock().insert(handle.0, stop_tx);

        let inner = self.inner.clone();
        let interval = self.poll_interval;
        thread::spawn(move || {
            let mut last: Option<Vec<Document>> = None;
            loop {
                match inner.get_collection(&query) {
                    Ok(docs) => {
                        if last.as_ref() != Some(&docs) {
                            last = Some(docs.clone());
                            callback(Ok(docs));
                        }
                    }
                    Err(err) => {
                        warn!(collection = %query.collection, error = %err, "snapshot poll failed");
                        callback(Err(err));
                    }
                }
                select! {
                    recv(stop_rx) -> _ => break,
                    recv(after(interval)) -> _ => {}
                }
            }
            debug!(collection = %query.collection, "snapshot listener stopped");
        });
        Ok(handle)
    }

    fn remove_snapshot_listener(&self, handle: ListenerHandle) {
        if let Some(stop) = self.listeners.lock().remove(&handle.0) {
            let _ = stop.try_send(());
        }
    }

    fn add_document(&self, collection: &str, data: Value) -> FeedResult<String> {
        #[derive(Deserialize)]
        struct Created {
            name: String,
        }
        let url = self.inner.document_url(collection);
        let value = self.inner.send_write(self.inner.http.post(url).json(&data))?;
        let created: Created = serde_json::from_value(value)?;
        Ok(created.name)
    }

    fn set_document(
        &self,
        collection: &str,
        id: &str,
        data: Value,
        merge: bool,
    ) -> FeedResult<()> {
        let url = self.inner.document_url(&format!("{collection}/{id}"));
        let request = if merge {
            self.inner.http.patch(url)
        } else {
            self.inner.http.put(url)
        };
        self.inner.send_write(request.json(&data))?;
        Ok(())
    }

    fn update_document(&self, collection: &str, id: &str, fields: Value) -> FeedResult<()> {
        if self.inner.get_document(collection, id)?.is_none() {
            return Err(FeedError::NotFound(format!("{collection}/{id}")));
        }
        let url = self.inner.document_url(&format!("{collection}/{id}"));
        self.inner.send_write(self.inner.http.patch(url).json(&fields))?;
        Ok(())
    }

    fn delete_document(&self, collection: &str, id: &str) -> FeedResult<()> {
        let url = self.inner.document_url(&format!("{collection}/{id}"));
        self.inner.send_write(self.inner.http.delete(url))?;
        Ok(())
    }

    /// Sent as one multi-path update, which the server applies atomically.
    fn write_batch(&self, ops: Vec<WriteOp>) -> FeedResult<()> {
        let updates = multi_path_update(ops);
        if updates.is_empty() {
            return Ok(());
        }
        let url = format!("{}/.json", self.inner.base_url);
        self.inner
            .send_write(self.inner.http.patch(url).json(&Value::Object(updates)))?;
        Ok(())
    }

    fn shutdown(&self) {
        for (_, stop) in self.listeners.lock().drain() {
            let _ = stop.try_send(());
        }
    }
}

fn multi_path_update(ops: Vec<WriteOp>) -> Map<String, Value> {
    let mut updates = Map::new();
    for op in ops {
        match op {
            WriteOp::Set {
                collection,
                id,
                data,
                merge: false,
            } => {
                updates.insert(format!("{collection}/{id}"), data);
            }
            WriteOp::Set {
                collection,
                id,
                data: fields,
                merge: true,
            }
            | WriteOp::Update {
                collection,
                id,
                fields,
            } => match fields {
                Value::Object(map) => {
                    for (key, value) in map {
                        updates.insert(format!("{collection}/{id}/{key}"), value);
                    }
                }
                other => {
                    updates.insert(format!("{collection}/{id}"), other);
                }
            },
            WriteOp::Delete { collection, id } => {
                updates.insert(format!("{collection}/{id}"), Value::Null);
            }
        }
    }
    updates
}

impl BlobStore for RestBackend {
    fn download_url(&self, path: &str) -> FeedResult<String> {
        #[derive(Deserialize)]
        struct ObjectMetadata {
            #[serde(default, rename = "downloadTokens")]
            download_tokens: String,
        }

        if self.inner.storage_bucket.is_empty() {
            return Err(FeedError::InvalidArgument("storage bucket not configured".into()));
        }
        let object_url = format!(
            "{STORAGE_API_BASE}/b/{}/o/{}",
            self.inner.storage_bucket,
            utf8_percent_encode(path, NON_ALPHANUMERIC)
        );
        let metadata: ObjectMetadata = check_status(
            self.inner
                .http
                .get(&object_url)
                .header(USER_AGENT, &self.inner.user_agent)
                .send()?,
        )?
        .json()?;
        let token = metadata.download_tokens.split(',').next().unwrap_or("").trim();
        if token.is_empty() {
            Ok(format!("{object_url}?alt=media"))
        } else {
            Ok(format!("{object_url}?alt=media&token={token}"))
        }
    }
}

impl AuthProvider for RestBackend {
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
        #[derive(Deserialize)]
        struct SignInResponse {
            #[serde(rename = "idToken")]
            id_token: String,
            #[serde(rename = "localId")]
            local_id: String,
            #[serde(default)]
            email: String,
            #[serde(default, rename = "displayName")]
            display_name: String,
        }

        let user = match provider {
            SignInProvider::Guest => User::guest(),
            SignInProvider::Google | SignInProvider::Apple => {
                return Err(FeedError::InvalidArgument(
                    "federated sign-in needs a browser; use email and password".into(),
                ))
            }
            SignInProvider::Password { email, password } => {
                if self.inner.api_key.is_empty() {
                    return Err(FeedError::InvalidArgument("backend api key not configured".into()));
                }
                let url = format!(
                    "{IDENTITY_API_BASE}/accounts:signInWithPassword?key={}",
                    self.inner.api_key
                );
                let response: SignInResponse = check_status(
                    self.inner
                        .http
                        .post(url)
                        .header(USER_AGENT, &self.inner.user_agent)
                        .json(&json!({
                            "email": email,
                            "password": password,
                            "returnSecureToken": true,
                        }))
                        .send()?,
                )?
                .json()?;
                *self.inner.auth_token.write() = response.id_token;
                match self.inner.get_document("Users", &response.local_id)? {
                    Some(doc) => doc.decode()?,
                    None => User {
                        id: response.local_id,
                        email: response.email,
                        display_name: response.display_name,
                        ..User::default()
                    },
                }
            }
        };
        self.set_user(Some(user.clone()));
        Ok(user)
    }

    fn sign_out(&self) -> FeedResult<()> {
        self.inner.auth_token.write().clear();
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
    use crate::query::Direction;

    #[test]
    fn requires_base_url_and_user_agent() {
        assert!(RestBackend::new(RestConfig::default()).is_err());
        let config = RestConfig {
            base_url: "https://example.firebaseio.test".into(),
            ..RestConfig::default()
        };
        assert!(RestBackend::new(config).is_err());

        let config = RestConfig {
            base_url: "ftp://example.test".into(),
            user_agent: "reelfeed-test".into(),
            ..RestConfig::default()
        };
        assert!(RestBackend::new(config).is_err());
    }

    #[test]
    fn range_query_pushes_bounds_for_the_ordered_field() {
        let query = Query::collection("locations")
            .where_eq("type", "restaurant")
            .where_range("geohash", RangeOp::Ge, "gc7x")
            .where_range("geohash", RangeOp::Le, "gc7y")
            .order_by("geohash", Direction::Asc);
        let params = server_params(&query);
        assert_eq!(
            params,
            vec![
                ("orderBy".to_string(), "\"geohash\"".to_string()),
                ("startAt".to_string(), "\"gc7x\"".to_string()),
                ("endAt".to_string(), "\"gc7y\"".to_string()),
            ]
        );
    }

    #[test]
    fn id_filters_are_fetched_directly() {
        let query = Query::collection("posts").where_in(DOCUMENT_ID, ["a", "b"]);
        assert_eq!(id_filter(&query), Some(vec!["a".to_string(), "b".to_string()]));
        assert_eq!(id_filter(&Query::collection("posts")), None);
    }

    #[test]
    fn batch_becomes_multi_path_update() {
        let updates = multi_path_update(vec![
            WriteOp::Set {
                collection: "postLikes".into(),
                id: "p1_u1".into(),
                data: json!({ "postID": "p1" }),
                merge: false,
            },
            WriteOp::Update {
                collection: "Users".into(),
                id: "u1".into(),
                fields: json!({ "blacklist": ["p1"] }),
            },
            WriteOp::Delete {
                collection: "savedPosts".into(),
                id: "s1".into(),
            },
        ]);
        assert_eq!(updates["postLikes/p1_u1"], json!({ "postID": "p1" }));
        assert_eq!(updates["Users/u1/blacklist"], json!(["p1"]));
        assert_eq!(updates["savedPosts/s1"], Value::Null);
    }
}
