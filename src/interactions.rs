//! Member actions on a post: save, share, report and hide.
//!
//! Guests are refused with [`FeedError::GuestAction`] before anything is
//! written. Write failures are returned to the caller and never retried.
//! Save counts are read through a snapshot listener, never on redraw.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::Utc;
use crossbeam_channel::{unbounded, Receiver};
use serde_json::json;
use tracing::{debug, info, warn};

use crate::auth::{Session, USERS_COLLECTION};
use crate::backend::{Document, DocumentStore, ListenerHandle, SnapshotCallback};
use crate::error::{FeedError, FeedResult};
use crate::model::{Like, Post};
use crate::query::Query;
use crate::storage::Store;
use crate::telemetry::{TelemetryEvent, TelemetrySink};

pub const LIKES_COLLECTION: &str = "postLikes";
pub const REPORTS_COLLECTION: &str = "reportedPosts";
pub const SHARE_BASE_URL: &str = "https://app.gontrel.com/location";

pub fn share_link(post: &Post) -> FeedResult<String> {
    if post.location_id.trim().is_empty() {
        return Err(FeedError::InvalidArgument(format!(
            "post {} has no location to share",
            post.id
        )));
    }
    Ok(format!("{SHARE_BASE_URL}/{}", post.location_id))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportOutcome {
    pub report_id: String,
    pub blacklisted: bool,
    /// Set when the report was filed but hiding the post failed.
    pub hide_failure: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SaveState {
    pub saves: usize,
    pub saved: bool,
}

/// Live save count for one post. Dropping it removes the listener.
pub struct SaveWatch {
    post_id: String,
    documents: Arc<dyn DocumentStore>,
    handle: ListenerHandle,
    updates: Receiver<FeedResult<SaveState>>,
    state: SaveState,
}

impl SaveWatch {
    pub fn post_id(&self) -> &str {
        &self.post_id
    }

    pub fn state(&self) -> SaveState {
        self.state
    }

    /// Applies snapshots delivered since the last call. Returns true when
    /// the state changed.
    pub fn poll(&mut self) -> bool {
        let mut changed = false;
        while let Ok(update) = self.updates.try_recv() {
            match update {
                Ok(state) if state != self.state => {
                    self.state = state;
                    changed = true;
                }
                Ok(_) => {}
                Err(err) => debug!(post_id = %self.post_id, error = %err, "save snapshot failed"),
            }
        }
        changed
    }
}

impl Drop for SaveWatch {
    fn drop(&mut self) {
        self.documents.remove_snapshot_listener(self.handle);
    }
}

fn save_state(docs: &[Document], user_id: Option<&str>) -> SaveState {
    let likes: Vec<Like> = docs.iter().filter_map(|doc| doc.decode().ok()).collect();
    SaveState {
        saves: likes.len(),
        saved: user_id.is_some_and(|id| likes.iter().any(|like| like.user_id == id)),
    }
}

pub struct Interactions {
    documents: Arc<dyn DocumentStore>,
    session: Arc<Session>,
    telemetry: Arc<dyn TelemetrySink>,
    local: Option<Arc<Store>>,
}

impl Interactions {
    pub fn new(
        documents: Arc<dyn DocumentStore>,
        session: Arc<Session>,
        telemetry: Arc<dyn TelemetrySink>,
        local: Option<Arc<Store>>,
    ) -> Self {
        Self {
            documents,
            session,
            telemetry,
            local,
        }
    }

    /// Returns the new saved state.
    pub fn toggle_save(&self, post_id: &str) -> FeedResult<bool> {
        let user = self.session.require_member()?;
        let id = Like::document_id(post_id, &user.id);
        if self.documents.get_document(LIKES_COLLECTION, &id)?.is_some() {
            self.documents.delete_document(LIKES_COLLECTION, &id)?;
            debug!(post_id, "post unsaved");
            return Ok(false);
        }
        let like = Like {
            id: id.clone(),
            post_id: post_id.to_string(),
            user_id: user.id,
            created_at: Utc::now(),
        };
        self.documents
            .set_document(LIKES_COLLECTION, &id, serde_json::to_value(&like)?, false)?;
        debug!(post_id, "post saved");
        Ok(true)
    }

    /// Subscribes to the likes of `post_id`. Guests see the count but never
    /// a saved flag.
    pub fn watch_saves(&self, post_id: &str) -> FeedResult<SaveWatch> {
        let user_id = (!self.session.is_guest()).then(|| self.session.user_id());
        let (tx, updates) = unbounded();
        let callback: SnapshotCallback = Arc::new(move |snapshot: FeedResult<Vec<Document>>| {
            let _ = tx.send(snapshot.map(|docs| save_state(&docs, user_id.as_deref())));
        });
        let query = Query::collection(LIKES_COLLECTION).where_eq("postID", post_id);
        let handle = self.documents.add_snapshot_listener(query, callback)?;
        let mut watch = SaveWatch {
            post_id: post_id.to_string(),
            documents: Arc::clone(&self.documents),
            handle,
            updates,
            state: SaveState::default(),
        };
        watch.poll();
        Ok(watch)
    }

    /// The link to copy. Open to guests.
    pub fn share(&self, post: &Post) -> FeedResult<String> {
        let link = share_link(post)?;
        self.telemetry.record(TelemetryEvent::Shared {
            post_id: post.id.clone(),
        });
        Ok(link)
    }

    /// Files a report and, when asked, hides the post from this user.
    pub fn report(&self, post_id: &str, hide: bool) -> FeedResult<ReportOutcome> {
        let user = self.session.require_member()?;
        let report_id = self.documents.add_document(
            REPORTS_COLLECTION,
            json!({
                "userID": user.id,
                "postID": post_id,
                "createdAt": Utc::now(),
            }),
        )?;
        info!(post_id, report_id = %report_id, "post reported");
        self.telemetry.record(TelemetryEvent::Reported {
            post_id: post_id.to_string(),
        });

        let mut outcome = ReportOutcome {
            report_id,
            blacklisted: false,
            hide_failure: None,
        };
        if hide {
            match self.blacklist(post_id) {
                Ok(()) => outcome.blacklisted = true,
                Err(err) => {
                    warn!(post_id, error = %err, "report filed but hiding failed");
                    outcome.hide_failure = Some(err.to_string());
                }
            }
        }
        Ok(outcome)
    }

    /// Adds the post to the member's blacklist on the profile document and
    /// in the local store.
    pub fn blacklist(&self, post_id: &str) -> FeedResult<()> {
        let user = self.session.require_member()?;
        if user.blacklist.iter().any(|id| id == post_id) {
            return Ok(());
        }
        let mut next = user.blacklist.clone();
        next.push(post_id.to_string());
        self.documents
            .update_document(USERS_COLLECTION, &user.id, json!({ "blacklist": next }))?;
        self.session.update(|user| user.blacklist = next);

        if let Some(local) = &self.local {
            if let Err(err) = local.add_blacklisted(post_id) {
                debug!(post_id, error = %err, "local blacklist write failed");
            }
        }
        Ok(())
    }

    /// Union of the profile blacklist and the local one.
    pub fn blacklisted_ids(&self) -> Vec<String> {
        let mut ids: BTreeSet<String> = self.session.user().blacklist.into_iter().collect();
        if let Some(local) = &self.local {
            match local.blacklisted_ids() {
                Ok(stored) => ids.extend(stored),
                Err(err) => debug!(error = %err, "local blacklist unreadable"),
            }
        }
        ids.into_iter().collect()
    }
}
