//! Signed-in user tracking. Without a signed-in account the session holds
//! the guest user, and member-only actions are refused before any backend
//! call is made.

use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info};

use crate::backend::{AuthProvider, DocumentStore, ListenerHandle, SignInProvider};
use crate::error::{FeedError, FeedResult};
use crate::model::User;

pub const USERS_COLLECTION: &str = "Users";

pub struct Session {
    provider: Arc<dyn AuthProvider>,
    user: Arc<RwLock<User>>,
    listener: ListenerHandle,
}

impl Session {
    /// Follows the provider's auth state from now on.
    pub fn new(provider: Arc<dyn AuthProvider>) -> Self {
        let initial = provider.current_user().unwrap_or_else(User::guest);
        let user = Arc::new(RwLock::new(initial));
        let shared = Arc::clone(&user);
        let listener = provider.add_listener(Arc::new(move |next: Option<User>| {
            let next = next.unwrap_or_else(User::guest);
            debug!(user_id = %next.id, guest = next.is_guest(), "auth state changed");
            *shared.write() = next;
        }));
        Self {
            provider,
            user,
            listener,
        }
    }

    pub fn user(&self) -> User {
        self.user.read().clone()
    }

    pub fn user_id(&self) -> String {
        self.user.read().id.clone()
    }

    pub fn is_guest(&self) -> bool {
        self.user.read().is_guest()
    }

    pub fn sign_in(&self, provider: SignInProvider) -> FeedResult<User> {
        let user = self.provider.sign_in(provider)?;
        info!(user_id = %user.id, guest = user.is_guest(), "signed in");
        *self.user.write() = user.clone();
        Ok(user)
    }

    pub fn sign_out(&self) -> FeedResult<()> {
        self.provider.sign_out()?;
        *self.user.write() = User::guest();
        info!("signed out");
        Ok(())
    }

    /// The signed-in member, or [`FeedError::GuestAction`] for guests.
    pub fn require_member(&self) -> FeedResult<User> {
        let user = self.user();
        if user.is_guest() {
            return Err(FeedError::GuestAction);
        }
        Ok(user)
    }

    /// Re-reads the member's profile document, picking up server-side
    /// changes such as the blacklist.
    pub fn reload(&self, store: &dyn DocumentStore) -> FeedResult<User> {
        let current = self.require_member()?;
        let Some(doc) = store.get_document(USERS_COLLECTION, &current.id)? else {
            return Ok(current);
        };
        let user: User = doc.decode()?;
        *self.user.write() = user.clone();
        Ok(user)
    }

    /// Applies a local change to the cached user.
    pub fn update(&self, f: impl FnOnce(&mut User)) {
        f(&mut self.user.write());
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.provider.remove_listener(self.listener);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryBackend;
    use serde_json::json;

    fn member(id: &str) -> User {
        User {
            id: id.into(),
            username: id.into(),
            ..User::default()
        }
    }

    #[test]
    fn starts_as_guest_and_refuses_member_actions() {
        let memory = Arc::new(MemoryBackend::new());
        let session = Session::new(memory);
        assert!(session.is_guest());
        assert_eq!(session.user_id(), "guest");
        assert_eq!(session.require_member(), Err(FeedError::GuestAction));
    }

    #[test]
    fn password_sign_in_and_out() {
        let memory = Arc::new(MemoryBackend::new());
        memory.register_account("ana@example.com", "pw", member("u1"));
        let session = Session::new(memory.clone());

        let bad = session.sign_in(SignInProvider::Password {
            email: "ana@example.com".into(),
            password: "nope".into(),
        });
        assert!(matches!(bad, Err(FeedError::PermissionDenied(_))));
        assert!(session.is_guest());

        session
            .sign_in(SignInProvider::Password {
                email: "ana@example.com".into(),
                password: "pw".into(),
            })
            .unwrap();
        assert_eq!(session.require_member().unwrap().id, "u1");

        session.sign_out().unwrap();
        assert!(session.is_guest());
    }

    #[test]
    fn follows_provider_state_changes() {
        let memory = Arc::new(MemoryBackend::new());
        memory.set_federated_user(member("g1"));
        let session = Session::new(memory.clone());
        memory.sign_in(SignInProvider::Google).unwrap();
        assert_eq!(session.user_id(), "g1");
        memory.sign_out().unwrap();
        assert!(session.is_guest());
    }

    #[test]
    fn reload_reads_profile_document() {
        let memory = Arc::new(MemoryBackend::new());
        memory.register_account("b@example.com", "pw", member("u2"));
        memory
            .insert(USERS_COLLECTION, "u2", json!({ "username": "bee", "blacklist": ["p9"] }))
            .unwrap();
        let session = Session::new(memory.clone());
        session
            .sign_in(SignInProvider::Password {
                email: "b@example.com".into(),
                password: "pw".into(),
            })
            .unwrap();
        let user = session.reload(memory.as_ref()).unwrap();
        assert_eq!(user.blacklist, vec!["p9"]);
        assert_eq!(session.user().username, "bee");
    }
}
