use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use crate::error::{FeedError, FeedResult};

/// Shared abort flag handed to every fetch. Cloning shares the flag.
#[derive(Clone, Debug, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Returns `FeedError::Cancelled` once the token has been signalled.
    pub fn check(&self) -> FeedResult<()> {
        if self.is_cancelled() {
            return Err(FeedError::Cancelled);
        }
        Ok(())
    }

    /// A token that is cancelled when either `self` or the returned child is
    /// cancelled through `self`. Cancelling the child leaves the parent alone.
    pub fn child(&self) -> ChildToken {
        ChildToken {
            parent: self.clone(),
            own: CancellationToken::new(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct ChildToken {
    parent: CancellationToken,
    own: CancellationToken,
}

impl ChildToken {
    pub fn cancel(&self) {
        self.own.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.own.is_cancelled() || self.parent.is_cancelled()
    }

    pub fn check(&self) -> FeedResult<()> {
        if self.is_cancelled() {
            return Err(FeedError::Cancelled);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_the_flag() {
        let token = CancellationToken::new();
        let clone = token.clone();
        assert!(token.check().is_ok());
        clone.cancel();
        assert!(token.is_cancelled());
        assert_eq!(token.check(), Err(FeedError::Cancelled));
    }

    #[test]
    fn child_follows_parent_but_not_the_reverse() {
        let parent = CancellationToken::new();
        let child = parent.child();
        child.cancel();
        assert!(child.is_cancelled());
        assert!(!parent.is_cancelled());

        let other = parent.child();
        parent.cancel();
        assert!(other.is_cancelled());
    }
}
