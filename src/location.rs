//! Device position with a bounded wait. A high-accuracy request that times
//! out or fails falls back to a low-accuracy one, then to a fixed
//! coordinate. Permission denial is reported, never papered over.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{bounded, RecvTimeoutError};
use tracing::{debug, warn};

use crate::error::{FeedError, FeedResult};
use crate::model::Coordinates;
use crate::storage::Store;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
pub const FALLBACK_COORDINATES: Coordinates = Coordinates {
    lat: 53.324319,
    lng: -6.253127,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Accuracy {
    High,
    Low,
}

pub trait PositionProvider: Send + Sync {
    /// May block. The caller bounds the wait.
    fn current_position(&self, accuracy: Accuracy) -> FeedResult<Coordinates>;
}

/// Where a resolved position came from.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Fix {
    Precise(Coordinates),
    Coarse(Coordinates),
    Fallback(Coordinates),
}

impl Fix {
    pub fn coordinates(&self) -> Coordinates {
        match self {
            Fix::Precise(c) | Fix::Coarse(c) | Fix::Fallback(c) => *c,
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, Fix::Fallback(_))
    }
}

pub struct LocationResolver {
    provider: Arc<dyn PositionProvider>,
    timeout: Duration,
    fallback: Coordinates,
}

impl LocationResolver {
    pub fn new(provider: Arc<dyn PositionProvider>, timeout: Duration, fallback: Coordinates) -> Self {
        Self {
            provider,
            timeout,
            fallback,
        }
    }

    pub fn resolve(&self) -> FeedResult<Fix> {
        match self.request(Accuracy::High) {
            Ok(position) => return Ok(Fix::Precise(position)),
            Err(err @ FeedError::PermissionDenied(_)) => return Err(err),
            Err(err) => warn!(error = %err, "precise location unavailable"),
        }
        match self.request(Accuracy::Low) {
            Ok(position) => Ok(Fix::Coarse(position)),
            Err(err @ FeedError::PermissionDenied(_)) => Err(err),
            Err(err) => {
                warn!(error = %err, "using fallback location");
                Ok(Fix::Fallback(self.fallback))
            }
        }
    }

    fn request(&self, accuracy: Accuracy) -> FeedResult<Coordinates> {
        let (tx, rx) = bounded(1);
        let provider = Arc::clone(&self.provider);
        thread::spawn(move || {
            let _ = tx.send(provider.current_position(accuracy));
        });
        match rx.recv_timeout(self.timeout) {
            Ok(result) => result,
            Err(RecvTimeoutError::Timeout) => {
                debug!(?accuracy, timeout = ?self.timeout, "location request timed out");
                Err(FeedError::LocationTimeout)
            }
            Err(RecvTimeoutError::Disconnected) => Err(FeedError::LocationUnavailable(
                "location provider stopped".into(),
            )),
        }
    }
}

/// Position from configuration, with the last stored position answering
/// low-accuracy requests.
pub struct ConfiguredPosition {
    fixed: Option<Coordinates>,
    store: Option<Arc<Store>>,
}

impl ConfiguredPosition {
    pub fn new(fixed: Option<Coordinates>, store: Option<Arc<Store>>) -> Self {
        Self { fixed, store }
    }
}

impl PositionProvider for ConfiguredPosition {
    fn current_position(&self, accuracy: Accuracy) -> FeedResult<Coordinates> {
        if let Some(fixed) = self.fixed {
            return Ok(fixed);
        }
        if accuracy == Accuracy::Low {
            if let Some(store) = &self.store {
                match store.last_location() {
                    Ok(Some(last)) => return Ok(last),
                    Ok(None) => {}
                    Err(err) => debug!(error = %err, "last location unreadable"),
                }
            }
        }
        Err(FeedError::LocationUnavailable("no position configured".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    struct Scripted {
        high: FeedResult<Coordinates>,
        low: FeedResult<Coordinates>,
        delay: Duration,
        calls: Mutex<Vec<Accuracy>>,
    }

    impl Scripted {
        fn new(high: FeedResult<Coordinates>, low: FeedResult<Coordinates>) -> Self {
            Self {
                high,
                low,
                delay: Duration::ZERO,
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    impl PositionProvider for Scripted {
        fn current_position(&self, accuracy: Accuracy) -> FeedResult<Coordinates> {
            self.calls.lock().push(accuracy);
            if accuracy == Accuracy::High && !self.delay.is_zero() {
                thread::sleep(self.delay);
            }
            match accuracy {
                Accuracy::High => self.high.clone(),
                Accuracy::Low => self.low.clone(),
            }
        }
    }

    const LONDON: Coordinates = Coordinates {
        lat: 51.5072,
        lng: -0.1276,
    };

    fn resolver(provider: Arc<Scripted>, timeout: Duration) -> LocationResolver {
        LocationResolver::new(provider, timeout, FALLBACK_COORDINATES)
    }

    #[test]
    fn precise_fix_wins() {
        let provider = Arc::new(Scripted::new(Ok(LONDON), Ok(FALLBACK_COORDINATES)));
        let fix = resolver(provider.clone(), DEFAULT_TIMEOUT).resolve().unwrap();
        assert_eq!(fix, Fix::Precise(LONDON));
        assert_eq!(*provider.calls.lock(), vec![Accuracy::High]);
    }

    #[test]
    fn timeout_falls_back_to_coarse_request() {
        let mut scripted = Scripted::new(Ok(FALLBACK_COORDINATES), Ok(LONDON));
        scripted.delay = Duration::from_millis(300);
        let provider = Arc::new(scripted);
        let fix = resolver(provider, Duration::from_millis(30)).resolve().unwrap();
        assert_eq!(fix, Fix::Coarse(LONDON));
    }

    #[test]
    fn unavailable_everywhere_uses_fallback_coordinate() {
        let provider = Arc::new(Scripted::new(
            Err(FeedError::LocationUnavailable("no gps".into())),
            Err(FeedError::LocationTimeout),
        ));
        let fix = resolver(provider, DEFAULT_TIMEOUT).resolve().unwrap();
        assert!(fix.is_fallback());
        assert_eq!(fix.coordinates(), Coordinates::new(53.324319, -6.253127));
    }

    #[test]
    fn permission_denied_is_reported() {
        let provider = Arc::new(Scripted::new(
            Err(FeedError::PermissionDenied("location".into())),
            Ok(LONDON),
        ));
        let err = resolver(provider.clone(), DEFAULT_TIMEOUT)
            .resolve()
            .unwrap_err();
        assert!(matches!(err, FeedError::PermissionDenied(_)));
        assert!(err.is_user_actionable());
        assert_eq!(provider.calls.lock().len(), 1);
    }

    #[test]
    fn configured_position_uses_stored_location_for_coarse_requests() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        store.save_last_location(LONDON).unwrap();
        let provider = ConfiguredPosition::new(None, Some(store));
        assert!(provider.current_position(Accuracy::High).is_err());
        assert_eq!(provider.current_position(Accuracy::Low).unwrap(), LONDON);

        let fixed = ConfiguredPosition::new(Some(FALLBACK_COORDINATES), None);
        assert_eq!(
            fixed.current_position(Accuracy::High).unwrap(),
            FALLBACK_COORDINATES
        );
    }
}
