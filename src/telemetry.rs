//! Fire-and-forget analytics. Sinks never block the caller and losing an
//! event is acceptable.

use std::sync::Arc;
use std::thread;

use chrono::Utc;
use crossbeam_channel::{bounded, Sender, TrySendError};
use parking_lot::Mutex;
use serde_json::json;
use tracing::{debug, info};

use crate::backend::DocumentStore;

pub const ANALYTICS_COLLECTION: &str = "analyticsEvents";
const QUEUE_DEPTH: usize = 256;

#[derive(Debug, Clone, PartialEq)]
pub enum TelemetryEvent {
    Viewed { post_id: String },
    WatchDuration { post_id: String, seconds: f64 },
    Shared { post_id: String },
    Reported { post_id: String },
}

impl TelemetryEvent {
    pub fn name(&self) -> &'static str {
        match self {
            TelemetryEvent::Viewed { .. } => "viewed",
            TelemetryEvent::WatchDuration { .. } => "watch_duration",
            TelemetryEvent::Shared { .. } => "share",
            TelemetryEvent::Reported { .. } => "report",
        }
    }

    pub fn post_id(&self) -> &str {
        match self {
            TelemetryEvent::Viewed { post_id }
            | TelemetryEvent::WatchDuration { post_id, .. }
            | TelemetryEvent::Shared { post_id }
            | TelemetryEvent::Reported { post_id } => post_id,
        }
    }
}

pub trait TelemetrySink: Send + Sync {
    fn record(&self, event: TelemetryEvent);
}

/// Writes events to the log only.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl TelemetrySink for LogSink {
    fn record(&self, event: TelemetryEvent) {
        info!(target: "telemetry", name = event.name(), post_id = event.post_id(), detail = ?event, "telemetry event");
    }
}

/// Keeps every event in memory.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<TelemetryEvent>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<TelemetryEvent> {
        self.events.lock().clone()
    }

    pub fn count(&self, name: &str) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|event| event.name() == name)
            .count()
    }
}

impl TelemetrySink for RecordingSink {
    fn record(&self, event: TelemetryEvent) {
        self.events.lock().push(event);
    }
}

/// Queues events to a worker that stores them as documents. Events are
/// dropped when the queue is full or the write fails.
pub struct BackgroundSink {
    tx: Sender<TelemetryEvent>,
}

impl BackgroundSink {
    pub fn spawn(store: Arc<dyn DocumentStore>, user_id: impl Into<String>) -> Self {
        let (tx, rx) = bounded::<TelemetryEvent>(QUEUE_DEPTH);
        let user_id = user_id.into();
        thread::spawn(move || {
            for event in rx.iter() {
                let mut document = json!({
                    "name": event.name(),
                    "postID": event.post_id(),
                    "userID": user_id,
                    "createdAt": Utc::now(),
                });
                if let TelemetryEvent::WatchDuration { seconds, .. } = &event {
                    document["seconds"] = json!(seconds);
                }
                if let Err(err) = store.add_document(ANALYTICS_COLLECTION, document) {
                    debug!(error = %err, event = event.name(), "dropped telemetry event");
                }
            }
        });
        Self { tx }
    }
}

impl TelemetrySink for BackgroundSink {
    fn record(&self, event: TelemetryEvent) {
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) | Err(TrySendError::Disconnected(event)) => {
                debug!(event = event.name(), "telemetry queue unavailable");
            }
        }
    }
}
