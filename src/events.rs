//! Media Events
//!
//! Events emitted by the manager for UI telemetry and monitoring, delivered
//! over a broadcast channel. Emitting never blocks and never fails the
//! emitter; receivers that fall behind lose the oldest events.

use crate::error::{Error, ErrorKind};
use crate::media::{Priority, ResolvedFrom};
use serde::Serialize;
use tokio::sync::broadcast;
use url::Url;

/// Events emitted by the media manager
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum MediaEvent {
    /// A resolution completed successfully
    Loaded { url: String, source: ResolvedFrom },

    /// A resolution ended in an error
    Failed {
        url: String,
        kind: ErrorKind,
        message: String,
    },

    /// Download progress, fraction in [0, 1]
    Progress { url: String, fraction: f64 },

    /// A network transfer is about to start
    WillStartDownload { url: String },

    /// An entry left the `high` cache tier
    Evicted {
        url: String,
        key: String,
        persisted: bool,
    },

    /// One cache tier (or both, when `tier` is `None`) was cleared
    CacheCleared {
        tier: Option<Priority>,
        entries_removed: usize,
    },

    /// Storage was wiped
    StorageCleared { ok: bool },

    /// The `low` tier was dropped in response to memory pressure
    MemoryPressure { entries_removed: usize },
}

impl MediaEvent {
    pub fn loaded(url: &Url, source: ResolvedFrom) -> Self {
        MediaEvent::Loaded {
            url: url.to_string(),
            source,
        }
    }

    pub fn failed(url: &Url, error: &Error) -> Self {
        MediaEvent::Failed {
            url: url.to_string(),
            kind: error.kind(),
            message: error.to_string(),
        }
    }

    pub fn progress(url: &Url, fraction: f64) -> Self {
        MediaEvent::Progress {
            url: url.to_string(),
            fraction,
        }
    }

    pub fn will_start_download(url: &Url) -> Self {
        MediaEvent::WillStartDownload {
            url: url.to_string(),
        }
    }

    /// Get the URL associated with this event (if any)
    pub fn url(&self) -> Option<&str> {
        match self {
            MediaEvent::Loaded { url, .. }
            | MediaEvent::Failed { url, .. }
            | MediaEvent::Progress { url, .. }
            | MediaEvent::WillStartDownload { url }
            | MediaEvent::Evicted { url, .. } => Some(url),
            _ => None,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, MediaEvent::Failed { .. })
    }
}

// =============================================================================
// Event Bus
// =============================================================================

/// Broadcast fan-out of [`MediaEvent`]s
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<MediaEvent>,
}

impl EventBus {
    /// Capacity is clamped to at least 1
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publish an event; dropped silently when nobody listens
    pub fn emit(&self, event: MediaEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MediaEvent> {
        self.tx.subscribe()
    }

    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}
