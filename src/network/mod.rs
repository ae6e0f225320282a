//! Download Scheduler
//!
//! Bounded-concurrency, deduplicated downloads with progress and completion
//! fan-out to every requester of the same URL.
//!
//! # Architecture
//!
//! ```text
//! request(url) ──► ┌──────────────────────────────────────────┐
//!                  │ NetworkAgent (one parking_lot::Mutex)    │
//!                  │  tasks:   url → NetworkTask {waiters...} │
//!                  │  pending: FIFO of queued task ids        │
//!                  │  active:  running transfer count         │
//!                  └───────────────┬──────────────────────────┘
//!                                  │ admit (active < max)
//!                                  ▼
//!                  transfer task: Transport::open → chunks → decode
//!                                  │
//!                                  ▼
//!                  DownloadSink (write-back) → fan-out to waiters
//! ```

mod agent;
mod task;
mod transport;

pub use agent::{DownloadRequest, DownloadTicket, NetworkAgent, NetworkAgentConfig};
pub use task::TaskState;
pub use transport::{ByteStream, HttpTransport, Transport};

use crate::media::{Image, Priority};
use std::sync::Arc;
use url::Url;

/// Per-requester progress callback, fraction in [0, 1]
pub type ProgressCallback = Arc<dyn Fn(f64) + Send + Sync>;

/// Write-back hook run with each downloaded image before waiters are notified
///
/// `priority` and `persist` are the merged values of every requester attached
/// to the transfer.
pub trait DownloadSink: Send + Sync {
    fn on_downloaded(&self, url: &Url, image: &Image, priority: Priority, persist: bool);
}
