//! Network Tasks
//!
//! Bookkeeping for one logical download per URL. Only the scheduler touches
//! these, always under its lock.

use crate::error::Result;
use crate::media::{CallerId, Image, Priority};
use crate::network::ProgressCallback;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Instant;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use url::Url;

// =============================================================================
// Task State
// =============================================================================

/// Lifecycle of a download task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    /// Waiting for a concurrency slot
    Queued,
    /// Transfer in progress
    Downloading,
    Completed,
    Failed,
    Cancelled,
}

impl TaskState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskState::Completed | TaskState::Failed | TaskState::Cancelled
        )
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskState::Queued => write!(f, "queued"),
            TaskState::Downloading => write!(f, "downloading"),
            TaskState::Completed => write!(f, "completed"),
            TaskState::Failed => write!(f, "failed"),
            TaskState::Cancelled => write!(f, "cancelled"),
        }
    }
}

// =============================================================================
// Waiter
// =============================================================================

/// One requester attached to a task
pub(crate) struct Waiter {
    pub caller: Option<CallerId>,
    pub progress: Option<ProgressCallback>,
    pub reply: oneshot::Sender<Result<Image>>,
}

impl Waiter {
    /// Deliver the terminal outcome; a dropped ticket is ignored
    pub fn complete(self, outcome: Result<Image>) {
        if let (Ok(_), Some(progress)) = (&outcome, &self.progress) {
            progress(1.0);
        }
        let _ = self.reply.send(outcome);
    }
}

// =============================================================================
// Network Task
// =============================================================================

/// One logical in-flight or queued download
pub(crate) struct NetworkTask {
    pub id: u64,
    pub url: Url,
    pub priority: Priority,
    pub persist: bool,
    pub state: TaskState,
    /// Attached requesters in attach order
    pub waiters: Vec<Waiter>,
    pub received: u64,
    pub expected: Option<u64>,
    pub last_fraction: f64,
    pub token: CancellationToken,
    pub created_at: Instant,
}

impl NetworkTask {
    pub fn new(id: u64, url: Url, priority: Priority, persist: bool, first: Waiter) -> Self {
        Self {
            id,
            url,
            priority,
            persist,
            state: TaskState::Queued,
            waiters: vec![first],
            received: 0,
            expected: None,
            last_fraction: 0.0,
            token: CancellationToken::new(),
            created_at: Instant::now(),
        }
    }

    /// Attach another requester, merging its priority and persist flag
    pub fn attach(&mut self, waiter: Waiter, priority: Priority, persist: bool) {
        self.priority = self.priority.max(priority);
        self.persist |= persist;
        self.waiters.push(waiter);
    }

    /// Detach every waiter belonging to `caller`, preserving the others' order
    pub fn detach_caller(&mut self, caller: CallerId) -> Vec<Waiter> {
        let (removed, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.waiters)
            .into_iter()
            .partition(|w| w.caller == Some(caller));
        self.waiters = kept;
        removed
    }

    /// Account for newly received bytes and return the current fraction
    pub fn advance(&mut self, bytes: u64) -> f64 {
        self.received += bytes;
        let fraction = match self.expected {
            Some(total) if total > 0 => (self.received as f64 / total as f64).clamp(0.0, 1.0),
            _ => 0.0,
        };
        // bytes only grow, but a short content-length must not move progress backwards
        let fraction = fraction.max(self.last_fraction);
        self.last_fraction = fraction;
        fraction
    }

    pub fn progress_callbacks(&self) -> Vec<ProgressCallback> {
        self.waiters.iter().filter_map(|w| w.progress.clone()).collect()
    }
}

/// A queued task waiting for a concurrency slot
#[derive(Debug, Clone)]
pub(crate) struct PendingDownloadRequest {
    pub key: String,
    pub task_id: u64,
    pub priority: Priority,
    pub enqueued_at: Instant,
}
