//! Network Agent
//!
//! Deduplicating download scheduler. Every URL maps to at most one task;
//! additional requesters attach as waiters. Tasks beyond the concurrency
//! limit queue in strict arrival order regardless of priority.

use crate::config::NetworkConfig;
use crate::error::{Error, Result};
use crate::events::{EventBus, MediaEvent};
use crate::media::{CallerId, Image, Priority};
use crate::network::task::{NetworkTask, PendingDownloadRequest, TaskState, Waiter};
use crate::network::transport::{ByteStream, Transport};
use crate::network::{DownloadSink, ProgressCallback};
use crate::providers::CompressionProvider;
use bytes::BytesMut;
use futures::StreamExt;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

/// Upper bound on the buffer preallocated from a declared content length
const MAX_PREALLOCATION: u64 = 16 * 1024 * 1024;

// =============================================================================
// Configuration
// =============================================================================

/// Scheduler limits
#[derive(Debug, Clone)]
pub struct NetworkAgentConfig {
    /// Transfers running at once (at least 1)
    pub max_concurrent_downloads: usize,
    /// Queued tasks older than this fail with a timeout instead of starting
    pub queue_timeout: Option<Duration>,
}

impl Default for NetworkAgentConfig {
    fn default() -> Self {
        Self::from(&NetworkConfig::default())
    }
}

impl From<&NetworkConfig> for NetworkAgentConfig {
    fn from(config: &NetworkConfig) -> Self {
        Self {
            max_concurrent_downloads: config.max_concurrent_downloads,
            queue_timeout: config.queue_timeout(),
        }
    }
}

// =============================================================================
// Requests and Tickets
// =============================================================================

/// A request for one URL
#[derive(Clone)]
pub struct DownloadRequest {
    pub url: Url,
    pub priority: Priority,
    pub persist: bool,
    pub caller: Option<CallerId>,
    pub progress: Option<ProgressCallback>,
}

impl DownloadRequest {
    pub fn new(url: Url) -> Self {
        Self {
            url,
            priority: Priority::Low,
            persist: true,
            caller: None,
            progress: None,
        }
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn persist(mut self, persist: bool) -> Self {
        self.persist = persist;
        self
    }

    pub fn caller(mut self, caller: CallerId) -> Self {
        self.caller = Some(caller);
        self
    }

    pub fn progress(mut self, progress: ProgressCallback) -> Self {
        self.progress = Some(progress);
        self
    }
}

impl std::fmt::Debug for DownloadRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloadRequest")
            .field("url", &self.url.as_str())
            .field("priority", &self.priority)
            .field("persist", &self.persist)
            .field("caller", &self.caller)
            .field("progress", &self.progress.is_some())
            .finish()
    }
}

/// Resolves to the terminal outcome of a download for one requester
#[must_use = "a ticket does nothing unless awaited"]
pub struct DownloadTicket {
    url: Url,
    rx: oneshot::Receiver<Result<Image>>,
}

impl DownloadTicket {
    pub fn url(&self) -> &Url {
        &self.url
    }
}

impl Future for DownloadTicket {
    type Output = Result<Image>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(outcome)) => Poll::Ready(outcome),
            // sender dropped without a reply: the task was torn down
            Poll::Ready(Err(_)) => Poll::Ready(Err(Error::cancelled(&self.url))),
            Poll::Pending => Poll::Pending,
        }
    }
}

// =============================================================================
// Scheduler State
// =============================================================================

#[derive(Default)]
struct SchedulerState {
    /// Live tasks keyed by URL string
    tasks: HashMap<String, NetworkTask>,
    /// Queued task ids in arrival order
    pending: VecDeque<PendingDownloadRequest>,
    /// Transfers holding a slot, including ones winding down after cancel
    active: usize,
}

/// Result of filling free slots from the queue
#[derive(Default)]
struct Admission {
    started: Vec<(Url, u64, CancellationToken)>,
    expired: Vec<(NetworkTask, Duration)>,
}

struct Shared {
    state: Mutex<SchedulerState>,
    transport: Arc<dyn Transport>,
    codec: Arc<dyn CompressionProvider>,
    sink: Option<Arc<dyn DownloadSink>>,
    events: EventBus,
    max_concurrent: usize,
    queue_timeout: Option<Duration>,
    next_task_id: AtomicU64,
    transfers: AtomicU64,
}

impl Shared {
    /// Pop queued tasks into free slots; stale entries are skipped and expired
    /// ones are handed back for failure outside the lock
    fn admit(&self, state: &mut SchedulerState) -> Admission {
        let mut admission = Admission::default();
        let now = Instant::now();

        while state.active < self.max_concurrent {
            let Some(pending) = state.pending.pop_front() else {
                break;
            };
            let live = state
                .tasks
                .get(&pending.key)
                .map_or(false, |t| t.id == pending.task_id && t.state == TaskState::Queued);
            if !live {
                continue;
            }

            let waited = now.saturating_duration_since(pending.enqueued_at);
            if self.queue_timeout.map_or(false, |limit| waited >= limit) {
                if let Some(task) = state.tasks.remove(&pending.key) {
                    admission.expired.push((task, waited));
                }
                continue;
            }

            if let Some(task) = state.tasks.get_mut(&pending.key) {
                task.state = TaskState::Downloading;
                state.active += 1;
                debug!(url = %task.url, priority = %pending.priority, "Dequeued download");
                admission
                    .started
                    .push((task.url.clone(), task.id, task.token.clone()));
            }
        }

        admission
    }

    fn apply(self: &Arc<Self>, admission: Admission) {
        for (task, waited) in admission.expired {
            fail_expired(task, waited);
        }
        for (url, id, token) in admission.started {
            self.start_transfer(url, id, token);
        }
    }

    fn start_transfer(self: &Arc<Self>, url: Url, id: u64, token: CancellationToken) {
        self.events.emit(MediaEvent::will_start_download(&url));
        debug!(url = %url, task = id, "Starting download");

        let shared = self.clone();
        tokio::spawn(async move {
            let outcome = tokio::select! {
                _ = token.cancelled() => Err(Error::cancelled(&url)),
                result = shared.fetch(id, &url) => result,
            };
            shared.finish(id, url, outcome);
        });
    }

    async fn fetch(&self, id: u64, url: &Url) -> Result<Image> {
        self.transfers.fetch_add(1, Ordering::Relaxed);
        let ByteStream {
            content_length,
            mut chunks,
        } = self.transport.open(url).await?;

        self.with_task(url, id, |task| task.expected = content_length);

        let capacity = content_length.unwrap_or(0).min(MAX_PREALLOCATION) as usize;
        let mut buffer = BytesMut::with_capacity(capacity);
        while let Some(chunk) = chunks.next().await {
            let chunk = chunk?;
            buffer.extend_from_slice(&chunk);
            self.report_progress(url, id, chunk.len() as u64);
        }

        if buffer.is_empty() {
            return Err(Error::DecodeFailed {
                url: url.to_string(),
                reason: "empty response body".into(),
            });
        }

        let codec = self.codec.clone();
        let bytes = buffer.freeze();
        let len = bytes.len();
        let decoded = tokio::task::spawn_blocking(move || codec.decode(&bytes))
            .await
            .map_err(|e| Error::Unknown(format!("decode task failed: {}", e)))?;

        decoded.ok_or_else(|| Error::DecodeFailed {
            url: url.to_string(),
            reason: format!("{} bytes are not a supported image", len),
        })
    }

    fn with_task<R>(&self, url: &Url, id: u64, f: impl FnOnce(&mut NetworkTask) -> R) -> Option<R> {
        let mut state = self.state.lock();
        state
            .tasks
            .get_mut(url.as_str())
            .filter(|t| t.id == id)
            .map(f)
    }

    fn report_progress(&self, url: &Url, id: u64, bytes: u64) {
        let update = self.with_task(url, id, |task| {
            let previous = task.last_fraction;
            let fraction = task.advance(bytes);
            (fraction, fraction > previous, task.progress_callbacks())
        });

        if let Some((fraction, changed, callbacks)) = update {
            for callback in callbacks {
                callback(fraction);
            }
            if changed {
                self.events.emit(MediaEvent::progress(url, fraction));
            }
        }
    }

    /// Release the slot, write back, then notify every waiter attached now
    fn finish(self: &Arc<Self>, id: u64, url: Url, outcome: Result<Image>) {
        if let Ok(image) = &outcome {
            let merged = self.with_task(&url, id, |task| (task.priority, task.persist));
            if let (Some((priority, persist)), Some(sink)) = (merged, &self.sink) {
                sink.on_downloaded(&url, image, priority, persist);
            }
        }

        let (task, admission) = {
            let mut state = self.state.lock();
            state.active = state.active.saturating_sub(1);
            let owned = state
                .tasks
                .get(url.as_str())
                .map_or(false, |t| t.id == id);
            let task = if owned {
                state.tasks.remove(url.as_str())
            } else {
                None
            };
            let admission = self.admit(&mut state);
            (task, admission)
        };

        match task {
            Some(mut task) => {
                task.state = match &outcome {
                    Ok(_) => TaskState::Completed,
                    Err(e) if e.is_cancelled() => TaskState::Cancelled,
                    Err(_) => TaskState::Failed,
                };
                match &outcome {
                    Ok(_) => {
                        self.events.emit(MediaEvent::progress(&url, 1.0));
                        debug!(url = %url, waiters = task.waiters.len(), "Download completed");
                    }
                    Err(e) => {
                        warn!(url = %url, waiters = task.waiters.len(), error = %e, "Download failed");
                    }
                }
                for waiter in task.waiters {
                    waiter.complete(outcome.clone());
                }
            }
            None => debug!(url = %url, task = id, "Transfer ended after teardown"),
        }

        self.apply(admission);
    }

    /// Fail a still-queued task whose wait exceeded the queue timeout
    fn expire(self: &Arc<Self>, key: &str, id: u64) {
        let task = {
            let mut state = self.state.lock();
            let queued = state
                .tasks
                .get(key)
                .map_or(false, |t| t.id == id && t.state == TaskState::Queued);
            if !queued {
                return;
            }
            state.pending.retain(|p| p.task_id != id);
            state.tasks.remove(key)
        };
        if let Some(task) = task {
            let waited = task.created_at.elapsed();
            fail_expired(task, waited);
        }
    }

    /// Remove a task from every table; returns it with its waiters intact
    fn teardown(state: &mut SchedulerState, key: &str) -> Option<NetworkTask> {
        let task = state.tasks.remove(key)?;
        match task.state {
            TaskState::Queued => state.pending.retain(|p| p.task_id != task.id),
            _ => task.token.cancel(),
        }
        Some(task)
    }
}

fn fail_expired(mut task: NetworkTask, waited: Duration) {
    warn!(url = %task.url, waited_ms = waited.as_millis() as u64, "Queued download expired");
    task.state = TaskState::Failed;
    let error = Error::Timeout {
        url: task.url.to_string(),
        waited,
    };
    for waiter in task.waiters {
        waiter.complete(Err(error.clone()));
    }
}

fn cancel_waiters(task: NetworkTask) {
    let error = Error::cancelled(&task.url);
    for waiter in task.waiters {
        waiter.complete(Err(error.clone()));
    }
}

// =============================================================================
// Network Agent
// =============================================================================

/// Deduplicating, bounded-concurrency download scheduler
#[derive(Clone)]
pub struct NetworkAgent {
    shared: Arc<Shared>,
}

impl NetworkAgent {
    pub fn new(
        config: NetworkAgentConfig,
        transport: Arc<dyn Transport>,
        codec: Arc<dyn CompressionProvider>,
        sink: Option<Arc<dyn DownloadSink>>,
        events: EventBus,
    ) -> Self {
        let max_concurrent = config.max_concurrent_downloads.max(1);
        // a zero limit would expire every task that ever queues
        let queue_timeout = config.queue_timeout.filter(|limit| !limit.is_zero());
        info!(
            max_concurrent,
            queue_timeout_ms = queue_timeout.map(|d| d.as_millis() as u64),
            "Network agent initialized"
        );
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(SchedulerState::default()),
                transport,
                codec,
                sink,
                events,
                max_concurrent,
                queue_timeout,
                next_task_id: AtomicU64::new(1),
                transfers: AtomicU64::new(0),
            }),
        }
    }

    /// Attach to the in-flight task for the URL or create one
    ///
    /// Must be called from within a Tokio runtime.
    pub fn request(&self, request: DownloadRequest) -> DownloadTicket {
        let DownloadRequest {
            url,
            priority,
            persist,
            caller,
            progress,
        } = request;
        let (tx, rx) = oneshot::channel();
        let waiter = Waiter {
            caller,
            progress,
            reply: tx,
        };
        let key = url.as_str().to_string();

        enum Placement {
            Attached,
            Started(u64, CancellationToken),
            Queued(u64),
        }

        let placement = {
            let mut state = self.shared.state.lock();
            if let Some(task) = state.tasks.get_mut(&key) {
                task.attach(waiter, priority, persist);
                debug!(url = %url, waiters = task.waiters.len(), state = %task.state, "Attached to existing download");
                Placement::Attached
            } else {
                let id = self.shared.next_task_id.fetch_add(1, Ordering::Relaxed);
                let mut task = NetworkTask::new(id, url.clone(), priority, persist, waiter);
                let placement = if state.active < self.shared.max_concurrent {
                    state.active += 1;
                    task.state = TaskState::Downloading;
                    Placement::Started(id, task.token.clone())
                } else {
                    state.pending.push_back(PendingDownloadRequest {
                        key: key.clone(),
                        task_id: id,
                        priority,
                        enqueued_at: task.created_at,
                    });
                    debug!(url = %url, queued = state.pending.len(), "Download queued");
                    Placement::Queued(id)
                };
                state.tasks.insert(key.clone(), task);
                placement
            }
        };

        match placement {
            Placement::Attached => {}
            Placement::Started(id, token) => self.shared.start_transfer(url.clone(), id, token),
            Placement::Queued(id) => {
                if let Some(limit) = self.shared.queue_timeout {
                    let weak: Weak<Shared> = Arc::downgrade(&self.shared);
                    tokio::spawn(async move {
                        tokio::time::sleep(limit).await;
                        if let Some(shared) = weak.upgrade() {
                            shared.expire(&key, id);
                        }
                    });
                }
            }
        }

        DownloadTicket { url, rx }
    }

    /// Detach the waiters of `caller`; the transfer stops once none remain
    ///
    /// Returns false when the caller had no waiter on this URL.
    pub fn cancel(&self, url: &Url, caller: CallerId) -> bool {
        let (removed, torn_down) = {
            let mut state = self.shared.state.lock();
            let Some(task) = state.tasks.get_mut(url.as_str()) else {
                return false;
            };
            let removed = task.detach_caller(caller);
            if removed.is_empty() {
                return false;
            }
            let torn_down = if task.waiters.is_empty() {
                Shared::teardown(&mut state, url.as_str()).is_some()
            } else {
                false
            };
            (removed, torn_down)
        };

        debug!(url = %url, caller = %caller, detached = removed.len(), torn_down, "Cancelled waiter");
        let error = Error::cancelled(url);
        for waiter in removed {
            waiter.complete(Err(error.clone()));
        }
        true
    }

    /// Tear down the task for `url` regardless of remaining interest
    pub fn cancel_all(&self, url: &Url) -> bool {
        let task = {
            let mut state = self.shared.state.lock();
            Shared::teardown(&mut state, url.as_str())
        };
        match task {
            Some(task) => {
                debug!(url = %url, waiters = task.waiters.len(), "Cancelled download");
                cancel_waiters(task);
                true
            }
            None => false,
        }
    }

    /// Tear down every task; returns how many were cancelled
    pub fn cancel_everything(&self) -> usize {
        let tasks: Vec<NetworkTask> = {
            let mut state = self.shared.state.lock();
            let keys: Vec<String> = state.tasks.keys().cloned().collect();
            keys.iter()
                .filter_map(|k| Shared::teardown(&mut state, k))
                .collect()
        };
        let count = tasks.len();
        for task in tasks {
            cancel_waiters(task);
        }
        if count > 0 {
            info!(cancelled = count, "Cancelled all downloads");
        }
        count
    }

    /// State of the live task for `url`, if any
    pub fn task_state(&self, url: &Url) -> Option<TaskState> {
        self.shared
            .state
            .lock()
            .tasks
            .get(url.as_str())
            .map(|t| t.state)
    }

    /// Waiters attached to the live task for `url`
    pub fn waiter_count(&self, url: &Url) -> usize {
        self.shared
            .state
            .lock()
            .tasks
            .get(url.as_str())
            .map_or(0, |t| t.waiters.len())
    }

    pub fn active_downloads(&self) -> usize {
        self.count_in(TaskState::Downloading)
    }

    pub fn queued_downloads(&self) -> usize {
        self.count_in(TaskState::Queued)
    }

    /// Transfers started since construction
    pub fn transfers_started(&self) -> u64 {
        self.shared.transfers.load(Ordering::Relaxed)
    }

    pub fn max_concurrent(&self) -> usize {
        self.shared.max_concurrent
    }

    fn count_in(&self, wanted: TaskState) -> usize {
        self.shared
            .state
            .lock()
            .tasks
            .values()
            .filter(|t| t.state == wanted)
            .count()
    }
}

impl std::fmt::Debug for NetworkAgent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetworkAgent")
            .field("max_concurrent", &self.shared.max_concurrent)
            .field("active", &self.active_downloads())
            .field("queued", &self.queued_downloads())
            .finish()
    }
}
