//! Observer Registry
//!
//! Explicitly registered listeners for load notifications. Each observer gets
//! its own dispatch task and broadcast receiver, so a slow observer only
//! falls behind itself and never delays completion delivery to callers.

use crate::error::ErrorKind;
use crate::events::{EventBus, MediaEvent};
use crate::media::ResolvedFrom;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Load notification sink; every method defaults to a no-op
pub trait Observer: Send + Sync {
    fn on_loaded(&self, _url: &str, _source: ResolvedFrom) {}

    fn on_failed(&self, _url: &str, _kind: ErrorKind, _message: &str) {}

    fn on_progress(&self, _url: &str, _fraction: f64) {}

    fn on_will_start_download(&self, _url: &str) {}
}

/// Token returned by [`ObserverRegistry::register`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverHandle(u64);

/// Owns one dispatch task per registered observer
pub struct ObserverRegistry {
    bus: EventBus,
    next_id: AtomicU64,
    tasks: DashMap<u64, JoinHandle<()>>,
}

impl ObserverRegistry {
    pub fn new(bus: EventBus) -> Self {
        Self {
            bus,
            next_id: AtomicU64::new(1),
            tasks: DashMap::new(),
        }
    }

    /// Start delivering events to `observer` until it is unregistered
    ///
    /// Must be called from within a Tokio runtime.
    pub fn register(&self, observer: Arc<dyn Observer>) -> ObserverHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut rx = self.bus.subscribe();

        let task = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => dispatch(observer.as_ref(), &event),
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(observer = id, skipped, "Observer lagging, events dropped");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });

        self.tasks.insert(id, task);
        debug!(observer = id, "Observer registered");
        ObserverHandle(id)
    }

    /// Stop delivery; returns false for an unknown handle
    pub fn unregister(&self, handle: ObserverHandle) -> bool {
        match self.tasks.remove(&handle.0) {
            Some((_, task)) => {
                task.abort();
                debug!(observer = handle.0, "Observer unregistered");
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

impl Drop for ObserverRegistry {
    fn drop(&mut self) {
        for entry in self.tasks.iter() {
            entry.value().abort();
        }
    }
}

fn dispatch(observer: &dyn Observer, event: &MediaEvent) {
    match event {
        MediaEvent::Loaded { url, source } => observer.on_loaded(url, *source),
        MediaEvent::Failed { url, kind, message } => observer.on_failed(url, *kind, message),
        MediaEvent::Progress { url, fraction } => observer.on_progress(url, *fraction),
        MediaEvent::WillStartDownload { url } => observer.on_will_start_download(url),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use parking_lot::Mutex;
    use std::time::Duration;
    use url::Url;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<String>>,
    }

    impl Observer for Recorder {
        fn on_loaded(&self, url: &str, source: ResolvedFrom) {
            self.seen.lock().push(format!("loaded {} {}", url, source));
        }

        fn on_failed(&self, url: &str, kind: ErrorKind, _message: &str) {
            self.seen.lock().push(format!("failed {} {}", url, kind));
        }

        fn on_will_start_download(&self, url: &str) {
            self.seen.lock().push(format!("start {}", url));
        }
    }

    async fn wait_for(recorder: &Recorder, count: usize) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while recorder.seen.lock().len() < count {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("observer did not receive events in time");
    }

    #[tokio::test]
    async fn test_register_dispatches_in_order() {
        let bus = EventBus::new(16);
        let registry = ObserverRegistry::new(bus.clone());
        let recorder = Arc::new(Recorder::default());
        let _handle = registry.register(recorder.clone());

        let url = Url::parse("https://img.example.com/a.png").unwrap();
        bus.emit(MediaEvent::will_start_download(&url));
        bus.emit(MediaEvent::progress(&url, 0.5));
        bus.emit(MediaEvent::loaded(&url, ResolvedFrom::Network));
        bus.emit(MediaEvent::failed(&url, &Error::cancelled(&url)));

        wait_for(&recorder, 3).await;
        let seen = recorder.seen.lock().clone();
        assert_eq!(
            seen,
            vec![
                "start https://img.example.com/a.png".to_string(),
                "loaded https://img.example.com/a.png network".to_string(),
                "failed https://img.example.com/a.png cancelled".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_unregister_stops_delivery() {
        let bus = EventBus::new(16);
        let registry = ObserverRegistry::new(bus.clone());
        let recorder = Arc::new(Recorder::default());
        let handle = registry.register(recorder.clone());
        assert_eq!(registry.len(), 1);

        assert!(registry.unregister(handle));
        assert!(!registry.unregister(handle));
        assert!(registry.is_empty());

        tokio::task::yield_now().await;
        let url = Url::parse("https://img.example.com/a.png").unwrap();
        bus.emit(MediaEvent::loaded(&url, ResolvedFrom::Cache));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(recorder.seen.lock().is_empty());
    }

    #[tokio::test]
    async fn test_slow_observer_does_not_block_emitter() {
        struct Sleepy;
        impl Observer for Sleepy {
            fn on_progress(&self, _url: &str, _fraction: f64) {
                std::thread::sleep(Duration::from_millis(20));
            }
        }

        let bus = EventBus::new(4);
        let registry = ObserverRegistry::new(bus.clone());
        registry.register(Arc::new(Sleepy));

        let url = Url::parse("https://img.example.com/a.png").unwrap();
        let started = std::time::Instant::now();
        for i in 0..100 {
            bus.emit(MediaEvent::progress(&url, i as f64 / 100.0));
        }
        assert!(started.elapsed() < Duration::from_millis(500));
    }
}
