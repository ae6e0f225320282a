//! Media Manager
//!
//! Single entry point over the three tiers. Resolution consults the memory
//! cache, then storage, then the network; downloads write back into the cache
//! (and storage when asked) before any requester is notified.
//!
//! The manager never holds a lock spanning two components: each tier call
//! returns before the next one is issued.

use crate::cache::{CacheAgent, CacheLimits, CacheMetricsSnapshot, EvictedEntry, EvictionCallback};
use crate::config::ManagerConfig;
use crate::error::{Error, Result};
use crate::events::{EventBus, MediaEvent};
use crate::media::{CallerId, Image, Priority, ResolvedFrom, ResourceKey};
use crate::network::{
    DownloadRequest, DownloadSink, HttpTransport, NetworkAgent, NetworkAgentConfig,
    ProgressCallback, Transport,
};
use crate::observer::{Observer, ObserverHandle, ObserverRegistry};
use crate::providers::{CompressionProvider, IdentifierProvider, Sha256Identifier};
use crate::retry::retry_with_backoff;
use crate::storage::{DiskStorage, DiskStorageConfig, Storage};
use serde::Serialize;
use std::sync::{Arc, OnceLock};
use tokio::runtime::Handle;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use url::Url;

static SHARED: OnceLock<Arc<MediaManager>> = OnceLock::new();

// =============================================================================
// Requests and Results
// =============================================================================

/// One resolution request
#[derive(Clone)]
pub struct ResolveRequest {
    /// Raw URL; validated before any tier is consulted
    pub url: String,
    pub priority: Priority,
    /// Write a downloaded image through to storage
    pub persist: bool,
    pub caller: Option<CallerId>,
    pub progress: Option<ProgressCallback>,
    /// Skip cache and storage
    pub force_reload: bool,
}

impl ResolveRequest {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            priority: Priority::Low,
            persist: true,
            caller: None,
            progress: None,
            force_reload: false,
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

    pub fn force_reload(mut self, force: bool) -> Self {
        self.force_reload = force;
        self
    }

    fn report(&self, fraction: f64) {
        if let Some(progress) = &self.progress {
            progress(fraction);
        }
    }
}

impl std::fmt::Debug for ResolveRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolveRequest")
            .field("url", &self.url)
            .field("priority", &self.priority)
            .field("persist", &self.persist)
            .field("caller", &self.caller)
            .field("force_reload", &self.force_reload)
            .finish()
    }
}

/// A successfully resolved image and the tier it came from
#[derive(Debug, Clone)]
pub struct Resolution {
    pub url: Url,
    pub image: Image,
    pub source: ResolvedFrom,
}

impl Resolution {
    pub fn from_cache(&self) -> bool {
        self.source.from_cache()
    }

    pub fn from_storage(&self) -> bool {
        self.source.from_storage()
    }
}

/// Read-only counters across every tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ManagerStats {
    pub cache_high: usize,
    pub cache_low: usize,
    pub storage_bytes: u64,
    pub active_downloads: usize,
    pub queued_downloads: usize,
}

/// Parse a resource URL; only absolute `http`/`https` URLs are accepted
pub fn parse_resource_url(raw: &str) -> Result<Url> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(Error::InvalidInput("empty URL".into()));
    }
    let url = Url::parse(trimmed)?;
    match url.scheme() {
        "http" | "https" if url.host_str().is_some() => Ok(url),
        "http" | "https" => Err(Error::InvalidInput(format!("URL has no host: {}", url))),
        other => Err(Error::InvalidInput(format!(
            "unsupported URL scheme '{}': {}",
            other, url
        ))),
    }
}

// =============================================================================
// Collaborators
// =============================================================================

/// Pluggable components a manager is assembled from
#[derive(Clone)]
pub struct Collaborators {
    pub identifier: Arc<dyn IdentifierProvider>,
    pub storage: Arc<dyn Storage>,
    pub transport: Arc<dyn Transport>,
    pub codec: Arc<dyn CompressionProvider>,
}

/// Populates the cache (and storage, when requested) with downloads
struct WriteBack {
    identifier: Arc<dyn IdentifierProvider>,
    cache: Arc<CacheAgent>,
    storage: Arc<dyn Storage>,
}

impl DownloadSink for WriteBack {
    fn on_downloaded(&self, url: &Url, image: &Image, priority: Priority, persist: bool) {
        let key = self.identifier.identifier(url);
        self.cache.set(key, url.clone(), image.clone(), priority);
        if persist {
            spawn_put(&self.storage, image.clone(), url.clone());
        }
    }
}

/// Fire-and-forget storage write; false when no runtime is available
fn spawn_put(storage: &Arc<dyn Storage>, image: Image, url: Url) -> bool {
    let Ok(handle) = Handle::try_current() else {
        warn!(url = %url, "No runtime available, storage write skipped");
        return false;
    };
    // stamped now so a clear issued before the task runs still wins
    let generation = storage.generation();
    let storage = storage.clone();
    handle.spawn(async move {
        if !storage.put_at_generation(&image, &url, generation).await {
            warn!(url = %url, "Storage write failed");
        }
    });
    true
}

fn eviction_hook(storage: Arc<dyn Storage>, events: EventBus, persist: bool) -> EvictionCallback {
    Arc::new(move |evicted: EvictedEntry| {
        let EvictedEntry { key, url, image, .. } = evicted;
        let persisted = if !persist {
            false
        } else if storage.has(&url) {
            true
        } else {
            spawn_put(&storage, image, url.clone())
        };
        debug!(url = %url, key = %key, persisted, "High tier entry evicted");
        events.emit(MediaEvent::Evicted {
            url: url.to_string(),
            key: key.to_string(),
            persisted,
        });
    })
}

// =============================================================================
// Media Manager
// =============================================================================

/// Three-tier image resolver
pub struct MediaManager {
    config: ManagerConfig,
    identifier: Arc<dyn IdentifierProvider>,
    cache: Arc<CacheAgent>,
    storage: Arc<dyn Storage>,
    network: NetworkAgent,
    events: EventBus,
    observers: ObserverRegistry,
}

impl MediaManager {
    /// Build a manager over disk storage and HTTP downloads
    pub async fn new(config: ManagerConfig) -> Result<Arc<Self>> {
        config.validate()?;

        let identifier: Arc<dyn IdentifierProvider> = Arc::new(Sha256Identifier);
        let codec = config.codec.format.provider(config.codec.jpeg_quality);
        let storage = DiskStorage::open(
            DiskStorageConfig::from(config.storage.clone()),
            identifier.clone(),
            config.storage.path_layout.provider(),
            codec.clone(),
        )
        .await?;
        let transport = HttpTransport::new(&config.network)?;

        Self::with_collaborators(
            config,
            Collaborators {
                identifier,
                storage: Arc::new(storage),
                transport: Arc::new(transport),
                codec,
            },
        )
    }

    /// Build a manager from explicit components
    pub fn with_collaborators(config: ManagerConfig, parts: Collaborators) -> Result<Arc<Self>> {
        config.validate()?;

        let events = EventBus::new(config.event_channel_capacity);
        let on_evict = eviction_hook(
            parts.storage.clone(),
            events.clone(),
            config.cache.persist_evicted_high,
        );
        let cache = Arc::new(CacheAgent::new(
            CacheLimits::from(&config.cache),
            Some(on_evict),
        ));
        let sink = Arc::new(WriteBack {
            identifier: parts.identifier.clone(),
            cache: cache.clone(),
            storage: parts.storage.clone(),
        });
        let network = NetworkAgent::new(
            NetworkAgentConfig::from(&config.network),
            parts.transport,
            parts.codec,
            Some(sink),
            events.clone(),
        );
        let observers = ObserverRegistry::new(events.clone());

        info!(
            high_capacity = config.cache.high_capacity,
            low_capacity = config.cache.low_capacity,
            max_concurrent = config.network.max_concurrent_downloads,
            "Media manager initialized"
        );

        Ok(Arc::new(Self {
            config,
            identifier: parts.identifier,
            cache,
            storage: parts.storage,
            network,
            events,
            observers,
        }))
    }

    /// Construct the process-wide instance; fails if one is already installed
    pub async fn install_shared(config: ManagerConfig) -> Result<Arc<Self>> {
        if SHARED.get().is_some() {
            return Err(Error::Configuration(
                "shared media manager already installed".into(),
            ));
        }
        let manager = Self::new(config).await?;
        SHARED.set(manager.clone()).map_err(|_| {
            Error::Configuration("shared media manager already installed".into())
        })?;
        Ok(manager)
    }

    /// The process-wide instance, if installed
    pub fn shared() -> Option<Arc<Self>> {
        SHARED.get().cloned()
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    /// Key used by every tier for a URL
    pub fn key_for(&self, url: &Url) -> ResourceKey {
        self.identifier.identifier(url)
    }

    // =========================================================================
    // Resolution
    // =========================================================================

    /// Resolve an image from the fastest tier holding it
    pub async fn resolve(&self, request: ResolveRequest) -> Result<Resolution> {
        let url = match parse_resource_url(&request.url) {
            Ok(url) => url,
            Err(e) => {
                warn!(url = %request.url, error = %e, "Rejected resolve request");
                return Err(e);
            }
        };
        let key = self.identifier.identifier(&url);

        if !request.force_reload {
            if let Some(image) = self.cache.get(&key) {
                debug!(url = %url, "Cache hit");
                return Ok(self.loaded(&request, url, image, ResolvedFrom::Cache));
            }

            if let Some(image) = self.storage.get(&url).await {
                debug!(url = %url, priority = %request.priority, "Storage hit");
                self.cache
                    .set(key, url.clone(), image.clone(), request.priority);
                return Ok(self.loaded(&request, url, image, ResolvedFrom::Storage));
            }
        }

        let mut download = DownloadRequest::new(url.clone())
            .priority(request.priority)
            .persist(request.persist);
        if let Some(caller) = request.caller {
            download = download.caller(caller);
        }
        if let Some(progress) = request.progress.clone() {
            download = download.progress(progress);
        }

        match self.network.request(download).await {
            Ok(image) => {
                self.events
                    .emit(MediaEvent::loaded(&url, ResolvedFrom::Network));
                Ok(Resolution {
                    url,
                    image,
                    source: ResolvedFrom::Network,
                })
            }
            Err(e) => {
                self.events.emit(MediaEvent::failed(&url, &e));
                Err(e)
            }
        }
    }

    /// Resolve from the network regardless of cached copies
    pub async fn force_reload(&self, request: ResolveRequest) -> Result<Resolution> {
        self.resolve(request.force_reload(true)).await
    }

    /// Resolve, retrying transport failures and timeouts with backoff
    pub async fn resolve_with_retry(&self, request: ResolveRequest) -> Result<Resolution> {
        retry_with_backoff(&self.config.retry, |attempt| {
            debug!(url = %request.url, attempt, "Resolve attempt");
            self.resolve(request.clone())
        })
        .await
    }

    /// Start background downloads for URLs held by neither cache nor storage
    ///
    /// Returns the number of URLs scheduled; invalid URLs are skipped.
    pub fn prefetch<I, S>(&self, urls: I, priority: Priority) -> usize
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut scheduled = 0;
        for raw in urls {
            let Ok(url) = parse_resource_url(raw.as_ref()) else {
                debug!(url = raw.as_ref(), "Skipping invalid prefetch URL");
                continue;
            };
            if self.cache.contains(&self.identifier.identifier(&url)) || self.storage.has(&url) {
                continue;
            }
            // the write-back sink stores the result; nobody awaits the ticket
            let _ticket = self
                .network
                .request(DownloadRequest::new(url).priority(priority));
            scheduled += 1;
        }
        if scheduled > 0 {
            debug!(scheduled, priority = %priority, "Prefetch scheduled");
        }
        scheduled
    }

    fn loaded(
        &self,
        request: &ResolveRequest,
        url: Url,
        image: Image,
        source: ResolvedFrom,
    ) -> Resolution {
        request.report(1.0);
        self.events.emit(MediaEvent::loaded(&url, source));
        Resolution { url, image, source }
    }

    // =========================================================================
    // Cancellation
    // =========================================================================

    /// Withdraw one caller's interest in a download
    pub fn cancel(&self, url: &str, caller: CallerId) -> bool {
        match parse_resource_url(url) {
            Ok(url) => self.network.cancel(&url, caller),
            Err(_) => false,
        }
    }

    /// Abort a download regardless of remaining interest
    pub fn cancel_all(&self, url: &str) -> bool {
        match parse_resource_url(url) {
            Ok(url) => self.network.cancel_all(&url),
            Err(_) => false,
        }
    }

    // =========================================================================
    // Clearing
    // =========================================================================

    /// Clear one cache tier, or both when `tier` is `None`
    pub fn clear_cache(&self, tier: Option<Priority>) -> usize {
        let entries_removed = self.cache.clear(tier);
        self.events.emit(MediaEvent::CacheCleared {
            tier,
            entries_removed,
        });
        entries_removed
    }

    pub async fn clear_storage(&self) -> bool {
        let ok = self.storage.clear_all().await;
        if ok {
            info!("Storage cleared");
        } else {
            warn!("Storage clear failed");
        }
        self.events.emit(MediaEvent::StorageCleared { ok });
        ok
    }

    /// Cancel every download, then clear cache and storage
    pub async fn hard_reset(&self) -> bool {
        let cancelled = self.network.cancel_everything();
        let entries = self.clear_cache(None);
        let ok = self.clear_storage().await;
        info!(cancelled, entries, storage_ok = ok, "Hard reset");
        ok
    }

    /// Drop the disposable tier
    pub fn handle_memory_pressure(&self) -> usize {
        let entries_removed = self.cache.clear(Some(Priority::Low));
        info!(entries_removed, "Memory pressure, low tier dropped");
        self.events
            .emit(MediaEvent::MemoryPressure { entries_removed });
        entries_removed
    }

    // =========================================================================
    // Statistics and Observation
    // =========================================================================

    pub async fn stats(&self) -> ManagerStats {
        ManagerStats {
            cache_high: self.cache.count(Priority::High),
            cache_low: self.cache.count(Priority::Low),
            storage_bytes: self.storage.current_size().await,
            active_downloads: self.network.active_downloads(),
            queued_downloads: self.network.queued_downloads(),
        }
    }

    pub fn cache_metrics(&self) -> CacheMetricsSnapshot {
        self.cache.metrics()
    }

    /// Subscribe to the raw event stream
    pub fn subscribe(&self) -> broadcast::Receiver<MediaEvent> {
        self.events.subscribe()
    }

    /// Must be called from within a Tokio runtime.
    pub fn register_observer(&self, observer: Arc<dyn Observer>) -> ObserverHandle {
        self.observers.register(observer)
    }

    pub fn unregister_observer(&self, handle: ObserverHandle) -> bool {
        self.observers.unregister(handle)
    }
}

impl std::fmt::Debug for MediaManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaManager")
            .field("cache_entries", &self.cache.len())
            .field("network", &self.network)
            .field("observers", &self.observers.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::providers::PngCompression;
    use crate::storage::MemoryStorage;
    use crate::test_support::{eventually, sample_image, url, FakeTransport};
    use assert_matches::assert_matches;
    use parking_lot::Mutex;
    use std::time::Duration;

    struct Fixture {
        manager: Arc<MediaManager>,
        storage: Arc<MemoryStorage>,
        transport: Arc<FakeTransport>,
    }

    fn test_config() -> ManagerConfig {
        let mut config = ManagerConfig::default();
        config.retry.initial_interval_ms = 1;
        config.retry.max_interval_ms = 5;
        config
    }

    fn fixture_with(config: ManagerConfig) -> Fixture {
        let storage = Arc::new(MemoryStorage::new());
        let transport = FakeTransport::new();
        let manager = MediaManager::with_collaborators(
            config,
            Collaborators {
                identifier: Arc::new(Sha256Identifier),
                storage: storage.clone(),
                transport: transport.clone(),
                codec: Arc::new(PngCompression),
            },
        )
        .unwrap();
        Fixture {
            manager,
            storage,
            transport,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(test_config())
    }

    #[tokio::test]
    async fn test_invalid_url_touches_no_tier() {
        let f = fixture();
        for raw in ["", "not a url", "ftp://img.example.com/a.png", "file:///tmp/a.png"] {
            let err = f.manager.resolve(ResolveRequest::new(raw)).await.unwrap_err();
            assert_eq!(err.kind(), ErrorKind::InvalidInput, "{}", raw);
        }

        assert_eq!(f.storage.counters().total_calls(), 0);
        assert_eq!(f.transport.total_calls(), 0);
        let metrics = f.manager.cache_metrics();
        assert_eq!(metrics.misses, 0);
        assert_eq!(metrics.total_hits(), 0);
    }

    #[tokio::test]
    async fn test_network_then_cache() {
        let f = fixture();
        let u = url("photo.png");
        f.transport.serve_image(&u, 6, 4);

        let first = f
            .manager
            .resolve(ResolveRequest::new(u.as_str()))
            .await
            .unwrap();
        assert_eq!(first.source, ResolvedFrom::Network);
        assert_eq!(first.image.width(), 6);

        let second = f
            .manager
            .resolve(ResolveRequest::new(u.as_str()))
            .await
            .unwrap();
        assert!(second.from_cache());
        assert!(second.image.ptr_eq(&first.image));
        assert_eq!(f.transport.calls(&u), 1);
    }

    #[tokio::test]
    async fn test_persisted_download_reaches_storage() {
        let f = fixture();
        let u = url("kept.png");
        f.transport.serve_image(&u, 3, 3);

        f.manager
            .resolve(ResolveRequest::new(u.as_str()))
            .await
            .unwrap();
        assert!(eventually(|| f.storage.len() == 1).await);
    }

    #[tokio::test]
    async fn test_unpersisted_download_stays_out_of_storage() {
        let f = fixture();
        let u = url("ephemeral.png");
        f.transport.serve_image(&u, 3, 3);

        let result = f
            .manager
            .resolve(ResolveRequest::new(u.as_str()).persist(false))
            .await
            .unwrap();
        assert_eq!(result.source, ResolvedFrom::Network);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(f.storage.is_empty());
        assert_eq!(f.storage.counters().writes, 0);
        assert_eq!(f.manager.stats().await.cache_low, 1);
    }

    #[tokio::test]
    async fn test_storage_hit_populates_cache() {
        let f = fixture();
        let u = url("stored.png");
        let image = sample_image(5, 5);
        assert!(f.storage.put(&image, &u).await);

        let progress = Arc::new(Mutex::new(Vec::new()));
        let seen = progress.clone();
        let result = f
            .manager
            .resolve(
                ResolveRequest::new(u.as_str())
                    .priority(Priority::High)
                    .progress(Arc::new(move |p: f64| seen.lock().push(p))),
            )
            .await
            .unwrap();
        assert!(result.from_storage());
        assert!(result.image.same_pixels(&image));
        assert_eq!(*progress.lock(), vec![1.0]);

        let stats = f.manager.stats().await;
        assert_eq!(stats.cache_high, 1);
        assert_eq!(stats.cache_low, 0);

        let again = f
            .manager
            .resolve(ResolveRequest::new(u.as_str()))
            .await
            .unwrap();
        assert!(again.from_cache());
        assert_eq!(f.transport.total_calls(), 0);
    }

    #[tokio::test]
    async fn test_force_reload_skips_cache() {
        let f = fixture();
        let u = url("fresh.png");
        f.transport.serve_image(&u, 2, 2);

        f.manager
            .resolve(ResolveRequest::new(u.as_str()))
            .await
            .unwrap();
        let reloaded = f
            .manager
            .force_reload(ResolveRequest::new(u.as_str()))
            .await
            .unwrap();
        assert_eq!(reloaded.source, ResolvedFrom::Network);
        assert_eq!(f.transport.calls(&u), 2);
    }

    #[tokio::test]
    async fn test_concurrent_resolves_share_one_download() {
        let f = fixture();
        let u = url("popular.png");
        f.transport.serve_image(&u, 4, 4);
        let gate = f.transport.gate(&u);

        let resolves = (0..6).map(|_| f.manager.resolve(ResolveRequest::new(u.as_str())));
        let release = async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            gate.release();
        };
        let (results, _) = tokio::join!(futures::future::join_all(resolves), release);

        let first = results[0].as_ref().unwrap().image.clone();
        for result in &results {
            let resolution = result.as_ref().unwrap();
            assert_eq!(resolution.source, ResolvedFrom::Network);
            assert!(resolution.image.ptr_eq(&first));
        }
        assert_eq!(f.transport.calls(&u), 1);
    }

    #[tokio::test]
    async fn test_failure_is_reported_and_emitted() {
        let f = fixture();
        let u = url("missing.png");
        let mut events = f.manager.subscribe();

        let err = f
            .manager
            .resolve(ResolveRequest::new(u.as_str()))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Transport);

        let mut failed = None;
        while let Ok(event) = events.try_recv() {
            if event.is_error() {
                failed = Some(event);
            }
        }
        assert_matches!(failed, Some(MediaEvent::Failed { kind: ErrorKind::Transport, .. }));
    }

    #[tokio::test]
    async fn test_cancel_by_caller() {
        let f = fixture();
        let u = url("slow.png");
        f.transport.serve_image(&u, 2, 2);
        let _gate = f.transport.gate(&u);
        let caller = CallerId::next();

        let manager = f.manager.clone();
        let raw = u.to_string();
        let pending = tokio::spawn(async move {
            manager
                .resolve(ResolveRequest::new(raw).caller(caller))
                .await
        });

        assert!(eventually(|| f.transport.calls(&u) == 1).await);
        assert!(f.manager.cancel(u.as_str(), caller));
        assert!(pending.await.unwrap().unwrap_err().is_cancelled());
        assert!(!f.manager.cancel("not a url", caller));
    }

    #[tokio::test]
    async fn test_hard_reset_cancels_and_clears() {
        let f = fixture();
        let cached = url("cached.png");
        let slow = url("slow.png");
        f.transport.serve_image(&cached, 2, 2);
        f.transport.serve_image(&slow, 2, 2);
        let _gate = f.transport.gate(&slow);

        f.manager
            .resolve(ResolveRequest::new(cached.as_str()))
            .await
            .unwrap();
        assert!(eventually(|| f.storage.len() == 1).await);

        let manager = f.manager.clone();
        let raw = slow.to_string();
        let pending = tokio::spawn(async move { manager.resolve(ResolveRequest::new(raw)).await });
        assert!(eventually(|| f.transport.calls(&slow) == 1).await);

        assert!(f.manager.hard_reset().await);
        assert!(pending.await.unwrap().unwrap_err().is_cancelled());

        let stats = f.manager.stats().await;
        assert_eq!(stats.cache_high + stats.cache_low, 0);
        assert_eq!(stats.storage_bytes, 0);
        assert!(f.storage.is_empty());
    }

    #[tokio::test]
    async fn test_hard_reset_wins_over_pending_write_through() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(DiskStorage::with_path(dir.path().join("records")).await.unwrap());
        let transport = FakeTransport::new();
        let manager = MediaManager::with_collaborators(
            test_config(),
            Collaborators {
                identifier: Arc::new(Sha256Identifier),
                storage: storage.clone(),
                transport: transport.clone(),
                codec: Arc::new(PngCompression),
            },
        )
        .unwrap();

        let u = url("reset.png");
        transport.serve_image(&u, 48, 48);
        let resolved = manager
            .resolve(ResolveRequest::new(u.as_str()))
            .await
            .unwrap();
        assert_eq!(resolved.source, ResolvedFrom::Network);

        assert!(manager.hard_reset().await);
        tokio::time::sleep(Duration::from_millis(200)).await;

        assert!(!storage.has(&u));
        assert_eq!(storage.current_size().await, 0);
        assert_eq!(manager.stats().await.storage_bytes, 0);
    }

    #[tokio::test]
    async fn test_memory_pressure_drops_low_only() {
        let f = fixture();
        let (low, high) = (url("low.png"), url("high.png"));
        f.transport.serve_image(&low, 2, 2);
        f.transport.serve_image(&high, 2, 2);

        f.manager
            .resolve(ResolveRequest::new(low.as_str()).priority(Priority::Low))
            .await
            .unwrap();
        f.manager
            .resolve(ResolveRequest::new(high.as_str()).priority(Priority::High))
            .await
            .unwrap();

        assert_eq!(f.manager.handle_memory_pressure(), 1);
        let stats = f.manager.stats().await;
        assert_eq!(stats.cache_low, 0);
        assert_eq!(stats.cache_high, 1);
    }

    #[tokio::test]
    async fn test_evicted_high_entry_is_persisted() {
        let mut config = test_config();
        config.cache.high_capacity = 1;
        let f = fixture_with(config);
        let (a, b) = (url("a.png"), url("b.png"));
        f.transport.serve_image(&a, 2, 2);
        f.transport.serve_image(&b, 2, 2);
        let mut events = f.manager.subscribe();

        for u in [&a, &b] {
            f.manager
                .resolve(
                    ResolveRequest::new(u.as_str())
                        .priority(Priority::High)
                        .persist(false),
                )
                .await
                .unwrap();
        }

        assert!(eventually(|| f.storage.len() == 1).await);
        assert!(f.storage.get(&a).await.is_some());
        assert!(f.storage.get(&b).await.is_none());

        let mut evicted = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let MediaEvent::Evicted { url, persisted, .. } = event {
                evicted.push((url, persisted));
            }
        }
        assert_eq!(evicted, vec![(a.to_string(), true)]);
    }

    #[tokio::test]
    async fn test_eviction_not_persisted_when_disabled() {
        let mut config = test_config();
        config.cache.high_capacity = 1;
        config.cache.persist_evicted_high = false;
        let f = fixture_with(config);
        let (a, b) = (url("a.png"), url("b.png"));
        f.transport.serve_image(&a, 2, 2);
        f.transport.serve_image(&b, 2, 2);

        for u in [&a, &b] {
            f.manager
                .resolve(
                    ResolveRequest::new(u.as_str())
                        .priority(Priority::High)
                        .persist(false),
                )
                .await
                .unwrap();
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(f.storage.is_empty());
    }

    #[tokio::test]
    async fn test_retry_gives_up_after_max_attempts() {
        let f = fixture();
        let u = url("flaky.png");
        f.transport
            .fail(&u, Error::transport(&u, "connection reset"));

        let err = f
            .manager
            .resolve_with_retry(ResolveRequest::new(u.as_str()))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Transport);
        assert_eq!(f.transport.calls(&u), 3);
    }

    #[tokio::test]
    async fn test_retry_does_not_repeat_invalid_input() {
        let f = fixture();
        let err = f
            .manager
            .resolve_with_retry(ResolveRequest::new("mailto:someone@example.com"))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }

    #[tokio::test]
    async fn test_prefetch_skips_known_urls() {
        let f = fixture();
        let (stored, remote) = (url("stored.png"), url("remote.png"));
        assert!(f.storage.put(&sample_image(2, 2), &stored).await);
        f.transport.serve_image(&remote, 2, 2);

        let scheduled = f.manager.prefetch(
            [stored.as_str(), remote.as_str(), "not a url"],
            Priority::Low,
        );
        assert_eq!(scheduled, 1);
        assert!(eventually(|| f.transport.calls(&remote) == 1).await);
        assert!(eventually(|| f.storage.len() == 2).await);

        let hit = f
            .manager
            .resolve(ResolveRequest::new(remote.as_str()))
            .await
            .unwrap();
        assert!(hit.from_cache());
    }

    #[tokio::test]
    async fn test_observer_receives_loads() {
        struct Recorder(Mutex<Vec<(String, ResolvedFrom)>>);
        impl Observer for Recorder {
            fn on_loaded(&self, url: &str, source: ResolvedFrom) {
                self.0.lock().push((url.to_string(), source));
            }
        }

        let f = fixture();
        let u = url("watched.png");
        f.transport.serve_image(&u, 2, 2);
        let recorder = Arc::new(Recorder(Mutex::new(Vec::new())));
        let handle = f.manager.register_observer(recorder.clone());

        f.manager
            .resolve(ResolveRequest::new(u.as_str()))
            .await
            .unwrap();
        assert!(eventually(|| recorder.0.lock().len() == 1).await);
        assert_eq!(recorder.0.lock()[0], (u.to_string(), ResolvedFrom::Network));

        assert!(f.manager.unregister_observer(handle));
        assert!(!f.manager.unregister_observer(handle));
    }

    #[tokio::test]
    async fn test_clear_cache_by_tier() {
        let f = fixture();
        let (a, b) = (url("a.png"), url("b.png"));
        f.transport.serve_image(&a, 2, 2);
        f.transport.serve_image(&b, 2, 2);
        f.manager
            .resolve(ResolveRequest::new(a.as_str()).priority(Priority::High))
            .await
            .unwrap();
        f.manager
            .resolve(ResolveRequest::new(b.as_str()))
            .await
            .unwrap();

        assert_eq!(f.manager.clear_cache(Some(Priority::High)), 1);
        assert_eq!(f.manager.clear_cache(None), 1);
        assert!(f.manager.clear_storage().await);
        assert!(f.storage.is_empty());
    }

    #[test]
    fn test_parse_resource_url() {
        assert!(parse_resource_url("https://img.example.com/a.png").is_ok());
        assert!(parse_resource_url("  http://img.example.com/a.png ").is_ok());
        assert!(parse_resource_url("https://").is_err());
        assert!(parse_resource_url("data:image/png;base64,AAAA").is_err());
    }

    #[tokio::test]
    async fn test_disk_backed_manager_and_shared_instance() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = test_config();
        config.storage.root_path = dir.path().join("records");

        let manager = MediaManager::install_shared(config.clone()).await.unwrap();
        let shared = MediaManager::shared().unwrap();
        assert!(Arc::ptr_eq(&manager, &shared));
        assert_matches!(
            MediaManager::install_shared(config).await,
            Err(Error::Configuration(_))
        );

        let stats = shared.stats().await;
        assert_eq!(stats.storage_bytes, 0);
        assert_eq!(stats.active_downloads, 0);
    }
}
