//! Disk Storage
//!
//! File-per-record storage under a root directory. All filesystem access goes
//! through one worker task per instance, so writes to the same path never
//! interleave. Records are written to a hidden temp file and renamed into
//! place, so a crash mid-write leaves no truncated record behind.
//!
//! Encoding happens before a write reaches the worker queue, so a write can
//! land behind a clear that was issued after it. Every clear advances a
//! generation counter and the worker drops writes stamped with an older one.

use crate::config::StorageConfig;
use crate::error::Result;
use crate::media::Image;
use crate::providers::{
    CompressionProvider, HostPathProvider, IdentifierProvider, PathProvider, PngCompression,
    Sha256Identifier,
};
use crate::storage::{Storage, StorageCounters, StorageCountersSnapshot};
use async_trait::async_trait;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};
use url::Url;

// =============================================================================
// Disk Storage Configuration
// =============================================================================

/// Configuration for disk storage
#[derive(Debug, Clone)]
pub struct DiskStorageConfig {
    /// Root directory, owned exclusively by this instance
    pub root_path: PathBuf,
    /// fsync each record before renaming it into place
    pub sync_writes: bool,
}

impl Default for DiskStorageConfig {
    fn default() -> Self {
        StorageConfig::default().into()
    }
}

impl From<StorageConfig> for DiskStorageConfig {
    fn from(config: StorageConfig) -> Self {
        Self {
            root_path: config.root_path,
            sync_writes: config.sync_writes,
        }
    }
}

// =============================================================================
// Worker
// =============================================================================

enum StorageJob {
    Read {
        path: PathBuf,
        reply: oneshot::Sender<Option<Vec<u8>>>,
    },
    Write {
        generation: u64,
        dir: PathBuf,
        path: PathBuf,
        bytes: Vec<u8>,
        reply: oneshot::Sender<bool>,
    },
    Remove {
        path: PathBuf,
        reply: oneshot::Sender<bool>,
    },
    ClearAll {
        generation: u64,
        reply: oneshot::Sender<bool>,
    },
    Size {
        reply: oneshot::Sender<u64>,
    },
}

/// Serializes all filesystem access for one storage root
struct StorageWorker {
    root: PathBuf,
    sync_writes: bool,
    /// Generation of the last clear processed
    generation: u64,
}

impl StorageWorker {
    async fn run(mut self, mut jobs: mpsc::UnboundedReceiver<StorageJob>) {
        while let Some(job) = jobs.recv().await {
            match job {
                StorageJob::Read { path, reply } => {
                    let _ = reply.send(self.read(&path).await);
                }
                StorageJob::Write {
                    generation,
                    path,
                    reply,
                    ..
                } if generation < self.generation => {
                    debug!(
                        path = %path.display(),
                        generation,
                        current = self.generation,
                        "Dropped write issued before a clear"
                    );
                    let _ = reply.send(false);
                }
                StorageJob::Write {
                    dir,
                    path,
                    bytes,
                    reply,
                    ..
                } => {
                    let ok = match self.write(&dir, &path, &bytes).await {
                        Ok(()) => true,
                        Err(e) => {
                            warn!(path = %path.display(), error = %e, "Storage write failed");
                            let _ = fs::remove_file(temp_path(&path)).await;
                            false
                        }
                    };
                    let _ = reply.send(ok);
                }
                StorageJob::Remove { path, reply } => {
                    let ok = match fs::remove_file(&path).await {
                        Ok(()) => true,
                        Err(e) if e.kind() == io::ErrorKind::NotFound => false,
                        Err(e) => {
                            warn!(path = %path.display(), error = %e, "Storage remove failed");
                            false
                        }
                    };
                    let _ = reply.send(ok);
                }
                StorageJob::ClearAll { generation, reply } => {
                    self.generation = self.generation.max(generation);
                    let _ = reply.send(self.clear_all().await);
                }
                StorageJob::Size { reply } => {
                    let _ = reply.send(self.size().await);
                }
            }
        }
        debug!(root = %self.root.display(), "Storage worker stopped");
    }

    async fn read(&self, path: &Path) -> Option<Vec<u8>> {
        match fs::read(path).await {
            Ok(bytes) => Some(bytes),
            Err(e) if e.kind() == io::ErrorKind::NotFound => None,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Storage read failed");
                None
            }
        }
    }

    async fn write(&self, dir: &Path, path: &Path, bytes: &[u8]) -> io::Result<()> {
        fs::create_dir_all(dir).await?;

        let tmp = temp_path(path);
        let mut file = fs::File::create(&tmp).await?;
        file.write_all(bytes).await?;
        if self.sync_writes {
            file.sync_all().await?;
        } else {
            file.flush().await?;
        }
        drop(file);

        fs::rename(&tmp, path).await
    }

    async fn clear_all(&self) -> bool {
        match fs::remove_dir_all(&self.root).await {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => {
                warn!(root = %self.root.display(), error = %e, "Failed to remove storage root");
                return false;
            }
        }
        match fs::create_dir_all(&self.root).await {
            Ok(()) => true,
            Err(e) => {
                warn!(root = %self.root.display(), error = %e, "Failed to recreate storage root");
                false
            }
        }
    }

    async fn size(&self) -> u64 {
        let mut total = 0u64;
        let mut pending = vec![self.root.clone()];

        while let Some(dir) = pending.pop() {
            let mut entries = match fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(_) => continue,
            };
            while let Ok(Some(entry)) = entries.next_entry().await {
                match entry.metadata().await {
                    Ok(meta) if meta.is_dir() => pending.push(entry.path()),
                    Ok(_) if is_temp_file(&entry.file_name().to_string_lossy()) => continue,
                    Ok(meta) => total += meta.len(),
                    Err(_) => continue,
                }
            }
        }

        total
    }
}

/// Hidden sibling used while a record is being written
fn temp_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{}.tmp", name))
}

fn is_temp_file(name: &str) -> bool {
    name.starts_with('.') && name.ends_with(".tmp")
}

// =============================================================================
// Disk Storage
// =============================================================================

/// Filesystem-backed [`Storage`]
pub struct DiskStorage {
    root: PathBuf,
    identifier: Arc<dyn IdentifierProvider>,
    paths: Arc<dyn PathProvider>,
    codec: Arc<dyn CompressionProvider>,
    jobs: mpsc::UnboundedSender<StorageJob>,
    generation: AtomicU64,
    counters: StorageCounters,
}

impl DiskStorage {
    /// Create the root directory and start the I/O worker
    ///
    /// Must be called from within a Tokio runtime.
    pub async fn open(
        config: DiskStorageConfig,
        identifier: Arc<dyn IdentifierProvider>,
        paths: Arc<dyn PathProvider>,
        codec: Arc<dyn CompressionProvider>,
    ) -> Result<Self> {
        fs::create_dir_all(&config.root_path).await?;

        let (jobs, rx) = mpsc::unbounded_channel();
        let worker = StorageWorker {
            root: config.root_path.clone(),
            sync_writes: config.sync_writes,
            generation: 0,
        };
        tokio::spawn(worker.run(rx));

        info!(
            root = %config.root_path.display(),
            codec = codec.name(),
            sync_writes = config.sync_writes,
            "Disk storage opened"
        );

        Ok(Self {
            root: config.root_path,
            identifier,
            paths,
            codec,
            jobs,
            generation: AtomicU64::new(0),
            counters: StorageCounters::default(),
        })
    }

    /// Open with SHA-256 names, per-host directories and PNG records
    pub async fn with_path(root_path: impl Into<PathBuf>) -> Result<Self> {
        Self::open(
            DiskStorageConfig {
                root_path: root_path.into(),
                sync_writes: false,
            },
            Arc::new(Sha256Identifier),
            Arc::new(HostPathProvider),
            Arc::new(PngCompression),
        )
        .await
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Absolute path of the record for a URL
    pub fn record_path(&self, url: &Url) -> PathBuf {
        let key = self.identifier.identifier(url);
        self.root.join(self.paths.relative_path(url, &key))
    }

    fn record_dir(&self, url: &Url) -> PathBuf {
        let mut dir = self.root.clone();
        dir.extend(self.paths.directory_structure(url));
        dir
    }

    async fn submit<T>(&self, job: impl FnOnce(oneshot::Sender<T>) -> StorageJob) -> Option<T> {
        let (tx, rx) = oneshot::channel();
        if self.jobs.send(job(tx)).is_err() {
            warn!(root = %self.root.display(), "Storage worker is not running");
            return None;
        }
        rx.await.ok()
    }
}

#[async_trait]
impl Storage for DiskStorage {
    fn has(&self, url: &Url) -> bool {
        self.counters.record_has();
        self.record_path(url).is_file()
    }

    async fn get(&self, url: &Url) -> Option<Image> {
        let path = self.record_path(url);
        let bytes = self
            .submit(|reply| StorageJob::Read { path, reply })
            .await
            .flatten();

        let image = match bytes {
            Some(bytes) => {
                let codec = self.codec.clone();
                let decoded = tokio::task::spawn_blocking(move || codec.decode(&bytes))
                    .await
                    .ok()
                    .flatten();
                if decoded.is_none() {
                    debug!(url = %url, "Undecodable storage record treated as a miss");
                }
                decoded
            }
            None => None,
        };

        self.counters.record_read(image.is_some());
        image
    }

    async fn put(&self, image: &Image, url: &Url) -> bool {
        self.put_at_generation(image, url, self.generation()).await
    }

    fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    async fn put_at_generation(&self, image: &Image, url: &Url, generation: u64) -> bool {
        let codec = self.codec.clone();
        let owned = image.clone();
        let encoded = tokio::task::spawn_blocking(move || codec.encode(&owned))
            .await
            .ok()
            .flatten();

        let ok = match encoded {
            Some(bytes) => {
                let dir = self.record_dir(url);
                let path = self.record_path(url);
                self.submit(|reply| StorageJob::Write {
                    generation,
                    dir,
                    path,
                    bytes,
                    reply,
                })
                .await
                .unwrap_or(false)
            }
            None => {
                warn!(url = %url, codec = self.codec.name(), "Image could not be encoded for storage");
                false
            }
        };

        self.counters.record_write(ok);
        if ok {
            debug!(url = %url, "Stored image");
        }
        ok
    }

    async fn remove(&self, url: &Url) -> bool {
        self.counters.record_removal();
        let path = self.record_path(url);
        self.submit(|reply| StorageJob::Remove { path, reply })
            .await
            .unwrap_or(false)
    }

    async fn clear_all(&self) -> bool {
        let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
        let ok = self
            .submit(|reply| StorageJob::ClearAll { generation, reply })
            .await
            .unwrap_or(false);
        info!(root = %self.root.display(), generation, ok, "Storage cleared");
        ok
    }

    async fn current_size(&self) -> u64 {
        self.submit(|reply| StorageJob::Size { reply })
            .await
            .unwrap_or(0)
    }

    fn counters(&self) -> StorageCountersSnapshot {
        self.counters.snapshot()
    }
}
