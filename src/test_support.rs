//! Shared test fixtures: sample images and a scriptable transport.

use crate::error::{Error, Result};
use crate::media::Image;
use crate::network::{ByteStream, Transport};
use async_trait::async_trait;
use bytes::Bytes;
use image::{DynamicImage, Rgba, RgbaImage};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use url::Url;

/// Deterministic RGBA gradient
pub(crate) fn sample_image(width: u32, height: u32) -> Image {
    let buffer = RgbaImage::from_fn(width, height, |x, y| {
        Rgba([
            (x * 17 % 256) as u8,
            (y * 31 % 256) as u8,
            ((x + y) * 7 % 256) as u8,
            255,
        ])
    });
    Image::new(DynamicImage::ImageRgba8(buffer))
}

/// PNG encoding of [`sample_image`]
pub(crate) fn sample_png(width: u32, height: u32) -> Vec<u8> {
    let mut buf = std::io::Cursor::new(Vec::new());
    sample_image(width, height)
        .as_dynamic()
        .write_to(&mut buf, image::ImageFormat::Png)
        .unwrap();
    buf.into_inner()
}

pub(crate) fn url(path: &str) -> Url {
    Url::parse(&format!("https://img.example.com/{}", path)).unwrap()
}

/// Poll `check` until it holds or two seconds pass
pub(crate) async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..400 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    check()
}

// =============================================================================
// Fake Transport
// =============================================================================

#[derive(Clone)]
enum Route {
    Body {
        body: Vec<u8>,
        chunk_size: usize,
        content_length: Option<u64>,
    },
    Fail(Error),
}

/// Closed until released; each release lets one transfer through
#[derive(Clone)]
pub(crate) struct Gate(Arc<Semaphore>);

impl Gate {
    pub(crate) fn release(&self) {
        self.0.add_permits(1);
    }
}

/// In-memory [`Transport`] with per-URL routes, gates and call counters
#[derive(Default)]
pub(crate) struct FakeTransport {
    routes: Mutex<HashMap<String, Route>>,
    gates: Mutex<HashMap<String, Arc<Semaphore>>>,
    calls: Mutex<HashMap<String, usize>>,
    total: AtomicUsize,
}

impl FakeTransport {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Serve a PNG of the given size in one chunk
    pub(crate) fn serve_image(&self, url: &Url, width: u32, height: u32) {
        let body = sample_png(width, height);
        let len = body.len();
        self.serve_chunked(url, body, len.max(1), true);
    }

    pub(crate) fn serve_bytes(&self, url: &Url, body: Vec<u8>) {
        let len = body.len();
        self.serve_chunked(url, body, len.max(1), true);
    }

    pub(crate) fn serve_chunked(
        &self,
        url: &Url,
        body: Vec<u8>,
        chunk_size: usize,
        announce_length: bool,
    ) {
        let content_length = announce_length.then_some(body.len() as u64);
        self.routes.lock().insert(
            url.to_string(),
            Route::Body {
                body,
                chunk_size: chunk_size.max(1),
                content_length,
            },
        );
    }

    pub(crate) fn fail(&self, url: &Url, error: Error) {
        self.routes.lock().insert(url.to_string(), Route::Fail(error));
    }

    /// Hold transfers for `url` until the returned gate is released
    pub(crate) fn gate(&self, url: &Url) -> Gate {
        let semaphore = Arc::new(Semaphore::new(0));
        self.gates.lock().insert(url.to_string(), semaphore.clone());
        Gate(semaphore)
    }

    pub(crate) fn calls(&self, url: &Url) -> usize {
        self.calls.lock().get(url.as_str()).copied().unwrap_or(0)
    }

    pub(crate) fn total_calls(&self) -> usize {
        self.total.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn open(&self, url: &Url) -> Result<ByteStream> {
        self.total.fetch_add(1, Ordering::SeqCst);
        *self.calls.lock().entry(url.to_string()).or_insert(0) += 1;

        let gate = self.gates.lock().get(url.as_str()).cloned();
        if let Some(gate) = gate {
            let permit = gate
                .acquire_owned()
                .await
                .map_err(|e| Error::Unknown(e.to_string()))?;
            permit.forget();
        }

        let route = self.routes.lock().get(url.as_str()).cloned();
        match route {
            Some(Route::Body {
                body,
                chunk_size,
                content_length,
            }) => {
                let chunks = body
                    .chunks(chunk_size)
                    .map(Bytes::copy_from_slice)
                    .collect();
                Ok(ByteStream::from_chunks(content_length, chunks))
            }
            Some(Route::Fail(error)) => Err(error),
            None => Err(Error::Transport {
                url: url.to_string(),
                message: "HTTP 404 Not Found".into(),
                status: Some(404),
            }),
        }
    }
}
