//! Byte Transports
//!
//! The scheduler pulls bytes through [`Transport`]; [`HttpTransport`] is the
//! `reqwest` implementation used in production.

use crate::config::NetworkConfig;
use crate::error::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{BoxStream, StreamExt};
use std::time::Duration;
use tracing::debug;
use url::Url;

/// An open response body
pub struct ByteStream {
    /// Expected total length, when the server announced one
    pub content_length: Option<u64>,
    pub chunks: BoxStream<'static, Result<Bytes>>,
}

impl ByteStream {
    /// Wrap an in-memory list of chunks
    pub fn from_chunks(content_length: Option<u64>, chunks: Vec<Bytes>) -> Self {
        Self {
            content_length,
            chunks: futures::stream::iter(chunks.into_iter().map(Ok)).boxed(),
        }
    }
}

impl std::fmt::Debug for ByteStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ByteStream")
            .field("content_length", &self.content_length)
            .finish_non_exhaustive()
    }
}

/// Source of resource bytes
#[async_trait]
pub trait Transport: Send + Sync {
    /// Start a GET for `url`; errors here and in the stream are terminal
    async fn open(&self, url: &Url) -> Result<ByteStream>;
}

// =============================================================================
// HTTP Transport
// =============================================================================

/// `reqwest`-backed HTTP GET transport
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    /// Whole-request limit, reported by timeout errors
    request_timeout: Duration,
}

impl HttpTransport {
    pub fn new(config: &NetworkConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .connect_timeout(config.connect_timeout())
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| Error::Configuration(format!("HTTP client: {}", e)))?;
        Ok(Self {
            client,
            request_timeout: config.request_timeout(),
        })
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn open(&self, url: &Url) -> Result<ByteStream> {
        let limit = self.request_timeout;
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| Error::from(e).with_timeout(limit))?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::Transport {
                url: url.to_string(),
                message: format!("HTTP {}", status),
                status: Some(status.as_u16()),
            });
        }

        let content_length = response.content_length();
        debug!(url = %url, status = status.as_u16(), content_length, "Response headers received");

        Ok(ByteStream {
            content_length,
            chunks: response
                .bytes_stream()
                .map(move |r| r.map_err(|e| Error::from(e).with_timeout(limit)))
                .boxed(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_from_chunks() {
        let mut stream = ByteStream::from_chunks(
            Some(6),
            vec![Bytes::from_static(b"abc"), Bytes::from_static(b"def")],
        );
        let mut collected = Vec::new();
        while let Some(chunk) = stream.chunks.next().await {
            collected.extend_from_slice(&chunk.unwrap());
        }
        assert_eq!(collected, b"abcdef");
        assert_eq!(stream.content_length, Some(6));
    }

    #[test]
    fn test_http_transport_builds_from_config() {
        let config = NetworkConfig::default();
        let transport = HttpTransport::new(&config).unwrap();
        assert_eq!(transport.request_timeout(), config.request_timeout());
    }
}
