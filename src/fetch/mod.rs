//! Source fetchers.
//!
//! A fetcher retrieves raw bytes for one [`SourceKind`] and never extracts
//! text. [`FetcherSet`] dispatches a [`SourceRef`] to the fetcher for its
//! kind.
//!
//! | Kind | Fetcher | Transport |
//! |------|---------|-----------|
//! | `url` | [`http::UrlFetcher`] | HTTP GET |
//! | `pdf` | [`pdf::PdfFetcher`] | HTTP GET or local file |
//! | `youtube` | [`youtube::YouTubeFetcher`] | timedtext caption endpoint |

pub mod http;
pub mod pdf;
pub mod youtube;

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use finsight_core::error::FetchError;
use finsight_core::models::{SourceKind, SourceRef};

use crate::config::{Config, FetchConfig};

/// Raw bytes retrieved for a source, before extraction.
#[derive(Debug, Clone)]
pub struct RawContent {
    pub kind: SourceKind,
    pub bytes: Vec<u8>,
    /// Media type reported by the transport, without parameters.
    pub content_type: Option<String>,
    /// Location after redirects, when it differs from the submitted one.
    pub final_location: Option<String>,
}

/// Retrieves raw content for one source kind.
#[async_trait]
pub trait SourceFetcher: Send + Sync {
    fn kind(&self) -> SourceKind;

    async fn fetch(&self, source: &SourceRef) -> Result<RawContent, FetchError>;
}

/// One fetcher per source kind.
#[derive(Clone, Default)]
pub struct FetcherSet {
    fetchers: HashMap<SourceKind, Arc<dyn SourceFetcher>>,
}

impl FetcherSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `fetcher` for its kind, replacing any previous one.
    pub fn with(mut self, fetcher: Arc<dyn SourceFetcher>) -> Self {
        self.fetchers.insert(fetcher.kind(), fetcher);
        self
    }

    /// The standard URL, PDF and YouTube fetchers sharing one HTTP client.
    pub fn from_config(config: &Config) -> Result<Self> {
        let client = build_http_client(&config.fetch)?;
        Ok(Self::new()
            .with(Arc::new(http::UrlFetcher::new(
                client.clone(),
                config.fetch.max_body_bytes,
            )))
            .with(Arc::new(pdf::PdfFetcher::new(client.clone(), &config.fetch)))
            .with(Arc::new(youtube::YouTubeFetcher::new(
                client,
                &config.youtube,
                config.fetch.max_body_bytes,
            ))))
    }

    pub async fn fetch(&self, source: &SourceRef) -> Result<RawContent, FetchError> {
        let fetcher = self.fetchers.get(&source.kind()).ok_or_else(|| {
            FetchError::UnsupportedFormat(format!(
                "no fetcher registered for {} sources",
                source.kind().as_str()
            ))
        })?;
        fetcher.fetch(source).await
    }
}

pub fn build_http_client(config: &FetchConfig) -> Result<reqwest::Client> {
    let client = reqwest::Client::builder()
        .timeout(config.timeout())
        .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
        .user_agent(config.user_agent.clone())
        .build()?;
    Ok(client)
}

/// A successful HTTP response body with its metadata.
pub(crate) struct HttpBody {
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
    pub final_url: String,
}

/// GETs `url`, mapping non-2xx statuses to [`FetchError::NonSuccessStatus`]
/// and refusing bodies larger than `max_bytes`.
pub(crate) async fn http_get(
    client: &reqwest::Client,
    url: &str,
    max_bytes: usize,
) -> Result<HttpBody, FetchError> {
    let mut response = client.get(url).send().await.map_err(classify_reqwest_error)?;

    let status = response.status();
    if !status.is_success() {
        return Err(FetchError::NonSuccessStatus {
            status: status.as_u16(),
        });
    }

    let content_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(media_type);
    let final_url = response.url().to_string();

    let mut bytes = Vec::new();
    while let Some(chunk) = response.chunk().await.map_err(classify_reqwest_error)? {
        if bytes.len() + chunk.len() > max_bytes {
            return Err(FetchError::UnsupportedFormat(format!(
                "response body exceeds {} bytes",
                max_bytes
            )));
        }
        bytes.extend_from_slice(&chunk);
    }

    Ok(HttpBody {
        bytes,
        content_type,
        final_url,
    })
}

pub(crate) fn classify_reqwest_error(err: reqwest::Error) -> FetchError {
    if err.is_timeout() {
        FetchError::Timeout(err.to_string())
    } else if err.is_redirect() {
        FetchError::InvalidLink(format!("redirect limit exceeded: {}", err))
    } else if err.is_builder() {
        FetchError::InvalidLink(err.to_string())
    } else {
        FetchError::Unreachable(err.to_string())
    }
}

/// `text/html; charset=utf-8` -> `text/html`
pub(crate) fn media_type(header: &str) -> String {
    header
        .split(';')
        .next()
        .unwrap_or(header)
        .trim()
        .to_ascii_lowercase()
}
