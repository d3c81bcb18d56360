//! PDF fetcher.
//!
//! A PDF source is a located resource: an `http(s)://` URL, a `file://` URL,
//! or a filesystem path. Local paths may be confined to `fetch.pdf_root`.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use finsight_core::error::FetchError;
use finsight_core::models::{SourceKind, SourceRef};

use super::{http_get, RawContent, SourceFetcher};
use crate::config::FetchConfig;

pub const MIME_PDF: &str = "application/pdf";

/// PDF files may carry up to 1024 bytes of junk before the header.
const HEADER_SEARCH_WINDOW: usize = 1024;

pub struct PdfFetcher {
    client: reqwest::Client,
    max_body_bytes: usize,
    root: Option<PathBuf>,
}

impl PdfFetcher {
    pub fn new(client: reqwest::Client, config: &FetchConfig) -> Self {
        Self {
            client,
            max_body_bytes: config.max_body_bytes,
            root: config.pdf_root.clone(),
        }
    }

    async fn read_local(&self, path: &Path) -> Result<Vec<u8>, FetchError> {
        let resolved = match tokio::fs::canonicalize(path).await {
            Ok(p) => p,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(FetchError::NotFound(path.display().to_string()))
            }
            Err(e) => return Err(FetchError::Unreachable(format!("{}: {}", path.display(), e))),
        };

        if let Some(root) = &self.root {
            let root = tokio::fs::canonicalize(root)
                .await
                .map_err(|e| FetchError::NotFound(format!("pdf_root {}: {}", root.display(), e)))?;
            if !resolved.starts_with(&root) {
                return Err(FetchError::InvalidLink(format!(
                    "{} is outside the configured pdf_root",
                    path.display()
                )));
            }
        }

        let meta = tokio::fs::metadata(&resolved)
            .await
            .map_err(|e| FetchError::NotFound(format!("{}: {}", path.display(), e)))?;
        if !meta.is_file() {
            return Err(FetchError::NotFound(format!("{} is not a file", path.display())));
        }
        if meta.len() > self.max_body_bytes as u64 {
            return Err(FetchError::UnsupportedFormat(format!(
                "{} exceeds {} bytes",
                path.display(),
                self.max_body_bytes
            )));
        }

        tokio::fs::read(&resolved)
            .await
            .map_err(|e| FetchError::Unreachable(format!("{}: {}", path.display(), e)))
    }
}

/// Where a PDF location points.
#[derive(Debug, PartialEq, Eq)]
enum PdfLocation {
    Remote(String),
    Local(PathBuf),
}

fn resolve_location(raw: &str) -> Result<PdfLocation, FetchError> {
    let raw = raw.trim();
    let lower = raw.to_ascii_lowercase();
    if lower.starts_with("http://") || lower.starts_with("https://") {
        return Ok(PdfLocation::Remote(raw.to_string()));
    }
    if lower.starts_with("file://") {
        let url = url::Url::parse(raw).map_err(|e| FetchError::InvalidLink(e.to_string()))?;
        let path = url
            .to_file_path()
            .map_err(|_| FetchError::InvalidLink(format!("not a local file URL: {}", raw)))?;
        return Ok(PdfLocation::Local(path));
    }
    if raw.contains("://") {
        return Err(FetchError::InvalidLink(format!(
            "unsupported PDF location scheme: {}",
            raw
        )));
    }
    Ok(PdfLocation::Local(PathBuf::from(raw)))
}

pub(crate) fn has_pdf_header(bytes: &[u8]) -> bool {
    let window = &bytes[..bytes.len().min(HEADER_SEARCH_WINDOW)];
    window.windows(5).any(|w| w == b"%PDF-")
}

#[async_trait]
impl SourceFetcher for PdfFetcher {
    fn kind(&self) -> SourceKind {
        SourceKind::Pdf
    }

    async fn fetch(&self, source: &SourceRef) -> Result<RawContent, FetchError> {
        let (bytes, final_location) = match resolve_location(source.location())? {
            PdfLocation::Remote(url) => {
                let body = http_get(&self.client, &url, self.max_body_bytes).await?;
                (body.bytes, Some(body.final_url))
            }
            PdfLocation::Local(path) => (self.read_local(&path).await?, None),
        };

        if !has_pdf_header(&bytes) {
            return Err(FetchError::UnsupportedFormat(format!(
                "{} is not a PDF document",
                source.location()
            )));
        }

        tracing::debug!(location = source.location(), bytes = bytes.len(), "fetched pdf");
        Ok(RawContent {
            kind: SourceKind::Pdf,
            bytes,
            content_type: Some(MIME_PDF.to_string()),
            final_location,
        })
    }
}
