//! Web page fetcher.

use async_trait::async_trait;

use finsight_core::error::FetchError;
use finsight_core::models::{SourceKind, SourceRef};

use super::{http_get, RawContent, SourceFetcher};

pub struct UrlFetcher {
    client: reqwest::Client,
    max_body_bytes: usize,
}

impl UrlFetcher {
    pub fn new(client: reqwest::Client, max_body_bytes: usize) -> Self {
        Self {
            client,
            max_body_bytes,
        }
    }
}

#[async_trait]
impl SourceFetcher for UrlFetcher {
    fn kind(&self) -> SourceKind {
        SourceKind::Url
    }

    async fn fetch(&self, source: &SourceRef) -> Result<RawContent, FetchError> {
        let url = source.location();
        let body = http_get(&self.client, url, self.max_body_bytes).await?;
        tracing::debug!(url, bytes = body.bytes.len(), "fetched page");
        let redirected = url::Url::parse(url)
            .map(|u| u.as_str() != body.final_url)
            .unwrap_or(true);
        Ok(RawContent {
            kind: SourceKind::Url,
            bytes: body.bytes,
            content_type: body.content_type,
            final_location: redirected.then_some(body.final_url),
        })
    }
}
