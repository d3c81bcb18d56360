//! YouTube caption fetcher.
//!
//! Resolves the video id from the submitted link and downloads the caption
//! track from the timedtext endpoint. The raw XML is handed to the
//! extractor untouched.

use async_trait::async_trait;

use finsight_core::error::FetchError;
use finsight_core::models::{SourceKind, SourceRef};

use super::{http_get, RawContent, SourceFetcher};
use crate::config::YouTubeConfig;

const VIDEO_ID_LEN: usize = 11;

pub struct YouTubeFetcher {
    client: reqwest::Client,
    timedtext_url: String,
    language: String,
    max_body_bytes: usize,
}

impl YouTubeFetcher {
    pub fn new(client: reqwest::Client, config: &YouTubeConfig, max_body_bytes: usize) -> Self {
        Self {
            client,
            timedtext_url: config.timedtext_url.clone(),
            language: config.language.clone(),
            max_body_bytes,
        }
    }

    fn captions_url(&self, video_id: &str) -> Result<String, FetchError> {
        let mut url = url::Url::parse(&self.timedtext_url)
            .map_err(|e| FetchError::InvalidLink(format!("timedtext_url: {}", e)))?;
        url.query_pairs_mut()
            .append_pair("v", video_id)
            .append_pair("lang", &self.language);
        Ok(url.into())
    }
}

fn is_video_id(s: &str) -> bool {
    s.len() == VIDEO_ID_LEN
        && s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// Extracts the 11-character video id from a YouTube link or a bare id.
pub fn parse_video_id(link: &str) -> Result<String, FetchError> {
    let link = link.trim();
    if is_video_id(link) {
        return Ok(link.to_string());
    }

    let invalid = || FetchError::InvalidLink(link.to_string());
    let with_scheme = if link.contains("://") {
        link.to_string()
    } else {
        format!("https://{}", link)
    };
    let url = url::Url::parse(&with_scheme).map_err(|_| invalid())?;
    let host = url.host_str().ok_or_else(invalid)?.to_ascii_lowercase();
    let host = host.strip_prefix("www.").unwrap_or(&host);
    let host = host.strip_prefix("m.").unwrap_or(host);

    let mut segments = url.path_segments().into_iter().flatten().filter(|s| !s.is_empty());

    let candidate = match host {
        "youtu.be" => segments.next().map(str::to_string),
        "youtube.com" | "music.youtube.com" | "youtube-nocookie.com" => {
            match segments.next() {
                Some("watch") => url
                    .query_pairs()
                    .find(|(k, _)| k == "v")
                    .map(|(_, v)| v.into_owned()),
                Some("shorts") | Some("embed") | Some("live") | Some("v") => {
                    segments.next().map(str::to_string)
                }
                _ => None,
            }
        }
        _ => None,
    };

    candidate.filter(|id| is_video_id(id)).ok_or_else(invalid)
}

/// A caption document with no `<text>` cue carries no transcript.
fn has_caption_cues(bytes: &[u8]) -> bool {
    bytes.windows(5).any(|w| w == b"<text")
}

#[async_trait]
impl SourceFetcher for YouTubeFetcher {
    fn kind(&self) -> SourceKind {
        SourceKind::Youtube
    }

    async fn fetch(&self, source: &SourceRef) -> Result<RawContent, FetchError> {
        let video_id = parse_video_id(source.location())?;
        let url = self.captions_url(&video_id)?;

        let body = match http_get(&self.client, &url, self.max_body_bytes).await {
            Ok(body) => body,
            Err(FetchError::NonSuccessStatus { status: 404 }) => {
                return Err(FetchError::NoTranscriptAvailable(video_id))
            }
            Err(e) => return Err(e),
        };

        if body.bytes.iter().all(u8::is_ascii_whitespace) || !has_caption_cues(&body.bytes) {
            return Err(FetchError::NoTranscriptAvailable(video_id));
        }

        tracing::debug!(video_id = %video_id, bytes = body.bytes.len(), "fetched captions");
        Ok(RawContent {
            kind: SourceKind::Youtube,
            bytes: body.bytes,
            content_type: body.content_type,
            final_location: None,
        })
    }
}
