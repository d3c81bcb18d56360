//! Error taxonomy shared by the pipeline, the repositories, and the API.
//!
//! | Error | Raised by | Retried |
//! |-------|-----------|---------|
//! | [`ValidationError`] | submission / schedule creation | never (rejected synchronously) |
//! | [`FetchError`] | source fetchers | transient variants only |
//! | [`ExtractError`] | content extractor | never |
//! | [`StoreError`] | repositories | n/a |

use thiserror::Error;
use uuid::Uuid;

use crate::status::MaterialStatus;

/// A submission or schedule request that is malformed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("exactly one of url, pdf_file or youtube_link must be provided, but none was given")]
    MissingSource,

    #[error("exactly one of url, pdf_file or youtube_link must be provided, but {0} were given")]
    MultipleSources(usize),

    #[error("url must be an absolute http(s) URL: {0}")]
    InvalidUrl(String),

    #[error("interval_secs must be at least {min} seconds")]
    IntervalTooShort { min: u64 },

    #[error("{0}")]
    Invalid(String),
}

/// Failure to retrieve raw content for a source.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    #[error("Unreachable: {0}")]
    Unreachable(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("NonSuccessStatus: HTTP {status}")]
    NonSuccessStatus { status: u16 },

    #[error("NotFound: {0}")]
    NotFound(String),

    #[error("UnsupportedFormat: {0}")]
    UnsupportedFormat(String),

    #[error("NoTranscriptAvailable: {0}")]
    NoTranscriptAvailable(String),

    #[error("InvalidLink: {0}")]
    InvalidLink(String),
}

impl FetchError {
    /// Whether another fetch attempt could plausibly succeed.
    ///
    /// Network failures, timeouts, and HTTP 408/429/5xx are transient.
    /// Everything that depends only on the source itself (a missing file,
    /// a malformed link, a video without captions) is permanent.
    pub fn is_transient(&self) -> bool {
        match self {
            FetchError::Unreachable(_) | FetchError::Timeout(_) => true,
            FetchError::NonSuccessStatus { status } => {
                *status == 408 || *status == 429 || (500..600).contains(status)
            }
            FetchError::NotFound(_)
            | FetchError::UnsupportedFormat(_)
            | FetchError::NoTranscriptAvailable(_)
            | FetchError::InvalidLink(_) => false,
        }
    }

    /// Machine-readable variant name.
    pub fn code(&self) -> &'static str {
        match self {
            FetchError::Unreachable(_) => "Unreachable",
            FetchError::Timeout(_) => "Timeout",
            FetchError::NonSuccessStatus { .. } => "NonSuccessStatus",
            FetchError::NotFound(_) => "NotFound",
            FetchError::UnsupportedFormat(_) => "UnsupportedFormat",
            FetchError::NoTranscriptAvailable(_) => "NoTranscriptAvailable",
            FetchError::InvalidLink(_) => "InvalidLink",
        }
    }
}

/// Failure to turn fetched bytes into normalized text. Deterministic.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExtractError {
    #[error("ExtractionError: unsupported content-type: {0}")]
    UnsupportedContentType(String),

    #[error("ExtractionError: PDF extraction failed: {0}")]
    Pdf(String),

    #[error("ExtractionError: HTML extraction failed: {0}")]
    Html(String),

    #[error("ExtractionError: caption extraction failed: {0}")]
    Captions(String),

    #[error("ExtractionError: content is not valid UTF-8")]
    Encoding,

    #[error("ExtractionError: no text content found")]
    EmptyContent,

    #[error("ExtractionError: {0}")]
    Internal(String),
}

/// Repository failure.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: Uuid },

    #[error("invalid status transition for material {id}: {from} -> {to}")]
    InvalidTransition {
        id: Uuid,
        from: MaterialStatus,
        to: MaterialStatus,
    },

    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

impl StoreError {
    pub fn material_not_found(id: Uuid) -> Self {
        StoreError::NotFound {
            entity: "material",
            id,
        }
    }

    pub fn schedule_not_found(id: Uuid) -> Self {
        StoreError::NotFound {
            entity: "schedule",
            id,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }
}
