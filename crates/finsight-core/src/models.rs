//! Core data models: materials, schedules, and the legacy item record.

use chrono::{DateTime, Duration, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ValidationError;
use crate::status::MaterialStatus;

/// Shortest monitoring interval a schedule may use.
pub const MIN_SCHEDULE_INTERVAL_SECS: u64 = 60;

/// Current time truncated to millisecond precision, which is what every
/// backend persists.
pub fn utc_now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(3)
}

/// Kind of source a material was submitted from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Url,
    Pdf,
    Youtube,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Url => "url",
            SourceKind::Pdf => "pdf",
            SourceKind::Youtube => "youtube",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "url" => Some(SourceKind::Url),
            "pdf" => Some(SourceKind::Pdf),
            "youtube" => Some(SourceKind::Youtube),
            _ => None,
        }
    }
}

/// Where a material's content comes from. Exactly one location per material.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceRef {
    /// Arbitrary web page.
    Url(String),
    /// Located PDF: an http(s) URL, a `file://` URL, or a filesystem path.
    Pdf(String),
    /// YouTube video link (or bare video id).
    YouTube(String),
}

impl SourceRef {
    pub fn new(kind: SourceKind, location: impl Into<String>) -> Self {
        let location = location.into();
        match kind {
            SourceKind::Url => SourceRef::Url(location),
            SourceKind::Pdf => SourceRef::Pdf(location),
            SourceKind::Youtube => SourceRef::YouTube(location),
        }
    }

    pub fn kind(&self) -> SourceKind {
        match self {
            SourceRef::Url(_) => SourceKind::Url,
            SourceRef::Pdf(_) => SourceKind::Pdf,
            SourceRef::YouTube(_) => SourceKind::Youtube,
        }
    }

    pub fn location(&self) -> &str {
        match self {
            SourceRef::Url(s) | SourceRef::Pdf(s) | SourceRef::YouTube(s) => s,
        }
    }

    /// Builds a source from the three optional submission fields.
    ///
    /// Blank strings count as absent. Exactly one field must remain.
    pub fn from_fields(
        url: Option<&str>,
        pdf_file: Option<&str>,
        youtube_link: Option<&str>,
    ) -> Result<Self, ValidationError> {
        let present: Vec<SourceRef> = [
            non_blank(url).map(|s| SourceRef::Url(s.to_string())),
            non_blank(pdf_file).map(|s| SourceRef::Pdf(s.to_string())),
            non_blank(youtube_link).map(|s| SourceRef::YouTube(s.to_string())),
        ]
        .into_iter()
        .flatten()
        .collect();

        let source = match present.len() {
            0 => return Err(ValidationError::MissingSource),
            1 => present.into_iter().next().ok_or(ValidationError::MissingSource)?,
            n => return Err(ValidationError::MultipleSources(n)),
        };

        if let SourceRef::Url(raw) = &source {
            let parsed = url::Url::parse(raw)
                .map_err(|e| ValidationError::InvalidUrl(format!("{}: {}", raw, e)))?;
            if !matches!(parsed.scheme(), "http" | "https") {
                return Err(ValidationError::InvalidUrl(raw.clone()));
            }
        }

        Ok(source)
    }

    /// The `url` / `pdf_file` / `youtube_link` triple, exactly one `Some`.
    pub fn as_fields(&self) -> (Option<&str>, Option<&str>, Option<&str>) {
        match self {
            SourceRef::Url(s) => (Some(s), None, None),
            SourceRef::Pdf(s) => (None, Some(s), None),
            SourceRef::YouTube(s) => (None, None, Some(s)),
        }
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|s| !s.is_empty())
}

/// A unit of ingested content.
#[derive(Debug, Clone, PartialEq)]
pub struct Material {
    pub id: Uuid,
    pub title: String,
    pub source: SourceRef,
    pub status: MaterialStatus,
    /// Title discovered during extraction (HTML `<title>`), if any.
    pub extracted_title: Option<String>,
    /// Normalized text from the last completed attempt.
    pub extracted_content: Option<String>,
    /// SHA-256 of `extracted_content`.
    pub content_fingerprint: Option<String>,
    /// Fetch attempts made in the current ingestion attempt.
    pub attempts: u32,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_checked_at: Option<DateTime<Utc>>,
}

impl Material {
    /// Whether the display title is still the submitted link.
    pub fn has_default_title(&self) -> bool {
        self.title == self.source.location()
    }

    /// A fresh `Pending` material.
    pub fn new(title: impl Into<String>, source: SourceRef, now: DateTime<Utc>) -> Self {
        let title = title.into();
        let title = if title.trim().is_empty() {
            source.location().to_string()
        } else {
            title.trim().to_string()
        };
        Self {
            id: Uuid::new_v4(),
            title,
            source,
            status: MaterialStatus::Pending,
            extracted_title: None,
            extracted_content: None,
            content_fingerprint: None,
            attempts: 0,
            last_error: None,
            created_at: now,
            updated_at: now,
            last_checked_at: None,
        }
    }
}

/// Submission payload, as accepted by `POST /materials/`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewMaterial {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub pdf_file: Option<String>,
    #[serde(default)]
    pub youtube_link: Option<String>,
}

impl NewMaterial {
    /// Validates the payload and builds the material it describes.
    pub fn into_material(self, now: DateTime<Utc>) -> Result<Material, ValidationError> {
        let source = SourceRef::from_fields(
            self.url.as_deref(),
            self.pdf_file.as_deref(),
            self.youtube_link.as_deref(),
        )?;
        Ok(Material::new(self.title, source, now))
    }
}

/// Optional field changes applied together with a status transition.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatusFields {
    /// Replaces the display title. Only set when the title was defaulted
    /// to the raw link at submission.
    pub title: Option<String>,
    pub last_checked_at: Option<DateTime<Utc>>,
    pub attempts: Option<u32>,
    /// `Some(None)` clears the error.
    pub last_error: Option<Option<String>>,
    pub extracted: Option<ExtractedFields>,
}

/// Result of a completed extraction, written only on `Completed`.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedFields {
    pub content: String,
    pub fingerprint: String,
    pub title: Option<String>,
}

impl StatusFields {
    /// Applies the fields and the new status to an in-memory copy.
    pub fn apply(&self, material: &mut Material, status: MaterialStatus, now: DateTime<Utc>) {
        material.status = status;
        material.updated_at = now;
        if let Some(title) = &self.title {
            material.title = title.clone();
        }
        if let Some(ts) = self.last_checked_at {
            material.last_checked_at = Some(ts);
        }
        if let Some(attempts) = self.attempts {
            material.attempts = attempts;
        }
        if let Some(err) = &self.last_error {
            material.last_error = err.clone();
        }
        if let Some(extracted) = &self.extracted {
            material.extracted_content = Some(extracted.content.clone());
            material.content_fingerprint = Some(extracted.fingerprint.clone());
            material.extracted_title = extracted.title.clone();
        }
    }
}

/// A recurring monitoring directive for one material.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Schedule {
    pub id: Uuid,
    pub material_id: Uuid,
    pub interval_secs: u64,
    pub next_run_at: DateTime<Utc>,
    pub active: bool,
    /// A scan cycle owns this schedule until this instant.
    pub claimed_until: Option<DateTime<Utc>>,
    pub last_run_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Schedule {
    /// Creates an active schedule. The first run is due at `start_at`, or
    /// one interval from `now` when not given.
    pub fn new(
        material_id: Uuid,
        interval_secs: u64,
        start_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<Self, ValidationError> {
        if interval_secs < MIN_SCHEDULE_INTERVAL_SECS {
            return Err(ValidationError::IntervalTooShort {
                min: MIN_SCHEDULE_INTERVAL_SECS,
            });
        }
        let interval = Duration::try_seconds(interval_secs as i64)
            .ok_or_else(|| ValidationError::Invalid("interval_secs is too large".to_string()))?;
        let next_run_at = match start_at {
            Some(at) => at.trunc_subsecs(3),
            None => now + interval,
        };
        Ok(Self {
            id: Uuid::new_v4(),
            material_id,
            interval_secs,
            next_run_at,
            active: true,
            claimed_until: None,
            last_run_at: None,
            created_at: now,
        })
    }

    pub fn interval(&self) -> Duration {
        Duration::try_seconds(self.interval_secs as i64).unwrap_or(Duration::MAX)
    }

    /// Active, due, and not held by a live claim.
    pub fn is_claimable(&self, now: DateTime<Utc>) -> bool {
        self.active
            && self.next_run_at <= now
            && self.claimed_until.map(|until| until <= now).unwrap_or(true)
    }

    /// Next due time after a run that started at `run_started_at`.
    pub fn next_run_after(&self, run_started_at: DateTime<Utc>) -> DateTime<Utc> {
        run_started_at + self.interval()
    }
}

/// Legacy demo record behind `POST /items/`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub id: Uuid,
    pub name: String,
    pub description: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn submission(url: Option<&str>, pdf: Option<&str>, yt: Option<&str>) -> NewMaterial {
        NewMaterial {
            title: "t".to_string(),
            url: url.map(String::from),
            pdf_file: pdf.map(String::from),
            youtube_link: yt.map(String::from),
        }
    }

    #[test]
    fn single_url_source_is_accepted() {
        let m = submission(Some("https://a.test"), None, None)
            .into_material(utc_now())
            .unwrap();
        assert_eq!(m.source, SourceRef::Url("https://a.test".to_string()));
        assert_eq!(m.status, MaterialStatus::Pending);
        assert!(m.extracted_content.is_none());
    }

    #[test]
    fn no_source_is_rejected() {
        let err = submission(None, None, None)
            .into_material(utc_now())
            .unwrap_err();
        assert_eq!(err, ValidationError::MissingSource);
    }

    #[test]
    fn blank_fields_count_as_missing() {
        let err = submission(Some("  "), Some(""), None)
            .into_material(utc_now())
            .unwrap_err();
        assert_eq!(err, ValidationError::MissingSource);
    }

    #[test]
    fn two_sources_are_rejected() {
        let err = submission(Some("https://a.test"), None, Some("https://youtu.be/x"))
            .into_material(utc_now())
            .unwrap_err();
        assert_eq!(err, ValidationError::MultipleSources(2));
    }

    #[test]
    fn non_http_url_is_rejected() {
        let err = submission(Some("ftp://a.test/file"), None, None)
            .into_material(utc_now())
            .unwrap_err();
        assert!(matches!(err, ValidationError::InvalidUrl(_)));
    }

    #[test]
    fn blank_title_defaults_to_link() {
        let mut req = submission(None, None, Some("https://youtu.be/dQw4w9WgXcQ"));
        req.title = "   ".to_string();
        let m = req.into_material(utc_now()).unwrap();
        assert_eq!(m.title, "https://youtu.be/dQw4w9WgXcQ");
    }

    #[test]
    fn fields_expose_exactly_one_source() {
        let src = SourceRef::Pdf("/tmp/a.pdf".to_string());
        assert_eq!(src.as_fields(), (None, Some("/tmp/a.pdf"), None));
        assert_eq!(src.kind(), SourceKind::Pdf);
    }

    #[test]
    fn schedule_interval_lower_bound() {
        let err = Schedule::new(Uuid::new_v4(), 5, None, utc_now()).unwrap_err();
        assert_eq!(err, ValidationError::IntervalTooShort { min: 60 });
    }

    #[test]
    fn schedule_first_run_is_one_interval_out() {
        let now = utc_now();
        let s = Schedule::new(Uuid::new_v4(), 3600, None, now).unwrap();
        assert_eq!(s.next_run_at, now + Duration::hours(1));
        assert!(s.active);
        assert!(!s.is_claimable(now));
        assert!(s.is_claimable(now + Duration::hours(1)));
    }

    #[test]
    fn live_claim_blocks_claiming() {
        let now = utc_now();
        let mut s = Schedule::new(Uuid::new_v4(), 60, Some(now), now).unwrap();
        s.claimed_until = Some(now + Duration::minutes(5));
        assert!(!s.is_claimable(now));
        assert!(s.is_claimable(now + Duration::minutes(5)));
    }

    #[test]
    fn next_run_is_start_plus_interval() {
        let now = utc_now();
        let s = Schedule::new(Uuid::new_v4(), 600, Some(now), now).unwrap();
        let started = now + Duration::seconds(3);
        assert_eq!(s.next_run_after(started), started + Duration::minutes(10));
    }
}
