//! Material lookups and their JSON shape.
//!
//! Used by both the `finsight get` / `finsight recent` CLI commands and the
//! `/materials` HTTP handlers.

use anyhow::Result;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use uuid::Uuid;

use finsight_core::models::Material;

use crate::config::Config;
use crate::db;
use crate::migrate;
use crate::sqlite_store::SqliteStore;
use finsight_core::store::MaterialStore;

pub const DEFAULT_RECENT_LIMIT: usize = 10;
pub const MAX_RECENT_LIMIT: usize = 100;

/// Material as returned to clients. Exactly one of `url`, `pdf_file` and
/// `youtube_link` is non-null.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct MaterialResponse {
    pub id: Uuid,
    pub title: String,
    pub url: Option<String>,
    pub pdf_file: Option<String>,
    pub youtube_link: Option<String>,
    pub source_kind: &'static str,
    pub status: &'static str,
    pub created_at: String,
    pub updated_at: String,
    pub last_checked_at: Option<String>,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub extracted_title: Option<String>,
    pub content_fingerprint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extracted_content: Option<String>,
}

impl MaterialResponse {
    /// Summary form, without the extracted text.
    pub fn summary(material: &Material) -> Self {
        let (url, pdf_file, youtube_link) = material.source.as_fields();
        Self {
            id: material.id,
            title: material.title.clone(),
            url: url.map(String::from),
            pdf_file: pdf_file.map(String::from),
            youtube_link: youtube_link.map(String::from),
            source_kind: material.source.kind().as_str(),
            status: material.status.as_str(),
            created_at: format_ts_iso(material.created_at),
            updated_at: format_ts_iso(material.updated_at),
            last_checked_at: material.last_checked_at.map(format_ts_iso),
            attempts: material.attempts,
            last_error: material.last_error.clone(),
            extracted_title: material.extracted_title.clone(),
            content_fingerprint: material.content_fingerprint.clone(),
            extracted_content: None,
        }
    }

    /// Full form, including the extracted text once available.
    pub fn detailed(material: &Material) -> Self {
        Self {
            extracted_content: material.extracted_content.clone(),
            ..Self::summary(material)
        }
    }
}

/// RFC 3339 UTC with millisecond precision, e.g. `2025-04-02T11:25:05.819Z`.
pub fn format_ts_iso(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Caps a requested recency window at `MAX_RECENT_LIMIT`. Zero is kept and
/// yields an empty list.
pub fn clamp_recent_limit(limit: Option<usize>) -> usize {
    limit
        .unwrap_or(DEFAULT_RECENT_LIMIT)
        .min(MAX_RECENT_LIMIT)
}

async fn open_store(config: &Config) -> Result<SqliteStore> {
    let pool = db::connect(config).await?;
    migrate::apply(&pool).await?;
    Ok(SqliteStore::new(pool))
}

/// CLI entry point for `finsight get <id>`.
pub async fn run_get(config: &Config, id: &str, json: bool) -> Result<()> {
    let id = Uuid::parse_str(id).map_err(|_| anyhow::anyhow!("invalid material id: {}", id))?;
    let store = open_store(config).await?;
    let material = store.get(id).await;
    store.pool().close().await;
    let material = material?;

    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&MaterialResponse::detailed(&material))?
        );
        return Ok(());
    }

    println!("--- Material ---");
    println!("id:             {}", material.id);
    println!("title:          {}", material.title);
    println!(
        "source:         {} {}",
        material.source.kind().as_str(),
        material.source.location()
    );
    println!("status:         {}", material.status);
    println!("attempts:       {}", material.attempts);
    println!("created_at:     {}", format_ts_iso(material.created_at));
    println!("updated_at:     {}", format_ts_iso(material.updated_at));
    if let Some(ts) = material.last_checked_at {
        println!("last_checked:   {}", format_ts_iso(ts));
    }
    if let Some(ref fp) = material.content_fingerprint {
        println!("fingerprint:    {}", fp);
    }
    if let Some(ref err) = material.last_error {
        println!("last_error:     {}", err);
    }
    println!();

    if let Some(ref text) = material.extracted_content {
        println!("--- Content ---");
        println!("{}", text);
    }

    Ok(())
}

/// CLI entry point for `finsight recent`.
pub async fn run_recent(config: &Config, limit: Option<usize>, json: bool) -> Result<()> {
    let store = open_store(config).await?;
    let materials = store.list_recent(clamp_recent_limit(limit)).await;
    store.pool().close().await;
    let materials = materials?;

    if json {
        let body: Vec<MaterialResponse> = materials.iter().map(MaterialResponse::summary).collect();
        println!("{}", serde_json::to_string_pretty(&body)?);
        return Ok(());
    }

    if materials.is_empty() {
        println!("No materials yet.");
        return Ok(());
    }
    for m in &materials {
        println!(
            "{}  {:<10}  {:<7}  {}  {}",
            format_ts_iso(m.created_at),
            m.status.as_str(),
            m.source.kind().as_str(),
            m.id,
            m.title
        );
    }
    Ok(())
}
