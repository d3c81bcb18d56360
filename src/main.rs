//! # FinSight CLI (`finsight`)
//!
//! The `finsight` binary runs the HTTP API and offers the same operations
//! from the command line.
//!
//! ## Usage
//!
//! ```bash
//! finsight --config ./config/finsight.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `finsight init` | Create the SQLite database and run schema migrations |
//! | `finsight serve` | Start the HTTP API, worker pool and schedule engine |
//! | `finsight submit` | Ingest one material and wait for the result |
//! | `finsight recent` | List the most recently created materials |
//! | `finsight get <id>` | Show one material with its extracted text |
//! | `finsight schedule create` | Monitor a material on an interval |
//! | `finsight schedule list` | List monitoring schedules |
//! | `finsight schedule cancel` | Deactivate a schedule |
//!
//! ## Examples
//!
//! ```bash
//! finsight init
//! finsight submit --url https://example.com/q3-outlook
//! finsight submit --youtube https://youtu.be/dQw4w9WgXcQ --title "Fed briefing"
//! finsight schedule create 6f1c... --interval 3600
//! finsight serve --config ./config/finsight.toml
//! ```
//!
//! When the default config file does not exist, built-in defaults are used.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};

use finsight::{config, get, ingest, logging, migrate, schedules, server};
use finsight_core::models::NewMaterial;

const DEFAULT_CONFIG: &str = "./config/finsight.toml";

/// FinSight: ingest and monitor financial research material.
#[derive(Parser)]
#[command(
    name = "finsight",
    about = "FinSight: ingest and monitor web pages, PDFs and YouTube transcripts",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = DEFAULT_CONFIG)]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema.
    ///
    /// Idempotent; running it on an existing database is safe.
    Init,

    /// Start the HTTP API.
    ///
    /// Binds to `[server].bind`, starts the ingestion workers and, unless
    /// disabled, the schedule engine.
    Serve,

    /// Submit one material and wait for its ingestion to finish.
    ///
    /// Exactly one of `--url`, `--pdf` and `--youtube` is required.
    Submit {
        /// Display title. Defaults to the source location.
        #[arg(long, default_value = "")]
        title: String,

        /// Web page URL.
        #[arg(long)]
        url: Option<String>,

        /// PDF location: http(s) URL, `file://` URL or local path.
        #[arg(long)]
        pdf: Option<String>,

        /// YouTube video link.
        #[arg(long)]
        youtube: Option<String>,
    },

    /// List the most recently created materials.
    Recent {
        /// Number of materials (at most 100).
        #[arg(long)]
        limit: Option<usize>,

        /// Print JSON instead of a table.
        #[arg(long)]
        json: bool,
    },

    /// Show a material by UUID.
    Get {
        /// Material UUID.
        id: String,

        /// Print JSON instead of text.
        #[arg(long)]
        json: bool,
    },

    /// Manage monitoring schedules.
    Schedule {
        #[command(subcommand)]
        action: ScheduleAction,
    },
}

#[derive(Subcommand)]
enum ScheduleAction {
    /// Recheck a material every `--interval` seconds.
    Create {
        /// Material UUID.
        material_id: String,

        /// Seconds between rechecks (at least 60).
        #[arg(long)]
        interval: u64,

        /// First run time (RFC 3339). Defaults to now.
        #[arg(long)]
        start_at: Option<DateTime<Utc>>,
    },

    /// List schedules.
    List {
        /// Include cancelled schedules.
        #[arg(long)]
        all: bool,
    },

    /// Deactivate a schedule.
    Cancel {
        /// Schedule UUID.
        id: String,
    },
}

fn resolve_config(path: &Path) -> anyhow::Result<config::Config> {
    if !path.exists() && path == Path::new(DEFAULT_CONFIG) {
        return Ok(config::Config::minimal());
    }
    config::load_config(path)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = resolve_config(&cli.config)?;
    logging::init_logging(&cfg.logging)?;

    match cli.command {
        Commands::Init => {
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized successfully.");
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
        Commands::Submit {
            title,
            url,
            pdf,
            youtube,
        } => {
            let request = NewMaterial {
                title,
                url,
                pdf_file: pdf,
                youtube_link: youtube,
            };
            ingest::run_submit(&cfg, request).await?;
        }
        Commands::Recent { limit, json } => {
            get::run_recent(&cfg, limit, json).await?;
        }
        Commands::Get { id, json } => {
            get::run_get(&cfg, &id, json).await?;
        }
        Commands::Schedule { action } => match action {
            ScheduleAction::Create {
                material_id,
                interval,
                start_at,
            } => {
                schedules::run_create(&cfg, &material_id, interval, start_at).await?;
            }
            ScheduleAction::List { all } => {
                schedules::run_list(&cfg, all).await?;
            }
            ScheduleAction::Cancel { id } => {
                schedules::run_cancel(&cfg, &id).await?;
            }
        },
    }

    Ok(())
}
