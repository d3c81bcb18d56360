//! # FinSight
//!
//! Content ingestion and monitoring backend for financial research material.
//!
//! Clients submit web pages, PDF documents and YouTube videos. Each
//! submission becomes a *material* that a bounded worker pool fetches,
//! extracts to plain text and persists, retrying transient network
//! failures with exponential backoff. Materials can be placed on a
//! monitoring schedule; every recheck re-runs the pipeline and reports a
//! change when the content fingerprint moves.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌────────────┐   ┌──────────────────────────┐   ┌──────────┐
//! │ HTTP/CLI │──▶│ Dispatcher │──▶│ Pipeline                 │──▶│  SQLite  │
//! └──────────┘   │ (bounded)  │   │ fetch → extract → store  │   │ materials│
//!                └─────▲──────┘   └──────────────────────────┘   │ schedules│
//!                      │                                          └────┬─────┘
//!                ┌─────┴──────┐                                        │
//!                │  Schedule  │◀──────────── claim due ────────────────┘
//!                │   engine   │
//!                └────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! finsight init
//! finsight submit --url https://example.com/report
//! finsight recent
//! finsight serve
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`logging`] | `tracing` subscriber setup |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`sqlite_store`] | SQLite material, schedule and item stores |
//! | [`fetch`] | URL, PDF and YouTube fetchers |
//! | [`extract`] | Plain-text extraction |
//! | [`pipeline`] | Per-material state machine |
//! | [`dispatcher`] | Bounded queue and worker pool |
//! | [`scheduler`] | Monitoring schedule engine |
//! | [`runtime`] | Service wiring and startup recovery |
//! | [`ingest`] | Material submission |
//! | [`get`] | Material lookups |
//! | [`schedules`] | Schedule operations |
//! | [`server`] | HTTP API |
//!
//! Shared domain types, the status machine and the store traits live in
//! the `finsight-core` crate.

pub mod config;
pub mod db;
pub mod dispatcher;
pub mod extract;
pub mod fetch;
pub mod get;
pub mod ingest;
pub mod logging;
pub mod migrate;
pub mod pipeline;
pub mod runtime;
pub mod scheduler;
pub mod schedules;
pub mod server;
pub mod sqlite_store;
