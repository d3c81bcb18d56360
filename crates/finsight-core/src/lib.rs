//! # FinSight Core
//!
//! Runtime-free building blocks for the FinSight ingestion service:
//! the material and schedule data model, the ingestion status state
//! machine, the fetch retry policy, content fingerprinting, the error
//! taxonomy, and the repository traits with an in-memory backend.
//!
//! This crate contains no tokio, sqlx, HTTP, or filesystem I/O. The
//! root `finsight` crate supplies the SQLite repository, the source
//! fetchers, and the worker/scheduler runtime on top of it.

pub mod content;
pub mod error;
pub mod models;
pub mod retry;
pub mod status;
pub mod store;
