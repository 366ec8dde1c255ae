//! # professor-core
//!
//! Core library for professor - a database profiler analyzer.
//!
//! This library provides:
//! - A closed document model for captured queries
//! - Query-shape fingerprinting ("skeletons") and reversible key escaping
//! - Incremental, watermark-driven ingestion of profiler output
//! - Streaming grouping of stored records into per-shape latency summaries
//! - Database storage layer with SQLite
//! - Configuration management
//! - Logging infrastructure
//!
//! ## Architecture
//!
//! Data flows through three stages:
//! - **Capture:** raw profiler records, read through a [`ProfileSource`](ingest::ProfileSource)
//! - **Storage:** normalized records with skeletons and escaped keys
//! - **Aggregation:** sorted read-back, grouped by shape and summarized lazily
//!
//! ## Example
//!
//! ```rust,no_run
//! use professor_core::analytics::{aggregate, rank_by_avg};
//! use professor_core::ops::create_default_registry;
//! use professor_core::{Config, Database, OpKind};
//!
//! let config = Config::load().expect("failed to load config");
//!
//! let db = Database::open(&Config::database_path())
//!     .expect("failed to open database")
//!     .with_page_size(config.aggregate.page_size);
//! db.migrate().expect("failed to run migrations");
//!
//! let registry = create_default_registry();
//! for source in db.list_sources().expect("failed to list sources") {
//!     let summaries = aggregate(&db, &registry, &source.id, OpKind::Query, None)
//!         .expect("no query handler")
//!         .collect::<Result<Vec<_>, _>>()
//!         .expect("failed to read profiles");
//!     for summary in rank_by_avg(summaries) {
//!         println!("{} {:?}", summary.count, summary.record.skeleton);
//!     }
//! }
//! ```

// Re-export commonly used items at the crate root
pub use config::Config;
pub use db::{Database, PersistenceSink, SortedReader};
pub use document::{Document, Value};
pub use error::{Error, Result};
pub use ingest::{SyncReport, SyncTracker};
pub use types::*;

// Public modules
pub mod analytics;
pub mod config;
pub mod db;
pub mod document;
pub mod error;
pub mod format;
pub mod ingest;
pub mod logging;
pub mod ops;
pub mod sanitize;
pub mod skeleton;
pub mod types;
