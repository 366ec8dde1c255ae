//! Core domain types for professor
//!
//! ## Terminology
//!
//! | Term | Definition |
//! |------|------------|
//! | **Source** | A monitored database (host + database name) whose profiler output is collected |
//! | **Raw record** | One operation as captured by the source's profiler, untouched |
//! | **Stored record** | A raw record after normalization: collection resolved, shapes fingerprinted, keys escaped |
//! | **Skeleton** | Canonical string for the key structure of a query, independent of its values |
//! | **Watermark** | `last_sync_at`: everything captured before it has already been ingested |
//! | **Summary** | One group of same-shape records reduced to a count and latency distribution |

use crate::document::Document;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================
// Operation kinds
// ============================================

/// Operation kinds reported by the profiler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OpKind {
    Query,
    Insert,
    Update,
    Remove,
    GetMore,
    Command,
    KillCursors,
}

impl OpKind {
    /// Every known kind
    pub const ALL: [OpKind; 7] = [
        OpKind::Query,
        OpKind::Insert,
        OpKind::Update,
        OpKind::Remove,
        OpKind::GetMore,
        OpKind::Command,
        OpKind::KillCursors,
    ];

    /// Returns the identifier used by the profiler and in storage
    pub fn as_str(&self) -> &'static str {
        match self {
            OpKind::Query => "query",
            OpKind::Insert => "insert",
            OpKind::Update => "update",
            OpKind::Remove => "remove",
            OpKind::GetMore => "getmore",
            OpKind::Command => "command",
            OpKind::KillCursors => "killcursors",
        }
    }
}

impl std::fmt::Display for OpKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for OpKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        OpKind::ALL
            .iter()
            .copied()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| format!("unknown operation kind: {}", s))
    }
}

// ============================================
// Sources
// ============================================

/// A monitored database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceDescriptor {
    /// Unique identifier (generated on registration)
    pub id: String,
    /// `host` or `host:port` of the monitored server
    pub hostname: String,
    /// Database name; namespaces are prefixed with `"{dbname}."`
    pub dbname: String,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Watermark: exclusive upper bound of everything ingested so far.
    /// `None` means never synced.
    pub last_sync_at: Option<DateTime<Utc>>,
    /// When this source was registered
    pub created_at: DateTime<Utc>,
}

impl SourceDescriptor {
    /// Create a new, never-synced source with a fresh id
    pub fn new(hostname: impl Into<String>, dbname: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            hostname: hostname.into(),
            dbname: dbname.into(),
            username: None,
            password: None,
            last_sync_at: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    /// `hostname/dbname`, as sources are addressed by operators
    pub fn display_name(&self) -> String {
        format!("{}/{}", self.hostname, self.dbname)
    }
}

// ============================================
// Records
// ============================================

/// One operation as captured by the profiler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawRecord {
    /// Namespace, `db.collection`
    pub ns: String,
    pub op: OpKind,
    /// Query document, possibly wrapped in modifiers (`$query`, `$orderby`)
    pub query: Document,
    /// Sort document when the profiler reports it separately from the query
    pub sort: Option<Document>,
    /// Duration in milliseconds
    pub millis: i64,
    /// When the operation ran
    pub ts: DateTime<Utc>,
    pub client: Option<String>,
    pub user: Option<String>,
    /// Every other field the profiler reported (`nscanned`, `responseLength`, ...)
    pub extra: Document,
}

impl RawRecord {
    /// Create a record with empty query and no optional fields
    pub fn new(ns: impl Into<String>, op: OpKind, millis: i64, ts: DateTime<Utc>) -> Self {
        Self {
            ns: ns.into(),
            op,
            query: Document::new(),
            sort: None,
            millis,
            ts,
            client: None,
            user: None,
            extra: Document::new(),
        }
    }

    pub fn with_query(mut self, query: Document) -> Self {
        self.query = query;
        self
    }
}

/// A normalized record, ready to persist and later group.
///
/// All documents have had their keys escaped with
/// [`sanitize`](crate::sanitize::sanitize).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRecord {
    /// Storage row id, once persisted
    pub id: Option<i64>,
    /// Owning source
    pub source_id: String,
    pub ns: String,
    /// Namespace with the database prefix stripped
    pub collection: String,
    pub op: OpKind,
    /// Skeleton of the query shape. `None` for kinds without an extractor;
    /// such records never group with anything.
    pub skeleton: Option<String>,
    /// Skeleton of the sort specification
    pub sort_skeleton: Option<String>,
    pub millis: i64,
    pub ts: DateTime<Utc>,
    pub client: Option<String>,
    pub user: Option<String>,
    pub query: Document,
    pub sort: Option<Document>,
    pub extra: Document,
}

// ============================================
// Summaries
// ============================================

/// Number of buckets in a latency histogram
pub const HISTOGRAM_BUCKETS: usize = 8;

/// Latency distribution of one group, in milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Timings {
    pub total: i64,
    pub min: i64,
    pub max: i64,
    pub avg: f64,
    /// Element at index `n / 2` of the sorted latencies (upper median for even `n`)
    pub median: i64,
    /// Population standard deviation
    pub stddev: f64,
    /// Counts per logarithmic bucket, see [`crate::analytics::bucket_bounds`]
    pub histogram: [u64; HISTOGRAM_BUCKETS],
}

/// One query shape reduced to its statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    /// First record of the group, carrying collection and skeleton context
    pub record: StoredRecord,
    pub count: usize,
    pub times: Timings,
}
