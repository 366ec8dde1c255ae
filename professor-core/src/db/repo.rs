//! Database repository layer
//!
//! Provides the source registry, record persistence and the paged sorted
//! read-back used by aggregation.

use super::{PersistenceSink, RecordStream, SortedReader};
use crate::document::{codec, Document};
use crate::error::{Error, Result};
use crate::types::{OpKind, SourceDescriptor, StoredRecord};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Records fetched per round trip by [`SortedRecords`] unless configured
pub const DEFAULT_PAGE_SIZE: usize = 500;

/// Database handle (single connection)
pub struct Database {
    conn: Mutex<Connection>,
    page_size: usize,
}

impl Database {
    /// Open or create a database at the given path
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;

        conn.execute_batch(
            "
            PRAGMA foreign_keys = ON;
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            ",
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
            page_size: DEFAULT_PAGE_SIZE,
        })
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute("PRAGMA foreign_keys = ON", [])?;
        Ok(Self {
            conn: Mutex::new(conn),
            page_size: DEFAULT_PAGE_SIZE,
        })
    }

    /// Set how many records the sorted read-back fetches per query
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Run migrations on this database
    pub fn migrate(&self) -> Result<()> {
        super::schema::run_migrations(&self.connection())
    }

    /// Get the underlying connection (for advanced use)
    pub fn connection(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ============================================
    // Source operations
    // ============================================

    /// Register a new source.
    ///
    /// Fails with [`Error::SourceExists`] if the hostname/dbname pair is
    /// already registered.
    pub fn register_source(&self, source: &SourceDescriptor) -> Result<()> {
        let conn = self.connection();
        let existing: Option<String> = conn
            .query_row(
                "SELECT id FROM sources WHERE hostname = ? AND dbname = ?",
                [&source.hostname, &source.dbname],
                |row| row.get(0),
            )
            .optional()?;
        if existing.is_some() {
            return Err(Error::SourceExists {
                hostname: source.hostname.clone(),
                dbname: source.dbname.clone(),
            });
        }

        conn.execute(
            r#"
            INSERT INTO sources (id, hostname, dbname, username, password, last_sync_at, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
            params![
                source.id,
                source.hostname,
                source.dbname,
                source.username,
                source.password,
                source.last_sync_at.map(ts_to_sql),
                ts_to_sql(source.created_at),
            ],
        )?;

        tracing::info!(source = %source.display_name(), id = %source.id, "Registered source");
        Ok(())
    }

    /// Insert or update a source
    pub fn upsert_source(&self, source: &SourceDescriptor) -> Result<()> {
        let conn = self.connection();
        conn.execute(
            r#"
            INSERT INTO sources (id, hostname, dbname, username, password, last_sync_at, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT(id) DO UPDATE SET
                hostname = excluded.hostname,
                dbname = excluded.dbname,
                username = excluded.username,
                password = excluded.password,
                last_sync_at = excluded.last_sync_at
            "#,
            params![
                source.id,
                source.hostname,
                source.dbname,
                source.username,
                source.password,
                source.last_sync_at.map(ts_to_sql),
                ts_to_sql(source.created_at),
            ],
        )?;
        Ok(())
    }

    /// Get a source by ID
    pub fn get_source(&self, id: &str) -> Result<Option<SourceDescriptor>> {
        let conn = self.connection();
        conn.query_row("SELECT * FROM sources WHERE id = ?", [id], Self::row_to_source)
            .optional()
            .map_err(Error::from)
    }

    /// Get a source by its hostname/dbname identity
    pub fn find_source(&self, hostname: &str, dbname: &str) -> Result<Option<SourceDescriptor>> {
        let conn = self.connection();
        conn.query_row(
            "SELECT * FROM sources WHERE hostname = ? AND dbname = ?",
            [hostname, dbname],
            Self::row_to_source,
        )
        .optional()
        .map_err(Error::from)
    }

    /// All sources, ordered by hostname then dbname
    pub fn list_sources(&self) -> Result<Vec<SourceDescriptor>> {
        let conn = self.connection();
        let mut stmt = conn.prepare("SELECT * FROM sources ORDER BY hostname, dbname")?;
        let sources = stmt
            .query_map([], Self::row_to_source)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(sources)
    }

    /// Delete every stored record of a source, keeping its watermark.
    /// Returns the number of records removed.
    pub fn clear_profiles(&self, source_id: &str) -> Result<usize> {
        let conn = self.connection();
        let removed = conn.execute("DELETE FROM profiles WHERE source_id = ?", [source_id])?;
        tracing::info!(source_id, removed, "Cleared profiles");
        Ok(removed)
    }

    /// Delete every stored record of a source and forget its watermark, so
    /// the next sync starts from the beginning.
    pub fn reset_source(&self, source_id: &str) -> Result<usize> {
        let mut conn = self.connection();
        let tx = conn.transaction()?;
        let updated = tx.execute(
            "UPDATE sources SET last_sync_at = NULL WHERE id = ?",
            [source_id],
        )?;
        if updated == 0 {
            return Err(Error::SourceNotFound(source_id.to_string()));
        }
        let removed = tx.execute("DELETE FROM profiles WHERE source_id = ?", [source_id])?;
        tx.commit()?;

        tracing::info!(source_id, removed, "Reset source");
        Ok(removed)
    }

    /// Remove a source together with its stored records
    pub fn remove_source(&self, source_id: &str) -> Result<()> {
        let mut conn = self.connection();
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM profiles WHERE source_id = ?", [source_id])?;
        let deleted = tx.execute("DELETE FROM sources WHERE id = ?", [source_id])?;
        if deleted == 0 {
            return Err(Error::SourceNotFound(source_id.to_string()));
        }
        tx.commit()?;

        tracing::info!(source_id, "Removed source");
        Ok(())
    }

    fn row_to_source(row: &Row) -> rusqlite::Result<SourceDescriptor> {
        let last_sync_str: Option<String> = row.get("last_sync_at")?;

        Ok(SourceDescriptor {
            id: row.get("id")?,
            hostname: row.get("hostname")?,
            dbname: row.get("dbname")?,
            username: row.get("username")?,
            password: row.get("password")?,
            last_sync_at: last_sync_str
                .map(|s| parse_ts(&s).map_err(|e| conversion_error(row, "last_sync_at", e)))
                .transpose()?,
            created_at: get_ts(row, "created_at")?,
        })
    }

    // ============================================
    // Profile operations
    // ============================================

    /// Insert a normalized record, returning its row id
    pub fn insert_record(&self, record: &StoredRecord) -> Result<i64> {
        let query = codec::to_string(&record.query)?;
        let sort = record.sort.as_ref().map(codec::to_string).transpose()?;
        let extra = codec::to_string(&record.extra)?;

        let conn = self.connection();
        conn.execute(
            r#"
            INSERT INTO profiles (source_id, ns, collection, op, skeleton, sort_skeleton,
                                  millis, ts, client, user, query, sort, extra)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
            "#,
            params![
                record.source_id,
                record.ns,
                record.collection,
                record.op.as_str(),
                record.skeleton,
                record.sort_skeleton,
                record.millis,
                ts_to_sql(record.ts),
                record.client,
                record.user,
                query,
                sort,
                extra,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Number of stored records for a source
    pub fn count_profiles(&self, source_id: &str) -> Result<i64> {
        let conn = self.connection();
        let count = conn.query_row(
            "SELECT COUNT(*) FROM profiles WHERE source_id = ?",
            [source_id],
            |r| r.get(0),
        )?;
        Ok(count)
    }

    /// All records of one query shape in one collection, newest first.
    pub fn records_for_shape(
        &self,
        source_id: &str,
        collection: &str,
        skeleton: &str,
        limit: Option<usize>,
    ) -> Result<Vec<StoredRecord>> {
        let conn = self.connection();
        let mut stmt = conn.prepare(
            r#"
            SELECT * FROM profiles
            WHERE source_id = ?1 AND collection = ?2 AND skeleton = ?3
            ORDER BY ts DESC, id DESC
            LIMIT ?4
            "#,
        )?;
        let limit = limit.map_or(-1, |l| l as i64);
        let records = stmt
            .query_map(
                params![source_id, collection, skeleton, limit],
                Self::row_to_record,
            )?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(records)
    }

    /// Stream records in grouping order, one page at a time
    pub fn sorted(&self, source_id: &str, op: OpKind, collection: Option<&str>) -> SortedRecords<'_> {
        SortedRecords {
            db: self,
            source_id: source_id.to_string(),
            op,
            collection: collection.map(str::to_string),
            buffer: Vec::new().into_iter(),
            after: None,
            exhausted: false,
        }
    }

    fn fetch_page(
        &self,
        source_id: &str,
        op: OpKind,
        collection: Option<&str>,
        after: Option<&PageKey>,
    ) -> Result<Vec<StoredRecord>> {
        let conn = self.connection();
        let mut stmt = conn.prepare_cached(
            r#"
            SELECT * FROM profiles
            WHERE source_id = ?1 AND op = ?2
              AND (?3 IS NULL OR collection = ?3)
              AND (?4 IS NULL OR (collection, IFNULL(skeleton, ''), id) > (?4, ?5, ?6))
            ORDER BY collection, IFNULL(skeleton, ''), id
            LIMIT ?7
            "#,
        )?;
        let records = stmt
            .query_map(
                params![
                    source_id,
                    op.as_str(),
                    collection,
                    after.map(|k| k.collection.as_str()),
                    after.map(|k| k.skeleton.as_str()),
                    after.map(|k| k.id),
                    self.page_size as i64,
                ],
                Self::row_to_record,
            )?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(records)
    }

    fn row_to_record(row: &Row) -> rusqlite::Result<StoredRecord> {
        let op_str: String = row.get("op")?;
        let sort_str: Option<String> = row.get("sort")?;

        Ok(StoredRecord {
            id: row.get("id")?,
            source_id: row.get("source_id")?,
            ns: row.get("ns")?,
            collection: row.get("collection")?,
            op: op_str
                .parse()
                .map_err(|e: String| conversion_error(row, "op", e.into()))?,
            skeleton: row.get("skeleton")?,
            sort_skeleton: row.get("sort_skeleton")?,
            millis: row.get("millis")?,
            ts: get_ts(row, "ts")?,
            client: row.get("client")?,
            user: row.get("user")?,
            query: get_document(row, "query")?,
            sort: sort_str
                .map(|s| codec::from_str(&s).map_err(|e| conversion_error(row, "sort", Box::new(e))))
                .transpose()?,
            extra: get_document(row, "extra")?,
        })
    }
}

impl PersistenceSink for Database {
    fn save_record(&self, record: &StoredRecord) -> Result<()> {
        self.insert_record(record).map(|_| ())
    }

    fn save_source(&self, source: &SourceDescriptor) -> Result<()> {
        self.upsert_source(source)
    }

    fn begin(&self) -> Result<()> {
        self.connection().execute_batch("BEGIN IMMEDIATE")?;
        Ok(())
    }

    fn commit(&self) -> Result<()> {
        self.connection().execute_batch("COMMIT")?;
        Ok(())
    }

    fn rollback(&self) -> Result<()> {
        let conn = self.connection();
        if !conn.is_autocommit() {
            conn.execute_batch("ROLLBACK")?;
        }
        Ok(())
    }
}

impl SortedReader for Database {
    fn sorted_records<'a>(
        &'a self,
        source_id: &str,
        op: OpKind,
        collection: Option<&str>,
    ) -> Result<RecordStream<'a>> {
        Ok(Box::new(self.sorted(source_id, op, collection)))
    }
}

// ============================================
// Sorted read-back
// ============================================

/// Position after the last record of a page
#[derive(Debug, Clone)]
struct PageKey {
    collection: String,
    skeleton: String,
    id: i64,
}

/// Lazy iterator over stored records in grouping order.
///
/// Uses keyset pagination, so at most one page of records is held in memory
/// and the connection lock is only taken while a page is fetched.
pub struct SortedRecords<'a> {
    db: &'a Database,
    source_id: String,
    op: OpKind,
    collection: Option<String>,
    buffer: std::vec::IntoIter<StoredRecord>,
    after: Option<PageKey>,
    exhausted: bool,
}

impl Iterator for SortedRecords<'_> {
    type Item = Result<StoredRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(record) = self.buffer.next() {
            return Some(Ok(record));
        }
        if self.exhausted {
            return None;
        }

        let page = match self.db.fetch_page(
            &self.source_id,
            self.op,
            self.collection.as_deref(),
            self.after.as_ref(),
        ) {
            Ok(page) => page,
            Err(e) => {
                self.exhausted = true;
                return Some(Err(e));
            }
        };

        if page.len() < self.db.page_size {
            self.exhausted = true;
        }
        if let Some(last) = page.last() {
            self.after = Some(PageKey {
                collection: last.collection.clone(),
                skeleton: last.skeleton.clone().unwrap_or_default(),
                id: last.id.unwrap_or_default(),
            });
        }

        tracing::trace!(fetched = page.len(), "Fetched sorted page");
        self.buffer = page.into_iter();
        self.buffer.next().map(Ok)
    }
}

// ============================================
// Column helpers
// ============================================

/// Timestamps are stored as fixed-width RFC 3339 UTC text so that text
/// comparison in SQL orders them chronologically.
fn ts_to_sql(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_ts(s: &str) -> std::result::Result<DateTime<Utc>, Box<dyn std::error::Error + Send + Sync>> {
    Ok(DateTime::parse_from_rfc3339(s)?.with_timezone(&Utc))
}

fn get_ts(row: &Row, column: &str) -> rusqlite::Result<DateTime<Utc>> {
    let text: String = row.get(column)?;
    parse_ts(&text).map_err(|e| conversion_error(row, column, e))
}

fn get_document(row: &Row, column: &str) -> rusqlite::Result<Document> {
    let text: String = row.get(column)?;
    codec::from_str(&text).map_err(|e| conversion_error(row, column, Box::new(e)))
}

fn conversion_error(
    row: &Row,
    column: &str,
    cause: Box<dyn std::error::Error + Send + Sync>,
) -> rusqlite::Error {
    let index = row.as_ref().column_index(column).unwrap_or_default();
    rusqlite::Error::FromSqlConversionFailure(index, Type::Text, cause)
}
