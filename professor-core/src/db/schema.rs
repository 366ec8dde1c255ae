//! Database schema and migrations
//!
//! Uses SQLite with embedded migrations managed via PRAGMA user_version.

use rusqlite::Connection;

/// Current schema version
pub const SCHEMA_VERSION: i32 = 1;

/// SQL migrations, indexed by version number
const MIGRATIONS: &[&str] = &[
    // Version 1: sources and profiles
    r#"
    -- ============================================
    -- Monitored databases
    -- ============================================

    CREATE TABLE IF NOT EXISTS sources (
        id               TEXT PRIMARY KEY,
        hostname         TEXT NOT NULL,
        dbname           TEXT NOT NULL,
        username         TEXT,
        password         TEXT,

        -- Watermark; NULL = never synced
        last_sync_at     DATETIME,
        created_at       DATETIME NOT NULL,

        UNIQUE (hostname, dbname)
    );

    -- ============================================
    -- Normalized profiler records
    -- ============================================

    CREATE TABLE IF NOT EXISTS profiles (
        id               INTEGER PRIMARY KEY AUTOINCREMENT,
        source_id        TEXT NOT NULL REFERENCES sources(id) ON DELETE CASCADE,
        ns               TEXT NOT NULL,
        collection       TEXT NOT NULL,
        op               TEXT NOT NULL,

        -- Shape fingerprints; NULL for kinds without a handler
        skeleton         TEXT,
        sort_skeleton    TEXT,

        millis           INTEGER NOT NULL,
        ts               DATETIME NOT NULL,
        client           TEXT,
        user             TEXT,

        -- Sanitized documents, tagged JSON
        query            JSON NOT NULL,
        sort             JSON,
        extra            JSON NOT NULL
    );

    -- Keyset order of the sorted read-back
    CREATE INDEX IF NOT EXISTS idx_profiles_shape
        ON profiles(source_id, op, collection, IFNULL(skeleton, ''), id);
    CREATE INDEX IF NOT EXISTS idx_profiles_ts ON profiles(source_id, ts);
    "#,
];

/// Run all pending migrations
pub fn run_migrations(conn: &Connection) -> crate::error::Result<()> {
    let current_version: i32 = conn
        .query_row("PRAGMA user_version", [], |r| r.get(0))
        .unwrap_or(0);

    tracing::info!(
        current_version,
        target_version = SCHEMA_VERSION,
        "Checking database migrations"
    );

    for (i, migration) in MIGRATIONS.iter().enumerate() {
        let version = (i + 1) as i32;
        if version > current_version {
            tracing::info!(version, "Running migration");
            conn.execute_batch(migration)?;
            conn.execute_batch(&format!("PRAGMA user_version = {}", version))?;
        }
    }

    if current_version < SCHEMA_VERSION {
        tracing::info!(
            from = current_version,
            to = SCHEMA_VERSION,
            "Migrations complete"
        );
    }

    Ok(())
}

/// Get the current schema version from the database
pub fn get_schema_version(conn: &Connection) -> crate::error::Result<i32> {
    let version: i32 = conn.query_row("PRAGMA user_version", [], |r| r.get(0))?;
    Ok(version)
}
