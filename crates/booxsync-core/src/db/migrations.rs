//! Database migrations

use crate::error::Result;
use libsql::Connection;

/// Current schema version
const CURRENT_VERSION: i32 = 2;

/// Synchronized tables and the column identifying a row in the conflict log.
const GUARDED_TABLES: [(&str, &str); 5] = [
    ("library_items", "book_key"),
    ("reading_positions", "book_key"),
    ("bookmarks", "local_id"),
    ("ai_notes", "local_id"),
    ("ai_profiles", "local_id"),
];

/// Run all pending migrations
pub async fn run(conn: &Connection) -> Result<()> {
    let version = get_version(conn).await?;

    if version < 1 {
        migrate_v1(conn).await?;
    }
    if version < 2 {
        migrate_v2(conn).await?;
    }

    Ok(())
}

/// Get the current schema version
async fn get_version(conn: &Connection) -> Result<i32> {
    let mut rows = conn
        .query(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version')",
            (),
        )
        .await?;

    let exists: bool = if let Some(row) = rows.next().await? {
        row.get::<i32>(0)? != 0
    } else {
        false
    };

    if !exists {
        return Ok(0);
    }

    let mut rows = conn
        .query("SELECT COALESCE(MAX(version), 0) FROM schema_version", ())
        .await?;

    let version: i32 = if let Some(row) = rows.next().await? {
        row.get(0)?
    } else {
        0
    };

    Ok(version)
}

async fn apply(conn: &Connection, statements: &[String], version: i32) -> Result<()> {
    // libsql has no execute_batch, so statements run one by one inside a transaction
    conn.execute("BEGIN TRANSACTION", ()).await?;

    for stmt in statements {
        if let Err(e) = conn.execute(stmt.as_str(), ()).await {
            conn.execute("ROLLBACK", ()).await.ok();
            return Err(e.into());
        }
    }

    if let Err(e) = conn.execute("COMMIT", ()).await {
        conn.execute("ROLLBACK", ()).await.ok();
        return Err(e.into());
    }

    tracing::info!("Migrated database to version {version}");
    Ok(())
}

/// Migration to version 1: entity tables
async fn migrate_v1(conn: &Connection) -> Result<()> {
    let statements = [
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY
        )",
        "CREATE TABLE IF NOT EXISTS account (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            user_id TEXT NOT NULL,
            email TEXT
        )",
        "CREATE TABLE IF NOT EXISTS library_items (
            book_key TEXT PRIMARY KEY,
            local_id TEXT NOT NULL UNIQUE,
            title TEXT,
            file_uri TEXT NOT NULL,
            file_hash TEXT,
            last_locator TEXT,
            last_opened_at INTEGER NOT NULL,
            completed INTEGER NOT NULL DEFAULT 0,
            deleted_at INTEGER,
            remote_id TEXT,
            updated_at INTEGER NOT NULL,
            deleted INTEGER NOT NULL DEFAULT 0,
            is_synced INTEGER NOT NULL DEFAULT 0
        )",
        "CREATE INDEX IF NOT EXISTS idx_library_opened ON library_items(last_opened_at DESC)",
        "CREATE INDEX IF NOT EXISTS idx_library_remote ON library_items(remote_id)",
        "CREATE TABLE IF NOT EXISTS reading_positions (
            book_key TEXT PRIMARY KEY,
            local_id TEXT NOT NULL UNIQUE,
            locator TEXT NOT NULL,
            remote_id TEXT,
            updated_at INTEGER NOT NULL,
            is_synced INTEGER NOT NULL DEFAULT 0
        )",
        "CREATE TABLE IF NOT EXISTS bookmarks (
            local_id TEXT PRIMARY KEY,
            book_key TEXT NOT NULL,
            locator TEXT NOT NULL,
            highlight TEXT,
            created_at INTEGER NOT NULL,
            remote_id TEXT,
            updated_at INTEGER NOT NULL,
            deleted INTEGER NOT NULL DEFAULT 0,
            is_synced INTEGER NOT NULL DEFAULT 0
        )",
        "CREATE INDEX IF NOT EXISTS idx_bookmarks_book ON bookmarks(book_key)",
        "CREATE INDEX IF NOT EXISTS idx_bookmarks_remote ON bookmarks(remote_id)",
        "CREATE TABLE IF NOT EXISTS ai_notes (
            local_id TEXT PRIMARY KEY,
            book_key TEXT,
            book_title TEXT,
            messages TEXT NOT NULL,
            original_text TEXT,
            ai_response TEXT,
            locator TEXT,
            profile_remote_id TEXT,
            created_at INTEGER NOT NULL,
            remote_id TEXT,
            updated_at INTEGER NOT NULL,
            deleted INTEGER NOT NULL DEFAULT 0,
            is_synced INTEGER NOT NULL DEFAULT 0
        )",
        "CREATE INDEX IF NOT EXISTS idx_ai_notes_book ON ai_notes(book_key)",
        "CREATE INDEX IF NOT EXISTS idx_ai_notes_remote ON ai_notes(remote_id)",
        "CREATE TABLE IF NOT EXISTS ai_profiles (
            local_id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            model_name TEXT NOT NULL,
            api_key TEXT NOT NULL,
            server_base_url TEXT NOT NULL,
            system_prompt TEXT NOT NULL,
            user_prompt_template TEXT NOT NULL,
            use_streaming INTEGER NOT NULL,
            temperature REAL NOT NULL,
            max_tokens INTEGER NOT NULL,
            top_p REAL NOT NULL,
            frequency_penalty REAL NOT NULL,
            presence_penalty REAL NOT NULL,
            assistant_role TEXT NOT NULL,
            created_at INTEGER NOT NULL,
            remote_id TEXT,
            updated_at INTEGER NOT NULL,
            deleted INTEGER NOT NULL DEFAULT 0,
            is_synced INTEGER NOT NULL DEFAULT 0
        )",
        "CREATE INDEX IF NOT EXISTS idx_ai_profiles_remote ON ai_profiles(remote_id)",
        // Reader settings, one row per key
        "CREATE TABLE IF NOT EXISTS settings (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )",
        "INSERT INTO schema_version (version) VALUES (1)",
    ]
    .map(String::from);

    apply(conn, &statements, 1).await
}

/// Migration to version 2: LWW conflict log and clock guards
async fn migrate_v2(conn: &Connection) -> Result<()> {
    let mut statements = vec![
        "CREATE TABLE IF NOT EXISTS sync_conflicts (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            collection TEXT NOT NULL,
            record_key TEXT NOT NULL,
            local_updated_at INTEGER NOT NULL,
            incoming_updated_at INTEGER NOT NULL,
            resolved_at INTEGER NOT NULL,
            winner TEXT NOT NULL
        )"
        .to_string(),
        "CREATE INDEX IF NOT EXISTS idx_sync_conflicts_resolved_at ON sync_conflicts(resolved_at DESC)"
            .to_string(),
    ];

    // A row's clock never moves backwards; stale writes are dropped and logged.
    for (table, key_column) in GUARDED_TABLES {
        statements.push(format!(
            "CREATE TRIGGER IF NOT EXISTS {table}_clock_guard BEFORE UPDATE ON {table}
             FOR EACH ROW
             WHEN NEW.updated_at < OLD.updated_at
             BEGIN
                 INSERT INTO sync_conflicts (
                     collection,
                     record_key,
                     local_updated_at,
                     incoming_updated_at,
                     resolved_at,
                     winner
                 ) VALUES (
                     '{table}',
                     OLD.{key_column},
                     OLD.updated_at,
                     NEW.updated_at,
                     CAST(strftime('%s','now') AS INTEGER) * 1000,
                     'local'
                 );
                 SELECT RAISE(IGNORE);
             END"
        ));
    }
    statements.push("INSERT INTO schema_version (version) VALUES (2)".to_string());

    apply(conn, &statements, CURRENT_VERSION).await
}
