//! Schema migrations
//!
//! The schema history is an ordered chain of versioned steps. Each step is
//! self-contained and migrates one schema change; the runner applies every
//! step at or above the starting version, in order. A step that cannot
//! reconstruct valid data returns a structured failure, and the runner's
//! recovery is deliberate: drop everything and recreate an empty schema
//! rather than leave a partially-migrated database behind.

use crate::DbPool;
use log::{error, info};
use serde::Deserialize;
use sqlx::{Row, SqliteConnection};
use talebox_core::AppError;

/// First version the chain knows how to start from
pub const FIRST_VERSION: i64 = 23;

/// Current database schema version
pub const CURRENT_VERSION: i64 = 32;

/// Runs all pending migrations, picking up from the last recorded version
pub async fn run_migrations(pool: &DbPool) -> Result<(), AppError> {
    ensure_migrations_table(pool).await?;

    let applied: Option<i64> = sqlx::query_scalar("SELECT MAX(version) FROM schema_migrations")
        .fetch_one(pool)
        .await
        .map_err(|e| AppError::database("Failed to read migration state", e))?;

    let from = applied.map(|v| v + 1).unwrap_or(FIRST_VERSION);
    run_migrations_from(pool, from).await
}

/// Applies every migration step with version >= `from_version`, in order.
///
/// On the first failing step the whole schema is dropped and recreated
/// empty. That data loss is an accepted fallback and is logged loudly.
pub async fn run_migrations_from(pool: &DbPool, from_version: i64) -> Result<(), AppError> {
    ensure_migrations_table(pool).await?;

    for version in from_version.max(FIRST_VERSION)..=CURRENT_VERSION {
        match apply_step(pool, version).await {
            Ok(()) => {
                record_applied(pool, version).await?;
            }
            Err(e) => {
                error!("migration step {version} failed, dropping and recreating schema: {e}");
                drop_and_recreate(pool).await?;
                return Ok(());
            }
        }
    }
    Ok(())
}

/// Applies a single migration step inside its own transaction; a failing
/// step rolls back and leaves no partial rows behind
pub(crate) async fn apply_step(pool: &DbPool, version: i64) -> Result<(), AppError> {
    info!("applying migration step {version}");
    let mut tx = pool.begin().await.map_err(|e| exec_error(version, e))?;
    let step = match version {
        23 => create_json_store(&mut tx).await,
        24 => relational_split(&mut tx).await,
        25 => add_playback_speed(&mut tx).await,
        26 => rebuild_books(&mut tx).await,
        27 => drop_stale_copy(&mut tx).await,
        28 => add_bookmarks(&mut tx).await,
        29 => add_active_flag(&mut tx).await,
        30 => purge_dead_rows(&mut tx).await,
        31 => repair_current_media(&mut tx).await,
        32 => ensure_indexes(&mut tx).await,
        _ => Err(AppError::MigrationFailed {
            version,
            reason: "unknown migration version".to_string(),
        }),
    };
    step?;
    tx.commit().await.map_err(|e| exec_error(version, e))
}

async fn ensure_migrations_table(pool: &DbPool) -> Result<(), AppError> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            applied_at INTEGER NOT NULL DEFAULT (strftime('%s', 'now') * 1000)
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(|e| AppError::database("Failed to create migrations table", e))?;
    Ok(())
}

async fn record_applied(pool: &DbPool, version: i64) -> Result<(), AppError> {
    sqlx::query("INSERT OR REPLACE INTO schema_migrations (version) VALUES (?)")
        .bind(version)
        .execute(pool)
        .await
        .map_err(|e| AppError::database("Failed to record migration", e))?;
    Ok(())
}

async fn table_exists(conn: &mut SqliteConnection, name: &str) -> Result<bool, AppError> {
    let found: Option<String> =
        sqlx::query_scalar("SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?")
            .bind(name)
            .fetch_optional(&mut *conn)
            .await
            .map_err(|e| AppError::database("Failed to inspect schema", e))?;
    Ok(found.is_some())
}

fn exec_error(version: i64, e: sqlx::Error) -> AppError {
    AppError::MigrationFailed {
        version,
        reason: e.to_string(),
    }
}

// ---- step 23: the JSON-blob era baseline ----

async fn create_json_store(conn: &mut SqliteConnection) -> Result<(), AppError> {
    sqlx::query("DROP TABLE IF EXISTS book_data")
        .execute(&mut *conn)
        .await
        .map_err(|e| exec_error(23, e))?;
    sqlx::query(
        r#"
        CREATE TABLE book_data (
            book_id INTEGER PRIMARY KEY AUTOINCREMENT,
            content TEXT NOT NULL
        )
        "#,
    )
    .execute(&mut *conn)
    .await
    .map_err(|e| exec_error(23, e))?;
    Ok(())
}

// ---- step 24: split the JSON blobs into relational tables ----

#[derive(Deserialize)]
struct LegacyChapter {
    path: String,
    name: String,
    duration: i64,
}

#[derive(Deserialize)]
struct LegacyBook {
    name: String,
    root: String,
    #[serde(rename = "type")]
    book_type: String,
    #[serde(default, rename = "currentMediaPath")]
    current_media_path: Option<String>,
    #[serde(default)]
    time: i64,
    chapters: Vec<LegacyChapter>,
}

async fn relational_split(conn: &mut SqliteConnection) -> Result<(), AppError> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS books (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            author TEXT,
            current_media_path TEXT NOT NULL,
            root TEXT NOT NULL,
            time INTEGER NOT NULL DEFAULT 0,
            type TEXT NOT NULL,
            use_cover_replacement INTEGER NOT NULL DEFAULT 0
        )
        "#,
    )
    .execute(&mut *conn)
    .await
    .map_err(|e| exec_error(24, e))?;
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chapters (
            duration INTEGER NOT NULL,
            name TEXT NOT NULL,
            path TEXT NOT NULL,
            book_id INTEGER NOT NULL
        )
        "#,
    )
    .execute(&mut *conn)
    .await
    .map_err(|e| exec_error(24, e))?;

    if !table_exists(&mut *conn, "book_data").await? {
        return Ok(());
    }

    let rows = sqlx::query("SELECT book_id, content FROM book_data")
        .fetch_all(&mut *conn)
        .await
        .map_err(|e| exec_error(24, e))?;

    for row in rows {
        let content: String = row.get("content");
        let legacy: LegacyBook =
            serde_json::from_str(&content).map_err(|e| AppError::MigrationFailed {
                version: 24,
                reason: format!("unparseable book payload: {e}"),
            })?;
        if legacy.chapters.is_empty() {
            return Err(AppError::MigrationFailed {
                version: 24,
                reason: format!("book '{}' has no chapters", legacy.name),
            });
        }

        let current = legacy
            .current_media_path
            .unwrap_or_else(|| legacy.chapters[0].path.clone());

        let result = sqlx::query(
            r#"
            INSERT INTO books (name, current_media_path, root, time, type)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(&legacy.name)
        .bind(&current)
        .bind(&legacy.root)
        .bind(legacy.time)
        .bind(&legacy.book_type)
        .execute(&mut *conn)
        .await
        .map_err(|e| exec_error(24, e))?;
        let book_id = result.last_insert_rowid();

        for chapter in &legacy.chapters {
            sqlx::query("INSERT INTO chapters (duration, name, path, book_id) VALUES (?, ?, ?, ?)")
                .bind(chapter.duration)
                .bind(&chapter.name)
                .bind(&chapter.path)
                .bind(book_id)
                .execute(&mut *conn)
                .await
                .map_err(|e| exec_error(24, e))?;
        }
        info!("migrated legacy book '{}'", legacy.name);
    }

    sqlx::query("DROP TABLE book_data")
        .execute(&mut *conn)
        .await
        .map_err(|e| exec_error(24, e))?;
    Ok(())
}

// ---- step 25 ----

async fn add_playback_speed(conn: &mut SqliteConnection) -> Result<(), AppError> {
    sqlx::query("ALTER TABLE books ADD COLUMN playback_speed REAL NOT NULL DEFAULT 1")
        .execute(&mut *conn)
        .await
        .map_err(|e| exec_error(25, e))?;
    Ok(())
}

// ---- step 26: rebuild the books table with full constraints ----

async fn rebuild_books(conn: &mut SqliteConnection) -> Result<(), AppError> {
    sqlx::query("ALTER TABLE books RENAME TO books_copy")
        .execute(&mut *conn)
        .await
        .map_err(|e| exec_error(26, e))?;
    sqlx::query(
        r#"
        CREATE TABLE books (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            author TEXT,
            current_media_path TEXT NOT NULL,
            root TEXT NOT NULL,
            time INTEGER NOT NULL DEFAULT 0,
            type TEXT NOT NULL,
            use_cover_replacement INTEGER NOT NULL DEFAULT 0,
            playback_speed REAL NOT NULL DEFAULT 1
        )
        "#,
    )
    .execute(&mut *conn)
    .await
    .map_err(|e| exec_error(26, e))?;
    sqlx::query(
        r#"
        INSERT INTO books (id, name, author, current_media_path, root, time, type,
                           use_cover_replacement, playback_speed)
        SELECT id, name, author, current_media_path, root, time, type,
               use_cover_replacement, playback_speed
        FROM books_copy
        "#,
    )
    .execute(&mut *conn)
    .await
    .map_err(|e| exec_error(26, e))?;
    sqlx::query("DROP TABLE books_copy")
        .execute(&mut *conn)
        .await
        .map_err(|e| exec_error(26, e))?;
    Ok(())
}

// ---- step 27: interrupted rebuilds used to leave the copy behind ----

async fn drop_stale_copy(conn: &mut SqliteConnection) -> Result<(), AppError> {
    sqlx::query("DROP TABLE IF EXISTS books_copy")
        .execute(&mut *conn)
        .await
        .map_err(|e| exec_error(27, e))?;
    Ok(())
}

// ---- step 28 ----

async fn add_bookmarks(conn: &mut SqliteConnection) -> Result<(), AppError> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS bookmarks (
            path TEXT NOT NULL,
            title TEXT NOT NULL,
            time INTEGER NOT NULL,
            book_id INTEGER NOT NULL
        )
        "#,
    )
    .execute(&mut *conn)
    .await
    .map_err(|e| exec_error(28, e))?;
    Ok(())
}

// ---- step 29 ----

async fn add_active_flag(conn: &mut SqliteConnection) -> Result<(), AppError> {
    sqlx::query("ALTER TABLE books ADD COLUMN active INTEGER NOT NULL DEFAULT 1")
        .execute(&mut *conn)
        .await
        .map_err(|e| exec_error(29, e))?;
    Ok(())
}

// ---- step 30: chapters and bookmarks whose book is gone ----

async fn purge_dead_rows(conn: &mut SqliteConnection) -> Result<(), AppError> {
    sqlx::query("DELETE FROM chapters WHERE book_id NOT IN (SELECT id FROM books)")
        .execute(&mut *conn)
        .await
        .map_err(|e| exec_error(30, e))?;
    sqlx::query("DELETE FROM bookmarks WHERE book_id NOT IN (SELECT id FROM books)")
        .execute(&mut *conn)
        .await
        .map_err(|e| exec_error(30, e))?;
    Ok(())
}

// ---- step 31: current_media_path must reference one of the book's chapters ----

async fn repair_current_media(conn: &mut SqliteConnection) -> Result<(), AppError> {
    sqlx::query(
        r#"
        UPDATE books
        SET current_media_path = (
                SELECT path FROM chapters
                WHERE chapters.book_id = books.id
                ORDER BY path
                LIMIT 1
            ),
            time = 0
        WHERE NOT EXISTS (
            SELECT 1 FROM chapters
            WHERE chapters.book_id = books.id
              AND chapters.path = books.current_media_path
        )
        AND EXISTS (SELECT 1 FROM chapters WHERE chapters.book_id = books.id)
        "#,
    )
    .execute(&mut *conn)
    .await
    .map_err(|e| exec_error(31, e))?;
    Ok(())
}

// ---- step 32 ----

async fn ensure_indexes(conn: &mut SqliteConnection) -> Result<(), AppError> {
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_chapters_book ON chapters(book_id)")
        .execute(&mut *conn)
        .await
        .map_err(|e| exec_error(32, e))?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_bookmarks_book ON bookmarks(book_id)")
        .execute(&mut *conn)
        .await
        .map_err(|e| exec_error(32, e))?;
    Ok(())
}

/// Last-resort recovery: drop everything and recreate the current schema
pub async fn drop_and_recreate(pool: &DbPool) -> Result<(), AppError> {
    error!("recreating database schema from scratch, all book data is lost");

    for table in [
        "books",
        "chapters",
        "bookmarks",
        "book_data",
        "books_copy",
    ] {
        sqlx::query(&format!("DROP TABLE IF EXISTS {table}"))
            .execute(pool)
            .await
            .map_err(|e| AppError::database("Failed to drop table", e))?;
    }

    sqlx::query(
        r#"
        CREATE TABLE books (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL,
            author TEXT,
            current_media_path TEXT NOT NULL,
            root TEXT NOT NULL,
            time INTEGER NOT NULL DEFAULT 0,
            type TEXT NOT NULL,
            use_cover_replacement INTEGER NOT NULL DEFAULT 0,
            playback_speed REAL NOT NULL DEFAULT 1,
            active INTEGER NOT NULL DEFAULT 1
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(|e| AppError::database("Failed to recreate books table", e))?;
    sqlx::query(
        r#"
        CREATE TABLE chapters (
            duration INTEGER NOT NULL,
            name TEXT NOT NULL,
            path TEXT NOT NULL,
            book_id INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(|e| AppError::database("Failed to recreate chapters table", e))?;
    sqlx::query(
        r#"
        CREATE TABLE bookmarks (
            path TEXT NOT NULL,
            title TEXT NOT NULL,
            time INTEGER NOT NULL,
            book_id INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(|e| AppError::database("Failed to recreate bookmarks table", e))?;
    let mut conn = pool
        .acquire()
        .await
        .map_err(|e| AppError::database("Failed to acquire connection", e))?;
    ensure_indexes(&mut conn).await?;
    drop(conn);

    sqlx::query("DELETE FROM schema_migrations")
        .execute(pool)
        .await
        .map_err(|e| AppError::database("Failed to reset migration state", e))?;
    for version in FIRST_VERSION..=CURRENT_VERSION {
        record_applied(pool, version).await?;
    }
    Ok(())
}
