//! Chapter database operations
//!
//! Chapters are never patched row by row; a book's chapter rows are always
//! replaced wholesale inside the caller's transaction.

use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};
use std::path::PathBuf;
use talebox_core::{AppError, BookId, Chapter, Duration};

/// Replaces all chapter rows of a book
pub async fn replace_chapters(
    conn: &mut SqliteConnection,
    book_id: BookId,
    chapters: &[Chapter],
) -> Result<(), AppError> {
    sqlx::query("DELETE FROM chapters WHERE book_id = ?")
        .bind(book_id.as_i64())
        .execute(&mut *conn)
        .await
        .map_err(|e| AppError::database("Failed to clear chapters", e))?;

    for chapter in chapters {
        sqlx::query("INSERT INTO chapters (duration, name, path, book_id) VALUES (?, ?, ?, ?)")
            .bind(chapter.duration.as_millis() as i64)
            .bind(&chapter.name)
            .bind(chapter.path.to_string_lossy().as_ref())
            .bind(book_id.as_i64())
            .execute(&mut *conn)
            .await
            .map_err(|e| AppError::database("Failed to insert chapter", e))?;
    }
    Ok(())
}

/// Loads a book's chapters in canonical (natural) order
pub async fn chapters_for_book(
    conn: &mut SqliteConnection,
    book_id: BookId,
) -> Result<Vec<Chapter>, AppError> {
    let rows = sqlx::query("SELECT duration, name, path FROM chapters WHERE book_id = ?")
        .bind(book_id.as_i64())
        .fetch_all(conn)
        .await
        .map_err(|e| AppError::database("Failed to fetch chapters", e))?;

    let mut chapters: Vec<Chapter> = rows.into_iter().map(row_to_chapter).collect();
    chapters.sort();
    Ok(chapters)
}

fn row_to_chapter(row: SqliteRow) -> Chapter {
    Chapter {
        duration: Duration::from_millis(row.get::<i64, _>("duration").max(0) as u64),
        name: row.get("name"),
        path: PathBuf::from(row.get::<String, _>("path")),
    }
}
