//! Bookmark database operations

use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqliteConnection};
use std::path::PathBuf;
use talebox_core::{AppError, BookId, Bookmark, Duration};

/// Replaces all bookmark rows of a book
pub async fn replace_bookmarks(
    conn: &mut SqliteConnection,
    book_id: BookId,
    bookmarks: &[Bookmark],
) -> Result<(), AppError> {
    sqlx::query("DELETE FROM bookmarks WHERE book_id = ?")
        .bind(book_id.as_i64())
        .execute(&mut *conn)
        .await
        .map_err(|e| AppError::database("Failed to clear bookmarks", e))?;

    for bookmark in bookmarks {
        sqlx::query("INSERT INTO bookmarks (path, title, time, book_id) VALUES (?, ?, ?, ?)")
            .bind(bookmark.path.to_string_lossy().as_ref())
            .bind(&bookmark.title)
            .bind(bookmark.time.as_millis() as i64)
            .bind(book_id.as_i64())
            .execute(&mut *conn)
            .await
            .map_err(|e| AppError::database("Failed to insert bookmark", e))?;
    }
    Ok(())
}

/// Loads a book's bookmarks ordered by chapter path, then time
pub async fn bookmarks_for_book(
    conn: &mut SqliteConnection,
    book_id: BookId,
) -> Result<Vec<Bookmark>, AppError> {
    let rows =
        sqlx::query("SELECT path, title, time FROM bookmarks WHERE book_id = ? ORDER BY path, time")
            .bind(book_id.as_i64())
            .fetch_all(conn)
            .await
            .map_err(|e| AppError::database("Failed to fetch bookmarks", e))?;

    Ok(rows.into_iter().map(row_to_bookmark).collect())
}

fn row_to_bookmark(row: SqliteRow) -> Bookmark {
    Bookmark {
        path: PathBuf::from(row.get::<String, _>("path")),
        title: row.get("title"),
        time: Duration::from_millis(row.get::<i64, _>("time").max(0) as u64),
    }
}
