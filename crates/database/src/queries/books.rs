//! Book database operations
//!
//! A book is one row in `books` plus its chapter and bookmark rows. Every
//! write replaces the dependent rows wholesale inside one transaction so a
//! reader can never observe a half-written book.

use crate::queries::{bookmarks, chapters};
use crate::DbPool;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use std::path::PathBuf;
use talebox_core::{AppError, Book, BookId, BookType, Duration};

/// Inserts a new book and returns the identity assigned by the database
pub async fn insert_book(pool: &DbPool, book: &Book) -> Result<BookId, AppError> {
    let mut tx = pool
        .begin()
        .await
        .map_err(|e| AppError::database("Failed to begin transaction", e))?;

    let result = sqlx::query(
        r#"
        INSERT INTO books (name, author, current_media_path, playback_speed, root,
                           time, type, use_cover_replacement, active)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&book.name)
    .bind(&book.author)
    .bind(book.current_file.to_string_lossy().as_ref())
    .bind(book.playback_speed as f64)
    .bind(book.root.to_string_lossy().as_ref())
    .bind(book.time.as_millis() as i64)
    .bind(book.book_type.as_str())
    .bind(book.use_cover_replacement as i64)
    .bind(book.active as i64)
    .execute(&mut *tx)
    .await
    .map_err(|e| AppError::database("Failed to insert book", e))?;

    let id = BookId::new(result.last_insert_rowid());
    chapters::replace_chapters(&mut tx, id, &book.chapters).await?;
    bookmarks::replace_bookmarks(&mut tx, id, &book.bookmarks).await?;

    tx.commit()
        .await
        .map_err(|e| AppError::database("Failed to commit book insert", e))?;
    Ok(id)
}

/// Gets a book by id, with chapters in canonical order
pub async fn get_book(pool: &DbPool, id: BookId) -> Result<Book, AppError> {
    let row = sqlx::query(
        r#"
        SELECT id, name, author, current_media_path, playback_speed, root,
               time, type, use_cover_replacement, active
        FROM books WHERE id = ?
        "#,
    )
    .bind(id.as_i64())
    .fetch_optional(pool)
    .await
    .map_err(|e| AppError::database("Failed to fetch book", e))?
    .ok_or_else(|| AppError::not_found("Book", id))?;

    let mut conn = pool
        .acquire()
        .await
        .map_err(|e| AppError::database("Failed to acquire connection", e))?;
    let book_chapters = chapters::chapters_for_book(&mut conn, id).await?;
    let book_bookmarks = bookmarks::bookmarks_for_book(&mut conn, id).await?;

    row_to_book(row, book_chapters, book_bookmarks)
}

/// Loads every book, chapters and bookmarks included, ordered by name
pub async fn list_books(pool: &DbPool) -> Result<Vec<Book>, AppError> {
    let ids: Vec<i64> = sqlx::query_scalar("SELECT id FROM books ORDER BY name")
        .fetch_all(pool)
        .await
        .map_err(|e| AppError::database("Failed to list books", e))?;

    let mut books = Vec::with_capacity(ids.len());
    for id in ids {
        books.push(get_book(pool, BookId::new(id)).await?);
    }
    Ok(books)
}

/// Updates an existing book with full replace semantics
pub async fn update_book(pool: &DbPool, book: &Book) -> Result<(), AppError> {
    let mut tx = pool
        .begin()
        .await
        .map_err(|e| AppError::database("Failed to begin transaction", e))?;

    let result = sqlx::query(
        r#"
        UPDATE books SET
            name = ?, author = ?, current_media_path = ?, playback_speed = ?,
            root = ?, time = ?, type = ?, use_cover_replacement = ?, active = ?
        WHERE id = ?
        "#,
    )
    .bind(&book.name)
    .bind(&book.author)
    .bind(book.current_file.to_string_lossy().as_ref())
    .bind(book.playback_speed as f64)
    .bind(book.root.to_string_lossy().as_ref())
    .bind(book.time.as_millis() as i64)
    .bind(book.book_type.as_str())
    .bind(book.use_cover_replacement as i64)
    .bind(book.active as i64)
    .bind(book.id.as_i64())
    .execute(&mut *tx)
    .await
    .map_err(|e| AppError::database("Failed to update book", e))?;

    if result.rows_affected() == 0 {
        return Err(AppError::not_found("Book", book.id));
    }

    chapters::replace_chapters(&mut tx, book.id, &book.chapters).await?;
    bookmarks::replace_bookmarks(&mut tx, book.id, &book.bookmarks).await?;

    tx.commit()
        .await
        .map_err(|e| AppError::database("Failed to commit book update", e))?;
    Ok(())
}

/// Permanently deletes a book and its dependent rows
pub async fn delete_book(pool: &DbPool, id: BookId) -> Result<(), AppError> {
    let mut tx = pool
        .begin()
        .await
        .map_err(|e| AppError::database("Failed to begin transaction", e))?;

    for sql in [
        "DELETE FROM bookmarks WHERE book_id = ?",
        "DELETE FROM chapters WHERE book_id = ?",
        "DELETE FROM books WHERE id = ?",
    ] {
        sqlx::query(sql)
            .bind(id.as_i64())
            .execute(&mut *tx)
            .await
            .map_err(|e| AppError::database("Failed to delete book", e))?;
    }

    tx.commit()
        .await
        .map_err(|e| AppError::database("Failed to commit book delete", e))?;
    Ok(())
}

fn row_to_book(
    row: SqliteRow,
    chapters: Vec<talebox_core::Chapter>,
    bookmarks: Vec<talebox_core::Bookmark>,
) -> Result<Book, AppError> {
    let type_str: String = row.get("type");
    let book_type = BookType::from_str(&type_str)
        .ok_or_else(|| AppError::database_msg(format!("Unknown book type: {type_str}")))?;

    Ok(Book {
        id: BookId::new(row.get("id")),
        name: row.get("name"),
        author: row.get("author"),
        current_file: PathBuf::from(row.get::<String, _>("current_media_path")),
        playback_speed: row.get::<f64, _>("playback_speed") as f32,
        root: PathBuf::from(row.get::<String, _>("root")),
        time: Duration::from_millis(row.get::<i64, _>("time").max(0) as u64),
        book_type,
        use_cover_replacement: row.get::<i64, _>("use_cover_replacement") != 0,
        active: row.get::<i64, _>("active") != 0,
        chapters,
        bookmarks,
    })
}
