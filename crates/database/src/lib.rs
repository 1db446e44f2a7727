//! Talebox persistence layer
//!
//! SQLite via sqlx. Three tables (books, chapters, bookmarks) plus a
//! versioned migration chain mirroring the schema history. Writes always
//! replace a book's chapters and bookmarks wholesale inside one transaction.

pub mod connection;
pub mod migrations;
pub mod queries;

pub use connection::{connect, create_in_memory, DatabaseConfig, DbPool};
pub use migrations::{run_migrations, CURRENT_VERSION};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queries::books::{get_book, insert_book, list_books, update_book};
    use talebox_core::{Book, BookType, Bookmark, Chapter, Duration};

    fn sample_book() -> Book {
        let chapters = vec![
            Chapter::new("/audio/b/01.mp3", "01", Duration::from_millis(1000)),
            Chapter::new("/audio/b/02.mp3", "02", Duration::from_millis(2000)),
            Chapter::new("/audio/b/03.mp3", "03", Duration::from_millis(1500)),
        ];
        let mut book = Book::new("Workflow", "/audio/b", BookType::CollectionFolder, chapters);
        book.author = Some("Somebody".to_string());
        book
    }

    #[tokio::test]
    async fn test_full_database_workflow() {
        let pool = create_in_memory().await.unwrap();
        run_migrations(&pool).await.unwrap();

        let book = sample_book();
        let id = insert_book(&pool, &book).await.unwrap();
        assert!(id.is_assigned());

        let retrieved = get_book(&pool, id).await.unwrap();
        assert_eq!(retrieved.name, "Workflow");
        assert_eq!(retrieved.author, Some("Somebody".to_string()));
        assert_eq!(retrieved.chapters.len(), 3);
    }

    #[tokio::test]
    async fn test_update_replaces_chapters_and_bookmarks() {
        let pool = create_in_memory().await.unwrap();
        run_migrations(&pool).await.unwrap();

        let mut book = sample_book();
        book.id = insert_book(&pool, &book).await.unwrap();

        book.time = Duration::from_millis(900);
        book.playback_speed = 1.5;
        book.bookmarks
            .push(Bookmark::new("/audio/b/02.mp3", "good part", Duration::from_millis(42)));
        update_book(&pool, &book).await.unwrap();

        let retrieved = get_book(&pool, book.id).await.unwrap();
        assert_eq!(retrieved.time.as_millis(), 900);
        assert_eq!(retrieved.playback_speed, 1.5);
        assert_eq!(retrieved.bookmarks, book.bookmarks);
        assert_eq!(retrieved.chapters, book.chapters);
    }

    #[tokio::test]
    async fn test_list_books_orders_by_name() {
        let pool = create_in_memory().await.unwrap();
        run_migrations(&pool).await.unwrap();

        let mut b = sample_book();
        b.name = "Zeta".to_string();
        insert_book(&pool, &b).await.unwrap();
        b.name = "Alpha".to_string();
        insert_book(&pool, &b).await.unwrap();

        let books = list_books(&pool).await.unwrap();
        assert_eq!(books[0].name, "Alpha");
        assert_eq!(books[1].name, "Zeta");
    }
}
