//! The book repository
//!
//! Loads the whole schema into memory once at construction; reads are served
//! from the cache, writes go to both the cache and the database inside one
//! transaction. One lock keeps the two from diverging under concurrent
//! access. The repository is the only writer of book records; the player
//! controller borrows "the current book" and writes back through here.

use log::{info, warn};
use talebox_core::{AppError, Book, BookId, EventBus, Validator};
use talebox_database::queries::books;
use talebox_database::DbPool;
use tokio::sync::Mutex;

pub struct BookRepository {
    pool: DbPool,
    cache: Mutex<Vec<Book>>,
    bus: EventBus,
}

impl BookRepository {
    /// Loads every book into the cache. Books whose persisted current file
    /// no longer matches any chapter are repaired to the first chapter at
    /// time 0 and written back.
    pub async fn new(pool: DbPool, bus: EventBus) -> Result<Self, AppError> {
        let mut loaded = books::list_books(&pool).await?;

        for book in &mut loaded {
            if !book.chapters.is_empty() && !book.position_is_consistent() {
                warn!(
                    "book {} has a dangling current file {:?}, resetting to first chapter",
                    book.id, book.current_file
                );
                book.reset_position();
                books::update_book(&pool, book).await?;
            }
        }
        info!("loaded {} books", loaded.len());

        Ok(Self {
            pool,
            cache: Mutex::new(loaded),
            bus,
        })
    }

    /// Adds a new book, assigning its identity. Fails fast on an empty
    /// chapter list, before anything is written.
    pub async fn add_book(&self, mut book: Book) -> Result<Book, AppError> {
        Self::check_preconditions(&book)?;

        let mut cache = self.cache.lock().await;
        book.id = books::insert_book(&self.pool, &book).await?;
        cache.push(book.clone());
        self.bus.book_set_changed();
        Ok(book)
    }

    /// Returns the book with the given id from the cache
    pub async fn book(&self, id: BookId) -> Option<Book> {
        let cache = self.cache.lock().await;
        cache.iter().find(|b| b.id == id).cloned()
    }

    /// Books whose backing files are reachable
    pub async fn active_books(&self) -> Vec<Book> {
        let cache = self.cache.lock().await;
        cache.iter().filter(|b| b.active).cloned().collect()
    }

    /// Books whose backing files have disappeared but whose metadata is kept
    pub async fn orphaned_books(&self) -> Vec<Book> {
        let cache = self.cache.lock().await;
        cache.iter().filter(|b| !b.active).cloned().collect()
    }

    /// Full-replace update of one book (row plus all chapters and bookmarks)
    pub async fn update_book(&self, book: &Book) -> Result<(), AppError> {
        Self::check_preconditions(book)?;

        let mut cache = self.cache.lock().await;
        let slot = cache
            .iter_mut()
            .find(|b| b.id == book.id)
            .ok_or_else(|| AppError::not_found("Book", book.id))?;

        books::update_book(&self.pool, book).await?;
        *slot = book.clone();
        self.bus.book_content_changed(book.id);
        Ok(())
    }

    /// Moves a book to the orphaned set. This is an update, not a delete:
    /// position and bookmarks survive an unmounted drive.
    pub async fn hide_book(&self, id: BookId) -> Result<(), AppError> {
        self.set_active(id, false).await
    }

    /// Moves an orphaned book back to the active set
    pub async fn reveal_book(&self, id: BookId) -> Result<(), AppError> {
        self.set_active(id, true).await
    }

    async fn set_active(&self, id: BookId, active: bool) -> Result<(), AppError> {
        let mut cache = self.cache.lock().await;
        let slot = cache
            .iter_mut()
            .find(|b| b.id == id)
            .ok_or_else(|| AppError::not_found("Book", id))?;

        let mut updated = slot.clone();
        updated.active = active;
        books::update_book(&self.pool, &updated).await?;
        *slot = updated;
        self.bus.book_set_changed();
        Ok(())
    }

    /// Permanently deletes a book. Only explicit user action and the
    /// missing-file error cascade reach this.
    pub async fn remove_book(&self, id: BookId) -> Result<(), AppError> {
        let mut cache = self.cache.lock().await;
        let index = cache
            .iter()
            .position(|b| b.id == id)
            .ok_or_else(|| AppError::not_found("Book", id))?;

        books::delete_book(&self.pool, id).await?;
        cache.remove(index);
        info!("removed book {id}");
        self.bus.book_set_changed();
        Ok(())
    }

    fn check_preconditions(book: &Book) -> Result<(), AppError> {
        if book.chapters.is_empty() {
            return Err(AppError::invalid_book("chapter list is empty"));
        }
        if let Err(errors) = book.validate() {
            return Err(AppError::invalid_book(errors.join("; ")));
        }
        Ok(())
    }
}
