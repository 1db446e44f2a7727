//! Database query operations organized by entity

pub mod bookmarks;
pub mod books;
pub mod chapters;

pub use books::{delete_book, get_book, insert_book, list_books, update_book};
