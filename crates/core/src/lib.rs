//! Talebox core domain layer
//!
//! Domain models (books, chapters, bookmarks), shared error types and the
//! in-process event bus used by the playback and persistence layers.

pub mod error;
pub mod events;
pub mod types;

pub use error::{AppError, Result};
pub use events::{Event, EventBus};
pub use types::{
    Book, BookId, BookType, Bookmark, Chapter, Duration, PlayState, PlaybackSpeed, Timestamp,
    Validator,
};
