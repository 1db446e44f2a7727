//! Domain types for Talebox
//!
//! - `book`: Book and Chapter models
//! - `bookmark`: user bookmarks
//! - `playback`: playback speed and play state
//! - `common`: shared time types, validation, natural ordering

mod book;
mod bookmark;
mod common;
mod playback;

pub use book::{Book, BookId, BookType, Chapter};
pub use bookmark::Bookmark;
pub use common::{natural_cmp, Duration, Timestamp, Validator};
pub use playback::{PlayState, PlaybackSpeed};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamp_ordering() {
        let t1 = Timestamp::now();
        std::thread::sleep(std::time::Duration::from_millis(10));
        let t2 = Timestamp::now();
        assert!(t2 > t1);
    }

    #[test]
    fn test_duration_formatting() {
        let d = Duration::from_seconds(3665);
        assert!(d.to_string().contains("1:01:05"));
    }
}
