//! User bookmarks

use crate::types::Duration;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// A user-named saved position within a specific chapter of a book.
///
/// Equality is structural (path, title and time), so duplicate detection is
/// value based rather than by identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bookmark {
    /// Path of the chapter this bookmark lives in
    pub path: PathBuf,
    pub title: String,
    /// Position within the chapter
    pub time: Duration,
}

impl Bookmark {
    pub fn new(path: impl Into<PathBuf>, title: impl Into<String>, time: Duration) -> Self {
        Self {
            path: path.into(),
            title: title.into(),
            time,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_structural_equality() {
        let a = Bookmark::new("/b/1.mp3", "start", Duration::from_millis(100));
        let b = Bookmark::new("/b/1.mp3", "start", Duration::from_millis(100));
        let c = Bookmark::new("/b/1.mp3", "start", Duration::from_millis(200));
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_duplicate_detection_is_value_based() {
        let marks = vec![
            Bookmark::new("/b/1.mp3", "x", Duration::ZERO),
            Bookmark::new("/b/2.mp3", "y", Duration::ZERO),
        ];
        let candidate = Bookmark::new("/b/1.mp3", "x", Duration::ZERO);
        assert!(marks.contains(&candidate));
    }
}
