//! Book and chapter domain models

use crate::types::{natural_cmp, Bookmark, Duration, Validator};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::path::{Path, PathBuf};

/// Numeric identity for a book, assigned by the database on insert
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BookId(i64);

impl BookId {
    /// Sentinel for a book that has not been persisted yet
    pub const UNASSIGNED: Self = Self(-1);

    pub fn new(id: i64) -> Self {
        Self(id)
    }

    pub fn as_i64(&self) -> i64 {
        self.0
    }

    pub fn is_assigned(&self) -> bool {
        self.0 >= 0
    }
}

impl std::fmt::Display for BookId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How the book was assembled from the file system
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BookType {
    CollectionFile,
    CollectionFolder,
    SingleFile,
    SingleFolder,
}

impl BookType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CollectionFile => "COLLECTION_FILE",
            Self::CollectionFolder => "COLLECTION_FOLDER",
            Self::SingleFile => "SINGLE_FILE",
            Self::SingleFolder => "SINGLE_FOLDER",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "COLLECTION_FILE" => Some(Self::CollectionFile),
            "COLLECTION_FOLDER" => Some(Self::CollectionFolder),
            "SINGLE_FILE" => Some(Self::SingleFile),
            "SINGLE_FOLDER" => Some(Self::SingleFolder),
            _ => None,
        }
    }
}

/// One audio file within a book, with a fixed play order and known duration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chapter {
    pub path: PathBuf,
    pub name: String,
    pub duration: Duration,
}

impl Chapter {
    pub fn new(path: impl Into<PathBuf>, name: impl Into<String>, duration: Duration) -> Self {
        Self {
            path: path.into(),
            name: name.into(),
            duration,
        }
    }
}

impl PartialOrd for Chapter {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Chapter {
    /// Chapters order by natural comparison of their paths
    fn cmp(&self, other: &Self) -> Ordering {
        natural_cmp(
            &self.path.to_string_lossy(),
            &other.path.to_string_lossy(),
        )
        .then_with(|| natural_cmp(&self.name, &other.name))
    }
}

impl Validator for Chapter {
    fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.name.trim().is_empty() {
            errors.push("Chapter name cannot be empty".to_string());
        }
        if self.path.as_os_str().is_empty() {
            errors.push("Chapter path cannot be empty".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// A playable unit composed of one or more ordered chapters sharing a root path
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Book {
    pub id: BookId,
    pub name: String,
    pub author: Option<String>,
    pub root: PathBuf,
    pub book_type: BookType,
    /// Path of the chapter currently being played
    pub current_file: PathBuf,
    /// Position within the current chapter
    pub time: Duration,
    pub playback_speed: f32,
    pub use_cover_replacement: bool,
    /// False when the backing files are unreachable (orphaned)
    pub active: bool,
    pub chapters: Vec<Chapter>,
    pub bookmarks: Vec<Bookmark>,
}

impl Book {
    /// Creates a new unpersisted book positioned at the first chapter.
    ///
    /// The chapter list is sorted here so callers get the canonical order
    /// regardless of how it was assembled.
    pub fn new(
        name: impl Into<String>,
        root: impl Into<PathBuf>,
        book_type: BookType,
        mut chapters: Vec<Chapter>,
    ) -> Self {
        chapters.sort();
        let current_file = chapters
            .first()
            .map(|c| c.path.clone())
            .unwrap_or_default();
        Self {
            id: BookId::UNASSIGNED,
            name: name.into(),
            author: None,
            root: root.into(),
            book_type,
            current_file,
            time: Duration::ZERO,
            playback_speed: 1.0,
            use_cover_replacement: false,
            active: true,
            chapters,
            bookmarks: Vec::new(),
        }
    }

    /// Returns the chapter matching the current file, if any
    pub fn current_chapter(&self) -> Option<&Chapter> {
        self.chapters.iter().find(|c| c.path == self.current_file)
    }

    /// Index of the current chapter in play order
    pub fn current_chapter_index(&self) -> Option<usize> {
        self.chapters.iter().position(|c| c.path == self.current_file)
    }

    /// The chapter following the current one, or None if the current chapter
    /// is the last
    pub fn next_chapter(&self) -> Option<&Chapter> {
        let index = self.current_chapter_index()?;
        self.chapters.get(index + 1)
    }

    /// The chapter preceding the current one, or None if the current chapter
    /// is the first
    pub fn previous_chapter(&self) -> Option<&Chapter> {
        let index = self.current_chapter_index()?;
        index.checked_sub(1).and_then(|i| self.chapters.get(i))
    }

    /// Returns the chapter at the given path
    pub fn chapter_at(&self, path: &Path) -> Option<&Chapter> {
        self.chapters.iter().find(|c| c.path == path)
    }

    /// Resets the position to the start of the first chapter.
    ///
    /// Used by the persistence layer to repair a current file that no longer
    /// matches any chapter.
    pub fn reset_position(&mut self) {
        if let Some(first) = self.chapters.first() {
            self.current_file = first.path.clone();
        }
        self.time = Duration::ZERO;
    }

    /// True when the current file references one of the book's chapters
    pub fn position_is_consistent(&self) -> bool {
        self.current_chapter().is_some()
    }
}

impl Validator for Book {
    fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.name.trim().is_empty() {
            errors.push("Book name cannot be empty".to_string());
        }
        if self.chapters.is_empty() {
            errors.push("Chapter list cannot be empty".to_string());
        }
        if self.playback_speed <= 0.0 {
            errors.push("Playback speed must be positive".to_string());
        }
        if !self.chapters.is_empty() && !self.position_is_consistent() {
            errors.push("Current file does not match any chapter".to_string());
        }
        for bookmark in &self.bookmarks {
            if self.chapter_at(&bookmark.path).is_none() {
                errors.push(format!(
                    "Bookmark references unknown chapter: {}",
                    bookmark.path.display()
                ));
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chapters() -> Vec<Chapter> {
        vec![
            Chapter::new("/books/a/10.mp3", "10", Duration::from_millis(1500)),
            Chapter::new("/books/a/2.mp3", "2", Duration::from_millis(2000)),
            Chapter::new("/books/a/1.mp3", "1", Duration::from_millis(1000)),
        ]
    }

    fn book() -> Book {
        Book::new("A Book", "/books/a", BookType::CollectionFolder, chapters())
    }

    #[test]
    fn test_chapters_sorted_naturally() {
        let book = book();
        let names: Vec<&str> = book.chapters.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["1", "2", "10"]);
        assert_eq!(book.current_file, PathBuf::from("/books/a/1.mp3"));
    }

    #[test]
    fn test_next_and_previous_chapter() {
        let mut book = book();
        assert_eq!(book.current_chapter_index(), Some(0));
        assert!(book.previous_chapter().is_none());
        assert_eq!(book.next_chapter().unwrap().name, "2");

        book.current_file = PathBuf::from("/books/a/10.mp3");
        assert!(book.next_chapter().is_none());
        assert_eq!(book.previous_chapter().unwrap().name, "2");
    }

    #[test]
    fn test_reset_position_repairs_current_file() {
        let mut book = book();
        book.current_file = PathBuf::from("/books/a/gone.mp3");
        book.time = Duration::from_millis(1234);
        assert!(!book.position_is_consistent());

        book.reset_position();
        assert!(book.position_is_consistent());
        assert_eq!(book.current_chapter_index(), Some(0));
        assert!(book.time.is_zero());
    }

    #[test]
    fn test_validation_rejects_empty_chapters() {
        let book = Book::new("Empty", "/books/e", BookType::SingleFile, Vec::new());
        assert!(!book.is_valid());
    }

    #[test]
    fn test_validation_rejects_bad_speed() {
        let mut book = book();
        book.playback_speed = 0.0;
        assert!(!book.is_valid());
    }

    #[test]
    fn test_validation_rejects_foreign_bookmark() {
        let mut book = book();
        book.bookmarks.push(Bookmark::new(
            "/books/b/other.mp3",
            "elsewhere",
            Duration::ZERO,
        ));
        assert!(!book.is_valid());
    }

    #[test]
    fn test_book_type_round_trip() {
        for t in [
            BookType::CollectionFile,
            BookType::CollectionFolder,
            BookType::SingleFile,
            BookType::SingleFolder,
        ] {
            assert_eq!(BookType::from_str(t.as_str()), Some(t));
        }
        assert_eq!(BookType::from_str("NONSENSE"), None);
    }
}
