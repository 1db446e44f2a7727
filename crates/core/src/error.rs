//! Error types shared across the Talebox crates

use thiserror::Error;

/// Main error type for the library and persistence layers
#[derive(Error, Debug)]
pub enum AppError {
    /// Database operation failed
    #[error("Database error: {message}")]
    DatabaseError {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A schema migration step could not reconstruct valid data
    #[error("Migration failed at version {version}: {reason}")]
    MigrationFailed { version: i64, reason: String },

    /// Record not found in database
    #[error("Record not found: {entity} with {identifier}")]
    RecordNotFound { entity: String, identifier: String },

    /// A book violated a persistence invariant (e.g. empty chapter list)
    #[error("Invalid book: {reason}")]
    InvalidBook { reason: String },

    /// Playback speed outside the supported range
    #[error("Invalid playback speed: {speed}")]
    InvalidSpeed { speed: f32 },

    /// I/O failure
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl AppError {
    /// Creates a database error with a source
    pub fn database(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::DatabaseError {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Creates a database error without a source
    pub fn database_msg(message: impl Into<String>) -> Self {
        Self::DatabaseError {
            message: message.into(),
            source: None,
        }
    }

    pub fn invalid_book(reason: impl Into<String>) -> Self {
        Self::InvalidBook {
            reason: reason.into(),
        }
    }

    pub fn not_found(entity: impl Into<String>, identifier: impl ToString) -> Self {
        Self::RecordNotFound {
            entity: entity.into(),
            identifier: identifier.to_string(),
        }
    }
}

/// Result alias used throughout the workspace
pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_database_error_display() {
        let err = AppError::database(
            "Failed to fetch book",
            std::io::Error::new(std::io::ErrorKind::Other, "disk on fire"),
        );
        assert!(err.to_string().contains("Failed to fetch book"));
    }

    #[test]
    fn test_migration_error_carries_version() {
        let err = AppError::MigrationFailed {
            version: 24,
            reason: "unparseable book payload".to_string(),
        };
        assert!(err.to_string().contains("24"));
    }

    #[test]
    fn test_not_found_helper() {
        let err = AppError::not_found("Book", 7);
        match err {
            AppError::RecordNotFound { entity, identifier } => {
                assert_eq!(entity, "Book");
                assert_eq!(identifier, "7");
            }
            _ => panic!("wrong variant"),
        }
    }
}
