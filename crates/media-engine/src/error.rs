// crates/media-engine/src/error.rs

use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Decode error: {0}")]
    DecodeError(String),

    #[error("Output error: {0}")]
    OutputError(String),

    #[error("Seek error: {0}")]
    SeekError(String),

    #[error("{operation} called in illegal state {state}")]
    IllegalState { operation: String, state: String },

    #[error("Source file missing: {0}")]
    FileMissing(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

pub type EngineResult<T> = Result<T, EngineError>;
