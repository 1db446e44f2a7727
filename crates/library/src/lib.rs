//! Talebox book library
//!
//! Owns the canonical book records: a full in-memory cache backed by the
//! database, kept coherent under one lock with write-through transactions.

mod repo;

pub use repo::BookRepository;
