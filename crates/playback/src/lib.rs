// crates/playback/src/lib.rs
//
// Glue between the book library and the media engine: a serialized
// controller, its configuration, and the sleep timer.

pub mod config;
pub mod controller;

pub use config::PlayerConfig;
pub use controller::{PlayerController, SkipDirection};
