//! Playback-related domain models

use serde::{Deserialize, Serialize};

/// Externally visible play state, published on the event bus.
///
/// This is distinct from the engine's internal state machine: it only
/// carries what listeners (UI, widgets) need to render.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlayState {
    Playing,
    Paused,
    Stopped,
}

/// Validated playback speed (0.5x - 3.0x), pitch preserved
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlaybackSpeed(f32);

impl PlaybackSpeed {
    pub const MIN: f32 = 0.5;
    pub const MAX: f32 = 3.0;

    pub fn new(speed: f32) -> Result<Self, crate::AppError> {
        if (Self::MIN..=Self::MAX).contains(&speed) {
            Ok(Self(speed))
        } else {
            Err(crate::AppError::InvalidSpeed { speed })
        }
    }

    /// Clamps into the supported range instead of failing
    pub fn clamped(speed: f32) -> Self {
        Self(speed.clamp(Self::MIN, Self::MAX))
    }

    pub fn value(&self) -> f32 {
        self.0
    }
}

impl Default for PlaybackSpeed {
    fn default() -> Self {
        Self(1.0)
    }
}
