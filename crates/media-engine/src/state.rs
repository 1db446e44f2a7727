// crates/media-engine/src/state.rs

use crate::error::{EngineError, EngineResult};
use std::fmt;
use std::sync::Mutex;

/// Lifecycle states of a player instance.
///
/// Transitions follow a strict graph; any operation invoked from a state
/// not allowed for it moves the player to `Error` instead of panicking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    /// Fresh instance or after reset, no data source attached
    Idle,
    /// Data source set but not yet decoded
    Initialized,
    /// Track info read, ready to start
    Prepared,
    /// Decode loop running and feeding the sink
    Started,
    /// Decode loop parked, position retained
    Paused,
    /// End of stream was reached
    PlaybackCompleted,
    Stopped,
    /// An operation was called illegally or decoding failed; only reset
    /// or release leave this state
    Error,
    /// Released; the instance accepts no further calls
    Dead,
}

impl fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PlaybackState::Idle => "idle",
            PlaybackState::Initialized => "initialized",
            PlaybackState::Prepared => "prepared",
            PlaybackState::Started => "started",
            PlaybackState::Paused => "paused",
            PlaybackState::PlaybackCompleted => "playbackCompleted",
            PlaybackState::Stopped => "stopped",
            PlaybackState::Error => "error",
            PlaybackState::Dead => "dead",
        };
        f.write_str(name)
    }
}

/// Shared, lock-protected state with the illegal-call policy baked in.
pub struct StateCell {
    inner: Mutex<PlaybackState>,
}

impl StateCell {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(PlaybackState::Idle),
        }
    }

    pub fn get(&self) -> PlaybackState {
        *self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set(&self, next: PlaybackState) {
        let mut state = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        log::debug!("state {} -> {next}", *state);
        *state = next;
    }

    /// Checks that `operation` is legal in the current state. On violation
    /// the player is forced into `Error` (unless already `Dead`) and a
    /// structured error comes back, never a panic.
    pub fn guard(&self, operation: &str, allowed: &[PlaybackState]) -> EngineResult<PlaybackState> {
        let mut state = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let current = *state;
        if allowed.contains(&current) {
            return Ok(current);
        }
        log::error!("illegal call to {operation} in state {current}");
        if current != PlaybackState::Dead {
            *state = PlaybackState::Error;
        }
        Err(EngineError::IllegalState {
            operation: operation.to_string(),
            state: current.to_string(),
        })
    }

    /// Like `guard` but transitions to `next` when the call is legal.
    pub fn transition(
        &self,
        operation: &str,
        allowed: &[PlaybackState],
        next: PlaybackState,
    ) -> EngineResult<PlaybackState> {
        let mut state = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let current = *state;
        if allowed.contains(&current) {
            log::debug!("state {current} -> {next} ({operation})");
            *state = next;
            return Ok(current);
        }
        log::error!("illegal call to {operation} in state {current}");
        if current != PlaybackState::Dead {
            *state = PlaybackState::Error;
        }
        Err(EngineError::IllegalState {
            operation: operation.to_string(),
            state: current.to_string(),
        })
    }
}

impl Default for StateCell {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_passes_in_allowed_state() {
        let cell = StateCell::new();
        assert_eq!(
            cell.guard("setDataSource", &[PlaybackState::Idle]).unwrap(),
            PlaybackState::Idle
        );
        assert_eq!(cell.get(), PlaybackState::Idle);
    }

    #[test]
    fn guard_forces_error_on_violation() {
        let cell = StateCell::new();
        let err = cell.guard("start", &[PlaybackState::Prepared]).unwrap_err();
        assert!(matches!(err, EngineError::IllegalState { .. }));
        assert_eq!(cell.get(), PlaybackState::Error);
    }

    #[test]
    fn dead_stays_dead_on_violation() {
        let cell = StateCell::new();
        cell.set(PlaybackState::Dead);
        let err = cell.guard("start", &[PlaybackState::Prepared]).unwrap_err();
        assert!(matches!(err, EngineError::IllegalState { .. }));
        assert_eq!(cell.get(), PlaybackState::Dead);
    }

    #[test]
    fn transition_moves_state() {
        let cell = StateCell::new();
        cell.transition("setDataSource", &[PlaybackState::Idle], PlaybackState::Initialized)
            .unwrap();
        assert_eq!(cell.get(), PlaybackState::Initialized);
    }
}
