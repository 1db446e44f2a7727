// crates/media-engine/src/lib.rs
//
// Audio engine: decoding, time stretching and device output behind a
// state-machine player. Higher layers drive `SpeedPlayer` and listen on
// its event channel; nothing above this crate touches symphonia or cpal.

pub mod error;
pub mod output;
pub mod player;
pub mod resampler;
pub mod source;
pub mod state;
pub mod testing;
pub mod wake;

pub use error::{EngineError, EngineResult};
pub use output::{default_sink_factory, AudioSink, CpalSink, SinkFactory};
pub use player::{PlayerCapabilities, PlayerEvent, SpeedPlayer};
pub use resampler::TimeStretcher;
pub use source::{
    default_source_factory, PcmChunk, PcmSource, PcmSpec, SourceFactory, SymphoniaSource,
};
pub use state::{PlaybackState, StateCell};
pub use wake::{NoopWakeLock, WakeGuard, WakeLock};
