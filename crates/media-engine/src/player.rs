// crates/media-engine/src/player.rs
//
// Decoder-driven player with variable playback speed. Decoding runs on a
// dedicated thread that pulls PCM from a `PcmSource`, pushes it through the
// time stretcher and writes the result to an `AudioSink`. Pause parks the
// thread on a condvar; reset and release cancel it and wait for it to exit
// before tearing shared state down.

use crate::error::{EngineError, EngineResult};
use crate::output::{AudioSink, SinkFactory};
use crate::resampler::TimeStretcher;
use crate::source::{PcmSource, PcmSpec, SourceFactory};
use crate::state::{PlaybackState, StateCell};
use crate::wake::{WakeGuard, WakeLock};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;
use tokio::sync::mpsc;

/// Notifications the decode thread pushes out to whoever drives the player
#[derive(Debug, Clone)]
pub enum PlayerEvent {
    /// End of the current file was reached and all audio was handed to
    /// the sink
    Completed,
    /// Decoding or output failed; the player is in the error state
    Error(String),
}

/// What the surrounding platform supports. Speed control needs a working
/// time stretcher; when absent the player plays at 1.0 and ignores
/// speed changes instead of failing.
#[derive(Debug, Clone, Copy)]
pub struct PlayerCapabilities {
    pub can_set_speed: bool,
}

impl Default for PlayerCapabilities {
    fn default() -> Self {
        Self { can_set_speed: true }
    }
}

/// Everything the decode loop, seek threads and the public API share.
struct Shared {
    /// Source, sink and stretcher live behind one mutex so seeks and
    /// format changes never interleave with a decode iteration
    io: Mutex<Option<IoState>>,
    /// Pause gate; `true` parks the decode loop
    paused: Mutex<bool>,
    gate: Condvar,
    /// Tells the decode loop to exit at the next iteration
    cancel: AtomicBool,
    /// Playback speed as f32 bits, read by the loop every iteration
    speed_bits: AtomicU32,
    position_ms: AtomicU64,
    duration_ms: AtomicU64,
    sink_factory: SinkFactory,
}

struct IoState {
    source: Box<dyn PcmSource>,
    sink: Box<dyn AudioSink>,
    stretcher: TimeStretcher,
    spec: PcmSpec,
}

/// Media player with a Sonic-style time stretcher in the output path.
pub struct SpeedPlayer {
    state: Arc<StateCell>,
    shared: Arc<Shared>,
    wake: Arc<WakeGuard>,
    events: mpsc::UnboundedSender<PlayerEvent>,
    source_factory: SourceFactory,
    capabilities: PlayerCapabilities,
    path: Option<PathBuf>,
    decode_thread: Mutex<Option<thread::JoinHandle<()>>>,
}

impl SpeedPlayer {
    pub fn new(
        source_factory: SourceFactory,
        sink_factory: SinkFactory,
        wake_lock: Arc<dyn WakeLock>,
        capabilities: PlayerCapabilities,
    ) -> (Self, mpsc::UnboundedReceiver<PlayerEvent>) {
        let (events, events_rx) = mpsc::unbounded_channel();
        let player = Self {
            state: Arc::new(StateCell::new()),
            shared: Arc::new(Shared {
                io: Mutex::new(None),
                paused: Mutex::new(false),
                gate: Condvar::new(),
                cancel: AtomicBool::new(false),
                speed_bits: AtomicU32::new(1.0f32.to_bits()),
                position_ms: AtomicU64::new(0),
                duration_ms: AtomicU64::new(0),
                sink_factory,
            }),
            wake: Arc::new(WakeGuard::new(wake_lock)),
            events,
            source_factory,
            capabilities,
            path: None,
            decode_thread: Mutex::new(None),
        };
        (player, events_rx)
    }

    pub fn state(&self) -> PlaybackState {
        self.state.get()
    }

    pub fn capabilities(&self) -> PlayerCapabilities {
        self.capabilities
    }

    /// Attaches a file. Only legal on a fresh or reset player.
    pub fn set_data_source(&mut self, path: &Path) -> EngineResult<()> {
        self.state.transition(
            "setDataSource",
            &[PlaybackState::Idle],
            PlaybackState::Initialized,
        )?;
        self.path = Some(path.to_path_buf());
        Ok(())
    }

    /// Opens the source, reads track info and builds the output chain.
    pub fn prepare(&mut self) -> EngineResult<()> {
        self.state.guard(
            "prepare",
            &[PlaybackState::Initialized, PlaybackState::Stopped],
        )?;
        let path = self
            .path
            .clone()
            .ok_or_else(|| EngineError::DecodeError("No data source set".to_string()))?;

        let source = match (self.source_factory)(&path) {
            Ok(source) => source,
            Err(e) => {
                self.state.set(PlaybackState::Error);
                return Err(e);
            }
        };
        let spec = source.spec();
        let sink = match (self.shared.sink_factory)(spec) {
            Ok(sink) => sink,
            Err(e) => {
                self.state.set(PlaybackState::Error);
                return Err(e);
            }
        };
        let stretcher = TimeStretcher::new(spec.sample_rate, spec.channels as usize);

        self.shared
            .duration_ms
            .store(source.duration_ms(), Ordering::Relaxed);
        self.shared.position_ms.store(0, Ordering::Relaxed);
        *self.shared.io.lock().unwrap_or_else(|e| e.into_inner()) = Some(IoState {
            source,
            sink,
            stretcher,
            spec,
        });
        self.state.set(PlaybackState::Prepared);
        Ok(())
    }

    /// Starts or resumes playback.
    pub fn start(&mut self) -> EngineResult<()> {
        let previous = self.state.guard(
            "start",
            &[
                PlaybackState::Prepared,
                PlaybackState::Started,
                PlaybackState::Paused,
                PlaybackState::PlaybackCompleted,
            ],
        )?;
        if previous == PlaybackState::Started {
            return Ok(());
        }

        self.wake.acquire();
        if let Some(io_state) = self
            .shared
            .io
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_mut()
        {
            if previous == PlaybackState::PlaybackCompleted {
                // restart from the top before the loop can see EOS again
                io_state.sink.flush();
                io_state.stretcher =
                    TimeStretcher::new(io_state.spec.sample_rate, io_state.spec.channels as usize);
                if let Err(e) = io_state.source.seek(0) {
                    log::error!("rewind after completion failed: {e}");
                }
                self.shared.position_ms.store(0, Ordering::Relaxed);
            }
            io_state.sink.play();
        }

        // unpark a waiting loop
        {
            let mut paused = self.shared.paused.lock().unwrap_or_else(|e| e.into_inner());
            *paused = false;
            self.shared.gate.notify_all();
        }

        let mut handle = self
            .decode_thread
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        let needs_thread = match handle.as_ref() {
            Some(h) => h.is_finished(),
            None => true,
        };
        if needs_thread {
            if let Some(finished) = handle.take() {
                let _ = finished.join();
            }
            self.shared.cancel.store(false, Ordering::SeqCst);
            let shared = Arc::clone(&self.shared);
            let state = Arc::clone(&self.state);
            let wake = Arc::clone(&self.wake);
            let events = self.events.clone();
            *handle = Some(
                thread::Builder::new()
                    .name("decode-loop".to_string())
                    .spawn(move || decode_loop(shared, state, wake, events))
                    .map_err(|e| EngineError::OutputError(format!("Failed to spawn: {e}")))?,
            );
        }
        self.state.set(PlaybackState::Started);
        Ok(())
    }

    /// Parks the decode loop. Position is retained.
    pub fn pause(&mut self) -> EngineResult<()> {
        self.state
            .guard("pause", &[PlaybackState::Started, PlaybackState::Paused])?;
        {
            let mut paused = self.shared.paused.lock().unwrap_or_else(|e| e.into_inner());
            *paused = true;
        }
        if let Some(io_state) = self
            .shared
            .io
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_mut()
        {
            io_state.sink.pause();
        }
        self.wake.release();
        self.state.set(PlaybackState::Paused);
        Ok(())
    }

    /// Jumps to an absolute position within the current file. The actual
    /// work runs on a short-lived thread so a blocked sink write never
    /// stalls the caller; it serializes with the decode loop through the
    /// io mutex.
    pub fn seek_to(&mut self, position_ms: u64) -> EngineResult<()> {
        self.state.guard(
            "seekTo",
            &[
                PlaybackState::Prepared,
                PlaybackState::Started,
                PlaybackState::Paused,
                PlaybackState::PlaybackCompleted,
            ],
        )?;
        let shared = Arc::clone(&self.shared);
        thread::Builder::new()
            .name("seek".to_string())
            .spawn(move || {
                let mut io = shared.io.lock().unwrap_or_else(|e| e.into_inner());
                if let Some(io_state) = io.as_mut() {
                    io_state.sink.flush();
                    io_state.stretcher = TimeStretcher::new(
                        io_state.spec.sample_rate,
                        io_state.spec.channels as usize,
                    );
                    match io_state.source.seek(position_ms) {
                        Ok(()) => shared
                            .position_ms
                            .store(io_state.source.position_ms(), Ordering::Relaxed),
                        Err(e) => log::error!("seek to {position_ms}ms failed: {e}"),
                    }
                }
            })
            .map_err(|e| EngineError::SeekError(format!("Failed to spawn: {e}")))?;
        Ok(())
    }

    pub fn current_position(&self) -> EngineResult<u64> {
        self.state.guard(
            "currentPosition",
            &[
                PlaybackState::Prepared,
                PlaybackState::Started,
                PlaybackState::Paused,
                PlaybackState::PlaybackCompleted,
                PlaybackState::Stopped,
            ],
        )?;
        Ok(self.shared.position_ms.load(Ordering::Relaxed))
    }

    pub fn duration(&self) -> EngineResult<u64> {
        self.state.guard(
            "duration",
            &[
                PlaybackState::Prepared,
                PlaybackState::Started,
                PlaybackState::Paused,
                PlaybackState::PlaybackCompleted,
                PlaybackState::Stopped,
            ],
        )?;
        Ok(self.shared.duration_ms.load(Ordering::Relaxed))
    }

    /// Changes the playback rate. Takes effect on the next decode
    /// iteration; ignored when the platform reported no speed support.
    pub fn set_playback_speed(&mut self, speed: f32) {
        if !self.capabilities.can_set_speed {
            log::warn!("playback speed not supported, keeping 1.0");
            return;
        }
        self.shared
            .speed_bits
            .store(speed.to_bits(), Ordering::Relaxed);
    }

    pub fn playback_speed(&self) -> f32 {
        f32::from_bits(self.shared.speed_bits.load(Ordering::Relaxed))
    }

    /// Back to Idle. Blocks until the decode thread has actually exited,
    /// then tears down source and sink.
    pub fn reset(&mut self) -> EngineResult<()> {
        if self.state.get() == PlaybackState::Dead {
            return self.state.guard("reset", &[]).map(|_| ());
        }
        self.stop_decode_thread();
        *self.shared.io.lock().unwrap_or_else(|e| e.into_inner()) = None;
        self.path = None;
        self.shared.position_ms.store(0, Ordering::Relaxed);
        self.shared.duration_ms.store(0, Ordering::Relaxed);
        self.wake.release();
        self.state.set(PlaybackState::Idle);
        Ok(())
    }

    /// Final teardown. Safe to call more than once; every call after the
    /// first is a no-op.
    pub fn release(&mut self) {
        if self.state.get() == PlaybackState::Dead {
            return;
        }
        self.stop_decode_thread();
        let taken = self.shared.io.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(mut io_state) = taken {
            io_state.sink.release();
        }
        self.path = None;
        self.wake.release();
        self.state.set(PlaybackState::Dead);
    }

    /// Cancel-notify-join rendezvous with the decode loop
    fn stop_decode_thread(&self) {
        self.shared.cancel.store(true, Ordering::SeqCst);
        {
            let mut paused = self.shared.paused.lock().unwrap_or_else(|e| e.into_inner());
            *paused = false;
            self.shared.gate.notify_all();
        }
        let handle = self
            .decode_thread
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(handle) = handle {
            if let Err(e) = handle.join() {
                log::error!("decode thread panicked: {e:?}");
            }
        }
        self.shared.cancel.store(false, Ordering::SeqCst);
        let mut paused = self.shared.paused.lock().unwrap_or_else(|e| e.into_inner());
        *paused = false;
    }
}

impl Drop for SpeedPlayer {
    fn drop(&mut self) {
        self.release();
    }
}

fn decode_loop(
    shared: Arc<Shared>,
    state: Arc<StateCell>,
    wake: Arc<WakeGuard>,
    events: mpsc::UnboundedSender<PlayerEvent>,
) {
    log::debug!("decode loop started");
    loop {
        if shared.cancel.load(Ordering::SeqCst) {
            break;
        }

        // pause gate
        {
            let mut paused = shared.paused.lock().unwrap_or_else(|e| e.into_inner());
            while *paused && !shared.cancel.load(Ordering::SeqCst) {
                paused = shared.gate.wait(paused).unwrap_or_else(|e| e.into_inner());
            }
        }
        if shared.cancel.load(Ordering::SeqCst) {
            break;
        }

        let mut io = shared.io.lock().unwrap_or_else(|e| e.into_inner());
        let Some(io_state) = io.as_mut() else {
            break;
        };

        let speed = f32::from_bits(shared.speed_bits.load(Ordering::Relaxed));
        io_state.stretcher.set_speed(speed);

        match io_state.source.next_chunk() {
            Ok(Some(chunk)) => {
                if chunk.spec != io_state.spec {
                    // mid-stream format change: rebuild sink and stretcher
                    log::info!(
                        "format changed to {}Hz/{}ch",
                        chunk.spec.sample_rate,
                        chunk.spec.channels
                    );
                    match (shared.sink_factory)(chunk.spec) {
                        Ok(mut sink) => {
                            io_state.sink.release();
                            sink.play();
                            io_state.sink = sink;
                            io_state.stretcher = TimeStretcher::new(
                                chunk.spec.sample_rate,
                                chunk.spec.channels as usize,
                            );
                            io_state.stretcher.set_speed(speed);
                            io_state.spec = chunk.spec;
                        }
                        Err(e) => {
                            fail(&state, &wake, &events, &e);
                            break;
                        }
                    }
                }
                io_state.stretcher.put_bytes(&chunk.bytes);
                if let Err(e) = drain_stretcher(io_state) {
                    fail(&state, &wake, &events, &e);
                    break;
                }
                shared
                    .position_ms
                    .store(io_state.source.position_ms(), Ordering::Relaxed);
            }
            Ok(None) => {
                // end of stream: drain what the stretcher still holds
                io_state.stretcher.flush();
                if let Err(e) = drain_stretcher(io_state) {
                    fail(&state, &wake, &events, &e);
                    break;
                }
                shared
                    .position_ms
                    .store(shared.duration_ms.load(Ordering::Relaxed), Ordering::Relaxed);
                drop(io);
                state.set(PlaybackState::PlaybackCompleted);
                wake.release();
                let _ = events.send(PlayerEvent::Completed);
                break;
            }
            Err(e) => {
                fail(&state, &wake, &events, &e);
                break;
            }
        }
    }
    log::debug!("decode loop exited");
}

/// Moves processed PCM from the stretcher to the sink, in chunks no
/// larger than 4x the sink's minimum buffer size
fn drain_stretcher(io_state: &mut IoState) -> EngineResult<()> {
    let max_chunk = io_state.sink.min_buffer_bytes().saturating_mul(4).max(2);
    loop {
        let available = io_state.stretcher.available_bytes();
        if available == 0 {
            return Ok(());
        }
        let mut out = vec![0u8; available.min(max_chunk)];
        let written = io_state.stretcher.receive_bytes(&mut out);
        if written == 0 {
            return Ok(());
        }
        out.truncate(written);
        io_state.sink.write(&out)?;
    }
}

fn fail(
    state: &StateCell,
    wake: &WakeGuard,
    events: &mpsc::UnboundedSender<PlayerEvent>,
    error: &EngineError,
) {
    log::error!("playback failed: {error}");
    state.set(PlaybackState::Error);
    wake.release();
    let _ = events.send(PlayerEvent::Error(error.to_string()));
}
