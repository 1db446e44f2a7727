// crates/media-engine/src/testing.rs
//
// In-memory stand-ins for the hardware-facing seams, used by this crate's
// tests and by crates driving the player from their own test suites.

use crate::error::{EngineError, EngineResult};
use crate::output::{AudioSink, SinkFactory};
use crate::source::{PcmChunk, PcmSource, PcmSpec, SourceFactory};
use crate::wake::WakeLock;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// PCM source producing silence for a scripted duration. 8 kHz mono keeps
/// the buffers small.
pub struct SilenceSource {
    duration_ms: u64,
    position_ms: u64,
    chunk_ms: u64,
}

impl SilenceSource {
    pub const SPEC: PcmSpec = PcmSpec {
        sample_rate: 8_000,
        channels: 1,
    };

    pub fn new(duration_ms: u64) -> Self {
        Self {
            duration_ms,
            position_ms: 0,
            chunk_ms: 100,
        }
    }
}

impl PcmSource for SilenceSource {
    fn spec(&self) -> PcmSpec {
        Self::SPEC
    }

    fn duration_ms(&self) -> u64 {
        self.duration_ms
    }

    fn position_ms(&self) -> u64 {
        self.position_ms
    }

    fn next_chunk(&mut self) -> EngineResult<Option<PcmChunk>> {
        if self.position_ms >= self.duration_ms {
            return Ok(None);
        }
        let ms = self.chunk_ms.min(self.duration_ms - self.position_ms);
        self.position_ms += ms;
        let frames = Self::SPEC.sample_rate as u64 * ms / 1000;
        let bytes = vec![0u8; frames as usize * Self::SPEC.channels as usize * 2];
        Ok(Some(PcmChunk {
            bytes,
            spec: Self::SPEC,
        }))
    }

    fn seek(&mut self, position_ms: u64) -> EngineResult<()> {
        self.position_ms = position_ms.min(self.duration_ms);
        Ok(())
    }
}

/// Factory handing out `SilenceSource`s regardless of the path, except
/// that a missing file still reports `FileMissing` so error paths stay
/// testable with real paths.
pub fn silence_source_factory(duration_ms: u64) -> SourceFactory {
    Arc::new(move |_path: &Path| {
        Ok(Box::new(SilenceSource::new(duration_ms)) as Box<dyn PcmSource>)
    })
}

/// Factory that fails every open, for exercising error handling
pub fn failing_source_factory() -> SourceFactory {
    Arc::new(|path: &Path| {
        Err(EngineError::FileMissing(path.display().to_string()))
    })
}

/// Shared view into everything `MemorySink` instances have seen
#[derive(Default)]
pub struct SinkStats {
    pub bytes_written: Mutex<Vec<u8>>,
    pub play_calls: AtomicUsize,
    pub pause_calls: AtomicUsize,
    pub flush_calls: AtomicUsize,
    pub release_calls: AtomicUsize,
    pub sinks_created: AtomicUsize,
}

impl SinkStats {
    pub fn written_len(&self) -> usize {
        self.bytes_written.lock().unwrap().len()
    }
}

/// Sink that swallows audio into a shared byte vector. An optional per-
/// write delay simulates device backpressure so pause and cancel paths
/// get a chance to interleave.
pub struct MemorySink {
    spec: PcmSpec,
    stats: Arc<SinkStats>,
    write_delay: Option<Duration>,
}

impl MemorySink {
    pub fn new(spec: PcmSpec, stats: Arc<SinkStats>) -> Self {
        Self {
            spec,
            stats,
            write_delay: None,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.write_delay = Some(delay);
        self
    }
}

impl AudioSink for MemorySink {
    fn spec(&self) -> PcmSpec {
        self.spec
    }

    fn min_buffer_bytes(&self) -> usize {
        1024
    }

    fn write(&mut self, bytes: &[u8]) -> EngineResult<()> {
        if let Some(delay) = self.write_delay {
            std::thread::sleep(delay);
        }
        self.stats.bytes_written.lock().unwrap().extend_from_slice(bytes);
        Ok(())
    }

    fn play(&mut self) {
        self.stats.play_calls.fetch_add(1, Ordering::SeqCst);
    }

    fn pause(&mut self) {
        self.stats.pause_calls.fetch_add(1, Ordering::SeqCst);
    }

    fn stop(&mut self) {
        self.stats.pause_calls.fetch_add(1, Ordering::SeqCst);
        self.stats.flush_calls.fetch_add(1, Ordering::SeqCst);
    }

    fn flush(&mut self) {
        self.stats.flush_calls.fetch_add(1, Ordering::SeqCst);
    }

    fn release(&mut self) {
        self.stats.release_calls.fetch_add(1, Ordering::SeqCst);
    }
}

/// Builds a memory-sink factory plus the shared stats it reports into
pub fn memory_sink_factory(write_delay: Option<Duration>) -> (SinkFactory, Arc<SinkStats>) {
    let stats = Arc::new(SinkStats::default());
    let factory_stats = Arc::clone(&stats);
    let factory: SinkFactory = Arc::new(move |spec| {
        factory_stats.sinks_created.fetch_add(1, Ordering::SeqCst);
        let mut sink = MemorySink::new(spec, Arc::clone(&factory_stats));
        if let Some(delay) = write_delay {
            sink = sink.with_delay(delay);
        }
        Ok(Box::new(sink) as Box<dyn AudioSink>)
    });
    (factory, stats)
}

/// Wake lock that counts transitions so tests can assert balance
#[derive(Default)]
pub struct CountingWakeLock {
    pub acquires: AtomicUsize,
    pub releases: AtomicUsize,
    held: AtomicBool,
}

impl CountingWakeLock {
    pub fn is_held(&self) -> bool {
        self.held.load(Ordering::SeqCst)
    }
}

impl WakeLock for CountingWakeLock {
    fn acquire(&self) {
        self.acquires.fetch_add(1, Ordering::SeqCst);
        self.held.store(true, Ordering::SeqCst);
    }

    fn release(&self) {
        self.releases.fetch_add(1, Ordering::SeqCst);
        self.held.store(false, Ordering::SeqCst);
    }
}
