// crates/media-engine/src/output.rs
//
// Audio output seam. The decode loop only ever talks to `AudioSink`; the
// real implementation drives cpal from a dedicated stream thread so the
// sink handle itself stays Send (cpal streams are not).

use crate::error::{EngineError, EngineResult};
use crate::source::PcmSpec;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, StreamConfig};
use crossbeam_channel::{bounded, Receiver, Sender, TryRecvError};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;

/// Byte sink for interleaved i16 little-endian PCM.
///
/// `write` may block for backpressure; that blocking is what paces the
/// decode loop to real time.
pub trait AudioSink: Send {
    fn spec(&self) -> PcmSpec;
    /// Smallest buffer the device accepts, in bytes. Callers size their
    /// internal buffer as 4x this.
    fn min_buffer_bytes(&self) -> usize;
    fn write(&mut self, bytes: &[u8]) -> EngineResult<()>;
    fn play(&mut self);
    fn pause(&mut self);
    fn stop(&mut self);
    /// Discards queued audio that has not reached the device yet
    fn flush(&mut self);
    fn release(&mut self);
}

/// Creates a sink for the given stream parameters; injectable so tests and
/// mid-stream format changes can build sinks on demand
pub type SinkFactory = Arc<dyn Fn(PcmSpec) -> EngineResult<Box<dyn AudioSink>> + Send + Sync>;

/// The default factory, backed by cpal
pub fn default_sink_factory() -> SinkFactory {
    Arc::new(|spec| Ok(Box::new(CpalSink::new(spec)?) as Box<dyn AudioSink>))
}

enum SinkCtrl {
    Play,
    Pause,
    Release,
}

/// cpal-backed sink. Owns a worker thread that holds the actual stream;
/// data and control travel over channels.
pub struct CpalSink {
    spec: PcmSpec,
    min_buffer_bytes: usize,
    data_tx: Option<Sender<(u64, Vec<f32>)>>,
    ctrl_tx: Sender<SinkCtrl>,
    /// Bumped on flush; the output callback drops buffers from old epochs
    epoch: Arc<AtomicU64>,
    worker: Option<thread::JoinHandle<()>>,
}

impl CpalSink {
    pub fn new(spec: PcmSpec) -> EngineResult<Self> {
        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or_else(|| EngineError::OutputError("No output device available".to_string()))?;

        let min_buffer_frames = match device.default_output_config() {
            Ok(config) => match config.buffer_size() {
                cpal::SupportedBufferSize::Range { min, .. } => (*min).max(256) as usize,
                cpal::SupportedBufferSize::Unknown => 1024,
            },
            Err(_) => 1024,
        };
        let min_buffer_bytes = min_buffer_frames * spec.channels as usize * 2;

        let config = StreamConfig {
            channels: spec.channels,
            sample_rate: SampleRate(spec.sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let (data_tx, data_rx) = bounded::<(u64, Vec<f32>)>(4);
        let (ctrl_tx, ctrl_rx) = bounded::<SinkCtrl>(8);
        let epoch = Arc::new(AtomicU64::new(0));
        let callback_epoch = Arc::clone(&epoch);

        let worker = thread::spawn(move || {
            if let Err(e) = run_stream(&device, &config, data_rx, ctrl_rx, callback_epoch) {
                log::error!("audio output stream failed: {e}");
            }
        });

        Ok(Self {
            spec,
            min_buffer_bytes,
            data_tx: Some(data_tx),
            ctrl_tx,
            epoch,
            worker: Some(worker),
        })
    }
}

fn run_stream(
    device: &cpal::Device,
    config: &StreamConfig,
    data_rx: Receiver<(u64, Vec<f32>)>,
    ctrl_rx: Receiver<SinkCtrl>,
    epoch: Arc<AtomicU64>,
) -> EngineResult<()> {
    let mut buffer: Vec<f32> = Vec::new();
    let mut buffer_epoch = 0u64;
    let mut position = 0usize;

    let stream = device
        .build_output_stream(
            config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                let current = epoch.load(Ordering::Relaxed);
                if buffer_epoch != current {
                    buffer.clear();
                    position = 0;
                }
                let mut i = 0;
                while i < data.len() {
                    while position >= buffer.len() {
                        match data_rx.try_recv() {
                            Ok((chunk_epoch, chunk)) => {
                                if chunk_epoch != current {
                                    continue;
                                }
                                buffer = chunk;
                                buffer_epoch = chunk_epoch;
                                position = 0;
                            }
                            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => {
                                // underrun: pad the rest of the device buffer
                                for tail in &mut data[i..] {
                                    *tail = 0.0;
                                }
                                buffer.clear();
                                position = 0;
                                return;
                            }
                        }
                    }
                    data[i] = buffer[position];
                    position += 1;
                    i += 1;
                }
            },
            |err| log::error!("audio output error: {err}"),
            None,
        )
        .map_err(|e| EngineError::OutputError(format!("Failed to build stream: {e}")))?;

    // keep the stream alive until released, translating control messages
    while let Ok(ctrl) = ctrl_rx.recv() {
        match ctrl {
            SinkCtrl::Play => {
                if let Err(e) = stream.play() {
                    log::error!("failed to start stream: {e}");
                }
            }
            SinkCtrl::Pause => {
                if let Err(e) = stream.pause() {
                    log::error!("failed to pause stream: {e}");
                }
            }
            SinkCtrl::Release => break,
        }
    }
    Ok(())
}

impl AudioSink for CpalSink {
    fn spec(&self) -> PcmSpec {
        self.spec
    }

    fn min_buffer_bytes(&self) -> usize {
        self.min_buffer_bytes
    }

    fn write(&mut self, bytes: &[u8]) -> EngineResult<()> {
        let mut samples: Vec<f32> = bytes
            .chunks_exact(2)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]]) as f32 / 32768.0)
            .collect();
        let epoch = self.epoch.load(Ordering::Relaxed);
        let Some(tx) = &self.data_tx else {
            return Err(EngineError::OutputError("Output stream is gone".to_string()));
        };
        loop {
            // a flush while we are blocked makes this chunk stale; drop it
            // instead of waiting on a queue nobody drains
            if self.epoch.load(Ordering::Relaxed) != epoch {
                return Ok(());
            }
            match tx.send_timeout((epoch, samples), std::time::Duration::from_millis(50)) {
                Ok(()) => return Ok(()),
                Err(crossbeam_channel::SendTimeoutError::Timeout(back)) => samples = back.1,
                Err(crossbeam_channel::SendTimeoutError::Disconnected(_)) => {
                    return Err(EngineError::OutputError("Output stream is gone".to_string()));
                }
            }
        }
    }

    fn play(&mut self) {
        let _ = self.ctrl_tx.send(SinkCtrl::Play);
    }

    fn pause(&mut self) {
        let _ = self.ctrl_tx.send(SinkCtrl::Pause);
    }

    fn stop(&mut self) {
        self.flush();
        let _ = self.ctrl_tx.send(SinkCtrl::Pause);
    }

    fn flush(&mut self) {
        self.epoch.fetch_add(1, Ordering::Relaxed);
    }

    fn release(&mut self) {
        self.data_tx.take();
        let _ = self.ctrl_tx.send(SinkCtrl::Release);
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

impl Drop for CpalSink {
    fn drop(&mut self) {
        self.release();
    }
}
