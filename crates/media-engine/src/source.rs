// crates/media-engine/src/source.rs

use crate::error::{EngineError, EngineResult};
use std::path::Path;
use std::sync::Arc;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{Decoder, DecoderOptions};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader, SeekMode, SeekTo};
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::core::units::Time;

/// Negotiated PCM stream parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PcmSpec {
    pub sample_rate: u32,
    pub channels: u16,
}

/// One run of decoded PCM. The spec travels with the chunk because a
/// container may switch sample rate or channel count mid-stream.
pub struct PcmChunk {
    /// Interleaved i16 little-endian PCM
    pub bytes: Vec<u8>,
    pub spec: PcmSpec,
}

/// Provider of decoded PCM for one media file.
///
/// The decode loop drives this; implementations must be sendable to the
/// playback thread. `next_chunk` returning `Ok(None)` means end of stream.
pub trait PcmSource: Send {
    fn spec(&self) -> PcmSpec;
    fn duration_ms(&self) -> u64;
    fn position_ms(&self) -> u64;
    fn next_chunk(&mut self) -> EngineResult<Option<PcmChunk>>;
    /// Seeks to the nearest preceding sync point at or before the position
    fn seek(&mut self, position_ms: u64) -> EngineResult<()>;
}

/// Opens a source for a path; injectable so tests can run without media
/// files or codecs
pub type SourceFactory = Arc<dyn Fn(&Path) -> EngineResult<Box<dyn PcmSource>> + Send + Sync>;

/// The default factory, backed by symphonia
pub fn default_source_factory() -> SourceFactory {
    Arc::new(|path| Ok(Box::new(SymphoniaSource::new(path)?) as Box<dyn PcmSource>))
}

/// Symphonia-backed demux + decode for the sole audio track of a file
pub struct SymphoniaSource {
    reader: Box<dyn FormatReader>,
    decoder: Box<dyn Decoder>,
    track_id: u32,
    spec: PcmSpec,
    duration_ms: u64,
    /// Frames decoded since the last seek
    frames_out: u64,
    /// Stream position the last seek landed on
    base_ms: u64,
}

impl SymphoniaSource {
    pub fn new(path: &Path) -> EngineResult<Self> {
        if !path.exists() {
            return Err(EngineError::FileMissing(path.display().to_string()));
        }
        let file = std::fs::File::open(path)
            .map_err(|e| EngineError::DecodeError(format!("Failed to open file: {}", e)))?;

        let mss = MediaSourceStream::new(Box::new(file), Default::default());

        let mut hint = Hint::new();
        if let Some(extension) = path.extension().and_then(|e| e.to_str()) {
            hint.with_extension(extension);
        }

        let probed = symphonia::default::get_probe()
            .format(
                &hint,
                mss,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )
            .map_err(|e| EngineError::DecodeError(format!("Failed to probe format: {}", e)))?;

        let reader = probed.format;

        let track = reader
            .default_track()
            .ok_or_else(|| EngineError::DecodeError("No audio track found".to_string()))?;

        let track_id = track.id;
        let codec_params = track.codec_params.clone();

        let decoder = symphonia::default::get_codecs()
            .make(&codec_params, &DecoderOptions::default())
            .map_err(|e| EngineError::DecodeError(format!("Failed to create decoder: {}", e)))?;

        let sample_rate = codec_params.sample_rate.unwrap_or(44100);
        let channels = codec_params
            .channels
            .map(|c| c.count() as u16)
            .unwrap_or(2);
        let duration_ms = codec_params
            .n_frames
            .map(|frames| frames * 1000 / sample_rate as u64)
            .unwrap_or(0);

        Ok(Self {
            reader,
            decoder,
            track_id,
            spec: PcmSpec {
                sample_rate,
                channels,
            },
            duration_ms,
            frames_out: 0,
            base_ms: 0,
        })
    }
}

impl PcmSource for SymphoniaSource {
    fn spec(&self) -> PcmSpec {
        self.spec
    }

    fn duration_ms(&self) -> u64 {
        self.duration_ms
    }

    fn position_ms(&self) -> u64 {
        self.base_ms + self.frames_out * 1000 / self.spec.sample_rate.max(1) as u64
    }

    fn next_chunk(&mut self) -> EngineResult<Option<PcmChunk>> {
        loop {
            let packet = match self.reader.next_packet() {
                Ok(packet) => packet,
                Err(SymphoniaError::IoError(e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    return Ok(None);
                }
                Err(e) => {
                    return Err(EngineError::DecodeError(format!(
                        "Failed to read packet: {}",
                        e
                    )));
                }
            };

            if packet.track_id() != self.track_id {
                continue;
            }

            let decoded = match self.decoder.decode(&packet) {
                Ok(decoded) => decoded,
                Err(SymphoniaError::DecodeError(e)) => {
                    log::warn!("Decode error, skipping packet: {}", e);
                    continue;
                }
                Err(e) => {
                    return Err(EngineError::DecodeError(format!(
                        "Failed to decode packet: {}",
                        e
                    )));
                }
            };

            let decoded_spec = *decoded.spec();
            let frames = decoded.frames() as u64;

            let mut sample_buf = SampleBuffer::<i16>::new(decoded.capacity() as u64, decoded_spec);
            sample_buf.copy_interleaved_ref(decoded);

            // the container may renegotiate the stream parameters mid-file
            let chunk_spec = PcmSpec {
                sample_rate: decoded_spec.rate,
                channels: decoded_spec.channels.count() as u16,
            };
            if chunk_spec != self.spec {
                log::info!(
                    "stream format changed: {} Hz x{} -> {} Hz x{}",
                    self.spec.sample_rate,
                    self.spec.channels,
                    chunk_spec.sample_rate,
                    chunk_spec.channels
                );
                self.spec = chunk_spec;
            }
            self.frames_out += frames;

            let mut bytes = Vec::with_capacity(sample_buf.samples().len() * 2);
            for sample in sample_buf.samples() {
                bytes.extend_from_slice(&sample.to_le_bytes());
            }

            return Ok(Some(PcmChunk {
                bytes,
                spec: chunk_spec,
            }));
        }
    }

    fn seek(&mut self, position_ms: u64) -> EngineResult<()> {
        let seeked = self
            .reader
            .seek(
                SeekMode::Coarse,
                SeekTo::Time {
                    time: Time::new(position_ms / 1000, (position_ms % 1000) as f64 / 1000.0),
                    track_id: Some(self.track_id),
                },
            )
            .map_err(|e| EngineError::SeekError(format!("Failed to seek: {}", e)))?;

        self.decoder.reset();

        // The landing timestamp is the nearest preceding sync point, which
        // may be earlier than requested.
        let time_base = self
            .reader
            .tracks()
            .iter()
            .find(|t| t.id == self.track_id)
            .and_then(|t| t.codec_params.time_base);
        self.base_ms = match time_base {
            Some(tb) => {
                let time = tb.calc_time(seeked.actual_ts);
                time.seconds * 1000 + (time.frac * 1000.0) as u64
            }
            None => position_ms,
        };
        self.frames_out = 0;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn test_missing_file_is_reported_as_such() {
        let result = SymphoniaSource::new(Path::new("/nowhere/missing.mp3"));
        assert!(matches!(result, Err(EngineError::FileMissing(_))));
    }

    #[test]
    fn test_unreadable_file_is_a_decode_error() {
        let temp = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(temp.path(), b"definitely not audio").unwrap();
        let result = SymphoniaSource::new(temp.path());
        assert!(matches!(result, Err(EngineError::DecodeError(_))));
    }
}
