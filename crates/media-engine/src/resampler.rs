// crates/media-engine/src/resampler.rs
//
// Pitch-preserving time stretcher for interleaved 16-bit PCM, in the style
// of the classic Sonic library: find the dominant pitch period, then skip
// (speed up) or insert (slow down) one period at a time with a linear
// overlap-add across the seam.

/// Lowest vocal pitch the period search assumes, in Hz
const MIN_PITCH: u32 = 65;
/// Highest vocal pitch the period search assumes, in Hz
const MAX_PITCH: u32 = 400;

const MIN_SPEED: f32 = 0.05;
const MAX_SPEED: f32 = 10.0;

pub struct TimeStretcher {
    sample_rate: u32,
    channels: usize,
    speed: f32,
    pitch: f32,
    min_period: usize,
    max_period: usize,
    /// Frames needed before one skip/insert step can run
    max_required: usize,
    /// Undigested bytes that did not fill a whole frame
    pending: Vec<u8>,
    /// Interleaved input frames awaiting processing
    input: Vec<i16>,
    /// Processed interleaved frames ready to be drained
    output: Vec<i16>,
    /// Frames to pass through unmodified before the next period operation
    remaining_input_to_copy: usize,
}

impl TimeStretcher {
    pub fn new(sample_rate: u32, channels: usize) -> Self {
        // degenerate parameters must not panic, only produce garbage
        let rate = sample_rate.max(MAX_PITCH + 1);
        let channels = channels.max(1);
        let min_period = (rate / MAX_PITCH) as usize;
        let max_period = (rate / MIN_PITCH) as usize;
        Self {
            sample_rate,
            channels,
            speed: 1.0,
            pitch: 1.0,
            min_period: min_period.max(1),
            max_period: max_period.max(2),
            max_required: 2 * max_period.max(2),
            pending: Vec::new(),
            input: Vec::new(),
            output: Vec::new(),
            remaining_input_to_copy: 0,
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn speed(&self) -> f32 {
        self.speed
    }

    pub fn set_speed(&mut self, speed: f32) {
        self.speed = if speed.is_finite() {
            speed.clamp(MIN_SPEED, MAX_SPEED)
        } else {
            1.0
        };
    }

    pub fn pitch(&self) -> f32 {
        self.pitch
    }

    pub fn set_pitch(&mut self, pitch: f32) {
        self.pitch = if pitch.is_finite() {
            pitch.clamp(MIN_SPEED, MAX_SPEED)
        } else {
            1.0
        };
    }

    /// Ingests raw little-endian i16 PCM and processes whole frames
    pub fn put_bytes(&mut self, bytes: &[u8]) {
        self.pending.extend_from_slice(bytes);

        let frame_bytes = 2 * self.channels;
        let whole = self.pending.len() / frame_bytes * frame_bytes;
        for pair in self.pending[..whole].chunks_exact(2) {
            self.input.push(i16::from_le_bytes([pair[0], pair[1]]));
        }
        self.pending.drain(..whole);

        self.process_input();
    }

    /// Bytes of processed PCM ready to drain
    pub fn available_bytes(&self) -> usize {
        self.output.len() * 2
    }

    /// Drains up to `buffer.len()` bytes of processed PCM, returning the
    /// count actually written
    pub fn receive_bytes(&mut self, buffer: &mut [u8]) -> usize {
        let samples = (buffer.len() / 2).min(self.output.len());
        for (i, sample) in self.output.drain(..samples).enumerate() {
            let le = sample.to_le_bytes();
            buffer[2 * i] = le[0];
            buffer[2 * i + 1] = le[1];
        }
        samples * 2
    }

    /// Forces out whatever is buffered at stream end by padding with
    /// silence until the processing window can run once more
    pub fn flush(&mut self) {
        let unplayed = self.input_frames();
        if unplayed == 0 && self.pending.is_empty() {
            return;
        }
        self.pending.clear();
        self.input
            .extend(std::iter::repeat(0).take(2 * self.max_required * self.channels));
        self.process_input();
        self.input.clear();
        self.remaining_input_to_copy = 0;
    }

    fn input_frames(&self) -> usize {
        self.input.len() / self.channels
    }

    fn process_input(&mut self) {
        let rate = self.speed / self.pitch;
        if (rate - 1.0).abs() < 0.001 {
            // passthrough
            self.output.append(&mut self.input);
            return;
        }

        let frames = self.input_frames();
        let mut position = 0usize;

        while position + self.max_required <= frames {
            if self.remaining_input_to_copy > 0 {
                let to_copy = self
                    .remaining_input_to_copy
                    .min(self.max_required)
                    .min(frames - position);
                self.copy_frames(position, to_copy);
                self.remaining_input_to_copy -= to_copy;
                position += to_copy;
                continue;
            }

            let period = self.find_pitch_period(position);
            if rate > 1.0 {
                let new_frames = self.skip_pitch_period(position, rate, period);
                position += period + new_frames;
            } else {
                let new_frames = self.insert_pitch_period(position, rate, period);
                position += new_frames;
            }
        }

        self.input.drain(..position * self.channels);
    }

    fn copy_frames(&mut self, position: usize, count: usize) {
        let start = position * self.channels;
        let end = start + count * self.channels;
        self.output.extend_from_slice(&self.input[start..end]);
    }

    /// Emits one blended period while consuming two, speeding playback up.
    /// Returns the number of blended frames written.
    fn skip_pitch_period(&mut self, position: usize, rate: f32, period: usize) -> usize {
        let new_frames = if rate >= 2.0 {
            ((period as f32) / (rate - 1.0)) as usize
        } else {
            self.remaining_input_to_copy =
                ((period as f32) * (2.0 - rate) / (rate - 1.0)) as usize;
            period
        }
        .max(1);

        self.overlap_add(new_frames, position, position + period);
        new_frames
    }

    /// Emits one period verbatim plus a blended copy, slowing playback
    /// down. Returns the number of input frames consumed.
    fn insert_pitch_period(&mut self, position: usize, rate: f32, period: usize) -> usize {
        let new_frames = if rate < 0.5 {
            ((period as f32) * rate / (1.0 - rate)) as usize
        } else {
            self.remaining_input_to_copy =
                ((period as f32) * (2.0 * rate - 1.0) / (1.0 - rate)) as usize;
            period
        }
        .max(1);

        self.copy_frames(position, period);
        self.overlap_add(new_frames, position + period, position);
        new_frames
    }

    /// Linear crossfade of `count` frames from the ramp-down start to the
    /// ramp-up start, appended to the output
    fn overlap_add(&mut self, count: usize, down_pos: usize, up_pos: usize) {
        for t in 0..count {
            let ratio = t as f32 / count as f32;
            for ch in 0..self.channels {
                let down = self.input[(down_pos + t) * self.channels + ch] as f32;
                let up = self.input[(up_pos + t) * self.channels + ch] as f32;
                let blended = down * (1.0 - ratio) + up * ratio;
                self.output.push(blended as i16);
            }
        }
    }

    /// AMDF search for the dominant pitch period in the window at
    /// `position`, comparing normalized differences
    fn find_pitch_period(&self, position: usize) -> usize {
        let mut best_period = self.min_period;
        let mut min_diff = u64::MAX;

        for period in self.min_period..=self.max_period {
            let mut diff: u64 = 0;
            for t in 0..period {
                let a = self.downmixed(position + t);
                let b = self.downmixed(position + period + t);
                diff += (a - b).unsigned_abs() as u64;
            }
            // normalize by period length before comparing; the first
            // candidate always wins so the sentinel never enters the
            // multiplication
            if min_diff == u64::MAX || diff * (best_period as u64) < min_diff * (period as u64) {
                min_diff = diff;
                best_period = period;
            }
        }
        best_period
    }

    fn downmixed(&self, frame: usize) -> i32 {
        let start = frame * self.channels;
        let sum: i32 = self.input[start..start + self.channels]
            .iter()
            .map(|&s| s as i32)
            .sum();
        sum / self.channels as i32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 440 Hz sine, mono, i16 LE bytes
    fn sine_bytes(sample_rate: u32, millis: u32) -> Vec<u8> {
        let frames = (sample_rate * millis / 1000) as usize;
        let mut bytes = Vec::with_capacity(frames * 2);
        for i in 0..frames {
            let t = i as f32 / sample_rate as f32;
            let sample = ((t * 440.0 * 2.0 * std::f32::consts::PI).sin() * 16000.0) as i16;
            bytes.extend_from_slice(&sample.to_le_bytes());
        }
        bytes
    }

    fn drain_all(stretcher: &mut TimeStretcher) -> Vec<u8> {
        let mut out = vec![0u8; stretcher.available_bytes()];
        let n = stretcher.receive_bytes(&mut out);
        out.truncate(n);
        out
    }

    #[test]
    fn test_unity_speed_is_passthrough() {
        let mut s = TimeStretcher::new(44100, 1);
        let input = sine_bytes(44100, 200);
        s.put_bytes(&input);
        s.flush();
        let output = drain_all(&mut s);
        assert_eq!(output, input);
    }

    #[test]
    fn test_double_speed_roughly_halves_output() {
        let mut s = TimeStretcher::new(44100, 1);
        s.set_speed(2.0);
        let input = sine_bytes(44100, 1000);
        s.put_bytes(&input);
        s.flush();
        let output = drain_all(&mut s);

        let ratio = output.len() as f64 / input.len() as f64;
        assert!((0.4..=0.6).contains(&ratio), "ratio was {ratio}");
    }

    #[test]
    fn test_half_speed_roughly_doubles_output() {
        let mut s = TimeStretcher::new(44100, 1);
        s.set_speed(0.5);
        let input = sine_bytes(44100, 500);
        s.put_bytes(&input);
        s.flush();
        let output = drain_all(&mut s);

        let ratio = output.len() as f64 / input.len() as f64;
        assert!((1.7..=2.3).contains(&ratio), "ratio was {ratio}");
    }

    #[test]
    fn test_stereo_frames_stay_paired() {
        let mut s = TimeStretcher::new(44100, 2);
        s.set_speed(1.5);
        let mono = sine_bytes(44100, 500);
        // interleave the same signal on both channels
        let mut stereo = Vec::with_capacity(mono.len() * 2);
        for pair in mono.chunks_exact(2) {
            stereo.extend_from_slice(pair);
            stereo.extend_from_slice(pair);
        }
        s.put_bytes(&stereo);
        s.flush();
        let output = drain_all(&mut s);
        assert_eq!(output.len() % 4, 0, "output must hold whole stereo frames");
        assert!(!output.is_empty());
    }

    #[test]
    fn test_partial_frame_bytes_are_buffered() {
        let mut s = TimeStretcher::new(44100, 1);
        let input = sine_bytes(44100, 100);
        s.put_bytes(&input[..7]);
        s.put_bytes(&input[7..]);
        s.flush();
        assert_eq!(drain_all(&mut s), input);
    }

    #[test]
    fn test_degenerate_parameters_do_not_crash() {
        let mut s = TimeStretcher::new(0, 0);
        s.set_speed(f32::NAN);
        s.set_speed(1000.0);
        s.set_pitch(-3.0);
        s.put_bytes(&sine_bytes(8000, 100));
        s.flush();
        let _ = drain_all(&mut s);
    }

    #[test]
    fn test_flush_emits_buffered_remainder() {
        let mut s = TimeStretcher::new(44100, 1);
        s.set_speed(2.0);
        // too short for one processing window on its own
        s.put_bytes(&sine_bytes(44100, 20));
        let before = s.available_bytes();
        s.flush();
        assert!(s.available_bytes() > before);
    }

    #[test]
    fn test_pitch_search_accepts_the_first_candidate() {
        let mut s = TimeStretcher::new(44100, 1);
        // worst case for the difference sums: full-scale alternation
        for i in 0..2 * s.max_required {
            s.input.push(if i % 2 == 0 { i16::MAX } else { i16::MIN });
        }
        let period = s.find_pitch_period(0);
        assert!((s.min_period..=s.max_period).contains(&period));
    }

    #[test]
    fn test_double_speed_full_scale_input() {
        let mut s = TimeStretcher::new(44100, 1);
        s.set_speed(2.0);
        let mut bytes = Vec::new();
        for i in 0..44100 / 2 {
            let sample: i16 = if i % 2 == 0 { i16::MAX } else { i16::MIN };
            bytes.extend_from_slice(&sample.to_le_bytes());
        }
        s.put_bytes(&bytes);
        s.flush();
        assert!(!drain_all(&mut s).is_empty());
    }

    #[test]
    fn test_speed_change_mid_stream() {
        let mut s = TimeStretcher::new(44100, 1);
        s.put_bytes(&sine_bytes(44100, 200));
        s.set_speed(2.0);
        s.put_bytes(&sine_bytes(44100, 200));
        s.flush();
        assert!(!drain_all(&mut s).is_empty());
    }
}
