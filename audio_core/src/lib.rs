//! In-memory audio timelines.
//!
//! An [`AudioBuffer`] is a decoded, interleaved `f32` PCM timeline with a
//! known sample rate and channel count. Buffers have value semantics: every
//! operation (offset combination, silence, speed change, format conversion)
//! returns a new buffer and leaves its inputs untouched.
mod decode;
mod resample;
mod tempo;
mod wav;

use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};

pub use decode::{decode_bytes, decode_file, probe_duration};
pub use tempo::{chunk_ms_for_speed, DEFAULT_CHUNK_MS, FAST_CHUNK_MS, FAST_SPEED_THRESHOLD};
pub use wav::{encode_wav, save_to_folder, write_wav};

/// Format used for silence when there is no timeline to match yet.
pub const DEFAULT_SAMPLE_RATE: u32 = 44_100;
pub const DEFAULT_CHANNELS: u16 = 1;

/// Longest timeline any operation will produce (one hour).
pub const MAX_DURATION_MS: f64 = 3_600_000.0;

/// Sample rate + channel layout of a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self {
            sample_rate: DEFAULT_SAMPLE_RATE,
            channels: DEFAULT_CHANNELS,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AudioBuffer {
    samples: Vec<f32>,
    format: AudioFormat,
}

impl AudioBuffer {
    /// Wrap interleaved samples. Trailing samples that do not fill a whole
    /// frame are dropped.
    pub fn new(mut samples: Vec<f32>, sample_rate: u32, channels: u16) -> Self {
        let channels = channels.max(1);
        let whole = samples.len() - samples.len() % channels as usize;
        samples.truncate(whole);
        Self {
            samples,
            format: AudioFormat {
                sample_rate: sample_rate.max(1),
                channels,
            },
        }
    }

    pub fn silent(duration_ms: f64, format: AudioFormat) -> anyhow::Result<Self> {
        let frames = bounded_frames(duration_ms.max(0.0), format.sample_rate)?;
        Ok(Self::new(
            vec![0.0; frames * format.channels as usize],
            format.sample_rate,
            format.channels,
        ))
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn format(&self) -> AudioFormat {
        self.format
    }

    pub fn sample_rate(&self) -> u32 {
        self.format.sample_rate
    }

    pub fn channels(&self) -> u16 {
        self.format.channels
    }

    pub fn frames(&self) -> usize {
        self.samples.len() / self.format.channels as usize
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn duration_ms(&self) -> f64 {
        self.frames() as f64 * 1000.0 / self.format.sample_rate as f64
    }

    pub fn duration_secs(&self) -> f64 {
        self.duration_ms() / 1000.0
    }

    /// Return a copy with `duration_ms` of silence added at the end.
    pub fn append_silence(&self, duration_ms: f64) -> anyhow::Result<AudioBuffer> {
        let extra = bounded_frames(duration_ms.max(0.0), self.format.sample_rate)?;
        let total = self.frames() + extra;
        if total > max_frames(self.format.sample_rate) {
            bail!("Silence of {duration_ms} ms would exceed the maximum timeline length");
        }
        let mut samples = self.samples.clone();
        samples.resize(total * self.format.channels as usize, 0.0);
        Ok(AudioBuffer {
            samples,
            format: self.format,
        })
    }

    /// Convert to another sample rate / channel count.
    pub fn convert(&self, target: AudioFormat) -> anyhow::Result<AudioBuffer> {
        if target == self.format {
            return Ok(self.clone());
        }

        let remixed = remix(&self.samples, self.format.channels, target.channels);
        if self.format.sample_rate == target.sample_rate {
            return Ok(AudioBuffer::new(remixed, target.sample_rate, target.channels));
        }

        let planes = deinterleave(&remixed, target.channels);
        let resampled = resample::resample(&planes, self.format.sample_rate, target.sample_rate)
            .with_context(|| {
                format!(
                    "Failed to resample {} Hz -> {} Hz",
                    self.format.sample_rate, target.sample_rate
                )
            })?;
        Ok(AudioBuffer::new(
            interleave(&resampled),
            target.sample_rate,
            target.channels,
        ))
    }

    /// Insert `other` relative to the end of this timeline.
    ///
    /// The insertion point is `self.duration + offset_ms`, clamped to the start
    /// of the timeline. Overlapping regions are mixed; a positive offset leaves
    /// a gap of silence. Both buffers are first brought to the larger of the two
    /// sample rates and channel counts. Fails when the result would be longer
    /// than [`MAX_DURATION_MS`].
    pub fn combine(&self, other: &AudioBuffer, offset_ms: f64) -> anyhow::Result<AudioBuffer> {
        let target = AudioFormat {
            sample_rate: self.format.sample_rate.max(other.format.sample_rate),
            channels: self.format.channels.max(other.format.channels),
        };
        let base = self.convert(target)?;
        let overlay = other.convert(target)?;
        let ch = target.channels as usize;

        let start = insertion_frame(base.frames(), offset_ms, target.sample_rate);
        let total = match start.checked_add(overlay.frames()) {
            Some(end) if end <= max_frames(target.sample_rate) => base.frames().max(end),
            _ => bail!("Offset of {offset_ms} ms would exceed the maximum timeline length"),
        };

        let mut samples = base.samples;
        samples.resize(total * ch, 0.0);
        for (i, s) in overlay.samples.iter().enumerate() {
            let idx = start * ch + i;
            samples[idx] = (samples[idx] + s).clamp(-1.0, 1.0);
        }

        Ok(AudioBuffer {
            samples,
            format: target,
        })
    }

    /// Pitch-preserving tempo change. `speed` is a ratio (1.0 = unchanged).
    pub fn change_speed(&self, speed: f64, chunk_ms: f64) -> anyhow::Result<AudioBuffer> {
        tempo::time_stretch(self, speed, chunk_ms)
    }
}

/// Frame index at which a segment lands when inserted `offset_ms` after the
/// end of a timeline of `timeline_frames`. Never negative.
pub fn insertion_frame(timeline_frames: usize, offset_ms: f64, sample_rate: u32) -> usize {
    let offset_frames = (offset_ms * sample_rate as f64 / 1000.0).round() as i64;
    let timeline = i64::try_from(timeline_frames).unwrap_or(i64::MAX);
    let start = timeline.saturating_add(offset_frames).max(0);
    usize::try_from(start).unwrap_or(usize::MAX)
}

pub(crate) fn ms_to_frames(ms: f64, sample_rate: u32) -> usize {
    (ms * sample_rate as f64 / 1000.0).round() as usize
}

fn max_frames(sample_rate: u32) -> usize {
    ms_to_frames(MAX_DURATION_MS, sample_rate)
}

fn bounded_frames(ms: f64, sample_rate: u32) -> anyhow::Result<usize> {
    if !ms.is_finite() || ms > MAX_DURATION_MS {
        bail!("Duration of {ms} ms exceeds the maximum timeline length");
    }
    Ok(ms_to_frames(ms, sample_rate))
}

fn remix(samples: &[f32], from: u16, to: u16) -> Vec<f32> {
    let (from, to) = (from as usize, to as usize);
    if from == to {
        return samples.to_vec();
    }
    let mut out = Vec::with_capacity(samples.len() / from * to);
    for frame in samples.chunks_exact(from) {
        if to == 1 {
            out.push(frame.iter().sum::<f32>() / from as f32);
        } else {
            for c in 0..to {
                out.push(frame[c % from]);
            }
        }
    }
    out
}

fn deinterleave(samples: &[f32], channels: u16) -> Vec<Vec<f32>> {
    let ch = channels as usize;
    let mut planes = vec![Vec::with_capacity(samples.len() / ch); ch];
    for frame in samples.chunks_exact(ch) {
        for (plane, s) in planes.iter_mut().zip(frame) {
            plane.push(*s);
        }
    }
    planes
}

fn interleave(planes: &[Vec<f32>]) -> Vec<f32> {
    let frames = planes.iter().map(Vec::len).min().unwrap_or(0);
    let mut out = Vec::with_capacity(frames * planes.len());
    for i in 0..frames {
        for plane in planes {
            out.push(plane[i]);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tone(ms: f64, format: AudioFormat, value: f32) -> AudioBuffer {
        let frames = ms_to_frames(ms, format.sample_rate);
        AudioBuffer::new(
            vec![value; frames * format.channels as usize],
            format.sample_rate,
            format.channels,
        )
    }

    const MONO_8K: AudioFormat = AudioFormat {
        sample_rate: 8_000,
        channels: 1,
    };

    #[test]
    fn test_silent_duration() {
        let buf = AudioBuffer::silent(2000.0, MONO_8K).unwrap();
        assert_eq!(buf.frames(), 16_000);
        assert!((buf.duration_secs() - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_combine_zero_offset_concatenates() {
        let a = tone(500.0, MONO_8K, 0.1);
        let b = tone(250.0, MONO_8K, 0.2);
        let out = a.combine(&b, 0.0).unwrap();
        assert!((out.duration_ms() - 750.0).abs() < 1e-6);
        assert_eq!(out.samples()[0], 0.1);
        assert_eq!(out.samples()[out.frames() - 1], 0.2);
    }

    #[test]
    fn test_combine_positive_offset_leaves_gap() {
        let a = tone(500.0, MONO_8K, 0.1);
        let b = tone(500.0, MONO_8K, 0.1);
        let out = a.combine(&b, 1000.0).unwrap();
        assert!((out.duration_ms() - 2000.0).abs() < 1e-6);
        // Middle of the gap is silent
        assert_eq!(out.samples()[ms_to_frames(1000.0, 8_000)], 0.0);
    }

    #[test]
    fn test_combine_negative_offset_overlaps_tail() {
        let a = tone(1000.0, MONO_8K, 0.25);
        let b = tone(500.0, MONO_8K, 0.25);
        let out = a.combine(&b, -250.0).unwrap();
        assert!((out.duration_ms() - 1250.0).abs() < 1e-6);
        // Overlap region is mixed
        let overlap = ms_to_frames(900.0, 8_000);
        assert!((out.samples()[overlap] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_extreme_negative_offset_clamps_to_start() {
        let a = tone(1000.0, MONO_8K, 0.1);
        let b = tone(300.0, MONO_8K, 0.1);
        let out = a.combine(&b, -100_000.0).unwrap();
        // Inserted at 0, so the original length is kept
        assert!((out.duration_ms() - 1000.0).abs() < 1e-6);
        assert_eq!(insertion_frame(8_000, -100_000.0, 8_000), 0);
    }

    #[test]
    fn test_combine_mixes_formats() {
        let a = tone(500.0, MONO_8K, 0.1);
        let stereo = AudioFormat {
            sample_rate: 8_000,
            channels: 2,
        };
        let b = tone(500.0, stereo, 0.1);
        let out = a.combine(&b, 0.0).unwrap();
        assert_eq!(out.channels(), 2);
        assert!((out.duration_ms() - 1000.0).abs() < 1e-6);
    }

    #[test]
    fn test_combine_does_not_alias_inputs() {
        let a = tone(100.0, MONO_8K, 0.1);
        let b = tone(100.0, MONO_8K, 0.1);
        let _ = a.combine(&b, -100.0).unwrap();
        assert!(a.samples().iter().all(|s| *s == 0.1));
    }

    #[test]
    fn test_append_silence() {
        let a = tone(100.0, MONO_8K, 0.3);
        let out = a.append_silence(400.0).unwrap();
        assert!((out.duration_ms() - 500.0).abs() < 1e-6);
        assert!((a.duration_ms() - 100.0).abs() < 1e-6);
    }

    #[test]
    fn test_huge_silence_is_rejected() {
        assert!(AudioBuffer::silent(1e300, MONO_8K).is_err());
        assert!(AudioBuffer::silent(f64::INFINITY, MONO_8K).is_err());
        let a = tone(100.0, MONO_8K, 0.3);
        assert!(a.append_silence(1e300).is_err());
        assert!(a.append_silence(MAX_DURATION_MS).is_err());
    }

    #[test]
    fn test_huge_offsets_do_not_overflow() {
        let saturated = usize::try_from(i64::MAX).unwrap_or(usize::MAX);
        assert_eq!(insertion_frame(8_000, 1e300, 8_000), saturated);
        assert_eq!(insertion_frame(8_000, -1e300, 8_000), 0);
        assert_eq!(insertion_frame(usize::MAX, 1000.0, 8_000), saturated);

        let a = tone(100.0, MONO_8K, 0.1);
        let b = tone(100.0, MONO_8K, 0.1);
        assert!(a.combine(&b, 1e300).is_err());
        assert!(a.combine(&b, MAX_DURATION_MS + 1000.0).is_err());
        let clamped = a.combine(&b, -1e300).unwrap();
        assert!((clamped.duration_ms() - 100.0).abs() < 1e-6);
    }

    #[test]
    fn test_remix_stereo_to_mono_averages() {
        let out = remix(&[0.2, 0.4, 0.0, 1.0], 2, 1);
        assert_eq!(out.len(), 2);
        assert!((out[0] - 0.3).abs() < 1e-6);
        assert!((out[1] - 0.5).abs() < 1e-6);
    }
}
