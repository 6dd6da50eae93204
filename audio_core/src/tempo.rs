//! Pitch-preserving tempo change by windowed overlap-add.
//!
//! The input is cut into Hann-windowed chunks read with an analysis hop of
//! `speed` times the synthesis hop, then laid back down at the synthesis hop.
//! Pitch stays put because each chunk is copied verbatim; only the spacing
//! between chunks changes.

use std::f64::consts::PI;

use crate::{ms_to_frames, AudioBuffer};

/// Chunk size used for ordinary speed changes.
pub const DEFAULT_CHUNK_MS: f64 = 150.0;
/// Smaller chunk used for large speed-ups, which smear with long chunks.
pub const FAST_CHUNK_MS: f64 = 50.0;
/// Speeds (in percent) above this use [`FAST_CHUNK_MS`].
pub const FAST_SPEED_THRESHOLD: f64 = 150.0;

pub fn chunk_ms_for_speed(speed_percent: f64) -> f64 {
    if speed_percent > FAST_SPEED_THRESHOLD {
        FAST_CHUNK_MS
    } else {
        DEFAULT_CHUNK_MS
    }
}

pub(crate) fn time_stretch(
    buffer: &AudioBuffer,
    speed: f64,
    chunk_ms: f64,
) -> anyhow::Result<AudioBuffer> {
    if !speed.is_finite() || speed <= 0.0 {
        anyhow::bail!("invalid playback speed ratio: {speed}");
    }
    if (speed - 1.0).abs() < 1e-6 || buffer.is_empty() {
        return Ok(buffer.clone());
    }

    let ch = buffer.channels() as usize;
    let frames = buffer.frames();
    let target = (frames as f64 / speed).round() as usize;

    let mut frame_len = ms_to_frames(chunk_ms, buffer.sample_rate()).max(16);
    frame_len += frame_len % 2;
    let synthesis_hop = frame_len / 2;
    let analysis_hop = ((synthesis_hop as f64) * speed).round().max(1.0) as usize;

    let window: Vec<f32> = (0..frame_len)
        .map(|i| (0.5 - 0.5 * (2.0 * PI * i as f64 / (frame_len - 1) as f64).cos()) as f32)
        .collect();

    let input = buffer.samples();
    let mut out = vec![0.0f32; (target + frame_len) * ch];
    let mut norm = vec![0.0f32; target + frame_len];

    let mut k = 0usize;
    loop {
        let read = k * analysis_hop;
        let write = k * synthesis_hop;
        if write >= target || read >= frames {
            break;
        }
        for (i, w) in window.iter().enumerate() {
            if read + i >= frames {
                break;
            }
            for c in 0..ch {
                out[(write + i) * ch + c] += input[(read + i) * ch + c] * w;
            }
            norm[write + i] += w;
        }
        k += 1;
    }

    for (f, n) in norm.iter().enumerate().take(target) {
        for c in 0..ch {
            let idx = f * ch + c;
            out[idx] = if *n > 1e-3 { out[idx] / n } else { 0.0 };
        }
    }
    out.truncate(target * ch);

    Ok(AudioBuffer::new(out, buffer.sample_rate(), buffer.channels()))
}
