//! Decoding of encoded audio (mp3, wav, ogg, flac) into an [`AudioBuffer`].

use std::fs::File;
use std::io::Cursor;
use std::path::Path;

use anyhow::Context;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::{MediaSource, MediaSourceStream};
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tracing::debug;

use crate::AudioBuffer;

/// Decode an audio file, using its extension as a format hint.
pub fn decode_file<P: AsRef<Path>>(path: P) -> anyhow::Result<AudioBuffer> {
    let path = path.as_ref();
    let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    decode_source(Box::new(file), hint)
        .with_context(|| format!("Failed to decode {}", path.display()))
}

/// Decode audio held in memory (e.g. bytes returned by a TTS engine).
pub fn decode_bytes(bytes: &[u8]) -> anyhow::Result<AudioBuffer> {
    if bytes.is_empty() {
        anyhow::bail!("no audio bytes to decode");
    }
    decode_source(Box::new(Cursor::new(bytes.to_vec())), Hint::new())
}

/// Duration in seconds of the audio stored at `path`.
pub fn probe_duration<P: AsRef<Path>>(path: P) -> anyhow::Result<f64> {
    Ok(decode_file(path)?.duration_secs())
}

fn decode_source(source: Box<dyn MediaSource>, hint: Hint) -> anyhow::Result<AudioBuffer> {
    let mss = MediaSourceStream::new(source, Default::default());
    let probed = symphonia::default::get_probe().format(
        &hint,
        mss,
        &FormatOptions::default(),
        &MetadataOptions::default(),
    )?;
    let mut format = probed.format;

    // First audio track with a known (decodeable) codec
    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| anyhow::anyhow!("No supported audio tracks found in input"))?;
    let track_id = track.id;
    let mut sample_rate = track.codec_params.sample_rate.unwrap_or(0);
    let mut channels = track
        .codec_params
        .channels
        .map(|c| c.count() as u16)
        .unwrap_or(0);

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| anyhow::anyhow!("Unsupported codec: {e}"))?;

    let mut samples: Vec<f32> = Vec::new();
    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                break
            }
            Err(SymphoniaError::ResetRequired) => break,
            Err(e) => return Err(e.into()),
        };

        if packet.track_id() != track_id {
            continue;
        }

        match decoder.decode(&packet) {
            Ok(decoded) => {
                let spec = *decoded.spec();
                sample_rate = spec.rate;
                channels = spec.channels.count() as u16;
                let mut buf = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
                buf.copy_interleaved_ref(decoded);
                samples.extend_from_slice(buf.samples());
            }
            Err(SymphoniaError::DecodeError(e)) => {
                debug!("Skipping undecodable packet: {e}");
            }
            Err(e) => return Err(e.into()),
        }
    }

    if sample_rate == 0 || channels == 0 {
        anyhow::bail!("audio stream has no sample rate or channel layout");
    }

    Ok(AudioBuffer::new(samples, sample_rate, channels))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encode_wav;

    #[test]
    fn test_decode_wav_bytes() {
        let original = AudioBuffer::new(vec![0.25; 16_000], 16_000, 2);
        let bytes = encode_wav(&original).unwrap();
        let decoded = decode_bytes(&bytes).unwrap();
        assert_eq!(decoded.sample_rate(), 16_000);
        assert_eq!(decoded.channels(), 2);
        assert!((decoded.duration_ms() - 500.0).abs() < 1.0);
    }

    #[test]
    fn test_decode_garbage_fails() {
        assert!(decode_bytes(b"definitely not audio").is_err());
        assert!(decode_bytes(&[]).is_err());
    }

    #[test]
    fn test_probe_duration_of_missing_file_fails() {
        assert!(probe_duration("/nonexistent/chime.mp3").is_err());
    }
}
