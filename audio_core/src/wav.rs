use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};

use anyhow::Context;

use crate::AudioBuffer;

fn spec_for(buffer: &AudioBuffer) -> hound::WavSpec {
    hound::WavSpec {
        channels: buffer.channels(),
        sample_rate: buffer.sample_rate(),
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    }
}

fn write_samples<W>(writer: &mut hound::WavWriter<W>, buffer: &AudioBuffer) -> anyhow::Result<()>
where
    W: std::io::Write + std::io::Seek,
{
    const I16_MAX_F32: f32 = i16::MAX as f32;
    for &s in buffer.samples() {
        // Clamp and convert f32 [-1.0, 1.0] -> i16
        let v = (s.clamp(-1.0, 1.0) * I16_MAX_F32) as i16;
        writer
            .write_sample(v)
            .map_err(|e| anyhow::anyhow!("wav sample err: {e}"))?;
    }
    Ok(())
}

/// Encode a buffer as 16-bit PCM WAV (RIFF) bytes.
pub fn encode_wav(buffer: &AudioBuffer) -> anyhow::Result<Vec<u8>> {
    // WAV header (44 bytes) + 2 bytes per sample
    let estimated_size = 44 + buffer.samples().len() * 2;
    let mut cursor = Cursor::new(Vec::<u8>::with_capacity(estimated_size));
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec_for(buffer))
            .map_err(|e| anyhow::anyhow!("wav write err: {e}"))?;
        write_samples(&mut writer, buffer)?;
        writer
            .finalize()
            .map_err(|e| anyhow::anyhow!("wav finalize err: {e}"))?;
    }
    Ok(cursor.into_inner())
}

/// Write a buffer to `path` as WAV, creating parent directories.
pub fn write_wav<P: AsRef<Path>>(buffer: &AudioBuffer, path: P) -> anyhow::Result<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let mut writer = hound::WavWriter::create(path, spec_for(buffer))
        .with_context(|| format!("Failed to create {}", path.display()))?;
    write_samples(&mut writer, buffer)?;
    writer
        .finalize()
        .with_context(|| format!("Failed to finalize {}", path.display()))?;
    Ok(())
}

/// Save a buffer as `<folder>/<stem>.wav` and return the full path.
pub fn save_to_folder<P: AsRef<Path>>(
    buffer: &AudioBuffer,
    folder: P,
    stem: &str,
) -> anyhow::Result<PathBuf> {
    let path = folder.as_ref().join(format!("{stem}.wav"));
    write_wav(buffer, &path)?;
    Ok(path)
}
