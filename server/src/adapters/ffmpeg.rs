use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use async_trait::async_trait;
use chime_core::AudioConverter;
use tracing::debug;

/// Runs `ffmpeg -i <input> <args> <output>`; output is an mp3 next to the
/// other files of `output_dir`.
#[derive(Debug, Clone)]
pub struct FfmpegConverter {
    bin: String,
}

impl FfmpegConverter {
    pub fn new<S: Into<String>>(bin: S) -> Self {
        Self { bin: bin.into() }
    }
}

pub(crate) fn output_path(input: &Path, output_dir: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("audio");
    output_dir.join(format!("{stem}_converted.mp3"))
}

#[async_trait]
impl AudioConverter for FfmpegConverter {
    async fn convert(&self, input: &Path, args: &str, output_dir: &Path) -> anyhow::Result<PathBuf> {
        let output = output_path(input, output_dir);
        debug!("ffmpeg {} -> {}", args, output.display());

        let result = tokio::process::Command::new(&self.bin)
            .arg("-i")
            .arg(input)
            .args(args.split_whitespace())
            .arg(&output)
            .output()
            .await
            .with_context(|| format!("failed to run {}", self.bin))?;

        if !result.status.success() {
            bail!(
                "{} failed on {}: {}",
                self.bin,
                input.display(),
                String::from_utf8_lossy(&result.stderr).trim()
            );
        }
        Ok(output)
    }
}
