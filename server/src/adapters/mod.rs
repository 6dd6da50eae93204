//! Concrete capabilities used by the standalone server.

pub mod ffmpeg;
pub mod player;
pub mod tts;

pub use ffmpeg::FfmpegConverter;
pub use player::CommandPlaybackSink;
pub use tts::HttpTtsEngine;
