//! Interactive video and playlist downloader built on yt-dlp and ffmpeg.

pub mod config;
pub mod console;
pub mod extractor;
pub mod installer;
pub mod locator;
pub mod orchestrator;
pub mod policy;
pub mod progress;
pub mod quality;
pub mod session;
