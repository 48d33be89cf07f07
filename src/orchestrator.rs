#![forbid(unsafe_code)]

//! Turns a quality + policy choice into one download run: ffmpeg fallback,
//! configuration, metadata summary, confirmation, download, failure hints.

use crate::console::Console;
use crate::extractor::{DownloadConfig, Extractor, ProbeDepth};
use crate::locator::{BinaryLocation, Toolchain};
use crate::policy::{FALLBACK_POLICY, PolicySpec};
use crate::progress::ProgressEvent;
use crate::quality::QualitySelector;
use anyhow::Result;
use std::fs;
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use tracing::debug;

pub const SINGLE_TEMPLATE: &str = "%(title)s.%(ext)s";
pub const PLAYLIST_ENTRY_TEMPLATE: &str = "%(playlist_index)s - %(title)s.%(ext)s";
const ILLEGAL_PATH_CHARS: &[char] = &['\\', '/', ':', '*', '?', '"', '<', '>', '|'];
const DEFAULT_PLAYLIST_FOLDER: &str = "Playlist";
const FFMPEG_UNREACHABLE: &str = "ffmpeg is not installed";
const CONVERSION_FAILED: &str = "Postprocessing: Conversion failed!";

#[derive(Debug, Clone)]
pub struct DownloadJob {
    pub url: String,
    pub quality: QualitySelector,
    pub policy: &'static PolicySpec,
    pub is_playlist: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    Completed,
    /// The user did not confirm; nothing was downloaded.
    Declined,
    Failed,
}

pub fn is_playlist_url(url: &str) -> bool {
    url.contains("list=") || url.contains("playlist")
}

/// Removes characters that are not allowed in file names on Windows.
pub fn sanitize_title(title: &str) -> String {
    title
        .chars()
        .filter(|c| !ILLEGAL_PATH_CHARS.contains(c))
        .collect()
}

/// Names made only of dots would point at the output dir or its parent.
fn playlist_folder_name(title: Option<&str>) -> String {
    let sanitized = sanitize_title(title.unwrap_or(DEFAULT_PLAYLIST_FOLDER));
    if sanitized.trim().trim_matches('.').is_empty() {
        DEFAULT_PLAYLIST_FOLDER.to_string()
    } else {
        sanitized
    }
}

/// Output template for a playlist entry inside `folder`. `%` is doubled so
/// yt-dlp does not read the folder name as a template field.
pub fn playlist_template(folder: &str) -> String {
    format!("{}/{PLAYLIST_ENTRY_TEMPLATE}", folder.replace('%', "%%"))
}

/// Configuration for a single-video run. Playlists adjust the template and
/// error handling afterwards.
pub fn build_config(
    policy: &PolicySpec,
    quality: &QualitySelector,
    location: &BinaryLocation,
    output_dir: &Path,
) -> DownloadConfig {
    let format = policy
        .format_override
        .map(str::to_string)
        .unwrap_or_else(|| quality.selector.clone());
    let postprocessors: Vec<_> = policy.postprocessor.into_iter().collect();
    let postprocessor_args = match policy.postprocessor {
        Some(postprocessor) if !policy.postprocessor_args.is_empty() => vec![(
            postprocessor.cli_name(),
            policy
                .postprocessor_args
                .iter()
                .map(|arg| arg.to_string())
                .collect(),
        )],
        _ => Vec::new(),
    };

    DownloadConfig {
        format,
        output_template: SINGLE_TEMPLATE.to_string(),
        output_dir: output_dir.to_path_buf(),
        merge_output_format: (policy.ext == "mp4").then_some("mp4"),
        ffmpeg_location: if policy.requires_ffmpeg {
            location.explicit_path().map(Path::to_path_buf)
        } else {
            None
        },
        postprocessors,
        postprocessor_args,
        ignore_errors: false,
        search_path: location.child_search_path(),
    }
}

/// Runs one job end to end. Every failure is printed and reported as
/// [`JobOutcome::Failed`]; only console I/O errors are returned.
pub fn run<R: BufRead, W: Write>(
    console: &mut Console<R, W>,
    extractor: &dyn Extractor,
    toolchain: &mut Toolchain,
    output_dir: &Path,
    job: &DownloadJob,
    progress: &mut dyn FnMut(&ProgressEvent),
) -> Result<JobOutcome> {
    let mut policy = job.policy;
    if policy.requires_ffmpeg && !toolchain.ensure_ffmpeg(console)? {
        console.blank()?;
        console.say("Using a fallback format that does not need ffmpeg.")?;
        policy = &FALLBACK_POLICY;
    }

    let mut config = build_config(policy, &job.quality, &toolchain.location, output_dir);

    let info = match extractor.probe(&job.url, job.is_playlist, ProbeDepth::Summary) {
        Ok(info) => info,
        Err(err) => {
            console.blank()?;
            console.say(format!("Could not read video information: {err}"))?;
            return Ok(JobOutcome::Failed);
        }
    };

    console.blank()?;
    if job.is_playlist {
        let folder_name = playlist_folder_name(info.title.as_deref());
        let folder: PathBuf = output_dir.join(&folder_name);
        if let Err(err) = fs::create_dir_all(&folder) {
            console.say(format!(
                "Could not create the folder '{}': {err}",
                folder.display()
            ))?;
            return Ok(JobOutcome::Failed);
        }
        config.output_template = playlist_template(&folder_name);
        config.ignore_errors = true;

        console.say("Playlist information:")?;
        console.say(format!("Title: {folder_name}"))?;
        let count = info
            .entry_count()
            .map(|count| count.to_string())
            .unwrap_or_else(|| "?".to_string());
        console.say(format!("Videos in playlist: {count}"))?;
    } else {
        console.say("Video information:")?;
        console.say(format!(
            "Title: {}",
            info.title.as_deref().unwrap_or("Unknown")
        ))?;
        console.say(format!(
            "Duration: {}",
            info.duration_string.as_deref().unwrap_or("?")
        ))?;
    }
    console.say(format!("Final format: {}", policy.ext.to_uppercase()))?;
    console.say(format!("Selected resolution: {}", job.quality.label))?;

    console.blank()?;
    let answer = console.prompt("Confirm download? (y/n): ")?;
    if !answer.is_some_and(|answer| answer.trim().eq_ignore_ascii_case("y")) {
        return Ok(JobOutcome::Declined);
    }

    console.blank()?;
    console.say("Starting download...")?;
    debug!(?config, url = %job.url, "download configuration");
    match extractor.download(&job.url, &config, progress) {
        Ok(()) => {
            console.blank()?;
            console.say("Download completed successfully!")?;
            Ok(JobOutcome::Completed)
        }
        Err(err) => {
            console.blank()?;
            console.say(format!("Download failed: {err}"))?;

            let detail = format!("{err}\n{}", err.stderr().unwrap_or_default());
            if detail.contains(FFMPEG_UNREACHABLE) {
                console.say(
                    "ffmpeg is installed but could not be reached. Try restarting your terminal or shell.",
                )?;
            } else if detail.contains(CONVERSION_FAILED) {
                console.blank()?;
                console.say("Suggestions for the conversion error:")?;
                console.say("1. Try another MP4 method (options 1, 2 or 3)")?;
                console.say("2. Try a lower quality (720p or 480p)")?;
                console.say("3. Check that your ffmpeg build is complete:")?;
                console.say("   - download a full static build from https://ffmpeg.org/download.html")?;
                console.say("   - replace your current installation")?;
                if let Some(stderr) = err.stderr() {
                    console.blank()?;
                    console.say("Detailed ffmpeg error:")?;
                    console.say(stderr.trim_end())?;
                }
            }
            Ok(JobOutcome::Failed)
        }
    }
}
