//! The interactive loop: URL prompt, quality and format menus, then one
//! orchestrated download per URL until the user leaves.

use crate::console::Console;
use crate::extractor::{Extractor, ExtractorError};
use crate::locator::Toolchain;
use crate::orchestrator::{self, DownloadJob, is_playlist_url};
use crate::progress::{ProgressEvent, ProgressReporter};
use crate::{policy, quality};
use anyhow::Result;
use std::io::{BufRead, Write};
use std::path::Path;
use tracing::debug;

const EXIT_WORDS: [&str; 3] = ["exit", "quit", "salir"];

pub fn print_banner<R: BufRead, W: Write>(console: &mut Console<R, W>) -> Result<()> {
    console.say("===================================")?;
    console.say("tubegrab - video & playlist downloader")?;
    console.say("===================================")
}

/// Reports the outcome of `yt-dlp --version`. Returns false when yt-dlp is
/// unusable; nothing else can work without it.
pub fn check_extractor<R: BufRead, W: Write>(
    console: &mut Console<R, W>,
    version: Result<String, ExtractorError>,
) -> Result<bool> {
    match version {
        Ok(version) => {
            console.say(format!("yt-dlp version: {version}"))?;
            Ok(true)
        }
        Err(err) => {
            debug!(error = %err, "yt-dlp check failed");
            console.say("yt-dlp is not installed or could not be started.")?;
            console.say("Install it with: pip install yt-dlp")?;
            console.say("or download it from https://github.com/yt-dlp/yt-dlp#installation")?;
            Ok(false)
        }
    }
}

/// Startup ffmpeg probe. A miss is only a warning; the installer runs later,
/// when a format actually needs ffmpeg.
pub fn report_ffmpeg<R: BufRead, W: Write>(
    console: &mut Console<R, W>,
    toolchain: &mut Toolchain,
) -> Result<()> {
    match toolchain.resolve() {
        Some(path) => console.say(format!("ffmpeg found at: {}", path.display())),
        None => console.say(
            "Warning: ffmpeg was not found. Some formats may be unavailable until it is installed.",
        ),
    }
}

fn is_exit_word(input: &str) -> bool {
    EXIT_WORDS
        .iter()
        .any(|word| input.eq_ignore_ascii_case(word))
}

/// Runs until the user types an exit word, an empty line, or input ends.
pub fn run<R: BufRead, W: Write, P: Write>(
    console: &mut Console<R, W>,
    extractor: &dyn Extractor,
    toolchain: &mut Toolchain,
    output_dir: &Path,
    progress: &mut ProgressReporter<P>,
) -> Result<()> {
    loop {
        console.blank()?;
        let Some(input) = console.prompt("Enter a video or playlist URL (or 'exit' to quit): ")?
        else {
            break;
        };
        let url = input.trim();
        if url.is_empty() || is_exit_word(url) {
            break;
        }

        let is_playlist = is_playlist_url(url);
        if is_playlist {
            console.blank()?;
            console.say("Playlist detected. Every video in it will be downloaded.")?;
        }

        let Some(quality) = quality::select(console, extractor, url, is_playlist)? else {
            continue;
        };
        let Some(policy) = policy::select(console)? else {
            continue;
        };

        console.blank()?;
        console.say("Selected configuration:")?;
        console.say(format!(
            "- Type: {}",
            if is_playlist { "playlist" } else { "single video" }
        ))?;
        console.say(format!("- Resolution: {}", quality.label))?;
        console.say(format!("- Format: {}", policy.ext.to_uppercase()))?;
        if policy.requires_ffmpeg
            && let Some(path) = toolchain.location.path()
        {
            let origin = if toolchain.location.is_installed() {
                " (installed this session)"
            } else {
                ""
            };
            console.say(format!("- ffmpeg: {}{origin}", path.display()))?;
        }

        let job = DownloadJob {
            url: url.to_string(),
            quality,
            policy,
            is_playlist,
        };
        let outcome = orchestrator::run(
            console,
            extractor,
            toolchain,
            output_dir,
            &job,
            &mut |event: &ProgressEvent| progress.report(event),
        )?;
        debug!(?outcome, url = %job.url, "job finished");
    }

    console.blank()?;
    console.say("Goodbye!")
}
