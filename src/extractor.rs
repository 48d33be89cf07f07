#![forbid(unsafe_code)]

//! Boundary to the extraction tool. The orchestrator only sees the
//! [`Extractor`] trait; [`YtDlp`] implements it by driving the `yt-dlp`
//! executable: `--dump-single-json` for metadata, and a regular download run
//! whose progress is read back through `--progress-template`.

use crate::policy::Postprocessor;
use crate::progress::{PROGRESS_TEMPLATE, ProgressEvent, parse_progress_line};
use serde::Deserialize;
use std::ffi::OsString;
use std::io::{self, BufRead, BufReader, Read};
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::sync::mpsc::{self, Sender};
use std::thread::{self, JoinHandle};
use thiserror::Error;
use tracing::{debug, trace, warn};

#[derive(Debug, Error)]
pub enum ExtractorError {
    #[error("could not run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("{}", failure_summary(.status, .stderr))]
    Failed { status: String, stderr: String },
    #[error("invalid metadata from yt-dlp: {0}")]
    InvalidJson(#[from] serde_json::Error),
}

impl ExtractorError {
    /// Standard error captured from the failed run, when there was any.
    pub fn stderr(&self) -> Option<&str> {
        match self {
            Self::Failed { stderr, .. } if !stderr.trim().is_empty() => Some(stderr),
            _ => None,
        }
    }
}

/// The last `ERROR:` line yt-dlp printed, or the exit status.
fn failure_summary(status: &str, stderr: &str) -> String {
    stderr
        .lines()
        .rev()
        .find_map(|line| line.trim().strip_prefix("ERROR:"))
        .map(|message| message.trim().to_string())
        .unwrap_or_else(|| format!("yt-dlp exited with {status}"))
}

/// How much metadata a probe should resolve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeDepth {
    /// Title/duration/entry count only. Playlists are not expanded.
    Summary,
    /// Full format list. For playlists only the first entry is resolved.
    Formats,
}

/// Subset of yt-dlp's `--dump-single-json` payload.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MediaInfo {
    pub title: Option<String>,
    pub duration_string: Option<String>,
    pub playlist_count: Option<u64>,
    #[serde(default)]
    pub formats: Option<Vec<FormatEntry>>,
    #[serde(default)]
    pub entries: Option<Vec<Option<MediaInfo>>>,
}

impl MediaInfo {
    /// Formats of the video itself, or of the first available playlist entry.
    pub fn available_formats(&self) -> &[FormatEntry] {
        if let Some(formats) = self.formats.as_deref()
            && !formats.is_empty()
        {
            return formats;
        }
        self.entries
            .iter()
            .flatten()
            .flatten()
            .find_map(|entry| entry.formats.as_deref())
            .unwrap_or(&[])
    }

    /// Entry count, counting entries when yt-dlp did not report one.
    pub fn entry_count(&self) -> Option<u64> {
        self.playlist_count
            .or_else(|| self.entries.as_ref().map(|entries| entries.len() as u64))
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FormatEntry {
    pub format_id: Option<String>,
    pub ext: Option<String>,
    pub resolution: Option<String>,
    pub format_note: Option<String>,
}

/// Everything a download run is configured with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadConfig {
    pub format: String,
    pub output_template: String,
    /// Directory the output template is resolved against.
    pub output_dir: PathBuf,
    /// Container used when separate video and audio streams get merged.
    pub merge_output_format: Option<&'static str>,
    pub ffmpeg_location: Option<PathBuf>,
    pub postprocessors: Vec<Postprocessor>,
    /// Extra ffmpeg arguments keyed by postprocessor name.
    pub postprocessor_args: Vec<(&'static str, Vec<String>)>,
    /// Skip failing playlist entries instead of aborting the run.
    pub ignore_errors: bool,
    /// `PATH` for the yt-dlp process, when it differs from ours.
    pub search_path: Option<OsString>,
}

impl Postprocessor {
    /// Name yt-dlp uses for this stage in `--postprocessor-args`.
    pub fn cli_name(&self) -> &'static str {
        match self {
            Postprocessor::VideoConvert { .. } => "VideoConvertor",
            Postprocessor::ExtractAudio { .. } => "ExtractAudio",
        }
    }
}

impl DownloadConfig {
    /// Command-line arguments for yt-dlp, without the URL.
    pub fn to_args(&self) -> Vec<OsString> {
        let mut args: Vec<OsString> = Vec::new();
        let mut push = |value: &str| args.push(OsString::from(value));

        push("--format");
        push(&self.format);
        push("--output");
        push(&self.output_template);

        if let Some(container) = self.merge_output_format {
            push("--merge-output-format");
            push(container);
        }

        for postprocessor in &self.postprocessors {
            match postprocessor {
                Postprocessor::VideoConvert { target } => {
                    push("--recode-video");
                    push(target);
                }
                Postprocessor::ExtractAudio { codec, quality } => {
                    push("--extract-audio");
                    push("--audio-format");
                    push(codec);
                    push("--audio-quality");
                    push(&format!("{quality}K"));
                }
            }
        }

        for (name, extra) in &self.postprocessor_args {
            push("--postprocessor-args");
            push(&format!("{name}:{}", extra.join(" ")));
        }

        if self.ignore_errors {
            push("--ignore-errors");
        } else {
            push("--abort-on-error");
        }

        push("--newline");
        push("--progress-template");
        push(PROGRESS_TEMPLATE);

        args.push(OsString::from("--paths"));
        args.push(self.output_dir.clone().into_os_string());

        if let Some(location) = &self.ffmpeg_location {
            args.push(OsString::from("--ffmpeg-location"));
            args.push(location.clone().into_os_string());
        }

        args
    }
}

pub trait Extractor {
    /// Resolves metadata for `url` without downloading anything.
    fn probe(
        &self,
        url: &str,
        is_playlist: bool,
        depth: ProbeDepth,
    ) -> Result<MediaInfo, ExtractorError>;

    /// Downloads `url`, forwarding progress events as they arrive.
    fn download(
        &self,
        url: &str,
        config: &DownloadConfig,
        progress: &mut dyn FnMut(&ProgressEvent),
    ) -> Result<(), ExtractorError>;
}

/// Drives the `yt-dlp` executable.
#[derive(Debug, Clone)]
pub struct YtDlp {
    program: PathBuf,
}

enum StreamLine {
    Stdout(String),
    Stderr(String),
}

impl YtDlp {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    fn command(&self) -> Command {
        let mut command = Command::new(&self.program);
        command.stdin(Stdio::null());
        command
    }

    fn program_name(&self) -> String {
        self.program.display().to_string()
    }

    fn spawn_error(&self) -> impl FnOnce(io::Error) -> ExtractorError + '_ {
        move |source| ExtractorError::Spawn {
            program: self.program_name(),
            source,
        }
    }

    /// Runs `yt-dlp --version`; used at startup to fail fast when it is missing.
    pub fn version(&self) -> Result<String, ExtractorError> {
        let output = self
            .command()
            .arg("--version")
            .output()
            .map_err(self.spawn_error())?;
        if !output.status.success() {
            return Err(ExtractorError::Failed {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

impl Extractor for YtDlp {
    fn probe(
        &self,
        url: &str,
        is_playlist: bool,
        depth: ProbeDepth,
    ) -> Result<MediaInfo, ExtractorError> {
        let mut command = self.command();
        command
            .arg("--dump-single-json")
            .arg("--skip-download")
            .arg("--no-warnings");
        if is_playlist {
            match depth {
                ProbeDepth::Summary => {
                    command.arg("--flat-playlist");
                }
                ProbeDepth::Formats => {
                    command.arg("--playlist-items").arg("1");
                }
            }
        }
        command.arg(url);

        debug!(?command, "probing metadata");
        let output = command.output().map_err(self.spawn_error())?;
        if !output.status.success() {
            return Err(ExtractorError::Failed {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }
        Ok(serde_json::from_slice(&output.stdout)?)
    }

    fn download(
        &self,
        url: &str,
        config: &DownloadConfig,
        progress: &mut dyn FnMut(&ProgressEvent),
    ) -> Result<(), ExtractorError> {
        let mut command = self.command();
        command
            .args(config.to_args())
            .arg(url)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(path) = &config.search_path {
            command.env("PATH", path);
        }

        debug!(?command, "starting download");
        let mut child = command.spawn().map_err(self.spawn_error())?;

        // Both pipes are drained on their own threads so neither can fill up
        // and stall yt-dlp; the sink itself only runs on this thread.
        let (tx, rx) = mpsc::channel();
        let mut readers = Vec::new();
        if let Some(stdout) = child.stdout.take() {
            let tx = tx.clone();
            readers.push(thread::spawn(move || {
                forward_lines(stdout, &tx, StreamLine::Stdout)
            }));
        }
        if let Some(stderr) = child.stderr.take() {
            let tx = tx.clone();
            readers.push(thread::spawn(move || {
                forward_lines(stderr, &tx, StreamLine::Stderr)
            }));
        }
        drop(tx);

        let mut stderr_text = String::new();
        for line in rx {
            match line {
                StreamLine::Stdout(line) => match parse_progress_line(&line) {
                    Some(event) => progress(&event),
                    None => trace!(%line, "yt-dlp"),
                },
                StreamLine::Stderr(line) => {
                    if let Some(message) = line.trim().strip_prefix("ERROR:") {
                        progress(&ProgressEvent::error(message.trim()));
                    }
                    stderr_text.push_str(&line);
                    stderr_text.push('\n');
                }
            }
        }
        join_readers(readers);

        let status = child.wait().map_err(self.spawn_error())?;
        if status.success() {
            return Ok(());
        }
        // With --ignore-errors yt-dlp still exits non-zero when an entry was
        // skipped; the skipped entries were already reported as events.
        if config.ignore_errors && status.code() == Some(1) {
            warn!(%status, "yt-dlp skipped some playlist entries");
            return Ok(());
        }
        Err(ExtractorError::Failed {
            status: status.to_string(),
            stderr: stderr_text,
        })
    }
}

/// Waits for the pipe readers. Returns how many of them panicked; their
/// remaining output is lost.
fn join_readers(readers: Vec<JoinHandle<()>>) -> usize {
    let mut panicked = 0;
    for reader in readers {
        if reader.join().is_err() {
            warn!("yt-dlp output reader panicked; some output lines were lost");
            panicked += 1;
        }
    }
    panicked
}

fn forward_lines(
    stream: impl Read,
    tx: &Sender<StreamLine>,
    wrap: fn(String) -> StreamLine,
) {
    let mut reader = BufReader::new(stream);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf) {
            Ok(0) | Err(_) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf)
                    .trim_end_matches(['\r', '\n'])
                    .to_string();
                if tx.send(wrap(line)).is_err() {
                    break;
                }
            }
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn audio_extraction_maps_to_cli_flags() {
        let config = DownloadConfig {
            format: "bestaudio/best".into(),
            output_template: "%(title)s.%(ext)s".into(),
            output_dir: PathBuf::from("."),
            merge_output_format: None,
            ffmpeg_location: Some(PathBuf::from("/opt/ff/ffmpeg")),
            postprocessors: vec![Postprocessor::ExtractAudio {
                codec: "mp3",
                quality: "192",
            }],
            postprocessor_args: Vec::new(),
            ignore_errors: false,
            search_path: None,
        };
        let args: Vec<String> = config
            .to_args()
            .into_iter()
            .map(|arg| arg.to_string_lossy().into_owned())
            .collect();

        assert!(args.windows(2).any(|w| w == ["--format", "bestaudio/best"]));
        assert!(args.contains(&"--extract-audio".to_string()));
        assert!(args.windows(2).any(|w| w == ["--audio-format", "mp3"]));
        assert!(args.windows(2).any(|w| w == ["--audio-quality", "192K"]));
        assert!(args.windows(2).any(|w| w == ["--ffmpeg-location", "/opt/ff/ffmpeg"]));
        assert!(!args.contains(&"--merge-output-format".to_string()));
    }

    #[test]
    fn video_conversion_carries_postprocessor_args() {
        let config = DownloadConfig {
            format: "best".into(),
            output_template: "Mix/%(playlist_index)s - %(title)s.%(ext)s".into(),
            output_dir: PathBuf::from("/out"),
            merge_output_format: Some("mp4"),
            ffmpeg_location: None,
            postprocessors: vec![Postprocessor::VideoConvert { target: "mp4" }],
            postprocessor_args: vec![(
                "VideoConvertor",
                vec!["-c:v".into(), "copy".into(), "-c:a".into(), "aac".into()],
            )],
            ignore_errors: true,
            search_path: None,
        };
        let args: Vec<String> = config
            .to_args()
            .into_iter()
            .map(|arg| arg.to_string_lossy().into_owned())
            .collect();

        assert!(args.windows(2).any(|w| w == ["--merge-output-format", "mp4"]));
        assert!(args.windows(2).any(|w| w == ["--recode-video", "mp4"]));
        assert!(args.windows(2).any(|w| w
            == ["--postprocessor-args", "VideoConvertor:-c:v copy -c:a aac"]));
        assert!(args.contains(&"--ignore-errors".to_string()));
        assert!(!args.contains(&"--ffmpeg-location".to_string()));
        assert!(args.windows(2).any(|w| w == ["--paths", "/out"]));
    }

    #[test]
    fn panicked_readers_are_counted() {
        let failing: JoinHandle<()> = thread::spawn(|| panic!("reader failed"));
        let readers = vec![thread::spawn(|| {}), failing];
        assert_eq!(join_readers(readers), 1);
        assert_eq!(join_readers(Vec::new()), 0);
    }

    #[test]
    fn failure_summary_prefers_last_error_line() {
        assert_eq!(
            failure_summary("exit status: 1", "WARNING: x\nERROR: first\nERROR: second\n"),
            "second"
        );
        assert_eq!(
            failure_summary("exit status: 2", "something odd"),
            "yt-dlp exited with exit status: 2"
        );
    }

    #[test]
    fn empty_stderr_is_not_reported() {
        let err = ExtractorError::Failed {
            status: "exit status: 1".into(),
            stderr: "  \n".into(),
        };
        assert!(err.stderr().is_none());
    }

    #[test]
    fn media_info_tolerates_missing_fields() -> anyhow::Result<()> {
        let info: MediaInfo = serde_json::from_str(r#"{"entries": null, "formats": null}"#)?;
        assert!(info.title.is_none());
        assert!(info.available_formats().is_empty());
        assert_eq!(info.entry_count(), None);
        Ok(())
    }
}
