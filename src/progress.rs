//! Download progress events and the terminal renderer for them.

use std::io::Write;

/// Marker prefixed to every progress line yt-dlp prints for us.
pub const PROGRESS_MARKER: &str = "[tubegrab-progress]";

/// Template handed to `--progress-template`; fields are `|`-separated and
/// missing values come back as `NA`.
pub const PROGRESS_TEMPLATE: &str = "download:[tubegrab-progress]|%(progress.status)s|%(progress._percent_str)s|%(progress._speed_str)s|%(progress._eta_str)s|%(info.playlist_index)s|%(info.playlist_count)s";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressStatus {
    Downloading,
    Finished,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressEvent {
    pub status: ProgressStatus,
    pub percent: Option<String>,
    pub speed: Option<String>,
    pub eta: Option<String>,
    pub playlist_index: Option<u64>,
    pub playlist_count: Option<u64>,
    pub error: Option<String>,
}

impl ProgressEvent {
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            status: ProgressStatus::Error,
            percent: None,
            speed: None,
            eta: None,
            playlist_index: None,
            playlist_count: None,
            error: Some(message.into()),
        }
    }
}

/// Parses one line of yt-dlp stdout. Lines without the marker, and statuses
/// other than downloading/finished, yield `None`.
pub fn parse_progress_line(line: &str) -> Option<ProgressEvent> {
    let rest = line.trim().strip_prefix(PROGRESS_MARKER)?;
    let mut fields = rest.strip_prefix('|')?.split('|').map(present);

    let status = match fields.next()?? {
        "downloading" => ProgressStatus::Downloading,
        "finished" => ProgressStatus::Finished,
        "error" => ProgressStatus::Error,
        _ => return None,
    };
    let percent = fields.next().flatten().map(str::to_string);
    let speed = fields.next().flatten().map(str::to_string);
    let eta = fields.next().flatten().map(str::to_string);
    let playlist_index = fields.next().flatten().and_then(|v| v.parse().ok());
    let playlist_count = fields.next().flatten().and_then(|v| v.parse().ok());

    Some(ProgressEvent {
        status,
        percent,
        speed,
        eta,
        playlist_index,
        playlist_count,
        error: None,
    })
}

fn present(field: &str) -> Option<&str> {
    let trimmed = field.trim();
    if trimmed.is_empty() || trimmed == "NA" {
        None
    } else {
        Some(trimmed)
    }
}

/// Renders events as a single self-overwriting status line.
pub struct ProgressReporter<W> {
    out: W,
}

impl<W: Write> ProgressReporter<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    /// Write failures are ignored: losing a progress line must not abort a
    /// download that is already running.
    pub fn report(&mut self, event: &ProgressEvent) {
        let _ = self.render(event);
    }

    fn render(&mut self, event: &ProgressEvent) -> std::io::Result<()> {
        match event.status {
            ProgressStatus::Downloading => {
                let percent = event.percent.as_deref().unwrap_or("??%");
                let speed = event.speed.as_deref().unwrap_or("? KiB/s");
                let eta = event.eta.as_deref().unwrap_or("??:??");
                match event.playlist_index {
                    Some(index) => {
                        let count = event
                            .playlist_count
                            .map(|count| count.to_string())
                            .unwrap_or_else(|| "?".to_string());
                        write!(
                            self.out,
                            "\rPlaylist {index}/{count} - {percent} at {speed} | ETA: {eta}"
                        )?;
                    }
                    None => {
                        write!(self.out, "\rDownloading: {percent} at {speed} | ETA: {eta}")?;
                    }
                }
            }
            ProgressStatus::Finished => {
                writeln!(self.out, "\nDownload finished, post-processing...")?;
            }
            ProgressStatus::Error => {
                let message = event.error.as_deref().unwrap_or("unknown");
                writeln!(self.out, "\nError: {message}")?;
            }
        }
        self.out.flush()
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rendered(events: &[ProgressEvent]) -> String {
        let mut reporter = ProgressReporter::new(Vec::new());
        for event in events {
            reporter.report(event);
        }
        String::from_utf8(reporter.into_inner()).unwrap()
    }

    #[test]
    fn parses_single_video_line() {
        let event = parse_progress_line(
            "[tubegrab-progress]|downloading|  42.0%|   1.21MiB/s|00:13|NA|NA",
        )
        .unwrap();
        assert_eq!(event.status, ProgressStatus::Downloading);
        assert_eq!(event.percent.as_deref(), Some("42.0%"));
        assert_eq!(event.speed.as_deref(), Some("1.21MiB/s"));
        assert_eq!(event.eta.as_deref(), Some("00:13"));
        assert_eq!(event.playlist_index, None);
        assert_eq!(event.playlist_count, None);
    }

    #[test]
    fn parses_playlist_fields_and_finished_status() {
        let event =
            parse_progress_line("[tubegrab-progress]|finished|100%|NA|NA|3|12").unwrap();
        assert_eq!(event.status, ProgressStatus::Finished);
        assert_eq!(event.playlist_index, Some(3));
        assert_eq!(event.playlist_count, Some(12));
        assert_eq!(event.speed, None);
    }

    #[test]
    fn ignores_unrelated_lines() {
        assert!(parse_progress_line("[youtube] abc123: Downloading webpage").is_none());
        assert!(parse_progress_line("[tubegrab-progress]|weird|1%|a|b|c|d").is_none());
        assert!(parse_progress_line("").is_none());
    }

    #[test]
    fn downloading_overwrites_the_line() {
        let event = parse_progress_line("[tubegrab-progress]|downloading|5.0%|1KiB/s|01:00|NA|NA")
            .unwrap();
        assert_eq!(
            rendered(&[event]),
            "\rDownloading: 5.0% at 1KiB/s | ETA: 01:00"
        );
    }

    #[test]
    fn missing_values_use_placeholders() {
        let event = ProgressEvent {
            status: ProgressStatus::Downloading,
            percent: None,
            speed: None,
            eta: None,
            playlist_index: Some(2),
            playlist_count: None,
            error: None,
        };
        assert_eq!(
            rendered(&[event]),
            "\rPlaylist 2/? - ??% at ? KiB/s | ETA: ??:??"
        );
    }

    #[test]
    fn finished_and_error_end_the_line() {
        let finished = parse_progress_line("[tubegrab-progress]|finished|100%|NA|NA|NA|NA").unwrap();
        let out = rendered(&[finished, ProgressEvent::error("HTTP Error 403")]);
        assert_eq!(
            out,
            "\nDownload finished, post-processing...\n\nError: HTTP Error 403\n"
        );
    }
}
