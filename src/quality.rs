//! Resolution presets and the quality menu.

use crate::console::{Console, menu_number};
use crate::extractor::{Extractor, FormatEntry, ProbeDepth};
use anyhow::Result;
use std::io::{BufRead, Write};

/// A yt-dlp format selector plus the label shown back to the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QualitySelector {
    pub label: String,
    pub selector: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QualityPreset {
    Best,
    Upto1080,
    Upto720,
    Upto480,
    Upto360,
}

impl QualityPreset {
    pub const ALL: [QualityPreset; 5] = [
        QualityPreset::Best,
        QualityPreset::Upto1080,
        QualityPreset::Upto720,
        QualityPreset::Upto480,
        QualityPreset::Upto360,
    ];

    pub fn label(self) -> &'static str {
        match self {
            QualityPreset::Best => "Best available quality",
            QualityPreset::Upto1080 => "1080p",
            QualityPreset::Upto720 => "720p HD",
            QualityPreset::Upto480 => "480p",
            QualityPreset::Upto360 => "360p",
        }
    }

    /// MP4 video + M4A audio capped at the preset height, then a single MP4
    /// file under the cap, then anything.
    pub fn selector(self) -> String {
        match self.max_height() {
            None => "bestvideo[ext=mp4]+bestaudio[ext=m4a]/best[ext=mp4]/best".to_string(),
            Some(height) => format!(
                "bestvideo[height<={height}][ext=mp4]+bestaudio[ext=m4a]/best[height<={height}][ext=mp4]/best"
            ),
        }
    }

    fn max_height(self) -> Option<u32> {
        match self {
            QualityPreset::Best => None,
            QualityPreset::Upto1080 => Some(1080),
            QualityPreset::Upto720 => Some(720),
            QualityPreset::Upto480 => Some(480),
            QualityPreset::Upto360 => Some(360),
        }
    }

    pub fn to_selector(self) -> QualitySelector {
        QualitySelector {
            label: self.label().to_string(),
            selector: self.selector(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QualityChoice {
    Preset(QualityPreset),
    ListFormats,
    Back,
}

impl QualityChoice {
    pub fn from_menu(input: &str) -> Option<Self> {
        match input.trim() {
            "0" => Some(QualityChoice::Back),
            "6" => Some(QualityChoice::ListFormats),
            other => {
                let index = menu_number(other)?;
                index
                    .checked_sub(1)
                    .and_then(|index| QualityPreset::ALL.get(index))
                    .map(|preset| QualityChoice::Preset(*preset))
            }
        }
    }
}

fn show_menu<R: BufRead, W: Write>(console: &mut Console<R, W>) -> Result<()> {
    console.blank()?;
    console.say("Quality options:")?;
    for (number, preset) in QualityPreset::ALL.iter().enumerate() {
        console.say(format!("{} - {}", number + 1, preset.label()))?;
    }
    console.say("6 - List all available formats")?;
    console.say("0 - Back to the main menu")
}

/// Loops until a preset or a listed format id is chosen. `None` when the user
/// goes back or input ends.
pub fn select<R: BufRead, W: Write>(
    console: &mut Console<R, W>,
    extractor: &dyn Extractor,
    url: &str,
    is_playlist: bool,
) -> Result<Option<QualitySelector>> {
    loop {
        show_menu(console)?;
        let Some(answer) = console.prompt("Choose an option: ")? else {
            return Ok(None);
        };

        match QualityChoice::from_menu(&answer) {
            Some(QualityChoice::Preset(preset)) => return Ok(Some(preset.to_selector())),
            Some(QualityChoice::Back) => return Ok(None),
            Some(QualityChoice::ListFormats) => {
                if let Some(selected) = list_formats(console, extractor, url, is_playlist)? {
                    return Ok(Some(selected));
                }
            }
            None => console.say("Invalid option. Please try again.")?,
        }
    }
}

/// Prints every format of the video (first entry for playlists) and offers to
/// use one of the listed ids directly.
fn list_formats<R: BufRead, W: Write>(
    console: &mut Console<R, W>,
    extractor: &dyn Extractor,
    url: &str,
    is_playlist: bool,
) -> Result<Option<QualitySelector>> {
    let info = match extractor.probe(url, is_playlist, ProbeDepth::Formats) {
        Ok(info) => info,
        Err(err) => {
            console.say(format!("Could not fetch formats: {err}"))?;
            return Ok(None);
        }
    };

    let formats = info.available_formats();
    console.blank()?;
    console.say("Available formats:")?;
    for format in formats {
        console.say(format_line(format))?;
    }

    let Some(answer) = console.prompt("Format ID to use (Enter to return to the menu): ")? else {
        return Ok(None);
    };
    let wanted = answer.trim();
    if wanted.is_empty() {
        return Ok(None);
    }
    if formats
        .iter()
        .any(|format| format.format_id.as_deref() == Some(wanted))
    {
        return Ok(Some(QualitySelector {
            label: format!("format {wanted}"),
            selector: wanted.to_string(),
        }));
    }
    console.say(format!("Format {wanted} is not in the list."))?;
    Ok(None)
}

fn format_line(format: &FormatEntry) -> String {
    format!(
        "{}: {} {} {}",
        format.format_id.as_deref().unwrap_or("?"),
        format.ext.as_deref().unwrap_or("?"),
        format.resolution.as_deref().unwrap_or("?"),
        format.format_note.as_deref().unwrap_or(""),
    )
    .trim_end()
    .to_string()
}
