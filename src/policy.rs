//! Output container/codec policies. Each menu entry is a row in a static
//! table; nothing here branches on the choice.

use crate::console::{Console, menu_number};
use anyhow::Result;
use std::io::{BufRead, Write};

/// Postprocessing stage run by yt-dlp (through ffmpeg) after the download.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Postprocessor {
    /// Re-encode/remux into `target`.
    VideoConvert { target: &'static str },
    /// Drop the video stream and encode audio as `codec` at `quality` kbps.
    ExtractAudio {
        codec: &'static str,
        quality: &'static str,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PolicySpec {
    pub label: &'static str,
    pub ext: &'static str,
    pub requires_ffmpeg: bool,
    /// Replaces the quality selection when set.
    pub format_override: Option<&'static str>,
    pub postprocessor: Option<Postprocessor>,
    /// Extra ffmpeg arguments for the postprocessor.
    pub postprocessor_args: &'static [&'static str],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatPolicy {
    AacMp4,
    Mp3Mp4,
    CopyMp4,
    Mp3Audio,
    RawMp4,
}

const VIDEO_TO_MP4: Option<Postprocessor> = Some(Postprocessor::VideoConvert { target: "mp4" });

static POLICIES: [PolicySpec; 5] = [
    PolicySpec {
        label: "MP4 (method 1 - AAC audio)",
        ext: "mp4",
        requires_ffmpeg: true,
        format_override: None,
        postprocessor: VIDEO_TO_MP4,
        postprocessor_args: &["-c:v", "copy", "-c:a", "aac", "-strict", "experimental"],
    },
    PolicySpec {
        label: "MP4 (method 2 - MP3 audio)",
        ext: "mp4",
        requires_ffmpeg: true,
        format_override: None,
        postprocessor: VIDEO_TO_MP4,
        postprocessor_args: &["-c:v", "copy", "-c:a", "libmp3lame", "-q:a", "4"],
    },
    PolicySpec {
        label: "MP4 (method 3 - stream copy only)",
        ext: "mp4",
        requires_ffmpeg: true,
        format_override: None,
        postprocessor: VIDEO_TO_MP4,
        postprocessor_args: &["-c", "copy"],
    },
    PolicySpec {
        label: "Audio only (MP3)",
        ext: "mp3",
        requires_ffmpeg: true,
        format_override: Some("bestaudio/best"),
        postprocessor: Some(Postprocessor::ExtractAudio {
            codec: "mp3",
            quality: "192",
        }),
        postprocessor_args: &[],
    },
    PolicySpec {
        label: "MP4 (no conversion)",
        ext: "mp4",
        requires_ffmpeg: false,
        format_override: None,
        postprocessor: None,
        postprocessor_args: &[],
    },
];

/// Used in place of any ffmpeg-dependent policy when ffmpeg is unavailable.
pub static FALLBACK_POLICY: PolicySpec = PolicySpec {
    label: "MP4 (best single file, no ffmpeg)",
    ext: "mp4",
    requires_ffmpeg: false,
    format_override: Some("best[ext=mp4]"),
    postprocessor: None,
    postprocessor_args: &[],
};

impl FormatPolicy {
    pub const ALL: [FormatPolicy; 5] = [
        FormatPolicy::AacMp4,
        FormatPolicy::Mp3Mp4,
        FormatPolicy::CopyMp4,
        FormatPolicy::Mp3Audio,
        FormatPolicy::RawMp4,
    ];

    pub fn spec(self) -> &'static PolicySpec {
        &POLICIES[self as usize]
    }

    /// Menu numbers start at 1.
    pub fn from_menu(input: &str) -> Option<Self> {
        let index = menu_number(input)?;
        index
            .checked_sub(1)
            .and_then(|index| Self::ALL.get(index))
            .copied()
    }
}

/// Shows the policy menu until a valid option is entered. `None` on end of
/// input.
pub fn select<R: BufRead, W: Write>(
    console: &mut Console<R, W>,
) -> Result<Option<&'static PolicySpec>> {
    loop {
        console.blank()?;
        console.say("Select the output format:")?;
        for (number, policy) in FormatPolicy::ALL.iter().enumerate() {
            console.say(format!("{} - {}", number + 1, policy.spec().label))?;
        }
        let Some(answer) = console.prompt("Choose an option (1-5): ")? else {
            return Ok(None);
        };
        match FormatPolicy::from_menu(&answer) {
            Some(policy) => return Ok(Some(policy.spec())),
            None => console.say("Invalid option. Please try again.")?,
        }
    }
}
