#![forbid(unsafe_code)]

//! Runtime settings. Values come from the process environment first and from
//! an optional `.env` file in the working directory second.

use anyhow::{Context, Result};
use std::{
    collections::HashMap,
    env, fs,
    path::{Path, PathBuf},
};

pub const DEFAULT_ENV_PATH: &str = ".env";
pub const DEFAULT_YTDLP_PROGRAM: &str = "yt-dlp";
pub const DEFAULT_FFMPEG_ARCHIVE_URL: &str =
    "https://johnvansickle.com/ffmpeg/releases/ffmpeg-release-amd64-static.tar.xz";
const FFMPEG_HOME_DIR: &str = "ffmpeg";

#[cfg(windows)]
pub const DEFAULT_FFMPEG_PATH: &str = r"C:\ffmpeg\bin\ffmpeg.exe";
#[cfg(not(windows))]
pub const DEFAULT_FFMPEG_PATH: &str = "/usr/local/bin/ffmpeg";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// Program used for every yt-dlp invocation.
    pub ytdlp_program: PathBuf,
    /// Well-known ffmpeg location probed before PATH.
    pub ffmpeg_path: PathBuf,
    /// Where the self-installer unpacks ffmpeg.
    pub ffmpeg_home: PathBuf,
    pub ffmpeg_archive_url: String,
    pub output_dir: PathBuf,
}

pub fn load_settings() -> Result<Settings> {
    resolve_settings(Path::new(DEFAULT_ENV_PATH))
}

pub fn resolve_settings(env_path: &Path) -> Result<Settings> {
    let file_vars = read_env_file(env_path)?;
    let cwd = env::current_dir().context("reading current directory")?;
    let home = dirs::home_dir().unwrap_or_else(|| cwd.clone());
    Ok(build_settings(&file_vars, env_var_string, &home, &cwd))
}

fn build_settings(
    file_vars: &HashMap<String, String>,
    env_lookup: impl Fn(&str) -> Option<String>,
    home: &Path,
    cwd: &Path,
) -> Settings {
    let ytdlp_program = lookup_value("TUBEGRAB_YTDLP", file_vars, &env_lookup)
        .unwrap_or_else(|| DEFAULT_YTDLP_PROGRAM.to_string());
    let ffmpeg_path = lookup_value("TUBEGRAB_FFMPEG", file_vars, &env_lookup)
        .unwrap_or_else(|| DEFAULT_FFMPEG_PATH.to_string());
    let ffmpeg_home = lookup_value("TUBEGRAB_FFMPEG_HOME", file_vars, &env_lookup)
        .map(PathBuf::from)
        .unwrap_or_else(|| home.join(FFMPEG_HOME_DIR));
    let ffmpeg_archive_url = lookup_value("TUBEGRAB_FFMPEG_URL", file_vars, &env_lookup)
        .unwrap_or_else(|| DEFAULT_FFMPEG_ARCHIVE_URL.to_string());
    let output_dir = lookup_value("TUBEGRAB_OUTPUT_DIR", file_vars, &env_lookup)
        .map(|value| cwd.join(value))
        .unwrap_or_else(|| cwd.to_path_buf());

    Settings {
        ytdlp_program: PathBuf::from(ytdlp_program),
        ffmpeg_path: PathBuf::from(ffmpeg_path),
        ffmpeg_home,
        ffmpeg_archive_url,
        output_dir,
    }
}

fn env_var_string(key: &str) -> Option<String> {
    env::var(key).ok()
}

/// Environment wins over the file; blank values count as unset in both.
fn lookup_value(
    key: &str,
    file_vars: &HashMap<String, String>,
    env_lookup: &impl Fn(&str) -> Option<String>,
) -> Option<String> {
    let non_blank = |value: String| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    };
    env_lookup(key)
        .and_then(non_blank)
        .or_else(|| file_vars.get(key).cloned().and_then(non_blank))
}

pub fn read_env_file(path: &Path) -> Result<HashMap<String, String>> {
    let mut vars = HashMap::new();
    if !path.exists() {
        return Ok(vars);
    }
    let content =
        fs::read_to_string(path).with_context(|| format!("Reading {}", path.display()))?;
    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let line = trimmed.strip_prefix("export ").unwrap_or(trimmed);
        let Some((key, value_raw)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        let value = value_raw.trim();
        let value = value
            .strip_prefix('"')
            .and_then(|value| value.strip_suffix('"'))
            .or_else(|| {
                value
                    .strip_prefix('\'')
                    .and_then(|value| value.strip_suffix('\''))
            })
            .unwrap_or(value);
        vars.insert(key.to_string(), value.to_string());
    }
    Ok(vars)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn make_config(contents: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "{}", contents).unwrap();
        file
    }

    fn settings_from(contents: &str) -> Settings {
        let cfg = make_config(contents);
        let vars = read_env_file(cfg.path()).unwrap();
        build_settings(&vars, |_| None, Path::new("/home/u"), Path::new("/work"))
    }

    #[test]
    fn defaults_apply_when_nothing_is_set() {
        let settings = settings_from("");
        assert_eq!(settings.ytdlp_program, PathBuf::from(DEFAULT_YTDLP_PROGRAM));
        assert_eq!(settings.ffmpeg_path, PathBuf::from(DEFAULT_FFMPEG_PATH));
        assert_eq!(settings.ffmpeg_home, PathBuf::from("/home/u/ffmpeg"));
        assert_eq!(settings.ffmpeg_archive_url, DEFAULT_FFMPEG_ARCHIVE_URL);
        assert_eq!(settings.output_dir, PathBuf::from("/work"));
    }

    #[test]
    fn file_values_override_defaults() {
        let settings = settings_from(
            "TUBEGRAB_YTDLP=\"/opt/yt-dlp\"\nTUBEGRAB_FFMPEG_HOME='/srv/ff'\nTUBEGRAB_OUTPUT_DIR=downloads\n",
        );
        assert_eq!(settings.ytdlp_program, PathBuf::from("/opt/yt-dlp"));
        assert_eq!(settings.ffmpeg_home, PathBuf::from("/srv/ff"));
        assert_eq!(settings.output_dir, PathBuf::from("/work/downloads"));
    }

    #[test]
    fn env_wins_over_file_and_blank_env_is_ignored() {
        let vars = read_env_file(
            make_config("TUBEGRAB_FFMPEG=\"/file/ffmpeg\"\nTUBEGRAB_FFMPEG_URL=\"http://file\"\n")
                .path(),
        )
        .unwrap();
        let settings = build_settings(
            &vars,
            |key| match key {
                "TUBEGRAB_FFMPEG" => Some("/env/ffmpeg".to_string()),
                "TUBEGRAB_FFMPEG_URL" => Some("   ".to_string()),
                _ => None,
            },
            Path::new("/h"),
            Path::new("/w"),
        );
        assert_eq!(settings.ffmpeg_path, PathBuf::from("/env/ffmpeg"));
        assert_eq!(settings.ffmpeg_archive_url, "http://file");
    }

    #[test]
    fn read_env_file_handles_export_and_quotes() {
        let cfg = make_config(
            r#"
            export TUBEGRAB_YTDLP="/usr/bin/yt-dlp"
            TUBEGRAB_OUTPUT_DIR='/out'
            TUBEGRAB_FFMPEG =  "/x/ffmpeg"
            # comment
            INVALID_LINE
            "#,
        );
        let vars = read_env_file(cfg.path()).unwrap();
        assert_eq!(vars.get("TUBEGRAB_YTDLP").unwrap(), "/usr/bin/yt-dlp");
        assert_eq!(vars.get("TUBEGRAB_OUTPUT_DIR").unwrap(), "/out");
        assert_eq!(vars.get("TUBEGRAB_FFMPEG").unwrap(), "/x/ffmpeg");
        assert!(!vars.contains_key("INVALID_LINE"));
    }

    #[test]
    fn read_env_file_missing_file_returns_empty() {
        let dir = tempfile::tempdir().unwrap();
        let vars = read_env_file(&dir.path().join("missing.env")).unwrap();
        assert!(vars.is_empty());
    }
}
