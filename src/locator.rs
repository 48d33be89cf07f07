#![forbid(unsafe_code)]

//! ffmpeg discovery. The resolved location lives in an explicit
//! [`BinaryLocation`] value owned by the session's [`Toolchain`] instead of
//! process-wide state, so every probe can be exercised in isolation.

use crate::console::Console;
use crate::installer::Installer;
use anyhow::Result;
use std::env;
use std::ffi::OsString;
use std::io::{BufRead, Write};
use std::path::{Component, Path, PathBuf};
use std::process::{Command, Stdio};
use tracing::debug;

pub const FFMPEG_PROGRAM: &str = "ffmpeg";

/// Cached outcome of ffmpeg discovery plus directories that behave as if they
/// were appended to `PATH` for every child process this program starts.
#[derive(Debug, Clone, Default)]
pub struct BinaryLocation {
    path: Option<PathBuf>,
    installed: bool,
    search_dirs: Vec<PathBuf>,
}

impl BinaryLocation {
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn is_resolved(&self) -> bool {
        self.path.is_some()
    }

    pub fn is_installed(&self) -> bool {
        self.installed
    }

    pub fn mark_installed(&mut self) {
        self.installed = true;
    }

    pub fn cache(&mut self, path: PathBuf) {
        self.path = Some(path);
    }

    pub fn forget(&mut self) {
        self.path = None;
    }

    pub fn add_search_dir(&mut self, dir: PathBuf) {
        if !self.search_dirs.contains(&dir) {
            self.search_dirs.push(dir);
        }
    }

    pub fn remove_search_dir(&mut self, dir: &Path) {
        self.search_dirs.retain(|known| known != dir);
    }

    pub fn search_dirs(&self) -> &[PathBuf] {
        &self.search_dirs
    }

    /// The resolved path when it names a file on disk. A bare command found
    /// through `PATH` returns `None`; yt-dlp finds that one on its own.
    pub fn explicit_path(&self) -> Option<&Path> {
        self.path().filter(|path| !is_bare_command(path))
    }

    /// `PATH` for child processes: the inherited value followed by the extra
    /// search directories. `None` when there is nothing to add.
    pub fn child_search_path(&self) -> Option<OsString> {
        if self.search_dirs.is_empty() {
            return None;
        }
        let inherited = env::var_os("PATH").unwrap_or_default();
        let combined: Vec<PathBuf> = env::split_paths(&inherited)
            .chain(self.search_dirs.iter().cloned())
            .collect();
        env::join_paths(combined).ok()
    }

    /// Applies [`Self::child_search_path`] to a command about to be spawned.
    pub fn apply_to(&self, command: &mut Command) {
        if let Some(path) = self.child_search_path() {
            command.env("PATH", path);
        }
    }
}

fn is_bare_command(path: &Path) -> bool {
    let mut components = path.components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    )
}

/// Probe order: cached path, well-known path, bare command, common paths.
#[derive(Debug, Clone)]
pub struct Locator {
    program: String,
    well_known: PathBuf,
    common: Vec<PathBuf>,
}

impl Locator {
    /// Uses the platform's common install locations, plus `install_root`'s
    /// `bin/` outside Windows.
    pub fn new(well_known: PathBuf, install_root: &Path) -> Self {
        Self::with_candidates(
            FFMPEG_PROGRAM,
            well_known,
            default_common_paths(install_root),
        )
    }

    pub fn with_candidates(
        program: impl Into<String>,
        well_known: PathBuf,
        common: Vec<PathBuf>,
    ) -> Self {
        Self {
            program: program.into(),
            well_known,
            common,
        }
    }

    /// Returns the first candidate that exists (or answers `-version` with a
    /// zero exit code for the bare command) and caches it in `location`.
    pub fn resolve(&self, location: &mut BinaryLocation) -> Option<PathBuf> {
        if let Some(cached) = location.path().map(Path::to_path_buf)
            && self.candidate_present(&cached, location)
        {
            debug!(path = %cached.display(), "ffmpeg: cached location still valid");
            return Some(cached);
        }

        let found = if self.well_known.exists() {
            Some(self.well_known.clone())
        } else if probe_version(Path::new(&self.program), location) {
            Some(PathBuf::from(&self.program))
        } else {
            self.common.iter().find(|path| path.exists()).cloned()
        };

        match &found {
            Some(path) => {
                debug!(path = %path.display(), "ffmpeg: resolved");
                location.cache(path.clone());
            }
            None => {
                debug!("ffmpeg: no candidate found");
                location.forget();
            }
        }
        found
    }

    fn candidate_present(&self, path: &Path, location: &BinaryLocation) -> bool {
        if is_bare_command(path) {
            probe_version(path, location)
        } else {
            path.exists()
        }
    }
}

/// Runs `<program> -version` and reports whether it exited successfully.
fn probe_version(program: &Path, location: &BinaryLocation) -> bool {
    let mut command = Command::new(program);
    command
        .arg("-version")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());
    location.apply_to(&mut command);
    matches!(command.status(), Ok(status) if status.success())
}

#[cfg(windows)]
fn default_common_paths(_install_root: &Path) -> Vec<PathBuf> {
    let mut paths = vec![
        PathBuf::from(r"C:\ffmpeg\ffmpeg.exe"),
        PathBuf::from(r"C:\ffmpeg\bin\ffmpeg.exe"),
        PathBuf::from(r"C:\Program Files\ffmpeg\bin\ffmpeg.exe"),
    ];
    if let Some(program_files) = env::var_os("PROGRAMFILES") {
        paths.push(
            PathBuf::from(program_files)
                .join("ffmpeg")
                .join("bin")
                .join("ffmpeg.exe"),
        );
    }
    paths.push(PathBuf::from(r".\ffmpeg.exe"));
    paths
}

#[cfg(not(windows))]
fn default_common_paths(install_root: &Path) -> Vec<PathBuf> {
    vec![
        PathBuf::from("/usr/bin/ffmpeg"),
        PathBuf::from("/opt/homebrew/bin/ffmpeg"),
        install_root.join("bin").join(FFMPEG_PROGRAM),
        PathBuf::from("./ffmpeg"),
    ]
}

/// Everything the orchestrator needs to know about ffmpeg: how to find it,
/// how to install it, and what has been found so far.
pub struct Toolchain {
    pub locator: Locator,
    pub installer: Installer,
    pub location: BinaryLocation,
}

impl Toolchain {
    pub fn new(locator: Locator, installer: Installer) -> Self {
        Self {
            locator,
            installer,
            location: BinaryLocation::default(),
        }
    }

    pub fn resolve(&mut self) -> Option<PathBuf> {
        self.locator.resolve(&mut self.location)
    }

    /// True when ffmpeg is usable, installing it first when the platform
    /// allows. Install failures are reported to the user, never returned.
    pub fn ensure_ffmpeg<R: BufRead, W: Write>(
        &mut self,
        console: &mut Console<R, W>,
    ) -> Result<bool> {
        if self.resolve().is_some() {
            return Ok(true);
        }
        self.installer
            .install(&self.locator, &mut self.location, console)
    }
}

#[cfg(test)]
pub(crate) fn write_stub_script(dir: &Path, name: &str, body: &str) -> Result<PathBuf> {
    use std::fs;
    let script_path = dir.join(name);
    fs::write(&script_path, format!("#!/usr/bin/env bash\n{body}\n"))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = fs::metadata(&script_path)?.permissions();
        perms.set_mode(0o755);
        fs::set_permissions(&script_path, perms)?;
    }
    Ok(script_path)
}
