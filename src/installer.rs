#![forbid(unsafe_code)]

//! Self-install of a static ffmpeg build. Only Linux x86_64 is eligible: that
//! is the platform with an official static `.tar.xz` release.

use crate::console::Console;
use crate::locator::{BinaryLocation, Locator};
use anyhow::Result;
use std::fs;
use std::io::{self, BufRead, BufReader, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};
use walkdir::WalkDir;

const BUILD_DIR_PREFIX: &str = "ffmpeg-";
const BUILD_DIR_SUFFIX: &str = "-amd64-static";

pub const MANUAL_INSTALL_HEADER: &str = "Please install ffmpeg manually:";
const MANUAL_INSTALL_STEPS: [&str; 3] = [
    "1. Download a build from https://ffmpeg.org/download.html",
    "2. Extract the archive",
    "3. Add the folder that contains the ffmpeg binary to your PATH",
];

#[derive(Debug, Error)]
pub enum InstallError {
    #[error("downloading {url}: {source}")]
    Http {
        url: String,
        #[source]
        source: Box<ureq::Error>,
    },
    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },
    #[error("archive is not valid xz data: {0}")]
    Archive(String),
    #[error("no ffmpeg-*-amd64-static directory found in {}", .0.display())]
    MissingBuild(PathBuf),
    #[error("ffmpeg was unpacked to {} but could not be found afterwards", .0.display())]
    NotConfirmed(PathBuf),
}

fn io_error(context: impl Into<String>) -> impl FnOnce(io::Error) -> InstallError {
    let context = context.into();
    move |source| InstallError::Io { context, source }
}

pub fn platform_supports_self_install() -> bool {
    cfg!(all(target_os = "linux", target_arch = "x86_64"))
}

#[derive(Debug, Clone)]
pub struct Installer {
    archive_url: String,
    install_root: PathBuf,
    eligible: bool,
}

impl Installer {
    pub fn new(archive_url: impl Into<String>, install_root: PathBuf) -> Self {
        Self {
            archive_url: archive_url.into(),
            install_root,
            eligible: platform_supports_self_install(),
        }
    }

    /// Overrides the platform check.
    pub fn with_eligibility(mut self, eligible: bool) -> Self {
        self.eligible = eligible;
        self
    }

    pub fn install_root(&self) -> &Path {
        &self.install_root
    }

    /// Downloads and unpacks ffmpeg, then re-runs the locator. Every failure
    /// is printed together with manual instructions; only console I/O errors
    /// are returned.
    pub fn install<R: BufRead, W: Write>(
        &self,
        locator: &Locator,
        location: &mut BinaryLocation,
        console: &mut Console<R, W>,
    ) -> Result<bool> {
        if !self.eligible {
            console.say("Automatic ffmpeg installation is only available on Linux x86_64.")?;
            print_manual_steps(console)?;
            return Ok(false);
        }

        console.blank()?;
        console.say("ffmpeg is not installed. Starting automatic installation...")?;
        console.say("Downloading ffmpeg... (this can take a few minutes)")?;

        match self.try_install(locator, location) {
            Ok(bin_dir) => {
                console.blank()?;
                console.say(format!("ffmpeg installed in: {}", bin_dir.display()))?;
                console.say("Note: this installation only applies to the current session.")?;
                console.say("To make it permanent, add this folder to your PATH:")?;
                console.say(bin_dir.display().to_string())?;
                Ok(true)
            }
            Err(err) => {
                warn!(error = %err, "ffmpeg self-install failed");
                console.blank()?;
                console.say(format!("Installation failed: {err}"))?;
                console.blank()?;
                print_manual_steps(console)?;
                Ok(false)
            }
        }
    }

    fn try_install(
        &self,
        locator: &Locator,
        location: &mut BinaryLocation,
    ) -> Result<PathBuf, InstallError> {
        fs::create_dir_all(&self.install_root).map_err(io_error(format!(
            "creating {}",
            self.install_root.display()
        )))?;

        debug!(url = %self.archive_url, "downloading ffmpeg archive");
        let response = ureq::get(&self.archive_url)
            .call()
            .map_err(|source| InstallError::Http {
                url: self.archive_url.clone(),
                source: Box::new(source),
            })?;

        let mut archive =
            tempfile::tempfile_in(&self.install_root).map_err(io_error("creating download file"))?;
        io::copy(&mut response.into_reader(), &mut archive)
            .map_err(io_error("saving ffmpeg archive"))?;
        archive
            .seek(SeekFrom::Start(0))
            .map_err(io_error("rewinding ffmpeg archive"))?;

        unpack_tar_xz(BufReader::new(archive), &self.install_root)?;

        let build_dir = find_build_dir(&self.install_root)?;
        let binary = build_binary(&build_dir);
        let bin_dir = binary
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| build_dir.clone());

        location.add_search_dir(bin_dir.clone());
        location.cache(binary.clone());
        if locator.resolve(location).is_none() {
            location.remove_search_dir(&bin_dir);
            return Err(InstallError::NotConfirmed(binary));
        }
        location.mark_installed();
        Ok(bin_dir)
    }
}

fn print_manual_steps<R: BufRead, W: Write>(console: &mut Console<R, W>) -> Result<()> {
    console.say(MANUAL_INSTALL_HEADER)?;
    for step in MANUAL_INSTALL_STEPS {
        console.say(step)?;
    }
    Ok(())
}

/// Streams an xz-compressed tarball into `dest`.
pub fn unpack_tar_xz(mut reader: impl BufRead, dest: &Path) -> Result<(), InstallError> {
    let mut tar_file =
        tempfile::tempfile_in(dest).map_err(io_error("creating decompression file"))?;
    lzma_rs::xz_decompress(&mut reader, &mut tar_file)
        .map_err(|err| InstallError::Archive(format!("{err:?}")))?;
    tar_file
        .seek(SeekFrom::Start(0))
        .map_err(io_error("rewinding decompressed archive"))?;

    tar::Archive::new(tar_file)
        .unpack(dest)
        .map_err(io_error(format!("unpacking into {}", dest.display())))
}

/// Finds the extracted `ffmpeg-*-amd64-static` directory directly under `root`.
pub fn find_build_dir(root: &Path) -> Result<PathBuf, InstallError> {
    WalkDir::new(root)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_dir())
        .find(|entry| matches_build_dir(&entry.file_name().to_string_lossy()))
        .map(|entry| entry.into_path())
        .ok_or_else(|| InstallError::MissingBuild(root.to_path_buf()))
}

fn matches_build_dir(name: &str) -> bool {
    name.len() > BUILD_DIR_PREFIX.len() + BUILD_DIR_SUFFIX.len()
        && name.starts_with(BUILD_DIR_PREFIX)
        && name.ends_with(BUILD_DIR_SUFFIX)
}

/// Static builds put the binary at the top of the build directory; some
/// layouts use a `bin/` subfolder.
fn build_binary(build_dir: &Path) -> PathBuf {
    let nested = build_dir.join("bin").join("ffmpeg");
    if nested.exists() {
        nested
    } else {
        build_dir.join("ffmpeg")
    }
}

/// An xz-compressed tarball holding one executable at `build_name/entry`.
#[cfg(test)]
pub(crate) fn build_archive(build_name: &str, entry: &str) -> Vec<u8> {
    let mut builder = tar::Builder::new(Vec::new());
    let payload = b"#!/bin/sh\nexit 0\n";
    let mut header = tar::Header::new_gnu();
    header.set_size(payload.len() as u64);
    header.set_mode(0o755);
    header.set_cksum();
    builder
        .append_data(&mut header, format!("{build_name}/{entry}"), &payload[..])
        .unwrap();
    let tar_bytes = builder.into_inner().unwrap();

    let mut compressed = Vec::new();
    lzma_rs::xz_compress(&mut io::Cursor::new(tar_bytes), &mut compressed).unwrap();
    compressed
}

/// Serves `body` once over plain HTTP and returns the URL.
#[cfg(test)]
pub(crate) fn serve_once(body: Vec<u8>) -> String {
    use std::io::Read;
    use std::net::TcpListener;

    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    std::thread::spawn(move || {
        if let Ok((mut stream, _)) = listener.accept() {
            let mut request = Vec::new();
            let mut buf = [0u8; 1024];
            while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                match stream.read(&mut buf) {
                    Ok(0) | Err(_) => break,
                    Ok(n) => request.extend_from_slice(&buf[..n]),
                }
            }
            let head = format!(
                "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nContent-Type: application/x-xz\r\nConnection: close\r\n\r\n",
                body.len()
            );
            let _ = stream.write_all(head.as_bytes());
            let _ = stream.write_all(&body);
        }
    });
    format!("http://{addr}/ffmpeg-release-amd64-static.tar.xz")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::console::{scripted, transcript};
    use std::fs::File;
    use std::io::Cursor;
    use std::net::TcpListener;
    use tempfile::tempdir;

    fn missing_locator(root: &Path) -> Locator {
        Locator::with_candidates(
            "tubegrab-test-no-such-ffmpeg",
            root.join("absent"),
            Vec::new(),
        )
    }

    #[test]
    fn ineligible_platform_prints_manual_steps_once() -> Result<()> {
        let dir = tempdir()?;
        let installer = Installer::new("http://127.0.0.1:9/never", dir.path().join("ff"))
            .with_eligibility(false);
        let mut location = BinaryLocation::default();
        let mut console = scripted(&[]);

        let installed = installer.install(&missing_locator(dir.path()), &mut location, &mut console)?;

        assert!(!installed);
        assert!(!location.is_resolved());
        assert!(!installer.install_root().exists());
        let out = transcript(console);
        assert_eq!(out.matches(MANUAL_INSTALL_HEADER).count(), 1);
        assert!(!out.contains("Downloading ffmpeg"));
        Ok(())
    }

    #[test]
    fn network_failure_is_reported_not_returned() -> Result<()> {
        let dir = tempdir()?;
        let listener = TcpListener::bind("127.0.0.1:0")?;
        let url = format!("http://{}/ffmpeg.tar.xz", listener.local_addr()?);
        drop(listener);

        let installer = Installer::new(url, dir.path().join("ff")).with_eligibility(true);
        let mut location = BinaryLocation::default();
        let mut console = scripted(&[]);

        let installed = installer.install(&missing_locator(dir.path()), &mut location, &mut console)?;

        assert!(!installed);
        assert!(!location.is_installed());
        let out = transcript(console);
        assert!(out.contains("Installation failed"));
        assert_eq!(out.matches(MANUAL_INSTALL_HEADER).count(), 1);
        Ok(())
    }

    #[test]
    fn downloads_unpacks_and_resolves_the_build() -> Result<()> {
        let dir = tempdir()?;
        let url = serve_once(build_archive("ffmpeg-7.0.2-amd64-static", "ffmpeg"));
        let root = dir.path().join("ff");
        let installer = Installer::new(url, root.clone()).with_eligibility(true);
        let mut location = BinaryLocation::default();
        let mut console = scripted(&[]);

        let installed = installer.install(&missing_locator(dir.path()), &mut location, &mut console)?;

        assert!(installed, "{}", transcript(console));
        let build_dir = root.join("ffmpeg-7.0.2-amd64-static");
        assert!(location.is_installed());
        assert_eq!(location.path(), Some(build_dir.join("ffmpeg").as_path()));
        assert_eq!(location.search_dirs(), &[build_dir]);
        Ok(())
    }

    #[test]
    fn unconfirmed_install_leaves_no_trace_in_the_location() -> Result<()> {
        let dir = tempdir()?;
        let url = serve_once(build_archive("ffmpeg-7.0.2-amd64-static", "ffprobe"));
        let installer = Installer::new(url, dir.path().join("ff")).with_eligibility(true);
        let mut location = BinaryLocation::default();
        let mut console = scripted(&[]);

        let installed = installer.install(&missing_locator(dir.path()), &mut location, &mut console)?;

        assert!(!installed);
        assert!(!location.is_resolved());
        assert!(!location.is_installed());
        assert!(location.search_dirs().is_empty());
        let out = transcript(console);
        assert!(out.contains("could not be found afterwards"));
        assert_eq!(out.matches(MANUAL_INSTALL_HEADER).count(), 1);
        Ok(())
    }

    #[test]
    fn garbage_archive_is_an_archive_error() -> Result<()> {
        let dir = tempdir()?;
        let err = unpack_tar_xz(Cursor::new(b"not xz at all".to_vec()), dir.path()).unwrap_err();
        assert!(matches!(err, InstallError::Archive(_)));
        Ok(())
    }

    #[test]
    fn unpacked_build_is_found_by_pattern() -> Result<()> {
        let dir = tempdir()?;
        fs::create_dir(dir.path().join("unrelated"))?;
        unpack_tar_xz(
            Cursor::new(build_archive("ffmpeg-6.1-amd64-static", "ffmpeg")),
            dir.path(),
        )?;
        let build_dir = find_build_dir(dir.path())?;
        assert_eq!(build_dir, dir.path().join("ffmpeg-6.1-amd64-static"));
        assert_eq!(build_binary(&build_dir), build_dir.join("ffmpeg"));
        assert!(build_binary(&build_dir).exists());
        Ok(())
    }

    #[test]
    fn missing_build_dir_is_reported() -> Result<()> {
        let dir = tempdir()?;
        fs::create_dir(dir.path().join("ffmpeg-essentials"))?;
        let err = find_build_dir(dir.path()).unwrap_err();
        assert!(matches!(err, InstallError::MissingBuild(_)));
        assert!(err.to_string().contains("ffmpeg-*-amd64-static"));
        Ok(())
    }

    #[test]
    fn build_dir_pattern() {
        assert!(matches_build_dir("ffmpeg-7.0.2-amd64-static"));
        assert!(matches_build_dir("ffmpeg-git-20240101-amd64-static"));
        assert!(!matches_build_dir("ffmpeg--amd64-static"));
        assert!(!matches_build_dir("ffmpeg-7.0.2-arm64-static"));
        assert!(!matches_build_dir("ffprobe-7.0.2-amd64-static"));
    }

    #[test]
    fn nested_bin_layout_is_preferred() -> Result<()> {
        let dir = tempdir()?;
        let build_dir = dir.path().join("ffmpeg-1-amd64-static");
        fs::create_dir_all(build_dir.join("bin"))?;
        File::create(build_dir.join("bin").join("ffmpeg"))?;
        assert_eq!(build_binary(&build_dir), build_dir.join("bin").join("ffmpeg"));
        Ok(())
    }
}
