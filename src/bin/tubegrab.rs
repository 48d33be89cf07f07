#![forbid(unsafe_code)]

//! Interactive entry point: reads URLs and menu choices from stdin until the
//! user leaves.

use anyhow::Result;
use std::io;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;
use tubegrab::{
    config::load_settings,
    console::Console,
    extractor::YtDlp,
    installer::Installer,
    locator::{Locator, Toolchain},
    progress::ProgressReporter,
    session,
};

fn main() -> Result<ExitCode> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(io::stderr)
        .with_target(false)
        .init();

    let settings = load_settings()?;
    tracing::debug!(?settings, "loaded settings");

    let stdin = io::stdin();
    let mut console = Console::new(stdin.lock(), io::stdout());
    session::print_banner(&mut console)?;

    let ytdlp = YtDlp::new(&settings.ytdlp_program);
    if !session::check_extractor(&mut console, ytdlp.version())? {
        return Ok(ExitCode::from(1));
    }

    let mut toolchain = Toolchain::new(
        Locator::new(settings.ffmpeg_path.clone(), &settings.ffmpeg_home),
        Installer::new(settings.ffmpeg_archive_url.clone(), settings.ffmpeg_home.clone()),
    );
    session::report_ffmpeg(&mut console, &mut toolchain)?;

    let mut progress = ProgressReporter::new(io::stdout());
    session::run(
        &mut console,
        &ytdlp,
        &mut toolchain,
        &settings.output_dir,
        &mut progress,
    )?;
    Ok(ExitCode::SUCCESS)
}
