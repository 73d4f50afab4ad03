//! SD-card jukebox: plays the MP3/AAC files of one directory, in directory order, on a USB
//! audio output.
//!
//! ## Modes
//! - `run` (default): advance through the media directory, resume after a restart, skip on
//!   Enter.
//! - `play <path>`: play one file and exit.

use anyhow::Result;
use clap::Parser;
use sd_jukebox::cli::{Args, Command};
use sd_jukebox::config::{self, FileConfig};
use sd_jukebox::runtime;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    let args = Args::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("info,uac_player=info,sd_jukebox=info")
        }))
        .init();

    if args.list_devices {
        return runtime::list_devices();
    }

    let file = match &args.config {
        Some(path) => FileConfig::load(path)?,
        None => FileConfig::default(),
    };
    let config = config::resolve(file, &args)?;

    match args.command() {
        Command::Run => runtime::run_jukebox(config, true),
        Command::Play { path } => {
            let _ = ctrlc::set_handler(|| std::process::exit(130));
            runtime::run_play(config, &path)
        }
    }
}
