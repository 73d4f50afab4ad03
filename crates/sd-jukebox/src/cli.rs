use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "sd-jukebox", version)]
pub struct Args {
    #[command(subcommand)]
    pub cmd: Option<Command>,

    /// TOML configuration file
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// List output devices and exit
    #[arg(long)]
    pub list_devices: bool,

    /// Use a specific output device by substring match
    #[arg(long)]
    pub device: Option<String>,

    /// Directory scanned for MP3/AAC files
    #[arg(long)]
    pub media_dir: Option<PathBuf>,

    /// JSON file holding the resume pointer (in memory when unset)
    #[arg(long)]
    pub state_file: Option<PathBuf>,

    /// Stop after the last file instead of starting over
    #[arg(long)]
    pub no_loop: bool,

    /// Output volume, 0-100
    #[arg(long, value_parser = clap::value_parser!(u8).range(0..=100))]
    pub volume: Option<u8>,

    /// Disable the keyboard skip trigger
    #[arg(long)]
    pub no_touch: bool,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Play the media directory in order and resume after a restart (default)
    Run,

    /// Play one file and exit
    Play {
        /// Path to an MP3 or AAC (ADTS) file
        path: PathBuf,
    },
}

impl Args {
    pub fn command(&self) -> Command {
        self.cmd.clone().unwrap_or(Command::Run)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_is_the_default_command() {
        let args = Args::try_parse_from(["sd-jukebox"]).unwrap();
        assert_eq!(args.command(), Command::Run);
        assert!(!args.no_loop);
    }

    #[test]
    fn play_takes_a_path() {
        let args =
            Args::try_parse_from(["sd-jukebox", "--device", "USB", "play", "/media/a.mp3"]).unwrap();
        assert_eq!(
            args.command(),
            Command::Play {
                path: PathBuf::from("/media/a.mp3")
            }
        );
        assert_eq!(args.device.as_deref(), Some("USB"));
    }

    #[test]
    fn volume_above_100_is_rejected() {
        assert!(Args::try_parse_from(["sd-jukebox", "--volume", "101"]).is_err());
        let args = Args::try_parse_from(["sd-jukebox", "--volume", "100"]).unwrap();
        assert_eq!(args.volume, Some(100));
    }
}
