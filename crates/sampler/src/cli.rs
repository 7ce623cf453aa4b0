use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "sampler", version)]
pub struct Args {
    #[command(subcommand)]
    pub cmd: Option<Command>,

    /// TOML config file; CLI flags override its values
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// List output devices and exit
    #[arg(long)]
    pub list_devices: bool,

    /// Use a specific output device by substring match
    #[arg(long)]
    pub device: Option<String>,

    /// Directory for downloaded preview clips
    #[arg(long)]
    pub cache_dir: Option<PathBuf>,

    /// Directory for transcoded PCM files
    #[arg(long)]
    pub temp_dir: Option<PathBuf>,

    /// Per-request download timeout in seconds
    #[arg(long)]
    pub fetch_timeout_secs: Option<u64>,

    /// Playlist swaps wait for the current clip unless it has played longer than this
    #[arg(long)]
    pub wait_threshold_secs: Option<u64>,

    /// Resampler input chunk size in frames (higher => more latency, lower => more overhead)
    #[arg(long)]
    pub chunk_frames: Option<usize>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Sample a playlist manifest (JSON)
    Play {
        /// Path to the playlist manifest
        manifest: PathBuf,

        /// Keep manifest order instead of shuffling
        #[arg(long)]
        no_shuffle: bool,

        /// Start paused; type `p` to begin
        #[arg(long)]
        paused: bool,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_play_with_global_flags() {
        let args = Args::try_parse_from([
            "sampler",
            "--device",
            "usb",
            "play",
            "mix.json",
            "--no-shuffle",
        ])
        .unwrap();
        assert_eq!(args.device.as_deref(), Some("usb"));
        match args.cmd {
            Some(Command::Play {
                manifest,
                no_shuffle,
                paused,
            }) => {
                assert_eq!(manifest, PathBuf::from("mix.json"));
                assert!(no_shuffle);
                assert!(!paused);
            }
            None => panic!("expected play command"),
        }
    }

    #[test]
    fn list_devices_needs_no_subcommand() {
        let args = Args::try_parse_from(["sampler", "--list-devices"]).unwrap();
        assert!(args.list_devices);
        assert!(args.cmd.is_none());
    }
}
