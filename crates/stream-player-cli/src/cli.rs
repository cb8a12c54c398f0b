use std::path::PathBuf;

use clap::Parser;

const VERSION: &str = concat!(
    env!("CARGO_PKG_VERSION"),
    " (",
    env!("GIT_SHA"),
    ", ",
    env!("BUILD_DATE"),
    ")"
);

#[derive(Parser, Debug)]
#[command(name = "stream-player", version = VERSION)]
pub struct Args {
    /// Audio files to load into memory, in playlist order
    #[arg(required_unless_present = "list_devices")]
    pub tracks: Vec<PathBuf>,

    /// List output devices and exit
    #[arg(long)]
    pub list_devices: bool,

    /// Use a specific output device by substring match
    #[arg(long)]
    pub device: Option<String>,

    /// Output sample rate in Hz (sources are not resampled)
    #[arg(long, default_value_t = 44_100)]
    pub sample_rate: u32,

    /// Frames per hardware submission. Smaller lowers latency but refills more often.
    #[arg(long, default_value_t = 1024)]
    pub buffer_frames: usize,

    /// Consecutive corrupt packets tolerated before a track is treated as finished
    #[arg(long, default_value_t = 8)]
    pub max_decode_errors: usize,

    /// Track index to start playing immediately
    #[arg(long)]
    pub start: Option<usize>,
}
