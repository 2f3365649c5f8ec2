use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use lightshow::audio::analysis::BrightnessCurve;
use lightshow::output::ColorOrder;

#[derive(Parser, Debug)]
#[command(name = "lightshow", about = "Music analysis and synchronized LED playback")]
pub struct Cli {
    /// Config file (defaults to ./lightshow.toml or the user config dir)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Analyze an audio file into a frame table CSV
    Analyze(AnalyzeArgs),
    /// Play a frame table in sync with its audio track
    Play(PlayArgs),
    /// Print statistics for a frame table
    Inspect {
        /// Frame table CSV
        frames: PathBuf,
    },
}

#[derive(Args, Debug)]
pub struct AnalyzeArgs {
    /// Input audio file (WAV, MP3, FLAC, OGG)
    pub input: PathBuf,

    /// Output CSV (defaults to <input stem>_frames.csv)
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Analysis sample rate in Hz
    #[arg(long = "sr", default_value_t = 8000)]
    pub sample_rate: u32,

    /// Window length in seconds
    #[arg(short = 'f', long, default_value_t = 0.04)]
    pub frame_duration: f32,

    /// Window overlap fraction (0-1); the hop must stay at least 1 ms
    #[arg(short = 'l', long, default_value_t = 0.5)]
    pub overlap: f32,

    /// Noise gate as a fraction of the loudest window
    #[arg(short = 't', long, default_value_t = 0.02)]
    pub rms_threshold: f32,

    /// Hold the last note through quiet windows
    #[arg(long)]
    pub hold: bool,

    /// Brightness smoothing factor (0 = none)
    #[arg(long, default_value_t = 0.0)]
    pub alpha: f32,

    /// Loudness-to-brightness curve
    #[arg(long, value_enum, default_value_t = BrightnessCurve::Log)]
    pub curve: BrightnessCurve,

    /// Odd median filter length for the pitch track (1 = off)
    #[arg(long, default_value_t = 1)]
    pub median_kernel: usize,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum DeviceKind {
    /// Log colour changes only
    Log,
    /// Raw pixel bytes to --path
    Stream,
}

#[derive(Args, Debug)]
pub struct PlayArgs {
    /// Frame table CSV
    pub frames: PathBuf,

    /// Audio track the table was made from
    pub audio: PathBuf,

    #[arg(long, value_enum, default_value_t = DeviceKind::Log)]
    pub device: DeviceKind,

    /// File, FIFO or serial device for --device stream
    #[arg(long)]
    pub path: Option<PathBuf>,

    /// Number of LEDs on the strip
    #[arg(long = "leds", default_value_t = 50)]
    pub led_count: usize,

    #[arg(long, value_enum, default_value_t = ColorOrder::Grb)]
    pub color_order: ColorOrder,

    /// Global strip brightness (0-255)
    #[arg(long, default_value_t = 255)]
    pub brightness: u8,

    /// Runtime brightness smoothing factor
    #[arg(long, default_value_t = 0.3)]
    pub smooth_alpha: f32,

    /// Frames below this brightness (0-255) keep the previous colour
    #[arg(long = "gate", default_value_t = 10)]
    pub brightness_gate: u8,

    /// Minimum seconds between light updates
    #[arg(long = "min-interval", default_value_t = 0.1)]
    pub min_update_interval: f32,

    /// Keep time without producing sound
    #[arg(long)]
    pub silent: bool,
}
