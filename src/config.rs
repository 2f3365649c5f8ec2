use serde::Deserialize;
use std::path::{Path, PathBuf};

use lightshow::audio::analysis::BrightnessCurve;
use lightshow::output::ColorOrder;

#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub analysis: AnalysisConfig,
    #[serde(default)]
    pub playback: PlaybackConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    pub sample_rate: u32,
    pub frame_duration: f32,
    pub overlap: f32,
    pub rms_threshold: f32,
    pub hold: bool,
    pub alpha: f32,
    pub brightness_curve: BrightnessCurve,
    pub median_kernel: usize,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    pub smooth_alpha: f32,
    pub brightness_gate: u8,
    /// Seconds
    pub min_update_interval: f32,
    pub fade_steps: u32,
    /// Seconds
    pub fade_duration: f32,
    pub spin_margin_ms: u64,
    pub max_consecutive_write_failures: u32,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// "log" or "stream"
    pub device: String,
    pub led_count: usize,
    pub color_order: ColorOrder,
    pub brightness: u8,
    pub path: Option<PathBuf>,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            sample_rate: 8000,
            frame_duration: 0.04,
            overlap: 0.5,
            rms_threshold: 0.02,
            hold: false,
            alpha: 0.0,
            brightness_curve: BrightnessCurve::Log,
            median_kernel: 1,
        }
    }
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            smooth_alpha: 0.3,
            brightness_gate: 10,
            min_update_interval: 0.1,
            fade_steps: 50,
            fade_duration: 1.0,
            spin_margin_ms: 1,
            max_consecutive_write_failures: 25,
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            device: "log".into(),
            led_count: 50,
            color_order: ColorOrder::Grb,
            brightness: 255,
            path: None,
        }
    }
}

/// Explicit path first, then ./lightshow.toml, then the user config dirs.
pub fn find_config(explicit: Option<PathBuf>) -> Option<PathBuf> {
    explicit.or_else(|| {
        let local = PathBuf::from("lightshow.toml");
        if local.exists() {
            return Some(local);
        }
        if let Some(home) = dirs::home_dir() {
            let xdg = home.join(".config").join("lightshow").join("config.toml");
            if xdg.exists() {
                return Some(xdg);
            }
        }
        if let Some(config_dir) = dirs::config_dir() {
            let platform = config_dir.join("lightshow").join("config.toml");
            if platform.exists() {
                return Some(platform);
            }
        }
        None
    })
}

pub fn load_config(path: &Path) -> Option<Config> {
    let content = std::fs::read_to_string(path).ok()?;
    match toml::from_str(&content) {
        Ok(cfg) => Some(cfg),
        Err(e) => {
            log::warn!("Ignoring malformed config {}: {}", path.display(), e);
            None
        }
    }
}
