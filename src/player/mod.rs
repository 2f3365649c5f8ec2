//! Audio playback behind a small interface: load a track, start it, ask
//! whether it is still going.

#[cfg(feature = "playback")]
pub mod speaker;

use std::path::Path;
use std::time::{Duration, Instant};

use crate::audio::decode::probe_duration;
use crate::error::Result;

/// A loaded track. Lives on the show thread, so it need not be `Send`.
pub trait Playback {
    fn play(&mut self) -> Result<()>;
    fn is_active(&self) -> bool;
    fn stop(&mut self);
}

pub trait AudioBackend: Send + Sync {
    /// Open and prepare `path` without starting it.
    fn load(&self, path: &Path) -> Result<Box<dyn Playback>>;
}

/// Validates the track and keeps time, but makes no sound. Used for dry runs
/// and on machines without an audio device.
#[derive(Clone, Copy, Debug, Default)]
pub struct SilentBackend;

impl AudioBackend for SilentBackend {
    fn load(&self, path: &Path) -> Result<Box<dyn Playback>> {
        let duration = probe_duration(path)?;
        log::info!(
            "Silent playback of {} ({})",
            path.display(),
            duration.map_or_else(|| "unknown length".to_string(), |d| format!("{:.1}s", d.as_secs_f32()))
        );
        Ok(Box::new(SilentPlayback {
            duration,
            started: None,
            stopped: false,
        }))
    }
}

struct SilentPlayback {
    duration: Option<Duration>,
    started: Option<Instant>,
    stopped: bool,
}

impl Playback for SilentPlayback {
    fn play(&mut self) -> Result<()> {
        self.started = Some(Instant::now());
        self.stopped = false;
        Ok(())
    }

    fn is_active(&self) -> bool {
        match (self.started, self.stopped) {
            (Some(start), false) => self.duration.map_or(true, |d| start.elapsed() < d),
            _ => false,
        }
    }

    fn stop(&mut self) {
        self.stopped = true;
    }
}

/// The backend used when nothing else is requested.
pub fn default_backend() -> Box<dyn AudioBackend> {
    #[cfg(feature = "playback")]
    {
        Box::new(speaker::RodioBackend)
    }
    #[cfg(not(feature = "playback"))]
    {
        Box::new(SilentBackend)
    }
}
