//! Fakes for driving shows without hardware or sound.

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::error::{Error, Result};
use crate::note::Rgb;
use crate::output::OutputDevice;
use crate::player::{AudioBackend, Playback};
use crate::sync::clock::{Clock, ManualClock};
use crate::sync::{Phase, ShowStatus};

type WriteHook = Box<dyn FnMut() + Send>;

// A hook may panic while the lock is held; keep recording afterwards.
fn relock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

struct Recording {
    writes: Vec<(Duration, Rgb)>,
    trigger: Option<(usize, WriteHook)>,
}

/// Records `(clock time, first pixel)` on every flush.
#[derive(Clone)]
pub struct RecordingDevice {
    pixels: Vec<Rgb>,
    clock: Arc<dyn Clock>,
    shared: Arc<Mutex<Recording>>,
}

impl RecordingDevice {
    pub fn new(len: usize, clock: Arc<dyn Clock>) -> Self {
        Self {
            pixels: vec![Rgb::BLACK; len],
            clock,
            shared: Arc::new(Mutex::new(Recording {
                writes: Vec::new(),
                trigger: None,
            })),
        }
    }

    pub fn writes(&self) -> Vec<(Duration, Rgb)> {
        relock(&self.shared).writes.clone()
    }

    /// Run `hook` once, right after the `after`-th write lands.
    pub fn on_write(&self, after: usize, hook: impl FnMut() + Send + 'static) {
        relock(&self.shared).trigger = Some((after, Box::new(hook)));
    }
}

impl OutputDevice for RecordingDevice {
    fn len(&self) -> usize {
        self.pixels.len()
    }

    fn set_pixel(&mut self, index: usize, color: Rgb) {
        if let Some(px) = self.pixels.get_mut(index) {
            *px = color;
        }
    }

    fn flush(&mut self) -> Result<()> {
        let first = self.pixels.first().copied().unwrap_or_default();
        let mut shared = relock(&self.shared);
        shared.writes.push((self.clock.now(), first));
        let count = shared.writes.len();
        if let Some((after, hook)) = shared.trigger.as_mut() {
            if *after == count {
                hook();
            }
        }
        Ok(())
    }
}

/// Fails the first `failures` flushes, then succeeds.
pub struct FailingDevice {
    len: usize,
    remaining: usize,
}

impl FailingDevice {
    pub fn new(len: usize, failures: usize) -> Self {
        Self {
            len,
            remaining: failures,
        }
    }
}

impl OutputDevice for FailingDevice {
    fn len(&self) -> usize {
        self.len
    }

    fn set_pixel(&mut self, _index: usize, _color: Rgb) {}

    fn flush(&mut self) -> Result<()> {
        if self.remaining > 0 {
            self.remaining -= 1;
            return Err(Error::DeviceWrite("strip unplugged".into()));
        }
        Ok(())
    }
}

/// A track that either ends the moment it starts or runs until a point on a
/// manual clock.
#[derive(Default)]
pub struct StubPlayback {
    played: bool,
    stopped: bool,
    fail: bool,
    until: Option<(Arc<ManualClock>, Duration)>,
    watched: Option<Arc<ShowStatus>>,
    seen: Mutex<Vec<Phase>>,
}

impl StubPlayback {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    pub fn running_for(clock: Arc<ManualClock>, length: Duration) -> Self {
        Self {
            until: Some((clock, length)),
            ..Default::default()
        }
    }

    /// Note the show's phase every time activity is polled.
    pub fn watching(mut self, status: Arc<ShowStatus>) -> Self {
        self.watched = Some(status);
        self
    }

    pub fn seen_phases(&self) -> Vec<Phase> {
        self.seen.lock().unwrap().clone()
    }

    pub fn was_played(&self) -> bool {
        self.played
    }
}

impl Playback for StubPlayback {
    fn play(&mut self) -> Result<()> {
        if self.fail {
            return Err(Error::Audio("no output device".into()));
        }
        self.played = true;
        Ok(())
    }

    fn is_active(&self) -> bool {
        if let Some(status) = &self.watched {
            self.seen.lock().unwrap().push(status.phase());
        }
        if !self.played || self.stopped {
            return false;
        }
        match &self.until {
            Some((clock, end)) => clock.now() < *end,
            None => false,
        }
    }

    fn stop(&mut self) {
        self.stopped = true;
    }
}

/// Hands out stub tracks; paths containing "missing" fail to load.
#[derive(Default)]
pub struct StubBackend {
    pub clock: Option<Arc<ManualClock>>,
    pub length: Duration,
}

impl AudioBackend for StubBackend {
    fn load(&self, path: &Path) -> Result<Box<dyn Playback>> {
        if path.to_string_lossy().contains("missing") {
            return Err(Error::Audio(format!("cannot open {}", path.display())));
        }
        Ok(Box::new(match &self.clock {
            Some(clock) => StubPlayback::running_for(clock.clone(), self.length),
            None => StubPlayback::default(),
        }))
    }
}
