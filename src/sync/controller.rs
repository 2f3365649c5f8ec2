//! One-show-at-a-time control over a single output device.

use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::output::Output;
use crate::player::AudioBackend;
use crate::table::FrameTable;

use super::clock::{Clock, WaitStrategy};
use super::{Phase, PlaybackSettings, ShowReport, ShowStatus, Synchronizer};

/// Owns the output device between shows and lends it to at most one show
/// at a time.
pub struct Stage {
    device: Arc<Mutex<Option<Output>>>,
    current: Mutex<Option<Arc<ShowStatus>>>,
    backend: Arc<dyn AudioBackend>,
    clock: Arc<dyn Clock>,
    wait: Arc<dyn WaitStrategy>,
    settings: PlaybackSettings,
}

/// A running (or finished) show.
pub struct ShowHandle {
    status: Arc<ShowStatus>,
    frames: usize,
    thread: JoinHandle<Result<ShowReport>>,
}

impl ShowHandle {
    pub fn stop(&self) {
        self.status.request_stop();
    }

    pub fn phase(&self) -> Phase {
        self.status.phase()
    }

    /// Frames dispatched so far.
    pub fn position(&self) -> usize {
        self.status.position()
    }

    pub fn frame_count(&self) -> usize {
        self.frames
    }

    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    /// Poll until the show thread ends, stopping the show once `interrupt`
    /// is raised. `tick` gets the dispatched frame count on every poll.
    pub fn supervise(&self, interrupt: &AtomicBool, poll: Duration, mut tick: impl FnMut(usize)) {
        let mut stopping = false;
        while !self.is_finished() {
            if !stopping && interrupt.load(Ordering::SeqCst) {
                log::info!("Interrupted, fading out");
                self.stop();
                stopping = true;
            }
            tick(self.position());
            std::thread::sleep(poll);
        }
        tick(self.position());
    }

    /// Block until the show has faded out and released the device.
    pub fn join(self) -> Result<ShowReport> {
        self.thread.join().map_err(|_| Error::ShowPanicked)?
    }
}

fn relock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

impl Stage {
    pub fn new(
        output: Output,
        backend: Arc<dyn AudioBackend>,
        clock: Arc<dyn Clock>,
        wait: Arc<dyn WaitStrategy>,
        settings: PlaybackSettings,
    ) -> Self {
        Self {
            device: Arc::new(Mutex::new(Some(output))),
            current: Mutex::new(None),
            backend,
            clock,
            wait,
            settings,
        }
    }

    /// True while a show holds the device.
    pub fn is_busy(&self) -> bool {
        relock(&self.device).is_none()
    }

    pub fn phase(&self) -> Phase {
        relock(&self.current)
            .as_ref()
            .map_or(Phase::Idle, |status| status.phase())
    }

    /// Start a show on its own thread.
    ///
    /// Returns once the audio track has loaded. Fails with
    /// [`Error::AlreadyRunning`] if another show holds the device, and with
    /// the load error if the table or track cannot be opened; in both cases
    /// the device is not written to.
    pub fn start(&self, frame_table_path: &Path, audio_path: &Path) -> Result<ShowHandle> {
        self.settings.validate()?;
        if self.is_busy() {
            return Err(Error::AlreadyRunning);
        }
        let table = FrameTable::load(frame_table_path)?;

        let output = relock(&self.device).take().ok_or(Error::AlreadyRunning)?;
        let status = Arc::new(ShowStatus::new());
        status.set_phase(Phase::Starting);
        *relock(&self.current) = Some(status.clone());

        let (ready_tx, ready_rx) = mpsc::sync_channel::<Result<()>>(1);
        let frames = table.len();
        let thread = {
            let device = self.device.clone();
            let backend = self.backend.clone();
            let clock = self.clock.clone();
            let wait = self.wait.clone();
            let settings = self.settings.clone();
            let status = status.clone();
            let audio_path: PathBuf = audio_path.to_path_buf();
            std::thread::Builder::new()
                .name("show".into())
                .spawn(move || -> Result<ShowReport> {
                    let mut track = match backend.load(&audio_path) {
                        Ok(track) => track,
                        Err(e) => {
                            let reason = e.to_string();
                            *relock(&device) = Some(output);
                            status.set_phase(Phase::Idle);
                            let _ = ready_tx.send(Err(e));
                            return Err(Error::Audio(reason));
                        }
                    };
                    let _ = ready_tx.send(Ok(()));

                    let mut show = Synchronizer::new(output, clock, wait, settings, status.clone());
                    let result = panic::catch_unwind(AssertUnwindSafe(|| show.run(&table, track.as_mut())))
                        .unwrap_or_else(|_| {
                            log::error!("Show crashed, fading out");
                            track.stop();
                            if panic::catch_unwind(AssertUnwindSafe(|| show.blackout())).is_err() {
                                log::error!("Fade-out crashed too, lights may still be on");
                            }
                            Err(Error::ShowPanicked)
                        });
                    drop(track);
                    *relock(&device) = Some(show.into_output());
                    status.set_phase(Phase::Idle);
                    result
                })
                .map_err(|e| Error::Audio(format!("cannot spawn show thread: {}", e)))?
        };

        match ready_rx.recv() {
            Ok(Ok(())) => {
                log::info!(
                    "Show started: {} with {}",
                    frame_table_path.display(),
                    audio_path.display()
                );
                Ok(ShowHandle {
                    status,
                    frames,
                    thread,
                })
            }
            Ok(Err(e)) => {
                let _ = thread.join();
                log::error!("Show not started: {}", e);
                Err(e)
            }
            Err(_) => {
                let _ = thread.join();
                Err(Error::ShowPanicked)
            }
        }
    }

    /// Ask a show to stop. It fades out before releasing the device.
    pub fn stop(&self, handle: &ShowHandle) {
        log::info!("Stop requested");
        handle.stop();
    }
}
