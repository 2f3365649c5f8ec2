//! Real-time replay of a frame table against a running audio track.

pub mod clock;
pub mod controller;

use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::note::Rgb;
use crate::output::Output;
use crate::player::Playback;
use crate::table::{Frame, FrameTable};

use clock::{Clock, WaitStrategy};

const DRAIN_POLL: Duration = Duration::from_millis(50);

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum Phase {
    Idle = 0,
    /// Device reserved, audio track loading
    Starting = 1,
    Playing = 2,
    FadingOut = 3,
    /// Lights are dark, waiting for the audio tail to finish
    Draining = 4,
}

impl Phase {
    fn from_u8(v: u8) -> Phase {
        match v {
            1 => Phase::Starting,
            2 => Phase::Playing,
            3 => Phase::FadingOut,
            4 => Phase::Draining,
            _ => Phase::Idle,
        }
    }
}

/// Shared between a running show and whoever started it.
#[derive(Debug)]
pub struct ShowStatus {
    stop: AtomicBool,
    phase: AtomicU8,
    position: AtomicUsize,
}

impl ShowStatus {
    pub fn new() -> Self {
        Self {
            stop: AtomicBool::new(false),
            phase: AtomicU8::new(Phase::Idle as u8),
            position: AtomicUsize::new(0),
        }
    }

    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    pub fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    pub fn phase(&self) -> Phase {
        Phase::from_u8(self.phase.load(Ordering::SeqCst))
    }

    pub(crate) fn set_phase(&self, phase: Phase) {
        self.phase.store(phase as u8, Ordering::SeqCst);
    }

    /// Frames dispatched so far (emitted or rate-limited).
    pub fn position(&self) -> usize {
        self.position.load(Ordering::Relaxed)
    }
}

impl Default for ShowStatus {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct PlaybackSettings {
    /// Weight of the previous brightness in the runtime EMA
    pub smooth_alpha: f32,
    /// Frames quieter than this (0-255) never change the held colour
    pub brightness_gate: u8,
    pub min_update_interval: Duration,
    pub fade_steps: u32,
    pub fade_duration: Duration,
    /// Give up on the frame loop after this many failed writes in a row
    pub max_consecutive_write_failures: u32,
}

impl Default for PlaybackSettings {
    fn default() -> Self {
        Self {
            smooth_alpha: 0.3,
            brightness_gate: 10,
            min_update_interval: Duration::from_millis(100),
            fade_steps: 50,
            fade_duration: Duration::from_secs(1),
            max_consecutive_write_failures: 25,
        }
    }
}

impl PlaybackSettings {
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.smooth_alpha) {
            return Err(Error::InvalidSettings(format!(
                "smooth alpha {} must be in [0, 1]",
                self.smooth_alpha
            )));
        }
        if self.fade_steps == 0 {
            return Err(Error::InvalidSettings("fade needs at least one step".into()));
        }
        Ok(())
    }
}

/// Per-show smoothing and gating state.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PlaybackState {
    pub smoothed_scale: f32,
    pub last_stable_color: Rgb,
    /// Table time (ms) of the last accepted update
    pub last_update_time: Option<i64>,
}

fn table_millis(seconds: f64) -> i64 {
    (seconds * 1000.0).round() as i64
}

impl PlaybackState {
    /// Fold one frame into the state. Returns the colour to display, or
    /// `None` when the frame falls inside the rate limit.
    pub fn step(&mut self, frame: &Frame, settings: &PlaybackSettings) -> Option<Rgb> {
        let now_ms = table_millis(frame.time_sec);
        let interval_ms = settings.min_update_interval.as_millis() as i64;
        if let Some(last) = self.last_update_time {
            if now_ms - last < interval_ms {
                return None;
            }
        }
        self.last_update_time = Some(now_ms);

        let raw_scale = frame.loudness as f32 / 255.0;
        self.smoothed_scale =
            self.smoothed_scale * settings.smooth_alpha + raw_scale * (1.0 - settings.smooth_alpha);

        let candidate = frame.color.scaled(self.smoothed_scale);
        if frame.note.is_some() && frame.loudness >= settings.brightness_gate {
            self.last_stable_color = candidate;
        }
        Some(self.last_stable_color)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShowOutcome {
    Completed,
    Cancelled,
    /// Too many consecutive device write failures
    DeviceFailed,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ShowReport {
    pub outcome: ShowOutcome,
    pub frames_total: usize,
    pub frames_emitted: usize,
    pub frames_rate_limited: usize,
    pub write_failures: usize,
    pub final_color: Rgb,
}

/// Drives one output device from one frame table.
pub struct Synchronizer {
    output: Output,
    clock: Arc<dyn Clock>,
    wait: Arc<dyn WaitStrategy>,
    settings: PlaybackSettings,
    status: Arc<ShowStatus>,
    /// Last colour sent to the device
    lit: Rgb,
}

impl Synchronizer {
    pub fn new(
        output: Output,
        clock: Arc<dyn Clock>,
        wait: Arc<dyn WaitStrategy>,
        settings: PlaybackSettings,
        status: Arc<ShowStatus>,
    ) -> Self {
        Self {
            output,
            clock,
            wait,
            settings,
            status,
            lit: Rgb::BLACK,
        }
    }

    pub fn status(&self) -> Arc<ShowStatus> {
        self.status.clone()
    }

    pub fn into_output(self) -> Output {
        self.output
    }

    /// Start `track`, replay `table` in step with it, then fade to black.
    ///
    /// Fails without touching the lights if the track will not start. Once
    /// playing, every exit path goes through the fade-out.
    pub fn run(&mut self, table: &FrameTable, track: &mut dyn Playback) -> Result<ShowReport> {
        self.settings.validate()?;
        if let Err(e) = track.play() {
            log::error!("Audio failed to start: {}", e);
            self.status.set_phase(Phase::Idle);
            return Err(e);
        }

        self.status.set_phase(Phase::Playing);
        let t0 = self.clock.now();
        log::info!("Show started: {} frames over {:.1}s", table.len(), table.duration());

        let mut state = PlaybackState::default();
        let mut report = ShowReport {
            outcome: ShowOutcome::Completed,
            frames_total: table.len(),
            frames_emitted: 0,
            frames_rate_limited: 0,
            write_failures: 0,
            final_color: Rgb::BLACK,
        };
        let mut consecutive_failures = 0u32;

        for frame in table.frames() {
            if self.status.stop_requested() {
                report.outcome = ShowOutcome::Cancelled;
                break;
            }
            let Ok(offset) = Duration::try_from_secs_f64(frame.time_sec) else {
                log::warn!("Frame {} has unusable time {}, ending show", frame.index, frame.time_sec);
                break;
            };
            let target = t0 + offset;
            self.wait.wait_until(self.clock.as_ref(), target);
            if self.status.stop_requested() {
                report.outcome = ShowOutcome::Cancelled;
                break;
            }

            let emitted = state.step(frame, &self.settings);
            self.status.position.fetch_add(1, Ordering::Relaxed);
            let Some(color) = emitted else {
                report.frames_rate_limited += 1;
                continue;
            };

            log::trace!("frame {} @ {:.3}s -> {:?}", frame.index, frame.time_sec, color);
            match self.paint(color) {
                Ok(()) => {
                    report.frames_emitted += 1;
                    consecutive_failures = 0;
                }
                Err(e) => {
                    report.write_failures += 1;
                    consecutive_failures += 1;
                    log::warn!("Frame {} not shown: {}", frame.index, e);
                    if consecutive_failures >= self.settings.max_consecutive_write_failures {
                        log::error!("{} writes failed in a row, ending show", consecutive_failures);
                        report.outcome = ShowOutcome::DeviceFailed;
                        break;
                    }
                }
            }
        }

        if report.outcome != ShowOutcome::Completed {
            track.stop();
        }
        if report.outcome == ShowOutcome::Cancelled {
            log::info!("Show cancelled at frame {}", self.status.position());
        }

        self.status.set_phase(Phase::FadingOut);
        report.write_failures += self.fade_out(state.last_stable_color);
        report.final_color = Rgb::BLACK;

        if report.outcome == ShowOutcome::Completed {
            self.status.set_phase(Phase::Draining);
            while track.is_active() && !self.status.stop_requested() {
                self.clock.sleep(DRAIN_POLL);
            }
            track.stop();
        }

        self.status.set_phase(Phase::Idle);
        log::info!(
            "Show finished ({:?}): {} emitted, {} rate-limited, {} write failures",
            report.outcome,
            report.frames_emitted,
            report.frames_rate_limited,
            report.write_failures
        );
        Ok(report)
    }

    fn paint(&mut self, color: Rgb) -> Result<()> {
        self.lit = color;
        self.output.show(color)
    }

    /// Fade from whatever was last sent. Used when a show dies part way
    /// through and the lights must still end dark.
    pub fn blackout(&mut self) -> usize {
        self.status.set_phase(Phase::FadingOut);
        let failures = self.fade_out(self.lit);
        self.status.set_phase(Phase::Idle);
        failures
    }

    /// Ramp `from` linearly down to black. Returns the number of failed writes.
    fn fade_out(&mut self, from: Rgb) -> usize {
        let steps = self.settings.fade_steps.max(1);
        let pause = self.settings.fade_duration / steps;
        let mut failures = 0;
        for step in (0..=steps).rev() {
            let color = if step == 0 {
                Rgb::BLACK
            } else {
                from.scaled(step as f32 / steps as f32)
            };
            if let Err(e) = self.paint(color) {
                failures += 1;
                log::warn!("Fade step {} not shown: {}", step, e);
            }
            if step > 0 {
                self.clock.sleep(pause);
            }
        }
        failures
    }
}

#[cfg(test)]
mod tests {
    use super::clock::{ManualClock, SleepOnly};
    use super::*;
    use crate::note::Note;
    use crate::testing::{FailingDevice, RecordingDevice, StubPlayback};

    fn frame(index: usize, time_sec: f64, loudness: u8, note: Option<Note>) -> Frame {
        Frame {
            index,
            time_sec,
            loudness,
            note,
            color: crate::note::note_color(note),
        }
    }

    fn crisp() -> PlaybackSettings {
        PlaybackSettings {
            smooth_alpha: 0.0,
            ..Default::default()
        }
    }

    fn rig(settings: PlaybackSettings) -> (Synchronizer, RecordingDevice, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        let device = RecordingDevice::new(8, clock.clone());
        let sync = Synchronizer::new(
            Output::new(Box::new(device.clone())),
            clock.clone(),
            Arc::new(SleepOnly),
            settings,
            Arc::new(ShowStatus::new()),
        );
        (sync, device, clock)
    }

    fn rgb_table() -> FrameTable {
        FrameTable::new(vec![
            frame(0, 0.0, 255, Some(Note::C)),
            frame(1, 0.5, 255, Some(Note::F)),
            frame(2, 1.0, 255, Some(Note::A)),
        ])
        .unwrap()
    }

    #[test]
    fn emits_each_colour_on_schedule_then_fades() {
        let (mut sync, device, _clock) = rig(crisp());
        let mut track = StubPlayback::default();
        let report = sync.run(&rgb_table(), &mut track).unwrap();
        assert_eq!(report.outcome, ShowOutcome::Completed);
        assert_eq!(report.frames_emitted, 3);

        let writes = device.writes();
        assert_eq!(writes[0], (Duration::ZERO, Rgb::new(255, 0, 0)));
        assert_eq!(writes[1], (Duration::from_millis(500), Rgb::new(0, 255, 0)));
        assert_eq!(writes[2], (Duration::from_secs(1), Rgb::new(0, 0, 255)));

        let fade = &writes[3..];
        assert_eq!(fade.len(), 51);
        assert_eq!(fade[0].1, Rgb::new(0, 0, 255));
        for pair in fade.windows(2) {
            assert!(pair[1].1.peak() <= pair[0].1.peak());
            assert!(pair[1].0 >= pair[0].0);
        }
        assert_eq!(fade.last().unwrap().1, Rgb::BLACK);
        assert!(track.was_played() && !track.is_active());
    }

    #[test]
    fn writes_never_precede_their_frame_time() {
        let frames = (0..40).map(|i| frame(i, i as f64 * 0.02, 200, Some(Note::E))).collect();
        let table = FrameTable::new(frames).unwrap();
        let settings = PlaybackSettings {
            min_update_interval: Duration::ZERO,
            ..crisp()
        };
        let (mut sync, device, _clock) = rig(settings);
        sync.run(&table, &mut StubPlayback::default()).unwrap();
        let writes = device.writes();
        for (f, (at, _)) in table.frames().iter().zip(writes.iter()) {
            assert!(at.as_secs_f64() + 1e-9 >= f.time_sec);
        }
    }

    #[test]
    fn rate_limit_skips_frames_but_keeps_position() {
        let frames = (0..10).map(|i| frame(i, i as f64 * 0.02, 200, Some(Note::E))).collect();
        let table = FrameTable::new(frames).unwrap();
        let (mut sync, device, _clock) = rig(crisp());
        let status = sync.status();
        let report = sync.run(&table, &mut StubPlayback::default()).unwrap();
        // accepted at 0.00, 0.10; 0.02..0.08 and 0.12..0.18 are skipped
        assert_eq!(report.frames_emitted, 2);
        assert_eq!(report.frames_rate_limited, 8);
        assert_eq!(status.position(), 10);
        assert_eq!(device.writes().len(), 2 + 51);
    }

    #[test]
    fn gated_frames_hold_the_previous_colour() {
        let table = FrameTable::new(vec![
            frame(0, 0.0, 255, Some(Note::C)),
            frame(1, 0.2, 255, None),
            frame(2, 0.4, 5, Some(Note::A)),
            frame(3, 0.6, 255, Some(Note::A)),
        ])
        .unwrap();
        let (mut sync, device, _clock) = rig(crisp());
        sync.run(&table, &mut StubPlayback::default()).unwrap();
        let colors: Vec<Rgb> = device.writes().iter().take(4).map(|w| w.1).collect();
        assert_eq!(
            colors,
            vec![
                Rgb::new(255, 0, 0),
                Rgb::new(255, 0, 0),
                Rgb::new(255, 0, 0),
                Rgb::new(0, 0, 255),
            ]
        );
    }

    #[test]
    fn runtime_smoothing_ramps_brightness() {
        let mut state = PlaybackState::default();
        let settings = PlaybackSettings::default();
        let first = state.step(&frame(0, 0.0, 255, Some(Note::C)), &settings).unwrap();
        assert_eq!(first, Rgb::new(178, 0, 0));
        let second = state.step(&frame(1, 0.1, 255, Some(Note::C)), &settings).unwrap();
        assert_eq!(second, Rgb::new(232, 0, 0));
        assert!((state.smoothed_scale - 0.91).abs() < 1e-6);
        assert_eq!(state.last_update_time, Some(100));
    }

    #[test]
    fn cancellation_still_fades_to_black() {
        let frames = (0..100).map(|i| frame(i, i as f64 * 0.1, 255, Some(Note::G))).collect();
        let table = FrameTable::new(frames).unwrap();
        let (mut sync, device, _clock) = rig(crisp());
        let status = sync.status();
        device.on_write(5, move || status.request_stop());

        let mut track = StubPlayback::default();
        let report = sync.run(&table, &mut track).unwrap();
        assert_eq!(report.outcome, ShowOutcome::Cancelled);
        assert_eq!(report.frames_emitted, 5);
        assert!(!track.is_active());

        let writes = device.writes();
        assert_eq!(writes.len(), 5 + 51);
        assert_eq!(writes[5].1, Rgb::new(0, 255, 255));
        assert_eq!(writes.last().unwrap().1, Rgb::BLACK);
    }

    #[test]
    fn audio_failure_leaves_lights_untouched() {
        let (mut sync, device, _clock) = rig(crisp());
        let mut track = StubPlayback::failing();
        let err = sync.run(&rgb_table(), &mut track).unwrap_err();
        assert!(matches!(err, Error::Audio(_)));
        assert!(device.writes().is_empty());
        assert_eq!(sync.status().phase(), Phase::Idle);
    }

    #[test]
    fn write_failures_are_counted_and_tolerated() {
        let clock = Arc::new(ManualClock::new());
        let device = FailingDevice::new(4, 2);
        let mut sync = Synchronizer::new(
            Output::new(Box::new(device)),
            clock,
            Arc::new(SleepOnly),
            crisp(),
            Arc::new(ShowStatus::new()),
        );
        let report = sync.run(&rgb_table(), &mut StubPlayback::default()).unwrap();
        assert_eq!(report.outcome, ShowOutcome::Completed);
        assert_eq!(report.write_failures, 2);
        assert_eq!(report.frames_emitted, 1);
    }

    #[test]
    fn persistent_failures_end_the_show() {
        let frames = (0..200).map(|i| frame(i, i as f64 * 0.1, 255, Some(Note::G))).collect();
        let table = FrameTable::new(frames).unwrap();
        let clock = Arc::new(ManualClock::new());
        let mut sync = Synchronizer::new(
            Output::new(Box::new(FailingDevice::new(4, usize::MAX))),
            clock,
            Arc::new(SleepOnly),
            crisp(),
            Arc::new(ShowStatus::new()),
        );
        let mut track = StubPlayback::default();
        let report = sync.run(&table, &mut track).unwrap();
        assert_eq!(report.outcome, ShowOutcome::DeviceFailed);
        assert_eq!(report.write_failures, 25 + 51);
        assert!(!track.is_active());
    }

    #[test]
    fn completed_show_waits_for_the_audio_tail() {
        let (mut sync, _device, clock) = rig(crisp());
        let mut track = StubPlayback::running_for(clock.clone(), Duration::from_secs(5));
        sync.run(&rgb_table(), &mut track).unwrap();
        assert!(clock.now() >= Duration::from_secs(5));
        assert_eq!(sync.status().phase(), Phase::Idle);
    }

    #[test]
    fn audio_tail_is_reported_as_draining() {
        let (mut sync, device, clock) = rig(crisp());
        let mut track =
            StubPlayback::running_for(clock.clone(), Duration::from_secs(5)).watching(sync.status());
        sync.run(&rgb_table(), &mut track).unwrap();
        let seen = track.seen_phases();
        assert!(!seen.is_empty());
        assert!(seen.iter().all(|&p| p == Phase::Draining), "{:?}", seen);
        assert_eq!(device.writes().last().unwrap().1, Rgb::BLACK);
    }

    #[test]
    fn blackout_fades_from_the_last_colour_sent() {
        let (mut sync, device, _clock) = rig(crisp());
        sync.paint(Rgb::new(255, 0, 0)).unwrap();
        assert_eq!(sync.blackout(), 0);
        let writes = device.writes();
        assert_eq!(writes.len(), 1 + 51);
        assert_eq!(writes[1].1, Rgb::new(255, 0, 0));
        assert_eq!(writes.last().unwrap().1, Rgb::BLACK);
        assert_eq!(sync.status().phase(), Phase::Idle);
    }
}
