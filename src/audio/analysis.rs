use std::path::Path;

use rayon::prelude::*;
use serde::Deserialize;

use crate::error::{Error, Result};
use crate::note::{freq_to_note, note_color, Note};
use crate::table::{round_millis, Frame, FrameTable};

use super::decode::{decode_audio, WaveformBuffer};
use super::features::{AnalysisSummary, WindowFeatures};
use super::pitch::{PitchSettings, YinDetector};
use super::resample::resample;

/// How window RMS becomes a 0-255 brightness.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum BrightnessCurve {
    /// `rms / max_rms`
    Linear,
    /// `log1p(rms) / log1p(max_rms)`, keeps quiet passages visible
    #[default]
    Log,
}

#[derive(Clone, Debug, PartialEq)]
pub struct AnalysisSettings {
    /// Analysis rate the waveform is resampled to
    pub sample_rate: u32,
    /// Window length in seconds
    pub frame_duration: f32,
    /// Fraction of each window shared with the next, in [0, 1)
    pub overlap: f32,
    /// Noise gate as a fraction of the loudest window's RMS
    pub rms_threshold: f32,
    /// Carry the last detected note through gated windows
    pub hold: bool,
    /// Brightness EMA factor: weight of the previous value
    pub alpha: f32,
    pub curve: BrightnessCurve,
    /// Median filter over the pitch track; 1 disables it
    pub median_kernel: usize,
    pub pitch: PitchSettings,
}

impl Default for AnalysisSettings {
    fn default() -> Self {
        Self {
            sample_rate: 8000,
            frame_duration: 0.04,
            overlap: 0.5,
            rms_threshold: 0.02,
            hold: false,
            alpha: 0.0,
            curve: BrightnessCurve::Log,
            median_kernel: 1,
            pitch: PitchSettings::default(),
        }
    }
}

impl AnalysisSettings {
    pub fn validate(&self) -> Result<()> {
        let fail = |msg: String| Err(Error::InvalidSettings(msg));
        if self.sample_rate == 0 {
            return fail("sample rate must be positive".into());
        }
        if !(self.frame_duration > 0.0) {
            return fail(format!("frame duration {} must be positive", self.frame_duration));
        }
        if !(0.0..1.0).contains(&self.overlap) {
            return fail(format!("overlap {} must be in [0, 1)", self.overlap));
        }
        if !(self.rms_threshold >= 0.0) {
            return fail(format!("rms threshold {} must be non-negative", self.rms_threshold));
        }
        if !(0.0..=1.0).contains(&self.alpha) {
            return fail(format!("alpha {} must be in [0, 1]", self.alpha));
        }
        if self.median_kernel == 0 || self.median_kernel % 2 == 0 {
            return fail(format!("median kernel {} must be odd", self.median_kernel));
        }
        Ok(())
    }
}

/// Window geometry for one signal.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WindowPlan {
    pub frame_length: usize,
    pub hop_length: usize,
    pub n_frames: usize,
}

impl WindowPlan {
    pub fn new(sample_rate: u32, frame_duration: f32, overlap: f32, n_samples: usize) -> Self {
        let frame_length = floor_samples(frame_duration as f64 * sample_rate as f64).max(1);
        let hop_length = floor_samples(frame_length as f64 * (1.0 - overlap as f64)).max(1);
        let n_frames = 1 + n_samples.saturating_sub(frame_length) / hop_length;
        Self {
            frame_length,
            hop_length,
            n_frames,
        }
    }

    /// Samples of window `index`, zero-padded to `frame_length`.
    pub fn window(&self, samples: &[f32], index: usize) -> Vec<f32> {
        let start = (index * self.hop_length).min(samples.len());
        let end = (start + self.frame_length).min(samples.len());
        let mut win = Vec::with_capacity(self.frame_length);
        win.extend_from_slice(&samples[start..end]);
        win.resize(self.frame_length, 0.0);
        win
    }

    /// Scheduled playback offset of window `index`, rounded to the millisecond.
    pub fn time_of(&self, index: usize, sample_rate: u32) -> f64 {
        round_millis((index * self.hop_length) as f64 / sample_rate as f64)
    }
}

/// Floor a sample count, absorbing the f32 rounding of settings such as 0.04
/// (`0.04f32 * 8000` is 319.99999...). The slack is relative, so it scales
/// with the window and never reaches a whole sample.
fn floor_samples(x: f64) -> usize {
    (x + x.abs() * 1e-6).floor().max(0.0) as usize
}

/// Decode `path`, analyse it and return the frame table. Nothing is written.
pub fn extract(path: &Path, settings: &AnalysisSettings) -> Result<(AnalysisSummary, FrameTable)> {
    settings.validate()?;
    log::info!("Loading {} at {} Hz", path.display(), settings.sample_rate);
    let decoded = decode_audio(path)?;
    let waveform = resample(&decoded, settings.sample_rate)?;
    drop(decoded);
    analyze_waveform(&waveform, settings)
}

/// Build the frame table for an already decoded waveform.
///
/// The waveform's own rate is used as the analysis rate.
pub fn analyze_waveform(
    waveform: &WaveformBuffer,
    settings: &AnalysisSettings,
) -> Result<(AnalysisSummary, FrameTable)> {
    settings.validate()?;
    let sr = waveform.sample_rate;
    if sr == 0 {
        return Err(Error::InvalidSettings("waveform has no sample rate".into()));
    }
    let samples = &waveform.samples;
    let plan = WindowPlan::new(sr, settings.frame_duration, settings.overlap, samples.len());

    // timestamps are stored to the millisecond and must strictly increase
    let min_hop = (sr as usize).div_ceil(1000);
    if plan.hop_length < min_hop {
        let reason = if plan.frame_length < min_hop {
            format!("{}-sample windows are shorter than 1 ms at {} Hz", plan.frame_length, sr)
        } else {
            let max_overlap = 1.0 - min_hop as f64 / plan.frame_length as f64;
            format!(
                "overlap {} leaves a hop of {} samples at {} Hz, shorter than 1 ms; \
                 overlap must be at most {:.3} for {}-sample windows",
                settings.overlap, plan.hop_length, sr, max_overlap, plan.frame_length
            )
        };
        return Err(Error::InvalidSettings(reason));
    }

    log::info!(
        "Processing {} frames (frame_len={}, hop_len={})",
        plan.n_frames,
        plan.frame_length,
        plan.hop_length
    );

    log::info!("Pass 1: RMS and pitch per window...");
    let windows = measure_windows(samples, sr, &plan, settings.pitch);

    let max_r = windows.iter().map(|w| w.rms).fold(0.0f32, f32::max);
    let gate = max_r * settings.rms_threshold;
    log::info!("Max RMS={:.6}, gate={:.6}", max_r, gate);

    log::info!("Pass 2: Gating, holding & smoothing (alpha={:.2})...", settings.alpha);
    let f0_track: Vec<f32> = windows.iter().map(|w| w.f0.unwrap_or(0.0)).collect();
    let f0_track = median_filter(&f0_track, settings.median_kernel);

    let mut summary = AnalysisSummary {
        sample_rate: sr,
        total_samples: samples.len(),
        duration: waveform.duration(),
        frame_length: plan.frame_length,
        hop_length: plan.hop_length,
        frame_count: plan.n_frames,
        max_rms: max_r,
        gate,
        ..Default::default()
    };

    let mut frames = Vec::with_capacity(plan.n_frames);
    let mut last_note: Option<Note> = None;
    let mut prev_scale = 0.0f32;

    for (idx, window) in windows.iter().enumerate() {
        let audible = max_r > 0.0 && window.rms >= gate;
        if !audible {
            summary.gated_windows += 1;
        }

        let mut note = if audible { freq_to_note(f0_track[idx]) } else { None };
        if note.is_some() {
            summary.pitched_windows += 1;
        }
        if settings.hold && note.is_none() {
            note = last_note;
        }
        last_note = note;

        let raw_scale = if max_r > 0.0 {
            match settings.curve {
                BrightnessCurve::Linear => window.rms / max_r,
                BrightnessCurve::Log => window.rms.ln_1p() / max_r.ln_1p(),
            }
        } else {
            0.0
        };
        let scale = prev_scale * settings.alpha + raw_scale * (1.0 - settings.alpha);
        prev_scale = scale;
        let loudness = (scale * 255.0).clamp(0.0, 255.0) as u8;

        frames.push(Frame {
            index: idx,
            time_sec: plan.time_of(idx, sr),
            loudness,
            note,
            color: note_color(note),
        });
    }

    let table = FrameTable::new(frames).map_err(Error::InvalidSettings)?;
    log::info!(
        "Analysed {:.1}s: {} frames, {} pitched, {} gated",
        summary.duration,
        summary.frame_count,
        summary.pitched_windows,
        summary.gated_windows
    );
    Ok((summary, table))
}

/// RMS and pitch for every window. Windows are independent, so this runs
/// on the rayon pool.
fn measure_windows(
    samples: &[f32],
    sample_rate: u32,
    plan: &WindowPlan,
    pitch: PitchSettings,
) -> Vec<WindowFeatures> {
    let detector = YinDetector::new(plan.frame_length, sample_rate, pitch);

    (0..plan.n_frames)
        .into_par_iter()
        .map(|idx| {
            let win = plan.window(samples, idx);
            let rms = (win.iter().map(|s| s * s).sum::<f32>() / win.len() as f32).sqrt();
            WindowFeatures {
                rms,
                f0: detector.detect(&win),
            }
        })
        .collect()
}

/// Odd-kernel running median with zero padding at both ends.
fn median_filter(values: &[f32], kernel: usize) -> Vec<f32> {
    if kernel <= 1 || values.is_empty() {
        return values.to_vec();
    }
    let half = kernel / 2;
    let mut scratch = Vec::with_capacity(kernel);
    (0..values.len())
        .map(|i| {
            scratch.clear();
            for k in 0..kernel {
                let pos = i as isize + k as isize - half as isize;
                let v = if pos < 0 || pos as usize >= values.len() {
                    0.0
                } else {
                    values[pos as usize]
                };
                scratch.push(v);
            }
            scratch.sort_by(|a, b| a.total_cmp(b));
            scratch[half]
        })
        .collect()
}
