/// Raw measurements for one analysis window.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct WindowFeatures {
    /// RMS amplitude of the untapered window
    pub rms: f32,
    /// Estimated fundamental (Hz), if any
    pub f0: Option<f32>,
}

/// Global figures gathered while building a frame table.
#[derive(Clone, Debug, Default)]
pub struct AnalysisSummary {
    pub sample_rate: u32,
    pub total_samples: usize,
    pub duration: f32,
    pub frame_length: usize,
    pub hop_length: usize,
    pub frame_count: usize,
    /// Loudest window RMS
    pub max_rms: f32,
    /// Noise gate: `max_rms * rms_threshold`
    pub gate: f32,
    pub pitched_windows: usize,
    pub gated_windows: usize,
}
