use rubato::{Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction};

use crate::error::{Error, Result};

use super::decode::WaveformBuffer;

/// Resample a mono waveform to `target_rate` using rubato.
///
/// Analysis runs at a heavily reduced rate, so this is mostly a downsample.
pub fn resample(waveform: &WaveformBuffer, target_rate: u32) -> Result<WaveformBuffer> {
    if target_rate == 0 {
        return Err(Error::InvalidSettings("analysis sample rate must be positive".into()));
    }
    if waveform.sample_rate == target_rate || waveform.samples.is_empty() {
        return Ok(WaveformBuffer {
            samples: waveform.samples.clone(),
            sample_rate: target_rate,
        });
    }

    let params = SincInterpolationParameters {
        sinc_len: 256,
        f_cutoff: 0.95,
        interpolation: SincInterpolationType::Linear,
        oversampling_factor: 256,
        window: WindowFunction::BlackmanHarris2,
    };

    let ratio = target_rate as f64 / waveform.sample_rate as f64;
    let mut resampler = SincFixedIn::<f32>::new(
        ratio,
        2.0, // max relative ratio
        params,
        waveform.samples.len(),
        1, // mono
    )
    .map_err(|e| Error::Resample(e.to_string()))?;

    let input = vec![waveform.samples.clone()];
    let output = resampler
        .process(&input, None)
        .map_err(|e| Error::Resample(e.to_string()))?;

    let mut samples = output.into_iter().next().unwrap_or_default();
    let expected = (waveform.samples.len() as f64 * ratio).round() as usize;
    samples.truncate(expected);

    log::info!(
        "Resampled {}Hz -> {}Hz ({} samples)",
        waveform.sample_rate,
        target_rate,
        samples.len()
    );

    Ok(WaveformBuffer {
        samples,
        sample_rate: target_rate,
    })
}
