//! Sample-rate normalization to 16 kHz.
//!
//! The basic path is linear interpolation, with a short windowed-sinc
//! low-pass ahead of any decimation so 44.1/48 kHz microphones don't alias.
//! With the `high-quality-audio` feature a rubato sinc resampler is tried
//! first and the basic path remains as fallback.

use super::TARGET_RATE;
#[cfg(feature = "high-quality-audio")]
use anyhow::{anyhow, Result};
#[cfg(feature = "high-quality-audio")]
use rubato::{InterpolationParameters, InterpolationType, Resampler, SincFixedIn, WindowFunction};
use std::f32::consts::PI;

// Practical device-rate bounds; anything outside is passed through untouched.
const MIN_DEVICE_RATE: u32 = 2_000;
const MAX_DEVICE_RATE: u32 = 1_600_000;
const MAX_FIR_TAPS: usize = 129;

pub(super) fn resample_to_target_rate(input: &[f32], device_rate: u32) -> Vec<f32> {
    if input.is_empty() || device_rate == 0 || device_rate == TARGET_RATE {
        return input.to_vec();
    }

    #[cfg(feature = "high-quality-audio")]
    {
        match resample_with_rubato(input, device_rate) {
            Ok(output) => return output,
            Err(err) => {
                tracing::debug!("sinc resampler unavailable ({err}); using basic path");
            }
        }
    }

    basic_resample(input, device_rate)
}

#[cfg(feature = "high-quality-audio")]
fn resample_with_rubato(input: &[f32], device_rate: u32) -> Result<Vec<f32>> {
    if !(MIN_DEVICE_RATE..=MAX_DEVICE_RATE).contains(&device_rate) {
        return Err(anyhow!("device rate {device_rate}Hz out of range"));
    }
    let ratio = f64::from(TARGET_RATE) / f64::from(device_rate);

    let chunk = 256usize;
    let params = InterpolationParameters {
        sinc_len: 64,
        f_cutoff: 0.90,
        interpolation: InterpolationType::Cubic,
        oversampling_factor: 256,
        window: WindowFunction::BlackmanHarris2,
    };
    let mut resampler = SincFixedIn::<f32>::new(ratio, 2.0, params, chunk, 1)
        .map_err(|e| anyhow!("failed to construct sinc resampler: {e:?}"))?;

    let expected = ((input.len() as f64) * ratio).round() as usize;
    let mut out = Vec::with_capacity(expected + chunk);
    let mut segment = vec![0.0f32; chunk];
    for piece in input.chunks(chunk) {
        let pad = piece.last().copied().unwrap_or(0.0);
        segment.fill(pad);
        segment[..piece.len()].copy_from_slice(piece);
        let produced = resampler
            .process(std::slice::from_ref(&segment), None)
            .map_err(|e| anyhow!("resampler process failed: {e:?}"))?;
        out.extend_from_slice(&produced[0]);
    }

    if out.len() > expected {
        out.truncate(expected.max(1));
    } else {
        let pad = out.last().copied().unwrap_or(0.0);
        out.resize(expected.max(1), pad);
    }
    Ok(out)
}

pub(super) fn basic_resample(input: &[f32], device_rate: u32) -> Vec<f32> {
    if input.is_empty()
        || device_rate == 0
        || !(MIN_DEVICE_RATE..=MAX_DEVICE_RATE).contains(&device_rate)
    {
        return input.to_vec();
    }

    let ratio = TARGET_RATE as f32 / device_rate as f32;
    let filtered = if device_rate > TARGET_RATE {
        let taps = fir_tap_count(device_rate);
        low_pass_fir(input, device_rate, taps)
    } else {
        input.to_vec()
    };
    resample_linear(&filtered, ratio)
}

/// Linear interpolation; fine for short speech snippets where latency
/// matters more than phase accuracy.
pub(super) fn resample_linear(input: &[f32], ratio: f32) -> Vec<f32> {
    let output_len = (input.len() as f32 * ratio).round() as usize;
    let mut output = Vec::with_capacity(output_len);
    for i in 0..output_len {
        let src = i as f32 / ratio;
        let idx = src.floor() as usize;
        let frac = src - idx as f32;
        if idx + 1 < input.len() {
            output.push(input[idx] * (1.0 - frac) + input[idx + 1] * frac);
        } else {
            output.push(input.last().copied().unwrap_or(0.0));
        }
    }
    output
}

/// Odd tap count scaled with the decimation ratio, capped to keep the FIR
/// cheap on the capture thread.
fn fir_tap_count(device_rate: u32) -> usize {
    let decimation = device_rate as f32 / TARGET_RATE as f32;
    let mut taps = (decimation * 4.0).ceil().max(11.0) as usize;
    if taps % 2 == 0 {
        taps += 1;
    }
    taps.min(MAX_FIR_TAPS)
}

/// Hamming-windowed sinc low-pass at the target Nyquist.
pub(super) fn low_pass_fir(input: &[f32], device_rate: u32, taps: usize) -> Vec<f32> {
    if input.is_empty() || taps <= 1 {
        return input.to_vec();
    }
    let cutoff = (TARGET_RATE as f32 * 0.5 / device_rate as f32).min(0.499);
    let coeffs = design_low_pass(cutoff, taps);
    let half = taps / 2;
    let mut output = Vec::with_capacity(input.len());
    for n in 0..input.len() {
        let mut acc = 0.0;
        for (k, coeff) in coeffs.iter().enumerate() {
            if let Some(idx) = (n + k).checked_sub(half) {
                if let Some(sample) = input.get(idx) {
                    acc += *sample * coeff;
                }
            }
        }
        output.push(acc);
    }
    output
}

fn design_low_pass(normalized_cutoff: f32, taps: usize) -> Vec<f32> {
    let mut coeffs = Vec::with_capacity(taps);
    let m = (taps - 1) as f32;
    for n in 0..taps {
        let centered = n as f32 - m / 2.0;
        let x = 2.0 * PI * normalized_cutoff * centered;
        let sinc = if centered == 0.0 {
            2.0 * normalized_cutoff
        } else {
            (2.0 * normalized_cutoff * x.sin()) / x
        };
        let window = if taps <= 1 {
            1.0
        } else {
            0.54 - 0.46 * ((2.0 * PI * n as f32) / m).cos()
        };
        coeffs.push(sinc * window);
    }
    let sum: f32 = coeffs.iter().sum();
    if sum != 0.0 {
        for coeff in coeffs.iter_mut() {
            *coeff /= sum;
        }
    }
    coeffs
}

/// Resample a device-rate frame and pin it to `desired_len` samples so gate
/// frame sizes stay exact.
pub(super) fn convert_frame_to_target(
    frame: Vec<f32>,
    device_rate: u32,
    desired_len: usize,
) -> Vec<f32> {
    let mut data = if device_rate == TARGET_RATE {
        frame
    } else {
        resample_to_target_rate(&frame, device_rate)
    };
    if data.len() > desired_len {
        data.truncate(desired_len);
    } else if data.len() < desired_len {
        let pad = data.last().copied().unwrap_or(0.0);
        data.resize(desired_len, pad);
    }
    data
}
