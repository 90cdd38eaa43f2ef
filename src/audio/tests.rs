use super::dispatch::{downmix_into, FramePump};
use super::filter::{EnergyGate, FilterConfig, SpeechGate};
use super::mic::threshold_from_ambient;
use super::resample::{basic_resample, convert_frame_to_target, resample_linear};
use super::{rms_db, AudioBuffer, TARGET_RATE};
use crossbeam_channel::bounded;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

fn silent_buffer(samples: usize) -> AudioBuffer {
    AudioBuffer::new(vec![0.0; samples], TARGET_RATE)
}

fn loud_buffer(samples: usize) -> AudioBuffer {
    let samples = (0..samples)
        .map(|i| if i % 2 == 0 { 0.5 } else { -0.5 })
        .collect();
    AudioBuffer::new(samples, TARGET_RATE)
}

#[test]
fn energy_gate_rejects_silence_of_any_length() {
    let mut gate = EnergyGate::new(-45.0, 30);
    for len in [0usize, 100, 480, 4_800, 16_000] {
        assert!(!gate.accepts(&silent_buffer(len)), "len={len}");
    }
}

#[test]
fn energy_gate_accepts_a_loud_frame() {
    let mut gate = EnergyGate::new(-45.0, 30);
    // One full 30 ms frame at 16 kHz.
    assert!(gate.accepts(&loud_buffer(480)));
    assert!(gate.accepts(&loud_buffer(4_800)));
}

#[test]
fn sub_frame_buffers_are_never_speech() {
    let mut gate = EnergyGate::new(-90.0, 30);
    // Loud but shorter than one frame: no evaluable frames.
    assert!(!gate.accepts(&loud_buffer(479)));
}

#[test]
fn gate_normalizes_foreign_sample_rates() {
    let mut gate = EnergyGate::new(-45.0, 30);
    // 48 kHz buffer long enough to survive decimation to one 16 kHz frame.
    let buffer = AudioBuffer::new(vec![0.5; 4_800 * 3], 48_000);
    assert!(gate.accepts(&buffer));
}

#[cfg(feature = "vad_earshot")]
#[test]
fn earshot_gate_rejects_silence() {
    use super::filter::create_gate;
    let mut gate = create_gate(&FilterConfig::default());
    assert_eq!(gate.name(), "earshot_gate");
    for len in [0usize, 479, 480, 16_000] {
        assert!(!gate.accepts(&silent_buffer(len)), "len={len}");
    }
}

#[test]
fn energy_gate_is_selected_on_request() {
    use super::filter::{create_gate, GateKind};
    let cfg = FilterConfig {
        engine: GateKind::Energy,
        ..FilterConfig::default()
    };
    assert_eq!(create_gate(&cfg).name(), "energy_gate");
}

#[test]
fn rms_db_floors_on_empty_input() {
    assert_eq!(rms_db(&[]), -60.0);
}

#[test]
fn rms_db_orders_quiet_below_loud() {
    let quiet = rms_db(&[0.01; 480]);
    let loud = rms_db(&[0.5; 480]);
    assert!(quiet < loud);
    assert!(loud < 0.0);
}

#[test]
fn calibration_threshold_sits_above_ambient() {
    assert_eq!(threshold_from_ambient(-50.0, 6.0), -44.0);
    // Clamped so a dead-quiet room can't produce an unreachable threshold.
    assert_eq!(threshold_from_ambient(-80.0, 6.0), -55.0);
    assert_eq!(threshold_from_ambient(-5.0, 6.0), -15.0);
}

#[test]
fn resample_passthrough_at_target_rate() {
    let input = vec![0.1, 0.2, 0.3];
    assert_eq!(basic_resample(&input, TARGET_RATE), input);
}

#[test]
fn resample_decimates_48k_to_about_a_third() {
    let input = vec![0.25; 4_800];
    let output = basic_resample(&input, 48_000);
    let expected = input.len() / 3;
    assert!(
        output.len().abs_diff(expected) <= 2,
        "expected ~{expected}, got {}",
        output.len()
    );
}

#[test]
fn linear_resampler_scales_length_by_ratio() {
    let input = vec![0.0, 1.0, 0.0, 1.0];
    assert_eq!(resample_linear(&input, 2.0).len(), 8);
    assert_eq!(resample_linear(&input, 0.5).len(), 2);
}

#[test]
fn frame_conversion_pins_length() {
    let frame = vec![0.1; 960];
    let converted = convert_frame_to_target(frame, 48_000, 320);
    assert_eq!(converted.len(), 320);
    let frame = vec![0.1; 100];
    let converted = convert_frame_to_target(frame, TARGET_RATE, 320);
    assert_eq!(converted.len(), 320);
}

#[test]
fn downmix_averages_stereo_pairs() {
    let mut buf = Vec::new();
    downmix_into(&mut buf, &[1.0f32, 0.0, 0.5, 0.5], 2, |s| s);
    assert_eq!(buf, vec![0.5, 0.5]);
}

#[test]
fn downmix_passes_mono_through() {
    let mut buf = Vec::new();
    downmix_into(&mut buf, &[1i16, -1], 1, |s| s as f32);
    assert_eq!(buf, vec![1.0, -1.0]);
}

#[test]
fn frame_pump_cuts_fixed_frames() {
    let (tx, rx) = bounded(8);
    let dropped = Arc::new(AtomicUsize::new(0));
    let mut pump = FramePump::new(4, tx, dropped.clone());
    pump.push(&[0.1f32; 10], 1, |s| s);
    assert_eq!(rx.try_recv().unwrap().len(), 4);
    assert_eq!(rx.try_recv().unwrap().len(), 4);
    // Remainder stays pending until the next push completes a frame.
    assert!(rx.try_recv().is_err());
    pump.push(&[0.1f32; 2], 1, |s| s);
    assert_eq!(rx.try_recv().unwrap().len(), 4);
    assert_eq!(dropped.load(Ordering::Relaxed), 0);
}

#[test]
fn frame_pump_counts_overruns() {
    let (tx, _rx) = bounded(1);
    let dropped = Arc::new(AtomicUsize::new(0));
    let mut pump = FramePump::new(2, tx, dropped.clone());
    pump.push(&[0.1f32; 8], 1, |s| s);
    assert!(dropped.load(Ordering::Relaxed) > 0);
}

#[test]
fn buffer_duration_follows_sample_rate() {
    assert_eq!(AudioBuffer::new(vec![0.0; 16_000], TARGET_RATE).duration_ms(), 1_000);
    assert_eq!(AudioBuffer::new(vec![0.0; 480], TARGET_RATE).duration_ms(), 30);
    assert_eq!(AudioBuffer::new(Vec::new(), 0).duration_ms(), 0);
}
