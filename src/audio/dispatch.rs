//! Moves samples from the CPAL callback to the capture thread.
//!
//! The callback must never block, so frames are cut to a fixed size here and
//! pushed through a bounded channel with `try_send`; overruns are counted
//! rather than waited out.

use crossbeam_channel::{Sender, TrySendError};
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

/// Downmix interleaved multi-channel input to mono while converting each
/// sample to f32, so the rest of the pipeline is layout-agnostic.
pub(super) fn downmix_into<T, F>(buf: &mut Vec<f32>, data: &[T], channels: usize, mut convert: F)
where
    T: Copy,
    F: FnMut(T) -> f32,
{
    if channels <= 1 {
        buf.extend(data.iter().copied().map(&mut convert));
        return;
    }

    let mut acc = 0.0f32;
    let mut filled = 0usize;
    for sample in data.iter().copied() {
        acc += convert(sample);
        filled += 1;
        if filled == channels {
            buf.push(acc / channels as f32);
            acc = 0.0;
            filled = 0;
        }
    }
    // Keep a trailing partial frame instead of dropping it.
    if filled > 0 {
        buf.push(acc / filled as f32);
    }
}

/// Accumulates downmixed samples and emits fixed-size frames.
pub(super) struct FramePump {
    frame_samples: usize,
    pending: Vec<f32>,
    scratch: Vec<f32>,
    sender: Sender<Vec<f32>>,
    dropped: Arc<AtomicUsize>,
}

impl FramePump {
    pub(super) fn new(
        frame_samples: usize,
        sender: Sender<Vec<f32>>,
        dropped: Arc<AtomicUsize>,
    ) -> Self {
        Self {
            frame_samples: frame_samples.max(1),
            pending: Vec::with_capacity(frame_samples),
            scratch: Vec::new(),
            sender,
            dropped,
        }
    }

    pub(super) fn push<T, F>(&mut self, data: &[T], channels: usize, convert: F)
    where
        T: Copy,
        F: FnMut(T) -> f32,
    {
        self.scratch.clear();
        downmix_into(&mut self.scratch, data, channels, convert);
        self.pending.extend_from_slice(&self.scratch);

        while self.pending.len() >= self.frame_samples {
            let frame: Vec<f32> = self.pending.drain(..self.frame_samples).collect();
            match self.sender.try_send(frame) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                }
                Err(TrySendError::Disconnected(_)) => break,
            }
        }
    }
}
