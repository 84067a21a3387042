//! A real-time audio graph execution engine, modelled after the rendering core of the Web Audio
//! API.
//!
//! Audio nodes are created on a control thread and connected into a directed graph. A dedicated
//! render thread pulls audio through that graph one render quantum at a time, starting from the
//! destination node, without ever blocking on the graph lock.
//!
//! # Example
//! ```rust
//! use web_audio_graph::context::{BaseAudioContext, OfflineAudioContext};
//! use web_audio_graph::node::{AudioNode, AudioScheduledSourceNode};
//!
//! // render one second of mono audio at 44.1 kHz
//! let mut context = OfflineAudioContext::new(1, 44_100, 44_100.).unwrap();
//!
//! let gain = context.create_gain();
//! gain.gain().set_value(0.5);
//! gain.connect(&context.destination()).unwrap();
//!
//! let src = context.create_constant_source();
//! src.connect(&gain).unwrap();
//! src.start().unwrap();
//!
//! let output = context.start_rendering_sync().unwrap();
//! assert_eq!(output.get_channel_data(0)[0], 0.5);
//! ```

#![warn(rust_2018_idioms)]

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

mod analysis;
pub mod buffer;
pub mod context;
mod error;
pub mod graph;
pub mod node;
pub mod param;
pub mod render;

pub use error::{AudioGraphError, ErrorKind};

/// Render quantum size, the audio graph is rendered in blocks of this number of frames
pub const RENDER_QUANTUM_SIZE: usize = 128;

/// Maximum number of channels for audio processing
pub const MAX_CHANNELS: usize = 32;

/// Lowest sample rate a context can run at
pub(crate) const MIN_SAMPLE_RATE: f32 = 3_000.;
/// Highest sample rate a context can run at
pub(crate) const MAX_SAMPLE_RATE: f32 = 384_000.;

/// Atomic float 32, only `load` and `store` are supported, no arithmetic
#[derive(Debug)]
pub(crate) struct AtomicF32 {
    bits: AtomicU32,
}

impl AtomicF32 {
    pub fn new(value: f32) -> Self {
        Self {
            bits: AtomicU32::new(value.to_bits()),
        }
    }

    pub fn load(&self, ordering: Ordering) -> f32 {
        f32::from_bits(self.bits.load(ordering))
    }

    pub fn store(&self, value: f32, ordering: Ordering) {
        self.bits.store(value.to_bits(), ordering);
    }
}

/// Atomic float 64, only `load` and `store` are supported, no arithmetic
#[derive(Debug)]
pub(crate) struct AtomicF64 {
    bits: AtomicU64,
}

impl AtomicF64 {
    pub fn new(value: f64) -> Self {
        Self {
            bits: AtomicU64::new(value.to_bits()),
        }
    }

    pub fn load(&self, ordering: Ordering) -> f64 {
        f64::from_bits(self.bits.load(ordering))
    }

    pub fn store(&self, value: f64, ordering: Ordering) {
        self.bits.store(value.to_bits(), ordering);
    }
}

/// Check that the number of channels lies within [1, 32]
pub(crate) fn validate_number_of_channels(number_of_channels: usize) -> Result<(), AudioGraphError> {
    if number_of_channels == 0 || number_of_channels > MAX_CHANNELS {
        return Err(AudioGraphError::not_supported(format!(
            "channel count {} is outside range [1, {}]",
            number_of_channels, MAX_CHANNELS
        )));
    }
    Ok(())
}

/// Check that the sample rate lies within the supported range
pub(crate) fn validate_sample_rate(sample_rate: f32) -> Result<(), AudioGraphError> {
    // 3000 to 384000 Hz, cf. the BaseAudioContext sample rate constraints
    if !(MIN_SAMPLE_RATE..=MAX_SAMPLE_RATE).contains(&sample_rate) {
        return Err(AudioGraphError::not_supported(format!(
            "sample rate {:?} is outside range [{:?}, {:?}]",
            sample_rate, MIN_SAMPLE_RATE, MAX_SAMPLE_RATE
        )));
    }
    Ok(())
}

/// Panics when the number of channels lies outside [1, 32]
///
/// Used on the render thread, where a violation is a bug and not a user error.
#[track_caller]
#[inline(always)]
pub(crate) fn assert_valid_number_of_channels(number_of_channels: usize) {
    assert!(
        number_of_channels > 0 && number_of_channels <= MAX_CHANNELS,
        "NotSupportedError - Invalid number of channels: {:?} is outside range [1, {:?}]",
        number_of_channels,
        MAX_CHANNELS
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_atomic_f32() {
        let f = AtomicF32::new(2.0);
        assert_eq!(f.load(Ordering::SeqCst), 2.0);
        f.store(-0.5, Ordering::SeqCst);
        assert_eq!(f.load(Ordering::SeqCst), -0.5);
    }

    #[test]
    fn test_atomic_f64() {
        let f = AtomicF64::new(f64::NEG_INFINITY);
        assert_eq!(f.load(Ordering::SeqCst), f64::NEG_INFINITY);
        f.store(1e-9, Ordering::SeqCst);
        assert_eq!(f.load(Ordering::SeqCst), 1e-9);
    }

    #[test]
    fn test_validate_number_of_channels() {
        assert!(validate_number_of_channels(1).is_ok());
        assert!(validate_number_of_channels(MAX_CHANNELS).is_ok());

        let err = validate_number_of_channels(0).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotSupportedError);
        let err = validate_number_of_channels(MAX_CHANNELS + 1).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotSupportedError);
    }

    #[test]
    fn test_validate_sample_rate() {
        assert!(validate_sample_rate(44_100.).is_ok());
        assert!(validate_sample_rate(2_999.).is_err());
        assert!(validate_sample_rate(f32::NAN).is_err());
    }
}
