//! The `BaseAudioContext` interface

use crate::buffer::{AudioBuffer, AudioBufferOptions};
use crate::context::{AudioContextState, ConcreteBaseAudioContext};
use crate::node;
use crate::AudioGraphError;

/// The interface representing an audio-processing graph built from audio modules linked together,
/// each represented by an `AudioNode`.
///
/// An audio context controls both the creation of the nodes it contains and the execution of the
/// audio processing.
#[allow(clippy::module_name_repetitions)]
pub trait BaseAudioContext {
    /// Returns the [`BaseAudioContext`] concrete type associated with this `AudioContext`
    #[doc(hidden)] // we'd rather not expose the ConcreteBaseAudioContext
    fn base(&self) -> &ConcreteBaseAudioContext;

    /// Create an new "in-memory" `AudioBuffer` with the given number of channels,
    /// length (i.e. number of samples per channel) and sample rate.
    ///
    /// Note: In most cases you will want the sample rate to match the current
    /// audio context sample rate.
    ///
    /// # Errors
    ///
    /// `NotSupportedError` for an invalid number of channels, length or sample rate
    fn create_buffer(
        &self,
        number_of_channels: usize,
        length: usize,
        sample_rate: f32,
    ) -> Result<AudioBuffer, AudioGraphError> {
        let options = AudioBufferOptions {
            number_of_channels,
            length,
            sample_rate,
        };

        AudioBuffer::new(options)
    }

    /// Creates a `AnalyserNode`
    #[must_use]
    fn create_analyser(&self) -> node::AnalyserNode {
        node::AnalyserNode::new_unchecked(self.base(), node::AnalyserOptions::default())
    }

    /// Creates an `AudioBufferSourceNode`
    #[must_use]
    fn create_buffer_source(&self) -> node::AudioBufferSourceNode {
        node::AudioBufferSourceNode::new_unchecked(
            self.base(),
            node::AudioBufferSourceOptions::default(),
        )
    }

    /// Creates an `ConstantSourceNode`, a source representing a constant value
    #[must_use]
    fn create_constant_source(&self) -> node::ConstantSourceNode {
        node::ConstantSourceNode::new_unchecked(self.base(), node::ConstantSourceOptions::default())
    }

    /// Creates an `ConvolverNode`, a processing node which applies linear convolution
    #[must_use]
    fn create_convolver(&self) -> node::ConvolverNode {
        node::ConvolverNode::new_unchecked(self.base(), node::ConvolverOptions::default())
    }

    /// Creates a `DelayNode`, delaying the audio signal
    ///
    /// # Errors
    ///
    /// `NotSupportedError` when `max_delay_time` is not in the range (0, 180) seconds
    fn create_delay(&self, max_delay_time: f64) -> Result<node::DelayNode, AudioGraphError> {
        let options = node::DelayOptions {
            max_delay_time,
            ..node::DelayOptions::default()
        };
        node::DelayNode::new(self.base(), options)
    }

    /// Creates a `DynamicsCompressorNode`, compressing the audio signal
    #[must_use]
    fn create_dynamics_compressor(&self) -> node::DynamicsCompressorNode {
        node::DynamicsCompressorNode::new_unchecked(
            self.base(),
            node::DynamicsCompressorOptions::default(),
        )
    }

    /// Creates an `GainNode`, to control audio volume
    #[must_use]
    fn create_gain(&self) -> node::GainNode {
        node::GainNode::new_unchecked(self.base(), node::GainOptions::default())
    }

    /// Creates a `StereoPannerNode` to pan a stereo output
    #[must_use]
    fn create_stereo_panner(&self) -> node::StereoPannerNode {
        node::StereoPannerNode::new_unchecked(self.base(), node::StereoPannerOptions::default())
    }

    /// Returns an `AudioDestinationNode` representing the final destination of all audio in the
    /// context. It can be thought of as the audio-rendering device.
    #[must_use]
    fn destination(&self) -> node::AudioDestinationNode {
        self.base().destination()
    }

    /// The sample rate (in sample-frames per second) at which the `AudioContext` handles audio.
    #[must_use]
    fn sample_rate(&self) -> f32 {
        self.base().sample_rate()
    }

    /// Returns state of current context
    #[must_use]
    fn state(&self) -> AudioContextState {
        self.base().state()
    }

    /// This is the time in seconds of the sample frame immediately following the last sample-frame
    /// in the block of audio most recently processed by the context’s rendering graph.
    #[must_use]
    fn current_time(&self) -> f64 {
        self.base().current_time()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::OfflineAudioContext;
    use crate::node::AudioNode;
    use crate::ErrorKind;

    use float_eq::assert_float_eq;

    #[test]
    fn test_create_buffer() {
        let context = OfflineAudioContext::new(1, 128, 44_100.).unwrap();

        let buffer = context.create_buffer(2, 10, 22_050.).unwrap();
        assert_eq!(buffer.number_of_channels(), 2);
        assert_eq!(buffer.length(), 10);
        assert_float_eq!(buffer.sample_rate(), 22_050., abs <= 0.);

        let err = context.create_buffer(0, 10, 22_050.).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotSupportedError);
    }

    #[test]
    fn test_create_delay() {
        let context = OfflineAudioContext::new(1, 128, 44_100.).unwrap();
        assert!(context.create_delay(1.).is_ok());

        let err = context.create_delay(0.).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotSupportedError);
        assert!(context.create_delay(180.).is_err());
    }

    #[test]
    fn test_factories_register_nodes() {
        let context = OfflineAudioContext::new(1, 128, 44_100.).unwrap();

        let nodes: Vec<Box<dyn AudioNode>> = vec![
            Box::new(context.create_analyser()),
            Box::new(context.create_buffer_source()),
            Box::new(context.create_constant_source()),
            Box::new(context.create_convolver()),
            Box::new(context.create_dynamics_compressor()),
            Box::new(context.create_gain()),
            Box::new(context.create_stereo_panner()),
        ];

        let mut ids: Vec<_> = nodes.iter().map(|n| n.registration().id()).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), nodes.len());
        assert!(nodes.iter().all(|n| n.context() == context.base()));
    }

    #[test]
    fn test_initial_state() {
        let context = OfflineAudioContext::new(1, 128, 44_100.).unwrap();
        assert_eq!(context.state(), AudioContextState::Suspended);
        assert_float_eq!(context.current_time(), 0., abs <= 0.);
    }
}
