//! Audio processing code that runs on the audio rendering thread
use crate::context::{AudioNodeId, AudioParamId};
use crate::RENDER_QUANTUM_SIZE;

use super::AudioRenderQuantum;

use std::cell::{Cell, RefCell};

#[non_exhaustive]
/// The execution context of all AudioProcessors in a given render quantum
///
/// Contains the progress of time, and lets source processors report that they finished
/// playing.
pub struct RenderScope {
    pub current_frame: u64,
    pub current_time: f64,
    pub sample_rate: f32,

    pub(crate) node_id: Cell<AudioNodeId>,
    pub(crate) finished: RefCell<Vec<AudioNodeId>>,
}

impl RenderScope {
    pub(crate) fn new(current_frame: u64, sample_rate: f32) -> Self {
        Self {
            current_frame,
            current_time: current_frame as f64 / sample_rate as f64,
            sample_rate,
            node_id: Cell::new(AudioNodeId(0)),
            finished: RefCell::new(Vec::new()),
        }
    }

    /// Time at the end of this render quantum
    pub fn end_time(&self) -> f64 {
        (self.current_frame + RENDER_QUANTUM_SIZE as u64) as f64 / self.sample_rate as f64
    }

    /// Report that the source currently being processed has finished playing
    ///
    /// Its playback connection reference is released after this render quantum, which may put
    /// its outputs in the dormant state.
    pub fn finish(&self) {
        let id = self.node_id.get();
        let mut finished = self.finished.borrow_mut();
        if !finished.contains(&id) {
            finished.push(id);
        }
    }
}

/// Interface for audio processing code that runs on the audio rendering thread.
///
/// Note that the AudioProcessor is typically constructed together with an
/// [`AudioNode`](crate::node::AudioNode) (the user facing object that lives in the control
/// thread). See [`ConcreteBaseAudioContext::register`](crate::context::ConcreteBaseAudioContext).
pub trait AudioProcessor: Send {
    /// Audio processing function
    ///
    /// # Arguments
    ///
    /// - inputs: readonly array of input buffers, up/down-mixed to the computed number of
    ///   channels of each input
    /// - outputs: array of output buffers, silent with the declared number of channels
    /// - params: available `AudioParam`s for this processor
    /// - scope: time of the start of this render quantum and sample rate
    fn process(
        &mut self,
        inputs: &[AudioRenderQuantum],
        outputs: &mut [AudioRenderQuantum],
        params: AudioParamValues<'_>,
        scope: &RenderScope,
    );

    /// Seconds of output produced after the input turns silent
    fn tail_time(&self) -> f64 {
        0.
    }

    /// Seconds of delay between input and output
    fn latency_time(&self) -> f64 {
        0.
    }

    /// Whether silent inputs can skip processing and yield silent outputs
    ///
    /// `last_non_silent_time` is the end time of the last render quantum with non-silent input,
    /// or -1 when there never was any.
    fn propagates_silence(&self, last_non_silent_time: f64, scope: &RenderScope) -> bool {
        last_non_silent_time + self.latency_time() + self.tail_time() < scope.current_time
    }

    /// Called before each render quantum for active sources, to finish sources that have
    /// played out without being processed (e.g. when nothing pulls them)
    ///
    /// Returns `true` when the source has finished.
    fn handle_stoppable_source(&mut self, _scope: &RenderScope) -> bool {
        false
    }
}

/// Accessor for current [`AudioParam`](crate::param::AudioParam) values
///
/// Provided to implementations of [`AudioProcessor`] in the render thread
pub struct AudioParamValues<'a> {
    params: &'a [AudioRenderQuantum],
}

impl<'a> AudioParamValues<'a> {
    pub(crate) fn from(params: &'a [AudioRenderQuantum]) -> Self {
        Self { params }
    }

    /// Get the computed values for the given [`AudioParam`](crate::param::AudioParam)
    ///
    /// For k-rate params or if the (a-rate) parameter is constant for this block, it will
    /// provide a slice of length 1. In other cases, i.e. a-rate param with scheduled
    /// automations or connected inputs, it will provide a slice of length
    /// [`crate::RENDER_QUANTUM_SIZE`]
    ///
    /// # Panics
    ///
    /// Panics when the param does not belong to the node being processed
    pub fn get(&self, index: &AudioParamId) -> &'a [f32] {
        let buffer = &self.params[index.0];
        let len = if buffer.single_valued() {
            1
        } else {
            RENDER_QUANTUM_SIZE
        };

        &buffer.channel_data(0)[..len]
    }
}
