use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, Weak};

use crate::context::{AudioContextState, AudioNodeId, ConcreteBaseAudioContext, WeakAudioContext};
use crate::node::{AudioNodeOptions, ChannelCountMode, ChannelInterpretation};
use crate::param::AudioParam;
use crate::{validate_number_of_channels, AudioGraphError};

use super::{DeferredTaskHandler, GraphState, InputRef, OutputRef};

/// The kind of processing a node performs, fixed at construction
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum NodeType {
    Destination,
    ConstantSource,
    Gain,
    AudioBufferSource,
    DynamicsCompressor,
    StereoPanner,
    Convolver,
    Delay,
    Analyser,
}

impl NodeType {
    /// Interface name of the node type
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Destination => "AudioDestinationNode",
            Self::ConstantSource => "ConstantSourceNode",
            Self::Gain => "GainNode",
            Self::AudioBufferSource => "AudioBufferSourceNode",
            Self::DynamicsCompressor => "DynamicsCompressorNode",
            Self::StereoPanner => "StereoPannerNode",
            Self::Convolver => "ConvolverNode",
            Self::Delay => "DelayNode",
            Self::Analyser => "AnalyserNode",
        }
    }

    /// Nodes with a significant tail or latency keep their outputs enabled when their last
    /// active connection is removed, so the delayed signal keeps rendering
    pub(crate) fn keeps_outputs_enabled(self) -> bool {
        matches!(
            self,
            Self::Convolver | Self::Delay | Self::DynamicsCompressor
        )
    }

    /// Nodes whose (single) output channel count tracks the computed channel count of their
    /// (single) input
    pub(crate) fn output_follows_input(self) -> bool {
        matches!(self, Self::Gain | Self::Delay | Self::Analyser | Self::Convolver)
    }

    /// Nodes that must be pulled by the render graph even without downstream consumers
    pub(crate) fn is_inspector(self) -> bool {
        matches!(self, Self::Analyser)
    }
}

/// Layout of a new node, passed to [`ConcreteBaseAudioContext::register`]
#[derive(Clone, Debug)]
pub(crate) struct AudioHandlerOptions {
    pub node_type: NodeType,
    pub number_of_inputs: usize,
    /// initial channel count of each output, also determines the number of outputs
    pub output_channels: Vec<usize>,
    pub audio_node_options: AudioNodeOptions,
}

/// The processing unit of an [`AudioNode`](crate::node::AudioNode)
///
/// The handler is shared (reference counted) between the owning node, the graph state and the
/// render thread, so it can outlive the node while the render thread still uses it. Besides
/// the reference count of the `Arc`, it keeps a connection reference count: the number of
/// active graph edges (and the active playback of a source) referring to it. A handler whose
/// connection count drops to zero puts its outputs in a dormant, disabled state.
///
/// All topology mutations go through the handler and take the graph lock internally. The
/// methods are exposed for host binding layers; Rust users go through the
/// [`AudioNode`](crate::node::AudioNode) trait.
pub struct AudioHandler {
    id: AudioNodeId,
    node_type: NodeType,
    number_of_inputs: usize,
    number_of_outputs: usize,
    sample_rate: f32,
    connection_ref_count: AtomicU32,
    deferred: Weak<DeferredTaskHandler>,
    /// cleared when the context is torn down
    context: Mutex<WeakAudioContext>,
}

impl std::fmt::Debug for AudioHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioHandler")
            .field("id", &self.id)
            .field("node_type", &self.node_type)
            .field("connection_ref_count", &self.connection_ref_count())
            .finish_non_exhaustive()
    }
}

impl AudioHandler {
    pub(crate) fn new(
        id: AudioNodeId,
        options: &AudioHandlerOptions,
        context: WeakAudioContext,
        sample_rate: f32,
        deferred: &Arc<DeferredTaskHandler>,
    ) -> Self {
        Self {
            id,
            node_type: options.node_type,
            number_of_inputs: options.number_of_inputs,
            number_of_outputs: options.output_channels.len(),
            sample_rate,
            connection_ref_count: AtomicU32::new(0),
            deferred: Arc::downgrade(deferred),
            context: Mutex::new(context),
        }
    }

    #[must_use]
    pub fn id(&self) -> AudioNodeId {
        self.id
    }

    #[must_use]
    pub fn node_type(&self) -> NodeType {
        self.node_type
    }

    #[must_use]
    pub fn number_of_inputs(&self) -> usize {
        self.number_of_inputs
    }

    #[must_use]
    pub fn number_of_outputs(&self) -> usize {
        self.number_of_outputs
    }

    #[must_use]
    pub fn sample_rate(&self) -> f32 {
        self.sample_rate
    }

    /// Number of active connections keeping the outputs of this handler enabled
    #[must_use]
    pub fn connection_ref_count(&self) -> u32 {
        self.connection_ref_count.load(Ordering::Acquire)
    }

    /// The owning context, `None` once the context is destroyed
    pub(crate) fn context(&self) -> Option<ConcreteBaseAudioContext> {
        self.context.lock().unwrap().upgrade()
    }

    pub(crate) fn clear_context(&self) {
        *self.context.lock().unwrap() = WeakAudioContext::default();
    }

    fn same_context(&self, other: &Self) -> bool {
        Weak::ptr_eq(&self.deferred, &other.deferred)
    }

    fn context_or_err(&self) -> Result<ConcreteBaseAudioContext, AudioGraphError> {
        self.context()
            .ok_or_else(|| AudioGraphError::invalid_state("the audio context has been destroyed"))
    }

    fn check_output_index(&self, output: usize) -> Result<(), AudioGraphError> {
        if output >= self.number_of_outputs {
            return Err(AudioGraphError::index_size(format!(
                "output index ({}) exceeds number of outputs ({})",
                output, self.number_of_outputs
            )));
        }
        Ok(())
    }

    fn check_input_index(&self, input: usize) -> Result<(), AudioGraphError> {
        if input >= self.number_of_inputs {
            return Err(AudioGraphError::index_size(format!(
                "input index ({}) exceeds number of inputs ({})",
                input, self.number_of_inputs
            )));
        }
        Ok(())
    }

    /// Connect an output of this handler to an input of `destination`
    ///
    /// # Errors
    ///
    /// - `InvalidStateError` when the context is closed
    /// - `SyntaxError` when the destination is missing or belongs to another context
    /// - `IndexSizeError` when the output or input index is out of bounds
    pub fn connect(
        &self,
        destination: Option<&AudioHandler>,
        output: usize,
        input: usize,
    ) -> Result<(), AudioGraphError> {
        let context = self.context_or_err()?;
        let mut state = context.lock();

        if context.state() == AudioContextState::Closed {
            return Err(AudioGraphError::invalid_state(
                "cannot connect after the context has been closed",
            ));
        }

        let destination =
            destination.ok_or_else(|| AudioGraphError::syntax("invalid destination node"))?;

        self.check_output_index(output)?;
        destination.check_input_index(input)?;

        if !self.same_context(destination) {
            return Err(AudioGraphError::syntax(
                "cannot connect to a destination belonging to a different audio context",
            ));
        }

        state.connect(
            OutputRef::new(self.id, output),
            InputRef::new(destination.id, input),
        );
        context.increment_connection_count();

        Ok(())
    }

    /// Connect an output of this handler to the automation input of an [`AudioParam`]
    ///
    /// # Errors
    ///
    /// - `InvalidStateError` when the context is closed
    /// - `SyntaxError` when the param is missing or belongs to another context
    /// - `IndexSizeError` when the output index is out of bounds
    pub fn connect_param(
        &self,
        param: Option<&AudioParam>,
        output: usize,
    ) -> Result<(), AudioGraphError> {
        let context = self.context_or_err()?;
        let mut state = context.lock();

        if context.state() == AudioContextState::Closed {
            return Err(AudioGraphError::invalid_state(
                "cannot connect after the context has been closed",
            ));
        }

        let param = param.ok_or_else(|| AudioGraphError::syntax("invalid AudioParam"))?;

        self.check_output_index(output)?;

        if param.context() != &context {
            return Err(AudioGraphError::syntax(
                "cannot connect to an AudioParam belonging to a different audio context",
            ));
        }

        state.connect_param(OutputRef::new(self.id, output), param.param_ref());

        Ok(())
    }

    /// Remove all outgoing connections, never fails
    pub fn disconnect(&self) {
        let Some(context) = self.context() else {
            return;
        };
        let mut state = context.lock();

        for output in 0..self.number_of_outputs {
            state.disconnect_all(OutputRef::new(self.id, output));
        }

        state.collect_garbage();
    }

    /// Remove all outgoing connections of the given output
    ///
    /// # Errors
    ///
    /// `IndexSizeError` when the output index is out of bounds
    pub fn disconnect_output(&self, output: usize) -> Result<(), AudioGraphError> {
        let context = self.context_or_err()?;
        let mut state = context.lock();

        self.check_output_index(output)?;
        state.disconnect_all(OutputRef::new(self.id, output));
        state.collect_garbage();

        Ok(())
    }

    /// Remove the connections to `destination`, optionally restricted to an output of this
    /// handler and an input of the destination
    ///
    /// # Errors
    ///
    /// - `IndexSizeError` when an index is out of bounds
    /// - `InvalidAccessError` when no matching connection exists
    pub fn disconnect_node(
        &self,
        destination: &AudioHandler,
        output: Option<usize>,
        input: Option<usize>,
    ) -> Result<(), AudioGraphError> {
        let context = self.context_or_err()?;
        let mut state = context.lock();

        if let Some(output) = output {
            self.check_output_index(output)?;
        }
        if let Some(input) = input {
            destination.check_input_index(input)?;
        }

        let mut number_of_disconnections = 0;

        // ids of another context may collide with ours, there are no edges to such nodes
        if self.same_context(destination) {
            let outputs = output.map_or(0..self.number_of_outputs, |o| o..o + 1);
            for output in outputs {
                let inputs = input.map_or(0..destination.number_of_inputs, |i| i..i + 1);
                for input in inputs {
                    if state.disconnect(
                        OutputRef::new(self.id, output),
                        InputRef::new(destination.id, input),
                    ) {
                        number_of_disconnections += 1;
                    }
                }
            }
        }

        if number_of_disconnections == 0 {
            let message = match (output, input) {
                (Some(output), Some(input)) => format!(
                    "output ({}) is not connected to the input ({}) of the destination",
                    output, input
                ),
                (Some(output), None) => format!(
                    "output ({}) is not connected to the given destination",
                    output
                ),
                _ => "the given destination is not connected".to_string(),
            };
            return Err(AudioGraphError::invalid_access(message));
        }

        state.collect_garbage();

        Ok(())
    }

    /// Remove the connections to `param`, optionally restricted to an output of this handler
    ///
    /// # Errors
    ///
    /// - `IndexSizeError` when the output index is out of bounds
    /// - `InvalidAccessError` when no matching connection exists
    pub fn disconnect_param(
        &self,
        param: &AudioParam,
        output: Option<usize>,
    ) -> Result<(), AudioGraphError> {
        let context = self.context_or_err()?;
        let mut state = context.lock();

        if let Some(output) = output {
            self.check_output_index(output)?;
        }

        let mut number_of_disconnections = 0;

        if param.context() == &context {
            let outputs = output.map_or(0..self.number_of_outputs, |o| o..o + 1);
            for output in outputs {
                if state.disconnect_param(OutputRef::new(self.id, output), param.param_ref()) {
                    number_of_disconnections += 1;
                }
            }
        }

        if number_of_disconnections == 0 {
            let message = match output {
                Some(output) => format!(
                    "specified destination AudioParam and node output ({}) are not connected",
                    output
                ),
                None => "the given AudioParam is not connected".to_string(),
            };
            return Err(AudioGraphError::invalid_access(message));
        }

        state.collect_garbage();

        Ok(())
    }

    /// Number of channels used when up/down-mixing the inputs
    #[must_use]
    pub fn channel_count(&self) -> usize {
        self.with_state(|state| state.channel_count(self.id))
            .flatten()
            .unwrap_or(1)
    }

    /// Update the channel count, applied to the inputs right away unless the mode is `Max`
    ///
    /// # Errors
    ///
    /// `NotSupportedError` when the count is zero or exceeds the maximum channel count
    pub fn set_channel_count(&self, channel_count: usize) -> Result<(), AudioGraphError> {
        validate_number_of_channels(channel_count)?;
        self.with_state(|state| state.set_channel_count(self.id, channel_count));
        Ok(())
    }

    /// The channel count mode, as most recently set (a change is applied between render quanta)
    #[must_use]
    pub fn channel_count_mode(&self) -> ChannelCountMode {
        self.with_state(|state| state.channel_count_mode(self.id))
            .flatten()
            .unwrap_or(ChannelCountMode::Max)
    }

    /// Stage a new channel count mode, applied by the next deferred task pass
    pub fn set_channel_count_mode(&self, mode: ChannelCountMode) {
        self.with_state(|state| state.set_channel_count_mode(self.id, mode));
    }

    /// The channel interpretation, as most recently set (a change is applied between render
    /// quanta)
    #[must_use]
    pub fn channel_interpretation(&self) -> ChannelInterpretation {
        self.with_state(|state| state.channel_interpretation(self.id))
            .flatten()
            .unwrap_or(ChannelInterpretation::Speakers)
    }

    /// Stage a new channel interpretation, applied by the next deferred task pass
    pub fn set_channel_interpretation(&self, interpretation: ChannelInterpretation) {
        self.with_state(|state| state.set_channel_interpretation(self.id, interpretation));
    }

    /// Whether the outputs of this handler are currently in the dormant, disabled state
    #[must_use]
    pub fn is_disabled(&self) -> bool {
        self.with_state(|state| state.is_disabled(self.id))
            .flatten()
            .unwrap_or(true)
    }

    /// The nodes fed by an output, in id order
    ///
    /// # Errors
    ///
    /// `IndexSizeError` when the output index is out of bounds
    pub fn connected_nodes(&self, output: usize) -> Result<Vec<AudioNodeId>, AudioGraphError> {
        self.check_output_index(output)?;
        let nodes = self
            .with_state(|state| state.connected_nodes(OutputRef::new(self.id, output)))
            .unwrap_or_default();
        Ok(nodes.into_vec())
    }

    /// Whether the render graph pulls this node while nothing downstream consumes its output
    #[must_use]
    pub fn is_automatic_pull_node(&self) -> bool {
        self.with_state(|state| state.is_automatic_pull_node(self.id))
            .unwrap_or(false)
    }

    fn with_state<R>(&self, f: impl FnOnce(&mut GraphState) -> R) -> Option<R> {
        let context = self.context()?;
        let mut state = context.lock();
        Some(f(&mut state))
    }

    /// Add an active connection reference, waking up dormant outputs
    pub(crate) fn make_connection(&self, state: &mut GraphState) {
        self.connection_ref_count.fetch_add(1, Ordering::AcqRel);
        state.enable_outputs_if_necessary(self.id);
    }

    /// Release the playback connection reference of a source that finished playing
    ///
    /// On the render thread the graph lock is only tried; when contended, the work is queued
    /// with the deferred task handler and finished by whoever next holds the lock.
    pub(crate) fn release_finished_source(self: &Arc<Self>) {
        let Some(deferred) = self.deferred.upgrade() else {
            return;
        };

        if deferred.is_audio_thread() {
            match deferred.try_lock() {
                Some(mut state) => state.release_source_node(self.id),
                None => deferred.add_deferred_break_connection(Arc::clone(self)),
            }
        } else {
            let mut state = deferred.lock();
            state.release_source_node(self.id);
        }
    }

    /// Remove an active connection reference, the graph lock is held by the caller
    pub(crate) fn break_connection_with_lock(&self, state: &mut GraphState) {
        let previous = self
            .connection_ref_count
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |c| c.checked_sub(1));

        match previous {
            Ok(1) => state.disable_outputs_if_necessary(self.id),
            Ok(_) => (),
            Err(_) => log::warn!("connection count underflow for node {:?}", self.id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_type_traits() {
        assert!(NodeType::Convolver.keeps_outputs_enabled());
        assert!(NodeType::Delay.keeps_outputs_enabled());
        assert!(NodeType::DynamicsCompressor.keeps_outputs_enabled());
        assert!(!NodeType::Gain.keeps_outputs_enabled());

        assert!(NodeType::Gain.output_follows_input());
        assert!(!NodeType::StereoPanner.output_follows_input());

        assert!(NodeType::Analyser.is_inspector());
        assert_eq!(NodeType::DynamicsCompressor.name(), "DynamicsCompressorNode");
    }
}
