use crate::context::{AudioContextRegistration, ConcreteBaseAudioContext};
use crate::param::AudioParam;
use crate::AudioGraphError;

/// How channels must be matched between the node's inputs and outputs.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum ChannelCountMode {
    /// `computedNumberOfChannels` is the maximum of the number of channels of all connections to an
    /// input. In this mode channelCount is ignored.
    Max,
    /// `computedNumberOfChannels` is determined as for "max" and then clamped to a maximum value of
    /// the given channelCount.
    ClampedMax,
    /// `computedNumberOfChannels` is the exact value as specified by the channelCount.
    Explicit,
}

impl From<u32> for ChannelCountMode {
    fn from(i: u32) -> Self {
        use ChannelCountMode::*;

        match i {
            0 => Max,
            1 => ClampedMax,
            2 => Explicit,
            _ => unreachable!(),
        }
    }
}

/// The meaning of the channels, defining how audio up-mixing and down-mixing will happen.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum ChannelInterpretation {
    Speakers,
    Discrete,
}

impl From<u32> for ChannelInterpretation {
    fn from(i: u32) -> Self {
        use ChannelInterpretation::*;

        match i {
            0 => Speakers,
            1 => Discrete,
            _ => unreachable!(),
        }
    }
}

/// Options that can be used in constructing all AudioNodes.
#[derive(Clone, Debug)]
pub struct AudioNodeOptions {
    /// Desired number of channels for the [`AudioNode::channel_count`] attribute.
    pub channel_count: usize,
    /// Desired mode for the [`AudioNode::channel_count_mode`] attribute.
    pub channel_count_mode: ChannelCountMode,
    /// Desired mode for the [`AudioNode::channel_interpretation`] attribute.
    pub channel_interpretation: ChannelInterpretation,
}

impl Default for AudioNodeOptions {
    fn default() -> Self {
        Self {
            channel_count: 2,
            channel_count_mode: ChannelCountMode::Max,
            channel_interpretation: ChannelInterpretation::Speakers,
        }
    }
}

/// Channel constraints of the stereo processing nodes (panner, compressor): at most two
/// channels, and a count that does not depend on the connections
pub(crate) fn assert_stereo_channel_count(channel_count: usize) -> Result<(), AudioGraphError> {
    if channel_count > 2 {
        return Err(AudioGraphError::not_supported(format!(
            "channel count cannot be greater than two, got {}",
            channel_count
        )));
    }
    crate::validate_number_of_channels(channel_count)
}

pub(crate) fn assert_stereo_channel_count_mode(
    mode: ChannelCountMode,
) -> Result<(), AudioGraphError> {
    if mode == ChannelCountMode::Max {
        return Err(AudioGraphError::not_supported(
            "channel count mode cannot be set to max",
        ));
    }
    Ok(())
}

/// This interface represents audio sources, the audio destination, and intermediate processing
/// modules.
///
/// These modules can be connected together to form processing graphs for rendering audio
/// to the audio hardware. Each node can have inputs and/or outputs.
///
/// All topology changes are forwarded to the node's [`AudioHandler`](crate::graph::AudioHandler),
/// which performs them under the graph lock.
pub trait AudioNode {
    /// Handle of the associated [`BaseAudioContext`](crate::context::BaseAudioContext).
    ///
    /// Only when implementing the AudioNode trait manually, this struct is of any concern.
    fn registration(&self) -> &AudioContextRegistration;

    /// The [`BaseAudioContext`](crate::context::BaseAudioContext) concrete type which owns this
    /// AudioNode.
    fn context(&self) -> &ConcreteBaseAudioContext {
        self.registration().context()
    }

    /// Connect the output of this AudioNode to the input of another node.
    ///
    /// # Errors
    ///
    /// See [`Self::connect_from_output_to_input`]
    fn connect(&self, dest: &dyn AudioNode) -> Result<(), AudioGraphError> {
        self.connect_from_output_to_input(dest, 0, 0)
    }

    /// Connect a specific output of this AudioNode to a specific input of another node.
    ///
    /// Connecting the same pair twice has no further effect.
    ///
    /// # Errors
    ///
    /// - `InvalidStateError` when the context is closed
    /// - `IndexSizeError` if the input port is out of bounds for the destination node, or the
    ///   output port is out of bounds for this node
    /// - `SyntaxError` if the destination belongs to another context
    fn connect_from_output_to_input(
        &self,
        dest: &dyn AudioNode,
        output: usize,
        input: usize,
    ) -> Result<(), AudioGraphError> {
        self.registration()
            .handler()
            .connect(Some(dest.registration().handler()), output, input)
    }

    /// Connect the output of this AudioNode to the automation input of an [`AudioParam`]
    ///
    /// # Errors
    ///
    /// See [`Self::connect_param_from_output`]
    fn connect_param(&self, param: &AudioParam) -> Result<(), AudioGraphError> {
        self.connect_param_from_output(param, 0)
    }

    /// Connect a specific output of this AudioNode to the automation input of an [`AudioParam`]
    ///
    /// # Errors
    ///
    /// - `InvalidStateError` when the context is closed
    /// - `IndexSizeError` if the output port is out of bounds for this node
    /// - `SyntaxError` if the param belongs to another context
    fn connect_param_from_output(
        &self,
        param: &AudioParam,
        output: usize,
    ) -> Result<(), AudioGraphError> {
        self.registration()
            .handler()
            .connect_param(Some(param), output)
    }

    /// Disconnects all outgoing connections from the AudioNode.
    fn disconnect(&self) {
        self.registration().handler().disconnect();
    }

    /// Disconnects all outgoing connections at the given output port from the AudioNode.
    ///
    /// # Errors
    ///
    /// `IndexSizeError` if the output port is out of bounds for this node
    fn disconnect_output(&self, output: usize) -> Result<(), AudioGraphError> {
        self.registration().handler().disconnect_output(output)
    }

    /// Disconnects all outputs of the AudioNode that go to a specific destination AudioNode.
    ///
    /// # Errors
    ///
    /// `InvalidAccessError` when the source node was not connected to the destination node
    fn disconnect_dest(&self, dest: &dyn AudioNode) -> Result<(), AudioGraphError> {
        self.registration()
            .handler()
            .disconnect_node(dest.registration().handler(), None, None)
    }

    /// Disconnects a specific output of the AudioNode to a specific destination AudioNode
    ///
    /// # Errors
    ///
    /// - `IndexSizeError` if the output port is out of bounds for the source node
    /// - `InvalidAccessError` when the output was not connected to the destination node
    fn disconnect_dest_from_output(
        &self,
        dest: &dyn AudioNode,
        output: usize,
    ) -> Result<(), AudioGraphError> {
        self.registration()
            .handler()
            .disconnect_node(dest.registration().handler(), Some(output), None)
    }

    /// Disconnects a specific output of the AudioNode to a specific input of some destination
    /// AudioNode
    ///
    /// # Errors
    ///
    /// - `IndexSizeError` if the input port is out of bounds for the destination node, or the
    ///   output port is out of bounds for the source node
    /// - `InvalidAccessError` when the output was not connected to that input
    fn disconnect_dest_from_output_to_input(
        &self,
        dest: &dyn AudioNode,
        output: usize,
        input: usize,
    ) -> Result<(), AudioGraphError> {
        self.registration().handler().disconnect_node(
            dest.registration().handler(),
            Some(output),
            Some(input),
        )
    }

    /// Disconnects all outputs of the AudioNode that go to an [`AudioParam`]
    ///
    /// # Errors
    ///
    /// `InvalidAccessError` when this node is not connected to the param
    fn disconnect_param(&self, param: &AudioParam) -> Result<(), AudioGraphError> {
        self.registration().handler().disconnect_param(param, None)
    }

    /// Disconnects a specific output of the AudioNode from an [`AudioParam`]
    ///
    /// # Errors
    ///
    /// - `IndexSizeError` if the output port is out of bounds for this node
    /// - `InvalidAccessError` when the output is not connected to the param
    fn disconnect_param_from_output(
        &self,
        param: &AudioParam,
        output: usize,
    ) -> Result<(), AudioGraphError> {
        self.registration()
            .handler()
            .disconnect_param(param, Some(output))
    }

    /// The number of inputs feeding into the AudioNode. For source nodes, this will be 0.
    fn number_of_inputs(&self) -> usize {
        self.registration().handler().number_of_inputs()
    }

    /// The number of outputs coming out of the AudioNode.
    fn number_of_outputs(&self) -> usize {
        self.registration().handler().number_of_outputs()
    }

    /// Represents an enumerated value describing the way channels must be matched between the
    /// node's inputs and outputs.
    fn channel_count_mode(&self) -> ChannelCountMode {
        self.registration().handler().channel_count_mode()
    }

    /// Update the `channel_count_mode` attribute
    ///
    /// # Errors
    ///
    /// `NotSupportedError` when the node does not support the mode
    fn set_channel_count_mode(&self, v: ChannelCountMode) -> Result<(), AudioGraphError> {
        self.registration().handler().set_channel_count_mode(v);
        Ok(())
    }

    /// Represents an enumerated value describing the meaning of the channels. This interpretation
    /// will define how audio up-mixing and down-mixing will happen.
    fn channel_interpretation(&self) -> ChannelInterpretation {
        self.registration().handler().channel_interpretation()
    }

    /// Update the `channel_interpretation` attribute
    fn set_channel_interpretation(&self, v: ChannelInterpretation) {
        self.registration().handler().set_channel_interpretation(v);
    }

    /// Represents an integer used to determine how many channels are used when up-mixing and
    /// down-mixing connections to any inputs to the node.
    fn channel_count(&self) -> usize {
        self.registration().handler().channel_count()
    }

    /// Update the `channel_count` attribute
    ///
    /// # Errors
    ///
    /// `NotSupportedError` when the count is zero, exceeds [`crate::MAX_CHANNELS`], or is not
    /// supported by the node
    fn set_channel_count(&self, v: usize) -> Result<(), AudioGraphError> {
        self.registration().handler().set_channel_count(v)
    }
}
