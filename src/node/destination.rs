use crate::context::AudioContextRegistration;
use crate::render::{AudioParamValues, AudioProcessor, AudioRenderQuantum, RenderScope};
use crate::AudioGraphError;

use super::{AudioNode, ChannelCountMode};

/// The AudioDestinationNode interface represents the terminal node of an audio
/// graph in a given context: the node that "records" the audio data of an
/// [`OfflineAudioContext`](crate::context::OfflineAudioContext).
///
/// Its single input is summed and mixed to the channel count of the context, and that mix is
/// the rendered output. The destination lives as long as its context, dropping an
/// `AudioDestinationNode` only drops a handle to it.
///
/// - see also: [`BaseAudioContext::destination`](crate::context::BaseAudioContext::destination)
///
/// # Usage
///
/// ```
/// use web_audio_graph::context::{BaseAudioContext, OfflineAudioContext};
/// use web_audio_graph::node::{AudioNode, AudioScheduledSourceNode};
///
/// let context = OfflineAudioContext::new(2, 128, 44_100.).unwrap();
///
/// let src = context.create_constant_source();
/// src.connect(&context.destination()).unwrap();
/// src.start().unwrap();
/// ```
#[derive(Debug)]
pub struct AudioDestinationNode {
    registration: AudioContextRegistration,
}

impl AudioNode for AudioDestinationNode {
    fn registration(&self) -> &AudioContextRegistration {
        &self.registration
    }

    fn set_channel_count(&self, v: usize) -> Result<(), AudioGraphError> {
        if v > self.max_channel_count() {
            return Err(AudioGraphError::index_size(format!(
                "channel count cannot be greater than maxChannelCount ({})",
                self.max_channel_count()
            )));
        }
        if v != self.max_channel_count() {
            return Err(AudioGraphError::not_supported(
                "not allowed to change OfflineAudioContext destination channel count",
            ));
        }
        self.registration.handler().set_channel_count(v)
    }

    fn set_channel_count_mode(&self, _v: ChannelCountMode) -> Result<(), AudioGraphError> {
        // the channel count mode of an offline destination is fixed
        Err(AudioGraphError::invalid_state(
            "AudioDestinationNode has channel count mode constraints",
        ))
    }
}

impl AudioDestinationNode {
    pub(crate) fn from_registration(registration: AudioContextRegistration) -> Self {
        Self { registration }
    }

    /// The maximum number of channels that the channelCount attribute can be set to, the number
    /// of channels of the rendered output.
    /// <https://www.w3.org/TR/webaudio/#dom-audiodestinationnode-maxchannelcount>
    pub fn max_channel_count(&self) -> usize {
        self.registration.context().max_channel_count()
    }
}

/// The render graph reads the summed input bus of the destination directly, there is nothing
/// left to process
pub(crate) struct DestinationRenderer;

impl AudioProcessor for DestinationRenderer {
    fn process(
        &mut self,
        _inputs: &[AudioRenderQuantum],
        _outputs: &mut [AudioRenderQuantum],
        _params: AudioParamValues<'_>,
        _scope: &RenderScope,
    ) {
    }
}
