use crate::context::{
    AudioContextRegistration, AudioParamId, BaseAudioContext, ConcreteBaseAudioContext,
};
use crate::graph::{AudioHandlerOptions, NodeType};
use crate::param::{create_audio_param, AudioParam, AudioParamDescriptor, AutomationRate};
use crate::render::{AudioParamValues, AudioProcessor, AudioRenderQuantum, RenderScope};
use crate::{validate_number_of_channels, AudioGraphError, RENDER_QUANTUM_SIZE};

use super::{AudioNode, AudioNodeOptions};

/// Upper bound (exclusive) of the maximum delay time, in seconds
const MAX_DELAY_TIME: f64 = 180.;

/// Options for constructing a [`DelayNode`]
// dictionary DelayOptions : AudioNodeOptions {
//   double maxDelayTime = 1;
//   double delayTime = 0;
// };
#[derive(Clone, Debug)]
pub struct DelayOptions {
    pub max_delay_time: f64,
    pub delay_time: f64,
    pub audio_node_options: AudioNodeOptions,
}

impl Default for DelayOptions {
    fn default() -> Self {
        Self {
            max_delay_time: 1.,
            delay_time: 0.,
            audio_node_options: AudioNodeOptions::default(),
        }
    }
}

/// Node that delays the incoming audio signal by a certain amount
///
/// The delay is sample accurate, fractional delays are linearly interpolated. The output has
/// as many channels as the computed channel count of the input.
///
/// The node keeps rendering its tail (the maximum delay time) after its input went silent, and
/// keeps its outputs enabled when nothing references it anymore.
///
/// - see also: [`BaseAudioContext::create_delay`](crate::context::BaseAudioContext::create_delay)
#[derive(Debug)]
pub struct DelayNode {
    registration: AudioContextRegistration,
    delay_time: AudioParam,
}

impl AudioNode for DelayNode {
    fn registration(&self) -> &AudioContextRegistration {
        &self.registration
    }
}

impl DelayNode {
    /// # Errors
    ///
    /// - `NotSupportedError` when `max_delay_time` is not in the range (0, 180) seconds
    /// - `NotSupportedError` for an invalid channel count
    pub fn new<C: BaseAudioContext>(
        context: &C,
        options: DelayOptions,
    ) -> Result<Self, AudioGraphError> {
        let max_delay_time = options.max_delay_time;
        if !(max_delay_time > 0. && max_delay_time < MAX_DELAY_TIME) {
            return Err(AudioGraphError::not_supported(format!(
                "max delay time {:?} is outside range (0, {:?})",
                max_delay_time, MAX_DELAY_TIME
            )));
        }
        validate_number_of_channels(options.audio_node_options.channel_count)?;

        Ok(Self::new_unchecked(context.base(), options))
    }

    pub(crate) fn new_unchecked(context: &ConcreteBaseAudioContext, options: DelayOptions) -> Self {
        let DelayOptions {
            max_delay_time,
            delay_time,
            audio_node_options,
        } = options;

        let handler_options = AudioHandlerOptions {
            node_type: NodeType::Delay,
            number_of_inputs: 1,
            output_channels: vec![1],
            audio_node_options,
        };

        let sample_rate = context.sample_rate() as f64;

        context.register(handler_options, move |registration| {
            #[allow(clippy::cast_possible_truncation)]
            let param_opts = AudioParamDescriptor {
                min_value: 0.,
                max_value: max_delay_time as f32,
                default_value: 0.,
                automation_rate: AutomationRate::A,
            };
            let (param, proc) = create_audio_param(param_opts, &registration);

            param.set_value(delay_time as f32);

            // large enough to hold the maximum delay, plus one frame to interpolate from
            let max_delay_frames = max_delay_time * sample_rate;
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let buffer_length = max_delay_frames.ceil() as usize + 2;

            let render = DelayRenderer {
                delay_time: proc,
                max_delay_time,
                max_delay_frames,
                buffer_length,
                ring_buffers: Vec::new(),
                write_index: 0,
            };

            let node = DelayNode {
                registration,
                delay_time: param,
            };

            (node, Box::new(render))
        })
    }

    /// A-rate [`AudioParam`] representing the amount of delay (in seconds) to apply
    pub fn delay_time(&self) -> &AudioParam {
        &self.delay_time
    }
}

struct DelayRenderer {
    delay_time: AudioParamId,
    max_delay_time: f64,
    max_delay_frames: f64,
    buffer_length: usize,
    /// one delay line per channel, grown when the input gains channels
    ring_buffers: Vec<Vec<f32>>,
    write_index: usize,
}

impl DelayRenderer {
    /// Read the delay line `delay_frames` behind `write_index`
    fn read(&self, channel: usize, write_index: usize, delay_frames: f64) -> f32 {
        let buffer = &self.ring_buffers[channel];
        let length = self.buffer_length as f64;

        let mut read_position = write_index as f64 - delay_frames;
        if read_position < 0. {
            read_position += length;
        }

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let read_index1 = read_position as usize % self.buffer_length;
        let read_index2 = (read_index1 + 1) % self.buffer_length;
        let interpolation_factor = (read_position - read_position.floor()) as f32;

        let sample1 = buffer[read_index1];
        let sample2 = buffer[read_index2];
        sample1 + interpolation_factor * (sample2 - sample1)
    }
}

impl AudioProcessor for DelayRenderer {
    fn process(
        &mut self,
        inputs: &[AudioRenderQuantum],
        outputs: &mut [AudioRenderQuantum],
        params: AudioParamValues<'_>,
        scope: &RenderScope,
    ) {
        // single input/output node
        let input = &inputs[0];
        let output = &mut outputs[0];

        let number_of_channels = input.number_of_channels();
        if self.ring_buffers.len() < number_of_channels {
            self.ring_buffers
                .resize(number_of_channels, vec![0.; self.buffer_length]);
        }

        let sample_rate = scope.sample_rate as f64;
        let delay_values = params.get(&self.delay_time);
        let delay_frames = |i: usize| {
            let delay = delay_values[i.min(delay_values.len() - 1)] as f64;
            (delay * sample_rate).clamp(0., self.max_delay_frames)
        };

        let write_index = self.write_index;
        let output_channels = output.number_of_channels();

        for channel in 0..self.ring_buffers.len() {
            // channels the input lost keep flushing their delay line with silence
            let input_channel = input
                .channels()
                .get(channel)
                .filter(|c| !c.is_silent())
                .map(|c| &c[..]);

            let mut index = write_index;
            let mut delayed = [0.; RENDER_QUANTUM_SIZE];
            for (i, d) in delayed.iter_mut().enumerate() {
                self.ring_buffers[channel][index] = input_channel.map_or(0., |c| c[i]);
                *d = self.read(channel, index, delay_frames(i));
                index = (index + 1) % self.buffer_length;
            }

            if channel < output_channels {
                output.channel_data_mut(channel).copy_from_slice(&delayed);
            }
        }

        self.write_index = (write_index + RENDER_QUANTUM_SIZE) % self.buffer_length;
    }

    fn tail_time(&self) -> f64 {
        self.max_delay_time
    }
}
