use crate::context::{
    AudioContextRegistration, AudioParamId, BaseAudioContext, ConcreteBaseAudioContext,
};
use crate::graph::{AudioHandlerOptions, NodeType};
use crate::param::{create_audio_param, AudioParam, AudioParamDescriptor, AutomationRate};
use crate::render::{AudioParamValues, AudioProcessor, AudioRenderQuantum, RenderScope};
use crate::{validate_number_of_channels, AudioGraphError};

use super::{AudioNode, AudioNodeOptions};

/// Options for constructing a [`GainNode`]
// dictionary GainOptions : AudioNodeOptions {
//   float gain = 1.0;
// };
#[derive(Clone, Debug)]
pub struct GainOptions {
    pub gain: f32,
    pub audio_node_options: AudioNodeOptions,
}

impl Default for GainOptions {
    fn default() -> Self {
        Self {
            gain: 1.,
            audio_node_options: AudioNodeOptions::default(),
        }
    }
}

/// AudioNode for volume control
///
/// The output has as many channels as the computed channel count of the input.
#[derive(Debug)]
pub struct GainNode {
    registration: AudioContextRegistration,
    gain: AudioParam,
}

impl AudioNode for GainNode {
    fn registration(&self) -> &AudioContextRegistration {
        &self.registration
    }
}

impl GainNode {
    /// # Errors
    ///
    /// `NotSupportedError` for an invalid channel count
    pub fn new<C: BaseAudioContext>(
        context: &C,
        options: GainOptions,
    ) -> Result<Self, AudioGraphError> {
        validate_number_of_channels(options.audio_node_options.channel_count)?;
        Ok(Self::new_unchecked(context.base(), options))
    }

    pub(crate) fn new_unchecked(context: &ConcreteBaseAudioContext, options: GainOptions) -> Self {
        let GainOptions {
            gain,
            audio_node_options,
        } = options;

        let handler_options = AudioHandlerOptions {
            node_type: NodeType::Gain,
            number_of_inputs: 1,
            output_channels: vec![1],
            audio_node_options,
        };

        context.register(handler_options, move |registration| {
            let param_opts = AudioParamDescriptor {
                min_value: f32::MIN,
                max_value: f32::MAX,
                default_value: 1.,
                automation_rate: AutomationRate::A,
            };
            let (param, proc) = create_audio_param(param_opts, &registration);

            param.set_value(gain);

            let render = GainRenderer { gain: proc };

            let node = GainNode {
                registration,
                gain: param,
            };

            (node, Box::new(render))
        })
    }

    pub fn gain(&self) -> &AudioParam {
        &self.gain
    }
}

struct GainRenderer {
    gain: AudioParamId,
}

impl AudioProcessor for GainRenderer {
    fn process(
        &mut self,
        inputs: &[AudioRenderQuantum],
        outputs: &mut [AudioRenderQuantum],
        params: AudioParamValues<'_>,
        _scope: &RenderScope,
    ) {
        // single input/output node
        let input = &inputs[0];
        let output = &mut outputs[0];

        if input.is_silent() {
            output.make_silent();
            return;
        }

        let gain = params.get(&self.gain);

        // very fast track for mute or pass-through
        if gain.len() == 1 {
            // 1e-6 is -120 dB when close to 0 and ±8.283506e-6 dB when close to 1
            // very probably small enough to not be audible
            let threshold = 1e-6;

            let diff_to_zero = gain[0].abs();
            if diff_to_zero <= threshold {
                output.make_silent();
                return;
            }

            let diff_to_one = (1. - gain[0]).abs();
            if diff_to_one <= threshold {
                *output = input.clone();
                return;
            }
        }

        *output = input.clone();

        if gain.len() == 1 {
            let g = gain[0];

            output.channels_mut().iter_mut().for_each(|channel| {
                channel.iter_mut().for_each(|o| *o *= g);
            });
        } else {
            output.channels_mut().iter_mut().for_each(|channel| {
                channel
                    .iter_mut()
                    .zip(gain.iter().cycle())
                    .for_each(|(o, g)| *o *= g);
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::OfflineAudioContext;
    use crate::node::AudioScheduledSourceNode;

    use float_eq::assert_float_eq;

    #[test]
    fn test_audioparam_value_applies_immediately() {
        let context = OfflineAudioContext::new(1, 128, 48_000.).unwrap();
        let options = GainOptions {
            gain: 12.,
            ..Default::default()
        };
        let src = GainNode::new(&context, options).unwrap();
        assert_float_eq!(src.gain.value(), 12., abs <= 0.);
    }

    #[test]
    fn test_invalid_channel_count() {
        let context = OfflineAudioContext::new(1, 128, 48_000.).unwrap();
        let options = GainOptions {
            audio_node_options: AudioNodeOptions {
                channel_count: 0,
                ..AudioNodeOptions::default()
            },
            ..Default::default()
        };
        assert!(GainNode::new(&context, options).is_err());
    }

    #[test]
    fn test_gain() {
        let mut context = OfflineAudioContext::new(2, 256, 44_100.).unwrap();

        let gain = context.create_gain();
        gain.gain().set_value(0.5);
        gain.connect(&context.destination()).unwrap();

        let src = context.create_constant_source();
        src.connect(&gain).unwrap();
        src.start().unwrap();

        let output = context.start_rendering_sync().unwrap();

        // mono up-mixed to stereo at the destination
        assert_float_eq!(output.get_channel_data(0), &[0.5; 256][..], abs_all <= 0.);
        assert_float_eq!(output.get_channel_data(1), &[0.5; 256][..], abs_all <= 0.);
    }

    #[test]
    fn test_gain_automation() {
        let mut context = OfflineAudioContext::new(1, 128, 12_800.).unwrap();

        let gain = context.create_gain();
        gain.gain().set_value_at_time(0., 0.).unwrap();
        gain.gain()
            .linear_ramp_to_value_at_time(1., 128. / 12_800.)
            .unwrap();
        gain.connect(&context.destination()).unwrap();

        let src = context.create_constant_source();
        src.connect(&gain).unwrap();
        src.start().unwrap();

        let output = context.start_rendering_sync().unwrap();
        let channel = output.get_channel_data(0);

        assert_float_eq!(channel[0], 0., abs <= 1e-6);
        assert_float_eq!(channel[64], 0.5, abs <= 1e-6);
        assert_float_eq!(channel[127], 127. / 128., abs <= 1e-6);
    }
}
