//! The stereo panner control and renderer parts
use std::f32::consts::FRAC_PI_2;

use crate::context::{
    AudioContextRegistration, AudioParamId, BaseAudioContext, ConcreteBaseAudioContext,
};
use crate::graph::{AudioHandlerOptions, NodeType};
use crate::param::{create_audio_param, AudioParam, AudioParamDescriptor, AutomationRate};
use crate::render::{AudioParamValues, AudioProcessor, AudioRenderQuantum, RenderScope};
use crate::AudioGraphError;

use super::{
    assert_stereo_channel_count, assert_stereo_channel_count_mode, AudioNode, AudioNodeOptions,
    ChannelCountMode, ChannelInterpretation,
};

/// Options for constructing a [`StereoPannerNode`]
// dictionary StereoPannerOptions : AudioNodeOptions {
//   float pan = 0;
// };
#[derive(Clone, Debug)]
pub struct StereoPannerOptions {
    /// initial value for the pan parameter
    pub pan: f32,
    /// audio node options
    pub audio_node_options: AudioNodeOptions,
}

impl Default for StereoPannerOptions {
    fn default() -> Self {
        Self {
            pan: 0.,
            audio_node_options: AudioNodeOptions {
                channel_count: 2,
                channel_count_mode: ChannelCountMode::ClampedMax,
                channel_interpretation: ChannelInterpretation::Speakers,
            },
        }
    }
}

/// Equal power gains for a position x ∈ [0, 1] derived from pan
#[inline(always)]
fn get_stereo_gains(x: f32) -> [f32; 2] {
    let angle = x * FRAC_PI_2;
    [angle.cos(), angle.sin()]
}

/// `StereoPannerNode` positions an incoming audio stream in a stereo image
///
/// It is an audio-processing module that positions an incoming audio stream
/// in a stereo image using a low-cost equal-power panning algorithm. The output is always
/// stereo.
///
/// - see also: [`BaseAudioContext::create_stereo_panner`](crate::context::BaseAudioContext::create_stereo_panner)
///
/// # Usage
///
/// ```
/// use web_audio_graph::context::{BaseAudioContext, OfflineAudioContext};
/// use web_audio_graph::node::{AudioNode, AudioScheduledSourceNode};
///
/// let mut context = OfflineAudioContext::new(2, 128, 44_100.).unwrap();
///
/// let panner = context.create_stereo_panner();
/// panner.connect(&context.destination()).unwrap();
/// // position source on the left
/// panner.pan().set_value(-1.);
///
/// let src = context.create_constant_source();
/// src.connect(&panner).unwrap();
/// src.start().unwrap();
///
/// let output = context.start_rendering_sync().unwrap();
/// assert_eq!(output.get_channel_data(0)[0], 1.);
/// assert_eq!(output.get_channel_data(1)[0], 0.);
/// ```
#[derive(Debug)]
pub struct StereoPannerNode {
    /// Represents the node instance and its associated audio context
    registration: AudioContextRegistration,
    /// The position of the input in the output’s stereo image. -1 represents
    /// full left, +1 represents full right.
    pan: AudioParam,
}

impl AudioNode for StereoPannerNode {
    fn registration(&self) -> &AudioContextRegistration {
        &self.registration
    }

    fn set_channel_count_mode(&self, mode: ChannelCountMode) -> Result<(), AudioGraphError> {
        assert_stereo_channel_count_mode(mode)?;
        self.registration.handler().set_channel_count_mode(mode);
        Ok(())
    }

    fn set_channel_count(&self, count: usize) -> Result<(), AudioGraphError> {
        assert_stereo_channel_count(count)?;
        self.registration.handler().set_channel_count(count)
    }
}

impl StereoPannerNode {
    /// # Errors
    ///
    /// `NotSupportedError` when the channel count exceeds two, or the mode is `Max`
    pub fn new<C: BaseAudioContext>(
        context: &C,
        options: StereoPannerOptions,
    ) -> Result<Self, AudioGraphError> {
        assert_stereo_channel_count(options.audio_node_options.channel_count)?;
        assert_stereo_channel_count_mode(options.audio_node_options.channel_count_mode)?;
        Ok(Self::new_unchecked(context.base(), options))
    }

    pub(crate) fn new_unchecked(
        context: &ConcreteBaseAudioContext,
        options: StereoPannerOptions,
    ) -> Self {
        let StereoPannerOptions {
            pan,
            audio_node_options,
        } = options;

        let handler_options = AudioHandlerOptions {
            node_type: NodeType::StereoPanner,
            number_of_inputs: 1,
            output_channels: vec![2],
            audio_node_options,
        };

        context.register(handler_options, move |registration| {
            let pan_options = AudioParamDescriptor {
                default_value: 0.,
                min_value: -1.,
                max_value: 1.,
                automation_rate: AutomationRate::A,
            };
            let (pan_param, pan_proc) = create_audio_param(pan_options, &registration);
            pan_param.set_value(pan);

            let renderer = StereoPannerRenderer { pan: pan_proc };

            let node = Self {
                registration,
                pan: pan_param,
            };

            (node, Box::new(renderer))
        })
    }

    /// Returns the pan audio parameter
    pub fn pan(&self) -> &AudioParam {
        &self.pan
    }
}

/// `StereoPannerRenderer` represents the rendering part of `StereoPannerNode`
struct StereoPannerRenderer {
    /// Position of the input in the output’s stereo image.
    /// -1 represents full left, +1 represents full right.
    pan: AudioParamId,
}

impl AudioProcessor for StereoPannerRenderer {
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

        // a-rate param, a single value when there is no automation in this quantum
        let pan_values = params.get(&self.pan);

        let [left, right] = output.stereo_mut();

        match input.number_of_channels() {
            1 => {
                if pan_values.len() == 1 {
                    let x = (pan_values[0] + 1.) * 0.5;
                    let [gain_left, gain_right] = get_stereo_gains(x);

                    left.iter_mut()
                        .zip(right.iter_mut())
                        .zip(input.channel_data(0).iter())
                        .for_each(|((l, r), input)| {
                            *l = input * gain_left;
                            *r = input * gain_right;
                        });
                } else {
                    left.iter_mut()
                        .zip(right.iter_mut())
                        .zip(pan_values.iter())
                        .zip(input.channel_data(0).iter())
                        .for_each(|(((l, r), pan), input)| {
                            let x = (pan + 1.) * 0.5;
                            let [gain_left, gain_right] = get_stereo_gains(x);

                            *l = input * gain_left;
                            *r = input * gain_right;
                        });
                }
            }
            2 => {
                let pan_stereo = |pan: f32, input_left: f32, input_right: f32| {
                    if pan <= 0. {
                        let [gain_left, gain_right] = get_stereo_gains(pan + 1.);
                        [input_right.mul_add(gain_left, input_left), input_right * gain_right]
                    } else {
                        let [gain_left, gain_right] = get_stereo_gains(pan);
                        [input_left * gain_left, input_left.mul_add(gain_right, input_right)]
                    }
                };

                left.iter_mut()
                    .zip(right.iter_mut())
                    .zip(pan_values.iter().cycle())
                    .zip(input.channel_data(0).iter())
                    .zip(input.channel_data(1).iter())
                    .for_each(|((((l, r), &pan), &input_left), &input_right)| {
                        [*l, *r] = pan_stereo(pan, input_left, input_right);
                    });
            }
            // the channel count constraints keep the input mono or stereo
            n => unreachable!("StereoPannerNode input with {} channels", n),
        }
    }
}

#[cfg(test)]
mod tests {
    use float_eq::assert_float_eq;
    use std::f32::consts::PI;

    use crate::buffer::AudioBuffer;
    use crate::context::{BaseAudioContext, OfflineAudioContext};
    use crate::node::AudioScheduledSourceNode;
    use crate::ErrorKind;

    use super::*;

    fn render_panned(buffer: &AudioBuffer, options: StereoPannerOptions) -> AudioBuffer {
        let mut context = OfflineAudioContext::new(2, 128, 44_100.).unwrap();
        let panner = StereoPannerNode::new(&context, options).unwrap();
        panner.connect(&context.destination()).unwrap();

        let src = context.create_buffer_source();
        src.connect(&panner).unwrap();
        src.set_buffer(buffer.clone()).unwrap();
        src.start().unwrap();

        context.start_rendering_sync().unwrap()
    }

    fn mono_options(pan: f32) -> StereoPannerOptions {
        // force channel count to mono
        StereoPannerOptions {
            audio_node_options: AudioNodeOptions {
                channel_count: 1,
                channel_count_mode: ChannelCountMode::ClampedMax,
                ..AudioNodeOptions::default()
            },
            pan,
        }
    }

    #[test]
    fn test_constructor() {
        let context = OfflineAudioContext::new(2, 1, 44_100.).unwrap();
        let panner = context.create_stereo_panner();
        assert_float_eq!(panner.pan().value(), 0., abs <= 0.);
        assert_eq!(panner.channel_count(), 2);
        assert_eq!(panner.channel_count_mode(), ChannelCountMode::ClampedMax);
        assert_eq!(panner.number_of_outputs(), 1);
    }

    #[test]
    fn test_init_with_channel_count_mode() {
        let context = OfflineAudioContext::new(2, 1, 44_100.).unwrap();
        let options = StereoPannerOptions {
            audio_node_options: AudioNodeOptions {
                channel_count_mode: ChannelCountMode::Explicit,
                ..AudioNodeOptions::default()
            },
            ..StereoPannerOptions::default()
        };
        let panner = StereoPannerNode::new(&context, options).unwrap();
        assert_eq!(panner.channel_count_mode(), ChannelCountMode::Explicit);
    }

    #[test]
    fn test_channel_constraints() {
        let context = OfflineAudioContext::new(2, 1, 44_100.).unwrap();
        let options = StereoPannerOptions {
            audio_node_options: AudioNodeOptions {
                channel_count_mode: ChannelCountMode::Max,
                ..AudioNodeOptions::default()
            },
            ..StereoPannerOptions::default()
        };
        let err = StereoPannerNode::new(&context, options).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotSupportedError);

        let panner = context.create_stereo_panner();
        let err = panner.set_channel_count(3).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotSupportedError);
        let err = panner.set_channel_count_mode(ChannelCountMode::Max).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotSupportedError);
        assert_eq!(panner.channel_count(), 2);
    }

    #[test]
    fn test_get_stereo_gains() {
        for i in 0..1001 {
            let x = i as f32 / 1000.;
            let [gain_left, gain_right] = get_stereo_gains(x);

            assert_float_eq!(gain_left, (x * PI / 2.).cos(), abs <= 1e-6);
            assert_float_eq!(gain_right, (x * PI / 2.).sin(), abs <= 1e-6);
            // equal power
            assert_float_eq!(
                gain_left * gain_left + gain_right * gain_right,
                1.,
                abs <= 1e-6
            );
        }
    }

    #[test]
    fn test_mono_panning() {
        let buffer = AudioBuffer::from(vec![vec![1.; 128]], 44_100.);

        // left
        let res = render_panned(&buffer, mono_options(-1.));
        assert_float_eq!(res.get_channel_data(0)[..], [1.; 128], abs_all <= 0.);
        assert_float_eq!(res.get_channel_data(1)[..], [0.; 128], abs_all <= 0.);

        // right
        let res = render_panned(&buffer, mono_options(1.));
        assert_float_eq!(res.get_channel_data(0)[..], [0.; 128], abs_all <= 1e-7);
        assert_float_eq!(res.get_channel_data(1)[..], [1.; 128], abs_all <= 0.);

        // equal power
        let res = render_panned(&buffer, mono_options(0.));
        let mut power = [0.; 128];
        power
            .iter_mut()
            .zip(res.get_channel_data(0).iter())
            .zip(res.get_channel_data(1).iter())
            .for_each(|((p, l), r)| {
                *p = l * l + r * r;
            });
        assert_float_eq!(power, [1.; 128], abs_all <= 1e-6);
    }

    #[test]
    fn test_stereo_panning() {
        let buffer = AudioBuffer::from(vec![vec![1.; 128], vec![1.; 128]], 44_100.);

        let options = |pan| StereoPannerOptions {
            pan,
            ..StereoPannerOptions::default()
        };

        // left
        let res = render_panned(&buffer, options(-1.));
        assert_float_eq!(res.get_channel_data(0)[..], [2.; 128], abs_all <= 0.);
        assert_float_eq!(res.get_channel_data(1)[..], [0.; 128], abs_all <= 0.);

        // right
        let res = render_panned(&buffer, options(1.));
        assert_float_eq!(res.get_channel_data(0)[..], [0.; 128], abs_all <= 1e-7);
        assert_float_eq!(res.get_channel_data(1)[..], [2.; 128], abs_all <= 0.);

        // middle
        let res = render_panned(&buffer, options(0.));
        assert_float_eq!(res.get_channel_data(0)[..], [1.; 128], abs_all <= 1e-7);
        assert_float_eq!(res.get_channel_data(1)[..], [1.; 128], abs_all <= 0.);
    }

    #[test]
    fn test_pan_automation() {
        let mut context = OfflineAudioContext::new(2, 128, 12_800.).unwrap();

        let panner = context.create_stereo_panner();
        panner.connect(&context.destination()).unwrap();
        panner.pan().set_value_at_time(-1., 0.).unwrap();
        panner.pan().set_value_at_time(1., 64. / 12_800.).unwrap();

        let src = context.create_constant_source();
        src.connect(&panner).unwrap();
        src.start().unwrap();

        let res = context.start_rendering_sync().unwrap();
        let left = res.get_channel_data(0);
        let right = res.get_channel_data(1);

        // sample accurate switch from full left to full right
        assert_float_eq!(left[..64], [1.; 64][..], abs_all <= 1e-7);
        assert_float_eq!(right[..64], [0.; 64][..], abs_all <= 1e-7);
        assert_float_eq!(left[64..], [0.; 64][..], abs_all <= 1e-7);
        assert_float_eq!(right[64..], [1.; 64][..], abs_all <= 1e-7);
    }
}
