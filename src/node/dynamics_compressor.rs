use std::sync::Arc;

use crate::context::{
    AudioContextRegistration, AudioParamId, BaseAudioContext, ConcreteBaseAudioContext,
};
use crate::graph::{AudioHandlerOptions, NodeType};
use crate::param::{
    create_audio_param, create_output_only_param, AudioParam, AudioParamDescriptor,
    AudioParamHandler, AutomationRate,
};
use crate::render::{AudioParamValues, AudioProcessor, AudioRenderQuantum, RenderScope};
use crate::{AudioGraphError, RENDER_QUANTUM_SIZE};

use super::{
    assert_stereo_channel_count, assert_stereo_channel_count_mode, AudioNode, AudioNodeOptions,
    ChannelCountMode, ChannelInterpretation,
};

/// Look-ahead of the compressor, the input is delayed by (at least) this many seconds
const LOOK_AHEAD: f64 = 0.006;

// Converting a value 𝑣 in decibels to linear gain unit means returning 10𝑣/20.
fn db_to_lin(val: f32) -> f32 {
    (10.0_f32).powf(val / 20.)
}

// Converting a value 𝑣 in linear gain unit to decibel means executing the following steps:
// If 𝑣 is equal to zero, return -1000.
// Else, return 20log10𝑣.
fn lin_to_db(val: f32) -> f32 {
    if val == 0. {
        -1000.
    } else {
        20. * val.log10() // 20 * log10(val);
    }
}

/// Options for constructing a [`DynamicsCompressorNode`]
// dictionary DynamicsCompressorOptions : AudioNodeOptions {
//   float attack = 0.003;
//   float knee = 30;
//   float ratio = 12;
//   float release = 0.25;
//   float threshold = -24;
// };
#[derive(Clone, Debug)]
pub struct DynamicsCompressorOptions {
    pub attack: f32,
    pub knee: f32,
    pub ratio: f32,
    pub release: f32,
    pub threshold: f32,
    pub audio_node_options: AudioNodeOptions,
}

impl Default for DynamicsCompressorOptions {
    fn default() -> Self {
        Self {
            attack: 0.003,   // seconds
            knee: 30.,       // dB
            ratio: 12.,      // unit less
            release: 0.25,   // seconds
            threshold: -24., // dB
            audio_node_options: AudioNodeOptions {
                channel_count: 2,
                channel_count_mode: ChannelCountMode::ClampedMax,
                channel_interpretation: ChannelInterpretation::Speakers,
            },
        }
    }
}

/// `DynamicsCompressorNode` provides a compression effect.
///
/// It lowers the volume of the loudest parts of the signal and raises the volume
/// of the softest parts. The output is stereo, and delayed by a short look-ahead.
///
/// The gain reduction applied in the last render quantum is published through the
/// [`reduction`](Self::reduction) param, whose value is computed by the node itself.
///
/// - see also: [`BaseAudioContext::create_dynamics_compressor`](crate::context::BaseAudioContext::create_dynamics_compressor)
#[derive(Debug)]
pub struct DynamicsCompressorNode {
    registration: AudioContextRegistration,
    attack: AudioParam,
    knee: AudioParam,
    ratio: AudioParam,
    release: AudioParam,
    threshold: AudioParam,
    reduction: AudioParam,
}

impl AudioNode for DynamicsCompressorNode {
    fn registration(&self) -> &AudioContextRegistration {
        &self.registration
    }

    fn set_channel_count(&self, count: usize) -> Result<(), AudioGraphError> {
        assert_stereo_channel_count(count)?;
        self.registration.handler().set_channel_count(count)
    }

    fn set_channel_count_mode(&self, mode: ChannelCountMode) -> Result<(), AudioGraphError> {
        assert_stereo_channel_count_mode(mode)?;
        self.registration.handler().set_channel_count_mode(mode);
        Ok(())
    }
}

impl DynamicsCompressorNode {
    /// # Errors
    ///
    /// `NotSupportedError` when the channel count exceeds two, or the mode is `Max`
    pub fn new<C: BaseAudioContext>(
        context: &C,
        options: DynamicsCompressorOptions,
    ) -> Result<Self, AudioGraphError> {
        assert_stereo_channel_count(options.audio_node_options.channel_count)?;
        assert_stereo_channel_count_mode(options.audio_node_options.channel_count_mode)?;
        Ok(Self::new_unchecked(context.base(), options))
    }

    pub(crate) fn new_unchecked(
        context: &ConcreteBaseAudioContext,
        options: DynamicsCompressorOptions,
    ) -> Self {
        let handler_options = AudioHandlerOptions {
            node_type: NodeType::DynamicsCompressor,
            number_of_inputs: 1,
            output_channels: vec![2],
            audio_node_options: options.audio_node_options.clone(),
        };

        let sample_rate = context.sample_rate();

        context.register(handler_options, move |registration| {
            // attack, knee, ratio, release and threshold are k-rate only
            let k_rate_param = |default_value, min_value, max_value, value| {
                let descriptor = AudioParamDescriptor {
                    min_value,
                    max_value,
                    default_value,
                    automation_rate: AutomationRate::K,
                };
                let (param, proc) = create_audio_param(descriptor, &registration);
                param.set_value(value);
                (param, proc)
            };

            let (attack_param, attack_proc) = k_rate_param(0.003, 0., 1., options.attack);
            let (knee_param, knee_proc) = k_rate_param(30., 0., 40., options.knee);
            let (ratio_param, ratio_proc) = k_rate_param(12., 1., 20., options.ratio);
            let (release_param, release_proc) = k_rate_param(0.25, 0., 1., options.release);
            let (threshold_param, threshold_proc) =
                k_rate_param(-24., -100., 0., options.threshold);

            let reduction_opts = AudioParamDescriptor {
                min_value: f32::MIN,
                max_value: f32::MAX,
                default_value: 0.,
                automation_rate: AutomationRate::K,
            };
            let (reduction_param, _) = create_output_only_param(reduction_opts, &registration);

            // define the number of quanta we need to have a delay line of ~6ms
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let ring_buffer_size =
                (sample_rate as f64 * LOOK_AHEAD / RENDER_QUANTUM_SIZE as f64).ceil() as usize
                    + 1;

            let render = DynamicsCompressorRenderer {
                attack: attack_proc,
                knee: knee_proc,
                ratio: ratio_proc,
                release: release_proc,
                threshold: threshold_proc,
                reduction: Arc::clone(reduction_param.handler()),
                ring_buffer: vec![DelayedQuantum::default(); ring_buffer_size],
                ring_index: 0,
                prev_detector_value: 0.,
                latency: (ring_buffer_size - 1) as f64 * RENDER_QUANTUM_SIZE as f64
                    / sample_rate as f64,
            };

            let node = DynamicsCompressorNode {
                registration,
                attack: attack_param,
                knee: knee_param,
                ratio: ratio_param,
                release: release_param,
                threshold: threshold_param,
                reduction: reduction_param,
            };

            (node, Box::new(render))
        })
    }

    pub fn attack(&self) -> &AudioParam {
        &self.attack
    }

    pub fn knee(&self) -> &AudioParam {
        &self.knee
    }

    pub fn ratio(&self) -> &AudioParam {
        &self.ratio
    }

    pub fn release(&self) -> &AudioParam {
        &self.release
    }

    pub fn threshold(&self) -> &AudioParam {
        &self.threshold
    }

    /// Gain reduction in dB currently applied by the compressor, a non-positive value
    ///
    /// The param is computed by the render thread, automations on it have no effect.
    pub fn reduction(&self) -> &AudioParam {
        &self.reduction
    }
}

/// A stereo render quantum held in the look-ahead delay line
///
/// Plain sample storage, so the processor stays `Send` while it waits to be adopted by the
/// render thread.
#[derive(Clone)]
struct DelayedQuantum {
    channels: [[f32; RENDER_QUANTUM_SIZE]; 2],
    silent: bool,
}

impl Default for DelayedQuantum {
    fn default() -> Self {
        Self {
            channels: [[0.; RENDER_QUANTUM_SIZE]; 2],
            silent: true,
        }
    }
}

struct DynamicsCompressorRenderer {
    attack: AudioParamId,
    knee: AudioParamId,
    ratio: AudioParamId,
    release: AudioParamId,
    threshold: AudioParamId,
    reduction: Arc<AudioParamHandler>,
    ring_buffer: Vec<DelayedQuantum>,
    ring_index: usize,
    prev_detector_value: f32,
    latency: f64,
}

// see also https://www.eecs.qmul.ac.uk/~josh/documents/2012/GiannoulisMassbergReiss-dynamicrangecompression-JAES2012.pdf
// follow Fig. 7 (c) diagram in paper
impl AudioProcessor for DynamicsCompressorRenderer {
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
        let sample_rate = scope.sample_rate;

        // setup values for compression curve
        let threshold = params.get(&self.threshold)[0];
        let knee = params.get(&self.knee)[0];
        let ratio = params.get(&self.ratio)[0];
        // @note: if knee != 0. we shadow threshold to match definitions of knee
        //   and threshold given in the paper, where knee is centered around threshold.
        //   We can thus reuse their formula for the gain computer stage.
        // yG =
        //     xG                                      if 2(xG − T) < −W
        //     xG + (1/R − 1)(xG − T + W/2)^2 / (2W)   if 2|(xG − T)| ≤ W
        //     T + (xG − T)/R                          if 2(xG − T) > W
        let threshold = if knee > 0. {
            threshold + knee / 2.
        } else {
            threshold
        };
        let half_knee = knee / 2.;
        // pre-compute for this block the constant part of the formula of the knee
        let knee_partial = (1. / ratio - 1.) / (2. * knee);

        // compute time constants for attack and release - eq. (7) in paper
        let attack = params.get(&self.attack)[0];
        let release = params.get(&self.release)[0];
        let attack_tau = (-1. / (attack * sample_rate)).exp();
        let release_tau = (-1. / (release * sample_rate)).exp();

        // Computing the makeup gain means executing the following steps:
        // - Let full range gain be the value returned by applying the compression curve to the value 1.0.
        // - Let full range makeup gain be the inverse of full range gain.
        // - Return the result of taking the 0.6 power of full range makeup gain.
        let full_range_gain = threshold + (-threshold / ratio);
        let full_range_makeup = 1. / db_to_lin(full_range_gain);
        let makeup_gain = lin_to_db(full_range_makeup.powf(0.6));

        let mut prev_detector_value = self.prev_detector_value;
        let mut reduction_gains = [0.; RENDER_QUANTUM_SIZE]; // lin

        for (i, reduction_gain) in reduction_gains.iter_mut().enumerate() {
            // pick highest value for this index across all input channels
            let max = input
                .channels()
                .iter()
                .map(|channel| channel[i].abs())
                .fold(0., f32::max);

            // pick absolute value and convert to dB domain
            // var xG in paper
            let sample_db = lin_to_db(max);

            // Gain Computer stage
            // var yG - eq. 4 in paper
            // if knee == 0. (hard knee), the `else if` branch is bypassed
            let sample_attenuated = if sample_db <= threshold - half_knee {
                sample_db
            } else if sample_db <= threshold + half_knee {
                sample_db + (sample_db - threshold + half_knee).powi(2) * knee_partial
            } else {
                threshold + (sample_db - threshold) / ratio
            };
            // variable xL in paper
            let sample_attenuation = sample_db - sample_attenuated;

            // Level Detector stage
            // Branching peak detector - eq. 16 in paper - var yL
            let detector_value = if sample_attenuation > prev_detector_value {
                attack_tau * prev_detector_value + (1. - attack_tau) * sample_attenuation
            } else {
                release_tau * prev_detector_value + (1. - release_tau) * sample_attenuation
            };

            // cdB = -yL + make up gain, converted to lin so we just multiply samples later
            *reduction_gain = db_to_lin(-detector_value + makeup_gain);
            prev_detector_value = detector_value;
        }

        self.prev_detector_value = prev_detector_value;
        // publish the reduction, without the makeup gain
        self.reduction.set_current_value(-prev_detector_value);

        // store the input, up-mixed to stereo, in the delay line
        let slot = &mut self.ring_buffer[self.ring_index];
        slot.silent = input.is_silent();
        if !slot.silent {
            let mut stereo = input.clone();
            stereo.mix(2, ChannelInterpretation::Speakers);
            slot.channels
                .iter_mut()
                .zip(stereo.channels())
                .for_each(|(s, c)| s.copy_from_slice(c));
        }

        // apply compression to delayed signal
        let read_index = (self.ring_index + 1) % self.ring_buffer.len();
        self.ring_index = read_index;
        let delayed = &self.ring_buffer[read_index];

        // nothing to compress, the output is already silent
        if delayed.silent {
            return;
        }

        output
            .channels_mut()
            .iter_mut()
            .zip(delayed.channels.iter())
            .for_each(|(o, d)| {
                o.iter_mut()
                    .zip(d.iter().zip(reduction_gains.iter()))
                    .for_each(|(o, (d, g))| *o = d * g);
            });
    }

    fn latency_time(&self) -> f64 {
        self.latency
    }
}

#[cfg(test)]
mod tests {
    use float_eq::assert_float_eq;

    use crate::buffer::AudioBuffer;
    use crate::context::OfflineAudioContext;
    use crate::node::AudioScheduledSourceNode;
    use crate::ErrorKind;

    use super::*;

    #[test]
    fn test_constructor_default() {
        let context = OfflineAudioContext::new(1, 1, 44_100.).unwrap();
        let compressor = DynamicsCompressorNode::new(&context, Default::default()).unwrap();

        assert_float_eq!(compressor.attack().value(), 0.003, abs <= 0.);
        assert_float_eq!(compressor.knee().value(), 30., abs <= 0.);
        assert_float_eq!(compressor.ratio().value(), 12., abs <= 0.);
        assert_float_eq!(compressor.release().value(), 0.25, abs <= 0.);
        assert_float_eq!(compressor.threshold().value(), -24., abs <= 0.);
        assert_float_eq!(compressor.reduction().value(), 0., abs <= 0.);
        assert_eq!(compressor.channel_count_mode(), ChannelCountMode::ClampedMax);
    }

    #[test]
    fn test_constructor_non_default() {
        let context = OfflineAudioContext::new(1, 1, 44_100.).unwrap();
        let compressor = DynamicsCompressorNode::new(
            &context,
            DynamicsCompressorOptions {
                attack: 0.5,
                knee: 12.,
                ratio: 1.,
                release: 0.75,
                threshold: -60.,
                ..DynamicsCompressorOptions::default()
            },
        )
        .unwrap();

        assert_float_eq!(compressor.attack().value(), 0.5, abs <= 0.);
        assert_float_eq!(compressor.knee().value(), 12., abs <= 0.);
        assert_float_eq!(compressor.ratio().value(), 1., abs <= 0.);
        assert_float_eq!(compressor.release().value(), 0.75, abs <= 0.);
        assert_float_eq!(compressor.threshold().value(), -60., abs <= 0.);
    }

    #[test]
    fn test_channel_constraints() {
        let context = OfflineAudioContext::new(1, 1, 44_100.).unwrap();

        let mut options = DynamicsCompressorOptions::default();
        options.audio_node_options.channel_count = 3;
        let err = DynamicsCompressorNode::new(&context, options).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotSupportedError);

        let mut options = DynamicsCompressorOptions::default();
        options.audio_node_options.channel_count_mode = ChannelCountMode::Max;
        let err = DynamicsCompressorNode::new(&context, options).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotSupportedError);

        let compressor = context.create_dynamics_compressor();
        assert!(compressor.set_channel_count(3).is_err());
        assert!(compressor.set_channel_count_mode(ChannelCountMode::Max).is_err());
        compressor.set_channel_count(1).unwrap();
        assert_eq!(compressor.channel_count(), 1);
    }

    #[test]
    fn test_inner_delay() {
        let sample_rate = 44_100.;
        // index of the first non zero sample, rounded at next block after
        // compressor theoretical delay, i.e. 3 blocks at this sample_rate
        let non_zero_index = (LOOK_AHEAD * sample_rate as f64 / RENDER_QUANTUM_SIZE as f64)
            .ceil() as usize
            * RENDER_QUANTUM_SIZE;

        let mut context = OfflineAudioContext::new(2, 128 * 8, sample_rate).unwrap();

        let compressor = context.create_dynamics_compressor();
        compressor.connect(&context.destination()).unwrap();

        let buffer = AudioBuffer::from(vec![vec![1.; 128 * 5]], sample_rate);

        let src = context.create_buffer_source();
        src.set_buffer(buffer).unwrap();
        src.connect(&compressor).unwrap();
        src.start().unwrap();

        let res = context.start_rendering_sync().unwrap();

        for channel_number in 0..2 {
            let chan = res.get_channel_data(channel_number);

            // this is the delay
            assert_float_eq!(
                chan[0..non_zero_index],
                vec![0.; non_zero_index][..],
                abs_all <= 0.
            );

            // as some compression is applied, we just check the remaining is non zero
            for sample in chan.iter().take(128 * 8).skip(non_zero_index) {
                assert!(*sample != 0.);
            }
        }

        assert!(compressor.reduction().value() < 0.);
    }

    #[test]
    fn test_db_to_lin() {
        assert_float_eq!(db_to_lin(0.), 1., abs <= 0.);
        assert_float_eq!(db_to_lin(-20.), 0.1, abs <= 1e-8);
        assert_float_eq!(db_to_lin(-40.), 0.01, abs <= 1e-8);
        assert_float_eq!(db_to_lin(-60.), 0.001, abs <= 1e-8);
    }

    #[test]
    fn test_lin_to_db() {
        assert_float_eq!(lin_to_db(1.), 0., abs <= 0.);
        assert_float_eq!(lin_to_db(0.1), -20., abs <= 0.);
        assert_float_eq!(lin_to_db(0.01), -40., abs <= 0.);
        assert_float_eq!(lin_to_db(0.001), -60., abs <= 0.);
        // special case
        assert_float_eq!(lin_to_db(0.), -1000., abs <= 0.);
    }
}
