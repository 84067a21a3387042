use crate::context::{
    AudioContextRegistration, AudioParamId, BaseAudioContext, ConcreteBaseAudioContext,
};
use crate::graph::{AudioHandlerOptions, NodeType};
use crate::param::{create_audio_param, AudioParam, AudioParamDescriptor, AutomationRate};
use crate::render::{AudioParamValues, AudioProcessor, AudioRenderQuantum, RenderScope};
use crate::AudioGraphError;

use super::{AudioNode, AudioNodeOptions, AudioScheduledSourceNode, Scheduler};

/// Options for constructing an [`ConstantSourceNode`]
// dictionary ConstantSourceOptions {
//   float offset = 1;
// };
#[derive(Clone, Debug)]
pub struct ConstantSourceOptions {
    pub offset: f32,
}

impl Default for ConstantSourceOptions {
    fn default() -> Self {
        Self { offset: 1. }
    }
}

/// Audio source whose output is nominally a constant value. A `ConstantSourceNode`
/// can be used as a constructible `AudioParam` by automating the value of its offset.
///
/// - see also: [`BaseAudioContext::create_constant_source`](crate::context::BaseAudioContext::create_constant_source)
///
/// # Usage
///
/// ```
/// use web_audio_graph::context::{BaseAudioContext, OfflineAudioContext};
/// use web_audio_graph::node::{AudioNode, AudioScheduledSourceNode};
///
/// let context = OfflineAudioContext::new(1, 128, 44_100.).unwrap();
///
/// let gain1 = context.create_gain();
/// gain1.gain().set_value(0.);
///
/// let gain2 = context.create_gain();
/// gain2.gain().set_value(0.);
///
/// let automation = context.create_constant_source();
/// automation.offset().set_value(0.);
/// automation.connect_param(gain1.gain()).unwrap();
/// automation.connect_param(gain2.gain()).unwrap();
/// automation.start().unwrap();
///
/// // control both `GainNode`s with 1 automation
/// automation.offset().linear_ramp_to_value_at_time(1., 0.1).unwrap();
/// ```
#[derive(Debug)]
pub struct ConstantSourceNode {
    registration: AudioContextRegistration,
    offset: AudioParam,
    scheduler: Scheduler,
}

impl AudioNode for ConstantSourceNode {
    fn registration(&self) -> &AudioContextRegistration {
        &self.registration
    }
}

impl AudioScheduledSourceNode for ConstantSourceNode {
    fn start_at(&self, when: f64) -> Result<(), AudioGraphError> {
        self.scheduler.start_at(when)?;
        self.registration
            .context()
            .notify_source_node_started_processing(self.registration.id());
        Ok(())
    }

    fn stop_at(&self, when: f64) -> Result<(), AudioGraphError> {
        self.scheduler.stop_at(when)
    }
}

impl ConstantSourceNode {
    pub fn new<C: BaseAudioContext>(context: &C, options: ConstantSourceOptions) -> Self {
        Self::new_unchecked(context.base(), options)
    }

    pub(crate) fn new_unchecked(
        context: &ConcreteBaseAudioContext,
        options: ConstantSourceOptions,
    ) -> Self {
        let handler_options = AudioHandlerOptions {
            node_type: NodeType::ConstantSource,
            number_of_inputs: 0,
            output_channels: vec![1],
            audio_node_options: AudioNodeOptions::default(),
        };

        context.register(handler_options, move |registration| {
            let param_opts = AudioParamDescriptor {
                min_value: f32::MIN,
                max_value: f32::MAX,
                default_value: 1.,
                automation_rate: AutomationRate::A,
            };
            let (param, proc) = create_audio_param(param_opts, &registration);
            param.set_value(options.offset);

            let scheduler = Scheduler::new();

            let render = ConstantSourceRenderer {
                offset: proc,
                scheduler: scheduler.clone(),
                ended: false,
            };

            let node = ConstantSourceNode {
                registration,
                offset: param,
                scheduler,
            };

            (node, Box::new(render))
        })
    }

    pub fn offset(&self) -> &AudioParam {
        &self.offset
    }
}

struct ConstantSourceRenderer {
    offset: AudioParamId,
    scheduler: Scheduler,
    ended: bool,
}

impl AudioProcessor for ConstantSourceRenderer {
    fn process(
        &mut self,
        _inputs: &[AudioRenderQuantum],
        outputs: &mut [AudioRenderQuantum],
        params: AudioParamValues<'_>,
        scope: &RenderScope,
    ) {
        // single output node
        let output = &mut outputs[0];

        let dt = 1. / scope.sample_rate as f64;
        let next_block_time = scope.end_time();

        let start_time = self.scheduler.get_start_at();
        let stop_time = self.scheduler.get_stop_at();

        if start_time >= next_block_time {
            return;
        }

        if stop_time <= scope.current_time {
            self.ended = true;
            scope.finish();
            return;
        }

        let offset_values = params.get(&self.offset);
        let output_channel = output.channel_data_mut(0);

        if offset_values.len() == 1
            && start_time <= scope.current_time
            && stop_time >= next_block_time
        {
            output_channel.fill(offset_values[0]);
        } else {
            let mut current_time = scope.current_time;

            // the offset values are already computed at sub-sample accuracy, only copy them to
            // their right place
            output_channel
                .iter_mut()
                .zip(offset_values.iter().cycle())
                .for_each(|(o, &value)| {
                    if current_time >= start_time && current_time < stop_time {
                        *o = value;
                    }
                    current_time += dt;
                });
        }

        if stop_time < next_block_time {
            self.ended = true;
            scope.finish();
        }
    }

    fn propagates_silence(&self, _last_non_silent_time: f64, scope: &RenderScope) -> bool {
        self.ended || self.scheduler.get_start_at() >= scope.end_time()
    }

    fn handle_stoppable_source(&mut self, scope: &RenderScope) -> bool {
        if !self.ended && self.scheduler.get_stop_at() <= scope.current_time {
            self.ended = true;
        }
        self.ended
    }
}
