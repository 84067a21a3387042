//! AudioParam interface
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};

use crate::context::{AudioContextRegistration, AudioNodeId, AudioParamId, ConcreteBaseAudioContext};
use crate::graph::ParamRef;
use crate::render::{AudioRenderQuantum, RenderScope};
use crate::{AtomicF32, AudioGraphError, RENDER_QUANTUM_SIZE};

/// Precision of value calculation per render quantum
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum AutomationRate {
    /// Audio Rate - sampled for each sample-frame of the block
    A,
    /// Control Rate - sampled at the time of the very first sample-frame,
    /// then used for the entire block
    K,
}

/// Options for constructing an [`AudioParam`]
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct AudioParamDescriptor {
    pub automation_rate: AutomationRate,
    pub default_value: f32,
    pub min_value: f32,
    pub max_value: f32,
}

#[derive(Copy, Clone, Debug, PartialEq)]
enum AutomationEvent {
    SetValue { value: f32, time: f64 },
    LinearRamp { value: f32, time: f64 },
}

impl AutomationEvent {
    fn time(&self) -> f64 {
        match self {
            Self::SetValue { time, .. } | Self::LinearRamp { time, .. } => *time,
        }
    }

    fn value(&self) -> f32 {
        match self {
            Self::SetValue { value, .. } | Self::LinearRamp { value, .. } => *value,
        }
    }
}

/// Scheduled automation events, sorted by time
#[derive(Debug)]
struct Timeline {
    events: Vec<AutomationEvent>,
    /// the last event that has passed: start point of a subsequent ramp
    anchor: (f64, f32),
}

impl Timeline {
    fn insert(&mut self, event: AutomationEvent) {
        // events at equal times keep their insertion order
        let position = self.events.partition_point(|e| e.time() <= event.time());
        self.events.insert(position, event);
    }

    fn cancel(&mut self, cancel_time: f64) {
        self.events.retain(|e| e.time() < cancel_time);
    }

    /// Drop the events that passed before `time`, remembering the last one as the anchor
    fn prune(&mut self, time: f64) {
        let passed = self.events.partition_point(|e| e.time() <= time);
        if let Some(last) = self.events[..passed].last() {
            self.anchor = (last.time(), last.value());
        }
        self.events.drain(..passed);
    }

    /// An event falls inside the quantum, or a ramp spans it
    fn has_sample_accurate_values(&self, end_time: f64) -> bool {
        match self.events.first() {
            Some(AutomationEvent::LinearRamp { .. }) => true,
            Some(event) => event.time() < end_time,
            None => false,
        }
    }

    fn value_at(&self, time: f64, next: usize, previous: (f64, f32)) -> f32 {
        match self.events.get(next) {
            Some(&AutomationEvent::LinearRamp {
                value,
                time: end_time,
            }) => {
                let (start_time, start_value) = previous;
                if end_time <= start_time {
                    return value;
                }
                let t = ((time - start_time) / (end_time - start_time)) as f32;
                start_value + (value - start_value) * t
            }
            _ => previous.1,
        }
    }

    /// Fill `values` with the value at each frame starting from `start_time`
    fn calculate_sample_accurate_values(&self, start_time: f64, sample_rate: f32, values: &mut [f32]) {
        let dt = 1. / sample_rate as f64;
        let mut next = 0;
        let mut previous = self.anchor;

        values.iter_mut().enumerate().for_each(|(i, v)| {
            let time = start_time + i as f64 * dt;
            while let Some(event) = self.events.get(next) {
                if event.time() > time {
                    break;
                }
                previous = (event.time(), event.value());
                next += 1;
            }
            *v = self.value_at(time, next, previous);
        });
    }
}

/// State of an [`AudioParam`] shared between the control and the render thread
///
/// The render thread only ever tries the timeline lock. When it is contended, the value of the
/// previous quantum is held.
#[derive(Debug)]
pub(crate) struct AudioParamHandler {
    descriptor: AudioParamDescriptor,
    current_value: AtomicF32,
    timeline: Mutex<Timeline>,
    /// Value computed by the node itself (e.g. a gain reduction meter), never automated
    output_only: bool,
}

impl AudioParamHandler {
    fn new(descriptor: AudioParamDescriptor, output_only: bool) -> Self {
        Self {
            descriptor,
            current_value: AtomicF32::new(descriptor.default_value),
            timeline: Mutex::new(Timeline {
                events: Vec::new(),
                anchor: (0., descriptor.default_value),
            }),
            output_only,
        }
    }

    pub fn current_value(&self) -> f32 {
        self.current_value.load(Ordering::Acquire)
    }

    /// Publish a value computed on the render thread (output only params)
    pub fn set_current_value(&self, value: f32) {
        self.current_value.store(value, Ordering::Release);
    }

    fn clamp(&self, value: f32) -> f32 {
        value.clamp(self.descriptor.min_value, self.descriptor.max_value)
    }

    /// Compute the values of this param for the render quantum described by `scope`
    ///
    /// `input` is the mono mix-down of the node outputs connected to this param, if any. The
    /// result is a single value unless automation events or connections demand per-frame
    /// values; a-rate params then expose 128 values, k-rate params the value at the start of
    /// the quantum.
    pub fn compute(
        &self,
        scope: &RenderScope,
        input: Option<&AudioRenderQuantum>,
        output: &mut AudioRenderQuantum,
    ) {
        let values = output.channel_data_mut(0);

        let sample_accurate = if self.output_only {
            values[0] = self.current_value();
            false
        } else if let Ok(mut timeline) = self.timeline.try_lock() {
            timeline.prune(scope.current_time);
            let sample_accurate = self.descriptor.automation_rate == AutomationRate::A
                && (input.is_some() || timeline.has_sample_accurate_values(scope.end_time()));

            if sample_accurate {
                timeline.calculate_sample_accurate_values(
                    scope.current_time,
                    scope.sample_rate,
                    &mut values[..],
                );
            } else {
                timeline.calculate_sample_accurate_values(
                    scope.current_time,
                    scope.sample_rate,
                    &mut values[..1],
                );
            }
            sample_accurate
        } else {
            log::trace!("automation timeline contended, holding value");
            let sample_accurate =
                self.descriptor.automation_rate == AutomationRate::A && input.is_some();
            if sample_accurate {
                values.fill(self.current_value());
            } else {
                values[0] = self.current_value();
            }
            sample_accurate
        };

        let len = if sample_accurate {
            RENDER_QUANTUM_SIZE
        } else {
            1
        };

        if let Some(input) = input {
            let signal = input.channel_data(0);
            values[..len]
                .iter_mut()
                .zip(signal.iter())
                .for_each(|(v, s)| *v += s);
        }

        values[..len].iter_mut().for_each(|v| *v = self.clamp(*v));

        if !self.output_only {
            self.current_value.store(values[len - 1], Ordering::Release);
        }
        output.set_single_valued(!sample_accurate);
    }
}

/// AudioParam controls an individual aspect of an AudioNode's functionality, such as volume.
///
/// Its value can be set directly, scheduled on a timeline, or driven by the output of other
/// nodes connected to it. Parameters are created together with their node, see
/// [`crate::node`].
pub struct AudioParam {
    context: ConcreteBaseAudioContext,
    owner: AudioNodeId,
    index: AudioParamId,
    handler: Arc<AudioParamHandler>,
}

impl std::fmt::Debug for AudioParam {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioParam")
            .field("owner", &self.owner)
            .field("value", &self.value())
            .field("descriptor", &self.handler.descriptor)
            .finish_non_exhaustive()
    }
}

impl AudioParam {
    pub fn automation_rate(&self) -> AutomationRate {
        self.handler.descriptor.automation_rate
    }

    pub fn default_value(&self) -> f32 {
        self.handler.descriptor.default_value
    }

    pub fn min_value(&self) -> f32 {
        self.handler.descriptor.min_value
    }

    pub fn max_value(&self) -> f32 {
        self.handler.descriptor.max_value
    }

    /// Retrieve the current value of the `AudioParam`.
    ///
    /// This is the value computed in the most recent render quantum, or the value most
    /// recently assigned through [`Self::set_value`].
    pub fn value(&self) -> f32 {
        self.handler.current_value()
    }

    /// Set the value of the `AudioParam`, clamped to the nominal range
    ///
    /// Equivalent to scheduling the value at the current time of the context.
    pub fn set_value(&self, value: f32) -> &Self {
        let value = self.handler.clamp(value);
        self.handler.set_current_value(value);

        let time = self.context.current_time();
        self.handler.timeline.lock().unwrap().insert(AutomationEvent::SetValue { value, time });
        self
    }

    /// Schedules a parameter value change at the given time.
    ///
    /// # Errors
    ///
    /// `RangeError` when the value or the time is not finite, or the time is negative
    pub fn set_value_at_time(&self, value: f32, start_time: f64) -> Result<&Self, AudioGraphError> {
        validate_event(value, start_time)?;
        self.handler
            .timeline
            .lock()
            .unwrap()
            .insert(AutomationEvent::SetValue {
                value,
                time: start_time,
            });
        Ok(self)
    }

    /// Schedules a linear continuous change in parameter value from the previous scheduled
    /// parameter value to the given value.
    ///
    /// # Errors
    ///
    /// `RangeError` when the value or the time is not finite, or the time is negative
    pub fn linear_ramp_to_value_at_time(
        &self,
        value: f32,
        end_time: f64,
    ) -> Result<&Self, AudioGraphError> {
        validate_event(value, end_time)?;
        self.handler
            .timeline
            .lock()
            .unwrap()
            .insert(AutomationEvent::LinearRamp {
                value,
                time: end_time,
            });
        Ok(self)
    }

    /// Cancels all scheduled parameter changes with times greater than or equal to
    /// `cancel_time`.
    ///
    /// # Errors
    ///
    /// `RangeError` when the time is negative or not finite
    pub fn cancel_scheduled_values(&self, cancel_time: f64) -> Result<&Self, AudioGraphError> {
        validate_time(cancel_time)?;
        self.handler.timeline.lock().unwrap().cancel(cancel_time);
        Ok(self)
    }

    pub(crate) fn context(&self) -> &ConcreteBaseAudioContext {
        &self.context
    }

    pub(crate) fn param_ref(&self) -> ParamRef {
        ParamRef::new(self.owner, self.index.0)
    }

    pub(crate) fn handler(&self) -> &Arc<AudioParamHandler> {
        &self.handler
    }
}

fn validate_time(time: f64) -> Result<(), AudioGraphError> {
    if !time.is_finite() || time < 0. {
        return Err(AudioGraphError::range(format!(
            "time should be a finite non-negative number, got {:?}",
            time
        )));
    }
    Ok(())
}

fn validate_event(value: f32, time: f64) -> Result<(), AudioGraphError> {
    if !value.is_finite() {
        return Err(AudioGraphError::range(format!(
            "value should be finite, got {:?}",
            value
        )));
    }
    validate_time(time)
}

fn create_param(
    descriptor: AudioParamDescriptor,
    registration: &AudioContextRegistration,
    output_only: bool,
) -> (AudioParam, AudioParamId) {
    let handler = Arc::new(AudioParamHandler::new(descriptor, output_only));
    let context = registration.context().clone();
    let owner = registration.id();

    let index = context.lock().add_param(owner, Arc::clone(&handler));
    let index = AudioParamId(index);

    let param = AudioParam {
        context,
        owner,
        index,
        handler,
    };

    (param, index)
}

/// Create an `AudioParam` of the node being registered
///
/// The returned id gives the processor access to the computed values, through
/// [`AudioParamValues`](crate::render::AudioParamValues).
pub(crate) fn create_audio_param(
    descriptor: AudioParamDescriptor,
    registration: &AudioContextRegistration,
) -> (AudioParam, AudioParamId) {
    create_param(descriptor, registration, false)
}

/// Create an `AudioParam` whose value is computed by the processor itself
pub(crate) fn create_output_only_param(
    descriptor: AudioParamDescriptor,
    registration: &AudioContextRegistration,
) -> (AudioParam, AudioParamId) {
    create_param(descriptor, registration, true)
}

#[cfg(test)]
mod tests {
    use float_eq::assert_float_eq;

    use super::*;
    use crate::render::Alloc;

    const DESCRIPTOR: AudioParamDescriptor = AudioParamDescriptor {
        automation_rate: AutomationRate::A,
        default_value: 0.,
        min_value: -10.,
        max_value: 10.,
    };

    fn compute(handler: &AudioParamHandler, frame: u64, input: Option<&AudioRenderQuantum>) -> Vec<f32> {
        let alloc = Alloc::with_capacity(4);
        let mut output = alloc.silent_quantum(1);
        let scope = RenderScope::new(frame, 128.);
        handler.compute(&scope, input, &mut output);
        let len = if output.single_valued() { 1 } else { 128 };
        output.channel_data(0)[..len].to_vec()
    }

    #[test]
    fn test_default_value_is_single_valued() {
        let handler = AudioParamHandler::new(DESCRIPTOR, false);
        assert_float_eq!(&compute(&handler, 0, None)[..], &[0.][..], abs_all <= 0.);
    }

    #[test]
    fn test_set_value_at_time_inside_quantum() {
        let handler = AudioParamHandler::new(DESCRIPTOR, false);
        handler
            .timeline
            .lock()
            .unwrap()
            .insert(AutomationEvent::SetValue { value: 5., time: 0.5 });

        // sample rate is 128: the event falls at frame 64
        let values = compute(&handler, 0, None);
        assert_eq!(values.len(), 128);
        assert_float_eq!(values[63], 0., abs <= 0.);
        assert_float_eq!(values[64], 5., abs <= 0.);

        // next quantum holds the value
        assert_float_eq!(&compute(&handler, 128, None)[..], &[5.][..], abs_all <= 0.);
        assert_float_eq!(handler.current_value(), 5., abs <= 0.);
    }

    #[test]
    fn test_linear_ramp() {
        let handler = AudioParamHandler::new(DESCRIPTOR, false);
        {
            let mut timeline = handler.timeline.lock().unwrap();
            timeline.insert(AutomationEvent::LinearRamp { value: 2., time: 2. });
            timeline.insert(AutomationEvent::SetValue { value: 0., time: 0. });
        }

        let values = compute(&handler, 0, None);
        assert_float_eq!(values[0], 0., abs <= 1e-6);
        assert_float_eq!(values[64], 0.5, abs <= 1e-6);

        let values = compute(&handler, 128, None);
        assert_float_eq!(values[0], 1., abs <= 1e-6);

        // ramp done
        let values = compute(&handler, 256, None);
        assert_float_eq!(&values[..], &[2.][..], abs_all <= 1e-6);
    }

    #[test]
    fn test_k_rate_is_single_valued() {
        let descriptor = AudioParamDescriptor {
            automation_rate: AutomationRate::K,
            ..DESCRIPTOR
        };
        let handler = AudioParamHandler::new(descriptor, false);
        handler
            .timeline
            .lock()
            .unwrap()
            .insert(AutomationEvent::LinearRamp { value: 1., time: 1. });

        let values = compute(&handler, 0, None);
        assert_float_eq!(&values[..], &[0.][..], abs_all <= 0.);
    }

    #[test]
    fn test_connected_input_is_added_and_clamped() {
        let handler = AudioParamHandler::new(DESCRIPTOR, false);
        handler
            .timeline
            .lock()
            .unwrap()
            .insert(AutomationEvent::SetValue { value: 3., time: 0. });

        let alloc = Alloc::with_capacity(2);
        let mut input = alloc.silent_quantum(1);
        input.channel_data_mut(0).fill(1.);
        input.channel_data_mut(0)[127] = 100.;

        let values = compute(&handler, 0, Some(&input));
        assert_eq!(values.len(), 128);
        assert_float_eq!(values[0], 4., abs <= 0.);
        assert_float_eq!(values[126], 4., abs <= 0.);
        assert_float_eq!(values[127], 10., abs <= 0.);
    }

    #[test]
    fn test_cancel_scheduled_values() {
        let mut timeline = Timeline {
            events: Vec::new(),
            anchor: (0., 0.),
        };
        timeline.insert(AutomationEvent::SetValue { value: 1., time: 1. });
        timeline.insert(AutomationEvent::SetValue { value: 2., time: 2. });
        timeline.insert(AutomationEvent::SetValue { value: 3., time: 1. });
        assert_eq!(timeline.events[1], AutomationEvent::SetValue { value: 3., time: 1. });

        timeline.cancel(2.);
        assert_eq!(timeline.events.len(), 2);

        timeline.prune(1.5);
        assert!(timeline.events.is_empty());
        assert_eq!(timeline.anchor, (1., 3.));
    }

    #[test]
    fn test_output_only_param_reports_current_value() {
        let handler = AudioParamHandler::new(DESCRIPTOR, true);
        handler.set_current_value(-3.);
        assert_float_eq!(&compute(&handler, 0, None)[..], &[-3.][..], abs_all <= 0.);
    }

    #[test]
    fn test_validate_event() {
        assert!(validate_event(1., 0.).is_ok());
        assert_eq!(
            validate_event(1., -1.).unwrap_err().kind(),
            crate::ErrorKind::RangeError
        );
        assert!(validate_event(f32::NAN, 1.).is_err());
        assert!(validate_time(f64::INFINITY).is_err());
    }
}
