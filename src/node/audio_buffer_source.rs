use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crate::buffer::AudioBuffer;
use crate::context::{
    AudioContextRegistration, AudioParamId, BaseAudioContext, ConcreteBaseAudioContext,
};
use crate::graph::{AudioHandlerOptions, NodeType, OutputRef};
use crate::param::{create_audio_param, AudioParam, AudioParamDescriptor, AutomationRate};
use crate::render::{AudioParamValues, AudioProcessor, AudioRenderQuantum, RenderScope};
use crate::{AtomicF64, AudioGraphError, MAX_CHANNELS, RENDER_QUANTUM_SIZE};

use super::{AudioNode, AudioNodeOptions, AudioScheduledSourceNode, Scheduler};

/// Highest total pitch rate, in buffer frames per output frame
const MAX_RATE: f64 = 1024.;
/// Frames rendered past the requested end of a grain
const GRAIN_PADDING_FRAMES: usize = 512;
/// Slack before an unpulled source is considered finished
const EXTRA_STOP_FRAMES: f64 = 256.;
/// Grain duration used until the buffer duration is known
const DEFAULT_GRAIN_DURATION: f64 = 0.020;

/// Options for constructing an [`AudioBufferSourceNode`]
// dictionary AudioBufferSourceOptions {
//   AudioBuffer? buffer;
//   float detune = 0;
//   boolean loop = false;
//   double loopEnd = 0;
//   double loopStart = 0;
//   float playbackRate = 1;
// };
#[derive(Clone, Debug)]
pub struct AudioBufferSourceOptions {
    pub buffer: Option<AudioBuffer>,
    pub loop_: bool,
    pub loop_start: f64,
    pub loop_end: f64,
    pub playback_rate: f32,
}

impl Default for AudioBufferSourceOptions {
    fn default() -> Self {
        Self {
            buffer: None,
            loop_: false,
            loop_start: 0.,
            loop_end: 0.,
            playback_rate: 1.,
        }
    }
}

/// Loop attributes, read by the renderer without locking
#[derive(Debug)]
struct LoopControl {
    loop_: AtomicBool,
    loop_start: AtomicF64,
    loop_end: AtomicF64,
}

/// A sub-range of the buffer to play, requested through the offset and duration arguments of
/// `start`
#[derive(Copy, Clone, Debug)]
struct Grain {
    offset: f64,
    duration: f64,
    duration_given: bool,
}

/// Playback state guarded by the process lock
///
/// The control thread takes the lock when changing buffers, the render thread only tries it
/// and renders silence when it is contended.
#[derive(Debug, Default)]
struct SourceState {
    buffer: Option<AudioBuffer>,
    grain: Option<Grain>,
    /// read position in buffer frames, fractional when resampling
    virtual_read_index: f64,
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn time_to_sample_frame(time: f64, sample_rate: f64) -> usize {
    (time * sample_rate).round().max(0.) as usize
}

impl SourceState {
    /// Clip the grain offset and duration to lie within the buffer
    ///
    /// Returns the stop time implied by a looping grain with an explicit duration.
    fn clamp_grain_parameters(&mut self, start_time: f64, loop_: bool) -> Option<f64> {
        let (Some(buffer), Some(grain)) = (self.buffer.as_ref(), self.grain.as_mut()) else {
            return None;
        };
        let buffer_duration = buffer.duration();

        grain.offset = grain.offset.clamp(0., buffer_duration);

        if !grain.duration_given {
            grain.duration = buffer_duration - grain.offset;
        }

        let mut stop_time = None;
        if grain.duration_given && loop_ {
            // play the loop as often as fits in the duration, as if stop(when + duration) had
            // been called
            grain.duration = grain.duration.max(0.);
            stop_time = Some(start_time + grain.duration);
        } else {
            grain.duration = grain.duration.clamp(0., buffer_duration - grain.offset);
        }

        // aligned to the sample frame, so playback at rate 1 is identical to the buffer data
        self.virtual_read_index =
            time_to_sample_frame(grain.offset, buffer.sample_rate() as f64) as f64;

        stop_time
    }
}

/// `AudioBufferSourceNode` represents an audio source that consists of an
/// in-memory audio source, stored in an [`AudioBuffer`].
///
/// The output has as many channels as the buffer (mono without buffer). Playback can be
/// resampled through the `playback_rate` param, looped, or restricted to a grain of the
/// buffer.
///
/// - see also: [`BaseAudioContext::create_buffer_source`](crate::context::BaseAudioContext::create_buffer_source)
///
/// # Usage
///
/// ```
/// use web_audio_graph::buffer::AudioBuffer;
/// use web_audio_graph::context::{BaseAudioContext, OfflineAudioContext};
/// use web_audio_graph::node::{AudioNode, AudioScheduledSourceNode};
///
/// let mut context = OfflineAudioContext::new(1, 128, 44_100.).unwrap();
///
/// let buffer = AudioBuffer::from(vec![vec![0.5; 64]], 44_100.);
/// let src = context.create_buffer_source();
/// src.set_buffer(buffer).unwrap();
/// src.connect(&context.destination()).unwrap();
/// src.start().unwrap();
///
/// let output = context.start_rendering_sync().unwrap();
/// assert_eq!(output.get_channel_data(0)[63], 0.5);
/// assert_eq!(output.get_channel_data(0)[64], 0.);
/// ```
#[derive(Debug)]
pub struct AudioBufferSourceNode {
    registration: AudioContextRegistration,
    playback_rate: AudioParam,
    scheduler: Scheduler,
    loop_control: Arc<LoopControl>,
    state: Arc<Mutex<SourceState>>,
}

impl AudioNode for AudioBufferSourceNode {
    fn registration(&self) -> &AudioContextRegistration {
        &self.registration
    }
}

impl AudioScheduledSourceNode for AudioBufferSourceNode {
    fn start_at(&self, when: f64) -> Result<(), AudioGraphError> {
        self.start_source(when, None)
    }

    fn stop_at(&self, when: f64) -> Result<(), AudioGraphError> {
        self.scheduler.stop_at(when)
    }
}

impl AudioBufferSourceNode {
    /// # Errors
    ///
    /// `NotSupportedError` when the given buffer has too many channels
    pub fn new<C: BaseAudioContext>(
        context: &C,
        options: AudioBufferSourceOptions,
    ) -> Result<Self, AudioGraphError> {
        let buffer = options.buffer.clone();
        let node = Self::new_unchecked(context.base(), options);
        if let Some(buffer) = buffer {
            node.set_buffer(buffer)?;
        }
        Ok(node)
    }

    /// The buffer option is ignored
    pub(crate) fn new_unchecked(
        context: &ConcreteBaseAudioContext,
        options: AudioBufferSourceOptions,
    ) -> Self {
        let AudioBufferSourceOptions {
            loop_,
            loop_start,
            loop_end,
            playback_rate,
            ..
        } = options;

        // mono until a buffer is set
        let handler_options = AudioHandlerOptions {
            node_type: NodeType::AudioBufferSource,
            number_of_inputs: 0,
            output_channels: vec![1],
            audio_node_options: AudioNodeOptions::default(),
        };

        context.register(handler_options, move |registration| {
            let param_opts = AudioParamDescriptor {
                min_value: f32::MIN,
                max_value: f32::MAX,
                default_value: 1.,
                automation_rate: AutomationRate::K,
            };
            let (param, playback_rate_id) = create_audio_param(param_opts, &registration);
            param.set_value(playback_rate);

            let scheduler = Scheduler::new();
            let loop_control = Arc::new(LoopControl {
                loop_: AtomicBool::new(loop_),
                loop_start: AtomicF64::new(loop_start),
                loop_end: AtomicF64::new(loop_end),
            });
            let state = Arc::new(Mutex::new(SourceState::default()));

            let render = AudioBufferSourceRenderer {
                playback_rate: playback_rate_id,
                scheduler: scheduler.clone(),
                loop_control: Arc::clone(&loop_control),
                state: Arc::clone(&state),
                ended: false,
            };

            let node = Self {
                registration,
                playback_rate: param,
                scheduler,
                loop_control,
                state,
            };

            (node, Box::new(render))
        })
    }

    /// Current buffer value (nullable)
    pub fn buffer(&self) -> Option<AudioBuffer> {
        self.state.lock().unwrap().buffer.clone()
    }

    /// Provide an [`AudioBuffer`] as the source of data to be played back
    ///
    /// The output takes the channel count of the buffer, and playback restarts from the start
    /// of the buffer (or of the grain).
    ///
    /// # Errors
    ///
    /// `NotSupportedError` when the buffer has more channels than supported
    pub fn set_buffer(&self, buffer: AudioBuffer) -> Result<(), AudioGraphError> {
        // the graph lock, since the number of output channels changes
        let mut graph = self.registration.context().lock();
        // synchronizes with the renderer
        let mut state = self.state.lock().unwrap();

        let number_of_channels = buffer.number_of_channels();
        if number_of_channels > MAX_CHANNELS {
            return Err(AudioGraphError::not_supported(format!(
                "number of input channels {} is outside range [1, {}]",
                number_of_channels, MAX_CHANNELS
            )));
        }

        graph.set_output_channel_count(
            OutputRef::new(self.registration.id(), 0),
            number_of_channels,
        );

        state.buffer = Some(buffer);
        state.virtual_read_index = 0.;

        // a grain requested before the buffer was known is validated now
        let stop_time = state.clamp_grain_parameters(self.scheduler.get_start_at(), self.loop_());
        if let Some(stop_time) = stop_time {
            self.scheduler.stop_at(stop_time)?;
        }

        Ok(())
    }

    /// K-rate [`AudioParam`] that defines the speed at which the [`AudioBuffer`]
    /// will be played, e.g.:
    /// - 0.5 will play the file at half speed
    /// - 1 will play the file at normal speed
    ///
    /// The total rate is clamped to (0, 1024], a rate of zero plays at normal speed.
    pub fn playback_rate(&self) -> &AudioParam {
        &self.playback_rate
    }

    /// Defines if the playback the [`AudioBuffer`] should be looped
    pub fn loop_(&self) -> bool {
        self.loop_control.loop_.load(Ordering::Acquire)
    }

    pub fn set_loop(&self, value: bool) {
        self.loop_control.loop_.store(value, Ordering::Release);
    }

    /// Defines the loop start point, in the time reference of the [`AudioBuffer`]
    pub fn loop_start(&self) -> f64 {
        self.loop_control.loop_start.load(Ordering::Acquire)
    }

    pub fn set_loop_start(&self, value: f64) {
        self.loop_control.loop_start.store(value, Ordering::Release);
    }

    /// Defines the loop end point, in the time reference of the [`AudioBuffer`]
    pub fn loop_end(&self) -> f64 {
        self.loop_control.loop_end.load(Ordering::Acquire)
    }

    pub fn set_loop_end(&self, value: f64) {
        self.loop_control.loop_end.store(value, Ordering::Release);
    }

    /// Start the playback at the given time and with a given offset, until the end of the
    /// buffer
    ///
    /// # Errors
    ///
    /// `InvalidStateError` if the source was already started, or an argument is negative
    pub fn start_at_with_offset(&self, start: f64, offset: f64) -> Result<(), AudioGraphError> {
        self.start_source(
            start,
            Some(Grain {
                offset,
                duration: 0.,
                duration_given: false,
            }),
        )
    }

    /// Start the playback at the given time, with a given offset, for a given duration
    ///
    /// The grain is clipped to the buffer. A looping grain plays for `duration` seconds.
    ///
    /// # Errors
    ///
    /// `InvalidStateError` if the source was already started, or an argument is negative
    pub fn start_at_with_offset_and_duration(
        &self,
        start: f64,
        offset: f64,
        duration: f64,
    ) -> Result<(), AudioGraphError> {
        self.start_source(
            start,
            Some(Grain {
                offset,
                duration,
                duration_given: true,
            }),
        )
    }

    fn start_source(&self, when: f64, grain: Option<Grain>) -> Result<(), AudioGraphError> {
        if self.scheduler.is_started() {
            return Err(AudioGraphError::invalid_state(
                "cannot call start more than once",
            ));
        }

        let check = |name: &str, value: f64| {
            if value.is_finite() && value >= 0. {
                Ok(())
            } else {
                Err(AudioGraphError::invalid_state(format!(
                    "{} must be a non-negative number: {:?}",
                    name, value
                )))
            }
        };
        check("start time", when)?;
        if let Some(grain) = grain {
            check("offset", grain.offset)?;
            check("duration", grain.duration)?;
        }

        // a start time in the past starts the source now
        let context = self.registration.context();
        let start_time = when.max(context.current_time());
        self.scheduler.start_at(start_time)?;

        let stop_time = {
            let mut state = self.state.lock().unwrap();
            state.grain = grain.map(|grain| Grain {
                duration: if grain.duration_given {
                    grain.duration
                } else {
                    state
                        .buffer
                        .as_ref()
                        .map_or(DEFAULT_GRAIN_DURATION, AudioBuffer::duration)
                },
                ..grain
            });
            state.clamp_grain_parameters(start_time, self.loop_())
        };
        if let Some(stop_time) = stop_time {
            self.scheduler.stop_at(stop_time)?;
        }

        // keep playing, even if the node is dropped, until the source has finished
        context.notify_source_node_started_processing(self.registration.id());

        Ok(())
    }
}

struct AudioBufferSourceRenderer {
    playback_rate: AudioParamId,
    scheduler: Scheduler,
    loop_control: Arc<LoopControl>,
    state: Arc<Mutex<SourceState>>,
    ended: bool,
}

impl AudioBufferSourceRenderer {
    fn finish(&mut self, scope: &RenderScope) {
        if !self.ended {
            self.ended = true;
            scope.finish();
        }
    }

    /// Combined pitch of the playback rate and the sample rate conversion
    fn total_pitch_rate(playback_rate: f32, buffer_sample_rate: f32, sample_rate: f32) -> f64 {
        let sample_rate_factor = buffer_sample_rate as f64 / sample_rate as f64;
        let total_rate = (sample_rate_factor * playback_rate as f64).max(0.);

        // a zero rate is considered illegal
        let total_rate = if total_rate == 0. { 1. } else { total_rate };
        let total_rate = total_rate.min(MAX_RATE);

        if total_rate.is_finite() {
            total_rate
        } else {
            1.
        }
    }
}

/// Per quantum rendering arguments
struct RenderRange {
    /// first output frame to write
    offset: usize,
    /// number of output frames to write
    frames: usize,
    pitch_rate: f64,
}

impl AudioProcessor for AudioBufferSourceRenderer {
    fn process(
        &mut self,
        _inputs: &[AudioRenderQuantum],
        outputs: &mut [AudioRenderQuantum],
        params: AudioParamValues<'_>,
        scope: &RenderScope,
    ) {
        // single output node
        let output = &mut outputs[0];

        let sample_rate = scope.sample_rate as f64;
        let start_time = self.scheduler.get_start_at();
        let stop_time = self.scheduler.get_stop_at();

        if start_time >= scope.end_time() {
            return;
        }

        let quantum_start = scope.current_frame;
        let quantum_end = quantum_start + RENDER_QUANTUM_SIZE as u64;

        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let start_frame = (start_time * sample_rate).round() as u64;
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let end_frame = if stop_time.is_finite() {
            (stop_time * sample_rate).round() as u64
        } else {
            u64::MAX
        };

        if end_frame <= quantum_start {
            self.finish(scope);
            return;
        }

        let offset = start_frame.saturating_sub(quantum_start) as usize;
        let frames = (end_frame.min(quantum_end) - quantum_start) as usize;
        let frames = frames.saturating_sub(offset);

        let playback_rate = params.get(&self.playback_rate)[0];

        // the render thread can't block on this lock, render silence when it is contended
        let finished = {
            let Ok(mut state) = self.state.try_lock() else {
                log::trace!("buffer source state contended, render silence");
                return;
            };

            let SourceState {
                buffer,
                grain,
                virtual_read_index,
            } = &mut *state;
            let Some(buffer) = buffer.as_ref() else {
                return;
            };

            // the output channel count is updated with a delay after a buffer change
            if output.number_of_channels() != buffer.number_of_channels() || frames == 0 {
                return;
            }

            let range = RenderRange {
                offset,
                frames,
                pitch_rate: Self::total_pitch_rate(
                    playback_rate,
                    buffer.sample_rate(),
                    scope.sample_rate,
                ),
            };

            match self.render_from_buffer(buffer, *grain, virtual_read_index, output, &range) {
                Some(finished) => finished,
                None => {
                    output.make_silent();
                    false
                }
            }
        };

        if finished || end_frame <= quantum_end {
            self.finish(scope);
        }
    }

    fn propagates_silence(&self, _last_non_silent_time: f64, scope: &RenderScope) -> bool {
        self.ended || self.scheduler.get_start_at() >= scope.end_time()
    }

    fn handle_stoppable_source(&mut self, scope: &RenderScope) -> bool {
        if self.ended {
            return true;
        }

        if self.scheduler.get_stop_at() <= scope.current_time {
            self.ended = true;
            return true;
        }

        // a non-looping source that is never pulled (not connected to the destination) stops
        // once its buffer has played out
        let start_time = self.scheduler.get_start_at();
        if self.loop_control.loop_.load(Ordering::Acquire) || !start_time.is_finite() {
            return false;
        }
        let Ok(state) = self.state.try_lock() else {
            return false;
        };
        let Some(buffer) = state.buffer.as_ref() else {
            return false;
        };

        let extra_stop_time = EXTRA_STOP_FRAMES / scope.sample_rate as f64;
        let stop_time = start_time + buffer.duration() + extra_stop_time;
        if scope.current_time > stop_time {
            self.ended = true;
        }

        self.ended
    }
}

impl AudioBufferSourceRenderer {
    /// Read from the buffer into `range` of the output, resampling by the pitch rate
    ///
    /// Returns `Some(true)` when the end of a non-looping buffer was reached, `None` when
    /// nothing could be rendered.
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    fn render_from_buffer(
        &self,
        buffer: &AudioBuffer,
        grain: Option<Grain>,
        virtual_read_index: &mut f64,
        output: &mut AudioRenderQuantum,
        range: &RenderRange,
    ) -> Option<bool> {
        let buffer_length = buffer.length();
        let buffer_sample_rate = buffer.sample_rate() as f64;
        let loop_ = self.loop_control.loop_.load(Ordering::Acquire);
        let loop_start = self.loop_control.loop_start.load(Ordering::Acquire);
        let loop_end = self.loop_control.loop_end.load(Ordering::Acquire);

        let end_frame = match grain {
            Some(grain) => {
                time_to_sample_frame(grain.offset + grain.duration, buffer_sample_rate)
                    + GRAIN_PADDING_FRAMES
            }
            None => buffer_length,
        }
        .min(buffer_length);

        // a zero loop start and end loop the entire buffer
        let mut virtual_end_frame = end_frame as f64;
        let mut virtual_delta_frames = end_frame as f64;

        if loop_
            && (loop_start != 0. || loop_end != 0.)
            && loop_start >= 0.
            && loop_end > 0.
            && loop_start < loop_end
        {
            let loop_start_frame = loop_start * buffer_sample_rate;
            let loop_end_frame = loop_end * buffer_sample_rate;

            virtual_end_frame = loop_end_frame.min(virtual_end_frame);
            virtual_delta_frames = virtual_end_frame - loop_start_frame;
        }

        // past the end of the loop, wrap back to its beginning
        if loop_ && *virtual_read_index >= virtual_end_frame {
            *virtual_read_index = loop_start.max(0.) * buffer_sample_rate;
        }

        let pitch_rate = range.pitch_rate;

        // the playback rate cannot exceed the loop size
        if pitch_rate > virtual_delta_frames {
            return None;
        }

        let mut write_index = range.offset;
        let mut frames_to_process = range.frames;
        let mut finished = false;

        // the very common case of playing back at rate 1, without interpolation
        if pitch_rate == 1.
            && virtual_read_index.fract() == 0.
            && virtual_delta_frames.fract() == 0.
            && virtual_end_frame.fract() == 0.
        {
            let mut read_index = *virtual_read_index as usize;
            let delta_frames = virtual_delta_frames as usize;
            let end_frame = virtual_end_frame as usize;

            while frames_to_process > 0 {
                let frames_to_end = end_frame.saturating_sub(read_index);
                let frames_this_time = frames_to_process.min(frames_to_end);

                output
                    .channels_mut()
                    .iter_mut()
                    .enumerate()
                    .for_each(|(i, channel)| {
                        let source = &buffer.get_channel_data(i)[read_index..];
                        channel[write_index..write_index + frames_this_time]
                            .copy_from_slice(&source[..frames_this_time]);
                    });

                write_index += frames_this_time;
                read_index += frames_this_time;
                frames_to_process -= frames_this_time;

                // wrap around
                if read_index >= end_frame {
                    read_index = read_index.saturating_sub(delta_frames);
                    if !loop_ {
                        finished = true;
                        break;
                    }
                }
            }

            *virtual_read_index = read_index as f64;
        } else {
            let mut index = *virtual_read_index;

            while frames_to_process > 0 {
                frames_to_process -= 1;

                let read_index = index as usize;
                let interpolation_factor = index - read_index as f64;

                // linear interpolation needs the next sample frame too
                let mut read_index2 = read_index + 1;
                if read_index2 >= buffer_length {
                    read_index2 = if loop_ {
                        // wrap around at the end of the buffer
                        (index + 1. - virtual_delta_frames) as usize
                    } else {
                        read_index
                    };
                }

                if read_index >= buffer_length || read_index2 >= buffer_length {
                    break;
                }

                output
                    .channels_mut()
                    .iter_mut()
                    .enumerate()
                    .for_each(|(i, channel)| {
                        let source = buffer.get_channel_data(i);
                        let sample1 = source[read_index] as f64;
                        let sample2 = source[read_index2] as f64;
                        let sample =
                            (1. - interpolation_factor) * sample1 + interpolation_factor * sample2;
                        channel[write_index] = sample as f32;
                    });
                write_index += 1;

                index += pitch_rate;

                // wrap around, retaining the sub-sample position
                if index >= virtual_end_frame {
                    index -= virtual_delta_frames;
                    if !loop_ {
                        finished = true;
                        break;
                    }
                }
            }

            *virtual_read_index = index;
        }

        Some(finished)
    }
}
