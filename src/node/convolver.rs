use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crossbeam_channel::{Receiver, Sender};
use realfft::{num_complex::Complex, ComplexToReal, RealFftPlanner, RealToComplex};

use super::{
    assert_stereo_channel_count, assert_stereo_channel_count_mode, AudioNode, AudioNodeOptions,
    ChannelCountMode, ChannelInterpretation,
};
use crate::buffer::AudioBuffer;
use crate::context::{AudioContextRegistration, BaseAudioContext, ConcreteBaseAudioContext};
use crate::graph::{AudioHandlerOptions, NodeType};
use crate::render::{AudioParamValues, AudioProcessor, AudioRenderQuantum, RenderScope};
use crate::{AudioGraphError, RENDER_QUANTUM_SIZE};

/// Scale the response by an equal-power normalization
fn normalize_response(response: &mut [Vec<f32>], sample_rate: f32) {
    let gain_calibration = 0.00125;
    let gain_calibration_sample_rate = 44100.;
    let min_power = 0.000125;

    // Normalize by RMS power.
    let number_of_channels = response.len();
    let length = response.first().map_or(0, Vec::len);

    let mut power: f32 = response
        .iter()
        .map(|c| c.iter().map(|&s| s * s).sum::<f32>())
        .sum();

    power = (power / (number_of_channels * length) as f32).sqrt();

    // Protect against accidental overload.
    if !power.is_finite() || power < min_power {
        power = min_power;
    }

    let mut scale = 1. / power;

    // Calibrate to make perceived volume same as unprocessed.
    scale *= gain_calibration;

    // Scale depends on sample-rate.
    scale *= gain_calibration_sample_rate / sample_rate;

    // True-stereo compensation.
    if number_of_channels == 4 {
        scale *= 0.5;
    }

    response
        .iter_mut()
        .for_each(|c| c.iter_mut().for_each(|s| *s *= scale));
}

/// `ConvolverNode` options
//dictionary ConvolverOptions : AudioNodeOptions {
//  AudioBuffer? buffer;
//  boolean disableNormalization = false;
//};
#[derive(Clone, Debug)]
pub struct ConvolverOptions {
    /// The desired buffer for the ConvolverNode
    pub buffer: Option<AudioBuffer>,
    /// The opposite of the desired initial value for the normalize attribute
    pub disable_normalization: bool,
    /// AudioNode options
    pub audio_node_options: AudioNodeOptions,
}

impl Default for ConvolverOptions {
    fn default() -> Self {
        Self {
            buffer: None,
            disable_normalization: false,
            audio_node_options: AudioNodeOptions {
                channel_count: 2,
                channel_count_mode: ChannelCountMode::ClampedMax,
                channel_interpretation: ChannelInterpretation::Speakers,
            },
        }
    }
}

/// Processing node which applies a linear convolution effect given an impulse response.
///
/// Every render quantum the recent input is convolved with the response through a single FFT
/// covering the full response length. The response may have 1, 2 or 4 channels, the latter
/// for true stereo processing.
/// Without response the output is silent.
///
/// The node keeps rendering its tail (the duration of the response) after its input went
/// silent, and keeps its outputs enabled when nothing references it anymore.
///
/// - see also:
/// [`BaseAudioContext::create_convolver`](crate::context::BaseAudioContext::create_convolver)
///
/// # Usage
///
/// ```
/// use web_audio_graph::buffer::AudioBuffer;
/// use web_audio_graph::context::{BaseAudioContext, OfflineAudioContext};
/// use web_audio_graph::node::{AudioNode, AudioScheduledSourceNode, ConvolverNode, ConvolverOptions};
///
/// let mut context = OfflineAudioContext::new(1, 128, 44_100.).unwrap();
///
/// // a single echo, 10 frames later
/// let mut response = vec![0.; 11];
/// response[10] = 1.;
///
/// let options = ConvolverOptions {
///     buffer: Some(AudioBuffer::from(vec![response], 44_100.)),
///     disable_normalization: true,
///     ..ConvolverOptions::default()
/// };
/// let convolver = ConvolverNode::new(&context, options).unwrap();
/// convolver.connect(&context.destination()).unwrap();
///
/// let src = context.create_constant_source();
/// src.connect(&convolver).unwrap();
/// src.start().unwrap();
///
/// let output = context.start_rendering_sync().unwrap();
/// assert!(output.get_channel_data(0)[9].abs() < 1e-5);
/// assert!((output.get_channel_data(0)[10] - 1.).abs() < 1e-5);
/// ```
#[derive(Debug)]
pub struct ConvolverNode {
    /// Represents the node instance and its associated audio context
    registration: AudioContextRegistration,
    /// Perform equal power normalization on response buffer
    normalize: AtomicBool,
    /// The response buffer, nullable
    buffer: Mutex<Option<AudioBuffer>>,
    /// Message bus to the renderer
    sender: Sender<Option<ConvolverKernel>>,
}

impl AudioNode for ConvolverNode {
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

impl ConvolverNode {
    /// returns a `ConvolverNode` instance
    ///
    /// # Errors
    ///
    /// - `NotSupportedError` for an invalid channel configuration
    /// - `NotSupportedError` when the buffer is invalid, see [`Self::set_buffer`]
    pub fn new<C: BaseAudioContext>(
        context: &C,
        options: ConvolverOptions,
    ) -> Result<Self, AudioGraphError> {
        assert_stereo_channel_count(options.audio_node_options.channel_count)?;
        assert_stereo_channel_count_mode(options.audio_node_options.channel_count_mode)?;

        let buffer = options.buffer.clone();
        let node = Self::new_unchecked(context.base(), options);
        node.set_buffer(buffer)?;
        Ok(node)
    }

    /// The buffer option is ignored
    pub(crate) fn new_unchecked(
        context: &ConcreteBaseAudioContext,
        options: ConvolverOptions,
    ) -> Self {
        let ConvolverOptions {
            disable_normalization,
            audio_node_options,
            ..
        } = options;

        let handler_options = AudioHandlerOptions {
            node_type: NodeType::Convolver,
            number_of_inputs: 1,
            output_channels: vec![1],
            audio_node_options,
        };

        context.register(handler_options, move |registration| {
            // kernels are built on the control thread and picked up by the renderer at the
            // start of a quantum
            let (sender, receiver) = crossbeam_channel::unbounded();

            let renderer = ConvolverRenderer {
                receiver,
                kernel: None,
                next_frame: 0,
            };

            let node = Self {
                registration,
                normalize: AtomicBool::new(!disable_normalization),
                buffer: Mutex::new(None),
                sender,
            };

            (node, Box::new(renderer))
        })
    }

    /// Get the current impulse response buffer
    pub fn buffer(&self) -> Option<AudioBuffer> {
        self.buffer.lock().unwrap().clone()
    }

    /// Set or update the impulse response buffer
    ///
    /// # Errors
    ///
    /// `NotSupportedError` when the buffer does not have 1, 2 or 4 channels, or its sample rate
    /// differs from the context sample rate
    pub fn set_buffer(&self, buffer: Option<AudioBuffer>) -> Result<(), AudioGraphError> {
        let kernel = match &buffer {
            Some(buffer) => {
                let sample_rate = self.context().sample_rate();
                if buffer.sample_rate() != sample_rate {
                    return Err(AudioGraphError::not_supported(format!(
                        "buffer sample rate {} does not match the context sample rate {}",
                        buffer.sample_rate(),
                        sample_rate
                    )));
                }

                let number_of_channels = buffer.number_of_channels();
                if ![1, 2, 4].contains(&number_of_channels) {
                    return Err(AudioGraphError::not_supported(format!(
                        "buffer must have 1, 2 or 4 channels, got {}",
                        number_of_channels
                    )));
                }

                let mut response: Vec<Vec<f32>> = (0..number_of_channels)
                    .map(|i| buffer.get_channel_data(i).to_vec())
                    .collect();
                if self.normalize() {
                    normalize_response(&mut response, sample_rate);
                }

                Some(ConvolverKernel::new(response, sample_rate))
            }
            None => None,
        };

        // the renderer is gone when the context has been closed
        if self.sender.send(kernel).is_err() {
            log::warn!("convolver renderer is gone, response not updated");
        }

        *self.buffer.lock().unwrap() = buffer;
        Ok(())
    }

    /// Denotes if the response buffer will be scaled with an equal-power normalization
    pub fn normalize(&self) -> bool {
        self.normalize.load(Ordering::Acquire)
    }

    /// Update the `normalize` setting. This will only have an effect when `set_buffer` is called.
    pub fn set_normalize(&self, value: bool) {
        self.normalize.store(value, Ordering::Release);
    }
}

/// Impulse response spectra with the input history needed to convolve them
///
/// The history holds the last `response length - 1 + RENDER_QUANTUM_SIZE` input frames. It is
/// zero padded to a power of two and multiplied with the response in the frequency domain. The
/// last quantum of that circular convolution never wraps, so it equals the linear convolution.
struct ConvolverKernel {
    length: usize,
    /// one spectrum per response channel, scaled by the inverse transform length
    response_fft: Vec<Vec<Complex<f32>>>,
    history: [Vec<f32>; 2],
    r2c: Arc<dyn RealToComplex<f32>>,
    c2r: Arc<dyn ComplexToReal<f32>>,
    fft_input: Vec<f32>,
    input_fft: [Vec<Complex<f32>>; 2],
    output_fft: Vec<Complex<f32>>,
    fft_output: Vec<f32>,
    r2c_scratch: Vec<Complex<f32>>,
    c2r_scratch: Vec<Complex<f32>>,
    sample_rate: f32,
}

impl ConvolverKernel {
    fn new(response: Vec<Vec<f32>>, sample_rate: f32) -> Self {
        let length = response.first().map_or(0, Vec::len);
        let history_length = length.saturating_sub(1) + RENDER_QUANTUM_SIZE;
        let fft_length = history_length.next_power_of_two();

        let mut planner = RealFftPlanner::<f32>::new();
        let r2c = planner.plan_fft_forward(fft_length);
        let c2r = planner.plan_fft_inverse(fft_length);

        let mut fft_input = r2c.make_input_vec();
        let mut r2c_scratch = r2c.make_scratch_vec();
        let scale = 1. / fft_length as f32;

        let response_fft = response
            .iter()
            .map(|channel| {
                fft_input.fill(0.);
                fft_input[..length].copy_from_slice(channel);

                let mut spectrum = r2c.make_output_vec();
                if let Err(e) =
                    r2c.process_with_scratch(&mut fft_input, &mut spectrum, &mut r2c_scratch)
                {
                    log::warn!("failed to transform convolver response: {}", e);
                }
                spectrum.iter_mut().for_each(|v| *v *= scale);
                spectrum
            })
            .collect();

        Self {
            length,
            response_fft,
            history: [vec![0.; history_length], vec![0.; history_length]],
            input_fft: [r2c.make_output_vec(), r2c.make_output_vec()],
            output_fft: c2r.make_input_vec(),
            fft_output: c2r.make_output_vec(),
            c2r_scratch: c2r.make_scratch_vec(),
            r2c_scratch,
            fft_input,
            r2c,
            c2r,
            sample_rate,
        }
    }

    fn length(&self) -> usize {
        self.length
    }

    fn clear(&mut self) {
        self.history.iter_mut().for_each(|h| h.fill(0.));
    }

    /// Pairs of (input channel, response channel, output channel) to convolve and sum
    fn routes(&self, input_channels: usize) -> &'static [(usize, usize, usize)] {
        match (self.response_fft.len(), input_channels) {
            (1, 1) | (2, 1) | (4, 1) => &[(0, 0, 0)],
            (1, _) => &[(0, 0, 0), (1, 0, 1)],
            (2, _) => &[(0, 0, 0), (1, 1, 1)],
            // true stereo
            _ => &[(0, 0, 0), (1, 2, 0), (0, 1, 1), (1, 3, 1)],
        }
    }

    /// Append a quantum of input to the history of a channel and transform the history
    fn push(&mut self, channel: usize, input: &[f32]) {
        let history = &mut self.history[channel];
        history.copy_within(RENDER_QUANTUM_SIZE.., 0);
        let offset = history.len() - RENDER_QUANTUM_SIZE;
        history[offset..].copy_from_slice(input);

        self.fft_input[..history.len()].copy_from_slice(history);
        self.fft_input[history.len()..].fill(0.);

        if let Err(e) = self.r2c.process_with_scratch(
            &mut self.fft_input,
            &mut self.input_fft[channel],
            &mut self.r2c_scratch,
        ) {
            log::trace!("convolver input transform failed: {}", e);
        }
    }

    /// Write the newest quantum of the convolution routed to `output_channel` into `output`
    fn convolve(
        &mut self,
        routes: &[(usize, usize, usize)],
        output_channel: usize,
        output: &mut [f32],
    ) {
        let mut routed = false;
        self.output_fft.fill(Complex::default());

        for &(input_channel, response_channel, _) in
            routes.iter().filter(|route| route.2 == output_channel)
        {
            routed = true;
            self.output_fft
                .iter_mut()
                .zip(&self.input_fft[input_channel])
                .zip(&self.response_fft[response_channel])
                .for_each(|((o, x), h)| *o += x * h);
        }

        if !routed {
            return;
        }

        // the DC and Nyquist bins of a real signal have no imaginary part
        if let Some(first) = self.output_fft.first_mut() {
            first.im = 0.;
        }
        if let Some(last) = self.output_fft.last_mut() {
            last.im = 0.;
        }

        if let Err(e) = self.c2r.process_with_scratch(
            &mut self.output_fft,
            &mut self.fft_output,
            &mut self.c2r_scratch,
        ) {
            log::trace!("convolver output transform failed: {}", e);
            return;
        }

        let offset = self.history[0].len() - RENDER_QUANTUM_SIZE;
        output.copy_from_slice(&self.fft_output[offset..offset + RENDER_QUANTUM_SIZE]);
    }
}

struct ConvolverRenderer {
    receiver: Receiver<Option<ConvolverKernel>>,
    kernel: Option<ConvolverKernel>,
    /// first frame of the quantum following the last processed one
    next_frame: u64,
}

impl AudioProcessor for ConvolverRenderer {
    fn process(
        &mut self,
        inputs: &[AudioRenderQuantum],
        outputs: &mut [AudioRenderQuantum],
        _params: AudioParamValues<'_>,
        scope: &RenderScope,
    ) {
        // single input/output node
        let input = &inputs[0];
        let output = &mut outputs[0];

        // only the most recent response matters
        if let Some(kernel) = self.receiver.try_iter().last() {
            self.kernel = kernel;
        }

        // no response set, output silence
        let Some(kernel) = self.kernel.as_mut() else {
            return;
        };

        // quanta were skipped after the tail ran out, the history only held silence
        if scope.current_frame != self.next_frame {
            kernel.clear();
        }
        self.next_frame = scope.current_frame + RENDER_QUANTUM_SIZE as u64;

        let input_channels = input.number_of_channels().min(2);
        for channel in 0..input_channels {
            kernel.push(channel, input.channel_data(channel));
        }

        let routes = kernel.routes(input_channels);
        for output_channel in 0..output.number_of_channels().min(2) {
            kernel.convolve(routes, output_channel, output.channel_data_mut(output_channel));
        }
    }

    fn tail_time(&self) -> f64 {
        self.kernel
            .as_ref()
            .map_or(0., |kernel| kernel.length() as f64 / kernel.sample_rate as f64)
    }
}
