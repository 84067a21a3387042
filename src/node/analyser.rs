use std::sync::{Arc, Mutex};

use crate::analysis::{
    validate_decibels, validate_fft_size, validate_smoothing_time_constant, Analyser,
    AnalysisRing, DEFAULT_FFT_SIZE, DEFAULT_MAX_DECIBELS, DEFAULT_MIN_DECIBELS,
    DEFAULT_SMOOTHING_TIME_CONSTANT,
};
use crate::context::{AudioContextRegistration, BaseAudioContext, ConcreteBaseAudioContext};
use crate::graph::{AudioHandlerOptions, NodeType};
use crate::render::{AudioParamValues, AudioProcessor, AudioRenderQuantum, RenderScope};
use crate::{validate_number_of_channels, AudioGraphError};

use super::{AudioNode, AudioNodeOptions, ChannelInterpretation};

/// Options for constructing an [`AnalyserNode`]
// dictionary AnalyserOptions : AudioNodeOptions {
//   unsigned long fftSize = 2048;
//   double maxDecibels = -30;
//   double minDecibels = -100;
//   double smoothingTimeConstant = 0.8;
// };
#[derive(Clone, Debug)]
pub struct AnalyserOptions {
    pub fft_size: usize,
    pub max_decibels: f64,
    pub min_decibels: f64,
    pub smoothing_time_constant: f64,
    pub audio_node_options: AudioNodeOptions,
}

impl Default for AnalyserOptions {
    fn default() -> Self {
        Self {
            fft_size: DEFAULT_FFT_SIZE,
            max_decibels: DEFAULT_MAX_DECIBELS,
            min_decibels: DEFAULT_MIN_DECIBELS,
            smoothing_time_constant: DEFAULT_SMOOTHING_TIME_CONSTANT,
            audio_node_options: AudioNodeOptions::default(),
        }
    }
}

/// Node providing time domain and frequency analysis of its input
///
/// The input passes unchanged to the output. A mono down-mix of the input is captured for
/// [`get_float_time_domain_data`](Self::get_float_time_domain_data) and
/// [`get_float_frequency_data`](Self::get_float_frequency_data).
///
/// An analyser whose output is not connected anywhere is still rendered, as long as something
/// is connected to its input.
///
/// - see also: [`BaseAudioContext::create_analyser`]
///
/// # Usage
///
/// ```no_run
/// use web_audio_graph::context::{BaseAudioContext, OfflineAudioContext};
/// use web_audio_graph::node::{AudioNode, AudioScheduledSourceNode};
///
/// let mut context = OfflineAudioContext::new(1, 44_100, 44_100.).unwrap();
///
/// let analyser = context.create_analyser();
/// let src = context.create_constant_source();
/// src.connect(&analyser).unwrap();
/// src.start().unwrap();
///
/// context.start_rendering_sync().unwrap();
///
/// let mut bins = vec![0.; analyser.frequency_bin_count()];
/// analyser.get_float_frequency_data(&mut bins);
/// println!("{:?}", &bins[0..20]);
/// ```
#[derive(Debug)]
pub struct AnalyserNode {
    registration: AudioContextRegistration,
    analyser: Mutex<Analyser>,
}

impl AudioNode for AnalyserNode {
    fn registration(&self) -> &AudioContextRegistration {
        &self.registration
    }
}

impl AnalyserNode {
    /// # Errors
    ///
    /// - `IndexSizeError` when the fft size is not a power of two in the range [32, 32768]
    /// - `IndexSizeError` when the smoothing time constant is outside [0, 1]
    /// - `IndexSizeError` when min decibels is not lower than max decibels
    /// - `NotSupportedError` for an invalid channel count
    pub fn new<C: BaseAudioContext>(
        context: &C,
        options: AnalyserOptions,
    ) -> Result<Self, AudioGraphError> {
        validate_fft_size(options.fft_size)?;
        validate_smoothing_time_constant(options.smoothing_time_constant)?;
        validate_decibels(options.min_decibels, options.max_decibels)?;
        validate_number_of_channels(options.audio_node_options.channel_count)?;

        Ok(Self::new_unchecked(context.base(), options))
    }

    pub(crate) fn new_unchecked(
        context: &ConcreteBaseAudioContext,
        options: AnalyserOptions,
    ) -> Self {
        let AnalyserOptions {
            fft_size,
            max_decibels,
            min_decibels,
            smoothing_time_constant,
            audio_node_options,
        } = options;

        let mut analyser = Analyser::new();
        let settings = analyser
            .set_fft_size(fft_size)
            .and_then(|()| analyser.set_smoothing_time_constant(smoothing_time_constant))
            .and_then(|()| analyser.set_decibels(min_decibels, max_decibels));
        if let Err(e) = settings {
            log::warn!("analyser options ignored: {}", e);
        }

        let handler_options = AudioHandlerOptions {
            node_type: NodeType::Analyser,
            number_of_inputs: 1,
            output_channels: vec![1],
            audio_node_options,
        };

        context.register(handler_options, move |registration| {
            let render = AnalyserRenderer {
                ring: analyser.ring(),
            };

            let node = AnalyserNode {
                registration,
                analyser: Mutex::new(analyser),
            };

            (node, Box::new(render))
        })
    }

    /// The size of the FFT used for frequency-domain analysis (in sample-frames)
    ///
    /// # Panics
    ///
    /// This method may panic if the lock to the inner analyser is poisoned
    pub fn fft_size(&self) -> usize {
        self.analyser.lock().unwrap().fft_size()
    }

    /// # Errors
    ///
    /// `IndexSizeError` when the fft size is not a power of two in the range [32, 32768]
    ///
    /// # Panics
    ///
    /// This method may panic if the lock to the inner analyser is poisoned
    pub fn set_fft_size(&self, fft_size: usize) -> Result<(), AudioGraphError> {
        self.analyser.lock().unwrap().set_fft_size(fft_size)
    }

    /// Time averaging with the last analysis frame, 0 means no averaging
    ///
    /// # Panics
    ///
    /// This method may panic if the lock to the inner analyser is poisoned
    pub fn smoothing_time_constant(&self) -> f64 {
        self.analyser.lock().unwrap().smoothing_time_constant()
    }

    /// # Errors
    ///
    /// `IndexSizeError` when the value is outside [0, 1]
    ///
    /// # Panics
    ///
    /// This method may panic if the lock to the inner analyser is poisoned
    pub fn set_smoothing_time_constant(&self, value: f64) -> Result<(), AudioGraphError> {
        self.analyser
            .lock()
            .unwrap()
            .set_smoothing_time_constant(value)
    }

    /// # Panics
    ///
    /// This method may panic if the lock to the inner analyser is poisoned
    pub fn min_decibels(&self) -> f64 {
        self.analyser.lock().unwrap().min_decibels()
    }

    /// # Errors
    ///
    /// `IndexSizeError` when the value is not lower than max decibels
    ///
    /// # Panics
    ///
    /// This method may panic if the lock to the inner analyser is poisoned
    pub fn set_min_decibels(&self, value: f64) -> Result<(), AudioGraphError> {
        let mut analyser = self.analyser.lock().unwrap();
        let max = analyser.max_decibels();
        analyser.set_decibels(value, max)
    }

    /// # Panics
    ///
    /// This method may panic if the lock to the inner analyser is poisoned
    pub fn max_decibels(&self) -> f64 {
        self.analyser.lock().unwrap().max_decibels()
    }

    /// # Errors
    ///
    /// `IndexSizeError` when the value is not higher than min decibels
    ///
    /// # Panics
    ///
    /// This method may panic if the lock to the inner analyser is poisoned
    pub fn set_max_decibels(&self, value: f64) -> Result<(), AudioGraphError> {
        let mut analyser = self.analyser.lock().unwrap();
        let min = analyser.min_decibels();
        analyser.set_decibels(min, value)
    }

    /// Number of bins in the FFT results, is half the FFT size
    ///
    /// # Panics
    ///
    /// This method may panic if the lock to the inner analyser is poisoned
    pub fn frequency_bin_count(&self) -> usize {
        self.analyser.lock().unwrap().frequency_bin_count()
    }

    /// Copy the most recent input frames into the provided buffer
    ///
    /// # Panics
    ///
    /// This method may panic if the lock to the inner analyser is poisoned
    pub fn get_float_time_domain_data(&self, buffer: &mut [f32]) {
        self.analyser
            .lock()
            .unwrap()
            .get_float_time_domain_data(buffer);
    }

    /// Copy the current frequency data in dB into the provided buffer
    ///
    /// # Panics
    ///
    /// This method may panic if the lock to the inner analyser is poisoned
    pub fn get_float_frequency_data(&self, buffer: &mut [f32]) {
        let current_time = self.registration.context().current_time();
        self.analyser
            .lock()
            .unwrap()
            .get_float_frequency_data(buffer, current_time);
    }
}

struct AnalyserRenderer {
    ring: Arc<AnalysisRing>,
}

impl AudioProcessor for AnalyserRenderer {
    fn process(
        &mut self,
        inputs: &[AudioRenderQuantum],
        outputs: &mut [AudioRenderQuantum],
        _params: AudioParamValues<'_>,
        _scope: &RenderScope,
    ) {
        // single input/output node
        let input = &inputs[0];
        let output = &mut outputs[0];

        *output = input.clone();

        let mut mono = input.clone();
        mono.mix(1, ChannelInterpretation::Speakers);
        self.ring.write(&mono.channel_data(0)[..]);
    }

    // keeps capturing silence, so the time domain data reflects the current input
    fn propagates_silence(&self, _last_non_silent_time: f64, _scope: &RenderScope) -> bool {
        false
    }
}
