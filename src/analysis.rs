//! Time domain capture and frequency analysis
//!
//! The render thread writes the down-mixed input of an
//! [`AnalyserNode`](crate::node::AnalyserNode) into a lock-free ring of atomics. The control
//! thread reads the most recent frames from it and runs the FFT on demand.

use std::f32::consts::PI;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use realfft::{num_complex::Complex, RealFftPlanner};

use crate::{AtomicF32, AudioGraphError, RENDER_QUANTUM_SIZE};

pub(crate) const DEFAULT_SMOOTHING_TIME_CONSTANT: f64 = 0.8;
pub(crate) const DEFAULT_MIN_DECIBELS: f64 = -100.;
pub(crate) const DEFAULT_MAX_DECIBELS: f64 = -30.;
pub(crate) const DEFAULT_FFT_SIZE: usize = 2048;

const MIN_FFT_SIZE: usize = 32;
const MAX_FFT_SIZE: usize = 32768;

/// Room for the largest FFT, plus one quantum being written while the control thread reads
const RING_SIZE: usize = MAX_FFT_SIZE + RENDER_QUANTUM_SIZE;

/// Blackman window values with alpha = 0.16
fn blackman_window(size: usize) -> Vec<f32> {
    let alpha = 0.16;
    let a0 = (1. - alpha) / 2.;
    let a1 = 1. / 2.;
    let a2 = alpha / 2.;

    (0..size)
        .map(|i| {
            let x = i as f32 / size as f32;
            a0 - a1 * (2. * PI * x).cos() + a2 * (4. * PI * x).cos()
        })
        .collect()
}

/// A power of two in [32, 32768]
pub(crate) fn validate_fft_size(fft_size: usize) -> Result<(), AudioGraphError> {
    if !fft_size.is_power_of_two() || !(MIN_FFT_SIZE..=MAX_FFT_SIZE).contains(&fft_size) {
        return Err(AudioGraphError::index_size(format!(
            "fft size {} is not a power of two in range [{}, {}]",
            fft_size, MIN_FFT_SIZE, MAX_FFT_SIZE
        )));
    }
    Ok(())
}

pub(crate) fn validate_smoothing_time_constant(value: f64) -> Result<(), AudioGraphError> {
    if !(0. ..=1.).contains(&value) {
        return Err(AudioGraphError::index_size(format!(
            "smoothing time constant {:?} is outside range [0, 1]",
            value
        )));
    }
    Ok(())
}

pub(crate) fn validate_decibels(min: f64, max: f64) -> Result<(), AudioGraphError> {
    if min >= max {
        return Err(AudioGraphError::index_size(format!(
            "min decibels {:?} must be lower than max decibels {:?}",
            min, max
        )));
    }
    Ok(())
}

/// Single producer, multiple consumer ring of the last captured frames
#[derive(Debug)]
pub(crate) struct AnalysisRing {
    samples: Box<[AtomicF32]>,
    write_index: AtomicUsize,
}

impl AnalysisRing {
    pub fn new() -> Self {
        Self {
            samples: (0..RING_SIZE).map(|_| AtomicF32::new(0.)).collect(),
            write_index: AtomicUsize::new(0),
        }
    }

    /// Append frames, render thread only
    pub fn write(&self, src: &[f32]) {
        let write_index = self.write_index.load(Ordering::Acquire);

        src.iter().enumerate().for_each(|(i, &value)| {
            self.samples[(write_index + i) % RING_SIZE].store(value, Ordering::Relaxed);
        });

        self.write_index
            .store((write_index + src.len()) % RING_SIZE, Ordering::Release);
    }

    /// Copy the most recent `min(dst.len(), max_len)` frames, oldest first, into `dst`
    pub fn read(&self, dst: &mut [f32], max_len: usize) {
        let write_index = self.write_index.load(Ordering::Acquire);
        let len = dst.len().min(max_len);
        let start = RING_SIZE + write_index - len;

        dst[..len].iter_mut().enumerate().for_each(|(i, value)| {
            *value = self.samples[(start + i) % RING_SIZE].load(Ordering::Relaxed);
        });
    }
}

/// Control thread side of the analysis: settings, FFT buffers and the smoothed spectrum
pub(crate) struct Analyser {
    ring: Arc<AnalysisRing>,
    fft_size: usize,
    smoothing_time_constant: f64,
    min_decibels: f64,
    max_decibels: f64,
    planner: RealFftPlanner<f32>,
    fft_input: Vec<f32>,
    fft_scratch: Vec<Complex<f32>>,
    fft_output: Vec<Complex<f32>>,
    /// smoothed magnitudes of the last computed spectrum, `fft_size / 2` bins
    spectrum: Vec<f32>,
    /// context time of the last computed spectrum
    spectrum_time: f64,
    window: Vec<f32>,
}

impl std::fmt::Debug for Analyser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Analyser")
            .field("fft_size", &self.fft_size)
            .field("smoothing_time_constant", &self.smoothing_time_constant)
            .field("min_decibels", &self.min_decibels)
            .field("max_decibels", &self.max_decibels)
            .finish_non_exhaustive()
    }
}

impl Analyser {
    pub fn new() -> Self {
        let mut analyser = Self {
            ring: Arc::new(AnalysisRing::new()),
            fft_size: 0,
            smoothing_time_constant: DEFAULT_SMOOTHING_TIME_CONSTANT,
            min_decibels: DEFAULT_MIN_DECIBELS,
            max_decibels: DEFAULT_MAX_DECIBELS,
            planner: RealFftPlanner::new(),
            fft_input: Vec::new(),
            fft_scratch: Vec::new(),
            fft_output: Vec::new(),
            spectrum: Vec::new(),
            spectrum_time: f64::NEG_INFINITY,
            window: Vec::new(),
        };
        analyser.resize(DEFAULT_FFT_SIZE);
        analyser
    }

    /// The ring the render thread writes into
    pub fn ring(&self) -> Arc<AnalysisRing> {
        Arc::clone(&self.ring)
    }

    fn resize(&mut self, fft_size: usize) {
        let r2c = self.planner.plan_fft_forward(fft_size);
        self.fft_input = r2c.make_input_vec();
        self.fft_scratch = r2c.make_scratch_vec();
        self.fft_output = r2c.make_output_vec();
        self.spectrum = vec![0.; fft_size / 2];
        self.spectrum_time = f64::NEG_INFINITY;
        self.window = blackman_window(fft_size);
        self.fft_size = fft_size;
    }

    pub fn fft_size(&self) -> usize {
        self.fft_size
    }

    pub fn set_fft_size(&mut self, fft_size: usize) -> Result<(), AudioGraphError> {
        validate_fft_size(fft_size)?;
        if fft_size != self.fft_size {
            self.resize(fft_size);
        }
        Ok(())
    }

    pub fn smoothing_time_constant(&self) -> f64 {
        self.smoothing_time_constant
    }

    pub fn set_smoothing_time_constant(&mut self, value: f64) -> Result<(), AudioGraphError> {
        validate_smoothing_time_constant(value)?;
        self.smoothing_time_constant = value;
        Ok(())
    }

    pub fn min_decibels(&self) -> f64 {
        self.min_decibels
    }

    pub fn max_decibels(&self) -> f64 {
        self.max_decibels
    }

    /// Set both bounds together, to avoid invalid intermediate combinations
    pub fn set_decibels(&mut self, min: f64, max: f64) -> Result<(), AudioGraphError> {
        validate_decibels(min, max)?;
        self.min_decibels = min;
        self.max_decibels = max;
        Ok(())
    }

    pub fn frequency_bin_count(&self) -> usize {
        self.fft_size / 2
    }

    /// Write the most recent `fft_size` frames into `dst`, excess elements on either side are
    /// left untouched
    pub fn get_float_time_domain_data(&self, dst: &mut [f32]) {
        self.ring.read(dst, self.fft_size);
    }

    fn compute_spectrum(&mut self) {
        let fft_size = self.fft_size;
        let smoothing = self.smoothing_time_constant as f32;
        let r2c = self.planner.plan_fft_forward(fft_size);

        // the most recent fftSize frames, windowed
        self.ring.read(&mut self.fft_input, fft_size);
        self.fft_input
            .iter_mut()
            .zip(self.window.iter())
            .for_each(|(i, w)| *i *= w);

        if let Err(e) = r2c.process_with_scratch(
            &mut self.fft_input,
            &mut self.fft_output,
            &mut self.fft_scratch,
        ) {
            // buffer lengths come from the same plan
            log::warn!("analyser fft failed: {}", e);
            return;
        }

        // the Nyquist bin is dropped, the DC bin is kept as is
        let normalize = 1. / fft_size as f32;
        self.spectrum
            .iter_mut()
            .zip(self.fft_output.iter())
            .for_each(|(s, c)| {
                let magnitude = c.norm() * normalize;
                let value = smoothing * *s + (1. - smoothing) * magnitude;
                *s = if value.is_finite() { value } else { 0. };
            });
    }

    /// Write the spectrum in dB into `dst`, at most `frequency_bin_count` values
    ///
    /// Repeated calls at the same context time return the same data, without smoothing it
    /// again.
    pub fn get_float_frequency_data(&mut self, dst: &mut [f32], current_time: f64) {
        if current_time != self.spectrum_time {
            self.compute_spectrum();
            self.spectrum_time = current_time;
        }

        dst.iter_mut()
            .zip(self.spectrum.iter())
            .for_each(|(v, s)| *v = 20. * s.log10());
    }
}
