//! The `OfflineAudioContext` type
use std::sync::atomic::AtomicU64;
use std::sync::Arc;

use crate::buffer::AudioBuffer;
use crate::context::{AudioContextState, BaseAudioContext, ConcreteBaseAudioContext};
use crate::node::DestinationRenderer;
use crate::render::RenderThread;
use crate::{
    validate_number_of_channels, validate_sample_rate, AudioGraphError, RENDER_QUANTUM_SIZE,
};

/// Options for constructing an [`OfflineAudioContext`]
#[derive(Clone, Debug)]
pub struct OfflineAudioContextOptions {
    /// The number of channels of the rendered output
    pub number_of_channels: usize,
    /// The length of the rendered output in sample-frames
    pub length: usize,
    /// The sample rate in Hz
    pub sample_rate: f32,
}

type OfflineSuspendCallback = Box<dyn FnOnce(&mut OfflineAudioContext) + Send + 'static>;

/// The `OfflineAudioContext` doesn't render the audio to the device hardware; instead, it generates
/// it, as fast as it can, and outputs the result to an `AudioBuffer`.
// the naming comes from the web audio specification
#[allow(clippy::module_name_repetitions)]
pub struct OfflineAudioContext {
    /// represents the underlying `BaseAudioContext`
    base: ConcreteBaseAudioContext,
    /// the size of the buffer in sample-frames
    length: usize,
    /// the number of channels of the rendered buffer
    number_of_channels: usize,
    /// scheduled suspensions, by render quantum
    suspensions: Vec<(usize, OfflineSuspendCallback)>,
    rendering_started: bool,
    /// number of render quanta produced so far
    rendered_quanta: usize,
}

impl std::fmt::Debug for OfflineAudioContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OfflineAudioContext")
            .field("length", &self.length)
            .field("base", &self.base)
            .field("suspensions", &self.suspensions.len())
            .finish_non_exhaustive()
    }
}

impl BaseAudioContext for OfflineAudioContext {
    fn base(&self) -> &ConcreteBaseAudioContext {
        &self.base
    }
}

impl OfflineAudioContext {
    /// Creates an `OfflineAudioContext` instance
    ///
    /// # Arguments
    ///
    /// * `number_of_channels` - number of output channels to render
    /// * `length` - length of the rendering audio buffer
    /// * `sample_rate` - output sample rate
    ///
    /// # Errors
    ///
    /// `NotSupportedError` for an invalid number of channels, length or sample rate
    pub fn new(
        number_of_channels: usize,
        length: usize,
        sample_rate: f32,
    ) -> Result<Self, AudioGraphError> {
        Self::with_options(OfflineAudioContextOptions {
            number_of_channels,
            length,
            sample_rate,
        })
    }

    /// Creates an `OfflineAudioContext` instance from [`OfflineAudioContextOptions`]
    ///
    /// # Errors
    ///
    /// `NotSupportedError` for an invalid number of channels, length or sample rate
    pub fn with_options(options: OfflineAudioContextOptions) -> Result<Self, AudioGraphError> {
        let OfflineAudioContextOptions {
            number_of_channels,
            length,
            sample_rate,
        } = options;

        validate_number_of_channels(number_of_channels)?;
        validate_sample_rate(sample_rate)?;
        if length == 0 {
            return Err(AudioGraphError::not_supported(
                "rendering length should be greater than zero",
            ));
        }

        // track number of frames - synced from render thread to control thread
        let frames_played = Arc::new(AtomicU64::new(0));

        let base = ConcreteBaseAudioContext::new(
            sample_rate,
            number_of_channels,
            frames_played,
            |_| Box::new(DestinationRenderer),
        );

        Ok(Self {
            base,
            length,
            number_of_channels,
            suspensions: Vec::new(),
            rendering_started: false,
            rendered_quanta: 0,
        })
    }

    /// get the length of rendering audio buffer
    // false positive: OfflineAudioContext is not const
    #[allow(clippy::missing_const_for_fn, clippy::unused_self)]
    #[must_use]
    pub fn length(&self) -> usize {
        self.length
    }

    fn total_quanta(&self) -> usize {
        (self.length + RENDER_QUANTUM_SIZE - 1) / RENDER_QUANTUM_SIZE
    }

    /// The render quantum at which a suspension scheduled for `suspend_time` takes effect
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn calculate_suspend_quantum(&self, suspend_time: f64) -> Result<usize, AudioGraphError> {
        if !suspend_time.is_finite() || suspend_time < 0. {
            return Err(AudioGraphError::invalid_state(format!(
                "suspend time should be a finite non-negative number, got {:?}",
                suspend_time
            )));
        }

        let frame = suspend_time * self.base.sample_rate() as f64;
        if frame >= self.length as f64 {
            return Err(AudioGraphError::invalid_state(format!(
                "suspend time ({}) is beyond the rendering duration",
                suspend_time
            )));
        }

        Ok((frame / RENDER_QUANTUM_SIZE as f64).ceil() as usize)
    }

    /// Schedules a suspension of the time progression in the audio context at the specified
    /// time and runs a callback.
    ///
    /// The time is rounded up to the next render quantum boundary. The callback runs on the
    /// calling thread while rendering is paused; it can be used to make changes to the audio
    /// graph that take effect at that exact point in time.
    ///
    /// # Errors
    ///
    /// `InvalidStateError` when the time is negative or not finite, lies beyond the rendering
    /// duration or in the already rendered past, or when a suspension is already scheduled for
    /// the same render quantum
    pub fn suspend_sync<F: FnOnce(&mut Self) + Send + 'static>(
        &mut self,
        suspend_time: f64,
        callback: F,
    ) -> Result<(), AudioGraphError> {
        let quantum = self.calculate_suspend_quantum(suspend_time)?;

        if self.rendering_started && quantum <= self.rendered_quanta {
            return Err(AudioGraphError::invalid_state(format!(
                "cannot suspend at {} which has already been rendered",
                suspend_time
            )));
        }

        if self.suspensions.iter().any(|(q, _)| *q == quantum) {
            return Err(AudioGraphError::invalid_state(format!(
                "cannot schedule more than one suspend at frame {}",
                quantum * RENDER_QUANTUM_SIZE
            )));
        }

        self.suspensions.push((quantum, Box::new(callback)));

        Ok(())
    }

    fn take_suspension(&mut self, quantum: usize) -> Option<OfflineSuspendCallback> {
        let position = self.suspensions.iter().position(|(q, _)| *q == quantum)?;
        Some(self.suspensions.swap_remove(position).1)
    }

    /// Given the current connections and scheduled changes, starts rendering audio.
    ///
    /// This function will block the current thread and returns the rendered `AudioBuffer`
    /// synchronously. Rendering pauses at every scheduled suspension to run its callback. When
    /// rendering completes the context is closed. If a callback closes the context, rendering
    /// stops and the remainder of the buffer is silent.
    ///
    /// # Errors
    ///
    /// `InvalidStateError` when rendering was started before, the context is closed, or the
    /// render thread cannot be run
    pub fn start_rendering_sync(&mut self) -> Result<AudioBuffer, AudioGraphError> {
        if self.rendering_started {
            return Err(AudioGraphError::invalid_state(
                "rendering can only be started once",
            ));
        }
        if self.base.state() == AudioContextState::Closed {
            return Err(AudioGraphError::invalid_state(
                "cannot render a closed context",
            ));
        }
        self.rendering_started = true;

        let renderer = RenderThread::spawn(
            Arc::clone(self.base.deferred()),
            self.base.sample_rate(),
            self.number_of_channels,
            Arc::clone(self.base.frames_played()),
        )?;

        let total_quanta = self.total_quanta();
        let mut channels =
            vec![Vec::with_capacity(total_quanta * RENDER_QUANTUM_SIZE); self.number_of_channels];

        loop {
            if let Some(callback) = self.take_suspension(self.rendered_quanta) {
                log::debug!("suspend rendering at quantum {}", self.rendered_quanta);
                self.base.set_state(AudioContextState::Suspended);
                (callback)(self);
            }

            if self.rendered_quanta >= total_quanta
                || self.base.state() == AudioContextState::Closed
            {
                break;
            }

            // render up to the next suspension, or to the end
            let next = self
                .suspensions
                .iter()
                .map(|(q, _)| *q)
                .filter(|&q| q > self.rendered_quanta)
                .min()
                .unwrap_or(total_quanta)
                .min(total_quanta);

            self.base.set_state(AudioContextState::Running);
            let rendered = renderer.render(next - self.rendered_quanta)?;
            channels
                .iter_mut()
                .zip(rendered)
                .for_each(|(channel, samples)| channel.extend(samples));
            self.rendered_quanta = next;
        }

        renderer.terminate();
        self.close();

        channels
            .iter_mut()
            .for_each(|channel| channel.resize(self.length, 0.));

        Ok(AudioBuffer::from(channels, self.base.sample_rate()))
    }

    /// Closes the context: no further audio is rendered and all playing sources are released
    pub fn close(&mut self) {
        self.suspensions.clear();
        self.base.set_state(AudioContextState::Closed);
        self.base.release_active_source_nodes();
    }
}
