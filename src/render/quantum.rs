//! Render thread audio buses: pooled, copy-on-write channel storage with up/down-mixing
use arrayvec::ArrayVec;
use std::cell::RefCell;
use std::ops::{Deref, DerefMut};
use std::rc::Rc;

use crate::node::ChannelInterpretation;
use crate::{assert_valid_number_of_channels, MAX_CHANNELS, RENDER_QUANTUM_SIZE};

type ChannelData = [f32; RENDER_QUANTUM_SIZE];

/// Object pool for channel buffers, owned by the render thread
///
/// Only allocates when the pool is exhausted. Buffers return to the pool when the last channel
/// referring to them is dropped.
#[derive(Clone)]
pub(crate) struct Alloc {
    inner: Rc<AllocInner>,
}

#[derive(Debug)]
struct AllocInner {
    pool: RefCell<Vec<Rc<ChannelData>>>,
    zeroes: Rc<ChannelData>,
}

impl Alloc {
    pub fn with_capacity(n: usize) -> Self {
        let pool = (0..n).map(|_| Rc::new([0.; RENDER_QUANTUM_SIZE])).collect();

        Self {
            inner: Rc::new(AllocInner {
                pool: RefCell::new(pool),
                zeroes: Rc::new([0.; RENDER_QUANTUM_SIZE]),
            }),
        }
    }

    /// A channel pointing at the shared silence buffer, does not allocate
    pub fn silence(&self) -> AudioRenderQuantumChannel {
        AudioRenderQuantumChannel {
            data: Rc::clone(&self.inner.zeroes),
            alloc: Rc::clone(&self.inner),
        }
    }

    /// A silent bus with the given number of channels
    pub fn silent_quantum(&self, number_of_channels: usize) -> AudioRenderQuantum {
        let mut quantum = AudioRenderQuantum::from(self.silence());
        quantum.set_number_of_channels(number_of_channels);
        quantum
    }

    #[cfg(test)]
    pub fn pool_size(&self) -> usize {
        self.inner.pool.borrow().len()
    }
}

impl AllocInner {
    fn take(&self) -> Rc<ChannelData> {
        self.pool
            .borrow_mut()
            .pop()
            .unwrap_or_else(|| Rc::new([0.; RENDER_QUANTUM_SIZE]))
    }

    fn give_back(&self, data: Rc<ChannelData>) {
        self.pool.borrow_mut().push(data);
    }
}

/// Single channel of a render quantum
///
/// Derefs to a slice of `RENDER_QUANTUM_SIZE` samples. Cloning is cheap, the samples are only
/// copied when a shared channel is written to.
#[derive(Clone, Debug)]
pub struct AudioRenderQuantumChannel {
    data: Rc<ChannelData>,
    alloc: Rc<AllocInner>,
}

impl AudioRenderQuantumChannel {
    fn make_mut(&mut self) -> &mut ChannelData {
        if Rc::strong_count(&self.data) != 1 {
            let mut fresh = self.alloc.take();
            Rc::make_mut(&mut fresh).copy_from_slice(&self.data[..]);
            self.data = fresh;
        }

        Rc::make_mut(&mut self.data)
    }

    /// `O(1)` check whether this channel is the shared silence buffer
    ///
    /// A `false` result does not mean some sample is non-zero.
    pub fn is_silent(&self) -> bool {
        Rc::ptr_eq(&self.data, &self.alloc.zeroes)
    }

    /// Add the samples of another channel to this one
    pub(crate) fn add(&mut self, other: &Self) {
        if other.is_silent() {
            return;
        }
        if self.is_silent() {
            *self = other.clone();
            return;
        }
        self.iter_mut().zip(other.iter()).for_each(|(a, b)| *a += b);
    }

    /// A silent channel backed by the same pool
    pub(crate) fn silence(&self) -> Self {
        Self {
            data: Rc::clone(&self.alloc.zeroes),
            alloc: Rc::clone(&self.alloc),
        }
    }

    fn ptr_eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.data, &other.data)
    }
}

impl Deref for AudioRenderQuantumChannel {
    type Target = [f32];

    fn deref(&self) -> &Self::Target {
        &self.data[..]
    }
}

impl DerefMut for AudioRenderQuantumChannel {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.make_mut()[..]
    }
}

impl Drop for AudioRenderQuantumChannel {
    fn drop(&mut self) {
        if Rc::strong_count(&self.data) == 1 {
            let zeroes = Rc::clone(&self.alloc.zeroes);
            let data = std::mem::replace(&mut self.data, zeroes);
            self.alloc.give_back(data);
        }
    }
}

/// Render thread audio bus, a list of up to [`MAX_CHANNELS`] channels of one render quantum
///
/// A bus whose channels all point at the silence buffer is flagged silent, which lets the graph
/// skip work downstream. Writing to a channel clears that state.
#[derive(Clone, Debug)]
pub struct AudioRenderQuantum {
    channels: ArrayVec<AudioRenderQuantumChannel, MAX_CHANNELS>,
    // only used for AudioParam values: a k-rate or unautomated value is exposed as a slice of
    // length 1 instead of 128
    single_valued: bool,
}

impl AudioRenderQuantum {
    /// Create a mono bus from a single channel
    pub(crate) fn from(channel: AudioRenderQuantumChannel) -> Self {
        let mut channels = ArrayVec::new();
        channels.push(channel);

        Self {
            channels,
            single_valued: false,
        }
    }

    pub(crate) fn single_valued(&self) -> bool {
        self.single_valued
    }

    pub(crate) fn set_single_valued(&mut self, value: bool) {
        self.single_valued = value;
    }

    /// Number of channels of this bus
    pub fn number_of_channels(&self) -> usize {
        self.channels.len()
    }

    /// Set the number of channels, new channels are silent
    ///
    /// # Panics
    ///
    /// Panics when the number lies outside the [1, 32] range
    pub fn set_number_of_channels(&mut self, n: usize) {
        assert_valid_number_of_channels(n);
        let silence = self.channels[0].silence();
        for _ in self.number_of_channels()..n {
            self.channels.push(silence.clone());
        }
        self.channels.truncate(n);
    }

    /// Samples of the given channel
    ///
    /// # Panics
    ///
    /// Panics when the index is out of bounds
    pub fn channel_data(&self, index: usize) -> &AudioRenderQuantumChannel {
        &self.channels[index]
    }

    /// Samples of the given channel (mutable)
    ///
    /// # Panics
    ///
    /// Panics when the index is out of bounds
    pub fn channel_data_mut(&mut self, index: usize) -> &mut AudioRenderQuantumChannel {
        &mut self.channels[index]
    }

    pub fn channels(&self) -> &[AudioRenderQuantumChannel] {
        &self.channels[..]
    }

    pub fn channels_mut(&mut self) -> &mut [AudioRenderQuantumChannel] {
        &mut self.channels[..]
    }

    /// `O(1)` check whether all channels point at the silence buffer
    pub fn is_silent(&self) -> bool {
        self.channels.iter().all(AudioRenderQuantumChannel::is_silent)
    }

    /// Turn every channel into silence, keeping the channel count
    pub fn make_silent(&mut self) {
        let silence = self.channels[0].silence();
        self.channels
            .iter_mut()
            .for_each(|channel| *channel = silence.clone());
    }

    pub(crate) fn stereo_mut(&mut self) -> [&mut AudioRenderQuantumChannel; 2] {
        assert_eq!(self.number_of_channels(), 2);
        let (left, right) = self.channels.split_at_mut(1);
        [&mut left[0], &mut right[0]]
    }

    /// Up/down-mix to the given number of channels
    ///
    /// Speaker layouts follow the mixing rules for mono, stereo, quad and 5.1. Discrete
    /// interpretation, and layouts beyond 6 channels, fill with silence or drop channels.
    ///
    /// # Panics
    ///
    /// Panics when the number lies outside the [1, 32] range
    pub(crate) fn mix(&mut self, computed_number_of_channels: usize, interpretation: ChannelInterpretation) {
        let from = self.number_of_channels();
        let to = computed_number_of_channels;
        if from == to {
            return;
        }
        assert_valid_number_of_channels(to);

        if interpretation == ChannelInterpretation::Discrete || from > 6 || to > 6 {
            self.set_number_of_channels(to);
        } else if from < to {
            self.up_mix_speakers(to);
        } else {
            self.down_mix_speakers(to);
        }

        debug_assert_eq!(self.number_of_channels(), to);
    }

    fn up_mix_speakers(&mut self, to: usize) {
        let from = self.number_of_channels();
        let silence = self.channels[0].silence();
        let old = std::mem::take(&mut self.channels);

        // index of each source channel in the new layout, `None` is silence
        let layout: &[Option<usize>] = match (from, to) {
            // mono to stereo/quad: L = R = M
            (1, 2) => &[Some(0), Some(0)],
            (1, 4) => &[Some(0), Some(0), None, None],
            // mono to 5.1: C = M
            (1, 6) => &[None, None, Some(0), None, None, None],
            (2, 4) => &[Some(0), Some(1), None, None],
            // stereo to 5.1: L, R, C = 0, LFE = 0, SL = 0, SR = 0
            (2, 6) => &[Some(0), Some(1), None, None, None, None],
            // quad to 5.1: L, R, C = 0, LFE = 0, SL, SR
            (4, 6) => &[Some(0), Some(1), None, None, Some(2), Some(3)],
            // undefined speaker combinations are treated as discrete
            _ => &[],
        };

        if layout.is_empty() {
            self.channels = old;
            self.set_number_of_channels(to);
            return;
        }

        for source in layout {
            let channel = match source {
                Some(index) => old[*index].clone(),
                None => silence.clone(),
            };
            self.channels.push(channel);
        }
    }

    fn down_mix_speakers(&mut self, to: usize) {
        let from = self.number_of_channels();
        let sqrt05 = 0.5_f32.sqrt();

        match (from, to) {
            (2, 1) => {
                // M = 0.5 * (L + R)
                let right = self.channels[1].clone();
                self.channels[0]
                    .iter_mut()
                    .zip(right.iter())
                    .for_each(|(l, r)| *l = 0.5 * (*l + *r));
            }
            (4, 1) => {
                // M = 0.25 * (L + R + SL + SR)
                let [_, r, sl, sr] = [0, 1, 2, 3].map(|i| self.channels[i].clone());
                self.channels[0]
                    .iter_mut()
                    .enumerate()
                    .for_each(|(i, l)| *l = 0.25 * (*l + r[i] + sl[i] + sr[i]));
            }
            (6, 1) => {
                // M = sqrt(0.5) * (L + R) + C + 0.5 * (SL + SR)
                let [_, r, c, _, sl, sr] = [0, 1, 2, 3, 4, 5].map(|i| self.channels[i].clone());
                self.channels[0].iter_mut().enumerate().for_each(|(i, l)| {
                    *l = sqrt05.mul_add(*l + r[i], 0.5_f32.mul_add(sl[i] + sr[i], c[i]));
                });
            }
            (4, 2) => {
                // L = 0.5 * (L + SL), R = 0.5 * (R + SR)
                let sl = self.channels[2].clone();
                let sr = self.channels[3].clone();
                self.channels[0]
                    .iter_mut()
                    .zip(sl.iter())
                    .for_each(|(l, s)| *l = 0.5 * (*l + *s));
                self.channels[1]
                    .iter_mut()
                    .zip(sr.iter())
                    .for_each(|(r, s)| *r = 0.5 * (*r + *s));
            }
            (6, 2) => {
                // L = L + sqrt(0.5) * (C + SL), R = R + sqrt(0.5) * (C + SR)
                let c = self.channels[2].clone();
                let sl = self.channels[4].clone();
                let sr = self.channels[5].clone();
                self.channels[0]
                    .iter_mut()
                    .enumerate()
                    .for_each(|(i, l)| *l += sqrt05 * (c[i] + sl[i]));
                self.channels[1]
                    .iter_mut()
                    .enumerate()
                    .for_each(|(i, r)| *r += sqrt05 * (c[i] + sr[i]));
            }
            (6, 4) => {
                // L = L + sqrt(0.5) * C, R = R + sqrt(0.5) * C, SL, SR
                let c = self.channels[2].clone();
                self.channels[0]
                    .iter_mut()
                    .zip(c.iter())
                    .for_each(|(l, c)| *l += sqrt05 * c);
                self.channels[1]
                    .iter_mut()
                    .zip(c.iter())
                    .for_each(|(r, c)| *r += sqrt05 * c);
                self.channels.swap(2, 4);
                self.channels.swap(3, 5);
            }
            // undefined speaker combinations are treated as discrete
            _ => (),
        }

        self.channels.truncate(to);
    }

    /// Sum another bus into this one
    ///
    /// The other bus is first up/down-mixed to the channel count of `self`, which is the computed
    /// number of channels of the receiving input.
    pub(crate) fn add(&mut self, other: &Self, interpretation: ChannelInterpretation) {
        if other.is_silent() {
            return;
        }

        let target = self.number_of_channels();

        // both sides carry an upmixed mono signal, sum only once
        if interpretation == ChannelInterpretation::Speakers
            && self.all_channels_identical()
            && other.all_channels_identical()
            && (other.number_of_channels() == target || other.number_of_channels() == 1)
            && target <= 2
        {
            let mut sum = self.channels[0].clone();
            sum.add(&other.channels[0]);
            self.channels.iter_mut().for_each(|c| *c = sum.clone());
            return;
        }

        let mut mixed = other.clone();
        mixed.mix(target, interpretation);

        self.channels
            .iter_mut()
            .zip(mixed.channels.iter())
            .for_each(|(s, o)| s.add(o));
    }

    fn all_channels_identical(&self) -> bool {
        let first = &self.channels[0];
        self.channels[1..].iter().all(|c| c.ptr_eq(first))
    }
}

#[cfg(test)]
mod tests {
    use float_eq::assert_float_eq;

    use super::*;

    fn constant_channel(alloc: &Alloc, value: f32) -> AudioRenderQuantumChannel {
        let mut channel = alloc.silence();
        channel.iter_mut().for_each(|s| *s = value);
        channel
    }

    #[test]
    fn test_pool_reuse() {
        let alloc = Alloc::with_capacity(2);
        assert_eq!(alloc.pool_size(), 2);

        {
            let a = constant_channel(&alloc, 1.);
            assert_eq!(alloc.pool_size(), 1);

            // cloning shares the buffer
            let mut b = a.clone();
            assert_eq!(alloc.pool_size(), 1);

            // writing to the clone copies it
            b.iter_mut().for_each(|v| *v += 1.);
            assert_eq!(alloc.pool_size(), 0);
            assert_float_eq!(&a[..], &[1.; RENDER_QUANTUM_SIZE][..], abs_all <= 0.);
            assert_float_eq!(&b[..], &[2.; RENDER_QUANTUM_SIZE][..], abs_all <= 0.);
        }

        // both buffers are returned
        assert_eq!(alloc.pool_size(), 2);
    }

    #[test]
    fn test_silence() {
        let alloc = Alloc::with_capacity(1);
        let silence = alloc.silence();
        assert!(silence.is_silent());
        assert_float_eq!(&silence[..], &[0.; RENDER_QUANTUM_SIZE][..], abs_all <= 0.);

        let mut changed = silence.clone();
        changed[0] = 1.;
        assert!(!changed.is_silent());

        // the shared silence buffer is untouched
        assert!(silence.is_silent());
        assert_float_eq!(&alloc.silence()[..], &[0.; RENDER_QUANTUM_SIZE][..], abs_all <= 0.);
    }

    #[test]
    fn test_channel_add() {
        let alloc = Alloc::with_capacity(1);

        let mut signal = constant_channel(&alloc, 1.);
        signal.add(&alloc.silence());
        assert_float_eq!(&signal[..], &[1.; RENDER_QUANTUM_SIZE][..], abs_all <= 0.);

        let mut silence = alloc.silence();
        silence.add(&signal);
        assert_float_eq!(&silence[..], &[1.; RENDER_QUANTUM_SIZE][..], abs_all <= 0.);

        signal.add(&constant_channel(&alloc, 2.));
        assert_float_eq!(&signal[..], &[3.; RENDER_QUANTUM_SIZE][..], abs_all <= 0.);
    }

    #[test]
    fn test_make_silent_keeps_channels() {
        let alloc = Alloc::with_capacity(1);
        let mut bus = AudioRenderQuantum::from(constant_channel(&alloc, 1.));
        bus.set_number_of_channels(3);
        assert!(!bus.is_silent());

        bus.make_silent();
        assert!(bus.is_silent());
        assert_eq!(bus.number_of_channels(), 3);
    }

    #[test]
    fn test_mix_discrete() {
        let alloc = Alloc::with_capacity(1);
        let mut bus = AudioRenderQuantum::from(constant_channel(&alloc, 1.));

        bus.mix(2, ChannelInterpretation::Discrete);
        assert_eq!(bus.number_of_channels(), 2);
        assert_float_eq!(&bus.channel_data(0)[..], &[1.; RENDER_QUANTUM_SIZE][..], abs_all <= 0.);
        assert!(bus.channel_data(1).is_silent());

        bus.mix(1, ChannelInterpretation::Discrete);
        assert_eq!(bus.number_of_channels(), 1);
        assert_float_eq!(&bus.channel_data(0)[..], &[1.; RENDER_QUANTUM_SIZE][..], abs_all <= 0.);
    }

    #[test]
    fn test_mix_speakers_all_combinations() {
        let alloc = Alloc::with_capacity(1);
        let mut bus = AudioRenderQuantum::from(alloc.silence());

        for i in 1..MAX_CHANNELS {
            bus.set_number_of_channels(i);
            for j in 1..MAX_CHANNELS {
                bus.mix(j, ChannelInterpretation::Speakers);
                assert_eq!(bus.number_of_channels(), j);
            }
        }
    }

    #[test]
    fn test_upmix_mono_to_stereo_and_surround() {
        let alloc = Alloc::with_capacity(1);

        let mut bus = AudioRenderQuantum::from(constant_channel(&alloc, 1.));
        bus.mix(2, ChannelInterpretation::Speakers);
        assert_float_eq!(&bus.channel_data(0)[..], &[1.; RENDER_QUANTUM_SIZE][..], abs_all <= 0.);
        assert_float_eq!(&bus.channel_data(1)[..], &[1.; RENDER_QUANTUM_SIZE][..], abs_all <= 0.);

        let mut bus = AudioRenderQuantum::from(constant_channel(&alloc, 1.));
        bus.mix(6, ChannelInterpretation::Speakers);
        assert!(bus.channel_data(0).is_silent());
        assert_float_eq!(&bus.channel_data(2)[..], &[1.; RENDER_QUANTUM_SIZE][..], abs_all <= 0.);
        assert!(bus.channel_data(5).is_silent());
    }

    #[test]
    fn test_downmix_to_mono() {
        let alloc = Alloc::with_capacity(1);

        let mut bus = AudioRenderQuantum::from(constant_channel(&alloc, 1.));
        bus.set_number_of_channels(2);
        *bus.channel_data_mut(1) = constant_channel(&alloc, 0.5);
        bus.mix(1, ChannelInterpretation::Speakers);
        assert_float_eq!(&bus.channel_data(0)[..], &[0.75; RENDER_QUANTUM_SIZE][..], abs_all <= 0.);

        let mut bus = AudioRenderQuantum::from(constant_channel(&alloc, 1.));
        bus.set_number_of_channels(4);
        for i in 1..4 {
            *bus.channel_data_mut(i) = constant_channel(&alloc, 1.);
        }
        bus.mix(1, ChannelInterpretation::Speakers);
        assert_float_eq!(&bus.channel_data(0)[..], &[1.; RENDER_QUANTUM_SIZE][..], abs_all <= 0.);
    }

    #[test]
    fn test_downmix_surround_to_quad() {
        let alloc = Alloc::with_capacity(1);

        let mut bus = AudioRenderQuantum::from(alloc.silence());
        bus.set_number_of_channels(6);
        *bus.channel_data_mut(2) = constant_channel(&alloc, 1.); // C
        *bus.channel_data_mut(4) = constant_channel(&alloc, 0.25); // SL
        bus.mix(4, ChannelInterpretation::Speakers);

        let sqrt05 = 0.5_f32.sqrt();
        assert_float_eq!(&bus.channel_data(0)[..], &[sqrt05; RENDER_QUANTUM_SIZE][..], abs_all <= 1e-6);
        assert_float_eq!(&bus.channel_data(1)[..], &[sqrt05; RENDER_QUANTUM_SIZE][..], abs_all <= 1e-6);
        assert_float_eq!(&bus.channel_data(2)[..], &[0.25; RENDER_QUANTUM_SIZE][..], abs_all <= 0.);
        assert!(bus.channel_data(3).is_silent());
    }

    #[test]
    fn test_add_mixes_to_receiving_channel_count() {
        let alloc = Alloc::with_capacity(1);

        let mut sum = alloc.silent_quantum(2);
        let mono = AudioRenderQuantum::from(constant_channel(&alloc, 1.));
        sum.add(&mono, ChannelInterpretation::Speakers);
        sum.add(&mono, ChannelInterpretation::Speakers);

        assert_eq!(sum.number_of_channels(), 2);
        assert_float_eq!(&sum.channel_data(0)[..], &[2.; RENDER_QUANTUM_SIZE][..], abs_all <= 0.);
        assert_float_eq!(&sum.channel_data(1)[..], &[2.; RENDER_QUANTUM_SIZE][..], abs_all <= 0.);

        let mut sum = alloc.silent_quantum(2);
        sum.add(&mono, ChannelInterpretation::Discrete);
        assert_float_eq!(&sum.channel_data(0)[..], &[1.; RENDER_QUANTUM_SIZE][..], abs_all <= 0.);
        assert!(sum.channel_data(1).is_silent());
    }

    #[test]
    fn test_add_silence_is_noop() {
        let alloc = Alloc::with_capacity(1);
        let mut sum = alloc.silent_quantum(1);
        sum.add(&alloc.silent_quantum(2), ChannelInterpretation::Speakers);
        assert!(sum.is_silent());
        assert_eq!(sum.number_of_channels(), 1);
    }
}
