//! General purpose audio signal data structures
use std::sync::Arc;

use crate::{validate_number_of_channels, validate_sample_rate, AudioGraphError};

/// Options for constructing an [`AudioBuffer`]
#[derive(Clone, Debug)]
pub struct AudioBufferOptions {
    /// The number of channels for the buffer
    pub number_of_channels: usize,
    /// The length in sample frames of the buffer
    pub length: usize,
    /// The sample rate in Hz for the buffer
    pub sample_rate: f32,
}

/// Memory-resident audio asset, basically a matrix of channels * samples
///
/// An AudioBuffer has copy-on-write semantics, so it is cheap to clone. The channel data is
/// shared with the nodes that play it.
#[derive(Clone, Debug)]
pub struct AudioBuffer {
    channels: Vec<ChannelData>,
    sample_rate: f32,
}

#[derive(Clone, Debug)]
struct ChannelData {
    data: Arc<Vec<f32>>,
}

impl ChannelData {
    fn new(length: usize) -> Self {
        Self {
            data: Arc::new(vec![0.; length]),
        }
    }

    fn from(data: Vec<f32>) -> Self {
        Self {
            data: Arc::new(data),
        }
    }

    fn as_slice(&self) -> &[f32] {
        &self.data[..]
    }

    fn as_mut_slice(&mut self) -> &mut [f32] {
        &mut Arc::make_mut(&mut self.data)[..]
    }
}

impl AudioBuffer {
    /// Allocate a silent audiobuffer with [`AudioBufferOptions`]
    ///
    /// # Errors
    ///
    /// `NotSupportedError` when the number of channels lies outside [1, 32], the length is
    /// zero, or the sample rate is out of range
    pub fn new(options: AudioBufferOptions) -> Result<Self, AudioGraphError> {
        validate_number_of_channels(options.number_of_channels)?;
        validate_sample_rate(options.sample_rate)?;
        if options.length == 0 {
            return Err(AudioGraphError::not_supported(
                "buffer length should be greater than zero",
            ));
        }

        let channels = (0..options.number_of_channels)
            .map(|_| ChannelData::new(options.length))
            .collect();

        Ok(Self {
            channels,
            sample_rate: options.sample_rate,
        })
    }

    /// Convert raw samples to an AudioBuffer
    ///
    /// The outer Vec determines the channels. The inner Vecs should have the same length.
    ///
    /// # Panics
    ///
    /// This function will panic if:
    /// - the given sample rate is zero
    /// - the given samples are empty or exceed the max number of channels
    /// - the lengths of every channel are not equal
    pub fn from(samples: Vec<Vec<f32>>, sample_rate: f32) -> Self {
        assert!(sample_rate > 0., "sample rate should be positive");
        crate::assert_valid_number_of_channels(samples.len());
        let length = samples[0].len();
        assert!(
            samples.iter().all(|c| c.len() == length),
            "all channels should have the same length"
        );

        Self {
            channels: samples.into_iter().map(ChannelData::from).collect(),
            sample_rate,
        }
    }

    /// Number of channels in this `AudioBuffer`
    pub fn number_of_channels(&self) -> usize {
        self.channels.len()
    }

    /// Number of samples per channel in this `AudioBuffer`
    pub fn length(&self) -> usize {
        self.channels.first().map_or(0, |c| c.data.len())
    }

    /// Sample rate of this `AudioBuffer` in Hertz
    pub fn sample_rate(&self) -> f32 {
        self.sample_rate
    }

    /// Duration in seconds of the `AudioBuffer`
    pub fn duration(&self) -> f64 {
        self.length() as f64 / self.sample_rate as f64
    }

    fn check_channel(&self, channel_number: usize) -> Result<(), AudioGraphError> {
        if channel_number >= self.number_of_channels() {
            return Err(AudioGraphError::index_size(format!(
                "channel number {} exceeds number of channels {}",
                channel_number,
                self.number_of_channels()
            )));
        }
        Ok(())
    }

    /// Return a read-only copy of the underlying data of the channel
    ///
    /// # Panics
    ///
    /// This function will panic if:
    /// - the given channel number is greater than or equal to the number of channels.
    pub fn get_channel_data(&self, channel_number: usize) -> &[f32] {
        self.channels[channel_number].as_slice()
    }

    /// Return a mutable slice of the underlying data of the channel, copying it when shared
    ///
    /// # Panics
    ///
    /// This function will panic if:
    /// - the given channel number is greater than or equal to the number of channels.
    pub fn get_channel_data_mut(&mut self, channel_number: usize) -> &mut [f32] {
        self.channels[channel_number].as_mut_slice()
    }

    /// Copy data from a given channel to the given `Vec`, starting at `offset`
    ///
    /// # Errors
    ///
    /// `IndexSizeError` when the channel number is out of bounds
    pub fn copy_from_channel_with_offset(
        &self,
        destination: &mut [f32],
        channel_number: usize,
        offset: usize,
    ) -> Result<(), AudioGraphError> {
        self.check_channel(channel_number)?;
        let channel = self.get_channel_data(channel_number);
        let offset = offset.min(channel.len());
        let frames = (channel.len() - offset).min(destination.len());
        destination[..frames].copy_from_slice(&channel[offset..offset + frames]);
        Ok(())
    }

    /// Copy data from a given source to the given channel, starting at `offset`
    ///
    /// # Errors
    ///
    /// `IndexSizeError` when the channel number is out of bounds
    pub fn copy_to_channel_with_offset(
        &mut self,
        source: &[f32],
        channel_number: usize,
        offset: usize,
    ) -> Result<(), AudioGraphError> {
        self.check_channel(channel_number)?;
        let channel = self.get_channel_data_mut(channel_number);
        let offset = offset.min(channel.len());
        let frames = (channel.len() - offset).min(source.len());
        channel[offset..offset + frames].copy_from_slice(&source[..frames]);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use float_eq::assert_float_eq;

    use super::*;
    use crate::ErrorKind;

    #[test]
    fn test_constructor() {
        let options = AudioBufferOptions {
            number_of_channels: 1,
            length: 10,
            sample_rate: 10_000.,
        };

        let audio_buffer = AudioBuffer::new(options).unwrap();

        assert_eq!(audio_buffer.number_of_channels(), 1);
        assert_eq!(audio_buffer.length(), 10);
        assert_float_eq!(audio_buffer.sample_rate(), 10_000., abs <= 0.);
        assert_float_eq!(audio_buffer.duration(), 0.001, abs <= 1e-12);
    }

    #[test]
    fn test_invalid_constructor() {
        let options = AudioBufferOptions {
            number_of_channels: 0,
            length: 10,
            sample_rate: 10_000.,
        };
        let err = AudioBuffer::new(options.clone()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotSupportedError);

        let options = AudioBufferOptions {
            number_of_channels: 1,
            length: 0,
            ..options
        };
        assert!(AudioBuffer::new(options).is_err());
    }

    #[test]
    fn test_copy_on_write() {
        let original = AudioBuffer::from(vec![vec![1.; 4]], 48_000.);
        let mut copy = original.clone();
        copy.get_channel_data_mut(0)[0] = 2.;

        assert_float_eq!(original.get_channel_data(0)[0], 1., abs <= 0.);
        assert_float_eq!(copy.get_channel_data(0)[0], 2., abs <= 0.);
    }

    #[test]
    fn test_copy_with_offset() {
        let mut buffer = AudioBuffer::from(vec![vec![0.; 5]], 48_000.);
        buffer
            .copy_to_channel_with_offset(&[1., 2., 3.], 0, 3)
            .unwrap();
        assert_float_eq!(
            buffer.get_channel_data(0),
            &[0., 0., 0., 1., 2.][..],
            abs_all <= 0.
        );

        let mut destination = [9.; 4];
        buffer
            .copy_from_channel_with_offset(&mut destination, 0, 2)
            .unwrap();
        assert_float_eq!(destination, [0., 1., 2., 9.], abs_all <= 0.);

        let err = buffer
            .copy_from_channel_with_offset(&mut destination, 1, 0)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::IndexSizeError);
    }
}
