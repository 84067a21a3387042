//! Render a small feedback delay graph offline and write it to a WAV file
//!
//! `cargo run --release --bin render_graph -- [output.wav]`

use std::error::Error;
use std::f32::consts::PI;

use web_audio_graph::context::{BaseAudioContext, OfflineAudioContext};
use web_audio_graph::node::{AudioNode, AudioScheduledSourceNode};

const SAMPLE_RATE: f32 = 44_100.;
const DURATION: f32 = 4.;

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "render_graph.wav".to_string());

    let length = (SAMPLE_RATE * DURATION) as usize;
    let mut context = OfflineAudioContext::new(2, length, SAMPLE_RATE)?;

    // graph layout
    //                      |<- feedback <-|
    //          |-> pre-gain ---> delay ---->|
    // burst ---> panner --------------------> compressor ---> destination
    //                                                     |-> analyser

    let compressor = context.create_dynamics_compressor();
    compressor.connect(&context.destination())?;

    let analyser = context.create_analyser();
    compressor.connect(&analyser)?;

    let delay = context.create_delay(1.)?;
    delay.delay_time().set_value(0.3);
    delay.connect(&compressor)?;

    let feedback = context.create_gain();
    feedback.gain().set_value(0.6);
    delay.connect(&feedback)?;
    feedback.connect(&delay)?;

    let pre_gain = context.create_gain();
    pre_gain.gain().set_value(0.5);
    pre_gain.connect(&delay)?;

    let panner = context.create_stereo_panner();
    panner.pan().set_value_at_time(-0.8, 0.)?;
    panner.pan().linear_ramp_to_value_at_time(0.8, 1.)?;
    panner.connect(&compressor)?;
    panner.connect(&pre_gain)?;

    // 100ms sine burst with a linear decay
    let burst_length = (SAMPLE_RATE * 0.1) as usize;
    let burst: Vec<f32> = (0..burst_length)
        .map(|i| {
            let env = 1. - i as f32 / burst_length as f32;
            env * (2. * PI * 440. * i as f32 / SAMPLE_RATE).sin()
        })
        .collect();
    let burst = context.create_buffer(1, burst_length, SAMPLE_RATE).map(|mut b| {
        b.get_channel_data_mut(0).copy_from_slice(&burst);
        b
    })?;

    for when in [0., 1.5] {
        let src = context.create_buffer_source();
        src.set_buffer(burst.clone())?;
        src.connect(&panner)?;
        src.start_at(when)?;
    }

    context.suspend_sync(1., move |context| {
        let mut data = vec![0.; analyser.fft_size()];
        analyser.get_float_time_domain_data(&mut data);
        let peak = data.iter().fold(0f32, |acc, v| acc.max(v.abs()));
        log::info!("peak level at {:.3}s: {:.3}", context.current_time(), peak);
    })?;

    let output = context.start_rendering_sync()?;

    let spec = hound::WavSpec {
        channels: output.number_of_channels() as u16,
        sample_rate: output.sample_rate() as u32,
        bits_per_sample: 32,
        sample_format: hound::SampleFormat::Float,
    };
    let mut writer = hound::WavWriter::create(&path, spec)?;
    for i in 0..output.length() {
        for c in 0..output.number_of_channels() {
            writer.write_sample(output.get_channel_data(c)[i])?;
        }
    }
    writer.finalize()?;

    log::info!("wrote {} frames to {}", output.length(), path);

    Ok(())
}
