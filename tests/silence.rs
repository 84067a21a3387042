use float_eq::assert_float_eq;

use web_audio_graph::buffer::AudioBuffer;
use web_audio_graph::context::{BaseAudioContext, OfflineAudioContext};
use web_audio_graph::node::{AudioNode, AudioScheduledSourceNode};

const SAMPLE_RATE: f32 = 12_800.;

fn schedule_click(context: &OfflineAudioContext, dest: &dyn AudioNode, when: f64) {
    let src = context.create_buffer_source();
    src.set_buffer(AudioBuffer::from(vec![vec![1.]], SAMPLE_RATE))
        .unwrap();
    src.connect(dest).unwrap();
    src.start_at(when).unwrap();
}

#[test]
fn test_delay_wakes_up_after_tail() {
    // 1 second, max delay of 0.1 second
    let length = SAMPLE_RATE as usize;
    let mut context = OfflineAudioContext::new(1, length, SAMPLE_RATE).unwrap();

    let delay = context.create_delay(0.1).unwrap();
    delay.delay_time().set_value(0.05);
    delay.connect(&context.destination()).unwrap();

    // the second click arrives long after the tail of the first one ran out
    schedule_click(&context, &delay, 0.);
    schedule_click(&context, &delay, 0.5);

    let output = context.start_rendering_sync().unwrap();
    let output = output.get_channel_data(0);

    let mut expected = vec![0.; length];
    expected[640] = 1.;
    expected[6400 + 640] = 1.;
    assert_float_eq!(output, &expected[..], abs_all <= 1e-4);
}

#[test]
fn test_convolver_tail_after_input_ends() {
    let length = 1024;
    let mut context = OfflineAudioContext::new(1, length, SAMPLE_RATE).unwrap();

    // impulse response of 600 frames, with a tap at the end
    let mut response = vec![0.; 600];
    response[0] = 1.;
    response[599] = 0.5;

    let convolver = context.create_convolver();
    convolver.set_normalize(false);
    convolver
        .set_buffer(Some(AudioBuffer::from(vec![response], SAMPLE_RATE)))
        .unwrap();
    convolver.connect(&context.destination()).unwrap();

    schedule_click(&context, &convolver, 0.);

    let output = context.start_rendering_sync().unwrap();
    let output = output.get_channel_data(0);

    let mut expected = vec![0.; length];
    expected[0] = 1.;
    expected[599] = 0.5;
    assert_float_eq!(output, &expected[..], abs_all <= 1e-5);
}

#[test]
fn test_convolver_wakes_up_after_tail() {
    let length = SAMPLE_RATE as usize;
    let mut context = OfflineAudioContext::new(1, length, SAMPLE_RATE).unwrap();

    let mut response = vec![0.; 200];
    response[0] = 1.;
    response[150] = 0.5;

    let convolver = context.create_convolver();
    convolver.set_normalize(false);
    convolver
        .set_buffer(Some(AudioBuffer::from(vec![response], SAMPLE_RATE)))
        .unwrap();
    convolver.connect(&context.destination()).unwrap();

    // the convolver is skipped between the clicks, the second echo must match the first
    schedule_click(&context, &convolver, 0.);
    schedule_click(&context, &convolver, 0.5);

    let output = context.start_rendering_sync().unwrap();
    let output = output.get_channel_data(0);

    let mut expected = vec![0.; length];
    expected[0] = 1.;
    expected[150] = 0.5;
    expected[6400] = 1.;
    expected[6400 + 150] = 0.5;
    assert_float_eq!(output, &expected[..], abs_all <= 1e-5);
}

#[test]
fn test_gain_passes_sparse_clicks() {
    let length = SAMPLE_RATE as usize;
    let mut context = OfflineAudioContext::new(1, length, SAMPLE_RATE).unwrap();

    let gain = context.create_gain();
    gain.gain().set_value(0.5);
    gain.connect(&context.destination()).unwrap();

    schedule_click(&context, &gain, 0.);
    schedule_click(&context, &gain, 0.75);

    let output = context.start_rendering_sync().unwrap();
    let output = output.get_channel_data(0);

    let mut expected = vec![0.; length];
    expected[0] = 0.5;
    expected[9600] = 0.5;
    assert_float_eq!(output, &expected[..], abs_all <= 0.);
}

#[test]
fn test_compressor_look_ahead_outlives_source() {
    let sample_rate = 44_100.;
    let quantum = web_audio_graph::RENDER_QUANTUM_SIZE;
    let mut context = OfflineAudioContext::new(1, quantum * 8, sample_rate).unwrap();

    let compressor = context.create_dynamics_compressor();
    compressor.connect(&context.destination()).unwrap();

    let src = context.create_buffer_source();
    src.set_buffer(AudioBuffer::from(vec![vec![1.; quantum * 5]], sample_rate))
        .unwrap();
    src.connect(&compressor).unwrap();
    src.start().unwrap();

    let output = context.start_rendering_sync().unwrap();
    let output = output.get_channel_data(0);

    // 6 ms look-ahead is 3 render quanta at this rate
    let non_zero: Vec<usize> = output
        .chunks(quantum)
        .map(|chunk| chunk.iter().filter(|s| **s != 0.).count())
        .collect();
    assert_eq!(non_zero, vec![0, 0, 0, quantum, quantum, quantum, quantum, quantum]);

    // the source is released, the delayed signal kept the compressor awake
    assert!(src.registration().handler().is_disabled());
    assert!(!compressor.registration().handler().is_disabled());
}
