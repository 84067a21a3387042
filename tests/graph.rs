use float_eq::assert_float_eq;

use web_audio_graph::buffer::AudioBuffer;
use web_audio_graph::context::{BaseAudioContext, OfflineAudioContext};
use web_audio_graph::node::{AudioNode, AudioScheduledSourceNode};
use web_audio_graph::RENDER_QUANTUM_SIZE;

/*
             +----+
         +-> | g1 | --+
 +-----+ |   +----+   |   +---+
 | src | +            +-> | D |
 +-----+ |   +----+   |   +---+
         +-> | g2 | --+
             +----+
*/
#[test]
fn test_fan_out_is_processed_once() {
    let sample_rate = 44_100.;
    let length = RENDER_QUANTUM_SIZE * 3;
    let mut context = OfflineAudioContext::new(1, length, sample_rate).unwrap();

    // a ramp reveals a source that advances its playhead twice per quantum
    let ramp: Vec<f32> = (0..length).map(|i| i as f32).collect();
    let src = context.create_buffer_source();
    src.set_buffer(AudioBuffer::from(vec![ramp.clone()], sample_rate))
        .unwrap();

    let g1 = context.create_gain();
    let g2 = context.create_gain();
    src.connect(&g1).unwrap();
    src.connect(&g2).unwrap();
    g1.connect(&context.destination()).unwrap();
    g2.connect(&context.destination()).unwrap();
    src.start().unwrap();

    let output = context.start_rendering_sync().unwrap();
    let expected: Vec<f32> = ramp.iter().map(|v| 2. * v).collect();
    assert_float_eq!(output.get_channel_data(0), &expected[..], abs_all <= 0.);
}

/*
                  +-------+
 +-----+     +--> | delay | ------> D
 | src | ----+    +-------+   |
 +-----+          ^           |
                  |  +----+   |
                  +- | fb | <-+
                     +----+
*/
#[test]
fn test_feedback_cycle_reads_previous_quantum() {
    // one render quantum is 10 ms
    let sample_rate = 12_800.;
    let length = RENDER_QUANTUM_SIZE * 10;
    let mut context = OfflineAudioContext::new(1, length, sample_rate).unwrap();

    let delay = context.create_delay(1.).unwrap();
    delay.delay_time().set_value(0.02);
    delay.connect(&context.destination()).unwrap();

    let feedback = context.create_gain();
    feedback.gain().set_value(0.5);
    delay.connect(&feedback).unwrap();
    feedback.connect(&delay).unwrap();

    let src = context.create_buffer_source();
    src.set_buffer(AudioBuffer::from(vec![vec![1.]], sample_rate))
        .unwrap();
    src.connect(&delay).unwrap();
    src.start().unwrap();

    let output = context.start_rendering_sync().unwrap();
    let output = output.get_channel_data(0);

    // the node closing the cycle feeds back its output of the previous quantum, which adds
    // one quantum to every round trip
    let round_trip = 256 + RENDER_QUANTUM_SIZE;
    let mut expected = vec![0.; length];
    expected[256] = 1.;
    expected[256 + round_trip] = 0.5;
    expected[256 + 2 * round_trip] = 0.25;

    assert_float_eq!(output, &expected[..], abs_all <= 1e-4);
}

#[test]
fn test_param_connection() {
    let mut context = OfflineAudioContext::new(1, RENDER_QUANTUM_SIZE, 44_100.).unwrap();

    let gain = context.create_gain();
    gain.connect(&context.destination()).unwrap();

    let src = context.create_constant_source();
    src.connect(&gain).unwrap();
    src.start().unwrap();

    // the intrinsic value and the connected signal are summed
    let modulator = context.create_constant_source();
    modulator.offset().set_value(0.5);
    modulator.connect_param(gain.gain()).unwrap();
    modulator.start().unwrap();

    let output = context.start_rendering_sync().unwrap();
    assert_float_eq!(
        output.get_channel_data(0),
        &[1.5; RENDER_QUANTUM_SIZE][..],
        abs_all <= 0.
    );
}

#[test]
fn test_disconnected_subgraph_is_not_heard() {
    let mut context = OfflineAudioContext::new(1, RENDER_QUANTUM_SIZE, 44_100.).unwrap();

    let gain = context.create_gain();
    let src = context.create_constant_source();
    src.connect(&gain).unwrap();
    src.start().unwrap();

    let output = context.start_rendering_sync().unwrap();
    assert_float_eq!(
        output.get_channel_data(0),
        &[0.; RENDER_QUANTUM_SIZE][..],
        abs_all <= 0.
    );
}

#[test]
fn test_connect_twice_is_single_edge() {
    let mut context = OfflineAudioContext::new(1, RENDER_QUANTUM_SIZE, 44_100.).unwrap();

    let src = context.create_constant_source();
    src.connect(&context.destination()).unwrap();
    src.connect(&context.destination()).unwrap();
    src.start().unwrap();

    let output = context.start_rendering_sync().unwrap();
    assert_float_eq!(
        output.get_channel_data(0),
        &[1.; RENDER_QUANTUM_SIZE][..],
        abs_all <= 0.
    );
}

#[test]
fn test_source_start_is_sample_accurate() {
    let sample_rate = 44_100.;
    let mut context = OfflineAudioContext::new(1, RENDER_QUANTUM_SIZE * 2, sample_rate).unwrap();

    let src = context.create_constant_source();
    src.connect(&context.destination()).unwrap();
    // half a frame off, to keep accumulated rounding errors out of the comparison
    src.start_at(199.5 / sample_rate as f64).unwrap();
    src.stop_at(209.5 / sample_rate as f64).unwrap();

    let output = context.start_rendering_sync().unwrap();
    let mut expected = vec![0.; RENDER_QUANTUM_SIZE * 2];
    expected[200..210].fill(1.);
    assert_float_eq!(output.get_channel_data(0), &expected[..], abs_all <= 0.);
}
