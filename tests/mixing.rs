use float_eq::assert_float_eq;

use web_audio_graph::context::{BaseAudioContext, OfflineAudioContext};
use web_audio_graph::node::{
    AudioNode, AudioScheduledSourceNode, ChannelCountMode, ChannelInterpretation,
    ConstantSourceNode, ConstantSourceOptions,
};
use web_audio_graph::RENDER_QUANTUM_SIZE;

fn constant_source(context: &OfflineAudioContext, offset: f32) -> ConstantSourceNode {
    let options = ConstantSourceOptions { offset };
    let src = ConstantSourceNode::new(context, options);
    src.start().unwrap();
    src
}

#[test]
fn test_fan_in_sum_and_disconnect() {
    let length = RENDER_QUANTUM_SIZE * 4;
    let mut context = OfflineAudioContext::new(1, length, 44_100.).unwrap();

    let gain = context.create_gain();
    gain.connect(&context.destination()).unwrap();

    let one = constant_source(&context, 1.);
    one.connect(&gain).unwrap();
    let two = constant_source(&context, 2.);
    two.connect(&gain).unwrap();

    let suspend_at = 2. * RENDER_QUANTUM_SIZE as f64 / 44_100.;
    context
        .suspend_sync(suspend_at, move |_| {
            one.disconnect();
        })
        .unwrap();

    let output = context.start_rendering_sync().unwrap();
    let output = output.get_channel_data(0);

    assert_float_eq!(
        output[..2 * RENDER_QUANTUM_SIZE],
        [3.; 2 * RENDER_QUANTUM_SIZE][..],
        abs_all <= 0.
    );
    assert_float_eq!(
        output[2 * RENDER_QUANTUM_SIZE..],
        [2.; 2 * RENDER_QUANTUM_SIZE][..],
        abs_all <= 0.
    );
}

/// Render a hard left panned constant through a gain with the given channel settings
fn render_mixed(
    mode: ChannelCountMode,
    channel_count: usize,
    interpretation: ChannelInterpretation,
) -> [f32; 2] {
    let mut context = OfflineAudioContext::new(2, RENDER_QUANTUM_SIZE, 44_100.).unwrap();

    let gain = context.create_gain();
    gain.set_channel_count(channel_count).unwrap();
    gain.set_channel_count_mode(mode).unwrap();
    gain.set_channel_interpretation(interpretation);
    gain.connect(&context.destination()).unwrap();

    let panner = context.create_stereo_panner();
    panner.pan().set_value(-1.);
    panner.connect(&gain).unwrap();

    let src = constant_source(&context, 1.);
    src.connect(&panner).unwrap();

    let output = context.start_rendering_sync().unwrap();
    [output.get_channel_data(0)[0], output.get_channel_data(1)[0]]
}

#[test]
fn test_channel_count_mode_max() {
    let [left, right] = render_mixed(ChannelCountMode::Max, 1, ChannelInterpretation::Speakers);
    assert_float_eq!(left, 1., abs <= 1e-6);
    assert_float_eq!(right, 0., abs <= 1e-6);
}

#[test]
fn test_channel_count_mode_clamped_max() {
    // down-mixed to mono, then up-mixed again by the destination
    let [left, right] = render_mixed(
        ChannelCountMode::ClampedMax,
        1,
        ChannelInterpretation::Speakers,
    );
    assert_float_eq!(left, 0.5, abs <= 1e-6);
    assert_float_eq!(right, 0.5, abs <= 1e-6);

    // clamping to more channels than connected keeps the stereo signal
    let [left, right] = render_mixed(
        ChannelCountMode::ClampedMax,
        4,
        ChannelInterpretation::Speakers,
    );
    assert_float_eq!(left, 1., abs <= 1e-6);
    assert_float_eq!(right, 0., abs <= 1e-6);
}

#[test]
fn test_channel_count_mode_explicit() {
    let [left, right] = render_mixed(
        ChannelCountMode::Explicit,
        1,
        ChannelInterpretation::Speakers,
    );
    assert_float_eq!(left, 0.5, abs <= 1e-6);
    assert_float_eq!(right, 0.5, abs <= 1e-6);

    // discrete down-mixing drops the right channel
    let [left, right] = render_mixed(
        ChannelCountMode::Explicit,
        1,
        ChannelInterpretation::Discrete,
    );
    assert_float_eq!(left, 1., abs <= 1e-6);
    assert_float_eq!(right, 1., abs <= 1e-6);
}

#[test]
fn test_channel_count_change_is_applied_between_quanta() {
    let length = RENDER_QUANTUM_SIZE * 2;
    let mut context = OfflineAudioContext::new(2, length, 44_100.).unwrap();

    let gain = context.create_gain();
    gain.connect(&context.destination()).unwrap();

    let panner = context.create_stereo_panner();
    panner.pan().set_value(-1.);
    panner.connect(&gain).unwrap();

    let src = constant_source(&context, 1.);
    src.connect(&panner).unwrap();

    let suspend_at = RENDER_QUANTUM_SIZE as f64 / 44_100.;
    context
        .suspend_sync(suspend_at, move |_| {
            gain.set_channel_count(1).unwrap();
            gain.set_channel_count_mode(ChannelCountMode::Explicit)
                .unwrap();
        })
        .unwrap();

    let output = context.start_rendering_sync().unwrap();
    let left = output.get_channel_data(0);
    let right = output.get_channel_data(1);

    assert_float_eq!(left[..RENDER_QUANTUM_SIZE], [1.; RENDER_QUANTUM_SIZE][..], abs_all <= 1e-6);
    assert_float_eq!(right[..RENDER_QUANTUM_SIZE], [0.; RENDER_QUANTUM_SIZE][..], abs_all <= 1e-6);
    assert_float_eq!(left[RENDER_QUANTUM_SIZE..], [0.5; RENDER_QUANTUM_SIZE][..], abs_all <= 1e-6);
    assert_float_eq!(right[RENDER_QUANTUM_SIZE..], [0.5; RENDER_QUANTUM_SIZE][..], abs_all <= 1e-6);
}

#[test]
fn test_mono_destination_down_mixes() {
    let mut context = OfflineAudioContext::new(1, RENDER_QUANTUM_SIZE, 44_100.).unwrap();

    let panner = context.create_stereo_panner();
    panner.pan().set_value(1.);
    panner.connect(&context.destination()).unwrap();

    let src = constant_source(&context, 1.);
    src.connect(&panner).unwrap();

    let output = context.start_rendering_sync().unwrap();
    assert_float_eq!(
        output.get_channel_data(0),
        &[0.5; RENDER_QUANTUM_SIZE][..],
        abs_all <= 1e-6
    );
}

#[test]
fn test_sum_is_independent_of_connection_order() {
    use rand::seq::SliceRandom;

    let mut offsets: Vec<f32> = (1..=8).map(|i| i as f32 * 0.25).collect();
    offsets.shuffle(&mut rand::thread_rng());

    let mut context = OfflineAudioContext::new(1, RENDER_QUANTUM_SIZE, 44_100.).unwrap();
    let gain = context.create_gain();
    gain.connect(&context.destination()).unwrap();

    let sources: Vec<_> = offsets
        .iter()
        .map(|&offset| {
            let src = constant_source(&context, offset);
            src.connect(&gain).unwrap();
            src
        })
        .collect();
    assert_eq!(sources.len(), 8);

    // quarters sum exactly, whatever the order
    let output = context.start_rendering_sync().unwrap();
    assert_float_eq!(
        output.get_channel_data(0),
        &[9.; RENDER_QUANTUM_SIZE][..],
        abs_all <= 0.
    );
}
