use web_audio_graph::context::{BaseAudioContext, OfflineAudioContext};
use web_audio_graph::node::{
    AudioNode, AudioScheduledSourceNode, ChannelCountMode, DelayNode, DelayOptions,
};
use web_audio_graph::{ErrorKind, MAX_CHANNELS, RENDER_QUANTUM_SIZE};

fn context() -> OfflineAudioContext {
    OfflineAudioContext::new(2, RENDER_QUANTUM_SIZE, 44_100.).unwrap()
}

#[test]
fn test_connect_index_size() {
    let context = context();
    let gain = context.create_gain();
    let dest = context.destination();

    let err = gain.connect_from_output_to_input(&dest, 99, 0).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::IndexSizeError);

    let err = gain.connect_from_output_to_input(&dest, 0, 1).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::IndexSizeError);

    // source nodes have no inputs
    let src = context.create_constant_source();
    let err = gain.connect(&src).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::IndexSizeError);

    let err = gain.connect_param_from_output(src.offset(), 1).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::IndexSizeError);
}

#[test]
fn test_connect_syntax() {
    let context = context();
    let gain = context.create_gain();

    let err = gain
        .registration()
        .handler()
        .connect(None, 0, 0)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::SyntaxError);

    let err = gain
        .registration()
        .handler()
        .connect_param(None, 0)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::SyntaxError);

    // nodes and params of another context
    let other = self::context();
    let foreign_gain = other.create_gain();

    let err = gain.connect(&foreign_gain).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::SyntaxError);

    let err = gain.connect(&other.destination()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::SyntaxError);

    let err = gain.connect_param(foreign_gain.gain()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::SyntaxError);
}

#[test]
fn test_connect_invalid_state() {
    let mut context = context();
    let gain = context.create_gain();
    let src = context.create_constant_source();

    context.close();

    let err = src.connect(&gain).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidStateError);

    let err = src.connect_param(gain.gain()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidStateError);

    let err = context.start_rendering_sync().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidStateError);
}

#[test]
fn test_disconnect_invalid_access() {
    let context = context();
    let gain = context.create_gain();
    let other_gain = context.create_gain();
    let src = context.create_constant_source();

    let err = src.disconnect_dest(&gain).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidAccessError);

    src.connect(&gain).unwrap();
    let err = src.disconnect_dest(&other_gain).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidAccessError);

    let err = src.disconnect_param(gain.gain()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidAccessError);

    src.disconnect_dest(&gain).unwrap();
    let err = src.disconnect_dest(&gain).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidAccessError);

    // disconnecting everything never fails
    src.disconnect();
}

#[test]
fn test_disconnect_index_size() {
    let context = context();
    let gain = context.create_gain();
    let src = context.create_constant_source();
    src.connect(&gain).unwrap();

    let err = src.disconnect_output(1).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::IndexSizeError);

    let err = src.disconnect_dest_from_output(&gain, 1).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::IndexSizeError);

    let err = src
        .disconnect_dest_from_output_to_input(&gain, 0, 1)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::IndexSizeError);

    src.disconnect_dest_from_output_to_input(&gain, 0, 0)
        .unwrap();
}

#[test]
fn test_channel_config_not_supported() {
    let context = context();
    let gain = context.create_gain();

    let err = gain.set_channel_count(0).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotSupportedError);

    let err = gain.set_channel_count(MAX_CHANNELS + 1).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotSupportedError);

    gain.set_channel_count(MAX_CHANNELS).unwrap();
    assert_eq!(gain.channel_count(), MAX_CHANNELS);

    // stereo only nodes
    let panner = context.create_stereo_panner();
    let err = panner.set_channel_count(3).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotSupportedError);
    let err = panner
        .set_channel_count_mode(ChannelCountMode::Max)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotSupportedError);

    let compressor = context.create_dynamics_compressor();
    let err = compressor.set_channel_count(3).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotSupportedError);
}

#[test]
fn test_node_options_not_supported() {
    let context = context();

    let options = DelayOptions {
        max_delay_time: 0.,
        ..DelayOptions::default()
    };
    let err = DelayNode::new(&context, options).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotSupportedError);

    let err = context.create_delay(-1.).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotSupportedError);
}

#[test]
fn test_scheduling_errors() {
    let context = context();
    let src = context.create_constant_source();

    let err = src.stop().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidStateError);

    let err = src.start_at(-1.).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::RangeError);

    src.start().unwrap();
    let err = src.start().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidStateError);
}

#[test]
fn test_suspend_errors() {
    let mut context = context();

    let err = context.suspend_sync(-1., |_| ()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidStateError);

    let err = context.suspend_sync(f64::NAN, |_| ()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidStateError);

    let err = context.suspend_sync(1., |_| ()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidStateError);

    context.suspend_sync(0., |_| ()).unwrap();
    let err = context.suspend_sync(0., |_| ()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidStateError);
}

#[test]
fn test_error_display() {
    let context = context();
    let gain = context.create_gain();

    let err = gain.set_channel_count(0).unwrap_err();
    let message = err.to_string();
    assert!(message.starts_with("NotSupportedError"), "{}", message);
}
