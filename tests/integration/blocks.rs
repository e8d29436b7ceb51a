//! Concrete block behavior: write-through setters, wildcard channels,
//! subscription state updates, and per-type attribute handling.

mod common;

use common::*;
use tesira::{BlockHandle, DspConfig, Value};
use ttp_test_utils::MockDevice;

// ---------------------------------------------------------------------------
// Level-and-mute blocks
// ---------------------------------------------------------------------------

async fn mixer_session() -> (MockDevice, tesira::Dsp) {
    let device = MockDevice::new();
    script_session(&device, HOSTNAME, &["MixerA", "device"]);
    script_level_block(
        &device,
        "MixerA",
        "LevelControl",
        &[("Left", -100.0, 12.0), ("Right", -100.0, 12.0)],
    );
    let dsp = connect(&device, DspConfig::default()).await;
    (device, dsp)
}

#[tokio::test]
async fn set_level_writes_through_on_ok() {
    let (device, dsp) = mixer_session().await;
    let mixer = dsp
        .block("MixerA")
        .and_then(BlockHandle::as_level_control)
        .expect("MixerA is live");

    // Preload both channel levels through the subscription stream.
    device.inject("! publishToken=MixerA.levels value=[-10.0,-10.0]");
    settle().await;
    assert_eq!(mixer.channels()[&1].level, Some(-10.0));

    device.respond("\"MixerA\" set level 1 -3.5", "+OK");
    let reply = mixer.set_level(-3.5, 1).await.expect("submit succeeds");
    assert!(reply.is_ok());

    assert_eq!(
        device.command_count_containing("\"MixerA\" set level 1 -3.5"),
        1,
        "exact wire command"
    );
    let channels = mixer.channels();
    assert_eq!(channels[&1].level, Some(-3.5), "written through");
    assert_eq!(channels[&2].level, Some(-10.0), "other channel untouched");
    dsp.close().await;
}

#[tokio::test]
async fn error_reply_leaves_local_state_untouched() {
    let (device, dsp) = mixer_session().await;
    let mixer = dsp
        .block("MixerA")
        .and_then(BlockHandle::as_level_control)
        .expect("MixerA is live");

    device.inject("! publishToken=MixerA.mutes value=[false,false]");
    settle().await;

    device.respond("\"MixerA\" set mute 1 true", "-ERR attribute is read-only");
    let reply = mixer.set_mute(true, 1).await.expect("submit succeeds");
    assert!(reply.is_error(), "device refusal is data, not an Err");
    assert_eq!(mixer.channels()[&1].muted, Some(false), "state unchanged");
    dsp.close().await;
}

#[tokio::test]
async fn wildcard_channel_zero_is_sent_literally_and_fans_out() {
    let (device, dsp) = mixer_session().await;
    let mixer = dsp
        .block("MixerA")
        .and_then(BlockHandle::as_level_control)
        .expect("MixerA is live");

    device.respond("\"MixerA\" set mute 0 true", "+OK");
    mixer.set_mute(true, 0).await.expect("submit succeeds");

    assert_eq!(
        device.command_count_containing("\"MixerA\" set mute 0 true"),
        1,
        "wildcard goes on the wire as literal 0"
    );
    let channels = mixer.channels();
    assert_eq!(channels[&1].muted, Some(true));
    assert_eq!(channels[&2].muted, Some(true));
    dsp.close().await;
}

#[tokio::test]
async fn mute_vector_updates_only_known_channels() {
    let (device, dsp) = mixer_session().await;
    let mixer = dsp
        .block("MixerA")
        .and_then(BlockHandle::as_level_control)
        .expect("MixerA is live");

    // Three entries for a two-channel block: the extra index is logged and
    // dropped, the rest applies.
    device.inject("! publishToken=MixerA.mutes value=[true,true,true]");
    settle().await;

    let channels = mixer.channels();
    assert_eq!(channels[&1].muted, Some(true));
    assert_eq!(channels[&2].muted, Some(true));
    assert_eq!(channels.len(), 2);
    dsp.close().await;
}

// ---------------------------------------------------------------------------
// DanteInput
// ---------------------------------------------------------------------------

#[tokio::test]
async fn dante_input_uses_channel_names_and_tracks_faults() {
    let device = MockDevice::new();
    script_session(&device, HOSTNAME, &["Dante1", "device"]);
    device.respond(
        "Dante1 get BLOCKTYPE",
        "-ERR no handler DanteInputInterface::Attributes",
    );
    device.respond("Dante1 get numChannels", "+OK value=2");
    device.respond("Dante1 get channelName 1", "+OK value=\"Stage Left\"");
    device.respond("Dante1 get channelName 2", "+OK value=\"Stage Right\"");
    for i in 1..=2 {
        device.respond(
            &format!("Dante1 get minLevel {}", i),
            "+OK value=-100.0",
        );
        device.respond(&format!("Dante1 get maxLevel {}", i), "+OK value=12.0");
    }
    let dsp = connect_default(&device).await;

    let dante = dsp
        .block("Dante1")
        .and_then(BlockHandle::as_dante_input)
        .expect("Dante1 is live");
    assert_eq!(dante.channels()[&1].label.as_deref(), Some("Stage Left"));
    assert_eq!(
        device.command_count_containing("get label"),
        0,
        "labels come from channelName"
    );

    device.inject("! publishToken=Dante1.faultOnInactive.1 index=1 value=true");
    settle().await;
    assert_eq!(dante.channels()[&1].fault_on_inactive, Some(true));
    assert_eq!(dante.channels()[&2].fault_on_inactive, None);

    device.respond("\"Dante1\" set invert 2 true", "+OK");
    dante.set_invert(true, 2).await.expect("submit succeeds");
    assert_eq!(dante.channels()[&2].inverted, Some(true));
    dsp.close().await;
}

// ---------------------------------------------------------------------------
// AudioOutput (polled)
// ---------------------------------------------------------------------------

#[tokio::test]
async fn audio_output_polls_status_and_generates_labels() {
    let device = MockDevice::new();
    script_session(&device, HOSTNAME, &["Out1", "device"]);
    device.respond(
        "Out1 get BLOCKTYPE",
        "-ERR no handler AudioOutputInterface::Attributes",
    );
    device.respond("Out1 get numChannels", "+OK value=2");
    for i in 1..=2 {
        device.respond(&format!("Out1 get minLevel {}", i), "+OK value=-100.0");
        device.respond(&format!("Out1 get maxLevel {}", i), "+OK value=0.0");
        device.respond(&format!("Out1 get mute {}", i), "+OK value=false");
        device.respond(&format!("Out1 get level {}", i), "+OK value=-20.0");
        device.respond(&format!("Out1 get invert {}", i), "+OK value=false");
    }
    let dsp = connect_default(&device).await;

    let out = dsp
        .block("Out1")
        .and_then(BlockHandle::as_audio_output)
        .expect("Out1 is live");
    let channels = out.channels();
    assert_eq!(channels[&1].label.as_deref(), Some("Out1_1"));
    assert_eq!(channels[&1].level, Some(-20.0));
    assert_eq!(channels[&2].inverted, Some(false));

    // The device state moves; a manual refresh picks it up.
    device.respond("Out1 get level 1", "+OK value=-5.0");
    device.respond("Out1 get invert 2", "+OK value=true");
    out.refresh_status().await.expect("refresh succeeds");
    let channels = out.channels();
    assert_eq!(channels[&1].level, Some(-5.0));
    assert_eq!(channels[&2].inverted, Some(true));
    dsp.close().await;
}

// ---------------------------------------------------------------------------
// Ducker
// ---------------------------------------------------------------------------

fn script_ducker(device: &MockDevice, block_id: &str) {
    device.respond(
        &format!("{} get BLOCKTYPE", block_id),
        "-ERR no handler DuckerInterface::Attributes",
    );
    let scalars: &[(&str, &str)] = &[
        ("mixSense", "false"),
        ("senseLevel", "-18.0"),
        ("senseMute", "false"),
        ("threshold", "-24.0"),
        ("duckingLevel", "-12.0"),
        ("attackTime", "0.01"),
        ("releaseTime", "0.5"),
        ("inputMute", "false"),
        ("inputLevel", "-10.0"),
        ("minInputLevel", "-100.0"),
        ("maxInputLevel", "12.0"),
        ("bypass", "false"),
    ];
    for (attr, value) in scalars {
        device.respond(
            &format!("{} get {}", block_id, attr),
            &format!("+OK value={}", value),
        );
    }
}

#[tokio::test]
async fn ducker_setters_assign_their_own_fields() {
    let device = MockDevice::new();
    script_session(&device, HOSTNAME, &["Duck1", "device"]);
    script_ducker(&device, "Duck1");
    let dsp = connect_default(&device).await;

    let ducker = dsp
        .block("Duck1")
        .and_then(BlockHandle::as_ducker)
        .expect("Duck1 is live");
    let before = ducker.state();
    assert_eq!(before.input_level, Some(-10.0));
    assert_eq!(before.release_time, Some(0.5));

    device.respond("\"Duck1\" set inputLevel -5.5", "+OK");
    ducker.set_input_level(-5.5).await.expect("submit succeeds");

    let after = ducker.state();
    assert_eq!(after.input_level, Some(-5.5));
    assert_eq!(after.release_time, Some(0.5), "unrelated field untouched");

    device.respond("\"Duck1\" set inputMute true", "+OK");
    ducker.set_input_mute(true).await.expect("submit succeeds");
    let after = ducker.state();
    assert_eq!(after.input_mute, Some(true));
    assert_eq!(after.release_time, Some(0.5), "unrelated field untouched");

    device.respond("\"Duck1\" set releaseTime 0.25", "+OK");
    ducker.set_release_time(0.25).await.expect("submit succeeds");
    assert_eq!(ducker.state().release_time, Some(0.25));
    dsp.close().await;
}

// ---------------------------------------------------------------------------
// SourceSelector
// ---------------------------------------------------------------------------

fn script_selector(device: &MockDevice, block_id: &str) {
    device.respond(
        &format!("{} get BLOCKTYPE", block_id),
        "-ERR no handler SourceSelectorInterface::Attributes",
    );
    device.respond(&format!("{} get stereoEnable", block_id), "+OK value=true");
    device.respond(&format!("{} get numInputs", block_id), "+OK value=6");
    device.respond(&format!("{} get numOutputs", block_id), "+OK value=2");
    device.respond(&format!("{} get outputMute", block_id), "+OK value=false");
    for i in 1..=3 {
        device.respond(
            &format!("{} get label {}", block_id, i),
            &format!("+OK value=\"Source {}\"", i),
        );
        device.respond(
            &format!("{} get sourceMinLevel {}", block_id, i),
            "+OK value=-100.0",
        );
        device.respond(
            &format!("{} get sourceMaxLevel {}", block_id, i),
            "+OK value=12.0",
        );
    }
    device.respond(
        &format!("{} get outputMinLevel", block_id),
        "+OK value=-100.0",
    );
    device.respond(&format!("{} get outputMaxLevel", block_id), "+OK value=12.0");
}

#[tokio::test]
async fn stereo_selector_halves_channel_counts() {
    let device = MockDevice::new();
    script_session(&device, HOSTNAME, &["Sel1", "device"]);
    script_selector(&device, "Sel1");
    let dsp = connect_default(&device).await;

    let selector = dsp
        .block("Sel1")
        .and_then(BlockHandle::as_source_selector)
        .expect("Sel1 is live");
    assert!(selector.stereo());
    assert_eq!(selector.num_input(), 3, "6 physical inputs = 3 stereo pairs");
    assert_eq!(selector.num_output(), 1);
    assert_eq!(selector.sources().len(), 3);
    assert_eq!(selector.selected_source(), 0, "nothing selected yet");
    dsp.close().await;
}

#[tokio::test]
async fn source_selection_publish_fans_out_selected_flags() {
    let device = MockDevice::new();
    script_session(&device, HOSTNAME, &["Sel1", "device"]);
    script_selector(&device, "Sel1");
    let dsp = connect_default(&device).await;
    let selector = dsp
        .block("Sel1")
        .and_then(BlockHandle::as_source_selector)
        .expect("Sel1 is live");

    device.inject("! publishToken=Sel1.sourceSelection value=2");
    settle().await;

    assert_eq!(selector.selected_source(), 2);
    let sources = selector.sources();
    assert!(!sources[&1].selected);
    assert!(sources[&2].selected);
    assert!(!sources[&3].selected);

    // Per-source level stream carries its channel index.
    device.inject("! publishToken=Sel1.sourceLevel.1 index=1 value=-7.5");
    settle().await;
    assert_eq!(selector.sources()[&1].level, Some(-7.5));

    device.inject("! publishToken=Sel1.outputLevel value=-4.0");
    device.inject("! publishToken=Sel1.outputMute value=true");
    settle().await;
    assert_eq!(selector.output_level(), Some(-4.0));
    assert!(selector.muted());
    dsp.close().await;
}

#[tokio::test]
async fn selector_setters_write_through() {
    let device = MockDevice::new();
    script_session(&device, HOSTNAME, &["Sel1", "device"]);
    script_selector(&device, "Sel1");
    let dsp = connect_default(&device).await;
    let selector = dsp
        .block("Sel1")
        .and_then(BlockHandle::as_source_selector)
        .expect("Sel1 is live");

    device.respond("\"Sel1\" set sourceSelection 3", "+OK");
    selector.select_source(3).await.expect("submit succeeds");
    assert_eq!(selector.selected_source(), 3);
    assert!(selector.sources()[&3].selected);

    device.respond("\"Sel1\" set sourceLevel 2 -9.5", "+OK");
    selector
        .set_source_level(2, -9.5)
        .await
        .expect("submit succeeds");
    assert_eq!(selector.sources()[&2].level, Some(-9.5));

    device.respond("\"Sel1\" set outputMute true", "+OK");
    selector.set_output_mute(true).await.expect("submit succeeds");
    assert!(selector.muted());
    dsp.close().await;
}

// ---------------------------------------------------------------------------
// Device-level commands
// ---------------------------------------------------------------------------

#[tokio::test]
async fn device_audio_commands_pass_through() {
    let device = MockDevice::new();
    script_session(&device, HOSTNAME, &["device"]);
    let dsp = connect_default(&device).await;

    dsp.start_system_audio().await.expect("submit succeeds");
    dsp.stop_system_audio().await.expect("submit succeeds");
    assert_eq!(device.command_count_containing("DEVICE startAudio"), 1);
    assert_eq!(device.command_count_containing("DEVICE stopAudio"), 1);

    let reply = dsp.device_command("DEVICE get hostname").await.expect("ok");
    assert_eq!(reply.value(), Some(&Value::Str(HOSTNAME.to_owned())));
    dsp.close().await;
}
