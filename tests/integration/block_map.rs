//! Block map cache lifecycle: save, reload without discovery, and every
//! identity mismatch that must force a full re-discovery.

mod common;

use common::*;
use tesira::{BlockHandle, DspConfig, LevelControl};
use ttp_test_utils::MockDevice;

const ALIASES: &[&str] = &["Level1", "device"];

fn fresh_device() -> MockDevice {
    let device = MockDevice::new();
    script_session(&device, HOSTNAME, ALIASES);
    script_level_block(
        &device,
        "Level1",
        "LevelControl",
        &[("Lobby L", -100.0, 12.0), ("Lobby R", -100.0, 12.0)],
    );
    device
}

/// Run one discovery session and persist the block map.
async fn save_map(path: &std::path::Path) {
    let device = fresh_device();
    let dsp = connect_default(&device).await;
    let saved = dsp.save_block_map(path).expect("save succeeds");
    assert_eq!(saved.extension().and_then(|e| e.to_str()), Some("bmap"));
    dsp.close().await;
}

#[tokio::test]
async fn saved_map_carries_identity_and_helpers() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("site.bmap");
    save_map(&path).await;

    let text = std::fs::read_to_string(&path).expect("file exists");
    let json: serde_json::Value = serde_json::from_str(&text).expect("valid JSON");
    assert_eq!(json["hostname"], HOSTNAME);
    assert_eq!(json["blocks"]["Level1"]["type"], "LevelControl");
    assert_eq!(
        json["blocks"]["Level1"]["attributes"]["version"],
        LevelControl::VERSION
    );
    let aliases: Vec<&str> = json["aliases"]
        .as_array()
        .expect("alias array")
        .iter()
        .filter_map(|v| v.as_str())
        .collect();
    assert_eq!(aliases, vec!["Level1", "device"], "aliases are sorted");
}

#[tokio::test]
async fn matching_cache_skips_discovery_entirely() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("site.bmap");
    save_map(&path).await;

    // Second session: identical device identity, cache enabled. No
    // discovery probe and no topology query may go to the wire.
    let device = fresh_device();
    let dsp = connect(
        &device,
        DspConfig {
            block_map_file: Some(path),
            ..DspConfig::default()
        },
    )
    .await;

    assert_eq!(device.command_count_containing("BLOCKTYPE"), 0);
    assert_eq!(device.command_count_containing("numChannels"), 0);
    assert_eq!(device.command_count_containing("get label"), 0);

    let level = dsp
        .block("Level1")
        .and_then(BlockHandle::as_level_control)
        .expect("block restored from cache");
    let channels = level.channels();
    assert_eq!(channels[&1].label.as_deref(), Some("Lobby L"));
    assert_eq!(channels[&2].max_level, Some(12.0));
    dsp.close().await;
}

#[tokio::test]
async fn hostname_mismatch_forces_discovery() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("site.bmap");
    save_map(&path).await;

    let device = MockDevice::new();
    script_session(&device, "dsp-replacement", ALIASES);
    script_level_block(
        &device,
        "Level1",
        "LevelControl",
        &[("Lobby L", -100.0, 12.0), ("Lobby R", -100.0, 12.0)],
    );
    let dsp = connect(
        &device,
        DspConfig {
            block_map_file: Some(path),
            ..DspConfig::default()
        },
    )
    .await;

    assert!(
        device.command_count_containing("BLOCKTYPE") >= 1,
        "cache must be discarded and discovery run"
    );
    assert!(dsp.block("Level1").is_some());
    dsp.close().await;
}

#[tokio::test]
async fn alias_change_forces_discovery() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("site.bmap");
    save_map(&path).await;

    let device = MockDevice::new();
    script_session(&device, HOSTNAME, &["Level1", "Level2", "device"]);
    for id in ["Level1", "Level2"] {
        script_level_block(
            &device,
            id,
            "LevelControl",
            &[("Lobby L", -100.0, 12.0), ("Lobby R", -100.0, 12.0)],
        );
    }
    let dsp = connect(
        &device,
        DspConfig {
            block_map_file: Some(path),
            ..DspConfig::default()
        },
    )
    .await;

    assert!(device.command_count_containing("BLOCKTYPE") >= 2);
    assert!(dsp.block("Level2").is_some());
    dsp.close().await;
}

#[tokio::test]
async fn library_version_change_forces_discovery() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("site.bmap");
    save_map(&path).await;

    // Pretend the file was written by a different library release.
    let text = std::fs::read_to_string(&path).expect("file exists");
    let mut json: serde_json::Value = serde_json::from_str(&text).expect("valid JSON");
    json["library_version"] = serde_json::Value::String("0.0.0-other".to_owned());
    std::fs::write(&path, serde_json::to_string_pretty(&json).expect("serializes"))
        .expect("rewrite");

    let device = fresh_device();
    let dsp = connect(
        &device,
        DspConfig {
            block_map_file: Some(path),
            ..DspConfig::default()
        },
    )
    .await;

    assert!(device.command_count_containing("BLOCKTYPE") >= 1);
    dsp.close().await;
}

#[tokio::test]
async fn helper_version_mismatch_makes_the_block_self_query() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("site.bmap");
    save_map(&path).await;

    // Device identity still matches, but this one block's helper was
    // written by a different block-code version.
    let text = std::fs::read_to_string(&path).expect("file exists");
    let mut json: serde_json::Value = serde_json::from_str(&text).expect("valid JSON");
    json["blocks"]["Level1"]["attributes"]["version"] =
        serde_json::Value::String("9.9.9".to_owned());
    std::fs::write(&path, serde_json::to_string_pretty(&json).expect("serializes"))
        .expect("rewrite");

    let device = fresh_device();
    let dsp = connect(
        &device,
        DspConfig {
            block_map_file: Some(path),
            ..DspConfig::default()
        },
    )
    .await;

    assert_eq!(
        device.command_count_containing("BLOCKTYPE"),
        0,
        "the map itself is still valid"
    );
    assert_eq!(
        device.command_count_containing("numChannels"),
        1,
        "the gated block re-queries its own topology"
    );
    assert!(dsp.block("Level1").is_some());
    dsp.close().await;
}

#[tokio::test]
async fn missing_cache_file_falls_back_to_discovery() {
    let dir = tempfile::tempdir().expect("tempdir");
    let device = fresh_device();
    let dsp = connect(
        &device,
        DspConfig {
            block_map_file: Some(dir.path().join("nonexistent.bmap")),
            ..DspConfig::default()
        },
    )
    .await;

    assert!(device.command_count_containing("BLOCKTYPE") >= 1);
    assert!(dsp.block("Level1").is_some());
    dsp.close().await;
}
