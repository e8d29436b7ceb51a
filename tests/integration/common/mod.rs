//! Shared scripting for the mock-device integration suites.
#![allow(dead_code)]

use tesira::{Dsp, DspConfig};
use ttp_test_utils::MockDevice;

pub const HOSTNAME: &str = "dsp-atrium";

/// Script the connect baseline: device identity and the alias list.
pub fn script_session(device: &MockDevice, hostname: &str, aliases: &[&str]) {
    device.respond(
        "DEVICE get hostname",
        &format!("+OK value=\"{}\"", hostname),
    );
    device.respond("DEVICE get version", "+OK value=\"4.6.1\"");
    device.respond("DEVICE get serialNumber", "+OK value=\"03512877\"");
    let quoted: Vec<String> = aliases.iter().map(|a| format!("\"{}\"", a)).collect();
    device.respond(
        "SESSION get aliases",
        &format!("+OK value=[{}]", quoted.join(" ")),
    );
    device.respond("DEVICE get discoveredServers", "+OK value=[]");
    device.respond(
        "DEVICE get activeFaultList",
        "+OK value=[{id=\"NO_FAULT\" name=\"none\"}]",
    );
    device.respond(
        "DEVICE get networkStatus",
        "+OK value={hostname=\"dsp-atrium\" dhcp=true}",
    );
}

/// Script discovery and topology for a subscribing level/mute block.
pub fn script_level_block(
    device: &MockDevice,
    block_id: &str,
    block_type: &str,
    levels: &[(&str, f64, f64)],
) {
    device.respond(
        &format!("{} get BLOCKTYPE", block_id),
        &format!("-ERR no handler {}Interface::Attributes", block_type),
    );
    device.respond(
        &format!("{} get numChannels", block_id),
        &format!("+OK value={}", levels.len()),
    );
    for (i, (label, min, max)) in levels.iter().enumerate() {
        let index = i + 1;
        device.respond(
            &format!("{} get label {}", block_id, index),
            &format!("+OK value=\"{}\"", label),
        );
        device.respond(
            &format!("{} get minLevel {}", block_id, index),
            &format!("+OK value={:?}", min),
        );
        device.respond(
            &format!("{} get maxLevel {}", block_id, index),
            &format!("+OK value={:?}", max),
        );
    }
}

/// Script discovery and attributes for a mute control block.
pub fn script_mute_block(device: &MockDevice, block_id: &str, labels: &[&str]) {
    device.respond(
        &format!("{} get BLOCKTYPE", block_id),
        "-ERR no handler MuteControlInterface::Attributes",
    );
    device.respond(&format!("{} get ganged", block_id), "+OK value=false");
    device.respond(
        &format!("{} get numChannels", block_id),
        &format!("+OK value={}", labels.len()),
    );
    for (i, label) in labels.iter().enumerate() {
        device.respond(
            &format!("{} get label {}", block_id, i + 1),
            &format!("+OK value=\"{}\"", label),
        );
    }
}

/// Opt-in test logging: `RUST_LOG=tesira=debug cargo test -- --nocapture`.
pub fn init_tracing() {
    static INIT: std::sync::Once = std::sync::Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .try_init();
    });
}

/// Connect a fresh `Dsp` against the device with the given config.
pub async fn connect(device: &MockDevice, config: DspConfig) -> Dsp {
    init_tracing();
    let stream = device.spawn();
    let mut dsp = Dsp::new(config);
    dsp.connect(stream, &[]).await.expect("connect succeeds");
    dsp
}

pub async fn connect_default(device: &MockDevice) -> Dsp {
    connect(device, DspConfig::default()).await
}

/// Let in-flight routing and task wakeups drain.
pub async fn settle() {
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
}
