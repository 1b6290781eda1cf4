//! Config save/load roundtrip integration tests.
//!
//! These tests verify that the bridge config survives being written to disk
//! and loaded back, and that it resolves together with the gateway's file.

use clawbridge_core::config::{BindMode, BridgeConfig, GatewayFileConfig};
use clawbridge_core::{Identity, SecretString};
use std::fs;
use std::path::Path;
use std::time::Duration;
use tempfile::TempDir;

#[test]
fn test_config_save_and_load() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("clawbridge.json5");

    let config = BridgeConfig::default();
    config.save(&path).unwrap();

    let loaded = BridgeConfig::load(&path).unwrap();
    assert_eq!(loaded.server.port, config.server.port);
    assert_eq!(loaded.server.bind, config.server.bind);
    assert_eq!(loaded.upstream.url, config.upstream.url);
    assert_eq!(loaded.upstream.session_key, config.upstream.session_key);
}

#[test]
fn test_config_modify_and_reload() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("nested").join("clawbridge.json5");

    let mut config = BridgeConfig::default();
    config.server.port = 4100;
    config.server.bind = BindMode::Lan;
    config.upstream.token = Some(SecretString::new("s3cret"));
    config.upstream.reconnect_delay_secs = 10;
    config.save(&path).unwrap();

    let loaded = BridgeConfig::load(&path).unwrap();
    assert_eq!(loaded.server.port, 4100);
    assert_eq!(loaded.server.bind, BindMode::Lan);
    assert_eq!(loaded.upstream.token, Some(SecretString::new("s3cret")));
    assert_eq!(loaded.upstream.reconnect_delay_secs, 10);
}

#[test]
fn test_hand_written_json5() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("clawbridge.json5");
    fs::write(
        &path,
        r#"{
            // Bridge on the LAN, talking to a remote gateway
            server: { bind: "lan", port: 8080 },
            upstream: { url: "wss://gateway.internal:18789", request_timeout_secs: 30 },
            identity: { agent_name: "Tron" },
            logging: { level: "debug", json: true },
        }"#,
    )
    .unwrap();

    let config = BridgeConfig::load(&path).unwrap();
    config.validate().unwrap();
    assert_eq!(config.server.port, 8080);
    assert_eq!(config.upstream.request_timeout_secs, 30);
    assert!(config.logging.json);
}

#[test]
fn test_resolve_with_gateway_file_and_identity() {
    let dir = TempDir::new().unwrap();
    let workspace = dir.path().join("workspace");
    fs::create_dir_all(&workspace).unwrap();
    fs::write(workspace.join("IDENTITY.md"), "# Identity\n**Name:** Quorra (ISO)\n").unwrap();
    fs::write(workspace.join("USER.md"), "**Name:** Sam Flynn — the user\n").unwrap();

    let gateway_path = dir.path().join("openclaw.json");
    fs::write(
        &gateway_path,
        format!(
            r#"{{"gateway": {{"auth": {{"token": "gw-token"}}}}, "agents": {{"defaults": {{"workspace": "{}"}}}}}}"#,
            workspace.display()
        ),
    )
    .unwrap();
    let gateway = GatewayFileConfig::load(&gateway_path).unwrap();

    let config = BridgeConfig::default();
    let settings = config.resolve(&gateway).unwrap();
    assert_eq!(settings.token, Some(SecretString::new("gw-token")));
    assert_eq!(settings.workspace, workspace);
    assert_eq!(settings.request_timeout, Duration::from_secs(60));

    let identity = Identity::resolve(&settings.workspace, &config.identity);
    assert_eq!(identity, Identity::new("Quorra", "Sam Flynn"));
}

#[test]
fn test_config_load_nonexistent() {
    let result = BridgeConfig::load(Path::new("/nonexistent/clawbridge.json5"));
    assert!(result.unwrap_err().is_not_found());
}

#[test]
fn test_config_parse_invalid() {
    assert!(BridgeConfig::parse("not valid json").is_err());
}
