// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Verify configuration loading from files and the environment.
// Author: Lukas Bower

use std::fs;

use nine_gate::config::{ConfigError, LISTEN_ENV};
use nine_gate::{GateConfig, Net};
use serial_test::serial;
use tempfile::tempdir;

#[test]
fn load_reads_both_sections() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("ninegate.toml");
    fs::write(
        &path,
        "[server]\nnet = \"unix\"\nlisten = \"/tmp/ninegate.sock\"\nmsize = 4096\nowner = \"gate\"\n\n[storage]\nuser = \"bob@example.com\"\nblock_size = 1024\n",
    )
    .unwrap();
    let config = GateConfig::load(&path).unwrap();
    assert_eq!(config.server.net, Net::Unix);
    assert_eq!(config.server.listen, "/tmp/ninegate.sock");
    assert_eq!(config.server.msize, 4096);
    assert_eq!(config.server.workers, 8);
    assert_eq!(config.server.owner, "gate");
    assert_eq!(config.storage.user, "bob@example.com");
    assert_eq!(config.storage.block_size, 1024);
}

#[test]
fn missing_file_reports_its_path() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("absent.toml");
    let err = GateConfig::load(&path).unwrap_err();
    assert!(matches!(err, ConfigError::Io { .. }));
    assert!(err.to_string().contains("absent.toml"));
}

#[test]
fn zero_block_size_is_rejected() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("bad.toml");
    fs::write(&path, "[storage]\nblock_size = 0\n").unwrap();
    assert!(matches!(
        GateConfig::load(&path),
        Err(ConfigError::Invalid(_))
    ));
}

#[test]
#[serial]
fn listen_env_overrides_file() {
    let mut config = GateConfig::from_toml_str("[server]\nlisten = \"0.0.0.0:564\"\n").unwrap();
    std::env::set_var(LISTEN_ENV, "127.0.0.1:7777");
    config.apply_env();
    std::env::remove_var(LISTEN_ENV);
    assert_eq!(config.server.listen, "127.0.0.1:7777");
}

#[test]
#[serial]
fn empty_listen_env_is_ignored() {
    let mut config = GateConfig::default();
    std::env::set_var(LISTEN_ENV, "");
    config.apply_env();
    std::env::remove_var(LISTEN_ENV);
    assert_eq!(config.server.listen, "127.0.0.1:5640");
}
