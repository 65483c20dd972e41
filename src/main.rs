// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Run the nine-gate 9P gateway over an in-process storage backend.
// Author: Lukas Bower

//! `ninegate` binary.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use env_logger::Env;
use log::{info, LevelFilter};
use nine_gate::{GateConfig, GateListener, GateServer, MemoryStore, Net};

#[derive(Parser, Debug)]
#[command(author = "Lukas Bower", version, about = "Serve a storage tree over 9P2000", long_about = None)]
struct Cli {
    /// Configuration file (TOML).
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Listener network: tcp or unix.
    #[arg(long)]
    net: Option<Net>,

    /// Log verbosity: 0 info, 1 debug, 2 trace.
    #[arg(long, default_value_t = 0, value_parser = clap::value_parser!(u8).range(0..=2))]
    debug: u8,

    /// Listen address (host:port, or a socket path with --net unix).
    addr: Option<String>,
}

fn init_logging(debug: u8) {
    let default_level = match debug {
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    let mut builder =
        env_logger::Builder::from_env(Env::default().default_filter_or(default_level.as_str()));
    builder.format_timestamp_millis();
    let _ = builder.try_init();
}

fn load_config(cli: &Cli) -> Result<GateConfig> {
    let mut config = match &cli.config {
        Some(path) => GateConfig::load(path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => GateConfig::default(),
    };
    config.apply_env();
    if let Some(net) = cli.net {
        config.server.net = net;
    }
    if let Some(addr) = &cli.addr {
        config.server.listen = addr.clone();
    }
    config.validate().context("validating configuration")?;
    Ok(config)
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.debug);
    let config = load_config(&cli)?;
    let store = MemoryStore::with_block_size(&config.storage.user, config.storage.block_size);
    let server = Arc::new(GateServer::from_config(Arc::new(store), &config));
    let listener = GateListener::from_config(server, &config.server).with_context(|| {
        format!(
            "binding {} listener on {}",
            config.server.net, config.server.listen
        )
    })?;
    info!(
        "ninegate serving {} with {} workers (msize {})",
        config.storage.user, config.server.workers, config.server.msize
    );
    listener.serve().context("serving 9P")?;
    Ok(())
}
