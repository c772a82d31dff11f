/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2023-2025 ByteDance and/or its affiliates.
 */

//! directipd: an Iridium Short Burst Data DirectIP gateway.
//!
//! The gateway accepts mobile originated DirectIP messages over TCP,
//! decodes their information elements and fans every message out to
//! the HTTP backends whose IMEI pattern matches the sending terminal.
//! The crate also ships the client and server side of mobile
//! terminated messaging.

use std::sync::Arc;

use anyhow::Context;
use slog::{info, o, Logger};
use tokio::net::TcpListener;

pub mod config;
pub mod distribute;
pub mod mt;
pub mod opts;
pub mod protocol;
pub mod serve;
pub mod stat;

use distribute::Distributor;
use opts::ProcArgs;
use serve::LogHandler;

/// Run the gateway with the given process arguments. Returns only on
/// a fatal error, like the accept loop failing.
pub async fn run(proc_args: ProcArgs, log: Logger) -> anyhow::Result<()> {
    info!(log, "start service";
        "version" => opts::PKG_VERSION,
        "listen" => proc_args.listen_addr.to_string(),
    );

    let distributor = Arc::new(Distributor::new(proc_args.workers, &log));
    if let Some(config_file) = &proc_args.config_file {
        let targets = config::load_targets(config_file)?;
        distributor
            .with_targets(targets)
            .context("cannot use config")?;
        info!(log, "change configuration"; "targets" => distributor.targets().len());
    }

    stat::spawn_health_listener(proc_args.health_addr, &log).await?;

    let listener = TcpListener::bind(proc_args.listen_addr)
        .await
        .context(format!(
            "cannot open listening address {}",
            proc_args.listen_addr
        ))?;
    let handler = Arc::new(LogHandler::new(log.new(o!()), distributor));
    serve::serve(listener, handler, proc_args.proxy_protocol, log).await
}
