/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2023-2025 ByteDance and/or its affiliates.
 */

use std::io;

use anyhow::{anyhow, Context};
use slog::{o, Drain, Logger};

use directipd::opts::{self, LogFormat, ProcArgs};

fn main() -> anyhow::Result<()> {
    let Some(proc_args) =
        opts::parse_clap().context("failed to parse command line options")?
    else {
        return Ok(());
    };

    let log = build_logger(&proc_args);

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| anyhow!("failed to start main runtime: {e}"))?;
    rt.block_on(directipd::run(proc_args, log))
}

fn build_logger(proc_args: &ProcArgs) -> Logger {
    let drain: Box<dyn Drain<Ok = (), Err = io::Error> + Send + 'static> =
        match proc_args.log_format {
            LogFormat::Json => Box::new(slog_json::Json::default(io::stdout())),
            LogFormat::Fmt => {
                let decorator = slog_term::PlainSyncDecorator::new(io::stdout());
                Box::new(slog_term::FullFormat::new(decorator).build())
            }
            LogFormat::Term => {
                let decorator = slog_term::TermDecorator::new().stdout().build();
                Box::new(slog_term::FullFormat::new(decorator).build())
            }
        };
    let drain = drain.filter_level(proc_args.log_level).fuse();
    let drain = slog_async::Async::new(drain).build().fuse();
    Logger::root(drain, o!("stage" => proc_args.stage.clone()))
}
