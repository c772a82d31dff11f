/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2023-2025 ByteDance and/or its affiliates.
 */

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;

use anyhow::anyhow;
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command, ValueHint};

pub(crate) const PKG_NAME: &str = env!("CARGO_PKG_NAME");
pub(crate) const PKG_VERSION: &str = env!("CARGO_PKG_VERSION");

const GLOBAL_ARG_VERSION: &str = "version";
const ARG_CONFIG_FILE: &str = "config";
const ARG_HEALTH_ADDR: &str = "health";
const ARG_STAGE: &str = "stage";
const ARG_LOG_LEVEL: &str = "loglevel";
const ARG_LOG_FORMAT: &str = "logformat";
const ARG_WORKERS: &str = "workers";
const ARG_PROXY_PROTOCOL: &str = "proxyprotocol";
const ARG_LISTEN_ADDR: &str = "listen";

const DEFAULT_LISTEN_PORT: u16 = 2022;
const DEFAULT_HEALTH_PORT: u16 = 2023;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Fmt,
    Term,
}

#[derive(Debug)]
pub struct ProcArgs {
    pub listen_addr: SocketAddr,
    pub health_addr: SocketAddr,
    pub config_file: Option<PathBuf>,
    pub stage: String,
    pub log_level: slog::Level,
    pub log_format: LogFormat,
    pub workers: usize,
    pub proxy_protocol: bool,
}

impl Default for ProcArgs {
    fn default() -> Self {
        ProcArgs {
            listen_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), DEFAULT_LISTEN_PORT),
            health_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), DEFAULT_HEALTH_PORT),
            config_file: None,
            stage: "test".to_string(),
            log_level: slog::Level::Info,
            log_format: LogFormat::Json,
            workers: 5,
            proxy_protocol: false,
        }
    }
}

fn build_cli_args() -> Command {
    Command::new(PKG_NAME)
        .disable_version_flag(true)
        .arg(
            Arg::new(GLOBAL_ARG_VERSION)
                .help("Show version")
                .action(ArgAction::SetTrue)
                .short('V')
                .long(GLOBAL_ARG_VERSION),
        )
        .arg(
            Arg::new(ARG_CONFIG_FILE)
                .help("The configuration for the forwarding rules")
                .num_args(1)
                .value_name("CONFIG FILE")
                .value_hint(ValueHint::FilePath)
                .value_parser(value_parser!(PathBuf))
                .long(ARG_CONFIG_FILE),
        )
        .arg(
            Arg::new(ARG_HEALTH_ADDR)
                .help("The healthcheck listen address (http)")
                .num_args(1)
                .value_name("HEALTH ADDR")
                .value_parser(value_parser!(SocketAddr))
                .long(ARG_HEALTH_ADDR),
        )
        .arg(
            Arg::new(ARG_STAGE)
                .help("The name of the stage where this service is running")
                .num_args(1)
                .value_name("STAGE")
                .long(ARG_STAGE),
        )
        .arg(
            Arg::new(ARG_LOG_LEVEL)
                .help("The log level")
                .num_args(1)
                .value_name("LEVEL")
                .value_parser(["debug", "info", "warn", "error"])
                .long(ARG_LOG_LEVEL),
        )
        .arg(
            Arg::new(ARG_LOG_FORMAT)
                .help("The log format")
                .num_args(1)
                .value_name("FORMAT")
                .value_parser(["json", "fmt", "term"])
                .long(ARG_LOG_FORMAT),
        )
        .arg(
            Arg::new(ARG_WORKERS)
                .help("The number of distributor workers")
                .num_args(1)
                .value_name("COUNT")
                .value_parser(value_parser!(usize))
                .long(ARG_WORKERS),
        )
        .arg(
            Arg::new(ARG_PROXY_PROTOCOL)
                .help("Expect the proxy protocol on the listening socket")
                .action(ArgAction::SetTrue)
                .long(ARG_PROXY_PROTOCOL),
        )
        .arg(
            Arg::new(ARG_LISTEN_ADDR)
                .help("The DirectIP listen address")
                .required(false)
                .num_args(1)
                .value_name("LISTEN ADDR")
                .value_parser(value_parser!(SocketAddr)),
        )
}

pub fn parse_clap() -> anyhow::Result<Option<ProcArgs>> {
    let args = build_cli_args().get_matches();
    args_to_proc_args(&args)
}

fn args_to_proc_args(args: &ArgMatches) -> anyhow::Result<Option<ProcArgs>> {
    if args.get_flag(GLOBAL_ARG_VERSION) {
        println!("{PKG_NAME} {PKG_VERSION}");
        return Ok(None);
    }

    let mut proc_args = ProcArgs::default();
    if let Some(config_file) = args.get_one::<PathBuf>(ARG_CONFIG_FILE) {
        proc_args.config_file = Some(config_file.clone());
    }
    if let Some(addr) = args.get_one::<SocketAddr>(ARG_HEALTH_ADDR) {
        proc_args.health_addr = *addr;
    }
    if let Some(stage) = args.get_one::<String>(ARG_STAGE) {
        proc_args.stage = stage.clone();
    }
    if let Some(level) = args.get_one::<String>(ARG_LOG_LEVEL) {
        proc_args.log_level = match level.as_str() {
            "debug" => slog::Level::Debug,
            "info" => slog::Level::Info,
            "warn" => slog::Level::Warning,
            "error" => slog::Level::Error,
            s => return Err(anyhow!("unsupported log level {s}")),
        };
    }
    if let Some(format) = args.get_one::<String>(ARG_LOG_FORMAT) {
        proc_args.log_format = match format.as_str() {
            "json" => LogFormat::Json,
            "fmt" => LogFormat::Fmt,
            "term" => LogFormat::Term,
            s => return Err(anyhow!("unsupported log format {s}")),
        };
    }
    if let Some(workers) = args.get_one::<usize>(ARG_WORKERS) {
        proc_args.workers = *workers;
    }
    proc_args.proxy_protocol = args.get_flag(ARG_PROXY_PROTOCOL);
    if let Some(addr) = args.get_one::<SocketAddr>(ARG_LISTEN_ADDR) {
        proc_args.listen_addr = *addr;
    }

    Ok(Some(proc_args))
}
