/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2023-2025 ByteDance and/or its affiliates.
 */

//! The mobile originated server. DirectIP connections are one shot: a
//! terminal connects, sends one message, receives one confirmation and
//! the connection closes.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use slog::{debug, error, info, o, Logger};
use tokio::net::{TcpListener, TcpStream};

use crate::protocol::mobile_originated::read_bucket;
use crate::protocol::MoConfirmation;

mod handler;
pub use handler::{Handler, HandlerFn, LogHandler};

mod proxy_protocol;
use proxy_protocol::ProxyProtocolReader;

const CONNECTION_DEADLINE: Duration = Duration::from_secs(30);
const PROXY_HEADER_TIMEOUT: Duration = Duration::from_secs(10);

/// Accept DirectIP connections until an accept failure. Every decoded
/// message goes to `handler`; a non-error return acknowledges the
/// message towards the terminal. Accept failures are fatal and
/// propagate to the caller for a process level restart.
pub async fn serve<H>(
    listener: TcpListener,
    handler: Arc<H>,
    proxy_protocol: bool,
    log: Logger,
) -> anyhow::Result<()>
where
    H: Handler + 'static,
{
    loop {
        let (stream, peer_addr) = listener
            .accept()
            .await
            .context("failed to accept on the listening socket")?;
        let handler = Arc::clone(&handler);
        let conn_log = log.new(o!("peer" => peer_addr.to_string()));
        tokio::spawn(run_connection(stream, handler, proxy_protocol, conn_log));
    }
}

async fn run_connection<H: Handler>(
    mut stream: TcpStream,
    handler: Arc<H>,
    proxy_protocol: bool,
    log: Logger,
) {
    debug!(log, "new connection");

    if proxy_protocol {
        let reader = ProxyProtocolReader::new(PROXY_HEADER_TIMEOUT);
        match reader.read_for_tcp(&mut stream).await {
            Ok(Some(addr)) => debug!(log, "proxied connection"; "src" => addr.src_addr.to_string()),
            Ok(None) => {}
            Err(e) => {
                error!(log, "invalid proxy protocol preamble"; "error" => %e);
                return;
            }
        }
    }

    if tokio::time::timeout(CONNECTION_DEADLINE, exchange(&mut stream, handler, &log))
        .await
        .is_err()
    {
        error!(log, "connection deadline exceeded");
    }
}

/// One read-handle-confirm round. A confirmation is always written,
/// rejecting when decoding or handling failed.
async fn exchange<H: Handler>(stream: &mut TcpStream, handler: Arc<H>, log: &Logger) {
    let confirmation = match read_bucket(stream).await {
        Ok(bucket) => {
            info!(log, "received message";
                "imei" => bucket.header.imei(),
                "momsn" => bucket.header.momsn,
                "status" => %bucket.header.session_status,
            );
            match handler.handle(&bucket).await {
                Ok(()) => MoConfirmation::accepted(),
                Err(e) => {
                    error!(log, "error handling message"; "error" => format!("{e:#}"));
                    MoConfirmation::rejected()
                }
            }
        }
        Err(e) => {
            error!(log, "cannot get elements from connection"; "error" => %e);
            MoConfirmation::rejected()
        }
    };

    debug!(log, "write confirmation"; "status" => confirmation.status);
    if let Err(e) = confirmation.write(stream).await {
        error!(log, "cannot write confirmation"; "error" => %e);
    }
    let _ = tokio::io::AsyncWriteExt::shutdown(stream).await;
}
