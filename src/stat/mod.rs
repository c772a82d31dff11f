/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2023-2025 ByteDance and/or its affiliates.
 */

//! The health endpoint: every HTTP request on the health address gets
//! a static `200 OK` with body `OK`. The request itself is drained and
//! ignored, so any probe path works.

use std::net::SocketAddr;

use anyhow::Context;
use slog::{warn, Logger};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

const HEALTH_RESPONSE: &[u8] =
    b"HTTP/1.1 200 OK\r\nContent-Type: text/plain\r\nContent-Length: 2\r\nConnection: close\r\n\r\nOK";

pub async fn spawn_health_listener(addr: SocketAddr, log: &Logger) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr)
        .await
        .context(format!("cannot open health address {addr}"))?;
    let log = log.new(slog::o!("component" => "health"));
    tokio::spawn(async move {
        loop {
            match listener.accept().await {
                Ok((mut stream, _)) => {
                    tokio::spawn(async move {
                        let mut buf = [0u8; 1024];
                        let _ = stream.read(&mut buf).await;
                        let _ = stream.write_all(HEALTH_RESPONSE).await;
                        let _ = stream.shutdown().await;
                    });
                }
                Err(e) => {
                    warn!(log, "health accept failed"; "error" => %e);
                }
            }
        }
    });
    Ok(())
}
