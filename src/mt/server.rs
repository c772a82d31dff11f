/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2023-2025 ByteDance and/or its affiliates.
 */

//! A DirectIP server for mobile terminated messages. It mirrors the
//! mobile originated server and mostly serves as the peer for client
//! tests and local setups.

use std::net::SocketAddr;
use std::sync::Arc;

use slog::{debug, error, o, Logger};
use tokio::net::{TcpListener, TcpStream};

use crate::protocol::{MtConfirmation, MtMessage};

/// Produces the confirmation for every decoded mobile terminated
/// message.
pub trait MtHandler: Send + Sync {
    fn handle(&self, message: &MtMessage) -> MtConfirmation;
}

impl<F> MtHandler for F
where
    F: Fn(&MtMessage) -> MtConfirmation + Send + Sync,
{
    fn handle(&self, message: &MtMessage) -> MtConfirmation {
        (self)(message)
    }
}

pub struct MtServer {
    listener: TcpListener,
    local_addr: SocketAddr,
}

impl MtServer {
    pub async fn bind(addr: &str) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        Ok(MtServer {
            listener,
            local_addr,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accept connections until the accept call fails (which happens
    /// when the owning task is aborted or the socket is torn down).
    pub async fn serve<H>(self, handler: Arc<H>, log: Logger)
    where
        H: MtHandler + 'static,
    {
        loop {
            let (stream, peer_addr) = match self.listener.accept().await {
                Ok(a) => a,
                Err(e) => {
                    error!(log, "accept failed"; "error" => %e);
                    return;
                }
            };
            let handler = Arc::clone(&handler);
            let conn_log = log.new(o!("peer" => peer_addr.to_string()));
            tokio::spawn(run_connection(stream, handler, conn_log));
        }
    }
}

async fn run_connection<H: MtHandler>(mut stream: TcpStream, handler: Arc<H>, log: Logger) {
    let message = match MtMessage::read(&mut stream).await {
        Ok(m) => m,
        Err(e) => {
            error!(log, "cannot decode message"; "error" => %e);
            return;
        }
    };
    debug!(log, "received message";
        "imei" => message.header.imei(),
        "flags" => message.header.disposition_flags,
    );

    let confirmation = handler.handle(&message);
    if let Err(e) = confirmation.write(&mut stream).await {
        error!(log, "cannot write confirmation"; "error" => %e);
    }
    let _ = tokio::io::AsyncWriteExt::shutdown(&mut stream).await;
}
