/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2023-2025 ByteDance and/or its affiliates.
 */

//! Client side of mobile terminated messaging: build a DirectIP
//! request and send it to an upstream DirectIP server.

use std::io;

use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

use crate::protocol::mobile_terminated::{
    ASSIGN_MTMSN, FLUSH_MT_QUEUE, HIGH_PRIORITY_MESSAGE, SEND_RING_ALERT_NO_MTM,
    UPDATE_SSD_LOCATION,
};
use crate::protocol::{MtConfirmation, MtHeader, MtMessage, ProtocolError};

mod server;
pub use server::{MtHandler, MtServer};

#[derive(Debug, Error)]
pub enum RequestError {
    #[error("server address {0:?} must have the form host:port")]
    InvalidAddress(String),
    #[error("transport failure talking to {addr}: {source}")]
    Transport { addr: String, source: io::Error },
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// A mobile terminated request under construction. All options chain:
///
/// ```no_run
/// # async fn doc() -> Result<(), directipd::mt::RequestError> {
/// let confirmation = directipd::mt::MtRequest::new()
///     .imei("300234063904190")
///     .client_msg_id("Msg1")
///     .payload(b"wake up".to_vec())
///     .flush_mt_queue()
///     .send("127.0.0.1:10800")
///     .await?;
/// # Ok(()) }
/// ```
#[derive(Debug, Default, Clone)]
pub struct MtRequest {
    imei: String,
    client_msg_id: String,
    disposition_flags: u16,
    payload: Option<Vec<u8>>,
    priority: Option<u16>,
}

impl MtRequest {
    pub fn new() -> Self {
        MtRequest::default()
    }

    /// The target terminal. Only the first 15 bytes are used, shorter
    /// values are NUL padded on the wire.
    pub fn imei(mut self, imei: &str) -> Self {
        self.imei = imei.to_string();
        self
    }

    /// Client chosen message id. Only the first 4 bytes are used.
    pub fn client_msg_id(mut self, id: &str) -> Self {
        self.client_msg_id = id.to_string();
        self
    }

    pub fn payload(mut self, payload: Vec<u8>) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn priority_level(mut self, level: u16) -> Self {
        self.priority = Some(level);
        self
    }

    pub fn flush_mt_queue(mut self) -> Self {
        self.disposition_flags |= FLUSH_MT_QUEUE;
        self
    }

    pub fn send_ring_alert_no_mtm(mut self) -> Self {
        self.disposition_flags |= SEND_RING_ALERT_NO_MTM;
        self
    }

    pub fn update_ssd_location(mut self) -> Self {
        self.disposition_flags |= UPDATE_SSD_LOCATION;
        self
    }

    pub fn high_priority_message(mut self) -> Self {
        self.disposition_flags |= HIGH_PRIORITY_MESSAGE;
        self
    }

    pub fn assign_mtmsn(mut self) -> Self {
        self.disposition_flags |= ASSIGN_MTMSN;
        self
    }

    /// The wire message this request serializes to.
    pub fn message(&self) -> MtMessage {
        let mut unique_client_msg_id = [0u8; 4];
        let id = self.client_msg_id.as_bytes();
        let n = id.len().min(4);
        unique_client_msg_id[..n].copy_from_slice(&id[..n]);

        let mut imei = [0u8; 15];
        let b = self.imei.as_bytes();
        let n = b.len().min(15);
        imei[..n].copy_from_slice(&b[..n]);

        MtMessage {
            header: MtHeader {
                unique_client_msg_id,
                imei,
                disposition_flags: self.disposition_flags,
            },
            payload: self.payload.clone(),
            priority: self.priority,
        }
    }

    /// Dial the DirectIP server, write the request and wait for its
    /// confirmation. There is no client side deadline; callers wanting
    /// an upper bound wrap this in a timeout.
    pub async fn send(&self, server_address: &str) -> Result<MtConfirmation, RequestError> {
        check_host_port(server_address)?;
        let frame = self.message().encode()?;

        let transport = |source| RequestError::Transport {
            addr: server_address.to_string(),
            source,
        };
        let mut stream = TcpStream::connect(server_address).await.map_err(transport)?;
        stream.write_all(&frame).await.map_err(transport)?;

        let confirmation = MtConfirmation::read(&mut stream).await?;
        let _ = stream.shutdown().await;
        Ok(confirmation)
    }
}

fn check_host_port(addr: &str) -> Result<(), RequestError> {
    let invalid = || RequestError::InvalidAddress(addr.to_string());
    let (host, port) = addr.rsplit_once(':').ok_or_else(invalid)?;
    if host.is_empty() || port.parse::<u16>().is_err() {
        return Err(invalid());
    }
    Ok(())
}
