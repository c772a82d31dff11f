/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2023-2025 ByteDance and/or its affiliates.
 */

//! DirectIP wire framing shared by the mobile originated and mobile
//! terminated codecs.

use std::io;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};

pub mod mobile_originated;
pub mod mobile_terminated;

pub use mobile_originated::{
    InformationBucket, MoConfirmation, MoHeader, MoLocation, Orientation, Position, SessionStatus,
};
pub use mobile_terminated::{MtConfirmation, MtHeader, MtMessage};

pub const PROTOCOL_REVISION: u8 = 1;

pub const MESSAGE_HEADER_LENGTH: usize = 3;
pub const ELEMENT_HEADER_LENGTH: usize = 3;

pub(crate) const MO_HEADER_ID: u8 = 0x01;
pub(crate) const MO_PAYLOAD_ID: u8 = 0x02;
pub(crate) const MO_LOCATION_ID: u8 = 0x03;
pub(crate) const MO_CONFIRMATION_ID: u8 = 0x05;

pub(crate) const MT_HEADER_ID: u8 = 0x41;
pub(crate) const MT_PAYLOAD_ID: u8 = 0x42;
pub(crate) const MT_CONFIRMATION_ID: u8 = 0x44;
pub(crate) const MT_PRIORITY_ID: u8 = 0x46;

/// Upper bound for a mobile terminated payload, from the Iridium
/// DirectIP specification.
pub const MAX_MT_PAYLOAD: usize = 1890;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("read failed: {0}")]
    ReadFailed(io::Error),
    #[error("message truncated before the declared length")]
    Truncated,
    #[error("unexpected protocol revision {0}")]
    UnexpectedRevision(u8),
    #[error("corrupted element stream")]
    CorruptedMessage,
    #[error("invalid length for element {0:#04x}")]
    InvalidElementLength(u8),
    #[error("message carries no MO header element")]
    MissingMoHeader,
    #[error("message carries no MT header element")]
    MissingMtHeader,
    #[error("message carries no confirmation element")]
    MissingConfirmation,
    #[error("payload length {0} exceeds the 1890 byte limit")]
    OversizedPayload(usize),
}

impl ProtocolError {
    fn from_read(e: io::Error) -> Self {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            ProtocolError::Truncated
        } else {
            ProtocolError::ReadFailed(e)
        }
    }
}

/// The 3 byte header in front of every DirectIP message. The length
/// field counts every byte that follows the header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageHeader {
    pub protocol_revision: u8,
    pub message_length: u16,
}

impl MessageHeader {
    pub fn parse(b: [u8; MESSAGE_HEADER_LENGTH]) -> Self {
        MessageHeader {
            protocol_revision: b[0],
            message_length: u16::from_be_bytes([b[1], b[2]]),
        }
    }

    pub async fn read<R>(reader: &mut R) -> Result<Self, ProtocolError>
    where
        R: AsyncRead + Unpin,
    {
        let mut b = [0u8; MESSAGE_HEADER_LENGTH];
        reader
            .read_exact(&mut b)
            .await
            .map_err(ProtocolError::from_read)?;
        Ok(MessageHeader::parse(b))
    }

    pub(crate) fn encode(message_length: u16) -> [u8; MESSAGE_HEADER_LENGTH] {
        let l = message_length.to_be_bytes();
        [PROTOCOL_REVISION, l[0], l[1]]
    }
}

/// Read one full message body: check the revision, then read exactly
/// `message_length` bytes. A short read is a truncated message.
pub(crate) async fn read_message_body<R>(reader: &mut R) -> Result<Vec<u8>, ProtocolError>
where
    R: AsyncRead + Unpin,
{
    let header = MessageHeader::read(reader).await?;
    if header.protocol_revision != PROTOCOL_REVISION {
        return Err(ProtocolError::UnexpectedRevision(header.protocol_revision));
    }

    let mut buf = vec![0u8; usize::from(header.message_length)];
    reader
        .read_exact(&mut buf)
        .await
        .map_err(ProtocolError::from_read)?;
    Ok(buf)
}

pub(crate) fn push_element_header(buf: &mut Vec<u8>, id: u8, element_length: u16) {
    let l = element_length.to_be_bytes();
    buf.extend_from_slice(&[id, l[0], l[1]]);
}

/// Walk a message body element by element. The callback receives the
/// element id and its body slice; unknown ids are the callback's call.
pub(crate) fn foreach_element<F>(buf: &[u8], mut call: F) -> Result<(), ProtocolError>
where
    F: FnMut(u8, &[u8]) -> Result<(), ProtocolError>,
{
    let mut offset = 0usize;
    while offset < buf.len() {
        if offset + ELEMENT_HEADER_LENGTH > buf.len() {
            return Err(ProtocolError::CorruptedMessage);
        }
        let id = buf[offset];
        let element_length = usize::from(u16::from_be_bytes([buf[offset + 1], buf[offset + 2]]));
        offset += ELEMENT_HEADER_LENGTH;
        if offset + element_length > buf.len() {
            return Err(ProtocolError::InvalidElementLength(id));
        }
        call(id, &buf[offset..offset + element_length])?;
        offset += element_length;
    }
    Ok(())
}

pub(crate) fn trimmed_imei(imei: &[u8; 15]) -> String {
    String::from_utf8_lossy(imei)
        .trim_end_matches('\0')
        .to_string()
}
