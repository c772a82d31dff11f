/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2023-2025 ByteDance and/or its affiliates.
 */

//! Codec for mobile terminated DirectIP messages: the request frame a
//! client sends towards a DirectIP server and the confirmation frame
//! coming back.

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

use super::{
    foreach_element, push_element_header, read_message_body, MessageHeader, ProtocolError,
    MAX_MT_PAYLOAD, MT_CONFIRMATION_ID, MT_HEADER_ID, MT_PAYLOAD_ID, MT_PRIORITY_ID,
};

const MT_HEADER_BODY_LENGTH: usize = 21;
const MT_PRIORITY_BODY_LENGTH: usize = 2;
const MT_CONFIRMATION_BODY_LENGTH: usize = 25;

/// Disposition flag bits of the MT DirectIP header.
pub const FLUSH_MT_QUEUE: u16 = 1;
pub const SEND_RING_ALERT_NO_MTM: u16 = 2;
pub const UPDATE_SSD_LOCATION: u16 = 8;
pub const HIGH_PRIORITY_MESSAGE: u16 = 16;
pub const ASSIGN_MTMSN: u16 = 32;

/// The mobile terminated DirectIP header element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MtHeader {
    pub unique_client_msg_id: [u8; 4],
    pub imei: [u8; 15],
    pub disposition_flags: u16,
}

impl MtHeader {
    /// The IMEI as an ASCII string, trailing NUL padding trimmed.
    pub fn imei(&self) -> String {
        super::trimmed_imei(&self.imei)
    }

    fn parse(b: &[u8]) -> Self {
        let mut unique_client_msg_id = [0u8; 4];
        unique_client_msg_id.copy_from_slice(&b[0..4]);
        let mut imei = [0u8; 15];
        imei.copy_from_slice(&b[4..19]);
        MtHeader {
            unique_client_msg_id,
            imei,
            disposition_flags: u16::from_be_bytes([b[19], b[20]]),
        }
    }

    fn put(&self, buf: &mut Vec<u8>) {
        push_element_header(buf, MT_HEADER_ID, MT_HEADER_BODY_LENGTH as u16);
        buf.extend_from_slice(&self.unique_client_msg_id);
        buf.extend_from_slice(&self.imei);
        buf.extend_from_slice(&self.disposition_flags.to_be_bytes());
    }
}

/// One decoded mobile terminated message: the mandatory header element
/// plus the optional priority and payload elements.
#[derive(Debug, Clone)]
pub struct MtMessage {
    pub header: MtHeader,
    pub payload: Option<Vec<u8>>,
    pub priority: Option<u16>,
}

impl MtMessage {
    /// Serialize the full frame. The message header length is computed
    /// from the serialized element stream, and an oversized payload is
    /// rejected before any byte is produced.
    pub fn encode(&self) -> Result<Vec<u8>, ProtocolError> {
        if let Some(payload) = &self.payload {
            if payload.len() > MAX_MT_PAYLOAD {
                return Err(ProtocolError::OversizedPayload(payload.len()));
            }
        }

        let mut body = Vec::with_capacity(64);
        self.header.put(&mut body);
        if let Some(level) = self.priority {
            push_element_header(&mut body, MT_PRIORITY_ID, MT_PRIORITY_BODY_LENGTH as u16);
            body.extend_from_slice(&level.to_be_bytes());
        }
        if let Some(payload) = &self.payload {
            push_element_header(&mut body, MT_PAYLOAD_ID, payload.len() as u16);
            body.extend_from_slice(payload);
        }

        let mut frame = Vec::with_capacity(super::MESSAGE_HEADER_LENGTH + body.len());
        frame.extend_from_slice(&MessageHeader::encode(body.len() as u16));
        frame.extend_from_slice(&body);
        Ok(frame)
    }

    /// Read and decode one mobile terminated message.
    pub async fn read<R>(reader: &mut R) -> Result<Self, ProtocolError>
    where
        R: AsyncRead + Unpin,
    {
        let body = read_message_body(reader).await?;

        let mut header: Option<MtHeader> = None;
        let mut payload: Option<Vec<u8>> = None;
        let mut priority: Option<u16> = None;
        foreach_element(&body, |id, data| {
            match id {
                MT_HEADER_ID => {
                    if data.len() != MT_HEADER_BODY_LENGTH {
                        return Err(ProtocolError::InvalidElementLength(id));
                    }
                    header = Some(MtHeader::parse(data));
                }
                MT_PAYLOAD_ID => payload = Some(data.to_vec()),
                MT_PRIORITY_ID => {
                    if data.len() != MT_PRIORITY_BODY_LENGTH {
                        return Err(ProtocolError::InvalidElementLength(id));
                    }
                    priority = Some(u16::from_be_bytes([data[0], data[1]]));
                }
                _ => {}
            }
            Ok(())
        })?;

        let Some(header) = header else {
            return Err(ProtocolError::MissingMtHeader);
        };
        Ok(MtMessage {
            header,
            payload,
            priority,
        })
    }
}

/// The confirmation a DirectIP server answers an MT message with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MtConfirmation {
    pub unique_client_msg_id: [u8; 4],
    pub imei: [u8; 15],
    pub auto_id_reference: u32,
    pub message_status: i16,
}

impl MtConfirmation {
    /// The IMEI as an ASCII string, trailing NUL padding trimmed.
    pub fn imei(&self) -> String {
        super::trimmed_imei(&self.imei)
    }

    pub fn encode(&self) -> Vec<u8> {
        let body_len = super::ELEMENT_HEADER_LENGTH + MT_CONFIRMATION_BODY_LENGTH;
        let mut frame = Vec::with_capacity(super::MESSAGE_HEADER_LENGTH + body_len);
        frame.extend_from_slice(&MessageHeader::encode(body_len as u16));
        push_element_header(&mut frame, MT_CONFIRMATION_ID, MT_CONFIRMATION_BODY_LENGTH as u16);
        frame.extend_from_slice(&self.unique_client_msg_id);
        frame.extend_from_slice(&self.imei);
        frame.extend_from_slice(&self.auto_id_reference.to_be_bytes());
        frame.extend_from_slice(&self.message_status.to_be_bytes());
        frame
    }

    pub async fn write<W>(&self, writer: &mut W) -> std::io::Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        writer.write_all(&self.encode()).await?;
        writer.flush().await
    }

    /// Read one confirmation message and extract the confirmation
    /// element from its body.
    pub async fn read<R>(reader: &mut R) -> Result<Self, ProtocolError>
    where
        R: AsyncRead + Unpin,
    {
        let body = read_message_body(reader).await?;

        let mut confirmation: Option<MtConfirmation> = None;
        foreach_element(&body, |id, data| {
            if id == MT_CONFIRMATION_ID {
                if data.len() != MT_CONFIRMATION_BODY_LENGTH {
                    return Err(ProtocolError::InvalidElementLength(id));
                }
                confirmation = Some(MtConfirmation::parse(data));
            }
            Ok(())
        })?;

        confirmation.ok_or(ProtocolError::MissingConfirmation)
    }

    fn parse(b: &[u8]) -> Self {
        let mut unique_client_msg_id = [0u8; 4];
        unique_client_msg_id.copy_from_slice(&b[0..4]);
        let mut imei = [0u8; 15];
        imei.copy_from_slice(&b[4..19]);
        MtConfirmation {
            unique_client_msg_id,
            imei,
            auto_id_reference: u32::from_be_bytes([b[19], b[20], b[21], b[22]]),
            message_status: i16::from_be_bytes([b[23], b[24]]),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(imei: &[u8]) -> MtHeader {
        let mut h = MtHeader {
            unique_client_msg_id: *b"id01",
            imei: [0u8; 15],
            disposition_flags: 0,
        };
        h.imei[..imei.len()].copy_from_slice(imei);
        h
    }

    #[test]
    fn encode_header_only() {
        let msg = MtMessage {
            header: header(b"123"),
            payload: None,
            priority: None,
        };
        let frame = msg.encode().unwrap();
        assert_eq!(frame.len(), 27);
        // revision 1, message length 24, header element 0x41 of 21 bytes
        assert_eq!(&frame[..6], &[0x01, 0x00, 0x18, 0x41, 0x00, 0x15]);
    }

    #[test]
    fn encode_with_payload() {
        let msg = MtMessage {
            header: header(b"123"),
            payload: Some(b"my dummy payload".to_vec()),
            priority: None,
        };
        let frame = msg.encode().unwrap();
        // 24 header element + 3 + 16 payload element
        assert_eq!(u16::from_be_bytes([frame[1], frame[2]]), 43);
        assert_eq!(frame[27], 0x42);
        assert_eq!(&frame[30..], b"my dummy payload");
    }

    #[test]
    fn encode_with_payload_and_priority() {
        let msg = MtMessage {
            header: header(b"123"),
            payload: Some(b"my dummy payload".to_vec()),
            priority: Some(3),
        };
        let frame = msg.encode().unwrap();
        // 24 header element + 5 priority element + 19 payload element
        assert_eq!(u16::from_be_bytes([frame[1], frame[2]]), 48);
        assert_eq!(frame[27], 0x46);
        assert_eq!(frame[32], 0x42);
    }

    #[test]
    fn oversized_payload_is_rejected() {
        let msg = MtMessage {
            header: header(b"123"),
            payload: Some(vec![0u8; MAX_MT_PAYLOAD + 1]),
            priority: None,
        };
        let err = msg.encode().unwrap_err();
        assert!(matches!(err, ProtocolError::OversizedPayload(1891)));
    }

    #[tokio::test]
    async fn message_round_trip() {
        let msg = MtMessage {
            header: MtHeader {
                unique_client_msg_id: *b"abcd",
                imei: *b"300234063904190",
                disposition_flags: FLUSH_MT_QUEUE | ASSIGN_MTMSN,
            },
            payload: Some(b"ping".to_vec()),
            priority: Some(2),
        };
        let frame = msg.encode().unwrap();
        let mut data = frame.as_slice();
        let decoded = MtMessage::read(&mut data).await.unwrap();
        assert_eq!(decoded.header, msg.header);
        assert_eq!(decoded.payload, msg.payload);
        assert_eq!(decoded.priority, msg.priority);
    }

    #[tokio::test]
    async fn confirmation_round_trip() {
        let conf = MtConfirmation {
            unique_client_msg_id: *b"abcd",
            imei: *b"123\0\0\0\0\0\0\0\0\0\0\0\0",
            auto_id_reference: 4711,
            message_status: -3,
        };
        let frame = conf.encode();
        assert_eq!(frame.len(), 31);
        assert_eq!(&frame[..6], &[0x01, 0x00, 0x1c, 0x44, 0x00, 0x19]);
        let mut data = frame.as_slice();
        let decoded = MtConfirmation::read(&mut data).await.unwrap();
        assert_eq!(decoded, conf);
        assert_eq!(decoded.imei(), "123");
    }

    #[tokio::test]
    async fn header_element_is_mandatory() {
        // only a payload element in the body
        let mut data: &[u8] = b"\x01\x00\x07\x42\x00\x04abcd";
        let err = MtMessage::read(&mut data).await.unwrap_err();
        assert!(matches!(err, ProtocolError::MissingMtHeader));
    }
}
