/*
 * SPDX-License-Identifier: Apache-2.0
 * Copyright 2023-2025 ByteDance and/or its affiliates.
 */

//! Decoder for mobile originated DirectIP messages and the encoder for
//! the confirmation the gateway answers with.

use std::fmt;

use serde::{Serialize, Serializer};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

use super::{
    foreach_element, read_message_body, MessageHeader, ProtocolError, ELEMENT_HEADER_LENGTH,
    MO_CONFIRMATION_ID, MO_HEADER_ID, MO_LOCATION_ID, MO_PAYLOAD_ID,
};

const MO_HEADER_BODY_LENGTH: usize = 28;
const MO_LOCATION_BODY_LENGTH: usize = 11;

/// SBD session status as reported by the Iridium gateway. Values
/// outside the documented set are carried through unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct SessionStatus(pub u8);

impl SessionStatus {
    pub const COMPLETED: SessionStatus = SessionStatus(0);
    pub const MT_TOO_LARGE: SessionStatus = SessionStatus(1);
    pub const LOCATION_UNACCEPTABLE: SessionStatus = SessionStatus(2);
    pub const TIMEOUT: SessionStatus = SessionStatus(10);
    pub const IMEI_TOO_LARGE: SessionStatus = SessionStatus(12);
    pub const RF_LINK_LOSS: SessionStatus = SessionStatus(13);
    pub const IMEI_PROTOCOL_ANOMALY: SessionStatus = SessionStatus(14);
    pub const IMEI_PROHIBITED_GATEWAY: SessionStatus = SessionStatus(15);

    fn name(&self) -> Option<&'static str> {
        match self.0 {
            0 => Some("completed"),
            1 => Some("mt-too-large"),
            2 => Some("location-unacceptable"),
            10 => Some("timeout"),
            12 => Some("imei-too-large"),
            13 => Some("rf-link-loss"),
            14 => Some("imei-protocol-anomaly"),
            15 => Some("imei-prohibited-gateway"),
            _ => None,
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{name}({})", self.0),
            None => write!(f, "unknown({})", self.0),
        }
    }
}

/// Hemisphere quadrant of a reported location. The wire carries the
/// quadrant as a single code byte; codes above 3 fall back to NE, as
/// the gateway never reported them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Orientation {
    NorthEast,
    NorthWest,
    SouthEast,
    SouthWest,
}

impl Orientation {
    pub fn from_code(code: u8) -> Self {
        match code {
            1 => Orientation::NorthWest,
            2 => Orientation::SouthEast,
            3 => Orientation::SouthWest,
            _ => Orientation::NorthEast,
        }
    }

    /// Apply the quadrant sign to absolute latitude/longitude values.
    pub fn lat_lng(&self, lat: f64, lng: f64) -> (f64, f64) {
        match self {
            Orientation::NorthEast => (lat, lng),
            Orientation::NorthWest => (lat, -lng),
            Orientation::SouthEast => (-lat, lng),
            Orientation::SouthWest => (-lat, -lng),
        }
    }
}

/// The mobile originated DirectIP header element.
#[derive(Debug, Clone, Serialize)]
pub struct MoHeader {
    #[serde(rename = "cdrreference")]
    pub cdr_reference: u32,
    #[serde(rename = "imei", serialize_with = "serialize_imei")]
    pub imei: [u8; 15],
    #[serde(rename = "sessionstatus")]
    pub session_status: SessionStatus,
    #[serde(rename = "momsn")]
    pub momsn: u16,
    #[serde(rename = "mtmsn")]
    pub mtmsn: u16,
    #[serde(rename = "timeofsession")]
    pub time_of_session: u32,
}

fn serialize_imei<S: Serializer>(imei: &[u8; 15], s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&super::trimmed_imei(imei))
}

impl MoHeader {
    /// The IMEI as an ASCII string, trailing NUL padding trimmed.
    pub fn imei(&self) -> String {
        super::trimmed_imei(&self.imei)
    }

    fn parse(b: &[u8]) -> Self {
        let mut imei = [0u8; 15];
        imei.copy_from_slice(&b[4..19]);
        MoHeader {
            cdr_reference: u32::from_be_bytes([b[0], b[1], b[2], b[3]]),
            imei,
            session_status: SessionStatus(b[19]),
            momsn: u16::from_be_bytes([b[20], b[21]]),
            mtmsn: u16::from_be_bytes([b[22], b[23]]),
            time_of_session: u32::from_be_bytes([b[24], b[25], b[26], b[27]]),
        }
    }
}

/// Raw location element body: quadrant code, degrees and thousandths
/// of minutes, plus the CEP radius in kilometers.
#[derive(Debug, Clone, Serialize)]
pub struct MoLocation {
    #[serde(rename = "position")]
    pub data: LocationData,
    #[serde(rename = "cepradius")]
    pub cep_radius: u32,
}

#[derive(Debug, Clone, Serialize)]
pub struct LocationData {
    #[serde(rename = "orientationcode")]
    pub orientation_code: u8,
    #[serde(rename = "latdegree")]
    pub lat_degree: u8,
    #[serde(rename = "latminute")]
    pub lat_minute: u16,
    #[serde(rename = "lngdegree")]
    pub lng_degree: u8,
    #[serde(rename = "lngminute")]
    pub lng_minute: u16,
}

impl MoLocation {
    fn parse(b: &[u8]) -> Self {
        MoLocation {
            data: LocationData {
                orientation_code: b[0],
                lat_degree: b[1],
                lat_minute: u16::from_be_bytes([b[2], b[3]]),
                lng_degree: b[4],
                lng_minute: u16::from_be_bytes([b[5], b[6]]),
            },
            cep_radius: u32::from_be_bytes([b[7], b[8], b[9], b[10]]),
        }
    }

    /// Decimal degrees with the quadrant sign applied. Minutes are in
    /// thousandths, so one degree is 60000 units.
    pub fn position(&self) -> Position {
        let lat = f64::from(self.data.lat_degree) + f64::from(self.data.lat_minute) / 60000.0;
        let lng = f64::from(self.data.lng_degree) + f64::from(self.data.lng_minute) / 60000.0;
        let (latitude, longitude) =
            Orientation::from_code(self.data.orientation_code).lat_lng(lat, lng);
        Position {
            latitude,
            longitude,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct Position {
    #[serde(rename = "Latitude")]
    pub latitude: f64,
    #[serde(rename = "Longitude")]
    pub longitude: f64,
}

/// All information elements of one mobile originated message. The
/// header element is mandatory; everything else depends on the
/// terminal and the subscribed services.
#[derive(Debug, Clone, Serialize)]
pub struct InformationBucket {
    pub header: MoHeader,
    pub payload: Option<Vec<u8>>,
    pub location: Option<MoLocation>,
    pub position: Option<Position>,
}

/// Read and decode one mobile originated message.
pub async fn read_bucket<R>(reader: &mut R) -> Result<InformationBucket, ProtocolError>
where
    R: AsyncRead + Unpin,
{
    let body = read_message_body(reader).await?;
    parse_bucket(&body)
}

/// Decode the element stream of a message body into a bucket. Later
/// duplicates overwrite earlier elements, unknown element ids are
/// skipped by their declared length.
pub fn parse_bucket(body: &[u8]) -> Result<InformationBucket, ProtocolError> {
    let mut header: Option<MoHeader> = None;
    let mut payload: Option<Vec<u8>> = None;
    let mut location: Option<MoLocation> = None;
    let mut position: Option<Position> = None;

    foreach_element(body, |id, data| {
        match id {
            MO_HEADER_ID => {
                if data.len() != MO_HEADER_BODY_LENGTH {
                    return Err(ProtocolError::InvalidElementLength(id));
                }
                header = Some(MoHeader::parse(data));
            }
            MO_PAYLOAD_ID => payload = Some(data.to_vec()),
            MO_LOCATION_ID => {
                if data.len() != MO_LOCATION_BODY_LENGTH {
                    return Err(ProtocolError::InvalidElementLength(id));
                }
                let loc = MoLocation::parse(data);
                position = Some(loc.position());
                location = Some(loc);
            }
            _ => {}
        }
        Ok(())
    })?;

    let Some(header) = header else {
        return Err(ProtocolError::MissingMoHeader);
    };
    Ok(InformationBucket {
        header,
        payload,
        location,
        position,
    })
}

/// The confirmation element the gateway writes back on every
/// connection: status 1 accepts the message, everything else rejects.
#[derive(Debug, Clone, Copy)]
pub struct MoConfirmation {
    pub status: u8,
}

impl MoConfirmation {
    pub fn accepted() -> Self {
        MoConfirmation { status: 1 }
    }

    pub fn rejected() -> Self {
        MoConfirmation { status: 0 }
    }

    pub fn success(&self) -> bool {
        self.status == 1
    }

    pub fn encode(&self) -> [u8; 7] {
        let prefix = MessageHeader::encode((ELEMENT_HEADER_LENGTH + 1) as u16);
        [
            prefix[0],
            prefix[1],
            prefix[2],
            MO_CONFIRMATION_ID,
            0x00,
            0x01,
            self.status,
        ]
    }

    pub async fn write<W>(&self, writer: &mut W) -> std::io::Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        writer.write_all(&self.encode()).await?;
        writer.flush().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Captured gateway frames, also used by the original gateway
    // deployment for regression testing.
    const SAMPLE_WITH_LOCATION: &[u8] =
        b"\x01\x00\x45\x01\x00\x1c\x9d\x4c\xce\x7b300230000000000\x00\x15\x9d\x00\x00\x58\x1b\x19\xe0\
          \x03\x00\x0b\x00\x06\x8c\xda\x8a\x76\xfe\x00\x00\x00\x08\
          \x02\x00\x15\x00\x21\x61\xac\x0c\x85\xb2\x8f\xf4\x9f\x08\x6b\x0f\xf0\x00\x00\x00\x00\x07\xff\x7c";
    const SAMPLE_HEADER_AND_PAYLOAD: &[u8] =
        b"\x01\x00\x38\x01\x00\x1c\x70\xec\x07\x69300234063904190\x00\x00\x4b\x00\x00\x55\x9e\xba\x2c\
          \x02\x00\x16test message0123456789";

    #[tokio::test]
    async fn decodes_header_and_payload() {
        let mut data = SAMPLE_HEADER_AND_PAYLOAD;
        let bucket = read_bucket(&mut data).await.unwrap();
        assert_eq!(bucket.header.imei(), "300234063904190");
        assert_eq!(bucket.header.time_of_session, 1436465708);
        assert_eq!(bucket.header.momsn, 75);
        assert_eq!(bucket.header.session_status, SessionStatus::COMPLETED);
        assert_eq!(
            bucket.payload.as_deref(),
            Some(b"test message0123456789".as_slice())
        );
        assert!(bucket.location.is_none());
        assert!(bucket.position.is_none());
    }

    #[tokio::test]
    async fn decodes_location() {
        let mut data = SAMPLE_WITH_LOCATION;
        let bucket = read_bucket(&mut data).await.unwrap();
        let location = bucket.location.unwrap();
        assert_eq!(location.cep_radius, 8);
        let position = bucket.position.unwrap();
        assert!((position.latitude - 6.600967).abs() < 1e-5);
        assert!((position.longitude - 138.507700).abs() < 1e-5);
        assert_eq!(bucket.header.cdr_reference, 2639056507);
        assert_eq!(bucket.header.momsn, 5533);
        assert_eq!(bucket.header.time_of_session, 1478171104);
    }

    #[tokio::test]
    async fn header_element_is_mandatory() {
        // a single payload element, no MO header
        let mut data: &[u8] = b"\x01\x00\x07\x02\x00\x04abcd";
        let err = read_bucket(&mut data).await.unwrap_err();
        assert!(matches!(err, ProtocolError::MissingMoHeader));
    }

    #[tokio::test]
    async fn unknown_elements_are_skipped() {
        let mut frame = Vec::new();
        frame.extend_from_slice(&SAMPLE_HEADER_AND_PAYLOAD[..3]);
        frame[2] += 7; // one extra element below
        frame.extend_from_slice(b"\x7f\x00\x04zzzz");
        frame.extend_from_slice(&SAMPLE_HEADER_AND_PAYLOAD[3..]);
        let mut data = frame.as_slice();
        let bucket = read_bucket(&mut data).await.unwrap();
        assert_eq!(bucket.header.imei(), "300234063904190");
        assert_eq!(
            bucket.payload.as_deref(),
            Some(b"test message0123456789".as_slice())
        );
    }

    #[test]
    fn orientation_signs() {
        assert_eq!(Orientation::NorthEast.lat_lng(1.0, 2.0), (1.0, 2.0));
        assert_eq!(Orientation::NorthWest.lat_lng(1.0, 2.0), (1.0, -2.0));
        assert_eq!(Orientation::SouthEast.lat_lng(1.0, 2.0), (-1.0, 2.0));
        assert_eq!(Orientation::SouthWest.lat_lng(1.0, 2.0), (-1.0, -2.0));
    }

    #[test]
    fn confirmation_wire_format() {
        assert_eq!(
            MoConfirmation::accepted().encode(),
            [0x01, 0x00, 0x04, 0x05, 0x00, 0x01, 0x01]
        );
        assert_eq!(
            MoConfirmation::rejected().encode(),
            [0x01, 0x00, 0x04, 0x05, 0x00, 0x01, 0x00]
        );
    }

    #[test]
    fn bucket_json_shape() {
        let bucket = parse_bucket(&SAMPLE_WITH_LOCATION[3..]).unwrap();
        let v: serde_json::Value = serde_json::to_value(&bucket).unwrap();
        assert_eq!(v["header"]["imei"], "300230000000000");
        assert_eq!(v["header"]["cdrreference"], 2639056507u32);
        assert_eq!(v["header"]["sessionstatus"], 0);
        assert_eq!(v["location"]["cepradius"], 8);
        assert_eq!(v["location"]["position"]["latdegree"], 6);
        assert!(v["position"]["Latitude"].is_f64());
        assert!(v["payload"].is_array());
    }

    #[test]
    fn session_status_names() {
        assert_eq!(SessionStatus(0).to_string(), "completed(0)");
        assert_eq!(SessionStatus(13).to_string(), "rf-link-loss(13)");
        assert_eq!(SessionStatus(42).to_string(), "unknown(42)");
    }
}
