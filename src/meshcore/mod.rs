//! # MeshCore Frame Decoder
//!
//! Decoder for the MeshCore binary wire format. MeshCore packets are compact,
//! bit-packed and variable-length: a single header byte carries the protocol
//! version, payload type and route type, followed by an optional transport
//! token, a length-prefixed hop path, and the raw payload.
//!
//! ```text
//! byte 0           : [ver:2][payloadType:4][routeType:2]  (routeType low)
//! 4 bytes          : transport token, present iff routeType in {0,3}
//! 1 byte           : pathLen
//! pathLen bytes    : path (raw hop bytes)
//! remaining bytes  : payload
//! ```
//!
//! Decoding is total: every malformed or truncated input maps to a typed
//! [`DecodeError`], never a panic. Garbage frames are expected on a lossy
//! radio link, so callers treat decode failures as routine and silent.
//!
//! ## Usage
//!
//! ```rust
//! use meshdot::meshcore::{decode_frame, RouteType};
//!
//! // DIRECT route, REQ payload, no transport token, empty path
//! let frame = decode_frame(&[0x02, 0x00, 0xAA, 0xBB]).unwrap();
//! assert_eq!(frame.route_type, RouteType::Direct);
//! assert!(frame.path.is_empty());
//! assert_eq!(frame.payload, vec![0xAA, 0xBB]);
//! ```
//!
//! ADVERT payloads (device identity announcements) get a second decoding
//! stage in [`advert`].

pub mod advert;

pub use advert::{decode_advert, decode_advert_frame, AdvertFrame, AdvertPayload, DeviceType};

use bytes::Buf;

/// Typed decode failures. Truncated or malformed input from the radio side
/// is routine, so none of these are ever escalated past the decoder boundary.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("frame too short ({len} bytes, need at least 2)")]
    FrameTooShort { len: usize },

    #[error("transport token overruns frame ({remaining} bytes left, need 4)")]
    TransportOverrun { remaining: usize },

    #[error("declared path length {declared} overruns frame ({remaining} bytes left)")]
    PathOverrun { declared: usize, remaining: usize },

    #[error("advert payload too short ({len} bytes, need at least {min})", min = ADVERT_MIN_LEN)]
    AdvertTooShort { len: usize },

    #[error("expected ADVERT payload, got {actual}")]
    NotAdvert { actual: PayloadType },
}

/// Minimum ADVERT payload: 32-byte key + 4-byte timestamp + 64-byte
/// signature + at least one byte of application data (the flags byte).
pub const ADVERT_MIN_LEN: usize = 32 + 4 + 64 + 1;

/// Route type from the two low bits of the header byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteType {
    TransportFlood,
    Flood,
    Direct,
    TransportDirect,
}

impl RouteType {
    pub fn from_bits(bits: u8) -> Self {
        match bits & 0x03 {
            0 => RouteType::TransportFlood,
            1 => RouteType::Flood,
            2 => RouteType::Direct,
            _ => RouteType::TransportDirect,
        }
    }

    /// Transport-routed frames carry a 4-byte transport token after the header.
    pub fn has_transport(self) -> bool {
        matches!(self, RouteType::TransportFlood | RouteType::TransportDirect)
    }
}

impl std::fmt::Display for RouteType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RouteType::TransportFlood => "TRANSPORT_FLOOD",
            RouteType::Flood => "FLOOD",
            RouteType::Direct => "DIRECT",
            RouteType::TransportDirect => "TRANSPORT_DIRECT",
        };
        write!(f, "{}", s)
    }
}

/// Payload type from the middle four bits of the header byte.
///
/// Wire values 11..=14 are unassigned in the MeshCore firmware we interop
/// with; they decode as `Unknown(n)` and render as `unknown-N`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadType {
    Req,
    Response,
    TxtMsg,
    Ack,
    Advert,
    GrpTxt,
    GrpData,
    AnonReq,
    Path,
    Trace,
    Multipart,
    RawCustom,
    Unknown(u8),
}

impl PayloadType {
    pub fn from_bits(bits: u8) -> Self {
        match bits & 0x0F {
            0 => PayloadType::Req,
            1 => PayloadType::Response,
            2 => PayloadType::TxtMsg,
            3 => PayloadType::Ack,
            4 => PayloadType::Advert,
            5 => PayloadType::GrpTxt,
            6 => PayloadType::GrpData,
            7 => PayloadType::AnonReq,
            8 => PayloadType::Path,
            9 => PayloadType::Trace,
            10 => PayloadType::Multipart,
            15 => PayloadType::RawCustom,
            n => PayloadType::Unknown(n),
        }
    }
}

impl std::fmt::Display for PayloadType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PayloadType::Req => write!(f, "REQ"),
            PayloadType::Response => write!(f, "RESPONSE"),
            PayloadType::TxtMsg => write!(f, "TXT_MSG"),
            PayloadType::Ack => write!(f, "ACK"),
            PayloadType::Advert => write!(f, "ADVERT"),
            PayloadType::GrpTxt => write!(f, "GRP_TXT"),
            PayloadType::GrpData => write!(f, "GRP_DATA"),
            PayloadType::AnonReq => write!(f, "ANON_REQ"),
            PayloadType::Path => write!(f, "PATH"),
            PayloadType::Trace => write!(f, "TRACE"),
            PayloadType::Multipart => write!(f, "MULTIPART"),
            PayloadType::RawCustom => write!(f, "RAW_CUSTOM"),
            PayloadType::Unknown(n) => write!(f, "unknown-{}", n),
        }
    }
}

/// One decoded MeshCore frame. Section lengths always sum to the exact
/// input length; a shortfall is a [`DecodeError`], never a partial frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame {
    /// 2-bit protocol version ordinal from the header byte.
    pub version: u8,
    pub route_type: RouteType,
    pub payload_type: PayloadType,
    /// 4-byte transport token; present iff the route type is transport-based.
    pub transport: Option<[u8; 4]>,
    /// Raw hop bytes (0..=255 of them).
    pub path: Vec<u8>,
    pub payload: Vec<u8>,
}

/// Decode one raw MeshCore frame.
///
/// The smallest legal frame is two bytes: a header whose route type needs no
/// transport token plus a zero path length, leaving an empty payload.
pub fn decode_frame(bytes: &[u8]) -> Result<RawFrame, DecodeError> {
    if bytes.len() < 2 {
        return Err(DecodeError::FrameTooShort { len: bytes.len() });
    }

    let mut buf = bytes;
    let header = buf.get_u8();
    let route_type = RouteType::from_bits(header);
    let payload_type = PayloadType::from_bits(header >> 2);
    let version = (header >> 6) & 0x03;

    let transport = if route_type.has_transport() {
        if buf.remaining() < 4 {
            return Err(DecodeError::TransportOverrun {
                remaining: buf.remaining(),
            });
        }
        let mut token = [0u8; 4];
        buf.copy_to_slice(&mut token);
        Some(token)
    } else {
        None
    };

    if buf.remaining() < 1 {
        // Transport token consumed everything up to the path-length byte.
        return Err(DecodeError::FrameTooShort { len: bytes.len() });
    }
    let path_len = buf.get_u8() as usize;
    if buf.remaining() < path_len {
        return Err(DecodeError::PathOverrun {
            declared: path_len,
            remaining: buf.remaining(),
        });
    }
    let path = buf[..path_len].to_vec();
    buf.advance(path_len);

    Ok(RawFrame {
        version,
        route_type,
        payload_type,
        transport,
        path,
        payload: buf.to_vec(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_two_byte_frame() {
        // DIRECT route (no transport), pathLen 0: empty path and payload.
        let frame = decode_frame(&[0x02, 0x00]).expect("decode");
        assert_eq!(frame.route_type, RouteType::Direct);
        assert_eq!(frame.payload_type, PayloadType::Req);
        assert_eq!(frame.version, 0);
        assert!(frame.transport.is_none());
        assert!(frame.path.is_empty());
        assert!(frame.payload.is_empty());
    }

    #[test]
    fn direct_req_frame_with_payload() {
        // header 0x02 -> routeType DIRECT, payloadType REQ; pathLen 0;
        // payload is the remaining five bytes.
        let raw = [0x02, 0x00, 0x01, 0x02, 0x03, 0x04, 0x61];
        let frame = decode_frame(&raw).expect("decode");
        assert_eq!(frame.route_type, RouteType::Direct);
        assert_eq!(frame.payload_type, PayloadType::Req);
        assert!(frame.transport.is_none());
        assert!(frame.path.is_empty());
        assert_eq!(frame.payload, vec![0x01, 0x02, 0x03, 0x04, 0x61]);
    }

    #[test]
    fn transport_token_parsed_for_transport_routes() {
        // routeType 0 (TRANSPORT_FLOOD) carries a 4-byte token.
        let raw = [0x10, 0xDE, 0xAD, 0xBE, 0xEF, 0x02, 0x11, 0x22, 0x99];
        let frame = decode_frame(&raw).expect("decode");
        assert_eq!(frame.route_type, RouteType::TransportFlood);
        assert_eq!(frame.payload_type, PayloadType::Advert);
        assert_eq!(frame.transport, Some([0xDE, 0xAD, 0xBE, 0xEF]));
        assert_eq!(frame.path, vec![0x11, 0x22]);
        assert_eq!(frame.payload, vec![0x99]);
    }

    #[test]
    fn section_lengths_sum_to_input() {
        let raw = [0x13, 1, 2, 3, 4, 3, 0xAA, 0xBB, 0xCC, 0x01, 0x02];
        let frame = decode_frame(&raw).expect("decode");
        let transport_len = if frame.transport.is_some() { 4 } else { 0 };
        let consumed = 1 + transport_len + 1 + frame.path.len() + frame.payload.len();
        assert_eq!(consumed, raw.len());
    }

    #[test]
    fn too_short_input_fails() {
        assert_eq!(
            decode_frame(&[]),
            Err(DecodeError::FrameTooShort { len: 0 })
        );
        assert_eq!(
            decode_frame(&[0x02]),
            Err(DecodeError::FrameTooShort { len: 1 })
        );
    }

    #[test]
    fn truncated_transport_fails() {
        // TRANSPORT_DIRECT needs 4 token bytes, only 2 remain.
        let err = decode_frame(&[0x03, 0x01, 0x02]).unwrap_err();
        assert_eq!(err, DecodeError::TransportOverrun { remaining: 2 });
    }

    #[test]
    fn overlong_path_fails() {
        // pathLen 5 declared, only 2 bytes remain.
        let err = decode_frame(&[0x02, 0x05, 0xAA, 0xBB]).unwrap_err();
        assert_eq!(
            err,
            DecodeError::PathOverrun {
                declared: 5,
                remaining: 2
            }
        );
    }

    #[test]
    fn unknown_payload_type_renders_with_ordinal() {
        let pt = PayloadType::from_bits(13);
        assert_eq!(pt, PayloadType::Unknown(13));
        assert_eq!(pt.to_string(), "unknown-13");
    }

    #[test]
    fn version_bits_extracted() {
        // header 0b11_0000_10: ver 3, payload REQ, route DIRECT
        let frame = decode_frame(&[0xC2, 0x00]).expect("decode");
        assert_eq!(frame.version, 3);
    }
}
