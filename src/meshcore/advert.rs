//! ADVERT payload decoding.
//!
//! An ADVERT frame announces a device's identity and, optionally, its
//! location, two 16-bit feature values, and a display name. The payload is
//! a fixed 100-byte identity prefix followed by a flag-gated application
//! data section:
//!
//! ```text
//! pubKey[32] | timestamp_u32_le | signature[64] | flags[1]
//!   | (lat_i32_le, lon_i32_le)?   flags bit 4
//!   | (feat1_u16_le)?             flags bit 5
//!   | (feat2_u16_le)?             flags bit 6
//!   | (name utf8, NUL-stripped)?  flags bit 7
//! ```
//!
//! The fixed prefix decodes unconditionally; optional sections decode in
//! flag order and degrade gracefully on truncation. A payload cut off in
//! the middle of the optional tail keeps every field decoded before the
//! truncation point and sets [`AdvertPayload::truncated`].

use bytes::Buf;

use super::{decode_frame, DecodeError, PayloadType, RawFrame, ADVERT_MIN_LEN};

const FLAG_HAS_LOCATION: u8 = 0x10;
const FLAG_HAS_FEAT1: u8 = 0x20;
const FLAG_HAS_FEAT2: u8 = 0x40;
const FLAG_HAS_NAME: u8 = 0x80;

/// Device role announced in the low four bits of the ADVERT flags byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceType {
    Companion,
    Repeater,
    RoomServer,
    Sensor,
    Unknown(u8),
}

impl DeviceType {
    pub fn from_bits(bits: u8) -> Self {
        match bits & 0x0F {
            1 => DeviceType::Companion,
            2 => DeviceType::Repeater,
            3 => DeviceType::RoomServer,
            4 => DeviceType::Sensor,
            n => DeviceType::Unknown(n),
        }
    }
}

impl std::fmt::Display for DeviceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceType::Companion => write!(f, "Companion"),
            DeviceType::Repeater => write!(f, "Repeater"),
            DeviceType::RoomServer => write!(f, "RoomServer"),
            DeviceType::Sensor => write!(f, "Sensor"),
            DeviceType::Unknown(n) => write!(f, "Type{}", n),
        }
    }
}

/// Decoded ADVERT application data.
#[derive(Debug, Clone, PartialEq)]
pub struct AdvertPayload {
    pub public_key: [u8; 32],
    /// Device-reported timestamp, seconds since epoch, little-endian u32.
    pub timestamp: u32,
    pub signature: [u8; 64],
    pub device_type: DeviceType,
    /// Degrees, scaled from signed micro-degrees and rounded to 6 decimals.
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub feature1: Option<u16>,
    pub feature2: Option<u16>,
    pub name: Option<String>,
    /// Set when a flagged optional section was cut off; everything decoded
    /// before the truncation point is still populated.
    pub truncated: bool,
}

impl AdvertPayload {
    /// Hex rendering of the 32-byte public key (the MeshCore device id).
    pub fn public_key_hex(&self) -> String {
        self.public_key.iter().map(|b| format!("{:02x}", b)).collect()
    }
}

/// A RawFrame and its ADVERT payload decoded together.
#[derive(Debug, Clone)]
pub struct AdvertFrame {
    pub frame: RawFrame,
    pub advert: AdvertPayload,
}

/// Scale signed micro-degrees to float degrees, rounded to 6 decimal places
/// (half away from zero, which is what `f64::round` does).
pub fn micro_degrees(raw: i32) -> f64 {
    let degrees = raw as f64 / 1_000_000.0;
    (degrees * 1_000_000.0).round() / 1_000_000.0
}

/// Decode an ADVERT payload.
///
/// Fails only when the payload is shorter than the fixed prefix plus the
/// flags byte ([`ADVERT_MIN_LEN`]). Truncation inside the optional tail is
/// not a failure: decoding stops at the first section with insufficient
/// bytes and returns what it has, flagged as truncated.
pub fn decode_advert(payload: &[u8]) -> Result<AdvertPayload, DecodeError> {
    if payload.len() < ADVERT_MIN_LEN {
        return Err(DecodeError::AdvertTooShort { len: payload.len() });
    }

    let mut buf = payload;
    let mut public_key = [0u8; 32];
    buf.copy_to_slice(&mut public_key);
    let timestamp = buf.get_u32_le();
    let mut signature = [0u8; 64];
    buf.copy_to_slice(&mut signature);
    let flags = buf.get_u8();

    let mut advert = AdvertPayload {
        public_key,
        timestamp,
        signature,
        device_type: DeviceType::from_bits(flags),
        latitude: None,
        longitude: None,
        feature1: None,
        feature2: None,
        name: None,
        truncated: false,
    };

    if flags & FLAG_HAS_LOCATION != 0 {
        if buf.remaining() < 8 {
            advert.truncated = true;
            return Ok(advert);
        }
        advert.latitude = Some(micro_degrees(buf.get_i32_le()));
        advert.longitude = Some(micro_degrees(buf.get_i32_le()));
    }
    if flags & FLAG_HAS_FEAT1 != 0 {
        if buf.remaining() < 2 {
            advert.truncated = true;
            return Ok(advert);
        }
        advert.feature1 = Some(buf.get_u16_le());
    }
    if flags & FLAG_HAS_FEAT2 != 0 {
        if buf.remaining() < 2 {
            advert.truncated = true;
            return Ok(advert);
        }
        advert.feature2 = Some(buf.get_u16_le());
    }
    if flags & FLAG_HAS_NAME != 0 {
        // Name runs to the end of the payload; trailing NUL padding from
        // fixed-width firmware buffers is stripped.
        let mut end = buf.len();
        while end > 0 && buf[end - 1] == 0 {
            end -= 1;
        }
        advert.name = Some(String::from_utf8_lossy(&buf[..end]).into_owned());
    }

    Ok(advert)
}

/// Decode a raw frame and its ADVERT payload in one step.
///
/// Frames carrying any other payload type are rejected with
/// [`DecodeError::NotAdvert`].
pub fn decode_advert_frame(bytes: &[u8]) -> Result<AdvertFrame, DecodeError> {
    let frame = decode_frame(bytes)?;
    if frame.payload_type != PayloadType::Advert {
        return Err(DecodeError::NotAdvert {
            actual: frame.payload_type,
        });
    }
    let advert = decode_advert(&frame.payload)?;
    Ok(AdvertFrame { frame, advert })
}
