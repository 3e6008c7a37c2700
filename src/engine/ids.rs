//! Device identifier duality.
//!
//! A Meshtastic device is addressed either as an 8-hex-digit `!`-prefixed
//! string (`!015ba416`) or as the equivalent unsigned 32-bit decimal
//! (`22782998`). Store keys always use the decimal form; every lookup
//! boundary accepts either and converts here.

/// Parse either identifier form into the canonical numeric id.
pub fn to_numeric(id: &str) -> Option<u32> {
    let trimmed = id.trim();
    if let Some(hex) = trimmed.strip_prefix('!') {
        if hex.len() == 8 {
            return u32::from_str_radix(hex, 16).ok();
        }
        return None;
    }
    trimmed.parse::<u32>().ok()
}

/// Render the `!`-prefixed hex form of a numeric id.
pub fn to_hex(num: u32) -> String {
    format!("!{:08x}", num)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_and_decimal_interconvert() {
        assert_eq!(to_numeric("!015ba416"), Some(22782998));
        assert_eq!(to_numeric("22782998"), Some(22782998));
        assert_eq!(to_hex(22782998), "!015ba416");
        assert_eq!(to_numeric(&to_hex(0xFFFF_FFFF)), Some(u32::MAX));
    }

    #[test]
    fn malformed_ids_rejected() {
        assert_eq!(to_numeric(""), None);
        assert_eq!(to_numeric("!xyz"), None);
        assert_eq!(to_numeric("!015ba4161"), None); // 9 hex digits
        assert_eq!(to_numeric("!15ba416"), None); // 7 hex digits
        assert_eq!(to_numeric("-5"), None);
        assert_eq!(to_numeric("4294967296"), None); // > u32::MAX
    }
}
