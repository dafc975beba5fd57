//! Close codes and the close-frame payload format.
//!
//! A close payload is a 2-byte big-endian status code followed by UTF-8
//! reason text. The codes 1005, 1006 and 1015 are sentinels that only exist
//! on the API surface and are never written to the wire.

use crate::error::Error;

pub const CLOSE_NORMAL: u16 = 1000;
pub const CLOSE_GOING_AWAY: u16 = 1001;
pub const CLOSE_PROTOCOL_ERROR: u16 = 1002;
pub const CLOSE_UNSUPPORTED_DATA: u16 = 1003;
pub const CLOSE_NO_STATUS: u16 = 1005;
pub const CLOSE_ABNORMAL: u16 = 1006;
pub const CLOSE_INVALID_PAYLOAD: u16 = 1007;
pub const CLOSE_POLICY_VIOLATION: u16 = 1008;
pub const CLOSE_MESSAGE_TOO_BIG: u16 = 1009;
pub const CLOSE_MANDATORY_EXTENSION: u16 = 1010;
pub const CLOSE_INTERNAL_ERROR: u16 = 1011;
pub const CLOSE_SERVICE_RESTART: u16 = 1012;
pub const CLOSE_TRY_AGAIN_LATER: u16 = 1013;
pub const CLOSE_TLS_HANDSHAKE: u16 = 1015;

/// Codes a peer is allowed to put on the wire, per RFC 6455 section 7.4.
/// 1004 is reserved, 1005/1006/1015 are internal sentinels, and the
/// 3000-4999 range is open to applications.
pub fn is_valid_received_close_code(code: u16) -> bool {
    matches!(code,
        CLOSE_NORMAL..=CLOSE_UNSUPPORTED_DATA
        | CLOSE_INVALID_PAYLOAD..=CLOSE_TRY_AGAIN_LATER
        | 3000..=4999)
}

/// Encodes a close payload. `CLOSE_NO_STATUS` produces an empty payload so
/// the sentinel never reaches the wire.
pub fn format_close_message(code: u16, text: &str) -> Vec<u8> {
    if code == CLOSE_NO_STATUS {
        return Vec::new();
    }
    let mut payload = Vec::with_capacity(2 + text.len());
    payload.extend_from_slice(&code.to_be_bytes());
    payload.extend_from_slice(text.as_bytes());
    payload
}

/// Decodes a received close payload into `(code, text)`.
///
/// An empty payload means the peer sent no status and maps to
/// `CLOSE_NO_STATUS`. A 1-byte payload cannot carry a code and is rejected.
pub fn parse_close_payload(payload: &[u8]) -> Result<(u16, String), Error> {
    match payload.len() {
        0 => Ok((CLOSE_NO_STATUS, String::new())),
        1 => Err(Error::InvalidCloseCode(payload[0] as u16)),
        _ => {
            let code = u16::from_be_bytes([payload[0], payload[1]]);
            if !is_valid_received_close_code(code) {
                return Err(Error::InvalidCloseCode(code));
            }
            let text = String::from_utf8(payload[2..].to_vec())?;
            Ok((code, text))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_and_parse_roundtrip() {
        for code in [CLOSE_NORMAL, CLOSE_GOING_AWAY, 3000, 4999] {
            let payload = format_close_message(code, "going offline");
            let (parsed_code, text) = parse_close_payload(&payload).unwrap();
            assert_eq!(parsed_code, code);
            assert_eq!(text, "going offline");
        }
    }

    #[test]
    fn test_no_status_formats_empty() {
        assert!(format_close_message(CLOSE_NO_STATUS, "ignored").is_empty());
        let (code, text) = parse_close_payload(&[]).unwrap();
        assert_eq!(code, CLOSE_NO_STATUS);
        assert!(text.is_empty());
    }

    #[test]
    fn test_one_byte_payload_rejected() {
        assert!(matches!(
            parse_close_payload(&[0x03]),
            Err(Error::InvalidCloseCode(_))
        ));
    }

    #[test]
    fn test_invalid_codes_rejected() {
        for code in [0u16, 999, 1004, 1005, 1006, 1015, 1016, 2999, 5000] {
            let mut payload = code.to_be_bytes().to_vec();
            payload.extend_from_slice(b"x");
            assert!(
                matches!(parse_close_payload(&payload), Err(Error::InvalidCloseCode(c)) if c == code),
                "code {code} should be rejected"
            );
        }
    }

    #[test]
    fn test_valid_code_set() {
        assert!(is_valid_received_close_code(CLOSE_NORMAL));
        assert!(is_valid_received_close_code(CLOSE_TRY_AGAIN_LATER));
        assert!(is_valid_received_close_code(3500));
        assert!(!is_valid_received_close_code(CLOSE_ABNORMAL));
        assert!(!is_valid_received_close_code(CLOSE_TLS_HANDSHAKE));
    }

    #[test]
    fn test_reason_must_be_utf8() {
        let mut payload = CLOSE_NORMAL.to_be_bytes().to_vec();
        payload.extend_from_slice(&[0xff, 0xfe]);
        assert!(matches!(
            parse_close_payload(&payload),
            Err(Error::FromUtf8Error { .. })
        ));
    }
}
