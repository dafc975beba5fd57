use base64::prelude::BASE64_STANDARD;
use base64::Engine;
use sha1::{Digest, Sha1};

pub(crate) const WEBSOCKET_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// The `Sec-WebSocket-Accept` value proving the peer speaks WebSocket:
/// base64(SHA-1(key || GUID)).
pub(crate) fn generate_websocket_accept_value(key: &str) -> String {
    let mut sha1 = Sha1::new();
    sha1.update(key.as_bytes());
    sha1.update(WEBSOCKET_GUID.as_bytes());
    BASE64_STANDARD.encode(sha1.finalize())
}

/// A fresh `Sec-WebSocket-Key`: 16 random bytes, base64-encoded.
pub(crate) fn generate_websocket_key() -> String {
    let random_bytes: [u8; 16] = rand::random();
    BASE64_STANDARD.encode(random_bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accept_value_rfc_vector() {
        // The example exchange from RFC 6455 section 1.3.
        assert_eq!(
            generate_websocket_accept_value("dGhlIHNhbXBsZSBub25jZQ=="),
            "s3pPLMBiTxaQ9kYGzzhZRbK+xOo="
        );
    }

    #[test]
    fn test_accept_value_deterministic() {
        let key = generate_websocket_key();
        assert_eq!(key.len(), 24);
        assert_eq!(
            generate_websocket_accept_value(&key),
            generate_websocket_accept_value(&key)
        );
    }

    #[test]
    fn test_keys_are_unique() {
        assert_ne!(generate_websocket_key(), generate_websocket_key());
    }
}
