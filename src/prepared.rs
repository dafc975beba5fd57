use crate::compression::Encoder;
use crate::error::Error;
use crate::frame::{Frame, OpCode};
use crate::mask::generate_mask_key;
use crate::write::encode_frame;
use bytes::BytesMut;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// Selects which encoded form of a prepared message a connection needs:
/// masking follows the sender's role, and the payload is deflated when the
/// connection negotiated compression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct PreparedKey {
    pub server: bool,
    pub compress: bool,
    pub level: i32,
}

/// A message encoded once and broadcast to many connections.
///
/// The payload is immutable after construction; encoded frames are computed
/// lazily per key under a mutex and then served from the cache, so the N-th
/// request returns exactly the bytes the first one did.
pub struct PreparedMessage {
    opcode: OpCode,
    payload: Vec<u8>,
    cache: Mutex<HashMap<PreparedKey, Arc<Vec<u8>>>>,
}

impl PreparedMessage {
    pub fn new(opcode: OpCode, payload: Vec<u8>) -> Result<Self, Error> {
        if !opcode.is_data() {
            return Err(Error::InvalidMessageType);
        }
        Ok(Self {
            opcode,
            payload,
            cache: Mutex::new(HashMap::new()),
        })
    }

    pub fn opcode(&self) -> OpCode {
        self.opcode
    }

    pub(crate) fn frame(&self, key: PreparedKey) -> Result<Arc<Vec<u8>>, Error> {
        {
            let cache = self
                .cache
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if let Some(encoded) = cache.get(&key) {
                return Ok(encoded.clone());
            }
        }

        // Encode outside the lock; losing a race only costs a duplicate
        // encoding, the first insert stays authoritative.
        let payload = if key.compress {
            Encoder::new(key.level)?.compress(&self.payload)?
        } else {
            self.payload.clone()
        };

        let frame = Frame::new(true, self.opcode, payload, key.compress);
        let mask = if key.server {
            None
        } else {
            Some(generate_mask_key())
        };
        let mut buf = BytesMut::new();
        encode_frame(&mut buf, &frame, key.compress, mask);
        let encoded = Arc::new(buf.to_vec());

        let mut cache = self
            .cache
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Ok(cache.entry(key).or_insert(encoded).clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_control_opcodes_rejected() {
        for opcode in [OpCode::Close, OpCode::Ping, OpCode::Pong, OpCode::Continue] {
            assert!(matches!(
                PreparedMessage::new(opcode, Vec::new()),
                Err(Error::InvalidMessageType)
            ));
        }
    }

    #[test]
    fn test_repeated_requests_return_identical_frames() {
        let message = PreparedMessage::new(OpCode::Text, b"broadcast".to_vec()).unwrap();
        for key in [
            PreparedKey { server: true, compress: false, level: 1 },
            // Client frames embed a random mask, so byte-stable caching
            // matters most here.
            PreparedKey { server: false, compress: false, level: 1 },
            PreparedKey { server: true, compress: true, level: 6 },
            PreparedKey { server: false, compress: true, level: 6 },
        ] {
            let first = message.frame(key).unwrap();
            for _ in 0..3 {
                assert_eq!(message.frame(key).unwrap(), first);
            }
        }
    }

    #[test]
    fn test_server_frame_matches_writer_output() {
        let message = PreparedMessage::new(OpCode::Binary, vec![1, 2, 3]).unwrap();
        let encoded = message
            .frame(PreparedKey { server: true, compress: false, level: 1 })
            .unwrap();
        let mut expected = BytesMut::new();
        encode_frame(
            &mut expected,
            &Frame::new(true, OpCode::Binary, vec![1, 2, 3], false),
            false,
            None,
        );
        assert_eq!(encoded.as_slice(), &expected[..]);
    }

    #[test]
    fn test_keys_are_cached_independently() {
        let message = PreparedMessage::new(OpCode::Text, b"aaaaaaaaaaaaaaaa".to_vec()).unwrap();
        let plain = message
            .frame(PreparedKey { server: true, compress: false, level: 1 })
            .unwrap();
        let deflated = message
            .frame(PreparedKey { server: true, compress: true, level: 1 })
            .unwrap();
        assert_ne!(plain, deflated);
        // RSV1 set on the compressed form only.
        assert_eq!(deflated[0] & 0b0100_0000, 0b0100_0000);
        assert_eq!(plain[0] & 0b0100_0000, 0);
    }
}
