use crate::error::Error;
use crate::frame::{Frame, OpCode, MAX_CONTROL_PAYLOAD};
use crate::mask::apply_mask;
use crate::write::Role;
use log::trace;
use tokio::io::{AsyncReadExt, BufReader, ReadHalf};

/// Decodes frames off the buffered read half.
///
/// The reader owns the `BufReader` that already served the handshake, so
/// bytes the handshake read ahead of the blank line are consumed as frame
/// data rather than lost.
pub(crate) struct FrameReader<S> {
    buf_reader: BufReader<ReadHalf<S>>,
    role: Role,
    // Scratch for the frame head: 2 bytes fixed, up to 8 of extended
    // length, 4 of masking key.
    scratch: [u8; 14],
    pub(crate) read_limit: usize,
    pub(crate) compression_negotiated: bool,
}

impl<S: tokio::io::AsyncRead + Unpin> FrameReader<S> {
    pub fn new(buf_reader: BufReader<ReadHalf<S>>, role: Role) -> Self {
        Self {
            buf_reader,
            role,
            scratch: [0u8; 14],
            read_limit: 0,
            compression_negotiated: false,
        }
    }

    pub async fn read_frame(&mut self) -> Result<Frame, Error> {
        self.buf_reader.read_exact(&mut self.scratch[..2]).await?;
        let header = [self.scratch[0], self.scratch[1]];

        let final_fragment = (header[0] & 0b1000_0000) != 0;
        let rsv1 = (header[0] & 0b0100_0000) != 0;
        let rsv2 = (header[0] & 0b0010_0000) != 0;
        let rsv3 = (header[0] & 0b0001_0000) != 0;
        let opcode = OpCode::from(header[0] & 0b0000_1111)?;

        // RSV1 is claimed by permessage-deflate once negotiated; the other
        // reserved bits belong to no extension this crate speaks.
        if rsv2 || rsv3 || (rsv1 && !self.compression_negotiated) {
            return Err(Error::RSVNotZero);
        }

        if opcode.is_control() && !final_fragment {
            return Err(Error::ControlFramesFragmented);
        }

        let masked = (header[1] & 0b1000_0000) != 0;
        let mut length = (header[1] & 0b0111_1111) as usize;

        // A control frame can't even announce an extended length: the
        // 7-bit indicator itself must stay within 125.
        if opcode.is_control() && length > MAX_CONTROL_PAYLOAD {
            return Err(Error::ControlFramePayloadSize);
        }

        if length == 126 {
            self.buf_reader.read_exact(&mut self.scratch[..2]).await?;
            length = u16::from_be_bytes([self.scratch[0], self.scratch[1]]) as usize;
        } else if length == 127 {
            self.buf_reader.read_exact(&mut self.scratch[..8]).await?;
            let mut be_bytes = [0u8; 8];
            be_bytes.copy_from_slice(&self.scratch[..8]);
            length = u64::from_be_bytes(be_bytes) as usize;
        }

        // Enforced on the announced length, before a single payload byte
        // is pulled off the stream.
        if self.read_limit > 0 && length > self.read_limit {
            return Err(Error::ReadLimit);
        }

        match self.role {
            Role::Server if !masked => return Err(Error::IncorrectMask),
            Role::Client if masked => return Err(Error::IncorrectMask),
            _ => {}
        }

        let mask = if masked {
            self.buf_reader.read_exact(&mut self.scratch[..4]).await?;
            let mut key = [0u8; 4];
            key.copy_from_slice(&self.scratch[..4]);
            Some(key)
        } else {
            None
        };

        let mut payload = vec![0u8; length];
        self.buf_reader.read_exact(&mut payload).await?;

        if let Some(key) = mask {
            apply_mask(&mut payload, key, 0);
        }

        trace!(
            "read frame: opcode {:?}, fin {}, rsv1 {}, {} bytes",
            opcode,
            final_fragment,
            rsv1,
            payload.len()
        );

        Ok(Frame {
            final_fragment,
            opcode,
            payload,
            compressed: rsv1,
        })
    }
}
