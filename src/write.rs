use crate::buffer::BufferPool;
use crate::error::Error;
use crate::frame::{Frame, OpCode};
use crate::mask::{apply_mask, generate_mask_key};
use bytes::{BufMut, BytesMut};
use std::sync::Arc;
use tokio::io::{AsyncWriteExt, WriteHalf};

/// Which side of the connection this endpoint is. The role decides the
/// masking direction: clients mask every outgoing frame, servers none.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Server,
    Client,
}

impl Role {
    pub(crate) fn is_server(&self) -> bool {
        matches!(self, Role::Server)
    }
}

/// Encodes a complete frame into `buf`: header, optional extended length,
/// optional masking key, payload. With a key present the payload lands in
/// `buf` already masked; the caller's copy is untouched.
pub(crate) fn encode_frame(buf: &mut BytesMut, frame: &Frame, rsv1: bool, mask: Option<[u8; 4]>) {
    let mut first_byte = (frame.final_fragment as u8) << 7 | frame.opcode.as_u8();
    if rsv1 {
        first_byte |= 0b0100_0000;
    }

    let payload_len = frame.payload.len();
    buf.reserve(14 + payload_len);
    buf.put_u8(first_byte);

    let mask_bit = if mask.is_some() { 0b1000_0000 } else { 0 };
    if payload_len <= 125 {
        buf.put_u8(mask_bit | payload_len as u8);
    } else if payload_len <= 65535 {
        buf.put_u8(mask_bit | 126);
        buf.put_u16(payload_len as u16);
    } else {
        buf.put_u8(mask_bit | 127);
        buf.put_u64(payload_len as u64);
    }

    match mask {
        Some(key) => {
            buf.put_slice(&key);
            let start = buf.len();
            buf.put_slice(&frame.payload);
            apply_mask(&mut buf[start..], key, 0);
        }
        None => buf.put_slice(&frame.payload),
    }
}

/// The exclusive owner of the write half. Shared behind a mutex so control
/// frames written from the read path interleave with message frames only at
/// frame boundaries.
pub(crate) struct FrameWriter<S> {
    write_half: WriteHalf<S>,
    role: Role,
    buf: BytesMut,
    err: Option<Error>,
    pool: Option<Arc<dyn BufferPool>>,
}

impl<S: tokio::io::AsyncWrite + Unpin> FrameWriter<S> {
    pub fn new(write_half: WriteHalf<S>, role: Role, pool: Option<Arc<dyn BufferPool>>) -> Self {
        let buf = match &pool {
            Some(pool) => pool.get(),
            None => BytesMut::new(),
        };
        Self {
            write_half,
            role,
            buf,
            err: None,
            pool,
        }
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// Encodes and writes one frame as a single stream write.
    ///
    /// After a close frame goes out the writer latches: every later write in
    /// this direction fails without touching the stream.
    pub async fn write_frame(&mut self, frame: &Frame, rsv1: bool) -> Result<(), Error> {
        if let Some(err) = &self.err {
            return Err(err.latch_copy());
        }

        self.buf.clear();
        let mask = match self.role {
            Role::Client => Some(generate_mask_key()),
            Role::Server => None,
        };
        encode_frame(&mut self.buf, frame, rsv1, mask);

        if let Err(source) = self.write_half.write_all(&self.buf).await {
            let err = Error::IOError { source };
            self.err = Some(err.latch_copy());
            return Err(err);
        }

        if frame.opcode == OpCode::Close {
            self.err = Some(Error::CloseSent);
        }
        Ok(())
    }

    /// Writes pre-encoded frame bytes (a prepared message) in one call.
    pub async fn write_raw(&mut self, encoded: &[u8]) -> Result<(), Error> {
        if let Some(err) = &self.err {
            return Err(err.latch_copy());
        }
        if let Err(source) = self.write_half.write_all(encoded).await {
            let err = Error::IOError { source };
            self.err = Some(err.latch_copy());
            return Err(err);
        }
        Ok(())
    }

    /// Latches the writer, shuts the stream down and hands the scratch
    /// buffer back to its pool.
    pub async fn shutdown(&mut self) {
        self.err = Some(Error::ConnectionClosed);
        let _ = self.write_half.shutdown().await;
        if let Some(pool) = &self.pool {
            pool.put(std::mem::take(&mut self.buf));
        }
    }
}
