use crate::buffer::BufferPool;
use crate::close::format_close_message;
use crate::close::parse_close_payload;
use crate::compression::{validate_compression_level, Decoder, Encoder, DEFAULT_COMPRESSION_LEVEL};
use crate::config::DEFAULT_MAX_FRAME_SIZE;
use crate::error::Error;
use crate::frame::{Frame, OpCode, MAX_CONTROL_PAYLOAD};
use crate::prepared::{PreparedKey, PreparedMessage};
use crate::read::FrameReader;
use crate::write::{FrameWriter, Role};
use futures::future::BoxFuture;
use log::{trace, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, BufReader, ReadHalf, WriteHalf};
use tokio::sync::Mutex;
use tokio::time::timeout;

/// Deadline the default ping and close handlers put on their replies.
pub const DEFAULT_CONTROL_DEADLINE: Duration = Duration::from_secs(5);

/// Callback invoked for an incoming ping or pong with its payload.
pub type ControlHandler<S> =
    Box<dyn FnMut(ControlWriter<S>, Vec<u8>) -> BoxFuture<'static, Result<(), Error>> + Send>;

/// Callback invoked for an incoming close frame with its code and reason.
pub type CloseHandler<S> =
    Box<dyn FnMut(ControlWriter<S>, u16, String) -> BoxFuture<'static, Result<(), Error>> + Send>;

/// A cloneable handle control handlers use to write control frames back
/// into the connection. It shares the frame-writer lock, so replies
/// interleave with message frames only at frame boundaries.
pub struct ControlWriter<S> {
    writer: Arc<Mutex<FrameWriter<S>>>,
}

impl<S> Clone for ControlWriter<S> {
    fn clone(&self) -> Self {
        Self {
            writer: self.writer.clone(),
        }
    }
}

impl<S: AsyncWrite + Unpin> ControlWriter<S> {
    pub async fn write_control(
        &self,
        opcode: OpCode,
        payload: Vec<u8>,
        deadline: Option<Duration>,
    ) -> Result<(), Error> {
        write_control_frame(&self.writer, opcode, payload, deadline).await
    }
}

/// Writes a single control frame, holding the frame lock only for that one
/// write. An optional deadline bounds both the lock wait and the write.
pub(crate) async fn write_control_frame<S: AsyncWrite + Unpin>(
    writer: &Mutex<FrameWriter<S>>,
    opcode: OpCode,
    payload: Vec<u8>,
    deadline: Option<Duration>,
) -> Result<(), Error> {
    if !opcode.is_control() {
        return Err(Error::InvalidControlFrame);
    }
    if payload.len() > MAX_CONTROL_PAYLOAD {
        return Err(Error::ControlFramePayloadSize);
    }
    let frame = Frame::new(true, opcode, payload, false);
    match deadline {
        Some(deadline) => {
            timeout(deadline, async {
                writer.lock().await.write_frame(&frame, false).await
            })
            .await?
        }
        None => writer.lock().await.write_frame(&frame, false).await,
    }
}

/// Deflate-aware fan-out of one message payload into data frames. The
/// payload arrives already compressed when `compressed` is set; only the
/// first frame of the message carries the message opcode and RSV1.
pub(crate) async fn write_data_frames<S: AsyncWrite + Unpin>(
    writer: &Mutex<FrameWriter<S>>,
    opcode: OpCode,
    payload: Vec<u8>,
    compressed: bool,
    max_frame_size: usize,
) -> Result<(), Error> {
    if payload.is_empty() {
        let frame = Frame::new(true, opcode, payload, compressed);
        return writer.lock().await.write_frame(&frame, compressed).await;
    }

    let max = if max_frame_size == 0 {
        usize::MAX
    } else {
        max_frame_size
    };
    let total = payload.len().div_ceil(max);
    for (i, chunk) in payload.chunks(max).enumerate() {
        let first = i == 0;
        let frame = Frame::new(
            i == total - 1,
            if first { opcode } else { OpCode::Continue },
            chunk.to_vec(),
            compressed && first,
        );
        writer
            .lock()
            .await
            .write_frame(&frame, compressed && first)
            .await?;
    }
    Ok(())
}

/// A WebSocket connection after a completed handshake.
///
/// One reader and one writer may be active at a time; the borrow checker
/// enforces that for the message-level handles, while control frames share
/// the write half through an internal lock. Each direction latches its
/// first error and replays it on every later call.
pub struct WSConnection<S> {
    reader: FrameReader<S>,
    pub(crate) writer: Arc<Mutex<FrameWriter<S>>>,
    role: Role,
    read_err: Option<Error>,
    pub(crate) compression_negotiated: bool,
    pub(crate) write_compression: bool,
    pub(crate) compression_level: i32,
    encoder: Option<Encoder>,
    decoder: Option<Decoder>,
    read_limit: usize,
    pub(crate) max_frame_size: usize,
    subprotocol: String,
    ping_handler: Option<ControlHandler<S>>,
    pong_handler: Option<ControlHandler<S>>,
    close_handler: Option<CloseHandler<S>>,
}

impl<S: AsyncRead + AsyncWrite + Unpin> WSConnection<S> {
    pub(crate) fn from_parts(
        buf_reader: BufReader<ReadHalf<S>>,
        write_half: WriteHalf<S>,
        role: Role,
        pool: Option<Arc<dyn BufferPool>>,
    ) -> Self {
        Self {
            reader: FrameReader::new(buf_reader, role),
            writer: Arc::new(Mutex::new(FrameWriter::new(write_half, role, pool))),
            role,
            read_err: None,
            compression_negotiated: false,
            write_compression: true,
            compression_level: DEFAULT_COMPRESSION_LEVEL,
            encoder: None,
            decoder: None,
            read_limit: 0,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            subprotocol: String::new(),
            ping_handler: None,
            pong_handler: None,
            close_handler: None,
        }
    }

    /// Wraps a stream whose WebSocket handshake already happened elsewhere,
    /// honoring the byte-stream collaborator contract: any reliable duplex
    /// stream works, TLS or proxying included.
    pub fn after_handshake(stream: S, role: Role) -> Self {
        let (read_half, write_half) = tokio::io::split(stream);
        Self::from_parts(BufReader::new(read_half), write_half, role, None)
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// The subprotocol the handshake settled on; empty when none.
    pub fn subprotocol(&self) -> &str {
        &self.subprotocol
    }

    pub(crate) fn set_subprotocol(&mut self, subprotocol: String) {
        self.subprotocol = subprotocol;
    }

    pub(crate) fn set_compression(&mut self, negotiated: bool) {
        self.compression_negotiated = negotiated;
        self.reader.compression_negotiated = negotiated;
    }

    pub fn compression_negotiated(&self) -> bool {
        self.compression_negotiated
    }

    /// Caps incoming message size in bytes; 0 lifts the cap. Oversized
    /// frames are rejected on their announced length, before the payload is
    /// read off the stream.
    pub fn set_read_limit(&mut self, limit: usize) {
        self.read_limit = limit;
        self.reader.read_limit = limit;
    }

    pub fn set_compression_level(&mut self, level: i32) -> Result<(), Error> {
        validate_compression_level(level)?;
        self.compression_level = level;
        self.encoder = None;
        Ok(())
    }

    /// Turns deflate on or off for outgoing messages. Has effect only when
    /// the handshake negotiated compression.
    pub fn set_write_compression(&mut self, enabled: bool) {
        self.write_compression = enabled;
    }

    /// Replaces the ping handler; `None` reinstates the default, which
    /// echoes the payload back as a pong.
    pub fn set_ping_handler(&mut self, handler: Option<ControlHandler<S>>) {
        self.ping_handler = handler;
    }

    /// Replaces the pong handler; `None` reinstates the default no-op.
    pub fn set_pong_handler(&mut self, handler: Option<ControlHandler<S>>) {
        self.pong_handler = handler;
    }

    /// Replaces the close handler; `None` reinstates the default, which
    /// echoes the close code back.
    pub fn set_close_handler(&mut self, handler: Option<CloseHandler<S>>) {
        self.close_handler = handler;
    }

    /// A handle for writing control frames from outside the reader loop,
    /// e.g. periodic pings from another task.
    pub fn control_writer(&self) -> ControlWriter<S> {
        ControlWriter {
            writer: self.writer.clone(),
        }
    }

    fn latch_read(&mut self, err: Error) -> Error {
        self.read_err = Some(err.latch_copy());
        err
    }

    async fn pull_frame(&mut self) -> Result<Frame, Error> {
        if let Some(err) = &self.read_err {
            return Err(err.latch_copy());
        }
        match self.reader.read_frame().await {
            Ok(frame) => Ok(frame),
            Err(err) => {
                warn!("read failed: {err}");
                Err(self.latch_read(err))
            }
        }
    }

    /// Reads frames until a data or continuation frame shows up, feeding
    /// control frames to their handlers along the way. A close frame comes
    /// back as the error carrying the peer's code and reason.
    async fn pull_data_frame(&mut self) -> Result<Frame, Error> {
        loop {
            let frame = self.pull_frame().await?;
            match frame.opcode {
                OpCode::Ping => self.on_ping(frame.payload).await?,
                OpCode::Pong => self.on_pong(frame.payload).await?,
                OpCode::Close => {
                    let err = self.on_close(frame.payload).await?;
                    return Err(err);
                }
                _ => return Ok(frame),
            }
        }
    }

    async fn on_ping(&mut self, payload: Vec<u8>) -> Result<(), Error> {
        trace!("ping received, {} bytes", payload.len());
        if let Some(handler) = &mut self.ping_handler {
            let control = ControlWriter {
                writer: self.writer.clone(),
            };
            return handler(control, payload).await;
        }
        match write_control_frame(
            &self.writer,
            OpCode::Pong,
            payload,
            Some(DEFAULT_CONTROL_DEADLINE),
        )
        .await
        {
            Ok(()) | Err(Error::CloseSent) | Err(Error::ConnectionClosed) => Ok(()),
            Err(err) => Err(err),
        }
    }

    async fn on_pong(&mut self, payload: Vec<u8>) -> Result<(), Error> {
        trace!("pong received, {} bytes", payload.len());
        if let Some(handler) = &mut self.pong_handler {
            let control = ControlWriter {
                writer: self.writer.clone(),
            };
            return handler(control, payload).await;
        }
        Ok(())
    }

    /// Handles a received close frame and produces the error every current
    /// and future read returns. The handler runs before the latch is set,
    /// and a failing handler aborts the read without latching.
    async fn on_close(&mut self, payload: Vec<u8>) -> Result<Error, Error> {
        let (code, text) = match parse_close_payload(&payload) {
            Ok(parsed) => parsed,
            Err(err) => return Err(self.latch_read(err)),
        };
        trace!("close received: code {code}, reason {text:?}");

        if let Some(handler) = &mut self.close_handler {
            let control = ControlWriter {
                writer: self.writer.clone(),
            };
            handler(control, code, text.clone()).await?;
        } else {
            match write_control_frame(
                &self.writer,
                OpCode::Close,
                format_close_message(code, ""),
                Some(DEFAULT_CONTROL_DEADLINE),
            )
            .await
            {
                Ok(()) | Err(Error::CloseSent) | Err(Error::ConnectionClosed) => {}
                Err(err) => return Err(err),
            }
        }

        let err = Error::CloseReceived { code, text };
        self.read_err = Some(err.latch_copy());
        Ok(err)
    }

    async fn collect_compressed_fragments(&mut self, first: Vec<u8>) -> Result<Vec<u8>, Error> {
        // Fragments of a deflated message are raw slices of one DEFLATE
        // stream; they are concatenated verbatim and inflated once.
        let mut fragments = first;
        loop {
            let frame = self.pull_data_frame().await?;
            match frame.opcode {
                OpCode::Continue => {
                    if self.read_limit > 0
                        && fragments.len() + frame.payload.len() > self.read_limit
                    {
                        return Err(self.latch_read(Error::ReadLimit));
                    }
                    fragments.extend_from_slice(&frame.payload);
                    if frame.final_fragment {
                        return Ok(fragments);
                    }
                }
                _ => return Err(self.latch_read(Error::ExpectedContinuation)),
            }
        }
    }

    /// Waits for the next message and returns its type together with a
    /// reader for its payload. Compressed messages are accumulated and
    /// inflated before the reader is handed out; uncompressed fragmented
    /// messages are pulled frame-by-frame as the reader is drained.
    pub async fn next_reader(&mut self) -> Result<(OpCode, MessageReader<'_, S>), Error> {
        let frame = self.pull_data_frame().await?;
        let opcode = frame.opcode;
        match opcode {
            OpCode::Continue => Err(self.latch_read(Error::UnexpectedContinuation)),
            OpCode::Text | OpCode::Binary => {
                if frame.compressed {
                    let raw = if frame.final_fragment {
                        frame.payload
                    } else {
                        self.collect_compressed_fragments(frame.payload).await?
                    };
                    let inflated = self.decoder.get_or_insert_with(Decoder::new).decompress(&raw);
                    let payload = match inflated {
                        Ok(payload) => payload,
                        Err(err) => return Err(self.latch_read(err)),
                    };
                    Ok((opcode, MessageReader::complete(self, opcode, payload)))
                } else if frame.final_fragment {
                    Ok((opcode, MessageReader::complete(self, opcode, frame.payload)))
                } else {
                    Ok((opcode, MessageReader::streaming(self, opcode, frame.payload)))
                }
            }
            _ => Err(self.latch_read(Error::InvalidOpcode)),
        }
    }

    /// Reads one whole message into a buffer.
    pub async fn read_message(&mut self) -> Result<(OpCode, Vec<u8>), Error> {
        let (opcode, mut reader) = self.next_reader().await?;
        let payload = reader.read_to_end().await?;
        Ok((opcode, payload))
    }

    fn effective_compression(&self) -> bool {
        self.compression_negotiated && self.write_compression
    }

    fn encoder_mut(&mut self) -> Result<&mut Encoder, Error> {
        if self.encoder.is_none() {
            self.encoder = Some(Encoder::new(self.compression_level)?);
        }
        match &mut self.encoder {
            Some(encoder) => Ok(encoder),
            None => Err(Error::InvalidCompressionLevel(self.compression_level)),
        }
    }

    fn deflate(&mut self, payload: &[u8]) -> Result<Vec<u8>, Error> {
        self.encoder_mut()?.compress(payload)
    }

    /// Writes one whole message, deflating and chunking as configured.
    pub async fn write_message(&mut self, opcode: OpCode, payload: Vec<u8>) -> Result<(), Error> {
        if !opcode.is_data() {
            return Err(Error::InvalidMessageType);
        }
        let compress = self.effective_compression() && !payload.is_empty();
        let payload = if compress {
            self.deflate(&payload)?
        } else {
            payload
        };
        write_data_frames(&self.writer, opcode, payload, compress, self.max_frame_size).await
    }

    /// Opens a message for incremental writing. Only one writer can be open
    /// at a time; it must be finished with [`MessageWriter::close`].
    pub fn next_writer(&mut self, opcode: OpCode) -> Result<MessageWriter<'_, S>, Error> {
        if !opcode.is_data() {
            return Err(Error::InvalidMessageType);
        }
        let compress = self.effective_compression();
        if compress {
            self.encoder_mut()?.begin_message();
        }
        Ok(MessageWriter {
            conn: self,
            opcode,
            compress,
            started: false,
        })
    }

    /// Writes a close, ping or pong frame, bounded by `deadline` when one
    /// is given. Once a close frame has gone out, all further writes fail.
    pub async fn write_control(
        &self,
        opcode: OpCode,
        payload: Vec<u8>,
        deadline: Option<Duration>,
    ) -> Result<(), Error> {
        write_control_frame(&self.writer, opcode, payload, deadline).await
    }

    /// Sends a pre-encoded message, picking the cached form matching this
    /// connection's role and compression state.
    pub async fn write_prepared(&self, message: &PreparedMessage) -> Result<(), Error> {
        let key = PreparedKey {
            server: self.role.is_server(),
            compress: self.effective_compression(),
            level: self.compression_level,
        };
        let encoded = message.frame(key)?;
        self.writer.lock().await.write_raw(&encoded).await
    }

    /// Tears the connection down: latches both directions and shuts down
    /// the underlying stream. The closing handshake, if wanted, is the
    /// caller's job via `write_control` before this.
    pub async fn close(&mut self) -> Result<(), Error> {
        if self.read_err.is_none() {
            self.read_err = Some(Error::ConnectionClosed);
        }
        self.writer.lock().await.shutdown().await;
        Ok(())
    }
}

/// Lazy access to one incoming message's payload.
pub struct MessageReader<'c, S> {
    conn: &'c mut WSConnection<S>,
    opcode: OpCode,
    buffered: Option<Vec<u8>>,
    finished: bool,
    consumed: usize,
}

impl<'c, S: AsyncRead + AsyncWrite + Unpin> MessageReader<'c, S> {
    fn complete(conn: &'c mut WSConnection<S>, opcode: OpCode, payload: Vec<u8>) -> Self {
        Self {
            conn,
            opcode,
            buffered: Some(payload),
            finished: true,
            consumed: 0,
        }
    }

    fn streaming(conn: &'c mut WSConnection<S>, opcode: OpCode, first: Vec<u8>) -> Self {
        Self {
            conn,
            opcode,
            buffered: Some(first),
            finished: false,
            consumed: 0,
        }
    }

    pub fn opcode(&self) -> OpCode {
        self.opcode
    }

    /// The next chunk of payload, pulling continuation frames as needed.
    /// Control frames encountered on the way go through the connection's
    /// handlers. `None` marks the end of the message.
    pub async fn chunk(&mut self) -> Result<Option<Vec<u8>>, Error> {
        if let Some(chunk) = self.buffered.take() {
            self.consumed += chunk.len();
            return Ok(Some(chunk));
        }
        if self.finished {
            return Ok(None);
        }
        let frame = self.conn.pull_data_frame().await?;
        match frame.opcode {
            OpCode::Continue => {
                if self.conn.read_limit > 0
                    && self.consumed + frame.payload.len() > self.conn.read_limit
                {
                    return Err(self.conn.latch_read(Error::ReadLimit));
                }
                self.consumed += frame.payload.len();
                if frame.final_fragment {
                    self.finished = true;
                }
                Ok(Some(frame.payload))
            }
            _ => Err(self.conn.latch_read(Error::ExpectedContinuation)),
        }
    }

    /// Drains the rest of the message into one buffer.
    pub async fn read_to_end(&mut self) -> Result<Vec<u8>, Error> {
        let mut payload = match self.chunk().await? {
            Some(first) => first,
            None => return Ok(Vec::new()),
        };
        while let Some(chunk) = self.chunk().await? {
            payload.extend_from_slice(&chunk);
        }
        Ok(payload)
    }
}

/// Incremental writer for one outgoing message.
///
/// Every `write` goes out as its own frame: the first carries the message
/// opcode (and RSV1 when compression is on), the rest are continuations.
/// Compressed chunks are fed through one per-message deflate stream as they
/// arrive, so a large message streams without being held in memory;
/// [`MessageWriter::close`] flushes that stream, strips the trailer, and
/// sends the final fragment.
pub struct MessageWriter<'c, S> {
    conn: &'c mut WSConnection<S>,
    opcode: OpCode,
    compress: bool,
    started: bool,
}

impl<'c, S: AsyncRead + AsyncWrite + Unpin> MessageWriter<'c, S> {
    pub async fn write(&mut self, chunk: &[u8]) -> Result<(), Error> {
        let payload = if self.compress {
            // May be empty while deflate buffers; the frame still goes out
            // so writes and wire frames stay one-to-one.
            self.conn.encoder_mut()?.compress_chunk(chunk)?
        } else {
            chunk.to_vec()
        };
        let first = !self.started;
        let opcode = if first { self.opcode } else { OpCode::Continue };
        let rsv1 = self.compress && first;
        let frame = Frame::new(false, opcode, payload, rsv1);
        self.conn
            .writer
            .lock()
            .await
            .write_frame(&frame, rsv1)
            .await?;
        self.started = true;
        Ok(())
    }

    /// Finishes the message with a final fragment (possibly empty).
    pub async fn close(self) -> Result<(), Error> {
        let payload = if self.compress {
            self.conn.encoder_mut()?.finish_message()?
        } else {
            Vec::new()
        };
        let first = !self.started;
        let opcode = if first { self.opcode } else { OpCode::Continue };
        let rsv1 = self.compress && first;
        let frame = Frame::new(true, opcode, payload, rsv1);
        self.conn
            .writer
            .lock()
            .await
            .write_frame(&frame, rsv1)
            .await
    }
}
