use crate::close::CLOSE_NORMAL;
use crate::compression::Encoder;
use crate::connection::{write_control_frame, write_data_frames, WSConnection, DEFAULT_CONTROL_DEADLINE};
use crate::error::{is_close_error, Error};
use crate::frame::OpCode;
use crate::message::Message;
use crate::write::FrameWriter;
use futures::Stream;
use log::debug;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, Mutex};
use tokio_stream::wrappers::ReceiverStream;

const READ_CHANNEL_CAPACITY: usize = 64;

impl<S> WSConnection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    /// Splits the connection into a message stream and a writer.
    ///
    /// A background task drives the read loop (including control-frame
    /// handling) and feeds complete messages into the stream. The stream
    /// ends when the peer closes; other errors are surfaced as the final
    /// item before the end.
    pub fn split(self) -> (WSReader, WSWriter<S>) {
        let writer = WSWriter {
            writer: self.writer.clone(),
            compression_enabled: self.compression_negotiated && self.write_compression,
            compression_level: self.compression_level,
            encoder: None,
            max_frame_size: self.max_frame_size,
        };

        let (read_tx, read_rx) = mpsc::channel(READ_CHANNEL_CAPACITY);
        let mut connection = self;
        tokio::spawn(async move {
            loop {
                match connection.read_message().await {
                    Ok((opcode, payload)) => {
                        let result = Message::from_parts(opcode, payload);
                        let failed = result.is_err();
                        if read_tx.send(result).await.is_err() || failed {
                            break;
                        }
                    }
                    Err(err) => {
                        if is_close_error(&err, &[]) {
                            debug!("peer closed: {err}");
                        } else {
                            let _ = read_tx.send(Err(err)).await;
                        }
                        break;
                    }
                }
            }
        });

        (WSReader::new(ReceiverStream::new(read_rx)), writer)
    }
}

/// The receiving half of a split connection: a stream of complete
/// messages.
pub struct WSReader {
    read_rx: ReceiverStream<Result<Message, Error>>,
}

impl WSReader {
    fn new(read_rx: ReceiverStream<Result<Message, Error>>) -> Self {
        Self { read_rx }
    }
}

impl Stream for WSReader {
    type Item = Result<Message, Error>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        Pin::new(&mut this.read_rx).poll_next(cx)
    }
}

/// The sending half of a split connection.
pub struct WSWriter<S> {
    writer: Arc<Mutex<FrameWriter<S>>>,
    compression_enabled: bool,
    compression_level: i32,
    encoder: Option<Encoder>,
    max_frame_size: usize,
}

impl<S: AsyncWrite + Unpin> WSWriter<S> {
    pub async fn send_message(&mut self, message: Message) -> Result<(), Error> {
        self.write_message(message).await
    }

    /// Sends raw bytes as a text message.
    pub async fn send(&mut self, data: Vec<u8>) -> Result<(), Error> {
        self.write_message(Message::Text(String::from_utf8(data)?))
            .await
    }

    pub async fn send_as_binary(&mut self, data: Vec<u8>) -> Result<(), Error> {
        self.write_message(Message::Binary(data)).await
    }

    pub async fn send_as_text(&mut self, data: String) -> Result<(), Error> {
        self.write_message(Message::Text(data)).await
    }

    pub async fn send_ping(&mut self) -> Result<(), Error> {
        write_control_frame(&self.writer, OpCode::Ping, Vec::new(), None).await
    }

    /// Sends one message chopped into fragments of `fragment_size` bytes.
    pub async fn send_large_data_fragmented(
        &mut self,
        data: Vec<u8>,
        fragment_size: usize,
    ) -> Result<(), Error> {
        let opcode = OpCode::Text;
        let compress = self.compression_enabled && !data.is_empty();
        let payload = if compress {
            self.encoder()?.compress(&data)?
        } else {
            data
        };
        write_data_frames(&self.writer, opcode, payload, compress, fragment_size).await
    }

    /// Announces a normal closure to the peer. The read stream ends once
    /// the peer answers with its own close frame.
    pub async fn close_connection(&mut self) -> Result<(), Error> {
        match write_control_frame(
            &self.writer,
            OpCode::Close,
            crate::close::format_close_message(CLOSE_NORMAL, ""),
            Some(DEFAULT_CONTROL_DEADLINE),
        )
        .await
        {
            Ok(()) | Err(Error::CloseSent) => Ok(()),
            Err(err) => Err(err),
        }
    }

    fn encoder(&mut self) -> Result<&mut Encoder, Error> {
        if self.encoder.is_none() {
            self.encoder = Some(Encoder::new(self.compression_level)?);
        }
        match &mut self.encoder {
            Some(encoder) => Ok(encoder),
            None => Err(Error::InvalidCompressionLevel(self.compression_level)),
        }
    }

    async fn write_message(&mut self, message: Message) -> Result<(), Error> {
        let opcode = message.opcode();
        let payload = message.into_payload();
        let compress = self.compression_enabled && !payload.is_empty();
        let payload = if compress {
            self.encoder()?.compress(&payload)?
        } else {
            payload
        };
        write_data_frames(&self.writer, opcode, payload, compress, self.max_frame_size).await
    }
}
