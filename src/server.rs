use crate::config::ServerConfig;
use crate::error::Error;
use crate::handshake::accept_async_with_config;
use crate::message::Message;
use crate::split::WSWriter;
use crate::stream::SocketStream;
use futures::{Stream, StreamExt};
use log::debug;
use std::fmt;
use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_rustls::{TlsAcceptor, TlsStream};
use uuid::Uuid;

const EVENT_CHANNEL_CAPACITY: usize = 1000;

/// Opaque identifier for one accepted client connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClientId(Uuid);

impl ClientId {
    // Random v8 UUIDs, so identifiers are not guessable the way
    // incrementing ones would be.
    fn new() -> Self {
        ClientId(Uuid::new_v8(rand::random()))
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// What a running server reports about its clients.
pub enum Event {
    /// A client completed the handshake. The writer is the handle for
    /// sending to this client.
    Connected {
        id: ClientId,
        peer: SocketAddr,
        subprotocol: String,
        writer: WSWriter<SocketStream>,
    },
    /// A complete message arrived from a connected client.
    Message { id: ClientId, message: Message },
    /// The client's read stream ended, by close frame or dropped transport.
    Closed { id: ClientId },
    /// TLS setup, handshake, or mid-connection failure for one client.
    Failed { id: ClientId, error: Error },
    /// The listener itself failed to accept a socket.
    AcceptError(Error),
}

/// Stream of [`Event`]s from a running server.
pub struct ServerEvents {
    receiver: mpsc::Receiver<Event>,
}

impl ServerEvents {
    /// Waits for the next event; `None` once the server task is gone.
    pub async fn recv(&mut self) -> Option<Event> {
        self.receiver.recv().await
    }
}

impl Stream for ServerEvents {
    type Item = Event;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().receiver.poll_recv(cx)
    }
}

/// A ready-to-use WebSocket server.
///
/// Binds `port`, accepts connections (TLS-wrapped when the config carries a
/// rustls server config), runs the handshake, and reports every connection,
/// message, disconnection and failure through the returned [`ServerEvents`].
pub async fn start_server_with_config(
    port: u16,
    config: Option<ServerConfig>,
) -> Result<ServerEvents, std::io::Error> {
    let listener = TcpListener::bind(format!("0.0.0.0:{}", port)).await?;
    let (events, receiver) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
    tokio::spawn(accept_loop(listener, config.unwrap_or_default(), events));
    Ok(ServerEvents { receiver })
}

pub async fn start_server(port: u16) -> Result<ServerEvents, std::io::Error> {
    start_server_with_config(port, None).await
}

/// Accepts sockets for the server's lifetime. Each socket is handed its own
/// task before any TLS or WebSocket negotiation, so one slow client never
/// stalls the accept loop. The loop ends when the event receiver is gone.
async fn accept_loop(listener: TcpListener, config: ServerConfig, events: mpsc::Sender<Event>) {
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(err) => {
                if events.send(Event::AcceptError(err.into())).await.is_err() {
                    return;
                }
                continue;
            }
        };

        let id = ClientId::new();
        debug!("accepted connection {id} from {peer}");
        let config = config.clone();
        let events = events.clone();
        tokio::spawn(async move {
            if let Err(error) = serve_client(id, peer, stream, config, &events).await {
                let _ = events.send(Event::Failed { id, error }).await;
            }
        });
    }
}

/// Runs one client from raw socket to the end of its read stream.
///
/// Returns `Err` only for setup failures (TLS accept, handshake). Once
/// `Connected` has been emitted, read-side problems surface as `Failed`
/// events and the function finishes with `Closed` on its own.
async fn serve_client(
    id: ClientId,
    peer: SocketAddr,
    stream: TcpStream,
    config: ServerConfig,
    events: &mpsc::Sender<Event>,
) -> Result<(), Error> {
    let socket_stream = match config.tls_config.clone() {
        Some(tls_config) => {
            let acceptor = TlsAcceptor::from(tls_config);
            SocketStream::Secure(TlsStream::from(acceptor.accept(stream).await?))
        }
        None => SocketStream::Plain(stream),
    };

    let connection = accept_async_with_config(socket_stream, Some(config)).await?;
    let subprotocol = connection.subprotocol().to_string();
    let (mut reader, writer) = connection.split();

    let connected = Event::Connected {
        id,
        peer,
        subprotocol,
        writer,
    };
    if events.send(connected).await.is_err() {
        return Ok(());
    }

    while let Some(result) = reader.next().await {
        match result {
            Ok(message) => {
                if events.send(Event::Message { id, message }).await.is_err() {
                    return Ok(());
                }
            }
            Err(error) => {
                let _ = events.send(Event::Failed { id, error }).await;
                break;
            }
        }
    }

    let _ = events.send(Event::Closed { id }).await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_ids_are_unique() {
        assert_ne!(ClientId::new(), ClientId::new());
    }
}
