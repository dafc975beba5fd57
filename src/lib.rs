//! Async WebSockets for the Tokio stack.
//!
//! This library implements the [WebSocket Protocol RFC](https://datatracker.ietf.org/doc/html/rfc6455)
//! together with the permessage-deflate compression extension of
//! [RFC 7692](https://datatracker.ietf.org/doc/html/rfc7692), for both
//! clients and servers. It performs the opening handshake, reads and
//! writes frames, handles masking, fragmentation and control frames, and
//! exposes messages either one at a time ([`WSConnection::read_message`] /
//! [`WSConnection::write_message`]), incrementally
//! ([`WSConnection::next_reader`] / [`WSConnection::next_writer`]), or as a
//! split stream/writer pair for event-driven servers.
//!
//! The engine runs over any `AsyncRead + AsyncWrite` duplex stream; plain
//! TCP and rustls-wrapped TCP are provided out of the box.

mod buffer;
mod close;
mod compression;
mod config;
mod connection;
pub mod error;
mod extensions;
pub mod frame;
pub mod handshake;
mod mask;
mod message;
mod prepared;
mod read;
mod request;
mod server;
mod split;
mod stream;
mod utils;
mod write;

pub use buffer::{BufferPool, SharedBufferPool};
pub use close::{
    format_close_message, is_valid_received_close_code, parse_close_payload, CLOSE_ABNORMAL,
    CLOSE_GOING_AWAY, CLOSE_INTERNAL_ERROR, CLOSE_INVALID_PAYLOAD, CLOSE_MANDATORY_EXTENSION,
    CLOSE_MESSAGE_TOO_BIG, CLOSE_NORMAL, CLOSE_NO_STATUS, CLOSE_POLICY_VIOLATION,
    CLOSE_PROTOCOL_ERROR, CLOSE_SERVICE_RESTART, CLOSE_TLS_HANDSHAKE, CLOSE_TRY_AGAIN_LATER,
    CLOSE_UNSUPPORTED_DATA,
};
pub use compression::{DEFAULT_COMPRESSION_LEVEL, MAX_COMPRESSION_LEVEL, MIN_COMPRESSION_LEVEL};
pub use config::{ClientConfig, ErrorResponder, OriginPredicate, ServerConfig};
pub use connection::{
    ControlHandler, ControlWriter, CloseHandler, MessageReader, MessageWriter, WSConnection,
    DEFAULT_CONTROL_DEADLINE,
};
pub use error::{is_close_error, is_unexpected_close_error, Error};
pub use frame::{Frame, OpCode, MAX_CONTROL_PAYLOAD};
pub use handshake::{
    accept_async, accept_async_with_config, connect_async, connect_async_with_config,
    connect_async_with_stream,
};
pub use mask::apply_mask;
pub use message::Message;
pub use prepared::PreparedMessage;
pub use request::{HttpRequest, HttpResponse};
pub use server::{start_server, start_server_with_config, ClientId, Event, ServerEvents};
pub use split::{WSReader, WSWriter};
pub use stream::SocketStream;
pub use write::Role;
