use crate::buffer::BufferPool;
use crate::compression::DEFAULT_COMPRESSION_LEVEL;
use crate::request::HttpRequest;
use rustls::ServerConfig as RustlsConfig;
use std::sync::Arc;
use std::time::Duration;

/// Predicate deciding whether a handshake request's `Origin` is acceptable.
pub type OriginPredicate = Arc<dyn Fn(&HttpRequest) -> bool + Send + Sync>;

/// Renders the HTTP error body sent when a handshake is rejected.
pub type ErrorResponder = Arc<dyn Fn(u16, &str) -> String + Send + Sync>;

/// Largest frame emitted when chunking an outgoing message.
pub const DEFAULT_MAX_FRAME_SIZE: usize = 16 << 20;

pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Clone)]
pub struct ClientConfig {
    /// Subprotocols to offer, most preferred first.
    pub subprotocols: Vec<String>,
    /// Offer permessage-deflate in the handshake.
    pub enable_compression: bool,
    pub compression_level: i32,
    /// Largest accepted incoming message in bytes; 0 means unlimited.
    pub read_limit: usize,
    pub max_frame_size: usize,
    /// Deadline covering the whole handshake exchange.
    pub handshake_timeout: Option<Duration>,
    /// Additional request headers. Mandatory upgrade headers always win.
    pub extra_headers: Vec<(String, String)>,
    /// PEM file with CA roots for `wss://`; the webpki roots are used when
    /// unset.
    pub ca_file: Option<String>,
    pub buffer_pool: Option<Arc<dyn BufferPool>>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            subprotocols: Vec::new(),
            enable_compression: false,
            compression_level: DEFAULT_COMPRESSION_LEVEL,
            read_limit: 0,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            handshake_timeout: Some(DEFAULT_HANDSHAKE_TIMEOUT),
            extra_headers: Vec::new(),
            ca_file: None,
            buffer_pool: None,
        }
    }
}

#[derive(Clone)]
pub struct ServerConfig {
    /// Supported subprotocols, most preferred first.
    pub subprotocols: Vec<String>,
    /// Accept permessage-deflate offers.
    pub enable_compression: bool,
    pub compression_level: i32,
    /// Largest accepted incoming message in bytes; 0 means unlimited.
    pub read_limit: usize,
    pub max_frame_size: usize,
    /// Deadline for reading the client's handshake request.
    pub handshake_timeout: Option<Duration>,
    /// Additional headers for the `101 Switching Protocols` response.
    pub extra_headers: Vec<(String, String)>,
    /// Overrides the default same-host origin check.
    pub check_origin: Option<OriginPredicate>,
    /// Overrides the default plain-text handshake error body.
    pub error_responder: Option<ErrorResponder>,
    pub tls_config: Option<Arc<RustlsConfig>>,
    pub buffer_pool: Option<Arc<dyn BufferPool>>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            subprotocols: Vec::new(),
            enable_compression: false,
            compression_level: DEFAULT_COMPRESSION_LEVEL,
            read_limit: 0,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            handshake_timeout: Some(DEFAULT_HANDSHAKE_TIMEOUT),
            extra_headers: Vec::new(),
            check_origin: None,
            error_responder: None,
            tls_config: None,
            buffer_pool: None,
        }
    }
}
