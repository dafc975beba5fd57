use crate::request::HttpResponse;
use pki_types::InvalidDnsNameError;
use std::io;
use std::string::FromUtf8Error;
use thiserror::Error;
use tokio::time::error::Elapsed;
use url::ParseError;

#[derive(Error, Debug)]
pub enum Error {
    // General Errors
    #[error("{source}")]
    Timeout {
        #[from]
        source: Elapsed,
    },

    #[error("IO Error happened: {source}")]
    IOError {
        #[from]
        source: io::Error,
    },

    #[error("{source}")]
    FromUtf8Error {
        #[from]
        source: FromUtf8Error,
    },

    // Handshake Errors
    #[error("bad handshake: {reason}")]
    BadHandshake {
        reason: String,
        response: Option<Box<HttpResponse>>,
    },

    #[error("incomplete HTTP message")]
    IncompleteHttpMessage,

    #[error("{source}")]
    HttpParseError {
        #[from]
        source: httparse::Error,
    },

    // Framing Errors
    #[error("RSV not zero")]
    RSVNotZero,

    #[error("incorrect mask flag on received frame")]
    IncorrectMask,

    #[error("control frames must not be fragmented")]
    ControlFramesFragmented,

    #[error("control frame payload can't be greater than 125 bytes")]
    ControlFramePayloadSize,

    #[error("invalid opcode")]
    InvalidOpcode,

    #[error("message exceeds the configured read limit")]
    ReadLimit,

    // Fragmentation Errors
    #[error("continuation frame received with no message in progress")]
    UnexpectedContinuation,

    #[error("data frame received while a fragmented message is in progress")]
    ExpectedContinuation,

    // Message-level Errors
    #[error("message opcode must be text or binary")]
    InvalidMessageType,

    #[error("opcode is not a control opcode")]
    InvalidControlFrame,

    #[error("received close frame with invalid code: {0}")]
    InvalidCloseCode(u16),

    #[error("websocket: close {code} {text}")]
    CloseReceived { code: u16, text: String },

    #[error("close frame already sent")]
    CloseSent,

    #[error("use of closed connection")]
    ConnectionClosed,

    // HTTP / URL Errors
    #[error("{source}")]
    URLParseError {
        #[from]
        source: ParseError,
    },

    #[error("invalid scheme in WebSocket URL")]
    InvalidSchemeURL,

    #[error("URL has no host")]
    URLNoHost,

    // TLS Errors
    #[error("{source}")]
    TlsError {
        #[from]
        source: rustls::Error,
    },

    #[error("{source}")]
    DomainError {
        #[from]
        source: InvalidDnsNameError,
    },

    // Compression / Decompression Errors
    #[error("compression level must be between -2 and 9, got {0}")]
    InvalidCompressionLevel(i32),

    #[error("{source}")]
    CompressError {
        #[from]
        source: flate2::CompressError,
    },

    #[error("{source}")]
    DecompressError {
        #[from]
        source: flate2::DecompressError,
    },
}

impl Error {
    /// A copy suitable for storing in a direction latch and replaying on
    /// every later call. Variants wrapping foreign non-clonable errors are
    /// reduced to an IO error that keeps the kind and message.
    pub(crate) fn latch_copy(&self) -> Error {
        match self {
            Error::IOError { source } => Error::IOError {
                source: io::Error::new(source.kind(), source.to_string()),
            },
            Error::Timeout { .. } => Error::IOError {
                source: io::Error::new(io::ErrorKind::TimedOut, "deadline has elapsed"),
            },
            Error::CloseReceived { code, text } => Error::CloseReceived {
                code: *code,
                text: text.clone(),
            },
            Error::BadHandshake { reason, .. } => Error::BadHandshake {
                reason: reason.clone(),
                response: None,
            },
            Error::InvalidCloseCode(code) => Error::InvalidCloseCode(*code),
            Error::InvalidCompressionLevel(level) => Error::InvalidCompressionLevel(*level),
            Error::IncompleteHttpMessage => Error::IncompleteHttpMessage,
            Error::RSVNotZero => Error::RSVNotZero,
            Error::IncorrectMask => Error::IncorrectMask,
            Error::ControlFramesFragmented => Error::ControlFramesFragmented,
            Error::ControlFramePayloadSize => Error::ControlFramePayloadSize,
            Error::InvalidOpcode => Error::InvalidOpcode,
            Error::ReadLimit => Error::ReadLimit,
            Error::UnexpectedContinuation => Error::UnexpectedContinuation,
            Error::ExpectedContinuation => Error::ExpectedContinuation,
            Error::InvalidMessageType => Error::InvalidMessageType,
            Error::InvalidControlFrame => Error::InvalidControlFrame,
            Error::CloseSent => Error::CloseSent,
            Error::ConnectionClosed => Error::ConnectionClosed,
            Error::InvalidSchemeURL => Error::InvalidSchemeURL,
            Error::URLNoHost => Error::URLNoHost,
            other => Error::IOError {
                source: io::Error::new(io::ErrorKind::Other, other.to_string()),
            },
        }
    }
}

/// Whether `err` is a received-close error carrying one of `codes`.
///
/// With an empty `codes` slice, matches any received-close error.
pub fn is_close_error(err: &Error, codes: &[u16]) -> bool {
    match err {
        Error::CloseReceived { code, .. } => codes.is_empty() || codes.contains(code),
        _ => false,
    }
}

/// Whether `err` is a received-close error with a code outside `expected`.
pub fn is_unexpected_close_error(err: &Error, expected: &[u16]) -> bool {
    match err {
        Error::CloseReceived { code, .. } => !expected.contains(code),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::close::{CLOSE_GOING_AWAY, CLOSE_NORMAL, CLOSE_PROTOCOL_ERROR};

    #[test]
    fn test_is_close_error() {
        let err = Error::CloseReceived {
            code: CLOSE_NORMAL,
            text: "bye".to_string(),
        };
        assert!(is_close_error(&err, &[CLOSE_NORMAL, CLOSE_GOING_AWAY]));
        assert!(is_close_error(&err, &[]));
        assert!(!is_close_error(&err, &[CLOSE_PROTOCOL_ERROR]));
        assert!(!is_close_error(&Error::CloseSent, &[CLOSE_NORMAL]));
    }

    #[test]
    fn test_is_unexpected_close_error() {
        let err = Error::CloseReceived {
            code: CLOSE_PROTOCOL_ERROR,
            text: String::new(),
        };
        assert!(is_unexpected_close_error(&err, &[CLOSE_NORMAL]));
        assert!(!is_unexpected_close_error(
            &err,
            &[CLOSE_NORMAL, CLOSE_PROTOCOL_ERROR]
        ));
        assert!(!is_unexpected_close_error(&Error::CloseSent, &[]));
    }

    #[test]
    fn test_latch_copy_keeps_classification() {
        let err = Error::CloseReceived {
            code: 1000,
            text: "done".to_string(),
        };
        assert!(matches!(
            err.latch_copy(),
            Error::CloseReceived { code: 1000, .. }
        ));

        let io_err = Error::IOError {
            source: io::Error::new(io::ErrorKind::UnexpectedEof, "eof"),
        };
        match io_err.latch_copy() {
            Error::IOError { source } => assert_eq!(source.kind(), io::ErrorKind::UnexpectedEof),
            other => panic!("unexpected latch copy: {other:?}"),
        }
    }
}
