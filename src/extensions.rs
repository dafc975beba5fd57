//! `Sec-WebSocket-Extensions` handling for permessage-deflate (RFC 7692).
//!
//! Only the stateless flavor is spoken here: the server always answers with
//! `server_no_context_takeover`, so neither side carries a DEFLATE
//! dictionary across messages.

const PERMESSAGE_DEFLATE: &str = "permessage-deflate";
const CLIENT_NO_CONTEXT_TAKEOVER: &str = "client_no_context_takeover";
const SERVER_NO_CONTEXT_TAKEOVER: &str = "server_no_context_takeover";
const CLIENT_MAX_WINDOW_BITS: &str = "client_max_window_bits";
const SERVER_MAX_WINDOW_BITS: &str = "server_max_window_bits";

/// One parsed permessage-deflate offer or response.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Extensions {
    pub client_no_context_takeover: bool,
    pub server_no_context_takeover: bool,
    pub client_max_window_bits: Option<u8>,
    pub server_max_window_bits: Option<u8>,
}

/// Parses a `Sec-WebSocket-Extensions` header value and returns the first
/// permessage-deflate offer, if any. Offers are comma-separated, parameters
/// within an offer semicolon-separated.
pub fn parse_extensions(extensions_header_value: &str) -> Option<Extensions> {
    extensions_header_value
        .split(',')
        .filter_map(parse_single_offer)
        .next()
}

fn parse_single_offer(offer: &str) -> Option<Extensions> {
    let mut params = offer.split(';').map(str::trim);

    if params.next()? != PERMESSAGE_DEFLATE {
        return None;
    }

    let mut extensions = Extensions::default();
    for param in params {
        if param == CLIENT_NO_CONTEXT_TAKEOVER {
            extensions.client_no_context_takeover = true;
        } else if param == SERVER_NO_CONTEXT_TAKEOVER {
            extensions.server_no_context_takeover = true;
        } else if param.starts_with(CLIENT_MAX_WINDOW_BITS) {
            if !param.contains('=') {
                extensions.client_max_window_bits = Some(15);
            } else {
                extensions.client_max_window_bits =
                    param.split('=').last()?.trim().parse::<u8>().ok();
            }
        } else if param.starts_with(SERVER_MAX_WINDOW_BITS) {
            if !param.contains('=') {
                extensions.server_max_window_bits = Some(15);
            } else {
                extensions.server_max_window_bits =
                    param.split('=').last()?.trim().parse::<u8>().ok();
            }
        }
    }

    Some(extensions)
}

/// Builds the server's response parameters for an accepted offer:
/// context takeover is always disabled on the server side, the client side
/// is disabled when the client asked for it, and a `client_max_window_bits`
/// offer is pinned to the full 15-bit window.
pub fn negotiate_extensions(offer: &Extensions) -> Extensions {
    Extensions {
        server_no_context_takeover: true,
        client_no_context_takeover: offer.client_no_context_takeover,
        client_max_window_bits: offer.client_max_window_bits.map(|_| 15),
        server_max_window_bits: None,
    }
}

/// Renders negotiated parameters as a `Sec-WebSocket-Extensions` value.
pub fn format_extension_header(extensions: &Extensions) -> String {
    let mut header = String::from(PERMESSAGE_DEFLATE);
    if extensions.server_no_context_takeover {
        header.push_str("; ");
        header.push_str(SERVER_NO_CONTEXT_TAKEOVER);
    }
    if extensions.client_no_context_takeover {
        header.push_str("; ");
        header.push_str(CLIENT_NO_CONTEXT_TAKEOVER);
    }
    if let Some(bits) = extensions.client_max_window_bits {
        header.push_str(&format!("; {}={}", CLIENT_MAX_WINDOW_BITS, bits));
    }
    if let Some(bits) = extensions.server_max_window_bits {
        header.push_str(&format!("; {}={}", SERVER_MAX_WINDOW_BITS, bits));
    }
    header
}

/// The offer a client puts in its handshake request when it wants
/// compression.
pub(crate) fn client_offer() -> String {
    format!("{}; {}", PERMESSAGE_DEFLATE, CLIENT_MAX_WINDOW_BITS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain_offer() {
        let ext = parse_extensions("permessage-deflate").unwrap();
        assert_eq!(ext, Extensions::default());
    }

    #[test]
    fn test_parse_offer_with_params() {
        let ext =
            parse_extensions("permessage-deflate; client_max_window_bits; client_no_context_takeover")
                .unwrap();
        assert!(ext.client_no_context_takeover);
        assert_eq!(ext.client_max_window_bits, Some(15));
        assert_eq!(ext.server_max_window_bits, None);
    }

    #[test]
    fn test_parse_window_bits_value() {
        let ext = parse_extensions("permessage-deflate; server_max_window_bits=12").unwrap();
        assert_eq!(ext.server_max_window_bits, Some(12));
    }

    #[test]
    fn test_parse_takes_first_deflate_offer() {
        let header = "x-webkit-deflate-frame, permessage-deflate; client_no_context_takeover, \
                      permessage-deflate; server_max_window_bits=10";
        let ext = parse_extensions(header).unwrap();
        assert!(ext.client_no_context_takeover);
        assert_eq!(ext.server_max_window_bits, None);
    }

    #[test]
    fn test_parse_unknown_extension() {
        assert!(parse_extensions("x-custom-extension; param=1").is_none());
        assert!(parse_extensions("").is_none());
    }

    #[test]
    fn test_negotiate_minimal_offer() {
        let response = negotiate_extensions(&Extensions::default());
        assert!(response.server_no_context_takeover);
        assert!(!response.client_no_context_takeover);
        assert_eq!(response.client_max_window_bits, None);
        assert_eq!(
            format_extension_header(&response),
            "permessage-deflate; server_no_context_takeover"
        );
    }

    #[test]
    fn test_negotiate_full_offer() {
        let offer = parse_extensions("permessage-deflate; client_no_context_takeover; client_max_window_bits=10")
            .unwrap();
        let response = negotiate_extensions(&offer);
        assert!(response.client_no_context_takeover);
        assert_eq!(response.client_max_window_bits, Some(15));
        assert_eq!(
            format_extension_header(&response),
            "permessage-deflate; server_no_context_takeover; client_no_context_takeover; client_max_window_bits=15"
        );
    }

    #[test]
    fn test_client_offer_shape() {
        assert_eq!(client_offer(), "permessage-deflate; client_max_window_bits");
    }
}
