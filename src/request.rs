use crate::error::Error;
use crate::extensions::client_offer;
use std::collections::HashMap;
use tokio::io::AsyncBufReadExt;
use url::Url;

const MAX_HEAD_SIZE: usize = 16 * 1024;

/// Headers the caller may not override on an outgoing handshake request.
const RESERVED_HEADERS: &[&str] = &[
    "host",
    "upgrade",
    "connection",
    "sec-websocket-key",
    "sec-websocket-version",
    "sec-websocket-protocol",
    "sec-websocket-extensions",
];

/// Reads request or response head bytes up to and including the blank line,
/// leaving anything past it (the peer's first frame) in the buffered reader.
pub(crate) async fn read_http_head<R: AsyncBufReadExt + Unpin>(
    reader: &mut R,
) -> Result<Vec<u8>, Error> {
    let mut head = String::new();
    loop {
        let mut line = String::new();
        let read = reader.read_line(&mut line).await?;
        if read == 0 {
            return Err(Error::IncompleteHttpMessage);
        }
        head.push_str(&line);
        if head.len() > MAX_HEAD_SIZE {
            return Err(Error::BadHandshake {
                reason: "HTTP head exceeds 16KB".to_string(),
                response: None,
            });
        }
        if line == "\r\n" || line == "\n" {
            return Ok(head.into_bytes());
        }
    }
}

fn headers_to_map(headers: &[httparse::Header<'_>]) -> Result<HashMap<String, String>, Error> {
    let mut map: HashMap<String, String> = HashMap::new();
    for header in headers {
        let name = header.name.to_lowercase();
        let value = std::str::from_utf8(header.value)
            .map_err(|_| Error::HttpParseError {
                source: httparse::Error::HeaderValue,
            })?
            .trim()
            .to_string();
        match map.get_mut(&name) {
            // Repeated headers are equivalent to one comma-joined header.
            Some(existing) => {
                existing.push_str(", ");
                existing.push_str(&value);
            }
            None => {
                map.insert(name, value);
            }
        }
    }
    Ok(map)
}

#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: String,
    pub uri: String,
    pub headers: HashMap<String, String>,
}

impl HttpRequest {
    pub(crate) fn parse(head: &[u8]) -> Result<Self, Error> {
        let mut header_storage = [httparse::EMPTY_HEADER; 64];
        let mut request = httparse::Request::new(&mut header_storage);
        match request.parse(head)? {
            httparse::Status::Complete(_) => {}
            httparse::Status::Partial => return Err(Error::IncompleteHttpMessage),
        }
        Ok(Self {
            method: request.method.unwrap_or_default().to_string(),
            uri: request.path.unwrap_or_default().to_string(),
            headers: headers_to_map(request.headers)?,
        })
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_lowercase()).map(String::as_str)
    }
}

#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub reason: String,
    pub headers: HashMap<String, String>,
}

impl HttpResponse {
    pub(crate) fn parse(head: &[u8]) -> Result<Self, Error> {
        let mut header_storage = [httparse::EMPTY_HEADER; 64];
        let mut response = httparse::Response::new(&mut header_storage);
        match response.parse(head)? {
            httparse::Status::Complete(_) => {}
            httparse::Status::Partial => return Err(Error::IncompleteHttpMessage),
        }
        Ok(Self {
            status: response.code.unwrap_or_default(),
            reason: response.reason.unwrap_or_default().to_string(),
            headers: headers_to_map(response.headers)?,
        })
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_lowercase()).map(String::as_str)
    }
}

/// Whether a comma-separated header value contains `token`, ignoring case.
pub(crate) fn header_contains_token(value: &str, token: &str) -> bool {
    value
        .split(',')
        .any(|candidate| candidate.trim().eq_ignore_ascii_case(token))
}

/// Builds the client handshake request for `ws_url`.
///
/// Returns the request text, the `host:port` dial target, the bare host for
/// TLS certificate validation, and whether the scheme asks for TLS.
pub(crate) fn construct_http_request(
    ws_url: &str,
    key: &str,
    subprotocols: &[String],
    offer_compression: bool,
    extra_headers: &[(String, String)],
) -> Result<(String, String, String, bool), Error> {
    let parsed_url = Url::parse(ws_url)?;

    let (default_port, use_tls) = match parsed_url.scheme() {
        "ws" => (80, false),
        "wss" => (443, true),
        _ => return Err(Error::InvalidSchemeURL),
    };

    let host = parsed_url.host_str().ok_or(Error::URLNoHost)?;
    let port = parsed_url.port().unwrap_or(default_port);

    // The Host field carries the port only when the URL spelled one out.
    let request_host_field = match parsed_url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => String::from(host),
    };

    let host_with_port = format!("{}:{}", host, port);

    let request_path = match parsed_url.query() {
        Some(query) => format!("{}?{}", parsed_url.path(), query),
        None => parsed_url.path().to_string(),
    };

    let mut request = format!(
        "GET {} HTTP/1.1\r\nHost: {}\r\nConnection: Upgrade\r\nUpgrade: websocket\r\nSec-WebSocket-Key: {}\r\nSec-WebSocket-Version: 13\r\n",
        request_path, request_host_field, key,
    );

    if !subprotocols.is_empty() {
        request.push_str(&format!(
            "Sec-WebSocket-Protocol: {}\r\n",
            subprotocols.join(", ")
        ));
    }

    if offer_compression {
        request.push_str(&format!("Sec-WebSocket-Extensions: {}\r\n", client_offer()));
    }

    for (name, value) in extra_headers {
        if RESERVED_HEADERS.contains(&name.to_lowercase().as_str()) {
            continue;
        }
        request.push_str(&format!("{}: {}\r\n", name, value));
    }

    request.push_str("\r\n");

    Ok((request, host_with_port, String::from(host), use_tls))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_construct_http_request_valid() {
        let (request, host_with_port, domain, use_tls) =
            construct_http_request("ws://localhost:8080", "dGhlIHNhbXBsZSBub25jZQ==", &[], false, &[])
                .unwrap();
        assert_eq!(host_with_port, "localhost:8080");
        assert_eq!(domain, "localhost");
        assert!(!use_tls);
        assert!(request.starts_with("GET / HTTP/1.1\r\n"));
        assert!(request.contains("Host: localhost:8080\r\n"));
        assert!(request.contains("Upgrade: websocket\r\n"));
        assert!(request.contains("Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n"));
        assert!(request.contains("Sec-WebSocket-Version: 13\r\n"));
        assert!(request.ends_with("\r\n\r\n"));
    }

    #[test]
    fn test_construct_http_request_wss_defaults() {
        let (request, host_with_port, _, use_tls) =
            construct_http_request("wss://example.com/chat?room=1", "a2V5a2V5a2V5a2V5a2V5a2U=", &[], false, &[])
                .unwrap();
        assert_eq!(host_with_port, "example.com:443");
        assert!(use_tls);
        assert!(request.starts_with("GET /chat?room=1 HTTP/1.1\r\n"));
        assert!(request.contains("Host: example.com\r\n"));
    }

    #[test]
    fn test_construct_http_request_protocols_and_extensions() {
        let protocols = vec!["graphql-ws".to_string(), "chat".to_string()];
        let (request, ..) =
            construct_http_request("ws://localhost:9001", "a2V5a2V5a2V5a2V5a2V5a2U=", &protocols, true, &[])
                .unwrap();
        assert!(request.contains("Sec-WebSocket-Protocol: graphql-ws, chat\r\n"));
        assert!(request.contains("Sec-WebSocket-Extensions: permessage-deflate; client_max_window_bits\r\n"));
    }

    #[test]
    fn test_construct_http_request_extra_headers() {
        let extra = vec![
            ("Authorization".to_string(), "Bearer token".to_string()),
            ("Upgrade".to_string(), "h2c".to_string()),
        ];
        let (request, ..) =
            construct_http_request("ws://localhost:9001", "a2V5a2V5a2V5a2V5a2V5a2U=", &[], false, &extra)
                .unwrap();
        assert!(request.contains("Authorization: Bearer token\r\n"));
        // Mandatory fields cannot be overridden.
        assert!(request.contains("Upgrade: websocket\r\n"));
        assert!(!request.contains("Upgrade: h2c\r\n"));
    }

    #[test]
    fn test_construct_http_request_invalid_scheme() {
        assert!(matches!(
            construct_http_request("ftp://localhost:8080", "key", &[], false, &[]),
            Err(Error::InvalidSchemeURL)
        ));
    }

    #[test]
    fn test_construct_http_request_no_host() {
        assert!(construct_http_request("ws://:8080", "key", &[], false, &[]).is_err());
    }

    #[test]
    fn test_parse_request() {
        let head = b"GET /chat HTTP/1.1\r\nHost: server.example.com\r\nUpgrade: websocket\r\nConnection: Upgrade\r\nSec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\nSec-WebSocket-Version: 13\r\n\r\n";
        let request = HttpRequest::parse(head).unwrap();
        assert_eq!(request.method, "GET");
        assert_eq!(request.uri, "/chat");
        assert_eq!(request.header("host"), Some("server.example.com"));
        assert_eq!(request.header("Sec-WebSocket-Version"), Some("13"));
        assert_eq!(request.header("missing"), None);
    }

    #[test]
    fn test_parse_request_joins_repeated_headers() {
        let head = b"GET / HTTP/1.1\r\nHost: a\r\nSec-WebSocket-Extensions: permessage-deflate\r\nSec-WebSocket-Extensions: x-custom\r\n\r\n";
        let request = HttpRequest::parse(head).unwrap();
        assert_eq!(
            request.header("sec-websocket-extensions"),
            Some("permessage-deflate, x-custom")
        );
    }

    #[test]
    fn test_parse_response() {
        let head = b"HTTP/1.1 101 Switching Protocols\r\nUpgrade: websocket\r\nConnection: Upgrade\r\nSec-WebSocket-Accept: s3pPLMBiTxaQ9kYGzzhZRbK+xOo=\r\n\r\n";
        let response = HttpResponse::parse(head).unwrap();
        assert_eq!(response.status, 101);
        assert_eq!(response.reason, "Switching Protocols");
        assert_eq!(
            response.header("sec-websocket-accept"),
            Some("s3pPLMBiTxaQ9kYGzzhZRbK+xOo=")
        );
    }

    #[test]
    fn test_parse_partial_head() {
        assert!(matches!(
            HttpRequest::parse(b"GET / HTTP/1.1\r\nHost: a\r\n"),
            Err(Error::IncompleteHttpMessage)
        ));
    }

    #[test]
    fn test_header_contains_token() {
        assert!(header_contains_token("keep-alive, Upgrade", "upgrade"));
        assert!(header_contains_token("Upgrade", "upgrade"));
        assert!(!header_contains_token("keep-alive", "upgrade"));
    }
}
