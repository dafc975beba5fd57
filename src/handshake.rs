use crate::config::{ClientConfig, ServerConfig};
use crate::connection::WSConnection;
use crate::error::Error;
use crate::extensions::{format_extension_header, negotiate_extensions, parse_extensions};
use crate::request::{
    construct_http_request, header_contains_token, read_http_head, HttpRequest, HttpResponse,
};
use crate::stream::SocketStream;
use crate::utils::{generate_websocket_accept_value, generate_websocket_key};
use crate::write::Role;
use log::{debug, warn};
use pki_types::ServerName;
use rustls::{ClientConfig as RustlsClientConfig, RootCertStore};
use std::sync::Arc;
use tokio::io::{split, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, WriteHalf};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::{TlsConnector, TlsStream};
use url::Url;

/// Dials `url` (`ws://` or `wss://`) and performs the client handshake.
///
/// Returns the connection together with the server's HTTP response, so
/// callers can inspect negotiated headers.
pub async fn connect_async(url: &str) -> Result<(WSConnection<SocketStream>, HttpResponse), Error> {
    connect_async_with_config(url, None).await
}

pub async fn connect_async_with_config(
    url: &str,
    config: Option<ClientConfig>,
) -> Result<(WSConnection<SocketStream>, HttpResponse), Error> {
    let config = config.unwrap_or_default();
    let key = generate_websocket_key();
    let (request, host_with_port, domain, use_tls) = construct_http_request(
        url,
        &key,
        &config.subprotocols,
        config.enable_compression,
        &config.extra_headers,
    )?;

    let tcp = TcpStream::connect(&host_with_port).await?;
    let stream = if use_tls {
        let connector = tls_connector(config.ca_file.as_deref())?;
        let server_name = ServerName::try_from(domain)?;
        let tls = connector.connect(server_name, tcp).await?;
        SocketStream::Secure(TlsStream::from(tls))
    } else {
        SocketStream::Plain(tcp)
    };

    client_handshake(stream, request, key, config).await
}

/// Performs the client handshake over a caller-supplied duplex stream,
/// for transports this crate does not dial itself (proxies, in-memory
/// pipes, already-established TLS sessions).
pub async fn connect_async_with_stream<S>(
    url: &str,
    stream: S,
    config: Option<ClientConfig>,
) -> Result<(WSConnection<S>, HttpResponse), Error>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let config = config.unwrap_or_default();
    let key = generate_websocket_key();
    let (request, ..) = construct_http_request(
        url,
        &key,
        &config.subprotocols,
        config.enable_compression,
        &config.extra_headers,
    )?;
    client_handshake(stream, request, key, config).await
}

async fn client_handshake<S>(
    stream: S,
    request: String,
    key: String,
    config: ClientConfig,
) -> Result<(WSConnection<S>, HttpResponse), Error>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (read_half, mut write_half) = split(stream);
    let mut buf_reader = BufReader::new(read_half);

    let exchange = async {
        write_half.write_all(request.as_bytes()).await?;
        let head = read_http_head(&mut buf_reader).await?;
        HttpResponse::parse(&head)
    };
    let response = match config.handshake_timeout {
        Some(deadline) => timeout(deadline, exchange).await??,
        None => exchange.await?,
    };

    let (subprotocol, compression) = validate_server_response(&response, &key, &config)?;
    debug!(
        "client handshake done: subprotocol {:?}, compression {}",
        subprotocol, compression
    );

    let mut connection =
        WSConnection::from_parts(buf_reader, write_half, Role::Client, config.buffer_pool.clone());
    connection.set_subprotocol(subprotocol);
    connection.set_compression(compression);
    connection.set_read_limit(config.read_limit);
    connection.set_compression_level(config.compression_level)?;
    connection.max_frame_size = config.max_frame_size;
    Ok((connection, response))
}

fn validate_server_response(
    response: &HttpResponse,
    key: &str,
    config: &ClientConfig,
) -> Result<(String, bool), Error> {
    let fail = |reason: String| Error::BadHandshake {
        reason,
        response: Some(Box::new(response.clone())),
    };

    if response.status != 101 {
        return Err(fail(format!(
            "expected status 101, got {} {}",
            response.status, response.reason
        )));
    }
    let upgrade_ok = response
        .header("upgrade")
        .map(|value| value.eq_ignore_ascii_case("websocket"))
        .unwrap_or(false);
    if !upgrade_ok {
        return Err(fail("missing Upgrade: websocket header".to_string()));
    }
    let connection_ok = response
        .header("connection")
        .map(|value| header_contains_token(value, "upgrade"))
        .unwrap_or(false);
    if !connection_ok {
        return Err(fail("missing Connection: Upgrade header".to_string()));
    }
    let expected_accept = generate_websocket_accept_value(key);
    if response.header("sec-websocket-accept") != Some(expected_accept.as_str()) {
        return Err(fail("invalid Sec-WebSocket-Accept value".to_string()));
    }

    let subprotocol = match response.header("sec-websocket-protocol") {
        Some(protocol) if !protocol.is_empty() => {
            if !config.subprotocols.iter().any(|p| p == protocol) {
                return Err(fail(format!(
                    "server selected unrequested subprotocol {protocol:?}"
                )));
            }
            protocol.to_string()
        }
        _ => String::new(),
    };

    let compression = config.enable_compression
        && response
            .header("sec-websocket-extensions")
            .and_then(parse_extensions)
            .is_some();

    Ok((subprotocol, compression))
}

fn tls_connector(ca_file: Option<&str>) -> Result<TlsConnector, Error> {
    let mut roots = RootCertStore::empty();
    match ca_file {
        Some(path) => {
            let file = std::fs::File::open(path)?;
            let mut reader = std::io::BufReader::new(file);
            for cert in rustls_pemfile::certs(&mut reader) {
                roots.add(cert?)?;
            }
        }
        None => roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned()),
    }
    let tls_config = RustlsClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth();
    Ok(TlsConnector::from(Arc::new(tls_config)))
}

/// Answers a client's upgrade request on `stream` and returns the
/// negotiated connection.
pub async fn accept_async<S>(stream: S) -> Result<WSConnection<S>, Error>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    accept_async_with_config(stream, None).await
}

pub async fn accept_async_with_config<S>(
    stream: S,
    config: Option<ServerConfig>,
) -> Result<WSConnection<S>, Error>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let config = config.unwrap_or_default();
    let (read_half, mut write_half) = split(stream);
    let mut buf_reader = BufReader::new(read_half);

    let head = {
        let read = read_http_head(&mut buf_reader);
        match config.handshake_timeout {
            Some(deadline) => timeout(deadline, read).await??,
            None => read.await?,
        }
    };
    let request = match HttpRequest::parse(&head) {
        Ok(request) => request,
        Err(_) => {
            return Err(reject(&mut write_half, &config, 400, "malformed handshake request").await)
        }
    };

    if !request.method.eq_ignore_ascii_case("GET") {
        return Err(reject(&mut write_half, &config, 405, "handshake method must be GET").await);
    }
    let upgrade_ok = request
        .header("upgrade")
        .map(|value| header_contains_token(value, "websocket"))
        .unwrap_or(false);
    let connection_ok = request
        .header("connection")
        .map(|value| header_contains_token(value, "upgrade"))
        .unwrap_or(false);
    if !upgrade_ok || !connection_ok {
        return Err(reject(&mut write_half, &config, 400, "not a websocket upgrade request").await);
    }
    if request.header("sec-websocket-version") != Some("13") {
        return Err(reject(&mut write_half, &config, 400, "unsupported websocket version").await);
    }
    let origin_allowed = match &config.check_origin {
        Some(predicate) => predicate(&request),
        None => default_origin_allowed(&request),
    };
    if !origin_allowed {
        return Err(reject(&mut write_half, &config, 403, "origin not allowed").await);
    }
    let key = request.header("sec-websocket-key").unwrap_or_default();
    if key.is_empty() {
        return Err(reject(&mut write_half, &config, 400, "missing Sec-WebSocket-Key").await);
    }

    let subprotocol = select_subprotocol(&request, &config.subprotocols);
    let extensions = if config.enable_compression {
        request
            .header("sec-websocket-extensions")
            .and_then(parse_extensions)
            .map(|offer| negotiate_extensions(&offer))
    } else {
        None
    };

    let mut response = format!(
        "HTTP/1.1 101 Switching Protocols\r\nUpgrade: websocket\r\nConnection: Upgrade\r\nSec-WebSocket-Accept: {}\r\n",
        generate_websocket_accept_value(key)
    );
    if let Some(protocol) = &subprotocol {
        response.push_str(&format!("Sec-WebSocket-Protocol: {}\r\n", protocol));
    }
    if let Some(extensions) = &extensions {
        response.push_str(&format!(
            "Sec-WebSocket-Extensions: {}\r\n",
            format_extension_header(extensions)
        ));
    }
    for (name, value) in &config.extra_headers {
        response.push_str(&format!("{}: {}\r\n", name, value));
    }
    response.push_str("\r\n");

    write_half.write_all(response.as_bytes()).await?;
    write_half.flush().await?;
    debug!(
        "server handshake done: subprotocol {:?}, compression {}",
        subprotocol,
        extensions.is_some()
    );

    let mut connection =
        WSConnection::from_parts(buf_reader, write_half, Role::Server, config.buffer_pool.clone());
    connection.set_subprotocol(subprotocol.unwrap_or_default());
    connection.set_compression(extensions.is_some());
    connection.set_read_limit(config.read_limit);
    connection.set_compression_level(config.compression_level)?;
    connection.max_frame_size = config.max_frame_size;
    Ok(connection)
}

/// Writes the handshake-rejection response and produces the error the
/// caller returns. The response body comes from the configured responder,
/// a bare reason line by default.
async fn reject<S: AsyncWrite>(
    write_half: &mut WriteHalf<S>,
    config: &ServerConfig,
    status: u16,
    reason: &str,
) -> Error {
    let body = match &config.error_responder {
        Some(responder) => responder(status, reason),
        None => format!("{}\n", reason),
    };
    let response = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: text/plain; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        status_phrase(status),
        body.len(),
        body
    );
    let _ = write_half.write_all(response.as_bytes()).await;
    warn!("handshake rejected: {} {}", status, reason);
    Error::BadHandshake {
        reason: reason.to_string(),
        response: None,
    }
}

fn status_phrase(status: u16) -> &'static str {
    match status {
        400 => "Bad Request",
        403 => "Forbidden",
        405 => "Method Not Allowed",
        500 => "Internal Server Error",
        _ => "Error",
    }
}

/// The default origin policy: no `Origin` header passes, otherwise its
/// authority must match the request's `Host`.
fn default_origin_allowed(request: &HttpRequest) -> bool {
    let origin = match request.header("origin") {
        Some(origin) if !origin.is_empty() => origin,
        _ => return true,
    };
    let host = match request.header("host") {
        Some(host) => host,
        None => return false,
    };
    match Url::parse(origin) {
        Ok(url) => {
            let origin_host = match url.host_str() {
                Some(origin_host) => origin_host,
                None => return false,
            };
            let authority = match url.port() {
                Some(port) => format!("{}:{}", origin_host, port),
                None => origin_host.to_string(),
            };
            authority.eq_ignore_ascii_case(host)
        }
        Err(_) => false,
    }
}

/// First supported subprotocol, in server preference order, that the
/// client offered.
fn select_subprotocol(request: &HttpRequest, supported: &[String]) -> Option<String> {
    let offered = request.header("sec-websocket-protocol")?;
    let offered: Vec<&str> = offered.split(',').map(str::trim).collect();
    supported
        .iter()
        .find(|candidate| {
            offered
                .iter()
                .any(|offer| offer.eq_ignore_ascii_case(candidate))
        })
        .cloned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn request_with(headers: &[(&str, &str)]) -> HttpRequest {
        HttpRequest {
            method: "GET".to_string(),
            uri: "/".to_string(),
            headers: headers
                .iter()
                .map(|(name, value)| (name.to_string(), value.to_string()))
                .collect::<HashMap<_, _>>(),
        }
    }

    #[test]
    fn test_default_origin_allowed() {
        assert!(default_origin_allowed(&request_with(&[("host", "a.example.com")])));
        assert!(default_origin_allowed(&request_with(&[
            ("host", "a.example.com"),
            ("origin", "https://a.example.com"),
        ])));
        assert!(default_origin_allowed(&request_with(&[
            ("host", "a.example.com:8443"),
            ("origin", "https://A.EXAMPLE.COM:8443"),
        ])));
        assert!(!default_origin_allowed(&request_with(&[
            ("host", "a.example.com"),
            ("origin", "https://evil.example.com"),
        ])));
        assert!(!default_origin_allowed(&request_with(&[
            ("host", "a.example.com"),
            ("origin", "not a url"),
        ])));
    }

    #[test]
    fn test_select_subprotocol_server_preference() {
        let supported = vec!["graphql-ws".to_string(), "chat".to_string()];
        let request = request_with(&[("sec-websocket-protocol", "chat, graphql-ws")]);
        assert_eq!(
            select_subprotocol(&request, &supported),
            Some("graphql-ws".to_string())
        );

        let request = request_with(&[("sec-websocket-protocol", "chat")]);
        assert_eq!(select_subprotocol(&request, &supported), Some("chat".to_string()));

        let request = request_with(&[("sec-websocket-protocol", "mqtt")]);
        assert_eq!(select_subprotocol(&request, &supported), None);

        let request = request_with(&[]);
        assert_eq!(select_subprotocol(&request, &supported), None);
    }

    #[test]
    fn test_validate_server_response_accept_mismatch() {
        let mut headers = HashMap::new();
        headers.insert("upgrade".to_string(), "websocket".to_string());
        headers.insert("connection".to_string(), "Upgrade".to_string());
        headers.insert(
            "sec-websocket-accept".to_string(),
            "bogus accept value".to_string(),
        );
        let response = HttpResponse {
            status: 101,
            reason: "Switching Protocols".to_string(),
            headers,
        };
        let err = validate_server_response(
            &response,
            "dGhlIHNhbXBsZSBub25jZQ==",
            &ClientConfig::default(),
        )
        .unwrap_err();
        match err {
            Error::BadHandshake { response, .. } => assert!(response.is_some()),
            other => panic!("expected bad handshake, got {other:?}"),
        }
    }
}
