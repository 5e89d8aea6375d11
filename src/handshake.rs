use crate::config::EndpointConfig;
use crate::error::{Error, HandshakeError};
use crate::timer::Deadline;
use crate::transport::{Interest, Transport};
use base64::prelude::*;
use sha1::{Digest, Sha1};
use std::collections::HashMap;
use std::io::{Read, Write};
use std::time::Duration;

const WEBSOCKET_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// A parsed HTTP/1.1 request line plus headers.
pub struct Request {
    pub method: String,
    pub uri: String,
    pub version: String,
    pub headers: HashMap<String, String>,
}

/// Parse a captured request buffer into method/URI/version/headers.
/// `data` must already end in `\r\n\r\n`.
fn parse_request(data: &str) -> Result<Request, HandshakeError> {
    let body = data
        .strip_suffix("\r\n\r\n")
        .ok_or(HandshakeError::BadRequest)?;

    let mut lines = body.split("\r\n");
    let request_line = lines.next().ok_or(HandshakeError::BadRequest)?;

    let mut parts = request_line.split(' ');
    let method = parts.next().ok_or(HandshakeError::BadRequest)?;
    let uri = parts.next().ok_or(HandshakeError::BadRequest)?;
    let version_token = parts.next().ok_or(HandshakeError::BadRequest)?;
    if parts.next().is_some() {
        return Err(HandshakeError::BadRequest);
    }

    let version = version_token
        .strip_prefix("HTTP/")
        .ok_or(HandshakeError::BadRequest)?;
    let (major, minor) = version.split_once('.').ok_or(HandshakeError::BadRequest)?;
    if major.len() != 1
        || minor.len() != 1
        || !major.chars().all(|c| c.is_ascii_digit())
        || !minor.chars().all(|c| c.is_ascii_digit())
    {
        return Err(HandshakeError::BadRequest);
    }

    let mut headers = HashMap::new();
    for line in lines {
        let (name, value) = line.split_once(": ").ok_or(HandshakeError::BadRequest)?;
        if name.is_empty()
            || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
        {
            return Err(HandshakeError::BadRequest);
        }
        headers.insert(name.to_string(), value.to_string());
    }

    Ok(Request {
        method: method.to_string(),
        uri: uri.to_string(),
        version: version.to_string(),
        headers,
    })
}

/// Base64(SHA-1(key + magic GUID)).
pub fn accept_key(client_key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(client_key.as_bytes());
    hasher.update(WEBSOCKET_GUID.as_bytes());
    BASE64_STANDARD.encode(hasher.finalize())
}

/// Read the handshake request off `transport`, accumulating into a buffer
/// until CRLF-CRLF is found or `max_handshake_bytes` is reached. Always
/// accumulates across reads rather than overwriting the buffer.
fn read_request_buffer(
    transport: &mut dyn Transport,
    max_bytes: usize,
    deadline: &Deadline,
) -> Result<String, HandshakeError> {
    let mut data = Vec::new();
    let mut chunk = [0u8; 1024];

    loop {
        if data.len() >= max_bytes {
            return Err(HandshakeError::BadRequest);
        }

        let left = match deadline.left() {
            Some(left) if left.is_zero() => return Err(HandshakeError::RequestTimeout),
            Some(left) => left,
            None => Duration::from_secs(3600),
        };

        let readiness = transport
            .poll_ready(Interest::READABLE, left)
            .map_err(|_| HandshakeError::RequestTimeout)?;
        if !readiness.readable {
            if deadline.timed_out() {
                return Err(HandshakeError::RequestTimeout);
            }
            continue;
        }

        let n = transport.read(&mut chunk).map_err(|_| HandshakeError::BadRequest)?;
        if n == 0 {
            return Err(HandshakeError::BadRequest);
        }
        data.extend_from_slice(&chunk[..n]);

        if data.windows(4).any(|w| w == b"\r\n\r\n") {
            // Trim anything past the terminator: a pipelined first frame
            // would otherwise be swallowed into the handshake buffer.
            if let Some(pos) = data.windows(4).position(|w| w == b"\r\n\r\n") {
                data.truncate(pos + 4);
            }
            break;
        }
    }

    String::from_utf8(data).map_err(|_| HandshakeError::BadRequest)
}

/// Perform the server-side HTTP/1.1 Upgrade handshake.
///
/// On success, writes the `101` response and returns the request's URI and
/// headers (the caller has no further use for method/version). On failure,
/// writes the matching HTTP error response (best-effort) and returns the
/// error. Either way the connection is expected to be closed by the caller:
/// after emitting an error response, the original error is surfaced to the
/// caller of `accept`.
pub fn perform_handshake(
    transport: &mut dyn Transport,
    config: &EndpointConfig,
    timeout: Option<Duration>,
    validate: Option<&(dyn Fn(&str, &HashMap<String, String>) -> bool + Send + Sync)>,
) -> Result<(String, HashMap<String, String>), Error> {
    let deadline = Deadline::new(Some(timeout.unwrap_or(config.handshake_timeout)));

    let outcome = (|| -> Result<(String, HashMap<String, String>), HandshakeError> {
        // Non-blocking for the duration of the handshake read loop, so the
        // deadline can bound each individual read.
        transport
            .set_nonblocking(true)
            .map_err(|_| HandshakeError::BadRequest)?;

        let buffer = read_request_buffer(transport, config.max_handshake_bytes, &deadline)?;
        let request = parse_request(&buffer)?;

        if request.method != "GET" {
            return Err(HandshakeError::MethodNotAllowed);
        }
        if request.version != "1.1" {
            return Err(HandshakeError::UpgradeRequired);
        }
        match request.headers.get("Connection") {
            Some(v) if v.eq_ignore_ascii_case("Upgrade") => {}
            _ => return Err(HandshakeError::UpgradeRequired),
        }
        match request.headers.get("Upgrade") {
            Some(v) if v.eq_ignore_ascii_case("websocket") => {}
            _ => return Err(HandshakeError::BadRequest),
        }
        let key = request
            .headers
            .get("Sec-WebSocket-Key")
            .ok_or(HandshakeError::BadRequest)?;

        if let Some(validate) = validate {
            if !validate(&request.uri, &request.headers) {
                return Err(HandshakeError::BadRequest);
            }
        }

        let accept = accept_key(key);
        let response = format!(
            "HTTP/1.1 101 WebSocket Upgrade\r\n\
             Connection: Upgrade\r\n\
             Upgrade: websocket\r\n\
             Sec-WebSocket-Accept: {accept}\r\n\
             \r\n"
        );
        transport
            .write_all(response.as_bytes())
            .map_err(|_| HandshakeError::BadRequest)?;

        // Back to blocking: frame reads (`decode_frame`) rely on
        // `read_exact` running to completion once the worker's readiness
        // poll has signaled data is available.
        transport
            .set_nonblocking(false)
            .map_err(|_| HandshakeError::BadRequest)?;

        Ok((request.uri, request.headers))
    })();

    match outcome {
        Ok(ok) => Ok(ok),
        Err(handshake_err) => {
            let _ = transport.write_all(handshake_err.to_response().as_bytes());
            Err(Error::Handshake(handshake_err))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accept_key_matches_rfc_6455_test_vector() {
        assert_eq!(
            accept_key("dGhlIHNhbXBsZSBub25jZQ=="),
            "s3pPLMBiTxaQ9kYGzzhZRbK+xOo="
        );
    }

    #[test]
    fn parses_minimal_valid_request() {
        let req = parse_request(
            "GET /chat HTTP/1.1\r\nConnection: Upgrade\r\nUpgrade: websocket\r\n\
             Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\r\n",
        )
        .unwrap();
        assert_eq!(req.method, "GET");
        assert_eq!(req.uri, "/chat");
        assert_eq!(req.version, "1.1");
        assert_eq!(
            req.headers.get("Sec-WebSocket-Key").unwrap(),
            "dGhlIHNhbXBsZSBub25jZQ=="
        );
    }

    #[test]
    fn rejects_request_missing_trailing_blank_line() {
        assert!(matches!(
            parse_request("GET / HTTP/1.1\r\nConnection: Upgrade\r\n"),
            Err(HandshakeError::BadRequest)
        ));
    }

    #[test]
    fn rejects_malformed_request_line() {
        assert!(matches!(
            parse_request("GET /only-two-tokens\r\n\r\n"),
            Err(HandshakeError::BadRequest)
        ));
    }

    #[test]
    fn rejects_malformed_header_name() {
        assert!(matches!(
            parse_request("GET / HTTP/1.1\r\nBad Name: value\r\n\r\n"),
            Err(HandshakeError::BadRequest)
        ));
    }

    #[test]
    fn error_responses_render_exact_status_lines() {
        assert_eq!(
            HandshakeError::BadRequest.to_response(),
            "HTTP/1.1 400 Bad Request\r\n\r\n"
        );
        assert_eq!(
            HandshakeError::UpgradeRequired.to_response(),
            "HTTP/1.1 426 Upgrade Required\r\nConnection: Upgrade\r\nUpgrade: websocket\r\n\r\n"
        );
    }
}
