//! Just enough HTTP/1.0 over a unix socket to talk to snapd.
//!
//! Requests are sent as HTTP/1.0 so the server closes the connection after
//! the response and never uses chunked transfer encoding; the body is
//! everything after the header block.

use std::io::{Read, Write};
use std::os::unix::net::UnixStream;
use std::time::Duration;

use camino::Utf8Path;

use crate::error::ConciergeError;

/// Sends `GET {target}` and returns the raw response body.
pub(super) fn get(
    socket: &Utf8Path,
    target: &str,
    timeout: Duration,
) -> Result<Vec<u8>, ConciergeError> {
    let mut stream = UnixStream::connect(socket).map_err(|e| {
        ConciergeError::Snapd(format!("failed to connect to snapd at {}: {}", socket, e))
    })?;
    stream
        .set_read_timeout(Some(timeout))
        .and_then(|()| stream.set_write_timeout(Some(timeout)))
        .map_err(|e| ConciergeError::Snapd(format!("failed to configure socket: {}", e)))?;

    let request = format!(
        "GET {} HTTP/1.0\r\nHost: localhost\r\nAccept: application/json\r\nUser-Agent: concierge\r\n\r\n",
        target
    );
    stream
        .write_all(request.as_bytes())
        .map_err(|e| ConciergeError::Snapd(format!("failed to execute request: {}", e)))?;

    let mut raw = Vec::new();
    stream
        .read_to_end(&mut raw)
        .map_err(|e| ConciergeError::Snapd(format!("failed to read response body: {}", e)))?;

    split_body(&raw).map(<[u8]>::to_vec)
}

/// Returns the body of a raw HTTP response.
fn split_body(raw: &[u8]) -> Result<&[u8], ConciergeError> {
    let end = raw
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .ok_or_else(|| ConciergeError::Snapd("malformed response: no header terminator".into()))?;

    let head = String::from_utf8_lossy(&raw[..end]);
    if !head.starts_with("HTTP/") {
        return Err(ConciergeError::Snapd(format!(
            "malformed response status line: {}",
            head.lines().next().unwrap_or_default()
        )));
    }
    let chunked = head.lines().any(|line| {
        let line = line.to_ascii_lowercase();
        line.starts_with("transfer-encoding:") && line.contains("chunked")
    });
    if chunked {
        return Err(ConciergeError::Snapd(
            "unsupported chunked response to an HTTP/1.0 request".into(),
        ));
    }

    Ok(&raw[end + 4..])
}
