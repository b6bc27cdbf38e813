//! Capturing child process output while logging it line by line.

use std::io::{BufRead, BufReader, Read};

/// Type of output stream for logging purposes.
#[derive(Clone, Copy)]
pub(super) enum StreamType {
    Stdout,
    Stderr,
}

impl std::fmt::Display for StreamType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stdout => f.write_str("stdout"),
            Self::Stderr => f.write_str("stderr"),
        }
    }
}

/// Extracts a human-readable message from a thread panic.
pub(super) fn panic_message(err: &(dyn std::any::Any + Send)) -> &str {
    err.downcast_ref::<&str>()
        .copied()
        .or_else(|| err.downcast_ref::<String>().map(|s| s.as_str()))
        .unwrap_or("unknown panic")
}

/// Reads a pipe to completion, returning every byte read.
///
/// Each line is logged at TRACE level as it arrives, so a long-running
/// bootstrap can be followed with `--log-level trace`. An I/O error stops
/// reading; whatever was captured so far is returned and the command's
/// success is still decided by its exit status.
pub(super) fn capture_pipe<R: Read>(pipe: Option<R>, stream_type: StreamType) -> Vec<u8> {
    let Some(pipe) = pipe else {
        tracing::error!(stream = %stream_type, "pipe was not captured, no output available");
        return Vec::new();
    };

    let mut reader = BufReader::new(pipe);
    let mut captured = Vec::new();
    let mut line_buf = Vec::new();

    loop {
        line_buf.clear();
        match reader.read_until(b'\n', &mut line_buf) {
            Ok(0) => break,
            Ok(_) => {
                let line = line_buf.strip_suffix(b"\n").unwrap_or(&line_buf);
                let text = String::from_utf8_lossy(line);
                tracing::trace!(stream = %stream_type, "{}", text.trim_end_matches('\r'));
                captured.extend_from_slice(&line_buf);
            }
            Err(e) => {
                tracing::error!(stream = %stream_type, error = %e, "I/O error, stopping read");
                break;
            }
        }
    }

    captured
}
