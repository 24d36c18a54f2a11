use std::ffi::OsString;

use crate::process::Signal;

/// Errors that can occur on bridge resources.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The child process could not be started.
    #[error("failed to spawn {program:?}: {source}")]
    Spawn {
        program: OsString,
        source: std::io::Error,
    },

    /// A standard stream of the child was not piped.
    #[error("child process has no piped {0}")]
    MissingPipe(&'static str),

    /// Delivering a signal to the child failed.
    #[error("failed to deliver {signal} to process {pid}: {source}")]
    Signal {
        signal: Signal,
        pid: u32,
        source: std::io::Error,
    },

    /// The child has already been reaped; its pid may belong to another process.
    #[error("process {pid} has already exited")]
    Exited { pid: u32 },

    /// The WebSocket protocol layer reported an error.
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// The peer closed the connection.
    #[error("connection closed by peer (code {code}{})", format_reason(.reason))]
    Closed { code: u16, reason: String },

    /// A text message payload was not valid UTF-8.
    #[error("text message payload is not valid UTF-8: {0}")]
    InvalidText(#[from] std::string::FromUtf8Error),

    /// An I/O error occurred on a resource stream.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),
}

fn format_reason(reason: &str) -> String {
    if reason.is_empty() {
        String::new()
    } else {
        format!(": {reason}")
    }
}

pub type Result<T> = std::result::Result<T, TransportError>;
