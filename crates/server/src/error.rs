use thiserror::Error;

/// Server-level errors
///
/// Per-session failures (transport errors, malformed packets) never surface
/// here; they close the offending session only.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind port {port}: {source}")]
    Bind {
        port: u16,
        #[source]
        source: std::io::Error,
    },

    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),
}
