/// Markers that identify an intentionally aborted read.
///
/// The underlying transports expose no stable cancellation type, so aborted
/// reads are recognized by their error text.
const CANCELLATION_MARKERS: [&str; 3] = ["aborterror", "cancelled", "aborted"];

/// Returns true when an error name or message describes an intentional abort.
///
/// Matching is a case-insensitive substring test against `AbortError`,
/// `cancelled` and `aborted`.
pub fn looks_like_cancellation(text: &str) -> bool {
    let lowered = text.to_ascii_lowercase();
    CANCELLATION_MARKERS
        .iter()
        .any(|marker| lowered.contains(marker))
}

/// Errors surfaced by stream sessions and the session manager.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StreamError {
    /// Invalid client configuration.
    #[error("config error: {0}")]
    Config(String),
    /// Invalid caller input (empty prompt, malformed task id, ...).
    #[error("validation error: {0}")]
    Validation(String),
    /// Server answered with a non-success status.
    #[error("stream request failed with status {status}: {body}")]
    Status { status: u16, body: String },
    /// Server answered successfully but without a readable body.
    #[error("stream response has no readable body")]
    MissingBody,
    /// Connection or body read failed.
    #[error("transport error: {message}")]
    Transport { message: String },
    /// The server reported a failure in-band through an `error` frame.
    #[error("remote error: {message}")]
    Remote { message: String },
    /// An initiate stream ended before any frame carried a task id.
    #[error("no task_id received")]
    NoTaskId,
    /// The read was aborted on purpose.
    #[error("stream read aborted: cancelled by caller")]
    Cancelled,
    /// Internal protocol misuse or invariant violation.
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl StreamError {
    /// Creates a transport-level error.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Creates an in-band remote error.
    pub fn remote(message: impl Into<String>) -> Self {
        Self::Remote {
            message: message.into(),
        }
    }

    pub(crate) fn protocol_msg(message: impl Into<String>) -> Self {
        Self::Protocol(message.into())
    }

    /// Returns true when this error represents an intentional abort rather
    /// than a failure.
    ///
    /// Only transport-level errors and explicit cancellation are candidates;
    /// a non-success status or an in-band error frame is always a failure.
    pub fn is_cancellation(&self) -> bool {
        match self {
            Self::Cancelled => true,
            Self::Transport { message } => looks_like_cancellation(message),
            _ => false,
        }
    }
}

/// Error returned by caller-supplied handlers.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Result type for caller-supplied handlers.
pub type HandlerResult = Result<(), HandlerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancellation_markers_match_case_insensitively() {
        assert!(looks_like_cancellation("AbortError: The user aborted a request."));
        assert!(looks_like_cancellation("operation CANCELLED"));
        assert!(looks_like_cancellation("request was Aborted"));
        assert!(!looks_like_cancellation("connection reset by peer"));
    }

    #[test]
    fn only_transport_and_cancelled_errors_count_as_cancellation() {
        assert!(StreamError::Cancelled.is_cancellation());
        assert!(StreamError::transport("body read aborted").is_cancellation());
        assert!(!StreamError::transport("connection reset").is_cancellation());
        assert!(!StreamError::remote("investigation cancelled").is_cancellation());
        assert!(
            !StreamError::Status {
                status: 499,
                body: "aborted".into()
            }
            .is_cancellation()
        );
    }

    #[test]
    fn cancelled_display_carries_marker() {
        assert!(looks_like_cancellation(&StreamError::Cancelled.to_string()));
    }
}
