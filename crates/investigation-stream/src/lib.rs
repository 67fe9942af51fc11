//! Streaming client for investigation event feeds.
//!
//! An investigation server answers long-running requests with a body of
//! newline-delimited `data: <json>` lines. This crate decodes that body,
//! classifies each frame into a typed [`EventEnvelope`], pairs tool calls
//! with their outputs, and routes everything to a caller-supplied
//! [`Subscription`] with exactly one terminal signal per session.
//!
//! # Following an investigation
//!
//! ```no_run
//! use investigation_stream::prelude::*;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), StreamError> {
//! let manager = SessionManager::from_env()?;
//! let subscription = Subscription::new()
//!     .on_analysis_step(|event| {
//!         println!("step: {:?}", event.payload.get("content"));
//!         Ok(())
//!     })
//!     .on_tool_call(|call| {
//!         println!("{} {}", call.tool_name, call.arguments);
//!         Ok(())
//!     })
//!     .on_done(|reason| println!("done: {reason:?}"))
//!     .on_error(|err| eprintln!("failed: {err}"));
//!
//! let initiated = manager
//!     .initiate(
//!         &InvestigationRequest::new("why is checkout-api crashlooping?"),
//!         InitiateMode::HandOff,
//!         subscription,
//!     )
//!     .await?;
//! println!("task {}", initiated.task_id);
//! initiated.session.wait().await?;
//! # Ok(())
//! # }
//! ```

/// Client configuration.
pub mod config;
/// Tool-call / tool-output pairing.
pub mod correlator;
/// Line framing of the `data:` stream.
pub mod decoder;
/// Typed event envelopes and frame classification.
pub mod envelope;
/// Error types.
pub mod errors;
/// Session manager: initiate, subscribe and the other streaming endpoints.
pub mod manager;
/// Process-wide `tracing` setup for binaries.
pub mod observability;
/// Common imports for typical usage.
pub mod prelude;
/// Endpoints and request bodies.
pub mod request;
/// Delivery of envelopes to a subscription.
pub mod router;
/// The per-stream state machine.
pub mod session;
/// Caller-side handler registration.
pub mod subscription;
/// Transport seam and the HTTP implementation.
pub mod transport;

pub use config::ClientConfig;
pub use correlator::{ToolCallCorrelator, ToolCallRecord, ToolOutput};
pub use decoder::{Frame, FrameDecoder};
pub use envelope::{ClassifyError, EventEnvelope, EventKind, classify};
pub use errors::{HandlerError, HandlerResult, StreamError, looks_like_cancellation};
pub use manager::{InitiateMode, Initiated, SessionHandle, SessionManager};
pub use observability::init_observability;
pub use request::{
    CancelAck, Endpoint, EventAnalysisRequest, InvestigationRequest, StreamRequest, TitleRequest,
};
pub use session::{CancelHandle, SessionReport, SessionState, StreamSession};
pub use subscription::{DoneReason, SessionEvent, SessionEvents, Subscription, Termination};
pub use transport::{ByteStream, EventTransport, HttpTransport};
