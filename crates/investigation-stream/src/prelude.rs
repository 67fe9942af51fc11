//! Common imports for typical usage.
pub use crate::{
    CancelHandle, ClientConfig, DoneReason, EventAnalysisRequest, EventEnvelope, EventKind,
    InitiateMode, Initiated, InvestigationRequest, SessionEvent, SessionEvents, SessionHandle,
    SessionManager, StreamError, Subscription, Termination, TitleRequest, ToolCallRecord,
};
