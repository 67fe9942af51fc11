use std::collections::HashMap;

use tokio::sync::mpsc;

use crate::correlator::ToolCallRecord;
use crate::envelope::{EventEnvelope, EventKind};
use crate::errors::{HandlerResult, StreamError};

/// Why a session completed without error.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DoneReason {
    /// The `data: [DONE]` sentinel line.
    Sentinel,
    /// A JSON `done` event.
    DoneEvent,
    /// The server closed the body without an explicit terminal.
    StreamEnd,
    /// The read was aborted on purpose.
    Cancelled,
}

/// The single terminal outcome of a session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Termination {
    Completed(DoneReason),
    Failed(StreamError),
}

impl Termination {
    /// Returns true for `Failed`.
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

pub(crate) type EventHandler = Box<dyn FnMut(&EventEnvelope) -> HandlerResult + Send>;
pub(crate) type ToolCallHandler = Box<dyn FnMut(&ToolCallRecord) -> HandlerResult + Send>;
pub(crate) type DoneHandler = Box<dyn FnOnce(DoneReason) + Send>;
pub(crate) type ErrorHandler = Box<dyn FnOnce(&StreamError) + Send>;

/// Handlers registered for one stream session.
///
/// For every envelope the catch-all handler runs first, then the handler for
/// its kind. Tool calls are additionally delivered, once correlated, to the
/// tool-call handler. Exactly one of `on_done` / `on_error` fires per session.
#[derive(Default)]
pub struct Subscription {
    pub(crate) any: Option<EventHandler>,
    pub(crate) by_kind: HashMap<EventKind, EventHandler>,
    pub(crate) tool_calls: Option<ToolCallHandler>,
    pub(crate) done: Option<DoneHandler>,
    pub(crate) error: Option<ErrorHandler>,
}

impl Subscription {
    /// Creates a subscription with no handlers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the catch-all handler.
    pub fn on_any<F>(mut self, handler: F) -> Self
    where
        F: FnMut(&EventEnvelope) -> HandlerResult + Send + 'static,
    {
        self.any = Some(Box::new(handler));
        self
    }

    /// Registers the handler for one event kind, replacing any previous one.
    pub fn on<F>(mut self, kind: EventKind, handler: F) -> Self
    where
        F: FnMut(&EventEnvelope) -> HandlerResult + Send + 'static,
    {
        self.by_kind.insert(kind, Box::new(handler));
        self
    }

    /// Registers the `investigation_started` handler.
    pub fn on_investigation_started<F>(self, handler: F) -> Self
    where
        F: FnMut(&EventEnvelope) -> HandlerResult + Send + 'static,
    {
        self.on(EventKind::InvestigationStarted, handler)
    }

    /// Registers the `analysis_step` handler.
    pub fn on_analysis_step<F>(self, handler: F) -> Self
    where
        F: FnMut(&EventEnvelope) -> HandlerResult + Send + 'static,
    {
        self.on(EventKind::AnalysisStep, handler)
    }

    /// Registers the `investigation_complete` handler.
    pub fn on_investigation_complete<F>(self, handler: F) -> Self
    where
        F: FnMut(&EventEnvelope) -> HandlerResult + Send + 'static,
    {
        self.on(EventKind::InvestigationComplete, handler)
    }

    /// Registers the handler for legacy untyped text frames.
    pub fn on_content<F>(self, handler: F) -> Self
    where
        F: FnMut(&EventEnvelope) -> HandlerResult + Send + 'static,
    {
        self.on(EventKind::Content, handler)
    }

    /// Registers the `title_token` handler.
    pub fn on_title_token<F>(self, handler: F) -> Self
    where
        F: FnMut(&EventEnvelope) -> HandlerResult + Send + 'static,
    {
        self.on(EventKind::TitleToken, handler)
    }

    /// Registers the `title_complete` handler.
    pub fn on_title_complete<F>(self, handler: F) -> Self
    where
        F: FnMut(&EventEnvelope) -> HandlerResult + Send + 'static,
    {
        self.on(EventKind::TitleComplete, handler)
    }

    /// Registers the handler for correlated tool calls.
    ///
    /// Receives merged call+output records, and calls without a `call_id`
    /// as soon as they arrive.
    pub fn on_tool_call<F>(mut self, handler: F) -> Self
    where
        F: FnMut(&ToolCallRecord) -> HandlerResult + Send + 'static,
    {
        self.tool_calls = Some(Box::new(handler));
        self
    }

    /// Registers the handler for successful completion, including cancellation.
    pub fn on_done<F>(mut self, handler: F) -> Self
    where
        F: FnOnce(DoneReason) + Send + 'static,
    {
        self.done = Some(Box::new(handler));
        self
    }

    /// Registers the handler for a failed session.
    pub fn on_error<F>(mut self, handler: F) -> Self
    where
        F: FnOnce(&StreamError) + Send + 'static,
    {
        self.error = Some(Box::new(handler));
        self
    }

    /// Builds a subscription that forwards everything into a channel.
    ///
    /// The receiver yields envelopes and tool calls in arrival order followed
    /// by exactly one terminal item.
    pub fn channel() -> (Self, SessionEvents) {
        let (tx, rx) = mpsc::unbounded_channel();
        let events_tx = tx.clone();
        let tools_tx = tx.clone();
        let done_tx = tx.clone();
        let subscription = Self::new()
            .on_any(move |envelope| {
                let _ = events_tx.send(SessionEvent::Event(envelope.clone()));
                Ok(())
            })
            .on_tool_call(move |record| {
                let _ = tools_tx.send(SessionEvent::ToolCall(record.clone()));
                Ok(())
            })
            .on_done(move |reason| {
                let _ = done_tx.send(SessionEvent::Done(reason));
            })
            .on_error(move |err| {
                let _ = tx.send(SessionEvent::Failed(err.clone()));
            });
        (subscription, SessionEvents { rx })
    }
}

/// Item yielded by [`SessionEvents`].
#[derive(Clone, Debug, PartialEq)]
pub enum SessionEvent {
    Event(EventEnvelope),
    ToolCall(ToolCallRecord),
    Done(DoneReason),
    Failed(StreamError),
}

impl SessionEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done(_) | Self::Failed(_))
    }
}

/// Receiving side of [`Subscription::channel`].
pub struct SessionEvents {
    rx: mpsc::UnboundedReceiver<SessionEvent>,
}

impl SessionEvents {
    /// Waits for the next item; `None` once the session is gone.
    pub async fn next(&mut self) -> Option<SessionEvent> {
        self.rx.recv().await
    }

    /// Collects items up to and including the terminal one.
    pub async fn collect_until_terminal(mut self) -> Vec<SessionEvent> {
        let mut items = Vec::new();
        while let Some(item) = self.next().await {
            let terminal = item.is_terminal();
            items.push(item);
            if terminal {
                break;
            }
        }
        items
    }
}
