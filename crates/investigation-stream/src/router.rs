use std::panic::{AssertUnwindSafe, catch_unwind};

use tracing::{debug, warn};

use crate::correlator::ToolCallRecord;
use crate::envelope::{EventEnvelope, EventKind};
use crate::errors::HandlerResult;
use crate::subscription::{Subscription, Termination};

/// Delivers envelopes to a subscription and funnels its terminal signal.
pub struct DispatchRouter {
    subscription: Subscription,
    terminal: Option<Termination>,
}

impl DispatchRouter {
    /// Wraps a subscription; no terminal has fired yet.
    pub fn new(subscription: Subscription) -> Self {
        Self {
            subscription,
            terminal: None,
        }
    }

    /// Runs the catch-all handler, then the handler for the envelope's kind.
    ///
    /// Handler errors and panics are logged and do not stop delivery.
    pub fn deliver_event(&mut self, envelope: &EventEnvelope) {
        if let Some(handler) = self.subscription.any.as_mut() {
            guarded("any", envelope.kind, || handler(envelope));
        }
        if let Some(handler) = self.subscription.by_kind.get_mut(&envelope.kind) {
            guarded("kind", envelope.kind, || handler(envelope));
        }
    }

    /// Runs the tool-call handler for a correlated record.
    pub fn deliver_tool_call(&mut self, record: &ToolCallRecord) {
        if let Some(handler) = self.subscription.tool_calls.as_mut() {
            guarded("tool_call", EventKind::ToolCall, || handler(record));
        }
    }

    /// Delivers the terminal signal if none has fired yet.
    ///
    /// Returns false when the signal was suppressed by an earlier one.
    pub fn terminate(&mut self, termination: Termination) -> bool {
        if let Some(first) = &self.terminal {
            debug!(?first, suppressed = ?termination, "terminal signal already delivered");
            return false;
        }
        match &termination {
            Termination::Completed(reason) => {
                if let Some(handler) = self.subscription.done.take() {
                    let reason = *reason;
                    guarded("done", EventKind::Done, || {
                        handler(reason);
                        Ok(())
                    });
                }
            }
            Termination::Failed(err) => {
                if let Some(handler) = self.subscription.error.take() {
                    guarded("error", EventKind::Error, || {
                        handler(err);
                        Ok(())
                    });
                }
            }
        }
        self.terminal = Some(termination);
        true
    }

    /// The terminal that was delivered, if any.
    pub fn terminal(&self) -> Option<&Termination> {
        self.terminal.as_ref()
    }
}

fn guarded(slot: &'static str, kind: EventKind, call: impl FnOnce() -> HandlerResult) {
    match catch_unwind(AssertUnwindSafe(call)) {
        Ok(Ok(())) => {}
        Ok(Err(err)) => warn!(slot, %kind, error = %err, "handler returned an error"),
        Err(_) => warn!(slot, %kind, "handler panicked"),
    }
}
