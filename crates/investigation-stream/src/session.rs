use futures::StreamExt as _;
use tokio::sync::{oneshot, watch};
use tracing::{debug, info, warn};

use crate::correlator::ToolCallCorrelator;
use crate::decoder::{Frame, FrameDecoder};
use crate::envelope::{ClassifyError, EventEnvelope, EventKind, classify, frame_task_id};
use crate::errors::StreamError;
use crate::request::StreamRequest;
use crate::router::DispatchRouter;
use crate::subscription::{DoneReason, Subscription, Termination};
use crate::transport::EventTransport;

/// Lifecycle of one stream session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Connecting,
    Open,
    Draining,
    Closed,
    Failed,
}

/// Handle used to abort a session's read loop.
///
/// Cancelling is idempotent and safe in any state; the session resolves to
/// `Closed` with `DoneReason::Cancelled` and never reports an error for it.
#[derive(Clone, Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    /// Requests cancellation. Repeated calls are no-ops.
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    /// Returns true once `cancel` has been called.
    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }
}

/// Summary returned when a session finishes.
#[derive(Clone, Debug, PartialEq)]
pub struct SessionReport {
    pub session_id: uuid::Uuid,
    /// First task id observed on the stream.
    pub task_id: Option<String>,
    pub state: SessionState,
    pub termination: Termination,
    /// JSON frames and sentinels decoded from the body.
    pub frames: u64,
    /// Tool calls still waiting for output at teardown.
    pub discarded_tool_calls: usize,
}

/// One stream: reads the body, decodes frames, classifies them and routes
/// envelopes to the subscription.
pub struct StreamSession {
    session_id: uuid::Uuid,
    label: String,
    task_id: Option<String>,
    state: SessionState,
    decoder: FrameDecoder,
    correlator: ToolCallCorrelator,
    router: DispatchRouter,
    cancel_tx: watch::Sender<bool>,
    cancel_rx: watch::Receiver<bool>,
    task_id_tx: Option<oneshot::Sender<String>>,
    frames: u64,
    discarded_tool_calls: usize,
}

impl StreamSession {
    /// Creates a session in `Connecting` that will route to `subscription`.
    ///
    /// `label` only appears in logs.
    pub fn new(label: impl Into<String>, subscription: Subscription) -> Self {
        let (cancel_tx, cancel_rx) = watch::channel(false);
        Self {
            session_id: uuid::Uuid::new_v4(),
            label: label.into(),
            task_id: None,
            state: SessionState::Connecting,
            decoder: FrameDecoder::default(),
            correlator: ToolCallCorrelator::default(),
            router: DispatchRouter::new(subscription),
            cancel_tx,
            cancel_rx,
            task_id_tx: None,
            frames: 0,
            discarded_tool_calls: 0,
        }
    }

    /// Random id used in log fields.
    pub fn session_id(&self) -> uuid::Uuid {
        self.session_id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Returns a handle that stops `run` from another task.
    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            tx: self.cancel_tx.clone(),
        }
    }

    /// Sends the first task id seen on the stream to `tx`.
    pub(crate) fn notify_task_id(&mut self, tx: oneshot::Sender<String>) {
        self.task_id_tx = Some(tx);
    }

    /// Opens `request` on `transport` and reads it to the end.
    ///
    /// Exactly one terminal signal reaches the subscription before this
    /// returns.
    pub async fn run(mut self, transport: &dyn EventTransport, request: &StreamRequest) -> SessionReport {
        let mut cancel_rx = self.cancel_rx.clone();
        debug!(
            session_id = %self.session_id,
            label = %self.label,
            endpoint = request.endpoint.label(),
            "connecting stream"
        );

        let opened = tokio::select! {
            biased;
            _ = cancelled(&mut cancel_rx) => Err(StreamError::Cancelled),
            opened = transport.open(request) => opened,
        };
        let mut body = match opened {
            Ok(body) => body,
            Err(err) => {
                self.abort_with(err);
                return self.report();
            }
        };
        self.state = SessionState::Open;
        debug!(session_id = %self.session_id, "stream open");

        loop {
            tokio::select! {
                biased;
                _ = cancelled(&mut cancel_rx) => {
                    self.abort_with(StreamError::Cancelled);
                    break;
                }
                next = body.next() => match next {
                    Some(Ok(chunk)) => self.ingest(&chunk),
                    Some(Err(err)) => {
                        self.abort_with(err);
                        break;
                    }
                    None => {
                        self.drain();
                        break;
                    }
                },
            }
        }
        self.report()
    }

    fn ingest(&mut self, chunk: &[u8]) {
        for frame in self.decoder.feed(chunk) {
            self.frames += 1;
            match frame {
                Frame::Done => {
                    self.router
                        .terminate(Termination::Completed(DoneReason::Sentinel));
                }
                Frame::Json(value) => {
                    if let Some(task_id) = frame_task_id(&value) {
                        self.observe_task_id(&task_id);
                    }
                    match classify(&value) {
                        Ok(envelope) => self.handle_envelope(envelope),
                        Err(ClassifyError::Metadata) => {
                            debug!(session_id = %self.session_id, "metadata frame skipped");
                        }
                        Err(err) => {
                            warn!(session_id = %self.session_id, error = %err, "frame skipped");
                        }
                    }
                }
            }
        }
    }

    fn handle_envelope(&mut self, envelope: EventEnvelope) {
        self.router.deliver_event(&envelope);
        match envelope.kind {
            EventKind::ToolCall => {
                if let Some(record) = self.correlator.on_tool_call(&envelope) {
                    self.router.deliver_tool_call(&record);
                }
            }
            EventKind::ToolOutput => {
                if let Some(record) = self.correlator.on_tool_output(&envelope) {
                    self.router.deliver_tool_call(&record);
                }
            }
            EventKind::Done => {
                self.router
                    .terminate(Termination::Completed(DoneReason::DoneEvent));
            }
            EventKind::Error => {
                let message = envelope
                    .error_message()
                    .unwrap_or("server reported an error")
                    .to_string();
                self.router
                    .terminate(Termination::Failed(StreamError::remote(message)));
            }
            _ => {}
        }
    }

    fn observe_task_id(&mut self, task_id: &str) {
        if self.task_id.is_some() {
            return;
        }
        info!(session_id = %self.session_id, task_id, "task id received");
        self.task_id = Some(task_id.to_string());
        if let Some(tx) = self.task_id_tx.take() {
            let _ = tx.send(task_id.to_string());
        }
    }

    fn drain(&mut self) {
        self.state = SessionState::Draining;
        self.decoder.finish();
        self.router
            .terminate(Termination::Completed(DoneReason::StreamEnd));
        self.discarded_tool_calls += self.correlator.discard_pending();
        self.state = self.final_state();
        debug!(session_id = %self.session_id, frames = self.frames, "stream closed");
    }

    fn abort_with(&mut self, err: StreamError) {
        self.discarded_tool_calls += self.correlator.discard_pending();
        if err.is_cancellation() {
            debug!(session_id = %self.session_id, reason = %err, "stream cancelled");
            self.router
                .terminate(Termination::Completed(DoneReason::Cancelled));
        } else {
            warn!(session_id = %self.session_id, error = %err, "stream failed");
            self.router.terminate(Termination::Failed(err));
        }
        self.state = self.final_state();
    }

    fn final_state(&self) -> SessionState {
        match self.router.terminal() {
            Some(termination) if termination.is_failure() => SessionState::Failed,
            _ => SessionState::Closed,
        }
    }

    fn report(&self) -> SessionReport {
        let termination = self.router.terminal().cloned().unwrap_or_else(|| {
            Termination::Failed(StreamError::protocol_msg("session ended without terminal signal"))
        });
        SessionReport {
            session_id: self.session_id,
            task_id: self.task_id.clone(),
            state: self.state,
            termination,
            frames: self.frames,
            discarded_tool_calls: self.discarded_tool_calls,
        }
    }
}

/// Resolves once cancellation is requested; never resolves otherwise.
async fn cancelled(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
