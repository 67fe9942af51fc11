use std::sync::Arc;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::config::ClientConfig;
use crate::errors::StreamError;
use crate::request::{
    CancelAck, EventAnalysisRequest, InvestigationRequest, StreamRequest, TitleRequest,
};
use crate::session::{CancelHandle, SessionReport, StreamSession};
use crate::subscription::{Subscription, Termination};
use crate::transport::{EventTransport, HttpTransport};

/// How `initiate` treats the connection that started the investigation.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum InitiateMode {
    /// Cancel the initiating connection as soon as the task id is known and
    /// follow the investigation through its event endpoint.
    #[default]
    HandOff,
    /// Keep reading the initiating connection as the live event source.
    KeepOpen,
}

/// A spawned session.
pub struct SessionHandle {
    session_id: uuid::Uuid,
    cancel: CancelHandle,
    join: JoinHandle<SessionReport>,
}

impl SessionHandle {
    /// Id used in this session's log lines.
    pub fn session_id(&self) -> uuid::Uuid {
        self.session_id
    }

    /// Returns a handle that can stop the session from elsewhere.
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Stops reading; the subscription sees `DoneReason::Cancelled`.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Waits for the session to finish.
    pub async fn wait(self) -> Result<SessionReport, StreamError> {
        self.join
            .await
            .map_err(|e| StreamError::protocol_msg(format!("session task failed: {e}")))
    }
}

/// Cancels a session when dropped, unless disarmed first.
struct CancelOnDrop {
    cancel: Option<CancelHandle>,
}

impl CancelOnDrop {
    fn new(cancel: CancelHandle) -> Self {
        Self {
            cancel: Some(cancel),
        }
    }

    fn disarm(&mut self) {
        self.cancel = None;
    }
}

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            debug!("initiate abandoned before completion; cancelling initiating stream");
            cancel.cancel();
        }
    }
}

/// Result of a successful `initiate`.
pub struct Initiated {
    pub task_id: String,
    pub session: SessionHandle,
}

/// Opens sessions against the investigation server.
///
/// Every session owns its own decoder, correlator and subscription; the
/// manager only holds the shared transport.
#[derive(Clone)]
pub struct SessionManager {
    transport: Arc<dyn EventTransport>,
}

impl SessionManager {
    /// Creates a manager backed by an HTTP transport.
    pub fn new(config: ClientConfig) -> Result<Self, StreamError> {
        Ok(Self::with_transport(Arc::new(HttpTransport::new(config)?)))
    }

    /// Creates a manager using `INVESTIGATION_API_BASE_URL`.
    pub fn from_env() -> Result<Self, StreamError> {
        Self::new(ClientConfig::from_env()?)
    }

    /// Creates a manager over any transport, e.g. a scripted one in tests.
    pub fn with_transport(transport: Arc<dyn EventTransport>) -> Self {
        Self { transport }
    }

    /// Spawns a session for an arbitrary streaming request.
    pub fn open(&self, request: StreamRequest, subscription: Subscription) -> SessionHandle {
        let session = StreamSession::new(request.endpoint.label(), subscription);
        self.spawn(session, request)
    }

    /// Follows an existing investigation: stored events first, then live ones.
    pub fn subscribe(
        &self,
        task_id: &str,
        subscription: Subscription,
    ) -> Result<SessionHandle, StreamError> {
        let request = StreamRequest::investigation_events(task_id)?;
        debug!(task_id, "subscribing to investigation events");
        Ok(self.open(request, subscription))
    }

    /// Streams an analysis of one cluster event.
    pub fn analyze_events(
        &self,
        request: &EventAnalysisRequest,
        subscription: Subscription,
    ) -> Result<SessionHandle, StreamError> {
        Ok(self.open(StreamRequest::analyze_events(request)?, subscription))
    }

    /// Streams title tokens for a finished investigation.
    pub fn generate_title(
        &self,
        request: &TitleRequest,
        subscription: Subscription,
    ) -> Result<SessionHandle, StreamError> {
        Ok(self.open(StreamRequest::generate_title(request)?, subscription))
    }

    /// Starts an investigation and resolves once the server reports its task id.
    ///
    /// Fails with `StreamError::NoTaskId` when the stream ends without one, or
    /// with the stream's own failure if it failed first.
    pub async fn initiate(
        &self,
        request: &InvestigationRequest,
        mode: InitiateMode,
        subscription: Subscription,
    ) -> Result<Initiated, StreamError> {
        let stream_request = StreamRequest::investigate(request)?;
        let (initiating, follow) = match mode {
            InitiateMode::HandOff => (Subscription::new(), Some(subscription)),
            InitiateMode::KeepOpen => (subscription, None),
        };
        let (task_id_tx, task_id_rx) = oneshot::channel();
        let mut session = StreamSession::new("investigate", initiating);
        session.notify_task_id(task_id_tx);
        let handle = self.spawn(session, stream_request);
        // Stops the initiating read if this future is dropped before returning.
        let mut guard = CancelOnDrop::new(handle.cancel_handle());

        let task_id = match task_id_rx.await {
            Ok(task_id) => task_id,
            // The session dropped the sender: it finished without a task id.
            Err(_) => {
                let report = handle.wait().await?;
                return Err(match report.termination {
                    Termination::Failed(err) => err,
                    Termination::Completed(_) => StreamError::NoTaskId,
                });
            }
        };
        info!(task_id = %task_id, ?mode, "investigation initiated");

        match follow {
            None => {
                guard.disarm();
                Ok(Initiated {
                    task_id,
                    session: handle,
                })
            }
            Some(subscription) => {
                handle.cancel();
                handle.wait().await?;
                guard.disarm();
                let session = self.subscribe(&task_id, subscription)?;
                Ok(Initiated { task_id, session })
            }
        }
    }

    /// Asks the server to stop a running investigation.
    ///
    /// This is distinct from `CancelHandle`, which only stops the local reader.
    pub async fn cancel_investigation(&self, task_id: &str) -> Result<CancelAck, StreamError> {
        let request = StreamRequest::cancel_investigation(task_id)?;
        let value = self.transport.send_json(&request).await?;
        serde_json::from_value(value)
            .map_err(|e| StreamError::protocol_msg(format!("invalid cancel response: {e}")))
    }

    fn spawn(&self, session: StreamSession, request: StreamRequest) -> SessionHandle {
        let session_id = session.session_id();
        let cancel = session.cancel_handle();
        let transport = self.transport.clone();
        let join =
            tokio::spawn(async move { session.run(transport.as_ref(), &request).await });
        SessionHandle {
            session_id,
            cancel,
            join,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::EventKind;
    use crate::request::Endpoint;
    use crate::subscription::{DoneReason, SessionEvent};
    use crate::transport::ByteStream;
    use bytes::Bytes;
    use futures::StreamExt as _;
    use futures::stream;
    use serde_json::{Value, json};
    use std::pin::Pin;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::task::{Context, Poll};
    use std::time::Duration;

    /// Serves a fixed body per endpoint and records every request.
    #[derive(Default)]
    struct FakeServer {
        bodies: Vec<(String, Vec<&'static str>, bool)>,
        calls: Mutex<Vec<StreamRequest>>,
        json_reply: Option<Value>,
    }

    impl FakeServer {
        fn serve(mut self, path: &str, chunks: Vec<&'static str>) -> Self {
            self.bodies.push((path.to_string(), chunks, false));
            self
        }

        fn serve_then_hang(mut self, path: &str, chunks: Vec<&'static str>) -> Self {
            self.bodies.push((path.to_string(), chunks, true));
            self
        }

        fn paths(&self) -> Vec<String> {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .map(|r| r.endpoint.path())
                .collect()
        }
    }

    #[async_trait::async_trait]
    impl EventTransport for FakeServer {
        async fn open(&self, request: &StreamRequest) -> Result<ByteStream, StreamError> {
            self.calls.lock().unwrap().push(request.clone());
            let path = request.endpoint.path();
            let Some((_, chunks, hang)) = self.bodies.iter().find(|(p, _, _)| *p == path) else {
                return Err(StreamError::Status {
                    status: 404,
                    body: format!("no route {path}"),
                });
            };
            let body = stream::iter(
                chunks
                    .iter()
                    .map(|c| Ok(Bytes::copy_from_slice(c.as_bytes())))
                    .collect::<Vec<_>>(),
            );
            if *hang {
                Ok(Box::pin(body.chain(stream::pending())))
            } else {
                Ok(Box::pin(body))
            }
        }

        async fn send_json(&self, request: &StreamRequest) -> Result<Value, StreamError> {
            self.calls.lock().unwrap().push(request.clone());
            self.json_reply
                .clone()
                .ok_or_else(|| StreamError::transport("no reply configured"))
        }
    }

    fn manager(server: FakeServer) -> (SessionManager, Arc<FakeServer>) {
        let server = Arc::new(server);
        (SessionManager::with_transport(server.clone()), server)
    }

    #[tokio::test]
    async fn hand_off_cancels_initiator_and_subscribes() {
        let (manager, server) = manager(
            FakeServer::default()
                .serve_then_hang(
                    "/api/investigate",
                    vec!["data: {\"type\":\"investigation_started\",\"task_id\":\"t42\"}\n"],
                )
                .serve(
                    "/api/investigate/t42/event",
                    vec![
                        "data: {\"type\":\"investigation_started\",\"task_id\":\"t42\"}\n",
                        "data: {\"type\":\"investigation_complete\",\"task_id\":\"t42\"}\n",
                        "data: [DONE]\n",
                    ],
                ),
        );
        let (subscription, events) = Subscription::channel();

        let initiated = manager
            .initiate(
                &InvestigationRequest::new("why is api down?"),
                InitiateMode::HandOff,
                subscription,
            )
            .await
            .expect("initiated");
        assert_eq!(initiated.task_id, "t42");

        let report = initiated.session.wait().await.expect("report");
        assert_eq!(report.termination, Termination::Completed(DoneReason::Sentinel));

        let items = events.collect_until_terminal().await;
        let kinds: Vec<EventKind> = items
            .iter()
            .filter_map(|item| match item {
                SessionEvent::Event(env) => Some(env.kind),
                _ => None,
            })
            .collect();
        assert_eq!(
            kinds,
            vec![EventKind::InvestigationStarted, EventKind::InvestigationComplete]
        );
        assert_eq!(items.last(), Some(&SessionEvent::Done(DoneReason::Sentinel)));
        assert_eq!(
            server.paths(),
            vec!["/api/investigate", "/api/investigate/t42/event"]
        );
    }

    #[tokio::test]
    async fn keep_open_reuses_initiating_stream() {
        let (manager, server) = manager(FakeServer::default().serve(
            "/api/investigate",
            vec![
                "data: {\"type\":\"investigation_started\",\"task_id\":\"t7\"}\n",
                "data: {\"type\":\"analysis_step\",\"task_id\":\"t7\"}\n",
                "data: [DONE]\n",
            ],
        ));
        let (subscription, events) = Subscription::channel();

        let initiated = manager
            .initiate(
                &InvestigationRequest::new("check ingress"),
                InitiateMode::KeepOpen,
                subscription,
            )
            .await
            .expect("initiated");

        let report = initiated.session.wait().await.expect("report");
        assert_eq!(report.task_id.as_deref(), Some("t7"));
        assert_eq!(events.collect_until_terminal().await.len(), 3);
        assert_eq!(server.paths(), vec!["/api/investigate"]);
    }

    #[tokio::test]
    async fn empty_initiate_stream_reports_missing_task_id() {
        let (manager, _) = manager(FakeServer::default().serve("/api/investigate", vec![]));

        let err = manager
            .initiate(
                &InvestigationRequest::new("anything"),
                InitiateMode::HandOff,
                Subscription::new(),
            )
            .await
            .err()
            .expect("error");

        assert_eq!(err, StreamError::NoTaskId);
        assert_eq!(err.to_string(), "no task_id received");
    }

    #[tokio::test]
    async fn initiate_surfaces_transport_failure_before_task_id() {
        let (manager, _) = manager(FakeServer::default());

        let err = manager
            .initiate(
                &InvestigationRequest::new("anything"),
                InitiateMode::KeepOpen,
                Subscription::new(),
            )
            .await
            .err()
            .expect("error");

        assert!(matches!(err, StreamError::Status { status: 404, .. }));
    }

    #[tokio::test]
    async fn subscribe_rejects_malformed_task_id() {
        let (manager, server) = manager(FakeServer::default());
        assert!(matches!(
            manager.subscribe("a/b", Subscription::new()),
            Err(StreamError::Validation(_))
        ));
        assert!(server.paths().is_empty());
    }

    #[tokio::test]
    async fn title_stream_uses_title_endpoint() {
        let (manager, server) = manager(FakeServer::default().serve(
            "/api/generate/title",
            vec![
                "data: {\"type\":\"title_token\",\"token\":\"Pod \"}\n",
                "data: {\"type\":\"title_complete\",\"title\":\"Pod OOM\",\"task_id\":\"t1\"}\n",
                "data: [DONE]\n",
            ],
        ));
        let titles = Arc::new(Mutex::new(Vec::new()));
        let titles_in_handler = titles.clone();

        let handle = manager
            .generate_title(
                &TitleRequest::new("t1", "why oom?", "memory limit too low"),
                Subscription::new().on_title_complete(move |env| {
                    titles_in_handler
                        .lock()
                        .unwrap()
                        .push(env.title().unwrap_or_default().to_string());
                    Ok(())
                }),
            )
            .expect("handle");
        handle.wait().await.expect("report");

        assert_eq!(*titles.lock().unwrap(), vec!["Pod OOM".to_string()]);
        let calls = server.calls.lock().unwrap();
        assert_eq!(calls[0].endpoint, Endpoint::GenerateTitle);
        assert_eq!(calls[0].body.as_ref().expect("body")["root_cause"], "memory limit too low");
    }

    #[tokio::test]
    async fn cancel_investigation_parses_ack() {
        let server = FakeServer {
            json_reply: Some(json!({
                "task_id": "t1",
                "status": "cancelled",
                "message": "Investigation cancellation requested"
            })),
            ..FakeServer::default()
        };
        let (manager, server) = manager(server);

        let ack = manager.cancel_investigation("t1").await.expect("ack");

        assert_eq!(ack.status, "cancelled");
        assert_eq!(server.paths(), vec!["/api/investigate/t1/cancel"]);
    }

    #[tokio::test]
    async fn handle_cancel_stops_a_live_subscription() {
        let (manager, _) = manager(FakeServer::default().serve_then_hang(
            "/api/investigate/t1/event",
            vec!["data: {\"type\":\"analysis_step\",\"task_id\":\"t1\"}\n"],
        ));
        let (subscription, mut events) = Subscription::channel();
        let handle = manager.subscribe("t1", subscription).expect("handle");

        assert!(matches!(events.next().await, Some(SessionEvent::Event(_))));
        handle.cancel();
        let report = handle.wait().await.expect("report");

        assert_eq!(report.termination, Termination::Completed(DoneReason::Cancelled));
        assert_eq!(events.next().await, Some(SessionEvent::Done(DoneReason::Cancelled)));
    }

    /// Body that never yields and records when the session lets go of it.
    struct StalledBody {
        released: Arc<AtomicBool>,
    }

    impl futures::Stream for StalledBody {
        type Item = Result<Bytes, StreamError>;

        fn poll_next(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
            Poll::Pending
        }
    }

    impl Drop for StalledBody {
        fn drop(&mut self) {
            self.released.store(true, Ordering::SeqCst);
        }
    }

    struct StalledServer {
        released: Arc<AtomicBool>,
    }

    #[async_trait::async_trait]
    impl EventTransport for StalledServer {
        async fn open(&self, _request: &StreamRequest) -> Result<ByteStream, StreamError> {
            Ok(Box::pin(StalledBody {
                released: self.released.clone(),
            }))
        }
    }

    #[tokio::test]
    async fn abandoned_initiate_releases_its_connection() {
        let released = Arc::new(AtomicBool::new(false));
        let manager = SessionManager::with_transport(Arc::new(StalledServer {
            released: released.clone(),
        }));

        let attempt = tokio::time::timeout(
            Duration::from_millis(50),
            manager.initiate(
                &InvestigationRequest::new("slow server"),
                InitiateMode::HandOff,
                Subscription::new(),
            ),
        )
        .await;
        assert!(attempt.is_err());

        for _ in 0..50 {
            if released.load(Ordering::SeqCst) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(released.load(Ordering::SeqCst));
    }
}
