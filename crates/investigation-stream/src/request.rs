use serde_json::{Map, Value};

use crate::errors::StreamError;

/// Server endpoints the client talks to, relative to the base URL.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Endpoint {
    /// `POST /api/investigate`: start an investigation; the response is its stream.
    Investigate,
    /// `POST /api/analyze/events`
    AnalyzeEvents,
    /// `POST /api/generate/title`
    GenerateTitle,
    /// `GET /api/investigate/{task_id}/event`: stored events, then live ones.
    InvestigationEvents { task_id: String },
    /// `POST /api/investigate/{task_id}/cancel`
    CancelInvestigation { task_id: String },
}

impl Endpoint {
    /// Path relative to the configured base URL.
    pub fn path(&self) -> String {
        match self {
            Self::Investigate => "/api/investigate".to_string(),
            Self::AnalyzeEvents => "/api/analyze/events".to_string(),
            Self::GenerateTitle => "/api/generate/title".to_string(),
            Self::InvestigationEvents { task_id } => format!("/api/investigate/{task_id}/event"),
            Self::CancelInvestigation { task_id } => format!("/api/investigate/{task_id}/cancel"),
        }
    }

    /// Short label used in logs.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Investigate => "investigate",
            Self::AnalyzeEvents => "analyze_events",
            Self::GenerateTitle => "generate_title",
            Self::InvestigationEvents { .. } => "investigation_events",
            Self::CancelInvestigation { .. } => "cancel_investigation",
        }
    }
}

/// A request against one endpoint: `POST` with a JSON body, or `GET` without.
#[derive(Clone, Debug, PartialEq)]
pub struct StreamRequest {
    pub endpoint: Endpoint,
    pub body: Option<Value>,
}

impl StreamRequest {
    /// `POST` with a JSON body.
    pub fn post(endpoint: Endpoint, body: Value) -> Self {
        Self {
            endpoint,
            body: Some(body),
        }
    }

    /// `GET` without a body.
    pub fn get(endpoint: Endpoint) -> Self {
        Self {
            endpoint,
            body: None,
        }
    }

    /// Validated `POST /api/investigate`.
    pub fn investigate(request: &InvestigationRequest) -> Result<Self, StreamError> {
        request.validate()?;
        Ok(Self::post(Endpoint::Investigate, to_body(request)?))
    }

    /// Validated `POST /api/analyze/events`.
    pub fn analyze_events(request: &EventAnalysisRequest) -> Result<Self, StreamError> {
        request.validate()?;
        Ok(Self::post(Endpoint::AnalyzeEvents, to_body(request)?))
    }

    /// Validated `POST /api/generate/title`.
    pub fn generate_title(request: &TitleRequest) -> Result<Self, StreamError> {
        request.validate()?;
        Ok(Self::post(Endpoint::GenerateTitle, to_body(request)?))
    }

    /// `GET` of stored and live events for `task_id`.
    pub fn investigation_events(task_id: &str) -> Result<Self, StreamError> {
        validate_task_id(task_id)?;
        Ok(Self::get(Endpoint::InvestigationEvents {
            task_id: task_id.to_string(),
        }))
    }

    /// Server-side cancel request for `task_id`.
    pub fn cancel_investigation(task_id: &str) -> Result<Self, StreamError> {
        validate_task_id(task_id)?;
        Ok(Self::post(
            Endpoint::CancelInvestigation {
                task_id: task_id.to_string(),
            },
            Value::Object(Map::new()),
        ))
    }
}

/// Named resource manifest attached to an investigation.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ResourceContext {
    pub resource_name: String,
    pub resource_content: String,
}

/// Named log excerpt attached to an investigation.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct LogContext {
    pub log_name: String,
    pub log_content: String,
}

/// Body of `POST /api/investigate`.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct InvestigationRequest {
    pub prompt: String,
    /// Free-form context, e.g. `kubecontext` / `kubeconfig`.
    #[serde(default)]
    pub context: Map<String, Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_context: Option<Vec<ResourceContext>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_context: Option<Vec<LogContext>>,
}

impl InvestigationRequest {
    /// Starts a request with an empty context.
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            context: Map::new(),
            model: None,
            resource_context: None,
            log_context: None,
        }
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Sets `context.kubecontext`.
    pub fn kubecontext(self, kubecontext: impl Into<String>) -> Self {
        self.context_value("kubecontext", Value::String(kubecontext.into()))
    }

    /// Sets one free-form context entry.
    pub fn context_value(mut self, key: impl Into<String>, value: Value) -> Self {
        self.context.insert(key.into(), value);
        self
    }

    /// Attaches a resource manifest.
    pub fn resource(mut self, name: impl Into<String>, content: impl Into<String>) -> Self {
        self.resource_context
            .get_or_insert_with(Vec::new)
            .push(ResourceContext {
                resource_name: name.into(),
                resource_content: content.into(),
            });
        self
    }

    /// Attaches a log excerpt.
    pub fn log(mut self, name: impl Into<String>, content: impl Into<String>) -> Self {
        self.log_context.get_or_insert_with(Vec::new).push(LogContext {
            log_name: name.into(),
            log_content: content.into(),
        });
        self
    }

    fn validate(&self) -> Result<(), StreamError> {
        if self.prompt.trim().is_empty() {
            return Err(StreamError::Validation(
                "investigation prompt must not be empty".into(),
            ));
        }
        Ok(())
    }
}

/// Body of `POST /api/analyze/events`.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct EventAnalysisRequest {
    /// The cluster event object being analyzed.
    pub event: Value,
    pub cluster_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kubecontext: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_yaml: Option<String>,
}

impl EventAnalysisRequest {
    pub fn new(event: Value, cluster_name: impl Into<String>) -> Self {
        Self {
            event,
            cluster_name: cluster_name.into(),
            model: None,
            kubecontext: None,
            resource_yaml: None,
        }
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn kubecontext(mut self, kubecontext: impl Into<String>) -> Self {
        self.kubecontext = Some(kubecontext.into());
        self
    }

    pub fn resource_yaml(mut self, yaml: impl Into<String>) -> Self {
        self.resource_yaml = Some(yaml.into());
        self
    }

    fn validate(&self) -> Result<(), StreamError> {
        if self.cluster_name.trim().is_empty() {
            return Err(StreamError::Validation(
                "cluster_name must not be empty".into(),
            ));
        }
        if !self.event.is_object() {
            return Err(StreamError::Validation(
                "event must be a JSON object".into(),
            ));
        }
        Ok(())
    }
}

/// Body of `POST /api/generate/title`.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct TitleRequest {
    pub task_id: String,
    pub user_prompt: String,
    pub root_cause: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

impl TitleRequest {
    pub fn new(
        task_id: impl Into<String>,
        user_prompt: impl Into<String>,
        root_cause: impl Into<String>,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            user_prompt: user_prompt.into(),
            root_cause: root_cause.into(),
            model: None,
        }
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    fn validate(&self) -> Result<(), StreamError> {
        validate_task_id(&self.task_id)?;
        if self.user_prompt.trim().is_empty() {
            return Err(StreamError::Validation(
                "user_prompt must not be empty".into(),
            ));
        }
        Ok(())
    }
}

/// Acknowledgement returned by the cancel endpoint.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct CancelAck {
    pub task_id: String,
    pub status: String,
    #[serde(default)]
    pub message: String,
}

pub(crate) fn validate_task_id(task_id: &str) -> Result<(), StreamError> {
    if task_id.trim().is_empty() {
        return Err(StreamError::Validation("task_id must not be empty".into()));
    }
    if task_id
        .chars()
        .any(|c| c.is_whitespace() || matches!(c, '/' | '?' | '#' | '%'))
    {
        return Err(StreamError::Validation(format!(
            "task_id contains characters not allowed in a path segment: {task_id}"
        )));
    }
    Ok(())
}

fn to_body<T: serde::Serialize>(request: &T) -> Result<Value, StreamError> {
    serde_json::to_value(request)
        .map_err(|e| StreamError::Validation(format!("failed to serialize request body: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn endpoint_paths_match_server_routes() {
        assert_eq!(Endpoint::Investigate.path(), "/api/investigate");
        assert_eq!(Endpoint::AnalyzeEvents.path(), "/api/analyze/events");
        assert_eq!(Endpoint::GenerateTitle.path(), "/api/generate/title");
        assert_eq!(
            Endpoint::InvestigationEvents {
                task_id: "t1".into()
            }
            .path(),
            "/api/investigate/t1/event"
        );
        assert_eq!(
            Endpoint::CancelInvestigation {
                task_id: "t1".into()
            }
            .path(),
            "/api/investigate/t1/cancel"
        );
    }

    #[test]
    fn investigation_body_omits_unset_optionals() {
        let request = StreamRequest::investigate(
            &InvestigationRequest::new("why is api crashlooping?")
                .kubecontext("prod")
                .resource("api-7d9", "kind: Pod"),
        )
        .expect("request");
        let body = request.body.expect("body");
        assert_eq!(body["prompt"], "why is api crashlooping?");
        assert_eq!(body["context"], json!({"kubecontext": "prod"}));
        assert_eq!(body["resource_context"][0]["resource_name"], "api-7d9");
        assert!(body.get("model").is_none());
        assert!(body.get("log_context").is_none());
    }

    #[test]
    fn empty_prompt_is_rejected() {
        assert!(matches!(
            StreamRequest::investigate(&InvestigationRequest::new("   ")),
            Err(StreamError::Validation(msg)) if msg.contains("prompt")
        ));
    }

    #[test]
    fn analysis_request_requires_cluster_and_object_event() {
        assert!(StreamRequest::analyze_events(&EventAnalysisRequest::new(json!({}), "")).is_err());
        assert!(
            StreamRequest::analyze_events(&EventAnalysisRequest::new(json!("x"), "kind")).is_err()
        );
        let ok = StreamRequest::analyze_events(
            &EventAnalysisRequest::new(json!({"reason": "BackOff"}), "kind").model("m"),
        )
        .expect("request");
        assert_eq!(ok.endpoint, Endpoint::AnalyzeEvents);
    }

    #[test]
    fn task_ids_must_be_single_path_segments() {
        assert!(StreamRequest::investigation_events("").is_err());
        assert!(StreamRequest::investigation_events("a/b").is_err());
        assert!(StreamRequest::investigation_events("a b").is_err());
        let ok = StreamRequest::investigation_events("4f1c2d3e-0000-4000-8000-000000000001")
            .expect("request");
        assert_eq!(ok.body, None);
    }

    #[test]
    fn title_request_validates_task_and_prompt() {
        assert!(StreamRequest::generate_title(&TitleRequest::new("t1", "", "oom")).is_err());
        let ok = StreamRequest::generate_title(&TitleRequest::new("t1", "why", "oom"))
            .expect("request");
        assert_eq!(ok.body.expect("body")["task_id"], "t1");
    }
}
