use std::fmt;
use std::str::FromStr;

use serde_json::{Map, Value};

/// Every event kind carried by investigation, analysis and title streams.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    InvestigationStarted,
    ToolCall,
    ToolOutput,
    AnalysisStep,
    AgentPhaseComplete,
    InvestigationPlan,
    PatternConfidence,
    ImpactAnalysis,
    TaskDuration,
    InvestigationDraft,
    InvestigationSummary,
    InvestigationRemediation,
    CritiqueStarted,
    CritiqueComplete,
    RefinementStarted,
    RefinementComplete,
    ConfidenceStarted,
    ConfidenceComplete,
    InvestigationComplete,
    InvestigationCancelled,
    InvestigationTimeout,
    Disconnected,
    TitleToken,
    TitleComplete,
    /// Untyped `{text}` / `{function_call_args}` frames from older producers.
    Content,
    Error,
    Done,
}

impl EventKind {
    pub const ALL: [EventKind; 27] = [
        EventKind::InvestigationStarted,
        EventKind::ToolCall,
        EventKind::ToolOutput,
        EventKind::AnalysisStep,
        EventKind::AgentPhaseComplete,
        EventKind::InvestigationPlan,
        EventKind::PatternConfidence,
        EventKind::ImpactAnalysis,
        EventKind::TaskDuration,
        EventKind::InvestigationDraft,
        EventKind::InvestigationSummary,
        EventKind::InvestigationRemediation,
        EventKind::CritiqueStarted,
        EventKind::CritiqueComplete,
        EventKind::RefinementStarted,
        EventKind::RefinementComplete,
        EventKind::ConfidenceStarted,
        EventKind::ConfidenceComplete,
        EventKind::InvestigationComplete,
        EventKind::InvestigationCancelled,
        EventKind::InvestigationTimeout,
        EventKind::Disconnected,
        EventKind::TitleToken,
        EventKind::TitleComplete,
        EventKind::Content,
        EventKind::Error,
        EventKind::Done,
    ];

    /// Wire name of the kind (the `type` discriminator value).
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InvestigationStarted => "investigation_started",
            Self::ToolCall => "tool_call",
            Self::ToolOutput => "tool_output",
            Self::AnalysisStep => "analysis_step",
            Self::AgentPhaseComplete => "agent_phase_complete",
            Self::InvestigationPlan => "investigation_plan",
            Self::PatternConfidence => "pattern_confidence",
            Self::ImpactAnalysis => "impact_analysis",
            Self::TaskDuration => "task_duration",
            Self::InvestigationDraft => "investigation_draft",
            Self::InvestigationSummary => "investigation_summary",
            Self::InvestigationRemediation => "investigation_remediation",
            Self::CritiqueStarted => "critique_started",
            Self::CritiqueComplete => "critique_complete",
            Self::RefinementStarted => "refinement_started",
            Self::RefinementComplete => "refinement_complete",
            Self::ConfidenceStarted => "confidence_started",
            Self::ConfidenceComplete => "confidence_complete",
            Self::InvestigationComplete => "investigation_complete",
            Self::InvestigationCancelled => "investigation_cancelled",
            Self::InvestigationTimeout => "investigation_timeout",
            Self::Disconnected => "disconnected",
            Self::TitleToken => "title_token",
            Self::TitleComplete => "title_complete",
            Self::Content => "content",
            Self::Error => "error",
            Self::Done => "done",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = ClassifyError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        EventKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == value)
            .ok_or_else(|| ClassifyError::UnknownKind(value.to_string()))
    }
}

/// Reasons a decoded JSON frame does not become an envelope.
///
/// None of these are fatal to a session.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClassifyError {
    #[error("frame is not a JSON object")]
    NotAnObject,
    #[error("unknown event type: {0}")]
    UnknownKind(String),
    #[error("metadata-only frame")]
    Metadata,
    #[error("unrecognized frame shape (keys: {0})")]
    UnrecognizedShape(String),
}

/// One typed, decoded event.
#[derive(Clone, Debug, PartialEq, serde::Serialize)]
pub struct EventEnvelope {
    pub kind: EventKind,
    pub task_id: Option<String>,
    /// Advisory only; arrival order is authoritative.
    pub timestamp: Option<String>,
    /// Kind-specific fields with `type`, `task_id` and `timestamp` removed.
    pub payload: Map<String, Value>,
}

impl EventEnvelope {
    /// Returns a string payload field.
    pub fn str_field(&self, key: &str) -> Option<&str> {
        self.payload.get(key).and_then(Value::as_str)
    }

    /// Correlation id of a tool event, if present and non-empty.
    pub fn call_id(&self) -> Option<&str> {
        self.str_field("call_id").filter(|id| !id.is_empty())
    }

    /// Text of a `content` or `title_token` frame.
    pub fn text(&self) -> Option<&str> {
        self.str_field("text")
            .or_else(|| self.str_field("function_call_args"))
            .or_else(|| self.str_field("token"))
    }

    /// Final title of a `title_complete` frame.
    pub fn title(&self) -> Option<&str> {
        self.str_field("title")
    }

    /// Message of an `error` frame.
    pub fn error_message(&self) -> Option<&str> {
        self.str_field("error")
    }
}

/// Classifies one decoded JSON frame.
///
/// Frames without a `type` discriminator are matched against the legacy
/// shapes first; everything else goes through the tagged path.
pub fn classify(raw: &Value) -> Result<EventEnvelope, ClassifyError> {
    let Value::Object(object) = raw else {
        return Err(ClassifyError::NotAnObject);
    };
    let mut fields = object.clone();
    let task_id = take_task_id(&mut fields);
    let timestamp = take_string(&mut fields, "timestamp");

    let (kind, payload) = match fields.remove("type") {
        None => classify_legacy(fields)?,
        Some(Value::String(name)) => {
            let kind = name.parse::<EventKind>()?;
            (kind, normalize_tagged(kind, fields))
        }
        Some(other) => return Err(ClassifyError::UnknownKind(other.to_string())),
    };

    Ok(EventEnvelope {
        kind,
        task_id,
        timestamp,
        payload,
    })
}

fn classify_legacy(
    mut fields: Map<String, Value>,
) -> Result<(EventKind, Map<String, Value>), ClassifyError> {
    if let Some(error) = fields.remove("error") {
        fields.insert("error".into(), Value::String(error_text(&error)));
        return Ok((EventKind::Error, fields));
    }
    if let Some(title) = fields.remove("title_complete") {
        fields.insert("title".into(), Value::String(value_text(&title)));
        return Ok((EventKind::TitleComplete, fields));
    }
    if fields.contains_key("text") || fields.contains_key("function_call_args") {
        return Ok((EventKind::Content, fields));
    }
    if let Some(Value::Object(call)) = fields.remove("tool_call") {
        return Ok((EventKind::ToolCall, flatten_legacy_tool_call(call)));
    }
    if let Some(Value::Object(output)) = fields.remove("tool_output") {
        return Ok((EventKind::ToolOutput, output));
    }
    if fields.contains_key("done") {
        return Ok((EventKind::Done, fields));
    }
    if fields.contains_key("trace_id") {
        return Err(ClassifyError::Metadata);
    }
    let keys = fields.keys().cloned().collect::<Vec<_>>().join(",");
    Err(ClassifyError::UnrecognizedShape(keys))
}

fn normalize_tagged(kind: EventKind, mut fields: Map<String, Value>) -> Map<String, Value> {
    match kind {
        EventKind::Error => {
            let message = fields
                .remove("error")
                .or_else(|| fields.remove("message"))
                .map(|value| error_text(&value))
                .unwrap_or_else(|| "unknown stream error".to_string());
            fields.insert("error".into(), Value::String(message));
        }
        EventKind::TitleComplete if !fields.contains_key("title") => {
            if let Some(title) = fields.remove("title_complete") {
                fields.insert("title".into(), Value::String(value_text(&title)));
            }
        }
        EventKind::ToolCall if !fields.contains_key("tool_name") => {
            if let Some(name) = fields.remove("name").or_else(|| fields.remove("tool")) {
                fields.insert("tool_name".into(), name);
            }
        }
        _ => {}
    }
    fields
}

fn flatten_legacy_tool_call(mut call: Map<String, Value>) -> Map<String, Value> {
    let name = call
        .remove("tool_name")
        .or_else(|| call.remove("name"))
        .or_else(|| call.remove("tool"));
    let arguments = call.remove("arguments").or_else(|| call.remove("command"));
    let mut payload = Map::new();
    if let Some(name) = name {
        payload.insert("tool_name".into(), name);
    }
    if let Some(arguments) = arguments {
        payload.insert("arguments".into(), arguments);
    }
    if let Some(call_id) = call.remove("call_id") {
        payload.insert("call_id".into(), call_id);
    }
    payload
}

const TASK_ID_FIELDS: [&str; 2] = ["task_id", "taskId"];

/// Task id carried by a raw frame: the first non-blank `task_id` / `taskId`.
///
/// Non-string ids (numbers) are accepted as their JSON text.
pub(crate) fn frame_task_id(raw: &Value) -> Option<String> {
    let object = raw.as_object()?;
    TASK_ID_FIELDS
        .iter()
        .filter_map(|key| object.get(*key).and_then(field_string))
        .find(|id| !id.trim().is_empty())
}

fn take_task_id(fields: &mut Map<String, Value>) -> Option<String> {
    // Both fields leave the payload even when the first one wins.
    let removed: Vec<Value> = TASK_ID_FIELDS
        .iter()
        .filter_map(|key| fields.remove(*key))
        .collect();
    removed
        .iter()
        .filter_map(field_string)
        .find(|id| !id.trim().is_empty())
}

fn take_string(fields: &mut Map<String, Value>, key: &str) -> Option<String> {
    fields.remove(key).as_ref().and_then(field_string)
}

fn field_string(value: &Value) -> Option<String> {
    match value {
        Value::String(value) => Some(value.clone()),
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

fn error_text(value: &Value) -> String {
    match value {
        Value::Object(inner) => inner
            .get("message")
            .and_then(Value::as_str)
            .map(ToOwned::to_owned)
            .unwrap_or_else(|| value.to_string()),
        other => value_text(other),
    }
}

pub(crate) fn value_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}
