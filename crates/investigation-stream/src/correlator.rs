use std::collections::HashMap;

use serde_json::Value;
use tracing::{debug, warn};

use crate::envelope::{EventEnvelope, value_text};

/// A tool invocation waiting for its result.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PendingToolCall {
    pub call_id: String,
    pub tool_name: String,
    pub arguments: String,
}

/// Normalized tool result; always a `{command, output}` pair.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ToolOutput {
    pub command: String,
    pub output: String,
}

/// Tool call delivered to the tool-call handler.
///
/// `output` is `None` for calls that carried no `call_id` and will never be
/// paired with a result.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ToolCallRecord {
    pub task_id: Option<String>,
    pub call_id: Option<String>,
    pub tool_name: String,
    pub arguments: String,
    pub output: Option<ToolOutput>,
}

/// Pairs `tool_call` and `tool_output` events of one session by `call_id`.
#[derive(Debug, Default)]
pub struct ToolCallCorrelator {
    pending: HashMap<String, PendingToolCall>,
}

impl ToolCallCorrelator {
    /// Records a tool call.
    ///
    /// Calls with a `call_id` are held until their output arrives and yield
    /// `None`; calls without one are returned immediately as incomplete.
    pub fn on_tool_call(&mut self, envelope: &EventEnvelope) -> Option<ToolCallRecord> {
        let tool_name = envelope.str_field("tool_name").unwrap_or_default().to_string();
        let arguments = envelope
            .payload
            .get("arguments")
            .map(value_text)
            .unwrap_or_default();

        let Some(call_id) = envelope.call_id() else {
            debug!(tool_name = %tool_name, "tool call without call_id forwarded as incomplete");
            return Some(ToolCallRecord {
                task_id: envelope.task_id.clone(),
                call_id: None,
                tool_name,
                arguments,
                output: None,
            });
        };

        let pending = PendingToolCall {
            call_id: call_id.to_string(),
            tool_name,
            arguments,
        };
        if self.pending.insert(call_id.to_string(), pending).is_some() {
            warn!(call_id, "duplicate tool call replaced pending entry");
        }
        None
    }

    /// Matches a tool output against its pending call.
    ///
    /// Unmatched outputs are logged and dropped.
    pub fn on_tool_output(&mut self, envelope: &EventEnvelope) -> Option<ToolCallRecord> {
        let Some(call_id) = envelope.call_id() else {
            warn!("tool output without call_id dropped");
            return None;
        };
        let Some(pending) = self.pending.remove(call_id) else {
            warn!(call_id, "no pending tool call for call_id");
            return None;
        };
        let output = normalize_output(envelope.payload.get("output"), &pending.arguments);
        Some(ToolCallRecord {
            task_id: envelope.task_id.clone(),
            call_id: Some(pending.call_id),
            tool_name: pending.tool_name,
            arguments: pending.arguments,
            output: Some(output),
        })
    }

    /// Number of calls waiting for output.
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Returns true while `call_id` waits for its output.
    pub fn is_pending(&self, call_id: &str) -> bool {
        self.pending.contains_key(call_id)
    }

    /// Drops every unmatched call and returns how many were dropped.
    pub fn discard_pending(&mut self) -> usize {
        let count = self.pending.len();
        if count > 0 {
            let call_ids = self.pending.keys().cloned().collect::<Vec<_>>().join(",");
            warn!(count, call_ids = %call_ids, "discarding unmatched tool calls");
        }
        self.pending.clear();
        count
    }
}

fn normalize_output(raw: Option<&Value>, arguments: &str) -> ToolOutput {
    match raw {
        Some(Value::Object(fields)) => ToolOutput {
            command: fields.get("command").map(value_text).unwrap_or_default(),
            output: fields.get("output").map(value_text).unwrap_or_default(),
        },
        // Scalar results carry no command; the call's arguments stand in.
        other => ToolOutput {
            command: arguments.to_string(),
            output: other.map(value_text).unwrap_or_default(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::classify;
    use serde_json::json;

    fn envelope(value: Value) -> EventEnvelope {
        classify(&value).expect("classify")
    }

    fn kubectl_call() -> EventEnvelope {
        envelope(json!({
            "type": "tool_call",
            "task_id": "t1",
            "tool_name": "kubectl",
            "arguments": "get pods",
            "call_id": "c1"
        }))
    }

    #[test]
    fn call_and_output_merge_into_one_record() {
        let mut correlator = ToolCallCorrelator::default();
        assert_eq!(correlator.on_tool_call(&kubectl_call()), None);
        assert!(correlator.is_pending("c1"));

        let record = correlator
            .on_tool_output(&envelope(json!({
                "type": "tool_output",
                "task_id": "t1",
                "call_id": "c1",
                "output": {"command": "get pods", "output": "pod/a Running"}
            })))
            .expect("completed record");

        assert_eq!(
            record,
            ToolCallRecord {
                task_id: Some("t1".into()),
                call_id: Some("c1".into()),
                tool_name: "kubectl".into(),
                arguments: "get pods".into(),
                output: Some(ToolOutput {
                    command: "get pods".into(),
                    output: "pod/a Running".into(),
                }),
            }
        );
        assert!(!correlator.is_pending("c1"));
        assert_eq!(correlator.pending_count(), 0);
    }

    #[test]
    fn scalar_output_uses_call_arguments_as_command() {
        let mut correlator = ToolCallCorrelator::default();
        correlator.on_tool_call(&kubectl_call());
        let record = correlator
            .on_tool_output(&envelope(json!({
                "type": "tool_output", "call_id": "c1", "output": 42
            })))
            .expect("record");
        assert_eq!(
            record.output,
            Some(ToolOutput {
                command: "get pods".into(),
                output: "42".into()
            })
        );
    }

    #[test]
    fn output_without_pending_call_is_dropped() {
        let mut correlator = ToolCallCorrelator::default();
        let output = envelope(json!({"type": "tool_output", "call_id": "nope", "output": "x"}));
        assert_eq!(correlator.on_tool_output(&output), None);
        assert_eq!(correlator.pending_count(), 0);
    }

    #[test]
    fn second_output_for_same_call_is_an_orphan() {
        let mut correlator = ToolCallCorrelator::default();
        correlator.on_tool_call(&kubectl_call());
        let output = envelope(json!({"type": "tool_output", "call_id": "c1", "output": "x"}));
        assert!(correlator.on_tool_output(&output).is_some());
        assert!(correlator.on_tool_output(&output).is_none());
    }

    #[test]
    fn call_without_id_is_forwarded_incomplete() {
        let mut correlator = ToolCallCorrelator::default();
        let record = correlator
            .on_tool_call(&envelope(json!({
                "type": "tool_call",
                "task_id": "t1",
                "tool_name": "helm",
                "arguments": {"release": "api"}
            })))
            .expect("incomplete record");
        assert_eq!(record.call_id, None);
        assert_eq!(record.output, None);
        assert_eq!(record.arguments, "{\"release\":\"api\"}");
        assert_eq!(correlator.pending_count(), 0);
    }

    #[test]
    fn duplicate_call_id_keeps_a_single_entry() {
        let mut correlator = ToolCallCorrelator::default();
        correlator.on_tool_call(&kubectl_call());
        correlator.on_tool_call(&envelope(json!({
            "type": "tool_call", "tool_name": "kubectl", "arguments": "get svc", "call_id": "c1"
        })));
        assert_eq!(correlator.pending_count(), 1);
        let record = correlator
            .on_tool_output(&envelope(json!({"type": "tool_output", "call_id": "c1", "output": "ok"})))
            .expect("record");
        assert_eq!(record.arguments, "get svc");
    }

    #[test]
    fn discard_pending_reports_count() {
        let mut correlator = ToolCallCorrelator::default();
        correlator.on_tool_call(&kubectl_call());
        correlator.on_tool_call(&envelope(json!({
            "type": "tool_call", "tool_name": "helm", "arguments": "list", "call_id": "c2"
        })));
        assert_eq!(correlator.discard_pending(), 2);
        assert_eq!(correlator.discard_pending(), 0);
    }
}
