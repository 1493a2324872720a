//! HTTP implementation of the generation agent gateway.
//!
//! Speaks an assistants-style API: sessions are server-side threads, runs
//! stream server-sent events, and the file-listing extraction goes through
//! the chat-completions function-calling endpoint. Everything here is
//! boundary plumbing; event mapping is kept pure so it can be tested without
//! a network.

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures_util::StreamExt;
use serde::Deserialize;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::config::AgentSettings;

use super::{
    ADVANCE_ACTION, AgentEvent, AgentEventStream, AgentRole, AgentRun, DesignListing, GenerationAgent,
    MessageRole, RunId, SessionId,
};

/// System prompt for the listing-extraction call.
const EXTRACTION_PROMPT: &str = r#"You extract information from a smart contract design document. Report:
- the project name (the main contract name, e.g. "liquidity_pool"),
- the list of files in the src folder,
- the list of files in the tests folder.

Do NOT include Cargo.toml, documentation files, or any non-Rust files.
Prefix src files with "src/" and test files with "test/" when the prefix is
missing. The order of files in each list MUST match the order they appear in
the design document."#;

/// Real gateway to the external agent service.
pub struct HttpGenerationAgent {
    http: reqwest::Client,
    settings: AgentSettings,
}

#[derive(Deserialize)]
struct CreatedObject {
    id: String,
}

impl HttpGenerationAgent {
    pub fn new(settings: AgentSettings) -> Self {
        Self {
            http: reqwest::Client::new(),
            settings,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.settings.base_url.trim_end_matches('/'), path)
    }

    fn advance_action_tool() -> serde_json::Value {
        serde_json::json!({
            "type": "function",
            "function": {
                "name": ADVANCE_ACTION,
                "description": "Start the contract generation process once all information has been gathered.",
                "parameters": {
                    "type": "object",
                    "properties": {},
                    "required": [],
                    "additionalProperties": false
                },
                "strict": true
            }
        })
    }

    fn extraction_function() -> serde_json::Value {
        serde_json::json!({
            "name": "extract_file_names",
            "description": "Extracts the project name and the source and test file lists from a design document.",
            "parameters": {
                "type": "object",
                "properties": {
                    "project_name": {
                        "type": "string",
                        "description": "The name of the contract project"
                    },
                    "src_folder_files": {
                        "type": "array",
                        "items": {"type": "string"},
                        "description": "Source file paths in design-document order"
                    },
                    "test_folder_files": {
                        "type": "array",
                        "items": {"type": "string"},
                        "description": "Test file paths in design-document order"
                    }
                },
                "required": ["project_name", "src_folder_files", "test_folder_files"]
            }
        })
    }
}

#[async_trait]
impl GenerationAgent for HttpGenerationAgent {
    async fn create_session(&self) -> Result<SessionId> {
        let created: CreatedObject = self
            .http
            .post(self.url("threads"))
            .bearer_auth(&self.settings.api_key)
            .json(&serde_json::json!({}))
            .send()
            .await
            .context("Failed to reach agent service")?
            .error_for_status()
            .context("Agent service rejected session creation")?
            .json()
            .await
            .context("Invalid session-creation response")?;
        Ok(SessionId::new(created.id))
    }

    async fn add_message(
        &self,
        session: &SessionId,
        role: MessageRole,
        content: &str,
    ) -> Result<()> {
        self.http
            .post(self.url(&format!("threads/{}/messages", session)))
            .bearer_auth(&self.settings.api_key)
            .json(&serde_json::json!({
                "role": role.as_str(),
                "content": content,
            }))
            .send()
            .await
            .context("Failed to reach agent service")?
            .error_for_status()
            .context("Agent service rejected message")?;
        Ok(())
    }

    async fn start_run(
        &self,
        session: &SessionId,
        role: AgentRole,
        declare_advance_action: bool,
    ) -> Result<AgentRun> {
        let mut body = serde_json::json!({
            "assistant_id": self.settings.assistants.for_role(role),
            "stream": true,
        });
        if declare_advance_action {
            body["tools"] = serde_json::json!([Self::advance_action_tool()]);
        }

        let response = self
            .http
            .post(self.url(&format!("threads/{}/runs", session)))
            .bearer_auth(&self.settings.api_key)
            .json(&body)
            .send()
            .await
            .context("Failed to reach agent service")?
            .error_for_status()
            .context("Agent service rejected run")?;

        let (id_tx, id_rx) = oneshot::channel();
        let (event_tx, event_rx) = mpsc::channel(64);
        tokio::spawn(pump_run_stream(response, id_tx, event_tx));

        let id = id_rx
            .await
            .context("Run stream ended before announcing a run id")?;
        Ok(AgentRun {
            id,
            events: receiver_stream(event_rx),
        })
    }

    async fn cancel_run(&self, session: &SessionId, run: &RunId) -> Result<()> {
        self.http
            .post(self.url(&format!("threads/{}/runs/{}/cancel", session, run.as_str())))
            .bearer_auth(&self.settings.api_key)
            .send()
            .await
            .context("Failed to reach agent service")?
            .error_for_status()
            .context("Agent service rejected run cancellation")?;
        Ok(())
    }

    async fn extract_listing(&self, designer_output: &str) -> Result<DesignListing> {
        let body = serde_json::json!({
            "model": self.settings.extract_model,
            "messages": [
                {"role": "system", "content": EXTRACTION_PROMPT},
                {"role": "assistant", "content": designer_output},
            ],
            "functions": [Self::extraction_function()],
            "function_call": {"name": "extract_file_names"},
        });

        let value: serde_json::Value = self
            .http
            .post(self.url("chat/completions"))
            .bearer_auth(&self.settings.api_key)
            .json(&body)
            .send()
            .await
            .context("Failed to reach agent service")?
            .error_for_status()
            .context("Agent service rejected extraction call")?
            .json()
            .await
            .context("Invalid extraction response")?;

        let arguments = value
            .pointer("/choices/0/message/function_call/arguments")
            .and_then(|v| v.as_str())
            .context("Extraction response carried no function-call arguments")?;
        serde_json::from_str(arguments).context("Extraction arguments did not match the listing schema")
    }
}

/// Wrap the pump task's channel as a pull-based event stream.
fn receiver_stream(rx: mpsc::Receiver<Result<AgentEvent>>) -> AgentEventStream {
    Box::pin(futures::stream::unfold(rx, |mut rx| async move {
        rx.recv().await.map(|item| (item, rx))
    }))
}

/// What one server-sent event means to the consumer.
#[derive(Debug, PartialEq)]
enum SseAction {
    RunCreated(RunId),
    Emit(AgentEvent),
}

/// Map one SSE `event`/`data` pair to consumer actions. Unknown event kinds
/// and unparsable payloads map to nothing; the stream stays total.
fn map_sse_event(event_name: &str, data: &str) -> Vec<SseAction> {
    let value: serde_json::Value = match serde_json::from_str(data) {
        Ok(v) => v,
        Err(_) => {
            debug!(event = event_name, "Dropping non-JSON stream payload");
            return Vec::new();
        }
    };

    match event_name {
        "thread.run.created" => value
            .get("id")
            .and_then(|v| v.as_str())
            .map(|id| vec![SseAction::RunCreated(RunId::new(id))])
            .unwrap_or_default(),
        "thread.message.created" => vec![SseAction::Emit(AgentEvent::MessageStart)],
        "thread.message.delta" => {
            let mut text = String::new();
            if let Some(parts) = value.pointer("/delta/content").and_then(|v| v.as_array()) {
                for part in parts {
                    if let Some(t) = part.pointer("/text/value").and_then(|v| v.as_str()) {
                        text.push_str(t);
                    }
                }
            }
            if text.is_empty() {
                Vec::new()
            } else {
                vec![SseAction::Emit(AgentEvent::TextDelta(text))]
            }
        }
        "thread.run.requires_action" => value
            .pointer("/required_action/submit_tool_outputs/tool_calls")
            .and_then(|v| v.as_array())
            .map(|calls| {
                calls
                    .iter()
                    .filter_map(|call| call.pointer("/function/name").and_then(|v| v.as_str()))
                    .map(|name| {
                        SseAction::Emit(AgentEvent::ActionRequested {
                            name: name.to_string(),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default(),
        "thread.run.completed" => vec![SseAction::Emit(AgentEvent::Completed)],
        "thread.run.failed" => {
            let message = value
                .pointer("/last_error/message")
                .and_then(|v| v.as_str())
                .unwrap_or("run failed")
                .to_string();
            vec![SseAction::Emit(AgentEvent::Failed { message })]
        }
        // Cancelled runs just end; the consumer sees the stream close.
        _ => Vec::new(),
    }
}

/// Read the SSE body line by line, forwarding mapped events until the stream
/// ends. The run id goes out through the oneshot as soon as it is announced.
async fn pump_run_stream(
    response: reqwest::Response,
    id_tx: oneshot::Sender<RunId>,
    event_tx: mpsc::Sender<Result<AgentEvent>>,
) {
    let mut id_tx = Some(id_tx);
    let mut body = response.bytes_stream();
    let mut buf: Vec<u8> = Vec::new();
    let mut event_name = String::new();

    while let Some(chunk) = body.next().await {
        let bytes = match chunk {
            Ok(bytes) => bytes,
            Err(e) => {
                let err = anyhow::Error::new(e).context("Agent stream transport failed");
                if event_tx.send(Err(err)).await.is_err() {
                    debug!("Agent stream consumer went away during transport failure");
                }
                return;
            }
        };
        buf.extend_from_slice(&bytes);

        while let Some(nl) = buf.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = buf.drain(..=nl).collect();
            let line = String::from_utf8_lossy(&line);
            let line = line.trim_end();

            if line.is_empty() {
                event_name.clear();
                continue;
            }
            if let Some(name) = line.strip_prefix("event:") {
                event_name = name.trim().to_string();
                continue;
            }
            let Some(data) = line.strip_prefix("data:") else {
                continue;
            };
            let data = data.trim();
            if data == "[DONE]" {
                return;
            }

            for action in map_sse_event(&event_name, data) {
                match action {
                    SseAction::RunCreated(id) => {
                        if let Some(tx) = id_tx.take() {
                            if tx.send(id).is_err() {
                                warn!("Run starter went away before receiving the run id");
                                return;
                            }
                        }
                    }
                    SseAction::Emit(event) => {
                        if event_tx.send(Ok(event)).await.is_err() {
                            // Consumer dropped the stream; stop pumping.
                            return;
                        }
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_run_created_yields_run_id() {
        let actions = map_sse_event("thread.run.created", r#"{"id":"run_42"}"#);
        assert_eq!(actions, vec![SseAction::RunCreated(RunId::new("run_42"))]);
    }

    #[test]
    fn test_map_message_delta_concatenates_text_parts() {
        let data = r#"{"delta":{"content":[
            {"type":"text","text":{"value":"Hello "}},
            {"type":"text","text":{"value":"world"}}
        ]}}"#;
        let actions = map_sse_event("thread.message.delta", data);
        assert_eq!(
            actions,
            vec![SseAction::Emit(AgentEvent::TextDelta("Hello world".to_string()))]
        );
    }

    #[test]
    fn test_map_requires_action_extracts_function_names() {
        let data = r#"{"required_action":{"submit_tool_outputs":{"tool_calls":[
            {"type":"function","function":{"name":"generate_contract","arguments":"{}"}}
        ]}}}"#;
        let actions = map_sse_event("thread.run.requires_action", data);
        assert_eq!(
            actions,
            vec![SseAction::Emit(AgentEvent::ActionRequested {
                name: "generate_contract".to_string()
            })]
        );
    }

    #[test]
    fn test_map_run_failed_carries_message() {
        let data = r#"{"last_error":{"code":"rate_limit_exceeded","message":"slow down"}}"#;
        let actions = map_sse_event("thread.run.failed", data);
        assert_eq!(
            actions,
            vec![SseAction::Emit(AgentEvent::Failed {
                message: "slow down".to_string()
            })]
        );
    }

    #[test]
    fn test_map_unknown_or_malformed_events_are_dropped() {
        assert!(map_sse_event("thread.run.step.created", r#"{"id":"x"}"#).is_empty());
        assert!(map_sse_event("thread.message.delta", "not json").is_empty());
        assert!(map_sse_event("thread.run.cancelled", r#"{"id":"run_1"}"#).is_empty());
    }

    #[test]
    fn test_extraction_function_schema_shape() {
        let schema = HttpGenerationAgent::extraction_function();
        assert_eq!(schema["name"], "extract_file_names");
        let required = schema["parameters"]["required"].as_array().unwrap();
        assert!(required.iter().any(|v| v == "project_name"));
        assert!(required.iter().any(|v| v == "src_folder_files"));
        assert!(required.iter().any(|v| v == "test_folder_files"));
    }

    #[test]
    fn test_advance_action_tool_declares_the_trigger() {
        let tool = HttpGenerationAgent::advance_action_tool();
        assert_eq!(tool["function"]["name"], ADVANCE_ACTION);
        assert_eq!(tool["type"], "function");
    }

    #[test]
    fn test_extraction_prompt_states_the_rules() {
        assert!(EXTRACTION_PROMPT.contains("project name"));
        assert!(EXTRACTION_PROMPT.contains("src/"));
        assert!(EXTRACTION_PROMPT.contains("test/"));
        assert!(EXTRACTION_PROMPT.contains("order"));
    }
}
