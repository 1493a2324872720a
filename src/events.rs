//! Outbound event types and the broadcast seam.
//!
//! Every user-visible artifact of a pipeline run leaves the process as one
//! `OutboundEvent` addressed to a channel. The concrete transport lives
//! behind `EventSink` so the coordinator and router never know whether they
//! are talking to the WebSocket fan-out or a test capture.

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::manifest::ManifestNode;

/// Opaque routing key naming one subscribed client. Supplied by the caller;
/// no server-side lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelId(String);

impl ChannelId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ChannelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Generation progress of one file in the build stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    Generating,
    Complete,
}

/// Events pushed to subscribed clients, discriminated by `event` with the
/// payload under `data`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum OutboundEvent {
    #[serde(rename = "message_start")]
    MessageStart { thread_id: String },

    /// Incremental prose delta (`is_complete: false`) or the final form
    /// repeating the full accumulated text (`is_complete: true`).
    #[serde(rename = "chat-response")]
    ChatResponse {
        message: String,
        thread_id: String,
        is_complete: bool,
    },

    #[serde(rename = "code-chunk")]
    CodeChunk {
        content: String,
        #[serde(rename = "filePath")]
        file_path: String,
        thread_id: String,
    },

    /// The manifest tree, emitted once before any file content streams.
    #[serde(rename = "initial-structure")]
    InitialStructure { structure: ManifestNode },

    #[serde(rename = "file-generation-status")]
    FileGenerationStatus {
        #[serde(rename = "filePath")]
        file_path: String,
        status: FileStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        content: Option<String>,
    },

    #[serde(rename = "contract-saved")]
    ContractSaved {
        contract_id: String,
        project_name: String,
    },

    #[serde(rename = "error")]
    Error { message: String },
}

/// Delivery seam for outbound events.
///
/// Real implementation: `server::ws::WsBroadcaster`. Tests substitute a
/// capturing sink. Publish failures propagate as stage failures.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn publish(&self, channel: &ChannelId, event: OutboundEvent) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chat_response_wire_shape() {
        let event = OutboundEvent::ChatResponse {
            message: "hello".to_string(),
            thread_id: "thread_1".to_string(),
            is_complete: false,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "chat-response");
        assert_eq!(json["data"]["message"], "hello");
        assert_eq!(json["data"]["is_complete"], false);
    }

    #[test]
    fn test_code_chunk_uses_camel_case_file_path() {
        let event = OutboundEvent::CodeChunk {
            content: "fn main() {}".to_string(),
            file_path: "src/lib.rs".to_string(),
            thread_id: "thread_1".to_string(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["event"], "code-chunk");
        assert_eq!(json["data"]["filePath"], "src/lib.rs");
        assert!(json["data"].get("file_path").is_none());
    }

    #[test]
    fn test_file_generation_status_omits_absent_content() {
        let event = OutboundEvent::FileGenerationStatus {
            file_path: "src/lib.rs".to_string(),
            status: FileStatus::Generating,
            content: None,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["data"]["status"], "generating");
        assert!(json["data"].get("content").is_none());

        let event = OutboundEvent::FileGenerationStatus {
            file_path: "src/lib.rs".to_string(),
            status: FileStatus::Complete,
            content: Some("done".to_string()),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["data"]["status"], "complete");
        assert_eq!(json["data"]["content"], "done");
    }

    #[test]
    fn test_message_start_and_error_shapes() {
        let json = serde_json::to_value(OutboundEvent::MessageStart {
            thread_id: "t".to_string(),
        })
        .unwrap();
        assert_eq!(json["event"], "message_start");

        let json = serde_json::to_value(OutboundEvent::Error {
            message: "boom".to_string(),
        })
        .unwrap();
        assert_eq!(json["event"], "error");
        assert_eq!(json["data"]["message"], "boom");
    }

    #[test]
    fn test_round_trip_through_json() {
        let event = OutboundEvent::ContractSaved {
            contract_id: "abc".to_string(),
            project_name: "vault".to_string(),
        };
        let json = serde_json::to_string(&event).unwrap();
        let back: OutboundEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back, event);
    }
}
