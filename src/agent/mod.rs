//! Generation agent gateway.
//!
//! The pipeline treats the external agent service as an opaque capability:
//! sessions hold conversational context, runs stream deltas, and a
//! structured-output call turns a design document into a file listing. The
//! `GenerationAgent` trait is that boundary; `http::HttpGenerationAgent` is
//! the real implementation and tests script their own.

pub mod http;

use std::pin::Pin;

use anyhow::Result;
use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};

/// Name of the structured action the Clarifier declares when enough
/// information has been gathered to start generating.
pub const ADVANCE_ACTION: &str = "generate_contract";

/// Identifier of one agent-side conversation thread.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SessionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of one in-flight run, needed to cancel it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunId(String);

impl RunId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// The specialized agent backing one pipeline stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AgentRole {
    Clarifier,
    Designer,
    Builder,
    TestBuilder,
    Documenter,
}

/// Author of a message appended to a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageRole {
    User,
    Assistant,
}

impl MessageRole {
    pub fn as_str(self) -> &'static str {
        match self {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
        }
    }
}

/// One event of a streaming run, in delivery order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AgentEvent {
    /// The agent started producing a message.
    MessageStart,
    /// One incremental chunk of text; boundaries are arbitrary.
    TextDelta(String),
    /// The agent declared a structured action by name.
    ActionRequested { name: String },
    /// The run finished normally.
    Completed,
    /// The run failed agent-side.
    Failed { message: String },
}

/// Ordered event stream of one run. Dropping it releases the underlying
/// transport; server-side generation stops via [`GenerationAgent::cancel_run`].
pub type AgentEventStream = Pin<Box<dyn Stream<Item = Result<AgentEvent>> + Send>>;

/// A started run: its id plus the events to pull.
pub struct AgentRun {
    pub id: RunId,
    pub events: AgentEventStream,
}

/// Structured listing extracted from a Designer document.
///
/// Field names mirror the extraction schema the agent service is given.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DesignListing {
    pub project_name: String,
    #[serde(rename = "src_folder_files", default)]
    pub src_files: Vec<String>,
    #[serde(rename = "test_folder_files", default)]
    pub test_files: Vec<String>,
}

/// Boundary to the external generation service.
#[async_trait]
pub trait GenerationAgent: Send + Sync {
    /// Create a fresh conversation session.
    async fn create_session(&self) -> Result<SessionId>;

    /// Append a message to a session without running an agent.
    async fn add_message(
        &self,
        session: &SessionId,
        role: MessageRole,
        content: &str,
    ) -> Result<()>;

    /// Start a streaming run of the given role on a session. When
    /// `declare_advance_action` is set, the run is offered the
    /// [`ADVANCE_ACTION`] tool so the agent can signal stage advancement.
    async fn start_run(
        &self,
        session: &SessionId,
        role: AgentRole,
        declare_advance_action: bool,
    ) -> Result<AgentRun>;

    /// Cancel an in-flight run, stopping further token generation.
    async fn cancel_run(&self, session: &SessionId, run: &RunId) -> Result<()>;

    /// Derive the project listing from a Designer document via the service's
    /// structured-output capability.
    async fn extract_listing(&self, designer_output: &str) -> Result<DesignListing>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_design_listing_deserializes_schema_field_names() {
        let json = serde_json::json!({
            "project_name": "liquidity_pool",
            "src_folder_files": ["src/lib.rs", "src/pool.rs"],
            "test_folder_files": ["test/pool_test.rs"]
        });
        let listing: DesignListing = serde_json::from_value(json).unwrap();
        assert_eq!(listing.project_name, "liquidity_pool");
        assert_eq!(listing.src_files.len(), 2);
        assert_eq!(listing.test_files, vec!["test/pool_test.rs"]);
    }

    #[test]
    fn test_design_listing_tolerates_missing_file_arrays() {
        let listing: DesignListing =
            serde_json::from_value(serde_json::json!({"project_name": "solo"})).unwrap();
        assert!(listing.src_files.is_empty());
        assert!(listing.test_files.is_empty());
    }

    #[test]
    fn test_message_role_wire_names() {
        assert_eq!(MessageRole::User.as_str(), "user");
        assert_eq!(MessageRole::Assistant.as_str(), "assistant");
    }
}
