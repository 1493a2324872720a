//! Stage coordinator.
//!
//! Drives the ordered generation stages for one session: clarify on each
//! user turn until the agent declares the advance action, then design,
//! listing extraction, a strictly sequential build loop over the derived
//! files, persistence, and notification. Stage streams are consumed to
//! completion before the next stage starts; later files see earlier ones
//! through the shared build session.
//!
//! Every stage failure funnels through [`Coordinator::fail`], which emits
//! the user-visible `error` event and bumps the failure counters. Nothing is
//! silently swallowed, and no partial file list is ever persisted.

pub mod listing;

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::agent::{ADVANCE_ACTION, AgentRole, GenerationAgent, MessageRole, SessionId};
use crate::errors::PipelineError;
use crate::events::{ChannelId, EventSink, FileStatus, OutboundEvent};
use crate::manifest;
use crate::store::{FileEntry, GenerationRecord, StoreHandle};
use crate::stream::{AdvancePolicy, StageMode, StageRun};

/// Fixed prose sent on the chat channel after a successful run.
const FEEDBACK_MESSAGE: &str = "We would greatly appreciate feedback on the generated contract. \
Once you have reviewed it, please tell us what worked and what did not so we can keep improving. \
This is an early prototype and vast improvements are still possible.";

/// External collaborators, constructed once at process start and passed in
/// explicitly so tests can substitute fakes.
#[derive(Clone)]
pub struct Services {
    pub agent: Arc<dyn GenerationAgent>,
    pub events: Arc<dyn EventSink>,
    pub store: StoreHandle,
}

/// Sequences the generation stages for incoming turns.
pub struct Coordinator {
    services: Services,
}

impl Coordinator {
    pub fn new(services: Services) -> Self {
        Self { services }
    }

    /// Resolve the session for a turn: reuse the caller-supplied thread id,
    /// or create a fresh session when none was given.
    pub async fn ensure_session(
        &self,
        thread_id: Option<String>,
    ) -> Result<SessionId, PipelineError> {
        match thread_id {
            Some(id) if !id.trim().is_empty() => Ok(SessionId::new(id)),
            _ => {
                let session = self
                    .services
                    .agent
                    .create_session()
                    .await
                    .map_err(PipelineError::agent)?;
                info!(session = %session, "Created new session");
                Ok(session)
            }
        }
    }

    /// Process one user turn end to end. Failures never escape: they funnel
    /// into the error event and the failure counters.
    pub async fn process_turn(&self, session: SessionId, channel: ChannelId, input: String) {
        if let Err(err) = self.run_turn(&session, &channel, &input).await {
            self.fail(&channel, &err).await;
        }
    }

    async fn run_turn(
        &self,
        session: &SessionId,
        channel: &ChannelId,
        input: &str,
    ) -> Result<(), PipelineError> {
        let agent = self.services.agent.as_ref();

        agent
            .add_message(session, MessageRole::User, input)
            .await
            .map_err(PipelineError::agent)?;

        info!(session = %session, "Running clarifier");
        let run = agent
            .start_run(session, AgentRole::Clarifier, true)
            .await
            .map_err(PipelineError::agent)?;
        let outcome = StageRun::new(session.clone(), AgentRole::Clarifier, StageMode::Prose)
            .drive(
                agent,
                self.services.events.as_ref(),
                channel,
                run,
                AdvancePolicy::CancelOnAction(ADVANCE_ACTION),
            )
            .await?;

        if outcome.action_requested {
            info!(session = %session, "Advance trigger fired; starting generation");
            self.run_generation(session, channel, input).await?;
        }
        Ok(())
    }

    /// Design → extract listing → manifest → build each file → persist →
    /// notify. Strictly sequential; the build loop must not be parallelized
    /// because each file's context depends on earlier output in the shared
    /// build session.
    async fn run_generation(
        &self,
        session: &SessionId,
        channel: &ChannelId,
        prompt: &str,
    ) -> Result<(), PipelineError> {
        let agent = self.services.agent.as_ref();
        let sink = self.services.events.as_ref();

        // Design, reusing the clarification session for its context.
        info!(session = %session, "Running designer");
        let run = agent
            .start_run(session, AgentRole::Designer, false)
            .await
            .map_err(PipelineError::agent)?;
        let design = StageRun::new(session.clone(), AgentRole::Designer, StageMode::Prose)
            .drive(agent, sink, channel, run, AdvancePolicy::Ignore)
            .await?;
        if design.full_text.trim().is_empty() {
            return Err(PipelineError::EmptyDesignOutput);
        }

        let design_listing = agent
            .extract_listing(&design.full_text)
            .await
            .map_err(PipelineError::Extraction)?;
        let ordered = listing::order_files(&design_listing);
        info!(
            project = %design_listing.project_name,
            files = ordered.len(),
            "Derived build plan"
        );

        // The structure goes out before any file content streams.
        let tree = manifest::build(&design_listing.project_name, &ordered);
        sink.publish(channel, OutboundEvent::InitialStructure { structure: tree })
            .await?;

        // One shared build session, seeded with the design, so later files
        // can reference earlier ones.
        let build_session = agent.create_session().await.map_err(PipelineError::agent)?;
        agent
            .add_message(&build_session, MessageRole::User, &design.full_text)
            .await
            .map_err(PipelineError::agent)?;

        let mut files = BTreeMap::new();
        for path in &ordered {
            let content = self.build_file(&build_session, channel, path).await?;
            files.insert(
                path.clone(),
                FileEntry {
                    content,
                    path: path.clone(),
                },
            );
        }

        let record = GenerationRecord {
            record_id: Uuid::new_v4().to_string(),
            project_name: design_listing.project_name.clone(),
            prompt: prompt.to_string(),
            file_metrics: listing::compute_metrics(files.keys().map(String::as_str)),
            files,
            timestamp: Utc::now(),
            status: "completed".to_string(),
        };
        let record_id = record.record_id.clone();
        self.services
            .store
            .save_record(record)
            .await
            .map_err(PipelineError::Store)?;
        info!(record_id = %record_id, project = %design_listing.project_name, "Persisted generation record");

        sink.publish(
            channel,
            OutboundEvent::ContractSaved {
                contract_id: record_id,
                project_name: design_listing.project_name,
            },
        )
        .await?;
        sink.publish(
            channel,
            OutboundEvent::ChatResponse {
                message: FEEDBACK_MESSAGE.to_string(),
                thread_id: session.as_str().to_string(),
                is_complete: true,
            },
        )
        .await?;
        Ok(())
    }

    /// Generate one file in the shared build session, streaming its code
    /// chunks and bracketing the run with status events.
    async fn build_file(
        &self,
        build_session: &SessionId,
        channel: &ChannelId,
        path: &str,
    ) -> Result<String, PipelineError> {
        let agent = self.services.agent.as_ref();
        let sink = self.services.events.as_ref();
        info!(file = path, "Building file");

        agent
            .add_message(
                build_session,
                MessageRole::User,
                &format!("Generate the code for {path}"),
            )
            .await
            .map_err(PipelineError::agent)?;
        agent
            .add_message(build_session, MessageRole::User, &listing::context_message(path))
            .await
            .map_err(PipelineError::agent)?;

        sink.publish(
            channel,
            OutboundEvent::FileGenerationStatus {
                file_path: path.to_string(),
                status: FileStatus::Generating,
                content: None,
            },
        )
        .await?;

        let role = listing::role_for_path(path);
        let run = agent
            .start_run(build_session, role, false)
            .await
            .map_err(PipelineError::agent)?;
        let outcome = StageRun::new(
            build_session.clone(),
            role,
            StageMode::Code {
                file_path: path.to_string(),
            },
        )
        .drive(agent, sink, channel, run, AdvancePolicy::Ignore)
        .await?;

        sink.publish(
            channel,
            OutboundEvent::FileGenerationStatus {
                file_path: path.to_string(),
                status: FileStatus::Complete,
                content: Some(outcome.full_text.clone()),
            },
        )
        .await?;
        Ok(outcome.full_text)
    }

    /// Single failure funnel: user-visible `error` event plus the failure
    /// tally. Already-emitted events are not compensated; a store failure
    /// after completed file events leaves the client ahead of the record.
    pub async fn fail(&self, channel: &ChannelId, err: &PipelineError) {
        error!(error = %err, "Generation pipeline failed");
        let message = format!("Error generating contract: {err}");
        if let Err(publish_err) = self
            .services
            .events
            .publish(channel, OutboundEvent::Error { message })
            .await
        {
            warn!(error = %publish_err, "Could not deliver error event");
        }
        if let Err(store_err) = self
            .services
            .store
            .record_failure(err.to_string(), Utc::now())
            .await
        {
            warn!(error = %store_err, "Could not record failure counters");
        }
    }
}
