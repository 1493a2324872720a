//! Stream delta router.
//!
//! Drives one stage's agent run to completion: pulls events off the run's
//! stream, pushes prose deltas or extracted code chunks to the stage's
//! channel, and reports the accumulated output plus whether the agent
//! requested the advance action. The router is the single consumer of the
//! run's stream, so the fence machine's state never sees concurrent feeds.

use futures_util::StreamExt;
use tracing::debug;

use crate::agent::{AgentEvent, AgentRole, AgentRun, GenerationAgent, SessionId};
use crate::errors::PipelineError;
use crate::events::{ChannelId, EventSink, OutboundEvent};
use crate::fence::{self, ExtractorState, Segment};

/// How a stage's deltas are classified on the way out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageMode {
    /// Deltas go to the client verbatim as incremental prose.
    Prose,
    /// Deltas run through the fence extractor; code segments go out as
    /// chunks tagged with the target file path, prose segments are fence
    /// noise and are dropped.
    Code { file_path: String },
}

/// How the router treats an agent-declared structured action.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdvancePolicy {
    /// Structured actions are ignored.
    Ignore,
    /// The named action sets the trigger flag and cancels the in-flight run;
    /// remaining deltas are drained without reaching the client.
    CancelOnAction(&'static str),
}

/// What a finished stage hands back to the coordinator.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StageOutcome {
    /// Concatenation of every delta, independent of fence parsing. This is
    /// the canonical stage output.
    pub full_text: String,
    /// The agent declared the advance action during the run.
    pub action_requested: bool,
    /// The run signalled normal completion (false for cancelled runs).
    pub completed: bool,
}

/// One in-flight stage invocation.
pub struct StageRun {
    session: SessionId,
    role: AgentRole,
    mode: StageMode,
    accumulated: String,
    action_requested: bool,
    completed: bool,
    cancelled: bool,
    extractor: ExtractorState,
}

impl StageRun {
    pub fn new(session: SessionId, role: AgentRole, mode: StageMode) -> Self {
        Self {
            session,
            role,
            mode,
            accumulated: String::new(),
            action_requested: false,
            completed: false,
            cancelled: false,
            extractor: ExtractorState::default(),
        }
    }

    /// Consume the run's event stream to its end, emitting outbound events
    /// along the way. Returns the stage outcome, or the first failure.
    pub async fn drive(
        mut self,
        agent: &dyn GenerationAgent,
        sink: &dyn EventSink,
        channel: &ChannelId,
        run: AgentRun,
        advance: AdvancePolicy,
    ) -> Result<StageOutcome, PipelineError> {
        let mut events = run.events;

        while let Some(item) = events.next().await {
            let event = item.map_err(PipelineError::agent)?;
            match event {
                AgentEvent::MessageStart => {
                    sink.publish(
                        channel,
                        OutboundEvent::MessageStart {
                            thread_id: self.session.as_str().to_string(),
                        },
                    )
                    .await?;
                }
                AgentEvent::TextDelta(delta) => {
                    self.accumulated.push_str(&delta);
                    if self.cancelled {
                        continue;
                    }
                    self.route_delta(sink, channel, &delta).await?;
                }
                AgentEvent::ActionRequested { name } => {
                    if let AdvancePolicy::CancelOnAction(expected) = advance {
                        if name == expected {
                            debug!(role = ?self.role, action = %name, "Advance action requested; cancelling run");
                            self.action_requested = true;
                            self.cancelled = true;
                            agent
                                .cancel_run(&self.session, &run.id)
                                .await
                                .map_err(PipelineError::agent)?;
                        }
                    }
                }
                AgentEvent::Completed => {
                    self.completed = true;
                    if !self.cancelled {
                        self.finish_stream(sink, channel).await?;
                    }
                }
                AgentEvent::Failed { message } => {
                    return Err(PipelineError::Agent { message });
                }
            }
        }

        Ok(StageOutcome {
            full_text: self.accumulated,
            action_requested: self.action_requested,
            completed: self.completed,
        })
    }

    async fn route_delta(
        &mut self,
        sink: &dyn EventSink,
        channel: &ChannelId,
        delta: &str,
    ) -> Result<(), PipelineError> {
        match &self.mode {
            StageMode::Prose => {
                sink.publish(
                    channel,
                    OutboundEvent::ChatResponse {
                        message: delta.to_string(),
                        thread_id: self.session.as_str().to_string(),
                        is_complete: false,
                    },
                )
                .await?;
            }
            StageMode::Code { file_path } => {
                let (state, segments) = fence::feed(std::mem::take(&mut self.extractor), delta);
                self.extractor = state;
                for segment in segments {
                    if let Segment::Code(content) = segment {
                        sink.publish(
                            channel,
                            OutboundEvent::CodeChunk {
                                content,
                                file_path: file_path.clone(),
                                thread_id: self.session.as_str().to_string(),
                            },
                        )
                        .await?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Emit the stage's final event: the full prose text, or a flush of any
    /// code still buffered in an unterminated block.
    async fn finish_stream(
        &mut self,
        sink: &dyn EventSink,
        channel: &ChannelId,
    ) -> Result<(), PipelineError> {
        match &self.mode {
            StageMode::Prose => {
                sink.publish(
                    channel,
                    OutboundEvent::ChatResponse {
                        message: self.accumulated.clone(),
                        thread_id: self.session.as_str().to_string(),
                        is_complete: true,
                    },
                )
                .await?;
            }
            StageMode::Code { file_path } => {
                if let Some(Segment::Code(content)) =
                    fence::finish(std::mem::take(&mut self.extractor))
                {
                    sink.publish(
                        channel,
                        OutboundEvent::CodeChunk {
                            content,
                            file_path: file_path.clone(),
                            thread_id: self.session.as_str().to_string(),
                        },
                    )
                    .await?;
                }
            }
        }
        Ok(())
    }
}
