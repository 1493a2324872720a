//! Typed error hierarchy for the generation pipeline.
//!
//! `PipelineError` covers every stage-level failure the coordinator can hit;
//! all variants funnel through the same handler, which emits a user-visible
//! `error` event and records the failure in the analytics counters.

use thiserror::Error;

/// Errors raised while driving a generation pipeline for one session.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The Designer stage returned blank output. Fatal, never retried.
    #[error("Designer output was empty")]
    EmptyDesignOutput,

    /// A failure while streaming from the generation agent.
    #[error("Agent stream failed: {message}")]
    Agent { message: String },

    /// The structured-extraction step could not derive a file listing.
    #[error("Failed to extract file listing from design: {0}")]
    Extraction(#[source] anyhow::Error),

    /// The durable store rejected a write.
    #[error("Failed to persist generation record: {0}")]
    Store(#[source] anyhow::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl PipelineError {
    /// Wrap a boundary error from the agent gateway, flattening its chain
    /// into the message the `error` event will carry.
    pub fn agent(err: anyhow::Error) -> Self {
        Self::Agent {
            message: format!("{err:#}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_design_output_is_matchable() {
        let err = PipelineError::EmptyDesignOutput;
        assert!(matches!(err, PipelineError::EmptyDesignOutput));
        assert!(err.to_string().contains("empty"));
    }

    #[test]
    fn agent_error_carries_message() {
        let err = PipelineError::Agent {
            message: "connection reset".to_string(),
        };
        match &err {
            PipelineError::Agent { message } => assert_eq!(message, "connection reset"),
            _ => panic!("Expected Agent variant"),
        }
    }

    #[test]
    fn agent_constructor_flattens_context_chain() {
        let inner = anyhow::anyhow!("socket closed").context("run stream ended early");
        let err = PipelineError::agent(inner);
        match &err {
            PipelineError::Agent { message } => {
                assert!(message.contains("run stream ended early"));
                assert!(message.contains("socket closed"));
            }
            _ => panic!("Expected Agent variant"),
        }
    }

    #[test]
    fn pipeline_error_converts_from_anyhow() {
        let err: PipelineError = anyhow::anyhow!("boom").into();
        assert!(matches!(err, PipelineError::Other(_)));
    }

    #[test]
    fn all_variants_implement_std_error() {
        fn assert_std_error<E: std::error::Error>(_: &E) {}
        assert_std_error(&PipelineError::EmptyDesignOutput);
        assert_std_error(&PipelineError::Store(anyhow::anyhow!("disk full")));
    }
}
