//! Runtime configuration.
//!
//! Built from environment variables (a `.env` file is loaded first by
//! `main`), with the bind address and database path overridable from the
//! CLI. The per-role assistant ids are required: without them no stage can
//! run.

use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};

use crate::agent::AgentRole;

/// Default listen address for `anvil serve`.
pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:8080";

/// Default SQLite database location.
pub const DEFAULT_DB_PATH: &str = "anvil.db";

/// Top-level service configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: SocketAddr,
    pub database_path: PathBuf,
    pub agent: AgentSettings,
}

/// Settings for the HTTP generation agent gateway.
#[derive(Debug, Clone)]
pub struct AgentSettings {
    pub base_url: String,
    pub api_key: String,
    /// Model used for the listing-extraction call.
    pub extract_model: String,
    pub assistants: AssistantIds,
}

/// The assistant backing each pipeline role.
#[derive(Debug, Clone)]
pub struct AssistantIds {
    pub clarifier: String,
    pub designer: String,
    pub builder: String,
    pub test_builder: String,
    pub documenter: String,
}

impl AssistantIds {
    pub fn for_role(&self, role: AgentRole) -> &str {
        match role {
            AgentRole::Clarifier => &self.clarifier,
            AgentRole::Designer => &self.designer,
            AgentRole::Builder => &self.builder,
            AgentRole::TestBuilder => &self.test_builder,
            AgentRole::Documenter => &self.documenter,
        }
    }
}

impl Config {
    /// Read the configuration from the environment, applying CLI overrides
    /// for the bind address and database path when given.
    pub fn from_env(bind: Option<String>, db: Option<PathBuf>) -> Result<Self> {
        let bind = bind
            .or_else(|| std::env::var("ANVIL_BIND_ADDR").ok())
            .unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string());
        let bind_addr: SocketAddr = bind
            .parse()
            .with_context(|| format!("Invalid bind address: {bind}"))?;

        let database_path = db
            .or_else(|| std::env::var("ANVIL_DB_PATH").ok().map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DB_PATH));

        Ok(Self {
            bind_addr,
            database_path,
            agent: AgentSettings::from_env()?,
        })
    }
}

impl AgentSettings {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            base_url: std::env::var("AGENT_BASE_URL")
                .unwrap_or_else(|_| "https://api.openai.com/v1".to_string()),
            api_key: required("AGENT_API_KEY")?,
            extract_model: std::env::var("AGENT_EXTRACT_MODEL")
                .unwrap_or_else(|_| "gpt-4o".to_string()),
            assistants: AssistantIds {
                clarifier: required("ASSISTANT_CLARIFIER_ID")?,
                designer: required("ASSISTANT_DESIGNER_ID")?,
                builder: required("ASSISTANT_BUILDER_ID")?,
                test_builder: required("ASSISTANT_TEST_BUILDER_ID")?,
                documenter: required("ASSISTANT_DOCUMENTER_ID")?,
            },
        })
    }
}

fn required(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("Missing required environment variable: {key}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_for_role_maps_every_role() {
        let ids = AssistantIds {
            clarifier: "a1".to_string(),
            designer: "a2".to_string(),
            builder: "a3".to_string(),
            test_builder: "a4".to_string(),
            documenter: "a5".to_string(),
        };
        assert_eq!(ids.for_role(AgentRole::Clarifier), "a1");
        assert_eq!(ids.for_role(AgentRole::Designer), "a2");
        assert_eq!(ids.for_role(AgentRole::Builder), "a3");
        assert_eq!(ids.for_role(AgentRole::TestBuilder), "a4");
        assert_eq!(ids.for_role(AgentRole::Documenter), "a5");
    }

    #[test]
    fn test_from_env_with_overrides_and_full_environment() {
        // Single test touching the process environment, to avoid races
        // between parallel tests over shared keys.
        for (key, value) in [
            ("AGENT_API_KEY", "sk-test"),
            ("ASSISTANT_CLARIFIER_ID", "asst_c"),
            ("ASSISTANT_DESIGNER_ID", "asst_d"),
            ("ASSISTANT_BUILDER_ID", "asst_b"),
            ("ASSISTANT_TEST_BUILDER_ID", "asst_t"),
            ("ASSISTANT_DOCUMENTER_ID", "asst_m"),
        ] {
            unsafe { std::env::set_var(key, value) };
        }

        let config = Config::from_env(
            Some("0.0.0.0:9999".to_string()),
            Some(PathBuf::from("/tmp/anvil-test.db")),
        )
        .unwrap();

        assert_eq!(config.bind_addr.port(), 9999);
        assert_eq!(config.database_path, PathBuf::from("/tmp/anvil-test.db"));
        assert_eq!(config.agent.api_key, "sk-test");
        assert_eq!(config.agent.base_url, "https://api.openai.com/v1");
        assert_eq!(config.agent.extract_model, "gpt-4o");
        assert_eq!(config.agent.assistants.designer, "asst_d");
    }

    #[test]
    fn test_invalid_bind_address_is_rejected() {
        let err = Config::from_env(Some("not-an-addr".to_string()), None);
        assert!(err.is_err());
    }
}
