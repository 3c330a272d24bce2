//! The `llm` collaborator: discovery, prompt/chat execution and log queries.
//!
//! [`Collaborator`] is the seam the HTTP layer talks to; [`LlmCli`] implements it by
//! running the `llm` command-line tool.

mod cli;

pub use cli::{parse_models, parse_templates, parse_tools, LlmCli};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::conversations::LogRow;
use crate::exec::{ExecError, TextStream};
use crate::params::{ChatInvocation, PromptInvocation};

#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error(transparent)]
    Exec(#[from] ExecError),
    #[error("failed to parse {what} output: {source}")]
    Parse {
        what: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

/// A model the collaborator can run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelInfo {
    #[serde(alias = "model_id")]
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(default)]
    pub aliases: Vec<String>,
    #[serde(default = "default_true", alias = "can_stream")]
    pub supports_streaming: bool,
    #[serde(default, alias = "supports_tool_use")]
    pub supports_tools: bool,
}

fn default_true() -> bool {
    true
}

impl ModelInfo {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
            provider: None,
            aliases: Vec::new(),
            supports_streaming: true,
            supports_tools: false,
        }
    }
}

/// A tool the collaborator can call during generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInfo {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Help text for the CLI or one of its subcommands.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HelpText {
    pub command: String,
    pub help: String,
}

#[async_trait]
pub trait Collaborator: Send + Sync {
    async fn list_models(&self) -> Result<Vec<ModelInfo>, LlmError>;

    async fn list_templates(&self) -> Result<Vec<String>, LlmError>;

    async fn list_tools(&self) -> Result<Vec<ToolInfo>, LlmError>;

    /// Run a prompt to completion and return the full text.
    async fn prompt(&self, invocation: &PromptInvocation) -> Result<String, LlmError>;

    /// Run a prompt and relay its output as it is produced.
    async fn prompt_stream(&self, invocation: &PromptInvocation) -> Result<TextStream, LlmError>;

    /// Send one chat turn (continuing `conversation_id` when set) and relay the reply.
    async fn chat_stream(&self, invocation: &ChatInvocation) -> Result<TextStream, LlmError>;

    /// Most recent `count` rows, newest first; `0` means all rows.
    async fn logs(&self, count: usize) -> Result<Vec<LogRow>, LlmError>;

    /// All rows of one conversation, oldest first. Unknown ids yield an empty list.
    async fn conversation_logs(&self, conversation_id: &str) -> Result<Vec<LogRow>, LlmError>;

    /// Help for `path` (e.g. `["logs", "list"]`); never fails because the command exited non-zero.
    async fn help(&self, path: &[String]) -> Result<HelpText, LlmError>;
}
