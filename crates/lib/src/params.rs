//! Request shaping: JSON bodies for prompt and chat, and their conversion into
//! collaborator invocations (options split, extra arguments tokenized, blanks dropped).

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::exec::{split_args, ExecError};

/// Option keys with this prefix are forwarded as reasoning parameters, prefix stripped.
pub const REASONING_PREFIX: &str = "reasoning.";

fn default_stream() -> bool {
    true
}

/// Body of `POST /api/prompt`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptRequest {
    pub prompt: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub system: Option<String>,
    #[serde(default)]
    pub template: Option<String>,
    #[serde(default)]
    pub tools: Option<Vec<String>>,
    #[serde(default)]
    pub attachments: Option<Vec<String>>,
    /// `[[path, mimetype], ...]`
    #[serde(default)]
    pub attachment_types: Option<Vec<(String, String)>>,
    #[serde(default)]
    pub options: Option<BTreeMap<String, serde_json::Value>>,
    #[serde(default)]
    pub reasoning: Option<BTreeMap<String, serde_json::Value>>,
    /// Raw extra CLI flags, shell-quoted (e.g. `--no-log -o seed 1`).
    #[serde(default)]
    pub extra_args: Option<String>,
    #[serde(default = "default_stream")]
    pub stream: bool,
}

/// Body of `POST /api/chat`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub conversation_id: Option<String>,
    #[serde(default)]
    pub system: Option<String>,
    #[serde(default)]
    pub tools: Option<Vec<String>>,
    #[serde(default)]
    pub options: Option<BTreeMap<String, serde_json::Value>>,
    #[serde(default)]
    pub reasoning: Option<BTreeMap<String, serde_json::Value>>,
    #[serde(default)]
    pub extra_args: Option<String>,
}

/// A validated prompt execution.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PromptInvocation {
    pub prompt: String,
    pub model: Option<String>,
    pub system: Option<String>,
    pub template: Option<String>,
    pub tools: Vec<String>,
    pub options: BTreeMap<String, String>,
    pub reasoning: BTreeMap<String, String>,
    pub attachments: Vec<String>,
    pub attachment_types: Vec<(String, String)>,
    pub extra_args: Vec<String>,
}

/// A validated chat turn.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChatInvocation {
    pub message: String,
    pub model: Option<String>,
    pub conversation_id: Option<String>,
    pub system: Option<String>,
    pub tools: Vec<String>,
    pub options: BTreeMap<String, String>,
    pub reasoning: BTreeMap<String, String>,
    pub extra_args: Vec<String>,
}

impl PromptRequest {
    /// A blank prompt is accepted only when a template or attachment supplies the input.
    pub fn into_invocation(self) -> Result<PromptInvocation, ExecError> {
        let (options, reasoning) = merge_options(self.options, self.reasoning);
        let invocation = PromptInvocation {
            prompt: self.prompt,
            model: non_blank(self.model),
            system: non_blank(self.system),
            template: non_blank(self.template),
            tools: non_blank_list(self.tools),
            options,
            reasoning,
            attachments: non_blank_list(self.attachments),
            attachment_types: self
                .attachment_types
                .unwrap_or_default()
                .into_iter()
                .filter(|(path, mime)| !path.trim().is_empty() && !mime.trim().is_empty())
                .collect(),
            extra_args: extra_args(self.extra_args.as_deref())?,
        };
        if invocation.prompt.trim().is_empty()
            && invocation.template.is_none()
            && invocation.attachments.is_empty()
        {
            return Err(ExecError::InvalidArgs("prompt is empty".to_string()));
        }
        Ok(invocation)
    }
}

impl ChatRequest {
    pub fn into_invocation(self) -> Result<ChatInvocation, ExecError> {
        if self.message.trim().is_empty() {
            return Err(ExecError::InvalidArgs("message is empty".to_string()));
        }
        let (options, reasoning) = merge_options(self.options, self.reasoning);
        Ok(ChatInvocation {
            message: self.message,
            model: non_blank(self.model),
            conversation_id: non_blank(self.conversation_id),
            system: non_blank(self.system),
            tools: non_blank_list(self.tools),
            options,
            reasoning,
            extra_args: extra_args(self.extra_args.as_deref())?,
        })
    }
}

/// Split raw options into (options, reasoning). Keys starting with [`REASONING_PREFIX`] go to reasoning with the
/// prefix stripped; every other key (including a bare `reasoning.`) stays in options. No key lands in both.
pub fn split_options(
    raw: BTreeMap<String, String>,
) -> (BTreeMap<String, String>, BTreeMap<String, String>) {
    let mut options = BTreeMap::new();
    let mut reasoning = BTreeMap::new();
    for (key, value) in raw {
        match key.strip_prefix(REASONING_PREFIX) {
            Some(stripped) if !stripped.is_empty() => {
                reasoning.insert(stripped.to_string(), value);
            }
            _ => {
                options.insert(key, value);
            }
        }
    }
    (options, reasoning)
}

/// Split the request's options, then lay explicitly supplied reasoning entries over the split ones.
fn merge_options(
    options: Option<BTreeMap<String, serde_json::Value>>,
    reasoning: Option<BTreeMap<String, serde_json::Value>>,
) -> (BTreeMap<String, String>, BTreeMap<String, String>) {
    let (options, mut split_reasoning) = split_options(stringify_values(options));
    split_reasoning.extend(stringify_values(reasoning));
    (options, split_reasoning)
}

fn stringify_values(map: Option<BTreeMap<String, serde_json::Value>>) -> BTreeMap<String, String> {
    map.unwrap_or_default()
        .into_iter()
        .filter(|(k, _)| !k.trim().is_empty())
        .filter_map(|(k, v)| json_value_to_string(&v).map(|s| (k, s)))
        .collect()
}

/// Strings pass through raw; numbers and booleans are stringified; null means "unset".
fn json_value_to_string(v: &serde_json::Value) -> Option<String> {
    match v {
        serde_json::Value::Null => None,
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        serde_json::Value::Bool(b) => Some(b.to_string()),
        other => Some(other.to_string()),
    }
}

fn non_blank(s: Option<String>) -> Option<String> {
    s.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

fn non_blank_list(list: Option<Vec<String>>) -> Vec<String> {
    list.unwrap_or_default()
        .into_iter()
        .filter_map(|s| non_blank(Some(s)))
        .collect()
}

fn extra_args(raw: Option<&str>) -> Result<Vec<String>, ExecError> {
    match raw {
        Some(s) if !s.trim().is_empty() => split_args(s),
        _ => Ok(Vec::new()),
    }
}
