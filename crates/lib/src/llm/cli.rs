//! [`Collaborator`] backed by the `llm` command-line tool.

use async_trait::async_trait;
use std::collections::BTreeMap;

use super::{Collaborator, HelpText, LlmError, ModelInfo, ToolInfo};
use crate::config::{self, Config};
use crate::conversations::{sort_chronologically, LogRow};
use crate::exec::{llm_runner, CommandRunner, TextStream};
use crate::params::{ChatInvocation, PromptInvocation};

/// Runs `llm` subcommands through an allowlisted [`CommandRunner`].
#[derive(Debug, Clone)]
pub struct LlmCli {
    runner: CommandRunner,
}

impl LlmCli {
    pub fn new(runner: CommandRunner) -> Self {
        Self { runner }
    }

    /// Binary from config (or LLM_WEBUI_LLM_BIN) plus configured extra environment.
    pub fn from_config(config: &Config) -> Self {
        let runner = llm_runner(config::resolve_llm_binary(config)).with_env(config.llm.env.clone());
        Self::new(runner)
    }
}

fn args(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|s| s.to_string()).collect()
}

/// `-o KEY VALUE` per option, then reasoning as one JSON object under `-o reasoning`.
fn push_options(
    argv: &mut Vec<String>,
    options: &BTreeMap<String, String>,
    reasoning: &BTreeMap<String, String>,
) {
    for (key, value) in options {
        argv.extend(["-o".to_string(), key.clone(), value.clone()]);
    }
    if !reasoning.is_empty() {
        let json = serde_json::to_string(reasoning).unwrap_or_else(|_| "{}".to_string());
        argv.extend(["-o".to_string(), "reasoning".to_string(), json]);
    }
}

/// argv for `llm prompt`. Extra flags go before the prompt text; a prompt that looks like a flag is guarded with `--`.
pub(crate) fn prompt_args(inv: &PromptInvocation) -> Vec<String> {
    let mut argv = args(&["prompt"]);
    if let Some(ref model) = inv.model {
        argv.extend(["-m".to_string(), model.clone()]);
    }
    if let Some(ref system) = inv.system {
        argv.extend(["-s".to_string(), system.clone()]);
    }
    if let Some(ref template) = inv.template {
        argv.extend(["-t".to_string(), template.clone()]);
    }
    for tool in &inv.tools {
        argv.extend(["-T".to_string(), tool.clone()]);
    }
    push_options(&mut argv, &inv.options, &inv.reasoning);
    for path in &inv.attachments {
        argv.extend(["-a".to_string(), path.clone()]);
    }
    for (path, mime) in &inv.attachment_types {
        argv.extend(["--at".to_string(), path.clone(), mime.clone()]);
    }
    argv.extend(inv.extra_args.iter().cloned());
    if inv.prompt.trim().is_empty() {
        return argv;
    }
    if inv.prompt.starts_with('-') {
        argv.push("--".to_string());
    }
    argv.push(inv.prompt.clone());
    argv
}

/// argv for `llm chat`; the message itself goes to stdin.
pub(crate) fn chat_args(inv: &ChatInvocation) -> Vec<String> {
    let mut argv = args(&["chat"]);
    if let Some(ref model) = inv.model {
        argv.extend(["-m".to_string(), model.clone()]);
    }
    if let Some(ref cid) = inv.conversation_id {
        argv.extend(["--cid".to_string(), cid.clone()]);
    }
    if let Some(ref system) = inv.system {
        argv.extend(["-s".to_string(), system.clone()]);
    }
    for tool in &inv.tools {
        argv.extend(["-T".to_string(), tool.clone()]);
    }
    push_options(&mut argv, &inv.options, &inv.reasoning);
    argv.extend(inv.extra_args.iter().cloned());
    argv
}

/// `llm chat` reads one line per turn; multi-line messages use its `!multi` ... `!end` block.
pub(crate) fn chat_input(message: &str) -> String {
    if message.contains('\n') {
        format!("!multi\n{}\n!end", message)
    } else {
        message.to_string()
    }
}

/// Parse `llm models list` output: JSON (array, or object with `models`), else text lines
/// like `OpenAI Chat: gpt-4o-mini (aliases: 4o-mini)`.
pub fn parse_models(stdout: &str) -> Vec<ModelInfo> {
    let trimmed = stdout.trim();
    if let Ok(value) = serde_json::from_str::<serde_json::Value>(trimmed) {
        let items = match value {
            serde_json::Value::Array(items) => items,
            serde_json::Value::Object(mut obj) => match obj.remove("models") {
                Some(serde_json::Value::Array(items)) => items,
                _ => Vec::new(),
            },
            _ => Vec::new(),
        };
        return items
            .into_iter()
            .filter_map(|item| match item {
                serde_json::Value::String(id) => Some(ModelInfo::new(id)),
                other => match serde_json::from_value::<ModelInfo>(other) {
                    Ok(m) => Some(m),
                    Err(e) => {
                        log::debug!("skipping model entry: {}", e);
                        None
                    }
                },
            })
            .collect();
    }
    trimmed.lines().filter_map(parse_model_line).collect()
}

fn parse_model_line(line: &str) -> Option<ModelInfo> {
    if line.starts_with(char::is_whitespace) || line.starts_with("Default:") {
        return None;
    }
    let (provider, rest) = line.split_once(": ")?;
    let rest = rest.trim();
    let (id, aliases) = match rest.split_once(" (aliases: ") {
        Some((id, tail)) => {
            let aliases = tail
                .trim_end_matches(')')
                .split(',')
                .map(|a| a.trim().to_string())
                .filter(|a| !a.is_empty())
                .collect();
            (id.trim(), aliases)
        }
        None => (rest, Vec::new()),
    };
    if id.is_empty() {
        return None;
    }
    let mut model = ModelInfo::new(id);
    model.provider = Some(provider.trim().to_string());
    model.aliases = aliases;
    Some(model)
}

/// Parse `llm templates list`: one template per non-empty line, name before ` : ` when present.
pub fn parse_templates(stdout: &str) -> Vec<String> {
    stdout
        .lines()
        .map(|line| line.split_once(" : ").map(|(name, _)| name).unwrap_or(line).trim())
        .filter(|name| !name.is_empty())
        .map(String::from)
        .collect()
}

/// Parse `llm tools list --json`: an array, or an object with `tools` as an array or a name-keyed map.
/// Entries are names or `{name, description}` records.
pub fn parse_tools(stdout: &str) -> Result<Vec<ToolInfo>, serde_json::Error> {
    let trimmed = stdout.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }
    let value: serde_json::Value = serde_json::from_str(trimmed)?;
    let items: Vec<serde_json::Value> = match value {
        serde_json::Value::Array(items) => items,
        serde_json::Value::Object(mut obj) => match obj.remove("tools") {
            Some(serde_json::Value::Array(items)) => items,
            Some(serde_json::Value::Object(map)) => map
                .into_iter()
                .map(|(name, mut info)| {
                    if let Some(o) = info.as_object_mut() {
                        o.entry("name").or_insert(serde_json::Value::String(name));
                        info
                    } else {
                        serde_json::Value::String(name)
                    }
                })
                .collect(),
            _ => Vec::new(),
        },
        _ => Vec::new(),
    };
    Ok(items
        .into_iter()
        .filter_map(|item| match item {
            serde_json::Value::String(name) => Some(ToolInfo {
                name,
                description: None,
            }),
            other => serde_json::from_value::<ToolInfo>(other).ok(),
        })
        .collect())
}

fn parse_log_rows(stdout: &str) -> Result<Vec<LogRow>, LlmError> {
    let trimmed = stdout.trim();
    if trimmed.is_empty() {
        return Ok(Vec::new());
    }
    serde_json::from_str(trimmed).map_err(|source| LlmError::Parse {
        what: "logs",
        source,
    })
}

#[async_trait]
impl Collaborator for LlmCli {
    async fn list_models(&self) -> Result<Vec<ModelInfo>, LlmError> {
        let out = self.runner.run(&args(&["models", "list", "--json"])).await?;
        Ok(parse_models(&out))
    }

    async fn list_templates(&self) -> Result<Vec<String>, LlmError> {
        let out = self.runner.run(&args(&["templates", "list"])).await?;
        Ok(parse_templates(&out))
    }

    async fn list_tools(&self) -> Result<Vec<ToolInfo>, LlmError> {
        let out = self.runner.run(&args(&["tools", "list", "--json"])).await?;
        match parse_tools(&out) {
            Ok(tools) => Ok(tools),
            Err(e) => {
                log::warn!("tools list output not understood, reporting none: {}", e);
                Ok(Vec::new())
            }
        }
    }

    async fn prompt(&self, invocation: &PromptInvocation) -> Result<String, LlmError> {
        Ok(self.runner.run(&prompt_args(invocation)).await?)
    }

    async fn prompt_stream(&self, invocation: &PromptInvocation) -> Result<TextStream, LlmError> {
        Ok(self.runner.stream(&prompt_args(invocation), None).await?)
    }

    async fn chat_stream(&self, invocation: &ChatInvocation) -> Result<TextStream, LlmError> {
        let input = chat_input(&invocation.message);
        Ok(self.runner.stream(&chat_args(invocation), Some(input)).await?)
    }

    async fn logs(&self, count: usize) -> Result<Vec<LogRow>, LlmError> {
        let n = count.to_string();
        let out = self
            .runner
            .run(&args(&["logs", "list", "-n", &n, "--json"]))
            .await?;
        parse_log_rows(&out)
    }

    async fn conversation_logs(&self, conversation_id: &str) -> Result<Vec<LogRow>, LlmError> {
        let out = self
            .runner
            .run(&args(&["logs", "list", "-n", "0", "--cid", conversation_id, "--json"]))
            .await?;
        let mut rows = parse_log_rows(&out)?;
        rows.retain(|r| r.conversation_id.as_deref().map_or(true, |c| c == conversation_id));
        sort_chronologically(&mut rows);
        Ok(rows)
    }

    async fn help(&self, path: &[String]) -> Result<HelpText, LlmError> {
        let out = self.runner.help(path).await?;
        let name = self
            .runner
            .binary()
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "llm".to_string());
        let command = std::iter::once(name)
            .chain(path.iter().cloned())
            .chain(std::iter::once("--help".to_string()))
            .collect::<Vec<_>>()
            .join(" ");
        let help = if out.stdout.trim().is_empty() {
            out.stderr
        } else {
            out.stdout
        };
        Ok(HelpText { command, help })
    }
}
