//! Front-end application state: one explicit [`AppState`] advanced by a pure [`update`].
//!
//! Front ends perform the fetches themselves and feed the outcomes back as [`Event`]s; after
//! each update they re-render and, when `conversation_id` changed, fetch that conversation.
//! `static/app.js` follows the same transitions in the browser.

use serde::{Deserialize, Serialize};

use crate::conversations::{self, ConversationSummary, LogRow, Role, Turn};
use crate::llm::{ModelInfo, ToolInfo};

const FENCE: &str = "```";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tab {
    #[default]
    Prompt,
    Chat,
    Logs,
    Help,
}

/// An uploaded file, referenced by its server-side path in later requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub path: String,
    pub filename: String,
    pub mimetype: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AppState {
    pub tab: Tab,
    pub models: Vec<ModelInfo>,
    pub templates: Vec<String>,
    pub tools: Vec<ToolInfo>,
    pub attachments: Vec<Attachment>,
    pub conversation_id: Option<String>,
    pub conversations: Vec<ConversationSummary>,
    pub messages: Vec<Turn>,
    /// Reply being streamed; the cumulative text received so far.
    pub pending: Option<String>,
    /// Tail of the last chunk that ends inside a multi-byte character.
    pub pending_bytes: Vec<u8>,
    /// Last user-visible problem (failed load, failed send).
    pub notice: Option<String>,
}

/// Outcome of a user action or a finished request. Failures carry the message to show.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    TabSelected(Tab),
    ModelsLoaded(Result<Vec<ModelInfo>, String>),
    TemplatesLoaded(Result<Vec<String>, String>),
    ToolsLoaded(Result<Vec<ToolInfo>, String>),
    AttachmentAdded(Attachment),
    AttachmentRemoved(String),
    UploadFailed(String),
    ConversationsLoaded(Result<Vec<ConversationSummary>, String>),
    ConversationSelected(String),
    MessagesLoaded(Result<Vec<LogRow>, String>),
    NewConversation,
    ChatSent(String),
    ChunkReceived(Vec<u8>),
    /// The reply stream ended; carries the conversation id the server resolved, if any.
    ChatCompleted(Option<String>),
    ChatFailed(String),
    NoticeDismissed,
}

pub fn update(mut state: AppState, event: Event) -> AppState {
    match event {
        Event::TabSelected(tab) => state.tab = tab,
        Event::ModelsLoaded(result) => state.models = loaded(&mut state.notice, "models", result),
        Event::TemplatesLoaded(result) => {
            state.templates = loaded(&mut state.notice, "templates", result)
        }
        Event::ToolsLoaded(result) => state.tools = loaded(&mut state.notice, "tools", result),
        Event::AttachmentAdded(attachment) => {
            if !state.attachments.iter().any(|a| a.path == attachment.path) {
                state.attachments.push(attachment);
            }
        }
        Event::AttachmentRemoved(path) => state.attachments.retain(|a| a.path != path),
        Event::UploadFailed(message) => state.notice = Some(format!("Upload failed: {}", message)),
        Event::ConversationsLoaded(result) => {
            state.conversations = loaded(&mut state.notice, "conversations", result);
            if state.conversation_id.is_none() {
                state.conversation_id = state
                    .conversations
                    .first()
                    .map(|c| c.conversation_id.clone());
            }
        }
        Event::ConversationSelected(id) => {
            if state.conversation_id.as_deref() != Some(id.as_str()) {
                state.messages.clear();
            }
            state.conversation_id = Some(id);
        }
        Event::MessagesLoaded(Ok(rows)) => state.messages = conversations::turns(&rows),
        Event::MessagesLoaded(Err(message)) => {
            state.notice = Some(format!("Failed to load conversation: {}", message))
        }
        Event::NewConversation => {
            state.conversation_id = None;
            state.messages.clear();
            state.pending = None;
            state.pending_bytes.clear();
        }
        Event::ChatSent(message) => {
            state.messages.push(Turn {
                role: Role::User,
                content: message,
            });
            state.pending = Some(String::new());
            state.pending_bytes.clear();
            state.notice = None;
        }
        Event::ChunkReceived(bytes) => {
            state.pending_bytes.extend_from_slice(&bytes);
            let text = decode_available(&mut state.pending_bytes);
            state.pending.get_or_insert_with(String::new).push_str(&text);
        }
        Event::ChatCompleted(resolved) => {
            if !state.pending_bytes.is_empty() {
                let tail = String::from_utf8_lossy(&state.pending_bytes).into_owned();
                state.pending_bytes.clear();
                state.pending.get_or_insert_with(String::new).push_str(&tail);
            }
            if let Some(reply) = state.pending.take() {
                state.messages.push(Turn {
                    role: Role::Assistant,
                    content: reply,
                });
            }
            // Without a resolved id the next ConversationsLoaded adopts the top entry.
            if state.conversation_id.is_none() {
                state.conversation_id = resolved;
            }
        }
        Event::ChatFailed(message) => {
            state.pending = None;
            state.pending_bytes.clear();
            state.notice = Some(format!("Chat failed: {}", message));
        }
        Event::NoticeDismissed => state.notice = None,
    }
    state
}

/// Drains every complete character from `buf`, leaving an unfinished trailing sequence
/// for the next chunk. Invalid sequences become U+FFFD.
pub fn decode_available(buf: &mut Vec<u8>) -> String {
    let mut out = String::new();
    let mut start = 0;
    loop {
        match std::str::from_utf8(&buf[start..]) {
            Ok(text) => {
                out.push_str(text);
                start = buf.len();
                break;
            }
            Err(e) => {
                let valid = start + e.valid_up_to();
                out.push_str(&String::from_utf8_lossy(&buf[start..valid]));
                match e.error_len() {
                    Some(bad) => {
                        out.push(char::REPLACEMENT_CHARACTER);
                        start = valid + bad;
                    }
                    None => {
                        start = valid;
                        break;
                    }
                }
            }
        }
    }
    buf.drain(..start);
    out
}

fn loaded<T>(notice: &mut Option<String>, what: &str, result: Result<Vec<T>, String>) -> Vec<T> {
    result.unwrap_or_else(|message| {
        *notice = Some(format!("Failed to load {}: {}", what, message));
        Vec::new()
    })
}

/// Render the cumulative reply as HTML. Paired ``` fences become `<pre><code>` blocks; an
/// unpaired trailing fence stays literal until its closing fence arrives.
pub fn render_text(full: &str) -> String {
    let parts: Vec<&str> = full.split(FENCE).collect();
    let paired = if parts.len() % 2 == 1 {
        parts.len()
    } else {
        parts.len() - 1
    };
    let mut out = String::with_capacity(full.len() + 32);
    for (i, part) in parts.iter().enumerate() {
        if i >= paired {
            out.push_str(FENCE);
            out.push_str(&escape_html(part));
        } else if i % 2 == 1 {
            out.push_str("<pre><code>");
            out.push_str(&escape_html(strip_language(part)));
            out.push_str("</code></pre>");
        } else {
            out.push_str(&escape_html(part));
        }
    }
    out
}

/// Drop an info string such as `rust` from the first line of a fenced block.
fn strip_language(block: &str) -> &str {
    match block.split_once('\n') {
        Some((first, rest)) if !first.chars().any(char::is_whitespace) => rest,
        _ => block,
    }
}

pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            other => out.push(other),
        }
    }
    out
}
