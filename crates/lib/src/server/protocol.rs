//! Response bodies and query parameters of the REST surface.

use serde::{Deserialize, Serialize};

/// Set on every `POST /api/chat` response; look the send up at `GET /api/chat/{id}`.
pub const CHAT_ID_HEADER: &str = "x-chat-id";
/// Set on `POST /api/chat` responses when the request continued a known conversation.
pub const CONVERSATION_ID_HEADER: &str = "x-conversation-id";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplatesResponse {
    pub templates: Vec<String>,
}

/// Non-streaming `POST /api/prompt` result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptResponse {
    pub response: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadResponse {
    pub path: String,
    pub filename: String,
    pub mimetype: String,
    pub size: usize,
}

#[derive(Debug, Default, Deserialize)]
pub struct LogsQuery {
    pub count: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ConversationsQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
pub struct HelpQuery {
    pub path: Option<String>,
}
