//! REST handlers. Listing and log endpoints answer with JSON; prompt and chat relay text.

use axum::{
    body::Body,
    extract::{rejection::JsonRejection, Path, Query, State},
    http::{header, HeaderMap, HeaderValue},
    response::{IntoResponse, Response},
    Json,
};
use bytes::Bytes;
use futures_util::{future, stream, StreamExt};
use serde_json::json;
use std::convert::Infallible;

use super::error::ApiError;
use super::protocol::{
    ConversationsQuery, HelpQuery, LogsQuery, PromptResponse, TemplatesResponse, CHAT_ID_HEADER,
    CONVERSATION_ID_HEADER,
};
use super::ServerState;
use crate::chats::ChatStatus;
use crate::conversations::{self, ConversationSummary, LogRow};
use crate::exec::{split_args, TextStream};
use crate::llm::{Collaborator, HelpText, ModelInfo, ToolInfo};
use crate::params::{ChatRequest, PromptRequest};

/// Rows scanned when looking up the conversation a new chat created.
const RESOLVE_WINDOW: usize = 20;

pub(super) async fn health() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

pub(super) async fn models(
    State(state): State<ServerState>,
) -> Result<Json<Vec<ModelInfo>>, ApiError> {
    let models = state
        .collaborator
        .list_models()
        .await
        .map_err(|e| ApiError::collaborator("Failed to get models", e))?;
    Ok(Json(models))
}

pub(super) async fn templates(
    State(state): State<ServerState>,
) -> Result<Json<TemplatesResponse>, ApiError> {
    let templates = state
        .collaborator
        .list_templates()
        .await
        .map_err(|e| ApiError::collaborator("Failed to get templates", e))?;
    Ok(Json(TemplatesResponse { templates }))
}

pub(super) async fn tools(
    State(state): State<ServerState>,
) -> Result<Json<Vec<ToolInfo>>, ApiError> {
    let tools = state
        .collaborator
        .list_tools()
        .await
        .map_err(|e| ApiError::collaborator("Failed to get tools", e))?;
    Ok(Json(tools))
}

pub(super) async fn prompt(
    State(state): State<ServerState>,
    payload: Result<Json<PromptRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(request) = payload?;
    let streaming = request.stream;
    let invocation = request.into_invocation().map_err(ApiError::bad_request)?;
    log::info!(
        "prompt: model={} stream={} attachments={}",
        invocation.model.as_deref().unwrap_or("default"),
        streaming,
        invocation.attachments.len()
    );

    if streaming {
        let body = state
            .collaborator
            .prompt_stream(&invocation)
            .await
            .map_err(|e| ApiError::collaborator("LLM command failed", e))?;
        Ok(text_stream_response(body, HeaderMap::new()))
    } else {
        let response = state
            .collaborator
            .prompt(&invocation)
            .await
            .map_err(|e| ApiError::collaborator("LLM command failed", e))?;
        Ok(Json(PromptResponse { response }).into_response())
    }
}

pub(super) async fn chat(
    State(state): State<ServerState>,
    payload: Result<Json<ChatRequest>, JsonRejection>,
) -> Result<Response, ApiError> {
    let Json(request) = payload?;
    let invocation = request.into_invocation().map_err(ApiError::bad_request)?;
    // llm stamps rows with second precision.
    let since = chrono::Utc::now().naive_utc() - chrono::Duration::seconds(1);
    let chat_id = state.chats.start(invocation.conversation_id.clone()).await;
    log::info!(
        "chat {}: model={} conversation={}",
        chat_id,
        invocation.model.as_deref().unwrap_or("default"),
        invocation.conversation_id.as_deref().unwrap_or("new")
    );

    let body = match state.collaborator.chat_stream(&invocation).await {
        Ok(body) => body,
        Err(e) => {
            state.chats.complete(&chat_id, None).await;
            return Err(ApiError::collaborator("LLM chat failed", e));
        }
    };

    let mut headers = HeaderMap::new();
    if let Ok(value) = HeaderValue::from_str(&chat_id) {
        headers.insert(CHAT_ID_HEADER, value);
    }
    if let Some(value) = invocation
        .conversation_id
        .as_deref()
        .and_then(|cid| HeaderValue::from_str(cid).ok())
    {
        headers.insert(CONVERSATION_ID_HEADER, value);
    }

    let finish = {
        let state = state.clone();
        let known = invocation.conversation_id.clone();
        let message = invocation.message.clone();
        async move {
            let resolved = match known {
                Some(cid) => Some(cid),
                None => created_conversation(state.collaborator.as_ref(), &message, since).await,
            };
            match &resolved {
                Some(cid) => log::debug!("chat {} belongs to conversation {}", chat_id, cid),
                None => log::warn!("chat {}: could not resolve its conversation", chat_id),
            }
            state.chats.complete(&chat_id, resolved).await;
        }
    };
    // Runs once the reply has been fully relayed; dropped with the body if the client goes away.
    let trailer = stream::once(finish).filter_map(|()| future::ready(None::<Bytes>));
    Ok(text_stream_response(Box::pin(body.chain(trailer)), headers))
}

async fn created_conversation(
    collaborator: &dyn Collaborator,
    message: &str,
    since: chrono::NaiveDateTime,
) -> Option<String> {
    match collaborator.logs(RESOLVE_WINDOW).await {
        Ok(rows) => conversations::resolve_new_conversation(&rows, message, Some(since)),
        Err(e) => {
            log::warn!("reading logs after chat failed: {}", e);
            None
        }
    }
}

pub(super) async fn chat_status(
    State(state): State<ServerState>,
    Path(chat_id): Path<String>,
) -> Result<Json<ChatStatus>, ApiError> {
    state
        .chats
        .get(&chat_id)
        .await
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Unknown chat: {}", chat_id)))
}

pub(super) async fn logs(
    State(state): State<ServerState>,
    Query(query): Query<LogsQuery>,
) -> Result<Json<Vec<LogRow>>, ApiError> {
    let count = query.count.unwrap_or(state.config.logs.default_count);
    let rows = state
        .collaborator
        .logs(count)
        .await
        .map_err(|e| ApiError::collaborator("Failed to get logs", e))?;
    Ok(Json(rows))
}

pub(super) async fn conversations(
    State(state): State<ServerState>,
    Query(query): Query<ConversationsQuery>,
) -> Result<Json<Vec<ConversationSummary>>, ApiError> {
    let limit = query.limit.unwrap_or(state.config.logs.conversation_limit);
    let rows = state
        .collaborator
        .logs(0)
        .await
        .map_err(|e| ApiError::collaborator("Failed to get conversations", e))?;
    Ok(Json(conversations::summarize(&rows, limit)))
}

pub(super) async fn conversation(
    State(state): State<ServerState>,
    Path(conversation_id): Path<String>,
) -> Result<Json<Vec<LogRow>>, ApiError> {
    let rows = state
        .collaborator
        .conversation_logs(&conversation_id)
        .await
        .map_err(|e| ApiError::collaborator("Failed to get conversation", e))?;
    Ok(Json(rows))
}

pub(super) async fn help(
    State(state): State<ServerState>,
    Query(query): Query<HelpQuery>,
) -> Result<Json<HelpText>, ApiError> {
    let raw = query.path.unwrap_or_default();
    let path = split_args(&raw)
        .unwrap_or_else(|_| raw.split_whitespace().map(str::to_string).collect());
    let help = state
        .collaborator
        .help(&path)
        .await
        .map_err(|e| ApiError::collaborator("Failed to get help", e))?;
    Ok(Json(help))
}

/// Relay a text stream as `text/plain` without buffering.
fn text_stream_response(body: TextStream, extra: HeaderMap) -> Response {
    let mut response = Response::new(Body::from_stream(body.map(Ok::<_, Infallible>)));
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.extend(extra);
    response
}
