//! LLM WebUI core library: configuration, the `llm` collaborator, request shaping,
//! conversation bookkeeping, the HTTP server and front-end application state.

pub mod chats;
pub mod client;
pub mod config;
pub mod conversations;
pub mod exec;
pub mod llm;
pub mod params;
pub mod server;
