//! Browser client assets: embedded at build time, or read from disk when reload is on.

use axum::{
    extract::{Path, State},
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use include_dir::{include_dir, Dir};
use std::borrow::Cow;
use std::path::{Component, Path as FsPath, PathBuf};

use super::ServerState;

static EMBEDDED: Dir<'_> = include_dir!("$CARGO_MANIFEST_DIR/static");

#[derive(Debug, Clone)]
pub enum AssetSource {
    Embedded,
    /// Re-read on every request so edits show up without a restart.
    Disk(PathBuf),
}

impl AssetSource {
    pub async fn load(&self, path: &str) -> Option<Cow<'static, [u8]>> {
        if !is_safe_relative(path) {
            return None;
        }
        match self {
            AssetSource::Embedded => EMBEDDED.get_file(path).map(|f| Cow::Borrowed(f.contents())),
            AssetSource::Disk(root) => tokio::fs::read(root.join(path)).await.ok().map(Cow::Owned),
        }
    }
}

fn is_safe_relative(path: &str) -> bool {
    !path.is_empty()
        && FsPath::new(path)
            .components()
            .all(|c| matches!(c, Component::Normal(_)))
}

pub(super) async fn index(State(state): State<ServerState>) -> Response {
    serve(&state.assets, "index.html").await
}

pub(super) async fn static_file(
    State(state): State<ServerState>,
    Path(path): Path<String>,
) -> Response {
    serve(&state.assets, &path).await
}

async fn serve(source: &AssetSource, path: &str) -> Response {
    match source.load(path).await {
        Some(bytes) => {
            let mime = mime_guess::from_path(path).first_or_octet_stream();
            let mut response = bytes.into_owned().into_response();
            if let Ok(value) = HeaderValue::from_str(mime.as_ref()) {
                response.headers_mut().insert(header::CONTENT_TYPE, value);
            }
            if matches!(source, AssetSource::Disk(_)) {
                response
                    .headers_mut()
                    .insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
            }
            response
        }
        None => (StatusCode::NOT_FOUND, "not found").into_response(),
    }
}
