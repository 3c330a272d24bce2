//! Integration tests: start the real server on a free port against a fake `llm` script and
//! drive it over HTTP. Each test gets its own state directory; server tasks are left running
//! when the test ends.
#![cfg(unix)]

use futures_util::StreamExt;
use lib::config::Config;
use lib::server;
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::OnceLock;
use std::time::Duration;

const FAKE_LLM: &str = r#"#!/bin/sh
STATE="${FAKE_LLM_STATE:-/tmp}"

for a in "$@"; do
  if [ "$a" = "--help" ]; then
    printf 'Usage: llm'
    for b in "$@"; do [ "$b" = "--help" ] || printf ' %s' "$b"; done
    printf '\n\nOptions:\n  --help  Show this message and exit.\n'
    exit 0
  fi
done

history() {
cat <<'JSON'
[
  {"id": "r3", "model": "test-model", "prompt": "second question", "response": "second answer", "conversation_id": "conv-a", "datetime_utc": "2024-05-01T10:05:00"},
  {"id": "r2", "model": "other-model", "prompt": "hi b", "response": "hello b", "conversation_id": "conv-b", "datetime_utc": "2024-05-01T09:00:00"},
  {"id": "r1", "model": "test-model", "prompt": "first question", "response": "first answer", "conversation_id": "conv-a", "datetime_utc": "2024-05-01T10:00:00"}
]
JSON
}

cmd="$1"; shift
case "$cmd" in
  models)
    echo '[{"model_id": "test-model", "name": "Test Model", "aliases": ["tm"], "can_stream": true}]'
    ;;
  templates)
    printf 'summarize : Summarize the text\nexplain : Explain like I am five\n'
    ;;
  tools)
    echo '{"tools": [{"name": "llm_time", "description": "Current time"}]}'
    ;;
  prompt)
    model=""; prompt=""; atts=0
    while [ $# -gt 0 ]; do
      case "$1" in
        -m) model="$2"; shift 2 ;;
        -s|-t|-T) shift 2 ;;
        -a)
          if [ ! -f "$2" ]; then echo "Error: attachment not found: $2" >&2; exit 1; fi
          atts=$((atts + 1)); shift 2 ;;
        -o|--at) shift 3 ;;
        --) prompt="$2"; shift 2 ;;
        *) prompt="$1"; shift ;;
      esac
    done
    if [ "$model" = "broken" ]; then echo "Error: Unknown model: broken" >&2; exit 1; fi
    if [ "$prompt" = "count" ]; then
      printf 'one '; sleep 0.2; printf 'two '; sleep 0.2; printf 'three'; exit 0
    fi
    if [ "$prompt" = "slow" ]; then
      i=0
      while [ $i -lt 100 ]; do
        i=$((i + 1)); echo $i > "$STATE/ticks"; printf 'tick '; sleep 0.1
      done
      exit 0
    fi
    if [ "$prompt" = "partial" ]; then
      printf 'partial output'; sleep 0.1; echo "Error: rate limited" >&2; exit 1
    fi
    printf 'model=%s prompt=%s' "$model" "$prompt"
    if [ "$atts" -gt 0 ]; then printf ' attachments=%s' "$atts"; fi
    ;;
  chat)
    cid="conv-new"
    while [ $# -gt 0 ]; do
      case "$1" in
        --cid) cid="$2"; shift 2 ;;
        -m|-s|-T) shift 2 ;;
        -o) shift 3 ;;
        *) shift ;;
      esac
    done
    read -r message
    now=$(date -u +%Y-%m-%dT%H:%M:%S)
    printf '[{"id": "r9", "model": "test-model", "prompt": "%s", "response": "you said: %s", "conversation_id": "%s", "datetime_utc": "%s"}]' \
      "$message" "$message" "$cid" "$now" > "$STATE/chat-log.json"
    printf 'you said: %s' "$message"
    ;;
  logs)
    cid=""
    while [ $# -gt 0 ]; do
      case "$1" in
        --cid) cid="$2"; shift 2 ;;
        -n) shift 2 ;;
        *) shift ;;
      esac
    done
    if [ "$cid" = "conv-a" ]; then
      history | grep -v conv-b
    elif [ -n "$cid" ]; then
      echo '[]'
    elif [ -f "$STATE/chat-log.json" ]; then
      cat "$STATE/chat-log.json"
    else
      history
    fi
    ;;
  *)
    echo "Error: No such command '$cmd'." >&2
    exit 2
    ;;
esac
"#;

/// The fake binary is written once, before any test spawns a process from it.
fn fake_llm() -> PathBuf {
    static SCRIPT: OnceLock<PathBuf> = OnceLock::new();
    SCRIPT
        .get_or_init(|| {
            use std::os::unix::fs::PermissionsExt;
            let dir = std::env::temp_dir().join(format!("llm-webui-fake-{}", uuid::Uuid::new_v4()));
            std::fs::create_dir_all(&dir).expect("create fake llm dir");
            let path = dir.join("llm");
            std::fs::write(&path, FAKE_LLM).expect("write fake llm");
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755))
                .expect("chmod fake llm");
            path
        })
        .clone()
}

fn free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind free port");
    listener.local_addr().expect("local_addr").port()
}

struct TestServer {
    base: String,
    state_dir: PathBuf,
}

async fn start_server() -> TestServer {
    let binary = fake_llm();
    let state_dir = std::env::temp_dir().join(format!("llm-webui-test-{}", uuid::Uuid::new_v4()));
    std::fs::create_dir_all(&state_dir).expect("create state dir");
    let port = free_port();

    let mut config = Config::default();
    config.server.host = "127.0.0.1".to_string();
    config.server.port = port;
    config.llm.binary = binary;
    config
        .llm
        .env
        .insert("FAKE_LLM_STATE".to_string(), state_dir.display().to_string());
    config.uploads.directory = Some(state_dir.join("uploads"));
    config.uploads.max_bytes = 16 * 1024;

    tokio::spawn(async move {
        let _ = server::run_server(config).await;
    });

    let base = format!("http://127.0.0.1:{}", port);
    let client = reqwest::Client::new();
    for _ in 0..50 {
        if let Ok(r) = client.get(format!("{}/health", base)).send().await {
            if r.status().is_success() {
                return TestServer { base, state_dir };
            }
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("server did not start on port {}", port);
}

impl TestServer {
    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }
}

#[tokio::test]
async fn index_and_static_assets_are_served() {
    let server = start_server().await;
    let client = reqwest::Client::new();

    let index = client.get(server.url("/")).send().await.expect("GET /");
    assert_eq!(index.status(), 200);
    assert!(index.text().await.expect("body").contains("LLM WebUI"));

    let js = client.get(server.url("/static/app.js")).send().await.expect("GET app.js");
    assert_eq!(js.status(), 200);
    let content_type = js.headers()["content-type"].to_str().expect("ascii").to_string();
    assert!(content_type.contains("javascript"), "{}", content_type);

    let missing = client.get(server.url("/static/nope.css")).send().await.expect("GET missing");
    assert_eq!(missing.status(), 404);

    let health: Value = client
        .get(server.url("/health"))
        .send()
        .await
        .expect("GET /health")
        .json()
        .await
        .expect("health json");
    assert_eq!(health["status"], "ok");
}

#[tokio::test]
async fn discovery_endpoints_list_models_templates_and_tools() {
    let server = start_server().await;
    let client = reqwest::Client::new();

    let models: Value = client.get(server.url("/api/models")).send().await.unwrap().json().await.unwrap();
    assert_eq!(models[0]["id"], "test-model");
    assert_eq!(models[0]["name"], "Test Model");
    assert_eq!(models[0]["aliases"], json!(["tm"]));

    let templates: Value = client.get(server.url("/api/templates")).send().await.unwrap().json().await.unwrap();
    assert_eq!(templates, json!({"templates": ["summarize", "explain"]}));

    let tools: Value = client.get(server.url("/api/tools")).send().await.unwrap().json().await.unwrap();
    assert_eq!(tools[0]["name"], "llm_time");
    assert_eq!(tools[0]["description"], "Current time");
}

#[tokio::test]
async fn prompt_without_streaming_returns_full_text() {
    let server = start_server().await;
    let response = reqwest::Client::new()
        .post(server.url("/api/prompt"))
        .json(&json!({"prompt": "Say hi", "model": "test-model", "stream": false}))
        .send()
        .await
        .expect("POST /api/prompt");
    assert_eq!(response.status(), 200);
    let body: Value = response.json().await.expect("json");
    assert_eq!(body, json!({"response": "model=test-model prompt=Say hi"}));
}

#[tokio::test]
async fn streamed_prompt_relays_output_in_order() {
    let server = start_server().await;
    let response = reqwest::Client::new()
        .post(server.url("/api/prompt"))
        .json(&json!({"prompt": "count", "stream": true}))
        .send()
        .await
        .expect("POST /api/prompt");
    assert_eq!(response.status(), 200);
    let content_type = response.headers()["content-type"].to_str().unwrap().to_string();
    assert!(content_type.starts_with("text/plain"), "{}", content_type);

    let mut stream = response.bytes_stream();
    let mut chunks = Vec::new();
    while let Some(chunk) = stream.next().await {
        chunks.push(chunk.expect("chunk"));
    }
    assert!(chunks.len() > 1, "expected incremental chunks, got {:?}", chunks);
    let full: Vec<u8> = chunks.concat();
    assert_eq!(String::from_utf8(full).unwrap(), "one two three");
}

#[tokio::test]
async fn dropping_a_stream_stops_the_collaborator() {
    let server = start_server().await;
    let response = reqwest::Client::new()
        .post(server.url("/api/prompt"))
        .json(&json!({"prompt": "slow"}))
        .send()
        .await
        .expect("POST /api/prompt");
    assert_eq!(response.status(), 200);
    let mut stream = response.bytes_stream();
    let first = stream.next().await.expect("first chunk").expect("chunk");
    assert!(first.starts_with(b"tick"));
    drop(stream);

    let ticks_file = server.state_dir.join("ticks");
    let ticks = || {
        std::fs::read_to_string(&ticks_file)
            .ok()
            .and_then(|s| s.trim().parse::<u32>().ok())
            .unwrap_or(0)
    };
    tokio::time::sleep(Duration::from_millis(800)).await;
    let settled = ticks();
    tokio::time::sleep(Duration::from_millis(800)).await;
    assert_eq!(ticks(), settled, "llm kept running after the client went away");
    assert!(settled < 100);
}

#[tokio::test]
async fn other_requests_are_served_while_a_stream_is_open() {
    let server = start_server().await;
    let client = reqwest::Client::new();
    let response = client
        .post(server.url("/api/prompt"))
        .json(&json!({"prompt": "slow"}))
        .send()
        .await
        .expect("POST /api/prompt");
    let mut stream = response.bytes_stream();
    stream.next().await.expect("first chunk").expect("chunk");

    let models = tokio::time::timeout(
        Duration::from_secs(2),
        client.get(server.url("/api/models")).send(),
    )
    .await
    .expect("models blocked by open stream")
    .expect("GET /api/models");
    assert_eq!(models.status(), 200);

    let part = reqwest::multipart::Part::bytes(b"side".to_vec()).file_name("side.txt");
    let form = reqwest::multipart::Form::new().part("file", part);
    let upload = tokio::time::timeout(
        Duration::from_secs(2),
        client.post(server.url("/api/upload")).multipart(form).send(),
    )
    .await
    .expect("upload blocked by open stream")
    .expect("POST /api/upload");
    assert_eq!(upload.status(), 200);

    let next = stream.next().await.expect("stream still open").expect("chunk");
    assert!(next.starts_with(b"tick"));
}

#[tokio::test]
async fn malformed_request_bodies_get_a_json_detail() {
    let server = start_server().await;
    let client = reqwest::Client::new();

    let response = client
        .post(server.url("/api/prompt"))
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
    let body: Value = response.json().await.expect("json error");
    assert!(body["detail"].as_str().is_some_and(|d| !d.is_empty()));

    let response = client
        .post(server.url("/api/chat"))
        .json(&json!({"model": "test-model"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
    let body: Value = response.json().await.expect("json error");
    let detail = body["detail"].as_str().expect("detail");
    assert!(detail.contains("message"), "{}", detail);
}

#[tokio::test]
async fn template_alone_is_enough_to_run_a_prompt() {
    let server = start_server().await;
    let body: Value = reqwest::Client::new()
        .post(server.url("/api/prompt"))
        .json(&json!({"prompt": "", "template": "summarize", "stream": false}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["response"], "model= prompt=");
}

#[tokio::test]
async fn collaborator_failure_is_reported_with_detail() {
    let server = start_server().await;
    let client = reqwest::Client::new();
    for stream in [false, true] {
        let response = client
            .post(server.url("/api/prompt"))
            .json(&json!({"prompt": "hi", "model": "broken", "stream": stream}))
            .send()
            .await
            .expect("POST /api/prompt");
        assert_eq!(response.status(), 500, "stream={}", stream);
        let body: Value = response.json().await.expect("json error");
        let detail = body["detail"].as_str().expect("detail");
        assert!(detail.contains("Unknown model: broken"), "{}", detail);
    }
}

#[tokio::test]
async fn failure_after_output_is_appended_to_the_stream() {
    let server = start_server().await;
    let text = reqwest::Client::new()
        .post(server.url("/api/prompt"))
        .json(&json!({"prompt": "partial"}))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert!(text.starts_with("partial output\nError: "), "{}", text);
    assert!(text.contains("rate limited"));
}

#[tokio::test]
async fn bad_extra_args_are_rejected() {
    let server = start_server().await;
    let response = reqwest::Client::new()
        .post(server.url("/api/prompt"))
        .json(&json!({"prompt": "hi", "extra_args": "--option 'unterminated", "stream": false}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);
}

#[tokio::test]
async fn uploaded_file_can_be_attached_to_a_prompt() {
    let server = start_server().await;
    let client = reqwest::Client::new();

    let part = reqwest::multipart::Part::bytes(b"some notes".to_vec())
        .file_name("notes.txt")
        .mime_str("text/plain")
        .unwrap();
    let form = reqwest::multipart::Form::new().part("file", part);
    let response = client.post(server.url("/api/upload")).multipart(form).send().await.unwrap();
    assert_eq!(response.status(), 200);
    let upload: Value = response.json().await.unwrap();
    assert_eq!(upload["filename"], "notes.txt");
    assert_eq!(upload["mimetype"], "text/plain");
    assert_eq!(upload["size"], 10);
    let path = upload["path"].as_str().unwrap().to_string();
    assert!(PathBuf::from(&path).starts_with(server.state_dir.join("uploads")));
    assert_eq!(std::fs::read(&path).unwrap(), b"some notes");

    let body: Value = client
        .post(server.url("/api/prompt"))
        .json(&json!({
            "prompt": "Describe this",
            "model": "test-model",
            "attachments": [path.clone()],
            "attachment_types": [[path, "text/plain"]],
            "stream": false
        }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["response"], "model=test-model prompt=Describe this attachments=1");
}

#[tokio::test]
async fn clipboard_upload_guesses_type_from_name() {
    let server = start_server().await;
    let part = reqwest::multipart::Part::bytes(vec![0x89, b'P', b'N', b'G']).file_name("pasted.png");
    let form = reqwest::multipart::Form::new().part("file", part);
    let upload: Value = reqwest::Client::new()
        .post(server.url("/api/upload-clipboard"))
        .multipart(form)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(upload["mimetype"], "image/png");
    assert_eq!(upload["filename"], "pasted.png");
}

#[tokio::test]
async fn invalid_uploads_are_rejected() {
    let server = start_server().await;
    let client = reqwest::Client::new();

    let empty = reqwest::multipart::Form::new()
        .part("file", reqwest::multipart::Part::bytes(Vec::new()).file_name("empty.txt"));
    let response = client.post(server.url("/api/upload")).multipart(empty).send().await.unwrap();
    assert_eq!(response.status(), 400);

    let wrong_field = reqwest::multipart::Form::new().text("other", "value");
    let response = client.post(server.url("/api/upload")).multipart(wrong_field).send().await.unwrap();
    assert_eq!(response.status(), 400);

    let big = reqwest::multipart::Form::new()
        .part("file", reqwest::multipart::Part::bytes(vec![b'x'; 64 * 1024]).file_name("big.bin"));
    let response = client.post(server.url("/api/upload")).multipart(big).send().await.unwrap();
    assert_eq!(response.status(), 413);
}

#[tokio::test]
async fn logs_and_conversation_summaries() {
    let server = start_server().await;
    let client = reqwest::Client::new();

    let logs: Value = client.get(server.url("/api/logs?count=3")).send().await.unwrap().json().await.unwrap();
    assert_eq!(logs.as_array().unwrap().len(), 3);
    assert_eq!(logs[0]["prompt"], "second question");

    let conversations: Value = client.get(server.url("/api/conversations")).send().await.unwrap().json().await.unwrap();
    let list = conversations.as_array().unwrap();
    assert_eq!(list.len(), 2);
    assert_eq!(list[0]["conversation_id"], "conv-a");
    assert_eq!(list[0]["count"], 2);
    assert_eq!(list[0]["last_prompt"], "second question");
    assert_eq!(list[1]["conversation_id"], "conv-b");

    let again: Value = client.get(server.url("/api/conversations")).send().await.unwrap().json().await.unwrap();
    assert_eq!(conversations, again);
}

#[tokio::test]
async fn conversation_rows_come_back_oldest_first() {
    let server = start_server().await;
    let client = reqwest::Client::new();

    let rows: Value = client.get(server.url("/api/conversations/conv-a")).send().await.unwrap().json().await.unwrap();
    let rows = rows.as_array().unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0]["prompt"], "first question");
    assert_eq!(rows[1]["prompt"], "second question");

    let unknown = client.get(server.url("/api/conversations/does-not-exist")).send().await.unwrap();
    assert_eq!(unknown.status(), 200);
    let unknown: Value = unknown.json().await.unwrap();
    assert_eq!(unknown, json!([]));
}

#[tokio::test]
async fn new_chat_reports_the_conversation_it_created() {
    let server = start_server().await;
    let client = reqwest::Client::new();

    let response = client
        .post(server.url("/api/chat"))
        .json(&json!({"message": "hello there", "model": "test-model"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert!(response.headers().get(server::CONVERSATION_ID_HEADER).is_none());
    let chat_id = response.headers()[server::CHAT_ID_HEADER].to_str().unwrap().to_string();
    assert!(chat_id.starts_with("chat-"));
    assert_eq!(response.text().await.unwrap(), "you said: hello there");

    let status: Value = client
        .get(server.url(&format!("/api/chat/{}", chat_id)))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(status["done"], true);
    assert_eq!(status["conversation_id"], "conv-new");

    let conversations: Value = client.get(server.url("/api/conversations")).send().await.unwrap().json().await.unwrap();
    assert_eq!(conversations[0]["conversation_id"], "conv-new");
}

#[tokio::test]
async fn continued_chat_echoes_the_conversation_id() {
    let server = start_server().await;
    let client = reqwest::Client::new();

    let response = client
        .post(server.url("/api/chat"))
        .json(&json!({"message": "and then?", "conversation_id": "conv-a"}))
        .send()
        .await
        .unwrap();
    assert_eq!(response.headers()[server::CONVERSATION_ID_HEADER], "conv-a");
    let chat_id = response.headers()[server::CHAT_ID_HEADER].to_str().unwrap().to_string();
    assert_eq!(response.text().await.unwrap(), "you said: and then?");

    let status: Value = client
        .get(server.url(&format!("/api/chat/{}", chat_id)))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(status["conversation_id"], "conv-a");

    let missing = client.get(server.url("/api/chat/chat-unknown")).send().await.unwrap();
    assert_eq!(missing.status(), 404);
}

#[tokio::test]
async fn help_passes_through_usage_text() {
    let server = start_server().await;
    let help: Value = reqwest::Client::new()
        .get(server.url("/api/help?path=logs%20list"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(help["command"], "llm logs list --help");
    assert!(help["help"].as_str().unwrap().starts_with("Usage: llm logs list"));
}

#[tokio::test]
async fn help_refuses_paths_outside_the_allowlist() {
    let server = start_server().await;
    let client = reqwest::Client::new();
    for path in ["keys%20set%20openai", "logs%20list%20--path", "prompt%20-m"] {
        let response = client
            .get(server.url(&format!("/api/help?path={}", path)))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 400, "{}", path);
        let body: Value = response.json().await.unwrap();
        assert!(body["detail"].as_str().is_some(), "{}", path);
    }
}
