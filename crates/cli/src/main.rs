use clap::{Parser, Subcommand};
use futures_util::StreamExt;
use lib::chats::ChatStatus;
use lib::client::{self, AppState, Event};
use lib::conversations::ConversationSummary;
use std::io::Write;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "llm-webui")]
#[command(about = "Web UI for the llm command-line tool", long_about = None)]
#[command(args_conflicts_with_subcommands = true)]
struct Cli {
    /// Server options used when no command is given
    #[command(flatten)]
    serve: ServeArgs,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version
    Version,

    /// Run the web server (the default when no command is given).
    Serve(ServeArgs),

    /// Chat with a model through a running server (interactive). `/new` starts a new conversation, `/exit` quits.
    Chat {
        /// Server base URL
        #[arg(long, default_value = "http://127.0.0.1:8000")]
        url: String,

        /// Model id (default: the llm default model)
        #[arg(long, short)]
        model: Option<String>,

        /// Existing conversation id to continue
        #[arg(long, value_name = "ID")]
        conversation: Option<String>,
    },
}

#[derive(clap::Args)]
struct ServeArgs {
    /// Config file path (default: LLM_WEBUI_CONFIG_PATH or ~/.llm-webui/config.json)
    #[arg(long, short, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Bind address (default from config or 127.0.0.1). There is no authentication.
    #[arg(long)]
    host: Option<String>,

    /// Port (default from config or 8000)
    #[arg(long, short)]
    port: Option<u16>,

    /// Serve static assets from disk so edits show up without a restart
    #[arg(long)]
    reload: bool,

    /// Verbose logging
    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Version) => {
            println!("llm-webui {}", env!("CARGO_PKG_VERSION"));
        }
        Some(Commands::Chat {
            url,
            model,
            conversation,
        }) => {
            init_logging(false);
            if let Err(e) = run_chat(url, model, conversation).await {
                log::error!("chat failed: {:#}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Serve(args)) => serve(args).await,
        None => serve(cli.serve).await,
    }
}

/// `RUST_LOG` wins; otherwise `info`, or `debug` in debug mode.
fn init_logging(debug: bool) {
    let default_filter = if debug { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();
}

async fn serve(args: ServeArgs) {
    let config = match lib::config::load_config(args.config.clone()) {
        Ok(config) => config,
        Err(e) => {
            init_logging(args.debug);
            log::error!("config failed: {:#}", e);
            std::process::exit(1);
        }
    };
    init_logging(args.debug || config.server.debug);
    if let Err(e) = run_serve(config, args).await {
        log::error!("server failed: {:#}", e);
        std::process::exit(1);
    }
}

async fn run_serve(mut config: lib::config::Config, args: ServeArgs) -> anyhow::Result<()> {
    if let Some(host) = args.host {
        config.server.host = host;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }
    config.server.reload |= args.reload;
    config.server.debug |= args.debug;
    log::info!(
        "starting server on {}:{}",
        config.server.host,
        config.server.port
    );
    lib::server::run_server(config).await
}

async fn run_chat(
    url: String,
    model: Option<String>,
    conversation: Option<String>,
) -> anyhow::Result<()> {
    let base = url.trim_end_matches('/').to_string();
    let http = reqwest::Client::new();
    let mut state = AppState {
        tab: client::Tab::Chat,
        ..AppState::default()
    };
    if let Some(id) = conversation {
        state = client::update(state, Event::ConversationSelected(id));
    }

    let stdin = std::io::stdin();
    let mut stdout = std::io::stdout();
    loop {
        write!(stdout, "> ")?;
        stdout.flush()?;
        let mut line = String::new();
        if stdin.read_line(&mut line)? == 0 {
            break;
        }
        let input = line.trim();
        if input.is_empty() {
            continue;
        }
        if input.eq_ignore_ascii_case("/exit") || input.eq_ignore_ascii_case("/quit") {
            break;
        }
        if input.eq_ignore_ascii_case("/new") {
            state = client::update(state, Event::NewConversation);
            println!("(new conversation)");
            continue;
        }

        state = chat_turn(&http, &base, model.as_deref(), state, input.to_string()).await;
        println!();
        if let Some(notice) = state.notice.take() {
            eprintln!("chat error: {}", notice);
        }
    }
    Ok(())
}

/// One send: stream the reply to stdout, then adopt the conversation the server resolved.
async fn chat_turn(
    http: &reqwest::Client,
    base: &str,
    model: Option<&str>,
    state: AppState,
    message: String,
) -> AppState {
    let body = serde_json::json!({
        "message": message,
        "model": model,
        "conversation_id": state.conversation_id,
    });
    let mut state = client::update(state, Event::ChatSent(message));

    let response = match http.post(format!("{}/api/chat", base)).json(&body).send().await {
        Ok(r) => r,
        Err(e) => return client::update(state, Event::ChatFailed(e.to_string())),
    };
    if !response.status().is_success() {
        let detail = error_detail(response).await;
        return client::update(state, Event::ChatFailed(detail));
    }
    let chat_id = response
        .headers()
        .get(lib::server::CHAT_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let mut stream = response.bytes_stream();
    let mut stdout = std::io::stdout();
    while let Some(chunk) = stream.next().await {
        match chunk {
            Ok(bytes) => {
                let shown = state.pending.as_ref().map_or(0, String::len);
                state = client::update(state, Event::ChunkReceived(bytes.to_vec()));
                if let Some(text) = &state.pending {
                    print!("{}", &text[shown..]);
                    let _ = stdout.flush();
                }
            }
            Err(e) => return client::update(state, Event::ChatFailed(e.to_string())),
        }
    }

    let resolved = match chat_id {
        Some(id) => fetch_json::<ChatStatus>(http, &format!("{}/api/chat/{}", base, id))
            .await
            .ok()
            .and_then(|s| s.conversation_id),
        None => None,
    };
    if !state.pending_bytes.is_empty() {
        print!("{}", String::from_utf8_lossy(&state.pending_bytes));
    }
    state = client::update(state, Event::ChatCompleted(resolved));
    if state.conversation_id.is_none() {
        let list = fetch_json::<Vec<ConversationSummary>>(http, &format!("{}/api/conversations", base)).await;
        state = client::update(state, Event::ConversationsLoaded(list));
    }
    if let Some(id) = &state.conversation_id {
        log::debug!("conversation {}", id);
    }
    state
}

async fn fetch_json<T: serde::de::DeserializeOwned>(
    http: &reqwest::Client,
    url: &str,
) -> Result<T, String> {
    let response = http.get(url).send().await.map_err(|e| e.to_string())?;
    if !response.status().is_success() {
        return Err(error_detail(response).await);
    }
    response.json::<T>().await.map_err(|e| e.to_string())
}

async fn error_detail(response: reqwest::Response) -> String {
    let status = response.status();
    match response.json::<serde_json::Value>().await {
        Ok(v) => v
            .get("detail")
            .and_then(|d| d.as_str())
            .map(str::to_string)
            .unwrap_or_else(|| status.to_string()),
        Err(_) => status.to_string(),
    }
}
