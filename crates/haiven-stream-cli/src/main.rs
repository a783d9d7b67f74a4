//! Command-line consumer of the streaming engine: stream a prompt to the
//! terminal and manage the local pinboard.

mod config;
mod render;

use std::io::Write as _;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context as _, bail};
use clap::{Args, Parser, Subcommand};
use haiven_stream::observability::init_observability;
use haiven_stream::{
    ChannelKey, ChannelSink, HttpTransportConfig, JsonFileStore, Outcome, Pinboard, SinkEvent,
    StreamEngine, StreamRequest,
};
use serde_json::{Map, Value};
use tracing::info;

use crate::render::TerminalRenderer;

#[derive(Parser)]
#[command(name = "haiven-stream")]
#[command(about = "Stream prompt responses and manage pinned snippets")]
struct Cli {
    /// Local store file holding the pinboard.
    #[arg(long, global = true)]
    store: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Stream one response to stdout.
    Stream(StreamArgs),
    /// Manage pinned snippets.
    Pin {
        #[command(subcommand)]
        command: PinCommand,
    },
}

#[derive(Args)]
struct StreamArgs {
    /// Endpoint path or absolute URL.
    #[arg(long, default_value = "/api/prompt")]
    url: String,
    /// User input sent as `userinput` (POST) or `prompt` (GET).
    #[arg(long)]
    prompt: Option<String>,
    /// Send a GET request with query parameters instead of a JSON body.
    #[arg(long, default_value_t = false)]
    get: bool,
    /// Extra `key=value` field (body field for POST, query parameter for GET).
    #[arg(long = "param", value_parser = config::parse_pair)]
    params: Vec<(String, String)>,
    /// Raw JSON body for POST requests.
    #[arg(long, conflicts_with = "get")]
    body: Option<String>,
    /// Overrides `HAIVEN_BASE_URL`.
    #[arg(long)]
    base_url: Option<String>,
    /// Cancels the stream after this many seconds.
    #[arg(long)]
    timeout_secs: Option<u64>,
    /// Channel the session runs on.
    #[arg(long, default_value = "cli")]
    channel: String,
    /// Pin the final output when the stream completes.
    #[arg(long, default_value_t = false)]
    pin: bool,
}

#[derive(Subcommand)]
enum PinCommand {
    /// Pin a snippet.
    Add { text: String },
    /// List pinned snippets, newest first.
    List,
    /// Remove the snippet pinned at `timestamp`.
    Remove { timestamp: i64 },
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    config::init();
    init_observability();

    let cli = Cli::parse();
    let store = cli.store.unwrap_or_else(config::default_store_path);
    let board = Pinboard::new(JsonFileStore::new(store));

    match cli.command {
        Command::Stream(args) => stream(args, &board).await,
        Command::Pin { command } => {
            pin(command, &board)?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn build_request(args: &StreamArgs) -> anyhow::Result<StreamRequest> {
    let mut request = if args.get {
        let mut request = StreamRequest::get(&args.url);
        if let Some(prompt) = &args.prompt {
            request = request.query("prompt", prompt);
        }
        for (key, value) in &args.params {
            request = request.query(key, value);
        }
        request
    } else {
        let mut body = match &args.body {
            Some(raw) => match serde_json::from_str(raw).context("--body is not valid JSON")? {
                Value::Object(map) => map,
                _ => bail!("--body must be a JSON object"),
            },
            None => Map::new(),
        };
        if let Some(prompt) = &args.prompt {
            body.insert("userinput".into(), Value::String(prompt.clone()));
        }
        for (key, value) in &args.params {
            body.insert(key.clone(), Value::String(value.clone()));
        }
        if body.is_empty() {
            bail!("nothing to send: pass --prompt, --param or --body");
        }
        StreamRequest::post_json(&args.url, &Value::Object(body))?
    };
    if let Some(secs) = args.timeout_secs {
        request = request.timeout(Duration::from_secs(secs));
    }
    Ok(request)
}

async fn stream(args: StreamArgs, board: &Pinboard<JsonFileStore>) -> anyhow::Result<ExitCode> {
    let request = build_request(&args)?;
    let mut transport = HttpTransportConfig::from_env()?;
    if let Some(base_url) = &args.base_url {
        transport = transport.base_url(base_url);
    }

    let engine = StreamEngine::http(transport)?;
    let channel = ChannelKey::new(args.channel.as_str());
    let (sink, mut events) = ChannelSink::channel();
    let session = engine
        .start(channel.clone(), request, sink)
        .await
        .context("failed to open stream")?;
    info!(session_id = %session.id(), %channel, "streaming");

    let mut renderer = TerminalRenderer::default();
    let mut stdout = std::io::stdout();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);
    let mut interrupted = false;

    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else {
                    bail!("session ended without a terminal event");
                };
                write!(stdout, "{}", renderer.render(&event))?;
                stdout.flush()?;
                if let SinkEvent::Complete { outcome, increment, error } = event {
                    return match outcome {
                        Outcome::Completed => {
                            if args.pin && !increment.is_empty() {
                                let ts = board.pin(increment.display_text())?;
                                eprintln!("pinned at {ts}");
                            }
                            Ok(ExitCode::SUCCESS)
                        }
                        Outcome::Cancelled => {
                            eprintln!("cancelled");
                            Ok(ExitCode::from(130))
                        }
                        Outcome::Failed => {
                            match error {
                                Some(err) => eprintln!("stream failed: {err}"),
                                None => eprintln!("stream failed"),
                            }
                            Ok(ExitCode::FAILURE)
                        }
                    };
                }
            }
            _ = &mut ctrl_c, if !interrupted => {
                interrupted = true;
                engine.cancel(&channel);
            }
        }
    }
}

fn pin(command: PinCommand, board: &Pinboard<JsonFileStore>) -> anyhow::Result<()> {
    match command {
        PinCommand::Add { text } => {
            let ts = board.pin(text)?;
            println!("{ts}");
        }
        PinCommand::List => {
            for (ts, content) in board.entries()? {
                println!("{ts}\t{}", content.replace('\n', "\n\t"));
            }
        }
        PinCommand::Remove { timestamp } => {
            if !board.unpin(timestamp)? {
                bail!("no snippet pinned at {timestamp}");
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use haiven_stream::Method;

    fn args(argv: &[&str]) -> StreamArgs {
        let mut full = vec!["haiven-stream", "stream"];
        full.extend_from_slice(argv);
        match Cli::parse_from(full).command {
            Command::Stream(args) => args,
            Command::Pin { .. } => unreachable!("stream subcommand"),
        }
    }

    #[test]
    fn post_request_carries_prompt_and_params_in_body() {
        let request = build_request(&args(&[
            "--prompt",
            "hello",
            "--param",
            "context=finance",
            "--timeout-secs",
            "30",
        ]))
        .expect("request");
        assert_eq!(request.method(), Method::Post);
        assert_eq!(request.url(), "/api/prompt");
        let body: Value = serde_json::from_slice(request.body().expect("body")).expect("json");
        assert_eq!(body["userinput"], "hello");
        assert_eq!(body["context"], "finance");
        assert_eq!(request.deadline(), Some(Duration::from_secs(30)));
    }

    #[test]
    fn get_request_uses_query_pairs() {
        let request = build_request(&args(&[
            "--get",
            "--url",
            "/api/make-scenario",
            "--prompt",
            "drought",
            "--param",
            "num_scenarios=5",
        ]))
        .expect("request");
        assert_eq!(request.method(), Method::Get);
        assert_eq!(
            request.query_pairs(),
            &[
                ("prompt".to_string(), "drought".to_string()),
                ("num_scenarios".to_string(), "5".to_string()),
            ]
        );
    }

    #[test]
    fn empty_post_is_rejected() {
        assert!(build_request(&args(&[])).is_err());
        assert!(build_request(&args(&["--body", "[1]"])).is_err());
    }
}
