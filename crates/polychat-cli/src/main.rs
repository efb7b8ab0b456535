use std::path::PathBuf;

use clap::Parser;
use polychat::{ChatError, ChatMessage, ProviderKind, StreamMessage};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info};

mod config;
mod home;
mod logging;
mod request;

use config::ResolvedConfig;

const CLI_SOURCE_ID: &str = "polychat-cli";

#[derive(Parser, Debug)]
#[command(
    name = "polychat",
    version,
    about = "Send one chat request to a configured backend"
)]
struct Cli {
    /// Directory holding polychat.toml and logs/ (default ~/.polychat).
    #[arg(long)]
    conf_dir: Option<PathBuf>,
    /// Backend name: openai, anthropic, google, ollama, ollama-generate.
    #[arg(long)]
    provider: Option<String>,
    #[arg(long)]
    model: Option<String>,
    #[arg(long)]
    prompt: Option<String>,
    /// Use the streaming endpoint and pull events.
    #[arg(long, default_value_t = false)]
    stream: bool,
    /// Use the streaming endpoint and receive events over a channel.
    #[arg(long, default_value_t = false)]
    push: bool,
    /// Print each streamed event as a JSON line.
    #[arg(long, default_value_t = false)]
    events: bool,
    /// Extra request option as KEY=JSON; repeatable.
    #[arg(long = "option", value_name = "KEY=JSON")]
    options: Vec<String>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    if let Err(error) = run(cli).await {
        eprintln!("error: {error}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), String> {
    let conf_dir = home::resolve_conf_dir(cli.conf_dir.as_deref())?;
    let config = config::load_config(&conf_dir)?;
    let _log_guard = logging::init_tracing(&conf_dir, &config.log);
    register_configured_providers(&config);

    let kind = match cli.provider.as_deref() {
        Some(name) => name.parse::<ProviderKind>().map_err(render_error)?,
        None => config.default_provider.unwrap_or(ProviderKind::OpenAi),
    };
    let model = cli
        .model
        .clone()
        .or_else(|| config.provider(kind).and_then(|entry| entry.model.clone()))
        .unwrap_or_else(|| request::default_model(kind).to_string());
    let extra = cli
        .options
        .iter()
        .map(|raw| request::parse_option_arg(raw))
        .collect::<Result<Vec<_>, _>>()?;
    let options = request::build_options(kind, &model, cli.prompt.as_deref(), &extra);

    info!(
        provider = %kind,
        model = %model,
        stream = cli.stream,
        push = cli.push,
        "polychat request"
    );

    let response = if cli.push {
        run_push(kind, options, cli.events).await?
    } else if cli.stream {
        run_pull(kind, options, cli.events).await?
    } else {
        polychat::complete(kind.as_str(), options)
            .await
            .map_err(render_error)?
    };

    let rendered = serde_json::to_string_pretty(&response)
        .map_err(|error| format!("render response failed: {error}"))?;
    println!("{rendered}");
    Ok(())
}

fn register_configured_providers(config: &ResolvedConfig) {
    for entry in &config.providers {
        debug!(
            provider = %entry.kind,
            has_api_key = entry.config.api_key.is_some(),
            base_url = entry.config.base_url.as_deref().unwrap_or("<default>"),
            "registering provider"
        );
        polychat::register_provider(
            entry.kind.build(entry.config.clone()),
            Some(CLI_SOURCE_ID.to_string()),
        );
    }
}

async fn run_pull(kind: ProviderKind, options: Value, print_events: bool) -> Result<Value, String> {
    let mut events = polychat::stream(kind.as_str(), options).map_err(render_error)?;
    while let Some(event) = events.next().await {
        let event = event.map_err(render_error)?;
        if print_events {
            println!("{event}");
        }
    }
    events
        .into_result()
        .ok_or_else(|| "stream ended before the response completed".to_string())
}

async fn run_push(kind: ProviderKind, options: Value, print_events: bool) -> Result<Value, String> {
    let (sender, mut receiver) = mpsc::unbounded_channel::<ChatMessage>();
    let _task = polychat::stream_to(kind.as_str(), options, sender).map_err(render_error)?;
    while let Some(message) = receiver.recv().await {
        match message {
            StreamMessage::Event(event) => {
                if print_events {
                    println!("{event}");
                }
            }
            StreamMessage::Completed(response) => return Ok(response),
            StreamMessage::Failed(error) => return Err(render_error(error)),
        }
    }
    Err("stream channel closed before the response completed".to_string())
}

fn render_error(error: ChatError) -> String {
    error.as_compact_json()
}
