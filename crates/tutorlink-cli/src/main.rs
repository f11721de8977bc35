//! Tutorlink CLI
//!
//! Interactive line-based front end for the tutor client. Each input line is
//! sent as one utterance; lines starting with `/` are commands.

use std::path::Path;
use std::process::ExitCode;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;
use tracing_subscriber::EnvFilter;
use tutorlink_client::{
    ClientConfig, ClientEvent, ClientStatus, ConnectionState, Mode, TutorClient, TutorReply,
};

/// Tutorlink - practice a language with a live or simulated tutor
///
/// Reads utterances from stdin and prints the tutor's replies. Falls back to a
/// local demo tutor when the live endpoint cannot be reached.
#[derive(Parser, Debug)]
#[command(name = "tutorlink")]
#[command(version, about, long_about = None)]
struct Args {
    /// Path to configuration file (default: tutorlink.json in current directory)
    #[arg(short, long, value_name = "FILE")]
    config: Option<String>,

    /// Explicit tutor endpoint URL
    #[arg(short, long, value_name = "URL", env = "TUTORLINK_URL")]
    url: Option<String>,

    /// Environment identifier, e.g. localhost:8080 or tutor.example.com
    #[arg(short, long = "env", value_name = "ID", env = "TUTORLINK_ENV")]
    environment: Option<String>,

    /// Path the endpoint URL must end with
    #[arg(long, value_name = "PATH")]
    path: Option<String>,

    /// Operating mode: automatic, live, or demo
    #[arg(short, long, value_name = "MODE", value_parser = parse_mode)]
    mode: Option<Mode>,

    /// Language code for utterances
    #[arg(short, long, value_name = "CODE", default_value = "en-US")]
    lang: String,

    /// Learner proficiency level
    #[arg(long, value_name = "CEFR", default_value = "B1")]
    level: String,

    /// Print every client event as a JSON line instead of plain replies
    #[arg(long)]
    json: bool,

    /// Enable verbose output (sets log level to debug)
    #[arg(short, long)]
    verbose: bool,
}

fn parse_mode(value: &str) -> Result<Mode, String> {
    Mode::from_str_case_insensitive(value)
        .ok_or_else(|| format!("invalid mode '{value}': expected automatic, live, or demo"))
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    // Priority: RUST_LOG env var > --verbose flag > default (info)
    let filter = if args.verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    tracing::debug!(config = ?args.config, "Config file");

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::from(1)
        }
    }
}

/// Runs the interactive session until `/quit` or end of input.
async fn run(args: Args) -> anyhow::Result<()> {
    let mut config = load_config(args.config.as_deref())?;

    if let Some(url) = args.url {
        config.endpoint_url = Some(url);
    }
    if let Some(environment) = args.environment {
        config.environment = Some(environment);
    }
    if let Some(path) = args.path {
        config.path = path;
    }
    if let Some(mode) = args.mode {
        config.mode = mode;
    }

    // Re-validate after overrides
    config.validate()?;

    if !args.json {
        print_config(&config);
    }

    let client = TutorClient::new(config)?;
    let printer = tokio::spawn(print_events(client.subscribe(), args.json));

    client.connect()?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match line.strip_prefix('/') {
            Some(command) => {
                if !handle_command(&client, command)? {
                    break;
                }
            }
            None => {
                client.send(line, args.lang.as_str(), args.level.as_str())?;
            }
        }
    }

    // The printer ends once the client's event channel closes.
    client.shutdown().await;
    if let Err(e) = printer.await {
        tracing::debug!(error = %e, "Event printer ended abnormally");
    }
    Ok(())
}

/// Handles a slash command. Returns `false` when the session should end.
fn handle_command(client: &TutorClient, command: &str) -> anyhow::Result<bool> {
    match command.to_ascii_lowercase().as_str() {
        "connect" => client.connect()?,
        "disconnect" => client.disconnect()?,
        "demo" => client.set_mode(Mode::Demo)?,
        "auto" | "automatic" => client.set_mode(Mode::Automatic)?,
        "live" => client.set_mode(Mode::Live)?,
        "status" => print_status(&client.status()),
        "quit" | "exit" => return Ok(false),
        other => {
            eprintln!("Unknown command '/{other}'");
            eprintln!("Commands: /connect /disconnect /demo /auto /live /status /quit");
        }
    }
    Ok(true)
}

/// Loads configuration from file.
fn load_config(config_path: Option<&str>) -> anyhow::Result<ClientConfig> {
    match config_path {
        Some(path_str) => {
            let path = Path::new(path_str);
            if !path.exists() {
                anyhow::bail!(
                    "Config file not found: '{}'\n\nSuggestion: Check the path or remove the --config flag to use defaults",
                    path.display()
                );
            }
            ClientConfig::load_from_file(path).map_err(|e| anyhow::anyhow!("{e}"))
        }
        None => ClientConfig::load_from_dir(Path::new(".")).map_err(|e| anyhow::anyhow!("{e}")),
    }
}

fn print_config(config: &ClientConfig) {
    println!("Configuration loaded:");
    if let Some(url) = &config.endpoint_url {
        println!("  Endpoint URL: {url}");
    }
    if let Some(environment) = &config.environment {
        println!("  Environment: {environment}");
    }
    println!("  Path: {}", config.path);
    println!("  Mode: {}", config.mode);
    println!("  Auto reconnect: {}", config.auto_reconnect);
    println!(
        "  Backoff: {}ms - {}ms",
        config.min_backoff_ms, config.max_backoff_ms
    );
    println!();
}

fn print_status(status: &ClientStatus) {
    println!("State: {}", status.state);
    println!("Mode: {}", status.mode);
    println!("Reconnect attempt: {}", status.reconnect_attempt);
    println!("Pending messages: {}", status.pending);
    if status.demo_fallback {
        println!("Demo fallback: active");
    }
    if let Some(error) = &status.last_error {
        println!("Last error: {error}");
    }
}

/// Prints client events until the client stops.
async fn print_events(mut events: broadcast::Receiver<ClientEvent>, json: bool) {
    loop {
        match events.recv().await {
            Ok(event) if json => match serde_json::to_string(&event) {
                Ok(line) => println!("{line}"),
                Err(e) => tracing::warn!(error = %e, "Failed to serialize event"),
            },
            Ok(event) => print_event(&event),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "Event printer fell behind");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

fn print_event(event: &ClientEvent) {
    match event {
        ClientEvent::Reply(reply) => print_reply(reply),
        ClientEvent::StateChanged(state) => match state {
            ConnectionState::Connected => println!("* connected to tutor"),
            ConnectionState::Demo => println!("* demo mode: replies are simulated"),
            ConnectionState::Failed { message } => println!("* connection failed: {message}"),
            other => tracing::info!(state = %other, "Connection state"),
        },
        ClientEvent::Error(error) => tracing::warn!(kind = %error.kind, "{}", error.message),
        ClientEvent::Log(log) => tracing::debug!("{}", log.line),
    }
}

fn print_reply(reply: &TutorReply) {
    println!("tutor> {}", reply.reply);
    if let Some(hint) = &reply.hint {
        println!("  hint: {hint}");
    }
    for error in &reply.errors {
        println!("  ! {error}");
    }
    if let Some(cefr) = &reply.cefr {
        println!("  level: {cefr}");
    }
}
