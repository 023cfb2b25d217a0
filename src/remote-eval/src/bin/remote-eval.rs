//! CretoAI Remote Evaluation - Demo Binary
//!
//! Drives the resilient evaluation client against an in-process evaluator
//! that can be told to allow, deny, hang, disappear or flap.

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use cretoai_remote_eval::{
    EvaluationRequest, EvaluationResponse, LocalBus, RemoteEvalConfig, RemoteEvaluationClient,
};
use futures::future::join_all;
use prometheus::{Encoder, Registry, TextEncoder};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

/// CretoAI Remote Evaluation CLI
#[derive(Parser)]
#[command(name = "remote-eval")]
#[command(about = "CretoAI Remote Evaluation - fail-closed authorization client")]
#[command(version)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, env = "AUTH_EVALUATION_CONFIG")]
    config: Option<PathBuf>,

    /// Behavior of the simulated evaluator
    #[arg(short, long, value_enum, default_value_t = Mode::Allow)]
    mode: Mode,

    /// Number of concurrent evaluation requests
    #[arg(short = 'n', long, default_value_t = 5)]
    requests: usize,

    /// Print Prometheus metrics after the run
    #[arg(long)]
    metrics: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Subcommand
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Print the effective configuration as TOML
    Config,

    /// Show version
    Version,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Mode {
    /// Every request is allowed
    Allow,
    /// Every request is denied
    Deny,
    /// Requests are accepted but never answered
    Timeout,
    /// Nobody listens on the subject
    NoSubscribers,
    /// Every other request fails with a connection error
    Flaky,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("{},cretoai_remote_eval=debug", log_level).into()),
        )
        .with_target(true)
        .with_line_number(true)
        .with_writer(std::io::stderr)
        .init();

    let config = load_config(cli.config.as_ref())?;

    if let Some(cmd) = cli.command {
        match cmd {
            Command::Config => {
                println!("{}", toml::to_string_pretty(&config)?);
                return Ok(());
            }
            Command::Version => {
                println!("CretoAI Remote Evaluation v{}", env!("CARGO_PKG_VERSION"));
                return Ok(());
            }
        }
    }

    let bus = LocalBus::new();
    if cli.mode != Mode::NoSubscribers {
        spawn_evaluator(&bus, &config.queue_name, cli.mode);
    }

    let registry = Registry::new();
    let client = RemoteEvaluationClient::with_registry(config, Arc::new(bus), &registry)?;
    client.start().await?;
    info!(mode = ?cli.mode, requests = cli.requests, "Running evaluations");

    let requests: Vec<EvaluationRequest> = (0..cli.requests)
        .map(|i| EvaluationRequest::new(format!("agent-{}", i), "policy-demo", "READ"))
        .collect();

    let outcomes = join_all(requests.iter().map(|request| client.evaluate(request))).await;
    for (request, outcome) in requests.iter().zip(outcomes) {
        let line = json!({
            "agentId": request.agent_id,
            "outcome": outcome?,
        });
        println!("{}", line);
    }

    let stats = client.stats();
    let summary = json!({
        "state": stats.state,
        "consecutiveFailures": stats.consecutive_failures,
        "window": {
            "fires": stats.window.fires,
            "successes": stats.window.successes,
            "failures": stats.window.failures,
            "timeouts": stats.window.timeouts,
            "rejects": stats.window.rejects,
        },
        "totalTrips": stats.total_trips,
        "successRate": stats.success_rate(),
    });
    println!("{}", serde_json::to_string_pretty(&summary)?);

    if cli.metrics {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&registry.gather(), &mut buffer)?;
        println!("{}", String::from_utf8(buffer)?);
    }

    client.stop().await?;
    Ok(())
}

fn load_config(path: Option<&PathBuf>) -> Result<RemoteEvalConfig> {
    let mut config = match path {
        Some(path) => {
            let config = RemoteEvalConfig::load(path)?;
            info!("Loaded configuration from {:?}", path);
            config
        }
        None => RemoteEvalConfig::default(),
    };

    config.apply_env_overrides()?;
    config.validate()?;
    Ok(config)
}

/// Simulated remote evaluator answering on `subject`
fn spawn_evaluator(bus: &LocalBus, subject: &str, mode: Mode) {
    let mut subscription = bus.subscribe(subject, 64);
    tokio::spawn(async move {
        let mut served: u64 = 0;
        let mut unanswered = Vec::new();

        while let Some(request) = subscription.recv().await {
            let n = served;
            served += 1;
            let response = match mode {
                Mode::Allow => EvaluationResponse::allow("Policy conditions satisfied"),
                Mode::Deny => EvaluationResponse::deny("Privilege not granted by policy"),
                Mode::Flaky if n % 2 == 0 => {
                    request.respond_error("connection reset by peer");
                    continue;
                }
                Mode::Flaky => EvaluationResponse::allow("Policy conditions satisfied"),
                Mode::Timeout | Mode::NoSubscribers => {
                    unanswered.push(request);
                    continue;
                }
            };

            match serde_json::to_vec(&response) {
                Ok(payload) => {
                    request.respond(payload);
                }
                Err(e) => {
                    request.respond_error(e.to_string());
                }
            }
        }
    });
}
