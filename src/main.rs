//! slayer command line.
//!
//! Sends one request, or runs a load test, through the resilient pipeline
//! and prints the result as JSON.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use reqwest::Method;
use serde_json::json;

use slayer::config::{from_env, load_config};
use slayer::lifecycle::signals::stop_on_ctrl_c;
use slayer::observability::init_logging;
use slayer::pipeline::{LoadPlan, LoadTester};
use slayer::{RequestPipeline, RequestSpec, Shutdown};

#[derive(Parser)]
#[command(name = "slayer")]
#[command(about = "Resilient HTTP request and load-generation client", long_about = None)]
struct Cli {
    /// Target URL
    url: String,

    /// TOML configuration file. Environment overrides apply either way.
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[arg(short = 'X', long, default_value = "GET")]
    method: String,

    /// Header as `name: value`, repeatable
    #[arg(short = 'H', long = "header")]
    headers: Vec<String>,

    /// Request body
    #[arg(short, long)]
    data: Option<String>,

    /// Send a single request instead of a load test
    #[arg(long)]
    single: bool,

    #[arg(long, default_value_t = 1)]
    concurrency: usize,

    /// Total requests to send
    #[arg(short = 'n', long)]
    requests: Option<u64>,

    /// Campaign duration in seconds
    #[arg(long)]
    duration: Option<u64>,

    /// Pause after each request, per worker
    #[arg(long)]
    delay_ms: Option<u64>,
}

fn build_spec(cli: &Cli) -> Result<RequestSpec, String> {
    let method = Method::from_bytes(cli.method.to_ascii_uppercase().as_bytes())
        .map_err(|_| format!("invalid method '{}'", cli.method))?;

    let mut builder = RequestSpec::builder(method, cli.url.clone());
    for raw in &cli.headers {
        let (name, value) = raw
            .split_once(':')
            .ok_or_else(|| format!("header '{raw}' is not `name: value`"))?;
        builder = builder.header(name.trim(), value.trim());
    }
    if let Some(data) = &cli.data {
        builder = builder.body(data.clone());
    }
    builder.build().map_err(|e| e.to_string())
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let loaded = match &cli.config {
        Some(path) => load_config(path),
        None => from_env(),
    };
    let config = match loaded {
        Ok(config) => config,
        Err(e) => {
            eprintln!("configuration error: {e}");
            return ExitCode::from(2);
        }
    };

    if let Err(e) = init_logging(&config.observability) {
        eprintln!("failed to initialize logging: {e}");
    }
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "slayer starting");

    let spec = match build_spec(&cli) {
        Ok(spec) => spec,
        Err(e) => {
            eprintln!("invalid request: {e}");
            return ExitCode::from(2);
        }
    };

    let pipeline = match RequestPipeline::builder(config).build() {
        Ok(pipeline) => Arc::new(pipeline),
        Err(e) => {
            eprintln!("failed to build pipeline: {e}");
            return ExitCode::from(2);
        }
    };

    let (output, code) = if cli.single {
        match pipeline.execute(&spec).await {
            Ok(response) => (
                json!({
                    "status": response.status.as_u16(),
                    "elapsed_ms": response.elapsed.as_secs_f64() * 1000.0,
                    "body": response.text(),
                }),
                ExitCode::SUCCESS,
            ),
            Err(e) => (
                json!({
                    "error": e.to_string(),
                    "kind": e.kind(),
                    "retry_after_ms": e.retry_after().map(|d| d.as_millis() as u64),
                }),
                ExitCode::FAILURE,
            ),
        }
    } else {
        let mut plan = LoadPlan::new(cli.concurrency);
        if let Some(total) = cli.requests {
            plan = plan.total_requests(total);
        }
        if let Some(secs) = cli.duration {
            plan = plan.duration_limit(Duration::from_secs(secs));
        }
        if let Some(ms) = cli.delay_ms {
            plan = plan.delay_between_requests(Duration::from_millis(ms));
        }

        let shutdown = Shutdown::new();
        let signals = stop_on_ctrl_c(shutdown.clone());
        let report = LoadTester::new(pipeline.clone()).run(spec, plan, &shutdown).await;
        signals.abort();

        (
            json!({ "report": report, "stats": pipeline.stats() }),
            ExitCode::SUCCESS,
        )
    };

    match serde_json::to_string_pretty(&output) {
        Ok(text) => println!("{text}"),
        Err(e) => {
            eprintln!("failed to render output: {e}");
            return ExitCode::FAILURE;
        }
    }
    code
}
