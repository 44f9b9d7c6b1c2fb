//! # tally
//!
//! Command-line entry point. Takes two snapshots of the configured
//! providers some rounds apart, replays the recorded reward events between
//! them and prints the verification report.
//!
//! Exit codes: 0 passed, 1 failed, 2 inconclusive, 3 setup error.

mod config;
mod render;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tally_client::http::HttpChainClient;
use tally_types::ProviderKey;
use tally_verify::run_verification;

use crate::config::TallyConfig;
use crate::render::OutputFormat;

const SETUP_ERROR: u8 = 3;

/// Verify reward distribution on a running chain
#[derive(Parser, Debug)]
#[command(name = "tally", version, about)]
struct Cli {
    /// Configuration file (defaults to ./tally.toml when present)
    #[arg(short, long, env = "TALLY_CONFIG")]
    config: Option<PathBuf>,

    /// Base URL of the sharder query API
    #[arg(short, long)]
    node: Option<String>,

    /// Provider to verify, as category:id (repeatable)
    #[arg(short, long = "provider", value_name = "CATEGORY:ID")]
    providers: Vec<ProviderKey>,

    /// Rounds to wait between the two snapshots
    #[arg(short, long)]
    wait_rounds: Option<u64>,

    /// Cross-check chain aggregate totals
    #[arg(long)]
    aggregate_check: bool,

    /// Report format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
    output: OutputFormat,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!(error = %e, "setup failed");
            eprintln!("error: {e:#}");
            ExitCode::from(SETUP_ERROR)
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let mut config = TallyConfig::load(cli.config.as_deref())?;
    if let Some(node) = cli.node {
        config.node.base_url = node;
    }
    if let Some(wait_rounds) = cli.wait_rounds {
        config.run.wait_rounds = wait_rounds;
    }
    if cli.aggregate_check {
        config.run.aggregate_check = true;
    }

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(format!("tally={}", config.logging.level).parse()?),
        )
        .init();

    let mut providers = config.provider_keys();
    providers.extend(cli.providers);
    if providers.is_empty() {
        anyhow::bail!("no providers given; pass --provider category:id or list them in the config file");
    }

    tracing::info!(
        node = %config.node.base_url,
        providers = providers.len(),
        wait_rounds = config.run.wait_rounds,
        "starting verification"
    );

    let client = HttpChainClient::new(
        &config.node.base_url,
        config.call_timeout(),
        config.fetch.page_limit,
    )?;
    let report = run_verification(Arc::new(client), &providers, &config.run_config()).await;

    println!("{}", render::render(&report, cli.output)?);
    Ok(render::exit_code(&report))
}
