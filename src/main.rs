//! ada-snapkv: score a captured KV cache for adaptive SnapKV compression.
//!
//! Reads a JSON score request (flattened keys plus the layer's attention
//! weights), writes the per-position scores and, with `--plan`, the global
//! retention plan.

use std::io::Write;

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};

use ada_snapkv::config::{Cli, Config};
use ada_snapkv::press::AdaSnapKvPress;
use ada_snapkv::request::ScoreRequest;

fn main() -> anyhow::Result<()> {
    // Parse CLI arguments.
    let cli = Cli::parse();

    // Read configuration; a missing file is reported once logging is up.
    let file_config = Config::read(&cli.config)?;
    let config_missing = file_config.is_none();
    let config = file_config.unwrap_or_default();

    // Initialize tracing/logging.
    let default_filter = match (&config.logging.filter, cli.verbose) {
        (_, true) => "ada_snapkv=debug".to_string(),
        (Some(filter), false) => filter.clone(),
        (None, false) => "ada_snapkv=info".to_string(),
    };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| default_filter.into());
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .with_writer(std::io::stderr);
    if config.logging.json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    if config_missing {
        warn!("Config file not found at {:?}, using defaults", cli.config);
    }

    info!("ada-snapkv v{}", env!("CARGO_PKG_VERSION"));
    info!(
        compression_ratio = config.press.compression_ratio,
        window_size = config.press.window_size,
        kernel_size = config.press.kernel_size,
        floor_alpha = config.press.floor_alpha,
        "Configuration loaded"
    );

    let press = AdaSnapKvPress::new(config.press)?;

    let data = std::fs::read_to_string(&cli.input)
        .with_context(|| format!("reading score request {}", cli.input.display()))?;
    let request: ScoreRequest = serde_json::from_str(&data)
        .with_context(|| format!("parsing score request {}", cli.input.display()))?;

    let response = request.run(&press, cli.plan)?;
    info!(
        shape = ?response.shape,
        retained = response.plan.as_ref().map(|p| p.total_kept()),
        "Scoring complete"
    );

    let body = serde_json::to_string_pretty(&response)?;
    match &cli.output {
        Some(path) => std::fs::write(path, body)
            .with_context(|| format!("writing response {}", path.display()))?,
        None => {
            let mut stdout = std::io::stdout().lock();
            writeln!(stdout, "{body}")?;
        }
    }

    Ok(())
}
