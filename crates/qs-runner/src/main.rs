//! # qs-runner
//!
//! Command-line front end for the streaming quote client.
//!
//! Connects, fetches a first complete snapshot for every symbol given on the
//! command line, then (with `--watch`) keeps printing updates until Ctrl+C.
//!
//! # Usage
//!
//! ```bash
//! qs-runner NASDAQ:AAPL BINANCE:BTCUSDT --fields lp,ch --watch
//! qs-runner NASDAQ:AAPL --config quotes.json --log-level debug
//! ```

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use qs_client::QuoteClient;
use qs_core::config::{ClientConfig, load_config};
use qs_core::logging::init_logging;
use tracing::{error, info};

/// Streaming quote client.
#[derive(Parser)]
#[command(name = "qs-runner", about = "Streaming quote client")]
struct Cli {
    /// Symbols to query, e.g. NASDAQ:AAPL.
    #[arg(required = true)]
    symbols: Vec<String>,

    /// Configuration file path (JSON). Built-in defaults when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Fields a snapshot must carry before it is printed (comma separated).
    /// Defaults to the configured field list.
    #[arg(short, long, value_delimiter = ',')]
    fields: Vec<String>,

    /// Keep streaming updates until Ctrl+C.
    #[arg(short, long)]
    watch: bool,

    /// Log filter (trace, debug, info, warn, error, or full directives).
    /// Overrides `logging.level` from the config file.
    #[arg(short, long)]
    log_level: Option<String>,

    /// Log directory for file output. Overrides `logging.dir`.
    #[arg(long)]
    log_dir: Option<String>,
}

impl Cli {
    /// Config file (or defaults) with the command-line logging overrides
    /// applied.
    fn client_config(&self) -> Result<ClientConfig> {
        let mut config = match &self.config {
            Some(path) => load_config(path)?,
            None => ClientConfig::default(),
        };
        config.logging.file_prefix = "qs-runner".into();
        if let Some(level) = &self.log_level {
            config.logging.level = level.clone();
        }
        if let Some(dir) = &self.log_dir {
            config.logging.dir = Some(dir.clone());
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = cli.client_config()?;

    // flushes the file writer on drop
    let _log_guard = init_logging(&config.logging)?;
    info!(
        "qs-runner starting, {} symbol(s), log_level={}",
        cli.symbols.len(),
        config.logging.level
    );
    if let Some(path) = &cli.config {
        info!("config loaded from {}", path.display());
    }

    let required = if cli.fields.is_empty() {
        config.fields.clone()
    } else {
        cli.fields.clone()
    };

    let mut client = QuoteClient::new(config)?;
    client.connect().await?;
    info!("session {} ready", client.session_id());

    if cli.watch {
        for symbol in &cli.symbols {
            client
                .watch(symbol, |symbol, update| match update {
                    Ok(snapshot) => match serde_json::to_string(snapshot) {
                        Ok(json) => println!("{symbol} {json}"),
                        Err(e) => error!("{symbol}: cannot render snapshot: {e}"),
                    },
                    Err(e) => error!("{symbol}: {e}"),
                })
                .await?;
        }
    }

    for symbol in &cli.symbols {
        let first = client.get_or_await_ticker_with(symbol, required.as_slice());
        match first.await {
            Ok(snapshot) => {
                info!("{symbol}: {} field(s)", snapshot.len());
                if !cli.watch {
                    println!("{symbol} {}", serde_json::to_string(&snapshot)?);
                }
            }
            Err(e) => error!("{symbol}: {e}"),
        }
    }

    if cli.watch {
        info!("streaming, press Ctrl+C to stop");
        tokio::signal::ctrl_c().await?;
        info!("shutdown signal received");
    }

    client.shutdown().await?;
    info!("goodbye");
    Ok(())
}
