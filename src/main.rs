//! # bolt
//!
//! Command-line entry point: run the WebSocket bridge in front of the query
//! endpoint, or watch a push query through it and print panel snapshots.

#![deny(unsafe_code)]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use bolt_bridge::BridgeConfig;
use bolt_core::{
    CleanupThreshold, FanoutMode, PanelId, PanelResponse, QueryKind, QueryOptions, StaleReplacement,
    TimeRange,
};
use bolt_settings::BoltSettings;
use bolt_supervisor::{QueryRequest, Supervisor, SupervisorConfig, WsTransport};
use bolt_telemetry::TelemetryConfig;
use clap::{Args, Parser, Subcommand, ValueEnum};

/// Streaming ingestion for push queries.
#[derive(Parser, Debug)]
#[command(name = "bolt", about = "Streaming ingestion for push queries")]
struct Cli {
    /// Settings file (defaults to `~/.bolt/settings.json`).
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    /// Log level (overrides settings).
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Relay WebSocket query frames to the HTTP query endpoint.
    Bridge {
        #[arg(long)]
        host: Option<String>,

        /// Port to bind (0 for auto-assign).
        #[arg(long)]
        port: Option<u16>,

        /// Base URL of the query endpoint.
        #[arg(long)]
        upstream_url: Option<String>,
    },
    /// Run one push query and print each panel snapshot as a JSON line.
    Watch(WatchArgs),
}

#[derive(Args, Debug)]
struct WatchArgs {
    /// Query text. `_RANGE_` is replaced with the range length in seconds.
    #[arg(long)]
    query: String,

    /// Range start: relative (`now-15m`) or a timestamp.
    #[arg(long, default_value = "now-15m")]
    from: String,

    /// Range end timestamp; omitted for relative ranges.
    #[arg(long)]
    to: Option<String>,

    #[arg(long, value_enum, default_value_t = Fanout::Single)]
    fanout: Fanout,

    /// Rows kept per series.
    #[arg(long, default_value_t = 1000)]
    capacity: usize,

    /// Neutralize points that fall out of the range.
    #[arg(long)]
    cleanup: bool,

    /// Cutoff this many minutes back instead of the range start.
    #[arg(long)]
    cleanup_minutes: Option<u32>,

    /// Replace stale numbers with zero instead of null.
    #[arg(long)]
    zero_stale: bool,

    /// Fields left untouched by cleanup (repeatable).
    #[arg(long = "preserve")]
    preserved: Vec<String>,

    /// Use the streaming query endpoint.
    #[arg(long)]
    stream: bool,

    /// Bridge WebSocket URL (overrides settings).
    #[arg(long)]
    bridge_url: Option<String>,

    #[arg(long, default_value = "1")]
    panel: String,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Fanout {
    Single,
    Multiple,
}

impl From<Fanout> for FanoutMode {
    fn from(value: Fanout) -> Self {
        match value {
            Fanout::Single => Self::Single,
            Fanout::Multiple => Self::Multiple,
        }
    }
}

impl WatchArgs {
    fn options(&self) -> QueryOptions {
        let mut options = QueryOptions {
            fanout_mode: self.fanout.into(),
            buffer_capacity: self.capacity,
            cleanup_enabled: self.cleanup,
            ..QueryOptions::new(self.query.clone())
        };
        if let Some(minutes) = self.cleanup_minutes {
            options.cleanup_threshold_mode = CleanupThreshold::LastNMinutes;
            options.cleanup_minutes = minutes;
        }
        if self.zero_stale {
            options.stale_field_replacement = StaleReplacement::Zero;
        }
        if !self.preserved.is_empty() {
            options.preserved_fields = self.preserved.clone();
        }
        options
    }
}

fn load(cli: &Cli) -> Result<BoltSettings> {
    let settings = match &cli.settings {
        Some(path) => bolt_settings::load_settings_from_path(path),
        None => bolt_settings::load_settings(),
    };
    settings.context("Failed to load settings")
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = load(&cli)?;

    let level = cli.log_level.as_deref().unwrap_or(&settings.logging.level);
    let telemetry = TelemetryConfig::from_level_name(level, cli.log_json || settings.logging.json);
    bolt_telemetry::init_telemetry(&telemetry).context("Failed to initialize logging")?;

    match cli.command {
        Command::Bridge {
            host,
            port,
            upstream_url,
        } => {
            let mut config = BridgeConfig::from(&settings.bridge);
            if let Some(host) = host {
                config.host = host;
            }
            if let Some(port) = port {
                config.port = port;
            }
            if let Some(url) = upstream_url {
                config.upstream_url = url;
            }
            run_bridge(config).await
        }
        Command::Watch(args) => run_watch(args, &settings).await,
    }
}

async fn run_bridge(config: BridgeConfig) -> Result<()> {
    let handle = bolt_bridge::start(config).await.context("Failed to start bridge")?;
    tracing::info!(port = handle.port, "bridge ready");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl+c")?;

    tracing::info!("shutting down");
    handle.shutdown().await;
    Ok(())
}

async fn run_watch(args: WatchArgs, settings: &BoltSettings) -> Result<()> {
    let range = TimeRange::parse(&args.from, args.to.as_deref(), chrono::Utc::now())
        .with_context(|| format!("Invalid time range starting at {}", args.from))?;
    let bridge_url = args
        .bridge_url
        .clone()
        .unwrap_or_else(|| settings.supervisor.bridge_url.clone());

    let transport = WsTransport::new(bridge_url);
    let supervisor = Supervisor::start(Arc::new(transport), SupervisorConfig::from(&settings.supervisor));

    let mut request = QueryRequest::new(PanelId::from_raw(args.panel.clone()), args.options(), range);
    if args.stream {
        request.kind = QueryKind::Stream;
    }
    let mut results = supervisor.submit(request);

    loop {
        tokio::select! {
            resp = results.recv() => match resp {
                Some(resp) => print_response(&resp)?,
                None => break,
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    supervisor.shutdown().await;
    Ok(())
}

fn print_response(resp: &PanelResponse) -> Result<()> {
    let line = serde_json::to_string(resp).context("Failed to encode panel response")?;
    println!("{line}");
    Ok(())
}
