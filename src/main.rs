//! # gamelink
//!
//! Standalone bridge binary: a simulated game host driven from the console,
//! the dynamic sub-command table and the WebSocket bridge server, wired
//! together.

#![deny(unsafe_code)]

mod admin;
mod console;
mod host;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use gamelink_commands::{CommandHost, CommandOps, CommandTable};
use gamelink_core::{EventSlot, OpModule, TickExecutor, TickLoop};
use gamelink_settings::{load_settings_from_path, settings_path, GamelinkSettings, LoggingSettings};
use gamelink_server::{ReloadSupervisor, ServerConfig};
use gamelink_telemetry::{init_telemetry, parse_level, TelemetryConfig};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Level};

use crate::host::StandaloneHost;

/// Game server bridge for remote controllers.
#[derive(Parser, Debug)]
#[command(name = "gamelink", about = "Game server bridge for remote controllers")]
struct Cli {
    /// Settings file (default `~/.gamelink/settings.json`).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// Human-readable logs instead of JSON lines.
    #[arg(long)]
    pretty: bool,
}

impl Cli {
    fn apply(&self, settings: &mut GamelinkSettings) {
        if let Some(host) = &self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if self.pretty {
            settings.logging.json = false;
        }
    }
}

fn telemetry_config(logging: &LoggingSettings) -> TelemetryConfig {
    let module_levels = logging
        .modules
        .iter()
        .filter_map(|(module, level)| parse_level(level).map(|l| (module.clone(), l)))
        .collect();
    TelemetryConfig {
        log_level: parse_level(&logging.level).unwrap_or(Level::INFO),
        module_levels,
        json: logging.json,
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    let path = args.config.clone().unwrap_or_else(settings_path);
    let mut settings = load_settings_from_path(&path)
        .with_context(|| format!("Failed to load settings from {}", path.display()))?;
    args.apply(&mut settings);

    init_telemetry(&telemetry_config(&settings.logging)).context("Failed to install logging")?;

    let ticks = Arc::new(TickLoop::spawn(settings.tick.interval()).context("Failed to start tick thread")?);
    let events = Arc::new(EventSlot::new());
    let host = Arc::new(StandaloneHost::new());
    let table = Arc::new(CommandTable::with_events(&settings.commands.root_label, Arc::clone(&events)));
    table.bind_to_host(host.dispatcher());

    let factory = {
        let (table, host, ticks) = (Arc::clone(&table), Arc::clone(&host), Arc::clone(&ticks));
        move || {
            let ops = CommandOps::new(
                Arc::clone(&table),
                Arc::clone(&host) as Arc<dyn CommandHost>,
                Arc::clone(&ticks) as Arc<dyn TickExecutor>,
            );
            vec![Arc::new(ops) as Arc<dyn OpModule>]
        }
    };
    let supervisor = Arc::new(ReloadSupervisor::new(
        ServerConfig::from(&settings.server),
        settings.server.reload_grace(),
        Arc::clone(&events),
        factory,
    ));

    let stop = CancellationToken::new();
    console::install_builtins(&host, &table, &events, &stop);
    admin::install(&host, table.root(), Arc::clone(&supervisor), tokio::runtime::Handle::current());

    let addr = supervisor.start().await.context("Failed to start bridge server")?;
    info!(%addr, root = table.root(), "gamelink listening");

    let _console = console::spawn_reader(Arc::clone(&host), Arc::clone(&ticks) as Arc<dyn TickExecutor>)
        .context("Failed to start console reader")?;

    tokio::select! {
        signal = tokio::signal::ctrl_c() => signal.context("Failed to listen for ctrl-c")?,
        () = stop.cancelled() => {}
    }

    info!("Shutting down...");
    if !supervisor.stop().await {
        warn!("bridge server did not quiesce before the shutdown timeout");
    }
    ticks.shutdown();
    info!("Shutdown complete");
    Ok(())
}
