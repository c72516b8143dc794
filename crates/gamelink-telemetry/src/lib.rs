//! Logging setup and metric names for the gamelink bridge.

use tracing::Level;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Metric names shared by every crate that records them.
pub mod names {
    /// Accepted WebSocket connections.
    pub const CONNECTIONS_TOTAL: &str = "gamelink_connections_total";
    /// Sessions past the handshake.
    pub const SESSIONS_ACTIVE: &str = "gamelink_sessions_active";
    /// Hellos rejected for a bad credential.
    pub const HANDSHAKES_REJECTED: &str = "gamelink_handshakes_rejected_total";
    /// Frames that failed to decode.
    pub const DECODE_ERRORS: &str = "gamelink_decode_errors_total";
    /// Commands routed to a module, labelled by module.
    pub const COMMANDS_TOTAL: &str = "gamelink_commands_total";
    /// Commands no module claimed.
    pub const UNKNOWN_KIND_TOTAL: &str = "gamelink_unknown_kind_total";
    /// Events broadcast, labelled by kind.
    pub const EVENTS_TOTAL: &str = "gamelink_events_total";
    /// Broadcast frames a session could not take.
    pub const SEND_FAILURES: &str = "gamelink_send_failures_total";
    /// Sub-commands currently in the routing table.
    pub const SUBCOMMANDS_REGISTERED: &str = "gamelink_subcommands_registered";
}

/// Configuration for the telemetry subsystem.
#[derive(Clone, Debug)]
pub struct TelemetryConfig {
    /// Default log level. Overridden by `RUST_LOG`.
    pub log_level: Level,
    /// Per-module level overrides (e.g. `gamelink_server` => DEBUG).
    pub module_levels: Vec<(String, Level)>,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: Level::INFO,
            module_levels: Vec::new(),
            json: true,
        }
    }
}

/// Failure installing the global subscriber.
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    /// Another subscriber is already the global default.
    #[error("global subscriber already installed: {0}")]
    AlreadyInstalled(#[from] tracing_subscriber::util::TryInitError),
}

/// Parse a level name (`trace`..`error`, case-insensitive).
pub fn parse_level(s: &str) -> Option<Level> {
    s.trim().parse().ok()
}

/// Build the filter directive string for a config.
pub fn filter_directives(config: &TelemetryConfig) -> String {
    let mut filter = config.log_level.to_string().to_lowercase();
    for (module, level) in &config.module_levels {
        filter.push_str(&format!(",{}={}", module, level.to_string().to_lowercase()));
    }
    filter
}

/// Install the global subscriber. Call once at startup.
pub fn init_telemetry(config: &TelemetryConfig) -> Result<(), TelemetryError> {
    let directives = filter_directives(config);
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&directives));

    let fmt_layer = if config.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_span_list(true)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer().with_target(true).boxed()
    };

    tracing_subscriber::registry()
        .with(fmt_layer.with_filter(env_filter))
        .try_init()?;

    describe_metrics();
    Ok(())
}

/// Register descriptions for every metric the bridge records.
pub fn describe_metrics() {
    use metrics::{describe_counter, describe_gauge};

    describe_counter!(names::CONNECTIONS_TOTAL, "WebSocket connections accepted");
    describe_gauge!(names::SESSIONS_ACTIVE, "Sessions that completed the handshake");
    describe_counter!(names::HANDSHAKES_REJECTED, "Hello frames with a bad credential");
    describe_counter!(names::DECODE_ERRORS, "Frames that failed to decode");
    describe_counter!(names::COMMANDS_TOTAL, "Commands routed to a module");
    describe_counter!(names::UNKNOWN_KIND_TOTAL, "Commands no module claimed");
    describe_counter!(names::EVENTS_TOTAL, "Events broadcast to sessions");
    describe_counter!(names::SEND_FAILURES, "Frames a session could not accept");
    describe_gauge!(names::SUBCOMMANDS_REGISTERED, "Live dynamic subcommands");
}
