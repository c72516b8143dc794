//! `/<root>ctl` admin command.

use std::sync::{Arc, Weak};

use gamelink_commands::{CommandNode, CommandRegistrar};
use gamelink_core::CommandSource;
use gamelink_server::ReloadSupervisor;
use tokio::runtime::Handle;
use tracing::{info, warn};

use crate::host::StandaloneHost;

/// Permission tag guarding the admin command.
pub const ADMIN_PERMISSION: &str = "gamelink.admin";

/// Install `/<root>ctl reload`, which swaps the bridge server for a fresh
/// instance and reports the outcome to the sender.
pub fn install(host: &Arc<StandaloneHost>, root: &str, supervisor: Arc<ReloadSupervisor>, runtime: Handle) {
    let label = format!("{root}ctl");
    let usage = format!("Usage: /{label} reload");
    let host_ref: Weak<StandaloneHost> = Arc::downgrade(host);
    let usage_exec = usage.clone();

    host.dispatcher().register(
        CommandNode::literal(label)
            .requires(|src| src.has_permission(ADMIN_PERMISSION))
            .executes(move |src, _| src.send_message(&usage_exec))
            .greedy("action", move |src, args| {
                if !is_reload(args) {
                    src.send_message(&usage);
                    return;
                }
                let Some(host) = host_ref.upgrade() else {
                    return;
                };
                let Some(reply) = host.source_for(&src.descriptor()) else {
                    return;
                };
                reload(Arc::clone(&supervisor), reply, &runtime);
            })
            .suggests(|_, partial| {
                if "reload".starts_with(&partial.to_lowercase()) {
                    vec!["reload".to_owned()]
                } else {
                    Vec::new()
                }
            }),
    );
}

/// Exactly one argument, `reload` in any case.
fn is_reload(args: &[String]) -> bool {
    matches!(args, [action] if action.eq_ignore_ascii_case("reload"))
}

fn reload(supervisor: Arc<ReloadSupervisor>, reply: Arc<dyn CommandSource>, runtime: &Handle) {
    reply.send_message("Reloading bridge server...");
    let _ = runtime.spawn(async move {
        match supervisor.reload().await {
            Ok(addr) => {
                info!(%addr, "bridge server reloaded");
                reply.send_message(&format!("Reloaded. Listening on {addr}"));
            }
            Err(error) => {
                warn!(%error, "bridge server reload failed");
                reply.send_message(&format!("Reload failed: {error}"));
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::testing::recording_host;
    use gamelink_commands::CommandHost;
    use gamelink_core::EventSlot;
    use gamelink_server::ServerConfig;
    use std::time::Duration;

    fn supervisor() -> Arc<ReloadSupervisor> {
        let config = ServerConfig {
            host: "127.0.0.1".into(),
            port: 0,
            shutdown_timeout: Duration::from_secs(2),
            ..ServerConfig::default()
        };
        Arc::new(ReloadSupervisor::new(
            config,
            Duration::from_millis(10),
            Arc::new(EventSlot::new()),
            Vec::new,
        ))
    }

    #[tokio::test]
    async fn reload_reports_to_sender() {
        let (host, lines) = recording_host();
        let sup = supervisor();
        let _ = sup.start().await.unwrap();
        install(&host, "gamelink", Arc::clone(&sup), Handle::current());

        let console = host.console();
        assert!(host.dispatch_line(console.as_ref(), "gamelinkctl reload"));
        let done = tokio::time::timeout(Duration::from_secs(5), async {
            while !lines.lock().iter().any(|l| l.starts_with("Reloaded.")) {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await;
        assert!(done.is_ok());
        assert_eq!(lines.lock()[0], "Reloading bridge server...");
        assert!(sup.stop().await);
    }

    #[tokio::test]
    async fn players_without_permission_are_denied() {
        let (host, lines) = recording_host();
        install(&host, "gamelink", supervisor(), Handle::current());
        let steve = host.join("Steve").unwrap();
        assert!(!host.dispatch_line(steve.as_ref(), "gamelinkctl reload"));
        assert_eq!(
            lines.lock().last().unwrap(),
            "[-> Steve] You don't have permission to use this command."
        );
    }

    #[tokio::test]
    async fn bad_action_prints_usage() {
        let (host, lines) = recording_host();
        install(&host, "gamelink", supervisor(), Handle::current());
        let console = host.console();
        let _ = host.dispatch_line(console.as_ref(), "gamelinkctl explode");
        assert_eq!(lines.lock().last().unwrap(), "Usage: /gamelinkctl reload");
        let _ = host.dispatch_line(console.as_ref(), "gamelinkctl");
        assert_eq!(lines.lock().last().unwrap(), "Usage: /gamelinkctl reload");
    }

    #[test]
    fn reload_action_parsing() {
        assert!(is_reload(&["reload".to_owned()]));
        assert!(is_reload(&["RELOAD".to_owned()]));
        assert!(!is_reload(&[]));
        assert!(!is_reload(&["reload".to_owned(), "now".to_owned()]));
        assert!(!is_reload(&["restart".to_owned()]));
    }

    #[test]
    fn suggests_reload() {
        let (host, _) = recording_host();
        let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
        install(&host, "gamelink", supervisor(), runtime.handle().clone());
        let console = host.console();
        assert_eq!(host.dispatcher().complete(console.as_ref(), "gamelinkctl re"), vec!["reload"]);
    }
}
