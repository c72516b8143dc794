//! Operator console: built-in host commands and the stdin reader.

use std::io::{self, BufRead};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};

use gamelink_commands::{CommandHost, CommandNode, CommandRegistrar, CommandTable};
use gamelink_core::{CommandSource, EventSlot, TickExecutor};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::host::StandaloneHost;

/// Event emitted when a player comes online.
pub const JOIN_EVENT: &str = "Player.Join";

/// Event emitted for every plain chat line.
pub const CHAT_EVENT: &str = "Player.Chat";

/// Install `join`, `leave`, `list`, `op`, `say` and `stop` on the host.
///
/// Nodes hold the host weakly; it owns them through its dispatcher.
pub fn install_builtins(
    host: &Arc<StandaloneHost>,
    table: &Arc<CommandTable>,
    events: &Arc<EventSlot>,
    stop: &CancellationToken,
) {
    let registrar = host.dispatcher();

    let (h, ev) = (Arc::downgrade(host), Arc::clone(events));
    registrar.register(CommandNode::literal("join").greedy("name", move |src, args| {
        let [name, ..] = args else { return };
        with_host(&h, |host| join(host, &ev, src, name));
    }));

    let h = Arc::downgrade(host);
    registrar.register(CommandNode::literal("leave").greedy("name", move |src, args| {
        let [name, ..] = args else { return };
        with_host(&h, |host| match host.leave(name) {
            Some(p) => src.send_message(&format!("{} left the game", p.name())),
            None => src.send_message(&format!("{name} is not online")),
        });
    }));

    let h = Arc::downgrade(host);
    registrar.register(CommandNode::literal("list").executes(move |src, _| {
        with_host(&h, |host| {
            let online = host.online();
            src.send_message(&format!("Online ({}): {}", online.len(), online.join(", ")));
        });
    }));

    let h = Arc::downgrade(host);
    registrar.register(
        CommandNode::literal("op")
            .requires(|src| src.descriptor().is_console())
            .greedy("name", move |src, args| {
                let [name, ..] = args else { return };
                with_host(&h, |host| match host.player_named(name) {
                    Some(p) => {
                        p.set_operator(!p.is_operator());
                        let state = if p.is_operator() { "now" } else { "no longer" };
                        src.send_message(&format!("{} is {state} an operator", p.name()));
                    }
                    None => src.send_message(&format!("{name} is not online")),
                });
            }),
    );

    let (h, t, ev) = (Arc::downgrade(host), Arc::clone(table), Arc::clone(events));
    registrar.register(CommandNode::literal("say").greedy("player message", move |src, args| {
        with_host(&h, |host| say(host, &t, &ev, src, args));
    }));

    let stop = stop.clone();
    registrar.register(
        CommandNode::literal("stop")
            .requires(|src| src.descriptor().is_console())
            .executes(move |src, _| {
                src.send_message("Stopping...");
                stop.cancel();
            }),
    );
}

fn with_host(host: &Weak<StandaloneHost>, f: impl FnOnce(&Arc<StandaloneHost>)) {
    if let Some(host) = host.upgrade() {
        f(&host);
    }
}

fn join(host: &StandaloneHost, events: &EventSlot, src: &dyn CommandSource, name: &str) {
    let Some(player) = host.join(name) else {
        src.send_message(&format!("{name} is already online"));
        return;
    };
    src.send_message(&format!("{} joined the game ({})", player.name(), player.uuid()));
    let _ = events.emit(
        JOIN_EVENT,
        json!({"player": {"name": player.name(), "uuid": player.uuid()}}),
    );
}

/// `say <player> <message...>`: chat as a player. A message starting with
/// `/` is a command line; table labels the host has no command for are
/// intercepted before the host sees them. Anything else is chat and is
/// forwarded as [`CHAT_EVENT`].
fn say(
    host: &StandaloneHost,
    table: &CommandTable,
    events: &EventSlot,
    src: &dyn CommandSource,
    args: &[String],
) {
    let Some((name, words)) = args.split_first().filter(|(_, w)| !w.is_empty()) else {
        src.send_message("Usage: say <player> <message...>");
        return;
    };
    let Some(player) = host.player_named(name) else {
        src.send_message(&format!("{name} is not online"));
        return;
    };
    let message = words.join(" ");
    if message.starts_with('/') {
        if !table.intercept_slash(host.dispatcher(), player.as_ref(), &message) {
            let _ = host.dispatch_line(player.as_ref(), &message);
        }
    } else {
        info!(player = player.name(), %message, "chat");
        src.send_message(&format!("<{}> {message}", player.name()));
        let _ = events.emit(
            CHAT_EVENT,
            json!({"player": {"name": player.name(), "uuid": player.uuid()}, "message": message}),
        );
    }
}

/// Read console lines on a dedicated thread and run each on the tick thread.
pub fn spawn_reader(host: Arc<StandaloneHost>, ticks: Arc<dyn TickExecutor>) -> io::Result<JoinHandle<()>> {
    thread::Builder::new()
        .name("gamelink-console".into())
        .spawn(move || {
            for line in io::stdin().lock().lines() {
                let Ok(line) = line else { break };
                let line = line.trim().to_owned();
                if line.is_empty() {
                    continue;
                }
                let host = Arc::clone(&host);
                ticks.submit(
                    0,
                    Box::new(move || {
                        let console = host.console();
                        let _ = host.dispatch_line(console.as_ref(), &line);
                    }),
                );
            }
            debug!("console input closed");
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::testing::recording_host;
    use gamelink_core::EventSink;
    use parking_lot::Mutex;
    use serde_json::Value;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<(String, Value)>>);

    impl EventSink for Recorder {
        fn emit(&self, kind: &str, payload: Value) {
            self.0.lock().push((kind.to_owned(), payload));
        }
    }

    struct Fixture {
        host: Arc<StandaloneHost>,
        table: Arc<CommandTable>,
        lines: Arc<Mutex<Vec<String>>>,
        events: Arc<Recorder>,
        stop: CancellationToken,
    }

    impl Fixture {
        fn new() -> Self {
            let (host, lines) = recording_host();
            let slot = Arc::new(EventSlot::new());
            let events = Arc::new(Recorder::default());
            slot.attach(events.clone());
            let table = Arc::new(CommandTable::with_events("gamelink", slot.clone()));
            table.bind_to_host(host.dispatcher());
            let stop = CancellationToken::new();
            install_builtins(&host, &table, &slot, &stop);
            Self {
                host,
                table,
                lines,
                events,
                stop,
            }
        }

        fn console(&self, line: &str) -> bool {
            let console = self.host.console();
            self.host.dispatch_line(console.as_ref(), line)
        }

        fn last_line(&self) -> String {
            self.lines.lock().last().cloned().unwrap_or_default()
        }
    }

    #[test]
    fn join_emits_player_join() {
        let f = Fixture::new();
        assert!(f.console("join Steve"));
        let events = f.events.0.lock();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].0, "Player.Join");
        assert_eq!(events[0].1["player"]["name"], "Steve");
        let uuid = f.host.player_named("Steve").unwrap().uuid().to_string();
        assert_eq!(events[0].1["player"]["uuid"], uuid.as_str());
    }

    #[test]
    fn duplicate_join_emits_nothing() {
        let f = Fixture::new();
        let _ = f.console("join Steve");
        let _ = f.console("join steve");
        assert_eq!(f.events.0.lock().len(), 1);
        assert_eq!(f.last_line(), "steve is already online");
    }

    #[test]
    fn list_and_leave() {
        let f = Fixture::new();
        let _ = f.console("join Steve");
        let _ = f.console("join Alex");
        let _ = f.console("list");
        assert_eq!(f.last_line(), "Online (2): Alex, Steve");
        let _ = f.console("leave Alex");
        assert_eq!(f.last_line(), "Alex left the game");
        let _ = f.console("leave Alex");
        assert_eq!(f.last_line(), "Alex is not online");
    }

    #[test]
    fn op_toggles_and_is_console_only() {
        let f = Fixture::new();
        let _ = f.console("join Steve");
        let _ = f.console("op Steve");
        assert!(f.host.player_named("Steve").unwrap().is_operator());
        let steve = f.host.player_named("Steve").unwrap();
        assert!(!f.host.dispatch_line(steve.as_ref(), "op Steve"));
        let _ = f.console("op Steve");
        assert!(!steve.is_operator());
    }

    #[test]
    fn say_plain_chat() {
        let f = Fixture::new();
        let _ = f.console("join Steve");
        let _ = f.console("say Steve hello there");
        assert_eq!(f.last_line(), "<Steve> hello there");
    }

    #[test]
    fn say_emits_player_chat() {
        let f = Fixture::new();
        let _ = f.console("join Steve");
        let _ = f.console("say Steve hello there");
        let events = f.events.0.lock();
        let (kind, payload) = events.last().unwrap();
        assert_eq!(kind, "Player.Chat");
        assert_eq!(payload["message"], "hello there");
        assert_eq!(payload["player"]["name"], "Steve");
        let uuid = f.host.player_named("Steve").unwrap().uuid().to_string();
        assert_eq!(payload["player"]["uuid"], uuid.as_str());
    }

    #[test]
    fn say_slash_is_not_chat() {
        let f = Fixture::new();
        let _ = f.console("join Steve");
        let _ = f.console("say Steve /list");
        assert!(f.events.0.lock().iter().all(|(kind, _)| kind != "Player.Chat"));
    }

    #[test]
    fn say_slash_intercepts_table_label() {
        let f = Fixture::new();
        let _ = f.console("join Steve");
        let _ = f.table.register("heal", None, &[]);
        let _ = f.console("say Steve /heal me");
        let events = f.events.0.lock();
        let (kind, payload) = events.last().unwrap();
        assert_eq!(kind, "Command.Execute");
        assert_eq!(payload["name"], "heal");
        assert_eq!(payload["args"], json!(["me"]));
        assert_eq!(payload["sender"]["type"], "PLAYER");
    }

    #[test]
    fn say_slash_falls_through_to_host() {
        let f = Fixture::new();
        let _ = f.console("join Steve");
        let _ = f.console("say Steve /list");
        assert_eq!(f.last_line(), "[-> Steve] Online (1): Steve");
    }

    #[test]
    fn say_to_offline_player() {
        let f = Fixture::new();
        let _ = f.console("say Nobody hi");
        assert_eq!(f.last_line(), "Nobody is not online");
        let _ = f.console("say Nobody");
        assert_eq!(f.last_line(), "Usage: say <player> <message...>");
    }

    #[test]
    fn stop_cancels_token() {
        let f = Fixture::new();
        assert!(f.console("stop"));
        assert!(f.stop.is_cancelled());
    }

    #[test]
    fn builtins_do_not_shadow_table_root() {
        let f = Fixture::new();
        let _ = f.console("gamelink");
        assert_eq!(f.last_line(), "No subcommands available.");
    }
}
