//! `Command.*` operations for the remote controller.

use std::sync::Arc;

use gamelink_core::errors::UNKNOWN;
use gamelink_core::params::{optional_str, optional_str_list, require_str};
use gamelink_core::{run_on_tick, Completion, OpError, OpModule, Payload, TickExecutor};
use serde_json::{json, Value};
use tracing::debug;
use uuid::Uuid;

use crate::host::CommandHost;
use crate::table::CommandTable;

const KIND_PREFIX: &str = "Command.";

enum DispatchAs {
    Console,
    Player(Uuid),
}

/// Handler module exposing the routing table over the wire.
///
/// | kind | payload | result |
/// |---|---|---|
/// | `Command.register` | `name`, `permission?`, `aliases?` | `{ok, root, sub}` |
/// | `Command.unregister` | `name` | `{ok}` |
/// | `Command.dispatch` | `as?`, `line`, `uuid?` | `{ok}` |
pub struct CommandOps {
    table: Arc<CommandTable>,
    host: Arc<dyn CommandHost>,
    ticks: Arc<dyn TickExecutor>,
}

impl CommandOps {
    /// Module serving `table`, running host work on `ticks`.
    pub fn new(
        table: Arc<CommandTable>,
        host: Arc<dyn CommandHost>,
        ticks: Arc<dyn TickExecutor>,
    ) -> Self {
        Self { table, host, ticks }
    }

    fn register(&self, payload: &Payload) -> Result<Value, OpError> {
        let name = require_str(payload, "name")?;
        let permission = optional_str(payload, "permission")?;
        let aliases = optional_str_list(payload, "aliases")?;
        let reg = self.table.register(name, permission, &aliases);
        Ok(json!({"ok": true, "root": reg.root, "sub": reg.name}))
    }

    fn unregister(&self, payload: &Payload) -> Result<Value, OpError> {
        let name = require_str(payload, "name")?;
        let _ = self.table.unregister(name);
        Ok(json!({"ok": true}))
    }

    fn dispatch(&self, payload: &Payload, done: Completion) {
        let (line, who) = match parse_dispatch(payload) {
            Ok(v) => v,
            Err(err) => return done.fail_with(&err),
        };

        let full = format!("{} {}", self.table.root(), line.trim());
        let host = Arc::clone(&self.host);
        run_on_tick(self.ticks.as_ref(), done, move || {
            let source = match who {
                DispatchAs::Console => host.console(),
                DispatchAs::Player(uuid) => host
                    .player(uuid)
                    .ok_or_else(|| OpError::NotOnline(format!("player {uuid} is not online")))?,
            };
            debug!(line = %full, "dispatching command line");
            let ok = host.dispatch_line(source.as_ref(), &full);
            Ok(json!({"ok": ok}))
        });
    }
}

fn parse_dispatch(payload: &Payload) -> Result<(String, DispatchAs), OpError> {
    let line = require_str(payload, "line")?.to_owned();
    let who = match optional_str(payload, "as")?.map(str::to_uppercase).as_deref() {
        None | Some("CONSOLE") => DispatchAs::Console,
        Some("PLAYER") => {
            let raw = require_str(payload, "uuid")?;
            let uuid = Uuid::parse_str(raw)
                .map_err(|_| OpError::BadRequest(format!("invalid uuid: {raw}")))?;
            DispatchAs::Player(uuid)
        }
        Some(other) => {
            return Err(OpError::BadRequest(format!(
                "as must be PLAYER or CONSOLE, got {other}"
            )))
        }
    };
    Ok((line, who))
}

impl OpModule for CommandOps {
    fn name(&self) -> &str {
        "commands"
    }

    fn handles(&self, kind: &str) -> bool {
        kind.starts_with(KIND_PREFIX)
    }

    fn handle(&self, kind: &str, payload: Payload, done: Completion) {
        match kind {
            "Command.register" => done.complete(self.register(&payload)),
            "Command.unregister" => done.complete(self.unregister(&payload)),
            "Command.dispatch" => self.dispatch(&payload, done),
            _ => done.fail(UNKNOWN, kind),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::testing::TestSender;
    use crate::host::{CommandDispatcher, CommandRegistrar};
    use gamelink_core::{CommandSource, Outcome, SenderDescriptor, TickLoop};
    use parking_lot::Mutex;
    use std::sync::mpsc;
    use std::time::Duration;

    const WAIT: Duration = Duration::from_secs(5);

    struct FakeHost {
        dispatcher: CommandDispatcher,
        console: Arc<TestSender>,
        player_id: Uuid,
        player: Arc<TestSender>,
        lines: Mutex<Vec<(SenderDescriptor, String)>>,
    }

    impl FakeHost {
        fn new() -> Self {
            let player = TestSender::player("Alex", &[]);
            let player_id = match &player.descriptor {
                SenderDescriptor::Player { uuid, .. } => *uuid,
                SenderDescriptor::Console => unreachable!(),
            };
            Self {
                dispatcher: CommandDispatcher::new(),
                console: Arc::new(TestSender::console()),
                player_id,
                player: Arc::new(player),
                lines: Mutex::new(Vec::new()),
            }
        }
    }

    impl CommandHost for FakeHost {
        fn console(&self) -> Arc<dyn CommandSource> {
            self.console.clone()
        }

        fn player(&self, uuid: Uuid) -> Option<Arc<dyn CommandSource>> {
            (uuid == self.player_id).then(|| self.player.clone() as Arc<dyn CommandSource>)
        }

        fn dispatch_line(&self, source: &dyn CommandSource, line: &str) -> bool {
            self.lines.lock().push((source.descriptor(), line.to_owned()));
            self.dispatcher.execute(source, line)
        }
    }

    struct Fixture {
        ops: CommandOps,
        table: Arc<CommandTable>,
        host: Arc<FakeHost>,
        _ticks: Arc<TickLoop>,
    }

    fn fixture() -> Fixture {
        let table = Arc::new(CommandTable::new("gamelink"));
        let host = Arc::new(FakeHost::new());
        let ticks = Arc::new(TickLoop::spawn(Duration::from_millis(2)).unwrap());
        let ops = CommandOps::new(table.clone(), host.clone(), ticks.clone());
        Fixture {
            ops,
            table,
            host,
            _ticks: ticks,
        }
    }

    fn call(ops: &CommandOps, kind: &str, payload: Value) -> Outcome {
        let (tx, rx) = mpsc::channel();
        let done = Completion::new(kind, move |o| {
            let _ = tx.send(o);
        });
        let Value::Object(payload) = payload else {
            panic!("payload must be an object");
        };
        ops.handle(kind, payload, done);
        rx.recv_timeout(WAIT).unwrap()
    }

    fn fail_code(outcome: &Outcome) -> &str {
        match outcome {
            Outcome::Fail { code, .. } => code,
            Outcome::Respond(v) => panic!("expected failure, got {v}"),
        }
    }

    #[test]
    fn claims_command_namespace() {
        let f = fixture();
        assert!(f.ops.handles("Command.register"));
        assert!(f.ops.handles("Command.anything"));
        assert!(!f.ops.handles("Player.give"));
    }

    #[test]
    fn register_responds_with_root_and_sub() {
        let f = fixture();
        let out = call(
            &f.ops,
            "Command.register",
            json!({"name": "Heal", "permission": null, "aliases": ["h"]}),
        );
        assert_eq!(
            out,
            Outcome::Respond(json!({"ok": true, "root": "gamelink", "sub": "heal"}))
        );
        assert_eq!(f.table.resolve("h"), "heal");
    }

    #[test]
    fn register_without_name_is_bad_request_and_mutates_nothing() {
        let f = fixture();
        let out = call(&f.ops, "Command.register", json!({"aliases": ["h"]}));
        assert_eq!(fail_code(&out), "BAD_REQUEST");
        assert!(f.table.specs().is_empty());
    }

    #[test]
    fn unregister_is_ok_even_when_absent() {
        let f = fixture();
        let _ = f.table.register("heal", None, &[]);
        let out = call(&f.ops, "Command.unregister", json!({"name": "heal"}));
        assert_eq!(out, Outcome::Respond(json!({"ok": true})));
        let out = call(&f.ops, "Command.unregister", json!({"name": "heal"}));
        assert_eq!(out, Outcome::Respond(json!({"ok": true})));
        assert!(f.table.spec("heal").is_none());
    }

    #[test]
    fn unknown_command_kind_is_unknown() {
        let f = fixture();
        let out = call(&f.ops, "Command.explode", json!({}));
        assert_eq!(
            out,
            Outcome::Fail {
                code: "UNKNOWN".into(),
                message: "Command.explode".into()
            }
        );
    }

    #[test]
    fn dispatch_as_console_prefixes_root() {
        let f = fixture();
        f.table.bind_to_host(&f.host.dispatcher);
        let _ = f.table.register("heal", None, &[]);
        let out = call(&f.ops, "Command.dispatch", json!({"line": "heal Steve"}));
        assert_eq!(out, Outcome::Respond(json!({"ok": true})));
        let lines = f.host.lines.lock();
        assert_eq!(lines[0], (SenderDescriptor::Console, "gamelink heal Steve".to_owned()));
    }

    #[test]
    fn dispatch_as_player() {
        let f = fixture();
        let out = call(
            &f.ops,
            "Command.dispatch",
            json!({"as": "player", "uuid": f.host.player_id.to_string(), "line": "x"}),
        );
        // No root bound in the host, so the line is not accepted.
        assert_eq!(out, Outcome::Respond(json!({"ok": false})));
        assert!(matches!(
            f.host.lines.lock()[0].0,
            SenderDescriptor::Player { .. }
        ));
    }

    #[test]
    fn dispatch_offline_player_is_not_online() {
        let f = fixture();
        let out = call(
            &f.ops,
            "Command.dispatch",
            json!({"as": "PLAYER", "uuid": Uuid::nil().to_string(), "line": "x"}),
        );
        assert_eq!(fail_code(&out), "NOT_ONLINE");
    }

    #[test]
    fn dispatch_validation_errors() {
        let f = fixture();
        assert_eq!(fail_code(&call(&f.ops, "Command.dispatch", json!({}))), "BAD_REQUEST");
        assert_eq!(
            fail_code(&call(&f.ops, "Command.dispatch", json!({"as": "PLAYER", "line": "x"}))),
            "BAD_REQUEST"
        );
        assert_eq!(
            fail_code(&call(
                &f.ops,
                "Command.dispatch",
                json!({"as": "PLAYER", "uuid": "not-a-uuid", "line": "x"})
            )),
            "BAD_REQUEST"
        );
        assert_eq!(
            fail_code(&call(&f.ops, "Command.dispatch", json!({"as": "ROBOT", "line": "x"}))),
            "BAD_REQUEST"
        );
        assert!(f.host.lines.lock().is_empty());
    }

    #[test]
    fn dispatch_runs_on_tick_thread() {
        let f = fixture();
        let seen = Arc::new(Mutex::new(None));
        let observed = Arc::clone(&seen);
        f.host.dispatcher.register(
            crate::host::CommandNode::literal("gamelink")
                .greedy("rest", move |_, _| {
                    *observed.lock() = Some(gamelink_core::tick::on_tick_thread());
                }),
        );
        let out = call(&f.ops, "Command.dispatch", json!({"line": "anything"}));
        assert_eq!(out, Outcome::Respond(json!({"ok": true})));
        assert_eq!(*seen.lock(), Some(true));
    }
}
