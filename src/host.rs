//! Standalone game host: an operator console, online players and the host
//! command tree.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use gamelink_commands::{CommandDispatcher, CommandHost};
use gamelink_core::{CommandSource, SenderDescriptor};
use tracing::info;
use uuid::Uuid;

/// Where sender feedback ends up.
pub type Output = Arc<dyn Fn(&str) + Send + Sync>;

/// The operator console. Holds every permission.
pub struct ConsoleSource {
    output: Output,
}

impl CommandSource for ConsoleSource {
    fn descriptor(&self) -> SenderDescriptor {
        SenderDescriptor::Console
    }

    fn has_permission(&self, _permission: &str) -> bool {
        true
    }

    fn send_message(&self, message: &str) {
        (self.output)(message);
    }
}

/// A simulated online player.
pub struct PlayerSource {
    name: String,
    uuid: Uuid,
    operator: AtomicBool,
    output: Output,
}

impl PlayerSource {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    pub fn is_operator(&self) -> bool {
        self.operator.load(Ordering::Relaxed)
    }

    pub fn set_operator(&self, operator: bool) {
        self.operator.store(operator, Ordering::Relaxed);
    }
}

impl CommandSource for PlayerSource {
    fn descriptor(&self) -> SenderDescriptor {
        SenderDescriptor::Player {
            name: self.name.clone(),
            uuid: self.uuid,
        }
    }

    /// Operators hold every tag; everyone else holds none.
    fn has_permission(&self, _permission: &str) -> bool {
        self.is_operator()
    }

    fn send_message(&self, message: &str) {
        (self.output)(&format!("[-> {}] {message}", self.name));
    }
}

pub struct StandaloneHost {
    dispatcher: CommandDispatcher,
    console: Arc<ConsoleSource>,
    players: DashMap<Uuid, Arc<PlayerSource>>,
    output: Output,
}

impl StandaloneHost {
    /// Host whose senders print to stdout.
    pub fn new() -> Self {
        Self::with_output(Arc::new(|line: &str| println!("{line}")))
    }

    pub fn with_output(output: Output) -> Self {
        Self {
            dispatcher: CommandDispatcher::new(),
            console: Arc::new(ConsoleSource {
                output: Arc::clone(&output),
            }),
            players: DashMap::new(),
            output,
        }
    }

    pub fn dispatcher(&self) -> &CommandDispatcher {
        &self.dispatcher
    }

    /// Bring a player online. Returns `None` if the name is already taken.
    pub fn join(&self, name: &str) -> Option<Arc<PlayerSource>> {
        if self.player_named(name).is_some() {
            return None;
        }
        let player = Arc::new(PlayerSource {
            name: name.to_owned(),
            uuid: Uuid::new_v4(),
            operator: AtomicBool::new(false),
            output: Arc::clone(&self.output),
        });
        let _ = self.players.insert(player.uuid, Arc::clone(&player));
        info!(player = name, uuid = %player.uuid, "player joined");
        Some(player)
    }

    pub fn leave(&self, name: &str) -> Option<Arc<PlayerSource>> {
        let player = self.player_named(name)?;
        let removed = self.players.remove(&player.uuid).map(|(_, p)| p);
        if removed.is_some() {
            info!(player = name, "player left");
        }
        removed
    }

    /// Case-insensitive lookup by name.
    pub fn player_named(&self, name: &str) -> Option<Arc<PlayerSource>> {
        self.players
            .iter()
            .find(|p| p.name.eq_ignore_ascii_case(name))
            .map(|p| Arc::clone(p.value()))
    }

    /// Online player names, sorted.
    pub fn online(&self) -> Vec<String> {
        let mut names: Vec<String> = self.players.iter().map(|p| p.name.clone()).collect();
        names.sort_unstable();
        names
    }

    /// Owned handle for whoever `descriptor` names, if still present.
    pub fn source_for(&self, descriptor: &SenderDescriptor) -> Option<Arc<dyn CommandSource>> {
        match descriptor {
            SenderDescriptor::Console => Some(self.console()),
            SenderDescriptor::Player { uuid, .. } => self.player(*uuid),
        }
    }
}

impl Default for StandaloneHost {
    fn default() -> Self {
        Self::new()
    }
}

impl CommandHost for StandaloneHost {
    fn console(&self) -> Arc<dyn CommandSource> {
        Arc::clone(&self.console) as Arc<dyn CommandSource>
    }

    fn player(&self, uuid: Uuid) -> Option<Arc<dyn CommandSource>> {
        self.players
            .get(&uuid)
            .map(|p| Arc::clone(p.value()) as Arc<dyn CommandSource>)
    }

    fn dispatch_line(&self, source: &dyn CommandSource, line: &str) -> bool {
        self.dispatcher.execute(source, line)
    }
}
