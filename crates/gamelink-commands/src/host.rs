//! Host command tree.
//!
//! A small command framework in the shape game servers expose: top-level
//! literal nodes, each with an optional permission predicate, an optional
//! zero-argument executor and an optional trailing greedy argument with its
//! own executor and tab-completion.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use gamelink_core::CommandSource;
use parking_lot::RwLock;
use tracing::debug;
use uuid::Uuid;

/// Predicate deciding whether a sender may see and run a node.
pub type Requirement = Arc<dyn Fn(&dyn CommandSource) -> bool + Send + Sync>;
/// Command body, called with the whitespace-split arguments.
pub type Executor = Arc<dyn Fn(&dyn CommandSource, &[String]) + Send + Sync>;
/// Tab-completion for a partially typed argument.
pub type Suggester = Arc<dyn Fn(&dyn CommandSource, &str) -> Vec<String> + Send + Sync>;

struct GreedyArg {
    name: String,
    executor: Executor,
    suggester: Option<Suggester>,
}

/// One top-level literal command.
pub struct CommandNode {
    name: String,
    requirement: Option<Requirement>,
    executor: Option<Executor>,
    greedy: Option<GreedyArg>,
}

impl CommandNode {
    /// Root node matched by `name`, case-insensitively.
    pub fn literal(name: impl Into<String>) -> Self {
        Self {
            name: name.into().to_lowercase(),
            requirement: None,
            executor: None,
            greedy: None,
        }
    }

    /// Only senders passing `f` can see or run this node.
    #[must_use]
    pub fn requires<F>(mut self, f: F) -> Self
    where
        F: Fn(&dyn CommandSource) -> bool + Send + Sync + 'static,
    {
        self.requirement = Some(Arc::new(f));
        self
    }

    /// Run when the node is invoked with no arguments.
    #[must_use]
    pub fn executes<F>(mut self, f: F) -> Self
    where
        F: Fn(&dyn CommandSource, &[String]) + Send + Sync + 'static,
    {
        self.executor = Some(Arc::new(f));
        self
    }

    /// Accept the rest of the line as whitespace-split tokens.
    #[must_use]
    pub fn greedy<F>(mut self, arg_name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&dyn CommandSource, &[String]) + Send + Sync + 'static,
    {
        self.greedy = Some(GreedyArg {
            name: arg_name.into(),
            executor: Arc::new(f),
            suggester: None,
        });
        self
    }

    /// Completion for the greedy argument. Ignored without one.
    #[must_use]
    pub fn suggests<F>(mut self, f: F) -> Self
    where
        F: Fn(&dyn CommandSource, &str) -> Vec<String> + Send + Sync + 'static,
    {
        if let Some(greedy) = self.greedy.as_mut() {
            greedy.suggester = Some(Arc::new(f));
        }
        self
    }

    /// Lowercased root name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether `source` passes the node's requirement.
    pub fn can_use(&self, source: &dyn CommandSource) -> bool {
        self.requirement.as_ref().map_or(true, |req| req(source))
    }

    /// Usage line, e.g. `/heal [args...]`.
    pub fn usage(&self) -> String {
        match (&self.executor, &self.greedy) {
            (Some(_), Some(g)) => format!("/{} [{}...]", self.name, g.name),
            (None, Some(g)) => format!("/{} <{}...>", self.name, g.name),
            _ => format!("/{}", self.name),
        }
    }
}

impl fmt::Debug for CommandNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandNode")
            .field("name", &self.name)
            .field("guarded", &self.requirement.is_some())
            .field("greedy", &self.greedy.as_ref().map(|g| g.name.as_str()))
            .finish_non_exhaustive()
    }
}

/// Where command nodes get installed.
pub trait CommandRegistrar: Send + Sync {
    /// Install `node`, replacing any root with the same name.
    fn register(&self, node: CommandNode);

    /// Remove a root. Returns whether one existed.
    fn unregister(&self, name: &str) -> bool;

    /// Whether a root named `name` is installed.
    fn has_root(&self, name: &str) -> bool;
}

/// The game server as seen by command handlers.
pub trait CommandHost: Send + Sync {
    /// The server console as a sender.
    fn console(&self) -> Arc<dyn CommandSource>;

    /// Online player by id.
    fn player(&self, uuid: Uuid) -> Option<Arc<dyn CommandSource>>;

    /// Execute a full command line (without the leading `/`) as `source`.
    /// Returns whether a command accepted it.
    fn dispatch_line(&self, source: &dyn CommandSource, line: &str) -> bool;
}

/// Registry and executor for top-level commands.
#[derive(Default)]
pub struct CommandDispatcher {
    roots: RwLock<BTreeMap<String, Arc<CommandNode>>>,
}

impl CommandDispatcher {
    /// Dispatcher with no roots.
    pub fn new() -> Self {
        Self::default()
    }

    /// Names of all installed roots, sorted.
    pub fn roots(&self) -> Vec<String> {
        self.roots.read().keys().cloned().collect()
    }

    fn node(&self, name: &str) -> Option<Arc<CommandNode>> {
        self.roots.read().get(&name.to_lowercase()).cloned()
    }

    /// Execute `line` (leading `/` optional) as `source`.
    ///
    /// Feedback for unknown commands, denied permissions and bad arity goes
    /// to the sender. Returns whether an executor ran.
    pub fn execute(&self, source: &dyn CommandSource, line: &str) -> bool {
        let line = line.trim().trim_start_matches('/');
        let (label, rest) = split_label(line);
        if label.is_empty() {
            return false;
        }

        let Some(node) = self.node(label) else {
            source.send_message(&format!("Unknown command: {label}"));
            return false;
        };
        if !node.can_use(source) {
            source.send_message("You don't have permission to use this command.");
            return false;
        }

        let tokens: Vec<String> = rest.split_whitespace().map(str::to_owned).collect();
        debug!(command = %node.name, args = tokens.len(), "executing host command");
        match (&node.executor, &node.greedy, tokens.is_empty()) {
            (Some(exec), _, true) => {
                exec(source, &[]);
                true
            }
            (_, Some(greedy), false) => {
                (greedy.executor)(source, &tokens);
                true
            }
            (None, Some(_), true) => {
                source.send_message(&format!("Usage: {}", node.usage()));
                false
            }
            _ => {
                source.send_message(&format!("Too many arguments. Usage: {}", node.usage()));
                false
            }
        }
    }

    /// Tab-completion for a partially typed line.
    ///
    /// Completes root names until the first space, then defers to the
    /// node's greedy-argument suggester.
    pub fn complete(&self, source: &dyn CommandSource, partial: &str) -> Vec<String> {
        let partial = partial.trim_start().trim_start_matches('/');
        match partial.split_once(char::is_whitespace) {
            None => {
                let prefix = partial.to_lowercase();
                self.roots
                    .read()
                    .values()
                    .filter(|n| n.name.starts_with(&prefix) && n.can_use(source))
                    .map(|n| n.name.clone())
                    .collect()
            }
            Some((label, rest)) => {
                let Some(node) = self.node(label) else {
                    return Vec::new();
                };
                if !node.can_use(source) {
                    return Vec::new();
                }
                node.greedy
                    .as_ref()
                    .and_then(|g| g.suggester.as_ref())
                    .map(|s| s(source, rest.trim_start()))
                    .unwrap_or_default()
            }
        }
    }
}

impl CommandRegistrar for CommandDispatcher {
    fn register(&self, node: CommandNode) {
        debug!(command = %node.name, "registering host command");
        let _ = self.roots.write().insert(node.name.clone(), Arc::new(node));
    }

    fn unregister(&self, name: &str) -> bool {
        self.roots.write().remove(&name.to_lowercase()).is_some()
    }

    fn has_root(&self, name: &str) -> bool {
        self.roots.read().contains_key(&name.to_lowercase())
    }
}

impl fmt::Debug for CommandDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandDispatcher")
            .field("roots", &self.roots())
            .finish()
    }
}

fn split_label(line: &str) -> (&str, &str) {
    match line.split_once(char::is_whitespace) {
        Some((label, rest)) => (label, rest.trim()),
        None => (line, ""),
    }
}
