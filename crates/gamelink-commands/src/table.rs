//! The sub-command routing table.
//!
//! Two maps, primary name → spec and alias → primary, are published together
//! as one immutable snapshot. Writers build the next snapshot under a narrow
//! write gate and swap it in; readers clone the current `Arc` and never see
//! one map updated without the other.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use gamelink_core::{CommandSource, EventSlot};
use gamelink_telemetry::names;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use serde_json::json;
use tracing::{debug, info};

use crate::host::{CommandNode, CommandRegistrar};
use crate::sanitize::sanitize;

/// Event kind emitted for every routed invocation.
pub const EXECUTE_EVENT: &str = "Command.Execute";

/// One registered sub-command.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct SubcommandSpec {
    /// Sanitized primary name.
    pub name: String,
    /// Permission tag required to use it, if any.
    pub permission: Option<String>,
    /// Sanitized aliases currently routed to it.
    pub aliases: Vec<String>,
}

/// Result of [`CommandTable::register`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Registration {
    /// Root label the sub-command lives under.
    pub root: String,
    /// Sanitized primary name.
    pub name: String,
    /// Aliases actually installed (after sanitizing and conflict checks).
    pub aliases: Vec<String>,
}

/// Outcome of routing one invocation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Invocation {
    /// Event emitted for this primary.
    Dispatched {
        /// Resolved primary.
        name: String,
    },
    /// Label resolves to nothing.
    Unknown {
        /// Label as typed, sanitized.
        label: String,
    },
    /// Resolved, but the sender lacks the permission tag.
    Denied {
        /// Resolved primary.
        name: String,
        /// Label as typed, sanitized.
        label: String,
    },
}

#[derive(Clone, Debug, Default)]
struct Routes {
    specs: BTreeMap<String, SubcommandSpec>,
    aliases: BTreeMap<String, String>,
}

impl Routes {
    fn resolve(&self, label: &str) -> Option<&SubcommandSpec> {
        self.specs
            .get(label)
            .or_else(|| self.aliases.get(label).and_then(|p| self.specs.get(p)))
    }

    /// Drop `alias` from whichever spec lists it.
    fn detach_alias(&mut self, alias: &str) {
        if let Some(owner) = self.aliases.remove(alias) {
            if let Some(spec) = self.specs.get_mut(&owner) {
                spec.aliases.retain(|a| a != alias);
            }
        }
    }

    fn remove_spec(&mut self, name: &str) -> Option<SubcommandSpec> {
        let spec = self.specs.remove(name)?;
        self.aliases.retain(|_, primary| primary != name);
        Some(spec)
    }
}

/// Live set of sub-commands under one root label.
pub struct CommandTable {
    root: String,
    routes: RwLock<Arc<Routes>>,
    write_gate: Mutex<()>,
    bound_labels: Mutex<Vec<String>>,
    events: Arc<EventSlot>,
}

impl CommandTable {
    /// Table under `root_label` with its own, initially detached, event slot.
    pub fn new(root_label: &str) -> Self {
        Self::with_events(root_label, Arc::new(EventSlot::new()))
    }

    /// Table emitting through a slot shared with other event producers.
    pub fn with_events(root_label: &str, events: Arc<EventSlot>) -> Self {
        Self {
            root: sanitize(root_label),
            routes: RwLock::new(Arc::new(Routes::default())),
            write_gate: Mutex::new(()),
            bound_labels: Mutex::new(Vec::new()),
            events,
        }
    }

    /// The static root label.
    pub fn root(&self) -> &str {
        &self.root
    }

    /// Where `Command.Execute` events go.
    pub fn events(&self) -> &Arc<EventSlot> {
        &self.events
    }

    fn snapshot(&self) -> Arc<Routes> {
        Arc::clone(&self.routes.read())
    }

    fn update<R>(&self, f: impl FnOnce(&mut Routes) -> R) -> R {
        let _gate = self.write_gate.lock();
        let mut next = Routes::clone(&self.snapshot());
        let result = f(&mut next);
        #[allow(clippy::cast_precision_loss)]
        let count = next.specs.len() as f64;
        *self.routes.write() = Arc::new(next);
        metrics::gauge!(names::SUBCOMMANDS_REGISTERED).set(count);
        result
    }

    // ── Mutation ────────────────────────────────────────────────────

    /// Install or wholly replace a sub-command.
    ///
    /// Aliases equal to another spec's primary are skipped. An alias owned by
    /// another spec moves to this one. A primary that was some spec's alias
    /// detaches it from that spec.
    pub fn register(&self, name: &str, permission: Option<&str>, aliases: &[String]) -> Registration {
        let name = sanitize(name);
        let permission = permission
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(str::to_owned);

        let installed = self.update(|routes| {
            let _ = routes.remove_spec(&name);
            routes.detach_alias(&name);

            let mut installed: Vec<String> = Vec::new();
            for alias in aliases.iter().map(|a| sanitize(a)) {
                if alias == name || installed.contains(&alias) {
                    continue;
                }
                if routes.specs.contains_key(&alias) {
                    debug!(%alias, primary = %name, "alias shadows an existing primary, skipping");
                    continue;
                }
                routes.detach_alias(&alias);
                let _ = routes.aliases.insert(alias.clone(), name.clone());
                installed.push(alias);
            }

            let _ = routes.specs.insert(
                name.clone(),
                SubcommandSpec {
                    name: name.clone(),
                    permission: permission.clone(),
                    aliases: installed.clone(),
                },
            );
            installed
        });

        info!(root = %self.root, sub = %name, aliases = ?installed, "subcommand registered");
        Registration {
            root: self.root.clone(),
            name,
            aliases: installed,
        }
    }

    /// Remove a sub-command and its aliases. Returns whether it existed.
    pub fn unregister(&self, name: &str) -> bool {
        let name = sanitize(name);
        let removed = self.update(|routes| routes.remove_spec(&name).is_some());
        if removed {
            info!(root = %self.root, sub = %name, "subcommand unregistered");
        }
        removed
    }

    // ── Queries ─────────────────────────────────────────────────────

    /// Primary for `label`, or the sanitized label itself when unknown.
    pub fn resolve(&self, label: &str) -> String {
        let label = sanitize(label);
        let routes = self.snapshot();
        match routes.resolve(&label) {
            Some(spec) => spec.name.clone(),
            None => label,
        }
    }

    /// Whether `label` is a registered primary or alias.
    pub fn has_label(&self, label: &str) -> bool {
        self.snapshot().resolve(&sanitize(label)).is_some()
    }

    /// Spec registered under primary `name`.
    pub fn spec(&self, name: &str) -> Option<SubcommandSpec> {
        self.snapshot().specs.get(&sanitize(name)).cloned()
    }

    /// All specs, sorted by primary.
    pub fn specs(&self) -> Vec<SubcommandSpec> {
        self.snapshot().specs.values().cloned().collect()
    }

    /// Whether `sender` may use `primary`. Unregistered primaries never are.
    pub fn can_use(&self, sender: &dyn CommandSource, primary: &str) -> bool {
        let routes = self.snapshot();
        routes
            .specs
            .get(primary)
            .is_some_and(|spec| permitted(spec, sender))
    }

    /// Labels (primaries and aliases) completing the first token of `partial`.
    pub fn suggestions_for(&self, partial: &str, sender: &dyn CommandSource) -> Vec<String> {
        let prefix = partial
            .split_whitespace()
            .next()
            .unwrap_or("")
            .to_lowercase();
        let routes = self.snapshot();
        let labels: BTreeSet<&String> = routes.specs.keys().chain(routes.aliases.keys()).collect();
        labels
            .into_iter()
            .filter(|label| label.starts_with(&prefix))
            .filter(|label| routes.resolve(label).is_some_and(|spec| permitted(spec, sender)))
            .cloned()
            .collect()
    }

    /// Help listing for `sender`: usable primaries, sorted, with aliases.
    pub fn help_lines(&self, sender: &dyn CommandSource) -> Vec<String> {
        let routes = self.snapshot();
        let visible: Vec<&SubcommandSpec> = routes
            .specs
            .values()
            .filter(|spec| permitted(spec, sender))
            .collect();
        if visible.is_empty() {
            return vec!["No subcommands available.".to_owned()];
        }

        let mut lines = Vec::with_capacity(visible.len() + 1);
        lines.push(format!("/{} <subcommand> ...", self.root));
        for spec in visible {
            if spec.aliases.is_empty() {
                lines.push(format!("- {}", spec.name));
            } else {
                lines.push(format!("- {} (aliases: {})", spec.name, spec.aliases.join(", ")));
            }
        }
        lines
    }

    /// Send [`CommandTable::help_lines`] to `sender`.
    pub fn show_help(&self, sender: &dyn CommandSource) {
        for line in self.help_lines(sender) {
            sender.send_message(&line);
        }
    }

    // ── Invocation ──────────────────────────────────────────────────

    /// Resolve, check permission and emit `Command.Execute`.
    ///
    /// The event payload is `{name, label, args, sender}` where `label` is the
    /// sanitized label the sender typed.
    pub fn dispatch_invocation(
        &self,
        sender: &dyn CommandSource,
        label: &str,
        args: &[String],
    ) -> Invocation {
        let label = sanitize(label);
        let name = {
            let routes = self.snapshot();
            match routes.resolve(&label) {
                None => return Invocation::Unknown { label },
                Some(spec) if !permitted(spec, sender) => {
                    return Invocation::Denied {
                        name: spec.name.clone(),
                        label,
                    }
                }
                Some(spec) => spec.name.clone(),
            }
        };

        let payload = json!({
            "name": name,
            "label": label,
            "args": args,
            "sender": sender.descriptor(),
        });
        debug!(sub = %name, %label, "routing invocation");
        let _ = self.events.emit(EXECUTE_EVENT, payload);
        Invocation::Dispatched { name }
    }

    /// Route `/<root> <tokens...>` with sender feedback.
    pub fn route(&self, sender: &dyn CommandSource, tokens: &[String]) {
        let Some((label, args)) = tokens.split_first() else {
            self.show_help(sender);
            return;
        };
        match self.dispatch_invocation(sender, label, args) {
            Invocation::Dispatched { .. } => {}
            Invocation::Unknown { label } => {
                sender.send_message(&format!("Unknown subcommand: {label}"));
                self.show_help(sender);
            }
            Invocation::Denied { label, .. } => {
                sender.send_message(&format!(
                    "You don't have permission to use /{} {label}",
                    self.root
                ));
            }
        }
    }

    /// Direct route for a bound label. Unknown or denied labels are ignored.
    pub fn execute_label(&self, sender: &dyn CommandSource, label: &str, args: &[String]) -> bool {
        matches!(
            self.dispatch_invocation(sender, label, args),
            Invocation::Dispatched { .. }
        )
    }

    /// Consume a legacy `/label args...` chat line if it names a sub-command
    /// the host has no real command for. Returns whether it was consumed.
    pub fn intercept_slash(
        &self,
        host: &dyn CommandRegistrar,
        sender: &dyn CommandSource,
        message: &str,
    ) -> bool {
        let Some(line) = message.strip_prefix('/') else {
            return false;
        };
        let mut parts = line.split_whitespace();
        let Some(label) = parts.next() else {
            return false;
        };
        let label = label.to_lowercase();
        if host.has_root(&label) || !self.has_label(&label) {
            return false;
        }
        let args: Vec<String> = parts.map(str::to_owned).collect();
        let _ = self.execute_label(sender, &label, &args);
        true
    }

    // ── Host binding ────────────────────────────────────────────────

    /// Install the root node and one literal node per known label.
    ///
    /// The root shows help with no arguments and routes a greedy remainder
    /// through the table, completing from [`Self::suggestions_for`]. Literal
    /// nodes are a snapshot: labels registered later are reachable through
    /// the root until the next bind. Literal nodes consult the live table, so
    /// an unregistered label stops working immediately. Literal nodes from the
    /// previous bind are removed first; labels the host already owns are
    /// skipped.
    pub fn bind_to_host(self: &Arc<Self>, registrar: &dyn CommandRegistrar) {
        let help = Arc::clone(self);
        let router = Arc::clone(self);
        let suggester = Arc::clone(self);
        registrar.register(
            CommandNode::literal(self.root.clone())
                .executes(move |src, _| help.show_help(src))
                .greedy("rest", move |src, tokens| router.route(src, tokens))
                .suggests(move |src, partial| suggester.suggestions_for(partial, src)),
        );

        let mut bound = self.bound_labels.lock();
        for label in bound.drain(..) {
            let _ = registrar.unregister(&label);
        }

        let routes = self.snapshot();
        let labels: BTreeSet<&String> = routes.specs.keys().chain(routes.aliases.keys()).collect();
        for label in labels {
            if *label == self.root || registrar.has_root(label) {
                debug!(%label, "host already owns this label, not binding");
                continue;
            }
            registrar.register(self.literal_node(label));
            bound.push(label.clone());
        }
        info!(root = %self.root, literals = bound.len(), "bound subcommands to host");
    }

    fn literal_node(self: &Arc<Self>, label: &str) -> CommandNode {
        let gate = Arc::clone(self);
        let exec = Arc::clone(self);
        let exec_args = Arc::clone(self);
        let gate_label = label.to_owned();
        let exec_label = label.to_owned();
        let args_label = label.to_owned();
        CommandNode::literal(label)
            .requires(move |src| gate.can_use(src, &gate.resolve(&gate_label)))
            .executes(move |src, _| {
                let _ = exec.execute_label(src, &exec_label, &[]);
            })
            .greedy("args", move |src, args| {
                let _ = exec_args.execute_label(src, &args_label, args);
            })
    }

    /// Labels installed as literal nodes by the last bind.
    pub fn bound_labels(&self) -> Vec<String> {
        self.bound_labels.lock().clone()
    }
}

impl std::fmt::Debug for CommandTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let routes = self.snapshot();
        f.debug_struct("CommandTable")
            .field("root", &self.root)
            .field("specs", &routes.specs.len())
            .field("aliases", &routes.aliases.len())
            .finish_non_exhaustive()
    }
}

fn permitted(spec: &SubcommandSpec, sender: &dyn CommandSource) -> bool {
    spec.permission
        .as_deref()
        .map_or(true, |perm| sender.has_permission(perm))
}
