//! Dynamic sub-commands under one static root command.
//!
//! The remote controller registers sub-commands at runtime; players and the
//! console reach them as `/<root> <sub> args...` (or directly as `/<sub>` once
//! bound). Nothing runs locally: an invocation becomes a `Command.Execute`
//! event for the controller to act on.

pub mod host;
pub mod ops;
pub mod sanitize;
pub mod table;

pub use host::{CommandDispatcher, CommandHost, CommandNode, CommandRegistrar};
pub use ops::CommandOps;
pub use sanitize::{sanitize, PLACEHOLDER};
pub use table::{CommandTable, Invocation, Registration, SubcommandSpec};
