//! WebSocket bridge server.
//!
//! Accepts remote controller connections, runs the `hello` handshake, routes
//! `cmd` envelopes to handler modules and fans `evt` envelopes out to every
//! ready session. [`ReloadSupervisor`] swaps whole server instances on reload.

mod connection;

pub mod config;
pub mod dispatch;
pub mod handshake;
pub mod registry;
pub mod server;
pub mod session;
pub mod shutdown;
pub mod supervisor;

pub use config::ServerConfig;
pub use dispatch::DispatchRouter;
pub use registry::SessionRegistry;
pub use server::{BridgeServer, HealthResponse, ServerError};
pub use session::{ReplySlot, Session, SessionState};
pub use shutdown::ShutdownCoordinator;
pub use supervisor::{ModuleFactory, ReloadSupervisor};
