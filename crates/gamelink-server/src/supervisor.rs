//! Restartable wrapper around [`BridgeServer`].
//!
//! A reload stops the current instance, waits for it to quiesce, pauses for
//! the grace period and starts a fresh instance with a freshly built module
//! set. Reloads are serialized; a second caller waits for the first.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use gamelink_core::{EventSink, EventSlot, OpModule};
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::config::ServerConfig;
use crate::server::{BridgeServer, ServerError};

/// Builds the handler modules for each new server instance.
pub type ModuleFactory = Arc<dyn Fn() -> Vec<Arc<dyn OpModule>> + Send + Sync>;

/// Owns the current [`BridgeServer`] and replaces it on demand.
pub struct ReloadSupervisor {
    config: ServerConfig,
    grace: Duration,
    events: Arc<EventSlot>,
    factory: ModuleFactory,
    current: Mutex<Option<Arc<BridgeServer>>>,
}

impl ReloadSupervisor {
    /// `events` is re-pointed at each instance as it starts.
    pub fn new<F>(config: ServerConfig, grace: Duration, events: Arc<EventSlot>, factory: F) -> Self
    where
        F: Fn() -> Vec<Arc<dyn OpModule>> + Send + Sync + 'static,
    {
        Self {
            config,
            grace,
            events,
            factory: Arc::new(factory),
            current: Mutex::new(None),
        }
    }

    /// Start the first instance.
    pub async fn start(&self) -> Result<SocketAddr, ServerError> {
        let mut current = self.current.lock().await;
        if current.as_ref().is_some_and(|s| s.is_running()) {
            return Err(ServerError::AlreadyStarted);
        }
        self.launch(&mut current).await
    }

    /// Replace the running instance with a fresh one.
    ///
    /// If the new instance fails to bind, no server is running afterwards and
    /// the bind error is returned.
    pub async fn reload(&self) -> Result<SocketAddr, ServerError> {
        let mut current = self.current.lock().await;
        info!("reloading bridge server");
        if !self.retire(&mut current).await {
            warn!("previous server did not quiesce, starting the new one anyway");
        }
        tokio::time::sleep(self.grace).await;
        match self.launch(&mut current).await {
            Ok(addr) => {
                info!(%addr, "reload complete");
                Ok(addr)
            }
            Err(error) => {
                warn!(%error, "reload failed, no server running");
                Err(error)
            }
        }
    }

    /// Stop the running instance, if any. Returns whether it quiesced in time.
    pub async fn stop(&self) -> bool {
        let mut current = self.current.lock().await;
        self.retire(&mut current).await
    }

    /// The running instance, if any.
    pub async fn current(&self) -> Option<Arc<BridgeServer>> {
        self.current.lock().await.clone()
    }

    /// Address of the running instance, if any.
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        self.current().await.and_then(|s| s.local_addr())
    }

    async fn launch(&self, slot: &mut Option<Arc<BridgeServer>>) -> Result<SocketAddr, ServerError> {
        let server = Arc::new(BridgeServer::new(self.config.clone(), (self.factory)()));
        let addr = server.start().await?;
        self.events.attach(Arc::clone(&server) as Arc<dyn EventSink>);
        *slot = Some(server);
        Ok(addr)
    }

    async fn retire(&self, slot: &mut Option<Arc<BridgeServer>>) -> bool {
        let Some(server) = slot.take() else {
            return true;
        };
        self.events.detach();
        server.stop();
        server.wait_stopped(self.config.shutdown_timeout).await
    }
}
