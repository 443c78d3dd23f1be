//! HTTP server setup and accept loop.
//!
//! # Responsibilities
//! - Accept connections from the bounded listener
//! - Spawn one [`ConnectionLoop`] task per connection
//! - Stop accepting on shutdown and drain open connections
//! - Observability (connection spans, active-connection gauge)

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::sync::broadcast;
use tracing::Instrument;

use crate::config::ServerConfig;
use crate::http::connection::{ConnectionLoop, ConnectionSettings};
use crate::http::handler::Handler;
use crate::lifecycle::Shutdown;
use crate::net::{ConnectionPermit, ConnectionTracker, Listener, ListenerError};

/// Pause after a failed accept (e.g. file descriptor exhaustion).
const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

/// HTTP/1.1 server dispatching every request to one [`Handler`].
pub struct HttpServer<H> {
    config: ServerConfig,
    settings: Arc<ConnectionSettings>,
    handler: Arc<H>,
    tracker: ConnectionTracker,
}

impl<H: Handler> HttpServer<H> {
    /// Create a new HTTP server with the given configuration.
    pub fn new(config: ServerConfig, handler: H) -> Self {
        let settings = Arc::new(ConnectionSettings::from(&config));
        Self {
            config,
            settings,
            handler: Arc::new(handler),
            tracker: ConnectionTracker::new(),
        }
    }

    /// Run the server until `shutdown` fires, then wait up to
    /// `timeouts.shutdown_grace_secs` for open connections.
    pub async fn run(
        self,
        listener: Listener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), ListenerError> {
        let addr = listener.local_addr().map_err(ListenerError::Bind)?;
        tracing::info!(address = %addr, "HTTP server starting");

        let connections = Shutdown::new();
        loop {
            tokio::select! {
                _ = shutdown.recv() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, peer, permit)) => {
                        self.spawn_connection(stream, peer, permit, connections.subscribe());
                    }
                    Err(ListenerError::Accept(e)) => {
                        tracing::warn!(error = %e, "Accept failed");
                        tokio::time::sleep(ACCEPT_BACKOFF).await;
                    }
                    Err(e) => return Err(e),
                },
            }
        }

        tracing::info!(
            active_connections = self.tracker.active_count(),
            "Shutdown signal received, draining connections"
        );
        connections.trigger();
        let remaining = self
            .tracker
            .wait_idle(self.config.timeouts.shutdown_grace())
            .await;
        if remaining > 0 {
            tracing::warn!(remaining, "Grace period elapsed with connections still open");
        }

        tracing::info!("HTTP server stopped");
        Ok(())
    }

    fn spawn_connection(
        &self,
        stream: TcpStream,
        peer: SocketAddr,
        permit: ConnectionPermit,
        shutdown: broadcast::Receiver<()>,
    ) {
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!(peer_addr = %peer, error = %e, "Failed to set TCP_NODELAY");
        }
        let guard = self.tracker.track();
        let id = guard.id();
        let span = tracing::info_span!("connection", connection_id = %id, peer_addr = %peer);
        let connection = ConnectionLoop::new(stream, id, Arc::clone(&self.handler), Arc::clone(&self.settings))
            .with_shutdown(shutdown);

        tokio::spawn(
            async move {
                connection.run().await;
                drop(guard);
                drop(permit);
            }
            .instrument(span),
        );
    }

    /// Get a reference to the config.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Tracker of the connections this server has open.
    pub fn tracker(&self) -> ConnectionTracker {
        self.tracker.clone()
    }
}
