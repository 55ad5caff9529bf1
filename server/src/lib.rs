//! The network face of the presence service: accepts TCP clients and serves
//! each one against the shared session registry.

use domain::Registry;
use log::*;
use service::config::Config;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use transport::{Connection, TcpConnection};

mod connections;
pub mod error;
mod handler;
mod relay;

pub use connections::ConnectionRegistry;
pub use handler::{handle_client, ClientOptions};

#[derive(Clone)]
pub struct AppState {
    pub registry: Registry,
    pub config: Config,
    connections: Arc<ConnectionRegistry>,
}

impl AppState {
    pub fn new(app_config: Config, registry: Registry) -> Self {
        Self {
            registry,
            config: app_config,
            connections: Arc::new(ConnectionRegistry::new()),
        }
    }

    pub fn client_options(&self) -> ClientOptions {
        ClientOptions::from_config(&self.config)
    }

    /// Number of client connections currently being served.
    pub fn live_connections(&self) -> usize {
        self.connections.len()
    }
}

/// Bind the configured address and serve clients until Ctrl-C.
pub async fn init_server(app_state: AppState) -> std::io::Result<()> {
    let listen_addr = app_state.config.listen_address();
    let listener = TcpListener::bind(&listen_addr).await?;
    info!("Server starting... listening for connections on {listen_addr}");

    let shutdown = CancellationToken::new();
    let on_signal = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received Ctrl-C, shutting down");
                on_signal.cancel();
            }
            Err(e) => error!("Unable to listen for shutdown signal: {e}"),
        }
    });

    serve(listener, app_state, shutdown).await
}

/// Accept clients on `listener` until `shutdown` fires, then close every
/// live connection.
pub async fn serve(
    listener: TcpListener,
    app_state: AppState,
    shutdown: CancellationToken,
) -> std::io::Result<()> {
    let options = app_state.client_options();
    let max_frame_length = app_state.config.max_frame_length;

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                info!("No longer accepting connections");
                break;
            }
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => match TcpConnection::new(stream, max_frame_length) {
                    Ok(conn) => {
                        info!("Accepted connection from {peer}");
                        spawn_client(&app_state, Arc::new(conn), options.clone());
                    }
                    Err(e) => warn!("Could not set up connection from {peer}: {e}"),
                },
                Err(e) => error!("Failed to accept connection: {e}"),
            }
        }
    }

    app_state.connections.close_all();
    Ok(())
}

fn spawn_client(app_state: &AppState, conn: Arc<dyn Connection>, options: ClientOptions) {
    let connection_id = app_state.connections.register(Arc::clone(&conn));
    let connections = Arc::clone(&app_state.connections);
    let registry = app_state.registry.clone();
    tokio::spawn(async move {
        handle_client(conn, registry, options).await;
        connections.unregister(&connection_id);
        debug!("Connection {} finished", connection_id.as_str());
    });
}
