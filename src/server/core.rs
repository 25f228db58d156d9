use log::{error, info, warn};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};

use crate::client::{ClientRegistry, handle_client};
use crate::config::ServerConfig;
use crate::error::FtpServerError;
use crate::middleware::log_connection;
use crate::protocol::Reply;
use crate::protocol::responses::SERVICE_UNAVAILABLE;

pub struct Server {
    client_registry: ClientRegistry,
    listener: TcpListener,
    config: Arc<ServerConfig>,
}

impl Server {
    /// Validates the configuration, creates the server root and binds the
    /// control listener.
    pub async fn bind(config: ServerConfig) -> Result<Self, FtpServerError> {
        config.validate()?;
        let config = config.prepare()?;
        let control_socket = config.control_socket()?;

        let listener = TcpListener::bind(control_socket).await.map_err(|e| {
            error!("Failed to bind to {control_socket}: {e}");
            e
        })?;
        info!("Server bound to {}", listener.local_addr()?);
        info!("Server root directory: {}", config.server_root.display());

        Ok(Self {
            client_registry: ClientRegistry::new(config.max_clients),
            listener,
            config: Arc::new(config),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accepts clients forever.
    pub async fn run(self) {
        self.run_until(std::future::pending()).await
    }

    /// Accepts clients until `shutdown` resolves. Sessions already running
    /// are left to finish on their own.
    pub async fn run_until<F>(self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        info!(
            "Starting FTP server on {} (max {} clients)",
            self.local_addr()
                .map(|a| a.to_string())
                .unwrap_or_else(|_| "<unknown>".into()),
            self.config.max_clients
        );

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Shutting down; no longer accepting connections");
                    break;
                }
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, addr)) => self.accept_client(stream, addr),
                    Err(e) => error!("Error accepting connection: {e}"),
                }
            }
        }
    }

    fn accept_client(&self, stream: TcpStream, addr: SocketAddr) {
        let Some(guard) = self.client_registry.register(addr) else {
            warn!(
                "Rejecting {addr}: {} clients already connected",
                self.client_registry.len()
            );
            tokio::spawn(reject_client(stream));
            return;
        };

        log_connection(addr);
        info!(
            "Active clients: {}/{}",
            self.client_registry.len(),
            self.config.max_clients
        );
        let config = Arc::clone(&self.config);
        // Spawn a task for each client so accept loop doesn't block
        tokio::spawn(handle_client(stream, addr, config, guard));
    }
}

async fn reject_client(mut stream: TcpStream) {
    let reply = Reply::new(SERVICE_UNAVAILABLE, "Too many connections.");
    if let Err(e) = stream.write_all(reply.to_wire().as_bytes()).await {
        warn!("Failed to send rejection: {e}");
    }
    let _ = stream.shutdown().await;
}
