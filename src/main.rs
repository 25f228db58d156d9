//! vroot-ftpd - Entry Point
//!
//! FTP server confined to a virtual root directory.

use env_logger::Env;
use log::{error, info};
use std::path::PathBuf;
use std::process::ExitCode;

use vroot_ftpd::{Server, ServerConfig};

#[tokio::main]
async fn main() -> ExitCode {
    // RUST_LOG overrides the default filter
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let config_path = std::env::args_os()
        .nth(1)
        .or_else(|| std::env::var_os("VROOT_FTP_CONFIG"))
        .map(PathBuf::from);

    let config = match ServerConfig::load(config_path.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    info!("Launching FTP server...");
    let server = match Server::bind(config).await {
        Ok(server) => server,
        Err(e) => {
            error!("Server startup failed: {e}");
            return ExitCode::FAILURE;
        }
    };

    server
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for shutdown signal: {e}");
                std::future::pending::<()>().await;
            }
        })
        .await;
    ExitCode::SUCCESS
}
