use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use dfs_core::naming::{NamingState, NAMING_SERVICE_PORT, REGISTRATION_PORT};
use dfs_core::proto::naming_service_server::NamingServiceServer;
use dfs_core::proto::registration_service_server::RegistrationServiceServer;
use dfs_core::proto::{GrpcNamingServiceWrapper, GrpcRegistrationServiceWrapper};
use dfs_core::rpc::LocalRegistry;
use tonic::transport::Server;
use tracing_subscriber::{util::SubscriberInitExt, EnvFilter};

/// Runs the naming server: the client-facing `NamingService` and the
/// storage-server-facing `RegistrationService`, sharing one directory tree.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Address the client-facing NamingService listens on.
    #[arg(long, env, default_value_t = default_service_addr())]
    service_listen_address: SocketAddr,

    /// Address the storage-server-facing RegistrationService listens on.
    #[arg(long, env, default_value_t = default_registration_addr())]
    registration_listen_address: SocketAddr,
}

fn default_service_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], NAMING_SERVICE_PORT))
}

fn default_registration_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], REGISTRATION_PORT))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .finish()
        .try_init()
        .context("failed to set up tracing subscriber")?;

    let cli = Cli::parse();

    // The naming server never hosts a CommandService itself, but it still
    // owns a LocalRegistry so the in-process shortcut (§11) is available
    // should a storage server ever share this process.
    let local_registry = Arc::new(LocalRegistry::new());
    let state = NamingState::new(local_registry);

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("interrupt received, draining in-flight calls");
        let _ = shutdown_tx.send(true);
    });

    let service_server = Server::builder()
        .add_service(NamingServiceServer::new(GrpcNamingServiceWrapper::new(
            state.clone(),
        )))
        .serve_with_shutdown(cli.service_listen_address, wait_for_shutdown(shutdown_rx.clone()));

    let registration_server = Server::builder()
        .add_service(RegistrationServiceServer::new(
            GrpcRegistrationServiceWrapper::new(state.clone()),
        ))
        .serve_with_shutdown(cli.registration_listen_address, wait_for_shutdown(shutdown_rx));

    tracing::info!(
        service = %cli.service_listen_address,
        registration = %cli.registration_listen_address,
        "naming server listening"
    );

    tokio::try_join!(
        async { service_server.await.context("NamingService server failed") },
        async { registration_server.await.context("RegistrationService server failed") },
    )?;

    Ok(())
}

/// Resolves once the ctrl-c handler has flipped `rx`, letting
/// `serve_with_shutdown` stop accepting new connections while in-flight
/// calls already being handled run to completion.
async fn wait_for_shutdown(mut rx: tokio::sync::watch::Receiver<bool>) {
    let _ = rx.wait_for(|done| *done).await;
}
