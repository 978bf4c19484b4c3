use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use dfs_core::naming::REGISTRATION_PORT;
use dfs_core::path::Path;
use dfs_core::proto::command_service_server::CommandServiceServer;
use dfs_core::proto::registration_service_client::RegistrationServiceClient;
use dfs_core::proto::storage_service_server::StorageServiceServer;
use dfs_core::proto::{GrpcCommandServiceWrapper, GrpcStorageServiceWrapper};
use dfs_core::proto::{RegisterRequest, StorageBinding};
use dfs_core::rpc::{channel_from_url, next_ephemeral_port};
use dfs_core::storage::{CommandService, LocalStorage, StorageService};
use tonic::transport::Server;
use tracing_subscriber::{util::SubscriberInitExt, EnvFilter};

/// Runs a storage server: enumerates `root`, registers with the naming
/// server, applies its eviction list, then serves the StorageService and
/// CommandService skeletons (§4.4, §4.6).
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Local directory this server holds files under.
    #[arg(long, env)]
    root: PathBuf,

    /// Hostname this server advertises to the naming server. Must be
    /// externally routable from the naming server's point of view.
    #[arg(long, env, default_value = "127.0.0.1")]
    advertise_host: String,

    /// Port the data-plane StorageService listens on. Defaults to the next
    /// ephemeral port from the process-wide allocator.
    #[arg(long, env)]
    storage_port: Option<u16>,

    /// Port the control-plane CommandService listens on.
    #[arg(long, env)]
    command_port: Option<u16>,

    /// host:port of the naming server's RegistrationService.
    #[arg(long, env, default_value_t = default_naming_registration_address())]
    naming_registration_address: String,
}

fn default_naming_registration_address() -> String {
    format!("127.0.0.1:{REGISTRATION_PORT}")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .finish()
        .try_init()
        .context("failed to set up tracing subscriber")?;

    let cli = Cli::parse();

    let storage_port = cli.storage_port.unwrap_or_else(next_ephemeral_port);
    let command_port = cli.command_port.unwrap_or_else(next_ephemeral_port);
    let storage_listen: SocketAddr = ([0, 0, 0, 0], storage_port).into();
    let command_listen: SocketAddr = ([0, 0, 0, 0], command_port).into();

    let storage = LocalStorage::new(cli.root.clone());

    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("interrupt received, draining in-flight calls");
        let _ = shutdown_tx.send(true);
    });

    let storage_server = Server::builder()
        .add_service(StorageServiceServer::new(GrpcStorageServiceWrapper::new(
            storage.clone() as Arc<dyn StorageService>,
        )))
        .serve_with_shutdown(storage_listen, wait_for_shutdown(shutdown_rx.clone()));

    let command_server = Server::builder()
        .add_service(CommandServiceServer::new(GrpcCommandServiceWrapper::new(
            storage.clone() as Arc<dyn CommandService>,
        )))
        .serve_with_shutdown(command_listen, wait_for_shutdown(shutdown_rx));

    tracing::info!(
        storage = %storage_listen,
        command = %command_listen,
        "storage server listening"
    );

    let binding = StorageBinding::new(
        format!("{}:{storage_port}", cli.advertise_host),
        format!("{}:{command_port}", cli.advertise_host),
    );

    register_and_evict(&cli.naming_registration_address, binding, &storage).await?;

    tokio::try_join!(
        async { storage_server.await.context("StorageService server failed") },
        async { command_server.await.context("CommandService server failed") },
    )?;

    Ok(())
}

/// Resolves once the ctrl-c handler has flipped `rx`, letting
/// `serve_with_shutdown` stop accepting new connections while in-flight
/// calls already being handled run to completion.
async fn wait_for_shutdown(mut rx: tokio::sync::watch::Receiver<bool>) {
    let _ = rx.wait_for(|done| *done).await;
}

/// The registration bootstrap (§4.6 steps 4-7): enumerate the local tree,
/// register it, evict what naming already knew about, then prune any
/// directories that eviction left empty.
async fn register_and_evict(
    naming_registration_address: &str,
    binding: StorageBinding,
    storage: &Arc<LocalStorage>,
) -> anyhow::Result<()> {
    let files = Path::list(storage.root()).context("failed to enumerate local root")?;

    let url = url::Url::parse(&format!(
        "grpc+http://{naming_registration_address}?wait-connect=1"
    ))?;
    let channel = channel_from_url(&url)
        .await
        .context("failed to connect to naming server")?;
    let mut client = RegistrationServiceClient::new(channel);

    let response = client
        .register(RegisterRequest {
            binding: Some(binding),
            files: files.iter().map(Path::to_string).collect(),
        })
        .await
        .context("registration with naming server failed")?
        .into_inner();

    for path in response.files_to_delete {
        match Path::parse(&path) {
            Ok(p) => {
                if let Err(e) = storage.delete(&p).await {
                    tracing::warn!(path = %p, err = %e, "failed to evict path ordered by naming server");
                }
            }
            Err(e) => {
                tracing::warn!(path = %path, err = %e, "naming server returned an unparsable eviction path")
            }
        }
    }

    storage
        .prune_empty_dirs()
        .context("failed to prune empty directories after eviction")?;

    Ok(())
}
