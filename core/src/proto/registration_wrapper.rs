use std::sync::Arc;

use tonic::{async_trait, Request, Response, Status};
use tracing::instrument;

use crate::naming::NamingState;
use crate::path::Path;
use crate::proto::{self, registration_service_server::RegistrationService as GrpcRegistrationService};
use crate::Error;

/// Adapts [NamingState]'s registration bookkeeping onto the generated
/// `RegistrationService` gRPC trait — the skeleton a storage server dials
/// exactly once, at startup (§4.6).
pub struct GrpcRegistrationServiceWrapper {
    state: Arc<NamingState>,
}

impl GrpcRegistrationServiceWrapper {
    pub fn new(state: Arc<NamingState>) -> Self {
        Self { state }
    }
}

#[async_trait]
impl GrpcRegistrationService for GrpcRegistrationServiceWrapper {
    #[instrument(skip(self, request))]
    async fn register(
        &self,
        request: Request<proto::RegisterRequest>,
    ) -> Result<Response<proto::RegisterReply>, Status> {
        let req = request.into_inner();
        let binding = req
            .binding
            .ok_or_else(|| Error::NullArg("binding".into()))?;

        let files = req
            .files
            .iter()
            .map(|f| Path::parse(f).map_err(Error::from))
            .collect::<Result<Vec<_>, _>>()?;

        let to_delete = self.state.register(binding, files).await?;

        Ok(Response::new(proto::RegisterReply {
            files_to_delete: to_delete.iter().map(Path::to_string).collect(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tempfile::TempDir;
    use tokio::net::UnixListener;
    use tokio_retry::strategy::ExponentialBackoff;
    use tokio_retry::Retry;
    use tokio_stream::wrappers::UnixListenerStream;

    use crate::naming::NamingState;
    use crate::proto::registration_service_client::RegistrationServiceClient;
    use crate::proto::registration_service_server::RegistrationServiceServer;
    use crate::proto::StorageBinding;
    use crate::rpc::{channel_from_url, LocalRegistry};

    use super::*;

    #[tokio::test]
    async fn register_over_unix_socket_ingests_and_evicts() {
        let state = NamingState::new(Arc::new(LocalRegistry::new()));
        // Pre-populate the tree the way an earlier storage server's
        // registration would have.
        let earlier = StorageBinding::new("127.0.0.1:1", "127.0.0.1:2");
        state
            .register(earlier.clone(), vec![Path::parse("/d/already").unwrap()])
            .await
            .unwrap();

        let socket_dir = TempDir::new().unwrap();
        let socket_path = socket_dir.path().join("registration.sock");
        let path_clone = socket_path.clone();

        tokio::spawn({
            let state = state.clone();
            async move {
                let uds = UnixListener::bind(path_clone).unwrap();
                let uds_stream = UnixListenerStream::new(uds);
                tonic::transport::Server::builder()
                    .add_service(RegistrationServiceServer::new(
                        GrpcRegistrationServiceWrapper::new(state),
                    ))
                    .serve_with_incoming(uds_stream)
                    .await
            }
        });

        Retry::spawn(
            ExponentialBackoff::from_millis(20).max_delay(Duration::from_secs(10)),
            || async {
                if socket_path.exists() {
                    Ok(())
                } else {
                    Err(())
                }
            },
        )
        .await
        .expect("failed to wait for socket");

        let url = url::Url::parse(&format!(
            "grpc+unix://{}?wait-connect=1",
            socket_path.display()
        ))
        .expect("must parse");
        let mut client =
            RegistrationServiceClient::new(channel_from_url(&url).await.expect("must connect"));

        let new_binding = StorageBinding::new("127.0.0.1:3", "127.0.0.1:4");
        let reply = client
            .register(proto::RegisterRequest {
                binding: Some(new_binding.clone()),
                files: vec!["/d/already".to_string(), "/d/new".to_string()],
            })
            .await
            .unwrap()
            .into_inner();

        assert_eq!(vec!["/d/already".to_string()], reply.files_to_delete);
        assert_eq!(
            new_binding,
            state
                .get_storage(&Path::parse("/d/new").unwrap())
                .await
                .unwrap()
        );
    }
}
