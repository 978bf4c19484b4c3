use std::ops::Deref;

use tonic::{async_trait, Request, Response, Status};
use tracing::instrument;

use crate::path::Path;
use crate::proto::{self, storage_service_server::StorageService as GrpcStorageService};
use crate::storage::StorageService;

/// Adapts a [StorageService] implementation onto the generated gRPC service
/// trait — the skeleton side of the data-plane interface (§4.2, §4.4).
pub struct GrpcStorageServiceWrapper<T> {
    storage: T,
}

impl<T> GrpcStorageServiceWrapper<T> {
    pub fn new(storage: T) -> Self {
        Self { storage }
    }
}

#[async_trait]
impl<T> GrpcStorageService for GrpcStorageServiceWrapper<T>
where
    T: Deref<Target = dyn StorageService> + Send + Sync + 'static,
{
    #[instrument(skip(self))]
    async fn size(
        &self,
        request: Request<proto::PathMsg>,
    ) -> Result<Response<proto::SizeReply>, Status> {
        let path: Path = request.into_inner().try_into()?;
        let size = self.storage.size(&path).await?;
        Ok(Response::new(proto::SizeReply { size }))
    }

    #[instrument(skip(self))]
    async fn read(
        &self,
        request: Request<proto::ReadRequest>,
    ) -> Result<Response<proto::ReadReply>, Status> {
        let req = request.into_inner();
        let path = Path::parse(&req.path).map_err(crate::Error::from)?;
        let data = self.storage.read(&path, req.offset, req.length).await?;
        Ok(Response::new(proto::ReadReply { data: data.into() }))
    }

    #[instrument(skip(self, request))]
    async fn write(
        &self,
        request: Request<proto::WriteRequest>,
    ) -> Result<Response<proto::BoolReply>, Status> {
        let req = request.into_inner();
        let path = Path::parse(&req.path).map_err(crate::Error::from)?;
        self.storage.write(&path, req.offset, &req.data).await?;
        Ok(Response::new(proto::BoolReply { value: true }))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use tempfile::TempDir;
    use tokio::net::UnixListener;
    use tokio_retry::strategy::ExponentialBackoff;
    use tokio_retry::Retry;
    use tokio_stream::wrappers::UnixListenerStream;

    use crate::proto::storage_service_client::StorageServiceClient;
    use crate::proto::storage_service_server::StorageServiceServer;
    use crate::rpc::channel_from_url;
    use crate::storage::LocalStorage;

    use super::*;

    /// Ensures the size/read/write wrapper round-trips correctly when the
    /// client and server are on opposite ends of a real socket.
    #[tokio::test]
    async fn size_read_write_over_unix_socket() {
        let root = TempDir::new().unwrap();
        let storage = LocalStorage::new(root.path().to_path_buf());

        let socket_dir = TempDir::new().unwrap();
        let socket_path = socket_dir.path().join("storage.sock");
        let path_clone = socket_path.clone();

        tokio::spawn({
            let storage = storage.clone() as Arc<dyn StorageService>;
            async move {
                let uds = UnixListener::bind(path_clone).unwrap();
                let uds_stream = UnixListenerStream::new(uds);
                tonic::transport::Server::builder()
                    .add_service(StorageServiceServer::new(GrpcStorageServiceWrapper::new(
                        storage,
                    )))
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
        let mut client = StorageServiceClient::new(
            channel_from_url(&url).await.expect("must connect"),
        );

        use crate::storage::CommandService;
        let p = Path::parse("/f").unwrap();
        storage.create(&p).await.unwrap();
        storage.write(&p, 0, &[1, 2, 3, 4, 5]).await.unwrap();

        let size = client
            .size(proto::PathMsg::from(&p))
            .await
            .unwrap()
            .into_inner()
            .size;
        assert_eq!(5, size);

        let read = client
            .read(proto::ReadRequest {
                path: p.to_string(),
                offset: 1,
                length: 3,
            })
            .await
            .unwrap()
            .into_inner();
        assert_eq!(vec![2, 3, 4], read.data.to_vec());

        client
            .write(proto::WriteRequest {
                path: p.to_string(),
                offset: 5,
                data: vec![6, 7].into(),
            })
            .await
            .unwrap();
        assert_eq!(7, storage.size(&p).await.unwrap());
    }
}
