use std::ops::Deref;

use tonic::{async_trait, Request, Response, Status};
use tracing::instrument;

use crate::path::Path;
use crate::proto::{self, command_service_server::CommandService as GrpcCommandService};
use crate::storage::CommandService;

/// Adapts a [CommandService] implementation onto the generated gRPC service
/// trait — the skeleton side of the control-plane interface (§4.2, §4.4).
pub struct GrpcCommandServiceWrapper<T> {
    command: T,
}

impl<T> GrpcCommandServiceWrapper<T> {
    pub fn new(command: T) -> Self {
        Self { command }
    }
}

#[async_trait]
impl<T> GrpcCommandService for GrpcCommandServiceWrapper<T>
where
    T: Deref<Target = dyn CommandService> + Send + Sync + 'static,
{
    #[instrument(skip(self))]
    async fn create(
        &self,
        request: Request<proto::PathMsg>,
    ) -> Result<Response<proto::BoolReply>, Status> {
        let path: Path = request.into_inner().try_into()?;
        let value = self.command.create(&path).await?;
        Ok(Response::new(proto::BoolReply { value }))
    }

    #[instrument(skip(self))]
    async fn delete(
        &self,
        request: Request<proto::PathMsg>,
    ) -> Result<Response<proto::BoolReply>, Status> {
        let path: Path = request.into_inner().try_into()?;
        let value = self.command.delete(&path).await?;
        Ok(Response::new(proto::BoolReply { value }))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tempfile::TempDir;

    use crate::storage::LocalStorage;

    use super::*;

    #[tokio::test]
    async fn create_and_delete_delegate_to_command_service() {
        let root = TempDir::new().unwrap();
        let storage = LocalStorage::new(root.path().to_path_buf()) as Arc<dyn CommandService>;
        let wrapper = GrpcCommandServiceWrapper::new(storage);

        let p = Path::parse("/f").unwrap();
        let created = wrapper
            .create(Request::new(proto::PathMsg::from(&p)))
            .await
            .unwrap()
            .into_inner()
            .value;
        assert!(created);

        let deleted = wrapper
            .delete(Request::new(proto::PathMsg::from(&p)))
            .await
            .unwrap()
            .into_inner()
            .value;
        assert!(deleted);
    }
}
