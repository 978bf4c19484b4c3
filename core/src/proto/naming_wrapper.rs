use std::sync::Arc;

use tonic::{async_trait, Request, Response, Status};
use tracing::instrument;

use crate::naming::NamingState;
use crate::path::Path;
use crate::proto::{self, naming_service_server::NamingService as GrpcNamingService};

/// Adapts [NamingState] onto the generated `NamingService` gRPC trait — the
/// skeleton a client talks to for lookups and tree mutations (§4.5).
pub struct GrpcNamingServiceWrapper {
    state: Arc<NamingState>,
}

impl GrpcNamingServiceWrapper {
    pub fn new(state: Arc<NamingState>) -> Self {
        Self { state }
    }
}

#[async_trait]
impl GrpcNamingService for GrpcNamingServiceWrapper {
    #[instrument(skip(self))]
    async fn is_directory(
        &self,
        request: Request<proto::PathMsg>,
    ) -> Result<Response<proto::BoolReply>, Status> {
        let path: Path = request.into_inner().try_into()?;
        let value = self.state.is_directory(&path).await?;
        Ok(Response::new(proto::BoolReply { value }))
    }

    #[instrument(skip(self))]
    async fn list(
        &self,
        request: Request<proto::PathMsg>,
    ) -> Result<Response<proto::NameListReply>, Status> {
        let path: Path = request.into_inner().try_into()?;
        let names = self.state.list(&path).await?;
        Ok(Response::new(proto::NameListReply { names }))
    }

    #[instrument(skip(self))]
    async fn create_file(
        &self,
        request: Request<proto::PathMsg>,
    ) -> Result<Response<proto::BoolReply>, Status> {
        let path: Path = request.into_inner().try_into()?;
        let value = self.state.create_file(&path).await?;
        Ok(Response::new(proto::BoolReply { value }))
    }

    #[instrument(skip(self))]
    async fn create_directory(
        &self,
        request: Request<proto::PathMsg>,
    ) -> Result<Response<proto::BoolReply>, Status> {
        let path: Path = request.into_inner().try_into()?;
        let value = self.state.create_directory(&path).await?;
        Ok(Response::new(proto::BoolReply { value }))
    }

    #[instrument(skip(self))]
    async fn delete(
        &self,
        request: Request<proto::PathMsg>,
    ) -> Result<Response<proto::BoolReply>, Status> {
        let path: Path = request.into_inner().try_into()?;
        let value = self.state.delete(&path).await?;
        Ok(Response::new(proto::BoolReply { value }))
    }

    #[instrument(skip(self))]
    async fn get_storage(
        &self,
        request: Request<proto::PathMsg>,
    ) -> Result<Response<proto::StorageBinding>, Status> {
        let path: Path = request.into_inner().try_into()?;
        let binding = self.state.get_storage(&path).await?;
        Ok(Response::new(binding))
    }
}

#[cfg(test)]
mod tests {
    use crate::rpc::LocalRegistry;

    use super::*;

    #[tokio::test]
    async fn create_directory_and_list_delegate_to_naming_state() {
        let state = NamingState::new(Arc::new(LocalRegistry::new()));
        let wrapper = GrpcNamingServiceWrapper::new(state);

        let d = Path::parse("/d").unwrap();
        let created = wrapper
            .create_directory(Request::new(proto::PathMsg::from(&d)))
            .await
            .unwrap()
            .into_inner()
            .value;
        assert!(created);

        let is_dir = wrapper
            .is_directory(Request::new(proto::PathMsg::from(&d)))
            .await
            .unwrap()
            .into_inner()
            .value;
        assert!(is_dir);

        let names = wrapper
            .list(Request::new(proto::PathMsg::from(&Path::root())))
            .await
            .unwrap()
            .into_inner()
            .names;
        assert_eq!(vec!["d".to_string()], names);
    }
}
