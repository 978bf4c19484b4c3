//! Generated gRPC types and the server-side wrappers that adapt them onto
//! this crate's domain traits ([crate::naming], [crate::storage]).

mod command_wrapper;
mod naming_wrapper;
mod registration_wrapper;
mod storage_wrapper;

pub use command_wrapper::GrpcCommandServiceWrapper;
pub use naming_wrapper::GrpcNamingServiceWrapper;
pub use registration_wrapper::GrpcRegistrationServiceWrapper;
pub use storage_wrapper::GrpcStorageServiceWrapper;

tonic::include_proto!("dfs.v1");

use crate::path::Path;
use crate::Error;

impl TryFrom<PathMsg> for Path {
    type Error = Error;

    fn try_from(value: PathMsg) -> Result<Self, Self::Error> {
        Path::parse(&value.path).map_err(Error::from)
    }
}

impl From<&Path> for PathMsg {
    fn from(value: &Path) -> Self {
        PathMsg {
            path: value.to_string(),
        }
    }
}

impl StorageBinding {
    pub fn new(storage_address: impl Into<String>, command_address: impl Into<String>) -> Self {
        StorageBinding {
            storage_address: storage_address.into(),
            command_address: command_address.into(),
        }
    }
}
