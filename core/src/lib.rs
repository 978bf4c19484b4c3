//! Shared types and protocol plumbing for the naming and storage servers:
//! the canonical [path::Path] type, the [errors::Error] kind hierarchy, the
//! generated gRPC messages and their server-side wrappers ([proto]), the
//! directory tree and registration bookkeeping ([naming]), and the local
//! on-disk backing store ([storage]).

pub mod errors;
pub mod naming;
pub mod path;
pub mod proto;
pub mod rpc;
pub mod storage;

pub use errors::Error;
pub use path::Path;
