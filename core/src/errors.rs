use thiserror::Error;
use tonic::Status;

use crate::path::PathError;

/// The error kinds carried at the interface layer (§7 of the design).
#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum Error {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("out of bounds: {0}")]
    OutOfBounds(String),

    #[error("required argument missing: {0}")]
    NullArg(String),

    #[error("illegal state: {0}")]
    IllegalState(String),

    #[error("remote invocation failed: {0}")]
    RemoteInvocation(String),

    #[error("I/O error: {0}")]
    Io(String),
}

impl From<PathError> for Error {
    fn from(value: PathError) -> Self {
        Error::InvalidArgument(value.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        match value.kind() {
            std::io::ErrorKind::NotFound => Error::NotFound(value.to_string()),
            std::io::ErrorKind::InvalidInput | std::io::ErrorKind::InvalidData => {
                Error::InvalidArgument(value.to_string())
            }
            _ => Error::Io(value.to_string()),
        }
    }
}

impl From<tonic::transport::Error> for Error {
    fn from(value: tonic::transport::Error) -> Self {
        Error::RemoteInvocation(value.to_string())
    }
}

impl From<tokio::time::error::Elapsed> for Error {
    fn from(value: tokio::time::error::Elapsed) -> Self {
        Error::RemoteInvocation(value.to_string())
    }
}

/// The detail string carried in a [Status], used to recover which [Error]
/// variant a non-OK gRPC code stood for. `tonic::Code` alone can't
/// distinguish `InvalidArgument`, `OutOfBounds` and `NullArg`, which all
/// arise from the same "bad request" half of the kind table, so we prefix
/// the message with the kind name and strip it back off on the way in.
const KIND_SEP: &str = ": ";

impl Error {
    fn kind_tag(&self) -> &'static str {
        match self {
            Error::NotFound(_) => "NotFound",
            Error::InvalidArgument(_) => "InvalidArgument",
            Error::OutOfBounds(_) => "OutOfBounds",
            Error::NullArg(_) => "NullArg",
            Error::IllegalState(_) => "IllegalState",
            Error::RemoteInvocation(_) => "RemoteInvocation",
            Error::Io(_) => "IOError",
        }
    }

    fn message(&self) -> &str {
        match self {
            Error::NotFound(m)
            | Error::InvalidArgument(m)
            | Error::OutOfBounds(m)
            | Error::NullArg(m)
            | Error::IllegalState(m)
            | Error::RemoteInvocation(m)
            | Error::Io(m) => m,
        }
    }

    fn from_tagged(tag: &str, message: &str) -> Self {
        let message = message.to_owned();
        match tag {
            "NotFound" => Error::NotFound(message),
            "InvalidArgument" => Error::InvalidArgument(message),
            "OutOfBounds" => Error::OutOfBounds(message),
            "NullArg" => Error::NullArg(message),
            "IllegalState" => Error::IllegalState(message),
            "IOError" => Error::Io(message),
            _ => Error::RemoteInvocation(message),
        }
    }
}

impl From<Error> for Status {
    fn from(value: Error) -> Self {
        let code = match &value {
            Error::NotFound(_) => tonic::Code::NotFound,
            Error::InvalidArgument(_) | Error::OutOfBounds(_) | Error::NullArg(_) => {
                tonic::Code::InvalidArgument
            }
            Error::IllegalState(_) => tonic::Code::FailedPrecondition,
            Error::RemoteInvocation(_) => tonic::Code::Unavailable,
            Error::Io(_) => tonic::Code::DataLoss,
        };
        let tagged = format!("{}{}{}", value.kind_tag(), KIND_SEP, value.message());
        Status::new(code, tagged)
    }
}

/// Recovers an [Error] from a [Status] received from a peer, reconstructing
/// its original kind rather than collapsing everything transport-side into
/// `RemoteInvocation`.
impl From<Status> for Error {
    fn from(value: Status) -> Self {
        if let Some((tag, message)) = value.message().split_once(KIND_SEP) {
            Error::from_tagged(tag, message)
        } else {
            Error::RemoteInvocation(value.message().to_owned())
        }
    }
}
