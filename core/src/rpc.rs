//! Transport-layer glue: turning a [url::Url] into a [tonic] [Channel], a
//! process-wide port allocator for skeletons constructed without an
//! explicit address, and an optional in-process shortcut that lets a stub
//! call straight into a skeleton's implementation object when both live in
//! the same process.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::{Arc, Mutex};

use tokio::net::UnixStream;
use tonic::transport::{Channel, Endpoint};

use crate::storage::CommandService;

fn url_wants_wait_connect(url: &url::Url) -> bool {
    url.query_pairs()
        .any(|(k, v)| k == "wait-connect" && v == "1")
}

/// Turns a [url::Url] into a [Channel] if it can be parsed successfully.
/// Supports `grpc+unix:/path/to/socket`, as well as the regular schemes
/// supported by tonic, e.g. `grpc+http://[::1]:8000`. `wait-connect=1`
/// forces an eager connection rather than tonic's default lazy one — used
/// for the stub factories' "initial connectivity probe" (§4.3).
pub async fn channel_from_url(url: &url::Url) -> Result<Channel, self::Error> {
    let unprefixed_url_str = match url.to_string().strip_prefix("grpc+") {
        None => return Err(Error::MissingGrpcPrefix),
        Some(url_str) => url_str.to_owned(),
    };

    if url.scheme() == "grpc+unix" {
        if url.host_str().is_some() {
            return Err(Error::HostSetForUnixSocket);
        }

        let connector = tower::service_fn({
            let url = url.clone();
            move |_: tonic::transport::Uri| UnixStream::connect(url.path().to_string())
        });

        let channel = if url_wants_wait_connect(url) {
            Endpoint::from_static("http://[::]:50051")
                .connect_with_connector(connector)
                .await?
        } else {
            Endpoint::from_static("http://[::]:50051").connect_with_connector_lazy(connector)
        };

        return Ok(channel);
    }

    if !url.path().is_empty() {
        return Err(Error::PathMaybeNotSet);
    }

    let endpoint = Endpoint::try_from(unprefixed_url_str)?;
    let channel = if url_wants_wait_connect(url) {
        endpoint.connect().await?
    } else {
        endpoint.connect_lazy()
    };

    Ok(channel)
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("grpc+ prefix is missing from URL")]
    MissingGrpcPrefix,
    #[error("host may not be set for unix domain sockets")]
    HostSetForUnixSocket,
    #[error("path may not be set")]
    PathMaybeNotSet,
    #[error("transport error: {0}")]
    Transport(#[from] tonic::transport::Error),
}

impl From<Error> for crate::Error {
    fn from(value: Error) -> Self {
        crate::Error::RemoteInvocation(value.to_string())
    }
}

/// Skeletons constructed without an explicit port are handed one from this
/// process-wide monotonic counter (§5 "Address and port allocation").
/// Starts above the well-known naming ports so a freshly started storage
/// server never collides with them.
static NEXT_EPHEMERAL_PORT: AtomicU16 = AtomicU16::new(crate::naming::REGISTRATION_PORT + 1);

pub fn next_ephemeral_port() -> u16 {
    NEXT_EPHEMERAL_PORT.fetch_add(1, Ordering::Relaxed)
}

/// A process-local registry from address string to an in-process handle,
/// used to bypass the network when a stub's target is a skeleton hosted in
/// this very process. This is the redesigned replacement for the "global
/// skeleton registry" (§9): it lives on the transport layer, not behind a
/// static singleton that every caller implicitly shares, and its absence
/// (an empty registry) must never change observable behavior — it is purely
/// an optimization.
/// Only [CommandService] is looked up through this shortcut: it is the one
/// interface the naming server itself calls as a client (from
/// `createFile`/`delete`), so it's the only place an in-process caller and
/// an in-process skeleton can plausibly share a binary.
#[derive(Default)]
pub struct LocalRegistry {
    entries: Mutex<HashMap<String, Arc<dyn CommandService>>>,
}

impl LocalRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, address: &str, handle: Arc<dyn CommandService>) {
        let mut entries = self.entries.lock().unwrap();
        entries.insert(address.to_owned(), handle);
    }

    pub fn lookup(&self, address: &str) -> Option<Arc<dyn CommandService>> {
        self.entries.lock().unwrap().get(address).cloned()
    }

    pub fn remove(&self, address: &str) {
        self.entries.lock().unwrap().remove(address);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::LocalStorage;

    #[test]
    fn local_registry_round_trip() {
        let reg = LocalRegistry::new();
        let storage = LocalStorage::new(std::env::temp_dir());
        reg.register("127.0.0.1:9", storage.clone() as Arc<dyn CommandService>);
        assert!(reg.lookup("127.0.0.1:9").is_some());
        assert!(reg.lookup("127.0.0.1:10").is_none());
        reg.remove("127.0.0.1:9");
        assert!(reg.lookup("127.0.0.1:9").is_none());
    }

    #[tokio::test]
    async fn channel_from_url_rejects_missing_prefix() {
        let url = url::Url::parse("http://localhost").unwrap();
        assert!(channel_from_url(&url).await.is_err());
    }
}
