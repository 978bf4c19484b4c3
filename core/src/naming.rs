//! The naming server's directory tree, path-to-storage bindings, and the
//! registration protocol (§3, §4.5, §4.6).

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tonic::transport::Channel;

use crate::path::Path;
use crate::proto::{self, command_service_client::CommandServiceClient, StorageBinding};
use crate::rpc::LocalRegistry;
use crate::storage::CommandService;
use crate::Error;

/// How long an outbound call from the naming server to a storage server's
/// CommandService may take before it's treated as unreachable.
const STORAGE_CALL_TIMEOUT: Duration = Duration::from_secs(10);

/// Well-known port the naming server's `NamingService` listens on (§6).
pub const NAMING_SERVICE_PORT: u16 = 10_101;

/// Well-known port the naming server's `RegistrationService` listens on
/// (§6). A storage server dials this port once, at startup, to register.
pub const REGISTRATION_PORT: u16 = 10_102;

#[derive(Debug, Clone)]
enum Node {
    Directory(BTreeMap<String, Node>),
    File(StorageBinding),
}

impl Node {
    fn new_directory() -> Self {
        Node::Directory(BTreeMap::new())
    }
}

/// The directory tree, in isolation from the registration bookkeeping.
/// Kept as a separate type so its invariants (§3) can be unit-tested
/// without needing a running storage server.
#[derive(Debug, Clone)]
pub struct Tree {
    root: Node,
}

impl Default for Tree {
    fn default() -> Self {
        Tree {
            root: Node::new_directory(),
        }
    }
}

impl Tree {
    fn walk(&self, path: &Path) -> Option<&Node> {
        let mut node = &self.root;
        for component in path.components() {
            match node {
                Node::Directory(children) => node = children.get(component)?,
                Node::File(_) => return None,
            }
        }
        Some(node)
    }

    fn walk_mut(&mut self, path: &Path) -> Option<&mut Node> {
        let mut node = &mut self.root;
        for component in path.components() {
            match node {
                Node::Directory(children) => node = children.get_mut(component)?,
                Node::File(_) => return None,
            }
        }
        Some(node)
    }

    pub fn path_exists(&self, path: &Path) -> bool {
        self.walk(path).is_some()
    }

    pub fn is_directory(&self, path: &Path) -> Result<bool, Error> {
        match self.walk(path) {
            Some(Node::Directory(_)) => Ok(true),
            Some(Node::File(_)) => Ok(false),
            None => Err(Error::NotFound(format!("{path} does not exist"))),
        }
    }

    pub fn list(&self, path: &Path) -> Result<Vec<String>, Error> {
        match self.walk(path) {
            Some(Node::Directory(children)) => Ok(children.keys().cloned().collect()),
            Some(Node::File(_)) => Err(Error::NotFound(format!("{path} is a file"))),
            None => Err(Error::NotFound(format!("{path} does not exist"))),
        }
    }

    pub fn get_storage(&self, path: &Path) -> Result<StorageBinding, Error> {
        match self.walk(path) {
            Some(Node::File(binding)) => Ok(binding.clone()),
            Some(Node::Directory(_)) => Err(Error::NotFound(format!("{path} is a directory"))),
            None => Err(Error::NotFound(format!("{path} does not exist"))),
        }
    }

    /// Inserts a file node at `path`, bound to `binding`. Returns `false` if
    /// `path` already exists. Fails with `NotFound` if the parent is
    /// missing or is itself a file.
    fn insert_file(&mut self, path: &Path, binding: StorageBinding) -> Result<bool, Error> {
        self.insert(path, Node::File(binding))
    }

    fn insert_directory(&mut self, path: &Path) -> Result<bool, Error> {
        self.insert(path, Node::new_directory())
    }

    fn insert(&mut self, path: &Path, node: Node) -> Result<bool, Error> {
        if path.is_root() {
            // Root always exists; createFile/createDirectory("/") is a no-op false.
            return Ok(false);
        }
        let parent = path.parent()?;
        let name = path.last()?.to_owned();

        let parent_node = self
            .walk_mut(&parent)
            .ok_or_else(|| Error::NotFound(format!("parent {parent} does not exist")))?;

        let children = match parent_node {
            Node::Directory(children) => children,
            Node::File(_) => {
                return Err(Error::NotFound(format!("parent {parent} is a file")))
            }
        };

        if children.contains_key(&name) {
            return Ok(false);
        }
        children.insert(name, node);
        Ok(true)
    }

    /// Removes the subtree rooted at `path`, returning every file binding
    /// that was beneath it (the file itself, if `path` names a file; every
    /// descendant file, if it names a directory). Returns `None` for root
    /// or for a path that does not exist.
    fn remove(&mut self, path: &Path) -> Option<Vec<StorageBinding>> {
        if path.is_root() {
            return None;
        }
        let parent = path.parent().ok()?;
        let name = path.last().ok()?.to_owned();

        let parent_node = self.walk_mut(&parent)?;
        let children = match parent_node {
            Node::Directory(children) => children,
            Node::File(_) => return None,
        };

        let removed = children.remove(&name)?;
        let mut bindings = Vec::new();
        collect_bindings(&removed, &mut bindings);
        Some(bindings)
    }
}

fn collect_bindings(node: &Node, out: &mut Vec<StorageBinding>) {
    match node {
        Node::File(binding) => out.push(binding.clone()),
        Node::Directory(children) => {
            for child in children.values() {
                collect_bindings(child, out);
            }
        }
    }
}

/// Shared naming-server state: the directory tree plus the set of
/// registered `(storage, command)` pairs. A single [RwLock] around the
/// whole thing satisfies the invariants of §3 — see §9's design note on
/// finer-grained locking being a non-mandatory enhancement.
pub struct NamingState {
    inner: RwLock<Inner>,
    round_robin: AtomicUsize,
    local_registry: Arc<LocalRegistry>,
}

struct Inner {
    tree: Tree,
    registered: Vec<StorageBinding>,
}

impl NamingState {
    pub fn new(local_registry: Arc<LocalRegistry>) -> Arc<Self> {
        Arc::new(NamingState {
            inner: RwLock::new(Inner {
                tree: Tree::default(),
                registered: Vec::new(),
            }),
            round_robin: AtomicUsize::new(0),
            local_registry,
        })
    }

    pub async fn is_directory(&self, path: &Path) -> Result<bool, Error> {
        self.inner.read().await.tree.is_directory(path)
    }

    pub async fn list(&self, path: &Path) -> Result<Vec<String>, Error> {
        self.inner.read().await.tree.list(path)
    }

    pub async fn get_storage(&self, path: &Path) -> Result<StorageBinding, Error> {
        self.inner.read().await.tree.get_storage(path)
    }

    /// Picks the next registered binding, round-robin (§9 resolves "first
    /// registered" into an explicit, documented policy).
    fn pick_storage(&self, registered: &[StorageBinding]) -> Result<StorageBinding, Error> {
        if registered.is_empty() {
            return Err(Error::IllegalState(
                "no storage servers are registered".into(),
            ));
        }
        let i = self.round_robin.fetch_add(1, Ordering::Relaxed) % registered.len();
        Ok(registered[i].clone())
    }

    pub async fn create_file(&self, path: &Path) -> Result<bool, Error> {
        let mut guard = self.inner.write().await;
        if path.is_root() || guard.tree.path_exists(path) {
            return Ok(false);
        }
        // Validate the parent eagerly so we don't make an unnecessary
        // outbound call when the operation is doomed anyway.
        let parent = path.parent()?;
        if !guard.tree.path_exists(&parent) {
            return Err(Error::NotFound(format!("parent {parent} does not exist")));
        }

        let binding = self.pick_storage(&guard.registered)?;
        call_create(&self.local_registry, &binding, path).await?;
        guard.tree.insert_file(path, binding)?;
        Ok(true)
    }

    pub async fn create_directory(&self, path: &Path) -> Result<bool, Error> {
        let mut guard = self.inner.write().await;
        guard.tree.insert_directory(path)
    }

    pub async fn delete(&self, path: &Path) -> Result<bool, Error> {
        let mut guard = self.inner.write().await;
        if path.is_root() {
            return Ok(false);
        }
        if !guard.tree.path_exists(path) {
            return Ok(false);
        }

        // Peek the bindings under the subtree first so we can issue the
        // remote deletes before committing the local removal — if any
        // remote delete fails we still remove the subtree (the storage
        // server's state is no longer something the naming tree claims to
        // track) but we surface the failure to the caller.
        let bindings = guard.tree.remove(path).unwrap_or_default();

        let mut all_ok = true;
        for binding in dedup_bindings(bindings) {
            if let Err(e) = call_delete(&self.local_registry, &binding, path).await {
                tracing::warn!(
                    path = %path,
                    storage = %binding.command_address,
                    err = %e,
                    "storage server failed to honour delete"
                );
                all_ok = false;
            }
        }
        Ok(all_ok)
    }

    /// Registers a newly started storage server, ingesting the files it
    /// reports that the naming tree doesn't already know about, and
    /// returning the ones it must evict locally.
    pub async fn register(
        &self,
        binding: StorageBinding,
        files: Vec<Path>,
    ) -> Result<Vec<Path>, Error> {
        let mut guard = self.inner.write().await;

        if guard.registered.contains(&binding) {
            return Err(Error::IllegalState(format!(
                "storage server {}/{} is already registered",
                binding.storage_address, binding.command_address
            )));
        }

        let mut to_evict = Vec::new();
        for file in files {
            if guard.tree.path_exists(&file) {
                to_evict.push(file);
            } else {
                // A file reported at registration time always has a valid
                // parent by construction (it was enumerated from a real
                // local tree), but directories along the way may not exist
                // in the naming tree yet — create them implicitly.
                if let Ok(parent) = file.parent() {
                    ensure_directory_chain(&mut guard.tree, &parent);
                }
                guard
                    .tree
                    .insert_file(&file, binding.clone())
                    .expect("parent chain was just ensured");
            }
        }

        guard.registered.push(binding);
        Ok(to_evict)
    }
}

fn dedup_bindings(bindings: Vec<StorageBinding>) -> Vec<StorageBinding> {
    let mut out: Vec<StorageBinding> = Vec::new();
    for b in bindings {
        if !out.contains(&b) {
            out.push(b);
        }
    }
    out
}

/// Creates every missing directory from the root down to `path`, ignoring
/// components that already exist. Used only while ingesting a freshly
/// registered storage server's file list, where files may arrive without
/// their ancestor directories having been created via `createDirectory`.
fn ensure_directory_chain(tree: &mut Tree, path: &Path) {
    if path.is_root() {
        return;
    }
    if let Ok(parent) = path.parent() {
        ensure_directory_chain(tree, &parent);
    }
    let _ = tree.insert_directory(path);
}

async fn call_create(
    registry: &LocalRegistry,
    binding: &StorageBinding,
    path: &Path,
) -> Result<bool, Error> {
    if let Some(local) = registry.lookup(&binding.command_address) {
        return tokio::time::timeout(STORAGE_CALL_TIMEOUT, local.create(path))
            .await
            .map_err(Error::from)?;
    }

    let mut client = command_client(&binding.command_address).await?;
    let resp = tokio::time::timeout(
        STORAGE_CALL_TIMEOUT,
        client.create(proto::PathMsg::from(path)),
    )
    .await
    .map_err(Error::from)?
    .map_err(Error::from)?;
    Ok(resp.into_inner().value)
}

async fn call_delete(
    registry: &LocalRegistry,
    binding: &StorageBinding,
    path: &Path,
) -> Result<bool, Error> {
    if let Some(local) = registry.lookup(&binding.command_address) {
        return tokio::time::timeout(STORAGE_CALL_TIMEOUT, local.delete(path))
            .await
            .map_err(Error::from)?;
    }

    let mut client = command_client(&binding.command_address).await?;
    let resp = tokio::time::timeout(
        STORAGE_CALL_TIMEOUT,
        client.delete(proto::PathMsg::from(path)),
    )
    .await
    .map_err(Error::from)?
    .map_err(Error::from)?;
    Ok(resp.into_inner().value)
}

async fn command_client(address: &str) -> Result<CommandServiceClient<Channel>, Error> {
    let url = url::Url::parse(&format!("grpc+http://{address}"))
        .map_err(|e| Error::InvalidArgument(e.to_string()))?;
    let channel = crate::rpc::channel_from_url(&url).await?;
    Ok(CommandServiceClient::new(channel))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn binding(n: u16) -> StorageBinding {
        StorageBinding::new(format!("127.0.0.1:{n}"), format!("127.0.0.1:{}", n + 1))
    }

    #[test]
    fn tree_invariants() {
        let mut tree = Tree::default();
        assert!(tree.is_directory(&Path::root()).unwrap());

        let d = Path::parse("/d").unwrap();
        let f = Path::parse("/d/f").unwrap();

        assert!(tree.insert(&f.clone(), Node::File(binding(1))).is_err());
        assert!(tree.insert_directory(&d).unwrap());
        assert!(tree.insert_file(&f, binding(1)).unwrap());
        assert!(!tree.insert_file(&f, binding(1)).unwrap());

        assert_eq!(vec!["f".to_string()], tree.list(&d).unwrap());
        assert_eq!(binding(1), tree.get_storage(&f).unwrap());
    }

    #[test]
    fn delete_collects_descendant_bindings() {
        let mut tree = Tree::default();
        tree.insert_directory(&Path::parse("/d").unwrap()).unwrap();
        tree.insert_file(&Path::parse("/d/a").unwrap(), binding(1))
            .unwrap();
        tree.insert_file(&Path::parse("/d/b").unwrap(), binding(2))
            .unwrap();

        let removed = tree.remove(&Path::parse("/d").unwrap()).unwrap();
        assert_eq!(2, removed.len());
        assert!(!tree.path_exists(&Path::parse("/d").unwrap()));
    }

    #[tokio::test]
    async fn register_ingests_and_evicts() {
        let state = NamingState::new(Arc::new(LocalRegistry::new()));
        let b = binding(1);

        let evicted = state
            .register(b.clone(), vec![Path::parse("/x").unwrap(), Path::parse("/y").unwrap()])
            .await
            .unwrap();
        assert!(evicted.is_empty());
        assert_eq!(b, state.get_storage(&Path::parse("/x").unwrap()).await.unwrap());

        // Double registration of the same binding is rejected.
        assert!(matches!(
            state.register(b.clone(), vec![]).await,
            Err(Error::IllegalState(_))
        ));
    }

    #[tokio::test]
    async fn round_robin_cycles_through_registered_servers() {
        let state = NamingState::new(Arc::new(LocalRegistry::new()));
        state.register(binding(1), vec![]).await.unwrap();
        state.register(binding(3), vec![]).await.unwrap();

        let picked = {
            let guard = state.inner.read().await;
            let a = state.pick_storage(&guard.registered).unwrap();
            let b = state.pick_storage(&guard.registered).unwrap();
            let c = state.pick_storage(&guard.registered).unwrap();
            (a, b, c)
        };
        assert_ne!(picked.0, picked.1);
        assert_eq!(picked.0, picked.2);
    }
}
