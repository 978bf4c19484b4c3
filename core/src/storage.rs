//! The storage server's two interfaces: the data-plane [StorageService]
//! (size/read/write) and the control-plane [CommandService]
//! (create/delete), plus [LocalStorage], the only implementation of both —
//! a local root directory on disk.

use std::io::SeekFrom;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};
use tokio::sync::Mutex;
use tonic::async_trait;

use crate::path::Path;
use crate::Error;

/// Byte-range operations against files this storage server holds.
#[async_trait]
pub trait StorageService: Send + Sync {
    async fn size(&self, path: &Path) -> Result<i64, Error>;
    async fn read(&self, path: &Path, offset: i64, length: i32) -> Result<Vec<u8>, Error>;
    async fn write(&self, path: &Path, offset: i64, data: &[u8]) -> Result<(), Error>;
}

/// Creation and deletion of entries this storage server holds.
#[async_trait]
pub trait CommandService: Send + Sync {
    /// Returns `Ok(false)` for root or if `path` already exists.
    async fn create(&self, path: &Path) -> Result<bool, Error>;
    /// Returns `Ok(false)` for root or if `path` does not exist.
    async fn delete(&self, path: &Path) -> Result<bool, Error>;
}

/// A local filesystem backing store. All data and control operations
/// serialize on `lock`, so reads, writes, creates and deletes on one
/// [LocalStorage] are totally ordered (§5: correctness over throughput).
pub struct LocalStorage {
    root: PathBuf,
    lock: Mutex<()>,
}

impl LocalStorage {
    pub fn new(root: PathBuf) -> Arc<Self> {
        Arc::new(LocalStorage {
            root,
            lock: Mutex::new(()),
        })
    }

    pub fn root(&self) -> &std::path::Path {
        &self.root
    }

    fn local_path(&self, path: &Path) -> PathBuf {
        path.to_local(&self.root)
    }

    /// Removes every directory under `root` that is empty, walking
    /// bottom-up, as required by the registration bootstrap's step 7.
    pub fn prune_empty_dirs(&self) -> std::io::Result<()> {
        prune_empty_dirs_rec(&self.root, &self.root)
    }
}

fn prune_empty_dirs_rec(dir: &std::path::Path, root: &std::path::Path) -> std::io::Result<()> {
    if !dir.is_dir() {
        return Ok(());
    }
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            prune_empty_dirs_rec(&entry.path(), root)?;
        }
    }
    if dir != root && std::fs::read_dir(dir)?.next().is_none() {
        std::fs::remove_dir(dir)?;
    }
    Ok(())
}

#[async_trait]
impl StorageService for LocalStorage {
    async fn size(&self, path: &Path) -> Result<i64, Error> {
        let _guard = self.lock.lock().await;
        let local = self.local_path(path);
        let meta = tokio::fs::metadata(&local)
            .await
            .map_err(|_| Error::NotFound(format!("{path} does not exist")))?;
        if meta.is_dir() {
            return Err(Error::NotFound(format!("{path} is a directory")));
        }
        Ok(meta.len() as i64)
    }

    async fn read(&self, path: &Path, offset: i64, length: i32) -> Result<Vec<u8>, Error> {
        let _guard = self.lock.lock().await;
        let local = self.local_path(path);

        let mut file = tokio::fs::File::open(&local)
            .await
            .map_err(|_| Error::NotFound(format!("{path} does not exist")))?;
        let meta = file.metadata().await?;
        if meta.is_dir() {
            return Err(Error::NotFound(format!("{path} is a directory")));
        }

        if offset < 0 || length < 0 || offset + length as i64 > meta.len() as i64 {
            return Err(Error::OutOfBounds(format!(
                "range [{offset}, {offset}+{length}) is outside {path} of length {}",
                meta.len()
            )));
        }

        // File-offset semantics: seek to `offset`, then read `length` bytes
        // into buffer position 0 (§9 corrects the source's bug of applying
        // `offset` as a destination buffer offset instead).
        file.seek(SeekFrom::Start(offset as u64)).await?;
        let mut buf = vec![0u8; length as usize];
        file.read_exact(&mut buf).await?;
        Ok(buf)
    }

    async fn write(&self, path: &Path, offset: i64, data: &[u8]) -> Result<(), Error> {
        let _guard = self.lock.lock().await;
        let local = self.local_path(path);

        if offset < 0 {
            return Err(Error::OutOfBounds(format!("negative offset {offset}")));
        }

        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .open(&local)
            .await
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound {
                    Error::NotFound(format!("{path} does not exist"))
                } else {
                    Error::from(e)
                }
            })?;
        if file.metadata().await?.is_dir() {
            return Err(Error::NotFound(format!("{path} is a directory")));
        }

        file.seek(SeekFrom::Start(offset as u64)).await?;
        file.write_all(data).await?;
        Ok(())
    }
}

#[async_trait]
impl CommandService for LocalStorage {
    async fn create(&self, path: &Path) -> Result<bool, Error> {
        let _guard = self.lock.lock().await;
        if path.is_root() {
            return Ok(false);
        }
        let local = self.local_path(path);
        if local.exists() {
            return Ok(false);
        }
        if let Some(parent) = local.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::File::create(&local).await?;
        Ok(true)
    }

    async fn delete(&self, path: &Path) -> Result<bool, Error> {
        let _guard = self.lock.lock().await;
        if path.is_root() {
            return Ok(false);
        }
        let local = self.local_path(path);
        let meta = match tokio::fs::metadata(&local).await {
            Ok(meta) => meta,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(Error::from(e)),
        };

        if meta.is_dir() {
            tokio::fs::remove_dir_all(&local).await?;
        } else {
            tokio::fs::remove_file(&local).await?;
        }
        Ok(true)
    }
}
