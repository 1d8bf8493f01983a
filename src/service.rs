//! File operations on a remote endpoint through a pooled, retrying executor

use crate::connection::{Connector, FtpConnectionManager, FtpSession};
use crate::errors::{FtpError, FtpResult, TransferError};
use crate::executor::{UnitOfWork, WorkExecutor};

use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::debug;

const PIPE_CAPACITY: usize = 64 * 1024;

struct ListWork {
    path: String,
}

#[async_trait]
impl<S: FtpSession> UnitOfWork<S> for ListWork {
    type Output = Vec<String>;

    async fn run(&self, session: &mut S) -> Result<Vec<String>, TransferError> {
        let names: Vec<String> = session
            .list(&self.path)
            .await?
            .into_iter()
            .map(|entry| entry.name)
            .collect();
        debug!(path = %self.path, entries = names.len(), "Listing files from FTP");
        Ok(names)
    }
}

struct GetWork {
    path: String,
}

#[async_trait]
impl<S: FtpSession> UnitOfWork<S> for GetWork {
    type Output = Bytes;

    async fn run(&self, session: &mut S) -> Result<Bytes, TransferError> {
        let (mut writer, mut reader) = tokio::io::duplex(PIPE_CAPACITY);

        let download = async move {
            let result = session.download_to(&mut writer, &self.path).await;
            // Closing the write half ends the collector.
            drop(writer);
            result
        };
        let collect = async move {
            let mut data = Vec::new();
            reader.read_to_end(&mut data).await.map(|_| data)
        };

        let (downloaded, collected) = tokio::join!(download, collect);
        downloaded?;
        let data = Bytes::from(collected?);

        debug!(path = %self.path, bytes = data.len(), "Retrieved a file from FTP");
        Ok(data)
    }
}

struct PutWork {
    path: String,
    data: Bytes,
}

#[async_trait]
impl<S: FtpSession> UnitOfWork<S> for PutWork {
    type Output = ();

    async fn run(&self, session: &mut S) -> Result<(), TransferError> {
        let dir = parent_dir(&self.path);
        if !is_root(dir) {
            session.ensure_dir(dir).await?;
        }

        let (mut writer, mut reader) = tokio::io::duplex(PIPE_CAPACITY);

        let upload = async move {
            let result = session.upload_from(&mut reader, &self.path).await;
            // A writer blocked on a full pipe fails once the reader is gone.
            drop(reader);
            result
        };
        let feed = async move {
            writer.write_all(&self.data).await?;
            writer.shutdown().await
        };

        let (uploaded, fed) = tokio::join!(upload, feed);
        uploaded?;
        fed?;

        debug!(path = %self.path, bytes = self.data.len(), "Sent a file to FTP");
        Ok(())
    }
}

struct DeleteWork {
    path: String,
    ignore_missing: bool,
}

#[async_trait]
impl<S: FtpSession> UnitOfWork<S> for DeleteWork {
    type Output = ();

    async fn run(&self, session: &mut S) -> Result<(), TransferError> {
        session.remove(&self.path, self.ignore_missing).await?;
        debug!(path = %self.path, "Deleted a file from FTP");
        Ok(())
    }
}

/// Directory part of a remote path
fn parent_dir(path: &str) -> &str {
    let trimmed = path.trim_end_matches('/');
    if trimmed.is_empty() {
        return if path.starts_with('/') { "/" } else { "." };
    }
    match trimmed.rfind('/') {
        Some(0) => "/",
        Some(idx) => &trimmed[..idx],
        None => ".",
    }
}

/// Directories that always exist and need no creation
fn is_root(dir: &str) -> bool {
    matches!(dir, "/" | ".")
}

/// Remote file operations under a base path
///
/// Every operation runs on a pooled connection through the retry engine, and
/// failures come back tagged with the operation, the host and the full remote
/// path. Clones share the same pool.
///
/// # Examples
///
/// ```
/// use esox_ftppool::{AccessOptions, Environment, FtpConfig, FtpProvider, FtpSettings, MemoryServer, TokioDelay};
/// use std::sync::Arc;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let server = MemoryServer::new();
/// let settings = FtpSettings::new(AccessOptions::new("memory", "demo"), FtpConfig::new("/outbox"));
/// let provider = FtpProvider::init(settings, server.connector(), &Environment::default(), Arc::new(TokioDelay)).unwrap();
///
/// let ftp = provider.service();
/// ftp.put("/report.csv", "id,total\n1,42\n").await.unwrap();
/// assert_eq!(ftp.list("/").await.unwrap(), vec!["report.csv".to_string()]);
/// assert_eq!(server.file("/outbox/report.csv").unwrap().len(), 14);
///
/// provider.shutdown().await;
/// # }
/// ```
pub struct FtpService<C: Connector> {
    executor: Arc<WorkExecutor<FtpConnectionManager<C>>>,
    base: String,
    host: String,
}

impl<C: Connector> Clone for FtpService<C> {
    fn clone(&self) -> Self {
        Self {
            executor: Arc::clone(&self.executor),
            base: self.base.clone(),
            host: self.host.clone(),
        }
    }
}

impl<C: Connector> FtpService<C> {
    pub fn new(
        executor: Arc<WorkExecutor<FtpConnectionManager<C>>>,
        base: impl Into<String>,
        host: impl Into<String>,
    ) -> Self {
        Self {
            executor,
            base: base.into(),
            host: host.into(),
        }
    }

    /// Base path prepended to every remote path
    pub fn base(&self) -> &str {
        &self.base
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    fn remote_path(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    /// Names of the entries in the directory at `path`
    pub async fn list(&self, path: &str) -> FtpResult<Vec<String>> {
        let path = self.remote_path(path);
        let work = ListWork { path };
        self.executor.run(&work).await.map_err(|e| FtpError::List {
            host: self.host.clone(),
            path: work.path.clone(),
            source: Box::new(e),
        })
    }

    /// Full contents of the file at `path`
    pub async fn get(&self, path: &str) -> FtpResult<Bytes> {
        let work = GetWork {
            path: self.remote_path(path),
        };
        self.executor.run(&work).await.map_err(|e| FtpError::Get {
            host: self.host.clone(),
            path: work.path.clone(),
            source: Box::new(e),
        })
    }

    /// Write `data` to `path`, creating missing parent directories
    ///
    /// Accepts anything convertible into [`Bytes`], such as `String`,
    /// `Vec<u8>` or static strings.
    pub async fn put(&self, path: &str, data: impl Into<Bytes>) -> FtpResult<()> {
        let work = PutWork {
            path: self.remote_path(path),
            data: data.into(),
        };
        self.executor.run(&work).await.map_err(|e| FtpError::Put {
            host: self.host.clone(),
            path: work.path.clone(),
            source: Box::new(e),
        })
    }

    /// Remove the file at `path`
    ///
    /// With `ignore_missing` a file that does not exist is not an error.
    pub async fn delete(&self, path: &str, ignore_missing: bool) -> FtpResult<()> {
        let work = DeleteWork {
            path: self.remote_path(path),
            ignore_missing,
        };
        self.executor.run(&work).await.map_err(|e| FtpError::Delete {
            host: self.host.clone(),
            path: work.path.clone(),
            source: Box::new(e),
        })
    }

    /// Remove the file at `path` if it exists
    pub async fn delete_file(&self, path: &str) -> FtpResult<()> {
        self.delete(path, true).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AccessOptions, Environment, FtpSettings, PoolConfiguration};
    use crate::errors::ErrorKind;
    use crate::executor::TokioDelay;
    use crate::memory::{MemoryConnector, MemoryServer};
    use crate::pool::ResourcePool;

    fn service(server: &MemoryServer, base: &str) -> FtpService<MemoryConnector> {
        let settings = FtpSettings::new(
            AccessOptions::new("memory", "user"),
            crate::config::FtpConfig::new(base),
        );
        let manager = FtpConnectionManager::new(server.connector(), &settings, &Environment::default());
        let pool = ResourcePool::new(manager, PoolConfiguration::new().with_max_total(2)).unwrap();
        let executor = WorkExecutor::new(pool, "memory", None, Arc::new(TokioDelay));
        FtpService::new(Arc::new(executor), base, "memory")
    }

    #[test]
    fn test_parent_dir() {
        assert_eq!(parent_dir("/a.txt"), "/");
        assert_eq!(parent_dir("/x/y/a.txt"), "/x/y");
        assert_eq!(parent_dir("/x/y/"), "/x");
        assert_eq!(parent_dir("a.txt"), ".");
        assert_eq!(parent_dir("in/a.txt"), "in");
        assert_eq!(parent_dir("/"), "/");
        assert!(is_root(parent_dir("/a.txt")));
        assert!(!is_root(parent_dir("/x/a.txt")));
    }

    #[tokio::test]
    async fn test_put_then_get() {
        let server = MemoryServer::new();
        let ftp = service(&server, "/base");

        ftp.put("/nested/dir/file.bin", vec![7u8; 200_000]).await.unwrap();
        assert!(server.has_dir("/base/nested/dir"));

        let data = ftp.get("/nested/dir/file.bin").await.unwrap();
        assert_eq!(data.len(), 200_000);
        assert!(data.iter().all(|b| *b == 7));
    }

    #[tokio::test]
    async fn test_put_at_root_skips_directory_creation() {
        let server = MemoryServer::new();
        let ftp = service(&server, "");

        ftp.put("/top.txt", "top").await.unwrap();
        assert_eq!(server.file("/top.txt").unwrap().as_ref(), b"top");
        // One upload, no mkdir.
        assert_eq!(server.stats().operations, 1);
    }

    #[tokio::test]
    async fn test_list_and_delete() {
        let server = MemoryServer::new();
        server.insert_file("/base/in/a.txt", "a");
        server.insert_file("/base/in/b.txt", "b");
        let ftp = service(&server, "/base");

        let mut names = ftp.list("/in").await.unwrap();
        names.sort();
        assert_eq!(names, vec!["a.txt", "b.txt"]);

        ftp.delete_file("/in/a.txt").await.unwrap();
        ftp.delete_file("/in/a.txt").await.unwrap();
        assert_eq!(ftp.list("/in").await.unwrap(), vec!["b.txt"]);

        let err = ftp.delete("/in/a.txt", false).await.err().unwrap();
        assert_eq!(err.kind(), ErrorKind::Delete);
        assert_eq!(err.path(), Some("/base/in/a.txt"));
    }

    #[tokio::test]
    async fn test_missing_file_is_tagged() {
        let server = MemoryServer::new();
        let ftp = service(&server, "/base");

        let err = ftp.get("/nope.txt").await.err().unwrap();
        assert_eq!(err.kind(), ErrorKind::Get);
        assert_eq!(err.host(), "memory");
        assert_eq!(err.path(), Some("/base/nope.txt"));
        assert_eq!(err.attempts(), Some(1));

        let transfer = err.inner().and_then(FtpError::inner).unwrap();
        assert!(matches!(
            transfer,
            FtpError::Transfer {
                source: TransferError::NotFound(_),
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_clones_share_the_pool() {
        let server = MemoryServer::new();
        let ftp = service(&server, "");
        let other = ftp.clone();

        ftp.put("/a.txt", "a").await.unwrap();
        other.put("/b.txt", "b").await.unwrap();
        assert_eq!(server.stats().connects, 1);
    }
}
