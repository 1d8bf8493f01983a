//! In-memory FTP endpoint
//!
//! A [`Connector`] backed by a shared in-process file tree. It backs the demo,
//! the benchmarks and the tests, and can inject connection and command
//! failures to exercise the pool's failure paths.

use crate::config::AccessOptions;
use crate::connection::{Connector, FileInfo, FtpSession};
use crate::errors::TransferError;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use secrecy::ExposeSecret;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

const CHUNK_SIZE: usize = 8 * 1024;

/// Counters collected by a [`MemoryServer`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MemoryStats {
    pub connects: usize,
    pub failed_connects: usize,
    pub closes: usize,
    pub active_sessions: usize,
    pub peak_sessions: usize,
    pub operations: usize,
    pub failed_operations: usize,
    pub peak_in_flight: usize,
}

#[derive(Default)]
struct ServerState {
    files: BTreeMap<String, Bytes>,
    dirs: BTreeSet<String>,
    password: Option<String>,
    latency: Duration,
    fail_connects: usize,
    fail_operations: usize,
    fail_closes: usize,
    in_flight: usize,
    sessions: Vec<Weak<AtomicBool>>,
    stats: MemoryStats,
}

/// Shared in-memory file tree
///
/// # Examples
///
/// ```
/// use esox_ftppool::MemoryServer;
///
/// let server = MemoryServer::new();
/// server.insert_file("/in/hello.txt", "hello");
///
/// assert_eq!(server.file("/in/hello.txt").unwrap().as_ref(), b"hello");
/// assert!(server.file("/in/missing.txt").is_none());
/// ```
#[derive(Clone, Default)]
pub struct MemoryServer {
    state: Arc<Mutex<ServerState>>,
}

impl MemoryServer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Only accept sessions presenting this password
    pub fn with_password(self, password: impl Into<String>) -> Self {
        self.state.lock().password = Some(password.into());
        self
    }

    /// Delay every command by `latency`
    pub fn with_latency(self, latency: Duration) -> Self {
        self.state.lock().latency = latency;
        self
    }

    pub fn connector(&self) -> MemoryConnector {
        MemoryConnector {
            server: self.clone(),
        }
    }

    pub fn insert_file(&self, path: &str, data: impl Into<Bytes>) {
        let path = normalize(path);
        let mut state = self.state.lock();
        add_ancestors(&mut state.dirs, &path);
        state.files.insert(path, data.into());
    }

    pub fn file(&self, path: &str) -> Option<Bytes> {
        self.state.lock().files.get(&normalize(path)).cloned()
    }

    pub fn has_dir(&self, path: &str) -> bool {
        let path = normalize(path);
        path == "/" || self.state.lock().dirs.contains(&path)
    }

    pub fn fail_next_connects(&self, count: usize) {
        self.state.lock().fail_connects = count;
    }

    pub fn fail_next_operations(&self, count: usize) {
        self.state.lock().fail_operations = count;
    }

    pub fn fail_next_closes(&self, count: usize) {
        self.state.lock().fail_closes = count;
    }

    /// Drop every open session from the server side
    pub fn disconnect_all(&self) {
        let mut state = self.state.lock();
        for session in state.sessions.drain(..) {
            if let Some(closed) = session.upgrade() {
                closed.store(true, Ordering::SeqCst);
            }
        }
    }

    pub fn stats(&self) -> MemoryStats {
        self.state.lock().stats.clone()
    }

    /// Start a command: checks injected failures and tracks concurrency
    fn begin(&self) -> Result<(), TransferError> {
        let mut state = self.state.lock();
        state.stats.operations += 1;
        if state.fail_operations > 0 {
            state.fail_operations -= 1;
            state.stats.failed_operations += 1;
            return Err(TransferError::Rejected {
                code: 451,
                message: "Requested action aborted: local error in processing".to_string(),
            });
        }
        state.in_flight += 1;
        state.stats.peak_in_flight = state.stats.peak_in_flight.max(state.in_flight);
        Ok(())
    }

    fn end(&self) {
        self.state.lock().in_flight -= 1;
    }

    fn latency(&self) -> Duration {
        self.state.lock().latency
    }
}

/// [`Connector`] opening sessions on a [`MemoryServer`]
#[derive(Clone)]
pub struct MemoryConnector {
    server: MemoryServer,
}

#[async_trait]
impl Connector for MemoryConnector {
    type Session = MemorySession;

    async fn connect(
        &self,
        access: &AccessOptions,
        timeout: Option<Duration>,
    ) -> Result<MemorySession, TransferError> {
        let latency = self.server.latency();
        if let Some(timeout) = timeout
            && latency > timeout
        {
            tokio::time::sleep(timeout).await;
            return Err(TransferError::Timeout(timeout));
        }
        tokio::time::sleep(latency).await;

        let mut state = self.server.state.lock();
        if state.fail_connects > 0 {
            state.fail_connects -= 1;
            state.stats.failed_connects += 1;
            return Err(TransferError::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                format!("connection refused by {}", access.host),
            )));
        }
        if let Some(expected) = &state.password {
            let given = access.password.as_ref().map(|p| p.expose_secret());
            if given != Some(expected.as_str()) {
                state.stats.failed_connects += 1;
                return Err(TransferError::Rejected {
                    code: 530,
                    message: "Login incorrect".to_string(),
                });
            }
        }

        let closed = Arc::new(AtomicBool::new(false));
        state.sessions.push(Arc::downgrade(&closed));
        state.stats.connects += 1;
        state.stats.active_sessions += 1;
        state.stats.peak_sessions = state.stats.peak_sessions.max(state.stats.active_sessions);

        Ok(MemorySession {
            server: self.server.clone(),
            closed,
            released: false,
        })
    }
}

/// Session on a [`MemoryServer`]
pub struct MemorySession {
    server: MemoryServer,
    closed: Arc<AtomicBool>,
    released: bool,
}

impl MemorySession {
    async fn command<T>(&self, op: impl FnOnce(&mut ServerState) -> Result<T, TransferError>) -> Result<T, TransferError> {
        if self.is_closed() {
            return Err(TransferError::Closed);
        }
        self.server.begin()?;
        tokio::time::sleep(self.server.latency()).await;
        let result = {
            let mut state = self.server.state.lock();
            op(&mut *state)
        };
        self.server.end();
        result
    }
}

#[async_trait]
impl FtpSession for MemorySession {
    async fn list(&mut self, path: &str) -> Result<Vec<FileInfo>, TransferError> {
        let dir = normalize(path);
        self.command(|state| {
            if dir != "/" && !state.dirs.contains(&dir) {
                return Err(TransferError::NotFound(dir.clone()));
            }
            let mut entries: Vec<FileInfo> = state
                .dirs
                .iter()
                .filter(|d| parent_of(d) == dir && d.as_str() != "/")
                .map(|d| FileInfo {
                    name: base_name(d).to_string(),
                    size: 0,
                    is_dir: true,
                })
                .collect();
            entries.extend(
                state
                    .files
                    .iter()
                    .filter(|(f, _)| parent_of(f) == dir)
                    .map(|(f, data)| FileInfo {
                        name: base_name(f).to_string(),
                        size: data.len() as u64,
                        is_dir: false,
                    }),
            );
            Ok(entries)
        })
        .await
    }

    async fn download_to(
        &mut self,
        sink: &mut (dyn AsyncWrite + Send + Unpin),
        path: &str,
    ) -> Result<u64, TransferError> {
        let path = normalize(path);
        let data = self
            .command(|state| {
                state
                    .files
                    .get(&path)
                    .cloned()
                    .ok_or_else(|| TransferError::NotFound(path.clone()))
            })
            .await?;

        for chunk in data.chunks(CHUNK_SIZE) {
            sink.write_all(chunk).await?;
        }
        sink.flush().await?;
        Ok(data.len() as u64)
    }

    async fn upload_from(
        &mut self,
        source: &mut (dyn AsyncRead + Send + Unpin),
        path: &str,
    ) -> Result<u64, TransferError> {
        let path = normalize(path);
        let mut buffer = Vec::new();
        source.read_to_end(&mut buffer).await?;
        let size = buffer.len() as u64;

        self.command(|state| {
            let parent = parent_of(&path);
            if parent != "/" && !state.dirs.contains(parent) {
                return Err(TransferError::NotFound(parent.to_string()));
            }
            state.files.insert(path.clone(), Bytes::from(buffer));
            Ok(size)
        })
        .await
    }

    async fn ensure_dir(&mut self, path: &str) -> Result<(), TransferError> {
        let path = normalize(path);
        self.command(|state| {
            add_ancestors(&mut state.dirs, &path);
            if path != "/" {
                state.dirs.insert(path.clone());
            }
            Ok(())
        })
        .await
    }

    async fn remove(&mut self, path: &str, ignore_missing: bool) -> Result<(), TransferError> {
        let path = normalize(path);
        self.command(|state| match state.files.remove(&path) {
            Some(_) => Ok(()),
            None if ignore_missing => Ok(()),
            None => Err(TransferError::NotFound(path.clone())),
        })
        .await
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    async fn close(&mut self) -> Result<(), TransferError> {
        if self.released {
            return Ok(());
        }
        self.released = true;
        self.closed.store(true, Ordering::SeqCst);

        let mut state = self.server.state.lock();
        state.stats.closes += 1;
        state.stats.active_sessions -= 1;
        if state.fail_closes > 0 {
            state.fail_closes -= 1;
            return Err(TransferError::Io(std::io::Error::new(
                std::io::ErrorKind::BrokenPipe,
                "control connection reset during QUIT",
            )));
        }
        Ok(())
    }
}

/// Absolute form of `path` without repeated or trailing slashes
fn normalize(path: &str) -> String {
    let parts: Vec<&str> = path.split('/').filter(|p| !p.is_empty() && *p != ".").collect();
    format!("/{}", parts.join("/"))
}

fn parent_of(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) | None => "/",
        Some(idx) => &path[..idx],
    }
}

fn base_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

fn add_ancestors(dirs: &mut BTreeSet<String>, path: &str) {
    let mut current = parent_of(path);
    while current != "/" {
        dirs.insert(current.to_string());
        current = parent_of(current);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn access() -> AccessOptions {
        AccessOptions::new("memory", "user")
    }

    #[test]
    fn test_path_helpers() {
        assert_eq!(normalize("a//b/"), "/a/b");
        assert_eq!(normalize(""), "/");
        assert_eq!(parent_of("/a/b.txt"), "/a");
        assert_eq!(parent_of("/b.txt"), "/");
        assert_eq!(base_name("/a/b.txt"), "b.txt");
    }

    #[tokio::test]
    async fn test_listing_and_removal() {
        let server = MemoryServer::new();
        server.insert_file("/docs/a.txt", "a");
        server.insert_file("/docs/nested/b.txt", "bb");

        let mut session = server.connector().connect(&access(), None).await.unwrap();
        let mut names: Vec<String> = session
            .list("/docs")
            .await
            .unwrap()
            .into_iter()
            .map(|f| f.name)
            .collect();
        names.sort();
        assert_eq!(names, vec!["a.txt", "nested"]);

        session.remove("/docs/a.txt", false).await.unwrap();
        assert!(server.file("/docs/a.txt").is_none());
        assert!(session.remove("/docs/a.txt", true).await.is_ok());
        assert!(matches!(
            session.remove("/docs/a.txt", false).await,
            Err(TransferError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_upload_requires_parent_dir() {
        let server = MemoryServer::new();
        let mut session = server.connector().connect(&access(), None).await.unwrap();

        let mut data: &[u8] = b"payload";
        let result = session.upload_from(&mut data, "/out/file.bin").await;
        assert!(matches!(result, Err(TransferError::NotFound(_))));

        session.ensure_dir("/out").await.unwrap();
        let mut data: &[u8] = b"payload";
        assert_eq!(session.upload_from(&mut data, "/out/file.bin").await.unwrap(), 7);
        assert_eq!(server.file("/out/file.bin").unwrap().as_ref(), b"payload");
    }

    #[tokio::test]
    async fn test_password_check() {
        let server = MemoryServer::new().with_password("s3cret");
        let connector = server.connector();

        assert!(matches!(
            connector.connect(&access(), None).await,
            Err(TransferError::Rejected { code: 530, .. })
        ));
        assert!(connector.connect(&access().with_password("s3cret"), None).await.is_ok());
        assert_eq!(server.stats().failed_connects, 1);
    }

    #[tokio::test]
    async fn test_connect_timeout() {
        let server = MemoryServer::new().with_latency(Duration::from_millis(50));
        let result = server
            .connector()
            .connect(&access(), Some(Duration::from_millis(5)))
            .await;
        assert!(matches!(result, Err(TransferError::Timeout(_))));
    }

    #[tokio::test]
    async fn test_closed_session_rejects_commands() {
        let server = MemoryServer::new();
        let mut session = server.connector().connect(&access(), None).await.unwrap();
        server.disconnect_all();

        assert!(session.is_closed());
        assert!(matches!(session.list("/").await, Err(TransferError::Closed)));
        session.close().await.unwrap();
        assert_eq!(server.stats().active_sessions, 0);
    }
}
