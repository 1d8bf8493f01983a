//! FTP sessions and the manager that pools them

use crate::config::{AccessOptions, Environment, FtpSettings};
use crate::errors::{FtpError, TransferError};
use crate::pool::ConnectionManager;

use async_trait::async_trait;
use secrecy::SecretString;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, error, warn};

/// Entry returned by a directory listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    pub name: String,
    pub size: u64,
    pub is_dir: bool,
}

/// One authenticated session to a file-transfer endpoint
///
/// Implemented by protocol clients; the pool and the service only rely on
/// these calls succeeding or failing.
#[async_trait]
pub trait FtpSession: Send + 'static {
    async fn list(&mut self, path: &str) -> Result<Vec<FileInfo>, TransferError>;

    /// Stream the remote file into `sink`, returning the number of bytes sent
    async fn download_to(
        &mut self,
        sink: &mut (dyn AsyncWrite + Send + Unpin),
        path: &str,
    ) -> Result<u64, TransferError>;

    /// Store everything read from `source` until EOF at `path`
    async fn upload_from(
        &mut self,
        source: &mut (dyn AsyncRead + Send + Unpin),
        path: &str,
    ) -> Result<u64, TransferError>;

    /// Create `path` and any missing parents
    async fn ensure_dir(&mut self, path: &str) -> Result<(), TransferError>;

    async fn remove(&mut self, path: &str, ignore_missing: bool) -> Result<(), TransferError>;

    /// Whether the control connection is known to be gone
    fn is_closed(&self) -> bool;

    async fn close(&mut self) -> Result<(), TransferError>;
}

/// Opens sessions
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    type Session: FtpSession;

    async fn connect(
        &self,
        access: &AccessOptions,
        timeout: Option<Duration>,
    ) -> Result<Self::Session, TransferError>;
}

/// [`ConnectionManager`] for FTP sessions
///
/// Credentials are resolved once at construction: a non-empty value in the
/// password environment variable replaces the inline password.
pub struct FtpConnectionManager<C: Connector> {
    connector: C,
    access: AccessOptions,
    timeout: Option<Duration>,
}

impl<C: Connector> FtpConnectionManager<C> {
    pub fn new(connector: C, settings: &FtpSettings, env: &Environment) -> Self {
        let mut access = settings.access.clone();

        match env.get(&settings.password_env_name) {
            Some(password) => {
                access.password = Some(SecretString::new(password.to_string().into_boxed_str()));
            }
            None if access.password.is_some() => {
                warn!(
                    host = %access.host,
                    env_name = %settings.password_env_name,
                    "Using an inline FTP password, prefer the password environment variable"
                );
            }
            None => {}
        }

        Self {
            connector,
            access,
            timeout: settings.timeout,
        }
    }

    pub fn host(&self) -> &str {
        &self.access.host
    }

    /// Credentials the sessions are opened with
    pub fn access(&self) -> &AccessOptions {
        &self.access
    }

    pub fn connector(&self) -> &C {
        &self.connector
    }
}

#[async_trait]
impl<C: Connector> ConnectionManager for FtpConnectionManager<C> {
    type Connection = C::Session;
    type Error = FtpError;

    async fn create(&self) -> Result<C::Session, FtpError> {
        match self.connector.connect(&self.access, self.timeout).await {
            Ok(session) => {
                debug!(host = %self.access.host, "FTP successfully connected");
                Ok(session)
            }
            Err(e) => {
                error!(host = %self.access.host, error = %e, "FTP connection failure");
                Err(FtpError::Connect {
                    host: self.access.host.clone(),
                    source: Box::new(e),
                })
            }
        }
    }

    fn is_usable(&self, session: &C::Session) -> bool {
        !session.is_closed()
    }

    async fn destroy(&self, mut session: C::Session) -> Result<(), FtpError> {
        match session.close().await {
            Ok(()) => {
                debug!(host = %self.access.host, "FTP disconnected");
                Ok(())
            }
            Err(e) => {
                let err = FtpError::Disconnect {
                    host: self.access.host.clone(),
                    source: e,
                };
                error!(host = %self.access.host, error = %err, "FTP disconnection failure");
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::FtpConfig;
    use crate::errors::ErrorKind;
    use crate::memory::MemoryServer;
    use secrecy::ExposeSecret;

    fn settings(password: Option<&str>) -> FtpSettings {
        let mut access = AccessOptions::new("localhost", "user");
        if let Some(password) = password {
            access = access.with_password(password);
        }
        FtpSettings::new(access, FtpConfig::new(""))
    }

    fn password_of<C: Connector>(manager: &FtpConnectionManager<C>) -> Option<String> {
        manager
            .access()
            .password
            .as_ref()
            .map(|p| p.expose_secret().to_string())
    }

    #[test]
    fn test_env_password_overrides_inline() {
        let server = MemoryServer::new();
        let env = Environment::from_pairs([("FTP_PASSWORD", "from-env")]);
        let manager = FtpConnectionManager::new(server.connector(), &settings(Some("inline")), &env);
        assert_eq!(password_of(&manager).as_deref(), Some("from-env"));
    }

    #[test]
    fn test_missing_env_keeps_inline_password() {
        let server = MemoryServer::new();
        let manager = FtpConnectionManager::new(
            server.connector(),
            &settings(Some("inline")),
            &Environment::default(),
        );
        assert_eq!(password_of(&manager).as_deref(), Some("inline"));

        let manager = FtpConnectionManager::new(server.connector(), &settings(None), &Environment::default());
        assert_eq!(password_of(&manager), None);
    }

    #[test]
    fn test_custom_env_name() {
        let server = MemoryServer::new();
        let env = Environment::from_pairs([("FTP_PASSWORD", "ignored"), ("UPLOADS_PASSWORD", "picked")]);
        let settings = settings(None).with_password_env_name("UPLOADS_PASSWORD");
        let manager = FtpConnectionManager::new(server.connector(), &settings, &env);
        assert_eq!(password_of(&manager).as_deref(), Some("picked"));
    }

    #[tokio::test]
    async fn test_lifecycle() {
        let server = MemoryServer::new();
        let manager = FtpConnectionManager::new(server.connector(), &settings(None), &Environment::default());

        let session = manager.create().await.unwrap();
        assert!(manager.is_usable(&session));
        assert_eq!(server.stats().connects, 1);

        server.disconnect_all();
        assert!(!manager.is_usable(&session));

        manager.destroy(session).await.unwrap();
        assert_eq!(server.stats().closes, 1);
    }

    #[tokio::test]
    async fn test_failures_are_tagged() {
        let server = MemoryServer::new();
        let manager = FtpConnectionManager::new(server.connector(), &settings(None), &Environment::default());

        server.fail_next_connects(1);
        let err = manager.create().await.err().unwrap();
        assert_eq!(err.kind(), ErrorKind::Connect);
        assert_eq!(err.host(), "localhost");

        let session = manager.create().await.unwrap();
        server.fail_next_closes(1);
        let err = manager.destroy(session).await.err().unwrap();
        assert_eq!(err.kind(), ErrorKind::Disconnect);
    }
}
