//! Error types for the connection pool and the FTP service

use std::time::Duration;
use thiserror::Error;

/// Boxed error used where the pool carries a manager's own error type
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Error, Debug)]
pub enum PoolError {
    #[error("Too many waiting acquirers (limit {limit})")]
    TooManyWaiters { limit: usize },

    #[error("Acquire timed out after {0:?}")]
    Timeout(Duration),

    #[error("Pool is draining or closed")]
    Closed,

    #[error("Failed to create a pooled connection")]
    Create(#[source] BoxError),

    #[error("Failed to destroy a pooled connection")]
    Destroy(#[source] BoxError),

    #[error("Connection {id} was not issued by this pool")]
    ForeignHandle { id: usize },

    #[error("Invalid pool configuration: {0}")]
    InvalidConfiguration(String),
}

pub type PoolResult<T> = Result<T, PoolError>;

/// Failure reported by the underlying file-transfer session
#[derive(Error, Debug)]
pub enum TransferError {
    #[error("Connection is closed")]
    Closed,

    #[error("No such file or directory: {0}")]
    NotFound(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("Server rejected the command ({code}): {message}")]
    Rejected { code: u16, message: String },
}

/// Stable classification of an [`FtpError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Connect,
    Disconnect,
    Release,
    Transfer,
    Exhausted,
    List,
    Get,
    Put,
    Delete,
}

impl ErrorKind {
    /// Error code, as found in logs
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::Connect => "E_FTP_CONNECT",
            ErrorKind::Disconnect => "E_FTP_DISCONNECT",
            ErrorKind::Release => "E_FTP_RELEASE",
            ErrorKind::Transfer => "E_FTP_TRANSFER",
            ErrorKind::Exhausted => "E_FTP_WORK",
            ErrorKind::List => "E_FTP_LIST",
            ErrorKind::Get => "E_FTP_GET",
            ErrorKind::Put => "E_FTP_PUT",
            ErrorKind::Delete => "E_FTP_DELETE",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

/// Domain error surfaced by the FTP service
///
/// Every variant is tagged with the remote host; the operation variants also
/// carry the full remote path that was targeted.
#[derive(Error, Debug)]
pub enum FtpError {
    #[error("E_FTP_CONNECT: could not connect to {host}")]
    Connect {
        host: String,
        #[source]
        source: BoxError,
    },

    #[error("E_FTP_DISCONNECT: could not disconnect from {host}")]
    Disconnect {
        host: String,
        #[source]
        source: TransferError,
    },

    #[error("E_FTP_RELEASE: could not release a connection to {host}")]
    Release {
        host: String,
        #[source]
        source: PoolError,
    },

    #[error("E_FTP_TRANSFER: command failed on {host}")]
    Transfer {
        host: String,
        #[source]
        source: TransferError,
    },

    #[error("E_FTP_WORK: gave up on {host} after {attempts} attempt(s)")]
    Exhausted {
        host: String,
        attempts: usize,
        #[source]
        source: Box<FtpError>,
    },

    #[error("E_FTP_LIST: could not list {path} on {host}")]
    List {
        host: String,
        path: String,
        #[source]
        source: Box<FtpError>,
    },

    #[error("E_FTP_GET: could not retrieve {path} from {host}")]
    Get {
        host: String,
        path: String,
        #[source]
        source: Box<FtpError>,
    },

    #[error("E_FTP_PUT: could not send {path} to {host}")]
    Put {
        host: String,
        path: String,
        #[source]
        source: Box<FtpError>,
    },

    #[error("E_FTP_DELETE: could not delete {path} on {host}")]
    Delete {
        host: String,
        path: String,
        #[source]
        source: Box<FtpError>,
    },
}

impl FtpError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            FtpError::Connect { .. } => ErrorKind::Connect,
            FtpError::Disconnect { .. } => ErrorKind::Disconnect,
            FtpError::Release { .. } => ErrorKind::Release,
            FtpError::Transfer { .. } => ErrorKind::Transfer,
            FtpError::Exhausted { .. } => ErrorKind::Exhausted,
            FtpError::List { .. } => ErrorKind::List,
            FtpError::Get { .. } => ErrorKind::Get,
            FtpError::Put { .. } => ErrorKind::Put,
            FtpError::Delete { .. } => ErrorKind::Delete,
        }
    }

    pub fn host(&self) -> &str {
        match self {
            FtpError::Connect { host, .. }
            | FtpError::Disconnect { host, .. }
            | FtpError::Release { host, .. }
            | FtpError::Transfer { host, .. }
            | FtpError::Exhausted { host, .. }
            | FtpError::List { host, .. }
            | FtpError::Get { host, .. }
            | FtpError::Put { host, .. }
            | FtpError::Delete { host, .. } => host,
        }
    }

    /// Remote path, for operation-level errors
    pub fn path(&self) -> Option<&str> {
        match self {
            FtpError::List { path, .. }
            | FtpError::Get { path, .. }
            | FtpError::Put { path, .. }
            | FtpError::Delete { path, .. } => Some(path),
            _ => None,
        }
    }

    /// The error one level down, when it is itself an `FtpError`
    pub fn inner(&self) -> Option<&FtpError> {
        match self {
            FtpError::Exhausted { source, .. }
            | FtpError::List { source, .. }
            | FtpError::Get { source, .. }
            | FtpError::Put { source, .. }
            | FtpError::Delete { source, .. } => Some(source),
            _ => None,
        }
    }

    /// Number of attempts made before giving up, if this chain went through the retry engine
    pub fn attempts(&self) -> Option<usize> {
        match self {
            FtpError::Exhausted { attempts, .. } => Some(*attempts),
            other => other.inner().and_then(FtpError::attempts),
        }
    }
}

pub type FtpResult<T> = Result<T, FtpError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_codes() {
        assert_eq!(ErrorKind::Exhausted.code(), "E_FTP_WORK");
        assert_eq!(ErrorKind::Delete.to_string(), "E_FTP_DELETE");
    }

    #[test]
    fn test_operation_error_context() {
        let err = FtpError::Get {
            host: "ftp.example.com".to_string(),
            path: "/in/report.csv".to_string(),
            source: Box::new(FtpError::Exhausted {
                host: "ftp.example.com".to_string(),
                attempts: 3,
                source: Box::new(FtpError::Transfer {
                    host: "ftp.example.com".to_string(),
                    source: TransferError::NotFound("/in/report.csv".to_string()),
                }),
            }),
        };

        assert_eq!(err.kind(), ErrorKind::Get);
        assert_eq!(err.host(), "ftp.example.com");
        assert_eq!(err.path(), Some("/in/report.csv"));
        assert_eq!(err.attempts(), Some(3));
        assert_eq!(err.inner().unwrap().inner().unwrap().kind(), ErrorKind::Transfer);
        assert!(err.to_string().contains("/in/report.csv"));
    }
}
