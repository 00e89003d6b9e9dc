//! Domain-specific error types for ul-nzb
//!
//! This module provides structured error handling with proper error chains
//! and context preservation. Every error can be reduced to an [`ErrorClass`],
//! which is what the retry policy looks at.

use std::path::PathBuf;
use thiserror::Error;

use crate::nntp::ResponseCategory;

/// Top-level error type for the ul-nzb application
#[derive(Error, Debug)]
pub enum UlNzbError {
    #[error("NNTP error: {0}")]
    Nntp(#[from] NntpError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Upload error: {0}")]
    Upload(#[from] UploadError),

    #[error("NZB error: {0}")]
    Nzb(#[from] NzbError),

    #[error("yEnc error: {0}")]
    Yenc(#[from] YencError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TLS error: {0}")]
    NativeTls(#[from] native_tls::Error),
}

/// NNTP protocol and connection errors
#[derive(Error, Debug)]
pub enum NntpError {
    #[error("Connection failed to {server}:{port}: {source}")]
    ConnectionFailed {
        server: String,
        port: u16,
        source: std::io::Error,
    },

    #[error("Connection timeout after {seconds}s")]
    Timeout { seconds: u64 },

    #[error("TLS handshake failed: {0}")]
    TlsError(String),

    #[error("Connection closed by server")]
    ConnectionClosed,

    #[error("Authentication failed: {0}")]
    AuthFailed(String),

    #[error("Server requires authentication but no credentials are configured")]
    AuthRequired,

    #[error("Authentication method '{0}' is not implemented")]
    AuthNotImplemented(String),

    #[error("Protocol error: {0}")]
    ProtocolError(String),

    #[error("Server response error: {code} {message}")]
    ServerError {
        code: u16,
        message: String,
        category: ResponseCategory,
    },

    #[error("Connection unhealthy")]
    UnhealthyConnection,
}

/// Configuration validation errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    NotFound(PathBuf),

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("Invalid configuration: {field}: {reason}")]
    Invalid { field: String, reason: String },

    #[error("Server not configured")]
    NoServer,

    #[error("Username and password must be configured together")]
    IncompleteCredentials,

    #[error("No newsgroups configured")]
    NoGroups,

    #[error("Poster address (from) not configured")]
    NoFrom,

    #[error("Invalid connection count: {count} (must be 1-100)")]
    InvalidConnections { count: u16 },

    #[error("Unknown authentication method: {0}")]
    UnknownAuthMethod(String),

    #[error("Invalid path: {path}: {reason}")]
    InvalidPath { path: PathBuf, reason: String },
}

/// Upload pipeline errors
#[derive(Error, Debug)]
pub enum UploadError {
    #[error("Upload list is empty, check the file or directory names")]
    EmptyUploadList,

    #[error("More than one file is named {name}, their NZBs would overwrite each other")]
    DuplicateName { name: String },

    #[error("Failed to read {path}: {source}")]
    ReadError {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to post chunk {chunk} of {filename}: {reason}")]
    ChunkFailed {
        filename: String,
        chunk: u32,
        reason: String,
    },

    #[error("Upload finished with {remaining} article(s) not posted")]
    Incomplete { remaining: u64 },

    #[error("Upload cancelled")]
    Cancelled,

    #[error("Worker task failed: {0}")]
    WorkerPanicked(String),
}

/// NZB reading and writing errors
#[derive(Error, Debug)]
pub enum NzbError {
    #[error("Failed to parse NZB file: {0}")]
    ParseError(String),

    #[error("NZB file not found: {0}")]
    NotFound(PathBuf),

    #[error("Failed to write NZB {path}: {source}")]
    WriteError {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// yEnc stream errors (decode path only)
#[derive(Error, Debug, PartialEq, Eq)]
pub enum YencError {
    #[error("Escape character at end of stream")]
    TrailingEscape,
}

/// Failure taxonomy used to decide between retrying and aborting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Connect, TLS, read or write failures
    Transport,
    /// Credentials rejected or mechanism unavailable
    Authentication,
    /// Malformed or unexpected reply
    Protocol,
    /// 437/440/441 and unknown 4xx/5xx replies to POST
    PostingTransient,
    /// 411 and 500/501/502
    PostingFatal,
    /// Malformed yEnc stream
    Format,
    /// Local configuration, filesystem or cancellation
    Local,
}

impl ErrorClass {
    /// Whether an error of this class may be retried at the point of failure
    pub fn is_transient(self) -> bool {
        matches!(
            self,
            ErrorClass::Transport | ErrorClass::Protocol | ErrorClass::PostingTransient
        )
    }
}

impl NntpError {
    pub fn class(&self) -> ErrorClass {
        match self {
            NntpError::ConnectionFailed { .. }
            | NntpError::Timeout { .. }
            | NntpError::TlsError(_)
            | NntpError::ConnectionClosed
            | NntpError::UnhealthyConnection => ErrorClass::Transport,
            NntpError::AuthFailed(_)
            | NntpError::AuthRequired
            | NntpError::AuthNotImplemented(_) => ErrorClass::Authentication,
            NntpError::ProtocolError(_) => ErrorClass::Protocol,
            NntpError::ServerError { category, .. } => category.class(),
        }
    }
}

impl UlNzbError {
    pub fn class(&self) -> ErrorClass {
        match self {
            UlNzbError::Nntp(e) => e.class(),
            UlNzbError::Io(_) => ErrorClass::Transport,
            UlNzbError::NativeTls(_) => ErrorClass::Transport,
            UlNzbError::Yenc(_) => ErrorClass::Format,
            UlNzbError::Config(_) | UlNzbError::Upload(_) | UlNzbError::Nzb(_) => {
                ErrorClass::Local
            }
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, UlNzbError::Upload(UploadError::Cancelled))
    }
}

/// Result type alias using UlNzbError
pub type Result<T> = std::result::Result<T, UlNzbError>;

/// Helper trait for adding context to errors
pub trait ErrorContext<T> {
    fn context(self, msg: impl Into<String>) -> Result<T>;
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T, E> ErrorContext<T> for std::result::Result<T, E>
where
    E: Into<UlNzbError>,
{
    fn context(self, msg: impl Into<String>) -> Result<T> {
        self.map_err(|e| {
            let error: UlNzbError = e.into();
            tracing::error!("{}: {}", msg.into(), error);
            error
        })
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| {
            let error: UlNzbError = e.into();
            tracing::error!("{}: {}", f(), error);
            error
        })
    }
}
