//! Error taxonomy for transport, session, pool, and executor failures.
//!
//! Every variant here corresponds to one of the sentinel error kinds a
//! caller needs to branch on (`ErrDial`, `ErrAuthFailed`, ... in the
//! design). Wrapping with `#[error(...)]` preserves the originating
//! message while keeping the variant identity intact for `matches!`.

use thiserror::Error;

/// Errors surfaced by the transport, session, pool, executor, and cache
/// layers of this crate.
#[derive(Error, Debug)]
pub enum ClientError {
    /// TCP connect or SSH handshake failed before authentication.
    #[error("dial failed: {0}")]
    Dial(String),

    /// Authentication was rejected by the server.
    #[error("authentication failed: {0}")]
    AuthFailed(String),

    /// The presented host key did not match the configured pin.
    #[error("host key mismatch: {0}")]
    HostKeyMismatch(String),

    /// No prompt was seen within the read budget.
    #[error("no prompt observed: {0}")]
    Prompt(String),

    /// A deadline or cancellation fired while waiting on I/O.
    #[error("timed out: {0}")]
    Timeout(String),

    /// The device returned a recognized error marker in its output.
    #[error("command failed: {0}")]
    CommandFailed(String),

    /// An external parser rejected bytes this crate delivered.
    #[error("parse failed: {0}")]
    Parse(String),

    /// A helper demoted a "not found" device error to absence.
    #[error("not found: {0}")]
    NotFound(String),

    /// The pool has been closed and accepts no further acquisitions.
    #[error("pool closed")]
    PoolClosed,

    /// `Acquire` could not obtain a handle before its timeout elapsed.
    #[error("pool exhausted: no session available within {0:?}")]
    PoolExhausted(std::time::Duration),

    /// The caller's context/future was cancelled.
    #[error("cancelled: {0}")]
    Cancelled(String),

    /// Underlying SSH protocol error, wrapped with context.
    #[error("ssh error: {0}")]
    Ssh(#[from] russh::Error),

    /// Underlying SSH key-loading error.
    #[error("ssh key error: {0}")]
    SshKeys(#[from] russh::keys::Error),

    /// Underlying SFTP protocol error.
    #[error("sftp error: {0}")]
    Sftp(#[from] russh_sftp::client::error::Error),

    /// Underlying I/O error (channel stream, key file read, etc).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Config deserialization failed.
    #[error("config error: {0}")]
    Config(#[from] serde_json::Error),

    /// A bare internal-invariant violation that should never happen in
    /// practice but still needs a typed path instead of a panic.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ClientError {
    /// Wraps an existing error with additional context, preserving the
    /// variant for callers that match on it with [`ClientError::is_retryable`]
    /// or similar, by re-rendering as a contextualized [`ClientError::Internal`]
    /// only when no more specific variant applies.
    pub fn context(self, msg: impl Into<String>) -> Self {
        let msg = msg.into();
        match self {
            ClientError::Dial(inner) => ClientError::Dial(format!("{msg}: {inner}")),
            ClientError::AuthFailed(inner) => ClientError::AuthFailed(format!("{msg}: {inner}")),
            ClientError::HostKeyMismatch(inner) => {
                ClientError::HostKeyMismatch(format!("{msg}: {inner}"))
            }
            ClientError::Prompt(inner) => ClientError::Prompt(format!("{msg}: {inner}")),
            ClientError::Timeout(inner) => ClientError::Timeout(format!("{msg}: {inner}")),
            ClientError::CommandFailed(inner) => {
                ClientError::CommandFailed(format!("{msg}: {inner}"))
            }
            other => ClientError::Internal(format!("{msg}: {other}")),
        }
    }

    /// Classifies whether this error is worth retrying per the retry
    /// strategy's policy: explicit timeouts always are; everything else
    /// defers to the strategy's own wrapper classification.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ClientError::Timeout(_) | ClientError::Prompt(_))
    }
}
