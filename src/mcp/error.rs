//! Error taxonomy for the connection and credential-bootstrap core.
//!
//! Every failure carries the identity it happened for and the operation that
//! was running. The core never retries on its own; [`SshError::is_retryable`]
//! exists so that callers can make that decision.
//!
//! # Classification Strategy
//!
//! 1. **Authentication and bootstrap failures (NOT retryable)**: credentials
//!    or deployment problems that will not resolve by retrying. Retrying could
//!    also lock accounts out.
//!
//! 2. **Timeouts (retryable)**: the transport was not ready in time.
//!
//! 3. **Transport errors (pattern-matched)**: russh errors are only available
//!    as messages, so they are classified with the same keyword tables the
//!    connection layer has always used. Authentication keywords take
//!    precedence over connection keywords.

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::mcp::bootstrap::BootstrapStage;

/// Errors surfaced by the registry, key store, bootstrap protocol and
/// session operations.
#[derive(Debug, Error)]
pub enum SshError {
    /// Bad or missing password, or a stored key the server rejected.
    #[error("authentication failed for {identity}: {reason}")]
    AuthenticationFailure { identity: String, reason: String },

    /// The transport did not finish handshake and authentication in time.
    #[error("connection to {identity} was not ready within {timeout:?}")]
    ConnectionTimeout { identity: String, timeout: Duration },

    /// A step of the password-to-key upgrade failed.
    #[error("key bootstrap for {identity} failed while {stage}: {source}")]
    BootstrapFailure {
        identity: String,
        stage: BootstrapStage,
        #[source]
        source: Box<SshError>,
    },

    /// No live session is registered for the identity.
    #[error("no active SSH session for {identity}")]
    NotConnected { identity: String },

    /// A shell-based operation exited with a nonzero status.
    #[error("remote command on {identity} exited with status {exit_code}: {stderr}")]
    RemoteCommandFailure {
        identity: String,
        command: String,
        exit_code: i32,
        stderr: String,
    },

    /// A remote command did not complete within the command timeout.
    #[error("command on {identity} timed out after {timeout:?}")]
    CommandTimeout { identity: String, timeout: Duration },

    /// Any key store I/O failure other than "not found".
    #[error("key storage {operation} failed for {identity} at {}: {source}", .path.display())]
    Storage {
        identity: String,
        operation: &'static str,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Failure reported by the SSH transport.
    #[error("SSH {operation} failed for {identity}: {message}")]
    Transport {
        identity: String,
        operation: &'static str,
        message: String,
    },

    /// Key generation or key encoding failed.
    #[error("key generation failed for {identity}: {message}")]
    KeyGeneration { identity: String, message: String },

    /// The identity string could not be parsed.
    #[error("invalid identity '{input}': {reason}")]
    InvalidIdentity { input: String, reason: String },
}

impl SshError {
    /// Whether a caller may reasonably retry the failed operation.
    pub fn is_retryable(&self) -> bool {
        match self {
            SshError::ConnectionTimeout { .. } => true,
            SshError::Transport { message, .. } => is_retryable_error(message),
            _ => false,
        }
    }

    /// Whether this error is an authentication rejection.
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, SshError::AuthenticationFailure { .. })
    }
}

/// Authentication error patterns that indicate permanent failures.
const AUTH_ERRORS: &[&str] = &[
    "authentication failed",
    "permission denied",
    "publickey",
    "auth fail",
    "no authentication",
    "all authentication methods failed",
];

/// Connection error patterns that indicate transient failures.
const RETRYABLE_ERRORS: &[&str] = &[
    "connection refused",
    "connection reset",
    "connection timed out",
    "timeout",
    "network is unreachable",
    "no route to host",
    "host is down",
    "temporary failure",
    "resource temporarily unavailable",
    "handshake failed",
    "failed to connect",
    "broken pipe",
];

/// Classify a transport error message as transient or permanent.
///
/// Authentication keywords are checked first and win. Messages that match
/// neither table are retried unless they look like SSH protocol errors.
pub(crate) fn is_retryable_error(error: &str) -> bool {
    let error_lower = error.to_lowercase();

    if AUTH_ERRORS.iter().any(|pattern| error_lower.contains(pattern)) {
        return false;
    }

    if RETRYABLE_ERRORS
        .iter()
        .any(|pattern| error_lower.contains(pattern))
    {
        return true;
    }

    !error_lower.contains("ssh") || error_lower.contains("connect")
}
