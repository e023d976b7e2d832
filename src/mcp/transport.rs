//! Transport capability traits.
//!
//! The registry and the bootstrap protocol never talk to russh directly.
//! They depend on two small capabilities:
//!
//! - [`Connector`]: performs handshake and authentication for an identity
//! - [`RemoteShell`]: runs a command on an authenticated transport
//!
//! The russh-backed implementations live in `client`; tests substitute
//! local fakes.

use std::fmt;

use async_trait::async_trait;

use crate::mcp::error::SshError;
use crate::mcp::identity::Identity;
use crate::mcp::types::{AuthMethod, CommandOutput};

/// Credential presented for one authentication attempt.
#[derive(Clone)]
pub enum Credential {
    /// Caller-supplied password
    Password(String),
    /// PKCS#8 PEM private key loaded from the key store
    PrivateKey(String),
}

impl Credential {
    /// The authentication method this credential uses.
    pub fn method(&self) -> AuthMethod {
        match self {
            Credential::Password(_) => AuthMethod::Password,
            Credential::PrivateKey(_) => AuthMethod::Key,
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credential::Password(_) => f.write_str("Password(<redacted>)"),
            Credential::PrivateKey(_) => f.write_str("PrivateKey(<redacted>)"),
        }
    }
}

/// An authenticated transport able to run remote commands.
#[async_trait]
pub trait RemoteShell: Send + Sync {
    /// Run `command` and collect its full output.
    ///
    /// All-or-nothing: either the complete stdout, stderr and exit status of
    /// a finished process, or an error. Nonzero exit status is not an error
    /// at this level.
    async fn exec(&self, command: &str) -> Result<CommandOutput, SshError>;

    /// Best-effort, non-blocking liveness flag.
    ///
    /// `false` means the transport is known to be closed. `true` does not
    /// prove the peer is responsive; only a command round trip does.
    fn is_alive(&self) -> bool;

    /// Close the transport. Closing twice is harmless.
    async fn close(&self);
}

/// Establishes authenticated transports.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Transport type produced by this connector.
    type Session: RemoteShell + 'static;

    /// Connect to `identity` and authenticate with `credential`.
    ///
    /// # Returns
    ///
    /// * `Ok(session)` - Handshake and authentication succeeded
    /// * `Err(SshError::AuthenticationFailure)` - The server rejected the credential
    /// * `Err(_)` - Transport-level failure
    async fn connect(
        &self,
        identity: &Identity,
        credential: &Credential,
    ) -> Result<Self::Session, SshError>;
}
