//! Registered SSH sessions.
//!
//! A [`Session`] wraps one authenticated transport together with the
//! metadata the registry reports about it. Sessions are owned by the
//! registry and shared out as `Arc<Session<_>>`; the transport inside is
//! never cloned.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::mcp::identity::Identity;
use crate::mcp::transport::RemoteShell;
use crate::mcp::types::{AuthMethod, SessionInfo};

/// One authenticated transport for an identity.
pub struct Session<S> {
    identity: Identity,
    transport: Arc<S>,
    auth_method: AuthMethod,
    connected_at: DateTime<Utc>,
}

impl<S: RemoteShell> Session<S> {
    pub(crate) fn new(identity: Identity, transport: S, auth_method: AuthMethod) -> Self {
        Self {
            identity,
            transport: Arc::new(transport),
            auth_method,
            connected_at: Utc::now(),
        }
    }

    /// Canonical `user@host:port` key.
    pub fn key(&self) -> String {
        self.identity.key()
    }

    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// The raw transport.
    pub fn transport(&self) -> Arc<S> {
        self.transport.clone()
    }

    pub fn auth_method(&self) -> AuthMethod {
        self.auth_method
    }

    pub fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }

    /// Best-effort liveness; see [`RemoteShell::is_alive`].
    pub fn is_alive(&self) -> bool {
        self.transport.is_alive()
    }

    /// Serializable snapshot of this session.
    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            session_key: self.key(),
            username: self.identity.username.clone(),
            host: self.identity.host.clone(),
            port: self.identity.port,
            auth_method: self.auth_method,
            connected_at: self.connected_at.to_rfc3339(),
            alive: self.is_alive(),
        }
    }
}
