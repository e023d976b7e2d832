//! Remote account identity.
//!
//! An [`Identity`] is the `(username, host, port)` triple that keys both the
//! session registry and the local key store. Its canonical string form is
//! `user@host:port`, which is also the session key handed to MCP clients.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::mcp::error::SshError;

/// Default SSH port used when an identity string omits one.
pub const DEFAULT_SSH_PORT: u16 = 22;

/// A remote account on a specific SSH endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identity {
    pub username: String,
    pub host: String,
    pub port: u16,
}

impl Identity {
    /// A bare IPv6 literal host is stored bracketed (`[fe80::1]`) so that the
    /// canonical string parses back to the same identity.
    pub fn new(username: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            username: username.into(),
            host: bracket_ipv6(host.into()),
            port,
        }
    }

    /// Canonical `user@host:port` form.
    pub fn key(&self) -> String {
        self.to_string()
    }
}

fn bracket_ipv6(host: String) -> String {
    if host.contains(':') && !host.starts_with('[') {
        format!("[{}]", host)
    } else {
        host
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}:{}", self.username, self.host, self.port)
    }
}

impl FromStr for Identity {
    type Err = SshError;

    /// Parse `user@host:port` or `user@host`.
    ///
    /// The host/user split happens at the last `@` and the port split at the
    /// last `:`, so bracketed IPv6 hosts (`user@[::1]:22`) parse correctly.
    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let invalid = |reason: &str| SshError::InvalidIdentity {
            input: input.to_string(),
            reason: reason.to_string(),
        };

        let (username, endpoint) = input
            .rsplit_once('@')
            .ok_or_else(|| invalid("expected user@host[:port]"))?;
        if username.is_empty() {
            return Err(invalid("empty username"));
        }

        let (host, port) = match endpoint.rsplit_once(':') {
            // A colon inside an unbracketed IPv6 literal is not a port separator
            Some((host, port)) if !host.contains(':') || host.ends_with(']') => {
                let port = port
                    .parse::<u16>()
                    .map_err(|e| invalid(&format!("invalid port number: {}", e)))?;
                (host, port)
            }
            _ => (endpoint, DEFAULT_SSH_PORT),
        };
        if host.is_empty() {
            return Err(invalid("empty host"));
        }

        Ok(Identity::new(username, host, port))
    }
}
