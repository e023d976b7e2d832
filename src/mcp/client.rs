//! russh-backed transport.
//!
//! This module implements the transport capability traits on top of russh:
//!
//! ## Connection Lifecycle
//!
//! 1. **Client Configuration**: Build the russh client configuration with
//!    inactivity timeout, keepalive, and compression settings.
//!
//! 2. **Connection Establishment**: Establish the TCP connection and run the
//!    SSH handshake. The overall ready-timeout is enforced by the registry,
//!    which drops (and thereby closes) attempts that take too long.
//!
//! 3. **Authentication**: Exactly one strategy per attempt, chosen from the
//!    credential: a stored private key or a password.
//!
//! 4. **Command Execution**: Open a session channel per command, collect
//!    stdout, stderr, and the exit status.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use russh::{ChannelMsg, Disconnect, client, keys};
use tracing::{debug, warn};

use crate::mcp::auth::strategy_for;
use crate::mcp::error::SshError;
use crate::mcp::identity::Identity;
use crate::mcp::transport::{Connector, Credential, RemoteShell};
use crate::mcp::types::CommandOutput;

/// Keepalive interval for established connections
const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);

/// Unanswered keepalives before the connection is considered dead
const KEEPALIVE_MAX: usize = 3;

/// Client handler for russh that accepts all host keys.
///
/// This implementation accepts all server public keys without verification,
/// similar to `StrictHostKeyChecking=no` in OpenSSH configuration.
///
/// # Security Note
///
/// In production environments, you should implement proper host key verification
/// against a known_hosts file to prevent man-in-the-middle attacks.
pub struct SshClientHandler;

impl client::Handler for SshClientHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        _server_public_key: &keys::PublicKey,
    ) -> Result<bool, Self::Error> {
        Ok(true)
    }
}

/// Build russh client configuration with the specified settings.
///
/// Creates an `Arc<client::Config>` with:
/// - Inactivity timeout set to the provided `inactivity_timeout`
/// - Keepalive interval of 30 seconds with max 3 keepalives
/// - Compression preference based on `compress` flag (ZLIB if enabled, NONE if disabled)
pub(crate) fn build_client_config(
    inactivity_timeout: Option<Duration>,
    compress: bool,
) -> Arc<client::Config> {
    let compression = if compress {
        (&[russh::compression::ZLIB, russh::compression::NONE][..]).into()
    } else {
        (&[russh::compression::NONE][..]).into()
    };

    let preferred = russh::Preferred {
        compression,
        ..Default::default()
    };

    Arc::new(client::Config {
        inactivity_timeout,
        keepalive_interval: Some(KEEPALIVE_INTERVAL),
        keepalive_max: KEEPALIVE_MAX,
        preferred,
        ..Default::default()
    })
}

/// Host part suitable for socket resolution (IPv6 brackets removed).
fn socket_host(host: &str) -> &str {
    host.strip_prefix('[')
        .and_then(|h| h.strip_suffix(']'))
        .unwrap_or(host)
}

/// Connector establishing russh sessions.
pub struct RusshConnector {
    config: Arc<client::Config>,
    command_timeout: Duration,
}

impl RusshConnector {
    /// # Arguments
    ///
    /// * `command_timeout` - Upper bound for each remote command
    /// * `compress` - Whether to prefer zlib compression
    pub fn new(command_timeout: Duration, compress: bool) -> Self {
        Self {
            config: build_client_config(None, compress),
            command_timeout,
        }
    }
}

#[async_trait]
impl Connector for RusshConnector {
    type Session = RusshSession;

    async fn connect(
        &self,
        identity: &Identity,
        credential: &Credential,
    ) -> Result<RusshSession, SshError> {
        // An unreadable stored key is treated like a rejected one
        let strategy = strategy_for(credential).map_err(|reason| SshError::AuthenticationFailure {
            identity: identity.key(),
            reason,
        })?;

        let mut handle = client::connect(
            self.config.clone(),
            (socket_host(&identity.host), identity.port),
            SshClientHandler,
        )
        .await
        .map_err(|e| SshError::Transport {
            identity: identity.key(),
            operation: "connect",
            message: format!("Failed to connect: {}", e),
        })?;

        debug!(
            "Handshake with {} complete, trying {} authentication",
            identity,
            strategy.method()
        );

        let accepted = match strategy.authenticate(&mut handle, &identity.username).await {
            Ok(accepted) => accepted,
            Err(e) => {
                let _ = handle
                    .disconnect(Disconnect::ByApplication, "", "en")
                    .await;
                return Err(SshError::Transport {
                    identity: identity.key(),
                    operation: "authenticate",
                    message: e.to_string(),
                });
            }
        };

        if !accepted {
            let _ = handle
                .disconnect(Disconnect::ByApplication, "", "en")
                .await;
            return Err(SshError::AuthenticationFailure {
                identity: identity.key(),
                reason: format!("{} authentication rejected", strategy.method()),
            });
        }

        Ok(RusshSession {
            identity: identity.clone(),
            handle: Arc::new(handle),
            command_timeout: self.command_timeout,
        })
    }
}

/// An authenticated russh connection.
pub struct RusshSession {
    identity: Identity,
    handle: Arc<client::Handle<SshClientHandler>>,
    command_timeout: Duration,
}

impl RusshSession {
    /// The raw russh handle, for capabilities beyond command execution.
    pub fn handle(&self) -> Arc<client::Handle<SshClientHandler>> {
        self.handle.clone()
    }

    fn transport_error(&self, operation: &'static str, e: impl std::fmt::Display) -> SshError {
        SshError::Transport {
            identity: self.identity.key(),
            operation,
            message: e.to_string(),
        }
    }
}

#[async_trait]
impl RemoteShell for RusshSession {
    /// Execute a command on a fresh session channel.
    ///
    /// stdout and stderr arrive interleaved on the same channel and are
    /// collected as they come. The call resolves once the remote process has
    /// reported its exit status and the channel is done. A timeout or a
    /// channel that closes without an exit status is an error; partial output
    /// is discarded.
    async fn exec(&self, command: &str) -> Result<CommandOutput, SshError> {
        let mut channel = self
            .handle
            .channel_open_session()
            .await
            .map_err(|e| self.transport_error("open channel", e))?;

        channel
            .exec(true, command)
            .await
            .map_err(|e| self.transport_error("exec", e))?;

        // Pre-allocate buffers to reduce reallocations during output collection
        let mut stdout = Vec::with_capacity(4096);
        let mut stderr = Vec::with_capacity(1024);
        let mut exit_code: Option<u32> = None;

        let collected = tokio::time::timeout(self.command_timeout, async {
            loop {
                match channel.wait().await {
                    Some(ChannelMsg::Data { data }) => {
                        stdout.extend_from_slice(&data);
                    }
                    Some(ChannelMsg::ExtendedData { data, ext }) => {
                        // ext == 1 is stderr in SSH protocol
                        if ext == 1 {
                            stderr.extend_from_slice(&data);
                        }
                    }
                    Some(ChannelMsg::ExitStatus { exit_status }) => {
                        exit_code = Some(exit_status);
                    }
                    Some(ChannelMsg::Eof) => {
                        if exit_code.is_some() {
                            break;
                        }
                    }
                    Some(ChannelMsg::Close) | None => {
                        break;
                    }
                    Some(_) => {}
                }
            }
        })
        .await;

        let _ = channel.close().await;

        if collected.is_err() {
            warn!(
                "Command on {} timed out after {:?}, discarding {} bytes of output",
                self.identity,
                self.command_timeout,
                stdout.len() + stderr.len()
            );
            return Err(SshError::CommandTimeout {
                identity: self.identity.key(),
                timeout: self.command_timeout,
            });
        }

        let exit_code = exit_code.ok_or_else(|| {
            self.transport_error("exec", "channel closed without an exit status")
        })?;

        Ok(CommandOutput {
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
            exit_code: exit_code as i32,
        })
    }

    fn is_alive(&self) -> bool {
        !self.handle.is_closed()
    }

    async fn close(&self) {
        if let Err(e) = self
            .handle
            .disconnect(Disconnect::ByApplication, "Session closed by client", "en")
            .await
        {
            debug!("Error during disconnect from {}: {}", self.identity, e);
        }
    }
}
