//! MCP SSH Commands implementation.
//!
//! This module exposes the connection registry as MCP tools:
//!
//! - `ssh_connect`: Connect with a stored key or a password (bootstrapping a key)
//! - `ssh_execute`: Run a command, optionally in a working directory
//! - `ssh_read_file` / `ssh_write_file`: File contents over the shell
//! - `ssh_list_directory` / `ssh_stat` / `ssh_exists`: Path inspection
//! - `ssh_disconnect`: Close a session
//! - `ssh_list_sessions`: List registered sessions
//! - `ssh_forget_key`: Delete the stored key for an identity
//!
//! Errors are converted to `String` at this boundary. `ssh_connect` is the
//! only place that retries, and only for transient failures.

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use backon::{ExponentialBuilder, Retryable};
use poem_mcpserver::{Tools, content::Text, tool::StructuredContent};
use tracing::{error, info, warn};

use super::client::RusshConnector;
use super::config::{MAX_RETRY_DELAY_SECS, RegistryConfig};
use super::error::SshError;
use super::identity::{DEFAULT_SSH_PORT, Identity};
use super::keys::FileKeyStore;
use super::operations::SessionOperations;
use super::registry::{Connected, ConnectionRegistry};
use super::transport::Connector;
use super::types::{
    CommandOutput, DirectoryListingResponse, ExistsResponse, FileContentResponse, FileStat,
    SessionListResponse, SshConnectResponse,
};

/// Connect retry settings for the tool layer.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub min_delay: Duration,
}

impl RetryPolicy {
    fn backoff(&self) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(self.min_delay)
            .with_max_delay(Duration::from_secs(MAX_RETRY_DELAY_SECS))
            .with_max_times(self.max_retries as usize)
            .with_jitter()
    }
}

/// Connect through the registry, retrying transient failures with backoff.
///
/// Authentication and bootstrap failures are returned immediately. Returns
/// the connection and the number of retries it took.
pub async fn connect_with_retry<C: Connector>(
    registry: &ConnectionRegistry<C>,
    identity: &Identity,
    password: Option<&str>,
    policy: RetryPolicy,
) -> Result<(Connected<C::Session>, u32), SshError> {
    let attempt_counter = AtomicU32::new(0);

    let result = (|| async {
        let current_attempt = attempt_counter.fetch_add(1, Ordering::SeqCst);
        if current_attempt > 0 {
            warn!("SSH connection retry attempt {} to {}", current_attempt, identity);
        }
        registry.connect(identity, password).await
    })
    .retry(policy.backoff())
    .when(|e: &SshError| {
        let retryable = e.is_retryable();
        if !retryable {
            warn!(
                "SSH connection to {} failed with non-retryable error: {}",
                identity, e
            );
        }
        retryable
    })
    .notify(|err: &SshError, dur: Duration| {
        warn!("SSH connection failed: {}. Retrying in {:?}", err, dur);
    })
    .await;

    let total_attempts = attempt_counter.load(Ordering::SeqCst);
    let retry_count = total_attempts.saturating_sub(1);

    match result {
        Ok(connected) => {
            if retry_count > 0 {
                info!(
                    "SSH connection to {} succeeded after {} retry attempt(s)",
                    identity, retry_count
                );
            }
            Ok((connected, retry_count))
        }
        Err(e) => {
            error!(
                "SSH connection to {} failed after {} attempt(s). Last error: {}",
                identity, total_attempts, e
            );
            Err(e)
        }
    }
}

fn parse_session_key(session_key: &str) -> Result<Identity, String> {
    session_key.parse::<Identity>().map_err(|e| e.to_string())
}

/// MCP SSH Commands tool implementation.
///
/// Owns the connection registry; every tool call goes through it.
pub struct McpSSHCommands {
    registry: Arc<ConnectionRegistry<RusshConnector>>,
    retry: RetryPolicy,
}

impl McpSSHCommands {
    pub fn new(registry: Arc<ConnectionRegistry<RusshConnector>>, retry: RetryPolicy) -> Self {
        Self { registry, retry }
    }

    /// Build the russh-backed registry and file key store from `config`.
    pub fn from_config(config: &RegistryConfig) -> Self {
        let key_store = Arc::new(FileKeyStore::new(&config.home_dir, &config.key_label));
        info!("Key store at {}", key_store.keys_dir().display());
        let connector = RusshConnector::new(config.command_timeout, config.compression);
        let registry = Arc::new(ConnectionRegistry::new(
            connector,
            key_store,
            config.ready_timeout,
        ));
        Self::new(
            registry,
            RetryPolicy {
                max_retries: config.max_retries,
                min_delay: config.retry_delay,
            },
        )
    }

    /// Shared handle to the registry, for shutdown.
    pub fn registry(&self) -> Arc<ConnectionRegistry<RusshConnector>> {
        self.registry.clone()
    }
}

#[Tools]
impl McpSSHCommands {
    /// Connect to an SSH server.
    ///
    /// The first connection to an account needs a password: after logging in,
    /// a dedicated ED25519 key is installed in the remote authorized_keys and
    /// stored locally. Later connections use that key and need no password.
    /// Returns a session_key (`user@host:port`) for the other tools.
    async fn ssh_connect(
        &self,
        /// SSH username
        username: String,
        /// Host name or IP address (IPv6 in brackets, e.g. "[::1]")
        host: String,
        /// SSH port (default: 22)
        port: Option<u16>,
        /// Password; required only when no working key is stored yet
        password: Option<String>,
    ) -> Result<StructuredContent<SshConnectResponse>, String> {
        let identity = Identity::new(username, host, port.unwrap_or(DEFAULT_SSH_PORT));
        info!(
            "Attempting SSH connection to {} (password supplied: {}, max_retries={})",
            identity,
            password.is_some(),
            self.retry.max_retries
        );

        let (connected, retry_attempts) =
            connect_with_retry(self.registry.as_ref(), &identity, password.as_deref(), self.retry)
                .await
                .map_err(|e| e.to_string())?;

        let session_key = connected.session.key();
        let auth_method = connected.session.auth_method();
        let message = if connected.reused {
            format!("Reused existing session for {}.", session_key)
        } else {
            let retry_part = if retry_attempts > 0 {
                format!(" after {} retry attempt(s)", retry_attempts)
            } else {
                String::new()
            };
            format!(
                "Connected to {} using {} authentication{}. Use session_key '{}' with ssh_execute to run commands.",
                session_key, auth_method, retry_part, session_key
            )
        };

        Ok(StructuredContent(SshConnectResponse {
            session_key,
            message,
            auth_method,
            reused: connected.reused,
            retry_attempts,
        }))
    }

    /// Execute a command and wait for it to finish.
    ///
    /// Returns stdout, stderr and the exit code. A nonzero exit code is
    /// reported in the result, not as an error.
    async fn ssh_execute(
        &self,
        /// Session key returned by ssh_connect
        session_key: String,
        /// Command to execute
        command: String,
        /// Directory to run the command in (optional)
        working_directory: Option<String>,
    ) -> Result<StructuredContent<CommandOutput>, String> {
        let identity = parse_session_key(&session_key)?;
        let output = SessionOperations::new(self.registry.as_ref(), &identity)
            .execute(&command, working_directory.as_deref())
            .await
            .map_err(|e| e.to_string())?;
        Ok(StructuredContent(output))
    }

    /// Read a remote text file.
    async fn ssh_read_file(
        &self,
        /// Session key returned by ssh_connect
        session_key: String,
        /// Remote file path
        path: String,
    ) -> Result<StructuredContent<FileContentResponse>, String> {
        let identity = parse_session_key(&session_key)?;
        let content = SessionOperations::new(self.registry.as_ref(), &identity)
            .read_file(&path)
            .await
            .map_err(|e| e.to_string())?;
        Ok(StructuredContent(FileContentResponse { path, content }))
    }

    /// Write a remote text file, creating parent directories as needed.
    async fn ssh_write_file(
        &self,
        /// Session key returned by ssh_connect
        session_key: String,
        /// Remote file path
        path: String,
        /// Full new content of the file
        content: String,
    ) -> Result<Text<String>, String> {
        let identity = parse_session_key(&session_key)?;
        SessionOperations::new(self.registry.as_ref(), &identity)
            .write_file(&path, &content)
            .await
            .map_err(|e| e.to_string())?;
        Ok(Text(format!("Wrote {} bytes to {}", content.len(), path)))
    }

    /// List a remote directory, hidden entries included.
    async fn ssh_list_directory(
        &self,
        /// Session key returned by ssh_connect
        session_key: String,
        /// Remote directory path
        path: String,
    ) -> Result<StructuredContent<DirectoryListingResponse>, String> {
        let identity = parse_session_key(&session_key)?;
        let entries = SessionOperations::new(self.registry.as_ref(), &identity)
            .list_directory(&path)
            .await
            .map_err(|e| e.to_string())?;
        Ok(StructuredContent(DirectoryListingResponse {
            path,
            count: entries.len(),
            entries,
        }))
    }

    /// Type, size, permissions and modification time of a remote path.
    async fn ssh_stat(
        &self,
        /// Session key returned by ssh_connect
        session_key: String,
        /// Remote path
        path: String,
    ) -> Result<StructuredContent<FileStat>, String> {
        let identity = parse_session_key(&session_key)?;
        let stat = SessionOperations::new(self.registry.as_ref(), &identity)
            .stat(&path)
            .await
            .map_err(|e| e.to_string())?;
        Ok(StructuredContent(stat))
    }

    /// Check whether a remote path exists.
    async fn ssh_exists(
        &self,
        /// Session key returned by ssh_connect
        session_key: String,
        /// Remote path
        path: String,
    ) -> Result<StructuredContent<ExistsResponse>, String> {
        let identity = parse_session_key(&session_key)?;
        let exists = SessionOperations::new(self.registry.as_ref(), &identity)
            .exists(&path)
            .await
            .map_err(|e| e.to_string())?;
        Ok(StructuredContent(ExistsResponse { path, exists }))
    }

    /// Disconnect an SSH session. The stored key is kept.
    async fn ssh_disconnect(
        &self,
        /// Session key returned by ssh_connect
        session_key: String,
    ) -> Result<Text<String>, String> {
        let identity = parse_session_key(&session_key)?;
        if self.registry.disconnect(&identity).await {
            Ok(Text(format!("Session {} disconnected successfully", identity)))
        } else {
            Ok(Text(format!("No active session for {}", identity)))
        }
    }

    /// List registered SSH sessions with their metadata.
    async fn ssh_list_sessions(&self) -> StructuredContent<SessionListResponse> {
        let sessions = self.registry.list_sessions();
        StructuredContent(SessionListResponse {
            count: sessions.len(),
            sessions,
        })
    }

    /// Delete the locally stored key for an account.
    ///
    /// The next connection will need a password again. The public key stays
    /// in the remote authorized_keys; an open session stays open.
    async fn ssh_forget_key(
        &self,
        /// Session key (`user@host:port`) of the account
        session_key: String,
    ) -> Result<Text<String>, String> {
        let identity = parse_session_key(&session_key)?;
        self.registry
            .forget_key(&identity)
            .await
            .map_err(|e| e.to_string())?;
        Ok(Text(format!("Stored key for {} deleted", identity)))
    }
}
