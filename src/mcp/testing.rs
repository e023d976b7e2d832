//! Local stand-ins for the transport and the key store.
//!
//! - [`LocalShell`]: runs commands through `sh -c` with `HOME` pointing at a
//!   temporary directory that plays the remote account
//! - [`FakeConnector`]: accepts one password, and accepts a private key only
//!   if its public half is listed in the fake home's `authorized_keys`
//! - [`MemoryKeyStore`]: keeps private keys in memory

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::process::Command;

use crate::mcp::error::SshError;
use crate::mcp::identity::Identity;
use crate::mcp::keys::{KeyPair, KeyStore, public_key_body};
use crate::mcp::transport::{Connector, Credential, RemoteShell};
use crate::mcp::types::CommandOutput;

#[derive(Default)]
struct ShellStats {
    commands: AtomicUsize,
    closed: AtomicUsize,
}

/// A "remote" shell running on the local machine.
pub struct LocalShell {
    home: Arc<tempfile::TempDir>,
    alive: AtomicBool,
    stats: Arc<ShellStats>,
}

impl LocalShell {
    /// A shell with a fresh, empty home directory.
    pub fn new() -> Self {
        let home = tempfile::tempdir().expect("create temp home");
        Self::with_home(Arc::new(home), Arc::default())
    }

    fn with_home(home: Arc<tempfile::TempDir>, stats: Arc<ShellStats>) -> Self {
        Self {
            home,
            alive: AtomicBool::new(true),
            stats,
        }
    }

    pub fn home(&self) -> &Path {
        self.home.path()
    }
}

#[async_trait]
impl RemoteShell for LocalShell {
    async fn exec(&self, command: &str) -> Result<CommandOutput, SshError> {
        self.stats.commands.fetch_add(1, Ordering::SeqCst);
        let output = Command::new("sh")
            .arg("-c")
            .arg(command)
            .env("HOME", self.home.path())
            .current_dir(self.home.path())
            .output()
            .await
            .map_err(|e| SshError::Transport {
                identity: "local".to_string(),
                operation: "exec",
                message: e.to_string(),
            })?;

        Ok(CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            exit_code: output.status.code().unwrap_or(-1),
        })
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    async fn close(&self) {
        if self.alive.swap(false, Ordering::SeqCst) {
            self.stats.closed.fetch_add(1, Ordering::SeqCst);
        }
    }
}

/// Connector whose "server" is a shared temporary home directory.
pub struct FakeConnector {
    home: Arc<tempfile::TempDir>,
    password: String,
    delay: Option<Duration>,
    connects: AtomicUsize,
    password_attempts: AtomicUsize,
    stats: Arc<ShellStats>,
}

impl FakeConnector {
    /// A server accepting `password` for every user.
    pub fn new(password: &str) -> Self {
        Self {
            home: Arc::new(tempfile::tempdir().expect("create temp home")),
            password: password.to_string(),
            delay: None,
            connects: AtomicUsize::new(0),
            password_attempts: AtomicUsize::new(0),
            stats: Arc::default(),
        }
    }

    /// Delay every handshake by `delay`.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn home(&self) -> &Path {
        self.home.path()
    }

    pub fn authorized_keys_path(&self) -> PathBuf {
        self.home.path().join(".ssh").join("authorized_keys")
    }

    /// Current content of the fake `authorized_keys`, empty if absent.
    pub fn authorized_keys(&self) -> String {
        std::fs::read_to_string(self.authorized_keys_path()).unwrap_or_default()
    }

    /// Connection attempts that reached the fake server.
    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn password_attempts(&self) -> usize {
        self.password_attempts.load(Ordering::SeqCst)
    }

    /// Commands run across every session this connector produced.
    pub fn commands_run(&self) -> usize {
        self.stats.commands.load(Ordering::SeqCst)
    }

    pub fn closed_sessions(&self) -> usize {
        self.stats.closed.load(Ordering::SeqCst)
    }

    fn key_is_authorized(&self, identity: &Identity, pem: &str) -> bool {
        let Ok(pair) = KeyPair::from_private_pem(identity, pem, "") else {
            return false;
        };
        self.authorized_keys()
            .lines()
            .any(|line| public_key_body(line) == pair.public_key_body())
    }
}

#[async_trait]
impl Connector for FakeConnector {
    type Session = LocalShell;

    async fn connect(
        &self,
        identity: &Identity,
        credential: &Credential,
    ) -> Result<LocalShell, SshError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let accepted = match credential {
            Credential::Password(password) => {
                self.password_attempts.fetch_add(1, Ordering::SeqCst);
                *password == self.password
            }
            Credential::PrivateKey(pem) => self.key_is_authorized(identity, pem),
        };

        if !accepted {
            return Err(SshError::AuthenticationFailure {
                identity: identity.key(),
                reason: format!("{} authentication rejected", credential.method()),
            });
        }

        Ok(LocalShell::with_home(self.home.clone(), self.stats.clone()))
    }
}

/// Key store backed by a map.
pub struct MemoryKeyStore {
    keys: DashMap<String, String>,
    label: String,
}

impl Default for MemoryKeyStore {
    fn default() -> Self {
        Self {
            keys: DashMap::new(),
            label: "ssh-mcp".to_string(),
        }
    }
}

#[async_trait]
impl KeyStore for MemoryKeyStore {
    fn generate_key_pair(&self, identity: &Identity) -> Result<KeyPair, SshError> {
        KeyPair::generate(identity, &self.label)
    }

    async fn store_private_key(&self, identity: &Identity, pem: &str) -> Result<(), SshError> {
        self.keys.insert(identity.key(), pem.to_string());
        Ok(())
    }

    async fn load_private_key(&self, identity: &Identity) -> Result<Option<String>, SshError> {
        Ok(self.keys.get(&identity.key()).map(|pem| pem.value().clone()))
    }

    async fn delete_key(&self, identity: &Identity) -> Result<(), SshError> {
        self.keys.remove(&identity.key());
        Ok(())
    }
}
