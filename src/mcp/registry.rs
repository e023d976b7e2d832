//! Connection registry.
//!
//! Tracks at most one live session per identity and decides, on every
//! connect, between reusing a session, authenticating with the stored key,
//! and falling back to password authentication followed by key bootstrap.
//!
//! # Connect Decision
//!
//! 1. Live session registered → reuse it
//! 2. Stale session registered → close and discard it, continue
//! 3. Stored key → try key auth; a rejection falls through to the password
//!    path only if a password was supplied
//! 4. Password → authenticate, bootstrap a key, register
//!
//! # Concurrency
//!
//! Sessions live in a `DashMap`. Each identity also has a `tokio::sync::Mutex`
//! held across the whole connect sequence, so two concurrent connects for one
//! identity never bootstrap twice: the second one finds and reuses the first
//! one's session. Disconnect takes the same lock, so it waits for an in-flight
//! connect and then closes the session that connect registered.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures::future::join_all;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::mcp::bootstrap::BootstrapProtocol;
use crate::mcp::error::SshError;
use crate::mcp::identity::Identity;
use crate::mcp::keys::KeyStore;
use crate::mcp::session::Session;
use crate::mcp::transport::{Connector, Credential, RemoteShell};
use crate::mcp::types::{AuthMethod, CommandOutput, SessionInfo};

/// Result of a successful [`ConnectionRegistry::connect`].
pub struct Connected<S> {
    pub session: Arc<Session<S>>,
    /// Whether an already registered live session was returned
    pub reused: bool,
}

/// Owner of every registered session.
pub struct ConnectionRegistry<C: Connector> {
    connector: C,
    key_store: Arc<dyn KeyStore>,
    bootstrap: BootstrapProtocol,
    sessions: DashMap<String, Arc<Session<C::Session>>>,
    // Entries are never pruned; one small mutex per identity ever connected
    connect_locks: DashMap<String, Arc<Mutex<()>>>,
    ready_timeout: Duration,
}

impl<C: Connector> ConnectionRegistry<C> {
    /// # Arguments
    ///
    /// * `connector` - Establishes authenticated transports
    /// * `key_store` - Persists bootstrapped private keys
    /// * `ready_timeout` - Upper bound for handshake plus authentication per attempt
    pub fn new(connector: C, key_store: Arc<dyn KeyStore>, ready_timeout: Duration) -> Self {
        Self {
            connector,
            bootstrap: BootstrapProtocol::new(key_store.clone()),
            key_store,
            sessions: DashMap::new(),
            connect_locks: DashMap::new(),
            ready_timeout,
        }
    }

    pub fn key_store(&self) -> &Arc<dyn KeyStore> {
        &self.key_store
    }

    /// Return a live session for `identity`, establishing one if needed.
    ///
    /// # Returns
    ///
    /// * `Ok(connected)` - A registered, authenticated session
    /// * `Err(SshError::AuthenticationFailure)` - No usable credential
    /// * `Err(SshError::ConnectionTimeout)` - An attempt exceeded the ready-timeout
    /// * `Err(SshError::BootstrapFailure)` - Password auth worked but the key
    ///   upgrade failed; nothing was registered
    pub async fn connect(
        &self,
        identity: &Identity,
        password: Option<&str>,
    ) -> Result<Connected<C::Session>, SshError> {
        let lock = self.connect_lock(identity);
        let _guard = lock.lock().await;

        if let Some(session) = self.live_session(identity).await {
            info!("Reusing live session for {}", identity);
            return Ok(Connected {
                session,
                reused: true,
            });
        }

        if let Some(pem) = self.key_store.load_private_key(identity).await? {
            info!("Authenticating {} with stored key", identity);
            match self.attempt(identity, Credential::PrivateKey(pem)).await {
                Ok(transport) => return Ok(self.register(identity, transport, AuthMethod::Key)),
                Err(e) if e.is_auth_failure() => {
                    if password.is_none() {
                        warn!("Stored key for {} rejected and no password given", identity);
                        return Err(SshError::AuthenticationFailure {
                            identity: identity.key(),
                            reason: "key auth failed, no password available".to_string(),
                        });
                    }
                    warn!(
                        "Stored key for {} rejected, falling back to password",
                        identity
                    );
                }
                Err(e) => return Err(e),
            }
        }

        let password = password.ok_or_else(|| SshError::AuthenticationFailure {
            identity: identity.key(),
            reason: "no key, no password".to_string(),
        })?;

        info!("Authenticating {} with password", identity);
        let transport = self
            .attempt(identity, Credential::Password(password.to_string()))
            .await?;

        if let Err(e) = self.bootstrap.run(identity, &transport).await {
            transport.close().await;
            return Err(e);
        }

        Ok(self.register(identity, transport, AuthMethod::Password))
    }

    /// Close and remove the session for `identity`.
    ///
    /// Returns whether a session was registered. Idempotent.
    pub async fn disconnect(&self, identity: &Identity) -> bool {
        let lock = self.connect_lock(identity);
        let _guard = lock.lock().await;

        match self.sessions.remove(&identity.key()) {
            Some((_, session)) => {
                session.transport().close().await;
                info!("Disconnected {}", identity);
                true
            }
            None => {
                debug!("Disconnect for {}: no session registered", identity);
                false
            }
        }
    }

    /// Close every session concurrently and clear the registry.
    pub async fn disconnect_all(&self) -> usize {
        let keys: Vec<String> = self.sessions.iter().map(|e| e.key().clone()).collect();
        let sessions: Vec<_> = keys
            .iter()
            .filter_map(|key| self.sessions.remove(key).map(|(_, session)| session))
            .collect();

        let count = sessions.len();
        join_all(sessions.iter().map(|s| async move { s.transport().close().await })).await;

        if count > 0 {
            info!("Closed {} SSH session(s)", count);
        }
        count
    }

    /// Run `command` over the live session for `identity`.
    ///
    /// Fails with `NotConnected` without any network I/O when no live
    /// session is registered. A nonzero exit status is returned, not raised.
    pub async fn execute_command(
        &self,
        identity: &Identity,
        command: &str,
    ) -> Result<CommandOutput, SshError> {
        let session = self.require_live(identity).await?;
        let transport = session.transport();

        let result = transport.exec(command).await;
        if result.is_err() && !transport.is_alive() {
            self.evict(identity, &session).await;
        }
        result
    }

    /// The raw transport of the live session for `identity`.
    pub async fn session_handle(&self, identity: &Identity) -> Result<Arc<C::Session>, SshError> {
        Ok(self.require_live(identity).await?.transport())
    }

    /// Whether a live session is registered for `identity`.
    pub fn is_connected(&self, identity: &Identity) -> bool {
        self.sessions
            .get(&identity.key())
            .is_some_and(|s| s.is_alive())
    }

    /// Snapshot of every registered session, ordered by session key.
    pub fn list_sessions(&self) -> Vec<SessionInfo> {
        let mut sessions: Vec<SessionInfo> =
            self.sessions.iter().map(|entry| entry.value().info()).collect();
        sessions.sort_by(|a, b| a.session_key.cmp(&b.session_key));
        sessions
    }

    /// Delete the stored key for `identity`. An open session stays open.
    pub async fn forget_key(&self, identity: &Identity) -> Result<(), SshError> {
        self.key_store.delete_key(identity).await
    }

    #[cfg(test)]
    pub(crate) fn connector(&self) -> &C {
        &self.connector
    }

    fn connect_lock(&self, identity: &Identity) -> Arc<Mutex<()>> {
        self.connect_locks
            .entry(identity.key())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// One authentication attempt bounded by the ready-timeout.
    ///
    /// On timeout the in-flight attempt is dropped, which closes its transport.
    async fn attempt(
        &self,
        identity: &Identity,
        credential: Credential,
    ) -> Result<C::Session, SshError> {
        let method = credential.method();
        match tokio::time::timeout(
            self.ready_timeout,
            self.connector.connect(identity, &credential),
        )
        .await
        {
            Ok(Ok(transport)) => {
                debug!("{} authentication succeeded for {}", method, identity);
                Ok(transport)
            }
            Ok(Err(e)) => {
                debug!("{} authentication failed for {}: {}", method, identity, e);
                Err(e)
            }
            Err(_) => {
                warn!(
                    "{} connect to {} not ready within {:?}",
                    method, identity, self.ready_timeout
                );
                Err(SshError::ConnectionTimeout {
                    identity: identity.key(),
                    timeout: self.ready_timeout,
                })
            }
        }
    }

    fn register(
        &self,
        identity: &Identity,
        transport: C::Session,
        method: AuthMethod,
    ) -> Connected<C::Session> {
        let session = Arc::new(Session::new(identity.clone(), transport, method));
        self.sessions.insert(identity.key(), session.clone());
        info!("Registered session for {} ({} auth)", identity, method);
        Connected {
            session,
            reused: false,
        }
    }

    /// The registered session if it is alive; a stale one is evicted.
    async fn live_session(&self, identity: &Identity) -> Option<Arc<Session<C::Session>>> {
        let session = self
            .sessions
            .get(&identity.key())
            .map(|entry| entry.value().clone())?;

        if session.is_alive() {
            return Some(session);
        }

        info!("Discarding stale session for {}", identity);
        self.evict(identity, &session).await;
        None
    }

    async fn require_live(&self, identity: &Identity) -> Result<Arc<Session<C::Session>>, SshError> {
        self.live_session(identity)
            .await
            .ok_or_else(|| SshError::NotConnected {
                identity: identity.key(),
            })
    }

    /// Remove `session` if it is still the registered one, then close it.
    async fn evict(&self, identity: &Identity, session: &Arc<Session<C::Session>>) {
        self.sessions
            .remove_if(&identity.key(), |_, current| Arc::ptr_eq(current, session));
        session.transport().close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::keys::{FileKeyStore, KeyPair, public_key_body};
    use crate::mcp::testing::{FakeConnector, MemoryKeyStore};

    const READY_TIMEOUT: Duration = Duration::from_secs(5);

    fn alice() -> Identity {
        Identity::new("alice", "10.0.0.5", 22)
    }

    fn registry(connector: FakeConnector) -> (ConnectionRegistry<FakeConnector>, Arc<MemoryKeyStore>) {
        let store = Arc::new(MemoryKeyStore::default());
        let registry = ConnectionRegistry::new(connector, store.clone(), READY_TIMEOUT);
        (registry, store)
    }

    mod connect {
        use super::*;

        #[tokio::test]
        async fn test_first_connect_bootstraps_then_key_auth() {
            let (registry, store) = registry(FakeConnector::new("pw1"));

            let first = registry.connect(&alice(), Some("pw1")).await.unwrap();
            assert!(!first.reused);
            assert_eq!(first.session.auth_method(), AuthMethod::Password);
            assert_eq!(first.session.key(), "alice@10.0.0.5:22");
            assert!(store.has_key(&alice()).await.unwrap());

            let keys = registry.connector.authorized_keys();
            assert_eq!(keys.lines().count(), 1);
            assert!(keys.starts_with("ssh-ed25519 "));

            // Fresh transport needed: the first one goes away
            registry.disconnect(&alice()).await;
            let second = registry.connect(&alice(), None).await.unwrap();
            assert_eq!(second.session.auth_method(), AuthMethod::Key);
            assert_eq!(registry.connector.password_attempts(), 1);
            assert_eq!(registry.connector.authorized_keys().lines().count(), 1);
        }

        #[tokio::test]
        async fn test_live_session_is_reused() {
            let (registry, _) = registry(FakeConnector::new("pw1"));

            let first = registry.connect(&alice(), Some("pw1")).await.unwrap();
            let second = registry.connect(&alice(), None).await.unwrap();

            assert!(second.reused);
            assert!(Arc::ptr_eq(&first.session, &second.session));
            assert_eq!(registry.connector.connects(), 1);
        }

        #[tokio::test]
        async fn test_rejected_key_without_password_fails() {
            let (registry, store) = registry(FakeConnector::new("pw1"));
            // A key that was never deployed remotely
            let stray = KeyPair::generate(&alice(), "ssh-mcp").unwrap();
            store
                .store_private_key(&alice(), &stray.private_key)
                .await
                .unwrap();

            let err = registry.connect(&alice(), None).await.err().unwrap();

            match err {
                SshError::AuthenticationFailure { reason, .. } => {
                    assert_eq!(reason, "key auth failed, no password available");
                }
                other => panic!("unexpected error: {}", other),
            }
            assert!(registry.list_sessions().is_empty());
            assert_eq!(registry.connector.password_attempts(), 0);
        }

        #[tokio::test]
        async fn test_rejected_key_with_password_rebootstraps() {
            let (registry, store) = registry(FakeConnector::new("pw1"));
            let stray = KeyPair::generate(&alice(), "ssh-mcp").unwrap();
            store
                .store_private_key(&alice(), &stray.private_key)
                .await
                .unwrap();

            let connected = registry.connect(&alice(), Some("pw1")).await.unwrap();

            assert_eq!(connected.session.auth_method(), AuthMethod::Password);
            let replaced = store.load_private_key(&alice()).await.unwrap().unwrap();
            assert_ne!(replaced, stray.private_key);
        }

        #[tokio::test]
        async fn test_unparseable_stored_key_counts_as_rejection() {
            let (registry, store) = registry(FakeConnector::new("pw1"));
            store.store_private_key(&alice(), "garbage").await.unwrap();

            let err = registry.connect(&alice(), None).await.err().unwrap();
            assert!(err.is_auth_failure());

            let connected = registry.connect(&alice(), Some("pw1")).await.unwrap();
            assert_eq!(connected.session.auth_method(), AuthMethod::Password);
        }

        #[tokio::test]
        async fn test_no_key_no_password() {
            let (registry, _) = registry(FakeConnector::new("pw1"));

            let err = registry.connect(&alice(), None).await.err().unwrap();

            match err {
                SshError::AuthenticationFailure { reason, .. } => {
                    assert_eq!(reason, "no key, no password");
                }
                other => panic!("unexpected error: {}", other),
            }
            assert_eq!(registry.connector.connects(), 0);
        }

        #[tokio::test]
        async fn test_wrong_password_registers_nothing() {
            let (registry, store) = registry(FakeConnector::new("pw1"));

            let err = registry.connect(&alice(), Some("nope")).await.err().unwrap();

            assert!(err.is_auth_failure());
            assert!(!registry.is_connected(&alice()));
            assert!(!store.has_key(&alice()).await.unwrap());
        }

        #[tokio::test]
        async fn test_failed_deploy_leaves_no_key_and_no_session() {
            let connector = FakeConnector::new("pw1");
            std::fs::write(connector.home().join(".ssh"), "not a directory").unwrap();
            let (registry, store) = registry(connector);

            let err = registry.connect(&alice(), Some("pw1")).await.err().unwrap();

            assert!(matches!(err, SshError::BootstrapFailure { .. }));
            assert!(!store.has_key(&alice()).await.unwrap());
            assert!(registry.list_sessions().is_empty());
            assert_eq!(registry.connector.closed_sessions(), 1);
        }

        #[tokio::test]
        async fn test_ready_timeout() {
            let connector = FakeConnector::new("pw1").with_delay(Duration::from_millis(500));
            let store = Arc::new(MemoryKeyStore::default());
            let registry =
                ConnectionRegistry::new(connector, store.clone(), Duration::from_millis(50));

            let err = registry.connect(&alice(), Some("pw1")).await.err().unwrap();

            assert!(matches!(err, SshError::ConnectionTimeout { .. }));
            assert!(err.is_retryable());
            assert!(!registry.is_connected(&alice()));
            assert!(!store.has_key(&alice()).await.unwrap());
        }

        #[tokio::test]
        async fn test_concurrent_connects_bootstrap_once() {
            let (registry, _) = registry(FakeConnector::new("pw1"));
            let identity = alice();

            let (a, b) = tokio::join!(
                registry.connect(&identity, Some("pw1")),
                registry.connect(&identity, Some("pw1"))
            );
            let (a, b) = (a.unwrap(), b.unwrap());

            assert!(Arc::ptr_eq(&a.session, &b.session));
            assert!(a.reused != b.reused);
            assert_eq!(registry.connector.password_attempts(), 1);
            assert_eq!(registry.connector.authorized_keys().lines().count(), 1);
        }

        #[tokio::test]
        async fn test_file_key_store_end_to_end() {
            let base = tempfile::tempdir().unwrap();
            let store = Arc::new(FileKeyStore::new(base.path(), "ssh-mcp"));
            let registry =
                ConnectionRegistry::new(FakeConnector::new("pw1"), store.clone(), READY_TIMEOUT);

            registry.connect(&alice(), Some("pw1")).await.unwrap();

            let key_path = store.key_path(&alice());
            assert!(key_path.exists());
            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                let mode = std::fs::metadata(&key_path).unwrap().permissions().mode();
                assert_eq!(mode & 0o777, 0o600);
            }

            let pem = std::fs::read_to_string(&key_path).unwrap();
            let stored = KeyPair::from_private_pem(&alice(), &pem, "").unwrap();
            let authorized = registry.connector.authorized_keys();
            assert!(
                authorized
                    .lines()
                    .any(|line| public_key_body(line) == stored.public_key_body())
            );

            registry.disconnect(&alice()).await;
            let again = registry.connect(&alice(), None).await.unwrap();
            assert_eq!(again.session.auth_method(), AuthMethod::Key);
            assert_eq!(registry.connector.password_attempts(), 1);
        }

        #[tokio::test]
        async fn test_identities_are_independent() {
            let (registry, store) = registry(FakeConnector::new("pw1"));
            let other_port = Identity::new("alice", "10.0.0.5", 2222);

            registry.connect(&alice(), Some("pw1")).await.unwrap();
            registry.connect(&other_port, Some("pw1")).await.unwrap();

            assert_eq!(registry.list_sessions().len(), 2);
            assert!(store.has_key(&other_port).await.unwrap());
        }
    }

    mod liveness {
        use super::*;

        #[tokio::test]
        async fn test_stale_session_is_replaced() {
            let (registry, _) = registry(FakeConnector::new("pw1"));
            let first = registry.connect(&alice(), Some("pw1")).await.unwrap();
            first.session.transport().close().await;

            let second = registry.connect(&alice(), None).await.unwrap();

            assert!(!second.reused);
            assert!(!Arc::ptr_eq(&first.session, &second.session));
            assert_eq!(second.session.auth_method(), AuthMethod::Key);
        }

        #[tokio::test]
        async fn test_execute_on_stale_session_is_not_connected() {
            let (registry, _) = registry(FakeConnector::new("pw1"));
            let connected = registry.connect(&alice(), Some("pw1")).await.unwrap();
            connected.session.transport().close().await;

            let err = registry.execute_command(&alice(), "true").await.unwrap_err();

            assert!(matches!(err, SshError::NotConnected { .. }));
            assert!(registry.list_sessions().is_empty());
        }
    }

    mod operations {
        use super::*;

        #[tokio::test]
        async fn test_execute_without_session_does_no_io() {
            let (registry, _) = registry(FakeConnector::new("pw1"));

            let err = registry
                .execute_command(&alice(), "echo hi")
                .await
                .unwrap_err();

            assert!(matches!(err, SshError::NotConnected { .. }));
            assert_eq!(registry.connector.connects(), 0);
            assert_eq!(registry.connector.commands_run(), 0);
        }

        #[tokio::test]
        async fn test_execute_collects_output() {
            let (registry, _) = registry(FakeConnector::new("pw1"));
            registry.connect(&alice(), Some("pw1")).await.unwrap();

            let output = registry
                .execute_command(&alice(), "echo out; echo err >&2; exit 3")
                .await
                .unwrap();

            assert_eq!(output.stdout, "out\n");
            assert_eq!(output.stderr, "err\n");
            assert_eq!(output.exit_code, 3);
        }

        #[tokio::test]
        async fn test_session_handle_requires_session() {
            let (registry, _) = registry(FakeConnector::new("pw1"));
            assert!(matches!(
                registry.session_handle(&alice()).await.err().unwrap(),
                SshError::NotConnected { .. }
            ));

            registry.connect(&alice(), Some("pw1")).await.unwrap();
            let handle = registry.session_handle(&alice()).await.unwrap();
            assert!(handle.is_alive());
        }

        #[tokio::test]
        async fn test_disconnect_is_idempotent() {
            let (registry, _) = registry(FakeConnector::new("pw1"));
            let connected = registry.connect(&alice(), Some("pw1")).await.unwrap();

            assert!(registry.disconnect(&alice()).await);
            assert!(!registry.disconnect(&alice()).await);
            assert!(!connected.session.is_alive());
            assert!(!registry.is_connected(&alice()));
        }

        #[tokio::test]
        async fn test_disconnect_waits_for_in_flight_connect() {
            let connector = FakeConnector::new("pw1").with_delay(Duration::from_millis(200));
            let (registry, _) = registry(connector);
            let identity = alice();

            let (connected, disconnected) = tokio::join!(
                registry.connect(&identity, Some("pw1")),
                async {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    registry.disconnect(&identity).await
                }
            );

            let connected = connected.unwrap();
            assert!(disconnected);
            assert!(!connected.session.is_alive());
            assert!(registry.list_sessions().is_empty());
            assert!(!registry.is_connected(&identity));
        }

        #[tokio::test]
        async fn test_disconnect_all_closes_everything() {
            let (registry, _) = registry(FakeConnector::new("pw1"));
            let a = registry.connect(&alice(), Some("pw1")).await.unwrap();
            let b = registry
                .connect(&Identity::new("bob", "10.0.0.6", 22), Some("pw1"))
                .await
                .unwrap();

            assert_eq!(registry.disconnect_all().await, 2);

            assert!(registry.list_sessions().is_empty());
            assert!(!a.session.is_alive());
            assert!(!b.session.is_alive());
        }

        #[tokio::test]
        async fn test_list_sessions_reports_metadata() {
            let (registry, _) = registry(FakeConnector::new("pw1"));
            registry.connect(&alice(), Some("pw1")).await.unwrap();

            let sessions = registry.list_sessions();

            assert_eq!(sessions.len(), 1);
            assert_eq!(sessions[0].session_key, "alice@10.0.0.5:22");
            assert_eq!(sessions[0].auth_method, AuthMethod::Password);
            assert!(sessions[0].alive);
            assert!(chrono::DateTime::parse_from_rfc3339(&sessions[0].connected_at).is_ok());
        }

        #[tokio::test]
        async fn test_forget_key_forces_password_path() {
            let (registry, store) = registry(FakeConnector::new("pw1"));
            registry.connect(&alice(), Some("pw1")).await.unwrap();
            registry.disconnect(&alice()).await;

            registry.forget_key(&alice()).await.unwrap();

            assert!(!store.has_key(&alice()).await.unwrap());
            let err = registry.connect(&alice(), None).await.err().unwrap();
            assert!(err.is_auth_failure());
        }
    }
}
