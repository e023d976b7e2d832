//! Authentication strategies for russh connections.
//!
//! Each strategy performs exactly one authentication attempt on an already
//! handshaken handle. Which credential to try, and what to do when it is
//! rejected, is decided by the connection registry.
//!
//! - [`PasswordAuth`]: caller-supplied password
//! - [`KeyAuth`]: stored PKCS#8 private key, decoded in memory

use std::sync::Arc;

use async_trait::async_trait;
use russh::{client, keys};
use tracing::debug;

use crate::mcp::client::SshClientHandler;
use crate::mcp::transport::Credential;
use crate::mcp::types::AuthMethod;

/// One authentication attempt.
///
/// Implementations must be thread-safe (`Send + Sync`) for use across
/// async tasks.
#[async_trait]
pub trait AuthStrategy: Send + Sync {
    /// # Returns
    ///
    /// * `Ok(true)` - The server accepted the credential
    /// * `Ok(false)` - The server rejected it
    /// * `Err(_)` - The attempt itself failed (transport error)
    async fn authenticate(
        &self,
        handle: &mut client::Handle<SshClientHandler>,
        username: &str,
    ) -> Result<bool, russh::Error>;

    fn method(&self) -> AuthMethod;
}

/// Build the strategy matching `credential`.
///
/// Fails with a reason when a stored key cannot be decoded.
pub fn strategy_for(credential: &Credential) -> Result<Box<dyn AuthStrategy>, String> {
    Ok(match credential {
        Credential::Password(password) => Box::new(PasswordAuth {
            password: password.clone(),
        }),
        Credential::PrivateKey(pem) => Box::new(KeyAuth::from_pem(pem)?),
    })
}

pub struct PasswordAuth {
    password: String,
}

#[async_trait]
impl AuthStrategy for PasswordAuth {
    async fn authenticate(
        &self,
        handle: &mut client::Handle<SshClientHandler>,
        username: &str,
    ) -> Result<bool, russh::Error> {
        Ok(handle
            .authenticate_password(username, &self.password)
            .await?
            .success())
    }

    fn method(&self) -> AuthMethod {
        AuthMethod::Password
    }
}

/// Public key authentication with an in-memory private key.
pub struct KeyAuth {
    key: Arc<keys::PrivateKey>,
}

impl KeyAuth {
    /// Decode a passphrase-less PEM private key.
    pub fn from_pem(pem: &str) -> Result<Self, String> {
        let key = keys::decode_secret_key(pem, None)
            .map_err(|e| format!("stored private key is unreadable: {}", e))?;
        Ok(Self { key: Arc::new(key) })
    }
}

#[async_trait]
impl AuthStrategy for KeyAuth {
    async fn authenticate(
        &self,
        handle: &mut client::Handle<SshClientHandler>,
        username: &str,
    ) -> Result<bool, russh::Error> {
        // ED25519 ignores the hash; only RSA keys would use it
        let hash_alg = handle.best_supported_rsa_hash().await?.flatten();
        debug!("Key auth for {} (rsa hash {:?})", username, hash_alg);

        let key = keys::PrivateKeyWithHashAlg::new(self.key.clone(), hash_alg);
        Ok(handle.authenticate_publickey(username, key).await?.success())
    }

    fn method(&self) -> AuthMethod {
        AuthMethod::Key
    }
}
