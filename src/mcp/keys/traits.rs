//! Key persistence trait definition.
//!
//! Defines the interface for private-key storage, so the bootstrap protocol
//! and the connection registry can be exercised against in-memory fakes.

use async_trait::async_trait;

use crate::mcp::error::SshError;
use crate::mcp::identity::Identity;

use super::keypair::KeyPair;

/// Trait for per-identity private key storage.
///
/// Implementations must be thread-safe (`Send + Sync`) for use across
/// async tasks. There is at most one stored key per identity.
#[async_trait]
pub trait KeyStore: Send + Sync {
    /// Generate a new keypair for `identity`.
    fn generate_key_pair(&self, identity: &Identity) -> Result<KeyPair, SshError>;

    /// Persist `pem` for `identity`, replacing any existing key atomically.
    async fn store_private_key(&self, identity: &Identity, pem: &str) -> Result<(), SshError>;

    /// Load the stored key.
    ///
    /// # Returns
    ///
    /// * `Ok(Some(pem))` - A key is stored for this identity
    /// * `Ok(None)` - No key is stored (a normal outcome, not an error)
    /// * `Err(_)` - Any other storage failure
    async fn load_private_key(&self, identity: &Identity) -> Result<Option<String>, SshError>;

    /// Remove the stored key. Removing an absent key succeeds.
    async fn delete_key(&self, identity: &Identity) -> Result<(), SshError>;

    /// Whether a key is stored for `identity`.
    async fn has_key(&self, identity: &Identity) -> Result<bool, SshError> {
        Ok(self.load_private_key(identity).await?.is_some())
    }
}
