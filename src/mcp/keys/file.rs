//! Filesystem-backed key store.
//!
//! Keys live under `<base>/keys/id_ed25519_<sanitized-identity>`. The
//! filesystem is the index: presence of the file is the only existence
//! signal. Distinct identities that sanitize to the same filename collide;
//! that is accepted and not corrected.

use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};
use uuid::Uuid;

use crate::mcp::error::SshError;
use crate::mcp::identity::Identity;

use super::keypair::KeyPair;
use super::traits::KeyStore;

/// Subdirectory of the base directory holding private keys.
pub const KEYS_DIR: &str = "keys";

/// Filename prefix for stored private keys.
pub const KEY_FILE_PREFIX: &str = "id_ed25519_";

/// Character substituted for anything outside `[a-zA-Z0-9.-]`.
pub const PLACEHOLDER: char = '_';

#[cfg(unix)]
const KEY_FILE_MODE: u32 = 0o600;
#[cfg(unix)]
const KEY_DIR_MODE: u32 = 0o700;

/// Key store writing PKCS#8 PEM files with owner-only permissions.
#[derive(Debug, Clone)]
pub struct FileKeyStore {
    keys_dir: PathBuf,
    label: String,
}

impl FileKeyStore {
    /// Create a key store rooted at `base_dir`.
    ///
    /// # Arguments
    ///
    /// * `base_dir` - Base directory; keys are kept in its `keys/` subdirectory
    /// * `label` - Label used in generated public-key comments (`<label>@<host>`)
    pub fn new(base_dir: impl AsRef<Path>, label: impl Into<String>) -> Self {
        Self {
            keys_dir: base_dir.as_ref().join(KEYS_DIR),
            label: label.into(),
        }
    }

    /// Directory holding the key files.
    pub fn keys_dir(&self) -> &Path {
        &self.keys_dir
    }

    /// Deterministic key path for `identity`. Pure; touches no files.
    pub fn key_path(&self, identity: &Identity) -> PathBuf {
        self.keys_dir.join(key_file_name(identity))
    }

    async fn ensure_keys_dir(&self, identity: &Identity) -> Result<(), SshError> {
        let mut builder = fs::DirBuilder::new();
        builder.recursive(true);
        #[cfg(unix)]
        builder.mode(KEY_DIR_MODE);

        builder
            .create(&self.keys_dir)
            .await
            .map_err(|source| storage_error(identity, "create directory", &self.keys_dir, source))
    }
}

/// Filename for `identity`: `id_ed25519_` plus the sanitized identity string.
///
/// Never contains `/`, `:` or `@`.
pub fn key_file_name(identity: &Identity) -> String {
    let sanitized: String = identity
        .key()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '-' {
                c
            } else {
                PLACEHOLDER
            }
        })
        .collect();
    format!("{}{}", KEY_FILE_PREFIX, sanitized)
}

fn storage_error(
    identity: &Identity,
    operation: &'static str,
    path: &Path,
    source: io::Error,
) -> SshError {
    SshError::Storage {
        identity: identity.key(),
        operation,
        path: path.to_path_buf(),
        source,
    }
}

#[async_trait]
impl KeyStore for FileKeyStore {
    fn generate_key_pair(&self, identity: &Identity) -> Result<KeyPair, SshError> {
        KeyPair::generate(identity, &self.label)
    }

    async fn store_private_key(&self, identity: &Identity, pem: &str) -> Result<(), SshError> {
        self.ensure_keys_dir(identity).await?;

        let path = self.key_path(identity);
        // Same directory as the target so the rename cannot cross filesystems
        let tmp_path = self
            .keys_dir
            .join(format!(".{}.tmp-{}", key_file_name(identity), Uuid::new_v4()));

        let write_result = async {
            let mut options = fs::OpenOptions::new();
            options.write(true).create_new(true);
            #[cfg(unix)]
            options.mode(KEY_FILE_MODE);

            let mut file = options.open(&tmp_path).await?;
            file.write_all(pem.as_bytes()).await?;
            file.sync_all().await?;

            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                fs::set_permissions(&tmp_path, std::fs::Permissions::from_mode(KEY_FILE_MODE))
                    .await?;
            }
            Ok::<(), io::Error>(())
        }
        .await;

        if let Err(source) = write_result {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(storage_error(identity, "write", &tmp_path, source));
        }

        if let Err(source) = fs::rename(&tmp_path, &path).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(storage_error(identity, "rename", &path, source));
        }

        info!("Stored private key for {} at {}", identity, path.display());
        Ok(())
    }

    async fn load_private_key(&self, identity: &Identity) -> Result<Option<String>, SshError> {
        let path = self.key_path(identity);
        match fs::read_to_string(&path).await {
            Ok(pem) => Ok(Some(pem)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("No stored key for {} at {}", identity, path.display());
                Ok(None)
            }
            Err(source) => Err(storage_error(identity, "read", &path, source)),
        }
    }

    async fn delete_key(&self, identity: &Identity) -> Result<(), SshError> {
        let path = self.key_path(identity);
        match fs::remove_file(&path).await {
            Ok(()) => {
                info!("Deleted stored key for {}", identity);
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(storage_error(identity, "delete", &path, source)),
        }
    }
}
