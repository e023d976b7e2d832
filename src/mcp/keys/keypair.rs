//! ED25519 keypair generation and OpenSSH public-key encoding.
//!
//! The private half is serialized as PKCS#8 PEM. The public half is
//! re-encoded from the raw 32-byte curve point into the OpenSSH wire format:
//!
//! ```text
//! ssh-ed25519 base64( u32be(11) "ssh-ed25519" u32be(32) <point> ) <label>@<host>
//! ```

use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use ed25519_dalek::SigningKey;
use ed25519_dalek::pkcs8::spki::der::pem::LineEnding;
use ed25519_dalek::pkcs8::{DecodePrivateKey, EncodePrivateKey};
use rand::rngs::OsRng;

use crate::mcp::error::SshError;
use crate::mcp::identity::Identity;

/// OpenSSH key type name for ED25519 keys.
pub const SSH_ED25519: &str = "ssh-ed25519";

/// Length of an ED25519 public point in bytes.
pub const ED25519_POINT_LEN: usize = 32;

/// A freshly generated keypair whose halves always correspond.
#[derive(Clone)]
pub struct KeyPair {
    /// OpenSSH `authorized_keys` line: `ssh-ed25519 <base64> <comment>`
    pub public_key: String,
    /// PKCS#8 PEM private key
    pub private_key: String,
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair")
            .field("public_key", &self.public_key)
            .field("private_key", &"<redacted>")
            .finish()
    }
}

impl KeyPair {
    /// Generate a new ED25519 keypair for `identity`.
    ///
    /// The public key comment is `<label>@<host>` so that the line can be
    /// traced back to this tool when reading a remote `authorized_keys`.
    pub fn generate(identity: &Identity, label: &str) -> Result<Self, SshError> {
        let signing_key = SigningKey::generate(&mut OsRng);
        Self::from_signing_key(identity, &signing_key, &key_comment(label, identity))
    }

    /// Rebuild a keypair from stored PKCS#8 PEM material.
    pub fn from_private_pem(
        identity: &Identity,
        pem: &str,
        comment: &str,
    ) -> Result<Self, SshError> {
        let signing_key =
            SigningKey::from_pkcs8_pem(pem).map_err(|e| SshError::KeyGeneration {
                identity: identity.key(),
                message: format!("invalid PKCS#8 private key: {}", e),
            })?;
        Self::from_signing_key(identity, &signing_key, comment)
    }

    fn from_signing_key(
        identity: &Identity,
        signing_key: &SigningKey,
        comment: &str,
    ) -> Result<Self, SshError> {
        let private_key = signing_key
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(|e| SshError::KeyGeneration {
                identity: identity.key(),
                message: format!("PKCS#8 encoding failed: {}", e),
            })?
            .to_string();

        let point = signing_key.verifying_key().to_bytes();
        let public_key = format!("{} {}", encode_public_key(&point), comment);

        Ok(Self {
            public_key,
            private_key,
        })
    }

    /// The `type base64` part of the public line, without the comment.
    pub fn public_key_body(&self) -> &str {
        public_key_body(&self.public_key)
    }
}

/// Public-key comment embedding the host: `<label>@<host>`.
pub fn key_comment(label: &str, identity: &Identity) -> String {
    format!("{}@{}", label, identity.host)
}

/// Encode a raw ED25519 point as `ssh-ed25519 <base64 wire blob>`.
pub fn encode_public_key(point: &[u8; ED25519_POINT_LEN]) -> String {
    let mut blob = Vec::with_capacity(4 + SSH_ED25519.len() + 4 + ED25519_POINT_LEN);
    write_ssh_string(&mut blob, SSH_ED25519.as_bytes());
    write_ssh_string(&mut blob, point);
    format!("{} {}", SSH_ED25519, BASE64.encode(blob))
}

/// Decode an OpenSSH public-key line into its key type and raw point.
///
/// The blob must contain exactly two length-prefixed fields, and the key
/// type inside the blob must match the textual prefix.
pub fn decode_public_key_blob(line: &str) -> Result<(String, Vec<u8>), String> {
    let mut parts = line.split_whitespace();
    let key_type = parts.next().ok_or("empty public key line")?;
    let body = parts.next().ok_or("missing base64 body")?;

    let blob = BASE64
        .decode(body)
        .map_err(|e| format!("invalid base64 body: {}", e))?;

    let (inner_type, rest) = read_ssh_string(&blob)?;
    let (point, rest) = read_ssh_string(rest)?;
    if !rest.is_empty() {
        return Err(format!("{} trailing bytes after key blob", rest.len()));
    }

    let inner_type =
        std::str::from_utf8(inner_type).map_err(|_| "key type is not UTF-8".to_string())?;
    if inner_type != key_type {
        return Err(format!(
            "key type mismatch: line says {}, blob says {}",
            key_type, inner_type
        ));
    }
    if inner_type == SSH_ED25519 && point.len() != ED25519_POINT_LEN {
        return Err(format!(
            "ED25519 point must be {} bytes, got {}",
            ED25519_POINT_LEN,
            point.len()
        ));
    }

    Ok((inner_type.to_string(), point.to_vec()))
}

/// Strip the comment from an OpenSSH public-key line.
pub fn public_key_body(line: &str) -> &str {
    let trimmed = line.trim();
    match trimmed.match_indices(' ').nth(1) {
        Some((idx, _)) => &trimmed[..idx],
        None => trimmed,
    }
}

fn write_ssh_string(out: &mut Vec<u8>, data: &[u8]) {
    out.extend_from_slice(&(data.len() as u32).to_be_bytes());
    out.extend_from_slice(data);
}

fn read_ssh_string(input: &[u8]) -> Result<(&[u8], &[u8]), String> {
    let (len, rest) = input
        .split_first_chunk::<4>()
        .ok_or("truncated length prefix")?;
    let len = u32::from_be_bytes(*len) as usize;
    if rest.len() < len {
        return Err(format!(
            "field claims {} bytes, only {} remain",
            len,
            rest.len()
        ));
    }
    Ok(rest.split_at(len))
}
