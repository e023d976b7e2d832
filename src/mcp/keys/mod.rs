//! Local key store for bootstrapped identities.
//!
//! - [`KeyPair`]: ED25519 generation and OpenSSH wire-format encoding
//! - [`KeyStore`]: persistence trait used by bootstrap and the registry
//! - [`FileKeyStore`]: owner-only PEM files under `<base>/keys/`

mod file;
mod keypair;
mod traits;

pub use file::{FileKeyStore, KEY_FILE_PREFIX, KEYS_DIR, key_file_name};
pub use keypair::{
    ED25519_POINT_LEN, KeyPair, SSH_ED25519, decode_public_key_blob, encode_public_key,
    key_comment, public_key_body,
};
pub use traits::KeyStore;
