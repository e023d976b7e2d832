//! MCP SSH module: connection pooling with password-to-key bootstrap.
//!
//! This module is organized into the following submodules:
//!
//! - `identity`: `user@host:port` account identity
//! - `error`: Error taxonomy and retry classification
//! - `types`: Serializable response types for MCP tools
//! - `config`: Configuration resolution with environment variable support
//! - `keys`: ED25519 key generation, OpenSSH encoding, local key store
//! - `transport`: Connector and remote shell capability traits
//! - `auth`: russh authentication strategies
//! - `client`: russh-backed connector and session
//! - `session`: Registered session wrapper
//! - `bootstrap`: Password-to-key upgrade protocol
//! - `registry`: Per-identity session registry
//! - `operations`: Command execution and shell-based file operations
//! - `commands`: MCP tool implementations

pub mod auth;
pub mod bootstrap;
pub mod client;
pub mod commands;
pub mod config;
pub mod error;
pub mod identity;
pub mod keys;
pub mod operations;
pub mod registry;
pub mod session;
#[cfg(test)]
pub(crate) mod testing;
pub mod transport;
pub mod types;

pub use commands::McpSSHCommands;
pub use config::RegistryConfig;
pub use error::SshError;
pub use identity::Identity;
pub use registry::ConnectionRegistry;
