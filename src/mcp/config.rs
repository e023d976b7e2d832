//! Configuration resolution for the SSH bootstrap MCP server.
//!
//! Every setting follows the same three-tier priority:
//!
//! 1. **Parameter** - Explicitly provided value (highest priority)
//! 2. **Environment Variable** - Value from environment variable
//! 3. **Default** - Built-in default value (lowest priority)
//!
//! Unparseable environment values fall through to the default.
//!
//! # Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `SSH_READY_TIMEOUT` | 20s | Handshake plus authentication timeout per attempt |
//! | `SSH_COMMAND_TIMEOUT` | 180s | Command execution timeout in seconds |
//! | `SSH_MAX_RETRIES` | 3 | Maximum connect retry attempts (tool layer) |
//! | `SSH_RETRY_DELAY_MS` | 1000ms | Initial retry delay in milliseconds |
//! | `SSH_COMPRESSION` | true | Enable zlib compression |
//! | `SSH_MCP_HOME` | `$HOME/.ssh-mcp` | Base directory of the key store |
//! | `SSH_KEY_LABEL` | `ssh-mcp` | Label in generated public-key comments |
//! | `MCP_PORT` | 8000 | HTTP transport port |

use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Default ready-timeout in seconds
pub(crate) const DEFAULT_READY_TIMEOUT_SECS: u64 = 20;

/// Default SSH command execution timeout in seconds
pub(crate) const DEFAULT_COMMAND_TIMEOUT_SECS: u64 = 180;

/// Default maximum retry attempts for SSH connection
pub(crate) const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default retry delay in milliseconds
pub(crate) const DEFAULT_RETRY_DELAY_MS: u64 = 1000;

/// Maximum retry delay cap in seconds
pub(crate) const MAX_RETRY_DELAY_SECS: u64 = 10;

/// Default label for generated public keys
pub(crate) const DEFAULT_KEY_LABEL: &str = "ssh-mcp";

/// Default base directory name below `$HOME`
pub(crate) const DEFAULT_HOME_DIR_NAME: &str = ".ssh-mcp";

/// Default HTTP port of the MCP server
pub(crate) const DEFAULT_MCP_PORT: u16 = 8000;

pub(crate) const READY_TIMEOUT_ENV_VAR: &str = "SSH_READY_TIMEOUT";
pub(crate) const COMMAND_TIMEOUT_ENV_VAR: &str = "SSH_COMMAND_TIMEOUT";
pub(crate) const MAX_RETRIES_ENV_VAR: &str = "SSH_MAX_RETRIES";
pub(crate) const RETRY_DELAY_MS_ENV_VAR: &str = "SSH_RETRY_DELAY_MS";
pub(crate) const COMPRESSION_ENV_VAR: &str = "SSH_COMPRESSION";
pub(crate) const HOME_ENV_VAR: &str = "SSH_MCP_HOME";
pub(crate) const KEY_LABEL_ENV_VAR: &str = "SSH_KEY_LABEL";
pub(crate) const MCP_PORT_ENV_VAR: &str = "MCP_PORT";

/// Resolve a parseable setting with priority: parameter -> env var -> default
fn resolve<T: FromStr>(param: Option<T>, env_var: &str, default: T) -> T {
    if let Some(value) = param {
        return value;
    }

    if let Ok(raw) = env::var(env_var)
        && let Ok(value) = raw.trim().parse::<T>()
    {
        return value;
    }

    default
}

/// Resolve the ready-timeout in seconds
pub(crate) fn resolve_ready_timeout(timeout_param: Option<u64>) -> u64 {
    resolve(timeout_param, READY_TIMEOUT_ENV_VAR, DEFAULT_READY_TIMEOUT_SECS)
}

/// Resolve the command execution timeout in seconds
pub(crate) fn resolve_command_timeout(timeout_param: Option<u64>) -> u64 {
    resolve(
        timeout_param,
        COMMAND_TIMEOUT_ENV_VAR,
        DEFAULT_COMMAND_TIMEOUT_SECS,
    )
}

/// Resolve the max retries value
pub(crate) fn resolve_max_retries(max_retries_param: Option<u32>) -> u32 {
    resolve(max_retries_param, MAX_RETRIES_ENV_VAR, DEFAULT_MAX_RETRIES)
}

/// Resolve the initial retry delay in milliseconds
pub(crate) fn resolve_retry_delay_ms(retry_delay_param: Option<u64>) -> u64 {
    resolve(
        retry_delay_param,
        RETRY_DELAY_MS_ENV_VAR,
        DEFAULT_RETRY_DELAY_MS,
    )
}

/// Resolve the compression setting (default enabled)
pub(crate) fn resolve_compression(compress_param: Option<bool>) -> bool {
    if let Some(compress) = compress_param {
        return compress;
    }

    if let Ok(env_compress) = env::var(COMPRESSION_ENV_VAR) {
        return env_compress.eq_ignore_ascii_case("true") || env_compress == "1";
    }

    true
}

/// Resolve the key store base directory.
///
/// Falls back to `.ssh-mcp` in the current directory when no home
/// directory can be determined.
pub(crate) fn resolve_home_dir(home_param: Option<PathBuf>) -> PathBuf {
    if let Some(home) = home_param {
        return home;
    }

    if let Ok(home) = env::var(HOME_ENV_VAR)
        && !home.trim().is_empty()
    {
        return PathBuf::from(home);
    }

    dirs::home_dir()
        .map(|home| home.join(DEFAULT_HOME_DIR_NAME))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_HOME_DIR_NAME))
}

/// Resolve the public-key comment label
pub(crate) fn resolve_key_label(label_param: Option<String>) -> String {
    if let Some(label) = label_param {
        return label;
    }

    match env::var(KEY_LABEL_ENV_VAR) {
        Ok(label) if !label.trim().is_empty() => label.trim().to_string(),
        _ => DEFAULT_KEY_LABEL.to_string(),
    }
}

/// Resolve the HTTP port of the MCP server
pub fn resolve_mcp_port(port_param: Option<u16>) -> u16 {
    resolve(port_param, MCP_PORT_ENV_VAR, DEFAULT_MCP_PORT)
}

/// Resolved settings for the registry and its collaborators.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryConfig {
    pub ready_timeout: Duration,
    pub command_timeout: Duration,
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub compression: bool,
    pub home_dir: PathBuf,
    pub key_label: String,
}

impl RegistryConfig {
    /// Resolve every setting from the environment, falling back to defaults.
    pub fn from_env() -> Self {
        Self {
            ready_timeout: Duration::from_secs(resolve_ready_timeout(None)),
            command_timeout: Duration::from_secs(resolve_command_timeout(None)),
            max_retries: resolve_max_retries(None),
            retry_delay: Duration::from_millis(resolve_retry_delay_ms(None)),
            compression: resolve_compression(None),
            home_dir: resolve_home_dir(None),
            key_label: resolve_key_label(None),
        }
    }
}
