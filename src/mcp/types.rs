//! Serializable types shared by the core and the MCP tools.
//!
//! All response types implement `Serialize`, `Deserialize`, and `JsonSchema`
//! for MCP protocol compatibility.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// How a session was authenticated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum AuthMethod {
    /// Stored private key
    Key,
    /// Caller-supplied password (followed by key bootstrap)
    Password,
}

impl std::fmt::Display for AuthMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthMethod::Key => write!(f, "key"),
            AuthMethod::Password => write!(f, "password"),
        }
    }
}

/// Complete output of a finished remote command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Session metadata for tracking connection information
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SessionInfo {
    /// Canonical `user@host:port` key
    pub session_key: String,
    pub username: String,
    pub host: String,
    pub port: u16,
    pub auth_method: AuthMethod,
    /// RFC3339 timestamp of successful authentication
    pub connected_at: String,
    /// Best-effort liveness flag (transport not known to be closed)
    pub alive: bool,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct SshConnectResponse {
    /// Key to pass to every other tool: `user@host:port`
    pub session_key: String,
    pub message: String,
    pub auth_method: AuthMethod,
    /// Whether an existing live session was returned
    pub reused: bool,
    /// Number of retry attempts needed to establish the connection
    pub retry_attempts: u32,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct SessionListResponse {
    /// List of registered SSH sessions
    pub sessions: Vec<SessionInfo>,
    /// Total number of registered sessions
    pub count: usize,
}

/// One entry of a remote directory listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct DirEntry {
    pub name: String,
    pub is_dir: bool,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct DirectoryListingResponse {
    pub path: String,
    pub entries: Vec<DirEntry>,
    pub count: usize,
}

/// Remote file kind as reported by `stat`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum FileKind {
    File,
    Directory,
    Symlink,
    Other,
}

impl FileKind {
    /// Map a `stat -c %F` description to a kind.
    pub fn from_stat_description(description: &str) -> Self {
        match description {
            "regular file" | "regular empty file" => FileKind::File,
            "directory" => FileKind::Directory,
            "symbolic link" => FileKind::Symlink,
            _ => FileKind::Other,
        }
    }
}

/// Remote file metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct FileStat {
    pub path: String,
    pub kind: FileKind,
    pub size: u64,
    /// Permission bits in octal notation, e.g. "644"
    pub mode: String,
    /// Modification time as seconds since the Unix epoch
    pub modified: i64,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct FileContentResponse {
    pub path: String,
    pub content: String,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct ExistsResponse {
    pub path: String,
    pub exists: bool,
}
