//! Command execution and file operations over an established session.
//!
//! File operations run as ordinary remote shell commands; there is no SFTP.
//! Every path and payload is single-quoted with [`shell_quote`] before it is
//! interpolated into a command line.

use tracing::{debug, warn};
use uuid::Uuid;

use crate::mcp::error::SshError;
use crate::mcp::identity::Identity;
use crate::mcp::registry::ConnectionRegistry;
use crate::mcp::transport::Connector;
use crate::mcp::types::{CommandOutput, DirEntry, FileKind, FileStat};

/// Source bytes per `printf` append in [`SessionOperations::write_file`].
///
/// Quoting can grow a chunk up to fourfold, which keeps every command line
/// well below the kernel's 128 KiB limit for a single argument.
const WRITE_CHUNK_BYTES: usize = 16 * 1024;

/// Quote `value` for POSIX shells.
///
/// Wraps in single quotes; embedded single quotes close the string, add an
/// escaped quote and reopen it (`'` becomes `'\''`).
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// `cd '<dir>' && <command>` when a working directory is given.
pub fn with_working_directory(command: &str, working_directory: Option<&str>) -> String {
    match working_directory {
        Some(dir) if !dir.is_empty() => format!("cd {} && {}", shell_quote(dir), command),
        _ => command.to_string(),
    }
}

/// Operations bound to one identity's session.
pub struct SessionOperations<'a, C: Connector> {
    registry: &'a ConnectionRegistry<C>,
    identity: &'a Identity,
}

impl<'a, C: Connector> SessionOperations<'a, C> {
    pub fn new(registry: &'a ConnectionRegistry<C>, identity: &'a Identity) -> Self {
        Self { registry, identity }
    }

    /// Run `command`, optionally inside `working_directory`.
    ///
    /// A nonzero exit status is part of the output, not an error.
    pub async fn execute(
        &self,
        command: &str,
        working_directory: Option<&str>,
    ) -> Result<CommandOutput, SshError> {
        let command = with_working_directory(command, working_directory);
        self.registry.execute_command(self.identity, &command).await
    }

    /// Contents of the remote file at `path`.
    pub async fn read_file(&self, path: &str) -> Result<String, SshError> {
        let output = self
            .checked(&format!("cat -- {}", shell_quote(path)))
            .await?;
        Ok(output.stdout)
    }

    /// Write `content` to `path`, creating parent directories.
    ///
    /// The content is appended in chunks to a temporary sibling file which is
    /// then renamed over `path`, so a failed write leaves `path` untouched.
    pub async fn write_file(&self, path: &str, content: &str) -> Result<(), SshError> {
        let quoted = shell_quote(path);
        let temp = shell_quote(&format!("{}.tmp-{}", path, Uuid::new_v4().simple()));

        self.checked(&format!(
            "mkdir -p -- \"$(dirname -- {})\" && : > {}",
            quoted, temp
        ))
        .await?;

        if let Err(e) = self.fill_and_rename(content, &temp, &quoted).await {
            let cleanup = format!("rm -f -- {}", temp);
            if let Err(cleanup_err) = self.registry.execute_command(self.identity, &cleanup).await {
                warn!("Failed to remove {} on {}: {}", temp, self.identity, cleanup_err);
            }
            return Err(e);
        }

        debug!("Wrote {} bytes to {} on {}", content.len(), path, self.identity);
        Ok(())
    }

    async fn fill_and_rename(&self, content: &str, temp: &str, target: &str) -> Result<(), SshError> {
        for chunk in chunks(content, WRITE_CHUNK_BYTES) {
            self.checked(&format!("printf '%s' {} >> {}", shell_quote(chunk), temp))
                .await?;
        }
        self.checked(&format!("mv -f -- {} {}", temp, target)).await?;
        Ok(())
    }

    /// Entries of the remote directory at `path`, hidden entries included.
    pub async fn list_directory(&self, path: &str) -> Result<Vec<DirEntry>, SshError> {
        let output = self
            .checked(&format!("ls -1Ap -- {}", shell_quote(path)))
            .await?;
        Ok(parse_listing(&output.stdout))
    }

    /// Metadata of the remote path (symlinks are not followed).
    pub async fn stat(&self, path: &str) -> Result<FileStat, SshError> {
        let command = format!("stat -c '%F|%s|%a|%Y' -- {}", shell_quote(path));
        let output = self.checked(&command).await?;
        stat_from_output(self.identity, &command, path, &output.stdout)
    }

    /// Whether anything exists at `path`, dangling symlinks included.
    pub async fn exists(&self, path: &str) -> Result<bool, SshError> {
        let quoted = shell_quote(path);
        let command = format!("[ -e {quoted} ] || [ -L {quoted} ]", quoted = quoted);
        let output = self.registry.execute_command(self.identity, &command).await?;
        match output.exit_code {
            0 => Ok(true),
            1 => Ok(false),
            code => Err(self.command_failure(&command, code, output.stderr)),
        }
    }

    async fn checked(&self, command: &str) -> Result<CommandOutput, SshError> {
        let output = self.registry.execute_command(self.identity, command).await?;
        if !output.success() {
            return Err(self.command_failure(command, output.exit_code, output.stderr));
        }
        Ok(output)
    }

    fn command_failure(&self, command: &str, exit_code: i32, stderr: String) -> SshError {
        command_failure(self.identity, command, exit_code, stderr)
    }
}

fn command_failure(identity: &Identity, command: &str, exit_code: i32, stderr: String) -> SshError {
    SshError::RemoteCommandFailure {
        identity: identity.key(),
        command: command.to_string(),
        exit_code,
        stderr: stderr.trim().to_string(),
    }
}

/// Split `content` into pieces of at most `max` bytes on char boundaries.
fn chunks(content: &str, max: usize) -> Vec<&str> {
    let mut pieces = Vec::new();
    let mut rest = content;
    while !rest.is_empty() {
        let mut end = max.min(rest.len());
        while !rest.is_char_boundary(end) {
            end -= 1;
        }
        let (head, tail) = rest.split_at(end);
        pieces.push(head);
        rest = tail;
    }
    pieces
}

/// A stat command that succeeded but printed something unparseable is a
/// failure of that remote command, not of the transport.
fn stat_from_output(
    identity: &Identity,
    command: &str,
    path: &str,
    stdout: &str,
) -> Result<FileStat, SshError> {
    let line = stdout.trim();
    parse_stat(path, line).ok_or_else(|| {
        command_failure(identity, command, 0, format!("unexpected stat output: {}", line))
    })
}

/// Parse `ls -1Ap` output; directories carry a trailing `/`.
fn parse_listing(stdout: &str) -> Vec<DirEntry> {
    stdout
        .lines()
        .filter(|line| !line.is_empty())
        .map(|line| match line.strip_suffix('/') {
            Some(name) => DirEntry {
                name: name.to_string(),
                is_dir: true,
            },
            None => DirEntry {
                name: line.to_string(),
                is_dir: false,
            },
        })
        .collect()
}

/// Parse one `%F|%s|%a|%Y` line.
fn parse_stat(path: &str, line: &str) -> Option<FileStat> {
    let mut fields = line.split('|');
    let kind = FileKind::from_stat_description(fields.next()?);
    let size = fields.next()?.parse().ok()?;
    let mode = fields.next()?.to_string();
    let modified = fields.next()?.parse().ok()?;
    if fields.next().is_some() {
        return None;
    }
    Some(FileStat {
        path: path.to_string(),
        kind,
        size,
        mode,
        modified,
    })
}
