//! SSH connection pooling with password-to-key credential bootstrap,
//! exposed as MCP tools.

pub mod mcp;
