//! Server identity constants reported over MCP.

pub const MCP_SERVER_INFO_NAME: &str = "trestle";
pub const MCP_SERVER_INFO_TITLE: &str = "Trestle MCP bridge";
pub const MCP_SERVER_INFO_VERSION: &str = env!("CARGO_PKG_VERSION");
