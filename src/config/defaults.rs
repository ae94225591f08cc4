/// Configuration defaults.
///
/// Default value helpers and constants shared by the config structs and
/// the CLI argument definitions, so both layers agree on the same values.

/// Default HTTP listen port for the streamable-HTTP transport.
pub const DEFAULT_PORT: u16 = 8080;

/// Default per-call deadline for plugin RPC dispatch, in milliseconds.
pub const DEFAULT_PLUGIN_TIMEOUT_MS: u64 = 10_000;

/// Path of the MCP session endpoint mounted next to the root endpoint.
pub const MCP_ENDPOINT_PATH: &str = "/mcp";

/// Path of the plugin channel endpoint.
pub const HUB_ENDPOINT_PATH: &str = "/hub/mcp-server";

/// Default body path for the generated MCP client configuration tree.
pub const DEFAULT_CLIENT_CONFIG_BODY_PATH: &str = "mcpServers";

/// Default server name in the generated MCP client configuration tree.
pub const DEFAULT_CLIENT_CONFIG_SERVER_NAME: &str = "McpPlugin";
