//! Generator for MCP client configuration snippets.
//!
//! Emits the JSON tree an MCP client (desktop agent) pastes into its own
//! configuration to launch this bridge over stdio. The body path is a
//! `"->"`-separated chain of object keys, `"mcpServers"` by default.

use crate::config::{Config, defaults};
use serde_json::{Value, json};

/// Build the client configuration tree.
///
/// `body_path` segments are split on `"->"`; each segment becomes one
/// nesting level, with the server entry at the innermost level.
pub fn client_config_json(
    config: &Config,
    command: &str,
    body_path: Option<&str>,
    server_name: Option<&str>,
) -> Value {
    let server_name = server_name.unwrap_or(defaults::DEFAULT_CLIENT_CONFIG_SERVER_NAME);
    let body_path = body_path.unwrap_or(defaults::DEFAULT_CLIENT_CONFIG_BODY_PATH);

    let entry = json!({
        "type": "stdio",
        "command": command,
        "args": [
            format!("--port={}", config.port),
            format!("--plugin-timeout={}", config.plugin_timeout_ms),
            "--client-transport=stdio",
        ],
    });

    let mut tree = json!({ server_name: entry });
    for segment in body_path.rsplit("->") {
        let key = segment.trim();
        if key.is_empty() {
            continue;
        }
        tree = json!({ key: tree });
    }
    tree
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_body_path_nests_under_mcp_servers() {
        let config = Config {
            port: 9000,
            plugin_timeout_ms: 2_000,
            ..Config::default()
        };
        let tree = client_config_json(&config, "/usr/bin/trestle", None, None);

        let entry = &tree["mcpServers"]["McpPlugin"];
        assert_eq!(entry["type"], "stdio");
        assert_eq!(entry["command"], "/usr/bin/trestle");
        assert_eq!(
            entry["args"],
            serde_json::json!([
                "--port=9000",
                "--plugin-timeout=2000",
                "--client-transport=stdio"
            ])
        );
    }

    #[test]
    fn arrow_separated_body_path_nests_each_segment() {
        let config = Config::default();
        let tree = client_config_json(&config, "trestle", Some("settings->mcp->servers"), Some("bridge"));

        assert!(tree["settings"]["mcp"]["servers"]["bridge"].is_object());
    }
}
