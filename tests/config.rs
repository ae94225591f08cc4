use trestle::config::{
    AuthOption, ClientTransport, Config, ConfigError, DeploymentMode, client_config_json,
};

fn build(
    port: u16,
    timeout: u64,
    token: Option<&str>,
    auth: AuthOption,
) -> Result<Config, ConfigError> {
    Config::build(
        port,
        timeout,
        ClientTransport::StreamableHttp,
        token.map(str::to_string),
        auth,
    )
}

/// Default construction: port 8080, 10 s plugin timeout, streamable-http,
/// local mode.
#[test]
fn defaults_match_documented_values() {
    let cfg = Config::default();
    assert_eq!(cfg.port, 8080);
    assert_eq!(cfg.plugin_timeout_ms, 10_000);
    assert_eq!(cfg.client_transport, ClientTransport::StreamableHttp);
    assert_eq!(cfg.mode, DeploymentMode::Local);
    assert!(cfg.token.is_none());
}

/// Remote mode is selected by `--authorization required` and refuses to
/// start without a token.
#[test]
fn remote_mode_requires_token() {
    let err = build(8080, 10_000, None, AuthOption::Required).unwrap_err();
    assert!(matches!(err, ConfigError::RemoteRequiresToken));

    let cfg = build(8080, 10_000, Some("secret"), AuthOption::Required).unwrap();
    assert_eq!(cfg.mode, DeploymentMode::Remote);
}

/// Port must stay inside [1, 65535]; the upper bound is enforced by the
/// u16 type, zero is rejected explicitly.
#[test]
fn port_bounds() {
    assert!(matches!(
        build(0, 10_000, None, AuthOption::Auto).unwrap_err(),
        ConfigError::InvalidPort(0)
    ));
    assert!(build(1, 10_000, None, AuthOption::Auto).is_ok());
    assert!(build(65535, 10_000, None, AuthOption::Auto).is_ok());
}

/// A plugin timeout of zero is documented as "unbounded": no per-call
/// deadline is applied.
#[test]
fn zero_plugin_timeout_is_unbounded() {
    let cfg = build(8080, 0, None, AuthOption::Auto).unwrap();
    assert_eq!(cfg.call_timeout(), None);
}

/// The generated client config tree nests the server entry under each
/// `->`-separated body path segment.
#[test]
fn client_config_tree_shape() {
    let cfg = build(9001, 5_000, None, AuthOption::Auto).unwrap();

    let tree = client_config_json(&cfg, "/opt/bridge", None, None);
    let entry = &tree["mcpServers"]["McpPlugin"];
    assert_eq!(entry["type"], "stdio");
    assert_eq!(entry["command"], "/opt/bridge");
    assert_eq!(entry["args"][0], "--port=9001");
    assert_eq!(entry["args"][1], "--plugin-timeout=5000");
    assert_eq!(entry["args"][2], "--client-transport=stdio");

    let nested = client_config_json(&cfg, "bridge", Some("a->b"), Some("svc"));
    assert!(nested["a"]["b"]["svc"].is_object());
}
