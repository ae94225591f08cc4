pub use client_json::client_config_json;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
/**
 * Trestle configuration root module.
 *
 * - Defines the immutable runtime configuration (`Config`) and its
 *   validation rules.
 * - Maps the `--authorization` flag onto the deployment mode.
 * - Uses `defaults.rs` for shared default constants.
 *
 * Configuration is built once from CLI arguments and environment
 * variables and never mutated afterwards.
 */
use std::time::Duration;
use thiserror::Error;

pub mod client_json;
pub mod defaults;

/// Client-facing MCP transport variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ClientTransport {
    /// One long-lived MCP session over the process's standard streams.
    Stdio,
    /// Streamable-HTTP endpoints served by the embedded HTTP server.
    #[default]
    #[value(name = "streamableHttp", alias = "streamable-http")]
    StreamableHttp,
}

/// Deployment mode of the bridge.
///
/// `Local` keeps a single plugin and broadcasts capability notifications
/// to every MCP session. `Remote` admits multiple plugins and scopes both
/// routing and notifications by bearer token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentMode {
    Local,
    Remote,
}

/// Value of the `--authorization` flag. `Auto` derives the mode from the
/// rest of the configuration (currently always `Local`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum AuthOption {
    None,
    Required,
    #[default]
    Auto,
}

/// Immutable runtime configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// HTTP listen port (streamable-HTTP transport only).
    pub port: u16,
    /// Per-call deadline for plugin RPC dispatch, in milliseconds.
    /// `0` means unbounded.
    pub plugin_timeout_ms: u64,
    /// Client-facing transport variant.
    pub client_transport: ClientTransport,
    /// Shared secret for the bearer scheme, if configured.
    pub token: Option<String>,
    /// Deployment mode, derived from the authorization option.
    pub mode: DeploymentMode,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: defaults::DEFAULT_PORT,
            plugin_timeout_ms: defaults::DEFAULT_PLUGIN_TIMEOUT_MS,
            client_transport: ClientTransport::default(),
            token: None,
            mode: DeploymentMode::Local,
        }
    }
}

impl Config {
    /// Build and validate a configuration from parsed CLI/env inputs.
    ///
    /// The deployment mode derives from `authorization`: `required` selects
    /// multi-tenant `remote`, everything else single-tenant `local`.
    pub fn build(
        port: u16,
        plugin_timeout_ms: u64,
        client_transport: ClientTransport,
        token: Option<String>,
        authorization: AuthOption,
    ) -> Result<Self, ConfigError> {
        // Normalize an empty token string to "unset".
        let token = token.filter(|t| !t.trim().is_empty());

        let mode = match authorization {
            AuthOption::Required => DeploymentMode::Remote,
            AuthOption::None | AuthOption::Auto => DeploymentMode::Local,
        };

        let config = Self {
            port,
            plugin_timeout_ms,
            client_transport,
            token,
            mode,
        };
        config.validate()?;
        Ok(config)
    }

    /// Validate invariants that clap cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.port == 0 {
            return Err(ConfigError::InvalidPort(self.port));
        }
        if self.mode == DeploymentMode::Remote && self.token.is_none() {
            return Err(ConfigError::RemoteRequiresToken);
        }
        Ok(())
    }

    /// Per-call deadline for plugin RPC dispatch. `None` when the
    /// configured timeout is `0` (unbounded).
    pub fn call_timeout(&self) -> Option<Duration> {
        match self.plugin_timeout_ms {
            0 => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }

    /// Window for out-of-band tool completion: the fixed tracking window,
    /// extended when the per-call deadline is configured longer.
    pub fn tracking_window(&self) -> Duration {
        match self.call_timeout() {
            Some(t) if t > crate::tracking::OUT_OF_BAND_WINDOW => t,
            _ => crate::tracking::OUT_OF_BAND_WINDOW,
        }
    }
}

// Errors during configuration validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Listen port outside the accepted range.
    #[error("invalid port {0}: must be in [1, 65535]")]
    InvalidPort(u16),

    /// `remote` deployment mode without a shared secret.
    #[error("remote deployment mode requires a non-empty token")]
    RemoteRequiresToken,
}
