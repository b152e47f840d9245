use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Endpoint of the signaling server.
    pub signaling_url: String,
    /// Base directory for the keystore and registries.
    pub data_dir: PathBuf,
    /// Deadline for the proposal acceptance phase.
    pub proposal_timeout_ms: u64,
    /// Deadline per DKG round (also covers mesh formation).
    pub dkg_round_timeout_ms: u64,
    /// Deadline per signing phase.
    pub signing_round_timeout_ms: u64,
    /// Signaling reconnect schedule.
    pub reconnect_backoff_initial_ms: u64,
    pub reconnect_backoff_max_ms: u64,
    /// Cap on messages queued for not-yet-known sessions.
    pub buffered_msg_limit: usize,
    /// Defaults for new proposals.
    pub default_threshold: u16,
    pub default_total: u16,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            signaling_url: "wss://auto-life.tech".to_string(),
            data_dir: dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("frost-wallet"),
            proposal_timeout_ms: 60_000,
            dkg_round_timeout_ms: 120_000,
            signing_round_timeout_ms: 60_000,
            reconnect_backoff_initial_ms: 1_000,
            reconnect_backoff_max_ms: 30_000,
            buffered_msg_limit: 256,
            default_threshold: 2,
            default_total: 3,
        }
    }
}

impl NodeConfig {
    /// Reads `node.toml` from the platform config directory, writing the
    /// defaults on first run. The configured data directory is created as
    /// part of loading, so the result can go straight into `Node::init`.
    pub async fn load_or_create() -> Result<Self> {
        let path = dirs::config_dir()
            .context("Could not determine config directory")?
            .join("frost-wallet/node.toml");

        let config = match tokio::fs::read_to_string(&path).await {
            Ok(text) => toml::from_str(&text)
                .with_context(|| format!("malformed config at {}", path.display()))?,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                let config = NodeConfig::default();
                if let Some(parent) = path.parent() {
                    tokio::fs::create_dir_all(parent).await?;
                }
                tokio::fs::write(&path, toml::to_string_pretty(&config)?).await?;
                config
            }
            Err(e) => {
                return Err(anyhow::anyhow!("failed to read {}: {e}", path.display()));
            }
        };

        tokio::fs::create_dir_all(&config.data_dir).await?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_schedule() {
        let config = NodeConfig::default();
        assert_eq!(config.proposal_timeout_ms, 60_000);
        assert_eq!(config.dkg_round_timeout_ms, 120_000);
        assert_eq!(config.signing_round_timeout_ms, 60_000);
        assert_eq!(config.buffered_msg_limit, 256);
        assert!(config.default_threshold <= config.default_total);
    }

    #[test]
    fn test_toml_roundtrip() {
        let config = NodeConfig::default();
        let text = toml::to_string_pretty(&config).unwrap();
        let parsed: NodeConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed.signaling_url, config.signaling_url);
        assert_eq!(parsed.reconnect_backoff_max_ms, config.reconnect_backoff_max_ms);
    }
}
