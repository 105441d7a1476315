//! Configuration management for the burst relayer
//!
//! Loads configuration from TOML files with environment variable substitution.

use anyhow::{Context, Result};
use ethers::types::Address;
use serde::Deserialize;
use std::env;
use std::path::PathBuf;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub dispatcher: DispatcherConfig,
    pub chain: ChainConfig,
    pub wallet: WalletConfig,
    pub api: ApiConfig,
    pub metrics: MetricsConfig,
}

/// Tuning for the dispatch pipeline. All durations are milliseconds.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Coalescing window before a flush fires.
    pub window_ms: u64,
    /// Batch-size ceiling, shared by the coalescer and the dispatch queue.
    pub max_units: u32,
    /// Hard upper bound on batch submissions per second.
    pub rate_per_second: u32,
    pub receipt_poll_interval_ms: u64,
    pub receipt_poll_attempts: u32,
    pub backoff_seed_ms: u64,
    pub backoff_cap_ms: u64,
    /// Fee multiplier in basis points used by the fallback unit-price formula.
    pub fee_multiplier_bps: u64,
    pub rbf_poll_interval_ms: u64,
    /// How long each RBF round polls before bumping fees and resubmitting.
    pub rbf_escalation_interval_ms: u64,
    pub deadline_default_ms: u64,
    pub deadline_max_ms: u64,
    pub max_in_flight_sends: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            window_ms: 200,
            max_units: 64,
            rate_per_second: 2,
            receipt_poll_interval_ms: 500,
            receipt_poll_attempts: 60,
            backoff_seed_ms: 1_000,
            backoff_cap_ms: 10_000,
            fee_multiplier_bps: 10_000,
            rbf_poll_interval_ms: 80,
            rbf_escalation_interval_ms: 2_000,
            deadline_default_ms: 8_000,
            deadline_max_ms: 30_000,
            max_in_flight_sends: 1,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChainConfig {
    pub chain_id: u64,
    pub rpc_urls: Vec<String>,
    /// Batch router contract that accepts `executeBatch(uint256)`.
    pub router_address: String,
    /// Action contract queried for the current unit price.
    pub target_address: String,
    pub max_gas_price_gwei: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WalletConfig {
    /// Name of the environment variable holding the signing key.
    pub private_key_env: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub port: u16,
}

impl Settings {
    /// Load settings from configuration files
    pub fn load() -> Result<Self> {
        let config_path = env::var("BURST_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config/default.toml"));

        let config_str = std::fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {:?}", config_path))?;

        // Substitute environment variables
        let config_str = substitute_env_vars(&config_str);

        let settings: Settings =
            toml::from_str(&config_str).with_context(|| "Failed to parse configuration")?;

        settings.validate()?;

        Ok(settings)
    }

    /// Validate configuration
    fn validate(&self) -> Result<()> {
        let d = &self.dispatcher;
        if d.rate_per_second == 0 {
            anyhow::bail!("dispatcher.rate_per_second must be at least 1");
        }
        if d.max_units == 0 {
            anyhow::bail!("dispatcher.max_units must be at least 1");
        }
        if d.window_ms == 0 {
            anyhow::bail!("dispatcher.window_ms must be at least 1");
        }
        if d.max_in_flight_sends == 0 {
            anyhow::bail!("dispatcher.max_in_flight_sends must be at least 1");
        }
        if d.deadline_default_ms > d.deadline_max_ms {
            anyhow::bail!("dispatcher.deadline_default_ms exceeds deadline_max_ms");
        }

        if self.chain.rpc_urls.is_empty() {
            anyhow::bail!("chain has no RPC URLs configured");
        }
        self.chain
            .router_address
            .parse::<Address>()
            .with_context(|| "chain.router_address is not a valid address")?;
        self.chain
            .target_address
            .parse::<Address>()
            .with_context(|| "chain.target_address is not a valid address")?;

        Ok(())
    }
}

/// Substitute environment variables in the format ${VAR_NAME}
fn substitute_env_vars(input: &str) -> String {
    let mut result = input.to_string();
    let re = regex::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}").unwrap();

    for cap in re.captures_iter(input) {
        let var_name = &cap[1];
        let var_value = env::var(var_name).unwrap_or_default();
        result = result.replace(&cap[0], &var_value);
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_var_substitution() {
        env::set_var("TEST_VAR", "test_value");
        let input = "url = \"https://api.example.com/${TEST_VAR}/endpoint\"";
        let result = substitute_env_vars(input);
        assert_eq!(result, "url = \"https://api.example.com/test_value/endpoint\"");
    }

    #[test]
    fn dispatcher_defaults_match_pipeline_contract() {
        let d = DispatcherConfig::default();
        assert_eq!(d.window_ms, 200);
        assert_eq!(d.max_units, 64);
        assert_eq!(d.rate_per_second, 2);
        assert_eq!(d.receipt_poll_attempts, 60);
        assert_eq!(d.backoff_seed_ms, 1_000);
        assert_eq!(d.backoff_cap_ms, 10_000);
        assert_eq!(d.max_in_flight_sends, 1);
    }

    #[test]
    fn loads_settings_from_the_configured_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("relayer.toml");
        std::fs::write(
            &path,
            r#"
            [dispatcher]
            rate_per_second = 4

            [chain]
            chain_id = 6342
            rpc_urls = ["http://localhost:8545"]
            router_address = "0x0000000000000000000000000000000000000002"
            target_address = "0x0000000000000000000000000000000000000001"
            max_gas_price_gwei = 500

            [wallet]

            [api]
            host = "127.0.0.1"
            port = 8080

            [metrics]
            enabled = false
            port = 9090
            "#,
        )
        .unwrap();

        env::set_var("BURST_CONFIG", &path);
        let settings = Settings::load().unwrap();
        env::remove_var("BURST_CONFIG");

        assert_eq!(settings.chain.chain_id, 6342);
        assert_eq!(settings.dispatcher.rate_per_second, 4);
        // Omitted dispatcher fields keep their defaults.
        assert_eq!(settings.dispatcher.window_ms, 200);
        assert_eq!(settings.dispatcher.max_units, 64);
    }

    #[test]
    fn rejects_invalid_addresses() {
        let toml = r#"
            [chain]
            chain_id = 6342
            rpc_urls = ["http://localhost:8545"]
            router_address = "not-an-address"
            target_address = "0x0000000000000000000000000000000000000001"
            max_gas_price_gwei = 500

            [wallet]

            [api]
            host = "127.0.0.1"
            port = 8080

            [metrics]
            enabled = false
            port = 9090
        "#;
        let settings: Settings = toml::from_str(toml).unwrap();
        assert!(settings.validate().is_err());
    }
}
