use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, bail};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::core_types::AccountNumber;
use crate::interbank::{BankPrefixes, CoordinatorConfig, QueueTopology, WorkerConfig};
use crate::ledger::{Account, AccountKind};
use crate::money::Currency;

/// Overrides `interbank.counterparty.api_token` when set
pub const COUNTERPARTY_TOKEN_ENV: &str = "INTERBANK_COUNTERPARTY_TOKEN";

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AppConfig {
    pub log_level: String,
    pub log_dir: String,
    pub log_file: String,
    pub use_json: bool,
    pub rotation: String,
    pub enable_tracing: bool,
    pub http: HttpConfig,
    /// PostgreSQL connection URL; in-memory stores when absent
    #[serde(default)]
    pub postgres_url: Option<String>,
    pub interbank: InterbankConfig,
    /// Accounts opened at startup (existing ones are left untouched)
    #[serde(default)]
    pub accounts: Vec<SeedAccount>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct SeedAccount {
    pub number: AccountNumber,
    pub kind: AccountKind,
    pub currency: Currency,
    pub balance: Decimal,
}

impl SeedAccount {
    pub fn to_account(&self) -> Account {
        Account::new(
            self.number.clone(),
            self.kind,
            self.currency.clone(),
            self.balance,
        )
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct HttpConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct InterbankConfig {
    /// Delay between reservation and settlement
    #[serde(default = "default_cool_down_ms")]
    pub cool_down_ms: u64,
    pub local_bank_prefix: String,
    pub counterparty_bank_prefix: String,
    pub counterparty: CounterpartyConfig,
    /// How often the config file is re-read for a rotated credential
    #[serde(default = "default_credential_reload_ms")]
    pub credential_reload_ms: u64,
    #[serde(default)]
    pub queue: QueueTopology,
    #[serde(default)]
    pub recovery: RecoveryConfig,
}

fn default_cool_down_ms() -> u64 {
    900_000
}

fn default_credential_reload_ms() -> u64 {
    60_000
}

/// Counterparty bank endpoint and credentials
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CounterpartyConfig {
    pub base_url: String,
    /// Per-call timeout; expiry counts as a decline at prepare
    pub request_timeout_ms: u64,
    #[serde(default)]
    pub api_token: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct RecoveryConfig {
    pub scan_interval_ms: u64,
    pub stale_grace_ms: u64,
    pub batch_size: usize,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            scan_interval_ms: 30_000,
            stale_grace_ms: 60_000,
            batch_size: 100,
        }
    }
}

impl AppConfig {
    /// `config/<env>.yaml`
    pub fn path_for(env: &str) -> PathBuf {
        PathBuf::from(format!("config/{}.yaml", env))
    }

    pub fn load(env: &str) -> anyhow::Result<Self> {
        let config_path = Self::path_for(env);
        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;
        let token = std::env::var(COUNTERPARTY_TOKEN_ENV).ok();
        Self::from_yaml(&content, token)
            .with_context(|| format!("Invalid config file: {}", config_path.display()))
    }

    /// Parse and validate; `token_override` replaces the configured credential
    pub fn from_yaml(content: &str, token_override: Option<String>) -> anyhow::Result<Self> {
        let mut config: AppConfig =
            serde_yaml::from_str(content).context("Failed to parse config yaml")?;

        if let Some(token) = token_override.filter(|t| !t.is_empty()) {
            config.interbank.counterparty.api_token = token;
        }
        // The delay queue TTL is the cool-down
        config.interbank.queue.message_ttl_ms = config.interbank.cool_down_ms;

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        let ib = &self.interbank;
        if ib.cool_down_ms == 0 {
            bail!("interbank.cool_down_ms must be greater than zero");
        }
        if ib.counterparty.request_timeout_ms == 0 {
            bail!("interbank.counterparty.request_timeout_ms must be greater than zero");
        }
        if ib.credential_reload_ms == 0 {
            bail!("interbank.credential_reload_ms must be greater than zero");
        }
        if ib.recovery.scan_interval_ms == 0 || ib.recovery.stale_grace_ms == 0 {
            bail!("interbank.recovery intervals must be greater than zero");
        }
        if ib.recovery.batch_size == 0 {
            bail!("interbank.recovery.batch_size must be greater than zero");
        }
        for (name, prefix) in [
            ("local_bank_prefix", &ib.local_bank_prefix),
            ("counterparty_bank_prefix", &ib.counterparty_bank_prefix),
        ] {
            if prefix.len() != 3 || !prefix.chars().all(|c| c.is_ascii_digit()) {
                bail!("interbank.{} must be 3 digits, got {:?}", name, prefix);
            }
        }
        if ib.local_bank_prefix == ib.counterparty_bank_prefix {
            bail!("interbank bank prefixes must differ");
        }
        if ib.counterparty.base_url.is_empty() {
            bail!("interbank.counterparty.base_url is required");
        }
        if ib.queue.capacity == 0 {
            bail!("interbank.queue.capacity must be greater than zero");
        }
        for seed in &self.accounts {
            if !seed.number.is_held_by(&ib.local_bank_prefix) {
                bail!("seed account {} is not held by this bank", seed.number);
            }
            if seed.balance < Decimal::ZERO {
                bail!("seed account {} has a negative balance", seed.number);
            }
        }
        Ok(())
    }
}

impl InterbankConfig {
    pub fn coordinator_config(&self) -> CoordinatorConfig {
        CoordinatorConfig {
            cool_down: Duration::from_millis(self.cool_down_ms),
            prefixes: BankPrefixes {
                local: self.local_bank_prefix.clone(),
                counterparty: self.counterparty_bank_prefix.clone(),
            },
        }
    }

    pub fn worker_config(&self) -> WorkerConfig {
        WorkerConfig {
            scan_interval: Duration::from_millis(self.recovery.scan_interval_ms),
            stale_grace: Duration::from_millis(self.recovery.stale_grace_ms),
            batch_size: self.recovery.batch_size,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const YAML: &str = r#"
log_level: info
log_dir: ./logs
log_file: interbank.log
use_json: false
rotation: daily
enable_tracing: true
http:
  host: 127.0.0.1
  port: 8080
interbank:
  local_bank_prefix: "111"
  counterparty_bank_prefix: "222"
  counterparty:
    base_url: http://localhost:9090/api/interbank
    request_timeout_ms: 5000
    api_token: from-file
"#;

    #[test]
    fn test_defaults_applied() {
        let config = AppConfig::from_yaml(YAML, None).unwrap();
        assert_eq!(config.interbank.cool_down_ms, 900_000);
        assert_eq!(config.interbank.queue.process_queue, "interbank.process.queue");
        assert_eq!(config.interbank.queue.message_ttl_ms, 900_000);
        assert_eq!(config.interbank.credential_reload_ms, 60_000);
        assert!(config.postgres_url.is_none());

        let coordinator = config.interbank.coordinator_config();
        assert_eq!(coordinator.cool_down, Duration::from_secs(900));
        assert_eq!(coordinator.prefixes.counterparty, "222");

        let worker = config.interbank.worker_config();
        assert_eq!(worker.scan_interval, Duration::from_secs(30));
        assert_eq!(worker.batch_size, 100);
    }

    #[test]
    fn test_queue_ttl_follows_cool_down() {
        let yaml = YAML.replace("interbank:\n", "interbank:\n  cool_down_ms: 1000\n");
        let config = AppConfig::from_yaml(&yaml, None).unwrap();
        assert_eq!(config.interbank.queue.message_ttl_ms, 1000);
    }

    #[test]
    fn test_token_override() {
        let config = AppConfig::from_yaml(YAML, Some("from-env".to_string())).unwrap();
        assert_eq!(config.interbank.counterparty.api_token, "from-env");

        let config = AppConfig::from_yaml(YAML, Some(String::new())).unwrap();
        assert_eq!(config.interbank.counterparty.api_token, "from-file");
    }

    #[test]
    fn test_timeout_required() {
        let yaml = YAML.replace("    request_timeout_ms: 5000\n", "");
        assert!(AppConfig::from_yaml(&yaml, None).is_err());

        let yaml = YAML.replace("request_timeout_ms: 5000", "request_timeout_ms: 0");
        assert!(AppConfig::from_yaml(&yaml, None).is_err());
    }

    #[test]
    fn test_rejects_bad_prefix() {
        let yaml = YAML.replace("counterparty_bank_prefix: \"222\"", "counterparty_bank_prefix: \"22x\"");
        assert!(AppConfig::from_yaml(&yaml, None).is_err());

        let yaml = YAML.replace("counterparty_bank_prefix: \"222\"", "counterparty_bank_prefix: \"111\"");
        assert!(AppConfig::from_yaml(&yaml, None).is_err());
    }

    #[test]
    fn test_seed_accounts() {
        let yaml = format!(
            "{}accounts:\n  - number: \"111000100000000011\"\n    kind: PERSONAL\n    currency: RSD\n    balance: \"1000.00\"\n",
            YAML
        );
        let config = AppConfig::from_yaml(&yaml, None).unwrap();
        let account = config.accounts[0].to_account();
        assert_eq!(account.kind, AccountKind::Personal);
        assert_eq!(account.available_balance, Decimal::from(1000));

        // Foreign accounts cannot be seeded
        let yaml = yaml.replace("111000100000000011", "222000100000000011");
        assert!(AppConfig::from_yaml(&yaml, None).is_err());
    }

    #[test]
    fn test_rejects_zero_cool_down() {
        let yaml = YAML.replace("interbank:\n", "interbank:\n  cool_down_ms: 0\n");
        assert!(AppConfig::from_yaml(&yaml, None).is_err());
    }
}
