// Config - Typed configuration with TOML overrides
//
// Every section has working defaults. A TOML file only needs the fields it
// changes; they are merged over the defaults and the result is validated.

use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::storage::{lookup_engine, RetryPolicy};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {reason}")]
    Read { path: String, reason: String },

    #[error("Failed to parse config file: {0}")]
    Parse(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

// ============================================================================
// SECTIONS
// ============================================================================

#[derive(Clone, Debug, Default, PartialEq)]
pub struct AppConfig {
    pub storage: StorageConfig,
    pub bank: BankConfig,
    pub scheduler: SchedulerConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug, PartialEq)]
pub struct StorageConfig {
    /// Registry name of the engine
    pub engine: String,
    /// Database location for persistent engines
    pub path: PathBuf,
    pub retry: RetryPolicy,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            engine: "memory".to_string(),
            path: PathBuf::from("hypecoin.db"),
            retry: RetryPolicy::default(),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct BankConfig {
    pub bookie_account: String,
    pub fee_account: String,
    pub mint_account: String,
    pub scholarship_account: String,
    pub subscription_account: String,
    pub min_overdraft_fee: i64,
    /// Fraction of the (positive) balance charged on a failed payment
    pub overdraft_fee_percent: f64,
    /// Ledger entries kept per account
    pub history_length: usize,
    pub transactions_shown: usize,
    pub min_mint: i64,
    /// Minting stops while the mint holds this share of circulation
    pub mint_reserve_fraction: f64,
    pub mint_scale: i64,
    pub bot_name: String,
}

impl Default for BankConfig {
    fn default() -> Self {
        Self {
            bookie_account: "hypebank".to_string(),
            fee_account: "hypebank".to_string(),
            mint_account: "hypebank".to_string(),
            scholarship_account: "hypescholarship".to_string(),
            subscription_account: "hypebank".to_string(),
            min_overdraft_fee: 5,
            overdraft_fee_percent: 0.05,
            history_length: 20,
            transactions_shown: 5,
            min_mint: 5000,
            mint_reserve_fraction: 0.25,
            mint_scale: 1000,
            bot_name: "hypebot".to_string(),
        }
    }
}

impl BankConfig {
    /// Accounts owned by the bot rather than users
    pub fn reserved_accounts(&self) -> [&str; 5] {
        [
            self.bookie_account.as_str(),
            self.fee_account.as_str(),
            self.mint_account.as_str(),
            self.scholarship_account.as_str(),
            self.subscription_account.as_str(),
        ]
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct SchedulerConfig {
    pub mint_interval_secs: u64,
    pub queue_interval_secs: u64,
    pub queue_batch_size: usize,
    /// Name of the queue drained by the scheduler
    pub payment_queue: String,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            mint_interval_secs: 3600,
            queue_interval_secs: 60,
            queue_batch_size: 10,
            payment_queue: "payments".to_string(),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct LoggingConfig {
    /// `EnvFilter` directive used when `RUST_LOG` is unset
    pub filter: String,
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "hypecoin=info".to_string(),
            json: false,
        }
    }
}

// ============================================================================
// OVERRIDES
// ============================================================================

/// Partial configuration as written in a TOML file
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConfigOverrides {
    pub storage: StorageOverrides,
    pub bank: BankOverrides,
    pub scheduler: SchedulerOverrides,
    pub logging: LoggingOverrides,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StorageOverrides {
    pub engine: Option<String>,
    pub path: Option<PathBuf>,
    pub retry: RetryOverrides,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RetryOverrides {
    pub max_attempts: Option<u32>,
    pub base_delay_ms: Option<u64>,
    pub jitter_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BankOverrides {
    pub bookie_account: Option<String>,
    pub fee_account: Option<String>,
    pub mint_account: Option<String>,
    pub scholarship_account: Option<String>,
    pub subscription_account: Option<String>,
    pub min_overdraft_fee: Option<i64>,
    pub overdraft_fee_percent: Option<f64>,
    pub history_length: Option<usize>,
    pub transactions_shown: Option<usize>,
    pub min_mint: Option<i64>,
    pub mint_reserve_fraction: Option<f64>,
    pub mint_scale: Option<i64>,
    pub bot_name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SchedulerOverrides {
    pub mint_interval_secs: Option<u64>,
    pub queue_interval_secs: Option<u64>,
    pub queue_batch_size: Option<usize>,
    pub payment_queue: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingOverrides {
    pub filter: Option<String>,
    pub json: Option<bool>,
}

impl ConfigOverrides {
    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        toml::from_str(contents).map_err(|e| ConfigError::Parse(e.to_string()))
    }
}

fn merge<T>(slot: &mut T, value: Option<T>) {
    if let Some(value) = value {
        *slot = value;
    }
}

// ============================================================================
// LOADING
// ============================================================================

impl AppConfig {
    /// Defaults merged with the overrides in `path`
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        let config = Self::default().merged(ConfigOverrides::from_toml(contents)?);
        config.validate()?;
        Ok(config)
    }

    pub fn merged(mut self, overrides: ConfigOverrides) -> Self {
        let ConfigOverrides {
            storage,
            bank,
            scheduler,
            logging,
        } = overrides;

        merge(&mut self.storage.engine, storage.engine);
        merge(&mut self.storage.path, storage.path);
        merge(&mut self.storage.retry.max_attempts, storage.retry.max_attempts);
        merge(&mut self.storage.retry.base_delay_ms, storage.retry.base_delay_ms);
        merge(&mut self.storage.retry.jitter_ms, storage.retry.jitter_ms);

        merge(&mut self.bank.bookie_account, bank.bookie_account);
        merge(&mut self.bank.fee_account, bank.fee_account);
        merge(&mut self.bank.mint_account, bank.mint_account);
        merge(&mut self.bank.scholarship_account, bank.scholarship_account);
        merge(&mut self.bank.subscription_account, bank.subscription_account);
        merge(&mut self.bank.min_overdraft_fee, bank.min_overdraft_fee);
        merge(&mut self.bank.overdraft_fee_percent, bank.overdraft_fee_percent);
        merge(&mut self.bank.history_length, bank.history_length);
        merge(&mut self.bank.transactions_shown, bank.transactions_shown);
        merge(&mut self.bank.min_mint, bank.min_mint);
        merge(&mut self.bank.mint_reserve_fraction, bank.mint_reserve_fraction);
        merge(&mut self.bank.mint_scale, bank.mint_scale);
        merge(&mut self.bank.bot_name, bank.bot_name);

        merge(&mut self.scheduler.mint_interval_secs, scheduler.mint_interval_secs);
        merge(&mut self.scheduler.queue_interval_secs, scheduler.queue_interval_secs);
        merge(&mut self.scheduler.queue_batch_size, scheduler.queue_batch_size);
        merge(&mut self.scheduler.payment_queue, scheduler.payment_queue);

        merge(&mut self.logging.filter, logging.filter);
        merge(&mut self.logging.json, logging.json);
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if lookup_engine(&self.storage.engine).is_none() {
            return Err(ConfigError::Invalid(format!(
                "unknown storage engine '{}'",
                self.storage.engine
            )));
        }
        if self.storage.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid("retry.max_attempts must be at least 1".into()));
        }
        if !(0.0..=1.0).contains(&self.bank.overdraft_fee_percent) {
            return Err(ConfigError::Invalid("overdraft_fee_percent must be within [0, 1]".into()));
        }
        if !(0.0..=1.0).contains(&self.bank.mint_reserve_fraction) {
            return Err(ConfigError::Invalid("mint_reserve_fraction must be within [0, 1]".into()));
        }
        if self.bank.min_overdraft_fee < 0 || self.bank.min_mint < 0 || self.bank.mint_scale < 0 {
            return Err(ConfigError::Invalid("bank amounts must not be negative".into()));
        }
        if self.scheduler.mint_interval_secs == 0 || self.scheduler.queue_interval_secs == 0 {
            return Err(ConfigError::Invalid("scheduler intervals must be positive".into()));
        }
        Ok(())
    }
}
