use config::ConfigError;

use crate::engine::strkey;

const MIN_BASE_FEE: u32 = 100;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub horizon_url: String,
    pub network_passphrase: String,
    pub distribution_seed: String,
    pub channel_encryption_passphrase: String,
    pub num_channel_accounts: usize,
    pub queue_polling_interval_secs: u64,
    pub max_base_fee: u32,
    pub bundles_selection_limit_floor: usize,
    pub indeterminate_responses_tolerance: usize,
    pub response_window_minutes: i64,
    pub ledger_bounds_increment: i32,
    pub max_ledger_age_secs: u64,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let distribution_seed = std::env::var("DISTRIBUTION_SEED").unwrap_or_default();
        Ok(Self {
            database_url: std::env::var("DATABASE_URL")
                .unwrap_or_else(|_| "postgresql://localhost/submitter".to_string()),
            horizon_url: std::env::var("HORIZON_URL")
                .unwrap_or_else(|_| "https://horizon-testnet.stellar.org".to_string()),
            network_passphrase: std::env::var("NETWORK_PASSPHRASE")
                .unwrap_or_else(|_| "Test SDF Network ; September 2015".to_string()),
            // Seed reuse keeps single-secret deployments working; a dedicated
            // passphrase is still the recommended setup.
            channel_encryption_passphrase: std::env::var("CHANNEL_ACCOUNT_ENCRYPTION_PASSPHRASE")
                .unwrap_or_else(|_| distribution_seed.clone()),
            distribution_seed,
            num_channel_accounts: parse_var("NUM_CHANNEL_ACCOUNTS", "5")?,
            queue_polling_interval_secs: parse_var("QUEUE_POLLING_INTERVAL_SECS", "10")?,
            max_base_fee: parse_var("MAX_BASE_FEE", "10000")?,
            bundles_selection_limit_floor: parse_var("BUNDLES_SELECTION_LIMIT_FLOOR", "8")?,
            indeterminate_responses_tolerance: parse_var("INDETERMINATE_RESPONSES_TOLERANCE", "10")?,
            response_window_minutes: parse_var("RESPONSE_WINDOW_MINUTES", "3")?,
            ledger_bounds_increment: parse_var("LEDGER_BOUNDS_INCREMENT", "10")?,
            max_ledger_age_secs: parse_var("MAX_LEDGER_AGE_SECONDS", "10")?,
        })
    }

    /// Rejects configurations the submission pipeline cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if strkey::decode_secret_seed(&self.distribution_seed).is_err() {
            return Err(ConfigError::Message(
                "DISTRIBUTION_SEED is not a valid Stellar secret seed".to_string(),
            ));
        }
        if self.channel_encryption_passphrase.is_empty() {
            return Err(ConfigError::Message(
                "CHANNEL_ACCOUNT_ENCRYPTION_PASSPHRASE must be set".to_string(),
            ));
        }
        if self.num_channel_accounts < 1 || self.num_channel_accounts > 1000 {
            return Err(ConfigError::Message(
                "NUM_CHANNEL_ACCOUNTS must be between 1 and 1000".to_string(),
            ));
        }
        // Ledgers close roughly every 5 seconds; polling faster than that
        // re-reads rows whose locks have not expired yet.
        if self.queue_polling_interval_secs <= 6 {
            return Err(ConfigError::Message(
                "QUEUE_POLLING_INTERVAL_SECS must be greater than 6".to_string(),
            ));
        }
        if self.max_base_fee < MIN_BASE_FEE {
            return Err(ConfigError::Message(format!(
                "MAX_BASE_FEE must be at least {} stroops",
                MIN_BASE_FEE
            )));
        }
        if self.bundles_selection_limit_floor < 1 {
            return Err(ConfigError::Message(
                "BUNDLES_SELECTION_LIMIT_FLOOR must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_var<T: std::str::FromStr>(name: &str, default: &str) -> Result<T, ConfigError> {
    std::env::var(name)
        .unwrap_or_else(|_| default.to_string())
        .parse()
        .map_err(|_| ConfigError::Message(format!("{} must be a number", name)))
}
