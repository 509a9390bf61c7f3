//! Runtime configuration, read from environment variables.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::domain::{GasSchedule, DEFAULT_CIRCUIT};
use crate::infra::{Result, SnarkjsConfig, VcaError};

/// Ledger, document and toolchain settings.
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory holding VCA documents, rollups and proof artifacts
    pub proofs_dir: PathBuf,
    /// Directory holding compiled circuit artifacts
    pub build_dir: PathBuf,
    pub circuit_name: String,
    /// SQLite URL of the ledger database
    pub ledger_url: String,
    /// Bound on each proving toolchain call
    pub prover_timeout: Duration,
    /// How long a consent prompt waits for the human
    pub consent_timeout: Duration,
    pub gas: GasSchedule,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            proofs_dir: PathBuf::from("proofs"),
            build_dir: PathBuf::from("build"),
            circuit_name: DEFAULT_CIRCUIT.to_string(),
            ledger_url: "sqlite://ledger.db".to_string(),
            prover_timeout: Duration::from_secs(120),
            consent_timeout: Duration::from_secs(300),
            gas: GasSchedule::default(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup. Unset keys take
    /// their defaults; a set but unparseable number is a `Configuration` error.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let parse = |key: &str| -> Result<Option<u64>> {
            lookup(key).map(|raw| parse_value(key, &raw)).transpose()
        };

        let config = Self {
            proofs_dir: lookup("VCA_PROOFS_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.proofs_dir),
            build_dir: lookup("VCA_BUILD_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.build_dir),
            circuit_name: lookup("VCA_CIRCUIT_NAME").unwrap_or(defaults.circuit_name),
            ledger_url: lookup("VCA_LEDGER_URL").unwrap_or(defaults.ledger_url),
            prover_timeout: parse("VCA_PROVER_TIMEOUT_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.prover_timeout),
            consent_timeout: parse("VCA_CONSENT_TIMEOUT_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.consent_timeout),
            gas: GasSchedule {
                per_tx_gas: parse("VCA_GAS_PER_TX")?.unwrap_or(defaults.gas.per_tx_gas),
                batch_overhead_gas: parse("VCA_GAS_BATCH_OVERHEAD")?
                    .unwrap_or(defaults.gas.batch_overhead_gas),
                per_item_gas: parse("VCA_GAS_PER_ITEM")?.unwrap_or(defaults.gas.per_item_gas),
            },
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.prover_timeout.is_zero() {
            return Err(VcaError::Configuration(
                "VCA_PROVER_TIMEOUT_SECS must be greater than zero".into(),
            ));
        }
        if self.consent_timeout.is_zero() {
            return Err(VcaError::Configuration(
                "VCA_CONSENT_TIMEOUT_SECS must be greater than zero".into(),
            ));
        }
        if self.circuit_name.trim().is_empty() {
            return Err(VcaError::Configuration("VCA_CIRCUIT_NAME is empty".into()));
        }
        Ok(())
    }

    /// Toolchain settings derived from this configuration
    pub fn snarkjs(&self) -> SnarkjsConfig {
        SnarkjsConfig {
            build_dir: self.build_dir.clone(),
            proofs_dir: self.proofs_dir.clone(),
            circuit: self.circuit_name.clone(),
            timeout: self.prover_timeout,
            ..SnarkjsConfig::default()
        }
    }
}

/// Parse a single value, naming the key on failure.
pub fn parse_value<T: FromStr>(key: &str, raw: &str) -> Result<T> {
    raw.trim()
        .parse()
        .map_err(|_| VcaError::Configuration(format!("invalid value for {key}: {raw:?}")))
}
