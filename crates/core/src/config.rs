//! Configuration management for Keystead.
//!
//! The daemon reads a single TOML file:
//!
//! ```toml
//! [service]
//! listen_addr = "0.0.0.0:9300"
//! db_path = "/var/lib/keystead/keys.db"
//! machine_private_key = "<64 hex chars>"
//! check_hashes = true
//!
//! [contract]
//! version = 3
//! proxy_hashes = ["<64 hex chars>"]
//! worker_hashes = ["<64 hex chars>"]
//!
//! [attestation]
//! mode = "fake"
//! image_hash = "<64 hex chars>"
//! ```

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use crate::error::{CoreError, Result};
use crate::logging::LogFormat;

/// Default seconds between maintenance ticks.
pub const DEFAULT_RECONCILE_INTERVAL_SECS: u64 = 10;

/// Default deadline for an attested handshake.
pub const DEFAULT_HANDSHAKE_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub service: ServiceSection,
    #[serde(default)]
    pub contract: ContractSection,
    #[serde(default)]
    pub attestation: AttestationSection,
    #[serde(default)]
    pub logging: LoggingSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceSection {
    /// Address the attested query listener binds to
    pub listen_addr: SocketAddr,
    /// SQLite database holding the signed records
    pub db_path: PathBuf,
    /// Hex-encoded 32-byte seed of the key that signs every stored record
    pub machine_private_key: String,
    /// Require requester image hashes to be allow-listed
    #[serde(default)]
    pub check_hashes: bool,
    /// Test deployment; hash checks may only be disabled when set
    #[serde(default)]
    pub is_test: bool,
    #[serde(default = "default_reconcile_interval")]
    pub reconcile_interval_secs: u64,
    #[serde(default = "default_handshake_timeout")]
    pub handshake_timeout_secs: u64,
}

/// Static view of the root contract configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContractSection {
    #[serde(default)]
    pub version: u32,
    #[serde(default)]
    pub proxy_hashes: Vec<String>,
    #[serde(default)]
    pub worker_hashes: Vec<String>,
    /// Unix time the contract state was last synced
    #[serde(default)]
    pub synced_at: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttestationMode {
    /// Software quotes bound to the certificate key
    #[default]
    Fake,
    /// No attestation at all, test deployments only
    Insecure,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AttestationSection {
    #[serde(default)]
    pub mode: AttestationMode,
    /// Hex image hash this instance claims in its own quote
    #[serde(default)]
    pub image_hash: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSection {
    #[serde(default)]
    pub format: LogFormat,
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            format: LogFormat::default(),
            level: default_log_level(),
        }
    }
}

fn default_reconcile_interval() -> u64 {
    DEFAULT_RECONCILE_INTERVAL_SECS
}

fn default_handshake_timeout() -> u64 {
    DEFAULT_HANDSHAKE_TIMEOUT_SECS
}

fn default_log_level() -> String {
    "info".to_string()
}

impl ServiceConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| CoreError::Config(format!("failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the service must not start with.
    pub fn validate(&self) -> Result<()> {
        self.machine_private_key()?;
        for hash in self
            .contract
            .proxy_hashes
            .iter()
            .chain(self.contract.worker_hashes.iter())
        {
            parse_hex32("contract hash", hash)?;
        }
        if let Some(image_hash) = &self.attestation.image_hash {
            parse_hex32("attestation.image_hash", image_hash)?;
        }
        if self.attestation.mode == AttestationMode::Insecure && !self.service.is_test {
            return Err(CoreError::Config(
                "insecure attestation is only allowed with is_test".to_string(),
            ));
        }
        if self.service.reconcile_interval_secs == 0 {
            return Err(CoreError::Config(
                "reconcile_interval_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Hash checking is forced on outside of test deployments.
    pub fn check_hashes(&self) -> bool {
        self.service.check_hashes || !self.service.is_test
    }

    pub fn machine_private_key(&self) -> Result<[u8; 32]> {
        parse_hex32("service.machine_private_key", &self.service.machine_private_key)
    }

    pub fn image_hash(&self) -> Result<[u8; 32]> {
        match &self.attestation.image_hash {
            Some(hash) => parse_hex32("attestation.image_hash", hash),
            None => Ok([0u8; 32]),
        }
    }
}

/// Decode a 64 character hex string into 32 bytes.
pub fn parse_hex32(field: &str, value: &str) -> Result<[u8; 32]> {
    let bytes = hex::decode(value.trim())
        .map_err(|e| CoreError::Config(format!("{field}: cannot decode hex: {e}")))?;
    bytes
        .try_into()
        .map_err(|_| CoreError::Config(format!("{field}: expected 32 bytes")))
}
