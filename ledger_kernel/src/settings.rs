//! Protocol settings.
//!
//! `ProtocolSettingsOptions` is the JSON-bindable form with defaults for
//! every field; `ProtocolSettings` is the validated form every other
//! module consumes. All nodes of one network must load identical values.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use primitive_types::U256;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::{Hardfork, PublicKey, UInt160};
use crate::hashing::bft_address;

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("failed to read settings file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse settings: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid settings: {0}")]
    Invalid(String),
}

/// JSON-bindable settings. Every field falls back to its default.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct ProtocolSettingsOptions {
    pub network: u32,
    pub address_version: u8,
    /// Hex-encoded compressed public keys.
    pub standby_committee: Vec<String>,
    pub validators_count: usize,
    pub milliseconds_per_block: u32,
    pub max_transactions_per_block: u32,
    pub memory_pool_max_transactions: usize,
    pub max_traceable_blocks: u32,
    pub max_valid_until_block_increment: u32,
    pub hardforks: BTreeMap<Hardfork, u32>,
    pub initial_gas_distribution: u64,
}

impl Default for ProtocolSettingsOptions {
    fn default() -> Self {
        Self {
            network: 0x334f454e,
            address_version: 0x35,
            standby_committee: Vec::new(),
            validators_count: 0,
            milliseconds_per_block: 15_000,
            max_transactions_per_block: 512,
            memory_pool_max_transactions: 50_000,
            max_traceable_blocks: 2_102_400,
            max_valid_until_block_increment: 5_760,
            hardforks: BTreeMap::new(),
            initial_gas_distribution: 52_000_000_00000000,
        }
    }
}

/// Validated protocol settings.
#[derive(Debug, Clone)]
pub struct ProtocolSettings {
    pub network: u32,
    pub address_version: u8,
    pub standby_committee: Vec<PublicKey>,
    pub validators_count: usize,
    pub milliseconds_per_block: u32,
    pub max_transactions_per_block: u32,
    pub memory_pool_max_transactions: usize,
    pub max_traceable_blocks: u32,
    pub max_valid_until_block_increment: u32,
    pub hardforks: BTreeMap<Hardfork, u32>,
    pub initial_gas_distribution: U256,
}

impl TryFrom<ProtocolSettingsOptions> for ProtocolSettings {
    type Error = SettingsError;

    fn try_from(options: ProtocolSettingsOptions) -> Result<Self, Self::Error> {
        let standby_committee = options
            .standby_committee
            .iter()
            .map(|s| s.parse::<PublicKey>().map_err(SettingsError::Invalid))
            .collect::<Result<Vec<_>, _>>()?;

        if standby_committee.is_empty() {
            return Err(SettingsError::Invalid(
                "StandbyCommittee must not be empty".to_string(),
            ));
        }
        if options.validators_count == 0 || options.validators_count > standby_committee.len() {
            return Err(SettingsError::Invalid(format!(
                "ValidatorsCount must be in 1..={}, got {}",
                standby_committee.len(),
                options.validators_count
            )));
        }
        if options.max_traceable_blocks == 0 {
            return Err(SettingsError::Invalid(
                "MaxTraceableBlocks must be positive".to_string(),
            ));
        }
        if options.memory_pool_max_transactions == 0 {
            return Err(SettingsError::Invalid(
                "MemoryPoolMaxTransactions must be positive".to_string(),
            ));
        }

        // Activation heights must not decrease along the hardfork order.
        let mut last = 0u32;
        for hf in Hardfork::ALL {
            if let Some(height) = options.hardforks.get(&hf) {
                if *height < last {
                    return Err(SettingsError::Invalid(format!(
                        "hardfork {:?} activates at {} before an earlier hardfork ({})",
                        hf, height, last
                    )));
                }
                last = *height;
            }
        }

        Ok(Self {
            network: options.network,
            address_version: options.address_version,
            standby_committee,
            validators_count: options.validators_count,
            milliseconds_per_block: options.milliseconds_per_block,
            max_transactions_per_block: options.max_transactions_per_block,
            memory_pool_max_transactions: options.memory_pool_max_transactions,
            max_traceable_blocks: options.max_traceable_blocks,
            max_valid_until_block_increment: options.max_valid_until_block_increment,
            hardforks: options.hardforks,
            initial_gas_distribution: U256::from(options.initial_gas_distribution),
        })
    }
}

impl ProtocolSettings {
    pub fn from_json(json: &str) -> Result<Self, SettingsError> {
        let options: ProtocolSettingsOptions = serde_json::from_str(json)?;
        Self::try_from(options)
    }

    pub fn load(path: &Path) -> Result<Self, SettingsError> {
        let content = fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    /// First `validators_count` members of the standby committee.
    pub fn standby_validators(&self) -> &[PublicKey] {
        &self.standby_committee[..self.validators_count]
    }

    /// Address that receives the genesis distribution.
    pub fn genesis_holder(&self) -> UInt160 {
        bft_address(self.standby_validators())
    }

    pub fn is_hardfork_enabled(&self, hardfork: Hardfork, index: u32) -> bool {
        self.hardforks
            .get(&hardfork)
            .map(|height| index >= *height)
            .unwrap_or(false)
    }

    /// Hardforks whose activation height is exactly `index`.
    pub fn hardforks_activating_at(&self, index: u32) -> Vec<Hardfork> {
        self.hardforks
            .iter()
            .filter(|(_, height)| **height == index)
            .map(|(hf, _)| *hf)
            .collect()
    }
}
