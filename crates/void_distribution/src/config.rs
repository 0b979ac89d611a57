//! Distribution configuration
//!
//! ```toml
//! participant = 7
//! packet_size = 16384
//! compression_threshold = 1024
//! strategy = "shadow_copy"
//! allow_remote = true
//! ```

use crate::session::StrategyKind;
use crate::{DistributionError, DistributionResult};
use serde::{Deserialize, Serialize};
use std::path::Path;
use void_ir::ParticipantId;

/// Smallest accepted packet size
pub const MIN_PACKET_SIZE: usize = 256;

/// Configuration for a distribution router
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DistributionConfig {
    /// ID of this participant
    pub participant: u64,
    /// Capacity of one wire packet in bytes
    pub packet_size: usize,
    /// Resources at least this large are compressed for remote recipients
    pub compression_threshold: usize,
    /// Session strategy for local scenes
    pub strategy: StrategyKind,
    /// Whether scenes may be published to remote participants
    pub allow_remote: bool,
}

impl Default for DistributionConfig {
    fn default() -> Self {
        Self {
            participant: 1,
            packet_size: 16 * 1024,
            compression_threshold: 1024,
            strategy: StrategyKind::Direct,
            allow_remote: true,
        }
    }
}

impl DistributionConfig {
    /// Create config for development (small packets, eager compression)
    pub fn development() -> Self {
        Self {
            participant: 1,
            packet_size: 4096,
            compression_threshold: 512,
            strategy: StrategyKind::ShadowCopy,
            allow_remote: true,
        }
    }

    /// Create config for testing (tiny packets to exercise fragmentation)
    pub fn testing() -> Self {
        Self {
            participant: 1,
            packet_size: 1024,
            compression_threshold: 64,
            strategy: StrategyKind::Direct,
            allow_remote: true,
        }
    }

    /// Set participant ID (builder pattern)
    pub fn with_participant(mut self, participant: ParticipantId) -> Self {
        self.participant = participant.raw();
        self
    }

    /// Set strategy (builder pattern)
    pub fn with_strategy(mut self, strategy: StrategyKind) -> Self {
        self.strategy = strategy;
        self
    }

    /// ID of this participant
    pub fn participant_id(&self) -> ParticipantId {
        ParticipantId::new(self.participant)
    }

    /// Check values are usable
    pub fn validate(&self) -> DistributionResult<()> {
        if self.packet_size < MIN_PACKET_SIZE {
            return Err(DistributionError::Config(format!(
                "packet_size {} is below the minimum of {}",
                self.packet_size, MIN_PACKET_SIZE
            )));
        }
        Ok(())
    }

    /// Parse and validate TOML
    pub fn from_toml_str(content: &str) -> DistributionResult<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file
    pub fn load(path: impl AsRef<Path>) -> DistributionResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }
}
