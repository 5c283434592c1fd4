//! Deployment configuration.
//!
//! Everything that differs between installations lives in one TOML file. Every field has a
//! default matching the stock two-board driver, so an empty or missing file is a valid
//! configuration:
//!
//! ```toml
//! [topology]
//! boards = 2
//! channels_per_board = 8
//! # schedule channel i drives output_order[i]; defaults to board-major order
//! output_order = [{ board = 0, channel = 0 }, { board = 1, channel = 0 }]
//!
//! [limits]
//! max_blocks = 9
//! max_coefficients = 8192
//!
//! [calibration]
//! nominal_gain = -1.62
//! gain_band = 0.5
//!
//! [transfer]
//! endianness = "little"
//!
//! [playback]
//! tick_deadline_us = 1000
//! ```

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use serde::Deserialize;
use tracing::{debug, info};

use crate::calibration::CalibrationParams;
use crate::coefficients::Endianness;
use crate::error::ConfigFileError;
use crate::hardware::ChannelAddress;
use crate::schedule::ScheduleLimits;
use crate::units::Conversion;

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct TopologyConfig {
    pub boards: usize,
    pub channels_per_board: usize,
    pub output_order: Option<Vec<ChannelAddress>>,
}

impl Default for TopologyConfig {
    fn default() -> Self {
        Self {
            boards: 2,
            channels_per_board: 8,
            output_order: None,
        }
    }
}

impl TopologyConfig {
    /// Physical address driven by each schedule channel, in schedule channel order.
    pub fn output_order(&self) -> Vec<ChannelAddress> {
        match &self.output_order {
            Some(order) => order.clone(),
            None => (0..self.boards)
                .flat_map(|board| {
                    (0..self.channels_per_board).map(move |ch| ChannelAddress::new(board, ch))
                })
                .collect(),
        }
    }

    pub fn contains(&self, address: ChannelAddress) -> bool {
        address.board < self.boards && address.channel < self.channels_per_board
    }
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    pub endianness: Endianness,
}

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    /// A tick taking longer than this is logged as a deadline overrun.
    pub tick_deadline_us: u64,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            tick_deadline_us: 1_000,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ShimConfig {
    pub topology: TopologyConfig,
    pub limits: ScheduleLimits,
    pub calibration: CalibrationParams,
    pub conversion: Conversion,
    pub transfer: TransferConfig,
    pub playback: PlaybackConfig,
}

impl ShimConfig {
    /// Reads the configuration at `path`, falling back to defaults if the file does not exist.
    pub fn load(path: &Path) -> Result<Self, ConfigFileError> {
        if !path.exists() {
            info!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }
        let txt = fs::read_to_string(path)?;
        let cfg = Self::from_toml_str(&txt)?;
        info!(path = %path.display(), "config loaded");
        Ok(cfg)
    }

    pub fn from_toml_str(txt: &str) -> Result<Self, ConfigFileError> {
        let cfg: Self = toml::from_str(txt)?;
        cfg.validate()?;
        debug!(?cfg, "config parsed");
        Ok(cfg)
    }

    /// Checks that the output order only names fitted channels, each at most once.
    pub fn validate(&self) -> Result<(), ConfigFileError> {
        let mut seen = HashSet::new();
        for address in self.topology.output_order() {
            if !self.topology.contains(address) {
                return Err(ConfigFileError::AddressOutOfRange {
                    address,
                    boards: self.topology.boards,
                    channels_per_board: self.topology.channels_per_board,
                });
            }
            if !seen.insert(address) {
                return Err(ConfigFileError::DuplicateAddress { address });
            }
        }
        Ok(())
    }

    /// Schedule limits with `max_channels` capped to the channels the output order can drive.
    pub fn effective_limits(&self) -> ScheduleLimits {
        ScheduleLimits {
            max_channels: self
                .limits
                .max_channels
                .min(self.topology.output_order().len()),
            ..self.limits.clone()
        }
    }
}
