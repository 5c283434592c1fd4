//! # Shim compiler backend
//!
//! Pure logic for a trigger-driven shim coil driver: a bank of current amplifiers, each fed by
//! one DAC channel, stepping through precomputed per-channel drive values on external triggers.
//!
//! ## Overview
//!
//! A playback is described by a block/repeat schedule and a flat table of coefficients. Each
//! trigger advances one iteration; the iteration is resolved to a block and a repetition step,
//! and every channel is driven to its coefficient for that step. Before the coefficients mean
//! anything in amps, every channel is calibrated against the readback ADC.
//!
//! ## Modules
//!
//! - [`schedule`]: the [`ScheduleModel`](schedule::ScheduleModel) and its prefix-sum tables.
//! - [`indexer`]: the [`ScheduleIndexer`](indexer::ScheduleIndexer) lookups (iteration to block,
//!   repetition step and store offset) and waveform preview.
//! - [`coefficients`]: the [`CoefficientStore`](coefficients::CoefficientStore) and payload decoding.
//! - [`protocol`]: the `c<int>|b<int>|l..|r..` control message.
//! - [`calibration`]: the gain and offset [`CalibrationEngine`](calibration::CalibrationEngine).
//! - [`units`]: conversion between amps, volts and device codes.
//! - [`hardware`]: the [`BoardBus`](hardware::BoardBus) and [`Settle`](hardware::Settle) seams.
//! - [`simulated`]: an in-memory board stack for tests and dry runs.
//! - [`config`]: TOML deployment configuration.
//! - [`error`]: error types.
//!
//! Python bindings (`Schedule`) are available with the `python` feature.

pub mod calibration;
pub mod coefficients;
pub mod config;
pub mod error;
pub mod hardware;
pub mod indexer;
pub mod protocol;
pub mod schedule;
pub mod simulated;
pub mod units;
pub mod utils;

#[cfg(feature = "python")]
pub mod python;

pub use calibration::*;
pub use coefficients::*;
pub use config::*;
pub use error::*;
pub use hardware::*;
pub use indexer::*;
pub use protocol::*;
pub use schedule::*;
pub use units::*;
