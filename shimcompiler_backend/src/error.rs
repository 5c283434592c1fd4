//! Error taxonomy shared by the schedule, transfer and calibration paths.
//!
//! Three families are kept apart because they are handled differently by the control loop:
//!
//! - [`ConfigurationError`]: a control message or schedule was rejected. The previous schedule
//!   stays active, nothing is partially applied.
//! - [`TransferError`]: a coefficient payload could not be loaded. Playback is refused until a
//!   complete payload arrives.
//! - [`CalibrationError`]: a single channel failed to calibrate. This is recorded per channel and
//!   never aborts a calibration pass.
//!
//! Running off the end of a schedule is not an error at all, see
//! [`ScheduleIndexer::block_index_for`](crate::indexer::ScheduleIndexer::block_index_for).

use thiserror::Error;

use crate::hardware::ChannelAddress;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigurationError {
    #[error("schedule has no blocks")]
    EmptySchedule,
    #[error("schedule has {count} blocks, at most {max} are supported")]
    TooManyBlocks { count: usize, max: usize },
    #[error("block {block} has length 0, every block needs at least one sample")]
    ZeroLength { block: usize },
    #[error("channel count must be at least 1")]
    ZeroChannels,
    #[error("{count} channels requested, at most {max} are wired")]
    TooManyChannels { count: usize, max: usize },
    #[error("schedule needs {required} coefficients, the store holds at most {max}")]
    CapacityExceeded { required: usize, max: usize },
    #[error("iteration count of the schedule overflows")]
    Overflow,
    #[error("control message is empty")]
    EmptyMessage,
    #[error("field {position}: expected `{expected}<int>`, found `{found}`")]
    UnexpectedToken {
        position: usize,
        expected: char,
        found: String,
    },
    #[error("field {position}: expected `{expected}<int>` but the message ended")]
    MissingField { position: usize, expected: char },
    #[error("field {position}: unexpected trailing field `{found}`")]
    TrailingField { position: usize, found: String },
    #[error("field {position}: `{token}` is not a valid unsigned integer")]
    InvalidInteger { position: usize, token: String },
}

#[derive(Debug, Error)]
pub enum TransferError {
    #[error("no schedule is configured, the payload size is unknown")]
    NotConfigured,
    #[error("payload incomplete: expected {expected} bytes, received {received}")]
    Incomplete { expected: usize, received: usize },
    #[error("payload holds {found} coefficients, schedule needs {expected}")]
    LengthMismatch { expected: usize, found: usize },
    #[error("transport failed during payload transfer")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CalibrationError {
    #[error("{address}: measured gain {gain:.3} outside {nominal:.3} +/- {band:.3}")]
    GainOutOfBand {
        address: ChannelAddress,
        gain: f32,
        nominal: f32,
        band: f32,
    },
    #[error("{address}: offset did not converge after {iterations} iterations (residual {residual:.4} A)")]
    NotConverged {
        address: ChannelAddress,
        iterations: usize,
        residual: f32,
    },
}

/// Failure to read a deployment configuration file.
#[derive(Debug, Error)]
pub enum ConfigFileError {
    #[error("cannot read config file")]
    Io(#[from] std::io::Error),
    #[error("cannot parse config file")]
    Parse(#[from] toml::de::Error),
    #[error("output order names {address}, outside {boards} boards of {channels_per_board} channels")]
    AddressOutOfRange {
        address: ChannelAddress,
        boards: usize,
        channels_per_board: usize,
    },
    #[error("output order names {address} more than once")]
    DuplicateAddress { address: ChannelAddress },
}
