use thiserror::Error;

use shimcompiler_backend::error::{CalibrationError, ConfigurationError, TransferError};
use shimcompiler_backend::hardware::ChannelAddress;

/// Everything the control loop can refuse or fail at.
#[derive(Debug, Error)]
pub enum ShimError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
    #[error(transparent)]
    Transfer(#[from] TransferError),
    #[error(transparent)]
    Calibration(#[from] CalibrationError),
    #[error("no schedule is configured")]
    NotConfigured,
    #[error("no coefficient payload is loaded for the active schedule")]
    PayloadNotLoaded,
    #[error("missed {missed} trigger(s), the control loop fell behind")]
    MissedTrigger { missed: usize },
    #[error("unknown command `{0}`")]
    UnknownCommand(String),
    #[error("malformed `{command}` command: {reason}")]
    MalformedCommand { command: char, reason: String },
    #[error("channel {0} is not fitted")]
    InvalidAddress(ChannelAddress),
    #[error("refused while playback is running")]
    PlaybackActive,
}
