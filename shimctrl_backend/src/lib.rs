//! # Shim control backend
//!
//! The hardware-facing half of the shim driver, built on [`shimcompiler_backend`]:
//!
//! - [`controller`]: [`ShimController`], which plays a schedule on external triggers and
//!   answers the line-based host console.
//! - [`trigger_chan`]: delivery of trigger edges to the control loop, with missed-edge detection.
//! - [`transfer`]: the blocking coefficient payload read.
//! - [`error`]: [`ShimError`], everything the control loop refuses or fails at.

pub mod controller;
pub mod error;
pub mod transfer;
pub mod trigger_chan;

pub use controller::*;
pub use error::ShimError;
pub use transfer::read_payload;
pub use trigger_chan::*;
