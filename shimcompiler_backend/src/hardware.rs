//! Hardware seam between the schedule/calibration logic and the driver boards.
//!
//! The driver is a stack of boards that share one bus. Each board carries a multi-channel DAC
//! (driving the coil amplifiers) and an ADC that reads back the amplifier output current.
//! Only one board is addressable at a time, so every access is preceded by a board select.
//!
//! ## Traits
//! - [`BoardBus`]: the register-level primitives (board select, DAC write, ADC read). Real
//!   deployments implement it on top of their SPI/GPIO stack; [`crate::simulated::SimulatedBoards`]
//!   implements it for tests and dry runs.
//! - [`Settle`]: every wait the calibration procedure needs. Tests swap in [`ElapsedSettle`] so
//!   that a full calibration pass runs instantly while still accounting for the time it would take.
//!
//! ## Board selection
//! [`BoardSelector`] owns the bus and remembers which board is selected. All reads and writes go
//! through it, so a select is issued exactly when the target board differs from the current one.

use std::fmt;
use std::time::Duration;

use serde::Deserialize;
use tracing::debug;

/// Physical address of one output channel.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Deserialize)]
pub struct ChannelAddress {
    pub board: usize,
    pub channel: usize,
}

impl ChannelAddress {
    pub fn new(board: usize, channel: usize) -> Self {
        Self { board, channel }
    }
}

impl fmt::Display for ChannelAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({},{})", self.board, self.channel)
    }
}

/// Whether a DAC write only loads the input register or also updates the output.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum WriteMode {
    WriteOnly,
    WriteAndUpdate,
}

/// Register-level access to the driver boards.
///
/// Channel arguments address the currently selected board. Callers are expected to go through
/// [`BoardSelector`] rather than calling these directly.
pub trait BoardBus {
    fn select_board(&mut self, board: usize);
    fn write_channel_code(&mut self, channel: usize, code: u16, mode: WriteMode);
    /// Blocking ADC readback. `settle_cycles` is the number of conversions averaged.
    fn read_channel_raw(&mut self, channel: usize, settle_cycles: u32) -> u16;
}

/// Blocking wait used between driving an output and reading it back.
pub trait Settle {
    fn settle(&mut self, duration: Duration);
}

/// Sleeps the calling thread.
#[derive(Debug, Default)]
pub struct ThreadSettle;

impl Settle for ThreadSettle {
    fn settle(&mut self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Does not wait, only accumulates the time that would have been spent.
#[derive(Debug, Default)]
pub struct ElapsedSettle {
    pub elapsed: Duration,
    pub count: usize,
}

impl Settle for ElapsedSettle {
    fn settle(&mut self, duration: Duration) {
        self.elapsed += duration;
        self.count += 1;
    }
}

/// Owns a [`BoardBus`] and tracks the selected board.
pub struct BoardSelector<B: BoardBus> {
    bus: B,
    selected: Option<usize>,
}

impl<B: BoardBus> BoardSelector<B> {
    pub fn new(bus: B) -> Self {
        Self {
            bus,
            selected: None,
        }
    }

    pub fn selected(&self) -> Option<usize> {
        self.selected
    }

    /// Selects `board` unless it is already selected.
    pub fn select(&mut self, board: usize) {
        if self.selected != Some(board) {
            debug!(board, "select board");
            self.bus.select_board(board);
            self.selected = Some(board);
        }
    }

    pub fn write(&mut self, address: ChannelAddress, code: u16, mode: WriteMode) {
        self.select(address.board);
        self.bus.write_channel_code(address.channel, code, mode);
    }

    pub fn read(&mut self, address: ChannelAddress, settle_cycles: u32) -> u16 {
        self.select(address.board);
        self.bus.read_channel_raw(address.channel, settle_cycles)
    }

    /// Forgets the cached selection, forcing the next access to reselect.
    ///
    /// Needed when something outside this selector may have touched the select lines.
    pub fn invalidate(&mut self) {
        self.selected = None;
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    pub fn bus_mut(&mut self) -> &mut B {
        &mut self.bus
    }

    pub fn into_inner(self) -> B {
        self.bus
    }
}
