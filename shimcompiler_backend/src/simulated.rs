//! An in-memory [`BoardBus`] for dry runs and tests.
//!
//! Each simulated channel behaves like a linear amplifier behind the DAC:
//!
//! ```text
//! amps = gain * (dac_volts - dac_midpoint_volts + offset_volts)
//! ```
//!
//! and is read back through the same ADC chain the real boards use (see [`Conversion`]), including
//! its 1 mV quantisation and range clipping. A disconnected channel reads back zero current no
//! matter what is written, which is what an unplugged coil looks like to the calibration.
//!
//! Accessing a channel without a selected board panics: the real hardware would silently talk to
//! the wrong board, so tests should fail loudly instead.

use crate::hardware::{BoardBus, ChannelAddress, WriteMode};
use crate::units::Conversion;

#[derive(Clone, Debug, PartialEq)]
pub struct SimulatedChannel {
    /// True amplifier gain in amps per DAC volt.
    pub gain: f32,
    /// True input offset in DAC volts.
    pub offset_volts: f32,
    pub connected: bool,
    /// Forces the readback to a fixed current regardless of the DAC.
    pub stuck_amps: Option<f32>,
    /// Code currently driving the output.
    pub output_code: u16,
    /// Code loaded by a write-only access, not yet on the output.
    pub pending_code: Option<u16>,
}

impl SimulatedChannel {
    pub fn new(gain: f32, offset_volts: f32) -> Self {
        Self {
            gain,
            offset_volts,
            connected: true,
            stuck_amps: None,
            output_code: 0,
            pending_code: None,
        }
    }

    pub fn disconnected() -> Self {
        Self {
            connected: false,
            ..Self::new(0.0, 0.0)
        }
    }

    pub fn output_amps(&self, conversion: &Conversion) -> f32 {
        if let Some(amps) = self.stuck_amps {
            return amps;
        }
        if !self.connected {
            return 0.0;
        }
        let volts = conversion.volts_for_code(self.output_code);
        self.gain * (volts - conversion.dac_midpoint_volts + self.offset_volts)
    }
}

pub struct SimulatedBoards {
    conversion: Conversion,
    boards: Vec<Vec<SimulatedChannel>>,
    selected: Option<usize>,
    select_count: usize,
    write_log: Vec<(usize, usize, u16)>,
}

impl SimulatedBoards {
    pub fn new(boards: Vec<Vec<SimulatedChannel>>, conversion: Conversion) -> Self {
        Self {
            conversion,
            boards,
            selected: None,
            select_count: 0,
            write_log: Vec::new(),
        }
    }

    /// `boards` boards of `channels_per_board` identical channels.
    pub fn uniform(
        boards: usize,
        channels_per_board: usize,
        channel: SimulatedChannel,
        conversion: Conversion,
    ) -> Self {
        Self::new(vec![vec![channel; channels_per_board]; boards], conversion)
    }

    pub fn channel(&self, address: ChannelAddress) -> &SimulatedChannel {
        &self.boards[address.board][address.channel]
    }

    pub fn channel_mut(&mut self, address: ChannelAddress) -> &mut SimulatedChannel {
        &mut self.boards[address.board][address.channel]
    }

    pub fn output_amps(&self, address: ChannelAddress) -> f32 {
        self.channel(address).output_amps(&self.conversion)
    }

    pub fn selected(&self) -> Option<usize> {
        self.selected
    }

    /// Number of board selects issued so far.
    pub fn select_count(&self) -> usize {
        self.select_count
    }

    /// Every DAC write so far as `(board, channel, code)`.
    pub fn write_log(&self) -> &[(usize, usize, u16)] {
        &self.write_log
    }

    pub fn clear_write_log(&mut self) {
        self.write_log.clear();
    }

    fn selected_channel_(&mut self, channel: usize) -> &mut SimulatedChannel {
        let board = match self.selected {
            Some(board) => board,
            None => panic!("Accessing channel {channel} with no board selected"),
        };
        assert!(
            channel < self.boards[board].len(),
            "Board {} has {} channels, channel {} requested",
            board,
            self.boards[board].len(),
            channel
        );
        &mut self.boards[board][channel]
    }
}

impl BoardBus for SimulatedBoards {
    fn select_board(&mut self, board: usize) {
        assert!(
            board < self.boards.len(),
            "Selecting board {} but only {} boards are fitted",
            board,
            self.boards.len()
        );
        self.selected = Some(board);
        self.select_count += 1;
    }

    fn write_channel_code(&mut self, channel: usize, code: u16, mode: WriteMode) {
        let chan = self.selected_channel_(channel);
        match mode {
            WriteMode::WriteOnly => chan.pending_code = Some(code),
            WriteMode::WriteAndUpdate => {
                chan.output_code = code;
                chan.pending_code = None;
            }
        }
        let board = self.selected.unwrap_or_default();
        self.write_log.push((board, channel, code));
    }

    fn read_channel_raw(&mut self, channel: usize, _settle_cycles: u32) -> u16 {
        let conversion = self.conversion.clone();
        let amps = self.selected_channel_(channel).output_amps(&conversion);
        conversion.raw_for_amps(amps)
    }
}
