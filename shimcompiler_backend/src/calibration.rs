//! Per-channel gain and zero-offset calibration against the readback ADC.
//!
//! Every channel's amplifier has its own gain and input offset, so a requested current only maps
//! to the right DAC code after both are measured. Calibration walks each channel through
//!
//! ```text
//! Uncalibrated -> MeasuringGain -> NullingOffset -> Calibrated
//!                       |                |
//!                       +----> Failed <--+
//! ```
//!
//! - **Gain** is measured from two reference setpoints: the DAC is driven to each in turn, the
//!   output current is read back after a settle time, and the slope is taken.
//! - **Offset** is then nulled by feedback: the channel is commanded to zero current, the residual
//!   is read back and folded into the zero offset until it falls within tolerance.
//!
//! A channel whose gain is far from nominal (typically an unplugged coil, which reads back no
//! current at all) fails immediately without nulling. A failed channel keeps a zero offset of 0
//! and stays usable; consumers check [`ChannelCalibration::is_calibrated`] before trusting it.
//!
//! Failures never abort [`CalibrationEngine::calibrate_all`]: they are collected in a
//! [`CalibrationReport`] so every other channel is still attempted.

use std::time::Duration;

use indexmap::IndexMap;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::error::CalibrationError;
use crate::hardware::{BoardBus, BoardSelector, ChannelAddress, Settle, WriteMode};
use crate::units::Conversion;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CalibrationState {
    Uncalibrated,
    MeasuringGain,
    NullingOffset,
    Calibrated,
    Failed,
}

/// Calibration constants of one channel.
#[derive(Clone, Debug, PartialEq)]
pub struct ChannelCalibration {
    /// Output amps per DAC volt.
    pub gain: f32,
    /// DAC volts subtracted to null the amplifier offset.
    pub zero_offset: f32,
    pub state: CalibrationState,
}

impl ChannelCalibration {
    pub fn uncalibrated(nominal_gain: f32) -> Self {
        Self {
            gain: nominal_gain,
            zero_offset: 0.0,
            state: CalibrationState::Uncalibrated,
        }
    }

    pub fn is_calibrated(&self) -> bool {
        self.state == CalibrationState::Calibrated
    }
}

/// Deployment parameters of the calibration procedure.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct CalibrationParams {
    /// Expected gain in amps per DAC volt.
    pub nominal_gain: f32,
    /// Largest accepted deviation of a measured gain from `nominal_gain`.
    pub gain_band: f32,
    /// The two DAC voltages the gain is measured between.
    pub reference_volts: [f32; 2],
    /// Residual current in amps below which the offset counts as nulled.
    pub tolerance_amps: f32,
    pub max_nulling_iterations: usize,
    /// Readback oversampling for the gain measurement.
    pub gain_read_cycles: u32,
    /// Readback oversampling while nulling.
    pub nulling_read_cycles: u32,
    pub pre_measure_settle_us: u64,
    pub gain_settle_us: u64,
    pub nulling_settle_us: u64,
    pub inter_board_settle_us: u64,
}

impl Default for CalibrationParams {
    fn default() -> Self {
        Self {
            nominal_gain: -1.62,
            gain_band: 0.5,
            reference_volts: [2.0, 2.5],
            tolerance_amps: 0.001,
            max_nulling_iterations: 10,
            gain_read_cycles: 50,
            nulling_read_cycles: 1,
            pre_measure_settle_us: 1_000,
            gain_settle_us: 1_000,
            nulling_settle_us: 25_000,
            inter_board_settle_us: 500_000,
        }
    }
}

impl CalibrationParams {
    pub fn pre_measure_settle(&self) -> Duration {
        Duration::from_micros(self.pre_measure_settle_us)
    }
    pub fn gain_settle(&self) -> Duration {
        Duration::from_micros(self.gain_settle_us)
    }
    pub fn nulling_settle(&self) -> Duration {
        Duration::from_micros(self.nulling_settle_us)
    }
    pub fn inter_board_settle(&self) -> Duration {
        Duration::from_micros(self.inter_board_settle_us)
    }
}

/// Outcome of a full calibration pass, in calibration order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CalibrationReport {
    pub results: Vec<(ChannelAddress, Result<(), CalibrationError>)>,
}

impl CalibrationReport {
    pub fn failures(&self) -> impl Iterator<Item = &CalibrationError> {
        self.results.iter().filter_map(|(_, r)| r.as_ref().err())
    }

    pub fn calibrated_count(&self) -> usize {
        self.results.iter().filter(|(_, r)| r.is_ok()).count()
    }

    pub fn all_calibrated(&self) -> bool {
        self.results.iter().all(|(_, r)| r.is_ok())
    }
}

/// Owns the calibration constants of every channel and runs the calibration procedure.
pub struct CalibrationEngine {
    params: CalibrationParams,
    conversion: Conversion,
    table: IndexMap<ChannelAddress, ChannelCalibration>,
}

impl CalibrationEngine {
    /// Creates an engine for `boards` boards of `channels_per_board` channels each, all
    /// uncalibrated with the nominal gain and no offset.
    pub fn new(
        boards: usize,
        channels_per_board: usize,
        params: CalibrationParams,
        conversion: Conversion,
    ) -> Self {
        let mut table = IndexMap::new();
        for board in 0..boards {
            for channel in 0..channels_per_board {
                table.insert(
                    ChannelAddress::new(board, channel),
                    ChannelCalibration::uncalibrated(params.nominal_gain),
                );
            }
        }
        Self {
            params,
            conversion,
            table,
        }
    }

    pub fn params(&self) -> &CalibrationParams {
        &self.params
    }

    pub fn conversion(&self) -> &Conversion {
        &self.conversion
    }

    pub fn channel(&self, address: ChannelAddress) -> Option<&ChannelCalibration> {
        self.table.get(&address)
    }

    pub fn channels(&self) -> impl Iterator<Item = (&ChannelAddress, &ChannelCalibration)> {
        self.table.iter()
    }

    pub fn contains(&self, address: ChannelAddress) -> bool {
        self.table.contains_key(&address)
    }

    fn entry_(&mut self, address: ChannelAddress) -> &mut ChannelCalibration {
        assert!(
            self.table.contains_key(&address),
            "Channel {} is not part of this driver. Known channels are {:?}",
            address,
            self.table.keys().collect::<Vec<_>>()
        );
        &mut self.table[&address]
    }

    /// DAC code that drives `amps` on `address` using its current calibration.
    pub fn code_for_amps(&self, address: ChannelAddress, amps: f32) -> Option<u16> {
        self.table
            .get(&address)
            .map(|cal| self.conversion.code_for_amps(amps, cal))
    }

    /// Measures the gain of one channel and stores it.
    ///
    /// Drives the channel to both reference voltages in turn and reads back the output current
    /// after each. The channel is left at the second reference voltage.
    pub fn measure_gain<B: BoardBus, S: Settle>(
        &mut self,
        bus: &mut BoardSelector<B>,
        settle: &mut S,
        address: ChannelAddress,
    ) -> f32 {
        self.entry_(address).state = CalibrationState::MeasuringGain;
        let [v1, v2] = self.params.reference_volts;

        bus.select(address.board);
        settle.settle(self.params.pre_measure_settle());

        bus.write(
            address,
            self.conversion.code_for_volts(v1, 0.0),
            WriteMode::WriteAndUpdate,
        );
        settle.settle(self.params.gain_settle());
        let i1 = self
            .conversion
            .readback_amps(bus.read(address, self.params.gain_read_cycles));

        bus.write(
            address,
            self.conversion.code_for_volts(v2, 0.0),
            WriteMode::WriteAndUpdate,
        );
        settle.settle(self.params.gain_settle());
        let i2 = self
            .conversion
            .readback_amps(bus.read(address, self.params.gain_read_cycles));

        let gain = (i2 - i1) / (v2 - v1);
        debug!(%address, i1, i2, gain, "gain measured");
        self.entry_(address).gain = gain;
        gain
    }

    /// Nulls the zero-current offset of one channel by closed-loop feedback.
    ///
    /// Uses the gain stored for the channel. On failure the offset is reset to 0 and the channel
    /// is commanded to nominal zero current.
    pub fn null_offset<B: BoardBus, S: Settle>(
        &mut self,
        bus: &mut BoardSelector<B>,
        settle: &mut S,
        address: ChannelAddress,
    ) -> Result<(), CalibrationError> {
        self.entry_(address).state = CalibrationState::NullingOffset;
        let mut residual = f32::NAN;

        for iteration in 0..self.params.max_nulling_iterations {
            residual = self
                .conversion
                .readback_amps(bus.read(address, self.params.nulling_read_cycles));
            let cal = &mut self.table[&address];
            if residual.abs() <= self.params.tolerance_amps {
                cal.state = CalibrationState::Calibrated;
                debug!(%address, iteration, zero_offset = cal.zero_offset, "offset nulled");
                return Ok(());
            }
            cal.zero_offset += residual / cal.gain;
            let code = self.conversion.code_for_amps(0.0, cal);
            bus.write(address, code, WriteMode::WriteAndUpdate);
            settle.settle(self.params.nulling_settle());
        }

        let cal = &mut self.table[&address];
        cal.state = CalibrationState::Failed;
        cal.zero_offset = 0.0;
        let code = self.conversion.code_for_amps(0.0, cal);
        bus.write(address, code, WriteMode::WriteAndUpdate);
        Err(CalibrationError::NotConverged {
            address,
            iterations: self.params.max_nulling_iterations,
            residual,
        })
    }

    /// Calibrates one channel: gain first, then offset nulling if the gain is plausible.
    pub fn calibrate<B: BoardBus, S: Settle>(
        &mut self,
        bus: &mut BoardSelector<B>,
        settle: &mut S,
        address: ChannelAddress,
    ) -> Result<(), CalibrationError> {
        self.entry_(address).zero_offset = 0.0;
        let gain = self.measure_gain(bus, settle, address);

        let nominal = self.params.nominal_gain;
        let band = self.params.gain_band;
        // NaN gains fail here as well
        if !((gain - nominal).abs() <= band) {
            let cal = &mut self.table[&address];
            cal.state = CalibrationState::Failed;
            cal.gain = nominal;
            let code = self.conversion.code_for_amps(0.0, cal);
            bus.write(address, code, WriteMode::WriteAndUpdate);
            return Err(CalibrationError::GainOutOfBand {
                address,
                gain,
                nominal,
                band,
            });
        }
        self.null_offset(bus, settle, address)
    }

    /// Calibrates every channel, board by board, pausing between boards.
    pub fn calibrate_all<B: BoardBus, S: Settle>(
        &mut self,
        bus: &mut BoardSelector<B>,
        settle: &mut S,
    ) -> CalibrationReport {
        let addresses: Vec<ChannelAddress> = self.table.keys().copied().collect();
        let mut report = CalibrationReport::default();

        for (i, &address) in addresses.iter().enumerate() {
            let result = self.calibrate(bus, settle, address);
            if let Err(err) = &result {
                warn!("calibration failed: {err}");
            }
            report.results.push((address, result));

            let board_done = addresses
                .get(i + 1)
                .map_or(true, |next| next.board != address.board);
            if board_done {
                settle.settle(self.params.inter_board_settle());
            }
        }
        info!(
            calibrated = report.calibrated_count(),
            total = report.results.len(),
            "calibration pass finished"
        );
        report
    }

    /// Commands every channel to zero current with its current calibration.
    pub fn zero_all<B: BoardBus>(&self, bus: &mut BoardSelector<B>) {
        for (&address, cal) in self.table.iter() {
            bus.write(
                address,
                self.conversion.code_for_amps(0.0, cal),
                WriteMode::WriteAndUpdate,
            );
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::hardware::ElapsedSettle;
    use crate::simulated::{SimulatedBoards, SimulatedChannel};

    fn engine(boards: usize, channels: usize) -> CalibrationEngine {
        CalibrationEngine::new(
            boards,
            channels,
            CalibrationParams::default(),
            Conversion::default(),
        )
    }

    fn sim(boards: usize, channels: usize, channel: SimulatedChannel) -> BoardSelector<SimulatedBoards> {
        BoardSelector::new(SimulatedBoards::uniform(
            boards,
            channels,
            channel,
            Conversion::default(),
        ))
    }

    #[test]
    fn starts_uncalibrated() {
        let eng = engine(2, 8);
        assert_eq!(eng.channels().count(), 16);
        let cal = eng.channel(ChannelAddress::new(1, 7)).unwrap();
        assert_eq!(cal.state, CalibrationState::Uncalibrated);
        assert_eq!(cal.zero_offset, 0.0);
        assert_eq!(cal.gain, -1.62);
        assert!(!cal.is_calibrated());
    }

    #[test]
    fn measures_simulated_gain() {
        let mut eng = engine(1, 1);
        let mut bus = sim(1, 1, SimulatedChannel::new(-1.5, 0.0));
        let mut settle = ElapsedSettle::default();
        let gain = eng.measure_gain(&mut bus, &mut settle, ChannelAddress::new(0, 0));
        // 1 mV ADC resolution over a 0.5 V step is 1 mA / 0.5 V
        assert!((gain + 1.5).abs() < 0.005, "gain {gain}");
        assert_eq!(
            eng.channel(ChannelAddress::new(0, 0)).unwrap().state,
            CalibrationState::MeasuringGain
        );
    }

    #[test]
    fn converges_on_offset_channel() {
        let mut eng = engine(1, 2);
        let mut bus = sim(1, 2, SimulatedChannel::new(-1.62, 0.02));
        let mut settle = ElapsedSettle::default();
        let address = ChannelAddress::new(0, 1);

        eng.calibrate(&mut bus, &mut settle, address).unwrap();

        let cal = eng.channel(address).unwrap();
        assert!(cal.is_calibrated());
        assert!((cal.zero_offset - 0.02).abs() < 0.002, "offset {}", cal.zero_offset);

        let residual = Conversion::default().readback_amps(bus.read(address, 1));
        assert!(residual.abs() <= CalibrationParams::default().tolerance_amps);
    }

    #[test]
    fn rejects_disconnected_channel_without_nulling() {
        let mut eng = engine(1, 1);
        let mut bus = sim(1, 1, SimulatedChannel::disconnected());
        let mut settle = ElapsedSettle::default();
        let address = ChannelAddress::new(0, 0);

        let err = eng.calibrate(&mut bus, &mut settle, address).unwrap_err();
        assert!(matches!(err, CalibrationError::GainOutOfBand { .. }));

        let cal = eng.channel(address).unwrap();
        assert_eq!(cal.state, CalibrationState::Failed);
        assert_eq!(cal.zero_offset, 0.0);
        // pre-measure settle plus the two gain settles, no nulling settles
        assert_eq!(settle.count, 3);
        // two reference writes, then the zero-current code
        let log = bus.bus().write_log();
        assert_eq!(log.len(), 3);
        assert_eq!(log[2], (0, 0, 32767));
    }

    #[test]
    fn failed_gain_keeps_nominal_and_zeroes_at_midpoint() {
        let mut eng = engine(1, 1);
        let mut bus = sim(1, 1, SimulatedChannel::disconnected());
        let mut settle = ElapsedSettle::default();
        let address = ChannelAddress::new(0, 0);

        match eng.calibrate(&mut bus, &mut settle, address).unwrap_err() {
            CalibrationError::GainOutOfBand { gain, .. } => assert_eq!(gain, 0.0),
            other => panic!("unexpected {other:?}"),
        }
        let cal = eng.channel(address).unwrap();
        assert_eq!(cal.gain, CalibrationParams::default().nominal_gain);

        bus.bus_mut().clear_write_log();
        eng.zero_all(&mut bus);
        assert_eq!(bus.bus().write_log(), &[(0, 0, 32767)]);
    }

    #[test]
    fn gives_up_after_iteration_budget() {
        let params = CalibrationParams {
            max_nulling_iterations: 3,
            ..CalibrationParams::default()
        };
        let mut eng = CalibrationEngine::new(1, 1, params, Conversion::default());
        // Output stuck well away from zero: gain measures fine but nulling cannot move it.
        let mut bus = sim(1, 1, SimulatedChannel::new(-1.62, 0.0));
        bus.bus_mut().channel_mut(ChannelAddress::new(0, 0)).stuck_amps = Some(0.05);
        let mut settle = ElapsedSettle::default();
        let address = ChannelAddress::new(0, 0);

        eng.entry_(address).gain = -1.62;
        let err = eng.null_offset(&mut bus, &mut settle, address).unwrap_err();
        match err {
            CalibrationError::NotConverged { iterations, .. } => assert_eq!(iterations, 3),
            other => panic!("unexpected {other:?}"),
        }
        let cal = eng.channel(address).unwrap();
        assert_eq!(cal.state, CalibrationState::Failed);
        assert_eq!(cal.zero_offset, 0.0);
        // the last write commands nominal zero
        let last = *bus.bus().write_log().last().unwrap();
        assert_eq!(last.2, Conversion::default().code_for_amps(0.0, cal));
    }

    #[test]
    fn calibrate_all_continues_past_failures() {
        let mut eng = engine(2, 2);
        let mut boards = SimulatedBoards::uniform(
            2,
            2,
            SimulatedChannel::new(-1.62, 0.01),
            Conversion::default(),
        );
        *boards.channel_mut(ChannelAddress::new(0, 1)) = SimulatedChannel::disconnected();
        let mut bus = BoardSelector::new(boards);
        let mut settle = ElapsedSettle::default();

        let report = eng.calibrate_all(&mut bus, &mut settle);
        assert_eq!(report.results.len(), 4);
        assert_eq!(report.calibrated_count(), 3);
        assert!(!report.all_calibrated());
        assert_eq!(report.failures().count(), 1);
        assert!(!eng.channel(ChannelAddress::new(0, 1)).unwrap().is_calibrated());
        assert!(eng.channel(ChannelAddress::new(1, 1)).unwrap().is_calibrated());
        // one inter-board pause per board
        assert!(settle.elapsed >= 2 * CalibrationParams::default().inter_board_settle());
    }
}
