//! The trigger-driven shim controller.
//!
//! [`ShimController`] ties the pieces of [`shimcompiler_backend`] to one set of boards:
//! the active [`ScheduleModel`], the loaded [`CoefficientStore`], the [`CalibrationEngine`]
//! holding every channel's gain and offset, and the [`BoardSelector`] all hardware access
//! goes through.
//!
//! ## Playback
//!
//! ```text
//!            configure              load                 trigger
//! Unloaded ------------> Unloaded ------> Armed --------------------> Running
//!     ^                                    ^  ^                          |
//!     |      configure / failed load       |  |  start / halt            | schedule
//!     +------------------------------------+--+--------------------------+ exhausted
//!                                                                        v
//!                                                                     Exhausted
//! ```
//!
//! Each trigger resolves the current iteration to a block and repetition step and writes every
//! scheduled channel with its coefficient, converted to a DAC code through that channel's
//! calibration. Channels are written in output order, so consecutive channels on the same
//! board share one board select. Past the end of the schedule triggers are accepted and ignored.
//!
//! ## Console
//!
//! [`ShimController::handle_line`] implements the line-based host protocol, one command per
//! line, each answered with a fixed completion line the host waits for:
//!
//! | command              | action                               | completion             |
//! |----------------------|--------------------------------------|------------------------|
//! | `c..|b..|l..|r..`    | configure a schedule                 | `Done Configuring`     |
//! | `L`                  | read the coefficient payload         | `Done Loading`         |
//! | `C`                  | calibrate every channel              | `Done Calibrating`     |
//! | `Z`                  | drive every channel to zero current  | `Done Zeroing`         |
//! | `I`                  | read back every channel              | `Done Printing Currents` |
//! | `P`                  | read back the scheduled outputs      | `Done Printing Outputs` |
//! | `X <b> <c> <amps>`   | drive one channel                    | `Done Setting Current` |
//! | `S`                  | rewind playback to iteration 0       | `Ready`                |
//! | `H`                  | halt playback                        | `Halted`               |
//!
//! Channels that are not calibrated are marked with a trailing ` X` in readback listings.

use std::io::Read;
use std::time::Duration;

use tracing::{debug, info, warn};

use shimcompiler_backend::calibration::{CalibrationEngine, CalibrationReport};
use shimcompiler_backend::coefficients::CoefficientStore;
use shimcompiler_backend::config::ShimConfig;
use shimcompiler_backend::error::{CalibrationError, TransferError};
use shimcompiler_backend::hardware::{BoardBus, BoardSelector, ChannelAddress, Settle, WriteMode};
use shimcompiler_backend::indexer::{BlockPosition, ScheduleIndexer};
use shimcompiler_backend::protocol::{parse_control_message, ScheduleConfig};
use shimcompiler_backend::schedule::ScheduleModel;
use shimcompiler_backend::utils::TickTimer;

use crate::error::ShimError;
use crate::transfer::read_payload;
use crate::trigger_chan::{TriggerEvent, TriggerRecvr};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PlaybackState {
    /// No usable payload for the active schedule.
    Unloaded,
    /// Payload loaded, waiting for the first trigger.
    Armed,
    Running,
    /// Every iteration of the schedule has been played.
    Exhausted,
}

/// Result of one trigger.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum TickOutcome {
    Updated {
        iteration: usize,
        position: BlockPosition,
    },
    Exhausted,
}

/// One channel's readback.
#[derive(Clone, Debug, PartialEq)]
pub struct ChannelReading {
    pub address: ChannelAddress,
    pub amps: f32,
    pub gain: f32,
    pub calibrated: bool,
}

impl ChannelReading {
    fn marker(&self) -> &'static str {
        if self.calibrated {
            ""
        } else {
            " X"
        }
    }
}

pub struct ShimController<B: BoardBus, S: Settle> {
    config: ShimConfig,
    output_order: Vec<ChannelAddress>,
    schedule: ScheduleModel,
    store: Option<CoefficientStore>,
    engine: CalibrationEngine,
    bus: BoardSelector<B>,
    settle: S,
    state: PlaybackState,
    iteration: usize,
}

impl<B: BoardBus, S: Settle> ShimController<B, S> {
    /// A controller with no schedule and every channel uncalibrated.
    ///
    /// `config` is expected to have passed [`ShimConfig::validate`].
    pub fn new(config: ShimConfig, bus: B, settle: S) -> Self {
        let engine = CalibrationEngine::new(
            config.topology.boards,
            config.topology.channels_per_board,
            config.calibration.clone(),
            config.conversion.clone(),
        );
        Self {
            output_order: config.topology.output_order(),
            schedule: ScheduleModel::new(config.effective_limits()),
            store: None,
            engine,
            bus: BoardSelector::new(bus),
            settle,
            state: PlaybackState::Unloaded,
            iteration: 0,
            config,
        }
    }

    pub fn config(&self) -> &ShimConfig {
        &self.config
    }

    pub fn schedule(&self) -> &ScheduleModel {
        &self.schedule
    }

    pub fn store(&self) -> Option<&CoefficientStore> {
        self.store.as_ref()
    }

    pub fn engine(&self) -> &CalibrationEngine {
        &self.engine
    }

    pub fn bus(&self) -> &B {
        self.bus.bus()
    }

    pub fn bus_mut(&mut self) -> &mut B {
        self.bus.bus_mut()
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    /// Next iteration to be played.
    pub fn iteration(&self) -> usize {
        self.iteration
    }

    fn refuse_while_running_(&self) -> Result<(), ShimError> {
        if self.state == PlaybackState::Running {
            return Err(ShimError::PlaybackActive);
        }
        Ok(())
    }

    /// Replaces the schedule. The previous payload no longer fits and is dropped.
    ///
    /// A rejected schedule leaves the previous schedule, payload and playback untouched.
    pub fn configure(&mut self, config: &ScheduleConfig) -> Result<(), ShimError> {
        self.schedule.apply(config)?;
        self.store = None;
        self.state = PlaybackState::Unloaded;
        self.iteration = 0;
        Ok(())
    }

    /// Reads the payload for the active schedule from `reader`.
    ///
    /// On failure the controller is left without a payload and refuses triggers until a
    /// complete one is loaded.
    pub fn load_payload<R: Read + ?Sized>(&mut self, reader: &mut R) -> Result<(), ShimError> {
        if !self.schedule.is_configured() {
            return Err(ShimError::NotConfigured);
        }
        self.store = None;
        self.state = PlaybackState::Unloaded;
        let store = read_payload(reader, &self.schedule, self.config.transfer.endianness)?;
        self.install_(store);
        Ok(())
    }

    /// Installs an already decoded payload.
    pub fn load_coefficients(&mut self, store: CoefficientStore) -> Result<(), ShimError> {
        if !self.schedule.is_configured() {
            return Err(ShimError::NotConfigured);
        }
        if store.channel_count() != self.schedule.channel_count()
            || store.total_samples() != self.schedule.total_samples()
        {
            return Err(TransferError::LengthMismatch {
                expected: self.schedule.total_coefficients(),
                found: store.len(),
            }
            .into());
        }
        self.install_(store);
        Ok(())
    }

    fn install_(&mut self, store: CoefficientStore) {
        info!(coefficients = store.len(), "payload loaded");
        self.store = Some(store);
        self.state = PlaybackState::Armed;
        self.iteration = 0;
    }

    /// Rewinds playback to iteration 0.
    pub fn start(&mut self) -> Result<(), ShimError> {
        if !self.schedule.is_configured() {
            return Err(ShimError::NotConfigured);
        }
        if self.store.is_none() {
            return Err(ShimError::PayloadNotLoaded);
        }
        self.state = PlaybackState::Armed;
        self.iteration = 0;
        info!("playback armed");
        Ok(())
    }

    /// Stops a running playback. The next trigger starts again from iteration 0.
    pub fn halt(&mut self) {
        if matches!(self.state, PlaybackState::Running | PlaybackState::Exhausted) {
            info!(iteration = self.iteration, "playback halted");
            self.state = PlaybackState::Armed;
            self.iteration = 0;
        }
    }

    /// Plays one iteration.
    ///
    /// # Errors
    /// [`ShimError::NotConfigured`] or [`ShimError::PayloadNotLoaded`] if there is nothing to
    /// play. Running past the end of the schedule is not an error.
    pub fn on_trigger(&mut self) -> Result<TickOutcome, ShimError> {
        if !self.schedule.is_configured() {
            return Err(ShimError::NotConfigured);
        }
        let Some(store) = self.store.as_ref() else {
            return Err(ShimError::PayloadNotLoaded);
        };
        let mut timer = TickTimer::new();

        let iteration = self.iteration;
        let Some(position) = self.schedule.resolve(iteration) else {
            if self.state != PlaybackState::Exhausted {
                info!(iteration, "schedule exhausted");
                self.state = PlaybackState::Exhausted;
            }
            return Ok(TickOutcome::Exhausted);
        };

        let sample = self.schedule.sample_index(position.block, position.rep);
        for (index, &address) in self
            .output_order
            .iter()
            .take(self.schedule.channel_count())
            .enumerate()
        {
            let amps = store.value(index, sample);
            let code = self
                .engine
                .code_for_amps(address, amps)
                .ok_or(ShimError::InvalidAddress(address))?;
            self.bus.write(address, code, WriteMode::WriteAndUpdate);
        }
        self.iteration += 1;
        self.state = PlaybackState::Running;
        debug!(iteration, block = position.block, rep = position.rep, "tick");

        let deadline = Duration::from_micros(self.config.playback.tick_deadline_us);
        timer.tick_deadline("tick", deadline);
        Ok(TickOutcome::Updated {
            iteration,
            position,
        })
    }

    /// Plays on every edge from `recvr` until the schedule is exhausted or a stop arrives.
    ///
    /// Returns the number of iterations played. A stop halts playback. A missed trigger also
    /// halts playback and is returned as an error, since every later write would be late.
    pub fn run(&mut self, recvr: &mut TriggerRecvr) -> Result<usize, ShimError> {
        let mut played = 0;
        loop {
            let event = match recvr.recv() {
                Ok(event) => event,
                Err(err) => {
                    warn!("{err}");
                    self.halt();
                    return Err(err);
                }
            };
            match event {
                TriggerEvent::Edge => match self.on_trigger()? {
                    TickOutcome::Updated { .. } => played += 1,
                    TickOutcome::Exhausted => break,
                },
                TriggerEvent::Stop => {
                    self.halt();
                    break;
                }
            }
        }
        Ok(played)
    }

    /// Calibrates every fitted channel. Refused while playback is running.
    pub fn calibrate_all(&mut self) -> Result<CalibrationReport, ShimError> {
        self.refuse_while_running_()?;
        Ok(self.engine.calibrate_all(&mut self.bus, &mut self.settle))
    }

    /// Drives every fitted channel to zero current with its current calibration.
    pub fn zero_all(&mut self) -> Result<(), ShimError> {
        self.refuse_while_running_()?;
        self.engine.zero_all(&mut self.bus);
        Ok(())
    }

    /// Drives one channel to `amps`. Returns the DAC code written.
    pub fn set_current(&mut self, address: ChannelAddress, amps: f32) -> Result<u16, ShimError> {
        self.refuse_while_running_()?;
        let code = self
            .engine
            .code_for_amps(address, amps)
            .ok_or(ShimError::InvalidAddress(address))?;
        self.bus.write(address, code, WriteMode::WriteAndUpdate);
        debug!(%address, amps, code, "current set");
        Ok(code)
    }

    fn read_channel_(&mut self, address: ChannelAddress) -> Result<ChannelReading, ShimError> {
        let cal = self
            .engine
            .channel(address)
            .cloned()
            .ok_or(ShimError::InvalidAddress(address))?;
        let raw = self.bus.read(address, self.engine.params().gain_read_cycles);
        Ok(ChannelReading {
            address,
            amps: self.engine.conversion().readback_amps(raw),
            gain: cal.gain,
            calibrated: cal.is_calibrated(),
        })
    }

    /// Reads back every fitted channel, board by board.
    pub fn report_currents(&mut self) -> Result<Vec<ChannelReading>, ShimError> {
        let addresses: Vec<ChannelAddress> = self.engine.channels().map(|(&a, _)| a).collect();
        addresses
            .into_iter()
            .map(|address| self.read_channel_(address))
            .collect()
    }

    /// Reads back every channel in output order.
    pub fn report_outputs(&mut self) -> Result<Vec<ChannelReading>, ShimError> {
        let addresses = self.output_order.clone();
        addresses
            .into_iter()
            .map(|address| self.read_channel_(address))
            .collect()
    }

    /// Executes one console command and returns its response lines.
    ///
    /// `payload` is the transport the `L` command reads coefficients from.
    pub fn handle_line(
        &mut self,
        line: &str,
        payload: &mut dyn Read,
    ) -> Result<Vec<String>, ShimError> {
        let line = line.trim();
        let Some(command) = line.chars().next() else {
            return Ok(Vec::new());
        };
        match command {
            'c' => {
                let config = parse_control_message(line)?;
                self.configure(&config)?;
                Ok(self.schedule_summary_())
            }
            'L' => {
                self.load_payload(payload)?;
                Ok(vec!["Done Loading".to_string()])
            }
            'C' => {
                let report = self.calibrate_all()?;
                let mut lines: Vec<String> = report
                    .failures()
                    .map(|err| match err {
                        CalibrationError::GainOutOfBand { .. } => "failed (gain)".to_string(),
                        CalibrationError::NotConverged { .. } => "failed (cal)".to_string(),
                    })
                    .collect();
                lines.push("Done Calibrating".to_string());
                Ok(lines)
            }
            'Z' => {
                self.zero_all()?;
                Ok(vec!["Done Zeroing".to_string()])
            }
            'I' => {
                let readings = self.report_currents()?;
                let mut lines = Vec::new();
                let mut board = None;
                for r in &readings {
                    if board != Some(r.address.board) {
                        board = Some(r.address.board);
                        lines.push("---------------".to_string());
                        lines.push(format!("B: {}", r.address.board));
                    }
                    lines.push(format!(
                        "{}: {:.4}\t{:.2}{}",
                        r.address.channel,
                        r.amps,
                        r.gain,
                        r.marker()
                    ));
                }
                lines.push("Done Printing Currents".to_string());
                Ok(lines)
            }
            'P' => {
                let readings = self.report_outputs()?;
                let mut lines: Vec<String> = readings
                    .iter()
                    .enumerate()
                    .map(|(i, r)| {
                        format!("{}{}\t{:.4}\t{:.2}{}", i, r.address, r.amps, r.gain, r.marker())
                    })
                    .collect();
                lines.push("Done Printing Outputs".to_string());
                Ok(lines)
            }
            'X' => {
                let (address, amps) = parse_set_current(line)?;
                if !self.engine.contains(address) {
                    return Err(ShimError::InvalidAddress(address));
                }
                self.set_current(address, amps)?;
                Ok(vec![
                    format!(
                        "board: {}; channel: {}; value: {:.2}",
                        address.board, address.channel, amps
                    ),
                    "Done Setting Current".to_string(),
                ])
            }
            'S' => {
                self.start()?;
                Ok(vec!["Ready".to_string()])
            }
            'H' => {
                self.halt();
                Ok(vec!["Halted".to_string()])
            }
            _ => Err(ShimError::UnknownCommand(line.to_string())),
        }
    }

    fn schedule_summary_(&self) -> Vec<String> {
        fn join(values: impl IntoIterator<Item = usize>) -> String {
            values
                .into_iter()
                .map(|v| v.to_string())
                .collect::<Vec<_>>()
                .join(" ")
        }
        let blocks = self.schedule.blocks();
        vec![
            format!("channels: {}", self.schedule.channel_count()),
            format!("blocks: {}", blocks.len()),
            format!("lengths: {}", join(blocks.iter().map(|b| b.length))),
            format!("repeats: {}", join(blocks.iter().map(|b| b.repeat_count))),
            format!("transitions: {}", join(self.schedule.transitions().iter().copied())),
            format!("base: {}", join(self.schedule.base().iter().copied())),
            "Done Configuring".to_string(),
        ]
    }
}

/// Parses `X <board> <channel> <amps>`.
fn parse_set_current(line: &str) -> Result<(ChannelAddress, f32), ShimError> {
    let malformed = |reason: &str| ShimError::MalformedCommand {
        command: 'X',
        reason: reason.to_string(),
    };
    let mut parts = line[1..].split_whitespace();
    let board = parts
        .next()
        .and_then(|s| s.parse::<usize>().ok())
        .ok_or_else(|| malformed("expected a board number"))?;
    let channel = parts
        .next()
        .and_then(|s| s.parse::<usize>().ok())
        .ok_or_else(|| malformed("expected a channel number"))?;
    let amps = parts
        .next()
        .and_then(|s| s.parse::<f32>().ok())
        .filter(|a| a.is_finite())
        .ok_or_else(|| malformed("expected a current in amps"))?;
    if parts.next().is_some() {
        return Err(malformed("unexpected trailing arguments"));
    }
    Ok((ChannelAddress::new(board, channel), amps))
}
