use std::fs::File;
use std::io::{self, BufRead, BufReader, Write};
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{error, info};

use shimcompiler_backend::config::ShimConfig;
use shimcompiler_backend::hardware::ThreadSettle;
use shimcompiler_backend::indexer::ScheduleIndexer;
use shimcompiler_backend::simulated::{SimulatedBoards, SimulatedChannel};
use shimcompiler_backend::utils::init_tracing;
use shimctrl_backend::{ShimController, TriggerChan};

/// Shim driver control loop against simulated boards.
#[derive(Parser, Debug)]
#[command(name = "shimctrl", version)]
struct Cli {
    /// Deployment config (TOML). Defaults are used if the file does not exist.
    #[arg(long, default_value = "shim.toml")]
    config: PathBuf,
    /// Gain of every simulated amplifier, in amps per DAC volt.
    #[arg(long, default_value = "-1.62", allow_hyphen_values = true)]
    sim_gain: f32,
    /// Input offset of every simulated amplifier, in volts.
    #[arg(long, default_value = "0.02", allow_hyphen_values = true)]
    sim_offset: f32,
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Answer console commands from stdin. `L` reads the payload from stdin right after its line.
    Console,
    /// Calibrate, load a schedule and play it on a simulated trigger.
    Play {
        /// Control message, e.g. `c2|b2|l4|l3|r2|r1`.
        message: String,
        /// Raw coefficient payload.
        payload: PathBuf,
        /// Trigger period in microseconds.
        #[arg(long, default_value = "1000")]
        period_us: u64,
    },
}

type Controller = ShimController<SimulatedBoards, ThreadSettle>;

fn build_controller(cli: &Cli) -> Result<Controller> {
    let cfg = ShimConfig::load(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    let sim = SimulatedBoards::uniform(
        cfg.topology.boards,
        cfg.topology.channels_per_board,
        SimulatedChannel::new(cli.sim_gain, cli.sim_offset),
        cfg.conversion.clone(),
    );
    Ok(ShimController::new(cfg, sim, ThreadSettle))
}

fn console(mut ctrl: Controller) -> Result<()> {
    let mut input = BufReader::new(io::stdin().lock());
    let mut out = io::stdout().lock();
    let mut line = String::new();
    loop {
        line.clear();
        if input.read_line(&mut line)? == 0 {
            return Ok(());
        }
        match ctrl.handle_line(&line, &mut input) {
            Ok(lines) => {
                for l in lines {
                    writeln!(out, "{l}")?;
                }
            }
            Err(err) => {
                error!("{}: {err}", line.trim());
                writeln!(out, "error: {err}")?;
            }
        }
        out.flush()?;
    }
}

fn play(mut ctrl: Controller, message: &str, payload: &PathBuf, period: Duration) -> Result<()> {
    let report = ctrl.calibrate_all()?;
    info!(
        calibrated = report.calibrated_count(),
        total = report.results.len(),
        "calibrated"
    );
    ctrl.configure(&message.parse()?)?;
    let mut file = File::open(payload).with_context(|| format!("opening {}", payload.display()))?;
    ctrl.load_payload(&mut file)?;

    let chan = TriggerChan::new();
    let mut recvr = chan.new_recvr();
    let total = ctrl.schedule().total_iterations();
    let trigger = thread::spawn(move || {
        for _ in 0..total {
            thread::sleep(period);
            chan.edge();
        }
        thread::sleep(period);
        chan.stop();
    });

    let played = ctrl.run(&mut recvr);
    trigger
        .join()
        .map_err(|_| anyhow::anyhow!("trigger thread panicked"))?;
    let played = played?;
    info!(played, "playback finished");

    ctrl.zero_all()?;
    Ok(())
}

fn main() -> Result<()> {
    init_tracing("info");
    let cli = Cli::parse();
    let ctrl = build_controller(&cli)?;
    match &cli.cmd {
        Cmd::Console => console(ctrl),
        Cmd::Play {
            message,
            payload,
            period_us,
        } => play(ctrl, message, payload, Duration::from_micros(*period_us)),
    }
}
