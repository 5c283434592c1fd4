use std::fs;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;

use shimcompiler_backend::coefficients::CoefficientStore;
use shimcompiler_backend::config::ShimConfig;
use shimcompiler_backend::indexer::ScheduleIndexer;
use shimcompiler_backend::protocol::parse_control_message;
use shimcompiler_backend::schedule::ScheduleModel;
use shimcompiler_backend::utils::init_tracing;

/// Checks a schedule control message and previews what it plays.
#[derive(Parser, Debug)]
#[command(name = "shimcompiler", version)]
struct Cli {
    /// Control message, e.g. `c2|b2|l4|l3|r2|r1`.
    message: String,
    /// Deployment config (TOML). Defaults are used if the file does not exist.
    #[arg(long, default_value = "shim.toml")]
    config: PathBuf,
    /// Raw coefficient payload to preview against the schedule.
    #[arg(long)]
    coefficients: Option<PathBuf>,
    /// Number of iterations to preview.
    #[arg(long, default_value = "16")]
    preview: usize,
}

fn main() -> Result<()> {
    init_tracing("info");
    let cli = Cli::parse();
    let cfg = ShimConfig::load(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;

    let config = parse_control_message(&cli.message)?;
    let mut sched = ScheduleModel::new(cfg.effective_limits());
    sched.apply(&config)?;

    println!("canonical:   {}", config.to_control_string());
    println!("transitions: {:?}", sched.transitions());
    println!("base:        {:?}", sched.base());
    println!(
        "iterations:  {}  samples/channel: {}  payload bytes: {}",
        sched.total_iterations(),
        sched.total_samples(),
        sched.total_coefficients() * 4
    );

    let Some(path) = cli.coefficients else {
        return Ok(());
    };
    let bytes = fs::read(&path).with_context(|| format!("reading {}", path.display()))?;
    if bytes.len() != sched.total_coefficients() * 4 {
        bail!(
            "{} holds {} bytes, schedule needs {}",
            path.display(),
            bytes.len(),
            sched.total_coefficients() * 4
        );
    }
    let store = CoefficientStore::from_bytes(
        &bytes,
        sched.channel_count(),
        sched.total_samples(),
        cfg.transfer.endianness,
    )?;
    let wave = sched.render_waveform(&store, 0, cli.preview);
    for (channel, row) in wave.rows().into_iter().enumerate() {
        println!("ch{channel:<2} {row}");
    }
    Ok(())
}
