use anyhow::{Context, Result, bail};
use clap::Parser;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::EnvFilter;

use gbn_ftp_abstract::{ProtocolConfig, SimConfig};
use gbn_ftp_simulator::{SimulationReport, Simulator, load_scenario, run_scenario};

#[derive(Parser, Debug)]
#[command(author, version, about = "Go-back-N file transfer simulator")]
struct Args {
    /// Run a TOML scenario and check its assertions.
    #[arg(long, conflicts_with_all = ["file", "size"])]
    scenario: Option<PathBuf>,

    /// Transfer the contents of this file.
    #[arg(long, conflicts_with = "size")]
    file: Option<PathBuf>,

    /// Transfer this many generated bytes.
    #[arg(long, default_value_t = 100_000)]
    size: usize,

    #[arg(long, default_value_t = 0.05)]
    loss: f64,
    #[arg(long, default_value_t = 0.0)]
    corrupt: f64,
    #[arg(long, default_value_t = 42)]
    seed: u64,
    #[arg(long, default_value_t = 10)]
    min_latency: u64,
    #[arg(long, default_value_t = 100)]
    max_latency: u64,

    /// Go-back-N window size N.
    #[arg(short = 'n', long, default_value_t = 64)]
    window: usize,
    #[arg(long, default_value_t = 500)]
    mss: usize,
    #[arg(long, default_value_t = 200)]
    timeout_ms: u64,

    /// Write a JSON trace of the finished simulation.
    #[arg(long)]
    trace_out: Option<PathBuf>,
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging();
    info!("gbn-sim starting…");

    let report = match &args.scenario {
        Some(path) => {
            let scenario = load_scenario(path)?;
            let report = run_scenario(&scenario)
                .with_context(|| format!("Scenario {} failed", scenario.name))?;
            println!("Scenario {} passed.", scenario.name);
            report
        }
        None => run_transfer(&args)?,
    };

    print_summary(&report);

    if let Some(trace_path) = &args.trace_out {
        write_trace(trace_path, &report)?;
    }

    Ok(())
}

fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn run_transfer(args: &Args) -> Result<SimulationReport> {
    let config = SimConfig {
        loss_rate: args.loss,
        corrupt_rate: args.corrupt,
        min_latency: args.min_latency,
        max_latency: args.max_latency,
        seed: args.seed,
    };
    let protocol = ProtocolConfig {
        window_size: args.window,
        mss: args.mss,
        timeout_ms: args.timeout_ms,
        ..ProtocolConfig::default()
    };

    let data = match &args.file {
        Some(path) => fs::read(path)
            .with_context(|| format!("Failed to read input file {}", path.display()))?,
        None => (0..args.size).map(|i| (i * 31 % 251) as u8).collect(),
    };

    let mut sim =
        Simulator::new(config, protocol).context("Invalid simulation configuration")?;
    sim.schedule_transfer(0, 0, data.clone());
    info!("Starting headless simulation of {} bytes…", data.len());
    sim.run_until_complete();
    info!("Simulation complete.");

    if let Some((index, err)) = sim.failed_transfers().next() {
        bail!("sender {index} aborted: {err}");
    }
    if sim.delivered() != data.as_slice() {
        bail!(
            "receiver output differs from input ({} of {} bytes)",
            sim.delivered().len(),
            data.len()
        );
    }
    Ok(sim.export_report())
}

fn print_summary(report: &SimulationReport) {
    println!(
        "Delivered {} bytes in {} ms of virtual time.",
        report.delivered_bytes, report.duration_ms
    );
    println!(
        "Data packets sent: {} ({} dropped), ACKs: {} ({} dropped), timeouts: {}.",
        report.sender_packet_count,
        report.data_dropped,
        report.acks_offered,
        report.acks_dropped,
        report.timeout_count
    );
}

fn write_trace(path: &Path, report: &SimulationReport) -> Result<()> {
    let data = serde_json::to_vec_pretty(report).context("Failed to serialize simulation trace")?;
    fs::write(path, &data)
        .with_context(|| format!("Failed to write trace file {}", path.display()))?;
    Ok(())
}
