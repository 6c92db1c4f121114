use anyhow::{Context, Result, anyhow};
use clap::Parser;
use gbn_ftp_abstract::{ChunkReader, ProtocolConfig, ProtocolEvent};
use gbn_ftp_cli::{init_logging, load_config_file, send_file};
use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;
use tokio::net::lookup_host;

#[derive(Parser, Debug)]
#[command(author, version, about = "Go-back-N file transfer sender")]
struct Args {
    /// Server host name or IP address.
    server_host: String,
    /// Server UDP port (7735).
    server_port: u16,
    /// Path to the file being transferred.
    file_name: PathBuf,
    /// Go-back-N window size N.
    window_size: usize,
    /// Maximum segment size in bytes.
    mss: usize,

    /// Retransmission timeout in seconds.
    #[arg(long)]
    timeout: Option<f64>,

    /// Give up after this many consecutive timeouts without progress.
    #[arg(long)]
    max_timeouts: Option<u32>,

    /// TOML file with defaults for any protocol setting.
    #[arg(long)]
    config: Option<PathBuf>,
}

impl Args {
    fn protocol_config(&self) -> Result<ProtocolConfig> {
        let mut config = ProtocolConfig::default();
        if let Some(path) = &self.config {
            load_config_file(path)?.apply_to(&mut config);
        }
        config.port = self.server_port;
        config.window_size = self.window_size;
        config.mss = self.mss;
        if let Some(secs) = self.timeout {
            if !(secs.is_finite() && secs > 0.0) {
                return Err(anyhow!("timeout must be a positive number of seconds"));
            }
            config.timeout_ms = ((secs * 1000.0).round() as u64).max(1);
        }
        if let Some(k) = self.max_timeouts {
            config.max_consecutive_timeouts = Some(k);
        }
        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging();

    let config = args.protocol_config()?;
    let server = lookup_host((args.server_host.as_str(), args.server_port))
        .await
        .with_context(|| format!("Failed to resolve {}", args.server_host))?
        .next()
        .ok_or_else(|| anyhow!("{} did not resolve to an address", args.server_host))?;
    let file = File::open(&args.file_name)
        .with_context(|| format!("Failed to open {}", args.file_name.display()))?;

    let stats = send_file(
        server,
        ChunkReader::new(BufReader::new(file)),
        &config,
        |event| {
            if !matches!(event, ProtocolEvent::TransferComplete(_)) {
                println!("{event}");
            }
        },
    )
    .await?;

    println!("{}", ProtocolEvent::TransferComplete(stats));
    println!(
        "Transmissions: {}, retransmissions: {}, timeouts: {}",
        stats.transmissions, stats.retransmissions, stats.timeouts
    );
    println!("Total transfer time: {:.6} seconds", stats.elapsed.as_secs_f64());
    Ok(())
}
