use anyhow::{Context, Result};
use clap::Parser;
use gbn_ftp_abstract::ProtocolConfig;
use gbn_ftp_cli::{FileSink, Server, init_logging, load_config_file};
use std::path::PathBuf;
use tracing::info;

#[derive(Parser, Debug)]
#[command(author, version, about = "Go-back-N file transfer receiver")]
struct Args {
    /// UDP port to listen on (7735).
    port: u16,
    /// File that will store the received data.
    file_name: PathBuf,
    /// Probability that an incoming packet is dropped before validation, in [0, 1).
    p: f64,

    /// Seed the loss channels for a reproducible run.
    #[arg(long)]
    seed: Option<u64>,

    /// Quiet period after which a seq-0 segment from the same client starts a new transfer.
    #[arg(long)]
    idle_gap_ms: Option<u64>,

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
        config.port = self.port;
        config.loss_probability = self.p;
        if let Some(gap) = self.idle_gap_ms {
            config.idle_gap_ms = gap;
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
    let sink = FileSink::create(&args.file_name)
        .with_context(|| format!("Failed to open {}", args.file_name.display()))?;
    let server = Server::bind(&config, sink, args.seed).await?;

    println!(
        "Listening on UDP port {}, writing to '{}'",
        config.port,
        args.file_name.display()
    );
    println!("Packet loss probability = {}", config.loss_probability);

    let shutdown = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    server.run(shutdown, |event| println!("{event}")).await?;
    info!("Server stopped");
    Ok(())
}
