use anyhow::{Context, Result};
use gbn_ftp_abstract::{ProtocolConfig, ProtocolEvent, SegmentSource, TransferStats};
use gbn_ftp_core::{ActionBuffer, GbnSender, ScopedContext, TimerCommand};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::{Instant, sleep_until};
use tracing::{debug, info};

use crate::MAX_DATAGRAM;

/// Stand-in deadline while the retransmission timer is disarmed.
const IDLE: Duration = Duration::from_secs(24 * 60 * 60);

/// Transfer everything `source` yields to the receiver at `server`.
///
/// ACK arrivals and timer expiry are merged in one select loop that owns the
/// sender; the call returns once every segment is acknowledged.
pub async fn send_file<S: SegmentSource>(
    server: SocketAddr,
    source: S,
    config: &ProtocolConfig,
    mut on_event: impl FnMut(&ProtocolEvent),
) -> Result<TransferStats> {
    config.validate().context("Invalid client configuration")?;
    let local = if server.is_ipv4() {
        SocketAddr::from(([0, 0, 0, 0], 0))
    } else {
        SocketAddr::from(([0u16; 8], 0))
    };
    let socket = UdpSocket::bind(local)
        .await
        .context("Failed to bind client socket")?;
    info!("Sending from {} to {}", socket.local_addr()?, server);

    let mut sender = GbnSender::new(server, source, config);
    let started = Instant::now();
    let mut deadline: Option<Instant> = None;
    let mut stats = None;
    let mut buf = vec![0u8; MAX_DATAGRAM];

    let mut buffer = ActionBuffer::default();
    sender
        .start(&mut ScopedContext::new(&mut buffer, started.elapsed()))
        .context("Failed to start the transfer")?;
    apply(&socket, buffer, &mut deadline, &mut stats, &mut on_event).await?;

    while !sender.is_complete() {
        let wake_at = deadline.unwrap_or_else(|| Instant::now() + IDLE);
        let mut buffer = ActionBuffer::default();
        tokio::select! {
            received = socket.recv_from(&mut buf) => {
                let (len, from) = received.context("UDP receive failed")?;
                let mut ctx = ScopedContext::new(&mut buffer, started.elapsed());
                let outcome = sender.on_datagram(&mut ctx, from, &buf[..len])?;
                debug!("ACK from {}: {:?}", from, outcome);
            }
            _ = sleep_until(wake_at), if deadline.is_some() => {
                deadline = None;
                let mut ctx = ScopedContext::new(&mut buffer, started.elapsed());
                sender.on_timeout(&mut ctx)?;
            }
        }
        apply(&socket, buffer, &mut deadline, &mut stats, &mut on_event).await?;
    }

    Ok(stats.unwrap_or(*sender.stats()))
}

async fn apply(
    socket: &UdpSocket,
    buffer: ActionBuffer,
    deadline: &mut Option<Instant>,
    stats: &mut Option<TransferStats>,
    on_event: &mut impl FnMut(&ProtocolEvent),
) -> Result<()> {
    for event in &buffer.events {
        if let ProtocolEvent::TransferComplete(done) = event {
            *stats = Some(*done);
        }
        on_event(event);
    }
    match buffer.timer {
        Some(TimerCommand::Start(delay)) => *deadline = Some(Instant::now() + delay),
        Some(TimerCommand::Cancel) => *deadline = None,
        None => {}
    }
    for (to, datagram) in buffer.outgoing {
        socket
            .send_to(&datagram, to)
            .await
            .with_context(|| format!("Failed to send to {to}"))?;
    }
    Ok(())
}
