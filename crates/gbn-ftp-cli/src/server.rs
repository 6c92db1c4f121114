use anyhow::{Context, Result};
use gbn_ftp_abstract::packet::{classify, peek_seq};
use gbn_ftp_abstract::{Direction, OutputSink, ProtocolConfig, ProtocolEvent, SegmentKind};
use gbn_ftp_core::{ActionBuffer, GbnReceiver, LossChannel, ScopedContext};
use std::future::Future;
use std::net::SocketAddr;
use tokio::net::UdpSocket;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::MAX_DATAGRAM;

/// Go-back-N receiver bound to a UDP port.
///
/// Incoming data and outgoing ACKs each pass through their own loss channel
/// with the configured probability. Only data-path losses reach `on_event`;
/// dropped ACKs are logged.
pub struct Server<S> {
    socket: UdpSocket,
    receiver: GbnReceiver<S>,
    data_loss: LossChannel,
    ack_loss: LossChannel,
    started: Instant,
}

impl<S: OutputSink> Server<S> {
    /// Listen on `config.port` on every interface.
    ///
    /// `seed` makes the loss pattern reproducible; without one the OS RNG is used.
    pub async fn bind(config: &ProtocolConfig, sink: S, seed: Option<u64>) -> Result<Self> {
        config.validate().context("Invalid server configuration")?;
        let socket = UdpSocket::bind(SocketAddr::from(([0, 0, 0, 0], config.port)))
            .await
            .with_context(|| format!("Failed to bind UDP port {}", config.port))?;
        Self::with_socket(socket, config, sink, seed)
    }

    /// Serve on an already bound socket. `config.port` is ignored.
    pub fn with_socket(
        socket: UdpSocket,
        config: &ProtocolConfig,
        sink: S,
        seed: Option<u64>,
    ) -> Result<Self> {
        let loss = config.loss()?;
        let (data_loss, ack_loss) = match seed {
            Some(seed) => (
                LossChannel::seeded(loss, seed),
                LossChannel::seeded(loss, seed.wrapping_add(1)),
            ),
            None => (LossChannel::from_os_rng(loss), LossChannel::from_os_rng(loss)),
        };

        Ok(Self {
            socket,
            receiver: GbnReceiver::from_config(sink, config),
            data_loss,
            ack_loss,
            started: Instant::now(),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    pub fn receiver(&self) -> &GbnReceiver<S> {
        &self.receiver
    }

    /// Serve until `shutdown` resolves, handing every protocol event to
    /// `on_event`. Returns the output sink.
    pub async fn run(
        mut self,
        shutdown: impl Future<Output = ()>,
        mut on_event: impl FnMut(&ProtocolEvent),
    ) -> Result<S> {
        info!(
            "Listening on UDP {}, loss probability = {}",
            self.local_addr()?,
            self.data_loss.probability().get()
        );
        tokio::pin!(shutdown);
        let mut buf = vec![0u8; MAX_DATAGRAM];

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                received = self.socket.recv_from(&mut buf) => {
                    let (len, from) = received.context("UDP receive failed")?;
                    self.handle_datagram(&buf[..len], from, &mut on_event).await?;
                }
            }
        }

        info!(
            "Shutting down after {} session(s); dropped {} of {} data packets",
            self.receiver.session_resets(),
            self.data_loss.dropped(),
            self.data_loss.offered()
        );
        Ok(self.receiver.into_sink())
    }

    async fn handle_datagram(
        &mut self,
        datagram: &[u8],
        from: SocketAddr,
        on_event: &mut impl FnMut(&ProtocolEvent),
    ) -> Result<()> {
        let seq = match (classify(datagram), peek_seq(datagram)) {
            (Ok(SegmentKind::Data), Some(seq)) => seq,
            (kind, _) => {
                debug!(
                    "Discarding {}-byte non-data datagram from {}: {:?}",
                    datagram.len(),
                    from,
                    kind
                );
                return Ok(());
            }
        };
        // Loss is decided before the checksum is verified.
        if let Err(loss) = self.data_loss.admit(seq, Direction::Data) {
            on_event(&ProtocolEvent::from(loss));
            return Ok(());
        }

        let mut buffer = ActionBuffer::default();
        let verdict = {
            let mut ctx = ScopedContext::new(&mut buffer, self.started.elapsed());
            self.receiver.on_datagram(&mut ctx, from, datagram)
        }
        .context("Failed to write the output file")?;
        debug!("seq {} from {}: {:?}", seq, from, verdict);

        for event in &buffer.events {
            on_event(event);
        }
        for (to, ack) in buffer.outgoing {
            let ack_seq = peek_seq(&ack).unwrap_or_default();
            if let Err(loss) = self.ack_loss.admit(ack_seq, Direction::Ack) {
                info!("{}", loss);
                continue;
            }
            self.socket
                .send_to(&ack, to)
                .await
                .with_context(|| format!("Failed to send ACK to {to}"))?;
        }
        Ok(())
    }
}
