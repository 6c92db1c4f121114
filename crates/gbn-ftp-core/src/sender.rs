//! Go-back-N send side.
//!
//! ```text
//!   base                next_seq
//!     │                     │
//! ────┼─────────────────────┼────────────▶ seq space
//!     │ <── outstanding ──▶ │ <── admissible while next_seq - base < N
//! ```
//!
//! One timer covers the oldest outstanding segment. When it fires every
//! outstanding segment is sent again, in order, with its original bytes.

use bytes::Bytes;
use gbn_ftp_abstract::{
    AckSegment, DataSegment, ProtocolConfig, ProtocolEvent, SegmentSource, SystemContext,
    TransferStats,
};
use std::collections::VecDeque;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Upper bound on the window buffer reserved up front; larger windows grow on demand.
const PREALLOCATED_WINDOW: usize = 1024;

#[derive(Debug, Error)]
pub enum SenderError {
    #[error("failed to read the input file")]
    Source(#[source] io::Error),
    #[error("gave up after {0} consecutive timeouts")]
    RetryLimitExceeded(u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckOutcome {
    /// The window slid forward by `acked` segments.
    Advanced { acked: u32 },
    /// Stale, duplicate, corrupt or foreign ACK.
    Ignored,
}

#[derive(Debug)]
struct Outstanding {
    segment: DataSegment,
    wire: Bytes,
}

pub struct GbnSender<S> {
    peer: SocketAddr,
    source: S,
    window_size: usize,
    mss: usize,
    timeout: Duration,
    max_consecutive_timeouts: Option<u32>,

    base: u32,
    next_seq: u32,
    window: VecDeque<Outstanding>,
    exhausted: bool,

    started_at: Option<Duration>,
    consecutive_timeouts: u32,
    completed: bool,
    stats: TransferStats,
}

impl<S: SegmentSource> GbnSender<S> {
    /// `config` is assumed to have passed [`ProtocolConfig::validate`].
    pub fn new(peer: SocketAddr, source: S, config: &ProtocolConfig) -> Self {
        Self {
            peer,
            source,
            window_size: config.window_size,
            mss: config.mss,
            timeout: config.timeout(),
            max_consecutive_timeouts: config.max_consecutive_timeouts,
            base: 0,
            next_seq: 0,
            window: VecDeque::with_capacity(config.window_size.min(PREALLOCATED_WINDOW)),
            exhausted: false,
            started_at: None,
            consecutive_timeouts: 0,
            completed: false,
            stats: TransferStats::default(),
        }
    }

    /// Begin numbering at `seq` instead of 0.
    pub fn with_initial_seq(mut self, seq: u32) -> Self {
        self.base = seq;
        self.next_seq = seq;
        self
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn base(&self) -> u32 {
        self.base
    }

    pub fn next_seq(&self) -> u32 {
        self.next_seq
    }

    pub fn in_flight(&self) -> usize {
        self.window.len()
    }

    /// Segments awaiting acknowledgement, oldest first.
    pub fn outstanding(&self) -> impl Iterator<Item = &DataSegment> {
        self.window.iter().map(|entry| &entry.segment)
    }

    pub fn stats(&self) -> &TransferStats {
        &self.stats
    }

    /// All input framed and acknowledged.
    pub fn is_complete(&self) -> bool {
        self.exhausted && self.window.is_empty()
    }

    /// Record the start time and fill the window.
    pub fn start(&mut self, ctx: &mut dyn SystemContext) -> Result<usize, SenderError> {
        self.started_at.get_or_insert(ctx.now());
        info!(
            "Sending to {} with N={} MSS={} timeout={:?}",
            self.peer, self.window_size, self.mss, self.timeout
        );
        let admitted = self.admit(ctx)?;
        self.finish_if_complete(ctx);
        Ok(admitted)
    }

    /// Frame and transmit new segments while the window has room.
    pub fn admit(&mut self, ctx: &mut dyn SystemContext) -> Result<usize, SenderError> {
        let was_empty = self.window.is_empty();
        let mut admitted = 0;

        while !self.exhausted && self.window.len() < self.window_size {
            let Some(payload) = self
                .source
                .read_segment(self.mss)
                .map_err(SenderError::Source)?
            else {
                debug!("Input exhausted after {} segments", self.stats.segments);
                self.exhausted = true;
                break;
            };

            let segment = DataSegment::new(self.next_seq, payload);
            let wire = segment.encode();
            debug!(
                "Sending seq {} ({} bytes)",
                segment.seq,
                segment.payload.len()
            );
            ctx.send_datagram(self.peer, wire.clone());

            self.stats.bytes += segment.payload.len() as u64;
            self.stats.segments += 1;
            self.stats.transmissions += 1;
            self.window.push_back(Outstanding { segment, wire });
            self.next_seq = self.next_seq.wrapping_add(1);
            admitted += 1;
        }

        if was_empty && admitted > 0 {
            ctx.start_timer(self.timeout);
        }
        Ok(admitted)
    }

    /// Handle a datagram arriving from the network, then refill the window.
    pub fn on_datagram(
        &mut self,
        ctx: &mut dyn SystemContext,
        from: SocketAddr,
        datagram: &[u8],
    ) -> Result<AckOutcome, SenderError> {
        if from != self.peer {
            debug!("Ignoring datagram from unexpected peer {}", from);
            return Ok(AckOutcome::Ignored);
        }
        let ack = match AckSegment::decode(datagram) {
            Ok(ack) => ack,
            Err(err) => {
                debug!("Discarding datagram from {}: {}", from, err);
                return Ok(AckOutcome::Ignored);
            }
        };

        let outcome = self.on_ack(ctx, ack.seq);
        if let AckOutcome::Advanced { .. } = outcome {
            self.admit(ctx)?;
            self.finish_if_complete(ctx);
        }
        Ok(outcome)
    }

    /// Apply a cumulative ACK for `seq`.
    pub fn on_ack(&mut self, ctx: &mut dyn SystemContext, seq: u32) -> AckOutcome {
        let offset = seq.wrapping_sub(self.base) as usize;
        if offset >= self.window.len() {
            debug!(
                "Ignoring ACK {} (base={}, next={})",
                seq, self.base, self.next_seq
            );
            return AckOutcome::Ignored;
        }

        let acked = offset + 1;
        self.window.drain(..acked);
        self.base = seq.wrapping_add(1);
        self.consecutive_timeouts = 0;
        debug!("ACK {} slides base to {}", seq, self.base);

        if self.window.is_empty() {
            ctx.cancel_timer();
        } else {
            ctx.start_timer(self.timeout);
        }
        AckOutcome::Advanced {
            acked: acked as u32,
        }
    }

    /// The retransmission timer fired: go back and resend the whole window.
    pub fn on_timeout(&mut self, ctx: &mut dyn SystemContext) -> Result<(), SenderError> {
        if self.window.is_empty() {
            return Ok(());
        }

        self.stats.timeouts += 1;
        self.consecutive_timeouts += 1;
        ctx.report(ProtocolEvent::Timeout { seq: self.base });

        if let Some(limit) = self.max_consecutive_timeouts
            && self.consecutive_timeouts >= limit
        {
            warn!(
                "Giving up on seq {} after {} consecutive timeouts",
                self.base, self.consecutive_timeouts
            );
            return Err(SenderError::RetryLimitExceeded(limit));
        }

        debug!(
            "Timeout: retransmitting seq {}..{}",
            self.base, self.next_seq
        );
        for entry in &self.window {
            ctx.send_datagram(self.peer, entry.wire.clone());
        }
        let resent = self.window.len() as u64;
        self.stats.transmissions += resent;
        self.stats.retransmissions += resent;
        ctx.start_timer(self.timeout);
        Ok(())
    }

    fn finish_if_complete(&mut self, ctx: &mut dyn SystemContext) {
        if self.completed || !self.is_complete() {
            return;
        }
        self.completed = true;
        let started = self.started_at.unwrap_or_default();
        self.stats.elapsed = ctx.now().saturating_sub(started);
        info!(
            "Transfer to {} complete: {} segments, {} retransmissions",
            self.peer, self.stats.segments, self.stats.retransmissions
        );
        ctx.report(ProtocolEvent::TransferComplete(self.stats));
    }
}
