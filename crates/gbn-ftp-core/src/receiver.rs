//! Go-back-N receive side.
//!
//! [`GbnReceiver`] accepts data segments strictly in sequence order and
//! answers every valid segment with a cumulative ACK:
//!
//! - `seq == expected`: the payload is appended to the [`OutputSink`], the
//!   cursor advances and `ACK(seq)` is sent.
//! - `seq < expected` (duplicate) or `seq > expected` (gap): nothing is
//!   written and the last cumulative ACK is repeated. Before the first
//!   segment of a session is accepted there is no such ACK and nothing is sent.
//! - Corrupt datagrams are dropped without an ACK.
//!
//! Only one peer session exists at a time. A segment from a different
//! endpoint, or a seq-0 segment from the current endpoint after it has been
//! quiet for longer than the idle gap, starts a new session and truncates the
//! sink.

use gbn_ftp_abstract::{
    AckSegment, CorruptPacket, DataSegment, OutputSink, ProtocolConfig, ProtocolEvent,
    ResetReason, SystemContext,
};
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

use crate::seq::seq_diff;

#[derive(Debug, Error)]
pub enum ReceiverError {
    #[error("failed to write to the output sink")]
    Sink(#[source] io::Error),
}

/// What happened to one incoming datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Accepted { seq: u32 },
    Duplicate { seq: u32 },
    OutOfOrder { seq: u32 },
    Corrupt(CorruptPacket),
}

/// Receive state for the peer currently being served.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    peer: SocketAddr,
    expected_seq: u32,
    last_ack: Option<u32>,
    last_activity: Duration,
    bytes_received: u64,
}

impl Session {
    fn new(peer: SocketAddr, now: Duration) -> Self {
        Self {
            peer,
            expected_seq: 0,
            last_ack: None,
            last_activity: now,
            bytes_received: 0,
        }
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn expected_seq(&self) -> u32 {
        self.expected_seq
    }

    /// The cumulative ACK most recently sent, if any segment has been accepted.
    pub fn last_ack(&self) -> Option<u32> {
        self.last_ack
    }

    pub fn bytes_received(&self) -> u64 {
        self.bytes_received
    }
}

pub struct GbnReceiver<S> {
    sink: S,
    idle_gap: Duration,
    session: Option<Session>,
    resets: u32,
}

impl<S: OutputSink> GbnReceiver<S> {
    pub fn new(sink: S, idle_gap: Duration) -> Self {
        Self {
            sink,
            idle_gap,
            session: None,
            resets: 0,
        }
    }

    pub fn from_config(sink: S, config: &ProtocolConfig) -> Self {
        Self::new(sink, config.idle_gap())
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    /// Number of sessions started so far.
    pub fn session_resets(&self) -> u32 {
        self.resets
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn into_sink(self) -> S {
        self.sink
    }

    /// Handle a raw datagram from `from`.
    pub fn on_datagram(
        &mut self,
        ctx: &mut dyn SystemContext,
        from: SocketAddr,
        datagram: &[u8],
    ) -> Result<Verdict, ReceiverError> {
        match DataSegment::decode(datagram) {
            Ok(segment) => self.on_segment(ctx, from, segment),
            Err(err) => {
                debug!("Discarding datagram from {}: {}", from, err);
                Ok(Verdict::Corrupt(err))
            }
        }
    }

    /// Handle a data segment that already passed validation.
    pub fn on_segment(
        &mut self,
        ctx: &mut dyn SystemContext,
        from: SocketAddr,
        segment: DataSegment,
    ) -> Result<Verdict, ReceiverError> {
        let now = ctx.now();

        if let Some(reason) = self.reset_reason(from, segment.seq, now) {
            self.sink.reset().map_err(ReceiverError::Sink)?;
            self.session = Some(Session::new(from, now));
            self.resets += 1;
            info!("New transfer from {} ({:?})", from, reason);
            ctx.report(ProtocolEvent::SessionReset { peer: from, reason });
        }
        let session = self
            .session
            .get_or_insert_with(|| Session::new(from, now));
        session.last_activity = now;

        let distance = seq_diff(segment.seq, session.expected_seq);
        let verdict = if distance == 0 {
            // The payload must reach the sink before the ACK leaves.
            self.sink
                .append_segment(&segment.payload)
                .map_err(ReceiverError::Sink)?;
            session.bytes_received += segment.payload.len() as u64;
            session.last_ack = Some(segment.seq);
            session.expected_seq = segment.seq.wrapping_add(1);
            debug!(
                "Accepted seq {} ({} bytes) from {}",
                segment.seq,
                segment.payload.len(),
                from
            );
            Verdict::Accepted { seq: segment.seq }
        } else if distance < 0 {
            debug!(
                "Duplicate seq {} from {}, expecting {}",
                segment.seq, from, session.expected_seq
            );
            Verdict::Duplicate { seq: segment.seq }
        } else {
            debug!(
                "Out-of-order seq {} from {}, expecting {}",
                segment.seq, from, session.expected_seq
            );
            Verdict::OutOfOrder { seq: segment.seq }
        };

        if let Some(ack) = session.last_ack {
            ctx.send_datagram(from, AckSegment::new(ack).encode());
        }
        Ok(verdict)
    }

    fn reset_reason(&self, from: SocketAddr, seq: u32, now: Duration) -> Option<ResetReason> {
        let session = match &self.session {
            None => return Some(ResetReason::NewPeer),
            Some(session) => session,
        };
        if session.peer != from {
            return Some(ResetReason::NewPeer);
        }
        let idle = now.saturating_sub(session.last_activity);
        if seq == 0 && session.last_ack.is_some() && idle > self.idle_gap {
            return Some(ResetReason::Restart);
        }
        None
    }
}
