use serde::Serialize;
use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

/// Which leg of the exchange a packet was travelling on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Sender to receiver.
    Data,
    /// Receiver to sender.
    Ack,
}

impl Direction {
    /// What the loss line calls a dropped packet on this leg.
    pub fn loss_label(self) -> &'static str {
        match self {
            Direction::Data => "Packet",
            Direction::Ack => "ACK",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResetReason {
    /// First contact, or a different endpoint took over.
    NewPeer,
    /// The current peer restarted at seq 0 after an idle gap.
    Restart,
}

/// Counters kept by the sender for one transfer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TransferStats {
    pub bytes: u64,
    pub segments: u32,
    /// Every data datagram handed to the network, first sends and retransmissions.
    pub transmissions: u64,
    pub retransmissions: u64,
    pub timeouts: u64,
    pub elapsed: Duration,
}

/// Events surfaced to the operator, one line each.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProtocolEvent {
    PacketLoss { seq: u32, direction: Direction },
    Timeout { seq: u32 },
    SessionReset { peer: SocketAddr, reason: ResetReason },
    TransferComplete(TransferStats),
}

impl fmt::Display for ProtocolEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtocolEvent::PacketLoss { seq, direction } => {
                write!(f, "{} loss, sequence number = {seq}", direction.loss_label())
            }
            ProtocolEvent::Timeout { seq } => write!(f, "Timeout, sequence number = {seq}"),
            ProtocolEvent::SessionReset { peer, .. } => write!(f, "New transfer from {peer}"),
            ProtocolEvent::TransferComplete(stats) => write!(
                f,
                "Transfer complete: {} bytes across {} segments in {:.3} s.",
                stats.bytes,
                stats.segments,
                stats.elapsed.as_secs_f64()
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn observability_lines() {
        let loss = ProtocolEvent::PacketLoss {
            seq: 12,
            direction: Direction::Data,
        };
        assert_eq!(loss.to_string(), "Packet loss, sequence number = 12");
        let ack_loss = ProtocolEvent::PacketLoss {
            seq: 12,
            direction: Direction::Ack,
        };
        assert_eq!(ack_loss.to_string(), "ACK loss, sequence number = 12");
        assert_eq!(
            ProtocolEvent::Timeout { seq: 3 }.to_string(),
            "Timeout, sequence number = 3"
        );
    }

    #[test]
    fn completion_line_reports_seconds() {
        let stats = TransferStats {
            bytes: 1500,
            segments: 3,
            elapsed: Duration::from_millis(1250),
            ..Default::default()
        };
        assert_eq!(
            ProtocolEvent::TransferComplete(stats).to_string(),
            "Transfer complete: 1500 bytes across 3 segments in 1.250 s."
        );
    }
}
