use gbn_ftp_abstract::{ProtocolConfig, ProtocolEvent, SimConfig, TransferStats};
use serde::Serialize;
use std::net::SocketAddr;

use crate::engine::{LinkEventSummary, NodeId};

#[derive(Debug, Clone, Serialize)]
pub struct ProtocolEventRecord {
    pub time: u64,
    pub node: NodeId,
    pub event: ProtocolEvent,
}

#[derive(Debug, Clone, Serialize)]
pub struct TransferSummary {
    pub sender: usize,
    pub addr: SocketAddr,
    pub started_at: u64,
    pub completed_at: Option<u64>,
    pub stats: TransferStats,
    pub error: Option<String>,
}

/// Serializable snapshot of a finished (or interrupted) simulation.
#[derive(Debug, Clone, Serialize)]
pub struct SimulationReport {
    pub config: SimConfig,
    pub protocol: ProtocolConfig,
    pub duration_ms: u64,
    pub delivered_bytes: usize,
    pub sender_packet_count: u64,
    pub timeout_count: u64,
    pub acks_sent: Vec<u32>,
    pub session_resets: u32,
    pub data_offered: u64,
    pub data_dropped: u64,
    pub acks_offered: u64,
    pub acks_dropped: u64,
    pub transfers: Vec<TransferSummary>,
    pub protocol_events: Vec<ProtocolEventRecord>,
    pub link_events: Vec<LinkEventSummary>,
}
