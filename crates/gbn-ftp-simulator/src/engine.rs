use crate::trace::{ProtocolEventRecord, SimulationReport, TransferSummary};
use bytes::Bytes;
use gbn_ftp_abstract::packet::{HEADER_LEN, classify, peek_seq};
use gbn_ftp_abstract::{
    ChunkReader, ConfigError, Direction, LossProbability, ProtocolConfig, ProtocolEvent,
    SegmentKind, SimConfig,
};
use gbn_ftp_core::{
    ActionBuffer, GbnReceiver, GbnSender, LossChannel, ScopedContext, SenderError, TimerCommand,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::io::Cursor;
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;
use tracing::{debug, info, warn};

type SimSender = GbnSender<ChunkReader<Cursor<Vec<u8>>>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum NodeId {
    Sender(usize),
    Receiver,
}

#[derive(Debug)]
pub enum EventType {
    PacketArrival {
        to: NodeId,
        from: SocketAddr,
        datagram: Bytes,
    },
    TimerExpiry {
        node: NodeId,
        generation: u64,
    },
    StartTransfer {
        sender: usize,
        data: Vec<u8>,
    },
}

#[derive(Debug)]
struct Event {
    time: u64,
    event_type: EventType,
    id: u64, // tie-breaker: FIFO among events at the same time
}

// Reversed so the BinaryHeap pops the earliest event first.
impl PartialEq for Event {
    fn eq(&self, other: &Self) -> bool {
        self.time == other.time && self.id == other.id
    }
}

impl Eq for Event {}

impl PartialOrd for Event {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Event {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .time
            .cmp(&self.time)
            .then_with(|| other.id.cmp(&self.id))
    }
}

/// A compact textual summary of a link-layer event.
#[derive(Debug, Clone, Serialize)]
pub struct LinkEventSummary {
    pub time: u64,
    pub description: String,
}

struct SenderSlot {
    addr: SocketAddr,
    sender: Option<SimSender>,
    started_at: Option<u64>,
    completed_at: Option<u64>,
    error: Option<String>,
}

impl SenderSlot {
    fn new(index: usize) -> Self {
        Self {
            addr: sender_addr(index),
            sender: None,
            started_at: None,
            completed_at: None,
            error: None,
        }
    }
}

/// Virtual address of simulated sender `index`.
pub fn sender_addr(index: usize) -> SocketAddr {
    let host = Ipv4Addr::new(10, 0, (index / 250) as u8, (index % 250) as u8 + 2);
    SocketAddr::from((host, 40_000))
}

/// Discrete-event simulation of Go-back-N senders talking to one receiver
/// over a lossy, reordering, corrupting channel. Time is in milliseconds.
pub struct Simulator {
    time: u64,
    event_queue: BinaryHeap<Event>,
    event_id_counter: u64,

    config: SimConfig,
    protocol: ProtocolConfig,
    rng: StdRng,
    data_loss: LossChannel,
    ack_loss: LossChannel,

    senders: Vec<SenderSlot>,
    receiver: GbnReceiver<Vec<u8>>,
    receiver_addr: SocketAddr,

    /// Data datagrams put on the wire, first sends and retransmissions.
    pub sender_packet_count: u64,
    pub timeout_count: u64,
    /// Cumulative ACK numbers in the order the receiver emitted them, including lost ones.
    pub acks_sent: Vec<u32>,

    drop_data_seq_once: Vec<u32>,
    drop_ack_once: Vec<u32>,

    pub link_events: Vec<LinkEventSummary>,
    pub protocol_events: Vec<ProtocolEventRecord>,

    /// Bumped on every start or cancel; a firing with a stale generation is ignored.
    timer_generations: HashMap<NodeId, u64>,
}

impl Simulator {
    pub fn new(config: SimConfig, protocol: ProtocolConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        protocol.validate()?;
        let loss = LossProbability::new(config.loss_rate)?;

        let receiver_addr = SocketAddr::from((Ipv4Addr::new(10, 0, 0, 1), protocol.port));
        Ok(Self {
            time: 0,
            event_queue: BinaryHeap::new(),
            event_id_counter: 0,
            rng: StdRng::seed_from_u64(config.seed),
            // Separate streams so ACK traffic does not shift the data loss pattern.
            data_loss: LossChannel::seeded(loss, config.seed.wrapping_add(1)),
            ack_loss: LossChannel::seeded(loss, config.seed.wrapping_add(2)),
            receiver: GbnReceiver::from_config(Vec::new(), &protocol),
            receiver_addr,
            config,
            protocol,
            senders: Vec::new(),
            sender_packet_count: 0,
            timeout_count: 0,
            acks_sent: Vec::new(),
            drop_data_seq_once: Vec::new(),
            drop_ack_once: Vec::new(),
            link_events: Vec::new(),
            protocol_events: Vec::new(),
            timer_generations: HashMap::new(),
        })
    }

    /// Drop the first data segment carrying `seq`.
    pub fn add_drop_data_seq_once(&mut self, seq: u32) {
        self.drop_data_seq_once.push(seq);
    }

    /// Drop the first ACK carrying `seq`.
    pub fn add_drop_ack_once(&mut self, seq: u32) {
        self.drop_ack_once.push(seq);
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    pub fn protocol(&self) -> &ProtocolConfig {
        &self.protocol
    }

    pub fn receiver_addr(&self) -> SocketAddr {
        self.receiver_addr
    }

    pub fn receiver(&self) -> &GbnReceiver<Vec<u8>> {
        &self.receiver
    }

    /// Bytes the receiver has written to its output so far.
    pub fn delivered(&self) -> &[u8] {
        self.receiver.sink()
    }

    pub fn current_time(&self) -> u64 {
        self.time
    }

    pub fn peek_next_event_time(&self) -> Option<u64> {
        self.event_queue.peek().map(|e| e.time)
    }

    pub fn remaining_events(&self) -> usize {
        self.event_queue.len()
    }

    /// Senders that were started and have neither completed nor failed.
    pub fn pending_transfers(&self) -> usize {
        self.senders
            .iter()
            .filter(|slot| {
                slot.sender.is_some() && slot.completed_at.is_none() && slot.error.is_none()
            })
            .count()
    }

    pub fn failed_transfers(&self) -> impl Iterator<Item = (usize, &str)> {
        self.senders
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.error.as_deref().map(|e| (i, e)))
    }

    fn push_event(&mut self, time: u64, event_type: EventType) {
        self.event_queue.push(Event {
            time,
            event_type,
            id: self.event_id_counter,
        });
        self.event_id_counter += 1;
    }

    /// Sender number `sender` starts transferring `data` at `time`.
    pub fn schedule_transfer(&mut self, time: u64, sender: usize, data: Vec<u8>) {
        self.push_event(time, EventType::StartTransfer { sender, data });
    }

    /// Process the next event. Returns false once the queue is empty.
    pub fn step(&mut self) -> bool {
        let Some(event) = self.event_queue.pop() else {
            return false;
        };
        self.time = event.time;
        let now = Duration::from_millis(self.time);

        match event.event_type {
            EventType::PacketArrival { to, from, datagram } => {
                debug!("t={} {:?} <- {} ({} bytes)", self.time, to, from, datagram.len());
                let mut buffer = ActionBuffer::default();
                match to {
                    NodeId::Receiver => {
                        let result = {
                            let mut ctx = ScopedContext::new(&mut buffer, now);
                            self.receiver.on_datagram(&mut ctx, from, &datagram)
                        };
                        match result {
                            Ok(verdict) => debug!("Receiver verdict: {:?}", verdict),
                            Err(err) => warn!("Receiver failed: {}", err),
                        }
                    }
                    NodeId::Sender(index) => {
                        let Some(sender) = self.active_sender(index) else {
                            debug!("Sender {} is idle, discarding ACK", index);
                            return true;
                        };
                        let result = {
                            let mut ctx = ScopedContext::new(&mut buffer, now);
                            sender.on_datagram(&mut ctx, from, &datagram)
                        };
                        if let Err(err) = result {
                            self.fail_sender(index, err);
                        }
                    }
                }
                self.process_actions(to, buffer);
            }
            EventType::TimerExpiry { node, generation } => {
                if self.timer_generations.get(&node) != Some(&generation) {
                    debug!("Skipping stale timer for {:?}", node);
                    return true;
                }
                let NodeId::Sender(index) = node else {
                    return true;
                };
                let Some(sender) = self.active_sender(index) else {
                    return true;
                };
                let mut buffer = ActionBuffer::default();
                let result = {
                    let mut ctx = ScopedContext::new(&mut buffer, now);
                    sender.on_timeout(&mut ctx)
                };
                if let Err(err) = result {
                    self.fail_sender(index, err);
                }
                self.process_actions(node, buffer);
            }
            EventType::StartTransfer { sender: index, data } => {
                while self.senders.len() <= index {
                    let slot = SenderSlot::new(self.senders.len());
                    self.senders.push(slot);
                }
                info!(
                    "t={} sender {} starts a transfer of {} bytes",
                    self.time,
                    index,
                    data.len()
                );
                let slot = &mut self.senders[index];
                let sender = slot.sender.insert(GbnSender::new(
                    self.receiver_addr,
                    ChunkReader::new(Cursor::new(data)),
                    &self.protocol,
                ));
                slot.started_at = Some(self.time);
                slot.completed_at = None;
                slot.error = None;

                let mut buffer = ActionBuffer::default();
                let result = {
                    let mut ctx = ScopedContext::new(&mut buffer, now);
                    sender.start(&mut ctx)
                };
                if let Err(err) = result {
                    self.fail_sender(index, err);
                }
                self.process_actions(NodeId::Sender(index), buffer);
            }
        }
        true
    }

    /// Run until the event queue drains.
    pub fn run_until_complete(&mut self) {
        while self.step() {}
    }

    /// Run until the queue drains or virtual time passes `limit_ms`.
    /// Returns false if the limit was hit.
    pub fn run_until(&mut self, limit_ms: u64) -> bool {
        while let Some(next) = self.peek_next_event_time() {
            if next > limit_ms {
                self.time = limit_ms;
                return false;
            }
            self.step();
        }
        true
    }

    pub fn export_report(&self) -> SimulationReport {
        let transfers = self
            .senders
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| {
                let sender = slot.sender.as_ref()?;
                Some(TransferSummary {
                    sender: index,
                    addr: slot.addr,
                    started_at: slot.started_at.unwrap_or_default(),
                    completed_at: slot.completed_at,
                    stats: *sender.stats(),
                    error: slot.error.clone(),
                })
            })
            .collect();

        SimulationReport {
            config: self.config.clone(),
            protocol: self.protocol.clone(),
            duration_ms: self.time,
            delivered_bytes: self.receiver.sink().len(),
            sender_packet_count: self.sender_packet_count,
            timeout_count: self.timeout_count,
            acks_sent: self.acks_sent.clone(),
            session_resets: self.receiver.session_resets(),
            data_offered: self.data_loss.offered(),
            data_dropped: self.data_loss.dropped(),
            acks_offered: self.ack_loss.offered(),
            acks_dropped: self.ack_loss.dropped(),
            transfers,
            protocol_events: self.protocol_events.clone(),
            link_events: self.link_events.clone(),
        }
    }

    fn active_sender(&mut self, index: usize) -> Option<&mut SimSender> {
        let slot = self.senders.get_mut(index)?;
        if slot.error.is_some() {
            return None;
        }
        slot.sender.as_mut()
    }

    fn fail_sender(&mut self, index: usize, err: SenderError) {
        warn!("t={} sender {} aborted: {}", self.time, index, err);
        if let Some(slot) = self.senders.get_mut(index) {
            slot.error = Some(err.to_string());
        }
        // Invalidate any armed timer.
        *self
            .timer_generations
            .entry(NodeId::Sender(index))
            .or_insert(0) += 1;
    }

    fn log_link(&mut self, description: String) {
        self.link_events.push(LinkEventSummary {
            time: self.time,
            description,
        });
    }

    fn record_event(&mut self, node: NodeId, event: ProtocolEvent) {
        info!("[{:?}] {}", node, event);
        match &event {
            ProtocolEvent::Timeout { .. } => self.timeout_count += 1,
            ProtocolEvent::TransferComplete(_) => {
                if let NodeId::Sender(index) = node
                    && let Some(slot) = self.senders.get_mut(index)
                {
                    slot.completed_at = Some(self.time);
                }
            }
            _ => {}
        }
        self.protocol_events.push(ProtocolEventRecord {
            time: self.time,
            node,
            event,
        });
    }

    fn process_actions(&mut self, source_node: NodeId, buffer: ActionBuffer) {
        for event in buffer.events {
            self.record_event(source_node, event);
        }

        match buffer.timer {
            Some(TimerCommand::Start(delay)) => {
                let generation = self.timer_generations.entry(source_node).or_insert(0);
                *generation += 1;
                let generation = *generation;
                let fire_at = self.time + delay.as_millis() as u64;
                self.push_event(
                    fire_at,
                    EventType::TimerExpiry {
                        node: source_node,
                        generation,
                    },
                );
            }
            Some(TimerCommand::Cancel) => {
                *self.timer_generations.entry(source_node).or_insert(0) += 1;
            }
            None => {}
        }

        for (to, datagram) in buffer.outgoing {
            self.transmit(source_node, to, datagram);
        }
    }

    /// Put one datagram on the simulated channel.
    fn transmit(&mut self, source_node: NodeId, to: SocketAddr, datagram: Bytes) {
        let (from, target, direction) = match source_node {
            NodeId::Sender(index) => {
                self.sender_packet_count += 1;
                (sender_addr(index), NodeId::Receiver, Direction::Data)
            }
            NodeId::Receiver => {
                let Some(index) = self.senders.iter().position(|slot| slot.addr == to) else {
                    debug!("No simulated endpoint at {}, dropping", to);
                    return;
                };
                (self.receiver_addr, NodeId::Sender(index), Direction::Ack)
            }
        };
        let seq = peek_seq(&datagram).unwrap_or_default();
        if let Direction::Ack = direction {
            self.acks_sent.push(seq);
        }

        let once = match direction {
            Direction::Data => &mut self.drop_data_seq_once,
            Direction::Ack => &mut self.drop_ack_once,
        };
        if let Some(pos) = once.iter().position(|s| *s == seq) {
            once.remove(pos);
            debug!("Deterministically dropping {:?} seq={}", direction, seq);
            self.log_link(format!(
                "[{:?}->{:?}] DROP (deterministic) seq={}",
                source_node, target, seq
            ));
            return;
        }

        let channel = match direction {
            Direction::Data => &mut self.data_loss,
            Direction::Ack => &mut self.ack_loss,
        };
        if let Err(loss) = channel.admit(seq, direction) {
            self.log_link(format!(
                "[{:?}->{:?}] DROP (random loss) seq={}",
                source_node, target, seq
            ));
            self.record_event(target, loss.into());
            return;
        }

        let mut datagram = datagram;
        if self.config.corrupt_rate > 0.0 && self.rng.random::<f64>() < self.config.corrupt_rate {
            self.log_link(format!(
                "[{:?}->{:?}] CORRUPT seq={}",
                source_node, target, seq
            ));
            datagram = corrupt(&datagram, &mut self.rng);
        }

        let latency = self
            .rng
            .random_range(self.config.min_latency..=self.config.max_latency);
        self.log_link(format!(
            "[{:?}->{:?}] SEND seq={} ({} bytes, latency={}ms)",
            source_node,
            target,
            seq,
            datagram.len(),
            latency
        ));
        self.push_event(
            self.time + latency,
            EventType::PacketArrival {
                to: target,
                from,
                datagram,
            },
        );
    }
}

/// Flip one bit the codec will notice: a payload bit for data with a
/// payload, otherwise a marker bit.
fn corrupt(datagram: &[u8], rng: &mut StdRng) -> Bytes {
    let mut bytes = datagram.to_vec();
    let has_payload =
        matches!(classify(&bytes), Ok(SegmentKind::Data)) && bytes.len() > HEADER_LEN;
    if has_payload {
        let index = rng.random_range(HEADER_LEN..bytes.len());
        bytes[index] ^= 1u8 << rng.random_range(0..8u32);
    } else if bytes.len() >= HEADER_LEN {
        bytes[6] ^= 0x01;
    }
    Bytes::from(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fixed_latency(ms: u64) -> SimConfig {
        SimConfig {
            min_latency: ms,
            max_latency: ms,
            ..SimConfig::default()
        }
    }

    fn protocol(window_size: usize, mss: usize) -> ProtocolConfig {
        ProtocolConfig {
            window_size,
            mss,
            timeout_ms: 100,
            ..ProtocolConfig::default()
        }
    }

    fn payload(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 253) as u8).collect()
    }

    #[test]
    fn lossless_transfer_sends_each_segment_once() {
        let mut sim = Simulator::new(fixed_latency(10), protocol(4, 10)).unwrap();
        let data = payload(95);
        sim.schedule_transfer(0, 0, data.clone());
        sim.run_until_complete();

        assert_eq!(sim.delivered(), data.as_slice());
        assert_eq!(sim.sender_packet_count, 10);
        assert_eq!(sim.timeout_count, 0);
        assert_eq!(sim.pending_transfers(), 0);
        assert_eq!(sim.receiver().session_resets(), 1);
    }

    #[test]
    fn lossy_channel_still_delivers_exact_bytes() {
        let config = SimConfig {
            loss_rate: 0.2,
            seed: 11,
            ..SimConfig::default()
        };
        let mut sim = Simulator::new(config, protocol(8, 50)).unwrap();
        let data = payload(5_000);
        sim.schedule_transfer(0, 0, data.clone());
        sim.run_until_complete();

        assert_eq!(sim.delivered(), data.as_slice());
        assert!(sim.timeout_count > 0);
        assert!(sim.sender_packet_count > 100);
        let report = sim.export_report();
        assert!(report.data_dropped > 0);
        assert!(report.transfers[0].completed_at.is_some());
    }

    #[test]
    fn corruption_is_treated_like_loss() {
        let config = SimConfig {
            corrupt_rate: 0.15,
            seed: 5,
            ..SimConfig::default()
        };
        let mut sim = Simulator::new(config, protocol(6, 40)).unwrap();
        let data = payload(3_000);
        sim.schedule_transfer(0, 0, data.clone());
        sim.run_until_complete();

        assert_eq!(sim.delivered(), data.as_slice());
        assert!(sim.link_events.iter().any(|e| e.description.contains("CORRUPT")));
    }

    #[test]
    fn single_drop_retransmits_from_the_lost_segment() {
        // 3 segments, N=4: seq 1 is lost, 0 and 2 arrive, one timeout resends 1 and 2.
        let mut sim = Simulator::new(fixed_latency(10), protocol(4, 4)).unwrap();
        let data = b"aaaabbbbcccc".to_vec();
        sim.add_drop_data_seq_once(1);
        sim.schedule_transfer(0, 0, data.clone());
        sim.run_until_complete();

        assert_eq!(sim.delivered(), data.as_slice());
        assert_eq!(sim.timeout_count, 1);
        assert_eq!(sim.sender_packet_count, 5);
        let timeouts: Vec<_> = sim
            .protocol_events
            .iter()
            .filter_map(|r| match r.event {
                ProtocolEvent::Timeout { seq } => Some(seq),
                _ => None,
            })
            .collect();
        assert_eq!(timeouts, vec![1]);
        // ACK 0, a repeat of 0 for the gap at seq 2, then 1 and 2 after the retransmission.
        assert_eq!(sim.acks_sent, vec![0, 0, 1, 2]);
    }

    #[test]
    fn lost_ack_is_covered_by_a_later_cumulative_ack() {
        let mut sim = Simulator::new(fixed_latency(10), protocol(4, 4)).unwrap();
        let data = b"aaaabbbbcccc".to_vec();
        sim.add_drop_ack_once(0);
        sim.schedule_transfer(0, 0, data.clone());
        sim.run_until_complete();

        assert_eq!(sim.delivered(), data.as_slice());
        assert_eq!(sim.timeout_count, 0);
        assert_eq!(sim.sender_packet_count, 3);
        assert_eq!(sim.acks_sent, vec![0, 1, 2]);
    }

    #[test]
    fn new_sender_replaces_the_previous_session() {
        let mut sim = Simulator::new(fixed_latency(10), protocol(4, 8)).unwrap();
        sim.schedule_transfer(0, 0, payload(80));
        let second = b"the second file wins".to_vec();
        sim.schedule_transfer(1_000, 1, second.clone());
        sim.run_until_complete();

        assert_eq!(sim.delivered(), second.as_slice());
        assert_eq!(sim.receiver().session_resets(), 2);
    }

    #[test]
    fn retry_cap_aborts_when_every_packet_is_lost() {
        let config = SimConfig {
            loss_rate: 0.999_999,
            ..fixed_latency(10)
        };
        let protocol = ProtocolConfig {
            max_consecutive_timeouts: Some(3),
            ..protocol(4, 10)
        };
        let mut sim = Simulator::new(config, protocol).unwrap();
        sim.schedule_transfer(0, 0, payload(30));
        sim.run_until_complete();

        assert_eq!(sim.timeout_count, 3);
        assert_eq!(sim.failed_transfers().count(), 1);
        assert_eq!(sim.remaining_events(), 0);
    }

    #[test]
    fn restarted_timer_does_not_fire_early() {
        // RTT 80 ms, timeout 100 ms: every ACK restarts the timer before it
        // expires, so a lossless run never times out even with many segments.
        let mut sim = Simulator::new(fixed_latency(40), protocol(2, 10)).unwrap();
        let data = payload(200);
        sim.schedule_transfer(0, 0, data.clone());
        sim.run_until_complete();

        assert_eq!(sim.delivered(), data.as_slice());
        assert_eq!(sim.timeout_count, 0);
    }

    #[test]
    fn run_until_stops_at_the_limit() {
        let mut sim = Simulator::new(fixed_latency(10), protocol(1, 10)).unwrap();
        sim.schedule_transfer(0, 0, payload(1_000));
        assert!(!sim.run_until(50));
        assert_eq!(sim.current_time(), 50);
        assert!(sim.pending_transfers() > 0);
        assert!(sim.run_until(u64::MAX));
        assert_eq!(sim.delivered(), payload(1_000).as_slice());
    }

    #[test]
    fn invalid_channel_is_rejected() {
        let config = SimConfig {
            loss_rate: 1.0,
            ..SimConfig::default()
        };
        assert!(matches!(
            Simulator::new(config, ProtocolConfig::default()),
            Err(ConfigError::LossProbability(_))
        ));

        let always_corrupt = SimConfig {
            corrupt_rate: 1.0,
            ..SimConfig::default()
        };
        assert!(matches!(
            Simulator::new(always_corrupt, ProtocolConfig::default()),
            Err(ConfigError::CorruptRate(_))
        ));

        let huge_window = ProtocolConfig {
            window_size: usize::MAX,
            ..ProtocolConfig::default()
        };
        assert!(matches!(
            Simulator::new(SimConfig::default(), huge_window),
            Err(ConfigError::WindowTooLarge { .. })
        ));
    }
}
