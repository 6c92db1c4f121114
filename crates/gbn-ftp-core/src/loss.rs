use gbn_ftp_abstract::{Direction, LossProbability, ProtocolEvent};
use rand::rngs::StdRng;
use rand::{Rng, RngCore, SeedableRng};
use thiserror::Error;
use tracing::debug;

/// A packet the channel decided not to deliver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("{} loss, sequence number = {seq}", .direction.loss_label())]
pub struct PacketLoss {
    pub seq: u32,
    pub direction: Direction,
}

impl From<PacketLoss> for ProtocolEvent {
    fn from(loss: PacketLoss) -> Self {
        ProtocolEvent::PacketLoss {
            seq: loss.seq,
            direction: loss.direction,
        }
    }
}

/// Independent per-packet drop filter.
///
/// Every delivery attempt consumes exactly one uniform draw from `rng`, so a
/// seeded channel replays the same loss pattern for the same packet sequence.
#[derive(Debug, Clone)]
pub struct LossChannel<R = StdRng> {
    probability: LossProbability,
    rng: R,
    offered: u64,
    dropped: u64,
}

impl LossChannel<StdRng> {
    pub fn seeded(probability: LossProbability, seed: u64) -> Self {
        Self::new(probability, StdRng::seed_from_u64(seed))
    }

    pub fn from_os_rng(probability: LossProbability) -> Self {
        Self::new(probability, StdRng::from_os_rng())
    }
}

impl<R: RngCore> LossChannel<R> {
    pub fn new(probability: LossProbability, rng: R) -> Self {
        Self {
            probability,
            rng,
            offered: 0,
            dropped: 0,
        }
    }

    /// Decide the fate of one packet.
    pub fn admit(&mut self, seq: u32, direction: Direction) -> Result<(), PacketLoss> {
        self.offered += 1;
        if self.rng.random::<f64>() < self.probability.get() {
            self.dropped += 1;
            debug!("Dropping {:?} packet seq={}", direction, seq);
            return Err(PacketLoss { seq, direction });
        }
        Ok(())
    }

    pub fn probability(&self) -> LossProbability {
        self.probability
    }

    pub fn offered(&self) -> u64 {
        self.offered
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}
