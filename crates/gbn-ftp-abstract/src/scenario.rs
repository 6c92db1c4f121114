use crate::config::{ProtocolConfig, SimConfig};
use serde::Deserialize;

#[derive(Deserialize, Debug, Clone)]
pub struct TestScenario {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub config: SimConfigOverride,
    #[serde(default)]
    pub protocol: ProtocolOverride,
    pub actions: Vec<TestAction>,
    pub assertions: Vec<TestAssertion>,
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct SimConfigOverride {
    pub loss_rate: Option<f64>,
    pub corrupt_rate: Option<f64>,
    pub min_latency: Option<u64>,
    pub max_latency: Option<u64>,
    pub seed: Option<u64>,
}

impl SimConfigOverride {
    pub fn apply_to(&self, config: &mut SimConfig) {
        if let Some(v) = self.loss_rate {
            config.loss_rate = v;
        }
        if let Some(v) = self.corrupt_rate {
            config.corrupt_rate = v;
        }
        if let Some(v) = self.min_latency {
            config.min_latency = v;
        }
        if let Some(v) = self.max_latency {
            config.max_latency = v;
        }
        if let Some(v) = self.seed {
            config.seed = v;
        }
    }
}

/// Protocol knobs a scenario may pin down; the rest keep their defaults.
#[derive(Deserialize, Debug, Clone, Default)]
pub struct ProtocolOverride {
    pub window_size: Option<usize>,
    pub mss: Option<usize>,
    pub timeout_ms: Option<u64>,
    pub idle_gap_ms: Option<u64>,
    pub max_consecutive_timeouts: Option<u32>,
}

impl ProtocolOverride {
    pub fn apply_to(&self, config: &mut ProtocolConfig) {
        if let Some(v) = self.window_size {
            config.window_size = v;
        }
        if let Some(v) = self.mss {
            config.mss = v;
        }
        if let Some(v) = self.timeout_ms {
            config.timeout_ms = v;
        }
        if let Some(v) = self.idle_gap_ms {
            config.idle_gap_ms = v;
        }
        if let Some(v) = self.max_consecutive_timeouts {
            config.max_consecutive_timeouts = Some(v);
        }
    }
}

/// File contents for a transfer: literal text or `size` pseudo-random bytes.
#[derive(Deserialize, Debug, Clone)]
#[serde(untagged)]
pub enum Payload {
    Text { data: String },
    Generated { size: usize },
}

impl Payload {
    pub fn materialize(&self) -> Vec<u8> {
        match self {
            Payload::Text { data } => data.as_bytes().to_vec(),
            // Deterministic filler so assertions can regenerate it.
            Payload::Generated { size } => (0..*size).map(|i| (i * 31 % 251) as u8).collect(),
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TestAction {
    /// Sender number `sender` starts transferring a file at `time`.
    StartTransfer {
        time: u64,
        #[serde(default)]
        sender: usize,
        #[serde(flatten)]
        payload: Payload,
    },
    /// Deterministically drop the first data segment with the given seq.
    DropNextDataSeq { seq: u32 },
    /// Deterministically drop the first ACK carrying the given seq.
    DropNextAck { seq: u32 },
}

#[derive(Deserialize, Debug, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TestAssertion {
    /// The receiver's output equals the payload of the last transfer started.
    DataDelivered,
    /// Total data datagrams sent by all senders is within range.
    SenderPacketCount { min: u64, max: Option<u64> },
    /// Number of sender timeouts is within range.
    TimeoutCount { min: u64, max: Option<u64> },
    /// Number of receiver session resets equals `count`.
    SessionResets { count: u32 },
    /// All transfers finish within the given virtual time.
    MaxDuration { ms: u64 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_scenario_toml() {
        let text = r#"
            name = "drop one"
            description = "segment 1 is lost once"

            [config]
            seed = 7
            min_latency = 5
            max_latency = 5

            [protocol]
            window_size = 4
            mss = 4

            [[actions]]
            type = "start_transfer"
            time = 0
            data = "hello world"

            [[actions]]
            type = "drop_next_data_seq"
            seq = 1

            [[actions]]
            type = "start_transfer"
            time = 10
            sender = 1
            size = 64

            [[assertions]]
            type = "data_delivered"

            [[assertions]]
            type = "timeout_count"
            min = 1
        "#;
        let scenario: TestScenario = toml::from_str(text).unwrap();
        assert_eq!(scenario.actions.len(), 3);
        match &scenario.actions[0] {
            TestAction::StartTransfer { sender, payload, .. } => {
                assert_eq!(*sender, 0);
                assert_eq!(payload.materialize(), b"hello world");
            }
            other => panic!("unexpected action {other:?}"),
        }
        match &scenario.actions[2] {
            TestAction::StartTransfer { sender, payload, .. } => {
                assert_eq!(*sender, 1);
                assert_eq!(payload.materialize().len(), 64);
            }
            other => panic!("unexpected action {other:?}"),
        }
        assert!(matches!(
            scenario.assertions[1],
            TestAssertion::TimeoutCount { min: 1, max: None }
        ));

        let mut protocol = ProtocolConfig::default();
        scenario.protocol.apply_to(&mut protocol);
        assert_eq!((protocol.window_size, protocol.mss), (4, 4));
    }
}
