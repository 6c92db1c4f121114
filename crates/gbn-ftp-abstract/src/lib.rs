//! Wire format, configuration and collaborator interfaces shared by every
//! part of the Go-back-N file transfer workspace.

pub mod checksum;
pub mod config;
pub mod event;
pub mod interface;
pub mod packet;
pub mod scenario;

pub use checksum::internet_checksum;
pub use config::{ConfigError, ConfigOverride, LossProbability, ProtocolConfig, SimConfig};
pub use event::{Direction, ProtocolEvent, ResetReason, TransferStats};
pub use interface::{ChunkReader, OutputSink, SegmentSource, SystemContext};
pub use packet::{AckSegment, CorruptPacket, DataSegment, SegmentKind};

pub use scenario::{Payload, ProtocolOverride, SimConfigOverride, TestAction, TestAssertion, TestScenario};
