//! Go-back-N protocol engine.
//!
//! The state machines here are sans-IO: every handler receives a
//! [`SystemContext`] and records datagrams, timer commands and events on it.
//! Drivers (the tokio UDP runtime, the discrete-event simulator) own the
//! actual sockets and clocks and apply those actions after each call.

pub mod context;
pub mod loss;
pub mod receiver;
pub mod sender;
pub mod seq;

pub use context::{ActionBuffer, ScopedContext, TimerCommand};
pub use loss::{LossChannel, PacketLoss};
pub use receiver::{GbnReceiver, ReceiverError, Session, Verdict};
pub use sender::{AckOutcome, GbnSender, SenderError};

pub use gbn_ftp_abstract::{
    Direction, OutputSink, ProtocolConfig, ProtocolEvent, SegmentSource, SystemContext,
    TransferStats,
};
