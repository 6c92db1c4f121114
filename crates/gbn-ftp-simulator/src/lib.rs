pub mod engine;
pub mod scenario_runner;
pub mod trace;

pub use engine::{LinkEventSummary, NodeId, Simulator, sender_addr};
pub use scenario_runner::{ScenarioError, build_simulator, load_scenario, run_scenario};
pub use trace::{ProtocolEventRecord, SimulationReport, TransferSummary};
