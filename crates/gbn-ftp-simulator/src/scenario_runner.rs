use anyhow::Context;
use gbn_ftp_abstract::{
    ConfigError, ProtocolConfig, SimConfig, TestAction, TestAssertion, TestScenario,
};
use std::fs;
use std::path::Path;
use thiserror::Error;
use tracing::info;

use crate::{SimulationReport, Simulator};

/// Virtual-time budget when a scenario does not set `max_duration`.
pub const DEFAULT_MAX_DURATION_MS: u64 = 60_000;

#[derive(Debug, Error)]
pub enum ScenarioError {
    #[error("invalid scenario configuration")]
    Config(#[from] ConfigError),
    #[error("scenario timed out after {0} ms")]
    TimedOut(u64),
    #[error("assertion failed: {0}")]
    Assertion(String),
}

pub fn load_scenario(path: &Path) -> anyhow::Result<TestScenario> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read scenario file {}", path.display()))?;
    let scenario: TestScenario = toml::from_str(&content)
        .with_context(|| format!("Failed to parse scenario file {}", path.display()))?;
    Ok(scenario)
}

/// Build a simulator with the scenario's actions scheduled.
pub fn build_simulator(scenario: &TestScenario) -> Result<Simulator, ScenarioError> {
    let mut config = SimConfig::default();
    scenario.config.apply_to(&mut config);
    let mut protocol = ProtocolConfig::default();
    scenario.protocol.apply_to(&mut protocol);

    let mut sim = Simulator::new(config, protocol)?;
    for action in &scenario.actions {
        match action {
            TestAction::StartTransfer {
                time,
                sender,
                payload,
            } => sim.schedule_transfer(*time, *sender, payload.materialize()),
            TestAction::DropNextDataSeq { seq } => sim.add_drop_data_seq_once(*seq),
            TestAction::DropNextAck { seq } => sim.add_drop_ack_once(*seq),
        }
    }
    Ok(sim)
}

pub fn run_scenario(scenario: &TestScenario) -> Result<SimulationReport, ScenarioError> {
    info!("Running Scenario: {}", scenario.name);
    info!("Description: {}", scenario.description);

    let mut sim = build_simulator(scenario)?;

    let max_duration = scenario
        .assertions
        .iter()
        .find_map(|a| match a {
            TestAssertion::MaxDuration { ms } => Some(*ms),
            _ => None,
        })
        .unwrap_or(DEFAULT_MAX_DURATION_MS);

    if !sim.run_until(max_duration) {
        return Err(ScenarioError::TimedOut(max_duration));
    }

    let report = sim.export_report();
    check_assertions(scenario, &sim, &report)?;

    info!("Test Scenario Passed!");
    Ok(report)
}

fn check_assertions(
    scenario: &TestScenario,
    sim: &Simulator,
    report: &SimulationReport,
) -> Result<(), ScenarioError> {
    if let Some((index, err)) = sim.failed_transfers().next() {
        return Err(ScenarioError::Assertion(format!(
            "sender {index} aborted: {err}"
        )));
    }

    for assertion in &scenario.assertions {
        match assertion {
            TestAssertion::DataDelivered => {
                let expected = scenario
                    .actions
                    .iter()
                    .filter_map(|a| match a {
                        TestAction::StartTransfer { time, payload, .. } => Some((*time, payload)),
                        _ => None,
                    })
                    .max_by_key(|(time, _)| *time)
                    .map(|(_, payload)| payload.materialize())
                    .unwrap_or_default();
                let delivered = sim.delivered();
                if delivered != expected.as_slice() {
                    let first_diff = delivered
                        .iter()
                        .zip(&expected)
                        .position(|(a, b)| a != b)
                        .unwrap_or(delivered.len().min(expected.len()));
                    return Err(ScenarioError::Assertion(format!(
                        "delivered {} bytes, expected {} (first difference at offset {})",
                        delivered.len(),
                        expected.len(),
                        first_diff
                    )));
                }
            }
            TestAssertion::SenderPacketCount { min, max } => {
                check_range("sender packet count", report.sender_packet_count, *min, *max)?;
            }
            TestAssertion::TimeoutCount { min, max } => {
                check_range("timeout count", report.timeout_count, *min, *max)?;
            }
            TestAssertion::SessionResets { count } => {
                if report.session_resets != *count {
                    return Err(ScenarioError::Assertion(format!(
                        "receiver reset its session {} times, expected {}",
                        report.session_resets, count
                    )));
                }
            }
            TestAssertion::MaxDuration { .. } => {} // enforced while running
        }
    }
    Ok(())
}

fn check_range(what: &str, value: u64, min: u64, max: Option<u64>) -> Result<(), ScenarioError> {
    if value < min {
        return Err(ScenarioError::Assertion(format!(
            "{what} is {value}, expected at least {min}"
        )));
    }
    if let Some(max) = max
        && value > max
    {
        return Err(ScenarioError::Assertion(format!(
            "{what} is {value}, expected at most {max}"
        )));
    }
    Ok(())
}
