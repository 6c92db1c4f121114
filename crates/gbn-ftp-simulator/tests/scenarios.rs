use gbn_ftp_simulator::{load_scenario, run_scenario};
use std::path::PathBuf;

fn scenario_dir() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../scenarios")
}

fn run(name: &str) -> gbn_ftp_simulator::SimulationReport {
    let path = scenario_dir().join(format!("{name}.toml"));
    let scenario = load_scenario(&path).unwrap();
    run_scenario(&scenario).unwrap_or_else(|err| panic!("{name}: {err}"))
}

#[test]
fn lossless() {
    let report = run("lossless");
    assert_eq!(report.delivered_bytes, 20_000);
}

#[test]
fn single_drop() {
    let report = run("single_drop");
    assert_eq!(report.acks_sent, vec![0, 0, 1, 2]);
}

#[test]
fn lost_ack() {
    let report = run("lost_ack");
    assert_eq!(report.acks_sent, vec![0, 1, 2]);
}

#[test]
fn lossy() {
    let report = run("lossy");
    assert!(report.data_dropped > 0);
    assert!(report.acks_dropped > 0);
}

#[test]
fn corruption() {
    run("corruption");
}

#[test]
fn new_peer() {
    run("new_peer");
}

#[test]
fn restart() {
    run("restart");
}

#[test]
fn every_scenario_file_parses() {
    for entry in std::fs::read_dir(scenario_dir()).unwrap() {
        let path = entry.unwrap().path();
        if path.extension().is_some_and(|ext| ext == "toml") {
            load_scenario(&path).unwrap();
        }
    }
}

#[test]
fn report_serializes_to_json() {
    let report = run("single_drop");
    let json = serde_json::to_value(&report).unwrap();
    assert_eq!(json["timeout_count"], 1);
    let events = json["protocol_events"].as_array().unwrap();
    assert!(
        events
            .iter()
            .any(|e| e["event"]["type"] == "timeout" && e["event"]["seq"] == 1)
    );
}
