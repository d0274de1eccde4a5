use auditor_cli::{run_simulator, run_tracking, SimulatorConfig, SimulatorReport, TrackConfig};
use auditor_core::{AuditConfig, ScanStatus};
use proptest::prelude::*;
use std::collections::HashSet;

fn quick(seed: u64) -> SimulatorConfig {
    SimulatorConfig {
        seed,
        tasks: 6,
        failure_rate: 0.5,
        max_latency_ms: 2,
        ..SimulatorConfig::default()
    }
}

fn round_outcomes(report: &SimulatorReport) -> Vec<(ScanStatus, usize, usize)> {
    report
        .rounds
        .iter()
        .map(|r| (r.status, r.succeeded, r.failed))
        .collect()
}

#[tokio::test]
async fn same_seed_same_outcome() {
    let first = run_simulator(quick(7), &AuditConfig::default()).await.unwrap();
    let second = run_simulator(quick(7), &AuditConfig::default()).await.unwrap();

    assert_eq!(round_outcomes(&first), round_outcomes(&second));
    assert_eq!(first.scan.status, second.scan.status);
}

#[tokio::test]
async fn rounds_never_lose_successes() {
    let report = run_simulator(quick(3), &AuditConfig::default()).await.unwrap();
    for pair in report.rounds.windows(2) {
        assert!(pair[1].succeeded >= pair[0].succeeded);
    }
    if report.rounds.last().unwrap().failed == 0 {
        assert_eq!(report.scan.status, ScanStatus::Completed);
    }
}

#[tokio::test]
async fn tracking_report_serializes_camel_case() {
    let report = run_tracking(&TrackConfig::default(), &AuditConfig::default())
        .await
        .unwrap();
    let value = serde_json::to_value(&report).unwrap();
    assert!(value.get("unseenAlerts").is_some());
    assert_eq!(value["passes"].as_array().unwrap().len(), 2);
}

proptest! {
    #[test]
    fn prop_task_names_are_unique(tasks in 1usize..64) {
        let config = SimulatorConfig { tasks, ..SimulatorConfig::default() };
        let names = config.task_names();
        prop_assert_eq!(names.len(), tasks);
        prop_assert_eq!(names.iter().collect::<HashSet<_>>().len(), tasks);
    }
}
