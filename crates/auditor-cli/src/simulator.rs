//! Seeded scan simulator
//!
//! Registers synthetic analysis tasks whose outcomes are drawn from a seeded
//! RNG, runs one scan through [`ScanService`] and keeps retrying until nothing
//! is retryable or the round budget is spent.

use async_trait::async_trait;
use auditor_core::{
    AnalysisOutput, AnalysisTask, AuditConfig, EventEmitter, ExternalServiceStatus,
    MemoryScanStore, MetricsSink, ScanReport, ScanService, ScanStatus, TaskRegistry, TracingSink,
};
use parking_lot::Mutex;
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::Serialize;
use serde_json::json;
use std::io;
use std::sync::Arc;
use std::time::Duration;

const TASK_NAMES: &[&str] = &[
    "serp",
    "a11y",
    "schema",
    "duplicate-content",
    "performance",
    "links",
    "meta",
    "images",
];

/// Simulator configuration
#[derive(Debug, Clone, Serialize)]
pub struct SimulatorConfig {
    /// Random seed for reproducibility
    pub seed: u64,
    /// Target recorded on the scan
    pub target: String,
    /// Number of synthetic tasks
    pub tasks: usize,
    /// Probability that a task attempt fails
    pub failure_rate: f64,
    /// Probability that a task attempt never resolves
    pub hang_rate: f64,
    /// Retry rounds after the initial run
    pub retry_rounds: u32,
    /// Deadline for every synthetic task
    pub timeout_ms: u64,
    /// Upper bound on simulated task latency
    pub max_latency_ms: u64,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            target: "https://example.com".to_string(),
            tasks: 5,
            failure_rate: 0.3,
            hang_rate: 0.0,
            retry_rounds: 2,
            timeout_ms: 200,
            max_latency_ms: 20,
        }
    }
}

impl SimulatorConfig {
    /// Reject rates outside `0..=1` and empty task sets
    ///
    /// # Errors
    /// Names the offending field.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.tasks == 0 {
            anyhow::bail!("tasks must be at least 1");
        }
        for (field, rate) in [("failure-rate", self.failure_rate), ("hang-rate", self.hang_rate)] {
            if !(0.0..=1.0).contains(&rate) {
                anyhow::bail!("{field} must be within 0..=1, got {rate}");
            }
        }
        if self.timeout_ms == 0 {
            anyhow::bail!("timeout-ms must be greater than zero");
        }
        Ok(())
    }

    /// Names of the synthetic tasks
    #[must_use]
    pub fn task_names(&self) -> Vec<String> {
        (0..self.tasks)
            .map(|i| {
                let name = TASK_NAMES[i % TASK_NAMES.len()];
                match i / TASK_NAMES.len() {
                    0 => name.to_string(),
                    round => format!("{name}-{round}"),
                }
            })
            .collect()
    }
}

/// Task whose outcome is drawn from its own seeded RNG
#[derive(Debug)]
struct SyntheticTask {
    name: String,
    rng: Mutex<StdRng>,
    failure_rate: f64,
    hang_rate: f64,
    max_latency_ms: u64,
}

enum Draw {
    Hang,
    Fail { network: bool, latency: u64 },
    Succeed { score: f64, latency: u64 },
}

impl SyntheticTask {
    fn new(name: String, seed: u64, config: &SimulatorConfig) -> Self {
        Self {
            name,
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
            failure_rate: config.failure_rate,
            hang_rate: config.hang_rate,
            max_latency_ms: config.max_latency_ms,
        }
    }

    fn draw(&self) -> Draw {
        let mut rng = self.rng.lock();
        let latency = rng.gen_range(0..=self.max_latency_ms);
        if rng.gen_bool(self.hang_rate) {
            Draw::Hang
        } else if rng.gen_bool(self.failure_rate) {
            Draw::Fail {
                network: rng.gen_bool(0.5),
                latency,
            }
        } else {
            Draw::Succeed {
                score: f64::from(rng.gen_range(40u8..=100)),
                latency,
            }
        }
    }
}

#[async_trait]
impl AnalysisTask for SyntheticTask {
    fn name(&self) -> &str {
        &self.name
    }

    async fn analyze(&self, target: &str) -> anyhow::Result<AnalysisOutput> {
        match self.draw() {
            Draw::Hang => std::future::pending().await,
            Draw::Fail { network, latency } => {
                tokio::time::sleep(Duration::from_millis(latency)).await;
                if network {
                    Err(anyhow::Error::new(io::Error::from(io::ErrorKind::ConnectionReset))
                        .context(format!("{} fetching {target}", self.name)))
                } else {
                    Err(anyhow::anyhow!("{} could not analyze {target}", self.name))
                }
            }
            Draw::Succeed { score, latency } => {
                tokio::time::sleep(Duration::from_millis(latency)).await;
                let issues = if score < 60.0 {
                    vec![json!({ "severity": "warning", "message": format!("{} scored {score}", self.name) })]
                } else {
                    Vec::new()
                };
                Ok(AnalysisOutput::new(json!({ "task": self.name, "latencyMs": latency }))
                    .with_score(score)
                    .with_issues(issues))
            }
        }
    }
}

/// Outcome counts after one round
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RoundSummary {
    pub round: u32,
    pub status: ScanStatus,
    pub succeeded: usize,
    pub failed: usize,
    pub timed_out: usize,
}

impl RoundSummary {
    fn of(round: u32, report: &ScanReport) -> Self {
        let succeeded = report
            .services
            .values()
            .filter(|s| s.status == ExternalServiceStatus::Completed)
            .count();
        Self {
            round,
            status: report.status,
            succeeded,
            failed: report.services.len() - succeeded,
            timed_out: report.services.values().filter(|s| s.timed_out).count(),
        }
    }
}

/// Final report from simulator
#[derive(Debug, Clone, Serialize)]
pub struct SimulatorReport {
    pub config: SimulatorConfig,
    pub rounds: Vec<RoundSummary>,
    pub scan: ScanReport,
}

impl SimulatorReport {
    /// Every task eventually succeeded
    #[must_use]
    pub fn passed(&self) -> bool {
        self.scan.status == ScanStatus::Completed
    }

    /// Generate text report
    #[must_use]
    pub fn generate_text(&self) -> String {
        let mut report = String::new();

        report.push_str("=== Scan Simulator Report ===\n\n");
        report.push_str(&format!("Seed: {}\n", self.config.seed));
        report.push_str(&format!("Scan: {}\n", self.scan.scan_id));
        report.push_str(&format!("Target: {}\n", self.scan.target));
        report.push_str(&format!("Tasks: {}\n", self.config.tasks));

        report.push_str("\n=== Rounds ===\n");
        for round in &self.rounds {
            report.push_str(&format!(
                "{}. {:<9} succeeded={} failed={} timed_out={}\n",
                round.round, round.status, round.succeeded, round.failed, round.timed_out
            ));
        }

        report.push_str("\n=== Services ===\n");
        for (name, service) in &self.scan.services {
            let outcome = match &service.error {
                Some(error) => format!("{:?}: {}", error.kind, error.message),
                None => format!("score={}", service.score.unwrap_or_default()),
            };
            report.push_str(&format!(
                "{name:<20} {:<9} retries={}/{} {outcome}\n",
                format!("{:?}", service.status).to_lowercase(),
                service.retry.attempts,
                service.retry.max_attempts,
            ));
        }

        report.push_str(&format!(
            "\n=== Result: {} ({}%) ===\n",
            self.scan.status, self.scan.progress.percentage
        ));
        report
    }
}

/// Run one simulated scan plus retry rounds
///
/// # Errors
/// Invalid simulator settings, or a scan-level failure from the service.
pub async fn run_simulator(
    config: SimulatorConfig,
    audit: &AuditConfig,
) -> anyhow::Result<SimulatorReport> {
    config.validate()?;

    let names = config.task_names();
    let mut registry = TaskRegistry::new();
    let mut audit = audit.clone();
    for (i, name) in names.iter().enumerate() {
        let seed = config.seed.wrapping_add(i as u64);
        registry.register(Arc::new(SyntheticTask::new(name.clone(), seed, &config)));
        audit
            .task_timeouts
            .insert(name.clone(), config.timeout_ms);
    }

    let events = EventEmitter::new()
        .with_sink(Arc::new(TracingSink))
        .with_sink(Arc::new(MetricsSink));
    let service = ScanService::new(&audit, Arc::new(MemoryScanStore::new()), registry, events);

    let mut scan = service.start_scan(&config.target, &names).await?;
    let mut rounds = vec![RoundSummary::of(0, &scan)];

    for round in 1..=config.retry_rounds {
        if scan.retryable().is_empty() {
            break;
        }
        scan = service.retry_scan(scan.scan_id, None).await?;
        rounds.push(RoundSummary::of(round, &scan));
    }

    Ok(SimulatorReport {
        config,
        rounds,
        scan,
    })
}
