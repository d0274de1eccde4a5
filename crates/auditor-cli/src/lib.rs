//! Auditor command-line harness
//!
//! Seeded, reproducible runs of the scan engine and the bulk position
//! tracker. The `auditor` binary wraps both.
//!
//! ```rust,ignore
//! use auditor_cli::simulator::{run_simulator, SimulatorConfig};
//!
//! let report = run_simulator(SimulatorConfig::default(), &AuditConfig::default()).await?;
//! println!("{}", report.generate_text());
//! ```

pub mod simulator;
pub mod tracker;

pub use simulator::{run_simulator, SimulatorConfig, SimulatorReport};
pub use tracker::{run_tracking, TrackConfig, TrackReport};
