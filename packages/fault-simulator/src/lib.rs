//! # fault-simulator
//!
//! Fault-injection and system-response monitoring engine for validating the
//! navigation stack against degraded sensors.
//!
//! - [`injector`]: active faults applied to each tick's IMU snapshot
//! - [`scenarios`]: scenario catalog, JSON/CSV loaders, result history
//! - [`monitor`]: route progress, stability series, anomaly detection
//! - [`recovery`]: pluggable recovery assessment
//! - [`runner`]: one scenario run end to end, with cancellation
//! - [`report`]: aggregate reports and CSV export
//! - [`audit`]: hash-chained activation history and per-run audit files
//! - [`source`]: telemetry sources (synthetic by default)
//! - [`server`]: HTTP control API

pub mod audit;
pub mod config;
mod csv;
pub mod error;
pub mod injector;
pub mod monitor;
pub mod recovery;
pub mod report;
pub mod runner;
pub mod scenarios;
pub mod server;
pub mod source;

pub use error::{Error, Result};
pub use injector::FaultInjector;
pub use monitor::SystemMonitor;
pub use recovery::{RecoveryAssessor, WindowedStabilityAssessor};
pub use runner::{RunTicket, ScenarioRunner, StopHandle};
pub use scenarios::ScenarioManager;
pub use source::{SyntheticSource, TelemetrySource, TickContext, TickSample};
