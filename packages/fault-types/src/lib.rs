//! # fault-types
//!
//! Shared data model for the navigation fault-injection engine.
//!
//! These types are used by:
//! - `fault-simulator`: the injector, monitor and scenario runner
//! - scenario source files (JSON / CSV) through [`ScenarioRecord`]
//! - report consumers (CLI, control API) through [`TestResult`] and [`ScenarioReport`]
//!
//! ## Conventions
//!
//! - Scenario times (`start_time`, `duration`) are seconds relative to the start of a run.
//! - Monitor times (`time` fields on records) are seconds since the monitor was last reset.
//! - A `duration` of `0` means the fault never expires on its own.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// A run is a pass when the furthest route progress reached is at least this.
pub const ROUTE_COMPLETION_THRESHOLD: f64 = 0.95;

pub const ACCELEROMETER: &str = "accelerometer";
pub const GYROSCOPE: &str = "gyroscope";
pub const MAGNETOMETER: &str = "magnetometer";

/// Sensors the engine knows how to range-check.
pub const KNOWN_SENSORS: [&str; 3] = [ACCELEROMETER, GYROSCOPE, MAGNETOMETER];

// ── Definition errors ─────────────────────────────────────────────────────────

/// Why a scenario definition could not be turned into a [`FaultScenario`].
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DefinitionError {
    #[error("scenario id must not be empty")]
    EmptyId,
    #[error("unknown fault type '{0}'")]
    UnknownFaultType(String),
    #[error("unknown severity '{0}'")]
    UnknownSeverity(String),
    #[error("unknown target axis '{0}' (expected x, y, z or all)")]
    UnknownAxis(String),
    #[error("{field} must be a finite, non-negative number of seconds (got {value})")]
    InvalidTiming { field: &'static str, value: f64 },
    #[error("parameter '{key}': {reason}")]
    InvalidParameter { key: &'static str, reason: String },
}

// ── Fault taxonomy ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultType {
    /// Sensor value frozen
    StuckValue,
    /// Complete axis failure
    AxisLoss,
    /// Gradual bias introduction
    BiasDrift,
    /// Added noise / interference
    NoiseInjection,
    /// Missing data packets
    PacketLoss,
    /// Scaling factor error
    ScaleError,
    /// Periodic disturbance
    PeriodicGlitch,
    /// Value clipping
    Saturation,
}

impl FaultType {
    pub const ALL: [FaultType; 8] = [
        FaultType::StuckValue,
        FaultType::AxisLoss,
        FaultType::BiasDrift,
        FaultType::NoiseInjection,
        FaultType::PacketLoss,
        FaultType::ScaleError,
        FaultType::PeriodicGlitch,
        FaultType::Saturation,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FaultType::StuckValue => "stuck_value",
            FaultType::AxisLoss => "axis_loss",
            FaultType::BiasDrift => "bias_drift",
            FaultType::NoiseInjection => "noise_injection",
            FaultType::PacketLoss => "packet_loss",
            FaultType::ScaleError => "scale_error",
            FaultType::PeriodicGlitch => "periodic_glitch",
            FaultType::Saturation => "saturation",
        }
    }
}

impl fmt::Display for FaultType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FaultType {
    type Err = DefinitionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        FaultType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| DefinitionError::UnknownFaultType(s.to_string()))
    }
}

/// Informational only: severity never changes how a fault is applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl FaultSeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            FaultSeverity::Low => "low",
            FaultSeverity::Medium => "medium",
            FaultSeverity::High => "high",
            FaultSeverity::Critical => "critical",
        }
    }
}

impl fmt::Display for FaultSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FaultSeverity {
    type Err = DefinitionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            "critical" => Ok(Self::Critical),
            other => Err(DefinitionError::UnknownSeverity(other.to_string())),
        }
    }
}

// ── Axes ──────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Axis {
    X,
    Y,
    Z,
}

impl Axis {
    pub const ALL: [Axis; 3] = [Axis::X, Axis::Y, Axis::Z];

    pub fn as_str(&self) -> &'static str {
        match self {
            Axis::X => "x",
            Axis::Y => "y",
            Axis::Z => "z",
        }
    }
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Axis selection of a scenario; `All` expands to x, y and z.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetAxis {
    X,
    Y,
    Z,
    All,
}

impl TargetAxis {
    pub fn axes(&self) -> &'static [Axis] {
        match self {
            TargetAxis::X => &[Axis::X],
            TargetAxis::Y => &[Axis::Y],
            TargetAxis::Z => &[Axis::Z],
            TargetAxis::All => &Axis::ALL,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TargetAxis::X => "x",
            TargetAxis::Y => "y",
            TargetAxis::Z => "z",
            TargetAxis::All => "all",
        }
    }
}

impl FromStr for TargetAxis {
    type Err = DefinitionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "x" => Ok(Self::X),
            "y" => Ok(Self::Y),
            "z" => Ok(Self::Z),
            "all" => Ok(Self::All),
            other => Err(DefinitionError::UnknownAxis(other.to_string())),
        }
    }
}

// ── Fault parameters ──────────────────────────────────────────────────────────

/// Fault type together with the parameters that type actually uses.
///
/// Missing parameters fall back to the defaults the scenario files have always
/// assumed (e.g. `noise_level = 0.1`, `loss_rate = 0.1`).
#[derive(Debug, Clone, PartialEq)]
pub enum FaultKind {
    /// `stuck_value: None` captures the first value seen once the fault is live.
    StuckValue { stuck_value: Option<f64> },
    AxisLoss,
    /// Units per second added on top of the true reading.
    BiasDrift { bias_rate: f64 },
    /// Standard deviation of the zero-mean Gaussian added to each reading.
    NoiseInjection { noise_level: f64 },
    /// Probability in `[0, 1]` that a whole tick of sensor data is dropped.
    PacketLoss { loss_rate: f64 },
    ScaleError { scale_factor: f64 },
    /// `amplitude * sin(2π * frequency * t)` added to each reading.
    PeriodicGlitch { frequency: f64, amplitude: f64 },
    Saturation { min_value: f64, max_value: f64 },
}

impl FaultKind {
    pub fn fault_type(&self) -> FaultType {
        match self {
            FaultKind::StuckValue { .. } => FaultType::StuckValue,
            FaultKind::AxisLoss => FaultType::AxisLoss,
            FaultKind::BiasDrift { .. } => FaultType::BiasDrift,
            FaultKind::NoiseInjection { .. } => FaultType::NoiseInjection,
            FaultKind::PacketLoss { .. } => FaultType::PacketLoss,
            FaultKind::ScaleError { .. } => FaultType::ScaleError,
            FaultKind::PeriodicGlitch { .. } => FaultType::PeriodicGlitch,
            FaultKind::Saturation { .. } => FaultType::Saturation,
        }
    }

    /// Build a typed fault from the open `parameters` object of a scenario file.
    /// Keys that the fault type does not use are ignored.
    pub fn from_parameters(
        fault_type: FaultType,
        params: &Map<String, Value>,
    ) -> Result<Self, DefinitionError> {
        let kind = match fault_type {
            FaultType::StuckValue => FaultKind::StuckValue {
                stuck_value: optional_param(params, "stuck_value")?,
            },
            FaultType::AxisLoss => FaultKind::AxisLoss,
            FaultType::BiasDrift => FaultKind::BiasDrift {
                bias_rate: param(params, "bias_rate", 0.1)?,
            },
            FaultType::NoiseInjection => {
                let noise_level = param(params, "noise_level", 0.1)?;
                if noise_level < 0.0 {
                    return Err(invalid("noise_level", format!("must be >= 0 (got {noise_level})")));
                }
                FaultKind::NoiseInjection { noise_level }
            }
            FaultType::PacketLoss => {
                let loss_rate = param(params, "loss_rate", 0.1)?;
                if !(0.0..=1.0).contains(&loss_rate) {
                    return Err(invalid("loss_rate", format!("must be within [0, 1] (got {loss_rate})")));
                }
                FaultKind::PacketLoss { loss_rate }
            }
            FaultType::ScaleError => FaultKind::ScaleError {
                scale_factor: param(params, "scale_factor", 1.5)?,
            },
            FaultType::PeriodicGlitch => FaultKind::PeriodicGlitch {
                frequency: param(params, "frequency", 1.0)?,
                amplitude: param(params, "amplitude", 1.0)?,
            },
            FaultType::Saturation => {
                let min_value = param(params, "min_value", -10.0)?;
                let max_value = param(params, "max_value", 10.0)?;
                if min_value > max_value {
                    return Err(invalid(
                        "min_value",
                        format!("must not exceed max_value ({min_value} > {max_value})"),
                    ));
                }
                FaultKind::Saturation { min_value, max_value }
            }
        };
        Ok(kind)
    }

    /// The open `parameters` object written back to scenario files and listings.
    pub fn parameters(&self) -> Map<String, Value> {
        let mut map = Map::new();
        let mut put = |k: &str, v: f64| {
            map.insert(k.to_string(), Value::from(v));
        };
        match *self {
            FaultKind::StuckValue { stuck_value } => {
                if let Some(v) = stuck_value {
                    put("stuck_value", v);
                }
            }
            FaultKind::AxisLoss => {}
            FaultKind::BiasDrift { bias_rate } => put("bias_rate", bias_rate),
            FaultKind::NoiseInjection { noise_level } => put("noise_level", noise_level),
            FaultKind::PacketLoss { loss_rate } => put("loss_rate", loss_rate),
            FaultKind::ScaleError { scale_factor } => put("scale_factor", scale_factor),
            FaultKind::PeriodicGlitch { frequency, amplitude } => {
                put("frequency", frequency);
                put("amplitude", amplitude);
            }
            FaultKind::Saturation { min_value, max_value } => {
                put("min_value", min_value);
                put("max_value", max_value);
            }
        }
        map
    }
}

fn invalid(key: &'static str, reason: String) -> DefinitionError {
    DefinitionError::InvalidParameter { key, reason }
}

/// Accepts JSON numbers and numeric strings (CSV-sourced parameter objects often quote them).
fn as_number(v: &Value) -> Option<f64> {
    match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn optional_param(params: &Map<String, Value>, key: &'static str) -> Result<Option<f64>, DefinitionError> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => match as_number(v) {
            Some(n) if n.is_finite() => Ok(Some(n)),
            _ => Err(invalid(key, format!("expected a finite number, got {v}"))),
        },
    }
}

fn param(params: &Map<String, Value>, key: &'static str, default: f64) -> Result<f64, DefinitionError> {
    Ok(optional_param(params, key)?.unwrap_or(default))
}

// ── Fault scenario ────────────────────────────────────────────────────────────

/// Immutable definition of one sensor-level failure to inject during a test.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "ScenarioRecord", into = "ScenarioRecord")]
pub struct FaultScenario {
    pub id: String,
    pub name: String,
    pub description: String,
    pub severity: FaultSeverity,
    /// `accelerometer`, `gyroscope` or `magnetometer` in practice; other names are
    /// accepted and simply never match a reading.
    pub target_sensor: String,
    pub target_axis: TargetAxis,
    /// Seconds after the run starts.
    pub start_time: f64,
    /// Seconds; `0` means the fault stays active for the rest of the run.
    pub duration: f64,
    pub kind: FaultKind,
}

impl FaultScenario {
    pub fn fault_type(&self) -> FaultType {
        self.kind.fault_type()
    }

    pub fn is_permanent(&self) -> bool {
        self.duration <= 0.0
    }

    /// How long a run of this scenario lasts: the fault window plus `margin_s`,
    /// never shorter than `min_s`.
    pub fn test_duration(&self, min_s: f64, margin_s: f64) -> f64 {
        f64::max(min_s, self.start_time + self.duration + margin_s)
    }
}

/// Flat wire shape of a scenario, as found in JSON arrays, CSV rows and listings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioRecord {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub fault_type: String,
    pub severity: String,
    pub target_sensor: String,
    pub target_axis: String,
    pub start_time: f64,
    pub duration: f64,
    #[serde(default)]
    pub parameters: Map<String, Value>,
}

impl TryFrom<ScenarioRecord> for FaultScenario {
    type Error = DefinitionError;

    fn try_from(r: ScenarioRecord) -> Result<Self, Self::Error> {
        if r.id.trim().is_empty() {
            return Err(DefinitionError::EmptyId);
        }
        for (field, value) in [("start_time", r.start_time), ("duration", r.duration)] {
            if !value.is_finite() || value < 0.0 {
                return Err(DefinitionError::InvalidTiming { field, value });
            }
        }
        let fault_type: FaultType = r.fault_type.parse()?;
        Ok(FaultScenario {
            severity: r.severity.parse()?,
            target_axis: r.target_axis.parse()?,
            kind: FaultKind::from_parameters(fault_type, &r.parameters)?,
            id: r.id,
            name: r.name,
            description: r.description,
            target_sensor: r.target_sensor.trim().to_string(),
            start_time: r.start_time,
            duration: r.duration,
        })
    }
}

impl From<FaultScenario> for ScenarioRecord {
    fn from(s: FaultScenario) -> Self {
        ScenarioRecord {
            fault_type: s.fault_type().to_string(),
            severity: s.severity.to_string(),
            target_axis: s.target_axis.as_str().to_string(),
            parameters: s.kind.parameters(),
            id: s.id,
            name: s.name,
            description: s.description,
            target_sensor: s.target_sensor,
            start_time: s.start_time,
            duration: s.duration,
        }
    }
}

// ── Telemetry snapshots ───────────────────────────────────────────────────────

pub type AxisReadings = BTreeMap<Axis, f64>;

/// One tick of IMU readings: sensor name → axis → value.
/// Sensors or axes that are absent are simply not reported this tick.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SensorSnapshot(BTreeMap<String, AxisReadings>);

impl SensorSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form used by sources and tests: a full x/y/z reading for one sensor.
    pub fn with_sensor(mut self, sensor: &str, x: f64, y: f64, z: f64) -> Self {
        self.0.insert(
            sensor.to_string(),
            BTreeMap::from([(Axis::X, x), (Axis::Y, y), (Axis::Z, z)]),
        );
        self
    }

    pub fn get(&self, sensor: &str, axis: Axis) -> Option<f64> {
        self.0.get(sensor)?.get(&axis).copied()
    }

    pub fn get_mut(&mut self, sensor: &str, axis: Axis) -> Option<&mut f64> {
        self.0.get_mut(sensor)?.get_mut(&axis)
    }

    pub fn set(&mut self, sensor: &str, axis: Axis, value: f64) {
        self.0.entry(sensor.to_string()).or_default().insert(axis, value);
    }

    pub fn sensor(&self, sensor: &str) -> Option<&AxisReadings> {
        self.0.get(sensor)
    }

    pub fn sensors(&self) -> impl Iterator<Item = (&str, &AxisReadings)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Planar robot position (route frame, meters).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl Position {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn dist(&self, other: &Position) -> f64 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }
}

/// One tick of robot state as reported by the navigation stack.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RobotSnapshot {
    #[serde(default)]
    pub x: Option<f64>,
    #[serde(default)]
    pub y: Option<f64>,
    /// Fraction of the route completed, `[0, 1]`
    #[serde(default)]
    pub step_progress: Option<f64>,
    #[serde(default)]
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RobotSnapshot {
    pub fn at(x: f64, y: f64, step_progress: f64) -> Self {
        Self {
            x: Some(x),
            y: Some(y),
            step_progress: Some(step_progress),
            status: "running".to_string(),
            error: None,
        }
    }

    pub fn position(&self) -> Option<Position> {
        Some(Position::new(self.x?, self.y?))
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some() || self.status == "error"
    }
}

// ── Run records ───────────────────────────────────────────────────────────────

/// Append-only log entry written every time a fault is activated.
/// `record_hash` chains over `prev_hash`, so the history can be verified after export.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaultActivationRecord {
    pub fault_id: String,
    pub scenario_id: String,
    pub fault_type: FaultType,
    /// Wall-clock activation instant
    pub activated_at: DateTime<Utc>,
    /// Seconds since the injector was last reset
    pub offset_s: f64,
    /// Genesis record: 64 zeros
    pub prev_hash: String,
    pub record_hash: String,
}

/// A monitor-side observation that a reading left its plausibility range.
/// The label names the symptom, not the injected fault type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FaultDetectionRecord {
    pub time: f64,
    /// `<sensor>_<axis>_out_of_range`
    #[serde(rename = "fault_type")]
    pub label: String,
    pub data_snapshot: SensorSnapshot,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NavigationErrorRecord {
    pub time: f64,
    pub error: String,
    pub position: Option<Position>,
}

/// Per-tick audit sample kept by the monitor (bounded by its retention).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceSample {
    pub time: f64,
    pub imu_data: SensorSnapshot,
    pub active_faults: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    pub route_completion_percentage: f64,
    pub total_distance_traveled: f64,
    pub navigation_error_count: usize,
    pub fault_detection_count: usize,
    pub dropped_packet_count: usize,
    pub test_duration: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avg_velocity: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub velocity_std: Option<f64>,
    /// `1 / (1 + velocity_std)`, in `(0, 1]`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub navigation_stability_score: Option<f64>,
}

/// Outcome of one scenario run. Never modified once recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestResult {
    pub test_id: String,
    pub scenario_id: String,
    pub route_name: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub route_completed: bool,
    pub completion_percentage: f64,
    pub fault_detected: bool,
    /// Monitor time of the first detection
    pub detection_time: Option<f64>,
    pub recovery_achieved: bool,
    /// Seconds from the first detection to recovery
    pub recovery_time: Option<f64>,
    /// The run was stopped before its scheduled end
    #[serde(default)]
    pub cancelled: bool,
    pub navigation_errors: Vec<NavigationErrorRecord>,
    pub performance_metrics: PerformanceMetrics,
    /// Per-run JSON audit file, when it could be written
    pub raw_data_file: Option<PathBuf>,
}

// ── Reports ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportSummary {
    pub tests_passed: usize,
    pub tests_failed: usize,
    pub faults_detected: usize,
    pub recoveries_achieved: usize,
    pub avg_completion_rate: f64,
    /// Mean over the results that detected anything
    pub avg_detection_time: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioReport {
    pub generated_at: DateTime<Utc>,
    pub total_tests: usize,
    pub summary: ReportSummary,
    pub detailed_results: Vec<TestResult>,
    pub recommendations: Vec<String>,
}
