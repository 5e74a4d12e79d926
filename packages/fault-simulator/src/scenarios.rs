//! scenarios.rs — scenario catalog, loaders and result history
//!
//! `ScenarioManager` owns:
//! - the catalog of `FaultScenario`s keyed by id (last write wins)
//! - the append-only history of `TestResult`s
//! - the process's single `FaultInjector`, shared with the runner
//!
//! Loaders are all-or-nothing per call: the whole source is parsed and
//! validated before anything is inserted, so a bad file leaves the catalog
//! untouched and the call returns an error instead of a partial count.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use fault_types::{
    FaultKind, FaultScenario, FaultSeverity, ScenarioRecord, TargetAxis, TestResult,
    ACCELEROMETER, GYROSCOPE, MAGNETOMETER,
};
use serde_json::{Map, Value};
use tokio::sync::RwLock;
use tracing::info;

use crate::csv;
use crate::error::{Error, Result};
use crate::injector::FaultInjector;

pub type SharedInjector = Arc<RwLock<FaultInjector>>;
pub type SharedManager = Arc<RwLock<ScenarioManager>>;

/// Header a CSV scenario source must carry, in this order.
pub const CSV_COLUMNS: [&str; 10] = [
    "id",
    "name",
    "description",
    "fault_type",
    "severity",
    "target_sensor",
    "target_axis",
    "start_time",
    "duration",
    "parameters",
];

pub struct ScenarioManager {
    scenarios: BTreeMap<String, FaultScenario>,
    test_results: Vec<TestResult>,
    injector: SharedInjector,
}

impl Default for ScenarioManager {
    fn default() -> Self {
        Self::new(FaultInjector::new())
    }
}

impl ScenarioManager {
    pub fn new(injector: FaultInjector) -> Self {
        Self {
            scenarios: BTreeMap::new(),
            test_results: Vec::new(),
            injector: Arc::new(RwLock::new(injector)),
        }
    }

    pub fn injector(&self) -> SharedInjector {
        self.injector.clone()
    }

    // ── Catalog ───────────────────────────────────────────────────────────────

    /// Insert or overwrite by id.
    pub fn add_scenario(&mut self, scenario: FaultScenario) {
        if let Some(old) = self.scenarios.insert(scenario.id.clone(), scenario) {
            info!("♻️  Replaced scenario: {}", old.id);
        }
    }

    pub fn get_scenario(&self, id: &str) -> Option<&FaultScenario> {
        self.scenarios.get(id)
    }

    /// Flat views in the same shape the JSON loader accepts, ordered by id.
    pub fn list_scenarios(&self) -> Vec<ScenarioRecord> {
        self.scenarios.values().cloned().map(ScenarioRecord::from).collect()
    }

    pub fn len(&self) -> usize {
        self.scenarios.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scenarios.is_empty()
    }

    fn add_all(&mut self, scenarios: Vec<FaultScenario>) -> usize {
        let n = scenarios.len();
        for s in scenarios {
            self.add_scenario(s);
        }
        n
    }

    // ── Loaders ───────────────────────────────────────────────────────────────

    /// JSON array of scenarios, or `{"scenarios": [...]}`.
    pub fn load_scenarios_from_json(&mut self, path: impl AsRef<Path>) -> Result<usize> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let parsed = parse_json_scenarios(&text).map_err(|e| with_path(e, path))?;
        let n = self.add_all(parsed);
        info!("📂 Loaded {n} scenarios from {}", path.display());
        Ok(n)
    }

    /// CSV with the `CSV_COLUMNS` header; `parameters` is a JSON object string.
    pub fn load_scenarios_from_csv(&mut self, path: impl AsRef<Path>) -> Result<usize> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let parsed = parse_csv_scenarios(&text).map_err(|e| with_path(e, path))?;
        let n = self.add_all(parsed);
        info!("📂 Loaded {n} scenarios from {}", path.display());
        Ok(n)
    }

    /// Dispatch on extension: `.csv` is CSV, anything else JSON.
    pub fn load_scenarios(&mut self, path: impl AsRef<Path>) -> Result<usize> {
        let path = path.as_ref();
        let is_csv = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("csv"));
        if is_csv {
            self.load_scenarios_from_csv(path)
        } else {
            self.load_scenarios_from_json(path)
        }
    }

    /// Built-in catalog covering the common sensor failure modes.
    pub fn create_default_scenarios(&mut self) {
        let n = self.add_all(default_scenarios());
        info!("📋 Created {n} default scenarios");
    }

    // ── Results ───────────────────────────────────────────────────────────────

    pub fn record_result(&mut self, result: TestResult) {
        self.test_results.push(result);
    }

    pub fn test_results(&self) -> &[TestResult] {
        &self.test_results
    }
}

/// Parse errors from in-memory text carry an empty path; attach the real one.
fn with_path(err: Error, path: &Path) -> Error {
    match err {
        Error::SourceParse { reason, .. } => Error::parse(path, reason),
        other => other,
    }
}

fn into_scenario(record: ScenarioRecord) -> Result<FaultScenario> {
    let id = record.id.clone();
    FaultScenario::try_from(record).map_err(|source| Error::InvalidFaultDefinition { id, source })
}

// ── JSON ──────────────────────────────────────────────────────────────────────

pub fn parse_json_scenarios(text: &str) -> Result<Vec<FaultScenario>> {
    let root: Value = serde_json::from_str(text).map_err(|e| Error::parse("", e))?;
    let items = match root {
        Value::Array(items) => items,
        Value::Object(mut obj) => match obj.remove("scenarios") {
            Some(Value::Array(items)) => items,
            _ => return Err(Error::parse("", "expected a `scenarios` array")),
        },
        _ => return Err(Error::parse("", "expected an array or an object with `scenarios`")),
    };

    items
        .into_iter()
        .enumerate()
        .map(|(i, item)| {
            let record: ScenarioRecord = serde_json::from_value(item)
                .map_err(|e| Error::parse("", format!("scenario #{i}: {e}")))?;
            into_scenario(record)
        })
        .collect()
}

// ── CSV ───────────────────────────────────────────────────────────────────────

pub fn parse_csv_scenarios(text: &str) -> Result<Vec<FaultScenario>> {
    let text = text.trim_start_matches('\u{feff}');
    let mut rows = csv::parse(text).map_err(|e| Error::parse("", e))?.into_iter();

    let Some((_, header)) = rows.next() else {
        return Err(Error::parse("", "empty file"));
    };
    let header: Vec<&str> = header.iter().map(|h| h.trim()).collect();
    if header != CSV_COLUMNS {
        return Err(Error::parse(
            "",
            format!("header must be `{}`, got `{}`", CSV_COLUMNS.join(","), header.join(",")),
        ));
    }

    rows.map(|(line, fields)| into_scenario(csv_record(line, fields)?)).collect()
}

fn csv_record(line: usize, fields: Vec<String>) -> Result<ScenarioRecord> {
    if fields.len() != CSV_COLUMNS.len() {
        return Err(Error::parse(
            "",
            format!("line {line}: expected {} fields, got {}", CSV_COLUMNS.len(), fields.len()),
        ));
    }
    let number = |idx: usize| -> Result<f64> {
        let raw = fields[idx].trim();
        raw.parse::<f64>().map_err(|_| {
            Error::parse("", format!("line {line}: {} `{raw}` is not a number", CSV_COLUMNS[idx]))
        })
    };
    let start_time = number(7)?;
    let duration = number(8)?;

    let raw_params = fields[9].trim();
    let parameters = if raw_params.is_empty() {
        Map::new()
    } else {
        match serde_json::from_str::<Value>(raw_params) {
            Ok(Value::Object(map)) => map,
            Ok(_) => return Err(Error::parse("", format!("line {line}: parameters must be a JSON object"))),
            Err(e) => return Err(Error::parse("", format!("line {line}: parameters: {e}"))),
        }
    };

    let mut it = fields.into_iter();
    let mut next = || it.next().unwrap_or_default();
    Ok(ScenarioRecord {
        id: next().trim().to_string(),
        name: next(),
        description: next(),
        fault_type: next(),
        severity: next(),
        target_sensor: next(),
        target_axis: next(),
        start_time,
        duration,
        parameters,
    })
}

// ── Default catalog ───────────────────────────────────────────────────────────

#[allow(clippy::too_many_arguments)]
fn preset(
    id: &str,
    name: &str,
    description: &str,
    severity: FaultSeverity,
    target_sensor: &str,
    target_axis: TargetAxis,
    start_time: f64,
    duration: f64,
    kind: FaultKind,
) -> FaultScenario {
    FaultScenario {
        id: id.to_string(),
        name: name.to_string(),
        description: description.to_string(),
        severity,
        target_sensor: target_sensor.to_string(),
        target_axis,
        start_time,
        duration,
        kind,
    }
}

pub fn default_scenarios() -> Vec<FaultScenario> {
    vec![
        preset(
            "acc_stuck_x",
            "Accelerometer X-axis Stuck",
            "Accelerometer X-axis value freezes at current reading",
            FaultSeverity::Medium,
            ACCELEROMETER,
            TargetAxis::X,
            10.0,
            30.0,
            FaultKind::StuckValue { stuck_value: None },
        ),
        preset(
            "gyro_noise_high",
            "High Gyroscope Noise",
            "Significant noise injection in gyroscope readings",
            FaultSeverity::High,
            GYROSCOPE,
            TargetAxis::All,
            15.0,
            20.0,
            FaultKind::NoiseInjection { noise_level: 0.5 },
        ),
        preset(
            "mag_bias_drift",
            "Magnetometer Bias Drift",
            "Gradual bias drift in magnetometer Z-axis",
            FaultSeverity::Medium,
            MAGNETOMETER,
            TargetAxis::Z,
            20.0,
            60.0,
            FaultKind::BiasDrift { bias_rate: 0.05 },
        ),
        preset(
            "packet_loss_critical",
            "Critical Packet Loss",
            "High rate of IMU packet loss",
            FaultSeverity::Critical,
            ACCELEROMETER,
            TargetAxis::All,
            5.0,
            45.0,
            FaultKind::PacketLoss { loss_rate: 0.2 },
        ),
        preset(
            "acc_saturation",
            "Accelerometer Saturation",
            "Accelerometer readings clip at ±8 m/s²",
            FaultSeverity::High,
            ACCELEROMETER,
            TargetAxis::All,
            25.0,
            15.0,
            FaultKind::Saturation { min_value: -8.0, max_value: 8.0 },
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use fault_types::{DefinitionError, FaultType};

    const CSV_HEADER: &str =
        "id,name,description,fault_type,severity,target_sensor,target_axis,start_time,duration,parameters";

    #[test]
    fn json_accepts_array_and_wrapped_forms() {
        let item = r#"{"id":"n1","name":"Noise","fault_type":"noise_injection","severity":"high",
            "target_sensor":"gyroscope","target_axis":"all","start_time":1,"duration":2,
            "parameters":{"noise_level":0.5}}"#;
        let bare = parse_json_scenarios(&format!("[{item}]")).unwrap();
        let wrapped = parse_json_scenarios(&format!(r#"{{"scenarios":[{item}]}}"#)).unwrap();
        assert_eq!(bare, wrapped);
        assert_eq!(bare[0].kind, FaultKind::NoiseInjection { noise_level: 0.5 });
        assert_eq!(bare[0].description, "");
    }

    #[test]
    fn json_unknown_fault_type_is_a_definition_error() {
        let text = r#"[{"id":"bad","name":"x","fault_type":"melted","severity":"low",
            "target_sensor":"gyroscope","target_axis":"x","start_time":0,"duration":0}]"#;
        match parse_json_scenarios(text) {
            Err(Error::InvalidFaultDefinition { id, source }) => {
                assert_eq!(id, "bad");
                assert_eq!(source, DefinitionError::UnknownFaultType("melted".into()));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn json_shape_errors_are_parse_errors() {
        assert!(matches!(parse_json_scenarios("{not json"), Err(Error::SourceParse { .. })));
        assert!(matches!(parse_json_scenarios(r#"{"items":[]}"#), Err(Error::SourceParse { .. })));
        assert!(matches!(parse_json_scenarios(r#"[{"id":"x"}]"#), Err(Error::SourceParse { .. })));
        assert!(parse_json_scenarios("[]").unwrap().is_empty());
    }

    #[test]
    fn csv_rows_parse_with_quoted_parameters() {
        let text = format!(
            "{CSV_HEADER}\n\
             sat,Saturation,\"clips, hard\",saturation,high,accelerometer,all,25,15,\"{{\"\"min_value\"\": -8, \"\"max_value\"\": 8}}\"\n\
             loss,Loss,,axis_loss,low,gyroscope,z,0,0,\n"
        );
        let parsed = parse_csv_scenarios(&text).unwrap();
        assert_eq!(parsed.len(), 2);
        assert_eq!(parsed[0].description, "clips, hard");
        assert_eq!(parsed[0].kind, FaultKind::Saturation { min_value: -8.0, max_value: 8.0 });
        assert_eq!(parsed[1].target_axis, TargetAxis::Z);
        assert!(parsed[1].is_permanent());
    }

    #[test]
    fn csv_rejects_wrong_header_bad_numbers_and_short_rows() {
        assert!(matches!(parse_csv_scenarios("id,name\n"), Err(Error::SourceParse { .. })));
        assert!(matches!(parse_csv_scenarios(""), Err(Error::SourceParse { .. })));

        let bad_num = format!("{CSV_HEADER}\na,A,,axis_loss,low,gyroscope,x,soon,0,\n");
        let err = parse_csv_scenarios(&bad_num).unwrap_err().to_string();
        assert!(err.contains("line 2") && err.contains("start_time"), "{err}");

        let short = format!("{CSV_HEADER}\na,A,,axis_loss\n");
        assert!(matches!(parse_csv_scenarios(&short), Err(Error::SourceParse { .. })));

        let bad_params = format!("{CSV_HEADER}\na,A,,axis_loss,low,gyroscope,x,0,0,[1]\n");
        assert!(matches!(parse_csv_scenarios(&bad_params), Err(Error::SourceParse { .. })));
    }

    #[test]
    fn add_scenario_overwrites_by_id() {
        let mut m = ScenarioManager::new(FaultInjector::with_seed(1));
        m.create_default_scenarios();
        assert_eq!(m.len(), 5);

        let mut s = m.get_scenario("acc_stuck_x").unwrap().clone();
        s.name = "renamed".into();
        m.add_scenario(s);
        assert_eq!(m.len(), 5);
        assert_eq!(m.get_scenario("acc_stuck_x").unwrap().name, "renamed");
        assert!(m.get_scenario("nope").is_none());
    }

    #[test]
    fn default_catalog_spans_fault_types() {
        let types: Vec<FaultType> = default_scenarios().iter().map(|s| s.fault_type()).collect();
        assert_eq!(
            types,
            vec![
                FaultType::StuckValue,
                FaultType::NoiseInjection,
                FaultType::BiasDrift,
                FaultType::PacketLoss,
                FaultType::Saturation,
            ]
        );
    }

    #[test]
    fn listing_reloads_into_an_identical_catalog() {
        let mut m = ScenarioManager::new(FaultInjector::with_seed(1));
        m.create_default_scenarios();
        let json = serde_json::to_string(&m.list_scenarios()).unwrap();
        let reloaded = parse_json_scenarios(&json).unwrap();
        let original: Vec<FaultScenario> = m.scenarios.values().cloned().collect();
        assert_eq!(reloaded, original);
    }
}
