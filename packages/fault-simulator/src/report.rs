//! report.rs — aggregate reports and CSV export over recorded results

use std::path::Path;

use chrono::{SecondsFormat, Utc};
use fault_types::{ReportSummary, ScenarioReport, TestResult};
use serde_json::json;
use tracing::{info, warn};

use crate::csv;
use crate::error::{Error, Result};

pub const POOR_FAULT_TOLERANCE: &str =
    "System shows poor fault tolerance - consider implementing redundant sensors";
pub const DETECTION_GAPS: &str =
    "Fault detection capabilities need improvement - implement better anomaly detection";
pub const RECOVERY_GAPS: &str = "System recovery mechanisms need enhancement";

/// Column set of the results export, in order.
pub const EXPORT_COLUMNS: [&str; 10] = [
    "scenario_id",
    "start_time",
    "end_time",
    "route_completed",
    "completion_percentage",
    "fault_detected",
    "detection_time",
    "recovery_achieved",
    "recovery_time",
    "navigation_error_count",
];

fn mean(values: impl IntoIterator<Item = f64>) -> Option<f64> {
    let (sum, n) = values.into_iter().fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    (n > 0).then(|| sum / n as f64)
}

fn rate(results: &[&TestResult], pred: impl Fn(&TestResult) -> bool) -> f64 {
    results.iter().filter(|r| pred(**r)).count() as f64 / results.len() as f64
}

/// Aggregate `results`, restricted to `scenario_ids` when a non-empty list is given.
pub fn generate_scenario_report(
    results: &[TestResult],
    scenario_ids: Option<&[String]>,
) -> Result<ScenarioReport> {
    let selected: Vec<&TestResult> = match scenario_ids {
        Some(ids) if !ids.is_empty() => {
            results.iter().filter(|r| ids.contains(&r.scenario_id)).collect()
        }
        _ => results.iter().collect(),
    };
    if selected.is_empty() {
        return Err(Error::NoResultsAvailable);
    }

    let count = |pred: fn(&TestResult) -> bool| selected.iter().filter(|r| pred(**r)).count();
    let avg_completion_rate =
        mean(selected.iter().map(|r| r.completion_percentage)).unwrap_or_default();

    let summary = ReportSummary {
        tests_passed: count(|r| r.route_completed),
        tests_failed: count(|r| !r.route_completed),
        faults_detected: count(|r| r.fault_detected),
        recoveries_achieved: count(|r| r.recovery_achieved),
        avg_completion_rate,
        avg_detection_time: mean(selected.iter().filter_map(|r| r.detection_time)),
    };

    let mut recommendations = Vec::new();
    if avg_completion_rate < 80.0 {
        recommendations.push(POOR_FAULT_TOLERANCE.to_string());
    }
    if rate(&selected, |r| r.fault_detected) < 0.5 {
        recommendations.push(DETECTION_GAPS.to_string());
    }
    if rate(&selected, |r| r.recovery_achieved) < 0.7 {
        recommendations.push(RECOVERY_GAPS.to_string());
    }

    Ok(ScenarioReport {
        generated_at: Utc::now(),
        total_tests: selected.len(),
        summary,
        detailed_results: selected.into_iter().cloned().collect(),
        recommendations,
    })
}

/// The report as JSON, or `{"error": "..."}` when there is nothing to report.
pub fn report_json(results: &[TestResult], scenario_ids: Option<&[String]>) -> serde_json::Value {
    match generate_scenario_report(results, scenario_ids) {
        Ok(report) => serde_json::to_value(report)
            .unwrap_or_else(|e| json!({ "error": format!("report serialization failed: {e}") })),
        Err(e) => json!({ "error": e.to_string() }),
    }
}

fn opt(v: Option<f64>) -> String {
    v.map(|v| v.to_string()).unwrap_or_default()
}

/// One header line plus one row per result.
pub fn results_csv(results: &[TestResult]) -> String {
    let mut out = EXPORT_COLUMNS.join(",");
    out.push('\n');
    for r in results {
        let row = [
            csv::escape(&r.scenario_id),
            r.start_time.to_rfc3339_opts(SecondsFormat::Micros, true),
            r.end_time.to_rfc3339_opts(SecondsFormat::Micros, true),
            r.route_completed.to_string(),
            r.completion_percentage.to_string(),
            r.fault_detected.to_string(),
            opt(r.detection_time),
            r.recovery_achieved.to_string(),
            opt(r.recovery_time),
            r.navigation_errors.len().to_string(),
        ];
        out.push_str(&row.join(","));
        out.push('\n');
    }
    out
}

/// Write `results_csv` to `path`. With no results nothing is written and 0 is returned.
pub async fn export_results_csv(results: &[TestResult], path: &Path) -> Result<usize> {
    if results.is_empty() {
        warn!("⚠️  No test results to export");
        return Ok(0);
    }
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(dir).await?;
    }
    tokio::fs::write(path, results_csv(results)).await?;
    info!("📤 Results exported to: {}", path.display());
    Ok(results.len())
}
