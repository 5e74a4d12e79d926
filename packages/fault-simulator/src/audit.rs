//! audit.rs — fault activation history + per-run audit file
//!
//! Every fault activation is appended as a record whose hash covers the previous
//! record's hash. Editing or dropping any record in an exported audit file breaks
//! the chain, which `verify_chain` detects.
//!
//! The per-run audit file carries everything needed to re-analyse a run offline:
//! `{test_result, performance_data, fault_history, navigation_errors, fault_detections}`.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use chrono::{DateTime, SecondsFormat, Utc};
use fault_types::{
    FaultActivationRecord, FaultDetectionRecord, FaultType, NavigationErrorRecord,
    PerformanceSample, TestResult,
};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::info;

pub const GENESIS_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

fn compute_hash(
    prev_hash: &str,
    fault_id: &str,
    scenario_id: &str,
    fault_type: FaultType,
    activated_at: &DateTime<Utc>,
    offset_s: f64,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(prev_hash.as_bytes());
    hasher.update(fault_id.as_bytes());
    hasher.update(scenario_id.as_bytes());
    hasher.update(fault_type.as_str().as_bytes());
    hasher.update(activated_at.to_rfc3339_opts(SecondsFormat::Nanos, true).as_bytes());
    hasher.update(offset_s.to_le_bytes());
    hex::encode(hasher.finalize())
}

// ── Activation log ────────────────────────────────────────────────────────────

/// Append-only, hash-chained history of fault activations.
#[derive(Debug, Clone, Default)]
pub struct ActivationLog {
    records: Vec<FaultActivationRecord>,
}

impl ActivationLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one activation. This is the single write path.
    pub fn append(
        &mut self,
        fault_id: &str,
        scenario_id: &str,
        fault_type: FaultType,
        activated_at: DateTime<Utc>,
        offset_s: f64,
    ) -> &FaultActivationRecord {
        let prev_hash = self
            .records
            .last()
            .map(|r| r.record_hash.clone())
            .unwrap_or_else(|| GENESIS_HASH.to_string());
        let record_hash =
            compute_hash(&prev_hash, fault_id, scenario_id, fault_type, &activated_at, offset_s);

        self.records.push(FaultActivationRecord {
            fault_id: fault_id.to_string(),
            scenario_id: scenario_id.to_string(),
            fault_type,
            activated_at,
            offset_s,
            prev_hash,
            record_hash,
        });
        debug_assert!(self.verify(), "activation chain broken right after append");
        &self.records[self.records.len() - 1]
    }

    pub fn records(&self) -> &[FaultActivationRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Only called when the whole run state is reset.
    pub(crate) fn clear(&mut self) {
        self.records.clear();
    }

    pub fn verify(&self) -> bool {
        verify_chain(&self.records)
    }
}

/// Check that every record hashes correctly and links to its predecessor.
pub fn verify_chain(records: &[FaultActivationRecord]) -> bool {
    let mut prev: &str = GENESIS_HASH;
    for r in records {
        if r.prev_hash != prev {
            return false;
        }
        let expected = compute_hash(
            &r.prev_hash,
            &r.fault_id,
            &r.scenario_id,
            r.fault_type,
            &r.activated_at,
            r.offset_s,
        );
        if expected != r.record_hash {
            return false;
        }
        prev = r.record_hash.as_str();
    }
    true
}

// ── Per-run audit file ────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct RunAudit<'a> {
    pub test_result: &'a TestResult,
    pub performance_data: &'a VecDeque<PerformanceSample>,
    pub fault_history: &'a [FaultActivationRecord],
    pub navigation_errors: &'a [NavigationErrorRecord],
    pub fault_detections: &'a VecDeque<FaultDetectionRecord>,
}

pub fn audit_file_path(dir: &Path, test_id: &str) -> PathBuf {
    dir.join(format!("scenario_{test_id}.json"))
}

/// Write the audit file for one run. Callers treat failure as non-fatal.
pub async fn write_run_audit(path: &Path, audit: &RunAudit<'_>) -> std::io::Result<()> {
    let body = serde_json::to_vec_pretty(audit)?;
    if let Some(dir) = path.parent() {
        tokio::fs::create_dir_all(dir).await?;
    }
    tokio::fs::write(path, body).await?;
    info!("📝 Test logs saved to: {}", path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chain_links_records() {
        let mut log = ActivationLog::new();
        log.append("a_1", "a", FaultType::AxisLoss, Utc::now(), 1.0);
        log.append("b_2", "b", FaultType::Saturation, Utc::now(), 2.5);

        let r = log.records();
        assert_eq!(r[0].prev_hash, GENESIS_HASH);
        assert_eq!(r[1].prev_hash, r[0].record_hash);
        assert_eq!(r[0].record_hash.len(), 64);
        assert!(log.verify());
    }

    #[test]
    fn tampering_breaks_the_chain() {
        let mut log = ActivationLog::new();
        log.append("a_1", "a", FaultType::AxisLoss, Utc::now(), 1.0);
        log.append("b_2", "b", FaultType::Saturation, Utc::now(), 2.5);

        let mut records = log.records().to_vec();
        records[0].scenario_id = "forged".into();
        assert!(!verify_chain(&records));

        let mut records = log.records().to_vec();
        records.remove(0);
        assert!(!verify_chain(&records));
    }

    #[test]
    fn chain_survives_json_round_trip() {
        let mut log = ActivationLog::new();
        log.append("a_1", "a", FaultType::BiasDrift, Utc::now(), 0.123456789);
        let json = serde_json::to_string(log.records()).unwrap();
        let back: Vec<FaultActivationRecord> = serde_json::from_str(&json).unwrap();
        assert!(verify_chain(&back));
    }
}
