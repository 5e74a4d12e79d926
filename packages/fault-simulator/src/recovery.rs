//! recovery.rs — recovery assessment strategies
//!
//! The runner asks a `RecoveryAssessor` two questions once a run is over:
//! did the system end up stable again, and how long after the first detection
//! did stability return. The default answers them from the monitor's
//! speed series; other criteria can be plugged in without touching the runner.

use serde::Deserialize;

use crate::monitor::{stability_score, SystemMonitor};

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RecoveryAssessment {
    pub achieved: bool,
    /// Seconds from first detection; never negative
    pub time: Option<f64>,
}

pub trait RecoveryAssessor: Send + Sync {
    fn recovery_achieved(&self, monitor: &SystemMonitor) -> bool;

    fn recovery_time(&self, monitor: &SystemMonitor) -> Option<f64>;

    fn assess(&self, monitor: &SystemMonitor) -> RecoveryAssessment {
        RecoveryAssessment {
            achieved: self.recovery_achieved(monitor),
            time: self.recovery_time(monitor).map(|t| t.max(0.0)),
        }
    }
}

// ── Windowed stability ────────────────────────────────────────────────────────

/// Stability-score heuristic over the speed series.
///
/// - achieved: at least `min_samples` speed samples, and the score of the last
///   `min_samples` of them exceeds `threshold`
/// - time: for each audit sample after the first detection, score the speed
///   samples within `window_radius` of that instant; the first one above
///   `threshold` marks recovery
///
/// Coupled to the monitor's fixed tick rate through the speed samples.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct WindowedStabilityAssessor {
    pub min_samples: usize,
    pub threshold: f64,
    pub window_radius: usize,
}

impl Default for WindowedStabilityAssessor {
    fn default() -> Self {
        Self { min_samples: 10, threshold: 0.7, window_radius: 5 }
    }
}

impl RecoveryAssessor for WindowedStabilityAssessor {
    fn recovery_achieved(&self, monitor: &SystemMonitor) -> bool {
        let speeds = monitor.navigation_stability();
        if self.min_samples == 0 || speeds.len() < self.min_samples {
            return false;
        }
        let recent = speeds.iter().skip(speeds.len() - self.min_samples).map(|s| s.speed);
        stability_score(recent).is_some_and(|score| score > self.threshold)
    }

    fn recovery_time(&self, monitor: &SystemMonitor) -> Option<f64> {
        let first = monitor.first_detection_time()?;
        let speeds = monitor.navigation_stability();

        for sample in monitor.performance_data().iter().filter(|s| s.time > first) {
            // index of the first speed sample taken after this audit sample
            let idx = speeds.partition_point(|s| s.time <= sample.time);
            let lo = idx.saturating_sub(self.window_radius);
            let hi = (idx + self.window_radius).min(speeds.len());
            let window = speeds.range(lo..hi).map(|s| s.speed);
            if stability_score(window).is_some_and(|score| score > self.threshold) {
                return Some(sample.time - first);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::injector::FaultInjector;
    use fault_types::{RobotSnapshot, SensorSnapshot, MAGNETOMETER};
    use std::time::Duration;

    fn drive(m: &mut SystemMonitor, steps: &[f64], x0: &mut f64) {
        for step in steps {
            *x0 += step;
            m.update_robot_state(&RobotSnapshot::at(*x0, 0.0, 0.5));
        }
    }

    #[test]
    fn too_few_samples_is_not_recovery() {
        let mut m = SystemMonitor::default();
        let mut x = 0.0;
        drive(&mut m, &[0.01; 5], &mut x);
        assert!(!WindowedStabilityAssessor::default().recovery_achieved(&m));
    }

    #[test]
    fn steady_motion_is_recovery() {
        let mut m = SystemMonitor::default();
        let mut x = 0.0;
        // first update only seeds the position; then 12 equal steps
        drive(&mut m, &[0.0; 13], &mut x);
        let a = WindowedStabilityAssessor::default();
        assert!(a.recovery_achieved(&m));
    }

    #[test]
    fn erratic_motion_is_not_recovery() {
        let mut m = SystemMonitor::default();
        let mut x = 0.0;
        let steps: Vec<f64> = (0..20).map(|i| if i % 2 == 0 { 0.0 } else { 0.2 }).collect();
        drive(&mut m, &steps, &mut x);
        assert!(!WindowedStabilityAssessor::default().recovery_achieved(&m));
    }

    #[test]
    fn no_detection_means_no_recovery_time() {
        let mut m = SystemMonitor::default();
        let mut x = 0.0;
        drive(&mut m, &[0.0; 20], &mut x);
        assert_eq!(WindowedStabilityAssessor::default().recovery_time(&m), None);
    }

    #[tokio::test(start_paused = true)]
    async fn recovery_time_measured_from_first_detection() {
        let inj = FaultInjector::with_seed(1);
        let mut m = SystemMonitor::default();
        let mut x = 0.0;
        let tick = Duration::from_millis(20);
        let bad = SensorSnapshot::new().with_sensor(MAGNETOMETER, 150.0, 0.0, 0.0);
        let good = SensorSnapshot::new().with_sensor(MAGNETOMETER, 10.0, 0.0, 0.0);

        // 1 s of erratic motion with a detection at t = 0
        for i in 0..50 {
            let imu = if i == 0 { &bad } else { &good };
            m.update_imu_state(imu, &inj);
            drive(&mut m, &[if i % 2 == 0 { 0.0 } else { 0.3 }], &mut x);
            tokio::time::advance(tick).await;
        }
        // then 1 s of perfectly steady motion
        for _ in 0..50 {
            m.update_imu_state(&good, &inj);
            drive(&mut m, &[0.01], &mut x);
            tokio::time::advance(tick).await;
        }

        let a = WindowedStabilityAssessor::default();
        let t = a.recovery_time(&m).expect("steady tail should register recovery");
        assert!(t > 0.9 && t < 1.2, "recovery at {t}");
        assert!(a.recovery_achieved(&m));

        let assessed = a.assess(&m);
        assert!(assessed.achieved);
        assert_eq!(assessed.time, Some(t));
    }
}
