//! monitor.rs — system-response monitor
//!
//! Consumes one robot snapshot and (unless the packet was dropped) one IMU
//! snapshot per tick and tracks:
//! - route progress as a high-water mark in [0, 1]
//! - cumulative distance and an instantaneous-speed series ("navigation stability")
//! - explicit navigation errors reported by the robot
//! - range-based anomaly detections on the IMU data
//! - a per-tick audit sample `{time, imu_data, active_faults}`
//!
//! Speed samples are `step_distance * tick_rate_hz`: the stability metric only
//! means something if updates arrive at that constant, known rate.
//!
//! Per-tick histories (samples, detections, speeds) are ring buffers capped at
//! `retention` entries; counters and the first detection time are kept separately
//! so metrics stay exact for runs longer than the retention window.

use std::collections::VecDeque;

use fault_types::{
    Axis, FaultDetectionRecord, NavigationErrorRecord, PerformanceMetrics, PerformanceSample,
    Position, RobotSnapshot, SensorSnapshot, ACCELEROMETER, GYROSCOPE, MAGNETOMETER,
};
use serde::Serialize;
use tokio::time::Instant;
use tracing::debug;

use crate::injector::FaultInjector;

pub const DEFAULT_TICK_RATE_HZ: f64 = 50.0;
pub const DEFAULT_RETENTION: usize = 10_000;

/// Plausibility range per known sensor; readings outside are flagged.
pub const PLAUSIBLE_RANGES: [(&str, f64, f64); 3] = [
    (ACCELEROMETER, -20.0, 20.0),
    (GYROSCOPE, -10.0, 10.0),
    (MAGNETOMETER, -100.0, 100.0),
];

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct StabilitySample {
    /// Monitor time of the robot update that produced this sample
    pub time: f64,
    pub speed: f64,
}

/// `1 / (1 + σ)` with σ the population standard deviation. `None` for no samples.
pub fn stability_score(speeds: impl IntoIterator<Item = f64>) -> Option<f64> {
    mean_std(speeds).map(|(_, std)| 1.0 / (1.0 + std))
}

fn mean_std(values: impl IntoIterator<Item = f64>) -> Option<(f64, f64)> {
    let values: Vec<f64> = values.into_iter().collect();
    if values.is_empty() {
        return None;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    Some((mean, var.sqrt()))
}

/// Labels (`<sensor>_<axis>_out_of_range`) for every known sensor axis outside its range.
/// Unknown sensors and missing axes contribute nothing; non-finite readings are flagged.
pub fn detect_anomalies(snapshot: &SensorSnapshot) -> Vec<String> {
    let mut labels = Vec::new();
    for (sensor, lo, hi) in PLAUSIBLE_RANGES {
        for axis in Axis::ALL {
            if let Some(v) = snapshot.get(sensor, axis) {
                if !(lo..=hi).contains(&v) {
                    labels.push(format!("{sensor}_{axis}_out_of_range"));
                }
            }
        }
    }
    labels
}

fn push_bounded<T>(buf: &mut VecDeque<T>, item: T, cap: usize) {
    if cap == 0 {
        return;
    }
    if buf.len() == cap {
        buf.pop_front();
    }
    buf.push_back(item);
}

// ── Monitor ───────────────────────────────────────────────────────────────────

pub struct SystemMonitor {
    start: Instant,
    tick_rate_hz: f64,
    retention: usize,

    route_progress: f64,
    total_distance: f64,
    last_position: Option<Position>,
    navigation_stability: VecDeque<StabilitySample>,
    navigation_errors: Vec<NavigationErrorRecord>,

    fault_detections: VecDeque<FaultDetectionRecord>,
    detection_count: usize,
    first_detection_time: Option<f64>,

    performance_data: VecDeque<PerformanceSample>,
    dropped_packets: usize,
}

impl Default for SystemMonitor {
    fn default() -> Self {
        Self::new(DEFAULT_TICK_RATE_HZ, DEFAULT_RETENTION)
    }
}

impl SystemMonitor {
    pub fn new(tick_rate_hz: f64, retention: usize) -> Self {
        Self {
            start: Instant::now(),
            tick_rate_hz,
            retention,
            route_progress: 0.0,
            total_distance: 0.0,
            last_position: None,
            navigation_stability: VecDeque::new(),
            navigation_errors: Vec::new(),
            fault_detections: VecDeque::new(),
            detection_count: 0,
            first_detection_time: None,
            performance_data: VecDeque::new(),
            dropped_packets: 0,
        }
    }

    /// Zero all state and restart the clock. Must precede every run.
    pub fn reset(&mut self) {
        *self = Self::new(self.tick_rate_hz, self.retention);
    }

    /// Seconds since the last reset.
    pub fn elapsed(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }

    pub fn update_robot_state(&mut self, robot: &RobotSnapshot) {
        let now = self.elapsed();

        if let Some(p) = robot.step_progress.filter(|p| p.is_finite()) {
            self.route_progress = self.route_progress.max(p.clamp(0.0, 1.0));
        }

        if let Some(pos) = robot.position().filter(|p| p.x.is_finite() && p.y.is_finite()) {
            if let Some(prev) = self.last_position {
                let step = pos.dist(&prev);
                self.total_distance += step;
                push_bounded(
                    &mut self.navigation_stability,
                    StabilitySample { time: now, speed: step * self.tick_rate_hz },
                    self.retention,
                );
            }
            self.last_position = Some(pos);
        }

        if robot.is_error() {
            let error = robot
                .error
                .clone()
                .unwrap_or_else(|| "Unknown navigation error".to_string());
            debug!("navigation error at t={now:.2}s: {error}");
            // last known position: an error snapshot often carries no x/y
            self.navigation_errors.push(NavigationErrorRecord {
                time: now,
                error,
                position: self.last_position,
            });
        }
    }

    /// Range-check the (already fault-injected) IMU data and keep an audit sample.
    pub fn update_imu_state(&mut self, imu: &SensorSnapshot, injector: &FaultInjector) {
        let now = self.elapsed();

        for label in detect_anomalies(imu) {
            debug!("anomaly at t={now:.2}s: {label}");
            self.detection_count += 1;
            self.first_detection_time.get_or_insert(now);
            push_bounded(
                &mut self.fault_detections,
                FaultDetectionRecord { time: now, label, data_snapshot: imu.clone() },
                self.retention,
            );
        }

        push_bounded(
            &mut self.performance_data,
            PerformanceSample {
                time: now,
                imu_data: imu.clone(),
                active_faults: injector.active_fault_count(),
            },
            self.retention,
        );
    }

    pub fn record_dropped_packet(&mut self) {
        self.dropped_packets += 1;
    }

    pub fn get_performance_metrics(&self) -> PerformanceMetrics {
        let mut metrics = PerformanceMetrics {
            route_completion_percentage: self.route_progress * 100.0,
            total_distance_traveled: self.total_distance,
            navigation_error_count: self.navigation_errors.len(),
            fault_detection_count: self.detection_count,
            dropped_packet_count: self.dropped_packets,
            test_duration: self.elapsed(),
            ..Default::default()
        };
        if let Some((mean, std)) = mean_std(self.navigation_stability.iter().map(|s| s.speed)) {
            metrics.avg_velocity = Some(mean);
            metrics.velocity_std = Some(std);
            metrics.navigation_stability_score = Some(1.0 / (1.0 + std));
        }
        metrics
    }

    // ── Accessors ─────────────────────────────────────────────────────────────

    pub fn route_progress(&self) -> f64 {
        self.route_progress
    }

    pub fn total_distance(&self) -> f64 {
        self.total_distance
    }

    pub fn tick_rate_hz(&self) -> f64 {
        self.tick_rate_hz
    }

    pub fn navigation_stability(&self) -> &VecDeque<StabilitySample> {
        &self.navigation_stability
    }

    pub fn navigation_errors(&self) -> &[NavigationErrorRecord] {
        &self.navigation_errors
    }

    /// Most recent detections, up to the retention cap.
    pub fn fault_detections(&self) -> &VecDeque<FaultDetectionRecord> {
        &self.fault_detections
    }

    /// All detections since reset, including any evicted from the ring buffer.
    pub fn detection_count(&self) -> usize {
        self.detection_count
    }

    pub fn first_detection_time(&self) -> Option<f64> {
        self.first_detection_time
    }

    pub fn performance_data(&self) -> &VecDeque<PerformanceSample> {
        &self.performance_data
    }

    pub fn dropped_packets(&self) -> usize {
        self.dropped_packets
    }
}
