//! End-to-end runs on a paused Tokio clock: 50 Hz ticks in virtual time.

mod common;

use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use common::{config, runner_with, scenario, ConstantSource};
use fault_simulator::audit::verify_chain;
use fault_simulator::runner::SharedMonitor;
use fault_simulator::scenarios::SharedInjector;
use fault_simulator::{Error, TelemetrySource, TickContext, TickSample};
use fault_types::{Axis, FaultActivationRecord, FaultKind, TargetAxis, ACCELEROMETER, MAGNETOMETER};

#[tokio::test(start_paused = true)]
async fn noise_is_applied_only_inside_its_window() {
    let dir = tempfile::tempdir().unwrap();
    let noise = scenario(
        "acc_noise",
        ACCELEROMETER,
        TargetAxis::X,
        1.0,
        2.0,
        FaultKind::NoiseInjection { noise_level: 0.5 },
    );
    let runner = runner_with(vec![noise], ConstantSource::level(), config(dir.path(), 5.0));

    let result = runner.run_scenario("acc_noise", "A").await.unwrap();
    assert!(!result.cancelled);
    assert!(result.route_completed);

    let monitor = runner.monitor();
    let monitor = monitor.read().await;
    let samples = monitor.performance_data();
    assert_eq!(samples.len(), 250);

    let mut inside = 0;
    for s in samples {
        let x = s.imu_data.get(ACCELEROMETER, Axis::X).unwrap();
        if s.time < 0.99 || s.time > 3.01 {
            assert_eq!(x, 1.0, "clean reading expected at t={}", s.time);
            assert_eq!(s.imu_data.get(ACCELEROMETER, Axis::Y), Some(0.0));
        } else if s.time > 1.01 && s.time < 2.99 {
            assert_ne!(x, 1.0, "noisy reading expected at t={}", s.time);
            assert_eq!(s.active_faults, 1);
            inside += 1;
        }
    }
    assert!(inside > 90, "only {inside} samples inside the fault window");
}

#[tokio::test(start_paused = true)]
async fn result_and_audit_file_are_recorded() {
    let dir = tempfile::tempdir().unwrap();
    let scale = scenario(
        "mag_scale",
        MAGNETOMETER,
        TargetAxis::All,
        0.5,
        1.0,
        FaultKind::ScaleError { scale_factor: 10.0 },
    );
    let runner = runner_with(vec![scale], ConstantSource::level(), config(dir.path(), 2.0));

    let result = runner.run_scenario("mag_scale", "B").await.unwrap();
    assert!(result.test_id.starts_with("test_mag_scale_"));
    assert_eq!(result.route_name, "B");
    assert!(result.fault_detected);
    let detection = result.detection_time.unwrap();
    assert!((0.49..=0.53).contains(&detection), "detected at {detection}");
    // 45 * 10 on z, 20 * 10 on x, -10 * 10 on y is still in range
    assert!(result.performance_metrics.fault_detection_count >= 2 * 45);
    assert!(result.end_time >= result.start_time);
    assert!(result.recovery_time.map_or(true, |t| t >= 0.0));

    let manager = runner.manager();
    assert_eq!(manager.read().await.test_results(), &[result.clone()]);

    let path = result.raw_data_file.clone().expect("audit file written");
    assert!(path.starts_with(dir.path()));
    let audit: serde_json::Value = serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
    for key in ["test_result", "performance_data", "fault_history", "navigation_errors", "fault_detections"] {
        assert!(audit.get(key).is_some(), "missing {key}");
    }
    assert_eq!(audit["test_result"]["scenario_id"], "mag_scale");
    let history: Vec<FaultActivationRecord> = serde_json::from_value(audit["fault_history"].clone()).unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].scenario_id, "mag_scale");
    assert!(verify_chain(&history));
}

#[tokio::test(start_paused = true)]
async fn unwritable_log_dir_does_not_fail_the_run() {
    let dir = tempfile::tempdir().unwrap();
    let blocker = dir.path().join("not_a_dir");
    std::fs::write(&blocker, b"file").unwrap();
    let loss = scenario("loss", ACCELEROMETER, TargetAxis::All, 0.0, 0.0, FaultKind::AxisLoss);
    let runner = runner_with(vec![loss], ConstantSource::level(), config(&blocker.join("logs"), 1.0));

    let result = runner.run_scenario("loss", "A").await.unwrap();
    assert_eq!(result.raw_data_file, None);
    assert_eq!(runner.manager().read().await.test_results().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn certain_packet_loss_drops_every_tick() {
    let dir = tempfile::tempdir().unwrap();
    let loss = scenario(
        "drop_all",
        ACCELEROMETER,
        TargetAxis::All,
        0.0,
        0.0,
        FaultKind::PacketLoss { loss_rate: 1.0 },
    );
    let runner = runner_with(vec![loss], ConstantSource::level(), config(dir.path(), 2.0));
    let result = runner.run_scenario("drop_all", "A").await.unwrap();

    let dropped = result.performance_metrics.dropped_packet_count;
    let kept = runner.monitor().read().await.performance_data().len();
    assert_eq!(dropped + kept, 100);
    assert!(dropped >= 99, "dropped {dropped}");
    // robot updates are independent of IMU packet loss
    assert!(result.route_completed);
}

// ── Cancellation ──────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn stop_yields_partial_result_and_clears_running_state() {
    let dir = tempfile::tempdir().unwrap();
    let late = scenario("late", ACCELEROMETER, TargetAxis::X, 30.0, 5.0, FaultKind::AxisLoss);
    let runner = Arc::new(runner_with(vec![late], ConstantSource::level(), config(dir.path(), 60.0)));

    let task = {
        let runner = runner.clone();
        tokio::spawn(async move { runner.run_scenario("late", "A").await })
    };
    tokio::time::sleep(Duration::from_secs(5)).await;

    assert!(runner.is_running());
    let test_id = runner.current_test_id().unwrap();
    assert!(matches!(
        runner.run_scenario("late", "A").await,
        Err(Error::RunInProgress(id)) if id == test_id
    ));

    assert!(runner.stop_handle().stop());
    let result = task.await.unwrap().unwrap();

    assert!(result.cancelled);
    assert_eq!(result.test_id, test_id);
    assert!(!result.route_completed);
    assert!(result.completion_percentage < 10.0);
    assert!(!runner.is_running());
    assert_eq!(runner.current_test_id(), None);
    // the fault was scheduled for t = 30 s and must never have been activated
    assert!(runner.injector().read().await.history().is_empty());
    assert_eq!(runner.manager().read().await.test_results().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn stop_after_the_last_tick_is_not_a_cancellation() {
    let dir = tempfile::tempdir().unwrap();
    let s = scenario("short", ACCELEROMETER, TargetAxis::X, 0.1, 0.0, FaultKind::AxisLoss);
    let runner = Arc::new(runner_with(vec![s], ConstantSource::level(), config(dir.path(), 1.0)));

    let task = {
        let runner = runner.clone();
        tokio::spawn(async move { runner.run_scenario("short", "A").await })
    };
    // tick 49 ran at 0.98 s; the loop is in its final interval sleep
    tokio::time::sleep(Duration::from_millis(990)).await;
    assert!(runner.stop());
    let result = task.await.unwrap().unwrap();

    assert!(!result.cancelled);
    assert!(result.route_completed);
    assert_eq!(runner.monitor().read().await.performance_data().len(), 50);
}

#[tokio::test(start_paused = true)]
async fn aborted_run_task_still_releases_the_runner() {
    let dir = tempfile::tempdir().unwrap();
    let s = scenario("s", ACCELEROMETER, TargetAxis::X, 1.0, 1.0, FaultKind::AxisLoss);
    let runner = Arc::new(runner_with(vec![s], ConstantSource::level(), config(dir.path(), 60.0)));

    let task = {
        let runner = runner.clone();
        tokio::spawn(async move { runner.run_scenario("s", "A").await })
    };
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert!(runner.is_running());
    task.abort();
    let _ = task.await;
    assert!(!runner.is_running());
}

// ── Reset isolation ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
struct FirstTickState {
    active_faults: usize,
    history: usize,
    detections: usize,
    detection_records: usize,
    route_progress: f64,
    performance_samples: usize,
}

/// Level IMU, plus a snapshot of the engine state taken at tick 0 of every run.
struct RecordingSource {
    inner: ConstantSource,
    injector: SharedInjector,
    monitor: Arc<OnceLock<SharedMonitor>>,
    seen: Arc<Mutex<Vec<FirstTickState>>>,
}

impl TelemetrySource for RecordingSource {
    fn sample(&mut self, tick: &TickContext) -> anyhow::Result<TickSample> {
        if tick.index == 0 {
            let injector = self.injector.try_read()?;
            let monitor = self.monitor.get().ok_or_else(|| anyhow::anyhow!("monitor not wired"))?;
            let monitor = monitor.try_read()?;
            self.seen.lock().unwrap().push(FirstTickState {
                active_faults: injector.active_fault_count(),
                history: injector.history().len(),
                detections: monitor.detection_count(),
                detection_records: monitor.fault_detections().len(),
                route_progress: monitor.route_progress(),
                performance_samples: monitor.performance_data().len(),
            });
        }
        self.inner.sample(tick)
    }
}

#[tokio::test(start_paused = true)]
async fn second_run_starts_from_clean_state() {
    let dir = tempfile::tempdir().unwrap();
    // A: permanent out-of-range fault; B: short fault starting late
    let a = scenario(
        "a_scale",
        MAGNETOMETER,
        TargetAxis::All,
        0.2,
        0.0,
        FaultKind::ScaleError { scale_factor: 10.0 },
    );
    let b = scenario("b_loss", ACCELEROMETER, TargetAxis::X, 1.0, 0.5, FaultKind::AxisLoss);

    let mut manager = fault_simulator::ScenarioManager::new(fault_simulator::FaultInjector::with_seed(3));
    manager.add_scenario(a);
    manager.add_scenario(b);
    let monitor_slot = Arc::new(OnceLock::new());
    let seen = Arc::new(Mutex::new(Vec::new()));
    let source = RecordingSource {
        inner: ConstantSource::level(),
        injector: manager.injector(),
        monitor: monitor_slot.clone(),
        seen: seen.clone(),
    };
    let runner = fault_simulator::ScenarioRunner::new(manager, Box::new(source), config(dir.path(), 2.0));
    assert!(monitor_slot.set(runner.monitor()).is_ok());

    let first = runner.run_scenario("a_scale", "A").await.unwrap();
    assert!(first.fault_detected);
    assert!(first.route_completed);
    assert_eq!(runner.injector().read().await.active_fault_count(), 1);

    let second = runner.run_scenario("b_loss", "A").await.unwrap();
    assert!(!second.fault_detected);

    let clean = FirstTickState {
        active_faults: 0,
        history: 0,
        detections: 0,
        detection_records: 0,
        route_progress: 0.0,
        performance_samples: 0,
    };
    let seen = seen.lock().unwrap().clone();
    assert_eq!(seen, vec![clean.clone(), clean]);
}

// ── Degraded telemetry ────────────────────────────────────────────────────────

struct FlakySource(ConstantSource);

impl TelemetrySource for FlakySource {
    fn sample(&mut self, tick: &TickContext) -> anyhow::Result<TickSample> {
        if tick.index % 2 == 1 {
            anyhow::bail!("bridge timeout");
        }
        self.0.sample(tick)
    }
}

#[tokio::test(start_paused = true)]
async fn failing_ticks_are_skipped_not_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let s = scenario("s", ACCELEROMETER, TargetAxis::X, 0.5, 0.5, FaultKind::AxisLoss);
    let runner = runner_with(vec![s], FlakySource(ConstantSource::level()), config(dir.path(), 2.0));

    let result = runner.run_scenario("s", "A").await.unwrap();
    assert_eq!(runner.monitor().read().await.performance_data().len(), 50);
    assert!(result.route_completed);
}
