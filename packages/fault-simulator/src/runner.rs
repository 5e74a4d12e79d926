//! runner.rs — scenario execution
//!
//! One `run_scenario` call:
//! 1. Looks the scenario up (unknown id fails before anything starts)
//! 2. Claims the runner (one run at a time) and resets injector + monitor
//! 3. Runs two cooperative tasks until the test duration elapses or a stop arrives:
//!    - fault schedule: activate at `start_time`, deactivate after `duration`
//!    - tick loop: sample telemetry, drop or fault-inject the IMU data, feed the monitor
//! 4. Builds the `TestResult`, writes the per-run audit file, records the result
//!
//! The tick loop sleeps one interval after each tick rather than following a
//! wall-clock schedule, so a run takes slightly longer than planned by the
//! cumulative per-tick processing cost. It is not a real-time loop.
//!
//! Cancellation is a `watch` channel observed at every sleep of both tasks; the
//! schedule re-checks it right before touching the injector.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use fault_types::{FaultScenario, TestResult, ROUTE_COMPLETION_THRESHOLD};
use tokio::sync::{watch, RwLock};
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::audit::{self, RunAudit};
use crate::config::RunnerConfig;
use crate::error::{Error, Result};
use crate::monitor::SystemMonitor;
use crate::recovery::{RecoveryAssessor, WindowedStabilityAssessor};
use crate::scenarios::{ScenarioManager, SharedInjector, SharedManager};
use crate::source::{TelemetrySource, TickContext, TickSample};

pub type SharedMonitor = Arc<RwLock<SystemMonitor>>;

// ── Run status + cancellation ─────────────────────────────────────────────────

struct RunStatus {
    current: Mutex<Option<String>>,
    cancel: watch::Sender<bool>,
}

impl RunStatus {
    fn new() -> Self {
        let (cancel, _) = watch::channel(false);
        Self { current: Mutex::new(None), cancel }
    }

    fn current(&self) -> MutexGuard<'_, Option<String>> {
        self.current.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Claim the runner for `test_id`. Clearing the stop flag happens under the
    /// same lock `stop` takes, so a stop can never be lost to a starting run.
    fn begin(self: &Arc<Self>, test_id: &str) -> Result<(RunGuard, watch::Receiver<bool>)> {
        let mut current = self.current();
        if let Some(active) = current.as_ref() {
            return Err(Error::RunInProgress(active.clone()));
        }
        self.cancel.send_replace(false);
        *current = Some(test_id.to_string());
        Ok((RunGuard { status: self.clone() }, self.cancel.subscribe()))
    }

    fn stop(&self) -> bool {
        let current = self.current();
        match current.as_ref() {
            Some(test_id) => {
                self.cancel.send_replace(true);
                info!("🛑 Stop requested for {test_id}");
                true
            }
            None => false,
        }
    }
}

/// Clears the running state however the run ends (return, error, or the future being dropped).
struct RunGuard {
    status: Arc<RunStatus>,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        *self.status.current() = None;
    }
}

/// A claimed runner for one scenario run, produced by [`ScenarioRunner::begin_run`].
/// Dropping it without calling [`ScenarioRunner::execute`] releases the runner.
pub struct RunTicket {
    test_id: String,
    scenario: FaultScenario,
    route_name: String,
    cancel: watch::Receiver<bool>,
    _guard: RunGuard,
}

impl RunTicket {
    pub fn test_id(&self) -> &str {
        &self.test_id
    }

    pub fn scenario_id(&self) -> &str {
        &self.scenario.id
    }

    pub fn route_name(&self) -> &str {
        &self.route_name
    }
}

/// Cloneable handle that cancels whatever run is in progress.
#[derive(Clone)]
pub struct StopHandle {
    status: Arc<RunStatus>,
}

impl StopHandle {
    /// Returns false when nothing was running.
    pub fn stop(&self) -> bool {
        self.status.stop()
    }
}

/// Sleep for `dur` unless cancelled first. Returns whether the full sleep completed.
async fn sleep_or_cancel(cancel: &mut watch::Receiver<bool>, dur: Duration) -> bool {
    if *cancel.borrow() {
        return false;
    }
    let slept = tokio::select! {
        _ = tokio::time::sleep(dur) => true,
        _ = cancel.wait_for(|stop| *stop) => false,
    };
    slept && !*cancel.borrow()
}

fn secs(s: f64) -> Duration {
    Duration::try_from_secs_f64(s).unwrap_or(Duration::ZERO)
}

// ── Runner ────────────────────────────────────────────────────────────────────

pub struct ScenarioRunner {
    manager: SharedManager,
    injector: SharedInjector,
    monitor: SharedMonitor,
    source: tokio::sync::Mutex<Box<dyn TelemetrySource>>,
    assessor: Box<dyn RecoveryAssessor>,
    config: RunnerConfig,
    status: Arc<RunStatus>,
}

impl ScenarioRunner {
    pub fn new(manager: ScenarioManager, source: Box<dyn TelemetrySource>, config: RunnerConfig) -> Self {
        let injector = manager.injector();
        Self {
            manager: Arc::new(RwLock::new(manager)),
            injector,
            monitor: Arc::new(RwLock::new(SystemMonitor::new(config.tick_rate_hz, config.retention))),
            source: tokio::sync::Mutex::new(source),
            assessor: Box::new(WindowedStabilityAssessor::default()),
            config,
            status: Arc::new(RunStatus::new()),
        }
    }

    pub fn with_assessor(mut self, assessor: impl RecoveryAssessor + 'static) -> Self {
        self.assessor = Box::new(assessor);
        self
    }

    pub fn manager(&self) -> SharedManager {
        self.manager.clone()
    }

    pub fn injector(&self) -> SharedInjector {
        self.injector.clone()
    }

    pub fn monitor(&self) -> SharedMonitor {
        self.monitor.clone()
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle { status: self.status.clone() }
    }

    pub fn stop(&self) -> bool {
        self.status.stop()
    }

    pub fn is_running(&self) -> bool {
        self.status.current().is_some()
    }

    pub fn current_test_id(&self) -> Option<String> {
        self.status.current().clone()
    }

    /// Execute one scenario end to end and record its result.
    ///
    /// Fails with `ScenarioNotFound` before entering the running state, and with
    /// `RunInProgress` if another run holds this runner. A stopped run still
    /// produces (and records) a result for what was executed, flagged `cancelled`.
    pub async fn run_scenario(&self, scenario_id: &str, route_name: &str) -> Result<TestResult> {
        let ticket = self.begin_run(scenario_id, route_name).await?;
        Ok(self.execute(ticket).await)
    }

    /// Look the scenario up and claim the runner for it. Nothing is reset yet;
    /// the claim holds until the ticket (or the `execute` future owning it) is dropped.
    pub async fn begin_run(&self, scenario_id: &str, route_name: &str) -> Result<RunTicket> {
        let scenario = self
            .manager
            .read()
            .await
            .get_scenario(scenario_id)
            .cloned()
            .ok_or_else(|| Error::ScenarioNotFound(scenario_id.to_string()))?;

        let test_id = format!("test_{scenario_id}_{}", Uuid::new_v4().simple());
        let (guard, cancel) = self.status.begin(&test_id)?;
        Ok(RunTicket {
            test_id,
            scenario,
            route_name: route_name.to_string(),
            cancel,
            _guard: guard,
        })
    }

    /// Run a claimed scenario to completion (or until stopped) and record its result.
    pub async fn execute(&self, ticket: RunTicket) -> TestResult {
        let RunTicket { test_id, scenario, route_name, cancel, _guard } = ticket;

        self.injector.write().await.reset();
        self.monitor.write().await.reset();

        let horizon = scenario.test_duration(self.config.min_test_duration_s, self.config.post_fault_margin_s);
        let start_time = Utc::now();
        info!(
            "🚀 Starting scenario: {} ({}) on route {route_name}, {horizon:.1}s at {} Hz",
            scenario.name, scenario.id, self.config.tick_rate_hz
        );

        let ((), completed) = tokio::join!(
            self.schedule_fault(&scenario, cancel.clone()),
            self.drive(horizon, cancel.clone()),
        );
        let cancelled = !completed;

        let result = self.finish(&test_id, &scenario, &route_name, start_time, cancelled).await;
        info!(
            "🏁 Scenario {} {}: completion {:.1}%, detected={}, recovered={}",
            scenario.id,
            if cancelled { "stopped" } else { "completed" },
            result.completion_percentage,
            result.fault_detected,
            result.recovery_achieved,
        );
        result
    }

    /// Activate at `start_time`, deactivate `duration` later (permanent faults stay on).
    async fn schedule_fault(&self, scenario: &FaultScenario, mut cancel: watch::Receiver<bool>) {
        if !sleep_or_cancel(&mut cancel, secs(scenario.start_time)).await {
            return;
        }
        let fault_id = {
            let mut injector = self.injector.write().await;
            if *cancel.borrow() {
                return;
            }
            injector.activate(scenario)
        };

        if scenario.is_permanent() {
            return;
        }
        if !sleep_or_cancel(&mut cancel, secs(scenario.duration)).await {
            return;
        }
        let mut injector = self.injector.write().await;
        if *cancel.borrow() {
            return;
        }
        injector.deactivate(&fault_id);
    }

    /// Returns whether every scheduled tick was processed.
    async fn drive(&self, horizon: f64, mut cancel: watch::Receiver<bool>) -> bool {
        let interval = self.config.tick_interval();
        let step = interval.as_secs_f64();
        // epsilon keeps 60 s / 20 ms at 3000 ticks despite float rounding
        let ticks = (horizon / step + 1e-9).floor() as u64;
        let started = Instant::now();
        let mut processed = 0;

        for index in 0..ticks {
            if *cancel.borrow() {
                break;
            }
            let tick = TickContext { index, elapsed: index as f64 * step, horizon };
            let sampled = self.source.lock().await.sample(&tick);
            match sampled {
                Ok(sample) => self.process_tick(sample).await,
                Err(e) => warn!("⚠️  Tick {index}: telemetry unavailable, skipping ({e:#})"),
            }
            processed += 1;
            if !sleep_or_cancel(&mut cancel, interval).await {
                break;
            }
        }
        debug!("{processed}/{ticks} ticks in {:.2}s", started.elapsed().as_secs_f64());
        processed == ticks
    }

    async fn process_tick(&self, sample: TickSample) {
        let mut injector = self.injector.write().await;
        let mut monitor = self.monitor.write().await;
        if injector.should_drop_packet() {
            monitor.record_dropped_packet();
        } else {
            let faulted = injector.apply_faults(&sample.imu);
            monitor.update_imu_state(&faulted, &injector);
        }
        monitor.update_robot_state(&sample.robot);
    }

    async fn finish(
        &self,
        test_id: &str,
        scenario: &FaultScenario,
        route_name: &str,
        start_time: chrono::DateTime<Utc>,
        cancelled: bool,
    ) -> TestResult {
        let injector = self.injector.read().await;
        let monitor = self.monitor.read().await;

        let performance_metrics = monitor.get_performance_metrics();
        let recovery = self.assessor.assess(&monitor);
        let audit_path = audit::audit_file_path(&self.config.logs_dir, test_id);

        let mut result = TestResult {
            test_id: test_id.to_string(),
            scenario_id: scenario.id.clone(),
            route_name: route_name.to_string(),
            start_time,
            end_time: Utc::now(),
            route_completed: monitor.route_progress() >= ROUTE_COMPLETION_THRESHOLD,
            completion_percentage: performance_metrics.route_completion_percentage,
            fault_detected: monitor.detection_count() > 0,
            detection_time: monitor.first_detection_time(),
            recovery_achieved: recovery.achieved,
            recovery_time: recovery.time,
            cancelled,
            navigation_errors: monitor.navigation_errors().to_vec(),
            performance_metrics,
            raw_data_file: Some(audit_path.clone()),
        };

        let record = RunAudit {
            test_result: &result,
            performance_data: monitor.performance_data(),
            fault_history: injector.history().records(),
            navigation_errors: monitor.navigation_errors(),
            fault_detections: monitor.fault_detections(),
        };
        let written = audit::write_run_audit(&audit_path, &record).await;
        if let Err(e) = written {
            warn!("⚠️  Could not write audit log {}: {e}", audit_path.display());
            result.raw_data_file = None;
        }
        drop(monitor);
        drop(injector);

        self.manager.write().await.record_result(result.clone());
        result
    }
}
