#![allow(dead_code)]

use std::path::Path;

use fault_simulator::config::RunnerConfig;
use fault_simulator::{FaultInjector, ScenarioManager, ScenarioRunner, TelemetrySource, TickContext, TickSample};
use fault_types::{
    FaultKind, FaultScenario, FaultSeverity, RobotSnapshot, SensorSnapshot, TargetAxis,
    ACCELEROMETER, GYROSCOPE, MAGNETOMETER,
};

/// Same IMU reading every tick; robot moves along x at a constant pace.
pub struct ConstantSource {
    pub imu: SensorSnapshot,
}

impl ConstantSource {
    pub fn level() -> Self {
        Self {
            imu: SensorSnapshot::new()
                .with_sensor(ACCELEROMETER, 1.0, 0.0, 9.8)
                .with_sensor(GYROSCOPE, 0.0, 0.0, 0.0)
                .with_sensor(MAGNETOMETER, 20.0, -10.0, 45.0),
        }
    }
}

impl TelemetrySource for ConstantSource {
    fn sample(&mut self, tick: &TickContext) -> anyhow::Result<TickSample> {
        let p = tick.progress();
        Ok(TickSample { imu: self.imu.clone(), robot: RobotSnapshot::at(p * 10.0, 0.0, p) })
    }
}

pub fn scenario(id: &str, sensor: &str, axis: TargetAxis, start: f64, duration: f64, kind: FaultKind) -> FaultScenario {
    FaultScenario {
        id: id.to_string(),
        name: id.to_string(),
        description: String::new(),
        severity: FaultSeverity::Medium,
        target_sensor: sensor.to_string(),
        target_axis: axis,
        start_time: start,
        duration,
        kind,
    }
}

pub fn config(logs_dir: &Path, min_duration_s: f64) -> RunnerConfig {
    RunnerConfig {
        min_test_duration_s: min_duration_s,
        post_fault_margin_s: 0.0,
        logs_dir: logs_dir.to_path_buf(),
        ..Default::default()
    }
}

pub fn runner_with(
    scenarios: Vec<FaultScenario>,
    source: impl TelemetrySource + 'static,
    config: RunnerConfig,
) -> ScenarioRunner {
    let mut manager = ScenarioManager::new(FaultInjector::with_seed(11));
    for s in scenarios {
        manager.add_scenario(s);
    }
    ScenarioRunner::new(manager, Box::new(source), config)
}
