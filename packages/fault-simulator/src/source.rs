//! source.rs — per-tick telemetry sources
//!
//! The runner pulls one `TickSample` (IMU + robot state) per tick from a
//! `TelemetrySource`. A HIL bridge or test harness implements the trait; the
//! built-in `SyntheticSource` stands in for the robot when none is attached:
//! - robot follows a sine-wave path along x, progress = elapsed / horizon
//! - IMU readings are Gaussian around a level, stationary sensor

use fault_types::{RobotSnapshot, SensorSnapshot, ACCELEROMETER, GYROSCOPE, MAGNETOMETER};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};
use serde::Deserialize;

/// Timing of the tick being sampled.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TickContext {
    pub index: u64,
    /// Seconds since the run started
    pub elapsed: f64,
    /// Planned run length in seconds
    pub horizon: f64,
}

impl TickContext {
    /// Scheduled route progress in [0, 1].
    pub fn progress(&self) -> f64 {
        if self.horizon <= 0.0 {
            return 1.0;
        }
        (self.elapsed / self.horizon).clamp(0.0, 1.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct TickSample {
    pub imu: SensorSnapshot,
    pub robot: RobotSnapshot,
}

pub trait TelemetrySource: Send {
    /// An error skips the tick; the run carries on.
    fn sample(&mut self, tick: &TickContext) -> anyhow::Result<TickSample>;
}

// ── Synthetic source ──────────────────────────────────────────────────────────

/// `[synthetic]` section of config.toml
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyntheticConfig {
    pub route_length_m: f64,
    pub lateral_amplitude_m: f64,
    pub position_noise_m: f64,
    pub accel_mean: [f64; 3],
    pub accel_std: [f64; 3],
    pub gyro_std: f64,
    pub mag_mean: [f64; 3],
    pub mag_std: f64,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            route_length_m: 10.0,
            lateral_amplitude_m: 2.0,
            position_noise_m: 0.1,
            accel_mean: [0.0, 0.0, 9.8],
            accel_std: [1.0, 1.0, 0.5],
            gyro_std: 0.1,
            mag_mean: [20.0, -10.0, 45.0],
            mag_std: 5.0,
        }
    }
}

type Axes = [Normal<f64>; 3];

pub struct SyntheticSource {
    cfg: SyntheticConfig,
    position_noise: Normal<f64>,
    accel: Axes,
    gyro: Axes,
    mag: Axes,
    rng: StdRng,
}

fn axes(mean: [f64; 3], std: [f64; 3]) -> Result<Axes, rand_distr::NormalError> {
    Ok([
        Normal::new(mean[0], std[0])?,
        Normal::new(mean[1], std[1])?,
        Normal::new(mean[2], std[2])?,
    ])
}

impl SyntheticSource {
    /// Fails when any configured standard deviation is negative or non-finite.
    pub fn new(cfg: SyntheticConfig, seed: Option<u64>) -> anyhow::Result<Self> {
        let rng = match seed {
            Some(s) => StdRng::seed_from_u64(s),
            None => StdRng::from_entropy(),
        };
        Ok(Self {
            position_noise: Normal::new(0.0, cfg.position_noise_m)?,
            accel: axes(cfg.accel_mean, cfg.accel_std)?,
            gyro: axes([0.0; 3], [cfg.gyro_std; 3])?,
            mag: axes(cfg.mag_mean, [cfg.mag_std; 3])?,
            cfg,
            rng,
        })
    }

    fn draw(dist: &Axes, rng: &mut StdRng) -> (f64, f64, f64) {
        (dist[0].sample(rng), dist[1].sample(rng), dist[2].sample(rng))
    }
}

impl TelemetrySource for SyntheticSource {
    fn sample(&mut self, tick: &TickContext) -> anyhow::Result<TickSample> {
        let p = tick.progress();
        let rng = &mut self.rng;

        let x = p * self.cfg.route_length_m + self.position_noise.sample(rng);
        let y = (std::f64::consts::TAU * p).sin() * self.cfg.lateral_amplitude_m
            + self.position_noise.sample(rng);

        let (ax, ay, az) = Self::draw(&self.accel, rng);
        let (gx, gy, gz) = Self::draw(&self.gyro, rng);
        let (mx, my, mz) = Self::draw(&self.mag, rng);

        Ok(TickSample {
            imu: SensorSnapshot::new()
                .with_sensor(ACCELEROMETER, ax, ay, az)
                .with_sensor(GYROSCOPE, gx, gy, gz)
                .with_sensor(MAGNETOMETER, mx, my, mz),
            robot: RobotSnapshot::at(x, y, p),
        })
    }
}
