//! injector.rs — sensor fault injection engine
//!
//! Holds the faults activated during the current run and applies them to each
//! tick's IMU snapshot:
//! 1. Skip inactive faults; retire expired ones on the spot (lazy expiry, no timers)
//! 2. Resolve the axis set (`all` → x, y, z) on the target sensor
//! 3. Transform each present reading according to the fault kind
//!
//! Packet loss never transforms data; it is consulted once per tick through
//! `should_drop_packet` before the snapshot reaches the monitor.

use std::f64::consts::TAU;

use chrono::Utc;
use fault_types::{FaultKind, FaultScenario, FaultType, SensorSnapshot};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use tokio::time::Instant;
use tracing::{debug, info};

use crate::audit::ActivationLog;

// ── Active fault ──────────────────────────────────────────────────────────────

/// Runtime instance of a scenario, created by `FaultInjector::activate`.
#[derive(Debug, Clone)]
pub struct ActiveFault {
    pub fault_id: String,
    pub scenario: FaultScenario,
    pub activated_at: Instant,
    active: bool,
    /// StuckValue only: the frozen reading. Seeded from the scenario's preset,
    /// otherwise captured on first application and never changed afterwards.
    frozen: Option<f64>,
}

impl ActiveFault {
    fn new(fault_id: String, scenario: &FaultScenario, activated_at: Instant) -> Self {
        let frozen = match scenario.kind {
            FaultKind::StuckValue { stuck_value } => stuck_value,
            _ => None,
        };
        Self {
            fault_id,
            scenario: scenario.clone(),
            activated_at,
            active: true,
            frozen,
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn fault_type(&self) -> FaultType {
        self.scenario.fault_type()
    }

    pub fn stuck_value(&self) -> Option<f64> {
        self.frozen
    }

    fn elapsed(&self, now: Instant) -> f64 {
        now.saturating_duration_since(self.activated_at).as_secs_f64()
    }

    fn is_expired(&self, now: Instant) -> bool {
        !self.scenario.is_permanent() && self.elapsed(now) > self.scenario.duration
    }

    /// Live = not deactivated and not past its duration at `now`.
    fn is_live(&self, now: Instant) -> bool {
        self.active && !self.is_expired(now)
    }

    /// Marks the fault inactive if it has run past its duration. Returns whether it is still live.
    fn retire_if_expired(&mut self, now: Instant) -> bool {
        if !self.active {
            return false;
        }
        if self.is_expired(now) {
            self.active = false;
            info!("⌛ Fault expired: {}", self.fault_id);
            return false;
        }
        true
    }

    fn transform(&mut self, value: f64, elapsed: f64, rng: &mut StdRng) -> f64 {
        match self.scenario.kind {
            FaultKind::StuckValue { .. } => *self.frozen.get_or_insert(value),
            FaultKind::AxisLoss => 0.0,
            FaultKind::BiasDrift { bias_rate } => value + bias_rate * elapsed,
            FaultKind::NoiseInjection { noise_level } => value + gaussian(noise_level, rng),
            FaultKind::ScaleError { scale_factor } => value * scale_factor,
            FaultKind::PeriodicGlitch { frequency, amplitude } => {
                value + amplitude * (TAU * frequency * elapsed).sin()
            }
            // max(min, min(max, v)): never panics, even on an inverted range
            FaultKind::Saturation { min_value, max_value } => {
                f64::max(min_value, f64::min(max_value, value))
            }
            FaultKind::PacketLoss { .. } => value,
        }
    }
}

fn gaussian(std_dev: f64, rng: &mut StdRng) -> f64 {
    match Normal::new(0.0, std_dev) {
        Ok(dist) => dist.sample(rng),
        Err(_) => 0.0,
    }
}

// ── Injector ──────────────────────────────────────────────────────────────────

pub struct FaultInjector {
    active_faults: Vec<ActiveFault>,
    history: ActivationLog,
    reset_at: Instant,
    activations: u64,
    rng: StdRng,
}

impl Default for FaultInjector {
    fn default() -> Self {
        Self::new()
    }
}

impl FaultInjector {
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_entropy())
    }

    /// Reproducible noise and packet-loss draws.
    pub fn with_seed(seed: u64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed))
    }

    fn with_rng(rng: StdRng) -> Self {
        Self {
            active_faults: Vec::new(),
            history: ActivationLog::new(),
            reset_at: Instant::now(),
            activations: 0,
            rng,
        }
    }

    /// Clear active faults and history. Called at the start of every run.
    pub fn reset(&mut self) {
        self.active_faults.clear();
        self.history.clear();
        self.reset_at = Instant::now();
        self.activations = 0;
    }

    /// Start applying `scenario` from now on. Returns the fresh fault id.
    pub fn activate(&mut self, scenario: &FaultScenario) -> String {
        let now = Instant::now();
        let activated_at = Utc::now();
        self.activations += 1;
        // id + instant + per-reset counter: unique even for same-instant re-activation
        let fault_id = format!(
            "{}_{}_{}",
            scenario.id,
            activated_at.timestamp_micros(),
            self.activations
        );
        let offset_s = now.saturating_duration_since(self.reset_at).as_secs_f64();

        self.active_faults.push(ActiveFault::new(fault_id.clone(), scenario, now));
        self.history.append(&fault_id, &scenario.id, scenario.fault_type(), activated_at, offset_s);

        info!("⚡ Activated fault: {} ({}) on {}.{}",
            scenario.name, scenario.fault_type(), scenario.target_sensor, scenario.target_axis.as_str());
        fault_id
    }

    /// No-op for unknown or already inactive ids.
    pub fn deactivate(&mut self, fault_id: &str) {
        if let Some(fault) = self.active_faults.iter_mut().find(|f| f.fault_id == fault_id) {
            if fault.active {
                fault.active = false;
                info!("✋ Deactivated fault: {fault_id}");
            }
        }
    }

    /// Return a copy of `snapshot` with every live fault applied. The input is never modified.
    pub fn apply_faults(&mut self, snapshot: &SensorSnapshot) -> SensorSnapshot {
        let mut out = snapshot.clone();
        if self.active_faults.is_empty() {
            return out;
        }
        let now = Instant::now();

        for fault in self.active_faults.iter_mut() {
            if !fault.retire_if_expired(now) {
                continue;
            }
            if matches!(fault.scenario.kind, FaultKind::PacketLoss { .. }) {
                continue;
            }
            let elapsed = fault.elapsed(now);
            for &axis in fault.scenario.target_axis.axes() {
                // Missing sensor or axis: nothing to corrupt this tick
                if let Some(value) = out.get_mut(&fault.scenario.target_sensor, axis) {
                    *value = fault.transform(*value, elapsed, &mut self.rng);
                }
            }
        }
        out
    }

    /// Whether this tick's sensor packet is lost.
    ///
    /// Every live packet-loss fault draws independently and the packet is dropped
    /// if any draw hits, i.e. `P(drop) = 1 - Π(1 - loss_rate_i)`.
    pub fn should_drop_packet(&mut self) -> bool {
        let now = Instant::now();
        let mut dropped = false;
        for fault in self.active_faults.iter_mut() {
            if !fault.retire_if_expired(now) {
                continue;
            }
            if let FaultKind::PacketLoss { loss_rate } = fault.scenario.kind {
                // gen::<f64>() is in [0, 1): rate 1.0 always drops, 0.0 never does
                if self.rng.gen::<f64>() < loss_rate {
                    dropped = true;
                }
            }
        }
        if dropped {
            debug!("packet dropped by packet-loss fault");
        }
        dropped
    }

    /// Faults that are neither deactivated nor expired right now.
    pub fn live_faults(&self) -> impl Iterator<Item = &ActiveFault> {
        let now = Instant::now();
        self.active_faults.iter().filter(move |f| f.is_live(now))
    }

    pub fn active_fault_count(&self) -> usize {
        self.live_faults().count()
    }

    /// Every fault activated since the last reset, live or not.
    pub fn faults(&self) -> &[ActiveFault] {
        &self.active_faults
    }

    pub fn get(&self, fault_id: &str) -> Option<&ActiveFault> {
        self.active_faults.iter().find(|f| f.fault_id == fault_id)
    }

    pub fn history(&self) -> &ActivationLog {
        &self.history
    }
}
