//! Clocked simulation engines that step a model and share its snapshots.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info};

use crate::devices::alarm::{AlarmKind, AlarmTransition};
use crate::devices::battery::{BatteryModel, BatterySummary};
use crate::devices::solar::{SolarModel, SolarSummary};
use crate::devices::{Model, Tick};

use super::clock::Clock;

/// How often the battery engine checks its alarm generator.
pub const ALARM_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Shortest period the tick task will run at; `interval` rejects zero.
const MIN_TICK_PERIOD: Duration = Duration::from_millis(1);

/// Engine driving the shared PV model.
pub type SolarEngine = Engine<SolarModel>;
/// Engine driving the battery model.
pub type BatteryEngine = Engine<BatteryModel>;

/// Runtime counters of an engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EngineStatus {
    pub device_type: &'static str,
    pub running: bool,
    pub tick_ms: u64,
    pub ticks: u64,
}

/// Owns one model, steps it on a fixed period, and keeps the latest
/// snapshot available to any number of readers.
///
/// Generic over `M: Model` for static dispatch. The model sits behind a
/// mutex that is only held for one step or one control call; readers take
/// the snapshot from a separate lock and never wait on a step.
pub struct Engine<M: Model> {
    model: Mutex<M>,
    latest: RwLock<M::Snapshot>,
    clock: Arc<dyn Clock>,
    tick_period: Duration,
    ticks: AtomicU64,
    running: AtomicBool,
}

impl<M: Model> Engine<M> {
    /// Creates an engine and runs the first step so a snapshot exists
    /// before any endpoint publishes.
    ///
    /// # Arguments
    ///
    /// * `model` - Model to drive
    /// * `clock` - Time source for every tick
    /// * `tick_period` - Step period; also the `dt` used to integrate energy
    pub fn new(mut model: M, clock: Arc<dyn Clock>, tick_period: Duration) -> Self {
        let tick = Tick::new(clock.now(), clock.monotonic_ms(), tick_period.as_secs_f64());
        model.step(&tick);
        let latest = RwLock::new(model.snapshot());
        Self {
            model: Mutex::new(model),
            latest,
            clock,
            tick_period,
            ticks: AtomicU64::new(1),
            running: AtomicBool::new(false),
        }
    }

    /// Executes one step at the clock's current time.
    pub fn tick(&self) {
        let tick = Tick::new(
            self.clock.now(),
            self.clock.monotonic_ms(),
            self.tick_period.as_secs_f64(),
        );
        let mut model = self.lock_model();
        model.step(&tick);
        self.store(&model);
        self.ticks.fetch_add(1, Ordering::Relaxed);
    }

    /// Copy of the latest snapshot.
    pub fn snapshot(&self) -> M::Snapshot {
        self.latest
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Runs `f` against the model and refreshes the snapshot so the change
    /// is visible at the next publish.
    pub fn with_model<R>(&self, f: impl FnOnce(&mut M) -> R) -> R {
        let mut model = self.lock_model();
        let result = f(&mut model);
        self.store(&model);
        result
    }

    /// Runtime counters.
    pub fn status(&self) -> EngineStatus {
        EngineStatus {
            device_type: self.lock_model().device_type(),
            running: self.running.load(Ordering::Relaxed),
            tick_ms: u64::try_from(self.tick_period.as_millis()).unwrap_or(u64::MAX),
            ticks: self.ticks.load(Ordering::Relaxed),
        }
    }

    /// The engine's clock.
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Steps the model every tick period until `shutdown` flips to `true`.
    ///
    /// Missed ticks are skipped rather than replayed in a burst.
    pub fn spawn(self: &Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            let device = engine.lock_model().device_type();
            let mut interval = time::interval(engine.tick_period.max(MIN_TICK_PERIOD));
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            // the first tick completes immediately and the constructor already stepped
            interval.tick().await;
            engine.running.store(true, Ordering::Relaxed);
            info!(device, period_ms = engine.tick_period.as_millis() as u64, "engine started");

            loop {
                tokio::select! {
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                    _ = interval.tick() => engine.tick(),
                }
            }

            engine.running.store(false, Ordering::Relaxed);
            info!(device, "engine stopped");
        })
    }

    fn lock_model(&self) -> MutexGuard<'_, M> {
        self.model.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn store(&self, model: &M) {
        *self.latest.write().unwrap_or_else(|e| e.into_inner()) = model.snapshot();
    }
}

impl Engine<SolarModel> {
    /// Clears the energy counters and runtime timers.
    pub fn reset(&self) {
        self.with_model(SolarModel::reset);
        info!("solar counters reset");
    }

    pub fn summary(&self) -> SolarSummary {
        self.lock_model().summary()
    }
}

impl Engine<BatteryModel> {
    /// Advances the alarm generator to the clock's monotonic time and logs
    /// any transition.
    pub fn tick_alarm(&self) -> Option<AlarmTransition> {
        let now_ms = self.clock.monotonic_ms();
        let transition = self.with_model(|m| m.update_alarm(now_ms));
        match transition {
            Some(AlarmTransition::Raised(kind)) => {
                info!(alarm = %kind, code = %format!("{:#06x}", kind.code()), "alarm raised");
            }
            Some(AlarmTransition::Cleared(kind)) => info!(alarm = %kind, "alarm cleared"),
            None => {}
        }
        transition
    }

    /// Polls the alarm generator every [`ALARM_POLL_INTERVAL`] until
    /// `shutdown` flips to `true`.
    pub fn spawn_alarm(self: &Arc<Self>, mut shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = time::interval(ALARM_POLL_INTERVAL);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                    _ = interval.tick() => {
                        engine.tick_alarm();
                    }
                }
            }
            debug!("alarm timer stopped");
        })
    }

    pub fn set_soc(&self, soc_pct: f64) {
        self.with_model(|m| m.set_soc(soc_pct));
        info!(soc_pct, "battery SOC overridden");
    }

    /// Pins the site load; `None` returns to the daily profile.
    pub fn set_load_override(&self, kw: Option<f64>) {
        self.with_model(|m| m.set_load_override(kw));
        info!(load_kw = ?kw, "load override changed");
    }

    pub fn set_peak_shaving(&self, enabled: bool) {
        self.with_model(|m| m.set_peak_shaving(enabled));
        info!(enabled, "peak shaving toggled");
    }

    pub fn set_peak_threshold(&self, kw: f64) {
        self.with_model(|m| m.set_peak_threshold(kw));
        info!(threshold_kw = kw, "peak threshold changed");
    }

    pub fn set_peak_shaving_power(&self, kw: f64) {
        self.with_model(|m| m.set_peak_shaving_power(kw));
        info!(shaving_power_kw = kw, "peak shaving power changed");
    }

    /// Raises `kind` now.
    pub fn trigger_alarm(&self, kind: AlarmKind) {
        let now_ms = self.clock.monotonic_ms();
        self.with_model(|m| m.trigger_alarm(kind, now_ms));
        info!(alarm = %kind, "alarm raised manually");
    }

    /// Clears the active alarm, returning its kind.
    pub fn clear_alarm(&self) -> Option<AlarmKind> {
        let cleared = self.with_model(BatteryModel::clear_alarm);
        if let Some(kind) = cleared {
            info!(alarm = %kind, "alarm cleared manually");
        }
        cleared
    }

    /// Restores the initial rack state.
    pub fn reset(&self) {
        let now_ms = self.clock.monotonic_ms();
        self.with_model(|m| m.reset(now_ms));
        info!("battery reset");
    }

    pub fn summary(&self) -> BatterySummary {
        self.lock_model().summary()
    }
}
