//! Charging-phase state machine.
//!
//! [`ChargeCycle`] owns the active phase and everything a phase transition
//! looks at: phase-entry time, smoothed battery amps and volts, the adaptive
//! acceptance duration, the alternator capacity sample, the shunt flag and
//! the run summary. [`ChargeCycle::step`] runs once per controller step and
//! tells the caller what to do with the field through a [`FieldAction`].
//!
//! # Phase flow
//!
//! ```text
//! Unknown/Disabled → WarmUp → Ramping → [DetermineCapacity] → Bulk
//!   → Acceptance → [Overcharge] → Float ⇄ PostFloat
//!                                   ↘ Ramping (battery discharged)
//! ```
//!
//! `ForcedFloat`, `ForcedShutdown` and `Equalize` are entered from outside
//! (feature inputs or commands). `Faulted` is terminal.

use log::{debug, info};

use crate::config::{AltCapacity, Policy, SystemConfig, TachFloor};
use crate::phase::ChargingPhase;
use crate::pid::{FIELD_PWM_MAX, PWM_RAMP_RATE_MS, RAMP_DURATION_MS};
use crate::profile::{AcceptExit, ChargeProfile};
use crate::tach::MAX_TACH_PWM;
use crate::targets::CapacitySample;
use crate::traits::Measurements;

/// Acceptance lasts this many times the bulk time in adaptive mode.
pub const ADPT_ACPT_TIME_FACTOR: u64 = 5;
/// Adaptive acceptance duration before any bulk phase was timed, ms.
pub const DEFAULT_ADAPTIVE_ACCEPT_MS: u64 = 4 * 3_600_000;

/// Amps decay window, in controller steps.
pub const AMPS_PERSISTENCE_FACTOR: f32 = 256.0;
/// Volts decay window, in controller steps.
pub const VOLTS_PERSISTENCE_FACTOR: f32 = 300.0;

/// Alternator amps at or above this prove the shunt is working.
pub const USE_AMPS_THRESHOLD: f32 = 5.0;

/// Length of a capacity sampling run, ms.
pub const SAMPLE_ALT_CAP_DURATION_MS: u64 = 10_000;
/// Rest in bulk between sampling runs, ms.
pub const SAMPLE_ALT_CAP_REST_MS: u64 = 30_000;
/// Re-sample once RPM rises this far above the sampled RPM.
pub const SAMPLE_ALT_CAP_RPM_THRESH: u32 = 250;
/// Re-sample once amps exceed the sampled amps by this ratio.
pub const SAMPLE_ALT_CAP_AMPS_RATIO: f32 = 1.05;

/// Run summary accumulation interval, ms.
pub const ACCUMULATE_SAMPLING_MS: u64 = 1_000;

/// What the controller should do with the field after a phase step.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FieldAction {
    /// Apply the arbitrated correction.
    Adjust,
    /// Leave the field alone this step.
    Hold,
    /// Set the working PWM to this value with no correction.
    Force(i32),
    /// Faulted: touch nothing.
    Frozen,
}

// ============================================================================
// Persistence filter
// ============================================================================

/// Fast-rise, slow-decay smoothing of battery amps and volts.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Persistence {
    /// Smoothed battery amps
    pub amps: f32,
    /// Smoothed battery volts
    pub volts: f32,
}

impl Persistence {
    /// One filter step. Discharge current never pulls the amps down.
    pub fn update(&mut self, bat_amps: f32, bat_volts: f32) {
        if bat_amps >= self.amps {
            self.amps = bat_amps;
        } else if bat_amps > 0.0 {
            self.amps = (self.amps * (AMPS_PERSISTENCE_FACTOR - 1.0) + bat_amps) / AMPS_PERSISTENCE_FACTOR;
        }

        if bat_volts >= self.volts {
            self.volts = bat_volts;
        } else {
            self.volts = (self.volts * (VOLTS_PERSISTENCE_FACTOR - 1.0) + bat_volts) / VOLTS_PERSISTENCE_FACTOR;
        }
    }

    /// Follow the measurement exactly.
    pub fn track(&mut self, bat_amps: f32, bat_volts: f32) {
        self.amps = bat_amps;
        self.volts = bat_volts;
    }
}

// ============================================================================
// Run summary
// ============================================================================

/// Totals for the current charge cycle, accumulated once per second while
/// the alternator is running.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RunSummary {
    /// Alternator amp-seconds
    pub alt_amp_secs: i64,
    /// Alternator watt-seconds
    pub alt_watt_secs: i64,
    /// Battery amp-seconds (negative when discharging)
    pub bat_amp_secs: i64,
    /// Run time of this cycle, ms
    pub run_time_ms: u64,
    started_ms: u64,
    updated_ms: u64,
}

impl RunSummary {
    /// Zero all totals and restart the clock.
    pub fn reset(&mut self, now_ms: u64) {
        *self = Self {
            started_ms: now_ms,
            updated_ms: now_ms,
            ..Self::default()
        };
    }

    /// Add one sample if a second has passed since the last one.
    pub fn accumulate(&mut self, now_ms: u64, phase: ChargingPhase, m: &Measurements) {
        if now_ms.saturating_sub(self.updated_ms) < ACCUMULATE_SAMPLING_MS {
            return;
        }
        self.updated_ms = now_ms;
        if phase.is_running() {
            self.run_time_ms = now_ms.saturating_sub(self.started_ms);
            self.alt_amp_secs = self.alt_amp_secs.saturating_add(m.alt_amps as i64);
            self.alt_watt_secs = self.alt_watt_secs.saturating_add(m.alt_watts as i64);
            self.bat_amp_secs = self.bat_amp_secs.saturating_add(m.bat_amps as i64);
        }
    }

    /// Alternator amp-hours
    pub fn alt_amp_hours(&self) -> i64 {
        self.alt_amp_secs / 3600
    }

    /// Alternator watt-hours
    pub fn alt_watt_hours(&self) -> i64 {
        self.alt_watt_secs / 3600
    }
}

// ============================================================================
// Charge cycle
// ============================================================================

/// Inputs to one phase step.
#[derive(Clone, Copy, Debug)]
pub struct StepInputs<'a> {
    /// Current time, ms
    pub now_ms: u64,
    /// This cycle's measurements
    pub measurements: &'a Measurements,
    /// Battery within the at-target window
    pub at_target_volts: bool,
    /// Alternator amps at or over the cap (false when unbounded)
    pub over_amps: bool,
    /// Alternator watts at or over the cap (false when unbounded)
    pub over_watts: bool,
    /// Working PWM
    pub pwm: i32,
    /// PWM ceiling from the targets
    pub pwm_limit: i32,
    /// Time of the last physical PWM write, ms
    pub last_change_ms: u64,
    /// Engine RPM
    pub rpm: u32,
    /// Active profile
    pub profile: &'a ChargeProfile,
    /// System tuning
    pub system: &'a SystemConfig,
    /// Start-up policy
    pub policy: Policy,
}

/// The charging state machine.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ChargeCycle {
    phase: ChargingPhase,
    entered_ms: u64,
    ramp_entered_ms: u64,
    adaptive_accept_ms: u64,
    capacity: CapacitySample,
    persistence: Persistence,
    shunt_measured: bool,
    entry_bat_amp_secs: i64,
    summary: RunSummary,
}

impl Default for ChargeCycle {
    fn default() -> Self {
        Self::new()
    }
}

impl ChargeCycle {
    /// Starts in `Unknown` with nothing measured.
    pub fn new() -> Self {
        Self {
            phase: ChargingPhase::Unknown,
            entered_ms: 0,
            ramp_entered_ms: 0,
            adaptive_accept_ms: DEFAULT_ADAPTIVE_ACCEPT_MS,
            capacity: CapacitySample::default(),
            persistence: Persistence::default(),
            shunt_measured: false,
            entry_bat_amp_secs: 0,
            summary: RunSummary::default(),
        }
    }

    /// Active phase
    #[inline]
    pub fn phase(&self) -> ChargingPhase {
        self.phase
    }

    /// When the active phase was entered, ms
    pub fn entered_ms(&self) -> u64 {
        self.entered_ms
    }

    /// Time spent in the active phase, ms
    pub fn elapsed_ms(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.entered_ms)
    }

    /// Acceptance duration used in adaptive mode, ms
    pub fn adaptive_accept_ms(&self) -> u64 {
        self.adaptive_accept_ms
    }

    /// Alternator capacity sample
    pub fn capacity(&self) -> CapacitySample {
        self.capacity
    }

    /// Smoothed battery amps and volts
    pub fn persistence(&self) -> Persistence {
        self.persistence
    }

    /// The alternator shunt has shown real current
    pub fn shunt_measured(&self) -> bool {
        self.shunt_measured
    }

    /// Current cycle totals
    pub fn summary(&self) -> &RunSummary {
        &self.summary
    }

    /// Battery amp-hours since the active phase was entered.
    pub fn amp_hours_since_entry(&self) -> i64 {
        self.summary.bat_amp_secs.saturating_sub(self.entry_bat_amp_secs) / 3600
    }

    /// Change phase. Asking for the active phase does nothing.
    ///
    /// Returns `true` if the phase changed.
    pub fn set_phase(&mut self, next: ChargingPhase, now_ms: u64, alt_amps: f32) -> bool {
        if next == self.phase {
            return false;
        }
        info!("phase {} -> {}", self.phase, next);

        if next == ChargingPhase::Ramping {
            self.ramp_entered_ms = now_ms;
        }
        self.phase = next;
        self.entered_ms = now_ms;
        if alt_amps > -USE_AMPS_THRESHOLD && alt_amps < USE_AMPS_THRESHOLD {
            self.shunt_measured = false;
        }
        self.entry_bat_amp_secs = self.summary.bat_amp_secs;
        true
    }

    /// Latch the shunt flag once real current is seen.
    pub fn note_shunt(&mut self, alt_amps: f32) {
        if alt_amps >= USE_AMPS_THRESHOLD {
            self.shunt_measured = true;
        }
    }

    /// Restart the run summary.
    pub fn reset_summary(&mut self, now_ms: u64) {
        self.summary.reset(now_ms);
    }

    /// Per-second run summary update.
    pub fn accumulate(&mut self, now_ms: u64, m: &Measurements) {
        self.summary.accumulate(now_ms, self.phase, m);
    }

    /// One phase step at the controller cadence: update the persistence
    /// filter, then apply the active phase's transition rules.
    pub fn step(&mut self, i: &StepInputs<'_>) -> FieldAction {
        let m = i.measurements;
        self.persistence.update(m.bat_amps, m.bat_volts);

        match self.phase {
            ChargingPhase::WarmUp => self.warm_up(i),
            ChargingPhase::Ramping => self.ramping(i),
            ChargingPhase::DetermineCapacity => self.determine_capacity(i),
            ChargingPhase::Bulk => self.bulk(i),
            ChargingPhase::Acceptance => self.acceptance(i),
            ChargingPhase::Overcharge => self.overcharge(i),
            ChargingPhase::Float => self.float(i),
            ChargingPhase::PostFloat => self.post_float(i),
            ChargingPhase::Equalize => self.equalize(i),
            ChargingPhase::ForcedFloat => FieldAction::Adjust,
            ChargingPhase::ForcedShutdown | ChargingPhase::Unknown | ChargingPhase::Disabled => {
                FieldAction::Force(0)
            }
            ChargingPhase::Faulted => FieldAction::Frozen,
        }
    }

    fn warm_up(&mut self, i: &StepInputs<'_>) -> FieldAction {
        let floor = match i.system.tach_floor {
            TachFloor::Pwm(n) if i.policy.tach_mode && n > 0 => i32::from(n.min(MAX_TACH_PWM)),
            _ => 0,
        };
        let warm = self.elapsed_ms(i.now_ms) > u64::from(i.system.warmup_secs) * 1000;
        let waiting_for_rpm = floor > 0 && i.rpm == 0;
        if warm && !waiting_for_rpm {
            self.set_phase(ChargingPhase::Ramping, i.now_ms, i.measurements.alt_amps);
        }
        FieldAction::Force(floor)
    }

    fn ramping(&mut self, i: &StepInputs<'_>) -> FieldAction {
        let m = i.measurements;
        self.persistence.track(m.bat_amps, m.bat_volts);
        self.summary.reset(i.now_ms);
        self.capacity = CapacitySample::from_config(i.system.alt_capacity);

        let done = i.pwm >= i.pwm_limit
            || i.at_target_volts
            || i.over_amps
            || i.over_watts
            || self.elapsed_ms(i.now_ms) >= RAMP_DURATION_MS;
        if done {
            let next = if i.system.alt_capacity == AltCapacity::Auto {
                ChargingPhase::DetermineCapacity
            } else {
                ChargingPhase::Bulk
            };
            self.set_phase(next, i.now_ms, m.alt_amps);
            FieldAction::Adjust
        } else if i.now_ms.saturating_sub(i.last_change_ms) <= PWM_RAMP_RATE_MS {
            FieldAction::Hold
        } else {
            FieldAction::Adjust
        }
    }

    fn determine_capacity(&mut self, i: &StepInputs<'_>) -> FieldAction {
        let m = i.measurements;
        let done = i.system.alt_capacity != AltCapacity::Auto
            || i.pwm == FIELD_PWM_MAX
            || i.at_target_volts
            || i.rpm == 0
            || !self.shunt_measured
            || self.elapsed_ms(i.now_ms) >= SAMPLE_ALT_CAP_DURATION_MS;
        if done {
            self.set_phase(ChargingPhase::Bulk, i.now_ms, m.alt_amps);
        }
        if m.alt_amps > self.capacity.amps {
            self.capacity = CapacitySample {
                amps: m.alt_amps,
                rpm: i.rpm,
            };
            debug!("capacity sample {} A at {} rpm", m.alt_amps, i.rpm);
        }
        FieldAction::Adjust
    }

    fn bulk(&mut self, i: &StepInputs<'_>) -> FieldAction {
        let m = i.measurements;
        if i.at_target_volts {
            self.adaptive_accept_ms = self.elapsed_ms(i.now_ms).saturating_mul(ADPT_ACPT_TIME_FACTOR);
            self.set_phase(ChargingPhase::Acceptance, i.now_ms, m.alt_amps);
        }
        self.persistence.amps = m.bat_amps;

        let in_ramp_window = i.now_ms.saturating_sub(self.ramp_entered_ms) <= RAMP_DURATION_MS;
        if in_ramp_window && i.now_ms.saturating_sub(i.last_change_ms) <= PWM_RAMP_RATE_MS {
            return FieldAction::Hold;
        }

        if i.system.alt_capacity != AltCapacity::Auto
            || self.elapsed_ms(i.now_ms) <= SAMPLE_ALT_CAP_REST_MS
        {
            return FieldAction::Adjust;
        }
        if i.rpm > self.capacity.rpm.saturating_add(SAMPLE_ALT_CAP_RPM_THRESH)
            || m.alt_amps > self.capacity.amps * SAMPLE_ALT_CAP_AMPS_RATIO
        {
            self.set_phase(ChargingPhase::DetermineCapacity, i.now_ms, m.alt_amps);
        }
        FieldAction::Adjust
    }

    fn acceptance(&mut self, i: &StepInputs<'_>) -> FieldAction {
        let p = i.profile;
        let elapsed = self.elapsed_ms(i.now_ms);
        let duration = u64::from(p.accept_duration_ms);

        let timed_out = duration > 0 && elapsed >= duration;
        let (adaptive, by_amps, no_exit) = match p.accept_exit {
            AcceptExit::Amps(a) if a > 0.0 => {
                let low = self.shunt_measured
                    && i.at_target_volts
                    && self.persistence.amps <= a * i.system.amp_mult;
                (false, low, false)
            }
            AcceptExit::Amps(a) if a == 0.0 => (false, false, true),
            AcceptExit::Disabled => (false, false, true),
            // negative amps select the adaptive exit
            AcceptExit::Adaptive | AcceptExit::Amps(_) => (elapsed >= self.adaptive_accept_ms, false, false),
        };

        if timed_out || adaptive || by_amps || (duration == 0 && no_exit) {
            let next = match p.overcharge {
                Some(oc) if oc.amps != 0.0 => ChargingPhase::Overcharge,
                _ => ChargingPhase::Float,
            };
            self.set_phase(next, i.now_ms, i.measurements.alt_amps);
        }
        FieldAction::Adjust
    }

    fn overcharge(&mut self, i: &StepInputs<'_>) -> FieldAction {
        let done = match i.profile.overcharge {
            Some(oc) => {
                self.elapsed_ms(i.now_ms) >= u64::from(oc.duration_ms)
                    || oc.amps == 0.0
                    || oc.volts == 0.0
                    || i.at_target_volts
            }
            None => true,
        };
        if done {
            self.set_phase(ChargingPhase::Float, i.now_ms, i.measurements.alt_amps);
        }
        FieldAction::Adjust
    }

    fn float(&mut self, i: &StepInputs<'_>) -> FieldAction {
        let p = i.profile;
        let m = i.measurements;
        let mut action = FieldAction::Adjust;

        let duration = u64::from(p.float_duration_ms);
        if duration != 0 && self.elapsed_ms(i.now_ms) >= duration {
            self.set_phase(ChargingPhase::PostFloat, i.now_ms, m.alt_amps);
            action = FieldAction::Force(0);
        }

        let vm = i.system.volt_mult;
        let am = i.system.amp_mult;
        let low_volts = nonzero(p.float_to_bulk_volts).is_some_and(|v| self.persistence.volts <= v * vm);
        let low_amps = nonzero(p.float_to_bulk_amps).is_some_and(|a| self.persistence.amps <= a * am);
        let drawn = nonzero(p.float_to_bulk_ah).is_some_and(|ah| self.amp_hours_since_entry() as f32 <= ah * am);
        if low_volts || (self.shunt_measured && (low_amps || drawn)) {
            self.set_phase(ChargingPhase::Ramping, i.now_ms, m.alt_amps);
        }
        action
    }

    fn post_float(&mut self, i: &StepInputs<'_>) -> FieldAction {
        let p = i.profile;
        let m = i.measurements;

        let duration = u64::from(p.post_float_duration_ms);
        if duration != 0 && self.elapsed_ms(i.now_ms) >= duration {
            self.set_phase(ChargingPhase::Float, i.now_ms, m.alt_amps);
            return FieldAction::Adjust;
        }

        let low_volts = nonzero(p.post_float_to_bulk_volts)
            .is_some_and(|v| self.persistence.volts < v * i.system.volt_mult);
        let drawn = nonzero(p.post_float_to_bulk_ah).is_some_and(|ah| {
            self.shunt_measured && self.amp_hours_since_entry() as f32 <= ah * i.system.amp_mult
        });
        if low_volts || drawn {
            self.set_phase(ChargingPhase::Ramping, i.now_ms, m.alt_amps);
            return FieldAction::Adjust;
        }
        FieldAction::Force(0)
    }

    fn equalize(&mut self, i: &StepInputs<'_>) -> FieldAction {
        let p = i.profile;
        let m = i.measurements;
        let timed_out = self.elapsed_ms(i.now_ms) >= u64::from(p.equalize_duration_ms);
        let done_amps = nonzero(p.equalize_exit_amps).is_some_and(|a| {
            self.shunt_measured && i.at_target_volts && m.bat_amps <= a * i.system.amp_mult
        });
        if timed_out || done_amps {
            self.set_phase(ChargingPhase::Float, i.now_ms, m.alt_amps);
        }
        FieldAction::Adjust
    }
}

fn nonzero(v: Option<f32>) -> Option<f32> {
    v.filter(|x| *x != 0.0)
}
