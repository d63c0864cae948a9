//! The regulator aggregate that ties everything together.
//!
//! This module provides [`Regulator`], which owns every piece of mutable
//! control state: the charge cycle, the field-drive controller, the
//! tachometer, the current targets and the fault record. One call to
//! [`Regulator::tick`] runs one control iteration.
//!
//! # Overview
//!
//! Each tick:
//! - Holds the field at zero if a fault was recorded
//! - Skips the iteration while the sensors refresh
//! - Updates RPM, the charge-temperature window and the targets
//! - Detects missing sensors and runs the fault checks
//! - Runs the field drive: load dump, PID, phase transitions, PWM write
//! - Leaves the idle state once enabled, and accumulates the run summary
//!
//! # Example
//!
//! ```rust
//! use alt_regulator::{ChargingPhase, Config, Regulator, TickOutcome};
//! use alt_regulator::hal::{MockField, MockPulses, MockSensors};
//!
//! let mut regulator = Regulator::new(MockField::new(), Config::default());
//! let sensors = MockSensors::new().with_bat_volts(12.4);
//! let pulses = MockPulses::new();
//!
//! // Main loop: call tick() as fast as the sensors allow
//! for t in 0..20 {
//!     let outcome = regulator.tick(&sensors, &pulses, t * 50).unwrap();
//!     assert_eq!(outcome, TickOutcome::Ran);
//! }
//! assert_eq!(regulator.phase(), ChargingPhase::WarmUp);
//!
//! let state = regulator.state();
//! println!("{} at duty {}", state.phase, state.duty);
//! ```
//!
//! # Fault Handling
//!
//! A fault parks the field at zero until [`Regulator::reset`]:
//!
//! ```rust
//! use alt_regulator::{Config, Regulator, TickOutcome};
//! use alt_regulator::hal::{MockField, MockPulses, MockSensors};
//!
//! let mut regulator = Regulator::new(MockField::new(), Config::default());
//! let hot = MockSensors::new().with_bat_volts(12.6).with_fet_temp(Some(85));
//! let pulses = MockPulses::new();
//!
//! let TickOutcome::Faulted(record) = regulator.tick(&hot, &pulses, 0).unwrap() else {
//!     panic!("expected a fault");
//! };
//! assert_eq!(record.code.code(), 41);
//! assert!(!record.restart_permitted());
//!
//! regulator.reset().unwrap();
//! assert!(regulator.fault().is_none());
//! ```

use log::{error, warn};

use crate::charging::{ChargeCycle, FieldAction, Persistence, RunSummary, StepInputs};
use crate::config::{Config, ConfigError, Policy, RequiredSensors};
use crate::fault::{self, FaultCode, FaultContext, FaultRecord};
use crate::phase::{ChargingPhase, PhaseSet};
use crate::pid::{ControllerState, Errors, LoadDump, FIELD_PWM_MIN, LOAD_DUMP_VOLTS, PWM_CHANGE_RATE_MS};
use crate::profile::ChargeProfile;
use crate::tach::Tachometer;
use crate::targets::{self, CapacitySample, ControlTargets, TargetInputs};
use crate::traits::{FieldDriver, Measurements, PulseSource, SensorSource, SensorStatus};

/// Phases left for Float when the battery is outside its charge window.
const CHARGE_TEMP_GUARDED: PhaseSet = PhaseSet::of(&[
    ChargingPhase::Ramping,
    ChargingPhase::DetermineCapacity,
    ChargingPhase::Bulk,
    ChargingPhase::Acceptance,
    ChargingPhase::Overcharge,
    ChargingPhase::Equalize,
]);

/// Phases a command may force.
const FORCEABLE: PhaseSet = PhaseSet::of(&[
    ChargingPhase::Bulk,
    ChargingPhase::Acceptance,
    ChargingPhase::Overcharge,
    ChargingPhase::Float,
    ChargingPhase::PostFloat,
    ChargingPhase::Equalize,
]);

/// Result of one [`Regulator::tick`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TickOutcome {
    /// Sensors were refreshing; nothing was done.
    Skipped,
    /// A control iteration ran.
    Ran,
    /// The regulator is faulted and the field is held at zero.
    Faulted(FaultRecord),
}

/// Why [`Regulator::force_phase`] refused a request.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ForceRejected {
    /// A fault is recorded.
    Faulted,
    /// The battery management system holds the field off.
    Shutdown,
    /// Only charge phases may be forced.
    NotAllowed(ChargingPhase),
    /// Lithium batteries are never equalized.
    Lithium,
}

/// Levels of the external feature inputs, sampled by the caller.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FeatureInputs {
    /// Battery management asks for the field to be switched off
    pub bms_shutdown: bool,
    /// Hold float regardless of the charge cycle
    pub force_float: bool,
    /// Request an equalize cycle
    pub equalize: bool,
}

/// Full state snapshot for telemetry and displays.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RegulatorState {
    /// Active phase
    pub phase: ChargingPhase,
    /// Field duty last computed, 0..=255
    pub duty: u8,
    /// Targets of the last iteration
    pub targets: ControlTargets,
    /// Measurements of the last iteration
    pub measurements: Measurements,
    /// Engine RPM
    pub rpm: u32,
    /// Tach-sync PWM floor, once known
    pub tach_threshold: Option<u8>,
    /// Smoothed battery amps and volts
    pub persistence: Persistence,
    /// Alternator capacity sample
    pub capacity: CapacitySample,
    /// Adaptive acceptance duration, ms
    pub adaptive_accept_ms: u64,
    /// Alternator shunt seen working
    pub shunt_measured: bool,
    /// Required sensors found missing
    pub missing: RequiredSensors,
    /// Overtemp pull-back factor
    pub ot_factor: f32,
    /// Run totals
    pub summary: RunSummary,
    /// Recorded fault, if any
    pub fault: Option<FaultRecord>,
    /// Regulator enabled by the host
    pub enabled: bool,
}

/// Alternator field regulator.
///
/// # Type Parameter
///
/// - `F`: The field driver implementation ([`FieldDriver`] trait)
///
/// # Thread Safety
///
/// The regulator is not thread-safe. Only the stator pulse capture is
/// shared with an interrupt; everything else is driven from one loop.
pub struct Regulator<F: FieldDriver> {
    field: F,
    config: Config,
    enabled: bool,
    cycle: ChargeCycle,
    ctl: ControllerState,
    tach: Tachometer,
    targets: ControlTargets,
    measurements: Measurements,
    volts_error: f32,
    missing: RequiredSensors,
    features: FeatureInputs,
    fault: Option<FaultRecord>,
}

impl<F: FieldDriver> Regulator<F> {
    /// Create a regulator. It starts in `Unknown`, enabled, with the field off.
    pub fn new(field: F, config: Config) -> Self {
        let tach = Tachometer::new(config.system.tach_floor);
        Self {
            field,
            config,
            enabled: true,
            cycle: ChargeCycle::new(),
            ctl: ControllerState::new(),
            tach,
            targets: ControlTargets::OFF,
            measurements: Measurements::default(),
            volts_error: 0.0,
            missing: RequiredSensors::NONE,
            features: FeatureInputs::default(),
            fault: None,
        }
    }

    /// Run one control iteration.
    pub fn tick(
        &mut self,
        sensors: &impl SensorSource,
        pulses: &impl PulseSource,
        now_ms: u64,
    ) -> Result<TickOutcome, F::Error> {
        if let Some(record) = self.fault {
            self.ctl.pwm = FIELD_PWM_MIN;
            self.field.disable()?;
            return Ok(TickOutcome::Faulted(record));
        }

        match sensors.status() {
            SensorStatus::Ready => {}
            SensorStatus::Refreshing => return Ok(TickOutcome::Skipped),
            SensorStatus::BusError(monitor, n) => return self.trip(FaultCode::Bus(monitor, n), now_ms),
        }

        let m = sensors.snapshot();
        self.measurements = m;
        self.tach.update(pulses, now_ms, self.ctl.pwm, &self.config.system);
        self.cycle.note_shunt(m.alt_amps);

        let Some(profile) = self.config.profiles.active().cloned() else {
            return self.trip(FaultCode::ProfileMissing, now_ms);
        };

        if !self.enabled && !matches!(self.cycle.phase(), ChargingPhase::Disabled) {
            self.cycle.set_phase(ChargingPhase::Disabled, now_ms, m.alt_amps);
        }

        if let Some(t) = m.bat_temp {
            let outside = t <= profile.min_charge_temp_c || t >= profile.max_charge_temp_c;
            if outside && CHARGE_TEMP_GUARDED.contains(self.cycle.phase()) {
                warn!("battery at {} C, outside charge window", t);
                self.cycle.set_phase(ChargingPhase::Float, now_ms, m.alt_amps);
            }
        }

        self.targets = targets::calculate(&TargetInputs {
            phase: self.cycle.phase(),
            profile: &profile,
            system: &self.config.system,
            policy: self.config.policy,
            bat_temp: m.bat_temp,
            alt_temp: m.alt_temp,
            rpm: self.tach.rpm(),
            tach_threshold: self.tach.threshold(),
            capacity: self.cycle.capacity(),
            shunt_measured: self.cycle.shunt_measured(),
            missing: self.missing,
        });

        let missing = fault::detect_missing_sensors(
            self.cycle.phase(),
            &m,
            self.config.system.required_sensors,
            self.cycle.shunt_measured(),
            self.missing,
        );
        let newly = missing.bits() & !self.missing.bits();
        self.missing = missing;
        if newly & RequiredSensors::BAT_TEMP.bits() != 0 {
            warn!("battery temperature sensor missing");
            self.cycle.set_phase(ChargingPhase::ForcedFloat, now_ms, m.alt_amps);
        }

        let found = fault::check(&FaultContext {
            phase: self.cycle.phase(),
            measurements: &m,
            pwm: self.ctl.pwm,
            system: &self.config.system,
            profile_index: self.config.profiles.selected,
            missing: self.missing,
            shunt_measured: self.cycle.shunt_measured(),
        });
        if let Some(code) = found {
            return self.trip(code, now_ms);
        }

        self.drive(&m, &profile, now_ms)?;

        if self.enabled && matches!(self.cycle.phase(), ChargingPhase::Unknown | ChargingPhase::Disabled) {
            self.ctl.pwm = FIELD_PWM_MIN;
            self.cycle.set_phase(ChargingPhase::WarmUp, now_ms, m.alt_amps);
            self.apply(now_ms)?;
            self.cycle.reset_summary(now_ms);
        }

        self.cycle.accumulate(now_ms, &m);
        Ok(TickOutcome::Ran)
    }

    /// Field drive: load dump, PID, phase step and the PWM write.
    fn drive(&mut self, m: &Measurements, profile: &ChargeProfile, now_ms: u64) -> Result<(), F::Error> {
        let system = &self.config.system;
        let vm = system.volt_mult;
        let errors = Errors::compute(m, &self.targets, system.alt_temp_setpoint_c, self.ctl.ot_factor);
        self.volts_error = errors.volts;
        let at_target = errors.at_target_volts(vm);

        match errors.load_dump(vm) {
            LoadDump::None => {}
            dump => {
                self.apply(now_ms)?;
                if dump == LoadDump::Severe {
                    if self.targets.volts > 0.0 {
                        warn!("load dump: {} V over target", errors.volts);
                    }
                    self.ctl.ld3_latched = true;
                }
            }
        }

        if !self.ctl.due(now_ms, PWM_CHANGE_RATE_MS) {
            return Ok(());
        }

        let system = &self.config.system;
        let candidates = self.ctl.candidates(m, &errors, vm);
        let thermal = self.ctl.thermal(m.alt_temp, system.alt_temp_setpoint_c);
        if thermal.pulled_back {
            warn!("alternator over setpoint, pull-back now {}", self.ctl.ot_factor);
        }
        if thermal.tripped {
            warn!("alternator overtemp, field cut to {}", self.ctl.pwm);
        }
        let correction = candidates.arbitrate(self.ctl.aot_latched);

        let action = self.cycle.step(&StepInputs {
            now_ms,
            measurements: m,
            at_target_volts: at_target,
            over_amps: errors.amps.is_some_and(|e| e >= 0.0),
            over_watts: errors.watts.is_some_and(|e| e >= 0.0),
            pwm: self.ctl.pwm,
            pwm_limit: self.targets.pwm_limit,
            last_change_ms: self.ctl.last_change_ms,
            rpm: self.tach.rpm(),
            profile,
            system,
            policy: self.config.policy,
        });

        // Tach floor holds in every phase that may drive the field
        let floor = match self.tach.threshold() {
            Some(t) if self.config.policy.tach_mode && !self.cycle.phase().field_disabled() => Some(t),
            _ => None,
        };
        match action {
            FieldAction::Adjust => self.ctl.adjust(correction, floor, self.targets.pwm_limit),
            FieldAction::Force(pwm) => self.ctl.pwm = floor.map_or(pwm, |f| pwm.max(i32::from(f))),
            FieldAction::Hold | FieldAction::Frozen => return Ok(()),
        }

        if !self.ctl.ld3_latched {
            self.apply(now_ms)?;
        }
        self.ctl.ld3_latched = false;
        Ok(())
    }

    /// Write the working PWM to the field. Over the load-dump threshold
    /// only the physical output drops, to the tach floor or zero.
    fn apply(&mut self, now_ms: u64) -> Result<(), F::Error> {
        let disabled = self.cycle.phase().field_disabled();
        if disabled {
            self.ctl.pwm = FIELD_PWM_MIN;
        }
        if self.volts_error <= LOAD_DUMP_VOLTS * self.config.system.volt_mult {
            self.field.set_duty(self.ctl.duty())?;
            self.ctl.last_change_ms = now_ms;
        } else {
            let floor = match self.tach.threshold() {
                Some(t) if self.config.policy.tach_mode && !disabled => t,
                _ => 0,
            };
            self.field.set_duty(floor)?;
        }
        Ok(())
    }

    /// Record a fault and switch the field off.
    fn trip(&mut self, code: FaultCode, now_ms: u64) -> Result<TickOutcome, F::Error> {
        let record = FaultRecord {
            code,
            phase: self.cycle.phase(),
            at_ms: now_ms,
        };
        error!("fault {} in {} at {} ms", code.code(), record.phase, now_ms);
        self.cycle
            .set_phase(ChargingPhase::Faulted, now_ms, self.measurements.alt_amps);
        self.fault = Some(record);
        self.ctl.pwm = FIELD_PWM_MIN;
        self.field.disable()?;
        Ok(TickOutcome::Faulted(record))
    }

    /// Jump to a charge phase on request.
    pub fn force_phase(&mut self, phase: ChargingPhase, now_ms: u64) -> Result<(), ForceRejected> {
        match self.cycle.phase() {
            ChargingPhase::Faulted => return Err(ForceRejected::Faulted),
            ChargingPhase::ForcedShutdown => return Err(ForceRejected::Shutdown),
            _ => {}
        }
        if !FORCEABLE.contains(phase) {
            return Err(ForceRejected::NotAllowed(phase));
        }
        if phase == ChargingPhase::Equalize && self.config.profiles.active().is_some_and(|p| p.lithium) {
            return Err(ForceRejected::Lithium);
        }
        self.cycle.set_phase(phase, now_ms, self.measurements.alt_amps);
        Ok(())
    }

    /// Apply the feature inputs. Call once per loop after [`tick`](Self::tick).
    ///
    /// Ignored while faulted or before the charge cycle has started.
    pub fn apply_features(&mut self, inputs: FeatureInputs, now_ms: u64) {
        let prior = core::mem::replace(&mut self.features, inputs);
        let phase = self.cycle.phase();
        if !phase.is_running() {
            return;
        }
        let amps = self.measurements.alt_amps;

        if inputs.bms_shutdown {
            self.cycle.set_phase(ChargingPhase::ForcedShutdown, now_ms, amps);
            return;
        }
        if phase == ChargingPhase::ForcedShutdown {
            self.cycle.set_phase(ChargingPhase::Ramping, now_ms, amps);
            return;
        }

        if inputs.force_float {
            if phase != ChargingPhase::WarmUp {
                self.cycle.set_phase(ChargingPhase::ForcedFloat, now_ms, amps);
            }
            return;
        }
        if prior.force_float
            && phase == ChargingPhase::ForcedFloat
            && !self.missing.contains(RequiredSensors::BAT_TEMP)
        {
            self.cycle.set_phase(ChargingPhase::Ramping, now_ms, amps);
            return;
        }

        let lithium = self.config.profiles.active().map_or(true, |p| p.lithium);
        if inputs.equalize && !prior.equalize {
            if matches!(phase, ChargingPhase::Acceptance | ChargingPhase::Float) && !lithium {
                self.cycle.set_phase(ChargingPhase::Equalize, now_ms, amps);
            }
        } else if !inputs.equalize && phase == ChargingPhase::Equalize {
            self.cycle.set_phase(ChargingPhase::Float, now_ms, amps);
        }
    }

    /// Change the start-up policy.
    pub fn set_policy(&mut self, policy: Policy) {
        self.config.policy = policy;
    }

    /// Select the active charge profile.
    pub fn select_profile(&mut self, index: usize) -> Result<(), ConfigError> {
        self.config.profiles.select(index)
    }

    /// Enable or disable the regulator. A disabled regulator parks in
    /// `Disabled` with the field off and restarts from warm-up when enabled.
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    /// Clear all control state and any fault, as after a reboot. The
    /// configuration is kept.
    pub fn reset(&mut self) -> Result<(), F::Error> {
        self.cycle = ChargeCycle::new();
        self.ctl = ControllerState::new();
        self.tach = Tachometer::new(self.config.system.tach_floor);
        self.targets = ControlTargets::OFF;
        self.measurements = Measurements::default();
        self.volts_error = 0.0;
        self.missing = RequiredSensors::NONE;
        self.features = FeatureInputs::default();
        self.fault = None;
        self.field.disable()
    }

    /// Get the current state for telemetry
    pub fn state(&self) -> RegulatorState {
        RegulatorState {
            phase: self.cycle.phase(),
            duty: self.ctl.duty(),
            targets: self.targets,
            measurements: self.measurements,
            rpm: self.tach.rpm(),
            tach_threshold: self.tach.threshold(),
            persistence: self.cycle.persistence(),
            capacity: self.cycle.capacity(),
            adaptive_accept_ms: self.cycle.adaptive_accept_ms(),
            shunt_measured: self.cycle.shunt_measured(),
            missing: self.missing,
            ot_factor: self.ctl.ot_factor,
            summary: *self.cycle.summary(),
            fault: self.fault,
            enabled: self.enabled,
        }
    }

    /// Active phase
    pub fn phase(&self) -> ChargingPhase {
        self.cycle.phase()
    }

    /// Working field PWM, 0..=255
    pub fn pwm(&self) -> u8 {
        self.ctl.duty()
    }

    /// Targets of the last iteration
    pub fn targets(&self) -> &ControlTargets {
        &self.targets
    }

    /// Recorded fault, if any
    pub fn fault(&self) -> Option<FaultRecord> {
        self.fault
    }

    /// Engine RPM
    pub fn rpm(&self) -> u32 {
        self.tach.rpm()
    }

    /// Configuration in use
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The field driver
    pub fn field(&self) -> &F {
        &self.field
    }

    /// The field driver, mutably
    pub fn field_mut(&mut self) -> &mut F {
        &mut self.field
    }
}
