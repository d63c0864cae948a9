//! Fault monitor.
//!
//! [`check`] walks an ordered list of checks and returns the first one that
//! trips. Each check is keyed by the set of phases it applies in, so a
//! phase sees exactly the checks listed for its group and nothing else.
//!
//! Codes with the high bit set ([`RESTART_FLAG`]) may be cleared by a
//! reboot; all others need a person to look at the installation.

use crate::config::{RequiredSensors, SystemConfig};
use crate::phase::{ChargingPhase, PhaseSet};
use crate::profile::PROFILE_COUNT;
use crate::traits::{AltTemp, Measurements, Monitor};

/// Set on codes that allow an automatic restart.
pub const RESTART_FLAG: u16 = 0x8000;

/// Battery over-temperature, °C.
pub const FAULT_BAT_TEMP_C: i16 = 60;
/// Battery over-voltage while charging, 12 V basis.
pub const FAULT_BAT_VOLTS_CHARGE: f32 = 16.5;
/// Battery over-voltage while equalizing or floating, 12 V basis.
pub const FAULT_BAT_VOLTS_EQUALIZE: f32 = 18.0;
/// Battery under-voltage with the field driven, 12 V basis.
pub const FAULT_BAT_VOLTS_LOW: f32 = 8.0;
/// Low voltage only counts once the field is above a third.
pub const FAULT_LOW_VOLTS_PWM: i32 = 255 / 3;
/// Alternator over-temperature as a multiple of the setpoint.
pub const FAULT_ALT_TEMP_RATIO: f32 = 1.1;
/// Field FET over-temperature, °C.
pub const FAULT_FET_TEMP_C: i16 = 70;
/// Largest sane amp multiplier.
pub const MAX_AMP_MULT: f32 = 10.0;

/// Why the regulator stopped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FaultCode {
    /// Battery too hot (12)
    BatteryTemp,
    /// Battery over-voltage (13)
    BatteryVolts,
    /// Battery voltage collapsed with the field driven (14, restart)
    BatteryLowVolts,
    /// Alternator too hot (21)
    AltTemp,
    /// Alternator already at setpoint while ramping (24)
    AltTempRamping,
    /// Control reached a phase no check group covers (31)
    UnhandledPhase,
    /// Active profile missing when computing targets (33)
    ProfileMissing,
    /// Selected profile index out of range (34)
    ProfileIndex,
    /// Amp multiplier out of range (35)
    AmpMult,
    /// Field FETs too hot (41)
    FetTemp,
    /// A required sensor is missing (42)
    RequiredSensor,
    /// A current/voltage monitor stopped responding (100+n / 200+n, restart)
    Bus(Monitor, u8),
}

impl FaultCode {
    /// Numeric code, with [`RESTART_FLAG`] set where a restart is allowed.
    pub fn code(self) -> u16 {
        match self {
            FaultCode::BatteryTemp => 12,
            FaultCode::BatteryVolts => 13,
            FaultCode::BatteryLowVolts => 14 | RESTART_FLAG,
            FaultCode::AltTemp => 21,
            FaultCode::AltTempRamping => 24,
            FaultCode::UnhandledPhase => 31,
            FaultCode::ProfileMissing => 33,
            FaultCode::ProfileIndex => 34,
            FaultCode::AmpMult => 35,
            FaultCode::FetTemp => 41,
            FaultCode::RequiredSensor => 42,
            FaultCode::Bus(Monitor::Battery, n) => (100 + u16::from(n)) | RESTART_FLAG,
            FaultCode::Bus(Monitor::Alternator, n) => (200 + u16::from(n)) | RESTART_FLAG,
        }
    }

    /// A reboot may clear this fault.
    #[inline]
    pub fn restart_permitted(self) -> bool {
        self.code() & RESTART_FLAG != 0
    }
}

/// A recorded fault.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FaultRecord {
    /// What tripped
    pub code: FaultCode,
    /// Phase active when it tripped
    pub phase: ChargingPhase,
    /// When it tripped, ms
    pub at_ms: u64,
}

impl FaultRecord {
    /// Shorthand for [`FaultCode::restart_permitted`].
    #[inline]
    pub fn restart_permitted(&self) -> bool {
        self.code.restart_permitted()
    }
}

/// Everything the checks look at.
#[derive(Clone, Copy, Debug)]
pub struct FaultContext<'a> {
    /// Active phase
    pub phase: ChargingPhase,
    /// This cycle's measurements
    pub measurements: &'a Measurements,
    /// Working PWM
    pub pwm: i32,
    /// System tuning
    pub system: &'a SystemConfig,
    /// Selected profile index
    pub profile_index: usize,
    /// Required sensors found missing so far
    pub missing: RequiredSensors,
    /// Alternator shunt has shown real current
    pub shunt_measured: bool,
}

struct Check {
    code: FaultCode,
    phases: PhaseSet,
    trips: fn(&FaultContext<'_>) -> bool,
}

const CHARGING: PhaseSet = PhaseSet::of(&[
    ChargingPhase::Ramping,
    ChargingPhase::DetermineCapacity,
    ChargingPhase::Bulk,
    ChargingPhase::Acceptance,
    ChargingPhase::Overcharge,
]);

const FLOATING: PhaseSet = PhaseSet::of(&[
    ChargingPhase::Equalize,
    ChargingPhase::Float,
    ChargingPhase::ForcedFloat,
    ChargingPhase::ForcedShutdown,
]);

const SHUNT_EXPECTED: PhaseSet = PhaseSet::of(&[
    ChargingPhase::Ramping,
    ChargingPhase::DetermineCapacity,
    ChargingPhase::Acceptance,
    ChargingPhase::Overcharge,
]);

const RAMPING: PhaseSet = PhaseSet::of(&[ChargingPhase::Ramping]);

const IDLE: PhaseSet = PhaseSet::of(&[
    ChargingPhase::Unknown,
    ChargingPhase::Disabled,
    ChargingPhase::WarmUp,
    ChargingPhase::PostFloat,
]);

const HANDLED: PhaseSet = IDLE.union(CHARGING).union(FLOATING);

fn alt_temp_over(ctx: &FaultContext<'_>, ratio: f32) -> bool {
    match ctx.measurements.alt_temp {
        AltTemp::Celsius(t) => f32::from(t) > f32::from(ctx.system.alt_temp_setpoint_c) * ratio,
        AltTemp::Missing | AltTemp::Shorted => false,
    }
}

fn bat_volts_over(ctx: &FaultContext<'_>, limit: f32) -> bool {
    ctx.measurements.bat_volts > limit * ctx.system.volt_mult
}

/// First match wins.
const CHECKS: &[Check] = &[
    Check {
        code: FaultCode::FetTemp,
        phases: PhaseSet::ALL,
        trips: |c| c.measurements.fet_temp.is_some_and(|t| t > FAULT_FET_TEMP_C),
    },
    Check {
        code: FaultCode::AmpMult,
        phases: PhaseSet::ALL,
        trips: |c| !(0.0..=MAX_AMP_MULT).contains(&c.system.amp_mult),
    },
    Check {
        code: FaultCode::ProfileIndex,
        phases: PhaseSet::ALL,
        trips: |c| c.profile_index >= PROFILE_COUNT,
    },
    Check {
        code: FaultCode::RequiredSensor,
        phases: PhaseSet::ALL,
        trips: |c| c.system.required_sensors.contains(RequiredSensors::FAULT) && !c.missing.is_empty(),
    },
    Check {
        code: FaultCode::BatteryTemp,
        phases: PhaseSet::ALL,
        trips: |c| c.measurements.bat_temp.is_some_and(|t| t > FAULT_BAT_TEMP_C),
    },
    Check {
        code: FaultCode::BatteryLowVolts,
        phases: PhaseSet::ALL,
        trips: |c| {
            c.measurements.bat_volts < FAULT_BAT_VOLTS_LOW * c.system.volt_mult && c.pwm > FAULT_LOW_VOLTS_PWM
        },
    },
    Check {
        code: FaultCode::AltTemp,
        phases: PhaseSet::ALL,
        trips: |c| alt_temp_over(c, FAULT_ALT_TEMP_RATIO),
    },
    Check {
        code: FaultCode::BatteryVolts,
        phases: CHARGING,
        trips: |c| bat_volts_over(c, FAULT_BAT_VOLTS_CHARGE),
    },
    Check {
        code: FaultCode::BatteryVolts,
        phases: FLOATING,
        trips: |c| bat_volts_over(c, FAULT_BAT_VOLTS_EQUALIZE),
    },
    Check {
        code: FaultCode::RequiredSensor,
        phases: SHUNT_EXPECTED,
        trips: |c| c.system.required_sensors.contains(RequiredSensors::AMP_SHUNT) && !c.shunt_measured,
    },
    Check {
        code: FaultCode::AltTempRamping,
        phases: RAMPING,
        trips: |c| c.measurements.alt_temp.celsius().is_some_and(|t| t >= c.system.alt_temp_setpoint_c),
    },
    Check {
        code: FaultCode::UnhandledPhase,
        phases: PhaseSet::ALL,
        trips: |c| !HANDLED.contains(c.phase),
    },
];

/// Runs the check list. Returns the first fault found.
pub fn check(ctx: &FaultContext<'_>) -> Option<FaultCode> {
    CHECKS
        .iter()
        .find(|c| c.phases.contains(ctx.phase) && (c.trips)(ctx))
        .map(|c| c.code)
}

/// Raises the missing flag for every required sensor that should be
/// reporting in the active phase and is not. Flags only accumulate.
pub fn detect_missing_sensors(
    phase: ChargingPhase,
    m: &Measurements,
    required: RequiredSensors,
    shunt_measured: bool,
    missing: RequiredSensors,
) -> RequiredSensors {
    let mut flags = missing;
    if phase == ChargingPhase::Ramping {
        if required.contains(RequiredSensors::ALT_TEMP) && m.alt_temp == AltTemp::Missing {
            flags.insert(RequiredSensors::ALT_TEMP);
        }
        if required.contains(RequiredSensors::BAT_TEMP) && m.bat_temp.is_none() {
            flags.insert(RequiredSensors::BAT_TEMP);
        }
    }
    if SHUNT_EXPECTED.contains(phase) && required.contains(RequiredSensors::AMP_SHUNT) && !shunt_measured {
        flags.insert(RequiredSensors::AMP_SHUNT);
    }
    flags
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx<'a>(phase: ChargingPhase, m: &'a Measurements, system: &'a SystemConfig) -> FaultContext<'a> {
        FaultContext {
            phase,
            measurements: m,
            pwm: 100,
            system,
            profile_index: 0,
            missing: RequiredSensors::NONE,
            shunt_measured: true,
        }
    }

    fn healthy() -> Measurements {
        Measurements {
            bat_volts: 13.8,
            bat_amps: 20.0,
            alt_amps: 30.0,
            alt_temp: AltTemp::Celsius(50),
            bat_temp: Some(25),
            fet_temp: Some(40),
            ..Default::default()
        }
    }

    // =========================================================================
    // Codes
    // =========================================================================

    #[test]
    fn numeric_codes() {
        assert_eq!(FaultCode::BatteryVolts.code(), 13);
        assert_eq!(FaultCode::BatteryLowVolts.code(), 0x800E);
        assert_eq!(FaultCode::RequiredSensor.code(), 42);
        assert_eq!(FaultCode::Bus(Monitor::Battery, 3).code(), 0x8000 | 103);
        assert_eq!(FaultCode::Bus(Monitor::Alternator, 7).code(), 0x8000 | 207);
    }

    #[test]
    fn restart_permission() {
        assert!(FaultCode::BatteryLowVolts.restart_permitted());
        assert!(FaultCode::Bus(Monitor::Alternator, 1).restart_permitted());
        assert!(!FaultCode::AltTemp.restart_permitted());
        assert!(!FaultCode::FetTemp.restart_permitted());
    }

    // =========================================================================
    // Checks
    // =========================================================================

    #[test]
    fn healthy_system_passes_everywhere() {
        let m = healthy();
        let sys = SystemConfig::default();
        for phase in ChargingPhase::ALL {
            if phase == ChargingPhase::Faulted {
                continue;
            }
            assert_eq!(check(&ctx(phase, &m, &sys)), None, "{phase}");
        }
    }

    #[test]
    fn faulted_phase_is_unhandled() {
        let m = healthy();
        let sys = SystemConfig::default();
        assert_eq!(check(&ctx(ChargingPhase::Faulted, &m, &sys)), Some(FaultCode::UnhandledPhase));
    }

    #[test]
    fn charge_overvolt_by_group() {
        let mut m = healthy();
        m.bat_volts = 17.0;
        let sys = SystemConfig::default();
        assert_eq!(check(&ctx(ChargingPhase::Bulk, &m, &sys)), Some(FaultCode::BatteryVolts));
        assert_eq!(check(&ctx(ChargingPhase::Ramping, &m, &sys)), Some(FaultCode::BatteryVolts));
        assert_eq!(check(&ctx(ChargingPhase::Float, &m, &sys)), None);
        assert_eq!(check(&ctx(ChargingPhase::Equalize, &m, &sys)), None);
        assert_eq!(check(&ctx(ChargingPhase::PostFloat, &m, &sys)), None);

        m.bat_volts = 18.1;
        assert_eq!(check(&ctx(ChargingPhase::Float, &m, &sys)), Some(FaultCode::BatteryVolts));
        assert_eq!(check(&ctx(ChargingPhase::ForcedShutdown, &m, &sys)), Some(FaultCode::BatteryVolts));
    }

    #[test]
    fn overvolt_scales_with_system_voltage() {
        let mut m = healthy();
        m.bat_volts = 30.0;
        let sys = SystemConfig::default().with_volt_mult(2.0);
        assert_eq!(check(&ctx(ChargingPhase::Bulk, &m, &sys)), None);
        m.bat_volts = 33.5;
        assert_eq!(check(&ctx(ChargingPhase::Bulk, &m, &sys)), Some(FaultCode::BatteryVolts));
    }

    #[test]
    fn low_volts_needs_field_drive() {
        let mut m = healthy();
        m.bat_volts = 7.0;
        let sys = SystemConfig::default();
        let mut c = ctx(ChargingPhase::Bulk, &m, &sys);
        c.pwm = 85;
        assert_eq!(check(&c), None);
        c.pwm = 86;
        assert_eq!(check(&c), Some(FaultCode::BatteryLowVolts));
    }

    #[test]
    fn alt_temp_limit() {
        let mut m = healthy();
        let sys = SystemConfig::default();
        m.alt_temp = AltTemp::Celsius(99);
        assert_eq!(check(&ctx(ChargingPhase::Bulk, &m, &sys)), None);
        m.alt_temp = AltTemp::Celsius(100);
        assert_eq!(check(&ctx(ChargingPhase::Bulk, &m, &sys)), Some(FaultCode::AltTemp));
        m.alt_temp = AltTemp::Shorted;
        assert_eq!(check(&ctx(ChargingPhase::Bulk, &m, &sys)), None);
    }

    #[test]
    fn hot_alternator_while_ramping() {
        let mut m = healthy();
        m.alt_temp = AltTemp::Celsius(90);
        let sys = SystemConfig::default();
        assert_eq!(check(&ctx(ChargingPhase::Ramping, &m, &sys)), Some(FaultCode::AltTempRamping));
        assert_eq!(check(&ctx(ChargingPhase::Bulk, &m, &sys)), None);
    }

    #[test]
    fn fet_outranks_everything() {
        let mut m = healthy();
        m.fet_temp = Some(71);
        m.bat_volts = 20.0;
        m.bat_temp = Some(70);
        let sys = SystemConfig::default().with_amp_mult(11.0);
        assert_eq!(check(&ctx(ChargingPhase::Bulk, &m, &sys)), Some(FaultCode::FetTemp));
    }

    #[test]
    fn system_checks_outrank_thresholds() {
        let mut m = healthy();
        m.bat_temp = Some(61);
        let sys = SystemConfig::default().with_amp_mult(-1.0);
        assert_eq!(check(&ctx(ChargingPhase::Bulk, &m, &sys)), Some(FaultCode::AmpMult));

        let sys = SystemConfig::default();
        let mut c = ctx(ChargingPhase::Bulk, &m, &sys);
        c.profile_index = 8;
        assert_eq!(check(&c), Some(FaultCode::ProfileIndex));
        c.profile_index = 7;
        assert_eq!(check(&c), Some(FaultCode::BatteryTemp));
    }

    #[test]
    fn battery_temp_outranks_overvolt() {
        let mut m = healthy();
        m.bat_temp = Some(61);
        m.bat_volts = 17.0;
        let sys = SystemConfig::default();
        assert_eq!(check(&ctx(ChargingPhase::Bulk, &m, &sys)), Some(FaultCode::BatteryTemp));
    }

    #[test]
    fn overvolt_outranks_missing_shunt() {
        let mut m = healthy();
        m.bat_volts = 17.0;
        let sys = SystemConfig::default().with_required_sensors(RequiredSensors::AMP_SHUNT);
        let mut c = ctx(ChargingPhase::Acceptance, &m, &sys);
        c.shunt_measured = false;
        assert_eq!(check(&c), Some(FaultCode::BatteryVolts));
    }

    #[test]
    fn required_shunt_by_phase() {
        let m = healthy();
        let sys = SystemConfig::default().with_required_sensors(RequiredSensors::AMP_SHUNT);
        for (phase, expected) in [
            (ChargingPhase::Ramping, Some(FaultCode::RequiredSensor)),
            (ChargingPhase::DetermineCapacity, Some(FaultCode::RequiredSensor)),
            (ChargingPhase::Acceptance, Some(FaultCode::RequiredSensor)),
            (ChargingPhase::Overcharge, Some(FaultCode::RequiredSensor)),
            (ChargingPhase::Bulk, None),
            (ChargingPhase::Float, None),
        ] {
            let mut c = ctx(phase, &m, &sys);
            c.shunt_measured = false;
            assert_eq!(check(&c), expected, "{phase}");
        }
    }

    #[test]
    fn missing_sensor_faults_only_with_policy() {
        let m = healthy();
        let sys = SystemConfig::default().with_required_sensors(RequiredSensors::ALT_TEMP);
        let mut c = ctx(ChargingPhase::Float, &m, &sys);
        c.missing = RequiredSensors::ALT_TEMP;
        assert_eq!(check(&c), None);

        let sys = SystemConfig::default().with_required_sensors(RequiredSensors::ALT_TEMP | RequiredSensors::FAULT);
        let mut c = ctx(ChargingPhase::Float, &m, &sys);
        c.missing = RequiredSensors::ALT_TEMP;
        assert_eq!(check(&c), Some(FaultCode::RequiredSensor));
    }

    // =========================================================================
    // Missing sensor detection
    // =========================================================================

    #[test]
    fn sensors_checked_while_ramping() {
        let m = Measurements::default();
        let req = RequiredSensors::ALT_TEMP | RequiredSensors::BAT_TEMP;
        let none = RequiredSensors::NONE;
        assert_eq!(detect_missing_sensors(ChargingPhase::Bulk, &m, req, true, none), none);
        assert_eq!(detect_missing_sensors(ChargingPhase::Ramping, &m, req, true, none), req);
    }

    #[test]
    fn shorted_sensor_is_not_missing() {
        let m = Measurements {
            alt_temp: AltTemp::Shorted,
            bat_temp: Some(20),
            ..Default::default()
        };
        let req = RequiredSensors::ALT_TEMP | RequiredSensors::BAT_TEMP;
        assert!(detect_missing_sensors(ChargingPhase::Ramping, &m, req, true, RequiredSensors::NONE).is_empty());
    }

    #[test]
    fn unrequired_sensors_never_flagged() {
        let m = Measurements::default();
        let flags = detect_missing_sensors(ChargingPhase::Ramping, &m, RequiredSensors::NONE, false, RequiredSensors::NONE);
        assert!(flags.is_empty());
    }

    #[test]
    fn shunt_flag_latches() {
        let m = healthy();
        let req = RequiredSensors::AMP_SHUNT;
        let flags = detect_missing_sensors(ChargingPhase::Acceptance, &m, req, false, RequiredSensors::NONE);
        assert_eq!(flags, RequiredSensors::AMP_SHUNT);
        let flags = detect_missing_sensors(ChargingPhase::Acceptance, &m, req, true, flags);
        assert_eq!(flags, RequiredSensors::AMP_SHUNT);
        assert!(detect_missing_sensors(ChargingPhase::Bulk, &m, req, false, RequiredSensors::NONE).is_empty());
    }
}
