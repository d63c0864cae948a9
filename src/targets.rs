//! Target calculator: phase + profile + configuration → setpoints.
//!
//! [`calculate`] is a pure function. It is re-run every control iteration
//! and its output is never stored beyond that iteration, so calling it twice
//! with the same [`TargetInputs`] always yields the same [`ControlTargets`].

use crate::config::{AltCapacity, Policy, RequiredSensors, RpmPullback, SystemConfig, WattsLimit};
use crate::phase::ChargingPhase;
use crate::pid::FIELD_PWM_MAX;
use crate::profile::{ChargeProfile, FloatAmps};
use crate::traits::AltTemp;

/// Reference temperature for battery compensation, °C.
pub const BAT_TEMP_NOMINAL_C: i16 = 25;

/// Field ceiling once RPM was seen and then lost, as a fraction of full field.
pub const LOST_RPM_FIELD_CAP: f32 = 0.70;

/// A current or power cap.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum Limit {
    /// Cap at this value.
    Bounded(f32),
    /// No cap; contributes no error term.
    Unbounded,
}

impl Limit {
    /// The cap, if bounded.
    #[inline]
    pub fn value(self) -> Option<f32> {
        match self {
            Limit::Bounded(v) => Some(v),
            Limit::Unbounded => None,
        }
    }

    /// The lesser of this limit and `cap`.
    pub fn min(self, cap: f32) -> Limit {
        match self {
            Limit::Bounded(v) => Limit::Bounded(v.min(cap)),
            Limit::Unbounded => Limit::Bounded(cap),
        }
    }

    /// Scales a bounded limit.
    pub fn scaled(self, factor: f32) -> Limit {
        match self {
            Limit::Bounded(v) => Limit::Bounded(v * factor),
            Limit::Unbounded => Limit::Unbounded,
        }
    }

    /// `measured - limit`, positive when over the cap.
    #[inline]
    pub fn error(self, measured: f32) -> Option<f32> {
        self.value().map(|v| measured - v)
    }
}

/// De-rating mode. Exactly one applies at a time.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Derate {
    /// Full rated output.
    #[default]
    Normal,
    /// Small-alternator mode selected.
    SmallAlternator,
    /// Shorted alternator sensor, or a required alternator sensor is missing.
    HalfPower,
}

impl Derate {
    /// Picks the de-rate, half power first, then small mode, then normal.
    pub fn select(alt_temp: AltTemp, missing: RequiredSensors, policy: Policy) -> Derate {
        if alt_temp == AltTemp::Shorted || missing.contains(RequiredSensors::ALT_TEMP) {
            Derate::HalfPower
        } else if policy.small_alternator {
            Derate::SmallAlternator
        } else {
            Derate::Normal
        }
    }

    /// Configured factor for this mode.
    pub fn factor(self, cfg: &SystemConfig) -> f32 {
        match self {
            Derate::Normal => cfg.derate_normal,
            Derate::SmallAlternator => cfg.derate_small,
            Derate::HalfPower => cfg.derate_half,
        }
    }
}

/// Highest alternator output seen during capacity sampling.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CapacitySample {
    /// Peak alternator amps
    pub amps: f32,
    /// Engine RPM at the peak
    pub rpm: u32,
}

impl CapacitySample {
    /// Starting point for a charge cycle.
    pub fn from_config(capacity: AltCapacity) -> Self {
        let amps = match capacity {
            AltCapacity::Amps(a) => a,
            AltCapacity::Auto | AltCapacity::Unlimited => 0.0,
        };
        Self { amps, rpm: 0 }
    }
}

/// Setpoints for one control iteration.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ControlTargets {
    /// Battery voltage target, compensated
    pub volts: f32,
    /// Alternator current cap
    pub amps: Limit,
    /// Alternator power cap
    pub watts: Limit,
    /// Field PWM ceiling, 0..=255
    pub pwm_limit: i32,
    /// De-rate in force
    pub derate: Derate,
    /// Capacity sample the current cap was derived from
    pub capacity: CapacitySample,
}

impl ControlTargets {
    /// Everything off.
    pub const OFF: ControlTargets = ControlTargets {
        volts: 0.0,
        amps: Limit::Bounded(0.0),
        watts: Limit::Bounded(0.0),
        pwm_limit: 0,
        derate: Derate::Normal,
        capacity: CapacitySample { amps: 0.0, rpm: 0 },
    };
}

impl Default for ControlTargets {
    fn default() -> Self {
        Self::OFF
    }
}

/// Everything the calculator reads.
#[derive(Clone, Copy, Debug)]
pub struct TargetInputs<'a> {
    /// Active phase
    pub phase: ChargingPhase,
    /// Active profile
    pub profile: &'a ChargeProfile,
    /// System tuning
    pub system: &'a SystemConfig,
    /// Start-up policy
    pub policy: Policy,
    /// Battery temperature, °C
    pub bat_temp: Option<i16>,
    /// Alternator sensor reading
    pub alt_temp: AltTemp,
    /// Engine RPM (0 = unknown)
    pub rpm: u32,
    /// Tach sync PWM floor, once known
    pub tach_threshold: Option<u8>,
    /// Current capacity sample
    pub capacity: CapacitySample,
    /// Alternator shunt seen working
    pub shunt_measured: bool,
    /// Required sensors found missing
    pub missing: RequiredSensors,
}

/// Computes the control targets for one iteration.
pub fn calculate(inputs: &TargetInputs<'_>) -> ControlTargets {
    let p = inputs.profile;
    let vm = inputs.system.volt_mult;
    let am = inputs.system.amp_mult;

    let mut targets = match inputs.phase {
        ChargingPhase::WarmUp | ChargingPhase::Ramping => {
            let mut v = p.accept_volts;
            if p.float_volts != 0.0 && p.float_volts < v {
                v = p.float_volts;
            }
            volts_amps_watts(v, inputs)
        }
        ChargingPhase::Bulk | ChargingPhase::DetermineCapacity | ChargingPhase::Acceptance => {
            volts_amps_watts(p.accept_volts, inputs)
        }
        ChargingPhase::Overcharge => {
            let (volts, cap) = p.overcharge.map_or((0.0, 0.0), |oc| (oc.volts, oc.amps));
            let t = volts_amps_watts(volts, inputs);
            capped(t, volts * vm, cap * am)
        }
        ChargingPhase::Float | ChargingPhase::ForcedFloat => {
            let t = volts_amps_watts(p.float_volts, inputs);
            match p.float_amps {
                FloatAmps::Amps(a) if inputs.shunt_measured => capped(t, p.float_volts * vm, a * am),
                _ => t,
            }
        }
        ChargingPhase::Equalize => {
            let t = volts_amps_watts(p.equalize_volts, inputs);
            match p.equalize_amps {
                Some(a) => capped(t, p.equalize_volts * vm, a * am),
                None => t,
            }
        }
        ChargingPhase::Unknown
        | ChargingPhase::Disabled
        | ChargingPhase::Faulted
        | ChargingPhase::ForcedShutdown
        | ChargingPhase::PostFloat => ControlTargets {
            derate: Derate::select(inputs.alt_temp, inputs.missing, inputs.policy),
            capacity: inputs.capacity,
            ..ControlTargets::OFF
        },
    };

    if targets.volts != 0.0 {
        if let Some(temp) = inputs.bat_temp {
            let t = temp.max(p.min_temp_comp_c);
            targets.volts += f32::from(BAT_TEMP_NOMINAL_C - t) * p.temp_comp_per_c * vm;
        }
    }
    targets
}

/// Phase-specific current cap, with the power cap following it.
fn capped(mut t: ControlTargets, volts: f32, amps: f32) -> ControlTargets {
    t.amps = t.amps.min(amps);
    if let Some(a) = t.amps.value() {
        t.watts = t.watts.min(volts * a);
    }
    t
}

/// Sets the voltage target and the generic amps/watts/PWM limits.
fn volts_amps_watts(setpoint: f32, inputs: &TargetInputs<'_>) -> ControlTargets {
    let cfg = inputs.system;
    let volts = setpoint * cfg.volt_mult;
    let determining = inputs.phase == ChargingPhase::DetermineCapacity;

    let derate = Derate::select(inputs.alt_temp, inputs.missing, inputs.policy);
    let factor = derate.factor(cfg);
    let amps = factor * inputs.capacity.amps;
    let mut pwm_limit = (factor * FIELD_PWM_MAX as f32) as i32;

    let threshold = inputs.tach_threshold.map_or(0, i32::from);
    if threshold > 0 && inputs.rpm == 0 && cfg.rpm_pullback == RpmPullback::CapWhenLost {
        pwm_limit = pwm_limit.min((FIELD_PWM_MAX as f32 * LOST_RPM_FIELD_CAP) as i32);
    }
    if let RpmPullback::Factor(pbf) = cfg.rpm_pullback {
        if inputs.rpm != 0 && pbf > 0 {
            let above_idle = i64::from(inputs.rpm) - i64::from(cfg.idle_rpm);
            let ramp = 60 + 3 * above_idle / i64::from(pbf);
            pwm_limit = (ramp.clamp(0, i64::from(pwm_limit.max(0))) as i32).max(threshold);
        }
    }

    let amps = if amps == 0.0 || determining {
        Limit::Unbounded
    } else {
        Limit::Bounded(amps)
    };
    if determining {
        pwm_limit = FIELD_PWM_MAX;
    }

    let watts = if determining {
        Limit::Unbounded
    } else {
        match cfg.watts_limit {
            WattsLimit::Auto => match amps {
                Limit::Bounded(a) => Limit::Bounded(volts * a),
                Limit::Unbounded => Limit::Unbounded,
            },
            WattsLimit::Watts(w) if w != 0.0 => Limit::Bounded(w),
            WattsLimit::Watts(_) | WattsLimit::Unlimited => Limit::Unbounded,
        }
    };

    ControlTargets {
        volts,
        amps,
        watts,
        pwm_limit,
        derate,
        capacity: inputs.capacity,
    }
}
