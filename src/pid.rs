//! PID field-drive controller.
//!
//! Four error signals compete for one scalar output: battery volts,
//! alternator amps, alternator watts and alternator temperature. Each gets
//! its own correction candidate and the smallest one wins, so whichever
//! limit most wants the field lower is obeyed. Upward moves are capped at
//! [`PWM_CHANGE_CAP`] per step; downward moves are not.
//!
//! All state that must survive between steps lives in [`ControllerState`],
//! which makes every step a plain function of state and inputs.
//!
//! # Example
//!
//! ```rust
//! use alt_regulator::pid::{ControllerState, Errors, PID_I_WINDUP_CAP};
//! use alt_regulator::traits::Measurements;
//!
//! let mut pid = ControllerState::new();
//! let m = Measurements { bat_volts: 14.6, ..Default::default() };
//! let errors = Errors { volts: 0.3, amps: None, watts: None, alt_temp: None };
//!
//! let c = pid.candidates(&m, &errors, 1.0);
//! assert!(c.arbitrate(false) < 0);
//! assert!(pid.v_integral <= PID_I_WINDUP_CAP);
//! ```

use crate::targets::ControlTargets;
use crate::traits::{AltTemp, Measurements};

/// Field off.
pub const FIELD_PWM_MIN: i32 = 0;
/// Full field.
pub const FIELD_PWM_MAX: i32 = 255;

/// Minimum time between PWM changes, ms. A step runs only when strictly more
/// than this has passed since the last physical write.
pub const PWM_CHANGE_RATE_MS: u64 = 100;
/// Minimum time between PWM changes while ramping, ms.
pub const PWM_RAMP_RATE_MS: u64 = 400;
/// Largest upward correction per step.
pub const PWM_CHANGE_CAP: i32 = 2;
/// Longest a ramp can take: the whole PWM range at the ramp pace.
pub const RAMP_DURATION_MS: u64 = PWM_RAMP_RATE_MS * FIELD_PWM_MAX as u64 / PWM_CHANGE_CAP as u64;

/// Integral accumulators are clamped to `0.0..=PID_I_WINDUP_CAP`.
pub const PID_I_WINDUP_CAP: f32 = 0.9;
/// Within this many volts below target counts as "at target" (× voltMult).
pub const PID_VOLTAGE_SENS: f32 = 0.05;

/// Temperature correction is recomputed every this many steps.
pub const TAM_SENSITIVITY: u8 = 100;
/// Proportional gain on alternator temperature error.
pub const TEMP_KP: i32 = 2;
/// Derivative gain on alternator temperature; also the derivative clamp.
pub const TEMP_KD: i32 = 20;

/// Over target by this much (× voltMult): physical output dropped at once.
pub const LOAD_DUMP_VOLTS: f32 = 0.040;
/// Over target by this much (× voltMult): next normal write suppressed too.
pub const LOAD_DUMP_SEVERE_VOLTS: f32 = 0.100;

/// Hard overtemp trips above setpoint × this ratio.
pub const AOT_THRESHOLD: f32 = 1.03;
/// Hard overtemp releases below setpoint × this ratio.
pub const AOT_RESUME: f32 = 0.90;
/// PWM multiplier applied when the hard overtemp trips.
pub const AOT_FACTOR: f32 = 0.50;

/// Watts target and PWM ceiling multiplier per overtemp excursion.
pub const OT_PULLBACK_FACTOR: f32 = 0.95;
/// The pull-back never goes below this factor.
pub const OT_PULLBACK_FLOOR: f32 = 0.60;

/// Proportional, integral and derivative gains.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Gains {
    /// Proportional
    pub kp: f32,
    /// Integral
    pub ki: f32,
    /// Derivative
    pub kd: f32,
}

/// Battery voltage loop; divided by voltMult at use.
pub const VOLTS_GAINS: Gains = Gains { kp: 20.0, ki: 10.0, kd: 75.0 };
/// Alternator current loop.
pub const AMPS_GAINS: Gains = Gains { kp: 0.6, ki: 0.3, kd: 0.7 };
/// Alternator power loop; divided by voltMult at use.
pub const WATTS_GAINS: Gains = Gains { kp: 0.05, ki: 0.0, kd: 0.02 };

/// Measured minus target for one step. Positive means over target.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Errors {
    /// Battery volts error
    pub volts: f32,
    /// Alternator amps error; `None` when the cap is unbounded
    pub amps: Option<f32>,
    /// Alternator watts error (after OT pull-back); `None` when unbounded
    pub watts: Option<f32>,
    /// Alternator temperature error, °C; `None` without a reading
    pub alt_temp: Option<i16>,
}

impl Errors {
    /// Errors of `m` against `targets`.
    pub fn compute(m: &Measurements, targets: &ControlTargets, alt_setpoint: i16, ot_factor: f32) -> Self {
        Self {
            volts: m.bat_volts - targets.volts,
            amps: targets.amps.error(m.alt_amps),
            watts: targets.watts.scaled(ot_factor).error(m.alt_watts),
            alt_temp: m.alt_temp.celsius().map(|t| t.saturating_sub(alt_setpoint)),
        }
    }

    /// Close enough to target volts for a phase transition.
    #[inline]
    pub fn at_target_volts(&self, volt_mult: f32) -> bool {
        self.volts >= -PID_VOLTAGE_SENS * volt_mult
    }

    /// How far over target the battery is.
    pub fn load_dump(&self, volt_mult: f32) -> LoadDump {
        if self.volts > LOAD_DUMP_SEVERE_VOLTS * volt_mult {
            LoadDump::Severe
        } else if self.volts > LOAD_DUMP_VOLTS * volt_mult {
            LoadDump::Minor
        } else {
            LoadDump::None
        }
    }
}

/// Over-voltage tiers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum LoadDump {
    /// Within the normal band; the PID handles it.
    None,
    /// Drop the physical output until the voltage comes back.
    Minor,
    /// As `Minor`, and skip the next normal write.
    Severe,
}

/// One step's correction candidates.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Candidates {
    /// From the voltage loop
    pub volts: i32,
    /// From the current loop, if bounded
    pub amps: Option<i32>,
    /// From the power loop, if bounded
    pub watts: Option<i32>,
    /// From the paced temperature loop
    pub alt_temp: i32,
}

impl Candidates {
    /// Smallest candidate, capped at [`PWM_CHANGE_CAP`]. While a hard
    /// overtemp is latched nothing may push the field up.
    pub fn arbitrate(&self, hold_up: bool) -> i32 {
        let mut c = self.volts.min(self.alt_temp).min(PWM_CHANGE_CAP);
        if let Some(a) = self.amps {
            c = c.min(a);
        }
        if let Some(w) = self.watts {
            c = c.min(w);
        }
        if hold_up {
            c = c.min(0);
        }
        c
    }
}

/// Events from the thermal checks, for logging.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ThermalEvent {
    /// A new overtemp excursion tightened the pull-back factor.
    pub pulled_back: bool,
    /// The hard overtemp tripped and the PWM was cut.
    pub tripped: bool,
}

/// Everything the controller carries between steps.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ControllerState {
    /// Working PWM value
    pub pwm: i32,
    /// Voltage integral
    pub v_integral: f32,
    /// Current integral
    pub a_integral: f32,
    /// Power integral
    pub w_integral: f32,
    /// Battery volts at the previous step
    pub prior_volts: f32,
    /// Alternator amps at the previous step
    pub prior_amps: f32,
    /// Alternator watts at the previous step
    pub prior_watts: f32,
    /// Alternator temperature at the previous paced update
    pub prior_alt_temp: i16,
    /// Paced temperature correction
    pub temp_correction: i32,
    /// Steps until the next temperature update
    pub temp_countdown: u8,
    /// Watts target and ceiling multiplier from overtemp excursions
    pub ot_factor: f32,
    /// An overtemp excursion is in progress
    pub ot_latched: bool,
    /// Hard overtemp latched
    pub aot_latched: bool,
    /// Severe load dump seen; next normal write skipped
    pub ld3_latched: bool,
    /// Time of the last physical PWM write, ms
    pub last_change_ms: u64,
}

impl Default for ControllerState {
    fn default() -> Self {
        Self::new()
    }
}

fn clamp_integral(i: f32) -> f32 {
    if i.is_nan() {
        0.0
    } else {
        i.clamp(0.0, PID_I_WINDUP_CAP)
    }
}

impl ControllerState {
    /// Fresh state: field off, no pull-back.
    pub const fn new() -> Self {
        Self {
            pwm: FIELD_PWM_MIN,
            v_integral: 0.0,
            a_integral: 0.0,
            w_integral: 0.0,
            prior_volts: 0.0,
            prior_amps: 0.0,
            prior_watts: 0.0,
            prior_alt_temp: 0,
            temp_correction: 0,
            temp_countdown: TAM_SENSITIVITY,
            ot_factor: 1.0,
            ot_latched: false,
            aot_latched: false,
            ld3_latched: false,
            last_change_ms: 0,
        }
    }

    /// True once enough time has passed since the last write for a step.
    #[inline]
    pub fn due(&self, now_ms: u64, interval_ms: u64) -> bool {
        now_ms.saturating_sub(self.last_change_ms) > interval_ms
    }

    /// Runs the four loops and returns their candidates.
    ///
    /// Derivatives are taken on the measurement, not the error, so a target
    /// change does not kick the output. Integrals only ever pull down.
    pub fn candidates(&mut self, m: &Measurements, errors: &Errors, volt_mult: f32) -> Candidates {
        let dv = m.bat_volts - self.prior_volts;
        self.prior_volts = m.bat_volts;
        let da = m.alt_amps - self.prior_amps;
        self.prior_amps = m.alt_amps;
        let dw = m.alt_watts - self.prior_watts;
        self.prior_watts = m.alt_watts;

        let g = VOLTS_GAINS;
        self.v_integral = clamp_integral(self.v_integral + errors.volts * g.ki / volt_mult);
        let volts = (errors.volts * -g.kp / volt_mult - self.v_integral - dv * g.kd / volt_mult) as i32;

        let amps = match errors.amps {
            Some(e) => {
                let g = AMPS_GAINS;
                self.a_integral = clamp_integral(self.a_integral + e * g.ki);
                Some((e * -g.kp - self.a_integral - da * g.kd) as i32)
            }
            None => {
                self.a_integral = 0.0;
                None
            }
        };

        let watts = match errors.watts {
            Some(e) => {
                let g = WATTS_GAINS;
                self.w_integral = clamp_integral(self.w_integral + e * g.ki / volt_mult);
                Some((e * -g.kp / volt_mult - self.w_integral - dw * g.kd / volt_mult) as i32)
            }
            None => {
                self.w_integral = 0.0;
                None
            }
        };

        Candidates {
            volts,
            amps,
            watts,
            alt_temp: self.temperature_candidate(m.alt_temp, errors.alt_temp),
        }
    }

    /// Paced temperature loop. A pull-down lasts one step; a raise lasts
    /// until the next paced update. Without a reading the candidate is the
    /// up-step cap, so temperature never holds the field back.
    fn temperature_candidate(&mut self, alt_temp: AltTemp, error: Option<i16>) -> i32 {
        if self.temp_correction <= 0 {
            self.temp_correction = 0;
        }

        self.temp_countdown = self.temp_countdown.saturating_sub(1);
        let update = self.temp_countdown == 0;
        if update {
            self.temp_countdown = TAM_SENSITIVITY;
        }

        match (alt_temp.celsius(), error) {
            (Some(t), Some(e)) => {
                if update {
                    let d = i32::from(t.saturating_sub(self.prior_alt_temp)).clamp(0, TEMP_KD);
                    self.prior_alt_temp = t;
                    self.temp_correction = -TEMP_KP * i32::from(e) - d * TEMP_KD;
                }
            }
            _ => self.temp_correction = PWM_CHANGE_CAP,
        }
        self.temp_correction
    }

    /// Overtemp pull-back and hard overtemp trip.
    ///
    /// The pull-back factor tightens once per excursion above setpoint and
    /// does not relax again. The hard trip halves the working PWM once and
    /// stays latched until the alternator cools below the resume ratio.
    pub fn thermal(&mut self, alt_temp: AltTemp, setpoint: i16) -> ThermalEvent {
        let mut event = ThermalEvent::default();
        let temp = alt_temp.celsius();

        match temp {
            Some(t) if t > setpoint => {
                if !self.ot_latched {
                    self.ot_factor = (self.ot_factor * OT_PULLBACK_FACTOR).max(OT_PULLBACK_FLOOR);
                    self.ot_latched = true;
                    event.pulled_back = true;
                }
            }
            _ => self.ot_latched = false,
        }

        let t = temp.map_or(f32::MIN, f32::from);
        if t > f32::from(setpoint) * AOT_THRESHOLD && !self.aot_latched {
            self.aot_latched = true;
            self.pwm = (self.pwm as f32 * AOT_FACTOR) as i32;
            event.tripped = true;
        }
        if t < f32::from(setpoint) * AOT_RESUME {
            self.aot_latched = false;
        }
        event
    }

    /// Applies a correction, the tach floor and the ceiling to the working
    /// PWM. The ceiling is scaled by the overtemp pull-back.
    pub fn adjust(&mut self, correction: i32, floor: Option<u8>, ceiling: i32) {
        let mut pwm = self.pwm.saturating_add(correction);
        if let Some(f) = floor {
            pwm = pwm.max(i32::from(f));
        }
        let ceiling = (ceiling as f32 * self.ot_factor) as i32;
        self.pwm = pwm.min(ceiling).max(FIELD_PWM_MIN);
    }

    /// Working PWM as a duty value.
    #[inline]
    pub fn duty(&self) -> u8 {
        self.pwm.clamp(FIELD_PWM_MIN, FIELD_PWM_MAX) as u8
    }
}
