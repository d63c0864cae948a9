//! Regulator configuration: system tuning, start-up policy and profile
//! selection.
//!
//! Uses `heapless::String` for profile labels so everything stays `no_std`
//! and allocation free, while remaining ergonomic on desktop.
//!
//! # Example
//!
//! ```rust
//! use alt_regulator::config::{AltCapacity, Config, Policy, SystemConfig};
//!
//! // Use defaults
//! let config = Config::default();
//! assert_eq!(config.system.alt_temp_setpoint_c, 90);
//!
//! // Or customize
//! let config = Config::default()
//!     .with_system(
//!         SystemConfig::default()
//!             .with_alt_capacity(AltCapacity::Auto)
//!             .with_volt_mult(2.0),
//!     )
//!     .with_policy(Policy::default().with_small_alternator(true));
//! assert_eq!(config.system.volt_mult, 2.0);
//! ```

use core::ops::BitOr;

use heapless::String as HString;

use crate::profile::ProfileTable;

/// Maximum length of a charge profile label.
pub const MAX_LABEL: usize = 12;

/// Type alias for profile labels.
pub type Label = HString<MAX_LABEL>;

/// Create a [`Label`] from a `&str`, truncating on a character boundary.
pub fn label(s: &str) -> Label {
    let mut hs = Label::new();
    for c in s.chars() {
        if hs.push(c).is_err() {
            break;
        }
    }
    hs
}

// ============================================================================
// Main Config
// ============================================================================

/// Complete regulator configuration.
#[derive(Clone, Debug, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Config {
    /// Alternator and system tuning
    pub system: SystemConfig,
    /// Start-up policy flags
    pub policy: Policy,
    /// Charge profiles and the selected entry
    pub profiles: ProfileTable,
}

impl Config {
    /// Set system configuration
    pub fn with_system(mut self, system: SystemConfig) -> Self {
        self.system = system;
        self
    }

    /// Set start-up policy
    pub fn with_policy(mut self, policy: Policy) -> Self {
        self.policy = policy;
        self
    }

    /// Set the profile table
    pub fn with_profiles(mut self, profiles: ProfileTable) -> Self {
        self.profiles = profiles;
        self
    }
}

/// Configuration rejected by a setter.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConfigError {
    /// Profile index is past the end of the table.
    ProfileIndex(usize),
}

// ============================================================================
// Limit policies
// ============================================================================

/// Alternator output capacity used for the current target.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum AltCapacity {
    /// Learn the capacity during a sampling phase after ramping.
    Auto,
    /// No current cap at all.
    Unlimited,
    /// Fixed capacity in amps.
    Amps(f32),
}

/// Engine load cap applied to alternator output power.
#[derive(Clone, Copy, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum WattsLimit {
    /// Target volts × target amps.
    Auto,
    /// No power cap.
    Unlimited,
    /// Fixed cap in watts.
    Watts(f32),
}

/// Field ceiling reduction based on engine speed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum RpmPullback {
    /// Cap the field at 70% once RPM was seen and is then lost.
    CapWhenLost,
    /// No RPM based reduction.
    Off,
    /// Linear ceiling: `60 + 3 * (rpm - idle) / factor`.
    Factor(u16),
}

/// Minimum field drive needed to keep a tachometer fed from the stator.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum TachFloor {
    /// Record the lowest PWM at which RPM pulses are still seen.
    Auto,
    /// No floor.
    Off,
    /// Fixed floor PWM value.
    Pwm(u8),
}

// ============================================================================
// Required sensors
// ============================================================================

/// Bit set of sensors the installation insists on.
///
/// Also used for the run-time "missing sensor" flags raised by the fault
/// monitor.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RequiredSensors(u8);

impl RequiredSensors {
    /// No sensors.
    pub const NONE: RequiredSensors = RequiredSensors(0);
    /// Alternator temperature sensor.
    pub const ALT_TEMP: RequiredSensors = RequiredSensors(0x01);
    /// Battery temperature sensor.
    pub const BAT_TEMP: RequiredSensors = RequiredSensors(0x02);
    /// Alternator current shunt.
    pub const AMP_SHUNT: RequiredSensors = RequiredSensors(0x04);
    /// Fault out when a required sensor is missing.
    pub const FAULT: RequiredSensors = RequiredSensors(0x80);

    /// Raw bit pattern.
    pub const fn bits(self) -> u8 {
        self.0
    }

    /// True if every bit of `other` is set.
    pub const fn contains(self, other: RequiredSensors) -> bool {
        self.0 & other.0 == other.0
    }

    /// True if no bit is set.
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Set the bits of `other`.
    pub fn insert(&mut self, other: RequiredSensors) {
        self.0 |= other.0;
    }
}

impl BitOr for RequiredSensors {
    type Output = RequiredSensors;

    fn bitor(self, rhs: RequiredSensors) -> RequiredSensors {
        RequiredSensors(self.0 | rhs.0)
    }
}

// ============================================================================
// System Config
// ============================================================================

/// Alternator and installation tuning.
#[derive(Clone, Debug)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct SystemConfig {
    /// Alternator temperature goal in °C
    pub alt_temp_setpoint_c: i16,
    /// De-rate in normal operation
    pub derate_normal: f32,
    /// De-rate in small-alternator mode
    pub derate_small: f32,
    /// De-rate in half-power mode
    pub derate_half: f32,
    /// Field ceiling reduction by engine speed
    pub rpm_pullback: RpmPullback,
    /// Engine idle speed used by the pull-back ramp
    pub idle_rpm: u32,
    /// Alternator current capacity
    pub alt_capacity: AltCapacity,
    /// Engine power cap
    pub watts_limit: WattsLimit,
    /// Number of alternator poles
    pub alternator_poles: u8,
    /// Engine pulley / alternator pulley ratio
    pub drive_ratio: f32,
    /// Tachometer field floor
    pub tach_floor: TachFloor,
    /// Engine warm-up delay in seconds
    pub warmup_secs: u16,
    /// Sensors the installation insists on
    pub required_sensors: RequiredSensors,
    /// Battery voltage scale relative to 12 V
    pub volt_mult: f32,
    /// Battery capacity scale relative to 500 Ah
    pub amp_mult: f32,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            alt_temp_setpoint_c: 90,
            derate_normal: 1.00,
            derate_small: 0.75,
            derate_half: 0.50,
            rpm_pullback: RpmPullback::CapWhenLost,
            idle_rpm: 0,
            alt_capacity: AltCapacity::Amps(125.0),
            watts_limit: WattsLimit::Unlimited,
            alternator_poles: 12,
            drive_ratio: 6.7 / 2.8,
            tach_floor: TachFloor::Auto,
            warmup_secs: 15,
            required_sensors: RequiredSensors::NONE,
            volt_mult: 1.0,
            amp_mult: 1.0,
        }
    }
}

impl SystemConfig {
    /// Set the alternator temperature goal
    pub fn with_alt_temp_setpoint(mut self, celsius: i16) -> Self {
        self.alt_temp_setpoint_c = celsius;
        self
    }

    /// Set the three de-rate factors (each clamped to 0.0..=1.0)
    pub fn with_derates(mut self, normal: f32, small: f32, half: f32) -> Self {
        self.derate_normal = normal.clamp(0.0, 1.0);
        self.derate_small = small.clamp(0.0, 1.0);
        self.derate_half = half.clamp(0.0, 1.0);
        self
    }

    /// Set the RPM pull-back policy and idle speed
    pub fn with_rpm_pullback(mut self, pullback: RpmPullback, idle_rpm: u32) -> Self {
        self.rpm_pullback = pullback;
        self.idle_rpm = idle_rpm;
        self
    }

    /// Set the alternator capacity policy
    pub fn with_alt_capacity(mut self, capacity: AltCapacity) -> Self {
        self.alt_capacity = capacity;
        self
    }

    /// Set the power cap
    pub fn with_watts_limit(mut self, limit: WattsLimit) -> Self {
        self.watts_limit = limit;
        self
    }

    /// Set pole count and drive ratio used for RPM
    pub fn with_drive(mut self, poles: u8, ratio: f32) -> Self {
        self.alternator_poles = poles.max(2);
        self.drive_ratio = ratio;
        self
    }

    /// Set the tach floor policy
    pub fn with_tach_floor(mut self, floor: TachFloor) -> Self {
        self.tach_floor = floor;
        self
    }

    /// Set the warm-up delay
    pub fn with_warmup_secs(mut self, secs: u16) -> Self {
        self.warmup_secs = secs;
        self
    }

    /// Set the required sensors
    pub fn with_required_sensors(mut self, sensors: RequiredSensors) -> Self {
        self.required_sensors = sensors;
        self
    }

    /// Set the battery voltage multiplier (12 V = 1.0)
    pub fn with_volt_mult(mut self, mult: f32) -> Self {
        self.volt_mult = mult.max(0.5);
        self
    }

    /// Set the battery capacity multiplier (500 Ah = 1.0)
    pub fn with_amp_mult(mut self, mult: f32) -> Self {
        self.amp_mult = mult;
        self
    }
}

// ============================================================================
// Policy
// ============================================================================

/// Start-up policy, normally sampled once from DIP switches.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Policy {
    /// Treat the alternator gently (small-mode de-rate)
    pub small_alternator: bool,
    /// A tachometer is fed from the stator; keep a minimum field
    pub tach_mode: bool,
}

impl Policy {
    /// Set small-alternator mode
    pub fn with_small_alternator(mut self, on: bool) -> Self {
        self.small_alternator = on;
        self
    }

    /// Set tach mode
    pub fn with_tach_mode(mut self, on: bool) -> Self {
        self.tach_mode = on;
        self
    }
}
