//! # alt-regulator
//!
//! A multi-stage alternator field regulator: charging state machine, target
//! calculator, PID field drive and fault monitor.
//!
//! ## Features
//!
//! - **Hardware abstraction**: Traits for the field driver, sensor snapshot, stator pulses and time
//! - **Charge profiles**: Eight per-chemistry profiles scaled to any battery voltage and size
//! - **Charge cycle**: Warm-up, soft ramp, capacity sampling, bulk, acceptance, overcharge, float, post-float, equalize
//! - **Field drive**: Voltage, current, power and temperature loops; the most restrictive wins
//! - **Protection**: Load-dump handling, overtemp pull-back and an ordered fault check list
//!
//! ## Architecture
//!
//! The crate is structured to allow testing on desktop without hardware:
//!
//! - `traits` - Hardware abstractions
//! - `config` / `profile` - System tuning, start-up policy and charge profiles
//! - `targets` - Setpoints for the active phase
//! - `charging` - Phase state machine, persistence filters, run summary
//! - `pid` - Field-drive controller state and loops
//! - `fault` - Fault codes and checks
//! - `tach` - Stator pulse capture and RPM
//! - `regulator` - The aggregate that ties everything together
//! - `hal` - Concrete implementations (mock for testing, embedded-hal adapter)
//!
//! ## Example
//!
//! ```rust
//! use alt_regulator::{ChargingPhase, Config, Regulator};
//! use alt_regulator::hal::{MockField, MockPulses, MockSensors};
//!
//! let mut regulator = Regulator::new(MockField::new(), Config::default());
//! let sensors = MockSensors::new().with_bat_volts(12.5);
//! let pulses = MockPulses::new();
//!
//! // Call tick() from the main loop
//! for t in 0..400 {
//!     regulator.tick(&sensors, &pulses, t * 50).unwrap();
//! }
//!
//! // Warm-up is over and the field is ramping up
//! assert_eq!(regulator.phase(), ChargingPhase::Ramping);
//! assert!(regulator.pwm() > 0);
//! ```

#![cfg_attr(not(feature = "std"), no_std)]
#![warn(missing_docs)]

/// Charging phase state machine, persistence filters and run summary.
pub mod charging;
/// Regulator configuration with builders.
pub mod config;
/// Fault codes and the ordered fault check list.
pub mod fault;
/// Hardware abstraction layer with mock implementations for testing.
pub mod hal;
/// Charging phases and phase-group sets.
pub mod phase;
/// Field-drive controller: PID loops, thermal pull-back, load dump tiers.
pub mod pid;
/// Per-chemistry charge profiles.
pub mod profile;
/// Regulator aggregate that owns all control state.
pub mod regulator;
/// Stator pulse capture and engine RPM.
pub mod tach;
/// Setpoints for the active phase.
pub mod targets;
/// Core traits for hardware abstraction.
pub mod traits;

// Re-exports for convenience
pub use charging::{ChargeCycle, FieldAction, Persistence, RunSummary};
pub use config::{
    AltCapacity, Config, ConfigError, Policy, RequiredSensors, RpmPullback, SystemConfig,
    TachFloor, WattsLimit,
};
pub use fault::{FaultCode, FaultRecord};
pub use phase::{ChargingPhase, PhaseSet};
pub use pid::ControllerState;
pub use profile::{AcceptExit, ChargeProfile, FloatAmps, OverchargeStage, ProfileTable};
pub use regulator::{FeatureInputs, ForceRejected, Regulator, RegulatorState, TickOutcome};
pub use tach::{PulseCapture, Tachometer};
pub use targets::{ControlTargets, Derate, Limit};
pub use traits::{
    AltTemp, Clock, FieldDriver, Measurements, Monitor, PulseSource, SensorSource, SensorStatus,
};
