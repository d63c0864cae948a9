//! Trait definitions for hardware abstraction.
//!
//! This module defines the seams that let the regulator:
//! - Run on different hardware (a microcontroller PWM timer, desktop mocks)
//! - Take measurements from any acquisition layer
//! - Share stator pulse timing with an interrupt handler
//!
//! # Hardware Abstraction
//!
//! The key hardware traits are:
//!
//! - [`FieldDriver`]: PWM output into the field winding
//! - [`SensorSource`]: Per-cycle measurement snapshot and its status
//! - [`PulseSource`]: Stator pulse intervals for RPM
//! - [`Clock`]: Time source for `no_std` environments

pub mod hardware;

pub use hardware::*;
