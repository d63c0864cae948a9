//! Hardware Abstraction Layer implementations.
//!
//! This module contains concrete implementations of the traits
//! defined in [`crate::traits`] for various platforms.
//!
//! # Available Implementations
//!
//! - `mock`: Test implementations for desktop development
//! - `ehal`: Field driver on any `embedded-hal` 1.0 PWM channel (requires `ehal` feature)

pub mod mock;

#[cfg(feature = "ehal")]
pub mod ehal;

pub use mock::*;

#[cfg(feature = "ehal")]
pub use ehal::PwmField;
