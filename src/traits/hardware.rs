//! Hardware abstraction traits for the field driver, sensor snapshot,
//! stator pulses and time.
//!
//! This module defines the narrow interfaces through which the regulator
//! reaches the outside world, so the control logic runs unchanged on a
//! microcontroller or on a desktop with mocks.
//!
//! # Key Traits
//!
//! | Trait | Purpose |
//! |-------|---------|
//! | [`FieldDriver`] | PWM output into the alternator field winding |
//! | [`SensorSource`] | Volts, amps, watts and temperatures each cycle |
//! | [`PulseSource`] | Stator pulse interval captured by the ISR |
//! | [`Clock`] | Monotonic millisecond time |
//!
//! # Implementation
//!
//! For testing and desktop development, use the mock implementations
//! from [`crate::hal::mock`]. An `embedded-hal` PWM adapter lives in
//! `hal::ehal` (requires the `ehal` feature).
//!
//! # Example
//!
//! ```rust
//! use alt_regulator::traits::FieldDriver;
//! use alt_regulator::hal::MockField;
//!
//! let mut field = MockField::new();
//! field.set_duty(128).unwrap();
//! assert_eq!(field.duty, 128);
//!
//! field.disable().unwrap();
//! assert_eq!(field.duty, 0);
//! ```

/// Alternator temperature sensor reading.
///
/// A shorted sensor is a deliberate installer signal requesting half-power
/// operation, so it is kept distinct from a missing sensor.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AltTemp {
    /// Valid reading in °C.
    Celsius(i16),
    /// Sensor not fitted or open circuit.
    #[default]
    Missing,
    /// Sensor input shorted.
    Shorted,
}

impl AltTemp {
    /// The reading in °C, if there is one.
    #[inline]
    pub const fn celsius(self) -> Option<i16> {
        match self {
            AltTemp::Celsius(t) => Some(t),
            _ => None,
        }
    }
}

/// One cycle's worth of measurements.
///
/// Amps are positive when charging. Temperatures the installation does not
/// have are `None` (or [`AltTemp::Missing`]).
#[derive(Clone, Copy, Debug, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Measurements {
    /// Battery terminal volts
    pub bat_volts: f32,
    /// Battery shunt amps
    pub bat_amps: f32,
    /// Alternator output volts
    pub alt_volts: f32,
    /// Alternator shunt amps
    pub alt_amps: f32,
    /// Alternator output watts
    pub alt_watts: f32,
    /// Alternator case temperature
    pub alt_temp: AltTemp,
    /// Battery temperature in °C
    pub bat_temp: Option<i16>,
    /// Field driver FET temperature in °C
    pub fet_temp: Option<i16>,
}

/// Which current/voltage monitor reported a bus error.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Monitor {
    /// Battery side monitor.
    Battery,
    /// Alternator side monitor.
    Alternator,
}

/// State of the measurement subsystem for this cycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SensorStatus {
    /// A fresh, consistent snapshot is available.
    Ready,
    /// Values are being refreshed; skip this cycle.
    Refreshing,
    /// A monitor chip failed to respond. Carries the bus error number.
    BusError(Monitor, u8),
}

/// Field winding driver.
///
/// Implement this for the PWM peripheral that drives the field FETs.
///
/// # Implementation Notes
///
/// - Duty is 0 (off) to 255 (full field)
/// - `set_duty` may be called every main-loop iteration; it must not block
///
/// # Example Implementation
///
/// ```rust,ignore
/// use alt_regulator::traits::FieldDriver;
///
/// struct MyField { /* timer handle */ }
///
/// impl FieldDriver for MyField {
///     type Error = ();
///
///     fn set_duty(&mut self, duty: u8) -> Result<(), ()> {
///         // Write the compare register...
///         Ok(())
///     }
/// }
/// ```
pub trait FieldDriver {
    /// Error type for driver operations.
    type Error;

    /// Set field duty, 0..=255.
    fn set_duty(&mut self, duty: u8) -> Result<(), Self::Error>;

    /// Convenience method to switch the field off.
    fn disable(&mut self) -> Result<(), Self::Error> {
        self.set_duty(0)
    }
}

/// Source of the per-cycle sensor snapshot.
///
/// Both methods are idempotent and non-blocking; acquisition happens
/// elsewhere.
pub trait SensorSource {
    /// Whether the snapshot can be used this cycle.
    fn status(&self) -> SensorStatus;

    /// Latest measurements.
    fn snapshot(&self) -> Measurements;
}

/// Stator pulse interval shared with the interrupt handler.
pub trait PulseSource {
    /// Take the latest averaged pulse interval in µs, clearing it.
    ///
    /// Returns `None` if no new interval was captured since the last call.
    fn take_interval_us(&self) -> Option<u32>;
}

/// Time source trait for `no_std` compatibility.
///
/// Provides monotonic time in milliseconds. On desktop, this can wrap
/// `std::time::Instant`. On embedded, use a hardware timer.
///
/// # Example
///
/// ```rust
/// use alt_regulator::traits::Clock;
/// use alt_regulator::hal::MockClock;
///
/// let mut clock = MockClock::new();
/// assert_eq!(clock.now_ms(), 0);
///
/// clock.advance(100);
/// assert_eq!(clock.now_ms(), 100);
/// ```
pub trait Clock {
    /// Returns current time in milliseconds since an arbitrary epoch.
    ///
    /// Must be monotonically increasing.
    fn now_ms(&self) -> u64;
}
