//! Mock implementations for testing without hardware.
//!
//! This module provides test doubles for all hardware traits, enabling
//! development and testing of the regulator on desktop without an
//! alternator on the bench.
//!
//! # Available Mocks
//!
//! | Mock | Trait | Purpose |
//! |------|-------|---------|
//! | [`MockField`] | [`FieldDriver`] | Records every duty written |
//! | [`MockSensors`] | [`SensorSource`] | Settable measurement snapshot |
//! | [`MockPulses`] | [`PulseSource`] | Queued stator pulse intervals |
//! | [`MockClock`] | [`Clock`] | Controllable time source |
//!
//! # Example
//!
//! ```rust
//! use alt_regulator::{Config, Regulator};
//! use alt_regulator::hal::{MockField, MockPulses, MockSensors};
//!
//! let mut regulator = Regulator::new(MockField::new(), Config::default());
//! let sensors = MockSensors::new().with_bat_volts(12.6);
//! let pulses = MockPulses::new();
//!
//! regulator.tick(&sensors, &pulses, 0).unwrap();
//!
//! // First tick only leaves the idle state, with the field off
//! assert_eq!(regulator.field().duty, 0);
//! ```
//!
//! [`FieldDriver`]: crate::traits::FieldDriver
//! [`SensorSource`]: crate::traits::SensorSource
//! [`PulseSource`]: crate::traits::PulseSource
//! [`Clock`]: crate::traits::Clock

extern crate alloc;
use alloc::collections::VecDeque;
use alloc::vec::Vec;
use core::cell::RefCell;

use crate::traits::{
    AltTemp, Clock, FieldDriver, Measurements, PulseSource, SensorSource, SensorStatus,
};

// ============================================================================
// Field
// ============================================================================

/// Mock field driver for testing.
///
/// Records all duty changes for verification. Use the public fields to
/// inspect state after test operations.
///
/// # Example
///
/// ```rust
/// use alt_regulator::hal::MockField;
/// use alt_regulator::traits::FieldDriver;
///
/// let mut field = MockField::new();
/// field.set_duty(90).unwrap();
/// field.set_duty(120).unwrap();
///
/// assert_eq!(field.duty, 120);
/// assert_eq!(field.call_count, 2);
/// assert_eq!(field.history, [90, 120]);
/// ```
#[derive(Debug, Default)]
pub struct MockField {
    /// Last duty written.
    pub duty: u8,
    /// Number of times `set_duty` was called.
    pub call_count: usize,
    /// Every duty written, oldest first.
    pub history: Vec<u8>,
    /// When set, `set_duty` fails without changing anything.
    pub failing: bool,
}

impl MockField {
    /// Creates a new mock field at duty 0.
    pub fn new() -> Self {
        Self::default()
    }

    /// Highest duty ever written.
    pub fn peak(&self) -> u8 {
        self.history.iter().copied().max().unwrap_or(0)
    }
}

impl FieldDriver for MockField {
    type Error = ();

    fn set_duty(&mut self, duty: u8) -> Result<(), ()> {
        if self.failing {
            return Err(());
        }
        self.duty = duty;
        self.call_count += 1;
        self.history.push(duty);
        Ok(())
    }
}

// ============================================================================
// Sensors
// ============================================================================

/// Mock sensor snapshot.
///
/// Starts `Ready` with all readings zero and no temperature sensors.
///
/// # Example
///
/// ```rust
/// use alt_regulator::hal::MockSensors;
/// use alt_regulator::traits::{SensorSource, SensorStatus};
///
/// let mut sensors = MockSensors::new().with_bat_volts(13.1).with_alt_amps(40.0);
/// assert_eq!(sensors.snapshot().bat_volts, 13.1);
///
/// sensors.status = SensorStatus::Refreshing;
/// assert_eq!(sensors.status(), SensorStatus::Refreshing);
/// ```
#[derive(Debug, Clone)]
pub struct MockSensors {
    /// Status reported by [`SensorSource::status`].
    pub status: SensorStatus,
    /// Snapshot reported by [`SensorSource::snapshot`].
    pub values: Measurements,
}

impl Default for MockSensors {
    fn default() -> Self {
        Self::new()
    }
}

impl MockSensors {
    /// Ready, all zero.
    pub fn new() -> Self {
        Self {
            status: SensorStatus::Ready,
            values: Measurements::default(),
        }
    }

    /// Set battery volts
    pub fn with_bat_volts(mut self, volts: f32) -> Self {
        self.values.bat_volts = volts;
        self
    }

    /// Set battery amps
    pub fn with_bat_amps(mut self, amps: f32) -> Self {
        self.values.bat_amps = amps;
        self
    }

    /// Set alternator amps; watts follow from battery volts
    pub fn with_alt_amps(mut self, amps: f32) -> Self {
        self.values.alt_amps = amps;
        self.values.alt_watts = amps * self.values.bat_volts;
        self
    }

    /// Set the alternator sensor
    pub fn with_alt_temp(mut self, temp: AltTemp) -> Self {
        self.values.alt_temp = temp;
        self
    }

    /// Set the battery sensor
    pub fn with_bat_temp(mut self, celsius: Option<i16>) -> Self {
        self.values.bat_temp = celsius;
        self
    }

    /// Set the FET sensor
    pub fn with_fet_temp(mut self, celsius: Option<i16>) -> Self {
        self.values.fet_temp = celsius;
        self
    }

    /// Set the status
    pub fn with_status(mut self, status: SensorStatus) -> Self {
        self.status = status;
        self
    }
}

impl SensorSource for MockSensors {
    fn status(&self) -> SensorStatus {
        self.status
    }

    fn snapshot(&self) -> Measurements {
        self.values
    }
}

// ============================================================================
// Pulses
// ============================================================================

/// Mock stator pulse source.
///
/// Queued intervals come out in FIFO order, one per take.
///
/// # Example
///
/// ```rust
/// use alt_regulator::hal::MockPulses;
/// use alt_regulator::traits::PulseSource;
///
/// let pulses = MockPulses::new();
/// pulses.queue(500);
/// pulses.queue(450);
///
/// assert_eq!(pulses.take_interval_us(), Some(500));
/// assert_eq!(pulses.take_interval_us(), Some(450));
/// assert_eq!(pulses.take_interval_us(), None);
/// ```
#[derive(Debug, Default)]
pub struct MockPulses {
    queue: RefCell<VecDeque<u32>>,
}

impl MockPulses {
    /// Creates an empty pulse source.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue one averaged interval in µs.
    pub fn queue(&self, interval_us: u32) {
        self.queue.borrow_mut().push_back(interval_us);
    }

    /// Number of intervals still queued.
    pub fn pending(&self) -> usize {
        self.queue.borrow().len()
    }
}

impl PulseSource for MockPulses {
    fn take_interval_us(&self) -> Option<u32> {
        self.queue.borrow_mut().pop_front()
    }
}

// ============================================================================
// Clock
// ============================================================================

/// Millisecond time source for loop drivers and the bench simulator.
///
/// Time only moves when told to, so a whole charge cycle can be replayed
/// faster than real time.
///
/// # Example
///
/// ```rust
/// use alt_regulator::hal::MockClock;
/// use alt_regulator::traits::Clock;
///
/// let mut clock = MockClock::starting_at(15_000);
/// clock.advance(50);
/// assert_eq!(clock.now_ms(), 15_050);
///
/// clock.advance(u64::MAX);
/// assert_eq!(clock.now_ms(), u64::MAX);
/// ```
#[derive(Debug, Default)]
pub struct MockClock {
    now_ms: u64,
}

impl MockClock {
    /// Clock at 0 ms.
    pub fn new() -> Self {
        Self::default()
    }

    /// Clock at `ms`, e.g. to skip straight past warm-up.
    pub fn starting_at(ms: u64) -> Self {
        Self { now_ms: ms }
    }

    /// Jump to `ms`.
    pub fn set(&mut self, ms: u64) {
        self.now_ms = ms;
    }

    /// Move forward one loop interval; sticks at `u64::MAX`.
    pub fn advance(&mut self, ms: u64) {
        self.now_ms = self.now_ms.saturating_add(ms);
    }
}

impl Clock for MockClock {
    fn now_ms(&self) -> u64 {
        self.now_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::Monitor;

    // =========================================================================
    // MockField Tests
    // =========================================================================

    #[test]
    fn mock_field_default() {
        let field = MockField::new();
        assert_eq!(field.duty, 0);
        assert_eq!(field.call_count, 0);
        assert!(field.history.is_empty());
        assert_eq!(field.peak(), 0);
    }

    #[test]
    fn mock_field_records_history() {
        let mut field = MockField::new();
        field.set_duty(10).unwrap();
        field.set_duty(200).unwrap();
        field.disable().unwrap();
        assert_eq!(field.history, [10, 200, 0]);
        assert_eq!(field.peak(), 200);
        assert_eq!(field.call_count, 3);
    }

    #[test]
    fn mock_field_failing() {
        let mut field = MockField::new();
        field.set_duty(50).unwrap();
        field.failing = true;
        assert!(field.set_duty(100).is_err());
        assert_eq!(field.duty, 50);
        assert_eq!(field.call_count, 1);
    }

    // =========================================================================
    // MockSensors Tests
    // =========================================================================

    #[test]
    fn mock_sensors_default() {
        let sensors = MockSensors::new();
        assert_eq!(sensors.status(), SensorStatus::Ready);
        assert_eq!(sensors.snapshot(), Measurements::default());
    }

    #[test]
    fn mock_sensors_builders() {
        let sensors = MockSensors::new()
            .with_bat_volts(12.0)
            .with_alt_amps(50.0)
            .with_bat_amps(45.0)
            .with_alt_temp(AltTemp::Celsius(60))
            .with_bat_temp(Some(20))
            .with_fet_temp(Some(35))
            .with_status(SensorStatus::BusError(Monitor::Battery, 3));
        let m = sensors.snapshot();
        assert_eq!(m.alt_watts, 600.0);
        assert_eq!(m.bat_amps, 45.0);
        assert_eq!(m.alt_temp, AltTemp::Celsius(60));
        assert_eq!(m.bat_temp, Some(20));
        assert_eq!(m.fet_temp, Some(35));
        assert_eq!(sensors.status(), SensorStatus::BusError(Monitor::Battery, 3));
    }

    // =========================================================================
    // MockPulses Tests
    // =========================================================================

    #[test]
    fn mock_pulses_fifo() {
        let pulses = MockPulses::new();
        assert_eq!(pulses.take_interval_us(), None);
        pulses.queue(1);
        pulses.queue(2);
        assert_eq!(pulses.pending(), 2);
        assert_eq!(pulses.take_interval_us(), Some(1));
        assert_eq!(pulses.take_interval_us(), Some(2));
        assert_eq!(pulses.pending(), 0);
    }

    // =========================================================================
    // MockClock Tests
    // =========================================================================

    #[test]
    fn mock_clock_default() {
        let clock = MockClock::new();
        assert_eq!(clock.now_ms(), 0);
    }

    #[test]
    fn mock_clock_advance() {
        let mut clock = MockClock::new();
        clock.advance(500);
        assert_eq!(clock.now_ms(), 500);
        clock.advance(250);
        assert_eq!(clock.now_ms(), 750);
    }
}
