//! Stator pulse capture and engine RPM.
//!
//! The stator interrupt handler calls [`PulseCapture::on_pulse`], which only
//! counts pulses and timestamps every hundredth one. The main loop turns the
//! averaged interval into RPM with [`Tachometer::update`]. The interval and
//! the "new pulse" flag are the only data shared with the interrupt, and
//! both are read and cleared inside a critical section.
//!
//! # Example
//!
//! ```rust
//! use alt_regulator::config::SystemConfig;
//! use alt_regulator::tach::{PulseCapture, Tachometer, RPM_IRQ_AVERAGING};
//!
//! static CAPTURE: PulseCapture = PulseCapture::new();
//!
//! // Interrupt side: 100 pulses, 500 µs apart
//! for i in 1..=RPM_IRQ_AVERAGING {
//!     CAPTURE.on_pulse(i * 500);
//! }
//!
//! // Main loop side
//! let cfg = SystemConfig::default();
//! let mut tach = Tachometer::new(cfg.tach_floor);
//! tach.update(&CAPTURE, 100, 0, &cfg);
//! assert!(tach.rpm() > 0);
//! ```

use core::cell::Cell;

use critical_section::Mutex;

use crate::config::{SystemConfig, TachFloor};
use crate::traits::PulseSource;

/// Pulses averaged into one interval.
pub const RPM_IRQ_AVERAGING: u32 = 100;
/// Longest expected gap between two pulses, ms.
pub const IRQ_TIMEOUT_MS: u64 = 10;
/// With no new interval for this long the RPM reads zero.
pub const RPM_TIMEOUT_MS: u64 = IRQ_TIMEOUT_MS * RPM_IRQ_AVERAGING as u64;
/// Upper bound on the tach-sync field floor.
pub const MAX_TACH_PWM: u8 = 75;

#[derive(Clone, Copy, Default)]
struct Capture {
    prior_us: u32,
    count: u32,
    interval_us: u32,
    new_pulse: bool,
}

/// Interrupt-shared pulse interval.
///
/// `new` is `const` so the capture can live in a `static` next to the
/// interrupt handler.
pub struct PulseCapture {
    inner: Mutex<Cell<Capture>>,
}

impl Default for PulseCapture {
    fn default() -> Self {
        Self::new()
    }
}

impl PulseCapture {
    /// Empty capture.
    pub const fn new() -> Self {
        Self {
            inner: Mutex::new(Cell::new(Capture {
                prior_us: 0,
                count: 0,
                interval_us: 0,
                new_pulse: false,
            })),
        }
    }

    /// Call from the stator interrupt with the current µs timer value.
    pub fn on_pulse(&self, now_us: u32) {
        critical_section::with(|cs| {
            let cell = self.inner.borrow(cs);
            let mut c = cell.get();
            c.count += 1;
            if c.count >= RPM_IRQ_AVERAGING {
                c.interval_us = now_us.wrapping_sub(c.prior_us);
                c.prior_us = now_us;
                c.count = 0;
            }
            c.new_pulse = true;
            cell.set(c);
        });
    }

    /// Read and clear the "a pulse arrived" flag. Used to line sampling up
    /// with the stator waveform.
    pub fn take_new_pulse(&self) -> bool {
        critical_section::with(|cs| {
            let cell = self.inner.borrow(cs);
            let mut c = cell.get();
            let seen = c.new_pulse;
            c.new_pulse = false;
            cell.set(c);
            seen
        })
    }
}

impl PulseSource for PulseCapture {
    fn take_interval_us(&self) -> Option<u32> {
        critical_section::with(|cs| {
            let cell = self.inner.borrow(cs);
            let mut c = cell.get();
            let interval = c.interval_us;
            c.interval_us = 0;
            cell.set(c);
            (interval != 0).then_some(interval)
        })
    }
}

/// Main-loop RPM calculation and tach-sync floor tracking.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Tachometer {
    rpm: u32,
    last_calc_ms: u64,
    threshold: Option<u8>,
}

impl Tachometer {
    /// Starts at zero RPM. A fixed floor is known up front; an automatic one
    /// is learned from the first readings.
    pub fn new(floor: TachFloor) -> Self {
        let threshold = match floor {
            TachFloor::Pwm(n) => Some(n.min(MAX_TACH_PWM)),
            TachFloor::Auto | TachFloor::Off => None,
        };
        Self {
            rpm: 0,
            last_calc_ms: 0,
            threshold,
        }
    }

    /// Engine RPM, 0 when unknown.
    #[inline]
    pub fn rpm(&self) -> u32 {
        self.rpm
    }

    /// Lowest field PWM known to keep stator pulses coming.
    #[inline]
    pub fn threshold(&self) -> Option<u8> {
        self.threshold
    }

    /// Consume a pending interval and recompute RPM.
    ///
    /// `pwm` is the working field value, used to learn the floor when the
    /// floor policy is automatic.
    pub fn update(&mut self, pulses: &impl PulseSource, now_ms: u64, pwm: i32, cfg: &SystemConfig) {
        if now_ms.saturating_sub(self.last_calc_ms) > RPM_TIMEOUT_MS {
            self.rpm = 0;
            self.last_calc_ms = now_ms;
            return;
        }

        let Some(interval) = pulses.take_interval_us().filter(|&i| i != 0) else {
            return;
        };
        self.last_calc_ms = now_ms;

        let per_minute = 60_000_000 / u64::from(interval) * u64::from(RPM_IRQ_AVERAGING);
        let divisor = f32::from(cfg.alternator_poles) * cfg.drive_ratio / 2.0;
        let rpm = (per_minute as f32 / divisor) as i64;
        if rpm <= 0 {
            return;
        }
        self.rpm = u32::try_from(rpm).unwrap_or(u32::MAX);

        if cfg.tach_floor == TachFloor::Auto && self.threshold.map_or(true, |t| pwm < i32::from(t)) {
            self.threshold = Some(pwm.clamp(0, i32::from(u8::MAX)) as u8);
        }
        if let Some(t) = self.threshold {
            self.threshold = Some(t.min(MAX_TACH_PWM));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::MockPulses;

    fn cfg(floor: TachFloor) -> SystemConfig {
        SystemConfig::default().with_drive(12, 2.0).with_tach_floor(floor)
    }

    // =========================================================================
    // PulseCapture
    // =========================================================================

    #[test]
    fn capture_averages_every_hundred() {
        let cap = PulseCapture::new();
        for i in 1..RPM_IRQ_AVERAGING {
            cap.on_pulse(1_000 + i * 10);
        }
        assert_eq!(cap.take_interval_us(), None);
        assert!(cap.take_new_pulse());
        assert!(!cap.take_new_pulse());

        cap.on_pulse(2_000);
        assert_eq!(cap.take_interval_us(), Some(2_000));
        assert_eq!(cap.take_interval_us(), None);

        for i in 1..=RPM_IRQ_AVERAGING {
            cap.on_pulse(2_000 + i * 30);
        }
        assert_eq!(cap.take_interval_us(), Some(3_000));
    }

    #[test]
    fn capture_survives_timer_wrap() {
        let cap = PulseCapture::new();
        for _ in 0..RPM_IRQ_AVERAGING {
            cap.on_pulse(u32::MAX - 99);
        }
        cap.take_interval_us();
        for _ in 0..RPM_IRQ_AVERAGING {
            cap.on_pulse(400);
        }
        assert_eq!(cap.take_interval_us(), Some(500));
    }

    // =========================================================================
    // Tachometer
    // =========================================================================

    #[test]
    fn rpm_from_interval() {
        let c = cfg(TachFloor::Off);
        let pulses = MockPulses::new();
        let mut tach = Tachometer::new(c.tach_floor);

        // 100 pulses in 50 ms → 120 000 pulses/min, / (12 × 2 / 2)
        pulses.queue(50_000);
        tach.update(&pulses, 10, 0, &c);
        assert_eq!(tach.rpm(), 10_000);
        assert_eq!(tach.threshold(), None);
    }

    #[test]
    fn no_interval_keeps_last_reading() {
        let c = cfg(TachFloor::Off);
        let pulses = MockPulses::new();
        let mut tach = Tachometer::new(c.tach_floor);
        pulses.queue(50_000);
        tach.update(&pulses, 10, 0, &c);
        tach.update(&pulses, 500, 0, &c);
        assert_eq!(tach.rpm(), 10_000);
    }

    #[test]
    fn timeout_zeroes_rpm() {
        let c = cfg(TachFloor::Off);
        let pulses = MockPulses::new();
        let mut tach = Tachometer::new(c.tach_floor);
        pulses.queue(50_000);
        tach.update(&pulses, 10, 0, &c);
        tach.update(&pulses, 10 + RPM_TIMEOUT_MS, 0, &c);
        assert_eq!(tach.rpm(), 10_000);
        tach.update(&pulses, 11 + RPM_TIMEOUT_MS, 0, &c);
        assert_eq!(tach.rpm(), 0);
    }

    #[test]
    fn auto_floor_tracks_lowest_pwm() {
        let c = cfg(TachFloor::Auto);
        let pulses = MockPulses::new();
        let mut tach = Tachometer::new(c.tach_floor);
        assert_eq!(tach.threshold(), None);

        for (t, pwm) in [(10, 120), (20, 40), (30, 60)] {
            pulses.queue(50_000);
            tach.update(&pulses, t, pwm, &c);
        }
        // first reading capped, then the lower value wins, higher ignored
        assert_eq!(tach.threshold(), Some(40));
    }

    #[test]
    fn auto_floor_capped() {
        let c = cfg(TachFloor::Auto);
        let pulses = MockPulses::new();
        let mut tach = Tachometer::new(c.tach_floor);
        pulses.queue(50_000);
        tach.update(&pulses, 10, 200, &c);
        assert_eq!(tach.threshold(), Some(MAX_TACH_PWM));
    }

    #[test]
    fn fixed_floor_capped_up_front() {
        assert_eq!(Tachometer::new(TachFloor::Pwm(20)).threshold(), Some(20));
        assert_eq!(Tachometer::new(TachFloor::Pwm(200)).threshold(), Some(MAX_TACH_PWM));
        assert_eq!(Tachometer::new(TachFloor::Off).threshold(), None);
    }
}
