//! Field driver on an `embedded-hal` PWM channel.
//!
//! The field FETs are switched by one PWM output. Any HAL that implements
//! [`SetDutyCycle`] works; the regulator's 0..=255 duty is mapped onto the
//! channel's full range.
//!
//! # Hardware Setup
//!
//! - PWM output → field FET gate driver
//! - A few hundred Hz is typical for a field winding; the inductance does
//!   the smoothing
//!
//! # Example
//!
//! ```ignore
//! use alt_regulator::hal::PwmField;
//! use alt_regulator::{Config, Regulator};
//!
//! let channel = /* HAL PWM channel implementing SetDutyCycle */;
//! let mut regulator = Regulator::new(PwmField::new(channel), Config::default());
//! ```

use embedded_hal::pwm::SetDutyCycle;

use crate::traits::FieldDriver;

/// Full-field duty on the regulator's scale.
const FULL_FIELD: u16 = 255;

/// [`FieldDriver`] over a single PWM channel.
pub struct PwmField<P> {
    channel: P,
    duty: u8,
}

impl<P: SetDutyCycle> PwmField<P> {
    /// Wrap a PWM channel. The field is not touched until the first write.
    pub fn new(channel: P) -> Self {
        Self { channel, duty: 0 }
    }

    /// Last duty successfully written.
    pub fn duty(&self) -> u8 {
        self.duty
    }

    /// Release the channel.
    pub fn into_inner(self) -> P {
        self.channel
    }
}

impl<P: SetDutyCycle> FieldDriver for PwmField<P> {
    type Error = P::Error;

    fn set_duty(&mut self, duty: u8) -> Result<(), P::Error> {
        if duty == 0 {
            self.channel.set_duty_cycle_fully_off()?;
        } else {
            self.channel
                .set_duty_cycle_fraction(u16::from(duty), FULL_FIELD)?;
        }
        self.duty = duty;
        Ok(())
    }
}
