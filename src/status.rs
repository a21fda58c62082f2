//! Status indicator.
//!
//! A single LED reports two things:
//!
//! - Busy: lit for the whole duration of a wake cycle.
//! - Fault: after a failed boot the highest priority fault is blinked
//!   forever as `n` short pulses followed by a pause.
//!
//! ```text
//!  on  off  on  off        on  off
//! [200][200][200][200][400][200][200]...
//! ```

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::OutputPin;

use crate::config::ERROR_BLINK_MS;
use crate::error::ErrorMask;

/// Busy and fault indicator on one active-high LED.
pub struct StatusLed<P, D> {
    led: P,
    delay: D,
}

impl<P: OutputPin, D: DelayNs> StatusLed<P, D> {
    /// Creates the indicator. The LED is left as the pin was configured.
    ///
    /// # Arguments
    ///
    /// * `led` - Active-high LED output
    /// * `delay` - Times the blink pulses
    pub fn new(led: P, delay: D) -> Self {
        Self { led, delay }
    }

    /// Lights the indicator while a wake cycle is processed.
    pub fn set_busy(&mut self, busy: bool) {
        let result = if busy {
            self.led.set_high()
        } else {
            self.led.set_low()
        };
        if result.is_err() {
            error!("status led write failed");
        }
    }

    /// Emits one repetition of the fault code of `errors`: one pulse per
    /// priority rank, then a pause of two blink periods. Returns the number
    /// of pulses.
    pub fn blink_sequence(&mut self, errors: ErrorMask) -> u8 {
        let count = errors.blink_code();

        for _ in 0..count {
            self.set_busy(true);
            self.delay.delay_ms(ERROR_BLINK_MS);
            self.set_busy(false);
            self.delay.delay_ms(ERROR_BLINK_MS);
        }
        self.delay.delay_ms(ERROR_BLINK_MS * 2);

        count
    }

    /// Repeats the fault code of `errors` until power is lost.
    pub fn halt(&mut self, errors: ErrorMask) -> ! {
        error!("halted, faults {=u8:#b} blink {=u8}", errors.bits(), errors.blink_code());

        loop {
            self.blink_sequence(errors);
        }
    }

    pub fn release(self) -> (P, D) {
        (self.led, self.delay)
    }
}
