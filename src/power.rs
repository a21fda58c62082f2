//! Power sequencing for the measurement instruments.
//!
//! The low-power instruments (spectral, humidity/temperature and RTD front
//! end) hang off individual power rails driven high to enable. The wind
//! sensor excitation is the heaviest load and sits behind an active-low
//! load-switch relay that is switched on its own, only around the reading
//! that needs it.
//!
//! # Ordering
//!
//! - Rails are asserted together, then the sequencer blocks for the settle
//!   time before any instrument is touched.
//! - The relay is energized right before the dependent reading and released
//!   right after it, before any other processing.

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::OutputPin;

use crate::config::{INSTRUMENT_SETTLE_MS, RELAY_SETTLE_MS};
use crate::sensors::Excitation;

/// Sequencer for the instrument rails and the excitation relay.
pub struct PowerSequencer<P, D, const N: usize> {
    /// Active-high enables, one per instrument rail
    rails: [P; N],
    /// Active-low enable for the excitation load switch
    relay_n: P,
    delay: D,
    instruments_on: bool,
    relay_on: bool,
}

impl<P: OutputPin, D: DelayNs, const N: usize> PowerSequencer<P, D, N> {
    /// Creates a new sequencer. Nothing is driven until [`init`](Self::init).
    pub fn new(rails: [P; N], relay_n: P, delay: D) -> Self {
        Self {
            rails,
            relay_n,
            delay,
            instruments_on: false,
            relay_on: false,
        }
    }

    /// Drives every output to its unpowered level.
    ///
    /// Should be called once during system initialization.
    pub fn init(&mut self) {
        self.deactivate_relay();
        self.deactivate_instruments();
    }

    /// Powers every instrument rail and waits for the supplies to settle.
    pub fn activate_instruments(&mut self) {
        for rail in self.rails.iter_mut() {
            drive(rail, true);
        }
        self.instruments_on = true;

        debug!("instruments powered, settling {=u32} ms", INSTRUMENT_SETTLE_MS);
        self.delay.delay_ms(INSTRUMENT_SETTLE_MS);
    }

    /// Cuts every instrument rail.
    pub fn deactivate_instruments(&mut self) {
        for rail in self.rails.iter_mut() {
            drive(rail, false);
        }
        self.instruments_on = false;
    }

    /// Energizes the excitation relay and waits for the sensor to settle.
    pub fn activate_relay(&mut self) {
        drive(&mut self.relay_n, false);
        self.relay_on = true;
        self.delay.delay_ms(RELAY_SETTLE_MS);
    }

    /// Releases the excitation relay immediately.
    pub fn deactivate_relay(&mut self) {
        drive(&mut self.relay_n, true);
        self.relay_on = false;
    }

    /// Whether the instrument rails are currently enabled.
    pub fn instruments_powered(&self) -> bool {
        self.instruments_on
    }

    pub fn relay_energized(&self) -> bool {
        self.relay_on
    }
}

/// Instrument supply control used by the acquisition cycle.
pub trait PowerControl: Excitation {
    /// Powers the instruments; returns once their supplies have settled.
    fn power_up(&mut self);

    /// Releases the relay and cuts every instrument rail.
    fn power_down(&mut self);
}

impl<P: OutputPin, D: DelayNs, const N: usize> PowerControl for PowerSequencer<P, D, N> {
    fn power_up(&mut self) {
        self.activate_instruments();
    }

    fn power_down(&mut self) {
        self.deactivate_relay();
        self.deactivate_instruments();
    }
}

impl<P: OutputPin, D: DelayNs, const N: usize> Excitation for PowerSequencer<P, D, N> {
    fn energize(&mut self) {
        self.activate_relay();
    }

    fn de_energize(&mut self) {
        self.deactivate_relay();
    }
}

/// Sets a GPIO level. Push-pull outputs on the target cannot fail, so an
/// error is only logged.
fn drive<P: OutputPin>(pin: &mut P, high: bool) {
    let result = if high { pin.set_high() } else { pin.set_low() };
    if result.is_err() {
        error!("gpio write failed");
    }
}
