//! Instruments read through the ADC.
//!
//! Both the PT100 front end and the anemometer are ratiometric analog
//! outputs calibrated against 10-bit conversions. Neither can be queried, so
//! their initialization always succeeds.

use super::{Sensor, SensorKind, write_floats};
use crate::error::ErrorMask;

/// PT100 slope, °C per count.
pub const RTD_C1: f32 = 0.151_685_4;
/// PT100 count at 0 °C.
pub const RTD_C2: f32 = 551.0;

/// Anemometer slope, m/s per count.
pub const ANEMOMETER_C1: f32 = 0.098_974;
/// Anemometer offset in m/s.
pub const ANEMOMETER_C2: f32 = 8.1;

/// One 10-bit ADC input.
pub trait AnalogChannel {
    fn sample(&mut self) -> u16;
}

impl<F: FnMut() -> u16> AnalogChannel for F {
    fn sample(&mut self) -> u16 {
        self()
    }
}

pub fn rtd_temperature(raw: u16) -> f32 {
    RTD_C1 * (f32::from(raw) - RTD_C2)
}

/// Wind speed in m/s. Counts below the offset read as calm.
pub fn wind_speed(raw: u16) -> f32 {
    (f32::from(raw) * ANEMOMETER_C1 - ANEMOMETER_C2).max(0.0)
}

/// PT100 soil temperature sensor.
pub struct Rtd<A> {
    channel: A,
}

impl<A: AnalogChannel> Rtd<A> {
    /// # Arguments
    ///
    /// * `channel` - ADC input wired to the front end output
    pub fn new(channel: A) -> Self {
        Self { channel }
    }
}

impl<A: AnalogChannel> Sensor for Rtd<A> {
    fn kind(&self) -> SensorKind {
        SensorKind::ResistanceTemp
    }

    fn init(&mut self) -> Result<(), ErrorMask> {
        Ok(())
    }

    fn read(&mut self, out: &mut [u8]) -> usize {
        let raw = self.channel.sample();
        let temperature = rtd_temperature(raw);

        debug!("PT100: {=u16} -> {=f32} C", raw, temperature);
        write_floats(out, &[temperature])
    }
}

/// Wind speed sensor. Its output is only valid while the excitation relay
/// is closed.
pub struct Anemometer<A> {
    channel: A,
}

impl<A: AnalogChannel> Anemometer<A> {
    pub fn new(channel: A) -> Self {
        Self { channel }
    }
}

impl<A: AnalogChannel> Sensor for Anemometer<A> {
    fn kind(&self) -> SensorKind {
        SensorKind::Anemometer
    }

    fn init(&mut self) -> Result<(), ErrorMask> {
        Ok(())
    }

    fn read(&mut self, out: &mut [u8]) -> usize {
        let raw = self.channel.sample();
        let speed = wind_speed(raw);

        debug!("Anemometer: {=u16} -> {=f32} m/s", raw, speed);
        write_floats(out, &[speed])
    }

    fn needs_excitation(&self) -> bool {
        true
    }
}
