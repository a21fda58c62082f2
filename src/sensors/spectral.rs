//! AS7262 six channel visible spectral sensor.
//!
//! The chip exposes three physical I2C registers (status, write, read)
//! through which a bank of virtual registers is reached. Every virtual access
//! waits on the status handshake bits:
//!
//! - TX_VALID set: the chip has not consumed the last byte written yet.
//! - RX_VALID set: a byte is waiting in the read register.
//!
//! Measurements run in one-shot mode. The driver starts a conversion, polls
//! the DATA_RDY bit of the control register, then pulls the six calibrated
//! channels (violet, blue, green, yellow, orange, red) as big-endian IEEE-754
//! values spread over four virtual registers each.

use embedded_hal::delay::DelayNs;
use embedded_hal::i2c::I2c;

use super::{Sensor, SensorKind, write_floats};
use crate::error::ErrorMask;

/// 7-bit I2C address of the AS7262.
pub const AS7262_ADDRESS: u8 = 0x49;

/// Calibrated channels per reading.
pub const CHANNELS: usize = 6;

const REG_STATUS: u8 = 0x00;
const REG_WRITE: u8 = 0x01;
const REG_READ: u8 = 0x02;

const STATUS_RX_VALID: u8 = 1 << 0;
const STATUS_TX_VALID: u8 = 1 << 1;

/// Marks the byte written to the write register as a virtual address to
/// store into rather than load from.
const VIRTUAL_WRITE: u8 = 0x80;

const VREG_HW_VERSION: u8 = 0x00;
const VREG_CONTROL: u8 = 0x04;
const VREG_INTEGRATION_TIME: u8 = 0x05;
const VREG_LED_CONTROL: u8 = 0x07;
const VREG_CALIBRATED: u8 = 0x14;

/// Hardware version reported by an AS7262.
const HW_VERSION_AS7262: u8 = 0x40;

const CONTROL_DATA_RDY: u8 = 1 << 1;
/// Bank mode 3: one-shot conversion of all six channels
const CONTROL_ONE_SHOT: u8 = 0b11 << 2;
const CONTROL_GAIN_64X: u8 = 0b11 << 4;
const CONTROL_INT: u8 = 1 << 6;
const CONTROL_RESET: u8 = 1 << 7;

/// Integration time in 2.8 ms steps
const INTEGRATION_STEPS: u8 = 50;

/// Boot time after a soft reset.
const RESET_MS: u32 = 1_000;

pub struct As7262<I2C, D> {
    i2c: I2C,
    delay: D,
    /// Last value written to the control virtual register
    control: u8,
}

impl<I2C: I2c, D: DelayNs> As7262<I2C, D> {
    /// Creates a driver set up for 64x gain and interrupt on completion.
    /// The chip is not touched until [`configure`](Self::configure).
    ///
    /// # Arguments
    ///
    /// * `i2c` - Bus device the AS7262 answers on
    /// * `delay` - Used for the reset wait
    pub fn new(i2c: I2C, delay: D) -> Self {
        Self {
            i2c,
            delay,
            control: CONTROL_INT | CONTROL_GAIN_64X | CONTROL_ONE_SHOT,
        }
    }

    pub fn release(self) -> (I2C, D) {
        (self.i2c, self.delay)
    }

    /// Soft resets the chip and applies the measurement setup.
    ///
    /// Returns the hardware version the chip reported; only a genuine AS7262
    /// gets configured.
    pub fn begin(&mut self) -> Result<u8, I2C::Error> {
        self.virtual_write(VREG_CONTROL, self.control | CONTROL_RESET)?;
        self.delay.delay_ms(RESET_MS);

        let version = self.virtual_read(VREG_HW_VERSION)?;
        if version != HW_VERSION_AS7262 {
            return Ok(version);
        }

        // Indicator LED and driver LED off
        self.virtual_write(VREG_LED_CONTROL, 0x00)?;
        self.virtual_write(VREG_INTEGRATION_TIME, INTEGRATION_STEPS)?;
        self.virtual_write(VREG_CONTROL, self.control)?;

        Ok(version)
    }

    /// Clears DATA_RDY and starts a one-shot conversion.
    pub fn start_measurement(&mut self) -> Result<(), I2C::Error> {
        self.control = (self.control & !CONTROL_DATA_RDY) | CONTROL_ONE_SHOT;
        self.virtual_write(VREG_CONTROL, self.control)
    }

    /// Whether the last conversion finished.
    pub fn data_ready(&mut self) -> Result<bool, I2C::Error> {
        Ok(self.virtual_read(VREG_CONTROL)? & CONTROL_DATA_RDY != 0)
    }

    /// Calibrated channel values in µW/cm², violet first.
    pub fn calibrated_values(&mut self) -> Result<[f32; CHANNELS], I2C::Error> {
        let mut values = [0.0; CHANNELS];

        for (channel, value) in values.iter_mut().enumerate() {
            let base = VREG_CALIBRATED + (channel * 4) as u8;
            let mut raw = [0u8; 4];
            for (offset, byte) in raw.iter_mut().enumerate() {
                *byte = self.virtual_read(base + offset as u8)?;
            }
            *value = f32::from_be_bytes(raw);
        }

        Ok(values)
    }

    /// One complete one-shot measurement.
    ///
    /// The DATA_RDY poll has no timeout: a chip that keeps acknowledging but
    /// never completes the conversion blocks the caller forever.
    pub fn measure(&mut self) -> Result<[f32; CHANNELS], I2C::Error> {
        self.start_measurement()?;
        while !self.data_ready()? {}
        self.calibrated_values()
    }

    /// Writes one virtual register through the physical write register.
    ///
    /// # Arguments
    ///
    /// * `register` - Virtual register address, below 0x80
    /// * `value` - Byte to store
    pub fn virtual_write(&mut self, register: u8, value: u8) -> Result<(), I2C::Error> {
        self.wait_tx_ready()?;
        self.write_physical(REG_WRITE, register | VIRTUAL_WRITE)?;
        self.wait_tx_ready()?;
        self.write_physical(REG_WRITE, value)
    }

    /// Reads one virtual register.
    ///
    /// # Returns
    ///
    /// The register value, once the chip reports it as valid
    pub fn virtual_read(&mut self, register: u8) -> Result<u8, I2C::Error> {
        // Drop any stale byte left in the read register
        if self.read_physical(REG_STATUS)? & STATUS_RX_VALID != 0 {
            self.read_physical(REG_READ)?;
        }

        self.wait_tx_ready()?;
        self.write_physical(REG_WRITE, register)?;

        while self.read_physical(REG_STATUS)? & STATUS_RX_VALID == 0 {}
        self.read_physical(REG_READ)
    }

    fn wait_tx_ready(&mut self) -> Result<(), I2C::Error> {
        while self.read_physical(REG_STATUS)? & STATUS_TX_VALID != 0 {}
        Ok(())
    }

    fn read_physical(&mut self, register: u8) -> Result<u8, I2C::Error> {
        let mut value = [0u8];
        self.i2c
            .write_read(AS7262_ADDRESS, &[register], &mut value)?;
        Ok(value[0])
    }

    fn write_physical(&mut self, register: u8, value: u8) -> Result<(), I2C::Error> {
        self.i2c.write(AS7262_ADDRESS, &[register, value])
    }
}

impl<I2C: I2c, D: DelayNs> Sensor for As7262<I2C, D> {
    fn kind(&self) -> SensorKind {
        SensorKind::Spectral
    }

    fn init(&mut self) -> Result<(), ErrorMask> {
        match self.begin() {
            Ok(HW_VERSION_AS7262) => Ok(()),
            Ok(version) => {
                error!("AS7262: unexpected hardware version {=u8:#x}", version);
                Err(ErrorMask::SPECTRAL)
            }
            Err(_) => {
                error!("AS7262: sensor unreachable");
                Err(ErrorMask::SPECTRAL)
            }
        }
    }

    fn read(&mut self, out: &mut [u8]) -> usize {
        let values = self.measure().unwrap_or_else(|_| {
            warn!("AS7262: measurement failed");
            [0.0; CHANNELS]
        });

        debug!(
            "AS7262: {=f32} {=f32} {=f32} {=f32} {=f32} {=f32}",
            values[0], values[1], values[2], values[3], values[4], values[5]
        );
        write_floats(out, &values)
    }
}
