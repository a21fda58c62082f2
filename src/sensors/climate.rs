//! HDC1080 air temperature and relative humidity sensor.

use embedded_hal::delay::DelayNs;
use embedded_hal::i2c::I2c;

use super::{Sensor, SensorKind, write_floats};
use crate::error::ErrorMask;

pub const HDC1080_ADDRESS: u8 = 0x40;

const REG_TEMPERATURE: u8 = 0x00;
const REG_HUMIDITY: u8 = 0x01;
const REG_CONFIG: u8 = 0x02;
const REG_DEVICE_ID: u8 = 0xFF;

const DEVICE_ID: u16 = 0x1050;

/// Separate acquisitions, heater off, 11-bit temperature (TRES) and 11-bit
/// humidity (HRES).
const CONFIG_11BIT: u16 = (1 << 10) | (0b01 << 8);

/// Conversion time covering both 11-bit results.
const CONVERSION_MS: u32 = 9;
/// Settle time after a configuration write.
const CONFIG_MS: u32 = 10;

/// HDC1080 driver over a blocking I2C bus.
pub struct Hdc1080<I2C, D> {
    i2c: I2C,
    delay: D,
}

impl<I2C: I2c, D: DelayNs> Hdc1080<I2C, D> {
    /// Creates a driver without touching the chip.
    ///
    /// # Arguments
    ///
    /// * `i2c` - Bus device the HDC1080 answers on
    /// * `delay` - Used for the configuration and conversion waits
    pub fn new(i2c: I2C, delay: D) -> Self {
        Self { i2c, delay }
    }

    pub fn release(self) -> (I2C, D) {
        (self.i2c, self.delay)
    }

    /// Selects 11-bit temperature and humidity resolution with separate
    /// acquisition, then waits for the chip to apply it.
    ///
    /// # Returns
    ///
    /// The bus error if the configuration write was not acknowledged
    pub fn configure(&mut self) -> Result<(), I2C::Error> {
        let [msb, lsb] = CONFIG_11BIT.to_be_bytes();
        self.i2c.write(HDC1080_ADDRESS, &[REG_CONFIG, msb, lsb])?;
        self.delay.delay_ms(CONFIG_MS);
        Ok(())
    }

    /// Reads the device ID register.
    ///
    /// # Returns
    ///
    /// The raw ID, `0x1050` on a genuine HDC1080
    pub fn device_id(&mut self) -> Result<u16, I2C::Error> {
        self.read_register(REG_DEVICE_ID)
    }

    /// Air temperature in °C.
    pub fn temperature(&mut self) -> Result<f32, I2C::Error> {
        let raw = self.read_register(REG_TEMPERATURE)?;
        Ok(f32::from(raw) / 65_536.0 * 165.0 - 40.0)
    }

    /// Relative humidity in %.
    pub fn humidity(&mut self) -> Result<f32, I2C::Error> {
        let raw = self.read_register(REG_HUMIDITY)?;
        Ok(f32::from(raw) / 65_536.0 * 100.0)
    }

    /// Sets the register pointer, waits out the conversion and reads the
    /// 16-bit big-endian result.
    fn read_register(&mut self, pointer: u8) -> Result<u16, I2C::Error> {
        let mut raw = [0u8; 2];
        self.i2c.write(HDC1080_ADDRESS, &[pointer])?;
        self.delay.delay_ms(CONVERSION_MS);
        self.i2c.read(HDC1080_ADDRESS, &mut raw)?;
        Ok(u16::from_be_bytes(raw))
    }
}

impl<I2C: I2c, D: DelayNs> Sensor for Hdc1080<I2C, D> {
    fn kind(&self) -> SensorKind {
        SensorKind::HumidityTemp
    }

    fn init(&mut self) -> Result<(), ErrorMask> {
        let id = self.configure().and_then(|_| self.device_id());

        match id {
            Ok(DEVICE_ID) => Ok(()),
            Ok(id) => {
                error!("HDC1080: unexpected device id {=u16:#x}", id);
                Err(ErrorMask::HUMIDITY_TEMP)
            }
            Err(_) => {
                error!("HDC1080: sensor unreachable");
                Err(ErrorMask::HUMIDITY_TEMP)
            }
        }
    }

    fn read(&mut self, out: &mut [u8]) -> usize {
        let temperature = self.temperature().unwrap_or_else(|_| {
            warn!("HDC1080: temperature read failed");
            0.0
        });
        let humidity = self.humidity().unwrap_or_else(|_| {
            warn!("HDC1080: humidity read failed");
            0.0
        });

        debug!("HDC1080: {=f32} C {=f32} %RH", temperature, humidity);
        write_floats(out, &[temperature, humidity])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::power::tests::ElapsedDelay;
    use embedded_hal::i2c::ErrorKind;
    use embedded_hal_mock::eh1::i2c::{Mock as I2cMock, Transaction};

    fn register_read(pointer: u8, raw: u16) -> [Transaction; 2] {
        [
            Transaction::write(HDC1080_ADDRESS, vec![pointer]),
            Transaction::read(HDC1080_ADDRESS, raw.to_be_bytes().to_vec()),
        ]
    }

    fn configure() -> Transaction {
        Transaction::write(HDC1080_ADDRESS, vec![REG_CONFIG, 0x05, 0x00])
    }

    #[test]
    fn test_init_checks_device_id() {
        let mut expectations = vec![configure()];
        expectations.extend(register_read(REG_DEVICE_ID, DEVICE_ID));
        let mut i2c = I2cMock::new(&expectations);
        let mut sensor = Hdc1080::new(i2c.clone(), ElapsedDelay::default());

        assert_eq!(sensor.init(), Ok(()));
        i2c.done();
    }

    #[test]
    fn test_init_wrong_device() {
        let mut expectations = vec![configure()];
        expectations.extend(register_read(REG_DEVICE_ID, 0x1000));
        let mut i2c = I2cMock::new(&expectations);
        let mut sensor = Hdc1080::new(i2c.clone(), ElapsedDelay::default());

        assert_eq!(sensor.init(), Err(ErrorMask::HUMIDITY_TEMP));
        i2c.done();
    }

    #[test]
    fn test_init_unreachable() {
        let mut i2c = I2cMock::new(&[configure().with_error(ErrorKind::Other)]);
        let mut sensor = Hdc1080::new(i2c.clone(), ElapsedDelay::default());

        assert_eq!(sensor.init(), Err(ErrorMask::HUMIDITY_TEMP));
        i2c.done();
    }

    #[test]
    fn test_read_converts_both_channels() {
        let mut expectations = register_read(REG_TEMPERATURE, 0x8000).to_vec();
        expectations.extend(register_read(REG_HUMIDITY, 0x4000));
        let mut i2c = I2cMock::new(&expectations);
        let mut delay = ElapsedDelay::default();
        let mut sensor = Hdc1080::new(i2c.clone(), &mut delay);
        let mut out = [0u8; 8];

        assert_eq!(sensor.read(&mut out), 8);
        drop(sensor);

        assert_eq!(out[..4], 42.5f32.to_ne_bytes());
        assert_eq!(out[4..], 25.0f32.to_ne_bytes());
        assert_eq!(delay.elapsed_ms(), 2 * u64::from(CONVERSION_MS));
        i2c.done();
    }

    #[test]
    fn test_read_failure_writes_zero() {
        let expectations = [
            Transaction::write(HDC1080_ADDRESS, vec![REG_TEMPERATURE]).with_error(ErrorKind::Other),
            Transaction::write(HDC1080_ADDRESS, vec![REG_HUMIDITY]),
            Transaction::read(HDC1080_ADDRESS, 0x8000u16.to_be_bytes().to_vec()),
        ];
        let mut i2c = I2cMock::new(&expectations);
        let mut sensor = Hdc1080::new(i2c.clone(), ElapsedDelay::default());
        let mut out = [0xFFu8; 8];

        sensor.read(&mut out);

        assert_eq!(out[..4], 0.0f32.to_ne_bytes());
        assert_eq!(out[4..], 50.0f32.to_ne_bytes());
        i2c.done();
    }
}
