//! Instruments and their dispatch.
//!
//! Every instrument shares one contract: [`Sensor::init`] after each power
//! up and [`Sensor::read`] once per wake cycle, writing a fixed number of
//! bytes. Readings are IEEE-754 single precision values copied verbatim in
//! the machine's native byte order.
//!
//! The station's instrument set is closed, so dispatch goes through the
//! [`Instrument`] enum rather than trait objects. [`SensorRegistry`] keeps
//! them in wire order: the registry order is the payload order of every
//! stored frame and must never change for a given build.

pub mod analog;
pub mod climate;
pub mod spectral;

pub use analog::{AnalogChannel, Anemometer, Rtd};
pub use climate::Hdc1080;
pub use spectral::As7262;

use crate::error::{ErrorMask, FrameError};

/// Size of one serialized reading.
pub const FLOAT_BYTES: usize = core::mem::size_of::<f32>();

/// The instrument kinds fitted to the station.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SensorKind {
    /// Six channel visible light spectrometer
    Spectral,
    /// Air temperature and relative humidity
    HumidityTemp,
    /// Platinum RTD soil temperature sensor
    ResistanceTemp,
    /// Analog wind speed sensor
    Anemometer,
}

impl SensorKind {
    /// Bytes produced by one reading.
    pub const fn width(self) -> usize {
        match self {
            SensorKind::Spectral => spectral::CHANNELS * FLOAT_BYTES,
            SensorKind::HumidityTemp => 2 * FLOAT_BYTES,
            SensorKind::ResistanceTemp => FLOAT_BYTES,
            SensorKind::Anemometer => FLOAT_BYTES,
        }
    }

    /// Fault bit reported when initialization fails.
    pub const fn fault(self) -> ErrorMask {
        match self {
            SensorKind::Spectral => ErrorMask::SPECTRAL,
            SensorKind::HumidityTemp => ErrorMask::HUMIDITY_TEMP,
            SensorKind::ResistanceTemp => ErrorMask::RTD,
            SensorKind::Anemometer => ErrorMask::ANEMOMETER,
        }
    }

    pub const fn name(self) -> &'static str {
        match self {
            SensorKind::Spectral => "AS7262",
            SensorKind::HumidityTemp => "HDC1080",
            SensorKind::ResistanceTemp => "PT100",
            SensorKind::Anemometer => "Anemometer",
        }
    }
}

/// Init/read contract shared by every instrument.
pub trait Sensor {
    fn kind(&self) -> SensorKind;

    /// Bytes written by [`read`](Sensor::read).
    fn width(&self) -> usize {
        self.kind().width()
    }

    /// Bring the instrument up after power on. On failure the error holds
    /// this instrument's fault bit.
    fn init(&mut self) -> Result<(), ErrorMask>;

    /// Take one reading into `out` and return the number of bytes written.
    ///
    /// `out` holds at least [`width`](Sensor::width) bytes. A reading that
    /// fails at runtime is written as zeros.
    fn read(&mut self, out: &mut [u8]) -> usize;

    /// Whether the reading needs the excitation relay closed.
    fn needs_excitation(&self) -> bool {
        false
    }
}

/// Switch for the load that some readings depend on.
pub trait Excitation {
    fn energize(&mut self);
    fn de_energize(&mut self);
}

/// Stand-in for boards without an excitation relay.
pub struct NoExcitation;

impl Excitation for NoExcitation {
    fn energize(&mut self) {}

    fn de_energize(&mut self) {}
}

/// Copies readings into `out` in native byte order.
pub(crate) fn write_floats(out: &mut [u8], values: &[f32]) -> usize {
    for (chunk, value) in out.chunks_exact_mut(FLOAT_BYTES).zip(values) {
        chunk.copy_from_slice(&value.to_ne_bytes());
    }
    values.len() * FLOAT_BYTES
}

/// One of the station's instruments.
pub enum Instrument<S, H, R, A> {
    Spectral(S),
    HumidityTemp(H),
    ResistanceTemp(R),
    Anemometer(A),
}

impl<S, H, R, A> Sensor for Instrument<S, H, R, A>
where
    S: Sensor,
    H: Sensor,
    R: Sensor,
    A: Sensor,
{
    fn kind(&self) -> SensorKind {
        match self {
            Instrument::Spectral(s) => s.kind(),
            Instrument::HumidityTemp(s) => s.kind(),
            Instrument::ResistanceTemp(s) => s.kind(),
            Instrument::Anemometer(s) => s.kind(),
        }
    }

    fn width(&self) -> usize {
        match self {
            Instrument::Spectral(s) => s.width(),
            Instrument::HumidityTemp(s) => s.width(),
            Instrument::ResistanceTemp(s) => s.width(),
            Instrument::Anemometer(s) => s.width(),
        }
    }

    fn init(&mut self) -> Result<(), ErrorMask> {
        match self {
            Instrument::Spectral(s) => s.init(),
            Instrument::HumidityTemp(s) => s.init(),
            Instrument::ResistanceTemp(s) => s.init(),
            Instrument::Anemometer(s) => s.init(),
        }
    }

    fn read(&mut self, out: &mut [u8]) -> usize {
        match self {
            Instrument::Spectral(s) => s.read(out),
            Instrument::HumidityTemp(s) => s.read(out),
            Instrument::ResistanceTemp(s) => s.read(out),
            Instrument::Anemometer(s) => s.read(out),
        }
    }

    fn needs_excitation(&self) -> bool {
        match self {
            Instrument::Spectral(s) => s.needs_excitation(),
            Instrument::HumidityTemp(s) => s.needs_excitation(),
            Instrument::ResistanceTemp(s) => s.needs_excitation(),
            Instrument::Anemometer(s) => s.needs_excitation(),
        }
    }
}

/// Fixed, ordered set of instruments.
pub struct SensorRegistry<T, const N: usize> {
    sensors: [T; N],
}

impl<T: Sensor, const N: usize> SensorRegistry<T, N> {
    /// Creates a registry over a fixed instrument set.
    ///
    /// # Arguments
    ///
    /// * `sensors` - Instruments in frame order. Readings are written and
    ///   faults reported in this order.
    pub const fn new(sensors: [T; N]) -> Self {
        Self { sensors }
    }

    /// Payload bytes produced by [`read_all`](Self::read_all).
    pub fn payload_width(&self) -> usize {
        self.sensors.iter().map(Sensor::width).sum()
    }

    /// Initialize every instrument, in order.
    ///
    /// A failure never stops the sweep; the returned mask holds the fault
    /// bit of every instrument that failed.
    pub fn init_all(&mut self) -> ErrorMask {
        let mut errors = ErrorMask::OK;

        for sensor in self.sensors.iter_mut() {
            if let Err(fault) = sensor.init() {
                error!("{=str} init failed", sensor.kind().name());
                errors |= fault;
            }
        }

        errors
    }

    /// Read every instrument into `out`, in registry order.
    ///
    /// Readings that need excitation are bracketed by the relay: it closes
    /// right before the reading and opens as soon as the reading returns.
    pub fn read_all<E: Excitation>(
        &mut self,
        out: &mut [u8],
        excitation: &mut E,
    ) -> Result<usize, FrameError> {
        if out.len() < self.payload_width() {
            return Err(FrameError::Overflow);
        }

        let mut offset = 0;
        for sensor in self.sensors.iter_mut() {
            let slot = &mut out[offset..offset + sensor.width()];

            let written = if sensor.needs_excitation() {
                excitation.energize();
                let written = sensor.read(slot);
                excitation.de_energize();
                written
            } else {
                sensor.read(slot)
            };

            trace!("{=str}: {=usize} bytes", sensor.kind().name(), written);
            offset += written;
        }

        Ok(offset)
    }

    /// The registered instruments, in frame order.
    pub fn sensors(&self) -> &[T] {
        &self.sensors
    }
}
