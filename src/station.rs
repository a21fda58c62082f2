//! Station orchestration.
//!
//! Ties the clock, the instruments, their power and the frame store into
//! the two operations the firmware loop needs: [`Station::boot`] once after
//! reset and [`Station::run_cycle`] once per wake.
//!
//! # Cycle
//!
//! 1. Read the time (this also acknowledges the alarm, releasing the wake
//!    line).
//! 2. Power the instruments and let them settle.
//! 3. Re-initialize every instrument. Failures are logged and the cycle
//!    carries on; a dead instrument still occupies its slot in the frame.
//! 4. Read every instrument into the frame, closing the excitation relay
//!    only around the readings that need it.
//! 5. Seal the frame with its checksum and persist it.
//! 6. Cut instrument power.

use embedded_hal::delay::DelayNs;

use crate::clock::{ClockConfig, Ds3231, RegisterBus};
use crate::config::{FRAME_STORE, INIT_GRACE_MS};
use crate::error::{ErrorMask, FrameError};
use crate::frame::{Frame, FrameBuilder};
use crate::power::PowerControl;
use crate::sensors::{Sensor, SensorRegistry};
use crate::sleep::WakeSource;
use crate::storage::StorageSink;
use crate::time::UnixTimestamp;

/// Outcome of one wake cycle.
#[derive(Debug)]
pub struct Cycle<const CAP: usize> {
    /// The frame as handed to the store
    pub frame: Frame<CAP>,
    /// Faults seen during the cycle. Never fatal at this point.
    pub errors: ErrorMask,
}

pub struct Station<B, T, W, S, const N: usize> {
    clock: Ds3231<B>,
    sensors: SensorRegistry<T, N>,
    power: W,
    storage: S,
}

impl<B, T, W, S, const N: usize> Station<B, T, W, S, N>
where
    B: RegisterBus,
    T: Sensor,
    W: PowerControl,
    S: StorageSink,
{
    /// Assembles a station. Call [`boot`](Self::boot) before the first
    /// cycle.
    ///
    /// # Arguments
    ///
    /// * `clock` - RTC providing timestamps and the wake alarms
    /// * `sensors` - Instruments in frame order
    /// * `power` - Instrument rails and excitation relay
    /// * `storage` - Destination of every frame
    pub fn new(clock: Ds3231<B>, sensors: SensorRegistry<T, N>, power: W, storage: S) -> Self {
        Self {
            clock,
            sensors,
            power,
            storage,
        }
    }

    /// Frame length produced by [`run_cycle`](Self::run_cycle).
    pub fn frame_len(&self) -> usize {
        crate::frame::frame_len(self.sensors.payload_width())
    }

    /// Boot-time bring up.
    ///
    /// Programs the RTC alarms, optionally sets the time, mounts the store
    /// and runs a first initialization of every instrument. Every step is
    /// attempted; the returned mask holds every fault found. A non-empty
    /// mask is meant to halt the station.
    pub fn boot<D: DelayNs>(
        &mut self,
        clock: &ClockConfig,
        set_time: Option<UnixTimestamp>,
        delay: &mut D,
    ) -> ErrorMask {
        let mut errors = ErrorMask::OK;

        self.clock.configure(clock);
        if let Some(unix_time) = set_time {
            self.clock.set_time(unix_time);
        }
        // A flag left over from before the reset would hold the wake line low
        self.clock.clear_alarm_flags();

        if let Err(e) = self.storage.mount() {
            error!("storage mount failed: {}", e);
            errors |= ErrorMask::STORAGE;
        }

        self.power.power_up();
        errors |= self.sensors.init_all();
        delay.delay_ms(INIT_GRACE_MS);
        self.power.power_down();

        if errors.is_empty() {
            info!("boot complete");
        } else {
            error!("boot faults {=u8:#b}", errors.bits());
        }
        errors
    }

    /// Runs one acquisition cycle.
    ///
    /// Only a frame buffer too small for the instrument set fails the cycle.
    /// Instruments are powered down on every path.
    pub fn run_cycle<const CAP: usize>(&mut self) -> Result<Cycle<CAP>, FrameError> {
        let timestamp = self.clock.get_time();

        self.power.power_up();
        let mut errors = self.sensors.init_all();
        if !errors.is_empty() {
            warn!("instrument faults {=u8:#b}, continuing", errors.bits());
        }

        let frame = self.assemble::<CAP>(timestamp);
        if let Ok(frame) = &frame {
            match self.storage.append(FRAME_STORE, frame.as_bytes()) {
                Ok(()) => info!(
                    "frame {=u32}: {=usize} bytes, checksum {=u16:#06x}",
                    timestamp,
                    frame.len(),
                    frame.checksum()
                ),
                Err(e) => {
                    error!("frame {=u32} not stored: {}", timestamp, e);
                    errors |= ErrorMask::STORAGE;
                }
            }
        }

        self.power.power_down();

        Ok(Cycle {
            frame: frame?,
            errors,
        })
    }

    fn assemble<const CAP: usize>(
        &mut self,
        timestamp: UnixTimestamp,
    ) -> Result<Frame<CAP>, FrameError> {
        let mut builder = FrameBuilder::new(timestamp)?;
        let width = self.sensors.payload_width();

        let sensors = &mut self.sensors;
        let power = &mut self.power;
        builder.fill(width, |slot| sensors.read_all(slot, power))?;

        builder.finish()
    }

    pub fn clock(&mut self) -> &mut Ds3231<B> {
        &mut self.clock
    }

    pub fn storage(&mut self) -> &mut S {
        &mut self.storage
    }

    /// Takes the station apart again.
    pub fn release(self) -> (Ds3231<B>, SensorRegistry<T, N>, W, S) {
        (self.clock, self.sensors, self.power, self.storage)
    }
}

impl<B, T, W, S, const N: usize> WakeSource for Station<B, T, W, S, N>
where
    B: RegisterBus,
{
    /// Acknowledges any alarm that fired while the station was busy.
    fn acknowledge(&mut self) {
        self.clock.acknowledge();
    }
}
