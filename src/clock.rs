//! DS3231 real time clock driver.
//!
//! All clock state lives in the chip's register file. The driver only wraps
//! a byte-register collaborator ([`RegisterBus`]) and translates between
//! Unix timestamps and the BCD calendar/alarm registers.
//!
//! # Register map
//!
//! | Address     | Content                                    |
//! |-------------|--------------------------------------------|
//! | 0x00..=0x06 | seconds, minutes, hours, weekday, date, month, year |
//! | 0x07..=0x0A | alarm 1: seconds, minutes, hours, day/date |
//! | 0x0B..=0x0D | alarm 2: minutes, hours, day/date          |
//! | 0x0E        | control (A1IE, A2IE, INTCN, ...)           |
//! | 0x0F        | status (A1F, A2F, BSY, EN32kHz, OSF)       |
//!
//! # Alarm masks
//!
//! Bit 7 of every alarm field register (A1M1..A1M4, A2M2..A2M4) tells the
//! chip to skip that field when comparing. The [`AlarmMask`] carries those
//! bits in hardware order: bit 0 is the alarm 1 seconds field, bit 1 the
//! minutes, bit 2 the hours and bit 3 the day/date. Alarm 2 has no seconds
//! field and ignores bit 0.
//!
//! # Communication failures
//!
//! A register read that gets no answer within the bus timeout yields `0`.
//! Callers cannot tell a failed read from a genuine zero register.

use embedded_hal::i2c::I2c;

use crate::sleep::WakeSource;
use crate::time::{self, BASE_YEAR, CalendarTime, UnixTimestamp, bcd_to_dec, dec_to_bcd};

/// Fixed 7-bit I2C address of the DS3231.
pub const DS3231_ADDRESS: u8 = 0x68;

const REG_SECONDS: u8 = 0x00;
const REG_MINUTES: u8 = 0x01;
const REG_HOURS: u8 = 0x02;
const REG_DATE: u8 = 0x04;
const REG_MONTH: u8 = 0x05;
const REG_YEAR: u8 = 0x06;

const REG_ALARM1: u8 = 0x07;
const REG_ALARM2: u8 = 0x0B;
const REG_CONTROL: u8 = 0x0E;
const REG_STATUS: u8 = 0x0F;

/// Last register cleared by [`Ds3231::reset_registers`] (temperature MSB).
const REG_LAST_RESET: u8 = 0x11;

const CONTROL_A1IE: u8 = 1 << 0;
const CONTROL_A2IE: u8 = 1 << 1;
const CONTROL_INTCN: u8 = 1 << 2;

const STATUS_A1F: u8 = 1 << 0;
const STATUS_A2F: u8 = 1 << 1;

/// "Don't compare" bit of an alarm field register.
const ALARM_MASK_BIT: u8 = 1 << 7;

// Calendar register value masks (strip the 12/24 and century flags)
const SECONDS_MASK: u8 = 0x7F;
const MINUTES_MASK: u8 = 0x7F;
const HOURS_MASK: u8 = 0x3F;
const DATE_MASK: u8 = 0x3F;
const MONTH_MASK: u8 = 0x1F;

/// Byte register access to a peripheral.
///
/// `read_register` returns `0` when the peripheral does not answer in time.
pub trait RegisterBus {
    fn write_register(&mut self, address: u8, value: u8);
    fn read_register(&mut self, address: u8) -> u8;
}

impl<T: RegisterBus + ?Sized> RegisterBus for &mut T {
    fn write_register(&mut self, address: u8, value: u8) {
        (**self).write_register(address, value)
    }

    fn read_register(&mut self, address: u8) -> u8 {
        (**self).read_register(address)
    }
}

/// [`RegisterBus`] over an `embedded-hal` I2C master.
///
/// The bounded wait is the I2C peripheral's own timeout; any bus error,
/// timeout included, degrades to a zero read.
pub struct I2cRegisterBus<I2C> {
    i2c: I2C,
    address: u8,
}

impl<I2C: I2c> I2cRegisterBus<I2C> {
    /// Creates a register bus for one device.
    ///
    /// # Arguments
    ///
    /// * `i2c` - Bus handle, usually a shared-bus device
    /// * `address` - 7-bit device address, [`DS3231_ADDRESS`] for the RTC
    pub fn new(i2c: I2C, address: u8) -> Self {
        Self { i2c, address }
    }

    /// Gives the bus handle back.
    pub fn release(self) -> I2C {
        self.i2c
    }
}

impl<I2C: I2c> RegisterBus for I2cRegisterBus<I2C> {
    fn write_register(&mut self, address: u8, value: u8) {
        if self.i2c.write(self.address, &[address, value]).is_err() {
            warn!("register write {=u8:#x} not acknowledged", address);
        }
    }

    fn read_register(&mut self, address: u8) -> u8 {
        let mut value = [0u8];
        match self.i2c.write_read(self.address, &[address], &mut value) {
            Ok(()) => value[0],
            Err(_) => {
                warn!("register read {=u8:#x} timed out", address);
                0
            }
        }
    }
}

/// One of the two alarm comparators.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AlarmSlot {
    /// Second granularity, four field registers
    Alarm1,
    /// Minute granularity, three field registers
    Alarm2,
}

impl AlarmSlot {
    const fn index(self) -> u8 {
        match self {
            AlarmSlot::Alarm1 => 0,
            AlarmSlot::Alarm2 => 1,
        }
    }

    const fn base(self) -> u8 {
        match self {
            AlarmSlot::Alarm1 => REG_ALARM1,
            AlarmSlot::Alarm2 => REG_ALARM2,
        }
    }

    const fn interrupt_enable(self) -> u8 {
        match self {
            AlarmSlot::Alarm1 => CONTROL_A1IE,
            AlarmSlot::Alarm2 => CONTROL_A2IE,
        }
    }

    const fn flag(self) -> u8 {
        match self {
            AlarmSlot::Alarm1 => STATUS_A1F,
            AlarmSlot::Alarm2 => STATUS_A2F,
        }
    }
}

/// Hardware match mask, see the module documentation for the bit layout.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AlarmMask(u8);

impl AlarmMask {
    /// Alarm 1: fire every second. Alarm 2: every minute (at seconds 00).
    pub const EVERY: Self = Self(0xF);
    /// Alarm 1: seconds match. Alarm 2: minutes match.
    pub const LOWEST_FIELD: Self = Self(0xE);
    /// Alarm 1: minutes and seconds match. Alarm 2: hours and minutes match.
    pub const TWO_FIELDS: Self = Self(0xC);
    /// Alarm 1: hours, minutes and seconds match.
    pub const THREE_FIELDS: Self = Self(0x8);
    /// Every field, including the date, must match.
    pub const ALL_FIELDS: Self = Self(0x0);

    pub const fn from_bits(bits: u8) -> Self {
        Self(bits & 0xF)
    }

    pub const fn bits(self) -> u8 {
        self.0
    }

    /// True when field `index` is excluded from the comparison.
    const fn skips(self, index: u8) -> bool {
        (self.0 >> index) & 1 == 1
    }
}

/// Programming of one alarm slot. `second` is ignored for alarm 2.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AlarmConfig {
    pub mask: AlarmMask,
    pub second: u8,
    pub minute: u8,
    pub hour: u8,
    pub day: u8,
}

/// Boot-time clock configuration. Unset alarms stay disabled.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ClockConfig {
    pub alarm1: Option<AlarmConfig>,
    pub alarm2: Option<AlarmConfig>,
}

/// DS3231 device handle.
pub struct Ds3231<B> {
    bus: B,
}

impl<B: RegisterBus> Ds3231<B> {
    /// Wraps a register bus. Nothing is written until
    /// [`configure`](Self::configure) runs.
    ///
    /// # Arguments
    ///
    /// * `bus` - Register access to the RTC
    pub fn new(bus: B) -> Self {
        Self { bus }
    }

    /// Releases the register bus.
    ///
    /// # Returns
    ///
    /// The bus passed to [`new`](Self::new), with the RTC left as last
    /// programmed
    pub fn release(self) -> B {
        self.bus
    }

    /// Program both alarm slots and rewrite the control register.
    ///
    /// The control register is written once: the interrupt enable of every
    /// configured alarm, plus INTCN when at least one alarm is armed. Other
    /// control bits (oscillator, square wave) end up cleared.
    pub fn configure(&mut self, config: &ClockConfig) {
        let mut control = 0;

        for (slot, alarm) in [
            (AlarmSlot::Alarm1, config.alarm1),
            (AlarmSlot::Alarm2, config.alarm2),
        ] {
            if let Some(alarm) = alarm {
                self.write_alarm(slot, &alarm);
                control |= slot.interrupt_enable();
            }
        }

        if control != 0 {
            control |= CONTROL_INTCN;
        }

        debug!("rtc control {=u8:#x}", control);
        self.bus.write_register(REG_CONTROL, control);
    }

    /// Program a single alarm slot and arm its interrupt, leaving the
    /// other slot untouched.
    pub fn configure_alarm(&mut self, slot: AlarmSlot, alarm: &AlarmConfig) {
        self.write_alarm(slot, alarm);

        let control = self.bus.read_register(REG_CONTROL);
        self.bus.write_register(
            REG_CONTROL,
            control | slot.interrupt_enable() | CONTROL_INTCN,
        );
    }

    fn write_alarm(&mut self, slot: AlarmSlot, alarm: &AlarmConfig) {
        let base = slot.base();
        let fields = [alarm.minute, alarm.hour, alarm.day];

        match slot {
            AlarmSlot::Alarm1 => {
                self.bus.write_register(base, dec_to_bcd(alarm.second));
                for (offset, value) in fields.iter().enumerate() {
                    self.bus
                        .write_register(base + 1 + offset as u8, dec_to_bcd(*value));
                }
            }
            AlarmSlot::Alarm2 => {
                for (offset, value) in fields.iter().enumerate() {
                    self.bus.write_register(base + offset as u8, dec_to_bcd(*value));
                }
            }
        }

        self.apply_mask(slot, alarm.mask);
    }

    /// Set bit 7 of every field register whose mask bit is set.
    ///
    /// Mask bits are walked from the slot index up to 3 while the register
    /// address walks from the slot base, so alarm 2 pairs mask bit 1 with
    /// its minutes register.
    fn apply_mask(&mut self, slot: AlarmSlot, mask: AlarmMask) {
        let mut address = slot.base();

        for index in slot.index()..4 {
            if mask.skips(index) {
                let register = self.bus.read_register(address);
                self.bus.write_register(address, register | ALARM_MASK_BIT);
            }
            address += 1;
        }
    }

    /// Write the calendar registers from a Unix timestamp.
    pub fn set_time(&mut self, unix_time: UnixTimestamp) {
        let time = time::decode(unix_time);
        let year_offset = time.year.saturating_sub(BASE_YEAR).min(99) as u8;

        self.bus.write_register(REG_SECONDS, dec_to_bcd(time.second));
        self.bus.write_register(REG_MINUTES, dec_to_bcd(time.minute));
        self.bus.write_register(REG_HOURS, dec_to_bcd(time.hour));
        self.bus.write_register(REG_DATE, dec_to_bcd(time.day));
        self.bus.write_register(REG_MONTH, dec_to_bcd(time.month));
        self.bus.write_register(REG_YEAR, dec_to_bcd(year_offset));

        info!("rtc set to {=u32}", unix_time);
    }

    /// Acknowledge pending alarms and read the current time.
    pub fn get_time(&mut self) -> UnixTimestamp {
        self.clear_alarm_flags();
        time::encode(&self.read_calendar())
    }

    /// Read the calendar registers without touching the alarm flags.
    pub fn read_calendar(&mut self) -> CalendarTime {
        CalendarTime {
            second: bcd_to_dec(self.bus.read_register(REG_SECONDS) & SECONDS_MASK),
            minute: bcd_to_dec(self.bus.read_register(REG_MINUTES) & MINUTES_MASK),
            hour: bcd_to_dec(self.bus.read_register(REG_HOURS) & HOURS_MASK),
            day: bcd_to_dec(self.bus.read_register(REG_DATE) & DATE_MASK),
            month: bcd_to_dec(self.bus.read_register(REG_MONTH) & MONTH_MASK),
            year: u16::from(bcd_to_dec(self.bus.read_register(REG_YEAR))) + BASE_YEAR,
        }
    }

    /// Clear A1F and A2F, preserving every other status bit.
    pub fn clear_alarm_flags(&mut self) {
        let status = self.bus.read_register(REG_STATUS);
        let flags = STATUS_A1F | STATUS_A2F;

        if status & flags != 0 {
            trace!("clearing alarm flags {=u8:#x}", status & flags);
            self.bus.write_register(REG_STATUS, status & !flags);
        }
    }

    /// Whether `slot` has fired since its flag was last cleared.
    pub fn alarm_fired(&mut self, slot: AlarmSlot) -> bool {
        self.bus.read_register(REG_STATUS) & slot.flag() != 0
    }

    /// Zero the calendar, alarm, control, status and aging registers.
    pub fn reset_registers(&mut self) {
        for address in 0..=REG_LAST_RESET {
            self.bus.write_register(address, 0);
        }
    }
}

impl<B: RegisterBus> WakeSource for Ds3231<B> {
    /// Clears both alarm flags, releasing INT/SQW.
    fn acknowledge(&mut self) {
        self.clear_alarm_flags();
    }
}
