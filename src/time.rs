//! Calendar arithmetic for the real time clock.
//!
//! The RTC keeps its calendar in packed BCD registers while the rest of the
//! station exchanges plain 32-bit Unix timestamps. This module converts
//! between the two without any time library. The calendar is anchored at
//! 2000-01-01T00:00:00Z; earlier instants clamp to the anchor since the RTC
//! year register only holds an offset from 2000.
//!
//! # Leap days
//!
//! Both directions apply the Gregorian rule (divisible by 4 and not by 100
//! unless by 400). Decoding counts February as 29 days in leap years so
//! that `encode(decode(t)) == t` holds across leap-year Februaries.

/// Seconds since 1970-01-01T00:00:00Z.
pub type UnixTimestamp = u32;

/// 2000-01-01T00:00:00Z as a Unix timestamp.
pub const EPOCH_2000: UnixTimestamp = 946_684_800;

/// First year representable by the RTC year register.
pub const BASE_YEAR: u16 = 2000;

const SECONDS_PER_MINUTE: u32 = 60;
const SECONDS_PER_HOUR: u32 = 3_600;
const SECONDS_PER_DAY: u32 = 86_400;

const DAYS_IN_YEAR: u32 = 365;
const DAYS_IN_LEAP_YEAR: u32 = 366;

/// Month lengths of a common year.
const DAYS_IN_MONTH: [u8; 12] = [31, 28, 31, 30, 31, 30, 31, 31, 30, 31, 30, 31];

/// Broken-down UTC calendar time.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CalendarTime {
    /// 0-59
    pub second: u8,
    /// 0-59
    pub minute: u8,
    /// 0-23
    pub hour: u8,
    /// Day of month, 1-31
    pub day: u8,
    /// 1-12
    pub month: u8,
    /// Absolute year, 2000 onward
    pub year: u16,
}

impl CalendarTime {
    /// True when every field is in range and the day exists in that month.
    pub fn is_valid(&self) -> bool {
        self.second < 60
            && self.minute < 60
            && self.hour < 24
            && (1..=12).contains(&self.month)
            && self.day >= 1
            && u32::from(self.day) <= days_in_month(self.month, self.year)
            && self.year >= BASE_YEAR
    }
}

pub const fn is_leap_year(year: u16) -> bool {
    year % 4 == 0 && (year % 100 != 0 || year % 400 == 0)
}

const fn days_in_year(year: u16) -> u32 {
    if is_leap_year(year) {
        DAYS_IN_LEAP_YEAR
    } else {
        DAYS_IN_YEAR
    }
}

/// Length of `month` (1-12) in `year`. Out of range months have no days.
fn days_in_month(month: u8, year: u16) -> u32 {
    match month {
        2 if is_leap_year(year) => 29,
        1..=12 => u32::from(DAYS_IN_MONTH[usize::from(month - 1)]),
        _ => 0,
    }
}

/// Convert a Unix timestamp into calendar fields.
pub fn decode(unix_time: UnixTimestamp) -> CalendarTime {
    let mut seconds = unix_time.saturating_sub(EPOCH_2000);

    let mut year = BASE_YEAR;
    while seconds >= days_in_year(year) * SECONDS_PER_DAY {
        seconds -= days_in_year(year) * SECONDS_PER_DAY;
        year += 1;
    }

    // The residual is less than one year, so December always terminates
    let mut month = 1;
    while month < 12 && seconds >= days_in_month(month, year) * SECONDS_PER_DAY {
        seconds -= days_in_month(month, year) * SECONDS_PER_DAY;
        month += 1;
    }

    let day = seconds / SECONDS_PER_DAY + 1;
    seconds %= SECONDS_PER_DAY;

    CalendarTime {
        second: (seconds % SECONDS_PER_MINUTE) as u8,
        minute: (seconds % SECONDS_PER_HOUR / SECONDS_PER_MINUTE) as u8,
        hour: (seconds / SECONDS_PER_HOUR) as u8,
        day: day as u8,
        month,
        year,
    }
}

/// Convert calendar fields back into a Unix timestamp.
///
/// Complete years are summed leap-aware, complete months from the common
/// year table, and the leap day is added once the date is past February.
pub fn encode(time: &CalendarTime) -> UnixTimestamp {
    let mut seconds = u64::from(time.second)
        + u64::from(time.minute) * u64::from(SECONDS_PER_MINUTE)
        + u64::from(time.hour) * u64::from(SECONDS_PER_HOUR);

    for year in BASE_YEAR..time.year {
        seconds += u64::from(days_in_year(year) * SECONDS_PER_DAY);
    }

    let complete_months = usize::from(time.month.saturating_sub(1));
    for days in DAYS_IN_MONTH.iter().take(complete_months) {
        seconds += u64::from(*days) * u64::from(SECONDS_PER_DAY);
    }

    seconds += u64::from(time.day.saturating_sub(1)) * u64::from(SECONDS_PER_DAY);

    if is_leap_year(time.year) && time.month > 2 {
        seconds += u64::from(SECONDS_PER_DAY);
    }

    (seconds + u64::from(EPOCH_2000)) as UnixTimestamp
}

/// Packed BCD encoding of a decimal value in 0-99.
pub const fn dec_to_bcd(dec: u8) -> u8 {
    ((dec / 10 % 10) << 4) | (dec % 10)
}

/// Decimal value of a packed BCD byte.
pub const fn bcd_to_dec(bcd: u8) -> u8 {
    (bcd >> 4) * 10 + (bcd & 0x0F)
}
