//! Station configuration.
//!
//! Everything here is fixed at build time. The `set-clock` feature decides
//! whether [`BOOTSTRAP_TIMESTAMP`] is written into the RTC on boot.

use crate::clock::{AlarmConfig, AlarmMask, ClockConfig};
use crate::time::UnixTimestamp;

/// Name of the store every frame is appended to.
pub const FRAME_STORE: &str = "datalog.bin";

/// Program flash given to the firmware image. Must match `FLASH` in
/// `memory.x`.
pub const PROGRAM_FLASH_SIZE: u32 = 24 * 1024;

/// Frame log region, as offsets into program flash. It takes the 8 KiB
/// the image leaves free.
pub const LOG_START: u32 = PROGRAM_FLASH_SIZE;
pub const LOG_END: u32 = 32 * 1024;

/// On and off time of one fault indicator pulse.
pub const ERROR_BLINK_MS: u32 = 200;

/// Supply settle time after the instrument rails are switched on.
pub const INSTRUMENT_SETTLE_MS: u32 = 1_000;

/// Settle time of the wind sensor once its excitation relay closes.
pub const RELAY_SETTLE_MS: u32 = 100;

/// Grace period after boot initialization before the first sleep.
pub const INIT_GRACE_MS: u32 = 500;

/// Upper bound on one RTC register transaction.
pub const BUS_TIMEOUT_MS: u64 = 100;

/// Time written into the RTC when the `set-clock` feature is enabled
/// (2022-04-10T22:15:00Z).
pub const BOOTSTRAP_TIMESTAMP: UnixTimestamp = 1_649_628_900;

/// Alarm 1 fires whenever the seconds read 30.
pub const ALARM1: AlarmConfig = AlarmConfig {
    mask: AlarmMask::LOWEST_FIELD,
    second: 30,
    minute: 30,
    hour: 12,
    day: 1,
};

/// Alarm 2 fires at the top of every minute.
pub const ALARM2: AlarmConfig = AlarmConfig {
    mask: AlarmMask::EVERY,
    second: 0,
    minute: 30,
    hour: 12,
    day: 1,
};

pub const CLOCK: ClockConfig = ClockConfig {
    alarm1: Some(ALARM1),
    alarm2: Some(ALARM2),
};

/// Whether the bootstrap timestamp should be written at boot.
pub const fn set_clock_on_boot() -> bool {
    cfg!(feature = "set-clock")
}

#[cfg(test)]
mod tests {
    use super::*;

    /// `LENGTH` of one region in the linker memory map, in bytes.
    fn region_length(map: &str, region: &str) -> u32 {
        let line = map
            .lines()
            .find(|l| l.trim_start().starts_with(region) && l.contains("ORIGIN"))
            .unwrap();
        let length = line.split("LENGTH").nth(1).unwrap();
        let length = length.trim_start_matches([' ', '=']).trim();
        match length.strip_suffix('K') {
            Some(kib) => kib.parse::<u32>().unwrap() * 1024,
            None => length.parse().unwrap(),
        }
    }

    #[test]
    fn test_image_stays_below_frame_log() {
        let map = include_str!("../memory.x");
        let flash = region_length(map, "FLASH");

        assert_eq!(flash, PROGRAM_FLASH_SIZE);
        assert!(flash <= LOG_START);
        assert!(LOG_START < LOG_END);
        assert_eq!(LOG_END - LOG_START, 8 * 1024);
    }
}
