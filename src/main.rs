//! Firmware for the battery-powered Tournesol environmental logger.
//!
//! # Overview
//!
//! The logger wakes once per DS3231 alarm, samples its instruments and
//! appends one checksummed frame to a log in on-chip flash:
//! - AS7262 six-channel spectral sensor
//! - HDC1080 air temperature and humidity
//! - PT100 soil temperature through an analog front end
//! - Anemometer on a switched excitation supply
//!
//! # Hardware
//!
//! - **MCU**: STM32L031G6U6 (Cortex-M0+, ultra-low-power)
//! - **RTC**: DS3231 with both alarms routed to one open-drain line
//! - **Instrument supplies**: one enable per rail, plus a load-switch relay
//!   for the anemometer
//!
//! # Low Power Operation
//!
//! - MSI oscillator at 66 kHz for minimal active current
//! - Between cycles the core sits in STOP mode with every instrument rail
//!   off; only the alarm line can wake it
//! - The status LED is lit only while a cycle runs
//!
//! # Faults
//!
//! Boot initializes every subsystem and collects all faults. Any fault
//! halts the logger, which then blinks the code of the most important one
//! forever. Faults during a wake cycle are logged and the cycle completes.
//!
//! # Module Organization
//!
//! - [`hardware`] - Pin mappings, peripheral initialization and the wake
//!   interrupt

#![no_std]
#![no_main]

mod hardware;

use embassy_executor::Spawner;
use embassy_stm32::{
    Config,
    rcc::{LsConfig, LseConfig, mux::ClockMux},
    time::Hertz,
};
use embassy_time::{Delay, Timer};
use {defmt_rtt as _, panic_probe as _};

use hardware::{FRAME_CAPACITY, Peripherals, StopMode, WAKE, setup_wake_interrupt};
use tournesol::config::{BOOTSTRAP_TIMESTAMP, CLOCK, set_clock_on_boot};
use tournesol::sleep::WakeScheduler;

/// Creates a low-power clock configuration for STM32L031.
///
/// The core spends almost all its time in STOP mode. The only wake source
/// is the DS3231 alarm line on EXTI line 8 (PA8, falling edge), so no
/// on-chip timer has to keep running for the logger to wake.
///
/// # Clock Settings
///
/// - **MSI**: 66 kHz in normal mode, 2.097 MHz in debug mode (for reliable debugging)
/// - **System clock**: MSI (no PLL), also the clock the core resumes on
///   after the alarm wakes it from STOP
/// - **LSE**: 32.768 kHz external crystal, used only by the embassy time
///   driver for the boot delays
/// - **Voltage scale**: Range 1
///
/// # Returns
///
/// Configured RCC settings for embassy-stm32 initialization
fn create_low_power_config() -> embassy_stm32::rcc::Config {
    embassy_stm32::rcc::Config {
        #[cfg(feature = "debug-mode")]
        msi: Some(embassy_stm32::rcc::MSIRange::RANGE2M),
        #[cfg(not(feature = "debug-mode"))]
        msi: Some(embassy_stm32::rcc::MSIRange::RANGE66K),
        hsi: false,
        hse: None,
        pll: None,
        sys: embassy_stm32::rcc::Sysclk::MSI,
        ahb_pre: embassy_stm32::rcc::AHBPrescaler::DIV1,
        apb1_pre: embassy_stm32::rcc::APBPrescaler::DIV1,
        apb2_pre: embassy_stm32::rcc::APBPrescaler::DIV1,
        ls: LsConfig {
            rtc: embassy_stm32::rcc::RtcClockSource::LSE,
            lsi: false,
            lse: Some(LseConfig {
                frequency: Hertz::hz(32768),
                mode: embassy_stm32::rcc::LseMode::Oscillator(embassy_stm32::rcc::LseDrive::Low),
            }),
        },
        voltage_scale: embassy_stm32::rcc::VoltageScale::RANGE1,
        mux: ClockMux::default(),
    }
}

/// Main entry point for the logger firmware.
///
/// # Initialization Sequence
///
/// 1. Configure clocks for low power operation (66 kHz MSI)
/// 2. Initialize STM32 peripherals and the instrument bus
/// 3. Program the RTC alarms, mount the frame log and initialize every
///    instrument
/// 4. Halt with a blink code if anything failed
/// 5. Attach the alarm interrupt and enter the wake loop
///
/// # Main Loop
///
/// Sleep in STOP mode until the alarm fires, then run one acquisition
/// cycle with the status LED lit.
#[embassy_executor::main]
async fn main(_spawner: Spawner) {
    let mut config = Config::default();
    config.rcc = create_low_power_config();

    let p = embassy_stm32::init(config);
    let core = cortex_m::Peripherals::take().unwrap();

    #[cfg(feature = "debug-mode")]
    defmt::info!("Tournesol logger starting...");

    // Wait 3 seconds after boot to allow debugger connection
    // before entering STOP mode. Negligible battery impact.
    #[cfg(feature = "debug-mode")]
    defmt::info!("Waiting 3 seconds for debugger connection...");

    Timer::after_secs(3).await;

    #[cfg(feature = "debug-mode")]
    defmt::info!("Initializing peripherals...");

    let mut peripherals = Peripherals::new(p);

    #[cfg(feature = "debug-mode")]
    defmt::info!("Bringing up station...");

    let set_time = set_clock_on_boot().then_some(BOOTSTRAP_TIMESTAMP);
    let errors = peripherals.station.boot(&CLOCK, set_time, &mut Delay);
    if !errors.is_empty() {
        peripherals.led.halt(errors);
    }

    #[cfg(feature = "debug-mode")]
    defmt::info!("Setting up wake interrupt...");

    setup_wake_interrupt();
    let mut scheduler = WakeScheduler::new(&WAKE, StopMode::new(core.SCB));

    #[cfg(feature = "debug-mode")]
    defmt::info!("Entering wake loop...");

    loop {
        // Also releases an alarm that fired while the last cycle ran
        scheduler.sleep_until_wake(&mut peripherals.station);
        peripherals.led.set_busy(true);

        match peripherals.station.run_cycle::<FRAME_CAPACITY>() {
            Ok(_cycle) => {
                #[cfg(feature = "debug-mode")]
                defmt::info!(
                    "Cycle done: {} bytes, faults {}",
                    _cycle.frame.len(),
                    _cycle.errors
                );
            }
            Err(e) => defmt::error!("Cycle aborted: {}", e),
        }

        peripherals.led.set_busy(false);
    }
}
