//! Hardware abstraction and peripheral initialization.
//!
//! This module defines the pin mappings and peripheral initialization
//! for the Tournesol logger board.
//!
//! # Pin Assignments
//!
//! ## Instrument Bus (I2C1, 100 kHz)
//! - **PB6**: SCL
//! - **PB7**: SDA
//! - Devices: DS3231 RTC (0x68), HDC1080 (0x40), AS7262 (0x49)
//!
//! ## Analog Inputs (ADC, 10-bit)
//! - **PA0**: PT100 front end output
//! - **PA1**: Anemometer output
//!
//! ## Power Control
//! - **PA4**: EN_SPECTRAL - Active-high rail enable for the AS7262
//! - **PA5**: EN_CLIMATE - Active-high rail enable for the HDC1080
//! - **PA6**: EN_RTD - Active-high rail enable for the PT100 front end
//! - **PA7**: RELAY_N - Active-low enable for the anemometer excitation
//!
//! ## Wake and Status
//! - **PA8**: RTC_INT_N - DS3231 alarm output, open drain, falling edge
//!   on EXTI line 8
//! - **PB1**: STATUS - Busy/fault LED, active high
//!
//! ## Low Power & Time Base
//! - **PC14**: OSC32_IN - 32.768 kHz crystal input
//! - **PC15**: OSC32_OUT - 32.768 kHz crystal output
//!
//! ## Debug (SWD)
//! - **PA13**: SWDIO
//! - **PA14**: SWCLK
//!
//! # Frame Log
//!
//! Frames are kept in the last 8 KiB of the 32 KiB program flash
//! (`0x6000..0x8000`), about 150 frames. Nothing is ever erased behind
//! the log, so it stops accepting frames once full.
//!
//! The crate ships its own `memory.x`, which gives the image only the
//! first 24 KiB. A program that outgrows it fails to link instead of
//! landing in the log.

use core::cell::RefCell;

use embassy_embedded_hal::shared_bus::blocking::i2c::I2cDevice;
use embassy_stm32::{
    adc::{self, Adc, AdcChannel, AnyAdcChannel, Resolution},
    bind_interrupts,
    flash::{Blocking as FlashBlocking, Flash},
    gpio::{Input, Level, Output, Pull, Speed},
    i2c::{self, I2c},
    mode::Blocking,
    pac::{self, interrupt},
    peripherals::ADC1,
    time::Hertz,
};
use embassy_sync::blocking_mutex::{Mutex, raw::NoopRawMutex};
use embassy_time::{Delay, Duration};
use static_cell::StaticCell;

use tournesol::clock::{DS3231_ADDRESS, Ds3231, I2cRegisterBus};
use tournesol::config::{BUS_TIMEOUT_MS, FRAME_STORE, LOG_END, LOG_START};
use tournesol::power::PowerSequencer;
use tournesol::sensors::{AnalogChannel, Anemometer, As7262, Hdc1080, Instrument, Rtd, SensorRegistry};
use tournesol::sleep::{SleepControl, WakeFlag};
use tournesol::station::Station;
use tournesol::status::StatusLed;
use tournesol::storage::FlashLog;

/// EXTI line of the RTC alarm input (PA8)
const WAKE_EXTI_LINE: usize = 8;

/// Register index for EXTI lines 0-31
const EXTI_REG_IDX: usize = 0;

/// SYSCFG port selector for GPIOA
const EXTI_PORT_A: u8 = 0;

/// STM32L0 flash reads back as zero once erased.
const FLASH_ERASE_VALUE: u8 = 0x00;

/// Largest record the log accepts, length prefix and padding included.
pub const LOG_RECORD_BUF: usize = 64;

/// Frame buffer size handed to the wake cycle.
pub const FRAME_CAPACITY: usize = 64;

/// Alarm wake flag, shared with the `EXTI4_15` handler.
pub static WAKE: WakeFlag = WakeFlag::new();

bind_interrupts!(struct Irqs {
    ADC1_COMP => adc::InterruptHandler<ADC1>;
});

type Bus = I2c<'static, Blocking>;
type SharedBus = Mutex<NoopRawMutex, RefCell<Bus>>;
pub type BusDevice = I2cDevice<'static, NoopRawMutex, Bus>;

/// One ADC input sharing the converter with the other channels.
pub struct AdcInput {
    adc: &'static RefCell<Adc<'static, ADC1>>,
    channel: AnyAdcChannel<ADC1>,
}

impl AnalogChannel for AdcInput {
    fn sample(&mut self) -> u16 {
        let mut adc = self.adc.borrow_mut();
        embassy_futures::block_on(adc.read(&mut self.channel))
    }
}

pub type Instruments = Instrument<
    As7262<BusDevice, Delay>,
    Hdc1080<BusDevice, Delay>,
    Rtd<AdcInput>,
    Anemometer<AdcInput>,
>;

pub type Power = PowerSequencer<Output<'static>, Delay, 3>;

pub type FrameLog = FlashLog<Flash<'static, FlashBlocking>, LOG_RECORD_BUF>;

pub type Logger = Station<I2cRegisterBus<BusDevice>, Instruments, Power, FrameLog, 4>;

/// Stop mode entry.
///
/// The PWR `PDDS` bit keeps its reset value, so deep sleep selects Stop
/// rather than Standby and RAM (the wake flag included) is retained.
pub struct StopMode {
    scb: cortex_m::peripheral::SCB,
}

impl StopMode {
    pub fn new(scb: cortex_m::peripheral::SCB) -> Self {
        Self { scb }
    }
}

impl SleepControl for StopMode {
    fn sleep(&mut self, flag: &WakeFlag) {
        // With interrupts masked an edge between the check and WFI stays
        // pending and WFI returns immediately
        cortex_m::interrupt::free(|_| {
            if flag.is_pending() {
                return;
            }
            self.scb.set_sleepdeep();
            cortex_m::asm::dsb();
            cortex_m::asm::wfi();
            self.scb.clear_sleepdeep();
        });
    }
}

/// Top-level peripheral container for the logger.
///
/// Owns everything the main loop drives: the station with its instruments,
/// the status LED and the wake input.
pub struct Peripherals {
    /// Clock, instruments, power and frame log
    pub station: Logger,
    /// Busy/fault indicator
    pub led: StatusLed<Output<'static>, Delay>,
    /// RTC alarm line, kept alive for its pull-up
    pub wake: Input<'static>,
}

impl Peripherals {
    /// Initializes all peripherals from STM32 peripheral singleton.
    ///
    /// # Initial GPIO States
    ///
    /// - PA4, PA5, PA6 (rail enables): Low (instruments OFF)
    /// - PA7 (RELAY_N): High (excitation OFF)
    /// - PB1 (STATUS): Low
    /// - PA8 (RTC_INT_N): Input with pull-up
    ///
    /// # Arguments
    ///
    /// * `p` - STM32 peripheral singleton from embassy_stm32::init()
    ///
    /// # Returns
    ///
    /// Initialized Peripherals struct ready for use
    pub fn new(p: embassy_stm32::Peripherals) -> Self {
        static I2C_BUS: StaticCell<SharedBus> = StaticCell::new();
        static ADC: StaticCell<RefCell<Adc<'static, ADC1>>> = StaticCell::new();

        let mut i2c_config = i2c::Config::default();
        i2c_config.frequency = Hertz::khz(100);
        i2c_config.timeout = Duration::from_millis(BUS_TIMEOUT_MS);
        let i2c = I2c::new_blocking(p.I2C1, p.PB6, p.PB7, i2c_config);
        let bus = I2C_BUS.init(Mutex::new(RefCell::new(i2c)));

        let mut adc = Adc::new(p.ADC1, Irqs);
        adc.set_resolution(Resolution::BITS10);
        let adc = ADC.init(RefCell::new(adc));

        let instruments = [
            Instrument::Spectral(As7262::new(I2cDevice::new(bus), Delay)),
            Instrument::HumidityTemp(Hdc1080::new(I2cDevice::new(bus), Delay)),
            Instrument::ResistanceTemp(Rtd::new(AdcInput {
                adc,
                channel: p.PA0.degrade_adc(),
            })),
            Instrument::Anemometer(Anemometer::new(AdcInput {
                adc,
                channel: p.PA1.degrade_adc(),
            })),
        ];

        let mut power = PowerSequencer::new(
            [
                Output::new(p.PA4, Level::Low, Speed::Low),
                Output::new(p.PA5, Level::Low, Speed::Low),
                Output::new(p.PA6, Level::Low, Speed::Low),
            ],
            Output::new(p.PA7, Level::High, Speed::Low),
            Delay,
        );
        power.init();

        let log = FlashLog::new(
            Flash::new_blocking(p.FLASH),
            FRAME_STORE,
            LOG_START,
            LOG_END,
            FLASH_ERASE_VALUE,
        );

        Self {
            station: Station::new(
                Ds3231::new(I2cRegisterBus::new(I2cDevice::new(bus), DS3231_ADDRESS)),
                SensorRegistry::new(instruments),
                power,
                log,
            ),
            led: StatusLed::new(Output::new(p.PB1, Level::Low, Speed::Low), Delay),
            wake: Input::new(p.PA8, Pull::Up),
        }
    }
}

/// RTC alarm interrupt handler (EXTI line 8).
///
/// Clears the pending bit and hands the edge to [`WAKE`], which accepts it
/// only while the main loop sleeps.
///
/// # Safety
///
/// This interrupt handler accesses PAC registers directly.
#[interrupt]
fn EXTI4_15() {
    // Pending bits are write-one-to-clear; a read-modify-write would clear
    // every other pending line too
    pac::EXTI
        .pr(EXTI_REG_IDX)
        .write(|w| w.set_line(WAKE_EXTI_LINE, true));

    WAKE.on_interrupt();
}

/// Routes PA8 to EXTI line 8 and enables its falling edge interrupt.
///
/// # Configuration
///
/// - SYSCFG EXTICR3: line 8 from port A
/// - EXTI line 8: falling edge only (the DS3231 output is active low)
/// - NVIC: EXTI4_15 interrupt unmasked
///
/// # Safety
///
/// Directly accesses PAC registers and unmasks NVIC interrupt.
pub fn setup_wake_interrupt() {
    let exti = pac::EXTI;

    // SYSCFG owns the EXTI port selection
    pac::RCC.apb2enr().modify(|w| w.set_syscfgen(true));
    pac::SYSCFG
        .exticr(WAKE_EXTI_LINE / 4)
        .modify(|w| w.set_exti(WAKE_EXTI_LINE % 4, EXTI_PORT_A));

    exti.rtsr(EXTI_REG_IDX)
        .modify(|w| w.set_line(WAKE_EXTI_LINE, false));
    exti.ftsr(EXTI_REG_IDX)
        .modify(|w| w.set_line(WAKE_EXTI_LINE, true));
    exti.pr(EXTI_REG_IDX)
        .write(|w| w.set_line(WAKE_EXTI_LINE, true));
    exti.imr(EXTI_REG_IDX)
        .modify(|w| w.set_line(WAKE_EXTI_LINE, true));

    unsafe {
        cortex_m::peripheral::NVIC::unmask(embassy_stm32::interrupt::EXTI4_15);
    };
}
