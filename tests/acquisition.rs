//! Boot and wake cycles end to end, over in-memory peripherals.

use std::cell::{Cell, RefCell};
use std::convert::Infallible;
use std::rc::Rc;

use embedded_hal::delay::DelayNs;
use embedded_hal::digital::{ErrorType as PinErrorType, OutputPin};
use embedded_storage::nor_flash::{ErrorType, NorFlash, NorFlashErrorKind, ReadNorFlash};

use tournesol::clock::{Ds3231, RegisterBus};
use tournesol::config::{CLOCK, FRAME_STORE};
use tournesol::frame::Frame;
use tournesol::power::PowerSequencer;
use tournesol::sensors::{Anemometer, Instrument, Rtd, Sensor, SensorKind, SensorRegistry};
use tournesol::sleep::{SleepControl, WakeFlag, WakeScheduler, WakeState};
use tournesol::station::Station;
use tournesol::status::StatusLed;
use tournesol::storage::{FlashLog, StorageSink};
use tournesol::{ErrorMask, StorageError};

const BOOT_TIME: u32 = 1_649_628_900;
const FRAME_LEN: usize = 50;

const STATUS: usize = 0x0F;
const A1F: u8 = 1 << 0;

/// DS3231 register file, shared with the simulated alarm.
#[derive(Clone, Default)]
struct Registers(Rc<RefCell<[u8; 0x13]>>);

impl RegisterBus for Registers {
    fn write_register(&mut self, address: u8, value: u8) {
        self.0.borrow_mut()[usize::from(address)] = value;
    }

    fn read_register(&mut self, address: u8) -> u8 {
        self.0.borrow()[usize::from(address)]
    }
}

/// Shared view of a GPIO level.
#[derive(Clone, Default)]
struct Pin(Rc<Cell<bool>>);

impl PinErrorType for Pin {
    type Error = Infallible;
}

impl OutputPin for Pin {
    fn set_low(&mut self) -> Result<(), Infallible> {
        self.0.set(false);
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Infallible> {
        self.0.set(true);
        Ok(())
    }
}

struct NoDelay;

impl DelayNs for NoDelay {
    fn delay_ns(&mut self, _ns: u32) {}
}

/// Erased flash with STM32L0 geometry: 4-byte words, 128-byte pages,
/// erased to 0.
struct MemFlash {
    data: Vec<u8>,
}

impl MemFlash {
    fn new(size: usize) -> Self {
        Self {
            data: vec![0; size],
        }
    }
}

impl ErrorType for MemFlash {
    type Error = NorFlashErrorKind;
}

impl ReadNorFlash for MemFlash {
    const READ_SIZE: usize = 1;

    fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), Self::Error> {
        let offset = offset as usize;
        bytes.copy_from_slice(&self.data[offset..offset + bytes.len()]);
        Ok(())
    }

    fn capacity(&self) -> usize {
        self.data.len()
    }
}

impl NorFlash for MemFlash {
    const WRITE_SIZE: usize = 4;
    const ERASE_SIZE: usize = 128;

    fn erase(&mut self, from: u32, to: u32) -> Result<(), Self::Error> {
        self.data[from as usize..to as usize].fill(0);
        Ok(())
    }

    fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<(), Self::Error> {
        let offset = offset as usize;
        let target = &mut self.data[offset..offset + bytes.len()];
        if target.iter().any(|b| *b != 0) {
            return Err(NorFlashErrorKind::Other);
        }
        target.copy_from_slice(bytes);
        Ok(())
    }
}

/// Digital instrument returning fixed readings.
struct Fixed {
    kind: SensorKind,
    values: &'static [f32],
    healthy: bool,
}

impl Sensor for Fixed {
    fn kind(&self) -> SensorKind {
        self.kind
    }

    fn init(&mut self) -> Result<(), ErrorMask> {
        if self.healthy {
            Ok(())
        } else {
            Err(self.kind.fault())
        }
    }

    fn read(&mut self, out: &mut [u8]) -> usize {
        for (chunk, value) in out.chunks_exact_mut(4).zip(self.values) {
            chunk.copy_from_slice(&value.to_ne_bytes());
        }
        self.values.len() * 4
    }
}

/// Alarm that fires twice during every sleep.
struct BouncingAlarm;

impl SleepControl for BouncingAlarm {
    fn sleep(&mut self, flag: &WakeFlag) {
        flag.on_interrupt();
        flag.on_interrupt();
    }
}

/// Alarm 1 matching once per sleep. INT/SQW follows A1F, so an alarm whose
/// flag is still set cannot produce another falling edge.
struct RtcAlarm {
    regs: Registers,
    sleeps: usize,
}

impl SleepControl for RtcAlarm {
    fn sleep(&mut self, flag: &WakeFlag) {
        self.sleeps += 1;
        assert!(self.sleeps < 10, "alarm line stuck low");

        let mut regs = self.regs.0.borrow_mut();
        if regs[STATUS] & A1F == 0 {
            regs[STATUS] |= A1F;
            flag.on_interrupt();
        }
    }
}

const SPECTRUM: [f32; 6] = [10.0, 20.0, 30.0, 40.0, 50.0, 60.0];
const CLIMATE: [f32; 2] = [21.5, 40.0];

fn log_on(flash: MemFlash) -> FlashLog<MemFlash, 64> {
    FlashLog::new(flash, FRAME_STORE, 0, 1024, 0x00)
}

#[test]
fn test_boot_and_wake_cycles() {
    let rails = [Pin::default(), Pin::default(), Pin::default()];
    let relay = Pin::default();
    let relay_level = relay.0.clone();
    let rail_level = rails[0].0.clone();
    let mut power = PowerSequencer::new(rails, relay, NoDelay);
    power.init();
    assert!(relay_level.get(), "relay is active low");

    // Sampled while the relay is closed
    let relay_open = relay_level.clone();
    let instruments = [
        Instrument::Spectral(Fixed {
            kind: SensorKind::Spectral,
            values: &SPECTRUM,
            healthy: true,
        }),
        Instrument::HumidityTemp(Fixed {
            kind: SensorKind::HumidityTemp,
            values: &CLIMATE,
            healthy: true,
        }),
        Instrument::ResistanceTemp(Rtd::new(|| 651u16)),
        Instrument::Anemometer(Anemometer::new(move || {
            if relay_open.get() { 0 } else { 182u16 }
        })),
    ];

    let clock = Ds3231::new(Registers::default());
    let mut station = Station::new(
        clock,
        SensorRegistry::new(instruments),
        power,
        log_on(MemFlash::new(1024)),
    );
    let led_level = Pin::default();
    let mut led = StatusLed::new(led_level.clone(), NoDelay);

    let errors = station.boot(&CLOCK, Some(BOOT_TIME), &mut NoDelay);
    assert!(errors.is_empty());
    assert!(!rail_level.get());

    let flag = WakeFlag::new();
    let mut scheduler = WakeScheduler::new(&flag, BouncingAlarm);

    for minute in 0..3u32 {
        scheduler.sleep_until_wake(&mut station);
        assert_eq!(scheduler.state(), WakeState::Processing);

        station.clock().set_time(BOOT_TIME + 60 * (minute + 1));
        led.set_busy(true);
        let cycle = station.run_cycle::<64>().unwrap();
        led.set_busy(false);

        assert!(cycle.errors.is_empty());
        assert_eq!(cycle.frame.len(), FRAME_LEN);
        assert!(!led_level.0.get());
        assert!(!rail_level.get());
        assert!(relay_level.get());
        // Bounced edges never queue a second cycle
        assert!(!flag.take());
    }

    let (_, _, _, mut storage) = station.release();
    let mut frames = Vec::new();
    storage
        .records(|record| frames.push(Frame::<64>::parse(record).unwrap()))
        .unwrap();

    assert_eq!(frames.len(), 3);
    for (minute, frame) in frames.iter().enumerate() {
        assert_eq!(frame.timestamp(), u64::from(BOOT_TIME) + 60 * (minute as u64 + 1));

        let readings: Vec<f32> = frame.readings().collect();
        assert_eq!(readings.len(), 10);
        assert_eq!(readings[..6], SPECTRUM);
        assert_eq!(readings[6..8], CLIMATE);
        assert!((readings[8] - 15.168_54).abs() < 1e-3);
        // 182 * 0.098974 - 8.1, read with the relay closed
        assert!((readings[9] - 9.913_268).abs() < 1e-3);
    }
}

#[test]
fn test_log_resumes_after_reset() {
    let mut log = log_on(MemFlash::new(1024));
    log.mount().unwrap();
    log.append(FRAME_STORE, &[0x11; FRAME_LEN]).unwrap();
    log.append(FRAME_STORE, &[0x22; FRAME_LEN]).unwrap();

    let mut log = log_on(log.release());
    log.mount().unwrap();
    assert_eq!(log.used(), 2 * 52);
    log.append(FRAME_STORE, &[0x33; FRAME_LEN]).unwrap();

    let mut firsts = Vec::new();
    assert_eq!(log.records(|r| firsts.push(r[0])).unwrap(), 3);
    assert_eq!(firsts, [0x11, 0x22, 0x33]);
}

#[test]
fn test_boot_fault_selects_blink_code() {
    let instruments = [
        Fixed {
            kind: SensorKind::Spectral,
            values: &SPECTRUM,
            healthy: false,
        },
        Fixed {
            kind: SensorKind::HumidityTemp,
            values: &CLIMATE,
            healthy: false,
        },
    ];
    let power = PowerSequencer::new([Pin::default()], Pin::default(), NoDelay);
    // The log region does not fit the flash, so mounting fails
    let storage = FlashLog::<_, 64>::new(MemFlash::new(512), FRAME_STORE, 0, 1024, 0x00);
    let mut station = Station::new(
        Ds3231::new(Registers::default()),
        SensorRegistry::new(instruments),
        power,
        storage,
    );

    let errors = station.boot(&CLOCK, None, &mut NoDelay);
    assert_eq!(
        errors,
        ErrorMask::STORAGE | ErrorMask::SPECTRAL | ErrorMask::HUMIDITY_TEMP
    );

    let led_level = Pin::default();
    let mut led = StatusLed::new(led_level.clone(), NoDelay);
    // Storage outranks the sensor faults
    assert_eq!(led.blink_sequence(errors), 1);
    assert!(!led_level.0.get());

    let cycle = station.run_cycle::<64>().unwrap();
    assert!(cycle.errors.contains(ErrorMask::STORAGE));
    assert_eq!(
        station.storage().append(FRAME_STORE, cycle.frame.as_bytes()),
        Err(StorageError::NotMounted)
    );
}

#[test]
fn test_alarm_during_boot_still_wakes() {
    let regs = Registers::default();
    let instruments = [
        Instrument::<Fixed, Fixed, _, _>::ResistanceTemp(Rtd::new(|| 651u16)),
        Instrument::Anemometer(Anemometer::new(|| 182u16)),
    ];
    let mut station = Station::new(
        Ds3231::new(regs.clone()),
        SensorRegistry::new(instruments),
        PowerSequencer::new([Pin::default()], Pin::default(), NoDelay),
        log_on(MemFlash::new(1024)),
    );

    assert!(station.boot(&CLOCK, Some(BOOT_TIME), &mut NoDelay).is_empty());
    // Alarm 1 matched while the instruments were initializing
    regs.0.borrow_mut()[STATUS] |= A1F;

    let flag = WakeFlag::new();
    let alarm = RtcAlarm {
        regs: regs.clone(),
        sleeps: 0,
    };
    let mut scheduler = WakeScheduler::new(&flag, alarm);

    for _ in 0..2 {
        scheduler.sleep_until_wake(&mut station);
        let cycle = station.run_cycle::<64>().unwrap();
        assert!(cycle.errors.is_empty());
        // Matched again before the station went back to sleep
        regs.0.borrow_mut()[STATUS] |= A1F;
    }

    let (_, _, _, mut storage) = station.release();
    assert_eq!(storage.records(|_| {}).unwrap(), 2);
}
