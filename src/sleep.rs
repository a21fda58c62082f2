//! Wake/sleep scheduling.
//!
//! The station spends its life in deep sleep. The RTC alarm output pulls the
//! wake line low, and the line's interrupt handler does exactly two things:
//! it detaches itself and records one pending wake. Everything else happens
//! in the main loop once it notices the wake.
//!
//! # States
//!
//! - `Processing`: initial state, one acquisition cycle runs to completion.
//!   Alarm interrupts are not attached and are ignored.
//! - `Sleeping`: the interrupt is attached and the core is powered down.
//!
//! A wake cannot be queued: the handler detaches on its first run, so any
//! number of alarm edges yields at most one cycle until the next sleep.

use portable_atomic::{AtomicBool, Ordering};

/// Wake flag shared between the alarm interrupt and the main loop.
pub struct WakeFlag {
    /// Interrupt attached; the next edge is accepted
    armed: AtomicBool,
    /// Accepted edge not yet consumed by the main loop
    pending: AtomicBool,
}

impl WakeFlag {
    pub const fn new() -> Self {
        Self {
            armed: AtomicBool::new(false),
            pending: AtomicBool::new(false),
        }
    }

    /// Attaches the interrupt, discarding any stale wake.
    pub fn arm(&self) {
        self.pending.store(false, Ordering::Release);
        self.armed.store(true, Ordering::Release);
    }

    /// Detaches the interrupt without consuming a pending wake.
    pub fn disarm(&self) {
        self.armed.store(false, Ordering::Release);
    }

    /// Body of the alarm interrupt handler.
    pub fn on_interrupt(&self) {
        if self.armed.swap(false, Ordering::AcqRel) {
            self.pending.store(true, Ordering::Release);
        }
    }

    pub fn is_armed(&self) -> bool {
        self.armed.load(Ordering::Acquire)
    }

    pub fn is_pending(&self) -> bool {
        self.pending.load(Ordering::Acquire)
    }

    /// Consumes the pending wake, if any.
    pub fn take(&self) -> bool {
        self.pending.swap(false, Ordering::AcqRel)
    }
}

impl Default for WakeFlag {
    fn default() -> Self {
        Self::new()
    }
}

/// Device driving the wake line.
///
/// An alarm that fired while the station was busy keeps the line asserted,
/// and a level that is already asserted produces no further edge.
pub trait WakeSource {
    /// Releases the wake line so the next alarm produces a fresh edge.
    fn acknowledge(&mut self);
}

impl<T: WakeSource + ?Sized> WakeSource for &mut T {
    fn acknowledge(&mut self) {
        (**self).acknowledge()
    }
}

/// Low-power entry of the platform.
pub trait SleepControl {
    /// Powers the core down unless `flag` already holds a wake. Returns after
    /// the next interrupt, which may be unrelated to the alarm.
    fn sleep(&mut self, flag: &WakeFlag);
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum WakeState {
    Sleeping,
    Processing,
}

/// Drives the `Sleeping`/`Processing` state machine.
pub struct WakeScheduler<'a, S> {
    flag: &'a WakeFlag,
    sleeper: S,
    state: WakeState,
}

impl<'a, S: SleepControl> WakeScheduler<'a, S> {
    /// Starts in `Processing` so the first pass can bring up the station
    /// before ever sleeping.
    pub fn new(flag: &'a WakeFlag, sleeper: S) -> Self {
        flag.disarm();
        Self {
            flag,
            sleeper,
            state: WakeState::Processing,
        }
    }

    pub fn state(&self) -> WakeState {
        self.state
    }

    /// Ends the current cycle: attaches the alarm interrupt, releases the
    /// wake line and sleeps until the next alarm. Wakeups from any other
    /// source go straight back to sleep.
    ///
    /// The interrupt is attached before `source` is acknowledged, so an
    /// alarm firing in between still wakes the station.
    ///
    /// # Arguments
    ///
    /// * `source` - Device holding the wake line, typically the RTC
    pub fn sleep_until_wake<W: WakeSource>(&mut self, mut source: W) {
        self.state = WakeState::Sleeping;
        self.flag.arm();
        source.acknowledge();
        debug!("sleeping");

        let mut entries: u32 = 0;
        while !self.flag.take() {
            self.sleeper.sleep(self.flag);
            entries += 1;
        }

        self.state = WakeState::Processing;
        info!("woken by alarm ({=u32} sleep entries)", entries);
    }
}
