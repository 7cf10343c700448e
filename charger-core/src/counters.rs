//! Elapsed charge time, delivered capacity and the tick context that owns them.

use core::fmt;

use crate::failure::{FailureInputs, FailureMonitor, FailureReport};

/// Tick rate of the periodic context (Hz).
pub const TICKS_PER_SECOND: u8 = 100;
/// mA·tick to mAh: 100 ticks/s * 3600 s/h.
const MA_TICKS_PER_MAH: u64 = 360_000;

/// Wall-clock time since charge start, advanced one tick at a time.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct ElapsedTime {
    pub ticks: u8,
    pub seconds: u8,
    pub minutes: u8,
    pub hours: u16,
}

impl ElapsedTime {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            ticks: 0,
            seconds: 0,
            minutes: 0,
            hours: 0,
        }
    }

    pub fn tick(&mut self) {
        self.ticks += 1;
        if self.ticks < TICKS_PER_SECOND {
            return;
        }
        self.ticks = 0;
        self.seconds += 1;
        if self.seconds < 60 {
            return;
        }
        self.seconds = 0;
        self.minutes += 1;
        if self.minutes < 60 {
            return;
        }
        self.minutes = 0;
        self.hours = self.hours.saturating_add(1);
    }

    #[must_use]
    pub fn total_seconds(&self) -> u32 {
        u32::from(self.hours) * 3_600 + u32::from(self.minutes) * 60 + u32::from(self.seconds)
    }
}

impl fmt::Display for ElapsedTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{:02}:{:02}", self.hours, self.minutes, self.seconds)
    }
}

/// Integral of output current over time.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct CapacityCounter {
    ma_ticks: u64,
}

impl CapacityCounter {
    #[must_use]
    pub const fn new() -> Self {
        Self { ma_ticks: 0 }
    }

    pub fn accumulate(&mut self, current_ma: u16) {
        self.ma_ticks = self.ma_ticks.saturating_add(u64::from(current_ma));
    }

    #[must_use]
    pub fn milliamp_hours(&self) -> u32 {
        u32::try_from(self.ma_ticks / MA_TICKS_PER_MAH).unwrap_or(u32::MAX)
    }
}

/// Counters shown alongside a charge session.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub struct SessionCounters {
    pub elapsed: ElapsedTime,
    pub capacity: CapacityCounter,
}

impl SessionCounters {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            elapsed: ElapsedTime::new(),
            capacity: CapacityCounter::new(),
        }
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }
}

/// Result of one periodic tick.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct TickReport {
    pub failure: FailureReport,
    pub counters: SessionCounters,
}

/// State written only by the periodic 100 Hz context.
#[derive(Clone, Debug, Default)]
pub struct TickContext {
    monitor: FailureMonitor,
    counters: SessionCounters,
}

impl TickContext {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            monitor: FailureMonitor::new(),
            counters: SessionCounters::new(),
        }
    }

    #[must_use]
    pub const fn monitor(&self) -> &FailureMonitor {
        &self.monitor
    }

    pub fn monitor_mut(&mut self) -> &mut FailureMonitor {
        &mut self.monitor
    }

    #[must_use]
    pub const fn counters(&self) -> SessionCounters {
        self.counters
    }

    /// Runs one tick. `reset_counters` carries a pending charge-start request.
    ///
    /// Time and capacity only advance while the output is actually delivering.
    pub fn on_tick(&mut self, inputs: &FailureInputs, reset_counters: bool) -> TickReport {
        if reset_counters {
            self.counters.reset();
        }

        let failure = self.monitor.tick(inputs);
        if failure.directive.relay_closed && inputs.output_requested {
            self.counters.elapsed.tick();
            self.counters.capacity.accumulate(inputs.measured.current);
        }

        TickReport {
            failure,
            counters: self.counters,
        }
    }
}
