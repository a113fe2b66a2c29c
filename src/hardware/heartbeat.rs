//! 10 ms tick counters shared between a timer interrupt (or task) and the
//! main loop.
//!
//! [`Heartbeat::tick`] advances the base counter and raises one-shot flags
//! every 100, 500 and 1000 ms, each period on its own counter so a wrapping
//! base count never shortens one; the loop consumes them with
//! [`Heartbeat::take`]. All state sits behind a critical section, so a
//! `static Heartbeat` is safe to share with an ISR.

use core::cell::Cell;
use critical_section::Mutex;

/// Base tick period.
pub const TICK_MS: u32 = 10;

/// Flag period.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Period {
    Ms100,
    Ms500,
    Ms1000,
}

impl Period {
    const fn ticks(self) -> u32 {
        match self {
            Period::Ms100 => 100 / TICK_MS,
            Period::Ms500 => 500 / TICK_MS,
            Period::Ms1000 => 1000 / TICK_MS,
        }
    }

    const fn index(self) -> usize {
        self as usize
    }

    const fn bit(self) -> u8 {
        match self {
            Period::Ms100 => 1 << 0,
            Period::Ms500 => 1 << 1,
            Period::Ms1000 => 1 << 2,
        }
    }
}

const PERIODS: [Period; 3] = [Period::Ms100, Period::Ms500, Period::Ms1000];

/// Number of 100 ms steps the liveness counter cycles through.
const LIFE_CYCLE: u8 = 5;

#[derive(Clone, Copy, Debug, Default)]
struct State {
    ticks: u32,
    /// Ticks since each period last fired, indexed by `Period::index`
    since: [u8; PERIODS.len()],
    /// One-shot flags, cleared by `take`
    pending: u8,
    /// Square waves toggling once per period
    blink: u8,
    life: u8,
}

pub struct Heartbeat {
    state: Mutex<Cell<State>>,
}

impl Default for Heartbeat {
    fn default() -> Self {
        Self::new()
    }
}

impl Heartbeat {
    pub const fn new() -> Self {
        Self {
            state: Mutex::new(Cell::new(State {
                ticks: 0,
                since: [0; PERIODS.len()],
                pending: 0,
                blink: 0,
                life: 0,
            })),
        }
    }

    /// Counter preset to `ticks`, phases starting fresh.
    #[cfg(test)]
    fn starting_at(ticks: u32) -> Self {
        let hb = Self::new();
        critical_section::with(|cs| {
            let cell = hb.state.borrow(cs);
            let mut s = cell.get();
            s.ticks = ticks;
            cell.set(s);
        });
        hb
    }

    /// Advance by one 10 ms tick.
    pub fn tick(&self) {
        critical_section::with(|cs| {
            let cell = self.state.borrow(cs);
            let mut s = cell.get();
            s.ticks = s.ticks.wrapping_add(1);
            for period in PERIODS {
                let since = &mut s.since[period.index()];
                *since += 1;
                if u32::from(*since) >= period.ticks() {
                    *since = 0;
                    s.pending |= period.bit();
                    s.blink ^= period.bit();
                    if period == Period::Ms100 {
                        s.life = (s.life + 1) % LIFE_CYCLE;
                    }
                }
            }
            cell.set(s);
        });
    }

    /// Consume the one-shot flag for `period`. True at most once per period.
    pub fn take(&self, period: Period) -> bool {
        critical_section::with(|cs| {
            let cell = self.state.borrow(cs);
            let mut s = cell.get();
            let raised = s.pending & period.bit() != 0;
            s.pending &= !period.bit();
            cell.set(s);
            raised
        })
    }

    /// Square wave with half-period `period`.
    pub fn blink(&self, period: Period) -> bool {
        critical_section::with(|cs| self.state.borrow(cs).get().blink & period.bit() != 0)
    }

    /// Cycles 0..5 every 100 ms; a value that stops changing means the tick source froze.
    pub fn life_counter(&self) -> u8 {
        critical_section::with(|cs| self.state.borrow(cs).get().life)
    }

    /// Ticks since start, wrapping.
    pub fn ticks(&self) -> u32 {
        critical_section::with(|cs| self.state.borrow(cs).get().ticks)
    }

    /// Milliseconds since start, wrapping.
    pub fn millis(&self) -> u32 {
        self.ticks().wrapping_mul(TICK_MS)
    }
}
