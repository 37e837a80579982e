//! System & cycle-counter timestamp sources
//!
//! Producers stamp records with whichever source their logger selects; the
//! backend converts cycle counts to wall-clock nanoseconds at decode time
//! through [`RdtscClock`], which keeps a periodically resynced correlation
//! between the counter and the Unix epoch.

use chrono::Utc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Nanoseconds since the Unix epoch from the system clock.
#[inline(always)]
pub fn wall_clock_ns() -> u64 {
    Utc::now().timestamp_nanos_opt().unwrap_or(0).max(0) as u64
}

#[allow(unreachable_code)]
#[inline(always)]
pub fn now_tsc() -> u64 {
    #[cfg(target_arch = "x86_64")]
    {
        // _rdtsc does not wait for earlier instructions to retire, which is
        // the right trade for a timestamp source
        return unsafe { core::arch::x86_64::_rdtsc() };
    }
    #[cfg(target_arch = "aarch64")]
    {
        let counter: u64;
        unsafe {
            core::arch::asm!("mrs {}, cntvct_el0", out(reg) counter);
        }
        return counter;
    }
    wall_clock_ns()
}

/// Counter ticks per second when the hardware advertises it.
#[allow(unreachable_code)]
pub fn tsc_frequency_hint() -> Option<u64> {
    #[cfg(any(target_arch = "x86", target_arch = "x86_64"))]
    {
        return raw_cpuid::CpuId::new()
            .get_tsc_info()
            .and_then(|info| info.tsc_frequency())
            .filter(|frequency| *frequency > 0);
    }
    #[cfg(target_arch = "aarch64")]
    {
        let frequency: u64;
        unsafe {
            core::arch::asm!("mrs {}, cntfrq_el0", out(reg) frequency);
        }
        return (frequency > 0).then_some(frequency);
    }
    None
}

/// A correlated (cycle counter, wall clock) observation.
#[derive(Debug, Clone, Copy)]
pub struct TimeSample {
    pub tsc: u64,
    pub wall_ns: u64,
}

impl TimeSample {
    pub fn now() -> Self {
        Self {
            tsc: now_tsc(),
            wall_ns: wall_clock_ns(),
        }
    }
}

/// Correlation between the CPU cycle counter and the Unix epoch.
///
/// The calibration pair is read on every TSC record decode and from
/// arbitrary threads through `time_since_epoch`, while only the backend
/// writes it; a seqlock keeps the pair consistent without a mutex on the
/// read path.
pub struct RdtscClock {
    ns_per_tick: f64,
    version: AtomicU64,
    base_tsc: AtomicU64,
    base_wall_ns: AtomicU64,
}

impl RdtscClock {
    /// Calibrates the tick rate (a short sampling window when the hardware
    /// does not advertise it) and takes the first correlation pair.
    pub fn new() -> Self {
        let ns_per_tick = match tsc_frequency_hint() {
            Some(frequency) => 1_000_000_000.0 / frequency as f64,
            None => Self::measure_ns_per_tick(Duration::from_millis(10)),
        };
        let clock = Self {
            ns_per_tick,
            version: AtomicU64::new(0),
            base_tsc: AtomicU64::new(0),
            base_wall_ns: AtomicU64::new(0),
        };
        clock.resync(10_000);
        clock
    }

    fn measure_ns_per_tick(window: Duration) -> f64 {
        let begin = TimeSample::now();
        std::thread::sleep(window);
        let end = TimeSample::now();
        let ticks = end.tsc.saturating_sub(begin.tsc).max(1);
        end.wall_ns.saturating_sub(begin.wall_ns) as f64 / ticks as f64
    }

    /// Take a fresh correlation pair, retrying until the two wall-clock
    /// reads bracketing the counter sample land close enough together.
    /// Returns false when no tight observation arrives within `max_wait_us`.
    pub fn resync(&self, max_wait_us: u64) -> bool {
        const TIGHT_WINDOW_NS: u64 = 2_500;
        let deadline = wall_clock_ns() + max_wait_us * 1_000;
        loop {
            let before = wall_clock_ns();
            let tsc = now_tsc();
            let after = wall_clock_ns();
            if after.saturating_sub(before) <= TIGHT_WINDOW_NS {
                let wall_ns = before + after.saturating_sub(before) / 2;
                self.version.fetch_add(1, Ordering::Release);
                self.base_tsc.store(tsc, Ordering::Release);
                self.base_wall_ns.store(wall_ns, Ordering::Release);
                self.version.fetch_add(1, Ordering::Release);
                return true;
            }
            if after >= deadline {
                return false;
            }
        }
    }

    fn calibration(&self) -> (u64, u64) {
        loop {
            let v1 = self.version.load(Ordering::Acquire);
            let base_tsc = self.base_tsc.load(Ordering::Acquire);
            let base_wall_ns = self.base_wall_ns.load(Ordering::Acquire);
            let v2 = self.version.load(Ordering::Acquire);
            if v1 == v2 && v1 % 2 == 0 {
                return (base_tsc, base_wall_ns);
            }
            std::hint::spin_loop();
        }
    }

    /// Nanoseconds since the Unix epoch for a raw counter value. Callable
    /// from any thread.
    pub fn time_since_epoch(&self, tsc: u64) -> u64 {
        let (base_tsc, base_wall_ns) = self.calibration();
        let delta_ticks = tsc.wrapping_sub(base_tsc) as i64;
        let delta_ns = (delta_ticks as f64 * self.ns_per_tick) as i64;
        base_wall_ns.saturating_add_signed(delta_ns)
    }
}

impl Default for RdtscClock {
    fn default() -> Self {
        Self::new()
    }
}
