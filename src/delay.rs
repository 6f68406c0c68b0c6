//! Timing strategies for the bit-level drivers.
//!
//! A driver calls `delay` after every pin transition with its calibrated iteration count, and
//! `sleep_us` for the explicit waits a JTAG queue can ask for.
use embedded_hal::delay::DelayNs;

pub trait DelayStrategy {
    /// Spend `iterations` calibrated delay units.
    fn delay(&mut self, iterations: u32);
    /// Wait at least `us` microseconds.
    fn sleep_us(&mut self, us: u32);
}

impl<T: DelayStrategy + ?Sized> DelayStrategy for &mut T {
    fn delay(&mut self, iterations: u32) {
        (**self).delay(iterations)
    }

    fn sleep_us(&mut self, us: u32) {
        (**self).sleep_us(us)
    }
}

/// Spin on the CPU.  Iteration counts from `speed::Calibration` assume this strategy.
#[cfg(feature = "std")]
#[derive(Debug, Default, Clone, Copy)]
pub struct BusyWait;

#[cfg(feature = "std")]
impl DelayStrategy for BusyWait {
    fn delay(&mut self, iterations: u32) {
        for i in 0..iterations {
            core::hint::black_box(i);
        }
    }

    fn sleep_us(&mut self, us: u32) {
        std::thread::sleep(core::time::Duration::from_micros(us.into()));
    }
}

/// Don't wait at all, for simulated hardware.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoDelay;

impl DelayStrategy for NoDelay {
    fn delay(&mut self, _iterations: u32) {}
    fn sleep_us(&mut self, _us: u32) {}
}

/// Use an `embedded-hal` delay provider, treating each iteration as a fixed number of
/// nanoseconds.
#[derive(Debug, Clone)]
pub struct HalDelay<D> {
    delay: D,
    ns_per_iteration: u32,
}

impl<D: DelayNs> HalDelay<D> {
    pub fn new(delay: D, ns_per_iteration: u32) -> Self {
        Self { delay, ns_per_iteration }
    }

    pub fn into_inner(self) -> D {
        self.delay
    }
}

impl<D: DelayNs> DelayStrategy for HalDelay<D> {
    fn delay(&mut self, iterations: u32) {
        if iterations > 0 {
            self.delay.delay_ns(iterations.saturating_mul(self.ns_per_iteration));
        }
    }

    fn sleep_us(&mut self, us: u32) {
        self.delay.delay_us(us);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct RecordNs(u64);

    impl DelayNs for RecordNs {
        fn delay_ns(&mut self, ns: u32) {
            self.0 += u64::from(ns);
        }
    }

    #[test]
    fn hal_delay_scales_iterations() {
        let mut d = HalDelay::new(RecordNs::default(), 10);
        d.delay(0);
        d.delay(7);
        assert_eq!(d.into_inner().0, 70);
    }

    #[test]
    fn hal_delay_sleeps_microseconds() {
        let mut d = HalDelay::new(RecordNs::default(), 10);
        d.sleep_us(3);
        assert_eq!(d.into_inner().0, 3000);
    }
}
