//! Conversion between a requested clock frequency and the number of busy-wait iterations the
//! bit-level driver spends after each pin transition.
//!
//! The relation is empirical: a host calibrated at a coefficient `c` and offset `o` clocks at
//! roughly `c / (delay + o)` kHz.  The defaults were measured on a 1 GHz Cortex-A8.
use serde::Deserialize;
use tracing::debug;

use crate::error::Error;

pub const DEFAULT_SPEED_COEFF: u32 = 113_714;
pub const DEFAULT_SPEED_OFFSET: u32 = 28;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SpeedCoeffs {
    pub coeff: u32,
    pub offset: u32,
}

impl Default for SpeedCoeffs {
    fn default() -> Self {
        Self {
            coeff: DEFAULT_SPEED_COEFF,
            offset: DEFAULT_SPEED_OFFSET,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Calibration {
    /// `delay = coeff / khz - offset`, clamped at zero.
    Linear(SpeedCoeffs),
    /// Speed values are frequencies already; used by adapters that time the wire themselves.
    Passthrough,
}

impl Default for Calibration {
    fn default() -> Self {
        Calibration::Linear(SpeedCoeffs::default())
    }
}

impl Calibration {
    /// Convert a frequency in kHz to a delay count.  Zero kHz requests adaptive clocking (RCLK),
    /// which bit-banging can't provide.
    pub fn khz_to_delay(&self, khz: u32) -> Result<u32, Error> {
        if khz == 0 {
            debug!("RCLK not supported");
            return Err(Error::Unsupported("RCLK"));
        }

        match self {
            Calibration::Linear(c) => Ok((c.coeff / khz).saturating_sub(c.offset)),
            Calibration::Passthrough => Ok(khz),
        }
    }

    /// Convert a delay count back to the frequency it approximately produces.
    pub fn delay_to_khz(&self, delay: u32) -> u32 {
        match self {
            // An all-zero calibration would divide by zero at delay 0
            Calibration::Linear(c) => c.coeff / delay.saturating_add(c.offset).max(1),
            Calibration::Passthrough => delay,
        }
    }
}
