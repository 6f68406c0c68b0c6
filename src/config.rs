//! Adapter configuration, normally loaded from a TOML file:
//!
//! ```toml
//! peripheral_base = 0x3f000000
//!
//! [pins]
//! tck = 11
//! tms = 25
//! tdi = 10
//! tdo = 9
//! srst = 24
//! swclk = 11
//! swdio = 25
//!
//! [speed]
//! coeff = 113714
//! offset = 28
//!
//! [reset]
//! connect_under_reset = true
//! srst_no_gating = true
//! ```
use alloc::string::String;
use core::time::Duration;

use serde::Deserialize;

use crate::cable::am335x::{PadConfig, DEFAULT_PERIPHERAL_BASE};
use crate::pins::PinAssignment;
use crate::speed::{Calibration, SpeedCoeffs};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub pins: PinAssignment,
    pub speed: SpeedCoeffs,
    pub peripheral_base: u64,
    pub pads: PadConfig,
    pub reset: ResetConfig,
    pub coprocessor: CoprocessorConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            pins: PinAssignment::default(),
            speed: SpeedCoeffs::default(),
            peripheral_base: DEFAULT_PERIPHERAL_BASE,
            pads: PadConfig::default(),
            reset: ResetConfig::default(),
            coprocessor: CoprocessorConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ResetConfig {
    /// Hold SRST asserted from `init` on, so the target can be attached before it runs.
    pub connect_under_reset: bool,
    /// SRST does not reset the debug port.  Connecting under reset needs this.
    pub srst_no_gating: bool,
}

impl ResetConfig {
    pub fn assert_srst_on_init(&self) -> bool {
        self.connect_under_reset && self.srst_no_gating
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CoprocessorConfig {
    /// UIO device of the PRU subsystem.
    pub uio: String,
    /// Firmware image for PRU 0.
    pub firmware: String,
    pub timeout_ms: u64,
}

impl Default for CoprocessorConfig {
    fn default() -> Self {
        Self {
            uio: "/dev/uio0".into(),
            firmware: "/lib/firmware/bbg-swd.bin".into(),
            timeout_ms: 1000,
        }
    }
}

impl CoprocessorConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Config {
    pub fn calibration(&self) -> Calibration {
        Calibration::Linear(self.speed)
    }

    #[cfg(feature = "std")]
    pub fn from_toml_str(s: &str) -> Result<Self, crate::error::Error> {
        Ok(toml::from_str(s)?)
    }

    #[cfg(feature = "std")]
    pub fn load(path: impl AsRef<std::path::Path>) -> Result<Self, crate::error::Error> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&text)?;
        tracing::debug!("loaded configuration from {}", path.display());
        Ok(config)
    }
}
