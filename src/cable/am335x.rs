//! A memory-mapped GPIO block with 3-bit function select fields, ten pins per word, and
//! separate set, clear and level registers.  54 pins are split across two words for the set,
//! clear and level registers.
//!
//! On a Linux host the block is reached by mapping `/dev/mem` at `peripheral_base + 0x200000`.
//! The pad control block at `peripheral_base + 0x100000` sets drive strength, hysteresis and
//! slew rate for pins 0-27.
use serde::Deserialize;

use crate::pins::{GpioController, PinWrite};

pub const DEFAULT_PERIPHERAL_BASE: u64 = 0x2000_0000;
pub const GPIO_BLOCK_OFFSET: u64 = 0x20_0000;
pub const PADS_BLOCK_OFFSET: u64 = 0x10_0000;

const GPSET0: usize = 7;
const GPCLR0: usize = 10;
const GPLEV0: usize = 13;
/// Pad control word for pins 0-27.
const PADS_GPIO_0_27: usize = 11;
/// Written into the top byte of every pad control write.
const PADS_PASSWORD: u32 = 0x5a00_0000;

/// Word-addressed access to a register window.
pub trait RegisterBlock {
    fn read(&self, word: usize) -> u32;
    fn write(&mut self, word: usize, value: u32);
}

pub struct Am335xGpio<R> {
    regs: R,
}

impl<R: RegisterBlock> Am335xGpio<R> {
    pub fn new(regs: R) -> Self {
        Self { regs }
    }

    pub fn registers(&self) -> &R {
        &self.regs
    }

    fn write_mask(&mut self, first: usize, mask: u64) {
        let low = mask as u32;
        let high = (mask >> 32) as u32;
        if low != 0 {
            self.regs.write(first, low);
        }
        if high != 0 {
            self.regs.write(first + 1, high);
        }
    }
}

impl<R: RegisterBlock> GpioController for Am335xGpio<R> {
    const MAX_PIN: u8 = 53;

    fn function(&self, pin: u8) -> u8 {
        let shift = u32::from(pin % 10) * 3;
        ((self.regs.read(usize::from(pin / 10)) >> shift) & 0b111) as u8
    }

    fn set_function(&mut self, pin: u8, function: u8) {
        let word = usize::from(pin / 10);
        let shift = u32::from(pin % 10) * 3;
        let value = self.regs.read(word) & !(0b111 << shift);
        self.regs.write(word, value | u32::from(function & 0b111) << shift);
    }

    fn write(&mut self, state: PinWrite) {
        self.write_mask(GPSET0, state.set_mask());
        self.write_mask(GPCLR0, state.clear_mask());
    }

    fn levels(&self) -> u64 {
        u64::from(self.regs.read(GPLEV0)) | u64::from(self.regs.read(GPLEV0 + 1)) << 32
    }
}

/// Electrical settings for the GPIO pads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PadConfig {
    /// Drive strength code, 0 (2 mA) to 7 (16 mA).
    pub drive: u8,
    pub hysteresis: bool,
    pub slew_limited: bool,
}

impl Default for PadConfig {
    fn default() -> Self {
        Self {
            drive: 1,
            hysteresis: true,
            slew_limited: true,
        }
    }
}

impl PadConfig {
    pub fn register_value(&self) -> u32 {
        PADS_PASSWORD
            | u32::from(!self.slew_limited) << 4
            | u32::from(self.hysteresis) << 3
            | u32::from(self.drive & 0b111)
    }
}

pub fn configure_pads<R: RegisterBlock>(pads: &mut R, config: PadConfig) {
    pads.write(PADS_GPIO_0_27, config.register_value());
}

#[cfg(feature = "std")]
pub use self::devmem::{open, DevMem};

#[cfg(feature = "std")]
mod devmem {
    use std::fs::OpenOptions;
    use std::os::unix::fs::OpenOptionsExt;

    use memmap2::{MmapMut, MmapOptions};
    use tracing::{error, info};

    use super::{configure_pads, Am335xGpio, PadConfig, RegisterBlock, GPIO_BLOCK_OFFSET, PADS_BLOCK_OFFSET};
    use crate::error::Error;

    const BLOCK_LEN: usize = 4096;

    /// One page of physical memory mapped through `/dev/mem`.
    pub struct DevMem {
        map: MmapMut,
    }

    impl DevMem {
        pub fn map(base: u64, what: &'static str) -> Result<Self, Error> {
            let dev = OpenOptions::new()
                .read(true)
                .write(true)
                .custom_flags(libc::O_SYNC)
                .open("/dev/mem")
                .map_err(|source| {
                    error!("Cannot open /dev/mem: {}", source);
                    Error::Map { what: "/dev/mem", source }
                })?;

            // SAFETY: device registers; every access goes through volatile reads and writes
            let map = unsafe { MmapOptions::new().offset(base).len(BLOCK_LEN).map_mut(&dev) }.map_err(|source| {
                error!("Cannot map {} at {:#x}: {}", what, base, source);
                Error::Map { what, source }
            })?;

            Ok(Self { map })
        }
    }

    impl RegisterBlock for DevMem {
        fn read(&self, word: usize) -> u32 {
            assert!(4 * word + 4 <= BLOCK_LEN);
            // SAFETY: aligned and inside the mapping
            unsafe { self.map.as_ptr().cast::<u32>().add(word).read_volatile() }
        }

        fn write(&mut self, word: usize, value: u32) {
            assert!(4 * word + 4 <= BLOCK_LEN);
            // SAFETY: aligned and inside the mapping
            unsafe { self.map.as_mut_ptr().cast::<u32>().add(word).write_volatile(value) }
        }
    }

    /// Map the GPIO block and program the pads.
    pub fn open(peripheral_base: u64, pads: PadConfig) -> Result<Am335xGpio<DevMem>, Error> {
        let gpio = DevMem::map(peripheral_base + GPIO_BLOCK_OFFSET, "GPIO registers")?;
        let mut pad_regs = DevMem::map(peripheral_base + PADS_BLOCK_OFFSET, "pad registers")?;
        configure_pads(&mut pad_regs, pads);
        info!("pads set to {:#010x}", pads.register_value());
        Ok(Am335xGpio::new(gpio))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pins::{FUNCTION_INPUT, FUNCTION_OUTPUT};
    use alloc::vec::Vec;
    use pretty_assertions::assert_eq;

    #[derive(Default)]
    struct Registers {
        words: [u32; 16],
        writes: Vec<(usize, u32)>,
    }

    impl RegisterBlock for Registers {
        fn read(&self, word: usize) -> u32 {
            self.words[word]
        }

        fn write(&mut self, word: usize, value: u32) {
            self.writes.push((word, value));
            self.words[word] = value;
        }
    }

    #[test]
    fn function_select_fields() {
        let mut gpio = Am335xGpio::new(Registers::default());
        gpio.set_function(0, 0b111);
        gpio.set_function(11, FUNCTION_OUTPUT);
        gpio.set_function(19, 0b100);
        gpio.set_function(53, FUNCTION_OUTPUT);
        assert_eq!(gpio.registers().words[0], 0b111);
        assert_eq!(gpio.registers().words[1], 0b001 << 3 | 0b100 << 27);
        assert_eq!(gpio.registers().words[5], 0b001 << 9);

        gpio.set_function(19, FUNCTION_INPUT);
        assert_eq!(gpio.function(19), FUNCTION_INPUT);
        assert_eq!(gpio.function(11), FUNCTION_OUTPUT);
        assert_eq!(gpio.function(0), 0b111);
    }

    #[test]
    fn set_then_clear_across_both_words() {
        let mut gpio = Am335xGpio::new(Registers::default());
        gpio.write(PinWrite::new().high(Some(4)).high(Some(40)).low(Some(5)));
        assert_eq!(gpio.registers().writes, [(7, 1 << 4), (8, 1 << 8), (10, 1 << 5)]);
    }

    #[test]
    fn levels_span_both_words() {
        let mut regs = Registers::default();
        regs.words[13] = 1 << 9;
        regs.words[14] = 1 << 3;
        let gpio = Am335xGpio::new(regs);
        assert_eq!(gpio.levels(), 1 << 9 | 1 << 35);
    }

    #[test]
    fn default_pads() {
        assert_eq!(PadConfig::default().register_value(), 0x5a00_0009);
        let mut regs = Registers::default();
        configure_pads(&mut regs, PadConfig { drive: 7, hysteresis: false, slew_limited: false });
        assert_eq!(regs.writes, [(11, 0x5a00_0017)]);
    }
}
