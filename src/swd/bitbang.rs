//! SWD transfers clocked out through a `Bitbang` driver.
//!
//! Each bit is one clock: SWCLK low with the data bit, sample SWDIO, SWCLK high.  The target
//! changes SWDIO on the rising edge and the host samples it while the clock is low.
use tracing::trace;

use super::{Ack, ReadResponse, SwdWire};
use crate::cable::Bitbang;
use crate::error::Error;

pub struct BitbangSwd<B> {
    driver: B,
}

impl<B: Bitbang> BitbangSwd<B> {
    pub fn new(driver: B) -> Self {
        Self { driver }
    }

    pub fn driver(&self) -> &B {
        &self.driver
    }

    pub fn driver_mut(&mut self) -> &mut B {
        &mut self.driver
    }

    pub fn into_inner(self) -> B {
        self.driver
    }

    fn clock_out(&mut self, bit: bool) -> Result<(), Error> {
        self.driver.write(false, false, bit)?;
        self.driver.write(true, false, bit)
    }

    /// Send the low `len` bits of `value`, LSB first.
    fn send(&mut self, value: u64, len: usize) -> Result<(), Error> {
        for i in 0..len {
            self.clock_out((value >> i) & 1 == 1)?;
        }
        Ok(())
    }

    /// Clock `len` bits in from the target, LSB first.
    fn receive(&mut self, len: usize) -> Result<u64, Error> {
        let mut value = 0;
        for i in 0..len {
            self.driver.write(false, false, false)?;
            if self.driver.swdio_read()? {
                value |= 1 << i;
            }
            self.driver.write(true, false, false)?;
        }
        Ok(value)
    }
}

impl<B: Bitbang> SwdWire for BitbangSwd<B> {
    fn sequence(&mut self, bits: &[u8], len: usize) -> Result<(), Error> {
        trace!("sequence of {} bits", len);
        for i in 0..len.min(bits.len() * 8) {
            self.clock_out((bits[i / 8] >> (i % 8)) & 1 == 1)?;
        }
        Ok(())
    }

    fn idle(&mut self, cycles: u32) -> Result<(), Error> {
        for _ in 0..cycles {
            self.clock_out(false)?;
        }
        Ok(())
    }

    fn read_transfer(&mut self, cmd: u8, idle_after: u8) -> Result<ReadResponse, Error> {
        self.send(cmd.into(), 8)?;

        self.driver.swdio_drive(false)?;
        // turnaround, ack, data, parity, turnaround
        let raw = self.receive(1 + 3 + 32 + 1 + 1);
        self.driver.swdio_drive(true)?;
        let raw = raw?;

        let rsp = ReadResponse {
            ack: ((raw >> 1) & 0b111) as u8,
            data: (raw >> 4) as u32,
            parity: (raw >> 36) & 1 == 1,
        };
        trace!("read {:02x}: {:x?}", cmd, rsp);

        if rsp.ack == Ack::OK && idle_after > 0 {
            self.idle(idle_after.into())?;
        }
        Ok(rsp)
    }

    fn write_transfer(&mut self, cmd: u8, value: u32, parity: bool, idle_after: u8) -> Result<u8, Error> {
        self.send(cmd.into(), 8)?;

        self.driver.swdio_drive(false)?;
        // turnaround, ack, turnaround
        let raw = self.receive(1 + 3 + 1);
        self.driver.swdio_drive(true)?;
        let raw = raw?;

        let ack = ((raw >> 1) & 0b111) as u8;
        trace!("write {:02x}: ack {:03b}", cmd, ack);

        if ack == Ack::OK {
            self.send(u64::from(value) | u64::from(parity) << 32, 33)?;
            if idle_after > 0 {
                self.idle(idle_after.into())?;
            }
        }
        Ok(ack)
    }

    fn drive_srst(&mut self, assert: bool) -> Result<(), Error> {
        self.driver.srst(assert)
    }

    fn blink(&mut self, on: bool) -> Result<(), Error> {
        self.driver.blink(on)
    }
}
