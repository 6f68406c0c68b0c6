//! SWD offloaded to a programmable real-time unit (PRU) next to the host CPU.
//!
//! The host writes a command into the co-processor's data RAM, raises an event and waits for
//! the completion event.  Word 0 holds the command number in bits 0-7 and its arguments above
//! that; further arguments follow in words 1 and up.  Results come back in words 16 and 17.
use core::time::Duration;

use tracing::{debug, trace};

use crate::error::Error;
use crate::swd::{ReadResponse, SwdWire};

/// First word of the result area.
pub const RESULT_WORD: usize = 16;
/// SRST line in the GPIO_OUT mask.
pub const SRST_MASK: u32 = 1 << 15;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PruCommand {
    Halt = 0,
    Blink = 1,
    GpioOut = 2,
    GpioIn = 3,
    SigIdle = 4,
    SigGen = 5,
    ReadReg = 6,
    WriteReg = 7,
}

impl PruCommand {
    pub fn from_word(word: u32) -> Option<Self> {
        Some(match word & 0xff {
            0 => PruCommand::Halt,
            1 => PruCommand::Blink,
            2 => PruCommand::GpioOut,
            3 => PruCommand::GpioIn,
            4 => PruCommand::SigIdle,
            5 => PruCommand::SigGen,
            6 => PruCommand::ReadReg,
            7 => PruCommand::WriteReg,
            _ => return None,
        })
    }
}

/// Shared memory and event signalling of a co-processor.
pub trait Coprocessor {
    fn write_word(&mut self, index: usize, value: u32);
    fn read_word(&self, index: usize) -> u32;
    /// Signal that a command is ready and wait until the co-processor has finished it.
    fn rendezvous(&mut self, timeout: Duration) -> Result<(), Error>;
    /// Stop the co-processor.
    fn halt(&mut self);
}

pub struct PruSwd<C> {
    pru: C,
    timeout: Duration,
}

impl<C: Coprocessor> PruSwd<C> {
    pub fn new(pru: C, timeout: Duration) -> Self {
        Self { pru, timeout }
    }

    pub fn coprocessor(&self) -> &C {
        &self.pru
    }

    pub fn coprocessor_mut(&mut self) -> &mut C {
        &mut self.pru
    }

    fn command(&mut self, command: PruCommand, args: u32, words: &[u32]) -> Result<(), Error> {
        trace!("{:?} {:06x}", command, args);
        self.pru.write_word(0, command as u32 | args << 8);
        for (i, word) in words.iter().enumerate() {
            self.pru.write_word(i + 1, *word);
        }
        self.pru.rendezvous(self.timeout)
    }

    /// Drive the GPIO lines in `mask` to `high`.
    pub fn gpio_out(&mut self, mask: u32, high: bool) -> Result<(), Error> {
        self.command(PruCommand::GpioOut, 0, &[mask, high.into()])
    }

    pub fn gpio_in(&mut self) -> Result<u32, Error> {
        self.command(PruCommand::GpioIn, 0, &[])?;
        Ok(self.pru.read_word(RESULT_WORD))
    }

    /// Disable the co-processor.  Nothing is sent to the firmware, so this works even when
    /// its command loop no longer answers.
    pub fn halt(&mut self) {
        debug!("disabling co-processor");
        self.pru.halt();
    }
}

impl<C: Coprocessor> SwdWire for PruSwd<C> {
    fn sequence(&mut self, bits: &[u8], len: usize) -> Result<(), Error> {
        let len = len.min(bits.len() * 8);
        let mut words = alloc::vec![0u32; len.div_ceil(32)];
        for (i, byte) in bits[..len.div_ceil(8)].iter().enumerate() {
            words[i / 4] |= u32::from(*byte) << (8 * (i % 4));
        }
        self.command(PruCommand::SigGen, len as u32, &words)
    }

    fn idle(&mut self, cycles: u32) -> Result<(), Error> {
        self.command(PruCommand::SigIdle, 0, &[cycles])
    }

    fn read_transfer(&mut self, cmd: u8, idle_after: u8) -> Result<ReadResponse, Error> {
        self.command(PruCommand::ReadReg, u32::from(cmd) | u32::from(idle_after) << 16, &[])?;
        let result = self.pru.read_word(RESULT_WORD);
        Ok(ReadResponse {
            ack: (result & 0b111) as u8,
            data: self.pru.read_word(RESULT_WORD + 1),
            parity: result & 0x8000_0000 != 0,
        })
    }

    fn write_transfer(&mut self, cmd: u8, value: u32, parity: bool, idle_after: u8) -> Result<u8, Error> {
        let args = u32::from(cmd) | u32::from(parity) << 8 | u32::from(idle_after) << 16;
        self.command(PruCommand::WriteReg, args, &[value])?;
        Ok((self.pru.read_word(RESULT_WORD) & 0b111) as u8)
    }

    /// SRST is active low.
    fn drive_srst(&mut self, assert: bool) -> Result<(), Error> {
        self.gpio_out(SRST_MASK, !assert)
    }

    fn blink(&mut self, on: bool) -> Result<(), Error> {
        self.command(PruCommand::Blink, 0, &[on.into()])
    }
}

#[cfg(feature = "std")]
pub use self::uio::UioPruss;

#[cfg(feature = "std")]
mod uio {
    use std::fs::{File, OpenOptions};
    use std::io::Read;
    use std::os::fd::AsRawFd;
    use std::path::Path;
    use std::time::Duration;

    use memmap2::{MmapMut, MmapOptions};
    use tracing::{debug, error, info};

    use super::Coprocessor;
    use crate::error::Error;

    const MAP_LEN: usize = 0x4_0000;
    const DATA_RAM: usize = 0x0_0000;
    const DATA_RAM_LEN: usize = 0x2000;
    const INTC: usize = 0x2_0000;
    const INTC_SRSR0: usize = INTC + 0x200;
    const INTC_SICR: usize = INTC + 0x24;
    const PRU0_CONTROL: usize = 0x2_2000;
    const CONTROL_ENABLE: u32 = 1 << 1;
    const INSTRUCTION_RAM: usize = 0x3_4000;
    const INSTRUCTION_RAM_LEN: usize = 0x2000;

    /// System event the host raises to start a command.
    const ARM_TO_PRU0_EVENT: u32 = 21;
    /// System event the co-processor raises when it is done.
    const PRU0_TO_ARM_EVENT: u32 = 19;

    /// PRU 0 of a PRU-ICSS exposed through the Linux `uio_pruss` driver.
    pub struct UioPruss {
        uio: File,
        mem: MmapMut,
    }

    impl UioPruss {
        pub fn open(path: impl AsRef<Path>) -> Result<Self, Error> {
            let path = path.as_ref();
            let uio = OpenOptions::new().read(true).write(true).open(path).map_err(|source| {
                error!("Couldn't open {}: {}", path.display(), source);
                Error::Map { what: "PRU UIO device", source }
            })?;

            // SAFETY: the UIO device maps the PRU-ICSS register window, which nothing else in
            // this process aliases
            let mem = unsafe { MmapOptions::new().len(MAP_LEN).map_mut(&uio) }
                .map_err(|source| Error::Map { what: "PRU-ICSS memory", source })?;

            info!("opened PRU-ICSS at {}", path.display());
            Ok(Self { uio, mem })
        }

        /// Stop PRU 0, copy `program` into its instruction RAM and start it.
        pub fn load_program(&mut self, program: &[u8]) -> Result<(), Error> {
            if program.len() > INSTRUCTION_RAM_LEN || program.len() % 4 != 0 {
                error!("PRU program is {} bytes", program.len());
                return Err(Error::Unsupported("PRU program size"));
            }

            self.disable();
            for (i, word) in program.chunks_exact(4).enumerate() {
                let word = u32::from_le_bytes([word[0], word[1], word[2], word[3]]);
                self.write(INSTRUCTION_RAM + 4 * i, word);
            }
            self.write(PRU0_CONTROL, CONTROL_ENABLE);
            debug!("loaded {} byte PRU program", program.len());
            Ok(())
        }

        pub fn disable(&mut self) {
            self.write(PRU0_CONTROL, 0);
        }

        fn write(&mut self, offset: usize, value: u32) {
            assert!(offset % 4 == 0 && offset + 4 <= MAP_LEN);
            // SAFETY: in bounds and aligned, checked above
            unsafe { self.mem.as_mut_ptr().add(offset).cast::<u32>().write_volatile(value) }
        }

        fn read(&self, offset: usize) -> u32 {
            assert!(offset % 4 == 0 && offset + 4 <= MAP_LEN);
            // SAFETY: in bounds and aligned, checked above
            unsafe { self.mem.as_ptr().add(offset).cast::<u32>().read_volatile() }
        }

        fn wait_event(&mut self, timeout: Duration) -> Result<(), Error> {
            let mut fds = libc::pollfd {
                fd: self.uio.as_raw_fd(),
                events: libc::POLLIN,
                revents: 0,
            };
            let ms = timeout.as_millis().min(libc::c_int::MAX as u128) as libc::c_int;

            // SAFETY: one valid pollfd
            let ready = unsafe { libc::poll(&mut fds, 1, ms) };
            if ready < 0 {
                return Err(std::io::Error::last_os_error().into());
            }
            if ready == 0 {
                error!("PRU did not respond within {:?}", timeout);
                return Err(Error::Timeout(timeout));
            }

            // Event counter; the value itself doesn't matter
            let mut count = [0u8; 4];
            self.uio.read_exact(&mut count)?;
            Ok(())
        }
    }

    impl Coprocessor for UioPruss {
        fn write_word(&mut self, index: usize, value: u32) {
            assert!(4 * index < DATA_RAM_LEN);
            self.write(DATA_RAM + 4 * index, value);
        }

        fn read_word(&self, index: usize) -> u32 {
            assert!(4 * index < DATA_RAM_LEN);
            self.read(DATA_RAM + 4 * index)
        }

        fn rendezvous(&mut self, timeout: Duration) -> Result<(), Error> {
            self.write(INTC_SRSR0, 1 << ARM_TO_PRU0_EVENT);
            self.wait_event(timeout)?;
            self.write(INTC_SICR, PRU0_TO_ARM_EVENT);
            Ok(())
        }

        fn halt(&mut self) {
            self.disable();
        }
    }

    impl Drop for UioPruss {
        fn drop(&mut self) {
            self.disable();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec;
    use crate::swd::sequence::{self, SpecialSequence};
    use crate::swd::{Port, Request, SwdEngine, SwdFault};
    use crate::testing::FakePru;
    use pretty_assertions::assert_eq;

    fn engine() -> SwdEngine<PruSwd<FakePru>> {
        SwdEngine::new(PruSwd::new(FakePru::new(0x2ba0_1477), DEFAULT_TIMEOUT))
    }

    #[test]
    fn read_request_word() {
        let mut wire = PruSwd::new(FakePru::new(0x2ba0_1477), DEFAULT_TIMEOUT);
        let rsp = wire.read_transfer(0xa5, 3).unwrap();
        assert_eq!(wire.coprocessor().read_word(0), 0x0300_a506);
        assert_eq!(rsp, ReadResponse { ack: 1, data: 0x2ba0_1477, parity: false });
    }

    #[test]
    fn write_request_words() {
        let mut wire = PruSwd::new(FakePru::new(0), DEFAULT_TIMEOUT);
        let ack = wire.write_transfer(0x8b, 0x2000_0001, true, 8).unwrap();
        assert_eq!(ack, 1);
        assert_eq!(wire.coprocessor().read_word(0), 0x0801_8b07);
        assert_eq!(wire.coprocessor().read_word(1), 0x2000_0001);
    }

    #[test]
    fn sequences_are_packed_little_endian() {
        let mut wire = PruSwd::new(FakePru::new(0), DEFAULT_TIMEOUT);
        sequence::emit(&mut wire, SpecialSequence::JtagToSwd).unwrap();
        sequence::emit(&mut wire, SpecialSequence::LineReset).unwrap();

        let pru = wire.coprocessor();
        assert_eq!(pru.sequences[0], (16, vec![0x9e, 0xe7]));
        assert_eq!(pru.sequences[1].0, 64);
        assert_eq!(pru.read_word(0), 64 << 8 | 5);
        assert_eq!(pru.read_word(1), 0xffff_ffff);
        assert_eq!(pru.read_word(2), 0x00ff_ffff);
        assert_eq!(pru.idle_cycles, 8);
    }

    #[test]
    fn round_trip_through_the_coprocessor() {
        let mut swd = engine();
        swd.write_register(Request::write(Port::Access, 0x4), 0xe000_edf0, 0);
        assert_eq!(swd.read_register(Request::read(Port::Access, 0x4), 2), Some(0xe000_edf0));
        assert_eq!(swd.read_register(Request::read(Port::Debug, 0x0), 2), Some(0x2ba0_1477));
        assert_eq!(swd.run_queue(), Ok(()));

        let pru = swd.wire().coprocessor();
        assert_eq!(pru.registers.write_parity_errors, 0);
        // two AP delay cycles after the AP read, none after the DP read, eight on flush
        assert_eq!(pru.idle_cycles, 10);
    }

    #[test]
    fn timeout_is_latched() {
        let mut swd = engine();
        swd.wire_mut().coprocessor_mut().hang = true;
        assert_eq!(swd.read_register(Request::read(Port::Debug, 0), 0), None);
        assert_eq!(swd.run_queue(), Err(SwdFault::Timeout));
    }

    #[test]
    fn srst_is_active_low() {
        let mut wire = PruSwd::new(FakePru::new(0), DEFAULT_TIMEOUT);
        wire.drive_srst(true).unwrap();
        assert_eq!(wire.coprocessor().srst_level, Some(false));
        wire.drive_srst(false).unwrap();
        assert_eq!(wire.coprocessor().srst_level, Some(true));
    }

    #[test]
    fn halt_stops_the_coprocessor() {
        let mut wire = PruSwd::new(FakePru::new(0), DEFAULT_TIMEOUT);
        wire.blink(true).unwrap();
        wire.halt();
        let pru = wire.coprocessor();
        assert!(pru.led);
        assert!(pru.halted);
        assert_eq!(pru.commands, [PruCommand::Blink]);
    }

    #[test]
    fn halt_does_not_wait_on_a_hung_firmware() {
        let mut pru = FakePru::new(0);
        pru.hang = true;
        let mut wire = PruSwd::new(pru, Duration::from_millis(5));
        wire.halt();
        assert!(wire.coprocessor().halted);
        assert!(wire.coprocessor().commands.is_empty());
    }
}
