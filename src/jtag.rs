//! Execution of a queue of JTAG commands over a `Bitbang` driver.
//!
//! Each TCK cycle drives the clock low with the new TMS and TDI levels, samples TDO, then
//! drives the clock high.  Sequences end with the clock low.
use alloc::vec;
use alloc::vec::Vec;

use tracing::{debug, trace};

use crate::cable::Bitbang;
use crate::error::Error;
use crate::statemachine::{Register, TapController, TapState};

/// One shift through the instruction or data register.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scan {
    pub register: Register,
    pub bits: usize,
    /// Bits to shift in, LSB of the first byte first.
    pub tdi: Vec<u8>,
    /// Bits shifted out, filled in when the scan runs.
    pub tdo: Vec<u8>,
    pub end: TapState,
}

impl Scan {
    pub fn new(register: Register, bits: usize, tdi: &[u8], end: TapState) -> Self {
        let mut data = vec![0; bits.div_ceil(8)];
        let len = data.len().min(tdi.len());
        data[..len].copy_from_slice(&tdi[..len]);
        Self { register, bits, tdi: data, tdo: Vec::new(), end }
    }

    /// Shift `bits` ones, as for reading a register out.
    pub fn read(register: Register, bits: usize, end: TapState) -> Self {
        Self::new(register, bits, &vec![0xff; bits.div_ceil(8)], end)
    }

    /// Captured bits as a little-endian integer.
    pub fn tdo_u64(&self) -> u64 {
        self.tdo.iter().take(8).enumerate().fold(0, |v, (i, b)| v | u64::from(*b) << (8 * i))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JtagCommand {
    /// Assert (`true`) or release the reset lines.
    Reset { trst: bool, srst: bool },
    Sleep { us: u32 },
    StateMove { end: TapState },
    /// Walk through `path`, where each state must be one TCK from the one before.
    PathMove { path: Vec<TapState> },
    RunTest { cycles: u32, end: TapState },
    /// Clock without changing state.
    StableClocks { cycles: u32 },
    TmsSequence { bits: Vec<bool> },
    Scan(Scan),
}

#[derive(Debug, Default)]
pub struct JtagExecutor {
    tap: TapController,
}

impl JtagExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> TapState {
        self.tap.state()
    }

    /// Run `commands` in order, filling in captured TDO.  Stops at the first error.
    pub fn execute<B: Bitbang + ?Sized>(&mut self, driver: &mut B, commands: &mut [JtagCommand]) -> Result<(), Error> {
        driver.blink(true)?;
        let result = commands.iter_mut().try_for_each(|cmd| self.run(driver, cmd));
        driver.blink(false)?;
        result
    }

    fn run<B: Bitbang + ?Sized>(&mut self, driver: &mut B, cmd: &mut JtagCommand) -> Result<(), Error> {
        match cmd {
            JtagCommand::Reset { trst, srst } => {
                debug!("reset trst: {} srst {}", trst, srst);
                driver.reset(*trst, *srst)?;
                if *trst {
                    self.tap.set_state(TapState::Reset);
                }
            }
            JtagCommand::Sleep { us } => {
                debug!("sleep {} us", us);
                driver.sleep_us(*us);
            }
            JtagCommand::StateMove { end } => self.state_move(driver, *end)?,
            JtagCommand::PathMove { path } => self.path_move(driver, path)?,
            JtagCommand::RunTest { cycles, end } => {
                debug!("runtest {} cycles, end in {:?}", cycles, end);
                self.state_move(driver, TapState::Idle)?;
                for _ in 0..*cycles {
                    self.clock(driver, false, false)?;
                }
                self.idle_clock(driver, false)?;
                self.state_move(driver, *end)?;
            }
            JtagCommand::StableClocks { cycles } => {
                let tms = self.tap.state() == TapState::Reset;
                for _ in 0..*cycles {
                    self.clock(driver, tms, false)?;
                }
                self.idle_clock(driver, tms)?;
            }
            JtagCommand::TmsSequence { bits } => {
                for tms in bits.iter() {
                    self.clock(driver, *tms, false)?;
                    self.tap.advance(*tms);
                }
                self.idle_clock(driver, bits.last().copied().unwrap_or(false))?;
            }
            JtagCommand::Scan(scan) => self.scan(driver, scan)?,
        }
        Ok(())
    }

    fn clock<B: Bitbang + ?Sized>(&mut self, driver: &mut B, tms: bool, tdi: bool) -> Result<bool, Error> {
        driver.write(false, tms, tdi)?;
        let tdo = driver.read()?;
        driver.write(true, tms, tdi)?;
        Ok(tdo)
    }

    fn idle_clock<B: Bitbang + ?Sized>(&mut self, driver: &mut B, tms: bool) -> Result<(), Error> {
        driver.write(false, tms, false)
    }

    fn state_move<B: Bitbang + ?Sized>(&mut self, driver: &mut B, end: TapState) -> Result<(), Error> {
        let path = self.tap.path_to(end);
        if path.is_empty() {
            return Ok(());
        }
        trace!("{:?} -> {:?}: {:?}", self.tap.state(), end, path);
        for tms in &path {
            self.clock(driver, *tms, false)?;
        }
        self.idle_clock(driver, path[path.len() - 1])?;
        self.tap.set_state(end);
        Ok(())
    }

    fn path_move<B: Bitbang + ?Sized>(&mut self, driver: &mut B, path: &[TapState]) -> Result<(), Error> {
        for next in path {
            let from = self.tap.state();
            let tms = if from.next(false) == *next {
                false
            } else if from.next(true) == *next {
                true
            } else {
                return Err(Error::InvalidPath { from, to: *next });
            };
            self.clock(driver, tms, false)?;
            self.tap.advance(tms);
        }
        self.idle_clock(driver, false)
    }

    fn scan<B: Bitbang + ?Sized>(&mut self, driver: &mut B, scan: &mut Scan) -> Result<(), Error> {
        debug!("{:?} scan of {} bits, end in {:?}", scan.register, scan.bits, scan.end);
        self.state_move(driver, TapState::shift(scan.register))?;

        scan.tdo = vec![0; scan.bits.div_ceil(8)];
        for i in 0..scan.bits {
            let last = i + 1 == scan.bits;
            let tdi = scan.tdi.get(i / 8).is_some_and(|b| (b >> (i % 8)) & 1 == 1);
            if self.clock(driver, last, tdi)? {
                scan.tdo[i / 8] |= 1 << (i % 8);
            }
            if last {
                self.tap.advance(true);
            }
        }
        self.idle_clock(driver, scan.bits > 0)?;

        self.state_move(driver, scan.end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{JtagTap, BYPASS_INSTRUCTION, IDCODE_INSTRUCTION};
    use pretty_assertions::assert_eq;

    const IDCODE: u32 = 0x4ba0_0477;

    fn run(tap: &mut JtagTap, commands: &mut [JtagCommand]) -> Result<JtagExecutor, Error> {
        let mut exec = JtagExecutor::new();
        exec.execute(tap, commands)?;
        Ok(exec)
    }

    #[test]
    fn read_idcode_after_reset() {
        let mut tap = JtagTap::new(IDCODE);
        let mut cmds = [
            JtagCommand::TmsSequence { bits: vec![true; 5] },
            JtagCommand::Scan(Scan::read(Register::Data, 32, TapState::Idle)),
        ];
        let exec = run(&mut tap, &mut cmds).unwrap();

        let JtagCommand::Scan(scan) = &cmds[1] else { unreachable!() };
        assert_eq!(scan.tdo_u64(), u64::from(IDCODE));
        assert_eq!(exec.state(), TapState::Idle);
        assert_eq!(tap.state(), TapState::Idle);
    }

    #[test]
    fn bypass_delays_by_one_bit() {
        let mut tap = JtagTap::new(IDCODE);
        let mut cmds = [
            JtagCommand::Scan(Scan::new(Register::Instruction, 4, &[BYPASS_INSTRUCTION], TapState::Idle)),
            JtagCommand::Scan(Scan::new(Register::Data, 8, &[0xa5], TapState::PauseDR)),
        ];
        run(&mut tap, &mut cmds).unwrap();

        let JtagCommand::Scan(ir) = &cmds[0] else { unreachable!() };
        let JtagCommand::Scan(dr) = &cmds[1] else { unreachable!() };
        // IR capture value
        assert_eq!(ir.tdo, [0b0001]);
        assert_eq!(tap.instruction(), BYPASS_INSTRUCTION);
        assert_eq!(dr.tdo, [0x4a]);
        assert_eq!(tap.state(), TapState::PauseDR);
    }

    #[test]
    fn run_test_clocks_in_idle() {
        let mut tap = JtagTap::new(IDCODE);
        let mut cmds = [JtagCommand::RunTest { cycles: 10, end: TapState::Idle }];
        let exec = run(&mut tap, &mut cmds).unwrap();
        // one clock from Reset to Idle, then ten in Idle
        assert_eq!(tap.rising_edges(), 11);
        assert_eq!(exec.state(), TapState::Idle);
    }

    #[test]
    fn stable_clocks_hold_the_state() {
        let mut tap = JtagTap::new(IDCODE);
        let mut cmds = [
            JtagCommand::StableClocks { cycles: 4 },
            JtagCommand::StateMove { end: TapState::PauseIR },
            JtagCommand::StableClocks { cycles: 4 },
        ];
        run(&mut tap, &mut cmds).unwrap();
        assert_eq!(tap.state(), TapState::PauseIR);
    }

    #[test]
    fn path_move_follows_adjacent_states() {
        let mut tap = JtagTap::new(IDCODE);
        let mut cmds = [JtagCommand::PathMove {
            path: vec![TapState::Idle, TapState::SelectDR, TapState::CaptureDR, TapState::Exit1DR, TapState::PauseDR],
        }];
        let exec = run(&mut tap, &mut cmds).unwrap();
        assert_eq!(exec.state(), TapState::PauseDR);
        assert_eq!(tap.state(), TapState::PauseDR);
    }

    #[test]
    fn path_move_rejects_jumps() {
        let mut tap = JtagTap::new(IDCODE);
        let mut cmds = [JtagCommand::PathMove { path: vec![TapState::ShiftDR] }];
        assert!(matches!(
            run(&mut tap, &mut cmds),
            Err(Error::InvalidPath { from: TapState::Reset, to: TapState::ShiftDR })
        ));
        assert!(!tap.led());
    }

    #[test]
    fn trst_resets_the_chain() {
        let mut tap = JtagTap::new(IDCODE);
        let mut cmds = [
            JtagCommand::Scan(Scan::new(Register::Instruction, 4, &[BYPASS_INSTRUCTION], TapState::Idle)),
            JtagCommand::Reset { trst: true, srst: true },
            JtagCommand::Sleep { us: 100 },
            JtagCommand::Reset { trst: false, srst: false },
        ];
        let exec = run(&mut tap, &mut cmds).unwrap();
        assert_eq!(exec.state(), TapState::Reset);
        assert_eq!(tap.instruction(), IDCODE_INSTRUCTION);
        assert_eq!(tap.slept_us(), 100);
        assert!(!tap.srst_asserted());
    }
}
