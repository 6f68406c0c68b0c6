//! Fixed bit patterns for resetting the SWD line and switching a dual-protocol debug port
//! between JTAG and SWD.  Patterns are sent LSB of each byte first.
use core::fmt;

use tracing::{debug, error};

use super::SwdWire;
use crate::error::Error;

/// At least 50 clocks with SWDIO high, then idle.
pub const LINE_RESET: &[u8] = &[0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0x00];
pub const LINE_RESET_LEN: usize = 64;

/// 0xE79E, LSB first.
pub const JTAG_TO_SWD: &[u8] = &[0x9e, 0xe7];
pub const JTAG_TO_SWD_LEN: usize = 16;

/// 0xE73C, LSB first.
pub const SWD_TO_JTAG: &[u8] = &[0x3c, 0xe7];
pub const SWD_TO_JTAG_LEN: usize = 16;

/// Idle clocks that follow a switch into SWD.
pub const SWITCH_IDLE_CYCLES: u32 = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpecialSequence {
    LineReset,
    JtagToSwd,
    SwdToJtag,
    JtagToDormant,
    SwdToDormant,
    DormantToSwd,
    DormantToJtag,
}

impl SpecialSequence {
    /// Bits and bit count, or `None` if the sequence can't be generated.
    pub fn pattern(self) -> Option<(&'static [u8], usize)> {
        match self {
            SpecialSequence::LineReset => Some((LINE_RESET, LINE_RESET_LEN)),
            SpecialSequence::JtagToSwd => Some((JTAG_TO_SWD, JTAG_TO_SWD_LEN)),
            SpecialSequence::SwdToJtag => Some((SWD_TO_JTAG, SWD_TO_JTAG_LEN)),
            _ => None,
        }
    }

    pub fn trailing_idle(self) -> u32 {
        match self {
            SpecialSequence::JtagToSwd => SWITCH_IDLE_CYCLES,
            _ => 0,
        }
    }
}

impl fmt::Display for SpecialSequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SpecialSequence::LineReset => "SWD line reset",
            SpecialSequence::JtagToSwd => "JTAG-to-SWD",
            SpecialSequence::SwdToJtag => "SWD-to-JTAG",
            SpecialSequence::JtagToDormant => "JTAG-to-DORMANT",
            SpecialSequence::SwdToDormant => "SWD-to-DORMANT",
            SpecialSequence::DormantToSwd => "DORMANT-to-SWD",
            SpecialSequence::DormantToJtag => "DORMANT-to-JTAG",
        })
    }
}

/// Clock `seq` out on `wire`.  Unsupported sequences fail before anything is sent.
pub fn emit<W: SwdWire + ?Sized>(wire: &mut W, seq: SpecialSequence) -> Result<(), Error> {
    let Some((bits, len)) = seq.pattern() else {
        error!("Sequence {} not supported", seq);
        return Err(Error::UnsupportedSequence(seq));
    };

    debug!("{}", seq);
    wire.sequence(bits, len)?;

    let idle = seq.trailing_idle();
    if idle > 0 {
        wire.idle(idle)?;
    }
    Ok(())
}
