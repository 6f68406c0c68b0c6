//! The sixteen-state JTAG TAP controller.  `TapController` tracks the state of the chain and
//! finds the shortest TMS sequence to any other state.
use alloc::vec;
use alloc::vec::Vec;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Register {
    Data,
    Instruction,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TapState {
    Reset = 0,
    Idle = 1,
    SelectDR = 2,
    CaptureDR = 3,
    ShiftDR = 4,
    Exit1DR = 5,
    PauseDR = 6,
    Exit2DR = 7,
    UpdateDR = 8,
    SelectIR = 9,
    CaptureIR = 10,
    ShiftIR = 11,
    Exit1IR = 12,
    PauseIR = 13,
    Exit2IR = 14,
    UpdateIR = 15,
}

use TapState::*;

/// Successor of each state, indexed by state then TMS.
const EDGES: [[TapState; 2]; 16] = [
    [Idle, Reset],
    [Idle, SelectDR],
    [CaptureDR, SelectIR],
    [ShiftDR, Exit1DR],
    [ShiftDR, Exit1DR],
    [PauseDR, UpdateDR],
    [PauseDR, Exit2DR],
    [ShiftDR, UpdateDR],
    [Idle, SelectDR],
    [CaptureIR, Reset],
    [ShiftIR, Exit1IR],
    [ShiftIR, Exit1IR],
    [PauseIR, UpdateIR],
    [PauseIR, Exit2IR],
    [ShiftIR, UpdateIR],
    [Idle, SelectIR],
];

impl TapState {
    /// State entered after one TCK with TMS at `tms`.
    pub fn next(self, tms: bool) -> TapState {
        EDGES[self as usize][tms as usize]
    }

    /// States the chain may be parked in between commands.
    pub fn is_stable(self) -> bool {
        matches!(self, Reset | Idle | ShiftDR | PauseDR | ShiftIR | PauseIR)
    }

    pub fn shift(register: Register) -> TapState {
        match register {
            Register::Data => ShiftDR,
            Register::Instruction => ShiftIR,
        }
    }
}

#[derive(Clone)]
struct Path {
    path: Vec<bool>,
    state: TapState,
}

#[derive(Debug, Clone)]
pub struct TapController {
    state: TapState,
}

impl Default for TapController {
    fn default() -> Self {
        Self::new()
    }
}

impl TapController {
    /// The controller assumes the chain starts out in Test-Logic-Reset.
    pub fn new() -> Self {
        Self { state: Reset }
    }

    pub fn state(&self) -> TapState {
        self.state
    }

    pub fn set_state(&mut self, state: TapState) {
        self.state = state;
    }

    /// Follow one TCK with TMS at `tms`.
    pub fn advance(&mut self, tms: bool) {
        self.state = self.state.next(tms);
    }

    /// Five TCKs with TMS high reach Test-Logic-Reset from anywhere.
    pub fn reset_path() -> [bool; 5] {
        [true; 5]
    }

    /// Shortest TMS sequence from the current state to `target`.  Empty if already there.
    pub fn path_to(&self, target: TapState) -> Vec<bool> {
        if self.state == target {
            return Vec::new();
        }

        let mut paths = vec![Path { path: Vec::new(), state: self.state }];

        // Every state is reachable from every other within eight clocks
        loop {
            let mut newpaths = Vec::new();

            for p in paths {
                for tms in [false, true] {
                    let mut next = p.clone();
                    next.state = p.state.next(tms);
                    next.path.push(tms);

                    if next.state == target {
                        return next.path;
                    }
                    newpaths.push(next);
                }
            }

            paths = newpaths;
        }
    }
}
