//! SWD protocol engine.
//!
//! A transfer starts with an 8-bit request header sent LSB first:
//!
//! ```text
//!  bit 0    1      2    3  4   5       6     7
//!   start  APnDP  RnW  A[3:2]  parity  stop  park
//! ```
//!
//! followed by a turnaround, a 3-bit acknowledgement from the target, and for an OK
//! acknowledgement 32 data bits plus one parity bit.  Transfers are queued: each one returns
//! immediately, and the first failure in a batch is latched and reported by `run_queue`.
//! Transfers issued after a failure are skipped without touching the wire.
mod bitbang;
pub mod sequence;

use core::fmt;

use tracing::{debug, error};

use crate::error::{Error, Status};
pub use bitbang::BitbangSwd;
pub use sequence::SpecialSequence;

pub const CMD_START: u8 = 0x01;
pub const CMD_APNDP: u8 = 0x02;
pub const CMD_RNW: u8 = 0x04;
pub const CMD_A32: u8 = 0x18;
pub const CMD_PARITY: u8 = 0x20;
pub const CMD_STOP: u8 = 0x40;
pub const CMD_PARK: u8 = 0x80;

/// Idle clocks sent when a queue is flushed.
pub const FLUSH_IDLE_CYCLES: u32 = 8;

/// Parity bit for a 32-bit data phase: set when `value` has an odd number of ones, so that data
/// and parity together always carry an even count.
pub fn parity_u32(value: u32) -> bool {
    value.count_ones() & 1 == 1
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Port {
    Debug,
    Access,
}

impl fmt::Display for Port {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Port::Debug => "DP",
            Port::Access => "AP",
        })
    }
}

/// An SWD request header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Request(u8);

impl Request {
    /// Build a header for register `address` (a byte offset: 0x0, 0x4, 0x8 or 0xC) with the
    /// header parity filled in.
    pub const fn new(port: Port, read: bool, address: u8) -> Self {
        let mut cmd = CMD_START | CMD_PARK | ((address << 1) & CMD_A32);
        if matches!(port, Port::Access) {
            cmd |= CMD_APNDP;
        }
        if read {
            cmd |= CMD_RNW;
        }
        if ((cmd >> 1) & 0xf).count_ones() & 1 == 1 {
            cmd |= CMD_PARITY;
        }
        Self(cmd)
    }

    pub const fn read(port: Port, address: u8) -> Self {
        Self::new(port, true, address)
    }

    pub const fn write(port: Port, address: u8) -> Self {
        Self::new(port, false, address)
    }

    /// Use a header byte as produced by the host debugger.
    pub const fn from_raw(cmd: u8) -> Self {
        Self(cmd)
    }

    pub const fn raw(self) -> u8 {
        self.0
    }

    /// The header as it goes on the wire: start and park set, stop clear.
    pub const fn framed(self) -> u8 {
        (self.0 | CMD_START | CMD_PARK) & !CMD_STOP
    }

    pub const fn is_read(self) -> bool {
        self.0 & CMD_RNW != 0
    }

    pub const fn is_ap(self) -> bool {
        self.0 & CMD_APNDP != 0
    }

    pub const fn port(self) -> Port {
        if self.is_ap() {
            Port::Access
        } else {
            Port::Debug
        }
    }

    /// Register byte offset.
    pub const fn address(self) -> u8 {
        (self.0 & CMD_A32) >> 1
    }
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} reg {:X}",
            self.port(),
            if self.is_read() { "read" } else { "write" },
            self.address()
        )
    }
}

/// Acknowledgement returned by the target, as received LSB first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ack {
    Ok,
    Wait,
    Fault,
    /// Anything else, usually a target that isn't driving the line.
    Junk(u8),
}

impl Ack {
    pub const OK: u8 = 0b001;
    pub const WAIT: u8 = 0b010;
    pub const FAULT: u8 = 0b100;

    pub fn from_bits(bits: u8) -> Self {
        match bits & 0b111 {
            Self::OK => Ack::Ok,
            Self::WAIT => Ack::Wait,
            Self::FAULT => Ack::Fault,
            other => Ack::Junk(other),
        }
    }

    pub fn bits(self) -> u8 {
        match self {
            Ack::Ok => Self::OK,
            Ack::Wait => Self::WAIT,
            Ack::Fault => Self::FAULT,
            Ack::Junk(bits) => bits & 0b111,
        }
    }

    fn check(self) -> Result<(), SwdFault> {
        match self {
            Ack::Ok => Ok(()),
            Ack::Wait => Err(SwdFault::Wait),
            Ack::Fault => Err(SwdFault::Fault),
            Ack::Junk(bits) => Err(SwdFault::NoAck(bits)),
        }
    }
}

impl fmt::Display for Ack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Ack::Ok => "OK",
            Ack::Wait => "WAIT",
            Ack::Fault => "FAULT",
            Ack::Junk(_) => "JUNK",
        })
    }
}

/// A failed transfer, latched until the queue is flushed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SwdFault {
    #[error("target answered WAIT")]
    Wait,
    #[error("target answered FAULT")]
    Fault,
    #[error("no valid acknowledgement ({0:#05b})")]
    NoAck(u8),
    #[error("read data parity mismatch")]
    Parity,
    #[error("wire did not complete the transfer in time")]
    Timeout,
    #[error("wire failure")]
    Link,
}

impl SwdFault {
    pub fn status(self) -> Status {
        match self {
            SwdFault::Wait => Status::Wait,
            _ => Status::Fail,
        }
    }

    /// The same transfer may succeed if issued again.
    pub fn is_retryable(self) -> bool {
        self == SwdFault::Wait
    }

    fn from_wire(e: Error) -> Self {
        match e {
            Error::Timeout(_) => SwdFault::Timeout,
            Error::Swd(fault) => fault,
            e => {
                error!("SWD wire error: {}", e);
                SwdFault::Link
            }
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum QueueState {
    #[default]
    Idle,
    Executing,
    Faulted(SwdFault),
}

/// The sticky result of a batch of transfers.
#[derive(Debug, Default)]
pub struct QueuedResult {
    state: QueueState,
}

impl QueuedResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> QueueState {
        self.state
    }

    pub fn fault(&self) -> Option<SwdFault> {
        match self.state {
            QueueState::Faulted(fault) => Some(fault),
            _ => None,
        }
    }

    /// Run `op` unless a fault is already latched, latching its failure if it has one.
    pub fn run<T>(&mut self, op: impl FnOnce() -> Result<T, SwdFault>) -> Option<T> {
        if let QueueState::Faulted(fault) = self.state {
            debug!("skipping transfer, {} is pending", fault);
            return None;
        }

        self.state = QueueState::Executing;
        match op() {
            Ok(value) => Some(value),
            Err(fault) => {
                self.state = QueueState::Faulted(fault);
                None
            }
        }
    }

    /// Latch `fault` unless an earlier one is already pending.
    pub fn latch(&mut self, fault: SwdFault) {
        if self.fault().is_none() {
            self.state = QueueState::Faulted(fault);
        }
    }

    /// Hand back the batch result and start a new batch.
    pub fn take(&mut self) -> Result<(), SwdFault> {
        match core::mem::take(&mut self.state) {
            QueueState::Faulted(fault) => Err(fault),
            _ => Ok(()),
        }
    }
}

/// Data phase of a read as seen on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadResponse {
    pub ack: u8,
    pub data: u32,
    pub parity: bool,
}

/// Something that can run single SWD transfers.
pub trait SwdWire {
    /// Clock out the first `len` bits of `bits`, LSB of each byte first.
    fn sequence(&mut self, bits: &[u8], len: usize) -> Result<(), Error>;
    /// Clock `cycles` cycles with SWDIO low.
    fn idle(&mut self, cycles: u32) -> Result<(), Error>;
    /// Send framed header `cmd` and receive the acknowledgement and, for OK, the data phase.  An
    /// OK transfer is followed by `idle_after` idle cycles.
    fn read_transfer(&mut self, cmd: u8, idle_after: u8) -> Result<ReadResponse, Error>;
    /// Send framed header `cmd`, receive the acknowledgement and, for OK, send `value` and
    /// `parity`.  Returns the acknowledgement bits.
    fn write_transfer(&mut self, cmd: u8, value: u32, parity: bool, idle_after: u8) -> Result<u8, Error>;
    /// Assert (`true`) or release the system reset line.
    fn drive_srst(&mut self, assert: bool) -> Result<(), Error>;
    fn blink(&mut self, _on: bool) -> Result<(), Error> {
        Ok(())
    }
}

/// The SWD operations a host debugger drives.
pub trait SwdDriver {
    /// Start a new batch.  Any pending fault is discarded.
    fn init(&mut self) -> Result<(), Error>;
    fn switch_seq(&mut self, seq: SpecialSequence) -> Result<(), Error>;
    /// Queue a register read.  `None` when the read failed or was skipped; the reason comes
    /// out of `run`.
    fn read_reg(&mut self, cmd: Request, ap_delay_clk: u8) -> Option<u32>;
    fn write_reg(&mut self, cmd: Request, value: u32, ap_delay_clk: u8);
    /// Flush the queue and return the batch result.
    fn run(&mut self) -> Result<(), SwdFault>;
}

pub struct SwdEngine<W> {
    wire: W,
    queue: QueuedResult,
}

impl<W: SwdWire> SwdEngine<W> {
    pub fn new(wire: W) -> Self {
        Self {
            wire,
            queue: QueuedResult::new(),
        }
    }

    pub fn wire(&self) -> &W {
        &self.wire
    }

    pub fn wire_mut(&mut self) -> &mut W {
        &mut self.wire
    }

    pub fn into_wire(self) -> W {
        self.wire
    }

    pub fn queue(&self) -> &QueuedResult {
        &self.queue
    }

    pub fn switch_sequence(&mut self, seq: SpecialSequence) -> Result<(), Error> {
        sequence::emit(&mut self.wire, seq)
    }

    pub fn read_register(&mut self, cmd: Request, ap_delay_clk: u8) -> Option<u32> {
        assert!(cmd.is_read(), "read_register called with a write request");

        let wire = &mut self.wire;
        self.queue.run(|| {
            let idle = if cmd.is_ap() { ap_delay_clk } else { 0 };
            let rsp = wire.read_transfer(cmd.framed(), idle).map_err(SwdFault::from_wire)?;
            let ack = Ack::from_bits(rsp.ack);

            debug!("{} {} = {:08x}", ack, cmd, rsp.data);
            ack.check()?;
            if rsp.parity != parity_u32(rsp.data) {
                error!("SWD Read data parity mismatch");
                return Err(SwdFault::Parity);
            }
            Ok(rsp.data)
        })
    }

    pub fn write_register(&mut self, cmd: Request, value: u32, ap_delay_clk: u8) {
        assert!(!cmd.is_read(), "write_register called with a read request");

        let wire = &mut self.wire;
        self.queue.run(|| {
            let idle = if cmd.is_ap() { ap_delay_clk } else { 0 };
            let ack = wire
                .write_transfer(cmd.framed(), value, parity_u32(value), idle)
                .map_err(SwdFault::from_wire)?;
            let ack = Ack::from_bits(ack);

            debug!("{} {} = {:08x}", ack, cmd, value);
            ack.check()
        });
    }

    /// Flush with idle cycles and hand back the batch result.
    pub fn run_queue(&mut self) -> Result<(), SwdFault> {
        if let Err(e) = self.wire.idle(FLUSH_IDLE_CYCLES) {
            self.queue.latch(SwdFault::from_wire(e));
        }
        self.queue.take()
    }
}

impl<W: SwdWire> SwdDriver for SwdEngine<W> {
    fn init(&mut self) -> Result<(), Error> {
        self.queue = QueuedResult::new();
        Ok(())
    }

    fn switch_seq(&mut self, seq: SpecialSequence) -> Result<(), Error> {
        self.switch_sequence(seq)
    }

    fn read_reg(&mut self, cmd: Request, ap_delay_clk: u8) -> Option<u32> {
        self.read_register(cmd, ap_delay_clk)
    }

    fn write_reg(&mut self, cmd: Request, value: u32, ap_delay_clk: u8) {
        self.write_register(cmd, value, ap_delay_clk)
    }

    fn run(&mut self) -> Result<(), SwdFault> {
        self.run_queue()
    }
}
