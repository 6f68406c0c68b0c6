//! This crate drives JTAG and SWD debug signals from software.  At the lowest level a hardware
//! backend toggles pins: either a memory-mapped GPIO block (see `cable::am335x`), a set of
//! `embedded-hal` pins, an FTDI chip in bit-bang mode, or an offload co-processor that runs the
//! wire protocol itself (see `cable::pru`).  Pin-level backends implement the `Bitbang` trait.
//!
//! On top of the pins sits the SWD protocol engine in `swd`.  It frames request headers, decodes
//! acknowledgements, checks data parity and keeps a sticky queued result: once one transfer in a
//! batch fails, the rest of the batch is skipped and the failure is reported when the caller
//! flushes the queue with `run_queue`.  The same engine runs over either a bit-banged wire or the
//! co-processor wire.
//!
//! JTAG is handled by `jtag`, which executes a queue of abstract commands (state moves, scans,
//! idle clocks, resets) over any `Bitbang` driver, using the TAP state machine in
//! `statemachine` to find TMS paths.
//!
//! The `transport` module ties it together behind the operations a host debugger expects: `init`,
//! `quit`, speed conversion, JTAG queue execution and the SWD operation set.
//!
//! # Example
//! ```ignore
//! use jtag_swd_bitbang::cable::am335x;
//! use jtag_swd_bitbang::config::Config;
//! use jtag_swd_bitbang::delay::BusyWait;
//! use jtag_swd_bitbang::driver::WireProtocol;
//! use jtag_swd_bitbang::swd::{Port, Request};
//! use jtag_swd_bitbang::transport::{DebugTransport, GpioTransport};
//!
//! let config = Config::load("adapter.toml")?;
//! let mut transport = GpioTransport::new(config, BusyWait, |cfg: &Config| {
//!     am335x::open(cfg.peripheral_base, cfg.pads)
//! });
//! transport.select(WireProtocol::Swd)?;
//! transport.init()?;
//! let swd = transport.swd()?;
//! let idcode = swd.read_reg(Request::read(Port::Debug, 0), 0);
//! swd.run()?;
//! println!("DPIDR {:08x}", idcode.unwrap_or_default());
//! ```

#![cfg_attr(not(feature = "std"), no_std)]

extern crate alloc;

pub mod cable;
pub mod config;
pub mod delay;
pub mod driver;
pub mod error;
pub mod jtag;
pub mod pins;
pub mod speed;
pub mod statemachine;
pub mod swd;
pub mod transport;

#[cfg(any(test, feature = "test"))]
pub mod testing;

pub use crate::cable::Bitbang;
pub use crate::error::{Error, Status};
pub use crate::swd::{SwdDriver, SwdEngine, SwdFault};
pub use crate::transport::DebugTransport;
