//! The operations a host debugger drives an adapter through.
//!
//! An adapter is created from a `Config` and an opener that acquires the hardware.  Nothing is
//! touched until `init`; `quit` (or dropping the adapter) restores every pin and releases every
//! mapping.  Only one session can be active at a time.
mod gpio;
mod pru;

pub use gpio::GpioTransport;
pub use pru::PruTransport;
#[cfg(feature = "std")]
pub use pru::open_uio;

use crate::driver::WireProtocol;
use crate::error::Error;
use crate::jtag::JtagCommand;
use crate::swd::SwdDriver;

pub trait DebugTransport {
    fn name(&self) -> &'static str;
    /// Wire protocols this adapter can speak.
    fn transports(&self) -> &'static [WireProtocol];
    /// Choose the protocol for the next session.
    fn select(&mut self, protocol: WireProtocol) -> Result<(), Error>;
    fn init(&mut self) -> Result<(), Error>;
    fn quit(&mut self) -> Result<(), Error>;
    fn khz_to_speed(&self, khz: u32) -> Result<u32, Error>;
    fn speed_to_khz(&self, speed: u32) -> Result<u32, Error>;
    fn set_speed(&mut self, speed: u32) -> Result<(), Error>;
    fn execute_queue(&mut self, commands: &mut [JtagCommand]) -> Result<(), Error>;
    /// SWD operations of the active session.
    fn swd(&mut self) -> Result<&mut dyn SwdDriver, Error>;
}
