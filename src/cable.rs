//! Hardware backends live here.  Pin-level adapters implement the `Bitbang` trait; the
//! co-processor backend runs the SWD wire protocol itself and plugs in at `swd::SwdWire`.
pub mod am335x;
#[cfg(feature = "ftdi")]
pub mod ft232r;
pub mod gpio;
pub mod pru;

use crate::error::Error;

pub trait Bitbang {
    /// Drive the clock, TMS and data lines.  In SWD mode `clock` drives SWCLK, `data` drives
    /// SWDIO and `tms` is ignored.  Each line goes high where the argument is true.
    fn write(&mut self, clock: bool, tms: bool, data: bool) -> Result<(), Error>;
    /// Sample TDO.
    fn read(&mut self) -> Result<bool, Error>;
    /// Assert (`true`) or release the reset lines.  Absent lines are left alone.
    fn reset(&mut self, trst: bool, srst: bool) -> Result<(), Error>;
    /// Assert (`true`) or release SRST only, leaving TRST where it is.
    fn srst(&mut self, assert: bool) -> Result<(), Error>;
    /// Sample SWDIO.
    fn swdio_read(&mut self) -> Result<bool, Error>;
    /// Make SWDIO an output (`true`) or release it to the target.
    fn swdio_drive(&mut self, output: bool) -> Result<(), Error>;
    /// Switch the activity indicator, if the adapter has one.
    fn blink(&mut self, _on: bool) -> Result<(), Error> {
        Ok(())
    }
    /// Wait `us` microseconds between commands.
    fn sleep_us(&mut self, us: u32);
}

impl<T: Bitbang + ?Sized> Bitbang for &mut T {
    fn write(&mut self, clock: bool, tms: bool, data: bool) -> Result<(), Error> {
        (**self).write(clock, tms, data)
    }

    fn read(&mut self) -> Result<bool, Error> {
        (**self).read()
    }

    fn reset(&mut self, trst: bool, srst: bool) -> Result<(), Error> {
        (**self).reset(trst, srst)
    }

    fn srst(&mut self, assert: bool) -> Result<(), Error> {
        (**self).srst(assert)
    }

    fn swdio_read(&mut self) -> Result<bool, Error> {
        (**self).swdio_read()
    }

    fn swdio_drive(&mut self, output: bool) -> Result<(), Error> {
        (**self).swdio_drive(output)
    }

    fn blink(&mut self, on: bool) -> Result<(), Error> {
        (**self).blink(on)
    }

    fn sleep_us(&mut self, us: u32) {
        (**self).sleep_us(us)
    }
}
