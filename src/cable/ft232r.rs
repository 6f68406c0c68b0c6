//! Implement the `Bitbang` trait for FT232R-based adapters in asynchronous bit-bang mode.
//! Every pin change is one byte written to the chip; reads take an instantaneous snapshot of
//! the port.  SWDIO shares the TDI pin.
use libftd2xx::{BitMode, Ftdi, FtdiCommon};
use tracing::info;

use crate::cable::Bitbang;
use crate::error::Error;
use crate::pins::PinWrite;

/// Port bits of each signal.
#[derive(Debug, Clone, Copy)]
pub struct Ft232rPins {
    pub tck: u8,
    pub tms: u8,
    pub tdi: u8,
    pub tdo: u8,
    pub trst: Option<u8>,
    pub srst: Option<u8>,
}

pub struct Ft232r {
    ft: Ftdi,
    pins: Ft232rPins,
    outputs: u8,
    port: u8,
}

impl Ft232r {
    /// Open the adapter whose USB description is `description`.  `baud` sets the rate at which
    /// the chip clocks bytes onto the port, and so the TCK frequency.
    pub fn new(description: &str, baud: u32, pins: Ft232rPins) -> Result<Self, Error> {
        let mut ft = Ftdi::with_description(description)?;
        ft.set_baud_rate(baud)?;

        let outputs = [Some(pins.tck), Some(pins.tms), Some(pins.tdi), pins.trst, pins.srst]
            .into_iter()
            .flatten()
            .fold(0u8, |mask, pin| mask | 1 << pin);

        ft.set_bit_mode(outputs, BitMode::AsyncBitbang)?;
        ft.purge_all()?;
        info!("opened {} at {} baud", description, baud);

        let mut cable = Self { ft, pins, outputs, port: 0 };
        // Idle: TMS high, resets released
        let idle = PinWrite::new()
            .high(Some(pins.tms))
            .high(pins.trst)
            .high(pins.srst);
        cable.apply(idle)?;
        Ok(cable)
    }

    fn apply(&mut self, state: PinWrite) -> Result<(), Error> {
        self.port = state.apply(self.port.into()) as u8;
        self.ft.write(&[self.port])?;
        Ok(())
    }

    fn sample(&mut self, pin: u8) -> Result<bool, Error> {
        Ok((self.ft.bit_mode()? >> pin) & 1 == 1)
    }
}

impl Bitbang for Ft232r {
    fn write(&mut self, clock: bool, tms: bool, data: bool) -> Result<(), Error> {
        let state = PinWrite::new()
            .level(Some(self.pins.tck), clock)
            .level(Some(self.pins.tms), tms)
            .level(Some(self.pins.tdi), data);
        self.apply(state)
    }

    fn read(&mut self) -> Result<bool, Error> {
        self.sample(self.pins.tdo)
    }

    fn reset(&mut self, trst: bool, srst: bool) -> Result<(), Error> {
        let state = PinWrite::new().level(self.pins.trst, !trst).level(self.pins.srst, !srst);
        self.apply(state)
    }

    fn srst(&mut self, assert: bool) -> Result<(), Error> {
        self.apply(PinWrite::new().level(self.pins.srst, !assert))
    }

    fn swdio_read(&mut self) -> Result<bool, Error> {
        self.sample(self.pins.tdi)
    }

    fn swdio_drive(&mut self, output: bool) -> Result<(), Error> {
        let swdio = 1 << self.pins.tdi;
        let outputs = if output { self.outputs | swdio } else { self.outputs & !swdio };
        if outputs != self.outputs {
            self.ft.set_bit_mode(outputs, BitMode::AsyncBitbang)?;
            self.outputs = outputs;
        }
        Ok(())
    }

    fn sleep_us(&mut self, us: u32) {
        std::thread::sleep(std::time::Duration::from_micros(us.into()));
    }
}
