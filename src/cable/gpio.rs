//! Implement the `Bitbang` trait for a set of `embedded-hal` pins.  SWD shares the clock with
//! TCK and the data line with TDI, so the TDI pin must be able to switch direction.
use core::convert::Infallible;

use embedded_hal::digital::{ErrorType, InputPin, OutputPin, PinState};

use crate::cable::Bitbang;
use crate::delay::DelayStrategy;
use crate::error::Error;

/// A pin that can be turned around between output and input.
pub trait SwdioPin: InputPin + OutputPin {
    fn set_as_output(&mut self) -> Result<(), Self::Error>;
    fn set_as_input(&mut self) -> Result<(), Self::Error>;
}

/// Stands in for a reset line that isn't wired.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoPin;

impl ErrorType for NoPin {
    type Error = Infallible;
}

impl OutputPin for NoPin {
    fn set_low(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}

pub struct Gpio<Clk, Tms, Tdi, Tdo, Rst, Delay> {
    delay: Delay,
    iterations: u32,
    clock: Clk,
    tms: Tms,
    tdi: Tdi,
    tdo: Tdo,
    trst: Option<Rst>,
    srst: Option<Rst>,
}

impl<Clk, Tms, Tdi, Tdo, Rst, Delay> Gpio<Clk, Tms, Tdi, Tdo, Rst, Delay>
where
    Clk: OutputPin,
    Tms: OutputPin,
    Tdi: SwdioPin,
    Tdo: InputPin,
    Rst: OutputPin,
    Delay: DelayStrategy,
{
    pub fn new(clock: Clk, tms: Tms, tdi: Tdi, tdo: Tdo, delay: Delay) -> Self {
        Gpio { delay, iterations: 0, clock, tms, tdi, tdo, trst: None, srst: None }
    }

    pub fn with_trst(mut self, trst: Rst) -> Self {
        self.trst = Some(trst);
        self
    }

    pub fn with_srst(mut self, srst: Rst) -> Self {
        self.srst = Some(srst);
        self
    }

    /// Delay iterations after each transition.
    pub fn set_delay(&mut self, iterations: u32) {
        self.iterations = iterations;
    }
}

impl<Clk, Tms, Tdi, Tdo, Rst, Delay> Bitbang for Gpio<Clk, Tms, Tdi, Tdo, Rst, Delay>
where
    Clk: OutputPin,
    Tms: OutputPin,
    Tdi: SwdioPin,
    Tdo: InputPin,
    Rst: OutputPin,
    Delay: DelayStrategy,
{
    fn write(&mut self, clock: bool, tms: bool, data: bool) -> Result<(), Error> {
        // Data lines settle before the clock edge
        self.tms.set_state(PinState::from(tms)).map_err(Error::pin)?;
        self.tdi.set_state(PinState::from(data)).map_err(Error::pin)?;
        self.clock.set_state(PinState::from(clock)).map_err(Error::pin)?;
        self.delay.delay(self.iterations);
        Ok(())
    }

    fn read(&mut self) -> Result<bool, Error> {
        self.tdo.is_high().map_err(Error::pin)
    }

    fn reset(&mut self, trst: bool, srst: bool) -> Result<(), Error> {
        if let Some(pin) = self.trst.as_mut() {
            pin.set_state(PinState::from(!trst)).map_err(Error::pin)?;
        }
        if let Some(pin) = self.srst.as_mut() {
            pin.set_state(PinState::from(!srst)).map_err(Error::pin)?;
        }
        Ok(())
    }

    fn srst(&mut self, assert: bool) -> Result<(), Error> {
        match self.srst.as_mut() {
            Some(pin) => pin.set_state(PinState::from(!assert)).map_err(Error::pin),
            None => Ok(()),
        }
    }

    fn swdio_read(&mut self) -> Result<bool, Error> {
        self.tdi.is_high().map_err(Error::pin)
    }

    fn swdio_drive(&mut self, output: bool) -> Result<(), Error> {
        if output {
            self.tdi.set_as_output().map_err(Error::pin)
        } else {
            self.tdi.set_as_input().map_err(Error::pin)
        }
    }

    fn sleep_us(&mut self, us: u32) {
        self.delay.sleep_us(us);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::swd::{BitbangSwd, Port, Request, SwdEngine, SwdWire};
    use crate::testing::{CountingDelay, SwdTarget};
    use alloc::rc::Rc;
    use core::cell::RefCell;

    /// Pins that forward to a shared SWD target model.
    #[derive(Clone)]
    struct Wire(Rc<RefCell<WireState>>);

    struct WireState {
        target: SwdTarget,
        clock: bool,
        data: bool,
        output: bool,
        srst: bool,
    }

    impl Wire {
        fn new() -> Self {
            Wire(Rc::new(RefCell::new(WireState {
                target: SwdTarget::new(0x0bc1_1477),
                clock: false,
                data: false,
                output: true,
                srst: true,
            })))
        }

        fn update(&self) {
            let mut st = self.0.borrow_mut();
            let host = st.output.then_some(st.data);
            let clock = st.clock;
            st.target.clock(clock, host);
        }
    }

    struct Clock(Wire);
    struct Data(Wire);
    struct Unused;
    struct Reset(Wire);

    impl ErrorType for Clock {
        type Error = Infallible;
    }
    impl ErrorType for Data {
        type Error = Infallible;
    }
    impl ErrorType for Unused {
        type Error = Infallible;
    }
    impl ErrorType for Reset {
        type Error = Infallible;
    }

    impl OutputPin for Clock {
        fn set_low(&mut self) -> Result<(), Infallible> {
            self.0 .0.borrow_mut().clock = false;
            self.0.update();
            Ok(())
        }

        fn set_high(&mut self) -> Result<(), Infallible> {
            self.0 .0.borrow_mut().clock = true;
            self.0.update();
            Ok(())
        }
    }

    impl OutputPin for Data {
        fn set_low(&mut self) -> Result<(), Infallible> {
            self.0 .0.borrow_mut().data = false;
            Ok(())
        }

        fn set_high(&mut self) -> Result<(), Infallible> {
            self.0 .0.borrow_mut().data = true;
            Ok(())
        }
    }

    impl InputPin for Data {
        fn is_high(&mut self) -> Result<bool, Infallible> {
            let st = self.0 .0.borrow();
            Ok(if st.output { st.data } else { st.target.swdio() })
        }

        fn is_low(&mut self) -> Result<bool, Infallible> {
            self.is_high().map(|high| !high)
        }
    }

    impl SwdioPin for Data {
        fn set_as_output(&mut self) -> Result<(), Infallible> {
            self.0 .0.borrow_mut().output = true;
            Ok(())
        }

        fn set_as_input(&mut self) -> Result<(), Infallible> {
            self.0 .0.borrow_mut().output = false;
            Ok(())
        }
    }

    impl OutputPin for Unused {
        fn set_low(&mut self) -> Result<(), Infallible> {
            Ok(())
        }

        fn set_high(&mut self) -> Result<(), Infallible> {
            Ok(())
        }
    }

    impl InputPin for Unused {
        fn is_high(&mut self) -> Result<bool, Infallible> {
            Ok(false)
        }

        fn is_low(&mut self) -> Result<bool, Infallible> {
            Ok(true)
        }
    }

    impl OutputPin for Reset {
        fn set_low(&mut self) -> Result<(), Infallible> {
            self.0 .0.borrow_mut().srst = false;
            Ok(())
        }

        fn set_high(&mut self) -> Result<(), Infallible> {
            self.0 .0.borrow_mut().srst = true;
            Ok(())
        }
    }

    fn pins(wire: &Wire) -> Gpio<Clock, Unused, Data, Unused, Reset, CountingDelay> {
        Gpio::new(Clock(wire.clone()), Unused, Data(wire.clone()), Unused, CountingDelay::default())
            .with_srst(Reset(wire.clone()))
    }

    #[test]
    fn swd_over_hal_pins() {
        let wire = Wire::new();
        let mut swd = SwdEngine::new(BitbangSwd::new(pins(&wire)));

        swd.write_register(Request::write(Port::Debug, 0x8), 0x0100_00f0, 0);
        assert_eq!(swd.read_register(Request::read(Port::Debug, 0x8), 0), Some(0x0100_00f0));
        assert_eq!(swd.read_register(Request::read(Port::Debug, 0x0), 0), Some(0x0bc1_1477));
        assert_eq!(swd.run_queue(), Ok(()));
    }

    #[test]
    fn srst_is_active_low() {
        let wire = Wire::new();
        let mut gpio = pins(&wire);
        gpio.reset(false, true).unwrap();
        assert!(!wire.0.borrow().srst);
        gpio.reset(false, false).unwrap();
        assert!(wire.0.borrow().srst);
    }

    #[test]
    fn unwired_resets_are_ignored() {
        let wire = Wire::new();
        let gpio: Gpio<Clock, Unused, Data, Unused, NoPin, CountingDelay> =
            Gpio::new(Clock(wire.clone()), Unused, Data(wire.clone()), Unused, CountingDelay::default())
                .with_trst(NoPin)
                .with_srst(NoPin);
        let mut swd = SwdEngine::new(BitbangSwd::new(gpio));

        swd.wire_mut().driver_mut().reset(true, true).unwrap();
        swd.wire_mut().drive_srst(true).unwrap();
        assert!(wire.0.borrow().srst);
        assert_eq!(swd.read_register(Request::read(Port::Debug, 0x0), 0), Some(0x0bc1_1477));
        assert_eq!(swd.run_queue(), Ok(()));
    }

    #[test]
    fn delay_follows_every_write() {
        let wire = Wire::new();
        let mut gpio = pins(&wire);
        gpio.set_delay(5);
        gpio.write(true, false, true).unwrap();
        gpio.write(false, false, true).unwrap();
        assert_eq!(gpio.delay.iterations, 10);
    }
}
