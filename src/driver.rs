//! Bit-level driver over a claimed GPIO bank.
//!
//! `GpioBitbang` owns the pin multiplexer for the length of a session.  Every `write` is
//! composed into a single `PinWrite` and followed by the calibrated delay; reads sample the
//! level register directly.  Reset lines are active low: asserting a reset drives its pin low.
use core::fmt;

use tracing::{debug, trace};

use crate::cable::Bitbang;
use crate::delay::DelayStrategy;
use crate::error::Error;
use crate::pins::{GpioController, PinAssignment, PinMux, PinWrite, TransportMode};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireProtocol {
    Jtag,
    Swd,
}

impl WireProtocol {
    pub fn name(self) -> &'static str {
        match self {
            WireProtocol::Jtag => "jtag",
            WireProtocol::Swd => "swd",
        }
    }
}

impl fmt::Display for WireProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

pub struct GpioBitbang<G: GpioController, D> {
    mux: PinMux<G>,
    pins: PinAssignment,
    mode: TransportMode,
    protocol: WireProtocol,
    delay: u32,
    strategy: D,
}

impl<G: GpioController, D: DelayStrategy> GpioBitbang<G, D> {
    /// Claim the pins `mode` needs.  Outputs are set to their idle levels before they are
    /// switched to outputs: TDI, TCK, SWCLK and SWDIO low, TMS high, resets released.
    pub fn new(gpio: G, pins: &PinAssignment, mode: TransportMode, strategy: D) -> Result<Self, Error> {
        let pins = pins.validated(G::MAX_PIN);
        let mut mux = PinMux::new(gpio);

        let mut idle = PinWrite::new().high(pins.trst).high(pins.srst);
        if mode.has_jtag() {
            idle = idle.low(pins.tdi).low(pins.tck).high(pins.tms);
        }
        if mode.has_swd() {
            idle = idle.low(pins.swclk).low(pins.swdio);
        }
        mux.write(idle);

        if mode.has_jtag() {
            if let Some(tdo) = pins.tdo {
                mux.claim_as_input(tdo)?;
            }
            for pin in [pins.tdi, pins.tck, pins.tms].into_iter().flatten() {
                mux.claim_as_output(pin)?;
            }
        }
        if mode.has_swd() {
            for pin in [pins.swclk, pins.swdio].into_iter().flatten() {
                mux.claim_as_output(pin)?;
            }
        }
        for pin in [pins.trst, pins.srst].into_iter().flatten() {
            mux.claim_as_output(pin)?;
        }

        for pin in mux.claimed() {
            debug!("pin {} saved function {:#05b}", pin, mux.saved_function(pin).unwrap_or_default());
        }

        let protocol = if mode.has_jtag() { WireProtocol::Jtag } else { WireProtocol::Swd };

        Ok(Self {
            mux,
            pins,
            mode,
            protocol,
            delay: 0,
            strategy,
        })
    }

    pub fn mode(&self) -> TransportMode {
        self.mode
    }

    pub fn protocol(&self) -> WireProtocol {
        self.protocol
    }

    /// Pick which set of pins `write` drives.
    pub fn set_protocol(&mut self, protocol: WireProtocol) -> Result<(), Error> {
        let available = match protocol {
            WireProtocol::Jtag => self.mode.has_jtag(),
            WireProtocol::Swd => self.mode.has_swd(),
        };
        if !available {
            return Err(Error::ProtocolUnavailable(protocol));
        }
        self.protocol = protocol;
        Ok(())
    }

    pub fn delay(&self) -> u32 {
        self.delay
    }

    pub fn set_delay(&mut self, delay: u32) {
        self.delay = delay;
    }

    pub fn mux(&self) -> &PinMux<G> {
        &self.mux
    }

    pub fn mux_mut(&mut self) -> &mut PinMux<G> {
        &mut self.mux
    }

    pub fn strategy_mut(&mut self) -> &mut D {
        &mut self.strategy
    }

    fn level(&self, pin: Option<u8>) -> bool {
        pin.is_some_and(|pin| (self.mux.levels() >> pin) & 1 == 1)
    }
}

impl<G: GpioController, D: DelayStrategy> Bitbang for GpioBitbang<G, D> {
    fn write(&mut self, clock: bool, tms: bool, data: bool) -> Result<(), Error> {
        let state = match self.protocol {
            WireProtocol::Jtag => PinWrite::new()
                .level(self.pins.tck, clock)
                .level(self.pins.tms, tms)
                .level(self.pins.tdi, data),
            WireProtocol::Swd => PinWrite::new()
                .level(self.pins.swclk, clock)
                .level(self.pins.swdio, data),
        };
        self.mux.write(state);
        self.strategy.delay(self.delay);
        Ok(())
    }

    fn read(&mut self) -> Result<bool, Error> {
        Ok(self.level(self.pins.tdo))
    }

    fn reset(&mut self, trst: bool, srst: bool) -> Result<(), Error> {
        trace!("reset trst {} srst {}", trst, srst);
        let state = PinWrite::new()
            .level(self.pins.trst, !trst)
            .level(self.pins.srst, !srst);
        self.mux.write(state);
        Ok(())
    }

    fn srst(&mut self, assert: bool) -> Result<(), Error> {
        trace!("srst {}", assert);
        self.mux.write(PinWrite::new().level(self.pins.srst, !assert));
        Ok(())
    }

    fn swdio_read(&mut self) -> Result<bool, Error> {
        Ok(self.level(self.pins.swdio))
    }

    fn swdio_drive(&mut self, output: bool) -> Result<(), Error> {
        match self.pins.swdio {
            Some(pin) if output => self.mux.claim_as_output(pin),
            Some(pin) => self.mux.claim_as_input(pin),
            None => Ok(()),
        }
    }

    fn sleep_us(&mut self, us: u32) {
        self.strategy.sleep_us(us);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pins::{Signal, FUNCTION_INPUT, FUNCTION_OUTPUT};
    use crate::swd::{BitbangSwd, SwdWire};
    use crate::testing::{CountingDelay, FakeGpio};
    use pretty_assertions::assert_eq;

    fn dual() -> PinAssignment {
        PinAssignment::default()
            .with(Signal::Tck, 11)
            .with(Signal::Tms, 25)
            .with(Signal::Tdi, 10)
            .with(Signal::Tdo, 9)
            .with(Signal::Trst, 7)
            .with(Signal::Srst, 24)
            .with(Signal::Swclk, 4)
            .with(Signal::Swdio, 5)
    }

    fn driver(gpio: &FakeGpio, mode: TransportMode) -> GpioBitbang<FakeGpio, CountingDelay> {
        GpioBitbang::new(gpio.clone(), &dual(), mode, CountingDelay::default()).unwrap()
    }

    #[test]
    fn session_start_levels_and_directions() {
        let gpio = FakeGpio::new();
        let _drv = driver(&gpio, TransportMode::Dual);

        assert_eq!(gpio.function(9), FUNCTION_INPUT);
        for pin in [10, 11, 25, 4, 5, 7, 24] {
            assert_eq!(gpio.function(pin), FUNCTION_OUTPUT, "pin {pin}");
        }
        let levels = gpio.levels();
        assert_eq!(levels, 1 << 25 | 1 << 7 | 1 << 24);
    }

    #[test]
    fn swd_only_session_leaves_jtag_pins_alone() {
        let gpio = FakeGpio::new();
        gpio.set_initial_function(11, 0b100);
        let pins = PinAssignment::default().with(Signal::Swclk, 4).with(Signal::Swdio, 5).with(Signal::Tck, 11);
        let drv = GpioBitbang::new(gpio.clone(), &pins, TransportMode::Swd, CountingDelay::default()).unwrap();
        assert_eq!(gpio.function(11), 0b100);
        assert_eq!(drv.protocol(), WireProtocol::Swd);
    }

    #[test]
    fn write_is_one_set_and_one_clear() {
        let gpio = FakeGpio::new();
        let mut drv = driver(&gpio, TransportMode::Dual);
        gpio.clear_writes();

        drv.write(true, false, true).unwrap();
        let writes = gpio.writes();
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].set_mask(), 1 << 11 | 1 << 10);
        assert_eq!(writes[0].clear_mask(), 1 << 25);
    }

    #[test]
    fn swd_protocol_uses_swd_pins() {
        let gpio = FakeGpio::new();
        let mut drv = driver(&gpio, TransportMode::Dual);
        drv.set_protocol(WireProtocol::Swd).unwrap();
        gpio.clear_writes();

        drv.write(true, true, false).unwrap();
        let w = gpio.writes()[0];
        assert_eq!(w.set_mask(), 1 << 4);
        assert_eq!(w.clear_mask(), 1 << 5);
    }

    #[test]
    fn unavailable_protocol_is_rejected() {
        let gpio = FakeGpio::new();
        let mut drv = driver(&gpio, TransportMode::Jtag);
        assert!(matches!(
            drv.set_protocol(WireProtocol::Swd),
            Err(Error::ProtocolUnavailable(WireProtocol::Swd))
        ));
    }

    #[test]
    fn reset_is_active_low() {
        let gpio = FakeGpio::new();
        let mut drv = driver(&gpio, TransportMode::Dual);

        drv.reset(true, false).unwrap();
        assert_eq!(gpio.levels() & (1 << 7 | 1 << 24), 1 << 24);
        drv.reset(false, true).unwrap();
        assert_eq!(gpio.levels() & (1 << 7 | 1 << 24), 1 << 7);
    }

    #[test]
    fn srst_leaves_trst_alone() {
        let gpio = FakeGpio::new();
        let mut drv = driver(&gpio, TransportMode::Dual);

        drv.reset(true, true).unwrap();
        drv.srst(false).unwrap();
        assert_eq!(gpio.levels() & (1 << 7 | 1 << 24), 1 << 24);
        drv.srst(true).unwrap();
        assert_eq!(gpio.levels() & (1 << 7 | 1 << 24), 0);

        let mut swd = BitbangSwd::new(&mut drv);
        swd.drive_srst(false).unwrap();
        assert_eq!(gpio.levels() & (1 << 7 | 1 << 24), 1 << 24);
    }

    #[test]
    fn each_transition_waits_the_delay() {
        let gpio = FakeGpio::new();
        let mut drv = driver(&gpio, TransportMode::Dual);
        drv.set_delay(85);
        drv.write(false, false, false).unwrap();
        drv.write(true, false, false).unwrap();
        drv.read().unwrap();
        assert_eq!(drv.strategy_mut().iterations, 170);
        assert_eq!(drv.strategy_mut().calls, 2);
    }

    #[test]
    fn tdo_and_swdio_sample_levels() {
        let gpio = FakeGpio::new();
        let mut drv = driver(&gpio, TransportMode::Dual);
        gpio.set_input_level(9, true);
        assert!(drv.read().unwrap());
        assert!(!drv.swdio_read().unwrap());
        drv.swdio_drive(false).unwrap();
        gpio.set_input_level(5, true);
        assert!(drv.swdio_read().unwrap());
    }

    #[test]
    fn swdio_direction_flips_and_restores() {
        let gpio = FakeGpio::new();
        gpio.set_initial_function(5, 0b010);
        {
            let mut drv = driver(&gpio, TransportMode::Dual);
            drv.swdio_drive(false).unwrap();
            assert_eq!(gpio.function(5), FUNCTION_INPUT);
            drv.swdio_drive(true).unwrap();
            assert_eq!(gpio.function(5), FUNCTION_OUTPUT);
        }
        assert_eq!(gpio.function(5), 0b010);
    }
}
