use alloc::boxed::Box;

use tracing::{debug, info};

use super::DebugTransport;
use crate::cable::Bitbang;
use crate::config::Config;
use crate::delay::DelayStrategy;
use crate::driver::{GpioBitbang, WireProtocol};
use crate::error::Error;
use crate::jtag::{JtagCommand, JtagExecutor};
use crate::pins::{GpioController, TransportMode};
use crate::swd::{BitbangSwd, SpecialSequence, SwdDriver, SwdEngine};

type Opener<T> = Box<dyn FnMut(&Config) -> Result<T, Error>>;

struct Session<G: GpioController, D> {
    swd: SwdEngine<BitbangSwd<GpioBitbang<G, D>>>,
    jtag: JtagExecutor,
}

/// JTAG and SWD bit-banged on a GPIO bank.
pub struct GpioTransport<G: GpioController, D> {
    config: Config,
    open: Opener<G>,
    strategy: D,
    protocol: Option<WireProtocol>,
    delay: u32,
    session: Option<Session<G, D>>,
}

impl<G: GpioController, D: DelayStrategy + Clone> GpioTransport<G, D> {
    /// `open` is called by `init` to acquire the GPIO bank.
    pub fn new(config: Config, strategy: D, open: impl FnMut(&Config) -> Result<G, Error> + 'static) -> Self {
        Self {
            config,
            open: Box::new(open),
            strategy,
            protocol: None,
            delay: 0,
            session: None,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn is_active(&self) -> bool {
        self.session.is_some()
    }

    /// Protocols the pin assignment allows, once a session is active.
    pub fn mode(&self) -> Option<TransportMode> {
        self.session.as_ref().map(|s| s.swd.wire().driver().mode())
    }

    pub fn driver(&self) -> Option<&GpioBitbang<G, D>> {
        self.session.as_ref().map(|s| s.swd.wire().driver())
    }

    pub fn driver_mut(&mut self) -> Option<&mut GpioBitbang<G, D>> {
        self.session.as_mut().map(|s| s.swd.wire_mut().driver_mut())
    }

    fn session(&mut self) -> Result<&mut Session<G, D>, Error> {
        self.session.as_mut().ok_or(Error::NotStarted)
    }
}

impl<G: GpioController, D: DelayStrategy + Clone> DebugTransport for GpioTransport<G, D> {
    fn name(&self) -> &'static str {
        "am335xgpio"
    }

    fn transports(&self) -> &'static [WireProtocol] {
        &[WireProtocol::Jtag, WireProtocol::Swd]
    }

    fn select(&mut self, protocol: WireProtocol) -> Result<(), Error> {
        if self.session.is_some() {
            return Err(Error::AlreadyStarted);
        }
        self.protocol = Some(protocol);
        Ok(())
    }

    fn init(&mut self) -> Result<(), Error> {
        if self.session.is_some() {
            return Err(Error::AlreadyStarted);
        }
        info!("GPIO JTAG/SWD bitbang driver");

        let mode = self.config.pins.transport_mode(G::MAX_PIN)?;
        let protocol = self.protocol.unwrap_or(if mode.has_jtag() { WireProtocol::Jtag } else { WireProtocol::Swd });

        let gpio = (self.open)(&self.config)?;
        let mut driver = GpioBitbang::new(gpio, &self.config.pins, mode, self.strategy.clone())?;
        driver.set_protocol(protocol)?;
        driver.set_delay(self.delay);

        if self.config.reset.assert_srst_on_init() {
            info!("Connecting under reset");
            driver.srst(true)?;
        }

        let mut swd = SwdEngine::new(BitbangSwd::new(driver));
        if protocol == WireProtocol::Swd {
            for seq in [SpecialSequence::LineReset, SpecialSequence::JtagToSwd, SpecialSequence::LineReset] {
                swd.switch_sequence(seq)?;
            }
        }

        info!("{} session started", protocol);
        self.session = Some(Session { swd, jtag: JtagExecutor::new() });
        Ok(())
    }

    fn quit(&mut self) -> Result<(), Error> {
        if self.session.take().is_some() {
            info!("released GPIO pins");
        }
        Ok(())
    }

    fn khz_to_speed(&self, khz: u32) -> Result<u32, Error> {
        self.config.calibration().khz_to_delay(khz)
    }

    fn speed_to_khz(&self, speed: u32) -> Result<u32, Error> {
        Ok(self.config.calibration().delay_to_khz(speed))
    }

    fn set_speed(&mut self, speed: u32) -> Result<(), Error> {
        debug!("delay {} iterations", speed);
        self.delay = speed;
        if let Some(driver) = self.driver_mut() {
            driver.set_delay(speed);
        }
        Ok(())
    }

    fn execute_queue(&mut self, commands: &mut [JtagCommand]) -> Result<(), Error> {
        let session = self.session()?;
        let driver = session.swd.wire_mut().driver_mut();

        if driver.protocol() == WireProtocol::Swd
            && !commands.iter().all(|c| matches!(c, JtagCommand::Reset { .. } | JtagCommand::Sleep { .. }))
        {
            return Err(Error::Unsupported("JTAG command in SWD mode"));
        }

        session.jtag.execute(driver, commands)
    }

    fn swd(&mut self) -> Result<&mut dyn SwdDriver, Error> {
        let session = self.session()?;
        if session.swd.wire().driver().protocol() != WireProtocol::Swd {
            return Err(Error::ProtocolUnavailable(WireProtocol::Swd));
        }
        Ok(&mut session.swd)
    }
}
