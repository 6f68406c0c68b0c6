use alloc::boxed::Box;

use tracing::{debug, info};

use super::DebugTransport;
use crate::cable::pru::{Coprocessor, PruSwd};
use crate::config::Config;
use crate::delay::DelayStrategy;
use crate::driver::WireProtocol;
use crate::error::Error;
use crate::jtag::JtagCommand;
use crate::speed::Calibration;
use crate::swd::{SwdDriver, SwdEngine, SwdWire};

type Opener<T> = Box<dyn FnMut(&Config) -> Result<T, Error>>;

/// SWD offloaded to a PRU.  The co-processor firmware owns the pins and the bit timing, so the
/// speed value is passed through unchanged.
pub struct PruTransport<C, D> {
    config: Config,
    open: Opener<C>,
    strategy: D,
    session: Option<SwdEngine<PruSwd<C>>>,
}

impl<C: Coprocessor, D: DelayStrategy> PruTransport<C, D> {
    /// `open` is called by `init` to acquire a co-processor with the firmware running.
    pub fn new(config: Config, strategy: D, open: impl FnMut(&Config) -> Result<C, Error> + 'static) -> Self {
        Self {
            config,
            open: Box::new(open),
            strategy,
            session: None,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn is_active(&self) -> bool {
        self.session.is_some()
    }

    pub fn coprocessor_mut(&mut self) -> Option<&mut C> {
        self.session.as_mut().map(|s| s.wire_mut().coprocessor_mut())
    }
}

impl<C: Coprocessor, D: DelayStrategy> DebugTransport for PruTransport<C, D> {
    fn name(&self) -> &'static str {
        "bbg-swd"
    }

    fn transports(&self) -> &'static [WireProtocol] {
        &[WireProtocol::Swd]
    }

    fn select(&mut self, protocol: WireProtocol) -> Result<(), Error> {
        if protocol != WireProtocol::Swd {
            return Err(Error::ProtocolUnavailable(protocol));
        }
        if self.session.is_some() {
            return Err(Error::AlreadyStarted);
        }
        Ok(())
    }

    fn init(&mut self) -> Result<(), Error> {
        if self.session.is_some() {
            return Err(Error::AlreadyStarted);
        }

        let pru = (self.open)(&self.config)?;
        let mut wire = PruSwd::new(pru, self.config.coprocessor.timeout());
        if self.config.reset.assert_srst_on_init() {
            info!("Connecting under reset");
            wire.drive_srst(true)?;
        }

        info!("BBG-SWD: Interface ready");
        self.session = Some(SwdEngine::new(wire));
        Ok(())
    }

    fn quit(&mut self) -> Result<(), Error> {
        if let Some(mut engine) = self.session.take() {
            engine.wire_mut().halt();
        }
        Ok(())
    }

    fn khz_to_speed(&self, khz: u32) -> Result<u32, Error> {
        Calibration::Passthrough.khz_to_delay(khz)
    }

    fn speed_to_khz(&self, speed: u32) -> Result<u32, Error> {
        Ok(Calibration::Passthrough.delay_to_khz(speed))
    }

    fn set_speed(&mut self, speed: u32) -> Result<(), Error> {
        debug!("speed {} ignored, the firmware sets the clock", speed);
        Ok(())
    }

    /// Only reset and sleep commands make sense without a JTAG chain.
    fn execute_queue(&mut self, commands: &mut [JtagCommand]) -> Result<(), Error> {
        let engine = self.session.as_mut().ok_or(Error::NotStarted)?;
        if let Some(cmd) = commands
            .iter()
            .find(|c| !matches!(c, JtagCommand::Reset { .. } | JtagCommand::Sleep { .. }))
        {
            debug!("refusing {:?}", cmd);
            return Err(Error::Unsupported("JTAG command on an SWD-only adapter"));
        }

        let wire = engine.wire_mut();
        wire.blink(true)?;
        for cmd in commands.iter() {
            match cmd {
                JtagCommand::Reset { srst, .. } => wire.drive_srst(*srst)?,
                JtagCommand::Sleep { us } => self.strategy.sleep_us(*us),
                _ => {}
            }
        }
        wire.blink(false)
    }

    fn swd(&mut self) -> Result<&mut dyn SwdDriver, Error> {
        let engine = self.session.as_mut().ok_or(Error::NotStarted)?;
        Ok(engine)
    }
}

/// Open the PRU subsystem named in `config` and start the SWD firmware on it.
#[cfg(feature = "std")]
pub fn open_uio(config: &Config) -> Result<crate::cable::pru::UioPruss, Error> {
    let mut pru = crate::cable::pru::UioPruss::open(&config.coprocessor.uio)?;
    let program = std::fs::read(&config.coprocessor.firmware)
        .map_err(|source| Error::Map { what: "PRU firmware", source })?;
    pru.load_program(&program)?;
    Ok(pru)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cable::pru::PruCommand;
    use crate::swd::{Port, Request, SwdFault};
    use crate::testing::{CountingDelay, FakePru};
    use pretty_assertions::assert_eq;

    fn transport(config: Config, pru: FakePru) -> PruTransport<FakePru, CountingDelay> {
        PruTransport::new(config, CountingDelay::default(), move |_: &Config| Ok(pru.clone()))
    }

    #[test]
    fn swd_only() {
        let mut t = transport(Config::default(), FakePru::new(0));
        assert_eq!(t.transports(), &[WireProtocol::Swd]);
        assert!(matches!(t.select(WireProtocol::Jtag), Err(Error::ProtocolUnavailable(WireProtocol::Jtag))));
        t.select(WireProtocol::Swd).unwrap();
    }

    #[test]
    fn reads_through_the_session() {
        let mut t = transport(Config::default(), FakePru::new(0x2ba0_1477));
        assert!(matches!(t.swd(), Err(Error::NotStarted)));
        t.init().unwrap();
        assert!(matches!(t.init(), Err(Error::AlreadyStarted)));

        let swd = t.swd().unwrap();
        swd.switch_seq(crate::swd::SpecialSequence::JtagToSwd).unwrap();
        assert_eq!(swd.read_reg(Request::read(Port::Debug, 0), 0), Some(0x2ba0_1477));
        assert_eq!(swd.run(), Ok(()));
        assert_eq!(t.coprocessor_mut().map(|p| p.srst_level), Some(None));
    }

    #[test]
    fn connect_under_reset() {
        let mut config = Config::default();
        config.reset.connect_under_reset = true;
        config.reset.srst_no_gating = true;
        let mut t = transport(config, FakePru::new(0));
        t.init().unwrap();
        assert_eq!(t.coprocessor_mut().map(|p| p.srst_level), Some(Some(false)));
    }

    #[test]
    fn reset_and_sleep_commands() {
        let mut t = transport(Config::default(), FakePru::new(0));
        t.init().unwrap();
        let mut cmds = [
            JtagCommand::Reset { trst: false, srst: true },
            JtagCommand::Sleep { us: 250 },
            JtagCommand::Reset { trst: false, srst: false },
        ];
        t.execute_queue(&mut cmds).unwrap();
        assert_eq!(t.strategy.slept_us, 250);

        let pru = t.coprocessor_mut().unwrap();
        assert_eq!(pru.srst_level, Some(true));
        assert!(!pru.led);
        assert_eq!(
            pru.commands,
            [PruCommand::Blink, PruCommand::GpioOut, PruCommand::GpioOut, PruCommand::Blink]
        );
    }

    #[test]
    fn scans_are_refused_before_anything_runs() {
        let mut t = transport(Config::default(), FakePru::new(0));
        t.init().unwrap();
        let mut cmds = [JtagCommand::Reset { trst: false, srst: true }, JtagCommand::StableClocks { cycles: 3 }];
        assert!(matches!(t.execute_queue(&mut cmds), Err(Error::Unsupported(_))));
        assert!(t.coprocessor_mut().unwrap().commands.is_empty());
    }

    #[test]
    fn unresponsive_coprocessor_faults_the_batch() {
        let mut pru = FakePru::new(0);
        pru.hang = true;
        let mut t = transport(Config::default(), pru);
        t.init().unwrap();
        let swd = t.swd().unwrap();
        assert_eq!(swd.read_reg(Request::read(Port::Debug, 0), 0), None);
        assert_eq!(swd.run(), Err(SwdFault::Timeout));
    }

    #[test]
    fn speed_passes_through() {
        let mut t = transport(Config::default(), FakePru::new(0));
        assert_eq!(t.khz_to_speed(4000).unwrap(), 4000);
        assert_eq!(t.speed_to_khz(4000).unwrap(), 4000);
        assert!(matches!(t.khz_to_speed(0), Err(Error::Unsupported("RCLK"))));
        t.set_speed(10).unwrap();
    }

    #[test]
    fn quit_halts_the_firmware() {
        let mut t = transport(Config::default(), FakePru::new(0));
        t.quit().unwrap();
        t.init().unwrap();
        t.quit().unwrap();
        assert!(!t.is_active());
        t.init().unwrap();
    }

    #[test]
    fn quit_with_a_hung_firmware() {
        let mut pru = FakePru::new(0);
        pru.hang = true;
        let mut t = transport(Config::default(), pru);
        t.init().unwrap();
        let swd = t.swd().unwrap();
        assert_eq!(swd.read_reg(Request::read(Port::Debug, 0), 0), None);
        assert_eq!(swd.run(), Err(SwdFault::Timeout));

        t.quit().unwrap();
        assert!(!t.is_active());
    }
}
