//! Logical debug signals, their pin assignment, and the multiplexer that claims pins for a
//! session and gives them back afterwards.
use alloc::collections::BTreeMap;
use core::fmt;

use serde::Deserialize;
use tracing::{debug, error, info};

use crate::error::Error;

/// Function-select value for an input pin.
pub const FUNCTION_INPUT: u8 = 0b000;
/// Function-select value for an output pin.
pub const FUNCTION_OUTPUT: u8 = 0b001;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Signal {
    Tck,
    Tms,
    Tdi,
    Tdo,
    Trst,
    Srst,
    Swclk,
    Swdio,
}

impl Signal {
    pub const ALL: [Signal; 8] = [
        Signal::Tck,
        Signal::Tms,
        Signal::Tdi,
        Signal::Tdo,
        Signal::Trst,
        Signal::Srst,
        Signal::Swclk,
        Signal::Swdio,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Signal::Tck => "tck",
            Signal::Tms => "tms",
            Signal::Tdi => "tdi",
            Signal::Tdo => "tdo",
            Signal::Trst => "trst",
            Signal::Srst => "srst",
            Signal::Swclk => "swclk",
            Signal::Swdio => "swdio",
        }
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Which wire protocols a pin assignment makes possible.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportMode {
    Jtag,
    Swd,
    Dual,
}

impl TransportMode {
    pub fn has_jtag(self) -> bool {
        matches!(self, TransportMode::Jtag | TransportMode::Dual)
    }

    pub fn has_swd(self) -> bool {
        matches!(self, TransportMode::Swd | TransportMode::Dual)
    }
}

/// GPIO number for every logical signal.  Unassigned signals are `None`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PinAssignment {
    pub tck: Option<u8>,
    pub tms: Option<u8>,
    pub tdi: Option<u8>,
    pub tdo: Option<u8>,
    pub trst: Option<u8>,
    pub srst: Option<u8>,
    pub swclk: Option<u8>,
    pub swdio: Option<u8>,
}

impl PinAssignment {
    pub fn get(&self, signal: Signal) -> Option<u8> {
        match signal {
            Signal::Tck => self.tck,
            Signal::Tms => self.tms,
            Signal::Tdi => self.tdi,
            Signal::Tdo => self.tdo,
            Signal::Trst => self.trst,
            Signal::Srst => self.srst,
            Signal::Swclk => self.swclk,
            Signal::Swdio => self.swdio,
        }
    }

    pub fn set(&mut self, signal: Signal, pin: Option<u8>) {
        let slot = match signal {
            Signal::Tck => &mut self.tck,
            Signal::Tms => &mut self.tms,
            Signal::Tdi => &mut self.tdi,
            Signal::Tdo => &mut self.tdo,
            Signal::Trst => &mut self.trst,
            Signal::Srst => &mut self.srst,
            Signal::Swclk => &mut self.swclk,
            Signal::Swdio => &mut self.swdio,
        };
        *slot = pin;
    }

    #[must_use]
    pub fn with(mut self, signal: Signal, pin: u8) -> Self {
        self.set(signal, Some(pin));
        self
    }

    /// The same assignment with every pin above `max_pin` dropped.
    #[must_use]
    pub fn validated(&self, max_pin: u8) -> Self {
        let mut pins = *self;
        for signal in Signal::ALL {
            if let Some(pin) = self.get(signal) {
                if pin > max_pin {
                    debug!("{} pin {} is out of range, ignoring it", signal, pin);
                    pins.set(signal, None);
                }
            }
        }
        pins
    }

    /// Work out which protocols are possible.  JTAG needs all four of its pins plus at least one
    /// reset line; SWD needs its clock and data pins.
    pub fn transport_mode(&self, max_pin: u8) -> Result<TransportMode, Error> {
        let pins = self.validated(max_pin);
        let all = |signals: &[Signal]| signals.iter().all(|s| pins.get(*s).is_some());

        let jtag = all(&[Signal::Tck, Signal::Tms, Signal::Tdi, Signal::Tdo]);
        let swd = all(&[Signal::Swclk, Signal::Swdio]);

        if jtag && pins.trst.is_none() && pins.srst.is_none() {
            error!("Require at least one of trst or srst gpios to be specified");
            return Err(Error::MissingResetLine);
        }

        let mode = match (jtag, swd) {
            (true, true) => TransportMode::Dual,
            (true, false) => TransportMode::Jtag,
            (false, true) => TransportMode::Swd,
            (false, false) => {
                error!("Require tck, tms, tdi and tdo gpios for JTAG mode and/or swclk and swdio gpio for SWD mode");
                return Err(Error::NoTransportMode);
            }
        };

        if mode.has_jtag() {
            info!(
                "JTAG pins: tck {:?}, tms {:?}, tdi {:?}, tdo {:?}",
                pins.tck, pins.tms, pins.tdi, pins.tdo
            );
        }
        if mode.has_swd() {
            info!("SWD pins: swclk {:?}, swdio {:?}", pins.swclk, pins.swdio);
        }
        info!("reset pins: trst {:?}, srst {:?}", pins.trst, pins.srst);

        Ok(mode)
    }
}

/// A set of pins to drive high and a set to drive low, applied by one set-mask write followed
/// by one clear-mask write.  A pin in both masks ends up low.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PinWrite {
    set: u64,
    clear: u64,
}

impl PinWrite {
    pub const fn new() -> Self {
        Self { set: 0, clear: 0 }
    }

    /// Drive `pin` to `high`.  An absent pin leaves the write unchanged.
    #[must_use]
    pub const fn level(self, pin: Option<u8>, high: bool) -> Self {
        let mask = match pin {
            Some(pin) => match 1u64.checked_shl(pin as u32) {
                Some(mask) => mask,
                None => 0,
            },
            None => 0,
        };
        if high {
            Self { set: self.set | mask, clear: self.clear & !mask }
        } else {
            Self { set: self.set & !mask, clear: self.clear | mask }
        }
    }

    #[must_use]
    pub const fn high(self, pin: Option<u8>) -> Self {
        self.level(pin, true)
    }

    #[must_use]
    pub const fn low(self, pin: Option<u8>) -> Self {
        self.level(pin, false)
    }

    pub const fn set_mask(&self) -> u64 {
        self.set
    }

    pub const fn clear_mask(&self) -> u64 {
        self.clear
    }

    pub const fn is_empty(&self) -> bool {
        self.set == 0 && self.clear == 0
    }

    /// Apply the write to a snapshot of pin levels.
    pub const fn apply(&self, levels: u64) -> u64 {
        (levels | self.set) & !self.clear
    }
}

/// Raw access to a bank of GPIO lines with per-pin function select.
pub trait GpioController {
    /// Highest addressable pin number.
    const MAX_PIN: u8;

    fn function(&self, pin: u8) -> u8;
    fn set_function(&mut self, pin: u8, function: u8);
    fn write(&mut self, state: PinWrite);
    /// Input levels of every pin, bit `n` for pin `n`.
    fn levels(&self) -> u64;
}

/// Claims pins for a session, remembering the function each pin had before it was first claimed
/// so that it can be restored on teardown.  Dropping the multiplexer restores every claimed pin.
pub struct PinMux<G: GpioController> {
    gpio: G,
    saved: BTreeMap<u8, u8>,
}

impl<G: GpioController> PinMux<G> {
    pub fn new(gpio: G) -> Self {
        Self {
            gpio,
            saved: BTreeMap::new(),
        }
    }

    pub fn validate(&self, pin: u8) -> bool {
        pin <= G::MAX_PIN
    }

    fn claim(&mut self, pin: u8, function: u8) -> Result<(), Error> {
        if !self.validate(pin) {
            return Err(Error::InvalidPin { pin, max: G::MAX_PIN });
        }
        let gpio = &self.gpio;
        self.saved.entry(pin).or_insert_with(|| gpio.function(pin));
        self.gpio.set_function(pin, function);
        Ok(())
    }

    pub fn claim_as_output(&mut self, pin: u8) -> Result<(), Error> {
        self.claim(pin, FUNCTION_OUTPUT)
    }

    pub fn claim_as_input(&mut self, pin: u8) -> Result<(), Error> {
        self.claim(pin, FUNCTION_INPUT)
    }

    /// Function `pin` had before this session claimed it.
    pub fn saved_function(&self, pin: u8) -> Option<u8> {
        self.saved.get(&pin).copied()
    }

    /// Give `pin` back its original function.  Returns false if it was never claimed.
    pub fn restore(&mut self, pin: u8) -> bool {
        match self.saved.remove(&pin) {
            Some(function) => {
                self.gpio.set_function(pin, function);
                true
            }
            None => false,
        }
    }

    pub fn restore_all(&mut self) {
        for (pin, function) in core::mem::take(&mut self.saved) {
            self.gpio.set_function(pin, function);
        }
    }

    pub fn claimed(&self) -> impl Iterator<Item = u8> + '_ {
        self.saved.keys().copied()
    }

    pub fn write(&mut self, state: PinWrite) {
        self.gpio.write(state);
    }

    pub fn levels(&self) -> u64 {
        self.gpio.levels()
    }

    pub fn gpio(&self) -> &G {
        &self.gpio
    }

    pub fn gpio_mut(&mut self) -> &mut G {
        &mut self.gpio
    }
}

impl<G: GpioController> Drop for PinMux<G> {
    fn drop(&mut self) {
        if !self.saved.is_empty() {
            debug!("restoring {} pins", self.saved.len());
        }
        self.restore_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeGpio;
    use pretty_assertions::assert_eq;

    const MAX: u8 = 53;

    fn jtag() -> PinAssignment {
        PinAssignment::default()
            .with(Signal::Tck, 11)
            .with(Signal::Tms, 25)
            .with(Signal::Tdi, 10)
            .with(Signal::Tdo, 9)
    }

    fn swd() -> PinAssignment {
        PinAssignment::default().with(Signal::Swclk, 11).with(Signal::Swdio, 25)
    }

    #[test]
    fn jtag_needs_a_reset_line() {
        assert!(matches!(jtag().transport_mode(MAX), Err(Error::MissingResetLine)));
        assert_eq!(jtag().with(Signal::Trst, 7).transport_mode(MAX).unwrap(), TransportMode::Jtag);
        assert_eq!(jtag().with(Signal::Srst, 24).transport_mode(MAX).unwrap(), TransportMode::Jtag);
    }

    #[test]
    fn swd_alone_needs_no_reset_line() {
        assert_eq!(swd().transport_mode(MAX).unwrap(), TransportMode::Swd);
    }

    #[test]
    fn both_protocols() {
        let pins = jtag().with(Signal::Swclk, 4).with(Signal::Swdio, 5).with(Signal::Srst, 24);
        assert_eq!(pins.transport_mode(MAX).unwrap(), TransportMode::Dual);
    }

    #[test]
    fn nothing_assigned() {
        assert!(matches!(
            PinAssignment::default().transport_mode(MAX),
            Err(Error::NoTransportMode)
        ));
    }

    #[test]
    fn out_of_range_pin_disables_its_protocol() {
        let pins = jtag().with(Signal::Tdo, 54).with(Signal::Srst, 24).with(Signal::Swclk, 4).with(Signal::Swdio, 5);
        assert_eq!(pins.transport_mode(MAX).unwrap(), TransportMode::Swd);
        assert_eq!(pins.validated(MAX).tdo, None);
    }

    #[test]
    fn pin_write_composes() {
        let w = PinWrite::new().high(Some(3)).low(Some(4)).level(None, true).high(Some(40));
        assert_eq!(w.set_mask(), 1 << 3 | 1 << 40);
        assert_eq!(w.clear_mask(), 1 << 4);
        // Later levels for the same pin win
        let w = w.low(Some(3));
        assert_eq!(w.set_mask(), 1 << 40);
        assert_eq!(w.clear_mask(), 1 << 3 | 1 << 4);
        assert_eq!(w.apply(0b1_0000), 0x100_0000_0000);
        assert!(PinWrite::new().level(None, false).is_empty());
    }

    #[test]
    fn claim_saves_first_function_only() {
        let gpio = FakeGpio::new();
        gpio.set_initial_function(9, 0b100);
        let mut mux = PinMux::new(gpio.clone());

        mux.claim_as_output(9).unwrap();
        mux.claim_as_input(9).unwrap();
        assert_eq!(mux.saved_function(9), Some(0b100));
        assert_eq!(gpio.function(9), FUNCTION_INPUT);

        assert!(mux.restore(9));
        assert!(!mux.restore(9));
        assert_eq!(gpio.function(9), 0b100);
    }

    #[test]
    fn invalid_pin_is_rejected() {
        let mut mux = PinMux::new(FakeGpio::new());
        assert!(!mux.validate(54));
        assert!(matches!(mux.claim_as_output(54), Err(Error::InvalidPin { pin: 54, max: 53 })));
        assert_eq!(mux.claimed().count(), 0);
    }

    #[test]
    fn drop_restores_every_claimed_pin() {
        let gpio = FakeGpio::new();
        gpio.set_initial_function(2, 0b010);
        gpio.set_initial_function(3, 0b011);
        {
            let mut mux = PinMux::new(gpio.clone());
            mux.claim_as_output(2).unwrap();
            mux.claim_as_input(3).unwrap();
            mux.claim_as_output(4).unwrap();
            assert_eq!(mux.claimed().collect::<alloc::vec::Vec<_>>(), [2, 3, 4]);
        }
        assert_eq!(gpio.function(2), 0b010);
        assert_eq!(gpio.function(3), 0b011);
        assert_eq!(gpio.function(4), FUNCTION_INPUT);
    }
}
