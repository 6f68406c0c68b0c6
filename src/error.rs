//! Errors returned by the transport, and the coarse status codes reported upstream.
use core::time::Duration;

use crate::driver::WireProtocol;
use crate::statemachine::TapState;
use crate::swd::sequence::SpecialSequence;
use crate::swd::SwdFault;

/// Result class handed back to the host debugger for every operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Ok,
    Fail,
    /// The target asked to be polled again later.
    Wait,
    NotSupported,
}

impl<E: Into<Status>> From<Result<(), E>> for Status {
    fn from(result: Result<(), E>) -> Self {
        match result {
            Ok(()) => Status::Ok,
            Err(e) => e.into(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("pin {pin} is outside the addressable range 0..={max}")]
    InvalidPin { pin: u8, max: u8 },
    #[error("require tck, tms, tdi and tdo pins for JTAG mode and/or swclk and swdio pins for SWD mode")]
    NoTransportMode,
    #[error("require at least one of trst or srst pins to be specified")]
    MissingResetLine,
    #[error("{0} mode is not available with this configuration")]
    ProtocolUnavailable(WireProtocol),
    #[error("{0} not supported")]
    Unsupported(&'static str),
    #[error("sequence {0} not supported")]
    UnsupportedSequence(SpecialSequence),
    #[error("no single TCK moves the TAP from {from:?} to {to:?}")]
    InvalidPath { from: TapState, to: TapState },
    #[error("a session is already active")]
    AlreadyStarted,
    #[error("no session is active")]
    NotStarted,
    #[error("co-processor did not signal completion within {0:?}")]
    Timeout(Duration),
    #[error("pin access failed: {0:?}")]
    Pin(embedded_hal::digital::ErrorKind),
    #[error(transparent)]
    Swd(#[from] SwdFault),
    #[cfg(feature = "std")]
    #[error("could not map {what}")]
    Map {
        what: &'static str,
        #[source]
        source: std::io::Error,
    },
    #[cfg(feature = "std")]
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[cfg(feature = "std")]
    #[error("invalid configuration")]
    Config(#[from] toml::de::Error),
    #[cfg(feature = "ftdi")]
    #[error("FTDI error")]
    Ftdi(#[from] libftd2xx::FtStatus),
}

impl Error {
    pub fn status(&self) -> Status {
        match self {
            Error::Unsupported(_) | Error::UnsupportedSequence(_) => Status::NotSupported,
            Error::Swd(fault) => fault.status(),
            _ => Status::Fail,
        }
    }

    /// Wrap an `embedded-hal` pin error.
    pub fn pin<E: embedded_hal::digital::Error>(e: E) -> Self {
        Error::Pin(e.kind())
    }
}

impl From<Error> for Status {
    fn from(e: Error) -> Self {
        e.status()
    }
}

impl From<SwdFault> for Status {
    fn from(fault: SwdFault) -> Self {
        fault.status()
    }
}
