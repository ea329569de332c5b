//! Status codes and error types
//!
//! Every failure in the bootloader maps onto one of the [`Status`] codes the
//! host tooling understands. Richer error types carry the detail for logging.

use thiserror::Error;

/// Result code of a transport, flash or protocol step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Status {
    Ok = 0x00,
    Error = 0x01,
    Busy = 0x02,
    Timeout = 0x03,
    BoundsError = 0x04,
    FlashPageError = 0x05,
}

impl Status {
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn is_ok(self) -> bool {
        self == Status::Ok
    }
}

/// Failure reported by the flash controller itself
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Fault {
    #[error("flash controller error")]
    Error,
    #[error("flash controller busy")]
    Busy,
    #[error("flash controller timeout")]
    Timeout,
}

impl From<Fault> for Status {
    fn from(f: Fault) -> Self {
        match f {
            Fault::Error => Status::Error,
            Fault::Busy => Status::Busy,
            Fault::Timeout => Status::Timeout,
        }
    }
}

/// Flash engine errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FlashError {
    /// Address (or the range it starts) violates the region rules for the operation
    #[error("address 0x{0:08x} is outside the permitted region")]
    Bounds(u32),

    /// Page number beyond the end of the bank
    #[error("page {0} does not exist")]
    Page(u16),

    /// Controller reported a failure
    #[error(transparent)]
    Fault(#[from] Fault),

    /// Erase completed but the page did not read back blank
    #[error("page at 0x{0:08x} failed erase verification")]
    Verify(u32),
}

impl From<FlashError> for Status {
    fn from(e: FlashError) -> Self {
        match e {
            FlashError::Bounds(_) | FlashError::Page(_) => Status::BoundsError,
            FlashError::Fault(f) => f.into(),
            FlashError::Verify(_) => Status::FlashPageError,
        }
    }
}

/// Session errors, generic over the serial port error
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error<E> {
    #[error("serial error: {0:?}")]
    Serial(E),

    #[error("timed out waiting for data")]
    Timeout,

    #[error(transparent)]
    Flash(#[from] FlashError),
}

impl<E> Error<E> {
    pub fn status(&self) -> Status {
        match self {
            Error::Serial(_) => Status::Error,
            Error::Timeout => Status::Timeout,
            Error::Flash(e) => (*e).into(),
        }
    }
}

/// Part of a command exchange a failure is attributed to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Echoing the command byte back
    Echo,
    /// The command handler's own sub-protocol
    Handler,
    /// Sending the trailing prompt
    Prompt,
}

/// Ordered record of the failed steps of one command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Report {
    failures: Vec<(Step, Status)>,
}

impl Report {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the outcome of a step, keeping only failures
    pub fn record<T, E>(&mut self, step: Step, result: &Result<T, Error<E>>) {
        if let Err(e) = result {
            self.failures.push((step, e.status()));
        }
    }

    pub fn failures(&self) -> &[(Step, Status)] {
        &self.failures
    }

    pub fn is_ok(&self) -> bool {
        self.failures.is_empty()
    }

    /// First failure, or [`Status::Ok`]
    pub fn status(&self) -> Status {
        self.failures.first().map(|(_, s)| *s).unwrap_or(Status::Ok)
    }

    /// Bitwise-OR of every recorded status, as older host tooling expects
    pub fn bits(&self) -> u8 {
        self.failures.iter().fold(0, |acc, (_, s)| acc | s.code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type E = Error<()>;

    #[test]
    fn status_codes_match_wire_values() {
        assert_eq!(Status::Ok.code(), 0);
        assert_eq!(Status::Timeout.code(), 3);
        assert_eq!(Status::BoundsError.code(), 4);
        assert_eq!(Status::FlashPageError.code(), 5);
    }

    #[test]
    fn flash_errors_map_to_status() {
        assert_eq!(Status::from(FlashError::Bounds(0)), Status::BoundsError);
        assert_eq!(Status::from(FlashError::Page(200)), Status::BoundsError);
        assert_eq!(Status::from(FlashError::Verify(0)), Status::FlashPageError);
        assert_eq!(Status::from(FlashError::Fault(Fault::Busy)), Status::Busy);
        assert_eq!(E::Serial(()).status(), Status::Error);
        assert_eq!(E::Timeout.status(), Status::Timeout);
    }

    #[test]
    fn report_keeps_failures_in_order() {
        let mut r = Report::new();
        r.record::<(), ()>(Step::Echo, &Ok(()));
        assert!(r.is_ok());
        assert_eq!(r.status(), Status::Ok);
        assert_eq!(r.bits(), 0);

        r.record::<(), ()>(Step::Handler, &Err(E::Timeout));
        r.record::<(), ()>(Step::Prompt, &Err(FlashError::Bounds(0).into()));

        assert!(!r.is_ok());
        assert_eq!(r.status(), Status::Timeout);
        assert_eq!(r.bits(), 0x03 | 0x04);
        assert_eq!(
            r.failures(),
            &[
                (Step::Handler, Status::Timeout),
                (Step::Prompt, Status::BoundsError)
            ]
        );
    }
}
