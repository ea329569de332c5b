//! STM32 Serial Bootloader.
//!
//! Device side of a simple single character command protocol for
//! reflashing the application region of an STM32F1 over a UART. The
//! [`Bootloader`] session reads commands through any `embedded-hal` serial
//! port and programs flash through a [`FlashHal`] implementation, refusing
//! anything that would touch its own pages.

#[macro_use]
extern crate log;

#[macro_use(block)]
extern crate nb;

extern crate embedded_hal;
use embedded_hal::serial::{Read, Write};

#[cfg(feature = "structopt")]
extern crate structopt;

#[cfg(feature = "linux")]
extern crate linux_embedded_hal;

#[cfg(feature = "linux")]
pub mod linux;

pub mod flash;
pub mod format;
pub mod link;
pub mod mem;
pub mod mock;
pub mod protocol;
pub mod session;
pub mod status;

pub use flash::{FlashEngine, FlashHal, MemoryMap};
pub use mem::MemFlash;
pub use protocol::Command;
pub use session::{Bootloader, Outcome};
pub use status::{Error, Fault, FlashError, Report, Status, Step};

/// Byte transport the bootloader talks over
pub trait SerialPort<E>: Write<u8, Error = E> + Read<u8, Error = E> {}

impl<T, E> SerialPort<E> for T where T: Write<u8, Error = E> + Read<u8, Error = E> {}

#[derive(Clone, PartialEq, Debug)]
#[cfg_attr(feature = "structopt", derive(structopt::StructOpt))]
pub struct Options {
    /// Timeout for each serial transfer
    #[cfg_attr(feature = "structopt", structopt(long, default_value = "500"))]
    pub response_timeout_ms: u32,

    /// Period to poll the serial port while waiting for data
    #[cfg_attr(feature = "structopt", structopt(long, default_value = "1"))]
    pub poll_delay_ms: u32,

    /// Send an ACK before the first WRITE record
    #[cfg_attr(feature = "structopt", structopt(long))]
    pub ack_first_record: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            response_timeout_ms: 500,
            poll_delay_ms: 1,
            ack_first_record: false,
        }
    }
}
