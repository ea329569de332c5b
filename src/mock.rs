//! In-memory serial port and delay for exercising a session without hardware

use std::collections::VecDeque;
use std::io::ErrorKind;

use embedded_hal::blocking::delay::DelayMs;
use embedded_hal::serial::{Read, Write};

/// Serial port fed from a queue, capturing everything written
#[derive(Debug, Default)]
pub struct MockPort {
    rx: VecDeque<u8>,
    tx: Vec<u8>,
    read_error: Option<ErrorKind>,
}

impl MockPort {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue bytes for the bootloader to receive
    pub fn push(&mut self, data: &[u8]) {
        self.rx.extend(data.iter().copied());
    }

    /// Bytes not yet consumed by the bootloader
    pub fn pending(&self) -> usize {
        self.rx.len()
    }

    /// Drain everything the bootloader has sent
    pub fn take_output(&mut self) -> Vec<u8> {
        core::mem::take(&mut self.tx)
    }

    /// Fail every subsequent read with `kind`
    pub fn fail_reads(&mut self, kind: ErrorKind) {
        self.read_error = Some(kind);
    }
}

impl Read<u8> for MockPort {
    type Error = ErrorKind;

    fn read(&mut self) -> nb::Result<u8, Self::Error> {
        if let Some(e) = self.read_error {
            return Err(nb::Error::Other(e));
        }
        self.rx.pop_front().ok_or(nb::Error::WouldBlock)
    }
}

impl Write<u8> for MockPort {
    type Error = ErrorKind;

    fn write(&mut self, word: u8) -> nb::Result<(), Self::Error> {
        self.tx.push(word);
        Ok(())
    }

    fn flush(&mut self) -> nb::Result<(), Self::Error> {
        Ok(())
    }
}

/// Delay that returns immediately
#[derive(Debug, Default, Clone, Copy)]
pub struct NoDelay;

impl DelayMs<u32> for NoDelay {
    fn delay_ms(&mut self, _ms: u32) {}
}
