//! Command dispatcher
//!
//! A [`Bootloader`] owns the transport and the flash engine for the whole
//! session. Each call to [`Bootloader::poll`] waits for one command byte,
//! echoes it, runs the matching handler to completion and sends the prompt.

use embedded_hal::blocking::delay::DelayMs;

use crate::flash::{FlashEngine, FlashHal, MemoryMap};
use crate::format::{self, Decimal};
use crate::link::Link;
use crate::protocol::*;
use crate::status::{Error, FlashError, Report, Status, Step};
use crate::{Options, SerialPort};

/// Result of one poll of the session
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    /// No command byte arrived before the timeout
    Idle,

    /// A known command ran
    Completed { command: Command, report: Report },

    /// The byte had no handler, only the echo and prompt were sent
    Unrecognized { code: u8, report: Report },

    /// The port failed while reading the command byte
    Failed { report: Report },
}

impl Outcome {
    /// Status for callers that only want a single code
    pub fn status(&self) -> Status {
        match self {
            Outcome::Idle => Status::Timeout,
            Outcome::Completed { report, .. }
            | Outcome::Unrecognized { report, .. }
            | Outcome::Failed { report } => report.status(),
        }
    }

    /// Bitwise-OR of every failed step, `TIMEOUT` when idle
    pub fn bits(&self) -> u8 {
        match self {
            Outcome::Idle => Status::Timeout.code(),
            Outcome::Completed { report, .. }
            | Outcome::Unrecognized { report, .. }
            | Outcome::Failed { report } => report.bits(),
        }
    }
}

pub struct Bootloader<P, D, H, E> {
    link: Link<P, D, E>,
    flash: FlashEngine<H>,
    options: Options,
}

impl<P, D, H, E> Bootloader<P, D, H, E>
where
    P: SerialPort<E>,
    D: DelayMs<u32>,
    H: FlashHal,
    E: core::fmt::Debug,
{
    /// Create a new bootloader session
    pub fn new(port: P, delay: D, hal: H, map: MemoryMap, options: Options) -> Self {
        Self {
            link: Link::new(port, delay, &options),
            flash: FlashEngine::new(hal, map),
            options,
        }
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    pub fn port(&self) -> &P {
        self.link.port()
    }

    pub fn port_mut(&mut self) -> &mut P {
        self.link.port_mut()
    }

    pub fn flash(&self) -> &FlashEngine<H> {
        &self.flash
    }

    pub fn flash_mut(&mut self) -> &mut FlashEngine<H> {
        &mut self.flash
    }

    /// Tear down the session, returning the port, delay and flash controller
    pub fn release(self) -> (P, D, H) {
        let (port, delay) = self.link.release();
        (port, delay, self.flash.release())
    }

    /// Send the start banner and first prompt
    pub fn start(&mut self) -> Result<(), Error<E>> {
        info!("Bootloader v{}.{} started", VERSION_MAJOR, VERSION_MINOR);

        let banner = self.link.write(START_MESSAGE);
        let prompt = self.link.write(PROMPT);
        banner.and(prompt)
    }

    /// Wait for and execute a single command
    pub fn poll(&mut self) -> Outcome {
        let code = match self.link.read_u8() {
            Ok(c) => c,
            Err(Error::Timeout) => return Outcome::Idle,
            Err(e) => {
                // A broken port still gets the prompt so the host can resync
                warn!("Failed to read command: {}", e);
                let mut report = Report::new();
                report.record::<(), E>(Step::Handler, &Err(e));
                let prompt = self.link.write(PROMPT);
                report.record(Step::Prompt, &prompt);
                return Outcome::Failed { report };
            }
        };

        let mut report = Report::new();

        let echo = self.link.write(&[code]);
        report.record(Step::Echo, &echo);

        let command = Command::from(code);
        debug!("Received command {:?}", command);

        let result = self.dispatch(command);
        if let Err(e) = &result {
            warn!("Command {:?} failed: {}", command, e);
        }
        report.record(Step::Handler, &result);

        let prompt = self.link.write(PROMPT);
        report.record(Step::Prompt, &prompt);

        match command {
            Command::Unknown(code) => Outcome::Unrecognized { code, report },
            command => Outcome::Completed { command, report },
        }
    }

    fn dispatch(&mut self, command: Command) -> Result<(), Error<E>> {
        match command {
            Command::Help => self.cmd_help(),
            Command::GetId => self.cmd_get_id(),
            Command::GetVersion => self.cmd_get_version(),
            Command::Write => self.cmd_write(),
            Command::Erase => self.cmd_erase(),
            Command::ReadPage => self.cmd_read_page(),
            Command::Unknown(code) => {
                debug!("Ignoring unknown command 0x{:02x}", code);
                Ok(())
            }
        }
    }

    fn cmd_help(&mut self) -> Result<(), Error<E>> {
        self.link.write(COMMANDS_MESSAGE)
    }

    fn cmd_get_id(&mut self) -> Result<(), Error<E>> {
        self.link.write(ID_MESSAGE)?;

        let id = Decimal::new(self.flash.device_id());
        self.link.write(id.as_bytes())
    }

    fn cmd_get_version(&mut self) -> Result<(), Error<E>> {
        self.link.write(VERSION_MESSAGE)?;
        self.link
            .write(&[b'0' + VERSION_MAJOR, b'.', b'0' + VERSION_MINOR])
    }

    /// Program (address, halfword) records until the end marker, stopping
    /// at the first rejected record
    fn cmd_write(&mut self) -> Result<(), Error<E>> {
        if self.options.ack_first_record {
            self.link.write(&[ACK])?;
        }

        let mut count = 0usize;
        loop {
            let address = self.link.read_u32()?;
            if address == END_SUBSEQUENCE {
                break;
            }
            let value = self.link.read_u16()?;

            trace!("Program 0x{:08x} <- 0x{:04x}", address, value);

            if let Err(e) = self.flash.program(address, value) {
                self.link.write(&[NACK])?;
                return Err(e.into());
            }
            self.link.write(&[ACK])?;
            count += 1;
        }

        info!("Programmed {} halfwords", count);

        Ok(())
    }

    fn cmd_erase(&mut self) -> Result<(), Error<E>> {
        let address = self.link.read_u32()?;
        let pages = self.link.read_u8()?;

        match self.flash.erase(address, pages) {
            Ok(()) => {
                info!("Erased {} pages from 0x{:08x}", pages, address);
                self.link.write(&[ACK])
            }
            Err(e) => {
                self.link.write(&[NACK])?;
                Err(e.into())
            }
        }
    }

    /// Read a zero padded three digit page number, skipping anything that
    /// is not a digit
    fn read_page_number(&mut self) -> Result<u16, Error<E>> {
        let mut page = 0u16;
        let mut digits = 0;

        while digits < PAGE_DIGITS {
            let b = self.link.read_u8()?;
            if !b.is_ascii_digit() {
                trace!("Discarding non-digit 0x{:02x}", b);
                continue;
            }
            page = page * 10 + (b - b'0') as u16;
            digits += 1;
        }

        Ok(page)
    }

    fn cmd_read_page(&mut self) -> Result<(), Error<E>> {
        self.link.write(PAGE_MESSAGE)?;

        let page = self.read_page_number()?;
        let map = *self.flash.map();
        let base = map
            .page_address(page as u32)
            .ok_or(FlashError::Page(page))?;

        debug!("Dumping page {} at 0x{:08x}", page, base);

        self.link.write(&format::dump_header())?;

        let mut row = [0u8; DUMP_COLUMNS];
        for offset in (0..map.page_size).step_by(DUMP_COLUMNS) {
            for (i, b) in row.iter_mut().enumerate() {
                *b = self.flash.read_byte(base + offset + i as u32)?;
            }
            self.link.write(&format::dump_row(&row))?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mem::MemFlash;
    use crate::mock::{MockPort, NoDelay};
    use std::io::ErrorKind;

    type Session = Bootloader<MockPort, NoDelay, MemFlash, ErrorKind>;

    const MAP: MemoryMap = MemoryMap::STM32F103XB;

    fn session(options: Options) -> Session {
        Bootloader::new(MockPort::new(), NoDelay, MemFlash::new(MAP, 1034), MAP, options)
    }

    fn record(address: u32, value: u16) -> Vec<u8> {
        let mut r = address.to_ne_bytes().to_vec();
        r.extend_from_slice(&value.to_ne_bytes());
        r
    }

    #[test]
    fn start_sends_banner_then_prompt() {
        let mut s = session(Options::default());
        s.start().unwrap();

        let mut expected = START_MESSAGE.to_vec();
        expected.extend_from_slice(PROMPT);
        assert_eq!(s.port_mut().take_output(), expected);
    }

    #[test]
    fn idle_when_no_command() {
        let mut s = session(Options::default());
        let o = s.poll();

        assert_eq!(o, Outcome::Idle);
        assert_eq!(o.status(), Status::Timeout);
        assert!(s.port_mut().take_output().is_empty());
    }

    #[test]
    fn write_abort_consumes_no_further_records() {
        let mut s = session(Options::default());
        s.port_mut().push(b"3");
        s.port_mut().push(&record(MAP.app_start, 0x1111));
        s.port_mut().push(&record(MAP.bank_start, 0x2222));
        s.port_mut().push(&record(MAP.app_start + 2, 0x3333));
        s.port_mut().push(&END_SUBSEQUENCE.to_ne_bytes());

        let o = s.poll();
        assert_eq!(o.status(), Status::BoundsError);
        assert_eq!(o.bits(), Status::BoundsError.code());
        assert_eq!(s.port().pending(), 6 + 4);

        let mut expected = b"3".to_vec();
        expected.extend_from_slice(&[ACK, NACK]);
        expected.extend_from_slice(PROMPT);
        assert_eq!(s.port_mut().take_output(), expected);

        assert_eq!(s.flash().read_byte(MAP.app_start + 2), Ok(0xFF));
    }

    #[test]
    fn write_with_leading_ack() {
        let mut s = session(Options {
            ack_first_record: true,
            ..Options::default()
        });
        s.port_mut().push(b"3");
        s.port_mut().push(&record(MAP.app_start, 0xA5A5));
        s.port_mut().push(&END_SUBSEQUENCE.to_ne_bytes());

        assert_eq!(s.poll().status(), Status::Ok);

        let mut expected = b"3".to_vec();
        expected.extend_from_slice(&[ACK, ACK]);
        expected.extend_from_slice(PROMPT);
        assert_eq!(s.port_mut().take_output(), expected);
    }

    #[test]
    fn write_timeout_mid_record_sends_no_ack() {
        let mut s = session(Options::default());
        s.port_mut().push(b"3");
        s.port_mut().push(&MAP.app_start.to_ne_bytes());

        let o = s.poll();
        assert_eq!(o.status(), Status::Timeout);

        let mut expected = b"3".to_vec();
        expected.extend_from_slice(PROMPT);
        assert_eq!(s.port_mut().take_output(), expected);
    }

    #[test]
    fn erase_acks_and_verifies() {
        let mut s = session(Options::default());
        s.port_mut().push(b"4");
        s.port_mut().push(&MAP.app_start.to_ne_bytes());
        s.port_mut().push(&[3]);

        assert_eq!(s.poll().status(), Status::Ok);
        assert_eq!(s.flash().hal().operations(), 3);

        let out = s.port_mut().take_output();
        assert_eq!(out[1], ACK);
    }

    #[test]
    fn erase_nacks_unaligned_and_verify_failures() {
        let mut s = session(Options::default());
        s.port_mut().push(b"4");
        s.port_mut().push(&(MAP.app_start + 1).to_ne_bytes());
        s.port_mut().push(&[1]);

        assert_eq!(s.poll().status(), Status::BoundsError);
        assert_eq!(s.port_mut().take_output()[1], NACK);

        s.flash_mut().hal_mut().stick(MAP.app_start, 0x00);
        s.port_mut().push(b"4");
        s.port_mut().push(&MAP.app_start.to_ne_bytes());
        s.port_mut().push(&[1]);

        assert_eq!(s.poll().status(), Status::FlashPageError);
        assert_eq!(s.port_mut().take_output()[1], NACK);
    }

    #[test]
    fn read_page_skips_noise_in_page_number() {
        let mut s = session(Options::default());
        s.port_mut().push(b"5");
        s.port_mut().push(b"0x0\r1");

        let o = s.poll();
        assert_eq!(o.status(), Status::Ok);
        assert_eq!(s.port().pending(), 0);

        let out = s.port_mut().take_output();
        let rows = out.windows(2).filter(|w| *w == b"\r\n").count();
        // page prompt, header, 64 rows, trailing prompt
        assert_eq!(rows, 1 + 1 + 64 + 1);
    }

    #[test]
    fn unrecognized_command_only_echoes_and_prompts() {
        let mut s = session(Options::default());
        s.port_mut().push(b"9");

        let o = s.poll();
        assert_eq!(
            o,
            Outcome::Unrecognized {
                code: b'9',
                report: Report::new()
            }
        );
        assert_eq!(o.status(), Status::Ok);

        let mut expected = b"9".to_vec();
        expected.extend_from_slice(PROMPT);
        assert_eq!(s.port_mut().take_output(), expected);
    }

    #[test]
    fn broken_port_reports_error() {
        let mut s = session(Options::default());
        s.port_mut().fail_reads(ErrorKind::BrokenPipe);

        let o = s.poll();
        assert!(matches!(o, Outcome::Failed { .. }));
        assert_eq!(o.status(), Status::Error);
        assert_eq!(s.port_mut().take_output(), PROMPT.to_vec());
    }
}
