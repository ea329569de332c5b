//! Timed byte transport over an embedded-hal serial port

use core::marker::PhantomData;

use embedded_hal::blocking::delay::DelayMs;

use crate::status::Error;
use crate::{Options, SerialPort};

pub struct Link<P, D, E> {
    port: P,
    delay: D,
    response_timeout_ms: u32,
    poll_delay_ms: u32,
    _err: PhantomData<E>,
}

impl<P, D, E> Link<P, D, E>
where
    P: SerialPort<E>,
    D: DelayMs<u32>,
    E: core::fmt::Debug,
{
    pub fn new(port: P, delay: D, options: &Options) -> Self {
        Self {
            port,
            delay,
            response_timeout_ms: options.response_timeout_ms,
            poll_delay_ms: options.poll_delay_ms,
            _err: PhantomData,
        }
    }

    pub fn port(&self) -> &P {
        &self.port
    }

    pub fn port_mut(&mut self) -> &mut P {
        &mut self.port
    }

    pub fn release(self) -> (P, D) {
        (self.port, self.delay)
    }

    /// Fill `buf`, failing with [`Error::Timeout`] if the whole transfer
    /// takes longer than the response timeout
    pub fn read(&mut self, buf: &mut [u8]) -> Result<(), Error<E>> {
        let mut t = 0;
        let mut n = 0;

        while n < buf.len() {
            match self.port.read() {
                Ok(v) => {
                    buf[n] = v;
                    n += 1;
                    continue;
                }
                Err(nb::Error::WouldBlock) => (),
                Err(nb::Error::Other(e)) => {
                    error!("Serial read error: {:?}", e);
                    return Err(Error::Serial(e));
                }
            }

            // Wait for delay period
            self.delay.delay_ms(self.poll_delay_ms);
            t += self.poll_delay_ms.max(1);

            if t > self.response_timeout_ms {
                trace!("Receive timeout ({} of {} bytes)", n, buf.len());
                return Err(Error::Timeout);
            }
        }

        Ok(())
    }

    pub fn read_u8(&mut self) -> Result<u8, Error<E>> {
        let mut b = [0u8; 1];
        self.read(&mut b)?;
        Ok(b[0])
    }

    /// Read a halfword in native byte order
    pub fn read_u16(&mut self) -> Result<u16, Error<E>> {
        let mut b = [0u8; 2];
        self.read(&mut b)?;
        Ok(u16::from_ne_bytes(b))
    }

    /// Read a word in native byte order
    pub fn read_u32(&mut self) -> Result<u32, Error<E>> {
        let mut b = [0u8; 4];
        self.read(&mut b)?;
        Ok(u32::from_ne_bytes(b))
    }

    pub fn write(&mut self, data: &[u8]) -> Result<(), Error<E>> {
        for b in data {
            block!(self.port.write(*b)).map_err(Error::Serial)?;
        }
        block!(self.port.flush()).map_err(Error::Serial)?;
        Ok(())
    }
}
