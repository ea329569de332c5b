use std::io::ErrorKind as IoErrorKind;
use std::path::Path;

use linux_embedded_hal::{Delay, Serial};
use serial_core::{
    BaudRate, CharSize, Error as SerialError, FlowControl, Parity, SerialDevice as _,
    SerialPortSettings as _, StopBits,
};

use crate::{Bootloader, FlashHal, MemoryMap, Options};

impl<H: FlashHal> Bootloader<Serial, Delay, H, IoErrorKind> {
    /// Run a bootloader session on a linux serial port
    pub fn linux<P: AsRef<Path>>(
        port: P,
        baud: usize,
        hal: H,
        map: MemoryMap,
        options: Options,
    ) -> Result<Self, SerialError> {
        // Open port
        let mut port = Serial::open(port.as_ref())?;

        // Apply settings, 8N1 as the host tooling expects
        let mut settings = port.0.read_settings()?;

        settings.set_char_size(CharSize::Bits8);
        settings.set_stop_bits(StopBits::Stop1);
        settings.set_baud_rate(BaudRate::from_speed(baud))?;
        settings.set_flow_control(FlowControl::FlowNone);
        settings.set_parity(Parity::ParityNone);

        port.0.write_settings(&settings)?;

        // Return instance
        Ok(Self::new(port, Delay {}, hal, map, options))
    }
}
