//! ASCII conversions for the text parts of the protocol

use crate::protocol::DUMP_COLUMNS;

const HEX_DIGITS: &[u8; 16] = b"0123456789ABCDEF";

/// Decimal rendering of a `u32`, most significant digit first
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decimal {
    buf: [u8; 10],
    start: usize,
}

impl Decimal {
    pub fn new(mut value: u32) -> Self {
        let mut buf = [0u8; 10];
        let mut start = buf.len();

        loop {
            start -= 1;
            buf[start] = b'0' + (value % 10) as u8;
            value /= 10;
            if value == 0 {
                break;
            }
        }

        Self { buf, start }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf[self.start..]
    }
}

impl AsRef<[u8]> for Decimal {
    fn as_ref(&self) -> &[u8] {
        self.as_bytes()
    }
}

/// Two uppercase hex characters for `b`
pub fn hex_byte(b: u8) -> [u8; 2] {
    [HEX_DIGITS[(b >> 4) as usize], HEX_DIGITS[(b & 0x0F) as usize]]
}

/// One dump line: CRLF then space separated hex pairs
pub fn dump_row(bytes: &[u8]) -> Vec<u8> {
    let mut line = Vec::with_capacity(2 + bytes.len() * 3);
    line.extend_from_slice(b"\r\n");

    for (i, b) in bytes.iter().enumerate() {
        if i > 0 {
            line.push(b' ');
        }
        line.extend_from_slice(&hex_byte(*b));
    }

    line
}

/// Dump header labelling the columns `00`..`0F`
pub fn dump_header() -> Vec<u8> {
    let mut labels = [0u8; DUMP_COLUMNS];
    for (i, l) in labels.iter_mut().enumerate() {
        *l = i as u8;
    }
    dump_row(&labels)
}
