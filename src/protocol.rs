//! Wire constants and command codes

/// Acknowledges a record or erase request
pub const ACK: u8 = 0x55;
/// Rejects a record or erase request
pub const NACK: u8 = 0xAA;

/// Address value terminating the WRITE record stream
pub const END_SUBSEQUENCE: u32 = 0xCC33;

/// Sent after every command, whatever its outcome
pub const PROMPT: &[u8] = b"\r\n>>";

pub const START_MESSAGE: &[u8] = b"-Serial Bootloader. Type '0' for commands list";

pub const COMMANDS_MESSAGE: &[u8] = b"\r\nCommands:\r\n\
Get id of chip - '1';\r\n\
Get bootloader version - '2';\r\n\
Write halfwords - '3';\r\n\
Erase pages - '4';\r\n\
Read page - '5'.";

pub const ID_MESSAGE: &[u8] = b"\r\nChip ID: ";
pub const VERSION_MESSAGE: &[u8] = b"\r\nBootloader version: ";
pub const PAGE_MESSAGE: &[u8] = b"\r\nPage: ";

pub const VERSION_MAJOR: u8 = 0;
pub const VERSION_MINOR: u8 = 1;

/// Number of ASCII digits in a READ_PAGE request
pub const PAGE_DIGITS: usize = 3;

/// Bytes per line of a page dump
pub const DUMP_COLUMNS: usize = 16;

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Command {
    /// Lists the available commands
    Help,

    /// Reports the chip identifier in decimal
    GetId,

    /// Reports the bootloader version
    GetVersion,

    /// Programs a stream of (address, halfword) records terminated by [`END_SUBSEQUENCE`]
    Write,

    /// Erases a run of consecutive pages
    Erase,

    /// Dumps one page as hex
    ReadPage,

    /// Any byte without a handler
    Unknown(u8),
}

impl Command {
    pub const HELP: u8 = b'0';
    pub const GET_ID: u8 = b'1';
    pub const GET_VERSION: u8 = b'2';
    pub const WRITE: u8 = b'3';
    pub const ERASE: u8 = b'4';
    pub const READ_PAGE: u8 = b'5';

    /// The byte the host sends to select this command
    pub fn code(&self) -> u8 {
        match self {
            Command::Help => Self::HELP,
            Command::GetId => Self::GET_ID,
            Command::GetVersion => Self::GET_VERSION,
            Command::Write => Self::WRITE,
            Command::Erase => Self::ERASE,
            Command::ReadPage => Self::READ_PAGE,
            Command::Unknown(c) => *c,
        }
    }
}

impl From<u8> for Command {
    fn from(code: u8) -> Self {
        match code {
            Self::HELP => Command::Help,
            Self::GET_ID => Command::GetId,
            Self::GET_VERSION => Command::GetVersion,
            Self::WRITE => Command::Write,
            Self::ERASE => Command::Erase,
            Self::READ_PAGE => Command::ReadPage,
            other => Command::Unknown(other),
        }
    }
}
