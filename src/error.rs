//! Library and application errors

#[cfg(feature = "serialport")]
use std::io;

use miette::Diagnostic;
use thiserror::Error;

use crate::command::CommandType;

#[derive(Debug, Error, Diagnostic)]
#[non_exhaustive]
pub enum Error {
    #[cfg(feature = "serialport")]
    #[error("Failed to open the serial port")]
    #[diagnostic(
        code(stmflash::port_open),
        help("Make sure the correct device is connected to the host system")
    )]
    PortOpen(#[source] serialport::Error),

    #[cfg(feature = "serialport")]
    #[error("IO error while using serial port: {0}")]
    #[diagnostic(code(stmflash::serial_error))]
    Serial(#[source] serialport::Error),

    #[cfg(feature = "serialport")]
    #[error("The bootloader did not answer any sync probe")]
    #[diagnostic(
        code(stmflash::bootloader_unresponsive),
        help("Boot the device into the system bootloader (BOOT0 high, then reset) before flashing")
    )]
    BootloaderUnresponsive,

    #[cfg(feature = "serialport")]
    #[error("No response from the bootloader{}", fmt_during(.command))]
    #[diagnostic(code(stmflash::timeout))]
    Timeout { command: Option<CommandType> },

    #[error("The bootloader rejected a frame")]
    #[diagnostic(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("Chip not recognized")]
    #[diagnostic(
        code(stmflash::unknown_chip),
        help("Check that the device really is an STM32 in system bootloader mode")
    )]
    UnknownChip(#[from] ChipDetectError),

    #[error("Flash geometry of the {0} is not known")]
    #[diagnostic(
        code(stmflash::no_flash_geometry),
        help("The chip was identified but cannot be flashed without its flash and page sizes")
    )]
    NoFlashGeometry(&'static str),

    #[error("Supplied image ({image_size} bytes) does not fit in the available flash ({flash_size} bytes)")]
    #[diagnostic(code(stmflash::image_too_large))]
    ImageTooLarge { image_size: u32, flash_size: u32 },

    #[error("Flash contents differ from the image in segment {segment} at offset {offset:#x}")]
    #[diagnostic(
        code(stmflash::verify_failed),
        help("The flash may be write-protected, or the erase may not have covered the image")
    )]
    VerifyFailed { segment: usize, offset: usize },

    #[error("Supplied firmware image is not valid")]
    #[diagnostic(code(stmflash::invalid_image))]
    InvalidImage(#[from] ImageError),
}

#[cfg(feature = "serialport")]
impl Error {
    /// Attach the in-flight command to a timeout that surfaced as a bare
    /// IO error.
    pub(crate) fn during(self, command: CommandType) -> Self {
        match self {
            Error::Timeout { command: None } => Error::Timeout {
                command: Some(command),
            },
            err => err,
        }
    }
}

#[cfg(feature = "serialport")]
fn fmt_during(command: &Option<CommandType>) -> String {
    match command {
        Some(command) => format!(" while running the {} command", command),
        None => String::new(),
    }
}

#[cfg(feature = "serialport")]
impl From<serialport::Error> for Error {
    fn from(err: serialport::Error) -> Self {
        Error::Serial(err)
    }
}

#[cfg(feature = "serialport")]
impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::TimedOut => Error::Timeout { command: None },
            _ => Error::Serial(err.into()),
        }
    }
}

/// A frame the bootloader answered with something other than ACK, or a
/// response that does not follow the protocol.
#[derive(Copy, Clone, Debug, Error, Diagnostic)]
#[non_exhaustive]
#[error("Error while running {command} command")]
pub struct ProtocolError {
    command: CommandType,
    #[source]
    kind: ProtocolErrorKind,
}

impl ProtocolError {
    pub fn new(command: CommandType, kind: ProtocolErrorKind) -> ProtocolError {
        ProtocolError { command, kind }
    }
}

#[derive(Copy, Clone, Debug, Error, Diagnostic)]
#[non_exhaustive]
pub enum ProtocolErrorKind {
    #[error("The bootloader replied NACK")]
    #[diagnostic(code(stmflash::protocol::nack))]
    Nack,

    #[error("Expected ACK or NACK, received {0:#04x}")]
    #[diagnostic(code(stmflash::protocol::unexpected_byte))]
    UnexpectedByte(u8),

    #[error("Length {0} is outside the range the command can carry")]
    #[diagnostic(code(stmflash::protocol::invalid_length))]
    InvalidLength(usize),
}

#[derive(Debug, Error)]
#[error("Unrecognized product id {0:#05x}")]
pub struct ChipDetectError(u16);

impl From<u16> for ChipDetectError {
    fn from(product_id: u16) -> Self {
        ChipDetectError(product_id)
    }
}

#[derive(Debug, Error)]
#[error("{0}")]
pub struct ImageError(&'static str);

impl From<&'static str> for ImageError {
    fn from(err: &'static str) -> Self {
        ImageError(err)
    }
}
