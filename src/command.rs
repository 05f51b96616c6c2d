//! Commands and frame encoding for the STM32 USART bootloader protocol
//!
//! Every exchange with the bootloader is built from a small set of frame
//! shapes: a command byte with its complement, a big-endian address with an
//! XOR checksum, a length-prefixed data block, and the erase page lists.
//! The bootloader answers each frame with a single [ACK] or [NACK] byte.

use std::time::Duration;

use strum::Display;

/// Byte acknowledging a frame.
pub const ACK: u8 = 0x79;
/// Byte rejecting a frame.
pub const NACK: u8 = 0x1F;
/// Probe byte from which the bootloader measures the host's bit timing.
pub const SYNC: u8 = 0x7F;

/// Largest payload a single read or write transfer can carry.
pub const MAX_CHUNK_SIZE: usize = 256;

pub(crate) const DEFAULT_TIMEOUT: Duration = Duration::from_secs(4);

/// Commands understood by the USART system bootloader.
#[derive(Copy, Clone, Debug, Display, PartialEq, Eq)]
#[non_exhaustive]
#[repr(u8)]
pub enum CommandType {
    /// Report the bootloader version and the supported commands
    Get = 0x00,
    /// Report the chip's product id
    GetId = 0x02,
    /// Read up to 256 bytes of memory
    ReadMemory = 0x11,
    /// Jump to application code through the vector table at an address
    Go = 0x21,
    /// Write up to 256 bytes of memory
    WriteMemory = 0x31,
    /// Erase flash pages, one-byte page numbers
    Erase = 0x43,
    /// Erase flash pages, two-byte page numbers
    ExtendedErase = 0x44,
}

impl CommandType {
    /// Deadline for the device to answer a frame of this command.
    pub fn timeout(&self) -> Duration {
        DEFAULT_TIMEOUT
    }
}

/// XOR fold over a byte slice.
pub fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0, |acc, byte| acc ^ byte)
}

/// The two-byte command frame: opcode followed by its complement.
pub fn command_frame(command: CommandType) -> [u8; 2] {
    let opcode = command as u8;
    [opcode, opcode ^ 0xFF]
}

/// Big-endian address followed by the XOR of its four bytes.
pub fn address_frame(address: u32) -> [u8; 5] {
    let bytes = address.to_be_bytes();
    [bytes[0], bytes[1], bytes[2], bytes[3], checksum(&bytes)]
}

/// Length-prefixed payload for a write transfer.
///
/// The length byte encodes `payload.len() - 1`; the trailing checksum folds
/// the length byte and every payload byte. `payload` must hold between 1 and
/// [MAX_CHUNK_SIZE] bytes.
pub fn data_frame(payload: &[u8]) -> Vec<u8> {
    debug_assert!(!payload.is_empty() && payload.len() <= MAX_CHUNK_SIZE);

    let mut frame = Vec::with_capacity(payload.len() + 2);
    frame.push((payload.len() - 1) as u8);
    frame.extend_from_slice(payload);
    frame.push(checksum(&frame));
    frame
}

/// Byte count for a read transfer: `count - 1` and its complement.
pub fn read_count_frame(count: usize) -> [u8; 2] {
    debug_assert!((1..=MAX_CHUNK_SIZE).contains(&count));

    let encoded = (count - 1) as u8;
    [encoded, !encoded]
}

/// One-byte page list for the classic erase dialect.
pub fn erase_pages_frame(pages: &[u8]) -> Vec<u8> {
    debug_assert!(!pages.is_empty());

    let mut frame = Vec::with_capacity(pages.len() + 2);
    frame.push((pages.len() - 1) as u8);
    frame.extend_from_slice(pages);
    frame.push(checksum(&frame));
    frame
}

/// Classic global erase: the special page count `0xFF`.
pub fn erase_global_frame() -> [u8; 2] {
    [0xFF, 0x00]
}

/// Two-byte big-endian page list for the extended erase dialect.
pub fn extended_erase_pages_frame(pages: &[u16]) -> Vec<u8> {
    debug_assert!(!pages.is_empty());

    let mut frame = Vec::with_capacity(2 * pages.len() + 3);
    frame.extend(((pages.len() - 1) as u16).to_be_bytes());
    for page in pages {
        frame.extend(page.to_be_bytes());
    }
    frame.push(checksum(&frame));
    frame
}

/// Extended global erase: the special page count `0xFFFF`.
pub fn extended_erase_global_frame() -> [u8; 3] {
    [0xFF, 0xFF, 0x00]
}
