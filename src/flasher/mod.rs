//! Write a firmware image to a target device
//!
//! The [Flasher] struct drives a complete bootloader session: it
//! synchronizes with the ROM, discovers which commands the bootloader
//! supports, identifies the chip, and then erases, programs, verifies, and
//! finally starts the application. Errors are terminal; a session that has
//! diverged from the protocol is abandoned rather than resynchronized.

use std::ops::RangeInclusive;

use log::{debug, info, warn};

use crate::{
    command::{self, CommandType, DEFAULT_TIMEOUT, MAX_CHUNK_SIZE},
    connection::Connection,
    error::{Error, ProtocolError, ProtocolErrorKind},
    image::{FirmwareImage, FLASH_BASE},
    interface::Interface,
    progress::ProgressCallbacks,
    target::ChipProfile,
};

/// Bit rates the bootloader session has been exercised at.
const TESTED_BAUD_RATES: RangeInclusive<u32> = 1200..=921_600;

/// Position of the erase opcode in the GET response block.
const ERASE_OPCODE_INDEX: usize = 7;

/// Session options recognized by [flash].
#[derive(Debug, Clone)]
pub struct FlashOptions {
    /// Erase the whole flash instead of only the pages the image touches
    pub erase_chip: bool,
    /// Bit rate for the bootloader session
    pub baud: u32,
}

impl Default for FlashOptions {
    fn default() -> Self {
        FlashOptions {
            erase_chip: false,
            baud: 115_200,
        }
    }
}

/// Information about the connected device
#[derive(Debug, Clone)]
pub struct DeviceInfo {
    /// The product line being used
    pub family: &'static str,
    /// Product id reported by GET-ID
    pub product_id: u16,
    /// Raw bootloader version byte (major nibble, minor nibble)
    pub bootloader_version: u8,
    /// Usable flash size in bytes, zero when unknown
    pub flash_size: u32,
    /// Flash page size in bytes, zero when unknown
    pub page_size: u32,
    /// Opcodes the bootloader advertises, in the order it lists them
    pub supported_commands: Vec<u8>,
}

/// Connect to and flash a target device
pub struct Flasher {
    /// Connection for flash operations
    connection: Connection,
    /// Identified chip
    chip: &'static ChipProfile,
    /// Raw bootloader version byte
    bootloader_version: u8,
    /// Advertised opcodes
    supported_commands: Vec<u8>,
    /// Whether erase uses the two-byte page number dialect
    extended_erase: bool,
}

impl std::fmt::Debug for Flasher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Flasher")
            .field("chip", &self.chip)
            .field("bootloader_version", &self.bootloader_version)
            .field("supported_commands", &self.supported_commands)
            .field("extended_erase", &self.extended_erase)
            .finish()
    }
}

impl Flasher {
    /// Synchronize with the bootloader and identify the chip.
    pub fn connect(serial: Interface) -> Result<Self, Error> {
        let mut connection = Connection::new(serial);
        connection.begin()?;
        connection.set_timeout(DEFAULT_TIMEOUT)?;

        let block = get(&mut connection)?;
        let bootloader_version = block[0];
        let supported_commands = block[1..].to_vec();
        // The erase opcode sits at a fixed position in the advertised
        // command list; which opcode it is selects the dialect.
        let extended_erase =
            block.get(ERASE_OPCODE_INDEX).copied() == Some(CommandType::ExtendedErase as u8);
        debug!(
            "Bootloader version {}.{}, extended erase: {}",
            bootloader_version >> 4,
            bootloader_version & 0xF,
            extended_erase
        );

        let product_id = get_id(&mut connection)?;
        let chip = ChipProfile::lookup(product_id)?;
        info!("Detected {} (product id {:#05x})", chip.family, product_id);

        Ok(Flasher {
            connection,
            chip,
            bootloader_version,
            supported_commands,
            extended_erase,
        })
    }

    /// Information about the connected device
    pub fn device_info(&self) -> DeviceInfo {
        DeviceInfo {
            family: self.chip.family,
            product_id: self.chip.product_id,
            bootloader_version: self.bootloader_version,
            flash_size: self.chip.flash_size,
            page_size: self.chip.page_size,
            supported_commands: self.supported_commands.clone(),
        }
    }

    /// The identified chip
    pub fn chip(&self) -> &'static ChipProfile {
        self.chip
    }

    /// Program `image`, verify it, and start the application.
    pub fn flash(
        &mut self,
        image: &FirmwareImage,
        options: &FlashOptions,
        mut progress: Option<&mut dyn ProgressCallbacks>,
    ) -> Result<(), Error> {
        // The size verdict precedes any erase traffic.
        if !self.chip.has_geometry() {
            return Err(Error::NoFlashGeometry(self.chip.family));
        }
        if image.bytes_total() >= self.chip.flash_size {
            return Err(Error::ImageTooLarge {
                image_size: image.bytes_total(),
                flash_size: self.chip.flash_size,
            });
        }

        // Writing and verifying each account for the full image.
        let total = image.bytes_total() as usize * 2;
        if let Some(cb) = progress.as_mut() {
            cb.begin(total)
        }

        if options.erase_chip {
            self.erase_flash()?;
        } else {
            self.erase_image_pages(image)?;
        }

        let written = self.write(image, &mut progress)?;
        self.verify(image, written, &mut progress)?;

        if let Some(cb) = progress.as_mut() {
            cb.end()
        }

        info!("Starting application");
        self.go(FLASH_BASE)?;

        Ok(())
    }

    /// Erase the whole flash.
    pub fn erase_flash(&mut self) -> Result<(), Error> {
        info!("Erasing all flash pages");
        if self.extended_erase {
            self.connection
                .with_timeout(CommandType::ExtendedErase.timeout(), |connection| {
                    connection.command(CommandType::ExtendedErase)?;
                    connection.send_frame(
                        CommandType::ExtendedErase,
                        &command::extended_erase_global_frame(),
                    )
                })
        } else {
            self.connection
                .with_timeout(CommandType::Erase.timeout(), |connection| {
                    connection.command(CommandType::Erase)?;
                    connection.send_frame(CommandType::Erase, &command::erase_global_frame())
                })
        }
    }

    /// Erase every page between the start of flash and the image's top
    /// address.
    fn erase_image_pages(&mut self, image: &FirmwareImage) -> Result<(), Error> {
        let page_size = self.chip.page_size;
        let page_count = (image.end_offset() + page_size - 1) / page_size;
        info!("Erasing {} flash pages", page_count);

        if self.extended_erase {
            if page_count > 0xFFF0 {
                return Err(ProtocolError::new(
                    CommandType::ExtendedErase,
                    ProtocolErrorKind::InvalidLength(page_count as usize),
                )
                .into());
            }
            let pages: Vec<u16> = (0..page_count).map(|page| page as u16).collect();
            self.connection
                .with_timeout(CommandType::ExtendedErase.timeout(), |connection| {
                    connection.command(CommandType::ExtendedErase)?;
                    connection.send_frame(
                        CommandType::ExtendedErase,
                        &command::extended_erase_pages_frame(&pages),
                    )
                })
        } else {
            if page_count > 256 {
                return Err(ProtocolError::new(
                    CommandType::Erase,
                    ProtocolErrorKind::InvalidLength(page_count as usize),
                )
                .into());
            }
            let pages: Vec<u8> = (0..page_count).map(|page| page as u8).collect();
            self.connection
                .with_timeout(CommandType::Erase.timeout(), |connection| {
                    connection.command(CommandType::Erase)?;
                    connection
                        .send_frame(CommandType::Erase, &command::erase_pages_frame(&pages))
                })
        }
    }

    /// Stream every segment to flash in transfers of up to 256 bytes.
    fn write(
        &mut self,
        image: &FirmwareImage,
        progress: &mut Option<&mut dyn ProgressCallbacks>,
    ) -> Result<usize, Error> {
        let mut done = 0;

        for segment in image.segments() {
            debug!(
                "Writing segment at {:#010x} ({} bytes)",
                segment.address,
                segment.size()
            );

            for (i, chunk) in segment.data().chunks(MAX_CHUNK_SIZE).enumerate() {
                let address = segment.address + (i * MAX_CHUNK_SIZE) as u32;

                self.connection
                    .with_timeout(CommandType::WriteMemory.timeout(), |connection| {
                        connection.command(CommandType::WriteMemory)?;
                        connection
                            .send_frame(CommandType::WriteMemory, &command::address_frame(address))?;
                        connection.send_frame(CommandType::WriteMemory, &command::data_frame(chunk))
                    })?;

                done += chunk.len();
                if let Some(cb) = progress.as_mut() {
                    cb.advance(address, done)
                }
            }
        }

        Ok(done)
    }

    /// Read every segment back and compare it against the image.
    fn verify(
        &mut self,
        image: &FirmwareImage,
        mut done: usize,
        progress: &mut Option<&mut dyn ProgressCallbacks>,
    ) -> Result<(), Error> {
        let mut readback: Vec<Vec<u8>> = Vec::with_capacity(image.segments().len());

        for segment in image.segments() {
            debug!(
                "Reading back segment at {:#010x} ({} bytes)",
                segment.address,
                segment.size()
            );

            let mut buffer = Vec::with_capacity(segment.data().len());
            for (i, chunk) in segment.data().chunks(MAX_CHUNK_SIZE).enumerate() {
                let address = segment.address + (i * MAX_CHUNK_SIZE) as u32;

                let bytes = self
                    .connection
                    .with_timeout(CommandType::ReadMemory.timeout(), |connection| {
                        connection.command(CommandType::ReadMemory)?;
                        connection
                            .send_frame(CommandType::ReadMemory, &command::address_frame(address))?;
                        // The last ACK precedes the data; the bytes
                        // themselves are not acknowledged.
                        connection.send_frame(
                            CommandType::ReadMemory,
                            &command::read_count_frame(chunk.len()),
                        )?;
                        connection.read_response(CommandType::ReadMemory, chunk.len())
                    })?;

                done += bytes.len();
                buffer.extend_from_slice(&bytes);
                if let Some(cb) = progress.as_mut() {
                    cb.advance(address, done)
                }
            }
            readback.push(buffer);
        }

        for (index, (segment, bytes)) in image.segments().iter().zip(&readback).enumerate() {
            if let Some(offset) = segment
                .data()
                .iter()
                .zip(bytes)
                .position(|(expected, read)| expected != read)
            {
                return Err(Error::VerifyFailed {
                    segment: index,
                    offset,
                });
            }
        }

        Ok(())
    }

    /// Jump to the application through the vector table at `address`.
    pub fn go(&mut self, address: u32) -> Result<(), Error> {
        self.connection
            .with_timeout(CommandType::Go.timeout(), |connection| {
                connection.command(CommandType::Go)?;
                connection.send_frame(CommandType::Go, &command::address_frame(address))
            })
    }
}

/// Run the GET command: bootloader version plus the advertised opcodes.
fn get(connection: &mut Connection) -> Result<Vec<u8>, Error> {
    connection.with_timeout(CommandType::Get.timeout(), |connection| {
        connection.command(CommandType::Get)?;
        let len = connection.read_response_byte(CommandType::Get)?;
        let block = connection.read_response(CommandType::Get, len as usize + 1)?;
        connection.read_ack(CommandType::Get)?;
        Ok(block)
    })
}

/// Run the GET-ID command and return the 12-bit product id.
fn get_id(connection: &mut Connection) -> Result<u16, Error> {
    connection.with_timeout(CommandType::GetId.timeout(), |connection| {
        connection.command(CommandType::GetId)?;
        let len = connection.read_response_byte(CommandType::GetId)?;
        if len != 1 {
            return Err(ProtocolError::new(
                CommandType::GetId,
                ProtocolErrorKind::InvalidLength(len as usize),
            )
            .into());
        }
        let bytes = connection.read_response(CommandType::GetId, 2)?;
        connection.read_ack(CommandType::GetId)?;
        Ok(u16::from_be_bytes([bytes[0], bytes[1]]))
    })
}

/// Flash `image` to the device listening behind `port` and start it.
///
/// Completion is reported exactly once, through the returned result; the
/// port is closed when the session ends, successfully or not.
pub fn flash(
    port: &str,
    image: &FirmwareImage,
    options: &FlashOptions,
    progress: Option<&mut dyn ProgressCallbacks>,
) -> Result<(), Error> {
    if !TESTED_BAUD_RATES.contains(&options.baud) {
        warn!(
            "Baud rate {} is outside the tested {}..={} range",
            options.baud,
            TESTED_BAUD_RATES.start(),
            TESTED_BAUD_RATES.end()
        );
    }

    let interface = Interface::open(port, options.baud)?;
    let mut flasher = Flasher::connect(interface)?;
    flasher.flash(image, options, progress)
}
