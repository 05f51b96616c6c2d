//! Establish a connection with a target device
//!
//! The [Connection] struct abstracts over the serial link and the
//! frame-then-acknowledge rhythm of the bootloader: every outgoing frame
//! discards stale input first, and every response is a fixed-length read
//! under the current deadline.

use std::{
    io::Read,
    time::Duration,
};

use log::debug;

use crate::{
    command::{self, CommandType, ACK, NACK, SYNC},
    error::{Error, ProtocolError, ProtocolErrorKind},
    interface::Interface,
};

const MAX_SYNC_ATTEMPTS: usize = 4;
const SYNC_TIMEOUT: Duration = Duration::from_millis(250);

/// An established connection with a target device
pub struct Connection {
    serial: Interface,
}

impl Connection {
    pub fn new(serial: Interface) -> Self {
        Connection { serial }
    }

    /// Wake the bootloader and let it lock onto the host's bit timing.
    pub fn begin(&mut self) -> Result<(), Error> {
        for _ in 0..MAX_SYNC_ATTEMPTS {
            match self.sync() {
                Ok(_) => return Ok(()),
                Err(e) => {
                    debug!("Failed to sync, error {:#?}, retrying", e);
                }
            }
        }

        Err(Error::BootloaderUnresponsive)
    }

    /// Send one probe byte and wait for any sign of life.
    fn sync(&mut self) -> Result<(), Error> {
        self.with_timeout(SYNC_TIMEOUT, |connection| {
            connection.write_frame(&[SYNC])?;

            // A NACK means the bootloader is already synchronized and mid
            // command; an echoed probe byte shows up on half-duplex wiring.
            match connection.read_byte()? {
                ACK | NACK | SYNC => Ok(()),
                other => {
                    debug!("Unexpected sync response: {:#04x}", other);
                    Err(Error::BootloaderUnresponsive)
                }
            }
        })
    }

    /// Send a command frame and wait for its ACK.
    pub fn command(&mut self, command: CommandType) -> Result<(), Error> {
        debug!("Sending command: {:?}", command);
        self.send_frame(command, &command::command_frame(command))
    }

    /// Send one frame of an in-flight command and wait for its ACK.
    pub fn send_frame(&mut self, command: CommandType, frame: &[u8]) -> Result<(), Error> {
        self.write_frame(frame).map_err(|err| err.during(command))?;
        self.read_ack(command)
    }

    /// Write a frame verbatim, discarding any stale input first.
    pub fn write_frame(&mut self, frame: &[u8]) -> Result<(), Error> {
        let serial = self.serial.serial_port_mut();
        serial.clear(serialport::ClearBuffer::Input)?;
        serial.write_all(frame)?;
        serial.flush()?;
        Ok(())
    }

    /// Read the single-byte status answering a frame of `command`.
    pub fn read_ack(&mut self, command: CommandType) -> Result<(), Error> {
        match self.read_response_byte(command)? {
            ACK => Ok(()),
            NACK => Err(ProtocolError::new(command, ProtocolErrorKind::Nack).into()),
            other => {
                Err(ProtocolError::new(command, ProtocolErrorKind::UnexpectedByte(other)).into())
            }
        }
    }

    /// Read one byte of `command`'s response.
    pub fn read_response_byte(&mut self, command: CommandType) -> Result<u8, Error> {
        self.read_byte().map_err(|err| err.during(command))
    }

    /// Read exactly `len` bytes of `command`'s response.
    pub fn read_response(&mut self, command: CommandType, len: usize) -> Result<Vec<u8>, Error> {
        let mut buffer = vec![0; len];
        self.serial
            .read_exact(&mut buffer)
            .map_err(|err| Error::from(err).during(command))?;
        Ok(buffer)
    }

    fn read_byte(&mut self) -> Result<u8, Error> {
        let mut byte = 0;
        self.serial.read_exact(std::slice::from_mut(&mut byte))?;
        Ok(byte)
    }

    /// Run an exchange with a response deadline of its own.
    pub fn with_timeout<T, F>(&mut self, timeout: Duration, mut f: F) -> Result<T, Error>
    where
        F: FnMut(&mut Connection) -> Result<T, Error>,
    {
        let old_timeout = {
            let serial = self.serial.serial_port_mut();
            let old_timeout = serial.timeout();
            serial.set_timeout(timeout)?;
            old_timeout
        };

        let result = f(self);

        self.serial.serial_port_mut().set_timeout(old_timeout)?;

        result
    }

    /// Set the deadline for response reads.
    pub fn set_timeout(&mut self, timeout: Duration) -> Result<(), Error> {
        self.serial.serial_port_mut().set_timeout(timeout)?;
        Ok(())
    }

    /// Get the current baud rate of the serial port
    pub fn baud_rate(&self) -> Result<u32, Error> {
        Ok(self.serial.serial_port().baud_rate()?)
    }

    /// Turn the connection back into an Interface
    pub fn into_interface(self) -> Interface {
        self.serial
    }
}
