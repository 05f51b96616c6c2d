//! Serial port wrapper
//!
//! The USART bootloader speaks 8 data bits, even parity, 1 stop bit at any
//! rate it can measure from the probe byte; [Interface::open] fixes that
//! line discipline so callers only choose a port and a bit rate.

use std::io::Read;

use serialport::{DataBits, FlowControl, Parity, SerialPort, StopBits};

use crate::{command::DEFAULT_TIMEOUT, error::Error};

/// Wrapper around SerialPort where platform-specific modifications can be
/// implemented.
pub struct Interface {
    pub serial_port: Box<dyn SerialPort>,
}

impl Interface {
    /// Open `port` with the bootloader's line discipline.
    pub fn open(port: &str, baud: u32) -> Result<Self, Error> {
        let serial = serialport::new(port, baud)
            .data_bits(DataBits::Eight)
            .parity(Parity::Even)
            .stop_bits(StopBits::One)
            .flow_control(FlowControl::None)
            .timeout(DEFAULT_TIMEOUT)
            .open()
            .map_err(Error::PortOpen)?;

        Ok(Self { serial_port: serial })
    }

    /// Wrap an already-open serial port.
    pub fn new(serial_port: Box<dyn SerialPort>) -> Self {
        Self { serial_port }
    }

    pub fn into_serial(self) -> Box<dyn SerialPort> {
        self.serial_port
    }

    pub fn serial_port(&self) -> &dyn SerialPort {
        self.serial_port.as_ref()
    }

    pub fn serial_port_mut(&mut self) -> &mut dyn SerialPort {
        self.serial_port.as_mut()
    }
}

// Using `dyn SerialPort` as `dyn Read` requires trait upcasting, which
// isn't stable yet.
impl Read for Interface {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.serial_port.read(buf)
    }
}
