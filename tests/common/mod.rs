//! An in-process simulation of the USART system bootloader.
//!
//! [SimulatedPort] implements [SerialPort]; bytes written to it feed a
//! frame parser that behaves like the ROM bootloader of a configurable
//! device, and the responses it queues are served by subsequent reads. The
//! paired [SimHandle] exposes the transcript for assertions.

use std::{
    collections::{BTreeMap, VecDeque},
    io::{self, Read, Write},
    sync::{Arc, Mutex, MutexGuard},
    time::Duration,
};

use serialport::{ClearBuffer, DataBits, FlowControl, Parity, SerialPort, StopBits};

const ACK: u8 = 0x79;
const NACK: u8 = 0x1F;
const SYNC: u8 = 0x7F;

const ERASED: u8 = 0xFF;

/// Command set advertised by a bootloader with the classic erase opcode.
pub const CLASSIC_COMMANDS: [u8; 11] = [
    0x00, 0x01, 0x02, 0x11, 0x21, 0x31, 0x43, 0x63, 0x73, 0x82, 0x92,
];

/// Command set advertised by a bootloader with the extended erase opcode.
pub const EXTENDED_COMMANDS: [u8; 11] = [
    0x00, 0x01, 0x02, 0x11, 0x21, 0x31, 0x44, 0x63, 0x73, 0x82, 0x92,
];

pub struct DeviceConfig {
    pub product_id: u16,
    pub bootloader_version: u8,
    pub commands: Vec<u8>,
    /// Never respond to anything, like a device that isn't in the
    /// bootloader at all.
    pub silent: bool,
    /// Flip the n-th byte (counting every byte served to read-memory)
    /// on its way out.
    pub corrupt_read_at: Option<usize>,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        DeviceConfig {
            product_id: 0x0410,
            bootloader_version: 0x22,
            commands: CLASSIC_COMMANDS.to_vec(),
            silent: false,
            corrupt_read_at: None,
        }
    }
}

/// One erase operation the simulated device carried out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EraseOp {
    Classic(Vec<u8>),
    ClassicGlobal,
    Extended(Vec<u16>),
    ExtendedGlobal,
}

enum Expect {
    CommandByte,
    Complement(u8),
    Address {
        command: u8,
        buf: Vec<u8>,
    },
    WriteLength {
        address: u32,
    },
    WriteBody {
        address: u32,
        buf: Vec<u8>,
        remaining: usize,
    },
    ReadCount {
        address: u32,
        buf: Vec<u8>,
    },
    EraseBody {
        buf: Vec<u8>,
    },
    ExtendedEraseBody {
        buf: Vec<u8>,
    },
}

struct SimState {
    config: DeviceConfig,
    expect: Expect,
    /// Bytes queued for the host to read.
    tx: VecDeque<u8>,
    /// Every byte the host wrote, in order.
    written: Vec<u8>,
    flash: BTreeMap<u32, u8>,
    writes: Vec<(u32, usize)>,
    erases: Vec<EraseOp>,
    go_address: Option<u32>,
    read_position: usize,
    timeout: Duration,
    baud: u32,
}

fn xor(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0, |acc, b| acc ^ b)
}

impl SimState {
    fn new(config: DeviceConfig) -> Self {
        SimState {
            config,
            expect: Expect::CommandByte,
            tx: VecDeque::new(),
            written: Vec::new(),
            flash: BTreeMap::new(),
            writes: Vec::new(),
            erases: Vec::new(),
            go_address: None,
            read_position: 0,
            timeout: Duration::from_millis(0),
            baud: 115_200,
        }
    }

    fn respond(&mut self, bytes: &[u8]) {
        self.tx.extend(bytes);
    }

    fn feed(&mut self, byte: u8) {
        self.written.push(byte);
        if self.config.silent {
            return;
        }

        match std::mem::replace(&mut self.expect, Expect::CommandByte) {
            Expect::CommandByte => {
                if byte == SYNC {
                    self.respond(&[ACK]);
                } else {
                    self.expect = Expect::Complement(byte);
                }
            }

            Expect::Complement(command) => {
                if byte != command ^ 0xFF || !self.config.commands.contains(&command) {
                    self.respond(&[NACK]);
                    return;
                }
                self.start_command(command);
            }

            Expect::Address { command, mut buf } => {
                buf.push(byte);
                if buf.len() < 5 {
                    self.expect = Expect::Address { command, buf };
                    return;
                }
                if xor(&buf[..4]) != buf[4] {
                    self.respond(&[NACK]);
                    return;
                }
                let address = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);
                self.respond(&[ACK]);
                match command {
                    0x11 => self.expect = Expect::ReadCount {
                        address,
                        buf: Vec::new(),
                    },
                    0x31 => self.expect = Expect::WriteLength { address },
                    0x21 => self.go_address = Some(address),
                    _ => unreachable!(),
                }
            }

            Expect::WriteLength { address } => {
                let total = byte as usize + 1 + 1;
                self.expect = Expect::WriteBody {
                    address,
                    buf: vec![byte],
                    remaining: total,
                };
            }

            Expect::WriteBody {
                address,
                mut buf,
                remaining,
            } => {
                buf.push(byte);
                if remaining > 1 {
                    self.expect = Expect::WriteBody {
                        address,
                        buf,
                        remaining: remaining - 1,
                    };
                    return;
                }
                let (body, checksum) = buf.split_at(buf.len() - 1);
                if xor(body) != checksum[0] {
                    self.respond(&[NACK]);
                    return;
                }
                let payload = &body[1..];
                for (i, value) in payload.iter().enumerate() {
                    self.flash.insert(address + i as u32, *value);
                }
                self.writes.push((address, payload.len()));
                self.respond(&[ACK]);
            }

            Expect::ReadCount { address, mut buf } => {
                buf.push(byte);
                if buf.len() < 2 {
                    self.expect = Expect::ReadCount { address, buf };
                    return;
                }
                if buf[1] != !buf[0] {
                    self.respond(&[NACK]);
                    return;
                }
                self.respond(&[ACK]);
                let count = buf[0] as usize + 1;
                for i in 0..count {
                    let mut value = *self
                        .flash
                        .get(&(address + i as u32))
                        .unwrap_or(&ERASED);
                    if self.config.corrupt_read_at == Some(self.read_position) {
                        value ^= 0xFF;
                    }
                    self.read_position += 1;
                    self.tx.push_back(value);
                }
            }

            Expect::EraseBody { mut buf } => {
                buf.push(byte);
                let total = if buf[0] == 0xFF {
                    2
                } else {
                    buf[0] as usize + 1 + 2
                };
                if buf.len() < total {
                    self.expect = Expect::EraseBody { buf };
                    return;
                }
                let (body, checksum) = buf.split_at(buf.len() - 1);
                if body[0] == 0xFF {
                    // Single-byte global erase carries the complement, not
                    // the XOR fold.
                    if checksum[0] != !body[0] {
                        self.respond(&[NACK]);
                        return;
                    }
                    self.flash.clear();
                    self.erases.push(EraseOp::ClassicGlobal);
                } else {
                    if xor(body) != checksum[0] {
                        self.respond(&[NACK]);
                        return;
                    }
                    self.erases.push(EraseOp::Classic(body[1..].to_vec()));
                }
                self.respond(&[ACK]);
            }

            Expect::ExtendedEraseBody { mut buf } => {
                buf.push(byte);
                if buf.len() < 2 {
                    self.expect = Expect::ExtendedEraseBody { buf };
                    return;
                }
                let total = if buf[0] == 0xFF && buf[1] == 0xFF {
                    3
                } else {
                    let count = u16::from_be_bytes([buf[0], buf[1]]) as usize + 1;
                    2 + 2 * count + 1
                };
                if buf.len() < total {
                    self.expect = Expect::ExtendedEraseBody { buf };
                    return;
                }
                let (body, checksum) = buf.split_at(buf.len() - 1);
                if xor(body) != checksum[0] {
                    self.respond(&[NACK]);
                    return;
                }
                if body[0] == 0xFF && body[1] == 0xFF {
                    self.flash.clear();
                    self.erases.push(EraseOp::ExtendedGlobal);
                } else {
                    let pages = body[2..]
                        .chunks(2)
                        .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
                        .collect();
                    self.erases.push(EraseOp::Extended(pages));
                }
                self.respond(&[ACK]);
            }
        }
    }

    fn start_command(&mut self, command: u8) {
        match command {
            // GET: version plus the advertised command list
            0x00 => {
                self.respond(&[ACK, self.config.commands.len() as u8]);
                self.respond(&[self.config.bootloader_version]);
                let commands = self.config.commands.clone();
                self.respond(&commands);
                self.respond(&[ACK]);
            }
            // GET-ID: two big-endian id bytes
            0x02 => {
                let id = self.config.product_id.to_be_bytes();
                self.respond(&[ACK, 0x01, id[0], id[1], ACK]);
            }
            0x11 | 0x21 | 0x31 => {
                self.respond(&[ACK]);
                self.expect = Expect::Address {
                    command,
                    buf: Vec::new(),
                };
            }
            0x43 => {
                self.respond(&[ACK]);
                self.expect = Expect::EraseBody { buf: Vec::new() };
            }
            0x44 => {
                self.respond(&[ACK]);
                self.expect = Expect::ExtendedEraseBody { buf: Vec::new() };
            }
            _ => self.respond(&[NACK]),
        }
    }
}

/// The host-facing end of the simulated device.
#[derive(Clone)]
pub struct SimulatedPort {
    state: Arc<Mutex<SimState>>,
}

/// Assertion access to the simulated device's state.
pub struct SimHandle {
    state: Arc<Mutex<SimState>>,
}

impl SimulatedPort {
    pub fn new(config: DeviceConfig) -> (SimulatedPort, SimHandle) {
        let state = Arc::new(Mutex::new(SimState::new(config)));
        (
            SimulatedPort {
                state: state.clone(),
            },
            SimHandle { state },
        )
    }

    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap()
    }
}

impl SimHandle {
    fn lock(&self) -> MutexGuard<'_, SimState> {
        self.state.lock().unwrap()
    }

    pub fn written(&self) -> Vec<u8> {
        self.lock().written.clone()
    }

    pub fn erases(&self) -> Vec<EraseOp> {
        self.lock().erases.clone()
    }

    pub fn writes(&self) -> Vec<(u32, usize)> {
        self.lock().writes.clone()
    }

    pub fn flash_range(&self, address: u32, len: usize) -> Vec<u8> {
        let state = self.lock();
        (0..len)
            .map(|i| *state.flash.get(&(address + i as u32)).unwrap_or(&ERASED))
            .collect()
    }

    pub fn go_address(&self) -> Option<u32> {
        self.lock().go_address
    }
}

impl Read for SimulatedPort {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut state = self.lock();
        if state.tx.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::TimedOut,
                "simulated device has nothing to say",
            ));
        }

        let mut count = 0;
        while count < buf.len() {
            match state.tx.pop_front() {
                Some(byte) => {
                    buf[count] = byte;
                    count += 1;
                }
                None => break,
            }
        }
        Ok(count)
    }
}

impl Write for SimulatedPort {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut state = self.lock();
        for byte in buf {
            state.feed(*byte);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl SerialPort for SimulatedPort {
    fn name(&self) -> Option<String> {
        Some("sim".into())
    }

    fn baud_rate(&self) -> serialport::Result<u32> {
        Ok(self.lock().baud)
    }

    fn data_bits(&self) -> serialport::Result<DataBits> {
        Ok(DataBits::Eight)
    }

    fn flow_control(&self) -> serialport::Result<FlowControl> {
        Ok(FlowControl::None)
    }

    fn parity(&self) -> serialport::Result<Parity> {
        Ok(Parity::Even)
    }

    fn stop_bits(&self) -> serialport::Result<StopBits> {
        Ok(StopBits::One)
    }

    fn timeout(&self) -> Duration {
        self.lock().timeout
    }

    fn set_baud_rate(&mut self, baud_rate: u32) -> serialport::Result<()> {
        self.lock().baud = baud_rate;
        Ok(())
    }

    fn set_data_bits(&mut self, _data_bits: DataBits) -> serialport::Result<()> {
        Ok(())
    }

    fn set_flow_control(&mut self, _flow_control: FlowControl) -> serialport::Result<()> {
        Ok(())
    }

    fn set_parity(&mut self, _parity: Parity) -> serialport::Result<()> {
        Ok(())
    }

    fn set_stop_bits(&mut self, _stop_bits: StopBits) -> serialport::Result<()> {
        Ok(())
    }

    fn set_timeout(&mut self, timeout: Duration) -> serialport::Result<()> {
        self.lock().timeout = timeout;
        Ok(())
    }

    fn write_request_to_send(&mut self, _level: bool) -> serialport::Result<()> {
        Ok(())
    }

    fn write_data_terminal_ready(&mut self, _level: bool) -> serialport::Result<()> {
        Ok(())
    }

    fn read_clear_to_send(&mut self) -> serialport::Result<bool> {
        Ok(false)
    }

    fn read_data_set_ready(&mut self) -> serialport::Result<bool> {
        Ok(false)
    }

    fn read_ring_indicator(&mut self) -> serialport::Result<bool> {
        Ok(false)
    }

    fn read_carrier_detect(&mut self) -> serialport::Result<bool> {
        Ok(false)
    }

    fn bytes_to_read(&self) -> serialport::Result<u32> {
        Ok(self.lock().tx.len() as u32)
    }

    fn bytes_to_write(&self) -> serialport::Result<u32> {
        Ok(0)
    }

    fn clear(&self, buffer_to_clear: ClearBuffer) -> serialport::Result<()> {
        match buffer_to_clear {
            ClearBuffer::Output => {}
            ClearBuffer::Input | ClearBuffer::All => self.lock().tx.clear(),
        }
        Ok(())
    }

    fn try_clone(&self) -> serialport::Result<Box<dyn SerialPort>> {
        Ok(Box::new(self.clone()))
    }

    fn set_break(&self) -> serialport::Result<()> {
        Ok(())
    }

    fn clear_break(&self) -> serialport::Result<()> {
        Ok(())
    }
}
