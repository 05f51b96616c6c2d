//! Types and functions for the command-line interface
//!
//! The contents of this module are intended for use with the [stmflash]
//! command-line application, and are likely not of much use otherwise.
//!
//! [stmflash]: https://crates.io/crates/stmflash

use clap::Args;
use indicatif::{ProgressBar, ProgressStyle};
use log::info;
use miette::{Result, WrapErr};
use serialport::SerialPortType;

use self::serial::detect_serial_ports;
use crate::{flasher::Flasher, interface::Interface, progress::ProgressCallbacks};

mod serial;

/// Establish a connection with a target device
#[derive(Debug, Args)]
pub struct ConnectArgs {
    /// Baud rate at which to communicate with target device
    #[arg(short = 'b', long, default_value_t = 115_200)]
    pub baud: u32,
    /// Serial port connected to target device
    #[arg(short = 'p', long)]
    pub port: String,
}

/// Select a serial port and establish a connection with a target device
pub fn connect(args: &ConnectArgs) -> Result<Flasher> {
    info!("Serial port: '{}'", args.port);
    info!("Connecting...");

    let interface = Interface::open(&args.port, args.baud)
        .wrap_err_with(|| format!("Failed to open serial port {}", args.port))?;

    Ok(Flasher::connect(interface)?)
}

/// Connect to a target device and print information about its chip
pub fn board_info(args: &ConnectArgs) -> Result<()> {
    let flasher = connect(args)?;
    let info = flasher.device_info();

    println!("Chip type:         {} ({:#05x})", info.family, info.product_id);
    println!(
        "Bootloader:        v{}.{}",
        info.bootloader_version >> 4,
        info.bootloader_version & 0xF
    );
    match info.flash_size {
        0 => println!("Flash size:        unknown"),
        size => println!("Flash size:        {} KB", size / 1024),
    }
    match info.page_size {
        0 => println!("Page size:         unknown"),
        size => println!("Page size:         {} B", size),
    }
    let commands = info
        .supported_commands
        .iter()
        .map(|opcode| format!("{:#04x}", opcode))
        .collect::<Vec<_>>()
        .join(", ");
    println!("Commands:          {}", commands);

    Ok(())
}

/// Print the serial ports that might have a target attached
pub fn list_ports() -> Result<()> {
    for port in detect_serial_ports()? {
        match port.port_type {
            SerialPortType::UsbPort(usb) => {
                println!("{} ({:04x}:{:04x})", port.port_name, usb.vid, usb.pid)
            }
            _ => println!("{}", port.port_name),
        }
    }

    Ok(())
}

/// Progress callback implementations for use in the CLI
#[derive(Default)]
pub struct StmflashProgress {
    pb: Option<ProgressBar>,
}

impl ProgressCallbacks for StmflashProgress {
    /// Create the progress bar
    fn begin(&mut self, total: usize) {
        let pb = ProgressBar::new(total as u64).with_style(
            ProgressStyle::default_bar()
                .template("[{elapsed_precise}] [{bar:40}] {pos:>7}/{len:7} @ {msg}")
                .unwrap()
                .progress_chars("=> "),
        );
        self.pb = Some(pb);
    }

    /// Update the progress bar with the chunk address just completed
    fn advance(&mut self, address: u32, current: usize) {
        if let Some(ref pb) = self.pb {
            pb.set_message(format!("{:#010x}", address));
            pb.set_position(current as u64);
        }
    }

    /// End the progress bar
    fn end(&mut self) {
        if let Some(ref pb) = self.pb {
            pb.finish();
        }
    }
}
