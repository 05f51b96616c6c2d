use std::{fs, path::PathBuf};

use clap::{Args, Parser, Subcommand};
use log::{info, LevelFilter};
use miette::{IntoDiagnostic, Result, WrapErr};
use stmflash::{
    cli::{board_info, connect, list_ports, ConnectArgs, StmflashProgress},
    flasher::{self, FlashOptions},
    image::FirmwareImage,
    logging::initialize_logger,
};

#[derive(Debug, Parser)]
#[command(about, max_term_width = 100, propagate_version = true, version)]
struct Cli {
    #[command(subcommand)]
    subcommand: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Print information about a connected target device
    ///
    /// Synchronizes with the system bootloader and prints the chip family,
    /// bootloader version, flash geometry, and the advertised commands.
    BoardInfo(ConnectArgs),
    /// Erase flash entirely
    EraseFlash(EraseFlashArgs),
    /// Flash a binary application image to a connected target device
    ///
    /// The image is written as-is at the given flash address (the start of
    /// flash by default), read back for verification, and then started.
    Flash(FlashArgs),
    /// List the available serial ports
    ListPorts,
}

/// Erase the whole flash of a connected target device
#[derive(Debug, Args)]
struct EraseFlashArgs {
    /// Connection configuration
    #[clap(flatten)]
    connect_args: ConnectArgs,
}

/// Flash an application to a target device
#[derive(Debug, Args)]
struct FlashArgs {
    /// Connection configuration
    #[clap(flatten)]
    connect_args: ConnectArgs,
    /// Path to a binary (.bin) application image
    #[arg(value_name = "FILE")]
    image: PathBuf,
    /// Flash address to program the image at
    #[arg(long, value_name = "ADDRESS", value_parser = parse_u32, default_value = "0x08000000")]
    address: u32,
    /// Erase all of flash instead of only the pages the image touches
    #[arg(long)]
    erase_chip: bool,
}

fn main() -> Result<()> {
    miette::set_panic_hook();
    initialize_logger(LevelFilter::Info);

    let cli = Cli::parse();

    match cli.subcommand {
        Commands::BoardInfo(args) => board_info(&args),
        Commands::EraseFlash(args) => erase_flash(args),
        Commands::Flash(args) => flash(args),
        Commands::ListPorts => list_ports(),
    }
}

fn erase_flash(args: EraseFlashArgs) -> Result<()> {
    let mut flasher = connect(&args.connect_args)?;
    flasher.erase_flash()?;

    info!("Flash has been erased!");

    Ok(())
}

fn flash(args: FlashArgs) -> Result<()> {
    let data = fs::read(&args.image)
        .into_diagnostic()
        .wrap_err_with(|| format!("Failed to open image {}", args.image.display()))?;

    let image = FirmwareImage::from_binary(args.address, data)?;

    let options = FlashOptions {
        erase_chip: args.erase_chip,
        baud: args.connect_args.baud,
    };

    let mut progress = StmflashProgress::default();
    flasher::flash(
        &args.connect_args.port,
        &image,
        &options,
        Some(&mut progress),
    )?;

    info!("Flashing has completed!");

    Ok(())
}

fn parse_u32(value: &str) -> Result<u32, String> {
    let (digits, radix) = match value.strip_prefix("0x").or_else(|| value.strip_prefix("0X")) {
        Some(hex) => (hex, 16),
        None => (value, 10),
    };

    u32::from_str_radix(digits, radix).map_err(|e| e.to_string())
}
