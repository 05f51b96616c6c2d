//! A library and application for flashing STM32 devices over the USART
//! system bootloader
//!
//! Every STM32 ships with a ROM bootloader (AN2606) that, when the device
//! is booted with BOOT0 asserted, speaks a simple acknowledged protocol
//! over USART (AN3155). [stmflash] drives that protocol from the host
//! side: it synchronizes the baud rate, identifies the chip, erases the
//! pages an image touches, programs the image in 256-byte transfers, reads
//! it back for verification, and jumps into the application.
//!
//! ## As an application
//!
//! ```bash
//! $ cargo install stmflash
//! $ stmflash flash --port /dev/ttyUSB0 app.bin
//! ```
//!
//! ## As a library
//!
//! ```toml
//! stmflash = { version = "0.3", default-features = false, features = ["serialport"] }
//! ```
//!
//! We add `default-features` here to disable the `cli` feature, which is
//! enabled by default. It's important to note that the cli module does not
//! provide SemVer guarantees. Disabling `serialport` as well leaves only
//! the frame codec, the image model, and the chip registry, which is
//! enough to build wire traces without a transport.
//!
//! [stmflash]: https://crates.io/crates/stmflash

#![cfg_attr(docsrs, feature(doc_cfg))]

#[cfg(feature = "cli")]
#[cfg_attr(docsrs, doc(cfg(feature = "cli")))]
pub mod cli;
pub mod command;
#[cfg(feature = "serialport")]
#[cfg_attr(docsrs, doc(cfg(feature = "serialport")))]
pub mod connection;
pub mod error;
#[cfg(feature = "serialport")]
#[cfg_attr(docsrs, doc(cfg(feature = "serialport")))]
pub mod flasher;
pub mod image;
#[cfg(feature = "serialport")]
#[cfg_attr(docsrs, doc(cfg(feature = "serialport")))]
pub mod interface;
pub mod progress;
pub mod target;

pub use self::error::Error;

/// Logging utilities
#[cfg(feature = "cli")]
#[cfg_attr(docsrs, doc(cfg(feature = "cli")))]
pub mod logging {
    use env_logger::Env;
    use log::LevelFilter;

    /// Initialize the logger with the given [LevelFilter]
    pub fn initialize_logger(filter: LevelFilter) {
        env_logger::Builder::from_env(Env::default().default_filter_or(filter.as_str()))
            .format_target(false)
            .init();
    }
}
