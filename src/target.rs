//! Supported target devices
//!
//! The bootloader's GET-ID command reports a 12-bit product id (AN2606
//! calls it the chip id). The table below maps ids to a family label and,
//! where the whole family shares one layout, the flash geometry the erase
//! and write engines need. Families whose parts differ in flash size are
//! listed with zero geometry: they can be identified, but not flashed.

use crate::error::ChipDetectError;

/// Identity and flash geometry of one product line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChipProfile {
    /// 12-bit product id reported by GET-ID
    pub product_id: u16,
    /// Marketing name of the product line
    pub family: &'static str,
    /// Usable flash in bytes, zero when unknown
    pub flash_size: u32,
    /// Smallest erasable unit in bytes, zero when unknown
    pub page_size: u32,
}

const CHIPS: &[ChipProfile] = &[
    ChipProfile {
        product_id: 0x410,
        family: "STM32F1 medium-density",
        flash_size: 128 * 1024,
        page_size: 1024,
    },
    ChipProfile {
        product_id: 0x414,
        family: "STM32F1 high-density",
        flash_size: 256 * 1024,
        page_size: 2048,
    },
    ChipProfile {
        product_id: 0x422,
        family: "STM32F3 30x/31x",
        flash_size: 256 * 1024,
        page_size: 2048,
    },
    // Recognized families whose parts differ in flash layout.
    ChipProfile {
        product_id: 0x412,
        family: "STM32F1 low-density",
        flash_size: 0,
        page_size: 0,
    },
    ChipProfile {
        product_id: 0x418,
        family: "STM32F1 connectivity line",
        flash_size: 0,
        page_size: 0,
    },
    ChipProfile {
        product_id: 0x420,
        family: "STM32F1 medium-density value line",
        flash_size: 0,
        page_size: 0,
    },
    ChipProfile {
        product_id: 0x428,
        family: "STM32F1 high-density value line",
        flash_size: 0,
        page_size: 0,
    },
    ChipProfile {
        product_id: 0x430,
        family: "STM32F1 XL-density",
        flash_size: 0,
        page_size: 0,
    },
    ChipProfile {
        product_id: 0x416,
        family: "STM32L1 medium-density",
        flash_size: 0,
        page_size: 0,
    },
    ChipProfile {
        product_id: 0x436,
        family: "STM32L1 high-density",
        flash_size: 0,
        page_size: 0,
    },
    ChipProfile {
        product_id: 0x427,
        family: "STM32L1 medium-plus density",
        flash_size: 0,
        page_size: 0,
    },
    ChipProfile {
        product_id: 0x411,
        family: "STM32F2",
        flash_size: 0,
        page_size: 0,
    },
    ChipProfile {
        product_id: 0x440,
        family: "STM32F051",
        flash_size: 0,
        page_size: 0,
    },
    ChipProfile {
        product_id: 0x444,
        family: "STM32F030",
        flash_size: 0,
        page_size: 0,
    },
    ChipProfile {
        product_id: 0x413,
        family: "STM32F405/407",
        flash_size: 0,
        page_size: 0,
    },
    ChipProfile {
        product_id: 0x419,
        family: "STM32F42x/43x",
        flash_size: 0,
        page_size: 0,
    },
    ChipProfile {
        product_id: 0x432,
        family: "STM32F373/378",
        flash_size: 0,
        page_size: 0,
    },
];

impl ChipProfile {
    /// Resolve a product id reported by the bootloader.
    pub fn lookup(product_id: u16) -> Result<&'static ChipProfile, ChipDetectError> {
        CHIPS
            .iter()
            .find(|chip| chip.product_id == product_id)
            .ok_or_else(|| ChipDetectError::from(product_id))
    }

    /// Whether the flash layout is known well enough to erase and write.
    pub fn has_geometry(&self) -> bool {
        self.flash_size != 0 && self.page_size != 0
    }
}
