//! Device descriptor decoding
//!
//! The host uploads a device descriptor blob before a session; its shape
//! depends on the selected architecture. The UPDI shape splits the program
//! base and flash page size across a 16 bit field and an extension octet,
//! merged here into full width values.
//!
// Copyright (C) 2026 Stephan <kiffie@mailbox.org>
// SPDX-License-Identifier: GPL-2.0-or-later

use byteorder::{ByteOrder, LittleEndian as LE};

/// Descriptor of a UPDI target.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct UpdiDescriptor {
    /// Flash base in the UPDI address space, extension octet included.
    pub prog_base: u32,
    /// Flash page size in bytes, extension octet included.
    pub flash_page_size: u16,
    pub eeprom_page_size: u8,
    pub nvm_base_addr: u16,
    pub ocd_base_addr: u16,
    pub flash_bytes: u32,
    pub eeprom_bytes: u16,
    pub user_sig_bytes: u16,
    pub fuses_bytes: u8,
    pub eeprom_base: u16,
    pub user_sig_base: u16,
    pub signature_base: u16,
    pub fuses_base: u16,
    pub lockbits_base: u16,
    pub device_id: u16,
    /// 0 = 16 bit addressing, 1 = 24 bit addressing.
    pub address_mode: u8,
    pub hvupdi_variant: u8,
}

impl UpdiDescriptor {
    pub const SIZE: usize = 48;

    pub fn decode(raw: &[u8]) -> UpdiDescriptor {
        UpdiDescriptor {
            prog_base: LE::read_u16(&raw[0..]) as u32 | (raw[44] as u32) << 16,
            flash_page_size: raw[2] as u16 | (raw[45] as u16) << 8,
            eeprom_page_size: raw[3],
            nvm_base_addr: LE::read_u16(&raw[4..]),
            ocd_base_addr: LE::read_u16(&raw[6..]),
            flash_bytes: LE::read_u32(&raw[18..]),
            eeprom_bytes: LE::read_u16(&raw[22..]),
            user_sig_bytes: LE::read_u16(&raw[24..]),
            fuses_bytes: raw[26],
            eeprom_base: LE::read_u16(&raw[32..]),
            user_sig_base: LE::read_u16(&raw[34..]),
            signature_base: LE::read_u16(&raw[36..]),
            fuses_base: LE::read_u16(&raw[38..]),
            lockbits_base: LE::read_u16(&raw[40..]),
            device_id: LE::read_u16(&raw[42..]),
            address_mode: raw[46],
            hvupdi_variant: raw[47],
        }
    }
}

/// Descriptor of an XMEGA (PDI) target. Kept decoded for the PDI scope
/// even while that scope only reports failure.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct XmegaDescriptor {
    pub nvm_app_offset: u32,
    pub nvm_boot_offset: u32,
    pub nvm_eeprom_offset: u32,
    pub nvm_fuse_offset: u32,
    pub nvm_lock_offset: u32,
    pub nvm_user_sig_offset: u32,
    pub nvm_prod_sig_offset: u32,
    pub nvm_data_offset: u32,
    pub app_size: u32,
    pub boot_size: u16,
    pub flash_page_size: u16,
    pub eeprom_size: u16,
    pub eeprom_page_size: u8,
    pub nvm_base_addr: u16,
    pub mcu_base_addr: u16,
}

impl XmegaDescriptor {
    pub const SIZE: usize = 47;

    pub fn decode(raw: &[u8]) -> XmegaDescriptor {
        XmegaDescriptor {
            nvm_app_offset: LE::read_u32(&raw[0..]),
            nvm_boot_offset: LE::read_u32(&raw[4..]),
            nvm_eeprom_offset: LE::read_u32(&raw[8..]),
            nvm_fuse_offset: LE::read_u32(&raw[12..]),
            nvm_lock_offset: LE::read_u32(&raw[16..]),
            nvm_user_sig_offset: LE::read_u32(&raw[20..]),
            nvm_prod_sig_offset: LE::read_u32(&raw[24..]),
            nvm_data_offset: LE::read_u32(&raw[28..]),
            app_size: LE::read_u32(&raw[32..]),
            boot_size: LE::read_u16(&raw[36..]),
            flash_page_size: LE::read_u16(&raw[38..]),
            eeprom_size: LE::read_u16(&raw[40..]),
            eeprom_page_size: raw[42],
            nvm_base_addr: LE::read_u16(&raw[43..]),
            mcu_base_addr: LE::read_u16(&raw[45..]),
        }
    }
}

/// Descriptor of a classic megaAVR target. No ISP driver is attached to
/// it, but hosts upload it for any architecture they were configured with.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MegaDescriptor {
    pub flash_page_size: u16,
    pub flash_size: u32,
    /// Maximal bootloader start, in 16 bit words.
    pub boot_address: u32,
    pub sram_offset: u16,
    pub eeprom_size: u16,
    pub eeprom_page_size: u8,
    pub ocd_revision: u8,
}

impl MegaDescriptor {
    pub const SIZE: usize = 31;

    pub fn decode(raw: &[u8]) -> MegaDescriptor {
        MegaDescriptor {
            flash_page_size: LE::read_u16(&raw[0..]),
            flash_size: LE::read_u32(&raw[2..]),
            boot_address: LE::read_u32(&raw[10..]),
            sram_offset: LE::read_u16(&raw[14..]),
            eeprom_size: LE::read_u16(&raw[16..]),
            eeprom_page_size: raw[18],
            ocd_revision: raw[19],
        }
    }
}

/// Uploaded descriptor, decoded according to the session architecture.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Descriptor {
    #[default]
    None,
    Updi(UpdiDescriptor),
    Xmega(XmegaDescriptor),
    Mega(MegaDescriptor),
}

impl Descriptor {
    pub fn updi(&self) -> Option<&UpdiDescriptor> {
        match self {
            Descriptor::Updi(d) => Some(d),
            _ => None,
        }
    }
}
