//! USB identity from a reserved flash page
//!
//! The last 4 KiB page below 1 MiB is reserved for the board identity:
//! VID and PID little endian at offset 0, the serial number as ASCII from
//! offset 4, padded with `0xFF`. An erased page leaves the built-in
//! defaults in place.
//!
// Copyright (C) 2026 Stephan <kiffie@mailbox.org>
// SPDX-License-Identifier: GPL-2.0-or-later

use byteorder::{ByteOrder, LittleEndian as LE};
use heapless::String;
use log::info;

const XIP_BASE: u32 = 0x1000_0000;
const IDENTITY_FLASH_OFFSET: u32 = 0x000f_f000;

const DEFAULT_VID: u16 = 0x04d8;
const DEFAULT_PID: u16 = 0x0b15;

const SERIAL_LEN: usize = 16;

pub struct Identity {
    pub vid: u16,
    pub pid: u16,
    pub serial: String<SERIAL_LEN>,
}

impl Identity {
    /// Read the identity page. Safe as long as the page is mapped, which
    /// XIP guarantees for any supported flash size.
    pub fn from_flash() -> Identity {
        let page = unsafe {
            core::slice::from_raw_parts((XIP_BASE + IDENTITY_FLASH_OFFSET) as *const u8, 4 + SERIAL_LEN)
        };
        Identity::from_bytes(page)
    }

    fn from_bytes(page: &[u8]) -> Identity {
        let vid = match LE::read_u16(&page[0..]) {
            0xffff => DEFAULT_VID,
            vid => vid,
        };
        let pid = match LE::read_u16(&page[2..]) {
            0xffff => DEFAULT_PID,
            pid => pid,
        };
        let mut serial = String::new();
        for &b in &page[4..4 + SERIAL_LEN] {
            if !(b' '..=b'~').contains(&b) {
                break;
            }
            if serial.push(b as char).is_err() {
                break;
            }
        }
        if serial.is_empty() {
            // erased page; synthesize a stable serial from the defaults
            for b in [b'A', b'P', b'0', b'0', b'0', b'0'] {
                serial.push(b as char).ok();
            }
        }
        info!("USB identity {:04x}:{:04x} serial {}", vid, pid, serial);
        Identity { vid, pid, serial }
    }
}
