//! Programming session state
//!
//! One session context is threaded through the dispatcher and the protocol
//! drivers: the parameters the host configured, the connection flags, the
//! captured system information block and the selected NVM variant.
//!
// Copyright (C) 2026 Stephan <kiffie@mailbox.org>
// SPDX-License-Identifier: GPL-2.0-or-later

use crate::device::Descriptor;
use crate::nvm::Variant;
use crate::packet::avr_param;

/// Default UPDI programming clock in kHz.
pub const UPDI_CLK_KHZ: u16 = 225;

/// Default PDI programming clock in kHz.
pub const PDI_CLK_KHZ: u16 = 2500;

/// TPI programming clock in kHz.
pub const TPI_CLK_KHZ: u16 = 250;

/// Lowest accepted programming clock.
pub const XCLK_FLOOR_KHZ: u16 = 40;

/// Clock reduction per connect retry.
pub const XCLK_STEP_KHZ: u16 = 25;

pub struct Session {
    /// Architecture selected by the host (5 = UPDI, 3 = XMEGA/PDI).
    pub arch: u8,
    /// Physical connection selected by the host (8 = UPDI).
    pub conn: u8,
    pub purpose: u8,
    /// Programming clock in kHz; lowered on connect retries.
    pub xclk: u16,
    /// Clock as configured, restored on the next architecture select.
    pub xclk_base: u16,
    pub vtarget_mv: u16,
    pub power_on: bool,
    pub hv_enable: bool,
    pub erase_to_enter: bool,

    /// Wire session established (key handshake or TPI enable done).
    pub wire_active: bool,
    /// NVM programming mode entered.
    pub prog_mode: bool,
    /// Chip erase performed in this session.
    pub chip_erased: bool,
    /// Last connect attempt failed.
    pub failed: bool,
    /// High voltage pulse circuit engaged.
    pub hv_active: bool,

    pub descriptor: Descriptor,
    pub sib: [u8; 32],
    pub sib_valid: bool,
    pub nvm: Variant,
    /// TPI write granularity in bytes, from the device signature.
    pub tpi_chunk: u8,

    before_page: u32,
}

impl Session {
    pub fn new() -> Session {
        Session {
            arch: 0,
            conn: 0,
            purpose: 0,
            xclk: UPDI_CLK_KHZ,
            xclk_base: UPDI_CLK_KHZ,
            vtarget_mv: 0,
            power_on: true,
            hv_enable: false,
            erase_to_enter: false,
            wire_active: false,
            prog_mode: false,
            chip_erased: false,
            failed: false,
            hv_active: false,
            descriptor: Descriptor::None,
            sib: [0; 32],
            sib_valid: false,
            nvm: Variant::V1,
            tpi_chunk: 2,
            before_page: u32::MAX,
        }
    }

    /// General scope sign-on: forget everything from the previous session.
    pub fn sign_on_reset(&mut self) {
        self.clear_flags();
        self.arch = 0;
        self.hv_enable = false;
        self.erase_to_enter = false;
        self.power_on = true;
    }

    pub fn clear_flags(&mut self) {
        self.wire_active = false;
        self.prog_mode = false;
        self.chip_erased = false;
        self.failed = false;
        self.hv_active = false;
    }

    /// State at the start of a connect attempt: failed until proven
    /// otherwise, nothing carried over.
    pub fn begin_connect(&mut self) {
        self.clear_flags();
        self.failed = true;
        self.sib = [0; 32];
        self.sib_valid = false;
        self.nvm = Variant::V1;
        self.before_page = u32::MAX;
    }

    pub fn select_arch(&mut self, arch: u8) {
        self.arch = arch;
        self.xclk = if arch == avr_param::ARCH_UPDI {
            UPDI_CLK_KHZ
        } else {
            PDI_CLK_KHZ
        };
        self.xclk_base = self.xclk;
    }

    pub fn set_xclk(&mut self, khz: u16) {
        self.xclk = khz.max(XCLK_FLOOR_KHZ);
        self.xclk_base = self.xclk;
    }

    /// Lower the clock for a connect retry. False once the floor is hit.
    pub fn step_down_clock(&mut self) -> bool {
        if self.xclk <= XCLK_FLOOR_KHZ {
            return false;
        }
        self.xclk = self.xclk.saturating_sub(XCLK_STEP_KHZ).max(XCLK_FLOOR_KHZ);
        true
    }

    /// True when `addr` falls on a different flash page than the previous
    /// call. The first call after a connect is always a page change.
    pub fn is_boundary_flash_page(&mut self, addr: u32) -> bool {
        let page = match self.descriptor.updi() {
            Some(d) if d.flash_page_size > 0 => d.flash_page_size as u32,
            _ => 1,
        };
        let after = addr & !(page - 1);
        let changed = self.before_page != after;
        self.before_page = after;
        changed
    }
}

impl Default for Session {
    fn default() -> Session {
        Session::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::UpdiDescriptor;

    #[test]
    fn arch_select_sets_the_clock() {
        let mut s = Session::new();
        s.select_arch(avr_param::ARCH_UPDI);
        assert_eq!(s.xclk, UPDI_CLK_KHZ);
        s.select_arch(avr_param::ARCH_XMEGA);
        assert_eq!(s.xclk, PDI_CLK_KHZ);
    }

    #[test]
    fn clock_steps_down_to_the_floor() {
        let mut s = Session::new();
        s.set_xclk(80);
        assert!(s.step_down_clock());
        assert_eq!(s.xclk, 55);
        assert!(s.step_down_clock());
        assert_eq!(s.xclk, XCLK_FLOOR_KHZ);
        assert!(!s.step_down_clock());
        assert_eq!(s.xclk, XCLK_FLOOR_KHZ);
    }

    #[test]
    fn xclk_is_clamped_to_the_floor() {
        let mut s = Session::new();
        s.set_xclk(10);
        assert_eq!(s.xclk, XCLK_FLOOR_KHZ);
    }

    #[test]
    fn flash_page_boundary_tracking() {
        let mut s = Session::new();
        let mut d = UpdiDescriptor::default();
        d.flash_page_size = 128;
        s.descriptor = Descriptor::Updi(d);
        s.begin_connect();
        assert!(s.is_boundary_flash_page(0x8000));
        assert!(!s.is_boundary_flash_page(0x8040));
        assert!(!s.is_boundary_flash_page(0x807f));
        assert!(s.is_boundary_flash_page(0x8080));
        assert!(!s.is_boundary_flash_page(0x80ff));
        s.begin_connect();
        assert!(s.is_boundary_flash_page(0x80ff));
    }
}
