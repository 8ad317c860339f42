//! AvrProbe protocol core
//!
//! Everything between the USB report endpoints and the programming wire:
//! EDBG report fragmentation, the CMSIS-DAP command subset, the JTAGICE3
//! scope dispatcher, and the UPDI/TPI protocol drivers with their NVM
//! controller variants. Hardware is reached only through the traits in
//! [`link`], so the whole stack can be exercised on the host.
//!
// Copyright (C) 2026 Stephan <kiffie@mailbox.org>
// SPDX-License-Identifier: GPL-2.0-or-later

#![cfg_attr(not(test), no_std)]

pub mod dap;
pub mod device;
pub mod dispatch;
pub mod frag;
pub mod link;
pub mod nvm;
pub mod packet;
pub mod pdi;
pub mod session;
pub mod timeout;
pub mod tpi;
pub mod updi;

mod error;
pub use error::{Error, Result};

#[cfg(test)]
pub(crate) mod testutil;
