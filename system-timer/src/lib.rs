//! Target independent system timer
// Copyright (C) 2026 Stephan <kiffie@mailbox.org>
// SPDX-License-Identifier: GPL-2.0-or-later

#![no_std]

#[cfg(not(feature = "device-selected"))]
compile_error!("This crate requires one device feature to be enabled");

#[cfg(feature = "rp2040")]
mod impl_rp2040;

#[cfg(feature = "rp2040")]
pub use impl_rp2040::{Instant, SystemTimer};

pub use core::time::Duration;

#[derive(Debug)]
pub enum Error {
    InstantTooEarly,
    InstantTooLate,
}
