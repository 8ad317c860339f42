//! Ring buffer logger with a USB bulk IN drain
// Copyright (C) 2026 Stephan <kiffie@mailbox.org>
// SPDX-License-Identifier: GPL-2.0-or-later

#![no_std]

pub mod log_buffer;
pub mod usb_log_channel;
