//! Protocol error type
//!
// Copyright (C) 2026 Stephan <kiffie@mailbox.org>
// SPDX-License-Identifier: GPL-2.0-or-later

/// Errors of the programming wire and the protocol drivers.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Error {
    /// A deadline expired while waiting for the target.
    Timeout,
    /// The loopback echo of a transmitted frame did not match.
    Echo,
    /// The target did not acknowledge a store or pointer operation.
    Nack,
    /// Parity or framing error on a received frame.
    Parity,
    /// The operation failed (bad argument, wrong state, NVM error).
    Fault,
}

pub type Result<T> = core::result::Result<T, Error>;
