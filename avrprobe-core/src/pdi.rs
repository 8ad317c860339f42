//! PDI (XMEGA) scope, unimplemented
//!
//! PDI shares the access layer command set and the 12 bit frames with UPDI
//! and is clocked externally like TPI, so the wire layer is ready for it.
//! The driver itself is not written yet; the scope reports failure so
//! hosts give up cleanly on XMEGA sessions.
//!
// Copyright (C) 2026 Stephan <kiffie@mailbox.org>
// SPDX-License-Identifier: GPL-2.0-or-later

use crate::packet::{rsp, Request, Response};

pub fn scope(_req: &Request, rsp: &mut Response) -> usize {
    rsp.set_status(rsp::FAILED);
    0
}
