//! CMSIS-DAP command layer
//!
//! The probe enumerates as a CMSIS-DAP style vendor interface. Only the
//! house keeping commands a host uses to identify the probe are served;
//! everything else travels in the two vendor commands that carry EDBG
//! packet fragments.
//!
// Copyright (C) 2026 Stephan <kiffie@mailbox.org>
// SPDX-License-Identifier: GPL-2.0-or-later

use crate::frag::{Defrag, DefragStatus, Refrag};
use log::debug;

pub const CMD_INFO: u8 = 0x00;
pub const CMD_HOST_STATUS: u8 = 0x01;
pub const CMD_CONNECT: u8 = 0x02;
pub const CMD_DISCONNECT: u8 = 0x03;
/// Vendor command: EDBG packet fragment towards the probe.
pub const CMD_AVR_CMD: u8 = 0x80;
/// Vendor command: poll one response fragment.
pub const CMD_AVR_RSP: u8 = 0x81;

const INFO_TEST_DOMAIN_TIMER: u8 = 0xf1;
const INFO_UART_RX_SIZE: u8 = 0xfb;
const INFO_UART_TX_SIZE: u8 = 0xfc;
const INFO_PACKET_SIZE: u8 = 0xff;

const EDBG_RSP_OK: u8 = 0x01;
const EDBG_RSP_FAIL: u8 = 0x00;

/// Report handling around the fragment engines.
pub struct Dap {
    defrag: Defrag,
    refrag: Refrag,
}

impl Dap {
    pub fn new() -> Dap {
        Dap {
            defrag: Defrag::new(),
            refrag: Refrag::new(),
        }
    }

    /// Handle one 64 octet report. `request` receives reassembled command
    /// packets, `response` is the framed packet served to response polls.
    /// Returns the completed command packet length when one is ready for
    /// dispatch.
    pub fn handle_report(
        &mut self,
        report: &[u8; 64],
        reply: &mut [u8; 64],
        request: &mut [u8],
        response: &[u8],
    ) -> Option<usize> {
        *reply = [0u8; 64];
        reply[0] = report[0];
        match report[0] {
            CMD_INFO => self.info(report[1], reply),
            CMD_HOST_STATUS | CMD_CONNECT | CMD_DISCONNECT => {
                // nothing to control; acknowledge by echo
                *reply = *report;
            }
            CMD_AVR_CMD => match self.defrag.accept(report, request) {
                DefragStatus::Fail => reply[1] = EDBG_RSP_FAIL,
                DefragStatus::Partial => reply[1] = EDBG_RSP_OK,
                DefragStatus::Complete(len) => {
                    reply[1] = EDBG_RSP_OK;
                    return Some(len);
                }
            },
            CMD_AVR_RSP => self.refrag.next(response, reply),
            unknown => {
                debug!("unsupported DAP command {:#04x}", unknown);
                reply[1] = 0;
            }
        }
        None
    }

    /// Arm the response poll path after a packet was dispatched.
    pub fn response_ready(&mut self, size: usize) {
        self.refrag.begin(size);
    }

    fn info(&self, id: u8, reply: &mut [u8; 64]) {
        match id {
            INFO_PACKET_SIZE | INFO_UART_RX_SIZE | INFO_UART_TX_SIZE => {
                reply[1] = 2;
                reply[2] = 0x40;
                reply[3] = 0x00;
            }
            INFO_TEST_DOMAIN_TIMER => {
                reply[1] = 2;
                reply[2] = 0x80;
                reply[3] = 0x01;
            }
            _ => reply[1] = 0,
        }
    }
}

impl Default for Dap {
    fn default() -> Dap {
        Dap::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::MAX_PACKET;

    #[test]
    fn info_reports_report_size() {
        let mut dap = Dap::new();
        let mut request = [0u8; MAX_PACKET];
        let response = [0u8; MAX_PACKET];
        let mut report = [0u8; 64];
        let mut reply = [0u8; 64];
        report[0] = CMD_INFO;
        report[1] = 0xff;
        assert!(dap
            .handle_report(&report, &mut reply, &mut request, &response)
            .is_none());
        assert_eq!(&reply[..4], &[0x00, 2, 0x40, 0x00]);
        report[1] = 0x04; // unknown info id
        dap.handle_report(&report, &mut reply, &mut request, &response);
        assert_eq!(&reply[..2], &[0x00, 0]);
    }

    #[test]
    fn connect_is_echoed() {
        let mut dap = Dap::new();
        let mut request = [0u8; MAX_PACKET];
        let response = [0u8; MAX_PACKET];
        let mut report = [0u8; 64];
        report[0] = CMD_CONNECT;
        report[1] = 0x01;
        let mut reply = [0u8; 64];
        dap.handle_report(&report, &mut reply, &mut request, &response);
        assert_eq!(reply, report);
    }

    #[test]
    fn vendor_command_reassembles_and_polls() {
        let mut dap = Dap::new();
        let mut request = [0u8; MAX_PACKET];
        let mut response = [0u8; MAX_PACKET];
        let mut reply = [0u8; 64];

        let mut report = [0u8; 64];
        report[0] = CMD_AVR_CMD;
        report[1] = 0x11; // fragment 1 of 1
        report[3] = 8;
        report[4..12].copy_from_slice(&[0x0e, 0, 1, 0, 0x01, 0x10, 0, 0]);
        let done = dap.handle_report(&report, &mut reply, &mut request, &response);
        assert_eq!(done, Some(8));
        assert_eq!(&reply[..2], &[0x80, EDBG_RSP_OK]);
        assert_eq!(&request[..8], &report[4..12]);

        // dispatcher produced a 6 octet framed response
        response[..6].copy_from_slice(&[0x0e, 1, 0, 0x01, 0x80, 0]);
        dap.response_ready(0);
        report = [0u8; 64];
        report[0] = CMD_AVR_RSP;
        dap.handle_report(&report, &mut reply, &mut request, &response);
        assert_eq!(&reply[..4], &[0x81, 0x11, 0, 6]);
        assert_eq!(&reply[4..10], &response[..6]);

        // drained; the next poll is empty
        dap.handle_report(&report, &mut reply, &mut request, &response);
        assert_eq!(&reply[..4], &[0x81, 0, 0, 0]);
    }

    #[test]
    fn bad_fragment_header_fails_the_report() {
        let mut dap = Dap::new();
        let mut request = [0u8; MAX_PACKET];
        let response = [0u8; MAX_PACKET];
        let mut report = [0u8; 64];
        report[0] = CMD_AVR_CMD;
        report[1] = 0x1a; // 10 fragments would exceed the packet buffer
        let mut reply = [0u8; 64];
        dap.handle_report(&report, &mut reply, &mut request, &response);
        assert_eq!(&reply[..2], &[0x80, EDBG_RSP_FAIL]);
    }
}
