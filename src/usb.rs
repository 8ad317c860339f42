//! Vendor interface carrying CMSIS-DAP reports
//!
//! One bulk pair, fixed 64 octet reports in both directions. The interface
//! string lets a host tool find the interface without a HID descriptor.
//!
// Copyright (C) 2026 Stephan <kiffie@mailbox.org>
// SPDX-License-Identifier: GPL-2.0-or-later

use usb_device::{class_prelude::*, Result};

pub const REPORT_SIZE: usize = 64;

/// USB class for the EDBG report transport.
pub struct EdbgClass<'a, B: UsbBus> {
    iface: InterfaceNumber,
    iface_string: StringIndex,
    ep_in: EndpointIn<'a, B>,
    ep_out: EndpointOut<'a, B>,
    report: [u8; REPORT_SIZE],
    report_ready: bool,
}

impl<'a, B: UsbBus> EdbgClass<'a, B> {
    pub fn new(alloc: &'a UsbBusAllocator<B>) -> EdbgClass<'a, B> {
        let iface = alloc.interface();
        let iface_string = alloc.string();
        let ep_in = alloc.bulk(REPORT_SIZE as u16);
        let ep_out = alloc.bulk(REPORT_SIZE as u16);
        EdbgClass {
            iface,
            iface_string,
            ep_in,
            ep_out,
            report: [0; REPORT_SIZE],
            report_ready: false,
        }
    }

    /// Take the last received report. Short packets are zero padded; the
    /// report framing carries its own length.
    pub fn receive(&mut self) -> Option<&[u8; REPORT_SIZE]> {
        if self.report_ready {
            self.report_ready = false;
            Some(&self.report)
        } else {
            None
        }
    }

    pub fn transmit(&mut self, report: &[u8; REPORT_SIZE]) -> Result<usize> {
        self.ep_in.write(report)
    }
}

impl<B: UsbBus> UsbClass<B> for EdbgClass<'_, B> {
    fn get_configuration_descriptors(
        &self,
        writer: &mut DescriptorWriter,
    ) -> usb_device::Result<()> {
        writer.interface_alt(self.iface, 0, 0xff, 0, 0, Some(self.iface_string))?;
        writer.endpoint(&self.ep_in)?;
        writer.endpoint(&self.ep_out)
    }

    fn get_string(&self, index: StringIndex, _lang_id: u16) -> Option<&str> {
        if index == self.iface_string {
            Some("avrprobe-edbg")
        } else {
            None
        }
    }

    fn endpoint_out(&mut self, addr: EndpointAddress) {
        if addr != self.ep_out.address() {
            return;
        }
        // an unread report is overwritten; the host waits for the reply
        // before sending the next one
        self.report = [0; REPORT_SIZE];
        let len = self.ep_out.read(&mut self.report).unwrap_or(0);
        self.report_ready = len > 0;
    }
}
