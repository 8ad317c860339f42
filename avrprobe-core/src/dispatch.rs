//! JTAGICE3 scope dispatcher
//!
//! Owns the packet buffers and the session, reassembles command packets
//! from EDBG reports and routes them by scope: probe housekeeping, the AVR
//! programming scope (branched further by architecture), the XPRG subset
//! of the TPI scope and the EDBG control scope.
//!
// Copyright (C) 2026 Stephan <kiffie@mailbox.org>
// SPDX-License-Identifier: GPL-2.0-or-later

use crate::dap::Dap;
use crate::device::{Descriptor, MegaDescriptor, UpdiDescriptor, XmegaDescriptor};
use crate::link::{Clock, ProgPort, ProgWire, WireMode};
use crate::packet::{avr_param, cmd, edbg_param, rsp, scope, Request, Response, MAX_PACKET};
use crate::pdi;
use crate::session::Session;
use crate::tpi::Tpi;
use crate::updi::Updi;
use byteorder::{ByteOrder, LittleEndian};
use log::debug;

/// PARM3_HW_VER, PARM3_FW_MAJOR, PARM3_FW_MINOR, PARM3_FW_REL[2].
const FW_VERSION: [u8; 5] = [0, 1, 32, 44, 0];

/// Physical parameter block served to PowerDebugger style queries.
const PHYSICAL: [u8; 8] = [0x90, 0x28, 0x00, 0x18, 0x38, 0x00, 0x00, 0x00];

pub struct Dispatcher<W: ProgWire, P: ProgPort, C: Clock> {
    wire: W,
    port: P,
    clock: C,
    session: Session,
    dap: Dap,
    request: [u8; MAX_PACKET],
    request_len: usize,
    response: [u8; MAX_PACKET],
}

impl<W: ProgWire, P: ProgPort, C: Clock> Dispatcher<W, P, C> {
    pub fn new(wire: W, port: P, clock: C) -> Dispatcher<W, P, C> {
        Dispatcher {
            wire,
            port,
            clock,
            session: Session::new(),
            dap: Dap::new(),
            request: [0; MAX_PACKET],
            request_len: 0,
            response: [0; MAX_PACKET],
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Handle one 64 octet report from the vendor interface; `reply` is
    /// always filled with the report to send back. Completed command
    /// packets are dispatched before returning.
    pub fn handle_report(&mut self, report: &[u8; 64], reply: &mut [u8; 64]) {
        let done = self
            .dap
            .handle_report(report, reply, &mut self.request, &self.response);
        if let Some(len) = done {
            self.request_len = len;
            let size = self.dispatch();
            self.dap.response_ready(size);
        }
    }

    fn dispatch(&mut self) -> usize {
        let req = Request::new(&self.request, self.request_len);
        let mut rsp = Response::new(&mut self.response);
        debug!(
            "packet seq {} scope {:#04x} cmd {:#04x}",
            req.sequence(),
            req.scope(),
            req.cmd()
        );
        let size = match req.scope() {
            scope::GENERAL => general_scope(&mut self.port, &mut self.session, &req, &mut rsp),
            scope::AVR => avr_scope(
                &mut self.wire,
                &mut self.port,
                self.clock,
                &mut self.session,
                &req,
                &mut rsp,
            ),
            scope::AVR_TPI => {
                Tpi::new(&mut self.wire, &mut self.port, self.clock, &mut self.session)
                    .scope(&req, &mut rsp)
            }
            scope::EDBG => edbg_scope(&mut self.port, &mut self.session, &req, &mut rsp),
            unknown => {
                debug!("unknown scope {:#04x}", unknown);
                0
            }
        };
        rsp.finish(req.sequence(), req.scope(), size);
        size
    }

    /// Reset button or DTR edge outside a programming session. Parts
    /// whose reset pad is configured as UPDI only react to a reset
    /// request sent over the wire.
    pub fn target_reset(&mut self, assert: bool) {
        if self.session.wire_active {
            return;
        }
        if self.session.arch == avr_param::ARCH_UPDI {
            self.wire.set_mode(WireMode::Updi);
            self.wire.set_clock_khz(self.session.xclk);
            self.wire.send_break(true);
            let value = if assert { 0x59 } else { 0x00 };
            // STCS ASI_RESET_REQ
            for b in [0x55, 0xc8, value] {
                self.wire.write_byte(b);
            }
            self.wire.drain();
            self.wire.set_mode(WireMode::Off);
        }
        if assert {
            self.port.reset_assert();
        } else {
            self.port.reset_release();
        }
    }
}

fn general_scope<P: ProgPort>(
    port: &mut P,
    session: &mut Session,
    req: &Request,
    rsp: &mut Response,
) -> usize {
    match req.cmd() {
        cmd::GET_PARAM => {
            let p = req.param();
            let data = rsp.data_mut();
            let n = p.length as usize;
            if p.section == 0 {
                // version block, readable at any index offset
                for (k, b) in data[..n].iter_mut().enumerate() {
                    *b = FW_VERSION.get(p.index as usize + k).copied().unwrap_or(0);
                }
            } else if p.section == 1 {
                if p.index == 0 || p.index == 0x20 {
                    LittleEndian::write_u16(data, session.vtarget_mv);
                } else {
                    let start = (p.index & 7) as usize;
                    for (k, b) in data[..n].iter_mut().enumerate() {
                        *b = PHYSICAL.get(start + k).copied().unwrap_or(0);
                    }
                }
            }
            rsp.set_status(rsp::DATA);
            n + 1
        }
        cmd::SIGN_ON => {
            session.sign_on_reset();
            session.vtarget_mv = port.vdd_millivolts();
            debug!("sign on, vtarget {} mV", session.vtarget_mv);
            rsp.set_status(rsp::OK);
            0
        }
        cmd::SIGN_OFF => {
            rsp.set_status(rsp::OK);
            0
        }
        _ => {
            rsp.set_status(rsp::FAILED);
            0
        }
    }
}

fn avr_scope<W: ProgWire, P: ProgPort, C: Clock>(
    wire: &mut W,
    port: &mut P,
    clock: C,
    session: &mut Session,
    req: &Request,
    rsp: &mut Response,
) -> usize {
    match req.cmd() {
        cmd::SET_PARAM => {
            set_avr_param(session, req);
            rsp.set_status(rsp::OK);
            0
        }
        cmd::GET_PARAM => {
            let p = req.param();
            let data = rsp.data_mut();
            match (p.section, p.index) {
                (avr_param::SECTION_SESSION, avr_param::IDX_ARCH) => data[0] = session.arch,
                (avr_param::SECTION_PHYSICAL, avr_param::IDX_CONNECTION) => {
                    data[0] = session.conn
                }
                (avr_param::SECTION_PHYSICAL, avr_param::IDX_CLK_XMEGA_PDI) => {
                    LittleEndian::write_u16(data, session.xclk)
                }
                _ => {}
            }
            rsp.set_status(rsp::DATA);
            p.length as usize + 1
        }
        _ => match session.arch {
            avr_param::ARCH_UPDI => Updi::new(wire, port, clock, session).scope(req, rsp),
            avr_param::ARCH_XMEGA => pdi::scope(req, rsp),
            _ => {
                rsp.set_status(rsp::FAILED);
                0
            }
        },
    }
}

fn set_avr_param(session: &mut Session, req: &Request) {
    let p = req.param();
    let value = p.value as u8;
    match (p.section, p.index) {
        (avr_param::SECTION_SESSION, avr_param::IDX_ARCH) => {
            debug!("arch {:#04x}", value);
            session.select_arch(value);
        }
        (avr_param::SECTION_SESSION, avr_param::IDX_PURPOSE) => session.purpose = value,
        (avr_param::SECTION_PHYSICAL, avr_param::IDX_CONNECTION) => session.conn = value,
        (avr_param::SECTION_PHYSICAL, avr_param::IDX_CLK_XMEGA_PDI) => {
            session.set_xclk(p.value);
            debug!("xclk {} kHz", session.xclk);
        }
        (avr_param::SECTION_DEVICE, avr_param::IDX_DESCRIPTOR) => {
            let n = (p.length & 63) as usize;
            let raw = &p.data[..n.min(p.data.len())];
            session.descriptor = decode_descriptor(session.arch, raw);
        }
        (avr_param::SECTION_OPTIONS, avr_param::IDX_HV_UPDI_ENABLE) => {
            session.hv_enable = value != 0
        }
        (avr_param::SECTION_OPTIONS, avr_param::IDX_CHIP_ERASE_TO_ENTER) => {
            session.erase_to_enter = value != 0
        }
        (section, index) => debug!("param {:#04x}:{:#04x} ignored", section, index),
    }
}

fn decode_descriptor(arch: u8, raw: &[u8]) -> Descriptor {
    match arch {
        avr_param::ARCH_UPDI if raw.len() >= UpdiDescriptor::SIZE => {
            Descriptor::Updi(UpdiDescriptor::decode(raw))
        }
        avr_param::ARCH_XMEGA if raw.len() >= XmegaDescriptor::SIZE => {
            Descriptor::Xmega(XmegaDescriptor::decode(raw))
        }
        avr_param::ARCH_UPDI | avr_param::ARCH_XMEGA => Descriptor::None,
        _ if raw.len() >= MegaDescriptor::SIZE => Descriptor::Mega(MegaDescriptor::decode(raw)),
        _ => Descriptor::None,
    }
}

fn edbg_scope<P: ProgPort>(
    port: &mut P,
    session: &mut Session,
    req: &Request,
    rsp: &mut Response,
) -> usize {
    match req.cmd() {
        cmd::SET_PARAM => {
            let p = req.param();
            if p.section == edbg_param::SECTION_CONTROL && p.index == edbg_param::IDX_TARGET_POWER
            {
                session.power_on = p.value != 0;
                debug!("target power {}", session.power_on);
                port.power_switch(session.power_on);
            }
            rsp.set_status(rsp::OK);
            0
        }
        cmd::GET_PARAM => {
            let p = req.param();
            if p.section == edbg_param::SECTION_CONTROL && p.index == edbg_param::IDX_TARGET_POWER
            {
                rsp.data_mut()[0] = session.power_on as u8;
            }
            rsp.set_status(rsp::DATA);
            p.length as usize + 1
        }
        _ => {
            rsp.set_status(rsp::FAILED);
            0
        }
    }
}
