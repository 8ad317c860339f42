//! NVM controller variants
//!
//! The NVM controller differs between UPDI device families; the SIB carries
//! a one character tag selecting the command set. Variants 0, 3 and 4 are
//! implemented; 1, 2 and 5 are recognized so the wire session comes up, but
//! their memory operations report failure.
//!
// Copyright (C) 2026 Stephan <kiffie@mailbox.org>
// SPDX-License-Identifier: GPL-2.0-or-later

use crate::link::{Clock, ProgPort, ProgWire};
use crate::packet::{EraseReq, MemoryReq};
use crate::timeout::Deadline;
use crate::updi::Updi;
use crate::{Error, Result};

mod v0;
mod v3;
mod v4;

/// NVM command set, selected from octet 10 of the SIB.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Variant {
    /// tinyAVR-0/1/2, megaAVR-0.
    V0,
    /// Placeholder before a connect has identified the target.
    #[default]
    V1,
    /// AVR-DA/DB/DD, not implemented.
    V2,
    /// AVR-EA.
    V3,
    /// AVR-DU.
    V4,
    /// AVR-EB, not implemented.
    V5,
}

impl Variant {
    pub fn from_sib(tag: u8) -> Option<Variant> {
        match tag {
            b'0' => Some(Variant::V0),
            b'2' => Some(Variant::V2),
            b'3' => Some(Variant::V3),
            b'4' => Some(Variant::V4),
            b'5' => Some(Variant::V5),
            _ => None,
        }
    }
}

/// Prepare the controller after entering programming mode (clear page
/// buffers, idle command register).
pub fn prog_init<W: ProgWire, P: ProgPort, C: Clock>(
    updi: &mut Updi<W, P, C>,
    dl: &Deadline<C>,
) -> Result<usize> {
    match updi.session.nvm {
        Variant::V0 => v0::prog_init(updi, dl),
        Variant::V3 => v3::prog_init(updi, dl),
        Variant::V4 => v4::prog_init(updi, dl),
        _ => Err(Error::Fault),
    }
}

pub fn read_memory<W: ProgWire, P: ProgPort, C: Clock>(
    updi: &mut Updi<W, P, C>,
    mem: &MemoryReq,
    out: &mut [u8],
    dl: &Deadline<C>,
) -> Result<usize> {
    match updi.session.nvm {
        Variant::V0 => v0::read_memory(updi, mem, out, dl),
        Variant::V3 => v3::read_memory(updi, mem, out, dl),
        Variant::V4 => v4::read_memory(updi, mem, out, dl),
        _ => Err(Error::Fault),
    }
}

pub fn erase_memory<W: ProgWire, P: ProgPort, C: Clock>(
    updi: &mut Updi<W, P, C>,
    erase: &EraseReq,
    dl: &Deadline<C>,
) -> Result<usize> {
    match updi.session.nvm {
        Variant::V0 => v0::erase_memory(updi, erase, dl),
        Variant::V3 => v3::erase_memory(updi, erase, dl),
        Variant::V4 => v4::erase_memory(updi, erase, dl),
        _ => Err(Error::Fault),
    }
}

pub fn write_memory<W: ProgWire, P: ProgPort, C: Clock>(
    updi: &mut Updi<W, P, C>,
    mem: &MemoryReq,
    dl: &Deadline<C>,
) -> Result<usize> {
    match updi.session.nvm {
        Variant::V0 => v0::write_memory(updi, mem, dl),
        Variant::V3 => v3::write_memory(updi, mem, dl),
        Variant::V4 => v4::write_memory(updi, mem, dl),
        _ => Err(Error::Fault),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Session;
    use crate::testutil::{MockClock, MockPort, MockWire};
    use std::cell::Cell;

    const ACK: u8 = 0x40;

    #[test]
    fn sib_tags_map_to_variants() {
        assert_eq!(Variant::from_sib(b'0'), Some(Variant::V0));
        assert_eq!(Variant::from_sib(b'2'), Some(Variant::V2));
        assert_eq!(Variant::from_sib(b'3'), Some(Variant::V3));
        assert_eq!(Variant::from_sib(b'4'), Some(Variant::V4));
        assert_eq!(Variant::from_sib(b'5'), Some(Variant::V5));
        assert_eq!(Variant::from_sib(b'1'), None);
        assert_eq!(Variant::from_sib(b'x'), None);
    }

    #[test]
    fn unimplemented_variants_fail_every_operation() {
        let t = Cell::new(0u64);
        let clock = MockClock::new(&t);
        let mut wire = MockWire::new();
        let mut port = MockPort::new();
        let mut session = Session::new();
        session.prog_mode = true;
        for variant in [Variant::V1, Variant::V2, Variant::V5] {
            session.nvm = variant;
            let mut updi = Updi::new(&mut wire, &mut port, clock, &mut session);
            let dl = Deadline::new(clock, 10);
            let mem = MemoryReq {
                mtype: crate::packet::mtype::SRAM,
                addr: 0x3f00,
                len: 2,
                data: &[0, 0],
            };
            let mut out = [0u8; 8];
            assert_eq!(read_memory(&mut updi, &mem, &mut out, &dl), Err(Error::Fault));
            assert_eq!(write_memory(&mut updi, &mem, &dl), Err(Error::Fault));
            assert_eq!(prog_init(&mut updi, &dl), Err(Error::Fault));
        }
        assert!(wire.sent.is_empty());
    }

    #[test]
    fn v0_page_erase_requests_are_ignored() {
        let t = Cell::new(0u64);
        let clock = MockClock::new(&t);
        let mut wire = MockWire::new();
        let mut port = MockPort::new();
        let mut session = Session::new();
        session.nvm = Variant::V0;
        let mut updi = Updi::new(&mut wire, &mut port, clock, &mut session);
        let dl = Deadline::new(clock, 10);
        let erase = EraseReq {
            etype: 0x04,
            page_addr: 0x8000,
        };
        assert_eq!(erase_memory(&mut updi, &erase, &dl), Ok(1));
        assert!(wire.sent.is_empty());
    }

    #[test]
    fn v0_fuse_write_uses_the_data_addr_registers() {
        let t = Cell::new(0u64);
        let clock = MockClock::new(&t);
        let mut wire = MockWire::new();
        let mut port = MockPort::new();
        let mut session = Session::new();
        session.nvm = Variant::V0;
        session.prog_mode = true;
        {
            let mut updi = Updi::new(&mut wire, &mut port, clock, &mut session);
            let dl = Deadline::new(clock, 100);
            // reads in order: status poll, 8 STS acks, 2 command acks,
            // final status poll
            updi.wire.respond(&[0x00]);
            updi.wire.device.extend([ACK; 10]);
            updi.wire.respond(&[0x00]);
            let mem = MemoryReq {
                mtype: crate::packet::mtype::FUSES,
                addr: 0x1280, // FUSE.SYSCFG0 area
                len: 1,
                data: &[0xe4],
            };
            assert_eq!(write_memory(&mut updi, &mem, &dl), Ok(1));
        }
        // fuse record {data16, addr16} written bytewise at NVMCTRL.DATA
        let sts = |addr: u16, data: u8| {
            let a = addr.to_le_bytes();
            [0x55, 0x48, a[0], a[1], 0x00, data]
        };
        let mut expect = vec![0x55, 0x08, 0x02, 0x10, 0x00]; // status poll
        expect.extend(sts(0x1006, 0xe4));
        expect.extend(sts(0x1007, 0x00));
        expect.extend(sts(0x1008, 0x80));
        expect.extend(sts(0x1009, 0x12));
        expect.extend(sts(0x1000, 0x07)); // NVM_CMD_WFU
        expect.extend([0x55, 0x08, 0x02, 0x10, 0x00]); // status poll
        assert_eq!(wire.sent, expect);
    }

    #[test]
    fn v4_flash_writes_erase_once_per_page() {
        use crate::device::{Descriptor, UpdiDescriptor};
        let t = Cell::new(0u64);
        let clock = MockClock::new(&t);
        let mut wire = MockWire::new();
        let mut port = MockPort::new();
        let mut session = Session::new();
        session.nvm = Variant::V4;
        session.prog_mode = true;
        let mut d = UpdiDescriptor::default();
        d.flash_page_size = 128;
        session.descriptor = Descriptor::Updi(d);
        {
            let mut updi = Updi::new(&mut wire, &mut port, clock, &mut session);
            let dl = Deadline::new(clock, 100);
            // first write lands on a fresh page: status poll, command
            // register readback, FLPER with its dummy store, back to idle
            updi.wire.respond(&[0x00, 0x00]);
            updi.wire.device.extend([ACK; 6]);
            updi.wire.respond(&[0x00]);
            updi.wire.respond(&[0x00, 0x08]);
            updi.wire.device.extend([ACK; 2]);
            // then the buffered word write
            updi.wire.respond(&[0x00, 0x00]);
            updi.wire.device.extend([ACK; 5]);
            updi.wire.respond(&[0x00]);
            updi.wire.respond(&[0x00, 0x02]);
            updi.wire.device.extend([ACK; 2]);
            let mem = MemoryReq {
                mtype: crate::packet::mtype::FLASH_PAGE,
                addr: 0x0000,
                len: 4,
                data: &[0xaa, 0xbb, 0xcc, 0xdd],
            };
            assert_eq!(write_memory(&mut updi, &mem, &dl), Ok(1));

            // second write stays inside the page: no erase this time
            updi.wire.respond(&[0x00, 0x00]);
            updi.wire.device.extend([ACK; 5]);
            updi.wire.respond(&[0x00]);
            updi.wire.respond(&[0x00, 0x02]);
            updi.wire.device.extend([ACK; 2]);
            let mem = MemoryReq {
                mtype: crate::packet::mtype::FLASH_PAGE,
                addr: 0x0004,
                len: 4,
                data: &[0x11, 0x22, 0x33, 0x44],
            };
            assert_eq!(write_memory(&mut updi, &mem, &dl), Ok(1));
        }
        // STS to the NVMCTRL command register, by command value
        let sts_nvmctrl = |nvmcmd: u8| {
            wire.sent
                .windows(6)
                .filter(|w| *w == [0x55, 0x48, 0x00, 0x10, 0x00, nvmcmd])
                .count()
        };
        assert_eq!(sts_nvmctrl(0x08), 1); // one FLPER for the page
        assert_eq!(sts_nvmctrl(0x02), 2); // one FLWR per write
        // the erase dummy store hit the page base in the flash window
        let dummies = wire
            .sent
            .windows(6)
            .filter(|w| *w == [0x55, 0x48, 0x00, 0x00, 0x80, 0xff])
            .count();
        assert_eq!(dummies, 1);
    }

    #[test]
    fn v3_command_register_is_cycled_through_idle() {
        let t = Cell::new(0u64);
        let clock = MockClock::new(&t);
        let mut wire = MockWire::new();
        let mut port = MockPort::new();
        let mut session = Session::new();
        session.nvm = Variant::V3;
        session.prog_mode = true;
        {
            let mut updi = Updi::new(&mut wire, &mut port, clock, &mut session);
            let dl = Deadline::new(clock, 100);
            // prog_init: FLPBCLR, EEPBCLR, idle; each change polls the
            // status register and reads the command register back
            updi.wire.respond(&[0x00, 0x00]); // wait, ctrl readback != 0x0f
            updi.wire.device.extend([ACK; 4]); // ctrl <= 0, ctrl <= 0x0f
            updi.wire.respond(&[0x00, 0x0f]); // wait, readback
            updi.wire.device.extend([ACK; 4]); // ctrl <= 0, ctrl <= 0x1f
            updi.wire.respond(&[0x00, 0x1f]); // wait, readback
            updi.wire.device.extend([ACK; 2]); // ctrl <= 0
            assert_eq!(prog_init(&mut updi, &dl), Ok(1));
        }
        // the first change: status 0x1006, readback 0x1000, write 0, write 0x0f
        assert_eq!(&wire.sent[..5], &[0x55, 0x08, 0x06, 0x10, 0x00]);
        assert_eq!(&wire.sent[5..10], &[0x55, 0x08, 0x00, 0x10, 0x00]);
        assert_eq!(&wire.sent[10..16], &[0x55, 0x48, 0x00, 0x10, 0x00, 0x00]);
        assert_eq!(&wire.sent[16..22], &[0x55, 0x48, 0x00, 0x10, 0x00, 0x0f]);
    }
}
