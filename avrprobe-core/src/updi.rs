//! UPDI protocol driver
//!
//! Single wire, echo verified framing. Every octet written to the wire is
//! looped back electrically; a mismatch means a collision. Most operations
//! are short instruction sequences followed by status register polls; key
//! activation and chip erase add the reset choreography the target expects.
//!
// Copyright (C) 2026 Stephan <kiffie@mailbox.org>
// SPDX-License-Identifier: GPL-2.0-or-later

use crate::link::{Clock, ProgPort, ProgWire, WireMode};
use crate::nvm::{self, Variant};
use crate::packet::{cmd, mtype, rsp, MemoryReq, Request, Response};
use crate::session::Session;
use crate::timeout::{guard, Deadline, COMMAND_MS};
use crate::{Error, Result};
use log::debug;

const SYNC: u8 = 0x55;
const ACK: u8 = 0x40;

/// NVMPROG activation key, prefixed with the KEY instruction.
const NVMPROG_KEY: [u8; 10] = [0x55, 0xe0, 0x20, 0x67, 0x6f, 0x72, 0x50, 0x4d, 0x56, 0x4e];
/// CHIPERASE activation key.
const ERASE_KEY: [u8; 10] = [0x55, 0xe0, 0x65, 0x73, 0x61, 0x72, 0x45, 0x4d, 0x56, 0x4e];
/// UROWWRITE activation key.
const UROWWRITE_KEY: [u8; 10] = [0x55, 0xe0, 0x65, 0x74, 0x26, 0x73, 0x55, 0x4d, 0x56, 0x4e];

/// ASI_SYS_STATUS bits.
const SYS_LOCKSTATUS: u8 = 0x01;
const SYS_UROWPROG: u8 = 0x04;
const SYS_NVMPROG: u8 = 0x08;
const SYS_INSLEEP: u8 = 0x10;
const SYS_RSTSYS: u8 = 0x20;

/// ASI_KEY_STATUS bits.
const KEYSTAT_CHIPERASE: u8 = 0x08;
const KEYSTAT_NVMPROG: u8 = 0x10;
const KEYSTAT_UROWWRITE: u8 = 0x20;

/// UPDI driver borrowing the wire, the port and the session for the
/// duration of one dispatched command.
pub struct Updi<'a, W: ProgWire, P: ProgPort, C: Clock> {
    pub wire: &'a mut W,
    pub port: &'a mut P,
    pub clock: C,
    pub session: &'a mut Session,
}

impl<'a, W: ProgWire, P: ProgPort, C: Clock> Updi<'a, W, P, C> {
    pub fn new(
        wire: &'a mut W,
        port: &'a mut P,
        clock: C,
        session: &'a mut Session,
    ) -> Updi<'a, W, P, C> {
        Updi {
            wire,
            port,
            clock,
            session,
        }
    }

    fn recv(&mut self, dl: &Deadline<C>) -> Result<u8> {
        match self.wire.read_byte(dl) {
            Err(Error::Parity) => {
                // collision or baud mismatch; a break resynchronizes
                self.wire.send_break(false);
                Err(Error::Parity)
            }
            other => other,
        }
    }

    fn send(&mut self, data: u8, dl: &Deadline<C>) -> Result<()> {
        self.wire.write_byte(data);
        if self.recv(dl)? != data {
            return Err(Error::Echo);
        }
        Ok(())
    }

    fn send_all(&mut self, data: &[u8], dl: &Deadline<C>) -> Result<()> {
        for &b in data {
            self.send(b, dl)?;
        }
        Ok(())
    }

    fn is_ack(&mut self, dl: &Deadline<C>) -> Result<()> {
        if self.recv(dl)? != ACK {
            return Err(Error::Nack);
        }
        Ok(())
    }

    /// LDCS: load a control/status register.
    fn ldcs(&mut self, reg: u8, dl: &Deadline<C>) -> Result<u8> {
        self.send_all(&[SYNC, 0x80 | reg], dl)?;
        self.recv(dl)
    }

    fn key_status(&mut self, dl: &Deadline<C>) -> Result<u8> {
        self.ldcs(0x07, dl)
    }

    fn sys_status(&mut self, dl: &Deadline<C>) -> Result<u8> {
        self.ldcs(0x0b, dl)
    }

    /// LDS with 24 bit address.
    pub fn recv_byte_at(&mut self, addr: u32, dl: &Deadline<C>) -> Result<u8> {
        let a = addr.to_le_bytes();
        self.send_all(&[SYNC, 0x08, a[0], a[1], a[2]], dl)?;
        self.recv(dl)
    }

    /// STS with 24 bit address.
    pub fn send_byte_at(&mut self, addr: u32, data: u8, dl: &Deadline<C>) -> Result<()> {
        let a = addr.to_le_bytes();
        self.send_all(&[SYNC, 0x48, a[0], a[1], a[2]], dl)?;
        self.is_ack(dl)?;
        self.send(data, dl)?;
        self.is_ack(dl)
    }

    /// Request a system reset; with `leave` the UPDI interface is disabled
    /// afterwards.
    fn sys_reset(&mut self, leave: bool, dl: &Deadline<C>) -> Result<()> {
        self.send_all(&[SYNC, 0xc8, 0x59, SYNC, 0xc8, 0x00], dl)?;
        if leave {
            self.send_all(&[SYNC, 0xc3, 0x04], dl)?;
        }
        Ok(())
    }

    fn set_rsd(&mut self, dl: &Deadline<C>) -> Result<()> {
        self.send_all(&[SYNC, 0xc2, 0x0d], dl)
    }

    fn clear_rsd(&mut self, dl: &Deadline<C>) -> Result<()> {
        self.send_all(&[SYNC, 0xc2, 0x05], dl)
    }

    /// ST ptr with 24 bit address.
    fn set_ptr(&mut self, addr: u32, dl: &Deadline<C>) -> Result<()> {
        let a = addr.to_le_bytes();
        self.send_all(&[SYNC, 0x6a, a[0], a[1], a[2]], dl)?;
        self.is_ack(dl)
    }

    /// Block read via REPEAT and LD ptr++. Word mode rounds the length
    /// down to full words; at most 256 words.
    pub fn recv_block(
        &mut self,
        addr: u32,
        out: &mut [u8],
        word: bool,
        dl: &Deadline<C>,
    ) -> Result<()> {
        let len = if word { out.len() & !1 } else { out.len() };
        if len == 0 {
            return Ok(());
        }
        let (count, op) = if word {
            (((len >> 1) - 1) as u8, 0x25)
        } else {
            ((len - 1) as u8, 0x24)
        };
        self.set_ptr(addr, dl)?;
        self.send_all(&[SYNC, 0xa0, count, SYNC, op], dl)?;
        for i in 0..len {
            out[i] = self.recv(dl)?;
        }
        Ok(())
    }

    /// Block write via REPEAT and ST ptr++ with response signatures
    /// disabled during the data phase.
    pub fn send_block(
        &mut self,
        addr: u32,
        data: &[u8],
        word: bool,
        dl: &Deadline<C>,
    ) -> Result<()> {
        let len = if word { data.len() & !1 } else { data.len() };
        if len == 0 {
            return Ok(());
        }
        let (count, op) = if word {
            (((len >> 1) - 1) as u8, 0x65)
        } else {
            ((len - 1) as u8, 0x64)
        };
        self.set_ptr(addr, dl)?;
        self.set_rsd(dl)?;
        self.send_all(&[SYNC, 0xa0, count, SYNC, op], dl)?;
        self.send_all(&data[..len], dl)?;
        self.clear_rsd(dl)
    }

    /// Byte-by-byte STS writes. Slow, but the only way USERROW and BOOTROW
    /// accept data on newer parts.
    pub fn send_slow(&mut self, addr: u32, data: &[u8], dl: &Deadline<C>) -> Result<()> {
        for (i, &b) in data.iter().enumerate() {
            self.send_byte_at(addr + i as u32, b, dl)?;
        }
        Ok(())
    }

    /// Write the NVMCTRL command register.
    pub fn nvm_ctrl(&mut self, nvmcmd: u8, dl: &Deadline<C>) -> Result<()> {
        self.send_byte_at(0x1000, nvmcmd, dl)
    }

    fn set_nvmprog_key(&mut self, reset: bool, dl: &Deadline<C>) -> Result<()> {
        self.send_all(&NVMPROG_KEY, dl)?;
        while self.key_status(dl)? & KEYSTAT_NVMPROG == 0 {
            dl.check()?;
        }
        if reset {
            self.sys_reset(false, dl)?;
        }
        Ok(())
    }

    fn set_erase_key(&mut self, dl: &Deadline<C>) -> Result<()> {
        if !self.session.prog_mode {
            // a locked part may refuse the prog key; the erase key is
            // what matters here
            let _ = self.set_nvmprog_key(false, dl);
        }
        self.send_all(&ERASE_KEY, dl)?;
        while self.key_status(dl)? & KEYSTAT_CHIPERASE == 0 {
            dl.check()?;
        }
        self.sys_reset(false, dl)
    }

    fn set_urowwrite_key(&mut self, dl: &Deadline<C>) -> Result<()> {
        self.send_all(&UROWWRITE_KEY, dl)?;
        while self.key_status(dl)? & KEYSTAT_UROWWRITE == 0 {
            dl.check()?;
        }
        self.sys_reset(false, dl)
    }

    /// Chip erase through the key interface. Works on locked parts; ends
    /// with programming mode active and the page buffer cleared.
    pub fn chip_erase(&mut self, dl: &Deadline<C>) -> Result<usize> {
        self.wire.drain();
        self.set_erase_key(dl)?;
        self.clock.delay_ms(200);
        self.wire.drain();
        while self.sys_status(dl)? & SYS_RSTSYS != 0 {
            dl.check()?;
        }
        while self.sys_status(dl)? & SYS_LOCKSTATUS != 0 {
            dl.check()?;
        }
        while self.key_status(dl)? & KEYSTAT_CHIPERASE != 0 {
            dl.check()?;
        }
        if self.sys_status(dl)? & SYS_NVMPROG == 0 {
            self.set_nvmprog_key(true, dl)?;
            while self.sys_status(dl)? & SYS_NVMPROG == 0 {
                dl.check()?;
            }
        }
        self.session.chip_erased = true;
        self.session.prog_mode = true;
        nvm::prog_init(self, dl)
    }

    /// Write the USERROW of a locked part through the UROWWRITE key. The
    /// request must cover exactly the USERROW as described by the device
    /// descriptor.
    pub fn write_userrow(&mut self, mem: &MemoryReq, dl: &Deadline<C>) -> Result<usize> {
        let d = *self.session.descriptor.updi().ok_or(Error::Fault)?;
        if !self.session.wire_active
            || mem.mtype != mtype::USER_SIGNATURE
            || mem.len != d.user_sig_bytes as usize
            || mem.addr as u16 != d.user_sig_base
        {
            return Err(Error::Fault);
        }
        self.wire.drain();
        debug!("urow write {:#06x}:{}", mem.addr, mem.len);
        self.set_urowwrite_key(dl)?;
        while self.sys_status(dl)? & SYS_UROWPROG == 0 {
            dl.check()?;
        }
        self.send_block(mem.addr, mem.data, true, dl)?;
        // ASI_SYS_CTRLA <= UROWDONE|CLKREQ
        self.send_all(&[SYNC, 0xca, 0x03], dl)?;
        while self.sys_status(dl)? & SYS_UROWPROG != 0 {
            dl.check()?;
        }
        // ASI_KEY_STATUS <= UROWWRITE (write to clear)
        self.send_all(&[SYNC, 0xc7, 0x20], dl)?;
        if self.session.prog_mode {
            self.set_nvmprog_key(true, dl)?;
            while self.sys_status(dl)? & SYS_NVMPROG == 0 {
                dl.check()?;
            }
        } else {
            self.sys_reset(false, dl)?;
        }
        Ok(1)
    }

    /// Establish the wire session: reset, break, collision detection off,
    /// short guard time, then capture the SIB and pick the NVM variant.
    pub fn connect(&mut self, ext_reset: bool, out: &mut [u8], dl: &Deadline<C>) -> Result<usize> {
        const INIT: [u8; 9] = [
            SYNC, 0xc8, 0x59, // ASI_RESET_REQ <= reset signature
            SYNC, 0xc3, 0x08, // CTRLB <= CCDETDIS
            SYNC, 0xc2, 0x05, // CTRLA <= GTVAL[4]
        ];
        self.session.begin_connect();
        self.port.reset_assert();
        if ext_reset {
            self.port.power_reset();
        }
        self.port.reset_release();
        self.wire.drain();
        self.wire.send_break(true);
        self.send_all(&INIT, dl)?;
        while self.sys_status(dl)? & SYS_INSLEEP != 0 {
            dl.check()?;
        }
        self.send_all(&[SYNC, 0xe6], dl)?;
        let mut sib = [0u8; 32];
        for b in sib.iter_mut() {
            *b = self.recv(dl)?;
        }
        self.session.sib = sib;
        self.session.sib_valid = true;
        let variant = Variant::from_sib(sib[10]).ok_or(Error::Fault)?;
        self.session.nvm = variant;
        debug!("sib nvm tag {:?} -> {:?}", sib[10] as char, variant);
        // the first four SIB characters identify the family; skip a
        // leading blank
        let start = if sib[0] == b' ' { 4 } else { 0 };
        out[..4].copy_from_slice(&sib[start..start + 4]);
        self.session.wire_active = true;
        self.session.failed = false;
        Ok(5)
    }

    pub fn disconnect(&mut self, dl: &Deadline<C>) -> Result<usize> {
        self.wire.drain();
        self.sys_reset(true, dl)?;
        self.session.clear_flags();
        self.port.reset_assert();
        self.port.reset_release();
        Ok(1)
    }

    /// Enter NVM programming mode. The PROGSTART poll is bounded by
    /// iteration count instead of the command deadline: aborting in the
    /// middle of key activation would spoil later USERROW writes and chip
    /// erases on locked parts.
    pub fn enter_progmode(&mut self, dl: &Deadline<C>) -> Result<usize> {
        if self.session.prog_mode {
            return Ok(1);
        }
        self.set_nvmprog_key(true, dl)?;
        let mut started = false;
        for _ in 0..=255u8 {
            self.clock.delay_us(50);
            if self.sys_status(dl)? & SYS_NVMPROG != 0 {
                started = true;
                break;
            }
        }
        if !started {
            return Err(Error::Fault);
        }
        self.session.prog_mode = true;
        nvm::prog_init(self, dl)
    }

    /// Memory read outside programming mode. A locked part still reveals
    /// its family through the SIB, so signature reads get a plausible
    /// dummy instead of an error.
    fn read_dummy(&mut self, mem: &MemoryReq, out: &mut [u8]) -> usize {
        out[..mem.len].fill(0xff);
        if mem.mtype == mtype::SIGNATURE && self.session.sib_valid && mem.len >= 3 {
            out[0] = 0x1e;
            out[1] = if self.session.sib[0] == b' ' {
                b'A'
            } else {
                self.session.sib[0]
            };
            out[2] = self.session.sib[10];
        }
        mem.len + 1
    }

    /// AVR scope commands for a UPDI architecture session.
    pub fn scope(&mut self, req: &Request, rsp: &mut Response) -> usize {
        let clock = self.clock;
        let size = match req.cmd() {
            cmd::SIGN_ON => {
                let ext_reset = req.memory().mtype != 0;
                self.wire.set_mode(WireMode::Updi);
                self.wire.set_clock_khz(self.session.xclk);
                let mut n;
                loop {
                    n = guard(clock, COMMAND_MS, |dl| {
                        self.connect(ext_reset, rsp.data_mut(), dl)
                    });
                    if n != 0 || !self.session.step_down_clock() {
                        break;
                    }
                    debug!("connect retry at {} kHz", self.session.xclk);
                    self.wire.set_clock_khz(self.session.xclk);
                }
                rsp.set_status(if n != 0 { rsp::DATA } else { rsp::FAILED });
                return n;
            }
            cmd::SIGN_OFF => {
                // a failed wire session still signs off cleanly
                let n = if self.session.wire_active {
                    guard(clock, COMMAND_MS, |dl| self.disconnect(dl))
                } else {
                    1
                };
                self.wire.set_mode(WireMode::Off);
                n
            }
            cmd::ENTER_PROGMODE => {
                let n = guard(clock, COMMAND_MS, |dl| self.enter_progmode(dl));
                // locked parts keep the wire session; report success so the
                // host proceeds to USERROW writes or a chip erase
                if n == 0 && self.session.wire_active {
                    1
                } else {
                    n
                }
            }
            // termination is delayed until sign-off
            cmd::LEAVE_PROGMODE => 1,
            cmd::ERASE_MEMORY => {
                let erase = req.erase();
                guard(clock, COMMAND_MS, |dl| nvm::erase_memory(self, &erase, dl))
            }
            _ if !self.session.wire_active => 0,
            cmd::READ_MEMORY => {
                let mem = req.memory();
                let n = if mem.mtype == mtype::SIB {
                    // readable before prog mode; index and length wrap
                    // within the 32 octet block
                    let dest = (mem.addr as u8 & 31) as usize;
                    let count = (mem.len.wrapping_sub(1) & 31) + 1;
                    let sib = self.session.sib;
                    rsp.data_mut()[dest..dest + count].copy_from_slice(&sib[..count]);
                    mem.len + 1
                } else if self.session.prog_mode {
                    guard(clock, COMMAND_MS, |dl| {
                        nvm::read_memory(self, &mem, rsp.data_mut(), dl)
                    })
                } else {
                    self.read_dummy(&mem, rsp.data_mut())
                };
                rsp.set_status(if n != 0 { rsp::DATA } else { rsp::FAILED });
                return n;
            }
            cmd::WRITE_MEMORY => {
                let mem = req.memory();
                guard(clock, COMMAND_MS, |dl| nvm::write_memory(self, &mem, dl))
            }
            _ => 0,
        };
        rsp.set_status(if size != 0 { rsp::OK } else { rsp::FAILED });
        size
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::{self, MAX_PACKET};
    use crate::testutil::{MockClock, MockPort, MockWire};
    use std::cell::Cell;

    fn deadline(clock: MockClock) -> Deadline<MockClock> {
        Deadline::new(clock, 1000)
    }

    #[test]
    fn send_verifies_the_echo() {
        let t = Cell::new(0u64);
        let clock = MockClock::new(&t);
        let mut wire = MockWire::new();
        let mut port = MockPort::new();
        let mut session = Session::new();
        let mut updi = Updi::new(&mut wire, &mut port, clock, &mut session);
        let dl = deadline(clock);
        assert!(updi.send(0x55, &dl).is_ok());

        let mut wire = MockWire::new();
        wire.corrupt_echo_at = Some(0);
        let mut updi = Updi::new(&mut wire, &mut port, clock, &mut session);
        assert_eq!(updi.send(0x55, &dl), Err(Error::Echo));
    }

    #[test]
    fn lds_and_sts_instruction_streams() {
        let t = Cell::new(0u64);
        let clock = MockClock::new(&t);
        let mut wire = MockWire::new();
        let mut port = MockPort::new();
        let mut session = Session::new();
        let dl = deadline(clock);
        {
            let mut updi = Updi::new(&mut wire, &mut port, clock, &mut session);
            updi.wire.respond(&[0x5a]);
            assert_eq!(updi.recv_byte_at(0x123456, &dl), Ok(0x5a));
        }
        assert_eq!(wire.sent, [0x55, 0x08, 0x56, 0x34, 0x12]);

        let mut wire = MockWire::new();
        {
            let mut updi = Updi::new(&mut wire, &mut port, clock, &mut session);
            updi.wire.respond(&[ACK]);
            // second ack arrives after the data octet; queue it up front
            updi.wire.device.push_back(ACK);
            assert!(updi.send_byte_at(0x1000, 0x04, &dl).is_ok());
        }
        assert_eq!(wire.sent, [0x55, 0x48, 0x00, 0x10, 0x00, 0x04]);
    }

    #[test]
    fn missing_ack_is_an_error() {
        let t = Cell::new(0u64);
        let clock = MockClock::new(&t);
        let mut wire = MockWire::new();
        let mut port = MockPort::new();
        let mut session = Session::new();
        let mut updi = Updi::new(&mut wire, &mut port, clock, &mut session);
        let dl = deadline(clock);
        updi.wire.respond(&[0x00]);
        assert_eq!(updi.send_byte_at(0x1000, 0x04, &dl), Err(Error::Nack));
    }

    #[test]
    fn block_write_wraps_data_in_rsd() {
        let t = Cell::new(0u64);
        let clock = MockClock::new(&t);
        let mut wire = MockWire::new();
        let mut port = MockPort::new();
        let mut session = Session::new();
        let dl = deadline(clock);
        {
            let mut updi = Updi::new(&mut wire, &mut port, clock, &mut session);
            updi.wire.respond(&[ACK]); // for the pointer write
            assert!(updi.send_block(0x8000, &[1, 2, 3, 4], true, &dl).is_ok());
        }
        let expect: &[u8] = &[
            0x55, 0x6a, 0x00, 0x80, 0x00, // ST ptr
            0x55, 0xc2, 0x0d, // RSD on
            0x55, 0xa0, 0x01, 0x55, 0x65, // repeat 2 words, ST ptr++
            1, 2, 3, 4, //
            0x55, 0xc2, 0x05, // RSD off
        ];
        assert_eq!(wire.sent, expect);
    }

    #[test]
    fn block_read_rounds_words_down() {
        let t = Cell::new(0u64);
        let clock = MockClock::new(&t);
        let mut wire = MockWire::new();
        let mut port = MockPort::new();
        let mut session = Session::new();
        let dl = deadline(clock);
        let mut out = [0u8; 5];
        {
            let mut updi = Updi::new(&mut wire, &mut port, clock, &mut session);
            updi.wire.respond(&[ACK]);
            updi.wire.device.extend([0xaa, 0xbb, 0xcc, 0xdd]);
            assert!(updi.recv_block(0x4000, &mut out, true, &dl).is_ok());
        }
        assert_eq!(out, [0xaa, 0xbb, 0xcc, 0xdd, 0x00]);
        assert_eq!(&wire.sent[5..], &[0x55, 0xa0, 0x01, 0x55, 0x25]);
    }

    fn sib(tag: u8) -> [u8; 32] {
        let mut s = [b' '; 32];
        s[..8].copy_from_slice(b"    AVR ");
        s[10] = tag;
        s
    }

    #[test]
    fn connect_captures_sib_and_selects_variant() {
        let t = Cell::new(0u64);
        let clock = MockClock::new(&t);
        let mut wire = MockWire::new();
        let mut port = MockPort::new();
        let mut session = Session::new();
        let dl = deadline(clock);
        let mut out = [0u8; 8];
        {
            let mut updi = Updi::new(&mut wire, &mut port, clock, &mut session);
            // sys status (sleep cleared), then the SIB
            updi.wire.respond(&[0x00]);
            updi.wire.device.extend(sib(b'3'));
            assert_eq!(updi.connect(false, &mut out, &dl), Ok(5));
        }
        assert!(session.wire_active);
        assert!(!session.failed);
        assert_eq!(session.nvm, Variant::V3);
        // leading blank: characters 4..8 are reported
        assert_eq!(&out[..4], b"AVR ");
        assert_eq!(port.reset_pulses, 1);
        assert_eq!(wire.breaks, [true]);
        // init sequence went out before the SIB request
        assert_eq!(
            &wire.sent[..11],
            &[0x55, 0xc8, 0x59, 0x55, 0xc3, 0x08, 0x55, 0xc2, 0x05, 0x55, 0x8b]
        );
    }

    #[test]
    fn connect_rejects_unknown_nvm_tag() {
        let t = Cell::new(0u64);
        let clock = MockClock::new(&t);
        let mut wire = MockWire::new();
        let mut port = MockPort::new();
        let mut session = Session::new();
        let dl = deadline(clock);
        let mut out = [0u8; 8];
        let mut updi = Updi::new(&mut wire, &mut port, clock, &mut session);
        updi.wire.respond(&[0x00]);
        updi.wire.device.extend(sib(b'9'));
        assert_eq!(updi.connect(false, &mut out, &dl), Err(Error::Fault));
        assert!(!updi.session.wire_active);
        assert!(updi.session.failed);
    }

    #[test]
    fn sib_memtype_is_served_from_the_session() {
        let t = Cell::new(0u64);
        let clock = MockClock::new(&t);
        let mut wire = MockWire::new();
        let mut port = MockPort::new();
        let mut session = Session::new();
        session.wire_active = true;
        session.sib = sib(b'0');
        session.sib_valid = true;

        let mut buf = [0u8; MAX_PACKET];
        buf[5] = cmd::READ_MEMORY;
        buf[7] = mtype::SIB;
        buf[12] = 32; // length, little endian
        let req = Request::new(&buf, 17);
        let mut out = [0u8; MAX_PACKET];
        let mut rsp = Response::new(&mut out);
        let mut updi = Updi::new(&mut wire, &mut port, clock, &mut session);
        let n = updi.scope(&req, &mut rsp);
        assert_eq!(n, 33);
        assert_eq!(&out[6..38], &sib(b'0'));
        assert_eq!(&out[4..6], &[0x84, 0x01]);
    }

    #[test]
    fn locked_device_signature_read_returns_a_dummy() {
        let t = Cell::new(0u64);
        let clock = MockClock::new(&t);
        let mut wire = MockWire::new();
        let mut port = MockPort::new();
        let mut session = Session::new();
        session.wire_active = true;
        session.sib = sib(b'5');
        session.sib_valid = true;

        let mut buf = [0u8; MAX_PACKET];
        buf[5] = cmd::READ_MEMORY;
        buf[7] = mtype::SIGNATURE;
        buf[12] = 3;
        let req = Request::new(&buf, 17);
        let mut out = [0u8; MAX_PACKET];
        let mut rsp = Response::new(&mut out);
        let mut updi = Updi::new(&mut wire, &mut port, clock, &mut session);
        assert_eq!(updi.scope(&req, &mut rsp), 4);
        assert_eq!(&out[6..9], &[0x1e, b'A', b'5']);
        // nothing touched the wire
        assert!(wire.sent.is_empty());
    }

    #[test]
    fn read_and_write_are_gated_on_the_wire_session() {
        let t = Cell::new(0u64);
        let clock = MockClock::new(&t);
        let mut wire = MockWire::new();
        let mut port = MockPort::new();
        let mut session = Session::new();

        let mut buf = [0u8; MAX_PACKET];
        buf[5] = cmd::READ_MEMORY;
        let req = Request::new(&buf, 17);
        let mut out = [0u8; MAX_PACKET];
        let mut rsp = Response::new(&mut out);
        let mut updi = Updi::new(&mut wire, &mut port, clock, &mut session);
        assert_eq!(updi.scope(&req, &mut rsp), 0);
        assert_eq!(&out[4..6], &[0xa0, 0x00]);
    }

    #[test]
    fn enter_progmode_soft_succeeds_on_a_live_wire() {
        let t = Cell::new(0u64);
        let clock = MockClock::new(&t);
        let mut wire = MockWire::new();
        let mut port = MockPort::new();
        let mut session = Session::new();
        session.wire_active = true;
        // the key poll finds an empty wire and times out

        let mut buf = [0u8; MAX_PACKET];
        buf[5] = cmd::ENTER_PROGMODE;
        let req = Request::new(&buf, 8);
        let mut out = [0u8; MAX_PACKET];
        let mut rsp = Response::new(&mut out);
        let mut updi = Updi::new(&mut wire, &mut port, clock, &mut session);
        let n = updi.scope(&req, &mut rsp);
        assert_eq!(n, 1);
        assert_eq!(&out[4..6], &[0x80, 0x00]);
        assert!(!session.prog_mode);
    }

    #[test]
    fn leave_progmode_is_a_no_op() {
        let t = Cell::new(0u64);
        let clock = MockClock::new(&t);
        let mut wire = MockWire::new();
        let mut port = MockPort::new();
        let mut session = Session::new();
        let mut buf = [0u8; MAX_PACKET];
        buf[5] = cmd::LEAVE_PROGMODE;
        let req = Request::new(&buf, 8);
        let mut out = [0u8; MAX_PACKET];
        let mut rsp = Response::new(&mut out);
        let mut updi = Updi::new(&mut wire, &mut port, clock, &mut session);
        assert_eq!(updi.scope(&req, &mut rsp), 1);
        assert_eq!(&out[4..6], &[0x80, 0x00]);
        assert!(wire.sent.is_empty());
    }

    #[test]
    fn sign_off_without_a_session_reports_ok() {
        let t = Cell::new(0u64);
        let clock = MockClock::new(&t);
        let mut wire = MockWire::new();
        let mut port = MockPort::new();
        let mut session = Session::new();
        let mut buf = [0u8; MAX_PACKET];
        buf[5] = cmd::SIGN_OFF;
        let req = Request::new(&buf, 8);
        let mut out = [0u8; MAX_PACKET];
        let mut rsp = Response::new(&mut out);
        let mut updi = Updi::new(&mut wire, &mut port, clock, &mut session);
        assert_eq!(updi.scope(&req, &mut rsp), 1);
        assert_eq!(wire.mode, WireMode::Off);
        assert_eq!(&out[4..6], &[0x80, 0x00]);
    }

    #[test]
    fn userrow_write_validates_the_request() {
        use crate::device::{Descriptor, UpdiDescriptor};
        let t = Cell::new(0u64);
        let clock = MockClock::new(&t);
        let mut wire = MockWire::new();
        let mut port = MockPort::new();
        let mut session = Session::new();
        session.wire_active = true;
        let mut d = UpdiDescriptor::default();
        d.user_sig_bytes = 32;
        d.user_sig_base = 0x1300;
        session.descriptor = Descriptor::Updi(d);
        let dl = Deadline::new(clock, 10);
        let data = [0u8; 16];
        let mem = MemoryReq {
            mtype: mtype::USER_SIGNATURE,
            addr: 0x1300,
            len: 16, // wrong length
            data: &data,
        };
        let mut updi = Updi::new(&mut wire, &mut port, clock, &mut session);
        assert_eq!(updi.write_userrow(&mem, &dl), Err(Error::Fault));
        assert!(wire.sent.is_empty());
    }

    #[test]
    fn sign_on_retries_with_a_lower_clock() {
        let t = Cell::new(0u64);
        let clock = MockClock::new(&t);
        let mut wire = MockWire::new();
        let mut port = MockPort::new();
        let mut session = Session::new();
        session.select_arch(packet::avr_param::ARCH_UPDI);
        let mut buf = [0u8; MAX_PACKET];
        buf[5] = cmd::SIGN_ON;
        let req = Request::new(&buf, 8);
        let mut out = [0u8; MAX_PACKET];
        let mut rsp = Response::new(&mut out);
        let mut updi = Updi::new(&mut wire, &mut port, clock, &mut session);
        // dead wire: every attempt fails until the clock floor is reached
        assert_eq!(updi.scope(&req, &mut rsp), 0);
        assert_eq!(session.xclk, crate::session::XCLK_FLOOR_KHZ);
        assert_eq!(wire.clock_khz, crate::session::XCLK_FLOOR_KHZ);
        assert_eq!(&out[4..6], &[0xa0, 0x00]);
    }
}
