//! TPI protocol driver for reduceAVR parts
//!
//! Same 12 bit frames as UPDI but clocked externally; the probe drives the
//! clock line and the data line is shared half duplex. Command payloads
//! follow the STK600 XPRG subset, with big endian fields. Hosts do not send
//! a device descriptor for these parts, so the write granularity is derived
//! from the device signature during connect.
//!
// Copyright (C) 2026 Stephan <kiffie@mailbox.org>
// SPDX-License-Identifier: GPL-2.0-or-later

use crate::link::{Clock, ProgPort, ProgWire, WireMode};
use crate::packet::{xprg, Request, Response, TpiMemoryReq};
use crate::session::{Session, TPI_CLK_KHZ};
use crate::timeout::{guard, Deadline, COMMAND_MS};
use crate::{Error, Result};
use log::debug;

/// NVMPROG activation key, prefixed with the SKEY instruction.
const NVMPROG_KEY: [u8; 9] = [0xe0, 0xff, 0x88, 0xd8, 0xcd, 0x45, 0xab, 0x89, 0x12];

/// I/O space addresses of the NVM registers, pre-encoded for the split
/// address field of the SIN/SOUT opcodes (IO 0x32 and 0x33).
const NVMCSR: u8 = 0x62;
const NVMCMD: u8 = 0x63;

/// NVMCMD commands.
const CMD_NO_OPERATION: u8 = 0x00;
const CMD_CHIP_ERASE: u8 = 0x10;
const CMD_SECTION_ERASE: u8 = 0x14;
const CMD_WORD_WRITE: u8 = 0x1d;

/// XPRG memory type of the application flash section.
const MTYPE_APPL: u8 = 0x01;

/// TPI driver borrowing the wire, the port and the session for the
/// duration of one dispatched command.
pub struct Tpi<'a, W: ProgWire, P: ProgPort, C: Clock> {
    pub wire: &'a mut W,
    pub port: &'a mut P,
    pub clock: C,
    pub session: &'a mut Session,
}

impl<'a, W: ProgWire, P: ProgPort, C: Clock> Tpi<'a, W, P, C> {
    pub fn new(
        wire: &'a mut W,
        port: &'a mut P,
        clock: C,
        session: &'a mut Session,
    ) -> Tpi<'a, W, P, C> {
        Tpi {
            wire,
            port,
            clock,
            session,
        }
    }

    fn send(&mut self, data: u8, dl: &Deadline<C>) -> Result<()> {
        self.wire.write_byte(data);
        if self.wire.read_byte(dl)? != data {
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

    /// SLDCS: load a control/status register.
    fn sldcs(&mut self, reg: u8, dl: &Deadline<C>) -> Result<u8> {
        self.send(0x80 | reg, dl)?;
        self.wire.read_byte(dl)
    }

    /// SSTCS: store a control/status register.
    fn sstcs(&mut self, reg: u8, data: u8, dl: &Deadline<C>) -> Result<()> {
        self.send_all(&[0xc0 | reg, data], dl)
    }

    fn sin(&mut self, addr: u8, dl: &Deadline<C>) -> Result<u8> {
        self.send(0x10 | addr, dl)?;
        self.wire.read_byte(dl)
    }

    fn sout(&mut self, addr: u8, data: u8, dl: &Deadline<C>) -> Result<()> {
        self.send_all(&[0x90 | addr, data], dl)
    }

    /// SSTPR: load the pointer register pair.
    fn set_ptr(&mut self, addr: u16, dl: &Deadline<C>) -> Result<()> {
        self.send_all(&[0x68, addr as u8, 0x69, (addr >> 8) as u8], dl)
    }

    /// SLD with pointer post-increment.
    fn sld(&mut self, dl: &Deadline<C>) -> Result<u8> {
        self.send(0x24, dl)?;
        self.wire.read_byte(dl)
    }

    /// SST with pointer post-increment.
    fn sst(&mut self, data: u8, dl: &Deadline<C>) -> Result<()> {
        self.send_all(&[0x64, data], dl)
    }

    fn nvm_wait(&mut self, dl: &Deadline<C>) -> Result<()> {
        while self.sin(NVMCSR, dl)? != 0 {
            dl.check()?;
        }
        Ok(())
    }

    fn nvm_cmd(&mut self, nvmcmd: u8, dl: &Deadline<C>) -> Result<()> {
        self.sout(NVMCMD, nvmcmd, dl)
    }

    /// Establish the wire session and enter NVM programming mode. The key
    /// handshake needs no reset choreography here; holding RESET (or the
    /// high voltage pulse) is what arms the interface.
    pub fn connect(&mut self, hv: bool, dl: &Deadline<C>) -> Result<usize> {
        self.session.begin_connect();
        self.wire.set_mode(WireMode::Off);
        if hv {
            // external reset pin reused as I/O; needs the 12 V pulse
            self.port.power_reset();
            self.port.hv_enable(true);
            self.session.hv_active = true;
        } else {
            self.port.reset_assert();
            self.port.power_reset();
        }
        // a target driving its control pins must see them low for a while
        self.clock.delay_ms(10);
        self.wire.set_mode(WireMode::Tpi);
        self.wire.set_clock_khz(TPI_CLK_KHZ);
        self.wire.idle_clocks(36);

        // TPIPCR <= guard time 4 clocks
        self.sstcs(0x02, 0x05, dl)?;
        // the identification register reads fixed 0x80 once the
        // interface is awake
        while self.sldcs(0x0f, dl)? != 0x80 {
            dl.check()?;
        }
        self.session.wire_active = true;

        // TPISR.NVMEN acknowledges the key
        while self.sldcs(0x00, dl)? != 0x02 {
            dl.check()?;
            for &b in &NVMPROG_KEY {
                self.send(b, dl)?;
                self.wire.idle_clocks(4);
            }
        }

        // hosts do not describe reduceAVR parts; read the signature to
        // pick the word write granularity
        self.set_ptr(0x3fc1, dl)?;
        let mut signature = (self.sld(dl)? as u16) << 8;
        signature |= self.sld(dl)? as u16;
        self.session.tpi_chunk = match signature {
            0x920e => 8, // ATtiny40
            0x910f => 4, // ATtiny20
            _ => 2,
        };
        debug!(
            "tpi sig {:#06x} chunk {}",
            signature, self.session.tpi_chunk
        );
        self.session.prog_mode = true;
        self.session.failed = false;
        Ok(1)
    }

    pub fn disconnect(&mut self, dl: &Deadline<C>) -> Result<usize> {
        // TPISR <= 0: leave NVM programming mode
        let _ = self.sstcs(0x00, 0x00, dl);
        self.clock.delay_us(100);
        if self.session.hv_active {
            self.port.hv_enable(false);
        }
        self.port.reset_release();
        self.port.power_reset();
        self.session.clear_flags();
        Ok(1)
    }

    /// Chip or section erase; the erase is triggered by a dummy store to
    /// an address inside the section.
    pub fn erase(&mut self, mem: &TpiMemoryReq, dl: &Deadline<C>) -> Result<usize> {
        let cmd = if mem.mtype == MTYPE_APPL {
            CMD_CHIP_ERASE
        } else {
            CMD_SECTION_ERASE
        };
        self.nvm_wait(dl)?;
        self.set_ptr(mem.addr as u16, dl)?;
        self.nvm_cmd(cmd, dl)?;
        self.sst(0xff, dl)?;
        self.nvm_wait(dl)?;
        self.nvm_cmd(CMD_NO_OPERATION, dl)?;
        Ok(1)
    }

    /// The memory type does not matter for reads; everything sits in one
    /// 16 bit address space.
    pub fn read(&mut self, mem: &TpiMemoryReq, out: &mut [u8], dl: &Deadline<C>) -> Result<usize> {
        // the length field is host controlled and, unlike the write path,
        // not clamped at decode time
        if mem.len > out.len() {
            return Err(Error::Fault);
        }
        self.set_ptr(mem.addr as u16, dl)?;
        for b in out[..mem.len].iter_mut() {
            *b = self.sld(dl)?;
        }
        Ok(mem.len + 1)
    }

    /// Word write in device sized chunks. Older hosts send unaligned
    /// regions, so the data is re-aligned to the chunk size with 0xff
    /// padding (NAND masked, so padding never disturbs the target).
    pub fn write(&mut self, mem: &TpiMemoryReq, dl: &Deadline<C>) -> Result<usize> {
        let chunk = self.session.tpi_chunk as usize;
        let pad = mem.addr as usize & (chunk - 1);
        let addr = mem.addr as u16 & !(chunk as u16 - 1);
        let mut buf = [0xffu8; 544];
        buf[pad..pad + mem.len].copy_from_slice(mem.data);
        let total = (pad + mem.len + chunk - 1) & !(chunk - 1);

        if mem.mtype != MTYPE_APPL {
            // config/signature sections are not covered by the chip
            // erase the host already issued
            self.nvm_wait(dl)?;
            self.set_ptr(addr | 1, dl)?;
            self.nvm_cmd(CMD_SECTION_ERASE, dl)?;
            self.sst(0xff, dl)?;
            self.nvm_wait(dl)?;
            self.nvm_cmd(CMD_NO_OPERATION, dl)?;
        }
        self.nvm_wait(dl)?;
        self.set_ptr(addr, dl)?;
        for words in buf[..total].chunks(chunk) {
            self.nvm_cmd(CMD_WORD_WRITE, dl)?;
            self.sst(words[0], dl)?;
            self.sst(words[1], dl)?;
            for pair in words[2..].chunks(2) {
                // multi word chunks need idle clocks between the words
                self.wire.idle_clocks(12);
                self.sst(pair[0], dl)?;
                self.sst(pair[1], dl)?;
            }
            self.nvm_wait(dl)?;
        }
        self.nvm_cmd(CMD_NO_OPERATION, dl)?;
        Ok(1)
    }

    /// XPRG commands of the TPI scope. Responses echo the command octet
    /// and carry an XPRG status instead of a JTAGICE3 result code.
    pub fn scope(&mut self, req: &Request, rsp: &mut Response) -> usize {
        let clock = self.clock;
        let cmd = req.cmd();
        let n = match cmd {
            xprg::ENTER_PROGMODE => {
                // an option octet after the command requests the high
                // voltage pulse
                let hv = req.len() > 6 && req.tpi_option().0 != 0;
                guard(clock, COMMAND_MS, |dl| self.connect(hv, dl))
            }
            xprg::LEAVE_PROGMODE => {
                let n = guard(clock, COMMAND_MS, |dl| self.disconnect(dl));
                self.wire.set_mode(WireMode::Off);
                n
            }
            _ if !self.session.wire_active => 0,
            xprg::ERASE => {
                let mem = req.tpi_read();
                guard(clock, COMMAND_MS, |dl| self.erase(&mem, dl))
            }
            xprg::WRITE_MEM => {
                let mem = req.tpi_write();
                guard(clock, COMMAND_MS, |dl| self.write(&mem, dl))
            }
            xprg::READ_MEM => {
                let mem = req.tpi_read();
                guard(clock, COMMAND_MS, |dl| {
                    self.read(&mem, rsp.data_mut(), dl)
                })
            }
            xprg::SET_PARAM => 1,
            // XPRG_CMD_CRC and everything else is not supported
            _ => 0,
        };
        rsp.set_xprg_status(
            cmd,
            if n != 0 {
                xprg::ERR_OK
            } else {
                xprg::ERR_FAILED
            },
        );
        n + 1
    }
}
