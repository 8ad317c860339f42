//! NVM command set of the tinyAVR-0/1/2 and megaAVR-0 families
//!
//! One 64 KiB address space with flash mapped into the upper half; the
//! accessory bus uses 16 bit addresses. Fuses go through a dedicated
//! DATA/ADDR register command, flash and EEPROM through the page buffer
//! with a combined erase/write command.
//!
// Copyright (C) 2026 Stephan <kiffie@mailbox.org>
// SPDX-License-Identifier: GPL-2.0-or-later

use crate::link::{Clock, ProgPort, ProgWire};
use crate::packet::{mtype, EraseReq, MemoryReq};
use crate::timeout::Deadline;
use crate::updi::Updi;
use crate::{Error, Result};

const NVM_STATUS: u32 = 0x1002;
const NVM_DATA: u32 = 0x1006;
const PROD_SIG: u32 = 0x1100;

const CMD_ERWP: u8 = 0x03;
const CMD_PBC: u8 = 0x04;
const CMD_WFU: u8 = 0x07;

fn nvm_wait<W: ProgWire, P: ProgPort, C: Clock>(
    updi: &mut Updi<W, P, C>,
    dl: &Deadline<C>,
) -> Result<u8> {
    loop {
        let status = updi.recv_byte_at(NVM_STATUS, dl)?;
        if status & 3 == 0 {
            return Ok(status);
        }
        dl.check()?;
    }
}

/// Fuses are written one byte at a time through the DATA and ADDR
/// registers, which sit back to back in the controller.
fn write_fuse<W: ProgWire, P: ProgPort, C: Clock>(
    updi: &mut Updi<W, P, C>,
    mem: &MemoryReq,
    dl: &Deadline<C>,
) -> Result<()> {
    for (i, &data) in mem.data.iter().enumerate() {
        let addr = (mem.addr as u16).wrapping_add(i as u16);
        let record = [data, 0, addr as u8, (addr >> 8) as u8];
        nvm_wait(updi, dl)?;
        updi.send_slow(NVM_DATA, &record, dl)?;
        updi.nvm_ctrl(CMD_WFU, dl)?;
        if nvm_wait(updi, dl)? & 7 != 0 {
            return Err(Error::Fault);
        }
    }
    Ok(())
}

fn write_flash<W: ProgWire, P: ProgPort, C: Clock>(
    updi: &mut Updi<W, P, C>,
    addr: u32,
    data: &[u8],
    dl: &Deadline<C>,
) -> Result<()> {
    if updi.session.is_boundary_flash_page(addr) {
        nvm_wait(updi, dl)?;
        updi.nvm_ctrl(CMD_PBC, dl)?;
    }
    nvm_wait(updi, dl)?;
    updi.send_block(addr, data, false, dl)?;
    updi.nvm_ctrl(CMD_ERWP, dl)?;
    if nvm_wait(updi, dl)? & 7 != 0 {
        return Err(Error::Fault);
    }
    Ok(())
}

fn write_eeprom<W: ProgWire, P: ProgPort, C: Clock>(
    updi: &mut Updi<W, P, C>,
    addr: u32,
    data: &[u8],
    dl: &Deadline<C>,
) -> Result<()> {
    nvm_wait(updi, dl)?;
    updi.send_block(addr, data, false, dl)?;
    updi.nvm_ctrl(CMD_ERWP, dl)?;
    if nvm_wait(updi, dl)? & 7 != 0 {
        return Err(Error::Fault);
    }
    Ok(())
}

pub fn prog_init<W: ProgWire, P: ProgPort, C: Clock>(
    updi: &mut Updi<W, P, C>,
    dl: &Deadline<C>,
) -> Result<usize> {
    nvm_wait(updi, dl)?;
    updi.nvm_ctrl(CMD_PBC, dl)?;
    nvm_wait(updi, dl)?;
    updi.nvm_ctrl(0x00, dl)?;
    Ok(1)
}

pub fn read_memory<W: ProgWire, P: ProgPort, C: Clock>(
    updi: &mut Updi<W, P, C>,
    mem: &MemoryReq,
    out: &mut [u8],
    dl: &Deadline<C>,
) -> Result<usize> {
    if !updi.session.prog_mode {
        return Err(Error::Fault);
    }
    let prog_base = match updi.session.descriptor.updi() {
        Some(d) => d.prog_base as u16,
        None => 0,
    };
    let addr = match mem.mtype {
        mtype::SIGNATURE => PROD_SIG + (mem.addr as u8 & 0x7f) as u32,
        mtype::FLASH_PAGE => (mem.addr as u16).wrapping_add(prog_base) as u32,
        _ => mem.addr as u16 as u32,
    };
    updi.recv_block(addr, &mut out[..mem.len], false, dl)?;
    Ok(mem.len + 1)
}

pub fn erase_memory<W: ProgWire, P: ProgPort, C: Clock>(
    updi: &mut Updi<W, P, C>,
    erase: &EraseReq,
    dl: &Deadline<C>,
) -> Result<usize> {
    if erase.etype == 0x00 {
        return updi.chip_erase(dl);
    }
    // page erases never happen; erase/write is one command here
    Ok(1)
}

pub fn write_memory<W: ProgWire, P: ProgPort, C: Clock>(
    updi: &mut Updi<W, P, C>,
    mem: &MemoryReq,
    dl: &Deadline<C>,
) -> Result<usize> {
    if !updi.session.prog_mode {
        return updi.write_userrow(mem, dl);
    }
    let prog_base = match updi.session.descriptor.updi() {
        Some(d) => d.prog_base as u16,
        None => 0,
    };
    let addr = mem.addr as u16 as u32;
    match mem.mtype {
        mtype::FUSES | mtype::LOCKBITS => write_fuse(updi, mem, dl)?,
        mtype::EEPROM | mtype::EEPROM_ATOMIC | mtype::USER_SIGNATURE => {
            write_eeprom(updi, addr, mem.data, dl)?
        }
        mtype::FLASH_PAGE | mtype::XMEGA_FLASH => {
            let addr = (mem.addr as u16).wrapping_add(prog_base) as u32;
            write_flash(updi, addr, mem.data, dl)?
        }
        _ => updi.send_block(addr, mem.data, false, dl)?,
    }
    Ok(1)
}
