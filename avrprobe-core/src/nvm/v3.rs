//! NVM command set of the AVR-EA family
//!
//! Flash sits behind a 24 bit address window at 0x800000 and is written in
//! words through page erase/write commands. The command register must pass
//! through idle between commands.
//!
// Copyright (C) 2026 Stephan <kiffie@mailbox.org>
// SPDX-License-Identifier: GPL-2.0-or-later

use crate::link::{Clock, ProgPort, ProgWire};
use crate::packet::{mtype, EraseReq, MemoryReq};
use crate::timeout::Deadline;
use crate::updi::Updi;
use crate::{Error, Result};

const NVM_CTRL: u32 = 0x1000;
const NVM_STATUS: u32 = 0x1006;
const PROD_SIG: u32 = 0x1100;
const PROG_START: u32 = 0x80_0000;

const CMD_FLPERW: u8 = 0x05;
const CMD_FLPBCLR: u8 = 0x0f;
const CMD_EEPERW: u8 = 0x15;
const CMD_EEPBCLR: u8 = 0x1f;
const CMD_EEWR: u8 = 0x10;

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

/// Move the command register to `nvmcmd`, going through idle unless it
/// already holds the wanted command.
fn nvm_ctrl_change<W: ProgWire, P: ProgPort, C: Clock>(
    updi: &mut Updi<W, P, C>,
    nvmcmd: u8,
    dl: &Deadline<C>,
) -> Result<()> {
    nvm_wait(updi, dl)?;
    if updi.recv_byte_at(NVM_CTRL, dl)? == nvmcmd {
        return Ok(());
    }
    updi.nvm_ctrl(0x00, dl)?;
    if nvmcmd != 0 {
        updi.nvm_ctrl(nvmcmd, dl)?;
    }
    Ok(())
}

fn write_words_flash<W: ProgWire, P: ProgPort, C: Clock>(
    updi: &mut Updi<W, P, C>,
    addr: u32,
    data: &[u8],
    dl: &Deadline<C>,
) -> Result<()> {
    nvm_ctrl_change(updi, 0x00, dl)?;
    updi.send_block(addr, data, true, dl)?;
    nvm_ctrl_change(updi, CMD_FLPERW, dl)?;
    if nvm_wait(updi, dl)? & 0x73 != 0 {
        return Err(Error::Fault);
    }
    Ok(())
}

fn write_bytes_flash<W: ProgWire, P: ProgPort, C: Clock>(
    updi: &mut Updi<W, P, C>,
    addr: u32,
    data: &[u8],
    dl: &Deadline<C>,
) -> Result<()> {
    nvm_ctrl_change(updi, 0x00, dl)?;
    updi.send_block(addr, data, false, dl)?;
    nvm_ctrl_change(updi, CMD_FLPERW, dl)?;
    if nvm_wait(updi, dl)? & 0x73 != 0 {
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
    nvm_ctrl_change(updi, CMD_EEWR, dl)?;
    updi.send_block(addr, data, false, dl)?;
    nvm_ctrl_change(updi, CMD_EEPERW, dl)?;
    if nvm_wait(updi, dl)? & 0x73 != 0 {
        return Err(Error::Fault);
    }
    Ok(())
}

pub fn prog_init<W: ProgWire, P: ProgPort, C: Clock>(
    updi: &mut Updi<W, P, C>,
    dl: &Deadline<C>,
) -> Result<usize> {
    nvm_ctrl_change(updi, CMD_FLPBCLR, dl)?;
    nvm_ctrl_change(updi, CMD_EEPBCLR, dl)?;
    nvm_ctrl_change(updi, 0x00, dl)?;
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
    if mem.mtype == mtype::FLASH_PAGE {
        updi.recv_block(mem.addr + PROG_START, &mut out[..mem.len], true, dl)?;
        return Ok(mem.len + 1);
    }
    let addr = if mem.mtype == mtype::SIGNATURE {
        PROD_SIG + (mem.addr as u8 & 0x7f) as u32
    } else {
        mem.addr
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
    // page erase is implicit in the erase/write commands
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
    match mem.mtype {
        mtype::EEPROM | mtype::FUSES | mtype::LOCKBITS | mtype::EEPROM_ATOMIC => {
            write_eeprom(updi, mem.addr, mem.data, dl)?
        }
        mtype::XMEGA_FLASH | mtype::USER_SIGNATURE => {
            write_bytes_flash(updi, mem.addr, mem.data, dl)?
        }
        mtype::FLASH_PAGE => write_words_flash(updi, mem.addr + PROG_START, mem.data, dl)?,
        _ => updi.send_block(mem.addr, mem.data, false, dl)?,
    }
    Ok(1)
}
