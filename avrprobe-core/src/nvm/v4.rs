//! NVM command set of the AVR-DU family
//!
//! Erase and write are separate commands; a page erase is issued at flash
//! page boundaries unless the whole chip was erased in this session.
//! USERROW and BOOTROW behave like flash but only accept bytewise stores.
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
const PROD_SIG: u32 = 0x1080;
const PROG_START: u32 = 0x80_0000;

const CMD_FLWR: u8 = 0x02;
const CMD_FLPER: u8 = 0x08;
const CMD_EEERWR: u8 = 0x13;

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

fn erase_flash_page<W: ProgWire, P: ProgPort, C: Clock>(
    updi: &mut Updi<W, P, C>,
    addr: u32,
    dl: &Deadline<C>,
) -> Result<()> {
    nvm_ctrl_change(updi, CMD_FLPER, dl)?;
    updi.send_byte_at(addr, 0xff, dl)?;
    if nvm_wait(updi, dl)? & 0x73 != 0 {
        return Err(Error::Fault);
    }
    nvm_ctrl_change(updi, 0x00, dl)
}

fn write_words_flash<W: ProgWire, P: ProgPort, C: Clock>(
    updi: &mut Updi<W, P, C>,
    addr: u32,
    data: &[u8],
    dl: &Deadline<C>,
) -> Result<()> {
    if !updi.session.chip_erased && updi.session.is_boundary_flash_page(addr) {
        erase_flash_page(updi, addr, dl)?;
    }
    nvm_ctrl_change(updi, CMD_FLWR, dl)?;
    updi.send_block(addr, data, true, dl)?;
    if nvm_wait(updi, dl)? & 0x73 != 0 {
        return Err(Error::Fault);
    }
    nvm_ctrl_change(updi, 0x00, dl)
}

/// USERROW/BOOTROW path: single page memories, erased up front and then
/// stored bytewise.
fn write_bytes_flash<W: ProgWire, P: ProgPort, C: Clock>(
    updi: &mut Updi<W, P, C>,
    addr: u32,
    data: &[u8],
    dl: &Deadline<C>,
) -> Result<()> {
    if updi.session.is_boundary_flash_page(addr) {
        erase_flash_page(updi, addr, dl)?;
    }
    nvm_ctrl_change(updi, CMD_FLWR, dl)?;
    updi.send_slow(addr, data, dl)?;
    if nvm_wait(updi, dl)? & 0x73 != 0 {
        return Err(Error::Fault);
    }
    nvm_ctrl_change(updi, 0x00, dl)
}

fn write_eeprom<W: ProgWire, P: ProgPort, C: Clock>(
    updi: &mut Updi<W, P, C>,
    addr: u32,
    data: &[u8],
    dl: &Deadline<C>,
) -> Result<()> {
    nvm_ctrl_change(updi, CMD_EEERWR, dl)?;
    updi.send_slow(addr, data, dl)?;
    if nvm_wait(updi, dl)? & 0x73 != 0 {
        return Err(Error::Fault);
    }
    nvm_ctrl_change(updi, 0x00, dl)
}

pub fn prog_init<W: ProgWire, P: ProgPort, C: Clock>(
    updi: &mut Updi<W, P, C>,
    dl: &Deadline<C>,
) -> Result<usize> {
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
    match erase.etype {
        0x00 => updi.chip_erase(dl),
        // hosts may pass a wrong erase type; only USERROW and BOOTROW
        // page erases are honored
        0x07 => {
            erase_flash_page(updi, erase.page_addr, dl)?;
            Ok(1)
        }
        _ => Ok(1),
    }
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
