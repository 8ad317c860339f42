//! JTAGICE3 packet layout
//!
//! One command packet per EDBG transfer: a start token, a little endian
//! sequence number, the destination scope and the command byte, followed by
//! command specific fields at fixed offsets. Responses echo the sequence and
//! scope and carry a 16 bit result code ahead of the payload. The TPI scope
//! deviates from the rest of the protocol and uses big endian fields.
//!
// Copyright (C) 2026 Stephan <kiffie@mailbox.org>
// SPDX-License-Identifier: GPL-2.0-or-later

use byteorder::{BigEndian, ByteOrder, LittleEndian};

/// Start of packet token.
pub const TOKEN: u8 = 0x0e;

/// Largest command packet (9 EDBG fragments of 60 octets).
pub const MAX_PACKET: usize = 540;

/// Response payload offset; the result code sits at offsets 4..6.
pub const RSP_DATA: usize = 6;

/// Destination scopes.
pub mod scope {
    /// Probe housekeeping: version, voltages, physical parameters.
    pub const GENERAL: u8 = 0x01;
    /// AVR programming (UPDI and PDI architectures).
    pub const AVR: u8 = 0x12;
    /// TPI programming, XPRG framing.
    pub const AVR_TPI: u8 = 0x14;
    /// EDBG control, e.g. the target power switch.
    pub const EDBG: u8 = 0x20;
}

/// Commands shared by the general and AVR scopes.
pub mod cmd {
    pub const SET_PARAM: u8 = 0x01;
    pub const GET_PARAM: u8 = 0x02;
    pub const SIGN_ON: u8 = 0x10;
    pub const SIGN_OFF: u8 = 0x11;
    pub const ENTER_PROGMODE: u8 = 0x15;
    pub const LEAVE_PROGMODE: u8 = 0x16;
    pub const ERASE_MEMORY: u8 = 0x20;
    pub const READ_MEMORY: u8 = 0x21;
    pub const WRITE_MEMORY: u8 = 0x23;
}

/// XPRG commands and status codes of the TPI scope.
pub mod xprg {
    pub const ENTER_PROGMODE: u8 = 0x01;
    pub const LEAVE_PROGMODE: u8 = 0x02;
    pub const ERASE: u8 = 0x03;
    pub const WRITE_MEM: u8 = 0x04;
    pub const READ_MEM: u8 = 0x05;
    pub const CRC: u8 = 0x06;
    pub const SET_PARAM: u8 = 0x07;

    pub const ERR_OK: u8 = 0x00;
    pub const ERR_FAILED: u8 = 0x01;
}

/// Response result codes, stored little endian at offset 4. The high octet
/// flags a payload carrying response.
pub mod rsp {
    pub const OK: u16 = 0x0080;
    pub const DATA: u16 = 0x0184;
    pub const FAILED: u16 = 0x00a0;
}

/// Memory type selectors of the AVR scope.
pub mod mtype {
    pub const SRAM: u8 = 0x20;
    pub const EEPROM: u8 = 0x22;
    pub const FLASH_PAGE: u8 = 0xb0;
    pub const FUSES: u8 = 0xb2;
    pub const LOCKBITS: u8 = 0xb3;
    pub const SIGNATURE: u8 = 0xb4;
    pub const XMEGA_FLASH: u8 = 0xc0;
    pub const EEPROM_ATOMIC: u8 = 0xc4;
    pub const USER_SIGNATURE: u8 = 0xc5;
    /// UPDI system information block, readable before prog mode.
    pub const SIB: u8 = 0xd3;
}

/// Parameter sections and indexes of the AVR scope.
pub mod avr_param {
    pub const SECTION_SESSION: u8 = 0;
    pub const IDX_ARCH: u8 = 0;
    pub const IDX_PURPOSE: u8 = 1;

    pub const SECTION_PHYSICAL: u8 = 1;
    pub const IDX_CONNECTION: u8 = 0;
    pub const IDX_CLK_XMEGA_PDI: u8 = 0x31;

    pub const SECTION_DEVICE: u8 = 2;
    pub const IDX_DESCRIPTOR: u8 = 0;

    pub const SECTION_OPTIONS: u8 = 3;
    pub const IDX_HV_UPDI_ENABLE: u8 = 6;
    pub const IDX_CHIP_ERASE_TO_ENTER: u8 = 7;

    pub const ARCH_XMEGA: u8 = 3;
    pub const ARCH_UPDI: u8 = 5;
    pub const CONN_UPDI: u8 = 8;
}

/// Parameter indexes of the EDBG scope.
pub mod edbg_param {
    pub const SECTION_CONTROL: u8 = 0;
    pub const IDX_TARGET_POWER: u8 = 0x10;
}

const OFF_SEQUENCE: usize = 2;
const OFF_SCOPE: usize = 4;
const OFF_CMD: usize = 5;

const OFF_PARAM_SECTION: usize = 7;
const OFF_PARAM_INDEX: usize = 8;
const OFF_PARAM_LENGTH: usize = 9;
const OFF_PARAM_DATA: usize = 10;

const OFF_MEM_TYPE: usize = 7;
const OFF_MEM_ADDR: usize = 8;
const OFF_MEM_LENGTH: usize = 12;
const OFF_MEM_DATA: usize = 17;

const OFF_ERASE_TYPE: usize = 7;
const OFF_ERASE_ADDR: usize = 8;

const OFF_TPI_TYPE: usize = 6;
const OFF_TPI_VALUE: usize = 7;
const OFF_TPI_RD_ADDR: usize = 7;
const OFF_TPI_RD_LENGTH: usize = 11;
const OFF_TPI_WR_ADDR: usize = 8;
const OFF_TPI_WR_LENGTH: usize = 12;
const OFF_TPI_WR_DATA: usize = 14;

/// Read only view of a reassembled command packet. `buf` is the full
/// reassembly buffer; `len` the octet count actually received.
pub struct Request<'a> {
    buf: &'a [u8],
    len: usize,
}

/// Memory read/write fields of the AVR scope.
pub struct MemoryReq<'a> {
    pub mtype: u8,
    pub addr: u32,
    pub len: usize,
    pub data: &'a [u8],
}

/// Erase fields of the AVR scope.
pub struct EraseReq {
    pub etype: u8,
    pub page_addr: u32,
}

/// Parameter get/set fields.
pub struct ParamReq<'a> {
    pub section: u8,
    pub index: u8,
    pub length: u8,
    pub value: u16,
    pub data: &'a [u8],
}

/// Memory fields of the TPI scope (big endian).
pub struct TpiMemoryReq<'a> {
    pub mtype: u8,
    pub addr: u32,
    pub len: usize,
    pub data: &'a [u8],
}

impl<'a> Request<'a> {
    pub fn new(buf: &'a [u8], len: usize) -> Request<'a> {
        Request { buf, len }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn token(&self) -> u8 {
        self.buf[0]
    }

    pub fn sequence(&self) -> u16 {
        LittleEndian::read_u16(&self.buf[OFF_SEQUENCE..])
    }

    pub fn scope(&self) -> u8 {
        self.buf[OFF_SCOPE]
    }

    pub fn cmd(&self) -> u8 {
        self.buf[OFF_CMD]
    }

    pub fn memory(&self) -> MemoryReq<'a> {
        let len = LittleEndian::read_u32(&self.buf[OFF_MEM_LENGTH..]) as usize;
        let len = len.min(self.buf.len() - OFF_MEM_DATA);
        MemoryReq {
            mtype: self.buf[OFF_MEM_TYPE],
            addr: LittleEndian::read_u32(&self.buf[OFF_MEM_ADDR..]),
            len,
            data: &self.buf[OFF_MEM_DATA..OFF_MEM_DATA + len],
        }
    }

    pub fn erase(&self) -> EraseReq {
        EraseReq {
            etype: self.buf[OFF_ERASE_TYPE],
            page_addr: LittleEndian::read_u32(&self.buf[OFF_ERASE_ADDR..]),
        }
    }

    pub fn param(&self) -> ParamReq<'a> {
        ParamReq {
            section: self.buf[OFF_PARAM_SECTION],
            index: self.buf[OFF_PARAM_INDEX],
            length: self.buf[OFF_PARAM_LENGTH],
            value: LittleEndian::read_u16(&self.buf[OFF_PARAM_DATA..]),
            data: &self.buf[OFF_PARAM_DATA..],
        }
    }

    /// First two option octets of an XPRG command.
    pub fn tpi_option(&self) -> (u8, u8) {
        (self.buf[OFF_TPI_TYPE], self.buf[OFF_TPI_VALUE])
    }

    pub fn tpi_read(&self) -> TpiMemoryReq<'a> {
        let len = BigEndian::read_u16(&self.buf[OFF_TPI_RD_LENGTH..]) as usize;
        TpiMemoryReq {
            mtype: self.buf[OFF_TPI_TYPE],
            addr: BigEndian::read_u32(&self.buf[OFF_TPI_RD_ADDR..]),
            len,
            data: &[],
        }
    }

    pub fn tpi_write(&self) -> TpiMemoryReq<'a> {
        let len = BigEndian::read_u16(&self.buf[OFF_TPI_WR_LENGTH..]) as usize;
        let len = len.min(self.buf.len() - OFF_TPI_WR_DATA);
        TpiMemoryReq {
            mtype: self.buf[OFF_TPI_TYPE],
            addr: BigEndian::read_u32(&self.buf[OFF_TPI_WR_ADDR..]),
            len,
            data: &self.buf[OFF_TPI_WR_DATA..OFF_TPI_WR_DATA + len],
        }
    }
}

/// Write view of the response buffer. Handlers fill the payload and the
/// result code; [`Response::finish`] frames the packet.
pub struct Response<'a> {
    buf: &'a mut [u8],
}

impl<'a> Response<'a> {
    pub fn new(buf: &'a mut [u8]) -> Response<'a> {
        Response { buf }
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.buf[RSP_DATA..]
    }

    pub fn set_status(&mut self, code: u16) {
        LittleEndian::write_u16(&mut self.buf[4..], code);
    }

    /// TPI responses echo the command octet and carry an XPRG status
    /// instead of a result code.
    pub fn set_xprg_status(&mut self, cmd: u8, err: u8) {
        self.buf[4] = cmd;
        self.buf[5] = err;
    }

    /// Complete the framing around a handler result of `size` octets
    /// (result code octet plus payload). Returns the total packet length.
    pub fn finish(&mut self, sequence: u16, scope: u8, size: usize) -> usize {
        self.buf[0] = TOKEN;
        LittleEndian::write_u16(&mut self.buf[1..], sequence);
        self.buf[3] = scope;
        // end of transmission marker; coincides with the zero aux octet
        // for payload-free responses
        self.buf[5 + size] = 0;
        6 + size
    }
}
