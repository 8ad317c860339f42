//! Live reconfiguration of the bridge UART from CDC line coding
//!
//! The HAL only changes the UART format while the UART is disabled, which
//! would drop characters in flight. The PL011 can take new dividers and a
//! new line control value while enabled, so the registers are written
//! directly; the line control write also latches the dividers.
//!
// Copyright (C) 2026 Stephan <kiffie@mailbox.org>
// SPDX-License-Identifier: GPL-2.0-or-later

use fugit::HertzU32;
use rp2040_hal::pac::{Peripherals, UART0, UART1};
use rp2040_hal::uart::{Enabled, UartDevice, UartPeripheral, ValidUartPinout};
use usbd_serial::{LineCoding, ParityType, StopBits};

#[derive(Debug)]
pub enum Error {
    /// Divider overflow or an unrepresentable format
    BadArgument,
}

pub trait UartConfigExt {
    /// Apply baud rate, data bits, parity and stop bits from a CDC
    /// SET_LINE_CODING request. Returns the actual baud rate.
    fn apply_line_coding(
        &mut self,
        coding: &LineCoding,
        frequency: HertzU32,
    ) -> Result<HertzU32, Error>;
}

impl<P: ValidUartPinout<UART0>> UartConfigExt for UartPeripheral<Enabled, UART0, P> {
    fn apply_line_coding(
        &mut self,
        coding: &LineCoding,
        frequency: HertzU32,
    ) -> Result<HertzU32, Error> {
        let mut uart0 = unsafe { Peripherals::steal().UART0 };
        configure(&mut uart0, coding, frequency)
    }
}

impl<P: ValidUartPinout<UART1>> UartConfigExt for UartPeripheral<Enabled, UART1, P> {
    fn apply_line_coding(
        &mut self,
        coding: &LineCoding,
        frequency: HertzU32,
    ) -> Result<HertzU32, Error> {
        let mut uart1 = unsafe { Peripherals::steal().UART1 };
        configure(&mut uart1, coding, frequency)
    }
}

/// The PL011 supports a fractional baud rate divider. From the wanted
/// baudrate, we calculate the divider's two parts: integer and fractional.
fn calculate_baudrate_dividers(
    wanted_baudrate: u32,
    frequency: HertzU32,
) -> Result<(u16, u16), Error> {
    if wanted_baudrate == 0 {
        return Err(Error::BadArgument);
    }
    let baudrate_div = frequency
        .to_Hz()
        .checked_mul(8)
        .and_then(|r| r.checked_div(wanted_baudrate))
        .ok_or(Error::BadArgument)?;

    Ok(match (baudrate_div >> 7, ((baudrate_div & 0x7F) + 1) / 2) {
        (0, _) => (1, 0),

        (int_part, _) if int_part >= 65535 => (65535, 0),

        (int_part, frac_part) => (int_part as u16, frac_part as u16),
    })
}

fn configure<U: UartDevice>(
    device: &mut U,
    coding: &LineCoding,
    frequency: HertzU32,
) -> Result<HertzU32, Error> {
    let (baud_div_int, baud_div_frac) = calculate_baudrate_dividers(coding.data_rate(), frequency)?;

    // WLEN encodes 5..8 data bits as 0..3
    let wlen = match coding.data_bits() {
        5..=8 => coding.data_bits() - 5,
        _ => return Err(Error::BadArgument),
    };
    let (pen, eps) = match coding.parity_type() {
        ParityType::None => (false, false),
        ParityType::Odd => (true, false),
        ParityType::Event => (true, true),
        _ => return Err(Error::BadArgument),
    };
    // the PL011 cannot generate 1.5 stop bits
    let stp2 = match coding.stop_bits() {
        StopBits::One => false,
        StopBits::Two => true,
        StopBits::OnePointFive => return Err(Error::BadArgument),
    };

    device.uartibrd.write(|w| unsafe {
        w.baud_divint().bits(baud_div_int);
        w
    });
    device.uartfbrd.write(|w| unsafe {
        w.baud_divfrac().bits(baud_div_frac as u8);
        w
    });

    // one write sets the format and latches the dividers; keep the FIFOs
    // enabled
    device.uartlcr_h.write(|w| unsafe {
        w.wlen().bits(wlen);
        w.pen().bit(pen);
        w.eps().bit(eps);
        w.stp2().bit(stp2);
        w.fen().set_bit();
        w
    });

    Ok(HertzU32::from_raw(
        (4 * frequency.to_Hz()) / (64 * baud_div_int as u32 + baud_div_frac as u32),
    ))
}
