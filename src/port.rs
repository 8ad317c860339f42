//! Target side controls: reset line, power switch, supply measurement
//!
// Copyright (C) 2026 Stephan <kiffie@mailbox.org>
// SPDX-License-Identifier: GPL-2.0-or-later

use avrprobe_core::link::ProgPort;
use embedded_hal::digital::v2::OutputPin;
use log::debug;
use rp2040_hal::pac;
use system_timer::{Duration, SystemTimer};

/// Settle time after switching the target supply.
const POWER_SETTLE: Duration = Duration::from_millis(25);

/// Board port built from a reset pin (open drain, emulated by toggling the
/// output enable through the SIO registers), a power switch pin and one
/// ADC channel sensing the target supply through a 1:2 divider.
///
/// The SIO output register of the reset pin must be low and the pad
/// pull-up enabled; the pin then idles released and asserts by becoming an
/// output.
pub struct BoardPort<PWR: OutputPin> {
    reset_pin: u8,
    power: PWR,
    vtg_channel: u8,
}

impl<PWR: OutputPin> BoardPort<PWR> {
    pub fn new(reset_pin: u8, power: PWR, vtg_channel: u8) -> BoardPort<PWR> {
        let sio = unsafe { pac::Peripherals::steal().SIO };
        sio.gpio_out_clr.write(|w| unsafe { w.bits(1 << reset_pin) });
        sio.gpio_oe_clr.write(|w| unsafe { w.bits(1 << reset_pin) });
        BoardPort {
            reset_pin,
            power,
            vtg_channel,
        }
    }
}

impl<PWR: OutputPin> ProgPort for BoardPort<PWR> {
    fn reset_assert(&mut self) {
        let sio = unsafe { pac::Peripherals::steal().SIO };
        sio.gpio_oe_set
            .write(|w| unsafe { w.bits(1 << self.reset_pin) });
    }

    fn reset_release(&mut self) {
        let sio = unsafe { pac::Peripherals::steal().SIO };
        sio.gpio_oe_clr
            .write(|w| unsafe { w.bits(1 << self.reset_pin) });
    }

    fn power_reset(&mut self) {
        debug!("target power cycle");
        self.power.set_low().ok();
        SystemTimer::wait(POWER_SETTLE);
        self.power.set_high().ok();
        SystemTimer::wait(POWER_SETTLE);
    }

    fn power_switch(&mut self, on: bool) {
        debug!("target power {}", if on { "on" } else { "off" });
        if on {
            self.power.set_high().ok();
        } else {
            self.power.set_low().ok();
        }
    }

    fn vdd_millivolts(&mut self) -> u16 {
        // one shot conversion; the ADC block itself is brought up in main
        let adc = unsafe { pac::Peripherals::steal().ADC };
        adc.cs.modify(|_, w| unsafe {
            w.ainsel().bits(self.vtg_channel).start_once().set_bit()
        });
        while adc.cs.read().ready().bit_is_clear() {}
        let raw = adc.result.read().result().bits() as u32;
        // 12 bit conversion against the 3.3 V rail, halved by the divider
        (raw * 2 * 3300 / 4096) as u16
    }
}
