//! Hardware abstraction of the programming wire and the target port
//!
// Copyright (C) 2026 Stephan <kiffie@mailbox.org>
// SPDX-License-Identifier: GPL-2.0-or-later

use crate::timeout::Deadline;
use crate::Result;

/// Monotonic time source. Implementations are cheap handles that can be
/// copied into deadlines and drivers.
pub trait Clock: Copy {
    /// Microseconds since some fixed point in the past.
    fn now_us(&self) -> u64;

    /// Busy wait.
    fn delay_us(&self, us: u32);

    fn delay_ms(&self, ms: u32) {
        self.delay_us(ms.saturating_mul(1000));
    }
}

/// Electrical mode of the shared data line.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WireMode {
    /// Line released; the pins may be used by the serial bridge.
    Off,
    /// Single wire asynchronous, 8 data bits, even parity, 2 stop bits.
    Updi,
    /// Half duplex synchronous with a dedicated clock line.
    Tpi,
}

/// Byte level access to the single wire interface.
///
/// Frames written to the wire are looped back by the electrical interface;
/// callers read the echo themselves when they need to verify it.
pub trait ProgWire {
    fn set_mode(&mut self, mode: WireMode);

    /// Set the programming clock (bit rate) in kHz.
    fn set_clock_khz(&mut self, khz: u16);

    /// Shift one frame out. Returns when the frame is queued, not when it
    /// is on the wire.
    fn write_byte(&mut self, data: u8);

    /// Receive one frame, waiting no longer than the deadline allows.
    ///
    /// `Err(Error::Parity)` reports a parity or framing error; the bad
    /// frame is consumed.
    fn read_byte<C: Clock>(&mut self, deadline: &Deadline<C>) -> Result<u8>;

    /// Discard everything in the receiver.
    fn drain(&mut self);

    /// Drive the line low for longer than one frame. The long form slows
    /// down to a quarter of the programming clock first, which is the
    /// double break a UPDI target in any state recognizes.
    fn send_break(&mut self, long: bool);

    /// TPI only: emit idle clock cycles with the data line released.
    fn idle_clocks(&mut self, n: u8);
}

/// Target side controls that are not the data line.
pub trait ProgPort {
    /// Drive the target reset line low (open drain).
    fn reset_assert(&mut self);

    /// Release the target reset line.
    fn reset_release(&mut self);

    /// Power cycle the target supply if the board can switch it.
    fn power_reset(&mut self);

    /// Switch the target supply on or off.
    fn power_switch(&mut self, on: bool);

    /// Engage or release the high voltage pulse circuit. Boards without
    /// one ignore this.
    fn hv_enable(&mut self, _on: bool) {}

    /// Measured target supply voltage in millivolts.
    fn vdd_millivolts(&mut self) -> u16;
}
