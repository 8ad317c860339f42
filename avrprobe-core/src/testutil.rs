//! Scripted mocks for host side tests
//!
// Copyright (C) 2026 Stephan <kiffie@mailbox.org>
// SPDX-License-Identifier: GPL-2.0-or-later

use crate::link::{Clock, ProgPort, ProgWire, WireMode};
use crate::timeout::Deadline;
use crate::{Error, Result};
use std::cell::Cell;
use std::collections::VecDeque;

/// Test clock over a shared microsecond counter.
#[derive(Clone, Copy)]
pub struct MockClock<'a> {
    time_us: &'a Cell<u64>,
}

impl<'a> MockClock<'a> {
    pub fn new(time_us: &'a Cell<u64>) -> MockClock<'a> {
        MockClock { time_us }
    }
}

impl Clock for MockClock<'_> {
    fn now_us(&self) -> u64 {
        self.time_us.get()
    }

    fn delay_us(&self, us: u32) {
        self.time_us.set(self.time_us.get() + us as u64);
    }
}

/// Scripted wire. Written frames are recorded and looped back as echo, the
/// way the single wire interface behaves electrically; bytes the "target"
/// answers with are queued by the test in `device`.
pub struct MockWire {
    pub sent: Vec<u8>,
    echo: VecDeque<u8>,
    pub device: VecDeque<u8>,
    pub breaks: Vec<bool>,
    pub idle_clocks: Vec<u8>,
    pub mode: WireMode,
    pub clock_khz: u16,
    /// Corrupt the echo of the n-th written frame (0-based).
    pub corrupt_echo_at: Option<usize>,
}

impl MockWire {
    pub fn new() -> MockWire {
        MockWire {
            sent: Vec::new(),
            echo: VecDeque::new(),
            device: VecDeque::new(),
            breaks: Vec::new(),
            idle_clocks: Vec::new(),
            mode: WireMode::Off,
            clock_khz: 0,
            corrupt_echo_at: None,
        }
    }

    pub fn respond(&mut self, bytes: &[u8]) {
        self.device.extend(bytes.iter().copied());
    }
}

impl ProgWire for MockWire {
    fn set_mode(&mut self, mode: WireMode) {
        self.mode = mode;
    }

    fn set_clock_khz(&mut self, khz: u16) {
        self.clock_khz = khz;
    }

    fn write_byte(&mut self, data: u8) {
        let n = self.sent.len();
        self.sent.push(data);
        let echo = if self.corrupt_echo_at == Some(n) {
            !data
        } else {
            data
        };
        self.echo.push_back(echo);
    }

    fn read_byte<C: Clock>(&mut self, _deadline: &Deadline<C>) -> Result<u8> {
        if let Some(b) = self.echo.pop_front() {
            Ok(b)
        } else if let Some(b) = self.device.pop_front() {
            Ok(b)
        } else {
            Err(Error::Timeout)
        }
    }

    fn drain(&mut self) {
        // only the looped back frames are "in" the receiver; queued device
        // bytes model future transmissions
        self.echo.clear();
    }

    fn send_break(&mut self, long: bool) {
        self.breaks.push(long);
    }

    fn idle_clocks(&mut self, n: u8) {
        self.idle_clocks.push(n);
    }
}

/// Port mock recording pin and power activity.
pub struct MockPort {
    pub reset_low: bool,
    pub reset_pulses: u32,
    pub power_resets: u32,
    pub power_on: bool,
    pub hv_on: bool,
    pub vdd_mv: u16,
}

impl MockPort {
    pub fn new() -> MockPort {
        MockPort {
            reset_low: false,
            reset_pulses: 0,
            power_resets: 0,
            power_on: true,
            hv_on: false,
            vdd_mv: 3300,
        }
    }
}

impl ProgPort for MockPort {
    fn reset_assert(&mut self) {
        self.reset_low = true;
    }

    fn reset_release(&mut self) {
        if self.reset_low {
            self.reset_pulses += 1;
        }
        self.reset_low = false;
    }

    fn power_reset(&mut self) {
        self.power_resets += 1;
    }

    fn power_switch(&mut self, on: bool) {
        self.power_on = on;
    }

    fn hv_enable(&mut self, on: bool) {
        self.hv_on = on;
    }

    fn vdd_millivolts(&mut self) -> u16 {
        self.vdd_mv
    }
}
