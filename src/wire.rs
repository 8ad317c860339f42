//! Single wire programming interface on RP2040 PIO
//!
//! The UPDI data line is a half duplex open drain UART (8 data bits, even
//! parity, 2 stop bits). Two PIO state machines share the data pin: SM0
//! shifts frames out by toggling the pin direction (the output register
//! stays low, releasing the pin lets the pull-up make the high level) and
//! SM1 samples every frame on the line, including our own, so the echo a
//! driver wants to verify arrives through the normal receive path.
//!
//! TPI is synchronous and slow (250 kHz); it is bit banged through the
//! stopped state machines' pin controls with the system timer pacing the
//! clock, the same way the stopped machine drives the connect sequences.
//!
// Copyright (C) 2026 Stephan <kiffie@mailbox.org>
// SPDX-License-Identifier: GPL-2.0-or-later

use avrprobe_core::link::{Clock, ProgWire, WireMode};
use avrprobe_core::timeout::Deadline;
use avrprobe_core::{Error, Result};
use heapless::Deque;
use log::debug;
use rp2040_hal::pac;
use rp2040_hal::pac::RESETS;
use rp2040_hal::pio::{
    InstalledProgram, PIOBuilder, PIOExt, PinDir, PinState, Running, Rx, ShiftDirection,
    StateMachine, Stopped, Tx, UninitStateMachine, SM0, SM1,
};
use system_timer::{Duration, Instant, SystemTimer};

const SYS_CLOCK_HZ: u32 = 125_000_000;

/// PIO cycles per bit in the UART programs.
const CYCLES_PER_BIT: u32 = 4;

/// Frame length on the wire: start, 8 data, parity, 2 stop bits.
const FRAME_BITS: u32 = 12;

struct Uart<P: PIOExt> {
    tx_sm: StateMachine<(P, SM0), Running>,
    tx: Tx<(P, SM0)>,
    tx_dump: Rx<(P, SM0)>,
    tx_wrap: u8,
    rx_sm: StateMachine<(P, SM1), Running>,
    rx: Rx<(P, SM1)>,
    rx_feed: Tx<(P, SM1)>,
}

struct Parked<P: PIOExt> {
    tx_sm: StateMachine<(P, SM0), Stopped>,
    tx: Tx<(P, SM0)>,
    tx_dump: Rx<(P, SM0)>,
    tx_wrap: u8,
    rx_sm: StateMachine<(P, SM1), Stopped>,
    rx: Rx<(P, SM1)>,
    rx_feed: Tx<(P, SM1)>,
}

impl<P: PIOExt> Uart<P> {
    /// Block until the transmitter has shifted out everything queued.
    fn flush(&mut self) {
        while !self.tx.is_empty() || self.tx_sm.instruction_address() != self.tx_wrap as u32 {}
    }

    fn park(mut self) -> Parked<P> {
        self.flush();
        Parked {
            tx_sm: self.tx_sm.stop(),
            tx: self.tx,
            tx_dump: self.tx_dump,
            tx_wrap: self.tx_wrap,
            rx_sm: self.rx_sm.stop(),
            rx: self.rx,
            rx_feed: self.rx_feed,
        }
    }
}

impl<P: PIOExt> Parked<P> {
    fn start(self) -> Uart<P> {
        Uart {
            tx_sm: self.tx_sm.start(),
            tx: self.tx,
            tx_dump: self.tx_dump,
            tx_wrap: self.tx_wrap,
            rx_sm: self.rx_sm.start(),
            rx: self.rx,
            rx_feed: self.rx_feed,
        }
    }
}

pub struct Rp2040Wire<P: PIOExt> {
    pdat: u8,
    pclk: u8,
    mode: WireMode,
    khz: u16,
    /// Bit rate the state machines were last built for.
    built_khz: u16,
    uart: Option<Uart<P>>,
    parked: Option<Parked<P>>,
    /// Loopback of bit banged TPI frames.
    echo: Deque<u8, 16>,
}

impl<P: PIOExt> Rp2040Wire<P> {
    pub fn new(piox: P, pdat: u8, pclk: u8, resets: &mut RESETS) -> Rp2040Wire<P> {
        let (mut pio, sm0, sm1, _, _) = piox.split(resets);

        // Transmitter: one frame bit per FIFO bit, shifted out LSB first
        // onto the pin direction register. The caller inverts the frame so
        // that 1 means "drive low". An empty FIFO stalls the `out` with the
        // stop bit on the line.
        let mut a = pio::Assembler::<32>::new();
        let mut tx_wrap_target = a.label();
        let mut tx_wrap_source = a.label();
        a.bind(&mut tx_wrap_target);
        a.out_with_delay(pio::OutDestination::PINDIRS, 1, (CYCLES_PER_BIT - 1) as u8);
        a.bind(&mut tx_wrap_source);
        let tx_program = a.assemble_with_wrap(tx_wrap_source, tx_wrap_target);
        let tx_installed = pio.install(&tx_program).unwrap();

        // Receiver: arm on the falling start bit edge, sample 8 data bits
        // and the parity bit in the bit middle, push, then resynchronize on
        // the stop level.
        let mut a = pio::Assembler::<32>::new();
        let mut rx_wrap_target = a.label();
        let mut rx_wrap_source = a.label();
        let mut rx_bitloop = a.label();
        a.bind(&mut rx_wrap_target);
        a.wait(0, pio::WaitSource::PIN, 0, false);
        a.set_with_delay(pio::SetDestination::X, 8, CYCLES_PER_BIT as u8);
        a.bind(&mut rx_bitloop);
        a.in_with_delay(pio::InSource::PINS, 1, (CYCLES_PER_BIT - 2) as u8);
        a.jmp(pio::JmpCondition::XDecNonZero, &mut rx_bitloop);
        a.push(false, false);
        a.wait(1, pio::WaitSource::PIN, 0, false);
        a.bind(&mut rx_wrap_source);
        let rx_program = a.assemble_with_wrap(rx_wrap_source, rx_wrap_target);
        let rx_installed = pio.install(&rx_program).unwrap();

        let mut wire = Rp2040Wire {
            pdat,
            pclk,
            mode: WireMode::Off,
            khz: 225,
            built_khz: 225,
            uart: None,
            parked: None,
            echo: Deque::new(),
        };
        let parked = wire.init_sm(sm0, tx_installed, sm1, rx_installed, wire.khz);
        wire.parked = Some(parked);
        wire
    }

    fn init_sm(
        &self,
        tx_usm: UninitStateMachine<(P, SM0)>,
        tx_prog: InstalledProgram<P>,
        rx_usm: UninitStateMachine<(P, SM1)>,
        rx_prog: InstalledProgram<P>,
        khz: u16,
    ) -> Parked<P> {
        // One bit takes CYCLES_PER_BIT PIO cycles; round the divider up to
        // stay at or below the requested bit rate.
        let bit_hz = (khz as u32).max(1) * 1000;
        let clock_div = 1 + (SYS_CLOCK_HZ - 1) / bit_hz / CYCLES_PER_BIT;
        debug!(
            "wire clock: requested = {} kHz, real = {} kHz, div = {}",
            khz,
            SYS_CLOCK_HZ / clock_div / CYCLES_PER_BIT / 1000,
            clock_div
        );
        let tx_wrap = tx_prog.wrap_target();

        let (mut tx_sm, tx_dump, tx) = PIOBuilder::from_program(tx_prog)
            .out_pins(self.pdat, 1)
            .clock_divisor(clock_div as f32)
            .autopull(true)
            .pull_threshold(FRAME_BITS as u8)
            .out_shift_direction(ShiftDirection::Right)
            .build(tx_usm);
        // data low when the direction register selects output
        tx_sm.set_pins([(self.pdat, PinState::Low)]);
        tx_sm.set_pindirs([(self.pdat, PinDir::Input), (self.pclk, PinDir::Input)]);

        let (rx_sm, rx, rx_feed) = PIOBuilder::from_program(rx_prog)
            .in_pin_base(self.pdat)
            .clock_divisor(clock_div as f32)
            .autopush(false)
            .in_shift_direction(ShiftDirection::Right)
            .build(rx_usm);

        Parked {
            tx_sm,
            tx,
            tx_dump,
            tx_wrap,
            rx_sm,
            rx,
            rx_feed,
        }
    }

    /// Rebuild both state machines for a new bit rate. Any mode ends up
    /// parked; the caller restarts the UART when needed.
    fn reinit_sm(&mut self, khz: u16) {
        let parked = match (self.uart.take(), self.parked.take()) {
            (Some(uart), None) => uart.park(),
            (None, Some(parked)) => parked,
            _ => unreachable!(),
        };
        let (tx_usm, tx_prog) = parked.tx_sm.uninit(parked.tx_dump, parked.tx);
        let (rx_usm, rx_prog) = parked.rx_sm.uninit(parked.rx, parked.rx_feed);
        let parked = self.init_sm(tx_usm, tx_prog, rx_usm, rx_prog, khz);
        self.parked = Some(parked);
        self.built_khz = khz;
    }

    fn tpi_half_period(&self) -> Duration {
        Duration::from_micros((500 / self.khz.max(1) as u32).max(1) as u64)
    }

    fn line_level(&self) -> bool {
        let sio = unsafe { pac::Peripherals::steal().SIO };
        sio.gpio_in.read().bits() & (1 << self.pdat) != 0
    }

    /// One bit banged TPI clock cycle. `bit == None` releases the data pin;
    /// returns the line level sampled after the rising edge.
    fn tpi_clock_bit(&mut self, bit: Option<bool>) -> bool {
        let half = self.tpi_half_period();
        let pdat = self.pdat;
        let pclk = self.pclk;
        let sm = &mut self.parked.as_mut().unwrap().rx_sm;
        sm.set_pins([(pclk, PinState::Low)]);
        match bit {
            Some(false) => sm.set_pindirs([(pdat, PinDir::Output)]),
            Some(true) | None => sm.set_pindirs([(pdat, PinDir::Input)]),
        }
        SystemTimer::wait(half);
        sm.set_pins([(pclk, PinState::High)]);
        SystemTimer::wait(half);
        self.line_level()
    }

    /// Shift one TPI frame out and capture its loopback.
    fn tpi_write_frame(&mut self, data: u8) {
        let parity = (data.count_ones() & 1) as u16;
        let frame = (data as u16) << 1 | parity << 9 | 0b11 << 10;
        let mut echo = 0u16;
        for i in 0..FRAME_BITS as u16 {
            let level = self.tpi_clock_bit(Some(frame >> i & 1 != 0));
            if level {
                echo |= 1 << i;
            }
        }
        let pdat = self.pdat;
        let sm = &mut self.parked.as_mut().unwrap().rx_sm;
        sm.set_pindirs([(pdat, PinDir::Input)]);
        self.echo.push_back((echo >> 1) as u8).ok();
    }

    /// Clock the target until it transmits one frame.
    fn tpi_read_frame<C: Clock>(&mut self, deadline: &Deadline<C>) -> Result<u8> {
        // hunt for the start bit
        loop {
            if !self.tpi_clock_bit(None) {
                break;
            }
            deadline.check()?;
        }
        let mut bits = 0u16;
        for i in 0..9 {
            if self.tpi_clock_bit(None) {
                bits |= 1 << i;
            }
        }
        // stop bits
        self.tpi_clock_bit(None);
        self.tpi_clock_bit(None);
        let data = (bits & 0xff) as u8;
        if data.count_ones() & 1 != (bits >> 8 & 1) as u32 {
            return Err(Error::Parity);
        }
        Ok(data)
    }

    /// Queue one 12 bit UART frame, inverted for the direction register.
    fn uart_write_frame(&mut self, data: u8) {
        let parity = (data.count_ones() & 1) as u32;
        let frame = (data as u32) << 1 | parity << 9 | 0b11 << 10;
        let dirs = !frame & 0xfff;
        let uart = self.uart.as_mut().unwrap();
        while !uart.tx.write(dirs) {}
    }

    /// Hold the line low for `frames` frame times, then idle one frame.
    fn uart_break(&mut self, frames: u32) {
        let uart = self.uart.as_mut().unwrap();
        for _ in 0..frames {
            while !uart.tx.write(0xfff) {}
        }
        while !uart.tx.write(0x000) {}
        uart.flush();
        // consume the loopback of the break, which the receiver sees as
        // 0x00 frames
        while uart.rx.read().is_some() {}
    }
}

impl<P: PIOExt> ProgWire for Rp2040Wire<P> {
    fn set_mode(&mut self, mode: WireMode) {
        if mode == self.mode {
            return;
        }
        debug!("wire mode {:?} -> {:?}", self.mode, mode);
        // leave the current mode with both machines parked and all pins
        // released
        if let Some(uart) = self.uart.take() {
            self.parked = Some(uart.park());
        }
        let pdat = self.pdat;
        let pclk = self.pclk;
        let parked = self.parked.as_mut().unwrap();
        parked
            .rx_sm
            .set_pindirs([(pdat, PinDir::Input), (pclk, PinDir::Input)]);
        self.echo.clear();
        match mode {
            WireMode::Off => {}
            WireMode::Updi => {
                if self.built_khz != self.khz {
                    self.reinit_sm(self.khz);
                }
                let parked = self.parked.take().unwrap();
                let mut uart = parked.start();
                while uart.rx.read().is_some() {}
                self.uart = Some(uart);
            }
            WireMode::Tpi => {
                let parked = self.parked.as_mut().unwrap();
                parked.rx_sm.set_pins([(pclk, PinState::Low)]);
                parked.rx_sm.set_pindirs([(pclk, PinDir::Output)]);
            }
        }
        self.mode = mode;
    }

    fn set_clock_khz(&mut self, khz: u16) {
        if khz == self.khz {
            return;
        }
        self.khz = khz;
        match self.mode {
            WireMode::Updi => {
                self.reinit_sm(khz);
                let parked = self.parked.take().unwrap();
                self.uart = Some(parked.start());
            }
            // bit banged; the next clock cycle uses the new period
            WireMode::Tpi => {}
            WireMode::Off => {}
        }
    }

    fn write_byte(&mut self, data: u8) {
        match self.mode {
            WireMode::Updi => self.uart_write_frame(data),
            WireMode::Tpi => self.tpi_write_frame(data),
            WireMode::Off => {}
        }
    }

    fn read_byte<C: Clock>(&mut self, deadline: &Deadline<C>) -> Result<u8> {
        match self.mode {
            WireMode::Updi => loop {
                let uart = self.uart.as_mut().unwrap();
                if let Some(word) = uart.rx.read() {
                    let bits = word >> 23;
                    let data = (bits & 0xff) as u8;
                    if data.count_ones() & 1 != bits >> 8 & 1 {
                        return Err(Error::Parity);
                    }
                    return Ok(data);
                }
                deadline.check()?;
            },
            WireMode::Tpi => {
                if let Some(byte) = self.echo.pop_front() {
                    return Ok(byte);
                }
                self.tpi_read_frame(deadline)
            }
            WireMode::Off => Err(Error::Timeout),
        }
    }

    fn drain(&mut self) {
        match self.mode {
            WireMode::Updi => {
                let uart = self.uart.as_mut().unwrap();
                uart.flush();
                while uart.rx.read().is_some() {}
            }
            _ => self.echo.clear(),
        }
    }

    fn send_break(&mut self, long: bool) {
        if self.mode != WireMode::Updi {
            return;
        }
        if long {
            // double break at a quarter of the programming clock, so a
            // target still running a slow guard time sees it
            let khz = self.khz;
            self.reinit_sm((khz / 4).max(1));
            self.uart = Some(self.parked.take().unwrap().start());
            self.uart_break(2);
            self.uart_break(2);
            self.reinit_sm(khz);
            self.uart = Some(self.parked.take().unwrap().start());
        } else {
            self.uart_break(1);
        }
    }

    fn idle_clocks(&mut self, n: u8) {
        if self.mode != WireMode::Tpi {
            return;
        }
        for _ in 0..n {
            self.tpi_clock_bit(None);
        }
    }
}

/// System timer backed [`Clock`] for the protocol core.
#[derive(Clone, Copy)]
pub struct SysClock;

impl Clock for SysClock {
    fn now_us(&self) -> u64 {
        Instant::now().micros()
    }

    fn delay_us(&self, us: u32) {
        SystemTimer::wait(Duration::from_micros(us as u64));
    }
}
