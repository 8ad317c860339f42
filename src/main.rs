//! AvrProbe --- USB programming dongle for UPDI and TPI AVR targets
//
// Copyright (C) 2026 Stephan <kiffie@mailbox.org>
// SPDX-License-Identifier: GPL-2.0-or-later
//
#![no_std]
#![no_main]

use cfg_if::cfg_if;
use cortex_m::interrupt;
use cortex_m_rt::entry;
use log::{error, info, LevelFilter};
use panic_persist as _;

use hal::{
    adc::Adc,
    clocks::{init_clocks_and_plls, Clock},
    gpio::{FunctionPio0, FunctionUart},
    pac,
    sio::Sio,
    uart::{DataBits, StopBits, UartConfig, UartPeripheral},
    usb::UsbBus,
    watchdog::Watchdog,
    Timer,
};
use rp2040_hal as hal;

use embedded_hal::digital::v2::{InputPin, OutputPin};
use embedded_hal::watchdog::{Watchdog as _, WatchdogEnable as _};
use fugit::{ExtU32, RateExtU32};
use usb_device::class_prelude::UsbBusAllocator;
use usbd_serial::SerialPort;

use system_timer::{Duration, Instant, SystemTimer};
use usb_log::{log_buffer::LogBuffer, usb_log_channel::UsbLogChannel};

use usb_device::prelude::*;

use avrprobe_core::dispatch::Dispatcher;

mod config;
use config::Identity;

mod port;
use port::BoardPort;

mod usb;
use usb::EdbgClass;

mod vcp;
use vcp::UartConfigExt;

mod wire;
use wire::{Rp2040Wire, SysClock};

#[link_section = ".boot2"]
#[used]
pub static BOOT_LOADER: [u8; 256] = rp2040_boot2::BOOT_LOADER_W25Q080;

static LOGGER: LogBuffer<1024> = LogBuffer::new();

/// Pulse the target reset line on a 0 to 1 DTR transition.
const DTR_RESET: bool = true;

/// Status LED half periods.
const LED_IDLE: Duration = Duration::from_millis(500);
const LED_ACTIVE: Duration = Duration::from_millis(125);

#[entry]
fn main() -> ! {
    unsafe {
        log::set_logger_racy(&LOGGER).unwrap();
        log::set_max_level_racy(LevelFilter::Debug);
    }

    info!("AvrProbe v{}", env!("CARGO_PKG_VERSION"));
    info!("Build: {}", env!("BUILD_DATETIME"));
    if let Some(panic_message) = panic_persist::get_panic_message_utf8() {
        error!("Device panicked: {panic_message}");
    }
    let mut pac = pac::Peripherals::take().unwrap();
    let mut watchdog = Watchdog::new(pac.WATCHDOG);
    let sio = Sio::new(pac.SIO);

    // External high-speed crystal on the supported boards is 12Mhz
    let external_xtal_freq_hz = 12_000_000u32;
    let clocks = init_clocks_and_plls(
        external_xtal_freq_hz,
        pac.XOSC,
        pac.CLOCKS,
        pac.PLL_SYS,
        pac.PLL_USB,
        &mut pac.RESETS,
        &mut watchdog,
    )
    .ok()
    .unwrap();

    // global IRQ enable
    unsafe {
        interrupt::enable();
    }

    // System timer
    let timer = Timer::new(pac.TIMER, &mut pac.RESETS, &clocks);
    unsafe {
        SystemTimer::init(timer);
    }

    let pins = hal::gpio::Pins::new(
        pac.IO_BANK0,
        pac.PADS_BANK0,
        sio.gpio_bank0,
        &mut pac.RESETS,
    );

    // bring up the ADC block for the target voltage measurement; the
    // conversions themselves are one shot register accesses
    let _adc = Adc::new(pac.ADC, &mut pac.RESETS);

    cfg_if! {
        if #[cfg(feature = "adafruit_itsy")] {
            info!("Target board: Adafruit ItsyBitsy RP2040");
            let _pdat = pins.gpio2.into_function::<FunctionPio0>();
            let _pclk = pins.gpio3.into_function::<FunctionPio0>();
            let _nrst = pins.gpio6.into_pull_up_input();
            let _vtg = pins.gpio26.into_floating_input();

            // weak pull-ups for the data and reset lines
            let pad = unsafe { pac::Peripherals::steal() };
            pad.PADS_BANK0.gpio[2].write(|w| w.pde().bit(false).pue().bit(true));
            pad.PADS_BANK0.gpio[6].write(|w| w.pde().bit(false).pue().bit(true));

            let wire = Rp2040Wire::new(pac.PIO0, 2, 3, &mut pac.RESETS);
            let power_pin = pins.gpio7.into_push_pull_output_in_state(hal::gpio::PinState::High);
            let board_port = BoardPort::new(6, power_pin, 0);

            let mut led_pin = pins.gpio11.into_push_pull_output();
            let button_pin = pins.gpio12.into_pull_up_input();

            // UART
            let uart_pins = (
                pins.gpio20.into_function::<FunctionUart>(), // TX
                pins.gpio5.into_function::<FunctionUart>(), // RX
            );
            let mut uart = UartPeripheral::new(pac.UART1, uart_pins, &mut pac.RESETS)
                .enable(
                    UartConfig::new(115200u32.Hz(), DataBits::Eight, None, StopBits::One),
                    clocks.peripheral_clock.freq(),
                )
                .unwrap();
        } else if #[cfg(feature = "adafruit_qt")] {
            info!("Target board: Adafruit QT Py RP2040");
            let _pdat = pins.gpio6.into_function::<FunctionPio0>();
            let _pclk = pins.gpio4.into_function::<FunctionPio0>();
            let _nrst = pins.gpio3.into_pull_up_input();
            let _vtg = pins.gpio29.into_floating_input();

            // weak pull-ups for the data and reset lines
            let pad = unsafe { pac::Peripherals::steal() };
            pad.PADS_BANK0.gpio[6].write(|w| w.pde().bit(false).pue().bit(true));
            pad.PADS_BANK0.gpio[3].write(|w| w.pde().bit(false).pue().bit(true));

            let wire = Rp2040Wire::new(pac.PIO0, 6, 4, &mut pac.RESETS);
            let power_pin = pins.gpio7.into_push_pull_output_in_state(hal::gpio::PinState::High);
            let board_port = BoardPort::new(3, power_pin, 3);

            let mut led_pin = pins.gpio8.into_push_pull_output();
            let button_pin = pins.gpio21.into_pull_up_input();

            // UART
            let uart_pins = (
                pins.gpio20.into_function::<FunctionUart>(), // TX
                pins.gpio5.into_function::<FunctionUart>(), // RX
            );
            let mut uart = UartPeripheral::new(pac.UART1, uart_pins, &mut pac.RESETS)
                .enable(
                    UartConfig::new(115200u32.Hz(), DataBits::Eight, None, StopBits::One),
                    clocks.peripheral_clock.freq(),
                )
                .unwrap();
        } else {
            compile_error!("no board selected");
        }
    }

    let mut dispatcher = Dispatcher::new(wire, board_port, SysClock);

    let identity = Identity::from_flash();

    let usb_bus = UsbBusAllocator::new(UsbBus::new(
        pac.USBCTRL_REGS,
        pac.USBCTRL_DPRAM,
        clocks.usb_clock,
        true,
        &mut pac.RESETS,
    ));

    let mut edbg_class = EdbgClass::new(&usb_bus);
    let mut serial_class = SerialPort::new(&usb_bus);
    let mut log_channel = UsbLogChannel::new(&usb_bus, "avrprobe-log", &LOGGER);

    let mut usb_dev = UsbDeviceBuilder::new(&usb_bus, UsbVidPid(identity.vid, identity.pid))
        .max_packet_size_0(64)
        .manufacturer("Kiffie Labs https://github.com/kiffie")
        .product("AvrProbe")
        .serial_number(identity.serial.as_str())
        .build();

    // the sign-on retry ladder can hold the poll loop for several seconds,
    // so the watchdog period must sit above the longest dispatched command
    watchdog.start(8_000_000u32.micros());

    let mut reply = [0u8; usb::REPORT_SIZE];
    let mut reply_pending = false;
    let mut serial_rx = [0; 1];
    let mut serial_has_rx = false;
    let mut serial_rxbuf = [0; 32];
    let mut line_coding = (115200u32, 8u8, 0u8, 0u8);
    let mut last_dtr = false;
    let mut button_was_down = false;
    let mut led_on = false;
    let mut led_toggle = Instant::now();
    loop {
        usb_dev.poll(&mut [&mut edbg_class, &mut serial_class, &mut log_channel]);

        // a host that vanishes in the middle of a programming session
        // leaves the target in an undefined state; withholding the feed
        // restarts the probe and releases the shared lines
        if usb_dev.state() == UsbDeviceState::Configured || !dispatcher.session().wire_active {
            watchdog.feed();
        }

        if reply_pending {
            if edbg_class.transmit(&reply).is_ok() {
                reply_pending = false;
            }
        } else if let Some(report) = edbg_class.receive() {
            let report = *report;
            dispatcher.handle_report(&report, &mut reply);
            reply_pending = true;
        }

        // the serial bridge pauses while a programming session owns the
        // shared lines
        if !dispatcher.session().wire_active {
            if !serial_has_rx {
                match serial_class.read(&mut serial_rx) {
                    Ok(len) => {
                        assert!(len == 1);
                        serial_has_rx = uart.write_raw(&serial_rx).is_err();
                    }
                    Err(UsbError::WouldBlock) => {}
                    Err(e) => {
                        error!("Serial read failed: {e:?}");
                    }
                }
            } else {
                serial_has_rx = uart.write_raw(&serial_rx).is_err();
            }

            if let Ok(len) = uart.read_raw(&mut serial_rxbuf) {
                serial_class.write(&serial_rxbuf[..len]).ok();
            }
        }

        let coding = serial_class.line_coding();
        let wanted = (
            coding.data_rate(),
            coding.data_bits(),
            coding.parity_type() as u8,
            coding.stop_bits() as u8,
        );
        if wanted != line_coding {
            line_coding = wanted;
            match uart.apply_line_coding(coding, clocks.peripheral_clock.freq()) {
                Err(_) => info!("Line coding {wanted:?} not supported; not changed"),
                Ok(real) => info!("Line coding changed: {wanted:?}, real baudrate = {real}"),
            }
        }

        if DTR_RESET {
            let dtr = serial_class.dtr();
            if dtr && !last_dtr {
                info!("DTR edge: target reset pulse");
                dispatcher.target_reset(true);
                dispatcher.target_reset(false);
            }
            last_dtr = dtr;
        }

        let button_down = button_pin.is_low().unwrap_or(false);
        if button_down != button_was_down {
            info!("reset button {}", if button_down { "down" } else { "up" });
            dispatcher.target_reset(button_down);
            button_was_down = button_down;
        }

        let period = if dispatcher.session().wire_active {
            LED_ACTIVE
        } else {
            LED_IDLE
        };
        if Instant::now() >= led_toggle {
            led_on = !led_on;
            if led_on {
                led_pin.set_high().ok();
            } else {
                led_pin.set_low().ok();
            }
            led_toggle = Instant::now() + period;
        }
    }
}
