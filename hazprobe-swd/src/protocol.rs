// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

//! SWD Wire Protocol Implementation
//!
//! This module implements the SWD wire protocol for communicating with the
//! RP2350's debug port.  It provides the `SwdProtocol` struct for low-level
//! SWD operations, clocking bits through a PIO state machine rather than
//! bit-banging GPIOs - the state machine gives deterministic bit timing
//! independent of CPU load.
//!
//! The PIO program is a small command dispatcher.  Each command word pushed
//! to the TX FIFO encodes a bit count, the SWDIO pin direction, and the SM
//! address of the routine to run:
//!
//! ```text
//! [7:0] bit count - 1   [8] SWDIO output enable   [13:9] routine address
//! ```
//!
//! Write routines then consume one data word from the FIFO (LSB-first);
//! the read routine pushes one word of sampled bits.  Four SM cycles are
//! spent per bit.

use embassy_rp::clocks::clk_sys_freq;
use embassy_rp::gpio::{Level, Pull};
use embassy_rp::pio::{
    Common, Config, Direction, Instance, Pin, PioPin, ShiftConfig, ShiftDirection,
    StateMachine,
};
use embassy_rp::Peripheral;
use embassy_time::Timer;
use fixed::traits::ToFixed;
#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use hazprobe_core::swd::{
    clock_divider, DORMANT_TO_SWD_SEQ, IDLE_CYCLES, JTAG_TO_DORMANT_SEQ, LINE_RESET_CYCLES,
};

/// SM addresses of the PIO program's command routines
#[derive(Debug, Clone, Copy)]
struct CmdAddrs {
    write: u8,
    skip: u8,
    turnaround: u8,
    read: u8,
}

/// SWD Protocol object
///
/// This is used by [`crate::SwdInterface`] to communicate with the target.
/// It is not expected to be used directly by applications.
///
/// Create using `SwdProtocol::new()`, passing in the PIO block's `Common`,
/// a free state machine and the two wire pins:
///
/// ```rust
/// use embassy_rp::pio::Pio;
/// use hazprobe_swd::SwdProtocol;
///
/// let pio = Pio::new(p.PIO0, Irqs);
/// let mut common = pio.common;
/// let swd = SwdProtocol::new(&mut common, pio.sm0, p.PIN_2, p.PIN_3, 1000);
/// ```
///
/// The state machine program is loaded once, at construction; the slot
/// claim and the activation sequences happen in
/// [`crate::SwdInterface::connect()`].
pub struct SwdProtocol<'d, PIO: Instance, const SM: usize> {
    sm: StateMachine<'d, PIO, SM>,
    cfg: Config<'d, PIO>,
    cmd: CmdAddrs,
    swdio: Pin<'d, PIO>,
    swclk: Pin<'d, PIO>,
    program_offset: u8,
    freq_khz: u32,
    started: bool,
}

impl<'d, PIO: Instance, const SM: usize> SwdProtocol<'d, PIO, SM> {
    /// Create a new SWD protocol instance.
    ///
    /// Loads the SWD PIO program into the block and configures (but does
    /// not start) the state machine.
    ///
    /// Arguments:
    /// - `common`: The PIO block's `Common` handle, used to load the
    ///   program and register the pins.
    /// - `sm`: The state machine to run the wire engine on.
    /// - `swdio_pin`: The bidirectional data pin.
    /// - `swclk_pin`: The clock pin (output only).
    /// - `freq_khz`: Initial SWCLK frequency.
    ///
    /// Returns:
    /// - A new `SwdProtocol` instance ready to be started.
    pub fn new(
        common: &mut Common<'d, PIO>,
        mut sm: StateMachine<'d, PIO, SM>,
        swdio_pin: impl Peripheral<P = impl PioPin> + 'd,
        swclk_pin: impl Peripheral<P = impl PioPin> + 'd,
        freq_khz: u32,
    ) -> Self {
        let program = pio_proc::pio_asm!(
            ".side_set 1 opt",
            // Write routine: consume one data word, clock `x + 1` bits
            // out of it LSB-first, then fall through to the dispatcher.
            "public write_cmd:",
            "    pull",
            "write_bitloop:",
            "    out pins, 1                 side 0x0 [1]",
            "    jmp x-- write_bitloop       side 0x1 [1]",
            // Dispatcher: consume one command word - bit count - 1 in
            // [7:0], SWDIO direction in [8], routine address in [13:9].
            "public get_next_cmd:",
            "    pull                            side 0x0",
            "    out x, 8",
            "    out pindirs, 1",
            "    out pc, 5",
            // Turnaround: clock `x + 1` quiescent cycles, discarding a
            // dummy data word.
            "public turnaround_cmd:",
            "    pull",
            "turnaround_bitloop:",
            "    out null, 1                 side 0x0 [1]",
            "    jmp x-- turnaround_bitloop  side 0x1 [1]",
            "    jmp get_next_cmd",
            // Read routine: sample `x + 1` bits on the rising edge,
            // LSB-first, and push the word.
            "public read_cmd:",
            "read_bitloop:",
            "    in pins, 1                  side 0x1 [1]",
            "    jmp x-- read_bitloop        side 0x0 [1]",
            "    push",
            "    jmp get_next_cmd",
        );

        let loaded = common.load_program(&program.program);
        let program_offset = loaded.origin;
        let cmd = CmdAddrs {
            write: program_offset + program.public_defines.write_cmd as u8,
            skip: program_offset + program.public_defines.get_next_cmd as u8,
            turnaround: program_offset + program.public_defines.turnaround_cmd as u8,
            read: program_offset + program.public_defines.read_cmd as u8,
        };

        // The target is responsible for driving SWDIO during its bus
        // ownership; a weak pull-up keeps the ACK phase readable when
        // nothing is connected.
        let mut swdio = common.make_pio_pin(swdio_pin);
        swdio.set_pull(Pull::Up);
        let swclk = common.make_pio_pin(swclk_pin);

        let mut cfg = Config::default();
        cfg.use_program(&loaded, &[&swclk]);
        cfg.set_out_pins(&[&swdio]);
        cfg.set_in_pins(&[&swdio]);
        cfg.set_set_pins(&[&swdio]);
        cfg.shift_out = ShiftConfig {
            auto_fill: false,
            threshold: 32,
            direction: ShiftDirection::Right,
        };
        cfg.shift_in = ShiftConfig {
            auto_fill: false,
            threshold: 32,
            direction: ShiftDirection::Right,
        };
        let sys_khz = clk_sys_freq() / 1000;
        cfg.clock_divider = (clock_divider(sys_khz, freq_khz) as u32).to_fixed();
        sm.set_config(&cfg);

        sm.set_pin_dirs(Direction::Out, &[&swclk, &swdio]);
        sm.set_pins(Level::Low, &[&swclk, &swdio]);

        debug!("SWD wire engine loaded at SM offset {program_offset}");

        Self {
            sm,
            cfg,
            cmd,
            swdio,
            swclk,
            program_offset,
            freq_khz,
            started: false,
        }
    }

    /// The configured SWCLK frequency in kHz
    pub fn frequency(&self) -> u32 {
        self.freq_khz
    }

    /// The SM instruction offset the wire program was loaded at
    pub fn program_offset(&self) -> u8 {
        self.program_offset
    }

    pub(crate) fn started(&self) -> bool {
        self.started
    }

    /// Set the SWCLK frequency.
    ///
    /// Can be changed at any time between transactions.  The divider is
    /// `ceil(ceil(sys_khz / freq_khz) / 4)` - the program spends four SM
    /// cycles per bit - clamped to the hardware's 16-bit range.
    pub fn set_frequency(&mut self, freq_khz: u32) {
        let sys_khz = clk_sys_freq() / 1000;
        let divider = clock_divider(sys_khz, freq_khz);
        self.cfg.clock_divider = (divider as u32).to_fixed();
        self.sm.set_config(&self.cfg);
        self.freq_khz = freq_khz;
        info!("Set SWCLK to {freq_khz} kHz (sysclk {sys_khz} kHz, div {divider})");
    }

    /// Start the state machine at the command dispatcher
    pub(crate) fn start(&mut self) {
        self.sm.restart();
        unsafe {
            self.sm.exec_instr(
                pio::InstructionOperands::JMP {
                    condition: pio::JmpCondition::Always,
                    address: self.cmd.skip,
                }
                .encode(),
            );
        }
        self.sm.set_enable(true);
        self.started = true;
        debug!("SWD wire engine started");
    }

    /// Stop the state machine and park both pins low
    pub(crate) fn stop(&mut self) {
        self.sm.set_enable(false);
        self.sm.set_pin_dirs(Direction::Out, &[&self.swclk, &self.swdio]);
        self.sm.set_pins(Level::Low, &[&self.swclk, &self.swdio]);
        self.started = false;
        debug!("SWD wire engine stopped");
    }

    #[inline]
    fn format_command(bits: u32, out_en: bool, addr: u8) -> u32 {
        (bits.wrapping_sub(1) & 0xFF) | ((out_en as u32) << 8) | ((addr as u32) << 9)
    }

    async fn push_command(&mut self, bits: u32, out_en: bool, addr: u8) {
        let word = Self::format_command(bits, out_en, addr);
        self.sm.tx().wait_push(word).await;
    }

    // Wait until the SM has drained the TX FIFO and stalled on the next
    // pull, so a pin-direction change is known to have been applied.
    async fn wait_tx_stall(&mut self) {
        self.sm.tx().clear_stalled();
        while !self.sm.tx().stalled() {
            Timer::after_micros(1).await;
        }
    }

    /// Switch SWDIO to probe-driven without clocking any bits
    pub(crate) async fn write_mode(&mut self) {
        let addr = self.cmd.skip;
        self.push_command(0, true, addr).await;
        self.wait_tx_stall().await;
    }

    /// Release SWDIO to the target without clocking any bits
    pub(crate) async fn read_mode(&mut self) {
        let addr = self.cmd.skip;
        self.push_command(0, false, addr).await;
        self.wait_tx_stall().await;
    }

    /// Clock out `count` bits of `data`, LSB first
    pub(crate) async fn write_bits(&mut self, count: u32, data: u32) {
        let addr = self.cmd.write;
        self.push_command(count, true, addr).await;
        self.sm.tx().wait_push(data).await;
        trace!("Exec:  Write {count} bits: {data:#010X}");
    }

    /// Clock in `count` bits, LSB first
    pub(crate) async fn read_bits(&mut self, count: u32) -> u32 {
        let addr = self.cmd.read;
        self.push_command(count, false, addr).await;
        let raw = self.sm.rx().wait_pull().await;
        let data = if count < 32 { raw >> (32 - count) } else { raw };
        trace!("Exec:  Read {count} bits: {data:#010X} (raw {raw:#010X})");
        data
    }

    /// Clock `cycles` quiescent cycles with SWDIO released
    pub(crate) async fn turnaround(&mut self, cycles: u32) {
        let addr = self.cmd.turnaround;
        self.push_command(cycles, false, addr).await;
        self.sm.tx().wait_push(0).await;
    }

    /// Clock out a byte sequence, LSB-first within each byte
    pub(crate) async fn send_bytes(&mut self, bytes: &[u8]) {
        for &byte in bytes {
            self.write_bits(8, byte as u32).await;
        }
    }

    /// Drive a line reset: >50 clocks with SWDIO high
    pub(crate) async fn line_reset(&mut self) {
        trace!("Exec:  Line reset ({LINE_RESET_CYCLES} ones)");
        self.write_mode().await;
        let mut remaining = LINE_RESET_CYCLES;
        while remaining > 0 {
            let chunk = remaining.min(32);
            self.write_bits(chunk, u32::MAX).await;
            remaining -= chunk;
        }
    }

    /// Clock `count` idle (low) cycles with SWDIO driven
    pub(crate) async fn send_idle_clocks(&mut self, count: u32) {
        trace!("Exec:  {count} idle clocks");
        self.write_mode().await;
        let mut remaining = count;
        while remaining > 0 {
            let chunk = remaining.min(32);
            self.write_bits(chunk, 0).await;
            remaining -= chunk;
        }
    }

    /// Drive the full dormant-exit handshake.
    ///
    /// Robust against any initial state of the target's debug port: first
    /// forces a JTAG port into dormant (harmless if already SWD or
    /// dormant), then promotes dormant to SWD with the 128-bit selection
    /// alert and the SWD activation code, then line-resets and idles.
    pub(crate) async fn activation_sequence(&mut self) {
        self.write_mode().await;

        trace!("Exec:  JTAG-to-dormant sequence");
        self.send_bytes(&JTAG_TO_DORMANT_SEQ).await;

        trace!("Exec:  Dormant-to-SWD sequence");
        self.send_bytes(&DORMANT_TO_SWD_SEQ).await;

        self.send_idle_clocks(IDLE_CYCLES).await;
        Timer::after_millis(1).await;
    }
}
