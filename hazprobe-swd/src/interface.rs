// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

//! SWD Interface
//!
//! This module implements the DAP layer: individual Debug Port and Access
//! Port operations on top of the wire engine, with WAIT retry, `SELECT`
//! bank caching, debug domain power management and the MEM-AP
//! (`TAR`/`DRW`/`RDBUFF`) memory pathway used to reach the Debug Module's
//! register file.
//!
//! It provides `SwdInterface` for performing SWD operations, and `SwdOp`
//! for describing low-level SWD operations.

use core::fmt;
use core::fmt::Write as _;
use embassy_rp::pio::{Common, Instance, PioPin, StateMachine};
use embassy_rp::Peripheral;
use embassy_time::Timer;
#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use hazprobe_core::dap::ap::{ApSel, DrwRegister, TarRegister};
use hazprobe_core::dap::dp::{
    CtrlStat, CtrlStatRegister, IdCode, IdCodeRegister, RdBuffRegister, Select, SelectRegister,
};
use hazprobe_core::dap::register::{
    ApRegister, DpRegister, ReadableRegister, RegisterDescriptor, WritableRegister,
};
use hazprobe_core::slots::Slot;
use hazprobe_core::swd::{parity32, request, Ack};

use crate::protocol::SwdProtocol;
use crate::{tracker, ErrorDetail, SwdConfig, SwdError};

#[doc(inline)]
pub use crate::debug::DebugInterface;

// Iterations x interval for the debug power-up ACK poll
const POWER_UP_POLL_TRIES: u32 = 10;
const POWER_UP_POLL_MS: u64 = 20;

// Backoff between WAIT retries
const WAIT_RETRY_US: u64 = 100;

/// SWD Interface object
///
/// This is used by [`DebugInterface`] to perform individual SWD operations
/// on the target.  It exposes a low-level interface to perform DP and AP
/// register accesses.  Most applications will prefer to use
/// [`DebugInterface`], which provides the Debug Module driver on top.
///
/// Create using [`SwdInterface::from_pio()`], passing in the PIO pieces
/// and pins:
///
/// ```rust
/// use embassy_rp::pio::Pio;
/// use hazprobe_swd::{SwdConfig, SwdInterface};
///
/// let mut pio = Pio::new(p.PIO0, Irqs);
/// let mut swd_if = SwdInterface::from_pio(
///     &mut pio.common,
///     pio.sm0,
///     p.PIN_2,
///     p.PIN_3,
///     SwdConfig::default(),
/// );
///
/// swd_if.connect().await?;
/// info!("IDCODE: {}", swd_if.idcode().unwrap());
/// ```
pub struct SwdInterface<'d, PIO: Instance, const SM: usize> {
    protocol: SwdProtocol<'d, PIO, SM>,
    cfg: SwdConfig,
    slot: Option<Slot>,
    connected: bool,
    powered: bool,
    idcode: Option<IdCode>,

    // Last SELECT value written, the sole source of truth for bank
    // caching.  None means unknown - the next AP access rewrites SELECT.
    select: Option<Select>,

    last_ack: Ack,
    error_detail: ErrorDetail,
}

impl<'d, PIO: Instance, const SM: usize> SwdInterface<'d, PIO, SM> {
    /// Creates a new SWD interface using the given [`SwdProtocol`]
    /// instance.
    ///
    /// It may be preferable to use [`SwdInterface::from_pio()`] rather
    /// than this function, to avoid having to create the [`SwdProtocol`]
    /// instance manually.
    pub fn new(protocol: SwdProtocol<'d, PIO, SM>, cfg: SwdConfig) -> Self {
        Self {
            protocol,
            cfg,
            slot: None,
            connected: false,
            powered: false,
            idcode: None,
            select: None,
            last_ack: Ack::Ok,
            error_detail: ErrorDetail::new(),
        }
    }

    /// Creates a new SWD interface from the given PIO pieces and pins.
    ///
    /// Arguments:
    /// - `common`: The PIO block's `Common` handle.
    /// - `sm`: The state machine to run the wire engine on.  Must match
    ///   the slot named by `cfg.pio_block`/`cfg.sm_index`.
    /// - `swdio_pin`: The bidirectional data pin.
    /// - `swclk_pin`: The clock pin.
    /// - `cfg`: Session configuration.
    pub fn from_pio(
        common: &mut Common<'d, PIO>,
        sm: StateMachine<'d, PIO, SM>,
        swdio_pin: impl Peripheral<P = impl PioPin> + 'd,
        swclk_pin: impl Peripheral<P = impl PioPin> + 'd,
        cfg: SwdConfig,
    ) -> Self {
        let protocol = SwdProtocol::new(common, sm, swdio_pin, swclk_pin, cfg.freq_khz);
        Self::new(protocol, cfg)
    }

    /// Returns whether the interface is currently connected to the
    /// target.
    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// Returns whether the target's debug domains are powered up.
    pub fn is_powered(&self) -> bool {
        self.powered
    }

    /// Retrieves the IDCODE read at connect, if connected.
    pub fn idcode(&self) -> Option<IdCode> {
        self.idcode
    }

    /// The PIO slot this session has bound, while connected.
    pub fn slot(&self) -> Option<Slot> {
        self.slot
    }

    /// The ACK value of the most recent wire transaction.
    pub fn last_ack(&self) -> Ack {
        self.last_ack
    }

    /// Gets the SWCLK frequency in kHz.
    pub fn frequency(&self) -> u32 {
        self.protocol.frequency()
    }

    /// Sets the SWCLK frequency.  Can be changed at any time between
    /// transactions; if [`Self::connect()`] fails, retry at a lower
    /// frequency.
    pub fn set_frequency(&mut self, freq_khz: u32) {
        self.protocol.set_frequency(freq_khz);
    }

    /// Sets the WAIT retry budget per transaction.
    pub fn set_retries(&mut self, retry_count: u32) {
        self.cfg.retry_count = retry_count;
    }

    /// The formatted detail of the most recent error, for host logging.
    /// Bounded at [`crate::ERROR_DETAIL_BYTES`].
    pub fn last_error_detail(&self) -> &str {
        &self.error_detail
    }

    pub(crate) fn note_error(&mut self, args: fmt::Arguments<'_>) {
        self.error_detail.clear();
        // Overflow past the bound silently truncates
        let _ = self.error_detail.write_fmt(args);
    }

    /// Connects to the physical target.
    ///
    /// Claims this session's PIO slot, starts the wire engine, drives the
    /// dormant-exit activation handshake, reads and validates the IDCODE,
    /// and powers up the target's debug domains.
    ///
    /// Returns:
    /// - `Ok(IdCode)`: connected; the target's IDCODE.
    /// - `Err(SwdError::InvalidState)`: already connected.
    /// - `Err(SwdError::ResourceBusy)`: the configured PIO slot is bound
    ///   to another session.
    /// - `Err(SwdError::Protocol)`: nothing valid answered the IDCODE
    ///   read.
    /// - `Err(SwdError)`: other wire or power-up failure.
    ///
    /// The slot is released again on every failure path.
    pub async fn connect(&mut self) -> Result<IdCode, SwdError> {
        if self.connected {
            self.note_error(format_args!("already connected"));
            return Err(SwdError::InvalidState);
        }

        info!("Connecting to target...");
        // Fixed slot from the configuration, or an atomic first-free
        // claim on the block
        let slot = match self.cfg.sm_index {
            Some(sm) => tracker::claim(self.cfg.pio_block, sm)?,
            None => tracker::claim_any(self.cfg.pio_block)?,
        };
        debug!("Claimed {slot}");
        self.slot = Some(slot);
        self.protocol.start();

        match self.connect_inner().await {
            Ok(idcode) => {
                self.connected = true;
                info!("Connected, IDCODE {idcode}");
                Ok(idcode)
            }
            Err(e) => {
                self.protocol.stop();
                self.release_slot();
                self.idcode = None;
                self.powered = false;
                self.select = None;
                Err(e)
            }
        }
    }

    async fn connect_inner(&mut self) -> Result<IdCode, SwdError> {
        self.protocol.activation_sequence().await;

        // Read IDCODE to confirm SWD is now running
        let raw = self
            .read_dp_raw(IdCodeRegister::ADDRESS)
            .await
            .inspect_err(|e| warn!("Failed to read IDCODE: {e}"))?;
        let idcode = IdCode::from(raw);
        if !idcode.is_valid() {
            self.note_error(format_args!("invalid IDCODE: {idcode}"));
            return Err(SwdError::Protocol(self.last_ack.bits()));
        }
        trace!("Value: IDCODE {idcode}");
        self.idcode = Some(idcode);

        self.power_up().await?;

        Ok(idcode)
    }

    /// Disconnects from the target, powering the debug domains down,
    /// stopping the wire engine and releasing this session's PIO slot.
    ///
    /// Disconnecting an unconnected interface is a no-op.
    pub async fn disconnect(&mut self) -> Result<(), SwdError> {
        if !self.connected {
            return Ok(());
        }

        info!("Disconnecting from target...");

        // Best-effort power down - the wire may already be dead
        self.power_down().await.ok();

        self.protocol.stop();
        self.release_slot();

        self.connected = false;
        self.powered = false;
        self.idcode = None;
        self.select = None;

        info!("Disconnected");
        Ok(())
    }

    fn release_slot(&mut self) {
        if let Some(slot) = self.slot.take() {
            tracker::release(slot);
        }
    }

    /// Powers up the target's debug and system power domains.
    ///
    /// Clears `CTRL/STAT`, requests both power-ups, then polls for both
    /// acknowledgments.
    ///
    /// Returns:
    /// - `Ok(())`: both domains acknowledged.
    /// - `Err(SwdError::Timeout)`: the acknowledgments never arrived.
    pub async fn power_up(&mut self) -> Result<(), SwdError> {
        if self.powered {
            return Ok(());
        }

        info!("Powering up debug domains...");

        // Clear errors first
        self.write_dp_raw(CtrlStatRegister::ADDRESS, 0)
            .await
            .inspect_err(|_| self.error_detail_power("clear CTRL/STAT"))?;

        let request = CtrlStat::power_up_request();
        self.write_dp_raw(CtrlStatRegister::ADDRESS, request.into())
            .await
            .inspect_err(|_| self.error_detail_power("request power-up"))?;

        for _ in 0..POWER_UP_POLL_TRIES {
            let status: CtrlStat = self
                .read_dp_raw(CtrlStatRegister::ADDRESS)
                .await
                .inspect_err(|_| self.error_detail_power("read power status"))?
                .into();

            if status.powered() {
                info!("Debug domains powered up, {}", status.power_states());
                self.powered = true;
                return Ok(());
            }

            Timer::after_millis(POWER_UP_POLL_MS).await;
        }

        self.note_error(format_args!("power-up timeout"));
        Err(SwdError::Timeout)
    }

    fn error_detail_power(&mut self, what: &str) {
        self.note_error(format_args!("power-up failed: {what}"));
    }

    /// Powers down the target's debug domains.  Called automatically on
    /// disconnect.
    pub async fn power_down(&mut self) -> Result<(), SwdError> {
        if !self.powered {
            return Ok(());
        }

        info!("Powering down debug domains...");
        self.write_dp_raw(CtrlStatRegister::ADDRESS, 0).await?;
        self.powered = false;
        Ok(())
    }

    /// Clears the DP's sticky error flags.
    ///
    /// Must be called after any operation fails with
    /// [`SwdError::Fault`] - faults are never recovered silently, and AP
    /// traffic stays refused until the flags are cleared.
    pub async fn clear_errors(&mut self) -> Result<(), SwdError> {
        if !self.connected {
            return Err(SwdError::NotConnected);
        }

        info!("Clearing sticky error flags");
        self.write_dp_raw(CtrlStatRegister::ADDRESS, CtrlStat::clear_errors().into())
            .await
            .inspect_err(|e| warn!("Failed to clear error flags: {e}"))
    }

    /// Read a Debug Port register by raw address.
    ///
    /// Arguments:
    /// - `reg`: The register address (0x0, 0x4, 0x8, 0xC)
    ///
    /// Returns:
    /// - `Ok(u32)` if the register was read successfully
    /// - `Err(SwdError)` if there was an error reading the register.
    pub async fn read_dp(&mut self, reg: u8) -> Result<u32, SwdError> {
        if !self.connected {
            return Err(SwdError::NotConnected);
        }

        let value = self.read_dp_raw(reg).await.inspect_err(|e| {
            self.error_detail.clear();
            let _ = write!(self.error_detail, "DP read failed (reg={reg:#04X}): {e}");
        })?;
        trace!("Value: DP read: reg={reg:#04X}, value={value:#010X}");
        Ok(value)
    }

    /// Write a Debug Port register by raw address.
    ///
    /// A raw write of `SELECT` is routed through the bank-selection cache
    /// so the cached state can never go stale.
    ///
    /// Arguments:
    /// - `reg`: The register address (0x0, 0x4, 0x8, 0xC)
    /// - `value`: The raw 32-bit value to write
    pub async fn write_dp(&mut self, reg: u8, value: u32) -> Result<(), SwdError> {
        if !self.connected {
            return Err(SwdError::NotConnected);
        }

        trace!("Exec:  DP write: reg={reg:#04X}, value={value:#010X}");
        self.write_dp_raw(reg, value).await.inspect_err(|e| {
            self.error_detail.clear();
            let _ = write!(
                self.error_detail,
                "DP write failed (reg={reg:#04X}, value={value:#010X}): {e}"
            );
        })
    }

    /// Read an Access Port register.
    ///
    /// Automatically handles AP bank selection, and chases the pipelined
    /// AP read result out of `RDBUFF`.
    ///
    /// Arguments:
    /// - `apsel`: The AP index (0x0, 0x2, 0x4, 0x8, 0xA)
    /// - `reg`: The register address within the AP (8-bit)
    ///
    /// Returns:
    /// - `Ok(u32)`: the register value.
    /// - `Err(SwdError)`: wire or selection failure.
    pub async fn read_ap(&mut self, apsel: u8, reg: u8) -> Result<u32, SwdError> {
        if !self.connected {
            return Err(SwdError::NotConnected);
        }

        self.select_ap_bank(apsel, Select::bank_of(reg)).await?;

        // The AP read returns the previous pipelined value; the real
        // result is retrieved from RDBUFF.
        self.read_ap_raw(reg).await.inspect_err(|e| {
            self.error_detail.clear();
            let _ = write!(
                self.error_detail,
                "AP read failed (apsel={apsel}, reg={reg:#04X}): {e}"
            );
        })?;

        let value = self
            .read_dp_raw(RdBuffRegister::ADDRESS)
            .await
            .inspect_err(|e| {
                self.error_detail.clear();
                let _ = write!(self.error_detail, "RDBUFF read failed: {e}");
            })?;

        trace!("Value: AP read: apsel={apsel}, reg={reg:#04X}, value={value:#010X}");
        Ok(value)
    }

    /// Write an Access Port register.
    ///
    /// Automatically handles AP bank selection.  The posted write is
    /// flushed with an `RDBUFF` read so a latched FAULT surfaces here
    /// rather than on the next operation.
    ///
    /// Arguments:
    /// - `apsel`: The AP index
    /// - `reg`: The register address within the AP
    /// - `value`: The raw 32-bit value to write
    pub async fn write_ap(&mut self, apsel: u8, reg: u8, value: u32) -> Result<(), SwdError> {
        if !self.connected {
            return Err(SwdError::NotConnected);
        }

        self.select_ap_bank(apsel, Select::bank_of(reg)).await?;

        trace!("Exec:  AP write: apsel={apsel}, reg={reg:#04X}, value={value:#010X}");
        self.write_ap_raw(reg, value).await.inspect_err(|e| {
            self.error_detail.clear();
            let _ = write!(
                self.error_detail,
                "AP write failed (apsel={apsel}, reg={reg:#04X}, value={value:#010X}): {e}"
            );
        })?;

        // Flush the posted write
        self.read_dp_raw(RdBuffRegister::ADDRESS).await.map(|_| ())
    }

    /// Read a Debug Port register using its typed descriptor.
    pub async fn read_dp_register<R>(&mut self, _reg: R) -> Result<R::Value, SwdError>
    where
        R: ReadableRegister + DpRegister,
        R::Value: From<u32>,
    {
        let raw = self.read_dp(R::ADDRESS).await?;
        Ok(R::from_raw(raw))
    }

    /// Write a Debug Port register using its typed descriptor.
    pub async fn write_dp_register<R>(&mut self, _reg: R, value: R::Value) -> Result<(), SwdError>
    where
        R: WritableRegister + DpRegister,
        u32: From<R::Value>,
    {
        self.write_dp(R::ADDRESS, R::to_raw(value)).await
    }

    /// Read an Access Port register using its typed descriptor.
    pub async fn read_ap_register<R>(&mut self, apsel: ApSel, _reg: R) -> Result<R::Value, SwdError>
    where
        R: ReadableRegister + ApRegister,
        R::Value: From<u32>,
    {
        let raw = self.read_ap(apsel.index(), R::ADDRESS).await?;
        Ok(R::from_raw(raw))
    }

    /// Write an Access Port register using its typed descriptor.
    pub async fn write_ap_register<R>(
        &mut self,
        apsel: ApSel,
        _reg: R,
        value: R::Value,
    ) -> Result<(), SwdError>
    where
        R: WritableRegister + ApRegister,
        u32: From<R::Value>,
    {
        self.write_ap(apsel.index(), R::ADDRESS, R::to_raw(value)).await
    }

    /// Reads a 32-bit value over the MEM-AP (`TAR`/`DRW`/`RDBUFF`) path.
    ///
    /// This pathway passes through the RISC-V APB-AP and is primarily
    /// used to reach Debug Module registers.  For target memory, prefer
    /// [`DebugInterface::read_mem32()`], which uses the non-intrusive
    /// System Bus master.
    ///
    /// Arguments:
    /// - `addr`: Address to read (must be 4-byte aligned)
    pub async fn read_mem32(&mut self, addr: u32) -> Result<u32, SwdError> {
        if !self.connected {
            return Err(SwdError::NotConnected);
        }
        if addr & 0x3 != 0 {
            self.note_error(format_args!("address {addr:#010X} not 4-byte aligned"));
            return Err(SwdError::Alignment);
        }

        trace!("Exec:  MEM read: addr={addr:#010X}");

        self.write_ap(ApSel::Riscv.index(), TarRegister::ADDRESS, addr)
            .await?;

        // DRW read triggers the memory fetch; the value arrives via
        // RDBUFF
        self.read_ap_raw(DrwRegister::ADDRESS).await.inspect_err(|e| {
            self.error_detail.clear();
            let _ = write!(self.error_detail, "DRW read failed: {e}");
        })?;

        let value = self.read_dp_raw(RdBuffRegister::ADDRESS).await?;
        trace!("Value: MEM read: addr={addr:#010X} -> {value:#010X}");
        Ok(value)
    }

    /// Writes a 32-bit value over the MEM-AP (`TAR`/`DRW`/`RDBUFF`) path.
    ///
    /// See [`Self::read_mem32()`] for the pathway's intended use.
    ///
    /// Arguments:
    /// - `addr`: Address to write (must be 4-byte aligned)
    /// - `value`: Value to write
    pub async fn write_mem32(&mut self, addr: u32, value: u32) -> Result<(), SwdError> {
        if !self.connected {
            return Err(SwdError::NotConnected);
        }
        if addr & 0x3 != 0 {
            self.note_error(format_args!("address {addr:#010X} not 4-byte aligned"));
            return Err(SwdError::Alignment);
        }

        trace!("Exec:  MEM write: addr={addr:#010X} <- {value:#010X}");

        self.write_ap(ApSel::Riscv.index(), TarRegister::ADDRESS, addr)
            .await?;

        self.write_ap_raw(DrwRegister::ADDRESS, value)
            .await
            .inspect_err(|e| {
                self.error_detail.clear();
                let _ = write!(self.error_detail, "DRW write failed: {e}");
            })?;

        // AP writes are posted; the RDBUFF read ensures completion and
        // surfaces any latched FAULT
        self.read_dp_raw(RdBuffRegister::ADDRESS).await.map(|_| ())
    }
}

// Internal functions
impl<'d, PIO: Instance, const SM: usize> SwdInterface<'d, PIO, SM> {
    // Update DP SELECT for an AP access, skipping the write when the
    // cached state already matches.  All SELECT writes are routed through
    // here or write_dp_raw, which keep the cache coherent between them.
    async fn select_ap_bank(&mut self, apsel: u8, bank: u8) -> Result<(), SwdError> {
        let want = Select::new(apsel, bank, true);

        if self.select == Some(want) {
            trace!("Value: AP bank already selected (APSEL={apsel}, bank={bank})");
            return Ok(());
        }

        self.write_dp_raw(SelectRegister::ADDRESS, want.into())
            .await
            .inspect_err(|e| {
                self.error_detail.clear();
                let _ = write!(
                    self.error_detail,
                    "failed to select AP bank (APSEL={apsel}, bank={bank}): {e}"
                );
            })?;

        trace!("Exec:  Selected AP bank: APSEL={apsel}, bank={bank}");
        Ok(())
    }

    // The four wire primitives.  WAIT responses are retried internally;
    // an exhausted retry budget surfaces as Timeout.

    pub(crate) async fn read_dp_raw(&mut self, reg: u8) -> Result<u32, SwdError> {
        self.transact_retry(SwdOp::DpRead(reg), 0).await
    }

    pub(crate) async fn write_dp_raw(&mut self, reg: u8, value: u32) -> Result<(), SwdError> {
        self.transact_retry(SwdOp::DpWrite(reg), value).await?;

        // Keep the bank cache coherent with every SELECT write, wherever
        // it came from
        if reg == SelectRegister::ADDRESS {
            self.select = Some(Select::from(value));
        }

        Ok(())
    }

    pub(crate) async fn read_ap_raw(&mut self, reg: u8) -> Result<u32, SwdError> {
        self.transact_retry(SwdOp::ApRead(reg), 0).await
    }

    pub(crate) async fn write_ap_raw(&mut self, reg: u8, value: u32) -> Result<(), SwdError> {
        self.transact_retry(SwdOp::ApWrite(reg), value).await.map(|_| ())
    }

    async fn transact_retry(&mut self, op: SwdOp, data: u32) -> Result<u32, SwdError> {
        let mut attempt = 0;
        loop {
            match self.transact(op, data).await {
                Err(SwdError::Wait) => {
                    attempt += 1;
                    if attempt >= self.cfg.retry_count.max(1) {
                        debug!("Error: {op} retry budget exhausted after {attempt} WAITs");
                        return Err(SwdError::Timeout);
                    }
                    trace!("Retry: {op} {attempt}");
                    Timer::after_micros(WAIT_RETRY_US).await;
                }
                result => return result,
            }
        }
    }

    // Lowest level operation which actually drives the SWD wire: request
    // phase, turnaround, ACK phase, then (on OK) the data phase in the
    // appropriate direction.
    async fn transact(&mut self, op: SwdOp, data: u32) -> Result<u32, SwdError> {
        if !self.protocol.started() {
            return Err(SwdError::NotConnected);
        }

        let request = op.request();
        trace!("Exec:  {op} SWD: {request:#04X}");

        // Request phase
        self.protocol.write_mode().await;
        self.protocol.write_bits(8, request as u32).await;

        // Turnaround + 3 ACK bits, while the target owns the bus
        let turnaround = self.cfg.turnaround_cycles;
        let ack_bits = self.protocol.read_bits(turnaround + 3).await;
        let ack = Ack::from_bits((ack_bits >> turnaround) as u8);
        self.last_ack = ack;

        match ack {
            Ack::Ok => (),
            Ack::Wait | Ack::Fault => {
                trace!("Wait:  {op} ACK {ack}");
                self.protocol.turnaround(turnaround).await;
                return SwdError::from_ack(ack).map(|_| 0);
            }
            Ack::Invalid(bits) => {
                // Nothing sane is driving the line.  Drain a whole data
                // phase worth of clocks, then re-establish a known state.
                debug!("Error: {op} malformed ACK {bits:#05b}");
                self.protocol.read_bits(turnaround + 32).await;
                self.protocol.read_bits(1).await;
                self.protocol.line_reset().await;
                return Err(SwdError::Protocol(bits));
            }
        }

        if op.is_write() {
            // Turnaround back to the probe, then data + parity
            self.protocol.turnaround(turnaround).await;
            self.protocol.write_bits(32, data).await;
            self.protocol.write_bits(1, parity32(data) as u32).await;
            trace!("OK:    {op} {data:#010X}");
            Ok(data)
        } else {
            let value = self.protocol.read_bits(32).await;
            let parity = self.protocol.read_bits(1).await != 0;
            self.protocol.turnaround(turnaround).await;

            if parity32(value) != parity {
                debug!("Error: {op} read parity: data={value:#010X}, parity={parity}");
                return Err(SwdError::Parity);
            }

            trace!("OK:    {op} {value:#010X}");
            Ok(value)
        }
    }
}

/// SWD Operations
///
/// Each operation contains the register address as a u8 (0x0, 0x4, etc).
///
/// The request byte sent on the wire for an operation is composed by
/// [`hazprobe_core::swd::request()`]:
///
/// Bit 0: Start (1)
/// Bit 1: APnDP (0=DP, 1=AP)
/// Bit 2: RnW (0=write, 1=read)
/// Bit 3: A2 (address bit 2)
/// Bit 4: A3 (address bit 3)
/// Bit 5: Parity
/// Bit 6: Stop (0)
/// Bit 7: Park (1)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwdOp {
    DpRead(u8),
    DpWrite(u8),
    ApRead(u8),
    ApWrite(u8),
}

impl SwdOp {
    /// The request byte for this operation
    pub fn request(&self) -> u8 {
        match self {
            SwdOp::DpRead(addr) => request(false, true, *addr),
            SwdOp::DpWrite(addr) => request(false, false, *addr),
            SwdOp::ApRead(addr) => request(true, true, *addr),
            SwdOp::ApWrite(addr) => request(true, false, *addr),
        }
    }

    /// Whether this operation carries an outbound data phase
    pub fn is_write(&self) -> bool {
        matches!(self, SwdOp::DpWrite(_) | SwdOp::ApWrite(_))
    }
}

impl fmt::Display for SwdOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SwdOp::DpRead(a) => write!(f, "DP Read 0x{a:02X}"),
            SwdOp::DpWrite(a) => write!(f, "DP Write 0x{a:02X}"),
            SwdOp::ApRead(a) => write!(f, "AP Read 0x{a:02X}"),
            SwdOp::ApWrite(a) => write!(f, "AP Write 0x{a:02X}"),
        }
    }
}
