// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

//! RISC-V Debug Module Driver
//!
//! This module implements the high-level debug interface for the RP2350's
//! two Hazard3 harts: the Debug Module activation handshake, hart
//! halt/resume/step/reset, GPR access via abstract commands, CSR and PC
//! access via the program buffer, non-intrusive memory access via the
//! Debug Module's System Bus master, code upload and launch, and a
//! single-step tracer.
//!
//! If this module does not give you the control you need, you can use the
//! [`SwdInterface`] object directly via [`DebugInterface::swd_if()`].
//!
//! ## Memory pathways
//!
//! Target memory is reachable two ways, and the difference is a contract,
//! not an implementation detail:
//!
//! * **SBA** (preferred, used automatically once initialised): the Debug
//!   Module's own bus master.  Non-intrusive - works while the hart runs -
//!   but bypasses the hart's caches and PMP.  The SBA and the executing
//!   hart are independent bus masters; any required cache maintenance is
//!   the caller's responsibility.
//! * **MEM-AP** (`TAR`/`DRW` via [`SwdInterface`]): passes through the
//!   hart's debug context and is intrusive.  Used as the fallback when
//!   SBA did not initialise, and always used for Debug Module registers.

use embassy_rp::pio::{Common, Instance, PioPin, StateMachine};
use embassy_rp::Peripheral;
use embassy_time::Timer;
#[allow(unused_imports)]
use log::{debug, error, info, trace, warn};

use hazprobe_core::dap::ap::{ApSel, CswRegister, Csw, TarRegister};
use hazprobe_core::dap::dp::{RdBuffRegister, Select, SelectRegister};
use hazprobe_core::dap::register::RegisterDescriptor;
use hazprobe_core::hart::{HartState, NUM_HARTS};
use hazprobe_core::lanes;
use hazprobe_core::riscv::dm::{
    self, Abstractcs, AccessRegisterCommand, Dmcontrol, Dmstatus, Sbcs, DM_ACTIVATION_CSW_SEQ,
    DM_READY_STATUS, PROGBUF_WORDS,
};
use hazprobe_core::riscv::insn::{
    csrr_s0, csrw_s0, ProgBuf, CSR_DCSR, CSR_DPC, DCSR_STEP, NUM_GPRS, REG_S0,
};

use crate::interface::SwdInterface;
use crate::{SwdConfig, SwdError};

#[doc(inline)]
pub use crate::protocol::SwdProtocol;

// Iterations x interval for DMSTATUS halt/resume polls
const HALT_POLL_TRIES: u32 = 10;
const HALT_POLL_MS: u64 = 10;

// Iterations x interval for abstract command completion
const ABSTRACT_POLL_TRIES: u32 = 100;
const ABSTRACT_POLL_US: u64 = 100;

// Settle time after each DM activation handshake step
const DM_ACTIVATION_SETTLE_MS: u64 = 50;

// ndmreset assertion hold and post-release settle times
const RESET_HOLD_MS: u64 = 10;
const RESET_SETTLE_MS: u64 = 50;

/// Execution state captured for one traced instruction
#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct TraceRecord {
    /// Program counter
    pub pc: u32,

    /// Instruction word at PC
    pub instruction: u32,

    /// Register snapshot - only valid when tracing with `capture_regs`
    pub regs: [u32; NUM_GPRS as usize],
}

/// RISC-V Debug Interface object
///
/// This is used by applications to debug the RP2350's RISC-V side.  It
/// owns the session: the [`SwdInterface`] below it, the Debug Module
/// state, and the per-hart halt/cache bookkeeping.
///
/// The simplest way to create a `DebugInterface` is
/// [`Self::from_pio()`]:
///
/// ```rust
/// use embassy_rp::pio::Pio;
/// use hazprobe_swd::{DebugInterface, SwdConfig};
///
/// let mut pio = Pio::new(p.PIO0, Irqs);
/// let mut target = DebugInterface::from_pio(
///     &mut pio.common,
///     pio.sm0,
///     p.PIN_2,
///     p.PIN_3,
///     SwdConfig::default(),
/// );
///
/// target.connect().await?;
/// target.init().await?;
/// target.halt(0).await?;
/// let pc = target.read_pc(0).await?;
/// target.resume(0).await?;
/// ```
pub struct DebugInterface<'d, PIO: Instance, const SM: usize> {
    swd: SwdInterface<'d, PIO, SM>,
    initialized: bool,
    sba_initialized: bool,
    cache_enabled: bool,
    harts: [HartState; NUM_HARTS],
}

impl<'d, PIO: Instance, const SM: usize> DebugInterface<'d, PIO, SM> {
    /// Creates a new `DebugInterface` with the given [`SwdInterface`].
    pub fn new(swd: SwdInterface<'d, PIO, SM>) -> Self {
        Self {
            swd,
            initialized: false,
            sba_initialized: false,
            cache_enabled: false,
            harts: [HartState::new(), HartState::new()],
        }
    }

    /// Creates a new `DebugInterface` from the given PIO pieces and pins.
    ///
    /// When creating a `DebugInterface` using this method, you can access
    /// the underlying [`SwdInterface`] (which gives lower-level SWD
    /// control) using the [`Self::swd_if()`] method.
    pub fn from_pio(
        common: &mut Common<'d, PIO>,
        sm: StateMachine<'d, PIO, SM>,
        swdio_pin: impl Peripheral<P = impl PioPin> + 'd,
        swclk_pin: impl Peripheral<P = impl PioPin> + 'd,
        cfg: SwdConfig,
    ) -> Self {
        Self::new(SwdInterface::from_pio(common, sm, swdio_pin, swclk_pin, cfg))
    }

    /// Returns a mutable reference to the underlying [`SwdInterface`].
    ///
    /// This allows you to access lower-level SWD operations directly, if
    /// required.
    pub fn swd_if(&mut self) -> &mut SwdInterface<'d, PIO, SM> {
        &mut self.swd
    }

    /// Connects to the target.  See [`SwdInterface::connect()`].
    pub async fn connect(&mut self) -> Result<(), SwdError> {
        self.swd.connect().await.map(|_| ())
    }

    /// Disconnects from the target, releasing the PIO slot.  The Debug
    /// Module will need re-initialising after a reconnect.
    pub async fn disconnect(&mut self) -> Result<(), SwdError> {
        self.swd.disconnect().await?;
        self.initialized = false;
        self.sba_initialized = false;
        for hart in &mut self.harts {
            hart.reset();
        }
        Ok(())
    }

    /// Returns whether the session is connected.
    pub fn is_connected(&self) -> bool {
        self.swd.is_connected()
    }

    /// Returns whether the target's debug domains are powered.
    pub fn is_powered(&self) -> bool {
        self.swd.is_powered()
    }

    /// Gets the SWCLK frequency in kHz.
    pub fn frequency(&self) -> u32 {
        self.swd.frequency()
    }

    /// Sets the SWCLK frequency.
    pub fn set_frequency(&mut self, freq_khz: u32) {
        self.swd.set_frequency(freq_khz);
    }

    /// Clears the DP's sticky error flags after a
    /// [`SwdError::Fault`].  See [`SwdInterface::clear_errors()`].
    pub async fn clear_errors(&mut self) -> Result<(), SwdError> {
        self.swd.clear_errors().await
    }

    /// Read a Debug Port register.  See [`SwdInterface::read_dp()`].
    pub async fn read_dp(&mut self, reg: u8) -> Result<u32, SwdError> {
        self.swd.read_dp(reg).await
    }

    /// Write a Debug Port register.  See [`SwdInterface::write_dp()`].
    pub async fn write_dp(&mut self, reg: u8, value: u32) -> Result<(), SwdError> {
        self.swd.write_dp(reg, value).await
    }

    /// Read an Access Port register.  See [`SwdInterface::read_ap()`].
    pub async fn read_ap(&mut self, apsel: u8, reg: u8) -> Result<u32, SwdError> {
        self.swd.read_ap(apsel, reg).await
    }

    /// Write an Access Port register.  See [`SwdInterface::write_ap()`].
    pub async fn write_ap(&mut self, apsel: u8, reg: u8, value: u32) -> Result<(), SwdError> {
        self.swd.write_ap(apsel, reg, value).await
    }

    /// Read a 32-bit word over the intrusive MEM-AP pathway.  Primarily
    /// for Debug Module registers; see [`SwdInterface::read_mem32()`].
    pub async fn dap_read_mem32(&mut self, addr: u32) -> Result<u32, SwdError> {
        self.swd.read_mem32(addr).await
    }

    /// Write a 32-bit word over the intrusive MEM-AP pathway.  See
    /// [`SwdInterface::write_mem32()`].
    pub async fn dap_write_mem32(&mut self, addr: u32, value: u32) -> Result<(), SwdError> {
        self.swd.write_mem32(addr, value).await
    }

    /// The formatted detail of the most recent error, for host logging.
    pub fn last_error_detail(&self) -> &str {
        self.swd.last_error_detail()
    }

    /// Returns whether the Debug Module has been initialised.
    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    /// Initialise the RP2350 RISC-V Debug Module.
    ///
    /// Performs the target's (undocumented) activation handshake:
    ///
    /// 1. Select the RISC-V APB-AP, bank 0
    /// 2. Configure `CSW` for 32-bit word access and point `TAR` at
    ///    `DMCONTROL`
    /// 3. Switch to bank 1 and perform the three-step reset / activate /
    ///    configure write sequence, each step flushed through `RDBUFF`
    ///    and allowed to settle
    /// 4. Verify the DM reports ready
    /// 5. Return to bank 0
    ///
    /// On success the per-hart state is zeroed (halt states unknown) and
    /// the System Bus master is initialised for the non-intrusive memory
    /// path.  Must be called after [`Self::connect()`].
    ///
    /// Returns:
    /// - `Ok(())`: the DM is active.  Idempotent when already
    ///   initialised.
    /// - `Err(SwdError::NotConnected)`: no session.
    /// - `Err(SwdError::InvalidState)`: the DM did not report the
    ///   expected ready status.
    pub async fn init(&mut self) -> Result<(), SwdError> {
        if !self.swd.is_connected() {
            return Err(SwdError::NotConnected);
        }

        if self.initialized {
            return Ok(());
        }

        info!("Initializing RP2350 Debug Module...");

        let sel_bank0 = Select::new(ApSel::Riscv.index(), 0, true);
        let sel_bank1 = Select::new(ApSel::Riscv.index(), 1, true);

        // Select RISC-V APB-AP, bank 0
        self.swd
            .write_dp(SelectRegister::ADDRESS, sel_bank0.into())
            .await?;

        // Configure CSW for 32-bit word access, and point TAR at
        // DMCONTROL
        self.swd
            .write_ap(
                ApSel::Riscv.index(),
                CswRegister::ADDRESS,
                Csw::RISCV_32BIT.into(),
            )
            .await?;
        self.swd
            .write_ap(ApSel::Riscv.index(), TarRegister::ADDRESS, dm::DMCONTROL)
            .await?;

        // Switch to bank 1 for DM control
        self.swd
            .write_dp(SelectRegister::ADDRESS, sel_bank1.into())
            .await?;

        // DM activation handshake: reset, activate, configure.  These
        // writes land on bank 1's register at the CSW offset - the raw
        // AP path is used deliberately so the bank cache does not
        // reselect bank 0.
        trace!("Exec:  DM activation handshake");
        for value in DM_ACTIVATION_CSW_SEQ {
            self.swd.write_ap_raw(CswRegister::ADDRESS, value).await?;
            self.swd.read_dp_raw(RdBuffRegister::ADDRESS).await?;
            Timer::after_millis(DM_ACTIVATION_SETTLE_MS).await;
        }

        // Verify the DM is responding
        self.swd.read_ap_raw(CswRegister::ADDRESS).await?;
        let status = self.swd.read_dp_raw(RdBuffRegister::ADDRESS).await?;
        if status != DM_READY_STATUS {
            warn!("Unexpected DM status: {status:#010X} (expected {DM_READY_STATUS:#010X})");
            self.swd.note_error(format_args!(
                "unexpected DM status: {status:#010X} (expected {DM_READY_STATUS:#010X})"
            ));
            return Err(SwdError::InvalidState);
        }

        // Back to bank 0
        self.swd
            .write_dp(SelectRegister::ADDRESS, sel_bank0.into())
            .await?;

        info!("Debug Module initialized");
        self.initialized = true;

        for hart in &mut self.harts {
            hart.reset();
        }

        // SBA failure is not fatal - memory access falls back to the
        // MEM-AP path
        if let Err(e) = self.init_sba().await {
            warn!("SBA initialization failed: {e} - using MEM-AP fallback");
        }

        Ok(())
    }

    //==========================================================================
    // Hart control
    //==========================================================================

    /// Halt a hart.
    ///
    /// Arguments:
    /// - `hart_id`: Hart to halt (0 or 1)
    ///
    /// Returns:
    /// - `Ok(())`: the hart halted.
    /// - `Err(SwdError::AlreadyHalted)`: the hart was already halted.
    ///   Informational - callers issuing halt as a guard must accept it
    ///   alongside `Ok`.
    /// - `Err(SwdError::Timeout)`: the hart did not report halted.
    pub async fn halt(&mut self, hart_id: u8) -> Result<(), SwdError> {
        self.check_hart(hart_id)?;

        if self.harts[hart_id as usize].known_halted() {
            trace!("Value: hart {hart_id} already halted");
            return Err(SwdError::AlreadyHalted);
        }

        info!("Halting hart {hart_id}...");

        let mut dmcontrol = Dmcontrol::select_hart(hart_id);
        dmcontrol.set_haltreq(true);
        self.swd.write_mem32(dm::DMCONTROL, dmcontrol.into()).await?;

        self.poll_dmstatus(hart_id, true).await.inspect_err(|_| {
            self.swd
                .note_error(format_args!("failed to halt hart {hart_id}"));
        })?;

        self.harts[hart_id as usize].mark_halted();
        info!("Hart {hart_id} halted");
        Ok(())
    }

    /// Resume a hart.  No-op if the hart is known to be running.
    ///
    /// Arguments:
    /// - `hart_id`: Hart to resume (0 or 1)
    pub async fn resume(&mut self, hart_id: u8) -> Result<(), SwdError> {
        self.check_hart(hart_id)?;

        if self.harts[hart_id as usize].known_running() {
            trace!("Value: hart {hart_id} already running");
            return Ok(());
        }

        info!("Resuming hart {hart_id}...");

        let mut dmcontrol = Dmcontrol::select_hart(hart_id);
        dmcontrol.set_resumereq(true);
        self.swd.write_mem32(dm::DMCONTROL, dmcontrol.into()).await?;

        self.poll_dmstatus(hart_id, false).await.inspect_err(|_| {
            self.swd
                .note_error(format_args!("failed to resume hart {hart_id}"));
        })?;

        self.harts[hart_id as usize].mark_running();
        info!("Hart {hart_id} resumed");
        Ok(())
    }

    /// Single-step a hart: execute exactly one instruction and halt.
    ///
    /// Sets the `step` bit in DCSR, resumes, waits for the automatic
    /// halt, then restores the original DCSR value.
    ///
    /// Arguments:
    /// - `hart_id`: Hart to step (0 or 1)
    ///
    /// Returns:
    /// - `Err(SwdError::NotHalted)`: the hart must be halted first.
    pub async fn step(&mut self, hart_id: u8) -> Result<(), SwdError> {
        self.check_hart(hart_id)?;

        if !self.harts[hart_id as usize].known_halted() {
            return Err(SwdError::NotHalted);
        }

        info!("Single-stepping hart {hart_id}...");

        let dcsr = self.read_csr(hart_id, CSR_DCSR).await.inspect_err(|_| {
            self.swd.note_error(format_args!("failed to read DCSR"));
        })?;

        // Set the step bit, preserving the other fields
        self.write_csr(hart_id, CSR_DCSR, dcsr | DCSR_STEP)
            .await
            .inspect_err(|_| {
                self.swd.note_error(format_args!("failed to write DCSR"));
            })?;

        // Resume; the hart executes one instruction and halts again
        let dmcontrol = Dmcontrol::select_hart(hart_id);
        self.swd.write_mem32(dm::DMCONTROL, dmcontrol.into()).await?;

        let mut resume = Dmcontrol::select_hart(hart_id);
        resume.set_resumereq(true);
        self.swd.write_mem32(dm::DMCONTROL, resume.into()).await?;

        self.harts[hart_id as usize].mark_running();

        self.poll_dmstatus(hart_id, true).await.inspect_err(|_| {
            self.swd.note_error(format_args!("step did not halt"));
        })?;

        self.harts[hart_id as usize].mark_halted();

        // Clear the step bit for normal halted behaviour
        self.write_csr(hart_id, CSR_DCSR, dcsr).await.inspect_err(|_| {
            self.swd.note_error(format_args!("failed to clear step bit"));
        })?;

        info!("Step completed");
        Ok(())
    }

    /// Reset a hart via `ndmreset`, optionally halting at the reset
    /// vector.
    ///
    /// Asserts `ndmreset` (with `haltreq` matching `halt_on_reset`),
    /// holds it briefly, releases it and waits for the hart to come out
    /// of reset.  The hart's PC is back at its architectural reset
    /// vector.
    ///
    /// Arguments:
    /// - `hart_id`: Hart to reset (0 or 1)
    /// - `halt_on_reset`: If true, the hart halts before executing
    ///   anything.
    pub async fn reset(&mut self, hart_id: u8, halt_on_reset: bool) -> Result<(), SwdError> {
        self.check_hart(hart_id)?;

        info!("Resetting hart {hart_id} (halt={halt_on_reset})...");

        let mut apply = Dmcontrol::select_hart(hart_id);
        apply.set_ndmreset(true);
        apply.set_haltreq(halt_on_reset);
        self.swd.write_mem32(dm::DMCONTROL, apply.into()).await?;

        Timer::after_millis(RESET_HOLD_MS).await;

        let mut release = Dmcontrol::select_hart(hart_id);
        release.set_haltreq(halt_on_reset);
        self.swd.write_mem32(dm::DMCONTROL, release.into()).await?;

        Timer::after_millis(RESET_SETTLE_MS).await;

        if halt_on_reset {
            self.poll_dmstatus(hart_id, true).await.inspect_err(|_| {
                self.swd
                    .note_error(format_args!("failed to halt after reset"));
            })?;
            self.harts[hart_id as usize].mark_halted();
            info!("Hart {hart_id} reset and halted");
        } else {
            self.harts[hart_id as usize].mark_running();
            info!("Hart {hart_id} reset and running");
        }

        Ok(())
    }

    /// Whether a hart is halted.
    ///
    /// Answered from the driver's cached state when the halt state is
    /// known; otherwise the hart is selected and `DMSTATUS` queried, and
    /// the observation recorded.  (The cached answer can only be stale if
    /// the target halts itself - e.g. an `ebreak` in running code - which
    /// this driver treats as out of scope for the fast path.)
    pub async fn is_halted(&mut self, hart_id: u8) -> Result<bool, SwdError> {
        self.check_hart(hart_id)?;

        if self.harts[hart_id as usize].halt_state_known() {
            return Ok(self.harts[hart_id as usize].halted());
        }

        // Unknown - query the hardware
        let dmcontrol = Dmcontrol::select_hart(hart_id);
        self.swd.write_mem32(dm::DMCONTROL, dmcontrol.into()).await?;

        let status = Dmstatus::from(self.swd.read_mem32(dm::DMSTATUS).await?);
        let halted = status.allhalted();
        if halted {
            self.harts[hart_id as usize].mark_halted();
        } else {
            self.harts[hart_id as usize].mark_running();
        }
        Ok(halted)
    }

    //==========================================================================
    // Register access
    //==========================================================================

    /// Read a general purpose register (x0-x31).
    ///
    /// Served from the GPR mirror when caching is enabled and the mirror
    /// holds a full snapshot.  x0 always reads as 0.
    ///
    /// Arguments:
    /// - `hart_id`: Hart to read from (0 or 1)
    /// - `reg_num`: Register number (0-31)
    ///
    /// Returns:
    /// - `Err(SwdError::NotHalted)`: the hart must be halted.
    pub async fn read_reg(&mut self, hart_id: u8, reg_num: u8) -> Result<u32, SwdError> {
        self.check_hart_halted(hart_id)?;
        self.check_reg(reg_num)?;

        if self.cache_enabled {
            if let Some(value) = self.harts[hart_id as usize].cached_gpr(reg_num) {
                trace!("Value: cached hart{hart_id} x{reg_num} = {value:#010X}");
                return Ok(value);
            }
        }

        trace!("Exec:  Reading hart{hart_id} x{reg_num}...");

        self.select_hart(hart_id).await?;

        let command = AccessRegisterCommand::read_gpr(reg_num);
        self.swd.write_mem32(dm::COMMAND, command.into()).await?;
        self.wait_abstract_command().await?;

        let value = self.swd.read_mem32(dm::DATA0).await?;

        if self.cache_enabled {
            self.harts[hart_id as usize].record_gpr(reg_num, value);
        }

        debug!("Value: hart{hart_id} x{reg_num} = {value:#010X}");
        Ok(value)
    }

    /// Write a general purpose register (x1-x31).
    ///
    /// Writing x0 is accepted but has no architectural effect.  The GPR
    /// mirror is updated write-through when caching is enabled.
    ///
    /// Arguments:
    /// - `hart_id`: Hart to write to (0 or 1)
    /// - `reg_num`: Register number (0-31)
    /// - `value`: Value to write
    ///
    /// Returns:
    /// - `Err(SwdError::NotHalted)`: the hart must be halted.
    pub async fn write_reg(&mut self, hart_id: u8, reg_num: u8, value: u32) -> Result<(), SwdError> {
        self.check_hart_halted(hart_id)?;
        self.check_reg(reg_num)?;

        debug!("Exec:  hart{hart_id} x{reg_num} = {value:#010X}");

        self.select_hart(hart_id).await?;

        self.swd.write_mem32(dm::DATA0, value).await?;

        let command = AccessRegisterCommand::write_gpr(reg_num);
        self.swd.write_mem32(dm::COMMAND, command.into()).await?;
        self.wait_abstract_command().await?;

        if self.cache_enabled {
            self.harts[hart_id as usize].record_gpr(reg_num, value);
        }

        Ok(())
    }

    /// Read all 32 general purpose registers.
    ///
    /// Populates `regs` with x0-x31 and, when caching is enabled, marks
    /// the hart's GPR mirror as a full trusted snapshot.
    ///
    /// Arguments:
    /// - `hart_id`: Hart to read from (0 or 1)
    /// - `regs`: Array to fill
    pub async fn read_all_regs(
        &mut self,
        hart_id: u8,
        regs: &mut [u32; NUM_GPRS as usize],
    ) -> Result<(), SwdError> {
        self.check_hart_halted(hart_id)?;

        trace!("Exec:  Reading all registers from hart{hart_id}...");

        for reg_num in 0..NUM_GPRS {
            regs[reg_num as usize] = self.read_reg(hart_id, reg_num).await?;
        }

        if self.cache_enabled {
            self.harts[hart_id as usize].fill_cache(regs);
        }

        Ok(())
    }

    //==========================================================================
    // CSR and PC access
    //==========================================================================

    /// Read a Control and Status Register.
    ///
    /// The RP2350's DM does not support abstract CSR access, so the read
    /// goes through the program buffer: s0 is saved, `csrr s0, <csr>`
    /// executed, s0 read back and then restored - on error paths too.
    ///
    /// Arguments:
    /// - `hart_id`: Hart to read from (0 or 1)
    /// - `csr_addr`: CSR address (e.g. 0x300 for mstatus)
    ///
    /// Returns:
    /// - `Err(SwdError::NotHalted)`: the hart must be halted.
    pub async fn read_csr(&mut self, hart_id: u8, csr_addr: u16) -> Result<u32, SwdError> {
        self.check_hart_halted(hart_id)?;

        let saved_s0 = self.read_reg(hart_id, REG_S0).await?;

        let mut progbuf = ProgBuf::new();
        let _ = progbuf.push(csrr_s0(csr_addr));

        let result = self.execute_progbuf_inner(hart_id, progbuf.finish()).await;

        let value = match result {
            Ok(()) => self.read_reg(hart_id, REG_S0).await,
            Err(e) => Err(e),
        };

        // Restore s0 unconditionally.  A restore failure must not mask
        // the original error.
        let restore = self.write_reg(hart_id, REG_S0, saved_s0).await;
        match value {
            Ok(value) => restore.map(|_| value),
            Err(e) => Err(e),
        }
    }

    /// Write a Control and Status Register.
    ///
    /// As [`Self::read_csr()`], via the program buffer: s0 is saved,
    /// loaded with `value`, `csrw <csr>, s0` executed, and s0 restored.
    ///
    /// Arguments:
    /// - `hart_id`: Hart to write to (0 or 1)
    /// - `csr_addr`: CSR address
    /// - `value`: Value to write
    pub async fn write_csr(
        &mut self,
        hart_id: u8,
        csr_addr: u16,
        value: u32,
    ) -> Result<(), SwdError> {
        self.check_hart_halted(hart_id)?;

        let saved_s0 = self.read_reg(hart_id, REG_S0).await?;

        let result = async {
            self.write_reg(hart_id, REG_S0, value).await?;

            let mut progbuf = ProgBuf::new();
            let _ = progbuf.push(csrw_s0(csr_addr));
            self.execute_progbuf_inner(hart_id, progbuf.finish()).await
        }
        .await;

        // Restore s0 regardless of result.  A restore failure must not
        // mask the original error.
        let restore = self.write_reg(hart_id, REG_S0, saved_s0).await;
        result.and(restore)
    }

    /// Read the program counter (the DPC CSR - the PC saved at debug
    /// entry).  Hart must be halted.
    pub async fn read_pc(&mut self, hart_id: u8) -> Result<u32, SwdError> {
        self.read_csr(hart_id, CSR_DPC).await
    }

    /// Write the program counter.  Takes effect when the hart resumes.
    /// Hart must be halted.
    pub async fn write_pc(&mut self, hart_id: u8, pc: u32) -> Result<(), SwdError> {
        self.write_csr(hart_id, CSR_DPC, pc).await
    }

    //==========================================================================
    // Program buffer execution
    //==========================================================================

    /// Execute instructions in the Debug Module's program buffer.
    ///
    /// Writes up to 16 instruction words into the program buffer and
    /// triggers execution with a postexec-only abstract command.  The
    /// last instruction should be `ebreak` (0x00100073) to return the
    /// hart to Debug Mode.
    ///
    /// Arguments:
    /// - `hart_id`: Hart to execute on (0 or 1)
    /// - `instructions`: 1-16 RISC-V instruction words
    ///
    /// Returns:
    /// - `Err(SwdError::InvalidParam)`: empty or oversized instruction
    ///   slice.
    /// - `Err(SwdError::AbstractCmd)`: the Debug Module rejected the
    ///   execution.
    pub async fn execute_progbuf(
        &mut self,
        hart_id: u8,
        instructions: &[u32],
    ) -> Result<(), SwdError> {
        if !self.initialized {
            return Err(SwdError::NotInitialized);
        }
        self.check_hart(hart_id)?;

        self.execute_progbuf_inner(hart_id, instructions).await
    }

    async fn execute_progbuf_inner(
        &mut self,
        hart_id: u8,
        instructions: &[u32],
    ) -> Result<(), SwdError> {
        if instructions.is_empty() || instructions.len() > PROGBUF_WORDS {
            self.swd.note_error(format_args!(
                "invalid progbuf length: {}",
                instructions.len()
            ));
            return Err(SwdError::InvalidParam);
        }

        self.select_hart(hart_id).await?;

        for (index, &insn) in instructions.iter().enumerate() {
            self.swd.write_mem32(dm::progbuf(index), insn).await?;
        }

        let command = AccessRegisterCommand::postexec_only();
        self.swd.write_mem32(dm::COMMAND, command.into()).await?;

        self.wait_abstract_command().await
    }

    //==========================================================================
    // System Bus Access
    //==========================================================================

    async fn init_sba(&mut self) -> Result<(), SwdError> {
        info!("Initializing System Bus Access...");

        let sbcs = Sbcs::from(self.swd.read_mem32(dm::SBCS).await?);

        // sbasize == 0 means no bus master is present
        if sbcs.sbasize() == 0 {
            warn!("SBA: no address width reported (sbasize=0)");
            return Err(SwdError::InvalidState);
        }

        // Clear any latched error
        if sbcs.sberror() != 0 {
            let mut clear = sbcs;
            clear.set_sberror(0x7);
            self.swd.write_mem32(dm::SBCS, clear.into()).await?;
        }

        // 32-bit accesses, read triggered by address write
        self.swd
            .write_mem32(dm::SBCS, Sbcs::configure().into())
            .await?;

        self.sba_initialized = true;
        info!("SBA initialized");
        Ok(())
    }

    /// Read a 32-bit word through the System Bus master.
    ///
    /// Non-intrusive - does not involve the hart.  The address write
    /// triggers the fetch (`sbreadonaddr`).  Errors are sticky in `SBCS`
    /// rather than reported per read; callers that observe inconsistent
    /// data can sweep them with [`Self::sba_check_errors()`].
    ///
    /// Arguments:
    /// - `addr`: Address to read (must be 4-byte aligned)
    pub async fn sba_read32(&mut self, addr: u32) -> Result<u32, SwdError> {
        if !self.sba_initialized {
            return Err(SwdError::NotInitialized);
        }
        if addr & 0x3 != 0 {
            return Err(SwdError::Alignment);
        }

        self.swd.write_mem32(dm::SBADDRESS0, addr).await?;
        self.swd.read_mem32(dm::SBDATA0).await
    }

    /// Write a 32-bit word through the System Bus master.
    ///
    /// The data write triggers the store.  Completion is not polled; see
    /// [`Self::sba_check_errors()`].
    ///
    /// Arguments:
    /// - `addr`: Address to write (must be 4-byte aligned)
    /// - `value`: Value to write
    pub async fn sba_write32(&mut self, addr: u32, value: u32) -> Result<(), SwdError> {
        if !self.sba_initialized {
            return Err(SwdError::NotInitialized);
        }
        if addr & 0x3 != 0 {
            return Err(SwdError::Alignment);
        }

        self.swd.write_mem32(dm::SBADDRESS0, addr).await?;
        self.swd.write_mem32(dm::SBDATA0, value).await
    }

    /// Sweep the System Bus master's sticky error state.
    ///
    /// Reads `SBCS`; if `sberror` or `sbbusyerror` is latched, clears
    /// them (write-1-to-clear) and reports [`SwdError::Fault`].
    pub async fn sba_check_errors(&mut self) -> Result<(), SwdError> {
        if !self.sba_initialized {
            return Err(SwdError::NotInitialized);
        }

        let sbcs = Sbcs::from(self.swd.read_mem32(dm::SBCS).await?);
        if sbcs.sberror() == 0 && !sbcs.sbbusyerror() {
            return Ok(());
        }

        warn!(
            "SBA errors latched: sberror={} sbbusyerror={}",
            sbcs.sberror(),
            sbcs.sbbusyerror()
        );

        let mut clear = sbcs;
        clear.set_sberror(0x7);
        clear.set_sbbusyerror(true);
        self.swd.write_mem32(dm::SBCS, clear.into()).await?;

        self.swd.note_error(format_args!(
            "SBA error: sberror={}, sbbusyerror={}",
            sbcs.sberror(),
            sbcs.sbbusyerror()
        ));
        Err(SwdError::Fault)
    }

    //==========================================================================
    // Memory access
    //==========================================================================

    /// Read a 32-bit word from target memory.
    ///
    /// Uses the System Bus master when initialised (non-intrusive, works
    /// while the hart runs); otherwise falls back to the intrusive
    /// MEM-AP path.
    ///
    /// Arguments:
    /// - `addr`: Address to read (must be 4-byte aligned)
    pub async fn read_mem32(&mut self, addr: u32) -> Result<u32, SwdError> {
        if !self.initialized {
            return Err(SwdError::NotInitialized);
        }
        if addr & 0x3 != 0 {
            return Err(SwdError::Alignment);
        }

        if self.sba_initialized {
            self.sba_read32(addr).await
        } else {
            self.swd.read_mem32(addr).await
        }
    }

    /// Write a 32-bit word to target memory.
    ///
    /// Pathway selection as [`Self::read_mem32()`].
    ///
    /// Arguments:
    /// - `addr`: Address to write (must be 4-byte aligned)
    /// - `value`: Value to write
    pub async fn write_mem32(&mut self, addr: u32, value: u32) -> Result<(), SwdError> {
        if !self.initialized {
            return Err(SwdError::NotInitialized);
        }
        if addr & 0x3 != 0 {
            return Err(SwdError::Alignment);
        }

        if self.sba_initialized {
            self.sba_write32(addr, value).await
        } else {
            self.swd.write_mem32(addr, value).await
        }
    }

    /// Read a 16-bit halfword.  Reads the containing aligned word and
    /// extracts the half selected by `addr & 2`.
    ///
    /// Arguments:
    /// - `addr`: Address to read (must be 2-byte aligned)
    pub async fn read_mem16(&mut self, addr: u32) -> Result<u16, SwdError> {
        if addr & 0x1 != 0 {
            return Err(SwdError::Alignment);
        }

        let word = self.read_mem32(lanes::align_word(addr)).await?;
        Ok(lanes::extract_half(word, addr))
    }

    /// Write a 16-bit halfword: read-modify-write of the containing
    /// aligned word.
    ///
    /// Arguments:
    /// - `addr`: Address to write (must be 2-byte aligned)
    /// - `value`: Halfword to write
    pub async fn write_mem16(&mut self, addr: u32, value: u16) -> Result<(), SwdError> {
        if addr & 0x1 != 0 {
            return Err(SwdError::Alignment);
        }

        let aligned = lanes::align_word(addr);
        let word = self.read_mem32(aligned).await?;
        self.write_mem32(aligned, lanes::merge_half(word, addr, value))
            .await
    }

    /// Read a byte from target memory.
    pub async fn read_mem8(&mut self, addr: u32) -> Result<u8, SwdError> {
        let word = self.read_mem32(lanes::align_word(addr)).await?;
        Ok(lanes::extract_byte(word, addr))
    }

    /// Write a byte: read-modify-write of the containing aligned word.
    pub async fn write_mem8(&mut self, addr: u32, value: u8) -> Result<(), SwdError> {
        let aligned = lanes::align_word(addr);
        let word = self.read_mem32(aligned).await?;
        self.write_mem32(aligned, lanes::merge_byte(word, addr, value))
            .await
    }

    /// Read a block of 32-bit words.
    ///
    /// Arguments:
    /// - `addr`: Starting address (must be 4-byte aligned)
    /// - `buffer`: Destination; its length is the word count
    pub async fn read_mem_block(&mut self, addr: u32, buffer: &mut [u32]) -> Result<(), SwdError> {
        for (index, word) in buffer.iter_mut().enumerate() {
            *word = self.read_mem32(addr + (index as u32) * 4).await?;
        }
        Ok(())
    }

    /// Write a block of 32-bit words.  Not verified - see
    /// [`Self::write_mem_block_verified()`].
    ///
    /// Arguments:
    /// - `addr`: Starting address (must be 4-byte aligned)
    /// - `buffer`: Words to write
    pub async fn write_mem_block(&mut self, addr: u32, buffer: &[u32]) -> Result<(), SwdError> {
        for (index, &word) in buffer.iter().enumerate() {
            self.write_mem32(addr + (index as u32) * 4, word).await?;
        }
        Ok(())
    }

    /// Write a block of 32-bit words, reading each back to verify.
    ///
    /// Returns:
    /// - `Err(SwdError::Verify)`: a readback mismatched.
    pub async fn write_mem_block_verified(
        &mut self,
        addr: u32,
        buffer: &[u32],
    ) -> Result<(), SwdError> {
        for (index, &word) in buffer.iter().enumerate() {
            self.write_verified(addr + (index as u32) * 4, word).await?;
        }
        Ok(())
    }

    async fn write_verified(&mut self, addr: u32, word: u32) -> Result<(), SwdError> {
        self.write_mem32(addr, word).await?;

        let readback = self.read_mem32(addr).await?;
        if readback != word {
            self.swd.note_error(format_args!(
                "verification failed at {addr:#010X}: wrote {word:#010X}, read {readback:#010X}"
            ));
            return Err(SwdError::Verify);
        }
        Ok(())
    }

    //==========================================================================
    // Code upload and launch
    //==========================================================================

    /// Upload code to target memory, verifying every word.
    ///
    /// The hart can remain running (the upload uses the SBA path when
    /// available).
    ///
    /// Arguments:
    /// - `addr`: Destination address (must be 4-byte aligned)
    /// - `code`: Instruction words to upload
    ///
    /// Returns:
    /// - `Err(SwdError::Verify)`: a readback mismatched.
    pub async fn upload_code(&mut self, addr: u32, code: &[u32]) -> Result<(), SwdError> {
        if code.is_empty() {
            return Err(SwdError::InvalidParam);
        }
        if addr & 0x3 != 0 {
            return Err(SwdError::Alignment);
        }

        info!("Uploading {} words to {addr:#010X}...", code.len());

        for (index, &word) in code.iter().enumerate() {
            self.write_verified(addr + (index as u32) * 4, word).await?;
        }

        info!("Code upload complete");
        Ok(())
    }

    /// Upload code and launch it on a hart.
    ///
    /// Uploads (verified), halts the hart if running, sets the PC to
    /// `entry_point`, verifies the PC readback, and resumes.  The hart is
    /// left running; halt it once the program's purpose is fulfilled.
    ///
    /// Arguments:
    /// - `hart_id`: Hart to run the code on (0 or 1)
    /// - `entry_point`: Address execution starts at (must be 4-byte
    ///   aligned)
    /// - `code`: Instruction words, uploaded at `entry_point`
    pub async fn execute_code(
        &mut self,
        hart_id: u8,
        entry_point: u32,
        code: &[u32],
    ) -> Result<(), SwdError> {
        self.check_hart(hart_id)?;

        info!(
            "Executing code on hart{hart_id} at {entry_point:#010X} ({} words)...",
            code.len()
        );

        self.upload_code(entry_point, code).await?;

        // Halt if needed - AlreadyHalted is success here
        match self.halt(hart_id).await {
            Ok(()) | Err(SwdError::AlreadyHalted) => (),
            Err(e) => return Err(e),
        }

        self.write_pc(hart_id, entry_point).await?;

        let pc = self.read_pc(hart_id).await?;
        if pc != entry_point {
            self.swd.note_error(format_args!(
                "PC verification failed: expected {entry_point:#010X}, got {pc:#010X}"
            ));
            return Err(SwdError::Verify);
        }

        self.resume(hart_id).await?;

        info!("Code execution started on hart{hart_id}");
        Ok(())
    }

    //==========================================================================
    // Instruction tracing
    //==========================================================================

    /// Trace execution one instruction at a time.
    ///
    /// Halts the hart if needed, then repeatedly: reads the PC, reads
    /// the instruction word at the PC, optionally captures all 32 GPRs,
    /// invokes `callback`, and single-steps.  The callback returning
    /// `false` stops the trace.  The callback must not re-enter this
    /// target.
    ///
    /// Arguments:
    /// - `hart_id`: Hart to trace (0 or 1)
    /// - `max_instructions`: Stop after this many instructions; 0 means
    ///   unlimited
    /// - `callback`: Invoked with each [`TraceRecord`]
    /// - `capture_regs`: If true, snapshot all 32 GPRs per instruction
    ///   (much slower)
    ///
    /// Returns:
    /// - `Ok(count)`: instructions traced.  If a failure occurs after at
    ///   least one instruction was traced, the positive count is
    ///   returned and the terminal error swallowed.
    /// - `Err(SwdError)`: no instructions were traced before the
    ///   failure.
    pub async fn trace(
        &mut self,
        hart_id: u8,
        max_instructions: u32,
        mut callback: impl FnMut(&TraceRecord) -> bool,
        capture_regs: bool,
    ) -> Result<u32, SwdError> {
        if !self.initialized {
            return Err(SwdError::NotInitialized);
        }
        self.check_hart(hart_id)?;

        // Ensure the hart is halted before we start
        match self.halt(hart_id).await {
            Ok(()) | Err(SwdError::AlreadyHalted) => (),
            Err(e) => return Err(e),
        }

        let unlimited = max_instructions == 0;
        let mut count: u32 = 0;

        info!(
            "Starting instruction trace on hart{hart_id} (max={max_instructions}, capture_regs={capture_regs})..."
        );

        while unlimited || count < max_instructions {
            let mut record = TraceRecord {
                pc: 0,
                instruction: 0,
                regs: [0; NUM_GPRS as usize],
            };

            match self.read_pc(hart_id).await {
                Ok(pc) => record.pc = pc,
                Err(e) => {
                    info!("Trace stopped: failed to read PC");
                    return if count > 0 { Ok(count) } else { Err(e) };
                }
            }

            match self.read_mem32(record.pc).await {
                Ok(insn) => record.instruction = insn,
                Err(e) => {
                    info!(
                        "Trace stopped: failed to read instruction at {:#010X}",
                        record.pc
                    );
                    return if count > 0 { Ok(count) } else { Err(e) };
                }
            }

            if capture_regs {
                let mut regs = [0u32; NUM_GPRS as usize];
                if let Err(e) = self.read_all_regs(hart_id, &mut regs).await {
                    info!("Trace stopped: failed to read registers");
                    return if count > 0 { Ok(count) } else { Err(e) };
                }
                record.regs = regs;
            }

            count += 1;

            if !callback(&record) {
                info!("Trace stopped by callback after {count} instructions");
                break;
            }

            if let Err(e) = self.step(hart_id).await {
                info!("Trace stopped: step failed");
                return if count > 0 { Ok(count) } else { Err(e) };
            }
        }

        info!("Trace completed: {count} instructions");
        Ok(count)
    }

    //==========================================================================
    // Cache management
    //==========================================================================

    /// Enable or disable GPR caching (shared across all harts).
    ///
    /// When enabled, register values are mirrored to avoid redundant
    /// abstract commands; the mirror is invalidated automatically on
    /// halt, resume, step and reset.  Disabling invalidates every hart's
    /// mirror.
    pub fn enable_cache(&mut self, enable: bool) {
        self.cache_enabled = enable;
        if !enable {
            for hart in &mut self.harts {
                hart.invalidate_cache();
            }
        }
    }

    /// Whether GPR caching is enabled.
    pub fn cache_enabled(&self) -> bool {
        self.cache_enabled
    }

    /// Invalidate one hart's GPR mirror, forcing the next read to fetch
    /// from the target.
    pub fn invalidate_cache(&mut self, hart_id: u8) {
        if (hart_id as usize) < NUM_HARTS {
            self.harts[hart_id as usize].invalidate_cache();
        }
    }

    //==========================================================================
    // Internal helpers
    //==========================================================================

    fn check_hart(&mut self, hart_id: u8) -> Result<(), SwdError> {
        if !self.initialized {
            return Err(SwdError::NotInitialized);
        }
        if hart_id as usize >= NUM_HARTS {
            self.swd
                .note_error(format_args!("invalid hart_id: {hart_id}"));
            return Err(SwdError::InvalidParam);
        }
        Ok(())
    }

    fn check_hart_halted(&mut self, hart_id: u8) -> Result<(), SwdError> {
        self.check_hart(hart_id)?;
        if !self.harts[hart_id as usize].known_halted() {
            self.swd.note_error(format_args!(
                "hart {hart_id} must be halted for register access"
            ));
            return Err(SwdError::NotHalted);
        }
        Ok(())
    }

    fn check_reg(&mut self, reg_num: u8) -> Result<(), SwdError> {
        if reg_num >= NUM_GPRS {
            self.swd
                .note_error(format_args!("invalid register number: {reg_num}"));
            return Err(SwdError::InvalidParam);
        }
        Ok(())
    }

    // Select a hart for the following DM operation.  DMSTATUS reflects
    // the selected hart only.
    async fn select_hart(&mut self, hart_id: u8) -> Result<(), SwdError> {
        let dmcontrol = Dmcontrol::select_hart(hart_id);
        self.swd.write_mem32(dm::DMCONTROL, dmcontrol.into()).await
    }

    // Poll DMSTATUS until the selected hart reports halted (or running),
    // within the bounded poll budget.
    async fn poll_dmstatus(&mut self, hart_id: u8, wait_for_halted: bool) -> Result<(), SwdError> {
        for _ in 0..HALT_POLL_TRIES {
            let status = Dmstatus::from(self.swd.read_mem32(dm::DMSTATUS).await?);

            if wait_for_halted && status.allhalted() {
                return Ok(());
            }
            if !wait_for_halted && status.allrunning() {
                return Ok(());
            }

            Timer::after_millis(HALT_POLL_MS).await;
        }

        debug!("Error: hart {hart_id} DMSTATUS poll timed out (wait_for_halted={wait_for_halted})");
        Err(SwdError::Timeout)
    }

    // Wait for the abstract command unit to go idle; on cmderr, clear it
    // (W1C) and fail.
    async fn wait_abstract_command(&mut self) -> Result<(), SwdError> {
        for _ in 0..ABSTRACT_POLL_TRIES {
            let abstractcs = Abstractcs::from(self.swd.read_mem32(dm::ABSTRACTCS).await?);

            if !abstractcs.busy() {
                let cmderr = abstractcs.cmderr();
                if cmderr != 0 {
                    self.swd
                        .write_mem32(dm::ABSTRACTCS, Abstractcs::CMDERR_CLEAR)
                        .await?;
                    self.swd
                        .note_error(format_args!("abstract command error: {cmderr}"));
                    return Err(SwdError::AbstractCmd(cmderr));
                }
                return Ok(());
            }

            Timer::after_micros(ABSTRACT_POLL_US).await;
        }

        self.swd
            .note_error(format_args!("abstract command timeout"));
        Err(SwdError::Timeout)
    }
}
