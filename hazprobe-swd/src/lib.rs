// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

//! hazprobe-swd library
//!
//! On-probe SWD debug engine for the RP2350's RISC-V (Hazard3) cores.
//!
//! This can be used to halt, step, trace and co-process with the RP2350's
//! RISC-V side over the two-wire
//! [SWD protocol](https://developer.arm.com/documentation/ihi0031/latest/),
//! driving the wire deterministically through one of the probe's PIO state
//! machines.
//!
//! It is `no_std` and designed to run on an RP2350 (Pico 2) probe, using
//! [embassy](https://embassy.dev/) and
//! [`embassy-rp`](https://docs.embassy.dev/embassy-rp/).
//!
//! The following diagram shows the key `hazprobe-swd` concepts.
//!
//! ```text
//!      Application
//! ----------------------
//!     DebugInterface      \   RISC-V Debug Module driver: harts, GPRs,
//! ----------------------   \  CSRs, SBA memory, progbuf, tracing
//!      SwdInterface         |--  SwdError
//! ----------------------   /  DP/AP transactions, SELECT cache, MEM-AP
//!      SwdProtocol        /   request/ACK/data marshalling
//! ----------------------
//!    PIO state machine    >======================<   RP2350 RISC-V target
//!                           3.3V SWDIO/SWCLK/GND
//! ```
//!
//! * [`DebugInterface`] provides the highest-level interface: the Debug
//!   Module driver with hart control, register/CSR/memory access, code
//!   upload and the single-step tracer.
//! * [`SwdInterface`] provides a lower-level interface to perform
//!   individual DP and AP operations.
//! * [`SwdProtocol`] implements the SWD wire protocol through a PIO state
//!   machine.
//!
//! Most applications should use [`DebugInterface`], but those that require
//! tighter control over the target may want to use [`SwdInterface`]
//! directly via [`DebugInterface::swd_if()`].
//!
//! `hazprobe-swd` uses and is designed to be used alongside the
//! [`hazprobe_core`] library, which provides the register encodings and
//! protocol concepts used here, but which are not wire specific.

#![no_std]

pub mod debug;
pub mod interface;
pub mod protocol;
pub mod tracker;

#[doc(inline)]
pub use crate::debug::DebugInterface;
#[doc(inline)]
pub use crate::interface::SwdInterface;
#[doc(inline)]
pub use crate::protocol::SwdProtocol;

use core::fmt;
use serde::Serialize;

use hazprobe_core::swd::Ack;

/// Bound on the formatted error detail a session retains - see
/// [`SwdInterface::last_error_detail()`].
pub const ERROR_DETAIL_BYTES: usize = 128;

pub(crate) type ErrorDetail = heapless::String<ERROR_DETAIL_BYTES>;

/// Core error type used by all hazprobe-swd objects
///
/// Methods are provided to make it easier to handle errors, by checking if
/// either a retry or reset is required:
///
/// - [`SwdError::requires_retry()`]
/// - [`SwdError::requires_reset()`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwdError {
    /// A WAIT acknowledgement from the target.  The wire layer retries
    /// these internally; callers only see `Wait` from single-shot paths
    /// that bypass the retry budget.
    Wait,

    /// A FAULT acknowledgement.  Sticky error flags are latched in the
    /// DP and must be cleared with [`SwdInterface::clear_errors()`]
    /// before further AP traffic will succeed.  Never recovered silently.
    Fault,

    /// A malformed acknowledgement, or a connect-time IDCODE that nothing
    /// answered.  The wire engine has already re-driven a line reset.  The
    /// value received is included - 7 means SWDIO floated high for the
    /// whole ACK phase, which is the common case.
    Protocol(u8),

    /// The parity bit of an inbound data phase did not match the data.
    /// The read value cannot be trusted.
    Parity,

    /// A bounded poll expired: WAIT retries, debug power-up, abstract
    /// command completion, or a halt/resume/step that never landed.
    Timeout,

    /// Operation attempted before [`SwdInterface::connect()`] succeeded.
    NotConnected,

    /// Operation attempted before [`DebugInterface::init()`] succeeded.
    NotInitialized,

    /// A GPR/CSR/PC operation was attempted while the hart is running.
    /// Halt it first.  SBA memory access does not require a halted hart.
    NotHalted,

    /// Returned by [`DebugInterface::halt()`] when the hart was already
    /// halted.  Informational - callers issuing halt as a guard must
    /// accept it alongside `Ok`.
    AlreadyHalted,

    /// The API was called with an out-of-range argument (hart id,
    /// register number, program buffer length, ...).
    InvalidParam,

    /// The target is in a state the driver cannot reconcile - e.g. the
    /// Debug Module activation handshake produced an unexpected status.
    InvalidState,

    /// The supplied address does not meet the operation's alignment
    /// requirement.
    Alignment,

    /// The requested PIO state machine slot is already bound to another
    /// session.
    ResourceBusy,

    /// An abstract command failed (`ABSTRACTCS.cmderr` was non-zero).
    /// The sticky `cmderr` field has already been cleared.  The value it
    /// held is included.
    AbstractCmd(u8),

    /// A post-write readback mismatched during code upload or a verified
    /// block write.  Fatal for that operation.
    Verify,
}

impl SwdError {
    pub(crate) fn from_ack(ack: Ack) -> Result<(), SwdError> {
        match ack {
            Ack::Ok => Ok(()),
            Ack::Wait => Err(SwdError::Wait),
            Ack::Fault => Err(SwdError::Fault),
            Ack::Invalid(bits) => Err(SwdError::Protocol(bits)),
        }
    }

    /// Returns true if the error requires a target reset to recover.  In
    /// this case issue a new [`SwdInterface::connect()`].  If the error
    /// persists, the target may require a hard reset.
    pub fn requires_reset(&self) -> bool {
        matches!(
            self,
            SwdError::Fault | SwdError::Protocol(_) | SwdError::Parity
        )
    }

    /// Returns true if the error is a transient error that can be
    /// retried.
    pub fn requires_retry(&self) -> bool {
        matches!(self, SwdError::Wait)
    }

    /// Returns true when the "error" is informational rather than a
    /// failure.  Currently only [`SwdError::AlreadyHalted`].
    pub fn is_informational(&self) -> bool {
        matches!(self, SwdError::AlreadyHalted)
    }

    /// Returns a string representation of the error.
    pub fn as_str(&self) -> &'static str {
        match self {
            SwdError::Wait => "Wait ACK",
            SwdError::Fault => "Fault ACK",
            SwdError::Protocol(_) => "Protocol Error",
            SwdError::Parity => "Read Parity Error",
            SwdError::Timeout => "Timeout",
            SwdError::NotConnected => "Not Connected",
            SwdError::NotInitialized => "DM Not Initialized",
            SwdError::NotHalted => "Hart Not Halted",
            SwdError::AlreadyHalted => "Already Halted",
            SwdError::InvalidParam => "Invalid Parameter",
            SwdError::InvalidState => "Invalid State",
            SwdError::Alignment => "Alignment Error",
            SwdError::ResourceBusy => "Resource Busy",
            SwdError::AbstractCmd(_) => "Abstract Command Error",
            SwdError::Verify => "Verification Failed",
        }
    }
}

impl Serialize for SwdError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeStruct;
        let mut state = serializer.serialize_struct("SwdError", 2)?;

        let kind = match self {
            SwdError::Wait => "wait ack",
            SwdError::Fault => "fault ack",
            SwdError::Protocol(_) => "protocol",
            SwdError::Parity => "read parity",
            SwdError::Timeout => "timeout",
            SwdError::NotConnected => "not connected",
            SwdError::NotInitialized => "not initialized",
            SwdError::NotHalted => "not halted",
            SwdError::AlreadyHalted => "already halted",
            SwdError::InvalidParam => "invalid param",
            SwdError::InvalidState => "invalid state",
            SwdError::Alignment => "alignment",
            SwdError::ResourceBusy => "resource busy",
            SwdError::AbstractCmd(_) => "abstract cmd",
            SwdError::Verify => "verify",
        };
        state.serialize_field("kind", kind)?;

        let detail = match self {
            SwdError::Protocol(ack) => *ack,
            SwdError::AbstractCmd(cmderr) => *cmderr,
            _ => 0,
        };
        state.serialize_field("detail", &detail)?;
        state.end()
    }
}

impl fmt::Display for SwdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SwdError::Protocol(ack) => write!(f, "{}: ack {ack:#05b}", self.as_str()),
            SwdError::AbstractCmd(cmderr) => {
                write!(f, "{}: cmderr {cmderr}", self.as_str())
            }
            _ => write!(f, "{}", self.as_str()),
        }
    }
}

/// Configuration for a debug session
///
/// `pio_block` and `sm_index` name the PIO slot this session binds in the
/// process-wide [`tracker`] on connect.  `Some(n)` pins the slot; `None`
/// claims the first free state machine on the block atomically, which
/// matches the hardware when sessions hand their state machines over in
/// index order.  Either way the slot must correspond to the PIO
/// peripheral and state machine handed to [`SwdProtocol::new()`]; the
/// claimed slot is reported by [`SwdInterface::slot()`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct SwdConfig {
    /// Requested SWCLK frequency in kHz
    pub freq_khz: u32,

    /// WAIT retry budget per DP/AP transaction
    pub retry_count: u32,

    /// Quiescent clocks inserted at each SWDIO bus-ownership change
    pub turnaround_cycles: u32,

    /// PIO block (0 or 1) the wire engine runs on
    pub pio_block: u8,

    /// State machine index (0-3) within the block, or `None` to claim
    /// the first free slot on connect
    pub sm_index: Option<u8>,
}

impl Default for SwdConfig {
    fn default() -> Self {
        SwdConfig {
            freq_khz: 1000,
            retry_count: 5,
            turnaround_cycles: hazprobe_core::swd::TURNAROUND_CYCLES,
            pio_block: 0,
            sm_index: None,
        }
    }
}
