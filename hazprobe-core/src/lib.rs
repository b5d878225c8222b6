// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

//! hazprobe turns a Pico 2 into a debug probe for another RP2350's RISC-V
//! side.
//!
//! `hazprobe-core` - Core SWD protocol and RISC-V Debug Module concepts used
//! by hazprobe.
//!
//! Designed to be used in conjunction with the `hazprobe-swd` library, which
//! drives the wire through a PIO state machine and implements the Debug
//! Module driver on top of the types defined here.
//!
//! Everything in this crate is hardware-free: register encodings, the SWD
//! line-protocol bit formats, RISC-V debug instruction composition, per-hart
//! bookkeeping and PIO slot accounting.  That keeps it testable on the host,
//! and `no_std` without requiring an allocator.

#![no_std]

pub mod dap;
pub mod hart;
pub mod lanes;
pub mod riscv;
pub mod slots;
pub mod swd;

#[doc(inline)]
pub use crate::hart::{HartState, NUM_HARTS};
#[doc(inline)]
pub use crate::slots::{SlotMap, NUM_PIO_BLOCKS, SMS_PER_BLOCK};
