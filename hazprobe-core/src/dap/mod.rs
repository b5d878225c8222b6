// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

//! ARM Debug Access Port objects, as exposed on the RP2350.
//!
//! The RP2350's SW-DP fronts a number of Access Ports; hazprobe talks to the
//! RISC-V APB-AP ([`ap::ApSel::Riscv`]) behind which the Hazard3 Debug
//! Module lives.  The `SELECT` register encoding is RP2350-specific - see
//! [`dp::Select`].

pub mod ap;
pub mod dp;
pub mod register;
