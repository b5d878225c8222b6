// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

//! RISC-V debug concepts for the RP2350's Hazard3 cores.

pub mod dm;
pub mod insn;
