// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

//! Debug Port Registers
//!
//! Only the four registers the RP2350 RISC-V debug path needs are modelled:
//! `IDCODE`, `CTRL/STAT`, `SELECT` and `RDBUFF`.  Sticky errors on this
//! target are cleared by write-1-to-clear bits in `CTRL/STAT`, so there is
//! no `ABORT` model.

use crate::dap::register::{
    DpRegister, ReadableRegister, RegisterDescriptor, WritableRegister,
};
use crate::{register_data_r, register_data_rw};
use core::fmt;

/// IDCODE Register descriptor (read-only)
pub struct IdCodeRegister;

impl RegisterDescriptor for IdCodeRegister {
    const ADDRESS: u8 = 0x00;
    type Value = IdCode;
}

impl ReadableRegister for IdCodeRegister {}
impl DpRegister for IdCodeRegister {}

/// Debug Port IDCODE register data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IdCode(u32);

register_data_r!(IdCode);

impl IdCode {
    /// RP2350 SW-DP (DPIDR).
    pub const RP2350: IdCode = IdCode::from_u32(0x4C013477);

    pub const fn from_u32(value: u32) -> Self {
        IdCode(value)
    }

    pub fn data(&self) -> u32 {
        self.0
    }

    /// Get revision field (bits 31:28)
    pub fn revision(&self) -> u8 {
        ((self.0 >> 28) & 0xF) as u8
    }

    /// Get part number (bits 27:20)
    pub fn part_number(&self) -> u8 {
        ((self.0 >> 20) & 0xFF) as u8
    }

    /// Get version (bits 15:12)
    pub fn version(&self) -> u8 {
        ((self.0 >> 12) & 0xF) as u8
    }

    /// Get JEDEC designer ID (bits 11:1)
    pub fn designer_id(&self) -> u16 {
        ((self.0 >> 1) & 0x7FF) as u16
    }

    /// A response of all-zeros (or a zero designer field) means nothing
    /// answered the read - the line floated or the DP is still dormant.
    pub fn is_valid(&self) -> bool {
        (self.0 & 0x0FFF_FFFF) != 0 && self.designer_id() != 0
    }

    /// Get manufacturer name if known
    pub fn designer_name(&self) -> &'static str {
        match self.designer_id() {
            0x23B => "ARM Ltd",
            _ => "Unknown",
        }
    }
}

/// CTRL/STAT Register descriptor (read-write)
pub struct CtrlStatRegister;

impl RegisterDescriptor for CtrlStatRegister {
    const ADDRESS: u8 = 0x04;
    type Value = CtrlStat;
}

impl ReadableRegister for CtrlStatRegister {}
impl WritableRegister for CtrlStatRegister {}
impl DpRegister for CtrlStatRegister {}

/// Debug Port CTRL/STAT register data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CtrlStat(u32);

register_data_rw!(CtrlStat);

impl CtrlStat {
    // Field masks.  The sticky flags are write-1-to-clear on this DP.
    const STICKYORUN: u32 = 1 << 1;
    const STICKYCMP: u32 = 1 << 4;
    const STICKYERR: u32 = 1 << 5;
    const READOK: u32 = 1 << 6;
    const WDATAERR: u32 = 1 << 7;

    const CDBGPWRUPREQ: u32 = 1 << 28;
    const CDBGPWRUPACK: u32 = 1 << 29;
    const CSYSPWRUPREQ: u32 = 1 << 30;
    const CSYSPWRUPACK: u32 = 1 << 31;

    /// Get raw register value
    pub fn value(&self) -> u32 {
        self.0
    }

    /// Get sticky overrun flag
    pub fn stickyorun(&self) -> bool {
        self.0 & Self::STICKYORUN != 0
    }

    /// Get sticky compare flag
    pub fn stickycmp(&self) -> bool {
        self.0 & Self::STICKYCMP != 0
    }

    /// Get sticky error flag
    pub fn stickyerr(&self) -> bool {
        self.0 & Self::STICKYERR != 0
    }

    /// Get read OK flag
    pub fn readok(&self) -> bool {
        self.0 & Self::READOK != 0
    }

    /// Get write data error flag
    pub fn wdataerr(&self) -> bool {
        self.0 & Self::WDATAERR != 0
    }

    /// Get debug power-up acknowledge
    pub fn cdbgpwrupack(&self) -> bool {
        self.0 & Self::CDBGPWRUPACK != 0
    }

    /// Get system power-up acknowledge
    pub fn csyspwrupack(&self) -> bool {
        self.0 & Self::CSYSPWRUPACK != 0
    }

    /// True when any sticky error flag is latched
    pub fn has_errors(&self) -> bool {
        self.stickyorun() || self.stickycmp() || self.stickyerr() || self.wdataerr()
    }

    /// True when both power domains have acknowledged power-up
    pub fn powered(&self) -> bool {
        self.cdbgpwrupack() && self.csyspwrupack()
    }

    /// Set debug power-up request flag
    pub fn set_cdbgpwrupreq(&mut self, enable: bool) {
        if enable {
            self.0 |= Self::CDBGPWRUPREQ;
        } else {
            self.0 &= !Self::CDBGPWRUPREQ;
        }
    }

    /// Set system power-up request flag
    pub fn set_csyspwrupreq(&mut self, enable: bool) {
        if enable {
            self.0 |= Self::CSYSPWRUPREQ;
        } else {
            self.0 &= !Self::CSYSPWRUPREQ;
        }
    }

    /// Value that requests power-up of both debug domains
    pub fn power_up_request() -> Self {
        let mut cs = CtrlStat::default();
        cs.set_cdbgpwrupreq(true);
        cs.set_csyspwrupreq(true);
        cs
    }

    /// Value that clears all sticky error flags (write-1-to-clear)
    pub fn clear_errors() -> Self {
        CtrlStat(Self::STICKYERR | Self::WDATAERR | Self::STICKYORUN | Self::STICKYCMP)
    }

    /// Summary of the latched error flags, for logging
    pub fn error_states(&self) -> ErrorStates {
        ErrorStates(*self)
    }

    /// Summary of the power state flags, for logging
    pub fn power_states(&self) -> PowerStates {
        PowerStates(*self)
    }
}

/// Displayable CTRL/STAT error flag summary
#[derive(Debug, Clone, Copy)]
pub struct ErrorStates(CtrlStat);

impl fmt::Display for ErrorStates {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "STICKYORUN={} STICKYCMP={} STICKYERR={} WDATAERR={}",
            self.0.stickyorun() as u8,
            self.0.stickycmp() as u8,
            self.0.stickyerr() as u8,
            self.0.wdataerr() as u8,
        )
    }
}

/// Displayable CTRL/STAT power flag summary
#[derive(Debug, Clone, Copy)]
pub struct PowerStates(CtrlStat);

impl fmt::Display for PowerStates {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "CDBGPWRUPACK={} CSYSPWRUPACK={}",
            self.0.cdbgpwrupack() as u8,
            self.0.csyspwrupack() as u8,
        )
    }
}

/// SELECT Register descriptor (write-only)
pub struct SelectRegister;

impl RegisterDescriptor for SelectRegister {
    const ADDRESS: u8 = 0x08;
    type Value = Select;
}

impl WritableRegister for SelectRegister {}
impl DpRegister for SelectRegister {}

/// Debug Port SELECT register data, RP2350 encoding
///
/// The RP2350 does not use the ADIv5 `SELECT` layout.  The working encoding
/// is:
///
/// ```text
/// [15:12] APSEL   [11:8] 0xD (fixed)   [7:4] bank   [0] ctrlsel
/// ```
///
/// Bits 11:8 must read 0xD or AP accesses fail; this is undocumented but
/// required.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Select(u32);

register_data_rw!(Select);

impl Select {
    const APSEL_SHIFT: u32 = 12;
    const FIXED: u32 = 0xD << 8;
    const BANK_SHIFT: u32 = 4;
    const CTRLSEL: u32 = 1;

    /// Compose a SELECT value for the given AP and register bank
    pub const fn new(apsel: u8, bank: u8, ctrlsel: bool) -> Self {
        let mut value = ((apsel as u32 & 0xF) << Self::APSEL_SHIFT)
            | Self::FIXED
            | ((bank as u32 & 0xF) << Self::BANK_SHIFT);
        if ctrlsel {
            value |= Self::CTRLSEL;
        }
        Select(value)
    }

    /// Get raw register value
    pub fn value(&self) -> u32 {
        self.0
    }

    /// Get the selected AP
    pub fn apsel(&self) -> u8 {
        ((self.0 >> Self::APSEL_SHIFT) & 0xF) as u8
    }

    /// Get the selected AP register bank
    pub fn bank(&self) -> u8 {
        ((self.0 >> Self::BANK_SHIFT) & 0xF) as u8
    }

    /// Get the ctrlsel flag
    pub fn ctrlsel(&self) -> bool {
        self.0 & Self::CTRLSEL != 0
    }

    /// The register bank an AP register address falls in
    pub const fn bank_of(reg: u8) -> u8 {
        (reg >> 4) & 0xF
    }
}

impl Default for Select {
    fn default() -> Self {
        Select::new(0, 0, false)
    }
}

/// RDBUFF Register descriptor (read-only)
pub struct RdBuffRegister;

impl RegisterDescriptor for RdBuffRegister {
    const ADDRESS: u8 = 0x0C;
    type Value = RdBuff;
}

impl ReadableRegister for RdBuffRegister {}
impl DpRegister for RdBuffRegister {}

/// Debug Port RDBUFF register data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RdBuff(u32);

register_data_r!(RdBuff);

impl RdBuff {
    pub fn data(&self) -> u32 {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn select_encoding_matches_rp2350_layout() {
        // RISC-V APB-AP, bank 1, ctrlsel set
        let select = Select::new(0xA, 1, true);
        assert_eq!(select.value(), 0xAD11);
        assert_eq!(select.apsel(), 0xA);
        assert_eq!(select.bank(), 1);
        assert!(select.ctrlsel());

        // Bits 11:8 carry the fixed 0xD in every encoding
        for apsel in 0..=0xF {
            for bank in 0..=0xF {
                let select = Select::new(apsel, bank, false);
                assert_eq!((select.value() >> 8) & 0xF, 0xD);
                assert_eq!(select.apsel(), apsel);
                assert_eq!(select.bank(), bank);
                assert!(!select.ctrlsel());
            }
        }
    }

    #[test]
    fn select_bank_of_uses_address_bits_7_4() {
        assert_eq!(Select::bank_of(0x00), 0);
        assert_eq!(Select::bank_of(0x0C), 0);
        assert_eq!(Select::bank_of(0x10), 1);
        assert_eq!(Select::bank_of(0xFC), 0xF);
    }

    #[test]
    fn ctrl_stat_power_request_and_ack() {
        let req = CtrlStat::power_up_request();
        assert_eq!(req.value(), (1 << 28) | (1 << 30));

        let status = CtrlStat::from((1 << 29) | (1 << 31));
        assert!(status.cdbgpwrupack());
        assert!(status.csyspwrupack());
        assert!(status.powered());

        let partial = CtrlStat::from(1 << 29);
        assert!(!partial.powered());
    }

    #[test]
    fn ctrl_stat_error_clear_is_w1c_of_all_sticky_flags() {
        let clear = CtrlStat::clear_errors();
        assert_eq!(clear.value(), (1 << 5) | (1 << 7) | (1 << 1) | (1 << 4));

        let status = CtrlStat::from(1 << 5);
        assert!(status.stickyerr());
        assert!(status.has_errors());
        assert!(!CtrlStat::default().has_errors());
    }

    #[test]
    fn idcode_fields() {
        let idcode = IdCode::RP2350;
        assert_eq!(idcode.designer_id(), 0x23B);
        assert_eq!(idcode.designer_name(), "ARM Ltd");
        assert!(idcode.is_valid());

        // A floating line reads back as all ones or all zeros
        assert!(!IdCode::from_u32(0x0000_0000).is_valid());
        assert!(!IdCode::from_u32(0xF000_0000).is_valid());
    }
}
