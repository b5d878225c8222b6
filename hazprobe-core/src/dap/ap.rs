// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

//! Access Port Registers
//!
//! MEM-AP register definitions (`CSW`, `TAR`, `DRW`, `IDR`) plus the
//! RP2350's AP slot assignments.

use crate::dap::register::{
    ApRegister, ReadableRegister, RegisterDescriptor, WritableRegister,
};
use crate::{register_data_r, register_data_rw};
use core::fmt;

/// RP2350 Access Port slots
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ApSel {
    /// ROM table
    RomTable,

    /// ARM core 0 AHB-AP
    ArmCore0,

    /// ARM core 1 AHB-AP
    ArmCore1,

    /// RP-AP (Raspberry Pi specific)
    RpSpecific,

    /// RISC-V APB-AP - the one hazprobe uses
    Riscv,
}

impl ApSel {
    /// The APSEL value for this slot
    pub const fn index(&self) -> u8 {
        match self {
            ApSel::RomTable => 0x0,
            ApSel::ArmCore0 => 0x2,
            ApSel::ArmCore1 => 0x4,
            ApSel::RpSpecific => 0x8,
            ApSel::Riscv => 0xA,
        }
    }
}

impl fmt::Display for ApSel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ApSel::RomTable => "ROM table",
            ApSel::ArmCore0 => "ARM core 0 AHB-AP",
            ApSel::ArmCore1 => "ARM core 1 AHB-AP",
            ApSel::RpSpecific => "RP-AP",
            ApSel::Riscv => "RISC-V APB-AP",
        };
        write!(f, "{name} (0x{:X})", self.index())
    }
}

/// Control/Status Word Register descriptor (read-write)
pub struct CswRegister;

impl RegisterDescriptor for CswRegister {
    const ADDRESS: u8 = 0x00;
    type Value = Csw;
}

impl ReadableRegister for CswRegister {}
impl WritableRegister for CswRegister {}
impl ApRegister for CswRegister {}

/// Control/Status Word register data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Csw(u32);

register_data_rw!(Csw);

impl Csw {
    const SIZE_MASK: u32 = 0b111;
    const SIZE_SHIFT: u32 = 0;

    const ADDRINC_MASK: u32 = 0b11;
    const ADDRINC_SHIFT: u32 = 4;

    const DEVICE_EN: u32 = 1 << 6;

    // Size values
    pub const SIZE_8BIT: u32 = 0b000;
    pub const SIZE_16BIT: u32 = 0b001;
    pub const SIZE_32BIT: u32 = 0b010;

    // Address increment values
    pub const ADDRINC_OFF: u32 = 0b00;
    pub const ADDRINC_SINGLE: u32 = 0b01;

    /// The standard working value for the RISC-V APB-AP: 32-bit transfers,
    /// no auto-increment, debug master prot bits
    pub const RISCV_32BIT: Csw = Csw(0xA200_0002);

    /// Get raw register value
    pub fn value(&self) -> u32 {
        self.0
    }

    /// Get size field
    pub fn size(&self) -> u32 {
        (self.0 >> Self::SIZE_SHIFT) & Self::SIZE_MASK
    }

    /// Get address increment field
    pub fn addrinc(&self) -> u32 {
        (self.0 >> Self::ADDRINC_SHIFT) & Self::ADDRINC_MASK
    }

    /// Get device enable flag
    pub fn device_en(&self) -> bool {
        self.0 & Self::DEVICE_EN != 0
    }

    /// Set size field
    pub fn set_size(&mut self, size: u32) {
        self.0 = (self.0 & !(Self::SIZE_MASK << Self::SIZE_SHIFT))
            | ((size & Self::SIZE_MASK) << Self::SIZE_SHIFT);
    }

    /// Set address increment field
    pub fn set_addrinc(&mut self, addrinc: u32) {
        self.0 = (self.0 & !(Self::ADDRINC_MASK << Self::ADDRINC_SHIFT))
            | ((addrinc & Self::ADDRINC_MASK) << Self::ADDRINC_SHIFT);
    }
}

/// Transfer Address Register descriptor (read-write)
pub struct TarRegister;

impl RegisterDescriptor for TarRegister {
    const ADDRESS: u8 = 0x04;
    type Value = Tar;
}

impl ReadableRegister for TarRegister {}
impl WritableRegister for TarRegister {}
impl ApRegister for TarRegister {}

/// Transfer Address register data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Tar(u32);

register_data_rw!(Tar);

impl Tar {
    pub fn addr(&self) -> u32 {
        self.0
    }
}

/// Data Read/Write Register descriptor (read-write)
pub struct DrwRegister;

impl RegisterDescriptor for DrwRegister {
    const ADDRESS: u8 = 0x0C;
    type Value = Drw;
}

impl ReadableRegister for DrwRegister {}
impl WritableRegister for DrwRegister {}
impl ApRegister for DrwRegister {}

/// Data Read/Write register data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Drw(u32);

register_data_rw!(Drw);

impl Drw {
    pub fn data(&self) -> u32 {
        self.0
    }
}

/// Identification Register descriptor (read-only)
pub struct IdrRegister;

impl RegisterDescriptor for IdrRegister {
    const ADDRESS: u8 = 0xFC;
    type Value = Idr;
}

impl ReadableRegister for IdrRegister {}
impl ApRegister for IdrRegister {}

/// AP Identification register data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Idr(u32);

register_data_r!(Idr);

impl Idr {
    /// Get AP class field (bits 16:13)
    pub fn class(&self) -> u8 {
        ((self.0 >> 13) & 0xF) as u8
    }

    /// Get AP type field (bits 3:0)
    pub fn ap_type(&self) -> u8 {
        (self.0 & 0xF) as u8
    }

    /// Get JEDEC designer ID (bits 27:17)
    pub fn designer_id(&self) -> u16 {
        ((self.0 >> 17) & 0x7FF) as u16
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ap_slots_match_the_rp2350_assignments() {
        assert_eq!(ApSel::RomTable.index(), 0x0);
        assert_eq!(ApSel::ArmCore0.index(), 0x2);
        assert_eq!(ApSel::ArmCore1.index(), 0x4);
        assert_eq!(ApSel::RpSpecific.index(), 0x8);
        assert_eq!(ApSel::Riscv.index(), 0xA);
    }

    #[test]
    fn csw_riscv_value_is_32bit_no_increment() {
        let csw = Csw::RISCV_32BIT;
        assert_eq!(csw.size(), Csw::SIZE_32BIT);
        assert_eq!(csw.addrinc(), Csw::ADDRINC_OFF);
        assert!(csw.device_en());
        assert_eq!(csw.value(), 0xA2000002);
    }

    #[test]
    fn csw_field_setters_round_trip() {
        let mut csw = Csw::default();
        csw.set_size(Csw::SIZE_16BIT);
        csw.set_addrinc(Csw::ADDRINC_SINGLE);
        assert_eq!(csw.size(), Csw::SIZE_16BIT);
        assert_eq!(csw.addrinc(), Csw::ADDRINC_SINGLE);

        csw.set_addrinc(Csw::ADDRINC_OFF);
        assert_eq!(csw.addrinc(), Csw::ADDRINC_OFF);
        assert_eq!(csw.size(), Csw::SIZE_16BIT);
    }

    #[test]
    fn register_addresses() {
        assert_eq!(CswRegister::ADDRESS, 0x00);
        assert_eq!(TarRegister::ADDRESS, 0x04);
        assert_eq!(DrwRegister::ADDRESS, 0x0C);
        assert_eq!(IdrRegister::ADDRESS, 0xFC);
    }
}
