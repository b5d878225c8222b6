// Copyright (C) 2025 Piers Finlayson <piers@piers.rocks>
//
// MIT License

//! RISC-V Debug Module Registers
//!
//! Register offsets and bitfield layouts for the Hazard3 Debug Module, as
//! reached through the RISC-V APB-AP.  Offsets are byte offsets (debug-spec
//! register index x 4), ready to be dropped into the MEM-AP `TAR`.

use bitfield::bitfield;

/// Byte offset of `DATA0` (abstract command data)
pub const DATA0: u32 = 0x04 * 4;

/// Byte offset of `DMCONTROL`
pub const DMCONTROL: u32 = 0x10 * 4;

/// Byte offset of `DMSTATUS`
pub const DMSTATUS: u32 = 0x11 * 4;

/// Byte offset of `ABSTRACTCS`
pub const ABSTRACTCS: u32 = 0x16 * 4;

/// Byte offset of `COMMAND`
pub const COMMAND: u32 = 0x17 * 4;

/// Byte offset of `PROGBUF0`
pub const PROGBUF0: u32 = 0x20 * 4;

/// Byte offset of `SBCS` (System Bus Access control/status)
pub const SBCS: u32 = 0x38 * 4;

/// Byte offset of `SBADDRESS0`
pub const SBADDRESS0: u32 = 0x39 * 4;

/// Byte offset of `SBDATA0`
pub const SBDATA0: u32 = 0x3C * 4;

/// Program buffer capacity in 32-bit words
pub const PROGBUF_WORDS: usize = 16;

/// Byte offset of program buffer word `index`
pub const fn progbuf(index: usize) -> u32 {
    PROGBUF0 + (index as u32) * 4
}

/// The `DMSTATUS`-path value the RP2350 DM reports once the activation
/// handshake has taken.  Anything else means the DM did not come up.
pub const DM_READY_STATUS: u32 = 0x0401_0001;

/// The three `CSW` values written, in order, during the RP2350's
/// undocumented DM activation handshake (reset, activate, configure).  Each
/// write is followed by an `RDBUFF` read and a settle delay.
pub const DM_ACTIVATION_CSW_SEQ: [u32; 3] = [0x0000_0000, 0x0000_0001, 0x07FF_FFC1];

bitfield! {
    /// The `dmcontrol` register.  Hart selection and halt/resume/reset
    /// requests.
    #[derive(Clone, Copy, PartialEq, Eq)]
    pub struct Dmcontrol(u32);
    impl Debug;

    pub haltreq, set_haltreq: 31;
    pub resumereq, set_resumereq: 30;
    pub hartsello, set_hartsello: 25, 16;
    pub ndmreset, set_ndmreset: 1;
    pub dmactive, set_dmactive: 0;
}

impl Dmcontrol {
    /// Base value for any hart-directed DM access: `dmactive` set and the
    /// hart selected.  Every hart-dependent register access must be
    /// preceded by a write of (at least) this value - `allhalted` and
    /// `allrunning` in `DMSTATUS` reflect the selected hart only.
    pub fn select_hart(hart_id: u8) -> Self {
        let mut dmcontrol = Dmcontrol(0);
        dmcontrol.set_dmactive(true);
        dmcontrol.set_hartsello(hart_id as u32);
        dmcontrol
    }
}

impl From<Dmcontrol> for u32 {
    fn from(register: Dmcontrol) -> Self {
        register.0
    }
}

impl From<u32> for Dmcontrol {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

bitfield! {
    /// The `dmstatus` register (read-only).  The `all*` bits reflect the
    /// hart currently selected in `dmcontrol`.
    #[derive(Clone, Copy, PartialEq, Eq)]
    pub struct Dmstatus(u32);
    impl Debug;

    pub allresumeack, _: 17;
    pub allrunning, _: 11;
    pub anyrunning, _: 10;
    pub allhalted, _: 9;
    pub anyhalted, _: 8;
    pub authenticated, _: 7;
    pub version, _: 3, 0;
}

impl From<Dmstatus> for u32 {
    fn from(register: Dmstatus) -> Self {
        register.0
    }
}

impl From<u32> for Dmstatus {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

bitfield! {
    /// The `abstractcs` register.  `cmderr` is write-1-to-clear.
    #[derive(Clone, Copy, PartialEq, Eq)]
    pub struct Abstractcs(u32);
    impl Debug;

    pub progbufsize, _: 28, 24;
    pub busy, _: 12;
    pub u8, cmderr, set_cmderr: 10, 8;
    pub datacount, _: 3, 0;
}

impl Abstractcs {
    /// Write-1-to-clear value for the whole `cmderr` field
    pub const CMDERR_CLEAR: u32 = 0x700;
}

impl From<Abstractcs> for u32 {
    fn from(register: Abstractcs) -> Self {
        register.0
    }
}

impl From<u32> for Abstractcs {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

bitfield! {
    /// The Access Register abstract command, written to `COMMAND`.
    #[derive(Clone, Copy, PartialEq, Eq)]
    pub struct AccessRegisterCommand(u32);
    impl Debug;

    pub _, set_cmdtype: 31, 24;
    pub aarsize, set_aarsize: 22, 20;
    pub postexec, set_postexec: 18;
    pub transfer, set_transfer: 17;
    pub write, set_write: 16;
    pub regno, set_regno: 15, 0;
}

impl AccessRegisterCommand {
    /// Abstract `regno` space offset of the GPRs: x_n lives at 0x1000 + n
    pub const REGNO_GPR_BASE: u32 = 0x1000;

    /// `aarsize` encoding for 32-bit accesses
    pub const AARSIZE_32: u32 = 2;

    /// Command that transfers GPR x_n into `DATA0`
    pub fn read_gpr(reg_num: u8) -> Self {
        let mut command = AccessRegisterCommand(0);
        command.set_regno(Self::REGNO_GPR_BASE + reg_num as u32);
        command.set_transfer(true);
        command.set_aarsize(Self::AARSIZE_32);
        command
    }

    /// Command that transfers `DATA0` into GPR x_n
    pub fn write_gpr(reg_num: u8) -> Self {
        let mut command = Self::read_gpr(reg_num);
        command.set_write(true);
        command
    }

    /// Command that only runs the program buffer - no register transfer
    pub fn postexec_only() -> Self {
        let mut command = AccessRegisterCommand(0);
        command.set_postexec(true);
        command
    }
}

impl From<AccessRegisterCommand> for u32 {
    fn from(register: AccessRegisterCommand) -> Self {
        register.0
    }
}

impl From<u32> for AccessRegisterCommand {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

bitfield! {
    /// The `sbcs` register.  System Bus Access control and status.
    /// `sberror` and `sbbusyerror` are write-1-to-clear.
    #[derive(Clone, Copy, PartialEq, Eq)]
    pub struct Sbcs(u32);
    impl Debug;

    pub sbversion, _: 31, 29;
    pub sbbusyerror, set_sbbusyerror: 22;
    pub sbbusy, _: 21;
    pub sbreadonaddr, set_sbreadonaddr: 20;
    pub sbaccess, set_sbaccess: 19, 17;
    pub sbautoincrement, set_sbautoincrement: 16;
    pub sbreadondata, set_sbreadondata: 15;
    pub u8, sberror, set_sberror: 14, 12;
    pub sbasize, _: 11, 5;
    pub sbaccess32, _: 2;
}

impl Sbcs {
    /// `sbaccess` encoding for 32-bit transfers
    pub const SBACCESS_32: u32 = 2;

    /// The working SBA configuration: 32-bit width, read triggered by
    /// address writes
    pub fn configure() -> Self {
        let mut sbcs = Sbcs(0);
        sbcs.set_sbaccess(Self::SBACCESS_32);
        sbcs.set_sbreadonaddr(true);
        sbcs
    }
}

impl From<Sbcs> for u32 {
    fn from(register: Sbcs) -> Self {
        register.0
    }
}

impl From<u32> for Sbcs {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_offsets() {
        assert_eq!(DATA0, 0x10);
        assert_eq!(DMCONTROL, 0x40);
        assert_eq!(DMSTATUS, 0x44);
        assert_eq!(ABSTRACTCS, 0x58);
        assert_eq!(COMMAND, 0x5C);
        assert_eq!(PROGBUF0, 0x80);
        assert_eq!(progbuf(1), 0x84);
        assert_eq!(progbuf(15), 0x80 + 15 * 4);
        assert_eq!(SBCS, 0xE0);
        assert_eq!(SBADDRESS0, 0xE4);
        assert_eq!(SBDATA0, 0xF0);
    }

    #[test]
    fn dmcontrol_composition() {
        let dmcontrol = Dmcontrol::select_hart(1);
        assert_eq!(u32::from(dmcontrol), (1 << 16) | 1);

        let mut halt = Dmcontrol::select_hart(0);
        halt.set_haltreq(true);
        assert_eq!(u32::from(halt), (1u32 << 31) | 1);

        let mut resume = Dmcontrol::select_hart(1);
        resume.set_resumereq(true);
        assert_eq!(u32::from(resume), (1 << 30) | (1 << 16) | 1);

        let mut reset = Dmcontrol::select_hart(0);
        reset.set_ndmreset(true);
        reset.set_haltreq(true);
        assert_eq!(u32::from(reset), (1u32 << 31) | (1 << 1) | 1);
    }

    #[test]
    fn dmstatus_bits() {
        let status = Dmstatus::from(1u32 << 9);
        assert!(status.allhalted());
        assert!(!status.allrunning());

        let status = Dmstatus::from(1u32 << 11);
        assert!(status.allrunning());
        assert!(!status.allhalted());
    }

    #[test]
    fn abstractcs_busy_and_cmderr() {
        let cs = Abstractcs::from(1u32 << 12);
        assert!(cs.busy());
        assert_eq!(cs.cmderr(), 0);

        let cs = Abstractcs::from(2u32 << 8);
        assert!(!cs.busy());
        assert_eq!(cs.cmderr(), 2);

        assert_eq!(Abstractcs::CMDERR_CLEAR, 0x700);
    }

    #[test]
    fn abstract_command_encoding() {
        // Read x5: regno=0x1005, transfer, aarsize=2
        let read = AccessRegisterCommand::read_gpr(5);
        assert_eq!(u32::from(read), 0x1005 | (1 << 17) | (2 << 20));

        // Write x31 adds the write bit
        let write = AccessRegisterCommand::write_gpr(31);
        assert_eq!(u32::from(write), 0x101F | (1 << 16) | (1 << 17) | (2 << 20));

        // Program buffer execution carries no transfer
        let postexec = AccessRegisterCommand::postexec_only();
        assert_eq!(u32::from(postexec), 1 << 18);
    }

    #[test]
    fn sbcs_configure_and_fields() {
        let sbcs = Sbcs::configure();
        assert_eq!(u32::from(sbcs), (2 << 17) | (1 << 20));

        // sbasize reports the bus address width
        let status = Sbcs::from(32u32 << 5);
        assert_eq!(status.sbasize(), 32);

        let errored = Sbcs::from(3u32 << 12);
        assert_eq!(errored.sberror(), 3);

        let mut clear = Sbcs::from(0);
        clear.set_sberror(0x7);
        assert_eq!(u32::from(clear), 0x7 << 12);
    }
}
