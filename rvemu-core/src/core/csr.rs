//! The control and status register file.
//!
//! Every supported CSR is described by a row of a lookup table: the storage it is backed by and
//! the masks applied to reads and writes. Several CSRs share storage (`sstatus` is a view of
//! `mstatus`, `sie`/`sip` are views of `mie`/`mip`) and only differ in their masks.

use log::trace;
use thiserror::Error;

use super::counters::Counters;
use super::status::Status;
use super::trap::{Cause, Tvec};
use super::Core;
use crate::bits::merge;
use crate::bus::Bus;
use crate::{PrivilegeLevel, RawPrivilegeLevel};

/// General 12-bit value representing a CSR specifier. Note that this can hold any 12-bit value,
/// even if the value represents an unsupported or non-existent CSR.
pub type CsrSpecifier = u16;

//
// Supervisor trap setup (`0x100`, `0x104..=0x106`).
//
/// Supervisor status register.
pub const SSTATUS: CsrSpecifier = 0x100;
/// Supervisor interrupt-enable register.
pub const SIE: CsrSpecifier = 0x104;
/// Supervisor trap handler base address.
pub const STVEC: CsrSpecifier = 0x105;
/// Supervisor counter enable.
pub const SCOUNTEREN: CsrSpecifier = 0x106;

//
// Supervisor trap handling (`0x140..=0x144`).
//
/// Scratch register for supervisor trap handling.
pub const SSCRATCH: CsrSpecifier = 0x140;
/// Supervisor exception program counter.
pub const SEPC: CsrSpecifier = 0x141;
/// Supervisor trap cause.
pub const SCAUSE: CsrSpecifier = 0x142;
/// Supervisor bad address or instruction.
pub const STVAL: CsrSpecifier = 0x143;
/// Supervisor interrupt pending.
pub const SIP: CsrSpecifier = 0x144;

/// Supervisor address translation and protection.
pub const SATP: CsrSpecifier = 0x180;

//
// Machine trap setup (`0x300..=0x306`, `0x310`).
//
/// Machine status register.
pub const MSTATUS: CsrSpecifier = 0x300;
/// ISA and extensions.
pub const MISA: CsrSpecifier = 0x301;
/// Machine exception delegation register.
pub const MEDELEG: CsrSpecifier = 0x302;
/// Machine interrupt delegation register.
pub const MIDELEG: CsrSpecifier = 0x303;
/// Machine interrupt-enable register.
pub const MIE: CsrSpecifier = 0x304;
/// Machine trap-handle base address.
pub const MTVEC: CsrSpecifier = 0x305;
/// Machine counter enable.
pub const MCOUNTEREN: CsrSpecifier = 0x306;
/// Additional machine status register, RV32 only.
pub const MSTATUSH: CsrSpecifier = 0x310;

//
// Machine trap handling (`0x340..=0x344`).
//
/// Scratch register for machine trap handlers.
pub const MSCRATCH: CsrSpecifier = 0x340;
/// Machine exception program counter.
pub const MEPC: CsrSpecifier = 0x341;
/// Machine trap cause.
pub const MCAUSE: CsrSpecifier = 0x342;
/// Machine bad address or instruction.
pub const MTVAL: CsrSpecifier = 0x343;
/// Machine interrupt pending.
pub const MIP: CsrSpecifier = 0x344;

//
// Unprivileged counters/timers (`0xC00..=0xC02`, `0xC80..=0xC82`).
//
/// Cycle counter for RDCYCLE instruction.
pub const CYCLE: CsrSpecifier = 0xC00;
/// Timer for RDTIME instruction.
pub const TIME: CsrSpecifier = 0xC01;
/// Instructions-retired counter for RDINSTRET instruction.
pub const INSTRET: CsrSpecifier = 0xC02;
/// Upper 32 bits of [`CYCLE`], RV32 only.
pub const CYCLEH: CsrSpecifier = 0xC80;
/// Upper 32 bits of [`TIME`], RV32 only.
pub const TIMEH: CsrSpecifier = 0xC81;
/// Upper 32 bits of [`INSTRET`], RV32 only.
pub const INSTRETH: CsrSpecifier = 0xC82;

//
// Machine information registers (`0xF11..=0xF14`).
//
/// Vendor ID.
pub const MVENDORID: CsrSpecifier = 0xF11;
/// Architecture ID.
pub const MARCHID: CsrSpecifier = 0xF12;
/// Implementation ID.
pub const MIMPID: CsrSpecifier = 0xF13;
/// Hardware thead ID.
pub const MHARTID: CsrSpecifier = 0xF14;

/// `misa`: MXL=1 (32-bit) with the A, C, I, M, S and U extensions.
pub const MISA_VALUE: u32 = 1 << 30 | 1 | 1 << 2 | 1 << 8 | 1 << 12 | 1 << 18 | 1 << 20;

/// The mstatus bits visible through sstatus: SD, MXR, SUM, XS, FS, VS, SPP, UBE, SPIE, SIE.
pub const SSTATUS_MASK: u32 = 0x800D_E762;
const MSTATUS_MASK: u32 = 0x807F_FFEC;
/// The mstatush bits that exist: MBE and SBE.
const MSTATUSH_MASK: u32 = 0x30;
/// SSIP, STIP and SEIP.
const SUPERVISOR_INTERRUPTS: u32 = 0x222;
/// All six standard interrupt bits.
const MACHINE_INTERRUPTS: u32 = 0xAAA;
const ALL: u32 = u32::MAX;

/// Returns `true` if this CSR only supports read access.
pub fn is_read_only(specifier: CsrSpecifier) -> bool {
    // The top two bits of a CSR specifier indicate whether the CSR is read-only (0b11) or
    // read/write (0b00, 0b01, 0b10)
    specifier >> 10 & 0b11 == 0b11
}

/// Returns the minimum required privilege level to access this CSR.
///
/// Note that this returns a [`RawPrivilegeLevel`], meaning the minimum required privilege level
/// may be a reserved level. This still has a defined meaning: only higher privilege levels are
/// allowed to access the CSR.
pub fn required_privilege_level(specifier: CsrSpecifier) -> RawPrivilegeLevel {
    // Bits `9:8` indicate the minimum required privilege level
    RawPrivilegeLevel::from_u2((specifier >> 8) as u32)
}

/// The storage a CSR reads from and writes to.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum Slot {
    Status,
    StatusH,
    Misa,
    Medeleg,
    Mideleg,
    Mie,
    Mip,
    Mtvec,
    Stvec,
    Mcounteren,
    Scounteren,
    Mscratch,
    Sscratch,
    Mepc,
    Sepc,
    Mcause,
    Scause,
    Mtval,
    Stval,
    Satp,
    Cycle,
    CycleH,
    Time,
    TimeH,
    HartId,
    Zero,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
struct CsrEntry {
    slot: Slot,
    read_mask: u32,
    write_mask: u32,
}

const fn entry(slot: Slot, read_mask: u32, write_mask: u32) -> Option<CsrEntry> {
    Some(CsrEntry {
        slot,
        read_mask,
        write_mask,
    })
}

fn lookup(specifier: CsrSpecifier) -> Option<CsrEntry> {
    use Slot::*;
    match specifier {
        SSTATUS => entry(Status, SSTATUS_MASK, SSTATUS_MASK),
        SIE => entry(Mie, SUPERVISOR_INTERRUPTS, SUPERVISOR_INTERRUPTS),
        STVEC => entry(Stvec, ALL, ALL),
        SCOUNTEREN => entry(Scounteren, ALL, 0),
        SSCRATCH => entry(Sscratch, ALL, ALL),
        SEPC => entry(Sepc, ALL, ALL),
        SCAUSE => entry(Scause, ALL, ALL),
        STVAL => entry(Stval, ALL, ALL),
        SIP => entry(Mip, SUPERVISOR_INTERRUPTS, SUPERVISOR_INTERRUPTS),
        SATP => entry(Satp, ALL, ALL),
        MSTATUS => entry(Status, MSTATUS_MASK, MSTATUS_MASK),
        MISA => entry(Misa, ALL, 0),
        MEDELEG => entry(Medeleg, ALL, ALL),
        MIDELEG => entry(Mideleg, ALL, ALL),
        MIE => entry(Mie, ALL, MACHINE_INTERRUPTS),
        MTVEC => entry(Mtvec, ALL, ALL),
        MCOUNTEREN => entry(Mcounteren, ALL, 0),
        MSTATUSH => entry(StatusH, MSTATUSH_MASK, MSTATUSH_MASK),
        MSCRATCH => entry(Mscratch, ALL, ALL),
        MEPC => entry(Mepc, ALL, ALL),
        MCAUSE => entry(Mcause, ALL, ALL),
        MTVAL => entry(Mtval, ALL, 0),
        MIP => entry(Mip, ALL, MACHINE_INTERRUPTS),
        CYCLE | INSTRET => entry(Cycle, ALL, 0),
        CYCLEH | INSTRETH => entry(CycleH, ALL, 0),
        TIME => entry(Time, ALL, 0),
        TIMEH => entry(TimeH, ALL, 0),
        MVENDORID | MARCHID | MIMPID => entry(Zero, ALL, 0),
        MHARTID => entry(HartId, ALL, 0),
        _ => None,
    }
}

/// Storage for all CSRs of a hart.
#[derive(Debug, Clone)]
pub struct CsrFile {
    pub(super) status: Status,
    pub(super) medeleg: u32,
    pub(super) mideleg: u32,
    pub(super) mie: u32,
    pub(super) mip: u32,
    pub(super) mtvec: Tvec,
    pub(super) stvec: Tvec,
    pub(super) mcounteren: u32,
    pub(super) scounteren: u32,
    pub(super) mscratch: u32,
    pub(super) sscratch: u32,
    pub(super) mepc: u32,
    pub(super) sepc: u32,
    pub(super) mcause: Cause,
    pub(super) scause: Cause,
    pub(super) mtval: u32,
    pub(super) stval: u32,
    pub(super) satp: u32,
    pub(super) counters: Counters,
    hart_id: u32,
}

impl CsrFile {
    /// Returns the reset state of the CSRs of hart `hart_id`.
    pub fn new(hart_id: u32) -> Self {
        Self {
            status: Status::new(),
            medeleg: 0,
            mideleg: 0,
            mie: 0,
            mip: 0,
            mtvec: Tvec::new(),
            stvec: Tvec::new(),
            mcounteren: 0,
            scounteren: 0,
            mscratch: 0,
            sscratch: 0,
            mepc: 0,
            sepc: 0,
            mcause: Cause::new(),
            scause: Cause::new(),
            mtval: 0,
            stval: 0,
            satp: 0,
            counters: Counters::new(),
            hart_id,
        }
    }

    pub fn status(&self) -> &Status {
        &self.status
    }

    pub fn counters(&self) -> &Counters {
        &self.counters
    }

    pub fn satp(&self) -> u32 {
        self.satp
    }

    pub fn mip(&self) -> u32 {
        self.mip
    }

    pub fn mie(&self) -> u32 {
        self.mie
    }

    pub fn hart_id(&self) -> u32 {
        self.hart_id
    }

    fn read_slot(&self, slot: Slot) -> u32 {
        match slot {
            Slot::Status => self.status.mstatus(),
            Slot::StatusH => self.status.mstatush(),
            Slot::Misa => MISA_VALUE,
            Slot::Medeleg => self.medeleg,
            Slot::Mideleg => self.mideleg,
            Slot::Mie => self.mie,
            Slot::Mip => self.mip,
            Slot::Mtvec => self.mtvec.read(),
            Slot::Stvec => self.stvec.read(),
            Slot::Mcounteren => self.mcounteren,
            Slot::Scounteren => self.scounteren,
            Slot::Mscratch => self.mscratch,
            Slot::Sscratch => self.sscratch,
            Slot::Mepc => self.mepc,
            Slot::Sepc => self.sepc,
            Slot::Mcause => self.mcause.read(),
            Slot::Scause => self.scause.read(),
            Slot::Mtval => self.mtval,
            Slot::Stval => self.stval,
            Slot::Satp => self.satp,
            Slot::Cycle => self.counters.cycle(),
            Slot::CycleH => self.counters.cycleh(),
            Slot::Time => self.counters.time(),
            Slot::TimeH => self.counters.timeh(),
            Slot::HartId => self.hart_id,
            Slot::Zero => 0,
        }
    }

    fn write_slot(&mut self, slot: Slot, value: u32, mask: u32) {
        match slot {
            Slot::Status => self.status.write_mstatus(value, mask),
            Slot::StatusH => self.status.write_mstatush(value, mask),
            Slot::Medeleg => self.medeleg = merge(self.medeleg, value, mask),
            Slot::Mideleg => self.mideleg = merge(self.mideleg, value, mask),
            Slot::Mie => self.mie = merge(self.mie, value, mask),
            Slot::Mip => self.mip = merge(self.mip, value, mask),
            Slot::Mtvec => self.mtvec.write(value, mask),
            Slot::Stvec => self.stvec.write(value, mask),
            Slot::Mcounteren => self.mcounteren = merge(self.mcounteren, value, mask),
            Slot::Scounteren => self.scounteren = merge(self.scounteren, value, mask),
            Slot::Mscratch => self.mscratch = merge(self.mscratch, value, mask),
            Slot::Sscratch => self.sscratch = merge(self.sscratch, value, mask),
            // IALIGN=16: only bit 0 of xepc is always zero.
            Slot::Mepc => self.mepc = merge(self.mepc, value, mask) & !1,
            Slot::Sepc => self.sepc = merge(self.sepc, value, mask) & !1,
            Slot::Mcause => self.mcause.write(value, mask),
            Slot::Scause => self.scause.write(value, mask),
            Slot::Mtval => self.mtval = merge(self.mtval, value, mask),
            Slot::Stval => self.stval = merge(self.stval, value, mask),
            Slot::Satp => self.satp = merge(self.satp, value, mask),
            Slot::Misa
            | Slot::Cycle
            | Slot::CycleH
            | Slot::Time
            | Slot::TimeH
            | Slot::HartId
            | Slot::Zero => {}
        }
    }
}

impl<B: Bus> Core<B> {
    fn check_csr_access(&self, specifier: CsrSpecifier) -> Result<CsrEntry, AccessError> {
        let entry = lookup(specifier).ok_or(AccessError::CsrUnsupported(specifier))?;
        let required_level = required_privilege_level(specifier);
        if self.privilege < required_level {
            return Err(AccessError::Privileged {
                specifier,
                required_level,
                actual_level: self.privilege,
            });
        }
        // > When TVM=1, attempts to read or write the satp CSR [...] while executing in S-mode
        // > will raise an illegal-instruction exception.
        if specifier == SATP
            && self.privilege == PrivilegeLevel::Supervisor
            && self.csrs.status.tvm()
        {
            return Err(AccessError::TrappedVirtualMemory);
        }
        Ok(entry)
    }

    /// Reads the value of a CSR as the current privilege level would.
    pub fn read_csr(&self, specifier: CsrSpecifier) -> Result<u32, AccessError> {
        let entry = self.check_csr_access(specifier)?;
        Ok(self.csrs.read_slot(entry.slot) & entry.read_mask)
    }

    /// Writes `value` to a CSR as the current privilege level would.
    ///
    /// Bits outside the CSR's write mask keep their value. Writing `satp` re-derives the ASID and
    /// flushes non-global translations.
    pub fn write_csr(&mut self, specifier: CsrSpecifier, value: u32) -> Result<(), WriteError> {
        let entry = self.check_csr_access(specifier)?;
        if is_read_only(specifier) {
            return Err(WriteError::WriteToReadOnly);
        }
        trace!("csr {:#05x} <- {:#010x}", specifier, value);
        self.csrs.write_slot(entry.slot, value, entry.write_mask);
        if entry.slot == Slot::Satp {
            self.mmu.satp_written(self.csrs.satp);
        }
        Ok(())
    }
}

#[derive(Error, Debug, Copy, Clone, Eq, PartialEq)]
pub enum AccessError {
    #[error("CSR {0:#05x} is not supported")]
    CsrUnsupported(CsrSpecifier),
    #[error(
        "CSR {specifier:#05x} requires privilege level {required_level}, current level is {actual_level}"
    )]
    Privileged {
        specifier: CsrSpecifier,
        required_level: RawPrivilegeLevel,
        actual_level: PrivilegeLevel,
    },
    #[error("satp is not accessible from S-mode while mstatus.TVM is set")]
    TrappedVirtualMemory,
}

#[derive(Error, Debug, Copy, Clone, Eq, PartialEq)]
pub enum WriteError {
    #[error(transparent)]
    AccessError(#[from] AccessError),
    #[error("attempted to write to a read-only CSR")]
    WriteToReadOnly,
}
