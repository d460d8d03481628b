use bitvec::{field::BitField, order::Lsb0, view::BitView};

use crate::bits::merge;
use crate::{PrivilegeLevel, RawPrivilegeLevel};

/// Typed view of the mstatus and mstatush registers.
///
/// > The mstatus register is an MXLEN-bit read/write register [...]. The mstatus register keeps
/// > track of and controls the hart’s current operating state. A restricted view of mstatus appears
/// > as the sstatus register in the S-level ISA.
///
/// The CSR gate decides which bits a guest write may touch. Trap entry and return go through the
/// typed setters below.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Status {
    mstatus: u32,
    mstatush: u32,
}

impl Status {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mstatus(&self) -> u32 {
        self.mstatus
    }

    pub fn mstatush(&self) -> u32 {
        self.mstatush
    }

    /// Replaces the bits of mstatus selected by `mask` with those of `value`.
    ///
    /// The MPP field is **WARL**: an update naming the reserved level keeps the previous MPP.
    pub fn write_mstatus(&mut self, value: u32, mask: u32) {
        let previous_mpp = self.mpp();
        self.mstatus = merge(self.mstatus, value, mask);
        let written: u32 = self.mstatus.view_bits::<Lsb0>()[idx::MPP..(idx::MPP + 2)].load_le();
        if RawPrivilegeLevel::from_u2(written).is_reserved() {
            self.set_mpp(previous_mpp);
        }
    }

    pub fn write_mstatush(&mut self, value: u32, mask: u32) {
        self.mstatush = merge(self.mstatush, value, mask);
    }

    /// Returns the global interrupt enable bit for `level` (SIE or MIE).
    ///
    /// U-mode has no global enable here, so `User` always reads `false`.
    pub fn ie(&self, level: PrivilegeLevel) -> bool {
        match level {
            PrivilegeLevel::User => false,
            PrivilegeLevel::Supervisor => self.sie(),
            PrivilegeLevel::Machine => self.mie(),
        }
    }

    /// Returns `true` if the MIE (M-mode Interrupt Enable) bit is set.
    pub fn mie(&self) -> bool {
        self.mstatus.view_bits::<Lsb0>()[idx::MIE]
    }

    pub fn set_mie(&mut self, value: bool) {
        self.mstatus.view_bits_mut::<Lsb0>().set(idx::MIE, value);
    }

    /// Returns `true` if the SIE (S-mode Interrupt Enable) bit is set.
    pub fn sie(&self) -> bool {
        self.mstatus.view_bits::<Lsb0>()[idx::SIE]
    }

    pub fn set_sie(&mut self, value: bool) {
        self.mstatus.view_bits_mut::<Lsb0>().set(idx::SIE, value);
    }

    /// Returns `true` if the MPIE (M-mode Previous Interrupt Enable) bit is set.
    pub fn mpie(&self) -> bool {
        self.mstatus.view_bits::<Lsb0>()[idx::MPIE]
    }

    pub fn set_mpie(&mut self, value: bool) {
        self.mstatus.view_bits_mut::<Lsb0>().set(idx::MPIE, value);
    }

    /// Returns `true` if the SPIE (S-mode Previous Interrupt Enable) bit is set.
    pub fn spie(&self) -> bool {
        self.mstatus.view_bits::<Lsb0>()[idx::SPIE]
    }

    pub fn set_spie(&mut self, value: bool) {
        self.mstatus.view_bits_mut::<Lsb0>().set(idx::SPIE, value);
    }

    /// Returns the privilege level held by the MPP (M-mode Previous Privilege) field.
    pub fn mpp(&self) -> PrivilegeLevel {
        let raw = RawPrivilegeLevel::from_u2(
            self.mstatus.view_bits::<Lsb0>()[idx::MPP..(idx::MPP + 2)].load_le(),
        );
        // Every write path filters out the reserved level.
        PrivilegeLevel::try_from(raw).unwrap_or(PrivilegeLevel::User)
    }

    pub fn set_mpp(&mut self, value: PrivilegeLevel) {
        self.mstatus.view_bits_mut::<Lsb0>()[idx::MPP..(idx::MPP + 2)].store_le(value.bits());
    }

    /// Returns the privilege level held by the one-bit SPP (S-mode Previous Privilege) field.
    pub fn spp(&self) -> PrivilegeLevel {
        if self.mstatus.view_bits::<Lsb0>()[idx::SPP] {
            PrivilegeLevel::Supervisor
        } else {
            PrivilegeLevel::User
        }
    }

    /// Sets SPP. SPP cannot hold `Machine`; that level is stored as `Supervisor`.
    pub fn set_spp(&mut self, value: PrivilegeLevel) {
        let bit = value != PrivilegeLevel::User;
        self.mstatus.view_bits_mut::<Lsb0>().set(idx::SPP, bit);
    }

    /// Returns `true` if the MPRV (Modify PRiVilege) bit is set.
    pub fn mprv(&self) -> bool {
        self.mstatus.view_bits::<Lsb0>()[idx::MPRV]
    }

    pub fn set_mprv(&mut self, value: bool) {
        self.mstatus.view_bits_mut::<Lsb0>().set(idx::MPRV, value);
    }

    /// Returns `true` if the SUM (permit Supervisor User Memory access) bit is set.
    pub fn sum(&self) -> bool {
        self.mstatus.view_bits::<Lsb0>()[idx::SUM]
    }

    /// Returns `true` if the MXR (Make eXecutable Readable) bit is set.
    pub fn mxr(&self) -> bool {
        self.mstatus.view_bits::<Lsb0>()[idx::MXR]
    }

    /// Returns `true` if the TVM (Trap Virtual Memory) bit is set.
    pub fn tvm(&self) -> bool {
        self.mstatus.view_bits::<Lsb0>()[idx::TVM]
    }

    /// Returns `true` if the TW (Timeout Wait) bit is set.
    pub fn tw(&self) -> bool {
        self.mstatus.view_bits::<Lsb0>()[idx::TW]
    }

    /// Returns `true` if the TSR (Trap SRET) bit is set.
    pub fn tsr(&self) -> bool {
        self.mstatus.view_bits::<Lsb0>()[idx::TSR]
    }
}

/// Bit indices into mstatus register.
pub(crate) mod idx {
    pub const SIE: usize = 1;
    pub const MIE: usize = 3;
    pub const SPIE: usize = 5;
    pub const MPIE: usize = 7;
    pub const SPP: usize = 8;
    pub const MPP: usize = 11;
    pub const MPRV: usize = 17;
    pub const SUM: usize = 18;
    pub const MXR: usize = 19;
    pub const TVM: usize = 20;
    pub const TW: usize = 21;
    pub const TSR: usize = 22;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mpp_is_warl() {
        let mut status = Status::new();
        status.write_mstatus(0b11 << idx::MPP, u32::MAX);
        assert_eq!(PrivilegeLevel::Machine, status.mpp());
        // Writing the reserved level keeps the previous value, other bits still update.
        status.write_mstatus((0b10 << idx::MPP) | (1 << idx::MIE), u32::MAX);
        assert_eq!(PrivilegeLevel::Machine, status.mpp());
        assert!(status.mie());
        status.write_mstatus(0b01 << idx::MPP, 0b11 << idx::MPP);
        assert_eq!(PrivilegeLevel::Supervisor, status.mpp());
        assert!(status.mie());
    }

    #[test]
    fn test_masked_write() {
        let mut status = Status::new();
        status.write_mstatus(u32::MAX, 1 << idx::SIE);
        assert_eq!(1 << idx::SIE, status.mstatus());
        assert!(status.ie(PrivilegeLevel::Supervisor));
        assert!(!status.ie(PrivilegeLevel::Machine));
        assert!(!status.ie(PrivilegeLevel::User));
    }

    #[test]
    fn test_spp_single_bit() {
        let mut status = Status::new();
        status.set_spp(PrivilegeLevel::Supervisor);
        assert_eq!(1 << idx::SPP, status.mstatus());
        assert_eq!(PrivilegeLevel::Supervisor, status.spp());
        status.set_spp(PrivilegeLevel::User);
        assert_eq!(PrivilegeLevel::User, status.spp());
    }
}
