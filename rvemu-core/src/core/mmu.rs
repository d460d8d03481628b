//! Sv32 address translation.
//!
//! > Sv32 implementations support a 32-bit virtual address space, divided into 4 KiB pages. An
//! > Sv32 virtual address is partitioned into a virtual page number (VPN) and page offset.
//!
//! Hardware never updates the A and D bits. A leaf with a clear A bit, or a clear D bit on a
//! write, raises a page fault so that software can set them.

use log::{debug, trace};

use super::memory::MemoryError;
use super::status::Status;
use super::tlb::{DataTlb, InstructionTlb, SuperpageTlb};
use crate::bits::{field, is_set};
use crate::bus::Bus;
use crate::{unit, PrivilegeLevel};

/// Kind of memory access being translated.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Access {
    Read,
    Write,
    Execute,
}

impl Access {
    // Bit in the R/W/X permission field of a PTE.
    fn permission_bit(self) -> u32 {
        match self {
            Self::Read => pte::R,
            Self::Write => pte::W,
            Self::Execute => pte::X,
        }
    }
}

/// PTE flag bit indices.
mod pte {
    pub const V: u32 = 0;
    pub const R: u32 = 1;
    pub const W: u32 = 2;
    pub const X: u32 = 3;
    pub const U: u32 = 4;
    pub const A: u32 = 6;
    pub const D: u32 = 7;
}

const PTE_SIZE: u32 = 4;

/// The state that decides how an address translates: `satp`, the relevant `mstatus` bits and the
/// current privilege level.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct TranslationContext {
    pub satp: u32,
    pub privilege: PrivilegeLevel,
    pub mprv: bool,
    pub mpp: PrivilegeLevel,
    pub sum: bool,
    pub mxr: bool,
}

impl TranslationContext {
    pub fn new(satp: u32, status: &Status, privilege: PrivilegeLevel) -> Self {
        Self {
            satp,
            privilege,
            mprv: status.mprv(),
            mpp: status.mpp(),
            sum: status.sum(),
            mxr: status.mxr(),
        }
    }

    /// Privilege level whose permissions apply to `access`.
    ///
    /// > When MPRV=1, load and store memory addresses are translated and protected, and endianness
    /// > is applied, as though the current privilege mode were set to MPP. Instruction
    /// > address-translation and protection are unaffected by the setting of MPRV.
    pub fn effective_privilege(&self, access: Access) -> PrivilegeLevel {
        if self.mprv && access != Access::Execute {
            self.mpp
        } else {
            self.privilege
        }
    }

    /// Returns `true` if `access` goes through the page tables.
    pub fn is_translated(&self, access: Access) -> bool {
        is_set(self.satp, 31) && self.effective_privilege(access) <= PrivilegeLevel::Supervisor
    }

    fn root_table(&self) -> u32 {
        field(self.satp, 21, 0) << 12
    }
}

/// The translation unit: three TLBs and the cached ASID.
#[derive(Debug, Clone, Default)]
pub struct Mmu {
    itlb: InstructionTlb,
    dtlb: DataTlb,
    stlb: SuperpageTlb,
    asid: u16,
}

impl Mmu {
    pub fn new() -> Self {
        Self::default()
    }

    /// The ASID taken from the last `satp` write.
    pub fn asid(&self) -> u16 {
        self.asid
    }

    /// Updates the ASID for a new `satp` value and drops every non-global translation.
    pub fn satp_written(&mut self, satp: u32) {
        self.asid = field(satp, 30, 22) as u16;
        self.itlb.flush_non_global();
        self.dtlb.flush_non_global();
        self.stlb.flush_non_global();
        debug!("satp written, flushed non-global TLB entries (asid {})", self.asid);
    }

    /// Drops every cached translation, including global ones.
    pub fn flush_all(&mut self) {
        self.itlb.flush_all();
        self.dtlb.flush_all();
        self.stlb.flush_all();
        debug!("flushed all TLB entries");
    }

    /// Returns `true` if `virtual_address` currently hits in one of the TLBs for `access`.
    pub fn is_cached(&self, virtual_address: u32, access: Access) -> bool {
        self.stlb.contains(virtual_address, self.asid)
            || match access {
                Access::Execute => self.itlb.contains(virtual_address, self.asid),
                Access::Read | Access::Write => self.dtlb.contains(virtual_address, self.asid),
            }
    }

    /// Total number of valid entries over all three TLBs.
    pub fn valid_entries(&self) -> usize {
        self.itlb.valid_entries() + self.dtlb.valid_entries() + self.stlb.valid_entries()
    }

    /// Translates `virtual_address` for `access`, walking the page tables through `bus` on a miss.
    pub fn translate<B: Bus>(
        &mut self,
        bus: &mut B,
        context: &TranslationContext,
        virtual_address: u32,
        access: Access,
    ) -> Result<u32, MemoryError> {
        if !context.is_translated(access) {
            return Ok(virtual_address);
        }

        let hit = self.stlb.lookup(virtual_address, self.asid).or_else(|| match access {
            Access::Execute => self.itlb.lookup(virtual_address, self.asid),
            Access::Read | Access::Write => self.dtlb.lookup(virtual_address, self.asid),
        });
        if let Some(hit) = hit {
            check_permissions(hit.pte, context, access)?;
            return Ok(hit.physical_address);
        }

        let (physical_address, leaf) = self.walk(bus, context, virtual_address, access)?;
        check_permissions(leaf, context, access)?;
        Ok(physical_address)
    }

    // Two-level Sv32 walk. The leaf is cached before the permission check runs.
    fn walk<B: Bus>(
        &mut self,
        bus: &mut B,
        context: &TranslationContext,
        virtual_address: u32,
        access: Access,
    ) -> Result<(u32, u32), MemoryError> {
        let mut table = context.root_table();
        let mut level = 1;
        let leaf = loop {
            let vpn = field(virtual_address, 21 + 10 * level, 12 + 10 * level);
            let pte_address = table.wrapping_add(vpn * PTE_SIZE);
            let mut buf = [0u8; PTE_SIZE as usize];
            bus.read(&mut buf, pte_address)
                .map_err(|_| MemoryError::AccessFault)?;
            let entry = u32::from_le_bytes(buf);
            trace!("walk level {level}: pte {entry:#010x} at {pte_address:#010x}");

            if !is_set(entry, pte::V) || (!is_set(entry, pte::R) && is_set(entry, pte::W)) {
                return Err(MemoryError::PageFault);
            }
            if is_set(entry, pte::R) || is_set(entry, pte::X) {
                break entry;
            }
            if level == 0 {
                return Err(MemoryError::PageFault);
            }
            level -= 1;
            table = (entry >> 10) << 12;
        };

        if level == 1 {
            let physical_address =
                field(leaf, 31, 20) << 22 | field(virtual_address, 21, 0);
            if field(leaf, 19, 10) == 0 {
                self.stlb
                    .insert(virtual_address, physical_address, leaf, self.asid);
            } else {
                // Misaligned superpage, cached one base page at a time.
                self.base_tlb_insert(virtual_address, physical_address, leaf, access);
            }
            Ok((physical_address, leaf))
        } else {
            let physical_address =
                field(leaf, 31, 10) << 12 | (virtual_address & (unit::PAGE - 1));
            self.base_tlb_insert(virtual_address, physical_address, leaf, access);
            Ok((physical_address, leaf))
        }
    }

    fn base_tlb_insert(
        &mut self,
        virtual_address: u32,
        physical_address: u32,
        leaf: u32,
        access: Access,
    ) {
        match access {
            Access::Execute => self
                .itlb
                .insert(virtual_address, physical_address, leaf, self.asid),
            Access::Read | Access::Write => self
                .dtlb
                .insert(virtual_address, physical_address, leaf, self.asid),
        }
    }
}

fn check_permissions(
    leaf: u32,
    context: &TranslationContext,
    access: Access,
) -> Result<(), MemoryError> {
    let privilege = context.effective_privilege(access);
    let user_page = is_set(leaf, pte::U);
    let mut permissions = leaf & (1 << pte::R | 1 << pte::W | 1 << pte::X);
    if context.mxr && is_set(leaf, pte::X) {
        permissions |= 1 << pte::R;
    }

    let denied = (!user_page && privilege == PrivilegeLevel::User)
        || (user_page && privilege == PrivilegeLevel::Supervisor && !context.sum)
        || !is_set(permissions, access.permission_bit())
        || !is_set(leaf, pte::A)
        || (access == Access::Write && !is_set(leaf, pte::D));
    if denied {
        Err(MemoryError::PageFault)
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::ram::Ram;

    const RAM_BASE: u32 = 0x8000_0000;
    const ROOT: u32 = 0x8000_1000;
    const LEVEL0: u32 = 0x8000_2000;

    const V: u32 = 1 << pte::V;
    const R: u32 = 1 << pte::R;
    const W: u32 = 1 << pte::W;
    const X: u32 = 1 << pte::X;
    const U: u32 = 1 << pte::U;
    const G: u32 = 1 << 5;
    const A: u32 = 1 << pte::A;
    const D: u32 = 1 << pte::D;

    fn make_pte(physical_address: u32, flags: u32) -> u32 {
        (physical_address >> 12) << 10 | flags
    }

    fn write_word(ram: &mut Ram, address: u32, value: u32) {
        ram.write(address, &value.to_le_bytes()).unwrap();
    }

    fn context(asid: u32, privilege: PrivilegeLevel) -> TranslationContext {
        TranslationContext {
            satp: 1 << 31 | asid << 22 | ROOT >> 12,
            privilege,
            mprv: false,
            mpp: PrivilegeLevel::User,
            sum: false,
            mxr: false,
        }
    }

    // Maps:
    // - VA 0x0040_0000 (4 KiB) -> PA 0x8000_5000, RW, S-mode
    // - VA 0x0040_1000 (4 KiB) -> PA 0x8000_6000, X-only, user
    // - VA 0x0080_0000 (4 MiB superpage) -> PA 0x8040_0000, RWX, global
    fn setup() -> Ram {
        let mut ram = Ram::new(RAM_BASE, 0x80_0000).unwrap();
        write_word(&mut ram, ROOT + 4, make_pte(LEVEL0, V));
        write_word(&mut ram, ROOT + 8, make_pte(0x8040_0000, V | R | W | X | G | A | D));
        write_word(&mut ram, LEVEL0, make_pte(0x8000_5000, V | R | W | A | D));
        write_word(&mut ram, LEVEL0 + 4, make_pte(0x8000_6000, V | X | U | A));
        ram
    }

    #[test]
    fn test_bypass() {
        let mut ram = setup();
        let mut mmu = Mmu::new();
        let mut bare = context(0, PrivilegeLevel::Supervisor);
        bare.satp = 0;
        assert_eq!(Ok(0x1234), mmu.translate(&mut ram, &bare, 0x1234, Access::Read));
        let machine = context(0, PrivilegeLevel::Machine);
        assert_eq!(
            Ok(0x1234),
            mmu.translate(&mut ram, &machine, 0x1234, Access::Write)
        );
        assert_eq!(0, mmu.valid_entries());
    }

    #[test]
    fn test_base_page_walk_and_cache() {
        let mut ram = setup();
        let mut mmu = Mmu::new();
        let context = context(0, PrivilegeLevel::Supervisor);
        assert_eq!(
            Ok(0x8000_5ABC),
            mmu.translate(&mut ram, &context, 0x0040_0ABC, Access::Read)
        );
        assert!(mmu.is_cached(0x0040_0000, Access::Write));
        assert!(!mmu.is_cached(0x0040_0000, Access::Execute));
        // Corrupt the tables: a cached translation must not walk again.
        write_word(&mut ram, LEVEL0, 0);
        assert_eq!(
            Ok(0x8000_5004),
            mmu.translate(&mut ram, &context, 0x0040_0004, Access::Write)
        );
        // After a full flush, the walk sees the invalid PTE.
        mmu.flush_all();
        assert_eq!(
            Err(MemoryError::PageFault),
            mmu.translate(&mut ram, &context, 0x0040_0004, Access::Read)
        );
    }

    #[test]
    fn test_translation_is_deterministic() {
        let mut ram = setup();
        let context = context(3, PrivilegeLevel::Supervisor);
        let mut cached = Mmu::new();
        for va in [0x0040_0010, 0x0080_1234, 0x00BF_FFFC, 0x0040_0FF0] {
            let walked = Mmu::new().translate(&mut ram, &context, va, Access::Read);
            let first = cached.translate(&mut ram, &context, va, Access::Read);
            let second = cached.translate(&mut ram, &context, va, Access::Read);
            assert_eq!(walked, first);
            assert_eq!(first, second);
        }
    }

    #[test]
    fn test_superpage() {
        let mut ram = setup();
        let mut mmu = Mmu::new();
        let context = context(1, PrivilegeLevel::Supervisor);
        assert_eq!(
            Ok(0x8052_3456),
            mmu.translate(&mut ram, &context, 0x0092_3456, Access::Execute)
        );
        assert_eq!(1, mmu.valid_entries());
        // Global entries survive a satp write.
        mmu.satp_written(1 << 31 | 2 << 22 | ROOT >> 12);
        assert_eq!(2, mmu.asid());
        assert!(mmu.is_cached(0x0080_0000, Access::Read));
    }

    #[test]
    fn test_satp_write_drops_non_global() {
        let mut ram = setup();
        let mut mmu = Mmu::new();
        let context = context(0, PrivilegeLevel::Supervisor);
        mmu.translate(&mut ram, &context, 0x0040_0000, Access::Read)
            .unwrap();
        mmu.translate(&mut ram, &context, 0x0080_0000, Access::Read)
            .unwrap();
        mmu.satp_written(context.satp);
        assert!(!mmu.is_cached(0x0040_0000, Access::Read));
        assert!(mmu.is_cached(0x0080_0000, Access::Read));
        // sfence.vma drops global entries too.
        mmu.flush_all();
        assert_eq!(0, mmu.valid_entries());
    }

    #[test]
    fn test_permissions() {
        let mut ram = setup();
        let mut mmu = Mmu::new();
        let supervisor = context(0, PrivilegeLevel::Supervisor);
        let user = context(0, PrivilegeLevel::User);

        // User may execute its page but not read it.
        assert_eq!(
            Ok(0x8000_6000),
            mmu.translate(&mut ram, &user, 0x0040_1000, Access::Execute)
        );
        assert_eq!(
            Err(MemoryError::PageFault),
            mmu.translate(&mut ram, &user, 0x0040_1000, Access::Read)
        );
        // MXR makes it readable.
        let user_mxr = TranslationContext { mxr: true, ..user };
        assert_eq!(
            Ok(0x8000_6000),
            mmu.translate(&mut ram, &user_mxr, 0x0040_1000, Access::Read)
        );
        // S-mode can't touch user pages without SUM, and never executes them.
        assert_eq!(
            Err(MemoryError::PageFault),
            mmu.translate(&mut ram, &supervisor, 0x0040_1000, Access::Execute)
        );
        // User can't access a supervisor page.
        assert_eq!(
            Err(MemoryError::PageFault),
            mmu.translate(&mut ram, &user, 0x0040_0000, Access::Read)
        );
        // M-mode with MPRV and MPP=U gets user permissions for loads.
        let machine_mprv = TranslationContext {
            privilege: PrivilegeLevel::Machine,
            mprv: true,
            mpp: PrivilegeLevel::User,
            ..supervisor
        };
        assert_eq!(
            Err(MemoryError::PageFault),
            mmu.translate(&mut ram, &machine_mprv, 0x0040_0000, Access::Read)
        );
        // Fetches ignore MPRV, so M-mode bypasses translation.
        assert_eq!(
            Ok(0x0040_0000),
            mmu.translate(&mut ram, &machine_mprv, 0x0040_0000, Access::Execute)
        );
    }

    #[test]
    fn test_accessed_and_dirty_bits() {
        let mut ram = setup();
        write_word(&mut ram, LEVEL0 + 8, make_pte(0x8000_7000, V | R | W | A));
        write_word(&mut ram, LEVEL0 + 12, make_pte(0x8000_8000, V | R | W | D));
        let mut mmu = Mmu::new();
        let context = context(0, PrivilegeLevel::Supervisor);
        assert!(mmu
            .translate(&mut ram, &context, 0x0040_2000, Access::Read)
            .is_ok());
        assert_eq!(
            Err(MemoryError::PageFault),
            mmu.translate(&mut ram, &context, 0x0040_2000, Access::Write)
        );
        assert_eq!(
            Err(MemoryError::PageFault),
            mmu.translate(&mut ram, &context, 0x0040_3000, Access::Read)
        );
    }

    #[test]
    fn test_walk_faults() {
        let mut ram = setup();
        // W without R is reserved.
        write_word(&mut ram, LEVEL0 + 16, make_pte(0x8000_9000, V | W | A | D));
        // Non-leaf at level 0.
        write_word(&mut ram, LEVEL0 + 20, make_pte(0x8000_9000, V));
        // Non-leaf pointing outside RAM.
        write_word(&mut ram, ROOT + 12, make_pte(0x1000_0000, V));
        let mut mmu = Mmu::new();
        let context = context(0, PrivilegeLevel::Supervisor);
        for va in [0x0040_4000, 0x0040_5000, 0x0300_0000] {
            assert_eq!(
                Err(MemoryError::PageFault),
                mmu.translate(&mut ram, &context, va, Access::Read)
            );
        }
        assert_eq!(
            Err(MemoryError::AccessFault),
            mmu.translate(&mut ram, &context, 0x00C0_0000, Access::Read)
        );
        assert_eq!(0, mmu.valid_entries());
    }
}
