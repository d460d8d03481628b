//! Set-associative translation lookaside buffers with per-set LRU replacement.

use crate::bits::is_set;

/// The I-TLB: 16 sets of 2 ways over 4 KiB pages.
pub type InstructionTlb = Tlb<16, 2, 12>;
/// The D-TLB: 16 sets of 4 ways over 4 KiB pages.
pub type DataTlb = Tlb<16, 4, 12>;
/// Fully associative, 8-entry TLB for 4 MiB superpages.
pub type SuperpageTlb = Tlb<1, 8, 22>;

/// Bit index of the G (global) flag in a PTE.
const PTE_G: u32 = 5;

/// A cached translation.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct TlbEntry {
    /// Virtual page number at the table's page size.
    tag: u32,
    /// Physical address of the start of the page.
    physical_base: u32,
    /// Raw leaf PTE, kept for the permission check on every hit.
    pte: u32,
    asid: u16,
    global: bool,
    valid: bool,
    /// Recency rank within the set; `WAYS - 1` is the most recently used.
    lru: u8,
}

impl TlbEntry {
    const INVALID: Self = Self {
        tag: 0,
        physical_base: 0,
        pte: 0,
        asid: 0,
        global: false,
        valid: false,
        lru: 0,
    };

    fn matches(&self, tag: u32, asid: u16) -> bool {
        self.valid && self.tag == tag && (self.global || self.asid == asid)
    }
}

/// Result of a TLB hit.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct TlbHit {
    pub physical_address: u32,
    pub pte: u32,
}

/// A TLB of `SETS` sets with `WAYS` ways each, caching pages of `1 << PAGE_SHIFT` bytes.
///
/// The set is selected by the low bits of the virtual page number. Entries match on tag and on
/// either their global flag or the current ASID.
#[derive(Debug, Clone)]
pub struct Tlb<const SETS: usize, const WAYS: usize, const PAGE_SHIFT: u32> {
    sets: [[TlbEntry; WAYS]; SETS],
}

impl<const SETS: usize, const WAYS: usize, const PAGE_SHIFT: u32> Default
    for Tlb<SETS, WAYS, PAGE_SHIFT>
{
    fn default() -> Self {
        Self::new()
    }
}

impl<const SETS: usize, const WAYS: usize, const PAGE_SHIFT: u32> Tlb<SETS, WAYS, PAGE_SHIFT> {
    const OFFSET_MASK: u32 = (1 << PAGE_SHIFT) - 1;

    pub fn new() -> Self {
        Self {
            sets: [[TlbEntry::INVALID; WAYS]; SETS],
        }
    }

    /// Looks up `virtual_address`, promoting the matching entry to most recently used.
    pub fn lookup(&mut self, virtual_address: u32, asid: u16) -> Option<TlbHit> {
        let tag = virtual_address >> PAGE_SHIFT;
        let set = &mut self.sets[Self::set_index(tag)];
        let way = set.iter().position(|entry| entry.matches(tag, asid))?;
        promote(set, way);
        let entry = &set[way];
        Some(TlbHit {
            physical_address: entry.physical_base | (virtual_address & Self::OFFSET_MASK),
            pte: entry.pte,
        })
    }

    /// Returns `true` if a valid entry would translate `virtual_address`, without touching LRU
    /// state.
    pub fn contains(&self, virtual_address: u32, asid: u16) -> bool {
        let tag = virtual_address >> PAGE_SHIFT;
        self.sets[Self::set_index(tag)]
            .iter()
            .any(|entry| entry.matches(tag, asid))
    }

    /// Caches the translation of the page holding `virtual_address` to the page holding
    /// `physical_address`.
    ///
    /// The victim is the first invalid way, else the least recently used one.
    pub fn insert(&mut self, virtual_address: u32, physical_address: u32, pte: u32, asid: u16) {
        let tag = virtual_address >> PAGE_SHIFT;
        let set = &mut self.sets[Self::set_index(tag)];
        let way = set
            .iter()
            .position(|entry| !entry.valid)
            .or_else(|| {
                set.iter()
                    .enumerate()
                    .min_by_key(|(_, entry)| entry.lru)
                    .map(|(way, _)| way)
            })
            .unwrap_or(0);
        set[way] = TlbEntry {
            tag,
            physical_base: physical_address & !Self::OFFSET_MASK,
            pte,
            asid,
            global: is_set(pte, PTE_G),
            valid: true,
            lru: 0,
        };
        promote(set, way);
    }

    /// Invalidates every entry.
    pub fn flush_all(&mut self) {
        self.sets
            .iter_mut()
            .flatten()
            .for_each(|entry| entry.valid = false);
    }

    /// Invalidates every entry that isn't global.
    pub fn flush_non_global(&mut self) {
        self.sets
            .iter_mut()
            .flatten()
            .filter(|entry| !entry.global)
            .for_each(|entry| entry.valid = false);
    }

    /// Number of valid entries, across all sets.
    pub fn valid_entries(&self) -> usize {
        self.sets.iter().flatten().filter(|entry| entry.valid).count()
    }

    fn set_index(tag: u32) -> usize {
        tag as usize % SETS
    }
}

// Makes `way` the most recently used entry of `set`.
fn promote<const WAYS: usize>(set: &mut [TlbEntry; WAYS], way: usize) {
    for entry in set.iter_mut() {
        entry.lru = entry.lru.saturating_sub(1);
    }
    set[way].lru = (WAYS - 1) as u8;
}
