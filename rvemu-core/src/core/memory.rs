use thiserror::Error;

use super::mmu::{Access, TranslationContext};
use super::{Core, Exception};
use crate::bus::{Bus, BusError};
use crate::{unit, Alignment};

macro_rules! access_fns {
    ( $( $read_fn:ident, $write_fn:ident => $u:ident ),* $(,)? ) => {
        $(
            /// Loads a little-endian value from the virtual address `address`.
            ///
            /// Unless misaligned accesses are enabled in the [`Config`](super::Config), the
            /// address must be naturally aligned.
            pub fn $read_fn(&mut self, address: u32) -> Result<$u, MemoryError> {
                let mut buf = [0u8; std::mem::size_of::<$u>()];
                self.read_virtual(&mut buf, address, Access::Read)
                    .map(|()| $u::from_le_bytes(buf))
            }

            /// Stores `value` in little-endian order at the virtual address `address`.
            ///
            /// Unless misaligned accesses are enabled in the [`Config`](super::Config), the
            /// address must be naturally aligned.
            pub fn $write_fn(&mut self, address: u32, value: $u) -> Result<(), MemoryError> {
                self.write_virtual(address, &value.to_le_bytes())
            }
        )*
    };
}

impl<B: Bus> Core<B> {
    access_fns! {
        read_byte, write_byte => u8,
        read_halfword, write_halfword => u16,
        read_word, write_word => u32,
    }

    /// Snapshot of the state address translation depends on.
    pub fn translation_context(&self) -> TranslationContext {
        TranslationContext::new(self.csrs.satp, &self.csrs.status, self.privilege)
    }

    /// Translates a virtual address as the current hart would for `access`.
    pub fn translate(&mut self, address: u32, access: Access) -> Result<u32, MemoryError> {
        let context = self.translation_context();
        self.mmu.translate(&mut self.bus, &context, address, access)
    }

    /// Reads `buf.len()` bytes starting at virtual address `address`.
    ///
    /// `access` is either [`Access::Read`] or [`Access::Execute`]. An access that crosses a page
    /// boundary is translated and performed as two separate bus reads.
    pub fn read_virtual(
        &mut self,
        buf: &mut [u8],
        address: u32,
        access: Access,
    ) -> Result<(), MemoryError> {
        self.check_alignment(address, buf.len())?;
        let (first, second) = buf.split_at_mut(bytes_in_page(address, buf.len()));
        let physical_address = self.translate(address, access)?;
        self.bus.read(first, physical_address)?;
        if !second.is_empty() {
            let next_page = address.wrapping_add(first.len() as u32);
            let physical_address = self.translate(next_page, access)?;
            self.bus.read(second, physical_address)?;
        }
        Ok(())
    }

    /// Writes `buf` starting at virtual address `address`.
    ///
    /// An access that crosses a page boundary is translated and performed as two separate bus
    /// writes. If the second half faults, the first half stays written.
    pub fn write_virtual(&mut self, address: u32, buf: &[u8]) -> Result<(), MemoryError> {
        self.check_alignment(address, buf.len())?;
        let (first, second) = buf.split_at(bytes_in_page(address, buf.len()));
        let physical_address = self.translate(address, Access::Write)?;
        self.bus.write(physical_address, first)?;
        if !second.is_empty() {
            let next_page = address.wrapping_add(first.len() as u32);
            let physical_address = self.translate(next_page, Access::Write)?;
            self.bus.write(physical_address, second)?;
        }
        Ok(())
    }

    fn check_alignment(&self, address: u32, size: usize) -> Result<(), MemoryError> {
        if self.config.support_misaligned_memory_access {
            return Ok(());
        }
        let aligned = u32::try_from(size)
            .ok()
            .and_then(Alignment::natural_for_size)
            .map(|alignment| alignment.is_aligned(address))
            .unwrap_or(false);
        if aligned {
            Ok(())
        } else {
            Err(MemoryError::Misaligned)
        }
    }
}

// Number of bytes of a `size`-byte access at `address` that fall in the page holding `address`.
fn bytes_in_page(address: u32, size: usize) -> usize {
    let left_in_page = (unit::PAGE - (address & (unit::PAGE - 1))) as usize;
    size.min(left_in_page)
}

/// A failed virtual memory access, before it is attributed to a fetch, load or store.
#[derive(Error, Debug, Copy, Clone, Eq, PartialEq)]
pub enum MemoryError {
    #[error("misaligned access")]
    Misaligned,
    #[error("access fault")]
    AccessFault,
    #[error("page fault")]
    PageFault,
}

impl MemoryError {
    /// Returns the exception this error raises for an access of kind `access`.
    ///
    /// Atomic memory operations report faults in their read phase as loads.
    pub fn exception(self, access: Access) -> Exception {
        match (access, self) {
            (Access::Execute, Self::Misaligned) => Exception::InstructionAddressMisaligned,
            (Access::Execute, Self::AccessFault) => Exception::InstructionAccessFault,
            (Access::Execute, Self::PageFault) => Exception::InstructionPageFault,
            (Access::Read, Self::Misaligned) => Exception::LoadAddressMisaligned,
            (Access::Read, Self::AccessFault) => Exception::LoadAccessFault,
            (Access::Read, Self::PageFault) => Exception::LoadPageFault,
            (Access::Write, Self::Misaligned) => Exception::StoreOrAmoAddressMisaligned,
            (Access::Write, Self::AccessFault) => Exception::StoreOrAmoAccessFault,
            (Access::Write, Self::PageFault) => Exception::StoreOrAmoPageFault,
        }
    }
}

impl From<BusError> for MemoryError {
    fn from(value: BusError) -> Self {
        match value {
            BusError::Unmapped | BusError::Invalid => Self::AccessFault,
            BusError::Misaligned => Self::Misaligned,
        }
    }
}
