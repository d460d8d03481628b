use crate::bus::{Bus, BusError, BusResult};

/// Byte-based RAM mapped at a fixed physical base address.
///
/// Accesses of any width are served as long as every byte falls inside the mapped range. Anything
/// else reports [`BusError::Unmapped`], which the core turns into an access fault.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ram {
    base: u32,
    data: Vec<u8>,
}

impl Ram {
    /// Creates a zero-initialized RAM of `size` bytes starting at physical address `base`.
    ///
    /// Returns `None` if `size` is zero or the range would wrap past the end of the 32-bit
    /// address space.
    pub fn new(base: u32, size: usize) -> Option<Self> {
        const_assert!(usize::BITS >= 32);
        let size_u32 = u32::try_from(size).ok()?;
        if size == 0 || base.checked_add(size_u32 - 1).is_none() {
            return None;
        }
        Some(Self {
            base,
            data: vec![0; size],
        })
    }

    /// The lowest mapped physical address.
    pub fn base(&self) -> u32 {
        self.base
    }

    /// Size in bytes. Guaranteed to be at least one.
    #[allow(clippy::len_without_is_empty)]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns `true` if `address` is mapped by this RAM.
    pub fn contains(&self, address: u32) -> bool {
        self.offset(address, 1).is_some()
    }

    /// Copies `bytes` into RAM starting at `address`, e.g. to place a boot image.
    pub fn load(&mut self, address: u32, bytes: &[u8]) -> BusResult {
        let offset = self.offset(address, bytes.len()).ok_or(BusError::Unmapped)?;
        self.data[offset..offset + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    // Offset of `address` into `data`, if all of `len` bytes are in range.
    fn offset(&self, address: u32, len: usize) -> Option<usize> {
        let offset = address.checked_sub(self.base)? as usize;
        let end = offset.checked_add(len)?;
        (end <= self.data.len()).then_some(offset)
    }
}

impl Bus for Ram {
    fn read(&mut self, buf: &mut [u8], address: u32) -> BusResult {
        let offset = self.offset(address, buf.len()).ok_or(BusError::Unmapped)?;
        buf.copy_from_slice(&self.data[offset..offset + buf.len()]);
        Ok(())
    }

    fn write(&mut self, address: u32, buf: &[u8]) -> BusResult {
        let offset = self.offset(address, buf.len()).ok_or(BusError::Unmapped)?;
        self.data[offset..offset + buf.len()].copy_from_slice(buf);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_rejects_bad_sizes() {
        assert!(Ram::new(0x8000_0000, 0).is_none());
        assert!(Ram::new(0xFFFF_FFF0, 0x20).is_none());
        assert!(Ram::new(0xFFFF_FFF0, 0x10).is_some());
    }

    #[test]
    fn test_read_write_little_endian() {
        let mut ram = Ram::new(0x8000_0000, 0x100).unwrap();
        ram.write(0x8000_0010, &0xDEAD_BEEF_u32.to_le_bytes()).unwrap();
        let mut buf = [0u8; 2];
        ram.read(&mut buf, 0x8000_0012).unwrap();
        assert_eq!(0xDEAD, u16::from_le_bytes(buf));
    }

    #[test]
    fn test_out_of_range_is_unmapped() {
        let mut ram = Ram::new(0x8000_0000, 0x100).unwrap();
        let mut buf = [0u8; 4];
        assert_eq!(Err(BusError::Unmapped), ram.read(&mut buf, 0x7FFF_FFFC));
        assert_eq!(Err(BusError::Unmapped), ram.read(&mut buf, 0x8000_00FE));
        assert_eq!(Err(BusError::Unmapped), ram.write(0x8000_0100, &[1]));
        assert!(ram.read(&mut buf, 0x8000_00FC).is_ok());
    }

    #[test]
    fn test_load_image() {
        let mut ram = Ram::new(0x8000_0000, 0x100).unwrap();
        ram.load(0x8000_0004, &[1, 2, 3]).unwrap();
        let mut buf = [0xAA; 5];
        ram.read(&mut buf, 0x8000_0003).unwrap();
        assert_eq!([0, 1, 2, 3, 0], buf);
        assert_eq!(Err(BusError::Unmapped), ram.load(0x8000_00FF, &[1, 2]));
    }
}
