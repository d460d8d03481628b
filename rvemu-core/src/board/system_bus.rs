use super::CLINT_BASE;
use crate::bus::{Bus, BusError, BusResult};
use crate::resources::clint::{self, Clint};
use crate::resources::ram::Ram;

/// Enum that uniquely identifies every device attached to a [`SystemBus`].
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub(super) enum Resource {
    Clint0,
    Dram,
}

/// The board's main bus, delegating each access to the device its address maps to.
///
/// An access is forwarded if and only if the entire range `address..(address+size)` falls inside
/// one device's region. Anything else, including vacant regions, reports [`BusError::Unmapped`].
#[derive(Debug)]
pub struct SystemBus {
    pub(super) clint0: Clint,
    pub(super) dram: Ram,
}

impl SystemBus {
    /// Validates the `(address, size)` pair, returning `Some((resource, mapped_address))` if the
    /// access falls inside a single device.
    ///
    /// RAM decodes absolute addresses, the CLINT decodes offsets from its base.
    fn check_access(&self, address: u32, size: usize) -> Option<(Resource, u32)> {
        let last = address.checked_add(u32::try_from(size.checked_sub(1)?).ok()?)?;
        if self.dram.contains(address) && self.dram.contains(last) {
            Some((Resource::Dram, address))
        } else if (CLINT_BASE..CLINT_BASE + clint::SIZE).contains(&address)
            && last < CLINT_BASE + clint::SIZE
        {
            Some((Resource::Clint0, address - CLINT_BASE))
        } else {
            None
        }
    }

    fn bus_of(&mut self, resource: Resource) -> &mut dyn Bus {
        match resource {
            Resource::Clint0 => &mut self.clint0,
            Resource::Dram => &mut self.dram,
        }
    }

    pub fn clint0(&self) -> &Clint {
        &self.clint0
    }

    pub fn dram(&self) -> &Ram {
        &self.dram
    }
}

impl Bus for SystemBus {
    fn read(&mut self, buf: &mut [u8], address: u32) -> BusResult {
        let (resource, mapped_address) = self
            .check_access(address, buf.len())
            .ok_or(BusError::Unmapped)?;
        self.bus_of(resource).read(buf, mapped_address)
    }

    fn write(&mut self, address: u32, buf: &[u8]) -> BusResult {
        let (resource, mapped_address) = self
            .check_access(address, buf.len())
            .ok_or(BusError::Unmapped)?;
        self.bus_of(resource).write(mapped_address, buf)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::RAM_BASE;

    fn make_bus() -> SystemBus {
        SystemBus {
            clint0: Clint::new(),
            dram: Ram::new(RAM_BASE, 0x1000).unwrap(),
        }
    }

    #[test]
    fn test_routing() {
        let mut bus = make_bus();
        bus.write(RAM_BASE + 8, &[1, 2, 3, 4]).unwrap();
        bus.write(CLINT_BASE + 0x4000, &7u32.to_le_bytes()).unwrap();
        assert_eq!(7, bus.clint0().mtimecmp());

        let mut buf = [0; 4];
        bus.read(&mut buf, RAM_BASE + 8).unwrap();
        assert_eq!([1, 2, 3, 4], buf);
        bus.read(&mut buf, CLINT_BASE + 0x4000).unwrap();
        assert_eq!(7, u32::from_le_bytes(buf));
    }

    #[test]
    fn test_unmapped_and_straddling() {
        let mut bus = make_bus();
        let mut buf = [0; 4];
        assert_eq!(Err(BusError::Unmapped), bus.read(&mut buf, 0x1000_0000));
        assert_eq!(Err(BusError::Unmapped), bus.read(&mut buf, RAM_BASE + 0xFFE));
        assert_eq!(Err(BusError::Unmapped), bus.read(&mut buf, CLINT_BASE + 0xFFFE));
        assert_eq!(Err(BusError::Unmapped), bus.read(&mut buf, u32::MAX));
        assert_eq!(Err(BusError::Unmapped), bus.read(&mut [], RAM_BASE));
    }

    #[test]
    fn test_device_errors_pass_through() {
        let mut bus = make_bus();
        assert_eq!(Err(BusError::Invalid), bus.write(CLINT_BASE, &[1]));
    }
}
