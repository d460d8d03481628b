//! Core-local interruptor: the machine timer and the machine software interrupt of one hart.
//!
//! Register map, relative to the device base:
//!
//! | Offset   | Register          |
//! |----------|-------------------|
//! | `0x0000` | `msip`            |
//! | `0x4000` | `mtimecmp` (low)  |
//! | `0x4004` | `mtimecmp` (high) |
//! | `0xBFF8` | `mtime` (low)     |
//! | `0xBFFC` | `mtime` (high)    |
//!
//! Only aligned 32-bit accesses are accepted.

use log::trace;

use crate::bus::{Bus, BusError, BusResult};
use crate::core::InterruptLines;

/// Size of the address range decoded by the CLINT.
pub const SIZE: u32 = 0x1_0000;

const MSIP: u32 = 0x0000;
const MTIMECMP_LOW: u32 = 0x4000;
const MTIMECMP_HIGH: u32 = 0x4004;
const MTIME_LOW: u32 = 0xBFF8;
const MTIME_HIGH: u32 = 0xBFFC;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Clint {
    msip: u32,
    mtimecmp: u64,
    mtime: u64,
}

impl Clint {
    /// Creates a CLINT with all registers zeroed.
    ///
    /// Note that `mtime >= mtimecmp` holds right away, so the timer line is high until the guest
    /// programs `mtimecmp`.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mtime(&self) -> u64 {
        self.mtime
    }

    pub fn set_mtime(&mut self, value: u64) {
        self.mtime = value;
    }

    pub fn mtimecmp(&self) -> u64 {
        self.mtimecmp
    }

    /// Advances `mtime` by `ticks`, wrapping at 64 bits.
    pub fn tick(&mut self, ticks: u64) {
        self.mtime = self.mtime.wrapping_add(ticks);
    }

    /// Level of the machine software interrupt line (`msip` bit 0).
    pub fn software_pending(&self) -> bool {
        self.msip & 1 != 0
    }

    /// Level of the machine timer interrupt line.
    pub fn timer_pending(&self) -> bool {
        self.mtime >= self.mtimecmp
    }

    /// Both lines driven by this device, ready to hand to the core.
    pub fn lines(&self) -> InterruptLines {
        InterruptLines {
            software: self.software_pending(),
            timer: self.timer_pending(),
            external: false,
        }
    }

    fn read_u32(&self, offset: u32) -> Option<u32> {
        Some(match offset {
            MSIP => self.msip,
            MTIMECMP_LOW => self.mtimecmp as u32,
            MTIMECMP_HIGH => (self.mtimecmp >> 32) as u32,
            MTIME_LOW => self.mtime as u32,
            MTIME_HIGH => (self.mtime >> 32) as u32,
            _ => return None,
        })
    }

    fn write_u32(&mut self, offset: u32, value: u32) -> Option<()> {
        match offset {
            MSIP => self.msip = value & 1,
            MTIMECMP_LOW => self.mtimecmp = set_low(self.mtimecmp, value),
            MTIMECMP_HIGH => self.mtimecmp = set_high(self.mtimecmp, value),
            MTIME_LOW => self.mtime = set_low(self.mtime, value),
            MTIME_HIGH => self.mtime = set_high(self.mtime, value),
            _ => return None,
        }
        trace!(offset = offset, value = value; "clint write");
        Some(())
    }
}

fn set_low(register: u64, value: u32) -> u64 {
    register & !0xFFFF_FFFF | value as u64
}

fn set_high(register: u64, value: u32) -> u64 {
    register & 0xFFFF_FFFF | (value as u64) << 32
}

/// Addresses are offsets from the CLINT base.
impl Bus for Clint {
    fn read(&mut self, buf: &mut [u8], address: u32) -> BusResult {
        let buf: &mut [u8; 4] = buf.try_into().map_err(|_| BusError::Invalid)?;
        let value = self.read_u32(address).ok_or(BusError::Unmapped)?;
        *buf = value.to_le_bytes();
        Ok(())
    }

    fn write(&mut self, address: u32, buf: &[u8]) -> BusResult {
        let buf: [u8; 4] = buf.try_into().map_err(|_| BusError::Invalid)?;
        self.write_u32(address, u32::from_le_bytes(buf))
            .ok_or(BusError::Unmapped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read(clint: &mut Clint, offset: u32) -> u32 {
        let mut buf = [0; 4];
        clint.read(&mut buf, offset).unwrap();
        u32::from_le_bytes(buf)
    }

    #[test]
    fn test_timer_compare() {
        let mut clint = Clint::new();
        clint.write(MTIMECMP_LOW, &10u32.to_le_bytes()).unwrap();
        assert!(!clint.timer_pending());
        clint.tick(9);
        assert!(!clint.timer_pending());
        clint.tick(1);
        assert!(clint.timer_pending());

        // Raising the high half pushes the deadline far away again.
        clint.write(MTIMECMP_HIGH, &1u32.to_le_bytes()).unwrap();
        assert!(!clint.timer_pending());
        assert_eq!(0x1_0000_000A, clint.mtimecmp());
    }

    #[test]
    fn test_mtime_halves() {
        let mut clint = Clint::new();
        clint.set_mtime(0x1234_5678_9ABC_DEF0);
        assert_eq!(0x9ABC_DEF0, read(&mut clint, MTIME_LOW));
        assert_eq!(0x1234_5678, read(&mut clint, MTIME_HIGH));
        clint.write(MTIME_LOW, &u32::MAX.to_le_bytes()).unwrap();
        clint.tick(1);
        assert_eq!(0x1234_5679_0000_0000, clint.mtime());
    }

    #[test]
    fn test_software_interrupt() {
        let mut clint = Clint::new();
        clint.write(MTIMECMP_HIGH, &u32::MAX.to_le_bytes()).unwrap();
        assert_eq!(InterruptLines::default(), clint.lines());
        clint.write(MSIP, &3u32.to_le_bytes()).unwrap();
        assert_eq!(1, read(&mut clint, MSIP));
        assert!(clint.lines().software);
        assert!(!clint.lines().timer);
    }

    #[test]
    fn test_rejected_accesses() {
        let mut clint = Clint::new();
        let mut wide = [0; 8];
        assert_eq!(Err(BusError::Invalid), clint.read(&mut wide, MTIME_LOW));
        assert_eq!(Err(BusError::Invalid), clint.write(MSIP, &[1]));
        let mut buf = [0; 4];
        assert_eq!(Err(BusError::Unmapped), clint.read(&mut buf, 0x8));
        assert_eq!(Err(BusError::Unmapped), clint.write(0x4002, &buf));
    }
}
