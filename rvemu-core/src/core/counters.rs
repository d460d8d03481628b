/// The cycle and time counters.
///
/// > The RDCYCLE pseudoinstruction reads the low XLEN bits of the cycle CSR which holds a count
/// > of the number of clock cycles executed by the processor core on which the hart is running
/// > from an arbitrary start time in the past. RDCYCLEH is an RV32I instruction that reads bits
/// > 63–32 of the same cycle counter.
///
/// > The time CSR is a read-only shadow of the memory-mapped mtime register.
///
/// This core retires at most one instruction per cycle and has no stall cycles, so `instret`
/// shares the cycle counter. Time only moves when the host advances it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Counters {
    mcycle: u32,
    mcycleh: u32,
    mtime: u64,
}

impl Counters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment_cycle(&mut self) {
        self.mcycle = self.mcycle.wrapping_add(1);
        if self.mcycle == 0 {
            self.mcycleh = self.mcycleh.wrapping_add(1);
        }
    }

    pub fn cycle(&self) -> u32 {
        self.mcycle
    }

    pub fn cycleh(&self) -> u32 {
        self.mcycleh
    }

    pub fn cycle_u64(&self) -> u64 {
        (self.mcycleh as u64) << 32 | self.mcycle as u64
    }

    pub fn time(&self) -> u32 {
        self.mtime as u32
    }

    pub fn timeh(&self) -> u32 {
        (self.mtime >> 32) as u32
    }

    pub fn mtime(&self) -> u64 {
        self.mtime
    }

    pub fn set_mtime(&mut self, value: u64) {
        self.mtime = value;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_carry() {
        let mut counters = Counters {
            mcycle: u32::MAX,
            ..Counters::new()
        };
        counters.increment_cycle();
        assert_eq!(0, counters.cycle());
        assert_eq!(1, counters.cycleh());
        assert_eq!(1 << 32, counters.cycle_u64());
    }

    #[test]
    fn test_time_halves() {
        let mut counters = Counters::new();
        counters.set_mtime(0x0000_0001_8000_0000);
        assert_eq!(0x8000_0000, counters.time());
        assert_eq!(1, counters.timeh());
    }
}
