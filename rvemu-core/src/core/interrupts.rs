use bitvec::{array::BitArray, order::Lsb0};
use log::trace;

use super::{Core, Interrupt};
use crate::bus::Bus;

const MACHINE_SOFTWARE_INTERRUPT: usize = Interrupt::MachineSoftwareInterrupt as usize;
const MACHINE_TIMER_INTERRUPT: usize = Interrupt::MachineTimerInterrupt as usize;
const SUPERVISOR_EXTERNAL_INTERRUPT: usize = Interrupt::SupervisorExternalInterrupt as usize;

/// The mip bits driven by devices outside the core: MSIP, MTIP and SEIP.
///
/// The other bits of mip are only written by guest software.
pub const EXTERNAL_LINES_MASK: u32 = 1 << MACHINE_SOFTWARE_INTERRUPT
    | 1 << MACHINE_TIMER_INTERRUPT
    | 1 << SUPERVISOR_EXTERNAL_INTERRUPT;

/// Levels of the interrupt lines wired into the core.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq)]
pub struct InterruptLines {
    /// Machine software interrupt, raised through the CLINT's msip register.
    pub software: bool,
    /// Machine timer interrupt, raised while `mtime >= mtimecmp`.
    pub timer: bool,
    /// Supervisor external interrupt.
    pub external: bool,
}

impl InterruptLines {
    /// Returns the lines as a mip-shaped bit mask.
    pub fn mask(&self) -> u32 {
        let mut lines = BitArray::<[u32; 1], Lsb0>::ZERO;
        lines.set(MACHINE_SOFTWARE_INTERRUPT, self.software);
        lines.set(MACHINE_TIMER_INTERRUPT, self.timer);
        lines.set(SUPERVISOR_EXTERNAL_INTERRUPT, self.external);
        lines.into_inner()[0]
    }
}

impl<B: Bus> Core<B> {
    /// Drives the externally controlled mip bits from `lines`.
    ///
    /// MSIP, MTIP and SEIP are first cleared, then set from `lines`; bits of `lines` outside
    /// [`EXTERNAL_LINES_MASK`] are ignored. Pending interrupts are taken at the next commit point.
    pub fn inject_interrupts(&mut self, lines: u32) {
        let mip = (self.csrs.mip & !EXTERNAL_LINES_MASK) | (lines & EXTERNAL_LINES_MASK);
        if mip != self.csrs.mip {
            trace!("mip {:#05x} -> {:#05x}", self.csrs.mip, mip);
        }
        self.csrs.mip = mip;
    }

    /// Convenience wrapper around [`inject_interrupts`](Self::inject_interrupts).
    pub fn set_interrupt_lines(&mut self, lines: InterruptLines) {
        self.inject_interrupts(lines.mask());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{csr, Config};
    use crate::resources::ram::Ram;

    #[test]
    fn test_lines_mask() {
        let lines = InterruptLines {
            software: true,
            timer: false,
            external: true,
        };
        assert_eq!(1 << 3 | 1 << 9, lines.mask());
        assert_eq!(0x288, EXTERNAL_LINES_MASK);
    }

    #[test]
    fn test_inject_keeps_software_bits() {
        let mut core = Core::new(Ram::new(0x8000_0000, 0x1000).unwrap(), Config::default());
        // SSIP and STIP are guest-owned.
        core.write_csr(csr::MIP, 1 << 1 | 1 << 5).unwrap();
        core.inject_interrupts(u32::MAX);
        assert_eq!(Ok(0x2AA), core.read_csr(csr::MIP));
        core.set_interrupt_lines(InterruptLines::default());
        assert_eq!(Ok(0x22), core.read_csr(csr::MIP));
    }
}
