use bitvec::{field::BitField, order::Lsb0, view::BitView};
use log::debug;

use super::{Core, Exception, Interrupt};
use crate::bits::{is_set, merge};
use crate::bus::Bus;
use crate::PrivilegeLevel;

/// Bit of `xcause` that marks an interrupt.
pub const INTERRUPT_BIT: u32 = 0x8000_0000;

/// The cause of a trap: a synchronous exception or an asynchronous interrupt.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum TrapCause {
    Exception(Exception),
    Interrupt(Interrupt),
}

impl TrapCause {
    /// The value written to `xcause`: the exception code, with [`INTERRUPT_BIT`] set for
    /// interrupts.
    pub fn code(&self) -> u32 {
        match self {
            Self::Exception(exception) => exception.code(),
            Self::Interrupt(interrupt) => INTERRUPT_BIT | interrupt.code(),
        }
    }

    pub fn is_interrupt(&self) -> bool {
        matches!(self, Self::Interrupt(_))
    }
}

impl From<Exception> for TrapCause {
    fn from(value: Exception) -> Self {
        Self::Exception(value)
    }
}

impl From<Interrupt> for TrapCause {
    fn from(value: Interrupt) -> Self {
        Self::Interrupt(value)
    }
}

/// The mcause and scause registers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Cause(u32);

impl Cause {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn read(&self) -> u32 {
        self.0
    }

    pub fn write(&mut self, value: u32, mask: u32) {
        self.0 = merge(self.0, value, mask);
    }

    pub fn set(&mut self, cause: &TrapCause) {
        self.0 = cause.code();
    }
}

/// Trap Vector Base Address Register (mtvec and stvec).
///
/// > When MODE=Direct, all traps into machine mode cause the pc to be set to the address in the
/// > BASE field. When MODE=Vectored, all synchronous exceptions into machine mode cause the pc to
/// > be set to the address in the BASE field, whereas interrupts cause the pc to be set to the
/// > address in the BASE field plus four times the interrupt cause number.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Tvec(u32);

impl Tvec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn read(&self) -> u32 {
        self.0
    }

    pub fn write(&mut self, value: u32, mask: u32) {
        let new_value = merge(self.0, value, mask);
        // MODE values >= 2 are reserved; WARL, so the old value is kept.
        if new_value & 0b11 < 2 {
            self.0 = new_value;
        }
    }

    /// Returns the vector base address (stored in BASE field).
    pub fn base(&self) -> u32 {
        self.0.view_bits::<Lsb0>()[2..].load_le::<u32>() << 2
    }

    /// Returns the vector mode (stored in MODE field).
    pub fn mode(&self) -> VectorMode {
        match self.0.view_bits::<Lsb0>()[0] {
            false => VectorMode::Direct,
            true => VectorMode::Vectored,
        }
    }

    /// Address the pc jumps to for a trap with `cause`.
    pub fn target(&self, cause: &TrapCause) -> u32 {
        match (self.mode(), cause) {
            (VectorMode::Vectored, TrapCause::Interrupt(interrupt)) => {
                self.base().wrapping_add(4 * interrupt.code())
            }
            _ => self.base(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VectorMode {
    Direct,
    Vectored,
}

impl<B: Bus> Core<B> {
    /// Enters the trap handler for `cause`.
    ///
    /// `epc` is the address stored in `xepc`: the faulting instruction for exceptions, the next
    /// unexecuted instruction for interrupts. `tval` is stored in `xtval`.
    ///
    /// > By default, all traps at any privilege level are handled in machine mode [...].
    /// > To increase performance, implementations can provide individual read/write bits within
    /// > medeleg and mideleg to indicate that certain exceptions and interrupts should be processed
    /// > directly by a lower privilege level.
    ///
    /// > Traps never transition from a more-privileged mode to a less-privileged mode.
    pub(super) fn take_trap(&mut self, cause: TrapCause, tval: u32, epc: u32) {
        let delegation = match cause {
            TrapCause::Exception(_) => self.csrs.medeleg,
            TrapCause::Interrupt(_) => self.csrs.mideleg,
        };
        let code = cause.code() & !INTERRUPT_BIT;
        let target = if self.privilege < PrivilegeLevel::Machine && is_set(delegation, code) {
            PrivilegeLevel::Supervisor
        } else {
            PrivilegeLevel::Machine
        };

        let csrs = &mut self.csrs;
        let handler = match target {
            PrivilegeLevel::Supervisor => {
                let sie = csrs.status.sie();
                csrs.status.set_spie(sie);
                csrs.status.set_sie(false);
                csrs.status.set_spp(self.privilege);
                csrs.sepc = epc;
                csrs.scause.set(&cause);
                csrs.stval = tval;
                csrs.stvec.target(&cause)
            }
            _ => {
                let mie = csrs.status.mie();
                csrs.status.set_mpie(mie);
                csrs.status.set_mie(false);
                csrs.status.set_mpp(self.privilege);
                csrs.mepc = epc;
                csrs.mcause.set(&cause);
                csrs.mtval = tval;
                csrs.mtvec.target(&cause)
            }
        };

        debug!(
            "trap {:?} from {} to {} (epc {:#010x}, tval {:#010x}, handler {:#010x})",
            cause, self.privilege, target, epc, tval, handler
        );
        self.privilege = target;
        self.registers.set_pc(handler);
    }

    /// Returns the highest-priority interrupt that should be taken right now.
    ///
    /// Interrupts are scanned from cause 12 down to cause 1. One is taken if it is pending and
    /// enabled in `mie`, and its destination level is either above the current level, or equal to
    /// it with that level's global interrupt enable set.
    pub fn pending_interrupt(&self) -> Option<Interrupt> {
        let ready = self.csrs.mip & self.csrs.mie;
        (1..=12)
            .rev()
            .filter(|&code| is_set(ready, code))
            .filter_map(Interrupt::from_code)
            .find(|interrupt| {
                let destination = if is_set(self.csrs.mideleg, interrupt.code()) {
                    PrivilegeLevel::Supervisor
                } else {
                    PrivilegeLevel::Machine
                };
                destination > self.privilege
                    || (destination == self.privilege && self.csrs.status.ie(destination))
            })
    }

    /// Takes the pending interrupt, if any, with `xepc` set to the current pc.
    pub(super) fn service_interrupts(&mut self) -> Option<Interrupt> {
        let interrupt = self.pending_interrupt()?;
        let pc = self.registers.pc();
        self.take_trap(interrupt.into(), 0, pc);
        Some(interrupt)
    }

    /// Performs the state changes of `mret` (`level == Machine`) or `sret`, returning the address
    /// to resume at.
    ///
    /// > An MRET or SRET instruction is used to return from a trap in M-mode or S-mode
    /// > respectively. When executing an xRET instruction, supposing xPP holds the value y, xIE is
    /// > set to xPIE; the privilege mode is changed to y; xPIE is set to 1; and xPP is set to the
    /// > least-privileged supported mode (U if U-mode is implemented, else M). If y≠M, xRET also
    /// > sets MPRV=0.
    pub(super) fn return_from_trap(&mut self, level: PrivilegeLevel) -> u32 {
        let status = &mut self.csrs.status;
        let (previous, resume_at) = match level {
            PrivilegeLevel::Machine => {
                let previous = status.mpp();
                let mpie = status.mpie();
                status.set_mie(mpie);
                status.set_mpie(true);
                status.set_mpp(PrivilegeLevel::User);
                (previous, self.csrs.mepc)
            }
            _ => {
                let previous = status.spp();
                let spie = status.spie();
                status.set_sie(spie);
                status.set_spie(true);
                status.set_spp(PrivilegeLevel::User);
                (previous, self.csrs.sepc)
            }
        };
        if previous != PrivilegeLevel::Machine {
            status.set_mprv(false);
        }
        debug!("return from {} to {} at {:#010x}", level, previous, resume_at);
        self.privilege = previous;
        resume_at
    }
}
