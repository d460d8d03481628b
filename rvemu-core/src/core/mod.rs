//! Provides a simulatable RV32IMAC core implementation with Sv32 virtual memory.

mod counters;
pub mod csr;
mod execute;
mod interrupts;
mod memory;
pub mod mmu;
mod status;
mod tlb;
mod trap;

use log::trace;

use crate::bus::Bus;
use crate::compressed::{decompress, is_compressed};
use crate::instruction::{
    BranchCondition, Instruction, LoadWidth, MulDivOp, RegImmOp, RegRegOp, RegShiftImmOp,
    StoreWidth,
};
use crate::registers::Registers;
use crate::PrivilegeLevel;
pub use counters::Counters;
pub use csr::{AccessError, CsrFile, WriteError};
use execute::Executor;
pub use interrupts::{InterruptLines, EXTERNAL_LINES_MASK};
pub use memory::MemoryError;
use mmu::Access;
pub use mmu::Mmu;
pub use status::Status;
pub use trap::{Cause, TrapCause, Tvec, VectorMode};

/// Address the pc is reset to unless configured otherwise.
pub const DEFAULT_RESET_VECTOR: u32 = 0x8000_0000;

#[derive(Debug, Clone)]
pub struct Config {
    /// If `true`, non-naturally-aligned memory accesses are supported.
    /// If `false`, they will generate an address-misaligned exception.
    pub support_misaligned_memory_access: bool,
    /// Address to which the core's PC register is reset.
    pub reset_vector: u32,
    /// Value of the `mhartid` CSR.
    pub hart_id: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            support_misaligned_memory_access: false,
            reset_vector: DEFAULT_RESET_VECTOR,
            hart_id: 0,
        }
    }
}

/// RISC-V core implementing the RV32IMAC ISA with the Zicsr extension, M/S/U privilege levels
/// and Sv32 address translation.
///
/// As we don't support hardware multithreading, every core always only has a single hart.
/// We therefore don't model RISC-V harts explicitly, but rather consider [`Core`] to be the whole
/// of a core with a single hart.
///
/// > A component is termed a core if it contains an independent instruction fetch unit.
///
/// All memory traffic, including page-table walks, goes through the [`Bus`] the core owns. The core
/// never polls devices: the host updates interrupt lines with
/// [`inject_interrupts`](Self::inject_interrupts) and time with [`set_time`](Self::set_time)
/// between calls to [`step`](Self::step).
#[derive(Debug)]
pub struct Core<B: Bus> {
    config: Config,
    registers: Registers,
    privilege: PrivilegeLevel,
    csrs: CsrFile,
    mmu: Mmu,
    /// Address reserved by the last `lr.w`, if the reservation is still valid.
    reservation: Option<u32>,
    bus: B,
}

impl<B: Bus> Core<B> {
    pub fn new(bus: B, config: Config) -> Self {
        Self {
            registers: Registers::new(config.reset_vector),
            privilege: PrivilegeLevel::Machine,
            csrs: CsrFile::new(config.hart_id),
            mmu: Mmu::new(),
            reservation: None,
            bus,
            config,
        }
    }

    /// Force this core to its resets state.
    ///
    /// The bus and the devices on it are left untouched.
    pub fn reset(&mut self) {
        self.registers = Registers::new(self.config.reset_vector);
        self.privilege = PrivilegeLevel::Machine;
        self.csrs = CsrFile::new(self.config.hart_id);
        self.mmu = Mmu::new();
        self.reservation = None;
    }

    /// Provide a read-only view of this core's configuration.
    ///
    /// It is not possible to modify the configuration after creation.
    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn registers(&self) -> &Registers {
        &self.registers
    }

    pub fn registers_mut(&mut self) -> &mut Registers {
        &mut self.registers
    }

    pub fn privilege(&self) -> PrivilegeLevel {
        self.privilege
    }

    pub fn set_privilege(&mut self, privilege: PrivilegeLevel) {
        self.privilege = privilege;
    }

    pub fn csrs(&self) -> &CsrFile {
        &self.csrs
    }

    pub fn status(&self) -> &Status {
        &self.csrs.status
    }

    pub fn mmu(&self) -> &Mmu {
        &self.mmu
    }

    pub fn reservation(&self) -> Option<u32> {
        self.reservation
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    pub fn bus_mut(&mut self) -> &mut B {
        &mut self.bus
    }

    /// Returns the value of the 64-bit cycle counter.
    pub fn cycle(&self) -> u64 {
        self.csrs.counters.cycle_u64()
    }

    /// Returns the value shadowed in the `time`/`timeh` CSRs.
    pub fn time(&self) -> u64 {
        self.csrs.counters.mtime()
    }

    /// Updates the value shadowed in the `time`/`timeh` CSRs, typically from a CLINT's `mtime`.
    pub fn set_time(&mut self, mtime: u64) {
        self.csrs.counters.set_mtime(mtime);
    }

    /// Executes exactly one instruction, or takes exactly one trap.
    ///
    /// On success `pc` advances to the next instruction, the cycle counter is incremented, and a
    /// pending interrupt may then be taken. A `wfi` that finds nothing to take returns
    /// [`StepResult::Idle`], letting the host fast-forward time before stepping again.
    pub fn step(&mut self) -> StepResult {
        let pc = self.registers.pc();
        let fetched = match self.fetch(pc) {
            Ok(fetched) => fetched,
            Err((exception, tval)) => return self.raise(exception, tval, pc),
        };
        let (result, next_pc) = self.execute(pc, fetched);

        match result {
            ExecutionResult::Ok | ExecutionResult::Wait => {
                self.registers.set_pc(next_pc);
                self.csrs.counters.increment_cycle();
                match self.service_interrupts() {
                    Some(interrupt) => StepResult::Trap(interrupt.into()),
                    None if result == ExecutionResult::Wait => StepResult::Idle,
                    None => StepResult::Retired,
                }
            }
            ExecutionResult::Exception { exception, tval } => self.raise(exception, tval, pc),
        }
    }

    fn raise(&mut self, exception: Exception, tval: u32, pc: u32) -> StepResult {
        let cause = TrapCause::Exception(exception);
        self.take_trap(cause, tval, pc);
        StepResult::Trap(cause)
    }

    /// "Independent instruction fetch unit"
    ///
    /// > Instructions are stored in memory as a sequence of 16-bit little-endian parcels,
    /// > regardless of memory system endianness. Parcels forming one instruction are stored at
    /// > increasing halfword addresses, with the lowest-addressed parcel holding the
    /// > lowest-numbered bits in the instruction specification.
    ///
    /// A `pc` that isn't word-aligned is fetched one parcel at a time, each parcel translated on
    /// its own, so a 32-bit instruction may straddle a page boundary. On failure, the returned
    /// trap value is the address of the parcel that could not be fetched.
    fn fetch(&mut self, pc: u32) -> Result<Fetched, (Exception, u32)> {
        let fetch_error = |err: MemoryError, address: u32| (err.exception(Access::Execute), address);

        if pc & 0b11 == 0 {
            let mut buf = [0u8; 4];
            self.read_virtual(&mut buf, pc, Access::Execute)
                .map_err(|err| fetch_error(err, pc))?;
            let word = u32::from_le_bytes(buf);
            if !is_compressed(word) {
                return Ok(Fetched::full(word));
            }
            let parcel = word & 0xFFFF;
            return Fetched::compressed(parcel).ok_or((Exception::IllegalInstruction, parcel));
        }

        let mut low = [0u8; 2];
        self.read_virtual(&mut low, pc, Access::Execute)
            .map_err(|err| fetch_error(err, pc))?;
        let low = u16::from_le_bytes(low) as u32;
        if is_compressed(low) {
            return Fetched::compressed(low).ok_or((Exception::IllegalInstruction, low));
        }

        let high_address = pc.wrapping_add(2);
        let mut high = [0u8; 2];
        self.read_virtual(&mut high, high_address, Access::Execute)
            .map_err(|err| fetch_error(err, high_address))?;
        let high = u16::from_le_bytes(high) as u32;
        Ok(Fetched::full(high << 16 | low))
    }

    /// Decodes and executes a fetched instruction, returning the outcome and the address of the
    /// instruction to continue with.
    ///
    /// # Unspecified behavior
    ///
    /// > The behavior upon decoding a reserved instruction is UNSPECIFIED.
    ///
    /// This implementation chooses to raise an [`Exception::IllegalInstruction`] for every
    /// encoding it doesn't decode.
    fn execute(&mut self, pc: u32, fetched: Fetched) -> (ExecutionResult, u32) {
        let mut executor = Executor {
            core: self,
            pc,
            next_pc: pc.wrapping_add(fetched.length),
            raw_instruction: fetched.raw,
        };
        let instruction = match Instruction::decode(fetched.instruction) {
            Ok(instruction) => instruction,
            Err(err) => {
                trace!("{:#010x}: {} ({:#010x})", pc, err, fetched.raw);
                return (executor.illegal_instruction(), executor.next_pc);
            }
        };
        trace!("{:#010x}: {:?}", pc, instruction);

        let result = match instruction {
            Instruction::OpImm {
                op,
                dest,
                src,
                immediate,
            } => {
                let op = match op {
                    RegImmOp::Addi => Executor::addi,
                    RegImmOp::Slti => Executor::slti,
                    RegImmOp::Sltiu => Executor::sltiu,
                    RegImmOp::Xori => Executor::xori,
                    RegImmOp::Ori => Executor::ori,
                    RegImmOp::Andi => Executor::andi,
                };
                op(&mut executor, dest, src, immediate)
            }
            Instruction::OpShiftImm {
                op,
                dest,
                src,
                shift_amount_u5,
            } => {
                let op = match op {
                    RegShiftImmOp::Slli => Executor::slli,
                    RegShiftImmOp::Srli => Executor::srli,
                    RegShiftImmOp::Srai => Executor::srai,
                };
                op(&mut executor, dest, src, shift_amount_u5)
            }
            Instruction::Auipc { dest, immediate } => executor.auipc(dest, immediate),
            Instruction::Lui { dest, immediate } => executor.lui(dest, immediate),
            Instruction::Op {
                op,
                dest,
                src1,
                src2,
            } => {
                let op = match op {
                    RegRegOp::Add => Executor::add,
                    RegRegOp::Slt => Executor::slt,
                    RegRegOp::Sltu => Executor::sltu,
                    RegRegOp::And => Executor::and,
                    RegRegOp::Or => Executor::or,
                    RegRegOp::Xor => Executor::xor,
                    RegRegOp::Sll => Executor::sll,
                    RegRegOp::Srl => Executor::srl,
                    RegRegOp::Sub => Executor::sub,
                    RegRegOp::Sra => Executor::sra,
                };
                op(&mut executor, dest, src1, src2)
            }
            Instruction::MulDiv {
                op,
                dest,
                src1,
                src2,
            } => {
                let op = match op {
                    MulDivOp::Mul => Executor::mul,
                    MulDivOp::Mulh => Executor::mulh,
                    MulDivOp::Mulhsu => Executor::mulhsu,
                    MulDivOp::Mulhu => Executor::mulhu,
                    MulDivOp::Div => Executor::div,
                    MulDivOp::Divu => Executor::divu,
                    MulDivOp::Rem => Executor::rem,
                    MulDivOp::Remu => Executor::remu,
                };
                op(&mut executor, dest, src1, src2)
            }
            Instruction::Jal { dest, offset } => executor.jal(dest, offset),
            Instruction::Jalr { dest, base, offset } => executor.jalr(dest, base, offset),
            Instruction::Branch {
                condition,
                src1,
                src2,
                offset,
            } => {
                let op = match condition {
                    BranchCondition::Beq => Executor::beq,
                    BranchCondition::Bne => Executor::bne,
                    BranchCondition::Blt => Executor::blt,
                    BranchCondition::Bltu => Executor::bltu,
                    BranchCondition::Bge => Executor::bge,
                    BranchCondition::Bgeu => Executor::bgeu,
                };
                op(&mut executor, src1, src2, offset)
            }
            Instruction::Load {
                width,
                dest,
                base,
                offset,
            } => {
                let op = match width {
                    LoadWidth::Lb => Executor::lb,
                    LoadWidth::Lh => Executor::lh,
                    LoadWidth::Lw => Executor::lw,
                    LoadWidth::Lbu => Executor::lbu,
                    LoadWidth::Lhu => Executor::lhu,
                };
                op(&mut executor, dest, base, offset)
            }
            Instruction::Store {
                width,
                src,
                base,
                offset,
            } => {
                let op = match width {
                    StoreWidth::Sb => Executor::sb,
                    StoreWidth::Sh => Executor::sh,
                    StoreWidth::Sw => Executor::sw,
                };
                op(&mut executor, src, base, offset)
            }
            Instruction::LoadReserved { dest, address } => executor.lr(dest, address),
            Instruction::StoreConditional { dest, address, src } => {
                executor.sc(dest, address, src)
            }
            Instruction::Amo {
                op,
                dest,
                address,
                src,
            } => executor.amo(op, dest, address, src),
            Instruction::Csr {
                op,
                dest,
                source,
                csr,
            } => executor.csr(op, dest, source, csr),
            Instruction::Fence => executor.fence(),
            Instruction::FenceI => executor.fence_i(),
            Instruction::Ecall => executor.ecall(),
            Instruction::Ebreak => executor.ebreak(),
            Instruction::Sret => executor.sret(),
            Instruction::Mret => executor.mret(),
            Instruction::Wfi => executor.wfi(),
            Instruction::SfenceVma { .. } => executor.sfence_vma(),
        };
        (result, executor.next_pc)
    }
}

/// An instruction as it came out of the fetch unit.
#[derive(Debug, Copy, Clone)]
struct Fetched {
    /// The 32-bit encoding, expanded if it was compressed.
    instruction: u32,
    /// The bits as they were in memory.
    raw: u32,
    /// Length in bytes, `2` or `4`.
    length: u32,
}

impl Fetched {
    fn full(word: u32) -> Self {
        Self {
            instruction: word,
            raw: word,
            length: 4,
        }
    }

    fn compressed(parcel: u32) -> Option<Self> {
        decompress(parcel as u16).map(|instruction| Self {
            instruction,
            raw: parcel,
            length: 2,
        })
    }
}

/// What a call to [`Core::step`] did.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum StepResult {
    /// An instruction was executed and no trap was taken.
    Retired,
    /// A `wfi` was executed and no interrupt is ready to be taken.
    Idle,
    /// A trap was taken; `pc` now points to the trap handler.
    Trap(TrapCause),
}

impl StepResult {
    /// The numeric trap cause, if a trap was taken.
    pub fn trap_code(&self) -> Option<u32> {
        match self {
            Self::Trap(cause) => Some(cause.code()),
            Self::Retired | Self::Idle => None,
        }
    }
}

#[derive(Debug, Default, Copy, Clone, Eq, PartialEq)]
enum ExecutionResult {
    /// Execution went normal
    #[default]
    Ok,
    /// A `wfi` completed; interrupts are checked and the hart may be idle.
    Wait,
    /// Execution triggered an exception
    Exception { exception: Exception, tval: u32 },
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Exception {
    /// Instruction address is not on a two-byte aligned boundary in memory.
    InstructionAddressMisaligned,
    InstructionAccessFault,
    /// Generic exception used to communicate one of many possible scenarios:
    ///
    /// - (*UNSPECIFIED*) Attempt to decode a reserved instruction.
    /// - Attempt to access a non-existent CSR.
    /// - Attempt to access a CSR without the appropriate privilege level.
    /// - Attempt to write to a read-only CSR.
    /// - Attempt to execute a privileged instruction from too low a privilege level.
    IllegalInstruction,
    Breakpoint,
    LoadAddressMisaligned,
    LoadAccessFault,
    StoreOrAmoAddressMisaligned,
    StoreOrAmoAccessFault,
    EnvironmentCallFromUMode,
    EnvironmentCallFromSMode,
    EnvironmentCallFromMMode,
    InstructionPageFault,
    LoadPageFault,
    StoreOrAmoPageFault,
}

impl Exception {
    /// Returns the exception code (cause) for this exception.
    pub fn code(&self) -> u32 {
        match self {
            Self::InstructionAddressMisaligned => 0,
            Self::InstructionAccessFault => 1,
            Self::IllegalInstruction => 2,
            Self::Breakpoint => 3,
            Self::LoadAddressMisaligned => 4,
            Self::LoadAccessFault => 5,
            Self::StoreOrAmoAddressMisaligned => 6,
            Self::StoreOrAmoAccessFault => 7,
            Self::EnvironmentCallFromUMode => 8,
            Self::EnvironmentCallFromSMode => 9,
            Self::EnvironmentCallFromMMode => 11,
            Self::InstructionPageFault => 12,
            Self::LoadPageFault => 13,
            Self::StoreOrAmoPageFault => 15,
        }
    }
}

/// The standard interrupts, with their exception code as discriminant.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Interrupt {
    SupervisorSoftwareInterrupt = 1,
    MachineSoftwareInterrupt = 3,
    SupervisorTimerInterrupt = 5,
    MachineTimerInterrupt = 7,
    SupervisorExternalInterrupt = 9,
    MachineExternalInterrupt = 11,
}

// Interrupt codes must fit in the scanned range of mip.
const_assert!((Interrupt::MachineExternalInterrupt as u32) <= 12);

impl Interrupt {
    /// Returns the exception code (cause) for this interrupt.
    pub fn code(&self) -> u32 {
        *self as u32
    }

    /// Returns the interrupt with exception code `code`, if there is one.
    pub fn from_code(code: u32) -> Option<Self> {
        match code {
            1 => Some(Self::SupervisorSoftwareInterrupt),
            3 => Some(Self::MachineSoftwareInterrupt),
            5 => Some(Self::SupervisorTimerInterrupt),
            7 => Some(Self::MachineTimerInterrupt),
            9 => Some(Self::SupervisorExternalInterrupt),
            11 => Some(Self::MachineExternalInterrupt),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registers::Specifier;
    use crate::resources::ram::Ram;

    const RAM_BASE: u32 = 0x8000_0000;
    const NOP: u32 = 0x0000_0013;
    const ECALL: u32 = 0x0000_0073;
    const EBREAK: u32 = 0x0010_0073;
    const MRET: u32 = 0x3020_0073;
    const WFI: u32 = 0x1050_0073;
    const SFENCE_VMA: u32 = 0x1200_0073;

    fn i_type(opcode: u32, funct3: u32, rd: u32, rs1: u32, imm: i32) -> u32 {
        (imm as u32) << 20 | rs1 << 15 | funct3 << 12 | rd << 7 | opcode
    }

    fn r_type(opcode: u32, funct7: u32, funct3: u32, rd: u32, rs1: u32, rs2: u32) -> u32 {
        funct7 << 25 | rs2 << 20 | rs1 << 15 | funct3 << 12 | rd << 7 | opcode
    }

    fn addi(rd: u32, rs1: u32, imm: i32) -> u32 {
        i_type(0x13, 0b000, rd, rs1, imm)
    }

    fn lw(rd: u32, rs1: u32, imm: i32) -> u32 {
        i_type(0x03, 0b010, rd, rs1, imm)
    }

    fn muldiv(funct3: u32, rd: u32, rs1: u32, rs2: u32) -> u32 {
        r_type(0x33, 1, funct3, rd, rs1, rs2)
    }

    fn amo(funct5: u32, rd: u32, rs1: u32, rs2: u32) -> u32 {
        r_type(0x2F, funct5 << 2, 0b010, rd, rs1, rs2)
    }

    fn csr_op(funct3: u32, rd: u32, csr: csr::CsrSpecifier, rs1: u32) -> u32 {
        i_type(0x73, funct3, rd, rs1, csr as i32)
    }

    fn x(index: u32) -> Specifier {
        Specifier::from_u5(index)
    }

    fn make_core_at(reset_vector: u32, program: &[u32]) -> Core<Ram> {
        let mut ram = Ram::new(RAM_BASE, 0x10000).unwrap();
        let bytes: Vec<u8> = program.iter().flat_map(|word| word.to_le_bytes()).collect();
        ram.load(reset_vector, &bytes).unwrap();
        Core::new(
            ram,
            Config {
                reset_vector,
                ..Config::default()
            },
        )
    }

    fn make_core(program: &[u32]) -> Core<Ram> {
        make_core_at(RAM_BASE, program)
    }

    #[test]
    fn test_auipc_at_reset() {
        // auipc x1, 0
        let mut core = make_core(&[0x0000_0097]);
        assert_eq!(PrivilegeLevel::Machine, core.privilege());
        assert_eq!(StepResult::Retired, core.step());
        assert_eq!(RAM_BASE, core.registers().x(x(1)));
        assert_eq!(RAM_BASE + 4, core.registers().pc());
        assert_eq!(1, core.cycle());
    }

    #[test]
    fn test_load_page_fault() {
        let mut core = make_core(&[lw(5, 6, 0)]);
        // Sv32 with an all-zero root table; M-mode loads translated through MPRV with MPP=S.
        core.write_csr(csr::SATP, 1 << 31 | (RAM_BASE + 0x4000) >> 12)
            .unwrap();
        core.write_csr(csr::MSTATUS, 1 << 17 | 1 << 11).unwrap();
        core.registers_mut().set_x(x(6), 0x4000_0000);
        assert_eq!(
            StepResult::Trap(Exception::LoadPageFault.into()),
            core.step()
        );
        assert_eq!(Ok(13), core.read_csr(csr::MCAUSE));
        assert_eq!(Ok(0x4000_0000), core.read_csr(csr::MTVAL));
        assert_eq!(Ok(RAM_BASE), core.read_csr(csr::MEPC));
        // Nothing retired.
        assert_eq!(0, core.cycle());
    }

    #[test]
    fn test_satp_write_and_sfence_flush_tlbs() {
        let mut core = make_core(&[
            lw(5, 6, 0),
            lw(8, 9, 0),
            csr_op(0b001, 0, csr::SATP, 7), // csrrw x0, satp, x7
            SFENCE_VMA,
        ]);
        let root = RAM_BASE + 0x4000;
        let leaf = RAM_BASE >> 12 << 10 | 1 << 7 | 1 << 6 | 1 << 2 | 1 << 1 | 1;
        // VA 0x0040_0000: global superpage. VA 0x0080_0000: non-global superpage.
        core.write_word(root + 4, leaf | 1 << 5).unwrap();
        core.write_word(root + 8, leaf).unwrap();

        let satp = 1 << 31 | root >> 12;
        core.write_csr(csr::SATP, satp).unwrap();
        // Loads go through translation as S-mode: MPRV with MPP = S.
        core.write_csr(csr::MSTATUS, 1 << 17 | 1 << 11).unwrap();
        core.registers_mut().set_x(x(6), 0x0040_1000);
        core.registers_mut().set_x(x(9), 0x0080_1000);
        core.registers_mut().set_x(x(7), satp);

        assert_eq!(StepResult::Retired, core.step());
        assert_eq!(StepResult::Retired, core.step());
        assert_eq!(2, core.mmu().valid_entries());

        assert_eq!(StepResult::Retired, core.step());
        assert_eq!(1, core.mmu().valid_entries());
        assert!(core.mmu().is_cached(0x0040_0000, mmu::Access::Read));
        assert!(!core.mmu().is_cached(0x0080_0000, mmu::Access::Read));

        assert_eq!(StepResult::Retired, core.step());
        assert_eq!(0, core.mmu().valid_entries());
    }

    #[test]
    fn test_lr_sc() {
        let mut core = make_core(&[
            amo(0b00010, 5, 10, 0),  // lr.w x5, (x10)
            amo(0b00011, 6, 10, 7),  // sc.w x6, x7, (x10)
            amo(0b00011, 8, 10, 7),  // sc.w x8, x7, (x10)
        ]);
        core.write_word(RAM_BASE + 0x1000, 17).unwrap();
        core.registers_mut().set_x(x(10), RAM_BASE + 0x1000);
        core.registers_mut().set_x(x(7), 42);
        core.registers_mut().set_x(x(8), 99);

        assert_eq!(StepResult::Retired, core.step());
        assert_eq!(17, core.registers().x(x(5)));
        assert_eq!(Some(RAM_BASE + 0x1000), core.reservation());

        assert_eq!(StepResult::Retired, core.step());
        assert_eq!(0, core.registers().x(x(6)));
        assert_eq!(Ok(42), core.read_word(RAM_BASE + 0x1000));
        assert_eq!(None, core.reservation());

        // No reservation left: fails without touching memory.
        core.registers_mut().set_x(x(7), 1);
        assert_eq!(StepResult::Retired, core.step());
        assert_eq!(1, core.registers().x(x(8)));
        assert_eq!(Ok(42), core.read_word(RAM_BASE + 0x1000));
    }

    #[test]
    fn test_amo() {
        let mut core = make_core(&[
            amo(0b00000, 5, 10, 7), // amoadd.w x5, x7, (x10)
            amo(0b10100, 6, 10, 8), // amomax.w x6, x8, (x10)
            amo(0b00001, 9, 10, 0), // amoswap.w x9, x0, (x10)
        ]);
        core.write_word(RAM_BASE + 0x1000, 5).unwrap();
        core.registers_mut().set_x(x(10), RAM_BASE + 0x1000);
        core.registers_mut().set_x(x(7), 3);
        core.registers_mut().set_x(x(8), -1i32 as u32);

        core.step();
        assert_eq!(5, core.registers().x(x(5)));
        assert_eq!(Ok(8), core.read_word(RAM_BASE + 0x1000));
        core.step();
        assert_eq!(8, core.registers().x(x(6)));
        assert_eq!(Ok(8), core.read_word(RAM_BASE + 0x1000));
        core.step();
        assert_eq!(8, core.registers().x(x(9)));
        assert_eq!(Ok(0), core.read_word(RAM_BASE + 0x1000));
    }

    #[test]
    fn test_timer_interrupt_after_commit() {
        let mut core = make_core(&[NOP]);
        core.write_csr(csr::MTVEC, RAM_BASE + 0x100).unwrap();
        core.write_csr(csr::MIE, 1 << 7).unwrap();
        core.write_csr(csr::MSTATUS, 1 << 3).unwrap();
        core.inject_interrupts(1 << 7);
        assert_eq!(
            StepResult::Trap(Interrupt::MachineTimerInterrupt.into()),
            core.step()
        );
        assert_eq!(RAM_BASE + 0x100, core.registers().pc());
        // The nop retired, so mepc points past it.
        assert_eq!(Ok(RAM_BASE + 4), core.read_csr(csr::MEPC));
        assert_eq!(Ok(0x8000_0007), core.read_csr(csr::MCAUSE));
    }

    #[test]
    fn test_wfi_idle_and_wake() {
        let mut core = make_core(&[WFI, WFI, WFI]);
        core.write_csr(csr::MTVEC, RAM_BASE + 0x100).unwrap();
        core.write_csr(csr::MSTATUS, 1 << 3).unwrap();

        assert_eq!(StepResult::Idle, core.step());
        assert_eq!(RAM_BASE + 4, core.registers().pc());

        // Pending but not enabled: still idle.
        core.inject_interrupts(1 << 7);
        assert_eq!(StepResult::Idle, core.step());
        assert_eq!(RAM_BASE + 8, core.registers().pc());

        core.write_csr(csr::MIE, 1 << 7).unwrap();
        let result = core.step();
        assert_eq!(Some(0x8000_0007), result.trap_code());
        assert_eq!(Ok(RAM_BASE + 12), core.read_csr(csr::MEPC));
        assert_eq!(3, core.cycle());
    }

    #[test]
    fn test_wfi_trapped_by_tw() {
        let mut core = make_core(&[WFI]);
        core.write_csr(csr::MSTATUS, 1 << 21).unwrap();
        core.set_privilege(PrivilegeLevel::Supervisor);
        assert_eq!(
            StepResult::Trap(Exception::IllegalInstruction.into()),
            core.step()
        );
        assert_eq!(Ok(WFI), core.read_csr(csr::MTVAL));
    }

    #[test]
    fn test_x0_stays_zero() {
        let mut core = make_core(&[addi(0, 0, 5), 0x0000_0037 | 0xFFFF_F000]);
        core.step();
        assert_eq!(0, core.registers().x(Specifier::X0));
        // lui x0, 0xFFFFF
        core.step();
        assert_eq!(0, core.registers().x(Specifier::X0));
    }

    #[test]
    fn test_division_edge_cases() {
        let mut core = make_core(&[
            muldiv(0b100, 3, 1, 2), // div x3, x1, x2
            muldiv(0b101, 4, 1, 2), // divu x4, x1, x2
            muldiv(0b110, 5, 1, 2), // rem x5, x1, x2
            muldiv(0b111, 6, 1, 2), // remu x6, x1, x2
            muldiv(0b100, 7, 8, 9), // div x7, x8, x9
            muldiv(0b110, 10, 8, 9), // rem x10, x8, x9
            muldiv(0b011, 11, 8, 8), // mulhu x11, x8, x8
        ]);
        let registers = core.registers_mut();
        registers.set_x(x(1), 7);
        registers.set_x(x(2), 0);
        registers.set_x(x(8), 0x8000_0000);
        registers.set_x(x(9), u32::MAX);
        for _ in 0..7 {
            assert_eq!(StepResult::Retired, core.step());
        }
        let registers = core.registers();
        assert_eq!(u32::MAX, registers.x(x(3)));
        assert_eq!(u32::MAX, registers.x(x(4)));
        assert_eq!(7, registers.x(x(5)));
        assert_eq!(7, registers.x(x(6)));
        assert_eq!(0x8000_0000, registers.x(x(7)));
        assert_eq!(0, registers.x(x(10)));
        assert_eq!(0x4000_0000, registers.x(x(11)));
    }

    #[test]
    fn test_compressed_and_unaligned_fetch() {
        // c.addi x1, 1; then addi x2, x0, 3 starting at a halfword boundary.
        let addi_x2 = addi(2, 0, 3);
        let mut core = make_core(&[0x0085 | (addi_x2 & 0xFFFF) << 16, addi_x2 >> 16]);
        assert_eq!(StepResult::Retired, core.step());
        assert_eq!(1, core.registers().x(x(1)));
        assert_eq!(RAM_BASE + 2, core.registers().pc());
        assert_eq!(StepResult::Retired, core.step());
        assert_eq!(3, core.registers().x(x(2)));
        assert_eq!(RAM_BASE + 6, core.registers().pc());
    }

    #[test]
    fn test_fetch_across_page() {
        // addi x2, x0, 3 with its halves on either side of a page boundary.
        let mut core = make_core_at(RAM_BASE + 0xFFE, &[addi(2, 0, 3)]);
        assert_eq!(StepResult::Retired, core.step());
        assert_eq!(3, core.registers().x(x(2)));
        assert_eq!(RAM_BASE + 0x1002, core.registers().pc());
    }

    #[test]
    fn test_fetch_access_fault() {
        let mut core = make_core(&[]);
        core.registers_mut().set_pc(0x1000);
        assert_eq!(
            StepResult::Trap(Exception::InstructionAccessFault.into()),
            core.step()
        );
        assert_eq!(Ok(0x1000), core.read_csr(csr::MTVAL));
    }

    #[test]
    fn test_illegal_instructions() {
        let mut core = make_core(&[u32::MAX, 0x0000_0000]);
        core.write_csr(csr::MTVEC, RAM_BASE + 4).unwrap();
        assert_eq!(Some(2), core.step().trap_code());
        assert_eq!(Ok(u32::MAX), core.read_csr(csr::MTVAL));
        // The all-zero parcel is illegal; tval is the parcel.
        assert_eq!(Some(2), core.step().trap_code());
        assert_eq!(Ok(0), core.read_csr(csr::MTVAL));
        assert_eq!(Ok(RAM_BASE + 4), core.read_csr(csr::MEPC));
    }

    #[test]
    fn test_ecall_and_ebreak() {
        let mut core = make_core(&[ECALL, EBREAK]);
        core.write_csr(csr::MTVEC, RAM_BASE + 4).unwrap();
        assert_eq!(Some(11), core.step().trap_code());
        assert_eq!(Ok(0), core.read_csr(csr::MTVAL));
        assert_eq!(Some(3), core.step().trap_code());
        assert_eq!(Ok(RAM_BASE + 4), core.read_csr(csr::MTVAL));

        let mut core = make_core(&[ECALL]);
        core.set_privilege(PrivilegeLevel::User);
        assert_eq!(Some(8), core.step().trap_code());
        assert_eq!(PrivilegeLevel::Machine, core.privilege());
    }

    #[test]
    fn test_csr_instructions() {
        let mut core = make_core(&[
            csr_op(0b001, 5, csr::MSCRATCH, 6), // csrrw x5, mscratch, x6
            csr_op(0b010, 7, csr::MSCRATCH, 0), // csrr x7, mscratch
            csr_op(0b111, 8, csr::MSCRATCH, 4), // csrrci x8, mscratch, 4
            csr_op(0b010, 9, csr::CYCLE, 0),    // rdcycle x9
            csr_op(0b001, 0, csr::CYCLE, 6),    // csrw cycle, x6
        ]);
        core.write_csr(csr::MTVEC, RAM_BASE + 0x100).unwrap();
        core.registers_mut().set_x(x(6), 0x1234);
        for _ in 0..4 {
            assert_eq!(StepResult::Retired, core.step());
        }
        let registers = core.registers();
        assert_eq!(0, registers.x(x(5)));
        assert_eq!(0x1234, registers.x(x(7)));
        assert_eq!(0x1234, registers.x(x(8)));
        assert_eq!(3, registers.x(x(9)));
        assert_eq!(Ok(0x1230), core.read_csr(csr::MSCRATCH));
        assert_eq!(Some(2), core.step().trap_code());
    }

    #[test]
    fn test_csr_privilege_from_user_mode() {
        let mut core = make_core(&[csr_op(0b010, 5, csr::MSTATUS, 0)]);
        core.set_privilege(PrivilegeLevel::User);
        assert_eq!(Some(2), core.step().trap_code());
        assert_eq!(0, core.registers().x(x(5)));
    }

    #[test]
    fn test_mret() {
        let mut core = make_core(&[MRET]);
        core.write_csr(csr::MEPC, RAM_BASE + 0x200).unwrap();
        // MPP = U, MPIE = 1
        core.write_csr(csr::MSTATUS, 1 << 7).unwrap();
        assert_eq!(StepResult::Retired, core.step());
        assert_eq!(PrivilegeLevel::User, core.privilege());
        assert_eq!(RAM_BASE + 0x200, core.registers().pc());
        assert!(core.status().mie());
    }

    #[test]
    fn test_privileged_instructions_from_user_mode() {
        let mut core = make_core(&[MRET, SFENCE_VMA]);
        core.write_csr(csr::MTVEC, RAM_BASE + 4).unwrap();
        core.set_privilege(PrivilegeLevel::User);
        assert_eq!(Some(2), core.step().trap_code());
        core.set_privilege(PrivilegeLevel::User);
        assert_eq!(Some(2), core.step().trap_code());
        assert_eq!(Ok(SFENCE_VMA), core.read_csr(csr::MTVAL));
    }

    #[test]
    fn test_branch_and_link() {
        let mut core = make_core(&[
            0x0080_00EF, // jal x1, 8
            NOP,
            0x0000_8167, // jalr x2, 0(x1)
        ]);
        core.step();
        assert_eq!(RAM_BASE + 4, core.registers().x(x(1)));
        assert_eq!(RAM_BASE + 8, core.registers().pc());
        core.step();
        assert_eq!(RAM_BASE + 12, core.registers().x(x(2)));
        assert_eq!(RAM_BASE + 4, core.registers().pc());
    }

    #[test]
    fn test_reset() {
        let mut core = make_core(&[addi(1, 0, 1)]);
        core.step();
        core.write_csr(csr::MSCRATCH, 1).unwrap();
        core.set_privilege(PrivilegeLevel::User);
        core.reset();
        assert_eq!(RAM_BASE, core.registers().pc());
        assert_eq!(0, core.registers().x(x(1)));
        assert_eq!(PrivilegeLevel::Machine, core.privilege());
        assert_eq!(Ok(0), core.read_csr(csr::MSCRATCH));
        assert_eq!(0, core.cycle());
    }
}
