use log::trace;

use super::memory::MemoryError;
use super::mmu::Access;
use super::{Core, Exception, ExecutionResult};
use crate::bits::{less_signed, less_unsigned, mul_wide, mul_wide_signed, mul_wide_signed_unsigned};
use crate::bus::Bus;
use crate::core::csr::CsrSpecifier;
use crate::instruction::{AmoOp, CsrOp, CsrSource};
use crate::registers::Specifier;
use crate::{Alignment, PrivilegeLevel};

/// Executes one decoded instruction against a [`Core`].
///
/// `next_pc` starts out as the address of the following instruction. Jumps and taken branches
/// overwrite it; the caller commits it to `pc` once the instruction completed without a trap.
#[derive(Debug)]
pub(super) struct Executor<'c, B: Bus> {
    pub core: &'c mut Core<B>,
    /// Address of the instruction being executed.
    pub pc: u32,
    pub next_pc: u32,
    /// The instruction as fetched, reported in `xtval` when it turns out to be illegal.
    pub raw_instruction: u32,
}

impl<'c, B: Bus> Executor<'c, B> {
    /// Executes an `addi` instruction.
    ///
    /// > ADDI adds the sign-extended 12-bit immediate to register rs1. Arithmetic overflow is
    /// > ignored and the result is simply the low XLEN bits of the result.
    pub fn addi(&mut self, dest: Specifier, src: Specifier, immediate: i32) -> ExecutionResult {
        self.reg_imm_op(dest, src, immediate, |s, imm| s.wrapping_add_signed(imm))
    }

    /// Executes a `slti` instruction.
    ///
    /// > SLTI (set less than immediate) places the value 1 in register rd if register rs1 is less
    /// > than the sign-extended immediate when both are treated as signed numbers, else 0 is
    /// > written to rd.
    pub fn slti(&mut self, dest: Specifier, src: Specifier, immediate: i32) -> ExecutionResult {
        self.reg_imm_op(dest, src, immediate, |s, imm| {
            less_signed(s, imm as u32) as u32
        })
    }

    /// Executes a `sltiu` instruction.
    ///
    /// > SLTIU is similar but compares the values as unsigned numbers (i.e., the immediate is
    /// > first sign-extended to XLEN bits then treated as an unsigned number).
    pub fn sltiu(&mut self, dest: Specifier, src: Specifier, immediate: i32) -> ExecutionResult {
        self.reg_imm_op(dest, src, immediate, |s, imm| {
            less_unsigned(s, imm as u32) as u32
        })
    }

    /// Executes an `andi` instruction.
    pub fn andi(&mut self, dest: Specifier, src: Specifier, immediate: i32) -> ExecutionResult {
        self.reg_imm_op(dest, src, immediate, |s, imm| s & (imm as u32))
    }

    /// Executes an `ori` instruction.
    pub fn ori(&mut self, dest: Specifier, src: Specifier, immediate: i32) -> ExecutionResult {
        self.reg_imm_op(dest, src, immediate, |s, imm| s | (imm as u32))
    }

    /// Executes a `xori` instruction.
    ///
    /// > Note, XORI rd, rs1, -1 performs a bitwise logical inversion of register rs1 (assembler
    /// > pseudoinstruction NOT rd, rs).
    pub fn xori(&mut self, dest: Specifier, src: Specifier, immediate: i32) -> ExecutionResult {
        self.reg_imm_op(dest, src, immediate, |s, imm| s ^ (imm as u32))
    }

    pub fn slli(&mut self, dest: Specifier, src: Specifier, shift_amount_u5: u32) -> ExecutionResult {
        self.reg_imm_op(dest, src, shift_amount_u5 as i32, |s, shamt| s << (shamt & 0x1F))
    }

    pub fn srli(&mut self, dest: Specifier, src: Specifier, shift_amount_u5: u32) -> ExecutionResult {
        self.reg_imm_op(dest, src, shift_amount_u5 as i32, |s, shamt| s >> (shamt & 0x1F))
    }

    /// Executes a `srai` instruction.
    ///
    /// > SRAI is an arithmetic right shift (the original sign bit is copied into the vacated upper
    /// > bits).
    pub fn srai(&mut self, dest: Specifier, src: Specifier, shift_amount_u5: u32) -> ExecutionResult {
        self.reg_imm_op(dest, src, shift_amount_u5 as i32, |s, shamt| {
            ((s as i32) >> (shamt & 0x1F)) as u32
        })
    }

    /// Executes a `lui` instruction.
    ///
    /// > LUI places the U-immediate value in the top 20 bits of the destination register rd,
    /// > filling in the lowest 12 bits with zeros.
    pub fn lui(&mut self, dest: Specifier, immediate: i32) -> ExecutionResult {
        self.core.registers.set_x(dest, immediate as u32 & !0xFFF);
        ExecutionResult::Ok
    }

    /// Executes an `auipc` instruction.
    ///
    /// > AUIPC forms a 32-bit offset from the 20-bit U-immediate, filling in the lowest 12 bits
    /// > with zeros, adds this offset to the address of the AUIPC instruction, then places the
    /// > result in register rd.
    pub fn auipc(&mut self, dest: Specifier, immediate: i32) -> ExecutionResult {
        let result = self.pc.wrapping_add_signed(immediate & !0xFFF);
        self.core.registers.set_x(dest, result);
        ExecutionResult::Ok
    }

    pub fn add(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        self.reg_reg_op(dest, src1, src2, |s1, s2| s1.wrapping_add(s2))
    }

    pub fn sub(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        self.reg_reg_op(dest, src1, src2, |s1, s2| s1.wrapping_sub(s2))
    }

    /// Executes a `slt` instruction.
    ///
    /// > SLT and SLTU perform signed and unsigned compares respectively, writing 1 to rd if
    /// > rs1 < rs2, 0 otherwise.
    pub fn slt(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        self.reg_reg_op(dest, src1, src2, |s1, s2| less_signed(s1, s2) as u32)
    }

    pub fn sltu(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        self.reg_reg_op(dest, src1, src2, |s1, s2| less_unsigned(s1, s2) as u32)
    }

    pub fn and(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        self.reg_reg_op(dest, src1, src2, |s1, s2| s1 & s2)
    }

    pub fn or(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        self.reg_reg_op(dest, src1, src2, |s1, s2| s1 | s2)
    }

    pub fn xor(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        self.reg_reg_op(dest, src1, src2, |s1, s2| s1 ^ s2)
    }

    /// Executes a `sll` instruction.
    ///
    /// > SLL, SRL, and SRA perform logical left, logical right, and arithmetic right shifts on the
    /// > value in register rs1 by the shift amount held in the lower 5 bits of register rs2.
    pub fn sll(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        self.reg_reg_op(dest, src1, src2, |s1, s2| s1 << (s2 & 0x1F))
    }

    pub fn srl(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        self.reg_reg_op(dest, src1, src2, |s1, s2| s1 >> (s2 & 0x1F))
    }

    pub fn sra(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        self.reg_reg_op(dest, src1, src2, |s1, s2| {
            ((s1 as i32) >> (s2 & 0x1F)) as u32
        })
    }

    /// Executes a `mul` instruction.
    ///
    /// > MUL performs an XLEN-bit×XLEN-bit multiplication of rs1 by rs2 and places the lower XLEN
    /// > bits in the destination register.
    pub fn mul(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        self.reg_reg_op(dest, src1, src2, |s1, s2| mul_wide(s1, s2).0)
    }

    /// Executes a `mulh` instruction.
    ///
    /// > MULH, MULHU, and MULHSU perform the same multiplication but return the upper XLEN bits of
    /// > the full 2×XLEN-bit product, for signed×signed, unsigned×unsigned, and signed
    /// > rs1×unsigned rs2 multiplication, respectively.
    pub fn mulh(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        self.reg_reg_op(dest, src1, src2, |s1, s2| mul_wide_signed(s1, s2).1)
    }

    pub fn mulhsu(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        self.reg_reg_op(dest, src1, src2, |s1, s2| mul_wide_signed_unsigned(s1, s2).1)
    }

    pub fn mulhu(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        self.reg_reg_op(dest, src1, src2, |s1, s2| mul_wide(s1, s2).1)
    }

    /// Executes a `div` instruction.
    ///
    /// > The quotient of division by zero has all bits set, and the remainder of division by zero
    /// > equals the dividend. Signed division overflow occurs only when the most-negative integer
    /// > is divided by −1. The quotient of a signed division with overflow is equal to the
    /// > dividend, and the remainder is zero.
    pub fn div(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        self.reg_reg_op(dest, src1, src2, |s1, s2| match s2 {
            0 => u32::MAX,
            _ => (s1 as i32).wrapping_div(s2 as i32) as u32,
        })
    }

    pub fn divu(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        self.reg_reg_op(dest, src1, src2, |s1, s2| s1.checked_div(s2).unwrap_or(u32::MAX))
    }

    pub fn rem(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        self.reg_reg_op(dest, src1, src2, |s1, s2| match s2 {
            0 => s1,
            _ => (s1 as i32).wrapping_rem(s2 as i32) as u32,
        })
    }

    pub fn remu(&mut self, dest: Specifier, src1: Specifier, src2: Specifier) -> ExecutionResult {
        self.reg_reg_op(dest, src1, src2, |s1, s2| s1.checked_rem(s2).unwrap_or(s1))
    }

    /// Executes a `jal` instruction.
    ///
    /// > The offset is sign-extended and added to the address of the jump instruction to form the
    /// > jump target address. [...] JAL stores the address of the instruction following the jump
    /// > ('pc'+4) into register rd.
    pub fn jal(&mut self, dest: Specifier, offset: i32) -> ExecutionResult {
        let target = self.pc.wrapping_add_signed(offset);
        self.jump_op(dest, target)
    }

    /// Executes a `jalr` instruction.
    ///
    /// > The target address is obtained by adding the sign-extended 12-bit I-immediate to the
    /// > register rs1, then setting the least-significant bit of the result to zero.
    pub fn jalr(&mut self, dest: Specifier, base: Specifier, offset: i32) -> ExecutionResult {
        let target = self.core.registers.x(base).wrapping_add_signed(offset) & !1;
        self.jump_op(dest, target)
    }

    pub fn beq(&mut self, src1: Specifier, src2: Specifier, offset: i32) -> ExecutionResult {
        self.cond_branch(src1, src2, offset, |s1, s2| s1 == s2)
    }

    pub fn bne(&mut self, src1: Specifier, src2: Specifier, offset: i32) -> ExecutionResult {
        self.cond_branch(src1, src2, offset, |s1, s2| s1 != s2)
    }

    pub fn blt(&mut self, src1: Specifier, src2: Specifier, offset: i32) -> ExecutionResult {
        self.cond_branch(src1, src2, offset, less_signed)
    }

    pub fn bltu(&mut self, src1: Specifier, src2: Specifier, offset: i32) -> ExecutionResult {
        self.cond_branch(src1, src2, offset, less_unsigned)
    }

    pub fn bge(&mut self, src1: Specifier, src2: Specifier, offset: i32) -> ExecutionResult {
        self.cond_branch(src1, src2, offset, |s1, s2| !less_signed(s1, s2))
    }

    pub fn bgeu(&mut self, src1: Specifier, src2: Specifier, offset: i32) -> ExecutionResult {
        self.cond_branch(src1, src2, offset, |s1, s2| !less_unsigned(s1, s2))
    }

    pub fn lb(&mut self, dest: Specifier, base: Specifier, offset: i32) -> ExecutionResult {
        self.load_op(dest, base, offset, |core, address| {
            core.read_byte(address).map(|value| value as i8 as u32)
        })
    }

    pub fn lbu(&mut self, dest: Specifier, base: Specifier, offset: i32) -> ExecutionResult {
        self.load_op(dest, base, offset, |core, address| {
            core.read_byte(address).map(u32::from)
        })
    }

    pub fn lh(&mut self, dest: Specifier, base: Specifier, offset: i32) -> ExecutionResult {
        self.load_op(dest, base, offset, |core, address| {
            core.read_halfword(address).map(|value| value as i16 as u32)
        })
    }

    pub fn lhu(&mut self, dest: Specifier, base: Specifier, offset: i32) -> ExecutionResult {
        self.load_op(dest, base, offset, |core, address| {
            core.read_halfword(address).map(u32::from)
        })
    }

    pub fn lw(&mut self, dest: Specifier, base: Specifier, offset: i32) -> ExecutionResult {
        self.load_op(dest, base, offset, |core, address| core.read_word(address))
    }

    pub fn sb(&mut self, src: Specifier, base: Specifier, offset: i32) -> ExecutionResult {
        self.store_op(src, base, offset, |core, address, value| {
            core.write_byte(address, value as u8)
        })
    }

    pub fn sh(&mut self, src: Specifier, base: Specifier, offset: i32) -> ExecutionResult {
        self.store_op(src, base, offset, |core, address, value| {
            core.write_halfword(address, value as u16)
        })
    }

    pub fn sw(&mut self, src: Specifier, base: Specifier, offset: i32) -> ExecutionResult {
        self.store_op(src, base, offset, |core, address, value| {
            core.write_word(address, value)
        })
    }

    /// Executes a `lr.w` instruction.
    ///
    /// > LR.W loads a word from the address in rs1, places the sign-extended value in rd, and
    /// > registers a reservation set—a set of bytes that subsumes the bytes in the addressed word.
    pub fn lr(&mut self, dest: Specifier, address: Specifier) -> ExecutionResult {
        let address = self.core.registers.x(address);
        match self.core.read_word(address) {
            Ok(value) => {
                self.core.registers.set_x(dest, value);
                self.core.reservation = Some(address);
                ExecutionResult::Ok
            }
            Err(err) => memory_exception(err, Access::Read, address),
        }
    }

    /// Executes a `sc.w` instruction.
    ///
    /// > SC.W conditionally writes a word in rs2 to the address in rs1: the SC.W succeeds only if
    /// > the reservation is still valid and the reservation set contains the bytes being written.
    /// > If the SC.W succeeds, the instruction writes the word in rs2 to memory, and it writes
    /// > zero to rd. If the SC.W fails, the instruction does not write to memory, and it writes a
    /// > nonzero value to rd. Regardless of success or failure, executing an SC.W instruction
    /// > invalidates any reservation held by this hart.
    pub fn sc(&mut self, dest: Specifier, address: Specifier, src: Specifier) -> ExecutionResult {
        let address = self.core.registers.x(address);
        let value = self.core.registers.x(src);
        let reservation = self.core.reservation.take();
        if !Alignment::WORD.is_aligned(address) {
            return ExecutionResult::Exception {
                exception: Exception::StoreOrAmoAddressMisaligned,
                tval: address,
            };
        }
        if reservation != Some(address) {
            self.core.registers.set_x(dest, 1);
            return ExecutionResult::Ok;
        }
        match self.core.write_word(address, value) {
            Ok(()) => {
                self.core.registers.set_x(dest, 0);
                ExecutionResult::Ok
            }
            Err(err) => memory_exception(err, Access::Write, address),
        }
    }

    /// Executes an AMO instruction (`amoswap.w`, `amoadd.w`, ...).
    ///
    /// > AMOs atomically load a data value from the address in rs1, place the value into register
    /// > rd, apply a binary operator to the loaded value and the original value in rs2, then store
    /// > the result back to the original address in rs1.
    pub fn amo(
        &mut self,
        op: AmoOp,
        dest: Specifier,
        address: Specifier,
        src: Specifier,
    ) -> ExecutionResult {
        let address = self.core.registers.x(address);
        let operand = self.core.registers.x(src);
        let loaded = match self.core.read_word(address) {
            Ok(value) => value,
            Err(err) => return memory_exception(err, Access::Read, address),
        };
        let result = match op {
            AmoOp::Swap => operand,
            AmoOp::Add => loaded.wrapping_add(operand),
            AmoOp::Xor => loaded ^ operand,
            AmoOp::And => loaded & operand,
            AmoOp::Or => loaded | operand,
            AmoOp::Min if less_signed(loaded, operand) => loaded,
            AmoOp::Max if !less_signed(loaded, operand) => loaded,
            AmoOp::Minu if less_unsigned(loaded, operand) => loaded,
            AmoOp::Maxu if !less_unsigned(loaded, operand) => loaded,
            AmoOp::Min | AmoOp::Max | AmoOp::Minu | AmoOp::Maxu => operand,
        };
        if let Err(err) = self.core.write_word(address, result) {
            return memory_exception(err, Access::Write, address);
        }
        self.core.registers.set_x(dest, loaded);
        ExecutionResult::Ok
    }

    /// Executes one of the six Zicsr instructions.
    ///
    /// > If rd=x0, then the instruction shall not read the CSR and shall not cause any of the side
    /// > effects that might occur on a CSR read.
    ///
    /// > For both CSRRS and CSRRC, if rs1=x0, then the instruction will not write to the CSR at
    /// > all, and so shall not cause any of the side effects that might otherwise occur on a CSR
    /// > write, nor raise illegal-instruction exceptions on accesses to read-only CSRs.
    pub fn csr(
        &mut self,
        op: CsrOp,
        dest: Specifier,
        source: CsrSource,
        csr: CsrSpecifier,
    ) -> ExecutionResult {
        let operand = match source {
            CsrSource::Register(src) => self.core.registers.x(src),
            CsrSource::Immediate(immediate) => immediate,
        };
        let (read, write) = match op {
            CsrOp::ReadWrite => (dest != Specifier::X0, true),
            CsrOp::ReadSet | CsrOp::ReadClear => (true, !source.is_zero_field()),
        };

        let old_value = if read {
            match self.core.read_csr(csr) {
                Ok(value) => value,
                Err(err) => {
                    trace!("csr read failed: {}", err);
                    return self.illegal_instruction();
                }
            }
        } else {
            0
        };
        if write {
            let new_value = match op {
                CsrOp::ReadWrite => operand,
                CsrOp::ReadSet => old_value | operand,
                CsrOp::ReadClear => old_value & !operand,
            };
            if let Err(err) = self.core.write_csr(csr, new_value) {
                trace!("csr write failed: {}", err);
                return self.illegal_instruction();
            }
        }
        self.core.registers.set_x(dest, old_value);
        ExecutionResult::Ok
    }

    /// Executes a `fence` instruction.
    ///
    /// There is a single hart and no caches, so memory is always observed in program order.
    pub fn fence(&mut self) -> ExecutionResult {
        ExecutionResult::Ok
    }

    /// Executes a `fence.i` instruction.
    ///
    /// Every fetch goes through the bus, so there is no instruction cache to synchronize.
    pub fn fence_i(&mut self) -> ExecutionResult {
        ExecutionResult::Ok
    }

    /// Executes an `ecall` instruction.
    ///
    /// The exception raised depends on the privilege level the call is made from.
    pub fn ecall(&mut self) -> ExecutionResult {
        let exception = match self.core.privilege {
            PrivilegeLevel::User => Exception::EnvironmentCallFromUMode,
            PrivilegeLevel::Supervisor => Exception::EnvironmentCallFromSMode,
            PrivilegeLevel::Machine => Exception::EnvironmentCallFromMMode,
        };
        ExecutionResult::Exception { exception, tval: 0 }
    }

    pub fn ebreak(&mut self) -> ExecutionResult {
        ExecutionResult::Exception {
            exception: Exception::Breakpoint,
            tval: self.pc,
        }
    }

    /// Executes an `mret` instruction. Illegal below M-mode.
    pub fn mret(&mut self) -> ExecutionResult {
        if self.core.privilege < PrivilegeLevel::Machine {
            return self.illegal_instruction();
        }
        self.next_pc = self.core.return_from_trap(PrivilegeLevel::Machine);
        ExecutionResult::Ok
    }

    /// Executes an `sret` instruction.
    ///
    /// > When TSR=1, attempts to execute SRET while executing in S-mode will raise an
    /// > illegal-instruction exception.
    pub fn sret(&mut self) -> ExecutionResult {
        let privilege = self.core.privilege;
        if privilege == PrivilegeLevel::User
            || (privilege == PrivilegeLevel::Supervisor && self.core.csrs.status.tsr())
        {
            return self.illegal_instruction();
        }
        self.next_pc = self.core.return_from_trap(PrivilegeLevel::Supervisor);
        ExecutionResult::Ok
    }

    /// Executes a `wfi` instruction.
    ///
    /// > When TW=1, then if WFI is executed in any less-privileged mode, and it does not complete
    /// > within an implementation-specific, bounded time limit, the WFI instruction causes an
    /// > illegal-instruction exception.
    ///
    /// The time limit is zero. Otherwise the hart doesn't stall here: the caller commits the
    /// instruction and reports the hart as idle unless an interrupt is taken.
    pub fn wfi(&mut self) -> ExecutionResult {
        if self.core.privilege < PrivilegeLevel::Machine && self.core.csrs.status.tw() {
            return self.illegal_instruction();
        }
        ExecutionResult::Wait
    }

    /// Executes an `sfence.vma` instruction, invalidating every cached translation regardless of
    /// the address and ASID operands.
    ///
    /// > When TVM=1, attempts to [...] execute an SFENCE.VMA or SINVAL.VMA instruction while
    /// > executing in S-mode will raise an illegal-instruction exception.
    pub fn sfence_vma(&mut self) -> ExecutionResult {
        let privilege = self.core.privilege;
        if privilege == PrivilegeLevel::User
            || (privilege == PrivilegeLevel::Supervisor && self.core.csrs.status.tvm())
        {
            return self.illegal_instruction();
        }
        self.core.mmu.flush_all();
        ExecutionResult::Ok
    }

    pub fn illegal_instruction(&self) -> ExecutionResult {
        ExecutionResult::Exception {
            exception: Exception::IllegalInstruction,
            tval: self.raw_instruction,
        }
    }

    #[inline]
    fn reg_imm_op<F>(
        &mut self,
        dest: Specifier,
        src: Specifier,
        immediate: i32,
        op: F,
    ) -> ExecutionResult
    where
        F: FnOnce(u32, i32) -> u32,
    {
        let registers = &mut self.core.registers;
        registers.set_x(dest, op(registers.x(src), immediate));
        ExecutionResult::Ok
    }

    #[inline]
    fn reg_reg_op<F>(
        &mut self,
        dest: Specifier,
        src1: Specifier,
        src2: Specifier,
        op: F,
    ) -> ExecutionResult
    where
        F: FnOnce(u32, u32) -> u32,
    {
        let registers = &mut self.core.registers;
        registers.set_x(dest, op(registers.x(src1), registers.x(src2)));
        ExecutionResult::Ok
    }

    // With the C extension every target is 2-byte aligned: jal and branch offsets are even and
    // jalr clears bit 0, so no misaligned-target exception can arise.
    fn jump_op(&mut self, dest: Specifier, target: u32) -> ExecutionResult {
        let return_address = std::mem::replace(&mut self.next_pc, target);
        self.core.registers.set_x(dest, return_address);
        ExecutionResult::Ok
    }

    // Takes the branch if `predicate` returns `true`.
    fn cond_branch<P>(
        &mut self,
        src1: Specifier,
        src2: Specifier,
        offset: i32,
        predicate: P,
    ) -> ExecutionResult
    where
        P: FnOnce(u32, u32) -> bool,
    {
        let registers = &self.core.registers;
        if predicate(registers.x(src1), registers.x(src2)) {
            self.next_pc = self.pc.wrapping_add_signed(offset);
        }
        ExecutionResult::Ok
    }

    #[inline]
    fn load_op<F>(&mut self, dest: Specifier, base: Specifier, offset: i32, op: F) -> ExecutionResult
    where
        F: FnOnce(&mut Core<B>, u32) -> Result<u32, MemoryError>,
    {
        let address = self.core.registers.x(base).wrapping_add_signed(offset);
        match op(&mut *self.core, address) {
            Ok(value) => {
                self.core.registers.set_x(dest, value);
                ExecutionResult::Ok
            }
            Err(err) => memory_exception(err, Access::Read, address),
        }
    }

    #[inline]
    fn store_op<F>(&mut self, src: Specifier, base: Specifier, offset: i32, op: F) -> ExecutionResult
    where
        F: FnOnce(&mut Core<B>, u32, u32) -> Result<(), MemoryError>,
    {
        let registers = &self.core.registers;
        let value = registers.x(src);
        let address = registers.x(base).wrapping_add_signed(offset);
        match op(&mut *self.core, address, value) {
            Ok(()) => ExecutionResult::Ok,
            Err(err) => memory_exception(err, Access::Write, address),
        }
    }
}

fn memory_exception(err: MemoryError, access: Access, address: u32) -> ExecutionResult {
    ExecutionResult::Exception {
        exception: err.exception(access),
        tval: address,
    }
}
