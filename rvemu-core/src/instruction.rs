use crate::core::csr::CsrSpecifier;
use crate::registers::Specifier;
use thiserror::Error;

/// Data structure that can hold any supported instruction in its decoded form.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Instruction {
    OpImm {
        op: RegImmOp,
        dest: Specifier,
        src: Specifier,
        immediate: i32,
    },
    OpShiftImm {
        op: RegShiftImmOp,
        dest: Specifier,
        src: Specifier,
        shift_amount_u5: u32,
    },
    Auipc {
        dest: Specifier,
        immediate: i32,
    },
    Lui {
        dest: Specifier,
        immediate: i32,
    },
    Op {
        op: RegRegOp,
        dest: Specifier,
        src1: Specifier,
        src2: Specifier,
    },
    MulDiv {
        op: MulDivOp,
        dest: Specifier,
        src1: Specifier,
        src2: Specifier,
    },
    Jal {
        dest: Specifier,
        offset: i32,
    },
    Jalr {
        dest: Specifier,
        base: Specifier,
        offset: i32,
    },
    Branch {
        condition: BranchCondition,
        src1: Specifier,
        src2: Specifier,
        offset: i32,
    },
    Load {
        width: LoadWidth,
        dest: Specifier,
        base: Specifier,
        offset: i32,
    },
    Store {
        width: StoreWidth,
        src: Specifier,
        base: Specifier,
        offset: i32,
    },
    LoadReserved {
        dest: Specifier,
        address: Specifier,
    },
    StoreConditional {
        dest: Specifier,
        address: Specifier,
        src: Specifier,
    },
    Amo {
        op: AmoOp,
        dest: Specifier,
        address: Specifier,
        src: Specifier,
    },
    Csr {
        op: CsrOp,
        dest: Specifier,
        source: CsrSource,
        csr: CsrSpecifier,
    },
    Fence,
    FenceI,
    Ecall,
    Ebreak,
    Sret,
    Mret,
    Wfi,
    SfenceVma {
        vaddr: Specifier,
        asid: Specifier,
    },
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum RegImmOp {
    Addi,
    Slti,
    Sltiu,
    Xori,
    Ori,
    Andi,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum RegShiftImmOp {
    Slli,
    Srli,
    Srai,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum RegRegOp {
    Add,
    Slt,
    Sltu,
    And,
    Or,
    Xor,
    Sll,
    Srl,
    Sub,
    Sra,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum MulDivOp {
    Mul,
    Mulh,
    Mulhsu,
    Mulhu,
    Div,
    Divu,
    Rem,
    Remu,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum BranchCondition {
    Beq,
    Bne,
    Blt,
    Bltu,
    Bge,
    Bgeu,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum LoadWidth {
    Lb,
    Lh,
    Lw,
    Lbu,
    Lhu,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum StoreWidth {
    Sb,
    Sh,
    Sw,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum AmoOp {
    Swap,
    Add,
    Xor,
    And,
    Or,
    Min,
    Max,
    Minu,
    Maxu,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum CsrOp {
    /// Atomic read/write (`csrrw`, `csrrwi`).
    ReadWrite,
    /// Atomic read and set bits (`csrrs`, `csrrsi`).
    ReadSet,
    /// Atomic read and clear bits (`csrrc`, `csrrci`).
    ReadClear,
}

/// Operand of a CSR instruction: a register, or the 5-bit zero-extended immediate of the `*i`
/// variants.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum CsrSource {
    Register(Specifier),
    Immediate(u32),
}

impl CsrSource {
    /// Returns `true` if the `rs1`/`uimm` field is zero, in which case set/clear variants don't
    /// write the CSR.
    pub fn is_zero_field(self) -> bool {
        match self {
            Self::Register(specifier) => specifier == Specifier::X0,
            Self::Immediate(immediate) => immediate == 0,
        }
    }
}

impl Instruction {
    pub fn decode(raw_instruction: u32) -> Result<Self, DecodeError> {
        let illegal = DecodeError::IllegalInstruction;
        match opcode(raw_instruction).ok_or(DecodeError::UnsupportedOpcode)? {
            Opcode::OpImm => match i_funct(raw_instruction) {
                Some(op) => Ok(Self::OpImm {
                    op,
                    dest: rd(raw_instruction),
                    src: rs1(raw_instruction),
                    immediate: i_imm(raw_instruction),
                }),
                None => i_shfunct(raw_instruction)
                    .map(|op| Self::OpShiftImm {
                        op,
                        dest: rd(raw_instruction),
                        src: rs1(raw_instruction),
                        shift_amount_u5: shamt(raw_instruction),
                    })
                    .ok_or(illegal),
            },
            Opcode::Auipc => Ok(Self::Auipc {
                dest: rd(raw_instruction),
                immediate: u_imm(raw_instruction),
            }),
            Opcode::Lui => Ok(Self::Lui {
                dest: rd(raw_instruction),
                immediate: u_imm(raw_instruction),
            }),
            Opcode::Op => {
                let (dest, src1, src2) = (
                    rd(raw_instruction),
                    rs1(raw_instruction),
                    rs2(raw_instruction),
                );
                if let Some(op) = r_funct(raw_instruction) {
                    Ok(Self::Op {
                        op,
                        dest,
                        src1,
                        src2,
                    })
                } else if let Some(op) = m_funct(raw_instruction) {
                    Ok(Self::MulDiv {
                        op,
                        dest,
                        src1,
                        src2,
                    })
                } else {
                    Err(illegal)
                }
            }
            Opcode::Jal => Ok(Self::Jal {
                dest: rd(raw_instruction),
                offset: j_imm(raw_instruction),
            }),
            Opcode::Jalr => match funct3(raw_instruction) {
                0b000 => Ok(Self::Jalr {
                    dest: rd(raw_instruction),
                    base: rs1(raw_instruction),
                    offset: i_imm(raw_instruction),
                }),
                _ => Err(illegal),
            },
            Opcode::Branch => b_funct(raw_instruction)
                .map(|condition| Self::Branch {
                    condition,
                    src1: rs1(raw_instruction),
                    src2: rs2(raw_instruction),
                    offset: b_imm(raw_instruction),
                })
                .ok_or(illegal),
            Opcode::Load => i_width(raw_instruction)
                .map(|width| Self::Load {
                    width,
                    dest: rd(raw_instruction),
                    base: rs1(raw_instruction),
                    offset: i_imm(raw_instruction),
                })
                .ok_or(illegal),
            Opcode::Store => s_width(raw_instruction)
                .map(|width| Self::Store {
                    width,
                    src: rs2(raw_instruction),
                    base: rs1(raw_instruction),
                    offset: s_imm(raw_instruction),
                })
                .ok_or(illegal),
            Opcode::Amo => decode_amo(raw_instruction),
            Opcode::MiscMem => match funct3(raw_instruction) {
                // Only the normal (0b0000) and TSO (0b1000) fence modes exist. Since a single hart
                // observes its own accesses in order, both are no-ops.
                0b000 if matches!(raw_instruction >> 28, 0b0000 | 0b1000) => Ok(Self::Fence),
                0b001 => Ok(Self::FenceI),
                _ => Err(illegal),
            },
            Opcode::System => decode_system(raw_instruction),
        }
    }
}

fn decode_amo(raw_instruction: u32) -> Result<Instruction, DecodeError> {
    if funct3(raw_instruction) != 0b010 {
        // Only word-sized atomics exist on RV32.
        return Err(DecodeError::IllegalInstruction);
    }
    let dest = rd(raw_instruction);
    let address = rs1(raw_instruction);
    let src = rs2(raw_instruction);
    let op = match raw_instruction >> 27 {
        0b00010 if src == Specifier::X0 => {
            return Ok(Instruction::LoadReserved { dest, address });
        }
        0b00011 => {
            return Ok(Instruction::StoreConditional { dest, address, src });
        }
        0b00001 => AmoOp::Swap,
        0b00000 => AmoOp::Add,
        0b00100 => AmoOp::Xor,
        0b01100 => AmoOp::And,
        0b01000 => AmoOp::Or,
        0b10000 => AmoOp::Min,
        0b10100 => AmoOp::Max,
        0b11000 => AmoOp::Minu,
        0b11100 => AmoOp::Maxu,
        _ => return Err(DecodeError::IllegalInstruction),
    };
    Ok(Instruction::Amo {
        op,
        dest,
        address,
        src,
    })
}

fn decode_system(raw_instruction: u32) -> Result<Instruction, DecodeError> {
    let csr_op = match funct3(raw_instruction) & 0b011 {
        0b01 => Some(CsrOp::ReadWrite),
        0b10 => Some(CsrOp::ReadSet),
        0b11 => Some(CsrOp::ReadClear),
        _ => None,
    };
    if let Some(op) = csr_op {
        let source = if funct3(raw_instruction) & 0b100 != 0 {
            CsrSource::Immediate((raw_instruction >> 15) & 0x1F)
        } else {
            CsrSource::Register(rs1(raw_instruction))
        };
        return Ok(Instruction::Csr {
            op,
            dest: rd(raw_instruction),
            source,
            csr: (raw_instruction >> 20) as CsrSpecifier,
        });
    }
    if funct3(raw_instruction) != 0 || rd(raw_instruction) != Specifier::X0 {
        return Err(DecodeError::IllegalInstruction);
    }
    let rs1_index = u8::from(rs1(raw_instruction));
    let rs2_index = u8::from(rs2(raw_instruction));
    match (funct7(raw_instruction), rs2_index, rs1_index) {
        (0b000_0000, 0b00000, 0) => Ok(Instruction::Ecall),
        (0b000_0000, 0b00001, 0) => Ok(Instruction::Ebreak),
        (0b000_1000, 0b00010, 0) => Ok(Instruction::Sret),
        (0b001_1000, 0b00010, 0) => Ok(Instruction::Mret),
        (0b000_1000, 0b00101, 0) => Ok(Instruction::Wfi),
        (0b000_1001, _, _) => Ok(Instruction::SfenceVma {
            vaddr: rs1(raw_instruction),
            asid: rs2(raw_instruction),
        }),
        _ => Err(DecodeError::IllegalInstruction),
    }
}

#[derive(Error, Debug, Clone, Eq, PartialEq)]
pub enum DecodeError {
    /// The major opcode belongs to an extension this core doesn't implement (F/D, RV64, custom).
    #[error("instruction has unsupported opcode")]
    UnsupportedOpcode,
    /// The major opcode is known but the remaining fields form no valid instruction.
    #[error("illegal instruction")]
    IllegalInstruction,
}

/// Returns the 7-bit *opcode* value of the instruction, or `None` if it isn't supported.
fn opcode(raw_instruction: u32) -> Option<Opcode> {
    #[allow(clippy::unusual_byte_groupings)]
    match raw_instruction & 0x7F {
        0b00_000_11 => Some(Opcode::Load),
        // LOAD-FP, custom-0
        0b00_011_11 => Some(Opcode::MiscMem),
        0b00_100_11 => Some(Opcode::OpImm),
        0b00_101_11 => Some(Opcode::Auipc),
        // OP-IMM-32 (RV64 only)
        0b01_000_11 => Some(Opcode::Store),
        // STORE-FP, custom-1
        0b01_011_11 => Some(Opcode::Amo),
        0b01_100_11 => Some(Opcode::Op),
        0b01_101_11 => Some(Opcode::Lui),
        // OP-32 (RV64 only), MADD, MSUB, NMSUB, NMADD, OP-FP
        0b11_000_11 => Some(Opcode::Branch),
        0b11_001_11 => Some(Opcode::Jalr),
        0b11_011_11 => Some(Opcode::Jal),
        0b11_100_11 => Some(Opcode::System),
        _ => None,
    }
}

/// Returns the 5-bit *rd* value for R-type, I-type, U-type, J-type instructions.
fn rd(raw_instruction: u32) -> Specifier {
    Specifier::from_u5(raw_instruction >> 7)
}

/// Returns the 5-bit *rs1* value for R-type, I-type, S-type, B-type instructions.
fn rs1(raw_instruction: u32) -> Specifier {
    Specifier::from_u5(raw_instruction >> 15)
}

/// Returns the 5-bit *rs2* value for R-type, S-type, B-type instructions.
fn rs2(raw_instruction: u32) -> Specifier {
    Specifier::from_u5(raw_instruction >> 20)
}

fn i_funct(raw_instruction: u32) -> Option<RegImmOp> {
    match funct3(raw_instruction) {
        0b000 => Some(RegImmOp::Addi),
        0b010 => Some(RegImmOp::Slti),
        0b011 => Some(RegImmOp::Sltiu),
        0b100 => Some(RegImmOp::Xori),
        0b110 => Some(RegImmOp::Ori),
        0b111 => Some(RegImmOp::Andi),
        _ => None,
    }
}

// The shift amount of an immediate shift is only 5 bits on RV32; all other bits of imm[11:5]
// except bit 30 must be zero.
fn i_shfunct(raw_instruction: u32) -> Option<RegShiftImmOp> {
    match (funct7(raw_instruction), funct3(raw_instruction)) {
        (0b000_0000, 0b001) => Some(RegShiftImmOp::Slli),
        (0b000_0000, 0b101) => Some(RegShiftImmOp::Srli),
        (0b010_0000, 0b101) => Some(RegShiftImmOp::Srai),
        _ => None,
    }
}

fn i_width(raw_instruction: u32) -> Option<LoadWidth> {
    match funct3(raw_instruction) {
        0b000 => Some(LoadWidth::Lb),
        0b001 => Some(LoadWidth::Lh),
        0b010 => Some(LoadWidth::Lw),
        0b100 => Some(LoadWidth::Lbu),
        0b101 => Some(LoadWidth::Lhu),
        // ld (0b011) and lwu (0b110) are RV64 only
        _ => None,
    }
}

fn s_width(raw_instruction: u32) -> Option<StoreWidth> {
    match funct3(raw_instruction) {
        0b000 => Some(StoreWidth::Sb),
        0b001 => Some(StoreWidth::Sh),
        0b010 => Some(StoreWidth::Sw),
        _ => None,
    }
}

fn r_funct(raw_instruction: u32) -> Option<RegRegOp> {
    match (funct7(raw_instruction), funct3(raw_instruction)) {
        (0b000_0000, 0b000) => Some(RegRegOp::Add),
        (0b000_0000, 0b001) => Some(RegRegOp::Sll),
        (0b000_0000, 0b010) => Some(RegRegOp::Slt),
        (0b000_0000, 0b011) => Some(RegRegOp::Sltu),
        (0b000_0000, 0b100) => Some(RegRegOp::Xor),
        (0b000_0000, 0b101) => Some(RegRegOp::Srl),
        (0b000_0000, 0b110) => Some(RegRegOp::Or),
        (0b000_0000, 0b111) => Some(RegRegOp::And),
        (0b010_0000, 0b000) => Some(RegRegOp::Sub),
        (0b010_0000, 0b101) => Some(RegRegOp::Sra),
        _ => None,
    }
}

fn m_funct(raw_instruction: u32) -> Option<MulDivOp> {
    if funct7(raw_instruction) != 0b000_0001 {
        return None;
    }
    Some(match funct3(raw_instruction) {
        0b000 => MulDivOp::Mul,
        0b001 => MulDivOp::Mulh,
        0b010 => MulDivOp::Mulhsu,
        0b011 => MulDivOp::Mulhu,
        0b100 => MulDivOp::Div,
        0b101 => MulDivOp::Divu,
        0b110 => MulDivOp::Rem,
        _ => MulDivOp::Remu,
    })
}

fn b_funct(raw_instruction: u32) -> Option<BranchCondition> {
    match funct3(raw_instruction) {
        0b000 => Some(BranchCondition::Beq),
        0b001 => Some(BranchCondition::Bne),
        0b100 => Some(BranchCondition::Blt),
        0b101 => Some(BranchCondition::Bge),
        0b110 => Some(BranchCondition::Bltu),
        0b111 => Some(BranchCondition::Bgeu),
        _ => None,
    }
}

/// Returns the 3-bit *funct3* value for R-type, I-type, S-type, B-type instructions.
fn funct3(raw_instruction: u32) -> u8 {
    ((raw_instruction >> 12) & 0b111) as u8
}

/// Returns the 7-bit *funct7* value for R-type instructions.
fn funct7(raw_instruction: u32) -> u8 {
    (raw_instruction >> 25) as u8
}

/// Returns the 5-bit *shamt* value for I-type shift instructions.
fn shamt(raw_instruction: u32) -> u32 {
    (raw_instruction >> 20) & 0x1F
}

/// Returns the 12-bit I-immediate sign-extended to 32 bits.
fn i_imm(raw_instruction: u32) -> i32 {
    raw_instruction as i32 >> 20
}

/// Returns the 12-bit S-immediate sign-extended to 32 bits.
fn s_imm(raw_instruction: u32) -> i32 {
    let imm_11_5 = raw_instruction & 0xFE00_0000;
    let imm_4_0 = raw_instruction & 0x0000_0F80;
    (imm_11_5 | (imm_4_0 << 13)) as i32 >> 20
}

/// Returns the 13-bit B-immediate sign-extended to 32 bits.
fn b_imm(raw_instruction: u32) -> i32 {
    let imm_12 = raw_instruction & 0x8000_0000;
    let imm_10_5 = raw_instruction & 0x7E00_0000;
    let imm_4_1 = raw_instruction & 0x0000_0F00;
    let imm_11 = raw_instruction & 0x0000_0080;
    (imm_12 | (imm_11 << 23) | (imm_10_5 >> 1) | (imm_4_1 << 12)) as i32 >> 19
}

/// Returns the U-immediate, i.e. the top 20 bits with the low 12 bits cleared.
fn u_imm(raw_instruction: u32) -> i32 {
    (raw_instruction & 0xFFFF_F000) as i32
}

/// Returns the 21-bit J-immediate sign-extended to 32 bits.
fn j_imm(raw_instruction: u32) -> i32 {
    let imm_20 = raw_instruction & 0x8000_0000;
    let imm_10_1 = raw_instruction & 0x7FE0_0000;
    let imm_11 = raw_instruction & 0x0010_0000;
    let imm_19_12 = raw_instruction & 0x000F_F000;
    (imm_20 | (imm_19_12 << 11) | (imm_11 << 2) | (imm_10_1 >> 9)) as i32 >> 11
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
enum Opcode {
    OpImm,
    Auipc,
    Lui,
    Op,
    Jal,
    Jalr,
    Branch,
    Load,
    Store,
    Amo,
    MiscMem,
    System,
}
