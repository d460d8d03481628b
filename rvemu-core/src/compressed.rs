//! Expansion of 16-bit RVC encodings into their canonical 32-bit form.
//!
//! Only the RV32 integer subset is supported: floating-point loads/stores and the RV64/RV128-only
//! forms decode as illegal, as do the encodings the RVC chapter marks reserved.

use crate::bits::{bit, field, place, sign_extend};

const LOAD: u32 = 0b00_000_11;
const OP_IMM: u32 = 0b00_100_11;
const STORE: u32 = 0b01_000_11;
const OP: u32 = 0b01_100_11;
const LUI: u32 = 0b01_101_11;
const BRANCH: u32 = 0b11_000_11;
const JALR: u32 = 0b11_001_11;
const JAL: u32 = 0b11_011_11;
const SYSTEM: u32 = 0b11_100_11;

/// Returns `true` if the low bits of `parcel` mark a 16-bit (compressed) encoding.
pub fn is_compressed(parcel: u32) -> bool {
    parcel & 0b11 != 0b11
}

/// Expands a compressed instruction into the equivalent 32-bit instruction.
///
/// Returns `None` for illegal or reserved encodings, including the all-zero parcel.
pub fn decompress(parcel: u16) -> Option<u32> {
    let c = parcel as u32;
    let funct3 = field(c, 15, 13);
    match (field(c, 1, 0), funct3) {
        (0b00, 0b000) => {
            // c.addi4spn -> addi rd', x2, nzuimm
            let imm = ciw_imm(c);
            (imm != 0).then(|| i_type(OP_IMM, 0b000, rd_short_low(c), 2, imm))
        }
        (0b00, 0b010) => {
            // c.lw -> lw rd', offset(rs1')
            Some(i_type(LOAD, 0b010, rd_short_low(c), rs_short_high(c), cl_imm(c)))
        }
        (0b00, 0b110) => {
            // c.sw -> sw rs2', offset(rs1')
            Some(s_type(STORE, 0b010, rs_short_high(c), rd_short_low(c), cl_imm(c)))
        }
        (0b01, 0b000) => Some(i_type(OP_IMM, 0b000, rd_full(c), rd_full(c), ci_imm(c))),
        (0b01, 0b001) => Some(j_type(JAL, 1, cj_imm(c))),
        (0b01, 0b010) => Some(i_type(OP_IMM, 0b000, rd_full(c), 0, ci_imm(c))),
        (0b01, 0b011) => match rd_full(c) {
            0 => None,
            2 => {
                // c.addi16sp -> addi x2, x2, nzimm
                let imm = ci_addi16sp_imm(c);
                (imm != 0).then(|| i_type(OP_IMM, 0b000, 2, 2, imm))
            }
            rd => {
                // c.lui -> lui rd, nzimm
                let imm = ci_imm(c);
                (imm != 0).then(|| u_type(LUI, rd, imm))
            }
        },
        (0b01, 0b100) => misc_alu(c),
        (0b01, 0b101) => Some(j_type(JAL, 0, cj_imm(c))),
        (0b01, 0b110) => Some(b_type(BRANCH, 0b000, rs_short_high(c), 0, cb_imm(c))),
        (0b01, 0b111) => Some(b_type(BRANCH, 0b001, rs_short_high(c), 0, cb_imm(c))),
        (0b10, 0b000) => {
            // c.slli -> slli rd, rd, shamt (shamt[5] must be zero on RV32)
            let rd = rd_full(c);
            (bit(c, 12) == 0).then(|| r_type(OP_IMM, 0b001, rd, rd, field(c, 6, 2), 0))
        }
        (0b10, 0b010) => {
            // c.lwsp -> lw rd, offset(x2)
            let rd = rd_full(c);
            (rd != 0).then(|| i_type(LOAD, 0b010, rd, 2, ci_lwsp_imm(c)))
        }
        (0b10, 0b100) => jump_move_add(c),
        (0b10, 0b110) => Some(s_type(STORE, 0b010, 2, field(c, 6, 2), css_imm(c))),
        _ => None,
    }
}

// Quadrant 1, funct3 0b100: c.srli, c.srai, c.andi, c.sub, c.xor, c.or, c.and.
fn misc_alu(c: u32) -> Option<u32> {
    let rd = rs_short_high(c);
    match field(c, 11, 10) {
        0b00 | 0b01 => {
            if bit(c, 12) == 1 {
                return None;
            }
            let funct7 = if field(c, 11, 10) == 0b01 { 0b010_0000 } else { 0 };
            Some(r_type(OP_IMM, 0b101, rd, rd, field(c, 6, 2), funct7))
        }
        0b10 => Some(i_type(OP_IMM, 0b111, rd, rd, ci_imm(c))),
        _ => {
            if bit(c, 12) == 1 {
                // c.subw/c.addw are RV64-only
                return None;
            }
            let rs2 = rd_short_low(c);
            let (funct3, funct7) = match field(c, 6, 5) {
                0b00 => (0b000, 0b010_0000),
                0b01 => (0b100, 0),
                0b10 => (0b110, 0),
                _ => (0b111, 0),
            };
            Some(r_type(OP, funct3, rd, rd, rs2, funct7))
        }
    }
}

// Quadrant 2, funct3 0b100: c.jr, c.mv, c.ebreak, c.jalr, c.add.
fn jump_move_add(c: u32) -> Option<u32> {
    let rd = rd_full(c);
    let rs2 = field(c, 6, 2);
    match (bit(c, 12), rd, rs2) {
        (0, 0, 0) => None,
        (0, rs1, 0) => Some(i_type(JALR, 0b000, 0, rs1, 0)),
        (0, rd, rs2) => Some(r_type(OP, 0b000, rd, 0, rs2, 0)),
        (_, 0, 0) => Some(i_type(SYSTEM, 0b000, 0, 0, 1)),
        (_, rs1, 0) => Some(i_type(JALR, 0b000, 1, rs1, 0)),
        (_, rd, rs2) => Some(r_type(OP, 0b000, rd, rd, rs2, 0)),
    }
}

/// Full 5-bit rd/rs1 field (bits 11:7).
fn rd_full(c: u32) -> u32 {
    field(c, 11, 7)
}

/// 3-bit rd'/rs2' field (bits 4:2), mapped onto `x8..=x15`.
fn rd_short_low(c: u32) -> u32 {
    field(c, 4, 2) + 8
}

/// 3-bit rd'/rs1' field (bits 9:7), mapped onto `x8..=x15`.
fn rs_short_high(c: u32) -> u32 {
    field(c, 9, 7) + 8
}

fn ciw_imm(c: u32) -> u32 {
    place(c, 10, 7, 6) | place(c, 12, 11, 4) | place(c, 6, 6, 2) | place(c, 5, 5, 3)
}

fn cl_imm(c: u32) -> u32 {
    place(c, 5, 5, 6) | place(c, 12, 10, 3) | place(c, 6, 6, 2)
}

fn ci_imm(c: u32) -> u32 {
    sign_extend(place(c, 12, 12, 5), 5) | field(c, 6, 2)
}

fn ci_addi16sp_imm(c: u32) -> u32 {
    sign_extend(place(c, 12, 12, 9), 9)
        | place(c, 4, 3, 7)
        | place(c, 5, 5, 6)
        | place(c, 2, 2, 5)
        | place(c, 6, 6, 4)
}

fn ci_lwsp_imm(c: u32) -> u32 {
    place(c, 3, 2, 6) | place(c, 12, 12, 5) | place(c, 6, 4, 2)
}

fn cj_imm(c: u32) -> u32 {
    sign_extend(place(c, 12, 12, 11), 11)
        | place(c, 11, 11, 4)
        | place(c, 10, 9, 8)
        | place(c, 8, 8, 10)
        | place(c, 7, 7, 6)
        | place(c, 6, 6, 7)
        | place(c, 5, 3, 1)
        | place(c, 2, 2, 5)
}

fn cb_imm(c: u32) -> u32 {
    sign_extend(place(c, 12, 12, 8), 8)
        | place(c, 6, 5, 6)
        | place(c, 2, 2, 5)
        | place(c, 11, 10, 3)
        | place(c, 4, 3, 1)
}

fn css_imm(c: u32) -> u32 {
    place(c, 8, 7, 6) | place(c, 12, 9, 2)
}

fn i_type(opcode: u32, funct3: u32, rd: u32, rs1: u32, imm: u32) -> u32 {
    imm << 20 | rs1 << 15 | funct3 << 12 | rd << 7 | opcode
}

fn s_type(opcode: u32, funct3: u32, rs1: u32, rs2: u32, imm: u32) -> u32 {
    field(imm, 11, 5) << 25 | rs2 << 20 | rs1 << 15 | funct3 << 12 | field(imm, 4, 0) << 7 | opcode
}

fn u_type(opcode: u32, rd: u32, imm: u32) -> u32 {
    imm << 12 | rd << 7 | opcode
}

fn r_type(opcode: u32, funct3: u32, rd: u32, rs1: u32, rs2: u32, funct7: u32) -> u32 {
    funct7 << 25 | rs2 << 20 | rs1 << 15 | funct3 << 12 | rd << 7 | opcode
}

fn j_type(opcode: u32, rd: u32, imm: u32) -> u32 {
    bit(imm, 20) << 31
        | field(imm, 10, 1) << 21
        | bit(imm, 11) << 20
        | field(imm, 19, 12) << 12
        | rd << 7
        | opcode
}

fn b_type(opcode: u32, funct3: u32, rs1: u32, rs2: u32, imm: u32) -> u32 {
    bit(imm, 12) << 31
        | field(imm, 10, 5) << 25
        | rs2 << 20
        | rs1 << 15
        | funct3 << 12
        | field(imm, 4, 1) << 8
        | bit(imm, 11) << 7
        | opcode
}
