//! Bit-field extraction/assembly and the narrow-width arithmetic building blocks.
//!
//! All helpers are pure functions over fixed bit offsets. The multiply is assembled from 16-bit
//! halves and the comparisons from a subtraction's sign, overflow and borrow, so no result relies
//! on a wider native integer.

/// Returns a mask with the low `width` bits set.
pub const fn mask(width: u32) -> u32 {
    if width >= 32 {
        u32::MAX
    } else {
        (1 << width) - 1
    }
}

/// Returns bits `hi..=lo` of `value`, shifted down to bit 0.
pub const fn field(value: u32, hi: u32, lo: u32) -> u32 {
    (value >> lo) & mask(hi - lo + 1)
}

/// Returns bit `index` of `value` as `0` or `1`.
pub const fn bit(value: u32, index: u32) -> u32 {
    (value >> index) & 1
}

/// Returns `true` if bit `index` of `value` is set.
pub const fn is_set(value: u32, index: u32) -> bool {
    bit(value, index) == 1
}

/// Takes bits `hi..=lo` of `value` and moves them so that bit `lo` lands on bit `to`.
pub const fn place(value: u32, hi: u32, lo: u32, to: u32) -> u32 {
    field(value, hi, lo) << to
}

/// Sign-extends `value` using bit `sign_bit` as the sign.
pub const fn sign_extend(value: u32, sign_bit: u32) -> u32 {
    let shift = 31 - sign_bit;
    (((value << shift) as i32) >> shift) as u32
}

/// Returns `value` with the bits selected by `mask` replaced by those of `update`.
pub const fn merge(value: u32, update: u32, mask: u32) -> u32 {
    (value & !mask) | (update & mask)
}

/// Flags of the subtraction `a - b`.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct Difference {
    pub zero: bool,
    pub sign: bool,
    pub overflow: bool,
    pub borrow: bool,
}

impl Difference {
    pub fn of(a: u32, b: u32) -> Self {
        let diff = a.wrapping_sub(b);
        Self {
            zero: diff == 0,
            sign: is_set(diff, 31),
            overflow: is_set((a ^ b) & (a ^ diff), 31),
            borrow: is_set((!a & b) | (!(a ^ b) & diff), 31),
        }
    }

    /// `a < b` with both operands as two's complement.
    pub fn less_signed(self) -> bool {
        self.sign != self.overflow
    }

    /// `a < b` with both operands unsigned.
    pub fn less_unsigned(self) -> bool {
        self.borrow
    }
}

/// `a < b`, signed.
pub fn less_signed(a: u32, b: u32) -> bool {
    Difference::of(a, b).less_signed()
}

/// `a < b`, unsigned.
pub fn less_unsigned(a: u32, b: u32) -> bool {
    Difference::of(a, b).less_unsigned()
}

const fn lo16(word: u32) -> u32 {
    word & 0xFFFF
}

const fn hi16(word: u32) -> u32 {
    word >> 16
}

// 16-bit add with carry in/out. `carry_in` must be `0` or `1`.
fn add16(a: u32, b: u32, carry_in: u32) -> (u32, u32) {
    let sum = a + b + carry_in;
    (lo16(sum), hi16(sum))
}

// 16 x 16 -> 32 bit multiply, split into (low, high) halves.
fn mul16(a: u32, b: u32) -> (u32, u32) {
    let product = a * b;
    (lo16(product), hi16(product))
}

/// Unsigned 32 x 32 -> 64 bit multiply, returning `(low, high)` words.
///
/// Built from the four 16 x 16 partial products with the carries propagated by hand.
pub fn mul_wide(a: u32, b: u32) -> (u32, u32) {
    let (al, ah, bl, bh) = (lo16(a), hi16(a), lo16(b), hi16(b));
    let (ql, qh) = mul16(al, bl);
    let (rl, rh) = mul16(al, bh);
    let (sl, sh) = mul16(ah, bl);
    let (tl, th) = mul16(ah, bh);

    let (m, m_carry) = add16(rl, sl, 0);
    let (n, n_carry) = add16(rh, sh, m_carry);
    let (y, y_carry) = add16(m, qh, 0);
    let (z, z_carry) = add16(n, tl, y_carry);
    let (w, _) = add16(th, n_carry, z_carry);

    (ql | (y << 16), z | (w << 16))
}

// Two's complement negation of a 64-bit (low, high) pair.
fn negate_wide((lo, hi): (u32, u32)) -> (u32, u32) {
    let lo = (!lo).wrapping_add(1);
    let hi = (!hi).wrapping_add((lo == 0) as u32);
    (lo, hi)
}

fn magnitude(value: u32) -> (u32, bool) {
    let negative = is_set(value, 31);
    (if negative { value.wrapping_neg() } else { value }, negative)
}

/// Signed 32 x 32 -> 64 bit multiply, returning `(low, high)` words.
pub fn mul_wide_signed(a: u32, b: u32) -> (u32, u32) {
    let (a, a_negative) = magnitude(a);
    let (b, b_negative) = magnitude(b);
    let product = mul_wide(a, b);
    if a_negative != b_negative {
        negate_wide(product)
    } else {
        product
    }
}

/// Signed `a` times unsigned `b`, 32 x 32 -> 64 bits, returning `(low, high)` words.
pub fn mul_wide_signed_unsigned(a: u32, b: u32) -> (u32, u32) {
    let (a, a_negative) = magnitude(a);
    let product = mul_wide(a, b);
    if a_negative {
        negate_wide(product)
    } else {
        product
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EDGES: [u32; 8] = [
        0,
        1,
        2,
        0x7FFF_FFFF,
        0x8000_0000,
        0x8000_0001,
        0xFFFF_FFFE,
        0xFFFF_FFFF,
    ];

    // xorshift32, enough for spreading samples over the input space.
    fn samples() -> impl Iterator<Item = u32> {
        let mut state = 0x1234_5678_u32;
        std::iter::repeat_with(move || {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            state
        })
        .take(2000)
    }

    fn operand_pairs() -> Vec<(u32, u32)> {
        let mut pairs = Vec::new();
        for a in EDGES {
            for b in EDGES {
                pairs.push((a, b));
            }
        }
        let randoms: Vec<u32> = samples().collect();
        for chunk in randoms.chunks(2) {
            pairs.push((chunk[0], chunk[1]));
        }
        pairs
    }

    fn split(value: u64) -> (u32, u32) {
        (value as u32, (value >> 32) as u32)
    }

    #[test]
    fn test_field_helpers() {
        assert_eq!(0b101, field(0b1011_0100, 4, 2));
        assert_eq!(1, bit(0x8000_0000, 31));
        assert_eq!(0x3F << 4, place(0xFFFF_FFFF, 5, 0, 4));
        assert_eq!(0xFFFF_FFE0, sign_extend(0x20, 5));
        assert_eq!(0x1F, sign_extend(0x1F, 5));
        assert_eq!(0x1234_56FF, merge(0x1234_5678, 0xFFFF_FFFF, 0xFF));
        assert_eq!(u32::MAX, mask(32));
    }

    #[test]
    fn test_mul_wide_matches_native() {
        for (a, b) in operand_pairs() {
            assert_eq!(split(a as u64 * b as u64), mul_wide(a, b), "{a:#x} * {b:#x}");
        }
    }

    #[test]
    fn test_mul_wide_signed_matches_native() {
        for (a, b) in operand_pairs() {
            let expected = (a as i32 as i64).wrapping_mul(b as i32 as i64) as u64;
            assert_eq!(split(expected), mul_wide_signed(a, b), "{a:#x} * {b:#x}");
        }
    }

    #[test]
    fn test_mul_wide_signed_unsigned_matches_native() {
        for (a, b) in operand_pairs() {
            let expected = (a as i32 as i64).wrapping_mul(b as i64) as u64;
            assert_eq!(
                split(expected),
                mul_wide_signed_unsigned(a, b),
                "{a:#x} * {b:#x}"
            );
        }
    }

    #[test]
    fn test_comparisons_match_native() {
        for (a, b) in operand_pairs() {
            assert_eq!((a as i32) < (b as i32), less_signed(a, b), "{a:#x} < {b:#x}");
            assert_eq!(a < b, less_unsigned(a, b), "{a:#x} <u {b:#x}");
            assert_eq!(a == b, Difference::of(a, b).zero);
        }
    }
}
