//! General purpose registers and the program counter.

use std::fmt;

/// The number of `x` registers (`x0` up to `x31`).
pub const LEN: u8 = 32;

/// The register file of the single hart: `x0..=x31` plus `pc`.
///
/// `x0` is hardwired to zero. There is deliberately no way to borrow an `x` register mutably,
/// so every write goes through [`set_x`](Self::set_x), which drops writes to `x0`.
#[derive(Debug, Clone)]
pub struct Registers {
    x_registers: [u32; LEN as usize],
    pc: u32,
}

impl Default for Registers {
    fn default() -> Self {
        Self::new(0)
    }
}

impl Registers {
    /// Returns all-zero registers with `pc` set to `initial_pc`.
    pub fn new(initial_pc: u32) -> Self {
        Self {
            x_registers: [0; LEN as usize],
            pc: initial_pc,
        }
    }

    pub fn x(&self, specifier: Specifier) -> u32 {
        self.x_registers[usize::from(specifier)]
    }

    /// Sets an `x` register. Writes to `x0` are ignored.
    pub fn set_x(&mut self, specifier: Specifier, value: u32) {
        if specifier != Specifier::X0 {
            self.x_registers[usize::from(specifier)] = value;
        }
    }

    pub fn pc(&self) -> u32 {
        self.pc
    }

    pub fn set_pc(&mut self, pc: u32) {
        self.pc = pc;
    }
}

/// An `x` register index in the range `0..32`.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Specifier(u8);

impl Specifier {
    /// `zero`
    pub const X0: Self = Self(0);
    /// `ra`, the link register used by `c.jal`/`c.jalr`.
    pub const RA: Self = Self(1);
    /// `sp`
    pub const SP: Self = Self(2);
    /// `a0`, carries the hart id at boot.
    pub const A0: Self = Self(10);
    /// `a1`, carries the device tree pointer at boot.
    pub const A1: Self = Self(11);

    /// Returns `None` if `index > 31`.
    pub fn new<U: TryInto<u8>>(index: U) -> Option<Self> {
        let index = index.try_into().ok()?;
        (index < LEN).then_some(Self(index))
    }

    /// Takes the low five bits of `value` as a register index.
    pub fn from_u5(value: u32) -> Self {
        const_assert_eq!(LEN, 32);
        Self((value & 0x1F) as u8)
    }

    pub fn iter_all() -> impl Iterator<Item = Self> {
        (0..LEN).map(Self)
    }
}

impl From<Specifier> for u8 {
    fn from(value: Specifier) -> Self {
        value.0
    }
}

impl From<Specifier> for u32 {
    fn from(value: Specifier) -> Self {
        value.0 as u32
    }
}

impl From<Specifier> for usize {
    fn from(value: Specifier) -> Self {
        value.0 as usize
    }
}

impl fmt::Display for Specifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "x{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_to_zero() {
        let mut registers = Registers::new(0x8000_0000);
        registers.set_x(Specifier::X0, 0xDEAD_BEEF);
        assert_eq!(0, registers.x(Specifier::X0));
        assert_eq!(0x8000_0000, registers.pc());
    }

    #[test]
    fn test_set_x() {
        let mut registers = Registers::default();
        for specifier in Specifier::iter_all() {
            registers.set_x(specifier, u32::from(specifier) + 100);
        }
        assert_eq!(0, registers.x(Specifier::X0));
        for i in 1..LEN {
            assert_eq!(i as u32 + 100, registers.x(Specifier::from_u5(i as u32)));
        }
    }

    #[test]
    fn test_specifier_bounds() {
        assert_eq!(Some(Specifier::A0), Specifier::new(10));
        assert_eq!(None, Specifier::new(32));
        assert_eq!(Specifier::from_u5(0x3F), Specifier::new(31).unwrap());
        assert_eq!("x11", Specifier::A1.to_string());
    }
}
