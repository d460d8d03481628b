//! A 32-bit RISC-V (RV32IMAC + Zicsr) CPU core with an Sv32 MMU.
//!
//! The [`core::Core`] drives everything: it fetches through the [`bus::Bus`] it owns, translates
//! through its TLBs, and routes every fault or interrupt through a single trap controller.

#[macro_use]
extern crate static_assertions;

use std::cmp::Ordering;
use std::fmt;
use thiserror::Error;

pub mod bits;
pub mod board;
pub mod bus;
pub mod compressed;
pub mod core;
pub mod instruction;
pub mod registers;
pub mod resources;

/// A privilege level as encoded in two bits, including the reserved level `2`.
///
/// Fields such as `mstatus.MPP` and the top bits of a CSR specifier hold two bits, so they can name
/// the reserved level. Use [`PrivilegeLevel`] once a value is known to be one of the defined ones.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd)]
pub enum RawPrivilegeLevel {
    User = 0,
    Supervisor = 1,
    /// Reserved in the base ISA (hypervisor level with the H extension).
    Reserved = 2,
    Machine = 3,
}

impl RawPrivilegeLevel {
    /// Converts the low two bits of `value` into a [`RawPrivilegeLevel`].
    pub fn from_u2(value: u32) -> Self {
        match value & 0b11 {
            0 => Self::User,
            1 => Self::Supervisor,
            2 => Self::Reserved,
            _ => Self::Machine,
        }
    }

    pub fn is_reserved(self) -> bool {
        matches!(self, Self::Reserved)
    }
}

impl fmt::Display for RawPrivilegeLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match *self {
            RawPrivilegeLevel::User => "U",
            RawPrivilegeLevel::Supervisor => "S",
            RawPrivilegeLevel::Reserved => "2",
            RawPrivilegeLevel::Machine => "M",
        })
    }
}

/// The three privilege levels this core implements.
///
/// The ordering `User < Supervisor < Machine` is the one used for trap delegation and interrupt
/// eligibility.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd)]
pub enum PrivilegeLevel {
    /// User/application mode (`U`).
    User = 0,
    /// Supervisor mode (`S`), where the guest kernel runs.
    Supervisor = 1,
    /// Machine mode (`M`), entered at reset.
    Machine = 3,
}

impl PrivilegeLevel {
    /// Returns the two-bit encoding of this level, as stored in `xPP` fields.
    pub fn bits(self) -> u32 {
        self as u32
    }
}

impl PartialEq<PrivilegeLevel> for RawPrivilegeLevel {
    fn eq(&self, other: &PrivilegeLevel) -> bool {
        *self as usize == *other as usize
    }
}

impl PartialEq<RawPrivilegeLevel> for PrivilegeLevel {
    fn eq(&self, other: &RawPrivilegeLevel) -> bool {
        *self as usize == *other as usize
    }
}

impl PartialOrd<PrivilegeLevel> for RawPrivilegeLevel {
    fn partial_cmp(&self, other: &PrivilegeLevel) -> Option<Ordering> {
        (*self as usize).partial_cmp(&(*other as usize))
    }
}

impl PartialOrd<RawPrivilegeLevel> for PrivilegeLevel {
    fn partial_cmp(&self, other: &RawPrivilegeLevel) -> Option<Ordering> {
        (*self as usize).partial_cmp(&(*other as usize))
    }
}

impl fmt::Display for PrivilegeLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match *self {
            PrivilegeLevel::User => "U",
            PrivilegeLevel::Supervisor => "S",
            PrivilegeLevel::Machine => "M",
        })
    }
}

impl From<PrivilegeLevel> for RawPrivilegeLevel {
    fn from(value: PrivilegeLevel) -> Self {
        match value {
            PrivilegeLevel::User => Self::User,
            PrivilegeLevel::Supervisor => Self::Supervisor,
            PrivilegeLevel::Machine => Self::Machine,
        }
    }
}

impl TryFrom<RawPrivilegeLevel> for PrivilegeLevel {
    type Error = ReservedPrivilegeLevelError;
    fn try_from(value: RawPrivilegeLevel) -> Result<Self, Self::Error> {
        match value {
            RawPrivilegeLevel::User => Ok(Self::User),
            RawPrivilegeLevel::Supervisor => Ok(Self::Supervisor),
            RawPrivilegeLevel::Reserved => Err(ReservedPrivilegeLevelError(value)),
            RawPrivilegeLevel::Machine => Ok(Self::Machine),
        }
    }
}

#[derive(Error, Debug)]
#[error("privilege level {0} is reserved")]
pub struct ReservedPrivilegeLevelError(RawPrivilegeLevel);

pub mod unit {
    //! Sizes (in bytes) of the units the core moves over the bus.

    pub const BYTE: u32 = 1;
    pub const HALFWORD: u32 = 2;
    pub const WORD: u32 = 4;

    /// Size of a base (level 0) Sv32 page.
    pub const PAGE: u32 = 4096;
}

/// Power-of-two address alignment.
// Invariant: self.0 is a nonzero power of two.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct Alignment(u32);

impl Alignment {
    pub const BYTE: Self = Self(1);
    pub const HALFWORD: Self = Self(2);
    pub const WORD: Self = Self(4);

    /// Returns the natural alignment of a `size`-byte access, or `None` if `size` is not a power
    /// of two.
    pub fn natural_for_size(size: u32) -> Option<Self> {
        size.is_power_of_two().then_some(Self(size))
    }

    pub fn as_power_of_two(self) -> u32 {
        self.0
    }

    /// Returns `true` if `address` is aligned to this alignment.
    pub fn is_aligned(self, address: u32) -> bool {
        address & (self.0 - 1) == 0
    }
}
