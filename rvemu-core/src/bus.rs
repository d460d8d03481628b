//! The interface through which the core reaches memory and devices.

use std::fmt::Debug;
use thiserror::Error;

/// A physical-address bus, as seen by the core.
///
/// Every fetch, load, store and page-table read turns into exactly one call on this trait per
/// translated region. The access width is `buf.len()` and is one of `1`, `2`, `4` or `8`. Values
/// are always exchanged in little-endian byte order; the core encodes and decodes around every
/// call.
///
/// Implementations decide which `(address, width)` pairs they support and report anything else
/// through [`BusError`]. They are trusted to report truthfully: a device that claims success for a
/// width it cannot serve is not defended against.
pub trait Bus: Debug {
    /// Reads `buf.len()` bytes starting at `address` into `buf`.
    fn read(&mut self, buf: &mut [u8], address: u32) -> BusResult;

    /// Writes the bytes of `buf` starting at `address`.
    fn write(&mut self, address: u32, buf: &[u8]) -> BusResult;
}

pub type BusResult = Result<(), BusError>;

/// Non-OK status of a bus access.
#[derive(Error, Debug, Copy, Clone, Eq, PartialEq)]
pub enum BusError {
    /// Nothing is mapped at the address.
    #[error("no device mapped at address")]
    Unmapped,
    /// A device is mapped, but it rejects the access (width, offset or direction).
    #[error("device rejected the access")]
    Invalid,
    /// The device requires a stricter alignment for this width.
    #[error("misaligned device access")]
    Misaligned,
}

impl<B: Bus + ?Sized> Bus for &mut B {
    fn read(&mut self, buf: &mut [u8], address: u32) -> BusResult {
        (**self).read(buf, address)
    }

    fn write(&mut self, address: u32, buf: &[u8]) -> BusResult {
        (**self).write(address, buf)
    }
}
