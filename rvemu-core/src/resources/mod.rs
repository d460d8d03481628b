//! Devices that can sit on a [`Bus`](crate::bus::Bus) next to the core.

pub mod clint;
pub mod ram;
