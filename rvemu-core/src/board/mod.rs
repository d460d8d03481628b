//! A minimal single-hart board: RAM plus a CLINT, wired to one [`Core`].
//!
//! The board also owns the wall-clock policy: `mtime` advances by one tick every
//! [`TIMER_PERIOD`] steps, and a hart idling in `wfi` skips straight to the next tick.

mod system_bus;

use crate::bus::{Bus, BusError};
use crate::core::{Core, StepResult};
use crate::registers::Specifier;
use crate::resources::clint::Clint;
use crate::resources::ram::Ram;
use log::{debug, info};
use thiserror::Error;

pub use system_bus::SystemBus;

pub const RAM_BASE: u32 = 0x8000_0000;
pub const DEFAULT_RAM_SIZE: usize = 128 * 1024 * 1024;
pub const CLINT_BASE: u32 = 0x0200_0000;
/// Offset into RAM where a device tree blob is placed for the guest.
pub const DTB_OFFSET: u32 = 0x0200_0000;
/// Steps per `mtime` tick.
pub const TIMER_PERIOD: u32 = 4096;

#[derive(Debug, Clone)]
pub struct Config {
    /// RAM size in bytes, mapped at [`RAM_BASE`].
    pub ram_size: usize,
    pub hart_id: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ram_size: DEFAULT_RAM_SIZE,
            hart_id: 0,
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BoardError {
    #[error("cannot map {0:#x} bytes of RAM at {RAM_BASE:#010x}")]
    InvalidRamSize(usize),
    #[error("image of {len:#x} bytes does not fit in RAM at {address:#010x}")]
    ImageTooLarge { address: u32, len: usize },
}

#[derive(Debug)]
pub struct Board {
    /// The single core of this board. Multiprocessing is not supported.
    core: Core<SystemBus>,
    /// Steps since the last `mtime` tick.
    period: u32,
}

impl Board {
    pub fn new(config: Config) -> Result<Self, BoardError> {
        let dram =
            Ram::new(RAM_BASE, config.ram_size).ok_or(BoardError::InvalidRamSize(config.ram_size))?;
        let system_bus = SystemBus {
            clint0: Clint::new(),
            dram,
        };
        let core = Core::new(
            system_bus,
            crate::core::Config {
                reset_vector: RAM_BASE,
                hart_id: config.hart_id,
                ..Default::default()
            },
        );
        Ok(Self { core, period: 0 })
    }

    pub fn core(&self) -> &Core<SystemBus> {
        &self.core
    }

    pub fn core_mut(&mut self) -> &mut Core<SystemBus> {
        &mut self.core
    }

    pub fn clint0(&self) -> &Clint {
        &self.core.bus().clint0
    }

    pub fn dram(&self) -> &Ram {
        &self.core.bus().dram
    }

    /// Copies `bytes` into RAM at physical `address`.
    pub fn load_physical(&mut self, address: u32, bytes: &[u8]) -> Result<(), BoardError> {
        self.core
            .bus_mut()
            .dram
            .load(address, bytes)
            .map_err(|_| BoardError::ImageTooLarge {
                address,
                len: bytes.len(),
            })?;
        debug!("loaded {:#x} bytes at {:#010x}", bytes.len(), address);
        Ok(())
    }

    /// Places a device tree blob at [`DTB_OFFSET`] into RAM and points the boot registers at it:
    /// `a0` holds the hart id and `a1` the blob's physical address.
    pub fn load_device_tree(&mut self, dtb: &[u8]) -> Result<(), BoardError> {
        let address = RAM_BASE + DTB_OFFSET;
        self.load_physical(address, dtb)?;
        let hart_id = self.core.config().hart_id;
        let registers = self.core.registers_mut();
        registers.set_x(Specifier::A0, hart_id);
        registers.set_x(Specifier::A1, address);
        info!("device tree at {:#010x}", address);
        Ok(())
    }

    /// Reads a physical word, bypassing translation. Used by hosts polling guest memory.
    pub fn read_word(&mut self, address: u32) -> Result<u32, BusError> {
        let mut buf = [0; 4];
        self.core.bus_mut().read(&mut buf, address)?;
        Ok(u32::from_le_bytes(buf))
    }

    /// Advances the board by one core step.
    ///
    /// The CLINT's lines and `mtime` are latched into the core before it steps.
    pub fn step(&mut self) -> StepResult {
        self.period += 1;
        if self.period >= TIMER_PERIOD {
            self.period = 0;
            self.core.bus_mut().clint0.tick(1);
        }

        let clint = &self.core.bus().clint0;
        let (mtime, lines) = (clint.mtime(), clint.lines());
        self.core.set_time(mtime);
        self.core.set_interrupt_lines(lines);

        let result = self.core.step();
        if result == StepResult::Idle {
            // Nothing changes until the next tick.
            self.period = TIMER_PERIOD - 1;
        }
        result
    }

    /// Force the board back to its reset state. RAM contents are kept.
    pub fn reset(&mut self) {
        self.core.reset();
        self.core.bus_mut().clint0 = Clint::new();
        self.period = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{csr, Interrupt, TrapCause};

    const WFI: u32 = 0x1050_0073;
    // jal x0, -4
    const JUMP_BACK: u32 = 0xFFDF_F06F;

    fn make_board() -> Board {
        Board::new(Config {
            ram_size: 0x1000,
            hart_id: 0,
        })
        .unwrap()
    }

    #[test]
    fn test_invalid_ram_size() {
        let board = Board::new(Config {
            ram_size: 0x8000_0001,
            hart_id: 0,
        });
        assert_eq!(Some(BoardError::InvalidRamSize(0x8000_0001)), board.err());
    }

    #[test]
    fn test_load_physical() {
        let mut board = make_board();
        board.load_physical(RAM_BASE + 4, &[0xEF, 0xBE, 0xAD, 0xDE]).unwrap();
        assert_eq!(Ok(0xDEAD_BEEF), board.read_word(RAM_BASE + 4));
        assert_eq!(
            Err(BoardError::ImageTooLarge {
                address: RAM_BASE + 0xFFE,
                len: 4
            }),
            board.load_physical(RAM_BASE + 0xFFE, &[0; 4])
        );
    }

    #[test]
    fn test_device_tree_boot_registers() {
        let mut board = Board::new(Config {
            ram_size: DTB_OFFSET as usize + 0x100,
            hart_id: 2,
        })
        .unwrap();
        board.load_device_tree(&[0xD0, 0x0D, 0xFE, 0xED]).unwrap();
        let registers = board.core().registers();
        assert_eq!(2, registers.x(Specifier::A0));
        assert_eq!(RAM_BASE + DTB_OFFSET, registers.x(Specifier::A1));
        assert_eq!(Ok(0xEDFE_0DD0), board.read_word(RAM_BASE + DTB_OFFSET));
    }

    #[test]
    fn test_timer_wakes_idle_hart() {
        let mut board = make_board();
        let mut program = Vec::new();
        program.extend_from_slice(&WFI.to_le_bytes());
        program.extend_from_slice(&JUMP_BACK.to_le_bytes());
        board.load_physical(RAM_BASE, &program).unwrap();

        let core = board.core_mut();
        core.write_csr(csr::MTVEC, RAM_BASE + 0x100).unwrap();
        core.write_csr(csr::MIE, 1 << 7).unwrap();
        core.write_csr(csr::MSTATUS, 1 << 3).unwrap();
        core.bus_mut()
            .write(CLINT_BASE + 0x4000, &3u32.to_le_bytes())
            .unwrap();

        let mut steps = 0;
        let result = loop {
            steps += 1;
            assert!(steps < 32, "timer interrupt never taken");
            match board.step() {
                StepResult::Retired | StepResult::Idle => continue,
                trap => break trap,
            }
        };

        assert_eq!(
            StepResult::Trap(TrapCause::Interrupt(Interrupt::MachineTimerInterrupt)),
            result
        );
        assert_eq!(3, board.clint0().mtime());
        assert_eq!(3, board.core().time());
        assert_eq!(RAM_BASE + 0x100, board.core().registers().pc());
    }

    #[test]
    fn test_timer_ticks_every_period() {
        let mut board = make_board();
        // jal x0, 0
        board.load_physical(RAM_BASE, &0x0000_006Fu32.to_le_bytes()).unwrap();
        for _ in 0..TIMER_PERIOD - 1 {
            assert_eq!(StepResult::Retired, board.step());
        }
        assert_eq!(0, board.clint0().mtime());
        board.step();
        assert_eq!(1, board.clint0().mtime());
    }
}
