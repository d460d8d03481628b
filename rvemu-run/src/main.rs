use clap::Parser;
use goblin::elf::program_header::PT_LOAD;
use goblin::elf::Elf;
use log::{error, info, trace, warn};
use rvemu_core::board::{Board, BoardError, Config, RAM_BASE};
use rvemu_core::bus::BusError;
use rvemu_core::core::StepResult;
use std::fs::File;
use std::io::{self, Write};
use std::process::ExitCode;
use thiserror::Error;

const PROGRESS_INTERVAL: u64 = 100_000_000;

#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Image to execute: a flat binary loaded at the start of RAM, or an ELF file with `--elf`.
    image: String,
    /// Load `image` as an ELF file, placing each loadable segment at its physical address.
    #[arg(short, long)]
    elf: bool,
    /// Device tree blob handed to the guest in `a1`.
    #[arg(long)]
    dtb: Option<String>,
    /// Stop after this many steps; 0 runs until the guest stops.
    #[arg(long, default_value_t = 1_000_000_000)]
    max_steps: u64,
    /// Write the words between `begin_signature` and `end_signature` to this file on exit.
    #[arg(short, long)]
    signature: Option<String>,
    /// Increase log verbosity (repeatable).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
    /// Silence all log output.
    #[arg(short, long)]
    quiet: bool,
}

#[derive(Error, Debug)]
enum RunError {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("failed to parse elf file: {0}")]
    Elf(#[from] goblin::error::Error),
    #[error(transparent)]
    Board(#[from] BoardError),
    #[error(transparent)]
    Logger(#[from] log::SetLoggerError),
    #[error("missing symbol `{0}`")]
    MissingSymbol(&'static str),
    #[error("signature range {start:#010x}..{end:#010x} is malformed")]
    BadSignatureRange { start: u32, end: u32 },
    #[error("guest memory error at {address:#010x}")]
    Memory {
        address: u32,
        #[source]
        source: BusError,
    },
}

/// Symbols of interest in a loaded ELF image.
#[derive(Debug, Default)]
struct Symbols {
    tohost: Option<u32>,
    begin_signature: Option<u32>,
    end_signature: Option<u32>,
}

impl Symbols {
    fn from_elf(elf: &Elf) -> Self {
        let mut symbols = Self::default();
        for sym in elf.syms.iter() {
            let Some(name) = elf.strtab.get_at(sym.st_name) else {
                continue;
            };
            let value = Some(sym.st_value as u32);
            match name {
                "tohost" => symbols.tohost = value,
                "begin_signature" => symbols.begin_signature = value,
                "end_signature" => symbols.end_signature = value,
                _ => {}
            }
        }
        symbols
    }
}

fn main() -> ExitCode {
    let args = Args::parse();
    match run(args) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> Result<ExitCode, RunError> {
    stderrlog::new()
        .modules([module_path!(), "rvemu_core"])
        .verbosity(usize::from(args.verbose) + 1)
        .quiet(args.quiet)
        .init()?;

    let buf = std::fs::read(&args.image)?;
    let mut board = Board::new(Config::default())?;

    let symbols = if args.elf {
        let elf = Elf::parse(&buf)?;
        for h in elf.program_headers.iter().filter(|h| h.p_type == PT_LOAD) {
            board.load_physical(h.p_paddr as u32, &buf[h.file_range()])?;
        }
        Symbols::from_elf(&elf)
    } else {
        board.load_physical(RAM_BASE, &buf)?;
        Symbols::default()
    };

    if let Some(path) = &args.dtb {
        board.load_device_tree(&std::fs::read(path)?)?;
    }

    let exit = run_loop(&mut board, symbols.tohost, args.max_steps)?;

    if let Some(path) = &args.signature {
        write_signature(&mut board, &symbols, path)?;
    }

    Ok(exit)
}

/// Steps `board` until the guest writes `tohost` or `max_steps` is reached.
fn run_loop(board: &mut Board, tohost: Option<u32>, max_steps: u64) -> Result<ExitCode, RunError> {
    let mut steps: u64 = 0;
    while max_steps == 0 || steps < max_steps {
        if let StepResult::Trap(cause) = board.step() {
            trace!("trap {:?} at step {}", cause, steps);
        }
        steps += 1;
        if steps % PROGRESS_INTERVAL == 0 {
            info!("executed {} million steps", steps / 1_000_000);
        }

        let Some(address) = tohost else {
            continue;
        };
        let value = board
            .read_word(address)
            .map_err(|source| RunError::Memory { address, source })?;
        if value == 0 {
            continue;
        }
        // riscv-tests convention: 1 is a pass, otherwise `value >> 1` is the failing test.
        return Ok(if value == 1 {
            info!("guest passed after {} steps", steps);
            ExitCode::SUCCESS
        } else {
            error!("guest failed test {} after {} steps", value >> 1, steps);
            ExitCode::FAILURE
        });
    }
    if tohost.is_some() {
        warn!("step limit of {} reached", max_steps);
    }
    info!("stopped after {} steps", steps);
    Ok(ExitCode::SUCCESS)
}

fn write_signature(board: &mut Board, symbols: &Symbols, path: &str) -> Result<(), RunError> {
    let start = symbols
        .begin_signature
        .ok_or(RunError::MissingSymbol("begin_signature"))?;
    let end = symbols
        .end_signature
        .ok_or(RunError::MissingSymbol("end_signature"))?;
    if start % 16 != 0 || end % 4 != 0 || start > end {
        return Err(RunError::BadSignatureRange { start, end });
    }

    let mut file = File::create(path)?;
    for address in (start..end).step_by(4) {
        let word = board
            .read_word(address)
            .map_err(|source| RunError::Memory { address, source })?;
        writeln!(file, "{word:08x}")?;
    }
    Ok(())
}
