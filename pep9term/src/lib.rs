//! Batch host for the Pep/9 core: assembles the bundled operating system,
//! builds the machine's chip layout from it, and runs object code with
//! file-buffered IO.

use pasm::program::AsmProgram;
use pasm::SourceError;
use pep9::constants;
use pep9::cpu::{CpuError, IsaCpu, StepOutcome};
use pep9::memory::{ChipKind, MainMemory, MemoryChipSpec, MemoryDevice, MemoryEvent};
use pep9::tag::TraceInfo;


/// Source of the operating system shipped with the tool.
pub const OS_SOURCE: &str = include_str!("pep9os.pep");

/// Assembles the bundled operating system. Every other capability depends
/// on it, so failure here is unrecoverable.
pub fn build_operating_system() -> AsmProgram {
    match pasm::assemble_operating_system(OS_SOURCE, true) {
        Ok((program, _)) => program,
        Err(errors) => {
            for error in &errors {
                eprintln!("{}: {}", error.line, error.message);
            }
            panic!("The default operating system failed to assemble.");
        }
    }
}

/// Assembles a user program against the operating system's symbol table, so
/// `charIn` and `charOut` resolve to the installed ports.
pub fn assemble_source(
    source: &str,
    os: &AsmProgram,
) -> Result<(AsmProgram, Vec<SourceError>), Vec<SourceError>> {
    pasm::assemble_user_program(source, Some(os.symbol_table()))
}

/// Outcome of one batch run: everything written to the output port, and how
/// the simulation ended.
pub struct RunResult {
    pub output: Vec<u8>,
    pub status: Result<StepOutcome, CpuError>,
    pub steps: u64,
}

/// Loads the operating system and the object program, buffers `input`
/// behind the input port, and runs from address zero until the program
/// stops, errors, or exhausts `max_steps`.
pub fn run_object(object: &[u8], input: &str, max_steps: u64, os: &AsmProgram) -> RunResult {
    let os_table = os.symbol_table();
    let char_in = os_table
        .get("charIn")
        .expect("operating system must define charIn")
        .borrow()
        .value();
    let char_out = os_table
        .get("charOut")
        .expect("operating system must define charOut")
        .borrow()
        .value();
    let burn_value = os.burn_value().unwrap_or(constants::DEFAULT_BURN_VALUE);
    let start_rom = os.start_rom_address().unwrap_or(burn_value);
    let os_image = os.object_code();

    // RAM runs right up to the ROM so there are no gaps in the memory map;
    // the one-byte ports overlay their addresses.
    let mut memory = MainMemory::new();
    memory.construct(&[
        MemoryChipSpec {
            kind: ChipKind::Ram,
            base: 0,
            span: u32::from(start_rom),
        },
        MemoryChipSpec {
            kind: ChipKind::Rom,
            base: start_rom,
            span: os_image.len() as u32,
        },
        MemoryChipSpec {
            kind: ChipKind::InputPort,
            base: char_in,
            span: 1,
        },
        MemoryChipSpec {
            kind: ChipKind::OutputPort,
            base: char_out,
            span: 1,
        },
    ]);
    memory.load_values(start_rom, &os_image);
    memory.load_values(0, object);

    // All input the program will ever see is buffered up front; a trailing
    // newline guarantees at least one byte.
    let mut buffered = input.to_string();
    buffered.push('\n');
    memory.on_input_received(char_in, buffered.as_bytes());

    let mut cpu = IsaCpu::new(memory);
    cpu.set_max_steps(max_steps);
    cpu.set_burn_value(burn_value);
    cpu.reset();
    cpu.init(&TraceInfo::default());

    let initial_sp = cpu
        .memory()
        .get_word(burn_value.wrapping_sub(constants::VEC_SYSTEM_SP));
    {
        let regs = cpu.registers_mut().current_mut();
        regs.sp = initial_sp;
        regs.pc = 0;
    }

    let status = loop {
        match cpu.run() {
            // Input beyond the buffered file reads as end-of-input.
            Ok(StepOutcome::AwaitingInput(address)) => {
                cpu.memory_mut().on_input_aborted(address);
            }
            Ok(StepOutcome::Breakpoint) => continue,
            other => break other,
        }
    };

    let mut output = Vec::new();
    while let Some(event) = cpu.memory_mut().pop_event() {
        if let MemoryEvent::OutputWritten { address, value } = event {
            if address == char_out {
                output.push(value);
            }
        }
    }

    RunResult {
        output,
        status,
        steps: cpu.step_count(),
    }
}
