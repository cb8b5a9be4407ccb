//! Simulation core for the Pep/9 virtual machine.
//!
//! The crate models the machine itself: the instruction set and its decoder
//! ([`isa`]), the register file ([`registers`]), a 64 KiB memory subsystem
//! built from typed chips with memory-mapped IO ([`memory`]) and an optional
//! write-through cache ([`memory::cache`]), the ISA-level CPU ([`cpu`]), and
//! the stack-trace engine ([`trace`]) that reconstructs call frames from the
//! trace tags collected at assembly time ([`tag`]).
//!
//! The assembler lives in the companion `pasm` crate and produces the
//! [`tag::TraceInfo`] and symbol data ([`symbol`]) this crate consumes.

pub mod constants;
pub mod cpu;
pub mod isa;
pub mod memory;
pub mod registers;
pub mod symbol;
pub mod tag;
pub mod trace;

pub use crate::cpu::{CpuError, IsaCpu, StepOutcome};
pub use crate::isa::{decode, opcode, AddrMode, AddrModeSet, Mnemonic};
pub use crate::memory::{
    ChipKind, MainMemory, MemFault, MemResult, MemoryChipSpec, MemoryDevice, MemoryEvent,
    MemoryOptions,
};
pub use crate::registers::{RegisterFile, Registers};
pub use crate::symbol::{DefState, SymbolEntry, SymbolRef, SymbolTable, SymbolValue};
pub use crate::tag::{SymbolFormat, TraceInfo, TraceType};
pub use crate::trace::{CallStack, Frame, MemoryTrace, StackTracer, TypedSlot};
