//! ISA-level CPU: a fetch-decode-execute loop over a [`MemoryDevice`].
//!
//! Each step snapshots the register bank, fetches one or three bytes,
//! evaluates the operand per its addressing mode, mutates architectural
//! state, and feeds the stack-trace engine. Suspension is modelled without
//! coroutines: a read of an empty input port unwinds the partially executed
//! instruction and surfaces [`StepOutcome::AwaitingInput`]; once the host
//! buffers a byte the same instruction re-executes from scratch.

use std::collections::HashSet;
use std::fmt;

use crate::constants;
use crate::isa::{decode, AddrMode, Mnemonic};
use crate::memory::{MemFault, MemoryDevice};
use crate::registers::{RegisterFile, Registers};
use crate::tag::TraceInfo;
use crate::trace::{MemoryTrace, StackTracer};

/// How a step concluded. `Continue` means the machine can take another step.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum StepOutcome {
    Continue,
    /// A `STOP` instruction executed.
    Stopped,
    /// A breakpoint or external interrupt fired; `PC` is unchanged.
    Breakpoint,
    /// An input port with an empty buffer was read; carries the port
    /// address. The instruction has not executed.
    AwaitingInput(u16),
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub enum CpuError {
    /// A store instruction was executed with immediate addressing.
    StoreImmediate(Mnemonic),
    /// A trap fired but the trap vector holds no handler.
    TrapWithoutHandler,
    /// The bounded run ceiling was reached.
    MaxStepsExceeded(u64),
    /// A ROM write occurred under strict ROM checking.
    RomWrite(u16),
}

impl fmt::Display for CpuError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            CpuError::StoreImmediate(m) => {
                write!(f, "Cannot store to an immediate operand ({}).", m)
            }
            CpuError::TrapWithoutHandler => {
                write!(f, "Trap executed with no handler installed.")
            }
            CpuError::MaxStepsExceeded(n) => write!(f, "Exceeded the maximum of {} steps.", n),
            CpuError::RomWrite(addr) => {
                write!(f, "Wrote to read-only memory at 0x{:04X}.", addr)
            }
        }
    }
}

impl std::error::Error for CpuError {}

// Internal fault plumbing so `?` works across memory and CPU failures.
enum ExecFault {
    Mem(MemFault),
    Cpu(CpuError),
}

impl From<MemFault> for ExecFault {
    fn from(fault: MemFault) -> ExecFault {
        ExecFault::Mem(fault)
    }
}

impl From<CpuError> for ExecFault {
    fn from(error: CpuError) -> ExecFault {
        ExecFault::Cpu(error)
    }
}

fn uses_index_register(mnemonic: Mnemonic) -> bool {
    use Mnemonic::*;
    match mnemonic {
        NOTX | NEGX | ASLX | ASRX | ROLX | RORX | ADDX | SUBX | ANDX | ORX | CPWX | CPBX
        | LDWX | LDBX | STWX | STBX => true,
        _ => false,
    }
}

/// The Pep/9 CPU, generic over its memory so the cache layer can be slotted
/// in without recompiling.
pub struct IsaCpu<M> {
    memory: M,
    regs: RegisterFile,
    tracer: StackTracer,
    breakpoints: HashSet<u16>,
    force_break: bool,
    step_count: u64,
    max_steps: u64,
    burn_value: u16,
    op_val_cache: u16,
}

impl<M: MemoryDevice> IsaCpu<M> {
    pub fn new(memory: M) -> IsaCpu<M> {
        IsaCpu {
            memory,
            regs: RegisterFile::default(),
            tracer: StackTracer::new(),
            breakpoints: HashSet::new(),
            force_break: false,
            step_count: 0,
            max_steps: constants::DEFAULT_MAX_STEPS,
            burn_value: constants::DEFAULT_BURN_VALUE,
            op_val_cache: 0,
        }
    }

    pub fn memory(&self) -> &M {
        &self.memory
    }

    pub fn memory_mut(&mut self) -> &mut M {
        &mut self.memory
    }

    pub fn registers(&self) -> &RegisterFile {
        &self.regs
    }

    pub fn registers_mut(&mut self) -> &mut RegisterFile {
        &mut self.regs
    }

    pub fn memory_trace(&self) -> &MemoryTrace {
        self.tracer.memory_trace()
    }

    pub fn tracer(&self) -> &StackTracer {
        &self.tracer
    }

    /// Operand value of the last executed instruction, after address-mode
    /// evaluation.
    pub fn operand_value(&self) -> u16 {
        self.op_val_cache
    }

    pub fn step_count(&self) -> u64 {
        self.step_count
    }

    pub fn set_max_steps(&mut self, max_steps: u64) {
        self.max_steps = max_steps;
    }

    /// Address the machine vectors are anchored to; the burn value of the
    /// loaded operating system.
    pub fn set_burn_value(&mut self, burn_value: u16) {
        self.burn_value = burn_value;
    }

    pub fn breakpoints(&self) -> &HashSet<u16> {
        &self.breakpoints
    }

    pub fn breakpoints_set(&mut self, addresses: HashSet<u16>) {
        self.breakpoints = addresses;
    }

    pub fn breakpoint_added(&mut self, address: u16) {
        self.breakpoints.insert(address);
    }

    pub fn breakpoint_removed(&mut self, address: u16) {
        self.breakpoints.remove(&address);
    }

    pub fn breakpoints_remove_all(&mut self) {
        self.breakpoints.clear();
    }

    /// Requests a stop before the next instruction executes.
    pub fn interrupt(&mut self) {
        self.force_break = true;
    }

    /// Clears registers, counters, and the stack-trace state. Breakpoints
    /// survive a reset.
    pub fn reset(&mut self) {
        self.regs.clear();
        self.step_count = 0;
        self.op_val_cache = 0;
        self.force_break = false;
        self.tracer.reset();
    }

    /// Pre-run bookkeeping: primes the tracer with the active program's
    /// static trace information.
    pub fn init(&mut self, trace_info: &TraceInfo) {
        self.tracer.prime(trace_info);
    }

    /// Executes exactly one instruction. An external interrupt takes
    /// precedence; single-stepping is not blocked by the breakpoint set, so
    /// a paused machine can step off a breakpoint.
    pub fn step(&mut self) -> Result<StepOutcome, CpuError> {
        if self.force_break {
            self.force_break = false;
            return Ok(StepOutcome::Breakpoint);
        }
        self.execute()
    }

    /// Steps exactly once. Meaningful when the current instruction is a
    /// `CALL` or trap, descending into the callee.
    pub fn step_into(&mut self) -> Result<StepOutcome, CpuError> {
        self.step()
    }

    /// Runs until `STOP`, a breakpoint, an input suspension, an error, or
    /// the step ceiling. The first instruction is exempt from the breakpoint
    /// set so a run resumed on a breakpoint can leave it.
    pub fn run(&mut self) -> Result<StepOutcome, CpuError> {
        self.run_while(|_| true)
    }

    /// Runs until the stack pointer returns to or above its starting value,
    /// completing the current call when the next instruction is a `CALL`.
    pub fn step_over(&mut self) -> Result<StepOutcome, CpuError> {
        let depth = self.regs.current().sp;
        self.run_while(move |regs| regs.sp < depth)
    }

    /// Runs until the current frame returns, leaving the stack pointer
    /// strictly above its starting value.
    pub fn step_out(&mut self) -> Result<StepOutcome, CpuError> {
        let depth = self.regs.current().sp;
        self.run_while(move |regs| regs.sp <= depth)
    }

    fn run_while<F>(&mut self, condition: F) -> Result<StepOutcome, CpuError>
    where
        F: Fn(&Registers) -> bool,
    {
        let mut first = true;
        loop {
            if self.force_break {
                self.force_break = false;
                return Ok(StepOutcome::Breakpoint);
            }
            if !first && self.breakpoints.contains(&self.regs.current().pc) {
                return Ok(StepOutcome::Breakpoint);
            }
            first = false;
            match self.execute()? {
                StepOutcome::Continue => {
                    if self.step_count >= self.max_steps {
                        return Err(CpuError::MaxStepsExceeded(self.max_steps));
                    }
                    if !condition(self.regs.current()) {
                        return Ok(StepOutcome::Continue);
                    }
                }
                outcome => return Ok(outcome),
            }
        }
    }

    fn execute(&mut self) -> Result<StepOutcome, CpuError> {
        self.regs.snapshot();
        self.step_count += 1;
        match self.instruction_body() {
            Ok(outcome) => Ok(outcome),
            Err(ExecFault::Mem(MemFault::AwaitingInput(address))) => {
                // Unwind the partial instruction; it re-executes once the
                // host supplies a byte.
                self.regs.rollback();
                self.step_count -= 1;
                Ok(StepOutcome::AwaitingInput(address))
            }
            Err(ExecFault::Mem(MemFault::RomWrite(address))) => Err(CpuError::RomWrite(address)),
            Err(ExecFault::Cpu(error)) => Err(error),
        }
    }

    fn instruction_body(&mut self) -> Result<StepOutcome, ExecFault> {
        let pc0 = self.regs.current().pc;
        let inst_spec = self.memory.read_byte(pc0)?;
        let (mnemonic, mode) = decode(inst_spec);
        {
            let cur = self.regs.current_mut();
            cur.is = inst_spec;
            cur.pc = pc0.wrapping_add(1);
        }
        if !mnemonic.is_unary() {
            let pc1 = self.regs.current().pc;
            let op_spec = self.memory.read_word(pc1)?;
            let cur = self.regs.current_mut();
            cur.os = op_spec;
            cur.pc = pc1.wrapping_add(2);
        }
        self.op_val_cache = 0;
        self.tracer.calculate_start(mnemonic);
        let outcome = self.dispatch(mnemonic, mode)?;
        let start = *self.regs.start();
        let acc = self.regs.current().a;
        self.tracer
            .calculate_end(mnemonic, self.op_val_cache, start.sp, start.pc, acc);
        Ok(outcome)
    }

    fn dispatch(&mut self, mnemonic: Mnemonic, mode: AddrMode) -> Result<StepOutcome, ExecFault> {
        use Mnemonic::*;
        match mnemonic {
            STOP => return Ok(StepOutcome::Stopped),

            RET => {
                let sp = self.regs.current().sp;
                let ret = self.memory.read_word(sp)?;
                let cur = self.regs.current_mut();
                cur.pc = ret;
                cur.sp = sp.wrapping_add(2);
            }

            RETTR => {
                let sp = self.regs.current().sp;
                let status = self.memory.read_byte(sp)?;
                let a = self.memory.read_word(sp.wrapping_add(1))?;
                let x = self.memory.read_word(sp.wrapping_add(3))?;
                let pc = self.memory.read_word(sp.wrapping_add(5))?;
                let old_sp = self.memory.read_word(sp.wrapping_add(7))?;
                let cur = self.regs.current_mut();
                cur.set_status_bits(status);
                cur.a = a;
                cur.x = x;
                cur.pc = pc;
                cur.sp = old_sp;
            }

            MOVSPA => {
                let cur = self.regs.current_mut();
                cur.a = cur.sp;
            }

            MOVFLGA => {
                let cur = self.regs.current_mut();
                cur.a = u16::from(cur.status_bits());
            }

            MOVAFLG => {
                let cur = self.regs.current_mut();
                let bits = cur.a as u8 & 0x0F;
                cur.set_status_bits(bits);
            }

            NOTA | NOTX => {
                let value = !self.read_ax(mnemonic);
                self.set_nz(value);
                self.write_ax(mnemonic, value);
            }

            NEGA | NEGX => {
                let before = self.read_ax(mnemonic);
                let value = before.wrapping_neg();
                {
                    let cur = self.regs.current_mut();
                    cur.v = before == 0x8000;
                }
                self.set_nz(value);
                self.write_ax(mnemonic, value);
            }

            ASLA | ASLX => {
                let before = self.read_ax(mnemonic);
                let value = before << 1;
                {
                    let cur = self.regs.current_mut();
                    cur.c = before & 0x8000 != 0;
                    cur.v = (before ^ value) & 0x8000 != 0;
                }
                self.set_nz(value);
                self.write_ax(mnemonic, value);
            }

            ASRA | ASRX => {
                let before = self.read_ax(mnemonic);
                let value = ((before as i16) >> 1) as u16;
                self.regs.current_mut().c = before & 1 != 0;
                self.set_nz(value);
                self.write_ax(mnemonic, value);
            }

            ROLA | ROLX => {
                let before = self.read_ax(mnemonic);
                let carry_in = self.regs.current().c as u16;
                let value = (before << 1) | carry_in;
                self.regs.current_mut().c = before & 0x8000 != 0;
                self.write_ax(mnemonic, value);
            }

            RORA | RORX => {
                let before = self.read_ax(mnemonic);
                let carry_in = self.regs.current().c as u16;
                let value = (before >> 1) | (carry_in << 15);
                self.regs.current_mut().c = before & 1 != 0;
                self.write_ax(mnemonic, value);
            }

            BR | BRLE | BRLT | BREQ | BRNE | BRGE | BRGT | BRV | BRC => {
                let target = self.operand_word(mode)?;
                self.op_val_cache = target;
                let taken = {
                    let cur = self.regs.current();
                    match mnemonic {
                        BR => true,
                        BRLE => cur.n || cur.z,
                        BRLT => cur.n,
                        BREQ => cur.z,
                        BRNE => !cur.z,
                        BRGE => !cur.n,
                        BRGT => !cur.n && !cur.z,
                        BRV => cur.v,
                        _ => cur.c,
                    }
                };
                if taken {
                    self.regs.current_mut().pc = target;
                }
            }

            CALL => {
                let target = self.operand_word(mode)?;
                self.op_val_cache = target;
                let sp = self.regs.current().sp.wrapping_sub(2);
                let ret = self.regs.current().pc;
                self.memory.write_word(sp, ret)?;
                let cur = self.regs.current_mut();
                cur.sp = sp;
                cur.pc = target;
            }

            NOP0 | NOP1 | NOP | DECI | DECO | HEXO | STRO => self.trap()?,

            ADDSP => {
                let value = self.operand_word(mode)?;
                self.op_val_cache = value;
                let sp = self.regs.current().sp;
                let result = self.add_word(sp, value);
                self.regs.current_mut().sp = result;
            }

            SUBSP => {
                let value = self.operand_word(mode)?;
                self.op_val_cache = value;
                let sp = self.regs.current().sp;
                let result = self.sub_word(sp, value);
                self.regs.current_mut().sp = result;
            }

            ADDA | ADDX => {
                let value = self.operand_word(mode)?;
                self.op_val_cache = value;
                let result = self.add_word(self.read_ax(mnemonic), value);
                self.write_ax(mnemonic, result);
            }

            SUBA | SUBX => {
                let value = self.operand_word(mode)?;
                self.op_val_cache = value;
                let result = self.sub_word(self.read_ax(mnemonic), value);
                self.write_ax(mnemonic, result);
            }

            ANDA | ANDX => {
                let value = self.operand_word(mode)?;
                self.op_val_cache = value;
                let result = self.read_ax(mnemonic) & value;
                self.set_nz(result);
                self.write_ax(mnemonic, result);
            }

            ORA | ORX => {
                let value = self.operand_word(mode)?;
                self.op_val_cache = value;
                let result = self.read_ax(mnemonic) | value;
                self.set_nz(result);
                self.write_ax(mnemonic, result);
            }

            CPWA | CPWX => {
                let value = self.operand_word(mode)?;
                self.op_val_cache = value;
                let register = self.read_ax(mnemonic);
                self.cmp_word(register, value);
            }

            CPBA | CPBX => {
                let value = self.operand_byte(mode)?;
                self.op_val_cache = u16::from(value);
                let register = self.read_ax(mnemonic) as u8;
                self.cmp_byte(register, value);
            }

            LDWA | LDWX => {
                let value = self.operand_word(mode)?;
                self.op_val_cache = value;
                self.set_nz(value);
                self.write_ax(mnemonic, value);
            }

            LDBA | LDBX => {
                let byte = self.operand_byte(mode)?;
                self.op_val_cache = u16::from(byte);
                let value = (self.read_ax(mnemonic) & 0xFF00) | u16::from(byte);
                {
                    // A loaded byte is never negative.
                    let cur = self.regs.current_mut();
                    cur.n = false;
                    cur.z = byte == 0;
                }
                self.write_ax(mnemonic, value);
            }

            STWA | STWX => {
                let address = self.store_address(mnemonic, mode)?;
                let value = self.read_ax(mnemonic);
                self.op_val_cache = value;
                self.memory.write_word(address, value)?;
            }

            STBA | STBX => {
                let address = self.store_address(mnemonic, mode)?;
                let value = self.read_ax(mnemonic) & 0x00FF;
                self.op_val_cache = value;
                self.memory.write_byte(address, value as u8)?;
            }
        }
        Ok(StepOutcome::Continue)
    }

    /// Pushes the process control block onto the system stack and vectors
    /// into the operating system.
    fn trap(&mut self) -> Result<(), ExecFault> {
        let base = self.burn_value;
        let handler = self
            .memory
            .read_word(base.wrapping_sub(constants::VEC_TRAP_HANDLER))?;
        if handler == 0 {
            return Err(CpuError::TrapWithoutHandler.into());
        }
        let temp = self
            .memory
            .read_word(base.wrapping_sub(constants::VEC_SYSTEM_SP))?;
        let regs = *self.regs.current();
        self.memory.write_byte(temp.wrapping_sub(1), regs.is)?;
        self.memory.write_word(temp.wrapping_sub(3), regs.sp)?;
        self.memory.write_word(temp.wrapping_sub(5), regs.pc)?;
        self.memory.write_word(temp.wrapping_sub(7), regs.x)?;
        self.memory.write_word(temp.wrapping_sub(9), regs.a)?;
        self.memory
            .write_byte(temp.wrapping_sub(constants::PCB_BYTES), regs.status_bits())?;
        let cur = self.regs.current_mut();
        cur.sp = temp.wrapping_sub(constants::PCB_BYTES);
        cur.pc = handler;
        Ok(())
    }

    fn effective_address(&mut self, mode: AddrMode) -> Result<u16, ExecFault> {
        let Registers { x, sp, os, .. } = *self.regs.current();
        Ok(match mode {
            AddrMode::I => os,
            AddrMode::D => os,
            AddrMode::N => self.memory.read_word(os)?,
            AddrMode::S => sp.wrapping_add(os),
            AddrMode::SF => self.memory.read_word(sp.wrapping_add(os))?,
            AddrMode::X => os.wrapping_add(x),
            AddrMode::SX => sp.wrapping_add(os).wrapping_add(x),
            AddrMode::SFX => self
                .memory
                .read_word(sp.wrapping_add(os))?
                .wrapping_add(x),
        })
    }

    fn operand_word(&mut self, mode: AddrMode) -> Result<u16, ExecFault> {
        if mode == AddrMode::I {
            return Ok(self.regs.current().os);
        }
        let address = self.effective_address(mode)?;
        Ok(self.memory.read_word(address)?)
    }

    fn operand_byte(&mut self, mode: AddrMode) -> Result<u8, ExecFault> {
        if mode == AddrMode::I {
            return Ok(self.regs.current().os as u8);
        }
        let address = self.effective_address(mode)?;
        Ok(self.memory.read_byte(address)?)
    }

    fn store_address(&mut self, mnemonic: Mnemonic, mode: AddrMode) -> Result<u16, ExecFault> {
        if mode == AddrMode::I {
            return Err(CpuError::StoreImmediate(mnemonic).into());
        }
        self.effective_address(mode)
    }

    fn read_ax(&self, mnemonic: Mnemonic) -> u16 {
        if uses_index_register(mnemonic) {
            self.regs.current().x
        } else {
            self.regs.current().a
        }
    }

    fn write_ax(&mut self, mnemonic: Mnemonic, value: u16) {
        if uses_index_register(mnemonic) {
            self.regs.current_mut().x = value;
        } else {
            self.regs.current_mut().a = value;
        }
    }

    fn set_nz(&mut self, value: u16) {
        let cur = self.regs.current_mut();
        cur.n = value & 0x8000 != 0;
        cur.z = value == 0;
    }

    fn add_word(&mut self, a: u16, b: u16) -> u16 {
        let sum = u32::from(a) + u32::from(b);
        let result = sum as u16;
        let cur = self.regs.current_mut();
        cur.n = result & 0x8000 != 0;
        cur.z = result == 0;
        cur.v = (a ^ result) & (b ^ result) & 0x8000 != 0;
        cur.c = sum > 0xFFFF;
        result
    }

    fn sub_word(&mut self, a: u16, b: u16) -> u16 {
        let sum = u32::from(a) + u32::from(!b) + 1;
        let result = sum as u16;
        let cur = self.regs.current_mut();
        cur.n = result & 0x8000 != 0;
        cur.z = result == 0;
        cur.v = (a ^ result) & (!b ^ result) & 0x8000 != 0;
        cur.c = sum > 0xFFFF;
        result
    }

    // Comparisons invert N on overflow so signed branches order correctly
    // even when the difference overflows.
    fn cmp_word(&mut self, a: u16, b: u16) {
        self.sub_word(a, b);
        let cur = self.regs.current_mut();
        if cur.v {
            cur.n = !cur.n;
        }
    }

    fn cmp_byte(&mut self, a: u8, b: u8) {
        let sum = u16::from(a) + u16::from(!b) + 1;
        let result = sum as u8;
        let cur = self.regs.current_mut();
        cur.n = result & 0x80 != 0;
        cur.z = result == 0;
        cur.v = (a ^ result) & (!b ^ result) & 0x80 != 0;
        cur.c = sum > 0xFF;
        if cur.v {
            cur.n = !cur.n;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::isa::opcode;
    use crate::memory::{ChipKind, MainMemory, MemoryChipSpec};

    fn non_unary(mnemonic: Mnemonic, mode: AddrMode, operand: u16) -> Vec<u8> {
        vec![
            opcode(mnemonic, mode),
            (operand >> 8) as u8,
            (operand & 0xFF) as u8,
        ]
    }

    fn unary(mnemonic: Mnemonic) -> Vec<u8> {
        vec![mnemonic.base_opcode()]
    }

    fn cpu_with(program: &[Vec<u8>]) -> IsaCpu<MainMemory> {
        let bytes: Vec<u8> = program.iter().flatten().copied().collect();
        let mut memory = MainMemory::new();
        memory.load_values(0, &bytes);
        let mut cpu = IsaCpu::new(memory);
        cpu.registers_mut().current_mut().sp = 0xFB8F;
        cpu
    }

    #[test]
    fn immediate_load_sets_flags() {
        let mut cpu = cpu_with(&[
            non_unary(Mnemonic::LDWA, AddrMode::I, 0x8000),
            unary(Mnemonic::STOP),
        ]);
        assert_eq!(cpu.step().unwrap(), StepOutcome::Continue);
        assert_eq!(cpu.registers().current().a, 0x8000);
        assert!(cpu.registers().current().n);
        assert!(!cpu.registers().current().z);
        assert_eq!(cpu.registers().current().pc, 3);
        assert_eq!(cpu.step().unwrap(), StepOutcome::Stopped);
    }

    #[test]
    fn addition_overflow_and_carry() {
        let mut cpu = cpu_with(&[
            non_unary(Mnemonic::LDWA, AddrMode::I, 0x7FFF),
            non_unary(Mnemonic::ADDA, AddrMode::I, 1),
            unary(Mnemonic::STOP),
        ]);
        cpu.step().unwrap();
        cpu.step().unwrap();
        let regs = cpu.registers().current();
        assert_eq!(regs.a, 0x8000);
        assert!(regs.n && regs.v && !regs.c && !regs.z);
    }

    #[test]
    fn subtraction_of_zero_sets_carry() {
        let mut cpu = cpu_with(&[
            non_unary(Mnemonic::LDWA, AddrMode::I, 5),
            non_unary(Mnemonic::SUBA, AddrMode::I, 0),
            unary(Mnemonic::STOP),
        ]);
        cpu.step().unwrap();
        cpu.step().unwrap();
        let regs = cpu.registers().current();
        assert_eq!(regs.a, 5);
        assert!(regs.c && !regs.v);
    }

    #[test]
    fn store_and_indirect_load() {
        let mut cpu = cpu_with(&[
            non_unary(Mnemonic::LDWA, AddrMode::I, 0xBEEF),
            non_unary(Mnemonic::STWA, AddrMode::D, 0x0100),
            non_unary(Mnemonic::LDWX, AddrMode::D, 0x0100),
            unary(Mnemonic::STOP),
        ]);
        cpu.step().unwrap();
        cpu.step().unwrap();
        assert_eq!(cpu.memory().get_word(0x0100), 0xBEEF);
        cpu.step().unwrap();
        assert_eq!(cpu.registers().current().x, 0xBEEF);
    }

    #[test]
    fn store_immediate_is_an_error() {
        // The assembler rejects this pairing, but raw object code can
        // still encode it.
        let mut cpu = cpu_with(&[non_unary(Mnemonic::STWA, AddrMode::I, 0)]);
        assert_eq!(cpu.step(), Err(CpuError::StoreImmediate(Mnemonic::STWA)));
    }

    #[test]
    fn call_and_ret_round_trip() {
        let mut cpu = cpu_with(&[
            non_unary(Mnemonic::CALL, AddrMode::I, 0x0010),
            unary(Mnemonic::STOP),
        ]);
        cpu.memory_mut().load_values(0x0010, &unary(Mnemonic::RET));
        cpu.step().unwrap();
        assert_eq!(cpu.registers().current().pc, 0x0010);
        assert_eq!(cpu.registers().current().sp, 0xFB8D);
        assert_eq!(cpu.memory().get_word(0xFB8D), 3);
        cpu.step().unwrap();
        assert_eq!(cpu.registers().current().pc, 3);
        assert_eq!(cpu.registers().current().sp, 0xFB8F);
    }

    #[test]
    fn branch_default_immediate() {
        let mut cpu = cpu_with(&[
            non_unary(Mnemonic::BR, AddrMode::I, 0x0006),
            non_unary(Mnemonic::LDWA, AddrMode::I, 1),
            unary(Mnemonic::STOP),
        ]);
        cpu.step().unwrap();
        assert_eq!(cpu.registers().current().pc, 0x0006);
        assert_eq!(cpu.run().unwrap(), StepOutcome::Stopped);
        assert_eq!(cpu.registers().current().a, 0);
    }

    #[test]
    fn bounded_loop_reports_exhaustion() {
        let mut cpu = cpu_with(&[non_unary(Mnemonic::BR, AddrMode::I, 0)]);
        cpu.set_max_steps(1000);
        assert_eq!(cpu.run(), Err(CpuError::MaxStepsExceeded(1000)));
    }

    #[test]
    fn breakpoint_stops_before_fetch() {
        let mut cpu = cpu_with(&[
            non_unary(Mnemonic::LDWA, AddrMode::I, 1),
            non_unary(Mnemonic::LDWA, AddrMode::I, 2),
            unary(Mnemonic::STOP),
        ]);
        cpu.breakpoint_added(3);
        assert_eq!(cpu.run().unwrap(), StepOutcome::Breakpoint);
        assert_eq!(cpu.registers().current().pc, 3);
        assert_eq!(cpu.registers().current().a, 1);
        // Resuming executes the breakpointed instruction.
        assert_eq!(cpu.run().unwrap(), StepOutcome::Stopped);
        assert_eq!(cpu.registers().current().a, 2);
    }

    #[test]
    fn step_over_completes_the_call() {
        let mut cpu = cpu_with(&[
            non_unary(Mnemonic::CALL, AddrMode::I, 0x0010),
            unary(Mnemonic::STOP),
        ]);
        cpu.memory_mut().load_values(
            0x0010,
            &[
                opcode(Mnemonic::LDWA, AddrMode::I),
                0x12,
                0x34,
                Mnemonic::RET.base_opcode(),
            ],
        );
        let depth = cpu.registers().current().sp;
        assert_eq!(cpu.step_over().unwrap(), StepOutcome::Continue);
        assert!(cpu.registers().current().sp >= depth);
        assert_eq!(cpu.registers().current().pc, 3);
        assert_eq!(cpu.registers().current().a, 0x1234);
    }

    #[test]
    fn trap_pushes_pcb_and_rettr_restores() {
        // A miniature operating system: the system stack vector and the
        // trap vector, plus a handler that immediately returns.
        let mut cpu = cpu_with(&[
            non_unary(Mnemonic::LDWA, AddrMode::I, 0x1234),
            non_unary(Mnemonic::DECO, AddrMode::I, 7),
            unary(Mnemonic::STOP),
        ]);
        let handler = 0x8000u16;
        let sys_sp = 0xFB00u16;
        cpu.memory_mut()
            .load_values(handler, &unary(Mnemonic::RETTR));
        cpu.memory_mut().load_values(0xFFF6, &sys_sp.to_be_bytes());
        cpu.memory_mut().load_values(0xFFFE, &handler.to_be_bytes());

        cpu.step().unwrap();
        cpu.step().unwrap(); // DECO traps
        let regs = *cpu.registers().current();
        assert_eq!(regs.pc, handler);
        assert_eq!(regs.sp, sys_sp - 10);
        // PCB: stored PC points past the 3-byte trap instruction.
        assert_eq!(cpu.memory().get_word(sys_sp - 5), 6);
        assert_eq!(cpu.memory().get_word(sys_sp - 9), 0x1234);

        cpu.step().unwrap(); // RETTR
        let regs = *cpu.registers().current();
        assert_eq!(regs.pc, 6);
        assert_eq!(regs.sp, 0xFB8F);
        assert_eq!(regs.a, 0x1234);
    }

    #[test]
    fn trap_without_handler_is_fatal() {
        let mut cpu = cpu_with(&[non_unary(Mnemonic::DECO, AddrMode::I, 7)]);
        assert_eq!(cpu.step(), Err(CpuError::TrapWithoutHandler));
    }

    #[test]
    fn empty_input_port_suspends_and_resumes() {
        let mut memory = MainMemory::new();
        memory.construct(&[
            MemoryChipSpec {
                kind: ChipKind::Ram,
                base: 0,
                span: 0xFC15,
            },
            MemoryChipSpec {
                kind: ChipKind::InputPort,
                base: 0xFC15,
                span: 1,
            },
            MemoryChipSpec {
                kind: ChipKind::Ram,
                base: 0xFC16,
                span: 0x1000,
            },
        ]);
        let program: Vec<u8> = vec![
            opcode(Mnemonic::LDBA, AddrMode::D),
            0xFC,
            0x15,
            Mnemonic::STOP.base_opcode(),
        ];
        memory.load_values(0, &program);
        let mut cpu = IsaCpu::new(memory);

        assert_eq!(cpu.step().unwrap(), StepOutcome::AwaitingInput(0xFC15));
        // The instruction did not execute; PC is still at the load.
        assert_eq!(cpu.registers().current().pc, 0);

        cpu.memory_mut().on_input_received(0xFC15, b"Q");
        assert_eq!(cpu.step().unwrap(), StepOutcome::Continue);
        assert_eq!(cpu.registers().current().a & 0xFF, u16::from(b'Q'));
    }
}
