//! Run-time stack-trace engine.
//!
//! The CPU calls [`StackTracer::calculate_start`] before executing an
//! instruction and [`StackTracer::calculate_end`] after, and the engine
//! rebuilds the user and operating-system call stacks plus a heap model from
//! the trace tags collected at assembly time. The engine is entirely
//! passive: corruption marks the trace unreliable but never disturbs the
//! simulation.

use crate::isa::Mnemonic;
use crate::tag::{SymbolFormat, TraceInfo, TraceType};
use std::fmt;
use std::rc::Rc;

/// One traced primitive cell.
#[derive(Clone, Debug, PartialEq)]
pub struct TypedSlot {
    pub name: String,
    pub format: SymbolFormat,
}

impl TypedSlot {
    pub fn size(&self) -> u16 {
        self.format.size()
    }
}

/// A group of typed cells allocated together. `base_sp` is the stack pointer
/// before the allocation; the frame occupies the bytes below it.
#[derive(Clone, Debug, PartialEq)]
pub struct Frame {
    pub base_sp: u16,
    pub items: Vec<TypedSlot>,
    /// A partially popped frame no longer matches its allocation site.
    pub orphaned: bool,
}

impl Frame {
    pub fn size(&self) -> u16 {
        self.items.iter().map(TypedSlot::size).sum()
    }
}

#[derive(Clone, Debug, PartialEq)]
enum StackEntry {
    CallMarker(u16),
    Frame(Frame),
}

/// Reconstructed call stack: call markers interleaved with typed frames.
#[derive(Clone, Debug)]
pub struct CallStack {
    entries: Vec<StackEntry>,
    intact: bool,
    error: Option<String>,
}

impl CallStack {
    pub fn new() -> CallStack {
        CallStack {
            entries: Vec::new(),
            intact: true,
            error: None,
        }
    }

    pub fn call(&mut self, address: u16) {
        self.entries.push(StackEntry::CallMarker(address));
    }

    /// Pops the top entry if it is a call marker.
    pub fn ret(&mut self) -> bool {
        match self.entries.last() {
            Some(StackEntry::CallMarker(_)) => {
                self.entries.pop();
                true
            }
            _ => false,
        }
    }

    pub fn push_frame(&mut self, frame: Frame) {
        self.entries.push(StackEntry::Frame(frame));
    }

    /// Pops the top frame if its size is exactly `size`.
    pub fn pop_frame(&mut self, size: u16) -> bool {
        match self.entries.last() {
            Some(StackEntry::Frame(frame)) if frame.size() == size => {
                self.entries.pop();
                true
            }
            _ => false,
        }
    }

    /// Pops complete items totalling `size` bytes off the top frame and
    /// marks the remainder orphaned. Fails if an item would be split or the
    /// frame is too small.
    pub fn pop_and_orphan(&mut self, size: u16) -> bool {
        let frame = match self.entries.last_mut() {
            Some(StackEntry::Frame(frame)) if frame.size() > size => frame,
            _ => return false,
        };
        let mut remaining = size;
        while remaining > 0 {
            let top = match frame.items.last() {
                Some(item) => item.size(),
                None => return false,
            };
            if top > remaining {
                return false;
            }
            frame.items.pop();
            remaining -= top;
        }
        frame.orphaned = true;
        true
    }

    /// Size of the top frame, zero when the top entry is not a frame.
    pub fn top_frame_size(&self) -> u16 {
        match self.entries.last() {
            Some(StackEntry::Frame(frame)) => frame.size(),
            _ => 0,
        }
    }

    pub fn frames(&self) -> impl Iterator<Item = &Frame> {
        self.entries.iter().filter_map(|e| match e {
            StackEntry::Frame(frame) => Some(frame),
            _ => None,
        })
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_intact(&self) -> bool {
        self.intact
    }

    pub fn set_intact(&mut self, intact: bool) {
        self.intact = intact;
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn set_error(&mut self, message: &str) {
        self.error = Some(message.to_string());
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.intact = true;
        self.error = None;
    }
}

impl Default for CallStack {
    fn default() -> CallStack {
        CallStack::new()
    }
}

impl fmt::Display for CallStack {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for entry in self.entries.iter().rev() {
            match entry {
                StackEntry::CallMarker(addr) => writeln!(f, "call @ {:04X}", addr)?,
                StackEntry::Frame(frame) => {
                    writeln!(
                        f,
                        "frame[{}{}] @ {:04X}",
                        frame.size(),
                        if frame.orphaned { ", orphaned" } else { "" },
                        frame.base_sp
                    )?;
                }
            }
        }
        Ok(())
    }
}

/// Heap model fed by traced calls to `malloc`.
#[derive(Clone, Debug, Default)]
pub struct HeapTrace {
    frames: Vec<Frame>,
    intact: bool,
    can_add_new: bool,
    in_malloc: bool,
    error: Option<String>,
}

impl HeapTrace {
    pub fn push_heap(&mut self, address: u16, items: Vec<TypedSlot>) {
        self.frames.push(Frame {
            base_sp: address,
            items,
            orphaned: false,
        });
    }

    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    pub fn is_intact(&self) -> bool {
        self.intact
    }

    pub fn set_intact(&mut self, intact: bool) {
        self.intact = intact;
    }

    pub fn can_add_new(&self) -> bool {
        self.can_add_new
    }

    pub fn set_can_add_new(&mut self, can: bool) {
        self.can_add_new = can;
    }

    pub fn in_malloc(&self) -> bool {
        self.in_malloc
    }

    pub fn set_in_malloc(&mut self, in_malloc: bool) {
        self.in_malloc = in_malloc;
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn set_error(&mut self, message: &str) {
        self.error = Some(message.to_string());
    }

    pub fn clear(&mut self) {
        self.frames.clear();
        self.intact = false;
        self.can_add_new = false;
        self.in_malloc = false;
        self.error = None;
    }
}

/// Addresses of traced globals.
#[derive(Clone, Debug, Default)]
pub struct GlobalTrace {
    tags: Vec<(u16, TypedSlot)>,
}

impl GlobalTrace {
    pub fn set_tags(&mut self, tags: Vec<(u16, TypedSlot)>) {
        self.tags = tags;
    }

    pub fn tags(&self) -> &[(u16, TypedSlot)] {
        &self.tags
    }

    pub fn clear(&mut self) {
        self.tags.clear();
    }
}

/// The complete reconstructed memory picture handed to display consumers.
#[derive(Clone, Debug, Default)]
pub struct MemoryTrace {
    pub user_stack: CallStack,
    pub os_stack: CallStack,
    pub heap: HeapTrace,
    pub globals: GlobalTrace,
    active_os: bool,
    trace_warnings: bool,
}

impl MemoryTrace {
    pub fn active_stack(&self) -> &CallStack {
        if self.active_os {
            &self.os_stack
        } else {
            &self.user_stack
        }
    }

    fn active_stack_mut(&mut self) -> &mut CallStack {
        if self.active_os {
            &mut self.os_stack
        } else {
            &mut self.user_stack
        }
    }

    pub fn has_trace_warnings(&self) -> bool {
        self.trace_warnings
    }

    pub fn set_trace_warnings(&mut self, warnings: bool) {
        self.trace_warnings = warnings;
    }

    pub fn clear(&mut self) {
        self.user_stack.clear();
        self.os_stack.clear();
        self.heap.clear();
        self.globals.clear();
        self.active_os = false;
        self.trace_warnings = false;
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum StackAction {
    Call,
    Locals,
    Params,
}

/// Observes the instruction stream and maintains the [`MemoryTrace`].
pub struct StackTracer {
    trace: MemoryTrace,
    user_actions: Vec<StackAction>,
    os_actions: Vec<StackAction>,
    is_trapped: bool,
    first_line_after_call: bool,
    info: Option<TraceInfo>,
    heap_ptr: u16,
}

impl StackTracer {
    pub fn new() -> StackTracer {
        StackTracer {
            trace: MemoryTrace::default(),
            user_actions: Vec::new(),
            os_actions: Vec::new(),
            is_trapped: false,
            first_line_after_call: false,
            info: None,
            heap_ptr: 0,
        }
    }

    pub fn memory_trace(&self) -> &MemoryTrace {
        &self.trace
    }

    /// Adopts a program's static trace information and resets.
    pub fn prime(&mut self, info: &TraceInfo) {
        self.info = Some(info.clone());
        self.reset();
    }

    /// Clears the dynamic state and re-derives the initial picture from the
    /// adopted trace information.
    pub fn reset(&mut self) {
        self.trace.clear();
        self.user_actions.clear();
        self.os_actions.clear();
        self.is_trapped = false;
        self.first_line_after_call = false;
        self.heap_ptr = 0;

        let info = match &self.info {
            Some(info) => info,
            None => {
                self.trace.set_trace_warnings(true);
                self.trace.user_stack.set_intact(false);
                return;
            }
        };

        // Only trace when tags were present and assembled cleanly.
        let warnings = !info.had_trace_tags || info.static_trace_error;
        self.trace.set_trace_warnings(warnings);
        self.trace.user_stack.set_intact(!warnings);
        if warnings {
            self.trace.heap.set_intact(false);
            self.trace.heap.set_can_add_new(false);
            return;
        }

        let mut tags = Vec::new();
        for trace_type in info.static_alloc_types.values() {
            if let Some(symbol) = trace_type.symbol() {
                let mut address = symbol.borrow().value();
                for (format, name) in trace_type.to_primitives() {
                    tags.push((address, TypedSlot { name, format }));
                    address = address.wrapping_add(format.size());
                }
            }
        }
        self.trace.globals.set_tags(tags);

        if info.has_heap_malloc {
            if let Some(heap) = &info.heap_ptr {
                self.heap_ptr = heap.borrow().value();
            }
            self.trace.heap.set_intact(true);
            self.trace.heap.set_can_add_new(true);
        }
    }

    /// Pre-execution hook: traps switch to the operating-system stack,
    /// `RETTR` switches back.
    pub fn calculate_start(&mut self, mnemonic: Mnemonic) {
        if mnemonic.is_trap() {
            self.is_trapped = true;
            self.trace.active_os = true;
        } else if mnemonic == Mnemonic::RETTR {
            self.is_trapped = false;
            self.trace.active_os = false;
        }
    }

    /// Post-execution hook. `opspec` is the evaluated operand, `sp` and `pc`
    /// are start-of-instruction values, `acc` the accumulator after the
    /// step.
    pub fn calculate_end(&mut self, mnemonic: Mnemonic, opspec: u16, sp: u16, pc: u16, acc: u16) {
        use Mnemonic::*;

        if self.info.is_none()
            || self.trace.has_trace_warnings()
            || !self.trace.active_stack().is_intact()
            // Only user-program execution is traced.
            || self.is_trapped
        {
            return;
        }

        let (symlist, is_malloc_call) = {
            let info = self.info.as_ref().unwrap();
            (
                info.instr_to_symlist.get(&pc).cloned(),
                info.malloc_calls.contains(&pc),
            )
        };

        match mnemonic {
            CALL => {
                self.first_line_after_call = true;
                self.trace.active_stack_mut().call(sp.wrapping_sub(2));
                self.active_actions().push(StackAction::Call);

                if !self.trace.heap.can_add_new() || !is_malloc_call {
                    return;
                }
                match symlist {
                    Some(types) => {
                        self.trace.heap.set_in_malloc(true);
                        let slots = flatten(&types, false);
                        self.trace.heap.push_heap(self.heap_ptr, slots);
                        self.heap_ptr = self.heap_ptr.wrapping_add(acc);
                    }
                    None => {
                        self.trace.heap.set_can_add_new(false);
                        self.trace
                            .heap
                            .set_error("Added object to heap with no trace tags.");
                    }
                }
            }

            RET => match self.active_actions().pop() {
                Some(StackAction::Call) => {
                    if self.trace.active_stack_mut().ret() {
                        self.first_line_after_call = true;
                        self.trace.heap.set_in_malloc(false);
                    } else {
                        self.corrupt("ERROR: Executed a return, expected a ADD- or SUBSP.");
                    }
                }
                _ => {
                    self.corrupt("ERROR: Unspecified error during return (e.g. stack was empty).");
                }
            },

            SUBSP => {
                if let Some(types) = &symlist {
                    let size: u16 = types.iter().map(|t| t.size()).sum();
                    if size != opspec {
                        self.corrupt("ERROR: Operand of SUBSP does not match size of trace tags.");
                        return;
                    }
                }
                // Frames below a fresh call are locals; otherwise they are
                // outgoing parameters.
                let action = if self.first_line_after_call {
                    StackAction::Locals
                } else {
                    StackAction::Params
                };
                if let Some(types) = &symlist {
                    let frame = Frame {
                        base_sp: sp,
                        items: flatten(types, true),
                        orphaned: false,
                    };
                    self.trace.active_stack_mut().push_frame(frame);
                }
                self.active_actions().push(action);
            }

            ADDSP => {
                let mut size = 0;
                if let Some(types) = &symlist {
                    size = types.iter().map(|t| t.size()).sum();
                    if size != opspec {
                        self.corrupt("ERROR: Operand of ADDSP does not match size of trace tags.");
                        return;
                    }
                } else if self.active_actions().is_empty() {
                    self.corrupt("ERROR: Executed ADDSP, but no items are eligible to be popped.");
                    return;
                } else {
                    self.corrupt("ERROR: Executed ADDSP, but no trace info was available.");
                    return;
                }
                match self.active_actions().pop() {
                    Some(StackAction::Locals) => {
                        if !self.trace.active_stack_mut().pop_frame(size) {
                            self.corrupt("ERROR: Executed ADDSP when a return was expected.");
                        }
                    }
                    Some(StackAction::Params) => self.pop_params(size),
                    _ => {
                        self.corrupt(
                            "ERROR: An unspecified error occurred in ADDSP (e.g. the stack was empty).",
                        );
                    }
                }
            }

            BR | BRLE | BRLT | BREQ | BRNE | BRGE | BRGT | BRV | BRC => {
                self.first_line_after_call = true;
            }

            _ => {
                self.first_line_after_call = false;
            }
        }
    }

    // A full-frame pop retires its action; a partial pop orphans the frame
    // and leaves the action in place.
    fn pop_params(&mut self, size: u16) {
        let top = self.trace.active_stack().top_frame_size();
        if top > size {
            if self.trace.active_stack_mut().pop_and_orphan(size) {
                self.active_actions().push(StackAction::Params);
            } else {
                self.corrupt("ERROR: Failed to pop correct number of bytes in ADDSP.");
            }
            return;
        }

        let mut remaining = size;
        let mut ok = true;
        self.active_actions().push(StackAction::Params);
        while remaining > 0 && ok {
            let top = self.trace.active_stack().top_frame_size();
            if top == 0 || top > remaining {
                ok = false;
                break;
            }
            ok &= self.trace.active_stack_mut().pop_frame(top);
            remaining -= top;
            self.active_actions().pop();
        }
        if !ok {
            self.corrupt("ERROR: Failed to pop correct number of bytes in ADDSP.");
        }
    }

    fn corrupt(&mut self, message: &str) {
        let stack = self.trace.active_stack_mut();
        stack.set_error(message);
        stack.set_intact(false);
    }

    fn active_actions(&mut self) -> &mut Vec<StackAction> {
        if self.trace.active_os {
            &mut self.os_actions
        } else {
            &mut self.user_actions
        }
    }
}

impl Default for StackTracer {
    fn default() -> StackTracer {
        StackTracer::new()
    }
}

/// Expands a tag list into display slots. `SUBSP` lists are reversed so the
/// display order matches downward stack growth.
fn flatten(types: &[Rc<TraceType>], reversed: bool) -> Vec<TypedSlot> {
    let mut slots: Vec<TypedSlot> = types
        .iter()
        .flat_map(|t| t.to_primitives())
        .map(|(format, name)| TypedSlot { name, format })
        .collect();
    if reversed {
        slots.reverse();
    }
    slots
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbol::{SymbolTable, SymbolValue};
    use std::collections::HashMap;

    fn tagged_info(call_addr: u16, subsp_addr: u16, addsp_addr: u16) -> TraceInfo {
        let mut table = SymbolTable::new();
        let p1 = table.set_value("p1", SymbolValue::Numeric(0));
        let p2 = table.set_value("p2", SymbolValue::Numeric(2));
        let list: Vec<Rc<TraceType>> = vec![
            Rc::new(TraceType::Primitive {
                symbol: p1,
                format: SymbolFormat::F2D,
            }),
            Rc::new(TraceType::Primitive {
                symbol: p2,
                format: SymbolFormat::F2D,
            }),
        ];
        let mut info = TraceInfo::new();
        info.had_trace_tags = true;
        let mut map = HashMap::new();
        map.insert(subsp_addr, list.clone());
        map.insert(addsp_addr, list);
        info.instr_to_symlist = map;
        let _ = call_addr;
        info
    }

    #[test]
    fn balanced_call_leaves_empty_stack() {
        let mut tracer = StackTracer::new();
        let info = tagged_info(0x0000, 0x0010, 0x0016);
        tracer.prime(&info);

        // CALL at 0x0000 with SP = 0xFB8F.
        tracer.calculate_start(Mnemonic::CALL);
        tracer.calculate_end(Mnemonic::CALL, 0x0010, 0xFB8F, 0x0000, 0);
        // SUBSP 4 right after the call allocates locals.
        tracer.calculate_end(Mnemonic::SUBSP, 4, 0xFB8D, 0x0010, 0);
        assert_eq!(tracer.memory_trace().active_stack().top_frame_size(), 4);
        // ADDSP 4 releases them.
        tracer.calculate_end(Mnemonic::ADDSP, 4, 0xFB89, 0x0016, 0);
        // RET unwinds the call marker.
        tracer.calculate_end(Mnemonic::RET, 0, 0xFB8D, 0x0019, 0);

        let trace = tracer.memory_trace();
        assert!(trace.active_stack().is_intact());
        assert!(trace.active_stack().is_empty());
        assert!(!trace.has_trace_warnings());
    }

    #[test]
    fn size_mismatch_marks_stack_corrupt() {
        let mut tracer = StackTracer::new();
        let info = tagged_info(0x0000, 0x0010, 0x0016);
        tracer.prime(&info);

        tracer.calculate_end(Mnemonic::CALL, 0x0010, 0xFB8F, 0x0000, 0);
        // Operand disagrees with the 4 bytes of tags.
        tracer.calculate_end(Mnemonic::SUBSP, 6, 0xFB8D, 0x0010, 0);
        assert!(!tracer.memory_trace().active_stack().is_intact());
        assert!(tracer.memory_trace().active_stack().error().is_some());
    }

    #[test]
    fn ret_without_call_is_corruption() {
        let mut tracer = StackTracer::new();
        let mut info = TraceInfo::new();
        info.had_trace_tags = true;
        tracer.prime(&info);

        tracer.calculate_end(Mnemonic::RET, 0, 0xFB8F, 0x0000, 0);
        assert!(!tracer.memory_trace().active_stack().is_intact());
    }

    #[test]
    fn trap_switches_to_os_stack() {
        let mut tracer = StackTracer::new();
        let mut info = TraceInfo::new();
        info.had_trace_tags = true;
        tracer.prime(&info);

        tracer.calculate_start(Mnemonic::DECO);
        assert!(std::ptr::eq(
            tracer.memory_trace().active_stack() as *const _,
            &tracer.memory_trace().os_stack as *const _
        ));
        tracer.calculate_start(Mnemonic::RETTR);
        assert!(std::ptr::eq(
            tracer.memory_trace().active_stack() as *const _,
            &tracer.memory_trace().user_stack as *const _
        ));
    }

    #[test]
    fn untraced_program_reports_warnings() {
        let mut tracer = StackTracer::new();
        tracer.prime(&TraceInfo::new());
        assert!(tracer.memory_trace().has_trace_warnings());
        assert!(!tracer.memory_trace().user_stack.is_intact());
    }

    #[test]
    fn partial_param_pop_orphans_the_frame() {
        let mut stack = CallStack::new();
        stack.push_frame(Frame {
            base_sp: 0xFB8F,
            items: vec![
                TypedSlot {
                    name: "a".into(),
                    format: SymbolFormat::F2D,
                },
                TypedSlot {
                    name: "b".into(),
                    format: SymbolFormat::F2D,
                },
            ],
            orphaned: false,
        });
        assert!(stack.pop_and_orphan(2));
        assert_eq!(stack.top_frame_size(), 2);
        assert!(stack.frames().next().unwrap().orphaned);
        // A pop that would split an item fails.
        assert!(!stack.pop_and_orphan(1));
    }
}
