use crate::*;
use pep9::cpu::{IsaCpu, StepOutcome};
use pep9::memory::{MainMemory, MemoryDevice};


fn assemble_ok(source: &str) -> AsmProgram {
    let (program, warnings) = assemble_user_program(source, None).unwrap();
    assert!(
        warnings.is_empty(),
        "unexpected warnings: {:?}",
        warnings
    );
    program
}

fn first_error(source: &str) -> String {
    assemble_user_program(source, None)
        .err()
        .expect("expected assembly to fail")
        .remove(0)
        .message
}

#[test]
fn minimal_program() {
    let program = assemble_ok("STOP\n.END\n");
    assert_eq!(program.object_code(), vec![0x00]);
    assert_eq!(program.object_code_length(), 1);
}

#[test]
fn object_length_matches_stream() {
    let source = "\
this:    .WORD   7
str:     .ASCII  \"hello\"
         .ALIGN  2
arr:     .BLOCK  6
main:    LDWA    this,d
         STOP
         .END
";
    let program = assemble_ok(source);
    assert_eq!(
        program.object_code_length() as usize,
        program.object_code().len()
    );
    // word + 5 ascii bytes + 1 align pad + 6 block + 3 instr + 1 stop
    assert_eq!(program.object_code().len(), 2 + 5 + 1 + 6 + 3 + 1);
}

#[test]
fn immediate_add_and_output() {
    let source = "\
charOut: .EQUATE 0xFC16
         LDWA    0x0041,i
         STBA    charOut,d
         STOP
         .END
";
    let program = assemble_ok(source);
    assert_eq!(
        program.object_code(),
        vec![0xC0, 0x00, 0x41, 0xF1, 0xFC, 0x16, 0x00]
    );
}

#[test]
fn branch_defaults_to_immediate() {
    let source = "\
         BR      end
         STOP
end:     STOP
         .END
";
    let program = assemble_ok(source);
    assert_eq!(program.object_code(), vec![0x12, 0x00, 0x04, 0x00, 0x00]);
}

#[test]
fn branch_accepts_indexed_mode() {
    let source = "\
         BR      table,x
table:   .ADDRSS table
         .END
";
    let program = assemble_ok(source);
    assert_eq!(program.object_code()[0], 0x13);
}

#[test]
fn chars_strings_and_escapes() {
    let source = "\
ch:      .BYTE   'A'
nl:      .BYTE   '\\n'
two:     .WORD   \"up\"
hex:     .BYTE   '\\x7F'
         .END
";
    let program = assemble_ok(source);
    assert_eq!(program.object_code(), vec![0x41, 0x0A, 0x75, 0x70, 0x7F]);
}

#[test]
fn equate_defines_without_bytes() {
    let source = "\
limit:   .EQUATE 10
         LDWA    limit,i
         STOP
         .END
";
    let program = assemble_ok(source);
    assert_eq!(program.object_code(), vec![0xC0, 0x00, 0x0A, 0x00]);
    let limit = program.symbol_table().get("limit").unwrap();
    assert_eq!(limit.borrow().value(), 10);
}

#[test]
fn negative_operands_store_twos_complement() {
    let program = assemble_ok("         LDWA -1,i\n         .END\n");
    assert_eq!(program.object_code(), vec![0xC0, 0xFF, 0xFF]);
}

#[test]
fn missing_end_is_fatal() {
    assert_eq!(first_error("STOP\n"), ";ERROR: Missing .END sentinel.");
}

#[test]
fn burn_is_reserved_for_operating_systems() {
    assert_eq!(
        first_error(".BURN 0xFFFF\nSTOP\n.END\n"),
        ";ERROR: Only operating systems may contain a .BURN."
    );
}

#[test]
fn undefined_symbols_are_reported() {
    let errors = assemble_user_program("         BR nowhere\n         .END\n", None)
        .err()
        .unwrap();
    assert_eq!(errors[0].message, ";ERROR: Symbol \"nowhere\" is undefined.");
    assert_eq!(errors[0].line, 0);
}

#[test]
fn multiply_defined_symbol_is_fatal() {
    assert_eq!(
        first_error("a: STOP\na: STOP\n.END\n"),
        ";ERROR: Symbol a was previously defined."
    );
}

#[test]
fn long_symbols_are_rejected() {
    assert_eq!(
        first_error("verylongname: STOP\n.END\n"),
        ";ERROR: Symbol verylongname cannot have more than eight characters."
    );
}

#[test]
fn store_rejects_immediate_mode() {
    assert_eq!(
        first_error("         STWA 5,i\n         .END\n"),
        ";ERROR: Illegal addressing mode for this instruction."
    );
}

#[test]
fn missing_addressing_mode_is_fatal() {
    assert_eq!(
        first_error("         LDWA 5\n         .END\n"),
        ";ERROR: Addressing mode required for this instruction."
    );
}

#[test]
fn unary_rejects_an_operand() {
    assert_eq!(
        first_error("         STOP 5\n         .END\n"),
        ";ERROR: Comment expected following instruction."
    );
}

#[test]
fn byte_range_is_enforced() {
    assert_eq!(
        first_error("         .BYTE 256\n         .END\n"),
        ";ERROR: Decimal constant is out of byte range (-128..255)."
    );
}

#[test]
fn invalid_mnemonic_is_reported() {
    assert_eq!(
        first_error("         LDWQ 5,i\n         .END\n"),
        ";ERROR: Invalid mnemonic."
    );
}

#[test]
fn malformed_character_constant() {
    let message = first_error("         LDBA 'ab',i\n         .END\n");
    assert!(message.starts_with(";ERROR:"), "got: {}", message);
}

#[test]
fn equate_requires_a_symbol() {
    assert_eq!(
        first_error("         .EQUATE 5\n         .END\n"),
        ";ERROR: .EQUATE must have a symbol definition."
    );
}

#[test]
fn source_after_end_is_ignored(){
    let program = assemble_ok("STOP\n.END\n@#$ not even tokens\n");
    assert_eq!(program.object_code(), vec![0x00]);
}

#[test]
fn formatted_source_is_a_fixed_point() {
    let source = "\
num:     .WORD   42          ;the answer
main:    LDWA    num,d
         ADDA    1,i         ;bump
         STWA    num,d
         BR      main
         .END
";
    let program = assemble_ok(source);
    let formatted = program.format_source();
    let reassembled = assemble_ok(&formatted);
    assert_eq!(reassembled.format_source(), formatted);
    assert_eq!(reassembled.object_code(), program.object_code());
}

#[test]
fn listing_carries_addresses_and_bytes() {
    let source = "\
num:     .WORD   42
main:    LDWA    num,d
         STOP
         .END
";
    let program = assemble_ok(source);
    let listing = program.assembler_listing();
    assert!(listing.contains("0000  002A"));
    assert!(listing.contains("0002  C10000"));
    assert!(listing.contains("Symbol table"));
    assert!(listing.contains("num"));
}

#[test]
fn breakpoints_map_through_addresses() {
    let source = "\
main:    LDWA    0,i
         STOP
         .END
";
    let (mut program, _) = assemble_user_program(source, None).unwrap();
    assert!(program.set_breakpoint(0, true));
    assert!(program.code_at_address(0).unwrap().has_breakpoint());
    // Address 1 is the middle of an instruction.
    assert!(!program.set_breakpoint(1, true));
}

// --- Operating-system assembly -------------------------------------------

const TINY_OS: &str = "\
wordTemp:.BLOCK  2           ;Scratch storage
         .ALIGN  2
charIn:  .BLOCK  1           ;Input port
charOut: .BLOCK  1           ;Output port
         .BURN   0xFFFF
init:    STOP
         .ADDRSS init
         .END
";

#[test]
fn burn_relocates_to_the_top_of_memory() {
    let (os, warnings) = assemble_operating_system(TINY_OS, true).unwrap();
    assert!(warnings.is_empty());
    assert_eq!(os.burn_value(), Some(0xFFFF));
    assert_eq!(os.start_rom_address(), Some(0xFFFD));

    // Only code at or after the burn emits object code.
    assert_eq!(os.object_code(), vec![0x00, 0xFF, 0xFD]);

    // Every emitted entry lands between the ROM start and the burn value.
    for entry in os.entries() {
        if entry.header.emit_object_code && entry.object_code_length() > 0 {
            let address = entry.header.memory_address;
            assert!(address >= 0xFFFD && address <= 0xFFFF);
        }
    }

    let table = os.symbol_table();
    assert_eq!(table.get("charOut").unwrap().borrow().value(), 0xFFFC);
    assert_eq!(table.get("charIn").unwrap().borrow().value(), 0xFFFB);
    assert_eq!(table.get("init").unwrap().borrow().value(), 0xFFFD);
}

#[test]
fn operating_system_needs_exactly_one_burn() {
    let errors = assemble_operating_system("STOP\n.END\n", false)
        .err()
        .unwrap();
    assert_eq!(
        errors[0].message,
        ";ERROR: Operating systems must contain exactly 1 .BURN."
    );
}

#[test]
fn forced_burn_value_is_checked() {
    let errors = assemble_operating_system(".BURN 0xF000\nSTOP\n.END\n", true)
        .err()
        .unwrap();
    assert_eq!(
        errors[0].message,
        ";ERROR: .BURN must have an argument of 0xFFFF."
    );
}

#[test]
fn user_program_imports_port_symbols() {
    let (os, _) = assemble_operating_system(TINY_OS, true).unwrap();
    let source = "\
         LDBA    charIn,d
         STBA    charOut,d
         STOP
         .END
";
    let (program, _) = assemble_user_program(source, Some(os.symbol_table())).unwrap();
    let object = program.object_code();
    // LDBA charIn,d with charIn imported from the operating system.
    assert_eq!(&object[0..3], &[0xD1, 0xFF, 0xFB]);
    assert_eq!(&object[3..6], &[0xF1, 0xFF, 0xFC]);
}

// --- Trace tags -----------------------------------------------------------

#[test]
fn trace_tags_collect_on_globals_and_stack() {
    let source = "\
p1:      .EQUATE 0           ;#2d
p2:      .EQUATE 2           ;#2d
num:     .BLOCK  2           ;#2d
main:    SUBSP   4,i         ;#p1 #p2
         CALL    proc
         ADDSP   4,i         ;#p1 #p2
         STOP
proc:    RET
         .END
";
    let (program, warnings) = assemble_user_program(source, None).unwrap();
    assert!(warnings.is_empty(), "warnings: {:?}", warnings);
    let info = program.trace_info();
    assert!(info.had_trace_tags);
    assert!(!info.static_trace_error);
    assert!(info.dynamic_alloc_types.contains_key("p1"));
    assert!(info.static_alloc_types.contains_key("num"));

    // The SUBSP at address 2 and ADDSP at address 8 both carry the list.
    let subsp = info.instr_to_symlist.get(&2).unwrap();
    assert_eq!(subsp.iter().map(|t| t.size()).sum::<u16>(), 4);
    assert!(info.instr_to_symlist.contains_key(&8));
}

#[test]
fn tag_size_mismatch_warns_without_failing() {
    let source = "\
p1:      .EQUATE 0           ;#2d
main:    SUBSP   4,i         ;#p1
         ADDSP   4,i         ;#p1
         STOP
         .END
";
    let (program, warnings) = assemble_user_program(source, None).unwrap();
    assert!(program.trace_info().static_trace_error);
    assert!(warnings
        .iter()
        .any(|w| w.message.contains("not equal to number of bytes")));
}

#[test]
fn struct_tags_resolve_to_a_fixed_point() {
    let source = "\
a:       .EQUATE 0           ;#2d
b:       .EQUATE 2           ;#1c
pair:    .BLOCK  3           ;#a #b
         STOP
         .END
";
    let (program, warnings) = assemble_user_program(source, None).unwrap();
    assert!(warnings.is_empty(), "warnings: {:?}", warnings);
    let info = program.trace_info();
    let pair = info.static_alloc_types.get("pair").unwrap();
    assert_eq!(pair.size(), 3);
}

#[test]
fn unresolvable_struct_tag_warns() {
    let source = "\
pair:    .BLOCK  4           ;#nothere
         STOP
         .END
";
    let (program, warnings) = assemble_user_program(source, None).unwrap();
    assert!(program.trace_info().static_trace_error);
    assert!(!warnings.is_empty());
}

#[test]
fn traced_call_runs_to_an_empty_stack() {
    let source = "\
p1:      .EQUATE 0           ;#2d
p2:      .EQUATE 2           ;#2d
main:    SUBSP   4,i         ;#p1 #p2
         CALL    proc
         ADDSP   4,i         ;#p1 #p2
         STOP
proc:    RET
         .END
";
    let (program, warnings) = assemble_user_program(source, None).unwrap();
    assert!(warnings.is_empty());

    let mut memory = MainMemory::new();
    memory.load_values(0, &program.object_code());
    let mut cpu = IsaCpu::new(memory);
    cpu.reset();
    cpu.init(program.trace_info());
    cpu.registers_mut().current_mut().sp = 0xFB8F;

    assert_eq!(cpu.run().unwrap(), StepOutcome::Stopped);
    let trace = cpu.memory_trace();
    assert!(trace.user_stack.is_intact());
    assert!(trace.user_stack.is_empty());
    assert!(!trace.has_trace_warnings());
}
