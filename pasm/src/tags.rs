//! Trace-tag extraction and resolution.
//!
//! Tags live inside comments: format tags such as `#2d` or `#2d4a` declare
//! primitives and arrays, symbol tags such as `#first` reference previously
//! declared cells to build parameter lists and struct types. Tag problems
//! degrade to warnings that mark the program untraceable without failing
//! assembly.

use crate::argument::AsmArgument;
use crate::code::{CodeEntry, EntryKind};
use crate::SourceError;
use lazy_static::lazy_static;
use pep9::isa::{AddrMode, Mnemonic};
use pep9::symbol::{SymbolTable, SymbolValue};
use pep9::tag::{SymbolFormat, TraceInfo, TraceType};
use regex::Regex;
use std::rc::Rc;

lazy_static! {
    static ref FORMAT_TAG: Regex = Regex::new(r"#(1c|1d|1h|2d|2h)(\d+a)?(\s|$)").unwrap();
    static ref ARRAY_TAG: Regex = Regex::new(r"#(1c|1d|1h|2d|2h)\d+a(\s|$)?").unwrap();
    static ref SYMBOL_TAG: Regex = Regex::new(r"#[a-zA-Z][a-zA-Z0-9]{0,7}").unwrap();
    static ref ARRAY_MULTIPLIER: Regex = Regex::new(r"(\d+)a").unwrap();
}

const BYTES_ALLOC_MISMATCH: &str =
    ";WARNING: Number of bytes allocated ({0}) not equal to number of bytes listed in trace tag ({1}).";
const BAD_TAG: &str = ";WARNING: {0} not specified in .EQUATE";
const NE_SYMBOL: &str = ";WARNING: Looked up a symbol that does not exist: {0}";
const NO_EQUATE: &str = ";WARNING: Looked for existing symbol not defined in .EQUATE: {0}";
const NO_SYMBOL: &str = ";WARNING: Trace tag with no symbol declaration";
const ILLEGAL_ADDR_MODE: &str =
    ";WARNING: Stack trace not possible unless immediate addressing is specified.";

fn msg1(template: &str, a: &dyn std::fmt::Display) -> String {
    template.replace("{0}", &a.to_string())
}

fn msg2(template: &str, a: &dyn std::fmt::Display, b: &dyn std::fmt::Display) -> String {
    template
        .replace("{0}", &a.to_string())
        .replace("{1}", &b.to_string())
}

pub fn has_format_tag(comment: &str) -> bool {
    FORMAT_TAG.is_match(comment)
}

pub fn has_array_tag(text: &str) -> bool {
    ARRAY_TAG.is_match(text)
}

pub fn has_symbol_tag(comment: &str) -> bool {
    SYMBOL_TAG.is_match(comment)
}

/// The comment from the first format tag onwards.
pub fn extract_type_tag(comment: &str) -> Option<&str> {
    FORMAT_TAG.find(comment).map(|m| &comment[m.start()..])
}

pub fn primitive_format(tag: &str) -> Option<SymbolFormat> {
    if tag.starts_with("#1c") {
        Some(SymbolFormat::F1C)
    } else if tag.starts_with("#1d") {
        Some(SymbolFormat::F1D)
    } else if tag.starts_with("#2d") {
        Some(SymbolFormat::F2D)
    } else if tag.starts_with("#1h") {
        Some(SymbolFormat::F1H)
    } else if tag.starts_with("#2h") {
        Some(SymbolFormat::F2H)
    } else {
        None
    }
}

/// Element count and format of an array tag such as `#2d4a`.
pub fn array_type(tag: &str) -> Option<(u16, SymbolFormat)> {
    let format = primitive_format(tag)?;
    let caps = ARRAY_MULTIPLIER.captures(tag)?;
    let count = caps.get(1)?.as_str().parse().ok()?;
    Some((count, format))
}

/// All symbol tags in a comment, `#` stripped. Format tags never match
/// because their first character is a digit.
pub fn extract_tag_list(comment: &str) -> Vec<String> {
    SYMBOL_TAG
        .find_iter(comment)
        .map(|m| m.as_str()[1..].to_string())
        .collect()
}

fn is_tag_eligible(entry: &CodeEntry) -> bool {
    match &entry.kind {
        EntryKind::Block { .. }
        | EntryKind::Word { .. }
        | EntryKind::Byte { .. }
        | EntryKind::Equate { .. } => true,
        EntryKind::NonUnary { mnemonic, .. } => match mnemonic {
            Mnemonic::CALL | Mnemonic::ADDSP | Mnemonic::SUBSP => true,
            _ => false,
        },
        _ => false,
    }
}

fn is_call_to_malloc(entry: &CodeEntry) -> bool {
    match &entry.kind {
        EntryKind::NonUnary {
            mnemonic: Mnemonic::CALL,
            argument,
            ..
        } => match argument {
            AsmArgument::SymbolRef(symbol) => symbol.borrow().name() == "malloc",
            _ => false,
        },
        _ => false,
    }
}

/// Per-line pass run as each entry is built: resolves primitive and array
/// format tags on storage directives. Returns a warning to record against
/// the line, if any.
pub fn scan_entry_tags(entry: &CodeEntry, trace: &mut TraceInfo) -> Option<String> {
    let comment = entry.header.comment.as_deref()?;
    if !has_format_tag(comment) && !has_symbol_tag(comment) {
        return None;
    }
    if !is_tag_eligible(entry) {
        return None;
    }

    let tag = match extract_type_tag(comment) {
        Some(tag) => tag,
        None => {
            // Symbol tags alone still mean the program is using tags; the
            // struct and parameter lists are resolved in the whole-program
            // pass.
            trace.had_trace_tags = true;
            return None;
        }
    };

    trace.had_trace_tags = true;

    // Tag lists on stack instructions are matched against their operand in
    // the whole-program pass.
    if let EntryKind::NonUnary { .. } = entry.kind {
        return None;
    }

    let symbol = match &entry.header.symbol {
        Some(symbol) => Rc::clone(symbol),
        None => {
            trace.static_trace_error = true;
            return Some(";WARNING: given trace tag, but no symbol".to_string());
        }
    };
    let name = symbol.borrow().name().to_string();

    let trace_type = if has_array_tag(tag) {
        let (count, format) = array_type(tag)?;
        Rc::new(TraceType::Array {
            symbol,
            format,
            count,
        })
    } else {
        let format = primitive_format(tag)?;
        Rc::new(TraceType::Primitive { symbol, format })
    };

    // Storage directives must allocate exactly as many bytes as the tag
    // declares; `.EQUATE` has no storage and defines a stack or heap cell.
    let declared = match &entry.kind {
        EntryKind::Block { argument } => Some(argument.value()),
        EntryKind::Byte { .. } => Some(1),
        EntryKind::Word { .. } => Some(2),
        _ => None,
    };
    match declared {
        Some(allocated) => {
            if allocated != trace_type.size() {
                trace.static_trace_error = true;
                return Some(msg2(BYTES_ALLOC_MISMATCH, &allocated, &trace_type.size()));
            }
            trace.static_alloc_types.insert(name, trace_type);
        }
        None => {
            trace.dynamic_alloc_types.insert(name, trace_type);
        }
    }
    None
}

fn parse_struct(
    symtab: &SymbolTable,
    name: &str,
    fields: &[String],
    trace: &mut TraceInfo,
) -> Result<Rc<TraceType>, String> {
    let symbol = match symtab.get(name) {
        Some(symbol) => symbol,
        None => return Err(msg1(NE_SYMBOL, &name)),
    };
    let mut field_types = Vec::new();
    for field in fields {
        if !symtab.exists(field) {
            trace.static_trace_error = true;
            return Err(msg1(NE_SYMBOL, field));
        }
        match trace.dynamic_alloc_types.get(field) {
            Some(t) => field_types.push(Rc::clone(t)),
            None => {
                trace.static_trace_error = true;
                return Err(msg1(NO_EQUATE, field));
            }
        }
    }
    Ok(Rc::new(TraceType::Struct {
        symbol,
        fields: field_types,
    }))
}

/// Whole-program pass, run after a successful parse: resolves struct tags
/// by fixed point, checks `ADDSP`/`SUBSP`/`CALL malloc` tag lists against
/// their operands, and activates the heap model when `malloc` and `heap`
/// exist as addresses.
pub fn handle_trace_tags(
    symtab: &SymbolTable,
    trace: &mut TraceInfo,
    entries: &[CodeEntry],
    warnings: &mut Vec<SourceError>,
) {
    let mut allocs = Vec::new();
    let mut structs = Vec::new();
    for (index, entry) in entries.iter().enumerate() {
        if trace.had_trace_tags {
            if let EntryKind::NonUnary { mnemonic, .. } = &entry.kind {
                match mnemonic {
                    Mnemonic::CALL | Mnemonic::ADDSP | Mnemonic::SUBSP => allocs.push(index),
                    _ => {}
                }
            }
        }
        if let Some(comment) = &entry.header.comment {
            // Symbol tags on storage lines declare struct types.
            if has_symbol_tag(comment) && !has_format_tag(comment) && !entry.is_instruction() {
                match entry.kind {
                    EntryKind::Block { .. }
                    | EntryKind::Equate { .. }
                    | EntryKind::Byte { .. }
                    | EntryKind::Word { .. } => structs.push(index),
                    _ => {}
                }
            }
        }
    }

    // Structs may reference each other, so parse to a fixed point; a pass
    // that makes no progress means the remainder is unresolvable.
    let mut work = structs;
    loop {
        let before = work.len();
        let mut i = 0;
        while i < work.len() {
            let index = work[i];
            let entry = &entries[index];
            let symbol = match &entry.header.symbol {
                Some(symbol) => Rc::clone(symbol),
                None => {
                    trace.static_trace_error = true;
                    i += 1;
                    continue;
                }
            };
            let name = symbol.borrow().name().to_string();
            let fields = extract_tag_list(entry.header.comment.as_deref().unwrap_or(""));
            match parse_struct(symtab, &name, &fields, trace) {
                Ok(trace_type) => {
                    work.remove(i);
                    match &entry.kind {
                        EntryKind::Block { argument } => {
                            if argument.value() != trace_type.size() {
                                trace.static_trace_error = true;
                                warnings.push(SourceError {
                                    line: entry.header.source_line,
                                    message: msg2(
                                        BYTES_ALLOC_MISMATCH,
                                        &argument.value(),
                                        &trace_type.size(),
                                    ),
                                });
                            } else {
                                trace.static_alloc_types.insert(name, trace_type);
                            }
                        }
                        _ => {
                            trace.dynamic_alloc_types.insert(name, trace_type);
                        }
                    }
                }
                Err(_) => i += 1,
            }
        }
        if work.len() == before {
            break;
        }
    }
    for index in work {
        let entry = &entries[index];
        match &entry.header.symbol {
            None => {
                trace.static_trace_error = true;
                warnings.push(SourceError {
                    line: entry.header.source_line,
                    message: NO_SYMBOL.to_string(),
                });
            }
            Some(symbol) => {
                let name = symbol.borrow().name().to_string();
                let fields = extract_tag_list(entry.header.comment.as_deref().unwrap_or(""));
                let message = parse_struct(symtab, &name, &fields, trace)
                    .err()
                    .unwrap_or_default();
                warnings.push(SourceError {
                    line: entry.header.source_line,
                    message,
                });
            }
        }
    }

    // Stack and heap allocation sites.
    for index in allocs {
        let entry = &entries[index];
        let (mnemonic, addr_mode) = match &entry.kind {
            EntryKind::NonUnary {
                mnemonic,
                addr_mode,
                ..
            } => (*mnemonic, *addr_mode),
            _ => continue,
        };
        let address = entry.header.memory_address as u16;
        if is_call_to_malloc(entry) {
            trace.malloc_calls.insert(address);
        }

        let comment = entry.header.comment.as_deref().unwrap_or("");
        let mut line_types: Vec<Rc<TraceType>> = Vec::new();
        let mut bad_tag = false;
        if has_symbol_tag(comment) && !has_format_tag(comment) {
            for tag in extract_tag_list(comment) {
                if !symtab.exists(&tag) || !trace.dynamic_alloc_types.contains_key(&tag) {
                    warnings.push(SourceError {
                        line: entry.header.source_line,
                        message: msg1(BAD_TAG, &tag),
                    });
                    trace.static_trace_error = true;
                    bad_tag = true;
                    continue;
                }
                line_types.push(Rc::clone(&trace.dynamic_alloc_types[&tag]));
            }
        } else if let Some(tag) = extract_type_tag(comment) {
            if has_array_tag(tag) {
                if let Some((count, format)) = array_type(tag) {
                    for _ in 0..count {
                        line_types.push(Rc::new(TraceType::LiteralPrimitive { format }));
                    }
                }
            } else if let Some(format) = primitive_format(tag) {
                line_types.push(Rc::new(TraceType::LiteralPrimitive { format }));
            }
        }
        if bad_tag {
            // The remaining checks are meaningless with a bad tag list.
            continue;
        }

        let size: u16 = line_types.iter().map(|t| t.size()).sum();
        let operand = entry.argument().map(|a| a.value()).unwrap_or(0);

        if addr_mode != AddrMode::I {
            trace.static_trace_error = true;
            warnings.push(SourceError {
                line: entry.header.source_line,
                message: ILLEGAL_ADDR_MODE.to_string(),
            });
            continue;
        }
        match mnemonic {
            Mnemonic::ADDSP | Mnemonic::SUBSP => {
                if operand != size {
                    trace.static_trace_error = true;
                    warnings.push(SourceError {
                        line: entry.header.source_line,
                        message: msg2(BYTES_ALLOC_MISMATCH, &operand, &size),
                    });
                } else {
                    trace.instr_to_symlist.insert(address, line_types);
                }
            }
            Mnemonic::CALL => {
                if is_call_to_malloc(entry) && !line_types.is_empty() {
                    trace.instr_to_symlist.insert(address, line_types);
                }
            }
            _ => {}
        }
    }

    // The heap is live only when both anchor symbols exist as addresses;
    // `malloc: .EQUATE 0` would not qualify.
    if let (Some(malloc), Some(heap)) = (symtab.get("malloc"), symtab.get("heap")) {
        let malloc_ok = match malloc.borrow().raw_value() {
            SymbolValue::Location(_) => true,
            _ => false,
        };
        let heap_ok = match heap.borrow().raw_value() {
            SymbolValue::Location(_) => true,
            _ => false,
        };
        if malloc_ok && heap_ok {
            trace.has_heap_malloc = true;
            trace.heap_ptr = Some(heap);
            trace.malloc_ptr = Some(malloc);
        }
    }
}
