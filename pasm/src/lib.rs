//! Assembler for the Pep/9 virtual machine.
//!
//! The entry points are [`assemble_user_program`] and
//! [`assemble_operating_system`]. Both lower newline-delimited source text
//! into an [`AsmProgram`]: an ordered list of code entries, a symbol table,
//! and the static trace information the run-time debugger consumes.
//!
//! Lines are parsed with [pest] one at a time, mirroring the language's
//! strictly line-oriented shape; anything after the `.END` sentinel is
//! ignored. Operating systems additionally carry a `.BURN` directive that
//! relocates the whole image so its last byte lands on the burn address,
//! with `.ALIGN` directives above the burn growing upward so the
//! memory-mapped port addresses stay stable when operating-system code is
//! edited.
//!
//! [pest]: https://docs.rs/pest/

pub mod argument;
pub mod code;
pub mod program;

mod parser;
mod tags;

#[cfg(test)]
mod test;

use matches::debug_assert_matches;
use pest::iterators::Pair;
use pest::Parser;

pub use crate::argument::AsmArgument;
pub use crate::program::AsmProgram;

use crate::argument::byte_string_length;
use crate::code::{CodeEntry, EntryHeader, EntryKind};
use crate::parser::{PepParser, Rule};
use pep9::isa::{AddrMode, Mnemonic};
use pep9::symbol::{SymbolTable, SymbolValue, MAX_SYMBOL_LEN};
use pep9::tag::TraceInfo;

/// One diagnostic, tied to a zero-based source line.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SourceError {
    pub line: u32,
    pub message: String,
}

/// Running totals about the `.BURN` directive of an operating system.
#[derive(Clone, Copy, Debug, Default)]
struct BurnInfo {
    count: u32,
    value: u16,
    /// Byte offset of the directive within the pre-relocation image.
    address: i32,
}

/// Assembles a user program. Fails if a `.BURN` appears, the `.END`
/// sentinel is missing, the image exceeds memory, or any symbol is left
/// undefined. `os_symbols` supplies the operating system's table so
/// `charIn` and `charOut` resolve without being defined locally.
///
/// On success the warning list may still carry trace-tag diagnostics; those
/// leave the program runnable but untraceable.
pub fn assemble_user_program(
    source: &str,
    os_symbols: Option<&SymbolTable>,
) -> Result<(AsmProgram, Vec<SourceError>), Vec<SourceError>> {
    let mut unit = Unit::parse(source)?;

    // Import the port addresses before hunting for undefined symbols.
    if let Some(os_table) = os_symbols {
        for port in &["charIn", "charOut"] {
            let local = match unit.symbols.get(port) {
                Some(local) => local,
                None => continue,
            };
            if !local.borrow().is_undefined() {
                continue;
            }
            if let Some(remote) = os_table.get(port) {
                let value = remote.borrow().value();
                local.borrow_mut().set_value(SymbolValue::External(value));
            }
        }
    }

    let mut errors = Vec::new();
    if !unit.dot_end {
        errors.push(whole_program_error(";ERROR: Missing .END sentinel."));
    } else if unit.byte_count > 65535 {
        errors.push(whole_program_error(
            ";ERROR: Object code size too large to fit into memory.",
        ));
    } else if unit.burn.count != 0 {
        errors.push(whole_program_error(
            ";ERROR: Only operating systems may contain a .BURN.",
        ));
    } else if unit.symbols.num_undefined() > 0 {
        errors.extend(unit.undefined_symbol_errors());
    }
    if !errors.is_empty() {
        errors.extend(unit.warnings);
        return Err(errors);
    }

    tags::handle_trace_tags(
        &unit.symbols,
        &mut unit.trace,
        &unit.entries,
        &mut unit.warnings,
    );
    let program = AsmProgram::new(unit.entries, unit.symbols, unit.trace);
    Ok((program, unit.warnings))
}

/// Assembles an operating system: exactly one `.BURN` is required, and with
/// `force_burn_at_ffff` its argument must be `0xFFFF`. After a successful
/// parse the image is relocated so its last byte lands on the burn value.
pub fn assemble_operating_system(
    source: &str,
    force_burn_at_ffff: bool,
) -> Result<(AsmProgram, Vec<SourceError>), Vec<SourceError>> {
    let mut unit = Unit::parse(source)?;

    let mut errors = Vec::new();
    if !unit.dot_end {
        errors.push(whole_program_error(";ERROR: Missing .END sentinel."));
    } else if unit.byte_count > 65535 {
        errors.push(whole_program_error(
            ";ERROR: Object code size too large to fit into memory.",
        ));
    } else if unit.symbols.num_undefined() > 0 {
        errors.extend(unit.undefined_symbol_errors());
    } else if unit.burn.count != 1 {
        errors.push(whole_program_error(
            ";ERROR: Operating systems must contain exactly 1 .BURN.",
        ));
    } else if force_burn_at_ffff && unit.burn.value != 0xFFFF {
        errors.push(whole_program_error(
            ";ERROR: .BURN must have an argument of 0xFFFF.",
        ));
    }
    if !errors.is_empty() {
        errors.extend(unit.warnings);
        return Err(errors);
    }

    // Code above the burn is address space only, not object code.
    for entry in &mut unit.entries {
        if entry.header.memory_address >= 0 && entry.header.memory_address < unit.burn.address {
            entry.header.emit_object_code = false;
        }
    }

    let byte_count = unit.byte_count as u16;
    let delta = unit
        .burn
        .value
        .wrapping_sub(byte_count)
        .wrapping_add(1);
    let start_rom_address = unit
        .burn
        .value
        .wrapping_sub(byte_count.wrapping_sub(unit.burn.address as u16))
        .wrapping_add(1);
    for entry in &mut unit.entries {
        entry.adjust_address(delta);
    }
    unit.symbols.apply_offset(delta);
    flip_aligns_above_burn(&mut unit.entries);

    // The operating system is not a translation of a C program; its tags,
    // if any, are not tracked.
    unit.trace.had_trace_tags = false;

    let program = AsmProgram::with_burn(
        unit.entries,
        unit.symbols,
        unit.trace,
        Some(start_rom_address),
        Some(unit.burn.value),
    );
    Ok((program, unit.warnings))
}

fn whole_program_error(message: &str) -> SourceError {
    SourceError {
        line: 0,
        message: message.to_string(),
    }
}

/// `.ALIGN` directives above the burn flip direction: instead of padding
/// after themselves they grow upward so their end stays flush with the next
/// item, keeping the port addresses at the top of the RAM section stable.
fn flip_aligns_above_burn(entries: &mut [CodeEntry]) {
    let burn_index = match entries
        .iter()
        .position(|e| matches!(e.kind, EntryKind::Burn { .. }))
    {
        Some(index) => index,
        None => return,
    };

    let mut rolling: u16 = 0;
    for entry in entries[..=burn_index].iter_mut().rev() {
        entry.adjust_address(rolling);
        if let Some(symbol) = &entry.header.symbol {
            // Only location symbols move; .EQUATE and .ADDRSS values stay.
            let relocatable = symbol.borrow().raw_value().can_relocate();
            if relocatable && entry.header.memory_address >= 0 {
                symbol
                    .borrow_mut()
                    .set_value(SymbolValue::Location(entry.header.memory_address as u16));
            }
        }
        if let EntryKind::Align {
            alignment,
            generated,
        } = &mut entry.kind
        {
            let start = entry.header.memory_address as u16;
            let end = start.wrapping_add(*generated);
            let block_start = end - end % *alignment;
            *generated = end - block_start;
            rolling = rolling.wrapping_add(block_start.wrapping_sub(start));
            entry.header.memory_address = i32::from(block_start);
        }
    }
}

// ---------------------------------------------------------------------------
// Per-line processing
// ---------------------------------------------------------------------------

struct Unit {
    entries: Vec<CodeEntry>,
    symbols: SymbolTable,
    trace: TraceInfo,
    burn: BurnInfo,
    byte_count: i32,
    dot_end: bool,
    warnings: Vec<SourceError>,
}

impl Unit {
    /// Runs the per-line pass over the whole source, stopping at `.END`.
    /// The first fatal line error aborts assembly.
    fn parse(source: &str) -> Result<Unit, Vec<SourceError>> {
        let mut unit = Unit {
            entries: Vec::new(),
            symbols: SymbolTable::new(),
            trace: TraceInfo::new(),
            burn: BurnInfo::default(),
            byte_count: 0,
            dot_end: false,
            warnings: Vec::new(),
        };
        for (line_num, line_text) in source.lines().enumerate() {
            if unit.dot_end {
                break;
            }
            let line_num = line_num as u32;
            match unit.process_source_line(line_text, line_num) {
                Ok(entry) => {
                    let warning = tags::scan_entry_tags(&entry, &mut unit.trace);
                    if let Some(message) = warning {
                        unit.warnings.push(SourceError {
                            line: line_num,
                            message,
                        });
                    }
                    unit.entries.push(entry);
                }
                Err(message) => {
                    let mut errors = vec![SourceError {
                        line: line_num,
                        message,
                    }];
                    errors.extend(unit.warnings);
                    return Err(errors);
                }
            }
        }
        Ok(unit)
    }

    fn undefined_symbol_errors(&self) -> Vec<SourceError> {
        let mut errors = Vec::new();
        for entry in &self.entries {
            if let Some(symbol) = entry.symbolic_operand() {
                if symbol.borrow().is_undefined() {
                    errors.push(SourceError {
                        line: entry.header.source_line,
                        message: format!(
                            ";ERROR: Symbol \"{}\" is undefined.",
                            symbol.borrow().name()
                        ),
                    });
                }
            }
        }
        if errors.is_empty() {
            for symbol in self.symbols.iter() {
                let symbol = symbol.borrow();
                if symbol.is_undefined() {
                    errors.push(whole_program_error(&format!(
                        ";ERROR: Symbol \"{}\" is undefined.",
                        symbol.name()
                    )));
                }
            }
        }
        errors
    }

    fn process_source_line(&mut self, text: &str, line_num: u32) -> Result<CodeEntry, String> {
        let mut pairs = PepParser::parse(Rule::line, text)
            .map_err(|err| lexical_message(text, &err))?;
        let line = pairs.next().unwrap();

        let mut symbol_pair = None;
        let mut statement_pair = None;
        let mut comment_pair = None;
        for pair in line.into_inner() {
            match pair.as_rule() {
                Rule::symbol_def => symbol_pair = Some(pair),
                Rule::statement => statement_pair = Some(pair),
                Rule::comment => comment_pair = Some(pair),
                Rule::EOI => {}
                _ => unreachable!(),
            }
        }

        let mut header = EntryHeader::new(line_num);
        header.comment = comment_pair.map(|p| p.as_str().to_string());

        if let Some(pair) = &symbol_pair {
            let name = pair.clone().into_inner().next().unwrap().as_str();
            if name.len() > MAX_SYMBOL_LEN {
                return Err(format!(
                    ";ERROR: Symbol {} cannot have more than eight characters.",
                    name
                ));
            }
            if let Some(existing) = self.symbols.get(name) {
                if existing.borrow().is_defined() {
                    existing.borrow_mut().set_multiply_defined();
                    return Err(format!(
                        ";ERROR: Symbol {} was previously defined.",
                        name
                    ));
                }
            }
            let symbol = self.symbols.insert(name);
            symbol
                .borrow_mut()
                .set_value(SymbolValue::Location(self.byte_count as u16));
            header.symbol = Some(symbol);
        }

        let statement = match statement_pair {
            Some(statement) => statement.into_inner().next().unwrap(),
            None => {
                if header.symbol.is_some() {
                    return Err(
                        ";ERROR: Must have mnemonic or dot command after symbol definition."
                            .to_string(),
                    );
                }
                let kind = if header.comment.is_some() {
                    EntryKind::Comment
                } else {
                    EntryKind::Blank
                };
                return Ok(CodeEntry { header, kind });
            }
        };

        match statement.as_rule() {
            Rule::instruction => self.process_instruction(statement, header),
            Rule::dot_command => self.process_dot_command(statement, header),
            _ => unreachable!(),
        }
    }

    fn process_instruction(
        &mut self,
        pair: Pair<Rule>,
        mut header: EntryHeader,
    ) -> Result<CodeEntry, String> {
        debug_assert_matches!(pair.as_rule(), Rule::instruction);
        let mut pairs = pair.into_inner();
        let mnemonic_text = pairs.next().unwrap().as_str().to_uppercase();
        let mnemonic: Mnemonic = mnemonic_text
            .parse()
            .map_err(|_| ";ERROR: Invalid mnemonic.".to_string())?;
        let argument_pair = pairs.next();
        let mode_pair = pairs.next();

        if mnemonic.is_unary() {
            if argument_pair.is_some() {
                return Err(";ERROR: Comment expected following instruction.".to_string());
            }
            header.memory_address = self.byte_count;
            self.byte_count += 1;
            return Ok(CodeEntry {
                header,
                kind: EntryKind::Unary {
                    mnemonic,
                    breakpoint: false,
                },
            });
        }

        let argument_pair = argument_pair
            .ok_or_else(|| ";ERROR: Operand specifier expected after mnemonic.".to_string())?;
        let argument = self.instruction_argument(argument_pair)?;

        let addr_mode = match mode_pair {
            Some(pair) => {
                let mode_text = pair.into_inner().next().unwrap().as_str().to_uppercase();
                let mode: AddrMode = mode_text
                    .parse()
                    .map_err(|_| ";ERROR: Malformed addressing mode.".to_string())?;
                if !mnemonic.allowed_modes().contains(mode.mask()) {
                    return Err(
                        ";ERROR: Illegal addressing mode for this instruction.".to_string()
                    );
                }
                mode
            }
            None => {
                if mnemonic.requires_addr_mode() {
                    return Err(
                        ";ERROR: Addressing mode required for this instruction.".to_string()
                    );
                }
                // Branch-family instructions default to immediate.
                AddrMode::I
            }
        };

        header.memory_address = self.byte_count;
        self.byte_count += 3;
        Ok(CodeEntry {
            header,
            kind: EntryKind::NonUnary {
                mnemonic,
                addr_mode,
                argument,
                breakpoint: false,
            },
        })
    }

    fn instruction_argument(&mut self, pair: Pair<Rule>) -> Result<AsmArgument, String> {
        debug_assert_matches!(pair.as_rule(), Rule::argument);
        let inner = pair.into_inner().next().unwrap();
        match inner.as_rule() {
            Rule::identifier => {
                let name = inner.as_str();
                if name.len() > MAX_SYMBOL_LEN {
                    return Err(format!(
                        ";ERROR: Symbol {} cannot have more than eight characters.",
                        name
                    ));
                }
                Ok(AsmArgument::SymbolRef(self.symbols.insert(name)))
            }
            Rule::string_const => {
                let body = quoted_body(inner.as_str());
                if byte_string_length(&body) > 2 {
                    return Err(
                        ";ERROR: String operands must have length at most two.".to_string()
                    );
                }
                Ok(AsmArgument::Str(body))
            }
            Rule::hex_const => {
                let value = parse_hex(inner.as_str()).ok_or_else(|| {
                    ";ERROR: Hexidecimal constant is out of range (0x0000..0xFFFF).".to_string()
                })?;
                Ok(AsmArgument::Hex(value))
            }
            Rule::dec_const => {
                let value = parse_dec(inner.as_str());
                match value {
                    Some(v) if v >= -32768 && v <= 65535 => {
                        if v < 0 {
                            Ok(AsmArgument::Dec(v as i16))
                        } else {
                            Ok(AsmArgument::UnsignedDec(v as u16))
                        }
                    }
                    _ => Err(
                        ";ERROR: Decimal constant is out of range (-32768..65535).".to_string()
                    ),
                }
            }
            Rule::char_const => Ok(AsmArgument::Char(quoted_body(inner.as_str()))),
            _ => unreachable!(),
        }
    }

    fn process_dot_command(
        &mut self,
        pair: Pair<Rule>,
        mut header: EntryHeader,
    ) -> Result<CodeEntry, String> {
        debug_assert_matches!(pair.as_rule(), Rule::dot_command);
        let mut pairs = pair.into_inner();
        let dot = pairs.next().unwrap().as_str()[1..].to_uppercase();
        let arg = pairs.next().map(|p| p.into_inner().next().unwrap());

        header.memory_address = self.byte_count;

        let kind = match dot.as_str() {
            "ADDRSS" => match arg {
                Some(inner) if inner.as_rule() == Rule::identifier => {
                    let name = inner.as_str();
                    if name.len() > MAX_SYMBOL_LEN {
                        return Err(format!(
                            ";ERROR: Symbol {} cannot have more than eight characters.",
                            name
                        ));
                    }
                    let argument = AsmArgument::SymbolRef(self.symbols.insert(name));
                    self.byte_count += 2;
                    EntryKind::Addrss { argument }
                }
                _ => return Err(";ERROR: .ADDRSS requires a symbol argument.".to_string()),
            },

            "ALIGN" => match arg {
                Some(inner) if inner.as_rule() == Rule::dec_const => {
                    let value = parse_dec(inner.as_str());
                    match value {
                        Some(v) if v == 2 || v == 4 || v == 8 => {
                            let alignment = v as u16;
                            let generated = ((alignment as i32 - self.byte_count % alignment as i32)
                                % alignment as i32) as u16;
                            self.byte_count += i32::from(generated);
                            EntryKind::Align {
                                alignment,
                                generated,
                            }
                        }
                        _ => {
                            return Err(
                                ";ERROR: Decimal constant is out of range (2, 4, 8).".to_string()
                            )
                        }
                    }
                }
                _ => {
                    return Err(
                        ";ERROR: .ALIGN requires a decimal constant 2, 4, or 8.".to_string()
                    )
                }
            },

            "ASCII" => match arg {
                Some(inner) if inner.as_rule() == Rule::string_const => {
                    let body = quoted_body(inner.as_str());
                    self.byte_count += byte_string_length(&body) as i32;
                    EntryKind::Ascii {
                        argument: AsmArgument::Str(body),
                    }
                }
                _ => return Err(";ERROR: .ASCII requires a string constant argument.".to_string()),
            },

            "BLOCK" => match arg.as_ref().map(|p| p.as_rule()) {
                Some(Rule::dec_const) => {
                    let value = parse_dec(arg.unwrap().as_str());
                    match value {
                        Some(v) if v >= 0 && v <= 65535 => {
                            self.byte_count += v;
                            EntryKind::Block {
                                argument: AsmArgument::UnsignedDec(v as u16),
                            }
                        }
                        _ => {
                            return Err(
                                ";ERROR: Decimal constant is out of range (0..65535).".to_string()
                            )
                        }
                    }
                }
                Some(Rule::hex_const) => {
                    let value = parse_hex(arg.unwrap().as_str()).ok_or_else(|| {
                        ";ERROR: Hexidecimal constant is out of range (0x0000..0xFFFF).".to_string()
                    })?;
                    self.byte_count += i32::from(value);
                    EntryKind::Block {
                        argument: AsmArgument::Hex(value),
                    }
                }
                _ => {
                    return Err(
                        ";ERROR: .BLOCK requires a decimal or hex constant argument.".to_string()
                    )
                }
            },

            "BURN" => match arg {
                Some(inner) if inner.as_rule() == Rule::hex_const => {
                    let value = parse_hex(inner.as_str()).ok_or_else(|| {
                        ";ERROR: Hexidecimal constant is out of range (0x0000..0xFFFF).".to_string()
                    })?;
                    self.burn.count += 1;
                    self.burn.value = value;
                    self.burn.address = self.byte_count;
                    EntryKind::Burn {
                        argument: AsmArgument::Hex(value),
                    }
                }
                _ => return Err(";ERROR: .BURN requires a hex constant argument.".to_string()),
            },

            "BYTE" => match arg.as_ref().map(|p| p.as_rule()) {
                Some(Rule::char_const) => {
                    self.byte_count += 1;
                    EntryKind::Byte {
                        argument: AsmArgument::Char(quoted_body(arg.unwrap().as_str())),
                    }
                }
                Some(Rule::dec_const) => {
                    let value = parse_dec(arg.unwrap().as_str());
                    match value {
                        Some(v) if v >= -128 && v <= 255 => {
                            self.byte_count += 1;
                            EntryKind::Byte {
                                argument: if v < 0 {
                                    AsmArgument::Dec(v as i16)
                                } else {
                                    AsmArgument::UnsignedDec(v as u16)
                                },
                            }
                        }
                        _ => {
                            return Err(
                                ";ERROR: Decimal constant is out of byte range (-128..255)."
                                    .to_string(),
                            )
                        }
                    }
                }
                Some(Rule::hex_const) => {
                    let value = parse_hex(arg.unwrap().as_str())
                        .filter(|v| *v < 256)
                        .ok_or_else(|| {
                            ";ERROR: Hex constant is out of byte range (0x00..0xFF).".to_string()
                        })?;
                    self.byte_count += 1;
                    EntryKind::Byte {
                        argument: AsmArgument::Hex(value),
                    }
                }
                Some(Rule::string_const) => {
                    let body = quoted_body(arg.unwrap().as_str());
                    if byte_string_length(&body) > 1 {
                        return Err(
                            ";ERROR: .BYTE string operands must have length one.".to_string()
                        );
                    }
                    self.byte_count += 1;
                    EntryKind::Byte {
                        argument: AsmArgument::Str(body),
                    }
                }
                _ => {
                    return Err(
                        ";ERROR: .BYTE requires a char, dec, hex, or string constant argument."
                            .to_string(),
                    )
                }
            },

            "END" => {
                if arg.is_some() {
                    return Err(";ERROR: Only a comment can follow .END.".to_string());
                }
                self.dot_end = true;
                EntryKind::End
            }

            "EQUATE" => {
                let symbol = match &header.symbol {
                    Some(symbol) => symbol.clone(),
                    None => {
                        return Err(";ERROR: .EQUATE must have a symbol definition.".to_string())
                    }
                };
                let argument = match arg.as_ref().map(|p| p.as_rule()) {
                    Some(Rule::dec_const) => {
                        let value = parse_dec(arg.unwrap().as_str());
                        match value {
                            Some(v) if v >= -32768 && v <= 65535 => {
                                if v < 0 {
                                    AsmArgument::Dec(v as i16)
                                } else {
                                    AsmArgument::UnsignedDec(v as u16)
                                }
                            }
                            _ => {
                                return Err(
                                    ";ERROR: Decimal constant is out of range (-32768..65535)."
                                        .to_string(),
                                )
                            }
                        }
                    }
                    Some(Rule::hex_const) => {
                        let value = parse_hex(arg.unwrap().as_str()).ok_or_else(|| {
                            ";ERROR: Hexidecimal constant is out of range (0x0000..0xFFFF)."
                                .to_string()
                        })?;
                        AsmArgument::Hex(value)
                    }
                    Some(Rule::string_const) => {
                        let body = quoted_body(arg.unwrap().as_str());
                        if byte_string_length(&body) > 2 {
                            return Err(
                                ";ERROR: .EQUATE string operand must have length at most two."
                                    .to_string(),
                            );
                        }
                        AsmArgument::Str(body)
                    }
                    Some(Rule::char_const) => {
                        AsmArgument::Char(quoted_body(arg.unwrap().as_str()))
                    }
                    _ => {
                        return Err(
                            ";ERROR: .EQUATE requires a dec, hex, or string constant argument."
                                .to_string(),
                        )
                    }
                };
                symbol
                    .borrow_mut()
                    .set_value(SymbolValue::Numeric(argument.value()));
                EntryKind::Equate { argument }
            }

            "WORD" => match arg.as_ref().map(|p| p.as_rule()) {
                Some(Rule::char_const) => {
                    self.byte_count += 2;
                    EntryKind::Word {
                        argument: AsmArgument::Char(quoted_body(arg.unwrap().as_str())),
                    }
                }
                Some(Rule::dec_const) => {
                    let value = parse_dec(arg.unwrap().as_str());
                    match value {
                        Some(v) if v >= -32768 && v < 65536 => {
                            self.byte_count += 2;
                            EntryKind::Word {
                                argument: if v < 0 {
                                    AsmArgument::Dec(v as i16)
                                } else {
                                    AsmArgument::UnsignedDec(v as u16)
                                },
                            }
                        }
                        _ => {
                            return Err(
                                ";ERROR: Decimal constant is out of range (-32768..65535)."
                                    .to_string(),
                            )
                        }
                    }
                }
                Some(Rule::hex_const) => {
                    let value = parse_hex(arg.unwrap().as_str()).ok_or_else(|| {
                        ";ERROR: Hexidecimal constant is out of range (0x0000..0xFFFF).".to_string()
                    })?;
                    self.byte_count += 2;
                    EntryKind::Word {
                        argument: AsmArgument::Hex(value),
                    }
                }
                Some(Rule::string_const) => {
                    let body = quoted_body(arg.unwrap().as_str());
                    if byte_string_length(&body) > 2 {
                        return Err(
                            ";ERROR: .WORD string operands must have length at most two."
                                .to_string(),
                        );
                    }
                    self.byte_count += 2;
                    EntryKind::Word {
                        argument: AsmArgument::Str(body),
                    }
                }
                _ => {
                    return Err(
                        ";ERROR: .WORD requires a char, dec, hex, or string constant argument."
                            .to_string(),
                    )
                }
            },

            _ => return Err(";ERROR: Invalid dot command.".to_string()),
        };

        Ok(CodeEntry { header, kind })
    }
}

fn quoted_body(text: &str) -> String {
    text[1..text.len() - 1].to_string()
}

fn parse_hex(text: &str) -> Option<u16> {
    let digits = &text[2..];
    u32::from_str_radix(digits, 16)
        .ok()
        .filter(|v| *v < 65536)
        .map(|v| v as u16)
}

fn parse_dec(text: &str) -> Option<i32> {
    text.parse::<i64>()
        .ok()
        .filter(|v| *v >= -2147483648 && *v <= 2147483647)
        .map(|v| v as i32)
}

/// Maps a parse failure to a diagnostic in the style of the lexer it
/// replaces, keyed off the first unconsumed character.
fn lexical_message(line: &str, err: &pest::error::Error<Rule>) -> String {
    let pos = match err.location {
        pest::error::InputLocation::Pos(p) => p,
        pest::error::InputLocation::Span((p, _)) => p,
    };
    let rest = line.get(pos..).unwrap_or("").trim_start();
    match rest.chars().next() {
        Some(',') => ";ERROR: Malformed addressing mode.".to_string(),
        Some('\'') => ";ERROR: Malformed character constant.".to_string(),
        Some('"') => ";ERROR: Malformed string constant.".to_string(),
        Some('.') => ";ERROR: Malformed dot command.".to_string(),
        Some(c) if c.is_ascii_digit() || c == '+' || c == '-' => {
            ";ERROR: Malformed decimal constant.".to_string()
        }
        _ => ";ERROR: Syntax error.".to_string(),
    }
}
