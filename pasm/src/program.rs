//! An assembled program: the entry list, its symbol table, and the static
//! trace information, plus the derived object code and listing views.

use crate::code::CodeEntry;
use pep9::symbol::SymbolTable;
use pep9::tag::TraceInfo;
use std::collections::HashMap;

pub struct AsmProgram {
    entries: Vec<CodeEntry>,
    symbols: SymbolTable,
    trace_info: TraceInfo,
    burn_value: Option<u16>,
    start_rom_address: Option<u16>,
    address_to_entry: HashMap<u16, usize>,
}

impl AsmProgram {
    pub fn new(entries: Vec<CodeEntry>, symbols: SymbolTable, trace_info: TraceInfo) -> AsmProgram {
        AsmProgram::with_burn(entries, symbols, trace_info, None, None)
    }

    pub fn with_burn(
        mut entries: Vec<CodeEntry>,
        symbols: SymbolTable,
        trace_info: TraceInfo,
        start_rom_address: Option<u16>,
        burn_value: Option<u16>,
    ) -> AsmProgram {
        let mut listing_line = 0;
        let mut address_to_entry = HashMap::new();
        for (index, entry) in entries.iter_mut().enumerate() {
            entry.header.listing_line = listing_line;
            listing_line += entry.listing_rows();
            if entry.is_instruction() && entry.header.memory_address >= 0 {
                address_to_entry.insert(entry.header.memory_address as u16, index);
            }
        }
        AsmProgram {
            entries,
            symbols,
            trace_info,
            burn_value,
            start_rom_address,
            address_to_entry,
        }
    }

    pub fn entries(&self) -> &[CodeEntry] {
        &self.entries
    }

    pub fn symbol_table(&self) -> &SymbolTable {
        &self.symbols
    }

    pub fn trace_info(&self) -> &TraceInfo {
        &self.trace_info
    }

    pub fn burn_value(&self) -> Option<u16> {
        self.burn_value
    }

    /// First address of the ROM image; only present for operating systems.
    pub fn start_rom_address(&self) -> Option<u16> {
        self.start_rom_address
    }

    pub fn object_code(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for entry in &self.entries {
            entry.append_object_code(&mut out);
        }
        out
    }

    pub fn object_code_length(&self) -> u32 {
        self.entries
            .iter()
            .map(|e| u32::from(e.object_code_length()))
            .sum()
    }

    /// The instruction assembled at `address`, if any.
    pub fn code_at_address(&self, address: u16) -> Option<&CodeEntry> {
        self.address_to_entry
            .get(&address)
            .map(|&index| &self.entries[index])
    }

    /// Sets or clears the breakpoint flag of the instruction at `address`.
    /// Breakpoints are the only mutation permitted after assembly.
    pub fn set_breakpoint(&mut self, address: u16, value: bool) -> bool {
        match self.address_to_entry.get(&address) {
            Some(&index) => self.entries[index].set_breakpoint(value),
            None => false,
        }
    }

    /// Canonical source text. Assembling the result reproduces this program,
    /// and formatting the reassembly reproduces this text.
    pub fn format_source(&self) -> String {
        let mut out = String::new();
        for entry in &self.entries {
            out.push_str(entry.source_line().trim_end());
            out.push('\n');
        }
        out
    }

    /// The `.pepl` listing: address, object code, and pretty-printed source,
    /// followed by the symbol table.
    pub fn assembler_listing(&self) -> String {
        let rule = "-".repeat(79);
        let mut out = String::new();
        out.push_str(&rule);
        out.push('\n');
        out.push_str("      Object\n");
        out.push_str("Addr  code   Symbol   Mnemon  Operand     Comment\n");
        out.push_str(&rule);
        out.push('\n');
        for entry in &self.entries {
            out.push_str(entry.listing_line().trim_end());
            out.push('\n');
        }
        out.push_str(&rule);
        out.push('\n');
        out.push_str(&self.symbol_table_listing());
        out
    }

    fn symbol_table_listing(&self) -> String {
        if self.symbols.is_empty() {
            return String::new();
        }
        let rule = "-".repeat(40);
        let mut out = String::from("Symbol table\n");
        out.push_str(&rule);
        out.push('\n');
        out.push_str("Symbol    Value        Symbol    Value\n");
        out.push_str(&rule);
        out.push('\n');
        let mut column = 0;
        for symbol in self.symbols.iter() {
            let symbol = symbol.borrow();
            out.push_str(&format!("{:<10}{:04X}", symbol.name(), symbol.value()));
            column += 1;
            if column % 2 == 0 {
                out.push('\n');
            } else {
                out.push_str("         ");
            }
        }
        if column % 2 != 0 {
            out.push('\n');
        }
        out.push_str(&rule);
        out.push('\n');
        out
    }
}
