//! Code entries: one per source line, carrying a shared header and a typed
//! payload. An ordered sequence of entries forms an assembled program.

use crate::argument::{byte_string_length, string_bytes, AsmArgument};
use pep9::isa::{opcode, AddrMode, Mnemonic};
use pep9::symbol::SymbolRef;

/// Fields common to every entry.
#[derive(Clone, Debug)]
pub struct EntryHeader {
    pub emit_object_code: bool,
    pub comment: Option<String>,
    pub source_line: u32,
    pub listing_line: u32,
    pub memory_address: i32,
    pub symbol: Option<SymbolRef>,
}

impl EntryHeader {
    pub fn new(source_line: u32) -> EntryHeader {
        EntryHeader {
            emit_object_code: true,
            comment: None,
            source_line,
            listing_line: 0,
            memory_address: -1,
            symbol: None,
        }
    }

    fn symbol_text(&self) -> String {
        match &self.symbol {
            Some(symbol) => format!("{}:", symbol.borrow().name()),
            None => String::new(),
        }
    }

    fn comment_text(&self) -> &str {
        self.comment.as_deref().unwrap_or("")
    }
}

#[derive(Clone, Debug)]
pub enum EntryKind {
    Unary {
        mnemonic: Mnemonic,
        breakpoint: bool,
    },
    NonUnary {
        mnemonic: Mnemonic,
        addr_mode: AddrMode,
        argument: AsmArgument,
        breakpoint: bool,
    },
    Addrss {
        argument: AsmArgument,
    },
    Align {
        alignment: u16,
        generated: u16,
    },
    Ascii {
        argument: AsmArgument,
    },
    Block {
        argument: AsmArgument,
    },
    Burn {
        argument: AsmArgument,
    },
    Byte {
        argument: AsmArgument,
    },
    Word {
        argument: AsmArgument,
    },
    End,
    Equate {
        argument: AsmArgument,
    },
    Comment,
    Blank,
}

#[derive(Clone, Debug)]
pub struct CodeEntry {
    pub header: EntryHeader,
    pub kind: EntryKind,
}

impl CodeEntry {
    /// Bytes this entry contributes to the object stream. The sum over a
    /// program equals the emitted stream length.
    pub fn object_code_length(&self) -> u16 {
        if !self.header.emit_object_code {
            return 0;
        }
        match &self.kind {
            EntryKind::Unary { .. } => 1,
            EntryKind::NonUnary { .. } => 3,
            EntryKind::Addrss { .. } => 2,
            EntryKind::Align { generated, .. } => *generated,
            EntryKind::Ascii { argument } => match argument {
                AsmArgument::Str(body) => byte_string_length(body) as u16,
                _ => 0,
            },
            EntryKind::Block { argument } => argument.value(),
            EntryKind::Byte { .. } => 1,
            EntryKind::Word { .. } => 2,
            _ => 0,
        }
    }

    pub fn append_object_code(&self, out: &mut Vec<u8>) {
        if !self.header.emit_object_code {
            return;
        }
        match &self.kind {
            EntryKind::Unary { mnemonic, .. } => out.push(mnemonic.base_opcode()),
            EntryKind::NonUnary {
                mnemonic,
                addr_mode,
                argument,
                ..
            } => {
                out.push(opcode(*mnemonic, *addr_mode));
                let operand = argument.value();
                out.push((operand / 256) as u8);
                out.push((operand % 256) as u8);
            }
            EntryKind::Addrss { argument } => {
                let value = argument.value();
                out.push((value / 256) as u8);
                out.push((value % 256) as u8);
            }
            EntryKind::Align { generated, .. } => out.extend(std::iter::repeat(0).take(*generated as usize)),
            EntryKind::Ascii { argument } => {
                if let AsmArgument::Str(body) = argument {
                    out.extend(string_bytes(body));
                }
            }
            EntryKind::Block { argument } => {
                out.extend(std::iter::repeat(0).take(argument.value() as usize))
            }
            EntryKind::Byte { argument } => out.push((argument.value() % 256) as u8),
            EntryKind::Word { argument } => {
                let value = argument.value();
                out.push((value / 256) as u8);
                out.push((value % 256) as u8);
            }
            _ => {}
        }
    }

    /// Relocates the entry. Entries without a real address (comments, blank
    /// lines) do not move.
    pub fn adjust_address(&mut self, delta: u16) {
        if self.header.memory_address >= 0 {
            let moved = (self.header.memory_address as u16).wrapping_add(delta);
            self.header.memory_address = i32::from(moved);
        }
    }

    pub fn argument(&self) -> Option<&AsmArgument> {
        match &self.kind {
            EntryKind::NonUnary { argument, .. }
            | EntryKind::Addrss { argument }
            | EntryKind::Ascii { argument }
            | EntryKind::Block { argument }
            | EntryKind::Burn { argument }
            | EntryKind::Byte { argument }
            | EntryKind::Word { argument }
            | EntryKind::Equate { argument } => Some(argument),
            _ => None,
        }
    }

    pub fn has_symbolic_operand(&self) -> bool {
        self.symbolic_operand().is_some()
    }

    pub fn symbolic_operand(&self) -> Option<SymbolRef> {
        self.argument().and_then(AsmArgument::symbol)
    }

    pub fn is_instruction(&self) -> bool {
        match self.kind {
            EntryKind::Unary { .. } | EntryKind::NonUnary { .. } => true,
            _ => false,
        }
    }

    pub fn has_breakpoint(&self) -> bool {
        match self.kind {
            EntryKind::Unary { breakpoint, .. } | EntryKind::NonUnary { breakpoint, .. } => {
                breakpoint
            }
            _ => false,
        }
    }

    /// Instruction breakpoints are the only mutable state on an assembled
    /// program.
    pub fn set_breakpoint(&mut self, value: bool) -> bool {
        match &mut self.kind {
            EntryKind::Unary { breakpoint, .. } | EntryKind::NonUnary { breakpoint, .. } => {
                *breakpoint = value;
                true
            }
            _ => false,
        }
    }

    /// Pretty-printed source. Reassembling the joined lines of a program
    /// reproduces the program.
    pub fn source_line(&self) -> String {
        let header = &self.header;
        match &self.kind {
            EntryKind::Unary { mnemonic, .. } => format!(
                "{:<9}{:<8}{}{}",
                header.symbol_text(),
                mnemonic.to_string(),
                "            ",
                header.comment_text()
            ),
            EntryKind::NonUnary {
                mnemonic,
                addr_mode,
                argument,
                ..
            } => {
                let mut operand = argument.text();
                if mnemonic.requires_addr_mode() || *addr_mode == AddrMode::X {
                    operand.push(',');
                    operand.push_str(addr_mode.text());
                }
                format!(
                    "{:<9}{:<8}{:<12}{}",
                    header.symbol_text(),
                    mnemonic.to_string(),
                    operand,
                    header.comment_text()
                )
            }
            EntryKind::Addrss { argument } => self.dot_source(".ADDRSS", &argument.text()),
            EntryKind::Align { alignment, .. } => {
                self.dot_source(".ALIGN", &format!("{}", alignment))
            }
            EntryKind::Ascii { argument } => self.dot_source(".ASCII", &argument.text()),
            EntryKind::Block { argument } => self.dot_source(".BLOCK", &argument.text()),
            EntryKind::Burn { argument } => self.dot_source(".BURN", &argument.text()),
            EntryKind::Byte { argument } => self.dot_source(".BYTE", &argument.text()),
            EntryKind::Word { argument } => self.dot_source(".WORD", &argument.text()),
            EntryKind::End => self.dot_source(".END", ""),
            EntryKind::Equate { argument } => self.dot_source(".EQUATE", &argument.text()),
            EntryKind::Comment => header.comment_text().to_string(),
            EntryKind::Blank => String::new(),
        }
    }

    fn dot_source(&self, dot: &str, operand: &str) -> String {
        format!(
            "{:<9}{:<8}{:<12}{}",
            self.header.symbol_text(),
            dot,
            operand,
            self.header.comment_text()
        )
    }

    /// Listing line: address, object bytes, pretty-printed source. Entries
    /// that emit more than three bytes continue onto extra rows.
    pub fn listing_line(&self) -> String {
        let header = &self.header;
        let mem = if header.memory_address >= 0 {
            format!("{:04X}", header.memory_address)
        } else {
            String::new()
        };
        match &self.kind {
            EntryKind::Unary { mnemonic, .. } => {
                let code = if header.emit_object_code {
                    format!("{:02X}", mnemonic.base_opcode())
                } else {
                    String::new()
                };
                format!("{:<6}{:<7}{}", mem, code, self.source_line())
            }
            EntryKind::NonUnary {
                mnemonic,
                addr_mode,
                argument,
                ..
            } => {
                let code = if header.emit_object_code {
                    format!(
                        "{:02X}{:04X}",
                        opcode(*mnemonic, *addr_mode),
                        argument.value()
                    )
                } else {
                    String::new()
                };
                format!("{:<6}{:<7}{}", mem, code, self.source_line())
            }
            EntryKind::Addrss { argument } | EntryKind::Word { argument } => {
                let code = if header.emit_object_code {
                    format!("{:04X}", argument.value())
                } else {
                    String::new()
                };
                format!("{:<6}{:<7}{}", mem, code, self.source_line())
            }
            EntryKind::Byte { argument } => {
                let code = if header.emit_object_code {
                    format!("{:02X}", argument.value() % 256)
                } else {
                    String::new()
                };
                format!("{:<6}{:<7}{}", mem, code, self.source_line())
            }
            EntryKind::Align { .. } | EntryKind::Block { .. } | EntryKind::Ascii { .. } => {
                self.multi_byte_listing(&mem)
            }
            EntryKind::End | EntryKind::Burn { .. } => {
                format!("{:<6}{:<7}{}", mem, "", self.source_line())
            }
            EntryKind::Equate { .. } | EntryKind::Comment => {
                format!("{:<13}{}", "", self.source_line())
            }
            EntryKind::Blank => String::new(),
        }
    }

    fn multi_byte_listing(&self, mem: &str) -> String {
        let mut bytes = Vec::new();
        self.append_object_code(&mut bytes);
        let mut rows = bytes
            .chunks(3)
            .map(|chunk| {
                chunk
                    .iter()
                    .map(|b| format!("{:02X}", b))
                    .collect::<String>()
            })
            .collect::<Vec<_>>();
        if rows.is_empty() {
            rows.push(String::new());
        }
        let mut out = format!("{:<6}{:<7}{}", mem, rows[0], self.source_line());
        for row in &rows[1..] {
            out.push('\n');
            out.push_str(&format!("{:<6}{:<7}", "", row));
        }
        out
    }

    /// Number of rows this entry occupies in a listing.
    pub fn listing_rows(&self) -> u32 {
        match self.kind {
            EntryKind::Align { .. } | EntryKind::Block { .. } | EntryKind::Ascii { .. } => {
                let len = self.object_code_length() as u32;
                1 + (len.saturating_sub(1)) / 3
            }
            _ => 1,
        }
    }
}
