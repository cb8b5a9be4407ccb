//! Static trace-tag model.
//!
//! Trace tags are `#`-prefixed annotations in source comments declaring the
//! shape of globals, stack frames, and heap objects. The assembler resolves
//! them into [`TraceType`]s and records the result in a [`TraceInfo`], which
//! the stack-trace engine consumes at run time.

use crate::symbol::SymbolRef;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::rc::Rc;

/// Display format of one traced cell: character, decimal, or hexadecimal,
/// one or two bytes wide.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum SymbolFormat {
    F1C,
    F1D,
    F2D,
    F1H,
    F2H,
}

impl SymbolFormat {
    pub fn size(self) -> u16 {
        match self {
            SymbolFormat::F1C | SymbolFormat::F1D | SymbolFormat::F1H => 1,
            SymbolFormat::F2D | SymbolFormat::F2H => 2,
        }
    }

    pub fn text(self) -> &'static str {
        match self {
            SymbolFormat::F1C => "1c",
            SymbolFormat::F1D => "1d",
            SymbolFormat::F2D => "2d",
            SymbolFormat::F1H => "1h",
            SymbolFormat::F2H => "2h",
        }
    }
}

impl fmt::Display for SymbolFormat {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.text())
    }
}

/// A resolved trace type. Literal variants carry no symbol and arise from
/// format tags on instructions rather than on storage declarations.
#[derive(Clone, Debug)]
pub enum TraceType {
    Primitive {
        symbol: SymbolRef,
        format: SymbolFormat,
    },
    LiteralPrimitive {
        format: SymbolFormat,
    },
    Array {
        symbol: SymbolRef,
        format: SymbolFormat,
        count: u16,
    },
    LiteralArray {
        format: SymbolFormat,
        count: u16,
    },
    Struct {
        symbol: SymbolRef,
        fields: Vec<Rc<TraceType>>,
    },
}

impl TraceType {
    /// Allocated size in bytes. Structs sum their fields.
    pub fn size(&self) -> u16 {
        match self {
            TraceType::Primitive { format, .. } | TraceType::LiteralPrimitive { format } => {
                format.size()
            }
            TraceType::Array { format, count, .. } | TraceType::LiteralArray { format, count } => {
                format.size() * count
            }
            TraceType::Struct { fields, .. } => fields.iter().map(|f| f.size()).sum(),
        }
    }

    /// The declaring symbol, if the type has one.
    pub fn symbol(&self) -> Option<SymbolRef> {
        match self {
            TraceType::Primitive { symbol, .. }
            | TraceType::Array { symbol, .. }
            | TraceType::Struct { symbol, .. } => Some(Rc::clone(symbol)),
            _ => None,
        }
    }

    /// Flattens the type into displayable `(format, name)` cells, one per
    /// primitive slot.
    pub fn to_primitives(&self) -> Vec<(SymbolFormat, String)> {
        match self {
            TraceType::Primitive { symbol, format } => {
                vec![(*format, symbol.borrow().name().to_string())]
            }
            TraceType::LiteralPrimitive { format } => vec![(*format, String::new())],
            TraceType::Array {
                symbol,
                format,
                count,
            } => {
                let name = symbol.borrow().name().to_string();
                (0..*count)
                    .map(|i| (*format, format!("{}[{}]", name, i)))
                    .collect()
            }
            TraceType::LiteralArray { format, count } => {
                (0..*count).map(|_| (*format, String::new())).collect()
            }
            TraceType::Struct { symbol, fields } => {
                let name = symbol.borrow().name().to_string();
                let mut out = Vec::new();
                for field in fields {
                    for (format, inner) in field.to_primitives() {
                        out.push((format, format!("{}.{}", name, inner)));
                    }
                }
                out
            }
        }
    }
}

/// Everything the assembler learned from trace tags, keyed for the run-time
/// engine: which symbols have static (global) or dynamic (stack/heap) types,
/// which instructions carry tag lists, and whether a usable heap exists.
#[derive(Clone, Debug, Default)]
pub struct TraceInfo {
    pub had_trace_tags: bool,
    pub static_trace_error: bool,
    /// Globally allocated symbols (`.BLOCK`/`.BYTE`/`.WORD`) and their types.
    pub static_alloc_types: HashMap<String, Rc<TraceType>>,
    /// Stack- or heap-allocated symbols (`.EQUATE`) and their types.
    pub dynamic_alloc_types: HashMap<String, Rc<TraceType>>,
    /// Tag lists attached to `ADDSP`/`SUBSP`/`CALL malloc` instructions,
    /// keyed by instruction address.
    pub instr_to_symlist: HashMap<u16, Vec<Rc<TraceType>>>,
    /// Addresses of every `CALL` whose symbolic operand is `malloc`, tagged
    /// or not; untagged calls poison the heap trace at run time.
    pub malloc_calls: HashSet<u16>,
    pub has_heap_malloc: bool,
    pub heap_ptr: Option<SymbolRef>,
    pub malloc_ptr: Option<SymbolRef>,
}

impl TraceInfo {
    pub fn new() -> TraceInfo {
        Default::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbol::SymbolTable;

    #[test]
    fn sizes_follow_formats() {
        assert_eq!(SymbolFormat::F1C.size(), 1);
        assert_eq!(SymbolFormat::F2H.size(), 2);

        let mut table = SymbolTable::new();
        let sym = table.insert("arr");
        let arr = TraceType::Array {
            symbol: sym,
            format: SymbolFormat::F2D,
            count: 4,
        };
        assert_eq!(arr.size(), 8);
        assert_eq!(arr.to_primitives().len(), 4);
        assert_eq!(arr.to_primitives()[2].1, "arr[2]");
    }

    #[test]
    fn struct_sums_fields() {
        let mut table = SymbolTable::new();
        let a = table.insert("a");
        let b = table.insert("b");
        let s = table.insert("point");
        let st = TraceType::Struct {
            symbol: s,
            fields: vec![
                Rc::new(TraceType::Primitive {
                    symbol: a,
                    format: SymbolFormat::F2D,
                }),
                Rc::new(TraceType::Primitive {
                    symbol: b,
                    format: SymbolFormat::F1C,
                }),
            ],
        };
        assert_eq!(st.size(), 3);
        let prims = st.to_primitives();
        assert_eq!(prims[0].1, "point.a");
        assert_eq!(prims[1].1, "point.b");
    }
}
