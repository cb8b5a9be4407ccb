//! Operand arguments carried by code entries. Every argument yields a
//! sixteen-bit value for object code and an echoable source spelling for
//! listings.

use pep9::symbol::SymbolRef;

#[derive(Clone, Debug)]
pub enum AsmArgument {
    Hex(u16),
    Dec(i16),
    UnsignedDec(u16),
    /// Character constant; the body between the quotes, escapes intact.
    Char(String),
    /// String constant of at most two bytes; body between the quotes.
    Str(String),
    SymbolRef(SymbolRef),
}

impl AsmArgument {
    /// The operand value as stored in object code. Negative decimals become
    /// their two-byte two's complement; one- and two-byte strings pack big
    /// endian.
    pub fn value(&self) -> u16 {
        match self {
            AsmArgument::Hex(v) | AsmArgument::UnsignedDec(v) => *v,
            AsmArgument::Dec(v) => *v as u16,
            AsmArgument::Char(body) => u16::from(string_bytes(body)[0]),
            AsmArgument::Str(body) => packed_string_value(body),
            AsmArgument::SymbolRef(symbol) => symbol.borrow().value(),
        }
    }

    /// The source spelling echoed into listings.
    pub fn text(&self) -> String {
        match self {
            AsmArgument::Hex(v) => format!("0x{:04X}", v),
            AsmArgument::Dec(v) => format!("{}", v),
            AsmArgument::UnsignedDec(v) => format!("{}", v),
            AsmArgument::Char(body) => format!("'{}'", body),
            AsmArgument::Str(body) => format!("\"{}\"", body),
            AsmArgument::SymbolRef(symbol) => symbol.borrow().name().to_string(),
        }
    }

    pub fn symbol(&self) -> Option<SymbolRef> {
        match self {
            AsmArgument::SymbolRef(symbol) => Some(symbol.clone()),
            _ => None,
        }
    }
}

/// Decodes a quoted-constant body (without its surrounding quotes) into the
/// bytes it denotes, resolving `\b \f \n \r \t \v \" \' \\` and `\xHH`.
pub fn string_bytes(body: &str) -> Vec<u8> {
    let mut bytes = Vec::new();
    let mut chars = body.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            bytes.push(c as u8);
            continue;
        }
        match chars.next() {
            Some('b') => bytes.push(8),
            Some('f') => bytes.push(12),
            Some('n') => bytes.push(10),
            Some('r') => bytes.push(13),
            Some('t') => bytes.push(9),
            Some('v') => bytes.push(11),
            Some('x') | Some('X') => {
                let hi = chars.next().unwrap_or('0');
                let lo = chars.next().unwrap_or('0');
                let mut hex = String::new();
                hex.push(hi);
                hex.push(lo);
                bytes.push(u8::from_str_radix(&hex, 16).unwrap_or(0));
            }
            Some(other) => bytes.push(other as u8),
            None => break,
        }
    }
    bytes
}

/// Number of object-code bytes a quoted body occupies.
pub fn byte_string_length(body: &str) -> usize {
    string_bytes(body).len()
}

/// Packs a one- or two-byte string into a word, first byte high.
pub fn packed_string_value(body: &str) -> u16 {
    let bytes = string_bytes(body);
    match bytes.len() {
        0 => 0,
        1 => u16::from(bytes[0]),
        _ => (u16::from(bytes[0]) << 8) | u16::from(bytes[1]),
    }
}
