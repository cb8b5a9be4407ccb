//! The `.pepo` object-code format: whitespace-delimited uppercase hex bytes
//! terminated by the sentinel `zz`, written sixteen bytes per line.
//!
//! ```
//! use pepo::{format, parse};
//!
//! let bytes = parse("C0 00 48 F1 FC 16 00 zz").unwrap();
//! assert_eq!(bytes[0], 0xC0);
//! assert_eq!(format(&[0x00]), "00 zz\n");
//! ```

use std::fmt;
use std::fs::File;
use std::io::prelude::*;
use std::io::{BufReader, BufWriter};
use std::path::Path;

const BYTES_PER_LINE: usize = 16;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ParseError {
    /// The input ended without the `zz` sentinel.
    MissingSentinel,
    /// A token was not a one- or two-digit hex byte.
    BadByte(String),
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ParseError::MissingSentinel => write!(f, "Object code is missing the zz sentinel."),
            ParseError::BadByte(token) => write!(f, "Invalid object code byte \"{}\".", token),
        }
    }
}

impl std::error::Error for ParseError {}

/// Parses object-code text into bytes, stopping at the sentinel.
pub fn parse(text: &str) -> Result<Vec<u8>, ParseError> {
    let mut bytes = Vec::new();
    for token in text.split_whitespace() {
        if token.eq_ignore_ascii_case("zz") {
            return Ok(bytes);
        }
        if token.len() > 2 {
            return Err(ParseError::BadByte(token.to_string()));
        }
        match u8::from_str_radix(token, 16) {
            Ok(byte) => bytes.push(byte),
            Err(_) => return Err(ParseError::BadByte(token.to_string())),
        }
    }
    Err(ParseError::MissingSentinel)
}

/// Formats bytes as object-code text, sixteen bytes per line with a trailing
/// sentinel. `parse` of the result returns the original bytes.
pub fn format(bytes: &[u8]) -> String {
    let mut out = String::new();
    for (i, byte) in bytes.iter().enumerate() {
        out.push_str(&std::format!("{:02X}", byte));
        if (i + 1) % BYTES_PER_LINE == 0 {
            out.push('\n');
        } else {
            out.push(' ');
        }
    }
    out.push_str("zz\n");
    out
}

pub fn read<R: Read>(reader: &mut R) -> std::io::Result<Vec<u8>> {
    let mut text = String::new();
    reader.read_to_string(&mut text)?;
    parse(&text).map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidData, err))
}

pub fn write<W: Write>(writer: &mut W, bytes: &[u8]) -> std::io::Result<()> {
    writer.write_all(format(bytes).as_bytes())
}

pub trait ReadPepoExt: Read + Sized {
    fn read_pepo(&mut self) -> std::io::Result<Vec<u8>> {
        read(self)
    }
}

impl<R: Read + Sized> ReadPepoExt for R {}

pub trait WritePepoExt: Write + Sized {
    fn write_pepo(&mut self, bytes: &[u8]) -> std::io::Result<()> {
        write(self, bytes)
    }
}

impl<W: Write + Sized> WritePepoExt for W {}

pub fn read_file<P: AsRef<Path>>(path: P) -> std::io::Result<Vec<u8>> {
    BufReader::new(File::open(path)?).read_pepo()
}

pub fn write_file<P: AsRef<Path>>(path: P, bytes: &[u8]) -> std::io::Result<()> {
    BufWriter::new(File::create(path)?).write_pepo(bytes)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parse_stops_at_sentinel() {
        let bytes = parse("C0 00 41 00 zz 12 34").unwrap();
        assert_eq!(bytes, vec![0xC0, 0x00, 0x41, 0x00]);
    }

    #[test]
    fn parse_requires_sentinel() {
        assert_eq!(parse("C0 00 41"), Err(ParseError::MissingSentinel));
    }

    #[test]
    fn parse_rejects_junk() {
        assert_eq!(
            parse("C0 GG zz"),
            Err(ParseError::BadByte("GG".to_string()))
        );
        assert_eq!(
            parse("C0 123 zz"),
            Err(ParseError::BadByte("123".to_string()))
        );
    }

    #[test]
    fn format_wraps_lines() {
        let bytes: Vec<u8> = (0..20).collect();
        let text = format(&bytes);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("00 01"));
        assert!(lines[1].ends_with("zz"));
    }

    #[test]
    fn canonical_text_round_trips() {
        let bytes = vec![0x00, 0xFF, 0x41, 0x1C];
        let text = format(&bytes);
        assert_eq!(format(&parse(&text).unwrap()), text);
        assert_eq!(parse(&text).unwrap(), bytes);
    }

    #[test]
    fn minimal_program() {
        assert_eq!(parse("00 zz").unwrap(), vec![0x00]);
        assert_eq!(format(&[0x00]), "00 zz\n");
    }
}
