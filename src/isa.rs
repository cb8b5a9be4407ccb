//! The Pep/9 instruction set: mnemonics, addressing modes, and the opcode
//! layout connecting them.
//!
//! Opcodes 0-17 are unary. 18-37 are A-encoded branch/call instructions where
//! the low bit selects immediate or indexed addressing. 38-79 are the trap
//! family, dispatched through the operating system. 80-255 are AAA-encoded in
//! blocks of eight where the low three bits select the addressing mode.

use bitflags::bitflags;
use num::FromPrimitive;
use num_derive::{FromPrimitive, ToPrimitive};
use util::EnumFromStr;
use util_derive::EnumFromStr;

/// All Pep/9 mnemonics. The first eighteen variants are declared in opcode
/// order so the decoder can map unary opcodes directly.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, FromPrimitive, ToPrimitive, EnumFromStr)]
pub enum Mnemonic {
    STOP,
    RET,
    RETTR,
    MOVSPA,
    MOVFLGA,
    MOVAFLG,
    NOTA,
    NOTX,
    NEGA,
    NEGX,
    ASLA,
    ASLX,
    ASRA,
    ASRX,
    ROLA,
    ROLX,
    RORA,
    RORX,
    BR,
    BRLE,
    BRLT,
    BREQ,
    BRNE,
    BRGE,
    BRGT,
    BRV,
    BRC,
    CALL,
    NOP0,
    NOP1,
    NOP,
    DECI,
    DECO,
    HEXO,
    STRO,
    ADDSP,
    SUBSP,
    ADDA,
    ADDX,
    SUBA,
    SUBX,
    ANDA,
    ANDX,
    ORA,
    ORX,
    CPWA,
    CPWX,
    CPBA,
    CPBX,
    LDWA,
    LDWX,
    LDBA,
    LDBX,
    STWA,
    STWX,
    STBA,
    STBX,
}

/// Addressing modes in AAA-field order.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, FromPrimitive, ToPrimitive, EnumFromStr)]
pub enum AddrMode {
    I,
    D,
    N,
    S,
    SF,
    X,
    SX,
    SFX,
}

bitflags! {
    /// Set of addressing modes, used to express per-mnemonic legality.
    pub struct AddrModeSet: u16 {
        const I   = 1 << 0;
        const D   = 1 << 1;
        const N   = 1 << 2;
        const S   = 1 << 3;
        const SF  = 1 << 4;
        const X   = 1 << 5;
        const SX  = 1 << 6;
        const SFX = 1 << 7;
        const ALL = 0xFF;
    }
}

macro_rules! impl_enum_display {
    ($e:ty) => {
        impl std::fmt::Display for $e {
            fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
                std::fmt::Debug::fmt(self, f)
            }
        }
    };
}

impl_enum_display!(Mnemonic);

impl AddrMode {
    /// The three-bit AAA field encoding this mode.
    pub fn aaa_field(self) -> u8 {
        self as u8
    }

    pub fn from_aaa(bits: u8) -> AddrMode {
        AddrMode::from_u8(bits & 0x7).unwrap()
    }

    pub fn mask(self) -> AddrModeSet {
        AddrModeSet::from_bits_truncate(1 << (self as u16))
    }

    /// Lower-case source spelling of the mode.
    pub fn text(self) -> &'static str {
        match self {
            AddrMode::I => "i",
            AddrMode::D => "d",
            AddrMode::N => "n",
            AddrMode::S => "s",
            AddrMode::SF => "sf",
            AddrMode::X => "x",
            AddrMode::SX => "sx",
            AddrMode::SFX => "sfx",
        }
    }
}

impl std::fmt::Display for AddrMode {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str(self.text())
    }
}

impl Mnemonic {
    /// First opcode of the block this mnemonic occupies.
    pub fn base_opcode(self) -> u8 {
        use Mnemonic::*;
        match self {
            STOP => 0,
            RET => 1,
            RETTR => 2,
            MOVSPA => 3,
            MOVFLGA => 4,
            MOVAFLG => 5,
            NOTA => 6,
            NOTX => 7,
            NEGA => 8,
            NEGX => 9,
            ASLA => 10,
            ASLX => 11,
            ASRA => 12,
            ASRX => 13,
            ROLA => 14,
            ROLX => 15,
            RORA => 16,
            RORX => 17,
            BR => 18,
            BRLE => 20,
            BRLT => 22,
            BREQ => 24,
            BRNE => 26,
            BRGE => 28,
            BRGT => 30,
            BRV => 32,
            BRC => 34,
            CALL => 36,
            NOP0 => 38,
            NOP1 => 39,
            NOP => 40,
            DECI => 48,
            DECO => 56,
            HEXO => 64,
            STRO => 72,
            ADDSP => 80,
            SUBSP => 88,
            ADDA => 96,
            ADDX => 104,
            SUBA => 112,
            SUBX => 120,
            ANDA => 128,
            ANDX => 136,
            ORA => 144,
            ORX => 152,
            CPWA => 160,
            CPWX => 168,
            CPBA => 176,
            CPBX => 184,
            LDWA => 192,
            LDWX => 200,
            LDBA => 208,
            LDBX => 216,
            STWA => 224,
            STWX => 232,
            STBA => 240,
            STBX => 248,
        }
    }

    /// Unary instructions occupy a single byte of object code.
    pub fn is_unary(self) -> bool {
        self.base_opcode() < 18 || self == Mnemonic::NOP0 || self == Mnemonic::NOP1
    }

    /// Trap instructions are dispatched through the operating system vector.
    pub fn is_trap(self) -> bool {
        use Mnemonic::*;
        match self {
            NOP0 | NOP1 | NOP | DECI | DECO | HEXO | STRO => true,
            _ => false,
        }
    }

    /// Whether the assembler demands an explicit addressing mode. Branch
    /// instructions default to immediate when the mode is omitted.
    pub fn requires_addr_mode(self) -> bool {
        use Mnemonic::*;
        match self {
            BR | BRLE | BRLT | BREQ | BRNE | BRGE | BRGT | BRV | BRC | CALL => false,
            m => !m.is_unary(),
        }
    }

    /// Instructions that write their operand rather than read it.
    pub fn is_store(self) -> bool {
        use Mnemonic::*;
        match self {
            STBA | STBX | STWA | STWX | DECI => true,
            _ => false,
        }
    }

    /// Byte-width instructions truncate to the low byte while still forming
    /// addresses in sixteen bits.
    pub fn is_byte_op(self) -> bool {
        use Mnemonic::*;
        match self {
            LDBA | LDBX | STBA | STBX | CPBA | CPBX => true,
            _ => false,
        }
    }

    /// The addressing modes the assembler accepts for this mnemonic.
    pub fn allowed_modes(self) -> AddrModeSet {
        use Mnemonic::*;
        let store = AddrModeSet::ALL - AddrModeSet::I;
        let branch = AddrModeSet::I | AddrModeSet::X;
        match self {
            BR | BRLE | BRLT | BREQ | BRNE | BRGE | BRGT | BRV | BRC | CALL => branch,
            STBA | STBX | STWA | STWX => store,
            NOP => AddrModeSet::I,
            DECI => store,
            DECO | HEXO => AddrModeSet::ALL,
            STRO => {
                AddrModeSet::D | AddrModeSet::N | AddrModeSet::S | AddrModeSet::SF | AddrModeSet::X
            }
            m if m.is_unary() => AddrModeSet::empty(),
            _ => AddrModeSet::ALL,
        }
    }
}

/// Decodes an instruction specifier into its mnemonic and addressing mode.
///
/// Total over all 256 opcodes; [`opcode`] is its inverse for every pair the
/// assembler can emit. Unary instructions report immediate addressing, which
/// the CPU never evaluates.
pub fn decode(inst_spec: u8) -> (Mnemonic, AddrMode) {
    use Mnemonic::*;
    match inst_spec {
        0..=17 => (Mnemonic::from_u8(inst_spec).unwrap(), AddrMode::I),
        18..=37 => {
            let mnemonic = match inst_spec & !1 {
                18 => BR,
                20 => BRLE,
                22 => BRLT,
                24 => BREQ,
                26 => BRNE,
                28 => BRGE,
                30 => BRGT,
                32 => BRV,
                34 => BRC,
                _ => CALL,
            };
            let mode = if inst_spec & 1 == 0 {
                AddrMode::I
            } else {
                AddrMode::X
            };
            (mnemonic, mode)
        }
        38 => (NOP0, AddrMode::I),
        39 => (NOP1, AddrMode::I),
        _ => {
            let mnemonic = match inst_spec & !7 {
                40 => NOP,
                48 => DECI,
                56 => DECO,
                64 => HEXO,
                72 => STRO,
                80 => ADDSP,
                88 => SUBSP,
                96 => ADDA,
                104 => ADDX,
                112 => SUBA,
                120 => SUBX,
                128 => ANDA,
                136 => ANDX,
                144 => ORA,
                152 => ORX,
                160 => CPWA,
                168 => CPWX,
                176 => CPBA,
                184 => CPBX,
                192 => LDWA,
                200 => LDWX,
                208 => LDBA,
                216 => LDBX,
                224 => STWA,
                232 => STWX,
                240 => STBA,
                _ => STBX,
            };
            (mnemonic, AddrMode::from_aaa(inst_spec & 7))
        }
    }
}

/// Encodes a mnemonic and addressing mode into an instruction specifier.
pub fn opcode(mnemonic: Mnemonic, mode: AddrMode) -> u8 {
    let base = mnemonic.base_opcode();
    if mnemonic.is_unary() {
        base
    } else if mnemonic.requires_addr_mode() {
        base + mode.aaa_field()
    } else {
        // A-encoded: only immediate and indexed are representable.
        match mode {
            AddrMode::X => base + 1,
            _ => base,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decoder_is_total_and_invertible() {
        for spec in 0..=255u8 {
            let (mnemonic, mode) = decode(spec);
            if mnemonic.is_unary() {
                assert_eq!(opcode(mnemonic, mode), mnemonic.base_opcode());
            } else {
                assert_eq!(opcode(mnemonic, mode), spec);
            }
        }
    }

    #[test]
    fn assembler_emittable_pairs_round_trip() {
        for spec in 0..=255u8 {
            let (mnemonic, _) = decode(spec);
            if mnemonic.is_unary() {
                continue;
            }
            for mode in (0u8..8).map(AddrMode::from_aaa) {
                if !mnemonic.allowed_modes().contains(mode.mask()) {
                    continue;
                }
                let encoded = opcode(mnemonic, mode);
                assert_eq!(decode(encoded), (mnemonic, mode));
            }
        }
    }

    #[test]
    fn reference_opcodes() {
        assert_eq!(opcode(Mnemonic::STOP, AddrMode::I), 0);
        assert_eq!(opcode(Mnemonic::BR, AddrMode::I), 18);
        assert_eq!(opcode(Mnemonic::BR, AddrMode::X), 19);
        assert_eq!(opcode(Mnemonic::CALL, AddrMode::I), 36);
        assert_eq!(opcode(Mnemonic::ADDA, AddrMode::I), 96);
        assert_eq!(opcode(Mnemonic::CPWA, AddrMode::I), 160);
        assert_eq!(opcode(Mnemonic::LDWA, AddrMode::I), 192);
        assert_eq!(opcode(Mnemonic::LDWA, AddrMode::SFX), 199);
        assert_eq!(opcode(Mnemonic::STWA, AddrMode::D), 225);
    }

    #[test]
    fn mnemonics_parse_from_uppercase_text() {
        let m: Mnemonic = "LDWA".parse().unwrap();
        assert_eq!(m, Mnemonic::LDWA);
        let mode: AddrMode = "SFX".parse().unwrap();
        assert_eq!(mode, AddrMode::SFX);
        assert!("LDWQ".parse::<Mnemonic>().is_err());
    }

    #[test]
    fn store_family_rejects_immediate() {
        for m in [
            Mnemonic::STBA,
            Mnemonic::STBX,
            Mnemonic::STWA,
            Mnemonic::STWX,
        ]
        .iter()
        {
            assert!(!m.allowed_modes().contains(AddrModeSet::I));
            assert!(m.allowed_modes().contains(AddrModeSet::SFX));
        }
    }
}
