//! Operand field descriptors.
//!
//! An instruction's operand fields say which token of the source line
//! each operand comes from and which bits of the word it lands in.
//! Register fields are always resolved immediately; immediate fields
//! are resolved immediately when the token is a literal, and
//! otherwise produce a link request which re-encodes the field once
//! the symbol table is complete (see the assembler's linker pass).

use std::fmt::{self, Display, Formatter};

use serde::{Deserialize, Serialize};

use super::bits::BitRange;
use super::Word;

/// Parse an integer literal: decimal, `0x` hexadecimal, `0b` binary
/// or `0o` octal, with an optional leading sign.  Returns `None` if
/// the text is not a self-contained literal (it may still be a
/// symbol, or an expression for the linker to evaluate).
pub fn parse_literal(text: &str) -> Option<i64> {
    let (negative, rest) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text.strip_prefix('+').unwrap_or(text)),
    };
    let (digits, radix) = if let Some(hex) = rest.strip_prefix("0x").or(rest.strip_prefix("0X")) {
        (hex, 16)
    } else if let Some(bin) = rest.strip_prefix("0b").or(rest.strip_prefix("0B")) {
        (bin, 2)
    } else if let Some(oct) = rest.strip_prefix("0o").or(rest.strip_prefix("0O")) {
        (oct, 8)
    } else {
        (rest, 10)
    };
    if digits.is_empty() {
        return None;
    }
    let magnitude = i64::from_str_radix(digits, radix).ok()?;
    Some(if negative { -magnitude } else { magnitude })
}

/// Errors produced while turning operand tokens into word bits.
/// These carry no source location; the assembler attaches the line
/// number when it records them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldError {
    UnknownRegister(String),
    ImmediateOutOfRange {
        value: i64,
        width: u8,
        signed: bool,
    },
    /// The value is in range but has set bits the field's parts do
    /// not store (for instance an odd branch offset when bit 0 is
    /// implicit).
    ImmediateMisaligned {
        value: i64,
    },
    /// The token is neither a literal nor something this field may
    /// defer to the linker.
    InvalidImmediate(String),
    NoSuchRegisterNumber(u32),
}

impl Display for FieldError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            FieldError::UnknownRegister(name) => {
                write!(f, "unknown register '{name}'")
            }
            FieldError::ImmediateOutOfRange {
                value,
                width,
                signed,
            } => {
                let kind = if *signed { "signed" } else { "unsigned" };
                write!(
                    f,
                    "immediate {value} does not fit in a {width}-bit {kind} field"
                )
            }
            FieldError::ImmediateMisaligned { value } => {
                write!(f, "immediate {value} is not representable in this field")
            }
            FieldError::InvalidImmediate(text) => {
                write!(f, "invalid immediate operand '{text}'")
            }
            FieldError::NoSuchRegisterNumber(number) => {
                write!(f, "no register is encoded as {number}")
            }
        }
    }
}

impl std::error::Error for FieldError {}

/// A register operand: token `token_index` names a register whose
/// number is stored in `range`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegField {
    pub token_index: usize,
    pub range: BitRange,
}

impl RegField {
    pub fn new(token_index: usize, range: BitRange) -> RegField {
        RegField { token_index, range }
    }
}

/// How the bits of an immediate field are interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImmRepr {
    Signed,
    Unsigned,
}

/// Whether (and how) an immediate operand may name a symbol instead
/// of a literal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImmLink {
    /// Literals only; a symbolic operand is an error.
    None,
    /// The resolved symbol value is encoded as-is.
    Absolute,
    /// The difference between the resolved symbol value and the
    /// instruction's own address is encoded.
    Relative,
}

/// One contiguous slice of an immediate value and where it lands in
/// the word: value bits `offset..offset+range.width()` are stored in
/// `range`.  A scattered immediate (a branch or jump offset, say)
/// has several parts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImmPart {
    pub offset: u8,
    pub range: BitRange,
}

impl ImmPart {
    pub fn new(offset: u8, range: BitRange) -> ImmPart {
        ImmPart { offset, range }
    }
}

/// An immediate operand field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImmField {
    pub token_index: usize,
    /// Total width of the immediate value in bits, including any
    /// implicit low bits no part stores.
    pub width: u8,
    pub repr: ImmRepr,
    pub parts: Vec<ImmPart>,
    pub link: ImmLink,
}

impl ImmField {
    pub fn new(
        token_index: usize,
        width: u8,
        repr: ImmRepr,
        parts: Vec<ImmPart>,
        link: ImmLink,
    ) -> ImmField {
        ImmField {
            token_index,
            width,
            repr,
            parts,
            link,
        }
    }

    fn value_mask(&self) -> u64 {
        if self.width as u32 >= u64::BITS {
            u64::MAX
        } else {
            (1u64 << self.width) - 1
        }
    }

    /// The bits of the value which some part actually stores.
    fn covered_mask(&self) -> u64 {
        self.parts.iter().fold(0u64, |acc, part| {
            acc | ((part.range.mask() >> part.range.start()) << part.offset)
        })
    }

    fn check_range(&self, value: i64) -> Result<(), FieldError> {
        let fits = match self.repr {
            ImmRepr::Signed => {
                let min = -(1i64 << (self.width - 1));
                let max = (1i64 << (self.width - 1)) - 1;
                (min..=max).contains(&value)
            }
            ImmRepr::Unsigned => value >= 0 && (value as u64) <= self.value_mask(),
        };
        if fits {
            Ok(())
        } else {
            Err(FieldError::ImmediateOutOfRange {
                value,
                width: self.width,
                signed: self.repr == ImmRepr::Signed,
            })
        }
    }

    /// Range-check `value` and scatter its bits into `word`.
    pub fn place(&self, value: i64, word: Word) -> Result<Word, FieldError> {
        self.check_range(value)?;
        let bits = (value as u64) & self.value_mask();
        if bits & !self.covered_mask() != 0 {
            return Err(FieldError::ImmediateMisaligned { value });
        }
        Ok(self.parts.iter().fold(word, |w, part| {
            part.range.insert(bits >> part.offset, w)
        }))
    }

    /// Re-encode this field in `word` from a symbol value resolved by
    /// the linker.  `address` is the absolute address of the
    /// instruction being patched.
    pub fn resolve(&self, symbol_value: i64, word: Word, address: u64) -> Result<Word, FieldError> {
        let value = match self.link {
            ImmLink::Relative => symbol_value.wrapping_sub(address as i64),
            ImmLink::None | ImmLink::Absolute => symbol_value,
        };
        self.place(value, word)
    }

    /// Read this field's value back out of `word`, sign-extending if
    /// the representation is signed.
    pub fn read(&self, word: Word) -> i64 {
        let bits = self.parts.iter().fold(0u64, |acc, part| {
            acc | (part.range.extract(word) << part.offset)
        });
        match self.repr {
            ImmRepr::Unsigned => bits as i64,
            ImmRepr::Signed => {
                let shift = u64::BITS - u32::from(self.width);
                ((bits << shift) as i64) >> shift
            }
        }
    }
}

/// An operand field of an instruction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Field {
    Reg(RegField),
    Imm(ImmField),
}

impl Field {
    pub fn token_index(&self) -> usize {
        match self {
            Field::Reg(reg) => reg.token_index,
            Field::Imm(imm) => imm.token_index,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_radices() {
        assert_eq!(parse_literal("42"), Some(42));
        assert_eq!(parse_literal("-42"), Some(-42));
        assert_eq!(parse_literal("0x2a"), Some(42));
        assert_eq!(parse_literal("0b101010"), Some(42));
        assert_eq!(parse_literal("0o52"), Some(42));
        assert_eq!(parse_literal("+7"), Some(7));
        assert_eq!(parse_literal("loop"), None);
        assert_eq!(parse_literal("a+4"), None);
        assert_eq!(parse_literal(""), None);
        assert_eq!(parse_literal("0x"), None);
    }

    fn contiguous_imm(width: u8, repr: ImmRepr) -> ImmField {
        ImmField::new(
            2,
            width,
            repr,
            vec![ImmPart::new(0, BitRange::new(20, 20 + width - 1))],
            ImmLink::None,
        )
    }

    #[test]
    fn signed_range_checks() {
        let imm = contiguous_imm(12, ImmRepr::Signed);
        assert!(imm.place(2047, 0).is_ok());
        assert!(imm.place(-2048, 0).is_ok());
        assert!(matches!(
            imm.place(2048, 0),
            Err(FieldError::ImmediateOutOfRange { .. })
        ));
    }

    #[test]
    fn unsigned_range_checks() {
        let imm = contiguous_imm(5, ImmRepr::Unsigned);
        assert!(imm.place(31, 0).is_ok());
        assert!(imm.place(-1, 0).is_err());
        assert!(imm.place(32, 0).is_err());
    }

    #[test]
    fn read_inverts_place_for_negative_values() {
        let imm = contiguous_imm(12, ImmRepr::Signed);
        let word = imm.place(-7, 0).expect("-7 fits in 12 bits");
        assert_eq!(imm.read(word), -7);
    }

    #[test]
    fn scattered_parts_round_trip() {
        // A 13-bit branch-style offset with an implicit zero bit 0:
        // value bits 1..=4 at 8..=11, 5..=10 at 25..=30, 11 at 7,
        // 12 at 31.
        let imm = ImmField::new(
            3,
            13,
            ImmRepr::Signed,
            vec![
                ImmPart::new(1, BitRange::new(8, 11)),
                ImmPart::new(5, BitRange::new(25, 30)),
                ImmPart::new(11, BitRange::new(7, 7)),
                ImmPart::new(12, BitRange::new(31, 31)),
            ],
            ImmLink::Relative,
        );
        for value in [-4096i64, -2, 0, 2, 1024, 4094] {
            let word = imm.place(value, 0).expect("offset should fit");
            assert_eq!(imm.read(word), value, "round trip failed for {value}");
        }
        assert!(matches!(
            imm.place(3, 0),
            Err(FieldError::ImmediateMisaligned { .. })
        ));
    }

    #[test]
    fn relative_resolution_subtracts_the_instruction_address() {
        let imm = ImmField::new(
            2,
            13,
            ImmRepr::Signed,
            vec![ImmPart::new(0, BitRange::new(0, 12))],
            ImmLink::Relative,
        );
        let word = imm.resolve(0x100, 0, 0x104).expect("in range");
        assert_eq!(imm.read(word), -4);
    }
}
