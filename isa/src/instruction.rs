//! The instruction descriptor: a name, the ordered fixed opcode
//! parts which identify the instruction, and the operand fields.
//! Encoding and decoding are entirely driven by this description;
//! there is no per-instruction code.

use std::fmt::{self, Display, Formatter};

use serde::{Deserialize, Serialize};

use super::bits::OpPart;
use super::field::{parse_literal, Field, FieldError, ImmField, ImmLink};
use super::machine::IsaSpec;
use super::token::{ReverseSymbolMap, Token};
use super::Word;

/// The ordered fixed bit-field constraints identifying one
/// instruction.  Order matters: the decoder's matching trie compares
/// the Nth part of every candidate instruction at depth N.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Opcode {
    pub parts: Vec<OpPart>,
}

impl Opcode {
    pub fn new(parts: Vec<OpPart>) -> Opcode {
        Opcode { parts }
    }
}

/// A deferred re-encoding of one immediate field, produced when an
/// operand refers to a symbol which cannot be resolved as a literal
/// at encode time.  The assembler records it (together with the
/// position of the emitted word) and the linker pass replays it once
/// the symbol table is complete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkField {
    /// The operand text, evaluated as an expression over the symbol
    /// table by the linker.
    pub expr: String,
    /// Relocation to apply to the resolved value, if the operand
    /// carried a relocation hint.
    pub relocation: Option<String>,
    /// The immediate field which must re-encode the resolved value.
    pub field: ImmField,
}

/// A successfully encoded instruction: the word (with placeholder
/// bits in any field awaiting linkage) and the link request, if one
/// is needed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Encoded {
    pub word: Word,
    pub link: Option<LinkField>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncodeError {
    OperandCount { expected: usize, found: usize },
    Field(FieldError),
    /// Two operands of one instruction cannot both defer to the
    /// linker.
    MultipleSymbolicOperands,
}

impl From<FieldError> for EncodeError {
    fn from(e: FieldError) -> EncodeError {
        EncodeError::Field(e)
    }
}

impl Display for EncodeError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            EncodeError::OperandCount { expected, found } => {
                write!(f, "expected {expected} operands, found {found}")
            }
            EncodeError::Field(e) => e.fmt(f),
            EncodeError::MultipleSymbolicOperands => {
                f.write_str("more than one operand requires symbol linkage")
            }
        }
    }
}

impl std::error::Error for EncodeError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    Field(FieldError),
}

impl Display for DecodeError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::Field(e) => e.fmt(f),
        }
    }
}

impl std::error::Error for DecodeError {}

/// One instruction of the target machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instruction {
    name: String,
    opcode: Opcode,
    fields: Vec<Field>,
}

impl Instruction {
    pub fn new(name: &str, opcode: Opcode, fields: Vec<Field>) -> Instruction {
        Instruction {
            name: name.to_string(),
            opcode,
            fields,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn opcode_parts(&self) -> &[OpPart] {
        &self.opcode.parts
    }

    /// Check the descriptor for internal consistency.  The assembler
    /// runs this for every registered instruction at construction
    /// time, so a bad description is a configuration error rather
    /// than a per-line assembly error.
    pub fn validate(&self, machine: &IsaSpec) -> Result<(), String> {
        if self.name.is_empty() {
            return Err("instruction has an empty name".to_string());
        }
        if self.opcode.parts.is_empty() {
            return Err(format!("instruction '{}' has no opcode parts", self.name));
        }
        let word_bits = machine.word_bits();
        let mut written: Word = 0;
        let mut claim = |mask: Word, what: &str| -> Result<(), String> {
            if written & mask != 0 {
                return Err(format!(
                    "instruction '{}': {what} overlaps an already-used bit range",
                    self.name
                ));
            }
            written |= mask;
            Ok(())
        };
        for part in &self.opcode.parts {
            if u32::from(part.range().stop()) >= word_bits {
                return Err(format!(
                    "instruction '{}': opcode part {part} lies outside the {word_bits}-bit word",
                    self.name
                ));
            }
            claim(part.range().mask(), "an opcode part")?;
        }
        let mut seen = vec![false; self.fields.len()];
        for field in &self.fields {
            let index = field.token_index();
            if index == 0 || index > self.fields.len() || seen[index - 1] {
                return Err(format!(
                    "instruction '{}': operand token indices must be a permutation of 1..={}",
                    self.name,
                    self.fields.len()
                ));
            }
            seen[index - 1] = true;
            match field {
                Field::Reg(reg) => {
                    if u32::from(reg.range.stop()) >= word_bits {
                        return Err(format!(
                            "instruction '{}': register field lies outside the word",
                            self.name
                        ));
                    }
                    claim(reg.range.mask(), "a register field")?;
                }
                Field::Imm(imm) => {
                    for part in &imm.parts {
                        if u32::from(part.range.stop()) >= word_bits {
                            return Err(format!(
                                "instruction '{}': immediate part lies outside the word",
                                self.name
                            ));
                        }
                        if part.offset + part.range.width() > imm.width {
                            return Err(format!(
                                "instruction '{}': immediate part exceeds the field's {}-bit width",
                                self.name, imm.width
                            ));
                        }
                        claim(part.range.mask(), "an immediate part")?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Encode a tokenized line (mnemonic first, then one token per
    /// operand field).  The returned word carries placeholder bits in
    /// any field which produced a link request.
    pub fn encode(&self, tokens: &[Token], machine: &IsaSpec) -> Result<Encoded, EncodeError> {
        if tokens.len() != self.fields.len() + 1 {
            return Err(EncodeError::OperandCount {
                expected: self.fields.len(),
                found: tokens.len().saturating_sub(1),
            });
        }
        let mut word: Word = self
            .opcode
            .parts
            .iter()
            .fold(0, |w, part| part.apply(w));
        let mut link: Option<LinkField> = None;
        for field in &self.fields {
            match field {
                Field::Reg(reg) => {
                    let name = tokens[reg.token_index].text.as_str();
                    let number = machine
                        .registers
                        .number_of(name)
                        .ok_or_else(|| FieldError::UnknownRegister(name.to_string()))?;
                    word = reg.range.insert(Word::from(number), word);
                }
                Field::Imm(imm) => {
                    let token = &tokens[imm.token_index];
                    let literal = if token.relocation.is_some() {
                        // A relocation hint always defers to the
                        // linker, even on a literal operand.
                        None
                    } else {
                        parse_literal(&token.text)
                    };
                    match literal {
                        Some(value) => {
                            word = imm.place(value, word)?;
                        }
                        None if imm.link == ImmLink::None => {
                            return Err(
                                FieldError::InvalidImmediate(token.text.clone()).into()
                            );
                        }
                        None => {
                            if link.is_some() {
                                return Err(EncodeError::MultipleSymbolicOperands);
                            }
                            link = Some(LinkField {
                                expr: token.text.clone(),
                                relocation: token.relocation.clone(),
                                field: imm.clone(),
                            });
                        }
                    }
                }
            }
        }
        Ok(Encoded { word, link })
    }

    /// Decode `word` (located at absolute `address`) back into
    /// tokens: the mnemonic followed by one token per operand.
    /// Relative immediates are shown as the symbol bound at the
    /// target address when the reverse symbol map knows one.
    pub fn decode(
        &self,
        word: Word,
        address: u64,
        symbols: &ReverseSymbolMap,
        machine: &IsaSpec,
    ) -> Result<Vec<Token>, DecodeError> {
        let mut operands: Vec<Option<Token>> = vec![None; self.fields.len()];
        for field in &self.fields {
            let token = match field {
                Field::Reg(reg) => {
                    let number = reg.range.extract(word) as u32;
                    let name = machine
                        .registers
                        .name_of(number)
                        .ok_or(DecodeError::Field(FieldError::NoSuchRegisterNumber(number)))?;
                    Token::new(name)
                }
                Field::Imm(imm) => {
                    let value = imm.read(word);
                    match imm.link {
                        ImmLink::Relative => {
                            let target = address.wrapping_add(value as u64);
                            match symbols.get(&target) {
                                Some(name) => Token::new(name),
                                None => Token::new(&value.to_string()),
                            }
                        }
                        ImmLink::None | ImmLink::Absolute => Token::new(&value.to_string()),
                    }
                }
            };
            operands[field.token_index() - 1] = Some(token);
        }
        let mut tokens = Vec::with_capacity(self.fields.len() + 1);
        tokens.push(Token::new(&self.name));
        for operand in operands {
            // validate() guarantees the indices form a permutation.
            tokens.push(operand.expect("operand token indices are validated at registration"));
        }
        Ok(tokens)
    }
}

impl Display for Instruction {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bits::BitRange;
    use crate::field::{ImmPart, ImmRepr, RegField};
    use crate::machine::{Endianness, IsaSpec, Register, RegisterFile};

    fn machine() -> IsaSpec {
        IsaSpec {
            name: "test".to_string(),
            word_bytes: 4,
            endianness: Endianness::Little,
            registers: RegisterFile::new(vec![
                Register::new(0, "x0", &["zero"]),
                Register::new(1, "x1", &["ra"]),
                Register::new(2, "x2", &["sp"]),
            ]),
            comment_char: '#',
        }
    }

    fn addi_like() -> Instruction {
        Instruction::new(
            "addi",
            Opcode::new(vec![
                OpPart::new(0b0010011, BitRange::new(0, 6)),
                OpPart::new(0b000, BitRange::new(12, 14)),
            ]),
            vec![
                Field::Reg(RegField::new(1, BitRange::new(7, 11))),
                Field::Reg(RegField::new(2, BitRange::new(15, 19))),
                Field::Imm(ImmField::new(
                    3,
                    12,
                    ImmRepr::Signed,
                    vec![ImmPart::new(0, BitRange::new(20, 31))],
                    ImmLink::Absolute,
                )),
            ],
        )
    }

    #[test]
    fn encode_a_literal_operand() {
        let m = machine();
        let tokens: Vec<Token> = ["addi", "x1", "x2", "-1"].iter().map(|t| (*t).into()).collect();
        let encoded = addi_like().encode(&tokens, &m).expect("encodable");
        assert_eq!(encoded.word, 0xfff1_0093);
        assert!(encoded.link.is_none());
    }

    #[test]
    fn symbolic_operand_defers_to_the_linker() {
        let m = machine();
        let tokens: Vec<Token> = ["addi", "x1", "x0", "limit"]
            .iter()
            .map(|t| (*t).into())
            .collect();
        let encoded = addi_like().encode(&tokens, &m).expect("encodable");
        assert_eq!(encoded.word, 0x0000_0093, "placeholder bits must be zero");
        let link = encoded.link.expect("symbolic operand must request linkage");
        assert_eq!(link.expr, "limit");
        assert_eq!(link.relocation, None);
    }

    #[test]
    fn operand_count_is_checked() {
        let m = machine();
        let tokens: Vec<Token> = ["addi", "x1"].iter().map(|t| (*t).into()).collect();
        assert_eq!(
            addi_like().encode(&tokens, &m),
            Err(EncodeError::OperandCount {
                expected: 3,
                found: 1
            })
        );
    }

    #[test]
    fn unknown_register_is_rejected() {
        let m = machine();
        let tokens: Vec<Token> = ["addi", "x9", "x0", "4"].iter().map(|t| (*t).into()).collect();
        assert!(matches!(
            addi_like().encode(&tokens, &m),
            Err(EncodeError::Field(FieldError::UnknownRegister(_)))
        ));
    }

    #[test]
    fn decode_inverts_encode() {
        let m = machine();
        let tokens: Vec<Token> = ["addi", "x1", "x2", "42"].iter().map(|t| (*t).into()).collect();
        let instr = addi_like();
        let encoded = instr.encode(&tokens, &m).expect("encodable");
        let decoded = instr
            .decode(encoded.word, 0, &ReverseSymbolMap::new(), &m)
            .expect("decodable");
        let texts: Vec<&str> = decoded.iter().map(|t| t.text.as_str()).collect();
        assert_eq!(texts, ["addi", "x1", "x2", "42"]);
    }

    #[test]
    fn validation_rejects_overlapping_fields() {
        let m = machine();
        let bad = Instruction::new(
            "bad",
            Opcode::new(vec![OpPart::new(1, BitRange::new(0, 6))]),
            vec![
                Field::Reg(RegField::new(1, BitRange::new(4, 8))),
            ],
        );
        assert!(bad.validate(&m).is_err());
        assert!(addi_like().validate(&m).is_ok());
    }
}
