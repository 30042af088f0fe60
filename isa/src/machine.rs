//! The machine description: word width, byte order, register file
//! and the assembly dialect's comment delimiter.

use std::fmt::{self, Display, Formatter};

use serde::{Deserialize, Serialize};

/// Byte order used when instruction words and data items are laid
/// out in section buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Endianness {
    Little,
    Big,
}

/// One architectural register: its encoding number, canonical name,
/// and any other names the assembler should accept for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Register {
    pub number: u32,
    pub name: String,
    pub aliases: Vec<String>,
}

impl Register {
    pub fn new(number: u32, name: &str, aliases: &[&str]) -> Register {
        Register {
            number,
            name: name.to_string(),
            aliases: aliases.iter().map(|a| a.to_string()).collect(),
        }
    }
}

/// The register file.  Lookups scan the register list; register
/// files are small, and keeping this a plain list keeps the type
/// serializable without auxiliary indexes.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct RegisterFile {
    registers: Vec<Register>,
}

impl RegisterFile {
    pub fn new(registers: Vec<Register>) -> RegisterFile {
        RegisterFile { registers }
    }

    /// Find the encoding number for a register name or alias.
    pub fn number_of(&self, name: &str) -> Option<u32> {
        self.registers
            .iter()
            .find(|r| r.name == name || r.aliases.iter().any(|a| a == name))
            .map(|r| r.number)
    }

    /// Find the canonical name for an encoding number.
    pub fn name_of(&self, number: u32) -> Option<&str> {
        self.registers
            .iter()
            .find(|r| r.number == number)
            .map(|r| r.name.as_str())
    }

    pub fn len(&self) -> usize {
        self.registers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registers.is_empty()
    }
}

/// Description of the target machine as the assembler needs to see
/// it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IsaSpec {
    /// Human-readable name of the instruction set.
    pub name: String,
    /// Width of one instruction word, in bytes.
    pub word_bytes: usize,
    pub endianness: Endianness,
    pub registers: RegisterFile,
    /// Character which begins a comment in the assembly dialect.
    pub comment_char: char,
}

impl IsaSpec {
    pub fn word_bits(&self) -> u32 {
        (self.word_bytes * 8) as u32
    }
}

impl Display for IsaSpec {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}-bit words, {} registers)",
            self.name,
            self.word_bits(),
            self.registers.len()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tiny_register_file() -> RegisterFile {
        RegisterFile::new(vec![
            Register::new(0, "x0", &["zero"]),
            Register::new(1, "x1", &["ra"]),
        ])
    }

    #[test]
    fn register_lookup_accepts_aliases() {
        let regs = tiny_register_file();
        assert_eq!(regs.number_of("x0"), Some(0));
        assert_eq!(regs.number_of("zero"), Some(0));
        assert_eq!(regs.number_of("ra"), Some(1));
        assert_eq!(regs.number_of("sp"), None);
    }

    #[test]
    fn canonical_name_wins_in_reverse_lookup() {
        let regs = tiny_register_file();
        assert_eq!(regs.name_of(1), Some("x1"));
        assert_eq!(regs.name_of(7), None);
    }
}
