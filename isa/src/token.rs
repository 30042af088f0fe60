//! Operand tokens as the instruction encoders see them.

use std::collections::BTreeMap;
use std::fmt::{self, Display, Formatter};

use serde::{Deserialize, Serialize};

/// One token of an assembly line: a piece of text, possibly carrying
/// the name of a relocation which must transform the token's resolved
/// value before it is encoded.  The relocation name is attached by
/// the tokenizer (a relocation hint token applies to the token which
/// follows it) and travels with the token through pseudo-instruction
/// expansion into encoding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    pub text: String,
    pub relocation: Option<String>,
}

impl Token {
    pub fn new(text: &str) -> Token {
        Token {
            text: text.to_string(),
            relocation: None,
        }
    }

    pub fn with_relocation(text: &str, relocation: &str) -> Token {
        Token {
            text: text.to_string(),
            relocation: Some(relocation.to_string()),
        }
    }
}

impl From<&str> for Token {
    fn from(text: &str) -> Token {
        Token::new(text)
    }
}

impl Display for Token {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match &self.relocation {
            Some(reloc) => write!(f, "{} {}", reloc, self.text),
            None => f.write_str(&self.text),
        }
    }
}

/// Map from absolute address to the name of the address-kind symbol
/// bound there; the disassembler uses it to show branch targets by
/// name.
pub type ReverseSymbolMap = BTreeMap<u64, String>;
