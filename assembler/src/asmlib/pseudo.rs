//! Pseudo-instructions: mnemonics which expand to real-instruction
//! lines instead of encoding directly.

use isa::Token;

use super::symtab::SymbolTable;
use super::tokenizer::TokenizedLine;

/// An expansion produces the replacement token lines (possibly
/// empty), or a message saying why the operands do not fit this
/// pseudo-instruction.  "Not applicable" is not expressed here: a
/// mnemonic with no registered pseudo-instruction simply passes
/// through the expansion pass untouched.
pub type PseudoHandler =
    fn(&TokenizedLine, &SymbolTable) -> Result<Vec<Vec<Token>>, String>;

pub struct PseudoInstruction {
    name: String,
    handler: PseudoHandler,
}

impl PseudoInstruction {
    pub fn new(name: &str, handler: PseudoHandler) -> PseudoInstruction {
        PseudoInstruction {
            name: name.to_string(),
            handler,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn expand(
        &self,
        line: &TokenizedLine,
        symbols: &SymbolTable,
    ) -> Result<Vec<Vec<Token>>, String> {
        (self.handler)(line, symbols)
    }
}

impl std::fmt::Debug for PseudoInstruction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PseudoInstruction")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}
