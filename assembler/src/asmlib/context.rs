//! The mutable state of one assembly run.
//!
//! One `assemble` call owns exactly one `AsmContext`; the passes and
//! the directive handlers all work through it.  Nothing here outlives
//! the run, which is what makes the assembler itself shareable.

use std::collections::BTreeMap;

use isa::{Endianness, IsaSpec, Word};

use super::eval::{self, EvalError};
use super::program::{Program, Section, TEXT_SECTION};
use super::symtab::{Symbol, SymbolTable};
use super::types::{AssemblyError, ConfigError, ErrorKind, LineNumber};

/// Shared mutable state for one assembly run: the symbol table, the
/// program being built and the cursor naming the section currently
/// being emitted into.
#[derive(Debug)]
pub struct AsmContext {
    pub(crate) symbols: SymbolTable,
    pub(crate) program: Program,
    current_section: String,
    word_bytes: usize,
    endianness: Endianness,
}

impl AsmContext {
    /// Start a run: sections are created from the declared bases, the
    /// symbol table is seeded (if a seed was supplied) and the cursor
    /// points at the default code section.  Fails if the default code
    /// section has no declared base.
    pub(crate) fn new(
        machine: &IsaSpec,
        bases: &BTreeMap<String, u64>,
        seed: Option<&BTreeMap<String, u64>>,
    ) -> Result<AsmContext, ConfigError> {
        if !bases.contains_key(TEXT_SECTION) {
            return Err(ConfigError::UndeclaredSection(TEXT_SECTION.to_string()));
        }
        Ok(AsmContext {
            symbols: match seed {
                Some(map) => SymbolTable::seeded(map),
                None => SymbolTable::new(),
            },
            program: Program::with_sections(bases),
            current_section: TEXT_SECTION.to_string(),
            word_bytes: machine.word_bytes,
            endianness: machine.endianness,
        })
    }

    /// Point the emission cursor at `name`.  Referencing a section
    /// with no declared base is a configuration error, not a per-line
    /// one.
    pub fn switch_section(&mut self, name: &str) -> Result<(), ConfigError> {
        if self.program.sections.contains_key(name) {
            self.current_section = name.to_string();
            Ok(())
        } else {
            Err(ConfigError::UndeclaredSection(name.to_string()))
        }
    }

    pub fn current_section_name(&self) -> &str {
        &self.current_section
    }

    fn current_section(&self) -> &Section {
        self.program
            .section(&self.current_section)
            .expect("the emission cursor only ever points at a declared section")
    }

    /// Byte offset of the next emission into the current section.
    pub fn offset(&self) -> u64 {
        self.current_section().data.len() as u64
    }

    /// Absolute address of the next emission.
    pub fn address(&self) -> u64 {
        let section = self.current_section();
        section.base + section.data.len() as u64
    }

    pub(crate) fn append_bytes(&mut self, bytes: &[u8]) {
        let name = self.current_section.clone();
        self.program
            .section_mut(&name)
            .expect("the emission cursor only ever points at a declared section")
            .data
            .extend_from_slice(bytes);
    }

    /// Append one instruction word, in the machine's endianness.
    pub(crate) fn append_word(&mut self, word: Word) {
        let mut bytes = vec![0u8; self.word_bytes];
        isa::write_word(&mut bytes, word, self.word_bytes, self.endianness);
        self.append_bytes(&bytes);
    }

    pub(crate) fn word_bytes(&self) -> usize {
        self.word_bytes
    }

    pub(crate) fn endianness(&self) -> Endianness {
        self.endianness
    }

    /// Bind a symbol, reporting a duplicate against `line`.  This is
    /// the `add_symbol` operation directive handlers use (`.equ` and
    /// friends).
    pub fn add_symbol(
        &mut self,
        line: LineNumber,
        symbol: Symbol,
        value: u64,
    ) -> Result<(), AssemblyError> {
        self.symbols
            .define(symbol, value)
            .map_err(|e| AssemblyError::new(line, ErrorKind::Symbol(e)))
    }

    /// Evaluate an expression against the run's symbol table.
    pub fn eval(&self, expr: &str) -> Result<i64, EvalError> {
        eval::evaluate(expr, &self.symbols)
    }

    /// Record every user-defined address symbol in the program's
    /// reverse map.  The synthetic link-address symbol is filtered
    /// out by the symbol table itself, and constants never qualify.
    pub(crate) fn record_address_symbols(&mut self) {
        for (name, value) in self.symbols.address_symbols() {
            self.program.symbols.insert(value, name.to_string());
        }
    }

    /// Finish the run, surrendering the assembled program.
    pub(crate) fn into_program(self) -> Program {
        self.program
    }
}
