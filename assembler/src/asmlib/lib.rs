#![deny(unsafe_code)]
#![warn(clippy::must_use_candidate)]
#![warn(clippy::manual_string_new)]
#![warn(clippy::semicolon_if_nothing_returned)]
#![warn(clippy::clone_on_ref_ptr)]
#![warn(clippy::match_same_arms)]
#![warn(clippy::explicit_iter_loop)]

mod assembler;
mod context;
mod directive;
mod driver;
mod eval;
mod listing;
mod matcher;
mod program;
mod pseudo;
mod relocation;
pub mod rv32;
mod symtab;
mod tokenizer;
mod types;


pub use assembler::Assembler;
pub use context::AsmContext;
pub use directive::{standard_directives, Directive, DirectiveFailure, DirectiveHandler};
pub use driver::{
    assemble_file, disassemble_file, flat_image, read_source_lines, OutputOptions,
};
pub use eval::{evaluate, EvalError};
pub use listing::Listing;
pub use matcher::Matcher;
pub use program::{Program, Section, TEXT_SECTION};
pub use pseudo::{PseudoHandler, PseudoInstruction};
pub use relocation::{Relocation, RelocationHandler};
pub use symtab::{Symbol, SymbolKind, SymbolMap, SymbolTable, ADDRESS_SYMBOL};
pub use tokenizer::{SourceProgram, TokenizedLine};
pub use types::{
    AssemblerFailure, AssemblyError, ConfigError, DirectiveError, ErrorKind, InstructionError,
    LineNumber, RelocationError, SymbolError, TokenizationError,
};
