//! The assembler: registries, the four passes and disassembly.
//!
//! Pass 0 tokenizes (running early directives as it goes), pass 1
//! expands pseudo-instructions, pass 2 encodes words and records link
//! requests, pass 3 resolves the link requests against the completed
//! symbol table and patches the emitted bytes in place.  Each pass
//! fully consumes its predecessor's output; per-line problems
//! accumulate and fail the pass as a whole, so no partial program
//! ever reaches a caller.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use tracing::{event, Level};

use isa::{
    read_word, write_word, Encoded, Instruction, IsaSpec, LinkField, ReverseSymbolMap, Word,
};

use super::context::AsmContext;
use super::directive::{Directive, DirectiveFailure};
use super::matcher::Matcher;
use super::program::{Program, TEXT_SECTION};
use super::pseudo::PseudoInstruction;
use super::relocation::Relocation;
use super::symtab::{Symbol, SymbolMap};
use super::tokenizer::{
    join_parentheses, scan_line, split_directive, split_labels, split_relocations, strip_comment,
    SourceProgram, TokenizedLine,
};
use super::types::{
    AssemblerFailure, AssemblyError, ConfigError, DirectiveError, ErrorKind, InstructionError,
    LineNumber, RelocationError, SymbolError,
};

/// A deferred patch: the word at `offset` within `section` must be
/// re-encoded by `field` once the symbol expression it refers to can
/// be evaluated.
#[derive(Debug)]
pub(crate) struct LinkRequest {
    source_line: LineNumber,
    offset: u64,
    section: String,
    field: LinkField,
}

/// A configured assembler.  Building one validates the whole
/// configuration (duplicate names, malformed instruction
/// descriptions, undecodable instruction sets); once built it is
/// immutable apart from [`Assembler::set_segment_base`], and one
/// instance can serve any number of sequential `assemble` and
/// concurrent `disassemble` calls.
#[derive(Debug)]
pub struct Assembler {
    machine: IsaSpec,
    instructions: Vec<Arc<Instruction>>,
    instruction_map: BTreeMap<String, Arc<Instruction>>,
    pseudo_map: BTreeMap<String, PseudoInstruction>,
    directive_map: BTreeMap<String, Directive>,
    early_directives: BTreeSet<String>,
    relocation_map: BTreeMap<String, Relocation>,
    matcher: Matcher,
    section_bases: BTreeMap<String, u64>,
}

impl Assembler {
    pub fn new(
        machine: IsaSpec,
        instructions: Vec<Instruction>,
        pseudo_instructions: Vec<PseudoInstruction>,
        directives: Vec<Directive>,
        relocations: Vec<Relocation>,
    ) -> Result<Assembler, ConfigError> {
        let instructions: Vec<Arc<Instruction>> =
            instructions.into_iter().map(Arc::new).collect();
        let mut instruction_map = BTreeMap::new();
        for instruction in &instructions {
            instruction
                .validate(&machine)
                .map_err(|reason| ConfigError::BadInstruction {
                    name: instruction.name().to_string(),
                    reason,
                })?;
            if instruction_map
                .insert(instruction.name().to_string(), Arc::clone(instruction))
                .is_some()
            {
                return Err(ConfigError::DuplicateInstruction(
                    instruction.name().to_string(),
                ));
            }
        }

        let mut pseudo_map = BTreeMap::new();
        for pseudo in pseudo_instructions {
            let name = pseudo.name().to_string();
            if pseudo_map.insert(name.clone(), pseudo).is_some() {
                return Err(ConfigError::DuplicatePseudoInstruction(name));
            }
        }

        let mut directive_map = BTreeMap::new();
        let mut early_directives = BTreeSet::new();
        for directive in directives {
            let name = directive.name().to_string();
            if directive.early() {
                early_directives.insert(name.clone());
            }
            if directive_map.insert(name.clone(), directive).is_some() {
                return Err(ConfigError::DuplicateDirective(name));
            }
        }

        let mut relocation_map = BTreeMap::new();
        for relocation in relocations {
            let name = relocation.name().to_string();
            if relocation_map.insert(name.clone(), relocation).is_some() {
                return Err(ConfigError::DuplicateRelocation(name));
            }
        }

        let matcher = Matcher::new(&instructions)?;
        event!(
            Level::DEBUG,
            "configured assembler for {}: {} instructions, {} pseudo-instructions, {} directives",
            machine.name,
            instructions.len(),
            pseudo_map.len(),
            directive_map.len()
        );

        Ok(Assembler {
            machine,
            instructions,
            instruction_map,
            pseudo_map,
            directive_map,
            early_directives,
            relocation_map,
            matcher,
            section_bases: BTreeMap::new(),
        })
    }

    /// Declare the base address of a section.  Every section the
    /// program mentions (including the default code section) must be
    /// declared before `assemble` is called.
    pub fn set_segment_base(&mut self, section: &str, base: u64) {
        self.section_bases.insert(section.to_string(), base);
    }

    pub fn machine(&self) -> &IsaSpec {
        &self.machine
    }

    /// The decode trie, for diagnostic introspection.
    pub fn matcher(&self) -> &Matcher {
        &self.matcher
    }

    /// The registered instruction descriptors, in registration order.
    pub fn instructions(&self) -> &[Arc<Instruction>] {
        &self.instructions
    }

    /// All registered mnemonics, real and pseudo.
    pub fn opcodes(&self) -> BTreeSet<String> {
        self.instruction_map
            .keys()
            .chain(self.pseudo_map.keys())
            .cloned()
            .collect()
    }

    /// Assemble `lines` into a program, optionally seeding the symbol
    /// table.  On failure the caller gets either the ordered per-line
    /// error list or a single configuration error; never a partial
    /// program.
    pub fn assemble<S: AsRef<str>>(
        &self,
        lines: &[S],
        symbols: Option<&SymbolMap>,
    ) -> Result<Program, AssemblerFailure> {
        let mut context = AsmContext::new(&self.machine, &self.section_bases, symbols)?;

        let tokenized = self.pass0(lines, &mut context)?;
        event!(Level::DEBUG, "pass 0: {} lines tokenized", tokenized.len());

        let expanded = self.pass1(tokenized, &context)?;
        event!(Level::DEBUG, "pass 1: {} lines after expansion", expanded.len());

        let requests = self.pass2(&expanded, &mut context)?;
        event!(
            Level::DEBUG,
            "pass 2: {} bytes emitted, {} link requests",
            context.program.size(),
            requests.len()
        );

        self.pass3(&mut context, &requests)?;

        let mut program = context.into_program();
        program.entry_point = self.section_bases[TEXT_SECTION];
        Ok(program)
    }

    /// Split a complete source text on line endings and assemble it.
    pub fn assemble_source(
        &self,
        source: &str,
        symbols: Option<&SymbolMap>,
    ) -> Result<Program, AssemblerFailure> {
        let lines: Vec<&str> = source.lines().collect();
        self.assemble(&lines, symbols)
    }

    /// Disassemble the code section of `program`, one entry per
    /// instruction word, in address order.
    pub fn disassemble(
        &self,
        program: &Program,
        base_address: u64,
    ) -> Vec<(String, Option<ErrorKind>)> {
        let mut listing = Vec::new();
        let Some(text) = program.section(TEXT_SECTION) else {
            return listing;
        };
        let width = self.machine.word_bytes;
        let mut offset = 0;
        while offset + width <= text.data.len() {
            let word = read_word(&text.data[offset..], width, self.machine.endianness);
            listing.push(self.disassemble_word(word, &program.symbols, base_address + offset as u64));
            offset += width;
        }
        listing
    }

    /// Disassemble a single word located at `base_address`.
    pub fn disassemble_word(
        &self,
        word: Word,
        symbols: &ReverseSymbolMap,
        base_address: u64,
    ) -> (String, Option<ErrorKind>) {
        let Some(instruction) = self.matcher.match_word(word) else {
            return (
                "unknown instruction".to_string(),
                Some(ErrorKind::Instruction(InstructionError::UnknownWord(word))),
            );
        };
        match instruction.decode(word, base_address, symbols, &self.machine) {
            Ok(tokens) => {
                let text = match tokens.split_first() {
                    Some((mnemonic, [])) => mnemonic.text.clone(),
                    Some((mnemonic, operands)) => {
                        let operands: Vec<&str> =
                            operands.iter().map(|t| t.text.as_str()).collect();
                        format!("{} {}", mnemonic.text, operands.join(", "))
                    }
                    None => String::new(),
                };
                (text, None)
            }
            Err(error) => (
                "invalid instruction".to_string(),
                Some(ErrorKind::Instruction(InstructionError::Decode {
                    mnemonic: instruction.name().to_string(),
                    error,
                })),
            ),
        }
    }

    /// Tokenization and label/directive/relocation splitting, with
    /// early directives executed as their lines are seen.
    fn pass0<S: AsRef<str>>(
        &self,
        lines: &[S],
        context: &mut AsmContext,
    ) -> Result<SourceProgram, AssemblerFailure> {
        let mut errors: Vec<AssemblyError> = Vec::new();
        let mut tokenized: SourceProgram = Vec::with_capacity(lines.len());
        let mut defined: BTreeSet<String> = BTreeSet::new();
        // Labels from label-only lines wait here for the next line
        // with content.
        let mut carry: Vec<Symbol> = Vec::new();
        let is_relocation = |name: &str| self.relocation_map.contains_key(name);

        for (index, line) in lines.iter().enumerate() {
            let line_number = (index + 1) as LineNumber;
            let text = line.as_ref();
            if text.is_empty() {
                continue;
            }
            let fragments = match scan_line(text).and_then(join_parentheses) {
                Ok(fragments) => fragments,
                Err(e) => {
                    errors.push(AssemblyError::new(line_number, ErrorKind::Tokenization(e)));
                    continue;
                }
            };
            let fragments = strip_comment(fragments, self.machine.comment_char);
            let (labels, rest) = match split_labels(fragments) {
                Ok(split) => split,
                Err(kind) => {
                    errors.push(AssemblyError::new(line_number, kind));
                    continue;
                }
            };
            if let Some(duplicate) = labels.iter().find(|l| defined.contains(&l.name)) {
                errors.push(AssemblyError::new(
                    line_number,
                    ErrorKind::Symbol(SymbolError::Duplicate(duplicate.name.clone())),
                ));
                continue;
            }
            for label in &labels {
                defined.insert(label.name.clone());
            }
            let (directive, rest) = match split_directive(rest) {
                Ok(split) => split,
                Err(e) => {
                    errors.push(AssemblyError::new(line_number, ErrorKind::Tokenization(e)));
                    continue;
                }
            };
            let tokens = split_relocations(rest, &is_relocation);

            let mut line = TokenizedLine {
                source_line: line_number,
                tokens,
                directive,
                symbols: labels,
            };
            if line.tokens.is_empty() && line.directive.is_none() {
                carry.append(&mut line.symbols);
                continue;
            }
            if !carry.is_empty() {
                let mut symbols = std::mem::take(&mut carry);
                symbols.append(&mut line.symbols);
                line.symbols = symbols;
            }

            if let Some(name) = &line.directive {
                if self.early_directives.contains(name) {
                    let directive = self
                        .directive_map
                        .get(name)
                        .expect("early directives are always registered directives");
                    match directive.handle(context, &line) {
                        // An early directive's bytes (if any) are
                        // not emitted in this pass.
                        Ok(_) => (),
                        Err(DirectiveFailure::Report(kind)) => {
                            errors.push(AssemblyError::new(line_number, kind));
                            tokenized.push(line);
                            continue;
                        }
                        Err(DirectiveFailure::Fatal(e)) => return Err(e.into()),
                    }
                }
            }
            tokenized.push(line);
        }

        if errors.is_empty() {
            Ok(tokenized)
        } else {
            Err(AssemblerFailure::Assembly(errors))
        }
    }

    /// Pseudo-instruction expansion.
    fn pass1(
        &self,
        lines: SourceProgram,
        context: &AsmContext,
    ) -> Result<SourceProgram, AssemblerFailure> {
        let mut errors: Vec<AssemblyError> = Vec::new();
        let mut expanded: SourceProgram = Vec::with_capacity(lines.len());

        for line in lines {
            let Some(pseudo) = line.opcode().and_then(|m| self.pseudo_map.get(m)) else {
                expanded.push(line);
                continue;
            };
            match pseudo.expand(&line, &context.symbols) {
                Ok(replacements) => {
                    event!(
                        Level::TRACE,
                        "line {}: '{}' expanded to {} lines",
                        line.source_line,
                        pseudo.name(),
                        replacements.len()
                    );
                    // Only the first replacement line keeps the
                    // original's labels and directive; all keep its
                    // line number for error reporting.
                    for (i, tokens) in replacements.into_iter().enumerate() {
                        expanded.push(TokenizedLine {
                            source_line: line.source_line,
                            tokens,
                            directive: if i == 0 { line.directive.clone() } else { None },
                            symbols: if i == 0 { line.symbols.clone() } else { Vec::new() },
                        });
                    }
                }
                Err(message) => {
                    if self.instruction_map.contains_key(pseudo.name()) {
                        // The mnemonic also names a real instruction;
                        // treat the failed expansion as "not a
                        // pseudo-instruction" and let pass 2 encode
                        // the line as written.
                        expanded.push(line);
                    } else {
                        errors.push(AssemblyError::new(
                            line.source_line,
                            ErrorKind::PseudoExpansion {
                                mnemonic: pseudo.name().to_string(),
                                message,
                            },
                        ));
                    }
                }
            }
        }

        if errors.is_empty() {
            Ok(expanded)
        } else {
            Err(AssemblerFailure::Assembly(errors))
        }
    }

    /// Machine-code translation: bind labels, run directives, encode
    /// instructions, record link requests.
    fn pass2(
        &self,
        lines: &SourceProgram,
        context: &mut AsmContext,
    ) -> Result<Vec<LinkRequest>, AssemblerFailure> {
        let mut errors: Vec<AssemblyError> = Vec::new();
        let mut requests: Vec<LinkRequest> = Vec::new();

        for line in lines {
            // Labels bind to the emission address as it is when the
            // line starts; a directive on the same line runs after
            // the binding and may move the cursor.
            let address = context.address();
            for symbol in &line.symbols {
                if let Err(e) = context.add_symbol(line.source_line, symbol.clone(), address) {
                    errors.push(e);
                }
            }

            if let Some(name) = &line.directive {
                if self.early_directives.contains(name) {
                    // Ran during pass 0; nothing to emit now.
                    continue;
                }
                let Some(directive) = self.directive_map.get(name) else {
                    errors.push(AssemblyError::new(
                        line.source_line,
                        ErrorKind::Directive(DirectiveError::Unknown(name.clone())),
                    ));
                    continue;
                };
                match directive.handle(context, line) {
                    Ok(Some(bytes)) => context.append_bytes(&bytes),
                    Ok(None) => (),
                    Err(DirectiveFailure::Report(kind)) => {
                        errors.push(AssemblyError::new(line.source_line, kind));
                    }
                    Err(DirectiveFailure::Fatal(e)) => return Err(e.into()),
                }
                continue;
            }

            let Some(mnemonic) = line.opcode() else {
                continue;
            };
            let Some(instruction) = self.instruction_map.get(mnemonic) else {
                errors.push(AssemblyError::new(
                    line.source_line,
                    ErrorKind::Instruction(InstructionError::UnknownOpcode(
                        mnemonic.to_string(),
                    )),
                ));
                continue;
            };
            let offset = context.offset();
            match instruction.encode(&line.tokens, &self.machine) {
                Ok(Encoded { word, link }) => {
                    if let Some(field) = link {
                        event!(
                            Level::TRACE,
                            "line {}: '{}' defers '{}' to the linker",
                            line.source_line,
                            mnemonic,
                            field.expr
                        );
                        requests.push(LinkRequest {
                            source_line: line.source_line,
                            offset,
                            section: context.current_section_name().to_string(),
                            field,
                        });
                    }
                    // The placeholder word is emitted now so that
                    // every later line keeps its final address.
                    context.append_word(word);
                }
                Err(error) => {
                    errors.push(AssemblyError::new(
                        line.source_line,
                        ErrorKind::Instruction(InstructionError::Encode {
                            mnemonic: mnemonic.to_string(),
                            error,
                        }),
                    ));
                }
            }
        }

        if errors.is_empty() {
            context.record_address_symbols();
            Ok(requests)
        } else {
            Err(AssemblerFailure::Assembly(errors))
        }
    }

    /// Symbol linkage: evaluate each deferred expression, apply its
    /// relocation and patch the emitted word in place.
    fn pass3(
        &self,
        context: &mut AsmContext,
        requests: &[LinkRequest],
    ) -> Result<(), AssemblerFailure> {
        let mut errors: Vec<AssemblyError> = Vec::new();

        for request in requests {
            let section_base = context
                .program
                .section(&request.section)
                .expect("link requests only ever name declared sections")
                .base;
            let address = section_base + request.offset;
            // The instruction's own address, visible to the
            // expression being resolved.  Rebound for every request.
            context.symbols.set_link_address(address);

            let resolved = match context.eval(&request.field.expr) {
                Ok(value) => value,
                Err(e) => {
                    errors.push(AssemblyError::new(
                        request.source_line,
                        ErrorKind::Symbol(SymbolError::Unresolved {
                            expr: request.field.expr.clone(),
                            reason: e.to_string(),
                        }),
                    ));
                    continue;
                }
            };

            let resolved = match &request.field.relocation {
                None => resolved,
                Some(name) => match self.relocation_map.get(name) {
                    None => {
                        errors.push(AssemblyError::new(
                            request.source_line,
                            ErrorKind::Relocation(RelocationError::Unknown(name.clone())),
                        ));
                        continue;
                    }
                    Some(relocation) => match relocation.handle(resolved, address) {
                        Ok(value) => value,
                        Err(message) => {
                            errors.push(AssemblyError::new(
                                request.source_line,
                                ErrorKind::Relocation(RelocationError::Failed {
                                    name: name.clone(),
                                    message,
                                }),
                            ));
                            continue;
                        }
                    },
                },
            };

            let width = context.word_bytes();
            let endianness = context.endianness();
            let section = context
                .program
                .section_mut(&request.section)
                .expect("link requests only ever name declared sections");
            let start = request.offset as usize;
            assert!(
                section.data.len() >= start + width,
                "link request at offset {start} lies outside section '{}'",
                request.section
            );
            let slice = &mut section.data[start..start + width];
            let word = read_word(slice, width, endianness);
            match request.field.field.resolve(resolved, word, address) {
                Ok(patched) => {
                    event!(
                        Level::TRACE,
                        "line {}: patched {:#x} -> {:#x} at {:#x}",
                        request.source_line,
                        word,
                        patched,
                        address
                    );
                    write_word(slice, patched, width, endianness);
                }
                Err(error) => {
                    errors.push(AssemblyError::new(
                        request.source_line,
                        ErrorKind::Instruction(InstructionError::Patch {
                            expr: request.field.expr.clone(),
                            error,
                        }),
                    ));
                }
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(AssemblerFailure::Assembly(errors))
        }
    }
}
