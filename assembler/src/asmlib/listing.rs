//! Human-readable listing of an assembled program: per-section
//! address/word/disassembly columns followed by the symbol table.

use std::fmt::{self, Display, Formatter};

use isa::read_word;

use super::assembler::Assembler;
use super::program::{Program, TEXT_SECTION};

pub struct Listing<'a> {
    assembler: &'a Assembler,
    program: &'a Program,
}

impl<'a> Listing<'a> {
    pub fn new(assembler: &'a Assembler, program: &'a Program) -> Listing<'a> {
        Listing { assembler, program }
    }
}

impl Display for Listing<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let machine = self.assembler.machine();
        let width = machine.word_bytes;
        for section in self.program.sections.values() {
            writeln!(
                f,
                "section {}  {:#010x}..{:#010x}  ({} bytes)",
                section.name,
                section.base,
                section.end(),
                section.data.len()
            )?;
            let whole_words =
                section.data.len() % width == 0 && section.name == TEXT_SECTION;
            if whole_words {
                let mut offset = 0;
                while offset + width <= section.data.len() {
                    let address = section.base + offset as u64;
                    if let Some(label) = self.program.symbols.get(&address) {
                        writeln!(f, "{label}:")?;
                    }
                    let word = read_word(&section.data[offset..], width, machine.endianness);
                    let (text, _) =
                        self.assembler
                            .disassemble_word(word, &self.program.symbols, address);
                    writeln!(f, "  {address:08x}:  {word:08x}  {text}")?;
                    offset += width;
                }
            } else {
                for (row_index, row) in section.data.chunks(16).enumerate() {
                    let address = section.base + (row_index * 16) as u64;
                    write!(f, "  {address:08x}: ")?;
                    for byte in row {
                        write!(f, " {byte:02x}")?;
                    }
                    writeln!(f)?;
                }
            }
        }
        if !self.program.symbols.is_empty() {
            writeln!(f, "symbols:")?;
            for (address, name) in &self.program.symbols {
                writeln!(f, "  {address:#010x}  {name}")?;
            }
        }
        Ok(())
    }
}
