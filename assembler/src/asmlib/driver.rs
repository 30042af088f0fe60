//! File-level driving of the assembler: read a source file, run the
//! passes, write the assembled image, optionally print a listing.

use std::ffi::OsStr;
use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};
use std::path::Path;

use tracing::{event, Level};

use super::assembler::Assembler;
use super::listing::Listing;
use super::program::{Program, Section, TEXT_SECTION};
use super::types::{AssemblerFailure, ErrorKind};

#[derive(Debug, Clone, Copy, Default)]
pub struct OutputOptions {
    /// Print a listing (addresses, words, disassembly, symbols) to
    /// stdout after a successful assembly.
    pub list: bool,
}

/// Read a source file into lines.
pub fn read_source_lines(input_file: &OsStr) -> Result<Vec<String>, AssemblerFailure> {
    let input = OpenOptions::new().read(true).open(input_file).map_err(|error| {
        AssemblerFailure::IoError {
            context: format!("reading input file {}", input_file.to_string_lossy()),
            error,
        }
    })?;
    let mut source_lines: Vec<String> = Vec::new();
    for (line_number, item) in BufReader::new(input).lines().enumerate() {
        match item {
            Ok(line) => source_lines.push(line),
            Err(error) => {
                return Err(AssemblerFailure::IoError {
                    context: format!(
                        "reading line {} of input file {}",
                        line_number + 1,
                        input_file.to_string_lossy()
                    ),
                    error,
                });
            }
        }
    }
    Ok(source_lines)
}

/// Lay the program's sections out in one flat byte image, zero-filled
/// between sections.  Returns the image's base address and the bytes;
/// an empty program yields an empty image at address zero.
pub fn flat_image(program: &Program) -> (u64, Vec<u8>) {
    let occupied: Vec<&Section> = program
        .sections
        .values()
        .filter(|s| !s.data.is_empty())
        .collect();
    let Some(base) = occupied.iter().map(|s| s.base).min() else {
        return (0, Vec::new());
    };
    let end = occupied
        .iter()
        .map(|s| s.end())
        .max()
        .expect("a non-empty section list has a maximum end");
    let mut image = vec![0u8; (end - base) as usize];
    for section in occupied {
        let start = (section.base - base) as usize;
        image[start..start + section.data.len()].copy_from_slice(&section.data);
    }
    (base, image)
}

/// Assemble `input_file` and write the flat binary image to
/// `output_file`.
pub fn assemble_file(
    assembler: &Assembler,
    input_file: &OsStr,
    output_file: &Path,
    options: &OutputOptions,
) -> Result<Program, AssemblerFailure> {
    let source_lines = read_source_lines(input_file)?;
    let program = assembler.assemble(&source_lines, None)?;

    let (image_base, image) = flat_image(&program);
    event!(
        Level::INFO,
        "assembled {} source lines into {} bytes at base {:#x}",
        source_lines.len(),
        image.len(),
        image_base
    );

    let mut output = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(output_file)
        .map_err(|error| AssemblerFailure::IoError {
            context: format!("creating output file {}", output_file.display()),
            error,
        })?;
    output
        .write_all(&image)
        .map_err(|error| AssemblerFailure::IoError {
            context: format!("writing output file {}", output_file.display()),
            error,
        })?;

    if options.list {
        print!("{}", Listing::new(assembler, &program));
    }
    Ok(program)
}

/// Read a flat binary image and disassemble it as code based at
/// `base_address`.
pub fn disassemble_file(
    assembler: &Assembler,
    input_file: &OsStr,
    base_address: u64,
) -> Result<Vec<(String, Option<ErrorKind>)>, AssemblerFailure> {
    let data = std::fs::read(input_file).map_err(|error| AssemblerFailure::IoError {
        context: format!("reading input file {}", input_file.to_string_lossy()),
        error,
    })?;
    let mut program = Program::default();
    program.sections.insert(
        TEXT_SECTION.to_string(),
        Section {
            name: TEXT_SECTION.to_string(),
            base: base_address,
            data,
        },
    );
    program.entry_point = base_address;
    Ok(assembler.disassemble(&program, base_address))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rv32;

    fn write_source(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().expect("can create a temporary file");
        std::io::Write::write_all(&mut file, content.as_bytes())
            .expect("can write the temporary file");
        file
    }

    #[test]
    fn assemble_file_writes_the_flat_image() {
        let mut assembler = rv32::assembler().expect("stock configuration builds");
        assembler.set_segment_base(TEXT_SECTION, 0);
        let source = write_source("start:\n  addi sp, sp, -16\n  ret\n");
        let output_dir = tempfile::tempdir().expect("can create a temporary directory");
        let output_path = output_dir.path().join("a.bin");

        let program = assemble_file(
            &assembler,
            source.path().as_os_str(),
            &output_path,
            &OutputOptions::default(),
        )
        .expect("the source assembles");
        assert_eq!(program.entry_point, 0);

        let image = std::fs::read(&output_path).expect("output file exists");
        assert_eq!(image.len(), 8);
        assert_eq!(&image[0..4], &0xff01_0113u32.to_le_bytes());
        assert_eq!(&image[4..8], &0x0000_8067u32.to_le_bytes());
    }

    #[test]
    fn disassemble_file_reads_the_image_back() {
        let mut assembler = rv32::assembler().expect("stock configuration builds");
        assembler.set_segment_base(TEXT_SECTION, 0);
        let mut image_file = tempfile::NamedTempFile::new().expect("can create a temporary file");
        std::io::Write::write_all(&mut image_file, &0x0031_00b3u32.to_le_bytes())
            .expect("can write the image");

        let listing = disassemble_file(&assembler, image_file.path().as_os_str(), 0)
            .expect("the image reads back");
        assert_eq!(listing.len(), 1);
        assert_eq!(listing[0].0, "add x1, x2, x3");
        assert!(listing[0].1.is_none());
    }

    #[test]
    fn flat_image_zero_fills_between_sections() {
        let mut assembler = rv32::assembler().expect("stock configuration builds");
        assembler.set_segment_base(TEXT_SECTION, 0);
        assembler.set_segment_base(".data", 0x10);
        let program = assembler
            .assemble(&["  nop", ".data", "  .byte 0xaa"], None)
            .expect("the source assembles");
        let (base, image) = flat_image(&program);
        assert_eq!(base, 0);
        assert_eq!(image.len(), 0x11);
        assert_eq!(&image[0..4], &0x0000_0013u32.to_le_bytes());
        assert!(image[4..0x10].iter().all(|b| *b == 0));
        assert_eq!(image[0x10], 0xaa);
    }
}
