#![deny(unsafe_code)]

use std::error::Error;
use std::ffi::OsString;
use std::fmt::{self, Display, Formatter};

use clap::ArgAction::{Set, SetTrue};
use clap::Parser;
use tracing::{span, Level};
use tracing_subscriber::prelude::*;

use assembler::{disassemble_file, rv32};

const ABOUT: &str = "Disassembler for flat RV32I binary images";

fn parse_address(text: &str) -> Result<u64, String> {
    match isa::parse_literal(text) {
        Some(value) if value >= 0 => Ok(value as u64),
        _ => Err(format!("'{text}' is not a valid address")),
    }
}

/// Disassembler for flat binary images of RV32I code
#[derive(Parser, Debug)]
#[clap(version, about=ABOUT, long_about = None)]
struct Cli {
    /// File from which the binary image is read
    #[clap(action=Set)]
    input: OsString,

    /// Address at which the image is based
    #[clap(long, default_value = "0x0", value_parser = parse_address)]
    base: u64,

    /// Print the instruction-matching tree instead of disassembling
    #[clap(action = SetTrue, long)]
    dump_decoder: bool,
}

#[derive(Debug)]
enum Fail {
    InitialisationFailure(String),
    ReadFailed(String),
}

impl Display for Fail {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        match self {
            Fail::InitialisationFailure(message) | Fail::ReadFailed(message) => {
                f.write_str(message)
            }
        }
    }
}

impl Error for Fail {}

fn run_disassembler() -> Result<(), Fail> {
    let cli = Cli::parse();

    let fmt_layer = tracing_subscriber::fmt::layer().with_target(true);
    let filter_layer = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new("info"))
        .map_err(|e| {
            Fail::InitialisationFailure(format!("failed to initialise tracing filter: {e}"))
        })?;
    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt_layer)
        .init();

    let span = span!(Level::ERROR, "disassemble", input=?cli.input);
    let _enter = span.enter();

    let assembler = rv32::assembler()
        .map_err(|e| Fail::InitialisationFailure(format!("bad assembler configuration: {e}")))?;

    if cli.dump_decoder {
        print!("{}", assembler.matcher());
        return Ok(());
    }

    let listing = disassemble_file(&assembler, &cli.input, cli.base)
        .map_err(|e| Fail::ReadFailed(e.to_string()))?;
    let word_bytes = assembler.machine().word_bytes as u64;
    for (index, (text, error)) in listing.into_iter().enumerate() {
        let address = cli.base + index as u64 * word_bytes;
        match error {
            None => println!("{address:08x}:  {text}"),
            Some(error) => println!("{address:08x}:  {text}  # {error}"),
        }
    }
    Ok(())
}

fn main() {
    match run_disassembler() {
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(1);
        }
        Ok(()) => {
            std::process::exit(0);
        }
    }
}
