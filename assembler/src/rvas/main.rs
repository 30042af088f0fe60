use std::error::Error;
use std::ffi::OsString;
use std::fmt::{self, Display, Formatter};
use std::path::PathBuf;

use clap::ArgAction::{Set, SetTrue};
use clap::Parser;
use tracing::{event, span, Level};
use tracing_subscriber::prelude::*;

use assembler::{assemble_file, rv32, AssemblerFailure, OutputOptions, TEXT_SECTION};

fn parse_address(text: &str) -> Result<u64, String> {
    match isa::parse_literal(text) {
        Some(value) if value >= 0 => Ok(value as u64),
        _ => Err(format!("'{text}' is not a valid address")),
    }
}

/// Assembler for the RV32I subset
#[derive(Parser, Debug)]
#[clap(version, about, long_about = None)]
struct Cli {
    /// File from which assembly source is read.
    #[clap(action=Set)]
    input: OsString,

    /// File to which the flat binary image is written
    #[clap(action = Set, short = 'o', long)]
    output: OsString,

    /// When set, print a listing of the assembled program (addresses,
    /// words, disassembly and the symbol table).
    #[clap(action = SetTrue, long)]
    list: bool,

    /// Base address of the .text section
    #[clap(long, default_value = "0x0", value_parser = parse_address)]
    text_base: u64,

    /// Base address of the .data section
    #[clap(long, default_value = "0x2000", value_parser = parse_address)]
    data_base: u64,

    /// Base address of the .bss section
    #[clap(long, default_value = "0x3000", value_parser = parse_address)]
    bss_base: u64,
}

#[derive(Debug)]
enum Fail {
    /// We initialised the assembler but then it failed.
    AsmFail(AssemblerFailure),
    /// We were not able to correctly initialise the assembler.
    InitialisationFailure(String),
}

impl Display for Fail {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), fmt::Error> {
        match self {
            Fail::AsmFail(assembler_failure) => assembler_failure.fmt(f),
            Fail::InitialisationFailure(msg) => f.write_str(msg.as_str()),
        }
    }
}

impl Error for Fail {}

fn run_assembler() -> Result<(), Fail> {
    let cli = Cli::parse();

    // See
    // https://docs.rs/tracing-subscriber/latest/tracing_subscriber/fmt/index.html#filtering-events-with-environment-variables
    // for instructions on how to select which trace messages get
    // printed.
    let fmt_layer = tracing_subscriber::fmt::layer().with_target(true);
    let filter_layer = match tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new("info"))
    {
        Err(e) => {
            return Err(Fail::InitialisationFailure(format!(
                "failed to initialise tracing filter (perhaps there is a problem with environment variables): {e}"
            )));
        }
        Ok(layer) => layer,
    };

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt_layer)
        .init();

    let span = span!(Level::ERROR, "assemble", input=?cli.input, output=?cli.output);
    let _enter = span.enter();

    let mut assembler = rv32::assembler()
        .map_err(|e| Fail::InitialisationFailure(format!("bad assembler configuration: {e}")))?;
    assembler.set_segment_base(TEXT_SECTION, cli.text_base);
    assembler.set_segment_base(".data", cli.data_base);
    assembler.set_segment_base(".bss", cli.bss_base);

    let output_path = PathBuf::from(cli.output);
    let options = OutputOptions { list: cli.list };
    let result = assemble_file(&assembler, &cli.input, &output_path, &options)
        .map(|_| ())
        .map_err(Fail::AsmFail);
    if let Err(e) = &result {
        event!(Level::ERROR, "assembly failed: {:?}", e);
    } else {
        event!(Level::INFO, "assembly succeeded");
    }
    result
}

fn main() {
    unsafe { backtrace_on_stack_overflow::enable() };

    match run_assembler() {
        Err(e) => {
            eprintln!("{e}");
            std::process::exit(1);
        }
        Ok(()) => {
            std::process::exit(0);
        }
    }
}
