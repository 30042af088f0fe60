//! An RV32I-subset backend: the register file, instruction
//! descriptors, pseudo-instructions and relocations for a 32-bit
//! little-endian RISC machine.  This is the instruction set the
//! `rvas`/`rvdis` tools speak; it also serves as the reference
//! configuration for the test suite.

use isa::{
    parse_literal, BitRange, Endianness, Field, ImmField, ImmLink, ImmPart, ImmRepr, Instruction,
    IsaSpec, OpPart, Opcode, RegField, Register, RegisterFile, Token,
};

use super::assembler::Assembler;
use super::directive::standard_directives;
use super::pseudo::PseudoInstruction;
use super::relocation::Relocation;
use super::symtab::SymbolTable;
use super::tokenizer::TokenizedLine;
use super::types::ConfigError;

const ABI_NAMES: [&str; 32] = [
    "zero", "ra", "sp", "gp", "tp", "t0", "t1", "t2", "s0", "s1", "a0", "a1", "a2", "a3", "a4",
    "a5", "a6", "a7", "s2", "s3", "s4", "s5", "s6", "s7", "s8", "s9", "s10", "s11", "t3", "t4",
    "t5", "t6",
];

pub fn registers() -> RegisterFile {
    RegisterFile::new(
        (0..32)
            .map(|n| {
                let mut aliases = vec![ABI_NAMES[n]];
                if n == 8 {
                    aliases.push("fp");
                }
                Register::new(n as u32, &format!("x{n}"), &aliases)
            })
            .collect(),
    )
}

pub fn machine() -> IsaSpec {
    IsaSpec {
        name: "RV32I".to_string(),
        word_bytes: 4,
        endianness: Endianness::Little,
        registers: registers(),
        comment_char: '#',
    }
}

fn opcode(bits: u64) -> OpPart {
    OpPart::new(bits, BitRange::new(0, 6))
}

fn funct3(bits: u64) -> OpPart {
    OpPart::new(bits, BitRange::new(12, 14))
}

fn funct7(bits: u64) -> OpPart {
    OpPart::new(bits, BitRange::new(25, 31))
}

fn reg(token_index: usize, start: u8) -> Field {
    Field::Reg(RegField::new(token_index, BitRange::new(start, start + 4)))
}

fn r_type(name: &str, f3: u64, f7: u64) -> Instruction {
    Instruction::new(
        name,
        Opcode::new(vec![opcode(0b011_0011), funct3(f3), funct7(f7)]),
        vec![reg(1, 7), reg(2, 15), reg(3, 20)],
    )
}

fn i_type(name: &str, opcode_bits: u64, f3: u64) -> Instruction {
    Instruction::new(
        name,
        Opcode::new(vec![opcode(opcode_bits), funct3(f3)]),
        vec![
            reg(1, 7),
            reg(2, 15),
            Field::Imm(ImmField::new(
                3,
                12,
                ImmRepr::Signed,
                vec![ImmPart::new(0, BitRange::new(20, 31))],
                ImmLink::Absolute,
            )),
        ],
    )
}

fn u_type(name: &str, opcode_bits: u64) -> Instruction {
    Instruction::new(
        name,
        Opcode::new(vec![opcode(opcode_bits)]),
        vec![
            reg(1, 7),
            Field::Imm(ImmField::new(
                2,
                20,
                ImmRepr::Unsigned,
                vec![ImmPart::new(0, BitRange::new(12, 31))],
                ImmLink::Absolute,
            )),
        ],
    )
}

fn b_type(name: &str, f3: u64) -> Instruction {
    Instruction::new(
        name,
        Opcode::new(vec![opcode(0b110_0011), funct3(f3)]),
        vec![
            reg(1, 15),
            reg(2, 20),
            Field::Imm(ImmField::new(
                3,
                13,
                ImmRepr::Signed,
                vec![
                    ImmPart::new(11, BitRange::new(7, 7)),
                    ImmPart::new(1, BitRange::new(8, 11)),
                    ImmPart::new(5, BitRange::new(25, 30)),
                    ImmPart::new(12, BitRange::new(31, 31)),
                ],
                ImmLink::Relative,
            )),
        ],
    )
}

fn jal_instruction() -> Instruction {
    Instruction::new(
        "jal",
        Opcode::new(vec![opcode(0b110_1111)]),
        vec![
            reg(1, 7),
            Field::Imm(ImmField::new(
                2,
                21,
                ImmRepr::Signed,
                vec![
                    ImmPart::new(12, BitRange::new(12, 19)),
                    ImmPart::new(11, BitRange::new(20, 20)),
                    ImmPart::new(1, BitRange::new(21, 30)),
                    ImmPart::new(20, BitRange::new(31, 31)),
                ],
                ImmLink::Relative,
            )),
        ],
    )
}

/// `ecall` and `ebreak` share opcode and funct3; only the fixed
/// i-immediate tells them apart, which makes them the deepest pair in
/// the decode tree.
fn system(name: &str, imm12: u64) -> Instruction {
    Instruction::new(
        name,
        Opcode::new(vec![
            opcode(0b111_0011),
            funct3(0b000),
            OpPart::new(imm12, BitRange::new(20, 31)),
        ]),
        Vec::new(),
    )
}

pub fn instructions() -> Vec<Instruction> {
    vec![
        r_type("add", 0b000, 0b000_0000),
        r_type("sub", 0b000, 0b010_0000),
        r_type("sll", 0b001, 0b000_0000),
        r_type("slt", 0b010, 0b000_0000),
        r_type("sltu", 0b011, 0b000_0000),
        r_type("xor", 0b100, 0b000_0000),
        r_type("srl", 0b101, 0b000_0000),
        r_type("sra", 0b101, 0b010_0000),
        r_type("or", 0b110, 0b000_0000),
        r_type("and", 0b111, 0b000_0000),
        i_type("addi", 0b001_0011, 0b000),
        i_type("slti", 0b001_0011, 0b010),
        i_type("xori", 0b001_0011, 0b100),
        i_type("ori", 0b001_0011, 0b110),
        i_type("andi", 0b001_0011, 0b111),
        i_type("jalr", 0b110_0111, 0b000),
        u_type("lui", 0b011_0111),
        u_type("auipc", 0b001_0111),
        jal_instruction(),
        b_type("beq", 0b000),
        b_type("bne", 0b001),
        b_type("blt", 0b100),
        b_type("bge", 0b101),
        b_type("bltu", 0b110),
        b_type("bgeu", 0b111),
        system("ecall", 0b0000_0000_0000),
        system("ebreak", 0b0000_0000_0001),
    ]
}

fn tok(text: &str) -> Token {
    Token::new(text)
}

fn expand_nop(line: &TokenizedLine, _symbols: &SymbolTable) -> Result<Vec<Vec<Token>>, String> {
    if line.tokens.len() != 1 {
        return Err("expects no operands".to_string());
    }
    Ok(vec![vec![tok("addi"), tok("x0"), tok("x0"), tok("0")]])
}

fn expand_mv(line: &TokenizedLine, _symbols: &SymbolTable) -> Result<Vec<Vec<Token>>, String> {
    match line.tokens.as_slice() {
        [_, rd, rs] => Ok(vec![vec![
            tok("addi"),
            rd.clone(),
            rs.clone(),
            tok("0"),
        ]]),
        _ => Err("expects a destination and a source register".to_string()),
    }
}

/// `li rd, value`: one `addi` when the value fits twelve signed bits,
/// otherwise `lui` (+ `addi` when the low part is non-zero).
fn expand_li(line: &TokenizedLine, symbols: &SymbolTable) -> Result<Vec<Vec<Token>>, String> {
    let [_, rd, value_token] = line.tokens.as_slice() else {
        return Err("expects a destination register and a value".to_string());
    };
    let value = match parse_literal(&value_token.text) {
        Some(value) => value,
        None => symbols
            .get(&value_token.text)
            .map(|v| v as i64)
            .ok_or_else(|| {
                format!(
                    "'{}' is neither a literal nor an already-defined symbol",
                    value_token.text
                )
            })?,
    };
    if value < i64::from(i32::MIN) || value > i64::from(u32::MAX) {
        return Err(format!("{value} does not fit in a 32-bit register"));
    }
    if (-2048..=2047).contains(&value) {
        return Ok(vec![vec![
            tok("addi"),
            rd.clone(),
            tok("x0"),
            tok(&value.to_string()),
        ]]);
    }
    let round = value.wrapping_add(0x800) >> 12;
    let hi = round & 0xf_ffff;
    let lo = value - (round << 12);
    let mut lines = vec![vec![tok("lui"), rd.clone(), tok(&hi.to_string())]];
    if lo != 0 {
        lines.push(vec![
            tok("addi"),
            rd.clone(),
            rd.clone(),
            tok(&lo.to_string()),
        ]);
    }
    Ok(lines)
}

fn expand_j(line: &TokenizedLine, _symbols: &SymbolTable) -> Result<Vec<Vec<Token>>, String> {
    match line.tokens.as_slice() {
        [_, target] => Ok(vec![vec![tok("jal"), tok("x0"), target.clone()]]),
        _ => Err("expects a single jump target".to_string()),
    }
}

/// One-operand `jal target` is shorthand for `jal ra, target`.  The
/// two-operand form fails expansion here and falls through to the
/// real instruction of the same name.
fn expand_jal(line: &TokenizedLine, _symbols: &SymbolTable) -> Result<Vec<Vec<Token>>, String> {
    match line.tokens.as_slice() {
        [_, target] => Ok(vec![vec![tok("jal"), tok("x1"), target.clone()]]),
        _ => Err("the shorthand form expects a single jump target".to_string()),
    }
}

fn expand_ret(line: &TokenizedLine, _symbols: &SymbolTable) -> Result<Vec<Vec<Token>>, String> {
    if line.tokens.len() != 1 {
        return Err("expects no operands".to_string());
    }
    Ok(vec![vec![tok("jalr"), tok("x0"), tok("x1"), tok("0")]])
}

pub fn pseudo_instructions() -> Vec<PseudoInstruction> {
    vec![
        PseudoInstruction::new("nop", expand_nop),
        PseudoInstruction::new("mv", expand_mv),
        PseudoInstruction::new("li", expand_li),
        PseudoInstruction::new("j", expand_j),
        PseudoInstruction::new("jal", expand_jal),
        PseudoInstruction::new("ret", expand_ret),
    ]
}

/// Round-to-nearest split of a 32-bit value into a `lui`-style upper
/// part; the matching low part is what `%lo` yields.
fn upper_round(value: i64) -> i64 {
    value.wrapping_add(0x800) >> 12
}

fn reloc_hi(value: i64, _address: u64) -> Result<i64, String> {
    Ok(upper_round(value) & 0xf_ffff)
}

fn reloc_lo(value: i64, _address: u64) -> Result<i64, String> {
    Ok(value - (upper_round(value) << 12))
}

fn reloc_pcrel_hi(value: i64, address: u64) -> Result<i64, String> {
    reloc_hi(value.wrapping_sub(address as i64), address)
}

fn reloc_pcrel_lo(value: i64, address: u64) -> Result<i64, String> {
    reloc_lo(value.wrapping_sub(address as i64), address)
}

pub fn relocations() -> Vec<Relocation> {
    vec![
        Relocation::new("%hi", reloc_hi),
        Relocation::new("%lo", reloc_lo),
        Relocation::new("%pcrel_hi", reloc_pcrel_hi),
        Relocation::new("%pcrel_lo", reloc_pcrel_lo),
    ]
}

/// A fully configured RV32I assembler with the stock directive set.
/// Section bases still need to be declared before assembling.
pub fn assembler() -> Result<Assembler, ConfigError> {
    Assembler::new(
        machine(),
        instructions(),
        pseudo_instructions(),
        standard_directives(),
        relocations(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use isa::ReverseSymbolMap;

    fn encode(mnemonic: &str, operands: &[&str]) -> u64 {
        let m = machine();
        let instruction = instructions()
            .into_iter()
            .find(|i| i.name() == mnemonic)
            .expect("instruction exists");
        let mut tokens = vec![Token::new(mnemonic)];
        tokens.extend(operands.iter().map(|o| Token::new(o)));
        instruction
            .encode(&tokens, &m)
            .expect("operands are valid")
            .word
    }

    #[test]
    fn r_type_encodings_match_the_reference() {
        assert_eq!(encode("add", &["x1", "x2", "x3"]), 0x0031_00b3);
        assert_eq!(encode("sub", &["a0", "a1", "a2"]), 0x40c5_8533);
        assert_eq!(encode("and", &["t0", "t1", "t2"]), 0x0073_72b3);
    }

    #[test]
    fn i_and_u_type_encodings_match_the_reference() {
        assert_eq!(encode("addi", &["sp", "sp", "-16"]), 0xff01_0113);
        assert_eq!(encode("lui", &["a0", "74565"]), 0x1234_5537);
        assert_eq!(encode("jalr", &["x0", "x1", "0"]), 0x0000_8067);
    }

    #[test]
    fn system_instructions_differ_only_in_the_third_field() {
        assert_eq!(encode("ecall", &[]), 0x0000_0073);
        assert_eq!(encode("ebreak", &[]), 0x0010_0073);
    }

    #[test]
    fn branch_offsets_encode_backwards() {
        // beq x1, x2, -8 : imm[12|10:5]=0b1111111 -> 0xfe208ce3
        assert_eq!(encode("beq", &["x1", "x2", "-8"]), 0xfe20_8ce3);
    }

    #[test]
    fn the_full_set_builds_a_decode_tree() {
        let asm = assembler().expect("the stock configuration is decodable");
        let symbols = ReverseSymbolMap::new();
        let (text, error) = asm.disassemble_word(0x0031_00b3, &symbols, 0);
        assert_eq!(error, None);
        assert_eq!(text, "add x1, x2, x3");
    }

    #[test]
    fn li_expands_to_one_or_two_instructions() {
        let symbols = SymbolTable::new();
        let line = TokenizedLine {
            source_line: 1,
            tokens: vec![tok("li"), tok("a0"), tok("42")],
            directive: None,
            symbols: Vec::new(),
        };
        let small = expand_li(&line, &symbols).expect("in range");
        assert_eq!(small.len(), 1);
        assert_eq!(small[0][0].text, "addi");

        let line = TokenizedLine {
            source_line: 1,
            tokens: vec![tok("li"), tok("a0"), tok("0x12345678")],
            directive: None,
            symbols: Vec::new(),
        };
        let large = expand_li(&line, &symbols).expect("in range");
        assert_eq!(large.len(), 2);
        assert_eq!(large[0][0].text, "lui");
        assert_eq!(large[1][0].text, "addi");
        // 0x12345678 = (0x12345 << 12) + 0x678
        assert_eq!(large[0][2].text, "74565");
        assert_eq!(large[1][3].text, "1656");
    }

    #[test]
    fn hi_lo_recompose_the_original_value() {
        for value in [0i64, 4096, 0x1234_5678, -4, 0x7fff_ffff, 0xfffff000] {
            let hi = reloc_hi(value, 0).expect("infallible");
            let lo = reloc_lo(value, 0).expect("infallible");
            // lo is a sign-extended 12-bit quantity.
            assert!((-2048..=2047).contains(&lo), "lo {lo} out of range");
            let recomposed = ((hi << 12) as i32).wrapping_add(lo as i32);
            assert_eq!(
                recomposed, value as i32,
                "hi/lo of {value:#x} recompose wrongly"
            );
        }
    }
}
