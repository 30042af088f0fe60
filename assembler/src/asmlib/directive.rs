//! Assembler directives.
//!
//! A directive is a name (with its leading dot), an "early" flag and
//! a handler.  Early directives run during tokenization, before later
//! lines are seen, so that their side effects (symbol definitions)
//! are visible to the rest of pass 0 and to pseudo-instruction
//! expansion; everything else runs during the encoding pass.  A
//! handler may switch the current section, return bytes for the
//! encoding pass to append, or do neither.

use isa::{write_word, Word};

use super::context::AsmContext;
use super::symtab::Symbol;
use super::tokenizer::TokenizedLine;
use super::types::{ConfigError, DirectiveError, ErrorKind};

/// How a directive handler failed.
#[derive(Debug)]
pub enum DirectiveFailure {
    /// A problem with this line; recorded against it, assembly
    /// continues.
    Report(ErrorKind),
    /// A structural problem (an undeclared section); the whole run
    /// stops.
    Fatal(ConfigError),
}

pub type DirectiveHandler =
    fn(&mut AsmContext, &TokenizedLine) -> Result<Option<Vec<u8>>, DirectiveFailure>;

pub struct Directive {
    name: String,
    early: bool,
    handler: DirectiveHandler,
}

impl Directive {
    pub fn new(name: &str, early: bool, handler: DirectiveHandler) -> Directive {
        Directive {
            name: name.to_string(),
            early,
            handler,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn early(&self) -> bool {
        self.early
    }

    pub(crate) fn handle(
        &self,
        context: &mut AsmContext,
        line: &TokenizedLine,
    ) -> Result<Option<Vec<u8>>, DirectiveFailure> {
        (self.handler)(context, line)
    }
}

impl std::fmt::Debug for Directive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Directive")
            .field("name", &self.name)
            .field("early", &self.early)
            .finish_non_exhaustive()
    }
}

fn bad(line: &TokenizedLine, message: String) -> DirectiveFailure {
    DirectiveFailure::Report(ErrorKind::Directive(DirectiveError::Bad {
        directive: line.directive.clone().unwrap_or_default(),
        message,
    }))
}

/// The stock directive set: section switching, data emission and
/// constant definition.
pub fn standard_directives() -> Vec<Directive> {
    vec![
        Directive::new(".text", false, switch_to_named_section),
        Directive::new(".data", false, switch_to_named_section),
        Directive::new(".bss", false, switch_to_named_section),
        Directive::new(".section", false, switch_to_argument_section),
        Directive::new(".byte", false, |ctx, line| emit_data(ctx, line, 1)),
        Directive::new(".half", false, |ctx, line| emit_data(ctx, line, 2)),
        Directive::new(".word", false, |ctx, line| emit_data(ctx, line, 4)),
        Directive::new(".zero", false, emit_zeros),
        Directive::new(".ascii", false, |ctx, line| emit_string(ctx, line, false)),
        Directive::new(".asciz", false, |ctx, line| emit_string(ctx, line, true)),
        Directive::new(".string", false, |ctx, line| emit_string(ctx, line, true)),
        Directive::new(".equ", true, define_constant),
    ]
}

/// `.text` / `.data` / `.bss`: the directive's own name is the
/// section to switch to.
fn switch_to_named_section(
    context: &mut AsmContext,
    line: &TokenizedLine,
) -> Result<Option<Vec<u8>>, DirectiveFailure> {
    let name = line
        .directive
        .as_deref()
        .expect("a directive handler is only invoked for a line with a directive");
    if !line.tokens.is_empty() {
        return Err(bad(line, "expected no arguments".to_string()));
    }
    context
        .switch_section(name)
        .map_err(DirectiveFailure::Fatal)?;
    Ok(None)
}

/// `.section <name>`.
fn switch_to_argument_section(
    context: &mut AsmContext,
    line: &TokenizedLine,
) -> Result<Option<Vec<u8>>, DirectiveFailure> {
    match line.tokens.as_slice() {
        [section] => {
            context
                .switch_section(&section.text)
                .map_err(DirectiveFailure::Fatal)?;
            Ok(None)
        }
        _ => Err(bad(line, "expected exactly one section name".to_string())),
    }
}

/// `.byte` / `.half` / `.word`: evaluate each argument and emit it in
/// `width` bytes, in the machine's byte order.
fn emit_data(
    context: &mut AsmContext,
    line: &TokenizedLine,
    width: usize,
) -> Result<Option<Vec<u8>>, DirectiveFailure> {
    if line.tokens.is_empty() {
        return Err(bad(line, "expected at least one value".to_string()));
    }
    let bits = 8 * width as u32;
    let min = -(1i64 << (bits - 1));
    let max = (1i64 << bits) - 1;
    let mut bytes = Vec::with_capacity(line.tokens.len() * width);
    for token in &line.tokens {
        let value = context
            .eval(&token.text)
            .map_err(|e| bad(line, e.to_string()))?;
        if value < min || value > max {
            return Err(bad(
                line,
                format!("value {value} does not fit in {bits} bits"),
            ));
        }
        let mut item = vec![0u8; width];
        write_word(&mut item, value as Word, width, context.endianness());
        bytes.extend_from_slice(&item);
    }
    Ok(Some(bytes))
}

/// `.zero <count>`.
fn emit_zeros(
    context: &mut AsmContext,
    line: &TokenizedLine,
) -> Result<Option<Vec<u8>>, DirectiveFailure> {
    match line.tokens.as_slice() {
        [count] => {
            let count = context
                .eval(&count.text)
                .map_err(|e| bad(line, e.to_string()))?;
            match usize::try_from(count) {
                Ok(count) => Ok(Some(vec![0u8; count])),
                Err(_) => Err(bad(line, format!("bad fill count {count}"))),
            }
        }
        _ => Err(bad(line, "expected exactly one count".to_string())),
    }
}

/// `.ascii` emits each quoted argument's bytes; `.asciz`/`.string`
/// additionally NUL-terminate each argument.
fn emit_string(
    _context: &mut AsmContext,
    line: &TokenizedLine,
    nul_terminate: bool,
) -> Result<Option<Vec<u8>>, DirectiveFailure> {
    if line.tokens.is_empty() {
        return Err(bad(line, "expected at least one string".to_string()));
    }
    let mut bytes = Vec::new();
    for token in &line.tokens {
        let unquoted =
            parse_string_literal(&token.text).map_err(|message| bad(line, message))?;
        bytes.extend_from_slice(&unquoted);
        if nul_terminate {
            bytes.push(0);
        }
    }
    Ok(Some(bytes))
}

/// `.equ <name>, <expr>` — early, so later lines can use the symbol.
fn define_constant(
    context: &mut AsmContext,
    line: &TokenizedLine,
) -> Result<Option<Vec<u8>>, DirectiveFailure> {
    match line.tokens.as_slice() {
        [name, value] => {
            Symbol::validate_name(&name.text)
                .map_err(|e| DirectiveFailure::Report(ErrorKind::Symbol(e)))?;
            let value = context
                .eval(&value.text)
                .map_err(|e| bad(line, e.to_string()))?;
            context
                .add_symbol(line.source_line, Symbol::constant(&name.text), value as u64)
                .map_err(|e| DirectiveFailure::Report(e.kind))?;
            Ok(None)
        }
        _ => Err(bad(line, "expected a name and a value".to_string())),
    }
}

/// Strip the quotes off a string literal and process its escapes.
fn parse_string_literal(text: &str) -> Result<Vec<u8>, String> {
    let inner = text
        .strip_prefix('"')
        .and_then(|t| t.strip_suffix('"'))
        .filter(|_| text.len() >= 2)
        .ok_or_else(|| format!("expected a quoted string, found '{text}'"))?;
    let mut bytes = Vec::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(ch) = chars.next() {
        if ch != '\\' {
            let mut buf = [0u8; 4];
            bytes.extend_from_slice(ch.encode_utf8(&mut buf).as_bytes());
            continue;
        }
        match chars.next() {
            Some('n') => bytes.push(b'\n'),
            Some('t') => bytes.push(b'\t'),
            Some('r') => bytes.push(b'\r'),
            Some('0') => bytes.push(0),
            Some('\\') => bytes.push(b'\\'),
            Some('"') => bytes.push(b'"'),
            Some(other) => return Err(format!("unknown escape '\\{other}'")),
            None => return Err("string ends inside an escape".to_string()),
        }
    }
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_literals_are_unquoted_and_unescaped() {
        assert_eq!(
            parse_string_literal(r#""hi there""#),
            Ok(b"hi there".to_vec())
        );
        assert_eq!(parse_string_literal(r#""a\n\0""#), Ok(vec![b'a', 10, 0]));
        assert_eq!(parse_string_literal(r#""""#), Ok(Vec::new()));
        assert!(parse_string_literal("unquoted").is_err());
        assert!(parse_string_literal(r#""bad\q""#).is_err());
    }
}
