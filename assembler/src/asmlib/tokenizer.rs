//! Pass 0 building blocks: the line scanner and the splitting steps
//! which peel labels, a directive and relocation hints off a line's
//! tokens.
//!
//! A line is scanned into fragments (split on whitespace and commas,
//! except inside double quotes), fragments broken apart inside
//! parenthesis groups are joined back together, everything from the
//! comment delimiter onwards is dropped, and what remains is
//! classified.  The assembler's pass 0 drives these steps in order;
//! each returns a value or a single error for the line.

use logos::Logos;

use isa::Token;

use super::symtab::Symbol;
use super::types::{ErrorKind, LineNumber, SymbolError, TokenizationError};

/// One source line after tokenization.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TokenizedLine {
    /// 1-based line number in the source handed to `assemble`.
    pub source_line: LineNumber,
    pub tokens: Vec<Token>,
    /// The directive token (with its leading '.'), if the line has
    /// one.  At most one directive is allowed per line.
    pub directive: Option<String>,
    /// Labels defined on this line (possibly carried over from
    /// preceding label-only lines).
    pub symbols: Vec<Symbol>,
}

impl TokenizedLine {
    /// The mnemonic, if the line has any tokens at all.
    pub fn opcode(&self) -> Option<&str> {
        self.tokens.first().map(|t| t.text.as_str())
    }
}

/// A tokenized program, in source order.  Order is significant: it
/// determines address assignment and label scoping.
pub type SourceProgram = Vec<TokenizedLine>;

#[derive(Logos, Debug, PartialEq)]
#[logos(skip r"[ \t\r,]+")]
enum LineFragment {
    // A fragment is a run of non-delimiter characters and quoted
    // substrings; delimiters inside quotes do not split.
    #[regex(r#"([^ \t\r,"]+|"[^"]*")+"#)]
    Fragment,
}

/// Split one line into string fragments.  The only scan failure is a
/// quote which never closes.
pub(crate) fn scan_line(line: &str) -> Result<Vec<String>, TokenizationError> {
    let mut fragments = Vec::new();
    let mut lexer = LineFragment::lexer(line);
    while let Some(item) = lexer.next() {
        match item {
            Ok(LineFragment::Fragment) => fragments.push(lexer.slice().to_string()),
            Err(()) => {
                return Err(TokenizationError::MalformedToken {
                    column: lexer.span().start + 1,
                })
            }
        }
    }
    Ok(fragments)
}

/// Parenthesis depth change contributed by `text`, ignoring parens
/// inside quoted substrings.  Returns `None` on a close without an
/// open.
fn paren_depth(text: &str, mut depth: i32) -> Option<i32> {
    let mut in_quote = false;
    for ch in text.chars() {
        match ch {
            '"' => in_quote = !in_quote,
            '(' if !in_quote => depth += 1,
            ')' if !in_quote => {
                depth -= 1;
                if depth < 0 {
                    return None;
                }
            }
            _ => (),
        }
    }
    Some(depth)
}

/// Re-join fragments which the whitespace split broke apart inside a
/// parenthesis group, so that `4(` `x0` `)` comes back as `4(x0)`.
pub(crate) fn join_parentheses(
    fragments: Vec<String>,
) -> Result<Vec<String>, TokenizationError> {
    let mut joined = Vec::with_capacity(fragments.len());
    let mut buffer = String::new();
    let mut depth = 0i32;
    for fragment in fragments {
        depth = paren_depth(&fragment, depth)
            .ok_or(TokenizationError::UnmatchedParenthesis)?;
        buffer.push_str(&fragment);
        if depth == 0 {
            joined.push(std::mem::take(&mut buffer));
        }
    }
    if depth != 0 || !buffer.is_empty() {
        return Err(TokenizationError::UnmatchedParenthesis);
    }
    Ok(joined)
}

/// Drop the comment: everything from the first token containing the
/// comment delimiter onwards.
pub(crate) fn strip_comment(tokens: Vec<String>, comment_char: char) -> Vec<String> {
    let mut kept = Vec::with_capacity(tokens.len());
    for token in tokens {
        if token.contains(comment_char) {
            break;
        }
        kept.push(token);
    }
    kept
}

/// Peel leading label definitions (tokens ending in ':') off the
/// token list.  `lab:nop` style joint tokens are split first.  A
/// colon-terminated token after a non-label token is a stray colon.
pub(crate) fn split_labels(tokens: Vec<String>) -> Result<(Vec<Symbol>, Vec<String>), ErrorKind> {
    // Break tokens like "b:nop" at each colon so the label part can
    // be recognised on its own.
    let mut split = Vec::with_capacity(tokens.len());
    for token in tokens {
        let mut buffer = String::new();
        for ch in token.chars() {
            buffer.push(ch);
            if ch == ':' {
                split.push(std::mem::take(&mut buffer));
            }
        }
        if !buffer.is_empty() {
            split.push(buffer);
        }
    }

    let mut labels: Vec<Symbol> = Vec::new();
    let mut remaining = Vec::with_capacity(split.len());
    let mut labels_still_allowed = true;
    for token in split {
        if let Some(name) = token.strip_suffix(':') {
            if !labels_still_allowed {
                return Err(ErrorKind::Tokenization(TokenizationError::StrayColon));
            }
            Symbol::validate_name(name).map_err(ErrorKind::Symbol)?;
            if labels.iter().any(|l| l.name == name) {
                return Err(ErrorKind::Symbol(SymbolError::Duplicate(name.to_string())));
            }
            labels.push(Symbol::address(name));
        } else {
            remaining.push(token);
            labels_still_allowed = false;
        }
    }
    Ok((labels, remaining))
}

/// Peel at most one leading directive token off the token list.  A
/// directive after a non-directive token is stray; two directives on
/// one line are illegal.
pub(crate) fn split_directive(
    tokens: Vec<String>,
) -> Result<(Option<String>, Vec<String>), TokenizationError> {
    let mut directives = Vec::new();
    let mut remaining = Vec::with_capacity(tokens.len());
    let mut directives_still_allowed = true;
    for token in tokens {
        if token.starts_with('.') {
            if !directives_still_allowed {
                return Err(TokenizationError::StrayDirective(token));
            }
            directives.push(token);
        } else {
            remaining.push(token);
            directives_still_allowed = false;
        }
    }
    if directives.len() > 1 {
        return Err(TokenizationError::MultipleDirectives);
    }
    Ok((directives.pop(), remaining))
}

/// Turn the remaining string tokens into [`Token`]s, attaching each
/// relocation hint to the token which follows it and removing the
/// hint itself from the stream.  Both the standalone form
/// (`%hi sym`) and the composite form (`%hi(sym)`) are recognised;
/// in the composite form the parenthesised remainder becomes the
/// token text.
pub(crate) fn split_relocations(
    tokens: Vec<String>,
    is_relocation: &dyn Fn(&str) -> bool,
) -> Vec<Token> {
    let mut out = Vec::with_capacity(tokens.len());
    let mut pending: Option<String> = None;
    for token in tokens {
        if is_relocation(&token) {
            pending = Some(token);
            continue;
        }
        if pending.is_none() && token.ends_with(')') {
            if let Some(open) = token.find('(') {
                let (name, rest) = token.split_at(open);
                if is_relocation(name) {
                    out.push(Token {
                        text: rest.to_string(),
                        relocation: Some(name.to_string()),
                    });
                    continue;
                }
            }
        }
        out.push(Token {
            text: token,
            relocation: pending.take(),
        });
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scan(line: &str) -> Vec<String> {
        join_parentheses(scan_line(line).expect("line should scan")).expect("parens should match")
    }

    #[test]
    fn splits_on_whitespace_and_commas() {
        assert_eq!(scan("addi x1, x2, -1"), ["addi", "x1", "x2", "-1"]);
        assert_eq!(scan("\taddi\tx1 ,x2,  4"), ["addi", "x1", "x2", "4"]);
        assert_eq!(scan(""), Vec::<String>::new());
    }

    #[test]
    fn quoted_substrings_do_not_split() {
        assert_eq!(
            scan(r#".string "hello, world""#),
            [".string", r#""hello, world""#]
        );
    }

    #[test]
    fn unterminated_quote_is_an_error() {
        assert!(matches!(
            scan_line(r#".string "oops"#),
            Err(TokenizationError::MalformedToken { .. })
        ));
    }

    #[test]
    fn parenthesis_groups_are_joined() {
        assert_eq!(scan("4( x0 )"), ["4(x0)"]);
        assert_eq!(scan("lw x1, 8(x2)"), ["lw", "x1", "8(x2)"]);
        assert_eq!(
            join_parentheses(vec!["(a".to_string(), "b".to_string()]),
            Err(TokenizationError::UnmatchedParenthesis)
        );
        assert_eq!(
            join_parentheses(vec![")".to_string()]),
            Err(TokenizationError::UnmatchedParenthesis)
        );
    }

    #[test]
    fn comments_are_stripped() {
        let tokens = strip_comment(scan("add x1, x2, x3 # three-address"), '#');
        assert_eq!(tokens, ["add", "x1", "x2", "x3"]);
        assert_eq!(strip_comment(scan("# whole line"), '#'), Vec::<String>::new());
    }

    #[test]
    fn labels_are_peeled_off_the_front() {
        let (labels, rest) = split_labels(scan("loop: start: addi x1, x1, 1")).expect("valid");
        let names: Vec<&str> = labels.iter().map(|l| l.name.as_str()).collect();
        assert_eq!(names, ["loop", "start"]);
        assert_eq!(rest, ["addi", "x1", "x1", "1"]);
    }

    #[test]
    fn joint_label_tokens_are_split() {
        let (labels, rest) = split_labels(scan("b:nop")).expect("valid");
        assert_eq!(labels.len(), 1);
        assert_eq!(labels[0].name, "b");
        assert_eq!(rest, ["nop"]);
    }

    #[test]
    fn colon_after_an_instruction_is_stray() {
        assert_eq!(
            split_labels(scan("nop loop:")),
            Err(ErrorKind::Tokenization(TokenizationError::StrayColon))
        );
    }

    #[test]
    fn operator_in_a_label_is_invalid() {
        assert!(matches!(
            split_labels(scan("a+b: nop")),
            Err(ErrorKind::Symbol(SymbolError::InvalidName(_)))
        ));
    }

    #[test]
    fn one_directive_is_peeled_off() {
        let (directive, rest) = split_directive(scan(".word 1, 2")).expect("valid");
        assert_eq!(directive.as_deref(), Some(".word"));
        assert_eq!(rest, ["1", "2"]);
    }

    #[test]
    fn late_or_repeated_directives_are_rejected() {
        assert!(matches!(
            split_directive(scan("nop .word")),
            Err(TokenizationError::StrayDirective(_))
        ));
        assert_eq!(
            split_directive(scan(".text .data")),
            Err(TokenizationError::MultipleDirectives)
        );
    }

    #[test]
    fn relocation_hints_attach_to_the_next_token() {
        let is_reloc = |name: &str| name == "%hi" || name == "%lo";
        let tokens = split_relocations(scan("lui x5, %hi counter"), &is_reloc);
        assert_eq!(tokens.len(), 3);
        assert_eq!(tokens[2].text, "counter");
        assert_eq!(tokens[2].relocation.as_deref(), Some("%hi"));
    }

    #[test]
    fn composite_relocation_form_is_recognised() {
        let is_reloc = |name: &str| name == "%hi" || name == "%lo";
        let tokens = split_relocations(scan("lui x5, %hi(counter+4)"), &is_reloc);
        assert_eq!(tokens[2].text, "(counter+4)");
        assert_eq!(tokens[2].relocation.as_deref(), Some("%hi"));
    }

    #[test]
    fn unknown_percent_tokens_pass_through() {
        let is_reloc = |_: &str| false;
        let tokens = split_relocations(vec!["%mystery".to_string()], &is_reloc);
        assert_eq!(tokens.len(), 1);
        assert_eq!(tokens[0].text, "%mystery");
        assert_eq!(tokens[0].relocation, None);
    }
}
