//! Symbols and the symbol table of one assembly run.

use std::collections::BTreeMap;
use std::fmt::{self, Debug, Display, Formatter};
use std::hash::{Hash, Hasher};
use std::sync::LazyLock;

use regex::Regex;

use super::types::SymbolError;

/// Caller-supplied symbols used to seed a run's symbol table.
pub type SymbolMap = BTreeMap<String, u64>;

/// The synthetic symbol the linker rebinds to the address of each
/// instruction it is patching.  It is exempt from the uniqueness rule
/// and never appears in a program's reverse symbol map.
pub const ADDRESS_SYMBOL: &str = "__address__";

/// Characters which may not appear in a symbol name because the
/// expression evaluator would treat them as operators.
static OPERATOR_CHARS: LazyLock<Regex> =
    LazyLock::new(|| match Regex::new(r"[-+*/%&|^~<>()!]") {
        Ok(r) => r,
        Err(e) => panic!("operator pattern is not a valid regular expression: {e}"),
    });

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SymbolKind {
    /// The symbol names a location in some section.
    Address,
    /// The symbol is a plain value (a seeded symbol, or `.equ`).
    Constant,
}

/// A symbol definition.  Two symbols are the same symbol when their
/// names match; the kind does not participate in equality, ordering
/// or hashing.
#[derive(Debug, Clone, Eq)]
pub struct Symbol {
    pub name: String,
    pub kind: SymbolKind,
}

impl Symbol {
    pub fn address(name: &str) -> Symbol {
        Symbol {
            name: name.to_string(),
            kind: SymbolKind::Address,
        }
    }

    pub fn constant(name: &str) -> Symbol {
        Symbol {
            name: name.to_string(),
            kind: SymbolKind::Constant,
        }
    }

    /// Check that `name` is usable as a symbol name: non-empty and
    /// free of expression operators.
    pub fn validate_name(name: &str) -> Result<(), SymbolError> {
        if name.is_empty() || OPERATOR_CHARS.is_match(name) {
            Err(SymbolError::InvalidName(name.to_string()))
        } else {
            Ok(())
        }
    }
}

impl PartialEq for Symbol {
    fn eq(&self, other: &Symbol) -> bool {
        self.name == other.name
    }
}

impl PartialOrd for Symbol {
    fn partial_cmp(&self, other: &Symbol) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Symbol {
    fn cmp(&self, other: &Symbol) -> std::cmp::Ordering {
        self.name.cmp(&other.name)
    }
}

impl Hash for Symbol {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
    }
}

impl Display for Symbol {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct SymbolEntry {
    kind: SymbolKind,
    value: u64,
}

/// The symbol table of one assembly run.  Names are unique, with the
/// single exception of [`ADDRESS_SYMBOL`], which the linker rebinds
/// freely.
#[derive(Debug, Clone, Default)]
pub struct SymbolTable {
    entries: BTreeMap<String, SymbolEntry>,
}

impl SymbolTable {
    pub fn new() -> SymbolTable {
        SymbolTable::default()
    }

    /// A table seeded with caller-supplied constants.
    pub fn seeded(symbols: &BTreeMap<String, u64>) -> SymbolTable {
        let mut table = SymbolTable::new();
        for (name, value) in symbols {
            table.entries.insert(
                name.clone(),
                SymbolEntry {
                    kind: SymbolKind::Constant,
                    value: *value,
                },
            );
        }
        table
    }

    /// Bind `symbol` to `value`.  Rebinding an existing name is an
    /// error (the first binding is kept), except for
    /// [`ADDRESS_SYMBOL`].
    pub fn define(&mut self, symbol: Symbol, value: u64) -> Result<(), SymbolError> {
        if symbol.name != ADDRESS_SYMBOL && self.entries.contains_key(&symbol.name) {
            return Err(SymbolError::Duplicate(symbol.name));
        }
        self.entries.insert(
            symbol.name,
            SymbolEntry {
                kind: symbol.kind,
                value,
            },
        );
        Ok(())
    }

    /// Rebind the synthetic per-link-request address symbol.
    pub fn set_link_address(&mut self, address: u64) {
        self.entries.insert(
            ADDRESS_SYMBOL.to_string(),
            SymbolEntry {
                kind: SymbolKind::Constant,
                value: address,
            },
        );
    }

    pub fn get(&self, name: &str) -> Option<u64> {
        self.entries.get(name).map(|entry| entry.value)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// The user-defined address symbols, in name order.  The
    /// synthetic link-address symbol is never included.
    pub fn address_symbols(&self) -> impl Iterator<Item = (&str, u64)> {
        self.entries
            .iter()
            .filter(|(name, entry)| {
                entry.kind == SymbolKind::Address && name.as_str() != ADDRESS_SYMBOL
            })
            .map(|(name, entry)| (name.as_str(), entry.value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_definition_keeps_the_first_binding() {
        let mut table = SymbolTable::new();
        table
            .define(Symbol::address("loop"), 0x10)
            .expect("first definition is fine");
        assert_eq!(
            table.define(Symbol::address("loop"), 0x20),
            Err(SymbolError::Duplicate("loop".to_string()))
        );
        assert_eq!(table.get("loop"), Some(0x10));
    }

    #[test]
    fn link_address_symbol_may_be_rebound() {
        let mut table = SymbolTable::new();
        table.set_link_address(0x100);
        table.set_link_address(0x104);
        assert_eq!(table.get(ADDRESS_SYMBOL), Some(0x104));
    }

    #[test]
    fn seeded_symbols_are_constants() {
        let seed: BTreeMap<String, u64> = [("IOBASE".to_string(), 0xffff_0000)].into();
        let table = SymbolTable::seeded(&seed);
        assert_eq!(table.get("IOBASE"), Some(0xffff_0000));
        assert_eq!(table.address_symbols().count(), 0);
    }

    #[test]
    fn symbol_identity_ignores_kind() {
        assert_eq!(Symbol::address("a"), Symbol::constant("a"));
        assert_ne!(Symbol::address("a"), Symbol::address("b"));
    }

    #[test]
    fn names_with_operators_are_invalid() {
        assert!(Symbol::validate_name("ok_name.1$").is_ok());
        assert!(Symbol::validate_name("").is_err());
        assert!(Symbol::validate_name("a+b").is_err());
        assert!(Symbol::validate_name("x(y)").is_err());
    }
}
