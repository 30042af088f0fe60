//! The instruction-matching trie.
//!
//! Instructions are grouped by the value of their first fixed field;
//! a group of one becomes a leaf, a larger group recurses on the next
//! field.  Building the trie validates the instruction set: two
//! instructions the fixed fields cannot tell apart are a
//! configuration error, reported once at construction time.  The
//! finished trie is immutable and is what decoding walks.

use std::fmt::{self, Display, Formatter};
use std::sync::Arc;

use tracing::{event, Level};

use isa::{Instruction, OpPart, Word};

use super::types::ConfigError;

#[derive(Debug)]
struct MatchNode {
    /// The constraint a word must satisfy to descend into this node;
    /// the root has none.
    matcher: Option<OpPart>,
    children: Vec<MatchNode>,
    /// Set on leaves only.
    instruction: Option<Arc<Instruction>>,
}

impl MatchNode {
    fn matches(&self, word: Word) -> bool {
        match &self.matcher {
            Some(part) => part.matches(word),
            None => true,
        }
    }

    fn find(&self, word: Word) -> Option<&Arc<Instruction>> {
        if !self.matches(word) {
            return None;
        }
        if self.children.is_empty() {
            return self.instruction.as_ref();
        }
        // Sibling constraints are disjoint by construction, so at
        // most one child can accept the word.
        self.children.iter().find_map(|child| child.find(word))
    }

    fn render(&self, f: &mut Formatter<'_>, depth: usize) -> fmt::Result {
        match &self.matcher {
            None => f.write_str("root")?,
            Some(part) => {
                for _ in 0..depth {
                    f.write_str("-")?;
                }
                write!(f, "{part} -> ")?;
            }
        }
        if let Some(instruction) = &self.instruction {
            writeln!(f, "{}", instruction.name())?;
        } else {
            writeln!(f)?;
            for child in &self.children {
                child.render(f, depth + 1)?;
            }
        }
        Ok(())
    }
}

/// The decision tree over fixed bit fields, built once per assembler
/// from the full instruction set.
#[derive(Debug)]
pub struct Matcher {
    root: MatchNode,
}

impl Matcher {
    pub(crate) fn new(instructions: &[Arc<Instruction>]) -> Result<Matcher, ConfigError> {
        let root = build_node(instructions, 1, None)?;
        event!(
            Level::DEBUG,
            "built decode tree for {} instructions",
            instructions.len()
        );
        Ok(Matcher { root })
    }

    /// Find the unique instruction whose fixed fields `word`
    /// satisfies.
    pub fn match_word(&self, word: Word) -> Option<&Arc<Instruction>> {
        self.root.find(word)
    }
}

/// Group `instructions` by their field at `depth` (1-based) and build
/// the node for that group.
fn build_node(
    instructions: &[Arc<Instruction>],
    depth: usize,
    matcher: Option<OpPart>,
) -> Result<MatchNode, ConfigError> {
    use std::collections::BTreeMap;

    let mut groups: BTreeMap<OpPart, Vec<Arc<Instruction>>> = BTreeMap::new();
    for instruction in instructions {
        let parts = instruction.opcode_parts();
        if parts.len() < depth {
            return Err(ConfigError::UndecodableInstruction(
                instruction.name().to_string(),
            ));
        }
        let part = parts[depth - 1];
        if parts.len() == depth {
            if let Some(group) = groups.get(&part) {
                return Err(ConfigError::AmbiguousEncoding {
                    instruction: instruction.name().to_string(),
                    aliases_with: group[0].name().to_string(),
                });
            }
        }
        groups.entry(part).or_default().push(Arc::clone(instruction));
    }

    let mut node = MatchNode {
        matcher,
        children: Vec::with_capacity(groups.len()),
        instruction: None,
    };
    for (part, group) in groups {
        if let [only] = group.as_slice() {
            node.children.push(MatchNode {
                matcher: Some(part),
                children: Vec::new(),
                instruction: Some(Arc::clone(only)),
            });
        } else {
            node.children.push(build_node(&group, depth + 1, Some(part))?);
        }
    }
    Ok(node)
}

impl Display for Matcher {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        self.root.render(f, 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use isa::{BitRange, Opcode};

    fn instr(name: &str, parts: Vec<OpPart>) -> Arc<Instruction> {
        Arc::new(Instruction::new(name, Opcode::new(parts), Vec::new()))
    }

    fn opcode_part(value: u64) -> OpPart {
        OpPart::new(value, BitRange::new(0, 6))
    }

    fn funct_part(value: u64) -> OpPart {
        OpPart::new(value, BitRange::new(12, 14))
    }

    #[test]
    fn singleton_groups_become_leaves() {
        let set = [
            instr("one", vec![opcode_part(1)]),
            instr("two", vec![opcode_part(2)]),
        ];
        let matcher = Matcher::new(&set).expect("distinct opcodes build");
        assert_eq!(matcher.match_word(1).expect("known").name(), "one");
        assert_eq!(matcher.match_word(2).expect("known").name(), "two");
        assert!(matcher.match_word(3).is_none());
    }

    #[test]
    fn larger_groups_recurse_to_the_next_field() {
        let set = [
            instr("a", vec![opcode_part(1), funct_part(0)]),
            instr("b", vec![opcode_part(1), funct_part(5)]),
            instr("c", vec![opcode_part(2)]),
        ];
        let matcher = Matcher::new(&set).expect("decodable set");
        assert_eq!(matcher.match_word(1).expect("known").name(), "a");
        assert_eq!(
            matcher.match_word(1 | (5 << 12)).expect("known").name(),
            "b"
        );
        assert_eq!(
            matcher.match_word(2 | (5 << 12)).expect("known").name(),
            "c"
        );
    }

    #[test]
    fn identical_fixed_fields_fail_the_build() {
        let set = [
            instr("first", vec![opcode_part(1), funct_part(3)]),
            instr("second", vec![opcode_part(1), funct_part(3)]),
        ];
        match Matcher::new(&set) {
            Err(ConfigError::AmbiguousEncoding {
                instruction,
                aliases_with,
            }) => {
                assert_eq!(instruction, "second");
                assert_eq!(aliases_with, "first");
            }
            other => panic!("expected an ambiguity error, got {other:?}"),
        }
    }

    #[test]
    fn running_out_of_fields_fails_the_build() {
        let set = [
            instr("short", vec![opcode_part(1)]),
            instr("long", vec![opcode_part(1), funct_part(0)]),
        ];
        assert_eq!(
            match Matcher::new(&set) {
                Err(e) => e,
                Ok(_) => panic!("expected the build to fail"),
            },
            ConfigError::UndecodableInstruction("short".to_string())
        );
    }

    #[test]
    fn every_instruction_is_reachable_from_its_own_encoding() {
        let set = [
            instr("x", vec![opcode_part(3), funct_part(0)]),
            instr("y", vec![opcode_part(3), funct_part(1)]),
            instr("z", vec![opcode_part(4)]),
        ];
        let matcher = Matcher::new(&set).expect("decodable set");
        for instruction in &set {
            let canonical = instruction
                .opcode_parts()
                .iter()
                .fold(0, |word, part| part.apply(word));
            assert_eq!(
                matcher.match_word(canonical).expect("canonical encoding matches").name(),
                instruction.name()
            );
        }
    }

    #[test]
    fn display_renders_the_tree() {
        let set = [
            instr("a", vec![opcode_part(1), funct_part(0)]),
            instr("b", vec![opcode_part(1), funct_part(5)]),
        ];
        let matcher = Matcher::new(&set).expect("decodable set");
        let rendered = matcher.to_string();
        assert!(rendered.starts_with("root"));
        assert!(rendered.contains("-> a"));
        assert!(rendered.contains("-> b"));
    }
}
