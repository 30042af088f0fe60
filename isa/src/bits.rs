//! Bit ranges and fixed opcode parts.
//!
//! A [`BitRange`] names a contiguous run of bits within an
//! instruction word; an [`OpPart`] is a bit range together with the
//! fixed value an instruction requires in that range.  Instructions
//! are identified by an ordered sequence of opcode parts, and the
//! decoder's matching trie is built over exactly those parts.

use std::fmt::{self, Display, Formatter};

use serde::{Deserialize, Serialize};

use super::Word;

/// An inclusive range of bit positions within an instruction word,
/// counting from the least-significant bit (bit 0).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BitRange {
    start: u8,
    stop: u8,
}

impl BitRange {
    /// Make a bit range covering bits `start..=stop`.
    ///
    /// # Panics
    /// Panics if the range is backwards or does not fit in a [`Word`];
    /// bit ranges are instruction-set description constants, so a bad
    /// one is a mistake in the description, not a runtime condition.
    pub fn new(start: u8, stop: u8) -> BitRange {
        assert!(
            start <= stop && stop < Word::BITS as u8,
            "invalid bit range {start}..={stop}"
        );
        BitRange { start, stop }
    }

    pub fn start(&self) -> u8 {
        self.start
    }

    pub fn stop(&self) -> u8 {
        self.stop
    }

    /// Number of bits covered by the range.
    pub fn width(&self) -> u8 {
        self.stop - self.start + 1
    }

    /// The word mask selecting exactly the bits of this range.
    pub fn mask(&self) -> Word {
        let ones: Word = if self.width() == Word::BITS as u8 {
            Word::MAX
        } else {
            (1 << self.width()) - 1
        };
        ones << self.start
    }

    /// Read the bits of this range out of `word`, right-aligned.
    pub fn extract(&self, word: Word) -> Word {
        (word & self.mask()) >> self.start
    }

    /// Return `word` with the bits of this range replaced by the low
    /// bits of `value`.
    pub fn insert(&self, value: Word, word: Word) -> Word {
        (word & !self.mask()) | ((value << self.start) & self.mask())
    }
}

impl Display for BitRange {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "[{}:{}]", self.stop, self.start)
    }
}

/// A fixed bit-field constraint: the bits in `range` must hold
/// `value` for a word to be (or encode) the instruction owning this
/// part.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct OpPart {
    value: Word,
    range: BitRange,
}

impl OpPart {
    /// Make an opcode part requiring `value` in `range`.
    ///
    /// # Panics
    /// Panics if `value` does not fit in the range, for the same
    /// reason [`BitRange::new`] panics.
    pub fn new(value: Word, range: BitRange) -> OpPart {
        assert!(
            range.extract(range.insert(value, 0)) == value,
            "opcode part value {value:#o} does not fit in {range}"
        );
        OpPart { value, range }
    }

    pub fn value(&self) -> Word {
        self.value
    }

    pub fn range(&self) -> BitRange {
        self.range
    }

    /// Does `word` carry this part's value in this part's range?
    pub fn matches(&self, word: Word) -> bool {
        self.range.extract(word) == self.value
    }

    /// OR the fixed value into `word`.
    pub fn apply(&self, word: Word) -> Word {
        self.range.insert(self.value, word)
    }
}

impl Display for OpPart {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}[{:0width$b}]{}",
            self.range.stop(),
            self.value,
            self.range.start(),
            width = self.range.width() as usize
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_strategy::proptest;

    #[test]
    fn bit_range_mask() {
        assert_eq!(BitRange::new(0, 6).mask(), 0b111_1111);
        assert_eq!(BitRange::new(12, 14).mask(), 0b111 << 12);
        assert_eq!(BitRange::new(0, 63).mask(), u64::MAX);
    }

    #[test]
    fn bit_range_extract_insert() {
        let funct3 = BitRange::new(12, 14);
        let word = 0b101 << 12;
        assert_eq!(funct3.extract(word), 0b101);
        assert_eq!(funct3.insert(0b010, word), 0b010 << 12);
    }

    #[test]
    fn insert_discards_bits_outside_the_range() {
        let r = BitRange::new(4, 7);
        assert_eq!(r.extract(r.insert(0xfff, 0)), 0xf);
    }

    #[test]
    #[should_panic(expected = "invalid bit range")]
    fn backwards_range_is_rejected() {
        let _ = BitRange::new(9, 3);
    }

    #[test]
    fn op_part_matching() {
        let part = OpPart::new(0b0110011, BitRange::new(0, 6));
        assert!(part.matches(0x0000_0033)); // low 7 bits are 0110011
        assert!(!part.matches(0x0000_0013));
        assert_eq!(part.apply(0), 0b0110011);
    }

    #[proptest]
    fn extract_inverts_insert(
        #[strategy(0u8..63)] start: u8,
        #[strategy(0u8..=12)] extra: u8,
        value: u64,
    ) {
        let stop = start.saturating_add(extra).min(63);
        let r = BitRange::new(start, stop);
        let narrowed = value & (r.mask() >> r.start());
        assert_eq!(r.extract(r.insert(narrowed, 0)), narrowed);
    }

    #[proptest]
    fn insert_leaves_other_bits_alone(#[strategy(0u8..32)] start: u8, word: u64, value: u64) {
        let r = BitRange::new(start, start + 3);
        let out = r.insert(value, word);
        assert_eq!(out & !r.mask(), word & !r.mask());
    }
}
