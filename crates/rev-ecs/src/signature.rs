//! Growable bitsets describing which component tags an entity holds.
//!
//! A signature answers "does this entity have components {A, B, C}" with
//! one pass over a handful of words instead of one lookup per type.
//! Bit `n` corresponds to component tag `n`.

use std::{fmt, ops::Not};

use smallvec::SmallVec;

use crate::error::{EcsError, EcsResult};

const WORD_BITS: usize = u64::BITS as usize;

const fn words_for(bits: usize) -> usize {
    bits.div_ceil(WORD_BITS)
}

/// Mask of the valid bits in the word at `word` for a signature of `len` bits.
const fn tail_mask(len: usize, word: usize) -> u64 {
    let valid = len.saturating_sub(word * WORD_BITS);
    if valid >= WORD_BITS {
        u64::MAX
    } else {
        (1u64 << valid) - 1
    }
}

/// A bitset whose length only ever grows.
///
/// Bits past `len` inside the last word are always zero, so whole-word
/// comparisons never see stale data.
#[derive(Clone, PartialEq, Eq, Hash, Default)]
pub struct Signature {
    words: SmallVec<[u64; 2]>,
    len: usize,
    enabled: usize,
}

impl Signature {
    /// Create a signature of `len` bits, all unset.
    #[must_use]
    pub fn new(len: usize) -> Self {
        Self {
            words: SmallVec::from_elem(0, words_for(len)),
            len,
            enabled: 0,
        }
    }

    /// Create a signature of `len` bits with the given positions set.
    pub fn with_bits(len: usize, bits: impl IntoIterator<Item = usize>) -> EcsResult<Self> {
        let mut signature = Self::new(len);
        for pos in bits {
            signature.set(pos, true)?;
        }
        Ok(signature)
    }

    /// Smallest signature with exactly the given positions set.
    pub fn from_indices(bits: impl IntoIterator<Item = usize>) -> Self {
        let bits: SmallVec<[usize; 8]> = bits.into_iter().collect();
        let len = bits.iter().max().map_or(0, |&max| max + 1);
        let mut signature = Self::new(len);
        for pos in bits {
            signature.set_unchecked(pos, true);
        }
        signature
    }

    /// Number of bits.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Check if the signature has zero bits.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of bits currently set.
    #[must_use]
    pub const fn enabled_count(&self) -> usize {
        self.enabled
    }

    /// Read the bit at `pos`.
    pub fn at(&self, pos: usize) -> EcsResult<bool> {
        self.check(pos)?;
        Ok(self.words[pos / WORD_BITS] & (1 << (pos % WORD_BITS)) != 0)
    }

    /// Read the bit at `pos`, treating positions past the end as unset.
    #[must_use]
    pub fn contains(&self, pos: usize) -> bool {
        pos < self.len && self.words[pos / WORD_BITS] & (1 << (pos % WORD_BITS)) != 0
    }

    /// Write the bit at `pos`.
    pub fn set(&mut self, pos: usize, value: bool) -> EcsResult<()> {
        self.check(pos)?;
        self.set_unchecked(pos, value);
        Ok(())
    }

    /// Write the bit at `pos`. The caller guarantees `pos < len`.
    pub(crate) fn set_unchecked(&mut self, pos: usize, value: bool) {
        let word = &mut self.words[pos / WORD_BITS];
        let mask = 1 << (pos % WORD_BITS);
        let was_set = *word & mask != 0;

        match (was_set, value) {
            (false, true) => {
                *word |= mask;
                self.enabled += 1;
            }
            (true, false) => {
                *word &= !mask;
                self.enabled -= 1;
            }
            _ => {}
        }
    }

    /// Grow to `len` bits. New bits start unset; shrinking is rejected.
    pub fn resize(&mut self, len: usize) -> EcsResult<()> {
        if len < self.len {
            return Err(EcsError::ShrinkSignature {
                from: self.len,
                to: len,
            });
        }
        self.words.resize(words_for(len), 0);
        self.len = len;
        Ok(())
    }

    /// Grow to at least `len` bits. Never shrinks.
    pub(crate) fn grow_to(&mut self, len: usize) {
        if len > self.len {
            self.words.resize(words_for(len), 0);
            self.len = len;
        }
    }

    /// Check whether every bit set in `other` is also set in `self`.
    ///
    /// A shorter signature never contains a longer one, even if the extra
    /// bits of `other` are all unset.
    #[must_use]
    pub fn has(&self, other: &Self) -> bool {
        if self.len < other.len {
            return false;
        }

        for (idx, &theirs) in other.words.iter().enumerate() {
            let theirs = theirs & tail_mask(other.len, idx);
            if theirs == 0 {
                continue;
            }
            if theirs & !self.words[idx] != 0 {
                return false;
            }
        }

        true
    }

    /// Iterate over set positions in ascending order.
    pub fn iter_ones(&self) -> impl Iterator<Item = usize> + '_ {
        self.words.iter().enumerate().flat_map(|(idx, &word)| {
            let mut remaining = word;
            std::iter::from_fn(move || {
                if remaining == 0 {
                    return None;
                }
                let bit = remaining.trailing_zeros() as usize;
                remaining &= remaining - 1;
                Some(idx * WORD_BITS + bit)
            })
        })
    }

    fn check(&self, pos: usize) -> EcsResult<()> {
        if pos >= self.len {
            return Err(EcsError::BitOutOfRange { pos, len: self.len });
        }
        Ok(())
    }
}

impl Not for &Signature {
    type Output = Signature;

    fn not(self) -> Signature {
        let words = self
            .words
            .iter()
            .enumerate()
            .map(|(idx, &word)| !word & tail_mask(self.len, idx))
            .collect();

        Signature {
            words,
            len: self.len,
            enabled: self.len - self.enabled,
        }
    }
}

impl Not for Signature {
    type Output = Signature;

    fn not(self) -> Signature {
        !&self
    }
}

/// Bits LSB first, one `0`/`1` character per bit.
impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for pos in 0..self.len {
            f.write_str(if self.contains(pos) { "1" } else { "0" })?;
        }
        Ok(())
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature({self})")
    }
}
