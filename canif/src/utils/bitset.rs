//! Bit vector over caller-provided word storage

const WORD_BITS: usize = u32::BITS as usize;

/// Number of storage words required for `bits` bit positions
pub const fn words_for(bits: usize) -> usize {
    bits.div_ceil(WORD_BITS)
}

/// A bit vector backed by a borrowed word slice.
///
/// The capacity is fixed by the storage; all operations are bounded by the
/// word count. Used for pending-transmission marks, where the highest set bit
/// position encodes the highest transmit priority.
pub struct BitVec<'a> {
    words: &'a mut [u32],
}

impl<'a> BitVec<'a> {
    pub fn new(words: &'a mut [u32]) -> Self {
        words.fill(0);
        Self { words }
    }

    pub fn capacity(&self) -> usize {
        self.words.len() * WORD_BITS
    }

    pub fn get(&self, index: usize) -> bool {
        assert!(index < self.capacity());
        self.words[index / WORD_BITS] >> (index % WORD_BITS) & 0x1 != 0
    }

    /// Sets the bit and reports whether it was set before.
    pub fn set(&mut self, index: usize) -> bool {
        assert!(index < self.capacity());
        let word = &mut self.words[index / WORD_BITS];
        let mask = 1u32 << (index % WORD_BITS);
        let previous = *word & mask != 0;
        *word |= mask;
        previous
    }

    /// Clears the bit and reports whether it was set before.
    pub fn clear(&mut self, index: usize) -> bool {
        assert!(index < self.capacity());
        let word = &mut self.words[index / WORD_BITS];
        let mask = 1u32 << (index % WORD_BITS);
        let previous = *word & mask != 0;
        *word &= !mask;
        previous
    }

    pub fn clear_all(&mut self) {
        self.words.fill(0);
    }

    /// Position of the highest set bit.
    ///
    /// Scans whole words from the top, so the cost is bounded by the word
    /// count rather than the bit count.
    pub fn highest_set(&self) -> Option<usize> {
        for (index, &word) in self.words.iter().enumerate().rev() {
            if word != 0 {
                let bit = WORD_BITS - 1 - word.leading_zeros() as usize;
                return Some(index * WORD_BITS + bit);
            }
        }
        None
    }

    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|&word| word == 0)
    }
}
