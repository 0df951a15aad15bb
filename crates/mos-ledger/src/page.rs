use mos_types::Identifier;

use crate::error::{LedgerError, LedgerResult};

const BITS_PER_WORD: u64 = 64;

/// A fixed-width presence bitmap over `words.len() * 64` consecutive
/// identifiers starting at `base`.
///
/// `base` is always a multiple of the page span. Bit `b` of word `w`
/// represents identifier `base + w * 64 + b`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BitmapPage {
    base: u64,
    words: Vec<u64>,
}

impl BitmapPage {
    /// Number of identifiers covered by a page of `longs` words.
    pub const fn span(longs: usize) -> u64 {
        longs as u64 * BITS_PER_WORD
    }

    /// Base identifier of the page of width `longs` that owns `id`.
    pub const fn base_for(id: u64, longs: usize) -> u64 {
        let span = Self::span(longs);
        id - id % span
    }

    /// An empty page owning `id`.
    pub fn for_identifier(id: Identifier, longs: usize) -> Self {
        Self {
            base: Self::base_for(id.as_u64(), longs),
            words: vec![0; longs],
        }
    }

    /// Decode a page from its stored form: `longs` big-endian words.
    pub fn from_bytes(base: u64, bytes: &[u8], longs: usize) -> LedgerResult<Self> {
        let expected = longs * 8;
        if bytes.len() != expected || base % Self::span(longs) != 0 {
            return Err(LedgerError::CorruptPage {
                key: hex::encode(base.to_be_bytes()),
                len: bytes.len(),
                expected,
            });
        }
        let words = bytes
            .chunks_exact(8)
            .map(|chunk| {
                let mut word = [0u8; 8];
                word.copy_from_slice(chunk);
                u64::from_be_bytes(word)
            })
            .collect();
        Ok(Self { base, words })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.words.iter().flat_map(|w| w.to_be_bytes()).collect()
    }

    pub fn base(&self) -> u64 {
        self.base
    }

    pub fn longs(&self) -> usize {
        self.words.len()
    }

    pub fn owns(&self, id: Identifier) -> bool {
        let raw = id.as_u64();
        raw >= self.base && raw - self.base < Self::span(self.words.len())
    }

    fn position(&self, id: Identifier) -> (usize, u64) {
        let offset = id.as_u64() - self.base;
        ((offset / BITS_PER_WORD) as usize, 1u64 << (offset % BITS_PER_WORD))
    }

    pub fn contains(&self, id: Identifier) -> bool {
        if !self.owns(id) {
            return false;
        }
        let (word, mask) = self.position(id);
        self.words[word] & mask != 0
    }

    /// Set the bit for `id`, returning its previous value.
    ///
    /// `id` must belong to this page.
    pub fn set(&mut self, id: Identifier) -> bool {
        debug_assert!(self.owns(id));
        let (word, mask) = self.position(id);
        let previous = self.words[word] & mask != 0;
        self.words[word] |= mask;
        previous
    }

    /// Clear the bit for `id`, returning its previous value.
    ///
    /// `id` must belong to this page.
    pub fn clear(&mut self, id: Identifier) -> bool {
        debug_assert!(self.owns(id));
        let (word, mask) = self.position(id);
        let previous = self.words[word] & mask != 0;
        self.words[word] &= !mask;
        previous
    }

    pub fn is_empty(&self) -> bool {
        self.words.iter().all(|w| *w == 0)
    }

    pub fn count(&self) -> u32 {
        self.words.iter().map(|w| w.count_ones()).sum()
    }

    /// Every identifier whose bit is set, ascending.
    pub fn identifiers(&self) -> impl Iterator<Item = Identifier> + '_ {
        let base = self.base;
        self.words.iter().enumerate().flat_map(move |(index, &word)| {
            let word_base = base + index as u64 * BITS_PER_WORD;
            (0..BITS_PER_WORD)
                .filter(move |bit| word & (1u64 << bit) != 0)
                .map(move |bit| Identifier::new(word_base + bit))
        })
    }
}
