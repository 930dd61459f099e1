//! Categorical split storage for tree nodes.
//!
//! LightGBM stores categorical splits as bitsets of the categories that go
//! LEFT. Categories not in the set, negative categories and categories past
//! the end of the bitset go right.
//!
//! Bitsets are classified once at load time (see [`CategoricalRule`]) so that
//! the common single-category and small-set cases never touch this storage.

// =============================================================================
// CategoriesStorage
// =============================================================================

/// Packed bitsets for the multi-word categorical splits of one tree.
///
/// # Format
///
/// - `bitsets`: flat array of u32 words for all stored sets
/// - `boundaries`: set `i` spans `bitsets[boundaries[i]..boundaries[i + 1]]`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CategoriesStorage {
    bitsets: Box<[u32]>,
    boundaries: Box<[u32]>,
}

impl CategoriesStorage {
    /// Create empty categories storage.
    #[inline]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Number of stored sets.
    #[inline]
    pub fn n_sets(&self) -> usize {
        self.boundaries.len().saturating_sub(1)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.n_sets() == 0
    }

    /// Create storage from raw data.
    ///
    /// `boundaries` must start at 0, be non-decreasing and end at
    /// `bitsets.len()`, or be empty when there are no sets.
    pub fn new(bitsets: Vec<u32>, boundaries: Vec<u32>) -> Self {
        debug_assert!(boundaries.first().map_or(true, |&b| b == 0));
        debug_assert!(boundaries.windows(2).all(|w| w[0] <= w[1]));
        debug_assert_eq!(
            boundaries.last().copied().unwrap_or(0) as usize,
            bitsets.len()
        );
        Self {
            bitsets: bitsets.into_boxed_slice(),
            boundaries: boundaries.into_boxed_slice(),
        }
    }

    /// Check whether `category` is a member of set `set_idx`.
    ///
    /// # Panics
    ///
    /// Panics if `set_idx` is out of range.
    #[inline]
    pub fn contains(&self, set_idx: u32, category: u32) -> bool {
        let start = self.boundaries[set_idx as usize];
        let end = self.boundaries[set_idx as usize + 1];
        // category / 32 selects the word, category % 32 the bit
        let word_idx = category >> 5;
        if word_idx >= end - start {
            return false;
        }
        let word = self.bitsets[(start + word_idx) as usize];
        (word >> (category & 31)) & 1 != 0
    }

    /// The words of set `set_idx`.
    #[inline]
    pub fn bitset(&self, set_idx: u32) -> &[u32] {
        let start = self.boundaries[set_idx as usize] as usize;
        let end = self.boundaries[set_idx as usize + 1] as usize;
        &self.bitsets[start..end]
    }
}

// =============================================================================
// Rule classification
// =============================================================================

/// How a categorical bitset is encoded into a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CategoricalRule {
    /// Exactly one category is in the set.
    OneHot(u32),
    /// The set fits into a single word.
    Small(u32),
    /// The set spans several words and lives in [`CategoriesStorage`].
    Bitset,
}

impl CategoricalRule {
    /// Classify a packed bitset.
    pub fn classify(bitset: &[u32]) -> Self {
        let n_set: u32 = bitset.iter().map(|w| w.count_ones()).sum();
        if n_set == 1 {
            let (word_idx, word) = bitset
                .iter()
                .enumerate()
                .find(|(_, w)| **w != 0)
                .map(|(i, w)| (i as u32, *w))
                .unwrap_or((0, 0));
            return CategoricalRule::OneHot(word_idx * 32 + word.trailing_zeros());
        }
        if bitset.len() == 1 {
            return CategoricalRule::Small(bitset[0]);
        }
        CategoricalRule::Bitset
    }
}

/// Test membership of `category` in a single bitset word.
#[inline]
pub fn word_contains(word: u32, category: u32) -> bool {
    category < 32 && (word >> category) & 1 != 0
}

/// Build a packed u32 bitset from a list of category values.
///
/// Categories are packed 32 per word, bit `i` of word `w` standing for
/// category `w * 32 + i`.
pub fn categories_to_bitset(categories: &[u32]) -> Vec<u32> {
    let Some(max_cat) = categories.iter().copied().max() else {
        return Vec::new();
    };
    let mut bitset = vec![0u32; (max_cat >> 5) as usize + 1];
    for &cat in categories {
        bitset[(cat >> 5) as usize] |= 1 << (cat & 31);
    }
    bitset
}
