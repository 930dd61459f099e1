//! Tree node types.
//!
//! A [`Node`] is a single decision point. Its behaviour is packed into a small
//! [`NodeFlags`] mask so that a node stays 24 bytes.

use std::fmt;

/// Threshold under which a value counts as zero for [`MissingType::Zero`].
pub const ZERO_THRESHOLD: f64 = 1e-35;

/// Bitmask describing how a [`Node`] routes a feature value.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct NodeFlags(u8);

impl NodeFlags {
    /// Threshold is a categorical rule instead of a numeric boundary.
    pub const CATEGORICAL: Self = Self(1);
    /// Categorical rule tests equality against a single category.
    pub const CAT_ONE_HOT: Self = Self(1 << 1);
    /// Categorical rule fits into one 32-bit bitset word stored in the threshold.
    pub const CAT_SMALL: Self = Self(1 << 2);
    /// Missing values go left.
    pub const DEFAULT_LEFT: Self = Self(1 << 3);
    /// Left child is a leaf index.
    pub const LEFT_LEAF: Self = Self(1 << 4);
    /// Right child is a leaf index.
    pub const RIGHT_LEAF: Self = Self(1 << 5);
    /// Zero values are treated as missing.
    pub const MISSING_ZERO: Self = Self(1 << 6);
    /// NaN values are treated as missing.
    pub const MISSING_NAN: Self = Self(1 << 7);

    /// Empty mask.
    #[inline]
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Raw bits.
    #[inline]
    pub const fn bits(self) -> u8 {
        self.0
    }

    /// True if every bit of `other` is set.
    #[inline]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Set or clear the bits of `other`.
    #[inline]
    pub fn set(&mut self, other: Self, value: bool) {
        if value {
            self.0 |= other.0;
        } else {
            self.0 &= !other.0;
        }
    }
}

impl std::ops::BitOr for NodeFlags {
    type Output = Self;

    #[inline]
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl std::ops::BitOrAssign for NodeFlags {
    #[inline]
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

impl fmt::Debug for NodeFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const NAMES: [(NodeFlags, &str); 8] = [
            (NodeFlags::CATEGORICAL, "CATEGORICAL"),
            (NodeFlags::CAT_ONE_HOT, "CAT_ONE_HOT"),
            (NodeFlags::CAT_SMALL, "CAT_SMALL"),
            (NodeFlags::DEFAULT_LEFT, "DEFAULT_LEFT"),
            (NodeFlags::LEFT_LEAF, "LEFT_LEAF"),
            (NodeFlags::RIGHT_LEAF, "RIGHT_LEAF"),
            (NodeFlags::MISSING_ZERO, "MISSING_ZERO"),
            (NodeFlags::MISSING_NAN, "MISSING_NAN"),
        ];
        let set: Vec<&str> = NAMES
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect();
        write!(f, "NodeFlags({})", set.join(" | "))
    }
}

/// Missing value handling strategy of a split.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MissingType {
    /// NaN is treated as zero, no value is missing.
    #[default]
    None,
    /// Zero (and NaN, via the zero substitution) follows the default direction.
    Zero,
    /// NaN follows the default direction.
    NaN,
}

/// Reference from a node to one of its children.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChildRef {
    /// Index into the tree's leaf values.
    Leaf(u32),
    /// Index into the tree's nodes.
    Node(u32),
}

/// A decision node.
///
/// `threshold` is a numeric boundary for numeric splits. For categorical splits
/// its meaning depends on the flags: the category itself (`CAT_ONE_HOT`), a
/// single bitset word (`CAT_SMALL`), or the index of a bitset range in the
/// tree's [`CategoriesStorage`](super::CategoriesStorage).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Node {
    pub threshold: f64,
    pub left: u32,
    pub right: u32,
    pub split_feature: u32,
    pub flags: NodeFlags,
}

impl Node {
    /// Create a numeric split node.
    pub fn numeric(
        split_feature: u32,
        threshold: f64,
        default_left: bool,
        missing: MissingType,
        left: ChildRef,
        right: ChildRef,
    ) -> Self {
        let mut node = Self {
            threshold,
            left: 0,
            right: 0,
            split_feature,
            flags: NodeFlags::empty(),
        };
        node.flags.set(NodeFlags::DEFAULT_LEFT, default_left);
        node.set_missing(missing);
        node.set_children(left, right);
        node
    }

    /// Create a categorical split node from an already-encoded rule.
    pub(crate) fn categorical(
        split_feature: u32,
        threshold: f64,
        rule_flags: NodeFlags,
        default_left: bool,
        missing: MissingType,
        left: ChildRef,
        right: ChildRef,
    ) -> Self {
        let mut node = Self::numeric(split_feature, threshold, default_left, missing, left, right);
        node.flags |= NodeFlags::CATEGORICAL | rule_flags;
        node
    }

    fn set_missing(&mut self, missing: MissingType) {
        self.flags.set(NodeFlags::MISSING_ZERO, missing == MissingType::Zero);
        self.flags.set(NodeFlags::MISSING_NAN, missing == MissingType::NaN);
    }

    fn set_children(&mut self, left: ChildRef, right: ChildRef) {
        let (left_idx, left_leaf) = match left {
            ChildRef::Leaf(idx) => (idx, true),
            ChildRef::Node(idx) => (idx, false),
        };
        let (right_idx, right_leaf) = match right {
            ChildRef::Leaf(idx) => (idx, true),
            ChildRef::Node(idx) => (idx, false),
        };
        self.left = left_idx;
        self.right = right_idx;
        self.flags.set(NodeFlags::LEFT_LEAF, left_leaf);
        self.flags.set(NodeFlags::RIGHT_LEAF, right_leaf);
    }

    #[inline]
    pub fn is_categorical(&self) -> bool {
        self.flags.contains(NodeFlags::CATEGORICAL)
    }

    #[inline]
    pub fn default_left(&self) -> bool {
        self.flags.contains(NodeFlags::DEFAULT_LEFT)
    }

    #[inline]
    pub fn missing_type(&self) -> MissingType {
        if self.flags.contains(NodeFlags::MISSING_NAN) {
            MissingType::NaN
        } else if self.flags.contains(NodeFlags::MISSING_ZERO) {
            MissingType::Zero
        } else {
            MissingType::None
        }
    }

    /// Left child as an explicit reference.
    #[inline]
    pub fn left_child(&self) -> ChildRef {
        if self.flags.contains(NodeFlags::LEFT_LEAF) {
            ChildRef::Leaf(self.left)
        } else {
            ChildRef::Node(self.left)
        }
    }

    /// Right child as an explicit reference.
    #[inline]
    pub fn right_child(&self) -> ChildRef {
        if self.flags.contains(NodeFlags::RIGHT_LEAF) {
            ChildRef::Leaf(self.right)
        } else {
            ChildRef::Node(self.right)
        }
    }

    /// Numeric routing decision. Returns true for left.
    #[inline]
    pub(crate) fn numeric_goes_left(&self, value: f64) -> bool {
        let mut value = value;
        let missing_nan = self.flags.contains(NodeFlags::MISSING_NAN);
        if value.is_nan() && !missing_nan {
            value = 0.0;
        }
        let is_zero = (-ZERO_THRESHOLD..=ZERO_THRESHOLD).contains(&value);
        if (self.flags.contains(NodeFlags::MISSING_ZERO) && is_zero)
            || (missing_nan && value.is_nan())
        {
            return self.default_left();
        }
        value <= self.threshold
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn numeric(threshold: f64, default_left: bool, missing: MissingType) -> Node {
        Node::numeric(0, threshold, default_left, missing, ChildRef::Leaf(0), ChildRef::Leaf(1))
    }

    #[test]
    fn flags_contain_and_set() {
        let mut flags = NodeFlags::CATEGORICAL | NodeFlags::LEFT_LEAF;
        assert!(flags.contains(NodeFlags::CATEGORICAL));
        assert!(!flags.contains(NodeFlags::RIGHT_LEAF));
        flags.set(NodeFlags::CATEGORICAL, false);
        assert_eq!(flags, NodeFlags::LEFT_LEAF);
    }

    #[test]
    fn flags_debug_lists_names() {
        let flags = NodeFlags::DEFAULT_LEFT | NodeFlags::MISSING_NAN;
        assert_eq!(format!("{flags:?}"), "NodeFlags(DEFAULT_LEFT | MISSING_NAN)");
    }

    #[test]
    fn children_roundtrip_through_flags() {
        let node = Node::numeric(3, 1.0, false, MissingType::None, ChildRef::Node(4), ChildRef::Leaf(7));
        assert_eq!(node.left_child(), ChildRef::Node(4));
        assert_eq!(node.right_child(), ChildRef::Leaf(7));
        assert!(node.flags.contains(NodeFlags::RIGHT_LEAF));
        assert!(!node.flags.contains(NodeFlags::LEFT_LEAF));
    }

    #[test]
    fn numeric_boundary_goes_left() {
        let node = numeric(0.5, false, MissingType::None);
        assert!(node.numeric_goes_left(0.5));
        assert!(node.numeric_goes_left(-1e300));
        assert!(!node.numeric_goes_left(0.500001));
    }

    #[test]
    fn nan_without_missing_type_is_zero() {
        let below = numeric(1.0, false, MissingType::None);
        assert!(below.numeric_goes_left(f64::NAN));
        let above = numeric(-1.0, true, MissingType::None);
        assert!(!above.numeric_goes_left(f64::NAN));
    }

    #[test]
    fn nan_missing_uses_default_direction() {
        let left = numeric(-100.0, true, MissingType::NaN);
        assert!(left.numeric_goes_left(f64::NAN));
        let right = numeric(100.0, false, MissingType::NaN);
        assert!(!right.numeric_goes_left(f64::NAN));
        // zero is an ordinary value under the NaN policy
        assert!(right.numeric_goes_left(0.0));
    }

    #[test]
    fn zero_missing_uses_default_direction() {
        let node = numeric(-5.0, true, MissingType::Zero);
        assert!(node.numeric_goes_left(0.0));
        assert!(node.numeric_goes_left(f64::NAN));
        assert!(!node.numeric_goes_left(1.0));
    }

    #[test]
    fn missing_type_roundtrip() {
        for missing in [MissingType::None, MissingType::Zero, MissingType::NaN] {
            assert_eq!(numeric(0.0, false, missing).missing_type(), missing);
        }
    }
}
