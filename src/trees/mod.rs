//! Tree data structures.

pub mod categories;
pub mod node;
pub mod tree;

pub use categories::{categories_to_bitset, CategoricalRule, CategoriesStorage};
pub use node::{ChildRef, MissingType, Node, NodeFlags};
pub use tree::{Tree, TreeBuilder, TreeValidationError};
