//! LightGBM text model format parser.
//!
//! Parses LightGBM's text model format (`.txt` files saved via `save_model()`).
//! This is a line-based format with key=value pairs: a header block, one block
//! per tree introduced by `Tree=<index>`, and an `end of trees` marker after
//! which feature importances and training parameters follow (ignored here).

use std::collections::HashMap;
use std::io::Read;
use std::iter::Peekable;
use std::path::Path;
use std::str::{FromStr, Lines};

use crate::trees::MissingType;

// =============================================================================
// Error types
// =============================================================================

/// Error type for LightGBM model parsing.
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("missing required field: {0}")]
    MissingField(&'static str),
    #[error("invalid value for {field}: {message}")]
    InvalidValue {
        field: &'static str,
        message: String,
    },
    #[error("array size mismatch for {field}: expected {expected}, got {actual}")]
    ArraySizeMismatch {
        field: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("unexpected end of input while parsing {context}")]
    UnexpectedEnd { context: String },
    #[error("invalid tree format: {0}")]
    InvalidTreeFormat(String),
    #[error("linear trees are not supported")]
    LinearTree,
    #[error("expected {expected} trees from tree_sizes, found {actual}")]
    TreeCountMismatch { expected: usize, actual: usize },
    #[error("tree {index}: {source}")]
    InTree {
        index: usize,
        #[source]
        source: Box<ParseError>,
    },
}

// =============================================================================
// Decision type bitfield
// =============================================================================

/// Parsed decision type from LightGBM's bitfield.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecisionType {
    /// True if this is a categorical split
    pub is_categorical: bool,
    /// True if missing values go left
    pub default_left: bool,
    /// Missing value handling mode
    pub missing_type: MissingType,
}

impl DecisionType {
    /// Parse from LightGBM's decision_type bitfield.
    ///
    /// Bit layout:
    /// - Bit 0: categorical flag (1 = categorical)
    /// - Bit 1: default_left flag (1 = left)
    /// - Bits 2-3: missing type (0=None, 1=Zero, 2=NaN)
    ///
    /// Returns `None` for an unknown missing type or stray high bits.
    pub fn from_bits(bits: u8) -> Option<Self> {
        if bits >> 4 != 0 {
            return None;
        }
        let missing_type = match (bits >> 2) & 3 {
            0 => MissingType::None,
            1 => MissingType::Zero,
            2 => MissingType::NaN,
            _ => return None,
        };
        Some(DecisionType {
            is_categorical: bits & 1 != 0,
            default_left: bits & 2 != 0,
            missing_type,
        })
    }

    /// Encode back into the bitfield.
    pub fn to_bits(self) -> u8 {
        let missing = match self.missing_type {
            MissingType::None => 0,
            MissingType::Zero => 1,
            MissingType::NaN => 2,
        };
        u8::from(self.is_categorical) | u8::from(self.default_left) << 1 | missing << 2
    }
}

// =============================================================================
// Parsed tree structure
// =============================================================================

/// A parsed LightGBM tree, in the file's own array layout.
///
/// Children `c >= 0` are node indices, `c < 0` are leaf `!c`.
#[derive(Debug, Clone, PartialEq)]
pub struct LgbTree {
    /// Number of leaves in this tree
    pub num_leaves: usize,
    /// Number of categorical splits
    pub num_cat: usize,
    /// Feature index for each internal node (size: num_leaves - 1)
    pub split_feature: Vec<i32>,
    /// Threshold for each internal node; categorical index for categorical nodes
    pub threshold: Vec<f64>,
    /// Decision type bitfield for each internal node (size: num_leaves - 1)
    pub decision_type: Vec<u8>,
    /// Left child of each internal node
    pub left_child: Vec<i32>,
    /// Right child of each internal node
    pub right_child: Vec<i32>,
    /// Output value for each leaf (size: num_leaves)
    pub leaf_value: Vec<f64>,
    /// Shrinkage (learning rate) applied to this tree.
    ///
    /// Informational: `leaf_value` is already scaled by it.
    pub shrinkage: f64,
    /// Categorical split boundaries into `cat_threshold` (size: num_cat + 1)
    pub cat_boundaries: Vec<u32>,
    /// Categorical split bitsets, 32 categories per word
    pub cat_threshold: Vec<u32>,
}

impl Default for LgbTree {
    fn default() -> Self {
        Self {
            num_leaves: 0,
            num_cat: 0,
            split_feature: Vec::new(),
            threshold: Vec::new(),
            decision_type: Vec::new(),
            left_child: Vec::new(),
            right_child: Vec::new(),
            leaf_value: Vec::new(),
            shrinkage: 1.0,
            cat_boundaries: Vec::new(),
            cat_threshold: Vec::new(),
        }
    }
}

impl LgbTree {
    /// Parse a single tree block, with or without its `Tree=<index>` line.
    pub fn from_block(block: &str) -> Result<Self, ParseError> {
        let mut lines = block.lines().peekable();
        skip_blank(&mut lines);
        if lines.peek().is_some_and(|l| l.trim_end().starts_with("Tree=")) {
            lines.next();
        }
        parse_tree(&mut lines)
    }

    /// Number of internal nodes.
    pub fn num_nodes(&self) -> usize {
        self.num_leaves.saturating_sub(1)
    }
}

// =============================================================================
// Objective parsing
// =============================================================================

/// Parsed objective function information.
#[derive(Debug, Clone, PartialEq)]
pub enum LgbObjective {
    /// Regression-family objectives with an identity link
    Regression(String),
    /// Log-link regression (poisson, gamma, tweedie)
    LogLink(String),
    /// Binary classification with logloss
    Binary { sigmoid: f64 },
    /// Multiclass classification with softmax
    Multiclass { num_class: usize },
    /// One-vs-all multiclass
    MulticlassOva { num_class: usize, sigmoid: f64 },
    /// Cross-entropy on probability labels
    CrossEntropy,
    /// Learning-to-rank objectives
    Ranking(String),
    /// Unknown objective (raw string preserved)
    Unknown(String),
}

impl LgbObjective {
    /// Parse from LightGBM objective string.
    ///
    /// Examples:
    /// - "regression"
    /// - "binary sigmoid:1"
    /// - "multiclass num_class:3"
    pub fn parse(s: &str) -> Self {
        let parts: Vec<&str> = s.split_whitespace().collect();
        let name = parts.first().copied().unwrap_or("");
        let param = |key: &str| {
            parts
                .iter()
                .find_map(|p| p.strip_prefix(key).and_then(|v| v.parse::<f64>().ok()))
        };

        match name {
            "regression" | "regression_l2" | "regression_l1" | "l2" | "l1" | "mse" | "mae"
            | "huber" | "fair" | "quantile" | "mape" => LgbObjective::Regression(name.to_string()),
            "poisson" | "gamma" | "tweedie" => LgbObjective::LogLink(name.to_string()),
            "binary" => LgbObjective::Binary {
                sigmoid: param("sigmoid:").unwrap_or(1.0),
            },
            "multiclass" | "softmax" => LgbObjective::Multiclass {
                num_class: param("num_class:").map_or(2, |v| v as usize),
            },
            "multiclassova" | "multiclass_ova" | "ova" | "ovr" => LgbObjective::MulticlassOva {
                num_class: param("num_class:").map_or(2, |v| v as usize),
                sigmoid: param("sigmoid:").unwrap_or(1.0),
            },
            "cross_entropy" | "xentropy" => LgbObjective::CrossEntropy,
            "lambdarank" | "rank_xendcg" | "xendcg" => LgbObjective::Ranking(name.to_string()),
            _ => LgbObjective::Unknown(s.to_string()),
        }
    }
}

// =============================================================================
// Model header
// =============================================================================

/// Parsed LightGBM model header.
#[derive(Debug, Clone, PartialEq)]
pub struct LgbHeader {
    /// Model format version (e.g., "v3")
    pub version: String,
    /// Number of classes (1 for regression and binary)
    pub num_class: usize,
    /// Number of trees per boosting iteration
    pub num_tree_per_iteration: usize,
    /// Label column index of the training data (informational)
    pub label_index: i32,
    /// Maximum feature index used (0-based)
    pub max_feature_idx: usize,
    /// Objective function
    pub objective: Option<LgbObjective>,
    /// Whether to average output across iterations (random forest)
    pub average_output: bool,
    /// Feature names
    pub feature_names: Vec<String>,
    /// Feature metadata (min:max for numerical, categories for categorical).
    ///
    /// Informational: prediction routes on the tree thresholds alone.
    pub feature_infos: Vec<String>,
    /// Byte size of each tree block, when recorded
    pub tree_sizes: Vec<usize>,
}

impl Default for LgbHeader {
    fn default() -> Self {
        Self {
            version: String::new(),
            num_class: 1,
            num_tree_per_iteration: 1,
            label_index: 0,
            max_feature_idx: 0,
            objective: None,
            average_output: false,
            feature_names: Vec::new(),
            feature_infos: Vec::new(),
            tree_sizes: Vec::new(),
        }
    }
}

// =============================================================================
// Full model
// =============================================================================

/// A parsed LightGBM model.
#[derive(Debug, Clone, PartialEq)]
pub struct LgbModel {
    /// Model header with metadata
    pub header: LgbHeader,
    /// All trees in the model
    pub trees: Vec<LgbTree>,
}

impl LgbModel {
    /// Load a model from a file path.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ParseError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_string(&content)
    }

    /// Load a model from any reader.
    pub fn from_reader(mut reader: impl Read) -> Result<Self, ParseError> {
        let mut content = String::new();
        reader.read_to_string(&mut content)?;
        Self::from_string(&content)
    }

    /// Parse a model from a string.
    pub fn from_string(content: &str) -> Result<Self, ParseError> {
        let mut lines = content.lines().peekable();

        let header = parse_header(&mut lines)?;

        let mut trees = Vec::new();
        loop {
            skip_blank(&mut lines);
            let Some(line) = lines.next() else {
                break;
            };
            let line = line.trim_end();
            if line == "end of trees" {
                break;
            }
            let Some(index) = line.strip_prefix("Tree=") else {
                return Err(ParseError::InvalidTreeFormat(format!(
                    "expected Tree=<index>, got {line:?}"
                )));
            };
            let index: usize = index.parse().map_err(|_| ParseError::InvalidValue {
                field: "Tree",
                message: format!("invalid tree index: {index}"),
            })?;
            if index != trees.len() {
                return Err(ParseError::InvalidTreeFormat(format!(
                    "tree {index} found where tree {} was expected",
                    trees.len()
                )));
            }
            let tree = parse_tree(&mut lines).map_err(|source| ParseError::InTree {
                index,
                source: Box::new(source),
            })?;
            trees.push(tree);
        }

        if !header.tree_sizes.is_empty() && header.tree_sizes.len() != trees.len() {
            return Err(ParseError::TreeCountMismatch {
                expected: header.tree_sizes.len(),
                actual: trees.len(),
            });
        }

        Ok(LgbModel { header, trees })
    }

    /// Number of trees in the model.
    pub fn num_trees(&self) -> usize {
        self.trees.len()
    }

    /// Number of trees per boosting round.
    pub fn num_groups(&self) -> usize {
        self.header.num_tree_per_iteration
    }

    /// Number of features.
    pub fn num_features(&self) -> usize {
        self.header.max_feature_idx + 1
    }
}

// =============================================================================
// Parsing helpers
// =============================================================================

type LineIter<'a> = Peekable<Lines<'a>>;

fn skip_blank(lines: &mut LineIter<'_>) {
    while lines.next_if(|l| l.trim().is_empty()).is_some() {}
}

/// Parse header section until the first blank or `Tree=` line.
fn parse_header(lines: &mut LineIter<'_>) -> Result<LgbHeader, ParseError> {
    let mut header = LgbHeader::default();
    let mut kv: HashMap<&str, &str> = HashMap::new();

    skip_blank(lines);
    if lines.peek().is_none() {
        return Err(ParseError::UnexpectedEnd {
            context: "header".to_string(),
        });
    }

    while let Some(line) = lines.next_if(|l| !l.trim().is_empty() && !l.starts_with("Tree=")) {
        let line = line.trim_end();
        if let Some((key, value)) = line.split_once('=') {
            kv.insert(key, value);
        } else if line == "average_output" {
            header.average_output = true;
        }
        // any other bare line is the model type ("tree")
    }

    header.version = kv.get("version").map(|v| v.to_string()).unwrap_or_default();

    header.num_class = parse_field(&kv, "num_class")?.ok_or(ParseError::MissingField("num_class"))?;
    if header.num_class == 0 {
        return Err(ParseError::InvalidValue {
            field: "num_class",
            message: "must be at least 1".to_string(),
        });
    }

    header.num_tree_per_iteration =
        parse_field(&kv, "num_tree_per_iteration")?.unwrap_or(header.num_class);
    if header.num_tree_per_iteration == 0 {
        return Err(ParseError::InvalidValue {
            field: "num_tree_per_iteration",
            message: "must be at least 1".to_string(),
        });
    }

    header.label_index = parse_field(&kv, "label_index")?.unwrap_or(0);

    header.max_feature_idx = parse_field(&kv, "max_feature_idx")?
        .ok_or(ParseError::MissingField("max_feature_idx"))?;

    if let Some(obj) = kv.get("objective") {
        header.objective = Some(LgbObjective::parse(obj));
    }

    if let Some(names) = kv.get("feature_names") {
        header.feature_names = names.split_whitespace().map(str::to_string).collect();
    }

    if let Some(infos) = kv.get("feature_infos") {
        header.feature_infos = infos.split_whitespace().map(str::to_string).collect();
    }

    if let Some(sizes) = kv.get("tree_sizes") {
        header.tree_sizes = parse_array("tree_sizes", sizes)?;
    }

    Ok(header)
}

/// Parse the key=value lines of one tree, stopping before the next block.
fn parse_tree(lines: &mut LineIter<'_>) -> Result<LgbTree, ParseError> {
    let mut kv: HashMap<&str, &str> = HashMap::new();

    while let Some(line) = lines.next_if(|l| {
        let l = l.trim_end();
        !l.is_empty() && !l.starts_with("Tree=") && l != "end of trees"
    }) {
        let line = line.trim_end();
        let Some((key, value)) = line.split_once('=') else {
            return Err(ParseError::InvalidTreeFormat(format!(
                "expected key=value, got {line:?}"
            )));
        };
        kv.insert(key, value);
    }

    let mut tree = LgbTree {
        num_leaves: parse_field(&kv, "num_leaves")?.ok_or(ParseError::MissingField("num_leaves"))?,
        num_cat: parse_field(&kv, "num_cat")?.unwrap_or(0),
        shrinkage: parse_field(&kv, "shrinkage")?.unwrap_or(1.0),
        ..LgbTree::default()
    };

    if tree.num_leaves == 0 {
        return Err(ParseError::InvalidValue {
            field: "num_leaves",
            message: "must be at least 1".to_string(),
        });
    }

    if parse_field::<i32>(&kv, "is_linear")?.is_some_and(|v| v != 0) {
        return Err(ParseError::LinearTree);
    }

    tree.leaf_value = required_array(&kv, "leaf_value", tree.num_leaves)?;

    // Single-leaf tree has no splits
    if tree.num_leaves == 1 {
        return Ok(tree);
    }

    let num_splits = tree.num_nodes();

    tree.split_feature = required_array(&kv, "split_feature", num_splits)?;
    tree.threshold = required_array(&kv, "threshold", num_splits)?;
    tree.left_child = required_array(&kv, "left_child", num_splits)?;
    tree.right_child = required_array(&kv, "right_child", num_splits)?;

    tree.decision_type = match kv.get("decision_type") {
        Some(v) => {
            let types: Vec<u8> = parse_array("decision_type", v)?;
            validate_array_size("decision_type", &types, num_splits)?;
            if let Some(bad) = types.iter().find(|&&t| DecisionType::from_bits(t).is_none()) {
                return Err(ParseError::InvalidValue {
                    field: "decision_type",
                    message: format!("unknown decision type {bad}"),
                });
            }
            types
        }
        None => vec![0; num_splits],
    };

    if tree.num_cat > 0 {
        tree.cat_boundaries = required_array(&kv, "cat_boundaries", tree.num_cat + 1)?;
        tree.cat_threshold = kv
            .get("cat_threshold")
            .map(|v| parse_array("cat_threshold", v))
            .transpose()?
            .ok_or(ParseError::MissingField("cat_threshold"))?;
    }

    Ok(tree)
}

fn parse_field<T: FromStr>(
    kv: &HashMap<&str, &str>,
    field: &'static str,
) -> Result<Option<T>, ParseError> {
    kv.get(field)
        .map(|v| {
            v.trim().parse().map_err(|_| ParseError::InvalidValue {
                field,
                message: format!("cannot parse {v:?}"),
            })
        })
        .transpose()
}

fn required_array<T: FromStr>(
    kv: &HashMap<&str, &str>,
    field: &'static str,
    expected: usize,
) -> Result<Vec<T>, ParseError> {
    let values = kv.get(field).ok_or(ParseError::MissingField(field))?;
    let arr = parse_array(field, values)?;
    validate_array_size(field, &arr, expected)?;
    Ok(arr)
}

fn parse_array<T: FromStr>(field: &'static str, s: &str) -> Result<Vec<T>, ParseError> {
    s.split_whitespace()
        .map(|v| {
            v.parse().map_err(|_| ParseError::InvalidValue {
                field,
                message: format!("invalid number: {v}"),
            })
        })
        .collect()
}

fn validate_array_size<T>(field: &'static str, arr: &[T], expected: usize) -> Result<(), ParseError> {
    if arr.len() != expected {
        return Err(ParseError::ArraySizeMismatch {
            field,
            expected,
            actual: arr.len(),
        });
    }
    Ok(())
}

// =============================================================================
// Tests
// =============================================================================
