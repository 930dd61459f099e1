//! LightGBM JSON model parser.
//!
//! Reads the output of `Booster.dump_model()` into the same [`LgbModel`]
//! intermediate as the text parser, so both formats share one conversion path.
//!
//! Two node layouts are accepted inside `tree_structure`:
//!
//! - **Dump layout**: internal nodes carry `split_index`, `split_feature`,
//!   `threshold`, `decision_type`, `default_left`, `missing_type` and nested
//!   `left_child` / `right_child` objects; leaves carry `leaf_value`.
//! - **Node-id layout**: internal nodes carry `split`, `split_condition` and
//!   `yes` / `no` / `missing` node ids resolved against a `children` array;
//!   leaves carry `leaf`. Routing is `value < split_condition` to `yes`, and
//!   NaN follows the `missing` child.
//!
//! Documents nested deeper than [`MAX_NESTING_DEPTH`] are rejected before
//! deserialization.

use std::io::Read;
use std::path::Path;

use serde::Deserialize;
use serde_json::{Map, Value};

use crate::trees::{categories_to_bitset, MissingType};

use super::text::{DecisionType, LgbHeader, LgbModel, LgbObjective, LgbTree};

// =============================================================================
// Error types
// =============================================================================

/// Error type for LightGBM JSON parsing.
#[derive(Debug, thiserror::Error)]
pub enum JsonError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid model: {0}")]
    InvalidModel(String),
    #[error("tree {index}: {message}")]
    InvalidTree { index: usize, message: String },
}

/// Deepest object/array nesting accepted in a JSON model.
///
/// Deserializing and dropping a `serde_json::Value` recurses once per level,
/// so the cap keeps both within a default thread stack. A dump-layout tree
/// uses one level per tree depth, a node-id tree two.
pub const MAX_NESTING_DEPTH: usize = 512;

// =============================================================================
// Top-level document
// =============================================================================

fn default_num_class() -> usize {
    1
}

fn default_shrinkage() -> f64 {
    1.0
}

#[derive(Debug, Deserialize)]
struct JsonModel {
    #[serde(default)]
    version: String,
    #[serde(default = "default_num_class")]
    num_class: usize,
    num_tree_per_iteration: Option<usize>,
    #[serde(default)]
    label_index: i32,
    max_feature_idx: usize,
    objective: Option<String>,
    #[serde(default)]
    average_output: bool,
    #[serde(default)]
    feature_names: Vec<String>,
    #[serde(default)]
    tree_info: Vec<JsonTreeInfo>,
}

#[derive(Debug, Deserialize)]
struct JsonTreeInfo {
    tree_index: Option<usize>,
    num_leaves: Option<usize>,
    #[serde(default = "default_shrinkage")]
    shrinkage: f64,
    tree_structure: Value,
}

impl LgbModel {
    /// Load a JSON model from a file path.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, JsonError> {
        let file = std::fs::File::open(path)?;
        Self::from_json_reader(file)
    }

    /// Load a JSON model from any reader.
    pub fn from_json_reader(mut reader: impl Read) -> Result<Self, JsonError> {
        let mut content = Vec::new();
        reader.read_to_end(&mut content)?;
        check_nesting_depth(&content, MAX_NESTING_DEPTH)?;

        let mut de = serde_json::Deserializer::from_slice(&content);
        de.disable_recursion_limit();
        let model = JsonModel::deserialize(&mut de)?;
        de.end()?;
        model.into_lgb()
    }

    /// Parse a JSON model from a string.
    pub fn from_json_str(content: &str) -> Result<Self, JsonError> {
        Self::from_json_reader(content.as_bytes())
    }
}

/// Reject documents whose object/array nesting exceeds `max_depth`.
///
/// Brackets inside strings are skipped. Malformed input is left for the
/// deserializer to report.
fn check_nesting_depth(content: &[u8], max_depth: usize) -> Result<(), JsonError> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for &byte in content {
        if in_string {
            match byte {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match byte {
            b'"' => in_string = true,
            b'{' | b'[' => {
                depth += 1;
                if depth > max_depth {
                    return Err(JsonError::InvalidModel(format!(
                        "JSON nesting exceeds {max_depth} levels"
                    )));
                }
            }
            b'}' | b']' => depth = depth.saturating_sub(1),
            _ => {}
        }
    }
    Ok(())
}

impl JsonModel {
    fn into_lgb(self) -> Result<LgbModel, JsonError> {
        if self.num_class == 0 {
            return Err(JsonError::InvalidModel("num_class must be at least 1".into()));
        }
        let num_tree_per_iteration = self.num_tree_per_iteration.unwrap_or(self.num_class);
        if num_tree_per_iteration == 0 {
            return Err(JsonError::InvalidModel(
                "num_tree_per_iteration must be at least 1".into(),
            ));
        }

        let mut trees = Vec::with_capacity(self.tree_info.len());
        for (index, info) in self.tree_info.iter().enumerate() {
            if info.tree_index.is_some_and(|i| i != index) {
                return Err(JsonError::InvalidTree {
                    index,
                    message: format!("tree_index {:?} out of order", info.tree_index),
                });
            }
            let tree = assemble_tree(info, &self.feature_names).map_err(|message| {
                JsonError::InvalidTree { index, message }
            })?;
            trees.push(tree);
        }

        let header = LgbHeader {
            version: self.version,
            num_class: self.num_class,
            num_tree_per_iteration,
            label_index: self.label_index,
            max_feature_idx: self.max_feature_idx,
            objective: self.objective.as_deref().map(LgbObjective::parse),
            average_output: self.average_output,
            feature_names: self.feature_names,
            feature_infos: Vec::new(),
            tree_sizes: Vec::new(),
        };
        Ok(LgbModel { header, trees })
    }
}

// =============================================================================
// Tree assembly
// =============================================================================

struct NodeRecord {
    index: usize,
    split_feature: i32,
    threshold: f64,
    decision_type: u8,
    left: i32,
    right: i32,
}

struct LeafRecord {
    index: usize,
    value: f64,
}

#[derive(Clone, Copy)]
enum Parent {
    Root,
    Left(usize),
    Right(usize),
}

/// Threshold of a split, before categorical sets are registered.
enum SplitThreshold {
    Numeric(f64),
    Categories(Vec<u32>),
}

struct Split<'a> {
    feature: i32,
    threshold: SplitThreshold,
    default_left: bool,
    missing_type: MissingType,
    left: &'a Value,
    right: &'a Value,
}

/// Flatten one nested `tree_structure` into the array layout.
fn assemble_tree(info: &JsonTreeInfo, feature_names: &[String]) -> Result<LgbTree, String> {
    let mut nodes: Vec<NodeRecord> = Vec::new();
    let mut leaves: Vec<LeafRecord> = Vec::new();
    let mut tree = LgbTree {
        shrinkage: info.shrinkage,
        ..LgbTree::default()
    };

    let mut stack = vec![(&info.tree_structure, Parent::Root)];
    while let Some((value, parent)) = stack.pop() {
        let obj = value
            .as_object()
            .ok_or_else(|| format!("expected a node object, got {value}"))?;

        let child_ref = if let Some(leaf) = obj.get("leaf_value").or_else(|| obj.get("leaf")) {
            let value = leaf
                .as_f64()
                .ok_or_else(|| format!("leaf value {leaf} is not a number"))?;
            let index = optional_index(obj, "leaf_index")?.unwrap_or(leaves.len());
            leaves.push(LeafRecord { index, value });
            !(to_i32(index)?)
        } else {
            let split = if obj.contains_key("split") {
                parse_node_id_split(obj, feature_names)?
            } else {
                parse_dump_split(obj)?
            };
            let index = optional_index(obj, "split_index")?.unwrap_or(nodes.len());

            let decision = DecisionType {
                is_categorical: matches!(split.threshold, SplitThreshold::Categories(_)),
                default_left: split.default_left,
                missing_type: split.missing_type,
            };
            let threshold = match split.threshold {
                SplitThreshold::Numeric(t) => t,
                SplitThreshold::Categories(categories) => {
                    register_categories(&mut tree, &categories)
                }
            };

            let pos = nodes.len();
            nodes.push(NodeRecord {
                index,
                split_feature: split.feature,
                threshold,
                decision_type: decision.to_bits(),
                left: 0,
                right: 0,
            });
            stack.push((split.right, Parent::Right(pos)));
            stack.push((split.left, Parent::Left(pos)));
            to_i32(index)?
        };

        match parent {
            Parent::Root => {}
            Parent::Left(pos) => nodes[pos].left = child_ref,
            Parent::Right(pos) => nodes[pos].right = child_ref,
        }
    }

    let num_leaves = leaves.len();
    if let Some(expected) = info.num_leaves {
        if expected != num_leaves {
            return Err(format!("num_leaves is {expected} but the structure has {num_leaves}"));
        }
    }

    tree.num_leaves = num_leaves;
    tree.leaf_value = place_by_index(leaves.iter().map(|l| (l.index, l.value)), num_leaves, "leaf")?;

    let num_nodes = nodes.len();
    let placed = place_by_index(nodes.into_iter().map(|n| (n.index, n)), num_nodes, "split")?;
    for node in placed {
        tree.split_feature.push(node.split_feature);
        tree.threshold.push(node.threshold);
        tree.decision_type.push(node.decision_type);
        tree.left_child.push(node.left);
        tree.right_child.push(node.right);
    }

    Ok(tree)
}

/// Append a category set to the tree and return its index as a threshold.
fn register_categories(tree: &mut LgbTree, categories: &[u32]) -> f64 {
    if tree.cat_boundaries.is_empty() {
        tree.cat_boundaries.push(0);
    }
    tree.cat_threshold.extend(categories_to_bitset(categories));
    tree.cat_boundaries.push(tree.cat_threshold.len() as u32);
    let cat_idx = tree.num_cat;
    tree.num_cat += 1;
    cat_idx as f64
}

/// Order records by their declared index; indices must be exactly `0..n`.
fn place_by_index<T>(
    records: impl Iterator<Item = (usize, T)>,
    n: usize,
    kind: &str,
) -> Result<Vec<T>, String> {
    let mut slots: Vec<Option<T>> = (0..n).map(|_| None).collect();
    for (index, record) in records {
        let slot = slots
            .get_mut(index)
            .ok_or_else(|| format!("{kind} index {index} out of range ({n} {kind}s)"))?;
        if slot.replace(record).is_some() {
            return Err(format!("duplicate {kind} index {index}"));
        }
    }
    // every slot is filled: n records, no duplicates, all in range
    Ok(slots.into_iter().flatten().collect())
}

fn parse_dump_split(obj: &Map<String, Value>) -> Result<Split<'_>, String> {
    let feature = required(obj, "split_feature")?
        .as_i64()
        .ok_or("split_feature is not an integer")?;
    let feature = i32::try_from(feature).map_err(|_| format!("split_feature {feature} out of range"))?;

    let categorical = match obj.get("decision_type").map(Value::as_str) {
        None | Some(Some("<=")) => false,
        Some(Some("==")) => true,
        Some(other) => return Err(format!("unsupported decision_type {other:?}")),
    };

    let raw_threshold = required(obj, "threshold")?;
    let threshold = if categorical {
        SplitThreshold::Categories(parse_category_list(raw_threshold)?)
    } else {
        SplitThreshold::Numeric(
            raw_threshold
                .as_f64()
                .ok_or_else(|| format!("threshold {raw_threshold} is not a number"))?,
        )
    };

    let default_left = match obj.get("default_left") {
        None => false,
        Some(v) => v.as_bool().ok_or("default_left is not a boolean")?,
    };
    let missing_type = match obj.get("missing_type").map(Value::as_str) {
        None | Some(Some("None")) => MissingType::None,
        Some(Some("Zero")) => MissingType::Zero,
        Some(Some("NaN")) => MissingType::NaN,
        Some(other) => return Err(format!("unsupported missing_type {other:?}")),
    };

    Ok(Split {
        feature,
        threshold,
        default_left,
        missing_type,
        left: required(obj, "left_child")?,
        right: required(obj, "right_child")?,
    })
}

fn parse_node_id_split<'a>(
    obj: &'a Map<String, Value>,
    feature_names: &[String],
) -> Result<Split<'a>, String> {
    if obj.get("decision_type").and_then(Value::as_str) == Some("==") {
        return Err("categorical splits are not supported with yes/no node ids".into());
    }

    let feature = resolve_feature(required(obj, "split")?, feature_names)?;
    let condition = required(obj, "split_condition")?
        .as_f64()
        .ok_or("split_condition is not a number")?;

    let yes = required_id(obj, "yes")?;
    let no = required_id(obj, "no")?;
    let children = required(obj, "children")?
        .as_array()
        .ok_or("children is not an array")?;
    let (left, right) = match children.as_slice() {
        [a, b] => {
            let id_of = |c: &Value| c.get("nodeid").and_then(Value::as_u64);
            match (id_of(a), id_of(b)) {
                (Some(ia), Some(ib)) if ia == yes && ib == no => (a, b),
                (Some(ia), Some(ib)) if ia == no && ib == yes => (b, a),
                (None, None) => (a, b),
                _ => return Err(format!("children do not match yes={yes} no={no}")),
            }
        }
        other => return Err(format!("expected 2 children, got {}", other.len())),
    };

    // the missing child wins over any generic default direction
    let default_left = match obj.get("missing").and_then(Value::as_u64) {
        Some(id) if id == yes => true,
        Some(id) if id == no => false,
        Some(id) => return Err(format!("missing child {id} is neither yes nor no")),
        None => obj.get("default_left").and_then(Value::as_bool).unwrap_or(true),
    };

    Ok(Split {
        feature,
        threshold: SplitThreshold::Numeric(next_down(condition)),
        default_left,
        missing_type: MissingType::NaN,
        left,
        right,
    })
}

/// Resolve `split` given as an index, `f<index>`, or a feature name.
fn resolve_feature(split: &Value, feature_names: &[String]) -> Result<i32, String> {
    let index = if let Some(idx) = split.as_u64() {
        Some(idx as usize)
    } else if let Some(name) = split.as_str() {
        feature_names.iter().position(|n| n == name).or_else(|| {
            name.strip_prefix('f')
                .and_then(|rest| rest.parse::<usize>().ok())
        })
    } else {
        None
    };
    let index = index.ok_or_else(|| format!("unknown split feature {split}"))?;
    i32::try_from(index).map_err(|_| format!("split feature {index} out of range"))
}

/// Parse a categorical threshold: `"1||10||100"`, a single number, or an array.
fn parse_category_list(threshold: &Value) -> Result<Vec<u32>, String> {
    let parse_one = |s: &str| {
        s.trim()
            .parse::<u32>()
            .map_err(|_| format!("invalid category {s:?}"))
    };
    match threshold {
        Value::String(s) => s.split("||").map(parse_one).collect(),
        Value::Number(n) => n
            .as_u64()
            .and_then(|v| u32::try_from(v).ok())
            .map(|v| vec![v])
            .ok_or_else(|| format!("invalid category {n}")),
        Value::Array(items) => items
            .iter()
            .map(|v| {
                v.as_u64()
                    .and_then(|v| u32::try_from(v).ok())
                    .ok_or_else(|| format!("invalid category {v}"))
            })
            .collect(),
        other => Err(format!("invalid categorical threshold {other}")),
    }
}

fn required<'a>(obj: &'a Map<String, Value>, key: &str) -> Result<&'a Value, String> {
    obj.get(key).ok_or_else(|| format!("missing field {key}"))
}

fn required_id(obj: &Map<String, Value>, key: &str) -> Result<u64, String> {
    required(obj, key)?
        .as_u64()
        .ok_or_else(|| format!("{key} is not a node id"))
}

fn optional_index(obj: &Map<String, Value>, key: &str) -> Result<Option<usize>, String> {
    obj.get(key)
        .map(|v| {
            v.as_u64()
                .map(|i| i as usize)
                .ok_or_else(|| format!("{key} is not an index"))
        })
        .transpose()
}

fn to_i32(index: usize) -> Result<i32, String> {
    i32::try_from(index).map_err(|_| format!("index {index} out of range"))
}

/// Largest `f64` strictly below `x`.
pub(crate) fn next_down(x: f64) -> f64 {
    if x.is_nan() || x == f64::NEG_INFINITY {
        return x;
    }
    if x == 0.0 {
        return -f64::from_bits(1);
    }
    let bits = x.to_bits();
    if x > 0.0 {
        f64::from_bits(bits - 1)
    } else {
        f64::from_bits(bits + 1)
    }
}
