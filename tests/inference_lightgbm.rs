//! Integration tests for LightGBM model compatibility.
//!
//! These tests load the models under `tests/test-cases/lightgbm` through the
//! public loaders and check predictions against precomputed LightGBM outputs.

mod common;

use common::*;
use leafcast::compat::lightgbm::{self, LgbModel};
use leafcast::{ChildRef, Ensemble, NodeFlags, OutputTransform, PredictConfig};

fn load_text(name: &str, apply_transform: bool) -> Ensemble {
    lightgbm::load_text_file(lightgbm_path(name), apply_transform)
        .unwrap_or_else(|e| panic!("Failed to load {name}: {e}"))
}

fn load_json(name: &str, apply_transform: bool) -> Ensemble {
    lightgbm::load_json_file(lightgbm_path(name), apply_transform)
        .unwrap_or_else(|e| panic!("Failed to load {name}: {e}"))
}

mod single_trees {
    use super::*;

    #[test]
    fn one_leaf() {
        let model = load_text("tree_1leaf.txt", true);
        assert_eq!(model.n_estimators(), 1);
        assert_eq!(model.n_features(), 1);
        assert_eq!(model.transform(), OutputTransform::Identity);

        for x in [0.0, 10.0, -10.0, f64::NAN] {
            assert_approx_eq!(model.predict_single(&[x], 0).unwrap(), 0.123, 1e-12, "x = {x}");
        }
    }

    #[test]
    fn two_leaves() {
        let model = load_text("tree_2leaves.txt", true);
        let cases = [(0.0, 0.43), (5.1, 0.59), (2.5, 0.43), (f64::NAN, 0.43)];
        for (x, expected) in cases {
            assert_approx_eq!(model.predict_single(&[x], 0).unwrap(), expected, 1e-12, "x = {x}");
        }
    }

    #[test]
    fn three_leaves() {
        let model = load_text("tree_3leaves.txt", true);
        let cases = [
            ([0.0, 0.0], 0.35),
            ([1000.0, 0.0], 0.38),
            ([f64::NAN, 0.0], 0.35),
            ([f64::NAN, 10.0], 0.35),
            ([f64::NAN, 100.0], 0.54),
        ];
        for (row, expected) in cases {
            assert_approx_eq!(model.predict_single(&row, 0).unwrap(), expected, 1e-12, "row = {row:?}");
        }
    }

    #[test]
    fn leaf_indices_follow_routing() {
        let model = load_text("tree_3leaves.txt", true);
        assert_eq!(model.leaf_indices(&[0.0, 0.0], 0).unwrap(), vec![0]);
        assert_eq!(model.leaf_indices(&[1000.0, 0.0], 0).unwrap(), vec![1]);
        assert_eq!(model.leaf_indices(&[0.0, 100.0], 0).unwrap(), vec![2]);
    }
}

mod categorical {
    use super::*;

    #[test]
    fn structure() {
        let model = load_text("model_simple.txt", true);
        assert_eq!(model.n_estimators(), 2);
        assert_eq!(model.name(), "lightgbm.gbdt");
        assert_eq!(model.feature_names(), ["Column_0", "Column_1"]);

        let tree = model.forest().tree(0);
        assert_eq!(tree.n_nodes(), 2);
        assert_eq!(tree.n_categorical(), 1);

        let root = &tree.nodes()[0];
        assert_eq!(root.split_feature, 1);
        assert!(root.flags.contains(
            NodeFlags::CATEGORICAL | NodeFlags::CAT_ONE_HOT | NodeFlags::LEFT_LEAF | NodeFlags::MISSING_NAN
        ));
        assert!(!root.default_left());
        assert_eq!(root.left_child(), ChildRef::Leaf(0));
        assert_eq!(root.right_child(), ChildRef::Node(1));
        assert_eq!(root.threshold, 100.0);

        let inner = &tree.nodes()[1];
        assert!(!inner.is_categorical());
        assert!(inner.default_left());
        assert_eq!(inner.threshold, 500.0);
        assert_eq!(inner.left_child(), ChildRef::Leaf(1));
        assert_eq!(inner.right_child(), ChildRef::Leaf(2));

        let expected = [0.56697267424823339, 0.3584987837673016, 0.41213915936587919];
        assert_slice_approx_eq(tree.leaf_values(), &expected, 1e-10, "tree 0 leaves");

        // second tree's set {100, 150} spans five words
        let tree = model.forest().tree(1);
        assert!(!tree.nodes()[0].flags.contains(NodeFlags::CAT_ONE_HOT));
        assert!(!tree.nodes()[0].flags.contains(NodeFlags::CAT_SMALL));
    }

    #[test]
    fn dense_predictions() {
        let cases = TestCases::<Vec<f64>>::load("model_simple");
        let model = lightgbm::load_text_file(cases.model_path(), true).unwrap();
        assert_eq!(model.n_features(), cases.num_features);

        let output = model
            .predict_rows(&cases.dense(), cases.num_rows(), cases.num_features, &PredictConfig::default())
            .unwrap();
        assert_slice_approx_eq(output.as_slice(), &cases.expected, 1e-7, "all rounds");
    }

    #[test]
    fn first_round_only() {
        let cases = TestCases::<Vec<f64>>::load("model_simple");
        let model = lightgbm::load_text_file(cases.model_path(), true).unwrap();
        let expected = cases.expected_first_round.as_ref().unwrap();

        let config = PredictConfig::builder().n_estimators(1).build();
        let output = model
            .predict_rows(&cases.dense(), cases.num_rows(), cases.num_features, &config)
            .unwrap();
        assert_slice_approx_eq(output.as_slice(), expected, 1e-7, "first round");

        for (row, &want) in cases.rows().iter().zip(expected) {
            let mut out = [0.0];
            model.predict(row, 1, &mut out).unwrap();
            assert_approx_eq!(out[0], want, 1e-7, "row {row:?}");
        }
    }

    #[test]
    fn single_row_matches_dense() {
        let cases = TestCases::<Vec<f64>>::load("model_simple");
        let model = lightgbm::load_text_file(cases.model_path(), true).unwrap();
        for (row, &want) in cases.rows().iter().zip(&cases.expected) {
            assert_approx_eq!(model.predict_single(row, 0).unwrap(), want, 1e-7, "row {row:?}");
        }
    }
}

mod multiclass {
    use super::*;

    #[test]
    fn softmax_probabilities() {
        let cases = TestCases::<Vec<Vec<f64>>>::load("multiclass");
        let model = lightgbm::load_text_file(cases.model_path(), true).unwrap();
        assert_eq!(model.transform(), OutputTransform::Softmax);
        assert_eq!(model.n_estimators(), 2);
        assert_eq!(model.n_output_groups(), 3);

        let output = model
            .predict_rows(&cases.dense(), cases.num_rows(), 1, &PredictConfig::default())
            .unwrap();
        assert_predictions_match(&output, &cases.expected, 1e-9, "multiclass softmax");

        for row in output.rows() {
            assert_approx_eq!(row.iter().sum::<f64>(), 1.0, 1e-12);
        }
    }

    #[test]
    fn raw_scores() {
        let cases = TestCases::<Vec<Vec<f64>>>::load("multiclass");
        let model = lightgbm::load_text_file(cases.model_path(), false).unwrap();
        assert_eq!(model.transform(), OutputTransform::Raw);

        let output = model
            .predict_rows(&cases.dense(), cases.num_rows(), 1, &PredictConfig::default())
            .unwrap();
        assert_predictions_match(&output, cases.expected_raw.as_ref().unwrap(), 1e-9, "multiclass raw");
    }

    #[test]
    fn first_round_and_group_selection() {
        let cases = TestCases::<Vec<Vec<f64>>>::load("multiclass");
        let model = lightgbm::load_text_file(cases.model_path(), true).unwrap();
        let expected = cases.expected_first_round.as_ref().unwrap();

        let config = PredictConfig::builder().n_estimators(1).output_groups(1..3).build();
        let output = model
            .predict_rows(&cases.dense(), cases.num_rows(), 1, &config)
            .unwrap();
        assert_eq!(output.shape(), (cases.num_rows(), 2));
        let tail: Vec<Vec<f64>> = expected.iter().map(|row| row[1..].to_vec()).collect();
        assert_predictions_match(&output, &tail, 1e-9, "groups 1..3, first round");
    }

    #[test]
    fn leaf_indices_cover_every_group() {
        let model = load_text("multiclass.txt", true);
        assert_eq!(model.leaf_indices(&[0.0], 0).unwrap(), vec![0; 6]);
        assert_eq!(model.leaf_indices(&[1.0], 0).unwrap(), vec![1; 6]);
        assert_eq!(model.leaf_indices(&[1.0], 1).unwrap(), vec![1; 3]);
    }

    #[test]
    fn single_group_prediction() {
        let cases = TestCases::<Vec<Vec<f64>>>::load("multiclass");
        let model = lightgbm::load_text_file(cases.model_path(), true).unwrap();
        for group in 0..3 {
            assert_approx_eq!(model.predict_single(&[1.0], group).unwrap(), cases.expected[1][group], 1e-9);
        }
        assert!(model.predict_single(&[1.0], 3).is_err());
    }
}

mod binary {
    use super::*;

    fn sigmoid(x: f64) -> f64 {
        1.0 / (1.0 + (-x).exp())
    }

    #[test]
    fn probabilities() {
        let model = load_text("binary.txt", true);
        assert_eq!(model.transform(), OutputTransform::Sigmoid { scale: 1.0 });

        let cases = [
            ([-1.0, 0.0], 0.182425523806),
            ([1.0, 0.0], 0.880797077978),
            ([1.0, 2.0], 0.777299861175),
            ([-1.0, f64::NAN], 0.182425523806),
            ([1.0, f64::NAN], 0.880797077978),
        ];
        for (row, expected) in cases {
            assert_approx_eq!(model.predict_single(&row, 0).unwrap(), expected, 1e-9, "row {row:?}");
        }
    }

    #[test]
    fn raw_margin_matches_logit() {
        let raw = load_text("binary.txt", false);
        let prob = load_text("binary.txt", true);
        for row in [[-1.0, 0.0], [1.0, 2.0], [0.0, f64::NAN]] {
            let margin = raw.predict_single(&row, 0).unwrap();
            assert_approx_eq!(sigmoid(margin), prob.predict_single(&row, 0).unwrap(), 1e-12);
        }
    }
}

mod random_forest {
    use super::*;

    #[test]
    fn averages_over_used_rounds() {
        let model = load_text("random_forest.txt", true);
        assert_eq!(model.name(), "lightgbm.rf");
        assert!(model.forest().average_output());

        assert_approx_eq!(model.predict_single(&[0.0], 0).unwrap(), 2.0, 1e-12);
        assert_approx_eq!(model.predict_single(&[4.0], 0).unwrap(), 3.0, 1e-12);
        assert_approx_eq!(model.predict_single(&[8.0], 0).unwrap(), 6.0, 1e-12);

        let mut out = [0.0];
        model.predict(&[8.0], 2, &mut out).unwrap();
        assert_approx_eq!(out[0], 4.5, 1e-12);
    }
}

mod json {
    use super::*;

    #[test]
    fn one_leaf() {
        let model = load_json("lg_1tree_1leaf.json", true);
        assert_eq!(model.n_estimators(), 1);
        assert_eq!(model.n_output_groups(), 1);
        assert_eq!(model.n_features(), 41);
        assert_approx_eq!(model.predict_single(&[0.0; 41], 0).unwrap(), 0.42, 1e-12);
    }

    #[test]
    fn categorical_dump() {
        let model = load_json("lg_1tree.json", true);
        assert_eq!(model.n_features(), 2);
        let cases = [
            ([0.0, 0.0], 0.4242),
            ([0.0, 11.0], 0.4242),
            ([0.13, 11.0], 0.4242),
            ([0.0, 1.0], 0.4703),
            ([0.0, 10.0], 0.4703),
            ([0.0, 100.0], 0.4703),
            ([0.15, 0.0], 1.1111),
            ([0.15, 11.0], 1.1111),
            ([0.0, f64::NAN], 0.4242),
        ];
        for (row, expected) in cases {
            assert_approx_eq!(model.predict_single(&row, 0).unwrap(), expected, 1e-12, "row {row:?}");
        }
    }

    #[test]
    fn text_and_json_agree() {
        let from_json = LgbModel::from_json_file(lightgbm_path("lg_1tree.json")).unwrap();
        let ensemble = from_json.to_ensemble(true).unwrap();
        assert_eq!(ensemble, load_json("lg_1tree.json", true));
    }

    #[test]
    fn node_id_layout() {
        let raw = load_json("node_ids.json", false);
        assert_eq!(raw.n_features(), 3);
        assert_eq!(raw.feature_names(), ["age", "income", "score"]);

        let cases = [
            ([20.0, 40.0, -1.0], -1.25),
            ([35.0, 40.0, 1.0], 0.75),
            // strict `<` at the split condition
            ([20.0, 50.0, 0.0], 2.25),
            ([f64::NAN, f64::NAN, f64::NAN], 1.75),
            ([f64::NAN, 10.0, 5.0], -0.75),
        ];
        for (row, expected) in cases {
            assert_approx_eq!(raw.predict_single(&row, 0).unwrap(), expected, 1e-12, "row {row:?}");
        }

        let prob = load_json("node_ids.json", true);
        let p = prob.predict_single(&[20.0, 50.0, 0.0], 0).unwrap();
        assert_approx_eq!(p, 1.0 / (1.0 + (-2.25f64).exp()), 1e-12);
    }
}

mod errors {
    use super::*;
    use leafcast::compat::lightgbm::{ConversionError, LoadError, ParseError};

    #[test]
    fn missing_file() {
        let err = lightgbm::load_text_file(lightgbm_path("does_not_exist.txt"), true).unwrap_err();
        assert!(matches!(err, LoadError::Io(_)));
    }

    #[test]
    fn json_fed_to_text_loader() {
        let err = lightgbm::load_text_file(lightgbm_path("lg_1tree.json"), true).unwrap_err();
        assert!(matches!(err, LoadError::Text(_)));
    }

    #[test]
    fn truncated_model() {
        let content = std::fs::read_to_string(lightgbm_path("model_simple.txt")).unwrap();
        let cut = content.find("Tree=1").unwrap();
        let err = lightgbm::load_text_str(&content[..cut], true).unwrap_err();
        assert!(matches!(
            err,
            LoadError::Text(ParseError::TreeCountMismatch { expected: 2, actual: 1 })
        ));
    }

    #[test]
    fn incomplete_multiclass_round() {
        let content = std::fs::read_to_string(lightgbm_path("multiclass.txt")).unwrap();
        let cut = content.find("Tree=5").unwrap();
        let content = content[..cut].replace("tree_sizes=200 200 200 200 200 200\n", "");
        let err = lightgbm::load_text_str(&content, true).unwrap_err();
        assert!(matches!(err, LoadError::Conversion(ConversionError::Model(_))));
    }

    #[test]
    fn wrong_feature_count() {
        let model = load_text("model_simple.txt", true);
        assert!(model.predict_single(&[1.0], 0).is_err());
        assert!(model
            .predict_rows(&[1.0, 2.0, 3.0], 2, 2, &PredictConfig::default())
            .is_err());
    }
}
