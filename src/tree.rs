//! CART regression tree with a squared-error split criterion.
//!
//! The tree is stored as a flat node list (root at index 0) so it serializes
//! as plain data inside a model artifact.

use serde::{Deserialize, Serialize};

use crate::error::FitError;
use crate::features::{FeatureVector, FEATURE_COUNT};

// ---

/// Regularization knobs searched by the trainer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Hyperparameters {
    /// Maximum number of splits from root to leaf.
    pub max_depth: usize,
    /// Fewest training samples allowed in a leaf.
    pub min_samples_leaf: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Node {
    /// Samples with `x[feature] <= threshold` go left.
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
    Leaf { value: f64, samples: usize },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegressionTree {
    nodes: Vec<Node>,
}

/// Best split found for one node.
struct Candidate {
    feature: usize,
    threshold: f64,
    sse: f64,
}

impl RegressionTree {
    /// Grow a tree on `(x, y)`.
    ///
    /// A node becomes a leaf when it reaches `max_depth`, when its targets are
    /// all equal, or when no split leaves `min_samples_leaf` samples on each
    /// side. Features are tried in column order and only a strictly better
    /// split replaces the current best, so fitting is deterministic.
    pub fn fit(x: &[FeatureVector], y: &[f64], params: Hyperparameters) -> Result<Self, FitError> {
        // ---
        if x.is_empty() {
            return Err(FitError::EmptyInput);
        }
        if x.len() != y.len() {
            return Err(FitError::LengthMismatch {
                rows: x.len(),
                labels: y.len(),
            });
        }
        if let Some(column) = first_non_finite(x) {
            return Err(FitError::NonFinite { column });
        }
        if y.iter().any(|v| !v.is_finite()) {
            return Err(FitError::NonFinite {
                column: FEATURE_COUNT,
            });
        }

        let mut tree = RegressionTree { nodes: Vec::new() };
        let mut indices: Vec<usize> = (0..x.len()).collect();
        let min_leaf = params.min_samples_leaf.max(1);
        tree.grow(x, y, &mut indices, 0, params.max_depth, min_leaf);
        Ok(tree)
    }

    /// Returns the index of the node it pushed.
    fn grow(
        &mut self,
        x: &[FeatureVector],
        y: &[f64],
        indices: &mut [usize],
        depth: usize,
        max_depth: usize,
        min_leaf: usize,
    ) -> usize {
        // ---
        let n = indices.len();
        let sum: f64 = indices.iter().map(|&i| y[i]).sum();
        let mean = sum / n as f64;
        let id = self.nodes.len();
        self.nodes.push(Node::Leaf {
            value: mean,
            samples: n,
        });

        let pure = indices.iter().all(|&i| y[i] == y[indices[0]]);
        if depth >= max_depth || pure || n < 2 * min_leaf {
            return id;
        }

        let Some(best) = best_split(x, y, indices, min_leaf) else {
            return id;
        };

        // Partition in place: left part first.
        let mut boundary = 0;
        for k in 0..n {
            if x[indices[k]][best.feature] <= best.threshold {
                indices.swap(k, boundary);
                boundary += 1;
            }
        }
        let (left_indices, right_indices) = indices.split_at_mut(boundary);

        let left = self.grow(x, y, left_indices, depth + 1, max_depth, min_leaf);
        let right = self.grow(x, y, right_indices, depth + 1, max_depth, min_leaf);
        self.nodes[id] = Node::Split {
            feature: best.feature,
            threshold: best.threshold,
            left,
            right,
        };
        id
    }

    pub fn predict(&self, row: &FeatureVector) -> f64 {
        // ---
        let mut id = 0;
        loop {
            match self.nodes[id] {
                Node::Leaf { value, .. } => return value,
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    id = if row[feature] <= threshold { left } else { right };
                }
            }
        }
    }

    pub fn predict_all(&self, rows: &[FeatureVector]) -> Vec<f64> {
        rows.iter().map(|row| self.predict(row)).collect()
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn leaf_count(&self) -> usize {
        self.nodes
            .iter()
            .filter(|n| matches!(n, Node::Leaf { .. }))
            .count()
    }

    /// Longest root-to-leaf path, counted in splits.
    pub fn depth(&self) -> usize {
        // ---
        let mut deepest = 0;
        let mut stack = vec![(0usize, 0usize)];
        while let Some((id, depth)) = stack.pop() {
            match self.nodes.get(id) {
                Some(Node::Split { left, right, .. }) => {
                    stack.push((*left, depth + 1));
                    stack.push((*right, depth + 1));
                }
                _ => deepest = deepest.max(depth),
            }
        }
        deepest
    }

    /// Check a deserialized tree: non-empty, children point forward inside the
    /// node list, features in range, values finite. Forward-only children
    /// also rule out cycles.
    pub fn validate(&self) -> Result<(), FitError> {
        // ---
        if self.nodes.is_empty() {
            return Err(FitError::Malformed("tree has no nodes".into()));
        }
        for (id, node) in self.nodes.iter().enumerate() {
            match *node {
                Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    if feature >= FEATURE_COUNT {
                        return Err(FitError::Malformed(format!(
                            "node {id} splits on feature {feature}"
                        )));
                    }
                    if !threshold.is_finite() {
                        return Err(FitError::Malformed(format!(
                            "node {id} has a non-finite threshold"
                        )));
                    }
                    if left <= id || right <= id || left >= self.nodes.len() || right >= self.nodes.len() {
                        return Err(FitError::Malformed(format!(
                            "node {id} has children {left}/{right} out of order"
                        )));
                    }
                }
                Node::Leaf { value, .. } => {
                    if !value.is_finite() {
                        return Err(FitError::Malformed(format!("leaf {id} is not finite")));
                    }
                }
            }
        }
        Ok(())
    }
}

fn first_non_finite(x: &[FeatureVector]) -> Option<usize> {
    x.iter()
        .find_map(|row| row.iter().position(|v| !v.is_finite()))
}

/// Search every feature and every boundary between distinct sorted values
/// for the split with the lowest total squared error.
fn best_split(x: &[FeatureVector], y: &[f64], indices: &[usize], min_leaf: usize) -> Option<Candidate> {
    // ---
    let n = indices.len();
    let total_sum: f64 = indices.iter().map(|&i| y[i]).sum();
    let total_sq: f64 = indices.iter().map(|&i| y[i] * y[i]).sum();

    let mut best: Option<Candidate> = None;
    let mut order = indices.to_vec();

    for feature in 0..FEATURE_COUNT {
        order.sort_by(|&a, &b| x[a][feature].total_cmp(&x[b][feature]));

        let mut left_sum = 0.0;
        let mut left_sq = 0.0;
        for k in 0..n - 1 {
            let yi = y[order[k]];
            left_sum += yi;
            left_sq += yi * yi;

            let left_n = k + 1;
            let right_n = n - left_n;
            if left_n < min_leaf || right_n < min_leaf {
                continue;
            }

            let here = x[order[k]][feature];
            let next = x[order[k + 1]][feature];
            if here >= next {
                continue;
            }

            let right_sum = total_sum - left_sum;
            let right_sq = total_sq - left_sq;
            let sse = sse(left_sum, left_sq, left_n) + sse(right_sum, right_sq, right_n);

            if best.as_ref().map_or(true, |b| sse < b.sse) {
                let mid = here + (next - here) / 2.0;
                // Guard against the midpoint rounding up onto `next`.
                let threshold = if mid < next { mid } else { here };
                best = Some(Candidate {
                    feature,
                    threshold,
                    sse,
                });
            }
        }
    }

    best
}

fn sse(sum: f64, sq: f64, n: usize) -> f64 {
    (sq - sum * sum / n as f64).max(0.0)
}

#[cfg(test)]
mod tests {
    // ---
    use super::*;

    fn params(max_depth: usize, min_samples_leaf: usize) -> Hyperparameters {
        Hyperparameters {
            max_depth,
            min_samples_leaf,
        }
    }

    /// y is a step on column 1.
    fn step_data(n: usize) -> (Vec<FeatureVector>, Vec<f64>) {
        // ---
        let x: Vec<FeatureVector> = (0..n)
            .map(|i| [0.0, i as f64, 0.0, 0.0, 0.0])
            .collect();
        let y = (0..n).map(|i| if i < n / 2 { 10.0 } else { 30.0 }).collect();
        (x, y)
    }

    #[test]
    fn test_learns_a_step() {
        // ---
        let (x, y) = step_data(20);
        let tree = RegressionTree::fit(&x, &y, params(4, 1)).unwrap();

        assert_eq!(tree.depth(), 1);
        assert_eq!(tree.leaf_count(), 2);
        assert_eq!(tree.predict(&[0.0, 3.0, 0.0, 0.0, 0.0]), 10.0);
        assert_eq!(tree.predict(&[0.0, 15.0, 0.0, 0.0, 0.0]), 30.0);
        match tree.nodes()[0] {
            Node::Split {
                feature, threshold, ..
            } => {
                assert_eq!(feature, 1);
                assert_eq!(threshold, 9.5);
            }
            ref other => panic!("expected split at root, got {other:?}"),
        }
    }

    #[test]
    fn test_constant_target_is_single_leaf() {
        // ---
        let (x, _) = step_data(12);
        let y = vec![7.0; 12];
        let tree = RegressionTree::fit(&x, &y, params(10, 1)).unwrap();

        assert_eq!(tree.nodes().len(), 1);
        assert_eq!(tree.predict(&x[3]), 7.0);
    }

    #[test]
    fn test_min_samples_leaf_is_respected() {
        // ---
        let x: Vec<FeatureVector> = (0..30).map(|i| [i as f64, 0.0, 0.0, 0.0, 0.0]).collect();
        let y: Vec<f64> = (0..30).map(|i| (i * i) as f64).collect();
        let tree = RegressionTree::fit(&x, &y, params(10, 5)).unwrap();

        for node in tree.nodes() {
            if let Node::Leaf { samples, .. } = node {
                assert!(*samples >= 5, "leaf with {samples} samples");
            }
        }
        assert!(tree.leaf_count() <= 6);
    }

    #[test]
    fn test_too_few_samples_for_any_split() {
        // ---
        let (x, y) = step_data(8);
        let tree = RegressionTree::fit(&x, &y, params(4, 5)).unwrap();

        assert_eq!(tree.nodes().len(), 1);
        assert_eq!(tree.predict(&x[0]), 20.0);
    }

    #[test]
    fn test_max_depth_is_respected() {
        // ---
        let x: Vec<FeatureVector> = (0..64).map(|i| [i as f64, 0.0, 0.0, 0.0, 0.0]).collect();
        let y: Vec<f64> = (0..64).map(|i| i as f64).collect();

        let tree = RegressionTree::fit(&x, &y, params(2, 1)).unwrap();
        assert_eq!(tree.depth(), 2);
        assert_eq!(tree.leaf_count(), 4);
    }

    #[test]
    fn test_fit_rejects_bad_input() {
        // ---
        assert_eq!(
            RegressionTree::fit(&[], &[], params(4, 5)),
            Err(FitError::EmptyInput)
        );
        assert_eq!(
            RegressionTree::fit(&[[0.0; 5]], &[1.0, 2.0], params(4, 5)),
            Err(FitError::LengthMismatch { rows: 1, labels: 2 })
        );
    }

    #[test]
    fn test_serialized_tree_validates() {
        // ---
        let (x, y) = step_data(20);
        let tree = RegressionTree::fit(&x, &y, params(4, 2)).unwrap();

        let json = serde_json::to_string(&tree).unwrap();
        let back: RegressionTree = serde_json::from_str(&json).unwrap();
        assert_eq!(back, tree);
        assert!(back.validate().is_ok());

        let broken: RegressionTree = serde_json::from_str(
            r#"{"nodes":[{"kind":"split","feature":1,"threshold":1.0,"left":0,"right":7}]}"#,
        )
        .unwrap();
        assert!(matches!(broken.validate(), Err(FitError::Malformed(_))));
    }
}
