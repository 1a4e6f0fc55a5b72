use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const EULER_MASCHERONI: f64 = 0.577_215_664_901_532_9;

/// Isolation forest for multivariate outlier scoring.
///
/// Fitted once over a feature matrix; scores are in (0, 1) with higher
/// meaning more isolated. The outlier cutoff is the contamination quantile
/// of the training scores, fixed at fit time. A fixed seed keeps fits
/// reproducible across runs.
pub struct IsolationForest {
    trees: Vec<Node>,
    sample_size: usize,
    threshold: f64,
}

#[derive(Debug, Clone)]
pub struct ForestParams {
    pub n_trees: usize,
    pub sample_size: usize,
    pub contamination: f64,
    pub seed: u64,
}

impl Default for ForestParams {
    fn default() -> Self {
        Self {
            n_trees: 100,
            sample_size: 256,
            contamination: 0.1,
            seed: 42,
        }
    }
}

enum Node {
    Internal {
        feature: usize,
        split: f64,
        left: Box<Node>,
        right: Box<Node>,
    },
    Leaf {
        size: usize,
    },
}

impl IsolationForest {
    /// Fit over `data` (row-major, rectangular, no missing values).
    pub fn fit(data: &[Vec<f64>], params: &ForestParams) -> Self {
        assert!(!data.is_empty(), "isolation forest needs training rows");
        let n_features = data[0].len();
        let sample_size = params.sample_size.min(data.len()).max(2);
        let max_depth = (sample_size as f64).log2().ceil() as usize;

        let mut rng = StdRng::seed_from_u64(params.seed);
        let mut trees = Vec::with_capacity(params.n_trees);

        for _ in 0..params.n_trees {
            let sample: Vec<&Vec<f64>> = (0..sample_size)
                .map(|_| &data[rng.gen_range(0..data.len())])
                .collect();
            trees.push(build_tree(&sample, n_features, 0, max_depth, &mut rng));
        }

        let mut forest = Self {
            trees,
            sample_size,
            threshold: f64::INFINITY,
        };

        // Cutoff: the k-th highest training score, k = ceil(contamination * n).
        let mut scores: Vec<f64> = data.iter().map(|row| forest.score(row)).collect();
        scores.sort_by(|a, b| b.total_cmp(a));
        let k = ((params.contamination * data.len() as f64).ceil() as usize)
            .clamp(1, data.len());
        forest.threshold = scores[k - 1];

        forest
    }

    /// Anomaly score in (0, 1): 2^(-E[path length] / c(sample_size)).
    pub fn score(&self, row: &[f64]) -> f64 {
        let total: f64 = self
            .trees
            .iter()
            .map(|tree| path_length(tree, row, 0))
            .sum();
        let avg_path = total / self.trees.len() as f64;
        2f64.powf(-avg_path / average_path_length(self.sample_size))
    }

    pub fn is_outlier(&self, row: &[f64]) -> bool {
        self.score(row) >= self.threshold
    }
}

fn build_tree(
    sample: &[&Vec<f64>],
    n_features: usize,
    depth: usize,
    max_depth: usize,
    rng: &mut StdRng,
) -> Node {
    if depth >= max_depth || sample.len() <= 1 {
        return Node::Leaf { size: sample.len() };
    }

    let feature = rng.gen_range(0..n_features);
    let (min, max) = sample.iter().fold((f64::INFINITY, f64::NEG_INFINITY), |acc, row| {
        (acc.0.min(row[feature]), acc.1.max(row[feature]))
    });
    if min == max {
        return Node::Leaf { size: sample.len() };
    }

    let split = rng.gen_range(min..max);
    let (left, right): (Vec<&Vec<f64>>, Vec<&Vec<f64>>) =
        sample.iter().copied().partition(|row| row[feature] < split);

    Node::Internal {
        feature,
        split,
        left: Box::new(build_tree(&left, n_features, depth + 1, max_depth, rng)),
        right: Box::new(build_tree(&right, n_features, depth + 1, max_depth, rng)),
    }
}

fn path_length(node: &Node, row: &[f64], depth: usize) -> f64 {
    match node {
        Node::Leaf { size } => depth as f64 + average_path_length(*size),
        Node::Internal {
            feature,
            split,
            left,
            right,
        } => {
            if row[*feature] < *split {
                path_length(left, row, depth + 1)
            } else {
                path_length(right, row, depth + 1)
            }
        }
    }
}

/// Average path length of an unsuccessful BST search over n nodes; the
/// normalizing constant c(n) from the isolation forest paper.
fn average_path_length(n: usize) -> f64 {
    match n {
        0 | 1 => 0.0,
        2 => 1.0,
        n => {
            let n = n as f64;
            2.0 * ((n - 1.0).ln() + EULER_MASCHERONI) - 2.0 * (n - 1.0) / n
        }
    }
}
