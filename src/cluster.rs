use std::collections::HashMap;
use std::fmt;

use nalgebra::DMatrix;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::Dfs;
use petgraph::Direction;
use polars::prelude::*;
use tracing::{debug, info};

use crate::config::AnalysisConfig;
use crate::error::{HydroError, Result};
use crate::factor::FactorModel;
use crate::schema::{derived, linkage};
use crate::table;

/// Final cluster label of a sample.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ClusterLabel {
    /// 1-based cluster from the flat cut.
    Numeric(u32),
    /// Sample type kept out of the clustering, e.g. `village pond`.
    Categorical(String),
}

impl fmt::Display for ClusterLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClusterLabel::Numeric(n) => write!(f, "{n}"),
            ClusterLabel::Categorical(s) => f.write_str(s),
        }
    }
}

/// One agglomeration step. Ids below the leaf count are samples; merge `m`
/// creates cluster `leaf_count + m`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Merge {
    pub left: usize,
    pub right: usize,
    pub distance: f64,
    pub size: usize,
}

/// Ward merge tree over the clustered samples.
///
/// Each cluster id is a node; edges point from a merged cluster to its two
/// children.
#[derive(Debug, Clone)]
pub struct Dendrogram {
    graph: DiGraph<usize, ()>,
    leaf_labels: Vec<String>,
    merges: Vec<Merge>,
}

impl Dendrogram {
    pub fn from_points(points: &DMatrix<f64>, leaf_labels: Vec<String>) -> Self {
        let merges = ward_linkage(points);
        let n = points.nrows();

        let mut graph = DiGraph::with_capacity(2 * n, 2 * n);
        for id in 0..n + merges.len() {
            graph.add_node(id);
        }
        for (m, merge) in merges.iter().enumerate() {
            let parent = NodeIndex::new(n + m);
            graph.add_edge(parent, NodeIndex::new(merge.left), ());
            graph.add_edge(parent, NodeIndex::new(merge.right), ());
        }

        Self {
            graph,
            leaf_labels,
            merges,
        }
    }

    pub fn leaf_count(&self) -> usize {
        self.leaf_labels.len()
    }

    pub fn leaf_labels(&self) -> &[String] {
        &self.leaf_labels
    }

    pub fn merges(&self) -> &[Merge] {
        &self.merges
    }

    /// Sample indices under a cluster id, ascending.
    pub fn leaves_under(&self, cluster_id: usize) -> Vec<usize> {
        let mut leaves = Vec::new();
        let mut dfs = Dfs::new(&self.graph, NodeIndex::new(cluster_id));
        while let Some(node) = dfs.next(&self.graph) {
            if self
                .graph
                .neighbors_directed(node, Direction::Outgoing)
                .next()
                .is_none()
            {
                leaves.push(self.graph[node]);
            }
        }
        leaves.sort_unstable();
        leaves
    }

    /// Leaves in drawing order, left child before right child.
    pub fn leaf_order(&self) -> Vec<usize> {
        let n = self.leaf_count();
        if n == 0 {
            return Vec::new();
        }
        let mut order = Vec::with_capacity(n);
        let mut stack = vec![n + self.merges.len() - 1];
        while let Some(id) = stack.pop() {
            if id < n {
                order.push(id);
            } else {
                let merge = &self.merges[id - n];
                stack.push(merge.right);
                stack.push(merge.left);
            }
        }
        order
    }

    /// Flat partition into `n_clusters` groups by undoing the last
    /// `n_clusters - 1` merges. Labels are 1-based, numbered by the first
    /// sample (in input order) of each group.
    pub fn cut(&self, n_clusters: usize) -> Result<Vec<u32>> {
        let n = self.leaf_count();
        if n_clusters == 0 || n_clusters > n {
            return Err(HydroError::ClusterConfig {
                requested: n_clusters,
                available: n,
            });
        }

        let mut roots = vec![n + self.merges.len() - 1];
        for step in 0..n_clusters - 1 {
            let id = n + self.merges.len() - 1 - step;
            roots.retain(|&r| r != id);
            let merge = &self.merges[id - n];
            roots.push(merge.left);
            roots.push(merge.right);
        }

        let mut groups: Vec<Vec<usize>> = roots.iter().map(|&r| self.leaves_under(r)).collect();
        groups.sort_by_key(|leaves| leaves[0]);

        let mut labels = vec![0u32; n];
        for (g, leaves) in groups.iter().enumerate() {
            for &leaf in leaves {
                labels[leaf] = g as u32 + 1;
            }
        }
        Ok(labels)
    }

    /// Linkage rows: left, right, distance, size.
    pub fn to_frame(&self) -> Result<DataFrame> {
        let left: Vec<u64> = self.merges.iter().map(|m| m.left as u64).collect();
        let right: Vec<u64> = self.merges.iter().map(|m| m.right as u64).collect();
        let distance: Vec<f64> = self.merges.iter().map(|m| m.distance).collect();
        let size: Vec<u64> = self.merges.iter().map(|m| m.size as u64).collect();
        Ok(DataFrame::new(vec![
            Column::new(linkage::LEFT.into(), &left),
            Column::new(linkage::RIGHT.into(), &right),
            Column::new(linkage::DISTANCE.into(), &distance),
            Column::new(linkage::SIZE.into(), &size),
        ])?)
    }
}

/// Ward agglomeration on Euclidean distances via Lance-Williams updates.
/// Ties go to the pair with the lowest cluster ids.
fn ward_linkage(points: &DMatrix<f64>) -> Vec<Merge> {
    let n = points.nrows();
    let mut dist = DMatrix::<f64>::zeros(n, n);
    for a in 0..n {
        for b in (a + 1)..n {
            let d = (points.row(a) - points.row(b)).norm();
            dist[(a, b)] = d;
            dist[(b, a)] = d;
        }
    }

    // slot -> (cluster id, size); None once absorbed
    let mut slots: Vec<Option<(usize, usize)>> = (0..n).map(|i| Some((i, 1))).collect();
    let mut merges = Vec::with_capacity(n.saturating_sub(1));

    for m in 0..n.saturating_sub(1) {
        let mut best: Option<(f64, usize, usize, usize, usize)> = None;
        for a in 0..n {
            let Some((id_a, _)) = slots[a] else { continue };
            for b in (a + 1)..n {
                let Some((id_b, _)) = slots[b] else { continue };
                let key = (dist[(a, b)], id_a.min(id_b), id_a.max(id_b));
                let better = match best {
                    None => true,
                    Some((d, lo, hi, _, _)) => {
                        key.0 < d || (key.0 == d && (key.1, key.2) < (lo, hi))
                    }
                };
                if better {
                    best = Some((key.0, key.1, key.2, a, b));
                }
            }
        }
        let Some((d_ab, left, right, a, b)) = best else {
            break;
        };
        let size_a = slots[a].map(|s| s.1).unwrap_or(0);
        let size_b = slots[b].map(|s| s.1).unwrap_or(0);

        for k in 0..n {
            if k == a || k == b {
                continue;
            }
            let Some((_, size_k)) = slots[k] else { continue };
            let (sa, sb, sk) = (size_a as f64, size_b as f64, size_k as f64);
            let updated = (((sa + sk) * dist[(a, k)].powi(2) + (sb + sk) * dist[(b, k)].powi(2)
                - sk * d_ab.powi(2))
                / (sa + sb + sk))
                .max(0.0)
                .sqrt();
            dist[(a, k)] = updated;
            dist[(k, a)] = updated;
        }

        let size = size_a + size_b;
        slots[a] = Some((n + m, size));
        slots[b] = None;
        merges.push(Merge {
            left,
            right,
            distance: d_ab,
            size,
        });
    }
    merges
}

/// Labels for every row of the merged table, in its row order.
#[derive(Debug, Clone)]
pub struct ClusterLabels {
    pub sample_ids: Vec<String>,
    pub labels: Vec<Option<ClusterLabel>>,
}

impl ClusterLabels {
    /// String column: integers without a decimal part, excluded types verbatim.
    pub fn to_column(&self) -> Column {
        let rendered: Vec<Option<String>> = self
            .labels
            .iter()
            .map(|l| l.as_ref().map(|l| l.to_string()))
            .collect();
        Column::new(derived::CLUSTER.into(), &rendered)
    }

    pub fn to_frame(&self, sample_id_column: &str) -> Result<DataFrame> {
        Ok(DataFrame::new(vec![
            Column::new(sample_id_column.into(), &self.sample_ids),
            self.to_column(),
        ])?)
    }

    pub fn get(&self, sample_id: &str) -> Option<&ClusterLabel> {
        self.sample_ids
            .iter()
            .position(|id| id == sample_id)
            .and_then(|i| self.labels[i].as_ref())
    }
}

#[derive(Debug, Clone)]
pub struct ClusterAssignment {
    pub dendrogram: Dendrogram,
    pub labels: ClusterLabels,
}

pub struct ClusterAssigner<'a> {
    config: &'a AnalysisConfig,
}

impl<'a> ClusterAssigner<'a> {
    pub fn new(config: &'a AnalysisConfig) -> Self {
        Self { config }
    }

    pub fn assign(&self, model: &FactorModel, merged: &DataFrame) -> Result<ClusterAssignment> {
        let ids = table::sample_ids(merged, self.config)?;
        let types = table::string_column(merged, &self.config.schema.sample_type)?;
        let type_of: HashMap<&str, Option<&str>> = ids
            .iter()
            .map(|s| s.as_str())
            .zip(types.iter().map(|t| t.as_deref()))
            .collect();

        // Excluded types never enter the distance computation.
        let rows: Vec<usize> = (0..model.sample_ids.len())
            .filter(|&i| {
                let t = type_of.get(model.sample_ids[i].as_str()).copied().flatten();
                !t.map(|t| self.config.is_excluded(t)).unwrap_or(false)
            })
            .collect();
        let points = model.scores.select_rows(rows.iter());
        let leaf_labels: Vec<String> = rows.iter().map(|&i| model.sample_ids[i].clone()).collect();

        let n_clusters = self.config.n_clusters;
        if n_clusters == 0 || n_clusters > points.nrows() {
            return Err(HydroError::ClusterConfig {
                requested: n_clusters,
                available: points.nrows(),
            });
        }

        let dendrogram = Dendrogram::from_points(&points, leaf_labels);
        let numeric = dendrogram.cut(n_clusters)?;
        debug!(merges = dendrogram.merges().len(), "ward linkage complete");

        let numeric_by_id: HashMap<&str, u32> = dendrogram
            .leaf_labels()
            .iter()
            .map(|s| s.as_str())
            .zip(numeric.iter().copied())
            .collect();

        let labels = ids
            .iter()
            .zip(&types)
            .map(|(id, t)| match t.as_deref() {
                Some(t) if self.config.is_excluded(t) => {
                    Some(ClusterLabel::Categorical(t.to_string()))
                }
                _ => numeric_by_id
                    .get(id.as_str())
                    .map(|&n| ClusterLabel::Numeric(n)),
            })
            .collect();

        info!(
            stage = "cluster",
            samples = points.nrows(),
            clusters = n_clusters,
            "assigned cluster labels"
        );
        Ok(ClusterAssignment {
            dendrogram,
            labels: ClusterLabels {
                sample_ids: ids,
                labels,
            },
        })
    }
}
