//! Dependency trees over a flat set of buildpack records.
//!
//! A record is a root when no record in the same set names its id inside an
//! order group. Each root is expanded into a tree by following its order
//! groups to the records they name.
//!
//! Order edges are checked for cycles with a topological sort before any
//! expansion, so a cyclic meta-buildpack is an error rather than unbounded
//! recursion.

use std::collections::HashSet;

use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use thiserror::Error;
use tracing::trace;

use super::types::{BuildpackRecord, BuildpackRef};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TreeError {
  /// An order group names a buildpack that is not in the set.
  #[error("buildpack '{parent}' references '{child}' which is not declared alongside it")]
  MissingChild { parent: String, child: String },

  /// Order groups form a cycle.
  #[error("cycle detected in buildpack order involving '{id}'")]
  Cycle { id: String },
}

/// A record and the records its order groups expand to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildpackTree {
  pub record: BuildpackRecord,
  pub children: Vec<BuildpackTree>,
}

impl BuildpackTree {
  /// Every record in the tree, depth first, parent before children.
  pub fn records(&self) -> Vec<&BuildpackRecord> {
    let mut out = vec![&self.record];
    for child in &self.children {
      out.extend(child.records());
    }
    out
  }
}

/// Index of the record a group reference points at.
///
/// A pinned version must match exactly; otherwise the first record with the
/// id is used.
pub(crate) fn find_record(records: &[BuildpackRecord], reference: &BuildpackRef) -> Option<usize> {
  let id = reference.id_str()?;
  match reference.version_str() {
    Some(version) => records.iter().position(|r| r.id == id && r.version == version),
    None => records.iter().position(|r| r.id == id),
  }
}

/// Build one tree per root, in input order.
pub fn build_trees(records: &[BuildpackRecord]) -> Result<Vec<BuildpackTree>, TreeError> {
  let mut graph: DiGraph<usize, ()> = DiGraph::new();
  let nodes: Vec<NodeIndex> = (0..records.len()).map(|i| graph.add_node(i)).collect();
  let mut children: Vec<Vec<usize>> = vec![Vec::new(); records.len()];
  let mut used: HashSet<&str> = HashSet::new();

  for (parent, record) in records.iter().enumerate() {
    for entry in record.order.iter().flat_map(|o| &o.group) {
      if let Some(id) = entry.reference.id_str() {
        used.insert(id);
      }
      let child = find_record(records, &entry.reference).ok_or_else(|| TreeError::MissingChild {
        parent: record.identity(),
        child: entry.reference.to_string(),
      })?;
      graph.add_edge(nodes[parent], nodes[child], ());
      children[parent].push(child);
    }
  }

  toposort(&graph, None).map_err(|cycle| TreeError::Cycle {
    id: records[graph[cycle.node_id()]].id.clone(),
  })?;

  let trees: Vec<BuildpackTree> = records
    .iter()
    .enumerate()
    .filter(|(_, record)| !used.contains(record.id.as_str()))
    .map(|(index, _)| expand(records, &children, index))
    .collect();

  trace!(records = records.len(), roots = trees.len(), "built buildpack trees");
  Ok(trees)
}

fn expand(records: &[BuildpackRecord], children: &[Vec<usize>], index: usize) -> BuildpackTree {
  BuildpackTree {
    record: records[index].clone(),
    children: children[index].iter().map(|&c| expand(records, children, c)).collect(),
  }
}
