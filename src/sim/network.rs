//! Routing of basin outflow along network edges.

use std::collections::{HashMap, HashSet, VecDeque};

use serde::{Deserialize, Serialize};

use crate::config::ConfigError;
use crate::error::{SimError, SimResult};

/// Tolerance on the sum of outgoing fractions of a basin.
const FRACTION_TOL: f64 = 1e-9;

/// Fraction of a source basin's outflow routed to a destination basin.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    /// Source basin id.
    pub from: i32,
    /// Destination basin id.
    pub to: i32,
    /// Share of the source outflow, in `[0, 1]`.
    pub fraction: f64,
}

/// Adjacency lists over basin indices, built once at initialization.
#[derive(Debug, Clone, Default)]
pub struct Network {
    outgoing: Vec<Vec<(usize, f64)>>,
    incoming: Vec<Vec<(usize, f64)>>,
    /// Basin indices with every basin after all of its upstream basins.
    upstream_first: Vec<usize>,
}

impl Network {
    /// Builds the network for basins ordered as `basin_ids`.
    ///
    /// # Errors
    ///
    /// Returns `Configuration` listing every edge with an unknown endpoint,
    /// a self-loop or a fraction outside `[0, 1]`, and every source whose
    /// fractions sum to more than one. A valid edge set that routes water in
    /// a cycle is rejected with the basins on or below the cycle.
    pub fn build(edges: &[Edge], basin_ids: &[i32]) -> SimResult<Self> {
        let index: HashMap<i32, usize> = basin_ids
            .iter()
            .enumerate()
            .map(|(i, &id)| (id, i))
            .collect();
        let n = basin_ids.len();
        let mut outgoing = vec![Vec::new(); n];
        let mut incoming = vec![Vec::new(); n];
        let mut errors = Vec::new();

        for (row, edge) in edges.iter().enumerate() {
            let field = format!("edge[{row}]");
            let (Some(&from), Some(&to)) = (index.get(&edge.from), index.get(&edge.to)) else {
                errors.push(ConfigError {
                    field,
                    message: format!("unknown basin in edge {} -> {}", edge.from, edge.to),
                });
                continue;
            };
            if from == to {
                errors.push(ConfigError {
                    field,
                    message: format!("basin {} routes to itself", edge.from),
                });
                continue;
            }
            if !(edge.fraction.is_finite() && (0.0..=1.0).contains(&edge.fraction)) {
                errors.push(ConfigError {
                    field,
                    message: format!("fraction must be in [0, 1], got {}", edge.fraction),
                });
                continue;
            }
            outgoing[from].push((to, edge.fraction));
            incoming[to].push((from, edge.fraction));
        }

        for (i, out) in outgoing.iter().enumerate() {
            let total: f64 = out.iter().map(|(_, f)| f).sum();
            if total > 1.0 + FRACTION_TOL {
                errors.push(ConfigError {
                    field: "edge".into(),
                    message: format!(
                        "outgoing fractions of basin {} sum to {total}, must be <= 1",
                        basin_ids[i]
                    ),
                });
            }
        }

        if !errors.is_empty() {
            return Err(SimError::Configuration(errors));
        }

        let upstream_first = topological_order(&outgoing, &incoming);
        if upstream_first.len() < n {
            let ordered: HashSet<usize> = upstream_first.iter().copied().collect();
            let stuck: Vec<String> = (0..n)
                .filter(|i| !ordered.contains(i))
                .map(|i| basin_ids[i].to_string())
                .collect();
            return Err(SimError::config(
                "edge",
                format!("routing cycle through basins {}", stuck.join(", ")),
            ));
        }
        Ok(Self {
            outgoing,
            incoming,
            upstream_first,
        })
    }

    /// Basin indices ordered so that every basin follows all basins routing
    /// water into it. Ties keep table order.
    pub fn upstream_first(&self) -> &[usize] {
        &self.upstream_first
    }

    /// Upstream `(basin index, fraction)` pairs of basin `i`.
    pub fn incoming(&self, i: usize) -> &[(usize, f64)] {
        &self.incoming[i]
    }

    /// Inflow into basin `i` given every basin's outflow (m³/s).
    pub fn routed_inflow(&self, i: usize, outflow: &[f64]) -> f64 {
        self.incoming[i]
            .iter()
            .map(|&(j, fraction)| fraction * outflow[j])
            .sum()
    }

    /// Number of basins.
    pub fn len(&self) -> usize {
        self.outgoing.len()
    }

    /// Returns `true` if the network has no basins.
    pub fn is_empty(&self) -> bool {
        self.outgoing.is_empty()
    }
}

/// Kahn's algorithm over the edge lists. Basins on or downstream of a cycle
/// never reach in-degree zero and are left out.
fn topological_order(
    outgoing: &[Vec<(usize, f64)>],
    incoming: &[Vec<(usize, f64)>],
) -> Vec<usize> {
    let mut in_degree: Vec<usize> = incoming.iter().map(Vec::len).collect();
    let mut ready: VecDeque<usize> = (0..in_degree.len())
        .filter(|&i| in_degree[i] == 0)
        .collect();
    let mut order = Vec::with_capacity(in_degree.len());
    while let Some(i) = ready.pop_front() {
        order.push(i);
        for &(j, _) in &outgoing[i] {
            in_degree[j] -= 1;
            if in_degree[j] == 0 {
                ready.push_back(j);
            }
        }
    }
    order
}
