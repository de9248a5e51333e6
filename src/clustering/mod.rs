// src/clustering/mod.rs
//! Groups scored pairs into entity clusters: qualifying scores become graph
//! edges, connected components are found by DFS, and each component is then
//! re-merged bottom-up by average linkage so that weakly chained components
//! split instead of shipping as one blob.

use log::debug;
use petgraph::graph::{NodeIndex, UnGraph};
use std::collections::HashMap;

use crate::error::{MatchError, Result};
use crate::models::{Cluster, RecordKey, ScoredPair};

/// Clusters all pairs scoring at or above `threshold`.
///
/// Only clusters of two or more members are returned; records that fall
/// out of every cluster partition as singletons upstream. Output order
/// is deterministic: clusters by lowest member key, members ascending.
pub fn cluster(scored_pairs: &[ScoredPair], threshold: f64) -> Result<Vec<Cluster>> {
    if !(threshold > 0.0 && threshold <= 1.0) {
        return Err(MatchError::InvalidThreshold(threshold));
    }

    let mut graph: UnGraph<RecordKey, f64> = UnGraph::new_undirected();
    let mut key_to_node: HashMap<RecordKey, NodeIndex> = HashMap::new();
    // Canonical (min, max) keys so repeated scores for one pair aggregate
    // into a single edge holding the maximum.
    let mut edge_scores: HashMap<(NodeIndex, NodeIndex), f64> = HashMap::new();

    for scored in scored_pairs {
        if scored.score < threshold {
            continue;
        }
        let node_a = *key_to_node
            .entry(scored.pair.a().clone())
            .or_insert_with(|| graph.add_node(scored.pair.a().clone()));
        let node_b = *key_to_node
            .entry(scored.pair.b().clone())
            .or_insert_with(|| graph.add_node(scored.pair.b().clone()));
        let edge_key = if node_a < node_b {
            (node_a, node_b)
        } else {
            (node_b, node_a)
        };
        edge_scores
            .entry(edge_key)
            .and_modify(|s| *s = s.max(scored.score))
            .or_insert(scored.score);
    }
    for (&(a, b), &score) in &edge_scores {
        graph.add_edge(a, b, score);
    }
    debug!(
        "Cluster graph: {} nodes, {} edges at threshold {}",
        graph.node_count(),
        graph.edge_count(),
        threshold
    );

    // Connected components by DFS over the qualifying edges.
    let mut visited = vec![false; graph.node_count()];
    let mut components: Vec<Vec<NodeIndex>> = Vec::new();
    for start in graph.node_indices() {
        if visited[start.index()] {
            continue;
        }
        let mut component = Vec::new();
        let mut stack = vec![start];
        while let Some(current) = stack.pop() {
            if visited[current.index()] {
                continue;
            }
            visited[current.index()] = true;
            component.push(current);
            for neighbor in graph.neighbors(current) {
                if !visited[neighbor.index()] {
                    stack.push(neighbor);
                }
            }
        }
        components.push(component);
    }

    let mut clusters: Vec<Cluster> = Vec::new();
    for component in &components {
        for group in split_component(&graph, &edge_scores, component, threshold) {
            if group.len() < 2 {
                continue;
            }
            let members: Vec<RecordKey> = group.iter().map(|&n| graph[n].clone()).collect();
            let confidences = group
                .iter()
                .map(|&n| Some(member_confidence(&edge_scores, n, &group)))
                .collect();
            clusters.push(Cluster {
                members,
                confidences,
            });
        }
    }
    clusters.sort_by(|a, b| a.members[0].cmp(&b.members[0]));
    debug!(
        "Clustering produced {} multi-member clusters from {} components",
        clusters.len(),
        components.len()
    );
    Ok(clusters)
}

/// Average-linkage agglomerative regrouping of one component.
///
/// Distance between records is `1 - score`, with absent in-component
/// edges counting as 1.0, so a component held together by one weak
/// bridge does not survive as a single cluster. Groups merge while the
/// cheapest linkage stays within `1 - threshold`. Groups are kept
/// ordered by lowest member key and scanned with strict comparison, so
/// merge ties resolve toward the lowest keys.
fn split_component(
    graph: &UnGraph<RecordKey, f64>,
    edge_scores: &HashMap<(NodeIndex, NodeIndex), f64>,
    component: &[NodeIndex],
    threshold: f64,
) -> Vec<Vec<NodeIndex>> {
    let max_linkage = 1.0 - threshold;
    let mut groups: Vec<Vec<NodeIndex>> = {
        let mut sorted = component.to_vec();
        sorted.sort_by(|&x, &y| graph[x].cmp(&graph[y]));
        sorted.into_iter().map(|n| vec![n]).collect()
    };

    while groups.len() >= 2 {
        let mut best: Option<(usize, usize, f64)> = None;
        for i in 0..groups.len() {
            for j in (i + 1)..groups.len() {
                let distance = linkage_distance(edge_scores, &groups[i], &groups[j]);
                if best.map_or(true, |(_, _, d)| distance < d) {
                    best = Some((i, j, distance));
                }
            }
        }
        match best {
            Some((i, j, distance)) if distance <= max_linkage => {
                let merged = groups.remove(j);
                groups[i].extend(merged);
                groups[i].sort_by(|&x, &y| graph[x].cmp(&graph[y]));
            }
            _ => break,
        }
    }
    groups
}

fn linkage_distance(
    edge_scores: &HashMap<(NodeIndex, NodeIndex), f64>,
    left: &[NodeIndex],
    right: &[NodeIndex],
) -> f64 {
    let mut total = 0.0;
    for &x in left {
        for &y in right {
            total += match edge_score(edge_scores, x, y) {
                Some(score) => 1.0 - score,
                None => 1.0,
            };
        }
    }
    total / (left.len() * right.len()) as f64
}

/// Minimum edge score from one member to its co-members, a lower bound on
/// how well it is attached. No intra-cluster edge at all reads as 0.0.
fn member_confidence(
    edge_scores: &HashMap<(NodeIndex, NodeIndex), f64>,
    member: NodeIndex,
    group: &[NodeIndex],
) -> f64 {
    let mut weakest: Option<f64> = None;
    for &other in group {
        if other == member {
            continue;
        }
        if let Some(score) = edge_score(edge_scores, member, other) {
            weakest = Some(match weakest {
                Some(w) => w.min(score),
                None => score,
            });
        }
    }
    weakest.unwrap_or(0.0)
}

fn edge_score(
    edge_scores: &HashMap<(NodeIndex, NodeIndex), f64>,
    a: NodeIndex,
    b: NodeIndex,
) -> Option<f64> {
    let key = if a < b { (a, b) } else { (b, a) };
    edge_scores.get(&key).copied()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CandidatePair;

    fn scored(a: i64, b: i64, score: f64) -> ScoredPair {
        ScoredPair {
            pair: CandidatePair::new(a.into(), b.into()).unwrap(),
            score,
        }
    }

    fn keys(cluster: &Cluster) -> Vec<i64> {
        cluster
            .members
            .iter()
            .map(|k| match k {
                RecordKey::Int(i) => *i,
                RecordKey::Text(t) => panic!("unexpected text key {}", t),
            })
            .collect()
    }

    #[test]
    fn test_threshold_is_validated() {
        for bad in [0.0, -0.5, 1.2, f64::NAN] {
            match cluster(&[], bad) {
                Err(MatchError::InvalidThreshold(t)) => {
                    assert!(t.is_nan() || (t - bad).abs() < f64::EPSILON)
                }
                other => panic!("expected InvalidThreshold, got {:?}", other),
            }
        }
        assert!(cluster(&[], 1.0).unwrap().is_empty());
    }

    #[test]
    fn test_pair_above_threshold_clusters_outsider_stays_out() {
        let pairs = vec![scored(1, 2, 0.92), scored(1, 3, 0.15), scored(2, 3, 0.2)];
        let clusters = cluster(&pairs, 0.5).unwrap();
        assert_eq!(clusters.len(), 1);
        assert_eq!(keys(&clusters[0]), vec![1, 2]);
        assert_eq!(clusters[0].confidences, vec![Some(0.92), Some(0.92)]);
    }

    #[test]
    fn test_weak_chain_splits() {
        // 1-2 and 2-3 are strong but 1 and 3 share no edge; the average
        // linkage from {1,2} to {3} is (1.0 + 0.1) / 2 = 0.55.
        let pairs = vec![scored(1, 2, 0.9), scored(2, 3, 0.9)];

        let at_half = cluster(&pairs, 0.5).unwrap();
        assert_eq!(at_half.len(), 1);
        assert_eq!(keys(&at_half[0]), vec![1, 2]);

        let lenient = cluster(&pairs, 0.4).unwrap();
        assert_eq!(lenient.len(), 1);
        assert_eq!(keys(&lenient[0]), vec![1, 2, 3]);
    }

    #[test]
    fn test_raising_threshold_only_shrinks_clusters() {
        let pairs = vec![
            scored(1, 2, 0.95),
            scored(2, 3, 0.7),
            scored(1, 3, 0.65),
            scored(4, 5, 0.8),
        ];
        let lenient = cluster(&pairs, 0.6).unwrap();
        let strict = cluster(&pairs, 0.75).unwrap();
        // Every strict cluster is contained in some lenient cluster.
        for narrow in &strict {
            assert!(lenient.iter().any(|wide| narrow
                .members
                .iter()
                .all(|k| wide.contains(k))));
        }
        assert_eq!(keys(&lenient[0]), vec![1, 2, 3]);
        assert_eq!(keys(&strict[0]), vec![1, 2]);
    }

    #[test]
    fn test_duplicate_pair_scores_collapse_to_max() {
        let pairs = vec![scored(1, 2, 0.6), scored(1, 2, 0.85)];
        let clusters = cluster(&pairs, 0.5).unwrap();
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].confidences, vec![Some(0.85), Some(0.85)]);
    }

    #[test]
    fn test_confidence_is_weakest_edge_to_co_members() {
        let pairs = vec![scored(1, 2, 0.9), scored(2, 3, 0.7), scored(1, 3, 0.8)];
        let clusters = cluster(&pairs, 0.5).unwrap();
        assert_eq!(clusters.len(), 1);
        assert_eq!(keys(&clusters[0]), vec![1, 2, 3]);
        let confidences: Vec<f64> = clusters[0]
            .confidences
            .iter()
            .map(|c| c.unwrap())
            .collect();
        assert!((confidences[0] - 0.8).abs() < 1e-9);
        assert!((confidences[1] - 0.7).abs() < 1e-9);
        assert!((confidences[2] - 0.7).abs() < 1e-9);
    }

    #[test]
    fn test_output_order_is_deterministic() {
        let pairs = vec![scored(9, 8, 0.9), scored(2, 1, 0.9)];
        let clusters = cluster(&pairs, 0.5).unwrap();
        assert_eq!(clusters.len(), 2);
        assert_eq!(keys(&clusters[0]), vec![1, 2]);
        assert_eq!(keys(&clusters[1]), vec![8, 9]);
    }
}
