//! Structural analytics over the document adjacency.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::config::GraphOptions;
use crate::graph::Adjacency;
use crate::models::{BridgeNode, Document};
use crate::tokenizer::tokenize_stream;

/// PageRank scaled so the highest-ranked node scores exactly 1.
///
/// This is a ranking for "top hub" display, not a probability distribution;
/// use [`pagerank_distribution`] for the raw values.
pub fn pagerank(adjacency: &Adjacency, options: &GraphOptions) -> BTreeMap<String, f64> {
    let mut ranks = pagerank_distribution(adjacency, options);
    let max = ranks.values().copied().fold(0.0_f64, f64::max);
    if max > 0.0 {
        for rank in ranks.values_mut() {
            *rank /= max;
        }
    }
    ranks
}

/// Raw iterative PageRank. Values sum to ~1 across all nodes.
pub fn pagerank_distribution(
    adjacency: &Adjacency,
    options: &GraphOptions,
) -> BTreeMap<String, f64> {
    let ids: Vec<&str> = adjacency.nodes().collect();
    let count = ids.len();
    if count == 0 {
        return BTreeMap::new();
    }

    let position: HashMap<&str, usize> = ids.iter().enumerate().map(|(i, id)| (*id, i)).collect();
    let out_degree: Vec<usize> = ids.iter().map(|id| adjacency.neighbors(id).len()).collect();

    let mut incoming: Vec<Vec<usize>> = vec![Vec::new(); count];
    for (source, id) in ids.iter().enumerate() {
        for neighbor in adjacency.neighbors(id) {
            if let Some(&target) = position.get(neighbor.as_str()) {
                incoming[target].push(source);
            }
        }
    }

    let n = count as f64;
    let damping = options.damping;
    let mut ranks = vec![1.0 / n; count];

    for _ in 0..options.pagerank_iterations {
        let dangling: f64 = ranks
            .iter()
            .zip(&out_degree)
            .filter(|(_, degree)| **degree == 0)
            .map(|(rank, _)| rank)
            .sum();
        let base = (1.0 - damping) / n + damping * dangling / n;

        ranks = incoming
            .iter()
            .map(|sources| {
                let inflow: f64 = sources
                    .iter()
                    .map(|&source| ranks[source] / out_degree[source] as f64)
                    .sum();
                base + damping * inflow
            })
            .collect();
    }

    ids.into_iter()
        .map(str::to_string)
        .zip(ranks)
        .collect()
}

/// Node ids ordered by descending rank, ties by id.
pub fn top_hubs(ranks: &BTreeMap<String, f64>, k: usize) -> Vec<String> {
    let mut ordered: Vec<(&String, f64)> = ranks.iter().map(|(id, rank)| (id, *rank)).collect();
    ordered.sort_by(|left, right| right.1.total_cmp(&left.1).then_with(|| left.0.cmp(right.0)));
    ordered.into_iter().take(k).map(|(id, _)| id.clone()).collect()
}

struct UnionFind {
    parent: Vec<usize>,
}

impl UnionFind {
    fn new(size: usize) -> Self {
        Self {
            parent: (0..size).collect(),
        }
    }

    fn find(&mut self, node: usize) -> usize {
        let mut root = node;
        while self.parent[root] != root {
            root = self.parent[root];
        }
        let mut current = node;
        while self.parent[current] != root {
            let next = self.parent[current];
            self.parent[current] = root;
            current = next;
        }
        root
    }

    fn union(&mut self, a: usize, b: usize) {
        let (root_a, root_b) = (self.find(a), self.find(b));
        if root_a != root_b {
            self.parent[root_b] = root_a;
        }
    }
}

/// Connected components, numbered by descending size (0 = largest).
pub fn detect_clusters(adjacency: &Adjacency) -> BTreeMap<String, usize> {
    let ids: Vec<&str> = adjacency.nodes().collect();
    let position: HashMap<&str, usize> = ids.iter().enumerate().map(|(i, id)| (*id, i)).collect();

    let mut sets = UnionFind::new(ids.len());
    for (index, id) in ids.iter().enumerate() {
        for neighbor in adjacency.neighbors(id) {
            if let Some(&other) = position.get(neighbor.as_str()) {
                sets.union(index, other);
            }
        }
    }

    let mut groups: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for index in 0..ids.len() {
        groups.entry(sets.find(index)).or_default().push(index);
    }

    // Members are pushed in id order, so the first member is the smallest id.
    let mut groups: Vec<Vec<usize>> = groups.into_values().collect();
    groups.sort_by(|left, right| right.len().cmp(&left.len()).then_with(|| left[0].cmp(&right[0])));

    let mut clusters = BTreeMap::new();
    for (cluster, members) in groups.into_iter().enumerate() {
        for member in members {
            clusters.insert(ids[member].to_string(), cluster);
        }
    }
    clusters
}

/// Nodes whose neighborhood touches more than one cluster.
pub fn detect_bridges(
    adjacency: &Adjacency,
    clusters: &BTreeMap<String, usize>,
) -> Vec<BridgeNode> {
    let mut bridges: Vec<BridgeNode> = adjacency
        .iter()
        .filter_map(|(id, neighbors)| {
            let own = *clusters.get(id)?;
            let mut touched = BTreeSet::from([own]);
            touched.extend(
                neighbors
                    .iter()
                    .filter_map(|neighbor| clusters.get(neighbor).copied()),
            );
            (touched.len() >= 2).then(|| BridgeNode {
                id: id.to_string(),
                cluster_count: touched.len(),
                clusters: touched.into_iter().collect(),
            })
        })
        .collect();

    bridges.sort_by(|left, right| {
        right
            .cluster_count
            .cmp(&left.cluster_count)
            .then_with(|| left.id.cmp(&right.id))
    });
    bridges
}

/// The `top_k` most frequent terms of each cluster's member documents.
pub fn extract_topics(
    docs: &[Document],
    clusters: &BTreeMap<String, usize>,
    top_k: usize,
) -> BTreeMap<usize, Vec<String>> {
    let mut counts: BTreeMap<usize, HashMap<String, usize>> = BTreeMap::new();

    for doc in docs {
        let Some(&cluster) = clusters.get(&doc.id) else {
            continue;
        };

        let mut text = String::new();
        text.push_str(doc.stem());
        for tag in &doc.tags {
            text.push(' ');
            text.push_str(tag);
        }
        for section in &doc.sections {
            text.push(' ');
            text.push_str(&section.heading);
            text.push(' ');
            text.push_str(&section.body);
        }

        let frequencies = counts.entry(cluster).or_default();
        for term in tokenize_stream(&text) {
            if term.chars().count() >= 2 {
                *frequencies.entry(term).or_insert(0) += 1;
            }
        }
    }

    counts
        .into_iter()
        .map(|(cluster, frequencies)| {
            let mut ranked: Vec<(String, usize)> = frequencies.into_iter().collect();
            ranked.sort_by(|left, right| right.1.cmp(&left.1).then_with(|| left.0.cmp(&right.0)));
            let keywords = ranked.into_iter().take(top_k).map(|(term, _)| term).collect();
            (cluster, keywords)
        })
        .collect()
}
