//! Community detection over the transaction graph
//!
//! Partitions are computed on the undirected view of the graph. Every method
//! may fail; [`detect_communities`] cascades to the next one and finally to a
//! single community. [`repair_communities`] then guarantees that each
//! community holds at least one sender, one beneficiary and one transaction.

use crate::network_analysis::{GraphNode, NodeRole, TransactionGraph};
use petgraph::unionfind::UnionFind;
use petgraph::visit::EdgeRef;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Error, Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum CommunityError {
    #[error("Empty graph: {0}")]
    EmptyGraph(String),

    #[error("Graph too large: {0}")]
    TooLarge(String),

    #[error("No edges: {0}")]
    NoEdges(String),

    #[error("Exhausted: {0}")]
    Exhausted(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommunityMethod {
    /// Greedy modularity maximization (Clauset-Newman-Moore)
    Modularity,
    /// Asynchronous label propagation with seeded tie-breaks
    LabelPropagation,
    /// Repeated removal of the highest-betweenness edge
    GirvanNewman,
}

impl std::fmt::Display for CommunityMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            CommunityMethod::Modularity => write!(f, "modularity"),
            CommunityMethod::LabelPropagation => write!(f, "label_propagation"),
            CommunityMethod::GirvanNewman => write!(f, "girvan_newman"),
        }
    }
}

/// Community detection settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CommunityConfig {
    pub method: CommunityMethod,
    pub girvan_newman_node_limit: usize, // larger graphs skip Girvan-Newman
    pub seed: u64,                       // label propagation shuffles
    pub max_label_iterations: usize,
}

impl Default for CommunityConfig {
    fn default() -> Self {
        Self {
            method: CommunityMethod::Modularity,
            girvan_newman_node_limit: 100,
            seed: 42,
            max_label_iterations: 100,
        }
    }
}

/// Community per node index, numbered from 0 in order of first appearance
#[derive(Debug, Clone, PartialEq)]
pub struct CommunityAssignment {
    pub labels: Vec<usize>,
    /// `None` when every method failed and all nodes share one community
    pub method: Option<CommunityMethod>,
}

impl CommunityAssignment {
    pub fn community_count(&self) -> usize {
        self.labels.iter().collect::<BTreeSet<_>>().len()
    }
}

/// Undirected, unweighted adjacency built once per detection
struct Adjacency {
    neighbors: Vec<Vec<usize>>,
    edges: usize,
}

impl Adjacency {
    fn from_graph(graph: &TransactionGraph) -> Self {
        let mut sets = vec![BTreeSet::new(); graph.node_count()];
        for edge in graph.inner().edge_references() {
            let (a, b) = (edge.source().index(), edge.target().index());
            if a != b {
                sets[a].insert(b);
                sets[b].insert(a);
            }
        }
        let edges = sets.iter().map(BTreeSet::len).sum::<usize>() / 2;
        Self {
            neighbors: sets.into_iter().map(|s| s.into_iter().collect()).collect(),
            edges,
        }
    }

    fn len(&self) -> usize {
        self.neighbors.len()
    }

    fn check(&self) -> Result<(), CommunityError> {
        if self.len() == 0 {
            return Err(CommunityError::EmptyGraph("no nodes to partition".to_string()));
        }
        if self.edges == 0 {
            return Err(CommunityError::NoEdges(format!("{} isolated nodes", self.len())));
        }
        Ok(())
    }
}

/// Partition `graph` with `method`, cascading to modularity, then label
/// propagation, then a single community.
pub fn detect_communities(
    graph: &TransactionGraph,
    method: CommunityMethod,
    config: &CommunityConfig,
) -> CommunityAssignment {
    let adjacency = Adjacency::from_graph(graph);
    if adjacency.len() == 0 {
        return CommunityAssignment {
            labels: Vec::new(),
            method: None,
        };
    }

    let mut attempts = vec![method];
    for fallback in [CommunityMethod::Modularity, CommunityMethod::LabelPropagation] {
        if !attempts.contains(&fallback) {
            attempts.push(fallback);
        }
    }

    for attempt in attempts {
        let outcome = match attempt {
            CommunityMethod::Modularity => greedy_modularity(&adjacency),
            CommunityMethod::LabelPropagation => label_propagation(&adjacency, config),
            CommunityMethod::GirvanNewman => girvan_newman(&adjacency, config),
        };
        match outcome {
            Ok(labels) => {
                let labels = normalize_labels(&labels);
                debug!(method = %attempt, communities = labels.iter().max().map_or(0, |m| m + 1), "communities detected");
                return CommunityAssignment {
                    labels,
                    method: Some(attempt),
                };
            }
            Err(e) => warn!(method = %attempt, error = %e, "community detection failed, falling back"),
        }
    }

    CommunityAssignment {
        labels: vec![0; adjacency.len()],
        method: None,
    }
}

/// Renumber labels 0.. in order of first appearance
fn normalize_labels(labels: &[usize]) -> Vec<usize> {
    let mut mapping: HashMap<usize, usize> = HashMap::new();
    labels
        .iter()
        .map(|label| {
            let next = mapping.len();
            *mapping.entry(*label).or_insert(next)
        })
        .collect()
}

/// Clauset-Newman-Moore: merge the pair of communities with the largest
/// modularity gain until no merge improves modularity. Ties go to the lowest
/// community indices.
fn greedy_modularity(adjacency: &Adjacency) -> Result<Vec<usize>, CommunityError> {
    adjacency.check()?;

    let n = adjacency.len();
    let two_m = 2.0 * adjacency.edges as f64;
    let mut degree_share: Vec<f64> = adjacency.neighbors.iter().map(|nb| nb.len() as f64 / two_m).collect();
    let mut links: Vec<BTreeMap<usize, f64>> = adjacency
        .neighbors
        .iter()
        .map(|nb| nb.iter().map(|&j| (j, 1.0 / two_m)).collect())
        .collect();
    let mut labels: Vec<usize> = (0..n).collect();

    loop {
        let mut best: Option<(f64, usize, usize)> = None;
        for (i, row) in links.iter().enumerate() {
            for (&j, &e_ij) in row.range(i + 1..) {
                let gain = 2.0 * (e_ij - degree_share[i] * degree_share[j]);
                if best.map_or(true, |(top, _, _)| gain > top) {
                    best = Some((gain, i, j));
                }
            }
        }

        let Some((gain, i, j)) = best else { break };
        if gain <= 0.0 {
            break;
        }

        // fold community j into i
        let merged = std::mem::take(&mut links[j]);
        for (k, e_jk) in merged {
            if k == i {
                continue;
            }
            *links[i].entry(k).or_insert(0.0) += e_jk;
            links[k].remove(&j);
            *links[k].entry(i).or_insert(0.0) += e_jk;
        }
        links[i].remove(&j);
        degree_share[i] += degree_share[j];
        degree_share[j] = 0.0;
        for label in labels.iter_mut().filter(|l| **l == j) {
            *label = i;
        }
    }

    Ok(labels)
}

/// Asynchronous label propagation. Nodes adopt the most frequent label among
/// their neighbours, keeping their own on ties; remaining ties are broken by
/// the seeded generator.
fn label_propagation(adjacency: &Adjacency, config: &CommunityConfig) -> Result<Vec<usize>, CommunityError> {
    adjacency.check()?;

    let n = adjacency.len();
    let mut rng = StdRng::seed_from_u64(config.seed);
    let mut labels: Vec<usize> = (0..n).collect();
    let mut order: Vec<usize> = (0..n).collect();

    for iteration in 0..config.max_label_iterations {
        order.shuffle(&mut rng);
        let mut changed = false;

        for &node in &order {
            let mut counts: BTreeMap<usize, usize> = BTreeMap::new();
            for &neighbor in &adjacency.neighbors[node] {
                *counts.entry(labels[neighbor]).or_default() += 1;
            }
            let Some(top) = counts.values().copied().max() else { continue };
            let candidates: Vec<usize> = counts
                .iter()
                .filter(|(_, count)| **count == top)
                .map(|(label, _)| *label)
                .collect();
            if candidates.contains(&labels[node]) {
                continue;
            }
            if let Some(&choice) = candidates.choose(&mut rng) {
                labels[node] = choice;
                changed = true;
            }
        }

        if !changed {
            debug!(iterations = iteration + 1, "label propagation converged");
            return Ok(labels);
        }
    }

    debug!(iterations = config.max_label_iterations, "label propagation stopped before converging");
    Ok(labels)
}

/// Girvan-Newman, taking the partition reached after `k` splits where `k` is
/// 2 for graphs under ten nodes and `min(5, n / 5)` otherwise.
fn girvan_newman(adjacency: &Adjacency, config: &CommunityConfig) -> Result<Vec<usize>, CommunityError> {
    let n = adjacency.len();
    if n > config.girvan_newman_node_limit {
        return Err(CommunityError::TooLarge(format!(
            "{} nodes exceed the limit of {}",
            n, config.girvan_newman_node_limit
        )));
    }
    adjacency.check()?;

    let levels = if n >= 10 { (n / 5).min(5) } else { 2 };
    let mut remaining: BTreeSet<(usize, usize)> = adjacency
        .neighbors
        .iter()
        .enumerate()
        .flat_map(|(a, nb)| nb.iter().filter(move |&&b| a < b).map(move |&b| (a, b)))
        .collect();
    let mut components = connected_components(n, &remaining);

    for level in 0..levels {
        let before = count_distinct(&components);
        loop {
            let scores = edge_betweenness(n, &remaining);
            let Some(edge) = scores
                .iter()
                .fold(None, |best: Option<(&(usize, usize), f64)>, (edge, score)| match best {
                    Some((_, top)) if top >= *score => best,
                    _ => Some((edge, *score)),
                })
                .map(|(edge, _)| *edge)
            else {
                return Err(CommunityError::Exhausted(format!("no edges left at split {}", level + 1)));
            };

            remaining.remove(&edge);
            components = connected_components(n, &remaining);
            if count_distinct(&components) > before {
                break;
            }
        }
    }

    Ok(components)
}

fn connected_components(n: usize, edges: &BTreeSet<(usize, usize)>) -> Vec<usize> {
    let mut sets = UnionFind::<usize>::new(n);
    for &(a, b) in edges {
        sets.union(a, b);
    }
    sets.into_labeling()
}

fn count_distinct(labels: &[usize]) -> usize {
    labels.iter().collect::<BTreeSet<_>>().len()
}

/// Brandes edge betweenness on an unweighted undirected graph
fn edge_betweenness(n: usize, edges: &BTreeSet<(usize, usize)>) -> BTreeMap<(usize, usize), f64> {
    let mut neighbors = vec![Vec::new(); n];
    for &(a, b) in edges {
        neighbors[a].push(b);
        neighbors[b].push(a);
    }
    let mut scores: BTreeMap<(usize, usize), f64> = edges.iter().map(|e| (*e, 0.0)).collect();

    for source in 0..n {
        let mut stack = Vec::with_capacity(n);
        let mut predecessors: Vec<Vec<usize>> = vec![Vec::new(); n];
        let mut paths = vec![0.0_f64; n];
        let mut distance = vec![usize::MAX; n];
        paths[source] = 1.0;
        distance[source] = 0;

        let mut queue = VecDeque::from([source]);
        while let Some(v) = queue.pop_front() {
            stack.push(v);
            for &w in &neighbors[v] {
                if distance[w] == usize::MAX {
                    distance[w] = distance[v] + 1;
                    queue.push_back(w);
                }
                if distance[w] == distance[v] + 1 {
                    paths[w] += paths[v];
                    predecessors[w].push(v);
                }
            }
        }

        let mut dependency = vec![0.0_f64; n];
        while let Some(w) = stack.pop() {
            for &v in &predecessors[w] {
                let credit = paths[v] / paths[w] * (1.0 + dependency[w]);
                if let Some(score) = scores.get_mut(&(v.min(w), v.max(w))) {
                    *score += credit;
                }
                dependency[v] += credit;
            }
        }
    }

    scores
}

/// Per-community tallies used by the validity check
#[derive(Debug, Clone, Copy, Default)]
struct Tally {
    senders: usize,
    beneficiaries: usize,
    nodes: usize,
    transactions: usize,
}

impl Tally {
    fn is_valid(&self) -> bool {
        self.senders > 0 && self.beneficiaries > 0 && self.transactions > 0
    }

    fn weight(&self) -> usize {
        self.transactions * 10 + self.nodes
    }
}

fn tally(graph: &TransactionGraph, labels: &[usize]) -> Vec<Tally> {
    let count = labels.iter().max().map_or(0, |m| m + 1);
    let mut tallies = vec![Tally::default(); count];
    let inner = graph.inner();

    for index in inner.node_indices() {
        let Some(&label) = labels.get(index.index()) else { continue };
        let entry = &mut tallies[label];
        entry.nodes += 1;
        match inner[index].role {
            NodeRole::Sender => entry.senders += 1,
            NodeRole::Beneficiary => entry.beneficiaries += 1,
        }
    }
    for edge in inner.edge_references() {
        let (s, t) = (labels.get(edge.source().index()), labels.get(edge.target().index()));
        if let (Some(&s), Some(&t)) = (s, t) {
            if s == t {
                tallies[s].transactions += edge.weight().transactions;
            }
        }
    }
    tallies
}

/// Dissolve communities lacking a sender, a beneficiary or an internal
/// transaction. Their nodes join the valid community with the highest
/// `transactions * 10 + nodes`; with no valid community every node is placed
/// in a single one.
pub fn repair_communities(graph: &TransactionGraph, labels: &[usize]) -> Vec<usize> {
    let tallies = tally(graph, labels);
    if tallies.iter().all(Tally::is_valid) {
        return normalize_labels(labels);
    }

    let target = tallies
        .iter()
        .enumerate()
        .filter(|(_, t)| t.is_valid())
        .fold(None, |best: Option<(usize, usize)>, (id, t)| match best {
            Some((_, top)) if top >= t.weight() => best,
            _ => Some((id, t.weight())),
        })
        .map(|(id, _)| id);

    let repaired: Vec<usize> = match target {
        Some(target) => labels
            .iter()
            .map(|&l| if tallies[l].is_valid() { l } else { target })
            .collect(),
        None => vec![0; labels.len()],
    };

    let dissolved = tallies.iter().filter(|t| !t.is_valid()).count();
    debug!(dissolved, merged_into = ?target, "invalid communities repaired");
    normalize_labels(&repaired)
}

/// Community details for reporting
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Community {
    pub id: usize,
    pub name: String,
    pub nodes: usize,
    pub member_ids: Vec<String>,
    /// Sender labels
    pub senders: Vec<String>,
    /// Beneficiary labels
    pub beneficiaries: Vec<String>,
    /// Transactions on internal edges
    pub transactions: usize,
    pub total_value: f64,
    pub countries: Vec<String>,
    pub transaction_ids: Vec<String>,
}

impl Community {
    pub fn is_valid(&self) -> bool {
        !self.senders.is_empty() && !self.beneficiaries.is_empty() && self.transactions > 0
    }
}

/// Build the reporting view of each community in `labels`
pub fn describe_communities(graph: &TransactionGraph, labels: &[usize]) -> Vec<Community> {
    let inner = graph.inner();
    let mut members: BTreeMap<usize, Vec<&GraphNode>> = BTreeMap::new();
    for index in inner.node_indices() {
        if let Some(&label) = labels.get(index.index()) {
            members.entry(label).or_default().push(&inner[index]);
        }
    }

    members
        .into_iter()
        .map(|(id, nodes)| {
            let mut transactions = 0;
            let mut total_value = 0.0;
            let mut transaction_ids = Vec::new();
            for edge in inner.edge_references() {
                let inside = |i: usize| labels.get(i) == Some(&id);
                if inside(edge.source().index()) && inside(edge.target().index()) {
                    transactions += edge.weight().transactions;
                    total_value += edge.weight().value;
                    transaction_ids.extend(edge.weight().transaction_ids.iter().cloned());
                }
            }

            let labels_of = |role: NodeRole| {
                nodes
                    .iter()
                    .filter(|n| n.role == role)
                    .map(|n| n.label.clone())
                    .collect::<Vec<_>>()
            };
            let countries: BTreeSet<String> = nodes
                .iter()
                .filter_map(|n| n.country.as_deref())
                .map(|c| c.trim().to_string())
                .filter(|c| !c.is_empty())
                .collect();

            Community {
                id,
                name: community_name(id, &nodes),
                nodes: nodes.len(),
                member_ids: nodes.iter().map(|n| n.id.clone()).collect(),
                senders: labels_of(NodeRole::Sender),
                beneficiaries: labels_of(NodeRole::Beneficiary),
                transactions,
                total_value,
                countries: countries.into_iter().collect(),
                transaction_ids,
            }
        })
        .collect()
}

/// Descriptive name: the dominant country when it covers more than 60% of
/// the members, otherwise the sender/beneficiary composition.
pub fn community_name(id: usize, members: &[&GraphNode]) -> String {
    if members.is_empty() {
        return format!("Comunidad {}", id);
    }

    let mut countries: BTreeMap<&str, usize> = BTreeMap::new();
    for member in members {
        let country = member.country.as_deref().map(str::trim).filter(|c| !c.is_empty());
        *countries.entry(country.unwrap_or("Desconocido")).or_default() += 1;
    }
    let dominant = countries.iter().fold(None, |best: Option<(&str, usize)>, (c, n)| match best {
        Some((_, top)) if top >= *n => best,
        _ => Some((*c, *n)),
    });
    if let Some((country, count)) = dominant {
        if count as f64 / members.len() as f64 > 0.6 {
            return format!("Comunidad {}: {} ({} participantes)", id, country, members.len());
        }
    }

    let senders = members.iter().filter(|m| m.role == NodeRole::Sender).count();
    let beneficiaries = members.len() - senders;
    match (senders, beneficiaries) {
        (0, 0) => format!("Comunidad {} ({} participantes)", id, members.len()),
        (s, 0) => format!("Comunidad {}: {} remitentes", id, s),
        (0, b) => format!("Comunidad {}: {} beneficiarios", id, b),
        (s, b) => format!("Comunidad {}: {} remitentes y {} beneficiarios", id, s, b),
    }
}
