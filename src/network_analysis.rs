//! Transaction network analysis
//!
//! Builds a directed graph of sender and beneficiary identities from a
//! transaction set, partitions it into communities and exports the result in
//! the shape consumed by the visualization layer.

use crate::community::{self, Community, CommunityConfig, CommunityMethod};
use crate::geographic_risk::{color_for, normalize_country};
use crate::{text, Column, Transaction, TransactionSet};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// Columns without which no graph is built
const GRAPH_COLUMNS: &[Column] = &[
    Column::SenderDocumentNumber,
    Column::SenderFirstName,
    Column::SenderSurname,
    Column::BeneficiaryFirstName,
    Column::BeneficiarySurname,
    Column::Amount,
    Column::DestinationCountry,
];

/// Row filters applied before any node or edge is created
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraphFilter {
    pub min_amount: f64,                         // 0 keeps every row
    pub destinations: Option<Vec<String>>,       // destination allow-list
    pub document_countries: Option<Vec<String>>, // document-country allow-list
}

impl GraphFilter {
    pub fn with_min_amount(mut self, min_amount: f64) -> Self {
        self.min_amount = min_amount;
        self
    }

    pub fn with_destinations<I, S>(mut self, countries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.destinations = Some(countries.into_iter().map(Into::into).collect());
        self
    }

    pub fn with_document_countries<I, S>(mut self, countries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.document_countries = Some(countries.into_iter().map(Into::into).collect());
        self
    }

    pub fn accepts(&self, tx: &Transaction) -> bool {
        if self.min_amount > 0.0 && !tx.amount.map_or(false, |a| a >= self.min_amount) {
            return false;
        }
        allowed(&self.destinations, &tx.beneficiary.destination_country)
            && allowed(&self.document_countries, &tx.sender.document_country)
    }
}

fn allowed(list: &Option<Vec<String>>, value: &Option<String>) -> bool {
    match list {
        Some(countries) if !countries.is_empty() => text(value).map_or(false, |v| {
            let v = normalize_country(v);
            countries.iter().any(|c| normalize_country(c) == v)
        }),
        _ => true,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeRole {
    Sender,
    Beneficiary,
}

impl std::fmt::Display for NodeRole {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            NodeRole::Sender => write!(f, "sender"),
            NodeRole::Beneficiary => write!(f, "beneficiary"),
        }
    }
}

/// Distinct sender or beneficiary identity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphNode {
    pub id: String,
    pub role: NodeRole,
    pub label: String,
    /// Document country for senders, destination for beneficiaries
    pub country: Option<String>,
    /// Sum of incident transaction amounts
    pub value: f64,
    pub transactions: usize,
    pub document: Option<String>,
}

impl GraphNode {
    fn new(id: String, role: NodeRole, label: String, country: Option<String>) -> Self {
        let label = if label.is_empty() { id.clone() } else { label };
        Self {
            id,
            role,
            label,
            country,
            value: 0.0,
            transactions: 0,
            document: None,
        }
    }
}

/// All transactions between one sender and one beneficiary
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphEdge {
    pub value: f64,
    pub transactions: usize,
    pub transaction_ids: Vec<String>,
}

impl GraphEdge {
    fn record(&mut self, tx: &Transaction) {
        self.value += tx.amount.unwrap_or_default();
        self.transactions += 1;
        let id = tx.transaction_id.trim();
        if !id.is_empty() {
            self.transaction_ids.push(id.to_string());
        }
    }
}

/// Directed sender → beneficiary graph
#[derive(Debug, Clone, Default)]
pub struct TransactionGraph {
    graph: DiGraph<GraphNode, GraphEdge>,
    index: HashMap<String, NodeIndex>,
}

impl TransactionGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one transaction, creating its endpoints and edge on first sight
    pub fn add_transaction(&mut self, sender: GraphNode, beneficiary: GraphNode, tx: &Transaction) {
        let amount = tx.amount.unwrap_or_default();
        let source = self.upsert(sender, amount);
        let target = self.upsert(beneficiary, amount);

        match self.graph.find_edge(source, target) {
            Some(edge) => {
                if let Some(weight) = self.graph.edge_weight_mut(edge) {
                    weight.record(tx);
                }
            }
            None => {
                let mut weight = GraphEdge::default();
                weight.record(tx);
                self.graph.add_edge(source, target, weight);
            }
        }
    }

    fn upsert(&mut self, node: GraphNode, amount: f64) -> NodeIndex {
        let index = match self.index.get(&node.id) {
            Some(&index) => index,
            None => {
                let id = node.id.clone();
                let index = self.graph.add_node(node);
                self.index.insert(id, index);
                index
            }
        };
        if let Some(existing) = self.graph.node_weight_mut(index) {
            existing.value += amount;
            existing.transactions += 1;
        }
        index
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    pub fn node(&self, id: &str) -> Option<&GraphNode> {
        self.index.get(id).and_then(|&i| self.graph.node_weight(i))
    }

    pub fn edge(&self, source: &str, target: &str) -> Option<&GraphEdge> {
        let (s, t) = (*self.index.get(source)?, *self.index.get(target)?);
        self.graph.find_edge(s, t).and_then(|e| self.graph.edge_weight(e))
    }

    /// Nodes in insertion order
    pub fn nodes(&self) -> impl Iterator<Item = &GraphNode> {
        self.graph.node_weights()
    }

    pub fn inner(&self) -> &DiGraph<GraphNode, GraphEdge> {
        &self.graph
    }

    pub fn summary(&self) -> GraphSummary {
        let senders = self.nodes().filter(|n| n.role == NodeRole::Sender).count();
        GraphSummary {
            nodes: self.node_count(),
            edges: self.edge_count(),
            senders,
            beneficiaries: self.node_count() - senders,
            transactions: self.graph.edge_weights().map(|e| e.transactions).sum(),
            total_value: self.graph.edge_weights().map(|e| e.value).sum(),
        }
    }
}

/// Aggregate figures of a graph
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphSummary {
    pub nodes: usize,
    pub edges: usize,
    pub senders: usize,
    pub beneficiaries: usize,
    pub transactions: usize,
    pub total_value: f64,
}

/// Turns free-text names into stable identifier fragments
struct IdentityNormalizer {
    punctuation: Regex,
    separators: Regex,
}

impl IdentityNormalizer {
    fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            punctuation: Regex::new(r"[^\w\s]")?,
            separators: Regex::new(r"[\s_]+")?,
        })
    }

    fn normalize(&self, raw: &str) -> String {
        let cleaned = self.punctuation.replace_all(raw, "");
        self.separators.replace_all(&cleaned, "_").trim_matches('_').to_string()
    }

    fn join(&self, parts: &[&Option<String>]) -> String {
        let raw: Vec<&str> = parts.iter().map(|p| text(p).unwrap_or("")).collect();
        self.normalize(&raw.join("_"))
    }

    fn sender_id(&self, tx: &Transaction, row: usize) -> String {
        if let Some(doc) = text(&tx.sender.document_number) {
            return format!("S_{}", doc);
        }
        let name = self.join(&[&tx.sender.first_name, &tx.sender.surname, &tx.sender.second_surname]);
        if name.is_empty() {
            format!("S_anon_{}", row)
        } else {
            format!("S_{}", name)
        }
    }

    fn beneficiary_id(&self, tx: &Transaction, row: usize) -> String {
        let b = &tx.beneficiary;
        let key = self.join(&[&b.first_name, &b.surname, &b.second_surname, &b.destination_country]);
        if key.is_empty() {
            format!("B_anon_{}", row)
        } else {
            format!("B_{}", key)
        }
    }
}

/// Build the sender/beneficiary graph of the rows accepted by `filter`.
///
/// Missing identity columns and an empty filtered set both produce an empty
/// graph.
pub fn build_graph(set: &TransactionSet, filter: &GraphFilter) -> TransactionGraph {
    let mut graph = TransactionGraph::new();

    if let Err(e) = set.require(GRAPH_COLUMNS) {
        warn!(error = %e, "graph columns missing, returning an empty graph");
        return graph;
    }
    let ids = match IdentityNormalizer::new() {
        Ok(ids) => ids,
        Err(e) => {
            warn!(error = %e, "identity patterns failed to compile");
            return graph;
        }
    };

    for (row, tx) in set.iter().enumerate() {
        if !filter.accepts(tx) {
            continue;
        }

        let mut sender = GraphNode::new(
            ids.sender_id(tx, row),
            NodeRole::Sender,
            tx.sender_full_name(),
            text(&tx.sender.document_country).map(str::to_string),
        );
        sender.document = text(&tx.sender.document_number).map(str::to_string);

        let beneficiary = GraphNode::new(
            ids.beneficiary_id(tx, row),
            NodeRole::Beneficiary,
            tx.beneficiary_full_name(),
            text(&tx.beneficiary.destination_country).map(str::to_string),
        );

        graph.add_transaction(sender, beneficiary, tx);
    }

    debug!(nodes = graph.node_count(), edges = graph.edge_count(), "transaction graph built");
    graph
}

/// Graph plus its validated community partition
#[derive(Debug, Clone)]
pub struct NetworkAnalysis {
    pub graph: TransactionGraph,
    /// Community of each node, by node index
    pub labels: Vec<usize>,
    /// Algorithm that produced the partition; `None` when every method failed
    pub method: Option<CommunityMethod>,
    pub communities: Vec<Community>,
}

impl NetworkAnalysis {
    pub fn build(set: &TransactionSet, filter: &GraphFilter, config: &CommunityConfig) -> Self {
        let graph = build_graph(set, filter);
        let assignment = community::detect_communities(&graph, config.method, config);
        let labels = community::repair_communities(&graph, &assignment.labels);
        let communities = community::describe_communities(&graph, &labels);

        info!(
            nodes = graph.node_count(),
            edges = graph.edge_count(),
            communities = communities.len(),
            method = ?assignment.method,
            "network analysis complete"
        );

        Self {
            graph,
            labels,
            method: assignment.method,
            communities,
        }
    }

    pub fn community_of(&self, node_id: &str) -> Option<&Community> {
        let index = self.graph.index.get(node_id)?;
        let label = self.labels.get(index.index())?;
        self.communities.iter().find(|c| c.id == *label)
    }

    pub fn summary(&self) -> GraphSummary {
        self.graph.summary()
    }

    /// Visualization export: nodes, edges and community names
    pub fn export(&self) -> GraphExport {
        let names: HashMap<usize, &str> = self.communities.iter().map(|c| (c.id, c.name.as_str())).collect();
        let inner = self.graph.inner();

        let nodes = inner
            .node_indices()
            .map(|index| {
                let node = &inner[index];
                let group = self.labels.get(index.index()).copied().unwrap_or_default();
                ExportNode {
                    id: node.id.clone(),
                    label: node.label.clone(),
                    role: node.role,
                    color: color_for(node.country.as_deref().unwrap_or("")),
                    country: node.country.clone(),
                    value: node.value,
                    transactions: node.transactions,
                    group,
                    community_name: names.get(&group).map_or_else(|| "No community".to_string(), |n| n.to_string()),
                }
            })
            .collect();

        let edges = inner
            .edge_references()
            .map(|edge| ExportEdge {
                source: inner[edge.source()].id.clone(),
                target: inner[edge.target()].id.clone(),
                value: edge.weight().value,
                transactions: edge.weight().transactions,
                transaction_ids: edge.weight().transaction_ids.clone(),
            })
            .collect();

        GraphExport {
            nodes,
            edges,
            communities: self
                .communities
                .iter()
                .map(|c| CommunityLabel {
                    id: c.id,
                    name: c.name.clone(),
                })
                .collect(),
            community_list: self.communities.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportNode {
    pub id: String,
    pub label: String,
    #[serde(rename = "type")]
    pub role: NodeRole,
    pub country: Option<String>,
    pub color: String,
    pub value: f64,
    pub transactions: usize,
    pub group: usize,
    pub community_name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportEdge {
    pub source: String,
    pub target: String,
    pub value: f64,
    pub transactions: usize,
    pub transaction_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommunityLabel {
    pub id: usize,
    pub name: String,
}

/// Serializable network: `{nodes, edges, communities}` plus community details
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GraphExport {
    pub nodes: Vec<ExportNode>,
    pub edges: Vec<ExportEdge>,
    pub communities: Vec<CommunityLabel>,
    pub community_list: Vec<Community>,
}

impl GraphExport {
    /// Export as JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::*;

    fn create_test_set() -> TransactionSet {
        let mut second = create_test_transaction("T2", &valid_dni(7), 300.0);
        second.sender.document_country = Some("Marruecos".to_string());
        full_set(vec![
            create_test_transaction("T1", "12345678Z", 100.0),
            create_test_transaction("T3", "12345678Z", 50.0),
            second,
        ])
    }

    #[test]
    fn test_edges_collapse_per_pair() {
        let graph = build_graph(&create_test_set(), &GraphFilter::default());

        assert_eq!(graph.node_count(), 3);
        assert_eq!(graph.edge_count(), 2);

        let edge = graph.edge("S_12345678Z", "B_Maria_Garcia_Ruiz_Francia").unwrap();
        assert_eq!(edge.transactions, 2);
        assert_eq!(edge.value, 150.0);
        assert_eq!(edge.transaction_ids, vec!["T1", "T3"]);

        let beneficiary = graph.node("B_Maria_Garcia_Ruiz_Francia").unwrap();
        assert_eq!(beneficiary.role, NodeRole::Beneficiary);
        assert_eq!(beneficiary.value, 450.0);
        assert_eq!(beneficiary.transactions, 3);
        assert_eq!(beneficiary.label, "Maria Garcia Ruiz");
    }

    #[test]
    fn test_sender_country_is_document_country() {
        let graph = build_graph(&create_test_set(), &GraphFilter::default());
        let sender = graph.node(&format!("S_{}", valid_dni(7))).unwrap();
        assert_eq!(sender.country.as_deref(), Some("Marruecos"));
        assert_eq!(sender.document.as_deref(), Some(valid_dni(7).as_str()));
    }

    #[test]
    fn test_identity_normalization() {
        let mut tx = create_test_transaction("T1", "12345678Z", 100.0);
        tx.beneficiary.first_name = Some("José".to_string());
        tx.beneficiary.surname = Some("Pérez-Gil".to_string());
        tx.beneficiary.second_surname = None;
        tx.beneficiary.destination_country = Some("Perú".to_string());
        tx.sender.document_number = None;
        tx.sender.first_name = Some("Ana María".to_string());

        let graph = build_graph(&full_set(vec![tx]), &GraphFilter::default());

        assert!(graph.node("B_José_PérezGil_Perú").is_some());
        assert!(graph.node("S_Ana_María_Perez_Lopez").is_some());
    }

    #[test]
    fn test_anonymous_beneficiaries_stay_distinct() {
        let anonymous = |id: &str| {
            let mut tx = create_test_transaction(id, "12345678Z", 100.0);
            tx.beneficiary = Default::default();
            tx
        };
        let graph = build_graph(&full_set(vec![anonymous("T1"), anonymous("T2")]), &GraphFilter::default());

        assert!(graph.node("B_anon_0").is_some());
        assert!(graph.node("B_anon_1").is_some());
        assert_eq!(graph.node("B_anon_0").unwrap().label, "B_anon_0");
    }

    #[test]
    fn test_filters() {
        let set = create_test_set();

        let by_amount = build_graph(&set, &GraphFilter::default().with_min_amount(100.0));
        assert_eq!(by_amount.summary().transactions, 2);

        let by_document = build_graph(&set, &GraphFilter::default().with_document_countries(["marruecos"]));
        assert_eq!(by_document.summary().transactions, 1);

        let by_destination = build_graph(&set, &GraphFilter::default().with_destinations(["Chile"]));
        assert!(by_destination.is_empty());
    }

    #[test]
    fn test_missing_columns_give_empty_graph() {
        let set = TransactionSet::new(
            vec![create_test_transaction("T1", "12345678Z", 100.0)],
            [Column::TransactionId, Column::Amount],
        );
        let analysis = NetworkAnalysis::build(&set, &GraphFilter::default(), &CommunityConfig::default());
        let export = analysis.export();

        assert!(export.nodes.is_empty());
        assert!(export.edges.is_empty());
        assert!(export.communities.is_empty());
    }

    #[test]
    fn test_summary() {
        let summary = build_graph(&create_test_set(), &GraphFilter::default()).summary();
        assert_eq!(
            summary,
            GraphSummary {
                nodes: 3,
                edges: 2,
                senders: 2,
                beneficiaries: 1,
                transactions: 3,
                total_value: 450.0,
            }
        );
    }

    #[test]
    fn test_export_shape() {
        let analysis = NetworkAnalysis::build(&create_test_set(), &GraphFilter::default(), &CommunityConfig::default());
        let export = analysis.export();

        assert_eq!(export.nodes.len(), 3);
        assert_eq!(export.communities.len(), 1);
        assert!(export.nodes.iter().all(|n| n.group == 0));
        // two of three members are French
        assert_eq!(export.communities[0].name, "Comunidad 0: Francia (3 participantes)");

        let json = export.to_json().unwrap();
        assert!(json.contains("\"type\": \"sender\""));
        assert!(json.contains("\"type\": \"beneficiary\""));
        assert!(json.contains("\"transaction_ids\""));
    }

    #[test]
    fn test_community_lookup() {
        let analysis = NetworkAnalysis::build(&create_test_set(), &GraphFilter::default(), &CommunityConfig::default());
        let community = analysis.community_of("S_12345678Z").unwrap();

        assert!(community.is_valid());
        assert_eq!(community.transactions, 3);
        assert!(analysis.community_of("S_unknown").is_none());
    }

    #[test]
    fn test_rebuild_is_identical() {
        let set = create_test_set();
        let config = CommunityConfig::default();
        let first = NetworkAnalysis::build(&set, &GraphFilter::default(), &config).export();
        let second = NetworkAnalysis::build(&set, &GraphFilter::default(), &config).export();
        assert_eq!(first, second);
    }
}
