//! `inspect`: tree structure diagnostics for a saved snapshot.

use anyhow::{bail, Context, Result};
use serde::Serialize;
use std::path::Path;

use crate::forest::{AbstractForest, AbstractTree, ForestStats, HierarchyStrategy, PairId};
use crate::snapshot::ForestSnapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
    Yaml,
}

impl OutputFormat {
    pub fn parse(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "text" | "table" => Ok(OutputFormat::Text),
            "json" => Ok(OutputFormat::Json),
            "yaml" | "yml" => Ok(OutputFormat::Yaml),
            other => bail!("unknown output format '{}'", other),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct TreeSummary {
    pub label: String,
    pub root: PairId,
    pub strategy: HierarchyStrategy,
    pub nodes: usize,
    pub depth: usize,
    pub root_children: usize,
}

impl From<&AbstractTree> for TreeSummary {
    fn from(tree: &AbstractTree) -> Self {
        Self {
            label: tree.label().to_string(),
            root: tree.root(),
            strategy: tree.strategy(),
            nodes: tree.len(),
            depth: tree.depth(),
            root_children: tree.children(tree.root()).len(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct NodeDetail {
    pub pair_id: PairId,
    pub tree: String,
    pub context: String,
    pub ancestors: Vec<PairId>,
    pub children: Vec<PairId>,
    pub descendants: usize,
    pub entities: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct InspectReport {
    pub build_id: String,
    pub built_at: String,
    pub source_table: String,
    pub corpus_version: String,
    pub entities: usize,
    pub stats: ForestStats,
    pub trees: Vec<TreeSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node: Option<NodeDetail>,
}

pub fn node_detail(forest: &AbstractForest, pair_id: PairId) -> Option<NodeDetail> {
    let tree = forest.tree_of(pair_id)?;
    let node = tree.get(pair_id)?;
    Some(NodeDetail {
        pair_id,
        tree: tree.label().to_string(),
        context: tree.context_line(pair_id).unwrap_or_default(),
        ancestors: tree.ancestors(pair_id),
        children: tree.children(pair_id).to_vec(),
        descendants: tree.descendants(pair_id).len(),
        entities: node.associated_entities.iter().cloned().collect(),
    })
}

pub fn report(snapshot: &ForestSnapshot, pair_id: Option<PairId>) -> Result<InspectReport> {
    let node = match pair_id {
        Some(id) => Some(
            node_detail(&snapshot.forest, id)
                .with_context(|| format!("pair_id {} is not in the forest", id))?,
        ),
        None => None,
    };

    Ok(InspectReport {
        build_id: snapshot.build_id.to_string(),
        built_at: snapshot.built_at.to_rfc3339(),
        source_table: snapshot.source_table.clone(),
        corpus_version: snapshot.corpus_version.clone(),
        entities: snapshot.entity_map.len(),
        stats: snapshot.forest.stats(),
        trees: snapshot.forest.trees().iter().map(TreeSummary::from).collect(),
        node,
    })
}

pub fn render(report: &InspectReport, format: OutputFormat) -> Result<String> {
    Ok(match format {
        OutputFormat::Json => serde_json::to_string_pretty(report)?,
        OutputFormat::Yaml => serde_yaml::to_string(report)?,
        OutputFormat::Text => render_text(report),
    })
}

fn render_text(report: &InspectReport) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "Snapshot {} ({})\nSource: {} [{}]\n",
        report.build_id, report.built_at, report.source_table, report.corpus_version
    ));
    out.push_str(&format!(
        "Trees: {} | Abstracts: {} | oracle: {} | fallback: {} | max depth: {} | indexed entities: {}\n\n",
        report.stats.trees,
        report.stats.nodes,
        report.stats.oracle_trees,
        report.stats.fallback_trees,
        report.stats.max_depth,
        report.entities
    ));

    out.push_str(&format!(
        "{:<24} {:>8} {:>8} {:>6} {:>10}  {}\n",
        "tree", "root", "nodes", "depth", "fanout", "strategy"
    ));
    for tree in &report.trees {
        out.push_str(&format!(
            "{:<24} {:>8} {:>8} {:>6} {:>10}  {}\n",
            tree.label,
            tree.root,
            tree.nodes,
            tree.depth,
            tree.root_children,
            tree.strategy.as_str()
        ));
    }

    if let Some(node) = &report.node {
        out.push_str(&format!("\nAbstract{} in {}\n", node.pair_id, node.tree));
        out.push_str(&format!("  {}\n", node.context));
        out.push_str(&format!("  descendants: {}\n", node.descendants));
        if !node.entities.is_empty() {
            out.push_str(&format!("  entities: {}\n", node.entities.join(", ")));
        }
    }
    out
}

pub fn run(snapshot: &Path, pair_id: Option<PairId>, format: OutputFormat) -> Result<String> {
    let snapshot = ForestSnapshot::load(snapshot)
        .with_context(|| format!("Failed to load snapshot {}", snapshot.display()))?;
    render(&report(&snapshot, pair_id)?, format)
}
