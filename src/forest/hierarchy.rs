//! Parent assignment for the Abstracts of one partition.
//!
//! The oracle (an LLM) is asked once per partition for `AbstractX -> AbstractY`
//! lines. Its answer is untrusted: it is parsed strictly, checked for
//! structural problems, and only applied when it forms a valid tree.
//! Everything else falls back to a deterministic layout.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::future::Future;
use tracing::{debug, info, warn};

use super::node::{AbstractNode, AbstractRecord, PairId};
use super::tree::{AbstractTree, HierarchyStrategy};
use crate::config::LlmConfig;
use crate::integrations::{ChatMessage, OpenAIClient};
use crate::prompts::{render, Prompt};
use crate::{metrics, Error, Result};

static ASSIGNMENT_LINE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^Abstract(\d+)\s*->\s*(?:Abstract(\d+)|root)").expect("valid assignment regex")
});

const ORACLE_MAX_TOKENS: u32 = 8000;

/// Characters of content shown per Abstract, shrinking as the partition grows.
pub fn preview_limit(node_count: usize) -> usize {
    if node_count > 1000 {
        200
    } else if node_count > 500 {
        300
    } else {
        400
    }
}

/// Cut `content` to `limit` chars, marking the cut with `...`.
pub fn preview(content: &str, limit: usize) -> String {
    if content.chars().count() > limit {
        let mut cut: String = content.chars().take(limit).collect();
        cut.push_str("...");
        cut
    } else {
        content.to_string()
    }
}

/// Render the single assignment request for a partition.
pub fn hierarchy_prompt(records: &[AbstractRecord]) -> String {
    let mut sorted: Vec<&AbstractRecord> = records.iter().collect();
    sorted.sort_by_key(|r| r.pair_id);

    let limit = preview_limit(sorted.len());
    let listing = sorted
        .iter()
        .map(|r| format!("Abstract{}: {}", r.pair_id, preview(&r.content, limit)))
        .collect::<Vec<_>>()
        .join("\n");

    render(
        &Prompt::HierarchyAssignment.load_or_builtin(),
        &[("count", &sorted.len().to_string()), ("abstracts", &listing)],
    )
}

/// Right-hand side of an assignment line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParentRef {
    Root,
    Abstract(PairId),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AssignmentLine {
    pub child: PairId,
    pub parent: ParentRef,
}

/// Every syntactically valid line of an oracle response, in order.
pub fn parse_assignments(response: &str) -> Vec<AssignmentLine> {
    response
        .lines()
        .filter_map(|line| {
            let caps = ASSIGNMENT_LINE.captures(line.trim())?;
            let child = caps.get(1)?.as_str().parse().ok()?;
            let parent = match caps.get(2) {
                Some(m) => ParentRef::Abstract(m.as_str().parse().ok()?),
                None => ParentRef::Root,
            };
            Some(AssignmentLine { child, parent })
        })
        .collect()
}

/// A complete, structurally valid parent assignment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assignments {
    pub root: PairId,
    /// `child -> parent` for every non-root node.
    pub parents: BTreeMap<PairId, PairId>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvalidReason {
    Empty,
    TwoParents {
        child: PairId,
        first: ParentRef,
        second: ParentRef,
    },
    Unassigned(Vec<PairId>),
    NoRoot,
    Cycle(PairId),
    Disconnected(PairId),
}

impl fmt::Display for InvalidReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvalidReason::Empty => write!(f, "no assignment lines"),
            InvalidReason::TwoParents {
                child,
                first,
                second,
            } => write!(f, "Abstract{} assigned twice ({:?} and {:?})", child, first, second),
            InvalidReason::Unassigned(ids) => {
                write!(f, "{} Abstracts without assignment", ids.len())
            }
            InvalidReason::NoRoot => write!(f, "no root assignment"),
            InvalidReason::Cycle(id) => write!(f, "cycle through Abstract{}", id),
            InvalidReason::Disconnected(id) => write!(f, "Abstract{} cannot reach the root", id),
        }
    }
}

/// Outcome of checking an oracle response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HierarchyResult {
    Valid(Assignments),
    Invalid(InvalidReason),
}

/// Check an oracle response against the partition's ids.
///
/// Lines for unknown children are ignored. A parent outside the partition
/// counts as `root`. The first root wins and later roots hang under it.
pub fn evaluate(ids: &BTreeSet<PairId>, response: &str) -> HierarchyResult {
    let lines: Vec<AssignmentLine> = parse_assignments(response)
        .into_iter()
        .filter(|line| ids.contains(&line.child))
        .collect();
    if lines.is_empty() {
        return HierarchyResult::Invalid(InvalidReason::Empty);
    }

    let mut declared: BTreeMap<PairId, ParentRef> = BTreeMap::new();
    let mut root = None;
    for line in lines {
        let parent = match line.parent {
            ParentRef::Abstract(p) if ids.contains(&p) => ParentRef::Abstract(p),
            _ => ParentRef::Root,
        };
        match declared.get(&line.child) {
            Some(&first) if first != parent => {
                return HierarchyResult::Invalid(InvalidReason::TwoParents {
                    child: line.child,
                    first,
                    second: parent,
                });
            }
            Some(_) => {}
            None => {
                declared.insert(line.child, parent);
                if parent == ParentRef::Root && root.is_none() {
                    root = Some(line.child);
                }
            }
        }
    }

    let unassigned: Vec<PairId> = ids
        .iter()
        .copied()
        .filter(|id| !declared.contains_key(id))
        .collect();
    if !unassigned.is_empty() {
        return HierarchyResult::Invalid(InvalidReason::Unassigned(unassigned));
    }

    let Some(root) = root else {
        return HierarchyResult::Invalid(InvalidReason::NoRoot);
    };

    let parents: BTreeMap<PairId, PairId> = declared
        .into_iter()
        .filter(|(child, _)| *child != root)
        .map(|(child, parent)| match parent {
            ParentRef::Root => (child, root),
            ParentRef::Abstract(p) => (child, p),
        })
        .collect();

    if let Some(reason) = structural_problem(root, &parents) {
        return HierarchyResult::Invalid(reason);
    }

    HierarchyResult::Valid(Assignments { root, parents })
}

/// Every node must reach `root` by following parents.
fn structural_problem(root: PairId, parents: &BTreeMap<PairId, PairId>) -> Option<InvalidReason> {
    if parents.contains_key(&root) {
        return Some(InvalidReason::Cycle(root));
    }

    let bound = parents.len() + 1;
    let mut stuck = Vec::new();
    for &start in parents.keys() {
        let mut current = start;
        let mut steps = 0;
        while current != root && steps <= bound {
            match parents.get(&current) {
                Some(&p) => current = p,
                None => break,
            }
            steps += 1;
        }
        if current != root {
            stuck.push(start);
        }
    }

    let first = *stuck.first()?;
    let on_cycle = stuck.iter().copied().find(|&id| {
        let mut current = parents.get(&id).copied();
        for _ in 0..bound {
            match current {
                Some(p) if p == id => return true,
                Some(p) => current = parents.get(&p).copied(),
                None => return false,
            }
        }
        false
    });
    Some(match on_cycle {
        Some(id) => InvalidReason::Cycle(id),
        None => InvalidReason::Disconnected(first),
    })
}

/// Deterministic layout: smallest id is root, the rest are cut into batches
/// of `sibling_group_size`. Batch 0 hangs under the root, batch k under the
/// first member of batch k-1.
pub fn fallback_assignments(ids: &BTreeSet<PairId>, sibling_group_size: usize) -> Option<Assignments> {
    let mut sorted = ids.iter().copied();
    let root = sorted.next()?;
    let rest: Vec<PairId> = sorted.collect();
    let size = sibling_group_size.max(1);

    let mut parents = BTreeMap::new();
    for (k, batch) in rest.chunks(size).enumerate() {
        let parent = if k == 0 { root } else { rest[(k - 1) * size] };
        for &child in batch {
            parents.insert(child, parent);
        }
    }

    Some(Assignments { root, parents })
}

/// External service proposing parent assignments.
pub trait HierarchyOracle: Send + Sync {
    /// Return the raw line-oriented assignment text for `prompt`.
    fn assign(&self, prompt: &str) -> impl Future<Output = Result<String>> + Send;

    fn name(&self) -> &'static str;
}

/// Oracle backed by an OpenAI-compatible chat model.
///
/// Without credentials every request fails, which routes each tree to the
/// deterministic fallback.
#[derive(Debug, Clone)]
pub struct LlmHierarchyOracle {
    client: Option<OpenAIClient>,
    model: String,
}

impl LlmHierarchyOracle {
    pub fn new(client: OpenAIClient, model: impl Into<String>) -> Self {
        Self {
            client: Some(client),
            model: model.into(),
        }
    }

    pub fn from_config(config: &LlmConfig) -> Self {
        let client = if config.has_credentials() {
            match OpenAIClient::from_config(config) {
                Ok(client) => Some(client),
                Err(err) => {
                    warn!("Hierarchy oracle disabled: {}", err);
                    None
                }
            }
        } else {
            None
        };
        Self {
            client,
            model: config.model.clone(),
        }
    }

    /// Oracle that always fails, forcing the fallback layout.
    pub fn offline() -> Self {
        Self {
            client: None,
            model: String::new(),
        }
    }

    pub fn is_online(&self) -> bool {
        self.client.is_some()
    }
}

impl HierarchyOracle for LlmHierarchyOracle {
    async fn assign(&self, prompt: &str) -> Result<String> {
        let client = self
            .client
            .as_ref()
            .ok_or_else(|| Error::Oracle("no API key configured".to_string()))?;
        client
            .chat_completion(
                vec![ChatMessage::user(prompt)],
                &self.model,
                0.0,
                ORACLE_MAX_TOKENS,
            )
            .await
    }

    fn name(&self) -> &'static str {
        "llm"
    }
}

/// Build one tree, asking the oracle first and falling back on any problem.
pub async fn build_tree<O: HierarchyOracle>(
    label: &str,
    records: Vec<AbstractRecord>,
    oracle: &O,
    sibling_group_size: usize,
) -> Result<AbstractTree> {
    let ids: BTreeSet<PairId> = records.iter().map(|r| r.pair_id).collect();
    if ids.is_empty() {
        return Err(Error::TreeBuild {
            label: label.to_string(),
            reason: "partition has no Abstracts".to_string(),
        });
    }

    let from_oracle = if ids.len() == 1 {
        None
    } else {
        match oracle.assign(&hierarchy_prompt(&records)).await {
            Ok(response) => match evaluate(&ids, &response) {
                HierarchyResult::Valid(assignments) => Some(assignments),
                HierarchyResult::Invalid(reason) => {
                    warn!(tree = label, oracle = oracle.name(), "Rejected hierarchy: {}", reason);
                    None
                }
            },
            Err(err) => {
                warn!(tree = label, oracle = oracle.name(), "Hierarchy oracle failed: {}", err);
                None
            }
        }
    };

    if let Some(assignments) = from_oracle {
        let nodes = records.iter().map(AbstractNode::from);
        match AbstractTree::assemble(
            label,
            nodes,
            assignments.root,
            &assignments.parents,
            HierarchyStrategy::Oracle,
        ) {
            Ok(tree) => {
                info!(tree = label, nodes = tree.len(), "Built tree from oracle hierarchy");
                metrics::record_tree_build(HierarchyStrategy::Oracle);
                return Ok(tree);
            }
            Err(violation) => {
                warn!(tree = label, "Oracle hierarchy failed validation: {}", violation);
            }
        }
    }

    let assignments = fallback_assignments(&ids, sibling_group_size).ok_or_else(|| Error::TreeBuild {
        label: label.to_string(),
        reason: "partition has no Abstracts".to_string(),
    })?;
    let tree = AbstractTree::assemble(
        label,
        records.into_iter().map(AbstractNode::from),
        assignments.root,
        &assignments.parents,
        HierarchyStrategy::Fallback,
    )
    .map_err(|violation| Error::TreeBuild {
        label: label.to_string(),
        reason: violation.to_string(),
    })?;

    debug!(tree = label, nodes = tree.len(), "Built tree with fallback hierarchy");
    metrics::record_tree_build(HierarchyStrategy::Fallback);
    Ok(tree)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct ScriptedOracle {
        response: Result<String>,
        calls: AtomicUsize,
    }

    impl ScriptedOracle {
        fn replying(text: &str) -> Self {
            Self {
                response: Ok(text.to_string()),
                calls: AtomicUsize::new(0),
            }
        }

        fn failing() -> Self {
            Self {
                response: Err(Error::Oracle("unreachable".into())),
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl HierarchyOracle for ScriptedOracle {
        async fn assign(&self, _prompt: &str) -> Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.response {
                Ok(text) => Ok(text.clone()),
                Err(err) => Err(Error::Oracle(err.to_string())),
            }
        }

        fn name(&self) -> &'static str {
            "scripted"
        }
    }

    fn ids(list: &[PairId]) -> BTreeSet<PairId> {
        list.iter().copied().collect()
    }

    fn records(list: &[PairId]) -> Vec<AbstractRecord> {
        list.iter()
            .map(|&id| AbstractRecord::new(id, format!("summary {}", id), vec![id * 2, id * 2 + 1]))
            .collect()
    }

    #[test]
    fn preview_limit_shrinks_with_size() {
        assert_eq!(preview_limit(10), 400);
        assert_eq!(preview_limit(500), 400);
        assert_eq!(preview_limit(501), 300);
        assert_eq!(preview_limit(1001), 200);
    }

    #[test]
    fn preview_cuts_on_char_boundary() {
        assert_eq!(preview("short", 10), "short");
        assert_eq!(preview("ééééé", 3), "ééé...");
    }

    #[test]
    fn prompt_lists_every_abstract_sorted() {
        let prompt = hierarchy_prompt(&records(&[5, 1, 3]));
        let first = prompt.find("Abstract1: summary 1").unwrap();
        let last = prompt.find("Abstract5: summary 5").unwrap();
        assert!(first < last);
        assert!(prompt.contains("3 abstracts"));
    }

    #[test]
    fn parse_ignores_noise() {
        let parsed = parse_assignments(
            "Here you go:\n  Abstract1 -> root\nAbstract2->Abstract1\nabstract3 -> root\nAbstractX -> root",
        );
        assert_eq!(
            parsed,
            vec![
                AssignmentLine {
                    child: 1,
                    parent: ParentRef::Root
                },
                AssignmentLine {
                    child: 2,
                    parent: ParentRef::Abstract(1)
                },
            ]
        );
    }

    #[test]
    fn well_formed_response_is_valid() {
        let result = evaluate(
            &ids(&[0, 1, 2]),
            "Abstract0 -> root\nAbstract1 -> Abstract0\nAbstract2 -> Abstract1",
        );
        let HierarchyResult::Valid(assignments) = result else {
            panic!("expected valid result");
        };
        assert_eq!(assignments.root, 0);
        assert_eq!(assignments.parents.get(&2), Some(&1));
    }

    #[test]
    fn later_roots_collapse_under_first() {
        let result = evaluate(
            &ids(&[0, 1, 2]),
            "Abstract1 -> root\nAbstract0 -> root\nAbstract2 -> Abstract1",
        );
        let HierarchyResult::Valid(assignments) = result else {
            panic!("expected valid result");
        };
        assert_eq!(assignments.root, 1);
        assert_eq!(assignments.parents.get(&0), Some(&1));
    }

    #[test]
    fn parent_outside_partition_counts_as_root() {
        let result = evaluate(
            &ids(&[4, 5]),
            "Abstract4 -> Abstract99\nAbstract5 -> Abstract4\nAbstract7 -> root",
        );
        let HierarchyResult::Valid(assignments) = result else {
            panic!("expected valid result");
        };
        assert_eq!(assignments.root, 4);
        assert_eq!(assignments.parents.len(), 1);
    }

    #[test]
    fn two_parents_are_invalid() {
        let result = evaluate(
            &ids(&[0, 1, 2]),
            "Abstract0 -> root\nAbstract1 -> Abstract0\nAbstract2 -> Abstract0\nAbstract2 -> Abstract1",
        );
        assert!(matches!(
            result,
            HierarchyResult::Invalid(InvalidReason::TwoParents { child: 2, .. })
        ));
    }

    #[test]
    fn repeated_identical_line_is_fine() {
        let result = evaluate(
            &ids(&[0, 1]),
            "Abstract0 -> root\nAbstract1 -> Abstract0\nAbstract1 -> Abstract0",
        );
        assert!(matches!(result, HierarchyResult::Valid(_)));
    }

    #[test]
    fn unassigned_nodes_are_invalid() {
        let result = evaluate(&ids(&[0, 1, 2]), "Abstract0 -> root\nAbstract1 -> Abstract0");
        assert_eq!(
            result,
            HierarchyResult::Invalid(InvalidReason::Unassigned(vec![2]))
        );
    }

    #[test]
    fn missing_root_is_invalid() {
        let result = evaluate(&ids(&[0, 1]), "Abstract0 -> Abstract1\nAbstract1 -> Abstract0");
        assert_eq!(result, HierarchyResult::Invalid(InvalidReason::NoRoot));
    }

    #[test]
    fn cycle_is_invalid() {
        let result = evaluate(
            &ids(&[0, 1, 2, 3]),
            "Abstract0 -> root\nAbstract1 -> Abstract2\nAbstract2 -> Abstract1\nAbstract3 -> Abstract1",
        );
        assert!(matches!(
            result,
            HierarchyResult::Invalid(InvalidReason::Cycle(_))
        ));
    }

    #[test]
    fn empty_response_is_invalid() {
        assert_eq!(
            evaluate(&ids(&[0]), "I cannot help with that."),
            HierarchyResult::Invalid(InvalidReason::Empty)
        );
    }

    #[test]
    fn fallback_over_nine_nodes_has_two_sibling_groups() {
        let assignments = fallback_assignments(&(0..9).collect(), 4).unwrap();
        assert_eq!(assignments.root, 0);
        for child in 1..=4 {
            assert_eq!(assignments.parents[&child], 0);
        }
        for child in 5..=8 {
            assert_eq!(assignments.parents[&child], 1);
        }
        assert_eq!(assignments.parents.len(), 8);
    }

    #[test]
    fn fallback_handles_tiny_partitions() {
        assert!(fallback_assignments(&BTreeSet::new(), 4).is_none());

        let single = fallback_assignments(&ids(&[3]), 4).unwrap();
        assert_eq!(single.root, 3);
        assert!(single.parents.is_empty());

        let pair = fallback_assignments(&ids(&[3, 9]), 4).unwrap();
        assert_eq!(pair.parents.get(&9), Some(&3));
    }

    #[tokio::test]
    async fn build_tree_applies_valid_oracle_answer() {
        let oracle = ScriptedOracle::replying("Abstract2 -> root\nAbstract0 -> Abstract2\nAbstract1 -> Abstract0");
        let tree = build_tree("doc", records(&[0, 1, 2]), &oracle, 4).await.unwrap();

        assert_eq!(tree.strategy(), HierarchyStrategy::Oracle);
        assert_eq!(tree.root(), 2);
        assert_eq!(tree.ancestors(1), vec![0, 2]);
        assert_eq!(oracle.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn build_tree_falls_back_on_oracle_error() {
        let oracle = ScriptedOracle::failing();
        let tree = build_tree("doc", records(&[4, 5, 6]), &oracle, 4).await.unwrap();

        assert_eq!(tree.strategy(), HierarchyStrategy::Fallback);
        assert_eq!(tree.root(), 4);
        assert!(tree.validate().is_ok());
    }

    #[tokio::test]
    async fn build_tree_falls_back_on_invalid_answer() {
        let oracle = ScriptedOracle::replying("Abstract0 -> root\nAbstract1 -> Abstract2\nAbstract2 -> Abstract1");
        let tree = build_tree("doc", records(&[0, 1, 2]), &oracle, 4).await.unwrap();
        assert_eq!(tree.strategy(), HierarchyStrategy::Fallback);
        assert_eq!(tree.children(0), &[1, 2]);
    }

    #[tokio::test]
    async fn single_node_skips_the_oracle() {
        let oracle = ScriptedOracle::failing();
        let tree = build_tree("solo", records(&[8]), &oracle, 4).await.unwrap();
        assert_eq!(tree.root(), 8);
        assert_eq!(oracle.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn empty_partition_is_an_error() {
        let oracle = ScriptedOracle::failing();
        let err = build_tree("none", Vec::new(), &oracle, 4).await.unwrap_err();
        assert!(matches!(err, Error::TreeBuild { .. }));
    }

    #[tokio::test]
    async fn offline_llm_oracle_reports_missing_credentials() {
        let oracle = LlmHierarchyOracle::offline();
        assert!(!oracle.is_online());
        let err = oracle.assign("prompt").await.unwrap_err();
        assert!(matches!(err, Error::Oracle(_)));
    }

    #[tokio::test]
    async fn llm_oracle_round_trip_over_http() {
        use httpmock::prelude::*;
        use serde_json::json;

        let server = MockServer::start_async().await;
        server.mock(|when, then| {
            when.method(POST).path("/chat/completions");
            then.status(200).json_body(json!({
                "choices": [
                    { "message": { "role": "assistant",
                      "content": "Abstract0 -> root\nAbstract1 -> Abstract0" } }
                ]
            }));
        });

        let client = OpenAIClient::new("test_key")
            .unwrap()
            .with_base_url(server.base_url());
        let oracle = LlmHierarchyOracle::new(client, "gpt-4o-mini");
        let tree = build_tree("http", records(&[0, 1]), &oracle, 4).await.unwrap();
        assert_eq!(tree.strategy(), HierarchyStrategy::Oracle);
        assert_eq!(tree.parent(1), Some(0));
    }
}
