//! Final prompt assembly for the answering model.

use super::budget::truncate_to_tokens;
use super::retriever::{HierarchicalContext, RetrievalMode};
use crate::analysis::{SearchHit, SearchRecord};

const INSTRUCTION: &str = "Answer the question using the provided information.";

/// Prompt with its two context sections already cut to budget.
#[derive(Debug, Clone, PartialEq)]
pub struct AugmentedPrompt {
    pub mode: RetrievalMode,
    pub information: String,
    pub abstracts: String,
    pub query: String,
}

impl AugmentedPrompt {
    /// `direct_chunks` feed the Information section. The Abstracts section is
    /// present only when `hierarchical` is non-empty.
    pub fn build(
        query: &str,
        direct_chunks: &[String],
        hierarchical: Option<&HierarchicalContext>,
        section_budget: usize,
    ) -> Self {
        let information = truncate_to_tokens(&direct_chunks.join("\n"), section_budget).to_string();
        let abstracts = hierarchical
            .map(|ctx| truncate_to_tokens(&ctx.text, section_budget).to_string())
            .unwrap_or_default();
        let mode = if abstracts.is_empty() {
            RetrievalMode::Baseline
        } else {
            RetrievalMode::EntityIndexed
        };

        Self {
            mode,
            information,
            abstracts,
            query: query.to_string(),
        }
    }

    pub fn render(&self) -> String {
        if self.abstracts.is_empty() {
            format!(
                "{INSTRUCTION}\n\nInformation:\n{}\n\nQuestion: \n{}",
                self.information, self.query
            )
        } else {
            format!(
                "{INSTRUCTION}\n\nInformation:\n{}\n\nAbstracts:\n{}\n\nQuestion: \n{}",
                self.information, self.abstracts, self.query
            )
        }
    }
}

/// Text of raw-chunk hits, in rank order. Abstract hits are left to the
/// hierarchical section.
pub fn direct_chunks(hits: &[SearchHit]) -> Vec<String> {
    hits.iter()
        .filter_map(|hit| match &hit.record {
            SearchRecord::RawChunk { content, .. } => Some(content.clone()),
            SearchRecord::Abstract { .. } => None,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn baseline_prompt_has_no_abstracts() {
        let prompt = AugmentedPrompt::build(
            "Where is Paris?",
            &["Paris is in France.".into(), "It is big.".into()],
            None,
            100,
        );
        assert_eq!(prompt.mode, RetrievalMode::Baseline);
        assert_eq!(
            prompt.render(),
            "Answer the question using the provided information.\n\nInformation:\n\
             Paris is in France.\nIt is big.\n\nQuestion: \nWhere is Paris?"
        );
    }

    #[test]
    fn hierarchical_context_adds_section() {
        let ctx = HierarchicalContext {
            blocks: Vec::new(),
            text: "[Entity: paris]\nAbstract (pair_id=0): x".into(),
            truncated: false,
        };
        let prompt = AugmentedPrompt::build("q", &["chunk".into()], Some(&ctx), 100);
        assert_eq!(prompt.mode, RetrievalMode::EntityIndexed);
        assert!(prompt.render().contains("\n\nAbstracts:\n[Entity: paris]"));
    }

    #[test]
    fn empty_hierarchical_context_is_baseline() {
        let ctx = HierarchicalContext::default();
        let prompt = AugmentedPrompt::build("q", &[], Some(&ctx), 100);
        assert_eq!(prompt.mode, RetrievalMode::Baseline);
        assert!(!prompt.render().contains("Abstracts:"));
    }

    #[test]
    fn sections_respect_budget() {
        let long = "x".repeat(100);
        let prompt = AugmentedPrompt::build("q", &[long], None, 2);
        assert_eq!(prompt.information.len(), 8);
    }

    #[test]
    fn only_raw_chunks_are_direct() {
        let hits = vec![
            SearchHit {
                record: SearchRecord::Abstract {
                    pair_id: 0,
                    chunk_ids: vec![0, 1],
                    content: "summary".into(),
                },
                score: 0.9,
            },
            SearchHit {
                record: SearchRecord::RawChunk {
                    chunk_id: 3,
                    content: "raw".into(),
                },
                score: 0.5,
            },
        ];
        assert_eq!(direct_chunks(&hits), vec!["raw"]);
    }
}
