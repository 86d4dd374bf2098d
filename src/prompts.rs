//! Prompt templates for the LLM-assisted steps.
//!
//! Templates live in `prompts/` at the project root. When a file is missing
//! the built-in template is used, so offline builds never depend on it.
//! Placeholders are written as `{name}` and filled by [`render`].

use std::path::PathBuf;

use crate::{Error, Result};

/// Available prompts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Prompt {
    /// Ask for a child -> parent line for every Abstract of one tree.
    HierarchyAssignment,
    /// Summarize a batch of chunk groups into Abstracts.
    AbstractSummary,
    /// Final question answering over retrieved context.
    Answer,
}

const HIERARCHY_ASSIGNMENT: &str = "\
Analyze the hierarchical relationships between all of the following abstracts and build a meaningful hierarchy.

These are all {count} abstracts from the same document. Consider the semantic relationships between them from a global perspective.

All abstracts:
{abstracts}

Assign a parent (Abstract ID) to every abstract. If an abstract should be the root, assign it to \"root\".
Return one line per abstract, formatted as \"Abstract{id} -> Abstract{parent_id}\" or \"Abstract{id} -> root\".
Rules:
- There must be exactly one root node (assigned to \"root\")
- Every other abstract must have exactly one parent
- Build the hierarchy from semantic relationships, not from simple ordering

Result:";

const ABSTRACT_SUMMARY: &str = "\
Summarize each of the following text groups in a few sentences. Keep names, places and numbers.

{groups}

Return one line per group, formatted as \"Group{id}: <summary>\".";

const ANSWER: &str = "You are a helpful assistant. Answer concisely using only the provided information.";

impl Prompt {
    /// Prompt file name (Markdown).
    pub fn filename(&self) -> &'static str {
        match self {
            Prompt::HierarchyAssignment => "hierarchy_assignment.md",
            Prompt::AbstractSummary => "abstract_summary.md",
            Prompt::Answer => "answer.md",
        }
    }

    /// Built-in template used when no prompt file is present.
    pub fn builtin(&self) -> &'static str {
        match self {
            Prompt::HierarchyAssignment => HIERARCHY_ASSIGNMENT,
            Prompt::AbstractSummary => ABSTRACT_SUMMARY,
            Prompt::Answer => ANSWER,
        }
    }

    /// Load prompt from file.
    pub fn load(&self) -> Result<String> {
        load_prompt(self.filename())
    }

    /// Load prompt from file, falling back to the built-in template.
    pub fn load_or_builtin(&self) -> String {
        self.load()
            .ok()
            .filter(|text| !text.trim().is_empty())
            .unwrap_or_else(|| self.builtin().to_string())
    }
}

/// Load a prompt by file name.
pub fn load_prompt(filename: &str) -> Result<String> {
    let path = prompts_dir().join(filename);
    std::fs::read_to_string(&path)
        .map_err(|e| Error::InvalidArgument(format!("Failed to load prompt {}: {}", filename, e)))
}

/// Path to the prompts directory.
pub fn prompts_dir() -> PathBuf {
    let candidates = [
        PathBuf::from("prompts"),
        PathBuf::from("../prompts"),
        PathBuf::from("../../prompts"),
    ];

    for path in candidates {
        if path.exists() {
            return path;
        }
    }

    PathBuf::from("prompts")
}

/// Replace `{name}` placeholders. Unknown placeholders are left as-is so the
/// literal `Abstract{id}` format hints survive rendering.
pub fn render(template: &str, vars: &[(&str, &str)]) -> String {
    let mut out = template.to_string();
    for (name, value) in vars {
        out = out.replace(&format!("{{{}}}", name), value);
    }
    out
}

pub fn list_prompts() -> Vec<Prompt> {
    vec![Prompt::HierarchyAssignment, Prompt::AbstractSummary, Prompt::Answer]
}
