//! Query-time entity recognition against a known vocabulary.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use tracing::{debug, info};

use crate::index::normalize_entity;
use crate::{Error, Result};

/// Extracts entity mentions from free text. Returned names are normalized.
pub trait EntityRecognizer: Send + Sync {
    fn recognize(&self, text: &str) -> Vec<String>;
}

fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}

/// Longest-match phrase recognizer.
///
/// Vocabulary entries are compared token by token, so "new york" matches
/// "New-York" and "new  york" but not "newyork".
#[derive(Debug, Clone, Default)]
pub struct VocabularyRecognizer {
    phrases: HashMap<Vec<String>, String>,
    longest: usize,
}

impl VocabularyRecognizer {
    pub fn new<S: AsRef<str>>(vocabulary: &[S]) -> Self {
        let mut phrases = HashMap::new();
        let mut longest = 0;
        for entry in vocabulary {
            let key = normalize_entity(entry.as_ref());
            let tokens = tokenize(&key);
            if tokens.is_empty() {
                continue;
            }
            longest = longest.max(tokens.len());
            phrases.entry(tokens).or_insert(key);
        }
        debug!("Vocabulary recognizer holds {} phrases", phrases.len());
        Self { phrases, longest }
    }

    pub fn len(&self) -> usize {
        self.phrases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.phrases.is_empty()
    }
}

impl EntityRecognizer for VocabularyRecognizer {
    fn recognize(&self, text: &str) -> Vec<String> {
        let tokens = tokenize(text);
        let mut found = Vec::new();
        let mut seen = HashSet::new();

        let mut i = 0;
        while i < tokens.len() {
            let max = self.longest.min(tokens.len() - i);
            let hit = (1..=max)
                .rev()
                .find_map(|n| self.phrases.get(&tokens[i..i + n]).map(|e| (n, e)));
            match hit {
                Some((n, entity)) => {
                    if seen.insert(entity.as_str()) {
                        found.push(entity.clone());
                    }
                    i += n;
                }
                None => i += 1,
            }
        }
        found
    }
}

/// Load a vocabulary: `.csv` files contribute their first two columns,
/// anything else is read one entity per line. Blank entries are dropped and
/// duplicates keep their first position.
pub fn load_vocabulary(path: impl AsRef<Path>) -> Result<Vec<String>> {
    let path = path.as_ref();
    let is_csv = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("csv"))
        .unwrap_or(false);

    let raw: Vec<String> = if is_csv {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_path(path)
            .map_err(|e| Error::InvalidArgument(format!("{}: {}", path.display(), e)))?;
        let mut out = Vec::new();
        for record in reader.records() {
            let record =
                record.map_err(|e| Error::InvalidArgument(format!("{}: {}", path.display(), e)))?;
            out.extend(record.iter().take(2).map(str::to_string));
        }
        out
    } else {
        std::fs::read_to_string(path)?
            .lines()
            .map(str::to_string)
            .collect()
    };

    let mut seen = HashSet::new();
    let entities: Vec<String> = raw
        .into_iter()
        .map(|e| e.trim().to_string())
        .filter(|e| !normalize_entity(e).is_empty())
        .filter(|e| seen.insert(normalize_entity(e)))
        .collect();

    info!("Loaded {} entities from {}", entities.len(), path.display());
    Ok(entities)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn longest_phrase_wins() {
        let recognizer = VocabularyRecognizer::new(&["New York", "York", "Paris"]);
        let found = recognizer.recognize("Flights from New-York to paris, then York.");
        assert_eq!(found, vec!["new york", "paris", "york"]);
    }

    #[test]
    fn repeated_mentions_are_reported_once() {
        let recognizer = VocabularyRecognizer::new(&["\"Paris\"", "France"]);
        let found = recognizer.recognize("Paris, PARIS and France");
        assert_eq!(found, vec!["paris", "france"]);
    }

    #[test]
    fn unknown_text_yields_nothing() {
        let recognizer = VocabularyRecognizer::new(&["Paris"]);
        assert!(recognizer.recognize("What is the capital of Spain?").is_empty());
        assert!(VocabularyRecognizer::default().recognize("Paris").is_empty());
    }

    #[test]
    fn loads_plain_text_vocabulary() {
        let mut file = NamedTempFile::with_suffix(".txt").unwrap();
        writeln!(file, "Paris\n\n  France \nparis").unwrap();
        let entities = load_vocabulary(file.path()).unwrap();
        assert_eq!(entities, vec!["Paris", "France"]);
    }

    #[test]
    fn loads_first_two_csv_columns() {
        let mut file = NamedTempFile::with_suffix(".csv").unwrap();
        writeln!(file, "Paris,France,capital_of\nBerlin,Germany,capital_of\nTokyo").unwrap();
        let entities = load_vocabulary(file.path()).unwrap();
        assert_eq!(entities, vec!["Paris", "France", "Berlin", "Germany", "Tokyo"]);
    }
}
