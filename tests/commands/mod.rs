//! End-to-end tests for the CLI subcommands

mod test_build;
mod test_inspect;
mod test_query;

use std::fs;
use std::path::{Path, PathBuf};

/// Write a four-chunk JSONL corpus and a two-entity vocabulary.
pub fn write_inputs(dir: &Path) -> (PathBuf, PathBuf) {
    let chunks = dir.join("chunks.jsonl");
    fs::write(
        &chunks,
        "{\"id\":0,\"content\":\"Europe has many capitals\"}\n\
         {\"id\":1,\"content\":\"Rivers cross the continent\"}\n\
         {\"id\":2,\"content\":\"Paris sits on the Seine\"}\n\
         {\"id\":3,\"content\":\"It is the capital of France\"}\n",
    )
    .unwrap();
    let entities = dir.join("entities.txt");
    fs::write(&entities, "Paris\nFrance\n").unwrap();
    (chunks, entities)
}
