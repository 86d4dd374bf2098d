//! Entity → Abstract mapping by substring scan over chunk text.
//!
//! The scan is `O(entities × chunks)`; large corpora will want a token index
//! in front of it.

use std::collections::{BTreeMap, BTreeSet};
use tracing::{debug, info};

use super::entity_index::EntityAbstractIndex;
use super::normalize::normalize_entity;
use crate::corpus::Chunk;
use crate::forest::{AbstractForest, PairId};
use crate::{Error, Result};

/// For each entity, the ascending `pair_id`s of the Abstracts whose chunks
/// contain it. Matched nodes get the entity added to `associated_entities`.
/// Entities without any match are left out.
pub fn build_entity_mapping<'a, S: AsRef<str>>(
    entities: &[S],
    chunks: impl IntoIterator<Item = &'a Chunk>,
    group_size: usize,
    forest: &mut AbstractForest,
) -> Result<BTreeMap<String, Vec<PairId>>> {
    if group_size == 0 {
        return Err(Error::InvalidArgument("group_size must be >= 1".to_string()));
    }

    let keys: BTreeSet<String> = entities
        .iter()
        .map(|e| normalize_entity(e.as_ref()))
        .filter(|k| !k.is_empty())
        .collect();

    let lowered: Vec<(PairId, String)> = chunks
        .into_iter()
        .filter_map(|chunk| {
            let pair_id = chunk.id / group_size as u64;
            if forest.contains(pair_id) {
                Some((pair_id, chunk.content.to_lowercase()))
            } else {
                debug!("Chunk {} maps to pair_id {} outside the forest, skipping", chunk.id, pair_id);
                None
            }
        })
        .collect();

    let mut mapping: BTreeMap<String, Vec<PairId>> = BTreeMap::new();
    for key in &keys {
        let matched: BTreeSet<PairId> = lowered
            .iter()
            .filter(|(_, text)| text.contains(key.as_str()))
            .map(|(pair_id, _)| *pair_id)
            .collect();
        if matched.is_empty() {
            continue;
        }
        for pair_id in &matched {
            if let Some(node) = forest.node_mut(*pair_id) {
                node.add_entity(key);
            }
        }
        mapping.insert(key.clone(), matched.into_iter().collect());
    }

    info!(
        "Mapped {} of {} entities onto {} chunks",
        mapping.len(),
        keys.len(),
        lowered.len()
    );
    Ok(mapping)
}

/// Write every mapping entry into `index`. Capacity failures propagate.
pub fn populate_index(
    index: &mut EntityAbstractIndex,
    mapping: &BTreeMap<String, Vec<PairId>>,
) -> Result<()> {
    for (entity, pair_ids) in mapping {
        index.set_addresses(entity, pair_ids)?;
    }
    info!(
        "Entity index holds {} entities (load factor {:.2})",
        index.len(),
        index.load_factor()
    );
    Ok(())
}

/// Map entities onto `forest` and return a populated index sized with `margin`.
pub fn index_forest<'a, S: AsRef<str>>(
    entities: &[S],
    chunks: impl IntoIterator<Item = &'a Chunk>,
    group_size: usize,
    forest: &mut AbstractForest,
    margin: usize,
) -> Result<(EntityAbstractIndex, BTreeMap<String, Vec<PairId>>)> {
    let mapping = build_entity_mapping(entities, chunks, group_size, forest)?;
    let mut index = EntityAbstractIndex::with_expected_entities(entities.len(), margin)?;
    populate_index(&mut index, &mapping)?;
    Ok((index, mapping))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forest::{AbstractTree, AbstractNode, HierarchyStrategy};

    fn forest_of(ids: &[PairId]) -> AbstractForest {
        let nodes: Vec<AbstractNode> = ids
            .iter()
            .map(|&id| AbstractNode::new(id, format!("abstract {}", id), vec![id * 2, id * 2 + 1]))
            .collect();
        let root = ids[0];
        let parents: BTreeMap<PairId, PairId> = ids[1..].iter().map(|&id| (id, root)).collect();
        let tree = AbstractTree::assemble("default", nodes, root, &parents, HierarchyStrategy::Fallback)
            .unwrap();
        AbstractForest::from_trees(vec![tree]).unwrap()
    }

    #[test]
    fn paris_and_france_map_to_first_pair() {
        let chunks = vec![
            Chunk::new(0, "Paris is a city"),
            Chunk::new(1, "France is a country"),
        ];
        let mut forest = forest_of(&[0]);
        let mapping = build_entity_mapping(&["Paris", "France"], &chunks, 2, &mut forest).unwrap();

        assert_eq!(mapping["paris"], vec![0]);
        assert_eq!(mapping["france"], vec![0]);
        let node = forest.node(0).unwrap();
        assert!(node.associated_entities.contains("paris"));
        assert!(node.associated_entities.contains("france"));
    }

    #[test]
    fn addresses_are_sorted_and_unique() {
        let chunks = vec![
            Chunk::new(5, "paris again"),
            Chunk::new(0, "paris"),
            Chunk::new(1, "Paris twice"),
            Chunk::new(3, "no match"),
        ];
        let mut forest = forest_of(&[0, 1, 2]);
        let mapping = build_entity_mapping(&["paris"], &chunks, 2, &mut forest).unwrap();
        assert_eq!(mapping["paris"], vec![0, 2]);
    }

    #[test]
    fn chunks_outside_forest_and_blank_entities_are_skipped() {
        let chunks = vec![Chunk::new(0, "tokyo"), Chunk::new(40, "tokyo")];
        let mut forest = forest_of(&[0]);
        let mapping = build_entity_mapping(&["Tokyo", "  ", "\"\""], &chunks, 2, &mut forest).unwrap();
        assert_eq!(mapping.len(), 1);
        assert_eq!(mapping["tokyo"], vec![0]);
    }

    #[test]
    fn no_entities_gives_empty_mapping() {
        let chunks = vec![Chunk::new(0, "text")];
        let mut forest = forest_of(&[0]);
        let empty: [&str; 0] = [];
        assert!(build_entity_mapping(&empty, &chunks, 2, &mut forest)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn index_forest_populates_lookups() {
        let chunks = vec![Chunk::new(0, "Paris"), Chunk::new(2, "Lyon in France")];
        let mut forest = forest_of(&[0, 1]);
        let (index, mapping) =
            index_forest(&["paris", "france", "berlin"], &chunks, 2, &mut forest, 2).unwrap();
        assert_eq!(mapping.len(), 2);
        assert_eq!(index.get_addresses("France").unwrap(), vec![1]);
        assert!(index.get_addresses("berlin").unwrap().is_empty());
    }
}
