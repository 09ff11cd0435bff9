//! Sequence catalog: validated sequences by name plus keyword bindings.

use rand::Rng;
use rand::seq::SliceRandom;
use relaycast_core::types::SequenceDefinition;
use std::collections::HashMap;
use std::sync::Arc;

/// Immutable set of loaded sequences. Rebuilt between runs, never mutated.
#[derive(Debug, Default, Clone)]
pub struct SequenceCatalog {
    ordered: Vec<Arc<SequenceDefinition>>,
    by_name: HashMap<String, Arc<SequenceDefinition>>,
    /// Normalized keyword → every sequence bound to it.
    keywords: HashMap<String, Vec<Arc<SequenceDefinition>>>,
}

impl SequenceCatalog {
    /// Build from already-validated definitions. Later duplicates of a name
    /// are ignored.
    pub fn new(sequences: Vec<SequenceDefinition>) -> Self {
        let mut catalog = Self::default();
        for seq in sequences {
            if catalog.by_name.contains_key(&seq.name) {
                continue;
            }
            let seq = Arc::new(seq);
            if let Some(keyword) = &seq.keyword {
                catalog
                    .keywords
                    .entry(keyword.clone())
                    .or_default()
                    .push(seq.clone());
            }
            catalog.by_name.insert(seq.name.clone(), seq.clone());
            catalog.ordered.push(seq);
        }
        catalog
    }

    pub fn get(&self, name: &str) -> Option<Arc<SequenceDefinition>> {
        self.by_name.get(name).cloned()
    }

    pub fn len(&self) -> usize {
        self.ordered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ordered.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<SequenceDefinition>> {
        self.ordered.iter()
    }

    pub fn keyword_count(&self) -> usize {
        self.keywords.len()
    }

    /// Keyword bindings in map iteration order. No priority is implied.
    pub fn keywords(&self) -> impl Iterator<Item = (&str, &[Arc<SequenceDefinition>])> {
        self.keywords.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }

    /// Uniform pick over the whole catalog.
    pub fn random<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<Arc<SequenceDefinition>> {
        self.ordered.choose(rng).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use relaycast_core::types::Step;

    fn seq(name: &str, keyword: Option<&str>) -> SequenceDefinition {
        let s = SequenceDefinition::new(name, vec![Step::text(name, 0)]);
        match keyword {
            Some(k) => s.with_keyword(k),
            None => s,
        }
    }

    #[test]
    fn test_keyword_bindings_group_sequences() {
        let catalog = SequenceCatalog::new(vec![
            seq("a", Some("preço")),
            seq("b", Some(" PREÇO ")),
            seq("c", Some("loja")),
            seq("d", None),
        ]);
        assert_eq!(catalog.len(), 4);
        assert_eq!(catalog.keyword_count(), 2);
        let bound: Vec<_> = catalog
            .keywords()
            .find(|(k, _)| *k == "preço")
            .map(|(_, seqs)| seqs.iter().map(|s| s.name.clone()).collect())
            .unwrap();
        assert_eq!(bound, vec!["a", "b"]);
    }

    #[test]
    fn test_duplicate_names_keep_first() {
        let mut second = seq("a", None);
        second.steps = vec![Step::text("other", 0)];
        let catalog = SequenceCatalog::new(vec![seq("a", None), second]);
        assert_eq!(catalog.len(), 1);
        assert_eq!(catalog.get("a").unwrap().steps[0], Step::text("a", 0));
    }

    #[test]
    fn test_random_pick_covers_catalog() {
        let catalog = SequenceCatalog::new(vec![seq("a", None), seq("b", None)]);
        let mut rng = StdRng::seed_from_u64(7);
        let mut seen = std::collections::HashSet::new();
        for _ in 0..64 {
            seen.insert(catalog.random(&mut rng).unwrap().name.clone());
        }
        assert_eq!(seen.len(), 2);
        assert!(SequenceCatalog::default().random(&mut rng).is_none());
    }
}
