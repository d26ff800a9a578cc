use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::dataset::{Dataset, DatasetRef};
use crate::params::DEFAULT_PAGE_SIZE;

/// Query parameters for [`Repo::search`](crate::repo::Repo::search).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchParams {
    pub q: String,
    #[serde(default = "default_limit")]
    pub limit: usize,
    #[serde(default)]
    pub offset: usize,
}

fn default_limit() -> usize {
    DEFAULT_PAGE_SIZE
}

impl SearchParams {
    pub fn new(q: impl Into<String>) -> Self {
        Self {
            q: q.into(),
            limit: DEFAULT_PAGE_SIZE,
            offset: 0,
        }
    }
}

/// A result item whose metadata could not be loaded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SoftFailure {
    #[serde(rename = "ref")]
    pub dataset_ref: DatasetRef,
    pub error: String,
}

/// Search output: every match, plus records of per-item reads that failed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchResults {
    pub refs: Vec<DatasetRef>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<SoftFailure>,
}

/// Splits text into lowercase alphanumeric terms.
pub fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
}

/// Inverted index from terms to the refs that mention them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchIndex {
    terms: BTreeMap<String, BTreeSet<String>>,
    docs: BTreeMap<String, DatasetRef>,
}

impl SearchIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces the entry for `r`, indexing its names and, when
    /// given, its dataset metadata.
    pub fn index(&mut self, r: &DatasetRef, dataset: Option<&Dataset>) {
        let key = r.key();
        self.remove(&key);

        let mut text = format!("{} {}", r.peername, r.name);
        if let Some(ds) = dataset {
            text.push(' ');
            text.push_str(&ds.search_text());
        }
        for term in tokenize(&text) {
            self.terms.entry(term).or_default().insert(key.clone());
        }
        self.docs.insert(key, r.bare());
    }

    pub fn remove(&mut self, key: &str) {
        if self.docs.remove(key).is_none() {
            return;
        }
        self.terms.retain(|_, keys| {
            keys.remove(key);
            !keys.is_empty()
        });
    }

    /// Moves the entry for `old` to `new`, keeping the metadata terms it was
    /// indexed under.
    pub fn rekey(&mut self, old: &DatasetRef, new: &DatasetRef) {
        let old_key = old.key();
        let old_names: BTreeSet<String> = tokenize(&format!("{} {}", old.peername, old.name)).collect();
        let carried: Vec<String> = self
            .terms
            .iter()
            .filter(|(term, keys)| keys.contains(&old_key) && !old_names.contains(*term))
            .map(|(term, _)| term.clone())
            .collect();

        self.remove(&old_key);
        self.index(new, None);
        let new_key = new.key();
        for term in carried {
            self.terms.entry(term).or_default().insert(new_key.clone());
        }
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    /// Refs whose indexed text contains every query term, ordered by key.
    pub fn search(&self, p: &SearchParams) -> Vec<DatasetRef> {
        let terms: Vec<String> = tokenize(&p.q).collect();
        if terms.is_empty() {
            return Vec::new();
        }

        let mut hits: Option<BTreeSet<String>> = None;
        for term in &terms {
            let keys = self.terms.get(term).cloned().unwrap_or_default();
            hits = Some(match hits {
                Some(acc) => acc.intersection(&keys).cloned().collect(),
                None => keys,
            });
        }

        hits.unwrap_or_default()
            .iter()
            .filter_map(|key| self.docs.get(key).cloned())
            .skip(p.offset)
            .take(p.limit)
            .collect()
    }
}
