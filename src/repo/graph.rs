use std::collections::BTreeMap;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::cafs::ContentStore;
use crate::dataset::{Dataset, DatasetRef};
use crate::repo::persistence::DATASET_ARTIFACT;
use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkKind {
    Previous,
    DerivedFrom,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Link {
    pub to: String,
    pub kind: LinkKind,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphNode {
    pub path: String,
    pub links: Vec<Link>,
}

/// Dataset path to node.
pub type DatasetGraph = BTreeMap<String, GraphNode>;

/// Walks every ref's version chain, recording previous-version and
/// derived-from edges.
pub(crate) async fn build(refs: &[DatasetRef], store: &dyn ContentStore) -> Result<DatasetGraph> {
    let mut graph = DatasetGraph::new();
    for r in refs {
        let mut next = r.path.clone();
        while !next.is_empty() && !graph.contains_key(&next) {
            let data = store.get(&next).await?;
            let ds: Dataset = serde_json::from_slice(&data).map_err(|source| Error::Corrupt {
                artifact: DATASET_ARTIFACT,
                source,
            })?;

            let mut node = GraphNode {
                path: next.clone(),
                links: Vec::new(),
            };
            if !ds.previous_path.is_empty() {
                node.links.push(Link {
                    to: ds.previous_path.clone(),
                    kind: LinkKind::Previous,
                });
            }
            for src in &ds.derived_from {
                node.links.push(Link {
                    to: src.clone(),
                    kind: LinkKind::DerivedFrom,
                });
            }
            graph.insert(next, node);
            next = ds.previous_path;
        }
    }
    Ok(graph)
}

/// Compute-once cell for the dataset graph.
///
/// The first caller computes while holding the lock; callers arriving during
/// that computation wait and receive the same result.
#[derive(Default)]
pub struct GraphCache {
    cell: Mutex<Option<Arc<DatasetGraph>>>,
    computations: AtomicUsize,
}

impl GraphCache {
    pub async fn get_or_compute<F, Fut>(&self, compute: F) -> Result<Arc<DatasetGraph>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<DatasetGraph>>,
    {
        let mut cell = self.cell.lock().await;
        if let Some(graph) = cell.as_ref() {
            return Ok(graph.clone());
        }
        self.computations.fetch_add(1, Ordering::SeqCst);
        let graph = Arc::new(compute().await?);
        *cell = Some(graph.clone());
        Ok(graph)
    }

    /// Forgets the cached graph so the next caller recomputes it.
    pub async fn invalidate(&self) {
        *self.cell.lock().await = None;
    }

    /// How many times the graph has been computed.
    pub fn computations(&self) -> usize {
        self.computations.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cafs::MapStore;

    async fn put(store: &MapStore, ds: &Dataset) -> String {
        store.put(serde_json::to_vec(ds).unwrap()).await.unwrap()
    }

    #[tokio::test]
    async fn test_build_follows_versions() {
        let store = MapStore::new();
        let source = put(&store, &Dataset { title: "src".into(), ..Default::default() }).await;
        let v1 = put(&store, &Dataset { title: "v1".into(), ..Default::default() }).await;
        let v2 = put(
            &store,
            &Dataset {
                title: "v2".into(),
                previous_path: v1.clone(),
                derived_from: vec![source.clone()],
                ..Default::default()
            },
        )
        .await;

        let refs = vec![DatasetRef::new("alice", "trees").with_path(v2.clone())];
        let graph = build(&refs, &store).await.unwrap();
        assert_eq!(graph.len(), 2);
        let node = &graph[&v2];
        assert_eq!(node.links.len(), 2);
        assert_eq!(node.links[0], Link { to: v1.clone(), kind: LinkKind::Previous });
        assert_eq!(node.links[1].kind, LinkKind::DerivedFrom);
        assert!(graph[&v1].links.is_empty());
    }

    #[tokio::test]
    async fn test_cache_computes_once() {
        let cache = Arc::new(GraphCache::default());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = cache.clone();
            handles.push(tokio::spawn(async move {
                cache
                    .get_or_compute(|| async {
                        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
                        Ok(DatasetGraph::new())
                    })
                    .await
                    .unwrap()
            }));
        }
        let graphs = futures::future::join_all(handles).await;
        let first = graphs[0].as_ref().unwrap().clone();
        for g in &graphs {
            assert!(Arc::ptr_eq(&first, g.as_ref().unwrap()));
        }
        assert_eq!(cache.computations(), 1);

        cache.invalidate().await;
        cache.get_or_compute(|| async { Ok(DatasetGraph::new()) }).await.unwrap();
        assert_eq!(cache.computations(), 2);
    }
}
