//! Clusters are connected components of the `similar_to` graph restricted to
//! edges at or above the similarity threshold. They are derived on demand and
//! cached until the store's link generation moves.

use crate::error::Error;
use crate::index::SignatureIndex;
use ahash::AHashMap;
use std::sync::Arc;
use tracing::debug;

/// Disjoint-set forest with path halving and union by size.
pub struct UnionFind {
    parent: Vec<usize>,
    size: Vec<usize>,
}

impl UnionFind {
    pub fn new(n: usize) -> Self {
        Self {
            parent: (0..n).collect(),
            size: vec![1; n],
        }
    }

    pub fn find(&mut self, mut x: usize) -> usize {
        while self.parent[x] != x {
            self.parent[x] = self.parent[self.parent[x]];
            x = self.parent[x];
        }
        x
    }

    pub fn union(&mut self, a: usize, b: usize) {
        let (mut ra, mut rb) = (self.find(a), self.find(b));
        if ra == rb {
            return;
        }
        if self.size[ra] < self.size[rb] {
            std::mem::swap(&mut ra, &mut rb);
        }
        self.parent[rb] = ra;
        self.size[ra] += self.size[rb];
    }
}

/// A snapshot of cluster membership at one link generation.
#[derive(Debug, Default)]
pub struct ClusterView {
    generation: i64,
    /// Record id → cluster id. Singletons are absent.
    cluster_of: AHashMap<String, String>,
}

impl ClusterView {
    /// Build from `(from, to, score)` edges already filtered by threshold.
    pub fn from_edges(generation: i64, edges: &[(String, String, u32)]) -> Self {
        let mut ids: AHashMap<&str, usize> = AHashMap::new();
        let mut names: Vec<&str> = Vec::new();
        for (a, b, _) in edges {
            for id in [a.as_str(), b.as_str()] {
                if !ids.contains_key(id) {
                    ids.insert(id, names.len());
                    names.push(id);
                }
            }
        }

        let mut uf = UnionFind::new(names.len());
        for (a, b, _) in edges {
            if a != b {
                uf.union(ids[a.as_str()], ids[b.as_str()]);
            }
        }

        // Cluster id is the smallest member id.
        let mut smallest: AHashMap<usize, &str> = AHashMap::new();
        let mut members: AHashMap<usize, usize> = AHashMap::new();
        for (i, name) in names.iter().enumerate() {
            let root = uf.find(i);
            *members.entry(root).or_default() += 1;
            smallest
                .entry(root)
                .and_modify(|s| {
                    if *name < *s {
                        *s = *name;
                    }
                })
                .or_insert(*name);
        }

        let mut cluster_of = AHashMap::new();
        for (i, name) in names.iter().enumerate() {
            let root = uf.find(i);
            if members[&root] > 1 {
                cluster_of.insert(name.to_string(), smallest[&root].to_string());
            }
        }

        Self {
            generation,
            cluster_of,
        }
    }

    pub fn generation(&self) -> i64 {
        self.generation
    }

    pub fn cluster_id(&self, record_id: &str) -> Option<&str> {
        self.cluster_of.get(record_id).map(String::as_str)
    }

    /// All clusters as `(cluster_id, sorted members)`, ordered by cluster id.
    pub fn clusters(&self) -> Vec<(String, Vec<String>)> {
        let mut grouped: AHashMap<&str, Vec<String>> = AHashMap::new();
        for (id, cluster) in &self.cluster_of {
            grouped.entry(cluster.as_str()).or_default().push(id.clone());
        }
        let mut clusters: Vec<(String, Vec<String>)> = grouped
            .into_iter()
            .map(|(cluster, mut members)| {
                members.sort();
                (cluster.to_string(), members)
            })
            .collect();
        clusters.sort_by(|a, b| a.0.cmp(&b.0));
        clusters
    }

    /// Assignments for every clustered record, for persisting.
    pub fn assignments(&self) -> Vec<(String, Option<String>)> {
        self.cluster_of
            .iter()
            .map(|(id, cluster)| (id.clone(), Some(cluster.clone())))
            .collect()
    }
}

/// Memoizes the cluster view per link generation.
pub struct ClusterCache {
    threshold: u32,
    cached: Option<Arc<ClusterView>>,
}

impl ClusterCache {
    pub fn new(threshold: u32) -> Self {
        Self {
            threshold,
            cached: None,
        }
    }

    pub fn view(&mut self, index: &dyn SignatureIndex) -> Result<Arc<ClusterView>, Error> {
        let generation = index.link_generation()?;
        if let Some(view) = &self.cached {
            if view.generation() == generation {
                return Ok(Arc::clone(view));
            }
        }

        let edges = index.link_edges(self.threshold)?;
        let view = Arc::new(ClusterView::from_edges(generation, &edges));
        debug!(
            "Rebuilt cluster view at generation {} from {} edges",
            generation,
            edges.len()
        );
        self.cached = Some(Arc::clone(&view));
        Ok(view)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn edge(a: &str, b: &str) -> (String, String, u32) {
        (a.to_string(), b.to_string(), 90)
    }

    #[test]
    fn test_union_find() {
        let mut uf = UnionFind::new(4);
        uf.union(0, 1);
        uf.union(2, 3);
        assert_eq!(uf.find(0), uf.find(1));
        assert_ne!(uf.find(1), uf.find(2));
        uf.union(1, 3);
        assert_eq!(uf.find(0), uf.find(2));
    }

    #[test]
    fn test_transitive_closure() {
        let view = ClusterView::from_edges(1, &[edge("c", "b"), edge("b", "a"), edge("x", "y")]);
        assert_eq!(view.cluster_id("c"), Some("a"));
        assert_eq!(view.cluster_id("a"), Some("a"));
        assert_eq!(view.cluster_id("y"), Some("x"));
        assert_eq!(view.cluster_id("z"), None);
        assert_eq!(
            view.clusters(),
            vec![
                ("a".to_string(), vec!["a".to_string(), "b".to_string(), "c".to_string()]),
                ("x".to_string(), vec!["x".to_string(), "y".to_string()]),
            ]
        );
    }

    #[test]
    fn test_self_edge_is_not_a_cluster() {
        let view = ClusterView::from_edges(1, &[edge("a", "a")]);
        assert_eq!(view.cluster_id("a"), None);
    }
}
