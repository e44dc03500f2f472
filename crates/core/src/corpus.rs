use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::cache::{IndexSource, LoadedIndex, PersistentIndexCache};
use crate::config::EngineOptions;
use crate::context::ContextAssembler;
use crate::graph::{build_graph, Adjacency, GraphSnapshot};
use crate::metrics::{detect_bridges, detect_clusters, extract_topics, pagerank, top_hubs};
use crate::models::{BridgeNode, Document, ImplicitLink};
use crate::traits::IndexStore;
use crate::vector::{spawn_implicit_links, TfIdfIndex};

/// One loaded corpus snapshot and everything derived from it. Replaced
/// wholesale on the next load.
pub struct Corpus {
    documents: Arc<[Document]>,
    graph: GraphSnapshot,
    adjacency: Adjacency,
    index: TfIdfIndex,
    index_source: IndexSource,
    fingerprint: String,
    ranks: BTreeMap<String, f64>,
    clusters: BTreeMap<String, usize>,
    bridges: Vec<BridgeNode>,
    topics: BTreeMap<usize, Vec<String>>,
    options: EngineOptions,
    loaded_at: DateTime<Utc>,
    pending_write: Option<JoinHandle<bool>>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CorpusStats {
    pub documents: usize,
    pub nodes: usize,
    pub links: usize,
    pub phantom_nodes: usize,
    pub image_nodes: usize,
    pub clusters: usize,
    pub bridges: usize,
    pub vocabulary: usize,
    pub index_source: IndexSource,
    pub top_hubs: Vec<String>,
    pub loaded_at: DateTime<Utc>,
}

impl Corpus {
    /// Builds the graph and metrics for `documents` and obtains the index
    /// through `cache` under `key`.
    pub async fn load<S>(
        documents: impl Into<Arc<[Document]>>,
        cache: &PersistentIndexCache<S>,
        key: &str,
        options: EngineOptions,
    ) -> Self
    where
        S: IndexStore + 'static,
    {
        let documents = documents.into();
        let loaded = cache
            .load_or_build(key, Arc::clone(&documents), options.index)
            .await;
        Self::assemble(documents, loaded, options)
    }

    /// Same as [`Corpus::load`] without persistence.
    pub async fn build(documents: impl Into<Arc<[Document]>>, options: EngineOptions) -> Self {
        let documents = documents.into();
        let index = match TfIdfIndex::spawn_build(Arc::clone(&documents), options.index).await {
            Ok(index) => index,
            Err(error) => {
                warn!(%error, "background index build failed, building inline");
                let mut index = TfIdfIndex::new(options.index);
                index.build(&documents);
                index
            }
        };
        let loaded = LoadedIndex {
            index,
            source: IndexSource::Built,
            fingerprint: crate::cache::fingerprint(&documents),
            pending_write: None,
        };
        Self::assemble(documents, loaded, options)
    }

    fn assemble(documents: Arc<[Document]>, loaded: LoadedIndex, options: EngineOptions) -> Self {
        let graph = build_graph(&documents);
        let adjacency = graph.adjacency();
        let ranks = pagerank(&adjacency, &options.graph);
        let clusters = detect_clusters(&adjacency);
        let bridges = detect_bridges(&adjacency, &clusters);
        let topics = extract_topics(&documents, &clusters, options.graph.topic_keywords);

        info!(
            documents = documents.len(),
            nodes = graph.nodes.len(),
            links = graph.links.len(),
            clusters = topics.len(),
            source = ?loaded.source,
            "corpus loaded"
        );

        Self {
            documents,
            graph,
            adjacency,
            index: loaded.index,
            index_source: loaded.source,
            fingerprint: loaded.fingerprint,
            ranks,
            clusters,
            bridges,
            topics,
            options,
            loaded_at: Utc::now(),
            pending_write: loaded.pending_write,
        }
    }

    pub fn documents(&self) -> &[Document] {
        &self.documents
    }

    pub fn graph(&self) -> &GraphSnapshot {
        &self.graph
    }

    pub fn adjacency(&self) -> &Adjacency {
        &self.adjacency
    }

    pub fn index(&self) -> &TfIdfIndex {
        &self.index
    }

    pub fn index_source(&self) -> IndexSource {
        self.index_source
    }

    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    pub fn pagerank(&self) -> &BTreeMap<String, f64> {
        &self.ranks
    }

    pub fn clusters(&self) -> &BTreeMap<String, usize> {
        &self.clusters
    }

    pub fn bridges(&self) -> &[BridgeNode] {
        &self.bridges
    }

    pub fn topics(&self) -> &BTreeMap<usize, Vec<String>> {
        &self.topics
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    pub fn loaded_at(&self) -> DateTime<Utc> {
        self.loaded_at
    }

    pub fn assembler(&self) -> ContextAssembler<'_> {
        ContextAssembler::new(&self.documents, &self.adjacency, self.options.context)
            .with_index(&self.index)
            .with_ranks(&self.ranks)
    }

    /// Mines implicit links on the blocking pool. Repeated calls against the
    /// same graph are served from the index's cache.
    pub async fn implicit_links(&mut self) -> Vec<ImplicitLink> {
        let index = std::mem::take(&mut self.index);
        match spawn_implicit_links(index, self.adjacency.clone()).await {
            Ok((index, links)) => {
                self.index = index;
                links
            }
            Err(error) => {
                warn!(%error, "implicit link mining failed, rebuilding index");
                let mut index = TfIdfIndex::new(self.options.index);
                index.build(&self.documents);
                self.index = index;
                Vec::new()
            }
        }
    }

    /// Waits for the background cache write of a freshly built index.
    /// Returns `false` when there was nothing to write or the write failed.
    pub async fn flush(&mut self) -> bool {
        let Some(pending) = self.pending_write.take() else {
            return false;
        };
        match pending.await {
            Ok(written) => written,
            Err(error) => {
                warn!(%error, "index cache write task failed");
                false
            }
        }
    }

    pub fn stats(&self) -> CorpusStats {
        let phantom_nodes = self
            .graph
            .nodes
            .iter()
            .filter(|node| node.id.starts_with(crate::graph::PHANTOM_PREFIX))
            .count();
        let image_nodes = self.graph.nodes.iter().filter(|node| node.is_image).count();

        CorpusStats {
            documents: self.documents.len(),
            nodes: self.graph.nodes.len(),
            links: self.graph.links.len(),
            phantom_nodes,
            image_nodes,
            clusters: self.clusters.values().max().map_or(0, |last| last + 1),
            bridges: self.bridges.len(),
            vocabulary: self.index.vocabulary_size(),
            index_source: self.index_source,
            top_hubs: top_hubs(&self.ranks, self.options.context.hub_seeds),
            loaded_at: self.loaded_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Section;
    use crate::stores::MemoryIndexStore;

    fn doc(id: &str, body: &str, references: &[&str], raw: &str) -> Document {
        Document {
            id: id.to_string(),
            filename: format!("{id}.md"),
            speaker: "art_director".to_string(),
            tags: Vec::new(),
            sections: vec![Section {
                id: format!("{id}_s1"),
                heading: String::new(),
                body: body.to_string(),
                references: references.iter().map(|r| r.to_string()).collect(),
            }],
            raw_content: raw.to_string(),
            mtime: 1,
        }
    }

    fn documents() -> Vec<Document> {
        vec![
            doc("alpha", "ferry timetable harbor", &["beta", "missing note"], "![[dock.png]]"),
            doc("beta", "harbor crane schedule", &[], ""),
            doc("gamma", "ferry timetable harbor", &[], ""),
        ]
    }

    #[tokio::test]
    async fn load_derives_graph_metrics_and_index() {
        let cache = PersistentIndexCache::new(MemoryIndexStore::new());
        let mut corpus = Corpus::load(documents(), &cache, "/vault", EngineOptions::default()).await;

        assert_eq!(corpus.index_source(), IndexSource::Built);
        assert_eq!(corpus.fingerprint(), "alpha:1|beta:1|gamma:1");
        assert_eq!(corpus.index().len(), 3);
        assert!(corpus.adjacency().contains_edge("alpha", "beta"));
        assert_eq!(corpus.clusters()["alpha"], 0);
        assert!(corpus.pagerank().values().any(|rank| *rank == 1.0));

        let stats = corpus.stats();
        assert_eq!(stats.documents, 3);
        assert_eq!(stats.phantom_nodes, 1);
        assert_eq!(stats.image_nodes, 1);
        assert_eq!(stats.top_hubs[0], "alpha");

        assert!(corpus.flush().await);
        assert!(!corpus.flush().await);

        let again = Corpus::load(documents(), &cache, "/vault", EngineOptions::default()).await;
        assert_eq!(again.index_source(), IndexSource::Restored);
    }

    #[tokio::test]
    async fn implicit_links_find_unlinked_twins() {
        let mut corpus = Corpus::build(documents(), EngineOptions::default()).await;
        let links = corpus.implicit_links().await;

        assert!(links
            .iter()
            .any(|link| link.doc_a_id == "alpha" && link.doc_b_id == "gamma"));
        assert!(links
            .iter()
            .all(|link| !(link.doc_a_id == "alpha" && link.doc_b_id == "beta")));
        assert_eq!(corpus.index().len(), 3);
        assert_eq!(links, corpus.implicit_links().await);
    }

    #[tokio::test]
    async fn assembler_answers_from_the_snapshot() {
        let corpus = Corpus::build(documents(), EngineOptions::default()).await;
        let results = corpus.assembler().search("crane", 5);
        assert_eq!(results[0].doc_id, "beta");
    }
}
