//! TF-IDF document vectors with cosine search and implicit-link mining.
//!
//! Vectors are sparse ordered maps. The ordering matters: dot products are
//! summed in term order, so an index restored from a snapshot reproduces the
//! source index's scores bit for bit.

use std::collections::{BTreeMap, HashSet};
use std::f64::consts::LN_2;

use serde::{Deserialize, Serialize};
use serde_with::serde_as;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::config::IndexOptions;
use crate::error::CacheError;
use crate::graph::Adjacency;
use crate::models::{canonical_pair, Document, ImplicitLink, VectorHit};
use crate::tokenizer::{tokenize, tokenize_stream};

pub const SCHEMA_VERSION: u32 = 2;

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DocumentVector {
    pub doc_id: String,
    pub filename: String,
    pub speaker: String,
    #[serde_as(as = "Vec<(_, _)>")]
    pub vector: BTreeMap<String, f64>,
    pub norm: f64,
}

/// Persisted form of an index, tagged with the corpus fingerprint it was
/// built from.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct IndexSnapshot {
    pub schema_version: u32,
    pub fingerprint: String,
    #[serde_as(as = "Vec<(_, _)>")]
    pub idf: BTreeMap<String, f64>,
    pub docs: Vec<DocumentVector>,
}

impl IndexSnapshot {
    pub fn decode(blob: &[u8]) -> Result<Self, CacheError> {
        let snapshot: Self = serde_json::from_slice(blob)?;
        if snapshot.schema_version != SCHEMA_VERSION {
            return Err(CacheError::SchemaMismatch {
                expected: SCHEMA_VERSION,
                found: snapshot.schema_version,
            });
        }
        Ok(snapshot)
    }

    pub fn encode(&self) -> Result<Vec<u8>, CacheError> {
        Ok(serde_json::to_vec(self)?)
    }
}

#[derive(Debug, Clone)]
struct ImplicitCache {
    generation: u64,
    top_n: usize,
    threshold_bits: u64,
    links: Vec<ImplicitLink>,
}

#[derive(Debug, Clone, Default)]
pub struct TfIdfIndex {
    options: IndexOptions,
    idf: BTreeMap<String, f64>,
    docs: Vec<DocumentVector>,
    built: bool,
    implicit_cache: Option<ImplicitCache>,
}

impl TfIdfIndex {
    pub fn new(options: IndexOptions) -> Self {
        Self {
            options,
            ..Self::default()
        }
    }

    pub fn options(&self) -> &IndexOptions {
        &self.options
    }

    pub fn is_built(&self) -> bool {
        self.built
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    pub fn vocabulary_size(&self) -> usize {
        self.idf.len()
    }

    pub fn idf(&self, term: &str) -> Option<f64> {
        self.idf.get(term).copied()
    }

    pub fn document_vector(&self, doc_id: &str) -> Option<&DocumentVector> {
        self.docs.iter().find(|doc| doc.doc_id == doc_id)
    }

    /// Replaces the whole index with vectors for `docs`.
    pub fn build(&mut self, docs: &[Document]) {
        self.implicit_cache = None;

        let counted: Vec<(BTreeMap<String, usize>, usize)> = docs
            .iter()
            .map(|doc| {
                let stream = tokenize_stream(&document_text(doc));
                let total = stream.len();
                let mut counts = BTreeMap::new();
                for term in stream {
                    *counts.entry(term).or_insert(0usize) += 1;
                }
                (counts, total)
            })
            .collect();

        let mut document_frequency: BTreeMap<&str, usize> = BTreeMap::new();
        for (counts, _) in &counted {
            for term in counts.keys() {
                *document_frequency.entry(term.as_str()).or_insert(0) += 1;
            }
        }

        let corpus_size = docs.len() as f64;
        let idf: BTreeMap<String, f64> = document_frequency
            .into_iter()
            .map(|(term, df)| (term.to_string(), smoothed_idf(corpus_size, df)))
            .collect();

        let vectors = docs
            .iter()
            .zip(counted)
            .map(|(doc, (counts, total))| {
                let vector: BTreeMap<String, f64> = counts
                    .into_iter()
                    .map(|(term, count)| {
                        let tf = count as f64 / total as f64;
                        let weight = tf * idf.get(&term).copied().unwrap_or(1.0);
                        (term, weight)
                    })
                    .collect();
                let norm = vector.values().map(|w| w * w).sum::<f64>().sqrt();
                DocumentVector {
                    doc_id: doc.id.clone(),
                    filename: doc.filename.clone(),
                    speaker: doc.speaker.clone(),
                    vector,
                    norm,
                }
            })
            .collect();

        self.idf = idf;
        self.docs = vectors;
        self.built = true;

        info!(
            documents = self.docs.len(),
            vocabulary = self.idf.len(),
            "built tf-idf index"
        );
    }

    /// Builds on the blocking pool so the caller's task stays responsive.
    pub fn spawn_build<D>(docs: D, options: IndexOptions) -> JoinHandle<TfIdfIndex>
    where
        D: AsRef<[Document]> + Send + 'static,
    {
        tokio::task::spawn_blocking(move || {
            let mut index = TfIdfIndex::new(options);
            index.build(docs.as_ref());
            index
        })
    }

    pub fn search(&self, query: &str, top_n: usize) -> Vec<VectorHit> {
        if !self.built || self.docs.is_empty() || top_n == 0 {
            return Vec::new();
        }

        let terms = tokenize(query);
        if terms.is_empty() {
            return Vec::new();
        }

        let query_weights: Vec<(&str, f64)> = terms
            .iter()
            .map(|term| (term.as_str(), self.idf(term).unwrap_or(LN_2)))
            .collect();
        let query_norm = query_weights
            .iter()
            .map(|(_, weight)| weight * weight)
            .sum::<f64>()
            .sqrt();

        let mut scored: Vec<(usize, f64)> = self
            .docs
            .iter()
            .enumerate()
            .filter(|(_, doc)| doc.norm > 0.0)
            .filter_map(|(position, doc)| {
                let dot: f64 = query_weights
                    .iter()
                    .filter_map(|(term, weight)| doc.vector.get(*term).map(|w| w * weight))
                    .sum();
                let score = dot / (query_norm * doc.norm);
                (score > self.options.min_score).then_some((position, score))
            })
            .collect();

        scored.sort_by(|left, right| right.1.total_cmp(&left.1));

        scored
            .into_iter()
            .take(top_n)
            .map(|(position, score)| {
                let doc = &self.docs[position];
                VectorHit {
                    doc_id: doc.doc_id.clone(),
                    filename: doc.filename.clone(),
                    speaker: doc.speaker.clone(),
                    score: score.min(1.0),
                }
            })
            .collect()
    }

    /// Cosine similarity of two indexed documents; 0 when either is unknown.
    pub fn similarity(&self, a: &str, b: &str) -> f64 {
        match (self.document_vector(a), self.document_vector(b)) {
            (Some(left), Some(right)) => cosine(left, right),
            _ => 0.0,
        }
    }

    /// Pairs of textually similar documents that are not yet linked.
    ///
    /// Only the first `implicit_max_docs` documents take part. The result is
    /// cached per adjacency generation until the next `build` or `restore`.
    pub fn find_implicit_links(
        &mut self,
        adjacency: &Adjacency,
        top_n: usize,
        threshold: f64,
    ) -> Vec<ImplicitLink> {
        if let Some(cache) = &self.implicit_cache {
            if cache.generation == adjacency.generation()
                && cache.top_n == top_n
                && cache.threshold_bits == threshold.to_bits()
            {
                return cache.links.clone();
            }
        }

        let links = self.mine_implicit_links(adjacency, top_n, threshold);
        self.implicit_cache = Some(ImplicitCache {
            generation: adjacency.generation(),
            top_n,
            threshold_bits: threshold.to_bits(),
            links: links.clone(),
        });
        links
    }

    fn mine_implicit_links(
        &self,
        adjacency: &Adjacency,
        top_n: usize,
        threshold: f64,
    ) -> Vec<ImplicitLink> {
        if !self.built || top_n == 0 {
            return Vec::new();
        }

        let existing: HashSet<(String, String)> = adjacency
            .iter()
            .flat_map(|(id, neighbors)| {
                neighbors
                    .iter()
                    .map(move |neighbor| canonical_pair(id, neighbor))
            })
            .collect();

        let candidates = &self.docs[..self.docs.len().min(self.options.implicit_max_docs)];
        let mut per_doc: Vec<Vec<(usize, f64)>> = vec![Vec::new(); candidates.len()];

        for (i, left) in candidates.iter().enumerate() {
            for (offset, right) in candidates[i + 1..].iter().enumerate() {
                let j = i + 1 + offset;
                if left.doc_id == right.doc_id
                    || existing.contains(&canonical_pair(&left.doc_id, &right.doc_id))
                {
                    continue;
                }
                let similarity = cosine(left, right);
                if similarity >= threshold {
                    per_doc[i].push((j, similarity));
                    per_doc[j].push((i, similarity));
                }
            }
        }

        let mut seen: HashSet<(usize, usize)> = HashSet::new();
        let mut links = Vec::new();
        for (i, partners) in per_doc.iter_mut().enumerate() {
            partners.sort_by(|left, right| right.1.total_cmp(&left.1));
            for &(j, similarity) in partners.iter().take(top_n) {
                let pair = (i.min(j), i.max(j));
                if seen.insert(pair) {
                    links.push(ImplicitLink {
                        doc_a_id: candidates[pair.0].doc_id.clone(),
                        doc_b_id: candidates[pair.1].doc_id.clone(),
                        similarity: similarity.min(1.0),
                    });
                }
            }
        }

        links.sort_by(|left, right| {
            right
                .similarity
                .total_cmp(&left.similarity)
                .then_with(|| left.doc_a_id.cmp(&right.doc_a_id))
                .then_with(|| left.doc_b_id.cmp(&right.doc_b_id))
        });

        debug!(
            scanned = candidates.len(),
            links = links.len(),
            generation = adjacency.generation(),
            "mined implicit links"
        );
        links
    }

    pub fn snapshot(&self, fingerprint: &str) -> IndexSnapshot {
        IndexSnapshot {
            schema_version: SCHEMA_VERSION,
            fingerprint: fingerprint.to_string(),
            idf: self.idf.clone(),
            docs: self.docs.clone(),
        }
    }

    pub fn serialize(&self, fingerprint: &str) -> Result<Vec<u8>, CacheError> {
        self.snapshot(fingerprint).encode()
    }

    pub fn from_snapshot(snapshot: IndexSnapshot, options: IndexOptions) -> Self {
        Self {
            options,
            idf: snapshot.idf,
            docs: snapshot.docs,
            built: true,
            implicit_cache: None,
        }
    }

    /// Loads a serialized index in place and returns the fingerprint it was
    /// tagged with. The current contents are kept when the blob is rejected.
    pub fn restore(&mut self, blob: &[u8]) -> Result<String, CacheError> {
        let snapshot = IndexSnapshot::decode(blob)?;
        let fingerprint = snapshot.fingerprint.clone();
        *self = Self::from_snapshot(snapshot, self.options);
        Ok(fingerprint)
    }
}

/// Moves `index` onto the blocking pool for mining and hands it back with a
/// warm implicit-link cache.
pub fn spawn_implicit_links(
    mut index: TfIdfIndex,
    adjacency: Adjacency,
) -> JoinHandle<(TfIdfIndex, Vec<ImplicitLink>)> {
    tokio::task::spawn_blocking(move || {
        let options = index.options;
        let links = index.find_implicit_links(
            &adjacency,
            options.implicit_top_n,
            options.implicit_threshold,
        );
        (index, links)
    })
}

/// ln((N+1)/(df+1)) + 1: never below 1, finite, falls as df grows.
pub fn smoothed_idf(corpus_size: f64, document_frequency: usize) -> f64 {
    ((corpus_size + 1.0) / (document_frequency as f64 + 1.0)).ln() + 1.0
}

fn document_text(doc: &Document) -> String {
    let mut parts: Vec<&str> = Vec::with_capacity(doc.sections.len() * 2 + doc.tags.len() + 3);
    parts.push(doc.stem());
    parts.extend(doc.tags.iter().map(String::as_str));
    parts.push(&doc.speaker);
    for section in &doc.sections {
        parts.push(&section.heading);
        parts.push(&section.body);
    }
    parts.push(&doc.raw_content);
    parts.join("\n")
}

fn cosine(left: &DocumentVector, right: &DocumentVector) -> f64 {
    if left.norm == 0.0 || right.norm == 0.0 {
        return 0.0;
    }
    let (small, large) = if left.vector.len() <= right.vector.len() {
        (left, right)
    } else {
        (right, left)
    };
    let dot: f64 = small
        .vector
        .iter()
        .filter_map(|(term, weight)| large.vector.get(term).map(|other| weight * other))
        .sum();
    dot / (left.norm * right.norm)
}
