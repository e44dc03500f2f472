pub mod cache;
pub mod chunking;
pub mod config;
pub mod context;
pub mod corpus;
pub mod error;
pub mod graph;
pub mod ingest;
pub mod metrics;
pub mod models;
pub mod stores;
pub mod tokenizer;
pub mod traits;
pub mod vector;

pub use cache::{fingerprint, IndexSource, LoadedIndex, PersistentIndexCache};
pub use chunking::{normalize_whitespace, split_passages, truncate_chars, ChunkingConfig};
pub use config::{ContextOptions, EngineOptions, GraphOptions, IndexOptions};
pub use context::{fit_passage, select_passage, AssembledContext, ContextAssembler};
pub use corpus::{Corpus, CorpusStats};
pub use error::{CacheError, IngestError};
pub use graph::{
    build_graph, build_image_nodes, build_links, build_nodes, phantom_id, Adjacency,
    GraphSnapshot, LinkResolution,
};
pub use ingest::{
    discover_corpus_files, load_corpus, load_corpus_best_effort, read_snapshot_file, CorpusReport,
    SkippedFile,
};
pub use metrics::{
    detect_bridges, detect_clusters, extract_topics, pagerank, pagerank_distribution, top_hubs,
};
pub use models::{
    BridgeNode, Document, GraphLink, GraphNode, ImplicitLink, NeighborContext, SearchResult,
    Section, VectorHit, Visit,
};
pub use stores::{FileIndexStore, MemoryIndexStore};
pub use tokenizer::{tokenize, tokenize_stream};
pub use traits::IndexStore;
pub use vector::{spawn_implicit_links, IndexSnapshot, TfIdfIndex};
