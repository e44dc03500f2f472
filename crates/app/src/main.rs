use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use vault_context_core::{
    load_corpus_best_effort, Corpus, EngineOptions, FileIndexStore, PersistentIndexCache,
};

#[derive(Parser)]
#[command(name = "vault-context", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Corpus snapshot: a JSON file or a directory of JSON files.
    #[arg(long, env = "VAULT_CORPUS")]
    corpus: PathBuf,

    /// Directory for the persisted TF-IDF index.
    #[arg(long, env = "VAULT_CACHE_DIR", default_value = ".vault-context")]
    cache_dir: PathBuf,

    /// Build the index in memory without reading or writing the cache.
    #[arg(long, default_value_t = false)]
    no_cache: bool,

    /// Drop the cached index for this corpus before loading.
    #[arg(long, default_value_t = false)]
    rebuild: bool,

    /// JSON file with engine options; missing fields keep their defaults.
    #[arg(long, env = "VAULT_OPTIONS")]
    options: Option<PathBuf>,

    /// Print machine-readable JSON instead of text.
    #[arg(long, default_value_t = false)]
    json: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Rank documents for a query.
    Search {
        #[arg(long)]
        query: String,
        #[arg(long, default_value = "10")]
        top_n: usize,
        /// Use section keyword scoring instead of the vector index.
        #[arg(long, default_value_t = false)]
        keyword: bool,
    },
    /// Assemble the budgeted context string for a query.
    Context {
        #[arg(long)]
        query: String,
        /// Speaker of the current conversation, boosts their documents.
        #[arg(long)]
        speaker: Option<String>,
        /// Character budget, overrides the options file.
        #[arg(long)]
        budget: Option<usize>,
    },
    /// Hubs, clusters with their topics, and bridge nodes.
    Graph {
        #[arg(long, default_value = "10")]
        hubs: usize,
    },
    /// Similar document pairs that are not linked yet.
    Implicit {
        #[arg(long)]
        threshold: Option<f64>,
        #[arg(long)]
        top_n: Option<usize>,
    },
    /// Corpus and index summary.
    Stats,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let app_version = env!("CARGO_PKG_VERSION");

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    info!(
        version = app_version,
        started_at = %Utc::now().to_rfc3339(),
        corpus = %cli.corpus.display(),
        "vault-context boot"
    );

    let mut options = read_options(cli.options.as_deref())?;
    match &cli.command {
        Command::Context {
            budget: Some(budget),
            ..
        } => options.context.budget_chars = *budget,
        Command::Implicit { threshold, top_n } => {
            if let Some(threshold) = threshold {
                options.index.implicit_threshold = *threshold;
            }
            if let Some(top_n) = top_n {
                options.index.implicit_top_n = *top_n;
            }
        }
        _ => {}
    }

    let mut corpus = open_corpus(&cli, options).await?;

    match &cli.command {
        Command::Search {
            query,
            top_n,
            keyword,
        } => {
            let assembler = corpus.assembler();
            let results = if *keyword {
                assembler.keyword_search(query, *top_n)
            } else {
                assembler.search(query, *top_n)
            };

            if cli.json {
                print_json(&results)?;
            } else {
                println!("query: {query}");
                for result in &results {
                    println!(
                        "score={:.4} doc={} file={} speaker={}",
                        result.score, result.doc_id, result.filename, result.speaker
                    );
                    if let Some(heading) = &result.heading {
                        println!("  heading={heading}");
                    }
                    if !result.content.is_empty() {
                        println!("  {}", result.content.replace('\n', "\n  "));
                    }
                }
            }
        }
        Command::Context { query, speaker, .. } => {
            let assembled = corpus.assembler().assemble(query, speaker.as_deref());
            if cli.json {
                print_json(&assembled)?;
            } else if assembled.text.is_empty() {
                println!("(no context)");
            } else {
                println!("{}", assembled.text);
            }
        }
        Command::Graph { hubs } => {
            let report = GraphReport::from_corpus(&corpus, *hubs);
            if cli.json {
                print_json(&report)?;
            } else {
                println!(
                    "nodes={} links={} clusters={}",
                    report.nodes,
                    report.links,
                    report.clusters.len()
                );
                for (id, rank) in &report.hubs {
                    println!("hub {rank:.3} {id}");
                }
                for cluster in &report.clusters {
                    println!(
                        "cluster {} size={} topics={}",
                        cluster.id,
                        cluster.size,
                        cluster.topics.join(", ")
                    );
                }
                for bridge in report.bridges {
                    println!(
                        "bridge {} spans {} clusters {:?}",
                        bridge.id, bridge.cluster_count, bridge.clusters
                    );
                }
            }
        }
        Command::Implicit { .. } => {
            let links = corpus.implicit_links().await;
            if cli.json {
                print_json(&links)?;
            } else if links.is_empty() {
                println!("no implicit links above threshold");
            } else {
                for link in &links {
                    println!("{:.4} {} <-> {}", link.similarity, link.doc_a_id, link.doc_b_id);
                }
            }
        }
        Command::Stats => {
            let stats = corpus.stats();
            if cli.json {
                print_json(&stats)?;
            } else {
                println!("documents={}", stats.documents);
                println!(
                    "nodes={} links={} phantom_nodes={} image_nodes={}",
                    stats.nodes, stats.links, stats.phantom_nodes, stats.image_nodes
                );
                println!("clusters={} bridges={}", stats.clusters, stats.bridges);
                println!(
                    "vocabulary={} index={:?}",
                    stats.vocabulary, stats.index_source
                );
                println!("top_hubs={}", stats.top_hubs.join(", "));
                println!("loaded_at={}", stats.loaded_at.to_rfc3339());
            }
        }
    }

    if corpus.flush().await {
        info!(cache_dir = %cli.cache_dir.display(), "index cache updated");
    }

    Ok(())
}

fn read_options(path: Option<&Path>) -> anyhow::Result<EngineOptions> {
    let Some(path) = path else {
        return Ok(EngineOptions::default());
    };
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading options file {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parsing options file {}", path.display()))
}

async fn open_corpus(cli: &Cli, options: EngineOptions) -> anyhow::Result<Corpus> {
    let report = load_corpus_best_effort(&cli.corpus)
        .map_err(|error| anyhow::anyhow!(error.to_string()))?;

    if !report.skipped_files.is_empty() {
        warn!(
            "skipped_files={} for corpus={}",
            report.skipped_files.len(),
            cli.corpus.display()
        );
        for skipped in &report.skipped_files {
            warn!(path = %skipped.path.display(), reason = %skipped.reason, "skipped corpus file");
        }
    }

    if cli.no_cache {
        return Ok(Corpus::build(report.documents, options).await);
    }

    let key = cache_key(&cli.corpus);
    let cache = PersistentIndexCache::new(FileIndexStore::new(&cli.cache_dir));
    if cli.rebuild && cache.invalidate(&key).await {
        info!(key = %key, "cached index dropped");
    }

    Ok(Corpus::load(report.documents, &cache, &key, options).await)
}

fn cache_key(corpus: &Path) -> String {
    corpus
        .canonicalize()
        .unwrap_or_else(|_| corpus.to_path_buf())
        .display()
        .to_string()
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[derive(Serialize)]
struct ClusterSummary {
    id: usize,
    size: usize,
    topics: Vec<String>,
}

#[derive(Serialize)]
struct GraphReport<'a> {
    nodes: usize,
    links: usize,
    hubs: Vec<(String, f64)>,
    clusters: Vec<ClusterSummary>,
    bridges: &'a [vault_context_core::BridgeNode],
}

impl<'a> GraphReport<'a> {
    fn from_corpus(corpus: &'a Corpus, hub_count: usize) -> Self {
        let ranks = corpus.pagerank();
        let hubs = vault_context_core::top_hubs(ranks, hub_count)
            .into_iter()
            .map(|id| {
                let rank = ranks.get(&id).copied().unwrap_or_default();
                (id, rank)
            })
            .collect();

        let mut sizes = std::collections::BTreeMap::<usize, usize>::new();
        for cluster in corpus.clusters().values() {
            *sizes.entry(*cluster).or_insert(0) += 1;
        }
        let clusters = sizes
            .into_iter()
            .map(|(id, size)| ClusterSummary {
                id,
                size,
                topics: corpus.topics().get(&id).cloned().unwrap_or_default(),
            })
            .collect();

        Self {
            nodes: corpus.graph().nodes.len(),
            links: corpus.graph().links.len(),
            hubs,
            clusters,
            bridges: corpus.bridges(),
        }
    }
}
