//! Link resolution: turns raw section references into a deduplicated,
//! undirected node/edge graph and the adjacency every analytic runs on.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;

use regex::Regex;
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::models::{
    canonical_pair, strip_extension, Document, GraphLink, GraphNode, UNKNOWN_SPEAKER,
};

pub const PHANTOM_PREFIX: &str = "_phantom_";
pub const IMAGE_PREFIX: &str = "_img_";

const DOCUMENT_LINK_STRENGTH: f64 = 1.0;
const PHANTOM_LINK_STRENGTH: f64 = 0.5;
const IMAGE_LINK_STRENGTH: f64 = 0.3;

const IMAGE_EXTENSIONS: [&str; 8] = ["png", "jpg", "jpeg", "gif", "webp", "svg", "bmp", "avif"];

static NEXT_GENERATION: AtomicU64 = AtomicU64::new(1);

/// Symmetric doc-id adjacency. Each instance carries a generation number
/// that is unique for the process, so derived results can be cached per
/// graph snapshot and compared by value.
#[derive(Debug, Clone, Default)]
pub struct Adjacency {
    neighbors: BTreeMap<String, Vec<String>>,
    generation: u64,
}

impl Adjacency {
    pub fn from_links(links: &[GraphLink]) -> Self {
        let mut adjacency = Self {
            neighbors: BTreeMap::new(),
            generation: 0,
        };
        for link in links {
            adjacency.insert_edge(&link.source, &link.target);
        }
        adjacency.generation = NEXT_GENERATION.fetch_add(1, Ordering::Relaxed);
        adjacency
    }

    /// Adds an undirected edge and moves the adjacency to a new generation.
    pub fn add_edge(&mut self, a: &str, b: &str) {
        if self.insert_edge(a, b) {
            self.generation = NEXT_GENERATION.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn insert_edge(&mut self, a: &str, b: &str) -> bool {
        if a == b || self.contains_edge(a, b) {
            return false;
        }
        self.neighbors
            .entry(a.to_string())
            .or_default()
            .push(b.to_string());
        self.neighbors
            .entry(b.to_string())
            .or_default()
            .push(a.to_string());
        true
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn neighbors(&self, id: &str) -> &[String] {
        self.neighbors.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn contains_node(&self, id: &str) -> bool {
        self.neighbors.contains_key(id)
    }

    pub fn contains_edge(&self, a: &str, b: &str) -> bool {
        self.neighbors(a).iter().any(|neighbor| neighbor == b)
    }

    /// Node ids in sorted order.
    pub fn nodes(&self) -> impl Iterator<Item = &str> {
        self.neighbors.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.neighbors
            .iter()
            .map(|(id, neighbors)| (id.as_str(), neighbors.as_slice()))
    }

    pub fn node_count(&self) -> usize {
        self.neighbors.len()
    }

    pub fn edge_count(&self) -> usize {
        self.neighbors.values().map(Vec::len).sum::<usize>() / 2
    }

    pub fn is_empty(&self) -> bool {
        self.neighbors.is_empty()
    }
}

#[derive(Debug, Clone, Default)]
pub struct GraphSnapshot {
    pub nodes: Vec<GraphNode>,
    pub links: Vec<GraphLink>,
}

impl GraphSnapshot {
    pub fn adjacency(&self) -> Adjacency {
        Adjacency::from_links(&self.links)
    }
}

/// Output of reference resolution: the edges plus any placeholder nodes
/// synthesized for unresolved targets.
#[derive(Debug, Clone, Default)]
pub struct LinkResolution {
    pub links: Vec<GraphLink>,
    pub phantom_nodes: Vec<GraphNode>,
}

/// Runs node construction, link resolution and image extraction.
pub fn build_graph(docs: &[Document]) -> GraphSnapshot {
    let mut nodes = build_nodes(docs);
    let resolution = build_links(docs, &nodes);
    let (image_nodes, image_links) = build_image_nodes(docs);

    let mut links = resolution.links;
    let mut seen: HashSet<(String, String)> = links.iter().map(GraphLink::key).collect();
    for link in image_links {
        if seen.insert(link.key()) {
            links.push(link);
        }
    }

    nodes.extend(resolution.phantom_nodes);
    nodes.extend(image_nodes);

    debug!(
        nodes = nodes.len(),
        links = links.len(),
        "built document graph"
    );
    GraphSnapshot { nodes, links }
}

pub fn build_nodes(docs: &[Document]) -> Vec<GraphNode> {
    docs.iter()
        .map(|doc| GraphNode {
            id: doc.id.clone(),
            doc_id: doc.id.clone(),
            speaker: doc.speaker.clone(),
            label: basename(doc.stem()).to_string(),
            folder_path: folder_of(&doc.filename),
            tags: doc.tags.clone(),
            is_image: false,
        })
        .collect()
}

pub fn build_links(docs: &[Document], nodes: &[GraphNode]) -> LinkResolution {
    let node_ids: HashSet<&str> = nodes.iter().map(|node| node.id.as_str()).collect();
    let mut section_owner: HashMap<&str, &str> = HashMap::new();
    let mut by_filename: HashMap<String, &str> = HashMap::new();
    let mut by_basename: HashMap<String, &str> = HashMap::new();

    for doc in docs {
        for section in &doc.sections {
            section_owner.entry(section.id.as_str()).or_insert(doc.id.as_str());
        }
        let stem = doc.stem().to_lowercase();
        by_basename
            .entry(basename(&stem).to_string())
            .or_insert(doc.id.as_str());
        by_filename.entry(stem).or_insert(doc.id.as_str());
    }

    let mut resolution = LinkResolution::default();
    let mut seen_links: HashSet<(String, String)> = HashSet::new();
    let mut seen_phantoms: HashSet<String> = HashSet::new();

    for doc in docs {
        for reference in doc.sections.iter().flat_map(|section| &section.references) {
            let raw = reference.trim();
            if raw.is_empty() {
                continue;
            }

            let (target, strength) = if node_ids.contains(raw) {
                (raw.to_string(), DOCUMENT_LINK_STRENGTH)
            } else if let Some(owner) = section_owner.get(raw) {
                (owner.to_string(), DOCUMENT_LINK_STRENGTH)
            } else if let Some(found) = resolve_by_filename(raw, &by_filename, &by_basename) {
                (found.to_string(), DOCUMENT_LINK_STRENGTH)
            } else {
                let id = phantom_id(raw);
                if seen_phantoms.insert(id.clone()) {
                    resolution.phantom_nodes.push(GraphNode {
                        id: id.clone(),
                        doc_id: id.clone(),
                        speaker: UNKNOWN_SPEAKER.to_string(),
                        label: normalize_reference(raw).to_string(),
                        folder_path: None,
                        tags: Vec::new(),
                        is_image: false,
                    });
                }
                (id, PHANTOM_LINK_STRENGTH)
            };

            if target == doc.id {
                continue;
            }
            if seen_links.insert(canonical_pair(&doc.id, &target)) {
                resolution.links.push(GraphLink {
                    source: doc.id.clone(),
                    target,
                    strength,
                });
            }
        }
    }

    resolution
}

fn resolve_by_filename<'a>(
    raw: &str,
    by_filename: &HashMap<String, &'a str>,
    by_basename: &HashMap<String, &'a str>,
) -> Option<&'a str> {
    let wanted = strip_extension(normalize_reference(raw)).to_lowercase();
    if let Some(found) = by_filename.get(&wanted) {
        return Some(*found);
    }
    by_basename.get(basename(&wanted)).copied()
}

/// Removes wiki-link decoration: surrounding brackets, `|alias` and `#anchor`.
fn normalize_reference(raw: &str) -> &str {
    let trimmed = raw.trim();
    let inner = trimmed
        .strip_prefix("[[")
        .and_then(|rest| rest.strip_suffix("]]"))
        .unwrap_or(trimmed);
    let inner = inner.split('|').next().unwrap_or(inner);
    let inner = inner.split('#').next().unwrap_or(inner);
    inner.trim()
}

/// Deterministic placeholder id for an unresolved reference.
pub fn phantom_id(reference: &str) -> String {
    format!("{PHANTOM_PREFIX}{}", slugify(normalize_reference(reference)))
}

fn slugify(text: &str) -> String {
    let mut slug = String::with_capacity(text.len());
    for c in text.to_lowercase().chars() {
        if c.is_alphanumeric() {
            slug.push(c);
        } else if !slug.ends_with('-') {
            slug.push('-');
        }
    }
    let slug = slug.trim_matches('-');
    if slug.is_empty() {
        let digest = Sha256::digest(text.as_bytes());
        format!("{digest:x}")[..12].to_string()
    } else {
        slug.to_string()
    }
}

/// One shared node per distinct image filename, with one edge from each
/// document that embeds it.
pub fn build_image_nodes(docs: &[Document]) -> (Vec<GraphNode>, Vec<GraphLink>) {
    let mut nodes = Vec::new();
    let mut links = Vec::new();
    let mut seen_nodes: HashSet<String> = HashSet::new();
    let mut seen_links: HashSet<(String, String)> = HashSet::new();

    for doc in docs {
        for image in image_references(&doc.raw_content) {
            let id = format!("{IMAGE_PREFIX}{image}");
            if seen_nodes.insert(id.clone()) {
                nodes.push(GraphNode {
                    id: id.clone(),
                    doc_id: id.clone(),
                    speaker: UNKNOWN_SPEAKER.to_string(),
                    label: image.clone(),
                    folder_path: None,
                    tags: Vec::new(),
                    is_image: true,
                });
            }
            if seen_links.insert(canonical_pair(&doc.id, &id)) {
                links.push(GraphLink {
                    source: doc.id.clone(),
                    target: id,
                    strength: IMAGE_LINK_STRENGTH,
                });
            }
        }
    }

    (nodes, links)
}

fn image_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| {
            Regex::new(r"!\[\[([^\]|#]+)(?:[|#][^\]]*)?\]\]|!\[[^\]]*\]\(\s*<?([^)\s>]+)>?[^)]*\)")
                .ok()
        })
        .as_ref()
}

/// Normalized (lowercased basename, no query string) image filenames
/// embedded in `content`.
fn image_references(content: &str) -> Vec<String> {
    let Some(pattern) = image_pattern() else {
        return Vec::new();
    };
    pattern
        .captures_iter(content)
        .filter_map(|capture| capture.get(1).or_else(|| capture.get(2)))
        .filter_map(|target| normalize_image_name(target.as_str()))
        .collect()
}

fn normalize_image_name(target: &str) -> Option<String> {
    let without_query = target.split(['?', '#']).next().unwrap_or(target);
    let name = basename(without_query.trim()).to_lowercase();
    let extension = name.rsplit_once('.').map(|(_, ext)| ext)?;
    IMAGE_EXTENSIONS
        .contains(&extension)
        .then_some(name)
}

fn basename(path: &str) -> &str {
    path.rsplit(['/', '\\']).next().unwrap_or(path)
}

fn folder_of(filename: &str) -> Option<String> {
    filename
        .rfind(['/', '\\'])
        .map(|index| filename[..index].to_string())
        .filter(|folder| !folder.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Section;

    fn doc(id: &str, filename: &str, refs: &[&str]) -> Document {
        Document {
            id: id.to_string(),
            filename: filename.to_string(),
            speaker: "chief_director".to_string(),
            tags: Vec::new(),
            sections: vec![Section {
                id: format!("{id}_s1"),
                heading: "Heading".to_string(),
                body: "body".to_string(),
                references: refs.iter().map(|r| r.to_string()).collect(),
            }],
            raw_content: String::new(),
            mtime: 0,
        }
    }

    fn resolve(docs: &[Document]) -> LinkResolution {
        build_links(docs, &build_nodes(docs))
    }

    #[test]
    fn one_node_per_document() {
        let docs = vec![doc("a", "notes/alpha.md", &[]), doc("b", "beta.md", &[])];
        let nodes = build_nodes(&docs);
        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes[0].id, "a");
        assert_eq!(nodes[0].label, "alpha");
        assert_eq!(nodes[0].folder_path.as_deref(), Some("notes"));
        assert_eq!(nodes[1].folder_path, None);
    }

    #[test]
    fn resolves_node_ids_section_ids_and_filenames() {
        let docs = vec![
            doc("a", "alpha.md", &["b", "c_s1", "Delta", "[[Delta|alias]]"]),
            doc("b", "beta.md", &[]),
            doc("c", "gamma.md", &[]),
            doc("d", "delta.md", &[]),
        ];
        let resolution = resolve(&docs);
        let targets: Vec<&str> = resolution.links.iter().map(|l| l.target.as_str()).collect();
        assert_eq!(targets, vec!["b", "c", "d"]);
        assert!(resolution.phantom_nodes.is_empty());
    }

    #[test]
    fn path_references_fall_back_to_basename() {
        let docs = vec![
            doc("a", "alpha.md", &["elsewhere/beta.md"]),
            doc("b", "archive/beta.md", &[]),
        ];
        let resolution = resolve(&docs);
        assert_eq!(resolution.links.len(), 1);
        assert_eq!(resolution.links[0].target, "b");
    }

    #[test]
    fn bare_names_reach_nested_documents() {
        let docs = vec![
            doc("a", "alpha.md", &["Palette"]),
            doc("b", "art/palette.md", &[]),
        ];
        let resolution = resolve(&docs);
        assert!(resolution.phantom_nodes.is_empty());
        assert_eq!(resolution.links.len(), 1);
        assert_eq!(resolution.links[0].target, "b");
    }

    #[test]
    fn unresolved_references_share_one_placeholder() {
        let docs = vec![
            doc("a", "alpha.md", &["Missing Note"]),
            doc("b", "beta.md", &["Missing Note", "missing note"]),
        ];
        let resolution = resolve(&docs);
        assert_eq!(resolution.phantom_nodes.len(), 1);
        assert_eq!(resolution.phantom_nodes[0].id, "_phantom_missing-note");
        assert_eq!(resolution.links.len(), 2);
        assert!(resolution
            .links
            .iter()
            .all(|link| link.target == "_phantom_missing-note"));
    }

    #[test]
    fn self_links_dropped_and_reverse_links_collapse() {
        let docs = vec![
            doc("a", "alpha.md", &["a", "b"]),
            doc("b", "beta.md", &["a"]),
        ];
        let resolution = resolve(&docs);
        assert_eq!(resolution.links.len(), 1);
        assert_eq!(resolution.links[0].key(), ("a".to_string(), "b".to_string()));
    }

    #[test]
    fn image_nodes_are_shared_and_deduplicated() {
        let mut a = doc("a", "alpha.md", &[]);
        a.raw_content =
            "![[Sketch.PNG]] and again ![[sketch.png|300]] plus ![alt](img/board.jpg?raw=1)"
                .to_string();
        let mut b = doc("b", "beta.md", &[]);
        b.raw_content = "![](../assets/sketch.png) ![[notes.md]]".to_string();

        let (nodes, links) = build_image_nodes(&[a, b]);
        let ids: Vec<&str> = nodes.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, vec!["_img_sketch.png", "_img_board.jpg"]);
        assert!(nodes.iter().all(|n| n.is_image));
        assert_eq!(links.len(), 3);
    }

    #[test]
    fn adjacency_is_symmetric_and_generation_changes() {
        let links = vec![
            GraphLink {
                source: "a".into(),
                target: "b".into(),
                strength: 1.0,
            },
            GraphLink {
                source: "b".into(),
                target: "a".into(),
                strength: 1.0,
            },
        ];
        let mut adjacency = Adjacency::from_links(&links);
        assert_eq!(adjacency.neighbors("a"), ["b".to_string()]);
        assert_eq!(adjacency.neighbors("b"), ["a".to_string()]);
        assert_eq!(adjacency.edge_count(), 1);

        let other = Adjacency::from_links(&links);
        assert_ne!(adjacency.generation(), other.generation());

        let before = adjacency.generation();
        adjacency.add_edge("a", "b");
        assert_eq!(adjacency.generation(), before);
        adjacency.add_edge("b", "c");
        assert!(adjacency.generation() > before);
    }

    #[test]
    fn slug_falls_back_to_digest_for_symbol_only_references() {
        let id = phantom_id("???");
        assert!(id.starts_with(PHANTOM_PREFIX));
        assert_eq!(id.len(), PHANTOM_PREFIX.len() + 12);
        assert_eq!(id, phantom_id("???"));
    }
}
