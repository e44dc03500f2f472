use serde::{Deserialize, Serialize};

pub const UNKNOWN_SPEAKER: &str = "unknown";

fn unknown_speaker() -> String {
    UNKNOWN_SPEAKER.to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Section {
    pub id: String,
    #[serde(default)]
    pub heading: String,
    #[serde(default)]
    pub body: String,
    /// Raw cross-document references, unresolved.
    #[serde(default)]
    pub references: Vec<String>,
}

/// A parsed document as handed over by the external loader. Immutable for
/// the lifetime of one corpus snapshot.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    pub id: String,
    pub filename: String,
    #[serde(default = "unknown_speaker")]
    pub speaker: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub sections: Vec<Section>,
    #[serde(default)]
    pub raw_content: String,
    #[serde(default)]
    pub mtime: i64,
}

impl Document {
    /// Filename with its last extension removed.
    pub fn stem(&self) -> &str {
        strip_extension(&self.filename)
    }

    pub fn first_non_empty_section(&self) -> Option<&Section> {
        self.sections
            .iter()
            .find(|section| !section.body.trim().is_empty())
    }
}

pub fn strip_extension(name: &str) -> &str {
    match name.rfind('.') {
        Some(dot) if dot > 0 && !name[dot..].contains(['/', '\\']) => &name[..dot],
        _ => name,
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GraphNode {
    pub id: String,
    pub doc_id: String,
    pub speaker: String,
    pub label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub folder_path: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default)]
    pub is_image: bool,
}

/// An undirected edge. At most one exists per unordered id pair.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GraphLink {
    pub source: String,
    pub target: String,
    pub strength: f64,
}

impl GraphLink {
    pub fn key(&self) -> (String, String) {
        canonical_pair(&self.source, &self.target)
    }
}

pub fn canonical_pair(a: &str, b: &str) -> (String, String) {
    if a <= b {
        (a.to_string(), b.to_string())
    } else {
        (b.to_string(), a.to_string())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchResult {
    pub doc_id: String,
    pub filename: String,
    pub section_id: Option<String>,
    pub heading: Option<String>,
    pub speaker: String,
    pub content: String,
    pub score: f64,
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NeighborContext {
    pub section_id: String,
    pub heading: String,
    pub content: String,
    /// Document id of the result (or traversal seed) this neighbor was reached from.
    pub linked_from: String,
    pub filename: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VectorHit {
    pub doc_id: String,
    pub filename: String,
    pub speaker: String,
    pub score: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ImplicitLink {
    pub doc_a_id: String,
    pub doc_b_id: String,
    pub similarity: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BridgeNode {
    pub id: String,
    pub cluster_count: usize,
    pub clusters: Vec<usize>,
}

/// A node reached by graph traversal, with its hop distance from the
/// nearest seed. Seeds are their own parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Visit<'a> {
    pub doc_id: &'a str,
    pub parent: &'a str,
    pub hops: usize,
}
