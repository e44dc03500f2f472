//! Query-time retrieval: ranked results, graph-connected neighbors and the
//! character-budgeted context string handed to the prompt assembler.
//!
//! Everything here is best effort. Missing documents, an empty graph or an
//! unbuilt index shrink the output; nothing returns an error.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};

use serde::Serialize;
use tracing::debug;

use crate::chunking::{split_passages, truncate_chars, ChunkingConfig};
use crate::config::ContextOptions;
use crate::graph::Adjacency;
use crate::metrics::top_hubs;
use crate::models::{Document, NeighborContext, SearchResult, Section, Visit, UNKNOWN_SPEAKER};
use crate::tokenizer::{tokenize, tokenize_stream};
use crate::vector::TfIdfIndex;

const CONTEXT_HEADER: &str = "## Related notes\n\n";
const NEIGHBOR_HEADER: &str = "### Connected documents\n\n";
/// Bodies cut shorter than this are not worth an entry.
const MIN_BODY_CHARS: usize = 40;

const HEADING_MATCH_WEIGHT: f64 = 0.3;
const BODY_MATCH_WEIGHT: f64 = 0.1;

#[derive(Debug, Clone, Default, Serialize)]
pub struct AssembledContext {
    pub text: String,
    pub results: Vec<SearchResult>,
    pub neighbors: Vec<NeighborContext>,
}

/// Read-only view over one corpus snapshot.
pub struct ContextAssembler<'a> {
    docs: &'a [Document],
    by_id: HashMap<&'a str, &'a Document>,
    adjacency: &'a Adjacency,
    index: Option<&'a TfIdfIndex>,
    ranks: Option<&'a BTreeMap<String, f64>>,
    options: ContextOptions,
}

impl<'a> ContextAssembler<'a> {
    pub fn new(docs: &'a [Document], adjacency: &'a Adjacency, options: ContextOptions) -> Self {
        let mut by_id = HashMap::with_capacity(docs.len());
        for doc in docs {
            by_id.entry(doc.id.as_str()).or_insert(doc);
        }
        Self {
            docs,
            by_id,
            adjacency,
            index: None,
            ranks: None,
            options,
        }
    }

    pub fn with_index(mut self, index: &'a TfIdfIndex) -> Self {
        self.index = Some(index);
        self
    }

    /// PageRank scores used to pick hub seeds for global traversal.
    pub fn with_ranks(mut self, ranks: &'a BTreeMap<String, f64>) -> Self {
        self.ranks = Some(ranks);
        self
    }

    pub fn options(&self) -> &ContextOptions {
        &self.options
    }

    pub fn document(&self, id: &str) -> Option<&'a Document> {
        self.by_id.get(id).copied()
    }

    /// Vector search when a built index is attached, keyword search otherwise.
    /// Each hit carries its best-matching passage.
    pub fn search(&self, query: &str, top_n: usize) -> Vec<SearchResult> {
        match self.index {
            Some(index) if index.is_built() => index
                .search(query, top_n)
                .into_iter()
                .filter_map(|hit| {
                    let doc = self.document(&hit.doc_id)?;
                    let section = select_passage(doc, Some(query));
                    Some(self.result_for(doc, section, Some(query), hit.score))
                })
                .collect(),
            _ => self.keyword_search(query, top_n),
        }
    }

    /// Section-level lexical scoring, used when no vector index is available.
    pub fn keyword_search(&self, query: &str, top_n: usize) -> Vec<SearchResult> {
        let stems = tokenize(query);
        if stems.is_empty() || top_n == 0 {
            return Vec::new();
        }

        let mut scored: Vec<(f64, &Document, &Section)> = self
            .docs
            .iter()
            .flat_map(|doc| doc.sections.iter().map(move |section| (doc, section)))
            .filter_map(|(doc, section)| {
                keyword_score(&stems, section).map(|score| (score, doc, section))
            })
            .collect();
        scored.sort_by(|left, right| right.0.total_cmp(&left.0));

        scored
            .into_iter()
            .take(top_n)
            .map(|(score, doc, section)| self.result_for(doc, Some(section), Some(query), score))
            .collect()
    }

    fn result_for(
        &self,
        doc: &Document,
        section: Option<&Section>,
        query: Option<&str>,
        score: f64,
    ) -> SearchResult {
        let budget = self.options.hop_budget(0);
        let content = match section {
            Some(section) => fit_passage(&section.body, query, budget),
            None => fit_passage(&doc.raw_content, query, budget),
        };
        SearchResult {
            doc_id: doc.id.clone(),
            filename: doc.filename.clone(),
            section_id: section.map(|section| section.id.clone()),
            heading: section
                .map(|section| section.heading.trim())
                .filter(|heading| !heading.is_empty())
                .map(str::to_string),
            speaker: doc.speaker.clone(),
            content,
            score,
            tags: doc.tags.clone(),
        }
    }

    /// One adjacency hop out of every result, at most `max_per_result` new
    /// documents each.
    pub fn expand_with_graph_neighbors(
        &self,
        results: &[SearchResult],
        max_per_result: usize,
    ) -> Vec<NeighborContext> {
        self.graph_neighbors(results, max_per_result)
            .into_iter()
            .map(|(_, neighbor)| neighbor)
            .collect()
    }

    fn graph_neighbors(
        &self,
        results: &[SearchResult],
        max_per_result: usize,
    ) -> Vec<(&'a str, NeighborContext)> {
        let primary: HashSet<&str> = results.iter().map(|result| result.doc_id.as_str()).collect();
        let mut emitted: HashSet<&'a str> = HashSet::new();
        let mut neighbors = Vec::new();

        for result in results {
            let mut taken = 0;
            for neighbor_id in self.adjacency.neighbors(&result.doc_id) {
                if taken >= max_per_result {
                    break;
                }
                if primary.contains(neighbor_id.as_str()) || emitted.contains(neighbor_id.as_str())
                {
                    continue;
                }
                let Some(doc) = self.document(neighbor_id) else {
                    continue;
                };
                let Some(section) = doc.first_non_empty_section() else {
                    continue;
                };

                emitted.insert(doc.id.as_str());
                neighbors.push((
                    doc.id.as_str(),
                    NeighborContext {
                        section_id: section.id.clone(),
                        heading: section.heading.clone(),
                        content: truncate_chars(
                            section.body.trim(),
                            self.options.neighbor_preview_chars,
                        ),
                        linked_from: result.doc_id.clone(),
                        filename: doc.filename.clone(),
                    },
                ));
                taken += 1;
            }
        }

        neighbors
    }

    /// Blends the retrieval score with query overlap and a same-speaker
    /// bonus, keeping `top_n`. Scores on the returned results are left as
    /// retrieved.
    pub fn rerank(
        &self,
        results: Vec<SearchResult>,
        query: &str,
        top_n: usize,
        current_speaker: Option<&str>,
    ) -> Vec<SearchResult> {
        if results.len() <= top_n {
            return results;
        }

        let stems = tokenize(query);
        let mut scored: Vec<(f64, SearchResult)> = results
            .into_iter()
            .map(|result| {
                let haystack = format!(
                    "{} {} {}",
                    result.filename,
                    result.heading.as_deref().unwrap_or_default(),
                    result.content
                )
                .to_lowercase();
                let overlap = if stems.is_empty() {
                    0.0
                } else {
                    let hits = stems
                        .iter()
                        .filter(|stem| haystack.contains(stem.as_str()))
                        .count();
                    hits as f64 / stems.len() as f64
                };
                let speaker_bonus = match current_speaker {
                    Some(speaker) if speaker != UNKNOWN_SPEAKER && speaker == result.speaker => 0.1,
                    _ => 0.0,
                };
                (0.6 * result.score + 0.3 * overlap + speaker_bonus, result)
            })
            .collect();

        scored.sort_by(|left, right| right.0.total_cmp(&left.0));
        scored
            .into_iter()
            .take(top_n)
            .map(|(_, result)| result)
            .collect()
    }

    /// Renders results and neighbors within `budget_chars`. An entry that
    /// does not fit is dropped whole and ends its list.
    pub fn format_context(&self, results: &[SearchResult], neighbors: &[NeighborContext]) -> String {
        let budget = self.options.budget_chars;
        let header_chars = CONTEXT_HEADER.chars().count();
        if (results.is_empty() && neighbors.is_empty()) || header_chars > budget {
            return String::new();
        }

        let mut out = String::from(CONTEXT_HEADER);
        let mut used = header_chars;
        let mut entries = 0;

        let result_cap = self.options.hop_budget(0);
        for result in results {
            let Some(entry) = render_entry(&result_title(result), &result.content, result_cap, budget - used)
            else {
                break;
            };
            used += entry.chars().count();
            out.push_str(&entry);
            entries += 1;
        }

        let neighbor_cap = self.options.hop_budget(1);
        let neighbor_header_chars = NEIGHBOR_HEADER.chars().count();
        let mut header_written = false;
        for neighbor in neighbors {
            let header_cost = if header_written { 0 } else { neighbor_header_chars };
            let Some(room) = (budget - used).checked_sub(header_cost) else {
                break;
            };
            let Some(entry) =
                render_entry(&self.neighbor_title(neighbor), &neighbor.content, neighbor_cap, room)
            else {
                break;
            };
            if !header_written {
                out.push_str(NEIGHBOR_HEADER);
                used += header_cost;
                header_written = true;
            }
            used += entry.chars().count();
            out.push_str(&entry);
            entries += 1;
        }

        if entries == 0 {
            return String::new();
        }
        out.truncate(out.trim_end().len());
        out
    }

    fn neighbor_title(&self, neighbor: &NeighborContext) -> String {
        let source = self
            .document(&neighbor.linked_from)
            .map_or(neighbor.linked_from.as_str(), |doc| doc.filename.as_str());
        let heading = neighbor.heading.trim();
        if heading.is_empty() {
            format!("- {} (via {source})", neighbor.filename)
        } else {
            format!("- {} > {heading} (via {source})", neighbor.filename)
        }
    }

    /// Breadth-first walk from `start`. The start node is always the first
    /// visit, even when it is not part of the graph.
    pub fn bfs_context<'s>(&'s self, start: &'s str, max_hops: usize, max_docs: usize) -> Vec<Visit<'s>> {
        self.traverse(&[start], max_hops, max_docs)
    }

    pub fn bfs_context_ids(&self, start: &str, max_hops: usize, max_docs: usize) -> Vec<String> {
        self.bfs_context(start, max_hops, max_docs)
            .into_iter()
            .map(|visit| visit.doc_id.to_string())
            .collect()
    }

    /// Multi-source walk seeded by confident results. With fewer than two
    /// such results the top PageRank hubs seed the walk instead. `max_docs`
    /// bounds the whole traversal.
    pub fn global_context<'s>(
        &'s self,
        results: &'s [SearchResult],
        max_hops: usize,
        max_docs: usize,
    ) -> Vec<Visit<'s>> {
        let mut seeds: Vec<&'s str> = Vec::new();
        for result in results
            .iter()
            .filter(|result| result.score >= self.options.seed_min_score)
        {
            if !seeds.contains(&result.doc_id.as_str()) {
                seeds.push(&result.doc_id);
            }
        }

        if seeds.len() < 2 {
            if let Some(ranks) = self.ranks {
                let hubs: Vec<&'s str> = top_hubs(ranks, ranks.len())
                    .iter()
                    .filter_map(|hub| self.document(hub))
                    .take(self.options.hub_seeds)
                    .map(|doc| doc.id.as_str())
                    .collect();
                if !hubs.is_empty() {
                    seeds = hubs;
                }
            }
        }

        self.traverse(&seeds, max_hops, max_docs)
    }

    pub fn global_context_ids(
        &self,
        results: &[SearchResult],
        max_hops: usize,
        max_docs: usize,
    ) -> Vec<String> {
        self.global_context(results, max_hops, max_docs)
            .into_iter()
            .map(|visit| visit.doc_id.to_string())
            .collect()
    }

    fn traverse<'s>(&'s self, seeds: &[&'s str], max_hops: usize, max_docs: usize) -> Vec<Visit<'s>> {
        let cap = max_docs.max(1);
        let mut visited: HashSet<&str> = HashSet::new();
        let mut order: Vec<Visit<'s>> = Vec::new();
        let mut queue: VecDeque<Visit<'s>> = VecDeque::new();

        for &seed in seeds {
            if order.len() >= cap {
                break;
            }
            if visited.insert(seed) {
                let visit = Visit {
                    doc_id: seed,
                    parent: seed,
                    hops: 0,
                };
                order.push(visit);
                queue.push_back(visit);
            }
        }

        while let Some(current) = queue.pop_front() {
            if current.hops >= max_hops {
                continue;
            }
            for neighbor in self.adjacency.neighbors(current.doc_id) {
                if order.len() >= cap {
                    return order;
                }
                if visited.insert(neighbor.as_str()) {
                    let visit = Visit {
                        doc_id: neighbor.as_str(),
                        parent: current.doc_id,
                        hops: current.hops + 1,
                    };
                    order.push(visit);
                    queue.push_back(visit);
                }
            }
        }

        order
    }

    /// Turns traversal output into neighbor entries whose passage length
    /// shrinks with hop distance. Placeholder and image nodes are skipped.
    pub fn traversal_context(&self, visits: &[Visit<'_>], query: Option<&str>) -> Vec<NeighborContext> {
        visits
            .iter()
            .filter_map(|visit| {
                let doc = self.document(visit.doc_id)?;
                let section = select_passage(doc, query)?;
                Some(NeighborContext {
                    section_id: section.id.clone(),
                    heading: section.heading.clone(),
                    content: fit_passage(&section.body, query, self.options.hop_budget(visit.hops)),
                    linked_from: visit.parent.to_string(),
                    filename: doc.filename.clone(),
                })
            })
            .collect()
    }

    /// Search, rerank, graph expansion, global traversal and formatting in
    /// one pass.
    pub fn assemble(&self, query: &str, current_speaker: Option<&str>) -> AssembledContext {
        let options = self.options;
        let candidates = self.search(query, options.top_n.saturating_mul(2));
        let results = self.rerank(candidates, query, options.top_n, current_speaker);

        let direct = self.graph_neighbors(&results, options.max_neighbors_per_result);
        let mut seen: HashSet<&str> = results.iter().map(|result| result.doc_id.as_str()).collect();
        seen.extend(direct.iter().map(|(doc_id, _)| *doc_id));
        let mut neighbors: Vec<NeighborContext> =
            direct.into_iter().map(|(_, neighbor)| neighbor).collect();

        let visits: Vec<Visit<'_>> = self
            .global_context(&results, options.max_hops, options.max_docs)
            .into_iter()
            .filter(|visit| seen.insert(visit.doc_id))
            .collect();
        let query = Some(query).filter(|query| !query.trim().is_empty());
        neighbors.extend(self.traversal_context(&visits, query));

        let text = self.format_context(&results, &neighbors);
        debug!(
            results = results.len(),
            neighbors = neighbors.len(),
            chars = text.chars().count(),
            "assembled context"
        );

        AssembledContext {
            text,
            results,
            neighbors,
        }
    }
}

/// The section whose heading and body contain the most query terms; the
/// first non-empty section when there is no query or nothing matches.
pub fn select_passage<'d>(doc: &'d Document, query: Option<&str>) -> Option<&'d Section> {
    let terms = query.map(tokenize).unwrap_or_default();
    if terms.is_empty() {
        return doc.first_non_empty_section();
    }

    let mut best: Option<(&Section, usize)> = None;
    for section in &doc.sections {
        if section.body.trim().is_empty() && section.heading.trim().is_empty() {
            continue;
        }
        let matches = count_matches(&terms, &section.heading) + count_matches(&terms, &section.body);
        if matches > best.map_or(0, |(_, count)| count) {
            best = Some((section, matches));
        }
    }

    best.map(|(section, _)| section)
        .or_else(|| doc.first_non_empty_section())
}

/// `text` if it fits in `budget` characters, otherwise the paragraph chunk
/// with the most query matches.
pub fn fit_passage(text: &str, query: Option<&str>, budget: usize) -> String {
    let text = text.trim();
    if text.chars().count() <= budget {
        return text.to_string();
    }

    let terms = query.map(tokenize).unwrap_or_default();
    let passages = split_passages(text, ChunkingConfig::default().with_max_chars(budget));

    let mut best: Option<(&String, usize)> = None;
    for passage in &passages {
        let matches = count_matches(&terms, passage);
        if best.map_or(true, |(_, count)| matches > count) {
            best = Some((passage, matches));
        }
    }

    best.map(|(passage, _)| truncate_chars(passage, budget))
        .unwrap_or_default()
}

fn count_matches(terms: &BTreeSet<String>, text: &str) -> usize {
    if terms.is_empty() {
        return 0;
    }
    tokenize_stream(text)
        .iter()
        .filter(|term| terms.contains(*term))
        .count()
}

fn keyword_score(stems: &BTreeSet<String>, section: &Section) -> Option<f64> {
    let heading = tokenize(&section.heading);
    let mut body_counts: HashMap<String, usize> = HashMap::new();
    for term in tokenize_stream(&section.body) {
        *body_counts.entry(term).or_insert(0) += 1;
    }

    let mut matched = 0usize;
    let mut weighted = 0.0;
    for stem in stems {
        let in_heading = heading.contains(stem);
        let count = body_counts.get(stem).copied().unwrap_or(0);
        if in_heading {
            weighted += HEADING_MATCH_WEIGHT;
        }
        if count > 0 {
            weighted += BODY_MATCH_WEIGHT * (1.0 + (count as f64).ln());
        }
        if in_heading || count > 0 {
            matched += 1;
        }
    }

    if matched == 0 {
        return None;
    }
    let coverage = matched as f64 / stems.len() as f64;
    Some((0.6 * weighted + 0.4 * coverage).clamp(0.0, 1.0))
}

fn result_title(result: &SearchResult) -> String {
    let mut title = format!("**{}**", result.filename);
    if let Some(heading) = &result.heading {
        title.push_str(" > ");
        title.push_str(heading);
    }
    if result.speaker != UNKNOWN_SPEAKER && !result.speaker.is_empty() {
        title.push_str(" (");
        title.push_str(&result.speaker);
        title.push(')');
    }
    title
}

/// `title`, body and a blank line in at most `room` characters, or `None`
/// when even a shortened body would not fit.
fn render_entry(title: &str, body: &str, cap: usize, room: usize) -> Option<String> {
    let body = body.trim();
    let fixed = title.chars().count() + 3;
    let allowance = cap.min(room.checked_sub(fixed)?);

    let text = if body.chars().count() <= allowance {
        body.to_string()
    } else if allowance > MIN_BODY_CHARS {
        truncate_chars(body, allowance - 1)
    } else {
        return None;
    };

    Some(format!("{title}\n{text}\n\n"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{GraphOptions, IndexOptions};
    use crate::graph::build_graph;
    use crate::metrics::pagerank;

    fn section(id: &str, heading: &str, body: &str, references: &[&str]) -> Section {
        Section {
            id: id.to_string(),
            heading: heading.to_string(),
            body: body.to_string(),
            references: references.iter().map(|r| r.to_string()).collect(),
        }
    }

    fn doc(id: &str, filename: &str, speaker: &str, sections: Vec<Section>) -> Document {
        Document {
            id: id.to_string(),
            filename: filename.to_string(),
            speaker: speaker.to_string(),
            tags: Vec::new(),
            sections,
            raw_content: String::new(),
            mtime: 0,
        }
    }

    fn corpus() -> Vec<Document> {
        vec![
            doc(
                "a",
                "lighting.md",
                "art_director",
                vec![
                    section("a_s1", "Lighting plan", "lighting lighting shadows for the harbor", &["b"]),
                    section("a_s2", "Budget", "costs for rental gear", &[]),
                ],
            ),
            doc(
                "b",
                "harbor.md",
                "prog_director",
                vec![section("b_s1", "Harbor", "harbor fog and lighting rigs", &["c"])],
            ),
            doc(
                "c",
                "fog.md",
                UNKNOWN_SPEAKER,
                vec![section("c_s1", "Fog", "volumetric fog notes", &[])],
            ),
            doc(
                "d",
                "isolated.md",
                UNKNOWN_SPEAKER,
                vec![section("d_s1", "", "unrelated spreadsheet", &[])],
            ),
        ]
    }

    fn result(doc_id: &str, speaker: &str, score: f64, content: &str) -> SearchResult {
        SearchResult {
            doc_id: doc_id.to_string(),
            filename: format!("{doc_id}.md"),
            section_id: None,
            heading: None,
            speaker: speaker.to_string(),
            content: content.to_string(),
            score,
            tags: Vec::new(),
        }
    }

    #[test]
    fn keyword_score_weighs_heading_body_and_coverage() {
        let docs = corpus();
        let adjacency = build_graph(&docs).adjacency();
        let assembler = ContextAssembler::new(&docs, &adjacency, ContextOptions::default());

        let results = assembler.keyword_search("lighting", 10);
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].section_id.as_deref(), Some("a_s1"));
        assert_eq!(results[0].heading.as_deref(), Some("Lighting plan"));

        let expected = 0.6 * (0.3 + 0.1 * (1.0 + 2f64.ln())) + 0.4;
        assert!((results[0].score - expected).abs() < 1e-12);
        let body_only = 0.6 * 0.1 + 0.4;
        assert!((results[1].score - body_only).abs() < 1e-12);
        assert!(results.iter().all(|r| (0.0..=1.0).contains(&r.score)));
    }

    #[test]
    fn keyword_search_skips_unmatched_sections_and_empty_queries() {
        let docs = corpus();
        let adjacency = build_graph(&docs).adjacency();
        let assembler = ContextAssembler::new(&docs, &adjacency, ContextOptions::default());

        assert!(assembler.keyword_search("zeppelin", 5).is_empty());
        assert!(assembler.keyword_search("  ", 5).is_empty());
        assert!(assembler.keyword_search("lighting", 0).is_empty());
    }

    #[test]
    fn search_uses_index_when_built_and_keywords_otherwise() {
        let docs = corpus();
        let adjacency = build_graph(&docs).adjacency();

        let plain = ContextAssembler::new(&docs, &adjacency, ContextOptions::default());
        assert_eq!(plain.search("harbor", 5), plain.keyword_search("harbor", 5));

        let unbuilt = TfIdfIndex::new(IndexOptions::default());
        let fallback =
            ContextAssembler::new(&docs, &adjacency, ContextOptions::default()).with_index(&unbuilt);
        assert_eq!(fallback.search("harbor", 5), plain.keyword_search("harbor", 5));

        let mut index = TfIdfIndex::new(IndexOptions::default());
        index.build(&docs);
        let vector = ContextAssembler::new(&docs, &adjacency, ContextOptions::default()).with_index(&index);
        let results = vector.search("volumetric", 5);
        assert_eq!(results[0].doc_id, "c");
        assert_eq!(results[0].section_id.as_deref(), Some("c_s1"));
        assert_eq!(results[0].content, "volumetric fog notes");
    }

    #[test]
    fn passage_selection_prefers_most_matching_section() {
        let docs = corpus();
        assert_eq!(select_passage(&docs[0], Some("rental costs")).map(|s| s.id.as_str()), Some("a_s2"));
        assert_eq!(select_passage(&docs[0], None).map(|s| s.id.as_str()), Some("a_s1"));
        assert_eq!(select_passage(&docs[0], Some("zeppelin")).map(|s| s.id.as_str()), Some("a_s1"));
    }

    #[test]
    fn oversized_passages_are_cut_to_the_best_chunk() {
        let text = format!("{}\n\nbeta target gamma", "alpha ".repeat(60));
        let fitted = fit_passage(&text, Some("target"), 280);
        assert_eq!(fitted, "beta target gamma");

        let blind = fit_passage(&text, None, 280);
        assert!(blind.starts_with("alpha"));
        assert!(blind.chars().count() <= 280);
        assert_eq!(fit_passage("short", Some("target"), 280), "short");
    }

    #[test]
    fn neighbors_skip_primaries_and_respect_per_result_limit() {
        let docs = corpus();
        let adjacency = build_graph(&docs).adjacency();
        let assembler = ContextAssembler::new(&docs, &adjacency, ContextOptions::default());

        let from_c = assembler.expand_with_graph_neighbors(&[result("c", UNKNOWN_SPEAKER, 0.9, "")], 2);
        assert_eq!(from_c.len(), 1);
        assert_eq!(from_c[0].filename, "harbor.md");
        assert_eq!(from_c[0].linked_from, "c");

        let primaries = [result("a", UNKNOWN_SPEAKER, 0.9, ""), result("b", UNKNOWN_SPEAKER, 0.8, "")];
        let expanded = assembler.expand_with_graph_neighbors(&primaries, 2);
        assert_eq!(expanded.len(), 1);
        assert_eq!(expanded[0].section_id, "c_s1");
        assert_eq!(expanded[0].linked_from, "b");

        assert!(assembler.expand_with_graph_neighbors(&primaries, 0).is_empty());
    }

    #[test]
    fn neighbor_previews_are_truncated_with_ellipsis() {
        let docs = corpus();
        let adjacency = build_graph(&docs).adjacency();
        let options = ContextOptions {
            neighbor_preview_chars: 7,
            ..ContextOptions::default()
        };
        let assembler = ContextAssembler::new(&docs, &adjacency, options);

        let expanded = assembler.expand_with_graph_neighbors(&[result("c", UNKNOWN_SPEAKER, 0.9, "")], 2);
        assert_eq!(expanded[0].content, "harbor…");
    }

    #[test]
    fn rerank_is_a_no_op_within_top_n_and_rewards_speaker() {
        let docs = corpus();
        let adjacency = build_graph(&docs).adjacency();
        let assembler = ContextAssembler::new(&docs, &adjacency, ContextOptions::default());

        let results = vec![
            result("x", "art_director", 0.5, "fog"),
            result("y", "prog_director", 0.5, "fog"),
        ];
        let unchanged = assembler.rerank(results.clone(), "fog", 2, Some("prog_director"));
        assert_eq!(unchanged, results);

        let reranked = assembler.rerank(results.clone(), "fog", 1, Some("prog_director"));
        assert_eq!(reranked.len(), 1);
        assert_eq!(reranked[0].doc_id, "y");

        let unknown = assembler.rerank(results, "fog", 1, Some(UNKNOWN_SPEAKER));
        assert_eq!(unknown[0].doc_id, "x");
    }

    #[test]
    fn format_context_stays_within_budget_and_drops_whole_entries() {
        let docs = corpus();
        let adjacency = build_graph(&docs).adjacency();
        let options = ContextOptions {
            budget_chars: 300,
            ..ContextOptions::default()
        };
        let assembler = ContextAssembler::new(&docs, &adjacency, options);

        let long = "word ".repeat(100);
        let results = vec![
            result("first", "art_director", 0.9, &long),
            result("second", UNKNOWN_SPEAKER, 0.8, &long),
            result("third", UNKNOWN_SPEAKER, 0.7, &long),
        ];
        let text = assembler.format_context(&results, &[]);

        assert!(text.chars().count() <= 300);
        assert!(text.starts_with("## Related notes"));
        assert!(text.contains("**first.md** (art_director)"));
        assert!(!text.contains("third.md"));
        assert!(text.contains('…'));
        assert!(!text.contains("Connected documents"));
    }

    #[test]
    fn format_context_appends_connected_documents() {
        let docs = corpus();
        let adjacency = build_graph(&docs).adjacency();
        let assembler = ContextAssembler::new(&docs, &adjacency, ContextOptions::default());

        let results = vec![result("c", UNKNOWN_SPEAKER, 0.9, "volumetric fog notes")];
        let neighbors = assembler.expand_with_graph_neighbors(&results, 2);
        let text = assembler.format_context(&results, &neighbors);

        assert!(text.contains("**c.md**\nvolumetric fog notes"));
        assert!(!text.contains("(unknown)"));
        assert!(text.contains("### Connected documents"));
        assert!(text.contains("- harbor.md > Harbor (via fog.md)"));
        assert!(assembler.format_context(&[], &[]).is_empty());
    }

    #[test]
    fn bfs_is_hop_and_size_bounded() {
        let docs = corpus();
        let adjacency = build_graph(&docs).adjacency();
        let assembler = ContextAssembler::new(&docs, &adjacency, ContextOptions::default());

        assert_eq!(assembler.bfs_context_ids("a", 0, 20), vec!["a"]);
        assert_eq!(assembler.bfs_context_ids("a", 0, 0), vec!["a"]);
        assert_eq!(assembler.bfs_context_ids("a", 1, 20), vec!["a", "b"]);
        assert_eq!(assembler.bfs_context_ids("a", 2, 20), vec!["a", "b", "c"]);
        assert_eq!(assembler.bfs_context_ids("d", 3, 20), vec!["d"]);
        assert_eq!(assembler.bfs_context_ids("missing", 3, 20), vec!["missing"]);

        let mut previous: Vec<String> = Vec::new();
        for max_docs in 1..5 {
            let ids = assembler.bfs_context_ids("a", 2, max_docs);
            assert!(ids.len() <= max_docs);
            assert!(previous.iter().all(|id| ids.contains(id)));
            previous = ids;
        }

        let visits = assembler.bfs_context("a", 2, 20);
        assert_eq!(visits[2].parent, "b");
        assert_eq!(visits[2].hops, 2);
    }

    #[test]
    fn global_context_falls_back_to_hubs_and_caps_total() {
        let docs = corpus();
        let adjacency = build_graph(&docs).adjacency();
        let ranks = pagerank(&adjacency, &GraphOptions::default());
        let assembler =
            ContextAssembler::new(&docs, &adjacency, ContextOptions::default()).with_ranks(&ranks);

        let weak = [result("d", UNKNOWN_SPEAKER, 0.1, "")];
        let ids = assembler.global_context_ids(&weak, 1, 20);
        assert!(ids.contains(&"b".to_string()), "hub b should seed: {ids:?}");
        assert!(!ids.contains(&"d".to_string()));

        let confident = [result("c", UNKNOWN_SPEAKER, 0.9, "")];
        assert_eq!(assembler.global_context_ids(&confident, 2, 2).len(), 2);
        assert_eq!(assembler.global_context_ids(&confident, 2, 1).len(), 1);

        let single_hub = ContextOptions {
            hub_seeds: 1,
            ..ContextOptions::default()
        };
        let narrow = ContextAssembler::new(&docs, &adjacency, single_hub).with_ranks(&ranks);
        assert_eq!(narrow.global_context_ids(&confident, 0, 20), vec!["b"]);
        let lone = [result("d", UNKNOWN_SPEAKER, 0.9, "")];
        let ids = narrow.global_context_ids(&lone, 1, 20);
        assert_eq!(ids[0], "b");
        assert!(!ids.contains(&"d".to_string()), "lone seed is replaced: {ids:?}");

        let two_seeds = [
            result("a", UNKNOWN_SPEAKER, 0.9, ""),
            result("d", UNKNOWN_SPEAKER, 0.8, ""),
        ];
        assert_eq!(assembler.global_context_ids(&two_seeds, 1, 20), vec!["a", "d", "b"]);
    }

    #[test]
    fn traversal_content_shrinks_with_distance() {
        let long = "fog ".repeat(200);
        let docs = vec![
            doc("a", "a.md", UNKNOWN_SPEAKER, vec![section("a_s1", "", &long, &["b"])]),
            doc("b", "b.md", UNKNOWN_SPEAKER, vec![section("b_s1", "", &long, &["c"])]),
            doc("c", "c.md", UNKNOWN_SPEAKER, vec![section("c_s1", "", &long, &[])]),
        ];
        let adjacency = build_graph(&docs).adjacency();
        let assembler = ContextAssembler::new(&docs, &adjacency, ContextOptions::default());

        let visits = assembler.bfs_context("a", 2, 20);
        let contexts = assembler.traversal_context(&visits, Some("fog"));
        let lengths: Vec<usize> = contexts.iter().map(|c| c.content.chars().count()).collect();
        assert_eq!(contexts.len(), 3);
        assert!(lengths[0] <= 1_200 && lengths[0] > 600);
        assert!(lengths[1] <= 600 && lengths[1] > 280);
        assert!(lengths[2] <= 280);
        assert_eq!(contexts[1].linked_from, "a");
    }

    #[test]
    fn assemble_combines_results_and_graph_context() {
        let docs = corpus();
        let graph = build_graph(&docs);
        let adjacency = graph.adjacency();
        let ranks = pagerank(&adjacency, &GraphOptions::default());
        let mut index = TfIdfIndex::new(IndexOptions::default());
        index.build(&docs);
        let assembler = ContextAssembler::new(&docs, &adjacency, ContextOptions::default())
            .with_index(&index)
            .with_ranks(&ranks);

        let assembled = assembler.assemble("volumetric fog", None);
        assert_eq!(assembled.results[0].doc_id, "c");
        assert!(assembled.text.contains("fog.md"));
        assert!(assembled.neighbors.iter().any(|n| n.filename == "lighting.md"));

        let result_ids: HashSet<&str> = assembled.results.iter().map(|r| r.doc_id.as_str()).collect();
        let mut neighbor_files = HashSet::new();
        for neighbor in &assembled.neighbors {
            assert!(neighbor_files.insert(neighbor.filename.as_str()));
            let doc_id = docs
                .iter()
                .find(|d| d.filename == neighbor.filename)
                .map(|d| d.id.as_str())
                .unwrap_or_default();
            assert!(!result_ids.contains(doc_id));
        }
        assert!(assembled.text.chars().count() <= 3_000);
    }
}
