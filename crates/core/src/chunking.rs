use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChunkingConfig {
    pub max_chars: usize,
    pub overlap_chars: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_chars: 512,
            overlap_chars: 64,
        }
    }
}

impl ChunkingConfig {
    /// Same overlap ratio, capped at `max_chars`.
    pub fn with_max_chars(self, max_chars: usize) -> Self {
        let max_chars = max_chars.max(1);
        Self {
            max_chars,
            overlap_chars: self.overlap_chars.min(max_chars / 2),
        }
    }
}

pub fn normalize_whitespace(text: &str) -> String {
    text.replace('\u{a0}', " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Packs paragraphs into passages of at most `max_chars` characters.
/// Paragraphs that are longer on their own are cut into windows that
/// overlap by `overlap_chars`.
pub fn split_passages(text: &str, config: ChunkingConfig) -> Vec<String> {
    let max_chars = config.max_chars.max(1);
    let paragraphs = text
        .split("\n\n")
        .map(normalize_whitespace)
        .filter(|paragraph| !paragraph.is_empty())
        .collect::<Vec<_>>();

    let mut packed = Vec::new();
    let mut current = String::new();
    let mut current_chars = 0;

    for paragraph in paragraphs {
        let paragraph_chars = paragraph.chars().count();
        if current.is_empty() {
            current = paragraph;
            current_chars = paragraph_chars;
            continue;
        }

        if current_chars + paragraph_chars + 2 <= max_chars {
            current.push_str("\n\n");
            current.push_str(&paragraph);
            current_chars += paragraph_chars + 2;
        } else {
            packed.push(std::mem::replace(&mut current, paragraph));
            current_chars = paragraph_chars;
        }
    }

    if !current.is_empty() {
        packed.push(current);
    }

    let step = max_chars.saturating_sub(config.overlap_chars).max(1);
    let mut passages = Vec::new();
    for passage in packed {
        let chars: Vec<char> = passage.chars().collect();
        if chars.len() <= max_chars {
            passages.push(passage);
            continue;
        }

        let mut start = 0;
        while start < chars.len() {
            let end = (start + max_chars).min(chars.len());
            passages.push(chars[start..end].iter().collect());
            if end == chars.len() {
                break;
            }
            start += step;
        }
    }

    passages
}

/// Cuts `text` to at most `max_chars` characters, appending an ellipsis when
/// anything was removed.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((byte_index, _)) => format!("{}…", text[..byte_index].trim_end()),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn whitespace_is_normalized() {
        let input = "A  \t  lot\nof \u{a0}  spacing";
        assert_eq!(normalize_whitespace(input), "A lot of spacing");
    }

    #[test]
    fn short_paragraphs_are_packed_together() {
        let config = ChunkingConfig {
            max_chars: 40,
            overlap_chars: 5,
        };
        let passages = split_passages("first part\n\nsecond part\n\n\n\nthird", config);
        assert_eq!(passages, vec!["first part\n\nsecond part\n\nthird"]);
    }

    #[test]
    fn long_paragraph_is_windowed_with_overlap() {
        let config = ChunkingConfig {
            max_chars: 10,
            overlap_chars: 4,
        };
        let passages = split_passages("abcdefghijklmnop", config);
        assert_eq!(passages, vec!["abcdefghij", "ghijklmnop"]);
        assert!(passages.iter().all(|passage| passage.chars().count() <= 10));
    }

    #[test]
    fn multibyte_text_is_cut_on_char_boundaries() {
        let config = ChunkingConfig {
            max_chars: 3,
            overlap_chars: 0,
        };
        let passages = split_passages("가나다라마", config);
        assert_eq!(passages, vec!["가나다", "라마"]);
    }

    #[test]
    fn truncate_appends_ellipsis_only_when_cut() {
        assert_eq!(truncate_chars("short", 10), "short");
        assert_eq!(truncate_chars("abcdef", 3), "abc…");
        assert_eq!(truncate_chars("가나다라", 2), "가나…");
    }

    #[test]
    fn with_max_chars_keeps_overlap_below_window() {
        let config = ChunkingConfig::default().with_max_chars(100);
        assert_eq!(config.max_chars, 100);
        assert_eq!(config.overlap_chars, 50);
    }
}
