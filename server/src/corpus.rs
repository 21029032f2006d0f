//! Read-only poem corpus, loaded once at startup.
//!
//! The corpus text goes through the same line/word index as a user
//! transcript. Numbered poems are found by their header line, which is the
//! poem's ordinal label followed by a period (`"IV."`).

use log::info;
use std::collections::HashMap;
use std::fs;
use std::path::Path;

use crate::error::{Result, ServerError};
use crate::index::MessageIndex;

/// Highest number with a standard Roman numeral
pub const ROMAN_LIMIT: usize = 3999;

/// Maps a 1-based poem number to its header label
#[derive(Debug, Clone, Default)]
pub struct OrdinalLabels {
    labels: HashMap<usize, String>,
}

impl OrdinalLabels {
    /// Roman numerals for `1..=up_to`, capped at 3999
    pub fn roman(up_to: usize) -> Self {
        let labels = (1..=up_to.min(ROMAN_LIMIT))
            .map(|n| (n, to_roman(n)))
            .collect();
        Self { labels }
    }

    /// Parses a JSON object such as `{"1": "I", "2": "II"}`
    pub fn from_json(text: &str) -> Result<Self> {
        let labels: HashMap<usize, String> = serde_json::from_str(text)?;
        Ok(Self { labels })
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|source| ServerError::Corpus {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&text)
    }

    pub fn get(&self, n: usize) -> Option<&str> {
        self.labels.get(&n).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

pub fn to_roman(mut n: usize) -> String {
    const NUMERALS: [(usize, &str); 13] = [
        (1000, "M"),
        (900, "CM"),
        (500, "D"),
        (400, "CD"),
        (100, "C"),
        (90, "XC"),
        (50, "L"),
        (40, "XL"),
        (10, "X"),
        (9, "IX"),
        (5, "V"),
        (4, "IV"),
        (1, "I"),
    ];
    let mut out = String::new();
    for (value, numeral) in NUMERALS {
        while n >= value {
            out.push_str(numeral);
            n -= value;
        }
    }
    out
}

#[derive(Debug, Clone)]
pub struct PoemCorpus {
    index: MessageIndex,
    labels: OrdinalLabels,
}

impl PoemCorpus {
    /// Indexes `text` line by line, in order
    pub fn from_text(text: &str, labels: OrdinalLabels) -> Self {
        let mut index = MessageIndex::new("corpus");
        for line in text.split_inclusive('\n') {
            index.add_msg_and_index(line);
        }
        Self { index, labels }
    }

    pub fn load(path: &Path, labels: OrdinalLabels) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|source| ServerError::Corpus {
            path: path.display().to_string(),
            source,
        })?;
        let corpus = Self::from_text(&text, labels);
        info!(
            "Loaded corpus {} ({} lines)",
            path.display(),
            corpus.index.msg_size()
        );
        Ok(corpus)
    }

    pub fn index(&self) -> &MessageIndex {
        &self.index
    }

    pub fn search(&self, term: &str) -> String {
        self.index.search(term)
    }

    /// Lines of poem `n`, header included
    ///
    /// Runs up to the next poem's header, or to the end of the corpus when
    /// there is no next header. Empty when poem `n` has no label or its
    /// header is missing.
    pub fn get_poem(&self, n: usize) -> Vec<String> {
        let Some(start) = self.header_line(n) else {
            return Vec::new();
        };
        let lines = self.index.lines();
        let end = n
            .checked_add(1)
            .and_then(|next| self.header_line(next))
            .unwrap_or(lines.len());
        lines
            .get(start..end)
            .map(<[String]>::to_vec)
            .unwrap_or_default()
    }

    fn header_line(&self, n: usize) -> Option<usize> {
        let header = format!("{}.", self.labels.get(n)?);
        self.index.lines().iter().position(|line| *line == header)
    }
}

impl Default for PoemCorpus {
    fn default() -> Self {
        Self::from_text("", OrdinalLabels::roman(ROMAN_LIMIT))
    }
}
