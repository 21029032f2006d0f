//! Per-user transcript index and its on-disk store
//!
//! A [`MessageIndex`] keeps every line a user has sent, in arrival order, and
//! an inverted index from normalized words to the line numbers they occur on.
//! [`IndexStore`] saves one index per username with bincode so a returning
//! user can still search their history.

use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

use crate::error::{Result, ServerError};

/// Ordered line store plus word index
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageIndex {
    name: String,
    msgs: Vec<String>,
    /// word -> line numbers, first occurrence order, no repeats
    index: HashMap<String, Vec<usize>>,
    total_msgs: usize,
    total_words: usize,
}

impl MessageIndex {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn msg_size(&self) -> usize {
        self.total_msgs
    }

    pub fn total_words(&self) -> usize {
        self.total_words
    }

    pub fn msg(&self, n: usize) -> Option<&str> {
        self.msgs.get(n).map(String::as_str)
    }

    pub fn lines(&self) -> &[String] {
        &self.msgs
    }

    /// Appends every line of `text`, keeping empty ones
    ///
    /// A single trailing line break is a terminator, not an extra line, so
    /// `"a\n"` adds one line while `""` still adds one empty line.
    pub fn add_msg(&mut self, text: &str) {
        for line in split_lines(text) {
            self.msgs.push(line.to_string());
            self.total_msgs += 1;
        }
    }

    /// Adds `text` and indexes its words against the last line just stored
    pub fn add_msg_and_index(&mut self, text: &str) {
        self.add_msg(text);
        let line_at = self.total_msgs - 1;
        self.indexing(text, line_at);
    }

    /// Records `line_no` under every word of `text`
    ///
    /// A word ending in a non-alphabetic character loses exactly that one
    /// character, so `fine.` and `fine` index the same key.
    pub fn indexing(&mut self, text: &str, line_no: usize) {
        for word in text.split_whitespace() {
            self.total_words += 1;
            let word = match word.char_indices().last() {
                Some((at, last)) if !last.is_alphabetic() => &word[..at],
                _ => word,
            };
            if word.is_empty() {
                continue;
            }
            let lines = self.index.entry(word.to_string()).or_default();
            if !lines.contains(&line_no) {
                lines.push(line_no);
            }
        }
    }

    /// Line numbers recorded for an already-normalized word
    pub fn occurrences(&self, word: &str) -> &[usize] {
        self.index.get(word).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Renders matching lines as `"<line_no>: <line>\n"` each
    ///
    /// A single-word term scans every stored line for a substring match. A
    /// multi-word term gathers candidate lines from the word index and keeps
    /// those containing every query word, first-seen order, no repeats.
    pub fn search(&self, term: &str) -> String {
        let words: Vec<&str> = term.split_whitespace().collect();
        let hits = if words.len() <= 1 {
            self.scan(&words)
        } else {
            self.lookup_all(&words)
        };

        hits.into_iter()
            .map(|(line_no, line)| format!("{}: {}\n", line_no, line))
            .collect()
    }

    fn scan<'a>(&'a self, words: &[&str]) -> Vec<(usize, &'a str)> {
        let mut hits: Vec<(usize, &str)> = Vec::new();
        for (line_no, line) in self.msgs.iter().enumerate() {
            for word in words {
                let repeat = hits.last().map(|(n, _)| *n) == Some(line_no);
                if line.contains(word) && !repeat {
                    hits.push((line_no, line.as_str()));
                }
            }
        }
        hits
    }

    fn lookup_all<'a>(&'a self, words: &[&str]) -> Vec<(usize, &'a str)> {
        let mut hits: Vec<(usize, &str)> = Vec::new();
        for word in words {
            for &line_no in self.occurrences(word) {
                let Some(line) = self.msgs.get(line_no) else {
                    continue;
                };
                let all_present = words.iter().all(|w| line.contains(w));
                if all_present && !hits.iter().any(|(n, _)| *n == line_no) {
                    hits.push((line_no, line.as_str()));
                }
            }
        }
        hits
    }
}

/// Characters that end a line, `\r\n` counting as one break
const LINE_BREAKS: [char; 10] = [
    '\n', '\r', '\x0b', '\x0c', '\x1c', '\x1d', '\x1e', '\u{85}', '\u{2028}', '\u{2029}',
];

/// Splits on every line break; no line follows a trailing break
fn split_lines(text: &str) -> Vec<&str> {
    let mut lines = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();

    while let Some((at, c)) = chars.next() {
        if !LINE_BREAKS.contains(&c) {
            continue;
        }
        lines.push(&text[start..at]);
        start = at + c.len_utf8();
        if c == '\r' {
            if let Some(&(next_at, '\n')) = chars.peek() {
                chars.next();
                start = next_at + 1;
            }
        }
    }
    if start < text.len() || lines.is_empty() {
        lines.push(&text[start..]);
    }
    lines
}

/// Directory of per-user index files, `<dir>/<name>.idx`
#[derive(Debug, Clone)]
pub struct IndexStore {
    dir: PathBuf,
}

impl IndexStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, name: &str) -> Result<PathBuf> {
        let unsafe_name = name.is_empty()
            || name == "."
            || name.contains("..")
            || name.contains(['/', '\\', '\0']);
        if unsafe_name {
            return Err(ServerError::InvalidIndexName(name.to_string()));
        }
        Ok(self.dir.join(format!("{}.idx", name)))
    }

    pub fn load(&self, name: &str) -> Result<MessageIndex> {
        let bytes = fs::read(self.path_for(name)?)?;
        let index: MessageIndex = bincode::deserialize(&bytes)?;
        debug!("Loaded {} lines of history for {}", index.msg_size(), name);
        Ok(index)
    }

    pub fn save(&self, index: &MessageIndex) -> Result<()> {
        let path = self.path_for(index.name())?;
        fs::write(path, bincode::serialize(index)?)?;
        Ok(())
    }
}
