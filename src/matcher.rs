//! Phrase extraction and exact-phrase matching against the bufo catalog.
//!
//! A bufo's filename doubles as its description: `bufo-what-have-you-done.png`
//! carries the phrase "what have you done". The matcher tests each incoming
//! post for any catalog phrase occurring as a contiguous run of the post's
//! words; the first catalog entry wins.

use std::sync::LazyLock;

use aho_corasick::AhoCorasick;
use anyhow::{Context, Result};
use regex::Regex;
use tracing::info;

use crate::catalog::Bufo;

/// Letter runs only; digits and punctuation separate words and are dropped.
static WORD_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new("[a-z]+").unwrap());

/// Lowercase a text and split it into maximal runs of ASCII letters.
pub fn tokenize(text: &str) -> Vec<String> {
    let lowered = text.to_lowercase();
    WORD_RE
        .find_iter(&lowered)
        .map(|m| m.as_str().to_string())
        .collect()
}

/// Extract the phrase words from a bufo filename, preserving order.
///
/// Strips the extension, treats `-` and `_` as spaces, tokenizes, and drops
/// a single leading "bufo". The result may be empty.
pub fn extract_phrase(name: &str) -> Vec<String> {
    let stem = match name.rsplit_once('.') {
        Some((stem, _ext)) => stem,
        None => name,
    };
    let spaced = stem.replace(['-', '_'], " ");
    let mut words = tokenize(&spaced);
    if words.first().map(String::as_str) == Some("bufo") {
        words.remove(0);
    }
    words
}

/// A matched bufo, with the phrase that triggered it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufoMatch {
    pub name: String,
    pub url: String,
    pub phrase: String,
}

/// Exact-phrase index over the catalog.
///
/// Each phrase is rendered space-padded (` what have you done `) and all of
/// them are compiled into one Aho-Corasick automaton; post text gets the
/// same rendering, so an automaton hit is exactly a contiguous token-run
/// hit. Precedence is catalog order: the scan collects overlapping hits and
/// keeps the lowest pattern index, not the leftmost text position.
pub struct BufoMatcher {
    min_words: usize,
    entries: Vec<(Bufo, Vec<String>)>,
    automaton: Option<AhoCorasick>,
}

impl BufoMatcher {
    /// Build the phrase index, keeping only bufos whose phrase has at least
    /// `min_words` words.
    pub fn new(bufos: Vec<Bufo>, min_words: usize) -> Result<Self> {
        let mut entries = Vec::new();
        let mut patterns = Vec::new();
        for bufo in bufos {
            let phrase = extract_phrase(&bufo.name);
            if phrase.len() >= min_words {
                patterns.push(format!(" {} ", phrase.join(" ")));
                entries.push((bufo, phrase));
            }
        }
        let automaton = if patterns.is_empty() {
            None
        } else {
            Some(AhoCorasick::new(&patterns).context("failed to build phrase automaton")?)
        };
        info!(
            "indexed {} bufos with phrases of {min_words}+ words",
            entries.len()
        );
        Ok(Self {
            min_words,
            entries,
            automaton,
        })
    }

    /// Number of indexed phrases.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Find the first catalog entry whose phrase occurs as a contiguous run
    /// of words in `text`, if any.
    pub fn find_match(&self, text: &str) -> Option<BufoMatch> {
        let automaton = self.automaton.as_ref()?;
        let tokens = tokenize(text);
        if tokens.len() < self.min_words {
            return None;
        }
        let haystack = format!(" {} ", tokens.join(" "));
        let first = automaton
            .find_overlapping_iter(&haystack)
            .map(|m| m.pattern().as_usize())
            .min()?;
        let (bufo, phrase) = &self.entries[first];
        Some(BufoMatch {
            name: bufo.name.clone(),
            url: bufo.url.clone(),
            phrase: phrase.join(" "),
        })
    }
}
