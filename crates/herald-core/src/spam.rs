//! Heuristic spam scoring for extracted article text.
//!
//! The score averages three signals, each normalised to [0, 1] against the
//! number of meaningful words in the text:
//!
//! - emoji density
//! - promotional-vocabulary density
//! - density of `!!`-style exclamation runs
//!
//! The sum is halved and capped at 1.0. Scores are cached by exact text since
//! the same article is often rescored by later pipeline stages.

use std::collections::HashSet;
use std::sync::LazyLock;

use moka::sync::Cache;

use crate::traits::TextScorer;

const DEFAULT_CACHE_CAPACITY: u64 = 1024;

/// Promotional vocabulary, matched against lowercased tokens.
pub const PROMO_WORDS: &[&str] = &[
    "bonus",
    "free",
    "offer",
    "deposit",
    "win",
    "prize",
    "reward",
    "exclusive",
    "limited",
    "special",
    "click",
    "subscribe",
    "guaranteed",
    "instant",
    "sale",
    "game",
    "code",
    "new",
    "lucky",
    "winner",
];

/// English stop words excluded from the word total.
const STOP_WORDS: &[&str] = &[
    "i", "me", "my", "myself", "we", "our", "ours", "ourselves", "you", "you're", "you've",
    "you'll", "you'd", "your", "yours", "yourself", "yourselves", "he", "him", "his", "himself",
    "she", "she's", "her", "hers", "herself", "it", "it's", "its", "itself", "they", "them",
    "their", "theirs", "themselves", "what", "which", "who", "whom", "this", "that", "that'll",
    "these", "those", "am", "is", "are", "was", "were", "be", "been", "being", "have", "has",
    "had", "having", "do", "does", "did", "doing", "a", "an", "the", "and", "but", "if", "or",
    "because", "as", "until", "while", "of", "at", "by", "for", "with", "about", "against",
    "between", "into", "through", "during", "before", "after", "above", "below", "to", "from",
    "up", "down", "in", "out", "on", "off", "over", "under", "again", "further", "then", "once",
    "here", "there", "when", "where", "why", "how", "all", "any", "both", "each", "few", "more",
    "most", "other", "some", "such", "no", "nor", "not", "only", "own", "same", "so", "than",
    "too", "very", "s", "t", "can", "will", "just", "don", "don't", "should", "should've", "now",
    "d", "ll", "m", "o", "re", "ve", "y", "ain", "aren", "aren't", "couldn", "couldn't", "didn",
    "didn't", "doesn", "doesn't", "hadn", "hadn't", "hasn", "hasn't", "haven", "haven't", "isn",
    "isn't", "ma", "mightn", "mightn't", "mustn", "mustn't", "needn", "needn't", "shan",
    "shan't", "shouldn", "shouldn't", "wasn", "wasn't", "weren", "weren't", "won", "won't",
    "wouldn", "wouldn't",
];

static STOP_WORD_SET: LazyLock<HashSet<&'static str>> =
    LazyLock::new(|| STOP_WORDS.iter().copied().collect());

static PROMO_WORD_SET: LazyLock<HashSet<&'static str>> =
    LazyLock::new(|| PROMO_WORDS.iter().copied().collect());

/// How the exclamation signal is normalised.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ExclamationMode {
    /// Runs of `!!` relative to word count (`runs / (words * 0.05)`).
    Density,
    /// Runs of `!!` against a fixed cap (`runs / cap`).
    Absolute { cap: u32 },
}

/// Scorer configuration.
#[derive(Debug, Clone)]
pub struct SpamConfig {
    pub exclamation: ExclamationMode,
    pub cache_capacity: u64,
}

impl Default for SpamConfig {
    fn default() -> Self {
        Self {
            exclamation: ExclamationMode::Density,
            cache_capacity: DEFAULT_CACHE_CAPACITY,
        }
    }
}

/// The three normalised components of a spam score.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpamSignals {
    pub emoji: f64,
    pub promo: f64,
    pub exclamation: f64,
}

impl SpamSignals {
    /// Combined score in [0, 1].
    pub fn score(&self) -> f64 {
        ((self.emoji + self.promo + self.exclamation) / 2.0).min(1.0)
    }
}

/// Thread-safe spam scorer with an exact-text result cache.
///
/// Construct once at startup and share it behind an `Arc`.
pub struct SpamScorer {
    config: SpamConfig,
    cache: Cache<String, f64>,
}

impl SpamScorer {
    pub fn new() -> Self {
        Self::with_config(SpamConfig::default())
    }

    pub fn with_config(config: SpamConfig) -> Self {
        let cache = Cache::new(config.cache_capacity);
        Self { config, cache }
    }

    /// Score `text`, consulting the cache first.
    pub fn score(&self, text: &str) -> f64 {
        if let Some(score) = self.cache.get(text) {
            return score;
        }
        let score = self.signals(text).score();
        self.cache.insert(text.to_string(), score);
        score
    }

    /// Compute the individual signals without touching the cache.
    pub fn signals(&self, text: &str) -> SpamSignals {
        let words = meaningful_words(text);
        let total = words.len().max(1) as f64;

        let promo_hits = words
            .iter()
            .filter(|w| PROMO_WORD_SET.contains(w.as_str()))
            .count() as f64;
        let emoji_count = text.chars().filter(|&c| is_emoji(c)).count() as f64;
        let runs = exclamation_runs(text) as f64;

        let exclamation = match self.config.exclamation {
            ExclamationMode::Density => runs / (total * 0.05),
            ExclamationMode::Absolute { cap } => runs / f64::from(cap.max(1)),
        };

        SpamSignals {
            emoji: (emoji_count / (total * 0.1)).min(1.0),
            promo: (promo_hits / (total * 0.25)).min(1.0),
            exclamation: exclamation.min(1.0),
        }
    }
}

impl Default for SpamScorer {
    fn default() -> Self {
        Self::new()
    }
}

impl TextScorer for SpamScorer {
    fn score(&self, text: &str) -> f64 {
        SpamScorer::score(self, text)
    }
}

/// Lowercased word tokens with punctuation (except `!`) stripped and stop
/// words removed.
fn meaningful_words(text: &str) -> Vec<String> {
    let stripped: String = text
        .to_lowercase()
        .chars()
        .filter(|&c| c == '!' || !c.is_ascii_punctuation())
        .collect();

    stripped
        .split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .filter(|w| !w.is_empty() && !STOP_WORD_SET.contains(w))
        .map(str::to_string)
        .collect()
}

/// Number of runs of two or more consecutive `!`.
fn exclamation_runs(text: &str) -> usize {
    let mut runs = 0;
    let mut current = 0;
    for c in text.chars() {
        if c == '!' {
            current += 1;
            if current == 2 {
                runs += 1;
            }
        } else {
            current = 0;
        }
    }
    runs
}

fn is_emoji(c: char) -> bool {
    matches!(
        c as u32,
        0x1F300..=0x1FAFF
            | 0x1F170..=0x1F251
            | 0x1F004
            | 0x1F0CF
            | 0x2600..=0x27BF
            | 0x2934..=0x2935
            | 0x25AA..=0x25AB
            | 0x25B6
            | 0x25C0
            | 0x25FB..=0x25FE
            | 0x21A9..=0x21AA
            | 0x2328
            | 0x23CF
            | 0x24C2
            | 0x2B05..=0x2B07
            | 0x2B1B..=0x2B1C
            | 0x2B50
            | 0x2B55
            | 0x231A..=0x231B
            | 0x23E9..=0x23F3
            | 0x23F8..=0x23FA
            | 0x2194..=0x2199
            | 0x00A9
            | 0x00AE
            | 0x203C
            | 0x2049
            | 0x2122
            | 0x2139
            | 0x3030
            | 0x303D
            | 0x3297
            | 0x3299
    )
}
