use crate::traits::TextScorer;

/// Phrases that mark a short page as a paywall or error page.
pub const DEFAULT_EXIT_PATTERNS: &[&str] = &["free subscription for", "page not found"];

/// Thresholds applied to extracted article text.
#[derive(Debug, Clone)]
pub struct QualityPolicy {
    /// Minimum word count, inclusive.
    pub min_words: u32,
    /// Texts shorter than this are held to the spam ceiling and exit patterns.
    pub spam_check_max_words: u32,
    /// Short texts scoring strictly above this are rejected as spam.
    pub max_spam_score: f64,
    /// Lowercase phrases that reject a short text as spam.
    pub exit_patterns: Vec<String>,
}

impl Default for QualityPolicy {
    fn default() -> Self {
        Self {
            min_words: 50,
            spam_check_max_words: 200,
            max_spam_score: 0.2,
            exit_patterns: DEFAULT_EXIT_PATTERNS.iter().map(|p| p.to_string()).collect(),
        }
    }
}

/// Outcome of judging one text.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Verdict {
    /// Below `min_words`. The scorer never ran.
    TooShort,
    /// Short text over the spam ceiling, or matching an exit pattern.
    Spam { score: f64 },
    Accept { score: f64 },
}

impl QualityPolicy {
    pub fn evaluate<S: TextScorer + ?Sized>(
        &self,
        text: &str,
        word_count: u32,
        scorer: &S,
    ) -> Verdict {
        if word_count < self.min_words {
            return Verdict::TooShort;
        }

        let score = scorer.score(text);
        let short = word_count < self.spam_check_max_words;
        if short && (score > self.max_spam_score || self.hits_exit_pattern(text)) {
            Verdict::Spam { score }
        } else {
            Verdict::Accept { score }
        }
    }

    fn hits_exit_pattern(&self, text: &str) -> bool {
        if self.exit_patterns.is_empty() {
            return false;
        }
        let lower = text.to_lowercase();
        self.exit_patterns
            .iter()
            .any(|p| lower.contains(&p.to_lowercase()))
    }
}
