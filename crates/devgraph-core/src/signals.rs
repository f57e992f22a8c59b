//! Keyword frequencies and behavioural signals over free text.
//!
//! Signals are computed once at summarization time and stored on the
//! EntitySummary so pattern typing never has to re-read source content.

use std::collections::BTreeMap;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Keyword groups, matched case-insensitively on word boundaries.
static KEYWORD_GROUPS: Lazy<Vec<(&'static str, Regex)>> = Lazy::new(|| {
    [
        ("error", r"\b(error|exception|fail|crash|bug)\b"),
        ("debug", r"\b(debug|trace|log|console)\b"),
        ("fix", r"\b(fix|patch|resolve|solve)\b"),
        ("issue", r"\b(issue|problem|trouble|wrong)\b"),
        ("learn", r"\b(learn|study|understand|research)\b"),
        ("implement", r"\b(implement|build|create|develop)\b"),
        ("understand", r"\b(understand|comprehend|grasp)\b"),
        ("architecture", r"\b(architecture|structure|design)\b"),
        ("pattern", r"\b(pattern|paradigm|approach)\b"),
        ("system", r"\b(system|infrastructure|framework)\b"),
        ("component", r"\b(component|module|service)\b"),
        ("refactor", r"\b(refactor|restructure|reorganize)\b"),
        ("improve", r"\b(improve|enhance|optimize)\b"),
        ("clean", r"\b(clean|tidy|organize)\b"),
        ("test", r"\b(test|testing|spec|unit)\b"),
        ("deploy", r"\b(deploy|deployment|production)\b"),
        ("performance", r"\b(performance|speed|latency|optimize)\b"),
        ("security", r"\b(security|auth|authentication|permission)\b"),
    ]
    .into_iter()
    .filter_map(|(name, pattern)| Regex::new(pattern).ok().map(|re| (name, re)))
    .collect()
});

static TECH_TERMS: Lazy<Option<Regex>> = Lazy::new(|| {
    Regex::new(r"\b(api|database|function|class|method|variable|async|promise|query|schema)\b").ok()
});

static INVESTIGATION: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"\b(investigate|investigating|why|root cause)\b").ok());

/// Groups whose hits raise the urgency score.
const URGENT_GROUPS: &[&str] = &["error", "fix", "issue"];

/// Behavioural flags and scores for one summarized entity.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PatternSignals {
    pub is_debugging: bool,
    pub is_learning: bool,
    pub is_refactoring: bool,
    pub is_architecture: bool,
    pub is_problem_solving: bool,
    pub complexity_score: f64,
    pub urgency_score: f64,
}

/// Count keyword-group hits. Groups with no hits are omitted.
pub fn keyword_frequencies(text: &str) -> BTreeMap<String, u32> {
    let lower = text.to_lowercase();
    KEYWORD_GROUPS
        .iter()
        .filter_map(|(name, re)| {
            let count = re.find_iter(&lower).count() as u32;
            (count > 0).then(|| (name.to_string(), count))
        })
        .collect()
}

/// Derive behavioural signals from text and its keyword frequencies.
pub fn pattern_signals(text: &str, keywords: &BTreeMap<String, u32>) -> PatternSignals {
    let hits = |group: &str| keywords.get(group).copied().unwrap_or(0);
    let lower = text.to_lowercase();
    let investigating = INVESTIGATION
        .as_ref()
        .map(|re| re.is_match(&lower))
        .unwrap_or(false);

    PatternSignals {
        is_debugging: hits("error") > 0 || hits("fix") > 0,
        is_learning: hits("learn") > 0 || hits("understand") > 0,
        is_refactoring: hits("refactor") > 0 || hits("improve") > 0,
        is_architecture: hits("architecture") > 0 || hits("pattern") > 0,
        is_problem_solving: investigating || (hits("issue") > 0 && hits("fix") > 0),
        complexity_score: complexity_score(&lower),
        urgency_score: urgency_score(keywords),
    }
}

/// Length, fenced code blocks and technical vocabulary, weighted 0.3/0.3/0.4.
pub fn complexity_score(text: &str) -> f64 {
    if text.is_empty() {
        return 0.0;
    }
    let length = (text.chars().count() as f64 / 1000.0).min(1.0) * 0.3;
    let fences = text.matches("```").count() as f64 / 10.0 * 0.3;
    let terms = TECH_TERMS
        .as_ref()
        .map(|re| re.find_iter(&text.to_lowercase()).count())
        .unwrap_or(0) as f64
        / 20.0
        * 0.4;
    (length + fences + terms).min(1.0)
}

pub fn urgency_score(keywords: &BTreeMap<String, u32>) -> f64 {
    let urgent: u32 = URGENT_GROUPS
        .iter()
        .map(|g| keywords.get(*g).copied().unwrap_or(0))
        .sum();
    (urgent as f64 / 10.0).min(1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keyword_groups_compile() {
        assert_eq!(KEYWORD_GROUPS.len(), 18);
        assert!(TECH_TERMS.is_some());
        assert!(INVESTIGATION.is_some());
    }

    #[test]
    fn test_keyword_frequencies_counts_case_insensitively() {
        let kw = keyword_frequencies("Error! another ERROR and a crash. Fix it.");
        assert_eq!(kw.get("error"), Some(&3));
        assert_eq!(kw.get("fix"), Some(&1));
        assert!(!kw.contains_key("deploy"));
    }

    #[test]
    fn test_keyword_frequencies_word_boundaries() {
        let kw = keyword_frequencies("errors are prefixed, logging is fine");
        assert!(!kw.contains_key("error"));
        assert!(!kw.contains_key("fix"));
        assert!(!kw.contains_key("debug"));
    }

    #[test]
    fn test_debugging_signal() {
        let text = "Stack trace shows a bug in the parser, need a fix";
        let kw = keyword_frequencies(text);
        let signals = pattern_signals(text, &kw);
        assert!(signals.is_debugging);
        assert!(!signals.is_learning);
    }

    #[test]
    fn test_learning_signal() {
        let text = "Trying to understand how the borrow checker works; research notes";
        let kw = keyword_frequencies(text);
        let signals = pattern_signals(text, &kw);
        assert!(signals.is_learning);
        assert!(!signals.is_debugging);
    }

    #[test]
    fn test_problem_solving_signal() {
        let text = "Let's investigate why the cache misses";
        let signals = pattern_signals(text, &keyword_frequencies(text));
        assert!(signals.is_problem_solving);
    }

    #[test]
    fn test_complexity_score_bounds() {
        assert_eq!(complexity_score(""), 0.0);
        let long = "api database function ```".repeat(200);
        assert_eq!(complexity_score(&long), 1.0);
    }

    #[test]
    fn test_complexity_score_length_component() {
        let text = "a".repeat(1000);
        assert!((complexity_score(&text) - 0.3).abs() < 1e-9);
    }

    #[test]
    fn test_urgency_score() {
        let mut kw = BTreeMap::new();
        kw.insert("error".to_string(), 4);
        kw.insert("issue".to_string(), 1);
        kw.insert("learn".to_string(), 9);
        assert!((urgency_score(&kw) - 0.5).abs() < 1e-9);

        kw.insert("fix".to_string(), 20);
        assert_eq!(urgency_score(&kw), 1.0);
    }
}
