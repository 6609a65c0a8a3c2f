/// FAQ knowledge base and lexical ranking.
///
/// A `FaqCorpus` is built once and never mutated. Reloading means building a new
/// corpus and swapping it into a `FaqSnapshot`, so a search in flight keeps the
/// corpus it started with.
use std::path::Path;
use std::sync::{Arc, RwLock};

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::CorpusError;
use crate::text::{normalize, score};

pub const DEFAULT_TOP_K: usize = 3;

const BUILTIN_FAQ: &str = include_str!("../data/faq.json");

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct FaqEntry {
    pub question: String,
    pub answer: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FaqMatch<'a> {
    pub entry: &'a FaqEntry,
    pub score: usize,
}

#[derive(Debug)]
struct IndexedEntry {
    entry: FaqEntry,
    question_tokens: Vec<String>,
}

#[derive(Debug, Default)]
pub struct FaqCorpus {
    entries: Vec<IndexedEntry>,
}

impl FaqCorpus {
    /// Build a corpus. Entry order is kept and breaks ties between equal scores.
    pub fn new(entries: Vec<FaqEntry>) -> Self {
        let entries = entries
            .into_iter()
            .map(|entry| IndexedEntry {
                question_tokens: normalize(&entry.question),
                entry,
            })
            .collect();
        Self { entries }
    }

    /// The bank FAQ bundled with the crate.
    pub fn builtin() -> Result<Self, CorpusError> {
        Self::from_json(BUILTIN_FAQ)
    }

    /// Parse a JSON array of `{"question", "answer"}` objects.
    pub fn from_json(raw: &str) -> Result<Self, CorpusError> {
        let entries: Vec<FaqEntry> = serde_json::from_str(raw)?;
        Ok(Self::new(entries))
    }

    pub fn load(path: &Path) -> Result<Self, CorpusError> {
        let raw = std::fs::read_to_string(path).map_err(|source| CorpusError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&raw)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> impl Iterator<Item = &FaqEntry> {
        self.entries.iter().map(|e| &e.entry)
    }

    /// Score every entry against `query` and return the best `top_k` with a
    /// positive score, highest first. Equal scores keep corpus order.
    pub fn rank(&self, query: &str, top_k: usize) -> Vec<FaqMatch<'_>> {
        if top_k == 0 {
            return Vec::new();
        }
        let query_tokens = normalize(query);
        if query_tokens.is_empty() {
            return Vec::new();
        }

        let mut matches: Vec<FaqMatch<'_>> = self
            .entries
            .iter()
            .filter_map(|indexed| {
                let score = score(&query_tokens, &indexed.question_tokens);
                (score > 0).then_some(FaqMatch {
                    entry: &indexed.entry,
                    score,
                })
            })
            .collect();

        // `sort_by` is stable, which is what keeps ties in corpus order.
        matches.sort_by(|a, b| b.score.cmp(&a.score));
        matches.truncate(top_k);

        debug!(query, top_k, matched = matches.len(), "faq ranked");
        matches
    }

    pub fn search(&self, query: &str, top_k: usize) -> Vec<FaqEntry> {
        self.rank(query, top_k)
            .into_iter()
            .map(|m| m.entry.clone())
            .collect()
    }
}

/// Shared, swappable handle to the current corpus.
#[derive(Debug, Clone)]
pub struct FaqSnapshot {
    current: Arc<RwLock<Arc<FaqCorpus>>>,
}

impl FaqSnapshot {
    pub fn new(corpus: FaqCorpus) -> Self {
        Self {
            current: Arc::new(RwLock::new(Arc::new(corpus))),
        }
    }

    pub fn current(&self) -> Arc<FaqCorpus> {
        // A poisoned lock still holds a complete corpus; the swap is a single store.
        match self.current.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    /// Install `corpus` as the new current corpus and return the previous one.
    pub fn replace(&self, corpus: FaqCorpus) -> Arc<FaqCorpus> {
        let next = Arc::new(corpus);
        let mut guard = match self.current.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        std::mem::replace(&mut *guard, next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(question: &str) -> FaqEntry {
        FaqEntry {
            question: question.to_string(),
            answer: format!("answer: {question}"),
        }
    }

    fn questions(results: &[FaqEntry]) -> Vec<&str> {
        results.iter().map(|e| e.question.as_str()).collect()
    }

    #[test]
    fn best_match_comes_first() {
        let corpus = FaqCorpus::new(vec![
            entry("Какой лимит на снятие наличных?"),
            entry("Как узнать баланс карты?"),
        ]);
        let ranked = corpus.rank("баланс карты", 3);
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].entry.question, "Как узнать баланс карты?");
        assert_eq!(ranked[0].score, 2);
    }

    #[test]
    fn equal_scores_keep_corpus_order() {
        let corpus = FaqCorpus::new(vec![
            entry("лимит первый"),
            entry("нет совпадений"),
            entry("лимит второй"),
            entry("лимит лимит третий"),
        ]);
        let results = corpus.search("лимит", 10);
        assert_eq!(
            questions(&results),
            vec!["лимит первый", "лимит второй", "лимит лимит третий"]
        );
    }

    #[test]
    fn higher_score_beats_earlier_position() {
        let corpus = FaqCorpus::new(vec![
            entry("перевод"),
            entry("перевод на карту"),
            entry("карту"),
        ]);
        let ranked = corpus.rank("перевод на карту", 3);
        let scores: Vec<usize> = ranked.iter().map(|m| m.score).collect();
        assert_eq!(scores, vec![3, 1, 1]);
        assert_eq!(ranked[0].entry.question, "перевод на карту");
        assert_eq!(ranked[1].entry.question, "перевод");
        assert_eq!(ranked[2].entry.question, "карту");
    }

    #[test]
    fn results_are_truncated_to_top_k() {
        let corpus = FaqCorpus::new((0..10).map(|i| entry(&format!("карта {i}"))).collect());
        assert_eq!(corpus.search("карта", 3).len(), 3);
        assert_eq!(corpus.search("карта", 25).len(), 10);
    }

    #[test]
    fn empty_query_or_zero_k_returns_nothing() {
        let corpus = FaqCorpus::builtin().unwrap();
        assert!(corpus.search("", 3).is_empty());
        assert!(corpus.search("?..", 3).is_empty());
        assert!(corpus.search("баланс", 0).is_empty());
    }

    #[test]
    fn empty_corpus_is_valid() {
        let corpus = FaqCorpus::default();
        assert!(corpus.is_empty());
        assert!(corpus.search("баланс", 3).is_empty());
    }

    #[test]
    fn builtin_corpus_answers_balance_question() {
        let corpus = FaqCorpus::builtin().unwrap();
        assert!(corpus.len() >= 10);

        let ranked = corpus.rank("баланс карты", DEFAULT_TOP_K);
        assert_eq!(ranked[0].entry.question, "Как узнать баланс карты?");
        assert_eq!(ranked[0].score, 2);
        assert!(ranked.windows(2).all(|w| w[0].score >= w[1].score));
        assert!(ranked.iter().all(|m| m.score > 0));
    }

    #[test]
    fn search_is_repeatable() {
        let corpus = FaqCorpus::builtin().unwrap();
        let first = corpus.search("Какой лимит на переводы?", 3);
        let second = corpus.search("Какой лимит на переводы?", 3);
        assert_eq!(first, second);
    }

    #[test]
    fn from_json_rejects_bad_documents() {
        assert!(FaqCorpus::from_json("{\"question\": \"x\"}").is_err());
        assert!(FaqCorpus::from_json("[{\"question\": \"x\"}]").is_err());
        assert!(FaqCorpus::from_json("[]").unwrap().is_empty());
    }

    #[test]
    fn load_reports_missing_file() {
        let err = FaqCorpus::load(Path::new("/nonexistent/faq.json")).unwrap_err();
        assert!(matches!(err, CorpusError::Io { .. }));
    }

    #[test]
    fn snapshot_swap_leaves_old_readers_intact() {
        let snapshot = FaqSnapshot::new(FaqCorpus::new(vec![entry("старый баланс")]));
        let before = snapshot.current();

        let previous = snapshot.replace(FaqCorpus::new(vec![entry("новый баланс")]));
        assert!(Arc::ptr_eq(&before, &previous));

        assert_eq!(questions(&before.search("баланс", 3)), vec!["старый баланс"]);
        assert_eq!(
            questions(&snapshot.current().search("баланс", 3)),
            vec!["новый баланс"]
        );
    }
}
