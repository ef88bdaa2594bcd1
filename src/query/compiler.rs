use std::collections::BTreeMap;
use std::fmt;
use std::mem;

use tracing::{debug, info, warn};

use super::QueryError;
use super::terms::TermSet;

/// Maximum PowerTrack rule length accepted by the premium full-archive endpoint.
pub const DEFAULT_QUERY_LIMIT: usize = 1024;

const OR_SEPARATOR: &str = " OR ";

/// A compiled PowerTrack rule. Length is counted in characters, not bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query(String);

impl Query {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.chars().count()
    }
}

impl fmt::Display for Query {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Result of [`normalize`]: the deduplicated terms plus the lower-cased forms that had duplicates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Normalized {
    pub terms: TermSet,
    pub duplicates: Vec<String>,
}

fn lowercase_counts<S: AsRef<str>>(terms: &[S]) -> BTreeMap<String, usize> {
    let mut counts = BTreeMap::new();
    for term in terms {
        *counts.entry(term.as_ref().to_lowercase()).or_insert(0) += 1;
    }
    counts
}

fn duplicated(counts: &BTreeMap<String, usize>) -> Vec<String> {
    counts
        .iter()
        .filter(|(_, n)| **n > 1)
        .map(|(term, _)| term.clone())
        .collect()
}

/// Lower-case, deduplicate, and sort terms.
///
/// Duplicates are removed silently apart from an informational log event; use
/// [`assert_unique`] first when a duplicate should be a hard failure.
pub fn normalize<S: AsRef<str>>(terms: &[S]) -> Normalized {
    let counts = lowercase_counts(terms);
    let duplicates = duplicated(&counts);

    if !duplicates.is_empty() {
        info!(
            count = duplicates.len(),
            duplicates = ?duplicates,
            "removing duplicate term(s)"
        );
    }

    Normalized {
        terms: TermSet::from_sorted(counts.into_keys().collect()),
        duplicates,
    }
}

/// Fail with [`QueryError::DuplicateTerms`] if any two terms are equal ignoring case.
pub fn assert_unique<S: AsRef<str>>(terms: &[S]) -> Result<(), QueryError> {
    let duplicates = duplicated(&lowercase_counts(terms));
    if duplicates.is_empty() {
        Ok(())
    } else {
        Err(QueryError::DuplicateTerms(duplicates))
    }
}

/// Join terms into `a OR b OR c`, optionally wrapped as `(a OR b) lang:<lang>`.
///
/// Terms are used in the given order. Exceeding `limit` is an error, never a truncation.
pub fn compile<S: AsRef<str>>(
    terms: &[S],
    lang: Option<&str>,
    limit: usize,
) -> Result<Query, QueryError> {
    let joined = terms
        .iter()
        .map(AsRef::as_ref)
        .collect::<Vec<&str>>()
        .join(OR_SEPARATOR);

    let query = match lang.filter(|l| !l.is_empty()) {
        Some(lang) => format!("({joined}) lang:{lang}"),
        None => joined,
    };

    let length = query.chars().count();
    if length > limit {
        return Err(QueryError::QueryTooLong { length, limit });
    }
    Ok(Query(query))
}

/// Ordered bins of terms, each compiling (without a language filter) to at most `limit` characters,
/// except for bins holding a single term that is already over the limit by itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TermPartition {
    bins: Vec<TermSet>,
    limit: usize,
}

impl TermPartition {
    pub fn bins(&self) -> &[TermSet] {
        &self.bins
    }

    pub fn len(&self) -> usize {
        self.bins.len()
    }

    /// Bins (0-indexed) whose compiled query is over the limit.
    pub fn oversized(&self) -> impl Iterator<Item = (usize, &TermSet)> {
        self.bins
            .iter()
            .enumerate()
            .filter(|(_, bin)| compile(bin.as_slice(), None, self.limit).is_err())
    }
}

/// Compiles term lists against a fixed query length limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryCompiler {
    limit: usize,
}

impl Default for QueryCompiler {
    fn default() -> Self {
        Self::new(DEFAULT_QUERY_LIMIT)
    }
}

impl QueryCompiler {
    pub fn new(limit: usize) -> Self {
        Self { limit }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn compile<S: AsRef<str>>(
        &self,
        terms: &[S],
        lang: Option<&str>,
    ) -> Result<Query, QueryError> {
        compile(terms, lang, self.limit)
    }

    /// Greedily pack normalized terms into bins that each compile within the limit.
    ///
    /// Single pass in sorted order; a term that does not fit closes the current bin and
    /// opens the next one. Never fails: a term longer than the limit gets a bin of its own.
    pub fn partition<S: AsRef<str>>(&self, terms: &[S]) -> TermPartition {
        let Normalized { terms, .. } = normalize(terms);

        let mut bins = Vec::new();
        let mut current: Vec<String> = Vec::new();
        // Character length of `compile(current, None)`.
        let mut current_len = 0;

        for term in terms.into_vec() {
            let term_len = term.chars().count();

            if !current.is_empty() {
                let tentative = current_len + OR_SEPARATOR.len() + term_len;
                if tentative <= self.limit {
                    current_len = tentative;
                    current.push(term);
                    continue;
                }
                bins.push(TermSet::from_sorted(mem::take(&mut current)));
            }

            if term_len > self.limit {
                warn!(
                    term = %term,
                    length = term_len,
                    limit = self.limit,
                    "term exceeds query limit on its own, placing it in an oversized bin"
                );
            }
            current_len = term_len;
            current.push(term);
        }

        if !current.is_empty() {
            bins.push(TermSet::from_sorted(current));
        }

        debug!(bins = bins.len(), limit = self.limit, "terms partitioned");
        TermPartition {
            bins,
            limit: self.limit,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(terms: &[&str]) -> Vec<String> {
        terms.iter().map(|t| t.to_string()).collect()
    }

    #[test]
    fn normalize_lowercases_sorts_and_dedups() {
        let normalized = normalize(&["B", "a", "A"]);
        assert_eq!(normalized.terms.as_slice(), strings(&["a", "b"]).as_slice());
        assert_eq!(normalized.duplicates, vec!["a".to_string()]);
    }

    #[test]
    fn normalize_is_idempotent() {
        let input = ["Rust", "rust", "Go", "zig", "ZIG", "c"];
        let once = normalize(&input).terms;
        let twice = normalize(once.as_slice()).terms;
        assert_eq!(once, twice);
    }

    #[test]
    fn normalize_is_independent_of_input_order() {
        let a = normalize(&["delta", "Alpha", "charlie", "BRAVO"]).terms;
        let b = normalize(&["bravo", "charlie", "ALPHA", "Delta"]).terms;
        assert_eq!(a, b);
        assert_eq!(
            a.as_slice(),
            strings(&["alpha", "bravo", "charlie", "delta"]).as_slice()
        );
    }

    #[test]
    fn normalize_output_has_no_case_insensitive_duplicates() {
        let terms = normalize(&["Tea", "tEa", "TEA", "coffee", "Coffee", "water"]).terms;
        assert!(assert_unique(terms.as_slice()).is_ok());
        assert_eq!(terms.len(), 3);
    }

    #[test]
    fn normalize_without_duplicates_reports_none() {
        let normalized = normalize(&["one", "two"]);
        assert!(normalized.duplicates.is_empty());
    }

    #[test]
    fn assert_unique_reports_case_insensitive_duplicates() {
        let err = assert_unique(&["Cat", "dog", "cat", "DOG", "eel"]).unwrap_err();
        match err {
            QueryError::DuplicateTerms(dups) => {
                assert_eq!(dups, strings(&["cat", "dog"]));
            }
            other => panic!("expected DuplicateTerms, got: {other:?}"),
        }
    }

    #[test]
    fn assert_unique_error_message_lists_terms() {
        let err = assert_unique(&["x", "X"]).unwrap_err();
        assert_eq!(err.to_string(), "found 1 duplicated term(s): x");
    }

    #[test]
    fn compile_joins_with_or() {
        let query = compile(&["cat", "dog", "eel"], None, DEFAULT_QUERY_LIMIT).unwrap();
        assert_eq!(query.as_str(), "cat OR dog OR eel");
    }

    #[test]
    fn compile_with_lang_wraps_in_parens() {
        let query = compile(&["x", "y"], Some("en"), DEFAULT_QUERY_LIMIT).unwrap();
        assert_eq!(query.as_str(), "(x OR y) lang:en");
    }

    #[test]
    fn compile_treats_empty_lang_as_none() {
        let query = compile(&["x", "y"], Some(""), DEFAULT_QUERY_LIMIT).unwrap();
        assert_eq!(query.as_str(), "x OR y");
    }

    #[test]
    fn compile_length_exactly_at_limit_succeeds() {
        let query = compile(&["cat", "dog"], None, 10).unwrap();
        assert_eq!(query.len(), 10);
    }

    #[test]
    fn compile_one_over_limit_fails() {
        let err = compile(&["cat", "dog"], None, 9).unwrap_err();
        assert!(matches!(
            err,
            QueryError::QueryTooLong {
                length: 10,
                limit: 9
            }
        ));
    }

    #[test]
    fn compile_counts_lang_suffix_toward_limit() {
        // "(cat OR dog) lang:en" is 20 characters
        assert!(compile(&["cat", "dog"], Some("en"), 20).is_ok());
        assert!(compile(&["cat", "dog"], Some("en"), 19).is_err());
    }

    #[test]
    fn compile_counts_characters_not_bytes() {
        let query = compile(&["日本", "東京"], None, 8).unwrap();
        assert_eq!(query.len(), 8);
        assert!(query.as_str().len() > 8);
    }

    #[test]
    fn compiler_uses_configured_limit() {
        let compiler = QueryCompiler::new(5);
        assert!(compiler.compile(&["abcde"], None).is_ok());
        assert!(compiler.compile(&["abcdef"], None).is_err());
        assert_eq!(QueryCompiler::default().limit(), DEFAULT_QUERY_LIMIT);
    }

    #[test]
    fn partition_is_greedy_in_sorted_order() {
        let partition = QueryCompiler::new(9).partition(&["ccc", "bb", "a"]);
        let bins: Vec<&[String]> = partition.bins().iter().map(|b| b.as_slice()).collect();
        assert_eq!(
            bins,
            vec![strings(&["a", "bb"]).as_slice(), strings(&["ccc"]).as_slice()]
        );
    }

    #[test]
    fn partition_covers_normalized_terms_within_limit() {
        let input: Vec<String> = (0..200)
            .map(|i| format!("term{}", i * 7919 % 1000))
            .chain(["TERM1".to_string(), "Term7".to_string()])
            .collect();
        let limit = 64;
        let partition = QueryCompiler::new(limit).partition(&input);

        let flattened: Vec<String> = partition
            .bins()
            .iter()
            .flat_map(|bin| bin.iter().cloned())
            .collect();
        assert_eq!(flattened.as_slice(), normalize(&input).terms.as_slice());

        for bin in partition.bins() {
            assert!(!bin.is_empty());
            assert!(compile(bin.as_slice(), None, limit).is_ok(), "bin over limit: {bin:?}");
        }
        assert_eq!(partition.oversized().count(), 0);
    }

    #[test]
    fn partition_places_oversized_term_alone() {
        let partition = QueryCompiler::new(6).partition(&["a", "enormous", "z"]);
        let bins: Vec<&[String]> = partition.bins().iter().map(|b| b.as_slice()).collect();
        assert_eq!(
            bins,
            vec![
                strings(&["a"]).as_slice(),
                strings(&["enormous"]).as_slice(),
                strings(&["z"]).as_slice(),
            ]
        );
        let oversized: Vec<usize> = partition.oversized().map(|(i, _)| i).collect();
        assert_eq!(oversized, vec![1]);
    }

    #[test]
    fn partition_of_empty_input_is_empty() {
        let partition = QueryCompiler::default().partition::<&str>(&[]);
        assert!(partition.bins().is_empty());
    }

    #[test]
    fn partition_fits_everything_in_one_bin_when_possible() {
        let partition = QueryCompiler::default().partition(&["one", "two", "three"]);
        assert_eq!(partition.len(), 1);
        assert_eq!(
            compile(partition.bins()[0].as_slice(), None, DEFAULT_QUERY_LIMIT)
                .unwrap()
                .as_str(),
            "one OR three OR two"
        );
    }
}
