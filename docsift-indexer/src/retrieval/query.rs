//! Search query parsing.
//!
//! Double-quoted segments are exact phrases; everything else splits on
//! whitespace into terms, and all items must match. The trigram tokenizer
//! cannot represent phrases that contain punctuation or needles shorter than
//! three characters, so those queries are answered with a literal substring
//! scan instead of the ranked full-text engine.

use serde::{Deserialize, Serialize};

/// Shortest needle the trigram tokenizer can match.
pub const MIN_TOKEN_CHARS: usize = 3;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParsedQuery {
    pub phrases: Vec<String>,
    pub terms: Vec<String>,
}

impl ParsedQuery {
    pub fn parse(input: &str) -> Self {
        let mut parsed = Self::default();
        let mut rest = input;

        while let Some(open) = rest.find('"') {
            parsed.push_terms(&rest[..open]);
            let after = &rest[open + 1..];
            match after.find('"') {
                Some(close) => {
                    let phrase = after[..close].trim();
                    if !phrase.is_empty() {
                        parsed.phrases.push(phrase.to_string());
                    }
                    rest = &after[close + 1..];
                }
                None => {
                    // Unbalanced quote: treat the tail as plain terms
                    rest = after;
                    break;
                }
            }
        }
        parsed.push_terms(rest);
        parsed
    }

    fn push_terms(&mut self, text: &str) {
        self.terms
            .extend(text.split_whitespace().map(str::to_string));
    }

    pub fn is_empty(&self) -> bool {
        self.phrases.is_empty() && self.terms.is_empty()
    }

    /// Phrases followed by terms.
    pub fn needles(&self) -> Vec<String> {
        self.phrases
            .iter()
            .chain(self.terms.iter())
            .cloned()
            .collect()
    }

    /// Lowercased needles for case-insensitive matching.
    pub fn lowercase_needles(&self) -> Vec<String> {
        self.needles().iter().map(|n| n.to_lowercase()).collect()
    }

    /// Whether the query must bypass the ranked engine.
    pub fn requires_literal(&self) -> bool {
        let punctuated = self
            .phrases
            .iter()
            .any(|p| p.chars().any(|c| !c.is_alphanumeric() && !c.is_whitespace()));
        let too_short = self
            .needles()
            .iter()
            .any(|n| n.chars().count() < MIN_TOKEN_CHARS);
        punctuated || too_short
    }

    /// FTS5 match expression: every item quoted, joined by implicit AND.
    pub fn fts_expression(&self) -> String {
        self.needles()
            .iter()
            .map(|n| format!("\"{}\"", n.replace('"', "\"\"")))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_phrases_and_terms() {
        let q = ParsedQuery::parse(r#"budget "alpha & beta" 2024  report"#);
        assert_eq!(q.phrases, vec!["alpha & beta"]);
        assert_eq!(q.terms, vec!["budget", "2024", "report"]);
        assert_eq!(q.needles()[0], "alpha & beta");
    }

    #[test]
    fn test_unbalanced_quote_becomes_terms() {
        let q = ParsedQuery::parse(r#"annual "draft notes"#);
        assert!(q.phrases.is_empty());
        assert_eq!(q.terms, vec!["annual", "draft", "notes"]);
    }

    #[test]
    fn test_empty_query() {
        assert!(ParsedQuery::parse("   ").is_empty());
        assert!(ParsedQuery::parse(r#""  ""#).is_empty());
    }

    #[test]
    fn test_literal_routing() {
        assert!(ParsedQuery::parse(r#""alpha & beta""#).requires_literal());
        assert!(ParsedQuery::parse("go team").requires_literal());
        assert!(!ParsedQuery::parse(r#""alpha beta" gamma"#).requires_literal());
        // Punctuation inside a bare term is left to the tokenizer
        assert!(!ParsedQuery::parse("c++ compiler").requires_literal());
    }

    #[test]
    fn test_fts_expression_quotes_items() {
        let q = ParsedQuery::parse(r#""north wind" delta"#);
        assert_eq!(q.fts_expression(), r#""north wind" "delta""#);

        let q = ParsedQuery {
            phrases: vec![],
            terms: vec![r#"say"hi"#.to_string()],
        };
        assert_eq!(q.fts_expression(), r#""say""hi""#);
    }
}
