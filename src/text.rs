//! Tokenizing and entity extraction shared by providers and the document store.

use fancy_regex::Regex;
use std::collections::HashSet;
use std::sync::LazyLock;

const STOP_WORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "but", "by", "can", "do", "does", "for", "from",
    "has", "have", "how", "i", "in", "is", "it", "its", "me", "of", "on", "or", "so", "that",
    "the", "their", "this", "to", "was", "what", "whats", "when", "where", "which", "who", "why",
    "will", "with", "you", "your", "about", "today", "now", "latest", "tell", "show", "any",
];

/// Uppercase words that look like tickers but almost never are in a question.
const NOT_TICKERS: &[&str] = &[
    "A", "I", "AI", "CEO", "CFO", "USA", "US", "UK", "EU", "GDP", "IPO", "ETF", "API", "THE",
    "AND", "FOR", "NEWS", "WHAT", "HOW", "WHY", "NYC", "LA", "OK", "FAQ", "ESG", "USD", "EUR",
];

const COMPANY_TICKERS: &[(&str, &str)] = &[
    ("apple", "AAPL"),
    ("google", "GOOGL"),
    ("alphabet", "GOOGL"),
    ("microsoft", "MSFT"),
    ("tesla", "TSLA"),
    ("nvidia", "NVDA"),
    ("amazon", "AMZN"),
    ("meta", "META"),
    ("facebook", "META"),
    ("netflix", "NFLX"),
    ("intel", "INTC"),
    ("amd", "AMD"),
];

static CASHTAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$([A-Za-z]{1,5})\b").expect("cashtag pattern"));
static UPPER_WORD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b([A-Z]{2,5})\b(?!['’][a-z])").expect("ticker pattern"));
static PLACE_PHRASE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:in|at|for|near)\s+([A-Z][a-zA-Z]+(?:\s+[A-Z][a-zA-Z]+)?)")
        .expect("place pattern")
});

/// Lowercase alphanumeric tokens, in order.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
        .collect()
}

pub fn is_stop_word(token: &str) -> bool {
    STOP_WORDS.contains(&token)
}

/// Distinct content-bearing terms of a query, in first-seen order.
pub fn query_terms(text: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    tokenize(text)
        .into_iter()
        .filter(|t| t.len() >= 2 && !is_stop_word(t))
        .filter(|t| seen.insert(t.clone()))
        .collect()
}

/// Fraction of `terms` that occur as tokens of `candidate`.
pub fn relevance(terms: &[String], candidate: &str) -> f64 {
    if terms.is_empty() {
        return 0.0;
    }
    let tokens: HashSet<String> = tokenize(candidate).into_iter().collect();
    let hits = terms.iter().filter(|t| tokens.contains(t.as_str())).count();
    hits as f64 / terms.len() as f64
}

/// Truncate to at most `max` characters, appending an ellipsis when cut.
pub fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

/// Strip markup tags and collapse whitespace.
pub fn strip_tags(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_tag = false;
    for c in text.chars() {
        match c {
            '<' => in_tag = true,
            '>' if in_tag => {
                in_tag = false;
                out.push(' ');
            }
            _ if !in_tag => out.push(c),
            _ => {}
        }
    }
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Stock symbols mentioned in free text: cashtags, bare uppercase tickers and
/// well-known company names.
pub fn extract_tickers(text: &str) -> Vec<String> {
    let mut found: Vec<String> = Vec::new();
    let mut push = |sym: String| {
        if !found.contains(&sym) {
            found.push(sym);
        }
    };

    for caps in CASHTAG.captures_iter(text).flatten() {
        if let Some(m) = caps.get(1) {
            push(m.as_str().to_uppercase());
        }
    }
    for caps in UPPER_WORD.captures_iter(text).flatten() {
        if let Some(m) = caps.get(1)
            && !NOT_TICKERS.contains(&m.as_str())
        {
            push(m.as_str().to_string());
        }
    }
    let tokens = tokenize(text);
    for (name, symbol) in COMPANY_TICKERS {
        if tokens.iter().any(|t| t == name) {
            push((*symbol).to_string());
        }
    }
    found
}

/// Place names mentioned in free text. `known` places are matched
/// case-insensitively; otherwise capitalised words after "in"/"at"/"for"/"near".
pub fn extract_places(text: &str, known: &[String]) -> Vec<String> {
    let mut found: Vec<String> = Vec::new();
    let lower = text.to_lowercase();

    for place in known {
        if lower.contains(&place.to_lowercase()) && !found.contains(place) {
            found.push(place.clone());
        }
    }
    for caps in PLACE_PHRASE.captures_iter(text).flatten() {
        if let Some(m) = caps.get(1) {
            let place = m.as_str().to_string();
            let already = found.iter().any(|f| f.eq_ignore_ascii_case(&place));
            if !already {
                found.push(place);
            }
        }
    }
    found
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_terms_drop_stop_words_and_duplicates() {
        let terms = query_terms("What is the latest news on Tesla and tesla stock?");
        assert_eq!(terms, vec!["news", "tesla", "stock"]);
    }

    #[test]
    fn relevance_is_fraction_of_terms() {
        let terms = query_terms("tesla earnings");
        assert!((relevance(&terms, "Tesla beats earnings estimates") - 1.0).abs() < 1e-9);
        assert!((relevance(&terms, "Tesla recalls cars") - 0.5).abs() < 1e-9);
        assert_eq!(relevance(&terms, "Weather in Paris"), 0.0);
        assert_eq!(relevance(&[], "anything"), 0.0);
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate_chars("héllo wörld", 5), "héllo...");
        assert_eq!(truncate_chars("short", 10), "short");
    }

    #[test]
    fn strip_tags_removes_markup() {
        assert_eq!(
            strip_tags("<p>Markets <b>rally</b></p>\n after  news"),
            "Markets rally after news"
        );
    }

    #[test]
    fn tickers_from_cashtags_uppercase_and_names() {
        let t = extract_tickers("How are $tsla and NVDA doing vs Apple? Ask the CEO");
        assert_eq!(t, vec!["TSLA", "NVDA", "AAPL"]);
    }

    #[test]
    fn tickers_empty_for_plain_question() {
        assert!(extract_tickers("will it rain tomorrow").is_empty());
    }

    #[test]
    fn places_from_known_list_and_phrases() {
        let known = vec!["London".to_string(), "Tokyo".to_string()];
        let p = extract_places("Is it raining in New York or london?", &known);
        assert_eq!(p, vec!["London".to_string(), "New York".to_string()]);
    }
}
