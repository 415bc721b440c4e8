use crate::scoring::Sentiment;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A user question as it entered the system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Query {
    pub text: String,
    pub timestamp: DateTime<Utc>,
}

impl Query {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            timestamp: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    News,
    #[serde(alias = "stocks", alias = "market")]
    Finance,
    Weather,
    #[serde(alias = "docs", alias = "vector")]
    Documents,
    #[serde(alias = "reddit")]
    Social,
}

impl SourceKind {
    pub const ALL: [SourceKind; 5] = [
        SourceKind::News,
        SourceKind::Finance,
        SourceKind::Weather,
        SourceKind::Documents,
        SourceKind::Social,
    ];

    /// Parse a client-supplied identifier. Unknown names yield `None`.
    pub fn parse(id: &str) -> Option<Self> {
        match id.trim().to_lowercase().as_str() {
            "news" => Some(Self::News),
            "finance" | "stocks" | "market" => Some(Self::Finance),
            "weather" => Some(Self::Weather),
            "documents" | "docs" | "vector" => Some(Self::Documents),
            "social" | "reddit" => Some(Self::Social),
            _ => None,
        }
    }

    pub fn id(&self) -> &'static str {
        match self {
            Self::News => "news",
            Self::Finance => "finance",
            Self::Weather => "weather",
            Self::Documents => "documents",
            Self::Social => "social",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::News => "Real-time news feeds (RSS/Atom)",
            Self::Finance => "Stock market quotes",
            Self::Weather => "Current weather conditions",
            Self::Documents => "Semantic search over indexed documents",
            Self::Social => "Social media discussion (Reddit)",
        }
    }

    /// Whether results from this source are free text worth a sentiment pass.
    pub fn is_textual(&self) -> bool {
        matches!(self, Self::News | Self::Social | Self::Documents)
    }
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.id())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Metric {
    pub name: String,
    pub value: f64,
    pub unit: String,
}

impl Metric {
    pub fn new(name: impl Into<String>, value: f64, unit: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value,
            unit: unit.into(),
        }
    }
}

impl std::fmt::Display for Metric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.unit.is_empty() {
            write!(f, "{}: {:.1}", self.name, self.value)
        } else {
            write!(f, "{}: {:.1} {}", self.name, self.value, self.unit)
        }
    }
}

/// One provider's contribution to a query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceResult {
    pub source: SourceKind,
    /// Concrete provider behind the source, e.g. a feed title or "Alpha Vantage".
    pub provider: String,
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub metrics: Vec<Metric>,
    pub url: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub timestamp: DateTime<Utc>,
    pub relevance: Option<f64>,
    pub confidence: Option<f64>,
    pub sentiment: Option<Sentiment>,
}

impl SourceResult {
    pub fn new(
        source: SourceKind,
        provider: impl Into<String>,
        title: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            source,
            provider: provider.into(),
            title: title.into(),
            content: content.into(),
            metrics: Vec::new(),
            url: None,
            published_at: None,
            timestamp: Utc::now(),
            relevance: None,
            confidence: None,
            sentiment: None,
        }
    }

    pub fn metric(&self, name: &str) -> Option<f64> {
        self.metrics.iter().find(|m| m.name == name).map(|m| m.value)
    }

    /// Title and body joined the way they are indexed and prompted.
    pub fn text(&self) -> String {
        [self.title.as_str(), self.content.as_str()]
            .into_iter()
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(" | ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_accepts_aliases() {
        assert_eq!(SourceKind::parse("Reddit"), Some(SourceKind::Social));
        assert_eq!(SourceKind::parse(" docs "), Some(SourceKind::Documents));
        assert_eq!(SourceKind::parse("stocks"), Some(SourceKind::Finance));
        assert_eq!(SourceKind::parse("horoscope"), None);
    }

    #[test]
    fn serde_uses_lowercase_ids() {
        let json = serde_json::to_string(&SourceKind::Weather).unwrap();
        assert_eq!(json, "\"weather\"");
        let kind: SourceKind = serde_json::from_str("\"reddit\"").unwrap();
        assert_eq!(kind, SourceKind::Social);
    }

    #[test]
    fn text_skips_empty_parts() {
        let r = SourceResult::new(SourceKind::Finance, "Alpha Vantage", "", "AAPL at $190");
        assert_eq!(r.text(), "AAPL at $190");
        let r = SourceResult::new(SourceKind::News, "BBC", "Headline", "Body");
        assert_eq!(r.text(), "Headline | Body");
    }
}
