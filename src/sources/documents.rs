use super::types::{Query, SourceKind, SourceResult};
use super::Source;
use crate::error::Result;
use crate::store::{DocumentStore, ScoredDocument};
use async_trait::async_trait;
use std::sync::Arc;

/// Similarity search over the background-refreshed document index.
pub struct DocumentSource {
    store: Arc<DocumentStore>,
    top_k: usize,
    min_confidence: f64,
}

impl DocumentSource {
    pub fn new(store: Arc<DocumentStore>, top_k: usize, min_confidence: f64) -> Self {
        Self {
            store,
            top_k,
            min_confidence,
        }
    }
}

#[async_trait]
impl Source for DocumentSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Documents
    }

    async fn fetch(&self, query: &Query) -> Result<Vec<SourceResult>> {
        let hits = self.store.search(&query.text, self.top_k, self.min_confidence, None).await;
        Ok(hits.into_iter().map(to_result).collect())
    }
}

fn to_result(hit: ScoredDocument) -> SourceResult {
    let doc = hit.document;
    let mut result = SourceResult::new(
        SourceKind::Documents,
        format!("index:{}", doc.origin),
        doc.title,
        doc.content,
    );
    result.url = doc.url;
    result.published_at = Some(doc.indexed_at);
    result.relevance = Some(hit.similarity);
    result.confidence = Some(doc.confidence);
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::NewDocument;

    #[tokio::test]
    async fn hits_carry_similarity_and_stored_confidence() {
        let store = Arc::new(DocumentStore::new(10));
        store
            .add(NewDocument {
                content: "Fed holds interest rates steady".into(),
                title: "Fed decision".into(),
                origin: "news".into(),
                confidence: 0.8,
                url: Some("https://news.example.com/fed".into()),
            })
            .await;
        store
            .add(NewDocument {
                content: "Rumour says rates will be cut".into(),
                title: "Unverified".into(),
                origin: "social".into(),
                confidence: 0.3,
                url: None,
            })
            .await;
        let source = DocumentSource::new(store, 5, 0.5);

        let results = source.fetch(&Query::new("interest rates")).await.unwrap();
        assert_eq!(results.len(), 1);
        let r = &results[0];
        assert_eq!(r.provider, "index:news");
        assert_eq!(r.confidence, Some(0.8));
        assert!(r.relevance.unwrap() > 0.0);

        assert!(source.fetch(&Query::new("the")).await.unwrap().is_empty());
    }
}
