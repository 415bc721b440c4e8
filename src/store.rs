//! In-process document index with hashed bag-of-words embeddings.
//!
//! Documents are embedded into a fixed-width vector by hashing their
//! content-bearing tokens, then ranked against a query by cosine similarity.
//! Ids are derived from the origin and the first 100 characters of content, so
//! re-indexing the same item replaces it instead of duplicating it.

use crate::text;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use tokio::sync::RwLock;
use tracing::debug;

pub const EMBEDDING_DIMS: usize = 256;
pub const EMBEDDING_NAME: &str = "hashed-bow-256";

#[derive(Debug, Clone, Serialize)]
pub struct Document {
    pub id: String,
    pub content: String,
    pub title: String,
    pub origin: String,
    pub confidence: f64,
    pub url: Option<String>,
    pub indexed_at: DateTime<Utc>,
    #[serde(skip)]
    embedding: Vec<f32>,
}

/// Input for [`DocumentStore::add`].
#[derive(Debug, Clone)]
pub struct NewDocument {
    pub content: String,
    pub title: String,
    pub origin: String,
    pub confidence: f64,
    pub url: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScoredDocument {
    pub document: Document,
    pub similarity: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct StoreStats {
    pub total_documents: usize,
    pub by_origin: BTreeMap<String, usize>,
    pub embedding_model: &'static str,
    pub oldest: Option<DateTime<Utc>>,
    pub newest: Option<DateTime<Utc>>,
}

pub struct DocumentStore {
    docs: RwLock<Vec<Document>>,
    max_documents: usize,
}

impl DocumentStore {
    pub fn new(max_documents: usize) -> Self {
        Self {
            docs: RwLock::new(Vec::new()),
            max_documents: max_documents.max(1),
        }
    }

    pub fn document_id(origin: &str, content: &str) -> String {
        let head: String = content.chars().take(100).collect();
        let digest = Sha256::digest(format!("{origin}:{head}").as_bytes());
        hex::encode(digest)
    }

    /// Insert or replace a document. Returns its id, or `None` when neither
    /// title nor content has anything to embed.
    pub async fn add(&self, doc: NewDocument) -> Option<String> {
        let embedding = embed(&format!("{} {}", doc.title, doc.content));
        if embedding.iter().all(|v| *v == 0.0) {
            return None;
        }
        let id = Self::document_id(&doc.origin, &doc.content);
        let document = Document {
            id: id.clone(),
            content: doc.content,
            title: doc.title,
            origin: doc.origin,
            confidence: doc.confidence.clamp(0.0, 1.0),
            url: doc.url,
            indexed_at: Utc::now(),
            embedding,
        };

        let mut docs = self.docs.write().await;
        docs.retain(|d| d.id != id);
        docs.push(document);
        if docs.len() > self.max_documents {
            let excess = docs.len() - self.max_documents;
            // Pushed in time order, so the front holds the oldest.
            docs.drain(..excess);
            debug!(evicted = excess, "document store at capacity");
        }
        Some(id)
    }

    pub async fn search(
        &self,
        query: &str,
        top_k: usize,
        min_confidence: f64,
        origins: Option<&[String]>,
    ) -> Vec<ScoredDocument> {
        let q = embed(query);
        if q.iter().all(|v| *v == 0.0) {
            return Vec::new();
        }

        let docs = self.docs.read().await;
        let mut scored: Vec<ScoredDocument> = docs
            .iter()
            .filter(|d| d.confidence >= min_confidence)
            .filter(|d| origins.is_none_or(|o| o.iter().any(|x| x == &d.origin)))
            .filter_map(|d| {
                let similarity = cosine(&q, &d.embedding) as f64;
                (similarity > 0.0).then(|| ScoredDocument {
                    document: d.clone(),
                    similarity,
                })
            })
            .collect();

        scored.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        scored.truncate(top_k);
        scored
    }

    /// Drop documents indexed before `cutoff`. Returns how many were removed.
    pub async fn prune_older_than(&self, cutoff: DateTime<Utc>) -> usize {
        let mut docs = self.docs.write().await;
        let before = docs.len();
        docs.retain(|d| d.indexed_at >= cutoff);
        before - docs.len()
    }

    pub async fn len(&self) -> usize {
        self.docs.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.docs.read().await.is_empty()
    }

    pub async fn stats(&self) -> StoreStats {
        let docs = self.docs.read().await;
        let mut by_origin = BTreeMap::new();
        for d in docs.iter() {
            *by_origin.entry(d.origin.clone()).or_insert(0) += 1;
        }
        StoreStats {
            total_documents: docs.len(),
            by_origin,
            embedding_model: EMBEDDING_NAME,
            oldest: docs.iter().map(|d| d.indexed_at).min(),
            newest: docs.iter().map(|d| d.indexed_at).max(),
        }
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for b in bytes {
        hash ^= u64::from(*b);
        hash = hash.wrapping_mul(0x0100_0000_01b3);
    }
    hash
}

/// L2-normalised hashed term-frequency vector. All zeros when the text has no
/// content-bearing tokens.
pub fn embed(text: &str) -> Vec<f32> {
    let mut v = vec![0.0f32; EMBEDDING_DIMS];
    for token in text::tokenize(text) {
        if token.len() < 2 || text::is_stop_word(&token) {
            continue;
        }
        let idx = (fnv1a(token.as_bytes()) % EMBEDDING_DIMS as u64) as usize;
        v[idx] += 1.0;
    }
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in &mut v {
            *x /= norm;
        }
    }
    v
}

/// Cosine of two already-normalised vectors.
fn cosine(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}
