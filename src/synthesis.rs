use crate::fanout::FusedContext;
use crate::llm::LlmClient;
use crate::sources::SourceKind;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{info, warn};

pub const SYSTEM_PROMPT: &str = r#"You are LiveMind, a real-time multi-source intelligence assistant.

You receive a user question together with context gathered moments ago from live sources: news feeds, market quotes, weather readings, social discussion and a document index. Each context item carries its source, a confidence score, a relevance score and a timestamp.

Guidelines:
- Answer the question directly, then support it with the context.
- Cite the source of every claim, e.g. "(news: BBC News)".
- State how confident you are and why, using the confidence scores.
- When sources disagree, say so explicitly and show both sides.
- Mention timestamps for time-sensitive facts.
- Keep facts separate from analysis or predictions, and label the latter.
- If the context does not cover the question, say what is missing instead of guessing.
- Be concise but complete."#;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SynthesisMode {
    /// Answer written by the language model.
    Llm,
    /// No credentials configured; templated answer.
    Demo,
    /// The model call failed; templated answer.
    Fallback,
}

pub fn build_user_prompt(query: &str, context: &FusedContext, sources: &[SourceKind]) -> String {
    let mut prompt = format!("User Query: {query}\n\n");
    if context.is_empty() {
        prompt.push_str("No live context was available for this query.\n");
    } else {
        prompt.push_str("Relevant Context from Real-Time Sources:\n\n");
        prompt.push_str(&context.render());
    }
    if !sources.is_empty() {
        let names: Vec<&str> = sources.iter().map(|s| s.id()).collect();
        prompt.push_str(&format!("\nData Sources Consulted: {}\n", names.join(", ")));
    }
    prompt.push_str(
        "\nPlease provide a comprehensive response using the above context. \
         Include source attribution and confidence levels.",
    );
    prompt
}

/// Deterministic answer used when no model is reachable.
pub fn demo_answer(query: &str, context: &FusedContext, mode: SynthesisMode) -> String {
    let mut out = format!("LiveMind summary for: {query}\n\n");

    if context.is_empty() {
        out.push_str("No live data matched this query from the selected sources.\n");
    } else {
        let names: Vec<&str> = context.contributing_sources().iter().map(|s| s.id()).collect();
        out.push_str(&format!(
            "Found {} relevant item(s) from {}.\n\n",
            context.results.len(),
            names.join(", ")
        ));
        for r in context.results.iter().take(5) {
            let headline = if r.title.is_empty() { &r.content } else { &r.title };
            out.push_str(&format!(
                "- [{}] {} (confidence {:.2})\n",
                r.source,
                crate::text::truncate_chars(headline, 160),
                r.confidence.unwrap_or(0.0)
            ));
        }
    }

    out.push('\n');
    out.push_str(match mode {
        SynthesisMode::Fallback => {
            "Note: the language model could not be reached, so this is a summary of the raw context."
        }
        _ => "Note: running in demo mode. Configure an LLM API key for full answers.",
    });
    out
}

pub struct Synthesizer {
    llm: LlmClient,
}

impl Synthesizer {
    pub fn new(llm: LlmClient) -> Self {
        Self { llm }
    }

    pub fn is_configured(&self) -> bool {
        self.llm.is_configured()
    }

    pub fn llm(&self) -> &LlmClient {
        &self.llm
    }

    pub async fn synthesize(
        &self,
        query: &str,
        context: &FusedContext,
        sources: &[SourceKind],
    ) -> (String, SynthesisMode) {
        if !self.llm.is_configured() {
            return (demo_answer(query, context, SynthesisMode::Demo), SynthesisMode::Demo);
        }

        let prompt = build_user_prompt(query, context, sources);
        match self.llm.complete(SYSTEM_PROMPT, &prompt).await {
            Ok(text) => {
                info!(model = %self.llm.model(), chars = text.len(), "answer synthesized");
                (text, SynthesisMode::Llm)
            }
            Err(e) => {
                warn!(error = %e, "LLM call failed, answering from template");
                (
                    demo_answer(query, context, SynthesisMode::Fallback),
                    SynthesisMode::Fallback,
                )
            }
        }
    }

    /// Like [`Self::synthesize`], forwarding text to `chunk_tx` as it is
    /// produced. Returns the full text once the stream ends.
    pub async fn synthesize_stream(
        &self,
        query: &str,
        context: &FusedContext,
        sources: &[SourceKind],
        chunk_tx: mpsc::Sender<String>,
    ) -> (String, SynthesisMode) {
        if !self.llm.is_configured() {
            let text = demo_answer(query, context, SynthesisMode::Demo);
            send_words(&text, &chunk_tx).await;
            return (text, SynthesisMode::Demo);
        }

        let prompt = build_user_prompt(query, context, sources);
        let mut rx = match self.llm.complete_stream(SYSTEM_PROMPT, &prompt).await {
            Ok(rx) => rx,
            Err(e) => {
                warn!(error = %e, "LLM stream failed to start, answering from template");
                let text = demo_answer(query, context, SynthesisMode::Fallback);
                send_words(&text, &chunk_tx).await;
                return (text, SynthesisMode::Fallback);
            }
        };

        let mut full = String::new();
        while let Some(piece) = rx.recv().await {
            match piece {
                Ok(delta) => {
                    full.push_str(&delta);
                    // Receiver gone means the client left; keep collecting for the cache.
                    let _ = chunk_tx.send(delta).await;
                }
                Err(e) if full.is_empty() => {
                    warn!(error = %e, "LLM stream failed before any text, answering from template");
                    let text = demo_answer(query, context, SynthesisMode::Fallback);
                    send_words(&text, &chunk_tx).await;
                    return (text, SynthesisMode::Fallback);
                }
                Err(e) => {
                    warn!(error = %e, chars = full.len(), "LLM stream cut short");
                    break;
                }
            }
        }
        (full, SynthesisMode::Llm)
    }
}

/// Emit `text` word by word, keeping the separating whitespace.
async fn send_words(text: &str, tx: &mpsc::Sender<String>) {
    for word in text.split_inclusive(' ') {
        if tx.send(word.to_string()).await.is_err() {
            break;
        }
    }
}
