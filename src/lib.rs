pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod fanout;
pub mod http;
pub mod llm;
pub mod refresh;
pub mod scoring;
pub mod server;
pub mod sources;
pub mod stats;
pub mod store;
pub mod synthesis;
pub mod text;

/// CLI override for LLM provider/model.
#[derive(Debug, Clone)]
pub struct LlmOverride {
    pub provider: Option<llm::Provider>,
    pub model: Option<String>,
}

impl LlmOverride {
    /// `None` when neither flag was given. An unknown provider name is an error.
    pub fn from_flags(provider: Option<String>, model: Option<String>) -> error::Result<Option<Self>> {
        if provider.is_none() && model.is_none() {
            return Ok(None);
        }
        let provider = provider
            .map(|name| {
                llm::Provider::parse(&name).ok_or_else(|| {
                    error::Error::config(format!(
                        "unknown LLM provider '{name}' (expected groq, openrouter, openai or anthropic)"
                    ))
                })
            })
            .transpose()?;
        Ok(Some(Self { provider, model }))
    }

    /// Switching provider resets the model, key variable and endpoint to that
    /// provider's defaults unless a model was also given.
    pub fn apply(&self, config: &mut config::LlmConfig) {
        if let Some(provider) = &self.provider
            && *provider != config.provider
        {
            config.provider = provider.clone();
            config.model = provider.default_model().to_string();
            config.api_key_env = None;
            config.base_url = None;
        }
        if let Some(model) = &self.model {
            config.model = model.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_flags_no_override() {
        assert!(LlmOverride::from_flags(None, None).unwrap().is_none());
    }

    #[test]
    fn provider_flag_picks_default_model() {
        let o = LlmOverride::from_flags(Some("anthropic".into()), None)
            .unwrap()
            .unwrap();
        let mut cfg = config::LlmConfig::default();
        cfg.api_key_env = Some("MY_GROQ_KEY".into());
        o.apply(&mut cfg);
        assert_eq!(cfg.provider, llm::Provider::Anthropic);
        assert_eq!(cfg.model, llm::Provider::Anthropic.default_model());
        assert!(cfg.api_key_env.is_none());
    }

    #[test]
    fn model_flag_keeps_provider() {
        let o = LlmOverride::from_flags(None, Some("llama-3.3-70b".into()))
            .unwrap()
            .unwrap();
        let mut cfg = config::LlmConfig::default();
        cfg.api_key_env = Some("MY_GROQ_KEY".into());
        o.apply(&mut cfg);
        assert_eq!(cfg.provider, llm::Provider::Groq);
        assert_eq!(cfg.model, "llama-3.3-70b");
        assert_eq!(cfg.api_key_env.as_deref(), Some("MY_GROQ_KEY"));
    }

    #[test]
    fn unknown_provider_rejected() {
        assert!(LlmOverride::from_flags(Some("bard".into()), None).is_err());
    }
}
