use crate::error::{Error, Result};
use reqwest::{Client, RequestBuilder, StatusCode, header};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

#[derive(Clone)]
pub struct HttpClient {
    client: Client,
    max_retries: u32,
    base_delay_ms: u64,
}

impl HttpClient {
    pub fn new(user_agent: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .connect_timeout(Duration::from_secs(10))
            .user_agent(user_agent)
            .build()
            .map_err(|e| Error::http(e.to_string()))?;

        Ok(Self {
            client,
            max_retries: 2,
            base_delay_ms: 250,
        })
    }

    /// Override retry policy.
    pub fn with_retries(mut self, max_retries: u32, base_delay_ms: u64) -> Self {
        self.max_retries = max_retries;
        self.base_delay_ms = base_delay_ms;
        self
    }

    pub async fn get_text(&self, url: &str) -> Result<String> {
        self.request_with_retry(|| self.client.get(url)).await
    }

    pub async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        let body = self.get_text(url).await?;
        serde_json::from_str(&body).map_err(|e| Error::parse(format!("JSON parse: {e}")))
    }

    /// GET with query-string parameters, parsed as JSON.
    pub async fn get_json_query<T: DeserializeOwned>(
        &self,
        url: &str,
        params: &[(&str, &str)],
    ) -> Result<T> {
        let body = self
            .request_with_retry(|| self.client.get(url).query(params))
            .await?;
        serde_json::from_str(&body).map_err(|e| Error::parse(format!("JSON parse: {e}")))
    }

    pub async fn post_json_raw(
        &self,
        url: &str,
        body: &str,
        headers: &[(&str, &str)],
    ) -> Result<String> {
        self.request_with_retry(|| self.post_builder(url, body, headers))
            .await
    }

    /// POST and hand back the live response for incremental reading.
    /// Connection failures are retried; once the server answers, the body is
    /// the caller's to consume.
    pub async fn post_json_streaming(
        &self,
        url: &str,
        body: &str,
        headers: &[(&str, &str)],
    ) -> Result<reqwest::Response> {
        let resp = self
            .send_with_retry(|| self.post_builder(url, body, headers))
            .await?;
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        Err(self.error_for(resp).await)
    }

    fn post_builder(&self, url: &str, body: &str, headers: &[(&str, &str)]) -> RequestBuilder {
        let mut req = self
            .client
            .post(url)
            .header(header::CONTENT_TYPE, "application/json")
            .body(body.to_string());
        for (k, v) in headers {
            req = req.header(*k, *v);
        }
        req
    }

    async fn request_with_retry<F>(&self, build: F) -> Result<String>
    where
        F: Fn() -> RequestBuilder,
    {
        let resp = self.send_with_retry(build).await?;
        self.handle_response(resp).await
    }

    async fn send_with_retry<F>(&self, build: F) -> Result<reqwest::Response>
    where
        F: Fn() -> RequestBuilder,
    {
        let mut last_error = Error::http("no attempts made");
        let mut delay = self.base_delay_ms;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                debug!(attempt, delay_ms = delay, "retrying request");
                sleep(Duration::from_millis(delay)).await;
                delay = (delay * 2).min(10_000);
            }

            match build().send().await {
                Ok(resp) => return Ok(resp),
                Err(e) => {
                    last_error = Error::http(e.to_string());
                    if e.is_timeout() || e.is_connect() {
                        warn!(attempt, "transient failure, will retry");
                        continue;
                    }
                    return Err(last_error);
                }
            }
        }

        Err(last_error)
    }

    async fn handle_response(&self, resp: reqwest::Response) -> Result<String> {
        if resp.status().is_success() {
            return resp.text().await.map_err(|e| Error::http(e.to_string()));
        }
        Err(self.error_for(resp).await)
    }

    async fn error_for(&self, resp: reqwest::Response) -> Error {
        let status = resp.status();
        let url = resp.url().to_string();

        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = resp
                .headers()
                .get(header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok());
            return Error::RateLimit {
                platform: extract_domain(&url),
                retry_after_secs: retry_after,
            };
        }

        let body = resp.text().await.unwrap_or_default();
        Error::api_with_status(extract_domain(&url), body, status.as_u16())
    }
}

pub(crate) fn extract_domain(url: &str) -> String {
    url.split("//")
        .nth(1)
        .and_then(|s| s.split('/').next())
        .unwrap_or("unknown")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domain_from_full_url() {
        assert_eq!(
            extract_domain("https://api.groq.com/openai/v1/chat/completions"),
            "api.groq.com"
        );
    }

    #[test]
    fn domain_without_scheme_is_unknown() {
        assert_eq!(extract_domain("localhost"), "unknown");
    }
}
