use super::types::{Metric, Query, SourceKind, SourceResult};
use super::Source;
use crate::config::WeatherConfig;
use crate::error::{Error, Result};
use crate::http::HttpClient;
use crate::text;
use async_trait::async_trait;
use futures::future::join_all;
use serde::Deserialize;
use tracing::warn;

const PLATFORM: &str = "openweathermap";

#[derive(Debug, Deserialize)]
struct CurrentWeather {
    name: Option<String>,
    #[serde(default)]
    weather: Vec<Condition>,
    main: Option<MainReadings>,
    wind: Option<Wind>,
    visibility: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct Condition {
    description: String,
}

#[derive(Debug, Deserialize)]
struct MainReadings {
    temp: f64,
    humidity: Option<f64>,
    pressure: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct Wind {
    speed: Option<f64>,
}

pub struct WeatherSource {
    config: WeatherConfig,
    http: HttpClient,
    api_key: Option<String>,
}

impl WeatherSource {
    pub fn new(config: WeatherConfig, http: HttpClient) -> Self {
        let api_key = std::env::var(&config.api_key_env)
            .ok()
            .filter(|k| !k.is_empty());
        Self {
            config,
            http,
            api_key,
        }
    }

    /// Cities mentioned in `text`, or the configured defaults when none are.
    pub fn cities_for(&self, text: &str) -> Vec<String> {
        let mut cities = text::extract_places(text, &self.config.default_cities);
        if cities.is_empty() {
            cities = self.config.default_cities.clone();
        }
        cities.truncate(self.config.max_cities);
        cities
    }

    async fn current(&self, key: &str, city: &str) -> Result<SourceResult> {
        let resp: CurrentWeather = self
            .http
            .get_json_query(
                &self.config.base_url,
                &[("q", city), ("appid", key), ("units", "metric")],
            )
            .await?;
        to_result(resp, city)
    }

    async fn lookup(&self, cities: &[String]) -> Result<Vec<SourceResult>> {
        let key = self
            .api_key
            .as_deref()
            .ok_or_else(|| Error::missing_credentials(PLATFORM, &self.config.api_key_env))?;

        let lookups = cities.iter().map(|c| self.current(key, c));
        let mut results = Vec::new();
        let mut last_error = None;
        for (city, outcome) in cities.iter().zip(join_all(lookups).await) {
            match outcome {
                Ok(r) => results.push(r),
                Err(e) => {
                    warn!(city = %city, error = %e, "weather lookup failed, skipping");
                    last_error = Some(e);
                }
            }
        }
        if results.is_empty()
            && let Some(e) = last_error
        {
            return Err(e);
        }
        Ok(results)
    }
}

#[async_trait]
impl Source for WeatherSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Weather
    }

    async fn fetch(&self, query: &Query) -> Result<Vec<SourceResult>> {
        let mentioned = text::extract_places(&query.text, &self.config.default_cities);
        let cities = self.cities_for(&query.text);
        let mut results = self.lookup(&cities).await?;
        for r in &mut results {
            let hit = mentioned.iter().any(|m| m.eq_ignore_ascii_case(&r.title));
            r.relevance = Some(if hit { 1.0 } else { 0.5 });
        }
        Ok(results)
    }

    async fn latest(&self) -> Result<Vec<SourceResult>> {
        let mut cities = self.config.default_cities.clone();
        cities.truncate(self.config.max_cities);
        self.lookup(&cities).await
    }

    fn is_configured(&self) -> bool {
        self.api_key.is_some()
    }
}

fn to_result(resp: CurrentWeather, requested: &str) -> Result<SourceResult> {
    let main = resp
        .main
        .ok_or_else(|| Error::api(PLATFORM, format!("no readings for {requested}")))?;
    let city = resp.name.filter(|n| !n.is_empty()).unwrap_or_else(|| requested.to_string());
    let description = resp
        .weather
        .first()
        .map(|c| c.description.clone())
        .unwrap_or_else(|| "conditions unknown".into());

    let content = format!("Weather in {city}: {:.1}°C, {description}", main.temp);
    let mut result = SourceResult::new(SourceKind::Weather, PLATFORM, city, content);
    result.metrics.push(Metric::new("temperature", main.temp, "°C"));
    if let Some(h) = main.humidity {
        result.metrics.push(Metric::new("humidity", h, "%"));
    }
    if let Some(p) = main.pressure {
        result.metrics.push(Metric::new("pressure", p, "hPa"));
    }
    if let Some(s) = resp.wind.and_then(|w| w.speed) {
        result.metrics.push(Metric::new("wind_speed", s, "m/s"));
    }
    if let Some(v) = resp.visibility {
        result.metrics.push(Metric::new("visibility", v, "m"));
    }
    Ok(result)
}
