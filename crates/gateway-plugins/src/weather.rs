//! `!weather <location>`: current conditions from a JSON weather service.

use std::sync::Arc;

use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use tracing::warn;
use url::Url;

use crate::error::{PluginError, Result};
use crate::traits::{CommandEvent, CommandHandler, Outcome, Plugin, PluginContext, PluginInfo, Responder};

pub const WEATHER_PLUGIN: &str = "weather";

const DEFAULT_WEATHER_ENDPOINT: &str = "https://wttr.in/";

#[derive(Debug, Deserialize)]
struct WeatherReport {
    current_condition: Vec<CurrentCondition>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CurrentCondition {
    #[serde(rename = "temp_C")]
    temp_c: String,
    #[serde(rename = "temp_F")]
    temp_f: String,
    #[serde(rename = "FeelsLikeC")]
    feels_like_c: String,
    humidity: String,
    windspeed_kmph: String,
    weather_desc: Vec<TextValue>,
}

#[derive(Debug, Deserialize)]
struct TextValue {
    value: String,
}

pub struct WeatherPlugin {
    info: PluginInfo,
    endpoint: String,
}

impl WeatherPlugin {
    pub fn new() -> Self {
        Self::with_endpoint(DEFAULT_WEATHER_ENDPOINT)
    }

    /// Plugin querying a custom base URL; the location is appended as a path
    /// segment.
    pub fn with_endpoint(endpoint: impl Into<String>) -> Self {
        Self {
            info: PluginInfo {
                name: WEATHER_PLUGIN.to_string(),
                description: "Current weather for a location".to_string(),
                commands: vec!["!weather <location>".to_string()],
            },
            endpoint: endpoint.into(),
        }
    }
}

impl Default for WeatherPlugin {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Plugin for WeatherPlugin {
    fn info(&self) -> &PluginInfo {
        &self.info
    }

    async fn init(&self, ctx: &PluginContext) -> Result<Vec<Arc<dyn CommandHandler>>> {
        let init_failed = |reason: String| PluginError::InitFailed {
            name: WEATHER_PLUGIN.to_string(),
            reason,
        };
        let base = Url::parse(&self.endpoint).map_err(|e| init_failed(e.to_string()))?;
        if base.cannot_be_a_base() {
            return Err(init_failed(format!("not a base URL: {}", self.endpoint)));
        }
        let pattern = Regex::new(r"^!weather (.+)$").map_err(|e| init_failed(e.to_string()))?;

        Ok(vec![Arc::new(WeatherHandler {
            pattern,
            base,
            http: ctx.http.clone(),
        })])
    }
}

struct WeatherHandler {
    pattern: Regex,
    base: Url,
    http: reqwest::Client,
}

impl WeatherHandler {
    fn location<'a>(&self, text: &'a str) -> Option<&'a str> {
        self.pattern
            .captures(text)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().trim())
            .filter(|s| !s.is_empty())
    }

    fn request_url(&self, location: &str) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut segments) = url.path_segments_mut() {
            segments.pop_if_empty().push(location);
        }
        url.query_pairs_mut().append_pair("format", "j1");
        url
    }

    async fn fetch(&self, location: &str) -> Result<CurrentCondition> {
        let resp = self.http.get(self.request_url(location)).send().await?;
        if !resp.status().is_success() {
            return Err(PluginError::Http(format!("weather service returned {}", resp.status())));
        }
        let report = resp.json::<WeatherReport>().await?;
        report
            .current_condition
            .into_iter()
            .next()
            .ok_or_else(|| PluginError::Http("weather service returned no conditions".to_string()))
    }
}

fn render_weather(location: &str, current: &CurrentCondition) -> String {
    let desc = current
        .weather_desc
        .first()
        .map(|d| d.value.as_str())
        .unwrap_or("unknown");
    format!(
        "Weather in {}\nTemperature: {}°C / {}°F\nHumidity: {}%\nWind: {} km/h\nFeels like: {}°C\nCondition: {}",
        location,
        current.temp_c,
        current.temp_f,
        current.humidity,
        current.windspeed_kmph,
        current.feels_like_c,
        desc,
    )
}

#[async_trait]
impl CommandHandler for WeatherHandler {
    fn name(&self) -> &str {
        "weather"
    }

    fn matches(&self, text: &str) -> bool {
        self.location(text).is_some()
    }

    async fn handle(&self, event: &CommandEvent, responder: &dyn Responder) -> Outcome {
        let Some(location) = self.location(&event.text) else {
            return Outcome::FailedClosed("no location given".to_string());
        };

        match self.fetch(location).await {
            Ok(current) => match responder.respond(event, &render_weather(location, &current)).await {
                Ok(()) => Outcome::Succeeded,
                Err(e) => Outcome::FailedClosed(e.to_string()),
            },
            Err(e) => {
                warn!(location = %location, error = %e, "Weather fetch failed");
                let reason = e.to_string();
                match responder.respond(event, &format!("Error: {}", reason)).await {
                    Ok(()) => Outcome::FailedOpen(reason),
                    Err(send) => Outcome::FailedClosed(format!("{}; {}", reason, send)),
                }
            }
        }
    }
}
