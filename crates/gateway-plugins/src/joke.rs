//! `!joke`: replace the command message with a random joke.

use std::sync::Arc;

use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use tracing::warn;

use crate::error::{PluginError, Result};
use crate::traits::{CommandEvent, CommandHandler, Outcome, Plugin, PluginContext, PluginInfo, Responder};

pub const JOKE_PLUGIN: &str = "joke";

const DEFAULT_JOKE_ENDPOINT: &str = "https://official-joke-api.appspot.com/random_joke";

#[derive(Debug, Deserialize)]
struct Joke {
    #[serde(default)]
    setup: Option<String>,
    #[serde(default)]
    punchline: Option<String>,
}

pub struct JokePlugin {
    info: PluginInfo,
    endpoint: String,
}

impl JokePlugin {
    pub fn new() -> Self {
        Self::with_endpoint(DEFAULT_JOKE_ENDPOINT)
    }

    /// Plugin fetching jokes from a custom endpoint.
    pub fn with_endpoint(endpoint: impl Into<String>) -> Self {
        Self {
            info: PluginInfo {
                name: JOKE_PLUGIN.to_string(),
                description: "Fetches a random joke".to_string(),
                commands: vec!["!joke".to_string()],
            },
            endpoint: endpoint.into(),
        }
    }
}

impl Default for JokePlugin {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Plugin for JokePlugin {
    fn info(&self) -> &PluginInfo {
        &self.info
    }

    async fn init(&self, ctx: &PluginContext) -> Result<Vec<Arc<dyn CommandHandler>>> {
        let pattern = Regex::new(r"^!joke$").map_err(|e| PluginError::InitFailed {
            name: JOKE_PLUGIN.to_string(),
            reason: e.to_string(),
        })?;
        Ok(vec![Arc::new(JokeHandler {
            pattern,
            endpoint: self.endpoint.clone(),
            http: ctx.http.clone(),
        })])
    }
}

struct JokeHandler {
    pattern: Regex,
    endpoint: String,
    http: reqwest::Client,
}

impl JokeHandler {
    async fn fetch(&self) -> Result<Joke> {
        let resp = self.http.get(&self.endpoint).send().await?;
        if !resp.status().is_success() {
            return Err(PluginError::Http(format!("joke service returned {}", resp.status())));
        }
        Ok(resp.json::<Joke>().await?)
    }
}

fn render_joke(joke: &Joke) -> String {
    format!(
        "Random joke\n{}\n{}",
        joke.setup.as_deref().unwrap_or("No setup"),
        joke.punchline.as_deref().unwrap_or("No punchline"),
    )
}

#[async_trait]
impl CommandHandler for JokeHandler {
    fn name(&self) -> &str {
        "joke"
    }

    fn matches(&self, text: &str) -> bool {
        self.pattern.is_match(text)
    }

    async fn handle(&self, event: &CommandEvent, responder: &dyn Responder) -> Outcome {
        if let Err(e) = responder.edit(event, "Fetching a joke...").await {
            return Outcome::FailedClosed(e.to_string());
        }

        match self.fetch().await {
            Ok(joke) => match responder.edit(event, &render_joke(&joke)).await {
                Ok(()) => Outcome::Succeeded,
                Err(e) => Outcome::FailedClosed(e.to_string()),
            },
            Err(e) => {
                warn!(error = %e, "Joke fetch failed");
                let reason = e.to_string();
                match responder.edit(event, &format!("Error: {}", reason)).await {
                    Ok(()) => Outcome::FailedOpen(reason),
                    Err(send) => Outcome::FailedClosed(format!("{}; {}", reason, send)),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gateway_core::RuntimeStatus;
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct Recorder {
        edits: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Responder for Recorder {
        async fn respond(&self, _event: &CommandEvent, _text: &str) -> Result<()> {
            Ok(())
        }

        async fn edit(&self, _event: &CommandEvent, text: &str) -> Result<()> {
            self.edits.lock().unwrap().push(text.to_string());
            Ok(())
        }
    }

    fn context() -> PluginContext {
        let http = crate::traits::plugin_http_client(Duration::from_secs(2)).unwrap();
        PluginContext::new(1, http, Arc::new(RuntimeStatus::new()))
    }

    #[test]
    fn test_render_joke_with_missing_fields() {
        let joke: Joke = serde_json::from_str(r#"{"setup": "Why?"}"#).unwrap();
        assert_eq!(render_joke(&joke), "Random joke\nWhy?\nNo punchline");
    }

    #[tokio::test]
    async fn test_unreachable_service_fails_open() {
        let plugin = JokePlugin::with_endpoint("http://127.0.0.1:9/random_joke");
        let handlers = plugin.init(&context()).await.unwrap();
        let handler = &handlers[0];
        assert!(handler.matches("!joke"));
        assert!(!handler.matches("!joke now"));

        let responder = Recorder::default();
        let outcome = handler
            .handle(&CommandEvent::new(1, 2, Some(1), "!joke"), &responder)
            .await;

        assert!(matches!(outcome, Outcome::FailedOpen(_)));
        let edits = responder.edits.lock().unwrap();
        assert_eq!(edits[0], "Fetching a joke...");
        assert!(edits[1].starts_with("Error:"));
    }
}
