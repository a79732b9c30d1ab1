//! Per-session table of attached plugin handlers.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::debug;

use crate::traits::{CommandEvent, CommandHandler, HandlerRun, Responder};

/// The handlers each loaded plugin attached to one session, keyed by plugin
/// name.
///
/// Attaching under a name that is already present replaces the old handlers,
/// so a plugin can never fire twice for the same message.
#[derive(Default)]
pub struct HandlerTable {
    entries: RwLock<BTreeMap<String, Vec<Arc<dyn CommandHandler>>>>,
}

impl HandlerTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a plugin's handlers. Returns true if it replaced an earlier
    /// attachment.
    pub async fn attach(&self, plugin: &str, handlers: Vec<Arc<dyn CommandHandler>>) -> bool {
        let mut entries = self.entries.write().await;
        entries.insert(plugin.to_string(), handlers).is_some()
    }

    /// Detach a plugin. Returns whether it was attached.
    pub async fn detach(&self, plugin: &str) -> bool {
        self.entries.write().await.remove(plugin).is_some()
    }

    pub async fn contains(&self, plugin: &str) -> bool {
        self.entries.read().await.contains_key(plugin)
    }

    /// Names of the attached plugins, sorted.
    pub async fn names(&self) -> Vec<String> {
        self.entries.read().await.keys().cloned().collect()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    /// Run every handler that matches the event's text, in plugin-name order.
    ///
    /// The table lock is released before any handler runs.
    pub async fn dispatch(&self, event: &CommandEvent, responder: &dyn Responder) -> Vec<HandlerRun> {
        let matching: Vec<(String, Arc<dyn CommandHandler>)> = {
            let entries = self.entries.read().await;
            entries
                .iter()
                .flat_map(|(plugin, handlers)| {
                    handlers
                        .iter()
                        .filter(|h| h.matches(&event.text))
                        .map(move |h| (plugin.clone(), Arc::clone(h)))
                })
                .collect()
        };

        let mut runs = Vec::with_capacity(matching.len());
        for (plugin, handler) in matching {
            let outcome = handler.handle(event, responder).await;
            debug!(plugin = %plugin, handler = handler.name(), outcome = ?outcome, "Handler ran");
            runs.push(HandlerRun {
                plugin,
                handler: handler.name().to_string(),
                outcome,
            });
        }
        runs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use crate::traits::Outcome;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct Echo {
        prefix: &'static str,
    }

    #[async_trait]
    impl CommandHandler for Echo {
        fn name(&self) -> &str {
            self.prefix
        }

        fn matches(&self, text: &str) -> bool {
            text.starts_with(self.prefix)
        }

        async fn handle(&self, event: &CommandEvent, responder: &dyn Responder) -> Outcome {
            match responder.respond(event, &event.text).await {
                Ok(()) => Outcome::Succeeded,
                Err(e) => Outcome::FailedClosed(e.to_string()),
            }
        }
    }

    #[derive(Default)]
    struct Recorder {
        sent: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Responder for Recorder {
        async fn respond(&self, _event: &CommandEvent, text: &str) -> Result<()> {
            self.sent.lock().unwrap().push(text.to_string());
            Ok(())
        }

        async fn edit(&self, _event: &CommandEvent, text: &str) -> Result<()> {
            self.sent.lock().unwrap().push(format!("edit:{}", text));
            Ok(())
        }
    }

    fn echo(prefix: &'static str) -> Vec<Arc<dyn CommandHandler>> {
        vec![Arc::new(Echo { prefix })]
    }

    #[tokio::test]
    async fn test_dispatch_runs_only_matching_handlers() {
        let table = HandlerTable::new();
        table.attach("a", echo("!a")).await;
        table.attach("b", echo("!b")).await;

        let responder = Recorder::default();
        let event = CommandEvent::new(1, 10, Some(5), "!b hello");
        let runs = table.dispatch(&event, &responder).await;

        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].plugin, "b");
        assert_eq!(runs[0].outcome, Outcome::Succeeded);
        assert_eq!(*responder.sent.lock().unwrap(), vec!["!b hello".to_string()]);
    }

    #[tokio::test]
    async fn test_reattach_replaces_handlers() {
        let table = HandlerTable::new();
        assert!(!table.attach("a", echo("!a")).await);
        assert!(table.attach("a", echo("!a")).await);

        let responder = Recorder::default();
        let runs = table
            .dispatch(&CommandEvent::new(1, 1, None, "!a"), &responder)
            .await;
        assert_eq!(runs.len(), 1);
    }

    #[tokio::test]
    async fn test_detach() {
        let table = HandlerTable::new();
        table.attach("a", echo("!a")).await;

        assert!(table.detach("a").await);
        assert!(!table.detach("a").await);
        assert!(table.is_empty().await);
    }
}
