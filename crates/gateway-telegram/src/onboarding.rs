//! The credential-collection conversation that provisions a session.
//!
//! ```text
//! AwaitingId --integer--> AwaitingHash --non-empty text--> AwaitingCredentialFile
//!      ^ invalid input       ^ invalid input                   ^ wrong file / text
//!      '-- stays ------------'-- stays ------------------------'-- stays
//! ```
//!
//! The file step is completed by the session manager, which owns the
//! connect attempt. State idle for longer than [`ONBOARDING_TTL_MINUTES`]
//! counts as abandoned.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use gateway_persistence::{ApiKeyPair, CREDENTIAL_FILE_EXTENSION};

use crate::error::{Result, SessionError};

/// Minutes an onboarding flow may sit idle before it is discarded.
pub const ONBOARDING_TTL_MINUTES: i64 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum OnboardingStep {
    AwaitingId,
    AwaitingHash,
    AwaitingCredentialFile,
}

impl OnboardingStep {
    /// What to ask the user for at this step.
    pub fn prompt(self) -> &'static str {
        match self {
            OnboardingStep::AwaitingId => "Please send your API ID:",
            OnboardingStep::AwaitingHash => "Please send your API Hash:",
            OnboardingStep::AwaitingCredentialFile => "Please send your .session file:",
        }
    }

    /// What to say when the input did not fit this step.
    pub fn reprompt(self) -> &'static str {
        match self {
            OnboardingStep::AwaitingId => "Invalid API ID. Please send a valid number:",
            OnboardingStep::AwaitingHash => "The API Hash cannot be empty. Please send your API Hash:",
            OnboardingStep::AwaitingCredentialFile => "Please send a valid .session file:",
        }
    }
}

/// One user's in-progress onboarding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OnboardingState {
    pub step: OnboardingStep,
    pub api_id: Option<i32>,
    pub api_hash: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// Result of feeding text to an [`OnboardingState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextOutcome {
    /// Input accepted; the state moved to this step.
    Advanced(OnboardingStep),
    /// Input rejected; the state is unchanged.
    Rejected(OnboardingStep),
}

impl OnboardingState {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            step: OnboardingStep::AwaitingId,
            api_id: None,
            api_hash: None,
            updated_at: now,
        }
    }

    /// Whether the flow has been idle past the time-to-live.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now - self.updated_at > Duration::minutes(ONBOARDING_TTL_MINUTES)
    }

    /// Feed a text message to the current step.
    pub fn accept_text(&mut self, text: &str, now: DateTime<Utc>) -> TextOutcome {
        let text = text.trim();
        match self.step {
            OnboardingStep::AwaitingId => match text.parse::<i32>() {
                Ok(api_id) => {
                    self.api_id = Some(api_id);
                    self.advance(OnboardingStep::AwaitingHash, now)
                }
                Err(_) => TextOutcome::Rejected(self.step),
            },
            OnboardingStep::AwaitingHash if !text.is_empty() => {
                self.api_hash = Some(text.to_string());
                self.advance(OnboardingStep::AwaitingCredentialFile, now)
            }
            OnboardingStep::AwaitingHash | OnboardingStep::AwaitingCredentialFile => {
                TextOutcome::Rejected(self.step)
            }
        }
    }

    fn advance(&mut self, step: OnboardingStep, now: DateTime<Utc>) -> TextOutcome {
        self.step = step;
        self.updated_at = now;
        TextOutcome::Advanced(step)
    }

    /// Whether a file with this name completes the current step.
    pub fn accepts_file(&self, file_name: &str) -> bool {
        self.step == OnboardingStep::AwaitingCredentialFile
            && file_name.len() > CREDENTIAL_FILE_EXTENSION.len()
            && file_name.ends_with(CREDENTIAL_FILE_EXTENSION)
    }

    /// The collected key pair, once both parts are present.
    pub fn keys(&self) -> Option<ApiKeyPair> {
        match (self.api_id, &self.api_hash) {
            (Some(id), Some(hash)) => Some(ApiKeyPair::new(id, hash.clone())),
            _ => None,
        }
    }
}

/// A credential file the user uploaded to the control bot.
#[async_trait]
pub trait CredentialUpload: Send + Sync {
    /// Name the user gave the file.
    fn file_name(&self) -> &str;

    /// Download the file contents.
    async fn fetch(&self) -> Result<Vec<u8>>;
}

/// An upload whose bytes are already in memory.
#[derive(Debug, Clone)]
pub struct InMemoryUpload {
    pub file_name: String,
    pub contents: Vec<u8>,
}

impl InMemoryUpload {
    pub fn new(file_name: impl Into<String>, contents: impl Into<Vec<u8>>) -> Self {
        Self {
            file_name: file_name.into(),
            contents: contents.into(),
        }
    }
}

#[async_trait]
impl CredentialUpload for InMemoryUpload {
    fn file_name(&self) -> &str {
        &self.file_name
    }

    async fn fetch(&self) -> Result<Vec<u8>> {
        Ok(self.contents.clone())
    }
}

/// One message from a user who is onboarding.
pub enum OnboardingInput {
    Text(String),
    File(Box<dyn CredentialUpload>),
}

impl std::fmt::Debug for OnboardingInput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OnboardingInput::Text(_) => f.write_str("Text(..)"),
            OnboardingInput::File(upload) => write!(f, "File({})", upload.file_name()),
        }
    }
}

/// What the manager reports back after an onboarding message.
#[derive(Debug)]
pub enum OnboardingReply {
    /// Input accepted, ask for the next step.
    Prompt(OnboardingStep),
    /// Input rejected, ask again for the same step.
    Reprompt(OnboardingStep),
    /// The session is connected and registered.
    Connected { display_name: String },
    /// The flow ended in failure and was discarded.
    Failed(SessionError),
    /// The flow was idle too long and was discarded.
    Expired,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path_collects_keys() {
        let now = Utc::now();
        let mut state = OnboardingState::new(now);

        assert_eq!(
            state.accept_text("12345", now),
            TextOutcome::Advanced(OnboardingStep::AwaitingHash)
        );
        assert_eq!(state.api_id, Some(12345));
        assert_eq!(
            state.accept_text("  abcdef0123 ", now),
            TextOutcome::Advanced(OnboardingStep::AwaitingCredentialFile)
        );
        assert_eq!(state.keys(), Some(ApiKeyPair::new(12345, "abcdef0123")));
    }

    #[test]
    fn test_invalid_input_never_moves_step() {
        let now = Utc::now();
        let mut state = OnboardingState::new(now);

        assert_eq!(
            state.accept_text("abc", now),
            TextOutcome::Rejected(OnboardingStep::AwaitingId)
        );
        assert_eq!(
            state.accept_text("99999999999", now),
            TextOutcome::Rejected(OnboardingStep::AwaitingId)
        );

        state.accept_text("1", now);
        assert_eq!(
            state.accept_text("   ", now),
            TextOutcome::Rejected(OnboardingStep::AwaitingHash)
        );

        state.accept_text("hash", now);
        let before = state.clone();
        assert_eq!(
            state.accept_text("12345", now),
            TextOutcome::Rejected(OnboardingStep::AwaitingCredentialFile)
        );
        assert_eq!(state, before);
    }

    #[test]
    fn test_accepts_file_only_at_file_step() {
        let now = Utc::now();
        let mut state = OnboardingState::new(now);
        assert!(!state.accepts_file("x.session"));

        state.accept_text("1", now);
        state.accept_text("h", now);
        assert!(state.accepts_file("x.session"));
        assert!(!state.accepts_file("x.txt"));
        assert!(!state.accepts_file(".session"));
    }

    #[test]
    fn test_expiry() {
        let start = Utc::now();
        let mut state = OnboardingState::new(start);

        assert!(!state.is_expired(start + Duration::minutes(29)));
        assert!(state.is_expired(start + Duration::minutes(31)));

        state.accept_text("1", start + Duration::minutes(20));
        assert!(!state.is_expired(start + Duration::minutes(45)));
    }
}
